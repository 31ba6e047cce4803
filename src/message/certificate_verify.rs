use nom::IResult;

use super::{DigitallySigned, ProtocolVersion};

/// Client proof of private-key possession: a signature over the handshake
/// transcript so far.
#[derive(Debug, PartialEq, Eq)]
pub struct CertificateVerify<'a> {
    pub signed: DigitallySigned<'a>,
}

impl<'a> CertificateVerify<'a> {
    pub fn new(signed: DigitallySigned<'a>) -> Self {
        CertificateVerify { signed }
    }

    pub fn parse(
        input: &'a [u8],
        version: ProtocolVersion,
    ) -> IResult<&'a [u8], CertificateVerify<'a>> {
        let (input, signed) = DigitallySigned::parse(input, version)?;
        Ok((input, CertificateVerify { signed }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.signed.serialize(output);
    }
}
