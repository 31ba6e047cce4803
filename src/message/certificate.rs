use nom::bytes::complete::take;
use nom::error::{Error as NomError, ErrorKind};
use nom::number::complete::be_u24;
use nom::{Err, IResult};
use smallvec::SmallVec;

use crate::util::put_u24;

/// A certificate chain: DER certificates, leaf first, each with a 24-bit
/// length, wrapped in a 24-bit total length.
#[derive(Debug, PartialEq, Eq, Default)]
pub struct Certificate<'a> {
    pub certificate_list: SmallVec<[&'a [u8]; 4]>,
}

impl<'a> Certificate<'a> {
    pub fn new(certificate_list: SmallVec<[&'a [u8]; 4]>) -> Self {
        Certificate { certificate_list }
    }

    pub fn empty() -> Self {
        Certificate::default()
    }

    pub fn leaf(&self) -> Option<&'a [u8]> {
        self.certificate_list.first().copied()
    }

    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Certificate<'a>> {
        let (input, total_len) = be_u24(input)?;
        let (rest, mut list_bytes) = take(total_len)(input)?;

        let mut certificate_list = SmallVec::new();
        while !list_bytes.is_empty() {
            let (remaining, cert_len) = be_u24(list_bytes)?;
            if cert_len == 0 {
                return Err(Err::Failure(NomError::new(remaining, ErrorKind::LengthValue)));
            }
            let (remaining, cert) = take(cert_len)(remaining)?;
            certificate_list.push(cert);
            list_bytes = remaining;
        }

        Ok((rest, Certificate { certificate_list }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        let total: usize = self.certificate_list.iter().map(|c| 3 + c.len()).sum();
        put_u24(output, total as u32);

        for cert in &self.certificate_list {
            put_u24(output, cert.len() as u32);
            output.extend_from_slice(cert);
        }
    }
}
