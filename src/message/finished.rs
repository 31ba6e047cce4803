use nom::bytes::complete::take;
use nom::IResult;
use smallvec::SmallVec;

/// Length of the Finished verify data in both DTLS 1.0 and 1.2.
pub const VERIFY_DATA_LEN: usize = 12;

/// The Finished message: a 12-byte PRF digest over the transcript.
#[derive(Debug, PartialEq, Eq)]
pub struct Finished {
    pub verify_data: SmallVec<[u8; VERIFY_DATA_LEN]>,
}

impl Finished {
    pub fn new(verify_data: &[u8]) -> Self {
        Finished {
            verify_data: SmallVec::from_slice(verify_data),
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Finished> {
        let (input, verify_data) = take(VERIFY_DATA_LEN)(input)?;
        Ok((
            input,
            Finished {
                verify_data: SmallVec::from_slice(verify_data),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.verify_data);
    }
}
