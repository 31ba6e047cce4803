use std::time::{SystemTime, UNIX_EPOCH};

use nom::bytes::complete::take;
use nom::IResult;
use rand::rngs::OsRng;
use rand::RngCore;

/// The 32-byte hello random: 4 bytes gmt_unix_time plus 28 random bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Random([u8; 32]);

impl Random {
    pub const LEN: usize = 32;

    /// A fresh random stamped with the current time.
    pub fn generate() -> Self {
        let gmt_unix_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);

        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(&gmt_unix_time.to_be_bytes());
        OsRng.fill_bytes(&mut bytes[4..]);

        Random(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Random(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn gmt_unix_time(&self) -> u32 {
        u32::from_be_bytes(self.0[..4].try_into().expect("4 bytes"))
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Random> {
        let (input, bytes) = take(Self::LEN)(input)?;
        Ok((input, Random(bytes.try_into().expect("32 bytes"))))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let random = Random::from_bytes([7u8; 32]);

        let mut serialized = Vec::new();
        random.serialize(&mut serialized);
        assert_eq!(serialized.len(), 32);

        let (rest, parsed) = Random::parse(&serialized).unwrap();
        assert_eq!(parsed, random);
        assert!(rest.is_empty());
    }

    #[test]
    fn generated_randoms_differ() {
        let a = Random::generate();
        let b = Random::generate();
        assert_ne!(a.as_bytes()[4..], b.as_bytes()[4..]);
        assert!(a.gmt_unix_time() > 0);
    }

    #[test]
    fn too_short() {
        assert!(Random::parse(&[0u8; 31]).is_err());
    }
}
