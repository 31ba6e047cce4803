use std::ops::RangeFrom;

use nom::error::{make_error, ErrorKind, ParseError};
use nom::{Err, IResult, InputIter, InputLength, Slice};

/// Parse a big-endian 48-bit integer (the DTLS record sequence number).
pub fn be_u48<I, E: ParseError<I>>(input: I) -> IResult<I, u64, E>
where
    I: Slice<RangeFrom<usize>> + InputIter<Item = u8> + InputLength,
{
    let bound: usize = 6;

    if input.input_len() < bound {
        Err(Err::Error(make_error(input, ErrorKind::Eof)))
    } else {
        let mut res = 0u64;

        for byte in input.iter_elements().take(bound) {
            res = (res << 8) + byte as u64;
        }

        Ok((input.slice(bound..), res))
    }
}

/// Append a 24-bit big-endian length to the output.
pub fn put_u24(output: &mut Vec<u8>, value: u32) {
    output.extend_from_slice(&value.to_be_bytes()[1..]);
}

/// Append a 48-bit big-endian value to the output.
pub fn put_u48(output: &mut Vec<u8>, value: u64) {
    output.extend_from_slice(&value.to_be_bytes()[2..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn be_u48_roundtrip() {
        let mut out = Vec::new();
        put_u48(&mut out, 0x0102_0304_0506);
        assert_eq!(out, &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);

        let (rest, value) = be_u48::<_, nom::error::Error<&[u8]>>(&out[..]).unwrap();
        assert!(rest.is_empty());
        assert_eq!(value, 0x0102_0304_0506);
    }

    #[test]
    fn be_u48_too_short() {
        let input = [0x01, 0x02, 0x03];
        assert!(be_u48::<_, nom::error::Error<&[u8]>>(&input[..]).is_err());
    }

    #[test]
    fn put_u24_truncates_high_byte() {
        let mut out = Vec::new();
        put_u24(&mut out, 0x00AB_CDEF);
        assert_eq!(out, &[0xAB, 0xCD, 0xEF]);
    }
}
