use core::fmt;
use std::cmp::Ordering;
use std::ops::Range;

use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use super::ProtocolVersion;
use crate::util::{be_u48, put_u48};
use crate::Error;

/// One DTLS record as laid out in a datagram.
///
/// Header is exactly 13 bytes: type(1) version(2) epoch(2) seq(6) length(2).
#[derive(Debug, PartialEq, Eq, Default)]
pub struct DtlsRecord<'a> {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub sequence: Sequence,
    pub length: u16,
    pub fragment: &'a [u8],
}

/// Epoch plus 48-bit record sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sequence {
    pub epoch: u16,
    pub number: u64, // 48 bits on the wire
}

impl Sequence {
    pub fn new(epoch: u16, number: u64) -> Self {
        Sequence { epoch, number }
    }

    /// The 64-bit composite `(epoch << 48) | number` fed to the cipher as
    /// its per-record nonce/MAC input.
    pub fn to_nonce(self) -> u64 {
        ((self.epoch as u64) << 48) | (self.number & 0x0000_FFFF_FFFF_FFFF)
    }
}

impl<'a> DtlsRecord<'a> {
    pub const HEADER_LEN: usize = 13;

    /// Byte range of the 2-byte length field within the header.
    pub const LENGTH_OFFSET: Range<usize> = 11..13;

    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], DtlsRecord<'a>> {
        let (input, content_type) = ContentType::parse(input)?;
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, epoch) = be_u16(input)?;
        let (input, number) = be_u48(input)?;
        let (input, length) = be_u16(input)?;
        let (rest, fragment) = take(length as usize)(input)?;

        Ok((
            rest,
            DtlsRecord {
                content_type,
                version,
                sequence: Sequence { epoch, number },
                length,
                fragment,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.content_type.as_u8());
        self.version.serialize(output);
        output.extend_from_slice(&self.sequence.epoch.to_be_bytes());
        put_u48(output, self.sequence.number);
        output.extend_from_slice(&self.length.to_be_bytes());
        output.extend_from_slice(self.fragment);
    }
}

/// Split a datagram into whole-record slices without parsing the fragments.
///
/// Used to route records before it is known whether they can be decrypted
/// (records from a future epoch are stashed as raw bytes).
pub struct RecordSlice<'a> {
    pub slice: &'a [u8],
    pub rest: &'a [u8],
}

impl<'a> RecordSlice<'a> {
    pub fn try_read(input: &'a [u8]) -> Result<Option<RecordSlice<'a>>, Error> {
        if input.is_empty() {
            return Ok(None);
        }

        if input.len() < DtlsRecord::HEADER_LEN {
            return Err(Error::ParseIncomplete);
        }

        let length_bytes = input[DtlsRecord::LENGTH_OFFSET].try_into().expect("2 bytes");
        let length = u16::from_be_bytes(length_bytes) as usize;
        let mid = DtlsRecord::HEADER_LEN + length;

        if input.len() < mid {
            return Err(Error::ParseIncomplete);
        }

        let (slice, rest) = input.split_at(mid);

        Ok(Some(RecordSlice { slice, rest }))
    }
}

/// Record content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    ChangeCipherSpec,
    Alert,
    Handshake,
    ApplicationData,
    Unknown(u8),
}

impl Default for ContentType {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl ContentType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            20 => ContentType::ChangeCipherSpec,
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            _ => ContentType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ContentType::ChangeCipherSpec => 20,
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
            ContentType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ContentType> {
        let (input, byte) = be_u8(input)?;
        Ok((input, Self::from_u8(byte)))
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[epoch: {}, number: {}]", self.epoch, self.number)
    }
}

impl Ord for Sequence {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.epoch, self.number).cmp(&(other.epoch, other.number))
    }
}

impl PartialOrd for Sequence {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
