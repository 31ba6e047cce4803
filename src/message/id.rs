use std::ops::Deref;

use nom::bytes::complete::take;
use nom::error::{Error as NomError, ErrorKind};
use nom::number::complete::be_u8;
use nom::{Err, IResult};

macro_rules! opaque_id {
    ($name:ident, $cap:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            buf: [u8; $cap],
            len: u8,
        }

        impl $name {
            pub const CAPACITY: usize = $cap;

            pub fn empty() -> Self {
                $name {
                    buf: [0; $cap],
                    len: 0,
                }
            }

            /// Build from a slice; `None` if longer than the capacity.
            pub fn try_new(bytes: &[u8]) -> Option<Self> {
                if bytes.len() > $cap {
                    return None;
                }
                let mut buf = [0; $cap];
                buf[..bytes.len()].copy_from_slice(bytes);
                Some($name {
                    buf,
                    len: bytes.len() as u8,
                })
            }

            pub fn is_empty(&self) -> bool {
                self.len == 0
            }

            pub fn len(&self) -> usize {
                self.len as usize
            }

            /// Parse the 1-byte length prefix plus body.
            pub fn parse(input: &[u8]) -> IResult<&[u8], $name> {
                let (input, len) = be_u8(input)?;
                if len as usize > $cap {
                    return Err(Err::Failure(NomError::new(input, ErrorKind::LengthValue)));
                }
                let (input, bytes) = take(len as usize)(input)?;
                // Length is checked against capacity above.
                let id = $name::try_new(bytes)
                    .ok_or_else(|| Err::Failure(NomError::new(input, ErrorKind::LengthValue)))?;
                Ok((input, id))
            }

            pub fn serialize(&self, output: &mut Vec<u8>) {
                output.push(self.len);
                output.extend_from_slice(self);
            }
        }

        impl Deref for $name {
            type Target = [u8];

            fn deref(&self) -> &Self::Target {
                &self.buf[..self.len as usize]
            }
        }

        impl TryFrom<&str> for $name {
            type Error = ();

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                $name::try_new(value.as_bytes()).ok_or(())
            }
        }
    };
}

opaque_id!(SessionId, 32, "Session identifier (unused: no resumption).");
opaque_id!(Cookie, 64, "HelloVerifyRequest cookie echoed by the client.");
