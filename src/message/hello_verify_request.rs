use nom::IResult;

use super::{Cookie, ProtocolVersion};

/// Stateless server challenge carrying the address-proof cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloVerifyRequest {
    pub server_version: ProtocolVersion,
    pub cookie: Cookie,
}

impl HelloVerifyRequest {
    pub fn new(server_version: ProtocolVersion, cookie: Cookie) -> Self {
        HelloVerifyRequest {
            server_version,
            cookie,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], HelloVerifyRequest> {
        let (input, server_version) = ProtocolVersion::parse(input)?;
        let (input, cookie) = Cookie::parse(input)?;

        Ok((
            input,
            HelloVerifyRequest {
                server_version,
                cookie,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.server_version.serialize(output);
        self.cookie.serialize(output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &[u8] = &[
        0xFE, 0xFD, // ProtocolVersion::DTLS1_2
        0x09, // Cookie length
        0x63, 0x6F, 0x6F, 0x6B, 0x69, 0x65, 0x34, 0x35, 0x36, // Cookie
    ];

    #[test]
    fn roundtrip() {
        let original =
            HelloVerifyRequest::new(ProtocolVersion::DTLS1_2, "cookie456".try_into().unwrap());

        let mut serialized = Vec::new();
        original.serialize(&mut serialized);
        assert_eq!(serialized, MESSAGE);

        let (rest, parsed) = HelloVerifyRequest::parse(&serialized).unwrap();
        assert_eq!(parsed, original);
        assert!(rest.is_empty());
    }

    #[test]
    fn truncated_cookie() {
        assert!(HelloVerifyRequest::parse(&MESSAGE[..3]).is_err());
    }
}
