use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u32};
use nom::IResult;

/// NewSessionTicket (RFC 5077). Parsed for wire compatibility and ignored:
/// this crate does not resume sessions.
#[derive(Debug, PartialEq, Eq)]
pub struct NewSessionTicket<'a> {
    pub lifetime_hint: u32,
    pub ticket: &'a [u8],
}

impl<'a> NewSessionTicket<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], NewSessionTicket<'a>> {
        let (input, lifetime_hint) = be_u32(input)?;
        let (input, ticket_len) = be_u16(input)?;
        let (input, ticket) = take(ticket_len)(input)?;

        Ok((
            input,
            NewSessionTicket {
                lifetime_hint,
                ticket,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.lifetime_hint.to_be_bytes());
        output.extend_from_slice(&(self.ticket.len() as u16).to_be_bytes());
        output.extend_from_slice(self.ticket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &[u8] = &[
        0x00, 0x00, 0x0E, 0x10, // lifetime hint (3600)
        0x00, 0x03, // ticket length
        0xAA, 0xBB, 0xCC, // ticket
    ];

    #[test]
    fn roundtrip() {
        let ticket = NewSessionTicket {
            lifetime_hint: 3600,
            ticket: &[0xAA, 0xBB, 0xCC],
        };

        let mut serialized = Vec::new();
        ticket.serialize(&mut serialized);
        assert_eq!(serialized, MESSAGE);

        let (rest, parsed) = NewSessionTicket::parse(&serialized).unwrap();
        assert_eq!(parsed, ticket);
        assert!(rest.is_empty());
    }
}
