//! Handshake fragment reassembly.
//!
//! DTLS fragments one logical handshake message across records when it does
//! not fit the MTU. Fragments arrive in any order, duplicated or
//! overlapping; a message is released once its `[0, total_length)` range is
//! covered contiguously. Pending bytes across all partial messages are
//! capped; overflow discards everything and surfaces as a decode error.

use std::collections::HashMap;

use crate::message::{HandshakeHeader, MessageType};
use crate::Error;

/// Cap on buffered fragment bytes per peer.
const MAX_PENDING_BYTES: usize = 64 * 1024;

#[derive(Debug)]
struct Partial {
    msg_type: MessageType,
    total_len: usize,
    buf: Vec<u8>,
    // Sorted, coalesced covered ranges.
    ranges: Vec<(usize, usize)>,
}

impl Partial {
    fn is_complete(&self) -> bool {
        self.ranges == [(0, self.total_len)] || (self.total_len == 0 && !self.ranges.is_empty())
    }

    fn cover(&mut self, start: usize, end: usize) {
        self.ranges.push((start, end));
        self.ranges.sort_unstable();

        let mut merged: Vec<(usize, usize)> = Vec::with_capacity(self.ranges.len());
        for &(start, end) in self.ranges.iter() {
            match merged.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }
        self.ranges = merged;
    }
}

/// Fragment buffers for all in-flight handshake messages of one peer.
#[derive(Debug, Default)]
pub struct Reassembly {
    partials: HashMap<u16, Partial>,
    pending_bytes: usize,
}

impl Reassembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fragment. Inconsistent headers or a blown pending-bytes
    /// budget discard the partial state and fail.
    pub fn insert(&mut self, header: &HandshakeHeader, fragment: &[u8]) -> Result<(), Error> {
        let total_len = header.length as usize;
        let offset = header.fragment_offset as usize;

        if header.fragment_length as usize != fragment.len() {
            return Err(Error::DecodeError(
                "fragment length disagrees with record".to_string(),
            ));
        }
        if offset + fragment.len() > total_len {
            return Err(Error::DecodeError(
                "fragment exceeds declared message length".to_string(),
            ));
        }

        match self.partials.get(&header.message_seq) {
            Some(partial) => {
                if partial.msg_type != header.msg_type || partial.total_len != total_len {
                    self.clear();
                    return Err(Error::DecodeError(
                        "conflicting fragments for one message".to_string(),
                    ));
                }
            }
            None => {
                if self.pending_bytes + total_len > MAX_PENDING_BYTES {
                    self.clear();
                    return Err(Error::DecodeError(
                        "fragment buffer overflow".to_string(),
                    ));
                }
                self.pending_bytes += total_len;
                self.partials.insert(
                    header.message_seq,
                    Partial {
                        msg_type: header.msg_type,
                        total_len,
                        buf: vec![0; total_len],
                        ranges: Vec::new(),
                    },
                );
            }
        }

        let partial = self
            .partials
            .get_mut(&header.message_seq)
            .expect("present after insert");
        partial.buf[offset..offset + fragment.len()].copy_from_slice(fragment);
        partial.cover(offset, offset + fragment.len());
        Ok(())
    }

    /// Release the message with this sequence number if fully covered.
    pub fn take(&mut self, message_seq: u16) -> Option<(MessageType, Vec<u8>)> {
        if !self
            .partials
            .get(&message_seq)
            .map(|p| p.is_complete())
            .unwrap_or(false)
        {
            return None;
        }

        let partial = self.partials.remove(&message_seq).expect("checked above");
        self.pending_bytes -= partial.total_len;
        Some((partial.msg_type, partial.buf))
    }

    /// Drop buffered fragments below the given sequence (already consumed).
    pub fn discard_below(&mut self, message_seq: u16) {
        let stale: Vec<u16> = self
            .partials
            .keys()
            .copied()
            .filter(|seq| *seq < message_seq)
            .collect();
        for seq in stale {
            if let Some(partial) = self.partials.remove(&seq) {
                self.pending_bytes -= partial.total_len;
            }
        }
    }

    pub fn clear(&mut self) {
        self.partials.clear();
        self.pending_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(message_seq: u16, total: u32, offset: u32, len: u32) -> HandshakeHeader {
        HandshakeHeader {
            msg_type: MessageType::Certificate,
            length: total,
            message_seq,
            fragment_offset: offset,
            fragment_length: len,
        }
    }

    #[test]
    fn in_order_reassembly() {
        let mut r = Reassembly::new();
        let message: Vec<u8> = (0..100u8).collect();

        r.insert(&header(0, 100, 0, 40), &message[..40]).unwrap();
        assert!(r.take(0).is_none());
        r.insert(&header(0, 100, 40, 60), &message[40..]).unwrap();

        let (msg_type, body) = r.take(0).unwrap();
        assert_eq!(msg_type, MessageType::Certificate);
        assert_eq!(body, message);
        // Buffer is discarded after release.
        assert!(r.take(0).is_none());
    }

    #[test]
    fn any_permutation_with_duplicates_reassembles() {
        let message: Vec<u8> = (0..60u8).collect();
        let fragments = [(0u32, 20u32), (20, 20), (40, 20)];

        let orders: &[[usize; 4]] = &[
            [2, 0, 1, 0], // out of order plus one duplicate
            [1, 2, 0, 2],
            [0, 2, 1, 1],
        ];

        for order in orders {
            let mut r = Reassembly::new();
            for &i in order {
                let (offset, len) = fragments[i];
                r.insert(
                    &header(3, 60, offset, len),
                    &message[offset as usize..(offset + len) as usize],
                )
                .unwrap();
            }
            let (_, body) = r.take(3).unwrap();
            assert_eq!(body, message, "order {:?}", order);
        }
    }

    #[test]
    fn overlapping_duplicate_is_idempotent() {
        let message: Vec<u8> = (0..50u8).collect();
        let mut r = Reassembly::new();

        r.insert(&header(1, 50, 0, 30), &message[..30]).unwrap();
        r.insert(&header(1, 50, 20, 30), &message[20..]).unwrap();
        r.insert(&header(1, 50, 10, 20), &message[10..30]).unwrap();

        let (_, body) = r.take(1).unwrap();
        assert_eq!(body, message);
    }

    #[test]
    fn hole_is_not_complete() {
        let message: Vec<u8> = (0..50u8).collect();
        let mut r = Reassembly::new();

        r.insert(&header(0, 50, 0, 10), &message[..10]).unwrap();
        r.insert(&header(0, 50, 30, 20), &message[30..]).unwrap();
        assert!(r.take(0).is_none());
    }

    #[test]
    fn empty_message_completes() {
        let mut r = Reassembly::new();
        let h = HandshakeHeader::whole(MessageType::ServerHelloDone, 2, 0);
        r.insert(&h, &[]).unwrap();
        let (msg_type, body) = r.take(2).unwrap();
        assert_eq!(msg_type, MessageType::ServerHelloDone);
        assert!(body.is_empty());
    }

    #[test]
    fn fragment_beyond_total_rejected() {
        let mut r = Reassembly::new();
        assert!(r.insert(&header(0, 10, 8, 4), &[0; 4]).is_err());
    }

    #[test]
    fn fragment_length_mismatch_rejected() {
        let mut r = Reassembly::new();
        assert!(r.insert(&header(0, 10, 0, 4), &[0; 3]).is_err());
    }

    #[test]
    fn pending_overflow_discards_and_errors() {
        let mut r = Reassembly::new();
        // Two half-window messages fit; a third overflows.
        r.insert(&header(0, 30_000, 0, 1), &[0]).unwrap();
        r.insert(&header(1, 30_000, 0, 1), &[0]).unwrap();
        let result = r.insert(&header(2, 30_000, 0, 1), &[0]);
        assert!(matches!(result, Err(Error::DecodeError(_))));
        // Everything was discarded.
        assert!(r.take(0).is_none());
        r.insert(&header(3, 10, 0, 10), &[0; 10]).unwrap();
        assert!(r.take(3).is_some());
    }

    #[test]
    fn conflicting_total_length_rejected() {
        let mut r = Reassembly::new();
        r.insert(&header(0, 50, 0, 10), &[0; 10]).unwrap();
        assert!(r.insert(&header(0, 60, 10, 10), &[0; 10]).is_err());
    }

    #[test]
    fn discard_below_prunes_stale_state() {
        let mut r = Reassembly::new();
        r.insert(&header(0, 50, 0, 10), &[0; 10]).unwrap();
        r.insert(&header(5, 50, 0, 10), &[0; 10]).unwrap();
        r.discard_below(5);
        r.insert(&header(5, 50, 10, 40), &[0; 40]).unwrap();
        assert!(r.take(5).is_some());
        assert!(r.take(0).is_none());
    }
}
