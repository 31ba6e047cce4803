//! The shared record/handshake engine beneath the client and server state
//! machines.
//!
//! Responsibilities: record framing and epoch/sequence discipline, cipher
//! rollover at ChangeCipherSpec, replay rejection, handshake fragmentation
//! and reassembly, the running transcript, flight retransmission timers and
//! the outbound datagram queue.

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::crypto::CryptoContext;
use crate::message::{
    Alert, ContentType, DtlsRecord, Handshake, HandshakeHeader, MessageType, ProtocolVersion,
    Sequence,
};
#[cfg(test)]
use crate::message::RecordSlice;
use crate::reassembly::Reassembly;
use crate::timer::ExponentialBackoff;
use crate::window::ReplayWindow;
use crate::{Config, Error, Output};

/// Cap on raw records stashed while waiting for the peer's CCS.
const MAX_STASHED_RECORDS: usize = 32;

/// A complete, in-order inbound handshake message.
#[derive(Debug)]
pub(crate) struct InboundMessage {
    pub msg_type: MessageType,
    pub message_seq: u16,
    pub body: Vec<u8>,
}

/// One element of the current outbound flight, kept as plaintext so a
/// retransmission re-encodes under fresh record sequence numbers.
enum FlightItem {
    Message {
        msg_type: MessageType,
        message_seq: u16,
        body: Vec<u8>,
    },
    ChangeCipherSpec,
}

pub(crate) struct Engine {
    config: Arc<Config>,
    is_client: bool,
    mtu: usize,

    /// Version stamped on outbound records; updated on negotiation.
    wire_version: ProtocolVersion,

    crypto: CryptoContext,

    // Transmit side.
    local_epoch: u16,
    tx_seq: [u64; 2],
    queue_tx: VecDeque<Vec<u8>>,

    // Receive side.
    peer_epoch: u16,
    windows: [ReplayWindow; 2],
    stashed_next_epoch: Vec<Vec<u8>>,
    queue_rx: VecDeque<InboundMessage>,
    ccs_received: bool,
    alert_received: Option<Alert>,
    queue_events: VecDeque<Output>,

    // Handshake bookkeeping.
    next_msg_seq: u16,
    peer_msg_seq: u16,
    reassembly: Reassembly,
    transcript: Vec<u8>,

    // Flight retransmission.
    flight: Vec<FlightItem>,
    flight_backoff: ExponentialBackoff,
    flight_timeout: Option<Instant>,
    handshake_deadline: Option<Instant>,
    timers_active: bool,
}

impl Engine {
    pub fn new(config: Arc<Config>, is_client: bool) -> Self {
        let flight_backoff =
            ExponentialBackoff::new(config.flight_start_rto(), config.flight_retries());
        let mtu = config.mtu_for(false);

        Engine {
            config,
            is_client,
            mtu,
            wire_version: ProtocolVersion::DTLS1_2,
            crypto: CryptoContext::new(),
            local_epoch: 0,
            tx_seq: [0, 0],
            queue_tx: VecDeque::new(),
            peer_epoch: 0,
            windows: [ReplayWindow::new(), ReplayWindow::new()],
            stashed_next_epoch: Vec::new(),
            queue_rx: VecDeque::new(),
            ccs_received: false,
            alert_received: None,
            queue_events: VecDeque::new(),
            next_msg_seq: 0,
            peer_msg_seq: 0,
            reassembly: Reassembly::new(),
            transcript: Vec::new(),
            flight: Vec::new(),
            flight_backoff,
            flight_timeout: None,
            handshake_deadline: None,
            timers_active: true,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn crypto(&self) -> &CryptoContext {
        &self.crypto
    }

    pub fn crypto_mut(&mut self) -> &mut CryptoContext {
        &mut self.crypto
    }

    fn role(&self) -> &'static str {
        if self.is_client {
            "client"
        } else {
            "server"
        }
    }

    pub fn set_mtu(&mut self, mtu: usize) {
        self.mtu = mtu;
    }

    pub fn set_wire_version(&mut self, version: ProtocolVersion) {
        self.wire_version = version;
        self.crypto.set_version(version);
    }

    pub fn wire_version(&self) -> ProtocolVersion {
        self.wire_version
    }

    /// Account for a HelloVerifyRequest exchange that happened statelessly
    /// before this engine existed: record sequence 0 and handshake sequence
    /// 0 are spent on both sides.
    pub fn skip_hello_verify(&mut self) {
        self.tx_seq[0] = 1;
        self.next_msg_seq = 1;
        self.peer_msg_seq = 1;
        // The stateless HelloVerifyRequest consumed the peer's first record.
        self.windows[0].accept(0);
    }

    // ------------------------------------------------------------------
    // Inbound path

    /// Slice a datagram into records and process each. Parse errors abort
    /// the rest of the datagram; the caller decides whether that is fatal
    /// (crypto faults) or just a dropped datagram.
    #[cfg(test)]
    pub fn handle_packet(&mut self, datagram: &[u8]) -> Result<(), Error> {
        let mut input = datagram;
        while let Some(slice) = RecordSlice::try_read(input)? {
            input = slice.rest;
            self.process_record(slice.slice)?;
        }
        Ok(())
    }

    pub fn process_record(&mut self, raw: &[u8]) -> Result<(), Error> {
        let (_, record) = DtlsRecord::parse(raw)?;
        let epoch = record.sequence.epoch;

        if epoch > self.peer_epoch {
            // Records protected under a cipher we have not installed yet
            // (the peer's CCS is still in flight) are kept aside.
            if epoch == self.peer_epoch + 1 && self.stashed_next_epoch.len() < MAX_STASHED_RECORDS
            {
                trace!("stashing record for future epoch {}", epoch);
                self.stashed_next_epoch.push(raw.to_vec());
            } else {
                debug!("dropping record from epoch {} (current {})", epoch, self.peer_epoch);
            }
            return Ok(());
        }

        // A ChangeCipherSpec that outruns the key exchange (reordered
        // flight) waits until the pending cipher exists.
        if record.content_type == ContentType::ChangeCipherSpec
            && epoch == self.peer_epoch
            && self.peer_epoch == 0
            && !self.crypto.has_pending_read()
        {
            if self.stashed_next_epoch.len() < MAX_STASHED_RECORDS {
                trace!("stashing early ChangeCipherSpec");
                self.stashed_next_epoch.push(raw.to_vec());
            }
            return Ok(());
        }

        if epoch < self.peer_epoch {
            trace!("dropping record from old epoch {}", epoch);
            return Ok(());
        }

        let window = &mut self.windows[usize::from(epoch != 0)];
        if !window.accept(record.sequence.number) {
            debug!("dropping replayed/duplicate record {}", record.sequence);
            return Ok(());
        }

        let plaintext;
        let fragment: &[u8] = if epoch == 0 {
            record.fragment
        } else {
            plaintext = self.crypto.decrypt(
                record.sequence.to_nonce(),
                record.content_type,
                record.version,
                record.fragment,
            )?;
            &plaintext
        };

        match record.content_type {
            ContentType::Handshake => self.process_handshake_fragments(fragment)?,
            ContentType::ChangeCipherSpec => self.process_ccs(fragment)?,
            ContentType::Alert => {
                let (_, alert) = Alert::parse(fragment)?;
                debug!("received alert {:?}", alert);
                self.alert_received = Some(alert);
            }
            ContentType::ApplicationData => {
                if epoch == 0 {
                    debug!("dropping cleartext application data");
                } else {
                    self.queue_events
                        .push_back(Output::ApplicationData(fragment.to_vec()));
                }
            }
            ContentType::Unknown(value) => {
                debug!("dropping record with unknown content type {}", value);
            }
        }

        Ok(())
    }

    fn process_handshake_fragments(&mut self, mut input: &[u8]) -> Result<(), Error> {
        while !input.is_empty() {
            let (rest, handshake) = Handshake::parse(input)?;
            input = rest;
            self.insert_fragment(handshake)?;
        }
        Ok(())
    }

    fn insert_fragment(&mut self, handshake: Handshake<'_>) -> Result<(), Error> {
        if handshake.header.message_seq < self.peer_msg_seq {
            trace!(
                "dropping duplicate handshake fragment seq {}",
                handshake.header.message_seq
            );
            return Ok(());
        }

        self.reassembly.insert(&handshake.header, handshake.body)?;

        while let Some((msg_type, body)) = self.reassembly.take(self.peer_msg_seq) {
            let message_seq = self.peer_msg_seq;
            self.peer_msg_seq = self.peer_msg_seq.wrapping_add(1);
            self.reassembly.discard_below(self.peer_msg_seq);

            // HelloVerifyRequest never enters the transcript. Finished and
            // CertificateVerify are appended by the state machine after it
            // has checked them against the transcript that precedes them.
            if !matches!(
                msg_type,
                MessageType::HelloVerifyRequest
                    | MessageType::Finished
                    | MessageType::CertificateVerify
            ) {
                self.transcript_add(msg_type, message_seq, &body);
            }

            trace!("completed inbound {:?} (seq {})", msg_type, message_seq);
            self.queue_rx.push_back(InboundMessage {
                msg_type,
                message_seq,
                body,
            });
        }

        Ok(())
    }

    fn process_ccs(&mut self, fragment: &[u8]) -> Result<(), Error> {
        if fragment != [1] {
            return Err(Error::DecodeError("malformed ChangeCipherSpec".to_string()));
        }

        if self.peer_epoch > 0 {
            debug!("ignoring duplicate ChangeCipherSpec");
            return Ok(());
        }

        if !self.crypto.has_pending_read() {
            return Err(Error::UnexpectedMessage(
                "ChangeCipherSpec before key derivation".to_string(),
            ));
        }

        debug!("{}: peer cipher installed, expecting epoch 1", self.role());
        self.crypto.activate_read()?;
        self.peer_epoch = 1;
        self.windows[1] = ReplayWindow::new();
        self.ccs_received = true;

        // Records that raced ahead of the CCS can be decrypted now.
        let stashed = mem::take(&mut self.stashed_next_epoch);
        for raw in stashed {
            self.process_record(&raw)?;
        }

        Ok(())
    }

    /// Re-run records parked while waiting for key derivation (an early
    /// ChangeCipherSpec and anything protected under the next epoch).
    pub fn flush_stashed(&mut self) -> Result<(), Error> {
        if self.stashed_next_epoch.is_empty() || !self.crypto.has_pending_read() {
            return Ok(());
        }

        let stashed = mem::take(&mut self.stashed_next_epoch);
        for raw in stashed {
            self.process_record(&raw)?;
        }
        Ok(())
    }

    /// Pop the next complete in-order handshake message.
    pub fn take_message(&mut self) -> Option<InboundMessage> {
        self.queue_rx.pop_front()
    }

    pub fn take_ccs(&mut self) -> bool {
        mem::take(&mut self.ccs_received)
    }

    pub fn take_alert(&mut self) -> Option<Alert> {
        self.alert_received.take()
    }

    // ------------------------------------------------------------------
    // Outbound path

    /// Frame one record, encrypting when the epoch demands it, and pack it
    /// into the outbound datagram queue within the MTU.
    pub fn create_record(
        &mut self,
        content_type: ContentType,
        epoch: u16,
        payload: &[u8],
    ) -> Result<(), Error> {
        let index = usize::from(epoch != 0);
        let sequence = Sequence::new(epoch, self.tx_seq[index]);

        let fragment = if epoch == 0 {
            payload.to_vec()
        } else {
            self.crypto
                .encrypt(sequence.to_nonce(), content_type, self.wire_version, payload)?
        };

        let record = DtlsRecord {
            content_type,
            version: self.wire_version,
            sequence,
            length: fragment.len() as u16,
            fragment: &fragment,
        };

        let record_len = DtlsRecord::HEADER_LEN + fragment.len();
        let can_append = self
            .queue_tx
            .back()
            .map(|datagram| datagram.len() + record_len <= self.mtu)
            .unwrap_or(false);

        if can_append {
            let datagram = self.queue_tx.back_mut().expect("checked can_append");
            record.serialize(datagram);
        } else {
            if self.queue_tx.len() >= self.config.max_queue_tx() {
                return Err(Error::InternalError("transmit queue full".to_string()));
            }
            let mut datagram = Vec::with_capacity(record_len);
            record.serialize(&mut datagram);
            self.queue_tx.push_back(datagram);
        }

        self.tx_seq[index] += 1;
        Ok(())
    }

    /// Send a handshake message under the current epoch, fragmenting to the
    /// MTU, adding it to the transcript and recording it in the flight.
    pub fn send_handshake(&mut self, msg_type: MessageType, body: &[u8]) -> Result<(), Error> {
        let message_seq = self.next_msg_seq;
        self.next_msg_seq = self.next_msg_seq.wrapping_add(1);

        if msg_type != MessageType::HelloVerifyRequest {
            self.transcript_add(msg_type, message_seq, body);
        }

        let epoch = self.local_epoch;
        self.send_handshake_fragments(msg_type, message_seq, body, epoch)?;

        self.flight.push(FlightItem::Message {
            msg_type,
            message_seq,
            body: body.to_vec(),
        });

        Ok(())
    }

    fn send_handshake_fragments(
        &mut self,
        msg_type: MessageType,
        message_seq: u16,
        body: &[u8],
        epoch: u16,
    ) -> Result<(), Error> {
        let overhead = if epoch == 0 {
            0
        } else {
            self.crypto.write_overhead()
        };
        let fixed = DtlsRecord::HEADER_LEN + HandshakeHeader::LEN + overhead;

        if self.mtu <= fixed {
            return Err(Error::InternalError("MTU below record overhead".to_string()));
        }

        let total = body.len();
        let mut offset = 0usize;

        loop {
            let used = self.queue_tx.back().map(|d| d.len()).unwrap_or(0);
            let available_in_current = self.mtu.saturating_sub(used);

            // Prefer packing into the current datagram; otherwise budget
            // against a fresh one.
            let available_for_body = if available_in_current > fixed {
                available_in_current - fixed
            } else {
                self.mtu - fixed
            };

            let chunk = (total - offset).min(available_for_body);

            let header = HandshakeHeader {
                msg_type,
                length: total as u32,
                message_seq,
                fragment_offset: offset as u32,
                fragment_length: chunk as u32,
            };

            let mut payload = Vec::with_capacity(HandshakeHeader::LEN + chunk);
            header.serialize(&mut payload);
            payload.extend_from_slice(&body[offset..offset + chunk]);

            self.create_record(ContentType::Handshake, epoch, &payload)?;

            offset += chunk;
            if offset >= total {
                break;
            }
        }

        Ok(())
    }

    /// Emit ChangeCipherSpec in the clear under the old epoch, then roll
    /// the sender over: epoch + 1, sequence reset, pending cipher active.
    pub fn send_ccs(&mut self) -> Result<(), Error> {
        self.create_record(ContentType::ChangeCipherSpec, self.local_epoch, &[1])?;

        self.local_epoch += 1;
        self.tx_seq[1] = 0;
        self.crypto.activate_write()?;
        debug!(
            "{}: local cipher installed, sending at epoch {}",
            self.role(),
            self.local_epoch
        );

        self.flight.push(FlightItem::ChangeCipherSpec);
        Ok(())
    }

    /// Send an alert; protected whenever a write cipher is active.
    pub fn send_alert(&mut self, alert: Alert) -> Result<(), Error> {
        let mut body = Vec::with_capacity(2);
        alert.serialize(&mut body);
        self.create_record(ContentType::Alert, self.local_epoch, &body)
    }

    pub fn send_application_data(&mut self, data: &[u8]) -> Result<(), Error> {
        self.create_record(ContentType::ApplicationData, self.local_epoch, data)
    }

    // ------------------------------------------------------------------
    // Flights and timers

    /// Start a new flight: previous flight contents are forgotten and the
    /// retransmission backoff restarts.
    pub fn begin_flight(&mut self) {
        self.flight.clear();
        self.flight_backoff.reset();
        self.flight_timeout = None;
    }

    fn flight_resend(&mut self) -> Result<(), Error> {
        debug!("retransmitting flight of {} items", self.flight.len());

        let items = mem::take(&mut self.flight);
        // Items before the CCS marker belong to the cleartext epoch.
        let mut epoch = 0u16;

        for item in &items {
            match item {
                FlightItem::Message {
                    msg_type,
                    message_seq,
                    body,
                } => {
                    self.send_handshake_fragments(*msg_type, *message_seq, body, epoch)?;
                }
                FlightItem::ChangeCipherSpec => {
                    self.create_record(ContentType::ChangeCipherSpec, 0, &[1])?;
                    epoch = self.local_epoch;
                }
            }
        }

        self.flight = items;
        Ok(())
    }

    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        if !self.timers_active {
            return Ok(());
        }

        if self.handshake_deadline.is_none() {
            self.handshake_deadline = Some(now + self.config.handshake_timeout());
        }
        if self.flight_timeout.is_none() {
            self.flight_timeout = Some(now + self.flight_backoff.rto());
        }

        // Both are set above.
        let handshake_deadline = self.handshake_deadline.expect("set above");
        let flight_timeout = self.flight_timeout.expect("set above");

        if now >= handshake_deadline {
            return Err(Error::Timeout("handshake"));
        }

        if now >= flight_timeout {
            if self.flight.is_empty() {
                self.flight_timeout = Some(now + self.flight_backoff.rto());
            } else if self.flight_backoff.can_retry() {
                self.flight_backoff.attempt();
                self.flight_timeout = Some(now + self.flight_backoff.rto());
                self.flight_resend()?;
            } else {
                return Err(Error::Timeout("flight retries exhausted"));
            }
        }

        Ok(())
    }

    pub fn poll_output(&mut self, now: Instant) -> Output {
        // Prime the timers through handle_timeout first.
        if self.timers_active && self.flight_timeout.is_none() {
            return Output::Timeout(now);
        }

        if let Some(event) = self.queue_events.pop_front() {
            return event;
        }

        if let Some(packet) = self.queue_tx.pop_front() {
            return Output::Packet(packet);
        }

        Output::Timeout(self.next_timeout(now))
    }

    fn next_timeout(&self, now: Instant) -> Instant {
        if !self.timers_active {
            const DISTANT_FUTURE: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);
            return now + DISTANT_FUTURE;
        }

        match (self.flight_timeout, self.handshake_deadline) {
            (Some(flight), Some(handshake)) => flight.min(handshake),
            (Some(flight), None) => flight,
            (None, Some(handshake)) => handshake,
            (None, None) => now,
        }
    }

    /// Handshake done: no more flight retransmissions or deadlines.
    pub fn stop_flight_timers(&mut self) {
        self.timers_active = false;
        self.flight_timeout = None;
        self.handshake_deadline = None;
        self.flight.clear();
    }

    // ------------------------------------------------------------------
    // Transcript and events

    fn transcript_add(&mut self, msg_type: MessageType, message_seq: u16, body: &[u8]) {
        let header = HandshakeHeader::whole(msg_type, message_seq, body.len() as u32);
        header.serialize(&mut self.transcript);
        self.transcript.extend_from_slice(body);
    }

    /// Append a message whose transcript entry was deferred for
    /// verification (Finished, CertificateVerify).
    pub fn transcript_add_deferred(
        &mut self,
        msg_type: MessageType,
        message_seq: u16,
        body: &[u8],
    ) {
        self.transcript_add(msg_type, message_seq, body);
    }

    pub fn transcript(&self) -> &[u8] {
        &self.transcript
    }

    pub fn transcript_reset(&mut self) {
        self.transcript.clear();
    }

    /// Version-appropriate hash of the transcript so far.
    pub fn transcript_hash(&self) -> Vec<u8> {
        crate::crypto::prf::transcript_hash(self.crypto.version(), &self.transcript)
    }

    pub fn push_connected(&mut self) {
        self.queue_events.push_back(Output::Connected);
    }

    pub fn push_peer_cert(&mut self, cert_der: Vec<u8>) {
        self.queue_events.push_back(Output::PeerCert(cert_der));
    }
}
