//! An in-memory datagram link with scripted loss, duplication and delay,
//! plus a peer harness that talks through it.

#![allow(
    dead_code,
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use rollback_sync::{Frame, RemoteInputPacket, Synchronizer, TickReport};

use super::stubs::{Side, StubConfig, StubInput};

/// What happens to one datagram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkFault {
    pub drop: bool,
    pub duplicate: bool,
    /// Ticks before delivery. Different delays reorder datagrams.
    pub delay: u8,
}

#[derive(Debug)]
struct InFlight {
    arrival: u64,
    seq: u64,
    bytes: Vec<u8>,
}

/// One direction of a link. Faults are applied to datagrams in send order,
/// cycling through the script.
#[derive(Debug)]
pub struct LossyChannel {
    script: Vec<LinkFault>,
    cursor: usize,
    now: u64,
    seq: u64,
    in_flight: Vec<InFlight>,
    pub sent: u64,
    pub dropped: u64,
}

impl LossyChannel {
    #[must_use]
    pub fn new(script: Vec<LinkFault>) -> Self {
        assert!(!script.is_empty());
        Self {
            script,
            cursor: 0,
            now: 0,
            seq: 0,
            in_flight: Vec::new(),
            sent: 0,
            dropped: 0,
        }
    }

    #[must_use]
    pub fn perfect() -> Self {
        Self::new(vec![LinkFault::default()])
    }

    /// Stops injecting faults; datagrams already in flight still arrive.
    pub fn heal(&mut self) {
        self.script = vec![LinkFault::default()];
        self.cursor = 0;
    }

    pub fn send(&mut self, bytes: Vec<u8>) {
        let fault = self.script[self.cursor % self.script.len()];
        self.cursor += 1;
        self.sent += 1;
        if fault.drop {
            self.dropped += 1;
            return;
        }
        let arrival = self.now + u64::from(fault.delay);
        if fault.duplicate {
            self.enqueue(arrival + 1, bytes.clone());
        }
        self.enqueue(arrival, bytes);
    }

    fn enqueue(&mut self, arrival: u64, bytes: Vec<u8>) {
        self.seq += 1;
        self.in_flight.push(InFlight {
            arrival,
            seq: self.seq,
            bytes,
        });
    }

    /// Advances the link clock and returns what arrives by then.
    pub fn deliver(&mut self) -> Vec<Vec<u8>> {
        self.now += 1;
        let now = self.now;
        let (mut due, later): (Vec<_>, Vec<_>) =
            self.in_flight.drain(..).partition(|d| d.arrival <= now);
        self.in_flight = later;
        due.sort_by_key(|d| (d.arrival, d.seq));
        due.into_iter().map(|d| d.bytes).collect()
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Cap on how many inputs one tick resends.
pub const MAX_RESEND: i32 = 256;

/// One machine: a synchronizer plus its side of the transport.
pub struct Peer {
    pub side: Side,
    pub sync: Synchronizer<StubConfig>,
    /// Highest local frame whose input has been recorded.
    pub newest_local: Frame,
}

impl Peer {
    #[must_use]
    pub fn new(side: Side, sync: Synchronizer<StubConfig>) -> Self {
        Self {
            side,
            sync,
            newest_local: Frame::NULL,
        }
    }

    /// Ticks with the scripted input for the current frame.
    pub fn tick(&mut self) -> TickReport<StubInput> {
        self.tick_with(StubInput::scripted(self.side, self.sync.local_frame()))
    }

    pub fn tick_with(&mut self, input: StubInput) -> TickReport<StubInput> {
        let report = self.sync.tick(input).unwrap();
        self.newest_local = self.newest_local.max(report.outbound.frame);
        report
    }

    /// Highest frame of ours the other side has confirmed without gaps;
    /// what an acknowledgement channel would report.
    #[must_use]
    pub fn contiguous_confirmed(&self) -> Frame {
        let remote = self.sync.remote_frame();
        self.sync
            .ledger()
            .first_unconfirmed(self.sync.current_sync_frame(), remote)
            .unwrap_or(remote)
    }

    /// Sends every recorded input the other side has not acknowledged.
    pub fn send_unacked(&self, acked: Frame, link: &mut LossyChannel) {
        let first = acked.next().max(self.newest_local - MAX_RESEND).max(Frame::new(0));
        let mut frame = first;
        while frame <= self.newest_local {
            let packet = self.sync.outbound_packet(frame).unwrap();
            link.send(packet.encode().unwrap());
            frame = frame.next();
        }
    }

    /// Hands every arrived datagram to the synchronizer's inbox.
    pub fn receive(&self, link: &mut LossyChannel) {
        let inbox = self.sync.inbox();
        for bytes in link.deliver() {
            inbox.push_bytes(&bytes).unwrap();
        }
    }

    #[must_use]
    pub fn last_packet(&self) -> RemoteInputPacket<StubInput> {
        self.sync.outbound_packet(self.newest_local).unwrap()
    }
}

/// Runs both peers for `ticks` ticks, exchanging inputs each tick.
pub fn run_pair(
    a: &mut Peer,
    b: &mut Peer,
    a_to_b: &mut LossyChannel,
    b_to_a: &mut LossyChannel,
    ticks: usize,
) {
    for _ in 0..ticks {
        a.tick();
        b.tick();
        a.send_unacked(b.contiguous_confirmed(), a_to_b);
        b.send_unacked(a.contiguous_confirmed(), b_to_a);
        b.receive(a_to_b);
        a.receive(b_to_a);
    }
}

/// Highest frame both peers have simulated with confirmed inputs.
#[must_use]
pub fn common_settled_frame(a: &Peer, b: &Peer) -> Frame {
    a.sync
        .current_sync_frame()
        .min(b.sync.current_sync_frame())
        .min(a.sync.local_frame().prev())
        .min(b.sync.local_frame().prev())
}
