//! The wire packet and the queue the transport drops it into.
//!
//! The transport's receive path may run on any thread. It pushes packets into
//! a [`RemoteInbox`]; the tick drains the inbox at its start, so all ledger
//! mutation stays on the tick thread.

use std::collections::VecDeque;
use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::codec::{decode_exact, encode, CodecOperation};
use crate::error::SyncError;
use crate::sync::{lock, Arc, Mutex};
use crate::Frame;

/// One remote input, as sent by the other peer.
///
/// `frame_advantage` is the sender's own `local_frame - remote_frame` at the
/// time it sent the packet.
///
/// ```
/// use rollback_sync::{Frame, RemoteInputPacket};
///
/// let packet = RemoteInputPacket { frame: Frame::new(12), input: 0b1010u8, frame_advantage: 2 };
/// let bytes = packet.encode().unwrap();
/// assert_eq!(RemoteInputPacket::<u8>::decode(&bytes).unwrap(), packet);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteInputPacket<I> {
    /// Frame the input belongs to.
    pub frame: Frame,
    /// The input itself.
    pub input: I,
    /// Sender's local frame advantage.
    pub frame_advantage: i32,
}

impl<I: Serialize> RemoteInputPacket<I> {
    /// Encodes the packet for the wire.
    ///
    /// # Errors
    ///
    /// [`SyncError::Serialization`] if the input cannot be encoded.
    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        encode(self).map_err(|e| e.during(CodecOperation::EncodePacket).into())
    }
}

impl<I: DeserializeOwned> RemoteInputPacket<I> {
    /// Decodes a packet; the bytes must contain exactly one packet.
    ///
    /// # Errors
    ///
    /// [`SyncError::Serialization`] for truncated, malformed or padded input.
    pub fn decode(bytes: &[u8]) -> Result<Self, SyncError> {
        decode_exact(bytes).map_err(|e| e.during(CodecOperation::DecodePacket).into())
    }
}

/// Thread-safe queue of received packets. Clones share the same queue.
///
/// ```
/// use rollback_sync::{Frame, RemoteInbox, RemoteInputPacket};
///
/// let inbox = RemoteInbox::new();
/// let receiver = inbox.clone();
/// std::thread::spawn(move || {
///     receiver.push(RemoteInputPacket { frame: Frame::new(0), input: 1u8, frame_advantage: 0 });
/// })
/// .join()
/// .unwrap();
/// assert_eq!(inbox.drain().len(), 1);
/// assert!(inbox.is_empty());
/// ```
pub struct RemoteInbox<I> {
    queue: Arc<Mutex<VecDeque<RemoteInputPacket<I>>>>,
}

impl<I> RemoteInbox<I> {
    /// Creates an empty inbox.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Enqueues a packet.
    pub fn push(&self, packet: RemoteInputPacket<I>) {
        lock(&self.queue).push_back(packet);
    }

    /// Removes and returns every queued packet in arrival order.
    #[must_use]
    pub fn drain(&self) -> Vec<RemoteInputPacket<I>> {
        lock(&self.queue).drain(..).collect()
    }

    /// Number of queued packets.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    /// `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.queue).is_empty()
    }
}

impl<I: DeserializeOwned> RemoteInbox<I> {
    /// Decodes a datagram and enqueues it.
    ///
    /// # Errors
    ///
    /// As [`RemoteInputPacket::decode`]; nothing is enqueued on error.
    pub fn push_bytes(&self, bytes: &[u8]) -> Result<(), SyncError> {
        self.push(RemoteInputPacket::decode(bytes)?);
        Ok(())
    }
}

impl<I> Clone for RemoteInbox<I> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
        }
    }
}

impl<I> Default for RemoteInbox<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I> fmt::Debug for RemoteInbox<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteInbox")
            .field("queued", &self.len())
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn packet(frame: i32, input: u16) -> RemoteInputPacket<u16> {
        RemoteInputPacket {
            frame: Frame::new(frame),
            input,
            frame_advantage: 1,
        }
    }

    #[test]
    fn drain_preserves_arrival_order() {
        let inbox = RemoteInbox::new();
        inbox.push(packet(2, 20));
        inbox.push(packet(0, 0));
        inbox.push(packet(1, 10));
        let frames: Vec<i32> = inbox.drain().iter().map(|p| p.frame.as_i32()).collect();
        assert_eq!(frames, vec![2, 0, 1]);
        assert!(inbox.drain().is_empty());
    }

    #[test]
    fn clones_share_queue() {
        let inbox = RemoteInbox::new();
        let transport_side = inbox.clone();
        transport_side.push(packet(0, 1));
        assert_eq!(inbox.len(), 1);
    }

    #[test]
    fn packet_wire_size_is_fixed_for_fixed_inputs() {
        // frame (4) + input (2) + advantage (4)
        assert_eq!(packet(0, 0).encode().unwrap().len(), 10);
        assert_eq!(packet(i32::MAX, u16::MAX).encode().unwrap().len(), 10);
    }

    #[test]
    fn truncated_packet_is_rejected() {
        let bytes = packet(3, 7).encode().unwrap();
        let err = RemoteInputPacket::<u16>::decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, SyncError::Serialization { .. }));
        assert!(err.to_string().contains("remote input packet"));
    }

    #[test]
    fn padded_packet_is_rejected() {
        let mut bytes = packet(3, 7).encode().unwrap();
        bytes.push(0);
        assert!(RemoteInputPacket::<u16>::decode(&bytes).is_err());
    }

    #[test]
    fn push_bytes_enqueues_only_valid_packets() {
        let inbox: RemoteInbox<u16> = RemoteInbox::new();
        inbox.push_bytes(&packet(4, 9).encode().unwrap()).unwrap();
        assert!(inbox.push_bytes(&[1, 2]).is_err());
        assert_eq!(inbox.drain(), vec![packet(4, 9)]);
    }
}
