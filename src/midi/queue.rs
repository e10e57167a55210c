// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::warn;

use super::reassembler::{MessageSink, SYSEX_CAPACITY};
use crate::timbre::TimbreAddress;

/// A complete sysex message stored inline, so queueing it never allocates.
#[derive(Clone)]
pub struct SysexMessage {
    len: usize,
    bytes: [u8; SYSEX_CAPACITY],
}

impl SysexMessage {
    /// Copies a message. Returns None if it exceeds [`SYSEX_CAPACITY`].
    pub fn new(message: &[u8]) -> Option<SysexMessage> {
        if message.len() > SYSEX_CAPACITY {
            return None;
        }

        let mut bytes = [0u8; SYSEX_CAPACITY];
        bytes[..message.len()].copy_from_slice(message);
        Some(SysexMessage {
            len: message.len(),
            bytes,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl fmt::Debug for SysexMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SysexMessage({} bytes)", self.len)
    }
}

/// MIDI input bound for the engines.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Short(u32),
    Sysex(SysexMessage),
    TimbreQuery(TimbreAddress),
}

/// Creates a bounded event queue.
pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (sender, receiver) = crossbeam_channel::bounded(capacity);
    let dropped = Arc::new(AtomicUsize::new(0));
    (
        EventSender {
            sender,
            dropped: dropped.clone(),
        },
        EventReceiver { receiver, dropped },
    )
}

/// The MIDI side of the event queue. Never blocks.
#[derive(Clone)]
pub struct EventSender {
    sender: Sender<EngineEvent>,
    dropped: Arc<AtomicUsize>,
}

impl EventSender {
    /// Queues an event, dropping it if the queue is full or closed.
    pub fn send(&self, event: EngineEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(event = ?event, "Event queue full, dropping MIDI event.");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl MessageSink for EventSender {
    fn short_message(&mut self, message: u32) {
        self.send(EngineEvent::Short(message));
    }

    fn sysex(&mut self, message: &[u8]) {
        // The reassembler never produces messages larger than the inline buffer.
        if let Some(message) = SysexMessage::new(message) {
            self.send(EngineEvent::Sysex(message));
        }
    }

    fn timbre_query(&mut self, address: TimbreAddress) {
        self.send(EngineEvent::TimbreQuery(address));
    }
}

/// The render side of the event queue.
pub struct EventReceiver {
    receiver: Receiver<EngineEvent>,
    dropped: Arc<AtomicUsize>,
}

impl EventReceiver {
    /// Takes the next queued event without blocking.
    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.receiver.try_recv().ok()
    }

    /// Number of events dropped because the queue was full.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::reassembler::{Packet, Reassembler};

    #[test]
    fn test_sysex_message_capacity() {
        assert_eq!(
            SysexMessage::new(&[0xF0, 0xF7]).unwrap().as_bytes(),
            &[0xF0, 0xF7]
        );
        assert!(SysexMessage::new(&vec![0u8; SYSEX_CAPACITY]).is_some());
        assert!(SysexMessage::new(&vec![0u8; SYSEX_CAPACITY + 1]).is_none());
    }

    #[test]
    fn test_reassembler_into_queue() {
        let (mut sender, receiver) = channel(8);
        let mut reassembler = Reassembler::new();
        let query = [0xF0, 0x41, 0x10, 0x16, 0x11, 0x04, 0x03, 0x6C, 0xF7];
        reassembler.intake(
            &[
                Packet::new(0, &[0x92, 0x30, 0x40]),
                Packet::new(10, &query[..6]),
                Packet::new(20, &query[6..]),
            ],
            &mut sender,
        );

        assert!(matches!(receiver.try_recv(), Some(EngineEvent::Short(0x00_40_30_92))));
        match receiver.try_recv() {
            Some(EngineEvent::Sysex(message)) => assert_eq!(message.as_bytes(), &query),
            other => panic!("expected sysex, got {:?}", other),
        }
        assert!(matches!(
            receiver.try_recv(),
            Some(EngineEvent::TimbreQuery(address)) if address == TimbreAddress::new(0x03, 0x6C)
        ));
        assert!(receiver.try_recv().is_none());
        assert!(receiver.is_empty());
    }

    #[test]
    fn test_full_queue_drops() {
        let (sender, receiver) = channel(2);
        for message in 0..5 {
            sender.send(EngineEvent::Short(message));
        }
        assert_eq!(receiver.len(), 2);
        assert_eq!(receiver.dropped(), 3);
        assert!(matches!(receiver.try_recv(), Some(EngineEvent::Short(0))));
        assert!(matches!(receiver.try_recv(), Some(EngineEvent::Short(1))));
    }
}
