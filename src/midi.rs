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
use std::{error::Error, fmt, thread};

use crossbeam_channel::Receiver;
use tracing::{error, info, span, Level};

use crate::timbre::ReplyMessage;

pub mod midir;
pub mod mock;
pub mod queue;
pub mod reassembler;

pub use queue::{EngineEvent, EventReceiver, EventSender, SysexMessage};
pub use reassembler::{MessageSink, Packet, Phase, Reassembler, SYSEX_CAPACITY};

#[derive(Debug, thiserror::Error)]
pub enum MidiError {
    #[error("sysex of {attempted} bytes exceeds the {capacity} byte buffer")]
    Overflow { attempted: usize, capacity: usize },

    #[error("MIDI port error: {0}")]
    Port(String),

    #[error("MIDI port is closed")]
    Closed,
}

/// A MIDI output that complete messages can be sent through.
pub trait OutputPort: fmt::Display + Send {
    /// Sends a single complete message.
    fn send(&mut self, message: &[u8]) -> Result<(), MidiError>;
}

/// The input side of a MIDI connection: reassembles packets and queues the
/// results for the engines.
pub struct Intake {
    reassembler: Reassembler,
    sink: EventSender,
}

impl Intake {
    pub fn new(sink: EventSender) -> Intake {
        Intake {
            reassembler: Reassembler::new(),
            sink,
        }
    }

    /// Handles one packet from the transport.
    pub fn receive(&mut self, timestamp: u64, data: &[u8]) {
        let Intake { reassembler, sink } = self;
        reassembler.intake(&[Packet::new(timestamp, data)], sink);
    }

    /// Handles a batch of packets.
    pub fn receive_all(&mut self, packets: &[Packet<'_>]) {
        let Intake { reassembler, sink } = self;
        reassembler.intake(packets, sink);
    }

    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }
}

/// Lists MIDI ports known to midir.
pub fn list_ports() -> Result<Vec<midir::PortInfo>, Box<dyn Error>> {
    midir::list()
}

/// Gets an output port with the given name. Names starting with "mock" return a mock port,
/// everything else creates a virtual port.
pub fn get_output_port(name: &str) -> Result<Box<dyn OutputPort>, MidiError> {
    if name.starts_with("mock") {
        return Ok(Box::new(mock::OutputPort::get(name)));
    }

    Ok(Box::new(midir::create_virtual_output(name)?))
}

/// Spawns the thread that writes timbre replies to the output port. The thread
/// exits once every reply sender has been dropped.
pub fn spawn_reply_worker(
    replies: Receiver<ReplyMessage>,
    mut port: Box<dyn OutputPort>,
) -> Result<thread::JoinHandle<()>, std::io::Error> {
    thread::Builder::new()
        .name("mt32host-replies".to_string())
        .spawn(move || {
            let span = span!(Level::INFO, "reply worker");
            let _enter = span.enter();

            info!(port = %port, "Sending timbre replies.");
            for reply in replies.iter() {
                if let Err(e) = port.send(reply.as_bytes()) {
                    error!(
                        err = %e,
                        address = %reply.address(),
                        "Unable to send timbre reply."
                    );
                }
            }
            info!("Reply worker stopped.");
        })
}
