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
use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use tracing::debug;

use super::MidiError;

/// A mock output port. Records every message sent through it.
#[derive(Clone)]
pub struct OutputPort {
    name: String,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl OutputPort {
    /// Gets the given mock port.
    pub fn get(name: &str) -> OutputPort {
        OutputPort {
            name: name.to_string(),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every message sent so far, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    /// The last message sent.
    pub fn last_sent(&self) -> Option<Vec<u8>> {
        self.sent.lock().last().cloned()
    }
}

impl super::OutputPort for OutputPort {
    fn send(&mut self, message: &[u8]) -> Result<(), MidiError> {
        debug!(port = self.name, len = message.len(), "Sending message (mock).");
        self.sent.lock().push(message.to_vec());
        Ok(())
    }
}

impl fmt::Display for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::OutputPort as _;

    #[test]
    fn test_records_messages() {
        let mut port = OutputPort::get("mock");
        let observer = port.clone();
        assert!(observer.last_sent().is_none());

        port.send(&[0x90, 0x3C, 0x64]).unwrap();
        port.send(&[0xF0, 0xF7]).unwrap();

        assert_eq!(observer.sent().len(), 2);
        assert_eq!(observer.last_sent(), Some(vec![0xF0, 0xF7]));
    }
}
