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
use serde::Deserialize;

const DEFAULT_INPUT_PORT: &str = "MT32_input";
const DEFAULT_OUTPUT_PORT: &str = "MT32_output";
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A YAML representation of the MIDI configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Midi {
    /// Name of the virtual input port.
    input_port: Option<String>,

    /// Name of the virtual output port timbre replies are sent from.
    output_port: Option<String>,

    /// Capacity of the event and reply queues.
    queue_capacity: Option<usize>,
}

impl Midi {
    /// New will create a new MIDI configuration.
    pub fn new(input_port: &str, output_port: &str) -> Midi {
        Midi {
            input_port: Some(input_port.to_string()),
            output_port: Some(output_port.to_string()),
            queue_capacity: None,
        }
    }

    pub fn input_port(&self) -> &str {
        self.input_port.as_deref().unwrap_or(DEFAULT_INPUT_PORT)
    }

    pub fn output_port(&self) -> &str {
        self.output_port.as_deref().unwrap_or(DEFAULT_OUTPUT_PORT)
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY).max(1)
    }
}
