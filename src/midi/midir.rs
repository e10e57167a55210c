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
use std::{collections::BTreeMap, error::Error, fmt};

use midir::{MidiInput, MidiOutput};
#[cfg(unix)]
use midir::{
    os::unix::{VirtualInput, VirtualOutput},
    Ignore, MidiInputConnection, MidiOutputConnection,
};
use tracing::{info, span, Level};

use super::MidiError;
#[cfg(unix)]
use super::{EventSender, Intake};

/// A virtual output port other applications can connect to.
pub struct VirtualOutputPort {
    name: String,
    #[cfg(unix)]
    connection: MidiOutputConnection,
}

impl super::OutputPort for VirtualOutputPort {
    #[cfg(unix)]
    fn send(&mut self, message: &[u8]) -> Result<(), MidiError> {
        self.connection
            .send(message)
            .map_err(|e| MidiError::Port(e.to_string()))
    }

    #[cfg(not(unix))]
    fn send(&mut self, _message: &[u8]) -> Result<(), MidiError> {
        Err(MidiError::Closed)
    }
}

impl fmt::Display for VirtualOutputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Virtual Output)", self.name)
    }
}

/// A virtual input port. Packets received on it are reassembled and queued for the engines
/// until the port is closed or dropped.
pub struct VirtualInputPort {
    name: String,
    #[cfg(unix)]
    connection: Option<MidiInputConnection<Intake>>,
}

impl VirtualInputPort {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Closes the port.
    pub fn close(&mut self) {
        #[cfg(unix)]
        if let Some(connection) = self.connection.take() {
            let _ = connection.close();
            info!(port = self.name, "Closed virtual MIDI input.");
        }
    }
}

impl Drop for VirtualInputPort {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Display for VirtualInputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Virtual Input)", self.name)
    }
}

/// Creates a virtual output port with the given name.
#[cfg(unix)]
pub fn create_virtual_output(name: &str) -> Result<VirtualOutputPort, MidiError> {
    let span = span!(Level::INFO, "create virtual output (midir)");
    let _enter = span.enter();

    let output = MidiOutput::new("mt32host output").map_err(|e| MidiError::Port(e.to_string()))?;
    let connection = output
        .create_virtual(name)
        .map_err(|e| MidiError::Port(e.to_string()))?;

    info!(port = name, "Created virtual MIDI output.");
    Ok(VirtualOutputPort {
        name: name.to_string(),
        connection,
    })
}

#[cfg(not(unix))]
pub fn create_virtual_output(name: &str) -> Result<VirtualOutputPort, MidiError> {
    Err(MidiError::Port(format!(
        "virtual port {} is not supported on this platform",
        name
    )))
}

/// Creates a virtual input port with the given name. Incoming packets go through a fresh
/// reassembler into the given event queue.
#[cfg(unix)]
pub fn create_virtual_input(name: &str, sink: EventSender) -> Result<VirtualInputPort, MidiError> {
    let span = span!(Level::INFO, "create virtual input (midir)");
    let _enter = span.enter();

    let mut input = MidiInput::new("mt32host input").map_err(|e| MidiError::Port(e.to_string()))?;
    // Sysex is filtered out by default.
    input.ignore(Ignore::None);

    let connection = input
        .create_virtual(
            name,
            |timestamp, data, intake: &mut Intake| intake.receive(timestamp, data),
            Intake::new(sink),
        )
        .map_err(|e| MidiError::Port(e.to_string()))?;

    info!(port = name, "Created virtual MIDI input.");
    Ok(VirtualInputPort {
        name: name.to_string(),
        connection: Some(connection),
    })
}

#[cfg(not(unix))]
pub fn create_virtual_input(
    name: &str,
    _sink: super::EventSender,
) -> Result<VirtualInputPort, MidiError> {
    Err(MidiError::Port(format!(
        "virtual port {} is not supported on this platform",
        name
    )))
}

/// A MIDI port visible to midir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub input: bool,
    pub output: bool,
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut capabilities: Vec<&str> = Vec::new();
        if self.input {
            capabilities.push("Input");
        }
        if self.output {
            capabilities.push("Output");
        }

        write!(f, "{} ({})", self.name, capabilities.join("/"))
    }
}

/// Lists midir ports, merging inputs and outputs that share a name.
pub fn list() -> Result<Vec<PortInfo>, Box<dyn Error>> {
    let input = MidiInput::new("mt32host input listing")?;
    let output = MidiOutput::new("mt32host output listing")?;

    let mut ports: BTreeMap<String, PortInfo> = BTreeMap::new();
    for port in input.ports() {
        let name = input.port_name(&port)?;
        ports
            .entry(name.clone())
            .or_insert_with(|| PortInfo {
                name,
                input: false,
                output: false,
            })
            .input = true;
    }
    for port in output.ports() {
        let name = output.port_name(&port)?;
        ports
            .entry(name.clone())
            .or_insert_with(|| PortInfo {
                name,
                input: false,
                output: false,
            })
            .output = true;
    }

    Ok(ports.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_info_display() {
        let port = PortInfo {
            name: "MT32_output".to_string(),
            input: true,
            output: true,
        };
        assert_eq!(port.to_string(), "MT32_output (Input/Output)");

        let port = PortInfo {
            name: "Keyboard".to_string(),
            input: true,
            output: false,
        };
        assert_eq!(port.to_string(), "Keyboard (Input)");
    }
}
