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
use std::{error::Error, path::PathBuf, sync::Arc, thread};

use parking_lot::Mutex;
use tracing::{error, info, span, warn, Level, Span};

use crate::{
    audio::{RenderDispatcher, RenderStatus},
    config::HostConfig,
    engine::{self, EngineError, EngineSet, RomSet},
    midi::{self, midir::VirtualInputPort, EventSender, Intake, OutputPort},
    snapshot::{self, SnapshotError, StateContainer},
    timbre::{build_reply, ReplyMessage, TIMBRE_SLOTS},
};

/// Ties the engines, the MIDI ports, the render dispatcher and state persistence
/// together for the lifetime of one host instance.
pub struct Host {
    /// The dispatcher, shared with the audio callback.
    dispatcher: Arc<Mutex<RenderDispatcher>>,
    /// Producer side of the event queue.
    events: EventSender,
    /// The virtual input port, if one was created.
    input: Option<VirtualInputPort>,
    /// Writes timbre replies to the output port.
    reply_worker: Option<thread::JoinHandle<()>>,
    state_file: Option<PathBuf>,
    span: Span,
}

impl Host {
    /// Starts a host from the given configuration, creating the configured output port.
    pub fn start(config: &HostConfig) -> Result<Host, Box<dyn Error>> {
        let output = match midi::get_output_port(config.midi().output_port()) {
            Ok(output) => Some(output),
            Err(e) => {
                error!(
                    err = %e,
                    port = config.midi().output_port(),
                    "Unable to create MIDI output, timbre queries will not be answered."
                );
                None
            }
        };
        Host::with_output(config, output)
    }

    /// Starts a host that sends timbre replies through the given port.
    pub fn with_output(
        config: &HostConfig,
        output: Option<Box<dyn OutputPort>>,
    ) -> Result<Host, Box<dyn Error>> {
        let span = span!(Level::INFO, "host");
        let _enter = span.enter();

        let audio = config.audio();
        let midi_config = config.midi();
        let engines = open_engines(config);
        let (events, event_receiver) = midi::queue::channel(midi_config.queue_capacity());
        let (replies, reply_receiver) =
            crossbeam_channel::bounded::<ReplyMessage>(midi_config.queue_capacity());

        let dispatcher = RenderDispatcher::new(
            engines,
            config.buses(),
            audio.target_format()?,
            audio.buffer_size(),
        )?
        .with_events(event_receiver)
        .with_replies(replies);

        let reply_worker = match output {
            Some(output) => Some(midi::spawn_reply_worker(reply_receiver, output)?),
            None => None,
        };

        let input_name = midi_config.input_port();
        let input = if input_name.starts_with("mock") {
            None
        } else {
            match midi::midir::create_virtual_input(input_name, events.clone()) {
                Ok(input) => Some(input),
                Err(e) => {
                    error!(err = %e, port = input_name, "Unable to create MIDI input.");
                    None
                }
            }
        };

        let host = Host {
            dispatcher: Arc::new(Mutex::new(dispatcher)),
            events,
            input,
            reply_worker,
            state_file: config.state_file(),
            span: span.clone(),
        };
        host.restore_saved_state();

        info!(
            engines = host.dispatcher.lock().engine_count(),
            buses = config.buses(),
            "Host started."
        );
        Ok(host)
    }

    /// The dispatcher shared with the audio callback.
    pub fn dispatcher(&self) -> Arc<Mutex<RenderDispatcher>> {
        self.dispatcher.clone()
    }

    /// A new intake feeding this host's event queue. Used by transports other
    /// than the virtual input port.
    pub fn intake(&self) -> Intake {
        Intake::new(self.events.clone())
    }

    /// Renders `frames` frames into every bus. The audio callback does this itself
    /// through [`Host::dispatcher`]; this is for hosts that drive rendering directly.
    pub fn render(&self, frames: usize) -> RenderStatus {
        self.dispatcher.lock().render(frames)
    }

    /// Exports the timbre state of the primary engine. Returns `None` with no engine.
    pub fn export_state(&self) -> Option<StateContainer> {
        let dispatcher = self.dispatcher.lock();
        dispatcher.primary_engine().map(snapshot::export)
    }

    /// Restores timbre state onto every engine. Returns the number of slots restored.
    pub fn import_state(&self, container: &StateContainer) -> usize {
        let mut dispatcher = self.dispatcher.lock();
        snapshot::import(container, |sysex| dispatcher.broadcast_sysex(sysex))
    }

    /// Builds the reply for every timbre slot from the primary engine.
    pub fn dump(&self) -> Vec<ReplyMessage> {
        let dispatcher = self.dispatcher.lock();
        match dispatcher.primary_engine() {
            Some(engine) => TIMBRE_SLOTS
                .iter()
                .map(|slot| build_reply(engine, slot.address))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Saves the timbre state to the configured state file. Returns false if there is
    /// no state file or no engine to export from.
    pub fn save_state(&self) -> Result<bool, SnapshotError> {
        let _enter = self.span.enter();

        let Some(path) = self.state_file.as_ref() else {
            return Ok(false);
        };
        let Some(container) = self.export_state() else {
            warn!("No engine running, not saving state.");
            return Ok(false);
        };

        container.save(path)?;
        info!(path = %path.display(), "Saved timbre state.");
        Ok(true)
    }

    fn restore_saved_state(&self) {
        let Some(path) = self.state_file.as_ref() else {
            return;
        };
        if !path.exists() {
            info!(path = %path.display(), "No saved state to restore.");
            return;
        }

        match StateContainer::load(path) {
            Ok(container) => {
                let restored = self.import_state(&container);
                info!(path = %path.display(), restored, "Restored timbre state.");
            }
            Err(e) => warn!(err = %e, "Unable to restore timbre state."),
        }
    }

    /// Closes the MIDI ports and waits for outstanding replies to be sent.
    pub fn shutdown(&mut self) {
        let _enter = self.span.enter();
        if self.input.is_none() && self.reply_worker.is_none() {
            return;
        }

        if let Some(mut input) = self.input.take() {
            input.close();
        }
        self.dispatcher.lock().detach_replies();
        if let Some(worker) = self.reply_worker.take() {
            if worker.join().is_err() {
                error!("Reply worker panicked.");
            }
        }
        info!("Host stopped.");
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Loads the ROMs and opens the configured engines. Missing ROMs or a bad backend
/// leave the host running without engines.
pub fn open_engines(config: &HostConfig) -> EngineSet {
    let span = span!(Level::INFO, "engines");
    let _enter = span.enter();

    let result = engine::get_factory(config.engine()).and_then(|factory| {
        let roms = RomSet::load(
            &config.rom_directory(),
            config.control_rom(),
            config.pcm_rom(),
        )
        .map_err(EngineError::from)?;
        EngineSet::open(
            factory.as_ref(),
            roms,
            config.engines(),
            &config.engine_settings(),
        )
    });

    match result {
        Ok(engines) => engines,
        Err(e) => {
            error!(err = %e, "Unable to open engines, running without them.");
            EngineSet::empty()
        }
    }
}
