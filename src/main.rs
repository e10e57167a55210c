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
use std::error::Error;
use std::path::PathBuf;

use clap::{crate_version, Parser, Subcommand};
use mt32host::audio::{self, cpal::OutputStream};
use mt32host::config::HostConfig;
use mt32host::host::{self, Host};
use mt32host::midi;
use mt32host::snapshot::{self, SlotStatus, StateContainer};
use mt32host::timbre::{build_reply, TIMBRE_SLOTS};
use mt32host::util::hex_string;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A host for MT-32 sound module emulators."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start will run the host until interrupted.
    Start {
        /// The path to the host config.
        config_path: String,
    },
    /// Lists the available audio output devices.
    Devices {},
    /// Lists the available MIDI input/output devices.
    MidiDevices {},
    /// Prints the five part timbre dumps as hex.
    Dump {
        /// The path to the host config.
        config_path: String,
        /// A state file to restore before dumping.
        #[arg[short, long]]
        state: Option<String>,
    },
    /// Reports the status of every timbre slot in a state file.
    VerifyState {
        /// The path to the state file.
        state_path: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config_path } => {
            let config = HostConfig::deserialize(&PathBuf::from(&config_path))?;
            let mut host = Host::start(&config)?;
            let mut stream = OutputStream::start(&config.audio(), host.dispatcher())?;

            tokio::signal::ctrl_c().await?;
            info!("Interrupted, shutting down.");

            stream.stop();
            if let Err(e) = host.save_state() {
                error!(err = %e, "Unable to save timbre state.");
            }
            host.shutdown();
        }
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::MidiDevices {} => {
            let ports = midi::list_ports()?;

            if ports.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for port in ports {
                println!("- {}", port);
            }
        }
        Commands::Dump { config_path, state } => {
            let config = HostConfig::deserialize(&PathBuf::from(&config_path))?;
            let mut engines = host::open_engines(&config);
            if let Some(state) = state {
                let container = StateContainer::load(&PathBuf::from(state))?;
                snapshot::import(&container, |sysex| engines.broadcast_sysex(sysex));
            }

            let Some(engine) = engines.primary() else {
                return Err("no engine available to dump from".into());
            };
            for slot in TIMBRE_SLOTS.iter() {
                let reply = build_reply(engine, slot.address);
                println!("{} ({}):", slot.key, slot.address);
                println!("{}", hex_string(reply.as_bytes()));
            }
        }
        Commands::VerifyState { state_path } => {
            let container = StateContainer::load(&PathBuf::from(&state_path))?;

            let mut valid = true;
            println!("Slots in {}:", state_path);
            for (key, status) in snapshot::verify(&container) {
                match status {
                    SlotStatus::Missing => {
                        valid = false;
                        println!("- {}: missing", key);
                    }
                    SlotStatus::WrongLength(len) => {
                        valid = false;
                        println!("- {}: wrong length ({} bytes)", key, len);
                    }
                    SlotStatus::Present { checksum_ok } => {
                        valid &= checksum_ok;
                        println!(
                            "- {}: present, checksum {}",
                            key,
                            if checksum_ok { "ok" } else { "bad" }
                        );
                    }
                }
            }

            if !valid {
                return Err(format!("state file {} has invalid slots", state_path).into());
            }
        }
    }

    Ok(())
}
