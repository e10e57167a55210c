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

//! Persisted host state: the five part timbres, stored as the DT1 messages
//! that recreate them.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, span, Level};

use crate::engine::Engine;
use crate::timbre::{build_reply, TimbreAddress, REPLY_LEN, TIMBRE_SLOTS};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("unable to access state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed state file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A string-keyed map of binary blobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateContainer {
    entries: BTreeMap<String, Vec<u8>>,
}

impl StateContainer {
    pub fn new() -> StateContainer {
        StateContainer::default()
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn insert(&mut self, key: &str, value: Vec<u8>) {
        self.entries.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<u8>> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Reads a container from a JSON file.
    pub fn load(path: &Path) -> Result<StateContainer, SnapshotError> {
        let contents = fs::read(path).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&contents).map_err(|source| SnapshotError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes the container to a JSON file, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let io_error = |source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let contents = serde_json::to_vec_pretty(self).map_err(|source| SnapshotError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, contents).map_err(io_error)
    }
}

/// Exports every timbre slot from the engine.
pub fn export(engine: &dyn Engine) -> StateContainer {
    let span = span!(Level::INFO, "export state");
    let _enter = span.enter();

    let mut container = StateContainer::new();
    for slot in TIMBRE_SLOTS.iter() {
        let reply = build_reply(engine, slot.address);
        container.insert(slot.key, reply.as_bytes().to_vec());
    }

    info!(slots = container.len(), "Exported timbre state.");
    container
}

/// Feeds every well-formed slot blob to `play_sysex` and returns how many were restored.
/// Missing keys and blobs of the wrong length are skipped.
pub fn import(container: &StateContainer, mut play_sysex: impl FnMut(&[u8])) -> usize {
    let span = span!(Level::INFO, "import state");
    let _enter = span.enter();

    let mut restored = 0;
    for slot in TIMBRE_SLOTS.iter() {
        match container.get(slot.key) {
            Some(blob) if blob.len() == REPLY_LEN => {
                play_sysex(blob);
                restored += 1;
            }
            Some(blob) => {
                debug!(key = slot.key, len = blob.len(), "Skipping malformed timbre blob.");
            }
            None => {}
        }
    }

    info!(restored, "Imported timbre state.");
    restored
}

/// The state of one slot in a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotStatus {
    Missing,
    WrongLength(usize),
    /// A reply-sized blob. `checksum_ok` is false if the checksum doesn't match the
    /// Roland rule or the blob isn't a DT1 for this slot's address.
    Present { checksum_ok: bool },
}

/// Reports the status of every slot in the container.
pub fn verify(container: &StateContainer) -> Vec<(&'static str, SlotStatus)> {
    TIMBRE_SLOTS
        .iter()
        .map(|slot| {
            let status = match container.get(slot.key) {
                None => SlotStatus::Missing,
                Some(blob) if blob.len() != REPLY_LEN => SlotStatus::WrongLength(blob.len()),
                Some(blob) => SlotStatus::Present {
                    checksum_ok: blob_is_valid(blob, slot.address),
                },
            };
            (slot.key, status)
        })
        .collect()
}

fn blob_is_valid(blob: &[u8], address: TimbreAddress) -> bool {
    let header_ok = blob[..8] == [0xF0, 0x41, 0x10, 0x16, 0x12, 0x04, address.high, address.low]
        && blob[REPLY_LEN - 1] == 0xF7;
    let checksum = blob[5..REPLY_LEN - 2]
        .iter()
        .fold(0u8, |sum, byte| sum.wrapping_sub(*byte))
        & 0x7F;
    header_ok && checksum == blob[REPLY_LEN - 2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{mock, EngineSettings};

    fn engine() -> mock::Engine {
        mock::Engine::new(EngineSettings::default())
    }

    /// Overwrites timbre 3's name through a DT1 message.
    fn rename_timbre_3(engine: &mut mock::Engine, name: &[u8; 4]) {
        let mut body = vec![0x04, 0x03, 0x6C];
        body.extend_from_slice(name);
        let checksum = engine.checksum(&body, 0);
        let mut sysex = vec![0xF0, 0x41, 0x10, 0x16, 0x12];
        sysex.extend_from_slice(&body);
        sysex.extend_from_slice(&[checksum, 0xF7]);
        engine.play_sysex(&sysex);
    }

    #[test]
    fn test_export_has_every_slot() {
        let container = export(&engine());
        assert_eq!(container.len(), 5);
        for slot in TIMBRE_SLOTS.iter() {
            assert_eq!(container.get(slot.key).unwrap().len(), REPLY_LEN);
        }
        assert_eq!(
            container.keys().collect::<Vec<&str>>(),
            vec![
                "timbre1.syx",
                "timbre2.syx",
                "timbre3.syx",
                "timbre4.syx",
                "timbre5.syx"
            ]
        );
    }

    #[test]
    fn test_round_trip_restores_memory() {
        let mut source = engine();
        rename_timbre_3(&mut source, b"Horn");
        let container = export(&source);

        let mut target = engine();
        let restored = import(&container, |sysex| target.play_sysex(sysex));
        assert_eq!(restored, 5);

        // Exporting again yields identical state.
        assert_eq!(export(&target), container);

        let mut name = [0u8; 4];
        target.read_memory(0x04_03_6C, &mut name);
        assert_eq!(&name, b"Horn");
    }

    #[test]
    fn test_import_skips_bad_lengths() {
        let mut container = export(&engine());
        container.insert("timbre2.syx", vec![0xF0, 0xF7]);
        container.insert("timbre4.syx", vec![0u8; REPLY_LEN + 1]);
        container.remove("timbre5.syx");
        container.insert("unrelated", vec![0u8; REPLY_LEN]);

        let mut fed = Vec::new();
        let restored = import(&container, |sysex| fed.push(sysex.to_vec()));
        assert_eq!(restored, 2);
        assert_eq!(fed.len(), 2);
        assert_eq!(fed[0], container.get("timbre1.syx").unwrap());
        assert_eq!(fed[1], container.get("timbre3.syx").unwrap());
    }

    #[test]
    fn test_import_empty_container() {
        let restored = import(&StateContainer::new(), |_| panic!("nothing to feed"));
        assert_eq!(restored, 0);
    }

    #[test]
    fn test_save_and_load() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("state.json");
        let container = export(&engine());

        container.save(&path)?;
        assert_eq!(StateContainer::load(&path)?, container);
        Ok(())
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            StateContainer::load(&dir.path().join("missing.json")),
            Err(SnapshotError::Io { .. })
        ));

        let path = dir.path().join("bad.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            StateContainer::load(&path),
            Err(SnapshotError::Json { .. })
        ));
    }

    #[test]
    fn test_verify() {
        let mut container = export(&engine());
        let mut corrupted = container.get("timbre2.syx").unwrap().to_vec();
        corrupted[20] ^= 0x01;
        container.insert("timbre2.syx", corrupted);
        container.insert("timbre3.syx", vec![0u8; 12]);
        container.remove("timbre4.syx");

        let report = verify(&container);
        assert_eq!(report.len(), 5);
        assert_eq!(report[0], ("timbre1.syx", SlotStatus::Present { checksum_ok: true }));
        assert_eq!(report[1], ("timbre2.syx", SlotStatus::Present { checksum_ok: false }));
        assert_eq!(report[2], ("timbre3.syx", SlotStatus::WrongLength(12)));
        assert_eq!(report[3], ("timbre4.syx", SlotStatus::Missing));
        assert_eq!(report[4], ("timbre5.syx", SlotStatus::Present { checksum_ok: true }));
    }
}
