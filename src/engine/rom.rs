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
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{info, span, Level};

#[derive(Debug, thiserror::Error)]
pub enum RomError {
    #[error("unable to read ROM {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ROM {0} is empty")]
    Empty(PathBuf),
}

/// An immutable ROM image, shared read-only by every engine opened from it.
#[derive(Clone)]
pub struct RomImage {
    name: String,
    data: Arc<[u8]>,
}

impl RomImage {
    /// Reads a ROM image from disk.
    pub fn load(path: &Path) -> Result<RomImage, RomError> {
        let data = fs::read(path).map_err(|source| RomError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if data.is_empty() {
            return Err(RomError::Empty(path.to_path_buf()));
        }

        Ok(RomImage {
            name: crate::util::filename_display(path).to_string(),
            data: data.into(),
        })
    }

    /// Wraps in-memory ROM contents.
    pub fn from_bytes(name: &str, data: Vec<u8>) -> RomImage {
        RomImage {
            name: name.to_string(),
            data: data.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The control and PCM ROM pair an engine is opened from.
#[derive(Clone)]
pub struct RomSet {
    control: RomImage,
    pcm: RomImage,
}

impl RomSet {
    /// Loads the control and PCM ROMs from the given directory.
    pub fn load(directory: &Path, control: &str, pcm: &str) -> Result<RomSet, RomError> {
        let span = span!(Level::INFO, "load ROMs");
        let _enter = span.enter();

        let control = RomImage::load(&directory.join(control))?;
        let pcm = RomImage::load(&directory.join(pcm))?;

        info!(
            control = control.name(),
            control_bytes = control.len(),
            pcm = pcm.name(),
            pcm_bytes = pcm.len(),
            "Loaded ROM images."
        );

        Ok(RomSet { control, pcm })
    }

    /// Builds a ROM set from in-memory images.
    pub fn from_bytes(control: Vec<u8>, pcm: Vec<u8>) -> RomSet {
        RomSet {
            control: RomImage::from_bytes("control", control),
            pcm: RomImage::from_bytes("pcm", pcm),
        }
    }

    pub fn control(&self) -> &RomImage {
        &self.control
    }

    pub fn pcm(&self) -> &RomImage {
        &self.pcm
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_load_rom_set() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("MT32_CONTROL.ROM"), vec![0xAA; 32])?;
        fs::write(dir.path().join("MT32_PCM.ROM"), vec![0x55; 64])?;

        let roms = RomSet::load(dir.path(), "MT32_CONTROL.ROM", "MT32_PCM.ROM")?;
        assert_eq!(roms.control().name(), "MT32_CONTROL.ROM");
        assert_eq!(roms.control().len(), 32);
        assert_eq!(roms.pcm().len(), 64);
        assert_eq!(roms.pcm().name(), "MT32_PCM.ROM");
        Ok(())
    }

    #[test]
    fn test_missing_rom() {
        let dir = tempfile::tempdir().unwrap();
        let result = RomSet::load(dir.path(), "MT32_CONTROL.ROM", "MT32_PCM.ROM");
        assert!(matches!(result, Err(RomError::Io { .. })));
    }

    #[test]
    fn test_empty_rom() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("control.rom"), Vec::<u8>::new()).unwrap();
        fs::write(dir.path().join("pcm.rom"), vec![1u8; 4]).unwrap();

        let result = RomSet::load(dir.path(), "control.rom", "pcm.rom");
        assert!(matches!(result, Err(RomError::Empty(_))));
    }
}
