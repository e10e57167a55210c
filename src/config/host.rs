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
    env,
    path::{Path, PathBuf},
};

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use super::{Audio, ConfigError, Midi};
use crate::engine::{EngineSettings, MAX_ENGINES};

const DEFAULT_ENGINE: &str = "mock";
const DEFAULT_ENGINES: usize = 5;
const DEFAULT_ROM_DIRECTORY: &str = "/Library/MT32";
const DEFAULT_CONTROL_ROM: &str = "MT32_CONTROL.ROM";
const DEFAULT_PCM_ROM: &str = "MT32_PCM.ROM";

/// Environment variables with this prefix override file values, e.g. `MT32HOST_ENGINES=2`
/// or `MT32HOST_AUDIO__SAMPLE_RATE=44100`.
const ENVIRONMENT_PREFIX: &str = "MT32HOST";

/// `MT32HOST_` followed by the key, with `__` between nested keys.
fn environment() -> Environment {
    Environment::with_prefix(ENVIRONMENT_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// The configuration for the host.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct HostConfig {
    /// The engine backend.
    engine: Option<String>,
    /// Number of engines run in parallel.
    engines: Option<usize>,
    /// Number of host output buses. Defaults to the engine count.
    buses: Option<usize>,
    /// Directory holding the ROM images.
    rom_directory: Option<String>,
    control_rom: Option<String>,
    pcm_rom: Option<String>,
    output_gain: Option<f32>,
    reverb: Option<bool>,
    /// Where timbre state is persisted between runs.
    state_file: Option<String>,
    audio: Option<Audio>,
    midi: Option<Midi>,
}

impl HostConfig {
    /// Loads the host configuration from a YAML file, applying environment overrides.
    pub fn deserialize(path: &Path) -> Result<HostConfig, ConfigError> {
        HostConfig::load(path, environment())
    }

    fn load(path: &Path, environment: Environment) -> Result<HostConfig, ConfigError> {
        let config: HostConfig = Config::builder()
            .add_source(File::from(path))
            .add_source(environment)
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a YAML string. No environment overrides are applied.
    pub fn from_yaml(yaml: &str) -> Result<HostConfig, ConfigError> {
        let config: HostConfig = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let engines = self.engines();
        if engines == 0 || engines > MAX_ENGINES {
            return Err(ConfigError::Invalid(format!(
                "engines must be between 1 and {}, got {}",
                MAX_ENGINES, engines
            )));
        }
        if self.buses() == 0 {
            return Err(ConfigError::Invalid("buses must be at least 1".to_string()));
        }
        if !(self.output_gain().is_finite() && self.output_gain() >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "output_gain must be a non-negative number, got {}",
                self.output_gain()
            )));
        }
        self.audio()
            .target_format()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn engine(&self) -> &str {
        self.engine.as_deref().unwrap_or(DEFAULT_ENGINE)
    }

    pub fn engines(&self) -> usize {
        self.engines.unwrap_or(DEFAULT_ENGINES)
    }

    pub fn buses(&self) -> usize {
        self.buses.unwrap_or_else(|| self.engines())
    }

    pub fn rom_directory(&self) -> PathBuf {
        PathBuf::from(self.rom_directory.as_deref().unwrap_or(DEFAULT_ROM_DIRECTORY))
    }

    pub fn control_rom(&self) -> &str {
        self.control_rom.as_deref().unwrap_or(DEFAULT_CONTROL_ROM)
    }

    pub fn pcm_rom(&self) -> &str {
        self.pcm_rom.as_deref().unwrap_or(DEFAULT_PCM_ROM)
    }

    pub fn output_gain(&self) -> f32 {
        self.output_gain.unwrap_or(EngineSettings::default().output_gain)
    }

    pub fn reverb(&self) -> bool {
        self.reverb.unwrap_or(EngineSettings::default().reverb)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            output_gain: self.output_gain(),
            reverb: self.reverb(),
        }
    }

    /// The state file, with a leading `~/` expanded to the home directory.
    pub fn state_file(&self) -> Option<PathBuf> {
        let path = self.state_file.as_deref()?;
        match (path.strip_prefix("~/"), env::var_os("HOME")) {
            (Some(rest), Some(home)) => Some(PathBuf::from(home).join(rest)),
            _ => Some(PathBuf::from(path)),
        }
    }

    pub fn audio(&self) -> Audio {
        self.audio.clone().unwrap_or_default()
    }

    pub fn midi(&self) -> Midi {
        self.midi.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::audio::SampleFormat;

    #[test]
    fn test_defaults() {
        let config = HostConfig::from_yaml("engine: mock").unwrap();
        assert_eq!(config.engine(), "mock");
        assert_eq!(config.engines(), 5);
        assert_eq!(config.buses(), 5);
        assert_eq!(config.rom_directory(), PathBuf::from("/Library/MT32"));
        assert_eq!(config.control_rom(), "MT32_CONTROL.ROM");
        assert_eq!(config.pcm_rom(), "MT32_PCM.ROM");
        assert_eq!(config.engine_settings(), EngineSettings::default());
        assert_eq!(config.state_file(), None);

        let audio = config.audio();
        assert_eq!(audio.device(), "default");
        assert_eq!(audio.sample_rate(), 48000);
        assert_eq!(audio.sample_format().unwrap(), SampleFormat::Float);
        assert_eq!(audio.bits_per_sample(), 32);
        assert_eq!(audio.buffer_size(), 512);

        let midi = config.midi();
        assert_eq!(midi.input_port(), "MT32_input");
        assert_eq!(midi.output_port(), "MT32_output");
        assert_eq!(midi.queue_capacity(), 256);
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
            engine: mock-engine
            engines: 2
            buses: 3
            rom_directory: /opt/roms
            control_rom: CM32L_CONTROL.ROM
            pcm_rom: CM32L_PCM.ROM
            output_gain: 1.5
            reverb: true
            state_file: /tmp/mt32host/state.json
            audio:
              device: mock-device
              sample_rate: 44100
              sample_format: int
              bits_per_sample: 24
              buffer_size: 256
            midi:
              input_port: mock-in
              output_port: mock-out
              queue_capacity: 64
        "#;

        let config = HostConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.engine(), "mock-engine");
        assert_eq!(config.engines(), 2);
        assert_eq!(config.buses(), 3);
        assert_eq!(config.rom_directory(), PathBuf::from("/opt/roms"));
        assert_eq!(config.control_rom(), "CM32L_CONTROL.ROM");
        assert_eq!(
            config.engine_settings(),
            EngineSettings {
                output_gain: 1.5,
                reverb: true
            }
        );
        assert_eq!(
            config.state_file(),
            Some(PathBuf::from("/tmp/mt32host/state.json"))
        );

        let format = config.audio().target_format().unwrap();
        assert_eq!(format.sample_rate, 44100);
        assert_eq!(format.sample_format, SampleFormat::Int);
        assert_eq!(format.bits_per_sample, 24);
        assert_eq!(config.audio().device(), "mock-device");
        assert_eq!(config.midi().input_port(), "mock-in");
        assert_eq!(config.midi().queue_capacity(), 64);
    }

    #[test]
    fn test_state_file_home_expansion() {
        let config = HostConfig::from_yaml("state_file: ~/.mt32host/state.json").unwrap();
        let state_file = config.state_file().unwrap();
        match env::var_os("HOME") {
            Some(home) => assert_eq!(state_file, PathBuf::from(home).join(".mt32host/state.json")),
            None => assert_eq!(state_file, PathBuf::from("~/.mt32host/state.json")),
        }
    }

    #[test]
    fn test_invalid_configs() {
        assert!(matches!(
            HostConfig::from_yaml("engines: 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            HostConfig::from_yaml("engines: 9"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            HostConfig::from_yaml("buses: 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            HostConfig::from_yaml("output_gain: -1.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            HostConfig::from_yaml("audio:\n  sample_format: float\n  bits_per_sample: 16"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            HostConfig::from_yaml("engines: lots"),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_deserialize_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mt32host.yaml");
        fs::write(&path, "engine: mock\nengines: 1\nrom_directory: /roms\n")?;

        let config = HostConfig::deserialize(&path)?;
        assert_eq!(config.engines(), 1);
        assert_eq!(config.buses(), 1);
        assert_eq!(config.rom_directory(), PathBuf::from("/roms"));
        Ok(())
    }

    #[test]
    fn test_environment_overrides() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mt32host.yaml");
        fs::write(&path, "engines: 1\naudio:\n  sample_rate: 48000\n")?;

        let variables = [
            ("MT32HOST_ENGINES", "3"),
            ("MT32HOST_AUDIO__SAMPLE_RATE", "44100"),
            ("MT32HOST_MIDI__INPUT_PORT", "mock-in"),
            ("OTHER_ENGINES", "7"),
        ];
        let environment = environment().source(Some(
            variables
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        ));

        let config = HostConfig::load(&path, environment)?;
        assert_eq!(config.engines(), 3);
        assert_eq!(config.audio().sample_rate(), 44100);
        assert_eq!(config.midi().input_port(), "mock-in");
        Ok(())
    }

    #[test]
    fn test_double_underscore_prefix_not_required() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mt32host.yaml");
        fs::write(&path, "engines: 1\n")?;

        let environment = environment().source(Some(
            [("MT32HOST_BUSES".to_string(), "4".to_string())]
                .into_iter()
                .collect(),
        ));

        let config = HostConfig::load(&path, environment)?;
        assert_eq!(config.engines(), 1);
        assert_eq!(config.buses(), 4);
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            HostConfig::deserialize(Path::new("/nonexistent/mt32host.yaml")),
            Err(ConfigError::Load(_))
        ));
    }
}
