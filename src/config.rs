//! Configuration management for the audio session manager.
//!
//! Admission policy, arbitration switches, default server QoS and registry
//! capacities, loaded from a TOML file.

use std::{
   env, fs,
   path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
   audio::{Direction, PreferredQos},
   error::{AudioError, Result},
};

/// Main configuration structure for the manager.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
   /// Phone-class devices allowed to stay connected.
   #[serde(default = "default_max_phone_devices")]
   pub max_phone_devices: usize,

   /// Pre-empt an idle device when a new one pushes past the limit.
   #[serde(default)]
   pub phone_takeover: bool,

   /// Pause the displaced slave when another one starts rendering.
   #[serde(default = "default_stop_another")]
   pub stop_another_when_one_playing: bool,

   /// Local rendering delay subtracted from broadcast start offsets.
   #[serde(default)]
   pub media_delay_us: u32,

   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub sink_preferred_qos: Option<PreferredQos>,

   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub source_preferred_qos: Option<PreferredQos>,

   #[serde(default)]
   pub capacity: Capacity,
}

/// Upper bounds on registry sizes.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
   #[serde(default = "default_max_connections")]
   pub connections: usize,

   #[serde(default = "default_max_channels")]
   pub channels_per_connection: usize,

   #[serde(default = "default_max_calls")]
   pub calls: usize,

   #[serde(default = "default_max_broadcast_sessions")]
   pub broadcast_sessions: usize,
}

const fn default_max_phone_devices() -> usize {
   1
}

const fn default_stop_another() -> bool {
   true
}

const fn default_max_connections() -> usize {
   6
}

const fn default_max_channels() -> usize {
   4
}

const fn default_max_calls() -> usize {
   4
}

const fn default_max_broadcast_sessions() -> usize {
   1
}

impl Default for Capacity {
   fn default() -> Self {
      Self {
         connections: default_max_connections(),
         channels_per_connection: default_max_channels(),
         calls: default_max_calls(),
         broadcast_sessions: default_max_broadcast_sessions(),
      }
   }
}

impl Default for Config {
   fn default() -> Self {
      Self {
         max_phone_devices: default_max_phone_devices(),
         phone_takeover: false,
         stop_another_when_one_playing: default_stop_another(),
         media_delay_us: 0,
         sink_preferred_qos: None,
         source_preferred_qos: None,
         capacity: Capacity::default(),
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      Self::load_from(&Self::config_path()?)
   }

   pub fn load_from(path: &Path) -> Result<Self> {
      if path.exists() {
         let contents = fs::read_to_string(path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         // Create default config
         let config = Self::default();
         config.save_to(path)?;
         Ok(config)
      }
   }

   /// Saves the current configuration to disk.
   pub fn save(&self) -> Result<()> {
      self.save_to(&Self::config_path()?)
   }

   pub fn save_to(&self, path: &Path) -> Result<()> {
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }
      fs::write(path, toml::to_string_pretty(self)?)?;
      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(home) = env::var("BT_AUDIO_HOME") {
         PathBuf::from(home)
      } else if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else if let Some(dir) = dirs::config_dir() {
         dir
      } else {
         return Err(AudioError::ConfigDirNotFound);
      };

      Ok(config_dir.join("bt-audio-manager").join("config.toml"))
   }

   /// Default preferred QoS pushed for a server-side stream.
   pub const fn preferred_qos(&self, direction: Direction) -> Option<PreferredQos> {
      match direction {
         Direction::Sink => self.sink_preferred_qos,
         Direction::Source => self.source_preferred_qos,
      }
   }

   pub fn set_preferred_qos(&mut self, direction: Direction, qos: Option<PreferredQos>) {
      match direction {
         Direction::Sink => self.sink_preferred_qos = qos,
         Direction::Source => self.source_preferred_qos = qos,
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_missing_file_writes_defaults() {
      let dir = tempfile::tempdir().unwrap();
      let path = dir.path().join("nested").join("config.toml");
      let config = Config::load_from(&path).unwrap();
      assert_eq!(config, Config::default());
      assert!(path.exists());
   }

   #[test]
   fn test_partial_file_fills_defaults() {
      let dir = tempfile::tempdir().unwrap();
      let path = dir.path().join("config.toml");
      fs::write(
         &path,
         "max_phone_devices = 2\nphone_takeover = true\n\n[capacity]\ncalls = 2\n",
      )
      .unwrap();

      let config = Config::load_from(&path).unwrap();
      assert_eq!(config.max_phone_devices, 2);
      assert!(config.phone_takeover);
      assert!(config.stop_another_when_one_playing);
      assert_eq!(config.capacity.calls, 2);
      assert_eq!(config.capacity.connections, 6);
   }

   #[test]
   fn test_save_round_trip_with_qos() {
      let dir = tempfile::tempdir().unwrap();
      let path = dir.path().join("config.toml");
      let mut config = Config::default();
      config.set_preferred_qos(
         Direction::Sink,
         Some(PreferredQos {
            framing: 0,
            phy: 2,
            rtn: 2,
            latency_ms: 10,
            delay_min_us: 20000,
            delay_max_us: 40000,
            preferred_delay_min_us: 20000,
            preferred_delay_max_us: 40000,
         }),
      );
      config.save_to(&path).unwrap();
      let loaded = Config::load_from(&path).unwrap();
      assert_eq!(loaded, config);
      assert_eq!(loaded.preferred_qos(Direction::Source), None);
   }

   #[test]
   fn test_malformed_file_is_error() {
      let dir = tempfile::tempdir().unwrap();
      let path = dir.path().join("config.toml");
      fs::write(&path, "max_phone_devices = \"two\"").unwrap();
      assert!(matches!(
         Config::load_from(&path),
         Err(AudioError::TomlParse(_))
      ));
   }
}
