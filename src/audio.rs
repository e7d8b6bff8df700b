//! Shared audio vocabulary.
//!
//! Transports, roles, directions, audio context bitmaps, priority classes and
//! the codec/QoS payloads carried by stream events.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Opaque connection handle assigned by the radio layer.
pub type Handle = u16;

/// Stream id of the classic music endpoint.
pub const CLASSIC_MUSIC_ENDPOINT: u8 = 1;
/// Stream id of the classic call endpoint.
pub const CLASSIC_CALL_ENDPOINT: u8 = 2;

/// Radio transport of a link.
#[derive(
   Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::IntoStaticStr,
)]
pub enum Transport {
   Classic,
   Le,
}

/// Link role from the local device's point of view.
#[derive(
   Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::IntoStaticStr,
)]
pub enum Role {
   Master,
   Slave,
}

/// Kind of physical link reported on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum LinkKind {
   Acl,
   Sco,
   /// Classic link observed through a snooping peer earbud.
   Snoop,
}

/// Stream direction as seen by the server (slave) side of a unicast link.
#[derive(
   Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::IntoStaticStr,
)]
pub enum Direction {
   Sink,
   Source,
}

impl Direction {
   pub const fn opposite(self) -> Self {
      match self {
         Self::Sink => Self::Source,
         Self::Source => Self::Sink,
      }
   }

   /// Direction a local stream binding expects for a link in `role`.
   ///
   /// A master's local source feeds the remote sink; a slave's local source
   /// is the remote-declared source.
   pub const fn expected(role: Role, local: Self) -> Self {
      match role {
         Role::Master => local.opposite(),
         Role::Slave => local,
      }
   }
}

/// Audio context bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioContexts(pub u16);

impl AudioContexts {
   pub const NONE: Self = Self(0);
   pub const UNSPECIFIED: Self = Self(0x0001);
   pub const CONVERSATIONAL: Self = Self(0x0002);
   pub const MEDIA: Self = Self(0x0004);
   pub const GAME: Self = Self(0x0008);
   pub const INSTRUCTIONAL: Self = Self(0x0010);
   pub const VOICE_ASSISTANTS: Self = Self(0x0020);
   pub const LIVE: Self = Self(0x0040);
   pub const SOUND_EFFECTS: Self = Self(0x0080);
   pub const NOTIFICATIONS: Self = Self(0x0100);
   pub const RINGTONE: Self = Self(0x0200);
   pub const ALERTS: Self = Self(0x0400);
   pub const EMERGENCY_ALARM: Self = Self(0x0800);

   /// Contexts that classify a stream as a call.
   pub const CALL: Self = Self(Self::CONVERSATIONAL.0 | Self::RINGTONE.0);

   pub const fn bits(self) -> u16 {
      self.0
   }

   pub const fn is_empty(self) -> bool {
      self.0 == 0
   }

   pub const fn intersects(self, other: Self) -> bool {
      self.0 & other.0 != 0
   }

   pub const fn union(self, other: Self) -> Self {
      Self(self.0 | other.0)
   }
}

impl fmt::Display for AudioContexts {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "{:#06x}", self.0)
   }
}

/// Rendering priority class of a slave connection.
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   PartialOrd,
   Ord,
   Hash,
   Default,
   Serialize,
   strum::Display,
   strum::IntoStaticStr,
)]
pub enum Priority {
   #[default]
   None,
   /// Media or notification playback.
   Media,
   Call,
}

/// Stream class reported upward for the active slave.
#[derive(
   Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, strum::Display, strum::IntoStaticStr,
)]
pub enum StreamKind {
   #[default]
   None,
   ClassicMusic,
   ClassicCall,
   LeMusic,
   LeCall,
   LeTws,
}

impl StreamKind {
   /// Classifies a slave link by transport, peer-earbud flag and priority.
   pub const fn classify(transport: Transport, tws: bool, priority: Priority) -> Self {
      match (transport, priority) {
         (Transport::Classic, Priority::Call) => Self::ClassicCall,
         (Transport::Classic, Priority::Media) => Self::ClassicMusic,
         (Transport::Le, _) if tws => Self::LeTws,
         (Transport::Le, Priority::Call) => Self::LeCall,
         (Transport::Le, Priority::Media) => Self::LeMusic,
         _ => Self::None,
      }
   }
}

/// Remote media-control state of a slave connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, strum::Display)]
pub enum MediaState {
   #[default]
   Paused,
   Playing,
   /// No media-control state known yet.
   Inactive,
}

/// Codec frame duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameDuration {
   Ms7_5,
   Ms(u8),
}

impl FrameDuration {
   /// Decodes the wire form, where `7` stands for 7.5 ms.
   pub const fn from_code(code: u8) -> Self {
      if code == 7 { Self::Ms7_5 } else { Self::Ms(code) }
   }

   pub const fn as_micros(self) -> u32 {
      match self {
         Self::Ms7_5 => 7500,
         Self::Ms(ms) => ms as u32 * 1000,
      }
   }
}

/// Payload of a codec-configured event.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecConfig {
   pub format: u8,
   pub sample_rate_khz: u16,
   pub duration: FrameDuration,
   /// Audio location bitmap, zero when omitted.
   pub locations: u32,
   pub octets: u16,
   pub blocks: u8,
   pub target_latency: u8,
   pub target_phy: u8,
   pub specific: SmallVec<[u8; 16]>,
}

impl CodecConfig {
   /// Number of audio channels, one per location bit.
   pub const fn channel_count(&self) -> u8 {
      match self.locations.count_ones() {
         0 => 1,
         n => n as u8,
      }
   }

   pub const fn sdu_size(&self) -> u16 {
      self.channel_count() as u16 * self.blocks as u16 * self.octets
   }

   pub const fn sdu_interval_us(&self) -> u32 {
      self.duration.as_micros() * self.blocks as u32
   }
}

/// Payload of a QoS-configured event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QosConfig {
   pub framing: u8,
   pub phy: u8,
   pub rtn: u8,
   pub max_sdu: u16,
   pub interval_us: u32,
   pub latency_ms: u16,
   pub delay_us: u32,
}

/// Preferred QoS advertised by the server side of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PreferredQos {
   pub framing: u8,
   pub phy: u8,
   pub rtn: u8,
   pub latency_ms: u16,
   pub delay_min_us: u32,
   pub delay_max_us: u32,
   pub preferred_delay_min_us: u32,
   pub preferred_delay_max_us: u32,
}

struct BitrateEntry {
   sample_khz: u16,
   sdu: u16,
   interval_us: u32,
   kbps: u16,
   channels: u8,
}

const fn rate(sample_khz: u16, sdu: u16, interval_us: u32, kbps: u16, channels: u8) -> BitrateEntry {
   BitrateEntry {
      sample_khz,
      sdu,
      interval_us,
      kbps,
      channels,
   }
}

const BITRATES: &[BitrateEntry] = &[
   // 48k stereo
   rate(48, 198, 10000, 158, 2),
   rate(48, 150, 7500, 160, 2),
   rate(48, 200, 10000, 160, 2),
   rate(48, 180, 7500, 192, 2),
   rate(48, 240, 10000, 192, 2),
   rate(48, 234, 7500, 248, 2),
   rate(48, 310, 10000, 248, 2),
   // 48k mono
   rate(48, 75, 7500, 80, 1),
   rate(48, 100, 10000, 80, 1),
   rate(48, 90, 7500, 96, 1),
   rate(48, 120, 10000, 96, 1),
   rate(48, 117, 7500, 124, 1),
   rate(48, 155, 10000, 124, 1),
   // 32k
   rate(32, 120, 7500, 128, 2),
   rate(32, 160, 10000, 128, 2),
   rate(32, 60, 7500, 64, 1),
   rate(32, 80, 10000, 64, 1),
   // 24k
   rate(24, 120, 10000, 96, 2),
   rate(24, 60, 10000, 48, 1),
   // 16k
   rate(16, 60, 7500, 64, 2),
   rate(16, 80, 10000, 64, 2),
   rate(16, 30, 7500, 32, 1),
   rate(16, 40, 10000, 32, 1),
];

/// Nominal bitrate of a negotiated stream in kbps, 0 when unknown.
pub fn lookup_kbps(sample_khz: u16, sdu: u16, interval_us: u32, channels: u8) -> u16 {
   BITRATES
      .iter()
      .find(|e| {
         e.sample_khz == sample_khz
            && e.sdu == sdu
            && e.interval_us == interval_us
            && e.channels == channels
      })
      .map_or(0, |e| e.kbps)
}

#[cfg(test)]
mod tests {
   use super::*;

   fn codec(locations: u32, duration: u8, blocks: u8, octets: u16) -> CodecConfig {
      CodecConfig {
         format: 0x06,
         sample_rate_khz: 48,
         duration: FrameDuration::from_code(duration),
         locations,
         octets,
         blocks,
         target_latency: 0,
         target_phy: 0,
         specific: SmallVec::new(),
      }
   }

   #[test]
   fn test_frame_derivation() {
      // Stereo 7.5ms, one block
      let c = codec(0b11, 7, 1, 75);
      assert_eq!(c.channel_count(), 2);
      assert_eq!(c.sdu_size(), 150);
      assert_eq!(c.sdu_interval_us(), 7500);

      // Missing location bitmap means mono
      let c = codec(0, 10, 2, 100);
      assert_eq!(c.channel_count(), 1);
      assert_eq!(c.sdu_size(), 200);
      assert_eq!(c.sdu_interval_us(), 20000);
   }

   #[test]
   fn test_bitrate_lookup() {
      assert_eq!(lookup_kbps(48, 150, 7500, 2), 160);
      assert_eq!(lookup_kbps(48, 155, 10000, 1), 124);
      assert_eq!(lookup_kbps(16, 40, 10000, 1), 32);
      assert_eq!(lookup_kbps(44, 150, 7500, 2), 0);
      assert_eq!(lookup_kbps(48, 150, 7500, 1), 0);
   }

   #[test]
   fn test_stream_kind_classification() {
      assert_eq!(
         StreamKind::classify(Transport::Classic, false, Priority::Call),
         StreamKind::ClassicCall
      );
      assert_eq!(
         StreamKind::classify(Transport::Le, true, Priority::Media),
         StreamKind::LeTws
      );
      assert_eq!(
         StreamKind::classify(Transport::Le, false, Priority::Media),
         StreamKind::LeMusic
      );
      assert_eq!(
         StreamKind::classify(Transport::Le, false, Priority::None),
         StreamKind::None
      );
   }

   #[test]
   fn test_direction_expectation() {
      assert_eq!(Direction::expected(Role::Master, Direction::Source), Direction::Sink);
      assert_eq!(Direction::expected(Role::Slave, Direction::Source), Direction::Source);
      assert!(AudioContexts::RINGTONE.intersects(AudioContexts::CALL));
      assert!(!AudioContexts::MEDIA.intersects(AudioContexts::CALL));
   }
}
