//! Negotiated audio streams (ASEs) and their state machine.

use serde_json::json;
use smallvec::SmallVec;

use crate::{
   audio::{AudioContexts, CodecConfig, Direction, FrameDuration, QosConfig, lookup_kbps},
   error::{AudioError, Result},
   timeline::{ChannelClock, TriggerSet},
};

/// Stream state, in protocol order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
pub enum ChannelState {
   CodecConfigured,
   QosConfigured,
   Enabled,
   Started,
   Disabled,
   /// Release requested while the isochronous link is still up.
   Releasing,
}

/// Stream operation driving a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum StreamOp {
   Codec,
   PreferQos,
   Qos,
   Enable,
   Update,
   Start,
   Disable,
   Stop,
   Release,
}

impl ChannelState {
   /// State reached by applying `op`, or `None` when `op` is illegal here.
   ///
   /// `Release` always maps to `Releasing`; whether the channel is actually
   /// kept in that state depends on the isochronous link. Classic streams
   /// have no QoS step and enable straight from codec configuration.
   pub const fn after(self, op: StreamOp, classic: bool) -> Option<Self> {
      use ChannelState::*;
      match (self, op) {
         (Releasing, _) => None,
         (CodecConfigured, StreamOp::Enable) if classic => Some(Enabled),
         (_, StreamOp::Release) => Some(Releasing),
         (CodecConfigured | QosConfigured, StreamOp::Codec) => Some(CodecConfigured),
         (CodecConfigured, StreamOp::PreferQos) => Some(CodecConfigured),
         (CodecConfigured | QosConfigured, StreamOp::Qos) => Some(QosConfigured),
         (QosConfigured, StreamOp::Enable) => Some(Enabled),
         (Enabled | Started, StreamOp::Update) => Some(self),
         (Enabled, StreamOp::Start) => Some(Started),
         (Enabled | Started, StreamOp::Disable) => Some(Disabled),
         (Enabled | Started | Disabled, StreamOp::Stop) => Some(QosConfigured),
         _ => None,
      }
   }

   /// Enabled or started.
   pub const fn is_active(self) -> bool {
      matches!(self, Self::Enabled | Self::Started)
   }
}

/// One negotiated stream on a connection.
pub struct Channel {
   pub id: u8,
   pub direction: Direction,
   pub state: ChannelState,

   // Codec
   pub format: u8,
   pub sample_rate_khz: u16,
   pub duration: FrameDuration,
   pub locations: u32,
   pub channels: u8,
   pub octets: u16,
   pub blocks: u8,
   pub sdu: u16,
   pub interval_us: u32,

   // QoS
   pub qos: QosConfig,
   pub kbps: u16,

   pub contexts: AudioContexts,

   // Isochronous link
   pub audio_handle: u16,
   pub sync_delay_us: u32,
   pub iso_interval_us: u32,
   pub iso_connected: bool,
   pub clock: Option<ChannelClock>,
   pub triggers: TriggerSet,

   /// Local signal-path bindings.
   pub sink_bound: bool,
   pub source_bound: bool,
}

impl Channel {
   pub fn new(id: u8, direction: Direction, codec: &CodecConfig) -> Self {
      let mut channel = Self {
         id,
         direction,
         state: ChannelState::CodecConfigured,
         format: 0,
         sample_rate_khz: 0,
         duration: FrameDuration::Ms(10),
         locations: 0,
         channels: 1,
         octets: 0,
         blocks: 1,
         sdu: 0,
         interval_us: 0,
         qos: QosConfig::default(),
         kbps: 0,
         contexts: AudioContexts::NONE,
         audio_handle: 0,
         sync_delay_us: 0,
         iso_interval_us: 0,
         iso_connected: false,
         clock: None,
         triggers: TriggerSet::default(),
         sink_bound: false,
         source_bound: false,
      };
      channel.apply_codec(direction, codec);
      channel
   }

   /// Records codec parameters and the frame layout derived from them.
   pub fn apply_codec(&mut self, direction: Direction, codec: &CodecConfig) {
      self.direction = direction;
      self.format = codec.format;
      self.sample_rate_khz = codec.sample_rate_khz;
      self.duration = codec.duration;
      self.locations = codec.locations;
      self.channels = codec.channel_count();
      self.octets = codec.octets;
      self.blocks = codec.blocks;
      self.sdu = codec.sdu_size();
      self.interval_us = codec.sdu_interval_us();
   }

   /// Records negotiated QoS.
   ///
   /// Some peers configure a stereo stream whose SDU only carries one
   /// channel's octets; such streams are treated as mono.
   pub fn apply_qos(&mut self, qos: &QosConfig) {
      if self.octets == qos.max_sdu && self.channels != 1 {
         self.channels = 1;
      }
      self.qos = *qos;
      self.sdu = qos.max_sdu;
      self.interval_us = qos.interval_us;
      self.kbps = lookup_kbps(self.sample_rate_khz, self.sdu, self.interval_us, self.channels);
   }

   /// Moves to the state reached by `op`.
   pub fn transition(&mut self, op: StreamOp, classic: bool) -> Result<ChannelState> {
      let next = self
         .state
         .after(op, classic)
         .ok_or(AudioError::InvalidArgument("illegal stream transition"))?;
      self.state = next;
      Ok(next)
   }

   pub fn is_active(&self) -> bool {
      self.state.is_active()
   }

   /// Drops the local signal-path bindings.
   pub fn unbind(&mut self) {
      self.sink_bound = false;
      self.source_bound = false;
   }

   pub fn snapshot(&self) -> serde_json::Value {
      json!({
         "id": self.id,
         "direction": <&'static str>::from(self.direction),
         "state": <&'static str>::from(self.state),
         "sample_rate_khz": self.sample_rate_khz,
         "channels": self.channels,
         "sdu": self.sdu,
         "interval_us": self.interval_us,
         "kbps": self.kbps,
         "contexts": self.contexts.bits(),
         "iso_connected": self.iso_connected,
         "timeline": self.clock.as_ref().map(|c| json!({
            "id": c.id(),
            "owner": c.is_owner(),
            "refs": c.ref_count(),
         })),
      })
   }
}

/// Channels attached to one connection, keyed by stream id.
#[derive(Default)]
pub struct ChannelList(SmallVec<[Channel; 4]>);

impl ChannelList {
   pub fn len(&self) -> usize {
      self.0.len()
   }

   pub fn is_empty(&self) -> bool {
      self.0.is_empty()
   }

   pub fn get(&self, id: u8) -> Option<&Channel> {
      self.0.iter().find(|c| c.id == id)
   }

   pub fn get_mut(&mut self, id: u8) -> Option<&mut Channel> {
      self.0.iter_mut().find(|c| c.id == id)
   }

   /// Adds a channel; ids are unique per connection.
   pub fn insert(&mut self, channel: Channel) -> Result<&mut Channel> {
      if self.get(channel.id).is_some() {
         return Err(AudioError::InvalidArgument("duplicate stream id"));
      }
      self.0.push(channel);
      let last = self.0.len() - 1;
      Ok(&mut self.0[last])
   }

   pub fn remove(&mut self, id: u8) -> Option<Channel> {
      let pos = self.0.iter().position(|c| c.id == id)?;
      Some(self.0.remove(pos))
   }

   pub fn iter(&self) -> impl Iterator<Item = &Channel> {
      self.0.iter()
   }

   pub fn any_active(&self) -> bool {
      self.0.iter().any(Channel::is_active)
   }

   pub fn any_iso_connected(&self) -> bool {
      self.0.iter().any(|c| c.iso_connected)
   }

   /// Another channel whose timeline a newly connected stream can share.
   pub fn clock_donor(&self, except: u8) -> Option<&Channel> {
      self
         .0
         .iter()
         .find(|c| c.id != except && c.clock.is_some())
   }

   /// Removes every channel in registration order.
   pub fn drain(&mut self) -> impl Iterator<Item = Channel> + '_ {
      self.0.drain(..)
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::testing::codec;

   #[test]
   fn test_legal_sequence() {
      let mut ch = Channel::new(1, Direction::Sink, &codec(0b11, 7, 1, 75));
      for (op, expect) in [
         (StreamOp::PreferQos, ChannelState::CodecConfigured),
         (StreamOp::Qos, ChannelState::QosConfigured),
         (StreamOp::Enable, ChannelState::Enabled),
         (StreamOp::Update, ChannelState::Enabled),
         (StreamOp::Start, ChannelState::Started),
         (StreamOp::Disable, ChannelState::Disabled),
         (StreamOp::Stop, ChannelState::QosConfigured),
         (StreamOp::Release, ChannelState::Releasing),
      ] {
         assert_eq!(ch.transition(op, false).unwrap(), expect, "{op}");
      }
   }

   #[test]
   fn test_illegal_transitions_rejected() {
      let mut ch = Channel::new(1, Direction::Sink, &codec(0b1, 10, 1, 100));
      assert!(ch.transition(StreamOp::Start, false).is_err());
      assert!(ch.transition(StreamOp::Enable, false).is_err());
      assert_eq!(ch.state, ChannelState::CodecConfigured);

      // Classic endpoints skip QoS
      assert_eq!(
         ch.transition(StreamOp::Enable, true).unwrap(),
         ChannelState::Enabled
      );

      ch.state = ChannelState::Releasing;
      assert!(ch.transition(StreamOp::Release, false).is_err());
      assert!(ch.transition(StreamOp::Codec, false).is_err());
   }

   #[test]
   fn test_qos_mono_correction_and_bitrate() {
      let mut ch = Channel::new(1, Direction::Sink, &codec(0b11, 7, 1, 75));
      assert_eq!(ch.channels, 2);
      assert_eq!(ch.sdu, 150);

      // SDU equal to per-channel octets: the peer actually sends mono
      ch.apply_qos(&QosConfig {
         max_sdu: 75,
         interval_us: 7500,
         ..Default::default()
      });
      assert_eq!(ch.channels, 1);
      assert_eq!(ch.kbps, 80);

      let mut ch = Channel::new(2, Direction::Sink, &codec(0b11, 7, 1, 75));
      ch.apply_qos(&QosConfig {
         max_sdu: 150,
         interval_us: 7500,
         ..Default::default()
      });
      assert_eq!(ch.channels, 2);
      assert_eq!(ch.kbps, 160);
   }

   #[test]
   fn test_list_ids_are_unique() {
      let mut list = ChannelList::default();
      list.insert(Channel::new(1, Direction::Sink, &codec(1, 10, 1, 100)))
         .unwrap();
      assert!(list
         .insert(Channel::new(1, Direction::Source, &codec(1, 10, 1, 100)))
         .is_err());
      assert_eq!(list.len(), 1);
      assert!(list.remove(1).is_some());
      assert!(list.remove(1).is_none());
   }
}
