//! Broadcast source and receiver sessions.
//!
//! Sessions have no peer link. Only one may exist at a time, and a session
//! being torn down blocks reuse of its id until the release lands.

use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::json;
use smallvec::SmallVec;

use crate::{
   audio::{AudioContexts, CodecConfig, QosConfig, lookup_kbps},
   error::{AudioError, Result},
   timeline::{ChannelClock, OwnedTimeline, TimelineFactory, TimelineKind, TimelineSpec, TriggerSet},
};

/// Broadcast identifier.
pub type BroadcastId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::IntoStaticStr)]
pub enum BroadcastRole {
   Source,
   Receiver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::IntoStaticStr)]
pub enum BroadcastState {
   Configured,
   Streaming,
}

/// One BIS of a broadcast session.
pub struct BroadcastChannel {
   pub id: u8,
   pub state: BroadcastState,
   pub contexts: AudioContexts,
   pub sample_rate_khz: u16,
   pub channels: u8,
   pub sdu: u16,
   pub interval_us: u32,
   pub delay_us: u32,
   pub kbps: u16,
   pub audio_handle: u16,
   pub sync_delay_us: u32,
   pub iso_interval_us: u32,
   pub clock: Option<ChannelClock>,
   pub triggers: TriggerSet,
}

pub struct BroadcastSession {
   pub id: BroadcastId,
   pub role: BroadcastRole,
   pub stopping: bool,
   pub channels: SmallVec<[BroadcastChannel; 2]>,
}

impl BroadcastSession {
   fn new(id: BroadcastId, role: BroadcastRole) -> Self {
      Self {
         id,
         role,
         stopping: false,
         channels: SmallVec::new(),
      }
   }

   pub fn channel(&self, id: u8) -> Option<&BroadcastChannel> {
      self.channels.iter().find(|c| c.id == id)
   }

   pub fn channel_mut(&mut self, id: u8) -> Option<&mut BroadcastChannel> {
      self.channels.iter_mut().find(|c| c.id == id)
   }

   fn snapshot(&self) -> serde_json::Value {
      json!({
         "id": self.id,
         "role": <&'static str>::from(self.role),
         "stopping": self.stopping,
         "channels": self.channels.iter().map(|c| json!({
            "id": c.id,
            "state": <&'static str>::from(c.state),
            "contexts": c.contexts.bits(),
            "kbps": c.kbps,
            "iso_interval_us": c.iso_interval_us,
            "timeline": c.clock.as_ref().map(ChannelClock::id),
         })).collect::<Vec<_>>(),
      })
   }
}

/// Outcome of a configuration request.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigOutcome {
   /// Channel recorded; `created` when the session is new.
   Configured { created: bool },
   /// Receiver mode was switched off; the session was dropped.
   Dropped,
}

#[derive(Default)]
pub struct BroadcastRegistry {
   sessions: Vec<BroadcastSession>,
   sink_enabled: bool,
   total_syncs: u32,
   synced: u32,
   media_delay_us: u32,
}

impl BroadcastRegistry {
   pub fn get(&self, id: BroadcastId) -> Option<&BroadcastSession> {
      self.sessions.iter().find(|s| s.id == id)
   }

   pub fn get_mut(&mut self, id: BroadcastId) -> Option<&mut BroadcastSession> {
      self.sessions.iter_mut().find(|s| s.id == id)
   }

   pub fn iter(&self) -> impl Iterator<Item = &BroadcastSession> {
      self.sessions.iter()
   }

   pub const fn sink_enabled(&self) -> bool {
      self.sink_enabled
   }

   pub fn has_source(&self) -> bool {
      self.sessions.iter().any(|s| s.role == BroadcastRole::Source)
   }

   pub const fn sync_counts(&self) -> (u32, u32) {
      (self.synced, self.total_syncs)
   }

   pub const fn media_delay_us(&self) -> u32 {
      self.media_delay_us
   }

   pub fn set_media_delay(&mut self, delay_us: u32) {
      self.media_delay_us = delay_us;
   }

   /// Admission check for a new session id.
   fn check_new(&self, id: BroadcastId, capacity: usize) -> Result<()> {
      if let Some(existing) = self.get(id) {
         if existing.stopping {
            warn!("Broadcast {id:#x} still releasing");
            return Err(AudioError::Busy);
         }
         return Err(AudioError::InvalidArgument("broadcast id in use"));
      }
      if !self.sessions.is_empty() {
         return Err(AudioError::InvalidArgument("another broadcast session exists"));
      }
      if self.sessions.len() >= capacity {
         return Err(AudioError::NoMemory);
      }
      Ok(())
   }

   /// Creates a broadcast source session.
   pub fn create_source(&mut self, id: BroadcastId, capacity: usize) -> Result<()> {
      self.check_new(id, capacity)?;
      info!("Broadcast source {id:#x} created");
      self
         .sessions
         .push(BroadcastSession::new(id, BroadcastRole::Source));
      Ok(())
   }

   /// Records a channel configuration, creating the session when needed.
   pub fn configure(
      &mut self,
      id: BroadcastId,
      role: BroadcastRole,
      chan_id: u8,
      codec: &CodecConfig,
      qos: &QosConfig,
      capacity: usize,
   ) -> Result<ConfigOutcome> {
      if role == BroadcastRole::Receiver && !self.sink_enabled {
         warn!("Receiver config for {id:#x} while sink mode is off");
         self.remove(id);
         return Ok(ConfigOutcome::Dropped);
      }

      let created = match self.get(id) {
         Some(s) if s.stopping => return Err(AudioError::Busy),
         Some(s) if s.role != role => {
            return Err(AudioError::InvalidArgument("broadcast role mismatch"));
         },
         Some(_) => false,
         None => {
            self.check_new(id, capacity)?;
            self.sessions.push(BroadcastSession::new(id, role));
            true
         },
      };

      let Some(session) = self.get_mut(id) else {
         return Err(AudioError::NotFound);
      };
      let channels = codec.channel_count();
      let interval_us = codec.sdu_interval_us();
      let chan = BroadcastChannel {
         id: chan_id,
         state: BroadcastState::Configured,
         contexts: AudioContexts::NONE,
         sample_rate_khz: codec.sample_rate_khz,
         channels,
         sdu: qos.max_sdu,
         interval_us,
         delay_us: qos.delay_us,
         kbps: lookup_kbps(codec.sample_rate_khz, qos.max_sdu, interval_us, channels),
         audio_handle: 0,
         sync_delay_us: 0,
         iso_interval_us: 0,
         clock: None,
         triggers: TriggerSet::default(),
      };
      match session.channel_mut(chan_id) {
         Some(existing) => *existing = chan,
         None => session.channels.push(chan),
      }
      debug!("Broadcast {id:#x} channel {chan_id} configured ({role})");
      Ok(ConfigOutcome::Configured { created })
   }

   fn channel_mut(&mut self, id: BroadcastId, chan_id: u8) -> Result<&mut BroadcastChannel> {
      self
         .get_mut(id)
         .ok_or(AudioError::NotFound)?
         .channel_mut(chan_id)
         .ok_or(AudioError::NotFound)
   }

   /// Streaming starts on the given channels.
   pub fn enable(&mut self, id: BroadcastId, chans: &[u8], contexts: AudioContexts) -> Result<()> {
      let session = self.get(id).ok_or(AudioError::NotFound)?;
      if session.role == BroadcastRole::Receiver && !self.sink_enabled {
         warn!("Receiver enable for {id:#x} after sink mode was switched off");
         self.remove(id);
         return Err(AudioError::InvalidArgument("sink mode disabled"));
      }
      for &chan_id in chans {
         let chan = self.channel_mut(id, chan_id)?;
         chan.state = BroadcastState::Streaming;
         chan.contexts = contexts;
      }
      Ok(())
   }

   pub fn update(&mut self, id: BroadcastId, chans: &[u8], contexts: AudioContexts) -> Result<()> {
      for &chan_id in chans {
         self.channel_mut(id, chan_id)?.contexts = contexts;
      }
      Ok(())
   }

   pub fn disable(&mut self, id: BroadcastId, chans: &[u8]) -> Result<()> {
      for &chan_id in chans {
         self.channel_mut(id, chan_id)?.state = BroadcastState::Configured;
      }
      Ok(())
   }

   /// Marks a session as stopping; its id stays reserved until release.
   pub fn begin_stop(&mut self, id: BroadcastId) -> Result<()> {
      let session = self.get_mut(id).ok_or(AudioError::NotFound)?;
      session.stopping = true;
      Ok(())
   }

   /// Release confirmed: drops the session and its timelines.
   pub fn release(&mut self, id: BroadcastId) -> Result<BroadcastSession> {
      let session = self.remove(id).ok_or(AudioError::NotFound)?;
      if session.role == BroadcastRole::Receiver {
         self.synced = self.synced.saturating_sub(1);
      }
      info!("Broadcast {id:#x} released");
      Ok(session)
   }

   fn remove(&mut self, id: BroadcastId) -> Option<BroadcastSession> {
      let pos = self.sessions.iter().position(|s| s.id == id)?;
      Some(self.sessions.remove(pos))
   }

   pub fn set_sink_enabled(&mut self, enabled: bool) {
      self.sink_enabled = enabled;
   }

   /// Marks every receiver session as stopping; returns their ids.
   pub fn stop_receivers(&mut self) -> SmallVec<[BroadcastId; 2]> {
      self
         .sessions
         .iter_mut()
         .filter(|s| s.role == BroadcastRole::Receiver)
         .map(|s| {
            s.stopping = true;
            s.id
         })
         .collect()
   }

   pub fn scan_started(&mut self) {
      self.total_syncs += 1;
   }

   pub fn scan_stopped(&mut self) {
      self.total_syncs = self.total_syncs.saturating_sub(1);
   }

   /// A receiver synced to a broadcast; creates its session.
   pub fn synced_to(&mut self, id: BroadcastId, capacity: usize) -> Result<()> {
      if !self.sink_enabled {
         return Err(AudioError::InvalidArgument("sink mode disabled"));
      }
      match self.get(id) {
         Some(s) if s.stopping => Err(AudioError::Busy),
         Some(_) => Ok(()),
         None => {
            self.check_new(id, capacity)?;
            self
               .sessions
               .push(BroadcastSession::new(id, BroadcastRole::Receiver));
            Ok(())
         },
      }
   }

   /// Broadcast base received: counts one completed sync.
   pub fn base_configured(&mut self, id: BroadcastId, capacity: usize) -> Result<()> {
      self.synced_to(id, capacity)?;
      self.synced += 1;
      if self.synced > self.total_syncs {
         error!("Synced {} exceeds requested {}", self.synced, self.total_syncs);
      }
      Ok(())
   }

   /// BIS link up: creates the channel's timeline.
   pub fn bis_connected(
      &mut self,
      id: BroadcastId,
      chan_id: u8,
      audio_handle: u16,
      sync_delay_us: u32,
      iso_interval_us: u32,
      factory: &dyn TimelineFactory,
   ) -> Result<()> {
      let role = self.get(id).ok_or(AudioError::NotFound)?.role;
      let chan = self.channel_mut(id, chan_id)?;
      let kind = match role {
         BroadcastRole::Source => TimelineKind::Encode,
         BroadcastRole::Receiver => TimelineKind::Decode,
      };
      let timeline = OwnedTimeline::create(
         factory,
         TimelineSpec {
            kind,
            interval_us: iso_interval_us,
            audio_handle,
         },
      )?;
      chan.audio_handle = audio_handle;
      chan.sync_delay_us = sync_delay_us;
      chan.iso_interval_us = iso_interval_us;
      chan.clock = Some(ChannelClock::Owner(timeline));
      Ok(())
   }

   pub fn bis_disconnected(&mut self, id: BroadcastId, chan_id: u8) -> Result<()> {
      self.channel_mut(id, chan_id)?.clock = None;
      Ok(())
   }

   pub fn snapshot(&self) -> serde_json::Value {
      json!({
         "sink_enabled": self.sink_enabled,
         "synced": self.synced,
         "total_syncs": self.total_syncs,
         "media_delay_us": self.media_delay_us,
         "sessions": self.sessions.iter().map(BroadcastSession::snapshot).collect::<Vec<_>>(),
      })
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::testing::{RecordingTimelines, codec};

   fn qos() -> QosConfig {
      QosConfig {
         max_sdu: 100,
         interval_us: 10000,
         delay_us: 40000,
         ..Default::default()
      }
   }

   #[test]
   fn test_only_one_session() {
      let mut reg = BroadcastRegistry::default();
      reg.create_source(1, 4).unwrap();
      assert!(reg.create_source(1, 4).is_err());
      assert!(reg.create_source(2, 4).is_err());
   }

   #[test]
   fn test_stopping_blocks_same_id() {
      let mut reg = BroadcastRegistry::default();
      reg.set_sink_enabled(true);
      reg.scan_started();
      reg.synced_to(7, 4).unwrap();
      reg.begin_stop(7).unwrap();

      assert!(matches!(reg.base_configured(7, 4), Err(AudioError::Busy)));
      assert_eq!(reg.iter().count(), 1);
      assert_eq!(reg.sync_counts(), (0, 1));

      reg.release(7).unwrap();
      reg.base_configured(7, 4).unwrap();
      assert_eq!(reg.sync_counts(), (1, 1));
   }

   #[test]
   fn test_receiver_config_dropped_when_sink_off() {
      let mut reg = BroadcastRegistry::default();
      reg.set_sink_enabled(true);
      reg.synced_to(3, 4).unwrap();
      reg.set_sink_enabled(false);
      let out = reg
         .configure(3, BroadcastRole::Receiver, 1, &codec(1, 10, 1, 100), &qos(), 4)
         .unwrap();
      assert_eq!(out, ConfigOutcome::Dropped);
      assert!(reg.get(3).is_none());
   }

   #[test]
   fn test_receiver_enable_rejected_after_sink_off() {
      let mut reg = BroadcastRegistry::default();
      reg.set_sink_enabled(true);
      reg.configure(3, BroadcastRole::Receiver, 1, &codec(1, 10, 1, 100), &qos(), 4)
         .unwrap();
      reg.set_sink_enabled(false);
      assert!(reg.enable(3, &[1], AudioContexts::MEDIA).is_err());
      assert!(reg.get(3).is_none());
   }

   #[test]
   fn test_source_stream_and_timeline() {
      let timelines = RecordingTimelines::default();
      let mut reg = BroadcastRegistry::default();
      reg.create_source(9, 4).unwrap();
      let out = reg
         .configure(9, BroadcastRole::Source, 1, &codec(1, 10, 1, 100), &qos(), 4)
         .unwrap();
      assert_eq!(out, ConfigOutcome::Configured { created: false });
      assert_eq!(reg.get(9).unwrap().channel(1).unwrap().kbps, 80);

      reg.enable(9, &[1], AudioContexts::MEDIA).unwrap();
      reg.bis_connected(9, 1, 0x80, 1200, 10000, &timelines).unwrap();
      let chan = reg.get(9).unwrap().channel(1).unwrap();
      assert_eq!(chan.state, BroadcastState::Streaming);
      assert_eq!(chan.clock.as_ref().unwrap().kind(), TimelineKind::Encode);

      reg.begin_stop(9).unwrap();
      reg.release(9).unwrap();
      assert_eq!(timelines.destroyed(), 1);
   }

   #[test]
   fn test_stop_receivers_keeps_sessions_until_release() {
      let mut reg = BroadcastRegistry::default();
      reg.set_sink_enabled(true);
      reg.scan_started();
      reg.base_configured(4, 4).unwrap();

      assert_eq!(reg.stop_receivers().as_slice(), &[4]);
      assert!(reg.get(4).unwrap().stopping);
      assert_eq!(reg.sync_counts(), (1, 1));

      reg.release(4).unwrap();
      assert_eq!(reg.sync_counts(), (0, 1));
      assert!(reg.stop_receivers().is_empty());
   }
}
