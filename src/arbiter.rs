//! Slave priority arbitration.
//!
//! Computes each slave connection's priority class from its channels and
//! picks the single active slave. Decisions come back as [`Arbitration`]
//! values so the caller can issue remote pauses and notifications after the
//! registries are consistent.

use log::{debug, info};

use crate::{
   audio::{AudioContexts, Handle, MediaState, Priority, StreamKind, Transport},
   connection::{Connection, ConnectionRegistry},
};

/// Remote pause issued to the slave losing the active role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemotePause {
   /// AVRCP pause on a classic link.
   Avrcp(Handle),
   /// Media-control pause on an LE link.
   MediaControl(Handle),
}

/// Side effects of one arbitration pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Arbitration {
   pub pause: Option<RemotePause>,
   /// New (kind, handle) report when it differs from the last one.
   pub switched: Option<(StreamKind, Option<Handle>)>,
}

impl Arbitration {
   fn merge(&mut self, other: Self) {
      if other.pause.is_some() {
         self.pause = other.pause;
      }
      if other.switched.is_some() {
         self.switched = other.switched;
      }
   }
}

/// Priority class implied by a slave connection's current state.
pub fn compute_priority(conn: &Connection) -> Priority {
   if conn.op_paused {
      return Priority::None;
   }
   if conn.fake_contexts.intersects(AudioContexts::CALL) {
      return Priority::Call;
   }
   let mut prio = Priority::None;
   for chan in conn.channels.iter().filter(|c| c.is_active()) {
      if chan.contexts.intersects(AudioContexts::CALL) {
         return Priority::Call;
      }
      if !chan.contexts.is_empty() {
         prio = Priority::Media;
      }
   }
   prio
}

/// Active/inactive slave selection state.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Arbiter {
   active: Option<Handle>,
   /// Deliberate spare in dual-phone setups.
   inactive: Option<Handle>,
   reported: (StreamKind, Option<Handle>),
}

impl Arbiter {
   pub const fn active(&self) -> Option<Handle> {
      self.active
   }

   pub const fn inactive(&self) -> Option<Handle> {
      self.inactive
   }

   pub const fn reported_kind(&self) -> StreamKind {
      self.reported.0
   }

   pub fn set_inactive(&mut self, handle: Option<Handle>) {
      if self.inactive != handle {
         debug!("Inactive slave: {handle:?}");
      }
      self.inactive = handle;
   }

   /// Re-evaluates a slave's priority; on change re-runs active selection.
   pub fn refresh(
      &mut self,
      reg: &mut ConnectionRegistry,
      handle: Handle,
      stop_another: bool,
   ) -> Arbitration {
      let Some(conn) = reg.get_mut(handle) else {
         return Arbitration::default();
      };
      if !conn.is_slave() {
         return Arbitration::default();
      }
      let prio = compute_priority(conn);
      if prio == conn.priority {
         return Arbitration::default();
      }
      info!("{:#06x} priority {} -> {prio}", conn.handle, conn.priority);
      conn.priority = prio;
      self.update_active(reg, handle, false, stop_another)
   }

   /// Picks the active slave after `handle` changed priority or, with
   /// `freed`, after it was removed from the registry.
   pub fn update_active(
      &mut self,
      reg: &mut ConnectionRegistry,
      handle: Handle,
      freed: bool,
      stop_another: bool,
   ) -> Arbitration {
      let mut out = Arbitration::default();

      if freed {
         if self.active != Some(handle) {
            self.clear_spare_if_active();
            return out;
         }
         self.active = highest_slave(reg, None);
      } else if self.active.is_none() {
         self.active = Some(handle);
      } else {
         let new = highest_slave(reg, Some(handle));
         if new != self.active {
            if let (Some(old), Some(new)) = (self.active, new) {
               out.pause = displace(reg, old, new, stop_another);
            }
            info!("Active slave {:?} -> {new:?}", self.active);
            self.active = new;
         }
      }

      out.merge(self.report(reg));
      self.clear_spare_if_active();
      out
   }

   fn clear_spare_if_active(&mut self) {
      if self.active.is_some() && self.active == self.inactive {
         self.set_inactive(None);
      }
   }

   /// Records the active slave's stream kind; returns it when it changed.
   fn report(&mut self, reg: &ConnectionRegistry) -> Arbitration {
      let kind = self
         .active
         .and_then(|h| reg.get(h))
         .map_or(StreamKind::None, |c| {
            StreamKind::classify(c.transport, c.tws, c.priority)
         });
      let next = (kind, self.active);
      if next == self.reported {
         return Arbitration::default();
      }
      info!("Reporting {kind} on {:?}", self.active);
      self.reported = next;
      Arbitration {
         pause: None,
         switched: Some(next),
      }
   }

   /// Connection whose events are forwarded upward.
   pub fn current(&self, reg: &ConnectionRegistry) -> Option<Handle> {
      if reg.device_count() > 1
         && let Some(spare) = self.inactive
      {
         return reg
            .slaves()
            .rev()
            .find(|c| c.handle != spare)
            .map(|c| c.handle);
      }
      self
         .active
         .or_else(|| reg.slaves().next_back().map(|c| c.handle))
   }

   /// Whether an event on `handle` may be forwarded upward.
   pub fn should_notify(&self, reg: &ConnectionRegistry, handle: Handle) -> bool {
      match reg.get(handle) {
         Some(conn) if conn.is_slave() => self.current(reg) == Some(handle),
         _ => true,
      }
   }

   /// Forgets a handle that left the registry.
   pub fn forget(&mut self, handle: Handle) {
      if self.inactive == Some(handle) {
         self.set_inactive(None);
      }
   }
}

/// Slave with the strictly highest priority in registration order.
///
/// A `candidate` starts the scan holding its own priority, so it wins ties
/// against connections that were already at that level.
pub fn highest_slave(reg: &ConnectionRegistry, candidate: Option<Handle>) -> Option<Handle> {
   let mut best = candidate
      .and_then(|h| reg.get(h))
      .map(|c| (Some(c.handle), c.priority))
      .unwrap_or((None, Priority::None));
   for conn in reg.slaves() {
      if conn.priority > best.1 {
         best = (Some(conn.handle), conn.priority);
      }
   }
   best.0
}

/// Pauses the slave losing the active role so two devices never render at
/// once. The displaced slave must be playing media; the new one may be in a
/// call or playing media.
fn displace(
   reg: &mut ConnectionRegistry,
   old: Handle,
   new: Handle,
   stop_another: bool,
) -> Option<RemotePause> {
   if !stop_another {
      return None;
   }
   let new_conn = reg.get(new)?;
   let (new_transport, new_prio) = (new_conn.transport, new_conn.priority);
   let old_conn = reg.get_mut(old)?;
   if old_conn.priority != Priority::Media || new_prio == Priority::None {
      return None;
   }
   match (old_conn.transport, new_transport) {
      (Transport::Classic, Transport::Le) => {
         old_conn.priority = Priority::None;
         info!("Pausing classic {old:#06x} for {new:#06x}");
         Some(RemotePause::Avrcp(old))
      },
      (Transport::Le, _) => {
         old_conn.priority = Priority::None;
         old_conn.media_state = MediaState::Inactive;
         old_conn.op_paused = true;
         info!("Pausing LE {old:#06x} for {new:#06x}");
         Some(RemotePause::MediaControl(old))
      },
      _ => None,
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::{
      audio::{Direction, Role},
      channel::{Channel, ChannelState},
      testing::{addr, codec},
   };

   fn slave(reg: &mut ConnectionRegistry, handle: Handle, transport: Transport) {
      let mut conn = Connection::new(handle, addr(handle as u8), transport, Role::Slave);
      conn.phone = true;
      reg.insert(conn, 8).unwrap();
   }

   fn play(reg: &mut ConnectionRegistry, handle: Handle, id: u8, contexts: AudioContexts) {
      let conn = reg.get_mut(handle).unwrap();
      let mut ch = Channel::new(id, Direction::Sink, &codec(1, 10, 1, 100));
      ch.state = ChannelState::Started;
      ch.contexts = contexts;
      conn.channels.insert(ch).unwrap();
   }

   #[test]
   fn test_priority_rules() {
      let mut conn = Connection::new(1, addr(1), Transport::Le, Role::Slave);
      assert_eq!(compute_priority(&conn), Priority::None);

      let mut ch = Channel::new(1, Direction::Sink, &codec(1, 10, 1, 100));
      ch.contexts = AudioContexts::MEDIA;
      conn.channels.insert(ch).unwrap();
      // Not enabled yet
      assert_eq!(compute_priority(&conn), Priority::None);

      conn.channels.get_mut(1).unwrap().state = ChannelState::Enabled;
      assert_eq!(compute_priority(&conn), Priority::Media);

      conn.fake_contexts = AudioContexts::CONVERSATIONAL;
      assert_eq!(compute_priority(&conn), Priority::Call);

      conn.op_paused = true;
      assert_eq!(compute_priority(&conn), Priority::None);
   }

   #[test]
   fn test_switch_reported_once() {
      let mut reg = ConnectionRegistry::default();
      let mut arb = Arbiter::default();
      slave(&mut reg, 1, Transport::Le);
      play(&mut reg, 1, 1, AudioContexts::MEDIA);

      let out = arb.refresh(&mut reg, 1, true);
      assert_eq!(out.switched, Some((StreamKind::LeMusic, Some(1))));
      assert_eq!(arb.active(), Some(1));

      // Same state again: nothing to report
      let out = arb.update_active(&mut reg, 1, false, true);
      assert_eq!(out, Arbitration::default());
   }

   #[test]
   fn test_classic_media_paused_by_le_call() {
      let mut reg = ConnectionRegistry::default();
      let mut arb = Arbiter::default();
      slave(&mut reg, 1, Transport::Classic);
      slave(&mut reg, 2, Transport::Le);
      play(&mut reg, 1, 1, AudioContexts::MEDIA);
      arb.refresh(&mut reg, 1, true);
      assert_eq!(arb.active(), Some(1));

      play(&mut reg, 2, 1, AudioContexts::CONVERSATIONAL);
      let out = arb.refresh(&mut reg, 2, true);
      assert_eq!(out.pause, Some(RemotePause::Avrcp(1)));
      assert_eq!(out.switched, Some((StreamKind::LeCall, Some(2))));
      assert_eq!(reg.get(1).unwrap().priority, Priority::None);
   }

   #[test]
   fn test_classic_media_paused_by_le_media_only() {
      let mut reg = ConnectionRegistry::default();
      let mut arb = Arbiter::default();
      slave(&mut reg, 1, Transport::Classic);
      slave(&mut reg, 2, Transport::Le);
      slave(&mut reg, 3, Transport::Classic);
      play(&mut reg, 1, 1, AudioContexts::MEDIA);
      arb.refresh(&mut reg, 1, true);

      // Classic to classic switches without a pause
      play(&mut reg, 3, 1, AudioContexts::MEDIA);
      let out = arb.refresh(&mut reg, 3, true);
      assert_eq!(out.pause, None);
      assert_eq!(arb.active(), Some(3));
      assert_eq!(reg.get(1).unwrap().priority, Priority::Media);

      play(&mut reg, 2, 1, AudioContexts::MEDIA);
      let out = arb.refresh(&mut reg, 2, true);
      assert_eq!(out.pause, Some(RemotePause::Avrcp(3)));
      assert_eq!(out.switched, Some((StreamKind::LeMusic, Some(2))));
   }

   #[test]
   fn test_le_media_displaced_becomes_op_paused() {
      let mut reg = ConnectionRegistry::default();
      let mut arb = Arbiter::default();
      slave(&mut reg, 1, Transport::Le);
      slave(&mut reg, 2, Transport::Le);
      play(&mut reg, 1, 1, AudioContexts::MEDIA);
      arb.refresh(&mut reg, 1, true);

      // Equal class: the connection that just changed wins the tie
      play(&mut reg, 2, 1, AudioContexts::MEDIA);
      let out = arb.refresh(&mut reg, 2, true);
      assert_eq!(out.pause, Some(RemotePause::MediaControl(1)));
      let old = reg.get(1).unwrap();
      assert!(old.op_paused);
      assert_eq!(old.media_state, MediaState::Inactive);
      assert_eq!(compute_priority(old), Priority::None);
   }

   #[test]
   fn test_no_pause_when_disabled_by_config() {
      let mut reg = ConnectionRegistry::default();
      let mut arb = Arbiter::default();
      slave(&mut reg, 1, Transport::Classic);
      slave(&mut reg, 2, Transport::Le);
      play(&mut reg, 1, 1, AudioContexts::MEDIA);
      arb.refresh(&mut reg, 1, false);
      play(&mut reg, 2, 1, AudioContexts::CONVERSATIONAL);
      let out = arb.refresh(&mut reg, 2, false);
      assert_eq!(out.pause, None);
      assert_eq!(arb.active(), Some(2));
   }

   #[test]
   fn test_removal_of_active_falls_back() {
      let mut reg = ConnectionRegistry::default();
      let mut arb = Arbiter::default();
      slave(&mut reg, 1, Transport::Le);
      slave(&mut reg, 2, Transport::Le);
      play(&mut reg, 1, 1, AudioContexts::MEDIA);
      play(&mut reg, 2, 1, AudioContexts::CONVERSATIONAL);
      arb.refresh(&mut reg, 1, false);
      arb.refresh(&mut reg, 2, false);
      assert_eq!(arb.active(), Some(2));

      reg.remove(2);
      let out = arb.update_active(&mut reg, 2, true, false);
      assert_eq!(arb.active(), Some(1));
      assert_eq!(out.switched, Some((StreamKind::LeMusic, Some(1))));
   }

   #[test]
   fn test_current_skips_spare() {
      let mut reg = ConnectionRegistry::default();
      let mut arb = Arbiter::default();
      slave(&mut reg, 1, Transport::Classic);
      slave(&mut reg, 2, Transport::Classic);
      assert_eq!(arb.current(&reg), Some(2));

      arb.set_inactive(Some(2));
      assert_eq!(arb.current(&reg), Some(1));
      assert!(arb.should_notify(&reg, 1));
      assert!(!arb.should_notify(&reg, 2));
   }
}
