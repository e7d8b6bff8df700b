//! Connection registry: one entry per radio link.
//!
//! Handles admission (transport filtering, same-device dedup across classic
//! and LE, the phone-device limit) and the idle-first pre-emption policy.

use log::{debug, info, warn};
use serde_json::json;
use smallvec::SmallVec;

use crate::{
   address::Address,
   audio::{AudioContexts, Handle, MediaState, Priority, Role, Transport},
   call::CallList,
   channel::ChannelList,
   error::{AudioError, Result},
};

/// LE audio capabilities learned by a master from its peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerCapabilities {
   pub sink_locations: u32,
   pub source_locations: u32,
   pub sink_contexts: AudioContexts,
   pub source_contexts: AudioContexts,
}

/// Remote stream endpoints discovered by a master.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerEndpoints {
   pub sink_ids: SmallVec<[u8; 4]>,
   pub source_ids: SmallVec<[u8; 4]>,
}

/// Volume and microphone state reported for a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VolumeState {
   pub level: Option<u8>,
   pub muted: bool,
   pub volume_client: bool,
   pub mic_muted: bool,
   pub mic_client: bool,
}

/// One radio link.
pub struct Connection {
   pub handle: Handle,
   pub address: Address,
   pub transport: Transport,
   pub role: Role,
   /// Counts toward the phone-device limit.
   pub phone: bool,
   /// Link to the second earbud.
   pub tws: bool,
   /// LE audio service connected.
   pub lea: bool,
   pub priority: Priority,
   /// Contexts forced by the telephony layer before any stream exists.
   pub fake_contexts: AudioContexts,
   /// Paused locally on behalf of another connection.
   pub op_paused: bool,
   pub media_state: MediaState,
   pub volume: VolumeState,
   pub channels: ChannelList,
   /// Slave-side calls. LE masters share the registry's gateway list.
   pub calls: CallList,
   pub capabilities: Option<PeerCapabilities>,
   pub endpoints: Option<PeerEndpoints>,
}

impl Connection {
   pub fn new(handle: Handle, address: Address, transport: Transport, role: Role) -> Self {
      Self {
         handle,
         address,
         transport,
         role,
         phone: false,
         tws: false,
         lea: false,
         priority: Priority::None,
         fake_contexts: AudioContexts::NONE,
         op_paused: false,
         media_state: MediaState::Paused,
         volume: VolumeState::default(),
         channels: ChannelList::default(),
         calls: CallList::default(),
         capabilities: None,
         endpoints: None,
      }
   }

   pub const fn is_slave(&self) -> bool {
      matches!(self.role, Role::Slave)
   }

   pub const fn is_le_master(&self) -> bool {
      matches!(self.transport, Transport::Le) && matches!(self.role, Role::Master)
   }

   pub fn iso_connected(&self) -> bool {
      self.channels.any_iso_connected()
   }

   /// True while this link carries audio: an open classic stream or a
   /// connected isochronous stream.
   pub fn is_streaming(&self) -> bool {
      match self.transport {
         Transport::Classic => self.channels.any_active(),
         Transport::Le => self.iso_connected(),
      }
   }

   pub fn snapshot(&self) -> serde_json::Value {
      json!({
         "handle": self.handle,
         "address": self.address.to_string(),
         "transport": <&'static str>::from(self.transport),
         "role": <&'static str>::from(self.role),
         "phone": self.phone,
         "tws": self.tws,
         "lea": self.lea,
         "priority": <&'static str>::from(self.priority),
         "fake_contexts": self.fake_contexts.bits(),
         "op_paused": self.op_paused,
         "media_state": self.media_state.to_string(),
         "volume": self.volume.level,
         "channels": self.channels.iter().map(|c| c.snapshot()).collect::<Vec<_>>(),
         "calls": self.calls.iter().collect::<Vec<_>>(),
      })
   }
}

/// Device limit applied to phone-class admissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionLimit {
   /// Phone devices allowed to stay connected.
   pub devices: usize,
   /// Tolerate one extra device and pre-empt an idle one to make room.
   pub takeover: bool,
}

impl AdmissionLimit {
   pub const fn max_admitted(&self) -> usize {
      self.devices + self.takeover as usize
   }
}

/// Result of a phone-class admission check.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Admission {
   /// The peer already has a link on the other transport.
   pub same_device: bool,
   /// Links to disconnect to make room, in kick order.
   pub victims: SmallVec<[Handle; 4]>,
}

/// Active radio links in registration order.
#[derive(Default)]
pub struct ConnectionRegistry {
   conns: Vec<Connection>,
   /// Calls shared by every LE master link.
   gateway_calls: CallList,
   /// An LE link was pre-empted to make room for another device.
   take_over: bool,
}

impl ConnectionRegistry {
   pub fn len(&self) -> usize {
      self.conns.len()
   }

   pub fn is_empty(&self) -> bool {
      self.conns.is_empty()
   }

   pub fn contains(&self, handle: Handle) -> bool {
      self.get(handle).is_some()
   }

   pub fn get(&self, handle: Handle) -> Option<&Connection> {
      self.conns.iter().find(|c| c.handle == handle)
   }

   pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Connection> {
      self.conns.iter_mut().find(|c| c.handle == handle)
   }

   pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Connection> {
      self.conns.iter()
   }

   pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
      self.conns.iter_mut()
   }

   pub fn slaves(&self) -> impl DoubleEndedIterator<Item = &Connection> {
      self.conns.iter().filter(|c| c.is_slave())
   }

   pub fn le_master_count(&self) -> usize {
      self.conns.iter().filter(|c| c.is_le_master()).count()
   }

   /// Distinct peer addresses with at least one live phone-class link.
   pub fn device_count(&self) -> usize {
      let mut seen: SmallVec<[Address; 8]> = SmallVec::new();
      for conn in self.conns.iter().filter(|c| c.phone) {
         if !seen.contains(&conn.address) {
            seen.push(conn.address);
         }
      }
      seen.len()
   }

   pub const fn take_over(&self) -> bool {
      self.take_over
   }

   pub fn set_take_over(&mut self, flag: bool) {
      self.take_over = flag;
   }

   /// Appends a connection, failing with `NoMemory` at capacity.
   pub fn insert(&mut self, conn: Connection, capacity: usize) -> Result<&mut Connection> {
      if self.contains(conn.handle) {
         return Err(AudioError::InvalidArgument("handle already registered"));
      }
      if self.conns.len() >= capacity {
         return Err(AudioError::NoMemory);
      }
      self.conns.push(conn);
      let last = self.conns.len() - 1;
      Ok(&mut self.conns[last])
   }

   /// Unlinks a connection. The gateway call list goes with the last LE
   /// master.
   pub fn remove(&mut self, handle: Handle) -> Option<Connection> {
      let pos = self.conns.iter().position(|c| c.handle == handle)?;
      let conn = self.conns.remove(pos);
      if conn.is_le_master() && self.le_master_count() == 0 {
         debug!("Last LE master gone, dropping {} gateway calls", self.gateway_calls.len());
         self.gateway_calls.clear();
      }
      Some(conn)
   }

   /// Call list used for a connection: the shared gateway list for an LE
   /// master, the connection's own list for a slave.
   pub fn calls(&self, handle: Handle) -> Option<&CallList> {
      let conn = self.get(handle)?;
      if conn.is_le_master() {
         Some(&self.gateway_calls)
      } else if conn.is_slave() {
         Some(&conn.calls)
      } else {
         None
      }
   }

   pub fn calls_mut(&mut self, handle: Handle) -> Option<&mut CallList> {
      let pos = self.conns.iter().position(|c| c.handle == handle)?;
      if self.conns[pos].is_le_master() {
         Some(&mut self.gateway_calls)
      } else if self.conns[pos].is_slave() {
         Some(&mut self.conns[pos].calls)
      } else {
         None
      }
   }

   /// Checks a phone-class candidate against the device limit and picks
   /// pre-emption victims.
   ///
   /// The candidate may already be registered (an LE link turning into a
   /// phone-class link); it is never counted twice.
   pub fn admit_phone(
      &self,
      handle: Handle,
      address: Address,
      transport: Transport,
      limit: AdmissionLimit,
   ) -> Result<Admission> {
      let mut admission = Admission::default();

      for conn in self.conns.iter().filter(|c| c.phone && c.handle != handle) {
         if conn.address != address {
            continue;
         }
         if conn.transport == transport {
            warn!("{address} already connected over {transport} as {:#06x}", conn.handle);
            return Err(AudioError::InvalidArgument("device already connected on this transport"));
         }
         admission.same_device = true;
      }

      let current = self.device_count();
      if !admission.same_device && current + 1 > limit.max_admitted() {
         warn!("Device limit reached ({current}), rejecting {address}");
         return Err(AudioError::InvalidArgument("device limit reached"));
      }

      if limit.takeover {
         admission.victims = self.preemption_victims(handle, address, transport, limit);
      }
      Ok(admission)
   }

   /// Idle-first victim selection.
   ///
   /// Records every phone-class link plus the candidate, pairs links that
   /// belong to the same peer, and when the distinct-peer count reaches the
   /// admission limit kicks the first peer whose links are all idle. The
   /// candidate is part of the scan and may itself be chosen.
   fn preemption_victims(
      &self,
      handle: Handle,
      address: Address,
      transport: Transport,
      limit: AdmissionLimit,
   ) -> SmallVec<[Handle; 4]> {
      struct Record {
         handle: Handle,
         address: Address,
         streaming: bool,
      }

      let mut records: SmallVec<[Record; 8]> = self
         .conns
         .iter()
         .filter(|c| c.phone && c.handle != handle)
         .map(|c| Record {
            handle: c.handle,
            address: c.address,
            streaming: c.is_streaming(),
         })
         .collect();
      let candidate_streaming = match (transport, self.get(handle)) {
         (Transport::Le, Some(conn)) => conn.is_streaming(),
         _ => false,
      };
      records.push(Record {
         handle,
         address,
         streaming: candidate_streaming,
      });

      let associated = |i: usize| -> Option<usize> {
         (0..records.len()).find(|&j| j != i && records[j].address == records[i].address)
      };

      let mut distinct: SmallVec<[Address; 8]> = SmallVec::new();
      for r in &records {
         if !distinct.contains(&r.address) {
            distinct.push(r.address);
         }
      }
      let mut victims = SmallVec::new();
      if distinct.len() < limit.max_admitted() || distinct.len() <= 1 {
         return victims;
      }

      for (i, record) in records.iter().enumerate() {
         let pair = associated(i);
         let idle = !record.streaming && pair.is_none_or(|j| !records[j].streaming);
         if !idle {
            continue;
         }
         info!("Pre-empting idle device {} ({:#06x})", record.address, record.handle);
         victims.push(record.handle);
         if let Some(j) = pair {
            victims.push(records[j].handle);
         }
         break;
      }
      victims
   }

   pub fn snapshot(&self) -> serde_json::Value {
      json!({
         "device_count": self.device_count(),
         "take_over": self.take_over,
         "connections": self.conns.iter().map(Connection::snapshot).collect::<Vec<_>>(),
         "gateway_calls": self.gateway_calls.iter().collect::<Vec<_>>(),
      })
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::{
      audio::Direction,
      channel::{Channel, ChannelState},
      testing::{addr, codec},
   };

   fn phone(handle: Handle, address: Address, transport: Transport) -> Connection {
      let mut conn = Connection::new(handle, address, transport, Role::Slave);
      conn.phone = true;
      conn
   }

   const DUAL: AdmissionLimit = AdmissionLimit {
      devices: 2,
      takeover: true,
   };

   #[test]
   fn test_device_count_dedups_transports() {
      let mut reg = ConnectionRegistry::default();
      reg.insert(phone(1, addr(1), Transport::Classic), 8).unwrap();
      reg.insert(phone(2, addr(1), Transport::Le), 8).unwrap();
      reg.insert(phone(3, addr(2), Transport::Classic), 8).unwrap();
      assert_eq!(reg.device_count(), 2);

      reg.remove(1);
      assert_eq!(reg.device_count(), 2);
      reg.remove(2);
      assert_eq!(reg.device_count(), 1);
   }

   #[test]
   fn test_same_transport_duplicate_rejected() {
      let mut reg = ConnectionRegistry::default();
      reg.insert(phone(1, addr(1), Transport::Classic), 8).unwrap();
      assert!(reg
         .admit_phone(5, addr(1), Transport::Classic, DUAL)
         .is_err());

      let admission = reg.admit_phone(5, addr(1), Transport::Le, DUAL).unwrap();
      assert!(admission.same_device);
      assert!(admission.victims.is_empty());
   }

   #[test]
   fn test_limit_without_takeover() {
      let single = AdmissionLimit {
         devices: 1,
         takeover: false,
      };
      let mut reg = ConnectionRegistry::default();
      reg.insert(phone(1, addr(1), Transport::Classic), 8).unwrap();
      assert!(matches!(
         reg.admit_phone(2, addr(2), Transport::Classic, single),
         Err(AudioError::InvalidArgument(_))
      ));
   }

   #[test]
   fn test_preempts_idle_device_first() {
      let mut reg = ConnectionRegistry::default();
      // Device 1 is streaming on classic
      let mut busy = phone(1, addr(1), Transport::Classic);
      let mut ch = Channel::new(1, Direction::Sink, &codec(1, 10, 1, 100));
      ch.state = ChannelState::Started;
      busy.channels.insert(ch).unwrap();
      reg.insert(busy, 8).unwrap();
      // Device 2 is idle on both transports
      reg.insert(phone(2, addr(2), Transport::Classic), 8).unwrap();
      reg.insert(phone(3, addr(2), Transport::Le), 8).unwrap();

      let admission = reg.admit_phone(9, addr(3), Transport::Classic, DUAL).unwrap();
      assert_eq!(admission.victims.as_slice(), &[2, 3]);
   }

   #[test]
   fn test_no_preemption_below_limit() {
      let mut reg = ConnectionRegistry::default();
      reg.insert(phone(1, addr(1), Transport::Classic), 8).unwrap();
      let admission = reg.admit_phone(2, addr(2), Transport::Classic, DUAL).unwrap();
      assert!(admission.victims.is_empty());
   }

   #[test]
   fn test_candidate_kicked_when_everyone_streams() {
      let mut reg = ConnectionRegistry::default();
      for (handle, a) in [(1, addr(1)), (2, addr(2))] {
         let mut conn = phone(handle, a, Transport::Classic);
         let mut ch = Channel::new(1, Direction::Sink, &codec(1, 10, 1, 100));
         ch.state = ChannelState::Enabled;
         conn.channels.insert(ch).unwrap();
         reg.insert(conn, 8).unwrap();
      }
      let admission = reg.admit_phone(7, addr(3), Transport::Classic, DUAL).unwrap();
      assert_eq!(admission.victims.as_slice(), &[7]);
   }

   #[test]
   fn test_gateway_calls_outlive_all_but_last_master() {
      use crate::call::CallState;

      let mut reg = ConnectionRegistry::default();
      reg.insert(Connection::new(1, addr(1), Transport::Le, Role::Master), 8)
         .unwrap();
      reg.insert(Connection::new(2, addr(2), Transport::Le, Role::Master), 8)
         .unwrap();
      reg.calls_mut(1)
         .unwrap()
         .apply(1, CallState::Active, None, 4)
         .unwrap();
      assert_eq!(reg.calls(2).unwrap().len(), 1);

      reg.remove(1);
      assert_eq!(reg.calls(2).unwrap().len(), 1);
      reg.remove(2);
      reg.insert(Connection::new(3, addr(3), Transport::Le, Role::Master), 8)
         .unwrap();
      assert!(reg.calls(3).unwrap().is_empty());
   }

   #[test]
   fn test_capacity() {
      let mut reg = ConnectionRegistry::default();
      reg.insert(phone(1, addr(1), Transport::Classic), 1).unwrap();
      assert!(matches!(
         reg.insert(phone(2, addr(2), Transport::Classic), 1),
         Err(AudioError::NoMemory)
      ));
      assert_eq!(reg.len(), 1);
   }
}
