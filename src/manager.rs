//! Session manager: the owned context behind one critical section.
//!
//! Every radio event and application request runs inside
//! [`SessionManager::transact`]. Registries are mutated under the lock; radio
//! requests and outward events are buffered and flushed only after the lock
//! is released, requests first. The dispatcher may therefore call back into
//! the manager, and a remote pause always reaches the radio before the
//! switch it causes is reported.

use std::sync::Arc;

use crossbeam::atomic::AtomicCell;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde_json::json;
use smallvec::SmallVec;
use smol_str::SmolStr;

use crate::{
   address::Address,
   arbiter::{Arbiter, Arbitration, RemotePause},
   audio::{
      AudioContexts, CLASSIC_CALL_ENDPOINT, CLASSIC_MUSIC_ENDPOINT, CodecConfig, Direction, Handle,
      LinkKind, MediaState, PreferredQos, QosConfig, Role, StreamKind, Transport,
   },
   broadcast::{BroadcastId, BroadcastRegistry, BroadcastRole, ConfigOutcome},
   call::{CallState, CallStatus},
   channel::{Channel, ChannelState, StreamOp},
   config::Config,
   connection::{AdmissionLimit, Connection, ConnectionRegistry, PeerCapabilities, PeerEndpoints},
   error::{AudioError, Result},
   event::{AudioEvent, EventSender},
   lifecycle::{InitRoles, Lifecycle, LocalCapabilities, StopOutcome},
   radio::{CallOp, MicEvent, RadioControl, RadioEvent, RadioRequest, StreamIds, VolumeEvent},
   timeline::{
      ChannelClock, LeClock, OwnedTimeline, PeriodTrigger, StartCallback, StreamTrigger,
      SyncTrigger, TimelineFactory, TimelineKind, TimelineSpec, start_offset_us,
   },
};

/// One stream addressed by an application request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRef {
   pub handle: Handle,
   pub id: u8,
}

impl StreamRef {
   pub const fn new(handle: Handle, id: u8) -> Self {
      Self { handle, id }
   }
}

/// Snapshot readable without taking the manager lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveStatus {
   pub active: Option<Handle>,
   pub kind: StreamKind,
   pub device_count: usize,
   /// ISO interval of the active slave's first connected stream.
   pub iso_interval_us: Option<u32>,
}

/// Work deferred until the critical section ends.
#[derive(Default)]
struct Effects {
   requests: SmallVec<[RadioRequest; 4]>,
   events: SmallVec<[AudioEvent; 4]>,
}

impl Effects {
   fn request(&mut self, request: RadioRequest) {
      self.requests.push(request);
   }

   fn emit(&mut self, event: AudioEvent) {
      self.events.push(event);
   }
}

struct ManagerState {
   config: Config,
   lifecycle: Lifecycle,
   conns: ConnectionRegistry,
   arbiter: Arbiter,
   broadcast: BroadcastRegistry,
}

impl ManagerState {
   fn active_iso_interval(&self) -> Option<u32> {
      let conn = self.conns.get(self.arbiter.active()?)?;
      conn
         .channels
         .iter()
         .find(|c| c.iso_connected)
         .map(|c| c.iso_interval_us)
   }

   fn live_status(&self) -> LiveStatus {
      LiveStatus {
         active: self.arbiter.active(),
         kind: self.arbiter.reported_kind(),
         device_count: self.conns.device_count(),
         iso_interval_us: self.active_iso_interval(),
      }
   }
}

/// Owns every registry and serialises access to them.
pub struct SessionManager {
   radio: Arc<dyn RadioControl>,
   timelines: Arc<dyn TimelineFactory>,
   events: EventSender,
   state: Mutex<ManagerState>,
   live: AtomicCell<LiveStatus>,
}

impl SessionManager {
   pub fn new(
      config: Config,
      radio: Arc<dyn RadioControl>,
      timelines: Arc<dyn TimelineFactory>,
      events: EventSender,
   ) -> Self {
      let mut broadcast = BroadcastRegistry::default();
      broadcast.set_media_delay(config.media_delay_us);
      Self {
         radio,
         timelines,
         events,
         state: Mutex::new(ManagerState {
            config,
            lifecycle: Lifecycle::default(),
            conns: ConnectionRegistry::default(),
            arbiter: Arbiter::default(),
            broadcast,
         }),
         live: AtomicCell::new(LiveStatus::default()),
      }
   }

   /// Runs `op` inside the critical section, then flushes its effects.
   ///
   /// Effects are flushed even when `op` fails; a failed operation leaves
   /// the registries as they were but may still have requested a
   /// disconnect.
   fn transact<T>(&self, op: impl FnOnce(&mut Txn<'_>) -> Result<T>) -> Result<T> {
      let mut fx = Effects::default();
      let result = {
         let mut state = self.state.lock();
         let result = op(&mut Txn {
            st: &mut state,
            fx: &mut fx,
            radio: &*self.radio,
            timelines: &*self.timelines,
         });
         self.live.store(state.live_status());
         result
      };
      for request in fx.requests {
         self.radio.submit(request);
      }
      for event in fx.events {
         self.events.notify(event);
      }
      result
   }

   /// Lock-free view of the active slave.
   pub fn live(&self) -> LiveStatus {
      self.live.load()
   }

   /// Processes one inbound radio event.
   pub fn handle_event(&self, event: RadioEvent) -> Result<()> {
      self.transact(|tx| {
         let result = tx.dispatch(event);
         if let Err(e) = &result {
            warn!("Radio event rejected: {e}");
         }
         result
      })
   }

   // === Lifecycle ===

   pub fn init(&self, roles: InitRoles) -> Result<()> {
      self.transact(|tx| tx.st.lifecycle.init(roles, tx.radio))
   }

   pub fn exit(&self) -> Result<()> {
      self.transact(|tx| tx.st.lifecycle.exit(tx.radio))
   }

   pub fn start(&self) -> Result<()> {
      self.transact(|tx| tx.st.lifecycle.start(tx.radio))
   }

   pub fn stop(&self) -> Result<StopOutcome> {
      self.transact(|tx| tx.st.lifecycle.stop(tx.radio))
   }

   pub fn pause(&self) -> Result<()> {
      self.transact(|tx| tx.st.lifecycle.pause(tx.radio))
   }

   pub fn resume(&self) -> Result<()> {
      self.transact(|tx| tx.st.lifecycle.resume(tx.radio))
   }

   pub fn set_capabilities(&self, caps: LocalCapabilities) -> Result<()> {
      self.transact(|tx| tx.st.lifecycle.set_capabilities(caps, tx.radio))
   }

   /// Sets the preferred QoS pushed when acting as server.
   pub fn set_preferred_qos(&self, direction: Direction, qos: Option<PreferredQos>) {
      let _ = self.transact(|tx| {
         tx.st.config.set_preferred_qos(direction, qos);
         Ok(())
      });
   }

   // === Unicast streams ===

   pub fn config_codec(&self, handle: Handle, id: u8, direction: Direction, codec: CodecConfig) -> Result<()> {
      self.transact(|tx| {
         tx.le_conn(handle)?;
         tx.fx.request(RadioRequest::ConfigCodec {
            handle,
            id,
            direction,
            codec,
         });
         Ok(())
      })
   }

   pub fn config_qos(&self, handle: Handle, id: u8, qos: QosConfig) -> Result<()> {
      self.transact(|tx| {
         let conn = tx.le_conn(handle)?;
         conn.channels.get(id).ok_or(AudioError::NotFound)?;
         tx.fx.request(RadioRequest::ConfigQos { handle, id, qos });
         Ok(())
      })
   }

   pub fn enable(&self, streams: &[StreamRef], contexts: AudioContexts) -> Result<()> {
      self.transact(|tx| {
         let (handle, ids) = tx.le_group(streams)?;
         tx.fx.request(RadioRequest::Enable {
            handle,
            ids,
            contexts,
         });
         Ok(())
      })
   }

   pub fn update(&self, streams: &[StreamRef], contexts: AudioContexts) -> Result<()> {
      self.transact(|tx| {
         let (handle, ids) = tx.le_group(streams)?;
         tx.fx.request(RadioRequest::Update {
            handle,
            ids,
            contexts,
         });
         Ok(())
      })
   }

   pub fn disable(&self, streams: &[StreamRef]) -> Result<()> {
      self.transact(|tx| {
         let (handle, ids) = tx.le_group(streams)?;
         tx.fx.request(RadioRequest::Disable { handle, ids });
         Ok(())
      })
   }

   pub fn release(&self, streams: &[StreamRef]) -> Result<()> {
      self.transact(|tx| {
         let (handle, ids) = tx.le_group(streams)?;
         tx.fx.request(RadioRequest::Release { handle, ids });
         Ok(())
      })
   }

   /// Local receiver is ready on the given streams.
   pub fn sink_start(&self, streams: &[StreamRef]) -> Result<()> {
      self.transact(|tx| {
         let (handle, ids) = tx.group(streams, Some(Direction::Sink))?;
         tx.fx.request(RadioRequest::SinkStart { handle, ids });
         Ok(())
      })
   }

   pub fn sink_stop(&self, streams: &[StreamRef]) -> Result<()> {
      self.transact(|tx| {
         let (handle, ids) = tx.group(streams, Some(Direction::Sink))?;
         tx.fx.request(RadioRequest::SinkStop { handle, ids });
         Ok(())
      })
   }

   /// Binds the local sink path to a stream.
   pub fn bind_sink(&self, handle: Handle, id: u8) -> Result<()> {
      self.transact(|tx| tx.bind(handle, id, Direction::Sink))
   }

   /// Binds the local source path to a stream.
   pub fn bind_source(&self, handle: Handle, id: u8) -> Result<()> {
      self.transact(|tx| tx.bind(handle, id, Direction::Source))
   }

   /// Binds the local sink path to the classic music or call endpoint.
   pub fn bind_classic_sink(&self, handle: Handle, call: bool) -> Result<()> {
      let id = if call {
         CLASSIC_CALL_ENDPOINT
      } else {
         CLASSIC_MUSIC_ENDPOINT
      };
      self.transact(|tx| {
         let conn = tx.st.conns.get(handle).ok_or(AudioError::NotFound)?;
         if conn.transport != Transport::Classic {
            return Err(AudioError::Unsupported);
         }
         tx.bind(handle, id, Direction::Sink)
      })
   }

   // === Calls ===

   /// Places an outgoing call. `None` targets the active slave.
   pub fn originate(&self, handle: Option<Handle>, uri: &str) -> Result<()> {
      self.transact(|tx| {
         let handle = tx.target(handle)?;
         tx.le_conn(handle)?;
         if uri.is_empty() {
            return Err(AudioError::InvalidArgument("empty call URI"));
         }
         tx.fx.request(RadioRequest::Originate {
            handle,
            uri: SmolStr::new(uri),
         });
         Ok(())
      })
   }

   pub fn accept(&self, handle: Option<Handle>) -> Result<()> {
      self.transact(|tx| tx.call_control(handle, CallOp::Accept))
   }

   pub fn hold(&self, handle: Option<Handle>) -> Result<()> {
      self.transact(|tx| tx.call_control(handle, CallOp::Hold))
   }

   pub fn retrieve(&self, handle: Option<Handle>) -> Result<()> {
      self.transact(|tx| tx.call_control(handle, CallOp::Retrieve))
   }

   pub fn terminate(&self, handle: Option<Handle>) -> Result<()> {
      self.transact(|tx| tx.call_control(handle, CallOp::Terminate))
   }

   pub fn call_status(&self, handle: Option<Handle>) -> Result<CallStatus> {
      self.transact(|tx| {
         let handle = tx.target(handle)?;
         let calls = tx.st.conns.calls(handle).ok_or(AudioError::Unsupported)?;
         Ok(calls.status())
      })
   }

   // === Broadcast ===

   pub fn source_create(&self, id: BroadcastId) -> Result<()> {
      self.transact(|tx| {
         let capacity = tx.st.config.capacity.broadcast_sessions;
         tx.st.broadcast.create_source(id, capacity)?;
         tx.fx.request(RadioRequest::BroadcastCreate(id));
         tx.disconnect_spare();
         Ok(())
      })
   }

   pub fn source_enable(&self, id: BroadcastId, chans: &[u8], contexts: AudioContexts) -> Result<()> {
      self.transact(|tx| {
         tx.source(id)?;
         tx.fx.request(RadioRequest::BroadcastEnable {
            id,
            ids: StreamIds::from_slice(chans),
            contexts,
         });
         Ok(())
      })
   }

   pub fn source_update(&self, id: BroadcastId, chans: &[u8], contexts: AudioContexts) -> Result<()> {
      self.transact(|tx| {
         tx.source(id)?;
         tx.fx.request(RadioRequest::BroadcastUpdate {
            id,
            ids: StreamIds::from_slice(chans),
            contexts,
         });
         Ok(())
      })
   }

   pub fn source_disable(&self, id: BroadcastId) -> Result<()> {
      self.transact(|tx| {
         tx.source(id)?;
         tx.st.broadcast.begin_stop(id)?;
         tx.fx.request(RadioRequest::BroadcastDisable(id));
         Ok(())
      })
   }

   pub fn source_release(&self, id: BroadcastId) -> Result<()> {
      self.transact(|tx| {
         tx.source(id)?;
         tx.st.broadcast.begin_stop(id)?;
         tx.fx.request(RadioRequest::BroadcastRelease(id));
         Ok(())
      })
   }

   /// Enters broadcast receiver mode.
   pub fn sink_init(&self) -> Result<()> {
      self.transact(|tx| {
         if tx.st.broadcast.sink_enabled() {
            return Err(AudioError::Already);
         }
         tx.st.broadcast.set_sink_enabled(true);
         info!("Broadcast sink mode on");
         tx.disconnect_spare();
         Ok(())
      })
   }

   /// Leaves broadcast receiver mode and releases every receiver session.
   pub fn sink_exit(&self) -> Result<()> {
      self.transact(|tx| {
         if !tx.st.broadcast.sink_enabled() {
            return Err(AudioError::Already);
         }
         tx.st.broadcast.set_sink_enabled(false);
         let (_, total) = tx.st.broadcast.sync_counts();
         if total > 0 {
            tx.st.broadcast.scan_stopped();
            tx.fx.request(RadioRequest::ScanStop);
         }
         // Sessions are dropped when the radio confirms each release
         for id in tx.st.broadcast.stop_receivers() {
            tx.fx.request(RadioRequest::BroadcastRelease(id));
         }
         info!("Broadcast sink mode off");
         Ok(())
      })
   }

   pub fn scan_start(&self) -> Result<()> {
      self.transact(|tx| {
         if !tx.st.broadcast.sink_enabled() {
            return Err(AudioError::InvalidArgument("sink mode disabled"));
         }
         tx.st.broadcast.scan_started();
         tx.fx.request(RadioRequest::ScanStart);
         Ok(())
      })
   }

   pub fn scan_stop(&self) -> Result<()> {
      self.transact(|tx| {
         tx.st.broadcast.scan_stopped();
         tx.fx.request(RadioRequest::ScanStop);
         Ok(())
      })
   }

   /// Syncs to a broadcast, creating its receiver session.
   pub fn sink_sync(&self, id: BroadcastId) -> Result<()> {
      self.transact(|tx| {
         let capacity = tx.st.config.capacity.broadcast_sessions;
         tx.st.broadcast.synced_to(id, capacity)?;
         tx.fx.request(RadioRequest::SyncTo(id));
         Ok(())
      })
   }

   pub fn sink_release(&self, id: BroadcastId) -> Result<()> {
      self.transact(|tx| {
         tx.st.broadcast.begin_stop(id)?;
         tx.fx.request(RadioRequest::BroadcastRelease(id));
         Ok(())
      })
   }

   pub fn set_media_delay(&self, delay_us: u32) {
      let _ = self.transact(|tx| {
         tx.st.broadcast.set_media_delay(delay_us);
         Ok(())
      });
   }

   // === Queries ===

   pub fn stream_kind(&self) -> StreamKind {
      self.state.lock().arbiter.reported_kind()
   }

   pub fn role(&self, handle: Handle) -> Result<Role> {
      let state = self.state.lock();
      state
         .conns
         .get(handle)
         .map(|c| c.role)
         .ok_or(AudioError::NotFound)
   }

   pub fn transport(&self, handle: Handle) -> Result<Transport> {
      let state = self.state.lock();
      state
         .conns
         .get(handle)
         .map(|c| c.transport)
         .ok_or(AudioError::NotFound)
   }

   pub fn device_count(&self) -> usize {
      self.state.lock().conns.device_count()
   }

   pub fn active_iso_interval(&self) -> Option<u32> {
      self.state.lock().active_iso_interval()
   }

   /// Stream ids of the active slave, used to restore its streams.
   pub fn active_channels(&self) -> StreamIds {
      let state = self.state.lock();
      state
         .arbiter
         .active()
         .and_then(|h| state.conns.get(h))
         .map(|c| c.channels.iter().map(|ch| ch.id).collect())
         .unwrap_or_default()
   }

   pub fn take_over(&self) -> bool {
      self.state.lock().conns.take_over()
   }

   pub fn set_take_over(&self, flag: bool) {
      self.state.lock().conns.set_take_over(flag);
   }

   /// Disconnects every transport of the inactive spare.
   pub fn disconnect_inactive(&self) -> Result<()> {
      self.transact(|tx| {
         if tx.disconnect_spare() {
            Ok(())
         } else {
            Err(AudioError::NotFound)
         }
      })
   }

   /// Diagnostic snapshot of the whole manager.
   pub fn dump(&self) -> serde_json::Value {
      let state = self.state.lock();
      json!({
         "lifecycle": <&'static str>::from(state.lifecycle.state()),
         "paused": state.lifecycle.is_paused(),
         "pending": state.lifecycle.pending().map(ToString::to_string).collect::<Vec<_>>(),
         "active": state.arbiter.active(),
         "inactive": state.arbiter.inactive(),
         "stream_kind": <&'static str>::from(state.arbiter.reported_kind()),
         "connections": state.conns.snapshot(),
         "broadcast": state.broadcast.snapshot(),
      })
   }

   // === Triggers ===
   //
   // Callbacks run while the manager lock is held and must not call back
   // into the manager.

   pub fn set_stream_trigger(&self, handle: Handle, id: u8, cb: Arc<dyn StreamTrigger>) -> Result<()> {
      self.with_channel(handle, id, |ch| ch.triggers.set_stream(cb))
   }

   pub fn set_period_trigger(&self, handle: Handle, id: u8, cb: Arc<dyn PeriodTrigger>) -> Result<()> {
      self.with_channel(handle, id, |ch| ch.triggers.set_period(cb))
   }

   pub fn set_sync_trigger(&self, handle: Handle, id: u8, cb: Arc<dyn SyncTrigger>) -> Result<()> {
      self.with_channel(handle, id, |ch| ch.triggers.set_sync(cb))
   }

   pub fn set_start_callback(&self, handle: Handle, id: u8, cb: Arc<dyn StartCallback>) -> Result<()> {
      self.with_channel(handle, id, |ch| ch.triggers.set_start(cb))
   }

   pub fn set_broadcast_start_callback(
      &self,
      id: BroadcastId,
      chan: u8,
      cb: Arc<dyn StartCallback>,
   ) -> Result<()> {
      let mut state = self.state.lock();
      let ch = state
         .broadcast
         .get_mut(id)
         .and_then(|s| s.channel_mut(chan))
         .ok_or(AudioError::NotFound)?;
      ch.triggers.set_start(cb)
   }

   /// Makes stream `id` share the timeline of stream `donor` on the same
   /// connection.
   pub fn bond_channel(&self, handle: Handle, id: u8, donor: u8) -> Result<()> {
      let mut state = self.state.lock();
      let conn = state.conns.get_mut(handle).ok_or(AudioError::NotFound)?;
      let bonded = conn
         .channels
         .get(donor)
         .ok_or(AudioError::NotFound)?
         .clock
         .as_ref()
         .ok_or(AudioError::NotReady)?
         .bond();
      let ch = conn.channels.get_mut(id).ok_or(AudioError::NotFound)?;
      if ch.clock.is_some() {
         return Err(AudioError::Already);
      }
      debug!("{handle:#06x}/{id} bonded to stream {donor}");
      ch.clock = Some(ChannelClock::Bonded(bonded));
      Ok(())
   }

   /// Radio clock tick for a unicast stream.
   pub fn stream_tick(&self, handle: Handle, id: u8, clock: LeClock) -> Result<()> {
      let state = self.state.lock();
      let ch = state
         .conns
         .get(handle)
         .and_then(|c| c.channels.get(id))
         .ok_or(AudioError::NotFound)?;
      if let Some(cb) = ch.triggers.stream() {
         cb.on_stream(handle, id, clock);
      }
      if let Some(timeline) = &ch.clock {
         timeline.trigger(clock.time_us());
      }
      ch.triggers.fire_start(|| {
         start_offset_us(
            ch.sync_delay_us,
            ch.qos.delay_us,
            0,
            ch.iso_interval_us,
            clock.ce_offset_us,
         )
      });
      Ok(())
   }

   /// Radio clock tick for a broadcast stream.
   pub fn broadcast_tick(&self, id: BroadcastId, chan: u8, clock: LeClock) -> Result<()> {
      let state = self.state.lock();
      let media_delay = state.broadcast.media_delay_us();
      let ch = state
         .broadcast
         .get(id)
         .and_then(|s| s.channel(chan))
         .ok_or(AudioError::NotFound)?;
      if let Some(timeline) = &ch.clock {
         timeline.trigger(clock.time_us());
      }
      ch.triggers.fire_start(|| {
         start_offset_us(
            ch.sync_delay_us,
            ch.delay_us,
            media_delay,
            ch.iso_interval_us,
            clock.ce_offset_us,
         )
      });
      Ok(())
   }

   pub fn period_tick(&self, handle: Handle, id: u8, timestamp_us: u64) -> Result<()> {
      let state = self.state.lock();
      let ch = state
         .conns
         .get(handle)
         .and_then(|c| c.channels.get(id))
         .ok_or(AudioError::NotFound)?;
      if let Some(cb) = ch.triggers.period() {
         cb.on_period(timestamp_us);
      }
      Ok(())
   }

   pub fn sync_tick(&self, handle: Handle, id: u8, timestamp_us: u64) -> Result<()> {
      let state = self.state.lock();
      let ch = state
         .conns
         .get(handle)
         .and_then(|c| c.channels.get(id))
         .ok_or(AudioError::NotFound)?;
      if let Some(cb) = ch.triggers.sync() {
         cb.on_sync(timestamp_us);
      }
      Ok(())
   }

   fn with_channel(
      &self,
      handle: Handle,
      id: u8,
      f: impl FnOnce(&mut Channel) -> Result<()>,
   ) -> Result<()> {
      let mut state = self.state.lock();
      let ch = state
         .conns
         .get_mut(handle)
         .and_then(|c| c.channels.get_mut(id))
         .ok_or(AudioError::NotFound)?;
      f(ch)
   }
}

/// One critical section in progress.
struct Txn<'a> {
   st: &'a mut ManagerState,
   fx: &'a mut Effects,
   radio: &'a dyn RadioControl,
   timelines: &'a dyn TimelineFactory,
}

impl Txn<'_> {
   fn dispatch(&mut self, event: RadioEvent) -> Result<()> {
      match event {
         RadioEvent::Connected {
            handle,
            address,
            transport,
            role,
            link,
            peer_earbud,
         } => self.connected(handle, address, transport, role, link, peer_earbud),
         RadioEvent::Disconnected { handle, reason } => self.disconnected(handle, reason),
         RadioEvent::TwsMarked { handle } => self.tws_marked(handle),
         RadioEvent::UnicastServiceConnected { handle } => self.unicast_service_connected(handle),
         RadioEvent::CapabilitiesDiscovered { handle, caps } => self.capabilities(handle, caps),
         RadioEvent::EndpointsDiscovered { handle, endpoints } => self.endpoints(handle, endpoints),

         RadioEvent::IsoConnected {
            handle,
            id,
            audio_handle,
            sync_delay_us,
            iso_interval_us,
         } => self.iso_connected(handle, id, audio_handle, sync_delay_us, iso_interval_us),
         RadioEvent::IsoDisconnected { handle, id } => self.iso_disconnected(handle, id),

         RadioEvent::CodecConfigured {
            handle,
            id,
            direction,
            codec,
         } => self.codec_configured(handle, id, direction, &codec),
         RadioEvent::PreferredQos { handle, id } => {
            self.step(handle, id, StreamOp::PreferQos)?;
            self.notify(handle, AudioEvent::PreferredQos { handle, id });
            Ok(())
         },
         RadioEvent::QosConfigured { handle, id, qos } => {
            let ch = self.step(handle, id, StreamOp::Qos)?;
            ch.apply_qos(&qos);
            debug!(
               "{handle:#06x}/{id}: {} ch, sdu {} every {}us, {} kbps",
               ch.channels, ch.sdu, ch.interval_us, ch.kbps
            );
            self.notify(handle, AudioEvent::QosConfigured { handle, id });
            Ok(())
         },
         RadioEvent::Enabled {
            handle,
            id,
            contexts,
         } => self.enabled(handle, id, contexts),
         RadioEvent::Updated {
            handle,
            id,
            contexts,
         } => {
            self.step(handle, id, StreamOp::Update)?.contexts = contexts;
            self.refresh(handle);
            self.notify(handle, AudioEvent::Updated {
               handle,
               id,
               contexts,
            });
            Ok(())
         },
         RadioEvent::Disabled { handle, id } => {
            // Contexts survive a disable so a short pause keeps its class.
            self.step(handle, id, StreamOp::Disable)?;
            self.notify(handle, AudioEvent::Disabled { handle, id });
            Ok(())
         },
         RadioEvent::Started { handle, id } => {
            self.step(handle, id, StreamOp::Start)?;
            self.refresh(handle);
            self.notify(handle, AudioEvent::Started { handle, id });
            Ok(())
         },
         RadioEvent::Stopped { handle, id } => self.stopped(handle, id),
         RadioEvent::Released { handle, id } => self.released(handle, id),
         RadioEvent::FakeContexts { handle, contexts } => {
            self.conn_mut(handle)?.fake_contexts = contexts;
            self.refresh(handle);
            Ok(())
         },

         RadioEvent::Call {
            handle,
            index,
            state,
            uri,
         } => self.call(handle, index, state, uri.as_deref()),
         RadioEvent::MediaState { handle, playing } => self.media_state(handle, playing),
         RadioEvent::Volume { handle, event } => self.volume(handle, event),
         RadioEvent::Mic { handle, event } => self.mic(handle, event),

         RadioEvent::StackStopped => {
            let replayed = self.st.lifecycle.stack_stopped(self.radio);
            info!("Stack stopped, replayed {} deferred requests", replayed.len());
            Ok(())
         },

         RadioEvent::BroadcastConfigured {
            id,
            role,
            chan,
            codec,
            qos,
         } => self.broadcast_configured(id, role, chan, &codec, &qos),
         RadioEvent::BroadcastEnabled {
            id,
            chans,
            contexts,
         } => {
            self.st.broadcast.enable(id, &chans, contexts)?;
            self.fx.emit(AudioEvent::BroadcastEnabled { id });
            Ok(())
         },
         RadioEvent::BroadcastUpdated {
            id,
            chans,
            contexts,
         } => self.st.broadcast.update(id, &chans, contexts),
         RadioEvent::BroadcastDisabled { id, chans } => {
            self.st.broadcast.disable(id, &chans)?;
            self.fx.emit(AudioEvent::BroadcastDisabled { id });
            Ok(())
         },
         RadioEvent::BroadcastReleased { id } => {
            drop(self.st.broadcast.release(id)?);
            self.fx.emit(AudioEvent::BroadcastReleased { id });
            Ok(())
         },
         RadioEvent::BaseConfigured { id } => {
            let capacity = self.st.config.capacity.broadcast_sessions;
            self.st.broadcast.base_configured(id, capacity)
         },
         RadioEvent::BroadcastSynced { id } => {
            let capacity = self.st.config.capacity.broadcast_sessions;
            self.st.broadcast.synced_to(id, capacity)?;
            self.fx.emit(AudioEvent::BroadcastSynced { id });
            Ok(())
         },
         RadioEvent::BisConnected {
            id,
            chan,
            audio_handle,
            sync_delay_us,
            iso_interval_us,
         } => self.st.broadcast.bis_connected(
            id,
            chan,
            audio_handle,
            sync_delay_us,
            iso_interval_us,
            self.timelines,
         ),
         RadioEvent::BisDisconnected { id, chan } => self.st.broadcast.bis_disconnected(id, chan),
      }
   }

   // === Helpers ===

   fn conn_mut(&mut self, handle: Handle) -> Result<&mut Connection> {
      self.st.conns.get_mut(handle).ok_or(AudioError::NotFound)
   }

   fn le_conn(&self, handle: Handle) -> Result<&Connection> {
      let conn = self.st.conns.get(handle).ok_or(AudioError::NotFound)?;
      if conn.transport != Transport::Le {
         return Err(AudioError::Unsupported);
      }
      Ok(conn)
   }

   /// Applies a stream operation to an existing channel.
   fn step(&mut self, handle: Handle, id: u8, op: StreamOp) -> Result<&mut Channel> {
      let conn = self.st.conns.get_mut(handle).ok_or(AudioError::NotFound)?;
      let classic = conn.transport == Transport::Classic;
      let ch = conn.channels.get_mut(id).ok_or(AudioError::NotFound)?;
      let from = ch.state;
      match ch.transition(op, classic) {
         Ok(to) => debug!("{handle:#06x}/{id}: {from} -> {to}"),
         Err(e) => {
            warn!("{handle:#06x}/{id}: {op} rejected in {from}");
            return Err(e);
         },
      }
      Ok(ch)
   }

   /// Forwards a per-connection event if the connection is the current one.
   fn notify(&mut self, handle: Handle, event: AudioEvent) {
      if self.st.arbiter.should_notify(&self.st.conns, handle) {
         self.fx.emit(event);
      } else {
         debug!("Suppressed {event:?}");
      }
   }

   fn apply(&mut self, arb: Arbitration) {
      if let Some(pause) = arb.pause {
         self.fx.request(match pause {
            RemotePause::Avrcp(h) => RadioRequest::AvrcpPause(h),
            RemotePause::MediaControl(h) => RadioRequest::MediaControlPause(h),
         });
      }
      if let Some((kind, handle)) = arb.switched {
         self.fx.emit(AudioEvent::ActiveChanged { handle, kind });
      }
   }

   fn refresh(&mut self, handle: Handle) {
      let stop_another = self.st.config.stop_another_when_one_playing;
      let st = &mut *self.st;
      let arb = st.arbiter.refresh(&mut st.conns, handle, stop_another);
      self.apply(arb);
   }

   fn update_active(&mut self, handle: Handle, freed: bool) {
      let stop_another = self.st.config.stop_another_when_one_playing;
      let st = &mut *self.st;
      let arb = st
         .arbiter
         .update_active(&mut st.conns, handle, freed, stop_another);
      self.apply(arb);
   }

   fn admission_limit(&self) -> AdmissionLimit {
      // Broadcast audio leaves room for a single phone.
      let devices = if self.st.broadcast.sink_enabled() || self.st.broadcast.has_source() {
         1
      } else {
         self.st.config.max_phone_devices
      };
      AdmissionLimit {
         devices,
         takeover: self.st.config.phone_takeover,
      }
   }

   /// Kicks pre-emption victims and maintains the inactive spare after a
   /// phone-class admission.
   fn settle_admission(&mut self, handle: Handle, victims: &[Handle]) {
      for &victim in victims {
         if self
            .st
            .conns
            .get(victim)
            .is_some_and(|c| c.transport == Transport::Le)
         {
            self.st.conns.set_take_over(true);
         }
         info!("Disconnecting {victim:#06x} to admit {handle:#06x}");
         self.fx.request(RadioRequest::Disconnect(victim));
      }

      if self.st.conns.device_count() <= 1 {
         self.st.arbiter.set_inactive(None);
         return;
      }
      if let Some(active) = self.st.arbiter.active()
         && active != handle
         && let Some(conn) = self.st.conns.get(active)
         && !conn.channels.any_active()
         && !conn.iso_connected()
      {
         info!("{active:#06x} idle, keeping it as the inactive spare");
         self.st.arbiter.set_inactive(Some(active));
      }
   }

   /// Requests a disconnect of every link to the inactive spare's peer.
   fn disconnect_spare(&mut self) -> bool {
      let Some(spare) = self.st.arbiter.inactive() else {
         return false;
      };
      let Some(address) = self.st.conns.get(spare).map(|c| c.address) else {
         return false;
      };
      info!("Disconnecting inactive spare {address}");
      for conn in self.st.conns.iter().filter(|c| c.address == address) {
         self.fx.request(RadioRequest::Disconnect(conn.handle));
      }
      self.st.arbiter.set_inactive(None);
      true
   }

   fn target(&self, handle: Option<Handle>) -> Result<Handle> {
      let handle = handle
         .or(self.st.arbiter.active())
         .ok_or(AudioError::NotFound)?;
      if !self.st.conns.contains(handle) {
         return Err(AudioError::NotFound);
      }
      Ok(handle)
   }

   /// Validates a stream group: one connection, known stream ids and, on
   /// LE links, the direction expected for `local`. Classic endpoints are
   /// not direction-checked.
   fn group(&self, streams: &[StreamRef], local: Option<Direction>) -> Result<(Handle, StreamIds)> {
      let first = streams
         .first()
         .ok_or(AudioError::InvalidArgument("empty stream group"))?;
      if streams.iter().any(|s| s.handle != first.handle) {
         return Err(AudioError::InvalidArgument("stream group spans connections"));
      }
      let conn = self.st.conns.get(first.handle).ok_or(AudioError::NotFound)?;
      let mut ids = StreamIds::new();
      for s in streams {
         let ch = conn.channels.get(s.id).ok_or(AudioError::NotFound)?;
         if let Some(local) = local
            && conn.transport == Transport::Le
            && ch.direction != Direction::expected(conn.role, local)
         {
            return Err(AudioError::InvalidArgument("stream direction mismatch"));
         }
         ids.push(s.id);
      }
      Ok((first.handle, ids))
   }

   fn le_group(&self, streams: &[StreamRef]) -> Result<(Handle, StreamIds)> {
      let (handle, ids) = self.group(streams, None)?;
      self.le_conn(handle)?;
      Ok((handle, ids))
   }

   fn bind(&mut self, handle: Handle, id: u8, local: Direction) -> Result<()> {
      let conn = self.conn_mut(handle)?;
      let (transport, role) = (conn.transport, conn.role);
      let ch = conn.channels.get_mut(id).ok_or(AudioError::NotFound)?;
      if transport == Transport::Le && ch.direction != Direction::expected(role, local) {
         return Err(AudioError::InvalidArgument("stream direction mismatch"));
      }
      match local {
         Direction::Sink => ch.sink_bound = true,
         Direction::Source => ch.source_bound = true,
      }
      debug!("{handle:#06x}/{id}: local {local} bound");
      Ok(())
   }

   fn source(&self, id: BroadcastId) -> Result<()> {
      let session = self.st.broadcast.get(id).ok_or(AudioError::NotFound)?;
      if session.role != BroadcastRole::Source {
         return Err(AudioError::InvalidArgument("not a broadcast source"));
      }
      if session.stopping {
         return Err(AudioError::Busy);
      }
      Ok(())
   }

   fn call_control(&mut self, handle: Option<Handle>, op: CallOp) -> Result<()> {
      let handle = self.target(handle)?;
      let calls = self
         .st
         .conns
         .calls(handle)
         .ok_or(AudioError::Unsupported)?;
      let target = match op {
         CallOp::Accept => calls.accept_target(),
         CallOp::Hold => calls.hold_target(),
         CallOp::Retrieve => calls.retrieve_target(),
         CallOp::Terminate => calls.terminate_target(),
      };
      let index = target.map(|c| c.index).ok_or(AudioError::NotFound)?;
      info!("{op} call {index} on {handle:#06x}");
      self
         .fx
         .request(RadioRequest::CallControl { handle, op, index });
      Ok(())
   }

   // === Links ===

   fn connected(
      &mut self,
      handle: Handle,
      address: Address,
      transport: Transport,
      role: Role,
      link: LinkKind,
      peer_earbud: bool,
   ) -> Result<()> {
      if self.st.conns.contains(handle) {
         debug!("{handle:#06x} already registered");
         return Ok(());
      }
      let transport = match link {
         LinkKind::Sco => return Err(AudioError::InvalidArgument("SCO links are not managed")),
         LinkKind::Snoop => Transport::Classic,
         LinkKind::Acl => transport,
      };

      let mut conn = Connection::new(handle, address, transport, role);
      match transport {
         Transport::Classic => {
            if peer_earbud {
               return Err(AudioError::InvalidArgument("classic peer-earbud link"));
            }
            conn.role = Role::Slave;
            conn.phone = true;
         },
         Transport::Le => conn.tws = peer_earbud,
      }

      let admission = if conn.phone {
         match self
            .st
            .conns
            .admit_phone(handle, address, transport, self.admission_limit())
         {
            Ok(admission) => Some(admission),
            Err(e) => {
               self.fx.request(RadioRequest::Disconnect(handle));
               return Err(e);
            },
         }
      } else {
         None
      };

      let slave = conn.is_slave();
      let capacity = self.st.config.capacity.connections;
      if let Err(e) = self.st.conns.insert(conn, capacity) {
         self.fx.request(RadioRequest::Disconnect(handle));
         return Err(e);
      }
      info!("{address} connected over {transport} as {handle:#06x}");

      let announce = !(slave && self.st.arbiter.active().is_some());
      if let Some(admission) = admission {
         self.settle_admission(handle, &admission.victims);
      }
      if slave {
         self.update_active(handle, false);
      }
      if announce {
         self.fx.emit(AudioEvent::Connected { handle });
      }
      Ok(())
   }

   fn unicast_service_connected(&mut self, handle: Handle) -> Result<()> {
      let conn = self.st.conns.get(handle).ok_or(AudioError::NotFound)?;
      if conn.tws {
         return Err(AudioError::InvalidArgument("peer-earbud link"));
      }
      let (address, transport) = (conn.address, conn.transport);
      let admission = match self
         .st
         .conns
         .admit_phone(handle, address, transport, self.admission_limit())
      {
         Ok(admission) => admission,
         Err(e) => {
            self.fx.request(RadioRequest::Disconnect(handle));
            return Err(e);
         },
      };

      let conn = self.conn_mut(handle)?;
      conn.phone = true;
      conn.lea = true;
      conn.media_state = MediaState::Inactive;
      info!("{address} LE audio service up on {handle:#06x}");
      self.settle_admission(handle, &admission.victims);
      Ok(())
   }

   fn tws_marked(&mut self, handle: Handle) -> Result<()> {
      let conn = self.conn_mut(handle)?;
      if conn.transport == Transport::Classic {
         self.fx.request(RadioRequest::Disconnect(handle));
         return Err(AudioError::InvalidArgument("classic peer-earbud link"));
      }
      conn.tws = true;
      conn.phone = false;
      debug!("{handle:#06x} marked as peer earbud");
      Ok(())
   }

   fn disconnected(&mut self, handle: Handle, reason: u8) -> Result<()> {
      let conn = self.st.conns.remove(handle).ok_or(AudioError::NotFound)?;
      let slave = conn.is_slave();
      let report = !(slave && self.st.arbiter.active().is_some_and(|a| a != handle));
      info!(
         "{} disconnected from {handle:#06x} (reason {reason:#04x})",
         conn.address
      );
      // Dropping the connection releases its channels and their timelines.
      drop(conn);

      if slave {
         self.update_active(handle, true);
      }
      self.st.arbiter.forget(handle);
      if self.st.conns.device_count() <= 1 {
         self.st.arbiter.set_inactive(None);
      }
      if report {
         self.fx.emit(AudioEvent::Disconnected { handle, reason });
      }
      Ok(())
   }

   fn capabilities(&mut self, handle: Handle, caps: PeerCapabilities) -> Result<()> {
      let conn = self.conn_mut(handle)?;
      if !conn.is_le_master() {
         return Err(AudioError::Unsupported);
      }
      conn.capabilities = Some(caps);
      Ok(())
   }

   fn endpoints(&mut self, handle: Handle, endpoints: PeerEndpoints) -> Result<()> {
      let conn = self.conn_mut(handle)?;
      if !conn.is_le_master() {
         return Err(AudioError::Unsupported);
      }
      debug!(
         "{handle:#06x}: {} sink / {} source endpoints",
         endpoints.sink_ids.len(),
         endpoints.source_ids.len()
      );
      conn.endpoints = Some(endpoints);
      Ok(())
   }

   // === Streams ===

   fn codec_configured(
      &mut self,
      handle: Handle,
      id: u8,
      direction: Direction,
      codec: &CodecConfig,
   ) -> Result<()> {
      let capacity = self.st.config.capacity.channels_per_connection;
      let conn = self.conn_mut(handle)?;
      let classic = conn.transport == Transport::Classic;

      if let Some(ch) = conn.channels.get_mut(id) {
         ch.transition(StreamOp::Codec, classic)?;
         ch.apply_codec(direction, codec);
      } else {
         if conn.channels.len() >= capacity {
            warn!("{handle:#06x}: no room for stream {id}");
            return Err(AudioError::NoMemory);
         }
         conn.channels.insert(Channel::new(id, direction, codec))?;
      }
      debug!(
         "{handle:#06x}/{id}: codec {:#04x} {}kHz {direction}, specific {}",
         codec.format,
         codec.sample_rate_khz,
         hex::encode(&codec.specific)
      );

      if !conn.is_slave() {
         return Ok(());
      }
      let media_unknown = conn.media_state == MediaState::Inactive;
      if !classic {
         if let Some(qos) = self.st.config.preferred_qos(direction) {
            self
               .fx
               .request(RadioRequest::PushPreferredQos { handle, id, qos });
         }
         if media_unknown {
            self.fx.request(RadioRequest::ReadMediaState(handle));
         }
      }
      self.notify(handle, AudioEvent::CodecConfigured { handle, id });
      Ok(())
   }

   fn enabled(&mut self, handle: Handle, id: u8, contexts: AudioContexts) -> Result<()> {
      let conn = self.conn_mut(handle)?;
      let (transport, role) = (conn.transport, conn.role);
      let ch = self.step(handle, id, StreamOp::Enable)?;
      ch.contexts = contexts;
      // Receiver start for our own sink so the peer's setup is not stalled.
      if transport == Transport::Le && ch.direction == Direction::expected(role, Direction::Sink) {
         self.fx.request(RadioRequest::SinkStart {
            handle,
            ids: StreamIds::from_slice(&[id]),
         });
      }

      self.refresh(handle);
      if self.st.arbiter.active() == Some(handle) && self.st.arbiter.inactive() == Some(handle) {
         self.st.arbiter.set_inactive(None);
      }
      self.notify(handle, AudioEvent::Enabled {
         handle,
         id,
         contexts,
      });
      Ok(())
   }

   fn stopped(&mut self, handle: Handle, id: u8) -> Result<()> {
      self.step(handle, id, StreamOp::Stop)?.contexts = AudioContexts::NONE;
      let conn = self.conn_mut(handle)?;
      if conn.op_paused && !conn.channels.any_active() {
         debug!("{handle:#06x}: last stream stopped, clearing local pause");
         conn.op_paused = false;
      }
      self.refresh(handle);
      self.notify(handle, AudioEvent::Stopped { handle, id });
      Ok(())
   }

   fn released(&mut self, handle: Handle, id: u8) -> Result<()> {
      let ch = self.step(handle, id, StreamOp::Release)?;
      if ch.iso_connected {
         debug!("{handle:#06x}/{id}: release deferred until ISO disconnect");
         return Ok(());
      }
      self.release_channel(handle, id)
   }

   /// Frees a channel. Bindings go first, the free and the notification
   /// last, after the connection-level accounting.
   fn release_channel(&mut self, handle: Handle, id: u8) -> Result<()> {
      let conn = self.conn_mut(handle)?;
      conn
         .channels
         .get_mut(id)
         .ok_or(AudioError::NotFound)?
         .unbind();
      let ch = conn.channels.remove(id).ok_or(AudioError::NotFound)?;
      if !conn.channels.any_active() {
         conn.op_paused = false;
      }
      let le_slave = conn.transport == Transport::Le && conn.is_slave();
      self.refresh(handle);

      drop(ch);
      debug!("{handle:#06x}/{id}: released");
      self.notify(handle, AudioEvent::Released { handle, id });
      if le_slave {
         self
            .fx
            .request(RadioRequest::ReleaseComplete { handle, id });
      }
      Ok(())
   }

   fn iso_connected(
      &mut self,
      handle: Handle,
      id: u8,
      audio_handle: u16,
      sync_delay_us: u32,
      iso_interval_us: u32,
   ) -> Result<()> {
      let timelines = self.timelines;
      let conn = self.conn_mut(handle)?;
      let role = conn.role;
      let donor = conn
         .channels
         .clock_donor(id)
         .and_then(|c| c.clock.as_ref())
         .map(ChannelClock::bond);
      let ch = conn.channels.get_mut(id).ok_or(AudioError::NotFound)?;

      let clock = match donor {
         Some(bonded) => ChannelClock::Bonded(bonded),
         None => {
            let kind = match (role, ch.direction) {
               (Role::Master, Direction::Source) | (Role::Slave, Direction::Sink) => {
                  TimelineKind::Decode
               },
               _ => TimelineKind::Encode,
            };
            ChannelClock::Owner(OwnedTimeline::create(
               timelines,
               TimelineSpec {
                  kind,
                  interval_us: iso_interval_us,
                  audio_handle,
               },
            )?)
         },
      };
      debug!(
         "{handle:#06x}/{id}: ISO up on {audio_handle:#06x}, timeline {} ({} refs)",
         clock.id(),
         clock.ref_count()
      );
      ch.clock = Some(clock);
      ch.audio_handle = audio_handle;
      ch.sync_delay_us = sync_delay_us;
      ch.iso_interval_us = iso_interval_us;
      ch.iso_connected = true;
      self.notify(handle, AudioEvent::IsoConnected { handle, id });
      Ok(())
   }

   fn iso_disconnected(&mut self, handle: Handle, id: u8) -> Result<()> {
      let conn = self.conn_mut(handle)?;
      let ch = conn.channels.get_mut(id).ok_or(AudioError::NotFound)?;
      ch.clock = None;
      ch.iso_connected = false;
      let releasing = ch.state == ChannelState::Releasing;
      self.notify(handle, AudioEvent::IsoDisconnected { handle, id });
      if releasing {
         self.release_channel(handle, id)?;
      }
      Ok(())
   }

   // === Calls, media, volume ===

   fn call(&mut self, handle: Handle, index: u8, state: CallState, uri: Option<&str>) -> Result<()> {
      let capacity = self.st.config.capacity.calls;
      let classic = self
         .st
         .conns
         .get(handle)
         .ok_or(AudioError::NotFound)?
         .transport
         == Transport::Classic;
      let calls = self
         .st
         .conns
         .calls_mut(handle)
         .ok_or(AudioError::Unsupported)?;
      calls.apply(index, state, uri, capacity)?;
      info!("{handle:#06x}: call {index} {state}");

      if classic && state == CallState::Ended {
         self.conn_mut(handle)?.fake_contexts = AudioContexts::NONE;
         self.refresh(handle);
      }
      self.notify(handle, AudioEvent::Call {
         handle,
         index,
         state,
      });
      Ok(())
   }

   fn media_state(&mut self, handle: Handle, playing: bool) -> Result<()> {
      let active = self.st.arbiter.active();
      let conn = self.conn_mut(handle)?;
      if conn.is_slave() {
         conn.media_state = if playing {
            MediaState::Playing
         } else {
            MediaState::Paused
         };
         if playing && conn.op_paused && active != Some(handle) {
            debug!("{handle:#06x} resumed remotely, clearing local pause");
            conn.op_paused = false;
            self.refresh(handle);
         }
      }
      self.notify(handle, AudioEvent::MediaState { handle, playing });
      Ok(())
   }

   fn volume(&mut self, handle: Handle, event: VolumeEvent) -> Result<()> {
      let conn = self.conn_mut(handle)?;
      match event {
         VolumeEvent::Value(level) => {
            conn.volume.level = Some(level);
            if self.st.arbiter.active() == Some(handle) {
               self.fx.emit(AudioEvent::VolumeChanged { handle, level });
            }
         },
         VolumeEvent::Mute | VolumeEvent::Unmute => {
            let muted = event == VolumeEvent::Mute;
            conn.volume.muted = muted;
            self.notify(handle, AudioEvent::VolumeMuted { handle, muted });
         },
         VolumeEvent::ClientConnected => conn.volume.volume_client = true,
      }
      Ok(())
   }

   fn mic(&mut self, handle: Handle, event: MicEvent) -> Result<()> {
      let conn = self.conn_mut(handle)?;
      match event {
         MicEvent::Mute | MicEvent::Unmute => {
            let muted = event == MicEvent::Mute;
            conn.volume.mic_muted = muted;
            self.notify(handle, AudioEvent::MicMuted { handle, muted });
         },
         MicEvent::ClientConnected => conn.volume.mic_client = true,
      }
      Ok(())
   }

   // === Broadcast ===

   fn broadcast_configured(
      &mut self,
      id: BroadcastId,
      role: BroadcastRole,
      chan: u8,
      codec: &CodecConfig,
      qos: &QosConfig,
   ) -> Result<()> {
      let capacity = self.st.config.capacity.broadcast_sessions;
      match self
         .st
         .broadcast
         .configure(id, role, chan, codec, qos, capacity)?
      {
         ConfigOutcome::Configured { created } => {
            if created && role == BroadcastRole::Source {
               self.disconnect_spare();
            }
            self.fx.emit(AudioEvent::BroadcastConfigured { id, chan });
         },
         ConfigOutcome::Dropped => {},
      }
      Ok(())
   }
}
