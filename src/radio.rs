//! Boundary with the radio stack beneath the manager.
//!
//! [`RadioControl`] carries requests down; [`RadioEvent`] carries protocol
//! events up. Requests are fire-and-forget: their completions arrive later as
//! events of their own.

use smallvec::SmallVec;
use smol_str::SmolStr;

use crate::{
   address::Address,
   audio::{AudioContexts, CodecConfig, Direction, Handle, LinkKind, PreferredQos, QosConfig, Role, Transport},
   broadcast::{BroadcastId, BroadcastRole},
   call::CallState,
   connection::{PeerCapabilities, PeerEndpoints},
   error::Result,
   lifecycle::{InitRoles, LocalCapabilities},
};

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStatus {
   Done,
   /// Completion follows as [`RadioEvent::StackStopped`].
   InProgress,
}

/// Call control operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CallOp {
   Accept,
   Hold,
   Retrieve,
   Terminate,
}

/// Stream ids on one connection.
pub type StreamIds = SmallVec<[u8; 4]>;

/// Fire-and-forget request for the radio stack.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioRequest {
   // Links
   Disconnect(Handle),
   AvrcpPause(Handle),
   MediaControlPause(Handle),
   ReadMediaState(Handle),

   // Unicast streams
   ConfigCodec { handle: Handle, id: u8, direction: Direction, codec: CodecConfig },
   ConfigQos { handle: Handle, id: u8, qos: QosConfig },
   PushPreferredQos { handle: Handle, id: u8, qos: PreferredQos },
   Enable { handle: Handle, ids: StreamIds, contexts: AudioContexts },
   Update { handle: Handle, ids: StreamIds, contexts: AudioContexts },
   Disable { handle: Handle, ids: StreamIds },
   Release { handle: Handle, ids: StreamIds },
   /// Local teardown of a released stream finished.
   ReleaseComplete { handle: Handle, id: u8 },
   SinkStart { handle: Handle, ids: StreamIds },
   SinkStop { handle: Handle, ids: StreamIds },

   // Calls
   Originate { handle: Handle, uri: SmolStr },
   CallControl { handle: Handle, op: CallOp, index: u8 },

   // Broadcast
   BroadcastCreate(BroadcastId),
   BroadcastEnable { id: BroadcastId, ids: StreamIds, contexts: AudioContexts },
   BroadcastUpdate { id: BroadcastId, ids: StreamIds, contexts: AudioContexts },
   BroadcastDisable(BroadcastId),
   BroadcastRelease(BroadcastId),
   ScanStart,
   ScanStop,
   SyncTo(BroadcastId),
}

/// Downward collaborator.
///
/// Lifecycle calls are answered synchronously and may run inside the
/// manager's critical section, so implementations must not block and must
/// not call back into the manager.
pub trait RadioControl: Send + Sync {
   fn init(&self, roles: InitRoles) -> Result<()>;
   fn exit(&self) -> Result<()>;
   fn start(&self) -> Result<()>;
   fn stop(&self) -> Result<StopStatus>;
   fn pause(&self) -> Result<()>;
   fn resume(&self) -> Result<()>;
   fn set_capabilities(&self, caps: &LocalCapabilities) -> Result<()>;

   /// Queues a request. Never blocks.
   fn submit(&self, request: RadioRequest);
}

/// Volume events from the rendering-control service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeEvent {
   Value(u8),
   Mute,
   Unmute,
   ClientConnected,
}

/// Microphone events from the input-control service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicEvent {
   Mute,
   Unmute,
   ClientConnected,
}

/// Inbound protocol events, processed strictly in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
   // Links
   Connected {
      handle: Handle,
      address: Address,
      transport: Transport,
      role: Role,
      link: LinkKind,
      /// Link to the second earbud of a pair.
      peer_earbud: bool,
   },
   Disconnected { handle: Handle, reason: u8 },
   TwsMarked { handle: Handle },
   UnicastServiceConnected { handle: Handle },
   CapabilitiesDiscovered { handle: Handle, caps: PeerCapabilities },
   EndpointsDiscovered { handle: Handle, endpoints: PeerEndpoints },

   // Isochronous links
   IsoConnected { handle: Handle, id: u8, audio_handle: u16, sync_delay_us: u32, iso_interval_us: u32 },
   IsoDisconnected { handle: Handle, id: u8 },

   // Streams
   CodecConfigured { handle: Handle, id: u8, direction: Direction, codec: CodecConfig },
   PreferredQos { handle: Handle, id: u8 },
   QosConfigured { handle: Handle, id: u8, qos: QosConfig },
   Enabled { handle: Handle, id: u8, contexts: AudioContexts },
   Updated { handle: Handle, id: u8, contexts: AudioContexts },
   Disabled { handle: Handle, id: u8 },
   Started { handle: Handle, id: u8 },
   Stopped { handle: Handle, id: u8 },
   Released { handle: Handle, id: u8 },
   FakeContexts { handle: Handle, contexts: AudioContexts },

   // Calls, media, volume
   Call { handle: Handle, index: u8, state: CallState, uri: Option<SmolStr> },
   MediaState { handle: Handle, playing: bool },
   Volume { handle: Handle, event: VolumeEvent },
   Mic { handle: Handle, event: MicEvent },

   // Lifecycle
   StackStopped,

   // Broadcast
   BroadcastConfigured { id: BroadcastId, role: BroadcastRole, chan: u8, codec: CodecConfig, qos: QosConfig },
   BroadcastEnabled { id: BroadcastId, chans: StreamIds, contexts: AudioContexts },
   BroadcastUpdated { id: BroadcastId, chans: StreamIds, contexts: AudioContexts },
   BroadcastDisabled { id: BroadcastId, chans: StreamIds },
   BroadcastReleased { id: BroadcastId },
   BaseConfigured { id: BroadcastId },
   BroadcastSynced { id: BroadcastId },
   BisConnected { id: BroadcastId, chan: u8, audio_handle: u16, sync_delay_us: u32, iso_interval_us: u32 },
   BisDisconnected { id: BroadcastId, chan: u8 },
}
