//! Subsystem lifecycle with deferred intents.
//!
//! Requests arriving while a stop is outstanding are queued and replayed
//! once, in a fixed order, when the stack confirms the stop.

use heapless::Deque;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
   audio::AudioContexts,
   error::{AudioError, Result},
   radio::{RadioControl, StopStatus},
};

/// Audio roles requested at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InitRoles {
   pub unicast_server: bool,
   pub unicast_client: bool,
   pub broadcast_source: bool,
   pub broadcast_sink: bool,
}

/// Locally advertised capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LocalCapabilities {
   pub sink_locations: u32,
   pub source_locations: u32,
   pub sink_contexts: AudioContexts,
   pub source_contexts: AudioContexts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::IntoStaticStr)]
pub enum LifecycleState {
   Uninit,
   Inited,
   Started,
   Stopping,
   Stopped,
}

/// Request held back while a stop completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Intent {
   Exit,
   Init(InitRoles),
   Caps(LocalCapabilities),
   Start,
}

impl Intent {
   /// Replay rank; lower runs first.
   const fn rank(&self) -> u8 {
      match self {
         Self::Exit => 0,
         Self::Init(_) => 1,
         Self::Caps(_) => 2,
         Self::Start => 3,
      }
   }
}

/// Outcome of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
   Stopped,
   /// Completion is reported later; deferred intents replay then.
   InProgress,
}

/// One pending intent per kind.
const MAX_PENDING: usize = 4;

pub struct Lifecycle {
   state: LifecycleState,
   paused: bool,
   pending: Deque<Intent, MAX_PENDING>,
}

impl Default for Lifecycle {
   fn default() -> Self {
      Self {
         state: LifecycleState::Uninit,
         paused: false,
         pending: Deque::new(),
      }
   }
}

impl Lifecycle {
   pub const fn state(&self) -> LifecycleState {
      self.state
   }

   pub const fn is_paused(&self) -> bool {
      self.paused
   }

   pub fn pending(&self) -> impl Iterator<Item = &Intent> {
      self.pending.iter()
   }

   /// Queues an intent, replacing a queued one of the same kind.
   fn defer(&mut self, intent: Intent) {
      self.discard(|i| i.rank() == intent.rank());
      debug!("Deferring {intent} until stop completes");
      // One slot per kind, so there is always room after discarding.
      let _ = self.pending.push_back(intent);
   }

   fn discard(&mut self, mut pred: impl FnMut(&Intent) -> bool) {
      let mut kept: Deque<Intent, MAX_PENDING> = Deque::new();
      while let Some(intent) = self.pending.pop_front() {
         if !pred(&intent) {
            let _ = kept.push_back(intent);
         }
      }
      self.pending = kept;
   }

   pub fn init(&mut self, roles: InitRoles, radio: &dyn RadioControl) -> Result<()> {
      match self.state {
         LifecycleState::Stopping => {
            self.defer(Intent::Init(roles));
            Ok(())
         },
         LifecycleState::Uninit => {
            radio.init(roles)?;
            self.state = LifecycleState::Inited;
            info!("Audio subsystem initialised");
            Ok(())
         },
         _ => Err(AudioError::Already),
      }
   }

   pub fn exit(&mut self, radio: &dyn RadioControl) -> Result<()> {
      match self.state {
         LifecycleState::Uninit => Err(AudioError::Already),
         LifecycleState::Stopping => {
            self.discard(|i| matches!(i, Intent::Init(_)));
            self.defer(Intent::Exit);
            Ok(())
         },
         LifecycleState::Started => Err(AudioError::InvalidArgument("stop before exit")),
         LifecycleState::Inited | LifecycleState::Stopped => {
            radio.exit()?;
            self.state = LifecycleState::Uninit;
            self.paused = false;
            info!("Audio subsystem exited");
            Ok(())
         },
      }
   }

   pub fn start(&mut self, radio: &dyn RadioControl) -> Result<()> {
      match self.state {
         LifecycleState::Uninit => Err(AudioError::NotReady),
         LifecycleState::Stopping => {
            self.defer(Intent::Start);
            Ok(())
         },
         LifecycleState::Started => Err(AudioError::Already),
         LifecycleState::Inited | LifecycleState::Stopped => {
            radio.start()?;
            self.state = LifecycleState::Started;
            info!("Audio subsystem started");
            Ok(())
         },
      }
   }

   pub fn stop(&mut self, radio: &dyn RadioControl) -> Result<StopOutcome> {
      match self.state {
         LifecycleState::Uninit => Err(AudioError::NotReady),
         LifecycleState::Stopping => {
            self.discard(|i| *i == Intent::Start);
            Ok(StopOutcome::InProgress)
         },
         LifecycleState::Started => match radio.stop()? {
            StopStatus::InProgress => {
               self.state = LifecycleState::Stopping;
               info!("Audio subsystem stopping");
               Ok(StopOutcome::InProgress)
            },
            StopStatus::Done => {
               self.state = LifecycleState::Stopped;
               self.paused = false;
               info!("Audio subsystem stopped");
               Ok(StopOutcome::Stopped)
            },
         },
         LifecycleState::Inited | LifecycleState::Stopped => Err(AudioError::Already),
      }
   }

   pub fn pause(&mut self, radio: &dyn RadioControl) -> Result<()> {
      if self.state != LifecycleState::Started {
         return Err(AudioError::NotReady);
      }
      if self.paused {
         return Err(AudioError::Already);
      }
      radio.pause()?;
      self.paused = true;
      Ok(())
   }

   pub fn resume(&mut self, radio: &dyn RadioControl) -> Result<()> {
      if self.state != LifecycleState::Started {
         return Err(AudioError::NotReady);
      }
      if !self.paused {
         return Err(AudioError::Already);
      }
      radio.resume()?;
      self.paused = false;
      Ok(())
   }

   pub fn set_capabilities(&mut self, caps: LocalCapabilities, radio: &dyn RadioControl) -> Result<()> {
      if self.state == LifecycleState::Stopping {
         self.defer(Intent::Caps(caps));
         return Ok(());
      }
      radio.set_capabilities(&caps)
   }

   /// Stop confirmed by the stack: replays deferred intents once, in the
   /// order exit, init, capabilities, start. Returns the replayed intents.
   pub fn stack_stopped(&mut self, radio: &dyn RadioControl) -> heapless::Vec<Intent, MAX_PENDING> {
      let mut intents: heapless::Vec<Intent, MAX_PENDING> = heapless::Vec::new();
      if self.state != LifecycleState::Stopping {
         warn!("Unexpected stop confirmation in {}", self.state);
         return intents;
      }
      self.state = LifecycleState::Stopped;
      self.paused = false;

      while let Some(intent) = self.pending.pop_front() {
         let _ = intents.push(intent);
      }
      intents.sort_unstable_by_key(Intent::rank);

      for intent in &intents {
         info!("Replaying deferred {intent}");
         let result = match *intent {
            Intent::Exit => self.exit(radio),
            Intent::Init(roles) => self.init(roles, radio),
            Intent::Caps(caps) => self.set_capabilities(caps, radio),
            Intent::Start => self.start(radio),
         };
         if let Err(e) = result {
            warn!("Deferred {intent} failed: {e}");
         }
      }
      intents
   }
}
