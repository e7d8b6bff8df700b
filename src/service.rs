//! Async front end for the session manager.
//!
//! Radio events and application commands are funnelled through one inbox and
//! applied in arrival order by a single actor task. Replies travel back over
//! oneshot channels.

use std::{sync::Arc, time::Duration};

use log::{debug, info};
use smol_str::SmolStr;
use tokio::{
   select,
   sync::{
      mpsc::{self, error::TrySendError},
      oneshot,
   },
   time::{self, MissedTickBehavior},
};

use crate::{
   audio::{AudioContexts, CodecConfig, Direction, Handle, PreferredQos, QosConfig},
   broadcast::BroadcastId,
   error::{AudioError, Result},
   lifecycle::{InitRoles, LocalCapabilities, StopOutcome},
   manager::{LiveStatus, SessionManager, StreamRef},
   radio::RadioEvent,
};

/// Channel buffer size
const CHANNEL_BUFFER_SIZE: usize = 1000;
/// Interval between status lines in the log
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// Application requests accepted by the service.
#[derive(Debug, Clone)]
pub enum AppCommand {
   // Lifecycle
   Init(InitRoles),
   Exit,
   Start,
   Pause,
   Resume,
   SetCapabilities(LocalCapabilities),
   SetPreferredQos(Direction, Option<PreferredQos>),

   // Streams
   ConfigCodec(StreamRef, Direction, CodecConfig),
   ConfigQos(StreamRef, QosConfig),
   Enable(Vec<StreamRef>, AudioContexts),
   Update(Vec<StreamRef>, AudioContexts),
   Disable(Vec<StreamRef>),
   Release(Vec<StreamRef>),
   SinkStart(Vec<StreamRef>),
   SinkStop(Vec<StreamRef>),

   // Calls, `None` targets the active slave
   Originate(Option<Handle>, SmolStr),
   Accept(Option<Handle>),
   Hold(Option<Handle>),
   Retrieve(Option<Handle>),
   Terminate(Option<Handle>),

   // Broadcast
   SourceCreate(BroadcastId),
   SourceEnable(BroadcastId, Vec<u8>, AudioContexts),
   SourceUpdate(BroadcastId, Vec<u8>, AudioContexts),
   SourceDisable(BroadcastId),
   SourceRelease(BroadcastId),
   SinkInit,
   SinkExit,
   ScanStart,
   ScanStop,
   SinkSync(BroadcastId),
   SinkRelease(BroadcastId),
   SetMediaDelay(u32),

   DisconnectInactive,
}

#[derive(Debug)]
enum ServiceCommand {
   Radio(RadioEvent),
   App(AppCommand, oneshot::Sender<Result<()>>),
   Stop(oneshot::Sender<Result<StopOutcome>>),
   Dump(oneshot::Sender<serde_json::Value>),
}

/// Handle to the running service.
pub struct AudioService {
   inbox: mpsc::Sender<ServiceCommand>,
   manager: Arc<SessionManager>,
}

impl AudioService {
   /// Spawns the actor on the current runtime.
   pub fn new(manager: Arc<SessionManager>) -> Self {
      let (command_tx, command_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      tokio::spawn(
         ServiceActor {
            manager: Arc::clone(&manager),
            inbox: command_rx,
         }
         .run(),
      );
      Self {
         inbox: command_tx,
         manager,
      }
   }

   /// Queues a radio event. Completion is not awaited.
   pub async fn radio_event(&self, event: RadioEvent) -> Result<()> {
      self
         .inbox
         .send(ServiceCommand::Radio(event))
         .await
         .map_err(|_| AudioError::ServiceShutdown)
   }

   /// Queues a radio event from a non-async context.
   pub fn post_radio_event(&self, event: RadioEvent) -> Result<()> {
      self
         .inbox
         .try_send(ServiceCommand::Radio(event))
         .map_err(|e| match e {
            TrySendError::Full(_) => AudioError::Busy,
            TrySendError::Closed(_) => AudioError::ServiceShutdown,
         })
   }

   pub async fn command(&self, cmd: AppCommand) -> Result<()> {
      let (tx, rx) = oneshot::channel();
      self
         .inbox
         .send(ServiceCommand::App(cmd, tx))
         .await
         .map_err(|_| AudioError::ServiceShutdown)?;
      rx.await.map_err(|_| AudioError::ServiceShutdown)?
   }

   pub async fn stop(&self) -> Result<StopOutcome> {
      let (tx, rx) = oneshot::channel();
      self
         .inbox
         .send(ServiceCommand::Stop(tx))
         .await
         .map_err(|_| AudioError::ServiceShutdown)?;
      rx.await.map_err(|_| AudioError::ServiceShutdown)?
   }

   /// Diagnostic snapshot, taken after every previously queued command.
   pub async fn dump(&self) -> Result<serde_json::Value> {
      let (tx, rx) = oneshot::channel();
      self
         .inbox
         .send(ServiceCommand::Dump(tx))
         .await
         .map_err(|_| AudioError::ServiceShutdown)?;
      rx.await.map_err(|_| AudioError::ServiceShutdown)
   }

   pub fn live(&self) -> LiveStatus {
      self.manager.live()
   }

   pub fn manager(&self) -> &Arc<SessionManager> {
      &self.manager
   }
}

// === Service Actor ===

struct ServiceActor {
   manager: Arc<SessionManager>,
   inbox: mpsc::Receiver<ServiceCommand>,
}

impl ServiceActor {
   async fn run(mut self) {
      info!("Audio service starting up");

      let mut status_interval = time::interval(STATUS_INTERVAL);
      status_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

      loop {
         select! {
            _ = status_interval.tick() => self.log_status(),
            cmd = self.inbox.recv() => {
               let Some(cmd) = cmd else {
                  info!("Audio service shutting down");
                  break;
               };
               self.handle_command(cmd);
            }
         }
      }
   }

   fn log_status(&self) {
      let live = self.manager.live();
      debug!(
         "Status: {} device(s), active {:?} ({}), ISO interval {:?}",
         live.device_count, live.active, live.kind, live.iso_interval_us
      );
   }

   fn handle_command(&self, cmd: ServiceCommand) {
      match cmd {
         ServiceCommand::Radio(event) => {
            // Rejections are logged by the manager
            let _ = self.manager.handle_event(event);
         },
         ServiceCommand::App(cmd, reply) => {
            let _ = reply.send(self.apply(cmd));
         },
         ServiceCommand::Stop(reply) => {
            let _ = reply.send(self.manager.stop());
         },
         ServiceCommand::Dump(reply) => {
            let _ = reply.send(self.manager.dump());
         },
      }
   }

   fn apply(&self, cmd: AppCommand) -> Result<()> {
      let m = &self.manager;
      match cmd {
         AppCommand::Init(roles) => m.init(roles),
         AppCommand::Exit => m.exit(),
         AppCommand::Start => m.start(),
         AppCommand::Pause => m.pause(),
         AppCommand::Resume => m.resume(),
         AppCommand::SetCapabilities(caps) => m.set_capabilities(caps),
         AppCommand::SetPreferredQos(direction, qos) => {
            m.set_preferred_qos(direction, qos);
            Ok(())
         },

         AppCommand::ConfigCodec(s, direction, codec) => m.config_codec(s.handle, s.id, direction, codec),
         AppCommand::ConfigQos(s, qos) => m.config_qos(s.handle, s.id, qos),
         AppCommand::Enable(streams, contexts) => m.enable(&streams, contexts),
         AppCommand::Update(streams, contexts) => m.update(&streams, contexts),
         AppCommand::Disable(streams) => m.disable(&streams),
         AppCommand::Release(streams) => m.release(&streams),
         AppCommand::SinkStart(streams) => m.sink_start(&streams),
         AppCommand::SinkStop(streams) => m.sink_stop(&streams),

         AppCommand::Originate(handle, uri) => m.originate(handle, &uri),
         AppCommand::Accept(handle) => m.accept(handle),
         AppCommand::Hold(handle) => m.hold(handle),
         AppCommand::Retrieve(handle) => m.retrieve(handle),
         AppCommand::Terminate(handle) => m.terminate(handle),

         AppCommand::SourceCreate(id) => m.source_create(id),
         AppCommand::SourceEnable(id, chans, contexts) => m.source_enable(id, &chans, contexts),
         AppCommand::SourceUpdate(id, chans, contexts) => m.source_update(id, &chans, contexts),
         AppCommand::SourceDisable(id) => m.source_disable(id),
         AppCommand::SourceRelease(id) => m.source_release(id),
         AppCommand::SinkInit => m.sink_init(),
         AppCommand::SinkExit => m.sink_exit(),
         AppCommand::ScanStart => m.scan_start(),
         AppCommand::ScanStop => m.scan_stop(),
         AppCommand::SinkSync(id) => m.sink_sync(id),
         AppCommand::SinkRelease(id) => m.sink_release(id),
         AppCommand::SetMediaDelay(delay_us) => {
            m.set_media_delay(delay_us);
            Ok(())
         },

         AppCommand::DisconnectInactive => m.disconnect_inactive(),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::{
      audio::{LinkKind, Role, Transport},
      config::Config,
      event::AudioEvent,
      radio::RadioRequest,
      testing::{RecordingEvents, RecordingRadio, RecordingTimelines, addr},
   };

   fn service() -> (AudioService, Arc<RecordingRadio>, Arc<RecordingEvents>) {
      let radio = Arc::new(RecordingRadio::default());
      let events = Arc::new(RecordingEvents::default());
      let manager = Arc::new(SessionManager::new(
         Config::default(),
         radio.clone(),
         Arc::new(RecordingTimelines::default()),
         events.clone(),
      ));
      (AudioService::new(manager), radio, events)
   }

   #[tokio::test]
   async fn test_commands_applied_in_order() {
      let (service, radio, events) = service();
      service
         .command(AppCommand::Init(InitRoles::default()))
         .await
         .unwrap();
      service.command(AppCommand::Start).await.unwrap();
      assert!(matches!(
         service.command(AppCommand::Start).await,
         Err(AudioError::Already)
      ));

      service
         .radio_event(RadioEvent::Connected {
            handle: 1,
            address: addr(1),
            transport: Transport::Classic,
            role: Role::Slave,
            link: LinkKind::Acl,
            peer_earbud: false,
         })
         .await
         .unwrap();
      // Dump is answered after the queued event
      let dump = service.dump().await.unwrap();
      assert_eq!(dump["connections"]["device_count"], 1);
      assert_eq!(service.live().active, Some(1));
      assert!(events
         .events()
         .contains(&AudioEvent::Connected { handle: 1 }));

      assert_eq!(service.stop().await.unwrap(), StopOutcome::Stopped);
      assert_eq!(radio.calls(), vec!["init", "start", "stop"]);
   }

   #[tokio::test]
   async fn test_call_commands_reach_radio() {
      let (service, radio, _events) = service();
      assert!(matches!(
         service.command(AppCommand::Accept(None)).await,
         Err(AudioError::NotFound)
      ));
      assert!(matches!(
         service.command(AppCommand::DisconnectInactive).await,
         Err(AudioError::NotFound)
      ));

      service
         .post_radio_event(RadioEvent::Connected {
            handle: 4,
            address: addr(4),
            transport: Transport::Le,
            role: Role::Slave,
            link: LinkKind::Acl,
            peer_earbud: false,
         })
         .unwrap();
      service
         .command(AppCommand::Originate(None, SmolStr::new("tel:+1")))
         .await
         .unwrap();
      assert_eq!(service.manager().transport(4).unwrap(), Transport::Le);
      assert!(radio.requests().contains(&RadioRequest::Originate {
         handle: 4,
         uri: SmolStr::new("tel:+1")
      }));
   }

   #[tokio::test]
   async fn test_broadcast_commands_reach_radio() {
      let (service, radio, _events) = service();
      service.command(AppCommand::SourceCreate(5)).await.unwrap();
      service
         .command(AppCommand::SourceEnable(5, vec![1], AudioContexts::MEDIA))
         .await
         .unwrap();
      service.command(AppCommand::SourceRelease(5)).await.unwrap();
      assert!(matches!(
         service.command(AppCommand::SourceCreate(5)).await,
         Err(AudioError::Busy)
      ));

      service.command(AppCommand::SinkInit).await.unwrap();
      assert!(matches!(
         service.command(AppCommand::SinkInit).await,
         Err(AudioError::Already)
      ));
      service.command(AppCommand::SetMediaDelay(1000)).await.unwrap();
      let dump = service.dump().await.unwrap();
      assert_eq!(dump["broadcast"]["media_delay_us"], 1000);

      let requests = radio.requests();
      assert!(requests.contains(&RadioRequest::BroadcastCreate(5)));
      assert!(requests.contains(&RadioRequest::BroadcastRelease(5)));
   }
}
