//! Bluetooth audio session daemon.
//!
//! Runs the session manager against a logging radio backend. Requests that
//! would go to the controller are written to the log, and outward events
//! are drained from the event queue.

use std::sync::Arc;

use bt_audio_manager::{
   AppCommand, AudioService, Config, EventQueue, RadioControl, RadioRequest, Result,
   SessionManager, Timeline, TimelineFactory,
   lifecycle::{InitRoles, LocalCapabilities, StopOutcome},
   radio::StopStatus,
   timeline::TimelineSpec,
};
use log::{debug, info, trace};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   info!("Starting Bluetooth audio session manager...");

   // Load configuration
   let config = Config::load()?;
   info!(
      "Loaded configuration: {} phone device(s), takeover {}",
      config.max_phone_devices, config.phone_takeover
   );

   let events = EventQueue::new();
   let manager = Arc::new(SessionManager::new(
      config,
      Arc::new(LoggingRadio),
      Arc::new(LoggingTimelines),
      events.clone(),
   ));
   let service = AudioService::new(manager);

   // Start event processor
   tokio::spawn(async move {
      while let Some(event) = events.recv().await {
         info!("Event: {event:?}");
      }
   });

   service
      .command(AppCommand::Init(InitRoles {
         unicast_server: true,
         broadcast_sink: true,
         ..Default::default()
      }))
      .await?;
   service.command(AppCommand::Start).await?;
   info!("Session manager running");

   // Wait for shutdown signal
   signal::ctrl_c().await?;
   info!("Shutting down session manager...");

   match service.stop().await? {
      StopOutcome::Stopped => info!("Stopped"),
      StopOutcome::InProgress => info!("Stop in progress, exiting anyway"),
   }
   Ok(())
}

/// Radio backend that only logs.
struct LoggingRadio;

impl RadioControl for LoggingRadio {
   fn init(&self, roles: InitRoles) -> Result<()> {
      info!("radio: init {roles:?}");
      Ok(())
   }

   fn exit(&self) -> Result<()> {
      info!("radio: exit");
      Ok(())
   }

   fn start(&self) -> Result<()> {
      info!("radio: start");
      Ok(())
   }

   fn stop(&self) -> Result<StopStatus> {
      info!("radio: stop");
      Ok(StopStatus::Done)
   }

   fn pause(&self) -> Result<()> {
      info!("radio: pause");
      Ok(())
   }

   fn resume(&self) -> Result<()> {
      info!("radio: resume");
      Ok(())
   }

   fn set_capabilities(&self, caps: &LocalCapabilities) -> Result<()> {
      info!("radio: capabilities {caps:?}");
      Ok(())
   }

   fn submit(&self, request: RadioRequest) {
      info!("radio: {request:?}");
   }
}

struct LoggingTimelines;

struct LoggingTimeline(TimelineSpec);

impl TimelineFactory for LoggingTimelines {
   fn create(&self, spec: TimelineSpec) -> Option<Box<dyn Timeline>> {
      Some(Box::new(LoggingTimeline(spec)))
   }
}

impl Timeline for LoggingTimeline {
   fn start(&self) {
      debug!("timeline {:#06x}: start", self.0.audio_handle);
   }

   fn stop(&self) {
      debug!("timeline {:#06x}: stop", self.0.audio_handle);
   }

   fn trigger(&self, timestamp_us: u64) {
      trace!("timeline {:#06x}: tick at {timestamp_us}", self.0.audio_handle);
   }
}
