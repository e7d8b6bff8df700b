//! Recording fakes for the manager's collaborators.

use std::sync::{
   Arc,
   atomic::{AtomicBool, AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::{
   address::Address,
   audio::{CodecConfig, FrameDuration},
   error::{AudioError, Result},
   event::{AudioEvent, EventDispatcher},
   lifecycle::{InitRoles, LocalCapabilities},
   radio::{RadioControl, RadioRequest, StopStatus},
   timeline::{StartCallback, Timeline, TimelineFactory, TimelineSpec},
};

pub fn addr(n: u8) -> Address {
   Address::new([0x00, 0x1A, 0x7D, 0x00, 0x00, n])
}

/// 48 kHz LC3 configuration.
pub fn codec(locations: u32, duration: u8, blocks: u8, octets: u16) -> CodecConfig {
   CodecConfig {
      format: 0x06,
      sample_rate_khz: 48,
      duration: FrameDuration::from_code(duration),
      locations,
      octets,
      blocks,
      target_latency: 2,
      target_phy: 2,
      specific: SmallVec::from_slice(&[0x02, 0x01, 0x08]),
   }
}

#[derive(Default)]
pub struct RecordingRadio {
   calls: Mutex<Vec<&'static str>>,
   requests: Mutex<Vec<RadioRequest>>,
   stop_in_progress: AtomicBool,
   fail_lifecycle: AtomicBool,
}

impl RecordingRadio {
   pub fn stop_in_progress(&self, on: bool) {
      self.stop_in_progress.store(on, Ordering::SeqCst);
   }

   pub fn fail_lifecycle(&self, on: bool) {
      self.fail_lifecycle.store(on, Ordering::SeqCst);
   }

   pub fn calls(&self) -> Vec<&'static str> {
      self.calls.lock().clone()
   }

   pub fn clear_calls(&self) {
      self.calls.lock().clear();
   }

   pub fn requests(&self) -> Vec<RadioRequest> {
      self.requests.lock().clone()
   }

   pub fn take_requests(&self) -> Vec<RadioRequest> {
      std::mem::take(&mut *self.requests.lock())
   }

   fn record(&self, name: &'static str) -> Result<()> {
      if self.fail_lifecycle.load(Ordering::SeqCst) {
         return Err(AudioError::InvalidArgument("stack refused"));
      }
      self.calls.lock().push(name);
      Ok(())
   }
}

impl RadioControl for RecordingRadio {
   fn init(&self, _roles: InitRoles) -> Result<()> {
      self.record("init")
   }

   fn exit(&self) -> Result<()> {
      self.record("exit")
   }

   fn start(&self) -> Result<()> {
      self.record("start")
   }

   fn stop(&self) -> Result<StopStatus> {
      self.record("stop")?;
      if self.stop_in_progress.load(Ordering::SeqCst) {
         Ok(StopStatus::InProgress)
      } else {
         Ok(StopStatus::Done)
      }
   }

   fn pause(&self) -> Result<()> {
      self.record("pause")
   }

   fn resume(&self) -> Result<()> {
      self.record("resume")
   }

   fn set_capabilities(&self, _caps: &LocalCapabilities) -> Result<()> {
      self.record("caps")
   }

   fn submit(&self, request: RadioRequest) {
      self.requests.lock().push(request);
   }
}

#[derive(Default)]
struct TimelineCounters {
   created: AtomicUsize,
   started: AtomicUsize,
   stopped: AtomicUsize,
   destroyed: AtomicUsize,
   triggers: Mutex<Vec<u64>>,
}

struct FakeTimeline(Arc<TimelineCounters>);

impl Timeline for FakeTimeline {
   fn start(&self) {
      self.0.started.fetch_add(1, Ordering::SeqCst);
   }

   fn stop(&self) {
      self.0.stopped.fetch_add(1, Ordering::SeqCst);
   }

   fn trigger(&self, timestamp_us: u64) {
      self.0.triggers.lock().push(timestamp_us);
   }
}

impl Drop for FakeTimeline {
   fn drop(&mut self) {
      self.0.destroyed.fetch_add(1, Ordering::SeqCst);
   }
}

#[derive(Default)]
pub struct RecordingTimelines {
   counters: Arc<TimelineCounters>,
   exhausted: bool,
   specs: Mutex<Vec<TimelineSpec>>,
}

impl RecordingTimelines {
   pub fn exhausted() -> Self {
      Self {
         exhausted: true,
         ..Default::default()
      }
   }

   pub fn created(&self) -> usize {
      self.counters.created.load(Ordering::SeqCst)
   }

   pub fn started(&self) -> usize {
      self.counters.started.load(Ordering::SeqCst)
   }

   pub fn stopped(&self) -> usize {
      self.counters.stopped.load(Ordering::SeqCst)
   }

   pub fn destroyed(&self) -> usize {
      self.counters.destroyed.load(Ordering::SeqCst)
   }

   pub fn triggers(&self) -> Vec<u64> {
      self.counters.triggers.lock().clone()
   }

   pub fn specs(&self) -> Vec<TimelineSpec> {
      self.specs.lock().clone()
   }
}

impl TimelineFactory for RecordingTimelines {
   fn create(&self, spec: TimelineSpec) -> Option<Box<dyn Timeline>> {
      if self.exhausted {
         return None;
      }
      self.counters.created.fetch_add(1, Ordering::SeqCst);
      self.specs.lock().push(spec);
      Some(Box::new(FakeTimeline(Arc::clone(&self.counters))))
   }
}

#[derive(Default)]
pub struct RecordingEvents(Mutex<Vec<AudioEvent>>);

impl RecordingEvents {
   pub fn events(&self) -> Vec<AudioEvent> {
      self.0.lock().clone()
   }

   pub fn take(&self) -> Vec<AudioEvent> {
      std::mem::take(&mut *self.0.lock())
   }
}

impl EventDispatcher for RecordingEvents {
   fn notify(&self, event: AudioEvent) {
      self.0.lock().push(event);
   }
}

#[derive(Default)]
pub struct RecordingStart(Mutex<Vec<i32>>);

impl RecordingStart {
   pub fn offsets(&self) -> Vec<i32> {
      self.0.lock().clone()
   }
}

impl StartCallback for RecordingStart {
   fn on_start(&self, offset_us: i32) {
      self.0.lock().push(offset_us);
   }
}
