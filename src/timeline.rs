//! Playback clock adapter.
//!
//! A [`Timeline`] turns the radio clock into a periodic callback for the audio
//! pipeline. Each isochronous stream either owns one or shares ("bonds") the
//! timeline of another stream on the same link. Ownership is a type-level
//! distinction: [`OwnedTimeline`] is created once, [`BondedTimeline`] handles
//! are cloned from it, and the platform timeline is stopped and dropped when
//! the last handle of either kind goes away.

use std::{
   fmt,
   sync::{
      Arc,
      atomic::{AtomicBool, AtomicU64, Ordering},
   },
};

use log::debug;
use serde::Serialize;

use crate::{
   audio::Handle,
   error::{AudioError, Result},
};

/// What the pipeline does on each tick of a timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum TimelineKind {
   Decode,
   Encode,
}

/// Creation parameters handed to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineSpec {
   pub kind: TimelineKind,
   pub interval_us: u32,
   pub audio_handle: u16,
}

/// Platform clock driven by radio timestamps.
pub trait Timeline: Send + Sync {
   fn start(&self);
   fn stop(&self);
   fn trigger(&self, timestamp_us: u64);
}

/// Creates platform timelines. Returning `None` means the platform is out
/// of timeline slots.
pub trait TimelineFactory: Send + Sync {
   fn create(&self, spec: TimelineSpec) -> Option<Box<dyn Timeline>>;
}

static NEXT_TIMELINE_ID: AtomicU64 = AtomicU64::new(1);

struct SharedClock {
   id: u64,
   spec: TimelineSpec,
   clock: Box<dyn Timeline>,
}

impl Drop for SharedClock {
   fn drop(&mut self) {
      self.clock.stop();
      debug!("Timeline {} ({}) released", self.id, self.spec.kind);
   }
}

/// The handle held by the stream that created the timeline.
pub struct OwnedTimeline(Arc<SharedClock>);

/// A handle held by a stream sharing another stream's timeline.
#[derive(Clone)]
pub struct BondedTimeline(Arc<SharedClock>);

impl OwnedTimeline {
   /// Creates and starts a new timeline.
   pub fn create(factory: &dyn TimelineFactory, spec: TimelineSpec) -> Result<Self> {
      let clock = factory.create(spec).ok_or(AudioError::NoMemory)?;
      clock.start();
      let id = NEXT_TIMELINE_ID.fetch_add(1, Ordering::Relaxed);
      debug!(
         "Timeline {id} created: {} every {}us",
         spec.kind, spec.interval_us
      );
      Ok(Self(Arc::new(SharedClock { id, spec, clock })))
   }
}

/// Timeline reference carried by a channel.
pub enum ChannelClock {
   Owner(OwnedTimeline),
   Bonded(BondedTimeline),
}

impl ChannelClock {
   fn shared(&self) -> &Arc<SharedClock> {
      match self {
         Self::Owner(OwnedTimeline(shared)) | Self::Bonded(BondedTimeline(shared)) => shared,
      }
   }

   /// Takes another reference to the same timeline.
   pub fn bond(&self) -> BondedTimeline {
      BondedTimeline(Arc::clone(self.shared()))
   }

   pub const fn is_owner(&self) -> bool {
      matches!(self, Self::Owner(_))
   }

   pub fn id(&self) -> u64 {
      self.shared().id
   }

   pub fn kind(&self) -> TimelineKind {
      self.shared().spec.kind
   }

   /// Live references, owner included.
   pub fn ref_count(&self) -> usize {
      Arc::strong_count(self.shared())
   }

   pub fn trigger(&self, timestamp_us: u64) {
      self.shared().clock.trigger(timestamp_us);
   }
}

impl fmt::Debug for ChannelClock {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("ChannelClock")
         .field("id", &self.id())
         .field("owner", &self.is_owner())
         .field("refs", &self.ref_count())
         .finish()
   }
}

/// Radio clock sample for an isochronous link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeClock {
   pub ce_count: u64,
   pub ce_interval_us: u32,
   /// Measured offset inside the current connection event, may be negative.
   pub ce_offset_us: i32,
}

impl LeClock {
   pub fn time_us(&self) -> u64 {
      let base = self.ce_count.saturating_mul(u64::from(self.ce_interval_us));
      base.saturating_add_signed(i64::from(self.ce_offset_us))
   }
}

/// Initial playback offset for a stream starting mid-interval, in us.
///
/// Aligns the start to the frame boundary implied by the sync and
/// presentation delays, minus the locally configured media delay and the
/// measured clock offset.
pub fn start_offset_us(
   sync_delay_us: u32,
   presentation_delay_us: u32,
   media_delay_us: u32,
   iso_interval_us: u32,
   clock_offset_us: i32,
) -> i32 {
   if iso_interval_us == 0 {
      return 0;
   }
   let interval = i64::from(iso_interval_us);
   let target = (i64::from(sync_delay_us) + i64::from(presentation_delay_us)
      - i64::from(media_delay_us))
   .rem_euclid(interval);
   let mut measured = i64::from(clock_offset_us);
   if measured < 0 {
      measured += interval;
   }
   (target - measured) as i32
}

// === Trigger callbacks ===

/// Called on every stream trigger of a channel.
pub trait StreamTrigger: Send + Sync {
   fn on_stream(&self, handle: Handle, id: u8, clock: LeClock);
}

/// Called on every timeline period.
pub trait PeriodTrigger: Send + Sync {
   fn on_period(&self, timestamp_us: u64);
}

/// Called when the peer earbud link reports a sync point.
pub trait SyncTrigger: Send + Sync {
   fn on_sync(&self, timestamp_us: u64);
}

/// One-shot start notification carrying the initial playback offset.
pub trait StartCallback: Send + Sync {
   fn on_start(&self, offset_us: i32);
}

/// Per-channel callback slots. Each slot accepts one registration.
#[derive(Default)]
pub struct TriggerSet {
   stream: Option<Arc<dyn StreamTrigger>>,
   period: Option<Arc<dyn PeriodTrigger>>,
   sync: Option<Arc<dyn SyncTrigger>>,
   start: Option<Arc<dyn StartCallback>>,
   started: AtomicBool,
}

fn fill<T: ?Sized>(slot: &mut Option<Arc<T>>, cb: Arc<T>) -> Result<()> {
   if slot.is_some() {
      return Err(AudioError::Already);
   }
   *slot = Some(cb);
   Ok(())
}

impl TriggerSet {
   pub fn set_stream(&mut self, cb: Arc<dyn StreamTrigger>) -> Result<()> {
      fill(&mut self.stream, cb)
   }

   pub fn set_period(&mut self, cb: Arc<dyn PeriodTrigger>) -> Result<()> {
      fill(&mut self.period, cb)
   }

   pub fn set_sync(&mut self, cb: Arc<dyn SyncTrigger>) -> Result<()> {
      fill(&mut self.sync, cb)
   }

   /// Arms the one-shot start callback.
   pub fn set_start(&mut self, cb: Arc<dyn StartCallback>) -> Result<()> {
      fill(&mut self.start, cb)?;
      self.started.store(false, Ordering::Release);
      Ok(())
   }

   pub fn stream(&self) -> Option<&Arc<dyn StreamTrigger>> {
      self.stream.as_ref()
   }

   pub fn period(&self) -> Option<&Arc<dyn PeriodTrigger>> {
      self.period.as_ref()
   }

   pub fn sync(&self) -> Option<&Arc<dyn SyncTrigger>> {
      self.sync.as_ref()
   }

   /// Fires the start callback once; later calls are no-ops.
   pub fn fire_start(&self, offset_us: impl FnOnce() -> i32) -> bool {
      let Some(cb) = &self.start else {
         return false;
      };
      if self.started.swap(true, Ordering::AcqRel) {
         return false;
      }
      cb.on_start(offset_us());
      true
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::testing::{RecordingStart, RecordingTimelines};

   fn spec() -> TimelineSpec {
      TimelineSpec {
         kind: TimelineKind::Decode,
         interval_us: 10000,
         audio_handle: 0x60,
      }
   }

   #[test]
   fn test_bonded_references_keep_timeline_alive() {
      let factory = RecordingTimelines::default();
      let owner = ChannelClock::Owner(OwnedTimeline::create(&factory, spec()).unwrap());
      assert_eq!(factory.started(), 1);

      let bonded = ChannelClock::Bonded(owner.bond());
      assert_eq!(owner.ref_count(), 2);
      assert_eq!(bonded.id(), owner.id());

      // Owner goes first, bonded still holds the clock
      drop(owner);
      assert_eq!(factory.destroyed(), 0);
      assert_eq!(bonded.ref_count(), 1);

      drop(bonded);
      assert_eq!(factory.destroyed(), 1);
      assert_eq!(factory.stopped(), 1);
   }

   #[test]
   fn test_create_failure_is_no_memory() {
      let factory = RecordingTimelines::exhausted();
      assert!(matches!(
         OwnedTimeline::create(&factory, spec()),
         Err(AudioError::NoMemory)
      ));
   }

   #[test]
   fn test_start_offset() {
      // (1000 + 40000 - 0) % 10000 = 1000, minus 200
      assert_eq!(start_offset_us(1000, 40000, 0, 10000, 200), 800);
      // Negative measured offset wraps by one interval
      assert_eq!(start_offset_us(1000, 40000, 0, 10000, -200), 1000 - 9800);
      // Media delay larger than the sum wraps into the interval
      assert_eq!(start_offset_us(1000, 0, 3000, 10000, 0), 8000);
      assert_eq!(start_offset_us(1000, 0, 0, 0, 0), 0);
   }

   #[test]
   fn test_le_time() {
      let clock = LeClock {
         ce_count: 10,
         ce_interval_us: 7500,
         ce_offset_us: -500,
      };
      assert_eq!(clock.time_us(), 74500);

      let clock = LeClock {
         ce_count: u64::MAX / 2,
         ce_interval_us: u32::MAX,
         ce_offset_us: 0,
      };
      assert_eq!(clock.time_us(), u64::MAX);
   }

   #[test]
   fn test_trigger_slots_reject_duplicates_and_start_fires_once() {
      let mut triggers = TriggerSet::default();
      let start = Arc::new(RecordingStart::default());
      triggers.set_start(start.clone()).unwrap();
      assert!(matches!(
         triggers.set_start(start.clone()),
         Err(AudioError::Already)
      ));

      assert!(triggers.fire_start(|| 123));
      assert!(!triggers.fire_start(|| 456));
      assert_eq!(start.offsets(), vec![123]);
   }
}
