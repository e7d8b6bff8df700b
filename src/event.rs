//! Outward notifications.
//!
//! The manager reports state changes through an [`EventDispatcher`]. Events
//! are emitted after the critical section ends, so a dispatcher may call back
//! into the manager.

use std::{sync::Arc, time::Duration};

use crossbeam::queue::SegQueue;
use tokio::{sync::Notify, time};

use crate::{
   audio::{AudioContexts, Handle, StreamKind},
   broadcast::BroadcastId,
   call::CallState,
};

/// Events that can be emitted by the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioEvent {
   Connected { handle: Handle },
   Disconnected { handle: Handle, reason: u8 },
   /// The active slave or its stream class changed.
   ActiveChanged { handle: Option<Handle>, kind: StreamKind },

   CodecConfigured { handle: Handle, id: u8 },
   PreferredQos { handle: Handle, id: u8 },
   QosConfigured { handle: Handle, id: u8 },
   Enabled { handle: Handle, id: u8, contexts: AudioContexts },
   Updated { handle: Handle, id: u8, contexts: AudioContexts },
   Disabled { handle: Handle, id: u8 },
   Started { handle: Handle, id: u8 },
   Stopped { handle: Handle, id: u8 },
   Released { handle: Handle, id: u8 },
   IsoConnected { handle: Handle, id: u8 },
   IsoDisconnected { handle: Handle, id: u8 },

   Call { handle: Handle, index: u8, state: CallState },
   MediaState { handle: Handle, playing: bool },
   VolumeChanged { handle: Handle, level: u8 },
   VolumeMuted { handle: Handle, muted: bool },
   MicMuted { handle: Handle, muted: bool },

   BroadcastConfigured { id: BroadcastId, chan: u8 },
   BroadcastEnabled { id: BroadcastId },
   BroadcastDisabled { id: BroadcastId },
   BroadcastReleased { id: BroadcastId },
   BroadcastSynced { id: BroadcastId },
}

/// Trait for implementing event emission.
pub trait EventDispatcher: Send + Sync {
   fn notify(&self, event: AudioEvent);
}

/// Type alias for a thread-safe event sender.
pub type EventSender = Arc<dyn EventDispatcher>;

/// Lock-free queue of events drained by an async consumer.
pub struct EventQueue {
   queue: SegQueue<AudioEvent>,
   notifier: Notify,
}

impl EventQueue {
   pub fn new() -> Arc<Self> {
      Arc::new(Self {
         queue: SegQueue::new(),
         notifier: Notify::new(),
      })
   }

   pub fn try_recv(&self) -> Option<AudioEvent> {
      self.queue.pop()
   }

   pub fn len(&self) -> usize {
      self.queue.len()
   }

   pub fn is_empty(&self) -> bool {
      self.queue.is_empty()
   }

   /// Waits for the next event; `None` once every other handle is gone.
   pub async fn recv(self: &Arc<Self>) -> Option<AudioEvent> {
      loop {
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         let notify = self.notifier.notified();
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         if Arc::strong_count(self) == 1 {
            return None;
         }
         let _ = time::timeout(Duration::from_secs(1), notify).await;
      }
   }
}

impl EventDispatcher for EventQueue {
   fn notify(&self, event: AudioEvent) {
      self.queue.push(event);
      self.notifier.notify_waiters();
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[tokio::test]
   async fn test_queue_delivers_in_order() {
      let queue = EventQueue::new();
      let sender: EventSender = queue.clone();
      sender.notify(AudioEvent::Connected { handle: 1 });
      sender.notify(AudioEvent::Disconnected { handle: 1, reason: 0x13 });

      assert_eq!(queue.recv().await, Some(AudioEvent::Connected { handle: 1 }));
      assert_eq!(
         queue.recv().await,
         Some(AudioEvent::Disconnected { handle: 1, reason: 0x13 })
      );
      assert!(queue.is_empty());
   }

   #[tokio::test]
   async fn test_recv_ends_when_senders_drop() {
      let queue = EventQueue::new();
      let sender: EventSender = queue.clone();
      drop(sender);
      assert_eq!(queue.recv().await, None);
   }
}
