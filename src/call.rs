//! Call instances tracked per connection.

use serde::Serialize;
use smallvec::SmallVec;
use smol_str::SmolStr;

use crate::error::{AudioError, Result};

/// State of one call as reported by the telephony peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::IntoStaticStr)]
pub enum CallState {
   Incoming,
   Dialing,
   Alerting,
   Active,
   LocallyHeld,
   RemotelyHeld,
   /// Held on both sides.
   Held,
   /// Terminal; never stored.
   Ended,
}

impl CallState {
   const fn is_outgoing(self) -> bool {
      matches!(self, Self::Dialing | Self::Alerting)
   }
}

/// Summary of a connection's calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, strum::Display)]
pub enum CallStatus {
   #[default]
   None,
   Incoming,
   Outgoing,
   Ongoing,
   Multiparty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Call {
   pub index: u8,
   pub state: CallState,
   pub uri: SmolStr,
}

/// Calls keyed by index.
#[derive(Debug, Default, Clone)]
pub struct CallList(SmallVec<[Call; 2]>);

impl CallList {
   pub fn len(&self) -> usize {
      self.0.len()
   }

   pub fn is_empty(&self) -> bool {
      self.0.is_empty()
   }

   pub fn get(&self, index: u8) -> Option<&Call> {
      self.0.iter().find(|c| c.index == index)
   }

   pub fn iter(&self) -> impl Iterator<Item = &Call> {
      self.0.iter()
   }

   /// Applies a state report, creating the call on first sight and
   /// deleting it on `Ended`. Returns the stored call, if any remains.
   pub fn apply(
      &mut self,
      index: u8,
      state: CallState,
      uri: Option<&str>,
      capacity: usize,
   ) -> Result<Option<&Call>> {
      if state == CallState::Ended {
         self.0.retain(|c| c.index != index);
         return Ok(None);
      }

      let pos = match self.0.iter().position(|c| c.index == index) {
         Some(pos) => pos,
         None => {
            if self.0.len() >= capacity {
               return Err(AudioError::NoMemory);
            }
            self.0.push(Call {
               index,
               state,
               uri: SmolStr::default(),
            });
            self.0.len() - 1
         },
      };

      let call = &mut self.0[pos];
      call.state = state;
      if state == CallState::Incoming
         && let Some(uri) = uri
      {
         call.uri = SmolStr::new(uri);
      }
      Ok(Some(&self.0[pos]))
   }

   pub fn find_state(&self, state: CallState) -> Option<&Call> {
      self.0.iter().find(|c| c.state == state)
   }

   /// Call answered by an accept request.
   pub fn accept_target(&self) -> Option<&Call> {
      self.find_state(CallState::Incoming)
   }

   /// Call put on hold by a hold request.
   pub fn hold_target(&self) -> Option<&Call> {
      self.find_state(CallState::Active)
   }

   /// Call resumed by a retrieve request.
   pub fn retrieve_target(&self) -> Option<&Call> {
      self
         .find_state(CallState::LocallyHeld)
         .or_else(|| self.find_state(CallState::Held))
   }

   /// Call dropped by a terminate request.
   pub fn terminate_target(&self) -> Option<&Call> {
      self
         .find_state(CallState::Active)
         .or_else(|| self.0.first())
   }

   pub fn status(&self) -> CallStatus {
      match self.0.as_slice() {
         [] => CallStatus::None,
         [call] if call.state == CallState::Incoming => CallStatus::Incoming,
         [call] if call.state.is_outgoing() => CallStatus::Outgoing,
         [_] => CallStatus::Ongoing,
         _ => CallStatus::Multiparty,
      }
   }

   pub fn clear(&mut self) {
      self.0.clear();
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_call_lifecycle() {
      let mut calls = CallList::default();
      let call = calls
         .apply(1, CallState::Incoming, Some("tel:+100"), 4)
         .unwrap()
         .unwrap();
      assert_eq!(call.uri, "tel:+100");
      assert_eq!(calls.status(), CallStatus::Incoming);

      calls.apply(1, CallState::Active, None, 4).unwrap();
      assert_eq!(calls.get(1).unwrap().uri, "tel:+100");
      assert_eq!(calls.status(), CallStatus::Ongoing);

      calls.apply(2, CallState::Dialing, None, 4).unwrap();
      assert_eq!(calls.status(), CallStatus::Multiparty);

      assert!(calls.apply(1, CallState::Ended, None, 4).unwrap().is_none());
      assert_eq!(calls.status(), CallStatus::Outgoing);
   }

   #[test]
   fn test_capacity_is_no_memory() {
      let mut calls = CallList::default();
      calls.apply(1, CallState::Active, None, 1).unwrap();
      assert!(matches!(
         calls.apply(2, CallState::Incoming, None, 1),
         Err(AudioError::NoMemory)
      ));
      assert_eq!(calls.len(), 1);
      // Updating an existing call does not need room
      assert!(calls.apply(1, CallState::LocallyHeld, None, 1).is_ok());
   }

   #[test]
   fn test_control_targets() {
      let mut calls = CallList::default();
      calls.apply(1, CallState::Held, None, 4).unwrap();
      calls.apply(2, CallState::LocallyHeld, None, 4).unwrap();
      assert_eq!(calls.retrieve_target().unwrap().index, 2);
      assert!(calls.hold_target().is_none());
      assert_eq!(calls.terminate_target().unwrap().index, 1);

      calls.apply(3, CallState::Active, None, 4).unwrap();
      assert_eq!(calls.terminate_target().unwrap().index, 3);
      assert_eq!(calls.hold_target().unwrap().index, 3);
   }
}
