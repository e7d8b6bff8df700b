//! Bluetooth audio session manager.
//!
//! Tracks radio links and their negotiated audio streams, arbitrates which
//! connected phone renders audio, and forwards state changes upward. The
//! radio stack and the playback clock are collaborators behind traits; see
//! [`RadioControl`] and [`TimelineFactory`].

pub mod address;
pub mod arbiter;
pub mod audio;
pub mod broadcast;
pub mod call;
pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod manager;
pub mod radio;
pub mod service;
pub mod timeline;

#[cfg(test)]
mod testing;

pub use crate::{
   address::Address,
   audio::{AudioContexts, Direction, Handle, Role, StreamKind, Transport},
   config::Config,
   error::{AudioError, Result},
   event::{AudioEvent, EventDispatcher, EventQueue, EventSender},
   manager::{LiveStatus, SessionManager, StreamRef},
   radio::{RadioControl, RadioEvent, RadioRequest},
   service::{AppCommand, AudioService},
   timeline::{Timeline, TimelineFactory},
};
