//! Presence light control core
//!
//! Signs in to the identity provider with the device-code flow, polls the
//! signed-in user's presence and drives an LED strip to match, keeping the
//! tokens in flash across power cycles.
//!
//! The core is hardware independent: remote calls, storage, time and the
//! LED output are capabilities behind traits. The ESP-IDF implementations
//! live in [`device`] and are only built for the firmware target.

pub mod animator;
pub mod auth;
pub mod button;
pub mod clock;
pub mod config;
pub mod error;
pub mod graph;
pub mod machine;
pub mod presence;
pub mod render;
pub mod store;

#[cfg(target_os = "espidf")]
pub mod device;

#[cfg(test)]
mod testing;

pub use machine::{LoginPrompt, PresenceSessionStateMachine, SessionState, StatusReport};
