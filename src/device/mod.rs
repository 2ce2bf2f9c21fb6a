//! ESP-IDF implementations of the session capabilities
//!
//! Only compiled for the firmware target. Everything here is thin glue: the
//! behaviour under test lives in the hardware-independent modules.

pub mod button;
pub mod http;
pub mod led;
pub mod server;
pub mod storage;
pub mod wifi;

use std::sync::{Arc, Mutex};

use crate::animator::DirectiveSlot;
use crate::clock::{Clock, Instant};
use crate::machine::PresenceSessionStateMachine;

pub use button::BootButton;
pub use http::EspHttpTransport;
pub use led::Ws2812Sink;
pub use storage::NvsStore;
pub use wifi::Station;

/// The session as wired on the device
pub type Session = PresenceSessionStateMachine<EspHttpTransport, NvsStore, Arc<DirectiveSlot>, EspClock>;

/// Shared between the control loop and the HTTP server handlers
pub type SharedSession = Arc<Mutex<Session>>;

/// Milliseconds since boot from the ESP high-resolution timer
#[derive(Debug, Clone, Copy, Default)]
pub struct EspClock;

impl Clock for EspClock {
    fn now_ms(&self) -> Instant {
        (unsafe { esp_idf_sys::esp_timer_get_time() } / 1000) as Instant
    }
}
