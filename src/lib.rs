//! corebridge: dual-core sensor firmware.
//!
//! A compute core owns the sensors, the sample pipeline and the pattern
//! engine; a host core drives it over a mailbox with synchronous requests
//! and receives reading-change events in return.

pub mod config;
pub mod drivers;
pub mod error;
pub mod events;
pub mod handlers;
pub mod ipm;
pub mod pipeline;
pub mod pme;
pub mod sensors;
pub mod tasks;

pub use error::{ErrorCode, IpmError, Result};
