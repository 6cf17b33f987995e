//! Domain models for chat messages.

mod message;

pub use message::*;
