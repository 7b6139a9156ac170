//! Testing utilities and mock implementations
//!
//! This module provides mock implementations for exercising the MQTT session
//! and the alarm publisher without an MQTT broker or a Sleep as Android install.

pub mod mocks;

pub use mocks::*;
