//! Common utilities shared by venue clients

pub mod throttle;

pub use throttle::{Throttle, ThrottleConfig};
