//! Outbound messaging abstraction (Telegram today).

pub mod port;
pub mod throttled;
