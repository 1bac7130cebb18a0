//! Transport-facing abstractions and outbound decorators.

pub mod port;
pub mod throttled;
pub mod timeout;
pub mod types;
