//! Core types, configuration, and utilities for the LMS session core.

mod clock;
mod config;
mod error;
mod logging;
mod paths;
mod timings;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    Config, DEFAULT_LOG_LEVEL, DEFAULT_SUPABASE_PUBLISHABLE_KEY, DEFAULT_SUPABASE_URL,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_for_service, parse_level};
pub use paths::Paths;
pub use timings::SessionTimings;
