//! Component wiring and command handlers.

mod commands;
mod wiring;

pub use commands::{clear, export, login, oauth_callback, oauth_url, ping, refresh, run, sign_out, status};
pub use wiring::SessionCore;
