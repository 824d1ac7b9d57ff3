pub mod config;
pub mod envelope;
pub mod error;
pub mod paths;

pub use config::{Config, RelayConfig, SESSION_KEY_ENV};
pub use envelope::{Directive, Envelope, Role, REGISTER_COMMAND};
pub use error::{Error, Result};
pub use paths::Paths;
