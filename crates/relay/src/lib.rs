pub mod client;
pub mod server;

pub use client::{AgentClient, CommandHandler, HostClient};
pub use server::{RelayServer, RelayState, RouteOutcome};
