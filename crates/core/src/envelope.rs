//! The bridge wire format.
//!
//! Every message on the relay is a JSON object with a `target` role and
//! optional `command`/`id`/`payload`/`error` fields. Fields this crate does
//! not know about are preserved opaquely so newer host/agent clients can
//! ride through an older relay unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved command that binds the sending connection to the `target` role.
pub const REGISTER_COMMAND: &str = "register";

/// The two roles a connection can be bound to. At most one live connection
/// per role at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Agent,
    Host,
}

impl Role {
    /// The role on the other side of the bridge.
    pub fn peer(&self) -> Role {
        match self {
            Role::Agent => Role::Host,
            Role::Host => Role::Agent,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Role::Agent => "agent",
            Role::Host => "host",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub target: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unknown fields, carried through verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// What the relay should do with a parsed envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Bind the sending connection to the role; never forwarded.
    Register(Role),
    /// Forward to whatever connection is bound to the role.
    Forward(Role),
}

impl Envelope {
    pub fn register(role: Role) -> Self {
        Self {
            target: role,
            command: Some(REGISTER_COMMAND.to_string()),
            id: None,
            payload: None,
            error: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn command(target: Role, command: impl Into<String>, id: impl Into<String>, payload: Value) -> Self {
        Self {
            target,
            command: Some(command.into()),
            id: Some(id.into()),
            payload: Some(payload),
            error: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn reply(target: Role, id: impl Into<String>, payload: Value) -> Self {
        Self {
            target,
            command: None,
            id: Some(id.into()),
            payload: Some(payload),
            error: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn error_reply(target: Role, id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            target,
            command: None,
            id,
            payload: None,
            error: Some(error.into()),
            extra: serde_json::Map::new(),
        }
    }

    pub fn directive(&self) -> Directive {
        match self.command.as_deref() {
            Some(REGISTER_COMMAND) => Directive::Register(self.target),
            _ => Directive::Forward(self.target),
        }
    }

    pub fn is_register(&self) -> bool {
        matches!(self.directive(), Directive::Register(_))
    }
}
