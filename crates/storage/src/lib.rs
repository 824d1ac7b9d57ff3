pub mod record;
pub mod session;

pub use record::{Cookie, OriginState, SessionRecord, StorageEntry};
pub use session::{SessionEntry, SessionStore};
