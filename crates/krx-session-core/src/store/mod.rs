//! Cross-process session persistence.
//!
//! The session record lives in a JSON file guarded by an advisory lock on a
//! sibling `.lock` file. Records are usable until `expires_at` (30 minutes
//! after login by default); staleness is judged when loading.

pub mod lock;
pub mod record;
pub mod session_store;

pub use record::SessionRecord;
pub use session_store::SessionStore;
