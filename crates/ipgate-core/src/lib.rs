//! ipgate-core: Shared protocol library for the IP gateway.
//!
//! Provides the control-plane command codec, the persisted whitelist
//! record codec, and common error types.

pub mod error;
pub mod proto;
pub mod record;

// Re-export commonly used items at crate root.
pub use error::{GateError, GateResult};
pub use proto::{Authenticate, AUTHENTICATE_PAYLOAD_LEN, TAG_AUTHENTICATE};
pub use record::{LogRecord, PERMANENT, RECORD_LEN};
