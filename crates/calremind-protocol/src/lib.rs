//! Queue message types for calremind.
//!
//! The notifier publishes one [`Notification`] per due event onto the
//! notification stream; the sender consumes and decodes them.
//!
//! # Wire format
//!
//! Each broker message body is a single JSON object, sent with the
//! `application/json` content type:
//!
//! ```text
//! {
//!   "event_id": "<uuid>",
//!   "title": "Standup",
//!   "start": "2025-02-05T10:00:00Z",
//!   "duration": 1800000000000,
//!   "user_name": "Ada",
//!   "user_email": "ada@example.com"
//! }
//! ```
//!
//! `duration` is an integer number of nanoseconds.

mod codec;
mod error;
mod notification;

pub use codec::{check_content_type, decode_message, encode_message};
pub use error::{ProtocolError, ProtocolResult};
pub use notification::Notification;

/// Content type of every message body.
pub const CONTENT_TYPE: &str = "application/json";

/// Maximum message body size (1 MB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
