//! JSON encoding of message bodies.
//!
//! Brokers frame messages themselves, so a body is the bare JSON payload
//! with no length prefix. Both directions enforce [`MAX_MESSAGE_SIZE`].

use serde::{Serialize, de::DeserializeOwned};

use crate::error::{ProtocolError, ProtocolResult};
use crate::{CONTENT_TYPE, MAX_MESSAGE_SIZE};

/// Encodes a message body.
///
/// # Example
///
/// ```rust
/// use calremind_protocol::{decode_message, encode_message};
///
/// let bytes = encode_message(&vec![1, 2, 3]).unwrap();
/// let decoded: Vec<u32> = decode_message(&bytes).unwrap();
/// assert_eq!(decoded, vec![1, 2, 3]);
/// ```
pub fn encode_message<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    let json = serde_json::to_vec(message)?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: json.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(json)
}

/// Decodes a message body.
pub fn decode_message<T: DeserializeOwned>(data: &[u8]) -> ProtocolResult<T> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(serde_json::from_slice(data)?)
}

/// Rejects a delivery whose content type is set to something other than JSON.
///
/// A missing content type is accepted; some publishers omit it.
pub fn check_content_type(content_type: Option<&str>) -> ProtocolResult<()> {
    match content_type {
        None => Ok(()),
        Some(ct) if ct.eq_ignore_ascii_case(CONTENT_TYPE) => Ok(()),
        Some(ct) => Err(ProtocolError::UnsupportedContentType(ct.to_string())),
    }
}
