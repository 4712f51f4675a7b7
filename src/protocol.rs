//! Echo protocol response generation.
//!
//! Newline-framed plain text:
//!
//! ```text
//! Request:  Hello Server\n
//! Response: Echo: Hello Server\n
//! ```
//!
//! The record is echoed byte for byte, trailing newline included. There is
//! no length prefix, no encoding negotiation and no command set.

use bytes::BytesMut;

/// Marker written in front of every echoed record.
pub const ECHO_PREFIX: &[u8] = b"Echo: ";

/// Build the response for one record.
pub fn echo_response(record: &[u8]) -> BytesMut {
    let mut response = BytesMut::with_capacity(ECHO_PREFIX.len() + record.len());
    response.extend_from_slice(ECHO_PREFIX);
    response.extend_from_slice(record);
    response
}
