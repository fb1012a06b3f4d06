//! Length-prefixed codec for the device-bridge host protocol.
//!
//! Wire format:
//! ```text
//! request:  [len:4 ascii hex, lowercase][payload:len utf-8]
//! response: [status:4 ascii]                      status == "OKAY"
//!           [status:4 ascii][len:4 ascii hex][msg] status == "FAIL"
//! ```
//! The length header is always exactly four hex digits, so a single frame
//! carries at most `0xffff` payload bytes.
//!
//! # Why hex text instead of a binary integer? (for beginners)
//!
//! The daemon protocol predates this gateway and was designed to be typed by
//! hand over `telnet`.  A request for the device list is literally the ASCII
//! text `000chost:devices`: `000c` is 12 in hexadecimal, and `host:devices`
//! is 12 bytes long.  Everything in this module is a pure function over byte
//! slices, so it can be tested without sockets.

use thiserror::Error;

/// Number of bytes in a length header.
pub const LENGTH_HEADER_SIZE: usize = 4;

/// Number of bytes in a status code.
pub const STATUS_SIZE: usize = 4;

/// Largest payload that fits in a four-digit hex header.
pub const MAX_PAYLOAD_LEN: usize = 0xffff;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the frame it should contain.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The four length bytes are not ASCII hex digits.
    #[error("malformed length header: {0:?}")]
    MalformedLength([u8; LENGTH_HEADER_SIZE]),

    /// The payload does not fit in a four-digit hex header.
    #[error("payload too large: {len} bytes (max {MAX_PAYLOAD_LEN})")]
    PayloadTooLarge { len: usize },

    /// The four status bytes are neither `OKAY` nor `FAIL`.
    #[error("unexpected status code: {}", String::from_utf8_lossy(.0))]
    UnexpectedStatus([u8; STATUS_SIZE]),

    /// A payload that must be text is not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
}

/// The status word the daemon sends in reply to every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// `OKAY`: the request was accepted; its payload (if any) follows.
    Okay,
    /// `FAIL`: the request was rejected; a length-prefixed message follows.
    Fail,
}

impl Status {
    /// The exact bytes of this status on the wire.
    pub const fn as_bytes(self) -> &'static [u8; STATUS_SIZE] {
        match self {
            Status::Okay => b"OKAY",
            Status::Fail => b"FAIL",
        }
    }

    /// Parses a four-byte status code.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnexpectedStatus`] for anything other than
    /// `OKAY` or `FAIL`.
    pub fn parse(bytes: [u8; STATUS_SIZE]) -> Result<Self, ProtocolError> {
        match &bytes {
            b"OKAY" => Ok(Status::Okay),
            b"FAIL" => Ok(Status::Fail),
            _ => Err(ProtocolError::UnexpectedStatus(bytes)),
        }
    }
}

/// A fully decoded daemon response header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The request succeeded.
    Okay,
    /// The request failed with the given message.
    Fail(String),
}

// ── Length headers ────────────────────────────────────────────────────────────

/// Formats `len` as four lowercase hex digits.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] when `len` exceeds
/// [`MAX_PAYLOAD_LEN`].
pub fn encode_length(len: usize) -> Result<[u8; LENGTH_HEADER_SIZE], ProtocolError> {
    if len > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge { len });
    }
    let text = format!("{len:04x}");
    let mut header = [0u8; LENGTH_HEADER_SIZE];
    header.copy_from_slice(text.as_bytes());
    Ok(header)
}

/// Decodes a four-digit hex length header.
///
/// Upper-case digits are accepted on decode even though this gateway only
/// ever emits lower-case ones.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedLength`] if any byte is not a hex digit.
pub fn decode_length(header: [u8; LENGTH_HEADER_SIZE]) -> Result<usize, ProtocolError> {
    let mut value = 0usize;
    for byte in header {
        let digit = (byte as char)
            .to_digit(16)
            .ok_or(ProtocolError::MalformedLength(header))?;
        value = (value << 4) | digit as usize;
    }
    Ok(value)
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// Encodes a command as a length-prefixed request frame.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if the UTF-8 encoding of
/// `command` is longer than [`MAX_PAYLOAD_LEN`] bytes.
///
/// # Examples
///
/// ```rust
/// use devgate_core::protocol::encode_request;
///
/// let frame = encode_request("host:devices").unwrap();
/// assert_eq!(frame, b"000chost:devices");
/// ```
pub fn encode_request(command: &str) -> Result<Vec<u8>, ProtocolError> {
    let payload = command.as_bytes();
    let header = encode_length(payload.len())?;
    let mut buf = Vec::with_capacity(LENGTH_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decodes one request frame from the beginning of `bytes`.
///
/// Returns the command text and the number of bytes consumed.  This is the
/// daemon-side half of the codec; the gateway uses it to inspect traffic and
/// the test suites use it to build fake daemons.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] when the frame is incomplete.
pub fn decode_request(bytes: &[u8]) -> Result<(String, usize), ProtocolError> {
    let len = read_length_prefix(bytes)?;
    let total = LENGTH_HEADER_SIZE + len;
    if bytes.len() < total {
        return Err(ProtocolError::InsufficientData {
            needed: total,
            available: bytes.len(),
        });
    }
    let text = std::str::from_utf8(&bytes[LENGTH_HEADER_SIZE..total])
        .map_err(|_| ProtocolError::InvalidUtf8)?;
    Ok((text.to_string(), total))
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// Encodes an `OKAY` status.
pub fn encode_okay() -> Vec<u8> {
    Status::Okay.as_bytes().to_vec()
}

/// Encodes a `FAIL` status followed by its length-prefixed message.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] for messages over
/// [`MAX_PAYLOAD_LEN`] bytes.
pub fn encode_fail(message: &str) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Status::Fail.as_bytes().to_vec();
    buf.extend_from_slice(&encode_length_prefixed(message.as_bytes())?);
    Ok(buf)
}

/// Encodes an arbitrary payload as `[len:4 hex][payload]`.
///
/// The daemon uses this shape for the `host:devices` body and for `FAIL`
/// messages.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] for payloads over
/// [`MAX_PAYLOAD_LEN`] bytes.
pub fn encode_length_prefixed(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let header = encode_length(payload.len())?;
    let mut buf = Vec::with_capacity(LENGTH_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decodes one response header from the beginning of `bytes`.
///
/// Returns the response and the number of bytes consumed.  For `OKAY` that is
/// exactly [`STATUS_SIZE`]; for `FAIL` it is the status plus the error block
/// and nothing more, so any trailing bytes stay with the caller.
///
/// # Errors
///
/// - [`ProtocolError::InsufficientData`] when the header is incomplete.
/// - [`ProtocolError::UnexpectedStatus`] for unknown status codes.
/// - [`ProtocolError::InvalidUtf8`] when the `FAIL` message is not text.
pub fn decode_response(bytes: &[u8]) -> Result<(Response, usize), ProtocolError> {
    if bytes.len() < STATUS_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: STATUS_SIZE,
            available: bytes.len(),
        });
    }
    let mut status = [0u8; STATUS_SIZE];
    status.copy_from_slice(&bytes[..STATUS_SIZE]);

    match Status::parse(status)? {
        Status::Okay => Ok((Response::Okay, STATUS_SIZE)),
        Status::Fail => {
            let rest = &bytes[STATUS_SIZE..];
            let len = read_length_prefix(rest)?;
            let total = LENGTH_HEADER_SIZE + len;
            if rest.len() < total {
                return Err(ProtocolError::InsufficientData {
                    needed: STATUS_SIZE + total,
                    available: bytes.len(),
                });
            }
            let message = decode_text(&rest[LENGTH_HEADER_SIZE..total])?;
            Ok((Response::Fail(message), STATUS_SIZE + total))
        }
    }
}

/// Decodes a UTF-8 message body.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidUtf8`] on invalid input.
pub fn decode_text(bytes: &[u8]) -> Result<String, ProtocolError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Decodes one `[len:4 hex][payload]` block from the beginning of `bytes`.
///
/// Returns the payload slice and the number of bytes consumed.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] when the block is incomplete
/// and [`ProtocolError::MalformedLength`] for a bad header.
pub fn decode_length_prefixed(bytes: &[u8]) -> Result<(&[u8], usize), ProtocolError> {
    let len = read_length_prefix(bytes)?;
    let total = LENGTH_HEADER_SIZE + len;
    if bytes.len() < total {
        return Err(ProtocolError::InsufficientData {
            needed: total,
            available: bytes.len(),
        });
    }
    Ok((&bytes[LENGTH_HEADER_SIZE..total], total))
}

fn read_length_prefix(bytes: &[u8]) -> Result<usize, ProtocolError> {
    if bytes.len() < LENGTH_HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: LENGTH_HEADER_SIZE,
            available: bytes.len(),
        });
    }
    let mut header = [0u8; LENGTH_HEADER_SIZE];
    header.copy_from_slice(&bytes[..LENGTH_HEADER_SIZE]);
    decode_length(header)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
