//! Protocol module containing the length-prefixed codec, command grammar and
//! channel identifiers.

pub mod codec;
pub mod commands;
pub mod ids;

pub use codec::{
    decode_length, decode_length_prefixed, decode_request, decode_response, decode_text,
    encode_fail, encode_length, encode_length_prefixed, encode_okay, encode_request,
    ProtocolError, Response, Status, LENGTH_HEADER_SIZE, MAX_PAYLOAD_LEN, STATUS_SIZE,
};
pub use commands::{device_shell, HostCommand};
pub use ids::{LocalId, LocalIdAllocator, RemoteId};
