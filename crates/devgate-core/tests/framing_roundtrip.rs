//! Integration tests for the devgate-core host-protocol codec.
//!
//! These tests drive the public API the way the service crate and its fake
//! daemons do: frame a typed command, decode it on the "daemon" side, then
//! decode the reply the daemon would send back.

use devgate_core::{
    domain::parse_device_list,
    protocol::{
        decode_length, decode_length_prefixed, decode_request, decode_response, decode_text,
        device_shell, encode_fail, encode_length, encode_length_prefixed, encode_okay,
        encode_request, HostCommand, ProtocolError, Response, MAX_PAYLOAD_LEN,
    },
    DeviceId,
};

/// Frames a command and decodes it again as the daemon would.
fn through_daemon(cmd: &HostCommand) -> String {
    let frame = encode_request(&cmd.to_wire()).expect("encode must succeed");
    let (text, consumed) = decode_request(&frame).expect("decode must succeed");
    assert_eq!(consumed, frame.len(), "all bytes must be consumed");
    text
}

#[test]
fn test_length_header_boundaries() {
    for len in [0usize, 1, 9999, MAX_PAYLOAD_LEN] {
        let header = encode_length(len).unwrap();
        assert_eq!(decode_length(header).unwrap(), len, "len {len}");
    }
    assert_eq!(&encode_length(12).unwrap(), b"000c");
    assert_eq!(&encode_length(MAX_PAYLOAD_LEN).unwrap(), b"ffff");
}

#[test]
fn test_oversized_payload_is_rejected() {
    let command = "x".repeat(MAX_PAYLOAD_LEN + 1);
    assert_eq!(
        encode_request(&command),
        Err(ProtocolError::PayloadTooLarge {
            len: MAX_PAYLOAD_LEN + 1
        })
    );
}

#[test]
fn test_device_shell_sequence_reaches_daemon_in_order() {
    // Arrange
    let id = DeviceId::from("emulator-5554");
    let commands = device_shell(&id, "getprop");

    // Act
    let seen: Vec<String> = commands.iter().map(through_daemon).collect();

    // Assert
    assert_eq!(seen, vec!["host:transport:emulator-5554", "shell:getprop"]);
}

#[test]
fn test_devices_reply_decodes_into_device_list() {
    // Arrange: OKAY followed by the length-prefixed listing.
    let mut reply = encode_okay();
    reply.extend(encode_length_prefixed(b"A\tdevice\nB\tunauthorized\n").unwrap());

    // Act
    let (response, consumed) = decode_response(&reply).unwrap();
    let (payload, used) = decode_length_prefixed(&reply[consumed..]).unwrap();
    let body = decode_text(payload).unwrap();
    let devices = parse_device_list(&body);

    // Assert
    assert_eq!(response, Response::Okay);
    assert_eq!(consumed + used, reply.len());
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].id.as_str(), "A");
    assert_eq!(devices[1].status, "unauthorized");
}

#[test]
fn test_fail_reply_message_is_verbatim_and_trailing_bytes_untouched() {
    // Arrange
    let mut reply = encode_fail("device 'X' not found").unwrap();
    reply.extend_from_slice(b"trailing");

    // Act
    let (response, consumed) = decode_response(&reply).unwrap();

    // Assert
    assert_eq!(response, Response::Fail("device 'X' not found".to_string()));
    assert_eq!(&reply[consumed..], b"trailing");
}

#[test]
fn test_unknown_status_is_a_protocol_error() {
    let err = decode_response(b"WHAT").unwrap_err();
    assert_eq!(err, ProtocolError::UnexpectedStatus(*b"WHAT"));
}

#[test]
fn test_utf8_command_length_counts_bytes() {
    let frame = encode_request("shell:echo é").unwrap();
    // "shell:echo é" is 13 bytes because 'é' encodes as two.
    assert_eq!(&frame[..4], b"000d");
}
