use lockcenter::ProtocolVersion;
use lockcenter::protocol::{Action, MAX_KEY_CHARS, Request, codec_for};

fn decode(version: ProtocolVersion, bytes: &[u8]) -> Request {
    let mut input = bytes;
    let request = codec_for(version).decode_request(&mut input).unwrap();
    assert!(input.is_empty(), "decoder left {} bytes", input.len());
    request
}

#[test]
fn current_round_trips_every_action() {
    let requests = vec![
        Request::lock("session1", Some("10.0.0.5")),
        Request::lock("session1", None),
        Request::lock("ключ", Some("::1")),
        Request::unlock("session1"),
        Request::reset_by_key("session1"),
        Request::reset_by_source(Some("10.0.0.5")),
        Request::reset_by_source(None),
        Request::lock("k".repeat(MAX_KEY_CHARS), Some(&"s".repeat(255))),
    ];
    let codec = codec_for(ProtocolVersion::Current);
    for request in requests {
        let bytes = codec.encode(&request).unwrap();
        assert_eq!(decode(ProtocolVersion::Current, &bytes), request);
    }
}

#[test]
fn legacy_round_trips_keyed_actions() {
    let codec = codec_for(ProtocolVersion::Legacy);
    for (action, code) in [(Action::Lock, 1), (Action::Unlock, 2), (Action::ResetByKey, 3)] {
        let request = Request {
            action,
            key: "session1".to_string(),
            source: String::new(),
        };
        let bytes = codec.encode(&request).unwrap();
        assert_eq!(bytes[0], 8);
        assert_eq!(bytes.last(), Some(&code));
        assert_eq!(decode(ProtocolVersion::Legacy, &bytes), request);
    }
}

#[test]
fn versions_disagree_on_the_action_position() {
    let request = Request::unlock("key");
    let current = codec_for(ProtocolVersion::Current).encode(&request).unwrap();
    let legacy = codec_for(ProtocolVersion::Legacy).encode(&request).unwrap();
    assert_eq!(current, vec![2, 3, b'k', b'e', b'y']);
    assert_eq!(legacy, vec![3, b'k', b'e', b'y', 2]);
}

#[test]
fn oversized_source_address_is_rejected() {
    let codec = codec_for(ProtocolVersion::Current);
    let source = "s".repeat(256);
    assert!(codec.encode(&Request::lock("k", Some(&source))).is_err());
    assert!(codec.encode(&Request::reset_by_source(Some(&source))).is_err());
    // Unlock carries no source address, so its length is irrelevant.
    let mut unlock = Request::unlock("k");
    unlock.source = source;
    assert!(codec.encode(&unlock).is_ok());
}

#[test]
fn key_boundary_applies_to_every_keyed_action() {
    let codec = codec_for(ProtocolVersion::Current);
    let ok = "k".repeat(MAX_KEY_CHARS);
    let too_long = "k".repeat(MAX_KEY_CHARS + 1);
    let builders: [fn(&str) -> Request; 3] = [
        |k| Request::lock(k, None),
        |k| Request::unlock(k),
        |k| Request::reset_by_key(k),
    ];
    for build in builders {
        assert!(codec.validate(&build(&ok)).is_ok());
        assert!(codec.validate(&build(&too_long)).is_err());
        assert!(codec.validate(&build("")).is_err());
    }
}
