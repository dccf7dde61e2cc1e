use super::*;

fn expect_violation(client: &Backend) -> ViolationKind {
    match client.blocking_dispatch() {
        Err(WaylandError::Violation(violation)) => violation.kind,
        other => panic!("Unexpected result: {other:?}"),
    }
}

#[test]
fn unknown_opcode() {
    let (client, mut peer) = connect();
    let (global, global_data) = bind_test_global(&client, &mut peer);

    peer.send(message!(global.protocol_id(), 12, []));
    assert_eq!(expect_violation(&client), ViolationKind::UnknownOpcode);
    // the connection is dead afterwards
    assert!(global_data.is_destroyed());
    assert!(matches!(client.last_error(), Some(WaylandError::Violation(_))));
}

#[test]
fn malformed_frame() {
    let (client, mut peer) = connect();
    let (global, _) = bind_test_global(&client, &mut peer);

    // a ping event whose string is not NUL-terminated
    let mut frame = Vec::new();
    frame.extend_from_slice(&global.protocol_id().to_ne_bytes());
    frame.extend_from_slice(&(20u32 << 16).to_ne_bytes());
    frame.extend_from_slice(&7u32.to_ne_bytes());
    frame.extend_from_slice(&4u32.to_ne_bytes());
    frame.extend_from_slice(b"abcd");
    peer.send_raw(&frame);

    assert!(matches!(expect_violation(&client), ViolationKind::MalformedFrame(_)));
}

#[test]
fn bad_header_size() {
    let (client, mut peer) = connect();
    let (global, _) = bind_test_global(&client, &mut peer);

    let mut frame = Vec::new();
    frame.extend_from_slice(&global.protocol_id().to_ne_bytes());
    frame.extend_from_slice(&(6u32 << 16).to_ne_bytes());
    peer.send_raw(&frame);

    assert!(matches!(expect_violation(&client), ViolationKind::MalformedFrame(_)));
}

#[test]
fn unknown_object_argument() {
    let (client, mut peer) = connect();
    let (global, _) = bind_test_global(&client, &mut peer);

    peer.send(message!(global.protocol_id(), 2, [Argument::Object(77)]));
    assert_eq!(expect_violation(&client), ViolationKind::UnknownObject(77));
}

#[test]
fn wrong_interface_argument() {
    let (client, mut peer) = connect();
    let (global, _) = bind_test_global(&client, &mut peer);

    // the registry is not a test_child
    peer.send(message!(global.protocol_id(), 2, [Argument::Object(2)]));
    assert_eq!(expect_violation(&client), ViolationKind::WrongInterface(2));
}
