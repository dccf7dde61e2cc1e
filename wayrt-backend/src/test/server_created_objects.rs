use std::os::unix::io::AsRawFd;

use super::*;
use crate::map::SERVER_ID_LIMIT;

#[test]
fn server_created_object() {
    let (client, mut peer) = connect();
    let (global, global_data) = bind_test_global(&client, &mut peer);

    peer.send(message!(global.protocol_id(), 1, [Argument::NewId(SERVER_ID_LIMIT)]));
    peer.send(message!(SERVER_ID_LIMIT, 0, [Argument::Int(-4)]));
    peer.send(message!(global.protocol_id(), 2, [Argument::Object(SERVER_ID_LIMIT)]));

    client.dispatch_until(None, || global_data.events().len() == 2).unwrap();
    let events = global_data.events();
    assert_eq!(events[0], format!("announce(new id test_child@{SERVER_ID_LIMIT})"));
    assert_eq!(events[1], format!("pointed(test_child@{SERVER_ID_LIMIT})"));

    let (child, child_data) = global_data.child(0);
    assert_eq!(child.protocol_id(), SERVER_ID_LIMIT);
    assert_eq!(child_data.events(), vec!["value(-4)".to_string()]);
    // the new object inherits the version of its parent
    assert_eq!(client.info(&child).unwrap().version, 3);
}

#[test]
fn server_id_in_client_namespace() {
    let (client, mut peer) = connect();
    let (global, _) = bind_test_global(&client, &mut peer);

    peer.send(message!(global.protocol_id(), 1, [Argument::NewId(42)]));
    match client.blocking_dispatch() {
        Err(WaylandError::Violation(violation)) => {
            assert_eq!(violation.kind, ViolationKind::InvalidNewId(42));
        }
        other => panic!("Unexpected result: {other:?}"),
    }
}

#[test]
fn client_destroyed_server_object_is_replaced() {
    let (client, mut peer) = connect();
    let (global, global_data) = bind_test_global(&client, &mut peer);

    peer.send(message!(global.protocol_id(), 1, [Argument::NewId(SERVER_ID_LIMIT)]));
    client.dispatch_until(None, || global_data.events().len() == 1).unwrap();
    let (first, first_data) = global_data.child(0);
    client.send_request(message!(first.clone(), 0, []), None, None).unwrap();
    assert!(first_data.is_destroyed());

    // the server may reuse its ids without a delete_id
    peer.send(message!(global.protocol_id(), 1, [Argument::NewId(SERVER_ID_LIMIT)]));
    client.dispatch_until(None, || global_data.events().len() == 2).unwrap();
    let (second, _) = global_data.child(1);
    assert_eq!(second.protocol_id(), first.protocol_id());
    assert_ne!(second, first);
    assert!(client.info(&second).is_ok());
    assert!(client.info(&first).is_err());
}

#[test]
fn fd_event() {
    let (client, mut peer) = connect();
    let (global, global_data) = bind_test_global(&client, &mut peer);

    let (file, _other) = UnixStream::pair().unwrap();
    peer.send(message!(global.protocol_id(), 3, [Argument::Fd(file.as_raw_fd())]));
    client.dispatch_until(None, || global_data.events().len() == 1).unwrap();
    assert!(global_data.events()[0].starts_with("fd(fd "));
}
