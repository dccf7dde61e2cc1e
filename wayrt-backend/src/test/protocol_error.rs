use std::ffi::CString;

use super::*;

#[test]
fn protocol_error() {
    let (client, mut peer) = connect();
    let (global, global_data) = bind_test_global(&client, &mut peer);

    let display_data = Arc::new(RecordingData::default());
    client.set_data(&client.display_id(), display_data.clone()).unwrap();

    peer.send(message!(
        1,
        0,
        [
            Argument::Object(global.protocol_id()),
            Argument::Uint(5),
            Argument::Str(Some(Box::new(CString::new("go away").unwrap()))),
        ]
    ));

    let ret = client.blocking_dispatch();
    match ret {
        Err(WaylandError::Protocol(err)) => {
            assert_eq!(err.code, 5);
            assert_eq!(err.object_id, global.protocol_id());
            assert_eq!(err.object_interface, "test_global");
            assert_eq!(err.message, "go away");
        }
        other => panic!("Unexpected result: {other:?}"),
    }
    // the display listener saw the error first
    assert_eq!(
        display_data.events(),
        vec![format!("error(test_global@{}, 5, \"go away\")", global.protocol_id())]
    );
    // every object of the connection is dead
    assert!(global_data.is_destroyed());
    assert!(matches!(client.last_error(), Some(WaylandError::Protocol(_))));
    assert!(matches!(client.flush(), Err(WaylandError::Protocol(_))));
    assert!(matches!(client.dispatch_pending(), Err(WaylandError::Protocol(_))));
}

#[test]
fn server_hangup() {
    let (client, peer) = connect();
    let sync_data = Arc::new(RecordingData::default());
    client
        .send_request(
            message!(client.display_id(), 0, [Argument::NewId(ObjectId::null())]),
            Some(sync_data.clone()),
            Some((&crate::WL_CALLBACK_INTERFACE, 1)),
        )
        .unwrap();
    drop(peer);

    assert!(matches!(
        client.dispatch_until(None, || false),
        Err(WaylandError::ConnectionClosed)
    ));
    // pending waits fail through the destruction notification
    assert!(sync_data.is_destroyed());
}
