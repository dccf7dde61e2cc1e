// Mutates the process environment, so it runs without the test harness.

mod helpers;

use std::os::unix::{io::IntoRawFd, net::UnixListener, net::UnixStream};

use helpers::{client::ConnectError, client::Connection, TestCompositor};
use wayrt_client::protocol::interfaces::WL_OUTPUT_INTERFACE;

fn accept_one(listener: UnixListener) -> std::thread::JoinHandle<TestCompositor> {
    std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        TestCompositor::serve(stream, &[(&WL_OUTPUT_INTERFACE, 1)])
    })
}

fn check_globals(conn: &Connection) {
    let registry = conn.get_registry(()).unwrap();
    conn.roundtrip().unwrap();
    // check that we connected to the right compositor
    let globals = registry.globals();
    assert_eq!(globals.len(), 1);
    assert_eq!((globals[0].name, globals[0].interface.as_str(), globals[0].version), (1, "wl_output", 1));
}

fn main() {
    helpers::init_logger();
    let runtime_dir = tempfile::tempdir().unwrap();

    std::env::remove_var("WAYLAND_SOCKET");
    std::env::remove_var("WAYLAND_DISPLAY");
    std::env::set_var("XDG_RUNTIME_DIR", runtime_dir.path());

    // nobody listening on the default socket yet
    let default_path = runtime_dir.path().join("wayland-0");
    match Connection::connect_to_env() {
        Err(ConnectError::NoCompositor { endpoint }) => assert_eq!(endpoint, default_path),
        other => panic!("Unexpected result: {other:?}"),
    }

    // no override: the default name under the runtime directory
    let server = accept_one(UnixListener::bind(&default_path).unwrap());
    let conn = Connection::connect_to_env().unwrap();
    let _compositor = server.join().unwrap();
    check_globals(&conn);

    // WAYLAND_DISPLAY names another socket of the runtime directory
    let server = accept_one(UnixListener::bind(runtime_dir.path().join("wayland-7")).unwrap());
    std::env::set_var("WAYLAND_DISPLAY", "wayland-7");
    let conn = Connection::connect_to_env().unwrap();
    let _compositor = server.join().unwrap();
    check_globals(&conn);

    // an absolute WAYLAND_DISPLAY does not need the runtime directory
    let other_dir = tempfile::tempdir().unwrap();
    let absolute = other_dir.path().join("compositor.sock");
    let server = accept_one(UnixListener::bind(&absolute).unwrap());
    std::env::set_var("WAYLAND_DISPLAY", &absolute);
    std::env::remove_var("XDG_RUNTIME_DIR");
    let conn = Connection::connect_to_env().unwrap();
    let _compositor = server.join().unwrap();
    check_globals(&conn);

    // a relative name without runtime directory
    std::env::set_var("WAYLAND_DISPLAY", "wayland-7");
    assert!(matches!(Connection::connect_to_env(), Err(ConnectError::NoRuntimeDir)));
    std::env::set_var("XDG_RUNTIME_DIR", "relative/dir");
    assert!(matches!(Connection::connect_to_env(), Err(ConnectError::NoRuntimeDir)));

    // WAYLAND_SOCKET takes precedence, and is consumed
    let (client_end, server_end) = UnixStream::pair().unwrap();
    let _compositor = TestCompositor::serve(server_end, &[(&WL_OUTPUT_INTERFACE, 1)]);
    std::env::set_var("WAYLAND_SOCKET", client_end.into_raw_fd().to_string());
    let conn = Connection::connect_to_env().unwrap();
    assert!(std::env::var_os("WAYLAND_SOCKET").is_none());
    check_globals(&conn);

    std::env::set_var("WAYLAND_SOCKET", "not a number");
    assert!(matches!(Connection::connect_to_env(), Err(ConnectError::InvalidFd)));
    std::env::set_var("WAYLAND_SOCKET", "-3");
    assert!(matches!(Connection::connect_to_env(), Err(ConnectError::InvalidFd)));

    // connect_to ignores the environment variables naming the socket
    std::env::remove_var("WAYLAND_SOCKET");
    std::env::set_var("XDG_RUNTIME_DIR", runtime_dir.path());
    let server = accept_one(UnixListener::bind(runtime_dir.path().join("named")).unwrap());
    let conn = Connection::connect_to("named").unwrap();
    let _compositor = server.join().unwrap();
    check_globals(&conn);
}
