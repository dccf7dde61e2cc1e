mod helpers;

use std::sync::{Arc, Mutex};

use helpers::{backend, bind, client, TestCompositor};

use backend::{message, protocol::Argument};
use client::{
    output::Mode,
    protocol::{
        interfaces::{WL_COMPOSITOR_INTERFACE, WL_OUTPUT_INTERFACE, WL_SEAT_INTERFACE, WL_SHM_INTERFACE},
        Capability, OutputMode,
    },
    seat::SeatListener,
    BindError, Compositor, GlobalInfo, Output, Proxy, Registry, RegistryListener, Seat,
};

fn info(name: u32, interface: &str, version: u32) -> GlobalInfo {
    GlobalInfo { name, interface: interface.into(), version }
}

#[test]
fn registry_lists_globals() {
    let (conn, _compositor) = TestCompositor::new(&[
        (&WL_COMPOSITOR_INTERFACE, 4),
        (&WL_SHM_INTERFACE, 1),
        (&WL_OUTPUT_INTERFACE, 2),
    ]);
    let registry = conn.get_registry(()).unwrap();
    assert!(registry.globals().is_empty());
    conn.roundtrip().unwrap();
    assert_eq!(
        registry.globals(),
        [info(1, "wl_compositor", 4), info(2, "wl_shm", 1), info(3, "wl_output", 2)]
    );
}

#[test]
fn bind_checks_versions() {
    let (conn, compositor) =
        TestCompositor::new(&[(&WL_COMPOSITOR_INTERFACE, 4), (&WL_OUTPUT_INTERFACE, 2)]);
    let registry = conn.get_registry(()).unwrap();
    conn.roundtrip().unwrap();

    assert_eq!(
        registry.bind::<Compositor>(1, 0, ()).unwrap_err(),
        BindError::UnsupportedVersion { interface: "wl_compositor", requested: 0, max: 4 }
    );
    assert_eq!(
        registry.bind::<Compositor>(1, 5, ()).unwrap_err(),
        BindError::UnsupportedVersion { interface: "wl_compositor", requested: 5, max: 4 }
    );
    // the server advertised a lower version than this crate supports
    assert_eq!(
        registry.bind::<Output>(2, 3, Box::new(())).unwrap_err(),
        BindError::UnsupportedVersion { interface: "wl_output", requested: 3, max: 2 }
    );
    assert_eq!(
        registry.bind_one::<Output>(3..=4, Box::new(())).unwrap_err(),
        BindError::UnsupportedVersion { interface: "wl_output", requested: 3, max: 2 }
    );
    assert_eq!(registry.bind_one::<Seat>(1..=5, Box::new(())).unwrap_err(), BindError::NotPresent);

    // nothing reached the server
    conn.roundtrip().unwrap();
    assert!(!compositor.requests().iter().any(|r| r == "wl_registry.bind"));

    let wl_compositor = registry.bind::<Compositor>(1, 3, ()).unwrap();
    assert_eq!(wl_compositor.version(), 3);
    let output = registry.bind_one::<Output>(1..=4, Box::new(())).unwrap();
    assert_eq!(output.version(), 2);
    conn.roundtrip().unwrap();
    let requests = compositor.take_requests();
    let binds: Vec<_> = requests.iter().filter(|r| r.name == "bind").collect();
    assert_eq!(binds.len(), 2);
    assert!(matches!(binds[0].args[2], Argument::Uint(3)));
    assert!(matches!(binds[1].args[2], Argument::Uint(2)));
}

#[derive(Default)]
struct RecordGlobals {
    events: Arc<Mutex<Vec<String>>>,
}

impl RegistryListener for RecordGlobals {
    fn global(&self, registry: &Registry, name: u32, interface: &str, version: u32) {
        // the list is updated before the listener runs
        assert!(registry.globals().iter().any(|g| g.name == name));
        self.events.lock().unwrap().push(format!("+{name} {interface} v{version}"));
    }

    fn global_remove(&self, registry: &Registry, name: u32) {
        assert!(!registry.globals().iter().any(|g| g.name == name));
        self.events.lock().unwrap().push(format!("-{name}"));
    }
}

#[test]
fn globals_come_and_go() {
    let (conn, compositor) = TestCompositor::new(&[(&WL_COMPOSITOR_INTERFACE, 4)]);
    let listener = RecordGlobals::default();
    let events = listener.events.clone();
    let registry = conn.get_registry(listener).unwrap();
    conn.roundtrip().unwrap();

    let seat = compositor.add_global(&WL_SEAT_INTERFACE, 5);
    conn.roundtrip().unwrap();
    assert_eq!(registry.globals().len(), 2);
    assert!(registry.globals().contains(&info(seat, "wl_seat", 5)));

    compositor.remove_global(1);
    conn.roundtrip().unwrap();
    assert_eq!(registry.globals(), [info(seat, "wl_seat", 5)]);
    assert_eq!(*events.lock().unwrap(), ["+1 wl_compositor v4", "+2 wl_seat v5", "-1"]);

    // the removed global is gone from the local list
    assert_eq!(registry.bind_one::<Compositor>(1..=4, ()).unwrap_err(), BindError::NotPresent);
}

#[test]
fn output_properties_are_double_buffered() {
    let (conn, compositor) = TestCompositor::new(&[(&WL_OUTPUT_INTERFACE, 2)]);
    let output = bind::<Output>(&conn, Box::new(()));
    conn.roundtrip().unwrap();

    let info = output.info();
    let geometry = info.geometry.unwrap();
    assert_eq!((geometry.physical_width, geometry.physical_height), (300, 200));
    assert_eq!((geometry.make.as_str(), geometry.model.as_str()), ("wayrt", "virtual"));
    assert_eq!(info.scale, 2);
    let first = Mode {
        flags: OutputMode::Current | OutputMode::Preferred,
        width: 1920,
        height: 1080,
        refresh: 60000,
    };
    assert_eq!(info.modes, [first]);

    // a new current mode, only visible after done
    let id = output.id().protocol_id();
    compositor.send_event(message!(
        id,
        1,
        [Argument::Uint(1), Argument::Int(1280), Argument::Int(720), Argument::Int(60000)]
    ));
    conn.roundtrip().unwrap();
    assert_eq!(output.info().modes, [first]);

    compositor.send_event(message!(id, 2, []));
    conn.roundtrip().unwrap();
    let second = Mode { flags: OutputMode::Current, width: 1280, height: 720, refresh: 60000 };
    assert_eq!(output.info().modes, [Mode { flags: OutputMode::Preferred, ..first }, second]);
}

#[test]
fn version_1_output_updates_immediately() {
    let (conn, _compositor) = TestCompositor::new(&[(&WL_OUTPUT_INTERFACE, 1)]);
    let output = bind::<Output>(&conn, Box::new(()));
    conn.roundtrip().unwrap();
    let info = output.info();
    assert!(info.geometry.is_some());
    assert_eq!(info.modes.len(), 1);
    assert_eq!(info.scale, 1);
}

#[derive(Default)]
struct RecordSeat {
    events: Arc<Mutex<Vec<String>>>,
}

impl SeatListener for RecordSeat {
    fn capabilities(&self, _: &Seat, capabilities: Capability) {
        self.events.lock().unwrap().push(format!("capabilities {}", capabilities.bits()));
    }

    fn name(&self, _: &Seat, name: &str) {
        self.events.lock().unwrap().push(format!("name {name}"));
    }
}

#[test]
fn seat_capabilities_and_name() {
    let (conn, _compositor) = TestCompositor::new(&[(&WL_SEAT_INTERFACE, 5)]);
    let listener = RecordSeat::default();
    let events = listener.events.clone();
    let seat = bind::<Seat>(&conn, Box::new(listener));
    conn.roundtrip().unwrap();

    assert_eq!(seat.capabilities(), Capability::Pointer | Capability::Keyboard);
    assert_eq!(seat.name().as_deref(), Some("seat0"));
    assert_eq!(*events.lock().unwrap(), ["capabilities 3", "name seat0"]);

    let pointer = seat.get_pointer(()).unwrap();
    let keyboard = seat.get_keyboard(()).unwrap();
    assert_eq!(pointer.version(), 5);
    pointer.release().unwrap();
    keyboard.release().unwrap();
    seat.release().unwrap();
    assert!(!seat.is_alive());
}
