//! Binding tables of the core protocol interfaces
//!
//! For every interface: its name, the highest version this crate supports, and for
//! every request and event its name, signature and the interfaces of its object
//! arguments. Opcodes are the positions in the `requests` and `events` lists.

use wayrt_backend::protocol::{AllowNull, ArgumentType, Interface, MessageDesc};

pub use wayrt_backend::{WL_CALLBACK_INTERFACE, WL_DISPLAY_INTERFACE, WL_REGISTRY_INTERFACE};

const INT: ArgumentType = ArgumentType::Int;
const UINT: ArgumentType = ArgumentType::Uint;
const FIXED: ArgumentType = ArgumentType::Fixed;
const STR: ArgumentType = ArgumentType::Str(AllowNull::No);
const OPT_STR: ArgumentType = ArgumentType::Str(AllowNull::Yes);
const OBJ: ArgumentType = ArgumentType::Object(AllowNull::No);
const OPT_OBJ: ArgumentType = ArgumentType::Object(AllowNull::Yes);
const NEW_ID: ArgumentType = ArgumentType::NewId;
const ARRAY: ArgumentType = ArgumentType::Array;
const FD: ArgumentType = ArgumentType::Fd;

const fn message(name: &'static str, since: u32, signature: &'static [ArgumentType]) -> MessageDesc {
    MessageDesc {
        name,
        signature,
        since,
        is_destructor: false,
        child_interface: None,
        arg_interfaces: &[],
    }
}

const fn destructor(name: &'static str, since: u32) -> MessageDesc {
    MessageDesc { is_destructor: true, ..message(name, since, &[]) }
}

/// Interface `wl_compositor`
pub static WL_COMPOSITOR_INTERFACE: Interface = Interface {
    name: "wl_compositor",
    version: 4,
    requests: &[
        MessageDesc {
            child_interface: Some(&WL_SURFACE_INTERFACE),
            ..message("create_surface", 1, &[NEW_ID])
        },
        MessageDesc {
            child_interface: Some(&WL_REGION_INTERFACE),
            ..message("create_region", 1, &[NEW_ID])
        },
    ],
    events: &[],
};

/// Interface `wl_shm_pool`
pub static WL_SHM_POOL_INTERFACE: Interface = Interface {
    name: "wl_shm_pool",
    version: 1,
    requests: &[
        MessageDesc {
            child_interface: Some(&WL_BUFFER_INTERFACE),
            ..message("create_buffer", 1, &[NEW_ID, INT, INT, INT, INT, UINT])
        },
        destructor("destroy", 1),
        message("resize", 1, &[INT]),
    ],
    events: &[],
};

/// Interface `wl_shm`
pub static WL_SHM_INTERFACE: Interface = Interface {
    name: "wl_shm",
    version: 1,
    requests: &[MessageDesc {
        child_interface: Some(&WL_SHM_POOL_INTERFACE),
        ..message("create_pool", 1, &[NEW_ID, FD, INT])
    }],
    events: &[message("format", 1, &[UINT])],
};

/// Interface `wl_buffer`
pub static WL_BUFFER_INTERFACE: Interface = Interface {
    name: "wl_buffer",
    version: 1,
    requests: &[destructor("destroy", 1)],
    events: &[message("release", 1, &[])],
};

/// Interface `wl_data_offer`
pub static WL_DATA_OFFER_INTERFACE: Interface = Interface {
    name: "wl_data_offer",
    version: 3,
    requests: &[
        message("accept", 1, &[UINT, OPT_STR]),
        message("receive", 1, &[STR, FD]),
        destructor("destroy", 1),
        message("finish", 3, &[]),
        message("set_actions", 3, &[UINT, UINT]),
    ],
    events: &[
        message("offer", 1, &[STR]),
        message("source_actions", 3, &[UINT]),
        message("action", 3, &[UINT]),
    ],
};

/// Interface `wl_data_source`
pub static WL_DATA_SOURCE_INTERFACE: Interface = Interface {
    name: "wl_data_source",
    version: 3,
    requests: &[
        message("offer", 1, &[STR]),
        destructor("destroy", 1),
        message("set_actions", 3, &[UINT]),
    ],
    events: &[
        message("target", 1, &[OPT_STR]),
        message("send", 1, &[STR, FD]),
        message("cancelled", 1, &[]),
        message("dnd_drop_performed", 3, &[]),
        message("dnd_finished", 3, &[]),
        message("action", 3, &[UINT]),
    ],
};

/// Interface `wl_data_device`
pub static WL_DATA_DEVICE_INTERFACE: Interface = Interface {
    name: "wl_data_device",
    version: 3,
    requests: &[
        MessageDesc {
            arg_interfaces: &[
                &WL_DATA_SOURCE_INTERFACE,
                &WL_SURFACE_INTERFACE,
                &WL_SURFACE_INTERFACE,
            ],
            ..message("start_drag", 1, &[OPT_OBJ, OBJ, OPT_OBJ, UINT])
        },
        MessageDesc {
            arg_interfaces: &[&WL_DATA_SOURCE_INTERFACE],
            ..message("set_selection", 1, &[OPT_OBJ, UINT])
        },
        destructor("release", 2),
    ],
    events: &[
        MessageDesc {
            child_interface: Some(&WL_DATA_OFFER_INTERFACE),
            ..message("data_offer", 1, &[NEW_ID])
        },
        MessageDesc {
            arg_interfaces: &[&WL_SURFACE_INTERFACE, &WL_DATA_OFFER_INTERFACE],
            ..message("enter", 1, &[UINT, OBJ, FIXED, FIXED, OPT_OBJ])
        },
        message("leave", 1, &[]),
        message("motion", 1, &[UINT, FIXED, FIXED]),
        message("drop", 1, &[]),
        MessageDesc {
            arg_interfaces: &[&WL_DATA_OFFER_INTERFACE],
            ..message("selection", 1, &[OPT_OBJ])
        },
    ],
};

/// Interface `wl_data_device_manager`
pub static WL_DATA_DEVICE_MANAGER_INTERFACE: Interface = Interface {
    name: "wl_data_device_manager",
    version: 3,
    requests: &[
        MessageDesc {
            child_interface: Some(&WL_DATA_SOURCE_INTERFACE),
            ..message("create_data_source", 1, &[NEW_ID])
        },
        MessageDesc {
            child_interface: Some(&WL_DATA_DEVICE_INTERFACE),
            arg_interfaces: &[&WL_SEAT_INTERFACE],
            ..message("get_data_device", 1, &[NEW_ID, OBJ])
        },
    ],
    events: &[],
};

/// Interface `wl_surface`
pub static WL_SURFACE_INTERFACE: Interface = Interface {
    name: "wl_surface",
    version: 4,
    requests: &[
        destructor("destroy", 1),
        MessageDesc {
            arg_interfaces: &[&WL_BUFFER_INTERFACE],
            ..message("attach", 1, &[OPT_OBJ, INT, INT])
        },
        message("damage", 1, &[INT, INT, INT, INT]),
        MessageDesc {
            child_interface: Some(&WL_CALLBACK_INTERFACE),
            ..message("frame", 1, &[NEW_ID])
        },
        MessageDesc {
            arg_interfaces: &[&WL_REGION_INTERFACE],
            ..message("set_opaque_region", 1, &[OPT_OBJ])
        },
        MessageDesc {
            arg_interfaces: &[&WL_REGION_INTERFACE],
            ..message("set_input_region", 1, &[OPT_OBJ])
        },
        message("commit", 1, &[]),
        message("set_buffer_transform", 2, &[INT]),
        message("set_buffer_scale", 3, &[INT]),
        message("damage_buffer", 4, &[INT, INT, INT, INT]),
    ],
    events: &[
        MessageDesc {
            arg_interfaces: &[&WL_OUTPUT_INTERFACE],
            ..message("enter", 1, &[OBJ])
        },
        MessageDesc {
            arg_interfaces: &[&WL_OUTPUT_INTERFACE],
            ..message("leave", 1, &[OBJ])
        },
    ],
};

/// Interface `wl_seat`
pub static WL_SEAT_INTERFACE: Interface = Interface {
    name: "wl_seat",
    version: 5,
    requests: &[
        MessageDesc {
            child_interface: Some(&WL_POINTER_INTERFACE),
            ..message("get_pointer", 1, &[NEW_ID])
        },
        MessageDesc {
            child_interface: Some(&WL_KEYBOARD_INTERFACE),
            ..message("get_keyboard", 1, &[NEW_ID])
        },
        MessageDesc {
            child_interface: Some(&WL_TOUCH_INTERFACE),
            ..message("get_touch", 1, &[NEW_ID])
        },
        destructor("release", 5),
    ],
    events: &[message("capabilities", 1, &[UINT]), message("name", 2, &[STR])],
};

/// Interface `wl_pointer`
pub static WL_POINTER_INTERFACE: Interface = Interface {
    name: "wl_pointer",
    version: 5,
    requests: &[
        MessageDesc {
            arg_interfaces: &[&WL_SURFACE_INTERFACE],
            ..message("set_cursor", 1, &[UINT, OPT_OBJ, INT, INT])
        },
        destructor("release", 3),
    ],
    events: &[
        MessageDesc {
            arg_interfaces: &[&WL_SURFACE_INTERFACE],
            ..message("enter", 1, &[UINT, OBJ, FIXED, FIXED])
        },
        MessageDesc {
            arg_interfaces: &[&WL_SURFACE_INTERFACE],
            ..message("leave", 1, &[UINT, OBJ])
        },
        message("motion", 1, &[UINT, FIXED, FIXED]),
        message("button", 1, &[UINT, UINT, UINT, UINT]),
        message("axis", 1, &[UINT, UINT, FIXED]),
        message("frame", 5, &[]),
        message("axis_source", 5, &[UINT]),
        message("axis_stop", 5, &[UINT, UINT]),
        message("axis_discrete", 5, &[UINT, INT]),
    ],
};

/// Interface `wl_keyboard`
pub static WL_KEYBOARD_INTERFACE: Interface = Interface {
    name: "wl_keyboard",
    version: 5,
    requests: &[destructor("release", 3)],
    events: &[
        message("keymap", 1, &[UINT, FD, UINT]),
        MessageDesc {
            arg_interfaces: &[&WL_SURFACE_INTERFACE],
            ..message("enter", 1, &[UINT, OBJ, ARRAY])
        },
        MessageDesc {
            arg_interfaces: &[&WL_SURFACE_INTERFACE],
            ..message("leave", 1, &[UINT, OBJ])
        },
        message("key", 1, &[UINT, UINT, UINT, UINT]),
        message("modifiers", 1, &[UINT, UINT, UINT, UINT, UINT]),
        message("repeat_info", 4, &[INT, INT]),
    ],
};

/// Interface `wl_touch`
pub static WL_TOUCH_INTERFACE: Interface = Interface {
    name: "wl_touch",
    version: 5,
    requests: &[destructor("release", 3)],
    events: &[
        MessageDesc {
            arg_interfaces: &[&WL_SURFACE_INTERFACE],
            ..message("down", 1, &[UINT, UINT, OBJ, INT, FIXED, FIXED])
        },
        message("up", 1, &[UINT, UINT, INT]),
        message("motion", 1, &[UINT, INT, FIXED, FIXED]),
        message("frame", 1, &[]),
        message("cancel", 1, &[]),
    ],
};

/// Interface `wl_output`
pub static WL_OUTPUT_INTERFACE: Interface = Interface {
    name: "wl_output",
    version: 4,
    requests: &[destructor("release", 3)],
    events: &[
        message("geometry", 1, &[INT, INT, INT, INT, INT, STR, STR, INT]),
        message("mode", 1, &[UINT, INT, INT, INT]),
        message("done", 2, &[]),
        message("scale", 2, &[INT]),
        message("name", 4, &[STR]),
        message("description", 4, &[STR]),
    ],
};

/// Interface `wl_region`
pub static WL_REGION_INTERFACE: Interface = Interface {
    name: "wl_region",
    version: 1,
    requests: &[
        destructor("destroy", 1),
        message("add", 1, &[INT, INT, INT, INT]),
        message("subtract", 1, &[INT, INT, INT, INT]),
    ],
    events: &[],
};

/// Interface `wl_subcompositor`
pub static WL_SUBCOMPOSITOR_INTERFACE: Interface = Interface {
    name: "wl_subcompositor",
    version: 1,
    requests: &[
        destructor("destroy", 1),
        MessageDesc {
            child_interface: Some(&WL_SUBSURFACE_INTERFACE),
            arg_interfaces: &[&WL_SURFACE_INTERFACE, &WL_SURFACE_INTERFACE],
            ..message("get_subsurface", 1, &[NEW_ID, OBJ, OBJ])
        },
    ],
    events: &[],
};

/// Interface `wl_subsurface`
pub static WL_SUBSURFACE_INTERFACE: Interface = Interface {
    name: "wl_subsurface",
    version: 1,
    requests: &[
        destructor("destroy", 1),
        message("set_position", 1, &[INT, INT]),
        MessageDesc {
            arg_interfaces: &[&WL_SURFACE_INTERFACE],
            ..message("place_above", 1, &[OBJ])
        },
        MessageDesc {
            arg_interfaces: &[&WL_SURFACE_INTERFACE],
            ..message("place_below", 1, &[OBJ])
        },
        message("set_sync", 1, &[]),
        message("set_desync", 1, &[]),
    ],
    events: &[],
};
