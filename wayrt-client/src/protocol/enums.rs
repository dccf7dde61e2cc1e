//! Enumerated protocol values
//!
//! Plain enums convert from the wire with [`TryFrom<u32>`] and are delivered to
//! listeners as [`WEnum`](wayrt_backend::protocol::WEnum) so that values from a newer
//! protocol version do not fail the dispatch. Bitfields are [`bitflags`] types.

use wayrt_backend::protocol::WEnum;

macro_rules! wl_enum {
    (
        $(#[$attr:meta])*
        $name:ident {
            $( $(#[$vattr:meta])* $variant:ident = $value:literal ),* $(,)?
        }
    ) => {
        $(#[$attr])*
        #[repr(u32)]
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        pub enum $name {
            $( $(#[$vattr])* $variant = $value ),*
        }

        impl TryFrom<u32> for $name {
            type Error = ();
            fn try_from(val: u32) -> Result<$name, ()> {
                match val {
                    $( $value => Ok($name::$variant), )*
                    _ => Err(()),
                }
            }
        }

        impl From<$name> for u32 {
            fn from(val: $name) -> u32 {
                val as u32
            }
        }

        impl From<$name> for WEnum<$name> {
            fn from(val: $name) -> WEnum<$name> {
                WEnum::Value(val)
            }
        }
    };
}

wl_enum! {
    /// Transformation applied to buffer contents
    ///
    /// Rotations are counter-clockwise, flips are around the vertical axis and
    /// happen before the rotation.
    Transform {
        /// No transform
        Normal = 0,
        /// 90 degrees counter-clockwise
        _90 = 1,
        /// 180 degrees counter-clockwise
        _180 = 2,
        /// 270 degrees counter-clockwise
        _270 = 3,
        /// 180 degree flip around a vertical axis
        Flipped = 4,
        /// Flip and rotate 90 degrees counter-clockwise
        Flipped90 = 5,
        /// Flip and rotate 180 degrees counter-clockwise
        Flipped180 = 6,
        /// Flip and rotate 270 degrees counter-clockwise
        Flipped270 = 7,
    }
}

impl Transform {
    /// Whether this transform swaps the width and height of the buffer
    pub fn swaps_dimensions(self) -> bool {
        matches!(self, Self::_90 | Self::_270 | Self::Flipped90 | Self::Flipped270)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::Normal
    }
}

wl_enum! {
    /// Pixel formats of shared memory buffers
    ///
    /// Only the formats every compositor must support and a few common ones are named,
    /// other values are drm fourcc codes.
    ShmFormat {
        /// 32-bit ARGB format, [31:0] A:R:G:B 8:8:8:8 little endian
        Argb8888 = 0,
        /// 32-bit RGB format, [31:0] x:R:G:B 8:8:8:8 little endian
        Xrgb8888 = 1,
        /// 8-bit color index format
        C8 = 0x20203843,
        /// 16-bit RGB format, [15:0] R:G:B 5:6:5 little endian
        Rgb565 = 0x36314752,
        /// 32-bit ABGR format, [31:0] A:B:G:R 8:8:8:8 little endian
        Abgr8888 = 0x34324241,
        /// 32-bit xBGR format, [31:0] x:B:G:R 8:8:8:8 little endian
        Xbgr8888 = 0x34324258,
        /// 2 plane YCbCr Cr:Cb format, 2x2 subsampled Cr:Cb plane
        Nv12 = 0x3231564e,
    }
}

wl_enum! {
    /// Physical state of a pointer button
    ButtonState {
        /// The button is not pressed
        Released = 0,
        /// The button is pressed
        Pressed = 1,
    }
}

wl_enum! {
    /// Axis of a scroll event
    Axis {
        /// Vertical axis
        VerticalScroll = 0,
        /// Horizontal axis
        HorizontalScroll = 1,
    }
}

wl_enum! {
    /// Source of a scroll event
    AxisSource {
        /// A physical wheel rotation
        Wheel = 0,
        /// Finger on a touch surface
        Finger = 1,
        /// Continuous coordinate space
        Continuous = 2,
        /// A physical wheel tilt
        WheelTilt = 3,
    }
}

wl_enum! {
    /// Physical state of a key
    KeyState {
        /// The key is not pressed
        Released = 0,
        /// The key is pressed
        Pressed = 1,
    }
}

wl_enum! {
    /// Format of a keyboard keymap
    KeymapFormat {
        /// No keymap, the client must understand how to interpret the raw keycode
        NoKeymap = 0,
        /// libxkbcommon compatible keymap, null-terminated string
        XkbV1 = 1,
    }
}

wl_enum! {
    /// Subpixel geometry of an output
    Subpixel {
        /// Unknown geometry
        Unknown = 0,
        /// No geometry
        None = 1,
        /// Horizontal RGB
        HorizontalRgb = 2,
        /// Horizontal BGR
        HorizontalBgr = 3,
        /// Vertical RGB
        VerticalRgb = 4,
        /// Vertical BGR
        VerticalBgr = 5,
    }
}

bitflags::bitflags! {
    /// Drag-and-drop actions
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DndAction: u32 {
        /// Copy the data
        const Copy = 1;
        /// Move the data
        const Move = 2;
        /// Ask the user which action to perform
        const Ask = 4;
    }
}

bitflags::bitflags! {
    /// Input devices available on a seat
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capability: u32 {
        /// The seat has pointer devices
        const Pointer = 1;
        /// The seat has one or more keyboards
        const Keyboard = 2;
        /// The seat has touch devices
        const Touch = 4;
    }
}

bitflags::bitflags! {
    /// Flags of an output mode
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OutputMode: u32 {
        /// This is the current mode
        const Current = 1;
        /// This is the preferred mode
        const Preferred = 2;
    }
}

wl_enum! {
    /// Errors the server reports on the display object
    DisplayError {
        /// The server couldn't find the object
        InvalidObject = 0,
        /// Method doesn't exist on the specified interface or malformed request
        InvalidMethod = 1,
        /// The server is out of memory
        NoMemory = 2,
        /// Implementation error in the compositor
        Implementation = 3,
    }
}

wl_enum! {
    /// Errors of `wl_shm`
    ShmError {
        /// Buffer format is not known
        InvalidFormat = 0,
        /// Invalid size or stride during pool or buffer creation
        InvalidStride = 1,
        /// Mmapping the file descriptor failed
        InvalidFd = 2,
    }
}

wl_enum! {
    /// Errors of `wl_surface`
    SurfaceError {
        /// Buffer scale value is invalid
        InvalidScale = 0,
        /// Buffer transform value is invalid
        InvalidTransform = 1,
    }
}

wl_enum! {
    /// Errors of `wl_subcompositor`
    SubcompositorError {
        /// The to-be sub-surface is invalid
        BadSurface = 0,
    }
}

wl_enum! {
    /// Errors of `wl_subsurface`
    SubsurfaceError {
        /// Wl_surface is not a sibling or the parent
        BadSurface = 0,
    }
}

wl_enum! {
    /// Errors of `wl_data_offer`
    DataOfferError {
        /// Finish request was called untimely
        InvalidFinish = 0,
        /// Action mask contains invalid values
        InvalidActionMask = 1,
        /// Action argument has an invalid value
        InvalidAction = 2,
        /// Offer doesn't accept this request
        InvalidOffer = 3,
    }
}

wl_enum! {
    /// Errors of `wl_data_source`
    DataSourceError {
        /// Action mask contains invalid values
        InvalidActionMask = 0,
        /// Source doesn't accept this request
        InvalidSource = 1,
    }
}

wl_enum! {
    /// Errors of `wl_data_device`
    DataDeviceError {
        /// Given wl_surface has another role
        Role = 0,
    }
}

wl_enum! {
    /// Errors of `wl_pointer`
    PointerError {
        /// Given wl_surface has another role
        Role = 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_conversions() {
        assert_eq!(Transform::try_from(5), Ok(Transform::Flipped90));
        assert_eq!(Transform::try_from(8), Err(()));
        assert_eq!(u32::from(Transform::_270), 3);
        assert_eq!(WEnum::<ButtonState>::from(1), WEnum::Value(ButtonState::Pressed));
        assert_eq!(WEnum::<ButtonState>::from(9), WEnum::Unknown(9));
        assert_eq!(u32::from(ShmFormat::Xrgb8888), 1);
        assert!(Transform::Flipped270.swaps_dimensions());
        assert!(!Transform::Flipped.swaps_dimensions());
    }

    #[test]
    fn bitfields() {
        assert_eq!(DndAction::from_bits(3), Some(DndAction::Copy | DndAction::Move));
        assert_eq!(DndAction::from_bits(8), None);
        assert_eq!(Capability::from_bits_truncate(0xff), Capability::all());
    }
}
