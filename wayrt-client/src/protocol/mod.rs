//! Binding tables and enumerated values of the core protocol

pub mod enums;
pub mod interfaces;

pub use enums::*;
pub use wayrt_backend::protocol::{fixed_from_f64, fixed_to_f64, Interface, WEnum};
