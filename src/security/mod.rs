//! Access gating: PIN-derived stream paths and wrong-PIN blocking

pub mod address;
pub mod guard;

pub use address::{derive_stream_path, generate_pin, validate_pin, AddressScheme};
pub use guard::PinGuard;
