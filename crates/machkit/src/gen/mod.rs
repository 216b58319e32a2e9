//! Derived-artifact generators: Objective-C headers and TBD stubs.

pub mod headers;
pub mod tbd;

pub use headers::HeaderEmitter;
pub use tbd::emit_tbd;
