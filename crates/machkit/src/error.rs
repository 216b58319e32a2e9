//! Error types for machkit operations.
//!
//! This module defines the [`enum@Error`] enum covering all failure cases
//! in parsing, virtual-memory translation, and editing of Mach-O files.
//!
//! # See Also
//!
//! - [`crate::Result`] - Convenience type alias using this error

use thiserror::Error;

/// Error type for machkit operations.
///
/// All public functions in this crate return [`crate::Result<T>`], which uses
/// this error type. Match on variants to handle specific failure cases.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed.
    ///
    /// Occurs when reading input files or writing output files. The core
    /// itself never touches the filesystem; this is raised by the byte
    /// providers around it and wrapped, not swallowed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Input is not a recognized Mach-O or fat file.
    #[error("bad magic {0:#010x}: not a Mach-O or fat file")]
    BadMagic(u32),

    /// A declared offset or count exceeds the input length.
    #[error("truncated input: need {needed} bytes at offset {offset:#x}, have {available}")]
    Truncated {
        /// Offset of the failed access, relative to the slice.
        offset: u64,
        /// Bytes the structure declared.
        needed: u64,
        /// Bytes actually present.
        available: u64,
    },

    /// The load-command array is inconsistent with the header.
    ///
    /// Raised when a command's `cmdsize` is zero, when a command overruns
    /// the declared region, or when the sizes do not sum to `sizeofcmds`.
    #[error("malformed load commands: {0}")]
    MalformedLoadCommands(String),

    /// A bind or export stream contains an undefined opcode.
    ///
    /// Decoding stops at the offending byte; actions produced up to that
    /// point remain valid and the undecoded tail is preserved raw.
    #[error("unknown {stream} opcode {opcode:#04x} at stream offset {offset:#x}")]
    UnknownOpcode {
        /// Which opcode stream failed (`bind`, `weak-bind`, `lazy-bind`).
        stream: &'static str,
        /// The undefined opcode byte.
        opcode: u8,
        /// Offset within the stream.
        offset: u64,
    },

    /// A virtual address is not covered by any segment mapping.
    #[error("address {0:#x} is not mapped by any segment")]
    UnmappedAddress(u64),

    /// A virtual address falls in a zero-fill region with no file backing.
    #[error("address {0:#x} lies in a zero-fill region")]
    ZeroFill(u64),

    /// The export trie references a node already on the walk.
    #[error("export trie cycle through node at {0:#x}")]
    ExportTrieCycle(u64),

    /// An edit would grow the load commands past the first section's data.
    #[error("load commands need {needed} bytes but only {available} fit before section data")]
    NoHeaderPadding {
        /// Size the load-command region would need.
        needed: u64,
        /// Gap actually available.
        available: u64,
    },

    /// The requested edit is not valid for this file.
    #[error("unsupported edit: {0}")]
    UnsupportedEdit(String),
}
