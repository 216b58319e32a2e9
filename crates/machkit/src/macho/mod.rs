//! Mach-O file structure: magic detection, headers, load commands,
//! segments, symbols, fat archives, and byte-level editing.

pub mod commands;
pub mod constants;
pub mod editor;
pub mod fat;
pub mod header;
pub mod segment;
pub mod symbols;

pub use editor::Editor;
pub use fat::{pack_fat, FileKind, MachFile, Slice};
pub use header::MachHeader;
