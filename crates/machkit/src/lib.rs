pub mod codec;
pub mod dyld;
pub mod error;
pub mod gen;
pub mod macho;
pub mod objc;
pub mod view;

pub use dyld::Library;
pub use error::Error;
pub use macho::{Editor, MachFile, Slice};

pub type Result<T> = std::result::Result<T, Error>;
