pub mod args;
pub mod error;
pub mod get;
pub mod header_prop;
pub mod import;

pub use args::Args;
pub use error::MethodError;
pub use get::{EmailGet, GetResponse};
pub use header_prop::{HeaderForm, HeaderProperty};
pub use import::{EmailImport, ImportResponse};

/// Server-side ceiling for `maxBodyValueBytes`, and its default.
pub const DEFAULT_MAX_BODY_VALUE_BYTES: usize = 256 * 1024;
