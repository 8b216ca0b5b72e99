//! VM descriptor handling.
//!
//! - [`fields`]: grammars for `args`, `tags` and `key=value` sub-fields
//! - [`file`]: line-preserving descriptor model
//! - [`store`]: locating, loading, saving and listing descriptor files

pub mod fields;
pub mod file;
pub mod store;

pub use file::VmDescriptor;
pub use store::DescriptorStore;
