//! Herd Values - Layered configuration merging
//!
//! Produces the final values handed to a backend for one item on one target.
//! Sources are read through a [`ConfigSourceProvider`] and merged with fixed
//! precedence, lowest first:
//!
//! 1. base config references, left to right
//! 2. environment overlay (first conventional name that resolves)
//! 3. per-target override (`<targetId>.yaml` in a shared source)
//! 4. secret references, left to right
//! 5. inline values
//!
//! Missing or malformed sources are logged and skipped; a merge never fails.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod merge;
pub mod merger;
pub mod source;
pub mod validate;

pub use error::{Result, SourceError};
pub use merge::{deep_merge, merged};
pub use merger::{MergerConfig, ValuesMerger};
pub use source::{
    parse_values, ConfigSourceProvider, DirectoryConfigSource, InMemoryConfigSource, SourceKind,
};
pub use validate::validate_values;
