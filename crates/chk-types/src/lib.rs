//! Foundation types for content-hash-keyed storage.
//!
//! Every other crate in the workspace depends on `chk-types`.
//!
//! # Key Types
//!
//! - [`ContentKey`] -- Content-addressed node/blob identifier (`sha1:<hex>`)
//! - [`Key`] -- Tuple-of-byte-strings key stored in a CHK map

pub mod content;
pub mod error;
pub mod key;

pub use content::ContentKey;
pub use error::TypeError;
pub use key::Key;
