//! On-disk caching primitives shared by the incremental packaging pipeline.
//!
//! - [`Fingerprint`]: SHA-256 content digests rendered as lowercase hex
//! - [`atomic_write`] / [`atomic_write_with`]: temp-file + rename writes so a
//!   crash never leaves a half-written state file behind
//! - [`FileCacheByPath`]: per-path snapshots (digest, mtime, zip entry index)
//!   used to diff a base archive against the version seen by the last build
//!
//! ## On-disk layout
//!
//! A [`FileCacheByPath`] owns one directory. Every cached path is stored as
//! `<dir>/<sha256 of the absolute path>.json`.

mod error;
mod file_cache;
mod fingerprint;
mod util;

pub use error::CacheError;
pub use file_cache::{read_zip_index, CachedFile, FileCacheByPath, ZipEntrySnapshot};
pub use fingerprint::Fingerprint;
pub use util::{atomic_write, atomic_write_with, modified_millis, now_millis};

pub type Result<T> = std::result::Result<T, CacheError>;
