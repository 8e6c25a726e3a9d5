//! File identities and change sets for incremental packaging.
//!
//! Every packaged input lives under a *base*: either a directory tree or a
//! zip archive. A [`RelativeFile`] pairs that base with one file below it so
//! entries coming from many sources can share one archive namespace while
//! still being traceable back to where they came from.

mod error;
mod relative_file;
mod sets;
mod source;

pub use error::FilesError;
pub use relative_file::{FileStatus, RelativeFile};
pub use sets::{
    base_directory_count, from_directory, from_zip, from_zip_cached, from_zips_and_directories,
    make_from_base_files, union, RelativeFileChanges,
};
pub use source::SourceReader;

pub type Result<T> = std::result::Result<T, FilesError>;
