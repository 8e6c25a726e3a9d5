use crate::error::FilesError;
use crate::relative_file::RelativeFile;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use zip::ZipArchive;

/// Reads the current contents of [`RelativeFile`]s.
///
/// Zip bases stay open for the lifetime of the reader so that packaging many
/// entries out of one archive does not reparse its central directory each
/// time.
#[derive(Default)]
pub struct SourceReader {
    archives: HashMap<PathBuf, ZipArchive<File>>,
}

impl SourceReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `file` from its directory or zip base.
    ///
    /// A file that no longer exists yields [`FilesError::MissingSource`]:
    /// the change set that named it is out of sync with the filesystem.
    pub fn read(&mut self, file: &RelativeFile) -> Result<Vec<u8>, FilesError> {
        let base = file.base();
        if base.is_dir() {
            return match std::fs::read(file.file()) {
                Ok(bytes) => Ok(bytes),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    Err(FilesError::MissingSource {
                        path: file.file().to_path_buf(),
                    })
                }
                Err(err) => Err(FilesError::io(file.file(), err)),
            };
        }

        if !self.archives.contains_key(base) {
            let handle = match File::open(base) {
                Ok(handle) => handle,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    return Err(FilesError::MissingSource {
                        path: file.file().to_path_buf(),
                    })
                }
                Err(err) => return Err(FilesError::io(base, err)),
            };
            let archive = ZipArchive::new(handle).map_err(|err| FilesError::zip(base, err))?;
            self.archives.insert(base.to_path_buf(), archive);
        }
        let Some(archive) = self.archives.get_mut(base) else {
            return Err(FilesError::MissingSource {
                path: file.file().to_path_buf(),
            });
        };

        let name = file.relative_path();
        let mut entry = match archive.by_name(&name) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(FilesError::MissingSource {
                    path: file.file().to_path_buf(),
                })
            }
            Err(err) => return Err(FilesError::zip(base, err)),
        };
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut buf)
            .map_err(|err| FilesError::io(file.file(), err))?;
        Ok(buf)
    }
}
