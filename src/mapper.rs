//! File Mapper: opens a file read-only and exposes its bytes.
//!
//! The descriptor and the mapping are owned by [`Mapping`] and released when
//! it is dropped, whether the caller calls [`Mapping::release`] or an error
//! unwinds the setup halfway through.

use std::{
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
};

use log::debug;
use memmap2::Mmap;

use crate::{error::MapError, view::ByteView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapStrategy {
    /// Memory-map the file.
    #[default]
    Mmap,
    /// Read the whole file into a heap buffer.
    Read,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MapOptions {
    pub strategy: MapStrategy,
    /// Refuse files larger than this many bytes.
    pub max_size: Option<u64>,
}

#[derive(Debug)]
enum Backing {
    Mapped(Mmap),
    Buffered(Vec<u8>),
}

#[derive(Debug)]
pub struct Mapping {
    path: PathBuf,
    backing: Backing,
    // Held for the lifetime of the mapping and closed on drop.
    _file: File,
}

impl Mapping {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MapError> {
        Self::open_with(path, MapOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: MapOptions) -> Result<Self, MapError> {
        let path = path.as_ref().to_path_buf();

        let mut file = File::open(&path).map_err(|e| MapError::from_open(path.clone(), e))?;
        let metadata = file.metadata().map_err(|source| MapError::Io {
            path: path.clone(),
            source,
        })?;

        if !metadata.is_file() {
            return Err(MapError::NotRegularFile(path));
        }

        let size = metadata.len();
        if size == 0 {
            return Err(MapError::EmptyFile(path));
        }
        if let Some(limit) = options.max_size {
            if size > limit {
                return Err(MapError::TooLarge { path, size, limit });
            }
        }

        let backing = match options.strategy {
            // SAFETY: the map is read-only and private to this process. A
            // concurrent writer truncating the file is outside our control,
            // as it is for every mmap-based reader.
            MapStrategy::Mmap => match unsafe { Mmap::map(&file) } {
                Ok(map) => Backing::Mapped(map),
                Err(source) => return Err(MapError::MapFailed { path, source }),
            },
            MapStrategy::Read => {
                let mut buf = match buffer_for(size) {
                    Ok(buf) => buf,
                    Err(source) => return Err(MapError::MapFailed { path, source }),
                };
                if let Err(source) = file.read_to_end(&mut buf) {
                    return Err(MapError::Io { path, source });
                }
                Backing::Buffered(buf)
            }
        };

        debug!("{}: mapped {} bytes ({:?})", path.display(), size, options.strategy);

        let mapping = Self {
            path,
            backing,
            _file: file,
        };

        // The file may have shrunk between stat and read.
        if mapping.bytes().is_empty() {
            return Err(MapError::EmptyFile(mapping.path.clone()));
        }

        Ok(mapping)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped(map) => &map[..],
            Backing::Buffered(buf) => &buf[..],
        }
    }

    pub fn view(&self) -> ByteView<'_> {
        ByteView::new(self.bytes())
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    /// Unmaps the file and closes its descriptor.
    pub fn release(self) {
        debug!("{}: released", self.path.display());
    }
}

/// An empty buffer able to hold `size` bytes, or `OutOfMemory` when the
/// size does not fit this platform's address space.
fn buffer_for(size: u64) -> io::Result<Vec<u8>> {
    let len = usize::try_from(size).map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_with(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn maps_whole_file_both_ways() {
        let file = temp_with(b"\xcf\xfa\xed\xfe rest");
        for strategy in [MapStrategy::Mmap, MapStrategy::Read] {
            let mapping = Mapping::open_with(
                file.path(),
                MapOptions {
                    strategy,
                    max_size: None,
                },
            )
            .unwrap();
            assert_eq!(mapping.bytes(), b"\xcf\xfa\xed\xfe rest");
            assert_eq!(mapping.len(), 9);
            mapping.release();
        }
    }

    #[test]
    fn read_buffer_reports_impossible_sizes() {
        assert!(buffer_for(64).unwrap().capacity() >= 64);
        let err = buffer_for(u64::MAX).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::OutOfMemory);
    }

    #[test]
    fn empty_file_is_rejected() {
        let file = temp_with(b"");
        assert!(matches!(
            Mapping::open(file.path()),
            Err(MapError::EmptyFile(_))
        ));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = Mapping::open(dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, MapError::NotFound(_)), "{err}");
    }

    #[test]
    fn directory_is_not_regular() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Mapping::open(dir.path()),
            Err(MapError::NotRegularFile(_))
        ));
    }

    #[test]
    fn size_limit_applies_before_mapping() {
        let file = temp_with(&[0u8; 64]);
        let err = Mapping::open_with(
            file.path(),
            MapOptions {
                strategy: MapStrategy::Mmap,
                max_size: Some(63),
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            MapError::TooLarge {
                size: 64,
                limit: 63,
                ..
            }
        ));
    }
}
