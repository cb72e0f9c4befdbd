use std::{io, path::PathBuf};

use thiserror::Error;

/// Failures raised while opening and mapping a file.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("{}: no such file", .0.display())]
    NotFound(PathBuf),
    #[error("{}: permission denied", .0.display())]
    AccessDenied(PathBuf),
    #[error("{}: not a regular file", .0.display())]
    NotRegularFile(PathBuf),
    #[error("{}: file is empty", .0.display())]
    EmptyFile(PathBuf),
    #[error("{}: file is {size} bytes, limit is {limit}", .path.display())]
    TooLarge { path: PathBuf, size: u64, limit: u64 },
    #[error("{}: unable to map file: {source}", .path.display())]
    MapFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl MapError {
    pub(crate) fn from_open(path: PathBuf, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => MapError::NotFound(path),
            io::ErrorKind::PermissionDenied => MapError::AccessDenied(path),
            _ => MapError::Io { path, source },
        }
    }
}

/// Failures raised while decoding Mach-O bytes.
///
/// Offsets are from the start of the file, so an error inside a fat entry
/// points past the entry's own offset in the container.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("bad magic {0:#010x}, not a Mach-O file")]
    NotMachO(u32),
    #[error("truncated header: need {needed} bytes at offset {offset:#x}, have {available}")]
    TruncatedHeader {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("malformed load command #{index} at offset {offset:#x}: {reason}")]
    MalformedCommand {
        index: usize,
        offset: usize,
        reason: &'static str,
    },
    #[error("load command #{index} at offset {offset:#x} runs past the {region} byte command region")]
    TruncatedCommand {
        index: usize,
        offset: usize,
        region: usize,
    },
    #[error("unsupported architecture image with magic {0:#010x}")]
    UnsupportedArchitecture(u32),
}

/// Anything that can go wrong loading a file end to end.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

pub type Result<T, E = ParseError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_errors_map_by_kind() {
        let path = PathBuf::from("/tmp/locked");
        assert!(matches!(
            MapError::from_open(path.clone(), io::Error::from(io::ErrorKind::PermissionDenied)),
            MapError::AccessDenied(p) if p == path
        ));
        assert!(matches!(
            MapError::from_open(path.clone(), io::Error::from(io::ErrorKind::NotFound)),
            MapError::NotFound(_)
        ));
        let err = MapError::from_open(path, io::Error::from(io::ErrorKind::Interrupted));
        assert!(matches!(err, MapError::Io { .. }));
        assert_eq!(err.to_string(), "/tmp/locked: operation interrupted");
    }
}
