//! Read-only Mach-O loader for auditing binaries without running them.
//!
//! ```no_run
//! let file = scanmacho::load("/bin/ls")?;
//! for image in file.parse()?.images() {
//!     println!("{} pie={}", image.file_type(), image.is_pie());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod commands;
pub mod error;
pub mod labels;
pub mod macho;
pub mod mapper;
pub mod raw;
pub mod view;

use std::{
    borrow::Cow,
    path::{Path, PathBuf},
};

pub use commands::{CommandKind, LoadCommand};
pub use error::{LoadError, MapError, ParseError};
pub use labels::{get_machocputype, get_machomhflags, get_machomhtype};
pub use macho::{parse, ArchClass, FatEntry, Macho, MachO};
pub use mapper::{MapOptions, MapStrategy, Mapping};
pub use view::{ByteOrder, ByteView};

/// An opened file whose magic has been checked. Parsing borrows from it, so
/// the parsed view can never outlive the mapping.
#[derive(Debug)]
pub struct MachoFile {
    mapping: Mapping,
    class: ArchClass,
    filename: PathBuf,
}

/// Opens `path` with default options and checks that it is Mach-O.
pub fn load(path: impl AsRef<Path>) -> Result<MachoFile, LoadError> {
    MachoFile::open_with(path, MapOptions::default())
}

impl MachoFile {
    pub fn open_with(path: impl AsRef<Path>, options: MapOptions) -> Result<Self, LoadError> {
        let filename = path.as_ref().to_path_buf();
        let mapping = Mapping::open_with(&filename, options)?;

        let view = mapping.view();
        let magic = view.array(0).ok_or(ParseError::TruncatedHeader {
            offset: 0,
            needed: 4,
            available: view.len(),
        })?;
        let class = ArchClass::from_magic(magic);
        if class == ArchClass::Unknown {
            return Err(macho::unrecognized(u32::from_ne_bytes(magic), 0, view.len()).into());
        }

        Ok(Self {
            mapping,
            class,
            filename,
        })
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// The filename without its directory.
    pub fn base_filename(&self) -> Cow<'_, str> {
        match self.filename.file_name() {
            Some(name) => name.to_string_lossy(),
            None => self.filename.to_string_lossy(),
        }
    }

    /// Class implied by the magic at offset zero.
    pub fn class(&self) -> ArchClass {
        self.class
    }

    pub fn bytes(&self) -> &[u8] {
        self.mapping.bytes()
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    pub fn parse(&self) -> Result<Macho<'_>, ParseError> {
        parse(self.bytes())
    }

    /// Closes the file. Dropping has the same effect.
    pub fn release(self) {
        self.mapping.release();
    }
}
