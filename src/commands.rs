//! Load commands.
//!
//! Each command is kept as the raw byte range it occupied plus, for the kinds
//! we understand, its decoded fixed fields. Kinds we do not know about decode
//! to [`CommandKind::Unknown`] and only carry their bytes.

use std::borrow::Cow;

use crate::{
    error::ParseError,
    view::{ByteOrder, ByteView},
};

pub const LC_REQ_DYLD: u32 = 0x8000_0000;

pub const LC_SEGMENT: u32 = 0x1;
pub const LC_SYMTAB: u32 = 0x2;
pub const LC_SYMSEG: u32 = 0x3;
pub const LC_THREAD: u32 = 0x4;
pub const LC_UNIXTHREAD: u32 = 0x5;
pub const LC_LOADFVMLIB: u32 = 0x6;
pub const LC_IDFVMLIB: u32 = 0x7;
pub const LC_IDENT: u32 = 0x8;
pub const LC_FVMFILE: u32 = 0x9;
pub const LC_PREPAGE: u32 = 0xa;
pub const LC_DYSYMTAB: u32 = 0xb;
pub const LC_LOAD_DYLIB: u32 = 0xc;
pub const LC_ID_DYLIB: u32 = 0xd;
pub const LC_LOAD_DYLINKER: u32 = 0xe;
pub const LC_ID_DYLINKER: u32 = 0xf;
pub const LC_PREBOUND_DYLIB: u32 = 0x10;
pub const LC_ROUTINES: u32 = 0x11;
pub const LC_SUB_FRAMEWORK: u32 = 0x12;
pub const LC_SUB_UMBRELLA: u32 = 0x13;
pub const LC_SUB_CLIENT: u32 = 0x14;
pub const LC_SUB_LIBRARY: u32 = 0x15;
pub const LC_TWOLEVEL_HINTS: u32 = 0x16;
pub const LC_PREBIND_CKSUM: u32 = 0x17;
pub const LC_LOAD_WEAK_DYLIB: u32 = 0x18 | LC_REQ_DYLD;
pub const LC_SEGMENT_64: u32 = 0x19;
pub const LC_ROUTINES_64: u32 = 0x1a;
pub const LC_UUID: u32 = 0x1b;
pub const LC_RPATH: u32 = 0x1c | LC_REQ_DYLD;
pub const LC_CODE_SIGNATURE: u32 = 0x1d;
pub const LC_SEGMENT_SPLIT_INFO: u32 = 0x1e;
pub const LC_REEXPORT_DYLIB: u32 = 0x1f | LC_REQ_DYLD;
pub const LC_LAZY_LOAD_DYLIB: u32 = 0x20;
pub const LC_ENCRYPTION_INFO: u32 = 0x21;
pub const LC_DYLD_INFO: u32 = 0x22;
pub const LC_DYLD_INFO_ONLY: u32 = 0x22 | LC_REQ_DYLD;
pub const LC_LOAD_UPWARD_DYLIB: u32 = 0x23 | LC_REQ_DYLD;
pub const LC_VERSION_MIN_MACOSX: u32 = 0x24;
pub const LC_VERSION_MIN_IPHONEOS: u32 = 0x25;
pub const LC_FUNCTION_STARTS: u32 = 0x26;
pub const LC_DYLD_ENVIRONMENT: u32 = 0x27;
pub const LC_MAIN: u32 = 0x28 | LC_REQ_DYLD;
pub const LC_DATA_IN_CODE: u32 = 0x29;
pub const LC_SOURCE_VERSION: u32 = 0x2a;
pub const LC_DYLIB_CODE_SIGN_DRS: u32 = 0x2b;
pub const LC_ENCRYPTION_INFO_64: u32 = 0x2c;
pub const LC_LINKER_OPTION: u32 = 0x2d;
pub const LC_LINKER_OPTIMIZATION_HINT: u32 = 0x2e;
pub const LC_VERSION_MIN_TVOS: u32 = 0x2f;
pub const LC_VERSION_MIN_WATCHOS: u32 = 0x30;
pub const LC_NOTE: u32 = 0x31;
pub const LC_BUILD_VERSION: u32 = 0x32;
pub const LC_DYLD_EXPORTS_TRIE: u32 = 0x33 | LC_REQ_DYLD;
pub const LC_DYLD_CHAINED_FIXUPS: u32 = 0x34 | LC_REQ_DYLD;

pub const VM_PROT_READ: u32 = 0x1;
pub const VM_PROT_WRITE: u32 = 0x2;
pub const VM_PROT_EXECUTE: u32 = 0x4;

const SEGMENT_SIZE: usize = 56;
const SEGMENT_64_SIZE: usize = 72;
const SECTION_SIZE: usize = 68;
const SECTION_64_SIZE: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadCommand<'a> {
    /// Position in the command list, starting at zero.
    pub index: usize,
    /// Offset of the command from the start of its image.
    pub offset: usize,
    pub cmd: u32,
    /// The whole command, `cmd` and `cmdsize` included.
    pub raw: &'a [u8],
    pub kind: CommandKind<'a>,
}

impl LoadCommand<'_> {
    pub fn cmdsize(&self) -> usize {
        self.raw.len()
    }

    pub fn name(&self) -> &'static str {
        command_name(self.cmd)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind<'a> {
    Segment(Segment),
    Symtab(Symtab),
    Dysymtab(Dysymtab),
    /// Any of the dylib commands; `LoadCommand::cmd` tells which.
    Dylib(Dylib<'a>),
    /// `LC_LOAD_DYLINKER`, `LC_ID_DYLINKER` or `LC_DYLD_ENVIRONMENT`.
    Dylinker { name: LcStr<'a> },
    Rpath { path: LcStr<'a> },
    Uuid([u8; 16]),
    EntryPoint { entryoff: u64, stacksize: u64 },
    DyldInfo(DyldInfo),
    /// Commands that point at a blob in `__LINKEDIT`.
    LinkeditData { dataoff: u32, datasize: u32 },
    EncryptionInfo(EncryptionInfo),
    VersionMin { version: u32, sdk: u32 },
    BuildVersion {
        platform: u32,
        minos: u32,
        sdk: u32,
        ntools: u32,
    },
    SourceVersion(u64),
    Unknown,
}

/// A string embedded in a load command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LcStr<'a>(pub &'a [u8]);

impl<'a> LcStr<'a> {
    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }

    pub fn to_string_lossy(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub segname: [u8; 16],
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: u32,
    pub initprot: u32,
    pub flags: u32,
    pub sections: Vec<Section>,
}

impl Segment {
    pub fn name(&self) -> Cow<'_, str> {
        fixed_name(&self.segname)
    }

    pub fn is_executable(&self) -> bool {
        self.initprot & VM_PROT_EXECUTE != 0
    }

    pub fn is_writable_and_executable(&self) -> bool {
        let wx = VM_PROT_WRITE | VM_PROT_EXECUTE;
        self.initprot & wx == wx || self.maxprot & wx == wx
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub sectname: [u8; 16],
    pub segname: [u8; 16],
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
    pub align: u32,
    pub flags: u32,
}

impl Section {
    pub fn name(&self) -> Cow<'_, str> {
        fixed_name(&self.sectname)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symtab {
    pub symoff: u32,
    pub nsyms: u32,
    pub stroff: u32,
    pub strsize: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dysymtab {
    pub ilocalsym: u32,
    pub nlocalsym: u32,
    pub iextdefsym: u32,
    pub nextdefsym: u32,
    pub iundefsym: u32,
    pub nundefsym: u32,
    pub indirectsymoff: u32,
    pub nindirectsyms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dylib<'a> {
    pub name: LcStr<'a>,
    pub timestamp: u32,
    pub current_version: u32,
    pub compatibility_version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DyldInfo {
    pub rebase_off: u32,
    pub rebase_size: u32,
    pub bind_off: u32,
    pub bind_size: u32,
    pub weak_bind_off: u32,
    pub weak_bind_size: u32,
    pub lazy_bind_off: u32,
    pub lazy_bind_size: u32,
    pub export_off: u32,
    pub export_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionInfo {
    pub cryptoff: u32,
    pub cryptsize: u32,
    pub cryptid: u32,
}

fn fixed_name(bytes: &[u8; 16]) -> Cow<'_, str> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end])
}

/// Renders a packed `xxxx.yy.zz` version number.
pub fn format_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        version >> 16,
        (version >> 8) & 0xff,
        version & 0xff
    )
}

/// Field reader over one command's bytes. Every accessor reports failure
/// with a reason string that ends up in `ParseError::MalformedCommand`.
struct Fields<'a> {
    view: ByteView<'a>,
    order: ByteOrder,
}

type Decoded<T> = Result<T, &'static str>;

const TOO_SMALL: &str = "cmdsize smaller than the command's fixed layout";

impl<'a> Fields<'a> {
    fn require(&self, size: usize) -> Decoded<()> {
        if self.view.len() < size {
            Err(TOO_SMALL)
        } else {
            Ok(())
        }
    }

    fn u32(&self, at: usize) -> Decoded<u32> {
        self.view.read_u32(at, self.order).ok_or(TOO_SMALL)
    }

    fn u64(&self, at: usize) -> Decoded<u64> {
        self.view.read_u64(at, self.order).ok_or(TOO_SMALL)
    }

    /// A `u32` in the 32-bit layout, a `u64` in the 64-bit one.
    fn word(&self, at: usize, wide: bool) -> Decoded<u64> {
        if wide {
            self.u64(at)
        } else {
            self.u32(at).map(u64::from)
        }
    }

    fn name16(&self, at: usize) -> Decoded<[u8; 16]> {
        self.view.array(at).ok_or(TOO_SMALL)
    }

    /// Resolves an `lc_str` whose offset is stored at `at`. The string must
    /// start past the fixed fields and inside this command.
    fn lc_str(&self, at: usize, fixed: usize) -> Decoded<LcStr<'a>> {
        let offset = self.u32(at)? as usize;
        if offset < fixed || offset >= self.view.len() {
            return Err("string offset outside the command");
        }
        self.view
            .cstr(offset)
            .map(LcStr)
            .ok_or("string offset outside the command")
    }
}

/// Decodes the kind-specific payload of one command. `raw` covers exactly
/// `cmdsize` bytes; nothing outside it is read.
pub(crate) fn decode<'a>(
    cmd: u32,
    raw: ByteView<'a>,
    order: ByteOrder,
    index: usize,
    offset: usize,
) -> Result<CommandKind<'a>, ParseError> {
    let fields = Fields { view: raw, order };
    decode_fields(cmd, &fields).map_err(|reason| ParseError::MalformedCommand {
        index,
        offset,
        reason,
    })
}

fn decode_fields<'a>(cmd: u32, f: &Fields<'a>) -> Decoded<CommandKind<'a>> {
    let kind = match cmd {
        LC_SEGMENT => CommandKind::Segment(segment(f, false)?),
        LC_SEGMENT_64 => CommandKind::Segment(segment(f, true)?),
        LC_SYMTAB => {
            f.require(24)?;
            CommandKind::Symtab(Symtab {
                symoff: f.u32(8)?,
                nsyms: f.u32(12)?,
                stroff: f.u32(16)?,
                strsize: f.u32(20)?,
            })
        }
        LC_DYSYMTAB => {
            f.require(80)?;
            CommandKind::Dysymtab(Dysymtab {
                ilocalsym: f.u32(8)?,
                nlocalsym: f.u32(12)?,
                iextdefsym: f.u32(16)?,
                nextdefsym: f.u32(20)?,
                iundefsym: f.u32(24)?,
                nundefsym: f.u32(28)?,
                indirectsymoff: f.u32(56)?,
                nindirectsyms: f.u32(60)?,
            })
        }
        LC_ID_DYLIB | LC_LOAD_DYLIB | LC_LOAD_WEAK_DYLIB | LC_REEXPORT_DYLIB
        | LC_LAZY_LOAD_DYLIB | LC_LOAD_UPWARD_DYLIB => {
            f.require(24)?;
            CommandKind::Dylib(Dylib {
                name: f.lc_str(8, 24)?,
                timestamp: f.u32(12)?,
                current_version: f.u32(16)?,
                compatibility_version: f.u32(20)?,
            })
        }
        LC_LOAD_DYLINKER | LC_ID_DYLINKER | LC_DYLD_ENVIRONMENT => {
            f.require(12)?;
            CommandKind::Dylinker {
                name: f.lc_str(8, 12)?,
            }
        }
        LC_RPATH => {
            f.require(12)?;
            CommandKind::Rpath {
                path: f.lc_str(8, 12)?,
            }
        }
        LC_UUID => {
            f.require(24)?;
            CommandKind::Uuid(f.name16(8)?)
        }
        LC_MAIN => {
            f.require(24)?;
            CommandKind::EntryPoint {
                entryoff: f.u64(8)?,
                stacksize: f.u64(16)?,
            }
        }
        LC_DYLD_INFO | LC_DYLD_INFO_ONLY => {
            f.require(48)?;
            CommandKind::DyldInfo(DyldInfo {
                rebase_off: f.u32(8)?,
                rebase_size: f.u32(12)?,
                bind_off: f.u32(16)?,
                bind_size: f.u32(20)?,
                weak_bind_off: f.u32(24)?,
                weak_bind_size: f.u32(28)?,
                lazy_bind_off: f.u32(32)?,
                lazy_bind_size: f.u32(36)?,
                export_off: f.u32(40)?,
                export_size: f.u32(44)?,
            })
        }
        LC_CODE_SIGNATURE
        | LC_SEGMENT_SPLIT_INFO
        | LC_FUNCTION_STARTS
        | LC_DATA_IN_CODE
        | LC_DYLIB_CODE_SIGN_DRS
        | LC_LINKER_OPTIMIZATION_HINT
        | LC_DYLD_EXPORTS_TRIE
        | LC_DYLD_CHAINED_FIXUPS => {
            f.require(16)?;
            CommandKind::LinkeditData {
                dataoff: f.u32(8)?,
                datasize: f.u32(12)?,
            }
        }
        LC_ENCRYPTION_INFO | LC_ENCRYPTION_INFO_64 => {
            f.require(if cmd == LC_ENCRYPTION_INFO { 20 } else { 24 })?;
            CommandKind::EncryptionInfo(EncryptionInfo {
                cryptoff: f.u32(8)?,
                cryptsize: f.u32(12)?,
                cryptid: f.u32(16)?,
            })
        }
        LC_VERSION_MIN_MACOSX
        | LC_VERSION_MIN_IPHONEOS
        | LC_VERSION_MIN_TVOS
        | LC_VERSION_MIN_WATCHOS => {
            f.require(16)?;
            CommandKind::VersionMin {
                version: f.u32(8)?,
                sdk: f.u32(12)?,
            }
        }
        LC_BUILD_VERSION => {
            f.require(24)?;
            CommandKind::BuildVersion {
                platform: f.u32(8)?,
                minos: f.u32(12)?,
                sdk: f.u32(16)?,
                ntools: f.u32(20)?,
            }
        }
        LC_SOURCE_VERSION => {
            f.require(16)?;
            CommandKind::SourceVersion(f.u64(8)?)
        }
        _ => CommandKind::Unknown,
    };
    Ok(kind)
}

fn segment(f: &Fields<'_>, wide: bool) -> Decoded<Segment> {
    let (fixed, section_size, step) = if wide {
        (SEGMENT_64_SIZE, SECTION_64_SIZE, 8)
    } else {
        (SEGMENT_SIZE, SECTION_SIZE, 4)
    };
    f.require(fixed)?;

    // Fields after segname shift with the word size.
    let at = |slot: usize| 24 + slot * step;
    let vmaddr = f.word(at(0), wide)?;
    let vmsize = f.word(at(1), wide)?;
    let fileoff = f.word(at(2), wide)?;
    let filesize = f.word(at(3), wide)?;
    let tail = 24 + 4 * step;
    let maxprot = f.u32(tail)?;
    let initprot = f.u32(tail + 4)?;
    let nsects = f.u32(tail + 8)? as usize;
    let flags = f.u32(tail + 12)?;

    let needed = nsects
        .checked_mul(section_size)
        .and_then(|n| n.checked_add(fixed))
        .ok_or("section count overflows")?;
    if needed > f.view.len() {
        return Err("sections run past the segment command");
    }

    let mut sections = Vec::with_capacity(nsects);
    for i in 0..nsects {
        let base = fixed + i * section_size;
        let (addr, size, rest) = if wide {
            (f.u64(base + 32)?, f.u64(base + 40)?, base + 48)
        } else {
            (
                u64::from(f.u32(base + 32)?),
                u64::from(f.u32(base + 36)?),
                base + 40,
            )
        };
        sections.push(Section {
            sectname: f.name16(base)?,
            segname: f.name16(base + 16)?,
            addr,
            size,
            offset: f.u32(rest)?,
            align: f.u32(rest + 4)?,
            flags: f.u32(rest + 16)?,
        });
    }

    Ok(Segment {
        segname: f.name16(8)?,
        vmaddr,
        vmsize,
        fileoff,
        filesize,
        maxprot,
        initprot,
        flags,
        sections,
    })
}

/// Symbolic name of a load command, or `"LC_UNKNOWN"`.
pub fn command_name(cmd: u32) -> &'static str {
    match cmd {
        LC_SEGMENT => "LC_SEGMENT",
        LC_SYMTAB => "LC_SYMTAB",
        LC_SYMSEG => "LC_SYMSEG",
        LC_THREAD => "LC_THREAD",
        LC_UNIXTHREAD => "LC_UNIXTHREAD",
        LC_LOADFVMLIB => "LC_LOADFVMLIB",
        LC_IDFVMLIB => "LC_IDFVMLIB",
        LC_IDENT => "LC_IDENT",
        LC_FVMFILE => "LC_FVMFILE",
        LC_PREPAGE => "LC_PREPAGE",
        LC_DYSYMTAB => "LC_DYSYMTAB",
        LC_LOAD_DYLIB => "LC_LOAD_DYLIB",
        LC_ID_DYLIB => "LC_ID_DYLIB",
        LC_LOAD_DYLINKER => "LC_LOAD_DYLINKER",
        LC_ID_DYLINKER => "LC_ID_DYLINKER",
        LC_PREBOUND_DYLIB => "LC_PREBOUND_DYLIB",
        LC_ROUTINES => "LC_ROUTINES",
        LC_SUB_FRAMEWORK => "LC_SUB_FRAMEWORK",
        LC_SUB_UMBRELLA => "LC_SUB_UMBRELLA",
        LC_SUB_CLIENT => "LC_SUB_CLIENT",
        LC_SUB_LIBRARY => "LC_SUB_LIBRARY",
        LC_TWOLEVEL_HINTS => "LC_TWOLEVEL_HINTS",
        LC_PREBIND_CKSUM => "LC_PREBIND_CKSUM",
        LC_LOAD_WEAK_DYLIB => "LC_LOAD_WEAK_DYLIB",
        LC_SEGMENT_64 => "LC_SEGMENT_64",
        LC_ROUTINES_64 => "LC_ROUTINES_64",
        LC_UUID => "LC_UUID",
        LC_RPATH => "LC_RPATH",
        LC_CODE_SIGNATURE => "LC_CODE_SIGNATURE",
        LC_SEGMENT_SPLIT_INFO => "LC_SEGMENT_SPLIT_INFO",
        LC_REEXPORT_DYLIB => "LC_REEXPORT_DYLIB",
        LC_LAZY_LOAD_DYLIB => "LC_LAZY_LOAD_DYLIB",
        LC_ENCRYPTION_INFO => "LC_ENCRYPTION_INFO",
        LC_DYLD_INFO => "LC_DYLD_INFO",
        LC_DYLD_INFO_ONLY => "LC_DYLD_INFO_ONLY",
        LC_LOAD_UPWARD_DYLIB => "LC_LOAD_UPWARD_DYLIB",
        LC_VERSION_MIN_MACOSX => "LC_VERSION_MIN_MACOSX",
        LC_VERSION_MIN_IPHONEOS => "LC_VERSION_MIN_IPHONEOS",
        LC_FUNCTION_STARTS => "LC_FUNCTION_STARTS",
        LC_DYLD_ENVIRONMENT => "LC_DYLD_ENVIRONMENT",
        LC_MAIN => "LC_MAIN",
        LC_DATA_IN_CODE => "LC_DATA_IN_CODE",
        LC_SOURCE_VERSION => "LC_SOURCE_VERSION",
        LC_DYLIB_CODE_SIGN_DRS => "LC_DYLIB_CODE_SIGN_DRS",
        LC_ENCRYPTION_INFO_64 => "LC_ENCRYPTION_INFO_64",
        LC_LINKER_OPTION => "LC_LINKER_OPTION",
        LC_LINKER_OPTIMIZATION_HINT => "LC_LINKER_OPTIMIZATION_HINT",
        LC_VERSION_MIN_TVOS => "LC_VERSION_MIN_TVOS",
        LC_VERSION_MIN_WATCHOS => "LC_VERSION_MIN_WATCHOS",
        LC_NOTE => "LC_NOTE",
        LC_BUILD_VERSION => "LC_BUILD_VERSION",
        LC_DYLD_EXPORTS_TRIE => "LC_DYLD_EXPORTS_TRIE",
        LC_DYLD_CHAINED_FIXUPS => "LC_DYLD_CHAINED_FIXUPS",
        _ => "LC_UNKNOWN",
    }
}
