//! Mach-O header parser.
//!
//! [`parse`] identifies the image by its magic, then either decodes a single
//! image or walks the fat header and decodes every embedded image on its
//! own. Nothing outside the given bytes is ever read: all offsets and counts
//! taken from the file are checked against the view before use.

use log::{debug, warn};

use crate::{
    commands::{self, CommandKind, EncryptionInfo, LcStr, LoadCommand, Segment},
    error::{ParseError, Result},
    labels,
    raw::*,
    view::{ByteOrder, ByteView},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchClass {
    Bits32,
    Bits64,
    Fat,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Magic {
    Mach32,
    Mach64,
    Fat,
    Fat64,
}

impl Magic {
    /// `raw` is the first four bytes read in host order.
    fn identify(raw: u32) -> Option<(Magic, ByteOrder)> {
        let found = match raw {
            MH_MAGIC => (Magic::Mach32, ByteOrder::Native),
            MH_CIGAM => (Magic::Mach32, ByteOrder::Swapped),
            MH_MAGIC_64 => (Magic::Mach64, ByteOrder::Native),
            MH_CIGAM_64 => (Magic::Mach64, ByteOrder::Swapped),
            FAT_MAGIC => (Magic::Fat, ByteOrder::Native),
            FAT_CIGAM => (Magic::Fat, ByteOrder::Swapped),
            FAT_MAGIC_64 => (Magic::Fat64, ByteOrder::Native),
            FAT_CIGAM_64 => (Magic::Fat64, ByteOrder::Swapped),
            _ => return None,
        };
        Some(found)
    }

    fn class(self) -> ArchClass {
        match self {
            Magic::Mach32 => ArchClass::Bits32,
            Magic::Mach64 => ArchClass::Bits64,
            Magic::Fat | Magic::Fat64 => ArchClass::Fat,
        }
    }
}

impl ArchClass {
    /// Classifies the first four bytes of a file.
    pub fn from_magic(bytes: [u8; 4]) -> Self {
        Magic::identify(u32::from_ne_bytes(bytes))
            .map(|(magic, _)| magic.class())
            .unwrap_or(ArchClass::Unknown)
    }
}

/// A parsed file: either one image or a fat container of several.
#[derive(Debug)]
pub enum Macho<'a> {
    Single(MachO<'a>),
    Fat(Vec<FatEntry<'a>>),
}

impl<'a> Macho<'a> {
    pub fn class(&self) -> ArchClass {
        match self {
            Macho::Single(image) => image.class(),
            Macho::Fat(_) => ArchClass::Fat,
        }
    }

    /// Every image that parsed successfully, in file order.
    pub fn images(&self) -> impl Iterator<Item = &MachO<'a>> {
        let (single, entries) = match self {
            Macho::Single(image) => (Some(image), &[][..]),
            Macho::Fat(entries) => (None, &entries[..]),
        };
        single
            .into_iter()
            .chain(entries.iter().filter_map(|e| e.image.as_ref().ok()))
    }
}

/// One architecture of a fat file. A broken entry does not affect its
/// siblings.
#[derive(Debug)]
pub struct FatEntry<'a> {
    pub arch: FatArch,
    pub image: Result<MachO<'a>>,
}

/// A single-architecture image.
#[derive(Debug)]
pub struct MachO<'a> {
    view: ByteView<'a>,
    offset: usize,
    class: ArchClass,
    byte_order: ByteOrder,
    pub header: MachHeader,
    /// Load commands in file order.
    pub commands: Vec<LoadCommand<'a>>,
}

pub fn parse(bytes: &[u8]) -> Result<Macho<'_>> {
    let view = ByteView::new(bytes);
    let (magic, order) = identify(view, 0)?;
    match magic {
        Magic::Fat | Magic::Fat64 => parse_fat(view, order, magic == Magic::Fat64).map(Macho::Fat),
        Magic::Mach32 | Magic::Mach64 => parse_image(view, 0, magic, order).map(Macho::Single),
    }
}

fn identify(view: ByteView<'_>, offset: usize) -> Result<(Magic, ByteOrder)> {
    let bytes = view.array(0).ok_or(ParseError::TruncatedHeader {
        offset,
        needed: 4,
        available: view.len(),
    })?;
    let raw = u32::from_ne_bytes(bytes);
    Magic::identify(raw).ok_or_else(|| unrecognized(raw, offset, view.len()))
}

/// Error for a magic we do not know. Input too short to hold even a 32-bit
/// header is reported as truncated rather than foreign.
pub(crate) fn unrecognized(raw: u32, offset: usize, available: usize) -> ParseError {
    if available < MACH_HEADER_SIZE {
        ParseError::TruncatedHeader {
            offset,
            needed: MACH_HEADER_SIZE,
            available,
        }
    } else {
        ParseError::NotMachO(raw)
    }
}

fn parse_fat(view: ByteView<'_>, order: ByteOrder, wide: bool) -> Result<Vec<FatEntry<'_>>> {
    let truncated = |needed: usize| ParseError::TruncatedHeader {
        offset: 0,
        needed,
        available: view.len(),
    };

    let nfat_arch = view
        .read_u32(4, order)
        .ok_or(truncated(FAT_HEADER_SIZE))? as usize;
    let entry_size = if wide { FAT_ARCH_64_SIZE } else { FAT_ARCH_SIZE };
    let needed = nfat_arch
        .checked_mul(entry_size)
        .and_then(|n| n.checked_add(FAT_HEADER_SIZE))
        .unwrap_or(usize::MAX);
    if needed > view.len() {
        return Err(truncated(needed));
    }
    debug!("fat header: {nfat_arch} architectures");

    let mut entries = Vec::with_capacity(nfat_arch);
    for i in 0..nfat_arch {
        let at = FAT_HEADER_SIZE + i * entry_size;
        let arch = FatArch::read(view, at, order, wide).ok_or(truncated(at + entry_size))?;
        let image = parse_fat_entry(view, &arch);
        if let Err(e) = &image {
            warn!("fat entry {i} ({}): {e}", labels::get_machocputype(arch.cputype));
        }
        entries.push(FatEntry { arch, image });
    }
    Ok(entries)
}

fn parse_fat_entry<'a>(view: ByteView<'a>, arch: &FatArch) -> Result<MachO<'a>> {
    let offset = usize::try_from(arch.offset).unwrap_or(usize::MAX);
    let size = usize::try_from(arch.size).unwrap_or(usize::MAX);
    let sub = view
        .subview(offset, size)
        .ok_or(ParseError::TruncatedHeader {
            offset,
            needed: size,
            available: view.len().saturating_sub(offset),
        })?;

    let (magic, order) = identify(sub, offset)?;
    match magic {
        Magic::Fat => return Err(ParseError::UnsupportedArchitecture(FAT_MAGIC)),
        Magic::Fat64 => return Err(ParseError::UnsupportedArchitecture(FAT_MAGIC_64)),
        Magic::Mach32 | Magic::Mach64 => {}
    }

    let image = parse_image(sub, offset, magic, order)?;
    if image.header.cputype != arch.cputype {
        warn!(
            "fat entry at {offset:#x} claims {} but image is {}",
            labels::get_machocputype(arch.cputype),
            labels::get_machocputype(image.header.cputype)
        );
    }
    Ok(image)
}

fn parse_image(view: ByteView<'_>, offset: usize, magic: Magic, order: ByteOrder) -> Result<MachO<'_>> {
    let header_size = match magic {
        Magic::Mach64 => MACH_HEADER_64_SIZE,
        _ => MACH_HEADER_SIZE,
    };
    let truncated = |at: usize, needed: usize| ParseError::TruncatedHeader {
        offset: offset + at,
        needed,
        available: view.len().saturating_sub(at),
    };

    if view.len() < header_size {
        return Err(truncated(0, header_size));
    }
    let header = MachHeader::read(view, order, header_size).ok_or(truncated(0, header_size))?;

    let ncmds = header.ncmds as usize;
    let sizeofcmds = header.sizeofcmds as usize;
    let remaining = view.len() - header_size;
    let minimum = ncmds.saturating_mul(LOAD_COMMAND_MIN_SIZE);
    if minimum > remaining {
        return Err(truncated(header_size, minimum));
    }
    let region = view
        .subview(header_size, sizeofcmds)
        .ok_or(truncated(header_size, sizeofcmds))?;

    debug!(
        "{} image at {offset:#x}: {} {}, {ncmds} commands in {sizeofcmds} bytes",
        if magic == Magic::Mach64 { "64-bit" } else { "32-bit" },
        labels::get_machocputype(header.cputype),
        labels::get_machomhtype(header.filetype),
    );

    let commands = walk_commands(region, header_size, offset, ncmds, order)?;

    Ok(MachO {
        view,
        offset,
        class: magic.class(),
        byte_order: order,
        header,
        commands,
    })
}

fn walk_commands(
    region: ByteView<'_>,
    base: usize,
    image_offset: usize,
    ncmds: usize,
    order: ByteOrder,
) -> Result<Vec<LoadCommand<'_>>> {
    let mut commands = Vec::with_capacity(ncmds);
    let mut cursor = 0usize;

    for index in 0..ncmds {
        let offset = base + cursor;
        let at = image_offset + offset;
        let truncated = ParseError::TruncatedCommand {
            index,
            offset: at,
            region: region.len(),
        };

        let (Some(cmd), Some(cmdsize)) = (
            region.read_u32(cursor, order),
            region.read_u32(cursor + 4, order),
        ) else {
            return Err(truncated);
        };
        let cmdsize = cmdsize as usize;
        if cmdsize < LOAD_COMMAND_MIN_SIZE {
            return Err(ParseError::MalformedCommand {
                index,
                offset: at,
                reason: "cmdsize smaller than a load command header",
            });
        }
        let raw = region.subview(cursor, cmdsize).ok_or(truncated)?;
        let kind = commands::decode(cmd, raw, order, index, at)?;

        debug!("  #{index} {} ({cmdsize} bytes) at {offset:#x}", commands::command_name(cmd));
        commands.push(LoadCommand {
            index,
            offset,
            cmd,
            raw: raw.as_bytes(),
            kind,
        });
        cursor += cmdsize;
    }

    if cursor != region.len() {
        warn!(
            "load commands use {cursor} of {} declared bytes",
            region.len()
        );
    }
    Ok(commands)
}

impl<'a> MachO<'a> {
    pub fn class(&self) -> ArchClass {
        self.class
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn is_little_endian(&self) -> bool {
        self.byte_order.is_little_endian()
    }

    /// Offset of this image inside the file; non-zero only for fat entries.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The bytes of this image.
    pub fn bytes(&self) -> &'a [u8] {
        self.view.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    pub fn header_size(&self) -> usize {
        match self.class {
            ArchClass::Bits64 => MACH_HEADER_64_SIZE,
            _ => MACH_HEADER_SIZE,
        }
    }

    /// Sum of `cmdsize` over every decoded command.
    pub fn commands_size(&self) -> usize {
        self.commands.iter().map(LoadCommand::cmdsize).sum()
    }

    pub fn file_type(&self) -> &'static str {
        labels::get_machomhtype(self.header.filetype)
    }

    /// Whether every bit of `flag` is set. An empty mask is never set.
    pub fn has_flag(&self, flag: u32) -> bool {
        flag != 0 && self.header.flags & flag == flag
    }

    pub fn is_pie(&self) -> bool {
        self.has_flag(MH_PIE)
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.commands.iter().filter_map(|c| match &c.kind {
            CommandKind::Segment(segment) => Some(segment),
            _ => None,
        })
    }

    /// Libraries this image links against, in load order.
    pub fn needed(&self) -> impl Iterator<Item = LcStr<'a>> + '_ {
        self.commands.iter().filter_map(|c| match (&c.kind, c.cmd) {
            (CommandKind::Dylib(dylib), cmd) if cmd != commands::LC_ID_DYLIB => Some(dylib.name),
            _ => None,
        })
    }

    pub fn rpaths(&self) -> impl Iterator<Item = LcStr<'a>> + '_ {
        self.commands.iter().filter_map(|c| match &c.kind {
            CommandKind::Rpath { path } => Some(*path),
            _ => None,
        })
    }

    pub fn dylinker(&self) -> Option<LcStr<'a>> {
        self.commands.iter().find_map(|c| match &c.kind {
            CommandKind::Dylinker { name } if c.cmd == commands::LC_LOAD_DYLINKER => Some(*name),
            _ => None,
        })
    }

    /// `(dataoff, datasize)` of the code signature blob.
    pub fn code_signature(&self) -> Option<(u32, u32)> {
        self.commands.iter().find_map(|c| match c.kind {
            CommandKind::LinkeditData { dataoff, datasize }
                if c.cmd == commands::LC_CODE_SIGNATURE =>
            {
                Some((dataoff, datasize))
            }
            _ => None,
        })
    }

    pub fn encryption(&self) -> Option<EncryptionInfo> {
        self.commands.iter().find_map(|c| match c.kind {
            CommandKind::EncryptionInfo(info) => Some(info),
            _ => None,
        })
    }

    pub fn uuid(&self) -> Option<[u8; 16]> {
        self.commands.iter().find_map(|c| match c.kind {
            CommandKind::Uuid(uuid) => Some(uuid),
            _ => None,
        })
    }
}
