use std::{io::Write, path::Path};

use scanmacho::{
    commands::{CommandKind, LC_CODE_SIGNATURE, LC_LOAD_DYLINKER, LC_SEGMENT_64},
    get_machomhtype, load,
    raw::{FAT_CIGAM, MH_EXECUTE, MH_MAGIC_64, MH_NO_HEAP_EXECUTION, MH_PIE},
    ArchClass, LoadError, Macho, MachoFile, MapError, MapOptions, MapStrategy, ParseError,
};
use tempfile::NamedTempFile;

fn le(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// A little-endian 64-bit executable: `__PAGEZERO`-style segment, dylinker,
/// code signature. Three commands, 200 bytes of commands.
fn executable() -> Vec<u8> {
    let mut segment = le(&[LC_SEGMENT_64, 72]);
    segment.extend_from_slice(b"__PAGEZERO\0\0\0\0\0\0");
    segment.extend([0u64, 0x1_0000_0000, 0, 0].iter().flat_map(|v| v.to_le_bytes()));
    segment.extend(le(&[0, 0, 0, 0]));

    let mut dylinker = le(&[LC_LOAD_DYLINKER, 112, 12]);
    dylinker.extend_from_slice(b"/usr/lib/dyld");
    dylinker.resize(112, 0);

    let signature = le(&[LC_CODE_SIGNATURE, 16, 0x8000, 0x200]);

    let mut out = le(&[
        MH_MAGIC_64,
        0x0100_000c,
        0,
        MH_EXECUTE,
        3,
        200,
        MH_PIE | MH_NO_HEAP_EXECUTION,
        0,
    ]);
    out.extend(segment);
    out.extend(dylinker);
    out.extend(signature);
    out
}

fn write_temp(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

fn open(path: &Path, strategy: MapStrategy) -> MachoFile {
    MachoFile::open_with(
        path,
        MapOptions {
            strategy,
            max_size: None,
        },
    )
    .unwrap()
}

#[test]
fn parses_executable_from_disk() {
    let tmp = write_temp(&executable());

    for strategy in [MapStrategy::Mmap, MapStrategy::Read] {
        let file = open(tmp.path(), strategy);
        assert_eq!(file.class(), ArchClass::Bits64);

        let parsed = file.parse().unwrap();
        let Macho::Single(image) = &parsed else {
            panic!("expected a single image");
        };
        assert_eq!(image.class(), ArchClass::Bits64);
        assert_eq!(image.commands.len(), image.header.ncmds as usize);
        assert_eq!(image.commands.len(), 3);
        assert_eq!(image.commands_size(), 200);
        assert_eq!(get_machomhtype(image.header.filetype), "MH_EXECUTE");
        assert!(image.is_pie());
        assert!(image.has_flag(MH_NO_HEAP_EXECUTION));
        assert_eq!(image.code_signature(), Some((0x8000, 0x200)));
        assert_eq!(
            image.dylinker().map(|d| d.to_string_lossy().into_owned()),
            Some("/usr/lib/dyld".to_string())
        );
        let segments: Vec<_> = image.segments().map(|s| s.name().into_owned()).collect();
        assert_eq!(segments, ["__PAGEZERO"]);
        assert!(matches!(image.commands[0].kind, CommandKind::Segment(_)));

        drop(parsed);
        file.release();
    }
}

#[test]
fn empty_and_two_byte_files() {
    let empty = write_temp(&[]);
    assert!(matches!(
        load(empty.path()),
        Err(LoadError::Map(MapError::EmptyFile(_)))
    ));

    let two = write_temp(&[0xfe, 0xed]);
    assert!(matches!(
        load(two.path()),
        Err(LoadError::Parse(ParseError::TruncatedHeader { .. }))
    ));
}

#[test]
fn truncated_copies_never_succeed() {
    let full = executable();
    for len in 1..full.len() {
        let tmp = write_temp(&full[..len]);
        let result = load(tmp.path()).map_err(|e| e.to_string()).and_then(|file| {
            file.parse().map(|_| ()).map_err(|e| e.to_string())
        });
        assert!(result.is_err(), "prefix of {len} bytes parsed");
    }
}

#[test]
fn oversized_command_count_stays_in_bounds() {
    let mut bytes = executable();
    bytes[16..20].copy_from_slice(&0x0fff_ffffu32.to_le_bytes());
    let tmp = write_temp(&bytes);
    let file = load(tmp.path()).unwrap();
    assert!(matches!(
        file.parse(),
        Err(ParseError::TruncatedHeader { .. } | ParseError::TruncatedCommand { .. })
    ));
}

#[test]
fn fat_file_with_one_broken_arch() {
    let good = executable();
    let mut broken = executable();
    broken[20..24].copy_from_slice(&100u32.to_le_bytes());

    let mut bytes = Vec::new();
    bytes.extend(0xcafe_babeu32.to_be_bytes());
    bytes.extend(2u32.to_be_bytes());
    for (offset, image) in [(0x1000u32, &good), (0x2000u32, &broken)] {
        for v in [0x0100_000cu32, 0, offset, image.len() as u32, 12] {
            bytes.extend(v.to_be_bytes());
        }
    }
    bytes.resize(0x1000, 0);
    bytes.extend_from_slice(&good);
    bytes.resize(0x2000, 0);
    bytes.extend_from_slice(&broken);

    let tmp = write_temp(&bytes);
    let file = load(tmp.path()).unwrap();
    assert_eq!(file.class(), ArchClass::Fat);
    assert_eq!(
        u32::from_ne_bytes(file.bytes()[..4].try_into().unwrap()),
        if cfg!(target_endian = "little") { FAT_CIGAM } else { 0xcafe_babe }
    );

    let parsed = file.parse().unwrap();
    let Macho::Fat(entries) = &parsed else {
        panic!("expected a fat file");
    };
    assert_eq!(entries.len(), 2);
    let first = entries[0].image.as_ref().unwrap();
    assert_eq!(first.offset(), 0x1000);
    assert_eq!(first.commands.len(), 3);
    assert!(matches!(
        entries[1].image,
        Err(ParseError::TruncatedCommand { index: 1, .. })
    ));
}

#[test]
fn size_limit_is_reported() {
    let tmp = write_temp(&executable());
    let err = MachoFile::open_with(
        tmp.path(),
        MapOptions {
            strategy: MapStrategy::Mmap,
            max_size: Some(16),
        },
    )
    .unwrap_err();
    assert!(matches!(err, LoadError::Map(MapError::TooLarge { .. })));
}
