//! Human-readable names for header fields. These are display helpers and
//! never fail: unknown values map to a generic label.

use std::borrow::Cow;

use crate::raw::*;

pub const UNKNOWN_TYPE: &str = "UNKNOWN_TYPE";
pub const UNKNOWN_CPU: &str = "UNKNOWN_CPU";

const MH_TYPES: &[(u32, &str)] = &[
    (MH_OBJECT, "MH_OBJECT"),
    (MH_EXECUTE, "MH_EXECUTE"),
    (MH_FVMLIB, "MH_FVMLIB"),
    (MH_CORE, "MH_CORE"),
    (MH_PRELOAD, "MH_PRELOAD"),
    (MH_DYLIB, "MH_DYLIB"),
    (MH_DYLINKER, "MH_DYLINKER"),
    (MH_BUNDLE, "MH_BUNDLE"),
    (MH_DYLIB_STUB, "MH_DYLIB_STUB"),
    (MH_DSYM, "MH_DSYM"),
    (MH_KEXT_BUNDLE, "MH_KEXT_BUNDLE"),
    (MH_FILESET, "MH_FILESET"),
];

const CPU_TYPES: &[(u32, &str)] = &[
    (CPU_TYPE_VAX, "CPU_TYPE_VAX"),
    (CPU_TYPE_MC680X0, "CPU_TYPE_MC680x0"),
    (CPU_TYPE_X86, "CPU_TYPE_I386"),
    (CPU_TYPE_X86_64, "CPU_TYPE_X86_64"),
    (CPU_TYPE_MC98000, "CPU_TYPE_MC98000"),
    (CPU_TYPE_HPPA, "CPU_TYPE_HPPA"),
    (CPU_TYPE_ARM, "CPU_TYPE_ARM"),
    (CPU_TYPE_ARM64, "CPU_TYPE_ARM64"),
    (CPU_TYPE_ARM64_32, "CPU_TYPE_ARM64_32"),
    (CPU_TYPE_MC88000, "CPU_TYPE_MC88000"),
    (CPU_TYPE_SPARC, "CPU_TYPE_SPARC"),
    (CPU_TYPE_I860, "CPU_TYPE_I860"),
    (CPU_TYPE_POWERPC, "CPU_TYPE_POWERPC"),
    (CPU_TYPE_POWERPC64, "CPU_TYPE_POWERPC64"),
];

const MH_FLAGS: &[(u32, &str)] = &[
    (MH_NOUNDEFS, "MH_NOUNDEFS"),
    (MH_INCRLINK, "MH_INCRLINK"),
    (MH_DYLDLINK, "MH_DYLDLINK"),
    (MH_BINDATLOAD, "MH_BINDATLOAD"),
    (MH_PREBOUND, "MH_PREBOUND"),
    (MH_SPLIT_SEGS, "MH_SPLIT_SEGS"),
    (MH_LAZY_INIT, "MH_LAZY_INIT"),
    (MH_TWOLEVEL, "MH_TWOLEVEL"),
    (MH_FORCE_FLAT, "MH_FORCE_FLAT"),
    (MH_NOMULTIDEFS, "MH_NOMULTIDEFS"),
    (MH_NOFIXPREBINDING, "MH_NOFIXPREBINDING"),
    (MH_PREBINDABLE, "MH_PREBINDABLE"),
    (MH_ALLMODSBOUND, "MH_ALLMODSBOUND"),
    (MH_SUBSECTIONS_VIA_SYMBOLS, "MH_SUBSECTIONS_VIA_SYMBOLS"),
    (MH_CANONICAL, "MH_CANONICAL"),
    (MH_WEAK_DEFINES, "MH_WEAK_DEFINES"),
    (MH_BINDS_TO_WEAK, "MH_BINDS_TO_WEAK"),
    (MH_ALLOW_STACK_EXECUTION, "MH_ALLOW_STACK_EXECUTION"),
    (MH_ROOT_SAFE, "MH_ROOT_SAFE"),
    (MH_SETUID_SAFE, "MH_SETUID_SAFE"),
    (MH_NO_REEXPORTED_DYLIBS, "MH_NO_REEXPORTED_DYLIBS"),
    (MH_PIE, "MH_PIE"),
    (MH_DEAD_STRIPPABLE_DYLIB, "MH_DEAD_STRIPPABLE_DYLIB"),
    (MH_HAS_TLV_DESCRIPTORS, "MH_HAS_TLV_DESCRIPTORS"),
    (MH_NO_HEAP_EXECUTION, "MH_NO_HEAP_EXECUTION"),
    (MH_APP_EXTENSION_SAFE, "MH_APP_EXTENSION_SAFE"),
    (MH_NLIST_OUTOFSYNC_WITH_DYLDINFO, "MH_NLIST_OUTOFSYNC_WITH_DYLDINFO"),
    (MH_SIM_SUPPORT, "MH_SIM_SUPPORT"),
    (MH_DYLIB_IN_CACHE, "MH_DYLIB_IN_CACHE"),
];

fn lookup(table: &[(u32, &'static str)], code: u32) -> Option<&'static str> {
    table.iter().find(|(c, _)| *c == code).map(|(_, name)| *name)
}

/// Label for a header `filetype`.
pub fn get_machomhtype(mh_type: u32) -> &'static str {
    lookup(MH_TYPES, mh_type).unwrap_or(UNKNOWN_TYPE)
}

pub fn get_machocputype(cputype: u32) -> &'static str {
    lookup(CPU_TYPES, cputype).unwrap_or(UNKNOWN_CPU)
}

/// Names of every flag set in `flags`. Bits without a name are reported
/// together as one hex value at the end.
pub fn get_machomhflags(flags: u32) -> Vec<Cow<'static, str>> {
    let mut names: Vec<Cow<'static, str>> = MH_FLAGS
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, name)| Cow::Borrowed(*name))
        .collect();

    let known = MH_FLAGS.iter().fold(0u32, |acc, (bit, _)| acc | bit);
    let rest = flags & !known;
    if rest != 0 {
        names.push(Cow::Owned(format!("{rest:#x}")));
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_types() {
        assert_eq!(get_machomhtype(MH_EXECUTE), "MH_EXECUTE");
        assert_eq!(get_machomhtype(MH_DYLIB), "MH_DYLIB");
        assert_eq!(get_machomhtype(MH_BUNDLE), "MH_BUNDLE");
        assert_eq!(get_machomhtype(0), UNKNOWN_TYPE);
        assert_eq!(get_machomhtype(0xdead_beef), UNKNOWN_TYPE);
    }

    #[test]
    fn cpu_types() {
        assert_eq!(get_machocputype(CPU_TYPE_ARM64), "CPU_TYPE_ARM64");
        assert_eq!(get_machocputype(CPU_TYPE_X86), "CPU_TYPE_I386");
        assert_eq!(get_machocputype(99), UNKNOWN_CPU);
    }

    #[test]
    fn flags_with_unknown_bits() {
        let names = get_machomhflags(MH_PIE | MH_TWOLEVEL | 0x1000_0000);
        assert_eq!(names, ["MH_TWOLEVEL", "MH_PIE", "0x10000000"]);
        assert!(get_machomhflags(0).is_empty());
    }
}
