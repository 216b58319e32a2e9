//! Mach-O magic numbers, load-command codes, and related constants
//!
//! These values define the binary vocabulary shared by the parser and the
//! editor: file magics, CPU identifiers, load-command codes, dyld bind
//! opcodes, and export-trie flags.

// =============================================================================
// File Magic Numbers
// =============================================================================

/// 32-bit fat archive magic (big-endian on disk)
pub const FAT_MAGIC: u32 = 0xcafebabe;

/// Byte-swapped 32-bit fat magic
pub const FAT_CIGAM: u32 = 0xbebafeca;

/// 64-bit fat archive magic
pub const FAT_MAGIC_64: u32 = 0xcafebabf;

/// Byte-swapped 64-bit fat magic
pub const FAT_CIGAM_64: u32 = 0xbfbafeca;

/// 32-bit Mach-O magic, same byte order as the host of the file
pub const MH_MAGIC: u32 = 0xfeedface;

/// 32-bit Mach-O magic, opposite byte order
pub const MH_CIGAM: u32 = 0xcefaedfe;

/// 64-bit Mach-O magic
pub const MH_MAGIC_64: u32 = 0xfeedfacf;

/// 64-bit Mach-O magic, opposite byte order
pub const MH_CIGAM_64: u32 = 0xcffaedfe;

// =============================================================================
// CPU Types
// =============================================================================

/// Flag bit marking the 64-bit ABI variant of a CPU type
pub const CPU_ARCH_ABI64: u32 = 0x0100_0000;

pub const CPU_TYPE_X86: u32 = 7;
pub const CPU_TYPE_X86_64: u32 = CPU_TYPE_X86 | CPU_ARCH_ABI64;
pub const CPU_TYPE_ARM: u32 = 12;
pub const CPU_TYPE_ARM64: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64;
pub const CPU_TYPE_ARM64_32: u32 = CPU_TYPE_ARM | 0x0200_0000;
pub const CPU_TYPE_POWERPC: u32 = 18;
pub const CPU_TYPE_POWERPC64: u32 = CPU_TYPE_POWERPC | CPU_ARCH_ABI64;

/// Human-readable name for a CPU type.
pub fn cpu_type_name(cpu_type: u32) -> &'static str {
    match cpu_type {
        CPU_TYPE_X86 => "X86",
        CPU_TYPE_X86_64 => "X86_64",
        CPU_TYPE_ARM => "ARM",
        CPU_TYPE_ARM64 => "ARM64",
        CPU_TYPE_ARM64_32 => "ARM64_32",
        CPU_TYPE_POWERPC => "PPC",
        CPU_TYPE_POWERPC64 => "PPC64",
        _ => "UNKNOWN",
    }
}

/// Lowercase architecture name as used by lipo and TBD files.
pub fn arch_name(cpu_type: u32, cpu_subtype: u32) -> &'static str {
    match (cpu_type, cpu_subtype & !0x8000_0000) {
        (CPU_TYPE_X86, _) => "i386",
        (CPU_TYPE_X86_64, _) => "x86_64",
        (CPU_TYPE_ARM64, 2) => "arm64e",
        (CPU_TYPE_ARM64, _) => "arm64",
        (CPU_TYPE_ARM64_32, _) => "arm64_32",
        (CPU_TYPE_ARM, 9) => "armv7",
        (CPU_TYPE_ARM, 11) => "armv7s",
        (CPU_TYPE_ARM, _) => "arm",
        (CPU_TYPE_POWERPC, _) => "ppc",
        (CPU_TYPE_POWERPC64, _) => "ppc64",
        _ => "unknown",
    }
}

/// Reverse of [`arch_name`] for the architectures lipo can extract.
pub fn cpu_type_for_arch(name: &str) -> Option<(u32, u32)> {
    match name {
        "i386" => Some((CPU_TYPE_X86, 3)),
        "x86_64" => Some((CPU_TYPE_X86_64, 3)),
        "arm64" => Some((CPU_TYPE_ARM64, 0)),
        "arm64e" => Some((CPU_TYPE_ARM64, 2)),
        "arm64_32" => Some((CPU_TYPE_ARM64_32, 1)),
        "armv7" => Some((CPU_TYPE_ARM, 9)),
        "armv7s" => Some((CPU_TYPE_ARM, 11)),
        _ => None,
    }
}

// =============================================================================
// File Types
// =============================================================================

pub const MH_OBJECT: u32 = 0x1;
pub const MH_EXECUTE: u32 = 0x2;
pub const MH_CORE: u32 = 0x4;
pub const MH_DYLIB: u32 = 0x6;
pub const MH_DYLINKER: u32 = 0x7;
pub const MH_BUNDLE: u32 = 0x8;
pub const MH_DSYM: u32 = 0xa;
pub const MH_KEXT_BUNDLE: u32 = 0xb;
pub const MH_FILESET: u32 = 0xc;

/// Human-readable name for a Mach-O file type.
pub fn filetype_name(filetype: u32) -> &'static str {
    match filetype {
        MH_OBJECT => "MH_OBJECT",
        MH_EXECUTE => "MH_EXECUTE",
        MH_CORE => "MH_CORE",
        MH_DYLIB => "MH_DYLIB",
        MH_DYLINKER => "MH_DYLINKER",
        MH_BUNDLE => "MH_BUNDLE",
        MH_DSYM => "MH_DSYM",
        MH_KEXT_BUNDLE => "MH_KEXT_BUNDLE",
        MH_FILESET => "MH_FILESET",
        _ => "MH_UNKNOWN",
    }
}

// =============================================================================
// Header Flags
// =============================================================================

/// (name, bit) pairs for every defined `mach_header.flags` bit.
pub const MH_FLAG_NAMES: &[(&str, u32)] = &[
    ("NOUNDEFS", 0x1),
    ("INCRLINK", 0x2),
    ("DYLDLINK", 0x4),
    ("BINDATLOAD", 0x8),
    ("PREBOUND", 0x10),
    ("SPLIT_SEGS", 0x20),
    ("LAZY_INIT", 0x40),
    ("TWOLEVEL", 0x80),
    ("FORCE_FLAT", 0x100),
    ("NOMULTIDEFS", 0x200),
    ("NOFIXPREBINDING", 0x400),
    ("PREBINDABLE", 0x800),
    ("ALLMODSBOUND", 0x1000),
    ("SUBSECTIONS_VIA_SYMBOLS", 0x2000),
    ("CANONICAL", 0x4000),
    ("WEAK_DEFINES", 0x8000),
    ("BINDS_TO_WEAK", 0x10000),
    ("ALLOW_STACK_EXECUTION", 0x20000),
    ("ROOT_SAFE", 0x40000),
    ("SETUID_SAFE", 0x80000),
    ("NO_REEXPORTED_DYLIBS", 0x100000),
    ("PIE", 0x200000),
    ("DEAD_STRIPPABLE_DYLIB", 0x400000),
    ("HAS_TLV_DESCRIPTORS", 0x800000),
    ("NO_HEAP_EXECUTION", 0x1000000),
    ("APP_EXTENSION_SAFE", 0x2000000),
    ("NLIST_OUTOFSYNC_WITH_DYLDINFO", 0x4000000),
    ("SIM_SUPPORT", 0x8000000),
    ("DYLIB_IN_CACHE", 0x80000000),
];

// =============================================================================
// Load Command Codes
// =============================================================================

/// Commands dyld refuses to ignore carry this bit.
pub const LC_REQ_DYLD: u32 = 0x8000_0000;

pub const LC_SEGMENT: u32 = 0x1;
pub const LC_SYMTAB: u32 = 0x2;
pub const LC_THREAD: u32 = 0x4;
pub const LC_UNIXTHREAD: u32 = 0x5;
pub const LC_DYSYMTAB: u32 = 0xb;
pub const LC_LOAD_DYLIB: u32 = 0xc;
pub const LC_ID_DYLIB: u32 = 0xd;
pub const LC_LOAD_DYLINKER: u32 = 0xe;
pub const LC_ID_DYLINKER: u32 = 0xf;
pub const LC_SUB_FRAMEWORK: u32 = 0x12;
pub const LC_SUB_CLIENT: u32 = 0x14;
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
pub const LC_VERSION_MIN_TVOS: u32 = 0x2f;
pub const LC_VERSION_MIN_WATCHOS: u32 = 0x30;
pub const LC_BUILD_VERSION: u32 = 0x32;
pub const LC_DYLD_EXPORTS_TRIE: u32 = 0x33 | LC_REQ_DYLD;
pub const LC_DYLD_CHAINED_FIXUPS: u32 = 0x34 | LC_REQ_DYLD;

/// Human-readable name for a load-command code.
pub fn lc_name(cmd: u32) -> &'static str {
    match cmd {
        LC_SEGMENT => "LC_SEGMENT",
        LC_SYMTAB => "LC_SYMTAB",
        LC_THREAD => "LC_THREAD",
        LC_UNIXTHREAD => "LC_UNIXTHREAD",
        LC_DYSYMTAB => "LC_DYSYMTAB",
        LC_LOAD_DYLIB => "LC_LOAD_DYLIB",
        LC_ID_DYLIB => "LC_ID_DYLIB",
        LC_LOAD_DYLINKER => "LC_LOAD_DYLINKER",
        LC_ID_DYLINKER => "LC_ID_DYLINKER",
        LC_SUB_FRAMEWORK => "LC_SUB_FRAMEWORK",
        LC_SUB_CLIENT => "LC_SUB_CLIENT",
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
        LC_VERSION_MIN_TVOS => "LC_VERSION_MIN_TVOS",
        LC_VERSION_MIN_WATCHOS => "LC_VERSION_MIN_WATCHOS",
        LC_BUILD_VERSION => "LC_BUILD_VERSION",
        LC_DYLD_EXPORTS_TRIE => "LC_DYLD_EXPORTS_TRIE",
        LC_DYLD_CHAINED_FIXUPS => "LC_DYLD_CHAINED_FIXUPS",
        _ => "LC_UNKNOWN",
    }
}

/// The five dylib-loading commands, in the set that assigns bind ordinals.
pub const DYLIB_LOAD_COMMANDS: &[u32] = &[
    LC_LOAD_DYLIB,
    LC_LOAD_WEAK_DYLIB,
    LC_REEXPORT_DYLIB,
    LC_LOAD_UPWARD_DYLIB,
    LC_LAZY_LOAD_DYLIB,
];

// =============================================================================
// Platforms
// =============================================================================

pub const PLATFORM_MACOS: u32 = 1;
pub const PLATFORM_IOS: u32 = 2;
pub const PLATFORM_TVOS: u32 = 3;
pub const PLATFORM_WATCHOS: u32 = 4;
pub const PLATFORM_BRIDGEOS: u32 = 5;
pub const PLATFORM_MAC_CATALYST: u32 = 6;
pub const PLATFORM_IOS_SIMULATOR: u32 = 7;
pub const PLATFORM_TVOS_SIMULATOR: u32 = 8;
pub const PLATFORM_WATCHOS_SIMULATOR: u32 = 9;
pub const PLATFORM_DRIVERKIT: u32 = 10;

/// Lowercase platform name as it appears in TBD output.
pub fn platform_name(platform: u32) -> &'static str {
    match platform {
        PLATFORM_MACOS => "macosx",
        PLATFORM_IOS => "ios",
        PLATFORM_TVOS => "tvos",
        PLATFORM_WATCHOS => "watchos",
        PLATFORM_BRIDGEOS => "bridgeos",
        PLATFORM_MAC_CATALYST => "maccatalyst",
        PLATFORM_IOS_SIMULATOR => "ios-simulator",
        PLATFORM_TVOS_SIMULATOR => "tvos-simulator",
        PLATFORM_WATCHOS_SIMULATOR => "watchos-simulator",
        PLATFORM_DRIVERKIT => "driverkit",
        _ => "unknown",
    }
}

// =============================================================================
// Bind Opcodes
// =============================================================================

/// High nibble of every bind stream byte selects the opcode.
pub const BIND_OPCODE_MASK: u8 = 0xf0;

/// Low nibble carries the opcode's immediate operand.
pub const BIND_IMMEDIATE_MASK: u8 = 0x0f;

pub const BIND_OPCODE_DONE: u8 = 0x00;
pub const BIND_OPCODE_SET_DYLIB_ORDINAL_IMM: u8 = 0x10;
pub const BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB: u8 = 0x20;
pub const BIND_OPCODE_SET_DYLIB_SPECIAL_IMM: u8 = 0x30;
pub const BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM: u8 = 0x40;
pub const BIND_OPCODE_SET_TYPE_IMM: u8 = 0x50;
pub const BIND_OPCODE_SET_ADDEND_SLEB: u8 = 0x60;
pub const BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB: u8 = 0x70;
pub const BIND_OPCODE_ADD_ADDR_ULEB: u8 = 0x80;
pub const BIND_OPCODE_DO_BIND: u8 = 0x90;
pub const BIND_OPCODE_DO_BIND_ADD_ADDR_ULEB: u8 = 0xa0;
pub const BIND_OPCODE_DO_BIND_ADD_ADDR_IMM_SCALED: u8 = 0xb0;
pub const BIND_OPCODE_DO_BIND_ULEB_TIMES_SKIPPING_ULEB: u8 = 0xc0;

/// Bind to the image itself.
pub const BIND_SPECIAL_DYLIB_SELF: i64 = 0;

/// Bind to the main executable.
pub const BIND_SPECIAL_DYLIB_MAIN_EXECUTABLE: i64 = -1;

/// Flat-namespace lookup across all images.
pub const BIND_SPECIAL_DYLIB_FLAT_LOOKUP: i64 = -2;

/// Weak lookup, resolved only if some image defines the symbol.
pub const BIND_SPECIAL_DYLIB_WEAK_LOOKUP: i64 = -3;

pub const BIND_TYPE_POINTER: u8 = 1;
pub const BIND_TYPE_TEXT_ABSOLUTE32: u8 = 2;
pub const BIND_TYPE_TEXT_PCREL32: u8 = 3;

// =============================================================================
// Export Trie Flags
// =============================================================================

pub const EXPORT_SYMBOL_FLAGS_KIND_MASK: u64 = 0x03;
pub const EXPORT_SYMBOL_FLAGS_KIND_REGULAR: u64 = 0x00;
pub const EXPORT_SYMBOL_FLAGS_KIND_THREAD_LOCAL: u64 = 0x01;
pub const EXPORT_SYMBOL_FLAGS_KIND_ABSOLUTE: u64 = 0x02;
pub const EXPORT_SYMBOL_FLAGS_WEAK_DEFINITION: u64 = 0x04;
pub const EXPORT_SYMBOL_FLAGS_REEXPORT: u64 = 0x08;
pub const EXPORT_SYMBOL_FLAGS_STUB_AND_RESOLVER: u64 = 0x10;

// =============================================================================
// Symbol Table (nlist)
// =============================================================================

/// Mask for the stab (debug) bits of `n_type`.
pub const N_STAB: u8 = 0xe0;

/// Mask for the type bits of `n_type`.
pub const N_TYPE: u8 = 0x0e;

/// External (exported) symbol bit.
pub const N_EXT: u8 = 0x01;

/// Symbol defined in a section (`n_type & N_TYPE`).
pub const N_SECT: u8 = 0x0e;

/// Undefined symbol (`n_type & N_TYPE`).
pub const N_UNDF: u8 = 0x00;

// =============================================================================
// Sections
// =============================================================================

/// Mask for the type byte of `section.flags`.
pub const SECTION_TYPE: u32 = 0xff;

/// Section with no file backing, filled with zeros at load.
pub const S_ZEROFILL: u32 = 0x1;
