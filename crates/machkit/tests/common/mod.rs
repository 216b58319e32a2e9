//! Shared fixture: a small but structurally complete 64-bit dylib built
//! byte-by-byte, with segments, symbols, binding info, an export trie, and
//! one Objective-C class.

use machkit::codec::RawStruct;
use machkit::macho::commands::*;
use machkit::macho::constants::*;
use machkit::macho::header::MachHeaderRaw;
use machkit::view::Endian;

pub const TEXT_VMADDR: u64 = 0x1_0000_0000;
pub const DATA_VMADDR: u64 = 0x1_0000_1000;
pub const INSTALL_NAME: &str = "/usr/lib/libfoo.dylib";

fn pad16(name: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..name.len()].copy_from_slice(name);
    out
}

fn put(buf: &mut Vec<u8>, off: usize, bytes: &[u8]) {
    buf[off..off + bytes.len()].copy_from_slice(bytes);
}

fn put_u32(buf: &mut Vec<u8>, off: usize, value: u32) {
    put(buf, off, &value.to_le_bytes());
}

fn put_u64(buf: &mut Vec<u8>, off: usize, value: u64) {
    put(buf, off, &value.to_le_bytes());
}

fn dylib_lc(cmd: u32, name: &str, timestamp: u32, current: u32, compat: u32) -> Vec<u8> {
    let unpadded = DylibCommand::SIZE as usize + name.len() + 1;
    let cmdsize = unpadded.div_ceil(8) * 8;
    let raw = DylibCommand {
        cmd,
        cmdsize: cmdsize as u32,
        name_offset: DylibCommand::SIZE as u32,
        timestamp,
        current_version: current,
        compatibility_version: compat,
    };
    let mut bytes = raw.to_bytes(Endian::Little);
    bytes.extend_from_slice(name.as_bytes());
    bytes.resize(cmdsize, 0);
    bytes
}

/// The bind stream: `_OBJC_CLASS_$_NSObject` from dylib 2 into the class's
/// superclass slot (`__DATA` + 0x18).
fn bind_stream() -> Vec<u8> {
    let mut s = Vec::new();
    s.push(0x12); // SET_DYLIB_ORDINAL_IMM 2
    s.push(0x40); // SET_SYMBOL_TRAILING_FLAGS_IMM 0
    s.extend_from_slice(b"_OBJC_CLASS_$_NSObject\0");
    s.push(0x51); // SET_TYPE_IMM pointer
    s.extend_from_slice(&[0x71, 0x18]); // SET_SEGMENT_AND_OFFSET_ULEB seg 1 off 0x18
    s.push(0x90); // DO_BIND
    s.push(0x00); // DONE
    s.resize(32, 0);
    s
}

/// The export trie: `_bar` at 0x800 and `_OBJC_CLASS_$_Foo` at 0x1010.
fn export_trie() -> Vec<u8> {
    let mut t = Vec::new();
    // root: no terminal, two children
    t.extend_from_slice(&[0x00, 0x02]);
    t.extend_from_slice(b"_bar\0");
    t.push(27);
    t.extend_from_slice(b"_OBJC_CLASS_$_Foo\0");
    t.push(32);
    assert_eq!(t.len(), 27);
    // node 27: terminal {flags 0, offset 0x800}
    t.extend_from_slice(&[0x03, 0x00, 0x80, 0x10, 0x00]);
    assert_eq!(t.len(), 32);
    // node 32: terminal {flags 0, offset 0x1010}
    t.extend_from_slice(&[0x03, 0x00, 0x90, 0x20, 0x00]);
    t.resize(40, 0);
    t
}

/// Build the complete fixture dylib.
///
/// Layout: `__TEXT` [0, 0x1000) with `__text` at 0x800, `__DATA`
/// [0x1000, 0x2000) holding the Objective-C metadata, `__LINKEDIT`
/// [0x2000, 0x3000) holding bind info, exports, and the symbol table.
pub fn build_sample_dylib() -> Vec<u8> {
    let mut lcs: Vec<Vec<u8>> = Vec::new();

    let text_seg = SegmentCommand64 {
        cmd: LC_SEGMENT_64,
        cmdsize: (SegmentCommand64::SIZE + SectionHeader64::SIZE) as u32,
        segname: pad16(b"__TEXT"),
        vmaddr: TEXT_VMADDR,
        vmsize: 0x1000,
        fileoff: 0,
        filesize: 0x1000,
        maxprot: 5,
        initprot: 5,
        nsects: 1,
        flags: 0,
    };
    let text_sect = SectionHeader64 {
        sectname: pad16(b"__text"),
        segname: pad16(b"__TEXT"),
        addr: TEXT_VMADDR + 0x800,
        size: 0x20,
        offset: 0x800,
        align: 4,
        reloff: 0,
        nreloc: 0,
        flags: 0x8000_0400,
        reserved1: 0,
        reserved2: 0,
        reserved3: 0,
    };
    let mut lc = text_seg.to_bytes(Endian::Little);
    lc.extend_from_slice(&text_sect.to_bytes(Endian::Little));
    lcs.push(lc);

    let data_seg = SegmentCommand64 {
        cmd: LC_SEGMENT_64,
        cmdsize: (SegmentCommand64::SIZE + SectionHeader64::SIZE) as u32,
        segname: pad16(b"__DATA"),
        vmaddr: DATA_VMADDR,
        vmsize: 0x1000,
        fileoff: 0x1000,
        filesize: 0x1000,
        maxprot: 3,
        initprot: 3,
        nsects: 1,
        flags: 0,
    };
    let classlist_sect = SectionHeader64 {
        sectname: pad16(b"__objc_classlist"),
        segname: pad16(b"__DATA"),
        addr: DATA_VMADDR,
        size: 8,
        offset: 0x1000,
        align: 3,
        reloff: 0,
        nreloc: 0,
        flags: 0,
        reserved1: 0,
        reserved2: 0,
        reserved3: 0,
    };
    let mut lc = data_seg.to_bytes(Endian::Little);
    lc.extend_from_slice(&classlist_sect.to_bytes(Endian::Little));
    lcs.push(lc);

    let linkedit_seg = SegmentCommand64 {
        cmd: LC_SEGMENT_64,
        cmdsize: SegmentCommand64::SIZE as u32,
        segname: pad16(b"__LINKEDIT"),
        vmaddr: 0x1_0000_2000,
        vmsize: 0x1000,
        fileoff: 0x2000,
        filesize: 0x1000,
        maxprot: 1,
        initprot: 1,
        nsects: 0,
        flags: 0,
    };
    lcs.push(linkedit_seg.to_bytes(Endian::Little));

    lcs.push(dylib_lc(LC_ID_DYLIB, INSTALL_NAME, 1, 0x0001_0000, 0x0001_0000));
    lcs.push(dylib_lc(
        LC_LOAD_DYLIB,
        "/usr/lib/libSystem.B.dylib",
        2,
        0x0001_0000,
        0x0001_0000,
    ));
    lcs.push(dylib_lc(
        LC_LOAD_DYLIB,
        "/System/Library/Frameworks/Foundation.framework/Foundation",
        2,
        0x0001_0000,
        0x0001_0000,
    ));

    let mut uuid = [0u8; 16];
    for (i, b) in uuid.iter_mut().enumerate() {
        *b = (i as u8) * 0x11;
    }
    lcs.push(
        UuidCommand {
            cmd: LC_UUID,
            cmdsize: UuidCommand::SIZE as u32,
            uuid,
        }
        .to_bytes(Endian::Little),
    );

    lcs.push(
        BuildVersionCommand {
            cmd: LC_BUILD_VERSION,
            cmdsize: BuildVersionCommand::SIZE as u32,
            platform: PLATFORM_MACOS,
            minos: 0x000d_0000,
            sdk: 0x000e_0000,
            ntools: 0,
        }
        .to_bytes(Endian::Little),
    );

    lcs.push(
        SymtabCommand {
            cmd: LC_SYMTAB,
            cmdsize: SymtabCommand::SIZE as u32,
            symoff: 0x2050,
            nsyms: 2,
            stroff: 0x2070,
            strsize: 24,
        }
        .to_bytes(Endian::Little),
    );

    lcs.push(
        DyldInfoCommand {
            cmd: LC_DYLD_INFO_ONLY,
            cmdsize: DyldInfoCommand::SIZE as u32,
            rebase_off: 0,
            rebase_size: 0,
            bind_off: 0x2000,
            bind_size: 32,
            weak_bind_off: 0,
            weak_bind_size: 0,
            lazy_bind_off: 0,
            lazy_bind_size: 0,
            export_off: 0x2020,
            export_size: 40,
        }
        .to_bytes(Endian::Little),
    );

    let sizeofcmds: usize = lcs.iter().map(|lc| lc.len()).sum();
    let header = MachHeaderRaw {
        magic: MH_MAGIC_64,
        cpu_type: CPU_TYPE_ARM64,
        cpu_subtype: 0,
        filetype: MH_DYLIB,
        ncmds: lcs.len() as u32,
        sizeofcmds: sizeofcmds as u32,
        flags: 0x0010_0085,
    };

    let mut out = header.to_bytes(Endian::Little);
    out.extend_from_slice(&0u32.to_le_bytes());
    for lc in &lcs {
        out.extend_from_slice(lc);
    }
    out.resize(0x3000, 0);

    // __text: something recognizable
    for b in &mut out[0x800..0x820] {
        *b = 0xc3;
    }

    // -- Objective-C metadata in __DATA ------------------------------------
    // classlist -> class Foo at DATA + 0x10
    put_u64(&mut out, 0x1000, DATA_VMADDR + 0x10);
    // class_t Foo: isa -> metaclass, superclass 0 (bound), data -> class_ro
    put_u64(&mut out, 0x1010, DATA_VMADDR + 0x40);
    put_u64(&mut out, 0x1018, 0);
    put_u64(&mut out, 0x1030, DATA_VMADDR + 0x70);
    // metaclass_t: data -> metaclass_ro
    put_u64(&mut out, 0x1060, DATA_VMADDR + 0xc0);
    // class_ro_t Foo
    put_u32(&mut out, 0x1070, 0); // flags
    put_u32(&mut out, 0x1074, 8); // instanceStart
    put_u32(&mut out, 0x1078, 16); // instanceSize
    put_u64(&mut out, 0x1088, DATA_VMADDR + 0x300); // name "Foo"
    put_u64(&mut out, 0x1090, DATA_VMADDR + 0x180); // baseMethods
    put_u64(&mut out, 0x10a0, DATA_VMADDR + 0x200); // ivars
    put_u64(&mut out, 0x10b0, DATA_VMADDR + 0x280); // baseProperties
    // metaclass_ro_t
    put_u32(&mut out, 0x10c0, 0x1); // RO_META
    put_u64(&mut out, 0x10d8, DATA_VMADDR + 0x300); // name
    put_u64(&mut out, 0x10e0, DATA_VMADDR + 0x1c0); // class methods
    // instance method list: - (void)bar
    put_u32(&mut out, 0x1180, 24);
    put_u32(&mut out, 0x1184, 1);
    put_u64(&mut out, 0x1188, DATA_VMADDR + 0x310); // "bar"
    put_u64(&mut out, 0x1190, DATA_VMADDR + 0x320); // "v16@0:8"
    put_u64(&mut out, 0x1198, TEXT_VMADDR + 0x800);
    // class method list: + (id)shared
    put_u32(&mut out, 0x11c0, 24);
    put_u32(&mut out, 0x11c4, 1);
    put_u64(&mut out, 0x11c8, DATA_VMADDR + 0x330); // "shared"
    put_u64(&mut out, 0x11d0, DATA_VMADDR + 0x340); // "@16@0:8"
    put_u64(&mut out, 0x11d8, TEXT_VMADDR + 0x810);
    // ivar list: NSString *_name at offset 8
    put_u32(&mut out, 0x1200, 32);
    put_u32(&mut out, 0x1204, 1);
    put_u64(&mut out, 0x1208, DATA_VMADDR + 0x240); // offset pointer
    put_u64(&mut out, 0x1210, DATA_VMADDR + 0x350); // "_name"
    put_u64(&mut out, 0x1218, DATA_VMADDR + 0x360); // type encoding
    put_u32(&mut out, 0x1220, 3); // alignment
    put_u32(&mut out, 0x1224, 8); // size
    put_u32(&mut out, 0x1240, 8); // the ivar offset value
    // property list: name
    put_u32(&mut out, 0x1280, 16);
    put_u32(&mut out, 0x1284, 1);
    put_u64(&mut out, 0x1288, DATA_VMADDR + 0x370); // "name"
    put_u64(&mut out, 0x1290, DATA_VMADDR + 0x380); // attributes
    // strings
    put(&mut out, 0x1300, b"Foo\0");
    put(&mut out, 0x1310, b"bar\0");
    put(&mut out, 0x1320, b"v16@0:8\0");
    put(&mut out, 0x1330, b"shared\0");
    put(&mut out, 0x1340, b"@16@0:8\0");
    put(&mut out, 0x1350, b"_name\0");
    put(&mut out, 0x1360, b"@\"NSString\"\0");
    put(&mut out, 0x1370, b"name\0");
    put(&mut out, 0x1380, b"T@\"NSString\",R,N,V_name\0");

    // -- __LINKEDIT --------------------------------------------------------
    let bind = bind_stream();
    put(&mut out, 0x2000, &bind);
    let trie = export_trie();
    put(&mut out, 0x2020, &trie);

    // symbol table: _bar and _OBJC_CLASS_$_Foo
    let sym_a = Nlist64Bytes {
        n_strx: 1,
        n_type: 0x0f,
        n_sect: 1,
        n_desc: 0,
        n_value: TEXT_VMADDR + 0x800,
    };
    let sym_b = Nlist64Bytes {
        n_strx: 6,
        n_type: 0x0f,
        n_sect: 2,
        n_desc: 0,
        n_value: DATA_VMADDR + 0x10,
    };
    put(&mut out, 0x2050, &sym_a.to_bytes());
    put(&mut out, 0x2060, &sym_b.to_bytes());
    put(&mut out, 0x2070, b"\0_bar\0_OBJC_CLASS_$_Foo\0");

    out
}

/// nlist_64, laid out by hand so the fixture does not depend on the code
/// under test for its symbol bytes.
struct Nlist64Bytes {
    n_strx: u32,
    n_type: u8,
    n_sect: u8,
    n_desc: u16,
    n_value: u64,
}

impl Nlist64Bytes {
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.extend_from_slice(&self.n_strx.to_le_bytes());
        out.push(self.n_type);
        out.push(self.n_sect);
        out.extend_from_slice(&self.n_desc.to_le_bytes());
        out.extend_from_slice(&self.n_value.to_le_bytes());
        out
    }
}

/// A second, minimal thin slice for fat-archive tests.
pub fn build_minimal_thin(cpu_type: u32, filler: u8) -> Vec<u8> {
    let header = MachHeaderRaw {
        magic: MH_MAGIC_64,
        cpu_type,
        cpu_subtype: 0,
        filetype: MH_DYLIB,
        ncmds: 0,
        sizeofcmds: 0,
        flags: 0,
    };
    let mut out = header.to_bytes(Endian::Little);
    out.extend_from_slice(&0u32.to_le_bytes());
    out.resize(0x100, filler);
    out
}
