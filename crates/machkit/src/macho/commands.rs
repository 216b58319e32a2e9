//! Load-command payload layouts and the decoded command variants.
//!
//! The `layout!` records mirror the on-disk structs byte for byte; the
//! [`Payload`] enum is what the rest of the crate consumes. Unknown command
//! codes keep their raw tail so editing never corrupts commands this crate
//! does not understand.

use crate::codec::{layout, RawStruct};
use crate::macho::constants::*;
use crate::macho::segment::Segment;
use crate::view::ByteView;
use crate::{Error, Result};

layout! {
    /// `segment_command` (32-bit).
    SegmentCommand32 {
        cmd: u32,
        cmdsize: u32,
        segname: [u8; 16],
        vmaddr: u32,
        vmsize: u32,
        fileoff: u32,
        filesize: u32,
        maxprot: u32,
        initprot: u32,
        nsects: u32,
        flags: u32,
    }
}

layout! {
    /// `segment_command_64`.
    SegmentCommand64 {
        cmd: u32,
        cmdsize: u32,
        segname: [u8; 16],
        vmaddr: u64,
        vmsize: u64,
        fileoff: u64,
        filesize: u64,
        maxprot: u32,
        initprot: u32,
        nsects: u32,
        flags: u32,
    }
}

layout! {
    /// `section` (32-bit), trailing a 32-bit segment command.
    SectionHeader32 {
        sectname: [u8; 16],
        segname: [u8; 16],
        addr: u32,
        size: u32,
        offset: u32,
        align: u32,
        reloff: u32,
        nreloc: u32,
        flags: u32,
        reserved1: u32,
        reserved2: u32,
    }
}

layout! {
    /// `section_64`, trailing a 64-bit segment command.
    SectionHeader64 {
        sectname: [u8; 16],
        segname: [u8; 16],
        addr: u64,
        size: u64,
        offset: u32,
        align: u32,
        reloff: u32,
        nreloc: u32,
        flags: u32,
        reserved1: u32,
        reserved2: u32,
        reserved3: u32,
    }
}

layout! {
    /// `symtab_command`.
    SymtabCommand {
        cmd: u32,
        cmdsize: u32,
        symoff: u32,
        nsyms: u32,
        stroff: u32,
        strsize: u32,
    }
}

layout! {
    /// `dysymtab_command`.
    DysymtabCommand {
        cmd: u32,
        cmdsize: u32,
        ilocalsym: u32,
        nlocalsym: u32,
        iextdefsym: u32,
        nextdefsym: u32,
        iundefsym: u32,
        nundefsym: u32,
        tocoff: u32,
        ntoc: u32,
        modtaboff: u32,
        nmodtab: u32,
        extrefsymoff: u32,
        nextrefsyms: u32,
        indirectsymoff: u32,
        nindirectsyms: u32,
        extreloff: u32,
        nextrel: u32,
        locreloff: u32,
        nlocrel: u32,
    }
}

layout! {
    /// `dylib_command`; `name_offset` points at the trailing install name.
    DylibCommand {
        cmd: u32,
        cmdsize: u32,
        name_offset: u32,
        timestamp: u32,
        current_version: u32,
        compatibility_version: u32,
    }
}

layout! {
    /// `dylinker_command`.
    DylinkerCommand {
        cmd: u32,
        cmdsize: u32,
        name_offset: u32,
    }
}

layout! {
    /// `rpath_command`.
    RpathCommand {
        cmd: u32,
        cmdsize: u32,
        path_offset: u32,
    }
}

layout! {
    /// `sub_client_command`.
    SubClientCommand {
        cmd: u32,
        cmdsize: u32,
        client_offset: u32,
    }
}

layout! {
    /// `uuid_command`.
    UuidCommand {
        cmd: u32,
        cmdsize: u32,
        uuid: [u8; 16],
    }
}

layout! {
    /// `build_version_command`; `ntools` tool entries trail it.
    BuildVersionCommand {
        cmd: u32,
        cmdsize: u32,
        platform: u32,
        minos: u32,
        sdk: u32,
        ntools: u32,
    }
}

layout! {
    /// `version_min_command` (all four `LC_VERSION_MIN_*` kinds).
    VersionMinCommand {
        cmd: u32,
        cmdsize: u32,
        version: u32,
        sdk: u32,
    }
}

layout! {
    /// `source_version_command`.
    SourceVersionCommand {
        cmd: u32,
        cmdsize: u32,
        version: u64,
    }
}

layout! {
    /// `dyld_info_command`.
    DyldInfoCommand {
        cmd: u32,
        cmdsize: u32,
        rebase_off: u32,
        rebase_size: u32,
        bind_off: u32,
        bind_size: u32,
        weak_bind_off: u32,
        weak_bind_size: u32,
        lazy_bind_off: u32,
        lazy_bind_size: u32,
        export_off: u32,
        export_size: u32,
    }
}

layout! {
    /// `linkedit_data_command` (function starts, data-in-code, code
    /// signature, exports trie, chained fixups).
    LinkeditDataCommand {
        cmd: u32,
        cmdsize: u32,
        dataoff: u32,
        datasize: u32,
    }
}

layout! {
    /// `entry_point_command` (`LC_MAIN`).
    EntryPointCommand {
        cmd: u32,
        cmdsize: u32,
        entryoff: u64,
        stacksize: u64,
    }
}

layout! {
    /// `encryption_info_command` (32-bit).
    EncryptionInfoCommand32 {
        cmd: u32,
        cmdsize: u32,
        cryptoff: u32,
        cryptsize: u32,
        cryptid: u32,
    }
}

layout! {
    /// `encryption_info_command_64`.
    EncryptionInfoCommand64 {
        cmd: u32,
        cmdsize: u32,
        cryptoff: u32,
        cryptsize: u32,
        cryptid: u32,
        pad: u32,
    }
}

layout! {
    /// `linker_option_command`; `count` NUL-terminated strings trail it.
    LinkerOptionCommand {
        cmd: u32,
        cmdsize: u32,
        count: u32,
    }
}

/// A decoded load command's payload.
#[derive(Debug, Clone)]
pub enum Payload {
    Segment(Segment),
    Symtab(SymtabCommand),
    Dysymtab(DysymtabCommand),
    Dylib { raw: DylibCommand, name: String },
    Dylinker { raw: DylinkerCommand, name: String },
    Rpath { raw: RpathCommand, path: String },
    SubClient { raw: SubClientCommand, client: String },
    Uuid(UuidCommand),
    BuildVersion(BuildVersionCommand),
    VersionMin(VersionMinCommand),
    SourceVersion(SourceVersionCommand),
    DyldInfo(DyldInfoCommand),
    LinkeditData(LinkeditDataCommand),
    Main(EntryPointCommand),
    EncryptionInfo { cryptoff: u32, cryptsize: u32, cryptid: u32 },
    LinkerOption { raw: LinkerOptionCommand, options: Vec<String> },
    /// Anything this crate does not model; the tail after `{cmd, cmdsize}`
    /// is carried verbatim.
    Unknown { tail: Vec<u8> },
}

/// One load command: its position in the file, its common header fields,
/// and the decoded payload.
#[derive(Debug, Clone)]
pub struct LoadCommand {
    /// Offset of the command within the slice.
    pub offset: u64,
    pub cmd: u32,
    pub cmdsize: u32,
    pub payload: Payload,
}

impl LoadCommand {
    /// Decode the command at `off`. The caller has already validated that
    /// `[off, off + cmdsize)` lies inside the load-command region.
    pub fn parse(view: &ByteView<'_>, off: u64, is_64: bool) -> Result<Self> {
        let cmd = view.read_u32(off)?;
        let cmdsize = view.read_u32(off + 4)?;

        let string_at = |rel: u32| -> Result<String> {
            if u64::from(rel) >= u64::from(cmdsize) {
                return Err(Error::MalformedLoadCommands(format!(
                    "{} string offset {} outside cmdsize {}",
                    lc_name(cmd),
                    rel,
                    cmdsize
                )));
            }
            // the string is NUL-terminated inside the command, so cap the
            // read at the command's end
            let raw = view.read_bytes(off + u64::from(rel), u64::from(cmdsize - rel))?;
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
        };

        let payload = match cmd {
            LC_SEGMENT | LC_SEGMENT_64 => {
                Payload::Segment(Segment::parse(view, off, cmd == LC_SEGMENT_64)?)
            }
            LC_SYMTAB => Payload::Symtab(SymtabCommand::parse(view, off)?),
            LC_DYSYMTAB => Payload::Dysymtab(DysymtabCommand::parse(view, off)?),
            LC_LOAD_DYLIB | LC_ID_DYLIB | LC_LOAD_WEAK_DYLIB | LC_REEXPORT_DYLIB
            | LC_LOAD_UPWARD_DYLIB | LC_LAZY_LOAD_DYLIB => {
                let raw = DylibCommand::parse(view, off)?;
                let name = string_at(raw.name_offset)?;
                Payload::Dylib { raw, name }
            }
            LC_LOAD_DYLINKER | LC_ID_DYLINKER | LC_DYLD_ENVIRONMENT => {
                let raw = DylinkerCommand::parse(view, off)?;
                let name = string_at(raw.name_offset)?;
                Payload::Dylinker { raw, name }
            }
            LC_RPATH => {
                let raw = RpathCommand::parse(view, off)?;
                let path = string_at(raw.path_offset)?;
                Payload::Rpath { raw, path }
            }
            LC_SUB_CLIENT => {
                let raw = SubClientCommand::parse(view, off)?;
                let client = string_at(raw.client_offset)?;
                Payload::SubClient { raw, client }
            }
            LC_UUID => Payload::Uuid(UuidCommand::parse(view, off)?),
            LC_BUILD_VERSION => Payload::BuildVersion(BuildVersionCommand::parse(view, off)?),
            LC_VERSION_MIN_MACOSX | LC_VERSION_MIN_IPHONEOS | LC_VERSION_MIN_TVOS
            | LC_VERSION_MIN_WATCHOS => {
                Payload::VersionMin(VersionMinCommand::parse(view, off)?)
            }
            LC_SOURCE_VERSION => Payload::SourceVersion(SourceVersionCommand::parse(view, off)?),
            LC_DYLD_INFO | LC_DYLD_INFO_ONLY => {
                Payload::DyldInfo(DyldInfoCommand::parse(view, off)?)
            }
            LC_CODE_SIGNATURE | LC_SEGMENT_SPLIT_INFO | LC_FUNCTION_STARTS | LC_DATA_IN_CODE
            | LC_DYLIB_CODE_SIGN_DRS | LC_DYLD_EXPORTS_TRIE | LC_DYLD_CHAINED_FIXUPS => {
                Payload::LinkeditData(LinkeditDataCommand::parse(view, off)?)
            }
            LC_MAIN => Payload::Main(EntryPointCommand::parse(view, off)?),
            LC_ENCRYPTION_INFO => {
                let raw = EncryptionInfoCommand32::parse(view, off)?;
                Payload::EncryptionInfo {
                    cryptoff: raw.cryptoff,
                    cryptsize: raw.cryptsize,
                    cryptid: raw.cryptid,
                }
            }
            LC_ENCRYPTION_INFO_64 => {
                let raw = EncryptionInfoCommand64::parse(view, off)?;
                Payload::EncryptionInfo {
                    cryptoff: raw.cryptoff,
                    cryptsize: raw.cryptsize,
                    cryptid: raw.cryptid,
                }
            }
            LC_LINKER_OPTION => {
                let raw = LinkerOptionCommand::parse(view, off)?;
                let mut options = Vec::with_capacity(raw.count as usize);
                let mut cursor = off + LinkerOptionCommand::SIZE;
                let end = off + u64::from(cmdsize);
                for _ in 0..raw.count {
                    if cursor >= end {
                        break;
                    }
                    let s = view.read_cstr(cursor)?;
                    cursor += s.len() as u64 + 1;
                    options.push(s);
                }
                Payload::LinkerOption { raw, options }
            }
            _ => {
                log::debug!("preserving unknown load command {:#x} ({} bytes)", cmd, cmdsize);
                let tail = view
                    .read_bytes(off + 8, u64::from(cmdsize).saturating_sub(8))?
                    .to_vec();
                Payload::Unknown { tail }
            }
        };

        Ok(LoadCommand {
            offset: off,
            cmd,
            cmdsize,
            payload,
        })
    }

    /// Whether this command assigns a dylib import ordinal.
    pub fn is_dylib_load(&self) -> bool {
        DYLIB_LOAD_COMMANDS.contains(&self.cmd)
    }
}
