//! Replicates the parts of dyld's loading logic needed for static analysis:
//! walking load commands into a queryable [`Library`], ordering dylib
//! imports, and decoding the binding and export information.

pub mod bind;
pub mod exports;

use crate::macho::commands::{LoadCommand, Payload};
use crate::macho::constants::*;
use crate::macho::fat::Slice;
use crate::macho::header::{parse_load_commands, MachHeader};
use crate::macho::segment::{Section, Segment, VmMap};
use crate::macho::symbols::SymbolTable;
use crate::Result;
use bind::{BindingAction, BindingTable};
use exports::Export;
use std::fmt;

/// An `x.y.z` version as packed into version load commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OsVersion {
    pub x: u16,
    pub y: u8,
    pub z: u8,
}

impl OsVersion {
    /// Unpack the `xxxx.yy.zz` encoding used by build-version and
    /// version-min commands.
    pub fn from_packed(value: u32) -> Self {
        OsVersion {
            x: (value >> 16) as u16,
            y: (value >> 8) as u8,
            z: value as u8,
        }
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.x, self.y, self.z)
    }
}

/// One linked dylib, positioned in the bind-ordinal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DylibImport {
    pub install_name: String,
    pub timestamp: u32,
    pub current_version: u32,
    pub compat_version: u32,
    pub weak: bool,
    /// 1-based position among the dylib-loading commands; the value bind
    /// opcodes use to refer to this image.
    pub ordinal: u32,
}

/// The dylib identity from `LC_ID_DYLIB`, kept with its version fields so
/// edits can inherit them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DylibId {
    pub install_name: String,
    pub timestamp: u32,
    pub current_version: u32,
    pub compat_version: u32,
}

/// A fully parsed Mach-O slice: the header, the decoded load commands, and
/// every derived table. Read-only once built; edits go through
/// [`crate::macho::editor::Editor`] and produce new bytes.
#[derive(Debug)]
pub struct Library {
    pub slice: Slice,
    pub header: MachHeader,
    pub load_commands: Vec<LoadCommand>,
    pub segments: Vec<Segment>,
    pub vm: VmMap,
    pub symbol_table: Option<SymbolTable>,
    pub binds: BindingTable,
    pub weak_binds: BindingTable,
    pub lazy_binds: BindingTable,
    pub exports: Vec<Export>,
    /// Linked dylibs in bind-ordinal order (`linked[i].ordinal == i + 1`).
    pub linked: Vec<DylibImport>,
    pub id: Option<DylibId>,
    pub rpaths: Vec<String>,
    pub allowed_clients: Vec<String>,
    pub uuid: Option<[u8; 16]>,
    pub platform: u32,
    pub minos: OsVersion,
    pub sdk: OsVersion,
    pub source_version: u64,
    pub entry_offset: Option<u64>,
    /// Last path component of the install name, or empty for non-dylibs.
    pub name: String,
}

impl Library {
    /// Parse a slice into a library.
    ///
    /// Structural problems (bad header, malformed load commands) fail the
    /// whole parse; per-symbol problems are logged and skipped so partial
    /// output stays useful.
    pub fn parse(slice: Slice) -> Result<Self> {
        log::debug!(
            "loading {} slice ({} bytes)",
            cpu_type_name(slice.cpu_type),
            slice.len()
        );
        let view = slice.view();
        let is_64 = slice.is_64;
        let header = MachHeader::parse(&view, is_64)?;
        let load_commands = parse_load_commands(&view, &header)?;

        let mut segments: Vec<Segment> = Vec::new();
        let mut vm = VmMap::new();
        let mut linked: Vec<DylibImport> = Vec::new();
        let mut id = None;
        let mut rpaths = Vec::new();
        let mut allowed_clients = Vec::new();
        let mut uuid = None;
        let mut platform = 0u32;
        let mut minos = OsVersion::default();
        let mut sdk = OsVersion::default();
        let mut source_version = 0u64;
        let mut entry_offset = None;

        // first pass: everything the binding decode depends on (segments,
        // import ordinals) plus the simple metadata commands
        for lc in &load_commands {
            match &lc.payload {
                Payload::Segment(segment) => {
                    vm.add_segment(segment);
                    segments.push(segment.clone());
                }
                Payload::Dylib { raw, name } => {
                    if lc.cmd == LC_ID_DYLIB {
                        id = Some(DylibId {
                            install_name: name.clone(),
                            timestamp: raw.timestamp,
                            current_version: raw.current_version,
                            compat_version: raw.compatibility_version,
                        });
                    } else if lc.is_dylib_load() {
                        let ordinal = linked.len() as u32 + 1;
                        linked.push(DylibImport {
                            install_name: name.clone(),
                            timestamp: raw.timestamp,
                            current_version: raw.current_version,
                            compat_version: raw.compatibility_version,
                            weak: lc.cmd == LC_LOAD_WEAK_DYLIB,
                            ordinal,
                        });
                    }
                }
                Payload::Uuid(cmd) => uuid = Some(cmd.uuid),
                Payload::BuildVersion(cmd) => {
                    platform = cmd.platform;
                    minos = OsVersion::from_packed(cmd.minos);
                    sdk = OsVersion::from_packed(cmd.sdk);
                }
                Payload::VersionMin(cmd) => {
                    if platform == 0 {
                        platform = match lc.cmd {
                            LC_VERSION_MIN_IPHONEOS => PLATFORM_IOS,
                            LC_VERSION_MIN_TVOS => PLATFORM_TVOS,
                            LC_VERSION_MIN_WATCHOS => PLATFORM_WATCHOS,
                            _ => PLATFORM_MACOS,
                        };
                        minos = OsVersion::from_packed(cmd.version);
                        sdk = OsVersion::from_packed(cmd.sdk);
                    }
                }
                Payload::SourceVersion(cmd) => source_version = cmd.version,
                Payload::Rpath { path, .. } => rpaths.push(path.clone()),
                Payload::SubClient { client, .. } => allowed_clients.push(client.clone()),
                Payload::Main(cmd) => entry_offset = Some(cmd.entryoff),
                _ => {}
            }
        }

        // second pass: tables that need segments or ordinals in place
        let mut symbol_table = None;
        let mut binds = BindingTable::default();
        let mut weak_binds = BindingTable::default();
        let mut lazy_binds = BindingTable::default();
        let mut exports_list = Vec::new();
        for lc in &load_commands {
            match &lc.payload {
                Payload::Symtab(cmd) => {
                    log::debug!("loading symbol table ({} symbols)", cmd.nsyms);
                    symbol_table = Some(SymbolTable::parse(&view, cmd, is_64)?);
                }
                Payload::DyldInfo(cmd) => {
                    log::debug!("loading binding info");
                    binds = bind::decode(
                        &view,
                        u64::from(cmd.bind_off),
                        u64::from(cmd.bind_size),
                        &segments,
                        is_64,
                        "bind",
                    )?;
                    weak_binds = bind::decode(
                        &view,
                        u64::from(cmd.weak_bind_off),
                        u64::from(cmd.weak_bind_size),
                        &segments,
                        is_64,
                        "weak-bind",
                    )?;
                    lazy_binds = bind::decode(
                        &view,
                        u64::from(cmd.lazy_bind_off),
                        u64::from(cmd.lazy_bind_size),
                        &segments,
                        is_64,
                        "lazy-bind",
                    )?;
                    exports_list = exports::parse_trie(
                        &view,
                        u64::from(cmd.export_off),
                        u64::from(cmd.export_size),
                    )?;
                }
                Payload::LinkeditData(cmd) if lc.cmd == LC_DYLD_EXPORTS_TRIE => {
                    exports_list = exports::parse_trie(
                        &view,
                        u64::from(cmd.dataoff),
                        u64::from(cmd.datasize),
                    )?;
                }
                _ => {}
            }
        }

        let ndylibs = linked.len() as i64;
        for table in [&mut binds, &mut weak_binds, &mut lazy_binds] {
            table.actions.retain(|action| {
                let valid = (-3..=0).contains(&action.dylib_ordinal)
                    || (1..=ndylibs).contains(&action.dylib_ordinal);
                if !valid {
                    log::warn!(
                        "dropping bind of {:?}: ordinal {} outside the {} linked dylibs",
                        action.symbol_name,
                        action.dylib_ordinal,
                        ndylibs
                    );
                }
                valid
            });
        }

        let name = id
            .as_ref()
            .map(|id: &DylibId| {
                id.install_name
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_string()
            })
            .unwrap_or_default();

        Ok(Library {
            slice,
            header,
            load_commands,
            segments,
            vm,
            symbol_table,
            binds,
            weak_binds,
            lazy_binds,
            exports: exports_list,
            linked,
            id,
            rpaths,
            allowed_clients,
            uuid,
            platform,
            minos,
            sdk,
            source_version,
            entry_offset,
            name,
        })
    }

    /// Translate a VM address and check it lies inside the slice.
    pub fn vm_to_file(&self, vaddr: u64) -> Result<u64> {
        let off = self.vm.vm_to_file(vaddr)?;
        if off >= self.slice.len() {
            return Err(crate::Error::Truncated {
                offset: off,
                needed: 1,
                available: self.slice.len(),
            });
        }
        Ok(off)
    }

    /// Read a C string through VM translation.
    pub fn cstr_at_vm(&self, vaddr: u64) -> Result<String> {
        let off = self.vm_to_file(vaddr)?;
        self.slice.view().read_cstr(off)
    }

    /// Read a pointer (4 or 8 bytes by the slice's width) at a VM address.
    pub fn ptr_at_vm(&self, vaddr: u64) -> Result<u64> {
        let off = self.vm_to_file(vaddr)?;
        let view = self.slice.view();
        if self.header.is_64 {
            view.read_u64(off)
        } else {
            Ok(u64::from(view.read_u32(off)?))
        }
    }

    /// Pointer width of this slice in bytes.
    pub fn ptr_size(&self) -> u64 {
        if self.header.is_64 {
            8
        } else {
            4
        }
    }

    /// Find a section in any of the usual data segments.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.segments
            .iter()
            .flat_map(|seg| seg.sections.iter())
            .find(|sect| sect.name == name)
    }

    /// Human-readable description of a bind ordinal: the dylib's install
    /// name or the special-marker name.
    pub fn ordinal_name(&self, ordinal: i64) -> String {
        match ordinal {
            BIND_SPECIAL_DYLIB_SELF => "self".to_string(),
            BIND_SPECIAL_DYLIB_MAIN_EXECUTABLE => "main-executable".to_string(),
            BIND_SPECIAL_DYLIB_FLAT_LOOKUP => "flat-namespace".to_string(),
            BIND_SPECIAL_DYLIB_WEAK_LOOKUP => "weak-lookup".to_string(),
            n if n >= 1 && (n as usize) <= self.linked.len() => {
                self.linked[n as usize - 1].install_name.clone()
            }
            n => format!("ordinal {}", n),
        }
    }

    /// Canonical `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX` rendering of the
    /// UUID command, if one was present.
    pub fn uuid_string(&self) -> Option<String> {
        self.uuid.map(|u| {
            format!(
                "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
                u[0], u[1], u[2], u[3], u[4], u[5], u[6], u[7], u[8], u[9], u[10], u[11], u[12],
                u[13], u[14], u[15]
            )
        })
    }

    /// All bind actions across the three tables.
    pub fn all_bind_actions(&self) -> impl Iterator<Item = &BindingAction> {
        self.binds
            .actions
            .iter()
            .chain(self.weak_binds.actions.iter())
            .chain(self.lazy_binds.actions.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_version() {
        let v = OsVersion::from_packed(0x000d_0100);
        assert_eq!((v.x, v.y, v.z), (13, 1, 0));
        assert_eq!(v.to_string(), "13.1.0");
    }

    #[test]
    fn test_uuid_render() {
        let mut uuid = [0u8; 16];
        for (i, b) in uuid.iter_mut().enumerate() {
            *b = (i as u8) * 0x11;
        }
        let lib_uuid = format!(
            "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            uuid[0], uuid[1], uuid[2], uuid[3], uuid[4], uuid[5], uuid[6], uuid[7], uuid[8],
            uuid[9], uuid[10], uuid[11], uuid[12], uuid[13], uuid[14], uuid[15]
        );
        assert_eq!(lib_uuid, "00112233-4455-6677-8899-AABBCCDDEEFF");
    }
}
