//! Segments, sections, and the virtual-memory translation map.
//!
//! A Mach-O file describes two address spaces: file offsets and the virtual
//! addresses the image occupies once mapped. Load commands, symbol values,
//! and all Objective-C metadata speak VM addresses; actually reading their
//! bytes requires translating back to file offsets through the segment
//! table. [`VmMap`] owns that translation.

use crate::codec::RawStruct;
use crate::macho::commands::{SectionHeader32, SectionHeader64, SegmentCommand32, SegmentCommand64};
use crate::view::{name_from_padded, ByteView};
use crate::{Error, Result};

/// One section within a segment, width-unified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub segment_name: String,
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub flags: u32,
    pub reserved1: u32,
    pub reserved2: u32,
}

/// One `LC_SEGMENT[_64]` with its sections, width-unified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
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
    /// Parse a segment command and its trailing section headers.
    ///
    /// `off` is the load command's own offset within the slice.
    pub fn parse(view: &ByteView<'_>, off: u64, is_64: bool) -> Result<Self> {
        if is_64 {
            let cmd = SegmentCommand64::parse(view, off)?;
            let mut sections = Vec::with_capacity(cmd.nsects as usize);
            let mut cursor = off + SegmentCommand64::SIZE;
            for _ in 0..cmd.nsects {
                let sect = SectionHeader64::parse(view, cursor)?;
                sections.push(Section {
                    name: name_from_padded(&sect.sectname),
                    segment_name: name_from_padded(&sect.segname),
                    addr: sect.addr,
                    size: sect.size,
                    offset: sect.offset,
                    align: sect.align,
                    reloff: sect.reloff,
                    nreloc: sect.nreloc,
                    flags: sect.flags,
                    reserved1: sect.reserved1,
                    reserved2: sect.reserved2,
                });
                cursor += SectionHeader64::SIZE;
            }
            Ok(Segment {
                name: name_from_padded(&cmd.segname),
                vmaddr: cmd.vmaddr,
                vmsize: cmd.vmsize,
                fileoff: cmd.fileoff,
                filesize: cmd.filesize,
                maxprot: cmd.maxprot,
                initprot: cmd.initprot,
                flags: cmd.flags,
                sections,
            })
        } else {
            let cmd = SegmentCommand32::parse(view, off)?;
            let mut sections = Vec::with_capacity(cmd.nsects as usize);
            let mut cursor = off + SegmentCommand32::SIZE;
            for _ in 0..cmd.nsects {
                let sect = SectionHeader32::parse(view, cursor)?;
                sections.push(Section {
                    name: name_from_padded(&sect.sectname),
                    segment_name: name_from_padded(&sect.segname),
                    addr: u64::from(sect.addr),
                    size: u64::from(sect.size),
                    offset: sect.offset,
                    align: sect.align,
                    reloff: sect.reloff,
                    nreloc: sect.nreloc,
                    flags: sect.flags,
                    reserved1: sect.reserved1,
                    reserved2: sect.reserved2,
                });
                cursor += SectionHeader32::SIZE;
            }
            Ok(Segment {
                name: name_from_padded(&cmd.segname),
                vmaddr: u64::from(cmd.vmaddr),
                vmsize: u64::from(cmd.vmsize),
                fileoff: u64::from(cmd.fileoff),
                filesize: u64::from(cmd.filesize),
                maxprot: cmd.maxprot,
                initprot: cmd.initprot,
                flags: cmd.flags,
                sections,
            })
        }
    }

    /// Find a section by name.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }
}

/// Pointer authentication and tagging leave junk in the high bits of
/// addresses stored in data segments; the map only ever sees the low 48.
const VM_ADDRESS_MASK: u64 = 0x0000_ffff_ffff_ffff;

#[derive(Debug, Clone)]
struct VmEntry {
    name: String,
    vmaddr: u64,
    vmsize: u64,
    fileoff: u64,
    filesize: u64,
}

/// Virtual-address to file-offset translation built from the segment list.
///
/// Entries are segment-granular. Segments never overlap in a well-formed
/// image; if they do, the first match wins.
#[derive(Debug, Clone, Default)]
pub struct VmMap {
    entries: Vec<VmEntry>,
}

impl VmMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_segment(&mut self, segment: &Segment) {
        log::debug!(
            "vm map: {} [{:#x}, {:#x}) -> file {:#x}",
            segment.name,
            segment.vmaddr,
            segment.vmaddr + segment.vmsize,
            segment.fileoff
        );
        self.entries.push(VmEntry {
            name: segment.name.clone(),
            vmaddr: segment.vmaddr,
            vmsize: segment.vmsize,
            fileoff: segment.fileoff,
            filesize: segment.filesize,
        });
    }

    /// Translate a virtual address to its file offset.
    ///
    /// Addresses inside a segment's zero-fill tail (past `filesize` but
    /// within `vmsize`) have no bytes in the file and fail with
    /// [`Error::ZeroFill`].
    pub fn vm_to_file(&self, vaddr: u64) -> Result<u64> {
        let vaddr = vaddr & VM_ADDRESS_MASK;
        for entry in &self.entries {
            if vaddr >= entry.vmaddr && vaddr < entry.vmaddr + entry.vmsize {
                let delta = vaddr - entry.vmaddr;
                if delta >= entry.filesize {
                    return Err(Error::ZeroFill(vaddr));
                }
                return Ok(entry.fileoff + delta);
            }
        }
        Err(Error::UnmappedAddress(vaddr))
    }

    /// Lowest mapped address, skipping `__PAGEZERO`.
    pub fn vm_start(&self) -> Option<u64> {
        self.entries
            .iter()
            .filter(|e| e.name != "__PAGEZERO")
            .map(|e| e.vmaddr)
            .min()
    }

    /// Render the map as an aligned table, one row per segment.
    pub fn render(&self) -> String {
        let mut rows: Vec<&VmEntry> = self.entries.iter().collect();
        rows.sort_by_key(|e| e.vmaddr);
        let mut out = String::new();
        for e in rows {
            out.push_str(&format!(
                "{:<16}  start: {:#011x}  end: {:#011x}  size: {:#011x}  file: {:#011x}\n",
                e.name,
                e.vmaddr,
                e.vmaddr + e.vmsize,
                e.vmsize,
                e.fileoff
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(name: &str, vmaddr: u64, vmsize: u64, fileoff: u64, filesize: u64) -> Segment {
        Segment {
            name: name.into(),
            vmaddr,
            vmsize,
            fileoff,
            filesize,
            maxprot: 0,
            initprot: 0,
            flags: 0,
            sections: Vec::new(),
        }
    }

    #[test]
    fn test_translation() {
        let mut map = VmMap::new();
        map.add_segment(&segment("__TEXT", 0x1_0000_0000, 0x4000, 0, 0x4000));
        map.add_segment(&segment("__DATA", 0x1_0000_4000, 0x8000, 0x4000, 0x4000));

        assert_eq!(map.vm_to_file(0x1_0000_0000).unwrap(), 0);
        assert_eq!(map.vm_to_file(0x1_0000_0123).unwrap(), 0x123);
        assert_eq!(map.vm_to_file(0x1_0000_4010).unwrap(), 0x4010);
    }

    #[test]
    fn test_unmapped_and_zero_fill() {
        let mut map = VmMap::new();
        map.add_segment(&segment("__DATA", 0x4000, 0x8000, 0x4000, 0x4000));

        assert!(matches!(
            map.vm_to_file(0x1000),
            Err(Error::UnmappedAddress(0x1000))
        ));
        // past filesize but inside vmsize
        assert!(matches!(map.vm_to_file(0x9000), Err(Error::ZeroFill(_))));
    }

    #[test]
    fn test_high_bits_masked() {
        let mut map = VmMap::new();
        map.add_segment(&segment("__DATA", 0x4000, 0x4000, 0x4000, 0x4000));
        // tagged pointer with PAC bits set
        assert_eq!(map.vm_to_file(0xffff_0000_0000_4008).unwrap(), 0x4008);
    }

    #[test]
    fn test_vm_start_skips_pagezero() {
        let mut map = VmMap::new();
        map.add_segment(&segment("__PAGEZERO", 0, 0x1_0000_0000, 0, 0));
        map.add_segment(&segment("__TEXT", 0x1_0000_0000, 0x4000, 0, 0x4000));
        assert_eq!(map.vm_start(), Some(0x1_0000_0000));
    }
}
