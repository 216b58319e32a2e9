//! Load-command editing.
//!
//! All edits happen on a private copy of the slice bytes and recompute
//! `ncmds`/`sizeofcmds` so the result is a valid Mach-O. An operation that
//! fails leaves the buffer exactly as it was.

use crate::codec::RawStruct;
use crate::macho::commands::{
    DylibCommand, DyldInfoCommand, DysymtabCommand, EncryptionInfoCommand32,
    EncryptionInfoCommand64, LinkeditDataCommand, SectionHeader32, SectionHeader64,
    SegmentCommand32, SegmentCommand64, SymtabCommand,
};
use crate::macho::constants::*;
use crate::macho::fat::Slice;
use crate::macho::header::{parse_load_commands, MachHeader};
use crate::view::{ByteView, Endian};
use crate::{Error, Result};

/// Offset of `ncmds` within either header width.
const NCMDS_OFFSET: usize = 16;

/// Offset of `sizeofcmds` within either header width.
const SIZEOFCMDS_OFFSET: usize = 20;

/// The dylib-command fabrication template: name at 0x18, timestamp 2,
/// versions 1.0.0.
const DYLIB_TEMPLATE: (u32, u32, u32, u32) = (0x18, 0x2, 0x0001_0000, 0x0001_0000);

/// In-memory editor over one slice's bytes.
pub struct Editor {
    data: Vec<u8>,
    endian: Endian,
    is_64: bool,
}

impl Editor {
    /// Start editing a copy of the slice's bytes.
    pub fn new(slice: &Slice) -> Self {
        Editor {
            data: slice.data.clone(),
            endian: slice.endian,
            is_64: slice.is_64,
        }
    }

    /// The edited bytes.
    pub fn finish(self) -> Vec<u8> {
        self.data
    }

    /// The edited bytes as a reparsed slice.
    pub fn into_slice(self) -> Result<Slice> {
        Slice::parse(self.data)
    }

    fn view(&self) -> ByteView<'_> {
        ByteView::new(&self.data, self.endian)
    }

    fn header(&self) -> Result<MachHeader> {
        MachHeader::parse(&self.view(), self.is_64)
    }

    fn pointer_align(&self) -> usize {
        if self.is_64 {
            8
        } else {
            4
        }
    }

    fn write_u32_at(data: &mut [u8], endian: Endian, off: usize, value: u32) {
        data[off..off + 4].copy_from_slice(&endian.u32_to(value));
    }

    /// Byte offsets of each load command, in order.
    fn command_offsets(&self) -> Result<Vec<(u64, u32, u32)>> {
        let header = self.header()?;
        let view = self.view();
        let mut out = Vec::with_capacity(header.ncmds as usize);
        let mut cursor = header.size();
        let end = header.size() + u64::from(header.sizeofcmds);
        for _ in 0..header.ncmds {
            if cursor + 8 > end {
                return Err(Error::MalformedLoadCommands(
                    "command begins past the end of the region".into(),
                ));
            }
            let cmd = view.read_u32(cursor)?;
            let cmdsize = view.read_u32(cursor + 4)?;
            if cmdsize == 0 {
                return Err(Error::MalformedLoadCommands("cmdsize 0".into()));
            }
            out.push((cursor, cmd, cmdsize));
            cursor += u64::from(cmdsize);
        }
        Ok(out)
    }

    /// How far the load commands may grow: up to the first byte of mapped
    /// section data (or segment data when no section claims an offset).
    fn growth_limit(&self) -> Result<u64> {
        let header = self.header()?;
        let commands = parse_load_commands(&self.view(), &header)?;
        let mut limit = None;
        for lc in &commands {
            if let crate::macho::commands::Payload::Segment(seg) = &lc.payload {
                for sect in &seg.sections {
                    if sect.offset != 0 {
                        let off = u64::from(sect.offset);
                        limit = Some(limit.map_or(off, |l: u64| l.min(off)));
                    }
                }
                if limit.is_none() && seg.fileoff != 0 {
                    limit = Some(seg.fileoff);
                }
            }
        }
        Ok(limit.unwrap_or(self.data.len() as u64))
    }

    /// Splice a fully formed load command into the list at `index`
    /// (append when `None`).
    ///
    /// `struct_bytes` is the command's fixed struct, `cmd` and `cmdsize`
    /// first; `trailing_string` is NUL-terminated and padded to pointer
    /// alignment, and `cmdsize` is rewritten to the final size.
    pub fn insert_load_command(
        &mut self,
        struct_bytes: Vec<u8>,
        trailing_string: Option<&str>,
        index: Option<usize>,
    ) -> Result<()> {
        let header = self.header()?;
        let mut lc = struct_bytes;
        if lc.len() < 8 {
            return Err(Error::UnsupportedEdit(
                "load command shorter than its required header".into(),
            ));
        }
        if let Some(s) = trailing_string {
            let align = self.pointer_align();
            let unpadded = lc.len() + s.len() + 1;
            let padded = unpadded.div_ceil(align) * align;
            lc.extend_from_slice(s.as_bytes());
            lc.resize(padded, 0);
        }
        let size = lc.len() as u32;
        Self::write_u32_at(&mut lc, self.endian, 4, size);

        let lc_end = header.size() + u64::from(header.sizeofcmds);
        let limit = self.growth_limit()?;
        if lc_end + u64::from(size) > limit {
            return Err(Error::NoHeaderPadding {
                needed: u64::from(header.sizeofcmds) + u64::from(size),
                available: limit - header.size(),
            });
        }

        let offsets = self.command_offsets()?;
        let splice_at = match index {
            Some(i) if i < offsets.len() => offsets[i].0,
            _ => lc_end,
        };

        let mut out = self.data.clone();
        let (splice, end, size) = (splice_at as usize, lc_end as usize, size as usize);
        out.copy_within(splice..end, splice + size);
        out[splice..splice + size].copy_from_slice(&lc);
        Self::write_u32_at(&mut out, self.endian, NCMDS_OFFSET, header.ncmds + 1);
        Self::write_u32_at(
            &mut out,
            self.endian,
            SIZEOFCMDS_OFFSET,
            header.sizeofcmds + size as u32,
        );
        self.data = out;
        log::debug!("inserted load command at {:#x} ({} bytes)", splice, size);
        Ok(())
    }

    /// Remove the load command at `index`, shifting the rest left and
    /// zero-filling the vacated tail.
    pub fn remove_load_command(&mut self, index: usize) -> Result<()> {
        let header = self.header()?;
        let offsets = self.command_offsets()?;
        let (off, cmd, cmdsize) = *offsets.get(index).ok_or_else(|| {
            Error::UnsupportedEdit(format!(
                "no load command at index {} ({} present)",
                index,
                offsets.len()
            ))
        })?;

        let lc_end = (header.size() + u64::from(header.sizeofcmds)) as usize;
        let (off, cmdsize) = (off as usize, cmdsize as usize);
        let mut out = self.data.clone();
        out.copy_within(off + cmdsize..lc_end, off);
        out[lc_end - cmdsize..lc_end].fill(0);
        Self::write_u32_at(&mut out, self.endian, NCMDS_OFFSET, header.ncmds - 1);
        Self::write_u32_at(
            &mut out,
            self.endian,
            SIZEOFCMDS_OFFSET,
            header.sizeofcmds - cmdsize as u32,
        );
        self.data = out;
        log::debug!("removed load command {} ({}, {} bytes)", index, lc_name(cmd), cmdsize);
        Ok(())
    }

    /// Append a fabricated dylib-loading command (`LC_LOAD_DYLIB` and
    /// friends) naming `install_name`.
    pub fn insert_dylib_command(&mut self, cmd: u32, install_name: &str) -> Result<()> {
        let (name_offset, timestamp, current, compat) = DYLIB_TEMPLATE;
        let raw = DylibCommand {
            cmd,
            cmdsize: DylibCommand::SIZE as u32,
            name_offset,
            timestamp,
            current_version: current,
            compatibility_version: compat,
        };
        self.insert_load_command(raw.to_bytes(self.endian), Some(install_name), None)
    }

    /// Replace the install name in `LC_ID_DYLIB`, inheriting the replaced
    /// command's timestamp and version fields.
    pub fn set_install_name(&mut self, install_name: &str) -> Result<()> {
        let offsets = self.command_offsets()?;
        let (index, (off, _, _)) = offsets
            .iter()
            .enumerate()
            .find(|(_, (_, cmd, _))| *cmd == LC_ID_DYLIB)
            .ok_or_else(|| {
                Error::UnsupportedEdit("file has no LC_ID_DYLIB to rename".into())
            })?;
        let old = DylibCommand::parse(&self.view(), *off)?;

        self.remove_load_command(index)?;
        let raw = DylibCommand {
            cmd: LC_ID_DYLIB,
            cmdsize: DylibCommand::SIZE as u32,
            name_offset: DylibCommand::SIZE as u32,
            timestamp: old.timestamp,
            current_version: old.current_version,
            compatibility_version: old.compatibility_version,
        };
        self.insert_load_command(raw.to_bytes(self.endian), Some(install_name), Some(index))
    }

    /// Grow the gap between the load commands and the first section data by
    /// `n` bytes, shifting every file offset in the image accordingly.
    ///
    /// One pass rewrites every `fileoff`/`offset`-valued field that points
    /// at or past the end of the old load-command region, and the segment
    /// that holds the header grows by `n`.
    pub fn add_header_padding(&mut self, n: u32) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let align = self.pointer_align() as u32;
        if n % align != 0 {
            return Err(Error::UnsupportedEdit(format!(
                "padding must be a multiple of {} bytes",
                align
            )));
        }
        let header = self.header()?;
        let threshold = header.size() + u64::from(header.sizeofcmds);
        let offsets = self.command_offsets()?;

        let mut out = Vec::with_capacity(self.data.len() + n as usize);
        out.extend_from_slice(&self.data[..threshold as usize]);
        out.resize(threshold as usize + n as usize, 0);
        out.extend_from_slice(&self.data[threshold as usize..]);

        let shift32 = |value: u32| -> u32 {
            if u64::from(value) >= threshold && value != 0 {
                value + n
            } else {
                value
            }
        };
        let shift64 = |value: u64| -> u64 {
            if value >= threshold && value != 0 {
                value + u64::from(n)
            } else {
                value
            }
        };

        let view = self.view();
        let endian = self.endian;
        let mut grew_first_segment = false;
        let patch = |off: usize, bytes: &[u8], out: &mut Vec<u8>| {
            out[off..off + bytes.len()].copy_from_slice(bytes);
        };

        for &(off, cmd, _) in &offsets {
            match cmd {
                LC_SEGMENT => {
                    let mut seg = SegmentCommand32::parse(&view, off)?;
                    let holds_header = u64::from(seg.fileoff) < threshold;
                    seg.fileoff = shift32(seg.fileoff);
                    if holds_header && !grew_first_segment {
                        seg.filesize += n;
                        seg.vmsize += n;
                        grew_first_segment = true;
                    }
                    patch(off as usize, &seg.to_bytes(endian), &mut out);
                    let mut cursor = off + SegmentCommand32::SIZE;
                    for _ in 0..seg.nsects {
                        let mut sect = SectionHeader32::parse(&view, cursor)?;
                        sect.offset = shift32(sect.offset);
                        sect.reloff = shift32(sect.reloff);
                        patch(cursor as usize, &sect.to_bytes(endian), &mut out);
                        cursor += SectionHeader32::SIZE;
                    }
                }
                LC_SEGMENT_64 => {
                    let mut seg = SegmentCommand64::parse(&view, off)?;
                    let holds_header = seg.fileoff < threshold;
                    seg.fileoff = shift64(seg.fileoff);
                    if holds_header && !grew_first_segment {
                        seg.filesize += u64::from(n);
                        seg.vmsize += u64::from(n);
                        grew_first_segment = true;
                    }
                    patch(off as usize, &seg.to_bytes(endian), &mut out);
                    let mut cursor = off + SegmentCommand64::SIZE;
                    for _ in 0..seg.nsects {
                        let mut sect = SectionHeader64::parse(&view, cursor)?;
                        sect.offset = shift32(sect.offset);
                        sect.reloff = shift32(sect.reloff);
                        patch(cursor as usize, &sect.to_bytes(endian), &mut out);
                        cursor += SectionHeader64::SIZE;
                    }
                }
                LC_SYMTAB => {
                    let mut sym = SymtabCommand::parse(&view, off)?;
                    sym.symoff = shift32(sym.symoff);
                    sym.stroff = shift32(sym.stroff);
                    patch(off as usize, &sym.to_bytes(endian), &mut out);
                }
                LC_DYSYMTAB => {
                    let mut dy = DysymtabCommand::parse(&view, off)?;
                    dy.tocoff = shift32(dy.tocoff);
                    dy.modtaboff = shift32(dy.modtaboff);
                    dy.extrefsymoff = shift32(dy.extrefsymoff);
                    dy.indirectsymoff = shift32(dy.indirectsymoff);
                    dy.extreloff = shift32(dy.extreloff);
                    dy.locreloff = shift32(dy.locreloff);
                    patch(off as usize, &dy.to_bytes(endian), &mut out);
                }
                LC_DYLD_INFO | LC_DYLD_INFO_ONLY => {
                    let mut info = DyldInfoCommand::parse(&view, off)?;
                    info.rebase_off = shift32(info.rebase_off);
                    info.bind_off = shift32(info.bind_off);
                    info.weak_bind_off = shift32(info.weak_bind_off);
                    info.lazy_bind_off = shift32(info.lazy_bind_off);
                    info.export_off = shift32(info.export_off);
                    patch(off as usize, &info.to_bytes(endian), &mut out);
                }
                LC_CODE_SIGNATURE | LC_SEGMENT_SPLIT_INFO | LC_FUNCTION_STARTS
                | LC_DATA_IN_CODE | LC_DYLIB_CODE_SIGN_DRS | LC_DYLD_EXPORTS_TRIE
                | LC_DYLD_CHAINED_FIXUPS => {
                    let mut le = LinkeditDataCommand::parse(&view, off)?;
                    le.dataoff = shift32(le.dataoff);
                    patch(off as usize, &le.to_bytes(endian), &mut out);
                }
                LC_ENCRYPTION_INFO => {
                    let mut enc = EncryptionInfoCommand32::parse(&view, off)?;
                    enc.cryptoff = shift32(enc.cryptoff);
                    patch(off as usize, &enc.to_bytes(endian), &mut out);
                }
                LC_ENCRYPTION_INFO_64 => {
                    let mut enc = EncryptionInfoCommand64::parse(&view, off)?;
                    enc.cryptoff = shift32(enc.cryptoff);
                    patch(off as usize, &enc.to_bytes(endian), &mut out);
                }
                _ => {}
            }
        }

        self.data = out;
        log::debug!("added {} bytes of header padding", n);
        Ok(())
    }
}
