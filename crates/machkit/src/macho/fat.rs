//! Fat archive reading and packing, and the per-architecture [`Slice`].
//!
//! A fat (universal) file is a big-endian table of `fat_arch` records, each
//! pointing at a complete Mach-O slice. A thin file is a single slice at
//! offset zero. Either way the rest of the crate only ever sees [`Slice`]s.

use crate::codec::{layout, RawStruct};
use crate::macho::constants::*;
use crate::macho::header::detect_magic;
use crate::view::{ByteView, Endian};
use crate::{Error, Result};
use std::path::Path;

/// Default fat slice alignment as a power of two: 2^14 = 16 KiB pages.
pub const DEFAULT_FAT_ALIGN: u32 = 14;

layout! {
    /// `fat_header`; always big-endian on disk.
    FatHeader {
        magic: u32,
        nfat_arch: u32,
    }
}

layout! {
    /// `fat_arch` (32-bit offsets).
    FatArch {
        cpu_type: u32,
        cpu_subtype: u32,
        offset: u32,
        size: u32,
        align: u32,
    }
}

layout! {
    /// `fat_arch_64`.
    FatArch64 {
        cpu_type: u32,
        cpu_subtype: u32,
        offset: u64,
        size: u64,
        align: u32,
        reserved: u32,
    }
}

/// Whether the input was a fat archive or a bare Mach-O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Fat,
    Thin,
}

/// One architecture's bytes, owned, plus where they came from.
///
/// For thin files the arch fields are synthesized from the Mach header.
#[derive(Debug, Clone)]
pub struct Slice {
    /// The slice's own bytes, copied out of the enclosing file.
    pub data: Vec<u8>,
    pub cpu_type: u32,
    pub cpu_subtype: u32,
    /// Alignment exponent used when packing into a fat archive.
    pub align: u32,
    /// Absolute offset the slice occupied in the source file (0 for thin).
    pub file_offset: u64,
    pub is_64: bool,
    pub endian: Endian,
}

impl Slice {
    /// Wrap bytes that are a complete Mach-O slice.
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        let (is_64, endian) = detect_magic(&data)?;
        let view = ByteView::new(&data, endian);
        let cpu_type = view.read_u32(4)?;
        let cpu_subtype = view.read_u32(8)?;
        Ok(Slice {
            data,
            cpu_type,
            cpu_subtype,
            align: DEFAULT_FAT_ALIGN,
            file_offset: 0,
            is_64,
            endian,
        })
    }

    fn from_arch(data: Vec<u8>, cpu_type: u32, cpu_subtype: u32, align: u32, file_offset: u64) -> Result<Self> {
        let mut slice = Slice::parse(data)?;
        slice.cpu_type = cpu_type;
        slice.cpu_subtype = cpu_subtype;
        slice.align = align;
        slice.file_offset = file_offset;
        Ok(slice)
    }

    /// View over the slice's bytes in the slice's byte order.
    pub fn view(&self) -> ByteView<'_> {
        ByteView::new(&self.data, self.endian)
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A Mach-O input file: thin or fat, decomposed into slices.
#[derive(Debug)]
pub struct MachFile {
    pub kind: FileKind,
    pub slices: Vec<Slice>,
}

impl MachFile {
    /// Read and parse a file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::parse(&data)
    }

    /// Parse raw bytes into slices.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::Truncated {
                offset: 0,
                needed: 4,
                available: data.len() as u64,
            });
        }
        // fat tables are big-endian no matter what the slices inside are
        let be = ByteView::new(data, Endian::Big);
        let magic = be.read_u32(0)?;
        match magic {
            FAT_MAGIC | FAT_CIGAM => Self::parse_fat(data, false),
            FAT_MAGIC_64 | FAT_CIGAM_64 => Self::parse_fat(data, true),
            _ => {
                // not fat: the Mach magic check happens inside Slice::parse
                let slice = Slice::parse(data.to_vec())?;
                Ok(MachFile {
                    kind: FileKind::Thin,
                    slices: vec![slice],
                })
            }
        }
    }

    fn parse_fat(data: &[u8], wide: bool) -> Result<Self> {
        let be = ByteView::new(data, Endian::Big);
        let header = FatHeader::parse(&be, 0)?;
        if header.nfat_arch == 0 {
            return Err(Error::Truncated {
                offset: FatHeader::SIZE,
                needed: FatArch::SIZE,
                available: 0,
            });
        }

        let entry_size = if wide { FatArch64::SIZE } else { FatArch::SIZE };
        let table_len = u64::from(header.nfat_arch) * entry_size;
        if FatHeader::SIZE + table_len > data.len() as u64 {
            return Err(Error::Truncated {
                offset: FatHeader::SIZE,
                needed: table_len,
                available: data.len() as u64 - FatHeader::SIZE,
            });
        }

        let mut slices = Vec::with_capacity(header.nfat_arch as usize);
        for i in 0..u64::from(header.nfat_arch) {
            let entry_off = FatHeader::SIZE + i * entry_size;
            let (cpu_type, cpu_subtype, offset, size, align) = if wide {
                let a = FatArch64::parse(&be, entry_off)?;
                (a.cpu_type, a.cpu_subtype, a.offset, a.size, a.align)
            } else {
                let a = FatArch::parse(&be, entry_off)?;
                (a.cpu_type, a.cpu_subtype, u64::from(a.offset), u64::from(a.size), a.align)
            };

            let end = offset.checked_add(size).ok_or(Error::Truncated {
                offset,
                needed: size,
                available: data.len() as u64,
            })?;
            if end > data.len() as u64 {
                return Err(Error::Truncated {
                    offset,
                    needed: size,
                    available: data.len() as u64,
                });
            }

            log::debug!(
                "fat slice {}: {} at {:#x} ({} bytes, align 2^{})",
                i,
                cpu_type_name(cpu_type),
                offset,
                size,
                align
            );
            let bytes = data[offset as usize..end as usize].to_vec();
            slices.push(Slice::from_arch(bytes, cpu_type, cpu_subtype, align, offset)?);
        }

        Ok(MachFile {
            kind: FileKind::Fat,
            slices,
        })
    }

    /// Find the slice for a lipo-style architecture name.
    pub fn slice_for_arch(&self, arch: &str) -> Option<&Slice> {
        self.slices
            .iter()
            .find(|s| arch_name(s.cpu_type, s.cpu_subtype) == arch)
    }
}

/// Round `value` up to a multiple of `1 << align`.
fn align_up(value: u64, align: u32) -> u64 {
    let unit = 1u64 << align;
    (value + unit - 1) & !(unit - 1)
}

/// Pack slices into a 32-bit fat archive.
///
/// Slices are placed in order at ascending offsets, each rounded up to its
/// own alignment (2^`slice.align`). The header and arch table are always
/// big-endian.
pub fn pack_fat(slices: &[Slice]) -> Result<Vec<u8>> {
    if slices.is_empty() {
        return Err(Error::UnsupportedEdit("cannot pack an empty fat archive".into()));
    }

    let table_end = FatHeader::SIZE + slices.len() as u64 * FatArch::SIZE;
    let mut placements = Vec::with_capacity(slices.len());
    let mut cursor = table_end;
    for slice in slices {
        let offset = align_up(cursor, slice.align);
        let end = offset + slice.len();
        if end > u64::from(u32::MAX) {
            return Err(Error::UnsupportedEdit(
                "slices exceed the 32-bit fat archive limit".into(),
            ));
        }
        placements.push(offset);
        cursor = end;
    }

    let mut out = vec![0u8; cursor as usize];
    let header = FatHeader {
        magic: FAT_MAGIC,
        nfat_arch: slices.len() as u32,
    };
    out[..FatHeader::SIZE as usize].copy_from_slice(&header.to_bytes(Endian::Big));

    for (i, (slice, &offset)) in slices.iter().zip(&placements).enumerate() {
        let arch = FatArch {
            cpu_type: slice.cpu_type,
            cpu_subtype: slice.cpu_subtype,
            offset: offset as u32,
            size: slice.len() as u32,
            align: slice.align,
        };
        let entry_off = (FatHeader::SIZE + i as u64 * FatArch::SIZE) as usize;
        out[entry_off..entry_off + FatArch::SIZE as usize]
            .copy_from_slice(&arch.to_bytes(Endian::Big));
        out[offset as usize..offset as usize + slice.data.len()].copy_from_slice(&slice.data);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macho::header::MachHeaderRaw;

    fn thin_slice(cpu_type: u32, filler: u8, len: usize) -> Vec<u8> {
        let raw = MachHeaderRaw {
            magic: MH_MAGIC_64,
            cpu_type,
            cpu_subtype: 0,
            filetype: MH_DYLIB,
            ncmds: 0,
            sizeofcmds: 0,
            flags: 0,
        };
        let mut bytes = raw.to_bytes(Endian::Little);
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.resize(len, filler);
        bytes
    }

    #[test]
    fn test_thin_detection() {
        let file = MachFile::parse(&thin_slice(CPU_TYPE_ARM64, 0, 64)).unwrap();
        assert_eq!(file.kind, FileKind::Thin);
        assert_eq!(file.slices.len(), 1);
        assert_eq!(file.slices[0].cpu_type, CPU_TYPE_ARM64);
        assert!(file.slices[0].is_64);
        assert_eq!(file.slices[0].file_offset, 0);
    }

    #[test]
    fn test_bad_magic() {
        assert!(matches!(
            MachFile::parse(&[0u8; 64]),
            Err(Error::BadMagic(0))
        ));
    }

    #[test]
    fn test_pack_then_parse() {
        let mut a = Slice::parse(thin_slice(CPU_TYPE_ARM64, 0xaa, 128)).unwrap();
        let mut b = Slice::parse(thin_slice(CPU_TYPE_X86_64, 0xbb, 256)).unwrap();
        a.align = 4; // keep the fixture small
        b.align = 4;

        let packed = pack_fat(&[a.clone(), b.clone()]).unwrap();
        let file = MachFile::parse(&packed).unwrap();
        assert_eq!(file.kind, FileKind::Fat);
        assert_eq!(file.slices.len(), 2);
        assert_eq!(file.slices[0].cpu_type, CPU_TYPE_ARM64);
        assert_eq!(file.slices[1].cpu_type, CPU_TYPE_X86_64);
        assert_eq!(file.slices[0].data, a.data);
        assert_eq!(file.slices[1].data, b.data);

        // offsets are aligned and strictly ascending
        assert_eq!(file.slices[0].file_offset % 16, 0);
        assert!(file.slices[0].file_offset + file.slices[0].len() <= file.slices[1].file_offset);
    }

    #[test]
    fn test_fat_roundtrip_preserves_bytes() {
        let mut a = Slice::parse(thin_slice(CPU_TYPE_ARM64, 0xcc, 96)).unwrap();
        a.align = 4;
        let packed = pack_fat(&[a]).unwrap();
        let reparsed = MachFile::parse(&packed).unwrap();
        let repacked = pack_fat(&reparsed.slices).unwrap();
        assert_eq!(packed, repacked);
    }

    #[test]
    fn test_zero_arch_fat_rejected() {
        let header = FatHeader {
            magic: FAT_MAGIC,
            nfat_arch: 0,
        };
        let bytes = header.to_bytes(Endian::Big);
        assert!(matches!(
            MachFile::parse(&bytes),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn test_truncated_arch_table() {
        let header = FatHeader {
            magic: FAT_MAGIC,
            nfat_arch: 40,
        };
        let bytes = header.to_bytes(Endian::Big);
        assert!(matches!(
            MachFile::parse(&bytes),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn test_slice_for_arch() {
        let mut a = Slice::parse(thin_slice(CPU_TYPE_ARM64, 0, 64)).unwrap();
        a.align = 4;
        let packed = pack_fat(&[a]).unwrap();
        let file = MachFile::parse(&packed).unwrap();
        assert!(file.slice_for_arch("arm64").is_some());
        assert!(file.slice_for_arch("x86_64").is_none());
    }
}
