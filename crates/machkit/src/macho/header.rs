//! Mach header parsing and load-command iteration.

use crate::codec::{layout, RawStruct};
use crate::macho::commands::LoadCommand;
use crate::macho::constants::*;
use crate::view::{ByteView, Endian};
use crate::{Error, Result};

layout! {
    /// The fields shared by `mach_header` and `mach_header_64`; the 64-bit
    /// header appends a reserved `u32`.
    MachHeaderRaw {
        magic: u32,
        cpu_type: u32,
        cpu_subtype: u32,
        filetype: u32,
        ncmds: u32,
        sizeofcmds: u32,
        flags: u32,
    }
}

/// Parsed `mach_header[_64]` with the bitness and byte order the magic
/// implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachHeader {
    pub magic: u32,
    pub cpu_type: u32,
    pub cpu_subtype: u32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
    pub is_64: bool,
    pub endian: Endian,
}

/// Classify the first four bytes of a slice.
///
/// Returns `(is_64, endian)`. The magic is read little-endian: a value of
/// `MH_CIGAM[_64]` therefore means the file's own integers are big-endian.
pub fn detect_magic(bytes: &[u8]) -> Result<(bool, Endian)> {
    if bytes.len() < 4 {
        return Err(Error::Truncated {
            offset: 0,
            needed: 4,
            available: bytes.len() as u64,
        });
    }
    let magic = u32::from_le_bytes(bytes[..4].try_into().unwrap());
    match magic {
        MH_MAGIC => Ok((false, Endian::Little)),
        MH_MAGIC_64 => Ok((true, Endian::Little)),
        MH_CIGAM => Ok((false, Endian::Big)),
        MH_CIGAM_64 => Ok((true, Endian::Big)),
        other => Err(Error::BadMagic(other)),
    }
}

impl MachHeader {
    /// Size of the header on disk: 32 bytes for 64-bit files, 28 for 32-bit.
    pub fn size(&self) -> u64 {
        if self.is_64 {
            32
        } else {
            28
        }
    }

    /// Parse the header at the start of a slice already classified by
    /// [`detect_magic`] (so `view` carries the right endianness).
    pub fn parse(view: &ByteView<'_>, is_64: bool) -> Result<Self> {
        let raw = MachHeaderRaw::parse(view, 0)?;
        if is_64 {
            // consume the reserved field so truncation is caught here,
            // not at the first load command
            view.read_u32(MachHeaderRaw::SIZE)?;
        }
        Ok(MachHeader {
            magic: raw.magic,
            cpu_type: raw.cpu_type,
            cpu_subtype: raw.cpu_subtype,
            filetype: raw.filetype,
            ncmds: raw.ncmds,
            sizeofcmds: raw.sizeofcmds,
            flags: raw.flags,
            is_64,
            endian: view.endian(),
        })
    }

    /// Names of the header flag bits that are set.
    pub fn flag_names(&self) -> Vec<&'static str> {
        MH_FLAG_NAMES
            .iter()
            .filter(|(_, bit)| self.flags & bit != 0)
            .map(|(name, _)| *name)
            .collect()
    }
}

/// Iterate the `ncmds` load commands that follow the header.
///
/// Every command must advance by its declared `cmdsize`, stay within the
/// `sizeofcmds` region, and the sizes must sum exactly to `sizeofcmds`.
pub fn parse_load_commands(view: &ByteView<'_>, header: &MachHeader) -> Result<Vec<LoadCommand>> {
    let region_start = header.size();
    let region_end = region_start + u64::from(header.sizeofcmds);
    if region_end > view.len() {
        return Err(Error::Truncated {
            offset: region_start,
            needed: u64::from(header.sizeofcmds),
            available: view.len(),
        });
    }

    let mut commands = Vec::with_capacity(header.ncmds as usize);
    let mut cursor = region_start;
    for index in 0..header.ncmds {
        if cursor + 8 > region_end {
            return Err(Error::MalformedLoadCommands(format!(
                "command {} begins past the end of the region",
                index
            )));
        }
        let cmdsize = view.read_u32(cursor + 4)?;
        if cmdsize == 0 {
            // a zero-size command would never advance the cursor
            return Err(Error::MalformedLoadCommands(format!(
                "command {} has cmdsize 0",
                index
            )));
        }
        if cursor + u64::from(cmdsize) > region_end {
            return Err(Error::MalformedLoadCommands(format!(
                "command {} overruns the region by {} bytes",
                index,
                cursor + u64::from(cmdsize) - region_end
            )));
        }
        let lc = LoadCommand::parse(view, cursor, header.is_64)?;
        log::debug!("load command {}: {} ({} bytes)", index, lc_name(lc.cmd), cmdsize);
        cursor += u64::from(cmdsize);
        commands.push(lc);
    }

    if cursor != region_end {
        return Err(Error::MalformedLoadCommands(format!(
            "commands cover {} bytes but sizeofcmds is {}",
            cursor - region_start,
            header.sizeofcmds
        )));
    }

    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macho::commands::UuidCommand;

    fn header_bytes(ncmds: u32, sizeofcmds: u32) -> Vec<u8> {
        let raw = MachHeaderRaw {
            magic: MH_MAGIC_64,
            cpu_type: CPU_TYPE_ARM64,
            cpu_subtype: 0,
            filetype: MH_DYLIB,
            ncmds,
            sizeofcmds,
            flags: 0x0010_0085,
        };
        let mut bytes = raw.to_bytes(Endian::Little);
        bytes.extend_from_slice(&0u32.to_le_bytes()); // reserved
        bytes
    }

    #[test]
    fn test_detect_magic() {
        assert_eq!(
            detect_magic(&MH_MAGIC_64.to_le_bytes()).unwrap(),
            (true, Endian::Little)
        );
        assert_eq!(
            detect_magic(&MH_MAGIC_64.to_be_bytes()).unwrap(),
            (true, Endian::Big)
        );
        assert_eq!(
            detect_magic(&MH_MAGIC.to_le_bytes()).unwrap(),
            (false, Endian::Little)
        );
        assert!(matches!(
            detect_magic(&[0x7f, b'E', b'L', b'F']),
            Err(Error::BadMagic(_))
        ));
    }

    #[test]
    fn test_parse_header() {
        let bytes = header_bytes(2, 100);
        let view = ByteView::new(&bytes, Endian::Little);
        let header = MachHeader::parse(&view, true).unwrap();
        assert_eq!(header.cpu_type, CPU_TYPE_ARM64);
        assert_eq!(header.filetype, MH_DYLIB);
        assert_eq!(header.ncmds, 2);
        assert_eq!(header.size(), 32);
        assert!(header.flag_names().contains(&"TWOLEVEL"));
        assert!(header.flag_names().contains(&"PIE"));
    }

    #[test]
    fn test_load_command_walk() {
        let uuid = UuidCommand {
            cmd: LC_UUID,
            cmdsize: UuidCommand::SIZE as u32,
            uuid: [7; 16],
        };
        let mut bytes = header_bytes(2, 2 * UuidCommand::SIZE as u32);
        bytes.extend_from_slice(&uuid.to_bytes(Endian::Little));
        bytes.extend_from_slice(&uuid.to_bytes(Endian::Little));

        let view = ByteView::new(&bytes, Endian::Little);
        let header = MachHeader::parse(&view, true).unwrap();
        let commands = parse_load_commands(&view, &header).unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].offset, 32);
        assert_eq!(commands[1].offset, 32 + UuidCommand::SIZE);
        let total: u32 = commands.iter().map(|c| c.cmdsize).sum();
        assert_eq!(total, header.sizeofcmds);
    }

    #[test]
    fn test_zero_cmdsize_rejected() {
        let mut bytes = header_bytes(1, 8);
        bytes.extend_from_slice(&LC_UUID.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());

        let view = ByteView::new(&bytes, Endian::Little);
        let header = MachHeader::parse(&view, true).unwrap();
        assert!(matches!(
            parse_load_commands(&view, &header),
            Err(Error::MalformedLoadCommands(_))
        ));
    }

    #[test]
    fn test_sum_mismatch_rejected() {
        // sizeofcmds larger than the one command it holds
        let uuid = UuidCommand {
            cmd: LC_UUID,
            cmdsize: UuidCommand::SIZE as u32,
            uuid: [0; 16],
        };
        let mut bytes = header_bytes(1, UuidCommand::SIZE as u32 + 8);
        bytes.extend_from_slice(&uuid.to_bytes(Endian::Little));
        bytes.extend_from_slice(&[0u8; 8]);

        let view = ByteView::new(&bytes, Endian::Little);
        let header = MachHeader::parse(&view, true).unwrap();
        assert!(matches!(
            parse_load_commands(&view, &header),
            Err(Error::MalformedLoadCommands(_))
        ));
    }
}
