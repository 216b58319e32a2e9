//! Bounds-checked views over raw slice bytes.
//!
//! Every read the parsers perform goes through [`ByteView`], which pairs a
//! borrowed byte range with the byte order fixed at slice construction.
//! Out-of-range accesses surface as [`Error::Truncated`] instead of panics,
//! so a hostile or cut-off input can never take the process down.

use crate::{Error, Result};

/// Byte order of a slice, decided once from its magic number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Decode a `u32` from exactly four bytes.
    pub fn u32_from(self, bytes: [u8; 4]) -> u32 {
        match self {
            Endian::Little => u32::from_le_bytes(bytes),
            Endian::Big => u32::from_be_bytes(bytes),
        }
    }

    /// Encode a `u32` into four bytes.
    pub fn u32_to(self, value: u32) -> [u8; 4] {
        match self {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        }
    }
}

/// A non-owning window into the bytes of one slice.
///
/// The window does not own its bytes; the enclosing slice or library does,
/// and the view lives no longer than it. All multi-byte reads honor the
/// view's [`Endian`].
#[derive(Debug, Clone, Copy)]
pub struct ByteView<'a> {
    data: &'a [u8],
    endian: Endian,
}

impl<'a> ByteView<'a> {
    pub fn new(data: &'a [u8], endian: Endian) -> Self {
        Self { data, endian }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Borrow `n` bytes starting at `off`.
    pub fn read_bytes(&self, off: u64, n: u64) -> Result<&'a [u8]> {
        let end = off.checked_add(n).ok_or(Error::Truncated {
            offset: off,
            needed: n,
            available: self.len(),
        })?;
        if end > self.len() {
            return Err(Error::Truncated {
                offset: off,
                needed: n,
                available: self.len(),
            });
        }
        Ok(&self.data[off as usize..end as usize])
    }

    pub fn read_u8(&self, off: u64) -> Result<u8> {
        Ok(self.read_bytes(off, 1)?[0])
    }

    pub fn read_u16(&self, off: u64) -> Result<u16> {
        let b: [u8; 2] = self.read_bytes(off, 2)?.try_into().unwrap();
        Ok(match self.endian {
            Endian::Little => u16::from_le_bytes(b),
            Endian::Big => u16::from_be_bytes(b),
        })
    }

    pub fn read_u32(&self, off: u64) -> Result<u32> {
        let b: [u8; 4] = self.read_bytes(off, 4)?.try_into().unwrap();
        Ok(self.endian.u32_from(b))
    }

    pub fn read_u64(&self, off: u64) -> Result<u64> {
        let b: [u8; 8] = self.read_bytes(off, 8)?.try_into().unwrap();
        Ok(match self.endian {
            Endian::Little => u64::from_le_bytes(b),
            Endian::Big => u64::from_be_bytes(b),
        })
    }

    /// Read a NUL-terminated C string starting at `off`.
    ///
    /// The terminator must appear before the end of the view. Invalid UTF-8
    /// is replaced rather than rejected; strings inside binaries are not
    /// always clean.
    pub fn read_cstr(&self, off: u64) -> Result<String> {
        if off >= self.len() {
            return Err(Error::Truncated {
                offset: off,
                needed: 1,
                available: self.len(),
            });
        }
        let tail = &self.data[off as usize..];
        let nul = tail.iter().position(|&b| b == 0).ok_or(Error::Truncated {
            offset: off,
            needed: tail.len() as u64 + 1,
            available: self.len(),
        })?;
        Ok(String::from_utf8_lossy(&tail[..nul]).into_owned())
    }

    /// Read a fixed-width name field (e.g. a 16-byte segment name),
    /// trimming trailing NUL padding.
    pub fn read_fixed_str(&self, off: u64, width: u64) -> Result<String> {
        let raw = self.read_bytes(off, width)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// Decode a ULEB128 value; returns the value and the offset just past it.
    pub fn read_uleb128(&self, off: u64) -> Result<(u64, u64)> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        let mut cursor = off;
        loop {
            let byte = self.read_u8(cursor)?;
            cursor += 1;
            if shift >= 64 {
                return Err(Error::Truncated {
                    offset: off,
                    needed: cursor - off,
                    available: self.len(),
                });
            }
            value |= u64::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
        }
        Ok((value, cursor))
    }

    /// Decode a SLEB128 value; returns the value and the offset just past it.
    pub fn read_sleb128(&self, off: u64) -> Result<(i64, u64)> {
        let mut value: i64 = 0;
        let mut shift = 0u32;
        let mut cursor = off;
        loop {
            let byte = self.read_u8(cursor)?;
            cursor += 1;
            if shift >= 64 {
                return Err(Error::Truncated {
                    offset: off,
                    needed: cursor - off,
                    available: self.len(),
                });
            }
            value |= i64::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    value |= -1i64 << shift;
                }
                break;
            }
        }
        Ok((value, cursor))
    }
}

/// Trim a fixed-width name field already pulled out of a struct.
pub fn name_from_padded(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
