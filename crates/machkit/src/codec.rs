//! Declarative fixed-layout struct decoding and encoding.
//!
//! On-disk Mach-O records are flat sequences of fixed-width fields. The
//! [`layout!`] macro declares a record once — field names, widths, and order —
//! and derives both directions from that single description, so a structure
//! read from bytes and written back is bit-identical.

use crate::view::{ByteView, Endian};
use crate::Result;

/// A primitive field within a [`RawStruct`] layout.
pub trait Prim: Sized + Copy {
    /// Width of the field on disk, in bytes.
    const WIDTH: u64;

    /// Read the field at `*cursor`, advancing the cursor past it.
    fn read(view: &ByteView<'_>, cursor: &mut u64) -> Result<Self>;

    /// Append the field's on-disk form to `buf`.
    fn write(self, buf: &mut Vec<u8>, endian: Endian);
}

impl Prim for u8 {
    const WIDTH: u64 = 1;

    fn read(view: &ByteView<'_>, cursor: &mut u64) -> Result<Self> {
        let v = view.read_u8(*cursor)?;
        *cursor += 1;
        Ok(v)
    }

    fn write(self, buf: &mut Vec<u8>, _endian: Endian) {
        buf.push(self);
    }
}

impl Prim for u16 {
    const WIDTH: u64 = 2;

    fn read(view: &ByteView<'_>, cursor: &mut u64) -> Result<Self> {
        let v = view.read_u16(*cursor)?;
        *cursor += 2;
        Ok(v)
    }

    fn write(self, buf: &mut Vec<u8>, endian: Endian) {
        match endian {
            Endian::Little => buf.extend_from_slice(&self.to_le_bytes()),
            Endian::Big => buf.extend_from_slice(&self.to_be_bytes()),
        }
    }
}

impl Prim for u32 {
    const WIDTH: u64 = 4;

    fn read(view: &ByteView<'_>, cursor: &mut u64) -> Result<Self> {
        let v = view.read_u32(*cursor)?;
        *cursor += 4;
        Ok(v)
    }

    fn write(self, buf: &mut Vec<u8>, endian: Endian) {
        match endian {
            Endian::Little => buf.extend_from_slice(&self.to_le_bytes()),
            Endian::Big => buf.extend_from_slice(&self.to_be_bytes()),
        }
    }
}

impl Prim for u64 {
    const WIDTH: u64 = 8;

    fn read(view: &ByteView<'_>, cursor: &mut u64) -> Result<Self> {
        let v = view.read_u64(*cursor)?;
        *cursor += 8;
        Ok(v)
    }

    fn write(self, buf: &mut Vec<u8>, endian: Endian) {
        match endian {
            Endian::Little => buf.extend_from_slice(&self.to_le_bytes()),
            Endian::Big => buf.extend_from_slice(&self.to_be_bytes()),
        }
    }
}

/// Fixed-width byte fields (segment names, UUIDs) pass through untouched.
impl Prim for [u8; 16] {
    const WIDTH: u64 = 16;

    fn read(view: &ByteView<'_>, cursor: &mut u64) -> Result<Self> {
        let raw: [u8; 16] = view.read_bytes(*cursor, 16)?.try_into().unwrap();
        *cursor += 16;
        Ok(raw)
    }

    fn write(self, buf: &mut Vec<u8>, _endian: Endian) {
        buf.extend_from_slice(&self);
    }
}

/// A record with a fixed on-disk layout, readable and writable through the
/// same field schema.
pub trait RawStruct: Sized {
    /// Total on-disk size in bytes.
    const SIZE: u64;

    /// Decode the record at `off` within `view`.
    fn parse(view: &ByteView<'_>, off: u64) -> Result<Self>;

    /// Append the record's on-disk form to `buf`.
    fn assemble(&self, buf: &mut Vec<u8>, endian: Endian);

    /// Encode the record into a fresh buffer.
    fn to_bytes(&self, endian: Endian) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE as usize);
        self.assemble(&mut buf, endian);
        buf
    }
}

/// Declare a fixed-layout record.
///
/// Field order is the on-disk order; widths come from the field types
/// ([`Prim`] impls). Both [`RawStruct::parse`] and [`RawStruct::assemble`]
/// are generated from the one field list.
macro_rules! layout {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* $field:ident: $ty:ty),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name {
            $($(#[$fmeta])* pub $field: $ty,)+
        }

        impl $crate::codec::RawStruct for $name {
            const SIZE: u64 = 0 $(+ <$ty as $crate::codec::Prim>::WIDTH)+;

            fn parse(
                view: &$crate::view::ByteView<'_>,
                off: u64,
            ) -> $crate::Result<Self> {
                let mut cursor = off;
                $(let $field = <$ty as $crate::codec::Prim>::read(view, &mut cursor)?;)+
                Ok(Self { $($field,)+ })
            }

            fn assemble(&self, buf: &mut Vec<u8>, endian: $crate::view::Endian) {
                $(<$ty as $crate::codec::Prim>::write(self.$field, buf, endian);)+
            }
        }
    };
}

pub(crate) use layout;

#[cfg(test)]
mod tests {
    use super::*;

    layout! {
        Sample {
            magic: u32,
            count: u32,
            base: u64,
            tag: u8,
            kind: u8,
            extra: u16,
            name: [u8; 16],
        }
    }

    #[test]
    fn test_size_from_schema() {
        assert_eq!(Sample::SIZE, 4 + 4 + 8 + 1 + 1 + 2 + 16);
    }

    #[test]
    fn test_parse_assemble_roundtrip() {
        let mut name = [0u8; 16];
        name[..6].copy_from_slice(b"__TEXT");
        let sample = Sample {
            magic: 0xfeedfacf,
            count: 3,
            base: 0x1_0000_0000,
            tag: 0x1d,
            kind: 2,
            extra: 0xbeef,
            name,
        };
        for endian in [Endian::Little, Endian::Big] {
            let bytes = sample.to_bytes(endian);
            assert_eq!(bytes.len() as u64, Sample::SIZE);
            let view = ByteView::new(&bytes, endian);
            let parsed = Sample::parse(&view, 0).unwrap();
            assert_eq!(parsed, sample);
        }
    }

    #[test]
    fn test_parse_truncated() {
        let bytes = vec![0u8; Sample::SIZE as usize - 1];
        let view = ByteView::new(&bytes, Endian::Little);
        assert!(Sample::parse(&view, 0).is_err());
    }
}
