//! Interpreter for the dyld bind, weak-bind, and lazy-bind opcode streams.
//!
//! The streams are a tiny bytecode: each byte's high nibble is an opcode,
//! the low nibble an immediate, with ULEB128/SLEB128 operands and C strings
//! following some opcodes. The interpreter is a plain record-and-emit loop
//! over a mutable state struct; actions emitted before any failure remain
//! valid output.

use crate::macho::constants::*;
use crate::macho::segment::Segment;
use crate::view::ByteView;
use crate::Result;

/// One resolved bind: where to write, what symbol, from which image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingAction {
    pub segment_index: u8,
    pub segment_offset: u64,
    pub symbol_name: String,
    /// Positive ordinals index the dylib import list (1-based); zero and
    /// negative values are the `BIND_SPECIAL_DYLIB_*` markers.
    pub dylib_ordinal: i64,
    pub addend: i64,
    pub bind_type: u8,
    pub flags: u8,
    /// Target virtual address, when the segment index resolves.
    pub addr: u64,
}

/// Decoded stream: the actions plus any tail left raw by an unknown opcode.
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    pub actions: Vec<BindingAction>,
    /// Bytes from the first undecodable opcode to the end of the stream,
    /// preserved verbatim. Empty when the stream decoded fully.
    pub trailing: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
struct BindState {
    segment_index: u8,
    segment_offset: u64,
    bind_type: u8,
    dylib_ordinal: i64,
    symbol_name: String,
    addend: i64,
    flags: u8,
}

/// Decode one opcode stream.
///
/// `stream` names the table for log messages (`bind`, `weak-bind`,
/// `lazy-bind`). Truncated operands and unknown opcodes stop decoding but
/// are not fatal: already-emitted actions are returned and the undecoded
/// tail is preserved.
pub fn decode(
    view: &ByteView<'_>,
    off: u64,
    size: u64,
    segments: &[Segment],
    is_64: bool,
    stream: &'static str,
) -> Result<BindingTable> {
    let ptr_size: u64 = if is_64 { 8 } else { 4 };
    let end = off + size;
    let mut table = BindingTable::default();
    let mut state = BindState::default();
    let mut cursor = off;

    macro_rules! operand {
        ($expr:expr) => {
            match $expr {
                Ok(v) => v,
                Err(e) => {
                    log::warn!("{} stream truncated at offset {:#x}: {}", stream, cursor - off, e);
                    table.trailing = view.read_bytes(cursor, end.saturating_sub(cursor))?.to_vec();
                    return Ok(table);
                }
            }
        };
    }

    while cursor < end {
        let byte = view.read_u8(cursor)?;
        let opcode = byte & BIND_OPCODE_MASK;
        let immediate = byte & BIND_IMMEDIATE_MASK;
        cursor += 1;

        match opcode {
            BIND_OPCODE_DONE => {
                // lazy streams separate entries with DONE; state starts
                // fresh for whatever follows
                state = BindState::default();
            }
            BIND_OPCODE_SET_DYLIB_ORDINAL_IMM => {
                state.dylib_ordinal = i64::from(immediate);
            }
            BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB => {
                let (value, next) = operand!(view.read_uleb128(cursor));
                state.dylib_ordinal = value as i64;
                cursor = next;
            }
            BIND_OPCODE_SET_DYLIB_SPECIAL_IMM => {
                state.dylib_ordinal = if immediate == 0 {
                    BIND_SPECIAL_DYLIB_SELF
                } else {
                    // sign-extend the low nibble
                    i64::from((immediate | 0xf0) as i8)
                };
            }
            BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM => {
                state.flags = immediate;
                let name = operand!(view.read_cstr(cursor));
                cursor += name.len() as u64 + 1;
                state.symbol_name = name;
            }
            BIND_OPCODE_SET_TYPE_IMM => {
                state.bind_type = immediate;
            }
            BIND_OPCODE_SET_ADDEND_SLEB => {
                let (value, next) = operand!(view.read_sleb128(cursor));
                state.addend = value;
                cursor = next;
            }
            BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB => {
                state.segment_index = immediate;
                let (value, next) = operand!(view.read_uleb128(cursor));
                state.segment_offset = value;
                cursor = next;
            }
            BIND_OPCODE_ADD_ADDR_ULEB => {
                let (value, next) = operand!(view.read_uleb128(cursor));
                state.segment_offset = state.segment_offset.wrapping_add(value);
                cursor = next;
            }
            BIND_OPCODE_DO_BIND => {
                emit(&mut table, &state, segments, stream);
                state.segment_offset = state.segment_offset.wrapping_add(ptr_size);
            }
            BIND_OPCODE_DO_BIND_ADD_ADDR_ULEB => {
                emit(&mut table, &state, segments, stream);
                let (value, next) = operand!(view.read_uleb128(cursor));
                state.segment_offset = state
                    .segment_offset
                    .wrapping_add(ptr_size)
                    .wrapping_add(value);
                cursor = next;
            }
            BIND_OPCODE_DO_BIND_ADD_ADDR_IMM_SCALED => {
                emit(&mut table, &state, segments, stream);
                state.segment_offset = state
                    .segment_offset
                    .wrapping_add(ptr_size * (1 + u64::from(immediate)));
            }
            BIND_OPCODE_DO_BIND_ULEB_TIMES_SKIPPING_ULEB => {
                let (count, next) = operand!(view.read_uleb128(cursor));
                cursor = next;
                let (skip, next) = operand!(view.read_uleb128(cursor));
                cursor = next;
                for _ in 0..count {
                    emit(&mut table, &state, segments, stream);
                    state.segment_offset = state
                        .segment_offset
                        .wrapping_add(ptr_size)
                        .wrapping_add(skip);
                }
            }
            unknown => {
                log::warn!(
                    "{} stream: unknown opcode {:#04x} at offset {:#x}, keeping raw tail",
                    stream,
                    unknown,
                    cursor - 1 - off
                );
                table.trailing = view
                    .read_bytes(cursor - 1, end.saturating_sub(cursor - 1))?
                    .to_vec();
                return Ok(table);
            }
        }
    }

    Ok(table)
}

fn emit(table: &mut BindingTable, state: &BindState, segments: &[Segment], stream: &str) {
    let addr = match segments.get(usize::from(state.segment_index)) {
        Some(seg) => seg.vmaddr.wrapping_add(state.segment_offset),
        None => {
            // drop this entry only; the stream remains decodable
            log::warn!(
                "{} stream: segment index {} out of range, dropping bind of {:?}",
                stream,
                state.segment_index,
                state.symbol_name
            );
            return;
        }
    };
    table.actions.push(BindingAction {
        segment_index: state.segment_index,
        segment_offset: state.segment_offset,
        symbol_name: state.symbol_name.clone(),
        dylib_ordinal: state.dylib_ordinal,
        addend: state.addend,
        bind_type: state.bind_type,
        flags: state.flags,
        addr,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::Endian;

    fn segments() -> Vec<Segment> {
        let mk = |name: &str, vmaddr: u64| Segment {
            name: name.into(),
            vmaddr,
            vmsize: 0x4000,
            fileoff: vmaddr,
            filesize: 0x4000,
            maxprot: 3,
            initprot: 3,
            flags: 0,
            sections: Vec::new(),
        };
        vec![mk("__TEXT", 0), mk("__DATA_CONST", 0x4000), mk("__DATA", 0x8000)]
    }

    #[test]
    fn test_single_bind() {
        // SET_DYLIB_ORDINAL_IMM 2; SET_SYMBOL "_foo"; SET_SEGMENT 2 off 16;
        // DO_BIND; DONE
        let stream = [
            0x12, 0x40, b'_', b'f', b'o', b'o', 0x00, 0x72, 0x10, 0x90, 0x00,
        ];
        let view = ByteView::new(&stream, Endian::Little);
        let table = decode(&view, 0, stream.len() as u64, &segments(), true, "bind").unwrap();

        assert_eq!(table.actions.len(), 1);
        let action = &table.actions[0];
        assert_eq!(action.segment_index, 2);
        assert_eq!(action.segment_offset, 16);
        assert_eq!(action.symbol_name, "_foo");
        assert_eq!(action.dylib_ordinal, 2);
        assert_eq!(action.addr, 0x8010);
        assert!(table.trailing.is_empty());
    }

    #[test]
    fn test_special_ordinals() {
        for (imm, expected) in [(0u8, 0i64), (0x0f, -1), (0x0e, -2), (0x0d, -3)] {
            let stream = [0x30 | imm, 0x71, 0x00, 0x90];
            let view = ByteView::new(&stream, Endian::Little);
            let table = decode(&view, 0, stream.len() as u64, &segments(), true, "bind").unwrap();
            assert_eq!(table.actions[0].dylib_ordinal, expected, "imm {imm:#x}");
        }
    }

    #[test]
    fn test_bind_times_skipping() {
        // SET_SEGMENT 1 off 0; DO_BIND_ULEB_TIMES_SKIPPING_ULEB count=3 skip=8
        let stream = [0x71, 0x00, 0xc0, 0x03, 0x08];
        let view = ByteView::new(&stream, Endian::Little);
        let table = decode(&view, 0, stream.len() as u64, &segments(), true, "bind").unwrap();

        assert_eq!(table.actions.len(), 3);
        let offsets: Vec<u64> = table.actions.iter().map(|a| a.segment_offset).collect();
        assert_eq!(offsets, vec![0, 16, 32]);
        assert_eq!(table.actions[2].addr, 0x4020);
    }

    #[test]
    fn test_pointer_size_32bit() {
        let stream = [0x71, 0x00, 0x90, 0x90];
        let view = ByteView::new(&stream, Endian::Little);
        let table = decode(&view, 0, stream.len() as u64, &segments(), false, "bind").unwrap();
        assert_eq!(table.actions[1].segment_offset, 4);
    }

    #[test]
    fn test_add_addr_imm_scaled() {
        // DO_BIND_ADD_ADDR_IMM_SCALED 3 advances by ptr * (1 + 3)
        let stream = [0x71, 0x00, 0xb3, 0x90];
        let view = ByteView::new(&stream, Endian::Little);
        let table = decode(&view, 0, stream.len() as u64, &segments(), true, "bind").unwrap();
        assert_eq!(table.actions[1].segment_offset, 32);
    }

    #[test]
    fn test_lazy_reset_between_entries() {
        // entry 1 binds ordinal 1, DONE resets, entry 2 never sets one
        let stream = [
            0x11, 0x40, b'_', b'a', 0x00, 0x71, 0x00, 0x90, 0x00, // entry 1
            0x40, b'_', b'b', 0x00, 0x72, 0x00, 0x90, 0x00, // entry 2
        ];
        let view = ByteView::new(&stream, Endian::Little);
        let table = decode(&view, 0, stream.len() as u64, &segments(), true, "lazy-bind").unwrap();

        assert_eq!(table.actions.len(), 2);
        assert_eq!(table.actions[0].dylib_ordinal, 1);
        assert_eq!(table.actions[1].dylib_ordinal, 0);
        assert_eq!(table.actions[1].symbol_name, "_b");
    }

    #[test]
    fn test_unknown_opcode_preserves_tail() {
        let stream = [0x71, 0x00, 0x90, 0xd0, 0xaa, 0xbb];
        let view = ByteView::new(&stream, Endian::Little);
        let table = decode(&view, 0, stream.len() as u64, &segments(), true, "bind").unwrap();

        assert_eq!(table.actions.len(), 1);
        assert_eq!(table.trailing, vec![0xd0, 0xaa, 0xbb]);
    }

    #[test]
    fn test_invalid_segment_dropped() {
        // segment 9 does not exist; entry dropped, later entry survives
        let stream = [0x79, 0x00, 0x90, 0x71, 0x00, 0x90];
        let view = ByteView::new(&stream, Endian::Little);
        let table = decode(&view, 0, stream.len() as u64, &segments(), true, "bind").unwrap();
        assert_eq!(table.actions.len(), 1);
        assert_eq!(table.actions[0].segment_index, 1);
    }

    #[test]
    fn test_addend_sleb() {
        let stream = [0x60, 0x7e, 0x71, 0x00, 0x90]; // addend = -2
        let view = ByteView::new(&stream, Endian::Little);
        let table = decode(&view, 0, stream.len() as u64, &segments(), true, "bind").unwrap();
        assert_eq!(table.actions[0].addend, -2);
    }
}
