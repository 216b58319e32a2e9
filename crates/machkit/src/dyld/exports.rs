//! Export trie walking.
//!
//! Exported symbols live in a prefix trie: each node optionally carries
//! terminal data (the export itself) and a list of labeled edges to child
//! nodes, all offsets ULEB128-encoded relative to the trie start.

use crate::macho::constants::*;
use crate::view::ByteView;
use crate::{Error, Result};
use std::collections::HashSet;

/// A re-exported symbol's source: dylib ordinal plus the name in that
/// image (empty when the name is unchanged).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReExport {
    pub ordinal: u64,
    pub imported_name: String,
}

/// One exported symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    /// Image-relative offset of the symbol (zero for re-exports).
    pub offset: u64,
    pub flags: u64,
    pub reexport: Option<ReExport>,
}

impl Export {
    pub fn is_reexport(&self) -> bool {
        self.flags & EXPORT_SYMBOL_FLAGS_REEXPORT != 0
    }

    pub fn is_weak(&self) -> bool {
        self.flags & EXPORT_SYMBOL_FLAGS_WEAK_DEFINITION != 0
    }
}

/// Walk the export trie in `[off, off + size)` and collect every terminal.
///
/// A child offset that lands on a node already visited in the walk is a
/// cycle and fails with [`Error::ExportTrieCycle`]; a well-formed trie
/// reaches each node exactly once.
pub fn parse_trie(view: &ByteView<'_>, off: u64, size: u64) -> Result<Vec<Export>> {
    let mut exports = Vec::new();
    if size == 0 {
        return Ok(exports);
    }

    let mut visited: HashSet<u64> = HashSet::new();
    // (node offset relative to trie start, accumulated prefix)
    let mut stack: Vec<(u64, String)> = vec![(0, String::new())];

    while let Some((node, prefix)) = stack.pop() {
        if node >= size {
            return Err(Error::Truncated {
                offset: off + node,
                needed: 1,
                available: off + size,
            });
        }
        if !visited.insert(node) {
            return Err(Error::ExportTrieCycle(off + node));
        }

        let mut cursor = off + node;
        let (terminal_size, next) = view.read_uleb128(cursor)?;
        cursor = next;
        let children_at = cursor + terminal_size;

        if terminal_size > 0 {
            let (flags, next) = view.read_uleb128(cursor)?;
            cursor = next;
            let export = if flags & EXPORT_SYMBOL_FLAGS_REEXPORT != 0 {
                let (ordinal, next) = view.read_uleb128(cursor)?;
                cursor = next;
                let imported_name = view.read_cstr(cursor)?;
                Export {
                    name: prefix.clone(),
                    offset: 0,
                    flags,
                    reexport: Some(ReExport {
                        ordinal,
                        imported_name,
                    }),
                }
            } else {
                let (offset, next) = view.read_uleb128(cursor)?;
                cursor = next;
                if flags & EXPORT_SYMBOL_FLAGS_STUB_AND_RESOLVER != 0 {
                    // resolver function offset; recorded address is the stub
                    let (_resolver, _next) = view.read_uleb128(cursor)?;
                }
                Export {
                    name: prefix.clone(),
                    offset,
                    flags,
                    reexport: None,
                }
            };
            log::debug!("export {:?} flags {:#x}", export.name, export.flags);
            exports.push(export);
        }

        cursor = children_at;
        let child_count = view.read_u8(cursor)?;
        cursor += 1;
        for _ in 0..child_count {
            let edge = view.read_cstr(cursor)?;
            cursor += edge.len() as u64 + 1;
            let (child, next) = view.read_uleb128(cursor)?;
            cursor = next;
            let mut label = prefix.clone();
            label.push_str(&edge);
            stack.push((child, label));
        }
    }

    Ok(exports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::Endian;

    /// Hand-assembled trie exporting `_foo` at 0x1000 and `_foobar` at
    /// 0x2000 through a shared `_foo` edge.
    fn sample_trie() -> Vec<u8> {
        let mut t = Vec::new();
        // node 0: no terminal, one child "_foo" -> node 8
        t.extend_from_slice(&[0x00, 0x01]);
        t.extend_from_slice(b"_foo\0");
        t.push(8);
        // node 8: terminal {flags 0, offset 0x1000}, child "bar" -> node 18
        t.extend_from_slice(&[0x03, 0x00, 0x80, 0x20]); // uleb 0x1000 = 80 20
        t.push(0x01);
        t.extend_from_slice(b"bar\0");
        t.push(18);
        // node 18: terminal {flags 0, offset 0x2000}, no children
        t.extend_from_slice(&[0x03, 0x00, 0x80, 0x40, 0x00]);
        t
    }

    #[test]
    fn test_walk() {
        let trie = sample_trie();
        let view = ByteView::new(&trie, Endian::Little);
        let mut exports = parse_trie(&view, 0, trie.len() as u64).unwrap();
        exports.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(exports.len(), 2);
        assert_eq!(exports[0].name, "_foo");
        assert_eq!(exports[0].offset, 0x1000);
        assert_eq!(exports[1].name, "_foobar");
        assert_eq!(exports[1].offset, 0x2000);
    }

    #[test]
    fn test_empty_trie() {
        let view = ByteView::new(&[], Endian::Little);
        assert!(parse_trie(&view, 0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_self_cycle() {
        // root: no terminal, child "a" pointing back at node 0
        let trie = [0x00u8, 0x01, b'a', 0x00, 0x00];
        let view = ByteView::new(&trie, Endian::Little);
        assert!(matches!(
            parse_trie(&view, 0, trie.len() as u64),
            Err(Error::ExportTrieCycle(0))
        ));
    }

    #[test]
    fn test_reexport_terminal() {
        let mut t = Vec::new();
        // root: no terminal, child "_x" -> node 6
        t.extend_from_slice(&[0x00, 0x01]);
        t.extend_from_slice(b"_x\0");
        t.push(6);
        // node 6: terminal {flags REEXPORT, ordinal 2, name "_y"}, no children
        t.extend_from_slice(&[0x05, 0x08, 0x02]);
        t.extend_from_slice(b"_y\0");
        t.push(0x00);
        let view = ByteView::new(&t, Endian::Little);
        let exports = parse_trie(&view, 0, t.len() as u64).unwrap();

        assert_eq!(exports.len(), 1);
        assert!(exports[0].is_reexport());
        assert_eq!(
            exports[0].reexport,
            Some(ReExport {
                ordinal: 2,
                imported_name: "_y".into()
            })
        );
    }

    #[test]
    fn test_child_offset_outside_trie() {
        let trie = [0x00u8, 0x01, b'a', 0x00, 0x7f];
        let view = ByteView::new(&trie, Endian::Little);
        assert!(matches!(
            parse_trie(&view, 0, trie.len() as u64),
            Err(Error::Truncated { .. })
        ));
    }
}
