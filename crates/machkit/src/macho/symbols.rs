//! Symbol table (`LC_SYMTAB`) parsing.

use crate::codec::{layout, RawStruct};
use crate::macho::commands::SymtabCommand;
use crate::macho::constants::{N_EXT, N_STAB};
use crate::view::ByteView;
use crate::Result;

layout! {
    /// `nlist_64`.
    Nlist64 {
        n_strx: u32,
        n_type: u8,
        n_sect: u8,
        n_desc: u16,
        n_value: u64,
    }
}

layout! {
    /// `nlist` (32-bit).
    Nlist32 {
        n_strx: u32,
        n_type: u8,
        n_sect: u8,
        n_desc: u16,
        n_value: u32,
    }
}

/// What a symbol name says it is.
///
/// Objective-C runtime symbols carry their role in the name
/// (`_OBJC_CLASS_$_Foo` and friends); everything else is treated as a
/// plain function/data symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    ObjcClass,
    ObjcMetaclass,
    ObjcIvar,
    Plain,
}

/// One symbol-table entry with its name resolved from the string table.
#[derive(Debug, Clone)]
pub struct Symbol {
    /// Raw name, exactly as the string table spells it.
    pub fullname: String,
    /// Name with any Objective-C `..._$_` prefix stripped.
    pub name: String,
    pub kind: SymbolKind,
    pub n_type: u8,
    pub sect: u8,
    pub desc: u16,
    /// The nlist value field; an address for defined symbols.
    pub addr: u64,
}

impl Symbol {
    pub fn from_name_and_value(fullname: String, n_type: u8, sect: u8, desc: u16, addr: u64) -> Self {
        let (kind, name) = classify(&fullname);
        Symbol {
            fullname,
            name,
            kind,
            n_type,
            sect,
            desc,
            addr,
        }
    }

    /// Whether the external bit is set.
    pub fn external(&self) -> bool {
        self.n_type & N_EXT != 0
    }

    /// Whether this is a debugger (stab) entry.
    pub fn is_stab(&self) -> bool {
        self.n_type & N_STAB != 0
    }
}

fn classify(fullname: &str) -> (SymbolKind, String) {
    for (prefix, kind) in [
        ("_OBJC_CLASS_$_", SymbolKind::ObjcClass),
        ("_OBJC_METACLASS_$_", SymbolKind::ObjcMetaclass),
        ("_OBJC_IVAR_$_", SymbolKind::ObjcIvar),
    ] {
        if let Some(rest) = fullname.strip_prefix(prefix) {
            return (kind, rest.to_string());
        }
    }
    (SymbolKind::Plain, fullname.to_string())
}

/// The parsed symbol table: every nlist entry with its resolved name.
///
/// Empty-name entries are retained; stabs need them.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    pub symbols: Vec<Symbol>,
}

impl SymbolTable {
    /// Read `nsyms` nlist entries and resolve each name through the string
    /// table.
    pub fn parse(view: &ByteView<'_>, cmd: &SymtabCommand, is_64: bool) -> Result<Self> {
        let entry_size = if is_64 { Nlist64::SIZE } else { Nlist32::SIZE };
        let mut symbols = Vec::with_capacity(cmd.nsyms as usize);

        for i in 0..u64::from(cmd.nsyms) {
            let off = u64::from(cmd.symoff) + i * entry_size;
            let (n_strx, n_type, n_sect, n_desc, n_value) = if is_64 {
                let n = Nlist64::parse(view, off)?;
                (n.n_strx, n.n_type, n.n_sect, n.n_desc, n.n_value)
            } else {
                let n = Nlist32::parse(view, off)?;
                (n.n_strx, n.n_type, n.n_sect, n.n_desc, u64::from(n.n_value))
            };

            let fullname = if n_strx == 0 {
                String::new()
            } else {
                let str_off = u64::from(cmd.stroff) + u64::from(n_strx);
                match view.read_cstr(str_off) {
                    Ok(s) => s,
                    Err(e) => {
                        // keep the rest of the table usable
                        log::warn!("symbol {} name unreadable: {}", i, e);
                        String::new()
                    }
                }
            };

            symbols.push(Symbol::from_name_and_value(fullname, n_type, n_sect, n_desc, n_value));
        }

        Ok(SymbolTable { symbols })
    }

    /// Symbols with the external bit set.
    pub fn external(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter().filter(|s| s.external())
    }
}
