//! Text-based stub (TBD) generation.
//!
//! Emits the tapi-tbd-v2 flavor of the format: enough for a linker to
//! resolve against the library without shipping its code. Output is
//! canonical, with every list sorted, so regenerating a stub from the same
//! binary is byte-stable.

use crate::dyld::{Library, OsVersion};
use crate::macho::constants::{arch_name, platform_name, LC_REEXPORT_DYLIB};
use crate::objc::ObjCMetadata;

fn render_version(packed: u32) -> String {
    OsVersion::from_packed(packed).to_string()
}

fn render_list(key: &str, items: &[String], indent: &str) -> String {
    if items.is_empty() {
        return String::new();
    }
    format!("{}{}[ {} ]\n", indent, pad_key(key), items.join(", "))
}

fn pad_key(key: &str) -> String {
    let labeled = format!("{}:", key);
    if labeled.len() >= 17 {
        format!("{} ", labeled)
    } else {
        format!("{:<17}", labeled)
    }
}

/// Render the TBD stub for a parsed library.
///
/// Plain symbols come from the export trie; Objective-C classes and ivars
/// are listed separately, and re-exported dylibs go under `re-exports`.
pub fn emit_tbd(lib: &Library, objc: &ObjCMetadata) -> String {
    let arch = arch_name(lib.slice.cpu_type, lib.slice.cpu_subtype).to_string();

    let mut symbols = Vec::new();
    let mut objc_classes = Vec::new();
    let mut objc_ivars = Vec::new();
    for export in &lib.exports {
        if export.is_reexport() {
            continue;
        }
        if let Some(class) = export.name.strip_prefix("_OBJC_CLASS_$_") {
            objc_classes.push(format!("_{}", class));
        } else if let Some(ivar) = export.name.strip_prefix("_OBJC_IVAR_$_") {
            objc_ivars.push(format!("_{}", ivar));
        } else if export.name.starts_with("_OBJC_METACLASS_$_") {
            // implied by the class entry
        } else {
            symbols.push(export.name.clone());
        }
    }
    // the class list also names classes that export no symbol
    for class in &objc.classes {
        let entry = format!("_{}", class.name);
        if !objc_classes.contains(&entry) {
            objc_classes.push(entry);
        }
    }

    let mut reexports: Vec<String> = lib
        .load_commands
        .iter()
        .filter(|lc| lc.cmd == LC_REEXPORT_DYLIB)
        .filter_map(|lc| match &lc.payload {
            crate::macho::commands::Payload::Dylib { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect();

    symbols.sort();
    symbols.dedup();
    objc_classes.sort();
    objc_classes.dedup();
    objc_ivars.sort();
    objc_ivars.dedup();
    reexports.sort();

    let install_name = lib
        .id
        .as_ref()
        .map(|id| id.install_name.clone())
        .unwrap_or_default();
    let (current, compat) = lib
        .id
        .as_ref()
        .map(|id| (id.current_version, id.compat_version))
        .unwrap_or((0x0001_0000, 0x0001_0000));

    let mut out = String::new();
    out.push_str("--- !tapi-tbd-v2\n");
    out.push_str(&format!("{}[ {} ]\n", pad_key("archs"), arch));
    out.push_str(&format!(
        "{}{}\n",
        pad_key("platform"),
        platform_name(lib.platform)
    ));
    out.push_str(&format!("{}{}\n", pad_key("install-name"), install_name));
    out.push_str(&format!(
        "{}{}\n",
        pad_key("current-version"),
        render_version(current)
    ));
    out.push_str(&format!(
        "{}{}\n",
        pad_key("compatibility-version"),
        render_version(compat)
    ));
    out.push_str("exports:\n");
    out.push_str(&format!("  - {}[ {} ]\n", pad_key("archs"), arch));
    out.push_str(&render_list("symbols", &symbols, "    "));
    out.push_str(&render_list("objc-classes", &objc_classes, "    "));
    out.push_str(&render_list("objc-ivars", &objc_ivars, "    "));
    out.push_str(&render_list("re-exports", &reexports, "    "));
    out.push_str("...\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_render() {
        assert_eq!(render_version(0x0001_0000), "1.0.0");
        assert_eq!(render_version(0x040a_0203), "1034.2.3");
    }

    #[test]
    fn test_list_render() {
        assert_eq!(
            render_list("symbols", &["_a".into(), "_b".into()], "    "),
            format!("    {}[ _a, _b ]\n", pad_key("symbols"))
        );
        assert_eq!(render_list("symbols", &[], "    "), "");
    }
}
