//! Walking the fixture's Objective-C metadata and rendering headers and
//! TBD stubs from it.

mod common;

use common::{build_sample_dylib, INSTALL_NAME, TEXT_VMADDR};
use machkit::gen::{emit_tbd, HeaderEmitter};
use machkit::macho::fat::MachFile;
use machkit::{objc, Library};

fn parse_fixture() -> Library {
    let file = MachFile::parse(&build_sample_dylib()).unwrap();
    Library::parse(file.slices.into_iter().next().unwrap()).unwrap()
}

#[test]
fn class_walk() {
    let lib = parse_fixture();
    let meta = objc::read(&lib).unwrap();
    assert_eq!(meta.classes.len(), 1);
    let class = &meta.classes[0];

    assert_eq!(class.name, "Foo");
    // the superclass pointer is bound from Foundation, not local
    assert_eq!(class.super_name.as_deref(), Some("NSObject"));
    assert_eq!(class.instance_size, 16);

    assert_eq!(class.methods.len(), 1);
    assert_eq!(class.methods[0].selector, "bar");
    assert_eq!(class.methods[0].encoding, "v16@0:8");
    assert_eq!(class.methods[0].imp, TEXT_VMADDR + 0x800);

    assert_eq!(class.class_methods.len(), 1);
    assert_eq!(class.class_methods[0].selector, "shared");

    assert_eq!(class.ivars.len(), 1);
    assert_eq!(class.ivars[0].name, "_name");
    assert_eq!(class.ivars[0].encoding, "@\"NSString\"");
    assert_eq!(class.ivars[0].offset, 8);

    assert_eq!(class.properties.len(), 1);
    assert_eq!(class.properties[0].name, "name");
}

#[test]
fn header_emission() {
    let lib = parse_fixture();
    let meta = objc::read(&lib).unwrap();
    let header = HeaderEmitter::new().class_header(&meta.classes[0]);

    assert!(header.starts_with("@interface Foo : NSObject\n"));
    assert!(header.contains("    NSString *_name;\n"));
    assert!(header.contains("- (void)bar;\n"));
    assert!(header.contains("+ (id)shared;\n"));
    assert!(header.contains("@property (nonatomic, readonly) NSString *name;\n"));
    assert!(header.ends_with("@end\n"));

    // unsorted order: the instance method precedes the property
    assert!(header.find("- (void)bar;").unwrap() < header.find("@property").unwrap());
}

#[test]
fn headers_write_to_directory() {
    let lib = parse_fixture();
    let meta = objc::read(&lib).unwrap();
    let dir = tempfile::tempdir().unwrap();

    for (name, text) in HeaderEmitter::new().sorted(true).library_headers(&meta) {
        std::fs::write(dir.path().join(&name), text).unwrap();
    }
    let written = std::fs::read_to_string(dir.path().join("Foo.h")).unwrap();
    assert!(written.contains("@interface Foo : NSObject"));
}

#[test]
fn tbd_emission() {
    let lib = parse_fixture();
    let meta = objc::read(&lib).unwrap();
    let tbd = emit_tbd(&lib, &meta);

    assert!(tbd.starts_with("--- !tapi-tbd-v2\n"));
    assert!(tbd.contains("[ arm64 ]"));
    assert!(tbd.contains(&format!("{:<17}macosx\n", "platform:")));
    assert!(tbd.contains(&format!("{:<17}{}\n", "install-name:", INSTALL_NAME)));
    assert!(tbd.contains(&format!("{:<17}1.0.0\n", "current-version:")));
    assert!(tbd.contains("compatibility-version: 1.0.0\n"));
    assert!(tbd.contains("[ _bar ]"));
    assert!(tbd.contains("[ _Foo ]"));
    assert!(tbd.ends_with("...\n"));

    // canonical: emitting twice is byte-identical
    assert_eq!(tbd, emit_tbd(&lib, &meta));
}
