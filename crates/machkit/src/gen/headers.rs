//! Objective-C header reconstruction.
//!
//! Renders the model produced by [`crate::objc`] back into `@interface` /
//! `@protocol` source text. Declaration order follows the binary unless
//! sorted output is requested, in which case methods order by signature
//! and properties by name.

use crate::objc::encoding::{decode_type, method_declaration, property_declaration};
use crate::objc::{Method, ObjCCategory, ObjCClass, ObjCMetadata, ObjCProtocol, Property};

/// Renders header text from Objective-C metadata.
#[derive(Debug, Clone, Default)]
pub struct HeaderEmitter {
    sorted: bool,
}

impl HeaderEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sort declarations instead of keeping binary order.
    pub fn sorted(mut self, sorted: bool) -> Self {
        self.sorted = sorted;
        self
    }

    fn methods(&self, methods: &[Method], class_method: bool) -> Vec<String> {
        let mut decls: Vec<String> = methods
            .iter()
            .map(|m| method_declaration(&m.selector, &m.encoding, class_method))
            .collect();
        if self.sorted {
            decls.sort();
        }
        decls
    }

    fn properties(&self, properties: &[Property]) -> Vec<String> {
        let mut props: Vec<&Property> = properties.iter().collect();
        if self.sorted {
            props.sort_by(|a, b| a.name.cmp(&b.name));
        }
        props
            .iter()
            .map(|p| property_declaration(&p.name, &p.attributes))
            .collect()
    }

    /// Render one class as a complete `@interface` block.
    pub fn class_header(&self, class: &ObjCClass) -> String {
        let mut out = String::new();
        out.push_str(&format!("@interface {}", class.name));
        if let Some(superclass) = &class.super_name {
            out.push_str(&format!(" : {}", superclass));
        }
        if !class.protocols.is_empty() {
            out.push_str(&format!(" <{}>", class.protocols.join(", ")));
        }
        out.push('\n');

        if !class.ivars.is_empty() {
            out.push_str("{\n");
            for ivar in &class.ivars {
                let decl = decode_type(&ivar.encoding);
                out.push_str(&format!("    {};\n", decl.declare(&ivar.name)));
            }
            out.push_str("}\n");
        }

        for decl in self.methods(&class.methods, false) {
            out.push_str(&decl);
            out.push('\n');
        }
        for decl in self.methods(&class.class_methods, true) {
            out.push_str(&decl);
            out.push('\n');
        }
        for decl in self.properties(&class.properties) {
            out.push_str(&decl);
            out.push('\n');
        }

        out.push_str("@end\n");
        out
    }

    /// Render one protocol as a complete `@protocol` block.
    pub fn protocol_header(&self, proto: &ObjCProtocol) -> String {
        let mut out = String::new();
        out.push_str(&format!("@protocol {}", proto.name));
        if !proto.protocols.is_empty() {
            out.push_str(&format!(" <{}>", proto.protocols.join(", ")));
        }
        out.push('\n');

        for decl in self.methods(&proto.methods, false) {
            out.push_str(&decl);
            out.push('\n');
        }
        for decl in self.methods(&proto.class_methods, true) {
            out.push_str(&decl);
            out.push('\n');
        }
        for decl in self.properties(&proto.properties) {
            out.push_str(&decl);
            out.push('\n');
        }

        if !proto.opt_methods.is_empty() {
            out.push_str("@optional\n");
            for decl in self.methods(&proto.opt_methods, false) {
                out.push_str(&decl);
                out.push('\n');
            }
        }

        out.push_str("@end\n");
        out
    }

    /// Render one category as an `@interface Class (Name)` block.
    pub fn category_header(&self, category: &ObjCCategory) -> String {
        let class_name = if category.class_name.is_empty() {
            "NSObject"
        } else {
            &category.class_name
        };
        let mut out = String::new();
        out.push_str(&format!("@interface {} ({})\n", class_name, category.name));
        for decl in self.methods(&category.methods, false) {
            out.push_str(&decl);
            out.push('\n');
        }
        for decl in self.methods(&category.class_methods, true) {
            out.push_str(&decl);
            out.push('\n');
        }
        for decl in self.properties(&category.properties) {
            out.push_str(&decl);
            out.push('\n');
        }
        out.push_str("@end\n");
        out
    }

    /// Render every class, protocol, and category to `(file name, text)`
    /// pairs, the way a dump-to-directory expects them.
    pub fn library_headers(&self, meta: &ObjCMetadata) -> Vec<(String, String)> {
        let mut files = Vec::new();
        for class in &meta.classes {
            files.push((format!("{}.h", class.name), self.class_header(class)));
        }
        for proto in &meta.protocols {
            files.push((
                format!("{}-Protocol.h", proto.name),
                self.protocol_header(proto),
            ));
        }
        for category in &meta.categories {
            let class_name = if category.class_name.is_empty() {
                "NSObject"
            } else {
                &category.class_name
            };
            files.push((
                format!("{}+{}.h", class_name, category.name),
                self.category_header(category),
            ));
        }
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objc::Ivar;

    fn sample_class() -> ObjCClass {
        ObjCClass {
            name: "Foo".into(),
            super_name: Some("NSObject".into()),
            flags: 0,
            instance_size: 16,
            methods: vec![Method {
                selector: "bar".into(),
                encoding: "v16@0:8".into(),
                imp: 0x4000,
            }],
            class_methods: Vec::new(),
            properties: vec![Property {
                name: "name".into(),
                attributes: "T@\"NSString\",R,N,V_name".into(),
            }],
            ivars: vec![Ivar {
                name: "_name".into(),
                encoding: "@\"NSString\"".into(),
                offset: 8,
            }],
            protocols: vec!["NSCopying".into()],
        }
    }

    #[test]
    fn test_class_header() {
        let header = HeaderEmitter::new().class_header(&sample_class());
        assert!(header.starts_with("@interface Foo : NSObject <NSCopying>\n"));
        assert!(header.contains("    NSString *_name;\n"));
        assert!(header.contains("- (void)bar;\n"));
        assert!(header.contains("@property (nonatomic, readonly) NSString *name;\n"));
        assert!(header.ends_with("@end\n"));

        // declaration order: the method precedes the property
        let method_at = header.find("- (void)bar;").unwrap();
        let prop_at = header.find("@property").unwrap();
        assert!(method_at < prop_at);
    }

    #[test]
    fn test_sorted_output() {
        let mut class = sample_class();
        class.methods = vec![
            Method {
                selector: "zeta".into(),
                encoding: "v16@0:8".into(),
                imp: 0,
            },
            Method {
                selector: "alpha".into(),
                encoding: "v16@0:8".into(),
                imp: 0,
            },
        ];
        let header = HeaderEmitter::new().sorted(true).class_header(&class);
        let alpha = header.find("- (void)alpha;").unwrap();
        let zeta = header.find("- (void)zeta;").unwrap();
        assert!(alpha < zeta);
    }

    #[test]
    fn test_protocol_header() {
        let proto = ObjCProtocol {
            name: "Reloadable".into(),
            methods: vec![Method {
                selector: "reload".into(),
                encoding: "v16@0:8".into(),
                imp: 0,
            }],
            opt_methods: vec![Method {
                selector: "willReload".into(),
                encoding: "v16@0:8".into(),
                imp: 0,
            }],
            class_methods: Vec::new(),
            properties: Vec::new(),
            protocols: vec!["NSObject".into()],
        };
        let header = HeaderEmitter::new().protocol_header(&proto);
        assert!(header.starts_with("@protocol Reloadable <NSObject>\n"));
        assert!(header.contains("@optional\n- (void)willReload;\n"));
    }

    #[test]
    fn test_library_headers_file_names() {
        let meta = ObjCMetadata {
            classes: vec![sample_class()],
            protocols: Vec::new(),
            categories: vec![ObjCCategory {
                name: "Extras".into(),
                class_name: "Foo".into(),
                ..Default::default()
            }],
        };
        let files = HeaderEmitter::new().library_headers(&meta);
        let names: Vec<&str> = files.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Foo.h", "Foo+Extras.h"]);
    }
}
