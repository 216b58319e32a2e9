//! Objective-C type-encoding decoding.
//!
//! The runtime stores argument and ivar types as compact encoding strings
//! (`v24@0:8@16`, `{CGRect={CGPoint=dd}{CGSize=dd}}`, ...). This module
//! turns them back into C-ish declarations for header output.

/// A decoded type: the spelled-out base plus a declarator suffix that must
/// follow the variable name (array bounds, bitfield width).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDecl {
    pub base: String,
    pub suffix: String,
}

impl TypeDecl {
    fn plain(base: impl Into<String>) -> Self {
        TypeDecl {
            base: base.into(),
            suffix: String::new(),
        }
    }

    /// Render as a standalone type (suffix appended, as in casts).
    pub fn display(&self) -> String {
        format!("{}{}", self.base, self.suffix)
    }

    /// Render as a declaration of `name`.
    pub fn declare(&self, name: &str) -> String {
        if self.base.ends_with('*') {
            format!("{}{}{}", self.base, name, self.suffix)
        } else {
            format!("{} {}{}", self.base, name, self.suffix)
        }
    }
}

/// Decode a single type encoding; unparseable input comes back verbatim so
/// output degrades instead of failing.
pub fn decode_type(encoding: &str) -> TypeDecl {
    let bytes = encoding.as_bytes();
    let (decl, consumed) = decode_one(bytes, 0);
    if consumed == 0 {
        return TypeDecl::plain(encoding);
    }
    decl
}

/// Decode one type starting at `pos`; returns the declaration and the
/// position just past it. `consumed == pos` means nothing was recognized.
fn decode_one(bytes: &[u8], pos: usize) -> (TypeDecl, usize) {
    let mut i = pos;

    // type qualifiers: only const is worth spelling out
    let mut is_const = false;
    while i < bytes.len() {
        match bytes[i] {
            b'r' => {
                is_const = true;
                i += 1;
            }
            b'n' | b'N' | b'o' | b'O' | b'R' | b'V' | b'A' => i += 1,
            _ => break,
        }
    }
    if i >= bytes.len() {
        return (TypeDecl::plain(""), pos);
    }

    let (mut decl, next) = match bytes[i] {
        b'@' => decode_object(bytes, i),
        b'#' => (TypeDecl::plain("Class"), i + 1),
        b':' => (TypeDecl::plain("SEL"), i + 1),
        b'v' => (TypeDecl::plain("void"), i + 1),
        b'c' => (TypeDecl::plain("char"), i + 1),
        b'C' => (TypeDecl::plain("unsigned char"), i + 1),
        b's' => (TypeDecl::plain("short"), i + 1),
        b'S' => (TypeDecl::plain("unsigned short"), i + 1),
        b'i' => (TypeDecl::plain("int"), i + 1),
        b'I' => (TypeDecl::plain("unsigned int"), i + 1),
        b'l' => (TypeDecl::plain("long"), i + 1),
        b'L' => (TypeDecl::plain("unsigned long"), i + 1),
        b'q' => (TypeDecl::plain("long long"), i + 1),
        b'Q' => (TypeDecl::plain("unsigned long long"), i + 1),
        b'f' => (TypeDecl::plain("float"), i + 1),
        b'd' => (TypeDecl::plain("double"), i + 1),
        b'D' => (TypeDecl::plain("long double"), i + 1),
        b'B' => (TypeDecl::plain("bool"), i + 1),
        b'*' => (TypeDecl::plain("char *"), i + 1),
        b'?' => (TypeDecl::plain("void *"), i + 1),
        b'^' => {
            let (inner, next) = decode_one(bytes, i + 1);
            if next == i + 1 {
                (TypeDecl::plain("void *"), i + 1)
            } else {
                let base = if inner.base.ends_with('*') {
                    format!("{}*", inner.base)
                } else {
                    format!("{} *", inner.base)
                };
                (TypeDecl::plain(base), next)
            }
        }
        b'b' => {
            let (width, next) = take_digits(bytes, i + 1);
            (
                TypeDecl {
                    base: "unsigned int".into(),
                    suffix: format!(":{}", width),
                },
                next,
            )
        }
        b'[' => decode_array(bytes, i),
        b'{' => decode_record(bytes, i, b'{', b'}', "struct"),
        b'(' => decode_record(bytes, i, b'(', b')', "union"),
        _ => return (TypeDecl::plain(""), pos),
    };

    if is_const {
        decl.base = format!("const {}", decl.base);
    }
    (decl, next)
}

fn decode_object(bytes: &[u8], pos: usize) -> (TypeDecl, usize) {
    let mut i = pos + 1;
    // @"NSString" or @"NSObject<Proto>" names the class
    if i < bytes.len() && bytes[i] == b'"' {
        let start = i + 1;
        if let Some(len) = bytes[start..].iter().position(|&b| b == b'"') {
            let name = String::from_utf8_lossy(&bytes[start..start + len]);
            i = start + len + 1;
            if name.starts_with('<') {
                // @"<Proto>" is an id constrained to a protocol
                return (TypeDecl::plain(format!("id {}", name)), i);
            }
            return (TypeDecl::plain(format!("{} *", name)), i);
        }
    }
    // @? is a block
    if i < bytes.len() && bytes[i] == b'?' {
        return (TypeDecl::plain("id /* block */"), i + 1);
    }
    (TypeDecl::plain("id"), i)
}

fn decode_array(bytes: &[u8], pos: usize) -> (TypeDecl, usize) {
    let (count, mut i) = take_digits(bytes, pos + 1);
    let (element, next) = decode_one(bytes, i);
    i = next;
    if i < bytes.len() && bytes[i] == b']' {
        i += 1;
    }
    (
        TypeDecl {
            base: element.base,
            suffix: format!("[{}]{}", count, element.suffix),
        },
        i,
    )
}

fn decode_record(
    bytes: &[u8],
    pos: usize,
    open: u8,
    close: u8,
    keyword: &str,
) -> (TypeDecl, usize) {
    // {Name=fields} - the field list is skipped, only the tag matters
    let mut depth = 0usize;
    let mut name_end = None;
    let mut end = bytes.len();
    for (j, &b) in bytes.iter().enumerate().skip(pos) {
        if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                end = j + 1;
                break;
            }
        } else if b == b'=' && depth == 1 && name_end.is_none() {
            name_end = Some(j);
        }
    }
    let name_end = name_end.unwrap_or(end.saturating_sub(1));
    let tag = String::from_utf8_lossy(&bytes[pos + 1..name_end]);
    let base = if tag.is_empty() || tag == "?" {
        keyword.to_string()
    } else {
        format!("{} {}", keyword, tag)
    };
    (TypeDecl::plain(base), end)
}

fn take_digits(bytes: &[u8], pos: usize) -> (u64, usize) {
    let mut value = 0u64;
    let mut i = pos;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        value = value * 10 + u64::from(bytes[i] - b'0');
        i += 1;
    }
    (value, i)
}

/// Split a method signature encoding into return and argument types,
/// dropping the offsets and the implicit `self`/`_cmd` arguments.
pub fn method_types(encoding: &str) -> (TypeDecl, Vec<TypeDecl>) {
    let bytes = encoding.as_bytes();
    let mut types = Vec::new();
    let mut i = 0usize;
    while i < bytes.len() {
        let (decl, next) = decode_one(bytes, i);
        if next == i {
            break;
        }
        types.push(decl);
        // each type is followed by its stack offset
        let (_, past_digits) = take_digits(bytes, next);
        i = past_digits;
    }

    if types.is_empty() {
        return (TypeDecl::plain("void"), Vec::new());
    }
    let ret = types.remove(0);
    // drop self and _cmd
    let args = types.into_iter().skip(2).collect();
    (ret, args)
}

/// Render a full method declaration from a selector and its signature
/// encoding. `class_method` selects the `+`/`-` marker.
pub fn method_declaration(selector: &str, encoding: &str, class_method: bool) -> String {
    let marker = if class_method { '+' } else { '-' };
    let (ret, args) = method_types(encoding);

    if !selector.contains(':') {
        return format!("{} ({}){};", marker, ret.display(), selector);
    }

    let pieces: Vec<&str> = selector.split(':').collect();
    let mut parts = Vec::new();
    for (idx, piece) in pieces.iter().enumerate() {
        if idx == pieces.len() - 1 && piece.is_empty() {
            break;
        }
        let arg_type = args
            .get(idx)
            .map(|t| t.display())
            .unwrap_or_else(|| "id".to_string());
        parts.push(format!("{}:({})arg{}", piece, arg_type, idx + 1));
    }
    format!("{} ({}){};", marker, ret.display(), parts.join(" "))
}

/// Render a property declaration from its name and runtime attribute
/// string (`T@"NSString",R,N,V_name`).
pub fn property_declaration(name: &str, attributes: &str) -> String {
    let mut type_decl = TypeDecl::plain("id");
    let mut nonatomic = false;
    let mut readonly = false;
    let mut copy = false;
    let mut retain = false;
    let mut weak = false;
    let mut getter = None;
    let mut setter = None;

    for attr in split_attributes(attributes) {
        match attr.chars().next() {
            Some('T') => type_decl = decode_type(&attr[1..]),
            Some('N') => nonatomic = true,
            Some('R') => readonly = true,
            Some('C') => copy = true,
            Some('&') => retain = true,
            Some('W') => weak = true,
            Some('G') => getter = Some(attr[1..].to_string()),
            Some('S') => setter = Some(attr[1..].to_string()),
            _ => {}
        }
    }

    let mut attrs = Vec::new();
    if nonatomic {
        attrs.push("nonatomic".to_string());
    }
    if readonly {
        attrs.push("readonly".to_string());
    }
    if copy {
        attrs.push("copy".to_string());
    }
    if retain {
        attrs.push("retain".to_string());
    }
    if weak {
        attrs.push("weak".to_string());
    }
    if let Some(g) = getter {
        attrs.push(format!("getter={}", g));
    }
    if let Some(s) = setter {
        attrs.push(format!("setter={}", s));
    }

    let attr_text = if attrs.is_empty() {
        String::new()
    } else {
        format!("({}) ", attrs.join(", "))
    };
    format!("@property {}{};", attr_text, type_decl.declare(name))
}

/// Split a property attribute string on commas, but not inside the braces
/// or quotes of a `T` type encoding.
fn split_attributes(attributes: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quoted = false;
    for c in attributes.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            '{' | '(' | '[' if !quoted => {
                depth += 1;
                current.push(c);
            }
            '}' | ')' | ']' if !quoted => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 && !quoted => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}
