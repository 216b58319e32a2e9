//! Objective-C runtime metadata walking.
//!
//! Classes, protocols, and categories live as pointer-linked structs in the
//! data segments; `__objc_classlist` and friends are arrays of pointers to
//! them. Everything is reached by VM translation. Superclass and protocol
//! pointers may dangle into other images (resolved through bind actions) or
//! form cycles (broken by an address-keyed intern map).

pub mod encoding;

use crate::dyld::Library;
use crate::macho::constants::SECTION_TYPE;
use crate::Result;
use std::collections::HashMap;

/// Method list entries use 32-bit deltas instead of pointers when this bit
/// is set in the list header's entsize field.
const METHOD_LIST_RELATIVE_FLAG: u32 = 0x8000_0000;

/// Mask for the actual entry size in a method list header.
const METHOD_LIST_ENTSIZE_MASK: u32 = 0x0000_ffff;

/// `class_ro_t.flags` bit marking a metaclass.
const RO_META: u32 = 0x1;

/// Low bits of the class data pointer carry Swift flags, not address.
const FAST_DATA_MASK: u64 = !0x7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub selector: String,
    pub encoding: String,
    pub imp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ivar {
    pub name: String,
    pub encoding: String,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub attributes: String,
}

#[derive(Debug, Clone, Default)]
pub struct ObjCClass {
    pub name: String,
    pub super_name: Option<String>,
    pub flags: u32,
    pub instance_size: u64,
    pub methods: Vec<Method>,
    pub class_methods: Vec<Method>,
    pub properties: Vec<Property>,
    pub ivars: Vec<Ivar>,
    pub protocols: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ObjCProtocol {
    pub name: String,
    pub methods: Vec<Method>,
    pub opt_methods: Vec<Method>,
    pub class_methods: Vec<Method>,
    pub properties: Vec<Property>,
    pub protocols: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ObjCCategory {
    pub name: String,
    pub class_name: String,
    pub methods: Vec<Method>,
    pub class_methods: Vec<Method>,
    pub properties: Vec<Property>,
}

/// Everything the image declares to the Objective-C runtime.
#[derive(Debug, Clone, Default)]
pub struct ObjCMetadata {
    pub classes: Vec<ObjCClass>,
    pub protocols: Vec<ObjCProtocol>,
    pub categories: Vec<ObjCCategory>,
}

impl ObjCMetadata {
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.protocols.is_empty() && self.categories.is_empty()
    }
}

/// Walk the image's Objective-C metadata.
pub fn read(lib: &Library) -> Result<ObjCMetadata> {
    ObjCReader::new(lib).read()
}

struct ObjCReader<'a> {
    lib: &'a Library,
    /// Address of every class already walked, mapped to its name; a second
    /// visit links by name instead of recursing.
    visited: HashMap<u64, String>,
    /// VM addresses the binder fills in, mapped to the bound symbol. Used
    /// to name superclasses and protocols that live in other images.
    bound: HashMap<u64, String>,
}

impl<'a> ObjCReader<'a> {
    fn new(lib: &'a Library) -> Self {
        let mut bound = HashMap::new();
        for action in lib.all_bind_actions() {
            bound.insert(action.addr, action.symbol_name.clone());
        }
        ObjCReader {
            lib,
            visited: HashMap::new(),
            bound,
        }
    }

    fn read(mut self) -> Result<ObjCMetadata> {
        let mut meta = ObjCMetadata::default();

        for addr in self.pointer_list("__objc_classlist")? {
            match self.read_class(addr) {
                Ok(Some(class)) => meta.classes.push(class),
                Ok(None) => {}
                Err(e) => log::warn!("skipping class at {:#x}: {}", addr, e),
            }
        }
        for addr in self.pointer_list("__objc_protolist")? {
            match self.read_protocol(addr) {
                Ok(proto) => meta.protocols.push(proto),
                Err(e) => log::warn!("skipping protocol at {:#x}: {}", addr, e),
            }
        }
        for addr in self.pointer_list("__objc_catlist")? {
            match self.read_category(addr) {
                Ok(cat) => meta.categories.push(cat),
                Err(e) => log::warn!("skipping category at {:#x}: {}", addr, e),
            }
        }

        log::debug!(
            "objc: {} classes, {} protocols, {} categories",
            meta.classes.len(),
            meta.protocols.len(),
            meta.categories.len()
        );
        Ok(meta)
    }

    /// The pointer array held by a `__objc_*list` section, empty when the
    /// section is absent.
    fn pointer_list(&self, section_name: &str) -> Result<Vec<u64>> {
        let Some(section) = self.lib.section(section_name) else {
            return Ok(Vec::new());
        };
        if section.flags & SECTION_TYPE == crate::macho::constants::S_ZEROFILL {
            return Ok(Vec::new());
        }
        let ptr = self.lib.ptr_size();
        let count = section.size / ptr;
        let view = self.lib.slice.view();
        let mut addrs = Vec::with_capacity(count as usize);
        for i in 0..count {
            let off = u64::from(section.offset) + i * ptr;
            let value = if self.lib.header.is_64 {
                view.read_u64(off)?
            } else {
                u64::from(view.read_u32(off)?)
            };
            if value != 0 {
                addrs.push(value);
            }
        }
        Ok(addrs)
    }

    /// Name for a pointer field: the pointee's class name if it is in this
    /// image, or the stripped bind symbol when dyld supplies it.
    fn external_class_name(&self, field_addr: u64) -> Option<String> {
        self.bound.get(&field_addr).map(|symbol| {
            symbol
                .strip_prefix("_OBJC_CLASS_$_")
                .or_else(|| symbol.strip_prefix("_OBJC_METACLASS_$_"))
                .unwrap_or(symbol)
                .to_string()
        })
    }

    /// Walk one `class_t`. Returns `None` when the address was already
    /// visited (the caller links by name).
    fn read_class(&mut self, class_addr: u64) -> Result<Option<ObjCClass>> {
        if self.visited.contains_key(&class_addr) {
            return Ok(None);
        }
        // reserve the slot before walking so cycles terminate
        self.visited.insert(class_addr, String::new());

        let ptr = self.lib.ptr_size();
        // class_t: isa, superclass, cache (2 words), data
        let data_field = class_addr + if self.lib.header.is_64 { 32 } else { 16 };
        let data_ptr = self.lib.ptr_at_vm(data_field)? & FAST_DATA_MASK;
        let ro = self.read_class_ro(data_ptr)?;

        let mut class = ro;
        self.visited.insert(class_addr, class.name.clone());

        // superclass: in-image pointer, or bound from another image
        let super_field = class_addr + ptr;
        let super_ptr = self.lib.ptr_at_vm(super_field)?;
        class.super_name = if super_ptr != 0 {
            match self.class_name_at(super_ptr) {
                Ok(name) => Some(name),
                Err(e) => {
                    log::debug!("superclass of {} unreadable: {}", class.name, e);
                    None
                }
            }
        } else {
            self.external_class_name(super_field)
        };

        // class methods hang off the metaclass, reached through isa
        let isa_ptr = self.lib.ptr_at_vm(class_addr)?;
        if isa_ptr != 0 {
            match self.read_metaclass_methods(isa_ptr) {
                Ok(methods) => class.class_methods = methods,
                Err(e) => log::debug!("metaclass of {} unreadable: {}", class.name, e),
            }
        }

        Ok(Some(class))
    }

    /// Resolve just the name of the class at `addr`, using the intern map
    /// for classes already walked.
    fn class_name_at(&mut self, addr: u64) -> Result<String> {
        if let Some(name) = self.visited.get(&addr) {
            if !name.is_empty() {
                return Ok(name.clone());
            }
        }
        let data_field = addr + if self.lib.header.is_64 { 32 } else { 16 };
        let data_ptr = self.lib.ptr_at_vm(data_field)? & FAST_DATA_MASK;
        let name_field = data_ptr + if self.lib.header.is_64 { 24 } else { 16 };
        let name_ptr = self.lib.ptr_at_vm(name_field)?;
        self.lib.cstr_at_vm(name_ptr)
    }

    /// Read a `class_ro_t` into a class shell (name, sizes, member lists).
    fn read_class_ro(&mut self, ro_addr: u64) -> Result<ObjCClass> {
        let view = self.lib.slice.view();
        let ro_off = self.lib.vm_to_file(ro_addr)?;
        let flags = view.read_u32(ro_off)?;
        let instance_size = u64::from(view.read_u32(ro_off + 8)?);

        let (name_f, methods_f, protocols_f, ivars_f, properties_f) = if self.lib.header.is_64 {
            (24u64, 32u64, 40u64, 48u64, 64u64)
        } else {
            (16, 20, 24, 28, 36)
        };

        let name_ptr = self.lib.ptr_at_vm(ro_addr + name_f)?;
        let name = self.lib.cstr_at_vm(name_ptr)?;

        let mut class = ObjCClass {
            name,
            flags,
            instance_size,
            ..Default::default()
        };

        let methods_ptr = self.lib.ptr_at_vm(ro_addr + methods_f)?;
        if methods_ptr != 0 {
            class.methods = self.read_method_list(methods_ptr)?;
        }
        let protocols_ptr = self.lib.ptr_at_vm(ro_addr + protocols_f)?;
        if protocols_ptr != 0 {
            class.protocols = self.read_protocol_refs(protocols_ptr)?;
        }
        let ivars_ptr = self.lib.ptr_at_vm(ro_addr + ivars_f)?;
        if ivars_ptr != 0 {
            class.ivars = self.read_ivar_list(ivars_ptr)?;
        }
        let properties_ptr = self.lib.ptr_at_vm(ro_addr + properties_f)?;
        if properties_ptr != 0 {
            class.properties = self.read_property_list(properties_ptr)?;
        }

        Ok(class)
    }

    fn read_metaclass_methods(&mut self, meta_addr: u64) -> Result<Vec<Method>> {
        let data_field = meta_addr + if self.lib.header.is_64 { 32 } else { 16 };
        let data_ptr = self.lib.ptr_at_vm(data_field)? & FAST_DATA_MASK;
        let ro_off = self.lib.vm_to_file(data_ptr)?;
        let flags = self.lib.slice.view().read_u32(ro_off)?;
        if flags & RO_META == 0 {
            // isa did not lead to a metaclass; don't guess
            return Ok(Vec::new());
        }
        let methods_f = if self.lib.header.is_64 { 32u64 } else { 20 };
        let methods_ptr = self.lib.ptr_at_vm(data_ptr + methods_f)?;
        if methods_ptr == 0 {
            return Ok(Vec::new());
        }
        self.read_method_list(methods_ptr)
    }

    /// Read a `method_list_t`, handling both classic pointer entries and
    /// the relative 12-byte entries of shared-cache era binaries.
    fn read_method_list(&mut self, list_addr: u64) -> Result<Vec<Method>> {
        let view = self.lib.slice.view();
        let list_off = self.lib.vm_to_file(list_addr)?;
        let entsize_and_flags = view.read_u32(list_off)?;
        let count = view.read_u32(list_off + 4)?;
        let relative = entsize_and_flags & METHOD_LIST_RELATIVE_FLAG != 0;

        let ptr = self.lib.ptr_size();
        let stride = if relative {
            12
        } else {
            let declared = u64::from(entsize_and_flags & METHOD_LIST_ENTSIZE_MASK);
            if declared == 0 {
                3 * ptr
            } else {
                declared
            }
        };

        let mut methods = Vec::with_capacity(count as usize);
        for i in 0..u64::from(count) {
            let entry_addr = list_addr + 8 + i * stride;
            let method = if relative {
                self.read_relative_method(entry_addr)
            } else {
                self.read_pointer_method(entry_addr)
            };
            match method {
                Ok(m) => methods.push(m),
                Err(e) => log::warn!("skipping method entry at {:#x}: {}", entry_addr, e),
            }
        }
        Ok(methods)
    }

    fn read_pointer_method(&mut self, entry_addr: u64) -> Result<Method> {
        let ptr = self.lib.ptr_size();
        let name_ptr = self.lib.ptr_at_vm(entry_addr)?;
        let types_ptr = self.lib.ptr_at_vm(entry_addr + ptr)?;
        let imp = self.lib.ptr_at_vm(entry_addr + 2 * ptr)?;
        Ok(Method {
            selector: self.lib.cstr_at_vm(name_ptr)?,
            encoding: if types_ptr != 0 {
                self.lib.cstr_at_vm(types_ptr)?
            } else {
                String::new()
            },
            imp,
        })
    }

    fn read_relative_method(&mut self, entry_addr: u64) -> Result<Method> {
        let view = self.lib.slice.view();
        let entry_off = self.lib.vm_to_file(entry_addr)?;
        let name_delta = view.read_u32(entry_off)? as i32;
        let types_delta = view.read_u32(entry_off + 4)? as i32;
        let imp_delta = view.read_u32(entry_off + 8)? as i32;

        // the name delta lands on a selector reference, one more hop away
        let selref_addr = entry_addr.wrapping_add_signed(i64::from(name_delta));
        let sel_addr = self.lib.ptr_at_vm(selref_addr)?;
        let selector = self.lib.cstr_at_vm(sel_addr)?;

        let types_addr = (entry_addr + 4).wrapping_add_signed(i64::from(types_delta));
        let encoding = self.lib.cstr_at_vm(types_addr)?;
        let imp = (entry_addr + 8).wrapping_add_signed(i64::from(imp_delta));
        Ok(Method {
            selector,
            encoding,
            imp,
        })
    }

    fn read_ivar_list(&mut self, list_addr: u64) -> Result<Vec<Ivar>> {
        let view = self.lib.slice.view();
        let list_off = self.lib.vm_to_file(list_addr)?;
        let entsize = view.read_u32(list_off)?;
        let count = view.read_u32(list_off + 4)?;
        let ptr = self.lib.ptr_size();
        let stride = if entsize != 0 {
            u64::from(entsize)
        } else {
            3 * ptr + 8
        };

        let mut ivars = Vec::with_capacity(count as usize);
        for i in 0..u64::from(count) {
            let entry = list_addr + 8 + i * stride;
            let result = (|| -> Result<Ivar> {
                // ivar_t: offset pointer, name, type, alignment, size
                let offset_ptr = self.lib.ptr_at_vm(entry)?;
                let offset = if offset_ptr != 0 {
                    let off = self.lib.vm_to_file(offset_ptr)?;
                    u64::from(view.read_u32(off)?)
                } else {
                    0
                };
                let name_ptr = self.lib.ptr_at_vm(entry + ptr)?;
                let type_ptr = self.lib.ptr_at_vm(entry + 2 * ptr)?;
                Ok(Ivar {
                    name: self.lib.cstr_at_vm(name_ptr)?,
                    encoding: if type_ptr != 0 {
                        self.lib.cstr_at_vm(type_ptr)?
                    } else {
                        String::new()
                    },
                    offset,
                })
            })();
            match result {
                Ok(ivar) => ivars.push(ivar),
                Err(e) => log::warn!("skipping ivar entry at {:#x}: {}", entry, e),
            }
        }
        Ok(ivars)
    }

    fn read_property_list(&mut self, list_addr: u64) -> Result<Vec<Property>> {
        let view = self.lib.slice.view();
        let list_off = self.lib.vm_to_file(list_addr)?;
        let entsize = view.read_u32(list_off)?;
        let count = view.read_u32(list_off + 4)?;
        let ptr = self.lib.ptr_size();
        let stride = if entsize != 0 {
            u64::from(entsize)
        } else {
            2 * ptr
        };

        let mut properties = Vec::with_capacity(count as usize);
        for i in 0..u64::from(count) {
            let entry = list_addr + 8 + i * stride;
            let result = (|| -> Result<Property> {
                let name_ptr = self.lib.ptr_at_vm(entry)?;
                let attr_ptr = self.lib.ptr_at_vm(entry + ptr)?;
                Ok(Property {
                    name: self.lib.cstr_at_vm(name_ptr)?,
                    attributes: if attr_ptr != 0 {
                        self.lib.cstr_at_vm(attr_ptr)?
                    } else {
                        String::new()
                    },
                })
            })();
            match result {
                Ok(p) => properties.push(p),
                Err(e) => log::warn!("skipping property entry at {:#x}: {}", entry, e),
            }
        }
        Ok(properties)
    }

    /// Read a `protocol_list_t` into protocol names only.
    fn read_protocol_refs(&mut self, list_addr: u64) -> Result<Vec<String>> {
        let ptr = self.lib.ptr_size();
        let count = self.lib.ptr_at_vm(list_addr)?;
        let mut names = Vec::new();
        for i in 0..count {
            let slot = list_addr + ptr + i * ptr;
            let proto_ptr = match self.lib.ptr_at_vm(slot) {
                Ok(p) if p != 0 => p,
                Ok(_) => {
                    if let Some(name) = self.bound.get(&slot) {
                        names.push(
                            name.strip_prefix("__OBJC_PROTOCOL_$_")
                                .unwrap_or(name)
                                .to_string(),
                        );
                    }
                    continue;
                }
                Err(e) => {
                    log::warn!("skipping protocol ref at {:#x}: {}", slot, e);
                    continue;
                }
            };
            // protocol_t.name is one pointer past isa
            match self
                .lib
                .ptr_at_vm(proto_ptr + ptr)
                .and_then(|p| self.lib.cstr_at_vm(p))
            {
                Ok(name) => names.push(name),
                Err(e) => log::warn!("skipping protocol ref at {:#x}: {}", slot, e),
            }
        }
        Ok(names)
    }

    fn read_protocol(&mut self, proto_addr: u64) -> Result<ObjCProtocol> {
        let ptr = self.lib.ptr_size();
        let name_ptr = self.lib.ptr_at_vm(proto_addr + ptr)?;
        let name = self.lib.cstr_at_vm(name_ptr)?;

        let mut proto = ObjCProtocol {
            name,
            ..Default::default()
        };

        let protocols_ptr = self.lib.ptr_at_vm(proto_addr + 2 * ptr)?;
        if protocols_ptr != 0 {
            proto.protocols = self.read_protocol_refs(protocols_ptr)?;
        }
        let methods_ptr = self.lib.ptr_at_vm(proto_addr + 3 * ptr)?;
        if methods_ptr != 0 {
            proto.methods = self.read_method_list(methods_ptr)?;
        }
        let class_methods_ptr = self.lib.ptr_at_vm(proto_addr + 4 * ptr)?;
        if class_methods_ptr != 0 {
            proto.class_methods = self.read_method_list(class_methods_ptr)?;
        }
        let opt_methods_ptr = self.lib.ptr_at_vm(proto_addr + 5 * ptr)?;
        if opt_methods_ptr != 0 {
            proto.opt_methods = self.read_method_list(opt_methods_ptr)?;
        }
        let properties_ptr = self.lib.ptr_at_vm(proto_addr + 7 * ptr)?;
        if properties_ptr != 0 {
            proto.properties = self.read_property_list(properties_ptr)?;
        }

        Ok(proto)
    }

    fn read_category(&mut self, cat_addr: u64) -> Result<ObjCCategory> {
        let ptr = self.lib.ptr_size();
        let name_ptr = self.lib.ptr_at_vm(cat_addr)?;
        let name = self.lib.cstr_at_vm(name_ptr)?;

        let class_field = cat_addr + ptr;
        let class_ptr = self.lib.ptr_at_vm(class_field)?;
        let class_name = if class_ptr != 0 {
            self.class_name_at(class_ptr)
                .unwrap_or_else(|_| String::new())
        } else {
            self.external_class_name(class_field).unwrap_or_default()
        };

        let mut category = ObjCCategory {
            name,
            class_name,
            ..Default::default()
        };

        let methods_ptr = self.lib.ptr_at_vm(cat_addr + 2 * ptr)?;
        if methods_ptr != 0 {
            category.methods = self.read_method_list(methods_ptr)?;
        }
        let class_methods_ptr = self.lib.ptr_at_vm(cat_addr + 3 * ptr)?;
        if class_methods_ptr != 0 {
            category.class_methods = self.read_method_list(class_methods_ptr)?;
        }
        let properties_ptr = self.lib.ptr_at_vm(cat_addr + 5 * ptr)?;
        if properties_ptr != 0 {
            category.properties = self.read_property_list(properties_ptr)?;
        }

        Ok(category)
    }
}
