use crate::annotation::{Annotation, ConstValue};
use crate::bytecode::Code;
use crate::constant_pool::ConstantPool;
use crate::error::{Error, Result};
use crate::reader::Reader;

/// Access flag bits shared by classes, fields and methods.
pub mod access {
    pub const ACC_PUBLIC: u16 = 0x0001;
    pub const ACC_PRIVATE: u16 = 0x0002;
    pub const ACC_PROTECTED: u16 = 0x0004;
    pub const ACC_STATIC: u16 = 0x0008;
    pub const ACC_FINAL: u16 = 0x0010;
    pub const ACC_INTERFACE: u16 = 0x0200;
    pub const ACC_ABSTRACT: u16 = 0x0400;
    pub const ACC_SYNTHETIC: u16 = 0x1000;
}

#[derive(Debug, Clone)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub access_flags: u16,
    pub this_class: String,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<ClassMember>,
    pub methods: Vec<ClassMember>,
    pub runtime_visible_annotations: Vec<Annotation>,
    pub runtime_invisible_annotations: Vec<Annotation>,
    pub inner_classes: Vec<InnerClassInfo>,
    pub enclosing_method: Option<EnclosingMethod>,
}

/// A field or a method.
#[derive(Debug, Clone)]
pub struct ClassMember {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
    pub runtime_visible_annotations: Vec<Annotation>,
    pub runtime_invisible_annotations: Vec<Annotation>,
    /// `ConstantValue` of a field.
    pub constant_value: Option<ConstValue>,
    /// Body of a non-abstract, non-native method.
    pub code: Option<Code>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerClassInfo {
    pub inner_class: String,
    pub outer_class: Option<String>,
    pub inner_name: Option<String>,
    pub access_flags: u16,
}

/// `EnclosingMethod` attribute of a local or anonymous class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnclosingMethod {
    pub class: String,
    /// `(name, descriptor)`; absent when the class is declared in an
    /// initializer.
    pub method: Option<(String, String)>,
}

impl ClassFile {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let magic = reader.read_u4()?;
        if magic != 0xCAFEBABE {
            return Err(Error::InvalidMagic(magic));
        }

        let minor_version = reader.read_u2()?;
        let major_version = reader.read_u2()?;
        let cp = ConstantPool::parse(&mut reader)?;

        let access_flags = reader.read_u2()?;
        let this_class = cp.get_class_name(reader.read_u2()?)?;
        let super_class = match reader.read_u2()? {
            0 => None,
            index => Some(cp.get_class_name(index)?),
        };

        let interfaces_count = reader.read_u2()? as usize;
        let mut interfaces = Vec::with_capacity(interfaces_count);
        for _ in 0..interfaces_count {
            interfaces.push(cp.get_class_name(reader.read_u2()?)?);
        }

        let fields = parse_members(&mut reader, &cp)?;
        let methods = parse_members(&mut reader, &cp)?;
        let attrs = parse_attributes(&mut reader, &cp)?;
        reader.ensure_empty()?;

        Ok(Self {
            minor_version,
            major_version,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            runtime_visible_annotations: attrs.runtime_visible_annotations,
            runtime_invisible_annotations: attrs.runtime_invisible_annotations,
            inner_classes: attrs.inner_classes,
            enclosing_method: attrs.enclosing_method,
        })
    }

    /// The class name after the last `/`.
    pub fn simple_name(&self) -> &str {
        self.this_class
            .rsplit_once('/')
            .map_or(self.this_class.as_str(), |(_, name)| name)
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&ClassMember> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }
}

impl ClassMember {
    pub fn has_invisible_annotation(&self, descriptor: &str) -> bool {
        self.runtime_invisible_annotations
            .iter()
            .any(|a| a.type_descriptor == descriptor)
    }
}

fn parse_members(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<Vec<ClassMember>> {
    let count = reader.read_u2()? as usize;
    let mut members = Vec::with_capacity(count);
    for _ in 0..count {
        let access_flags = reader.read_u2()?;
        let name = cp.get_utf8(reader.read_u2()?)?.to_string();
        let descriptor = cp.get_utf8(reader.read_u2()?)?.to_string();
        let attrs = parse_attributes(reader, cp)?;
        members.push(ClassMember {
            access_flags,
            name,
            descriptor,
            runtime_visible_annotations: attrs.runtime_visible_annotations,
            runtime_invisible_annotations: attrs.runtime_invisible_annotations,
            constant_value: attrs.constant_value,
            code: attrs.code,
        });
    }
    Ok(members)
}

#[derive(Default)]
struct ParsedAttributes {
    runtime_visible_annotations: Vec<Annotation>,
    runtime_invisible_annotations: Vec<Annotation>,
    inner_classes: Vec<InnerClassInfo>,
    enclosing_method: Option<EnclosingMethod>,
    constant_value: Option<ConstValue>,
    code: Option<Code>,
}

/// Attributes are parsed the same way on classes and members; the JVM only
/// emits each one where it applies.
fn parse_attributes(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<ParsedAttributes> {
    let attributes_count = reader.read_u2()? as usize;
    let mut parsed = ParsedAttributes::default();
    for _ in 0..attributes_count {
        let name = cp.get_utf8(reader.read_u2()?)?;
        let length = reader.read_u4()? as usize;
        let info = reader.read_bytes(length)?;

        let mut sub = Reader::new(info);
        match name {
            "RuntimeVisibleAnnotations" => {
                parsed
                    .runtime_visible_annotations
                    .extend(Annotation::parse_list(&mut sub, cp)?);
                sub.ensure_empty()?;
            }
            "RuntimeInvisibleAnnotations" => {
                parsed
                    .runtime_invisible_annotations
                    .extend(Annotation::parse_list(&mut sub, cp)?);
                sub.ensure_empty()?;
            }
            "ConstantValue" => {
                parsed.constant_value = Some(ConstValue::from_pool(cp, sub.read_u2()?)?);
                sub.ensure_empty()?;
            }
            "Code" => parsed.code = Some(Code::parse(info, cp)?),
            "EnclosingMethod" => {
                let class = cp.get_class_name(sub.read_u2()?)?;
                let method = match sub.read_u2()? {
                    0 => None,
                    index => Some(cp.get_name_and_type(index)?),
                };
                parsed.enclosing_method = Some(EnclosingMethod { class, method });
                sub.ensure_empty()?;
            }
            "InnerClasses" => {
                let count = sub.read_u2()? as usize;
                for _ in 0..count {
                    let inner_class = cp.get_class_name(sub.read_u2()?)?;
                    let outer_class = match sub.read_u2()? {
                        0 => None,
                        index => Some(cp.get_class_name(index)?),
                    };
                    let inner_name = match sub.read_u2()? {
                        0 => None,
                        index => Some(cp.get_utf8(index)?.to_string()),
                    };
                    let access_flags = sub.read_u2()?;
                    parsed.inner_classes.push(InnerClassInfo {
                        inner_class,
                        outer_class,
                        inner_name,
                        access_flags,
                    });
                }
                sub.ensure_empty()?;
            }
            _ => {}
        }
    }

    Ok(parsed)
}
