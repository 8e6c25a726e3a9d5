use crate::constant_pool::{ConstantPool, CpInfo};
use crate::error::{Error, Result};
use crate::reader::Reader;

const ANNOTATIONS: &str = "RuntimeAnnotations";

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub type_descriptor: String,
    pub elements: Vec<(String, ElementValue)>,
}

impl Annotation {
    pub(crate) fn parse(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<Self> {
        let type_descriptor = cp.get_utf8(reader.read_u2()?)?.to_string();
        let count = reader.read_u2()? as usize;
        let mut elements = Vec::with_capacity(count);
        for _ in 0..count {
            let name = cp.get_utf8(reader.read_u2()?)?.to_string();
            elements.push((name, ElementValue::parse(reader, cp)?));
        }
        Ok(Self {
            type_descriptor,
            elements,
        })
    }

    pub(crate) fn parse_list(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<Vec<Self>> {
        let count = reader.read_u2()? as usize;
        (0..count).map(|_| Self::parse(reader, cp)).collect()
    }

    /// Internal name of the annotation type, e.g. `java/lang/Deprecated`.
    pub fn type_internal_name(&self) -> Option<&str> {
        descriptor_to_internal_name(&self.type_descriptor)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementValue {
    Const(ConstValue),
    Enum {
        type_descriptor: String,
        const_name: String,
    },
    Class(String),
    Annotation(Box<Annotation>),
    Array(Vec<ElementValue>),
}

impl ElementValue {
    fn parse(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<Self> {
        let tag = reader.read_u1()?;
        let value = match tag {
            b'B' | b'C' | b'I' | b'S' | b'Z' => {
                let index = reader.read_u2()?;
                let value = match cp.get(index)? {
                    CpInfo::Integer(v) => *v,
                    other => return Err(mismatch(index, "Integer", other)),
                };
                ElementValue::Const(match tag {
                    b'B' => ConstValue::Byte(value as i8),
                    b'C' => ConstValue::Char(value as u16),
                    b'S' => ConstValue::Short(value as i16),
                    b'Z' => ConstValue::Boolean(value != 0),
                    _ => ConstValue::Int(value),
                })
            }
            b'D' | b'F' | b'J' => {
                let index = reader.read_u2()?;
                ElementValue::Const(ConstValue::from_pool(cp, index)?)
            }
            b's' => ElementValue::Const(ConstValue::String(
                cp.get_string_constant(reader.read_u2()?)?,
            )),
            b'e' => {
                let type_descriptor = cp.get_utf8(reader.read_u2()?)?.to_string();
                let const_name = cp.get_utf8(reader.read_u2()?)?.to_string();
                ElementValue::Enum {
                    type_descriptor,
                    const_name,
                }
            }
            b'c' => ElementValue::Class(cp.get_utf8(reader.read_u2()?)?.to_string()),
            b'@' => ElementValue::Annotation(Box::new(Annotation::parse(reader, cp)?)),
            b'[' => {
                let count = reader.read_u2()? as usize;
                let values = (0..count)
                    .map(|_| ElementValue::parse(reader, cp))
                    .collect::<Result<Vec<_>>>()?;
                ElementValue::Array(values)
            }
            _ => return Err(Error::MalformedAttribute(ANNOTATIONS)),
        };
        Ok(value)
    }
}

/// A constant as found in annotation elements and `ConstantValue`
/// attributes.
///
/// Equality compares floating point values by bit pattern, so a `NaN`
/// constant equals itself.
#[derive(Debug, Clone)]
pub enum ConstValue {
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    String(String),
}

impl ConstValue {
    /// Read a loadable numeric or string constant.
    pub(crate) fn from_pool(cp: &ConstantPool, index: u16) -> Result<Self> {
        Ok(match cp.get(index)? {
            CpInfo::Integer(v) => ConstValue::Int(*v),
            CpInfo::Long(v) => ConstValue::Long(*v),
            CpInfo::Float(v) => ConstValue::Float(*v),
            CpInfo::Double(v) => ConstValue::Double(*v),
            CpInfo::String { .. } => ConstValue::String(cp.get_string_constant(index)?),
            other => return Err(mismatch(index, "constant", other)),
        })
    }
}

impl PartialEq for ConstValue {
    fn eq(&self, other: &Self) -> bool {
        use ConstValue::*;
        match (self, other) {
            (Byte(a), Byte(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Short(a), Short(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Long(a), Long(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (Boolean(a), Boolean(b)) => a == b,
            (String(a), String(b)) => a == b,
            _ => false,
        }
    }
}

fn mismatch(index: u16, expected: &'static str, found: &CpInfo) -> Error {
    Error::ConstantPoolTypeMismatch {
        index,
        expected,
        found: found.kind(),
    }
}

pub fn descriptor_to_internal_name(desc: &str) -> Option<&str> {
    desc.strip_prefix('L').and_then(|rest| rest.strip_suffix(';'))
}
