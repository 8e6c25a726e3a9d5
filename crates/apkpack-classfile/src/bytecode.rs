use crate::constant_pool::{ConstantPool, CpInfo};
use crate::error::{Error, Result};
use crate::reader::Reader;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Decoded `Code` attribute of a method.
#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code_length: u32,
    pub instructions: Vec<Instruction>,
    pub exception_table: Vec<ExceptionHandler>,
    pub local_variables: Vec<LocalVariable>,
    pub line_numbers: Vec<LineNumber>,
}

/// One instruction with its operands resolved against the constant pool.
///
/// Short encodings are folded into their general form: `aload_0` decodes as
/// `aload` with local `0`, `ldc_w`/`ldc2_w` as `ldc`, `goto_w` as `goto` and
/// `jsr_w` as `jsr`. `wide` prefixes are absorbed into the operand.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub offset: u32,
    pub opcode: u8,
    pub operand: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Int(i32),
    Local(u16),
    Iinc { index: u16, delta: i16 },
    Constant(Constant),
    Type(String),
    MultiANewArray { class: String, dimensions: u8 },
    Field(MemberRef),
    Method(MemberRef),
    InvokeDynamic {
        name: String,
        descriptor: String,
        bootstrap_index: u16,
    },
    NewArray(u8),
    /// Absolute target offset.
    Branch(u32),
    TableSwitch {
        default: u32,
        low: i32,
        targets: Vec<u32>,
    },
    LookupSwitch {
        default: u32,
        pairs: Vec<(i32, u32)>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub interface: bool,
}

#[derive(Debug, Clone)]
pub enum Constant {
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    Class(String),
    MethodType(String),
    MethodHandle { kind: u8, member: MemberRef },
    Dynamic { name: String, descriptor: String },
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        use Constant::*;
        match (self, other) {
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Long(a), Long(b)) => a == b,
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (String(a), String(b)) | (Class(a), Class(b)) | (MethodType(a), MethodType(b)) => {
                a == b
            }
            (
                MethodHandle { kind: ka, member: ma },
                MethodHandle { kind: kb, member: mb },
            ) => ka == kb && ma == mb,
            (
                Dynamic {
                    name: na,
                    descriptor: da,
                },
                Dynamic {
                    name: nb,
                    descriptor: db,
                },
            ) => na == nb && da == db,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// `None` for `finally` handlers.
    pub catch_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub start_pc: u16,
    pub length: u16,
    pub name: String,
    pub descriptor: String,
    pub index: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    pub start_pc: u16,
    pub line: u16,
}

const CODE: &str = "Code";

impl Code {
    pub(crate) fn parse(info: &[u8], cp: &ConstantPool) -> Result<Self> {
        let mut reader = Reader::new(info);
        let max_stack = reader.read_u2()?;
        let max_locals = reader.read_u2()?;
        let code_length = reader.read_u4()?;
        let code = reader.read_bytes(code_length as usize)?;
        let instructions = decode(code, cp)?;

        let handler_count = reader.read_u2()? as usize;
        let mut exception_table = Vec::with_capacity(handler_count);
        for _ in 0..handler_count {
            let start_pc = reader.read_u2()?;
            let end_pc = reader.read_u2()?;
            let handler_pc = reader.read_u2()?;
            let catch_index = reader.read_u2()?;
            let catch_type = match catch_index {
                0 => None,
                index => Some(cp.get_class_name(index)?),
            };
            exception_table.push(ExceptionHandler {
                start_pc,
                end_pc,
                handler_pc,
                catch_type,
            });
        }

        let mut local_variables = Vec::new();
        let mut line_numbers = Vec::new();
        let attributes_count = reader.read_u2()? as usize;
        for _ in 0..attributes_count {
            let name = cp.get_utf8(reader.read_u2()?)?;
            let length = reader.read_u4()? as usize;
            let mut sub = Reader::new(reader.read_bytes(length)?);
            match name {
                "LocalVariableTable" => {
                    let count = sub.read_u2()? as usize;
                    for _ in 0..count {
                        let start_pc = sub.read_u2()?;
                        let length = sub.read_u2()?;
                        let name = cp.get_utf8(sub.read_u2()?)?.to_string();
                        let descriptor = cp.get_utf8(sub.read_u2()?)?.to_string();
                        let index = sub.read_u2()?;
                        local_variables.push(LocalVariable {
                            start_pc,
                            length,
                            name,
                            descriptor,
                            index,
                        });
                    }
                    sub.ensure_empty()?;
                }
                "LineNumberTable" => {
                    let count = sub.read_u2()? as usize;
                    for _ in 0..count {
                        line_numbers.push(LineNumber {
                            start_pc: sub.read_u2()?,
                            line: sub.read_u2()?,
                        });
                    }
                    sub.ensure_empty()?;
                }
                // StackMapTable and friends are derived data.
                _ => {}
            }
        }
        reader.ensure_empty()?;

        Ok(Self {
            max_stack,
            max_locals,
            code_length,
            instructions,
            exception_table,
            local_variables,
            line_numbers,
        })
    }

    /// Every method invoked by this body, in program order.
    pub fn invocations(&self) -> impl Iterator<Item = &MemberRef> + '_ {
        self.instructions
            .iter()
            .filter_map(|insn| match &insn.operand {
                Operand::Method(member) => Some(member),
                _ => None,
            })
    }

    /// Render the body as text, one instruction per line.
    ///
    /// Offsets are replaced by labels numbered in order of first use, and
    /// line numbers are left out, so two bodies that differ only in their
    /// debug line information render identically.
    pub fn textify(&self) -> String {
        let labels = self.labels();
        let label = |offset: u32| match labels.get(&offset) {
            Some(n) => format!("L{n}"),
            None => format!("@{offset}"),
        };

        let mut out = String::new();
        for insn in &self.instructions {
            if let Some(n) = labels.get(&insn.offset) {
                let _ = writeln!(out, "  L{n}");
            }
            let _ = write!(out, "    {}", opcode_name(insn.opcode).to_ascii_uppercase());
            match &insn.operand {
                Operand::None => {}
                Operand::Int(value) => {
                    let _ = write!(out, " {value}");
                }
                Operand::Local(index) => {
                    let _ = write!(out, " {index}");
                }
                Operand::Iinc { index, delta } => {
                    let _ = write!(out, " {index} {delta}");
                }
                Operand::Constant(constant) => {
                    let _ = write!(out, " {}", render_constant(constant));
                }
                Operand::Type(name) => {
                    let _ = write!(out, " {name}");
                }
                Operand::MultiANewArray { class, dimensions } => {
                    let _ = write!(out, " {class} {dimensions}");
                }
                Operand::Field(member) => {
                    let _ = write!(out, " {}.{} : {}", member.owner, member.name, member.descriptor);
                }
                Operand::Method(member) => {
                    let itf = if member.interface { " (itf)" } else { "" };
                    let _ = write!(
                        out,
                        " {}.{} {}{itf}",
                        member.owner, member.name, member.descriptor
                    );
                }
                Operand::InvokeDynamic {
                    name,
                    descriptor,
                    bootstrap_index,
                } => {
                    let _ = write!(out, " {name}{descriptor} [bsm {bootstrap_index}]");
                }
                Operand::NewArray(kind) => {
                    let _ = write!(out, " {}", newarray_type(*kind));
                }
                Operand::Branch(target) => {
                    let _ = write!(out, " {}", label(*target));
                }
                Operand::TableSwitch {
                    default,
                    low,
                    targets,
                } => {
                    for (i, target) in targets.iter().enumerate() {
                        let key = *low as i64 + i as i64;
                        let _ = write!(out, "\n      {key}: {}", label(*target));
                    }
                    let _ = write!(out, "\n      default: {}", label(*default));
                }
                Operand::LookupSwitch { default, pairs } => {
                    for (key, target) in pairs {
                        let _ = write!(out, "\n      {key}: {}", label(*target));
                    }
                    let _ = write!(out, "\n      default: {}", label(*default));
                }
            }
            out.push('\n');
        }
        if let Some(n) = labels.get(&self.code_length) {
            let _ = writeln!(out, "  L{n}");
        }

        for handler in &self.exception_table {
            let _ = writeln!(
                out,
                "    TRYCATCHBLOCK {} {} {} {}",
                label(handler.start_pc as u32),
                label(handler.end_pc as u32),
                label(handler.handler_pc as u32),
                handler.catch_type.as_deref().unwrap_or("null"),
            );
        }
        for local in &self.local_variables {
            let _ = writeln!(
                out,
                "    LOCALVARIABLE {} {} {} {} {}",
                local.name,
                local.descriptor,
                label(local.start_pc as u32),
                label(local.start_pc as u32 + local.length as u32),
                local.index,
            );
        }
        let _ = writeln!(out, "    MAXSTACK = {}", self.max_stack);
        let _ = writeln!(out, "    MAXLOCALS = {}", self.max_locals);
        out
    }

    fn labels(&self) -> BTreeMap<u32, usize> {
        let mut order = Vec::new();
        for insn in &self.instructions {
            match &insn.operand {
                Operand::Branch(target) => order.push(*target),
                Operand::TableSwitch {
                    default, targets, ..
                } => {
                    order.extend(targets.iter().copied());
                    order.push(*default);
                }
                Operand::LookupSwitch { default, pairs } => {
                    order.extend(pairs.iter().map(|(_, target)| *target));
                    order.push(*default);
                }
                _ => {}
            }
        }
        for handler in &self.exception_table {
            order.push(handler.start_pc as u32);
            order.push(handler.end_pc as u32);
            order.push(handler.handler_pc as u32);
        }
        for local in &self.local_variables {
            order.push(local.start_pc as u32);
            order.push(local.start_pc as u32 + local.length as u32);
        }

        let mut offsets: Vec<u32> = order;
        offsets.sort_unstable();
        offsets.dedup();
        offsets
            .into_iter()
            .enumerate()
            .map(|(n, offset)| (offset, n))
            .collect()
    }
}

fn render_constant(constant: &Constant) -> String {
    match constant {
        Constant::Int(v) => v.to_string(),
        Constant::Float(v) => format!("{v}F"),
        Constant::Long(v) => format!("{v}L"),
        Constant::Double(v) => format!("{v}D"),
        Constant::String(v) => format!("{v:?}"),
        Constant::Class(name) => format!("L{name};.class"),
        Constant::MethodType(desc) => desc.clone(),
        Constant::MethodHandle { kind, member } => format!(
            "{}.{}{} ({kind})",
            member.owner, member.name, member.descriptor
        ),
        Constant::Dynamic { name, descriptor } => format!("{name} : {descriptor}"),
    }
}

fn newarray_type(kind: u8) -> &'static str {
    match kind {
        4 => "T_BOOLEAN",
        5 => "T_CHAR",
        6 => "T_FLOAT",
        7 => "T_DOUBLE",
        8 => "T_BYTE",
        9 => "T_SHORT",
        10 => "T_INT",
        11 => "T_LONG",
        _ => "T_UNKNOWN",
    }
}

const LDC: u8 = 0x12;
const ILOAD: u8 = 0x15;
const ISTORE: u8 = 0x36;
const IINC: u8 = 0x84;
const GOTO: u8 = 0xa7;
const JSR: u8 = 0xa8;
const RET: u8 = 0xa9;
const TABLESWITCH: u8 = 0xaa;
const LOOKUPSWITCH: u8 = 0xab;
const INVOKEINTERFACE: u8 = 0xb9;
const INVOKEDYNAMIC: u8 = 0xba;
const WIDE: u8 = 0xc4;

fn decode(code: &[u8], cp: &ConstantPool) -> Result<Vec<Instruction>> {
    let mut reader = Reader::new(code);
    let mut instructions = Vec::new();

    while reader.position() < code.len() {
        let start = reader.position();
        let offset = start as u32;
        let raw = reader.read_u1()?;
        let branch = |delta: i32| -> Result<u32> {
            u32::try_from(start as i64 + delta as i64)
                .map_err(|_| Error::MalformedAttribute(CODE))
        };

        let (opcode, operand) = match raw {
            0x00..=0x0f | 0x2e..=0x35 | 0x4f..=0x83 | 0x85..=0x98 | 0xac..=0xb1 | 0xbe
            | 0xbf | 0xc2 | 0xc3 => (raw, Operand::None),
            0x10 => (raw, Operand::Int(reader.read_i1()? as i32)),
            0x11 => (raw, Operand::Int(reader.read_i2()? as i32)),
            0x12 => (LDC, Operand::Constant(constant(cp, reader.read_u1()? as u16)?)),
            0x13 | 0x14 => (LDC, Operand::Constant(constant(cp, reader.read_u2()?)?)),
            0x15..=0x19 | 0x36..=0x3a | RET => {
                (raw, Operand::Local(reader.read_u1()? as u16))
            }
            0x1a..=0x2d => {
                let n = raw - 0x1a;
                (ILOAD + n / 4, Operand::Local((n % 4) as u16))
            }
            0x3b..=0x4e => {
                let n = raw - 0x3b;
                (ISTORE + n / 4, Operand::Local((n % 4) as u16))
            }
            IINC => {
                let index = reader.read_u1()? as u16;
                let delta = reader.read_i1()? as i16;
                (raw, Operand::Iinc { index, delta })
            }
            0x99..=JSR | 0xc6 | 0xc7 => (raw, Operand::Branch(branch(reader.read_i2()? as i32)?)),
            0xc8 => (GOTO, Operand::Branch(branch(reader.read_i4()?)?)),
            0xc9 => (JSR, Operand::Branch(branch(reader.read_i4()?)?)),
            TABLESWITCH => {
                skip_padding(&mut reader)?;
                let default = branch(reader.read_i4()?)?;
                let low = reader.read_i4()?;
                let high = reader.read_i4()?;
                if high < low {
                    return Err(Error::MalformedAttribute(CODE));
                }
                let count = (high as i64 - low as i64 + 1) as usize;
                let mut targets = Vec::with_capacity(count.min(code.len()));
                for _ in 0..count {
                    targets.push(branch(reader.read_i4()?)?);
                }
                (
                    raw,
                    Operand::TableSwitch {
                        default,
                        low,
                        targets,
                    },
                )
            }
            LOOKUPSWITCH => {
                skip_padding(&mut reader)?;
                let default = branch(reader.read_i4()?)?;
                let count = reader.read_i4()?;
                let count = usize::try_from(count).map_err(|_| Error::MalformedAttribute(CODE))?;
                let mut pairs = Vec::with_capacity(count.min(code.len()));
                for _ in 0..count {
                    let key = reader.read_i4()?;
                    pairs.push((key, branch(reader.read_i4()?)?));
                }
                (raw, Operand::LookupSwitch { default, pairs })
            }
            0xb2..=0xb5 => (raw, Operand::Field(member(cp, reader.read_u2()?)?)),
            0xb6..=0xb8 => (raw, Operand::Method(member(cp, reader.read_u2()?)?)),
            INVOKEINTERFACE => {
                let member = member(cp, reader.read_u2()?)?;
                reader.skip(2)?;
                (raw, Operand::Method(member))
            }
            INVOKEDYNAMIC => {
                let index = reader.read_u2()?;
                reader.skip(2)?;
                let (bootstrap_index, nat) = match cp.get(index)? {
                    CpInfo::InvokeDynamic {
                        bootstrap_method_attr_index,
                        name_and_type_index,
                    } => (*bootstrap_method_attr_index, *name_and_type_index),
                    other => {
                        return Err(Error::ConstantPoolTypeMismatch {
                            index,
                            expected: "InvokeDynamic",
                            found: other.kind(),
                        })
                    }
                };
                let (name, descriptor) = cp.get_name_and_type(nat)?;
                (
                    raw,
                    Operand::InvokeDynamic {
                        name,
                        descriptor,
                        bootstrap_index,
                    },
                )
            }
            0xbb | 0xbd | 0xc0 | 0xc1 => (raw, Operand::Type(cp.get_class_name(reader.read_u2()?)?)),
            0xbc => (raw, Operand::NewArray(reader.read_u1()?)),
            0xc5 => {
                let class = cp.get_class_name(reader.read_u2()?)?;
                let dimensions = reader.read_u1()?;
                (raw, Operand::MultiANewArray { class, dimensions })
            }
            WIDE => {
                let inner = reader.read_u1()?;
                match inner {
                    0x15..=0x19 | 0x36..=0x3a | RET => (inner, Operand::Local(reader.read_u2()?)),
                    IINC => {
                        let index = reader.read_u2()?;
                        let delta = reader.read_i2()?;
                        (inner, Operand::Iinc { index, delta })
                    }
                    _ => {
                        return Err(Error::InvalidOpcode {
                            offset,
                            opcode: inner,
                        })
                    }
                }
            }
            _ => return Err(Error::InvalidOpcode { offset, opcode: raw }),
        };

        instructions.push(Instruction {
            offset,
            opcode,
            operand,
        });
    }

    Ok(instructions)
}

/// Switch operands start at the next multiple of four from the start of the
/// code array.
fn skip_padding(reader: &mut Reader<'_>) -> Result<()> {
    let pad = (4 - reader.position() % 4) % 4;
    reader.skip(pad)
}

fn member(cp: &ConstantPool, index: u16) -> Result<MemberRef> {
    let resolved = cp.get_member_ref(index)?;
    Ok(MemberRef {
        owner: resolved.owner,
        name: resolved.name,
        descriptor: resolved.descriptor,
        interface: resolved.interface,
    })
}

fn constant(cp: &ConstantPool, index: u16) -> Result<Constant> {
    Ok(match cp.get(index)? {
        CpInfo::Integer(v) => Constant::Int(*v),
        CpInfo::Float(v) => Constant::Float(*v),
        CpInfo::Long(v) => Constant::Long(*v),
        CpInfo::Double(v) => Constant::Double(*v),
        CpInfo::String { .. } => Constant::String(cp.get_string_constant(index)?),
        CpInfo::Class { .. } => Constant::Class(cp.get_class_name(index)?),
        CpInfo::MethodType { descriptor_index } => {
            Constant::MethodType(cp.get_utf8(*descriptor_index)?.to_string())
        }
        CpInfo::MethodHandle {
            reference_kind,
            reference_index,
        } => Constant::MethodHandle {
            kind: *reference_kind,
            member: member(cp, *reference_index)?,
        },
        CpInfo::Dynamic {
            name_and_type_index,
            ..
        } => {
            let (name, descriptor) = cp.get_name_and_type(*name_and_type_index)?;
            Constant::Dynamic { name, descriptor }
        }
        other => {
            return Err(Error::ConstantPoolTypeMismatch {
                index,
                expected: "loadable constant",
                found: other.kind(),
            })
        }
    })
}

const OPCODE_NAMES: [&str; 202] = [
    "nop", "aconst_null", "iconst_m1", "iconst_0", "iconst_1", "iconst_2", "iconst_3",
    "iconst_4", "iconst_5", "lconst_0", "lconst_1", "fconst_0", "fconst_1", "fconst_2",
    "dconst_0", "dconst_1", "bipush", "sipush", "ldc", "ldc_w", "ldc2_w", "iload", "lload",
    "fload", "dload", "aload", "iload_0", "iload_1", "iload_2", "iload_3", "lload_0", "lload_1",
    "lload_2", "lload_3", "fload_0", "fload_1", "fload_2", "fload_3", "dload_0", "dload_1",
    "dload_2", "dload_3", "aload_0", "aload_1", "aload_2", "aload_3", "iaload", "laload",
    "faload", "daload", "aaload", "baload", "caload", "saload", "istore", "lstore", "fstore",
    "dstore", "astore", "istore_0", "istore_1", "istore_2", "istore_3", "lstore_0", "lstore_1",
    "lstore_2", "lstore_3", "fstore_0", "fstore_1", "fstore_2", "fstore_3", "dstore_0",
    "dstore_1", "dstore_2", "dstore_3", "astore_0", "astore_1", "astore_2", "astore_3",
    "iastore", "lastore", "fastore", "dastore", "aastore", "bastore", "castore", "sastore",
    "pop", "pop2", "dup", "dup_x1", "dup_x2", "dup2", "dup2_x1", "dup2_x2", "swap", "iadd",
    "ladd", "fadd", "dadd", "isub", "lsub", "fsub", "dsub", "imul", "lmul", "fmul", "dmul",
    "idiv", "ldiv", "fdiv", "ddiv", "irem", "lrem", "frem", "drem", "ineg", "lneg", "fneg",
    "dneg", "ishl", "lshl", "ishr", "lshr", "iushr", "lushr", "iand", "land", "ior", "lor",
    "ixor", "lxor", "iinc", "i2l", "i2f", "i2d", "l2i", "l2f", "l2d", "f2i", "f2l", "f2d", "d2i",
    "d2l", "d2f", "i2b", "i2c", "i2s", "lcmp", "fcmpl", "fcmpg", "dcmpl", "dcmpg", "ifeq",
    "ifne", "iflt", "ifge", "ifgt", "ifle", "if_icmpeq", "if_icmpne", "if_icmplt", "if_icmpge",
    "if_icmpgt", "if_icmple", "if_acmpeq", "if_acmpne", "goto", "jsr", "ret", "tableswitch",
    "lookupswitch", "ireturn", "lreturn", "freturn", "dreturn", "areturn", "return",
    "getstatic", "putstatic", "getfield", "putfield", "invokevirtual", "invokespecial",
    "invokestatic", "invokeinterface", "invokedynamic", "new", "newarray", "anewarray",
    "arraylength", "athrow", "checkcast", "instanceof", "monitorenter", "monitorexit", "wide",
    "multianewarray", "ifnull", "ifnonnull", "goto_w", "jsr_w",
];

/// Mnemonic of `opcode`, or `"invalid"` for reserved values.
pub fn opcode_name(opcode: u8) -> &'static str {
    OPCODE_NAMES
        .get(opcode as usize)
        .copied()
        .unwrap_or("invalid")
}
