//! Minimal JVM class file reader.
//!
//! Only the parts needed to decide whether a class can be patched in place
//! are decoded: the class header, fields with their constant values, methods
//! with their `Code` attribute, annotations and the enclosing-method link.
//! Method bodies are decoded into [`Instruction`]s with every constant pool
//! reference resolved, so two bodies can be compared without looking at the
//! constant pool layout of either file.

#![forbid(unsafe_code)]

mod annotation;
mod bytecode;
mod classfile;
mod constant_pool;
mod error;
mod reader;

pub use crate::annotation::{descriptor_to_internal_name, Annotation, ConstValue, ElementValue};
pub use crate::bytecode::{
    opcode_name, Code, Constant, ExceptionHandler, Instruction, LineNumber, LocalVariable,
    MemberRef, Operand,
};
pub use crate::classfile::{access, ClassFile, ClassMember, EnclosingMethod, InnerClassInfo};
pub use crate::error::{Error, Result};
