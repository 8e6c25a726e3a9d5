use std::collections::HashMap;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_FINAL: u16 = 0x0010;
pub const ACC_SUPER: u16 = 0x0020;

/// An instruction as written by [`ClassBuilder`].
#[derive(Clone, Debug)]
pub enum Insn {
    /// An opcode without operands, e.g. `0xb1` (`return`).
    Op(u8),
    Bipush(i8),
    /// Local variable opcode in its one-byte-index form, e.g. `0x19` (`aload`).
    Local(u8, u8),
    LdcString(String),
    LdcInt(i32),
    /// `getstatic`/`putstatic`/`getfield`/`putfield`.
    Field(u8, String, String, String),
    /// `invokevirtual`/`invokespecial`/`invokestatic`/`invokeinterface`.
    Invoke(u8, String, String, String),
    /// `new`/`anewarray`/`checkcast`/`instanceof`.
    Type(u8, String),
    /// Relative branch, e.g. `0xa7` (`goto`).
    Branch(u8, i16),
}

impl Insn {
    pub fn invoke(opcode: u8, owner: &str, name: &str, desc: &str) -> Self {
        Insn::Invoke(opcode, owner.into(), name.into(), desc.into())
    }

    pub fn field(opcode: u8, owner: &str, name: &str, desc: &str) -> Self {
        Insn::Field(opcode, owner.into(), name.into(), desc.into())
    }
}

#[derive(Clone, Debug, Default)]
pub struct AnnotationSpec {
    pub descriptor: String,
    pub int_elements: Vec<(String, i32)>,
}

impl AnnotationSpec {
    pub fn new(descriptor: &str) -> Self {
        Self {
            descriptor: descriptor.into(),
            int_elements: Vec::new(),
        }
    }

    pub fn with_int(mut self, name: &str, value: i32) -> Self {
        self.int_elements.push((name.into(), value));
        self
    }
}

#[derive(Clone, Debug)]
pub struct FieldSpec {
    pub access: u16,
    pub name: String,
    pub descriptor: String,
    pub int_constant: Option<i32>,
}

impl FieldSpec {
    pub fn new(access: u16, name: &str, descriptor: &str) -> Self {
        Self {
            access,
            name: name.into(),
            descriptor: descriptor.into(),
            int_constant: None,
        }
    }

    pub fn with_constant(mut self, value: i32) -> Self {
        self.int_constant = Some(value);
        self
    }
}

#[derive(Clone, Debug)]
pub struct MethodSpec {
    pub access: u16,
    pub name: String,
    pub descriptor: String,
    pub code: Option<Vec<Insn>>,
    pub max_stack: u16,
    pub max_locals: u16,
    pub line_numbers: Vec<(u16, u16)>,
    pub visible_annotations: Vec<AnnotationSpec>,
    pub invisible_annotations: Vec<AnnotationSpec>,
}

impl MethodSpec {
    pub fn new(access: u16, name: &str, descriptor: &str, code: Vec<Insn>) -> Self {
        Self {
            access,
            name: name.into(),
            descriptor: descriptor.into(),
            code: Some(code),
            max_stack: 4,
            max_locals: 4,
            line_numbers: Vec::new(),
            visible_annotations: Vec::new(),
            invisible_annotations: Vec::new(),
        }
    }

    /// `return` only.
    pub fn empty(name: &str, descriptor: &str) -> Self {
        Self::new(ACC_PUBLIC, name, descriptor, vec![Insn::Op(0xb1)])
    }

    pub fn with_line(mut self, start_pc: u16, line: u16) -> Self {
        self.line_numbers.push((start_pc, line));
        self
    }

    pub fn with_visible_annotation(mut self, annotation: AnnotationSpec) -> Self {
        self.visible_annotations.push(annotation);
        self
    }

    pub fn with_invisible_annotation(mut self, annotation: AnnotationSpec) -> Self {
        self.invisible_annotations.push(annotation);
        self
    }
}

/// Builds a Java 8 class file.
#[derive(Clone, Debug)]
pub struct ClassBuilder {
    access: u16,
    name: String,
    super_name: Option<String>,
    interfaces: Vec<String>,
    fields: Vec<FieldSpec>,
    methods: Vec<MethodSpec>,
    visible_annotations: Vec<AnnotationSpec>,
    invisible_annotations: Vec<AnnotationSpec>,
    enclosing_class: Option<String>,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            access: ACC_PUBLIC | ACC_SUPER,
            name: name.into(),
            super_name: Some("java/lang/Object".into()),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            visible_annotations: Vec::new(),
            invisible_annotations: Vec::new(),
            enclosing_class: None,
        }
    }

    pub fn access(mut self, access: u16) -> Self {
        self.access = access;
        self
    }

    pub fn super_class(mut self, name: &str) -> Self {
        self.super_name = Some(name.into());
        self
    }

    pub fn interface(mut self, name: &str) -> Self {
        self.interfaces.push(name.into());
        self
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn method(mut self, method: MethodSpec) -> Self {
        self.methods.push(method);
        self
    }

    pub fn visible_annotation(mut self, annotation: AnnotationSpec) -> Self {
        self.visible_annotations.push(annotation);
        self
    }

    pub fn invisible_annotation(mut self, annotation: AnnotationSpec) -> Self {
        self.invisible_annotations.push(annotation);
        self
    }

    pub fn enclosing_class(mut self, name: &str) -> Self {
        self.enclosing_class = Some(name.into());
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut cp = Pool::default();
        let mut body = Vec::new();

        put_u2(&mut body, self.access);
        put_u2(&mut body, cp.class(&self.name));
        put_u2(&mut body, self.super_name.as_deref().map_or(0, |s| cp.class(s)));
        put_u2(&mut body, self.interfaces.len() as u16);
        for interface in &self.interfaces {
            put_u2(&mut body, cp.class(interface));
        }

        put_u2(&mut body, self.fields.len() as u16);
        for field in &self.fields {
            put_u2(&mut body, field.access);
            put_u2(&mut body, cp.utf8(&field.name));
            put_u2(&mut body, cp.utf8(&field.descriptor));
            match field.int_constant {
                Some(value) => {
                    put_u2(&mut body, 1);
                    put_u2(&mut body, cp.utf8("ConstantValue"));
                    put_u4(&mut body, 2);
                    put_u2(&mut body, cp.integer(value));
                }
                None => put_u2(&mut body, 0),
            }
        }

        put_u2(&mut body, self.methods.len() as u16);
        for method in &self.methods {
            put_u2(&mut body, method.access);
            put_u2(&mut body, cp.utf8(&method.name));
            put_u2(&mut body, cp.utf8(&method.descriptor));
            let mut attrs = Vec::new();
            if let Some(code) = &method.code {
                attrs.push(("Code", code_attribute(&mut cp, method, code)));
            }
            if !method.visible_annotations.is_empty() {
                attrs.push((
                    "RuntimeVisibleAnnotations",
                    annotations(&mut cp, &method.visible_annotations),
                ));
            }
            if !method.invisible_annotations.is_empty() {
                attrs.push((
                    "RuntimeInvisibleAnnotations",
                    annotations(&mut cp, &method.invisible_annotations),
                ));
            }
            put_attributes(&mut body, &mut cp, attrs);
        }

        let mut attrs = Vec::new();
        if !self.visible_annotations.is_empty() {
            attrs.push((
                "RuntimeVisibleAnnotations",
                annotations(&mut cp, &self.visible_annotations),
            ));
        }
        if !self.invisible_annotations.is_empty() {
            attrs.push((
                "RuntimeInvisibleAnnotations",
                annotations(&mut cp, &self.invisible_annotations),
            ));
        }
        if let Some(outer) = &self.enclosing_class {
            let mut info = Vec::new();
            put_u2(&mut info, cp.class(outer));
            put_u2(&mut info, 0);
            attrs.push(("EnclosingMethod", info));
        }
        put_attributes(&mut body, &mut cp, attrs);

        let mut out = Vec::new();
        put_u4(&mut out, 0xCAFEBABE);
        put_u2(&mut out, 0);
        put_u2(&mut out, 52);
        put_u2(&mut out, cp.entries.len() as u16 + 1);
        for entry in &cp.entries {
            out.extend_from_slice(entry);
        }
        out.extend_from_slice(&body);
        out
    }
}

fn code_attribute(cp: &mut Pool, method: &MethodSpec, code: &[Insn]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for insn in code {
        match insn {
            Insn::Op(op) => bytes.push(*op),
            Insn::Bipush(value) => bytes.extend_from_slice(&[0x10, *value as u8]),
            Insn::Local(op, index) => bytes.extend_from_slice(&[*op, *index]),
            Insn::LdcString(value) => {
                let index = cp.string(value);
                bytes.push(0x13);
                put_u2(&mut bytes, index);
            }
            Insn::LdcInt(value) => {
                let index = cp.integer(*value);
                bytes.push(0x13);
                put_u2(&mut bytes, index);
            }
            Insn::Field(op, owner, name, desc) => {
                let index = cp.member(9, owner, name, desc);
                bytes.push(*op);
                put_u2(&mut bytes, index);
            }
            Insn::Invoke(op, owner, name, desc) => {
                let tag = if *op == 0xb9 { 11 } else { 10 };
                let index = cp.member(tag, owner, name, desc);
                bytes.push(*op);
                put_u2(&mut bytes, index);
                if *op == 0xb9 {
                    bytes.extend_from_slice(&[1, 0]);
                }
            }
            Insn::Type(op, class) => {
                let index = cp.class(class);
                bytes.push(*op);
                put_u2(&mut bytes, index);
            }
            Insn::Branch(op, delta) => {
                bytes.push(*op);
                bytes.extend_from_slice(&delta.to_be_bytes());
            }
        }
    }

    let mut info = Vec::new();
    put_u2(&mut info, method.max_stack);
    put_u2(&mut info, method.max_locals);
    put_u4(&mut info, bytes.len() as u32);
    info.extend_from_slice(&bytes);
    put_u2(&mut info, 0);
    let mut attrs = Vec::new();
    if !method.line_numbers.is_empty() {
        let mut table = Vec::new();
        put_u2(&mut table, method.line_numbers.len() as u16);
        for (start_pc, line) in &method.line_numbers {
            put_u2(&mut table, *start_pc);
            put_u2(&mut table, *line);
        }
        attrs.push(("LineNumberTable", table));
    }
    put_attributes(&mut info, cp, attrs);
    info
}

fn annotations(cp: &mut Pool, specs: &[AnnotationSpec]) -> Vec<u8> {
    let mut out = Vec::new();
    put_u2(&mut out, specs.len() as u16);
    for spec in specs {
        put_u2(&mut out, cp.utf8(&spec.descriptor));
        put_u2(&mut out, spec.int_elements.len() as u16);
        for (name, value) in &spec.int_elements {
            put_u2(&mut out, cp.utf8(name));
            out.push(b'I');
            put_u2(&mut out, cp.integer(*value));
        }
    }
    out
}

fn put_attributes(out: &mut Vec<u8>, cp: &mut Pool, attrs: Vec<(&str, Vec<u8>)>) {
    put_u2(out, attrs.len() as u16);
    for (name, info) in attrs {
        put_u2(out, cp.utf8(name));
        put_u4(out, info.len() as u32);
        out.extend_from_slice(&info);
    }
}

fn put_u2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_u4(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

#[derive(Default)]
struct Pool {
    entries: Vec<Vec<u8>>,
    index: HashMap<Vec<u8>, u16>,
}

impl Pool {
    fn add(&mut self, entry: Vec<u8>) -> u16 {
        if let Some(index) = self.index.get(&entry) {
            return *index;
        }
        self.entries.push(entry.clone());
        let index = self.entries.len() as u16;
        self.index.insert(entry, index);
        index
    }

    fn utf8(&mut self, value: &str) -> u16 {
        let mut entry = vec![1];
        put_u2(&mut entry, value.len() as u16);
        entry.extend_from_slice(value.as_bytes());
        self.add(entry)
    }

    fn integer(&mut self, value: i32) -> u16 {
        let mut entry = vec![3];
        entry.extend_from_slice(&value.to_be_bytes());
        self.add(entry)
    }

    fn class(&mut self, name: &str) -> u16 {
        let name = self.utf8(name);
        let mut entry = vec![7];
        put_u2(&mut entry, name);
        self.add(entry)
    }

    fn string(&mut self, value: &str) -> u16 {
        let value = self.utf8(value);
        let mut entry = vec![8];
        put_u2(&mut entry, value);
        self.add(entry)
    }

    fn member(&mut self, tag: u8, owner: &str, name: &str, desc: &str) -> u16 {
        let class = self.class(owner);
        let name = self.utf8(name);
        let desc = self.utf8(desc);
        let mut nat = vec![12];
        put_u2(&mut nat, name);
        put_u2(&mut nat, desc);
        let nat = self.add(nat);
        let mut entry = vec![tag];
        put_u2(&mut entry, class);
        put_u2(&mut entry, nat);
        self.add(entry)
    }
}
