use apkpack_classfile::{opcode_name, ClassFile, ConstValue, Error, Operand};
use apkpack_test_utils::{
    AnnotationSpec, ClassBuilder, FieldSpec, Insn, MethodSpec, ACC_FINAL, ACC_PUBLIC, ACC_STATIC,
};
use pretty_assertions::assert_eq;

fn hello_class() -> ClassBuilder {
    ClassBuilder::new("com/example/Hello")
        .interface("java/lang/Runnable")
        .field(FieldSpec::new(ACC_PUBLIC | ACC_STATIC | ACC_FINAL, "ANSWER", "I").with_constant(42))
        .method(MethodSpec::new(
            ACC_PUBLIC,
            "run",
            "()V",
            vec![
                Insn::field(0xb2, "java/lang/System", "out", "Ljava/io/PrintStream;"),
                Insn::LdcString("hello".into()),
                Insn::invoke(0xb6, "java/io/PrintStream", "println", "(Ljava/lang/String;)V"),
                Insn::Op(0xb1),
            ],
        ))
        .visible_annotation(AnnotationSpec::new("Lcom/example/Marker;").with_int("value", 3))
}

#[test]
fn parses_header_members_and_annotations() {
    let class = ClassFile::parse(&hello_class().build()).unwrap();

    assert_eq!(class.major_version, 52);
    assert_eq!(class.this_class, "com/example/Hello");
    assert_eq!(class.simple_name(), "Hello");
    assert_eq!(class.super_class.as_deref(), Some("java/lang/Object"));
    assert_eq!(class.interfaces, vec!["java/lang/Runnable".to_string()]);
    assert!(class.enclosing_method.is_none());

    assert_eq!(class.fields.len(), 1);
    assert_eq!(class.fields[0].constant_value, Some(ConstValue::Int(42)));

    let annotation = &class.runtime_visible_annotations[0];
    assert_eq!(annotation.type_internal_name(), Some("com/example/Marker"));
    assert_eq!(annotation.elements.len(), 1);
}

#[test]
fn method_body_is_decoded_with_resolved_references() {
    let class = ClassFile::parse(&hello_class().build()).unwrap();
    let run = class.find_method("run", "()V").unwrap();
    let code = run.code.as_ref().unwrap();

    let names: Vec<_> = code
        .instructions
        .iter()
        .map(|insn| opcode_name(insn.opcode))
        .collect();
    assert_eq!(names, vec!["getstatic", "ldc", "invokevirtual", "return"]);

    let invoked: Vec<_> = code
        .invocations()
        .map(|m| format!("{}.{}", m.owner, m.name))
        .collect();
    assert_eq!(invoked, vec!["java/io/PrintStream.println".to_string()]);

    assert!(matches!(&code.instructions[1].operand, Operand::Constant(_)));
    assert_eq!(
        code.textify(),
        "    GETSTATIC java/lang/System.out : Ljava/io/PrintStream;\n\
         \x20   LDC \"hello\"\n\
         \x20   INVOKEVIRTUAL java/io/PrintStream.println (Ljava/lang/String;)V\n\
         \x20   RETURN\n\
         \x20   MAXSTACK = 4\n\
         \x20   MAXLOCALS = 4\n"
    );
}

#[test]
fn line_numbers_do_not_affect_the_textified_body() {
    let plain = ClassBuilder::new("A").method(MethodSpec::empty("f", "()V"));
    let with_lines = ClassBuilder::new("A").method(MethodSpec::empty("f", "()V").with_line(0, 17));

    let plain = ClassFile::parse(&plain.build()).unwrap();
    let with_lines = ClassFile::parse(&with_lines.build()).unwrap();
    let a = plain.methods[0].code.as_ref().unwrap();
    let b = with_lines.methods[0].code.as_ref().unwrap();

    assert!(a.line_numbers.is_empty());
    assert_eq!(b.line_numbers.len(), 1);
    assert_eq!(a.textify(), b.textify());
}

#[test]
fn branches_render_as_labels() {
    let class = ClassBuilder::new("Loop")
        .method(MethodSpec::new(
            ACC_PUBLIC,
            "spin",
            "()V",
            vec![Insn::Op(0x00), Insn::Branch(0xa7, -1)],
        ))
        .build();
    let class = ClassFile::parse(&class).unwrap();
    let text = class.methods[0].code.as_ref().unwrap().textify();
    assert!(text.starts_with("  L0\n    NOP\n    GOTO L0\n"), "{text}");
}

#[test]
fn enclosing_method_and_invisible_annotations() {
    let class = ClassBuilder::new("Outer$1")
        .enclosing_class("Outer")
        .invisible_annotation(AnnotationSpec::new("Lcom/example/Hidden;"))
        .method(
            MethodSpec::empty("m", "()V")
                .with_invisible_annotation(AnnotationSpec::new("Lcom/example/Hidden;")),
        )
        .build();
    let class = ClassFile::parse(&class).unwrap();

    assert_eq!(class.enclosing_method.as_ref().unwrap().class, "Outer");
    assert!(class.enclosing_method.as_ref().unwrap().method.is_none());
    assert_eq!(class.runtime_invisible_annotations.len(), 1);
    assert!(class.methods[0].has_invisible_annotation("Lcom/example/Hidden;"));
}

#[test]
fn rejects_bad_magic_and_truncation() {
    assert!(matches!(
        ClassFile::parse(&[0, 1, 2, 3]),
        Err(Error::InvalidMagic(0x00010203))
    ));

    let bytes = hello_class().build();
    let err = ClassFile::parse(&bytes[..bytes.len() - 3]).unwrap_err();
    assert!(matches!(err, Error::UnexpectedEof), "{err}");
}
