use apkpack_instant_run::{verify_class_bytes, VerifierStatus, DISABLE_ANNOTATION};
use apkpack_test_utils::{
    AnnotationSpec, ClassBuilder, FieldSpec, Insn, MethodSpec, ACC_FINAL, ACC_PUBLIC, ACC_STATIC,
    ACC_SUPER,
};

const FOO: &str = "com/example/Foo";

fn greet(text: &str) -> MethodSpec {
    MethodSpec::new(
        ACC_PUBLIC,
        "greet",
        "()Ljava/lang/String;",
        vec![Insn::LdcString(text.into()), Insn::Op(0xb0)],
    )
}

fn reflective_greet(text: &str) -> MethodSpec {
    MethodSpec::new(
        ACC_PUBLIC,
        "greet",
        "()Ljava/lang/String;",
        vec![
            Insn::Op(0x01),
            Insn::LdcString("greet".into()),
            Insn::Op(0x01),
            Insn::invoke(
                0xb6,
                "java/lang/Class",
                "getDeclaredMethod",
                "(Ljava/lang/String;[Ljava/lang/Class;)Ljava/lang/reflect/Method;",
            ),
            Insn::Op(0x57),
            Insn::LdcString(text.into()),
            Insn::Op(0xb0),
        ],
    )
}

fn class_initializer(value: i8) -> MethodSpec {
    MethodSpec::new(
        ACC_STATIC,
        "<clinit>",
        "()V",
        vec![
            Insn::Bipush(value),
            Insn::field(0xb3, FOO, "count", "I"),
            Insn::Op(0xb1),
        ],
    )
}

fn foo() -> ClassBuilder {
    ClassBuilder::new(FOO)
        .field(FieldSpec::new(ACC_STATIC, "count", "I"))
        .method(MethodSpec::empty("<init>", "()V"))
        .method(greet("hello"))
}

fn verify(original: &ClassBuilder, updated: &ClassBuilder) -> VerifierStatus {
    verify_class_bytes(&original.build(), &updated.build()).unwrap()
}

#[test]
fn method_body_changes_are_compatible() {
    assert_eq!(verify(&foo(), &foo()), VerifierStatus::Compatible);

    let updated = ClassBuilder::new(FOO)
        .field(FieldSpec::new(ACC_STATIC, "count", "I"))
        .method(MethodSpec::empty("<init>", "()V").with_line(0, 3))
        .method(greet("bonjour"));
    assert_eq!(verify(&foo(), &updated), VerifierStatus::Compatible);
}

#[test]
fn hierarchy_changes() {
    assert_eq!(
        verify(&foo(), &foo().super_class("android/app/Activity")),
        VerifierStatus::ParentClassChanged
    );
    assert_eq!(
        verify(&foo(), &foo().interface("java/lang/Runnable")),
        VerifierStatus::ImplementedInterfacesChange
    );
    assert_eq!(
        verify(
            &foo().interface("java/lang/Runnable").interface("java/io/Closeable"),
            &foo().interface("java/io/Closeable").interface("java/lang/Runnable"),
        ),
        VerifierStatus::Compatible
    );
}

#[test]
fn class_annotations_compare_by_value() {
    let marker = |a: i32, b: i32| {
        AnnotationSpec::new("Lcom/example/Marker;")
            .with_int("a", a)
            .with_int("b", b)
    };
    let original = foo().visible_annotation(marker(1, 2));

    assert_eq!(
        verify(&original, &foo().visible_annotation(marker(1, 3))),
        VerifierStatus::ClassAnnotationChange
    );
    assert_eq!(
        verify(&original, &foo()),
        VerifierStatus::ClassAnnotationChange
    );

    let reordered = foo().visible_annotation(
        AnnotationSpec::new("Lcom/example/Marker;")
            .with_int("b", 2)
            .with_int("a", 1),
    );
    assert_eq!(verify(&original, &reordered), VerifierStatus::Compatible);

    // Invisible annotations are not available at runtime.
    let hidden = foo().invisible_annotation(AnnotationSpec::new("Lcom/example/Hidden;"));
    assert_eq!(verify(&foo(), &hidden), VerifierStatus::Compatible);
}

#[test]
fn disabled_class_always_needs_a_restart() {
    let disabled = foo().invisible_annotation(AnnotationSpec::new(DISABLE_ANNOTATION));
    assert_eq!(verify(&disabled, &disabled), VerifierStatus::InstantRunDisabled);
    // Only the previous version counts.
    assert_eq!(verify(&foo(), &disabled), VerifierStatus::Compatible);
}

#[test]
fn field_changes() {
    let with_field = |field: FieldSpec| foo().field(field);

    assert_eq!(
        verify(&foo(), &with_field(FieldSpec::new(ACC_PUBLIC, "name", "Ljava/lang/String;"))),
        VerifierStatus::FieldAdded
    );
    assert_eq!(
        verify(&with_field(FieldSpec::new(ACC_PUBLIC, "name", "Ljava/lang/String;")), &foo()),
        VerifierStatus::FieldRemoved
    );
    assert_eq!(
        verify(
            &with_field(FieldSpec::new(ACC_PUBLIC, "name", "Ljava/lang/String;")),
            &with_field(FieldSpec::new(ACC_PUBLIC, "name", "Ljava/lang/CharSequence;")),
        ),
        VerifierStatus::FieldTypeChange
    );
    assert_eq!(
        verify(
            &with_field(FieldSpec::new(ACC_STATIC | ACC_FINAL, "MAX", "I").with_constant(1)),
            &with_field(FieldSpec::new(ACC_STATIC | ACC_FINAL, "MAX", "I").with_constant(2)),
        ),
        VerifierStatus::FieldTypeChange
    );
}

#[test]
fn resource_class_field_changes() {
    let resources = |name: &str, ids: &[(&str, i32)]| {
        ids.iter().fold(
            ClassBuilder::new(name).access(ACC_PUBLIC | ACC_FINAL | ACC_SUPER),
            |class, (field, id)| {
                class.field(
                    FieldSpec::new(ACC_PUBLIC | ACC_STATIC | ACC_FINAL, field, "I")
                        .with_constant(*id),
                )
            },
        )
    };

    assert_eq!(
        verify(
            &resources("com/example/R$string", &[("app_name", 0x7f010000)]),
            &resources(
                "com/example/R$string",
                &[("app_name", 0x7f010000), ("title", 0x7f010001)]
            ),
        ),
        VerifierStatus::RClassChange
    );
    assert_eq!(
        verify(
            &resources("com/example/R$string", &[("app_name", 0x7f010000)]),
            &resources("com/example/R$string", &[("app_name", 0x7f010002)]),
        ),
        VerifierStatus::RClassChange
    );

    // Not generated resource classes.
    assert_eq!(
        verify(
            &resources("com/example/R$String", &[]),
            &resources("com/example/R$String", &[("a", 1)]),
        ),
        VerifierStatus::FieldAdded
    );
    assert_eq!(
        verify(
            &resources("R$string", &[]),
            &resources("R$string", &[("a", 1)]),
        ),
        VerifierStatus::FieldAdded
    );
    assert_eq!(
        verify(
            &ClassBuilder::new("com/example/R$id"),
            &ClassBuilder::new("com/example/R$id").field(FieldSpec::new(ACC_PUBLIC, "a", "I")),
        ),
        VerifierStatus::FieldAdded
    );
}

#[test]
fn method_set_changes() {
    let with_method = foo().method(MethodSpec::empty("extra", "()V"));
    assert_eq!(verify(&foo(), &with_method), VerifierStatus::MethodAdded);
    assert_eq!(verify(&with_method, &foo()), VerifierStatus::MethodDeleted);

    let overload = foo().method(MethodSpec::empty("greet", "(I)V"));
    assert_eq!(verify(&foo(), &overload), VerifierStatus::MethodAdded);
}

#[test]
fn static_initializer_changes() {
    let with_clinit = |value: i8| foo().method(class_initializer(value));

    assert_eq!(
        verify(&with_clinit(1), &with_clinit(1)),
        VerifierStatus::Compatible
    );
    assert_eq!(
        verify(&with_clinit(1), &with_clinit(2)),
        VerifierStatus::StaticInitializerChange
    );
    assert_eq!(
        verify(&with_clinit(1), &foo().method(class_initializer(1).with_line(0, 12))),
        VerifierStatus::Compatible
    );
    // A removed initializer will not run again anyway.
    assert_eq!(verify(&with_clinit(1), &foo()), VerifierStatus::Compatible);
    assert_eq!(verify(&foo(), &with_clinit(1)), VerifierStatus::MethodAdded);
}

#[test]
fn method_annotation_changes() {
    let annotated = |value: i32| {
        ClassBuilder::new(FOO).method(
            greet("hello")
                .with_visible_annotation(AnnotationSpec::new("Lcom/example/Api;").with_int("v", value)),
        )
    };
    assert_eq!(
        verify(&annotated(1), &annotated(1)),
        VerifierStatus::Compatible
    );
    assert_eq!(
        verify(&annotated(1), &annotated(2)),
        VerifierStatus::MethodAnnotationChange
    );
}

#[test]
fn disabled_methods_keep_their_body() {
    let class = |text: &str| {
        ClassBuilder::new(FOO)
            .method(greet(text).with_invisible_annotation(AnnotationSpec::new(DISABLE_ANNOTATION)))
    };
    assert_eq!(verify(&class("a"), &class("a")), VerifierStatus::Compatible);
    assert_eq!(
        verify(&class("a"), &class("b")),
        VerifierStatus::InstantRunDisabled
    );
}

#[test]
fn reflective_methods_keep_their_body() {
    let class = |method: MethodSpec| ClassBuilder::new(FOO).method(method);

    assert_eq!(
        verify(&class(reflective_greet("a")), &class(reflective_greet("a"))),
        VerifierStatus::Compatible
    );
    assert_eq!(
        verify(&class(greet("a")), &class(reflective_greet("a"))),
        VerifierStatus::ReflectionUsed
    );
    assert_eq!(
        verify(&class(reflective_greet("a")), &class(reflective_greet("b"))),
        VerifierStatus::ReflectionUsed
    );
    // Removing the reflective call is an ordinary body change.
    assert_eq!(
        verify(&class(reflective_greet("a")), &class(greet("a"))),
        VerifierStatus::Compatible
    );
}

#[test]
fn first_incompatibility_wins() {
    let updated = foo()
        .field(FieldSpec::new(ACC_PUBLIC, "extra", "J"))
        .method(MethodSpec::empty("extra", "()V"));
    assert_eq!(verify(&foo(), &updated), VerifierStatus::FieldAdded);
}

#[test]
fn malformed_class_is_an_error() {
    assert!(verify_class_bytes(b"not a class", &foo().build()).is_err());
}
