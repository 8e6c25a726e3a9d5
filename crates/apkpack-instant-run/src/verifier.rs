//! Decides whether a changed class can be hot swapped.
//!
//! A hot swap replaces method bodies in a running process. Anything that
//! changes the shape of a class (hierarchy, fields, method set, annotations
//! visible at runtime) or runs only once (static initializers) needs a cold
//! restart.

use crate::status::VerifierStatus;
use apkpack_classfile::access::{ACC_FINAL, ACC_PUBLIC};
use apkpack_classfile::{Annotation, ClassFile, ClassMember, ElementValue, MemberRef};

/// Marker annotation (class retention) that opts a class or method out of
/// hot swapping.
pub const DISABLE_ANNOTATION: &str = "Lcom/android/tools/ir/api/DisableInstantRun;";

const CLASS_INITIALIZER: &str = "<clinit>";

/// `java/lang/Class` lookups that hand out members by name.
const REFLECTIVE_CLASS_METHODS: &[&str] = &[
    "getDeclaredMethod",
    "getDeclaredMethods",
    "getMethod",
    "getMethods",
    "getDeclaredField",
    "getDeclaredFields",
    "getField",
    "getFields",
    "getDeclaredConstructor",
    "getDeclaredConstructors",
    "getConstructor",
    "getConstructors",
];

/// How the second list of a comparison differs from the first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Diff {
    None,
    Addition,
    Removal,
    Change,
}

/// Compare two lists as multisets under `eq`.
///
/// Unmatched elements on both sides in equal numbers count as a change,
/// otherwise the side with leftovers decides between removal and addition.
pub(crate) fn diff_list<T>(one: &[T], two: &[T], eq: impl Fn(&T, &T) -> bool) -> Diff {
    let unmatched = |from: &[T], against: &[T]| {
        let mut remaining: Vec<&T> = from.iter().collect();
        for element in against {
            if let Some(pos) = remaining.iter().position(|candidate| eq(candidate, element)) {
                remaining.remove(pos);
            }
        }
        remaining.len()
    };
    let only_in_one = unmatched(one, two);
    let only_in_two = unmatched(two, one);

    if only_in_one > 0 && only_in_one == only_in_two {
        Diff::Change
    } else if only_in_one > 0 {
        Diff::Removal
    } else if only_in_two > 0 {
        Diff::Addition
    } else {
        Diff::None
    }
}

/// Parse and compare two versions of a class.
pub fn verify_class_bytes(
    original: &[u8],
    updated: &[u8],
) -> apkpack_classfile::Result<VerifierStatus> {
    let original = ClassFile::parse(original)?;
    let updated = ClassFile::parse(updated)?;
    Ok(verify_classes(&original, &updated))
}

/// First incompatibility between two versions of a class, or
/// [`VerifierStatus::Compatible`].
pub fn verify_classes(original: &ClassFile, updated: &ClassFile) -> VerifierStatus {
    if original.super_class != updated.super_class {
        return VerifierStatus::ParentClassChanged;
    }
    if diff_list(&original.interfaces, &updated.interfaces, |a, b| a == b) != Diff::None {
        return VerifierStatus::ImplementedInterfacesChange;
    }
    if diff_list(
        &original.runtime_visible_annotations,
        &updated.runtime_visible_annotations,
        annotations_equal,
    ) != Diff::None
    {
        return VerifierStatus::ClassAnnotationChange;
    }
    // Any new version of a disabled class needs a restart.
    if original
        .runtime_invisible_annotations
        .iter()
        .any(|a| a.type_descriptor == DISABLE_ANNOTATION)
    {
        return VerifierStatus::InstantRunDisabled;
    }

    match verify_fields(original, updated) {
        VerifierStatus::Compatible => verify_methods(original, updated),
        change => change,
    }
}

fn verify_fields(original: &ClassFile, updated: &ClassFile) -> VerifierStatus {
    let diff = diff_list(&original.fields, &updated.fields, |a, b| {
        a.name == b.name
            && a.descriptor == b.descriptor
            && a.access_flags == b.access_flags
            && a.constant_value == b.constant_value
    });

    match diff {
        Diff::None => VerifierStatus::Compatible,
        // Resource ids are constants inlined by callers; report them apart.
        _ if is_r_class(original) => VerifierStatus::RClassChange,
        Diff::Addition => VerifierStatus::FieldAdded,
        Diff::Removal => VerifierStatus::FieldRemoved,
        Diff::Change => VerifierStatus::FieldTypeChange,
    }
}

/// A generated resource class such as `com/example/R$string`.
fn is_r_class(class: &ClassFile) -> bool {
    let simple_name = class.simple_name();
    let Some(kind) = simple_name.strip_prefix("R$") else {
        return false;
    };
    simple_name.len() != class.this_class.len()
        && class.access_flags & ACC_PUBLIC != 0
        && class.access_flags & ACC_FINAL != 0
        && class.enclosing_method.is_none()
        && class.interfaces.is_empty()
        && class.super_class.as_deref() == Some("java/lang/Object")
        && kind.chars().next().is_some_and(char::is_lowercase)
}

fn verify_methods(original: &ClassFile, updated: &ClassFile) -> VerifierStatus {
    let mut unvisited: Vec<bool> = vec![true; updated.methods.len()];

    for method in &original.methods {
        let Some(index) = updated
            .methods
            .iter()
            .position(|m| m.name == method.name && m.descriptor == method.descriptor)
        else {
            // Reflection may still list a deleted method, so restart. A
            // removed static initializer never runs again anyway.
            return if method.name == CLASS_INITIALIZER {
                VerifierStatus::Compatible
            } else {
                VerifierStatus::MethodDeleted
            };
        };
        unvisited[index] = false;
        let updated_method = &updated.methods[index];

        let change = if method.name == CLASS_INITIALIZER {
            if same_body(method, updated_method) {
                VerifierStatus::Compatible
            } else {
                VerifierStatus::StaticInitializerChange
            }
        } else {
            verify_method(method, updated_method)
        };
        if change != VerifierStatus::Compatible {
            return change;
        }
    }

    if unvisited.into_iter().any(|pending| pending) {
        return VerifierStatus::MethodAdded;
    }
    VerifierStatus::Compatible
}

fn verify_method(original: &ClassMember, updated: &ClassMember) -> VerifierStatus {
    if diff_list(
        &original.runtime_visible_annotations,
        &updated.runtime_visible_annotations,
        annotations_equal,
    ) != Diff::None
    {
        return VerifierStatus::MethodAnnotationChange;
    }

    // Disabled methods and methods using reflection are let through only
    // while their body is unchanged.
    let disabled = original.has_invisible_annotation(DISABLE_ANNOTATION);
    let reflective = uses_reflection(updated);
    if (disabled || reflective) && !same_body(original, updated) {
        return if disabled {
            VerifierStatus::InstantRunDisabled
        } else {
            VerifierStatus::ReflectionUsed
        };
    }
    VerifierStatus::Compatible
}

/// Bodies compare by their textual rendering, which resolves constant pool
/// references and leaves line numbers out.
fn same_body(a: &ClassMember, b: &ClassMember) -> bool {
    a.name == b.name
        && a.descriptor == b.descriptor
        && a.code.as_ref().map(|code| code.textify()) == b.code.as_ref().map(|code| code.textify())
}

fn uses_reflection(method: &ClassMember) -> bool {
    method
        .code
        .as_ref()
        .is_some_and(|code| code.invocations().any(is_reflective_call))
}

fn is_reflective_call(call: &MemberRef) -> bool {
    call.owner.starts_with("java/lang/reflect/")
        || (call.owner == "java/lang/Class"
            && REFLECTIVE_CLASS_METHODS.contains(&call.name.as_str()))
}

/// Same type and the same set of element values, in any order.
fn annotations_equal(a: &Annotation, b: &Annotation) -> bool {
    a.type_descriptor == b.type_descriptor
        && diff_list(&a.elements, &b.elements, |(na, va), (nb, vb)| {
            na == nb && element_values_equal(va, vb)
        }) == Diff::None
}

fn element_values_equal(a: &ElementValue, b: &ElementValue) -> bool {
    match (a, b) {
        (ElementValue::Annotation(a), ElementValue::Annotation(b)) => annotations_equal(a, b),
        (ElementValue::Array(a), ElementValue::Array(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b.iter())
                    .all(|(a, b)| element_values_equal(a, b))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eq(a: &i32, b: &i32) -> bool {
        a == b
    }

    #[test]
    fn diff_list_classification() {
        assert_eq!(diff_list::<i32>(&[], &[], eq), Diff::None);
        assert_eq!(diff_list(&[1, 2], &[2, 1], eq), Diff::None);
        assert_eq!(diff_list(&[1], &[1, 2], eq), Diff::Addition);
        assert_eq!(diff_list(&[1, 2], &[1], eq), Diff::Removal);
        assert_eq!(diff_list(&[1, 2], &[1, 3], eq), Diff::Change);
        // Two removed, one added: more leftovers in the original.
        assert_eq!(diff_list(&[1, 2, 3], &[1, 4], eq), Diff::Removal);
        // Duplicates are matched one for one.
        assert_eq!(diff_list(&[1, 1], &[1], eq), Diff::Removal);
    }

    #[test]
    fn reflective_calls() {
        let call = |owner: &str, name: &str| MemberRef {
            owner: owner.into(),
            name: name.into(),
            descriptor: "()V".into(),
            interface: false,
        };
        assert!(is_reflective_call(&call("java/lang/reflect/Method", "invoke")));
        assert!(is_reflective_call(&call("java/lang/Class", "getDeclaredField")));
        assert!(!is_reflective_call(&call("java/lang/Class", "getName")));
        assert!(!is_reflective_call(&call("java/lang/String", "valueOf")));
    }
}
