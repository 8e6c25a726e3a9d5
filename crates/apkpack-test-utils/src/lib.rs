//! Fixtures shared by apkpack tests.
//!
//! [`ClassBuilder`] writes small but valid class files so verifier tests do
//! not depend on a Java compiler, and [`write_zip`] writes archives with a
//! fixed entry order.

mod class_builder;

pub use class_builder::{
    AnnotationSpec, ClassBuilder, FieldSpec, Insn, MethodSpec, ACC_FINAL, ACC_PUBLIC, ACC_STATIC,
    ACC_SUPER,
};

use std::io::Write;
use std::path::Path;

/// Write a zip at `path` holding `entries` in the given order, deflated.
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create zip parent");
    }
    let file = std::fs::File::create(path).expect("create zip");
    let mut zip = zip::ZipWriter::new(file);
    for (name, bytes) in entries {
        zip.start_file(*name, zip::write::SimpleFileOptions::default())
            .expect("start zip entry");
        zip.write_all(bytes).expect("write zip entry");
    }
    zip.finish().expect("finish zip");
}
