//! Shared fixtures for the map codec integration tests.

use std::any::{Any, TypeId};
use std::rc::Rc;

use fury_core::class_resolver::ClassResolver;
use fury_core::config::FuryConfig;
use fury_core::serializer::{BoolSerializer, F64Serializer, I32Serializer, I64Serializer, StringSerializer};

pub type Entry = (Option<Rc<dyn Any>>, Option<Rc<dyn Any>>);

/// A resolver with `String`, `i32`, `i64`, `f64`, `bool` registered under
/// stable class ids, tracking references according to `track_references`.
pub fn resolver(track_references: bool) -> ClassResolver {
    let mut resolver = ClassResolver::new(&FuryConfig::new().with_track_references(track_references));
    resolver.register(TypeId::of::<String>(), 0, Rc::new(StringSerializer));
    resolver.register(TypeId::of::<i32>(), 1, Rc::new(I32Serializer));
    resolver.register(TypeId::of::<i64>(), 2, Rc::new(I64Serializer));
    resolver.register(TypeId::of::<f64>(), 3, Rc::new(F64Serializer));
    resolver.register(TypeId::of::<bool>(), 4, Rc::new(BoolSerializer));
    resolver
}

pub fn str_entry(k: &str, v: i32) -> Entry {
    (Some(Rc::new(k.to_string()) as Rc<dyn Any>), Some(Rc::new(v) as Rc<dyn Any>))
}

pub fn null_key_entry(v: i32) -> Entry {
    (None, Some(Rc::new(v) as Rc<dyn Any>))
}

pub fn null_value_entry(k: &str) -> Entry {
    (Some(Rc::new(k.to_string()) as Rc<dyn Any>), None)
}
