#![doc = include_str!("../README.md")]

pub mod buffer;
pub mod class_resolver;
pub mod config;
pub mod error;
pub mod generics;
pub mod map_codec;
pub mod metastring;
pub mod ref_resolver;
pub mod serializer;

pub use buffer::Buffer;
pub use class_resolver::{ClassInfo, ClassInfoCache, ClassResolver};
pub use config::FuryConfig;
pub use error::{FuryError, FuryResult};
pub use generics::{GenericType, GenericsStack};
pub use ref_resolver::RefResolver;
