//! The narrow interface the map codec calls through to read/write an
//! individual key or value payload once its class tag (or declared
//! generic type) has resolved to a concrete serializer.
//!
//! Per-type serializers for primitives and collections are treated as an
//! external collaborator with a narrow contract; the handful of concrete
//! implementations here exist only to drive [`crate::map_codec`] through
//! its branches in tests, not as a general serialization framework.

use std::any::{Any, TypeId};
use std::fmt;
use std::rc::Rc;

use crate::buffer::Buffer;
use crate::error::FuryResult;

/// Reads and writes the payload for one concrete runtime type.
pub trait Serializer: fmt::Debug {
    /// The concrete runtime type this serializer handles.
    fn type_id(&self) -> TypeId;

    /// Writes `value`'s payload (not including any class tag or reference
    /// flag, those are the caller's responsibility).
    fn write(&self, buf: &mut Buffer, value: &dyn Any) -> FuryResult<()>;

    /// Reads one payload, returning it as a type-erased, ref-countable
    /// value so the reference resolver can track it by identity.
    fn read(&self, buf: &mut Buffer) -> FuryResult<Rc<dyn Any>>;
}

/// `String`, length-prefixed with a `VarUint32` and encoded as UTF-8.
#[derive(Debug)]
pub struct StringSerializer;

impl Serializer for StringSerializer {
    fn type_id(&self) -> TypeId {
        TypeId::of::<String>()
    }

    fn write(&self, buf: &mut Buffer, value: &dyn Any) -> FuryResult<()> {
        let s = value.downcast_ref::<String>().expect("type tag mismatch");
        let bytes = s.as_bytes();
        buf.write_var_uint32_small7(bytes.len() as u32);
        buf.write_bytes(bytes);
        Ok(())
    }

    fn read(&self, buf: &mut Buffer) -> FuryResult<Rc<dyn Any>> {
        let len = buf.read_var_uint32_small7()? as usize;
        let bytes = buf.read_bytes(len)?.to_vec();
        let s = String::from_utf8(bytes)
            .map_err(|e| crate::error::FuryError::ProtocolMismatch(e.to_string()))?;
        Ok(Rc::new(s))
    }
}

/// `i32`, little-endian fixed-width.
#[derive(Debug)]
pub struct I32Serializer;

impl Serializer for I32Serializer {
    fn type_id(&self) -> TypeId {
        TypeId::of::<i32>()
    }

    fn write(&self, buf: &mut Buffer, value: &dyn Any) -> FuryResult<()> {
        let v = *value.downcast_ref::<i32>().expect("type tag mismatch");
        buf.write_u32_le(v as u32);
        Ok(())
    }

    fn read(&self, buf: &mut Buffer) -> FuryResult<Rc<dyn Any>> {
        Ok(Rc::new(buf.read_u32_le()? as i32))
    }
}

/// `i64`, little-endian fixed-width.
#[derive(Debug)]
pub struct I64Serializer;

impl Serializer for I64Serializer {
    fn type_id(&self) -> TypeId {
        TypeId::of::<i64>()
    }

    fn write(&self, buf: &mut Buffer, value: &dyn Any) -> FuryResult<()> {
        let v = *value.downcast_ref::<i64>().expect("type tag mismatch");
        buf.write_u64_le(v as u64);
        Ok(())
    }

    fn read(&self, buf: &mut Buffer) -> FuryResult<Rc<dyn Any>> {
        Ok(Rc::new(buf.read_u64_le()? as i64))
    }
}

/// `f64`, little-endian IEEE-754 bit pattern.
#[derive(Debug)]
pub struct F64Serializer;

impl Serializer for F64Serializer {
    fn type_id(&self) -> TypeId {
        TypeId::of::<f64>()
    }

    fn write(&self, buf: &mut Buffer, value: &dyn Any) -> FuryResult<()> {
        let v = *value.downcast_ref::<f64>().expect("type tag mismatch");
        buf.write_u64_le(v.to_bits());
        Ok(())
    }

    fn read(&self, buf: &mut Buffer) -> FuryResult<Rc<dyn Any>> {
        Ok(Rc::new(f64::from_bits(buf.read_u64_le()?)))
    }
}

/// `bool`, one byte.
#[derive(Debug)]
pub struct BoolSerializer;

impl Serializer for BoolSerializer {
    fn type_id(&self) -> TypeId {
        TypeId::of::<bool>()
    }

    fn write(&self, buf: &mut Buffer, value: &dyn Any) -> FuryResult<()> {
        let v = *value.downcast_ref::<bool>().expect("type tag mismatch");
        buf.write_u8(v as u8);
        Ok(())
    }

    fn read(&self, buf: &mut Buffer) -> FuryResult<Rc<dyn Any>> {
        Ok(Rc::new(buf.read_u8()? != 0))
    }
}
