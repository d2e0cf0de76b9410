//! Reference tracking for objects reachable through the wire format.
//!
//! Write side keys on `Rc` pointer identity; read side keys on a dense
//! integer id assigned in encounter order.

use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

use crate::buffer::Buffer;
use crate::error::{FuryError, FuryResult};

/// One of the three reference flag bytes written ahead of a nullable,
/// possibly-shared value.
pub mod flag {
    pub const NULL: u8 = 0;
    pub const REF: u8 = 1;
    pub const NOT_NULL_VALUE: u8 = 2;
}

fn identity_key(obj: &Rc<dyn Any>) -> usize {
    Rc::as_ptr(obj) as *const () as usize
}

/// Outcome of [`RefResolver::try_preserve_ref_id`].
pub enum PreserveRefId {
    /// The wire held `NULL`.
    Null,
    /// The wire held `REF id`; the referent is already resolved and
    /// retrievable via [`RefResolver::get_read_object`].
    AlreadyRead(u32),
    /// The wire held `NOT_NULL_VALUE`; the caller must decode a fresh
    /// payload and register it with [`RefResolver::set_read_object`] under
    /// this id before returning.
    NewValue(u32),
}

/// Tracks reference identity across one serialization call.
#[derive(Default)]
pub struct RefResolver {
    write_ids: HashMap<usize, u32>,
    read_objects: Vec<Option<Rc<dyn Any>>>,
}

impl RefResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `NULL` and returns `true` if `obj` is `None`; otherwise
    /// writes nothing and returns `false`.
    pub fn write_null_flag(&self, buf: &mut Buffer, obj: &Option<Rc<dyn Any>>) -> bool {
        if obj.is_none() {
            buf.write_u8(flag::NULL);
            true
        } else {
            false
        }
    }

    /// Full reference-tracking write path for one nullable slot.
    ///
    /// Returns `true` if the flag byte written (`NULL` or `REF`) fully
    /// accounts for this value, the caller writes nothing further. Returns
    /// `false` when a `NOT_NULL_VALUE` flag was written and the caller must
    /// now write the payload.
    pub fn write_ref_or_null(&mut self, buf: &mut Buffer, obj: &Option<Rc<dyn Any>>) -> bool {
        let Some(obj) = obj else {
            buf.write_u8(flag::NULL);
            return true;
        };
        let key = identity_key(obj);
        if let Some(&id) = self.write_ids.get(&key) {
            buf.write_u8(flag::REF);
            buf.write_var_uint32_small7(id);
            true
        } else {
            let id = self.write_ids.len() as u32;
            self.write_ids.insert(key, id);
            buf.write_u8(flag::NOT_NULL_VALUE);
            false
        }
    }

    /// Reads the next reference flag and advances bookkeeping accordingly.
    pub fn try_preserve_ref_id(&mut self, buf: &mut Buffer) -> FuryResult<PreserveRefId> {
        match buf.read_u8()? {
            flag::NULL => Ok(PreserveRefId::Null),
            flag::REF => {
                let id = buf.read_var_uint32_small7()?;
                Ok(PreserveRefId::AlreadyRead(id))
            }
            flag::NOT_NULL_VALUE => {
                let id = self.read_objects.len() as u32;
                self.read_objects.push(None);
                Ok(PreserveRefId::NewValue(id))
            }
            other => Err(FuryError::ProtocolMismatch(format!(
                "unexpected reference flag byte {other}"
            ))),
        }
    }

    /// Binds a freshly decoded object to the id returned by
    /// [`RefResolver::try_preserve_ref_id`]'s `NewValue` case.
    pub fn set_read_object(&mut self, id: u32, obj: Rc<dyn Any>) {
        self.read_objects[id as usize] = Some(obj);
    }

    /// Retrieves a previously decoded object by id.
    pub fn get_read_object(&self, id: u32) -> Option<Rc<dyn Any>> {
        self.read_objects.get(id as usize).and_then(|o| o.clone())
    }
}
