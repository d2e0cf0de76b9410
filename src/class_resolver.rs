//! Maps concrete runtime types to [`ClassInfo`] and reads/writes the class
//! tag that identifies them on the wire.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::buffer::Buffer;
use crate::config::FuryConfig;
use crate::error::{FuryError, FuryResult};
use crate::serializer::Serializer;

/// A concrete type's wire identity plus the serializer that knows how to
/// read and write it.
#[derive(Clone)]
pub struct ClassInfo {
    pub class_id: u32,
    pub serializer: Rc<dyn Serializer>,
    pub writes_references: bool,
}

/// Single-slot memo of the last `(TypeId, ClassInfo)` looked up, so that a
/// run of same-typed entries (the common case inside a homogeneous chunk)
/// does not repeat a hash lookup per entry.
#[derive(Default)]
pub struct ClassInfoCache {
    slot: Option<(TypeId, ClassInfo)>,
}

impl ClassInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, type_id: TypeId) -> Option<&ClassInfo> {
        match &self.slot {
            Some((cached_type, info)) if *cached_type == type_id => Some(info),
            _ => None,
        }
    }

    fn set(&mut self, type_id: TypeId, info: ClassInfo) {
        self.slot = Some((type_id, info));
    }
}

/// Maps concrete runtime types (`TypeId`) to [`ClassInfo`] and back from
/// the wire's class tag.
#[derive(Default)]
pub struct ClassResolver {
    by_type: HashMap<TypeId, ClassInfo>,
    by_id: HashMap<u32, ClassInfo>,
    track_references_by_default: bool,
    ref_tracking_opt_out: HashSet<TypeId>,
}

impl ClassResolver {
    pub fn new(config: &FuryConfig) -> Self {
        Self {
            track_references_by_default: config.tracks_references(),
            ..Self::default()
        }
    }

    /// Registers a concrete type's class id and serializer.
    pub fn register(&mut self, type_id: TypeId, class_id: u32, serializer: Rc<dyn Serializer>) {
        let writes_references =
            self.track_references_by_default && !self.ref_tracking_opt_out.contains(&type_id);
        let info = ClassInfo {
            class_id,
            serializer,
            writes_references,
        };
        self.by_type.insert(type_id, info.clone());
        self.by_id.insert(class_id, info);
    }

    /// Opts a concrete type out of reference tracking even when the global
    /// policy has it enabled.
    pub fn opt_out_of_ref_tracking(&mut self, type_id: TypeId) {
        self.ref_tracking_opt_out.insert(type_id);
        if let Some(info) = self.by_type.get_mut(&type_id) {
            info.writes_references = false;
            let class_id = info.class_id;
            if let Some(by_id) = self.by_id.get_mut(&class_id) {
                by_id.writes_references = false;
            }
        }
    }

    /// The effective reference-tracking policy for a concrete type: the
    /// global default combined with any per-type opt-out.
    pub fn needs_ref_tracking(&self, type_id: TypeId) -> bool {
        self.track_references_by_default && !self.ref_tracking_opt_out.contains(&type_id)
    }

    /// Looks up `ClassInfo` for a concrete type, consulting `cache` first.
    pub fn get_class_info(
        &self,
        type_id: TypeId,
        cache: &mut ClassInfoCache,
    ) -> FuryResult<ClassInfo> {
        if let Some(info) = cache.get(type_id) {
            return Ok(info.clone());
        }
        let info = self.by_type.get(&type_id).cloned().ok_or_else(|| {
            FuryError::ProtocolMismatch(format!("no ClassInfo registered for {type_id:?}"))
        })?;
        cache.set(type_id, info.clone());
        Ok(info)
    }

    /// Writes the class tag: a `VarUint32` class id.
    pub fn write_class(&self, buf: &mut Buffer, info: &ClassInfo) {
        buf.write_var_uint32_small7(info.class_id);
    }

    /// Reads a class tag and resolves it to `ClassInfo`, populating `cache`.
    pub fn read_class_info(
        &self,
        buf: &mut Buffer,
        cache: &mut ClassInfoCache,
    ) -> FuryResult<ClassInfo> {
        let class_id = buf.read_var_uint32_small7()?;
        if let Some((_, info)) = &cache.slot {
            if info.class_id == class_id {
                return Ok(info.clone());
            }
        }
        let info = self
            .by_id
            .get(&class_id)
            .cloned()
            .ok_or_else(|| FuryError::ProtocolMismatch(format!("unknown class id {class_id}")))?;
        // We don't know the TypeId from the wire alone; cache keyed on the
        // serializer's own type so later same-class reads still hit.
        cache.set(info.serializer.type_id(), info.clone());
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::I32Serializer;

    #[test]
    fn repeated_lookup_of_same_type_hits_the_single_slot_cache() {
        let mut resolver = ClassResolver::new(&FuryConfig::new());
        let type_id = TypeId::of::<i32>();
        resolver.register(type_id, 7, Rc::new(I32Serializer));

        let mut cache = ClassInfoCache::new();
        assert!(cache.get(type_id).is_none());
        let info = resolver.get_class_info(type_id, &mut cache).unwrap();
        assert_eq!(info.class_id, 7);
        // second lookup must come from the cache slot, not the map
        assert_eq!(cache.get(type_id).unwrap().class_id, 7);
    }

    #[test]
    fn opt_out_overrides_global_tracking_policy() {
        let mut resolver = ClassResolver::new(&FuryConfig::new().with_track_references(true));
        let type_id = TypeId::of::<i32>();
        resolver.register(type_id, 7, Rc::new(I32Serializer));
        assert!(resolver.needs_ref_tracking(type_id));
        resolver.opt_out_of_ref_tracking(type_id);
        assert!(!resolver.needs_ref_tracking(type_id));
    }
}
