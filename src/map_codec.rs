//! Chunk-framed map writer and reader.
//!
//! A map is written as a size prefix followed by a run of chunks, each
//! sharing one header byte, until per-entry type heterogeneity escalates
//! the whole remainder of the map into an unchunked, fully-generic tail.

use std::any::{Any, TypeId};
use std::rc::Rc;

use log::trace;

use crate::buffer::Buffer;
use crate::class_resolver::{ClassInfo, ClassInfoCache, ClassResolver};
use crate::error::{FuryError, FuryResult};
use crate::generics::{GenericType, GenericsStack};
use crate::ref_resolver::{flag, PreserveRefId, RefResolver};
use crate::serializer::Serializer;

/// Header bit positions within a chunk's single header byte.
pub mod header_bit {
    pub const TRACKING_KEY_REF: u8 = 1 << 0;
    pub const KEY_HAS_NULL: u8 = 1 << 1;
    pub const KEY_NOT_SAME_TYPE: u8 = 1 << 2;
    pub const TRACKING_VALUE_REF: u8 = 1 << 3;
    pub const VALUE_HAS_NULL: u8 = 1 << 4;
    pub const VALUE_NOT_SAME_TYPE: u8 = 1 << 5;
}

/// Maximum entries a single chunk may hold before it must be finalized
/// and a new one started.
pub const MAX_CHUNK_ENTRIES: u8 = 127;

type DynValue = Option<Rc<dyn Any>>;

/// One-shot parameters for a single [`write_map`] call. Rather than
/// mutable scratch state kept on a long-lived serializer, this is a value
/// consumed once per call.
#[derive(Default)]
pub struct MapWriteCall {
    pub key_tracking_ref: bool,
    pub value_tracking_ref: bool,
    pub key_generic: Option<GenericType>,
    pub value_generic: Option<GenericType>,
    pub key_serializer: Option<Rc<dyn Serializer>>,
    pub value_serializer: Option<Rc<dyn Serializer>>,
}

/// One-shot parameters for a single `read_map` call, mirroring
/// [`MapWriteCall`].
#[derive(Default)]
pub struct MapReadCall {
    pub key_tracking_ref: bool,
    pub value_tracking_ref: bool,
    pub key_generic: Option<GenericType>,
    pub value_generic: Option<GenericType>,
    pub key_serializer: Option<Rc<dyn Serializer>>,
    pub value_serializer: Option<Rc<dyn Serializer>>,
}

/// A dynamically-constructed map container that decoded entries are
/// inserted into. Stands in for full target-map-type resolution, which
/// this crate leaves to its caller.
pub trait MapContainer: Any {
    fn insert_dyn(&mut self, key: DynValue, value: DynValue);
    fn as_any(&self) -> &dyn Any;
}

/// Produces an empty container for a declared map type, or `None` if that
/// type has no accessible no-argument constructor.
pub trait MapFactory {
    fn new_container(&self, size_hint: usize) -> Option<Box<dyn MapContainer>>;
}

/// A `HashMap<K, V>`-backed container for concrete `K`/`V`, and the
/// factory that builds it. Covers the common case of a statically typed
/// destination map.
pub struct TypedHashMapContainer<K, V> {
    map: std::collections::HashMap<Option<TypedKey<K>>, Option<V>>,
}

// `HashMap` needs `Eq + Hash` keys; most Fury key types satisfy that, but
// to keep this minimal demonstration container usable for `f64` test
// values too, only `Eq`-capable keys are required via a thin newtype.
#[derive(PartialEq, Eq, Hash)]
struct TypedKey<K>(K);

impl<K: Any + Eq + std::hash::Hash + Clone, V: Any + Clone> Default for TypedHashMapContainer<K, V> {
    fn default() -> Self {
        Self {
            map: std::collections::HashMap::new(),
        }
    }
}

impl<K: Any + Eq + std::hash::Hash + Clone, V: Any + Clone> MapContainer
    for TypedHashMapContainer<K, V>
{
    fn insert_dyn(&mut self, key: DynValue, value: DynValue) {
        let key = key.map(|k| TypedKey((*k.downcast::<K>().ok().expect("key type mismatch")).clone()));
        let value = value.map(|v| (*v.downcast::<V>().ok().expect("value type mismatch")).clone());
        self.map.insert(key, value);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<K, V> TypedHashMapContainer<K, V> {
    pub fn into_map(self) -> std::collections::HashMap<Option<TypedKey<K>>, Option<V>> {
        self.map
    }

    pub fn map(&self) -> &std::collections::HashMap<Option<TypedKey<K>>, Option<V>> {
        &self.map
    }
}

impl<K> TypedKey<K> {
    pub fn into_inner(self) -> K {
        self.0
    }

    pub fn inner(&self) -> &K {
        &self.0
    }
}

/// A [`MapFactory`] that always succeeds, producing an empty
/// [`TypedHashMapContainer<K, V>`].
pub struct HashMapFactory<K, V> {
    _marker: std::marker::PhantomData<(K, V)>,
}

impl<K, V> Default for HashMapFactory<K, V> {
    fn default() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }
}

impl<K: Any + Eq + std::hash::Hash + Clone + 'static, V: Any + Clone + 'static> MapFactory
    for HashMapFactory<K, V>
{
    fn new_container(&self, _size_hint: usize) -> Option<Box<dyn MapContainer>> {
        Some(Box::<TypedHashMapContainer<K, V>>::default())
    }
}

/// Per-side chunk-local homogeneity tracking.
#[derive(Default, Clone)]
struct SideState {
    class0: Option<TypeId>,
    not_same_type: bool,
    class_tag_written: bool,
}

/// Per-chunk write-side scratch state.
#[derive(Default)]
struct ChunkState {
    chunk_size: u8,
    start_offset: usize,
    prev_key_is_null: bool,
    value_has_null: bool,
    key: SideState,
    value: SideState,
}

fn resolve_serializer(
    obj_type: TypeId,
    user_serializer: Option<&Rc<dyn Serializer>>,
    monomorphic_info: Option<&ClassInfo>,
    class_resolver: &ClassResolver,
    cache: &mut ClassInfoCache,
) -> FuryResult<(Rc<dyn Serializer>, Option<ClassInfo>)> {
    if let Some(ser) = user_serializer {
        return Ok((ser.clone(), None));
    }
    if let Some(info) = monomorphic_info {
        return Ok((info.serializer.clone(), None));
    }
    let info = class_resolver.get_class_info(obj_type, cache)?;
    Ok((info.serializer.clone(), Some(info)))
}

fn finalize_chunk(buf: &mut Buffer, chunk: &mut ChunkState, call_key_tracking_ref: bool, call_value_tracking_ref: bool) {
    if chunk.chunk_size == 0 {
        return;
    }
    let mut header = 0u8;
    if call_key_tracking_ref {
        header |= header_bit::TRACKING_KEY_REF;
    }
    if chunk.prev_key_is_null {
        header |= header_bit::KEY_HAS_NULL;
    }
    if chunk.key.not_same_type {
        header |= header_bit::KEY_NOT_SAME_TYPE;
    }
    if call_value_tracking_ref {
        header |= header_bit::TRACKING_VALUE_REF;
    }
    if chunk.value_has_null {
        header |= header_bit::VALUE_HAS_NULL;
    }
    if chunk.value.not_same_type {
        header |= header_bit::VALUE_NOT_SAME_TYPE;
    }
    let chunk_size = chunk.chunk_size;
    let start_offset = chunk.start_offset;
    trace!("finalizing chunk of {chunk_size} entries with header {header:#08b}");
    buf.write_at(start_offset, |b| {
        b.write_u8(chunk_size);
        b.write_u8(header);
    });
    *chunk = ChunkState::default();
}

#[allow(clippy::too_many_arguments)]
fn write_key_side(
    buf: &mut Buffer,
    key: &DynValue,
    chunk: &mut ChunkState,
    tagged: bool,
    tracking_ref: bool,
    user_serializer: Option<&Rc<dyn Serializer>>,
    monomorphic_info: Option<&ClassInfo>,
    class_resolver: &ClassResolver,
    ref_resolver: &mut RefResolver,
    cache: &mut ClassInfoCache,
) -> FuryResult<()> {
    let Some(k) = key else {
        buf.write_u8(flag::NULL);
        return Ok(());
    };

    let (serializer, info_opt) = resolve_serializer(
        (**k).type_id(),
        user_serializer,
        monomorphic_info,
        class_resolver,
        cache,
    )?;

    if !tagged {
        return write_plain_or_ref(buf, k, &serializer, tracking_ref, ref_resolver);
    }

    if chunk.key.not_same_type {
        if tracking_ref {
            let as_opt = Some(k.clone());
            if !ref_resolver.write_ref_or_null(buf, &as_opt) {
                class_resolver.write_class(buf, info_opt.as_ref().expect("tagged side has ClassInfo"));
                serializer.write(buf, &**k)?;
            }
        } else {
            class_resolver.write_class(buf, info_opt.as_ref().expect("tagged side has ClassInfo"));
            serializer.write(buf, &**k)?;
        }
    } else {
        if !chunk.key.class_tag_written {
            class_resolver.write_class(buf, info_opt.as_ref().expect("tagged side has ClassInfo"));
            chunk.key.class_tag_written = true;
        }
        write_plain_or_ref(buf, k, &serializer, tracking_ref, ref_resolver)?;
    }
    Ok(())
}

fn write_plain_or_ref(
    buf: &mut Buffer,
    obj: &Rc<dyn Any>,
    serializer: &Rc<dyn Serializer>,
    tracking_ref: bool,
    ref_resolver: &mut RefResolver,
) -> FuryResult<()> {
    if tracking_ref {
        let as_opt = Some(obj.clone());
        if !ref_resolver.write_ref_or_null(buf, &as_opt) {
            serializer.write(buf, &**obj)?;
        }
    } else {
        serializer.write(buf, &**obj)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn write_value_side(
    buf: &mut Buffer,
    value: &DynValue,
    chunk: &mut ChunkState,
    tagged: bool,
    tracking_ref: bool,
    needs_null_disambiguation: bool,
    user_serializer: Option<&Rc<dyn Serializer>>,
    monomorphic_info: Option<&ClassInfo>,
    class_resolver: &ClassResolver,
    ref_resolver: &mut RefResolver,
    cache: &mut ClassInfoCache,
) -> FuryResult<()> {
    let Some(v) = value else {
        buf.write_u8(flag::NULL);
        return Ok(());
    };

    let (serializer, info_opt) = resolve_serializer(
        (**v).type_id(),
        user_serializer,
        monomorphic_info,
        class_resolver,
        cache,
    )?;

    if !tagged {
        if tracking_ref {
            return write_plain_or_ref(buf, v, &serializer, true, ref_resolver);
        }
        if needs_null_disambiguation {
            buf.write_u8(flag::NOT_NULL_VALUE);
        }
        serializer.write(buf, &**v)?;
        return Ok(());
    }

    if tracking_ref {
        let as_opt = Some(v.clone());
        if !ref_resolver.write_ref_or_null(buf, &as_opt) {
            class_resolver.write_class(buf, info_opt.as_ref().expect("tagged side has ClassInfo"));
            serializer.write(buf, &**v)?;
        }
        return Ok(());
    }

    // Not ref-tracked: the NULL/NOT_NULL_VALUE disambiguator (needed when
    // this chunk mixes null and non-null values) must be the very first
    // byte of the entry, ahead of any class tag. Writing the tag first
    // would leave a reader unable to tell the disambiguator apart from the
    // tag's own leading byte whenever a class id happens to collide with a
    // flag value (class id 0 looks exactly like NULL).
    if needs_null_disambiguation {
        buf.write_u8(flag::NOT_NULL_VALUE);
    }
    if chunk.value.not_same_type {
        class_resolver.write_class(buf, info_opt.as_ref().expect("tagged side has ClassInfo"));
    } else if !chunk.value.class_tag_written {
        class_resolver.write_class(buf, info_opt.as_ref().expect("tagged side has ClassInfo"));
        chunk.value.class_tag_written = true;
    }
    serializer.write(buf, &**v)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn write_generic_side(
    buf: &mut Buffer,
    value: &DynValue,
    user_serializer: Option<&Rc<dyn Serializer>>,
    monomorphic_info: Option<&ClassInfo>,
    class_resolver: &ClassResolver,
    ref_resolver: &mut RefResolver,
    cache: &mut ClassInfoCache,
) -> FuryResult<()> {
    let Some(v) = value else {
        buf.write_u8(flag::NULL);
        return Ok(());
    };
    let (serializer, info_opt) = resolve_serializer(
        (**v).type_id(),
        user_serializer,
        monomorphic_info,
        class_resolver,
        cache,
    )?;
    let as_opt = Some(v.clone());
    if !ref_resolver.write_ref_or_null(buf, &as_opt) {
        if let Some(info) = &info_opt {
            class_resolver.write_class(buf, info);
        }
        serializer.write(buf, &**v)?;
    }
    Ok(())
}

/// Writes a map's wire form.
pub fn write_map(
    buf: &mut Buffer,
    entries: &[(DynValue, DynValue)],
    call: MapWriteCall,
    class_resolver: &ClassResolver,
    ref_resolver: &mut RefResolver,
    generics: &mut GenericsStack,
) -> FuryResult<()> {
    buf.write_var_uint32_small7(entries.len() as u32);

    let mut key_cache = ClassInfoCache::new();
    let mut value_cache = ClassInfoCache::new();

    let key_is_monomorphic = call.key_generic.as_ref().is_some_and(|g| g.is_monomorphic);
    let value_is_monomorphic = call.value_generic.as_ref().is_some_and(|g| g.is_monomorphic);
    let key_tagged = call.key_serializer.is_none() && !key_is_monomorphic;
    let value_tagged = call.value_serializer.is_none() && !value_is_monomorphic;

    let key_monomorphic_info = if key_is_monomorphic && call.key_serializer.is_none() {
        Some(class_resolver.get_class_info(
            call.key_generic.as_ref().unwrap().concrete_class,
            &mut key_cache,
        )?)
    } else {
        None
    };
    let value_monomorphic_info = if value_is_monomorphic && call.value_serializer.is_none() {
        Some(class_resolver.get_class_info(
            call.value_generic.as_ref().unwrap().concrete_class,
            &mut value_cache,
        )?)
    } else {
        None
    };

    let mut chunk = ChunkState::default();
    let mut unchunked = false;

    for (key, value) in entries {
        if unchunked {
            push_generic(generics, &call.key_generic, |_| {
                write_generic_side(
                    buf,
                    key,
                    call.key_serializer.as_ref(),
                    key_monomorphic_info.as_ref(),
                    class_resolver,
                    ref_resolver,
                    &mut key_cache,
                )
            })?;
            push_generic(generics, &call.value_generic, |_| {
                write_generic_side(
                    buf,
                    value,
                    call.value_serializer.as_ref(),
                    value_monomorphic_info.as_ref(),
                    class_resolver,
                    ref_resolver,
                    &mut value_cache,
                )
            })?;
            continue;
        }

        let key_is_null = key.is_none();
        let value_is_null = value.is_none();
        let key_type = if key_tagged {
            key.as_ref().map(|k| (**k).type_id())
        } else {
            None
        };
        let value_type = if value_tagged {
            value.as_ref().map(|v| (**v).type_id())
        } else {
            None
        };

        let mut finalize_needed = false;
        if chunk.chunk_size > 0 {
            if key_is_null || chunk.prev_key_is_null {
                finalize_needed = true;
            }
            if value_is_null && !chunk.value_has_null {
                finalize_needed = true;
            }
            if chunk.chunk_size == MAX_CHUNK_ENTRIES {
                finalize_needed = true;
            }
        }
        if finalize_needed {
            finalize_chunk(buf, &mut chunk, call.key_tracking_ref, call.value_tracking_ref);
        }

        if chunk.chunk_size > 0 {
            // A mismatch is decided against the chunk as it was actually written so
            // far (single up-front class tag per side), never by mutating it in
            // place: a chunk already closed with `finalize_chunk` must keep the
            // header its entries actually earned.
            let key_mismatch = key_tagged && chunk.key.class0.is_some() && chunk.key.class0 != key_type;
            let value_mismatch =
                value_tagged && chunk.value.class0.is_some() && chunk.value.class0 != value_type;

            if key_mismatch && value_mismatch {
                trace!("heterogeneity escalated on both sides; switching to unchunked mode");
                finalize_chunk(buf, &mut chunk, call.key_tracking_ref, call.value_tracking_ref);
                buf.write_u8(0);
                unchunked = true;
                push_generic(generics, &call.key_generic, |_| {
                    write_generic_side(
                        buf,
                        key,
                        call.key_serializer.as_ref(),
                        key_monomorphic_info.as_ref(),
                        class_resolver,
                        ref_resolver,
                        &mut key_cache,
                    )
                })?;
                push_generic(generics, &call.value_generic, |_| {
                    write_generic_side(
                        buf,
                        value,
                        call.value_serializer.as_ref(),
                        value_monomorphic_info.as_ref(),
                        class_resolver,
                        ref_resolver,
                        &mut value_cache,
                    )
                })?;
                continue;
            }
            if key_mismatch || value_mismatch {
                finalize_chunk(buf, &mut chunk, call.key_tracking_ref, call.value_tracking_ref);
            }
        }

        if chunk.chunk_size == 0 {
            chunk.start_offset = buf.reserve(2);
            chunk.key.class0 = key_type;
            chunk.value.class0 = value_type;
        }

        if value_is_null {
            chunk.value_has_null = true;
        }
        let needs_null_disambiguation = chunk.value_has_null;
        chunk.prev_key_is_null = key_is_null;
        chunk.chunk_size += 1;

        push_generic(generics, &call.key_generic, |_| {
            write_key_side(
                buf,
                key,
                &mut chunk,
                key_tagged,
                call.key_tracking_ref,
                call.key_serializer.as_ref(),
                key_monomorphic_info.as_ref(),
                class_resolver,
                ref_resolver,
                &mut key_cache,
            )
        })?;
        push_generic(generics, &call.value_generic, |_| {
            write_value_side(
                buf,
                value,
                &mut chunk,
                value_tagged,
                call.value_tracking_ref,
                needs_null_disambiguation,
                call.value_serializer.as_ref(),
                value_monomorphic_info.as_ref(),
                class_resolver,
                ref_resolver,
                &mut value_cache,
            )
        })?;
    }

    finalize_chunk(buf, &mut chunk, call.key_tracking_ref, call.value_tracking_ref);
    Ok(())
}

fn push_generic<T>(
    generics: &mut GenericsStack,
    generic: &Option<GenericType>,
    f: impl FnOnce(&mut GenericsStack) -> T,
) -> T {
    match generic {
        Some(g) => generics.with_pushed(g.clone(), f),
        None => f(generics),
    }
}

// ---------------------------------------------------------------------
// Read path
// ---------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn read_side_tracked_or_plain(
    buf: &mut Buffer,
    tracking_ref: bool,
    serializer: &Rc<dyn Serializer>,
    ref_resolver: &mut RefResolver,
) -> FuryResult<DynValue> {
    if tracking_ref {
        match ref_resolver.try_preserve_ref_id(buf)? {
            PreserveRefId::Null => Ok(None),
            PreserveRefId::AlreadyRead(id) => Ok(ref_resolver.get_read_object(id)),
            PreserveRefId::NewValue(id) => {
                let obj = serializer.read(buf)?;
                ref_resolver.set_read_object(id, obj.clone());
                Ok(Some(obj))
            }
        }
    } else {
        Ok(Some(serializer.read(buf)?))
    }
}

#[allow(clippy::too_many_arguments)]
fn read_key_side(
    buf: &mut Buffer,
    chunk_has_null: bool,
    not_same_type: bool,
    is_first: bool,
    side_cache: &mut Option<Rc<dyn Serializer>>,
    tagged: bool,
    tracking_ref: bool,
    user_serializer: Option<&Rc<dyn Serializer>>,
    monomorphic_info: Option<&ClassInfo>,
    class_resolver: &ClassResolver,
    ref_resolver: &mut RefResolver,
    cache: &mut ClassInfoCache,
) -> FuryResult<DynValue> {
    if chunk_has_null {
        let flag_byte = buf.read_u8()?;
        if flag_byte != flag::NULL {
            return Err(FuryError::ProtocolMismatch(format!(
                "expected NULL flag for the chunk's isolated null key, found {flag_byte}"
            )));
        }
        return Ok(None);
    }

    if !tagged {
        let serializer = user_serializer
            .cloned()
            .or_else(|| monomorphic_info.map(|i| i.serializer.clone()))
            .expect("untagged side always has a known serializer");
        return read_side_tracked_or_plain(buf, tracking_ref, &serializer, ref_resolver);
    }

    if not_same_type {
        if tracking_ref {
            match ref_resolver.try_preserve_ref_id(buf)? {
                PreserveRefId::Null => Ok(None),
                PreserveRefId::AlreadyRead(id) => Ok(ref_resolver.get_read_object(id)),
                PreserveRefId::NewValue(id) => {
                    let info = class_resolver.read_class_info(buf, cache)?;
                    let obj = info.serializer.read(buf)?;
                    ref_resolver.set_read_object(id, obj.clone());
                    Ok(Some(obj))
                }
            }
        } else {
            let info = class_resolver.read_class_info(buf, cache)?;
            Ok(Some(info.serializer.read(buf)?))
        }
    } else {
        if is_first {
            let info = class_resolver.read_class_info(buf, cache)?;
            *side_cache = Some(info.serializer);
        }
        let serializer = side_cache
            .clone()
            .expect("homogeneous chunk caches its serializer on the first entry");
        read_side_tracked_or_plain(buf, tracking_ref, &serializer, ref_resolver)
    }
}

#[allow(clippy::too_many_arguments)]
fn read_value_side(
    buf: &mut Buffer,
    chunk_value_has_null: bool,
    not_same_type: bool,
    side_cache: &mut Option<Rc<dyn Serializer>>,
    tagged: bool,
    tracking_ref: bool,
    user_serializer: Option<&Rc<dyn Serializer>>,
    monomorphic_info: Option<&ClassInfo>,
    class_resolver: &ClassResolver,
    ref_resolver: &mut RefResolver,
    cache: &mut ClassInfoCache,
) -> FuryResult<DynValue> {
    if !tagged {
        if tracking_ref {
            let serializer = user_serializer
                .cloned()
                .or_else(|| monomorphic_info.map(|i| i.serializer.clone()))
                .expect("untagged side always has a known serializer");
            return read_side_tracked_or_plain(buf, tracking_ref, &serializer, ref_resolver);
        }
        if chunk_value_has_null {
            let flag_byte = buf.read_u8()?;
            if flag_byte == flag::NULL {
                return Ok(None);
            }
            if flag_byte != flag::NOT_NULL_VALUE {
                return Err(FuryError::ProtocolMismatch(format!(
                    "expected NULL or NOT_NULL_VALUE, found {flag_byte}"
                )));
            }
        }
        let serializer = user_serializer
            .cloned()
            .or_else(|| monomorphic_info.map(|i| i.serializer.clone()))
            .expect("untagged side always has a known serializer");
        return Ok(Some(serializer.read(buf)?));
    }

    if tracking_ref {
        return match ref_resolver.try_preserve_ref_id(buf)? {
            PreserveRefId::Null => Ok(None),
            PreserveRefId::AlreadyRead(id) => Ok(ref_resolver.get_read_object(id)),
            PreserveRefId::NewValue(id) => {
                let info = class_resolver.read_class_info(buf, cache)?;
                let obj = info.serializer.read(buf)?;
                ref_resolver.set_read_object(id, obj.clone());
                Ok(Some(obj))
            }
        };
    }

    // Not ref-tracked: the disambiguator, if this chunk mixes null and
    // non-null values, is always the entry's first byte, read it before
    // ever touching a class tag, matching `write_value_side`.
    if chunk_value_has_null {
        let flag_byte = buf.read_u8()?;
        if flag_byte == flag::NULL {
            return Ok(None);
        }
        if flag_byte != flag::NOT_NULL_VALUE {
            return Err(FuryError::ProtocolMismatch(format!(
                "expected NULL or NOT_NULL_VALUE, found {flag_byte}"
            )));
        }
    }

    if not_same_type {
        let info = class_resolver.read_class_info(buf, cache)?;
        Ok(Some(info.serializer.read(buf)?))
    } else {
        // Homogeneous: the class tag was written once, by whichever entry
        // was the first non-null one, not necessarily index 0 of the
        // chunk, so cache presence, not loop position, is what tells us
        // whether to expect a tag here.
        if side_cache.is_none() {
            let info = class_resolver.read_class_info(buf, cache)?;
            *side_cache = Some(info.serializer);
        }
        let serializer = side_cache
            .clone()
            .expect("homogeneous chunk caches its serializer on the first non-null entry");
        Ok(Some(serializer.read(buf)?))
    }
}

#[allow(clippy::too_many_arguments)]
fn read_generic_side(
    buf: &mut Buffer,
    user_serializer: Option<&Rc<dyn Serializer>>,
    monomorphic_info: Option<&ClassInfo>,
    class_resolver: &ClassResolver,
    ref_resolver: &mut RefResolver,
    cache: &mut ClassInfoCache,
) -> FuryResult<DynValue> {
    match ref_resolver.try_preserve_ref_id(buf)? {
        PreserveRefId::Null => Ok(None),
        PreserveRefId::AlreadyRead(id) => Ok(ref_resolver.get_read_object(id)),
        PreserveRefId::NewValue(id) => {
            let (serializer, _) = if let Some(ser) = user_serializer {
                (ser.clone(), None)
            } else if let Some(info) = monomorphic_info {
                (info.serializer.clone(), None)
            } else {
                let info = class_resolver.read_class_info(buf, cache)?;
                (info.serializer.clone(), Some(info))
            };
            let obj = serializer.read(buf)?;
            ref_resolver.set_read_object(id, obj.clone());
            Ok(Some(obj))
        }
    }
}

/// Reads a map's wire form, inserting decoded entries into a container
/// produced by `factory`.
pub fn read_map(
    buf: &mut Buffer,
    call: MapReadCall,
    factory: &dyn MapFactory,
    class_resolver: &ClassResolver,
    ref_resolver: &mut RefResolver,
    generics: &mut GenericsStack,
) -> FuryResult<Box<dyn MapContainer>> {
    let mut size = buf.read_var_uint32_small7()? as usize;
    let mut container = factory
        .new_container(size)
        .ok_or(FuryError::MissingConstructor)?;

    let mut key_cache = ClassInfoCache::new();
    let mut value_cache = ClassInfoCache::new();

    let key_is_monomorphic = call.key_generic.as_ref().is_some_and(|g| g.is_monomorphic);
    let value_is_monomorphic = call.value_generic.as_ref().is_some_and(|g| g.is_monomorphic);
    let key_tagged = call.key_serializer.is_none() && !key_is_monomorphic;
    let value_tagged = call.value_serializer.is_none() && !value_is_monomorphic;

    let key_monomorphic_info = if key_is_monomorphic && call.key_serializer.is_none() {
        Some(class_resolver.get_class_info(
            call.key_generic.as_ref().unwrap().concrete_class,
            &mut key_cache,
        )?)
    } else {
        None
    };
    let value_monomorphic_info = if value_is_monomorphic && call.value_serializer.is_none() {
        Some(class_resolver.get_class_info(
            call.value_generic.as_ref().unwrap().concrete_class,
            &mut value_cache,
        )?)
    } else {
        None
    };

    while size > 0 {
        let chunk_size = buf.read_u8()?;
        if chunk_size == 0 {
            trace!("entering unchunked tail for {size} remaining entries");
            for _ in 0..size {
                let key = push_generic(generics, &call.key_generic, |_| {
                    read_generic_side(
                        buf,
                        call.key_serializer.as_ref(),
                        key_monomorphic_info.as_ref(),
                        class_resolver,
                        ref_resolver,
                        &mut key_cache,
                    )
                })?;
                let value = push_generic(generics, &call.value_generic, |_| {
                    read_generic_side(
                        buf,
                        call.value_serializer.as_ref(),
                        value_monomorphic_info.as_ref(),
                        class_resolver,
                        ref_resolver,
                        &mut value_cache,
                    )
                })?;
                container.insert_dyn(key, value);
            }
            size = 0;
            break;
        }
        if chunk_size > MAX_CHUNK_ENTRIES {
            return Err(FuryError::ProtocolMismatch(format!(
                "chunk size {chunk_size} exceeds the {MAX_CHUNK_ENTRIES} entry maximum"
            )));
        }
        let header = buf.read_u8()?;
        let key_has_null = header & header_bit::KEY_HAS_NULL != 0;
        let key_not_same_type = header & header_bit::KEY_NOT_SAME_TYPE != 0;
        let value_has_null = header & header_bit::VALUE_HAS_NULL != 0;
        let value_not_same_type = header & header_bit::VALUE_NOT_SAME_TYPE != 0;
        let key_tracking_ref = header & header_bit::TRACKING_KEY_REF != 0;
        let value_tracking_ref = header & header_bit::TRACKING_VALUE_REF != 0;

        let mut key_side_cache: Option<Rc<dyn Serializer>> = None;
        let mut value_side_cache: Option<Rc<dyn Serializer>> = None;

        for i in 0..chunk_size {
            let is_first = i == 0;
            let key = push_generic(generics, &call.key_generic, |_| {
                read_key_side(
                    buf,
                    key_has_null,
                    key_not_same_type,
                    is_first,
                    &mut key_side_cache,
                    key_tagged,
                    key_tracking_ref,
                    call.key_serializer.as_ref(),
                    key_monomorphic_info.as_ref(),
                    class_resolver,
                    ref_resolver,
                    &mut key_cache,
                )
            })?;
            let value = push_generic(generics, &call.value_generic, |_| {
                read_value_side(
                    buf,
                    value_has_null,
                    value_not_same_type,
                    &mut value_side_cache,
                    value_tagged,
                    value_tracking_ref,
                    call.value_serializer.as_ref(),
                    value_monomorphic_info.as_ref(),
                    class_resolver,
                    ref_resolver,
                    &mut value_cache,
                )
            })?;
            container.insert_dyn(key, value);
        }
        size -= chunk_size as usize;
    }

    Ok(container)
}
