//! Propagates declared element types down into nested serializer calls.

use std::any::TypeId;

/// A statically-declared generic type parameter, e.g. the `String` in a
/// declared `Map<String, Integer>` field.
#[derive(Debug, Clone)]
pub struct GenericType {
    pub concrete_class: TypeId,
    pub type_parameters: Vec<GenericType>,
    /// True when the declared type fully determines the concrete runtime
    /// class (a final/leaf class), letting the element's class tag be
    /// omitted from the wire.
    pub is_monomorphic: bool,
}

impl GenericType {
    pub fn monomorphic(concrete_class: TypeId) -> Self {
        Self {
            concrete_class,
            type_parameters: Vec::new(),
            is_monomorphic: true,
        }
    }

    pub fn polymorphic(concrete_class: TypeId) -> Self {
        Self {
            concrete_class,
            type_parameters: Vec::new(),
            is_monomorphic: false,
        }
    }

    pub fn with_type_parameters(mut self, params: Vec<GenericType>) -> Self {
        self.type_parameters = params;
        self
    }
}

/// An ambient stack of [`GenericType`]s, pushed and popped around each
/// element write/read so that nested collections see their own declared
/// element types rather than their container's.
#[derive(Default)]
pub struct GenericsStack {
    stack: Vec<GenericType>,
}

impl GenericsStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, generic: GenericType) {
        self.stack.push(generic);
    }

    pub fn pop(&mut self) -> Option<GenericType> {
        self.stack.pop()
    }

    pub fn current(&self) -> Option<&GenericType> {
        self.stack.last()
    }

    /// Runs `f` with `generic` pushed on top of the stack, popping it
    /// afterward even if `f` returns an error. This is the scoped
    /// push/pop pattern callers should prefer over manual push/pop pairs.
    pub fn with_pushed<T>(&mut self, generic: GenericType, f: impl FnOnce(&mut Self) -> T) -> T {
        self.push(generic);
        let result = f(self);
        self.pop();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_push_pop_restores_previous_top() {
        let mut stack = GenericsStack::new();
        stack.push(GenericType::monomorphic(TypeId::of::<i32>()));
        stack.with_pushed(GenericType::monomorphic(TypeId::of::<String>()), |s| {
            assert_eq!(
                s.current().unwrap().concrete_class,
                TypeId::of::<String>()
            );
        });
        assert_eq!(stack.current().unwrap().concrete_class, TypeId::of::<i32>());
    }
}
