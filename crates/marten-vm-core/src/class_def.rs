//! Built-in class definitions
//!
//! Each built-in class records its constructor and prototype objects plus
//! its interned name. The table is populated once at runtime construction
//! and read-only afterwards; an object with no explicit `__proto__` falls
//! back to the prototype of the class named by its `class_id`.

use marten_vm_bytecode::ConstIndex;

use crate::value::Value;

/// Identifier of a built-in class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ClassId {
    /// No class.
    Invalid = 0,
    /// Plain object.
    Object,
    /// Function object (compiled function plus environment).
    FunctionObject,
    /// Native (host) function object.
    NativeFunction,
    /// String wrapper (prototype host for string methods).
    StringObject,
    /// Array object.
    ArrayObject,
    /// Generator object.
    GeneratorObject,
    /// Promise object.
    PromiseObject,
    /// Async-function object.
    AsyncObject,
    /// Module namespace object.
    ModuleObject,
    /// Symbol wrapper (prototype host for symbol statics).
    Symbol,
}

impl ClassId {
    /// All populated class ids, in table order.
    pub const ALL: [ClassId; 10] = [
        ClassId::Object,
        ClassId::FunctionObject,
        ClassId::NativeFunction,
        ClassId::StringObject,
        ClassId::ArrayObject,
        ClassId::GeneratorObject,
        ClassId::PromiseObject,
        ClassId::AsyncObject,
        ClassId::ModuleObject,
        ClassId::Symbol,
    ];

    /// Diagnostic name.
    pub const fn name(self) -> &'static str {
        match self {
            ClassId::Invalid => "Invalid",
            ClassId::Object => "Object",
            ClassId::FunctionObject => "Function",
            ClassId::NativeFunction => "Function",
            ClassId::StringObject => "String",
            ClassId::ArrayObject => "Array",
            ClassId::GeneratorObject => "Generator",
            ClassId::PromiseObject => "Promise",
            ClassId::AsyncObject => "AsyncFunction",
            ClassId::ModuleObject => "Module",
            ClassId::Symbol => "Symbol",
        }
    }
}

/// One built-in class: constructor, prototype, interned name.
#[derive(Debug, Clone)]
pub struct ClassDef {
    /// Which class this is.
    pub id: ClassId,
    /// Interned class name.
    pub name: ConstIndex,
    /// The constructor value installed on the global object.
    pub constructor: Value,
    /// The prototype object instances inherit from.
    pub prototype: Value,
}

/// Table of built-in classes, indexed by [`ClassId`].
#[derive(Default)]
pub struct ClassDefTable {
    defs: Vec<Option<ClassDef>>,
}

impl ClassDefTable {
    /// Empty table.
    pub fn new() -> Self {
        Self { defs: Vec::new() }
    }

    /// Install a class definition.
    pub fn register(&mut self, def: ClassDef) {
        let idx = def.id as usize;
        if self.defs.len() <= idx {
            self.defs.resize(idx + 1, None);
        }
        self.defs[idx] = Some(def);
    }

    /// Definition for `id`, if registered.
    pub fn get(&self, id: ClassId) -> Option<&ClassDef> {
        self.defs.get(id as usize)?.as_ref()
    }

    /// Prototype object for `id` (`undefined` when unregistered).
    pub fn prototype(&self, id: ClassId) -> Value {
        self.get(id)
            .map(|d| d.prototype.clone())
            .unwrap_or_default()
    }

    /// Visit every value in the table (GC rooting).
    pub fn trace(&mut self, visitor: &mut dyn FnMut(&mut *mut marten_vm_gc::GcHeader)) {
        for def in self.defs.iter_mut().flatten() {
            def.constructor.trace(visitor);
            def.prototype.trace(visitor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let mut table = ClassDefTable::new();
        table.register(ClassDef {
            id: ClassId::ArrayObject,
            name: ConstIndex::new(1),
            constructor: Value::undefined(),
            prototype: Value::int(7),
        });
        assert!(table.get(ClassId::ArrayObject).is_some());
        assert!(table.get(ClassId::PromiseObject).is_none());
        assert_eq!(table.prototype(ClassId::ArrayObject).as_int(), Some(7));
        assert!(table.prototype(ClassId::Symbol).is_undefined());
    }
}
