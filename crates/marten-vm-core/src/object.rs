//! The object model
//!
//! Every heap object's payload begins with [`ObjectData`]: class id, state
//! flags, a shared [`Shape`] describing its property layout, the per-object
//! property slots that layout indexes into, and the `__proto__` override.
//! Subtypes (arrays, functions, generators, promises, modules) extend the
//! base with `#[repr(C)]` prefix layout, so any payload can be viewed as an
//! `ObjectData` and downcast by class id — the Rust rendition of a virtual
//! base class, with GC traversal dispatched through the allocation vtable.
//!
//! [`ObjectRef`] is a copyable handle to a GC header. It is only valid while
//! the object is live and on the single VM thread; a moving collection
//! rewrites every reachable `ObjectRef` through value tracing.

use std::sync::Arc;

use marten_vm_bytecode::{FunctionDef, ModuleDef, Pc};
use marten_vm_gc::{ChildVisitor, GcHeader, GcKind, GcTrace, GcVTable, drop_thunk, trace_thunk};

use crate::class_def::ClassId;
use crate::job::JobQueue;
use crate::shape::{KeyResolver, Shape};
use crate::value::{Value, ValueCell};

// ==================== Property slots ====================

/// Per-slot attribute bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyFlags(u8);

impl PropertyFlags {
    /// Slot holds a getter function.
    pub const IS_GETTER: PropertyFlags = PropertyFlags(1 << 0);
    /// Slot holds a setter function.
    pub const IS_SETTER: PropertyFlags = PropertyFlags(1 << 1);
    /// Visible to enumeration.
    pub const ENUMERABLE: PropertyFlags = PropertyFlags(1 << 2);
    /// May be deleted or redefined.
    pub const CONFIGURABLE: PropertyFlags = PropertyFlags(1 << 3);
    /// May be assigned (data slots only).
    pub const WRITABLE: PropertyFlags = PropertyFlags(1 << 4);

    /// Default data-property attributes.
    pub const DEFAULT: PropertyFlags =
        PropertyFlags(Self::ENUMERABLE.0 | Self::CONFIGURABLE.0 | Self::WRITABLE.0);
    /// Read-only data-property attributes.
    pub const READ_ONLY: PropertyFlags =
        PropertyFlags(Self::ENUMERABLE.0 | Self::CONFIGURABLE.0);
    /// No attributes.
    pub const NONE: PropertyFlags = PropertyFlags(0);

    /// Bitwise-or composition.
    pub const fn union(self, other: PropertyFlags) -> PropertyFlags {
        PropertyFlags(self.0 | other.0)
    }

    /// True when every bit of `flag` is set.
    pub const fn contains(self, flag: PropertyFlags) -> bool {
        self.0 & flag.0 == flag.0
    }

    /// Copy with `flag` cleared.
    pub const fn without(self, flag: PropertyFlags) -> PropertyFlags {
        PropertyFlags(self.0 & !flag.0)
    }

    /// Accessor slot (getter or setter)?
    pub const fn is_accessor(self) -> bool {
        self.0 & (Self::IS_GETTER.0 | Self::IS_SETTER.0) != 0
    }
}

/// One property slot: the value plus its attribute bits.
///
/// Accessors and data attributes cohabit this layout; the flags
/// disambiguate.
#[derive(Debug, Clone)]
pub struct PropertySlot {
    /// Stored value (for accessors: the getter or setter function).
    pub value: Value,
    /// Attribute bits.
    pub flags: PropertyFlags,
}

// ==================== Object flags ====================

/// Per-object state bits.
#[derive(Debug, Clone, Copy)]
pub struct ObjectFlags(u8);

impl ObjectFlags {
    const EXTENSIBLE: u8 = 1 << 0;
    const FROZEN: u8 = 1 << 1;
    const SEALED: u8 = 1 << 2;
    const SET_PROTO: u8 = 1 << 3;

    fn new() -> Self {
        Self(Self::EXTENSIBLE)
    }

    /// May new properties be added?
    pub fn is_extensible(self) -> bool {
        self.0 & Self::EXTENSIBLE != 0
    }

    /// `Object.freeze` applied?
    pub fn is_frozen(self) -> bool {
        self.0 & Self::FROZEN != 0
    }

    /// `Object.seal` applied?
    pub fn is_sealed(self) -> bool {
        self.0 & Self::SEALED != 0
    }

    /// Has an explicit `__proto__` been stored?
    pub fn has_set_proto(self) -> bool {
        self.0 & Self::SET_PROTO != 0
    }

    fn set(&mut self, bit: u8, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

// ==================== Payloads ====================

/// Closure environment: captured-variable cells plus the lexical `this`
/// recorded by arrow functions.
#[derive(Debug, Default)]
pub struct ClosureEnv {
    /// One `ClosureVar` value per capture, in environment-slot order.
    pub vars: Vec<Value>,
    /// `this` captured from the defining frame (arrow functions).
    pub lexical_this: Value,
}

impl ClosureEnv {
    fn trace(&mut self, visitor: ChildVisitor<'_>) {
        for var in &mut self.vars {
            var.trace(visitor);
        }
        self.lexical_this.trace(visitor);
    }
}

/// Base payload of every heap object.
#[repr(C)]
pub struct ObjectData {
    class_id: ClassId,
    flags: ObjectFlags,
    shape: Arc<Shape>,
    properties: Vec<PropertySlot>,
    prototype: Value,
}

impl ObjectData {
    /// Fresh object of `class_id` with the given (usually empty) shape.
    pub fn new(class_id: ClassId, shape: Arc<Shape>) -> Self {
        Self {
            class_id,
            flags: ObjectFlags::new(),
            shape,
            properties: Vec::new(),
            prototype: Value::undefined(),
        }
    }

    /// Which built-in class this object belongs to.
    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    /// State bits.
    pub fn flags(&self) -> ObjectFlags {
        self.flags
    }

    /// Current shape.
    pub fn shape(&self) -> &Arc<Shape> {
        &self.shape
    }

    /// Replace the shape (transition).
    pub fn set_shape(&mut self, shape: Arc<Shape>) {
        self.shape = shape;
    }

    /// The explicit `__proto__`, if one was stored.
    pub fn prototype(&self) -> Option<&Value> {
        self.flags.has_set_proto().then_some(&self.prototype)
    }

    /// Store an explicit `__proto__` (overrides the class prototype).
    pub fn set_prototype(&mut self, proto: Value) {
        self.prototype = proto;
        self.flags.set(ObjectFlags::SET_PROTO, true);
    }

    /// Slot index of an own property.
    pub fn find_own(&self, key: marten_vm_bytecode::ConstIndex, keys: &dyn KeyResolver) -> Option<u32> {
        self.shape.find(key, keys)
    }

    /// Slot storage.
    pub fn slots(&self) -> &[PropertySlot] {
        &self.properties
    }

    /// Slot by index.
    pub fn slot(&self, idx: u32) -> &PropertySlot {
        &self.properties[idx as usize]
    }

    /// Mutable slot by index.
    pub fn slot_mut(&mut self, idx: u32) -> &mut PropertySlot {
        &mut self.properties[idx as usize]
    }

    /// Append a slot after a shape transition assigned it `idx`.
    pub fn push_slot(&mut self, idx: u32, slot: PropertySlot) {
        debug_assert_eq!(idx as usize, self.properties.len());
        self.properties.push(slot);
    }

    /// Replace the whole slot vector (shape rebuild after a deletion).
    pub fn replace_slots(&mut self, slots: Vec<PropertySlot>) {
        self.properties = slots;
    }

    /// Refuse further property additions.
    pub fn prevent_extensions(&mut self) {
        self.flags.set(ObjectFlags::EXTENSIBLE, false);
    }

    /// `Object.seal`: no additions, no deletions.
    pub fn seal(&mut self) {
        self.prevent_extensions();
        self.flags.set(ObjectFlags::SEALED, true);
        for slot in &mut self.properties {
            slot.flags = slot.flags.without(PropertyFlags::CONFIGURABLE);
        }
    }

    /// `Object.freeze`: sealed plus read-only.
    pub fn freeze(&mut self) {
        self.seal();
        self.flags.set(ObjectFlags::FROZEN, true);
        for slot in &mut self.properties {
            slot.flags = slot.flags.without(PropertyFlags::WRITABLE);
        }
    }

    fn trace(&mut self, visitor: ChildVisitor<'_>) {
        self.prototype.trace(visitor);
        for slot in &mut self.properties {
            slot.value.trace(visitor);
        }
    }
}

impl GcTrace for ObjectData {
    fn trace(&mut self, visitor: ChildVisitor<'_>) {
        ObjectData::trace(self, visitor);
    }
}

/// Array payload: base object plus dense element storage.
///
/// `length` is synthesized from `elements.len()`, not stored as a slot.
#[repr(C)]
pub struct ArrayData {
    /// Base object state.
    pub base: ObjectData,
    /// Dense element storage.
    pub elements: Vec<Value>,
}

impl GcTrace for ArrayData {
    fn trace(&mut self, visitor: ChildVisitor<'_>) {
        self.base.trace(visitor);
        for element in &mut self.elements {
            element.trace(visitor);
        }
    }
}

/// Function payload: base object plus definition and captured environment.
#[repr(C)]
pub struct FunctionData {
    /// Base object state.
    pub base: ObjectData,
    /// The compiled function.
    pub def: Arc<FunctionDef>,
    /// Captured cells and lexical `this`.
    pub env: ClosureEnv,
}

impl GcTrace for FunctionData {
    fn trace(&mut self, visitor: ChildVisitor<'_>) {
        self.base.trace(visitor);
        self.env.trace(visitor);
    }
}

/// Generator run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// Parked between `next()` calls.
    Suspended,
    /// Currently on the interpreter stack.
    Executing,
    /// Finished (returned, threw, or was force-closed).
    Closed,
}

/// Generator payload: the function plus a parked frame (stack slice + PC).
#[repr(C)]
pub struct GeneratorData {
    /// Base object state.
    pub base: ObjectData,
    /// The generator function (closure or bare definition).
    pub function: Value,
    /// Saved resume PC.
    pub pc: Pc,
    /// Saved operand-stack slice (locals first).
    pub stack: Vec<Value>,
    /// Run state.
    pub state: GeneratorState,
}

impl GcTrace for GeneratorData {
    fn trace(&mut self, visitor: ChildVisitor<'_>) {
        self.base.trace(visitor);
        self.function.trace(visitor);
        for value in &mut self.stack {
            value.trace(visitor);
        }
    }
}

/// Async-function payload: a generator with an embedded result promise.
#[repr(C)]
pub struct AsyncData {
    /// Generator state (the async body suspends the same way).
    pub generator: GeneratorData,
    /// The promise returned to the caller.
    pub res_promise: Value,
}

impl GcTrace for AsyncData {
    fn trace(&mut self, visitor: ChildVisitor<'_>) {
        self.generator.trace(visitor);
        self.res_promise.trace(visitor);
    }
}

/// Promise settlement state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    /// Not yet settled.
    Pending,
    /// Settled with a result.
    Fulfilled,
    /// Settled with a reason.
    Rejected,
}

/// Promise payload.
#[repr(C)]
pub struct PromiseData {
    /// Base object state.
    pub base: ObjectData,
    /// Settlement state.
    pub state: PromiseState,
    /// Result (fulfilled) or reason (rejected).
    pub result_or_reason: Value,
    /// Callbacks parked until fulfillment.
    pub on_fulfill: JobQueue,
    /// Callbacks parked until rejection.
    pub on_reject: JobQueue,
}

impl GcTrace for PromiseData {
    fn trace(&mut self, visitor: ChildVisitor<'_>) {
        self.base.trace(visitor);
        self.result_or_reason.trace(visitor);
        self.on_fulfill.trace(visitor);
        self.on_reject.trace(visitor);
    }
}

/// Native function payload: a host callable with an attached property
/// object.
#[repr(C)]
pub struct NativeFunctionData {
    /// Base object state (statics live here).
    pub base: ObjectData,
    /// The host callable.
    pub func: crate::value::CppFunction,
}

impl GcTrace for NativeFunctionData {
    fn trace(&mut self, visitor: ChildVisitor<'_>) {
        self.base.trace(visitor);
        // The function pointer captures nothing.
    }
}

/// Module namespace payload: export cells indexed by export slot.
#[repr(C)]
pub struct ModuleData {
    /// Base object state.
    pub base: ObjectData,
    /// The compiled module.
    pub def: Arc<ModuleDef>,
    /// Live export cells, indexed by `export_slot`.
    pub export_vars: Vec<ValueCell>,
}

impl GcTrace for ModuleData {
    fn trace(&mut self, visitor: ChildVisitor<'_>) {
        self.base.trace(visitor);
        for cell in &self.export_vars {
            cell.trace(visitor);
        }
    }
}

// ==================== Vtables ====================

/// Vtable for plain objects.
pub static OBJECT_VTABLE: GcVTable = GcVTable {
    kind: GcKind::Object,
    trace: trace_thunk::<ObjectData>,
    drop: drop_thunk::<ObjectData>,
    moved: None,
};

/// Vtable for arrays.
pub static ARRAY_VTABLE: GcVTable = GcVTable {
    kind: GcKind::Array,
    trace: trace_thunk::<ArrayData>,
    drop: drop_thunk::<ArrayData>,
    moved: None,
};

/// Vtable for function objects.
pub static FUNCTION_VTABLE: GcVTable = GcVTable {
    kind: GcKind::Function,
    trace: trace_thunk::<FunctionData>,
    drop: drop_thunk::<FunctionData>,
    moved: None,
};

/// Vtable for generator objects.
pub static GENERATOR_VTABLE: GcVTable = GcVTable {
    kind: GcKind::Other,
    trace: trace_thunk::<GeneratorData>,
    drop: drop_thunk::<GeneratorData>,
    moved: None,
};

/// Vtable for async-function objects.
pub static ASYNC_VTABLE: GcVTable = GcVTable {
    kind: GcKind::Other,
    trace: trace_thunk::<AsyncData>,
    drop: drop_thunk::<AsyncData>,
    moved: None,
};

/// Vtable for promises.
pub static PROMISE_VTABLE: GcVTable = GcVTable {
    kind: GcKind::Other,
    trace: trace_thunk::<PromiseData>,
    drop: drop_thunk::<PromiseData>,
    moved: None,
};

/// Vtable for module objects.
pub static MODULE_VTABLE: GcVTable = GcVTable {
    kind: GcKind::Other,
    trace: trace_thunk::<ModuleData>,
    drop: drop_thunk::<ModuleData>,
    moved: None,
};

/// Vtable for native function objects.
pub static NATIVE_FUNCTION_VTABLE: GcVTable = GcVTable {
    kind: GcKind::Function,
    trace: trace_thunk::<NativeFunctionData>,
    drop: drop_thunk::<NativeFunctionData>,
    moved: None,
};

// ==================== ObjectRef ====================

/// Copyable handle to a live heap object.
#[derive(Clone, Copy)]
pub struct ObjectRef(*mut GcHeader);

// SAFETY: object handles are confined to the single VM thread that owns
// their heap.
unsafe impl Send for ObjectRef {}
unsafe impl Sync for ObjectRef {}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for ObjectRef {}

impl ObjectRef {
    /// Wrap a header pointer.
    pub fn from_raw(header: *mut GcHeader) -> Self {
        debug_assert!(!header.is_null());
        Self(header)
    }

    /// The raw header pointer.
    pub fn raw(&self) -> *mut GcHeader {
        self.0
    }

    /// Mutable access to the stored pointer (GC rewriting).
    pub(crate) fn raw_mut(&mut self) -> &mut *mut GcHeader {
        &mut self.0
    }

    /// The GC header.
    ///
    /// The returned borrow is **not** tied to this handle (handles are
    /// transient copies); it is valid for as long as the object is live
    /// and unmoved, which callers guarantee by rooting across allocations.
    pub fn header<'a>(&self) -> &'a GcHeader {
        // SAFETY: handles only exist for live objects (see type docs).
        unsafe { &*self.0 }
    }

    /// GC-level type tag.
    pub fn gc_kind(&self) -> GcKind {
        self.header().kind()
    }

    /// View the payload as the base object (see [`header`](Self::header)
    /// for the lifetime contract).
    pub fn object<'a>(&self) -> &'a ObjectData {
        // SAFETY: every payload begins with an ObjectData (repr(C) prefix).
        unsafe { &*self.header().payload().cast::<ObjectData>() }
    }

    /// Mutable view of the base object.
    #[allow(clippy::mut_from_ref)]
    pub fn object_mut<'a>(&self) -> &'a mut ObjectData {
        // SAFETY: single VM thread; callers never hold two overlapping
        // mutable payload views across an allocation.
        unsafe { &mut *self.header().payload().cast::<ObjectData>() }
    }

    /// The object's class id.
    pub fn class_id(&self) -> ClassId {
        self.object().class_id()
    }

    /// True for callable function objects (compiled or native).
    pub fn is_function(&self) -> bool {
        matches!(
            self.class_id(),
            ClassId::FunctionObject | ClassId::NativeFunction
        )
    }

    fn downcast<'a, T>(&self, class: ClassId) -> Option<&'a mut T> {
        if self.class_id() == class {
            // SAFETY: class id pins the payload type chosen at allocation.
            Some(unsafe { &mut *self.header().payload().cast::<T>() })
        } else {
            None
        }
    }

    /// Array payload, if this is an array.
    #[allow(clippy::mut_from_ref)]
    pub fn as_array<'a>(&self) -> Option<&'a mut ArrayData> {
        self.downcast(ClassId::ArrayObject)
    }

    /// Function payload, if this is a function object.
    #[allow(clippy::mut_from_ref)]
    pub fn as_function<'a>(&self) -> Option<&'a mut FunctionData> {
        self.downcast(ClassId::FunctionObject)
    }

    /// Native-function payload, if this is one.
    #[allow(clippy::mut_from_ref)]
    pub fn as_native_function<'a>(&self) -> Option<&'a mut NativeFunctionData> {
        self.downcast(ClassId::NativeFunction)
    }

    /// Generator payload, for generators *and* async objects (the async
    /// payload begins with the generator state).
    #[allow(clippy::mut_from_ref)]
    pub fn as_generator<'a>(&self) -> Option<&'a mut GeneratorData> {
        match self.class_id() {
            ClassId::GeneratorObject | ClassId::AsyncObject => {
                // SAFETY: both payloads begin with GeneratorData.
                Some(unsafe { &mut *self.header().payload().cast::<GeneratorData>() })
            }
            _ => None,
        }
    }

    /// Async payload, if this is an async-function object.
    #[allow(clippy::mut_from_ref)]
    pub fn as_async<'a>(&self) -> Option<&'a mut AsyncData> {
        self.downcast(ClassId::AsyncObject)
    }

    /// Promise payload, if this is a promise.
    #[allow(clippy::mut_from_ref)]
    pub fn as_promise<'a>(&self) -> Option<&'a mut PromiseData> {
        self.downcast(ClassId::PromiseObject)
    }

    /// Module payload, if this is a module object.
    #[allow(clippy::mut_from_ref)]
    pub fn as_module<'a>(&self) -> Option<&'a mut ModuleData> {
        self.downcast(ClassId::ModuleObject)
    }

    /// Short diagnostic rendering.
    pub fn to_display_string(&self) -> String {
        match self.class_id() {
            ClassId::FunctionObject => {
                let def = &self.as_function().unwrap().def;
                format!("function {}", def.display_name())
            }
            ClassId::NativeFunction => "function native".to_string(),
            ClassId::ArrayObject => {
                format!("[array {}]", self.as_array().unwrap().elements.len())
            }
            class => format!("[object {}]", class.name()),
        }
    }
}

impl std::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{:p}", self.class_id().name(), self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_flags_compose() {
        let flags = PropertyFlags::DEFAULT;
        assert!(flags.contains(PropertyFlags::WRITABLE));
        assert!(flags.contains(PropertyFlags::ENUMERABLE));
        assert!(!flags.contains(PropertyFlags::IS_GETTER));
        assert!(!flags.is_accessor());

        let read_only = flags.without(PropertyFlags::WRITABLE);
        assert!(!read_only.contains(PropertyFlags::WRITABLE));
        assert!(read_only.contains(PropertyFlags::CONFIGURABLE));

        let getter = PropertyFlags::IS_GETTER.union(PropertyFlags::ENUMERABLE);
        assert!(getter.is_accessor());
    }

    #[test]
    fn freeze_clears_slot_attributes() {
        let mut data = ObjectData::new(ClassId::Object, Shape::root());
        data.push_slot(
            0,
            PropertySlot {
                value: Value::int(1),
                flags: PropertyFlags::DEFAULT,
            },
        );
        assert!(data.flags().is_extensible());

        data.freeze();
        assert!(!data.flags().is_extensible());
        assert!(data.flags().is_frozen());
        assert!(data.flags().is_sealed());
        assert!(!data.slot(0).flags.contains(PropertyFlags::WRITABLE));
        assert!(!data.slot(0).flags.contains(PropertyFlags::CONFIGURABLE));
    }

    #[test]
    fn prototype_override_flag() {
        let mut data = ObjectData::new(ClassId::Object, Shape::root());
        assert!(data.prototype().is_none());
        data.set_prototype(Value::null());
        assert!(data.prototype().unwrap().is_null());
    }
}
