//! The tagged value model
//!
//! A [`Value`] is a fixed-size tagged union over the engine's primitives and
//! its pointer kinds, plus two sentinel modifiers: the **exception bit**
//! (any value can be "in flight" as a thrown exception) and the **interned
//! const index** (remembered when a value came out of a constant pool, so
//! property code can reuse the index without a pool lookup).
//!
//! Heap objects are GC-managed through [`ObjectRef`]; strings, symbols,
//! function/module definitions and escaped-local cells are reference counted
//! because they never participate in user-visible cycles.

use std::cell::RefCell;
use std::sync::Arc;

use marten_vm_bytecode::{ConstIndex, FunctionDef, ModuleDef};
use marten_vm_gc::GcHeader;

use crate::object::ObjectRef;
use crate::string::{JsString, JsSymbol};

/// Host callable: `(context, argc, frame) -> value`.
///
/// Arguments are read through the frame; returning a value with the
/// exception bit set propagates as a throw.
pub type CppFunction =
    fn(ctx: &mut crate::context::Context, argc: u32, frame: &crate::interpreter::StackFrame) -> Value;

/// Heap cell holding an escaped local (closure capture or module export).
///
/// Multiple closures capturing the same variable share one cell; writes
/// through any of them are visible to all. The payload is never itself a
/// cell.
#[derive(Clone)]
pub struct ValueCell(Arc<RefCell<Value>>);

// SAFETY: cells are only touched from the single VM thread that owns the
// context; sharing is confined there.
unsafe impl Send for ValueCell {}
unsafe impl Sync for ValueCell {}

impl ValueCell {
    /// Wrap a value into a fresh cell.
    pub fn new(value: Value) -> Self {
        debug_assert!(
            !matches!(value.kind(), ValueKind::ClosureVar(_) | ValueKind::ExportVar(_)),
            "cells never nest"
        );
        Self(Arc::new(RefCell::new(value)))
    }

    /// Read the current payload.
    pub fn get(&self) -> Value {
        self.0.borrow().clone()
    }

    /// Replace the payload.
    pub fn set(&self, value: Value) {
        debug_assert!(
            !matches!(value.kind(), ValueKind::ClosureVar(_) | ValueKind::ExportVar(_)),
            "cells never nest"
        );
        *self.0.borrow_mut() = value;
    }

    /// Identity comparison: do two handles share the same cell?
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Visit any GC reference inside the payload.
    pub fn trace(&self, visitor: &mut dyn FnMut(&mut *mut GcHeader)) {
        self.0.borrow_mut().trace(visitor);
    }
}

impl std::fmt::Debug for ValueCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ValueCell({:?})", *self.0.borrow())
    }
}

/// The logical variants of a value.
#[derive(Clone)]
pub enum ValueKind {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// `true` / `false`
    Boolean(bool),
    /// Integer number fast path.
    Int64(i64),
    /// Double number.
    Float64(f64),
    /// Refcounted immutable string.
    String(Arc<JsString>),
    /// Refcounted symbol.
    Symbol(Arc<JsSymbol>),
    /// GC-managed heap object (or subclass).
    Object(ObjectRef),
    /// Refcounted compiled function.
    FunctionDef(Arc<FunctionDef>),
    /// Refcounted compiled module.
    ModuleDef(Arc<ModuleDef>),
    /// Escaped closure local (never nests).
    ClosureVar(ValueCell),
    /// Live module export slot (reads and writes go through the cell).
    ExportVar(ValueCell),
    /// Host callable.
    CppFunction(CppFunction),
    /// Built-in `next` bound to the generator it is called on.
    GeneratorNext,
    /// Built-in resolve thunk bound to a promise.
    PromiseResolve(ObjectRef),
    /// Built-in reject thunk bound to a promise.
    PromiseReject(ObjectRef),
}

/// A tagged engine value with exception and interning sentinels.
#[derive(Clone)]
pub struct Value {
    kind: ValueKind,
    exception: bool,
    const_index: ConstIndex,
}

impl Value {
    fn from_kind(kind: ValueKind) -> Self {
        Self {
            kind,
            exception: false,
            const_index: ConstIndex::INVALID,
        }
    }

    /// `undefined`.
    pub fn undefined() -> Self {
        Self::from_kind(ValueKind::Undefined)
    }

    /// `null`.
    pub fn null() -> Self {
        Self::from_kind(ValueKind::Null)
    }

    /// A boolean.
    pub fn boolean(b: bool) -> Self {
        Self::from_kind(ValueKind::Boolean(b))
    }

    /// An integer number.
    pub fn int(i: i64) -> Self {
        Self::from_kind(ValueKind::Int64(i))
    }

    /// A double number.
    pub fn float(f: f64) -> Self {
        Self::from_kind(ValueKind::Float64(f))
    }

    /// A string value.
    pub fn string(s: Arc<JsString>) -> Self {
        Self::from_kind(ValueKind::String(s))
    }

    /// A string value from text.
    pub fn str(text: &str) -> Self {
        Self::from_kind(ValueKind::String(JsString::new(text)))
    }

    /// A symbol value.
    pub fn symbol(s: Arc<JsSymbol>) -> Self {
        Self::from_kind(ValueKind::Symbol(s))
    }

    /// A heap object value.
    pub fn object(obj: ObjectRef) -> Self {
        Self::from_kind(ValueKind::Object(obj))
    }

    /// A function definition value.
    pub fn function_def(def: Arc<FunctionDef>) -> Self {
        Self::from_kind(ValueKind::FunctionDef(def))
    }

    /// A module definition value.
    pub fn module_def(def: Arc<ModuleDef>) -> Self {
        Self::from_kind(ValueKind::ModuleDef(def))
    }

    /// An escaped-local reference.
    pub fn closure_var(cell: ValueCell) -> Self {
        Self::from_kind(ValueKind::ClosureVar(cell))
    }

    /// A module export reference.
    pub fn export_var(cell: ValueCell) -> Self {
        Self::from_kind(ValueKind::ExportVar(cell))
    }

    /// A host callable.
    pub fn cpp_function(f: CppFunction) -> Self {
        Self::from_kind(ValueKind::CppFunction(f))
    }

    /// The bound generator-resume builtin.
    pub fn generator_next() -> Self {
        Self::from_kind(ValueKind::GeneratorNext)
    }

    /// A resolve thunk bound to `promise`.
    pub fn promise_resolve(promise: ObjectRef) -> Self {
        Self::from_kind(ValueKind::PromiseResolve(promise))
    }

    /// A reject thunk bound to `promise`.
    pub fn promise_reject(promise: ObjectRef) -> Self {
        Self::from_kind(ValueKind::PromiseReject(promise))
    }

    /// Variant access.
    #[inline]
    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    // ==================== Sentinels ====================

    /// True when the value is an in-flight exception.
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.exception
    }

    /// Flag the value as a thrown exception (builder style).
    #[inline]
    pub fn with_exception(mut self) -> Self {
        self.exception = true;
        self
    }

    /// Clear the exception flag, leaving the payload.
    #[inline]
    pub fn clear_exception(mut self) -> Self {
        self.exception = false;
        self
    }

    /// Pool index this value was loaded from, if interned.
    #[inline]
    pub fn const_index(&self) -> ConstIndex {
        self.const_index
    }

    /// Remember the pool index this value was interned at.
    #[inline]
    pub fn with_const_index(mut self, idx: ConstIndex) -> Self {
        self.const_index = idx;
        self
    }

    // ==================== Predicates & accessors ====================

    /// `undefined`?
    pub fn is_undefined(&self) -> bool {
        matches!(self.kind, ValueKind::Undefined)
    }

    /// `null`?
    pub fn is_null(&self) -> bool {
        matches!(self.kind, ValueKind::Null)
    }

    /// `null` or `undefined`?
    pub fn is_nullish(&self) -> bool {
        matches!(self.kind, ValueKind::Undefined | ValueKind::Null)
    }

    /// Any number?
    pub fn is_number(&self) -> bool {
        matches!(self.kind, ValueKind::Int64(_) | ValueKind::Float64(_))
    }

    /// A string?
    pub fn is_string(&self) -> bool {
        matches!(self.kind, ValueKind::String(_))
    }

    /// A heap object?
    pub fn is_object(&self) -> bool {
        matches!(self.kind, ValueKind::Object(_))
    }

    /// Callable by `FunctionCall`/`New`?
    pub fn is_callable(&self) -> bool {
        match &self.kind {
            ValueKind::CppFunction(_)
            | ValueKind::FunctionDef(_)
            | ValueKind::ModuleDef(_)
            | ValueKind::GeneratorNext
            | ValueKind::PromiseResolve(_)
            | ValueKind::PromiseReject(_) => true,
            ValueKind::Object(obj) => obj.is_function(),
            _ => false,
        }
    }

    /// Integer payload, if `Int64`.
    pub fn as_int(&self) -> Option<i64> {
        match self.kind {
            ValueKind::Int64(i) => Some(i),
            _ => None,
        }
    }

    /// Numeric payload as `f64`, if a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self.kind {
            ValueKind::Int64(i) => Some(i as f64),
            ValueKind::Float64(f) => Some(f),
            _ => None,
        }
    }

    /// Boolean payload, if a boolean.
    pub fn as_boolean(&self) -> Option<bool> {
        match self.kind {
            ValueKind::Boolean(b) => Some(b),
            _ => None,
        }
    }

    /// String payload, if a string.
    pub fn as_string(&self) -> Option<&Arc<JsString>> {
        match &self.kind {
            ValueKind::String(s) => Some(s),
            _ => None,
        }
    }

    /// Symbol payload, if a symbol.
    pub fn as_symbol(&self) -> Option<&Arc<JsSymbol>> {
        match &self.kind {
            ValueKind::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Object payload, if an object.
    pub fn as_object(&self) -> Option<ObjectRef> {
        match &self.kind {
            ValueKind::Object(obj) => Some(*obj),
            _ => None,
        }
    }

    /// Function definition payload, if one.
    pub fn as_function_def(&self) -> Option<&Arc<FunctionDef>> {
        match &self.kind {
            ValueKind::FunctionDef(def) => Some(def),
            _ => None,
        }
    }

    /// Module definition payload, if one.
    pub fn as_module_def(&self) -> Option<&Arc<ModuleDef>> {
        match &self.kind {
            ValueKind::ModuleDef(def) => Some(def),
            _ => None,
        }
    }

    /// Resolve through an escaped-local or export cell; other values clone.
    pub fn deref_cell(&self) -> Value {
        match &self.kind {
            ValueKind::ClosureVar(cell) | ValueKind::ExportVar(cell) => cell.get(),
            _ => self.clone(),
        }
    }

    /// JS truthiness.
    pub fn is_truthy(&self) -> bool {
        match &self.kind {
            ValueKind::Undefined | ValueKind::Null => false,
            ValueKind::Boolean(b) => *b,
            ValueKind::Int64(i) => *i != 0,
            ValueKind::Float64(f) => *f != 0.0 && !f.is_nan(),
            ValueKind::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    // ==================== Equality ====================

    /// JS `==` over the kinds this engine supports.
    ///
    /// Numbers compare numerically across the int/float split, strings and
    /// symbols by content hash, objects by identity, and `null == undefined`
    /// holds. Implicit object-to-primitive coercion is out of scope.
    pub fn loose_equals(&self, other: &Value) -> bool {
        use ValueKind::*;
        match (&self.kind, &other.kind) {
            (Undefined | Null, Undefined | Null) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (Int64(a), Int64(b)) => a == b,
            (Float64(a), Float64(b)) => a == b,
            (Int64(a), Float64(b)) | (Float64(b), Int64(a)) => *a as f64 == *b,
            (String(a), String(b)) => a == b,
            (Symbol(a), Symbol(b)) => a == b,
            (Object(a), Object(b)) => a == b,
            (Boolean(a), Int64(b)) | (Int64(b), Boolean(a)) => (*a as i64) == *b,
            (String(s), Int64(_) | Float64(_)) => {
                s.as_str().parse::<f64>().ok() == other.as_f64()
            }
            (Int64(_) | Float64(_), String(s)) => {
                s.as_str().parse::<f64>().ok() == self.as_f64()
            }
            _ => false,
        }
    }

    // ==================== Conversions ====================

    /// ToNumber over the supported kinds; `None` when the conversion itself
    /// is a type error (symbols, objects).
    pub fn to_number(&self) -> Option<f64> {
        match &self.kind {
            ValueKind::Undefined => Some(f64::NAN),
            ValueKind::Null => Some(0.0),
            ValueKind::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            ValueKind::Int64(i) => Some(*i as f64),
            ValueKind::Float64(f) => Some(*f),
            ValueKind::String(s) => {
                let trimmed = s.as_str().trim();
                if trimmed.is_empty() {
                    Some(0.0)
                } else {
                    Some(trimmed.parse::<f64>().unwrap_or(f64::NAN))
                }
            }
            _ => None,
        }
    }

    /// ToInt32 (for bitwise operators).
    pub fn to_int32(&self) -> Option<i32> {
        let f = self.to_number()?;
        if f.is_nan() || f.is_infinite() {
            return Some(0);
        }
        Some(f as i64 as i32)
    }

    /// Format a number the way JS does (integral doubles print without a
    /// fraction).
    pub fn number_to_string(f: f64) -> String {
        if f.is_nan() {
            return "NaN".to_string();
        }
        if f.is_infinite() {
            return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
        }
        if f == f.trunc() && f.abs() < 1e21 {
            let mut buf = itoa::Buffer::new();
            return buf.format(f as i64).to_string();
        }
        let mut buf = ryu::Buffer::new();
        buf.format(f).to_string()
    }

    /// Display conversion used by `ToString` and string concatenation.
    ///
    /// Objects render a short class-tagged placeholder; the `Object`
    /// prototype's own `toString` is layered on top by the built-ins.
    pub fn to_display_string(&self) -> String {
        match &self.kind {
            ValueKind::Undefined => "undefined".to_string(),
            ValueKind::Null => "null".to_string(),
            ValueKind::Boolean(b) => b.to_string(),
            ValueKind::Int64(i) => {
                let mut buf = itoa::Buffer::new();
                buf.format(*i).to_string()
            }
            ValueKind::Float64(f) => Self::number_to_string(*f),
            ValueKind::String(s) => s.as_str().to_string(),
            ValueKind::Symbol(s) => match &s.description {
                Some(d) => format!("Symbol({d})"),
                None => "Symbol()".to_string(),
            },
            ValueKind::Object(obj) => obj.to_display_string(),
            ValueKind::FunctionDef(def) => format!("function {}", def.display_name()),
            ValueKind::ModuleDef(def) => format!("module {}", def.name()),
            ValueKind::ClosureVar(cell) | ValueKind::ExportVar(cell) => {
                cell.get().to_display_string()
            }
            ValueKind::CppFunction(_) => "function native".to_string(),
            ValueKind::GeneratorNext => "function next".to_string(),
            ValueKind::PromiseResolve(_) => "function resolve".to_string(),
            ValueKind::PromiseReject(_) => "function reject".to_string(),
        }
    }

    // ==================== GC ====================

    /// Visit every GC header pointer embedded in this value.
    ///
    /// The visitor may rewrite the pointer (moving collections do).
    pub fn trace(&mut self, visitor: &mut dyn FnMut(&mut *mut GcHeader)) {
        match &mut self.kind {
            ValueKind::Object(obj)
            | ValueKind::PromiseResolve(obj)
            | ValueKind::PromiseReject(obj) => visitor(obj.raw_mut()),
            ValueKind::ClosureVar(cell) | ValueKind::ExportVar(cell) => cell.trace(visitor),
            _ => {}
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::undefined()
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.exception {
            write!(f, "exception!")?;
        }
        match &self.kind {
            ValueKind::Undefined => write!(f, "undefined"),
            ValueKind::Null => write!(f, "null"),
            ValueKind::Boolean(b) => write!(f, "{b}"),
            ValueKind::Int64(i) => write!(f, "{i}"),
            ValueKind::Float64(v) => write!(f, "{v}"),
            ValueKind::String(s) => write!(f, "{s:?}"),
            ValueKind::Symbol(s) => write!(f, "Symbol#{}", s.id),
            ValueKind::Object(obj) => write!(f, "{obj:?}"),
            ValueKind::FunctionDef(def) => write!(f, "FunctionDef({})", def.display_name()),
            ValueKind::ModuleDef(def) => write!(f, "ModuleDef({})", def.name()),
            ValueKind::ClosureVar(cell) => write!(f, "ClosureVar({:?})", cell.get()),
            ValueKind::ExportVar(cell) => write!(f, "ExportVar({:?})", cell.get()),
            ValueKind::CppFunction(_) => write!(f, "CppFunction"),
            ValueKind::GeneratorNext => write!(f, "GeneratorNext"),
            ValueKind::PromiseResolve(_) => write!(f, "PromiseResolve"),
            ValueKind::PromiseReject(_) => write!(f, "PromiseReject"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::undefined().is_truthy());
        assert!(!Value::null().is_truthy());
        assert!(!Value::int(0).is_truthy());
        assert!(!Value::float(f64::NAN).is_truthy());
        assert!(!Value::str("").is_truthy());
        assert!(Value::int(1).is_truthy());
        assert!(Value::str("x").is_truthy());
    }

    #[test]
    fn exception_bit_survives_clone() {
        let exc = Value::str("boom").with_exception();
        assert!(exc.is_exception());
        assert!(exc.clone().is_exception());
        assert!(!exc.clear_exception().is_exception());
    }

    #[test]
    fn loose_equality() {
        assert!(Value::null().loose_equals(&Value::undefined()));
        assert!(Value::int(3).loose_equals(&Value::float(3.0)));
        assert!(Value::str("abc").loose_equals(&Value::str("abc")));
        assert!(Value::str("3").loose_equals(&Value::int(3)));
        assert!(!Value::int(3).loose_equals(&Value::int(4)));
        assert!(!Value::str("x").loose_equals(&Value::int(0)));
    }

    #[test]
    fn cells_share_state() {
        let cell = ValueCell::new(Value::int(1));
        let a = Value::closure_var(cell.clone());
        let b = Value::closure_var(cell.clone());
        cell.set(Value::int(2));
        assert_eq!(a.deref_cell().as_int(), Some(2));
        assert_eq!(b.deref_cell().as_int(), Some(2));
    }

    #[test]
    fn number_formatting() {
        assert_eq!(Value::number_to_string(3.0), "3");
        assert_eq!(Value::number_to_string(-0.5), "-0.5");
        assert_eq!(Value::number_to_string(f64::NAN), "NaN");
        assert_eq!(Value::int(42).to_display_string(), "42");
    }

    #[test]
    fn to_number_conversions() {
        assert_eq!(Value::null().to_number(), Some(0.0));
        assert!(Value::undefined().to_number().unwrap().is_nan());
        assert_eq!(Value::boolean(true).to_number(), Some(1.0));
        assert_eq!(Value::str(" 2.5 ").to_number(), Some(2.5));
        assert!(Value::str("abc").to_number().unwrap().is_nan());
    }
}
