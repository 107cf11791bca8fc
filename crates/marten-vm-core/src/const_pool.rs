//! The two-tier constant pools
//!
//! Compile-time constants, primordial property keys and built-in names live
//! in the **global pool**: a segmented array with stable slot addresses,
//! mutex-serialized insertion and lock-free reads, shared by every context
//! of a runtime. Runtime-created constants (computed property keys, error
//! messages) live in a per-context **local pool** whose slots are reference
//! counted and recycled through a free list.
//!
//! The sign of a [`ConstIndex`] selects the pool: positive = global,
//! negative = local, zero = invalid.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use marten_vm_bytecode::ConstIndex;

use crate::value::{Value, ValueKind};

/// Entries per pool segment; segments are never resized, so readers can
/// hold slot references across concurrent growth.
const SEGMENT_SIZE: usize = 1024;
/// Maximum number of segments.
const SEGMENT_COUNT: usize = 1024;

/// Content key used for pool deduplication.
///
/// Only pool-insertable values have keys: primitives, strings, symbols and
/// function/module definitions. Heap objects are never pool constants.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum ConstKey {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// Boolean constant.
    Boolean(bool),
    /// Integer constant.
    Int(i64),
    /// Double constant, keyed by bit pattern (all NaNs collapse is not
    /// required; compilers emit one canonical NaN).
    Float(u64),
    /// String constant, keyed by content.
    Str(std::sync::Arc<crate::string::JsString>),
    /// Symbol constant, keyed by identity.
    Symbol(u64),
    /// Function definition, keyed by identity.
    FunctionDef(usize),
    /// Module definition, keyed by identity.
    ModuleDef(usize),
}

impl Value {
    /// Dedup key, when this value may live in a constant pool.
    pub fn const_key(&self) -> Option<ConstKey> {
        Some(match self.kind() {
            ValueKind::Undefined => ConstKey::Undefined,
            ValueKind::Null => ConstKey::Null,
            ValueKind::Boolean(b) => ConstKey::Boolean(*b),
            ValueKind::Int64(i) => ConstKey::Int(*i),
            ValueKind::Float64(f) => ConstKey::Float(f.to_bits()),
            ValueKind::String(s) => ConstKey::Str(s.clone()),
            ValueKind::Symbol(s) => ConstKey::Symbol(s.id),
            ValueKind::FunctionDef(def) => {
                ConstKey::FunctionDef(std::sync::Arc::as_ptr(def) as usize)
            }
            ValueKind::ModuleDef(def) => {
                ConstKey::ModuleDef(std::sync::Arc::as_ptr(def) as usize)
            }
            _ => return None,
        })
    }
}

type Segment = Box<[OnceLock<Value>]>;

/// Process-wide constant pool (positive indices, slot 0 reserved).
///
/// Growth appends fixed-size segments and never moves existing slots, so
/// readers need no lock; insertion is serialized by a mutex that also owns
/// the dedup map.
pub struct GlobalConstPool {
    segments: Box<[OnceLock<Segment>]>,
    /// Next free index; also the publication point for readers.
    size: AtomicI32,
    dedup: Mutex<FxHashMap<ConstKey, ConstIndex>>,
}

// SAFETY: the pool is append-only; published slots are immutable and only
// primitives/refcounted payloads are stored (no interior mutation after
// publication).
unsafe impl Send for GlobalConstPool {}
unsafe impl Sync for GlobalConstPool {}

impl GlobalConstPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        let segments: Vec<OnceLock<Segment>> =
            (0..SEGMENT_COUNT).map(|_| OnceLock::new()).collect();
        Self {
            segments: segments.into_boxed_slice(),
            size: AtomicI32::new(1),
            dedup: Mutex::new(FxHashMap::default()),
        }
    }

    /// Number of occupied slots (slot 0 included).
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire) as usize
    }

    /// True when nothing was inserted yet.
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Intern `value`, returning its index; equal values share one slot.
    ///
    /// # Panics
    /// Panics when handed a value that cannot be a pool constant.
    pub fn insert(&self, value: Value) -> ConstIndex {
        let key = value
            .const_key()
            .expect("only primitives, strings, symbols and defs are poolable");
        let mut dedup = self.dedup.lock();
        if let Some(&idx) = dedup.get(&key) {
            return idx;
        }

        let raw = self.size.load(Ordering::Relaxed);
        let slot = raw as usize;
        let (seg_idx, offset) = (slot / SEGMENT_SIZE, slot % SEGMENT_SIZE);
        assert!(seg_idx < SEGMENT_COUNT, "global constant pool exhausted");
        let segment = self.segments[seg_idx].get_or_init(|| {
            (0..SEGMENT_SIZE)
                .map(|_| OnceLock::new())
                .collect::<Vec<_>>()
                .into_boxed_slice()
        });

        let idx = ConstIndex::new(raw);
        segment[offset]
            .set(value.with_const_index(idx))
            .ok()
            .expect("fresh slot is unset");
        // Publish after the slot is initialized; readers acquire.
        self.size.store(raw + 1, Ordering::Release);
        dedup.insert(key, idx);
        idx
    }

    /// Look up the index of an already-interned value.
    pub fn find(&self, value: &Value) -> Option<ConstIndex> {
        let key = value.const_key()?;
        self.dedup.lock().get(&key).copied()
    }

    /// Read a slot; lock-free.
    pub fn get(&self, idx: ConstIndex) -> Option<&Value> {
        let raw = idx.value();
        if raw <= 0 || raw >= self.size.load(Ordering::Acquire) {
            return None;
        }
        let slot = raw as usize;
        self.segments[slot / SEGMENT_SIZE].get()?[slot % SEGMENT_SIZE].get()
    }
}

impl Default for GlobalConstPool {
    fn default() -> Self {
        Self::new()
    }
}

struct LocalNode {
    /// `None` for free-listed slots.
    value: Option<Value>,
    reference_count: u32,
    /// Next free slot when on the free list (-1 terminates).
    next_free: i64,
}

/// Per-context constant pool (negative indices).
///
/// Slots are reference counted; a count of zero recycles the slot onto a
/// free list headed by `first_free`.
pub struct LocalConstPool {
    dedup: FxHashMap<ConstKey, ConstIndex>,
    /// Slot 0 is reserved so index `-n` maps to `nodes[n]`.
    nodes: Vec<LocalNode>,
    first_free: i64,
}

impl LocalConstPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            dedup: FxHashMap::default(),
            nodes: vec![LocalNode {
                value: None,
                reference_count: 0,
                next_free: -1,
            }],
            first_free: -1,
        }
    }

    /// Intern `value`, bumping the refcount when it already exists.
    pub fn insert(&mut self, value: Value) -> ConstIndex {
        let key = value
            .const_key()
            .expect("only primitives, strings, symbols and defs are poolable");
        if let Some(&idx) = self.dedup.get(&key) {
            self.nodes[idx.local_slot()].reference_count += 1;
            return idx;
        }

        let slot = if self.first_free >= 0 {
            let slot = self.first_free as usize;
            self.first_free = self.nodes[slot].next_free;
            slot
        } else {
            self.nodes.push(LocalNode {
                value: None,
                reference_count: 0,
                next_free: -1,
            });
            self.nodes.len() - 1
        };

        let idx = ConstIndex::new(-(slot as i32));
        self.nodes[slot] = LocalNode {
            value: Some(value.with_const_index(idx)),
            reference_count: 1,
            next_free: -1,
        };
        self.dedup.insert(key, idx);
        idx
    }

    /// Look up the index of an already-interned value.
    pub fn find(&self, value: &Value) -> Option<ConstIndex> {
        let key = value.const_key()?;
        self.dedup.get(&key).copied()
    }

    /// Read a slot.
    pub fn get(&self, idx: ConstIndex) -> Option<&Value> {
        if !idx.is_local() {
            return None;
        }
        self.nodes.get(idx.local_slot())?.value.as_ref()
    }

    /// Bump a slot's refcount.
    pub fn reference(&mut self, idx: ConstIndex) {
        let node = &mut self.nodes[idx.local_slot()];
        debug_assert!(node.value.is_some());
        node.reference_count += 1;
    }

    /// Drop one reference; a count of zero recycles the slot.
    pub fn dereference(&mut self, idx: ConstIndex) {
        let slot = idx.local_slot();
        let node = &mut self.nodes[slot];
        debug_assert!(node.reference_count > 0);
        node.reference_count -= 1;
        if node.reference_count == 0 {
            if let Some(value) = node.value.take() {
                if let Some(key) = value.const_key() {
                    self.dedup.remove(&key);
                }
            }
            node.next_free = self.first_free;
            self.first_free = slot as i64;
        }
    }

    /// Current refcount of a slot (test hook).
    pub fn reference_count(&self, idx: ConstIndex) -> u32 {
        self.nodes[idx.local_slot()].reference_count
    }

    /// Number of slots ever created (slot 0 included).
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.dedup.clear();
        self.nodes.truncate(1);
        self.first_free = -1;
    }
}

impl Default for LocalConstPool {
    fn default() -> Self {
        Self::new()
    }
}
