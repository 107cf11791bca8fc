//! Hidden classes (shapes)
//!
//! A [`Shape`] describes one property layout: the slot order of every object
//! that added the same keys in the same sequence. Shapes form a transition
//! tree rooted at the empty shape; adding a key to a shape always reaches
//! the same successor, so objects built alike share layouts and property
//! access resolves to a slot index once per shape instead of once per
//! object.
//!
//! All shapes along one chain share a single [`ShapePropertyTable`]; each
//! shape bounds its lookups by its own `property_size`. When a chain
//! branches (a shape that already has children gains another child), the
//! new child forks its own table so sibling additions stay invisible to
//! each other.

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use rustc_hash::FxHashMap;

use marten_vm_bytecode::ConstIndex;

use crate::const_pool::{GlobalConstPool, LocalConstPool};
use crate::value::ValueKind;

/// Resolves interned property keys for hashing and cross-pool equality.
pub trait KeyResolver {
    /// Content hash of the key behind `idx`.
    fn key_hash(&self, idx: ConstIndex) -> u64;
    /// Content equality of two interned keys (they may live in different
    /// pools).
    fn key_eq(&self, a: ConstIndex, b: ConstIndex) -> bool;
}

/// Key resolver over a context's pool pair.
pub struct PoolKeys<'a> {
    /// The runtime's shared pool.
    pub global: &'a GlobalConstPool,
    /// The context's local pool.
    pub local: &'a LocalConstPool,
}

impl PoolKeys<'_> {
    fn resolve(&self, idx: ConstIndex) -> Option<&crate::value::Value> {
        if idx.is_global() {
            self.global.get(idx)
        } else {
            self.local.get(idx)
        }
    }
}

impl KeyResolver for PoolKeys<'_> {
    fn key_hash(&self, idx: ConstIndex) -> u64 {
        match self.resolve(idx).map(|v| v.kind()) {
            Some(ValueKind::String(s)) => s.hash(),
            Some(ValueKind::Symbol(s)) => s.id,
            Some(ValueKind::Int64(i)) => *i as u64,
            _ => idx.value() as u64,
        }
    }

    fn key_eq(&self, a: ConstIndex, b: ConstIndex) -> bool {
        if a == b {
            return true;
        }
        // Within one pool the dedup map guarantees one index per content.
        if a.is_global() == b.is_global() {
            return false;
        }
        match (self.resolve(a), self.resolve(b)) {
            (Some(va), Some(vb)) => va.const_key() == vb.const_key(),
            _ => false,
        }
    }
}

/// One layout entry: the interned property key.
///
/// Writability/enumerability/accessor flags live in the per-object
/// [`crate::object::PropertySlot`], not here, so `Object.freeze` never
/// splits a shape.
#[derive(Debug, Clone, Copy)]
pub struct ShapeProperty {
    const_index: ConstIndex,
}

impl ShapeProperty {
    /// Wrap an interned key.
    pub fn new(const_index: ConstIndex) -> Self {
        Self { const_index }
    }

    /// The interned key.
    pub fn const_index(&self) -> ConstIndex {
        self.const_index
    }
}

/// Below this count lookups scan linearly; above it they hash-probe.
const LINEAR_SCAN_MAX: u32 = 4;
/// Probe-table occupancy that triggers a rehash.
const LOAD_FACTOR: f64 = 0.75;

struct TableInner {
    /// Properties in slot order for the whole chain.
    properties: Vec<ShapeProperty>,
    /// Open-addressed index: hash bucket → slot, -1 empty.
    slot_indices: Vec<i32>,
    hash_mask: u64,
}

/// The property table shared by every shape along one chain.
///
/// Append-only; each shape limits lookups to its first `property_size`
/// entries.
pub struct ShapePropertyTable {
    inner: RefCell<TableInner>,
}

// SAFETY: shapes are confined to the single VM thread of their context.
unsafe impl Send for ShapePropertyTable {}
unsafe impl Sync for ShapePropertyTable {}

impl ShapePropertyTable {
    /// Fresh empty table.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RefCell::new(TableInner {
                properties: Vec::new(),
                slot_indices: Vec::new(),
                hash_mask: 0,
            }),
        })
    }

    /// Fork a table containing only the first `count` entries (chain
    /// branch).
    pub fn fork_prefix(&self, count: u32, keys: &dyn KeyResolver) -> Arc<Self> {
        let fork = Self::new();
        {
            let inner = self.inner.borrow();
            for prop in inner.properties.iter().take(count as usize) {
                fork.add(*prop, keys);
            }
        }
        fork
    }

    /// Find the slot of `key`, scanning only the first `property_size`
    /// entries.
    pub fn find(&self, key: ConstIndex, property_size: u32, keys: &dyn KeyResolver) -> Option<u32> {
        let inner = self.inner.borrow();
        if property_size <= LINEAR_SCAN_MAX {
            return inner.properties[..property_size as usize]
                .iter()
                .position(|p| keys.key_eq(p.const_index, key))
                .map(|i| i as u32);
        }

        debug_assert!(!inner.slot_indices.is_empty());
        let mut bucket = keys.key_hash(key) & inner.hash_mask;
        let start = bucket;
        loop {
            let slot = inner.slot_indices[bucket as usize];
            if slot < 0 {
                return None;
            }
            // Entries past this shape's size belong to descendants on the
            // same chain; skip but keep probing.
            if (slot as u32) < property_size
                && keys.key_eq(inner.properties[slot as usize].const_index, key)
            {
                return Some(slot as u32);
            }
            bucket = (bucket + 1) & inner.hash_mask;
            if bucket == start {
                return None;
            }
        }
    }

    /// Append a property for the next slot.
    pub fn add(&self, prop: ShapeProperty, keys: &dyn KeyResolver) {
        let mut inner = self.inner.borrow_mut();
        let slot = inner.properties.len() as i32;
        inner.properties.push(prop);

        let size = inner.properties.len() as u32;
        if size <= LINEAR_SCAN_MAX {
            return;
        }

        // Promote to (or grow) the probe table.
        let needs_rehash = inner.slot_indices.is_empty()
            || size as f64 / inner.slot_indices.len() as f64 >= LOAD_FACTOR;
        if needs_rehash {
            let capacity = (size as usize * 2).next_power_of_two();
            inner.slot_indices = vec![-1; capacity];
            inner.hash_mask = capacity as u64 - 1;
            let properties = std::mem::take(&mut inner.properties);
            for (i, p) in properties.iter().enumerate() {
                let mut bucket = keys.key_hash(p.const_index) & inner.hash_mask;
                while inner.slot_indices[bucket as usize] >= 0 {
                    bucket = (bucket + 1) & inner.hash_mask;
                }
                inner.slot_indices[bucket as usize] = i as i32;
            }
            inner.properties = properties;
            return;
        }

        let mut bucket = keys.key_hash(prop.const_index) & inner.hash_mask;
        while inner.slot_indices[bucket as usize] >= 0 {
            bucket = (bucket + 1) & inner.hash_mask;
        }
        inner.slot_indices[bucket as usize] = slot;
    }

    /// Property at `slot`.
    pub fn property(&self, slot: u32) -> ShapeProperty {
        self.inner.borrow().properties[slot as usize]
    }

    /// Total entries in the chain (not bounded by any shape).
    pub fn len(&self) -> u32 {
        self.inner.borrow().properties.len() as u32
    }

    /// True when the table has no entries at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Transitions out of one shape: key added → successor shape.
///
/// Children are held weakly; a shape dies when no object and no child uses
/// it, and a dropped successor is simply rebuilt on the next transition.
pub enum TransitionTable {
    /// No children yet.
    None,
    /// Exactly one child (the common case).
    One(ConstIndex, Weak<Shape>),
    /// Several children.
    Map(FxHashMap<ConstIndex, Weak<Shape>>),
}

impl TransitionTable {
    /// Any successor recorded?
    pub fn has(&self) -> bool {
        !matches!(self, TransitionTable::None)
    }

    /// Successor for `key`, if it is still alive.
    pub fn find(&self, key: ConstIndex) -> Option<Arc<Shape>> {
        match self {
            TransitionTable::None => None,
            TransitionTable::One(k, weak) => (*k == key).then(|| weak.upgrade()).flatten(),
            TransitionTable::Map(map) => map.get(&key).and_then(Weak::upgrade),
        }
    }

    /// Record `key → shape`.
    pub fn add(&mut self, key: ConstIndex, shape: &Arc<Shape>) {
        match self {
            TransitionTable::None => {
                *self = TransitionTable::One(key, Arc::downgrade(shape));
            }
            TransitionTable::One(existing_key, existing) => {
                let mut map = FxHashMap::default();
                map.insert(*existing_key, existing.clone());
                map.insert(key, Arc::downgrade(shape));
                *self = TransitionTable::Map(map);
            }
            TransitionTable::Map(map) => {
                map.insert(key, Arc::downgrade(shape));
            }
        }
    }
}

/// One node of the shape tree.
pub struct Shape {
    parent: Option<Arc<Shape>>,
    property_size: u32,
    property_map: Arc<ShapePropertyTable>,
    transitions: RefCell<TransitionTable>,
}

// SAFETY: shapes are confined to the single VM thread of their context.
unsafe impl Send for Shape {}
unsafe impl Sync for Shape {}

impl Shape {
    /// The empty root shape.
    pub fn root() -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            property_size: 0,
            property_map: ShapePropertyTable::new(),
            transitions: RefCell::new(TransitionTable::None),
        })
    }

    /// Parent shape, `None` for the root.
    pub fn parent(&self) -> Option<&Arc<Shape>> {
        self.parent.as_ref()
    }

    /// Number of slots defined up to and including this shape.
    pub fn property_size(&self) -> u32 {
        self.property_size
    }

    /// The chain's shared property table.
    pub fn property_map(&self) -> &Arc<ShapePropertyTable> {
        &self.property_map
    }

    /// Slot index of `key` in this shape's layout.
    pub fn find(&self, key: ConstIndex, keys: &dyn KeyResolver) -> Option<u32> {
        self.property_map.find(key, self.property_size, keys)
    }

    /// Layout entry of `slot`.
    pub fn property(&self, slot: u32) -> ShapeProperty {
        debug_assert!(slot < self.property_size);
        self.property_map.property(slot)
    }
}

impl std::fmt::Debug for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shape")
            .field("property_size", &self.property_size)
            .finish()
    }
}

/// Creates and interns shapes; owns the empty root.
pub struct ShapeManager {
    empty_shape: Arc<Shape>,
}

impl ShapeManager {
    /// Manager with a fresh root shape.
    pub fn new() -> Self {
        Self {
            empty_shape: Shape::root(),
        }
    }

    /// Manager sharing an existing root (per-context managers hang off the
    /// runtime's root).
    pub fn with_root(root: Arc<Shape>) -> Self {
        Self { empty_shape: root }
    }

    /// The empty root shape.
    pub fn empty_shape(&self) -> Arc<Shape> {
        self.empty_shape.clone()
    }

    /// Route `*shape` to the layout that includes `key`, returning the
    /// key's slot index.
    ///
    /// Existing keys resolve in place; otherwise the transition table is
    /// consulted (interning successors), and only when that misses is a new
    /// shape created — forking the chain's property table if the base shape
    /// already branched.
    pub fn add_property(
        &self,
        shape: &mut Arc<Shape>,
        prop: ShapeProperty,
        keys: &dyn KeyResolver,
    ) -> u32 {
        let key = prop.const_index();
        loop {
            if shape.property_size > 0 {
                if let Some(slot) = shape.find(key, keys) {
                    return slot;
                }
            }
            let next = shape.transitions.borrow().find(key);
            match next {
                Some(next) => *shape = next,
                None => break,
            }
        }

        let branched = shape.transitions.borrow().has();
        let property_map = if branched {
            shape.property_map.fork_prefix(shape.property_size, keys)
        } else {
            shape.property_map.clone()
        };

        let new_shape = Arc::new(Shape {
            parent: Some(shape.clone()),
            property_size: shape.property_size + 1,
            property_map,
            transitions: RefCell::new(TransitionTable::None),
        });
        new_shape.property_map.add(prop, keys);
        shape.transitions.borrow_mut().add(key, &new_shape);
        *shape = new_shape;
        shape.property_size - 1
    }
}

impl Default for ShapeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    struct TestKeys {
        pool: GlobalConstPool,
        local: LocalConstPool,
    }

    impl TestKeys {
        fn new() -> Self {
            Self {
                pool: GlobalConstPool::new(),
                local: LocalConstPool::new(),
            }
        }

        fn key(&self, name: &str) -> ConstIndex {
            self.pool.insert(Value::str(name))
        }

        fn resolver(&self) -> PoolKeys<'_> {
            PoolKeys {
                global: &self.pool,
                local: &self.local,
            }
        }
    }

    #[test]
    fn same_history_shares_shape() {
        let keys = TestKeys::new();
        let manager = ShapeManager::new();
        let (x, y) = (keys.key("x"), keys.key("y"));

        let mut a = manager.empty_shape();
        assert_eq!(manager.add_property(&mut a, ShapeProperty::new(x), &keys.resolver()), 0);
        assert_eq!(manager.add_property(&mut a, ShapeProperty::new(y), &keys.resolver()), 1);

        let mut b = manager.empty_shape();
        manager.add_property(&mut b, ShapeProperty::new(x), &keys.resolver());
        manager.add_property(&mut b, ShapeProperty::new(y), &keys.resolver());

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.property_size(), 2);
    }

    #[test]
    fn slot_indices_are_stable_down_the_chain() {
        // Shape monotonicity: a key keeps its slot in every descendant.
        let keys = TestKeys::new();
        let manager = ShapeManager::new();
        let names: Vec<ConstIndex> = (0..8)
            .map(|i| keys.key(&format!("p{i}")))
            .collect();

        let mut shape = manager.empty_shape();
        let mut intermediates = Vec::new();
        for &key in &names {
            manager.add_property(&mut shape, ShapeProperty::new(key), &keys.resolver());
            intermediates.push(shape.clone());
        }

        for (expected_slot, &key) in names.iter().enumerate() {
            for stage in &intermediates[expected_slot..] {
                assert_eq!(
                    stage.find(key, &keys.resolver()),
                    Some(expected_slot as u32),
                    "slot must be identical in every shape that contains the key"
                );
            }
        }
    }

    #[test]
    fn branch_forks_the_property_table() {
        let keys = TestKeys::new();
        let manager = ShapeManager::new();
        let (x, y, z) = (keys.key("x"), keys.key("y"), keys.key("z"));

        let mut base = manager.empty_shape();
        manager.add_property(&mut base, ShapeProperty::new(x), &keys.resolver());

        // First child: +y extends the chain (shares the table).
        let mut with_y = base.clone();
        manager.add_property(&mut with_y, ShapeProperty::new(y), &keys.resolver());
        assert!(Arc::ptr_eq(base.property_map(), with_y.property_map()));

        // Second child: +z branches, so it must fork.
        let mut with_z = base.clone();
        manager.add_property(&mut with_z, ShapeProperty::new(z), &keys.resolver());
        assert!(!Arc::ptr_eq(base.property_map(), with_z.property_map()));

        // Sibling layouts stay disjoint past the shared prefix.
        assert_eq!(with_y.find(z, &keys.resolver()), None);
        assert_eq!(with_z.find(y, &keys.resolver()), None);
        assert_eq!(with_y.find(x, &keys.resolver()), Some(0));
        assert_eq!(with_z.find(x, &keys.resolver()), Some(0));
    }

    #[test]
    fn hash_probing_after_linear_limit() {
        let keys = TestKeys::new();
        let manager = ShapeManager::new();
        let mut shape = manager.empty_shape();
        let names: Vec<ConstIndex> = (0..32)
            .map(|i| keys.key(&format!("prop_{i}")))
            .collect();
        for &key in &names {
            manager.add_property(&mut shape, ShapeProperty::new(key), &keys.resolver());
        }
        assert_eq!(shape.property_size(), 32);
        for (slot, &key) in names.iter().enumerate() {
            assert_eq!(shape.find(key, &keys.resolver()), Some(slot as u32));
        }
        assert_eq!(shape.find(keys.key("missing"), &keys.resolver()), None);
    }

    #[test]
    fn adding_existing_key_returns_its_slot() {
        let keys = TestKeys::new();
        let manager = ShapeManager::new();
        let x = keys.key("x");
        let mut shape = manager.empty_shape();
        assert_eq!(manager.add_property(&mut shape, ShapeProperty::new(x), &keys.resolver()), 0);
        let before = shape.clone();
        assert_eq!(manager.add_property(&mut shape, ShapeProperty::new(x), &keys.resolver()), 0);
        assert!(Arc::ptr_eq(&before, &shape));
    }
}
