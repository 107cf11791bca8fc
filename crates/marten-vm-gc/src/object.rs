//! GC object header and type-erased payload dispatch
//!
//! Every heap allocation is a [`GcHeader`] immediately followed by the
//! payload bytes. The header packs the collector's bookkeeping bits and the
//! total allocation size, and carries a static vtable standing in for the
//! two operations that need dynamic dispatch: tracing a payload's child
//! references and running its destructor. A separate forwarding cell lets a
//! moved object's original storage report where its body now lives.

use std::cell::Cell;

/// Minimum alignment of every heap allocation.
pub const GC_ALIGNMENT: usize = 8;

/// Which generation an object currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GcGeneration {
    /// Young semispace.
    Young = 0,
    /// Old mark-compact space.
    Old = 1,
}

/// Object type tag stored in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GcKind {
    /// Plain object.
    Object = 0,
    /// Array object.
    Array,
    /// Function object.
    Function,
    /// String payload.
    String,
    /// Shape payload.
    Shape,
    /// Module definition payload.
    ModuleDef,
    /// Function definition payload.
    FunctionDef,
    /// Escaped-local cell.
    ClosureVar,
    /// Anything else (promises, generators, module objects, ...).
    Other,
}

/// Visitor over the embedded header-pointers of a payload.
///
/// The visitor receives a mutable reference to each child pointer so a
/// moving collection can rewrite it in place.
pub type ChildVisitor<'a> = &'a mut dyn FnMut(&mut *mut GcHeader);

/// Static dispatch table for one payload type.
///
/// This replaces a virtual base class: the only dynamic operations a payload
/// needs are child traversal, destruction, and an optional post-move hook.
pub struct GcVTable {
    /// Type tag recorded in headers allocated with this vtable.
    pub kind: GcKind,
    /// Visit every child reference of the payload at `payload`.
    ///
    /// # Safety
    /// `payload` must point at a live, initialized payload of the vtable's
    /// type.
    pub trace: unsafe fn(payload: *mut u8, visitor: ChildVisitor<'_>),
    /// Run the payload's destructor in place.
    ///
    /// # Safety
    /// `payload` must point at a live, initialized payload of the vtable's
    /// type; the payload must not be used afterwards.
    pub drop: unsafe fn(payload: *mut u8),
    /// Called after the payload was moved to a new address, with the old
    /// address. Only needed by self-referential payloads.
    pub moved: Option<unsafe fn(payload: *mut u8, old_payload: *const u8)>,
}

/// Trait payloads implement so [`trace_thunk`]/[`drop_thunk`] can build
/// vtable entries for them.
pub trait GcTrace {
    /// Visit every child reference.
    fn trace(&mut self, visitor: ChildVisitor<'_>);
}

/// Vtable `trace` entry for a concrete payload type.
///
/// # Safety
/// `payload` must point at a live `T`.
pub unsafe fn trace_thunk<T: GcTrace>(payload: *mut u8, visitor: ChildVisitor<'_>) {
    unsafe { (*payload.cast::<T>()).trace(visitor) }
}

/// Vtable `drop` entry for a concrete payload type.
///
/// # Safety
/// `payload` must point at a live `T`; `T` is dead afterwards.
pub unsafe fn drop_thunk<T>(payload: *mut u8) {
    unsafe { std::ptr::drop_in_place(payload.cast::<T>()) }
}

// Header bit layout (low to high):
//   type:8 | generation:1 | marked:1 | forwarded:1 | destructed:1 | pinned:1 | age:4
const TYPE_SHIFT: u32 = 0;
const TYPE_MASK: u32 = 0xff;
const GENERATION_BIT: u32 = 1 << 8;
const MARKED_BIT: u32 = 1 << 9;
const FORWARDED_BIT: u32 = 1 << 10;
const DESTRUCTED_BIT: u32 = 1 << 11;
const PINNED_BIT: u32 = 1 << 12;
const AGE_SHIFT: u32 = 13;
const AGE_MASK: u32 = 0xf << AGE_SHIFT;

/// Header preceding every heap object.
#[repr(C)]
pub struct GcHeader {
    bits: Cell<u32>,
    size: Cell<u32>,
    vtable: &'static GcVTable,
    /// Forwarding address while the `forwarded` bit is set; 0 otherwise.
    forward: Cell<usize>,
}

/// Header size, already a multiple of [`GC_ALIGNMENT`].
pub const HEADER_SIZE: usize = std::mem::size_of::<GcHeader>();

/// Round `size` up to the allocation granule.
#[inline]
pub const fn align_size(size: usize) -> usize {
    (size + GC_ALIGNMENT - 1) & !(GC_ALIGNMENT - 1)
}

/// Total allocation size for a payload of `payload_size` bytes.
#[inline]
pub const fn total_size(payload_size: usize) -> usize {
    align_size(HEADER_SIZE + payload_size)
}

impl GcHeader {
    /// Initialize a header in place.
    ///
    /// # Safety
    /// `at` must point at `HEADER_SIZE` writable bytes.
    pub unsafe fn init(
        at: *mut GcHeader,
        vtable: &'static GcVTable,
        size: u32,
        generation: GcGeneration,
    ) {
        let mut bits = (vtable.kind as u32) << TYPE_SHIFT;
        if generation == GcGeneration::Old {
            bits |= GENERATION_BIT;
        }
        unsafe {
            at.write(GcHeader {
                bits: Cell::new(bits),
                size: Cell::new(size),
                vtable,
                forward: Cell::new(0),
            });
        }
    }

    /// Type tag.
    #[inline]
    pub fn kind(&self) -> GcKind {
        self.vtable.kind
    }

    /// Vtable this object was allocated with.
    #[inline]
    pub fn vtable(&self) -> &'static GcVTable {
        self.vtable
    }

    /// Total allocation size including the header.
    #[inline]
    pub fn size(&self) -> u32 {
        self.size.get()
    }

    /// Current generation.
    #[inline]
    pub fn generation(&self) -> GcGeneration {
        if self.bits.get() & GENERATION_BIT != 0 {
            GcGeneration::Old
        } else {
            GcGeneration::Young
        }
    }

    /// Move the object's bookkeeping into the old generation.
    #[inline]
    pub fn set_generation(&self, generation: GcGeneration) {
        let bits = self.bits.get() & !GENERATION_BIT;
        self.bits.set(match generation {
            GcGeneration::Old => bits | GENERATION_BIT,
            GcGeneration::Young => bits,
        });
    }

    /// Mark-compact liveness bit.
    #[inline]
    pub fn is_marked(&self) -> bool {
        self.bits.get() & MARKED_BIT != 0
    }

    /// Set or clear the mark bit.
    #[inline]
    pub fn set_marked(&self, marked: bool) {
        self.flip(MARKED_BIT, marked);
    }

    /// True once the object body has been copied elsewhere.
    #[inline]
    pub fn is_forwarded(&self) -> bool {
        self.bits.get() & FORWARDED_BIT != 0
    }

    /// Record the new location of a moved object.
    #[inline]
    pub fn set_forward(&self, to: *mut GcHeader) {
        self.forward.set(to as usize);
        self.flip(FORWARDED_BIT, true);
    }

    /// New location of a moved object.
    ///
    /// Only meaningful while [`is_forwarded`](Self::is_forwarded) holds.
    #[inline]
    pub fn forward(&self) -> *mut GcHeader {
        self.forward.get() as *mut GcHeader
    }

    /// Drop the forwarding state after references were rewritten.
    #[inline]
    pub fn clear_forward(&self) {
        self.forward.set(0);
        self.flip(FORWARDED_BIT, false);
    }

    /// True once the destructor has run.
    #[inline]
    pub fn is_destructed(&self) -> bool {
        self.bits.get() & DESTRUCTED_BIT != 0
    }

    /// Latch the destructed bit (idempotence for the dead-object sweep).
    #[inline]
    pub fn set_destructed(&self) {
        self.flip(DESTRUCTED_BIT, true);
    }

    /// True for objects that must never move.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.bits.get() & PINNED_BIT != 0
    }

    /// Pin or unpin the object.
    #[inline]
    pub fn set_pinned(&self, pinned: bool) {
        self.flip(PINNED_BIT, pinned);
    }

    /// Number of Scavenges survived.
    #[inline]
    pub fn age(&self) -> u8 {
        ((self.bits.get() & AGE_MASK) >> AGE_SHIFT) as u8
    }

    /// Bump the survival count (saturating at the 4-bit limit).
    #[inline]
    pub fn increment_age(&self) {
        let age = self.age();
        if age < 0xf {
            self.bits
                .set((self.bits.get() & !AGE_MASK) | ((age as u32 + 1) << AGE_SHIFT));
        }
    }

    /// Payload address of this allocation.
    #[inline]
    pub fn payload(&self) -> *mut u8 {
        unsafe { (self as *const GcHeader as *mut u8).add(HEADER_SIZE) }
    }

    /// Header address from a payload address.
    ///
    /// # Safety
    /// `payload` must have been produced by [`payload`](Self::payload).
    #[inline]
    pub unsafe fn from_payload(payload: *mut u8) -> *mut GcHeader {
        unsafe { payload.sub(HEADER_SIZE) as *mut GcHeader }
    }

    /// Visit the payload's child references.
    ///
    /// # Safety
    /// The payload must be live (initialized and not destructed).
    pub unsafe fn trace_children(&self, visitor: ChildVisitor<'_>) {
        unsafe { (self.vtable.trace)(self.payload(), visitor) }
    }

    /// Run the destructor exactly once.
    ///
    /// # Safety
    /// The payload must be initialized. Safe to call repeatedly; only the
    /// first call drops.
    pub unsafe fn run_destructor(&self) {
        if self.is_destructed() {
            return;
        }
        self.set_destructed();
        unsafe { (self.vtable.drop)(self.payload()) }
    }

    #[inline]
    fn flip(&self, bit: u32, on: bool) {
        let bits = self.bits.get();
        self.bits.set(if on { bits | bit } else { bits & !bit });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;
    impl GcTrace for Plain {
        fn trace(&mut self, _visitor: ChildVisitor<'_>) {}
    }

    static PLAIN_VTABLE: GcVTable = GcVTable {
        kind: GcKind::Other,
        trace: trace_thunk::<Plain>,
        drop: drop_thunk::<Plain>,
        moved: None,
    };

    fn make_header() -> Box<GcHeader> {
        // SAFETY: writing into freshly allocated, properly sized storage.
        unsafe {
            let boxed = Box::new(std::mem::MaybeUninit::<GcHeader>::uninit());
            let ptr = Box::into_raw(boxed) as *mut GcHeader;
            GcHeader::init(ptr, &PLAIN_VTABLE, 64, GcGeneration::Young);
            Box::from_raw(ptr)
        }
    }

    #[test]
    fn header_bits_round_trip() {
        let header = make_header();
        assert_eq!(header.kind(), GcKind::Other);
        assert_eq!(header.generation(), GcGeneration::Young);
        assert_eq!(header.size(), 64);
        assert_eq!(header.age(), 0);
        assert!(!header.is_marked());
        assert!(!header.is_forwarded());
        assert!(!header.is_destructed());
        assert!(!header.is_pinned());

        header.set_marked(true);
        header.set_generation(GcGeneration::Old);
        header.increment_age();
        header.increment_age();

        assert!(header.is_marked());
        assert_eq!(header.generation(), GcGeneration::Old);
        assert_eq!(header.age(), 2);
        assert_eq!(header.kind(), GcKind::Other);

        header.set_marked(false);
        assert!(!header.is_marked());
        assert_eq!(header.age(), 2);
    }

    #[test]
    fn age_saturates() {
        let header = make_header();
        for _ in 0..40 {
            header.increment_age();
        }
        assert_eq!(header.age(), 0xf);
    }

    #[test]
    fn forwarding_cell() {
        let header = make_header();
        let target = 0x1000usize as *mut GcHeader;
        header.set_forward(target);
        assert!(header.is_forwarded());
        assert_eq!(header.forward(), target);
        header.clear_forward();
        assert!(!header.is_forwarded());
    }

    #[test]
    fn sizes_align() {
        assert_eq!(HEADER_SIZE % GC_ALIGNMENT, 0);
        assert_eq!(align_size(1), GC_ALIGNMENT);
        assert_eq!(align_size(8), 8);
        assert_eq!(align_size(9), 16);
    }
}
