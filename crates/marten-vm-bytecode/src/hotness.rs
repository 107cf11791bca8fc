//! Call-count driven tiering state
//!
//! Every function definition carries a counter incremented on call. When it
//! crosses a threshold the execution state advances and the (optional) JIT
//! picks the function up from its queue. The interpreter is complete without
//! a JIT; this is purely an upgrade signal.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Tier of a function definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecutionState {
    /// Running in the interpreter.
    Interpreted = 0,
    /// Crossed the baseline threshold; awaiting baseline compilation.
    Warmup = 1,
    /// Baseline-compiled code installed.
    Baseline = 2,
    /// Crossed the optimizing threshold; awaiting optimized compilation
    /// (reserved).
    Hot = 3,
    /// Optimized code installed (reserved).
    Optimized = 4,
}

impl ExecutionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Warmup,
            2 => Self::Baseline,
            3 => Self::Hot,
            4 => Self::Optimized,
            _ => Self::Interpreted,
        }
    }
}

/// Per-function call counter with tier transitions.
///
/// Shared behind `Arc<FunctionDef>`, hence atomic.
#[derive(Debug)]
pub struct HotnessCounter {
    count: AtomicU32,
    state: AtomicU8,
}

impl HotnessCounter {
    /// Calls before a function is queued for baseline compilation.
    pub const BASELINE_THRESHOLD: u32 = 100;

    /// Calls before a baseline function is queued for optimization
    /// (reserved).
    pub const OPTIMIZED_THRESHOLD: u32 = 10_000;

    /// Fresh counter in the interpreted state.
    pub fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
            state: AtomicU8::new(ExecutionState::Interpreted as u8),
        }
    }

    /// Record one call; advances the state when a threshold is crossed.
    pub fn increment(&self) {
        if self.state() == ExecutionState::Optimized {
            return;
        }
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        match self.state() {
            ExecutionState::Interpreted if count >= Self::BASELINE_THRESHOLD => {
                self.set_state(ExecutionState::Warmup);
            }
            ExecutionState::Baseline if count >= Self::OPTIMIZED_THRESHOLD => {
                self.set_state(ExecutionState::Hot);
            }
            _ => {}
        }
    }

    /// Current call count.
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    /// Reset the call count (state is untouched).
    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
    }

    /// Current tier.
    pub fn state(&self) -> ExecutionState {
        ExecutionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Install a new tier (the JIT calls this after compilation).
    pub fn set_state(&self, state: ExecutionState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl Default for HotnessCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_to_warmup_at_threshold() {
        let counter = HotnessCounter::new();
        for _ in 0..HotnessCounter::BASELINE_THRESHOLD - 1 {
            counter.increment();
        }
        assert_eq!(counter.state(), ExecutionState::Interpreted);
        counter.increment();
        assert_eq!(counter.state(), ExecutionState::Warmup);
    }

    #[test]
    fn baseline_advances_to_hot() {
        let counter = HotnessCounter::new();
        counter.set_state(ExecutionState::Baseline);
        for _ in 0..HotnessCounter::OPTIMIZED_THRESHOLD {
            counter.increment();
        }
        assert_eq!(counter.state(), ExecutionState::Hot);
    }

    #[test]
    fn optimized_stops_counting() {
        let counter = HotnessCounter::new();
        counter.set_state(ExecutionState::Optimized);
        let before = counter.count();
        counter.increment();
        assert_eq!(counter.count(), before);
    }
}
