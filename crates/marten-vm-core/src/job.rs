//! Jobs and the microtask queue
//!
//! A [`Job`] is a deferred call: function, `this`, arguments. Promise
//! callbacks are parked in per-promise job queues until settlement moves
//! them to the context's microtask queue, which drains FIFO between
//! synchronous turns. Queued jobs are GC roots.

use std::collections::VecDeque;

use smallvec::SmallVec;

use marten_vm_gc::GcHeader;

use crate::value::Value;

/// Inline capacity for job argument lists (callbacks rarely take more).
pub type JobArgs = SmallVec<[Value; 4]>;

/// One deferred call.
#[derive(Debug)]
pub struct Job {
    func: Value,
    this_val: Value,
    argv: JobArgs,
}

impl Job {
    /// A job calling `func` with `this_val` and no arguments yet.
    pub fn new(func: Value, this_val: Value) -> Self {
        Self {
            func,
            this_val,
            argv: JobArgs::new(),
        }
    }

    /// Append an argument.
    pub fn add_arg(&mut self, value: Value) {
        self.argv.push(value);
    }

    /// The callable.
    pub fn func(&self) -> &Value {
        &self.func
    }

    /// The `this` binding.
    pub fn this_val(&self) -> &Value {
        &self.this_val
    }

    /// The argument list.
    pub fn argv(&self) -> &[Value] {
        &self.argv
    }

    /// Decompose into `(func, this, argv)` for invocation.
    pub fn into_parts(self) -> (Value, Value, JobArgs) {
        (self.func, self.this_val, self.argv)
    }

    /// Visit every GC reference held by this job.
    pub fn trace(&mut self, visitor: &mut dyn FnMut(&mut *mut GcHeader)) {
        self.func.trace(visitor);
        self.this_val.trace(visitor);
        for arg in &mut self.argv {
            arg.trace(visitor);
        }
    }
}

/// FIFO queue of jobs.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: VecDeque<Job>,
}

impl JobQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job.
    pub fn push_back(&mut self, job: Job) {
        self.jobs.push_back(job);
    }

    /// Take the oldest job.
    pub fn pop_front(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }

    /// Number of queued jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Drop all jobs.
    pub fn clear(&mut self) {
        self.jobs.clear();
    }

    /// Visit every GC reference held by queued jobs.
    pub fn trace(&mut self, visitor: &mut dyn FnMut(&mut *mut GcHeader)) {
        for job in &mut self.jobs {
            job.trace(visitor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut queue = JobQueue::new();
        for i in 0..3 {
            queue.push_back(Job::new(Value::int(i), Value::undefined()));
        }
        assert_eq!(queue.len(), 3);
        for i in 0..3 {
            let job = queue.pop_front().unwrap();
            assert_eq!(job.func().as_int(), Some(i));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn job_collects_args() {
        let mut job = Job::new(Value::undefined(), Value::undefined());
        job.add_arg(Value::int(1));
        job.add_arg(Value::int(2));
        assert_eq!(job.argv().len(), 2);
        let (_, _, argv) = job.into_parts();
        assert_eq!(argv[1].as_int(), Some(2));
    }
}
