// This file is part of cofiber, a cooperative stackful coroutine runtime.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! cofiber runs several independent call stacks on one OS thread and moves
//! control between them cooperatively, without kernel involvement.
//!
//! It provides the following abstractions:
//!
//!   * a slot table that owns coroutines and drives them,
//!     [Schedule](struct.Schedule.html), together with the handle every
//!     coroutine callback receives, [Yielder](struct.Yielder.html);
//!   * a trait that can be implemented by stack allocators,
//!     [Stack](trait.Stack.html);
//!   * a stack allocator based on anonymous memory mappings with guard pages,
//!     [OsStack](struct.OsStack.html).
//!
//! A coroutine moves through `Runnable`, then `Running` and `Suspended` as the
//! driver resumes it and it yields, and its slot becomes empty (`Dead`) when
//! its callback returns. Every transfer goes through the driver; a coroutine
//! never resumes another one.
//!
//! Misuse, such as resuming an empty slot or yielding with nothing running,
//! panics. A panic raised inside a coroutine aborts the process.

#[cfg(not(all(target_arch = "x86_64", unix)))]
compile_error!("cofiber supports x86_64 System V targets only");

pub use arch::STACK_ALIGNMENT;
pub use coroutine::{CoroutineId, Status, DEFAULT_STACK_SIZE};
pub use os::{page_size, OsStack, MIN_STACK_SIZE};
pub use schedule::{Schedule, Yielder, DEFAULT_CAPACITY, SCRATCH_STACK_SIZE};
pub use stack::Stack;

mod arch;
mod coroutine;
mod os;
mod schedule;
mod stack;
