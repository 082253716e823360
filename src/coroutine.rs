// This file is part of cofiber, a cooperative stackful coroutine runtime.
// See the LICENSE file included in this distribution.
//! Coroutine objects: one stack, one saved register file, one entry callback.

use core::cell::{Cell, UnsafeCell};
use core::fmt;

use crate::arch::{self, Registers};
use crate::os::OsStack;
use crate::schedule::Yielder;

/// Stack size used by callers that have no better estimate.
pub const DEFAULT_STACK_SIZE: usize = 1 << 20;

/// Callback a coroutine runs on its own stack, with its argument captured.
pub(crate) type Entry = Box<dyn FnOnce(&Yielder)>;

/// Identity of a coroutine: the index of the slot that owns it.
///
/// Ids of finished coroutines are handed out again by later `create` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoroutineId(usize);

impl CoroutineId {
  /// Slot index this id refers to.
  #[inline]
  pub fn index(self) -> usize { self.0 }
}

impl From<usize> for CoroutineId {
  fn from(index: usize) -> CoroutineId { CoroutineId(index) }
}

impl From<CoroutineId> for usize {
  fn from(id: CoroutineId) -> usize { id.0 }
}

impl fmt::Display for CoroutineId {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    self.0.fmt(f)
  }
}

/// Lifecycle state of a coroutine slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
  /// The slot is empty: the coroutine ran to completion, or never existed.
  Dead,
  /// The coroutine holds the CPU.
  Running,
  /// Created but never resumed. This is the initial state.
  Runnable,
  /// Gave up the CPU through a yield and can be resumed.
  Suspended,
}

pub(crate) struct Coroutine {
  pub(crate) id:      CoroutineId,
  pub(crate) status:  Cell<Status>,
  pub(crate) context: UnsafeCell<Registers>,
  pub(crate) entry:   Cell<Option<Entry>>,
  stack:              OsStack,
}

impl Coroutine {
  /// Allocates a stack of at least `stack_size` bytes and prepares a context
  /// that enters `trampoline(arg)` on it the first time it is switched to.
  ///
  /// Failing to allocate the stack is fatal.
  pub(crate) fn new(id: CoroutineId, entry: Entry, stack_size: usize,
                    trampoline: unsafe extern "C" fn(usize) -> !, arg: usize) -> Coroutine {
    let stack = match OsStack::new(stack_size) {
      Ok(stack) => stack,
      Err(err) => panic!("cannot allocate a {} byte stack for coroutine {}: {}",
                         stack_size, id, err),
    };
    let context = unsafe { arch::init(&stack, trampoline, arg) };

    Coroutine {
      id,
      status:  Cell::new(Status::Runnable),
      context: UnsafeCell::new(context),
      entry:   Cell::new(Some(entry)),
      stack,
    }
  }

  #[inline]
  pub(crate) fn status(&self) -> Status { self.status.get() }
}

impl fmt::Debug for Coroutine {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.debug_struct("Coroutine")
      .field("id", &self.id)
      .field("status", &self.status.get())
      .field("stack", &self.stack)
      .finish()
  }
}
