// This file is part of cofiber, a cooperative stackful coroutine runtime.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The slot table.
//!
//! A `Schedule` owns every coroutine it creates and the register file of the
//! driver, the code that calls `resume`. Control only ever moves between the
//! driver and one coroutine: `resume` switches from the driver into a
//! coroutine, and a yield or the end of the coroutine's callback switches back.

use core::cell::{Cell, RefCell, UnsafeCell};
use core::marker::PhantomData;
use core::mem;
use core::ptr::{self, NonNull};
use std::panic::{self, AssertUnwindSafe};
use std::process;

use log::{debug, error, trace};

use crate::arch::{self, Registers};
use crate::coroutine::{Coroutine, CoroutineId, Entry, Status};
use crate::os::OsStack;

/// Number of slots a new schedule starts with.
pub const DEFAULT_CAPACITY: usize = 16;

/// Size of the stack finished coroutines are torn down on.
pub const SCRATCH_STACK_SIZE: usize = 256 << 10;

struct Inner {
  main:    UnsafeCell<Registers>,
  running: Cell<Option<CoroutineId>>,
  slots:   RefCell<Vec<Option<Box<Coroutine>>>>,
  live:    Cell<usize>,
  scratch: OsStack,
}

impl Inner {
  fn coroutine(&self, id: CoroutineId) -> Option<NonNull<Coroutine>> {
    let slots = self.slots.borrow();
    assert!(id.index() < slots.len(),
            "coroutine {} is out of range for a table of {} slots", id, slots.len());
    slots[id.index()].as_deref().map(NonNull::from)
  }

  fn status(&self, id: CoroutineId) -> Status {
    match self.coroutine(id) {
      Some(co) => unsafe { co.as_ref().status() },
      None => Status::Dead,
    }
  }

  fn create(&self, entry: Entry, stack_size: usize) -> CoroutineId {
    let mut slots = self.slots.borrow_mut();
    let index = match slots.iter().position(Option::is_none) {
      Some(index) => index,
      None => {
        let index = slots.len();
        slots.resize_with(index * 2, || None);
        debug!("slot table grown from {} to {} slots", index, slots.len());
        index
      }
    };

    let id = CoroutineId::from(index);
    let co = Coroutine::new(id, entry, stack_size, trampoline, self as *const Inner as usize);
    slots[index] = Some(Box::new(co));
    self.live.set(self.live.get() + 1);

    debug!("created coroutine {} with a {} byte stack", id, stack_size);
    id
  }

  unsafe fn resume(&self, id: CoroutineId) {
    if let Some(running) = self.running.get() {
      panic!("cannot resume coroutine {} while coroutine {} is running", id, running);
    }

    let context = match self.coroutine(id) {
      Some(co) => {
        let co = co.as_ref();
        match co.status() {
          Status::Runnable | Status::Suspended => {}
          status => panic!("cannot resume coroutine {} in state {:?}", id, status),
        }
        trace!("resuming coroutine {} ({:?})", id, co.status());
        co.status.set(Status::Running);
        co.context.get()
      }
      None => panic!("cannot resume coroutine {}: it is dead", id),
    };

    self.running.set(Some(id));
    arch::swap(self.main.get(), context);
    trace!("coroutine {} handed back control ({:?})", id, self.status(id));
  }

  unsafe fn suspend(&self) {
    let id = match self.running.get() {
      Some(id) => id,
      None => panic!("yield called with no coroutine running"),
    };

    let context = match self.coroutine(id) {
      Some(co) => {
        let co = co.as_ref();
        co.status.set(Status::Suspended);
        co.context.get()
      }
      None => unreachable!("running coroutine {} has no slot", id),
    };

    self.running.set(None);
    trace!("coroutine {} yielding", id);
    arch::swap(context, self.main.get());
  }
}

/// The handle a coroutine's callback receives.
///
/// It is only ever lent to a callback running on its own stack, so every
/// method acts on that coroutine.
pub struct Yielder {
  inner: NonNull<Inner>,
}

impl Yielder {
  #[inline]
  fn inner(&self) -> &Inner {
    unsafe { self.inner.as_ref() }
  }

  /// Suspends the calling coroutine and switches back to the driver. Returns
  /// when the driver resumes this coroutine again.
  #[inline]
  pub fn suspend(&self) {
    unsafe { self.inner().suspend() }
  }

  /// Id of the running coroutine, i.e. the caller's own.
  #[inline]
  pub fn running(&self) -> Option<CoroutineId> {
    self.inner().running.get()
  }

  /// Status of coroutine `id` in the schedule that runs the caller.
  ///
  /// Panics if `id` is outside the slot table.
  pub fn status(&self, id: CoroutineId) -> Status {
    self.inner().status(id)
  }
}

/// Every coroutine's first resume lands here, on the coroutine's own stack.
unsafe extern "C" fn trampoline(inner: usize) -> ! {
  let inner = inner as *const Inner;
  let id = call_entry(&*inner);

  // The callback has returned and dropped everything it held on this stack.
  arch::relocate(&(*inner).scratch, Epilogue { inner, id }, finish)
}

#[inline(never)]
unsafe fn call_entry(inner: &Inner) -> CoroutineId {
  let id = match inner.running.get() {
    Some(id) => id,
    None => unreachable!("coroutine entered with nothing running"),
  };
  let entry = match inner.coroutine(id).and_then(|co| co.as_ref().entry.take()) {
    Some(entry) => entry,
    None => unreachable!("coroutine {} entered twice", id),
  };

  let yielder = Yielder { inner: NonNull::from(inner) };
  if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || entry(&yielder))) {
    let message = payload.downcast_ref::<&str>().copied()
      .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
      .unwrap_or("Box<dyn Any>");
    // A panic cannot unwind past the bottom of a coroutine stack.
    error!("coroutine {} panicked: {}; aborting", id, message);
    process::abort();
  }
  id
}

/// What is left of a finished coroutine's frame once it is moved to the
/// scratch stack.
struct Epilogue {
  inner: *const Inner,
  id:    CoroutineId,
}

unsafe extern "C" fn finish(epilogue: *mut Epilogue) -> ! {
  let Epilogue { inner, id } = ptr::read(epilogue);
  let inner = &*inner;

  let co = inner.slots.borrow_mut()[id.index()].take();
  // Nothing below this frame can be unwound into.
  if panic::catch_unwind(AssertUnwindSafe(move || drop(co))).is_err() {
    error!("releasing coroutine {} panicked; aborting", id);
    process::abort();
  }
  inner.live.set(inner.live.get() - 1);
  inner.running.set(None);
  debug!("coroutine {} finished, slot freed", id);

  arch::restore(inner.main.get())
}

/// A table of coroutines together with the driver context that resumes them.
///
/// Callbacks may borrow anything that outlives `'a`. Dropping the schedule
/// frees every coroutine still in the table; values living on the stack of a
/// suspended coroutine are released without being dropped.
///
/// # Example
///
/// ```
/// use cofiber::{Schedule, Status, DEFAULT_STACK_SIZE};
///
/// let mut schedule = Schedule::new();
/// let id = schedule.create_with(|yielder| {
///   for _ in 0..2 { yielder.suspend() }
/// }, DEFAULT_STACK_SIZE);
/// while schedule.status(id) != Status::Dead {
///   schedule.resume(id);
/// }
/// ```
pub struct Schedule<'a> {
  inner:   NonNull<Inner>,
  phantom: PhantomData<&'a ()>,
}

impl<'a> Schedule<'a> {
  /// Creates an empty schedule with `DEFAULT_CAPACITY` slots.
  pub fn new() -> Schedule<'a> {
    Schedule::with_capacity(DEFAULT_CAPACITY)
  }

  /// Creates an empty schedule with room for `capacity` coroutines before the
  /// table first grows. A capacity of zero is treated as one.
  pub fn with_capacity(capacity: usize) -> Schedule<'a> {
    let capacity = capacity.max(1);
    let scratch = match OsStack::new(SCRATCH_STACK_SIZE) {
      Ok(stack) => stack,
      Err(err) => panic!("cannot allocate the scratch stack: {}", err),
    };

    let inner = Box::new(Inner {
      main:    UnsafeCell::new(Registers::default()),
      running: Cell::new(None),
      slots:   RefCell::new((0..capacity).map(|_| None).collect()),
      live:    Cell::new(0),
      scratch,
    });
    debug!("schedule initialized with {} slots", capacity);

    Schedule {
      inner:   NonNull::from(Box::leak(inner)),
      phantom: PhantomData,
    }
  }

  #[inline]
  fn inner(&self) -> &Inner {
    unsafe { self.inner.as_ref() }
  }

  /// Registers a coroutine that will call `func(yielder, arg)` on a stack of
  /// at least `stack_size` bytes. It does not run until resumed.
  pub fn create<A>(&mut self, func: fn(&Yielder, A), arg: A, stack_size: usize) -> CoroutineId
      where A: 'a {
    self.create_with(move |yielder| func(yielder, arg), stack_size)
  }

  /// Same as `create`, with the callback and its argument given as a closure.
  pub fn create_with<F>(&mut self, f: F, stack_size: usize) -> CoroutineId
      where F: FnOnce(&Yielder) + 'a {
    let entry: Box<dyn FnOnce(&Yielder) + 'a> = Box::new(f);
    // Entries never outlive the schedule: they are consumed by the coroutine
    // or dropped with its slot.
    let entry: Entry = unsafe { mem::transmute(entry) };
    self.inner().create(entry, stack_size)
  }

  /// Runs coroutine `id` until it yields or its callback returns.
  ///
  /// Panics if `id` is outside the table or names an empty slot.
  pub fn resume(&mut self, id: CoroutineId) {
    unsafe { self.inner().resume(id) }
  }

  /// The driver's side of `yield`.
  ///
  /// `resume` borrows the schedule mutably for as long as a coroutine runs,
  /// so this is only ever called from the driver, where nothing is running,
  /// and it always panics with "yield called with no coroutine running".
  /// Coroutines yield through `Yielder::suspend`.
  pub fn yield_now(&self) {
    unsafe { self.inner().suspend() }
  }

  /// Returns `Status::Dead` for an empty slot, the coroutine's status otherwise.
  ///
  /// Panics if `id` is outside the table.
  pub fn status(&self, id: CoroutineId) -> Status {
    self.inner().status(id)
  }

  /// The coroutine holding the CPU, if any.
  pub fn running(&self) -> Option<CoroutineId> {
    self.inner().running.get()
  }

  /// Number of slots in the table.
  pub fn capacity(&self) -> usize {
    self.inner().slots.borrow().len()
  }

  /// Number of live coroutines.
  pub fn len(&self) -> usize {
    self.inner().live.get()
  }

  /// Whether no coroutine is live.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Frees every coroutine in the table, then the table itself.
  pub fn destroy(self) {
    drop(self)
  }
}

impl<'a> Default for Schedule<'a> {
  fn default() -> Schedule<'a> {
    Schedule::new()
  }
}

impl<'a> Drop for Schedule<'a> {
  fn drop(&mut self) {
    let inner = unsafe { Box::from_raw(self.inner.as_ptr()) };
    debug!("destroying schedule with {} live coroutines", inner.live.get());
    drop(inner)
  }
}
