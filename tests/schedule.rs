// This file is part of cofiber, a cooperative stackful coroutine runtime.
// See the LICENSE file included in this distribution.
use std::cell::{Cell, RefCell};

use cofiber::{CoroutineId, Schedule, Status, Yielder, DEFAULT_STACK_SIZE};

fn init_logger() {
  let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn lifecycle() {
  init_logger();
  let seen = RefCell::new(Vec::new());
  let mut schedule = Schedule::new();

  let id = schedule.create_with(|yielder| {
    let me = yielder.running().unwrap();
    seen.borrow_mut().push(yielder.status(me));
    yielder.suspend();
    seen.borrow_mut().push(yielder.status(me));
  }, DEFAULT_STACK_SIZE);

  assert_eq!(schedule.status(id), Status::Runnable);
  assert_eq!(schedule.len(), 1);

  schedule.resume(id);
  assert_eq!(schedule.status(id), Status::Suspended);
  assert_eq!(schedule.running(), None);

  schedule.resume(id);
  assert_eq!(schedule.status(id), Status::Dead);
  assert_eq!(schedule.running(), None);
  assert!(schedule.is_empty());

  assert_eq!(*seen.borrow(), vec![Status::Running, Status::Running]);
}

#[test]
fn callback_runs_once() {
  init_logger();
  let calls = Cell::new(0);
  let steps = Cell::new(0);
  let mut schedule = Schedule::new();

  let id = schedule.create_with(|yielder| {
    calls.set(calls.get() + 1);
    for _ in 0..3 {
      steps.set(steps.get() + 1);
      yielder.suspend();
    }
    steps.set(steps.get() + 1);
  }, DEFAULT_STACK_SIZE);

  let mut resumes = 0;
  while schedule.status(id) != Status::Dead {
    schedule.resume(id);
    resumes += 1;
  }

  assert_eq!(calls.get(), 1);
  assert_eq!(steps.get(), 4);
  assert_eq!(resumes, 4);
}

#[test]
fn running_inside_and_outside() {
  init_logger();
  let observed = RefCell::new(Vec::new());
  let mut schedule = Schedule::new();

  let first = schedule.create_with(|yielder| {
    observed.borrow_mut().push(yielder.running());
  }, DEFAULT_STACK_SIZE);
  let second = schedule.create_with(|yielder| {
    observed.borrow_mut().push(yielder.running());
    yielder.suspend();
    observed.borrow_mut().push(yielder.running());
  }, DEFAULT_STACK_SIZE);

  assert_eq!(schedule.running(), None);
  schedule.resume(second);
  assert_eq!(schedule.running(), None);
  schedule.resume(first);
  schedule.resume(second);
  assert_eq!(schedule.running(), None);

  assert_eq!(*observed.borrow(), vec![Some(second), Some(first), Some(second)]);
}

#[test]
fn ids_are_reused() {
  init_logger();
  let log = RefCell::new(Vec::new());
  let mut schedule = Schedule::new();

  let old = schedule.create_with(|_| log.borrow_mut().push("old"), DEFAULT_STACK_SIZE);
  schedule.resume(old);
  assert_eq!(schedule.status(old), Status::Dead);

  let new = schedule.create_with(|yielder| {
    log.borrow_mut().push("new");
    yielder.suspend();
    log.borrow_mut().push("new again");
  }, DEFAULT_STACK_SIZE);
  assert_eq!(new, old);
  assert_eq!(schedule.status(new), Status::Runnable);

  schedule.resume(new);
  schedule.resume(new);
  assert_eq!(*log.borrow(), vec!["old", "new", "new again"]);
}

#[test]
fn first_empty_slot_is_taken() {
  init_logger();
  let mut schedule = Schedule::new();

  let ids: Vec<CoroutineId> = (0..4)
    .map(|_| schedule.create_with(|yielder| yielder.suspend(), DEFAULT_STACK_SIZE))
    .collect();
  assert_eq!(ids.iter().map(|id| id.index()).collect::<Vec<_>>(), vec![0, 1, 2, 3]);

  // Finish 1 and 2; the next two creations fill them in order.
  for &id in &ids[1..3] {
    schedule.resume(id);
    schedule.resume(id);
  }
  let a = schedule.create_with(|_| {}, DEFAULT_STACK_SIZE);
  let b = schedule.create_with(|_| {}, DEFAULT_STACK_SIZE);
  let c = schedule.create_with(|_| {}, DEFAULT_STACK_SIZE);
  assert_eq!((a.index(), b.index(), c.index()), (1, 2, 4));
}

#[test]
fn growth_preserves_live_coroutines() {
  init_logger();
  let totals = RefCell::new(Vec::new());
  let mut schedule = Schedule::with_capacity(2);

  fn accumulate(yielder: &Yielder, (base, totals): (u64, &RefCell<Vec<u64>>)) {
    let mut acc = base;
    for step in 1..=3 {
      acc = acc * 10 + step;
      yielder.suspend();
    }
    totals.borrow_mut().push(acc);
  }

  let a = schedule.create(accumulate, (1, &totals), DEFAULT_STACK_SIZE);
  let b = schedule.create(accumulate, (2, &totals), DEFAULT_STACK_SIZE);
  schedule.resume(a);
  schedule.resume(b);
  schedule.resume(a);
  assert_eq!(schedule.capacity(), 2);

  let c = schedule.create(accumulate, (3, &totals), DEFAULT_STACK_SIZE);
  assert_eq!(c.index(), 2);
  assert_eq!(schedule.capacity(), 4);
  assert_eq!(schedule.len(), 3);
  assert_eq!((schedule.status(a), schedule.status(b), schedule.status(c)),
             (Status::Suspended, Status::Suspended, Status::Runnable));

  let d = schedule.create(accumulate, (4, &totals), DEFAULT_STACK_SIZE);
  assert_eq!(d.index(), 3);
  let e = schedule.create(accumulate, (5, &totals), DEFAULT_STACK_SIZE);
  assert_eq!(e.index(), 4);
  assert_eq!(schedule.capacity(), 8);

  for id in [a, b, c, d, e] {
    while schedule.status(id) != Status::Dead {
      schedule.resume(id);
    }
  }
  assert_eq!(*totals.borrow(), vec![1123, 2123, 3123, 4123, 5123]);
  assert!(schedule.is_empty());
}

#[test]
fn yield_from_deep_call_chain() {
  init_logger();
  let result = Cell::new(0u64);
  let mut schedule = Schedule::new();

  fn descend(yielder: &Yielder, depth: u64) -> u64 {
    if depth == 0 {
      yielder.suspend();
      return 1;
    }
    let here = depth * depth;
    let below = descend(yielder, depth - 1);
    if depth % 4 == 0 {
      yielder.suspend();
    }
    here + below
  }

  let id = schedule.create_with(|yielder| result.set(descend(yielder, 16)), DEFAULT_STACK_SIZE);
  let mut resumes = 0;
  while schedule.status(id) != Status::Dead {
    schedule.resume(id);
    resumes += 1;
    // Churn the driver's own registers and stack between switches.
    let noise: Vec<u64> = (0..resumes).map(|x| x * 31).collect();
    assert_eq!(noise.len() as u64, resumes);
  }

  // 1 + sum of squares 1..=16, one suspend at the bottom and one per multiple of 4.
  assert_eq!(result.get(), 1 + 1496);
  assert_eq!(resumes, 6);
}

#[test]
fn many_coroutines_round_robin() {
  init_logger();
  let sum = Cell::new(0usize);
  let total = &sum;
  let mut schedule = Schedule::new();

  let ids: Vec<CoroutineId> = (0..100)
    .map(|n| schedule.create_with(move |yielder| {
      for _ in 0..n % 5 {
        yielder.suspend();
      }
      total.set(total.get() + n);
    }, 64 << 10))
    .collect();
  assert_eq!(schedule.capacity(), 128);

  while !schedule.is_empty() {
    for &id in &ids {
      if schedule.status(id) != Status::Dead {
        schedule.resume(id);
      }
    }
  }
  assert_eq!(sum.get(), (0..100).sum::<usize>());
}

#[test]
fn destroy_drops_unstarted_callbacks() {
  init_logger();
  struct Flag<'a>(&'a Cell<bool>);
  impl<'a> Drop for Flag<'a> {
    fn drop(&mut self) {
      self.0.set(true);
    }
  }

  let dropped = Cell::new(false);
  let started = Cell::new(false);
  let mut schedule = Schedule::new();

  let flag = Flag(&dropped);
  let started_ref = &started;
  schedule.create_with(move |_| {
    let _flag = flag;
    started_ref.set(true);
  }, DEFAULT_STACK_SIZE);
  let suspended = schedule.create_with(|yielder| loop { yielder.suspend() }, DEFAULT_STACK_SIZE);
  schedule.resume(suspended);
  assert_eq!(schedule.len(), 2);

  schedule.destroy();
  assert!(dropped.get());
  assert!(!started.get());
}

#[test]
fn independent_schedules() {
  init_logger();
  let trace = RefCell::new(Vec::new());
  let mut left = Schedule::new();
  let mut right = Schedule::with_capacity(1);

  let l = left.create_with(|yielder| {
    trace.borrow_mut().push("l0");
    yielder.suspend();
    trace.borrow_mut().push("l1");
  }, DEFAULT_STACK_SIZE);
  let r = right.create_with(|yielder| {
    trace.borrow_mut().push("r0");
    yielder.suspend();
    trace.borrow_mut().push("r1");
  }, DEFAULT_STACK_SIZE);

  left.resume(l);
  right.resume(r);
  right.resume(r);
  left.resume(l);

  assert_eq!(*trace.borrow(), vec!["l0", "r0", "r1", "l1"]);
  assert_eq!((left.status(l), right.status(r)), (Status::Dead, Status::Dead));
}
