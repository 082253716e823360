// This file is part of cofiber, a cooperative stackful coroutine runtime.
// See the LICENSE file included in this distribution.
use cofiber::{Schedule, Status, Yielder, DEFAULT_STACK_SIZE};

fn count(yielder: &Yielder, start: i32) {
  for i in 0..5 {
    if let Some(me) = yielder.running() {
      println!("coroutine {}: {}", me, start + i);
    }
    yielder.suspend();
  }
}

fn main() {
  env_logger::init();

  let mut schedule = Schedule::new();
  let co1 = schedule.create(count, 0, DEFAULT_STACK_SIZE);
  let co2 = schedule.create(count, 100, DEFAULT_STACK_SIZE);

  println!("main start");
  while schedule.status(co1) != Status::Dead && schedule.status(co2) != Status::Dead {
    schedule.resume(co1);
    schedule.resume(co2);
  }
  println!("main end");

  schedule.destroy();
}
