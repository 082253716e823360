// This file is part of cofiber, a cooperative stackful coroutine runtime.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

pub use self::imp::*;

#[cfg(target_arch = "x86_64")]
#[path = "x86_64.rs"]
mod imp;
