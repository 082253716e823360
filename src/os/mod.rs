// This file is part of cofiber, a cooperative stackful coroutine runtime.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
use std::io::{Error as IoError, ErrorKind};

use log::trace;

use crate::stack::Stack;

mod sys;

pub use self::sys::page_size;

/// Smallest stack handed out, used when a size of zero is requested.
pub const MIN_STACK_SIZE: usize = 16 << 10;

/// OsStack holds a guarded stack allocated using the operating system's anonymous
/// memory mapping facility.
///
/// The page below the limit is mapped inaccessible, so running off the end
/// of the stack faults instead of writing into neighbouring memory.
#[derive(Debug)]
pub struct OsStack {
  ptr: *mut u8,
  len: usize,
}

impl OsStack {
  /// Allocates a new stack with at least `size` accessible bytes.
  /// `size` is rounded up to an integral number of pages; `OsStack::new(0)` is legal
  /// and allocates the smallest possible stack, `MIN_STACK_SIZE` bytes of data pages
  /// and one guard page.
  ///
  /// Fails with `ErrorKind::InvalidInput` if the rounded size does not fit
  /// in the address space.
  pub fn new(size: usize) -> Result<OsStack, IoError> {
    let page_size = page_size();

    let len = if size == 0 { MIN_STACK_SIZE } else { size };

    // Round the length one page size up, using the fact that the page size
    // is a power of two, then add the guard page.
    let len = len.checked_add(page_size - 1)
      .map(|len| len & !(page_size - 1))
      .and_then(|len| len.checked_add(page_size))
      .ok_or_else(|| IoError::new(ErrorKind::InvalidInput,
                                  format!("stack size {} is too large", size)))?;

    let ptr = unsafe { sys::map_guarded(len)? };
    let stack = OsStack { ptr, len };
    trace!("mapped stack {:p}..{:p}", stack.limit(), stack.base());
    Ok(stack)
  }
}

unsafe impl Stack for OsStack {
  #[inline(always)]
  fn base(&self) -> *mut u8 {
    unsafe { self.ptr.add(self.len) }
  }

  #[inline(always)]
  fn limit(&self) -> *mut u8 {
    unsafe { self.ptr.add(page_size()) }
  }
}

impl Drop for OsStack {
  fn drop(&mut self) {
    if let Err(err) = unsafe { sys::unmap(self.ptr, self.len) } {
      panic!("munmap for stack {:p} of size {} failed: {}", self.ptr, self.len, err)
    }
  }
}
