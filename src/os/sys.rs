// This file is part of cofiber, a cooperative stackful coroutine runtime.
// See the LICENSE file included in this distribution.
//! Anonymous mappings for coroutine stacks.
use std::io::Error as IoError;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use libc::{c_int, c_void};

const PROT_DATA: c_int = libc::PROT_READ | libc::PROT_WRITE;

#[cfg(not(any(target_os = "freebsd", target_os = "dragonfly", target_vendor = "apple")))]
const MAP_FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANON | libc::MAP_STACK;
// MAP_STACK is missing or broken on these systems.
#[cfg(any(target_os = "freebsd", target_os = "dragonfly", target_vendor = "apple"))]
const MAP_FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANON;

/// Maps `len` bytes of read-write memory whose lowest page is inaccessible.
/// `len` must be a multiple of the page size and span at least two pages.
pub unsafe fn map_guarded(len: usize) -> Result<*mut u8, IoError> {
  let ptr = libc::mmap(ptr::null_mut(), len, PROT_DATA, MAP_FLAGS, -1, 0);
  if ptr == libc::MAP_FAILED {
    return Err(IoError::last_os_error())
  }

  if libc::mprotect(ptr, page_size(), libc::PROT_NONE) != 0 {
    let err = IoError::last_os_error();
    libc::munmap(ptr, len);
    return Err(err)
  }

  Ok(ptr as *mut u8)
}

pub unsafe fn unmap(ptr: *mut u8, len: usize) -> Result<(), IoError> {
  match libc::munmap(ptr as *mut c_void, len) {
    0 => Ok(()),
    _ => Err(IoError::last_os_error()),
  }
}

/// Page size of the host, queried once.
pub fn page_size() -> usize {
  static CACHE: AtomicUsize = AtomicUsize::new(0);

  match CACHE.load(Ordering::Relaxed) {
    0 => {
      let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
      CACHE.store(size, Ordering::Relaxed);
      size
    }
    size => size
  }
}
