// This file is part of cofiber, a cooperative stackful coroutine runtime.
// See the LICENSE file included in this distribution.
//! Traits for stacks.

/// A trait for objects that hold ownership of a stack.
///
/// To preserve memory safety, an implementation of this trait must fulfill
/// the following contract:
///
///   * The base address of the stack must be aligned to
///     a [`STACK_ALIGNMENT`][align]-byte boundary.
///   * Every address between the base and the limit must be readable and writable.
///   * The stack must stay at the same address for as long as it is owned.
///
/// [align]: constant.STACK_ALIGNMENT.html
pub unsafe trait Stack {
  /// Returns the base address of the stack.
  /// On all modern architectures, the stack grows downwards,
  /// so this is the highest address.
  fn base(&self) -> *mut u8;
  /// Returns the bottom of the stack.
  /// On all modern architectures, the stack grows downwards,
  /// so this is the lowest address.
  fn limit(&self) -> *mut u8;

  /// Number of usable bytes between the limit and the base.
  fn size(&self) -> usize {
    self.base() as usize - self.limit() as usize
  }
}
