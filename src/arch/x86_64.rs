// This file is part of cofiber, a cooperative stackful coroutine runtime.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

// To understand the code in this file, keep in mind these facts:
// * x86_64 SysV C ABI has a "red zone": 128 bytes under the top of the stack
//   that is defined to be unmolested by signal handlers, interrupts, etc.
//   Leaf functions can use the red zone without adjusting rsp or rbp.
// * x86_64 SysV C ABI requires the stack to be aligned at function entry,
//   so that (%rsp+8) is a multiple of 16.
// * x86_64 SysV C ABI passes the first argument in %rdi. A fresh snapshot
//   carries its entry argument in the saved %rdi, so the first switch into it
//   performs the initial call.
// * `swap` is reached from arbitrary call depth, so it snapshots every general
//   purpose register rather than only the callee-saved ones. Resuming a
//   snapshot puts back every register the compiler may have kept live across
//   the asm block, including %rbx and %rbp which cannot be declared clobbered.
use core::arch::asm;
use core::mem::{align_of, offset_of, size_of};
use core::{cmp, ptr};

use crate::stack::Stack;

pub const STACK_ALIGNMENT: usize = 16;
pub const RED_ZONE: usize = 128;

const MXCSR_DEFAULT: u32 = 0x1f80;
const FPCW_DEFAULT: u16 = 0x037f;

/// Register file of one suspended thread of execution.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Registers {
  pub rip: u64,
  pub rsp: u64,
  pub rbp: u64,
  pub rax: u64,
  pub rbx: u64,
  pub rcx: u64,
  pub rdx: u64,
  pub rsi: u64,
  pub rdi: u64,
  pub r8:  u64,
  pub r9:  u64,
  pub r10: u64,
  pub r11: u64,
  pub r12: u64,
  pub r13: u64,
  pub r14: u64,
  pub r15: u64,
  pub mxcsr: u32,
  pub fpcw:  u16,
}

// The assembly below addresses the fields by these offsets.
const _: () = {
  assert!(offset_of!(Registers, rip) == 0);
  assert!(offset_of!(Registers, rsp) == 8);
  assert!(offset_of!(Registers, rbp) == 16);
  assert!(offset_of!(Registers, rax) == 24);
  assert!(offset_of!(Registers, rbx) == 32);
  assert!(offset_of!(Registers, rcx) == 40);
  assert!(offset_of!(Registers, rdx) == 48);
  assert!(offset_of!(Registers, rsi) == 56);
  assert!(offset_of!(Registers, rdi) == 64);
  assert!(offset_of!(Registers, r8) == 72);
  assert!(offset_of!(Registers, r15) == 128);
  assert!(offset_of!(Registers, mxcsr) == 136);
  assert!(offset_of!(Registers, fpcw) == 140);
};

fn align_down(addr: usize, n: usize) -> usize {
  addr & !(n - 1)
}

/// Builds a snapshot that, once switched to, calls `f(arg)` on `stack`.
pub unsafe fn init<S: Stack>(stack: &S, f: unsafe extern "C" fn(usize) -> !, arg: usize) -> Registers {
  let mut sp = align_down(stack.base() as usize, STACK_ALIGNMENT) as *mut u64;
  // Stand-in return address; `f` never returns through it.
  sp = sp.offset(-1);
  *sp = 0;

  Registers {
    rip:   f as usize as u64,
    rsp:   sp as u64,
    rbp:   0,
    rdi:   arg as u64,
    mxcsr: MXCSR_DEFAULT,
    fpcw:  FPCW_DEFAULT,
    ..Registers::default()
  }
}

/// Saves the current register file into `save` and continues from `restore`.
/// Returns once some context restores `save`.
#[inline(never)]
pub unsafe fn swap(save: *mut Registers, restore: *const Registers) {
  asm!(
    "mov [rdi + 24], rax",
    "mov [rdi + 32], rbx",
    "mov [rdi + 40], rcx",
    "mov [rdi + 48], rdx",
    "mov [rdi + 56], rsi",
    "mov [rdi + 64], rdi",
    "mov [rdi + 72], r8",
    "mov [rdi + 80], r9",
    "mov [rdi + 88], r10",
    "mov [rdi + 96], r11",
    "mov [rdi + 104], r12",
    "mov [rdi + 112], r13",
    "mov [rdi + 120], r14",
    "mov [rdi + 128], r15",
    "mov [rdi + 16], rbp",
    "mov [rdi + 8], rsp",
    "stmxcsr dword ptr [rdi + 136]",
    "fnstcw word ptr [rdi + 140]",
    // Whoever restores this snapshot lands right after the switch.
    "lea rax, [rip + 2f]",
    "mov [rdi], rax",

    "ldmxcsr dword ptr [rsi + 136]",
    "fldcw word ptr [rsi + 140]",
    "mov rsp, [rsi + 8]",
    "mov rbp, [rsi + 16]",
    "push qword ptr [rsi]",
    "mov rax, [rsi + 24]",
    "mov rbx, [rsi + 32]",
    "mov rcx, [rsi + 40]",
    "mov rdx, [rsi + 48]",
    "mov rdi, [rsi + 64]",
    "mov r8, [rsi + 72]",
    "mov r9, [rsi + 80]",
    "mov r10, [rsi + 88]",
    "mov r11, [rsi + 96]",
    "mov r12, [rsi + 104]",
    "mov r13, [rsi + 112]",
    "mov r14, [rsi + 120]",
    "mov r15, [rsi + 128]",
    // %rsi holds the snapshot address, so it is loaded last.
    "mov rsi, [rsi + 56]",
    "ret",
    "2:",
    in("rdi") save,
    in("rsi") restore,
    clobber_abi("C"),
  );
}

/// Continues from `restore` without saving anything. The current context is
/// abandoned.
pub unsafe fn restore(restore: *const Registers) -> ! {
  asm!(
    "ldmxcsr dword ptr [rsi + 136]",
    "fldcw word ptr [rsi + 140]",
    "mov rsp, [rsi + 8]",
    "mov rbp, [rsi + 16]",
    "push qword ptr [rsi]",
    "mov rax, [rsi + 24]",
    "mov rbx, [rsi + 32]",
    "mov rcx, [rsi + 40]",
    "mov rdx, [rsi + 48]",
    "mov rdi, [rsi + 64]",
    "mov r8, [rsi + 72]",
    "mov r9, [rsi + 80]",
    "mov r10, [rsi + 88]",
    "mov r11, [rsi + 96]",
    "mov r12, [rsi + 104]",
    "mov r13, [rsi + 112]",
    "mov r14, [rsi + 120]",
    "mov r15, [rsi + 128]",
    "mov rsi, [rsi + 56]",
    "ret",
    in("rsi") restore,
    options(noreturn),
  );
}

/// Copies `frame` to the top of `stack`, moves the stack and frame pointers
/// onto `stack` and calls `f` with the address of the copy.
///
/// Nothing on the current stack is touched once this is entered, so the
/// memory backing it may be released by `f`.
pub unsafe fn relocate<S: Stack, T>(stack: &S, frame: T,
                                    f: unsafe extern "C" fn(*mut T) -> !) -> ! {
  let align = cmp::max(align_of::<T>(), STACK_ALIGNMENT);
  let copy = align_down(stack.base() as usize - size_of::<T>(), align) as *mut T;
  ptr::write(copy, frame);

  // Leave a red zone's worth of room under the copy before the new frames.
  let sp = align_down(copy as usize - RED_ZONE, STACK_ALIGNMENT);

  asm!(
    "mov rsp, {sp}",
    "mov rbp, {fp}",
    "call {f}",
    "ud2",
    sp = in(reg) sp,
    fp = in(reg) copy as usize,
    f  = in(reg) f as usize,
    in("rdi") copy,
    options(noreturn),
  );
}
