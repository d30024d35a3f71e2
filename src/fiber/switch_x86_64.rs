//! Register-level context switch, x86_64 System V ABI.
//!
//! Modeled on `wasmtime`'s `fiber` crate's `stackswitch/x86_64.rs`: the
//! switch routine saves/restores the callee-saved registers and swaps the
//! stack pointer; the new fiber's initial stack is prepared so that the
//! very first `ret` out of [`switch`] lands in [`trampoline`] instead of
//! back in whatever called `switch`.
//!
//! A WORD OF CAUTION: this file must be kept in sync with itself. The
//! field order of [`InitialFrame`] is exactly the order [`switch`]'s `pop`
//! sequence expects, deepest (`r15`) first.

use core::arch::naked_asm;
use std::os::raw::c_void;

/// Saves the current callee-saved registers and stack pointer into
/// `*save_sp`, then switches to the stack at `resume_sp` and resumes
/// execution there — either back inside a previously-suspended `switch`
/// call, or (for a fiber's first resume) at [`trampoline`].
///
/// # Safety
/// `resume_sp` must point at a stack previously prepared by [`init`], or
/// previously suspended by a matching call to `switch`. `save_sp` must be
/// a valid, aligned, writable `*mut *mut u8`.
#[unsafe(naked)]
pub unsafe extern "C" fn switch(save_sp: *mut *mut u8 /* rdi */, resume_sp: *mut u8 /* rsi */) {
    naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov rsp, rsi",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    );
}

/// The frame [`init`] writes at the top of a fresh stack. Popped in
/// reverse-field order by `switch`'s epilogue, then `ret` jumps to
/// `return_address`.
#[repr(C)]
struct InitialFrame {
    r15: *mut c_void,
    r14: *mut c_void,
    r13: *mut c_void,
    r12: *mut c_void,
    rbx: *mut c_void,
    rbp: *mut c_void,
    return_address: *mut c_void,
}

/// Bytes of stack consumed by [`init`]'s frame; callers must leave this
/// much headroom below `stack_top`.
pub const INIT_FRAME_SIZE: usize = std::mem::size_of::<InitialFrame>();

/// Lays out an initial register frame on `stack_top` (the highest address
/// of the fiber's stack, must be 16-byte aligned) so that the first
/// [`switch`] into the returned stack pointer calls `entry(arg)`.
///
/// # Safety
/// `stack_top` must be 16-byte aligned and point at writable memory
/// extending at least [`INIT_FRAME_SIZE`] bytes below it.
pub unsafe fn init(
    stack_top: *mut u8,
    entry: unsafe extern "C" fn(*mut c_void) -> !,
    arg: *mut c_void,
) -> *mut u8 {
    let frame_ptr = (stack_top as *mut InitialFrame).sub(1);
    frame_ptr.write(InitialFrame {
        r15: std::ptr::null_mut(),
        r14: std::ptr::null_mut(),
        r13: std::ptr::null_mut(),
        r12: arg,
        rbx: entry as *mut c_void,
        rbp: stack_top,
        return_address: trampoline as *mut c_void,
    });
    frame_ptr as *mut u8
}

/// The "base" function every fiber resumes into the first time it runs.
/// Reads the entry point and its argument back out of the callee-saved
/// registers [`init`] stashed them in (`rbx`, `r12`) and calls it. The
/// entry point never returns (it finalizes the fiber and switches back to
/// the scheduler instead), so the trailing `ud2` is unreachable in
/// practice and exists only to fault loudly if that invariant is ever
/// violated.
#[unsafe(naked)]
unsafe extern "C" fn trampoline() -> ! {
    naked_asm!("mov rdi, r12", "call rbx", "ud2",);
}
