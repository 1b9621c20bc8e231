//! Process-wide out-of-memory policy.
//!
//! Running out of memory while growing an internal table leaves the engine in an
//! inconsistent state, so there is no recovery: an optional user callback is invoked and
//! the process exits with [`OUT_OF_MEMORY_EXIT_CODE`].

use std::sync::atomic::{AtomicPtr, Ordering};

pub const OUT_OF_MEMORY_EXIT_CODE: i32 = 16;

static CALLBACK: AtomicPtr<()> = AtomicPtr::new(std::ptr::null_mut());

/// Install (or remove, with `None`) the callback invoked before termination.
///
/// The callback must not touch any engine state.
pub fn set_out_of_mem_callback(callback: Option<fn()>) {
    let raw = match callback {
        Some(f) => f as *mut (),
        None => std::ptr::null_mut(),
    };
    CALLBACK.store(raw, Ordering::SeqCst);
}

pub fn out_of_memory() -> ! {
    let raw = CALLBACK.load(Ordering::SeqCst);
    if raw.is_null() {
        eprintln!("vesta: out of memory");
    } else {
        // Only values of type `fn()` are ever stored in `CALLBACK`.
        let callback = unsafe { std::mem::transmute::<*mut (), fn()>(raw) };
        callback();
    }
    std::process::exit(OUT_OF_MEMORY_EXIT_CODE)
}

/// Reserve room for `additional` more elements, terminating on allocation failure.
pub fn reserve<T>(vec: &mut Vec<T>, additional: usize) {
    if vec.try_reserve(additional).is_err() {
        out_of_memory();
    }
}
