//! Asymmetric memory barriers for the announcement protocol.
//!
//! A reader publishing an announcement executes `light_barrier` before it
//! re-checks the slot it wants to protect; a reclaiming thread executes
//! `strong_barrier` before it scans the announcements of every thread. The
//! pairing guarantees a scan observes every announcement published before
//! the retirement decision.
//!
//! With the `fast-barrier` feature the light side collapses to a compiler
//! fence where the OS offers a process-wide barrier (Linux membarrier,
//! Windows `FlushProcessWriteBuffers`), moving the full cost onto the rare
//! reclamation scans. Everywhere else both sides are a sequentially
//! consistent fence.

#[cfg(all(feature = "fast-barrier", target_os = "linux"))]
pub use linux::{light_barrier, strong_barrier};

#[cfg(all(feature = "fast-barrier", target_os = "windows"))]
pub use windows::{light_barrier, strong_barrier};

#[cfg(not(any(
    all(feature = "fast-barrier", target_os = "linux"),
    all(feature = "fast-barrier", target_os = "windows")
)))]
pub use fallback::{light_barrier, strong_barrier};

#[cfg(all(feature = "fast-barrier", target_os = "windows"))]
mod windows {
    use core::sync::atomic::{compiler_fence, Ordering};
    use winapi::um::processthreadsapi;

    pub fn strong_barrier() {
        unsafe {
            processthreadsapi::FlushProcessWriteBuffers();
        }
    }

    pub fn light_barrier() {
        compiler_fence(Ordering::SeqCst);
    }
}

#[cfg(all(feature = "fast-barrier", target_os = "linux"))]
mod linux {
    use core::sync::atomic::{compiler_fence, fence, Ordering};
    use once_cell::sync::Lazy;

    pub fn strong_barrier() {
        match *STRATEGY {
            Strategy::Membarrier => membarrier::barrier(),
            Strategy::Fallback => fence(Ordering::SeqCst),
        }
    }

    pub fn light_barrier() {
        match *STRATEGY {
            Strategy::Membarrier => compiler_fence(Ordering::SeqCst),
            Strategy::Fallback => fence(Ordering::SeqCst),
        }
    }

    enum Strategy {
        Membarrier,
        Fallback,
    }

    static STRATEGY: Lazy<Strategy> = Lazy::new(|| {
        if membarrier::is_supported() {
            Strategy::Membarrier
        } else {
            Strategy::Fallback
        }
    });

    mod membarrier {
        #[repr(i32)]
        #[allow(dead_code, non_camel_case_types, clippy::upper_case_acronyms)]
        enum membarrier_cmd {
            MEMBARRIER_CMD_QUERY = 0,
            MEMBARRIER_CMD_PRIVATE_EXPEDITED = 1 << 3,
            MEMBARRIER_CMD_REGISTER_PRIVATE_EXPEDITED = 1 << 4,
        }

        fn sys_membarrier(cmd: membarrier_cmd) -> libc::c_long {
            unsafe { libc::syscall(libc::SYS_membarrier, cmd as libc::c_int, 0 as libc::c_int) }
        }

        pub fn is_supported() -> bool {
            // The private expedited command must be both reported and
            // registered before it may be issued.
            let ret = sys_membarrier(membarrier_cmd::MEMBARRIER_CMD_QUERY);
            if ret < 0
                || ret & membarrier_cmd::MEMBARRIER_CMD_PRIVATE_EXPEDITED as libc::c_long == 0
            {
                return false;
            }

            sys_membarrier(membarrier_cmd::MEMBARRIER_CMD_REGISTER_PRIVATE_EXPEDITED) >= 0
        }

        pub fn barrier() {
            if sys_membarrier(membarrier_cmd::MEMBARRIER_CMD_PRIVATE_EXPEDITED) < 0 {
                // Registration succeeded earlier; a failure here means the
                // pairing guarantee is gone and no safe recovery exists.
                unsafe {
                    libc::abort();
                }
            }
        }
    }
}

#[cfg(not(any(
    all(feature = "fast-barrier", target_os = "linux"),
    all(feature = "fast-barrier", target_os = "windows")
)))]
mod fallback {
    use core::sync::atomic::{fence, Ordering};

    pub fn strong_barrier() {
        fence(Ordering::SeqCst);
    }

    pub fn light_barrier() {
        fence(Ordering::SeqCst);
    }
}
