// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PID liveness oracle used by the Slot Collector to tell a crashed
//! subscriber from a merely slow one.
//!
//! `OsLivenessOracle` issues `kill(pid, 0)` directly via `libc`, the same
//! low-level syscall-wrapping style `transport::shm::futex` uses for
//! `SYS_futex` — a documented `SAFETY` comment per call, no abstraction
//! layer in between.

/// Abstracts "is this PID still alive" so the Collector is testable
/// without real process crashes (spec §9 "a second binding ... is
/// expected to exist for tests").
pub trait LivenessOracle: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Real liveness check via `kill(pid, 0)`.
///
/// `ESRCH` means no such process: dead. Any other outcome (success, or
/// `EPERM` meaning the process exists but we lack permission to signal
/// it) is treated as alive — we only ever want to declare a peer dead
/// when we are certain.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsLivenessOracle;

impl LivenessOracle for OsLivenessOracle {
    fn is_alive(&self, pid: u32) -> bool {
        if pid == 0 {
            // Never registered / already reset.
            return false;
        }
        // SAFETY: `kill` with signal 0 performs no action other than an
        // existence/permission check; it never delivers a signal. `pid`
        // is a plain integer, no memory is touched.
        let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
        if ret == 0 {
            return true;
        }
        // SAFETY: immediately reading errno set by the kill() call above,
        // before any other libc call can overwrite it.
        let errno = unsafe { *libc::__errno_location() };
        errno != libc::ESRCH
    }
}

/// Test double: a fixed set of PIDs considered alive, everything else is
/// considered dead. Mirrors the in-process fake bindings the teacher
/// keeps alongside its real OS-facing implementations for unit tests.
#[derive(Debug, Default, Clone)]
pub struct FakeLivenessOracle {
    alive: std::collections::HashSet<u32>,
}

impl FakeLivenessOracle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_alive(mut self, pid: u32) -> Self {
        self.alive.insert(pid);
        self
    }

    pub fn kill(&mut self, pid: u32) {
        self.alive.remove(&pid);
    }
}

impl LivenessOracle for FakeLivenessOracle {
    fn is_alive(&self, pid: u32) -> bool {
        self.alive.contains(&pid)
    }
}
