// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Interfaces to the collaborators the low memory killer consumes.

use anyhow::Result;

use crate::lowmem::swap_request::SwapHeadroom;

/// A read-only view of one live process, taken during a catalog scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pub pid: i32,
    pub name: String,
    /// oom_score_adj. Higher is more disposable.
    pub score: i16,
    pub resident_pages: u64,
    pub kernel_owned: bool,
    pub uid: u32,
    /// Set once the process was sent a kill signal.
    pub pending_death: bool,
}

pub trait ProcessCatalog {
    /// Enumerates the live processes. Processes that can't be read are left out.
    fn scan(&self) -> Box<dyn Iterator<Item = ProcessSnapshot> + '_>;

    /// Records that `pid` was sent a kill signal. The marker lives as long as
    /// the process is listed.
    fn mark_pending_death(&mut self, pid: i32);

    fn find(&self, pid: i32) -> Option<ProcessSnapshot> {
        self.scan().find(|process| process.pid == pid)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationSignal {
    Kill,
}

impl TerminationSignal {
    pub fn as_raw(&self) -> libc::c_int {
        match self {
            TerminationSignal::Kill => libc::SIGKILL,
        }
    }
}

pub trait Terminator {
    /// Fire and forget. Doesn't wait for the process to exit.
    fn terminate(&mut self, pid: i32, signal: TerminationSignal) -> Result<()>;
}

/// Page counts the threshold evaluation works on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemorySample {
    /// Free pages minus the kernel reserve. May be negative.
    pub free_pages: i64,
    /// Page cache pages minus shared memory.
    pub file_pages: i64,
    /// Active and inactive anon and file pages.
    pub reclaimable_pages: u64,
}

pub trait MemoryStatsSource {
    fn sample(&self) -> Result<MemorySample>;

    fn swap_headroom(&self) -> Result<SwapHeadroom>;
}

/// Pages out the anonymous memory of a process.
pub trait PageReclaimBackend {
    fn reclaim_process(&mut self, pid: i32) -> Result<()>;
}
