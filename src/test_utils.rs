// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fake collaborators for unit tests.

use std::sync::Arc;
use std::sync::Mutex;

use anyhow::bail;
use anyhow::Result;

use crate::lowmem::catalog::MemorySample;
use crate::lowmem::catalog::MemoryStatsSource;
use crate::lowmem::catalog::PageReclaimBackend;
use crate::lowmem::catalog::ProcessCatalog;
use crate::lowmem::catalog::ProcessSnapshot;
use crate::lowmem::catalog::TerminationSignal;
use crate::lowmem::catalog::Terminator;
use crate::lowmem::swap_request::SwapHeadroom;
use crate::sync::NoPoison;

pub fn process(pid: i32, score: i16, resident_pages: u64) -> ProcessSnapshot {
    ProcessSnapshot {
        pid,
        name: format!("proc{}", pid),
        score,
        resident_pages,
        kernel_owned: false,
        uid: 0,
        pending_death: false,
    }
}

/// A catalog backed by a vector shared with the test, so processes can be
/// added or removed while the engine owns the catalog.
#[derive(Clone, Default)]
pub struct FakeCatalog {
    pub processes: Arc<Mutex<Vec<ProcessSnapshot>>>,
}

impl FakeCatalog {
    pub fn new(processes: Vec<ProcessSnapshot>) -> Self {
        FakeCatalog {
            processes: Arc::new(Mutex::new(processes)),
        }
    }

    pub fn remove(&self, pid: i32) {
        self.processes.do_lock().retain(|p| p.pid != pid);
    }
}

impl ProcessCatalog for FakeCatalog {
    fn scan(&self) -> Box<dyn Iterator<Item = ProcessSnapshot> + '_> {
        let snapshot = self.processes.do_lock().clone();
        Box::new(snapshot.into_iter())
    }

    fn mark_pending_death(&mut self, pid: i32) {
        for process in self.processes.do_lock().iter_mut() {
            if process.pid == pid {
                process.pending_death = true;
            }
        }
    }
}

#[derive(Default)]
pub struct FakeTerminator {
    pub killed: Vec<(i32, TerminationSignal)>,
    pub failing_pids: Vec<i32>,
}

impl Terminator for FakeTerminator {
    fn terminate(&mut self, pid: i32, signal: TerminationSignal) -> Result<()> {
        if self.failing_pids.contains(&pid) {
            bail!("No such process");
        }
        self.killed.push((pid, signal));
        Ok(())
    }
}

/// A terminator whose kill log outlives the engine that owns it.
#[derive(Clone, Default)]
pub struct SharedTerminator {
    pub killed: Arc<Mutex<Vec<i32>>>,
}

impl Terminator for SharedTerminator {
    fn terminate(&mut self, pid: i32, _signal: TerminationSignal) -> Result<()> {
        self.killed.do_lock().push(pid);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeSampler {
    pub sample: Arc<Mutex<Option<MemorySample>>>,
    pub headroom: SwapHeadroom,
}

impl FakeSampler {
    pub fn new(sample: MemorySample, headroom: SwapHeadroom) -> Self {
        FakeSampler {
            sample: Arc::new(Mutex::new(Some(sample))),
            headroom,
        }
    }

    pub fn set(&self, sample: Option<MemorySample>) {
        *self.sample.do_lock() = sample;
    }
}

impl MemoryStatsSource for FakeSampler {
    fn sample(&self) -> Result<MemorySample> {
        match *self.sample.do_lock() {
            Some(sample) => Ok(sample),
            None => bail!("meminfo unavailable"),
        }
    }

    fn swap_headroom(&self) -> Result<SwapHeadroom> {
        Ok(self.headroom)
    }
}

#[derive(Clone, Default)]
pub struct FakeReclaimBackend {
    pub reclaimed: Vec<i32>,
    pub fail: bool,
}

impl PageReclaimBackend for FakeReclaimBackend {
    fn reclaim_process(&mut self, pid: i32) -> Result<()> {
        if self.fail {
            bail!("reclaim not supported");
        }
        self.reclaimed.push(pid);
        Ok(())
    }
}

/// A reclaim backend whose log outlives the engine that owns it.
#[derive(Clone, Default)]
pub struct SharedReclaimBackend {
    pub reclaimed: Arc<Mutex<Vec<i32>>>,
}

impl PageReclaimBackend for SharedReclaimBackend {
    fn reclaim_process(&mut self, pid: i32) -> Result<()> {
        self.reclaimed.do_lock().push(pid);
        Ok(())
    }
}
