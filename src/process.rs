// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! procfs backed process catalog and the kill and page out primitives.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use log::trace;
use procfs::process::Process;

use crate::common::read_from_file;
use crate::lowmem::catalog::PageReclaimBackend;
use crate::lowmem::catalog::ProcessCatalog;
use crate::lowmem::catalog::ProcessSnapshot;
use crate::lowmem::catalog::TerminationSignal;
use crate::lowmem::catalog::Terminator;

/// Set in /proc/<pid>/stat flags for kernel threads.
pub const PF_KTHREAD: u32 = 0x0020_0000;

/// Enumerates `<proc_root>/<pid>` directories. Pending death markers live here
/// since procfs has no place for them.
pub struct ProcfsCatalog {
    proc_root: PathBuf,
    pending: HashSet<i32>,
}

impl ProcfsCatalog {
    pub fn new(root: &Path) -> Self {
        ProcfsCatalog {
            proc_root: root.join("proc"),
            pending: HashSet::new(),
        }
    }

    fn read_process(&self, pid: i32) -> Result<ProcessSnapshot> {
        let dir = self.proc_root.join(pid.to_string());
        let process = Process::new_with_root(dir.clone())?;
        let stat = process.stat()?;
        let status = process.status()?;
        // procfs only exposes oom_score, not the adjustment.
        let score = read_from_file::<i16, _>(&dir.join("oom_score_adj"))?;

        Ok(ProcessSnapshot {
            pid,
            name: stat.comm,
            score,
            resident_pages: stat.rss,
            kernel_owned: stat.flags & PF_KTHREAD != 0,
            uid: status.ruid,
            pending_death: self.pending.contains(&pid),
        })
    }

    fn list_pids(&self) -> io::Result<impl Iterator<Item = i32>> {
        Ok(std::fs::read_dir(&self.proc_root)?.filter_map(|entry| {
            entry
                .ok()?
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<i32>().ok())
        }))
    }
}

impl ProcessCatalog for ProcfsCatalog {
    fn scan(&self) -> Box<dyn Iterator<Item = ProcessSnapshot> + '_> {
        let pids = match self.list_pids() {
            Ok(pids) => pids,
            Err(e) => {
                trace!("Failed to list {}: {}", self.proc_root.display(), e);
                return Box::new(std::iter::empty());
            }
        };
        // Processes may exit at any time during the scan.
        Box::new(pids.filter_map(move |pid| match self.read_process(pid) {
            Ok(process) => Some(process),
            Err(e) => {
                trace!("Skipping {}: {:#}", pid, e);
                None
            }
        }))
    }

    fn mark_pending_death(&mut self, pid: i32) {
        let proc_root = &self.proc_root;
        self.pending
            .retain(|alive| proc_root.join(alive.to_string()).exists());
        self.pending.insert(pid);
    }

    fn find(&self, pid: i32) -> Option<ProcessSnapshot> {
        self.read_process(pid).ok()
    }
}

pub struct SignalTerminator;

impl Terminator for SignalTerminator {
    fn terminate(&mut self, pid: i32, signal: TerminationSignal) -> Result<()> {
        // SAFETY: kill doesn't touch memory.
        if unsafe { libc::kill(pid, signal.as_raw()) } != 0 {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("Failed to signal {}", pid));
        }
        Ok(())
    }
}

/// Pages out the anonymous memory of a process through /proc/<pid>/reclaim.
pub struct ProcReclaimBackend {
    proc_root: PathBuf,
}

impl ProcReclaimBackend {
    pub fn new(root: &Path) -> Self {
        ProcReclaimBackend {
            proc_root: root.join("proc"),
        }
    }
}

impl PageReclaimBackend for ProcReclaimBackend {
    fn reclaim_process(&mut self, pid: i32) -> Result<()> {
        let path = self.proc_root.join(pid.to_string()).join("reclaim");
        let mut file = OpenOptions::new()
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(b"anon")
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn stat_line(pid: i32, comm: &str, flags: u32, rss: u64) -> String {
        format!(
            "{} ({}) S 1 {} {} 0 -1 {} 1234 0 0 0 10 20 0 0 20 0 4 0 5000 123456789 {} \
             18446744073709551615 1 1 0 0 0 0 0 4096 0 0 0 0 17 1 0 0 0 0 0 0 0 0 0 0 0 0 0",
            pid, comm, pid, pid, flags, rss
        )
    }

    fn status_text(pid: i32, comm: &str, uid: u32) -> String {
        format!(
            "Name:\t{comm}\nUmask:\t0022\nState:\tS (sleeping)\nTgid:\t{pid}\nNgid:\t0\n\
             Pid:\t{pid}\nPPid:\t1\nTracerPid:\t0\nUid:\t{uid}\t{uid}\t{uid}\t{uid}\n\
             Gid:\t{uid}\t{uid}\t{uid}\t{uid}\nFDSize:\t64\nGroups:\t\nThreads:\t4\n\
             SigQ:\t0/31202\nSigPnd:\t0000000000000000\nShdPnd:\t0000000000000000\n\
             SigBlk:\t0000000000000000\nSigIgn:\t0000000000001000\n\
             SigCgt:\t0000000000000000\nCapInh:\t0000000000000000\n\
             CapPrm:\t0000000000000000\nCapEff:\t0000000000000000\n",
            comm = comm,
            pid = pid,
            uid = uid
        )
    }

    fn write_process(root: &Path, pid: i32, comm: &str, flags: u32, rss: u64, adj: i16, uid: u32) {
        let dir = root.join("proc").join(pid.to_string());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("stat"), stat_line(pid, comm, flags, rss)).unwrap();
        std::fs::write(dir.join("oom_score_adj"), format!("{}\n", adj)).unwrap();
        std::fs::write(dir.join("status"), status_text(pid, comm, uid)).unwrap();
    }

    #[test]
    fn test_scan() {
        let root = tempdir().unwrap();
        write_process(root.path(), 100, "renderer", 0x400100, 2000, 300, 10050);
        write_process(root.path(), 2, "kthreadd", PF_KTHREAD | 0x40, 0, 0, 0);
        // Missing oom_score_adj, e.g. exited mid scan.
        write_process(root.path(), 300, "gone", 0, 10, 0, 0);
        std::fs::remove_file(root.path().join("proc/300/oom_score_adj")).unwrap();
        // Truncated status.
        write_process(root.path(), 400, "torn", 0, 10, 0, 0);
        std::fs::write(root.path().join("proc/400/status"), "Name:\ttorn\n").unwrap();
        // Not a process.
        std::fs::create_dir_all(root.path().join("proc/sys")).unwrap();
        std::fs::write(root.path().join("proc/meminfo"), "").unwrap();

        let catalog = ProcfsCatalog::new(root.path());
        let mut processes: Vec<_> = catalog.scan().collect();
        processes.sort_by_key(|p| p.pid);
        assert_eq!(processes.len(), 2);

        assert_eq!(processes[0].pid, 2);
        assert!(processes[0].kernel_owned);

        assert_eq!(
            processes[1],
            ProcessSnapshot {
                pid: 100,
                name: "renderer".to_string(),
                score: 300,
                resident_pages: 2000,
                kernel_owned: false,
                uid: 10050,
                pending_death: false,
            }
        );
        assert_eq!(catalog.find(100), Some(processes[1].clone()));
        assert_eq!(catalog.find(300), None);
        assert_eq!(catalog.find(400), None);
    }

    #[test]
    fn test_comm_with_parentheses() {
        let root = tempdir().unwrap();
        write_process(root.path(), 42, "a (weird) name", 0x400040, 1500, -100, 1000);
        let process = ProcfsCatalog::new(root.path()).find(42).unwrap();
        assert_eq!(process.name, "a (weird) name");
        assert_eq!(process.resident_pages, 1500);
        assert_eq!(process.score, -100);
        assert_eq!(process.uid, 1000);
    }

    #[test]
    fn test_scan_missing_proc() {
        let root = tempdir().unwrap();
        let catalog = ProcfsCatalog::new(root.path());
        assert_eq!(catalog.scan().count(), 0);
    }

    #[test]
    fn test_pending_death_markers() {
        let root = tempdir().unwrap();
        write_process(root.path(), 100, "a", 0, 10, 0, 0);
        write_process(root.path(), 200, "b", 0, 10, 0, 0);
        let mut catalog = ProcfsCatalog::new(root.path());

        catalog.mark_pending_death(100);
        assert!(catalog.find(100).unwrap().pending_death);
        assert!(!catalog.find(200).unwrap().pending_death);

        // Markers of exited processes are dropped.
        std::fs::remove_dir_all(root.path().join("proc/100")).unwrap();
        catalog.mark_pending_death(200);
        assert!(!catalog.pending.contains(&100));
        assert!(catalog.pending.contains(&200));
    }

    #[test]
    fn test_scan_current_process() {
        let catalog = ProcfsCatalog::new(Path::new("/"));
        let pid = std::process::id() as i32;
        let me = catalog.find(pid).unwrap();
        assert!(!me.kernel_owned);
        assert!(me.resident_pages > 0);
    }

    #[test]
    fn test_proc_reclaim_backend() {
        let root = tempdir().unwrap();
        let dir = root.path().join("proc/42");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("reclaim"), "").unwrap();

        let mut backend = ProcReclaimBackend::new(root.path());
        backend.reclaim_process(42).unwrap();
        assert_eq!(std::fs::read_to_string(dir.join("reclaim")).unwrap(), "anon");
        assert!(backend.reclaim_process(43).is_err());
    }

    #[test]
    fn test_signal_terminator_missing_process() {
        // Pid max is well below i32::MAX.
        assert!(SignalTerminator
            .terminate(i32::MAX, TerminationSignal::Kill)
            .is_err());
    }
}
