// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::time::Instant;

use log::debug;

use crate::lowmem::catalog::ProcessSnapshot;

/// Upper bound on the victims of a single pass. The pool is allocated up front.
pub const MAX_POOL_CAPACITY: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub pid: i32,
    pub name: String,
    pub score: i16,
    pub resident_pages: u64,
}

impl Candidate {
    fn from_snapshot(snapshot: ProcessSnapshot) -> Self {
        Candidate {
            pid: snapshot.pid,
            name: snapshot.name,
            score: snapshot.score,
            resident_pages: snapshot.resident_pages,
        }
    }

    /// Ordered by score first, then by size.
    fn outranks(&self, other: &Candidate) -> bool {
        self.score > other.score
            || (self.score == other.score && self.resident_pages > other.resident_pages)
    }

    fn is_weaker_than(&self, other: &Candidate) -> bool {
        self.score < other.score
            || (self.score == other.score && self.resident_pages < other.resident_pages)
    }
}

/// A bounded set of kill candidates, filled online in a single pass over the
/// catalog. Once full, a new candidate only gets in by replacing the weakest
/// slot.
#[derive(Clone, Debug)]
pub struct CandidatePool {
    slots: Vec<Option<Candidate>>,
    filled: usize,
    weakest: usize,
}

impl CandidatePool {
    pub fn with_capacity(capacity: usize) -> Self {
        CandidatePool {
            slots: (0..capacity).map(|_| None).collect(),
            filled: 0,
            weakest: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Returns true if the candidate entered the pool.
    pub fn offer(&mut self, candidate: Candidate) -> bool {
        let capacity = self.capacity();
        if capacity == 0 {
            return false;
        }
        if self.filled < capacity {
            let Some(empty) = self.slots.iter().position(Option::is_none) else {
                return false;
            };
            self.weakest = empty;
        } else {
            let Some(weakest) = &self.slots[self.weakest] else {
                return false;
            };
            if !candidate.outranks(weakest) {
                return false;
            }
        }

        self.slots[self.weakest] = Some(candidate);
        if self.filled < capacity {
            self.filled += 1;
        }
        if self.filled == capacity {
            self.recompute_weakest();
        }
        true
    }

    fn recompute_weakest(&mut self) {
        let mut weakest = self.weakest;
        for i in 0..self.slots.len() {
            if let (Some(candidate), Some(current)) = (&self.slots[i], &self.slots[weakest]) {
                if candidate.is_weaker_than(current) {
                    weakest = i;
                }
            }
        }
        self.weakest = weakest;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.slots.iter().flatten()
    }

    pub fn into_victims(self) -> Vec<Candidate> {
        self.slots.into_iter().flatten().collect()
    }
}

#[derive(Debug)]
pub enum Selection {
    /// A victim of an earlier pass hasn't exited yet. Nothing may be killed.
    InFlight { pid: i32 },
    Pool(CandidatePool),
}

/// Scans the catalog once and keeps the strongest `capacity` eligible
/// processes. Kernel processes, processes without resident memory and
/// processes below `cutoff_score` are never eligible.
///
/// `kill_deadline` is the end of the cooldown started by the most recent
/// kill. Until then, any earlier victim still listed aborts the pass.
pub fn select_victims<I>(
    snapshots: I,
    cutoff_score: i16,
    capacity: usize,
    now: Instant,
    kill_deadline: Option<Instant>,
) -> Selection
where
    I: IntoIterator<Item = ProcessSnapshot>,
{
    let in_cooldown = matches!(kill_deadline, Some(deadline) if now <= deadline);
    let mut pool = CandidatePool::with_capacity(capacity.min(MAX_POOL_CAPACITY));
    for snapshot in snapshots {
        if snapshot.kernel_owned || snapshot.resident_pages == 0 {
            continue;
        }
        if in_cooldown && snapshot.pending_death {
            return Selection::InFlight { pid: snapshot.pid };
        }
        if snapshot.score < cutoff_score {
            continue;
        }

        let candidate = Candidate::from_snapshot(snapshot);
        let (pid, score, size) = (candidate.pid, candidate.score, candidate.resident_pages);
        let name = candidate.name.clone();
        if pool.offer(candidate) {
            debug!(
                "select {} ({}), adj {}, size {}, to kill",
                pid, name, score, size
            );
        }
    }
    Selection::Pool(pool)
}
