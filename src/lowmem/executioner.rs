// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::time::Duration;
use std::time::Instant;

use log::error;
use log::info;

use crate::lowmem::catalog::ProcessCatalog;
use crate::lowmem::catalog::TerminationSignal;
use crate::lowmem::catalog::Terminator;
use crate::lowmem::selector::Candidate;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DebounceState {
    pub last_kill_at: Option<Instant>,
    pub cooldown: Duration,
}

impl DebounceState {
    pub fn new(cooldown: Duration) -> Self {
        DebounceState {
            last_kill_at: None,
            cooldown,
        }
    }

    /// Every victim killed so far is expected gone by this instant. Each kill
    /// pushes it back.
    pub fn deadline(&self) -> Option<Instant> {
        self.last_kill_at.map(|at| at + self.cooldown)
    }
}

/// Kills the victims of a pass and returns what is left of `reclaimable_pages`
/// once their resident memory is subtracted.
pub struct Executioner {
    debounce: DebounceState,
}

impl Executioner {
    pub fn new(cooldown: Duration) -> Self {
        Executioner {
            debounce: DebounceState::new(cooldown),
        }
    }

    pub fn debounce(&self) -> &DebounceState {
        &self.debounce
    }

    pub fn set_cooldown(&mut self, cooldown: Duration) {
        self.debounce.cooldown = cooldown;
    }

    pub fn execute(
        &mut self,
        now: Instant,
        victims: Vec<Candidate>,
        catalog: &mut dyn ProcessCatalog,
        terminator: &mut dyn Terminator,
        reclaimable_pages: u64,
    ) -> u64 {
        let mut remaining = reclaimable_pages;
        for victim in victims {
            info!(
                "send sigkill to {} ({}), adj {}, size {}",
                victim.pid, victim.name, victim.score, victim.resident_pages
            );
            if let Err(e) = terminator.terminate(victim.pid, TerminationSignal::Kill) {
                error!("Failed to kill {} ({}): {:#}", victim.pid, victim.name, e);
                continue;
            }
            self.debounce.last_kill_at = Some(now);
            catalog.mark_pending_death(victim.pid);
            remaining = remaining.saturating_sub(victim.resident_pages);
        }
        remaining
    }
}
