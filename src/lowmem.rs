// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The low memory killer.
//!
//! When free memory and page cache both drop below a tier's minfree, every
//! process whose oom_score_adj is at least the tier's cutoff becomes eligible,
//! and the strongest few (highest score, then largest) are killed in one pass.
//! A pass that finds a victim of an earlier pass still alive within the
//! cooldown backs off without killing anything.

pub mod catalog;
pub mod executioner;
pub mod profile;
pub mod selector;
pub mod swap_request;
pub mod threshold;

use std::time::Duration;
use std::time::Instant;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use log::debug;
use log::error;
use log::info;
use log::trace;
use log::warn;

use crate::config::debug_level_to_filter;
use crate::config::BreachPredicate;
use crate::config::Config;
use crate::config::TableValidation;
use crate::reclaim::ShrinkControl;
use crate::reclaim::Shrinker;
use crate::reclaim::Urgency;
use catalog::MemoryStatsSource;
use catalog::PageReclaimBackend;
use catalog::ProcessCatalog;
use catalog::Terminator;
use executioner::Executioner;
use profile::ScreenProfileSwitch;
use profile::ScreenState;
use selector::select_victims;
use selector::Selection;
use selector::MAX_POOL_CAPACITY;
use swap_request::serve_swap_request;
use swap_request::SwapRequest;
use threshold::check_ordering;
use threshold::rescale_legacy_scores;
use threshold::ThresholdTable;

const SHRINKER_NAME: &str = "lowmemorykiller";

// Trace output past per pass inputs is split further by debug level.
const DEBUG_LEVEL_PASS_RESULT: u32 = 4;
const DEBUG_LEVEL_COUNT_ONLY: u32 = 5;

/// The host interfaces the engine reads from and acts through.
pub struct Collaborators {
    pub catalog: Box<dyn ProcessCatalog + Send>,
    pub terminator: Box<dyn Terminator + Send>,
    pub sampler: Box<dyn MemoryStatsSource + Send>,
    pub reclaim_backend: Box<dyn PageReclaimBackend + Send>,
}

pub struct LowMemoryKiller {
    table: ThresholdTable,
    profile: ScreenProfileSwitch,
    executioner: Executioner,
    pool_capacity: usize,
    cost: u32,
    debug_level: u32,
    breach_predicate: BreachPredicate,
    table_validation: TableValidation,
    legacy_score_autodetect: bool,
    swap_request: SwapRequest,
    collaborators: Collaborators,
}

impl LowMemoryKiller {
    /// Builds the engine from `config`. Invalid values are logged and replaced
    /// with the defaults.
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        let defaults = Config::default();
        let mut lmk = LowMemoryKiller {
            table: ThresholdTable::new(
                defaults.cutoff_scores.clone(),
                defaults.minfree.clone(),
                config.max_tiers,
            ),
            profile: ScreenProfileSwitch::new(defaults.minfree_screen_off.clone()),
            executioner: Executioner::new(defaults.cooldown),
            pool_capacity: defaults.pool_capacity,
            cost: defaults.cost,
            debug_level: defaults.debug_level,
            breach_predicate: config.breach_predicate,
            table_validation: config.table_validation,
            legacy_score_autodetect: config.legacy_score_autodetect,
            swap_request: SwapRequest::default(),
            collaborators,
        };

        if let Err(e) = lmk.set_min_free_pages(config.minfree.clone()) {
            error!("Invalid minfree config: {:#}", e);
        }
        if let Err(e) = lmk.set_min_free_pages_screen_off(config.minfree_screen_off.clone()) {
            error!("Invalid minfree_screen_off config: {:#}", e);
        }
        if let Err(e) = lmk.set_cutoff_scores(config.cutoff_scores.clone()) {
            error!("Invalid adj config: {:#}", e);
        }
        if let Err(e) = lmk.set_pool_capacity(config.pool_capacity) {
            error!("Invalid pool_capacity config: {:#}", e);
        }
        if let Err(e) = lmk.set_debug_level(config.debug_level) {
            error!("Invalid debug_level config: {:#}", e);
        }
        lmk.set_cooldown(config.cooldown);
        lmk.set_cost(config.cost);
        lmk
    }

    /// Runs one pass at the current time. See `evaluate_at`.
    pub fn evaluate(&mut self, scan_budget: u64, urgency: Urgency) -> u64 {
        self.evaluate_at(Instant::now(), scan_budget, urgency)
    }

    /// Returns the reclaimable page estimate after the pass. A zero
    /// `scan_budget` only reports the estimate. Never fails: collaborator
    /// errors end the pass without killing anything.
    pub fn evaluate_at(&mut self, now: Instant, scan_budget: u64, urgency: Urgency) -> u64 {
        let sample = match self.collaborators.sampler.sample() {
            Ok(sample) => sample,
            Err(e) => {
                error!("Failed to sample memory stats: {:#}", e);
                return 0;
            }
        };
        let active = self.table.evaluate(&sample, self.breach_predicate);
        if scan_budget > 0 {
            trace!(
                "lowmem_shrink {}, {:?}, ofree {} {}, ma {:?}",
                scan_budget,
                urgency,
                sample.free_pages,
                sample.file_pages,
                active.map(|tier| tier.cutoff_score)
            );
        }

        let reclaimable = sample.reclaimable_pages;
        let Some(tier) = active.filter(|_| scan_budget > 0) else {
            if self.traces_at(DEBUG_LEVEL_COUNT_ONLY) {
                trace!("lowmem_shrink {}, return {}", scan_budget, reclaimable);
            }
            return reclaimable;
        };
        debug!(
            "Tier {} breached, cutoff {}, target {} pages",
            tier.index, tier.cutoff_score, tier.target_pages
        );

        let kill_deadline = self.executioner.debounce().deadline();
        let selection = select_victims(
            self.collaborators.catalog.scan(),
            tier.cutoff_score,
            self.pool_capacity,
            now,
            kill_deadline,
        );
        let pool = match selection {
            Selection::InFlight { pid } => {
                debug!("{} is still dying, skipping this pass", pid);
                return 0;
            }
            Selection::Pool(pool) => pool,
        };

        let remaining = self.executioner.execute(
            now,
            pool.into_victims(),
            self.collaborators.catalog.as_mut(),
            self.collaborators.terminator.as_mut(),
            reclaimable,
        );
        if self.traces_at(DEBUG_LEVEL_PASS_RESULT) {
            trace!("lowmem_shrink {}, return {}", scan_budget, remaining);
        }
        remaining
    }

    /// Display events. Repeated events for the current state are ignored.
    pub fn set_screen_state(&mut self, state: ScreenState) {
        self.profile.transition(state, &mut self.table);
    }

    pub fn screen_state(&self) -> ScreenState {
        self.profile.state()
    }

    pub fn cutoff_scores(&self) -> &[i16] {
        self.table.cutoff_scores()
    }

    /// Legacy oom_adj values are rescaled when autodetection is on. The whole
    /// array is converted, not only the part paired with minfree entries.
    pub fn set_cutoff_scores(&mut self, mut cutoff_scores: Vec<i16>) -> Result<()> {
        if self.legacy_score_autodetect {
            rescale_legacy_scores(&mut cutoff_scores, self.table.max_tiers());
        }
        self.validate(&cutoff_scores, self.table.min_free_pages())?;
        self.table.replace_cutoff_scores(cutoff_scores);
        info!("Cutoff scores set to {:?}", self.table.cutoff_scores());
        Ok(())
    }

    /// The interactive minfree values, wherever they currently live.
    pub fn min_free_pages(&self) -> &[u32] {
        self.profile.interactive_min_free_pages(&self.table)
    }

    pub fn set_min_free_pages(&mut self, min_free_pages: Vec<u32>) -> Result<()> {
        self.validate(self.table.cutoff_scores(), &min_free_pages)?;
        self.profile
            .set_interactive_min_free_pages(min_free_pages, &mut self.table);
        info!("Minfree set to {:?}", self.min_free_pages());
        Ok(())
    }

    pub fn min_free_pages_screen_off(&self) -> &[u32] {
        self.profile.non_interactive_min_free_pages()
    }

    pub fn set_min_free_pages_screen_off(&mut self, min_free_pages: Vec<u32>) -> Result<()> {
        self.validate(self.table.cutoff_scores(), &min_free_pages)?;
        self.profile
            .set_non_interactive_min_free_pages(min_free_pages, &mut self.table);
        info!(
            "Screen off minfree set to {:?}",
            self.profile.non_interactive_min_free_pages()
        );
        Ok(())
    }

    /// The minfree values the evaluation currently uses.
    pub fn active_min_free_pages(&self) -> &[u32] {
        self.table.min_free_pages()
    }

    fn validate(&self, cutoff_scores: &[i16], min_free_pages: &[u32]) -> Result<()> {
        if let Err(e) = check_ordering(cutoff_scores, min_free_pages, self.table.max_tiers()) {
            match self.table_validation {
                TableValidation::Permissive => warn!("Threshold table out of order: {:#}", e),
                TableValidation::Strict => return Err(e.context("Threshold table rejected")),
            }
        }
        Ok(())
    }

    pub fn pool_capacity(&self) -> usize {
        self.pool_capacity
    }

    pub fn set_pool_capacity(&mut self, pool_capacity: usize) -> Result<()> {
        if pool_capacity == 0 {
            bail!("Pool capacity must be at least 1");
        }
        if pool_capacity > MAX_POOL_CAPACITY {
            bail!(
                "Pool capacity {} exceeds the maximum {}",
                pool_capacity,
                MAX_POOL_CAPACITY
            );
        }
        self.pool_capacity = pool_capacity;
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        self.executioner.debounce().cooldown
    }

    pub fn set_cooldown(&mut self, cooldown: Duration) {
        self.executioner.set_cooldown(cooldown);
    }

    pub fn set_cost(&mut self, cost: u32) {
        self.cost = cost;
    }

    pub fn debug_level(&self) -> u32 {
        self.debug_level
    }

    fn traces_at(&self, level: u32) -> bool {
        self.debug_level >= level
    }

    pub fn set_debug_level(&mut self, debug_level: u32) -> Result<()> {
        let filter = debug_level_to_filter(debug_level).context("Failed to set debug level")?;
        log::set_max_level(filter);
        self.debug_level = debug_level;
        Ok(())
    }

    pub fn breach_predicate(&self) -> BreachPredicate {
        self.breach_predicate
    }

    pub fn set_breach_predicate(&mut self, breach_predicate: BreachPredicate) {
        self.breach_predicate = breach_predicate;
    }

    pub fn swap_request(&self) -> SwapRequest {
        self.swap_request
    }

    /// Stores the request and serves it if the screen is off.
    pub fn set_swap_request(&mut self, request: SwapRequest) {
        self.swap_request = request;
        serve_swap_request(
            &mut self.swap_request,
            self.profile.state(),
            self.collaborators.sampler.as_ref(),
            self.collaborators.catalog.as_ref(),
            self.collaborators.reclaim_backend.as_mut(),
        );
    }
}

impl Shrinker for LowMemoryKiller {
    fn name(&self) -> &str {
        SHRINKER_NAME
    }

    fn shrink(&mut self, sc: ShrinkControl) -> u64 {
        self.evaluate(sc.nr_to_scan, sc.urgency)
    }

    fn cost(&self) -> u32 {
        self.cost
    }
}
