// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The reclaim authority drives registered shrinkers when memory is tight.
//!
//! Every pass asks each shrinker how much it could reclaim (a count-only
//! query with `nr_to_scan == 0`) and then hands it a scan budget scaled by its
//! relative cost, the way the kernel's shrink_slab() weighs `seeks`.

use std::sync::Arc;
use std::sync::Mutex;

use log::trace;

use crate::sync::NoPoison;

/// The cost weight of a shrinker whose objects are as expensive to recreate as
/// an average page.
pub const DEFAULT_SEEKS: u32 = 2;

/// Why the authority is running a pass. Informational for the shrinkers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Urgency {
    Periodic,
    Pressure,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShrinkControl {
    /// 0 means "only report the reclaimable estimate".
    pub nr_to_scan: u64,
    pub urgency: Urgency,
}

pub trait Shrinker {
    fn name(&self) -> &str;

    /// Returns the remaining reclaimable estimate in pages.
    fn shrink(&mut self, sc: ShrinkControl) -> u64;

    /// Relative cost of reclaiming from this shrinker, in units of seeks.
    fn cost(&self) -> u32;
}

pub type SharedShrinker = Arc<Mutex<dyn Shrinker + Send>>;

#[derive(Default)]
pub struct ReclaimAuthority {
    shrinkers: Vec<SharedShrinker>,
}

impl ReclaimAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, shrinker: SharedShrinker) {
        self.shrinkers.push(shrinker);
    }

    /// Runs one reclaim pass over every registered shrinker and returns the sum
    /// of their remaining estimates.
    pub fn run_pass(&self, urgency: Urgency) -> u64 {
        let mut remaining: u64 = 0;
        for entry in &self.shrinkers {
            let mut shrinker = entry.do_lock();
            let count = shrinker.shrink(ShrinkControl {
                nr_to_scan: 0,
                urgency,
            });
            if count == 0 {
                continue;
            }
            let nr_to_scan = scan_budget(count, shrinker.cost());
            let left = shrinker.shrink(ShrinkControl {
                nr_to_scan,
                urgency,
            });
            trace!(
                "{}: count {}, scan {}, remaining {}",
                shrinker.name(),
                count,
                nr_to_scan,
                left
            );
            remaining = remaining.saturating_add(left);
        }
        remaining
    }
}

/// Scales the count of a shrinker by its cost. A costlier shrinker gets a
/// smaller budget, never less than 1 page.
pub fn scan_budget(count: u64, cost: u32) -> u64 {
    if count == 0 {
        return 0;
    }
    let cost = u64::from(cost.max(1));
    (count.saturating_mul(u64::from(DEFAULT_SEEKS)) / cost).max(1)
}
