// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The loop that wakes the reclaim authority on memory pressure.

use std::path::Path;
use std::time::Duration;

use log::error;
use log::info;
use log::trace;
use log::warn;

use crate::psi;
use crate::psi::PsiWatcher;
use crate::reclaim::ReclaimAuthority;
use crate::reclaim::Urgency;

// Wake up if there is 150 ms stall time in a 1000 ms window.
const STALL: Duration = Duration::from_millis(150);
const WINDOW: Duration = Duration::from_millis(1000);
const POLL_INTERVAL: Duration = Duration::from_secs(1);
// PSI some avg10 treated as pressure when polling without a PSI trigger.
const POLLED_PRESSURE_THRESHOLD: f32 = 10.0;

fn urgency_from_avg10(avg10: f32) -> Urgency {
    if avg10 >= POLLED_PRESSURE_THRESHOLD {
        Urgency::Pressure
    } else {
        Urgency::Periodic
    }
}

fn polled_urgency(root: &Path) -> Urgency {
    match psi::memory_some_avg10(root) {
        Ok(avg10) => urgency_from_avg10(avg10),
        Err(e) => {
            trace!("Failed to poll memory pressure: {:#}", e);
            Urgency::Periodic
        }
    }
}

/// Runs a reclaim pass on every PSI event and at least once every second.
pub async fn pressure_loop(root: &Path, authority: ReclaimAuthority) {
    let mut watcher =
        match PsiWatcher::new_memory_pressure(root, psi::Target::Some, STALL, WINDOW) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("PSI memory trigger unavailable, polling only: {}", e);
                None
            }
        };
    info!("Watching memory pressure");

    loop {
        let event = match watcher.as_mut() {
            Some(w) => tokio::select! {
                result = w.wait() => Some(result),
                _ = tokio::time::sleep(POLL_INTERVAL) => None,
            },
            None => {
                tokio::time::sleep(POLL_INTERVAL).await;
                None
            }
        };
        let urgency = match event {
            Some(Ok(())) => Urgency::Pressure,
            Some(Err(e)) => {
                error!("PSI wait failed, falling back to polling: {}", e);
                watcher = None;
                Urgency::Periodic
            }
            None if watcher.is_some() => Urgency::Periodic,
            None => polled_urgency(root),
        };
        let remaining = authority.run_pass(urgency);
        trace!("Reclaim pass ({:?}) left {} pages", urgency, remaining);
    }
}
