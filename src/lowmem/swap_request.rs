// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Opportunistic swap requests.
//!
//! A companion process nominates one application process to be paged out
//! while the device is idle. The request is a `{target_pid, proceed}` pair;
//! `proceed` is cleared once the request was served or abandoned.

use log::error;
use log::info;
use log::warn;

use crate::lowmem::catalog::MemoryStatsSource;
use crate::lowmem::catalog::PageReclaimBackend;
use crate::lowmem::catalog::ProcessCatalog;
use crate::lowmem::profile::ScreenState;

/// Free swap below this many pages is kept for low memory situations.
pub const CHECK_FREE_SWAP_PAGES: u64 = 10240;
/// Used when no zone reports a high watermark.
pub const CHECK_FREE_MEMORY_PAGES: u64 = 2048;
/// Only application uids are eligible.
pub const APP_UID_FLOOR: u32 = 10000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SwapRequest {
    pub target_pid: i32,
    pub proceed: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SwapHeadroom {
    pub free_swap_pages: u64,
    pub free_ram_pages: u64,
    /// The largest zone high watermark, 0 if unknown.
    pub high_watermark_pages: u64,
}

impl SwapHeadroom {
    pub fn free_ram_threshold(&self) -> u64 {
        if self.high_watermark_pages != 0 {
            self.high_watermark_pages
        } else {
            CHECK_FREE_MEMORY_PAGES
        }
    }

    pub fn is_sufficient(&self) -> bool {
        self.free_swap_pages >= CHECK_FREE_SWAP_PAGES
            && self.free_ram_pages >= self.free_ram_threshold()
    }
}

/// Serves a stored request. Nothing happens unless `proceed` is set and the
/// screen is off.
pub fn serve_swap_request(
    request: &mut SwapRequest,
    screen: ScreenState,
    sampler: &dyn MemoryStatsSource,
    catalog: &dyn ProcessCatalog,
    backend: &mut dyn PageReclaimBackend,
) {
    if !request.proceed || screen != ScreenState::NonInteractive {
        return;
    }

    let headroom = match sampler.swap_headroom() {
        Ok(headroom) => headroom,
        Err(e) => {
            error!("Failed to read swap headroom: {:#}", e);
            request.proceed = false;
            return;
        }
    };
    if !headroom.is_sufficient() {
        info!(
            "Idle swap ignored: free RAM {}, free swap {}",
            headroom.free_ram_pages, headroom.free_swap_pages
        );
        request.proceed = false;
        return;
    }

    let Some(target) = catalog.find(request.target_pid) else {
        warn!("Idle swap target {} not found", request.target_pid);
        return;
    };
    if target.kernel_owned || target.resident_pages == 0 || target.uid <= APP_UID_FLOOR {
        warn!(
            "Idle swap target {} ({}) is not an application process",
            target.pid, target.name
        );
        return;
    }

    info!(
        "Idle swap: swap process pid {}, name {}, adj {}, size {}",
        target.pid, target.name, target.score, target.resident_pages
    );
    if let Err(e) = backend.reclaim_process(target.pid) {
        error!("Failed to page out {}: {:#}", target.pid, e);
    }
    request.proceed = false;
}
