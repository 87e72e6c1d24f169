// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod meminfo;
mod page_size;
mod zoneinfo;

use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use log::warn;

pub use meminfo::MemInfo;
pub use page_size::get_page_size;
use page_size::kb_to_pages;
use page_size::signed_kb_to_pages;
pub use zoneinfo::ZoneWatermarks;

use crate::lowmem::catalog::MemorySample;
use crate::lowmem::catalog::MemoryStatsSource;
use crate::lowmem::swap_request::SwapHeadroom;

/// Memory statistics from `<root>/proc/meminfo` and `<root>/proc/zoneinfo`.
pub struct MemInfoSampler {
    root: PathBuf,
}

impl MemInfoSampler {
    pub fn new(root: &Path) -> Self {
        MemInfoSampler {
            root: root.to_path_buf(),
        }
    }

    fn load_watermarks(&self) -> ZoneWatermarks {
        match ZoneWatermarks::load(&self.root) {
            Ok(watermarks) => watermarks,
            Err(e) => {
                warn!("Failed to load zone watermarks: {:#}", e);
                ZoneWatermarks::default()
            }
        }
    }
}

fn to_sample(meminfo: &MemInfo, watermarks: &ZoneWatermarks) -> MemorySample {
    MemorySample {
        free_pages: kb_to_pages(meminfo.free) as i64 - watermarks.reserved_pages as i64,
        file_pages: signed_kb_to_pages(meminfo.file_kb()),
        reclaimable_pages: kb_to_pages(meminfo.lru_kb()),
    }
}

fn to_headroom(meminfo: &MemInfo, watermarks: &ZoneWatermarks) -> SwapHeadroom {
    SwapHeadroom {
        free_swap_pages: kb_to_pages(meminfo.swap_free),
        free_ram_pages: kb_to_pages(meminfo.free),
        high_watermark_pages: watermarks.max_high_pages,
    }
}

impl MemoryStatsSource for MemInfoSampler {
    fn sample(&self) -> Result<MemorySample> {
        let meminfo = MemInfo::load(&self.root).context("Couldn't read meminfo")?;
        Ok(to_sample(&meminfo, &self.load_watermarks()))
    }

    fn swap_headroom(&self) -> Result<SwapHeadroom> {
        let meminfo = MemInfo::load(&self.root).context("Couldn't read meminfo")?;
        Ok(to_headroom(&meminfo, &self.load_watermarks()))
    }
}
