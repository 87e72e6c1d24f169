// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

/// Struct to hold parsed /proc/meminfo data in KiB, only contains used fields.
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct MemInfo {
    pub free: u64,
    pub buffers: u64,
    pub cached: u64,
    pub swap_cached: u64,
    pub active_anon: u64,
    pub inactive_anon: u64,
    pub active_file: u64,
    pub inactive_file: u64,
    pub shmem: u64,
    pub swap_free: u64,
}

impl MemInfo {
    /// Load <root>/proc/meminfo and parse it.
    pub fn load(root: &Path) -> io::Result<Self> {
        let reader = File::open(root.join("proc/meminfo"))?;
        let reader = BufReader::new(reader);
        Self::parse(reader)
    }

    pub(crate) fn parse<R: BufRead>(reader: R) -> io::Result<Self> {
        let mut result = Self::default();
        for line in reader.lines() {
            let line = line?;
            let mut tokens = line.split_whitespace();
            let Some(key) = tokens.next() else {
                continue;
            };
            let field = match key {
                "MemFree:" => &mut result.free,
                "Buffers:" => &mut result.buffers,
                "Cached:" => &mut result.cached,
                "SwapCached:" => &mut result.swap_cached,
                "Active(anon):" => &mut result.active_anon,
                "Inactive(anon):" => &mut result.inactive_anon,
                "Active(file):" => &mut result.active_file,
                "Inactive(file):" => &mut result.inactive_file,
                "Shmem:" => &mut result.shmem,
                "SwapFree:" => &mut result.swap_free,
                _ => continue,
            };
            let Some(value) = tokens.next() else {
                continue;
            };
            let Ok(value) = value.parse::<u64>() else {
                continue;
            };
            *field = value;
        }
        Ok(result)
    }

    /// Page cache in KiB, the counterpart of NR_FILE_PAGES - NR_SHMEM.
    pub fn file_kb(&self) -> i64 {
        (self.cached + self.buffers + self.swap_cached) as i64 - self.shmem as i64
    }

    pub fn lru_kb(&self) -> u64 {
        self.active_anon + self.inactive_anon + self.active_file + self.inactive_file
    }
}

#[cfg(test)]
pub(crate) const MOCK_MEMINFO: &str = r#"MemTotal:        8025656 kB
MemFree:         4586928 kB
MemAvailable:    6704404 kB
Buffers:          659640 kB
Cached:          1949056 kB
SwapCached:          100 kB
Active:          1430416 kB
Inactive:        1556968 kB
Active(anon):     489640 kB
Inactive(anon):    29188 kB
Active(file):     940776 kB
Inactive(file):  1527780 kB
Unevictable:      151128 kB
Mlocked:           41008 kB
SwapTotal:      11756332 kB
SwapFree:       11756331 kB
Dirty:              5712 kB
Writeback:             0 kB
AnonPages:        529800 kB
Mapped:           321468 kB
Shmem:            140156 kB
Slab:             169252 kB
SReclaimable:     115540 kB
SUnreclaim:        53712 kB
KernelStack:        7072 kB
PageTables:        13340 kB
CommitLimit:    15769160 kB
Committed_AS:    2483600 kB
DirectMap4k:      170216 kB
DirectMap2M:     5992448 kB
DirectMap1G:     3145728 kB"#;
