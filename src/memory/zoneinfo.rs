// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

use anyhow::Context;
use anyhow::Result;

/// Watermark totals over all zones, in pages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ZoneWatermarks {
    /// Sum of every zone's high watermark and its largest lowmem protection.
    pub reserved_pages: u64,
    /// The largest high watermark of any zone.
    pub max_high_pages: u64,
}

impl ZoneWatermarks {
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join("proc/zoneinfo");
        let reader = File::open(&path)
            .map(BufReader::new)
            .with_context(|| format!("Couldn't read {}", path.display()))?;
        Self::parse(reader)
    }

    /// Parses /proc/zoneinfo. The relevant lines look like:
    ///
    /// Node 0, zone    DMA32
    ///   ...
    ///         high     24404
    ///         ...
    ///         protection: (0, 0, 1953, 1953)
    ///
    /// The high field is the high watermark for this zone. The protection field
    /// is the protected pages for lower zones. See the lowmem_reserve_ratio
    /// section in https://www.kernel.org/doc/Documentation/sysctl/vm.txt.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self> {
        let mut result = Self::default();

        for line in reader.lines() {
            let line = line?;
            let mut tokens = line.split_whitespace();
            let Some(key) = tokens.next() else {
                continue;
            };
            if key == "high" {
                let high = match tokens.next() {
                    Some(v) => v
                        .parse::<u64>()
                        .with_context(|| format!("Couldn't parse the high field: {}", line))?,
                    None => 0,
                };
                result.reserved_pages += high;
                result.max_high_pages = result.max_high_pages.max(high);
            } else if key == "protection:" {
                result.reserved_pages += tokens.try_fold(0u64, |maximal, token| -> Result<u64> {
                    let pattern = &['(', ')', ','][..];
                    let num = token
                        .trim_matches(pattern)
                        .parse::<u64>()
                        .with_context(|| format!("Couldn't parse protection field: {}", line))?;
                    Ok(std::cmp::max(maximal, num))
                })?;
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
pub(crate) const MOCK_ZONEINFO: &str = r#"
Node 0, zone      DMA
  pages free     3968
        min      137
        low      171
        high     205
        spanned  4095
        present  3999
        managed  3976
        protection: (0, 1832, 3000, 3786)
Node 0, zone    DMA32
  pages free     422432
        min      16270
        low      20337
        high     24404
        spanned  1044480
        present  485541
        managed  469149
        protection: (0, 0, 1953, 1500)
  pagesets
    cpu: 0
              count: 20
              high:  378
              batch: 63
Node 0, zone   Normal
  pages free     21708
        min      17383
        low      21728
        high     26073
        spanned  524288
        present  524288
        managed  501235
        protection: (0, 0, 0, 0)"#;
