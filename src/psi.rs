// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Pressure stall information (PSI) utilities.
//!
//! PSI documentation: https://docs.kernel.org/accounting/psi.html

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

const MEMORY_PRESSURE_PATH: &str = "proc/pressure/memory";

/// The target of the PSI. Either "some" or "full".
pub enum Target {
    Some,
    Full,
}

impl Target {
    fn to_str(&self) -> &'static str {
        match self {
            Target::Some => "some",
            Target::Full => "full",
        }
    }
}

fn trigger_config(target: Target, stall: Duration, window: Duration) -> String {
    format!(
        "{} {} {}\0",
        target.to_str(),
        stall.as_micros(),
        window.as_micros()
    )
}

/// A watcher for PSI events.
pub struct PsiWatcher {
    fd: AsyncFd<File>,
}

impl PsiWatcher {
    /// Creates a new PSI watcher on `<root>/proc/pressure/memory`.
    pub fn new_memory_pressure(
        root: &Path,
        target: Target,
        stall: Duration,
        window: Duration,
    ) -> io::Result<Self> {
        Self::new(&root.join(MEMORY_PRESSURE_PATH), target, stall, window)
    }

    fn new(path: &Path, target: Target, stall: Duration, window: Duration) -> io::Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        file.write_all(trigger_config(target, stall, window).as_bytes())?;

        // Monitor POLLPRI for PSI events.
        // https://docs.kernel.org/accounting/psi.html#userspace-monitor-usage-example
        let fd = AsyncFd::with_interest(file, Interest::PRIORITY)?;

        Ok(Self { fd })
    }

    /// Waits for a PSI event to occur.
    pub async fn wait(&mut self) -> io::Result<()> {
        self.fd.readable().await?.clear_ready();
        Ok(())
    }
}

fn parse_some_avg10(content: &str) -> Result<f32> {
    let Some(record) = content.lines().find_map(|line| line.strip_prefix("some ")) else {
        bail!("no some record");
    };
    let Some(avg10) = record
        .split_whitespace()
        .find_map(|field| field.strip_prefix("avg10="))
    else {
        bail!("no avg10 in some record");
    };
    avg10.parse().context("failed to parse avg10")
}

/// Reads the 10 second "some" average of `<root>/proc/pressure/memory`.
/// procfs::MemoryPressure always reads the host /proc, so the file is parsed
/// here to honor `root`.
pub fn memory_some_avg10(root: &Path) -> Result<f32> {
    let path = root.join(MEMORY_PRESSURE_PATH);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_some_avg10(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_config() {
        assert_eq!(
            trigger_config(
                Target::Some,
                Duration::from_millis(150),
                Duration::from_secs(1)
            ),
            "some 150000 1000000\0"
        );
        assert_eq!(
            trigger_config(
                Target::Full,
                Duration::from_millis(70),
                Duration::from_millis(500)
            ),
            "full 70000 500000\0"
        );
    }

    #[test]
    fn test_memory_some_avg10() {
        let root = tempfile::tempdir().unwrap();
        assert!(memory_some_avg10(root.path()).is_err());

        std::fs::create_dir_all(root.path().join("proc/pressure")).unwrap();
        std::fs::write(
            root.path().join(MEMORY_PRESSURE_PATH),
            "some avg10=12.50 avg60=3.00 avg300=1.00 total=12345\n\
             full avg10=4.00 avg60=1.00 avg300=0.20 total=678\n",
        )
        .unwrap();
        assert_eq!(memory_some_avg10(root.path()).unwrap(), 12.5);

        assert!(parse_some_avg10("full avg10=4.00 avg60=1.00 avg300=0.20 total=678\n").is_err());
        assert!(parse_some_avg10("some avg60=1.00\n").is_err());
    }

    #[test]
    fn test_missing_pressure_file() {
        let root = tempfile::tempdir().unwrap();
        assert!(PsiWatcher::new_memory_pressure(
            root.path(),
            Target::Some,
            Duration::from_millis(150),
            Duration::from_secs(1)
        )
        .is_err());
    }
}
