// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use log::error;
use log::LevelFilter;

use crate::common::format_number_list;
use crate::common::read_from_file;
use crate::common::read_number_list_from_file;
use crate::reclaim::DEFAULT_SEEKS;

pub const CONFIG_DIR: &str = "run/lowmemd";

const CUTOFF_SCORES_FILENAME: &str = "adj";
const MINFREE_FILENAME: &str = "minfree";
const MINFREE_SCREEN_OFF_FILENAME: &str = "minfree_screen_off";
const POOL_CAPACITY_FILENAME: &str = "pool_capacity";
const COOLDOWN_MS_FILENAME: &str = "cooldown_ms";
const COST_FILENAME: &str = "cost";
const DEBUG_LEVEL_FILENAME: &str = "debug_level";
const BREACH_PREDICATE_FILENAME: &str = "breach_predicate";
const TABLE_VALIDATION_FILENAME: &str = "table_validation";

pub const DEFAULT_MAX_TIERS: usize = 6;
pub const DEFAULT_CUTOFF_SCORES: [i16; 6] = [0, 1, 6, 12, 16, 17];
// In pages.
pub const DEFAULT_MINFREE: [u32; 6] = [1536, 2048, 4096, 5120, 8192, 16384];
pub const DEFAULT_POOL_CAPACITY: usize = 3;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(1);
pub const DEFAULT_COST: u32 = DEFAULT_SEEKS * 16;
pub const DEFAULT_DEBUG_LEVEL: u32 = 1;
pub const MAX_DEBUG_LEVEL: u32 = 5;

/// Which memory counters must be below a tier's minfree for the tier to be
/// considered breached.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BreachPredicate {
    #[default]
    FreeAndFile,
    FreeOnly,
    FileOnly,
}

impl BreachPredicate {
    pub fn is_breached(&self, free_pages: i64, file_pages: i64, min_free_pages: u32) -> bool {
        let min_free_pages = i64::from(min_free_pages);
        match self {
            BreachPredicate::FreeAndFile => {
                free_pages < min_free_pages && file_pages < min_free_pages
            }
            BreachPredicate::FreeOnly => free_pages < min_free_pages,
            BreachPredicate::FileOnly => file_pages < min_free_pages,
        }
    }
}

impl FromStr for BreachPredicate {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "free_and_file" => Ok(BreachPredicate::FreeAndFile),
            "free_only" => Ok(BreachPredicate::FreeOnly),
            "file_only" => Ok(BreachPredicate::FileOnly),
            other => bail!("Unknown breach predicate: {}", other),
        }
    }
}

impl fmt::Display for BreachPredicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            BreachPredicate::FreeAndFile => "free_and_file",
            BreachPredicate::FreeOnly => "free_only",
            BreachPredicate::FileOnly => "file_only",
        })
    }
}

/// What happens when a table write breaks the severity ordering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TableValidation {
    /// Warn and accept.
    #[default]
    Permissive,
    /// Reject and keep the previous table.
    Strict,
}

impl FromStr for TableValidation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "permissive" => Ok(TableValidation::Permissive),
            "strict" => Ok(TableValidation::Strict),
            other => bail!("Unknown table validation mode: {}", other),
        }
    }
}

impl fmt::Display for TableValidation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            TableValidation::Permissive => "permissive",
            TableValidation::Strict => "strict",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub cutoff_scores: Vec<i16>,
    pub minfree: Vec<u32>,
    pub minfree_screen_off: Vec<u32>,
    pub max_tiers: usize,
    pub pool_capacity: usize,
    pub cooldown: Duration,
    pub cost: u32,
    pub debug_level: u32,
    pub breach_predicate: BreachPredicate,
    pub table_validation: TableValidation,
    pub legacy_score_autodetect: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cutoff_scores: DEFAULT_CUTOFF_SCORES.to_vec(),
            minfree: DEFAULT_MINFREE.to_vec(),
            minfree_screen_off: DEFAULT_MINFREE.to_vec(),
            max_tiers: DEFAULT_MAX_TIERS,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            cooldown: DEFAULT_COOLDOWN,
            cost: DEFAULT_COST,
            debug_level: DEFAULT_DEBUG_LEVEL,
            breach_predicate: BreachPredicate::default(),
            table_validation: TableValidation::default(),
            legacy_score_autodetect: true,
        }
    }
}

impl Config {
    /// Loads the config files under `<root>/run/lowmemd`. Missing files keep the
    /// default value. Malformed files are logged and skipped.
    pub fn load(root: &Path) -> Config {
        let dir = root.join(CONFIG_DIR);
        let mut config = Config::default();

        load_list(&dir, CUTOFF_SCORES_FILENAME, &mut config.cutoff_scores);
        load_list(&dir, MINFREE_FILENAME, &mut config.minfree);
        load_list(&dir, MINFREE_SCREEN_OFF_FILENAME, &mut config.minfree_screen_off);
        load_value(&dir, POOL_CAPACITY_FILENAME, &mut config.pool_capacity);
        load_value(&dir, COST_FILENAME, &mut config.cost);
        load_value(&dir, DEBUG_LEVEL_FILENAME, &mut config.debug_level);
        load_value(&dir, BREACH_PREDICATE_FILENAME, &mut config.breach_predicate);
        load_value(&dir, TABLE_VALIDATION_FILENAME, &mut config.table_validation);

        let mut cooldown_ms = config.cooldown.as_millis() as u64;
        load_value(&dir, COOLDOWN_MS_FILENAME, &mut cooldown_ms);
        config.cooldown = Duration::from_millis(cooldown_ms);

        config
    }
}

fn load_value<T: FromStr>(dir: &Path, filename: &str, value: &mut T)
where
    T::Err: fmt::Display,
{
    let path = dir.join(filename);
    if !path.exists() {
        return;
    }
    match read_from_file(&path) {
        Ok(v) => *value = v,
        Err(e) => error!("Failed to load {}: {}", path.display(), e),
    }
}

fn load_list<T: FromStr>(dir: &Path, filename: &str, values: &mut Vec<T>)
where
    T::Err: fmt::Display,
{
    let path = dir.join(filename);
    if !path.exists() {
        return;
    }
    match read_number_list_from_file(&path) {
        Ok(v) => *values = v,
        Err(e) => error!("Failed to load {}: {}", path.display(), e),
    }
}

/// Maps the debug level to the log filter. Kills are logged from level 1,
/// victim selection from level 2 and per pass inputs from level 3. Levels 3
/// to 5 share the trace filter; the engine itself holds back pass results
/// below level 4 and count-only results below level 5.
pub fn debug_level_to_filter(level: u32) -> Result<LevelFilter> {
    Ok(match level {
        0 => LevelFilter::Error,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        3..=MAX_DEBUG_LEVEL => LevelFilter::Trace,
        _ => bail!("Unsupported debug level: {}", level),
    })
}

pub fn init_config_files(root: &Path) -> Result<()> {
    // Checks the config directory.
    let config_path = root.join(CONFIG_DIR);
    if !config_path.exists() {
        bail!(
            "The config directory {} doesn't exist.",
            config_path.display()
        );
    } else if !config_path.is_dir() {
        bail!(
            "The config directory {} is not a directory.",
            config_path.display()
        );
    }

    let defaults = Config::default();
    let files = [
        (
            CUTOFF_SCORES_FILENAME,
            format_number_list(&defaults.cutoff_scores),
        ),
        (MINFREE_FILENAME, format_number_list(&defaults.minfree)),
        (
            MINFREE_SCREEN_OFF_FILENAME,
            format_number_list(&defaults.minfree_screen_off),
        ),
        (POOL_CAPACITY_FILENAME, defaults.pool_capacity.to_string()),
        (
            COOLDOWN_MS_FILENAME,
            defaults.cooldown.as_millis().to_string(),
        ),
        (COST_FILENAME, defaults.cost.to_string()),
        (DEBUG_LEVEL_FILENAME, defaults.debug_level.to_string()),
        (
            BREACH_PREDICATE_FILENAME,
            defaults.breach_predicate.to_string(),
        ),
        (
            TABLE_VALIDATION_FILENAME,
            defaults.table_validation.to_string(),
        ),
    ];

    for (filename, content) in files {
        let path = config_path.join(filename);
        if !path.exists() {
            let mut file = File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            file.write_all(content.as_bytes())?;
        } else if !path.is_file() {
            bail!("The config path {} is not a regular file.", path.display());
        }
    }

    Ok(())
}
