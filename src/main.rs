// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Kills the least important processes when memory runs low.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use getopts::Options;
use log::error;
use log::info;
use lowmemd::config;
use lowmemd::config::Config;
use lowmemd::dbus;
use lowmemd::lowmem::Collaborators;
use lowmemd::lowmem::LowMemoryKiller;
use lowmemd::memory::MemInfoSampler;
use lowmemd::pressure::pressure_loop;
use lowmemd::process::ProcReclaimBackend;
use lowmemd::process::ProcfsCatalog;
use lowmemd::process::SignalTerminator;
use lowmemd::reclaim::ReclaimAuthority;
use tokio::runtime::Builder;

fn usage(options: &Options) -> String {
    options.usage("Usage: lowmemd [-v LEVEL] [-r ROOT] [--no-dbus]")
}

fn main() -> Result<()> {
    let mut opts = Options::new();
    opts.optopt(
        "v",
        "verbosity",
        "Debug level, 0 (errors only) to 5 (every pass)",
        "LEVEL",
    );
    opts.optopt("r", "root", "Root of /proc and /run, for testing", "ROOT");
    opts.optflag("", "no-dbus", "Don't export the D-Bus interface");
    opts.optflag("h", "help", "Print this help text");
    let args: Vec<String> = std::env::args().skip(1).collect();
    let matches = match opts.parse(args) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Failed to parse arguments: {}", e);
            eprintln!("{}", usage(&opts));
            bail!("invalid arguments");
        }
    };
    if matches.opt_present("h") {
        println!("{}", usage(&opts));
        return Ok(());
    }

    // The level is narrowed later with log::set_max_level() by the debug level.
    stderrlog::new()
        .module(module_path!())
        .verbosity(4)
        .init()
        .context("Failed to initialize logging")?;

    let root = PathBuf::from(matches.opt_str("r").unwrap_or_else(|| "/".to_string()));

    info!("Starting lowmemd");

    if let Err(err) = config::init_config_files(&root) {
        error!("Failed to initialize config files: {}", err);
    }
    let mut config = Config::load(&root);
    if let Some(level) = matches.opt_str("v") {
        config.debug_level = level
            .parse()
            .with_context(|| format!("Invalid verbosity: {}", level))?;
    }

    let lmk = Arc::new(Mutex::new(LowMemoryKiller::new(
        &config,
        Collaborators {
            catalog: Box::new(ProcfsCatalog::new(&root)),
            terminator: Box::new(SignalTerminator),
            sampler: Box::new(MemInfoSampler::new(&root)),
            reclaim_backend: Box::new(ProcReclaimBackend::new(&root)),
        },
    )));
    let mut authority = ReclaimAuthority::new();
    authority.register(lmk.clone());

    let rt = Builder::new_current_thread().enable_all().build()?;
    if matches.opt_present("no-dbus") {
        rt.block_on(pressure_loop(&root, authority));
    } else if let Err(err) = rt.block_on(dbus::service_main(&root, lmk, authority)) {
        error!("The D-Bus service main returns error: {:?}", err);
    }

    Ok(())
}
