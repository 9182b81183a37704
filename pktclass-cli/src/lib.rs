use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use colored::Colorize;

use pktclass_core::config::{Config, EngineId, DEFAULT_BINTH, DEFAULT_MAX_DEPTH};
use pktclass_core::driver;
use pktclass_core::ingest::DEFAULT_CAP;
use pktclass_core::logging;

#[derive(Parser)]
#[clap(
    name = "pktclass",
    version = "0.1",
    about = "evaluate HyperSplit and TSS packet classifiers"
)]
pub struct Opts {
    /// Engine to evaluate: 0 = HyperSplit, 1 = TSS.
    #[clap(short = 'a', long = "algorithm")]
    pub algorithm: u8,

    /// Rule file (Classbench range format for HyperSplit, prefix format
    /// for TSS).
    #[clap(short = 'r', long = "rules")]
    pub rule_file: PathBuf,

    /// Trace file; if absent, build is exercised without search.
    #[clap(short = 't', long = "trace")]
    pub trace_file: Option<PathBuf>,

    /// Update rule file, applied after the initial build.
    #[clap(short = 'u', long = "update")]
    pub update_file: Option<PathBuf>,

    /// HyperSplit small-leaf threshold (BINTH).
    #[clap(long = "binth", default_value_t = DEFAULT_BINTH)]
    pub binth: usize,

    /// HyperSplit maximum recursion depth.
    #[clap(long = "max-depth", default_value_t = DEFAULT_MAX_DEPTH)]
    pub max_depth: usize,

    /// Rule set capacity cap.
    #[clap(long = "rule-cap", default_value_t = DEFAULT_CAP)]
    pub rule_cap: usize,

    /// Trace capacity cap.
    #[clap(long = "pkt-cap", default_value_t = DEFAULT_CAP)]
    pub pkt_cap: usize,

    /// Print the report as JSON instead of the human-readable summary.
    #[clap(long = "json")]
    pub json: bool,
}

impl Opts {
    pub fn to_config(&self) -> Result<Config> {
        let engine = EngineId::from_id(self.algorithm)
            .ok_or_else(|| anyhow!("unknown engine id {}, expected 0 or 1", self.algorithm))?;

        let mut config = Config::new(engine, self.rule_file.clone());
        config.trace_file = self.trace_file.clone();
        config.update_file = self.update_file.clone();
        config.binth = self.binth;
        config.max_depth = self.max_depth;
        config.rule_cap = self.rule_cap;
        config.pkt_cap = self.pkt_cap;
        Ok(config)
    }
}

/// Run one evaluation and print a report: a thin wrapper over the
/// library's real work that the binary's `main` just has to call and
/// report errors from.
pub fn run(opts: &Opts) -> Result<()> {
    let log = logging::root_logger();
    let config = opts.to_config()?;

    let report = driver::run(&config, &log)?;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "{} build: {} us",
        "[ok]".green(),
        report.build.micros
    );
    if let Some(update) = report.update {
        println!("{} update: {} us", "[ok]".green(), update.micros);
    }
    if let Some(search) = report.search {
        println!(
            "{} search: {} packets in {} us ({:.0} pkt/s)",
            "[ok]".green(),
            search.packets,
            search.micros,
            search.packets_per_second
        );
    }

    Ok(())
}
