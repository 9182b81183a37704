//! The evaluation driver: dispatches to one engine by id, measures
//! build/update/search latency and throughput, and validates search
//! results against a trace's expected priorities.

use std::time::Instant;

use serde::Serialize;
use slog::{error, info, Logger};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::hypersplit::HyperSplitIndex;
use crate::ingest;
use crate::rule::Packet;
use crate::tss::TssIndex;

/// A built index, tagged by which engine produced it.
pub enum Engine {
    HyperSplit(HyperSplitIndex),
    Tss(TssIndex),
}

impl Engine {
    fn search(&self, packet: &Packet) -> Option<u32> {
        match self {
            Engine::HyperSplit(idx) => idx.search(packet),
            Engine::Tss(idx) => idx.search(packet),
        }
    }

    fn cleanup(self, log: &Logger) {
        match self {
            Engine::HyperSplit(idx) => idx.cleanup(log),
            Engine::Tss(idx) => idx.cleanup(log),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PhaseTiming {
    pub micros: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SearchReport {
    pub micros: u64,
    pub packets: usize,
    pub packets_per_second: f64,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub build: PhaseTiming,
    pub update: Option<PhaseTiming>,
    pub search: Option<SearchReport>,
}

fn elapsed_micros(start: Instant) -> u64 {
    start.elapsed().as_micros() as u64
}

/// Run one evaluation: load rules, time build, optionally load+time an
/// update, release rule buffers, optionally load+time a search over a
/// trace, release the trace, cleanup.
pub fn run(config: &Config, log: &Logger) -> Result<Report> {
    let (engine, build, update) = match config.engine {
        crate::config::EngineId::HyperSplit => build_hypersplit(config, log)?,
        crate::config::EngineId::Tss => build_tss(config, log)?,
    };

    let search = match &config.trace_file {
        Some(trace_path) => {
            info!(log, "loading trace"; "path" => %trace_path.display());
            let packets =
                ingest::load_trace(trace_path, config.pkt_cap, log)?;
            let packet_count = packets.len();

            info!(log, "search starting"; "packets" => packet_count);
            let start = Instant::now();
            for (i, packet) in packets.into_iter().enumerate() {
                let got = engine.search(&packet);
                if got != packet.expected {
                    error!(log, "search mismatch";
                        "packet_index" => i, "expected" => ?packet.expected, "got" => ?got);
                    return Err(Error::SearchMismatch {
                        packet_index: i,
                        expected: packet.expected,
                        got,
                    });
                }
            }
            let micros = elapsed_micros(start).max(1);
            let packets_per_second =
                packet_count as f64 * 1_000_000.0 / micros as f64;
            info!(log, "search complete";
                "packets" => packet_count, "micros" => micros,
                "packets_per_second" => packets_per_second);

            Some(SearchReport {
                micros,
                packets: packet_count,
                packets_per_second,
            })
        }
        None => None,
    };

    engine.cleanup(log);

    Ok(Report {
        build,
        update,
        search,
    })
}

fn build_hypersplit(
    config: &Config,
    log: &Logger,
) -> Result<(Engine, PhaseTiming, Option<PhaseTiming>)> {
    info!(log, "loading range rules"; "path" => %config.rule_file.display());
    let rs = ingest::load_range_rules(&config.rule_file, config.rule_cap, log)?;
    let original = if config.update_file.is_some() {
        Some(rs.rules.clone())
    } else {
        None
    };

    let start = Instant::now();
    let idx =
        HyperSplitIndex::build(rs, config.binth, config.max_depth, log)?;
    let build = PhaseTiming {
        micros: elapsed_micros(start),
    };

    let (idx, update) = match &config.update_file {
        Some(update_path) => {
            info!(log, "loading update rules"; "path" => %update_path.display());
            let delta =
                ingest::load_range_rules(update_path, config.rule_cap, log)?;
            let mut merged = original.expect("snapshot taken above");
            merged.extend(delta.rules);

            let start = Instant::now();
            // HyperSplit exposes no incremental insert; an update is a
            // wholesale rebuild over the union of the original and delta
            // rules.
            let rebuilt = HyperSplitIndex::build(
                crate::rule::RuleSet { rules: merged },
                config.binth,
                config.max_depth,
                log,
            )?;
            let update = PhaseTiming {
                micros: elapsed_micros(start),
            };
            (rebuilt, Some(update))
        }
        None => (idx, None),
    };

    Ok((Engine::HyperSplit(idx), build, update))
}

fn build_tss(
    config: &Config,
    log: &Logger,
) -> Result<(Engine, PhaseTiming, Option<PhaseTiming>)> {
    info!(log, "loading prefix rules"; "path" => %config.rule_file.display());
    let rs = ingest::load_prefix_rules(&config.rule_file, config.rule_cap, log)?;

    let start = Instant::now();
    let mut idx = TssIndex::build(rs, log)?;
    let build = PhaseTiming {
        micros: elapsed_micros(start),
    };

    let update = match &config.update_file {
        Some(update_path) => {
            info!(log, "loading update rules"; "path" => %update_path.display());
            let delta =
                ingest::load_prefix_rules(update_path, config.rule_cap, log)?;

            let start = Instant::now();
            idx.insert_update(delta, log);
            Some(PhaseTiming {
                micros: elapsed_micros(start),
            })
        }
        None => None,
    };

    Ok((Engine::Tss(idx), build, update))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, EngineId};
    use crate::logging;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_tmp(contents: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, "{}", contents).unwrap();
        f
    }

    #[test]
    fn hypersplit_build_only() {
        let log = logging::root_logger();
        let rules = write_tmp(
            "@0.0.0.0/0 0.0.0.0/0 0 : 65535 0 : 65535 0x00/0x00 1\n",
        );
        let config =
            Config::new(EngineId::HyperSplit, rules.path().to_path_buf());
        let report = run(&config, &log).unwrap();
        assert!(report.search.is_none());
        assert!(report.update.is_none());
    }

    #[test]
    fn hypersplit_search_detects_mismatch() {
        let log = logging::root_logger();
        let rules = write_tmp(
            "@0.0.0.0/0 0.0.0.0/0 0 : 65535 0 : 65535 0x00/0x00 1\n",
        );
        // Expects rule id 2, but only rule id 1 exists: every match is a
        // mismatch.
        let trace = write_tmp("1 1 1 1 1 2\n");
        let mut config =
            Config::new(EngineId::HyperSplit, rules.path().to_path_buf());
        config.trace_file = Some(trace.path().to_path_buf());

        let err = run(&config, &log).unwrap_err();
        assert!(matches!(err, Error::SearchMismatch { .. }));
    }

    #[test]
    fn tss_end_to_end_with_update() {
        let log = logging::root_logger();
        let rules = write_tmp(concat!(
            "@0.0.0.0/0 0.0.0.0/0 0/0 0/0 0x06/0xff 1\n",
            "@0.0.0.0/0 0.0.0.0/0 0/0 0/0 0x00/0x00 2\n",
        ));
        let update = write_tmp("@0.0.0.0/0 0.0.0.0/0 0/0 0/0 0x06/0xff 1\n");
        let trace = write_tmp("0 0 0 0 6 1\n0 0 0 0 17 2\n");

        let mut config =
            Config::new(EngineId::Tss, rules.path().to_path_buf());
        config.update_file = Some(update.path().to_path_buf());
        config.trace_file = Some(trace.path().to_path_buf());

        let report = run(&config, &log).unwrap();
        assert!(report.update.is_some());
        let search = report.search.unwrap();
        assert_eq!(search.packets, 2);
    }
}
