//! Ingestion adapters: parse Classbench-style rule and trace files.
//!
//! The interesting algorithmic work lives in [`crate::hypersplit`] and
//! [`crate::tss`]; this module just turns text lines into the typed rule
//! and packet records those engines consume.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use regex::Regex;
use slog::{debug, error, Logger};

use crate::dimension::{self, K};
use crate::error::{Error, Result};
use crate::rule::{Packet, Prefix, PrefixRule, Range, RangeRule, RuleSet};

/// Default cap on rule set and trace sizes.
pub const DEFAULT_CAP: usize = 1_048_576;

fn open(path: &Path) -> Result<BufReader<File>> {
    let f = File::open(path).map_err(|source| Error::FileOpen {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(f))
}

fn parse_err(path: &Path, line: usize, message: impl Into<String>) -> Error {
    Error::ParseFormat {
        path: path.to_path_buf(),
        line,
        message: message.into(),
    }
}

fn non_blank_lines(
    reader: BufReader<File>,
) -> impl Iterator<Item = std::io::Result<(usize, String)>> {
    reader.lines().enumerate().filter_map(|(i, l)| match l {
        Ok(s) if s.trim().is_empty() => None,
        Ok(s) => Some(Ok((i + 1, s))),
        Err(e) => Some(Err(e)),
    })
}

fn range_rule_regex() -> Regex {
    Regex::new(concat!(
        r"^\s*@(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})/(\d{1,2})\s+",
        r"(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})/(\d{1,2})\s+",
        r"(\d+)\s*:\s*(\d+)\s+(\d+)\s*:\s*(\d+)\s+",
        r"0x([0-9A-Fa-f]{1,2})/0x([0-9A-Fa-f]{1,2})\s+(\d+)\s*$",
    ))
    .expect("static regex is valid")
}

fn prefix_rule_regex() -> Regex {
    Regex::new(concat!(
        r"^\s*@(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})/(\d{1,2})\s+",
        r"(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})/(\d{1,2})\s+",
        r"(\d+)/(\d{1,2})\s+(\d+)/(\d{1,2})\s+",
        r"0x([0-9A-Fa-f]{1,2})/0x([0-9A-Fa-f]{1,2})\s+(\d+)\s*$",
    ))
    .expect("static regex is valid")
}

fn ip_from_octets(a: &str, b: &str, c: &str, d: &str) -> Option<u32> {
    let a: u32 = a.parse().ok()?;
    let b: u32 = b.parse().ok()?;
    let c: u32 = c.parse().ok()?;
    let d: u32 = d.parse().ok()?;
    if a > 255 || b > 255 || c > 255 || d > 255 {
        return None;
    }
    Some((a << 24) | (b << 16) | (c << 8) | d)
}

/// Parse a Classbench range rule file (range format) into a
/// range rule set for the HyperSplit engine.
pub fn load_range_rules(
    path: &Path,
    cap: usize,
    log: &Logger,
) -> Result<RuleSet<RangeRule>> {
    let re = range_rule_regex();
    let mut rules = Vec::new();

    for entry in non_blank_lines(open(path)?) {
        let (lineno, text) = entry.map_err(|source| Error::FileOpen {
            path: path.to_path_buf(),
            source,
        })?;

        let caps = re.captures(&text).ok_or_else(|| {
            error!(log, "malformed range rule"; "path" => %path.display(), "line" => lineno);
            parse_err(path, lineno, "line does not match range rule format")
        })?;

        let sip_low_high = ip_prefix_range(&caps, 1, 5);
        let dip_low_high = ip_prefix_range(&caps, 6, 10);

        let sp_lo: u32 = caps[11].parse().unwrap();
        let sp_hi: u32 = caps[12].parse().unwrap();
        let dp_lo: u32 = caps[13].parse().unwrap();
        let dp_hi: u32 = caps[14].parse().unwrap();

        let proto_byte = u8::from_str_radix(&caps[15], 16).unwrap();
        let proto_mask = u8::from_str_radix(&caps[16], 16).unwrap();
        let proto_range = match proto_mask {
            0xFF => Range::new(proto_byte as u32, proto_byte as u32),
            0x00 => Range::new(0, 255),
            other => {
                error!(log, "unsupported protocol mask"; "mask" => format!("{:#x}", other));
                return Err(Error::UnsupportedMask {
                    path: path.to_path_buf(),
                    line: lineno,
                    mask: other,
                });
            }
        };

        let id: u32 = caps[17].parse().unwrap();
        if id == 0 {
            return Err(parse_err(path, lineno, "rule id must be >= 1"));
        }

        rules.push(RangeRule {
            priority: id - 1,
            dims: [
                sip_low_high,
                dip_low_high,
                Range::new(sp_lo.min(sp_hi), sp_lo.max(sp_hi)),
                Range::new(dp_lo.min(dp_hi), dp_lo.max(dp_hi)),
                proto_range,
            ],
        });

        if rules.len() > cap {
            return Err(Error::CapacityExceeded {
                path: path.to_path_buf(),
                cap,
            });
        }
    }

    debug!(log, "loaded range rules"; "count" => rules.len(), "path" => %path.display());
    Ok(RuleSet { rules })
}

fn ip_prefix_range(
    caps: &regex::Captures,
    octet_start: usize,
    mlen_idx: usize,
) -> Range {
    let ip = ip_from_octets(
        &caps[octet_start],
        &caps[octet_start + 1],
        &caps[octet_start + 2],
        &caps[octet_start + 3],
    )
    .unwrap_or(0);
    let m: u32 = caps[mlen_idx].parse().unwrap_or(32).min(32);
    let host_bits = 32 - m;
    let low = if host_bits >= 32 {
        0
    } else {
        ip & !((1u32 << host_bits).wrapping_sub(1))
    };
    let high = if host_bits >= 32 {
        u32::MAX
    } else {
        ip | ((1u32 << host_bits) - 1)
    };
    Range::new(low, high)
}

/// Parse a prefix-format rule file into a
/// prefix rule set for the TSS engine.
pub fn load_prefix_rules(
    path: &Path,
    cap: usize,
    log: &Logger,
) -> Result<RuleSet<PrefixRule>> {
    let re = prefix_rule_regex();
    let mut rules = Vec::new();

    for entry in non_blank_lines(open(path)?) {
        let (lineno, text) = entry.map_err(|source| Error::FileOpen {
            path: path.to_path_buf(),
            source,
        })?;

        let caps = re.captures(&text).ok_or_else(|| {
            error!(log, "malformed prefix rule"; "path" => %path.display(), "line" => lineno);
            parse_err(path, lineno, "line does not match prefix rule format")
        })?;

        let sip = ip_prefix(&caps, 1, 5, dimension::WIDTH[0]);
        let dip = ip_prefix(&caps, 6, 10, dimension::WIDTH[1]);

        let sport_val: u32 = caps[11].parse().unwrap();
        let sport_len: u32 = caps[12].parse().unwrap();
        let dport_val: u32 = caps[13].parse().unwrap();
        let dport_len: u32 = caps[14].parse().unwrap();

        let proto_byte = u8::from_str_radix(&caps[15], 16).unwrap();
        let proto_mask = u8::from_str_radix(&caps[16], 16).unwrap();
        let proto_len = match proto_mask {
            0xFF => 8,
            0x00 => 0,
            other => {
                return Err(Error::UnsupportedMask {
                    path: path.to_path_buf(),
                    line: lineno,
                    mask: other,
                });
            }
        };

        let id: u32 = caps[17].parse().unwrap();
        if id == 0 {
            return Err(parse_err(path, lineno, "rule id must be >= 1"));
        }

        rules.push(PrefixRule {
            priority: id - 1,
            dims: [
                sip,
                dip,
                Prefix::new(sport_val, sport_len, dimension::WIDTH[2]),
                Prefix::new(dport_val, dport_len, dimension::WIDTH[3]),
                Prefix::new(proto_byte as u32, proto_len, dimension::WIDTH[4]),
            ],
        });

        if rules.len() > cap {
            return Err(Error::CapacityExceeded {
                path: path.to_path_buf(),
                cap,
            });
        }
    }

    debug!(log, "loaded prefix rules"; "count" => rules.len(), "path" => %path.display());
    Ok(RuleSet { rules })
}

fn ip_prefix(
    caps: &regex::Captures,
    octet_start: usize,
    mlen_idx: usize,
    width: u32,
) -> Prefix {
    let ip = ip_from_octets(
        &caps[octet_start],
        &caps[octet_start + 1],
        &caps[octet_start + 2],
        &caps[octet_start + 3],
    )
    .unwrap_or(0);
    let len: u32 = caps[mlen_idx].parse().unwrap_or(32);
    Prefix::new(ip, len, width)
}

fn parse_field(text: &str) -> Option<u64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if text.contains('.') {
        let parts: Vec<&str> = text.split('.').collect();
        if parts.len() != 4 {
            return None;
        }
        ip_from_octets(parts[0], parts[1], parts[2], parts[3]).map(|v| v as u64)
    } else {
        text.parse().ok()
    }
}

/// Parse a trace file into packets.
pub fn load_trace(
    path: &Path,
    cap: usize,
    log: &Logger,
) -> Result<Vec<Packet>> {
    let mut packets = Vec::new();

    for entry in non_blank_lines(open(path)?) {
        let (lineno, text) = entry.map_err(|source| Error::FileOpen {
            path: path.to_path_buf(),
            source,
        })?;

        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != K + 1 {
            return Err(parse_err(
                path,
                lineno,
                format!("expected {} whitespace-separated fields, got {}", K + 1, fields.len()),
            ));
        }

        let mut parsed = [0u32; K];
        for (d, tok) in fields[..K].iter().enumerate() {
            let raw = parse_field(tok).ok_or_else(|| {
                parse_err(path, lineno, format!("unparseable field {}: {}", d, tok))
            })?;
            parsed[d] = dimension::truncate(raw, dimension::WIDTH[d]);
        }

        let expected_id: u32 = fields[K].parse().map_err(|_| {
            parse_err(path, lineno, format!("unparseable expected rule id: {}", fields[K]))
        })?;

        packets.push(Packet {
            fields: parsed,
            expected: if expected_id == 0 {
                None
            } else {
                Some(expected_id - 1)
            },
        });

        if packets.len() > cap {
            return Err(Error::CapacityExceeded {
                path: path.to_path_buf(),
                cap,
            });
        }
    }

    debug!(log, "loaded trace"; "count" => packets.len(), "path" => %path.display());
    Ok(packets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_tmp(contents: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, "{}", contents).unwrap();
        f
    }

    #[test]
    fn range_rule_basic() {
        let log = logging::root_logger();
        let f = write_tmp(
            "@0.0.0.0/0 0.0.0.0/0 0 : 65535 0 : 65535 0x00/0x00 1\n",
        );
        let rs = load_range_rules(f.path(), DEFAULT_CAP, &log).unwrap();
        assert_eq!(rs.len(), 1);
        assert_eq!(rs.rules[0].priority, 0);
        assert_eq!(rs.rules[0].dims[0], Range::new(0, u32::MAX));
    }

    #[test]
    fn range_rule_exact_protocol() {
        let log = logging::root_logger();
        let f = write_tmp(concat!(
            "@0.0.0.0/0 0.0.0.0/0 0 : 65535 0 : 65535 0x06/0xff 1\n",
            "@0.0.0.0/0 0.0.0.0/0 0 : 65535 0 : 65535 0x00/0x00 2\n",
        ));
        let rs = load_range_rules(f.path(), DEFAULT_CAP, &log).unwrap();
        assert_eq!(rs.rules[0].dims[4], Range::new(6, 6));
        assert_eq!(rs.rules[1].dims[4], Range::new(0, 255));
    }

    #[test]
    fn range_rule_rejects_partial_mask() {
        let log = logging::root_logger();
        let f = write_tmp(
            "@0.0.0.0/0 0.0.0.0/0 0 : 65535 0 : 65535 0x06/0x0f 1\n",
        );
        let err = load_range_rules(f.path(), DEFAULT_CAP, &log).unwrap_err();
        assert!(matches!(err, Error::UnsupportedMask { mask: 0x0f, .. }));
    }

    #[test]
    fn range_rule_ip_prefix_math() {
        let log = logging::root_logger();
        let f = write_tmp(
            "@10.0.0.0/8 0.0.0.0/0 0 : 65535 0 : 65535 0x00/0x00 1\n",
        );
        let rs = load_range_rules(f.path(), DEFAULT_CAP, &log).unwrap();
        assert_eq!(rs.rules[0].dims[0], Range::new(0x0A00_0000, 0x0AFF_FFFF));
    }

    #[test]
    fn range_rule_malformed_is_fatal() {
        let log = logging::root_logger();
        let f = write_tmp("this is not a rule\n");
        let err = load_range_rules(f.path(), DEFAULT_CAP, &log).unwrap_err();
        assert!(matches!(err, Error::ParseFormat { .. }));
    }

    #[test]
    fn range_rule_zero_id_is_fatal() {
        let log = logging::root_logger();
        let f = write_tmp(
            "@0.0.0.0/0 0.0.0.0/0 0 : 65535 0 : 65535 0x00/0x00 0\n",
        );
        let err = load_range_rules(f.path(), DEFAULT_CAP, &log).unwrap_err();
        assert!(matches!(err, Error::ParseFormat { .. }));
    }

    #[test]
    fn prefix_rule_zero_id_is_fatal() {
        let log = logging::root_logger();
        let f = write_tmp("@0.0.0.0/0 0.0.0.0/0 0/0 0/0 0x00/0x00 0\n");
        let err = load_prefix_rules(f.path(), DEFAULT_CAP, &log).unwrap_err();
        assert!(matches!(err, Error::ParseFormat { .. }));
    }

    #[test]
    fn prefix_rule_basic() {
        let log = logging::root_logger();
        let f = write_tmp(
            "@10.1.0.0/16 0.0.0.0/0 0/0 0/0 0x00/0x00 1\n",
        );
        let rs = load_prefix_rules(f.path(), DEFAULT_CAP, &log).unwrap();
        assert_eq!(rs.len(), 1);
        assert_eq!(rs.rules[0].dims[0].len, 16);
        assert_eq!(rs.rules[0].dims[0].value, 0x0A01_0000);
    }

    #[test]
    fn trace_basic() {
        let log = logging::root_logger();
        let f = write_tmp("1 2 80 443 6 1\n10 20 1000 2000 17 0\n");
        let pkts = load_trace(f.path(), DEFAULT_CAP, &log).unwrap();
        assert_eq!(pkts.len(), 2);
        assert_eq!(pkts[0].fields, [1, 2, 80, 443, 6]);
        assert_eq!(pkts[0].expected, Some(0));
        assert_eq!(pkts[1].expected, None);
    }

    #[test]
    fn trace_wrong_field_count_is_fatal() {
        let log = logging::root_logger();
        let f = write_tmp("1 2 3\n");
        let err = load_trace(f.path(), DEFAULT_CAP, &log).unwrap_err();
        assert!(matches!(err, Error::ParseFormat { .. }));
    }

    #[test]
    fn capacity_cap_is_enforced() {
        let log = logging::root_logger();
        let f = write_tmp("1 2 80 443 6 1\n1 2 80 443 6 2\n1 2 80 443 6 3\n");
        let err = load_trace(f.path(), 2, &log).unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded { cap: 2, .. }));
    }

    #[test]
    fn file_open_failure_is_fatal() {
        let log = logging::root_logger();
        let err =
            load_trace(Path::new("/nonexistent/path/trace.txt"), DEFAULT_CAP, &log)
                .unwrap_err();
        assert!(matches!(err, Error::FileOpen { .. }));
    }
}
