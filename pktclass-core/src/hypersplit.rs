//! The HyperSplit engine: a recursive, binary space-decomposition classifier.
//!
//! Each node picks a split dimension by a min-max-child-cardinality
//! heuristic over candidate endpoints, cuts at the midpoint, and recurses
//! into the two children, stopping once a node holds at most BINTH rules
//! or the recursion hits its depth limit. Tree storage is an
//! index-into-arena `Vec<Node>` rather than heap-per-node boxes, for cache
//! locality and bulk release on rebuild.

use slog::{debug, info, Logger};

use crate::dimension::K;
use crate::error::{Error, Result};
use crate::rule::{Packet, Range, RangeRule, RuleSet};

type NodeId = u32;

#[derive(Debug)]
enum Node {
    Leaf {
        /// Indices into `HyperSplitIndex::rules`, sorted ascending by
        /// priority so search can stop at the first match.
        rules: Vec<u32>,
    },
    Internal {
        d: usize,
        threshold: u32,
        left: NodeId,
        right: NodeId,
    },
}

/// A cell: the Cartesian product of per-dimension half-ranges inherited
/// from ancestors.
type Cell = [Range; K];

fn full_cell() -> Cell {
    let mut c = [Range::new(0, 0); K];
    for d in 0..K {
        c[d] = Range::new(0, crate::dimension::max_value(crate::dimension::WIDTH[d]));
    }
    c
}

#[derive(Debug)]
pub struct Stats {
    pub node_count: usize,
    pub leaf_count: usize,
    pub max_depth: usize,
}

/// The built index. Owns the tree arena and the rule records its leaves
/// reference; once built, it is self-contained.
#[derive(Debug)]
pub struct HyperSplitIndex {
    nodes: Vec<Node>,
    root: NodeId,
    rules: Vec<RangeRule>,
    binth: usize,
    max_depth: usize,
}

impl HyperSplitIndex {
    /// Build a decision tree whose search returns the highest-priority
    /// matching rule for any well-formed packet that matches at least one
    /// rule in `rs`.
    pub fn build(
        rs: RuleSet<RangeRule>,
        binth: usize,
        max_depth: usize,
        log: &Logger,
    ) -> Result<Self> {
        if rs.is_empty() {
            return Err(Error::BuildFailure(
                "rule set is empty, HyperSplit requires at least one rule"
                    .into(),
            ));
        }

        let rules = rs.rules;
        let mut nodes = Vec::new();
        let indices: Vec<u32> = (0..rules.len() as u32).collect();
        let root = Self::cut(
            &rules, indices, full_cell(), 0, binth, max_depth, &mut nodes, log,
        );

        info!(log, "hypersplit build complete";
            "rules" => rules.len(), "nodes" => nodes.len());

        Ok(Self {
            nodes,
            root,
            rules,
            binth,
            max_depth,
        })
    }

    fn cut(
        rules: &[RangeRule],
        subset: Vec<u32>,
        cell: Cell,
        depth: usize,
        binth: usize,
        max_depth: usize,
        nodes: &mut Vec<Node>,
        log: &Logger,
    ) -> NodeId {
        if subset.len() <= binth || depth >= max_depth {
            return Self::push_leaf(rules, subset, nodes);
        }

        match Self::best_split(rules, &subset, &cell) {
            Some((d, threshold)) => {
                let mut left = Vec::new();
                let mut right = Vec::new();
                for &i in &subset {
                    let r = &rules[i as usize].dims[d];
                    if r.low <= threshold {
                        left.push(i);
                    }
                    if r.high > threshold {
                        right.push(i);
                    }
                }

                if left.len() >= subset.len() && right.len() >= subset.len() {
                    // No progress: splitting didn't shrink either side.
                    return Self::push_leaf(rules, subset, nodes);
                }

                debug!(log, "hypersplit cut"; "dim" => d, "threshold" => threshold,
                    "parent" => subset.len(), "left" => left.len(), "right" => right.len());

                let mut left_cell = cell;
                left_cell[d] = Range::new(cell[d].low, threshold);
                let mut right_cell = cell;
                right_cell[d] = Range::new(threshold.saturating_add(1), cell[d].high);

                let left_id = Self::cut(
                    rules, left, left_cell, depth + 1, binth, max_depth, nodes,
                    log,
                );
                let right_id = Self::cut(
                    rules, right, right_cell, depth + 1, binth, max_depth,
                    nodes, log,
                );

                nodes.push(Node::Internal {
                    d,
                    threshold,
                    left: left_id,
                    right: right_id,
                });
                (nodes.len() - 1) as NodeId
            }
            None => Self::push_leaf(rules, subset, nodes),
        }
    }

    fn push_leaf(
        rules: &[RangeRule],
        mut subset: Vec<u32>,
        nodes: &mut Vec<Node>,
    ) -> NodeId {
        subset.sort_by_key(|&i| rules[i as usize].priority);
        nodes.push(Node::Leaf { rules: subset });
        (nodes.len() - 1) as NodeId
    }

    /// Choose the dimension and threshold minimizing the cost metric
    /// `(|{low<=t}| + |{high>t}|) / |S|`, ties broken by lower dimension
    /// then lower threshold.
    fn best_split(
        rules: &[RangeRule],
        subset: &[u32],
        cell: &Cell,
    ) -> Option<(usize, u32)> {
        let mut best: Option<(usize, u32, f64)> = None;

        for d in 0..K {
            let mut candidates: Vec<u32> = Vec::new();
            for &i in subset {
                let r = rules[i as usize].dims[d];
                if r.low >= cell[d].low && r.low <= cell[d].high {
                    candidates.push(r.low);
                }
                if r.high >= cell[d].low && r.high <= cell[d].high {
                    candidates.push(r.high);
                }
            }
            candidates.sort_unstable();
            candidates.dedup();

            for &t in &candidates {
                // A threshold at the cell's upper edge can't separate
                // anything further (right side would be empty by
                // construction), so skip it rather than waste a split.
                if t >= cell[d].high {
                    continue;
                }
                let left = subset
                    .iter()
                    .filter(|&&i| rules[i as usize].dims[d].low <= t)
                    .count();
                let right = subset
                    .iter()
                    .filter(|&&i| rules[i as usize].dims[d].high > t)
                    .count();
                let cost = (left + right) as f64 / subset.len() as f64;

                let better = match &best {
                    None => true,
                    Some((bd, bt, bc)) => {
                        cost < *bc
                            || (cost == *bc && d < *bd)
                            || (cost == *bc && d == *bd && t < *bt)
                    }
                };
                if better {
                    best = Some((d, t, cost));
                }
            }
        }

        best.map(|(d, t, _)| (d, t))
    }

    /// Descend the tree; at a leaf, return the first (highest-priority)
    /// rule whose every dimension contains the packet's value.
    pub fn search(&self, packet: &Packet) -> Option<u32> {
        let mut node = self.root;
        loop {
            match &self.nodes[node as usize] {
                Node::Internal {
                    d,
                    threshold,
                    left,
                    right,
                } => {
                    node = if packet.fields[*d] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                Node::Leaf { rules: leaf_rules } => {
                    for &i in leaf_rules {
                        let r = &self.rules[i as usize];
                        if r.matches(&packet.fields) {
                            return Some(r.priority);
                        }
                    }
                    return None;
                }
            }
        }
    }

    pub fn stats(&self) -> Stats {
        let leaf_count = self
            .nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count();
        Stats {
            node_count: self.nodes.len(),
            leaf_count,
            max_depth: self.max_depth,
        }
    }

    /// Release all tree storage explicitly, matching the engine's public
    /// build/search/cleanup contract shape symmetrically with TSS (rather
    /// than relying on `Drop` alone).
    pub fn cleanup(self, log: &Logger) {
        info!(log, "hypersplit cleanup"; "nodes" => self.nodes.len());
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging;

    fn wildcard() -> Range {
        Range::new(0, u32::MAX)
    }

    fn proto_wildcard() -> Range {
        Range::new(0, 255)
    }

    fn rule(priority: u32, dims: [Range; K]) -> RangeRule {
        RangeRule { priority, dims }
    }

    fn pkt(fields: [u32; K]) -> Packet {
        Packet {
            fields,
            expected: None,
        }
    }

    #[test]
    fn scenario_1_single_wildcard_rule() {
        let log = logging::root_logger();
        let rs = RuleSet {
            rules: vec![rule(
                0,
                [wildcard(), wildcard(), wildcard(), wildcard(), proto_wildcard()],
            )],
        };
        let idx = HyperSplitIndex::build(rs, 8, 64, &log).unwrap();
        assert_eq!(idx.search(&pkt([1, 2, 3, 4, 5])), Some(0));
    }

    #[test]
    fn scenario_2_protocol_exact_vs_wildcard() {
        let log = logging::root_logger();
        let rs = RuleSet {
            rules: vec![
                rule(0, [wildcard(), wildcard(), wildcard(), wildcard(), Range::new(6, 6)]),
                rule(1, [wildcard(), wildcard(), wildcard(), wildcard(), proto_wildcard()]),
            ],
        };
        let idx = HyperSplitIndex::build(rs, 8, 64, &log).unwrap();
        assert_eq!(idx.search(&pkt([0, 0, 0, 0, 6])), Some(0));
        assert_eq!(idx.search(&pkt([0, 0, 0, 0, 17])), Some(1));
    }

    #[test]
    fn scenario_3_overlapping_sip_prefixes_lower_id_wins() {
        let log = logging::root_logger();
        let r0 = rule(
            0,
            [Range::new(0x0A00_0000, 0x0AFF_FFFF), wildcard(), wildcard(), wildcard(), proto_wildcard()],
        );
        let r1 = rule(
            1,
            [Range::new(0x0A01_0000, 0x0A01_FFFF), wildcard(), wildcard(), wildcard(), proto_wildcard()],
        );
        let rs = RuleSet { rules: vec![r0, r1] };
        let idx = HyperSplitIndex::build(rs, 8, 64, &log).unwrap();
        // 10.1.2.3
        assert_eq!(idx.search(&pkt([0x0A01_0203, 0, 0, 0, 0])), Some(0));
    }

    #[test]
    fn scenario_4_port_ranges_and_no_match() {
        let log = logging::root_logger();
        let rs = RuleSet {
            rules: vec![
                rule(0, [wildcard(), wildcard(), Range::new(1000, 2000), wildcard(), proto_wildcard()]),
                rule(1, [wildcard(), wildcard(), Range::new(1500, 2500), wildcard(), proto_wildcard()]),
            ],
        };
        let idx = HyperSplitIndex::build(rs, 8, 64, &log).unwrap();
        assert_eq!(idx.search(&pkt([0, 0, 1750, 0, 0])), Some(0));
        assert_eq!(idx.search(&pkt([0, 0, 2100, 0, 0])), Some(1));
        assert_eq!(idx.search(&pkt([0, 0, 500, 0, 0])), None);
    }

    #[test]
    fn build_rejects_empty_rule_set() {
        let log = logging::root_logger();
        let rs: RuleSet<RangeRule> = RuleSet { rules: vec![] };
        assert!(HyperSplitIndex::build(rs, 8, 64, &log).is_err());
    }

    #[test]
    fn determinism_same_rules_same_results() {
        let log = logging::root_logger();
        let make = || RuleSet {
            rules: vec![
                rule(0, [Range::new(0, 100), wildcard(), wildcard(), wildcard(), proto_wildcard()]),
                rule(1, [Range::new(50, 150), wildcard(), wildcard(), wildcard(), proto_wildcard()]),
                rule(2, [wildcard(), wildcard(), wildcard(), wildcard(), proto_wildcard()]),
            ],
        };
        let a = HyperSplitIndex::build(make(), 1, 64, &log).unwrap();
        let b = HyperSplitIndex::build(make(), 1, 64, &log).unwrap();
        for v in [0u32, 50, 75, 100, 125, 200] {
            assert_eq!(
                a.search(&pkt([v, 0, 0, 0, 0])),
                b.search(&pkt([v, 0, 0, 0, 0]))
            );
        }
    }

    #[test]
    fn coverage_every_rule_reachable_for_matching_packets() {
        let log = logging::root_logger();
        let rs = RuleSet {
            rules: vec![
                rule(0, [Range::new(0, 9), wildcard(), wildcard(), wildcard(), proto_wildcard()]),
                rule(1, [Range::new(10, 19), wildcard(), wildcard(), wildcard(), proto_wildcard()]),
                rule(2, [Range::new(20, 29), wildcard(), wildcard(), wildcard(), proto_wildcard()]),
            ],
        };
        let idx = HyperSplitIndex::build(rs, 1, 64, &log).unwrap();
        assert_eq!(idx.search(&pkt([5, 0, 0, 0, 0])), Some(0));
        assert_eq!(idx.search(&pkt([15, 0, 0, 0, 0])), Some(1));
        assert_eq!(idx.search(&pkt([25, 0, 0, 0, 0])), Some(2));
        assert_eq!(idx.search(&pkt([30, 0, 0, 0, 0])), None);
    }
}
