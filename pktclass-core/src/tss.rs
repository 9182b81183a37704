//! The TSS (Tuple Space Search) engine: group rules by mask signature,
//! probe each group's hash table, keep the best priority.
//!
//! One hash table per distinct length-vector (tuple), with chains sorted
//! by ascending priority so the first match in a chain can return
//! immediately.

use std::collections::HashMap;

use slog::{debug, info, Logger};

use crate::dimension::{self, K};
use crate::error::{Error, Result};
use crate::rule::{Packet, PrefixRule, RuleSet};

type Tuple = [u32; K];
type MaskedKey = [u32; K];

#[derive(Debug, Default)]
struct Bucket {
    /// masked key -> rule indices (into `TssIndex::rules`), ascending
    /// priority.
    table: HashMap<MaskedKey, Vec<u32>>,
}

impl Bucket {
    fn insert(&mut self, key: MaskedKey, rule_index: u32, priority: u32, rules: &[PrefixRule]) {
        let chain = self.table.entry(key).or_default();
        let pos = chain
            .partition_point(|&i| rules[i as usize].priority < priority);
        chain.insert(pos, rule_index);
    }
}

#[derive(Debug)]
pub struct Stats {
    pub bucket_count: usize,
    pub max_chain_len: usize,
}

/// The built index. Owns the per-tuple hash tables and the prefix rule
/// records they reference.
#[derive(Debug, Default)]
pub struct TssIndex {
    rules: Vec<PrefixRule>,
    buckets: HashMap<Tuple, Bucket>,
}

fn masked_key(packet: &Packet, tuple: &Tuple) -> MaskedKey {
    let mut key = [0u32; K];
    for d in 0..K {
        let mask = dimension::prefix_mask(dimension::WIDTH[d], tuple[d]);
        key[d] = packet.fields[d] & mask;
    }
    key
}

impl TssIndex {
    /// Group `rs` by tuple and build one hash table per group.
    pub fn build(rs: RuleSet<PrefixRule>, log: &Logger) -> Result<Self> {
        if rs.is_empty() {
            return Err(Error::BuildFailure(
                "rule set is empty, TSS requires at least one rule".into(),
            ));
        }

        let mut idx = Self::default();
        idx.insert_rules(rs.rules, log);
        info!(log, "tss build complete";
            "rules" => idx.rules.len(), "buckets" => idx.buckets.len());
        Ok(idx)
    }

    /// Add new prefix rules into the existing structure, locating or
    /// creating each rule's tuple bucket and preserving the priority-sorted
    /// chain invariant. A genuine incremental insert, distinct from
    /// `build` — see DESIGN.md for the reasoning.
    pub fn insert_update(&mut self, delta: RuleSet<PrefixRule>, log: &Logger) {
        let before = self.rules.len();
        self.insert_rules(delta.rules, log);
        debug!(log, "tss insert_update complete";
            "added" => self.rules.len() - before, "buckets" => self.buckets.len());
    }

    fn insert_rules(&mut self, new_rules: Vec<PrefixRule>, _log: &Logger) {
        for rule in new_rules {
            let tuple = rule.tuple();
            let priority = rule.priority;
            let index = self.rules.len() as u32;
            let key = {
                let mut k = [0u32; K];
                for d in 0..K {
                    k[d] = rule.dims[d].value;
                }
                k
            };
            self.rules.push(rule);
            self.buckets
                .entry(tuple)
                .or_default()
                .insert(key, index, priority, &self.rules);
        }
    }

    /// Probe every bucket, returning the rule with the smallest priority
    /// among all matches, or `None`.
    pub fn search(&self, packet: &Packet) -> Option<u32> {
        let mut best: Option<u32> = None;
        for (tuple, bucket) in &self.buckets {
            let key = masked_key(packet, tuple);
            if let Some(chain) = bucket.table.get(&key) {
                if let Some(&i) = chain.first() {
                    let priority = self.rules[i as usize].priority;
                    best = Some(match best {
                        Some(b) => b.min(priority),
                        None => priority,
                    });
                }
            }
        }
        best
    }

    pub fn stats(&self) -> Stats {
        let max_chain_len = self
            .buckets
            .values()
            .flat_map(|b| b.table.values().map(Vec::len))
            .max()
            .unwrap_or(0);
        Stats {
            bucket_count: self.buckets.len(),
            max_chain_len,
        }
    }

    pub fn cleanup(self, log: &Logger) {
        info!(log, "tss cleanup"; "buckets" => self.buckets.len());
        drop(self);
    }
}
