//! Rule and packet record shapes.
//!
//! A rule set is either all-range (consumed by [`crate::hypersplit`]) or
//! all-prefix (consumed by [`crate::tss`]); the two shapes are kept as
//! distinct types rather than a single tagged union so a caller can't
//! accidentally hand a prefix rule set to the engine that expects ranges.

use crate::dimension::{self, K};

/// An inclusive `[low, high]` bound in one dimension. `low <= high` is an
/// invariant of every `RangeRule` produced by this crate's own ingestion and
/// conversion code; values arriving from elsewhere should be checked at the
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub low: u32,
    pub high: u32,
}

impl Range {
    pub fn new(low: u32, high: u32) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, value: u32) -> bool {
        value >= self.low && value <= self.high
    }
}

/// A value plus a prefix length in bits; the masked value has its unused low
/// bits zeroed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefix {
    pub value: u32,
    pub len: u32,
}

impl Prefix {
    pub fn new(value: u32, len: u32, width: u32) -> Self {
        let len = len.min(width);
        Self {
            value: value & dimension::prefix_mask(width, len),
            len,
        }
    }

    /// Convert to the equivalent inclusive range:
    /// `low = v & mask(l)`, `high = v | !mask(l)` (width-masked).
    pub fn to_range(&self, width: u32) -> Range {
        let mask = dimension::prefix_mask(width, self.len);
        let low = self.value & mask;
        let high = (self.value | !mask) & dimension::max_value(width);
        Range::new(low, high)
    }

    pub fn matches(&self, value: u32, width: u32) -> bool {
        let mask = dimension::prefix_mask(width, self.len);
        (value & mask) == (self.value & mask)
    }
}

/// A rule expressed as per-dimension inclusive ranges; the shape HyperSplit
/// builds its decision tree over.
#[derive(Debug, Clone)]
pub struct RangeRule {
    pub priority: u32,
    pub dims: [Range; K],
}

impl RangeRule {
    pub fn matches(&self, packet: &[u32; K]) -> bool {
        (0..K).all(|d| self.dims[d].contains(packet[d]))
    }
}

/// A rule expressed as per-dimension (value, prefix-length) pairs; the shape
/// TSS groups into tuple buckets.
#[derive(Debug, Clone)]
pub struct PrefixRule {
    pub priority: u32,
    pub dims: [Prefix; K],
}

impl PrefixRule {
    pub fn matches(&self, packet: &[u32; K]) -> bool {
        (0..K).all(|d| {
            self.dims[d].matches(packet[d], dimension::WIDTH[d])
        })
    }

    /// The length-vector tuple that identifies this rule's TSS bucket.
    pub fn tuple(&self) -> [u32; K] {
        let mut t = [0u32; K];
        for d in 0..K {
            t[d] = self.dims[d].len;
        }
        t
    }

    pub fn to_range_rule(&self) -> RangeRule {
        let mut dims = [Range::new(0, 0); K];
        for d in 0..K {
            dims[d] = self.dims[d].to_range(dimension::WIDTH[d]);
        }
        RangeRule {
            priority: self.priority,
            dims,
        }
    }
}

/// An ordered rule set. All-range or all-prefix is enforced by which `R`
/// this is instantiated with; ownership is transferred into an engine's
/// `build`, after which the rule set itself is dropped.
#[derive(Debug, Clone, Default)]
pub struct RuleSet<R> {
    pub rules: Vec<R>,
}

impl<R> RuleSet<R> {
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl RuleSet<PrefixRule> {
    pub fn to_range_rule_set(&self) -> RuleSet<RangeRule> {
        RuleSet {
            rules: self.rules.iter().map(PrefixRule::to_range_rule).collect(),
        }
    }
}

/// A trace packet: five typed fields plus the expected matching priority,
/// used only to validate correctness.
#[derive(Debug, Clone, Copy)]
pub struct Packet {
    pub fields: [u32; K],
    pub expected: Option<u32>,
}
