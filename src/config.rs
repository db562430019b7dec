use crate::error::{MC, MCCode, Stage};
use crate::ir::AddrSpace;
use rustc_hash::FxHashSet;
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Window,
    Bundle,
}

impl Strategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "window" => Some(Strategy::Window),
            "bundle" => Some(Strategy::Bundle),
            _ => None,
        }
    }
}

/// Profitable vector lengths per scalar bit width, largest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfitTable {
    pub bits64: Vec<u32>,
    pub bits32: Vec<u32>,
    pub bits16: Vec<u32>,
    pub bits8: Vec<u32>,
}

impl Default for ProfitTable {
    fn default() -> Self {
        Self {
            bits64: vec![2],
            bits32: vec![4, 3, 2],
            bits16: vec![8, 6, 4, 2],
            bits8: vec![16, 12, 8, 4, 2],
        }
    }
}

impl ProfitTable {
    /// Adds the 8 x 32-bit and 4 x 64-bit lengths in front.
    pub fn with_vector8(mut self) -> Self {
        if self.bits64.first() != Some(&4) {
            self.bits64.insert(0, 4);
        }
        if self.bits32.first() != Some(&8) {
            self.bits32.insert(0, 8);
        }
        self
    }

    pub fn lengths(&self, scalar_bits: u32) -> Option<&[u32]> {
        let v = match scalar_bits {
            64 => &self.bits64,
            32 => &self.bits32,
            16 => &self.bits16,
            8 => &self.bits8,
            _ => return None,
        };
        if v.is_empty() { None } else { Some(v) }
    }

    pub fn max_len(&self, scalar_bits: u32) -> Option<u32> {
        self.lengths(scalar_bits).and_then(|v| v.first().copied())
    }
}

#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub profit: ProfitTable,
    // Byte size of one vector register slot per lane.
    pub register_granule_bytes: u32,
    pub lane_count: u32,
    // Widest uniform load in bits; uniform leaders may fill it completely.
    pub uniform_load_bits: u32,
    pub read_only_spaces: FxHashSet<AddrSpace>,
    pub disjoint_spaces: Vec<(AddrSpace, AddrSpace)>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            profit: ProfitTable::default(),
            register_granule_bytes: 32,
            lane_count: 16,
            uniform_load_bits: 256,
            read_only_spaces: FxHashSet::default(),
            disjoint_spaces: Vec::new(),
        }
    }
}

impl TargetConfig {
    /// Descending list of element counts worth emitting for one access.
    pub fn profitable_counts(&self, scalar_bits: u32, uniform: bool) -> Option<Vec<u32>> {
        let table = self.profit.lengths(scalar_bits)?;
        if uniform && scalar_bits > 0 {
            let top = self.uniform_load_bits / scalar_bits;
            if top >= 2 {
                return Some((2..=top).rev().collect());
            }
        }
        Some(table.to_vec())
    }

    /// Rejects tables the merger cannot use: lengths must be at least 2
    /// and strictly descending, and the granule must be a power of two.
    pub fn validate(&self) -> MC<()> {
        for (bits, lengths) in [
            (64, &self.profit.bits64),
            (32, &self.profit.bits32),
            (16, &self.profit.bits16),
            (8, &self.profit.bits8),
        ] {
            ensure!(
                lengths.iter().all(|&n| n >= 2) && lengths.windows(2).all(|w| w[0] > w[1]),
                "Config",
                MCCode::E3002,
                Stage::Scan,
                "profitable lengths for {}-bit scalars must be descending and at least 2: {:?}",
                bits,
                lengths
            );
        }
        ensure!(
            self.register_granule_bytes.is_power_of_two(),
            "Config",
            MCCode::E3002,
            Stage::Scan,
            "register granule of {} bytes is not a power of two",
            self.register_granule_bytes
        );
        ensure!(self.lane_count > 0, "Config", MCCode::E3002, Stage::Scan, "lane count is zero");
        Ok(())
    }

    pub fn spaces_disjoint(&self, a: AddrSpace, b: AddrSpace) -> bool {
        a != b
            && self
                .disjoint_spaces
                .iter()
                .any(|&(x, y)| (x, y) == (a, b) || (y, x) == (a, b))
    }

    pub fn is_read_only(&self, space: AddrSpace) -> bool {
        self.read_only_spaces.contains(&space)
    }
}

#[derive(Debug, Clone)]
pub struct CoalesceConfig {
    pub strategy: Strategy,
    // Instructions scanned past the leader before growth stops.
    pub window_size: usize,
    pub max_load_merges: Option<usize>,
    pub max_store_merges: Option<usize>,
    pub verify: bool,
    pub allow_vector8: bool,
    pub allow_neg_sym_load: bool,
    pub canonicalize_index64: bool,
    pub target: TargetConfig,
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Window,
            window_size: 150,
            max_load_merges: None,
            max_store_merges: None,
            verify: false,
            allow_vector8: false,
            allow_neg_sym_load: false,
            canonicalize_index64: true,
            target: TargetConfig::default(),
        }
    }
}

fn parse_bool(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_usize(v: &str) -> Option<usize> {
    v.trim().parse::<usize>().ok()
}

impl CoalesceConfig {
    pub fn from_env() -> Self {
        Self::default().overlay(|key| env::var(key).ok())
    }

    /// Applies `MEMCOAL_*` settings from `lookup`. Unparsable numbers and
    /// unknown strategy names leave the current value in place.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(s) = lookup("MEMCOAL_STRATEGY").and_then(|v| Strategy::parse(&v)) {
            self.strategy = s;
        }
        if let Some(n) = lookup("MEMCOAL_WINDOW_SIZE").and_then(|v| parse_usize(&v)) {
            self.window_size = n;
        }
        if let Some(n) = lookup("MEMCOAL_MAX_LOAD_MERGES").and_then(|v| parse_usize(&v)) {
            self.max_load_merges = Some(n);
        }
        if let Some(n) = lookup("MEMCOAL_MAX_STORE_MERGES").and_then(|v| parse_usize(&v)) {
            self.max_store_merges = Some(n);
        }
        if let Some(v) = lookup("MEMCOAL_VERIFY_EACH_PASS") {
            self.verify = parse_bool(&v);
        }
        if let Some(v) = lookup("MEMCOAL_ALLOW_VECTOR8") {
            self.allow_vector8 = parse_bool(&v);
        }
        if let Some(v) = lookup("MEMCOAL_ALLOW_NEG_SYM_LOAD") {
            self.allow_neg_sym_load = parse_bool(&v);
        }
        if let Some(v) = lookup("MEMCOAL_CANONICALIZE_INDEX64") {
            self.canonicalize_index64 = parse_bool(&v);
        }
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Target description with the configured table extensions applied.
    pub fn effective_target(&self) -> TargetConfig {
        let mut t = self.target.clone();
        if self.allow_vector8 {
            t.profit = t.profit.with_vector8();
            t.uniform_load_bits = t.uniform_load_bits.max(512);
        }
        t
    }
}
