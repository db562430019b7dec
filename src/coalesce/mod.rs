//! The coalescing pass.
//!
//! [`Coalescer`] walks every basic block of each kernel, lists its memory
//! operations, optionally canonicalizes 64-bit indices, and hands the list
//! to the configured [`CoalescingStrategy`]. Strategies only ever merge
//! inside one block and leave the IR verifiable after each commit.

pub mod algebra;
pub mod bundle;
pub mod decompose;
pub mod gep64;
pub mod layout;
pub mod offset;
pub mod safety;
pub mod scan;
pub mod synth;
pub mod window;
pub mod window_load;
pub mod window_store;

use crate::analyze::{AffineChains, BasicAlias, KnownBits, Oracles, UniformityInfo};
use crate::config::{CoalesceConfig, Strategy, TargetConfig};
use crate::error::{MC, MCCode, MCCtx, MCException, Stage};
use crate::ir::verify::verify_ir;
use crate::ir::*;
use offset::OffsetEngine;
use rustc_hash::FxHashSet;
use scan::{MemRef, collect_mem_refs};
use tracing::{debug, info};

pub use bundle::BundleCombiner;
pub use window::WindowMerger;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CoalesceStats {
    pub loads_merged: usize,
    pub stores_merged: usize,
    pub bundles: usize,
    pub accesses_removed: usize,
    pub index64_canonicalized: usize,
    pub index64_optimized: usize,
}

impl CoalesceStats {
    pub fn accumulate(&mut self, other: Self) {
        self.loads_merged += other.loads_merged;
        self.stores_merged += other.stores_merged;
        self.bundles += other.bundles;
        self.accesses_removed += other.accesses_removed;
        self.index64_canonicalized += other.index64_canonicalized;
        self.index64_optimized += other.index64_optimized;
    }

    pub fn merges(&self) -> usize {
        self.loads_merged + self.stores_merged + self.bundles
    }
}

/// Remaining number of load and store merges. `None` is unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeBudget {
    pub loads_left: Option<usize>,
    pub stores_left: Option<usize>,
}

impl MergeBudget {
    pub fn from_config(cfg: &CoalesceConfig) -> Self {
        Self {
            loads_left: cfg.max_load_merges,
            stores_left: cfg.max_store_merges,
        }
    }

    fn take(left: &mut Option<usize>) -> bool {
        match left {
            None => true,
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                true
            }
        }
    }

    pub fn take_load(&mut self) -> bool {
        Self::take(&mut self.loads_left)
    }

    pub fn take_store(&mut self) -> bool {
        Self::take(&mut self.stores_left)
    }
}

/// Everything a strategy needs besides the function itself.
pub struct PassCx<'a> {
    pub dl: &'a DataLayout,
    pub cfg: &'a CoalesceConfig,
    pub target: &'a TargetConfig,
    pub oracles: Oracles<'a>,
    pub offsets: OffsetEngine<'a>,
    pub budget: &'a mut MergeBudget,
    pub layouts: &'a mut LayoutCache,
    /// Adds introduced by 64-bit index canonicalization.
    pub created: FxHashSet<ValueId>,
}

pub trait CoalescingStrategy {
    fn name(&self) -> &'static str;

    /// Merges what it can among `refs`, clearing the slots of erased
    /// accesses and storing merged accesses in the slot they take over.
    fn coalesce_block(
        &self,
        fn_ir: &mut FnIR,
        refs: &mut [MemRef],
        cx: &mut PassCx<'_>,
        stats: &mut CoalesceStats,
    ) -> MC<bool>;
}

fn strategy_for(strategy: Strategy) -> &'static dyn CoalescingStrategy {
    match strategy {
        Strategy::Window => &WindowMerger,
        Strategy::Bundle => &BundleCombiner,
    }
}

#[derive(Debug, Clone, Default)]
pub struct Coalescer {
    cfg: CoalesceConfig,
}

impl Coalescer {
    pub fn new(cfg: CoalesceConfig) -> Self {
        Self { cfg }
    }

    pub fn from_env() -> Self {
        Self::new(CoalesceConfig::from_env())
    }

    pub fn config(&self) -> &CoalesceConfig {
        &self.cfg
    }

    /// Runs over every function of `module`. Merge caps are shared by the
    /// whole module.
    pub fn run_module(&self, module: &mut Module) -> MC<CoalesceStats> {
        let Module {
            data_layout,
            layouts,
            functions,
        } = module;
        let mut budget = MergeBudget::from_config(&self.cfg);
        let mut stats = CoalesceStats::default();
        for fn_ir in functions.iter_mut() {
            let s = self.run_defaults(fn_ir, data_layout, layouts, &mut budget)?;
            stats.accumulate(s);
        }
        Ok(stats)
    }

    /// Runs over one function with the built-in oracles.
    pub fn run_function(&self, fn_ir: &mut FnIR, dl: &DataLayout, layouts: &mut LayoutCache) -> MC<CoalesceStats> {
        let mut budget = MergeBudget::from_config(&self.cfg);
        self.run_defaults(fn_ir, dl, layouts, &mut budget)
    }

    /// Runs over one function with caller-provided oracles.
    pub fn run_function_with(
        &self,
        fn_ir: &mut FnIR,
        dl: &DataLayout,
        layouts: &mut LayoutCache,
        oracles: Oracles<'_>,
    ) -> MC<CoalesceStats> {
        let mut budget = MergeBudget::from_config(&self.cfg);
        let target = self.cfg.effective_target();
        self.run_with_budget(fn_ir, dl, &target, layouts, oracles, &mut budget)
    }

    fn run_defaults(
        &self,
        fn_ir: &mut FnIR,
        dl: &DataLayout,
        layouts: &mut LayoutCache,
        budget: &mut MergeBudget,
    ) -> MC<CoalesceStats> {
        let target = self.cfg.effective_target();
        let alias = BasicAlias::new(dl, &target);
        let uniform = UniformityInfo::compute(fn_ir);
        let oracles = Oracles {
            alias: &alias,
            induction: &AffineChains,
            known_bits: &KnownBits,
            uniform: &uniform,
        };
        self.run_with_budget(fn_ir, dl, &target, layouts, oracles, budget)
    }

    fn run_with_budget(
        &self,
        fn_ir: &mut FnIR,
        dl: &DataLayout,
        target: &TargetConfig,
        layouts: &mut LayoutCache,
        oracles: Oracles<'_>,
        budget: &mut MergeBudget,
    ) -> MC<CoalesceStats> {
        let mut stats = CoalesceStats::default();
        if !fn_ir.is_kernel {
            return Ok(stats);
        }
        target.validate().ctx(&fn_ir.name, None)?;
        if self.cfg.verify
            && let Err(e) = verify_ir(fn_ir)
        {
            return Err(MCException::new("Coalesce", MCCode::E3001, Stage::Verify, e.to_string())
                .in_function(fn_ir.name.clone()));
        }

        let strategy = strategy_for(self.cfg.strategy);
        let mut cx = PassCx {
            dl,
            cfg: &self.cfg,
            target,
            oracles,
            offsets: OffsetEngine::new(dl, oracles),
            budget,
            layouts,
            created: FxHashSet::default(),
        };

        for bb in 0..fn_ir.blocks.len() {
            let mut refs = collect_mem_refs(fn_ir, bb, target);
            if refs.len() < 2 {
                continue;
            }
            if self.cfg.canonicalize_index64 {
                for r in &refs {
                    if let Some(inst) = r.inst {
                        stats.index64_canonicalized +=
                            gep64::canonicalize(fn_ir, dl, oracles.known_bits, inst, &mut cx.created);
                    }
                }
                cx.offsets.reset();
            }

            let changed = strategy
                .coalesce_block(fn_ir, &mut refs, &mut cx, &mut stats)
                .ctx(&fn_ir.name, None)?;
            if changed {
                debug!(function = %fn_ir.name, block = bb, strategy = strategy.name(), "block coalesced");
            }

            for r in &refs {
                if let Some(inst) = r.inst
                    && !fn_ir.values[inst].erased
                {
                    stats.index64_optimized += gep64::optimize(fn_ir, dl, inst, &cx.created);
                }
            }
        }

        if self.cfg.verify
            && let Err(e) = verify_ir(fn_ir)
        {
            return Err(MCException::new("Coalesce", MCCode::ICE9001, Stage::Verify, e.to_string())
                .in_function(fn_ir.name.clone())
                .note(format!("after the {} strategy", strategy.name())));
        }
        info!(
            function = %fn_ir.name,
            loads = stats.loads_merged,
            stores = stats.stores_merged,
            bundles = stats.bundles,
            removed = stats.accesses_removed,
            "coalescing finished"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_counts_down_and_unlimited_never_ends() {
        let mut b = MergeBudget {
            loads_left: Some(1),
            stores_left: None,
        };
        assert!(b.take_load());
        assert!(!b.take_load());
        for _ in 0..100 {
            assert!(b.take_store());
        }
    }

    #[test]
    fn non_kernels_are_skipped() {
        let mut f = FnIR::new("helper");
        f.is_kernel = false;
        let bb = f.add_block();
        let p = f.add_param("p", Ty::ptr(1), false, false);
        {
            let mut b = Builder::at_end(&mut f, bb);
            let v = b.iconst(1, 32);
            b.store(p, v, 4);
            let four = b.iconst(4, 64);
            let a4 = b.elem_addr(p, four, 1);
            b.store(a4, v, 4);
        }
        let before = f.live_instrs();
        let stats = Coalescer::default()
            .run_function(&mut f, &DataLayout::default(), &mut LayoutCache::default())
            .expect("runs");
        assert_eq!(stats, CoalesceStats::default());
        assert_eq!(f.live_instrs(), before);
    }

    #[test]
    fn malformed_input_is_rejected_when_verifying() {
        let mut f = FnIR::new("broken");
        let bb = f.add_block();
        f.blocks[bb].term = Terminator::Return(Some(42));
        let cfg = CoalesceConfig {
            verify: true,
            ..CoalesceConfig::default()
        };
        let err = Coalescer::new(cfg)
            .run_function(&mut f, &DataLayout::default(), &mut LayoutCache::default())
            .unwrap_err();
        assert_eq!(err.code, MCCode::E3001);
        assert_eq!(err.function.as_deref(), Some("broken"));
    }
}
