//! Bundle combining: the non-windowed strategy.
//!
//! A leader collects every same-kind scalar access of the block that sits
//! at a known, non-overlapping offset and may legally move to the merge
//! point. The collected members are sorted by offset, split into gap-free
//! segments, and each segment is cut into runs whose byte length is a
//! profitable number of elements of some granularity. A run becomes one
//! access of a flat vector or packed layout record type.

use crate::coalesce::layout::{BundleMember, BundlePlan, plan_bundle};
use crate::coalesce::safety::{is_safe_to_merge_load, is_safe_to_merge_stores};
use crate::coalesce::scan::{MemRef, chain_too_large};
use crate::coalesce::synth::{gather_plan, scatter_plan};
use crate::coalesce::window::mergeable_scalar;
use crate::coalesce::{CoalesceStats, CoalescingStrategy, PassCx};
use crate::config::TargetConfig;
use crate::error::{MC, Stage};
use crate::ir::*;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Load,
    Store,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    inst: ValueId,
    slot: usize,
    offset: i64,
    ty: ScalarTy,
    size: u64,
    align: u32,
}

impl Candidate {
    fn end(&self) -> i64 {
        self.offset + self.size as i64
    }
}

/// Element sizes tried for a run, largest first.
pub fn granularities(target: &TargetConfig, uniform: bool) -> Vec<u64> {
    let granule = target.register_granule_bytes as u64;
    let widest = if uniform {
        granule
    } else {
        granule / target.lane_count.max(1) as u64
    };
    let mut out = vec![widest.min(8), 4, 1];
    out.retain(|&g| g > 0);
    out.sort_unstable_by(|a, b| b.cmp(a));
    out.dedup();
    out
}

fn allowed_count(target: &TargetConfig, g: u64, count: u64, uniform: bool) -> bool {
    count == 1
        || target
            .profitable_counts((g * 8) as u32, uniform)
            .is_some_and(|v| v.contains(&(count as u32)))
}

/// Splits offset-sorted candidates into maximal runs. Runs are gap-free:
/// each member starts where the previous one ends. Returns
/// `(first index, member count, granularity)` per run; members left out
/// of every run stay as they are.
fn plan_runs(members: &[Candidate], target: &TargetConfig, uniform: bool) -> Vec<(usize, usize, u64)> {
    let grains = granularities(target, uniform);
    let mut runs = Vec::new();
    let mut seg_start = 0;
    while seg_start < members.len() {
        let mut seg_end = seg_start + 1;
        while seg_end < members.len() && members[seg_end].offset == members[seg_end - 1].end() {
            seg_end += 1;
        }

        let mut i = seg_start;
        while i < seg_end {
            let start = members[i].offset;
            let mut best: Option<(usize, u64)> = None;
            for &g in &grains {
                for k in (i + 1..seg_end).rev() {
                    let covered = k - i + 1;
                    if best.is_some_and(|(c, _)| c >= covered) {
                        break;
                    }
                    let len = (members[k].end() - start) as u64;
                    if len % g == 0 && allowed_count(target, g, len / g, uniform) {
                        best = Some((covered, g));
                        break;
                    }
                }
            }
            match best {
                Some((covered, g)) => {
                    runs.push((i, covered, g));
                    i += covered;
                }
                None => i += 1,
            }
        }
        seg_start = seg_end;
    }
    runs
}

/// Bundle strategy: see the module documentation.
#[derive(Debug, Clone, Copy, Default)]
pub struct BundleCombiner;

impl BundleCombiner {
    fn leader_kind(fn_ir: &FnIR, dl: &DataLayout, v: ValueId) -> Option<(Kind, ScalarTy)> {
        let (kind, access, predicated, ty) = match &fn_ir.values[v].kind {
            ValueKind::Load(ld) => (Kind::Load, ld.access, ld.predicate.is_some(), &fn_ir.values[v].ty),
            ValueKind::Store(st) => (Kind::Store, st.access, st.predicate.is_some(), &fn_ir.values[st.val].ty),
            _ => return None,
        };
        if !access.is_simple() || predicated || !matches!(ty, Ty::Scalar(_)) {
            return None;
        }
        mergeable_scalar(dl, ty).map(|s| (kind, s))
    }

    fn collect(
        &self,
        fn_ir: &FnIR,
        refs: &[MemRef],
        idx: usize,
        cx: &mut PassCx<'_>,
    ) -> Option<(Kind, bool, Vec<Candidate>)> {
        let leader = refs[idx].inst?;
        let (kind, ty) = Self::leader_kind(fn_ir, cx.dl, leader)?;
        let addr = fn_ir.access_addr(leader)?;
        if chain_too_large(fn_ir, addr) {
            return None;
        }
        let space = fn_ir.addr_space(addr);
        let uniform = cx.oracles.uniform.is_uniform(fn_ir, addr);
        let align = match &fn_ir.values[leader].kind {
            ValueKind::Load(ld) => ld.align,
            ValueKind::Store(st) => st.align,
            _ => return None,
        };
        let mut members = vec![Candidate {
            inst: leader,
            slot: idx,
            offset: 0,
            ty,
            size: cx.dl.scalar_store_size(ty),
            align,
        }];
        let mut checklist: Vec<ValueId> = Vec::new();

        for (j, r) in refs.iter().enumerate().skip(idx + 1) {
            let Some(next) = r.inst else {
                continue;
            };
            checklist.push(next);
            let same_kind = match fn_ir.values[next].kind {
                ValueKind::Load(_) => kind == Kind::Load,
                ValueKind::Store(_) => kind == Kind::Store,
                _ => false,
            };
            if !same_kind {
                continue;
            }
            let simple = match &fn_ir.values[next].kind {
                ValueKind::Load(ld) => ld.access.is_simple(),
                ValueKind::Store(st) => st.access.is_simple(),
                _ => false,
            };
            if !simple {
                break;
            }
            let Some((_, nty)) = Self::leader_kind(fn_ir, cx.dl, next) else {
                continue;
            };
            let Some(naddr) = fn_ir.access_addr(next) else {
                continue;
            };
            if fn_ir.addr_space(naddr) != space || cx.oracles.uniform.is_uniform(fn_ir, naddr) != uniform {
                continue;
            }
            let Some(proof) = cx.offsets.offset_between(fn_ir, addr, naddr) else {
                trace!(leader, next, "bundle candidate without a constant offset");
                continue;
            };
            let size = cx.dl.scalar_store_size(nty);
            let off = proof.offset;
            let overlaps = members
                .iter()
                .any(|m| off < m.end() && m.offset < off + size as i64);
            if off == 0 || overlaps {
                break;
            }

            checklist.pop();
            let safe = match kind {
                Kind::Load => is_safe_to_merge_load(fn_ir, cx.dl, cx.oracles.alias, next, &checklist),
                Kind::Store => {
                    let stores: Vec<ValueId> = members.iter().map(|m| m.inst).collect();
                    is_safe_to_merge_stores(fn_ir, cx.dl, cx.oracles.alias, &stores, &checklist)
                }
            };
            if !safe {
                trace!(leader, next, "bundle growth blocked by a possible alias");
                break;
            }
            if kind == Kind::Store {
                checklist.clear();
            }
            let align = match &fn_ir.values[next].kind {
                ValueKind::Load(ld) => ld.align,
                ValueKind::Store(st) => st.align,
                _ => 0,
            };
            members.push(Candidate {
                inst: next,
                slot: j,
                offset: off,
                ty: nty,
                size,
                align,
            });
        }
        (members.len() >= 2).then_some((kind, uniform, members))
    }

    fn plan(run: &[Candidate], granule: u64, cx: &mut PassCx<'_>) -> Option<BundlePlan> {
        let base = run.first()?.offset;
        let members: Vec<BundleMember> = run
            .iter()
            .map(|c| BundleMember {
                offset: (c.offset - base) as u64,
                ty: c.ty,
                size: c.size,
            })
            .collect();
        plan_bundle(&members, granule, cx.layouts)
    }

    fn emit_load_run(
        fn_ir: &mut FnIR,
        leader: ValueId,
        run: &[Candidate],
        plan: &BundlePlan,
        cx: &mut PassCx<'_>,
    ) -> MC<(ValueId, Vec<(ValueId, ValueId)>)> {
        let Some(leader_addr) = fn_ir.access_addr(leader) else {
            bail!(
                "Bundle",
                crate::error::MCCode::ICE9001,
                Stage::Bundle,
                "bundle leader {} is not an access",
                leader
            );
        };
        let first = run[0];
        let bits = cx.dl.pointer(fn_ir.addr_space(leader_addr)).register_bits as u16;
        let invariant = run
            .iter()
            .all(|c| fn_ir.load_info(c.inst).is_some_and(|l| l.invariant));
        let tys: Vec<ScalarTy> = run.iter().map(|c| c.ty).collect();
        let mut b = Builder::before(fn_ir, leader);
        let addr = if first.offset == 0 {
            leader_addr
        } else {
            let k = b.iconst(first.offset, bits);
            b.index(
                leader_addr,
                vec![IndexStep::Elem {
                    index: k,
                    elem_size: 1,
                }],
                false,
            )
        };
        let wide = b.load_with(
            LoadInfo {
                addr,
                access: Access::Simple,
                align: first.align,
                predicate: None,
                invariant,
            },
            plan.ty.clone(),
        );
        let parts = scatter_plan(&mut b, cx.dl, plan, wide, &tys)?;
        let replacements = run.iter().map(|c| c.inst).zip(parts).collect();
        Ok((wide, replacements))
    }

    fn emit_store_run(fn_ir: &mut FnIR, run: &[Candidate], plan: &BundlePlan, cx: &mut PassCx<'_>) -> MC<ValueId> {
        let Some(tail) = run.iter().max_by_key(|c| c.slot) else {
            bail!(
                "Bundle",
                crate::error::MCCode::ICE9001,
                Stage::Bundle,
                "empty store run"
            );
        };
        let mut values = Vec::with_capacity(run.len());
        for c in run {
            let Some(st) = fn_ir.store_info(c.inst) else {
                bail!(
                    "Bundle",
                    crate::error::MCCode::ICE9001,
                    Stage::Bundle,
                    "store run member {} is not a store",
                    c.inst
                );
            };
            values.push(st.val);
        }
        let Some(addr) = fn_ir.access_addr(run[0].inst) else {
            bail!(
                "Bundle",
                crate::error::MCCode::ICE9001,
                Stage::Bundle,
                "store run without an address"
            );
        };
        let span = run
            .iter()
            .min_by_key(|c| c.slot)
            .map_or(fn_ir.values[tail.inst].span, |c| fn_ir.values[c.inst].span);
        let mut b = Builder::before(fn_ir, tail.inst).with_span(span);
        let payload = gather_plan(&mut b, cx.dl, plan, &values)?;
        Ok(b.store_with(StoreInfo {
            addr,
            val: payload,
            access: Access::Simple,
            align: run[0].align,
            predicate: None,
        }))
    }

    fn combine(
        &self,
        fn_ir: &mut FnIR,
        refs: &mut [MemRef],
        idx: usize,
        cx: &mut PassCx<'_>,
        stats: &mut CoalesceStats,
    ) -> MC<bool> {
        let Some((kind, uniform, mut members)) = self.collect(fn_ir, refs, idx, cx) else {
            return Ok(false);
        };
        let leader = members[0].inst;
        members.sort_by_key(|c| c.offset);

        let mut planned = Vec::new();
        for (start, len, g) in plan_runs(&members, cx.target, uniform) {
            let run = &members[start..start + len];
            let Some(plan) = Self::plan(run, g, cx) else {
                continue;
            };
            let budget_ok = match kind {
                Kind::Load => cx.budget.take_load(),
                Kind::Store => cx.budget.take_store(),
            };
            if !budget_ok {
                trace!(leader, "bundle budget exhausted");
                break;
            }
            planned.push((run, plan));
        }
        if planned.is_empty() {
            return Ok(false);
        }

        // Emit every run before erasing anything: load runs all anchor on
        // the leader, which may itself be a member.
        let mut doomed: Vec<&[Candidate]> = Vec::with_capacity(planned.len());
        for (run, plan) in &planned {
            match kind {
                Kind::Load => {
                    let (wide, replacements) = Self::emit_load_run(fn_ir, leader, run, plan, cx)?;
                    ice_ensure!(fn_ir.is_placed(wide), Stage::Bundle, "bundle load was not placed");
                    for (old, new) in replacements {
                        fn_ir.replace_all_uses(old, new);
                    }
                    let first_slot = run.iter().map(|c| c.slot).min().unwrap_or(idx);
                    refs[first_slot].inst = Some(wide);
                }
                Kind::Store => {
                    let wide = Self::emit_store_run(fn_ir, run, plan, cx)?;
                    ice_ensure!(fn_ir.is_placed(wide), Stage::Bundle, "bundle store was not placed");
                    let tail_slot = run.iter().map(|c| c.slot).max().unwrap_or(idx);
                    refs[tail_slot].inst = Some(wide);
                }
            }
            doomed.push(*run);
            stats.bundles += 1;
            stats.accesses_removed += run.len() - 1;
            debug!(
                function = %fn_ir.name,
                leader,
                members = run.len(),
                ty = %plan.ty,
                "bundled accesses"
            );
        }

        for run in doomed {
            let keep_slot = match kind {
                Kind::Load => run.iter().map(|c| c.slot).min(),
                Kind::Store => run.iter().map(|c| c.slot).max(),
            };
            for c in run {
                let addr = fn_ir.access_addr(c.inst);
                fn_ir.erase(c.inst);
                if let Some(a) = addr {
                    fn_ir.delete_trivially_dead(a);
                }
                if Some(c.slot) != keep_slot {
                    refs[c.slot].inst = None;
                }
            }
        }
        cx.offsets.reset();
        Ok(true)
    }
}

impl CoalescingStrategy for BundleCombiner {
    fn name(&self) -> &'static str {
        "bundle"
    }

    fn coalesce_block(
        &self,
        fn_ir: &mut FnIR,
        refs: &mut [MemRef],
        cx: &mut PassCx<'_>,
        stats: &mut CoalesceStats,
    ) -> MC<bool> {
        let mut changed = false;
        for idx in 0..refs.len() {
            changed |= self.combine(fn_ir, refs, idx, cx, stats)?;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(offset: i64, ty: ScalarTy, size: u64) -> Candidate {
        Candidate {
            inst: 0,
            slot: 0,
            offset,
            ty,
            size,
            align: 1,
        }
    }

    #[test]
    fn granularities_scale_with_uniformity() {
        let t = TargetConfig::default();
        assert_eq!(granularities(&t, true), vec![8, 4, 1]);
        assert_eq!(granularities(&t, false), vec![4, 2, 1]);
        let narrow = TargetConfig {
            register_granule_bytes: 4,
            ..TargetConfig::default()
        };
        assert_eq!(granularities(&narrow, true), vec![4, 1]);
    }

    #[test]
    fn bytes_prefer_one_wide_element() {
        let t = TargetConfig::default();
        let bytes: Vec<_> = (0..4).map(|i| c(i, ScalarTy::Int(8), 1)).collect();
        assert_eq!(plan_runs(&bytes, &t, true), vec![(0, 4, 4)]);
    }

    #[test]
    fn gaps_split_segments_and_singletons_are_left() {
        let t = TargetConfig::default();
        let members = [
            c(0, ScalarTy::Int(32), 4),
            c(4, ScalarTy::Int(32), 4),
            c(16, ScalarTy::Int(32), 4),
            c(24, ScalarTy::Int(16), 2),
            c(26, ScalarTy::Int(16), 2),
        ];
        assert_eq!(plan_runs(&members, &t, false), vec![(0, 2, 4), (3, 2, 4)]);
    }
}
