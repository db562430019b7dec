use crate::coalesce::safety::is_safe_to_merge_stores;
use crate::coalesce::scan::{MemRef, chain_too_large};
use crate::coalesce::synth::pack_lanes;
use crate::coalesce::window::{Member, alignment_guard, footprint, mergeable_scalar, trim_to_profitable};
use crate::coalesce::{CoalesceStats, PassCx};
use crate::error::{MC, Stage};
use crate::ir::*;
use tracing::{debug, trace};

/// Grows a gap-free store group from `refs[idx]` and rewrites it into one
/// vector store placed at the last kept member in program order.
pub fn merge_store(
    fn_ir: &mut FnIR,
    refs: &mut [MemRef],
    idx: usize,
    cx: &mut PassCx<'_>,
    stats: &mut CoalesceStats,
) -> MC<bool> {
    let Some(leader) = refs[idx].inst else {
        return Ok(false);
    };
    let Some(st) = fn_ir.store_info(leader).cloned() else {
        return Ok(false);
    };
    if !st.access.is_simple() {
        return Ok(false);
    }
    let leader_ty = fn_ir.values[st.val].ty.clone();
    let Some(scalar) = mergeable_scalar(cx.dl, &leader_ty) else {
        return Ok(false);
    };
    let scalar_bits = cx.dl.scalar_bits(scalar);
    let scalar_size = cx.dl.scalar_store_size(scalar);
    let Some(profit) = cx.target.profit.lengths(scalar_bits).map(<[u32]>::to_vec) else {
        return Ok(false);
    };
    let max_len = profit[0];
    let mut num = leader_ty.lanes();
    if num >= max_len {
        return Ok(false);
    }
    if chain_too_large(fn_ir, st.addr) {
        trace!(leader, "store leader address reached through a long phi/select chain");
        return Ok(false);
    }

    let space = fn_ir.addr_space(st.addr);
    let leader_size = cx.dl.store_size(&leader_ty);
    let mut members = vec![Member {
        inst: leader,
        offset: 0,
        slot: idx,
        lanes: num,
        size: leader_size,
        align: st.align,
    }];
    // Bytes from the leader's start to the end of the highest member, and
    // from the start of the lowest member up to the leader's start.
    let mut last_to_leading = leader_size as i64;
    let mut leading_to_first = 0i64;
    let mut checklist: Vec<ValueId> = Vec::new();
    let window_end = refs[idx].distance + cx.cfg.window_size;

    for (j, r) in refs.iter().enumerate().skip(idx + 1) {
        if r.distance > window_end {
            break;
        }
        let Some(next) = r.inst else {
            continue;
        };
        checklist.push(next);
        let Some(nst) = fn_ir.store_info(next) else {
            continue;
        };
        if !nst.access.is_simple() {
            break;
        }
        if fn_ir.addr_space(nst.addr) != space || nst.predicate != st.predicate {
            continue;
        }
        let nty = &fn_ir.values[nst.val].ty;
        let Some(ns) = mergeable_scalar(cx.dl, nty) else {
            continue;
        };
        if !cx.dl.same_size(ns, scalar) {
            continue;
        }
        let Some(proof) = cx.offsets.offset_between(fn_ir, st.addr, nst.addr) else {
            trace!(leader, next, "no constant offset");
            continue;
        };
        let off = proof.offset;
        if off == 0 {
            break;
        }
        let nsize = cx.dl.store_size(nty) as i64;
        let contiguous = if off > 0 {
            off == last_to_leading
        } else {
            -off == leading_to_first + nsize
        };
        if !contiguous {
            continue;
        }
        let nlanes = nty.lanes();
        if num + nlanes > max_len {
            break;
        }

        checklist.pop();
        let stores: Vec<ValueId> = members.iter().map(|m| m.inst).collect();
        if !is_safe_to_merge_stores(fn_ir, cx.dl, cx.oracles.alias, &stores, &checklist) {
            trace!(leader, next, "an access between the stores may alias them");
            break;
        }
        checklist.clear();

        num += nlanes;
        if off > 0 {
            last_to_leading = off + nsize;
        } else {
            leading_to_first = -off;
        }
        members.push(Member {
            inst: next,
            offset: off,
            slot: j,
            lanes: nlanes,
            size: nsize as u64,
            align: nst.align,
        });
        if num == max_len {
            break;
        }
    }

    if members.len() < 2 {
        return Ok(false);
    }
    // Members extend one end of the run at a time, so any program-order
    // prefix is still gap-free.
    let Some((keep, _)) = trim_to_profitable(&members, scalar_size, &profit) else {
        trace!(leader, members = members.len(), "no profitable length");
        return Ok(false);
    };
    members.truncate(keep);
    members.sort_by_key(|m| m.offset);
    let uniform = cx.oracles.uniform.is_uniform(fn_ir, st.addr);
    if !alignment_guard(&mut members, uniform) {
        trace!(leader, "rejected by the alignment guard");
        return Ok(false);
    }
    let num = (footprint(&members) / scalar_size) as u32;
    if !profit.contains(&num) {
        return Ok(false);
    }
    if !cx.budget.take_store() {
        trace!(leader, "store merge budget exhausted");
        return Ok(false);
    }

    let Some(tail) = members.iter().max_by_key(|m| m.slot).copied() else {
        return Ok(false);
    };
    let first = members[0];
    let Some(first_st) = fn_ir.store_info(first.inst).cloned() else {
        return Ok(false);
    };
    let mut parts = Vec::with_capacity(members.len());
    for m in &members {
        let Some(ms) = fn_ir.store_info(m.inst) else {
            continue;
        };
        parts.push((ms.val, ((m.offset - first.offset) as u64 / scalar_size) as u32));
    }
    ice_ensure!(
        parts.len() == members.len(),
        Stage::Merge,
        "store group of leader {} lost a member",
        leader
    );

    let span = fn_ir.values[leader].span.or(fn_ir.values[tail.inst].span);
    let wide = {
        let mut b = Builder::before(fn_ir, tail.inst).with_span(span);
        let payload = pack_lanes(&mut b, cx.dl, scalar, num, &parts)?;
        b.store_with(StoreInfo {
            addr: first_st.addr,
            val: payload,
            access: Access::Simple,
            align: first_st.align,
            predicate: st.predicate,
        })
    };
    ice_ensure!(
        fn_ir.is_placed(wide),
        Stage::Merge,
        "merged store for leader {} was not placed",
        leader
    );

    for m in &members {
        let addr = fn_ir.access_addr(m.inst);
        fn_ir.erase(m.inst);
        if let Some(a) = addr {
            fn_ir.delete_trivially_dead(a);
        }
        refs[m.slot].inst = None;
    }
    refs[tail.slot].inst = Some(wide);
    cx.offsets.reset();

    stats.stores_merged += 1;
    stats.accesses_removed += members.len() - 1;
    debug!(
        function = %fn_ir.name,
        leader,
        members = members.len(),
        lanes = num,
        scalar = %scalar,
        "merged stores"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::{AffineChains, BasicAlias, KnownBits, Oracles, UniformityInfo};
    use crate::coalesce::MergeBudget;
    use crate::coalesce::offset::OffsetEngine;
    use crate::coalesce::scan::collect_mem_refs;
    use crate::config::CoalesceConfig;
    use crate::ir::verify::verify_ir;
    use crate::utils::Span;
    use rustc_hash::FxHashSet;

    fn run(f: &mut FnIR, bb: BlockId, cfg: &CoalesceConfig) -> bool {
        let dl = DataLayout::default();
        let target = cfg.effective_target();
        let alias = BasicAlias::new(&dl, &target);
        let uni = UniformityInfo::compute(f);
        let oracles = Oracles {
            alias: &alias,
            induction: &AffineChains,
            known_bits: &KnownBits,
            uniform: &uni,
        };
        let mut budget = MergeBudget::from_config(cfg);
        let mut layouts = LayoutCache::default();
        let mut cx = PassCx {
            dl: &dl,
            cfg,
            target: &target,
            oracles,
            offsets: OffsetEngine::new(&dl, oracles),
            budget: &mut budget,
            layouts: &mut layouts,
            created: FxHashSet::default(),
        };
        let mut refs = collect_mem_refs(f, bb, &target);
        let mut stats = CoalesceStats::default();
        merge_store(f, &mut refs, 0, &mut cx, &mut stats).expect("no ICE")
    }

    fn stores_at(f: &mut FnIR, bb: BlockId, p: ValueId, offsets: &[i64]) -> Vec<ValueId> {
        let mut b = Builder::at_end(f, bb);
        offsets
            .iter()
            .map(|&off| {
                let k = b.iconst(off, 64);
                let a = b.elem_addr(p, k, 1);
                let v = b.iconst(off + 100, 32);
                b.store(a, v, 4)
            })
            .collect()
    }

    #[test]
    fn descending_stores_land_at_the_tail() {
        let mut f = FnIR::new("desc");
        let bb = f.add_block();
        let p = f.add_param("p", Ty::ptr(1), false, false);
        let stores = stores_at(&mut f, bb, p, &[4, 0]);
        assert!(run(&mut f, bb, &CoalesceConfig::default()));
        assert_eq!(verify_ir(&f), Ok(()));
        let last = *f.blocks[bb].instrs.last().expect("non-empty");
        let info = f.store_info(last).expect("store at the end");
        assert_eq!(f.values[info.val].ty, Ty::vector(ScalarTy::Int(32), 2));
        assert!(stores.iter().all(|&s| f.values[s].erased));
    }

    #[test]
    fn merged_store_reports_the_leader_location() {
        let mut f = FnIR::new("span");
        let bb = f.add_block();
        let p = f.add_param("p", Ty::ptr(1), false, false);
        {
            let mut b = Builder::at_end(&mut f, bb).with_span(Span::new(3, 7));
            let v = b.iconst(1, 32);
            b.store(p, v, 4);
        }
        {
            let mut b = Builder::at_end(&mut f, bb).with_span(Span::new(4, 7));
            let four = b.iconst(4, 64);
            let a = b.elem_addr(p, four, 1);
            let v = b.iconst(2, 32);
            b.store(a, v, 4);
        }
        assert!(run(&mut f, bb, &CoalesceConfig::default()));
        let last = *f.blocks[bb].instrs.last().expect("non-empty");
        assert_eq!(f.values[last].span, Span::new(3, 7));
    }

    #[test]
    fn gap_or_same_address_stops_merging() {
        let mut f = FnIR::new("gap");
        let bb = f.add_block();
        let p = f.add_param("p", Ty::ptr(1), false, false);
        stores_at(&mut f, bb, p, &[0, 8]);
        assert!(!run(&mut f, bb, &CoalesceConfig::default()));

        let mut g = FnIR::new("same");
        let bb = g.add_block();
        let p = g.add_param("p", Ty::ptr(1), false, false);
        stores_at(&mut g, bb, p, &[0, 0, 4]);
        assert!(!run(&mut g, bb, &CoalesceConfig::default()));
    }

    #[test]
    fn exhausted_budget_leaves_ir_alone() {
        let mut f = FnIR::new("budget");
        let bb = f.add_block();
        let p = f.add_param("p", Ty::ptr(1), false, false);
        stores_at(&mut f, bb, p, &[0, 4]);
        let before = f.live_instrs();
        let cfg = CoalesceConfig {
            max_store_merges: Some(0),
            ..CoalesceConfig::default()
        };
        assert!(!run(&mut f, bb, &cfg));
        assert_eq!(f.live_instrs(), before);
    }
}
