use crate::coalesce::offset::OffsetSource;
use crate::coalesce::safety::is_safe_to_merge_load;
use crate::coalesce::scan::{MemRef, chain_too_large};
use crate::coalesce::synth::{pack_lanes, unpack_lanes};
use crate::coalesce::window::{Member, alignment_guard, footprint, mergeable_scalar, trim_to_profitable};
use crate::coalesce::{CoalesceStats, PassCx};
use crate::error::{MC, Stage};
use crate::ir::*;
use tracing::{debug, trace};

/// Grows a load group from `refs[idx]` and rewrites it into one vector
/// load placed at the earliest merged access. Growth stops at the first
/// load overlapping an accepted one. Returns false when nothing changed.
pub fn merge_load(
    fn_ir: &mut FnIR,
    refs: &mut [MemRef],
    idx: usize,
    cx: &mut PassCx<'_>,
    stats: &mut CoalesceStats,
) -> MC<bool> {
    let Some(leader) = refs[idx].inst else {
        return Ok(false);
    };
    let Some(ld) = fn_ir.load_info(leader).cloned() else {
        return Ok(false);
    };
    if !ld.access.is_simple() {
        return Ok(false);
    }
    let leader_ty = fn_ir.values[leader].ty.clone();
    let Some(scalar) = mergeable_scalar(cx.dl, &leader_ty) else {
        return Ok(false);
    };
    let scalar_bits = cx.dl.scalar_bits(scalar);
    let scalar_size = cx.dl.scalar_store_size(scalar);
    let uniform = cx.oracles.uniform.is_uniform(fn_ir, ld.addr);
    let Some(mut profit) = cx.target.profitable_counts(scalar_bits, uniform) else {
        return Ok(false);
    };
    if scalar_bits == 16 {
        profit.retain(|&n| n != 3);
    }
    let Some(&max_len) = profit.first() else {
        return Ok(false);
    };
    if leader_ty.lanes() >= max_len {
        return Ok(false);
    }
    if chain_too_large(fn_ir, ld.addr) {
        trace!(leader, "load leader address reached through a long phi/select chain");
        return Ok(false);
    }

    let space = fn_ir.addr_space(ld.addr);
    let leader_mask = ld.predicate.map(|p| p.mask);
    let leader_size = cx.dl.store_size(&leader_ty);
    let mut members = vec![Member {
        inst: leader,
        offset: 0,
        slot: idx,
        lanes: leader_ty.lanes(),
        size: leader_size,
        align: ld.align,
    }];
    let (mut lo, mut hi) = (0i64, leader_size as i64);
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
        let Some(nld) = fn_ir.load_info(next) else {
            continue;
        };
        if !nld.access.is_simple() {
            break;
        }
        if fn_ir.addr_space(nld.addr) != space || nld.predicate.map(|p| p.mask) != leader_mask {
            continue;
        }
        if let Some(p) = nld.predicate
            && !fn_ir.available_before(p.pass_through, leader)
        {
            trace!(next, "pass-through not available at the leader");
            continue;
        }
        let nty = &fn_ir.values[next].ty;
        let Some(ns) = mergeable_scalar(cx.dl, nty) else {
            continue;
        };
        if !cx.dl.same_size(ns, scalar) {
            continue;
        }
        let Some(proof) = cx.offsets.offset_between(fn_ir, ld.addr, nld.addr) else {
            trace!(leader, next, "no constant offset");
            continue;
        };
        if proof.source == OffsetSource::Decomposition && proof.leader_constant < 0 && !cx.cfg.allow_neg_sym_load {
            trace!(leader, next, "negative symbolic leader offset");
            continue;
        }
        let off = proof.offset;
        let nsize = cx.dl.store_size(nty);
        let end = off + nsize as i64;
        if members.iter().any(|m| off < m.end() && m.offset < end) {
            trace!(leader, next, "overlaps an accepted access");
            break;
        }
        if off.rem_euclid(scalar_size as i64) != 0 {
            continue;
        }
        let (new_lo, new_hi) = (lo.min(off), hi.max(end));
        let span = (new_hi - new_lo) as u64;
        if span % scalar_size != 0 || span / scalar_size > max_len as u64 {
            continue;
        }

        checklist.pop();
        if !is_safe_to_merge_load(fn_ir, cx.dl, cx.oracles.alias, next, &checklist) {
            trace!(leader, next, "may be clobbered before the leader");
            break;
        }
        lo = new_lo;
        hi = new_hi;
        members.push(Member {
            inst: next,
            offset: off,
            slot: j,
            lanes: nty.lanes(),
            size: nsize,
            align: nld.align,
        });
    }

    if members.len() < 2 {
        return Ok(false);
    }
    let Some((keep, _)) = trim_to_profitable(&members, scalar_size, &profit) else {
        trace!(leader, members = members.len(), "no profitable length");
        return Ok(false);
    };
    members.truncate(keep);
    members.sort_by_key(|m| m.offset);
    if !alignment_guard(&mut members, uniform) {
        trace!(leader, "rejected by the alignment guard");
        return Ok(false);
    }
    let num = (footprint(&members) / scalar_size) as u32;
    if !profit.contains(&num) {
        return Ok(false);
    }
    if !cx.budget.take_load() {
        trace!(leader, "load merge budget exhausted");
        return Ok(false);
    }

    let first = members[0];
    // The guard may drop the leader; the merged load then takes the slot of
    // the earliest access it replaces.
    let Some(anchor) = members.iter().copied().min_by_key(|m| m.slot) else {
        return Ok(false);
    };
    let invariant = members
        .iter()
        .all(|m| fn_ir.load_info(m.inst).is_some_and(|l| l.invariant));
    let in_bounds = match &fn_ir.values[fn_ir.access_addr(first.inst).unwrap_or(ld.addr)].kind {
        ValueKind::Index { in_bounds, .. } => *in_bounds,
        _ => false,
    };
    let ptr_bits = cx.dl.pointer(space).register_bits as u16;

    let mut replacements: Vec<(ValueId, ValueId)> = Vec::with_capacity(members.len());
    let wide = {
        let mut b = Builder::before(fn_ir, anchor.inst);
        let addr = if first.offset == 0 {
            ld.addr
        } else {
            let k = b.iconst(first.offset / scalar_size as i64, ptr_bits);
            b.index(
                ld.addr,
                vec![IndexStep::Elem {
                    index: k,
                    elem_size: scalar_size,
                }],
                in_bounds,
            )
        };
        let predicate = match ld.predicate {
            Some(p) => {
                let mut parts = Vec::with_capacity(members.len());
                for m in &members {
                    if let Some(mp) = b.fn_ir.load_info(m.inst).and_then(|l| l.predicate) {
                        parts.push((mp.pass_through, ((m.offset - first.offset) as u64 / scalar_size) as u32));
                    }
                }
                let pass_through = pack_lanes(&mut b, cx.dl, scalar, num, &parts)?;
                Some(LoadPredicate {
                    mask: p.mask,
                    pass_through,
                })
            }
            None => None,
        };
        let wide = b.load_with(
            LoadInfo {
                addr,
                access: Access::Simple,
                align: first.align,
                predicate,
                invariant,
            },
            Ty::vector(scalar, num),
        );
        for m in &members {
            let pos = ((m.offset - first.offset) as u64 / scalar_size) as u32;
            if pos + m.lanes > num {
                continue;
            }
            let ty = b.fn_ir.values[m.inst].ty.clone();
            let v = unpack_lanes(&mut b, cx.dl, wide, pos, &ty)?;
            replacements.push((m.inst, v));
        }
        wide
    };
    ice_ensure!(
        fn_ir.is_placed(wide),
        Stage::Merge,
        "merged load for leader {} was not placed",
        leader
    );

    let mut erased = 0usize;
    for (old, new) in replacements {
        fn_ir.replace_all_uses(old, new);
        if fn_ir.use_count(old) != 0 {
            continue;
        }
        let addr = fn_ir.access_addr(old);
        fn_ir.erase(old);
        if let Some(a) = addr {
            fn_ir.delete_trivially_dead(a);
        }
        if let Some(m) = members.iter().find(|m| m.inst == old) {
            refs[m.slot].inst = None;
        }
        erased += 1;
    }
    ice_ensure!(
        refs[anchor.slot].inst.is_none(),
        Stage::Merge,
        "access {} survived its merge into {}",
        anchor.inst,
        wide
    );
    refs[anchor.slot].inst = Some(wide);
    cx.offsets.reset();

    stats.loads_merged += 1;
    stats.accesses_removed += erased.saturating_sub(1);
    debug!(
        function = %fn_ir.name,
        leader,
        members = members.len(),
        lanes = num,
        scalar = %scalar,
        "merged loads"
    );
    Ok(true)
}
