use crate::config::TargetConfig;
use crate::ir::*;
use rustc_hash::FxHashSet;

/// Phi/select fan-in at which a leader address is considered too costly
/// to reason about.
pub const MAX_PHI_SELECT_CHAIN: usize = 300;

/// One memory-touching instruction of a block and its position. Merged
/// members are cleared to `None` in place so positions stay valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRef {
    pub inst: Option<ValueId>,
    pub distance: usize,
}

fn is_irrelevant(fn_ir: &FnIR, target: &TargetConfig, v: ValueId) -> bool {
    let kind = &fn_ir.values[v].kind;
    if !kind.may_read_or_write_memory() {
        return true;
    }
    match fn_ir.access_addr(v) {
        Some(addr) => target.is_read_only(fn_ir.addr_space(addr)),
        None => false,
    }
}

/// Memory operations of `bb` in program order. Debug markers do not count
/// toward the distance; every other instruction does.
pub fn collect_mem_refs(fn_ir: &FnIR, bb: BlockId, target: &TargetConfig) -> Vec<MemRef> {
    let mut refs = Vec::new();
    let mut distance = 0usize;
    for &v in &fn_ir.blocks[bb].instrs {
        if matches!(fn_ir.values[v].kind, ValueKind::DebugMarker) {
            continue;
        }
        if !is_irrelevant(fn_ir, target, v) {
            refs.push(MemRef {
                inst: Some(v),
                distance,
            });
        }
        distance += 1;
    }
    refs
}

/// True when `addr` reaches at least `MAX_PHI_SELECT_CHAIN` phi or select
/// nodes through address-forming operands.
pub fn chain_too_large(fn_ir: &FnIR, addr: ValueId) -> bool {
    let mut seen: FxHashSet<ValueId> = FxHashSet::default();
    let mut work = vec![addr];
    let mut count = 0usize;
    while let Some(v) = work.pop() {
        if !seen.insert(v) {
            continue;
        }
        match &fn_ir.values[v].kind {
            ValueKind::Phi { args } => {
                count += 1;
                work.extend(args.iter().map(|(a, _)| *a));
            }
            ValueKind::Select {
                then_val, else_val, ..
            } => {
                count += 1;
                work.push(*then_val);
                work.push(*else_val);
            }
            ValueKind::Index { base, .. } => work.push(*base),
            ValueKind::Cast { src, .. } | ValueKind::IntToAddr { src } => work.push(*src),
            _ => {}
        }
        if count >= MAX_PHI_SELECT_CHAIN {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_skips_debug_markers_and_read_only_spaces() {
        let mut f = FnIR::new("scan");
        let bb = f.add_block();
        let p = f.add_param("p", Ty::ptr(1), false, false);
        let c = f.add_param("c", Ty::ptr(2), false, true);
        let (l0, l1, call) = {
            let mut b = Builder::at_end(&mut f, bb);
            let l0 = b.load(p, Ty::int(32), 4);
            b.debug_marker();
            let _k = b.load(c, Ty::int(32), 4);
            let x = b.lane_id();
            let l1 = b.load(p, Ty::int(32), 4);
            let call = b.call("barrier", vec![x], MemEffect::ReadWrite, Ty::Void);
            (l0, l1, call)
        };
        let mut target = TargetConfig::default();
        target.read_only_spaces.insert(2);
        let refs = collect_mem_refs(&f, bb, &target);
        let got: Vec<_> = refs.iter().map(|m| (m.inst, m.distance)).collect();
        assert_eq!(got, vec![(Some(l0), 0), (Some(l1), 3), (Some(call), 4)]);
    }

    #[test]
    fn wide_select_fan_in_is_too_large() {
        let mut f = FnIR::new("chain");
        let bb = f.add_block();
        let p = f.add_param("p", Ty::ptr(1), false, false);
        let q = f.add_param("q", Ty::ptr(1), false, false);
        let cond = f.add_param("c", Ty::int(1), false, false);
        let small = {
            let mut b = Builder::at_end(&mut f, bb);
            b.emit(
                ValueKind::Select {
                    cond,
                    then_val: p,
                    else_val: q,
                },
                Ty::ptr(1),
            )
        };
        assert!(!chain_too_large(&f, small));

        let mut cur = small;
        for _ in 0..MAX_PHI_SELECT_CHAIN {
            cur = Builder::at_end(&mut f, bb).emit(
                ValueKind::Select {
                    cond,
                    then_val: cur,
                    else_val: q,
                },
                Ty::ptr(1),
            );
        }
        assert!(chain_too_large(&f, cur));
    }
}
