use crate::analyze::{AliasOracle, MemLoc};
use crate::ir::*;

/// A load may move up past every instruction in `checklist` unless one of
/// them might write its bytes.
pub fn is_safe_to_merge_load(
    fn_ir: &FnIR,
    dl: &DataLayout,
    alias: &dyn AliasOracle,
    load: ValueId,
    checklist: &[ValueId],
) -> bool {
    let a = MemLoc::of(fn_ir, dl, load);
    checklist.iter().all(|&i| {
        if !fn_ir.values[i].kind.may_write_memory() {
            return true;
        }
        let b = MemLoc::of(fn_ir, dl, i);
        a.addr.is_some() && b.addr.is_some() && alias.alias(fn_ir, a, b).is_no_alias()
    })
}

/// Stores sink to the tail past `checklist`; any read or write there that
/// may touch one of them blocks the merge. Invariant loads never observe
/// the stores.
pub fn is_safe_to_merge_stores(
    fn_ir: &FnIR,
    dl: &DataLayout,
    alias: &dyn AliasOracle,
    stores: &[ValueId],
    checklist: &[ValueId],
) -> bool {
    checklist.iter().all(|&i| {
        if fn_ir.load_info(i).is_some_and(|ld| ld.invariant) {
            return true;
        }
        let a = MemLoc::of(fn_ir, dl, i);
        stores.iter().all(|&s| {
            let b = MemLoc::of(fn_ir, dl, s);
            a.addr.is_some() && b.addr.is_some() && alias.alias(fn_ir, a, b).is_no_alias()
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::BasicAlias;
    use crate::config::TargetConfig;

    #[test]
    fn loads_ignore_readers_and_stores_ignore_invariant_loads() {
        let mut f = FnIR::new("safety");
        let bb = f.add_block();
        let p = f.add_param("p", Ty::ptr(1), false, false);
        let (l0, l1, s0, inv, fence) = {
            let mut b = Builder::at_end(&mut f, bb);
            let l0 = b.load(p, Ty::int(32), 4);
            let four = b.iconst(4, 64);
            let a4 = b.elem_addr(p, four, 1);
            let l1 = b.load(a4, Ty::int(32), 4);
            let s0 = b.store(a4, l0, 4);
            let inv = b.load_with(
                LoadInfo {
                    addr: a4,
                    access: Access::Simple,
                    align: 4,
                    predicate: None,
                    invariant: true,
                },
                Ty::int(32),
            );
            let fence = b.fence();
            (l0, l1, s0, inv, fence)
        };
        let dl = DataLayout::default();
        let target = TargetConfig::default();
        let aa = BasicAlias::new(&dl, &target);

        assert!(is_safe_to_merge_load(&f, &dl, &aa, l1, &[l0]));
        assert!(is_safe_to_merge_load(&f, &dl, &aa, l0, &[s0]));
        assert!(!is_safe_to_merge_load(&f, &dl, &aa, l1, &[s0]));
        assert!(!is_safe_to_merge_load(&f, &dl, &aa, l0, &[fence]));

        assert!(is_safe_to_merge_stores(&f, &dl, &aa, &[s0], &[inv]));
        assert!(!is_safe_to_merge_stores(&f, &dl, &aa, &[s0], &[l1]));
        assert!(is_safe_to_merge_stores(&f, &dl, &aa, &[s0], &[l0]));
    }
}
