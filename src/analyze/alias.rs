use crate::analyze::{AliasOracle, AliasResult, KnownBits, MemLoc};
use crate::coalesce::algebra::ExprArena;
use crate::coalesce::decompose::decompose_pointer;
use crate::config::TargetConfig;
use crate::ir::*;
use crate::utils::sign_truncate;

/// Structural alias analysis over address expressions.
///
/// Answers NoAlias when two footprints provably do not overlap: disjoint
/// address spaces, a constant distance larger than the footprints, a
/// common stride that keeps them apart, or distinct restrict parameters.
#[derive(Debug, Clone, Copy)]
pub struct BasicAlias<'a> {
    dl: &'a DataLayout,
    target: &'a TargetConfig,
}

fn ranges_disjoint(d: i64, sa: u64, sb: u64) -> bool {
    // b starts at a + d
    (d >= 0 && d as u64 >= sa) || (d < 0 && d.unsigned_abs() >= sb)
}

impl<'a> BasicAlias<'a> {
    pub fn new(dl: &'a DataLayout, target: &'a TargetConfig) -> Self {
        Self { dl, target }
    }

    fn restrict_param(fn_ir: &FnIR, v: ValueId) -> bool {
        match fn_ir.values[v].kind {
            ValueKind::Param { index } => fn_ir.params.get(index).is_some_and(|p| p.restrict),
            _ => false,
        }
    }

    fn alias_addrs(&self, fn_ir: &FnIR, a: ValueId, b: ValueId, sa: Option<u64>, sb: Option<u64>) -> AliasResult {
        let (space_a, space_b) = (fn_ir.addr_space(a), fn_ir.addr_space(b));
        if space_a != space_b {
            if self.target.spaces_disjoint(space_a, space_b) {
                return AliasResult::NoAlias;
            }
            return AliasResult::MayAlias;
        }
        let ptr_bits = self.dl.pointer(space_a).register_bits;
        let sized = sa.zip(sb);

        let mut arena = ExprArena::new();
        let ea = arena.canonicalize(fn_ir, self.dl, &KnownBits, a);
        let eb = arena.canonicalize(fn_ir, self.dl, &KnownBits, b);
        let diff = arena.get(eb).negate_and_add(arena.get(ea));
        if let Some(d) = diff.as_constant() {
            let d = sign_truncate(d, ptr_bits);
            return match sized {
                Some((sa, sb)) if ranges_disjoint(d, sa, sb) => AliasResult::NoAlias,
                _ => AliasResult::MayAlias,
            };
        }
        // Same residue class modulo a power-of-two stride.
        if let Some((sa, sb)) = sized
            && let Some(stride) = diff.coeff_stride()
            && (ptr_bits >= 64 || stride <= 1u64 << ptr_bits)
        {
            let r = diff.constant.rem_euclid(stride as i64) as u64;
            if sa <= r && r + sb <= stride {
                return AliasResult::NoAlias;
            }
        }

        let da = decompose_pointer(fn_ir, self.dl, &KnownBits, a);
        let db = decompose_pointer(fn_ir, self.dl, &KnownBits, b);
        if let (Some(da), Some(db)) = (da, db) {
            if let Some(d) = db.constant_offset_from(&da) {
                let d = sign_truncate(d, ptr_bits);
                return match sized {
                    Some((sa, sb)) if ranges_disjoint(d, sa, sb) => AliasResult::NoAlias,
                    _ => AliasResult::MayAlias,
                };
            }
            if let (Some(ba), Some(bb)) = (da.base, db.base)
                && ba != bb
                && Self::restrict_param(fn_ir, ba)
                && Self::restrict_param(fn_ir, bb)
            {
                return AliasResult::NoAlias;
            }
        }
        AliasResult::MayAlias
    }
}

impl AliasOracle for BasicAlias<'_> {
    fn alias(&self, fn_ir: &FnIR, a: MemLoc, b: MemLoc) -> AliasResult {
        match (a.addr, b.addr) {
            (Some(pa), Some(pb)) => self.alias_addrs(fn_ir, pa, pb, a.size, b.size),
            _ => AliasResult::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(addr: ValueId, size: u64) -> MemLoc {
        MemLoc {
            addr: Some(addr),
            size: Some(size),
        }
    }

    #[test]
    fn constant_distance_and_restrict_params() {
        let mut f = FnIR::new("alias");
        let bb = f.add_block();
        let p = f.add_param("p", Ty::ptr(1), true, false);
        let q = f.add_param("q", Ty::ptr(1), true, false);
        let r = f.add_param("r", Ty::ptr(1), false, false);
        let i = f.add_param("i", Ty::int(64), false, false);
        let (a0, a1, qa) = {
            let mut b = Builder::at_end(&mut f, bb);
            let a0 = b.elem_addr(p, i, 4);
            let one = b.iconst(1, 64);
            let i1 = b.add(i, one);
            let a1 = b.elem_addr(p, i1, 4);
            let qa = b.elem_addr(q, i, 4);
            (a0, a1, qa)
        };
        let dl = DataLayout::default();
        let target = TargetConfig::default();
        let aa = BasicAlias::new(&dl, &target);
        assert_eq!(aa.alias(&f, loc(a0, 4), loc(a1, 4)), AliasResult::NoAlias);
        assert_eq!(aa.alias(&f, loc(a0, 8), loc(a1, 4)), AliasResult::MayAlias);
        assert_eq!(aa.alias(&f, loc(a0, 4), loc(qa, 4)), AliasResult::NoAlias);
        assert_eq!(aa.alias(&f, loc(a0, 4), loc(r, 4)), AliasResult::MayAlias);
        assert_eq!(aa.alias(&f, MemLoc::UNKNOWN, loc(r, 4)), AliasResult::Unknown);
    }

    #[test]
    fn interleaved_stride_is_disjoint() {
        let mut f = FnIR::new("stride");
        let bb = f.add_block();
        let p = f.add_param("p", Ty::ptr(1), false, false);
        let i = f.add_param("i", Ty::int(64), false, false);
        let j = f.add_param("j", Ty::int(64), false, false);
        let (even, odd) = {
            let mut b = Builder::at_end(&mut f, bb);
            let two = b.iconst(2, 64);
            let i2 = b.binary(BinOp::Mul, i, two, Wrap::NONE);
            let j2 = b.binary(BinOp::Mul, j, two, Wrap::NONE);
            let one = b.iconst(1, 64);
            let j21 = b.add(j2, one);
            (b.elem_addr(p, i2, 4), b.elem_addr(p, j21, 4))
        };
        let dl = DataLayout::default();
        let target = TargetConfig::default();
        let aa = BasicAlias::new(&dl, &target);
        assert_eq!(aa.alias(&f, loc(even, 4), loc(odd, 4)), AliasResult::NoAlias);
        assert_eq!(aa.alias(&f, loc(even, 8), loc(odd, 4)), AliasResult::MayAlias);
    }
}
