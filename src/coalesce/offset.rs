use crate::analyze::Oracles;
use crate::coalesce::algebra::{ExprArena, is_offset_by_constant};
use crate::coalesce::decompose::{AddressDecomposition, decompose_pointer};
use crate::ir::*;
use crate::utils::sign_truncate;
use rustc_hash::FxHashMap;

/// Which prover produced an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetSource {
    Induction,
    Algebra,
    Decomposition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetProof {
    /// `addr - leader_addr` in bytes, truncated to the pointer width.
    pub offset: i64,
    pub source: OffsetSource,
    /// Constant part of the leader address under the proving representation.
    pub leader_constant: i64,
}

/// Answers "constant byte distance between two addresses": the induction
/// oracle first, then the algebra engine, then pointer decomposition.
///
/// Results are cached per function. Call [`OffsetEngine::reset`] after
/// every IR rewrite.
pub struct OffsetEngine<'a> {
    dl: &'a DataLayout,
    oracles: Oracles<'a>,
    arena: ExprArena,
    decomps: FxHashMap<ValueId, Option<AddressDecomposition>>,
}

impl<'a> OffsetEngine<'a> {
    pub fn new(dl: &'a DataLayout, oracles: Oracles<'a>) -> Self {
        Self {
            dl,
            oracles,
            arena: ExprArena::new(),
            decomps: FxHashMap::default(),
        }
    }

    pub fn reset(&mut self) {
        self.arena.reset();
        self.decomps.clear();
    }

    fn decomposition(&mut self, fn_ir: &FnIR, addr: ValueId) -> Option<AddressDecomposition> {
        if let Some(d) = self.decomps.get(&addr) {
            return d.clone();
        }
        let d = decompose_pointer(fn_ir, self.dl, self.oracles.known_bits, addr);
        self.decomps.insert(addr, d.clone());
        d
    }

    pub fn offset_between(
        &mut self,
        fn_ir: &FnIR,
        leader_addr: ValueId,
        addr: ValueId,
    ) -> Option<OffsetProof> {
        let space = fn_ir.addr_space(leader_addr);
        if space != fn_ir.addr_space(addr) {
            return None;
        }
        let bits = self.dl.pointer(space).register_bits;

        if let Some(off) = self.oracles.induction.offset_between(fn_ir, leader_addr, addr) {
            return Some(OffsetProof {
                offset: sign_truncate(off, bits),
                source: OffsetSource::Induction,
                leader_constant: 0,
            });
        }

        let kb = self.oracles.known_bits;
        let ea = self.arena.canonicalize(fn_ir, self.dl, kb, leader_addr);
        let eb = self.arena.canonicalize(fn_ir, self.dl, kb, addr);
        let (a, b) = (self.arena.get(ea), self.arena.get(eb));
        if let Some(off) = is_offset_by_constant(a, b) {
            return Some(OffsetProof {
                offset: sign_truncate(off, bits),
                source: OffsetSource::Algebra,
                leader_constant: a.constant,
            });
        }

        let da = self.decomposition(fn_ir, leader_addr)?;
        let db = self.decomposition(fn_ir, addr)?;
        let off = db.constant_offset_from(&da)?;
        Some(OffsetProof {
            offset: sign_truncate(off, bits),
            source: OffsetSource::Decomposition,
            leader_constant: da.offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::{AffineChains, BasicAlias, KnownBits, UniformityInfo};
    use crate::config::TargetConfig;

    #[test]
    fn prefers_induction_then_algebra() {
        let mut f = FnIR::new("offsets");
        let bb = f.add_block();
        let p = f.add_param("p", Ty::ptr(3), false, false);
        let i = f.add_param("i", Ty::int(32), false, false);
        let (a, b, c, d) = {
            let mut bld = Builder::at_end(&mut f, bb);
            let four = bld.iconst(4, 32);
            let a = bld.elem_addr(p, four, 1);
            let eight = bld.iconst(8, 32);
            let b = bld.elem_addr(p, eight, 1);
            let c = bld.elem_addr(p, i, 4);
            let one = bld.iconst(1, 32);
            let i1 = bld.binary(BinOp::Add, i, one, Wrap::NSW);
            let d = bld.elem_addr(p, i1, 4);
            (a, b, c, d)
        };
        let dl = DataLayout::default();
        let target = TargetConfig::default();
        let alias = BasicAlias::new(&dl, &target);
        let uni = UniformityInfo::compute(&f);
        let oracles = Oracles {
            alias: &alias,
            induction: &AffineChains,
            known_bits: &KnownBits,
            uniform: &uni,
        };
        let mut engine = OffsetEngine::new(&dl, oracles);
        let ab = engine.offset_between(&f, a, b).expect("constant chain");
        assert_eq!((ab.offset, ab.source), (4, OffsetSource::Induction));
        let cd = engine.offset_between(&f, c, d).expect("shared symbol");
        assert_eq!((cd.offset, cd.source), (4, OffsetSource::Algebra));
        assert_eq!(engine.offset_between(&f, a, d), None);
    }
}
