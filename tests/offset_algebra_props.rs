//! Property tests for the constant-offset prover.
//!
//! Addresses are built from random affine index expressions over a few
//! 64-bit parameters. Whenever the prover claims a constant distance, the
//! interpreter must observe exactly that distance for arbitrary arguments.

use memcoal::analyze::{AffineChains, BasicAlias, KnownBits, Oracles, UniformityInfo};
use memcoal::coalesce::offset::OffsetEngine;
use memcoal::ir::interp::{Interpreter, Memory};
use memcoal::ir::*;
use memcoal::TargetConfig;
use proptest::prelude::*;

const NUM_VARS: usize = 3;

// ============================================================================
// Builders
// ============================================================================

/// Emits `sum(coeff * x[var]) + k` as a 64-bit integer, adding terms in
/// the given order.
fn affine(b: &mut Builder<'_>, xs: &[ValueId], terms: &[(usize, i64)], k: i64, reversed: bool) -> ValueId {
    let mut acc = b.iconst(k, 64);
    let order: Vec<&(usize, i64)> = if reversed {
        terms.iter().rev().collect()
    } else {
        terms.iter().collect()
    };
    for &&(var, coeff) in &order {
        let c = b.iconst(coeff, 64);
        let t = b.binary(BinOp::Mul, xs[var], c, Wrap::NONE);
        acc = if reversed {
            b.binary(BinOp::Add, t, acc, Wrap::NONE)
        } else {
            b.binary(BinOp::Add, acc, t, Wrap::NONE)
        };
    }
    acc
}

struct Case {
    f: FnIR,
    a: ValueId,
    b: ValueId,
}

/// Two addresses off the same base plus a returned `b - a` as an integer.
fn build(terms: &[(usize, i64)], k1: i64, k2: i64, extra: Option<(usize, i64)>, elem: u64) -> Case {
    let mut f = FnIR::new("offsets");
    let bb = f.add_block();
    let p = f.add_param("p", Ty::ptr(1), false, false);
    let xs: Vec<ValueId> = (0..NUM_VARS)
        .map(|i| f.add_param(format!("x{i}"), Ty::int(64), false, false))
        .collect();
    let (a, b, diff) = {
        let mut bld = Builder::at_end(&mut f, bb);
        let ia = affine(&mut bld, &xs, terms, k1, false);
        let mut tb: Vec<(usize, i64)> = terms.to_vec();
        if let Some(t) = extra {
            tb.push(t);
        }
        let ib = affine(&mut bld, &xs, &tb, k2, true);
        let a = bld.elem_addr(p, ia, elem);
        let b = bld.elem_addr(p, ib, elem);
        let ai = bld.cast(CastOp::PtrToInt, a, Ty::int(64));
        let bi = bld.cast(CastOp::PtrToInt, b, Ty::int(64));
        let diff = bld.binary(BinOp::Sub, bi, ai, Wrap::NONE);
        (a, b, diff)
    };
    f.blocks[bb].term = Terminator::Return(Some(diff));
    Case { f, a, b }
}

fn prove(f: &FnIR, a: ValueId, b: ValueId) -> Option<i64> {
    let dl = DataLayout::default();
    let target = TargetConfig::default();
    let alias = BasicAlias::new(&dl, &target);
    let uniform = UniformityInfo::compute(f);
    let oracles = Oracles {
        alias: &alias,
        induction: &AffineChains,
        known_bits: &KnownBits,
        uniform: &uniform,
    };
    OffsetEngine::new(&dl, oracles)
        .offset_between(f, a, b)
        .map(|p| p.offset)
}

fn observed(f: &FnIR, args: &[u64]) -> i64 {
    let dl = DataLayout::default();
    let ret = Interpreter::new(f, &dl)
        .run(args, &mut Memory::default())
        .expect("straight-line code runs")
        .expect("returns the difference");
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&ret[..8]);
    i64::from_le_bytes(buf)
}

// ============================================================================
// Strategies
// ============================================================================

fn terms_strategy() -> impl Strategy<Value = Vec<(usize, i64)>> {
    prop::collection::vec((0..NUM_VARS, -16i64..16), 0..5)
}

fn args_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(any::<u64>(), NUM_VARS)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Reordered but equal symbolic parts differ by exactly the constants.
    #[test]
    fn equal_symbolic_parts_give_the_constant_distance(
        terms in terms_strategy(),
        k1 in -1000i64..1000,
        k2 in -1000i64..1000,
        elem in prop::sample::select(vec![1u64, 2, 4, 8]),
        args in args_strategy(),
    ) {
        let case = build(&terms, k1, k2, None, elem);
        let proved = prove(&case.f, case.a, case.b);
        prop_assert_eq!(proved, Some((k2 - k1) * elem as i64));

        let mut full = vec![0x1000u64];
        full.extend(args);
        prop_assert_eq!(observed(&case.f, &full), (k2 - k1) * elem as i64);
    }

    /// Any claimed distance matches what execution observes.
    #[test]
    fn claimed_distances_are_sound(
        terms in terms_strategy(),
        k1 in -1000i64..1000,
        k2 in -1000i64..1000,
        extra in (0..NUM_VARS, -4i64..4),
        args in args_strategy(),
    ) {
        let case = build(&terms, k1, k2, Some(extra), 4);
        let mut full = vec![0x2000u64];
        full.extend(args);
        if let Some(d) = prove(&case.f, case.a, case.b) {
            prop_assert_eq!(observed(&case.f, &full), d);
        }
    }

    /// A leftover variable term is never mistaken for a constant.
    #[test]
    fn extra_variable_term_is_not_constant(
        terms in terms_strategy(),
        k in -1000i64..1000,
        var in 0..NUM_VARS,
        coeff in prop::sample::select(vec![-3i64, -1, 1, 2, 5]),
    ) {
        let case = build(&terms, k, k, Some((var, coeff)), 4);
        prop_assert_eq!(prove(&case.f, case.a, case.b), None);
    }
}
