use crate::analyze::InductionOracle;
use crate::ir::*;
use crate::utils::sign_truncate;

const MAX_CHAIN: usize = 32;

/// Follows constant-stride chains (`x + C`, `x - C`, constant indexed
/// steps, no-op casts) back to a root and compares the accumulated
/// constants. Two addresses with the same root differ by a constant.
#[derive(Debug, Clone, Copy, Default)]
pub struct AffineChains;

impl AffineChains {
    pub fn root_and_offset(&self, fn_ir: &FnIR, mut v: ValueId) -> (ValueId, i64) {
        let mut off = 0i64;
        for _ in 0..MAX_CHAIN {
            match &fn_ir.values[v].kind {
                ValueKind::Binary {
                    op: BinOp::Add,
                    lhs,
                    rhs,
                    ..
                } if Self::is_full_width(fn_ir, v) => {
                    if let Some(c) = fn_ir.const_value(*rhs) {
                        off = off.wrapping_add(c);
                        v = *lhs;
                    } else if let Some(c) = fn_ir.const_value(*lhs) {
                        off = off.wrapping_add(c);
                        v = *rhs;
                    } else {
                        break;
                    }
                }
                ValueKind::Binary {
                    op: BinOp::Sub,
                    lhs,
                    rhs,
                    ..
                } if Self::is_full_width(fn_ir, v) => match fn_ir.const_value(*rhs) {
                    Some(c) => {
                        off = off.wrapping_sub(c);
                        v = *lhs;
                    }
                    None => break,
                },
                ValueKind::Index { base, steps, .. } => {
                    let mut step_off = 0i64;
                    for s in steps {
                        match s {
                            IndexStep::Field { offset } => {
                                step_off = step_off.wrapping_add(*offset as i64)
                            }
                            IndexStep::Elem { index, elem_size } => {
                                let Some(c) = fn_ir.const_value(*index) else {
                                    return (v, off);
                                };
                                let bits = match fn_ir.values[*index].ty {
                                    Ty::Scalar(ScalarTy::Int(b)) => b as u32,
                                    _ => 64,
                                };
                                let c = sign_truncate(c, bits);
                                step_off = step_off.wrapping_add(c.wrapping_mul(*elem_size as i64));
                            }
                        }
                    }
                    off = off.wrapping_add(step_off);
                    v = *base;
                }
                ValueKind::Cast {
                    op: CastOp::BitCast,
                    src,
                } => v = *src,
                _ => break,
            }
        }
        (v, off)
    }

    // Only 64-bit integer chains: narrower arithmetic may wrap before the
    // address is formed.
    fn is_full_width(fn_ir: &FnIR, v: ValueId) -> bool {
        matches!(fn_ir.values[v].ty, Ty::Scalar(ScalarTy::Int(64)))
    }
}

impl InductionOracle for AffineChains {
    fn offset_between(&self, fn_ir: &FnIR, a: ValueId, b: ValueId) -> Option<i64> {
        let (ra, oa) = self.root_and_offset(fn_ir, a);
        let (rb, ob) = self.root_and_offset(fn_ir, b);
        (ra == rb).then(|| ob.wrapping_sub(oa))
    }
}
