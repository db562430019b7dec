use crate::analyze::KnownBitsOracle;
use crate::coalesce::algebra::{Extension, MAX_DEPTH, value_bits};
use crate::ir::*;
use crate::utils::{sign_truncate, zero_truncate};

/// Number of pointer-producing steps followed before giving up.
pub const MAX_LOOKUP: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecompTerm {
    pub symbol: ValueId,
    pub ext: Extension,
    pub scale: i64,
}

/// `base + offset + sum(scale * ext(symbol))`. A `None` base is the null
/// address.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddressDecomposition {
    pub base: Option<ValueId>,
    pub offset: i64,
    pub terms: Vec<DecompTerm>,
}

impl AddressDecomposition {
    fn same_terms(&self, other: &Self) -> bool {
        self.terms.len() == other.terms.len()
            && self.terms.iter().all(|t| other.terms.contains(t))
    }

    /// Byte distance `self - leader` when both share base and terms.
    pub fn constant_offset_from(&self, leader: &Self) -> Option<i64> {
        (self.base == leader.base && self.same_terms(leader))
            .then(|| self.offset.wrapping_sub(leader.offset))
    }

    fn push_term(&mut self, symbol: ValueId, ext: Extension, scale: i64, ptr_bits: u32) {
        let mut scale = scale;
        if let Some(pos) = self
            .terms
            .iter()
            .position(|t| t.symbol == symbol && t.ext == ext)
        {
            scale = scale.wrapping_add(self.terms.remove(pos).scale);
        }
        let scale = sign_truncate(scale, ptr_bits);
        if scale != 0 {
            self.terms.push(DecompTerm { symbol, ext, scale });
        }
    }
}

/// `scale * ext(symbol) + offset` in the value's own width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearExpr {
    pub symbol: ValueId,
    pub scale: i64,
    pub offset: i64,
}

/// Peels constant add/or/mul/shl and sign/zero extensions off `v`. `ext`
/// may only move away from `Extension::None`; a conflicting cast ends the
/// walk. Results are sign-normalized to `width`.
pub fn linear_expression(
    fn_ir: &FnIR,
    kb: &dyn KnownBitsOracle,
    v: ValueId,
    width: u32,
    ext: &mut Extension,
    depth: u32,
) -> LinearExpr {
    let leaf = LinearExpr {
        symbol: v,
        scale: 1,
        offset: 0,
    };
    if depth >= MAX_DEPTH {
        return leaf;
    }
    let norm = |x: i64| sign_truncate(x, width);

    match &fn_ir.values[v].kind {
        ValueKind::Binary {
            op,
            lhs,
            rhs,
            wrap,
        } => {
            let Some(c) = fn_ir.const_value(*rhs) else {
                return leaf;
            };
            let c = norm(c);
            let no_wrap = match *ext {
                Extension::None => true,
                Extension::Sign => wrap.nsw,
                Extension::Zero => wrap.nuw,
            };
            match op {
                BinOp::Or if kb.known_zero(fn_ir, *lhs, zero_truncate(c, width)) => {
                    let e = linear_expression(fn_ir, kb, *lhs, width, ext, depth + 1);
                    LinearExpr {
                        offset: norm(e.offset.wrapping_add(c)),
                        ..e
                    }
                }
                BinOp::Add if no_wrap => {
                    let e = linear_expression(fn_ir, kb, *lhs, width, ext, depth + 1);
                    LinearExpr {
                        offset: norm(e.offset.wrapping_add(c)),
                        ..e
                    }
                }
                BinOp::Mul if no_wrap => {
                    let e = linear_expression(fn_ir, kb, *lhs, width, ext, depth + 1);
                    LinearExpr {
                        symbol: e.symbol,
                        scale: norm(e.scale.wrapping_mul(c)),
                        offset: norm(e.offset.wrapping_mul(c)),
                    }
                }
                BinOp::Shl if no_wrap && (0..width.min(63) as i64).contains(&c) => {
                    let e = linear_expression(fn_ir, kb, *lhs, width, ext, depth + 1);
                    LinearExpr {
                        symbol: e.symbol,
                        scale: norm(e.scale.wrapping_shl(c as u32)),
                        offset: norm(e.offset.wrapping_shl(c as u32)),
                    }
                }
                _ => leaf,
            }
        }
        ValueKind::Cast {
            op: op @ (CastOp::SExt | CastOp::ZExt),
            src,
        } => {
            let Some(small) = fn_ir.values[*src].ty.scalar().and_then(|s| s.int_bits()) else {
                return leaf;
            };
            let small = small as u32;
            let want = if *op == CastOp::SExt {
                Extension::Sign
            } else {
                Extension::Zero
            };
            if *ext != Extension::None && *ext != want {
                return leaf;
            }
            *ext = want;
            let e = linear_expression(fn_ir, kb, *src, small, ext, depth + 1);
            LinearExpr {
                symbol: e.symbol,
                scale: norm(want.apply(e.scale, small)),
                offset: norm(want.apply(e.offset, small)),
            }
        }
        _ => leaf,
    }
}

fn int_width(fn_ir: &FnIR, v: ValueId) -> u32 {
    match fn_ir.values[v].ty {
        Ty::Scalar(ScalarTy::Int(b)) => b as u32,
        _ => 64,
    }
}

/// Adds `elem_size * index` to `d`, where `index` is `width` bits wide and
/// widened to the pointer with `widen` when narrower.
fn push_linear(
    fn_ir: &FnIR,
    kb: &dyn KnownBitsOracle,
    d: &mut AddressDecomposition,
    index: ValueId,
    elem_size: i64,
    ptr_bits: u32,
    widen: Extension,
) {
    let width = int_width(fn_ir, index);
    let top = if ptr_bits > width {
        widen
    } else {
        Extension::None
    };
    let mut ext = top;
    let e = linear_expression(fn_ir, kb, index, width, &mut ext, 0);
    let (scale, offset) = (top.apply(e.scale, width), top.apply(e.offset, width));
    d.offset = d.offset.wrapping_add(offset.wrapping_mul(elem_size));
    d.push_term(e.symbol, ext, scale.wrapping_mul(elem_size), ptr_bits);
}

/// Splits an address into base, constant offset and scaled symbolic
/// indices. Gives up (`None`) when the chain is longer than `MAX_LOOKUP`.
pub fn decompose_pointer(
    fn_ir: &FnIR,
    dl: &DataLayout,
    kb: &dyn KnownBitsOracle,
    ptr: ValueId,
) -> Option<AddressDecomposition> {
    let mut d = AddressDecomposition::default();
    let mut ptr = ptr;
    for _ in 0..MAX_LOOKUP {
        let ptr_bits = value_bits(fn_ir, dl, ptr);
        match &fn_ir.values[ptr].kind {
            ValueKind::Cast {
                op: CastOp::BitCast | CastOp::AddrSpaceCast,
                src,
            } if fn_ir.values[*src].ty.scalar().is_some_and(|s| s.is_ptr())
                && value_bits(fn_ir, dl, *src) == ptr_bits =>
            {
                ptr = *src;
            }
            ValueKind::Index { base, steps, .. } => {
                for s in steps {
                    match *s {
                        IndexStep::Field { offset } => {
                            d.offset = d.offset.wrapping_add(offset as i64);
                        }
                        IndexStep::Elem { index, elem_size } => {
                            let size = elem_size as i64;
                            let width = int_width(fn_ir, index);
                            if let Some(c) = fn_ir.const_value(index) {
                                let c = sign_truncate(c, width);
                                d.offset = d.offset.wrapping_add(c.wrapping_mul(size));
                                continue;
                            }
                            // A narrow add is split only when it cannot wrap.
                            match fn_ir.values[index].kind {
                                ValueKind::Binary {
                                    op: BinOp::Add,
                                    lhs,
                                    rhs,
                                    wrap,
                                } if fn_ir.const_value(rhs).is_none()
                                    && (width >= ptr_bits || wrap.nsw) =>
                                {
                                    for part in [lhs, rhs] {
                                        push_linear(
                                            fn_ir,
                                            kb,
                                            &mut d,
                                            part,
                                            size,
                                            ptr_bits,
                                            Extension::Sign,
                                        );
                                    }
                                }
                                _ => push_linear(
                                    fn_ir,
                                    kb,
                                    &mut d,
                                    index,
                                    size,
                                    ptr_bits,
                                    Extension::Sign,
                                ),
                            }
                        }
                    }
                }
                ptr = *base;
            }
            ValueKind::IntToAddr { src } => {
                let src = *src;
                let width = int_width(fn_ir, src);
                if let Some(c) = fn_ir.const_value(src) {
                    let c = if width < ptr_bits {
                        zero_truncate(c, width) as i64
                    } else {
                        c
                    };
                    d.offset = d.offset.wrapping_add(c);
                    d.base = None;
                    return Some(d);
                }
                let (base, rest) = match fn_ir.values[src].kind {
                    ValueKind::Binary {
                        op: BinOp::Add,
                        lhs,
                        rhs,
                        wrap,
                    } if fn_ir.const_value(rhs).is_none() && (width >= ptr_bits || wrap.nuw) => {
                        (Some(lhs), rhs)
                    }
                    _ => (None, src),
                };
                push_linear(fn_ir, kb, &mut d, rest, 1, ptr_bits, Extension::Zero);
                d.base = base;
                return Some(d);
            }
            ValueKind::NullAddr => {
                d.base = None;
                return Some(d);
            }
            _ => {
                d.base = Some(ptr);
                return Some(d);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::KnownBits;

    fn decompose(f: &FnIR, v: ValueId) -> AddressDecomposition {
        decompose_pointer(f, &DataLayout::default(), &KnownBits, v).expect("decomposes")
    }

    #[test]
    fn linear_through_sext_of_nsw_add() {
        let mut f = FnIR::new("lin");
        let bb = f.add_block();
        let i = f.add_param("i", Ty::int(32), false, false);
        let v = {
            let mut b = Builder::at_end(&mut f, bb);
            let three = b.iconst(3, 32);
            let a = b.binary(BinOp::Add, i, three, Wrap::NSW);
            let four = b.iconst(4, 32);
            let m = b.binary(BinOp::Mul, a, four, Wrap::NSW);
            b.cast(CastOp::SExt, m, Ty::int(64))
        };
        let mut ext = Extension::None;
        let e = linear_expression(&f, &KnownBits, v, 64, &mut ext, 0);
        assert_eq!(ext, Extension::Sign);
        assert_eq!(
            e,
            LinearExpr {
                symbol: i,
                scale: 4,
                offset: 12
            }
        );
    }

    #[test]
    fn shared_index_gives_constant_offset() {
        let mut f = FnIR::new("dec");
        let bb = f.add_block();
        let p = f.add_param("p", Ty::ptr(1), false, false);
        let i = f.add_param("i", Ty::int(32), false, false);
        let (a0, a1, a2) = {
            let mut b = Builder::at_end(&mut f, bb);
            let a0 = b.elem_addr(p, i, 4);
            let one = b.iconst(1, 32);
            let i1 = b.binary(BinOp::Add, i, one, Wrap::NSW);
            let a1 = b.elem_addr(p, i1, 4);
            let eight = b.iconst(8, 64);
            let a2 = b.index(
                a0,
                vec![
                    IndexStep::Elem {
                        index: eight,
                        elem_size: 1,
                    },
                    IndexStep::Field { offset: 2 },
                ],
                true,
            );
            (a0, a1, a2)
        };
        let d0 = decompose(&f, a0);
        assert_eq!(d0.base, Some(p));
        assert_eq!(d0.terms.len(), 1);
        assert_eq!(decompose(&f, a1).constant_offset_from(&d0), Some(4));
        assert_eq!(decompose(&f, a2).constant_offset_from(&d0), Some(10));
    }

    #[test]
    fn int_to_addr_splits_base_and_null_has_no_base() {
        let mut f = FnIR::new("i2a");
        let bb = f.add_block();
        let base = f.add_param("base", Ty::int(64), false, true);
        let (x, y, n) = {
            let mut b = Builder::at_end(&mut f, bb);
            let lane = b.lane_id();
            let l64 = b.cast(CastOp::ZExt, lane, Ty::int(64));
            let s = b.add(base, l64);
            let x = b.int_to_addr(s, 1);
            let sixteen = b.iconst(16, 64);
            let l16 = b.add(l64, sixteen);
            let s2 = b.add(base, l16);
            let y = b.int_to_addr(s2, 1);
            let null = b.null(1);
            let n = b.elem_addr(null, sixteen, 1);
            (x, y, n)
        };
        let dx = decompose(&f, x);
        assert_eq!(dx.base, Some(base));
        assert_eq!(decompose(&f, y).constant_offset_from(&dx), Some(16));
        let dn = decompose(&f, n);
        assert_eq!(dn.base, None);
        assert_eq!(dn.offset, 16);
    }
}
