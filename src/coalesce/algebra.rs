//! Address algebra: rewrites an address operand into a linear polynomial
//! `sum(coeff_i * symbol_i) + constant` over opaque symbols so that two
//! addresses can be compared term by term.

use crate::analyze::KnownBitsOracle;
use crate::ir::*;
use crate::utils::{sign_truncate, zero_truncate};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;

pub const MAX_DEPTH: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Extension {
    None,
    Sign,
    Zero,
}

impl Extension {
    /// Widens a constant of `bits` the way this extension would.
    pub fn apply(self, c: i64, bits: u32) -> i64 {
        match self {
            Extension::None => c,
            Extension::Sign => sign_truncate(c, bits),
            Extension::Zero => zero_truncate(c, bits) as i64,
        }
    }

    fn allows(self, wrap: Wrap) -> bool {
        match self {
            Extension::None => true,
            Extension::Sign => wrap.nsw,
            Extension::Zero => wrap.nuw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolicTerm {
    pub symbol: ValueId,
    pub ext: Extension,
    pub coeff: i64,
}

impl SymbolicTerm {
    fn key(&self) -> (ValueId, Extension) {
        (self.symbol, self.ext)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SymbolicExpression {
    pub terms: Vec<SymbolicTerm>, // sorted by (symbol, ext), no zero coefficients
    pub constant: i64,
}

impl SymbolicExpression {
    pub fn constant(c: i64) -> Self {
        Self {
            terms: Vec::new(),
            constant: c,
        }
    }

    pub fn symbol(symbol: ValueId, ext: Extension) -> Self {
        Self {
            terms: vec![SymbolicTerm {
                symbol,
                ext,
                coeff: 1,
            }],
            constant: 0,
        }
    }

    pub fn as_constant(&self) -> Option<i64> {
        self.terms.is_empty().then_some(self.constant)
    }

    pub fn add(&self, other: &Self) -> Self {
        self.combine(other, 1)
    }

    /// `self - other`.
    pub fn negate_and_add(&self, other: &Self) -> Self {
        self.combine(other, -1)
    }

    pub fn scale(&self, k: i64) -> Self {
        if k == 0 {
            return Self::constant(0);
        }
        Self {
            terms: self
                .terms
                .iter()
                .map(|t| SymbolicTerm {
                    coeff: t.coeff.wrapping_mul(k),
                    ..*t
                })
                .filter(|t| t.coeff != 0)
                .collect(),
            constant: self.constant.wrapping_mul(k),
        }
    }

    fn combine(&self, other: &Self, sign: i64) -> Self {
        let mut terms = Vec::with_capacity(self.terms.len() + other.terms.len());
        let (mut i, mut j) = (0, 0);
        while i < self.terms.len() || j < other.terms.len() {
            let ord = match (self.terms.get(i), other.terms.get(j)) {
                (Some(a), Some(b)) => a.key().cmp(&b.key()),
                (Some(_), None) => Ordering::Less,
                _ => Ordering::Greater,
            };
            match ord {
                Ordering::Less => {
                    terms.push(self.terms[i]);
                    i += 1;
                }
                Ordering::Greater => {
                    let b = other.terms[j];
                    terms.push(SymbolicTerm {
                        coeff: b.coeff.wrapping_mul(sign),
                        ..b
                    });
                    j += 1;
                }
                Ordering::Equal => {
                    let a = self.terms[i];
                    let coeff = a
                        .coeff
                        .wrapping_add(other.terms[j].coeff.wrapping_mul(sign));
                    if coeff != 0 {
                        terms.push(SymbolicTerm { coeff, ..a });
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        Self {
            terms,
            constant: self
                .constant
                .wrapping_add(other.constant.wrapping_mul(sign)),
        }
    }

    /// True when `n` divides every coefficient.
    pub fn is_constant_multiple_of(&self, n: i64) -> bool {
        n != 0 && self.terms.iter().all(|t| t.coeff.wrapping_rem(n) == 0)
    }

    /// Largest power of two dividing every coefficient, if there are terms.
    pub fn coeff_stride(&self) -> Option<u64> {
        let tz = self
            .terms
            .iter()
            .map(|t| t.coeff.trailing_zeros())
            .min()?;
        (tz < 63).then(|| 1u64 << tz)
    }
}

/// Constant distance `b - a` when both expressions share their terms.
pub fn is_offset_by_constant(a: &SymbolicExpression, b: &SymbolicExpression) -> Option<i64> {
    (a.terms == b.terms).then(|| b.constant.wrapping_sub(a.constant))
}

pub type ExprId = usize;

/// Per-function store of canonical expressions, memoised by operand and
/// extension context. Reset whenever the IR under it is rewritten.
#[derive(Debug, Default)]
pub struct ExprArena {
    exprs: Vec<SymbolicExpression>,
    memo: FxHashMap<(ValueId, Extension), ExprId>,
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.exprs.clear();
        self.memo.clear();
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn get(&self, id: ExprId) -> &SymbolicExpression {
        &self.exprs[id]
    }

    fn alloc(&mut self, e: SymbolicExpression) -> ExprId {
        let id = self.exprs.len();
        self.exprs.push(e);
        id
    }

    pub fn canonicalize(
        &mut self,
        fn_ir: &FnIR,
        dl: &DataLayout,
        kb: &dyn KnownBitsOracle,
        v: ValueId,
    ) -> ExprId {
        self.canon(fn_ir, dl, kb, v, Extension::None, 0)
    }

    fn canon(
        &mut self,
        fn_ir: &FnIR,
        dl: &DataLayout,
        kb: &dyn KnownBitsOracle,
        v: ValueId,
        ext: Extension,
        depth: u32,
    ) -> ExprId {
        if let Some(&id) = self.memo.get(&(v, ext)) {
            return id;
        }
        let expr = if depth >= MAX_DEPTH {
            SymbolicExpression::symbol(v, ext)
        } else {
            self.build(fn_ir, dl, kb, v, ext, depth)
        };
        let id = self.alloc(expr);
        self.memo.insert((v, ext), id);
        id
    }

    fn sub(
        &mut self,
        fn_ir: &FnIR,
        dl: &DataLayout,
        kb: &dyn KnownBitsOracle,
        v: ValueId,
        ext: Extension,
        depth: u32,
    ) -> SymbolicExpression {
        let id = self.canon(fn_ir, dl, kb, v, ext, depth + 1);
        self.exprs[id].clone()
    }

    fn build(
        &mut self,
        fn_ir: &FnIR,
        dl: &DataLayout,
        kb: &dyn KnownBitsOracle,
        v: ValueId,
        ext: Extension,
        depth: u32,
    ) -> SymbolicExpression {
        let opaque = SymbolicExpression::symbol(v, ext);
        let val = &fn_ir.values[v];
        let width = value_bits(fn_ir, dl, v);
        let is_ptr = matches!(val.ty, Ty::Scalar(ScalarTy::Ptr(_)));

        match &val.kind {
            ValueKind::Const(c) => SymbolicExpression::constant(ext.apply(*c, width)),
            ValueKind::NullAddr => SymbolicExpression::constant(0),
            ValueKind::Binary {
                op,
                lhs,
                rhs,
                wrap,
            } if !is_ptr => {
                let (lhs, rhs) = (*lhs, *rhs);
                let rc = fn_ir.const_value(rhs).map(|c| ext.apply(c, width));
                let lc = fn_ir.const_value(lhs).map(|c| ext.apply(c, width));
                match op {
                    BinOp::Add if ext.allows(*wrap) => {
                        let a = self.sub(fn_ir, dl, kb, lhs, ext, depth);
                        let b = self.sub(fn_ir, dl, kb, rhs, ext, depth);
                        a.add(&b)
                    }
                    BinOp::Sub if ext.allows(*wrap) => {
                        let a = self.sub(fn_ir, dl, kb, lhs, ext, depth);
                        let b = self.sub(fn_ir, dl, kb, rhs, ext, depth);
                        a.negate_and_add(&b)
                    }
                    BinOp::Mul if ext.allows(*wrap) => match (lc, rc) {
                        (_, Some(c)) => self.sub(fn_ir, dl, kb, lhs, ext, depth).scale(c),
                        (Some(c), None) => self.sub(fn_ir, dl, kb, rhs, ext, depth).scale(c),
                        _ => opaque,
                    },
                    BinOp::Shl if ext.allows(*wrap) => match fn_ir.const_value(rhs) {
                        Some(k) if (0..(width.min(63) as i64)).contains(&k) => {
                            self.sub(fn_ir, dl, kb, lhs, ext, depth).scale(1i64 << k)
                        }
                        _ => opaque,
                    },
                    BinOp::Or => match fn_ir.const_value(rhs) {
                        Some(c) if kb.known_zero(fn_ir, lhs, zero_truncate(c, width)) => {
                            let a = self.sub(fn_ir, dl, kb, lhs, ext, depth);
                            a.add(&SymbolicExpression::constant(ext.apply(c, width)))
                        }
                        _ => opaque,
                    },
                    _ => opaque,
                }
            }
            ValueKind::Cast { op, src } => {
                let src = *src;
                let src_bits = value_bits(fn_ir, dl, src);
                let src_ptr = matches!(fn_ir.values[src].ty, Ty::Scalar(ScalarTy::Ptr(_)));
                match op {
                    CastOp::SExt if ext != Extension::Zero && !src_ptr => {
                        self.sub(fn_ir, dl, kb, src, Extension::Sign, depth)
                    }
                    CastOp::ZExt if ext != Extension::Sign && !src_ptr => {
                        self.sub(fn_ir, dl, kb, src, Extension::Zero, depth)
                    }
                    CastOp::BitCast if src_bits == width => {
                        self.sub(fn_ir, dl, kb, src, ext, depth)
                    }
                    CastOp::PtrToInt | CastOp::AddrSpaceCast
                        if ext == Extension::None && src_bits == width =>
                    {
                        self.sub(fn_ir, dl, kb, src, Extension::None, depth)
                    }
                    _ => opaque,
                }
            }
            ValueKind::Index { base, steps, .. } if ext == Extension::None => {
                let mut e = self.sub(fn_ir, dl, kb, *base, Extension::None, depth);
                for s in steps {
                    match s {
                        IndexStep::Field { offset } => {
                            e = e.add(&SymbolicExpression::constant(*offset as i64));
                        }
                        IndexStep::Elem { index, elem_size } => {
                            let iw = value_bits(fn_ir, dl, *index);
                            let iext = if iw < width {
                                Extension::Sign
                            } else {
                                Extension::None
                            };
                            let ie = self.sub(fn_ir, dl, kb, *index, iext, depth);
                            e = e.add(&ie.scale(*elem_size as i64));
                        }
                    }
                }
                e
            }
            ValueKind::IntToAddr { src } if ext == Extension::None => {
                let sw = value_bits(fn_ir, dl, *src);
                let sext = if sw < width {
                    Extension::Zero
                } else {
                    Extension::None
                };
                self.sub(fn_ir, dl, kb, *src, sext, depth)
            }
            _ => opaque,
        }
    }
}

/// Arithmetic width of an operand: integer bits, or the register width of
/// a pointer's address space.
pub fn value_bits(fn_ir: &FnIR, dl: &DataLayout, v: ValueId) -> u32 {
    match fn_ir.values[v].ty {
        Ty::Scalar(ScalarTy::Int(b)) => b as u32,
        Ty::Scalar(ScalarTy::Ptr(space)) => dl.pointer(space).register_bits,
        Ty::Scalar(ScalarTy::Float(b)) => b as u32,
        _ => 64,
    }
}
