//! 64-bit index rewriting around the merger.
//!
//! Before merging, extensions are pushed through non-wrapping adds inside
//! 64-bit indexed addresses so the constant parts become visible:
//! `sext(add nsw a, b)` becomes `add nsw (sext a), (sext b)`. After
//! merging, the adds this module created are folded back so the surviving
//! accesses keep their narrow arithmetic.

use crate::analyze::KnownBitsOracle;
use crate::ir::*;
use crate::utils::{sign_truncate, zero_truncate};
use rustc_hash::FxHashSet;

fn int_bits(fn_ir: &FnIR, v: ValueId) -> Option<u32> {
    fn_ir.values[v]
        .ty
        .scalar()
        .filter(|_| !fn_ir.values[v].ty.is_vector())
        .and_then(|s| s.int_bits())
        .map(u32::from)
}

/// The placed indexed address feeding `access`, when its space uses 64-bit
/// register pointers.
fn index_of_access(fn_ir: &FnIR, dl: &DataLayout, access: ValueId) -> Option<ValueId> {
    let mut ptr = fn_ir.access_addr(access)?;
    if let ValueKind::Cast {
        op: CastOp::BitCast,
        src,
    } = fn_ir.values[ptr].kind
    {
        ptr = src;
    }
    let is_index = matches!(fn_ir.values[ptr].kind, ValueKind::Index { .. });
    (is_index
        && fn_ir.is_placed(ptr)
        && dl.pointer(fn_ir.addr_space(ptr)).register_bits == 64)
        .then_some(ptr)
}

fn elem_indices(fn_ir: &FnIR, gep: ValueId) -> Vec<(usize, ValueId)> {
    match &fn_ir.values[gep].kind {
        ValueKind::Index { steps, .. } => steps
            .iter()
            .enumerate()
            .filter_map(|(k, s)| match s {
                IndexStep::Elem { index, .. } => Some((k, *index)),
                IndexStep::Field { .. } => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn set_elem_index(fn_ir: &mut FnIR, gep: ValueId, k: usize, new_index: ValueId) {
    if let ValueKind::Index { steps, .. } = &mut fn_ir.values[gep].kind
        && let Some(IndexStep::Elem { index, .. }) = steps.get_mut(k)
    {
        *index = new_index;
    }
}

fn extend_to(b: &mut Builder<'_>, op: CastOp, v: ValueId, bits: u16) -> ValueId {
    let from = b.fn_ir.values[v].ty.scalar().and_then(|s| s.int_bits());
    if from == Some(bits) {
        return v;
    }
    if let Some(c) = b.fn_ir.const_value(v) {
        let w = from.map(u32::from).unwrap_or(64);
        let c = match op {
            CastOp::ZExt => zero_truncate(c, w) as i64,
            _ => sign_truncate(c, w),
        };
        return b.iconst(c, bits);
    }
    b.cast(op, v, Ty::int(bits))
}

fn fold(op: BinOp, l: i64, r: i64) -> i64 {
    match op {
        BinOp::Sub => l.wrapping_sub(r),
        _ => l.wrapping_add(r),
    }
}

/// Distributes extensions in the 64-bit indices of `access`. New adds are
/// recorded in `created`. Returns the number of rewritten indices.
pub fn canonicalize(
    fn_ir: &mut FnIR,
    dl: &DataLayout,
    kb: &dyn KnownBitsOracle,
    access: ValueId,
    created: &mut FxHashSet<ValueId>,
) -> usize {
    let Some(gep) = index_of_access(fn_ir, dl, access) else {
        return 0;
    };
    let mut changed = 0;
    for (k, index) in elem_indices(fn_ir, gep) {
        if int_bits(fn_ir, index) != Some(64) {
            continue;
        }
        let ValueKind::Cast {
            op: ext @ (CastOp::SExt | CastOp::ZExt),
            src,
        } = fn_ir.values[index].kind
        else {
            continue;
        };
        let Some(src_bits) = int_bits(fn_ir, src) else {
            continue;
        };
        let new_index = match fn_ir.values[src].kind {
            ValueKind::Binary {
                op: op @ (BinOp::Add | BinOp::Sub),
                lhs,
                rhs,
                wrap,
            } if (ext == CastOp::SExt && wrap.nsw) || (ext == CastOp::ZExt && wrap.nuw) => {
                let mut b = Builder::before(fn_ir, gep);
                let l = extend_to(&mut b, ext, lhs, 64);
                let r = extend_to(&mut b, ext, rhs, 64);
                match (b.fn_ir.const_value(l), b.fn_ir.const_value(r)) {
                    (Some(x), Some(y)) => b.iconst(fold(op, x, y), 64),
                    _ => {
                        let v = b.binary(op, l, r, wrap);
                        created.insert(v);
                        v
                    }
                }
            }
            ValueKind::Binary {
                op: BinOp::Or,
                lhs,
                rhs,
                ..
            } => {
                let Some(c) = fn_ir.const_value(rhs) else {
                    continue;
                };
                if !kb.known_zero(fn_ir, lhs, zero_truncate(c, src_bits)) {
                    continue;
                }
                let wrap = Wrap {
                    nsw: ext == CastOp::SExt,
                    nuw: ext == CastOp::ZExt,
                };
                let mut b = Builder::before(fn_ir, gep);
                let l = extend_to(&mut b, ext, lhs, 64);
                let r = extend_to(&mut b, ext, rhs, 64);
                let v = b.binary(BinOp::Add, l, r, wrap);
                created.insert(v);
                v
            }
            _ => continue,
        };
        set_elem_index(fn_ir, gep, k, new_index);
        fn_ir.delete_trivially_dead(index);
        changed += 1;
    }
    changed
}

/// Folds adds created by [`canonicalize`] back into a single extension:
/// `add (ext a), (ext b)` becomes `ext (add a, b)` and `add (ext a), C`
/// becomes `ext (add a, C)` when `C` fits the narrow width.
pub fn optimize(
    fn_ir: &mut FnIR,
    dl: &DataLayout,
    access: ValueId,
    created: &FxHashSet<ValueId>,
) -> usize {
    let Some(gep) = index_of_access(fn_ir, dl, access) else {
        return 0;
    };
    let mut changed = 0;
    for (k, index) in elem_indices(fn_ir, gep) {
        if !created.contains(&index) || fn_ir.values[index].erased {
            continue;
        }
        let ValueKind::Binary {
            op: op @ (BinOp::Add | BinOp::Sub),
            lhs,
            rhs,
            wrap,
        } = fn_ir.values[index].kind
        else {
            continue;
        };
        let ValueKind::Cast {
            op: ext @ (CastOp::SExt | CastOp::ZExt),
            src: a,
        } = fn_ir.values[lhs].kind
        else {
            continue;
        };
        let wrap_ok = (ext == CastOp::ZExt && wrap.nuw) || (ext == CastOp::SExt && wrap.nsw);
        if !wrap_ok {
            continue;
        }
        let Some(a_bits) = int_bits(fn_ir, a) else {
            continue;
        };

        let rhs_ext = match fn_ir.values[rhs].kind {
            ValueKind::Cast { op, src } if op == ext => Some(src),
            _ => None,
        };
        let new_index = if let Some(bsrc) = rhs_ext {
            let Some(b_bits) = int_bits(fn_ir, bsrc) else {
                continue;
            };
            let width = a_bits.max(b_bits) as u16;
            let mut b = Builder::before(fn_ir, gep);
            let na = extend_to(&mut b, ext, a, width);
            let nb = extend_to(&mut b, ext, bsrc, width);
            let bo = b.binary(op, na, nb, wrap);
            b.cast(ext, bo, Ty::int(64))
        } else if let Some(c) = fn_ir.const_value(rhs) {
            let fits = match ext {
                CastOp::ZExt => c >= 0 && zero_truncate(c, a_bits) as i64 == c,
                _ => sign_truncate(c, a_bits) == c,
            };
            if !fits {
                continue;
            }
            let mut b = Builder::before(fn_ir, gep);
            let nc = b.iconst(sign_truncate(c, a_bits), a_bits as u16);
            let bo = b.binary(op, a, nc, wrap);
            b.cast(ext, bo, Ty::int(64))
        } else {
            continue;
        };
        set_elem_index(fn_ir, gep, k, new_index);
        fn_ir.delete_trivially_dead(index);
        changed += 1;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::KnownBits;
    use crate::ir::verify::verify_ir;

    #[test]
    fn distribute_then_fold_back() {
        let mut f = FnIR::new("gep64");
        let bb = f.add_block();
        let p = f.add_param("p", Ty::ptr(1), false, false);
        let i = f.add_param("i", Ty::int(32), false, false);
        let (gep, ld) = {
            let mut b = Builder::at_end(&mut f, bb);
            let three = b.iconst(3, 32);
            let a = b.binary(BinOp::Add, i, three, Wrap::NSW);
            let s = b.cast(CastOp::SExt, a, Ty::int(64));
            let gep = b.elem_addr(p, s, 4);
            let ld = b.load(gep, Ty::int(32), 4);
            (gep, ld)
        };
        f.blocks[bb].term = Terminator::Return(Some(ld));
        let dl = DataLayout::default();
        let mut created = FxHashSet::default();

        assert_eq!(canonicalize(&mut f, &dl, &KnownBits, ld, &mut created), 1);
        assert_eq!(verify_ir(&f), Ok(()));
        let ValueKind::Index { steps, .. } = &f.values[gep].kind else {
            panic!("index expected");
        };
        let IndexStep::Elem { index, .. } = steps[0] else {
            panic!("elem expected");
        };
        assert!(created.contains(&index));
        match f.values[index].kind {
            ValueKind::Binary {
                op: BinOp::Add,
                rhs,
                wrap,
                ..
            } => {
                assert_eq!(f.const_value(rhs), Some(3));
                assert!(wrap.nsw);
            }
            ref other => panic!("unexpected {:?}", other),
        }

        assert_eq!(optimize(&mut f, &dl, ld, &created), 1);
        assert_eq!(verify_ir(&f), Ok(()));
        let ValueKind::Index { steps, .. } = &f.values[gep].kind else {
            panic!("index expected");
        };
        let IndexStep::Elem { index, .. } = steps[0] else {
            panic!("elem expected");
        };
        assert!(matches!(
            f.values[index].kind,
            ValueKind::Cast {
                op: CastOp::SExt,
                ..
            }
        ));
    }

    #[test]
    fn or_with_disjoint_bits_becomes_add_and_user_adds_stay() {
        let mut f = FnIR::new("gep64_or");
        let bb = f.add_block();
        let p = f.add_param("p", Ty::ptr(1), false, false);
        let (ld, user_ld) = {
            let mut b = Builder::at_end(&mut f, bb);
            let lane = b.lane_id();
            let one = b.iconst(1, 32);
            let sh = b.binary(BinOp::Shl, lane, one, Wrap::NONE);
            let or = b.binary(BinOp::Or, sh, one, Wrap::NONE);
            let z = b.cast(CastOp::ZExt, or, Ty::int(64));
            let gep = b.elem_addr(p, z, 2);
            let ld = b.load(gep, Ty::int(16), 2);
            let zl = b.cast(CastOp::ZExt, lane, Ty::int(64));
            let two = b.iconst(2, 64);
            let user_add = b.binary(BinOp::Add, zl, two, Wrap::NUW);
            let gep2 = b.elem_addr(p, user_add, 2);
            let user_ld = b.load(gep2, Ty::int(16), 2);
            (ld, user_ld)
        };
        let dl = DataLayout::default();
        let mut created = FxHashSet::default();
        assert_eq!(canonicalize(&mut f, &dl, &KnownBits, ld, &mut created), 1);
        assert_eq!(created.len(), 1);
        assert_eq!(verify_ir(&f), Ok(()));
        // Adds written by the program are never refactored.
        assert_eq!(optimize(&mut f, &dl, user_ld, &created), 0);
    }
}
