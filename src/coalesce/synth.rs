//! Value synthesis for merged accesses: packing narrow values into the
//! wide payload of a store and unpacking a wide load back into the shapes
//! its users expect.

use crate::coalesce::layout::{BundlePlan, LeafSource};
use crate::error::{MC, Stage};
use crate::ir::verify::field_ty;
use crate::ir::*;

/// Builds a `<lanes x elem>` vector from `(value, first lane)` parts.
/// Vector parts are unpacked element by element. Lanes no part covers
/// stay undefined.
pub fn pack_lanes(
    b: &mut Builder<'_>,
    dl: &DataLayout,
    elem: ScalarTy,
    lanes: u32,
    parts: &[(ValueId, u32)],
) -> MC<ValueId> {
    let mut acc = b.undef(Ty::vector(elem, lanes));
    for &(v, pos) in parts {
        let n = b.fn_ir.values[v].ty.lanes();
        ice_ensure!(
            pos + n <= lanes,
            Stage::Synth,
            "part {} at lane {} overflows a {}-lane vector",
            v,
            pos,
            lanes
        );
        if b.fn_ir.values[v].ty.is_vector() {
            for i in 0..n {
                let ex = b.extract_element(v, i);
                let ex = b.bit_or_pointer_cast(ex, elem, dl);
                acc = b.insert_element(acc, ex, pos + i);
            }
        } else {
            let c = b.bit_or_pointer_cast(v, elem, dl);
            acc = b.insert_element(acc, c, pos);
        }
    }
    Ok(acc)
}

/// Rebuilds a value of type `ty` from lanes `pos..` of `wide`.
pub fn unpack_lanes(b: &mut Builder<'_>, dl: &DataLayout, wide: ValueId, pos: u32, ty: &Ty) -> MC<ValueId> {
    let lanes = b.fn_ir.values[wide].ty.lanes();
    let n = ty.lanes();
    ice_ensure!(
        pos + n <= lanes,
        Stage::Synth,
        "extracting lanes {}..{} of a {}-lane value",
        pos,
        pos + n,
        lanes
    );
    let Some(scalar) = ty.scalar() else {
        bail!(
            "Synth",
            crate::error::MCCode::ICE9001,
            Stage::Synth,
            "cannot unpack into {}",
            ty
        );
    };
    if !ty.is_vector() {
        let ex = b.extract_element(wide, pos);
        return Ok(b.bit_or_pointer_cast(ex, scalar, dl));
    }
    let mut acc = b.undef(ty.clone());
    for i in 0..n {
        let ex = b.extract_element(wide, pos + i);
        let ex = b.bit_or_pointer_cast(ex, scalar, dl);
        acc = b.insert_element(acc, ex, i);
    }
    Ok(acc)
}

fn check_leaf_path(plan: &BundlePlan, path: &[u32], ty: ScalarTy) -> MC<()> {
    let found = if plan.flat {
        (path.len() == 1 && path[0] < plan.slots()).then_some(Ty::Scalar(ty))
    } else {
        field_ty(&plan.ty, path)
    };
    ice_ensure!(
        found == Some(Ty::Scalar(ty)),
        Stage::Synth,
        "leaf path {:?} does not address a {} in {}",
        path,
        ty,
        plan.ty
    );
    Ok(())
}

fn byte_of(b: &mut Builder<'_>, dl: &DataLayout, v: ValueId, byte: u32) -> ValueId {
    let size = dl.store_size(&b.fn_ir.values[v].ty) as u32;
    let bits = (size * 8) as u16;
    let Some(scalar) = b.fn_ir.values[v].ty.scalar() else {
        return v;
    };
    let int = if scalar.is_int() {
        v
    } else {
        b.bit_or_pointer_cast(v, ScalarTy::Int(bits), dl)
    };
    let shifted = if byte > 0 {
        let amt = b.iconst((byte * 8) as i64, bits);
        b.binary(BinOp::LShr, int, amt, Wrap::NONE)
    } else {
        int
    };
    if bits == 8 {
        shifted
    } else {
        b.cast(CastOp::Trunc, shifted, Ty::int(8))
    }
}

/// Store side: assembles the wide payload from the members' values.
pub fn gather_plan(b: &mut Builder<'_>, dl: &DataLayout, plan: &BundlePlan, values: &[ValueId]) -> MC<ValueId> {
    if plan.flat {
        let Ty::Vector { elem, lanes } = plan.ty else {
            bail!(
                "Synth",
                crate::error::MCCode::ICE9001,
                Stage::Synth,
                "flat bundle without a vector type"
            );
        };
        let mut parts = Vec::with_capacity(plan.leaves.len());
        for leaf in &plan.leaves {
            let LeafSource::Whole(i) = leaf.src else {
                bail!(
                    "Synth",
                    crate::error::MCCode::ICE9001,
                    Stage::Synth,
                    "split leaf in a flat bundle"
                );
            };
            check_leaf_path(plan, &leaf.path, elem)?;
            parts.push((values[i], leaf.path[0]));
        }
        return pack_lanes(b, dl, elem, lanes, &parts);
    }

    let mut acc = b.undef(plan.ty.clone());
    for leaf in &plan.leaves {
        check_leaf_path(plan, &leaf.path, leaf.ty)?;
        let v = match leaf.src {
            LeafSource::Whole(i) => b.bit_or_pointer_cast(values[i], leaf.ty, dl),
            LeafSource::Byte { member, byte } => byte_of(b, dl, values[member], byte),
        };
        acc = b.insert_field(acc, v, leaf.path.clone());
    }
    Ok(acc)
}

/// Load side: one replacement value per member, in member order.
pub fn scatter_plan(
    b: &mut Builder<'_>,
    dl: &DataLayout,
    plan: &BundlePlan,
    wide: ValueId,
    member_tys: &[ScalarTy],
) -> MC<Vec<ValueId>> {
    let mut out = Vec::with_capacity(member_tys.len());
    for (i, &ty) in member_tys.iter().enumerate() {
        let leaves: Vec<_> = plan.leaves_of(i).cloned().collect();
        ice_ensure!(!leaves.is_empty(), Stage::Synth, "member {} has no leaves", i);
        if let [leaf] = leaves.as_slice()
            && leaf.src == LeafSource::Whole(i)
        {
            check_leaf_path(plan, &leaf.path, leaf.ty)?;
            let ex = if plan.flat {
                b.extract_element(wide, leaf.path[0])
            } else {
                b.extract_field(wide, leaf.path.clone(), Ty::Scalar(leaf.ty))
            };
            out.push(b.bit_or_pointer_cast(ex, ty, dl));
            continue;
        }

        let bits = (dl.scalar_store_size(ty) * 8) as u16;
        let mut acc: Option<ValueId> = None;
        for leaf in &leaves {
            let LeafSource::Byte { byte, .. } = leaf.src else {
                bail!(
                    "Synth",
                    crate::error::MCCode::ICE9001,
                    Stage::Synth,
                    "member {} mixes whole and split leaves",
                    i
                );
            };
            check_leaf_path(plan, &leaf.path, ScalarTy::Int(8))?;
            let piece = b.extract_field(wide, leaf.path.clone(), Ty::int(8));
            let wide_piece = if bits > 8 {
                b.cast(CastOp::ZExt, piece, Ty::int(bits))
            } else {
                piece
            };
            let placed = if byte > 0 {
                let amt = b.iconst((byte * 8) as i64, bits);
                b.binary(BinOp::Shl, wide_piece, amt, Wrap::NONE)
            } else {
                wide_piece
            };
            acc = Some(match acc {
                Some(a) => b.binary(BinOp::Or, a, placed, Wrap::NONE),
                None => placed,
            });
        }
        let Some(acc) = acc else {
            bail!(
                "Synth",
                crate::error::MCCode::ICE9001,
                Stage::Synth,
                "member {} rebuilt from nothing",
                i
            );
        };
        out.push(b.bit_or_pointer_cast(acc, ty, dl));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coalesce::layout::{BundleMember, plan_bundle};
    use crate::ir::interp::{Interpreter, Memory};
    use crate::ir::verify::verify_ir;

    #[test]
    fn pack_then_unpack_vector_parts() {
        let mut f = FnIR::new("lanes");
        let bb = f.add_block();
        let dl = DataLayout::default();
        let (pair, back) = {
            let mut b = Builder::at_end(&mut f, bb);
            let x = b.iconst(7, 32);
            let y = b.undef(Ty::vector(ScalarTy::Float(32), 2));
            let wide = pack_lanes(&mut b, &dl, ScalarTy::Int(32), 4, &[(x, 0), (y, 1)]).expect("pack");
            let pair = unpack_lanes(&mut b, &dl, wide, 1, &Ty::vector(ScalarTy::Float(32), 2)).expect("unpack");
            let back = unpack_lanes(&mut b, &dl, wide, 0, &Ty::int(32)).expect("unpack");
            assert!(unpack_lanes(&mut b, &dl, wide, 3, &Ty::vector(ScalarTy::Int(32), 2)).is_err());
            (pair, back)
        };
        assert_eq!(f.values[pair].ty, Ty::vector(ScalarTy::Float(32), 2));
        assert_eq!(f.values[back].ty, Ty::int(32));
        assert_eq!(verify_ir(&f), Ok(()));
    }

    #[test]
    fn record_gather_and_scatter_round_trip_bytes() {
        let mut f = FnIR::new("plan");
        let bb = f.add_block();
        let dl = DataLayout::default();
        let mut cache = LayoutCache::default();
        let tys = [ScalarTy::Int(16), ScalarTy::Int(32), ScalarTy::Int(16)];
        let members = [
            BundleMember {
                offset: 0,
                ty: tys[0],
                size: 2,
            },
            BundleMember {
                offset: 2,
                ty: tys[1],
                size: 4,
            },
            BundleMember {
                offset: 6,
                ty: tys[2],
                size: 2,
            },
        ];
        let plan = plan_bundle(&members, 4, &mut cache).expect("plan");
        let out = {
            let mut b = Builder::at_end(&mut f, bb);
            let a = b.iconst(0x1122, 16);
            let c = b.iconst(0x3344_5566, 32);
            let d = b.iconst(0x7788, 16);
            let rec = gather_plan(&mut b, &dl, &plan, &[a, c, d]).expect("gather");
            let parts = scatter_plan(&mut b, &dl, &plan, rec, &tys).expect("scatter");
            parts[1]
        };
        f.blocks[bb].term = Terminator::Return(Some(out));
        assert_eq!(verify_ir(&f), Ok(()));
        let ret = Interpreter::new(&f, &dl)
            .run(&[], &mut Memory::default())
            .expect("runs")
            .expect("returns");
        assert_eq!(ret, 0x3344_5566u32.to_le_bytes().to_vec());
    }
}
