use crate::ir::*;
use rustc_hash::FxHashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("Invalid ValueId: {0}")]
    BadValue(ValueId),
    #[error("Invalid BlockId: {0}")]
    BadBlock(BlockId),
    #[error("Value {user} uses erased value {value}")]
    ErasedOperand { user: ValueId, value: ValueId },
    #[error("Value {user} uses unplaced instruction {value}")]
    UnplacedOperand { user: ValueId, value: ValueId },
    #[error("Value {0} is placed more than once or in the wrong block")]
    BadPlacement(ValueId),
    #[error("Constant-like value {0} must not be placed in a block")]
    PlacedFloating(ValueId),
    #[error("Use before def in Block {block}: Value {value} used by {user}")]
    UseBeforeDef {
        block: BlockId,
        value: ValueId,
        user: ValueId,
    },
    #[error("Value {value} accesses lane {lane} of a {lanes}-lane vector")]
    LaneOutOfRange { value: ValueId, lane: u32, lanes: u32 },
    #[error("Value {0} addresses a record field that does not exist")]
    FieldOutOfRange(ValueId),
}

pub fn verify_ir(fn_ir: &FnIR) -> Result<(), VerifyError> {
    let n_values = fn_ir.values.len();
    let n_blocks = fn_ir.blocks.len();
    if fn_ir.entry >= n_blocks && n_blocks > 0 {
        return Err(VerifyError::BadBlock(fn_ir.entry));
    }

    let mut seen: FxHashSet<ValueId> = FxHashSet::default();
    for block in &fn_ir.blocks {
        let mut defined_here: FxHashSet<ValueId> = FxHashSet::default();
        let in_block: FxHashSet<ValueId> = block.instrs.iter().copied().collect();
        for &v in &block.instrs {
            if v >= n_values {
                return Err(VerifyError::BadValue(v));
            }
            let val = &fn_ir.values[v];
            if !seen.insert(v) || val.block != Some(block.id) || val.erased {
                return Err(VerifyError::BadPlacement(v));
            }
            if val.kind.is_floating() {
                return Err(VerifyError::PlacedFloating(v));
            }
            for op in val.kind.operands() {
                check_operand(fn_ir, v, op)?;
                let is_phi = matches!(val.kind, ValueKind::Phi { .. });
                if !is_phi && in_block.contains(&op) && !defined_here.contains(&op) {
                    return Err(VerifyError::UseBeforeDef {
                        block: block.id,
                        value: op,
                        user: v,
                    });
                }
            }
            if let ValueKind::Phi { args } = &val.kind {
                for (_, pred) in args {
                    if *pred >= n_blocks {
                        return Err(VerifyError::BadBlock(*pred));
                    }
                }
            }
            check_shape(fn_ir, v)?;
            defined_here.insert(v);
        }

        match &block.term {
            Terminator::Goto(t) => {
                if *t >= n_blocks {
                    return Err(VerifyError::BadBlock(*t));
                }
            }
            Terminator::If {
                cond,
                then_bb,
                else_bb,
            } => {
                if *cond >= n_values {
                    return Err(VerifyError::BadValue(*cond));
                }
                if *then_bb >= n_blocks || *else_bb >= n_blocks {
                    return Err(VerifyError::BadBlock(block.id));
                }
            }
            Terminator::Return(Some(v)) => {
                if *v >= n_values {
                    return Err(VerifyError::BadValue(*v));
                }
            }
            _ => {}
        }
    }

    Ok(())
}

fn check_operand(fn_ir: &FnIR, user: ValueId, op: ValueId) -> Result<(), VerifyError> {
    if op >= fn_ir.values.len() {
        return Err(VerifyError::BadValue(op));
    }
    let val = &fn_ir.values[op];
    if val.erased {
        return Err(VerifyError::ErasedOperand { user, value: op });
    }
    if !val.kind.is_floating() && val.block.is_none() {
        return Err(VerifyError::UnplacedOperand { user, value: op });
    }
    Ok(())
}

fn check_shape(fn_ir: &FnIR, v: ValueId) -> Result<(), VerifyError> {
    match &fn_ir.values[v].kind {
        ValueKind::ExtractElement { vec, lane } | ValueKind::InsertElement { vec, lane, .. } => {
            let lanes = match fn_ir.values[*vec].ty {
                Ty::Vector { lanes, .. } => lanes,
                _ => 0,
            };
            if *lane >= lanes {
                return Err(VerifyError::LaneOutOfRange {
                    value: v,
                    lane: *lane,
                    lanes,
                });
            }
        }
        ValueKind::ExtractField { rec, path } | ValueKind::InsertField { rec, path, .. } => {
            if field_ty(&fn_ir.values[*rec].ty, path).is_none() {
                return Err(VerifyError::FieldOutOfRange(v));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Scalar type reached by walking `path` through nested layout records.
pub fn field_ty(ty: &Ty, path: &[u32]) -> Option<Ty> {
    let mut rec = ty.as_record()?.clone();
    for (depth, &idx) in path.iter().enumerate() {
        let field = rec.fields.get(idx as usize)?.clone();
        let last = depth + 1 == path.len();
        match field {
            RecordField::Scalar(s) if last => return Some(Ty::Scalar(s)),
            RecordField::Nested(inner) if last => return Some(Ty::Record(inner)),
            RecordField::Nested(inner) => rec = inner,
            RecordField::Scalar(_) => return None,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_use_before_def_and_lane_overflow() {
        let mut f = FnIR::new("bad");
        let bb = f.add_block();
        let p = f.add_param("p", Ty::ptr(1), false, false);
        let (ld, ex) = {
            let mut b = Builder::at_end(&mut f, bb);
            let ld = b.load(p, Ty::vector(ScalarTy::Int(32), 2), 8);
            let ex = b.extract_element(ld, 1);
            (ld, ex)
        };
        assert_eq!(verify_ir(&f), Ok(()));

        f.blocks[bb].instrs.swap(0, 1);
        assert!(matches!(
            verify_ir(&f),
            Err(VerifyError::UseBeforeDef { value, .. }) if value == ld
        ));
        f.blocks[bb].instrs.swap(0, 1);

        f.values[ex].kind = ValueKind::ExtractElement { vec: ld, lane: 2 };
        assert_eq!(
            verify_ir(&f),
            Err(VerifyError::LaneOutOfRange {
                value: ex,
                lane: 2,
                lanes: 2
            })
        );
    }

    #[test]
    fn rejects_uses_of_erased_values() {
        let mut f = FnIR::new("erased");
        let bb = f.add_block();
        let p = f.add_param("p", Ty::ptr(1), false, false);
        let (ld, st) = {
            let mut b = Builder::at_end(&mut f, bb);
            let ld = b.load(p, Ty::int(32), 4);
            let st = b.store(p, ld, 4);
            (ld, st)
        };
        f.erase(ld);
        assert_eq!(
            verify_ir(&f),
            Err(VerifyError::ErasedOperand { user: st, value: ld })
        );
    }
}
