use crate::ir::*;

/// A bundle member as the layout planner sees it: byte offset from the
/// start of the run, scalar type and store size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleMember {
    pub offset: u64,
    pub ty: ScalarTy,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafSource {
    Whole(usize),
    // One byte of a member that straddles a slot boundary.
    Byte { member: usize, byte: u32 },
}

/// One scalar position inside the wide value. `path` is the lane of a flat
/// vector or the field path of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf {
    pub ty: ScalarTy,
    pub src: LeafSource,
    pub path: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct BundlePlan {
    pub ty: Ty,
    pub flat: bool,
    pub granule: u64,
    pub leaves: Vec<Leaf>,
}

impl BundlePlan {
    pub fn slots(&self) -> u32 {
        match &self.ty {
            Ty::Vector { lanes, .. } => *lanes,
            Ty::Record(r) => r.fields.len() as u32,
            _ => 1,
        }
    }

    pub fn leaves_of(&self, member: usize) -> impl Iterator<Item = &Leaf> {
        self.leaves.iter().filter(move |l| match l.src {
            LeafSource::Whole(m) => m == member,
            LeafSource::Byte { member: m, .. } => m == member,
        })
    }
}

/// Lays out a gap-free run of members as `total / granule` slots.
///
/// When every slot is exactly one member the result is a flat vector
/// (integer elements if member kinds differ). Otherwise it is a packed
/// record: a slot holding a single whole member is a scalar field, any
/// other slot is a nested packed record of its leaves. Members crossing a
/// slot boundary are split into bytes. Records go through `cache`.
pub fn plan_bundle(members: &[BundleMember], granule: u64, cache: &mut LayoutCache) -> Option<BundlePlan> {
    let last = members.last()?;
    let total = last.offset + last.size;
    if granule == 0 || total % granule != 0 {
        return None;
    }
    let slots = total / granule;

    let flat = members
        .iter()
        .enumerate()
        .all(|(i, m)| m.size == granule && m.offset == i as u64 * granule);
    if flat {
        let first = members[0].ty;
        let elem = if members.iter().all(|m| m.ty == first) {
            first
        } else {
            ScalarTy::Int((granule * 8) as u16)
        };
        let leaves = members
            .iter()
            .enumerate()
            .map(|(i, _)| Leaf {
                ty: elem,
                src: LeafSource::Whole(i),
                path: vec![i as u32],
            })
            .collect();
        return Some(BundlePlan {
            ty: Ty::vector(elem, slots as u32),
            flat: true,
            granule,
            leaves,
        });
    }

    let mut fields = Vec::with_capacity(slots as usize);
    let mut leaves = Vec::new();
    for k in 0..slots {
        let (lo, hi) = (k * granule, (k + 1) * granule);
        let mut slot: Vec<(ScalarTy, LeafSource)> = Vec::new();
        for (i, m) in members.iter().enumerate() {
            let (mlo, mhi) = (m.offset, m.offset + m.size);
            if mhi <= lo || mlo >= hi {
                continue;
            }
            if mlo >= lo && mhi <= hi {
                slot.push((m.ty, LeafSource::Whole(i)));
            } else {
                for byte in mlo.max(lo)..mhi.min(hi) {
                    slot.push((
                        ScalarTy::Int(8),
                        LeafSource::Byte {
                            member: i,
                            byte: (byte - mlo) as u32,
                        },
                    ));
                }
            }
        }
        let single = match slot.as_slice() {
            [(ty, LeafSource::Whole(i))] => Some((*ty, *i)),
            _ => None,
        };
        match single {
            Some((ty, i)) => {
                fields.push(RecordField::Scalar(ty));
                leaves.push(Leaf {
                    ty,
                    src: LeafSource::Whole(i),
                    path: vec![k as u32],
                });
            }
            None => {
                let inner = cache.intern(LayoutRecord {
                    fields: slot.iter().map(|(t, _)| RecordField::Scalar(*t)).collect(),
                    packed: true,
                    kind: RecordKind::SubSlot,
                });
                fields.push(RecordField::Nested(inner));
                for (j, (ty, src)) in slot.into_iter().enumerate() {
                    leaves.push(Leaf {
                        ty,
                        src,
                        path: vec![k as u32, j as u32],
                    });
                }
            }
        }
    }
    let outer = cache.intern(LayoutRecord {
        fields,
        packed: true,
        kind: RecordKind::Bundle,
    });
    Some(BundlePlan {
        ty: Ty::Record(outer),
        flat: false,
        granule,
        leaves,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(offset: u64, ty: ScalarTy, size: u64) -> BundleMember {
        BundleMember { offset, ty, size }
    }

    #[test]
    fn flat_when_each_slot_is_one_member() {
        let mut cache = LayoutCache::default();
        let plan = plan_bundle(
            &[m(0, ScalarTy::Float(32), 4), m(4, ScalarTy::Int(32), 4)],
            4,
            &mut cache,
        )
        .expect("plan");
        assert!(plan.flat);
        assert_eq!(plan.ty, Ty::vector(ScalarTy::Int(32), 2));
        assert!(cache.is_empty());
    }

    #[test]
    fn bytes_pack_into_one_slot_record() {
        let mut cache = LayoutCache::default();
        let members: Vec<_> = (0..4).map(|i| m(i, ScalarTy::Int(8), 1)).collect();
        let plan = plan_bundle(&members, 4, &mut cache).expect("plan");
        assert!(!plan.flat);
        assert_eq!(plan.ty.to_string(), "<{<{i8, i8, i8, i8}>}>");
        assert_eq!(plan.slots(), 1);
        assert_eq!(plan.leaves[3].path, vec![0, 3]);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn straddling_member_is_split_and_records_are_shared() {
        let mut cache = LayoutCache::default();
        let members = [
            m(0, ScalarTy::Int(16), 2),
            m(2, ScalarTy::Float(32), 4),
            m(6, ScalarTy::Int(16), 2),
        ];
        let plan = plan_bundle(&members, 4, &mut cache).expect("plan");
        assert_eq!(plan.ty.to_string(), "<{<{i16, i8, i8}>, <{i8, i8, i16}>}>");
        let pieces: Vec<_> = plan.leaves_of(1).map(|l| l.src).collect();
        assert_eq!(
            pieces,
            (0..4)
                .map(|byte| LeafSource::Byte { member: 1, byte })
                .collect::<Vec<_>>()
        );

        let again = plan_bundle(&members, 4, &mut cache).expect("plan");
        assert_eq!(again.ty, plan.ty);
        assert_eq!(cache.len(), 3);
        assert!(plan_bundle(&members[..2], 4, &mut cache).is_none());
    }
}
