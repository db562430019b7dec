//! Greedy window merging: a leading access grows a group of accesses at
//! constant offsets inside a bounded instruction window, and the group is
//! trimmed to a profitable vector length before it is rewritten.

use crate::coalesce::scan::MemRef;
use crate::coalesce::window_load::merge_load;
use crate::coalesce::window_store::merge_store;
use crate::coalesce::{CoalesceStats, CoalescingStrategy, PassCx};
use crate::error::MC;
use crate::ir::*;

/// One accepted access of a window group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub inst: ValueId,
    /// Byte offset from the leader's address.
    pub offset: i64,
    /// Index of the access in the block's `MemRef` list.
    pub slot: usize,
    pub lanes: u32,
    pub size: u64,
    pub align: u32,
}

impl Member {
    pub fn end(&self) -> i64 {
        self.offset + self.size as i64
    }
}

/// Bytes from the lowest member start to the highest member end.
pub fn footprint(members: &[Member]) -> u64 {
    let lo = members.iter().map(|m| m.offset).min();
    let hi = members.iter().map(Member::end).max();
    match (lo, hi) {
        (Some(lo), Some(hi)) => (hi - lo) as u64,
        _ => 0,
    }
}

/// Scalar element type of a mergeable access type: a scalar or vector of
/// whole bytes, never a pointer whose register width differs from memory.
pub fn mergeable_scalar(dl: &DataLayout, ty: &Ty) -> Option<ScalarTy> {
    let s = match ty {
        Ty::Scalar(s) => *s,
        Ty::Vector { elem, .. } => *elem,
        _ => return None,
    };
    if let ScalarTy::Ptr(space) = s
        && dl.has_reduced_pointer(space)
    {
        return None;
    }
    (dl.scalar_bits(s) % 8 == 0 && dl.scalar_bits(s) > 0).then_some(s)
}

/// Longest program-order prefix of `members` (at least two) whose
/// footprint is exactly one of the `allowed` element counts. Returns the
/// prefix length and the count.
pub fn trim_to_profitable(members: &[Member], scalar_size: u64, allowed: &[u32]) -> Option<(usize, u32)> {
    if scalar_size == 0 {
        return None;
    }
    (2..=members.len()).rev().find_map(|s| {
        let bytes = footprint(&members[..s]);
        let n = (bytes / scalar_size) as u32;
        (bytes % scalar_size == 0 && allowed.contains(&n)).then_some((s, n))
    })
}

/// Caps the footprint of a per-lane group with sub-dword alignment at 8
/// bytes by dropping the highest offsets. `members` must be sorted by
/// offset. Fails when fewer than two members remain or when any member
/// is dword aligned.
pub fn alignment_guard(members: &mut Vec<Member>, uniform: bool) -> bool {
    let Some(first) = members.first() else {
        return false;
    };
    if first.align >= 4 || uniform {
        return true;
    }
    while footprint(members) > 8 {
        members.pop();
    }
    members.len() >= 2 && members.iter().all(|m| m.align < 4)
}

/// Window strategy: each remaining load or store in program order is
/// tried as a leader.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowMerger;

impl CoalescingStrategy for WindowMerger {
    fn name(&self) -> &'static str {
        "window"
    }

    fn coalesce_block(
        &self,
        fn_ir: &mut FnIR,
        refs: &mut [MemRef],
        cx: &mut PassCx<'_>,
        stats: &mut CoalesceStats,
    ) -> MC<bool> {
        let mut changed = false;
        for idx in 0..refs.len() {
            let Some(inst) = refs[idx].inst else {
                continue;
            };
            match fn_ir.values[inst].kind {
                ValueKind::Load(_) => changed |= merge_load(fn_ir, refs, idx, cx, stats)?,
                ValueKind::Store(_) => changed |= merge_store(fn_ir, refs, idx, cx, stats)?,
                _ => {}
            }
        }
        Ok(changed)
    }
}
