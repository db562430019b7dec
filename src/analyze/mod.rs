//! Analyses the coalescer consumes as oracles. Each one is a trait so a
//! host compiler can plug in its own; the defaults here let the pass run
//! standalone.

use crate::ir::*;

pub mod alias;
pub mod induction;
pub mod known_bits;
pub mod uniform;

pub use alias::BasicAlias;
pub use induction::AffineChains;
pub use known_bits::KnownBits;
pub use uniform::UniformityInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasResult {
    NoAlias,
    MayAlias,
    Unknown,
}

impl AliasResult {
    /// Unknown is treated as MayAlias by every caller.
    pub fn is_no_alias(self) -> bool {
        matches!(self, AliasResult::NoAlias)
    }
}

/// Memory footprint of one operation. `addr == None` means the operation
/// may touch anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemLoc {
    pub addr: Option<ValueId>,
    pub size: Option<u64>,
}

impl MemLoc {
    pub const UNKNOWN: MemLoc = MemLoc {
        addr: None,
        size: None,
    };

    pub fn of(fn_ir: &FnIR, dl: &DataLayout, v: ValueId) -> MemLoc {
        match &fn_ir.values[v].kind {
            ValueKind::Load(ld) => MemLoc {
                addr: Some(ld.addr),
                size: Some(dl.store_size(&fn_ir.values[v].ty)),
            },
            ValueKind::Store(st) => MemLoc {
                addr: Some(st.addr),
                size: Some(dl.store_size(&fn_ir.values[st.val].ty)),
            },
            ValueKind::Call {
                arg_addr: Some(a), ..
            } => MemLoc {
                addr: Some(*a),
                size: None,
            },
            _ => MemLoc::UNKNOWN,
        }
    }
}

pub trait AliasOracle {
    fn alias(&self, fn_ir: &FnIR, a: MemLoc, b: MemLoc) -> AliasResult;
}

pub trait InductionOracle {
    /// Constant byte distance `addr(b) - addr(a)`, if provable.
    fn offset_between(&self, fn_ir: &FnIR, a: ValueId, b: ValueId) -> Option<i64>;
}

pub trait KnownBitsOracle {
    /// True when every bit set in `mask` is known to be zero in `v`.
    fn known_zero(&self, fn_ir: &FnIR, v: ValueId, mask: u64) -> bool;
}

pub trait UniformityOracle {
    fn is_uniform(&self, fn_ir: &FnIR, v: ValueId) -> bool;
}

/// The collaborator set one coalescing run consults.
#[derive(Clone, Copy)]
pub struct Oracles<'o> {
    pub alias: &'o dyn AliasOracle,
    pub induction: &'o dyn InductionOracle,
    pub known_bits: &'o dyn KnownBitsOracle,
    pub uniform: &'o dyn UniformityOracle,
}
