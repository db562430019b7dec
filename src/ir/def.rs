pub use crate::ir::types::{AddrSpace, DataLayout, LayoutCache, ScalarTy, Ty};
use crate::utils::Span;

pub type BlockId = usize;
pub type ValueId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    Eq,
    Lt,
}

/// No-wrap flags of integer arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Wrap {
    pub nsw: bool,
    pub nuw: bool,
}

impl Wrap {
    pub const NONE: Wrap = Wrap {
        nsw: false,
        nuw: false,
    };
    pub const NSW: Wrap = Wrap {
        nsw: true,
        nuw: false,
    };
    pub const NUW: Wrap = Wrap {
        nsw: false,
        nuw: true,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastOp {
    Trunc,
    SExt,
    ZExt,
    BitCast,
    PtrToInt,
    AddrSpaceCast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexStep {
    // Constant member offset inside an aggregate, already in bytes.
    Field { offset: u64 },
    // index * elem_size; the index is sign extended to pointer width.
    Elem { index: ValueId, elem_size: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicOrdering {
    Unordered,
    Monotonic,
    Acquire,
    Release,
    SeqCst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Simple,
    Volatile,
    Atomic(AtomicOrdering),
}

impl Access {
    pub fn is_simple(&self) -> bool {
        matches!(self, Access::Simple)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemEffect {
    None,
    Read,
    Write,
    ReadWrite,
}

impl MemEffect {
    pub fn writes(&self) -> bool {
        matches!(self, MemEffect::Write | MemEffect::ReadWrite)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadPredicate {
    pub mask: ValueId,
    pub pass_through: ValueId,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoadInfo {
    pub addr: ValueId,
    pub access: Access,
    pub align: u32,
    pub predicate: Option<LoadPredicate>,
    pub invariant: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreInfo {
    pub addr: ValueId,
    pub val: ValueId,
    pub access: Access,
    pub align: u32,
    pub predicate: Option<ValueId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    // Floating values: never placed in a block.
    Const(i64),
    NullAddr,
    Undef,
    Param {
        index: usize,
    },

    // Per-lane identifier of the executing SIMD lane.
    LaneId,

    Binary {
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
        wrap: Wrap,
    },
    Cast {
        op: CastOp,
        src: ValueId,
    },
    // Indexed addressing: base + sum(steps).
    Index {
        base: ValueId,
        steps: Vec<IndexStep>,
        in_bounds: bool,
    },
    IntToAddr {
        src: ValueId,
    },
    Phi {
        args: Vec<(ValueId, BlockId)>,
    },
    Select {
        cond: ValueId,
        then_val: ValueId,
        else_val: ValueId,
    },
    Call {
        callee: String,
        args: Vec<ValueId>,
        effect: MemEffect,
        // When set, the only memory the call touches is at this address.
        arg_addr: Option<ValueId>,
    },

    Load(LoadInfo),
    Store(StoreInfo),
    Fence,
    DebugMarker,

    ExtractElement {
        vec: ValueId,
        lane: u32,
    },
    InsertElement {
        vec: ValueId,
        elt: ValueId,
        lane: u32,
    },
    ExtractField {
        rec: ValueId,
        path: Vec<u32>,
    },
    InsertField {
        rec: ValueId,
        elt: ValueId,
        path: Vec<u32>,
    },
}

impl ValueKind {
    pub fn is_floating(&self) -> bool {
        matches!(
            self,
            ValueKind::Const(_) | ValueKind::NullAddr | ValueKind::Undef | ValueKind::Param { .. }
        )
    }

    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            ValueKind::Const(_)
            | ValueKind::NullAddr
            | ValueKind::Undef
            | ValueKind::Param { .. }
            | ValueKind::LaneId
            | ValueKind::Fence
            | ValueKind::DebugMarker => Vec::new(),
            ValueKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            ValueKind::Cast { src, .. } | ValueKind::IntToAddr { src } => vec![*src],
            ValueKind::Index { base, steps, .. } => {
                let mut out = vec![*base];
                for s in steps {
                    if let IndexStep::Elem { index, .. } = s {
                        out.push(*index);
                    }
                }
                out
            }
            ValueKind::Phi { args } => args.iter().map(|(v, _)| *v).collect(),
            ValueKind::Select {
                cond,
                then_val,
                else_val,
            } => vec![*cond, *then_val, *else_val],
            ValueKind::Call { args, arg_addr, .. } => {
                let mut out = args.clone();
                if let Some(a) = arg_addr {
                    out.push(*a);
                }
                out
            }
            ValueKind::Load(ld) => {
                let mut out = vec![ld.addr];
                if let Some(p) = ld.predicate {
                    out.push(p.mask);
                    out.push(p.pass_through);
                }
                out
            }
            ValueKind::Store(st) => {
                let mut out = vec![st.addr, st.val];
                if let Some(m) = st.predicate {
                    out.push(m);
                }
                out
            }
            ValueKind::ExtractElement { vec, .. } => vec![*vec],
            ValueKind::InsertElement { vec, elt, .. } => vec![*vec, *elt],
            ValueKind::ExtractField { rec, .. } => vec![*rec],
            ValueKind::InsertField { rec, elt, .. } => vec![*rec, *elt],
        }
    }

    pub fn map_operands(&mut self, mut f: impl FnMut(ValueId) -> ValueId) {
        match self {
            ValueKind::Const(_)
            | ValueKind::NullAddr
            | ValueKind::Undef
            | ValueKind::Param { .. }
            | ValueKind::LaneId
            | ValueKind::Fence
            | ValueKind::DebugMarker => {}
            ValueKind::Binary { lhs, rhs, .. } => {
                *lhs = f(*lhs);
                *rhs = f(*rhs);
            }
            ValueKind::Cast { src, .. } | ValueKind::IntToAddr { src } => *src = f(*src),
            ValueKind::Index { base, steps, .. } => {
                *base = f(*base);
                for s in steps.iter_mut() {
                    if let IndexStep::Elem { index, .. } = s {
                        *index = f(*index);
                    }
                }
            }
            ValueKind::Phi { args } => {
                for (v, _) in args.iter_mut() {
                    *v = f(*v);
                }
            }
            ValueKind::Select {
                cond,
                then_val,
                else_val,
            } => {
                *cond = f(*cond);
                *then_val = f(*then_val);
                *else_val = f(*else_val);
            }
            ValueKind::Call { args, arg_addr, .. } => {
                for a in args.iter_mut() {
                    *a = f(*a);
                }
                if let Some(a) = arg_addr {
                    *a = f(*a);
                }
            }
            ValueKind::Load(ld) => {
                ld.addr = f(ld.addr);
                if let Some(p) = &mut ld.predicate {
                    p.mask = f(p.mask);
                    p.pass_through = f(p.pass_through);
                }
            }
            ValueKind::Store(st) => {
                st.addr = f(st.addr);
                st.val = f(st.val);
                if let Some(m) = &mut st.predicate {
                    *m = f(*m);
                }
            }
            ValueKind::ExtractElement { vec, .. } => *vec = f(*vec),
            ValueKind::InsertElement { vec, elt, .. } => {
                *vec = f(*vec);
                *elt = f(*elt);
            }
            ValueKind::ExtractField { rec, .. } => *rec = f(*rec),
            ValueKind::InsertField { rec, elt, .. } => {
                *rec = f(*rec);
                *elt = f(*elt);
            }
        }
    }

    pub fn may_read_or_write_memory(&self) -> bool {
        match self {
            ValueKind::Load(_) | ValueKind::Store(_) | ValueKind::Fence => true,
            ValueKind::Call { effect, .. } => *effect != MemEffect::None,
            _ => false,
        }
    }

    pub fn may_write_memory(&self) -> bool {
        match self {
            ValueKind::Store(_) | ValueKind::Fence => true,
            // Ordered loads can publish side effects to other lanes.
            ValueKind::Load(ld) => matches!(ld.access, Access::Volatile)
                || matches!(ld.access, Access::Atomic(o) if o != AtomicOrdering::Unordered),
            ValueKind::Call { effect, .. } => effect.writes(),
            _ => false,
        }
    }

    /// Pure values can be deleted once they have no uses.
    pub fn is_pure(&self) -> bool {
        !self.may_read_or_write_memory() && !matches!(self, ValueKind::DebugMarker)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Terminator {
    Goto(BlockId),
    If {
        cond: ValueId,
        then_bb: BlockId,
        else_bb: BlockId,
    },
    Return(Option<ValueId>),
    Unreachable,
}

impl Terminator {
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Terminator::If { cond, .. } => vec![*cond],
            Terminator::Return(Some(v)) => vec![*v],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamInfo {
    pub name: String,
    pub ty: Ty,
    // Pointer parameters marked restrict never alias other restrict params.
    pub restrict: bool,
    pub uniform: bool,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub instrs: Vec<ValueId>, // placed values in program order
    pub term: Terminator,
}

#[derive(Debug, Clone)]
pub struct Value {
    pub id: ValueId,
    pub kind: ValueKind,
    pub ty: Ty,
    pub span: Span,
    pub block: Option<BlockId>, // Owning block for placed values
    pub erased: bool,
}

#[derive(Debug, Clone)]
pub struct FnIR {
    pub name: String,
    pub params: Vec<ParamInfo>,
    pub blocks: Vec<Block>, // indices are BlockIds
    pub values: Vec<Value>, // indices are ValueIds
    pub entry: BlockId,
    pub is_kernel: bool,
}

impl FnIR {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            blocks: Vec::new(),
            values: Vec::new(),
            entry: 0,
            is_kernel: true,
        }
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(Block {
            id,
            instrs: Vec::new(),
            // Set to a real terminator when the block is finalized.
            term: Terminator::Unreachable,
        });
        id
    }

    /// Adds an unplaced value. Only floating kinds should stay unplaced.
    pub fn add_value(&mut self, kind: ValueKind, ty: Ty, span: Span) -> ValueId {
        let id = self.values.len();
        self.values.push(Value {
            id,
            kind,
            ty,
            span,
            block: None,
            erased: false,
        });
        id
    }

    pub fn add_param(&mut self, name: impl Into<String>, ty: Ty, restrict: bool, uniform: bool) -> ValueId {
        let index = self.params.len();
        self.params.push(ParamInfo {
            name: name.into(),
            ty: ty.clone(),
            restrict,
            uniform,
        });
        self.add_value(ValueKind::Param { index }, ty, Span::dummy())
    }

    pub fn iconst(&mut self, v: i64, bits: u16) -> ValueId {
        self.add_value(ValueKind::Const(v), Ty::int(bits), Span::dummy())
    }

    pub fn undef(&mut self, ty: Ty) -> ValueId {
        self.add_value(ValueKind::Undef, ty, Span::dummy())
    }

    pub fn kind(&self, v: ValueId) -> &ValueKind {
        &self.values[v].kind
    }

    pub fn ty(&self, v: ValueId) -> &Ty {
        &self.values[v].ty
    }

    pub fn const_value(&self, v: ValueId) -> Option<i64> {
        match self.values[v].kind {
            ValueKind::Const(c) => Some(c),
            _ => None,
        }
    }

    pub fn load_info(&self, v: ValueId) -> Option<&LoadInfo> {
        match &self.values[v].kind {
            ValueKind::Load(ld) => Some(ld),
            _ => None,
        }
    }

    pub fn store_info(&self, v: ValueId) -> Option<&StoreInfo> {
        match &self.values[v].kind {
            ValueKind::Store(st) => Some(st),
            _ => None,
        }
    }

    /// Address operand of a load or store.
    pub fn access_addr(&self, v: ValueId) -> Option<ValueId> {
        match &self.values[v].kind {
            ValueKind::Load(ld) => Some(ld.addr),
            ValueKind::Store(st) => Some(st.addr),
            _ => None,
        }
    }

    pub fn addr_space(&self, addr: ValueId) -> AddrSpace {
        match self.values[addr].ty {
            Ty::Scalar(ScalarTy::Ptr(space)) => space,
            _ => 0,
        }
    }

    pub fn is_placed(&self, v: ValueId) -> bool {
        self.values[v].block.is_some()
    }

    pub fn live_instrs(&self) -> usize {
        self.blocks.iter().map(|b| b.instrs.len()).sum()
    }
}

/// A compilation unit: functions plus the state shared between them.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub data_layout: DataLayout,
    pub layouts: LayoutCache,
    pub functions: Vec<FnIR>,
}

impl Module {
    pub fn new(data_layout: DataLayout) -> Self {
        Self {
            data_layout,
            layouts: LayoutCache::default(),
            functions: Vec::new(),
        }
    }
}
