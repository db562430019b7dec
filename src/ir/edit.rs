use crate::ir::*;
use crate::utils::Span;

impl FnIR {
    /// Index of a placed value inside its block.
    pub fn position(&self, v: ValueId) -> Option<usize> {
        let bb = self.values[v].block?;
        self.blocks[bb].instrs.iter().position(|&i| i == v)
    }

    pub fn insert_at(&mut self, block: BlockId, idx: usize, v: ValueId) {
        self.blocks[block].instrs.insert(idx, v);
        self.values[v].block = Some(block);
    }

    pub fn append(&mut self, block: BlockId, v: ValueId) {
        self.blocks[block].instrs.push(v);
        self.values[v].block = Some(block);
    }

    /// Removes a placed value from its block. The arena slot stays so ids
    /// remain stable.
    pub fn erase(&mut self, v: ValueId) {
        if let Some(bb) = self.values[v].block.take() {
            self.blocks[bb].instrs.retain(|&i| i != v);
        }
        self.values[v].erased = true;
    }

    pub fn replace_all_uses(&mut self, old: ValueId, new: ValueId) -> usize {
        let mut replaced = 0usize;
        for val in self.values.iter_mut() {
            if val.erased || val.id == old {
                continue;
            }
            val.kind.map_operands(|op| {
                if op == old {
                    replaced += 1;
                    new
                } else {
                    op
                }
            });
        }
        for block in self.blocks.iter_mut() {
            match &mut block.term {
                Terminator::If { cond, .. } if *cond == old => {
                    *cond = new;
                    replaced += 1;
                }
                Terminator::Return(Some(v)) if *v == old => {
                    *v = new;
                    replaced += 1;
                }
                _ => {}
            }
        }
        replaced
    }

    pub fn users(&self, v: ValueId) -> Vec<ValueId> {
        self.values
            .iter()
            .filter(|u| !u.erased && u.kind.operands().contains(&v))
            .map(|u| u.id)
            .collect()
    }

    pub fn use_count(&self, v: ValueId) -> usize {
        let mut n = 0;
        for u in &self.values {
            if u.erased {
                continue;
            }
            n += u.kind.operands().iter().filter(|&&op| op == v).count();
        }
        for block in &self.blocks {
            n += block.term.operands().iter().filter(|&&op| op == v).count();
        }
        n
    }

    /// Erases `root` if it is a placed pure value with no remaining uses,
    /// then does the same for its operands. Returns the number erased.
    pub fn delete_trivially_dead(&mut self, root: ValueId) -> usize {
        let mut erased = 0;
        let mut work = vec![root];
        while let Some(v) = work.pop() {
            let val = &self.values[v];
            if val.erased || val.block.is_none() || !val.kind.is_pure() {
                continue;
            }
            if self.use_count(v) != 0 {
                continue;
            }
            let ops = val.kind.operands();
            self.erase(v);
            erased += 1;
            work.extend(ops);
        }
        erased
    }

    /// True when `a` is available at the position of `b`: floating, or
    /// placed earlier in the same block.
    pub fn available_before(&self, a: ValueId, b: ValueId) -> bool {
        let va = &self.values[a];
        if va.kind.is_floating() {
            return true;
        }
        match (va.block, self.values[b].block) {
            (Some(ba), Some(bb)) if ba == bb => {
                match (self.position(a), self.position(b)) {
                    (Some(pa), Some(pb)) => pa < pb,
                    _ => false,
                }
            }
            // Definitions from other blocks are assumed to dominate; the
            // pass never moves values across blocks.
            (Some(_), Some(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPoint {
    Before(ValueId),
    End(BlockId),
}

/// Creates values and places them at an insertion point. Consecutive
/// emissions keep program order.
pub struct Builder<'f> {
    pub fn_ir: &'f mut FnIR,
    point: InsertPoint,
    span: Span,
}

impl<'f> Builder<'f> {
    pub fn before(fn_ir: &'f mut FnIR, anchor: ValueId) -> Self {
        let span = fn_ir.values[anchor].span;
        Self {
            fn_ir,
            point: InsertPoint::Before(anchor),
            span,
        }
    }

    pub fn at_end(fn_ir: &'f mut FnIR, block: BlockId) -> Self {
        Self {
            fn_ir,
            point: InsertPoint::End(block),
            span: Span::dummy(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn emit(&mut self, kind: ValueKind, ty: Ty) -> ValueId {
        let floating = kind.is_floating();
        let v = self.fn_ir.add_value(kind, ty, self.span);
        if floating {
            return v;
        }
        match self.point {
            InsertPoint::Before(anchor) => {
                // An unplaced anchor leaves `v` unplaced; the verifier
                // reports it as a dangling instruction.
                if let Some(bb) = self.fn_ir.values[anchor].block
                    && let Some(idx) = self.fn_ir.position(anchor)
                {
                    self.fn_ir.insert_at(bb, idx, v);
                }
            }
            InsertPoint::End(bb) => self.fn_ir.append(bb, v),
        }
        v
    }

    pub fn iconst(&mut self, v: i64, bits: u16) -> ValueId {
        self.fn_ir.iconst(v, bits)
    }

    pub fn undef(&mut self, ty: Ty) -> ValueId {
        self.fn_ir.undef(ty)
    }

    pub fn null(&mut self, space: AddrSpace) -> ValueId {
        self.fn_ir
            .add_value(ValueKind::NullAddr, Ty::ptr(space), Span::dummy())
    }

    pub fn lane_id(&mut self) -> ValueId {
        self.emit(ValueKind::LaneId, Ty::int(32))
    }

    pub fn binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId, wrap: Wrap) -> ValueId {
        let ty = match op {
            BinOp::Eq | BinOp::Lt => Ty::int(1),
            _ => self.fn_ir.values[lhs].ty.clone(),
        };
        self.emit(ValueKind::Binary { op, lhs, rhs, wrap }, ty)
    }

    pub fn add(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Add, lhs, rhs, Wrap::NONE)
    }

    pub fn cast(&mut self, op: CastOp, src: ValueId, ty: Ty) -> ValueId {
        self.emit(ValueKind::Cast { op, src }, ty)
    }

    pub fn index(&mut self, base: ValueId, steps: Vec<IndexStep>, in_bounds: bool) -> ValueId {
        let ty = self.fn_ir.values[base].ty.clone();
        self.emit(
            ValueKind::Index {
                base,
                steps,
                in_bounds,
            },
            ty,
        )
    }

    /// `base + index * elem_size`
    pub fn elem_addr(&mut self, base: ValueId, index: ValueId, elem_size: u64) -> ValueId {
        self.index(base, vec![IndexStep::Elem { index, elem_size }], true)
    }

    pub fn int_to_addr(&mut self, src: ValueId, space: AddrSpace) -> ValueId {
        self.emit(ValueKind::IntToAddr { src }, Ty::ptr(space))
    }

    pub fn load(&mut self, addr: ValueId, ty: Ty, align: u32) -> ValueId {
        self.load_with(
            LoadInfo {
                addr,
                access: Access::Simple,
                align,
                predicate: None,
                invariant: false,
            },
            ty,
        )
    }

    pub fn load_with(&mut self, info: LoadInfo, ty: Ty) -> ValueId {
        self.emit(ValueKind::Load(info), ty)
    }

    pub fn store(&mut self, addr: ValueId, val: ValueId, align: u32) -> ValueId {
        self.store_with(StoreInfo {
            addr,
            val,
            access: Access::Simple,
            align,
            predicate: None,
        })
    }

    pub fn store_with(&mut self, info: StoreInfo) -> ValueId {
        self.emit(ValueKind::Store(info), Ty::Void)
    }

    pub fn call(&mut self, callee: &str, args: Vec<ValueId>, effect: MemEffect, ty: Ty) -> ValueId {
        self.emit(
            ValueKind::Call {
                callee: callee.to_string(),
                args,
                effect,
                arg_addr: None,
            },
            ty,
        )
    }

    pub fn fence(&mut self) -> ValueId {
        self.emit(ValueKind::Fence, Ty::Void)
    }

    pub fn debug_marker(&mut self) -> ValueId {
        self.emit(ValueKind::DebugMarker, Ty::Void)
    }

    pub fn extract_element(&mut self, vec: ValueId, lane: u32) -> ValueId {
        let ty = match self.fn_ir.values[vec].ty {
            Ty::Vector { elem, .. } => Ty::Scalar(elem),
            ref other => other.clone(),
        };
        self.emit(ValueKind::ExtractElement { vec, lane }, ty)
    }

    pub fn insert_element(&mut self, vec: ValueId, elt: ValueId, lane: u32) -> ValueId {
        let ty = self.fn_ir.values[vec].ty.clone();
        self.emit(ValueKind::InsertElement { vec, elt, lane }, ty)
    }

    pub fn extract_field(&mut self, rec: ValueId, path: Vec<u32>, ty: Ty) -> ValueId {
        self.emit(ValueKind::ExtractField { rec, path }, ty)
    }

    pub fn insert_field(&mut self, rec: ValueId, elt: ValueId, path: Vec<u32>) -> ValueId {
        let ty = self.fn_ir.values[rec].ty.clone();
        self.emit(ValueKind::InsertField { rec, elt, path }, ty)
    }

    /// Reinterprets `v` as `dest` of the same store size, going through an
    /// integer when a pointer is involved.
    pub fn bit_or_pointer_cast(&mut self, v: ValueId, dest: ScalarTy, dl: &DataLayout) -> ValueId {
        let src = match self.fn_ir.values[v].ty.scalar() {
            Some(s) if !self.fn_ir.values[v].ty.is_vector() => s,
            _ => return v,
        };
        if src == dest {
            return v;
        }
        let int_of = |s: ScalarTy| Ty::int(dl.scalar_bits(s) as u16);
        match (src, dest) {
            (ScalarTy::Ptr(a), ScalarTy::Ptr(b)) if a != b => {
                self.cast(CastOp::AddrSpaceCast, v, Ty::Scalar(dest))
            }
            (ScalarTy::Ptr(_), ScalarTy::Int(_)) => self.cast(CastOp::PtrToInt, v, Ty::Scalar(dest)),
            (ScalarTy::Ptr(_), ScalarTy::Float(_)) => {
                let i = self.cast(CastOp::PtrToInt, v, int_of(dest));
                self.cast(CastOp::BitCast, i, Ty::Scalar(dest))
            }
            (ScalarTy::Int(_), ScalarTy::Ptr(space)) => self.int_to_addr(v, space),
            (ScalarTy::Float(_), ScalarTy::Ptr(space)) => {
                let i = self.cast(CastOp::BitCast, v, int_of(src));
                self.int_to_addr(i, space)
            }
            _ => self.cast(CastOp::BitCast, v, Ty::Scalar(dest)),
        }
    }
}
