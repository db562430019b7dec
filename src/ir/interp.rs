//! Single-lane reference interpreter.
//!
//! Every runtime value is its little-endian byte image, so vector lanes and
//! record fields are plain byte slices. Memory is sparse per address space;
//! bytes that were never written read back as a fixed function of their
//! address, which makes "read before write" observable in comparisons.

use crate::ir::verify::field_ty;
use crate::ir::*;
use crate::utils::{sign_truncate, zero_truncate};
use rustc_hash::FxHashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InterpError {
    #[error("step limit exceeded")]
    StepLimit,
    #[error("value {0} has no runtime value yet")]
    Missing(ValueId),
    #[error("value {0} cannot be interpreted")]
    Unsupported(ValueId),
    #[error("function takes {expected} arguments, got {got}")]
    BadArgs { expected: usize, got: usize },
    #[error("block {0} has no phi input for its predecessor")]
    NoPhiInput(BlockId),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Memory {
    bytes: FxHashMap<(AddrSpace, u64), u8>,
}

impl Memory {
    fn unset(space: AddrSpace, addr: u64) -> u8 {
        (addr as u8).wrapping_mul(31) ^ (space as u8) ^ 0xA5
    }

    pub fn read(&self, space: AddrSpace, addr: u64, len: u64) -> Vec<u8> {
        (0..len)
            .map(|i| {
                let a = addr.wrapping_add(i);
                self.bytes
                    .get(&(space, a))
                    .copied()
                    .unwrap_or_else(|| Self::unset(space, a))
            })
            .collect()
    }

    pub fn write(&mut self, space: AddrSpace, addr: u64, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            self.bytes.insert((space, addr.wrapping_add(i as u64)), *b);
        }
    }

    pub fn write_int(&mut self, space: AddrSpace, addr: u64, v: u64, size: u64) {
        let data: Vec<u8> = v.to_le_bytes()[..size.min(8) as usize].to_vec();
        self.write(space, addr, &data);
    }

    /// Written bytes sorted by location, for whole-memory comparisons.
    pub fn snapshot(&self) -> Vec<((AddrSpace, u64), u8)> {
        let mut out: Vec<_> = self.bytes.iter().map(|(k, v)| (*k, *v)).collect();
        out.sort_unstable();
        out
    }
}

/// Observable outcome of one run: the return value and the final memory image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    pub ret: Option<Vec<u8>>,
    pub memory: Vec<((AddrSpace, u64), u8)>,
}

pub struct Interpreter<'a> {
    fn_ir: &'a FnIR,
    dl: &'a DataLayout,
    lane: u32,
    step_limit: usize,
}

fn as_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    u64::from_le_bytes(buf)
}

fn from_u64(v: u64, size: u64) -> Vec<u8> {
    let mut out = v.to_le_bytes().to_vec();
    out.resize(size as usize, 0);
    out
}

impl<'a> Interpreter<'a> {
    pub fn new(fn_ir: &'a FnIR, dl: &'a DataLayout) -> Self {
        Self {
            fn_ir,
            dl,
            lane: 0,
            step_limit: 100_000,
        }
    }

    pub fn with_lane(mut self, lane: u32) -> Self {
        self.lane = lane;
        self
    }

    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    fn size_of(&self, ty: &Ty) -> u64 {
        self.dl.store_size(ty)
    }

    fn int_bits(&self, ty: &Ty) -> Option<u32> {
        match ty {
            Ty::Scalar(s @ (ScalarTy::Int(_) | ScalarTy::Ptr(_))) if self.dl.scalar_bits(*s) <= 64 => {
                Some(self.dl.scalar_bits(*s))
            }
            _ => None,
        }
    }

    /// Runs the function with scalar integer/pointer arguments.
    pub fn run(&self, args: &[u64], mem: &mut Memory) -> Result<Option<Vec<u8>>, InterpError> {
        let f = self.fn_ir;
        if args.len() != f.params.len() {
            return Err(InterpError::BadArgs {
                expected: f.params.len(),
                got: args.len(),
            });
        }
        let mut env: Vec<Option<Vec<u8>>> = vec![None; f.values.len()];
        for val in &f.values {
            env[val.id] = match &val.kind {
                ValueKind::Const(c) => Some(from_u64(*c as u64, self.size_of(&val.ty))),
                ValueKind::NullAddr => Some(from_u64(0, self.size_of(&val.ty))),
                ValueKind::Undef => Some(vec![0; self.size_of(&val.ty) as usize]),
                ValueKind::Param { index } => Some(from_u64(args[*index], self.size_of(&val.ty))),
                _ => None,
            };
        }

        let mut steps = 0usize;
        let mut prev: Option<BlockId> = None;
        let mut bb = f.entry;
        loop {
            let block = &f.blocks[bb];
            // Phis read their inputs before any of this block's phis write.
            let mut phi_vals = Vec::new();
            for &v in &block.instrs {
                if let ValueKind::Phi { args } = &f.values[v].kind {
                    let pred = prev.ok_or(InterpError::NoPhiInput(bb))?;
                    let (src, _) = args
                        .iter()
                        .find(|(_, p)| *p == pred)
                        .ok_or(InterpError::NoPhiInput(bb))?;
                    phi_vals.push((v, self.get(&env, *src)?));
                }
            }
            for (v, data) in phi_vals {
                env[v] = Some(data);
            }
            for &v in &block.instrs {
                steps += 1;
                if steps > self.step_limit {
                    return Err(InterpError::StepLimit);
                }
                if matches!(f.values[v].kind, ValueKind::Phi { .. }) {
                    continue;
                }
                let out = self.step(v, &env, mem)?;
                env[v] = out;
            }
            match &block.term {
                Terminator::Goto(t) => {
                    prev = Some(bb);
                    bb = *t;
                }
                Terminator::If {
                    cond,
                    then_bb,
                    else_bb,
                } => {
                    let c = as_u64(&self.get(&env, *cond)?) & 1;
                    prev = Some(bb);
                    bb = if c != 0 { *then_bb } else { *else_bb };
                }
                Terminator::Return(Some(v)) => return Ok(Some(self.get(&env, *v)?)),
                Terminator::Return(None) | Terminator::Unreachable => return Ok(None),
            }
            steps += 1;
            if steps > self.step_limit {
                return Err(InterpError::StepLimit);
            }
        }
    }

    /// Runs and captures the observable outcome.
    pub fn trace(&self, args: &[u64], mut mem: Memory) -> Result<Trace, InterpError> {
        let ret = self.run(args, &mut mem)?;
        Ok(Trace {
            ret,
            memory: mem.snapshot(),
        })
    }

    fn get(&self, env: &[Option<Vec<u8>>], v: ValueId) -> Result<Vec<u8>, InterpError> {
        env.get(v)
            .and_then(|x| x.clone())
            .ok_or(InterpError::Missing(v))
    }

    fn step(&self, v: ValueId, env: &[Option<Vec<u8>>], mem: &mut Memory) -> Result<Option<Vec<u8>>, InterpError> {
        let f = self.fn_ir;
        let val = &f.values[v];
        let size = self.size_of(&val.ty);
        let out = match &val.kind {
            ValueKind::Const(_) | ValueKind::NullAddr | ValueKind::Undef | ValueKind::Param { .. } => {
                Some(self.get(env, v)?)
            }
            ValueKind::LaneId => Some(from_u64(self.lane as u64, size)),
            ValueKind::Binary { op, lhs, rhs, .. } => {
                let bits = self
                    .int_bits(&f.values[*lhs].ty)
                    .ok_or(InterpError::Unsupported(v))?;
                let a = as_u64(&self.get(env, *lhs)?);
                let b = as_u64(&self.get(env, *rhs)?);
                let sa = sign_truncate(a as i64, bits);
                let sb = sign_truncate(b as i64, bits);
                let r: u64 = match op {
                    BinOp::Add => a.wrapping_add(b),
                    BinOp::Sub => a.wrapping_sub(b),
                    BinOp::Mul => a.wrapping_mul(b),
                    BinOp::Shl => a.checked_shl(b as u32).unwrap_or(0),
                    BinOp::LShr => zero_truncate(a as i64, bits).checked_shr(b as u32).unwrap_or(0),
                    BinOp::AShr => (sa >> (b as u32).min(63)) as u64,
                    BinOp::And => a & b,
                    BinOp::Or => a | b,
                    BinOp::Xor => a ^ b,
                    BinOp::Eq => (zero_truncate(a as i64, bits) == zero_truncate(b as i64, bits)) as u64,
                    BinOp::Lt => (sa < sb) as u64,
                };
                let out_bits = self.int_bits(&val.ty).unwrap_or(bits);
                Some(from_u64(zero_truncate(r as i64, out_bits), size))
            }
            ValueKind::Cast { op, src } => {
                let data = self.get(env, *src)?;
                match op {
                    CastOp::SExt => {
                        let bits = self
                            .int_bits(&f.values[*src].ty)
                            .ok_or(InterpError::Unsupported(v))?;
                        let s = sign_truncate(as_u64(&data) as i64, bits);
                        Some(from_u64(s as u64, size))
                    }
                    CastOp::ZExt | CastOp::Trunc | CastOp::PtrToInt => {
                        let bits = self.int_bits(&val.ty).ok_or(InterpError::Unsupported(v))?;
                        Some(from_u64(zero_truncate(as_u64(&data) as i64, bits), size))
                    }
                    CastOp::BitCast | CastOp::AddrSpaceCast => {
                        let mut d = data;
                        d.resize(size as usize, 0);
                        Some(d)
                    }
                }
            }
            ValueKind::Index { base, steps, .. } => {
                let bits = self.int_bits(&val.ty).ok_or(InterpError::Unsupported(v))?;
                let mut addr = as_u64(&self.get(env, *base)?);
                for s in steps {
                    match s {
                        IndexStep::Field { offset } => addr = addr.wrapping_add(*offset),
                        IndexStep::Elem { index, elem_size } => {
                            let ibits = self
                                .int_bits(&f.values[*index].ty)
                                .ok_or(InterpError::Unsupported(v))?;
                            let i = sign_truncate(as_u64(&self.get(env, *index)?) as i64, ibits);
                            addr = addr.wrapping_add((i as u64).wrapping_mul(*elem_size));
                        }
                    }
                }
                Some(from_u64(zero_truncate(addr as i64, bits), size))
            }
            ValueKind::IntToAddr { src } => {
                let bits = self.int_bits(&val.ty).ok_or(InterpError::Unsupported(v))?;
                let a = as_u64(&self.get(env, *src)?);
                Some(from_u64(zero_truncate(a as i64, bits), size))
            }
            ValueKind::Phi { .. } => return Err(InterpError::Unsupported(v)),
            ValueKind::Select {
                cond,
                then_val,
                else_val,
            } => {
                let c = as_u64(&self.get(env, *cond)?) & 1;
                Some(self.get(env, if c != 0 { *then_val } else { *else_val })?)
            }
            // Calls are opaque to the interpreter: no memory effect, zero result.
            ValueKind::Call { .. } => Some(vec![0; size as usize]),
            ValueKind::Load(ld) => {
                let enabled = match ld.predicate {
                    Some(p) => as_u64(&self.get(env, p.mask)?) & 1 != 0,
                    None => true,
                };
                match ld.predicate {
                    Some(p) if !enabled => Some(self.get(env, p.pass_through)?),
                    _ => {
                        let addr = as_u64(&self.get(env, ld.addr)?);
                        Some(mem.read(f.addr_space(ld.addr), addr, size))
                    }
                }
            }
            ValueKind::Store(st) => {
                let enabled = match st.predicate {
                    Some(m) => as_u64(&self.get(env, m)?) & 1 != 0,
                    None => true,
                };
                if enabled {
                    let addr = as_u64(&self.get(env, st.addr)?);
                    let data = self.get(env, st.val)?;
                    mem.write(f.addr_space(st.addr), addr, &data);
                }
                None
            }
            ValueKind::Fence | ValueKind::DebugMarker => None,
            ValueKind::ExtractElement { vec, lane } => {
                let data = self.get(env, *vec)?;
                let elem = self.size_of(&val.ty);
                let start = (*lane as u64 * elem) as usize;
                let end = start + elem as usize;
                Some(data.get(start..end).ok_or(InterpError::Unsupported(v))?.to_vec())
            }
            ValueKind::InsertElement { vec, elt, lane } => {
                let mut data = self.get(env, *vec)?;
                let piece = self.get(env, *elt)?;
                let start = (*lane as u64 * piece.len() as u64) as usize;
                let slot = data
                    .get_mut(start..start + piece.len())
                    .ok_or(InterpError::Unsupported(v))?;
                slot.copy_from_slice(&piece);
                Some(data)
            }
            ValueKind::ExtractField { rec, path } => {
                let data = self.get(env, *rec)?;
                let (start, len) = self
                    .field_range(&f.values[*rec].ty, path)
                    .ok_or(InterpError::Unsupported(v))?;
                Some(data.get(start..start + len).ok_or(InterpError::Unsupported(v))?.to_vec())
            }
            ValueKind::InsertField { rec, elt, path } => {
                let mut data = self.get(env, *rec)?;
                let piece = self.get(env, *elt)?;
                let (start, len) = self
                    .field_range(&f.values[*rec].ty, path)
                    .ok_or(InterpError::Unsupported(v))?;
                if len != piece.len() {
                    return Err(InterpError::Unsupported(v));
                }
                let slot = data
                    .get_mut(start..start + len)
                    .ok_or(InterpError::Unsupported(v))?;
                slot.copy_from_slice(&piece);
                Some(data)
            }
        };
        Ok(out)
    }

    fn field_range(&self, ty: &Ty, path: &[u32]) -> Option<(usize, usize)> {
        let leaf = field_ty(ty, path)?;
        let mut rec = ty.as_record()?.clone();
        let mut start = 0u64;
        for (depth, &idx) in path.iter().enumerate() {
            start += self.dl.field_offset(&rec, idx as usize);
            if depth + 1 < path.len() {
                match rec.fields.get(idx as usize)? {
                    RecordField::Nested(inner) => rec = inner.clone(),
                    RecordField::Scalar(_) => return None,
                }
            }
        }
        Some((start as usize, self.size_of(&leaf) as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_see_prior_stores_and_vectors_slice_bytes() {
        let mut f = FnIR::new("interp");
        let bb = f.add_block();
        let p = f.add_param("p", Ty::ptr(1), false, false);
        let ret = {
            let mut b = Builder::at_end(&mut f, bb);
            let four = b.iconst(4, 64);
            let a4 = b.elem_addr(p, four, 1);
            let v = b.iconst(0x0102_0304, 32);
            b.store(a4, v, 4);
            let wide = b.load(p, Ty::vector(ScalarTy::Int(32), 2), 4);
            b.extract_element(wide, 1)
        };
        f.blocks[bb].term = Terminator::Return(Some(ret));
        let dl = DataLayout::default();
        let mut mem = Memory::default();
        let out = Interpreter::new(&f, &dl).run(&[0x1000], &mut mem).unwrap();
        assert_eq!(out, Some(vec![0x04, 0x03, 0x02, 0x01]));
        assert_eq!(mem.read(1, 0x1004, 4), vec![0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn masked_off_load_yields_pass_through() {
        let mut f = FnIR::new("masked");
        let bb = f.add_block();
        let p = f.add_param("p", Ty::ptr(1), false, false);
        let ret = {
            let mut b = Builder::at_end(&mut f, bb);
            let mask = b.iconst(0, 1);
            let pt = b.iconst(77, 32);
            b.load_with(
                LoadInfo {
                    addr: p,
                    access: Access::Simple,
                    align: 4,
                    predicate: Some(LoadPredicate {
                        mask,
                        pass_through: pt,
                    }),
                    invariant: false,
                },
                Ty::int(32),
            )
        };
        f.blocks[bb].term = Terminator::Return(Some(ret));
        let dl = DataLayout::default();
        let out = Interpreter::new(&f, &dl)
            .run(&[0x40], &mut Memory::default())
            .unwrap();
        assert_eq!(out, Some(vec![77, 0, 0, 0]));
    }
}
