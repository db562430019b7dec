use crate::analyze::KnownBitsOracle;
use crate::ir::*;

const MAX_DEPTH: u32 = 6;

/// Known-zero bit tracking over the integer operators address arithmetic
/// uses. Anything it does not model has no known bits.
#[derive(Debug, Clone, Copy, Default)]
pub struct KnownBits;

fn width_mask(bits: u32) -> u64 {
    if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

fn low_mask(n: u32) -> u64 {
    if n >= 64 { u64::MAX } else { (1u64 << n) - 1 }
}

impl KnownBits {
    fn bits_of(fn_ir: &FnIR, v: ValueId) -> u32 {
        match fn_ir.values[v].ty {
            Ty::Scalar(ScalarTy::Int(b)) => b as u32,
            _ => 64,
        }
    }

    /// Mask of bits known to be zero. Bits above the value's width count as
    /// known zero.
    pub fn known_zero_mask(&self, fn_ir: &FnIR, v: ValueId) -> u64 {
        self.zeros(fn_ir, v, 0)
    }

    fn zeros(&self, fn_ir: &FnIR, v: ValueId, depth: u32) -> u64 {
        let above = !width_mask(Self::bits_of(fn_ir, v));
        if depth >= MAX_DEPTH {
            return above;
        }
        let known = match &fn_ir.values[v].kind {
            ValueKind::Const(c) => !(*c as u64),
            ValueKind::NullAddr => u64::MAX,
            ValueKind::Binary { op, lhs, rhs, .. } => {
                let c = fn_ir.const_value(*rhs);
                match (op, c) {
                    (BinOp::Shl, Some(k)) if (0..64).contains(&k) => {
                        (self.zeros(fn_ir, *lhs, depth + 1) << k) | low_mask(k as u32)
                    }
                    (BinOp::LShr, Some(k)) if (0..64).contains(&k) => {
                        let inner = self.zeros(fn_ir, *lhs, depth + 1) | above;
                        (inner >> k) | !(u64::MAX >> k)
                    }
                    (BinOp::Mul, Some(k)) => {
                        let tz = (!self.zeros(fn_ir, *lhs, depth + 1)).trailing_zeros();
                        low_mask(tz + (k as u64).trailing_zeros())
                    }
                    (BinOp::And, _) => {
                        self.zeros(fn_ir, *lhs, depth + 1) | self.zeros(fn_ir, *rhs, depth + 1)
                    }
                    (BinOp::Or, _) | (BinOp::Xor, _) => {
                        self.zeros(fn_ir, *lhs, depth + 1) & self.zeros(fn_ir, *rhs, depth + 1)
                    }
                    (BinOp::Add, _) | (BinOp::Sub, _) => {
                        let a = (!self.zeros(fn_ir, *lhs, depth + 1)).trailing_zeros();
                        let b = (!self.zeros(fn_ir, *rhs, depth + 1)).trailing_zeros();
                        low_mask(a.min(b))
                    }
                    _ => 0,
                }
            }
            ValueKind::Cast {
                op: CastOp::ZExt,
                src,
            } => {
                let src_bits = Self::bits_of(fn_ir, *src);
                self.zeros(fn_ir, *src, depth + 1) | !width_mask(src_bits)
            }
            ValueKind::Cast {
                op: CastOp::Trunc | CastOp::BitCast,
                src,
            } => self.zeros(fn_ir, *src, depth + 1),
            _ => 0,
        };
        known | above
    }
}

impl KnownBitsOracle for KnownBits {
    fn known_zero(&self, fn_ir: &FnIR, v: ValueId, mask: u64) -> bool {
        mask & !self.known_zero_mask(fn_ir, v) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shl_and_mul_clear_low_bits() {
        let mut f = FnIR::new("kb");
        let bb = f.add_block();
        let (shl, mul, or) = {
            let mut b = Builder::at_end(&mut f, bb);
            let x = b.lane_id();
            let two = b.iconst(2, 32);
            let shl = b.binary(BinOp::Shl, x, two, Wrap::NONE);
            let twelve = b.iconst(12, 32);
            let mul = b.binary(BinOp::Mul, x, twelve, Wrap::NONE);
            let one = b.iconst(1, 32);
            let or = b.binary(BinOp::Or, shl, one, Wrap::NONE);
            (shl, mul, or)
        };
        let kb = KnownBits;
        assert!(kb.known_zero(&f, shl, 0b11));
        assert!(!kb.known_zero(&f, shl, 0b100));
        assert!(kb.known_zero(&f, mul, 0b11));
        assert!(!kb.known_zero(&f, or, 0b1));
        assert!(kb.known_zero(&f, or, 0b10));
    }

    #[test]
    fn zext_knows_high_bits() {
        let mut f = FnIR::new("kb_zext");
        let bb = f.add_block();
        let z = {
            let mut b = Builder::at_end(&mut f, bb);
            let x = b.lane_id();
            b.cast(CastOp::ZExt, x, Ty::int(64))
        };
        assert!(KnownBits.known_zero(&f, z, 0xFFFF_FFFF_0000_0000));
        assert!(!KnownBits.known_zero(&f, z, 0x8000_0000));
    }
}
