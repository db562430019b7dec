#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use memcoal::ir::interp::{Interpreter, Memory};
use memcoal::ir::*;
use memcoal::{CoalesceConfig, Coalescer, Strategy};

const TYPES: [ScalarTy; 5] = [
    ScalarTy::Int(8),
    ScalarTy::Int(16),
    ScalarTy::Int(32),
    ScalarTy::Int(64),
    ScalarTy::Float(32),
];

#[derive(Arbitrary, Debug)]
enum Op {
    Load { base: bool, off: u8, ty: u8 },
    Store { base: bool, off: u8, ty: u8, src: u8 },
    Fence,
}

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    ops: Vec<Op>,
    uniform: bool,
    overlap: bool,
    bundle: bool,
    window: u8,
}

fn build(input: &FuzzInput) -> FnIR {
    let mut f = FnIR::new("fuzz");
    let bb = f.add_block();
    let p = f.add_param("p", Ty::ptr(1), false, input.uniform);
    let q = f.add_param("q", Ty::ptr(1), false, input.uniform);
    {
        let mut b = Builder::at_end(&mut f, bb);
        let mut loaded: Vec<(ValueId, ScalarTy)> = Vec::new();
        for op in input.ops.iter().take(64) {
            match *op {
                Op::Load { base, off, ty } => {
                    let s = TYPES[ty as usize % TYPES.len()];
                    let addr = address(&mut b, if base { q } else { p }, off);
                    let v = b.load(addr, Ty::Scalar(s), align_of(s, off));
                    loaded.push((v, s));
                }
                Op::Store { base, off, ty, src } => {
                    let s = TYPES[ty as usize % TYPES.len()];
                    let same: Vec<ValueId> = loaded.iter().filter(|(_, t)| *t == s).map(|(v, _)| *v).collect();
                    let (val, s) = match same.len() {
                        0 => {
                            let bits = DataLayout::default().scalar_bits(s) as u16;
                            (b.iconst(src as i64 * 0x0101, bits), ScalarTy::Int(bits))
                        }
                        n => (same[src as usize % n], s),
                    };
                    let addr = address(&mut b, if base { q } else { p }, off);
                    b.store(addr, val, align_of(s, off));
                }
                Op::Fence => {
                    b.fence();
                }
            }
        }
    }
    f.blocks[bb].term = Terminator::Return(None);
    f
}

fn address(b: &mut Builder<'_>, base: ValueId, off: u8) -> ValueId {
    let off = (off % 48) as i64;
    if off == 0 {
        return base;
    }
    let k = b.iconst(off, 64);
    b.elem_addr(base, k, 1)
}

fn align_of(s: ScalarTy, off: u8) -> u32 {
    let size = DataLayout::default().scalar_store_size(s) as u32;
    let off = (off % 48) as u32;
    if off == 0 { size } else { size.min(1 << off.trailing_zeros()) }
}

fuzz_target!(|input: FuzzInput| {
    let dl = DataLayout::default();
    let original = build(&input);
    let args = [0x1000u64, if input.overlap { 0x1008 } else { 0x2000 }];
    let Ok(expected) = Interpreter::new(&original, &dl)
        .with_step_limit(1 << 12)
        .trace(&args, Memory::default())
    else {
        return;
    };

    let strategy = if input.bundle { Strategy::Bundle } else { Strategy::Window };
    let cfg = CoalesceConfig {
        verify: true,
        window_size: 1 + input.window as usize,
        ..CoalesceConfig::default()
    }
    .with_strategy(strategy);

    let mut f = original.clone();
    Coalescer::new(cfg)
        .run_function(&mut f, &dl, &mut LayoutCache::default())
        .expect("coalescing keeps the IR well formed");
    let got = Interpreter::new(&f, &dl)
        .trace(&args, Memory::default())
        .expect("coalesced IR still runs");
    assert_eq!(got, expected, "coalescing changed observable behavior:\n{f}");
});
