use crate::ir::*;
use std::fmt::{self, Write};

fn operand(fn_ir: &FnIR, v: ValueId) -> String {
    match &fn_ir.values[v].kind {
        ValueKind::Const(c) => format!("{}", c),
        ValueKind::NullAddr => "null".to_string(),
        ValueKind::Undef => "undef".to_string(),
        ValueKind::Param { index } => match fn_ir.params.get(*index) {
            Some(p) => format!("%{}", p.name),
            None => format!("%arg{}", index),
        },
        _ => format!("%{}", v),
    }
}

fn binop_name(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::Mul => "mul",
        BinOp::Shl => "shl",
        BinOp::LShr => "lshr",
        BinOp::AShr => "ashr",
        BinOp::And => "and",
        BinOp::Or => "or",
        BinOp::Xor => "xor",
        BinOp::Eq => "eq",
        BinOp::Lt => "lt",
    }
}

fn cast_name(op: CastOp) -> &'static str {
    match op {
        CastOp::Trunc => "trunc",
        CastOp::SExt => "sext",
        CastOp::ZExt => "zext",
        CastOp::BitCast => "bitcast",
        CastOp::PtrToInt => "ptrtoint",
        CastOp::AddrSpaceCast => "addrspacecast",
    }
}

fn access_name(access: Access) -> &'static str {
    match access {
        Access::Simple => "",
        Access::Volatile => " volatile",
        Access::Atomic(_) => " atomic",
    }
}

/// Renders one placed value the way it appears in a dump.
pub fn render_value(fn_ir: &FnIR, v: ValueId) -> String {
    let val = &fn_ir.values[v];
    let op = |x: ValueId| operand(fn_ir, x);
    let body = match &val.kind {
        ValueKind::Const(c) => format!("const {}", c),
        ValueKind::NullAddr => "null".to_string(),
        ValueKind::Undef => "undef".to_string(),
        ValueKind::Param { index } => format!("param {}", index),
        ValueKind::LaneId => "lane.id".to_string(),
        ValueKind::Binary { op: bop, lhs, rhs, wrap } => {
            let mut flags = String::new();
            if wrap.nuw {
                flags.push_str(" nuw");
            }
            if wrap.nsw {
                flags.push_str(" nsw");
            }
            format!("{}{} {}, {}", binop_name(*bop), flags, op(*lhs), op(*rhs))
        }
        ValueKind::Cast { op: cop, src } => format!("{} {}", cast_name(*cop), op(*src)),
        ValueKind::Index {
            base,
            steps,
            in_bounds,
        } => {
            let mut s = format!("index{} {}", if *in_bounds { " inbounds" } else { "" }, op(*base));
            for step in steps {
                match step {
                    IndexStep::Field { offset } => {
                        let _ = write!(s, ", +{}", offset);
                    }
                    IndexStep::Elem { index, elem_size } => {
                        let _ = write!(s, ", {}*{}", op(*index), elem_size);
                    }
                }
            }
            s
        }
        ValueKind::IntToAddr { src } => format!("inttoaddr {}", op(*src)),
        ValueKind::Phi { args } => {
            let parts: Vec<String> = args
                .iter()
                .map(|(a, b)| format!("[{}, bb{}]", op(*a), b))
                .collect();
            format!("phi {}", parts.join(", "))
        }
        ValueKind::Select {
            cond,
            then_val,
            else_val,
        } => format!("select {}, {}, {}", op(*cond), op(*then_val), op(*else_val)),
        ValueKind::Call { callee, args, .. } => {
            let parts: Vec<String> = args.iter().map(|a| op(*a)).collect();
            format!("call {}({})", callee, parts.join(", "))
        }
        ValueKind::Load(ld) => {
            let mut s = format!("load{} {}, {} align {}", access_name(ld.access), val.ty, op(ld.addr), ld.align);
            if let Some(p) = ld.predicate {
                let _ = write!(s, " if {} else {}", op(p.mask), op(p.pass_through));
            }
            if ld.invariant {
                s.push_str(" !invariant");
            }
            return format!("%{} = {}", v, s);
        }
        ValueKind::Store(st) => {
            let mut s = format!(
                "store{} {} {}, {} align {}",
                access_name(st.access),
                fn_ir.values[st.val].ty,
                op(st.val),
                op(st.addr),
                st.align
            );
            if let Some(m) = st.predicate {
                let _ = write!(s, " if {}", op(m));
            }
            return s;
        }
        ValueKind::Fence => return "fence".to_string(),
        ValueKind::DebugMarker => return "dbg.marker".to_string(),
        ValueKind::ExtractElement { vec, lane } => format!("extractelement {}, {}", op(*vec), lane),
        ValueKind::InsertElement { vec, elt, lane } => {
            format!("insertelement {}, {}, {}", op(*vec), op(*elt), lane)
        }
        ValueKind::ExtractField { rec, path } => format!("extractfield {}, {:?}", op(*rec), path),
        ValueKind::InsertField { rec, elt, path } => {
            format!("insertfield {}, {}, {:?}", op(*rec), op(*elt), path)
        }
    };
    format!("%{} = {} : {}", v, body, val.ty)
}

impl fmt::Display for FnIR {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                let mut s = format!("%{}: {}", p.name, p.ty);
                if p.restrict {
                    s.push_str(" restrict");
                }
                if p.uniform {
                    s.push_str(" uniform");
                }
                s
            })
            .collect();
        writeln!(
            f,
            "fn {}({}){} {{",
            self.name,
            params.join(", "),
            if self.is_kernel { " kernel" } else { "" }
        )?;
        for block in &self.blocks {
            writeln!(f, "bb{}:", block.id)?;
            for &v in &block.instrs {
                writeln!(f, "  {}", render_value(self, v))?;
            }
            let term = match &block.term {
                Terminator::Goto(t) => format!("goto bb{}", t),
                Terminator::If {
                    cond,
                    then_bb,
                    else_bb,
                } => format!("if {} then bb{} else bb{}", operand(self, *cond), then_bb, else_bb),
                Terminator::Return(Some(v)) => format!("ret {}", operand(self, *v)),
                Terminator::Return(None) => "ret".to_string(),
                Terminator::Unreachable => "unreachable".to_string(),
            };
            writeln!(f, "  {}", term)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_shows_loads_and_stores() {
        let mut f = FnIR::new("k");
        let bb = f.add_block();
        let p = f.add_param("buf", Ty::ptr(1), true, false);
        {
            let mut b = Builder::at_end(&mut f, bb);
            let four = b.iconst(4, 64);
            let a = b.elem_addr(p, four, 1);
            let x = b.load(a, Ty::int(32), 4);
            b.store(p, x, 4);
        }
        f.blocks[bb].term = Terminator::Return(None);
        let text = f.to_string();
        assert!(text.starts_with("fn k(%buf: ptr(1) restrict) kernel {"));
        assert!(text.contains("index inbounds %buf, 4*1"));
        assert!(text.contains("load i32, %"));
        assert!(text.contains("store i32 %"));
        assert!(text.trim_end().ends_with("ret\n}"));
    }
}
