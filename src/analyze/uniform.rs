use crate::analyze::UniformityOracle;
use crate::ir::*;

/// Per-value "same on every lane" facts.
///
/// Computed once per function by optimistic fixpoint: everything starts
/// uniform and is demoted until stable. Values created after the analysis
/// ran are answered structurally from their operands.
#[derive(Debug, Clone)]
pub struct UniformityInfo {
    states: Vec<bool>,
}

fn seed(fn_ir: &FnIR, val: &Value) -> Option<bool> {
    match &val.kind {
        ValueKind::Const(_) | ValueKind::NullAddr | ValueKind::Undef => Some(true),
        ValueKind::Param { index } => Some(fn_ir.params.get(*index).is_some_and(|p| p.uniform)),
        ValueKind::LaneId => Some(false),
        // Calls with memory effects may return lane-dependent data.
        ValueKind::Call { effect, .. } if *effect != MemEffect::None => Some(false),
        ValueKind::Load(ld) if !ld.access.is_simple() => Some(false),
        _ => None,
    }
}

impl UniformityInfo {
    pub fn compute(fn_ir: &FnIR) -> Self {
        let mut states = vec![true; fn_ir.values.len()];
        for val in &fn_ir.values {
            if let Some(s) = seed(fn_ir, val) {
                states[val.id] = s;
            }
        }

        let mut changed = true;
        while changed {
            changed = false;
            for val in &fn_ir.values {
                if val.erased || !states[val.id] || seed(fn_ir, val).is_some() {
                    continue;
                }
                let joined = val.kind.operands().iter().all(|&op| states[op]);
                if !joined {
                    states[val.id] = false;
                    changed = true;
                }
            }
        }

        Self { states }
    }

    fn structural(&self, fn_ir: &FnIR, v: ValueId, depth: u32) -> bool {
        if let Some(&s) = self.states.get(v) {
            return s;
        }
        let val = &fn_ir.values[v];
        if let Some(s) = seed(fn_ir, val) {
            return s;
        }
        if depth > 32 {
            return false;
        }
        val.kind
            .operands()
            .iter()
            .all(|&op| self.structural(fn_ir, op, depth + 1))
    }
}

impl UniformityOracle for UniformityInfo {
    fn is_uniform(&self, fn_ir: &FnIR, v: ValueId) -> bool {
        self.structural(fn_ir, v, 0)
    }
}
