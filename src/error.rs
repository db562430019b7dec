use crate::utils::Span;
use thiserror::Error;

pub type MC<T> = Result<T, MCException>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MCCode {
    E3001,   // Malformed input IR
    E3002,   // Unsupported configuration
    ICE9001, // Internal Compiler Error
}

impl MCCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E3001 => "E3001",
            Self::E3002 => "E3002",
            Self::ICE9001 => "ICE9001",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "E3001" => Some(Self::E3001),
            "E3002" => Some(Self::E3002),
            "ICE9001" => Some(Self::ICE9001),
            _ => None,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::ICE9001)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Scan,
    Algebra,
    Merge,
    Bundle,
    Synth,
    Verify,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Scan => "Scan",
            Stage::Algebra => "Algebra",
            Stage::Merge => "Merge",
            Stage::Bundle => "Bundle",
            Stage::Synth => "Synth",
            Stage::Verify => "Verify",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("({module}) error[{}] at {}: {message}", .code.as_str(), .stage.name())]
pub struct MCException {
    pub module: &'static str,
    pub message: String,
    pub code: MCCode,
    pub stage: Stage,
    pub span: Option<Span>,
    pub function: Option<String>,
    pub notes: Vec<String>,
}

impl MCException {
    pub fn new(module: &'static str, code: MCCode, stage: Stage, msg: impl Into<String>) -> Self {
        Self {
            module,
            message: msg.into(),
            code,
            stage,
            span: None,
            function: None,
            notes: Vec::new(),
        }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn in_function(mut self, name: impl Into<String>) -> Self {
        if self.function.is_none() {
            self.function = Some(name.into());
        }
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Multi-line report in the compiler's diagnostic layout.
    pub fn render(&self) -> String {
        let mut out = format!("** ({}) {}\n", self.module, self.message);
        out.push_str(&format!(
            "    error[{}]: {}\n",
            self.code.as_str(),
            self.message
        ));
        let at = match (&self.function, self.span) {
            (Some(f), Some(span)) => format!("{} @ {:?}", f, span),
            (Some(f), None) => f.clone(),
            (None, Some(span)) => format!("{:?}", span),
            (None, None) => "<unknown>".to_string(),
        };
        out.push_str(&format!("    at {} ({})\n", at, self.stage.name()));
        for n in &self.notes {
            out.push_str(&format!("hint: {}\n", n));
        }
        out
    }
}

#[macro_export]
macro_rules! bail {
    ($mod:expr, $code:expr, $stage:expr, $($arg:tt)*) => {
        return Err($crate::error::MCException::new($mod, $code, $stage, format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! ensure {
    ($cond:expr, $mod:expr, $code:expr, $stage:expr, $($arg:tt)*) => {
        if !($cond) {
            return Err($crate::error::MCException::new($mod, $code, $stage, format!($($arg)*)))
        }
    };
}

/// Shorthand for internal invariant checks. There is no safe partial
/// recovery from these, so they always surface as ICE9001.
#[macro_export]
macro_rules! ice_ensure {
    ($cond:expr, $stage:expr, $($arg:tt)*) => {
        if !($cond) {
            return Err($crate::error::MCException::new(
                "InternalError",
                $crate::error::MCCode::ICE9001,
                $stage,
                format!($($arg)*),
            ))
        }
    };
}

pub trait MCCtx<T> {
    fn ctx(self, function: &str, span: Option<Span>) -> MC<T>;
}

impl<T> MCCtx<T> for MC<T> {
    fn ctx(self, function: &str, span: Option<Span>) -> MC<T> {
        self.map_err(|e| {
            let e = e.in_function(function);
            match (e.span, span) {
                (None, Some(s)) => e.at(s),
                _ => e,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing(flag: bool) -> MC<u32> {
        ice_ensure!(flag, Stage::Synth, "lane {} out of range", 7);
        Ok(1)
    }

    #[test]
    fn ice_macro_produces_internal_error() {
        let err = failing(false).unwrap_err();
        assert!(err.code.is_internal());
        assert_eq!(err.stage, Stage::Synth);
        assert!(err.message.contains("lane 7"));
        assert_eq!(failing(true).unwrap(), 1);
    }

    #[test]
    fn ctx_attaches_function_and_span_once() {
        let err = failing(false)
            .ctx("kernel_a", Some(Span::new(4, 2)))
            .ctx("outer", None)
            .unwrap_err();
        assert_eq!(err.function.as_deref(), Some("kernel_a"));
        assert_eq!(err.span, Some(Span::new(4, 2)));
        let text = err.render();
        assert!(text.contains("error[ICE9001]"));
        assert!(text.contains("kernel_a @ 4:2"));
    }

    #[test]
    fn codes_round_trip_through_strings() {
        for code in [MCCode::E3001, MCCode::E3002, MCCode::ICE9001] {
            assert_eq!(MCCode::from_str(code.as_str()), Some(code));
        }
        assert_eq!(MCCode::from_str("E0000"), None);
    }
}
