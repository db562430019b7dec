use std::fmt;

/// Source location attached to IR values. Carried through merges so the
/// wide access reports the location of the access it replaces.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub line: u32,
    pub col: u32,
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

impl Span {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }

    pub fn dummy() -> Self {
        Self::default()
    }

    pub fn is_dummy(&self) -> bool {
        self.line == 0 && self.col == 0
    }

    // Prefer the real location when one side is synthetic.
    pub fn or(self, other: Span) -> Span {
        if self.is_dummy() { other } else { self }
    }
}

pub(crate) fn sign_truncate(v: i64, bits: u32) -> i64 {
    if bits >= 64 || bits == 0 {
        return v;
    }
    let shift = 64 - bits;
    (v << shift) >> shift
}

pub(crate) fn zero_truncate(v: i64, bits: u32) -> u64 {
    if bits >= 64 {
        return v as u64;
    }
    if bits == 0 {
        return 0;
    }
    (v as u64) & ((1u64 << bits) - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_helpers_respect_width() {
        assert_eq!(sign_truncate(0xFF, 8), -1);
        assert_eq!(sign_truncate(0x7F, 8), 0x7F);
        assert_eq!(sign_truncate(-5, 64), -5);
        assert_eq!(zero_truncate(-1, 16), 0xFFFF);
        assert_eq!(zero_truncate(0x1_0000_0001, 32), 1);
    }

    #[test]
    fn span_or_prefers_real_location() {
        let real = Span::new(3, 4);
        assert_eq!(Span::dummy().or(real), real);
        assert_eq!(real.or(Span::new(9, 9)), real);
    }
}
