use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

pub type AddrSpace = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarTy {
    Int(u16),
    Float(u16),
    Ptr(AddrSpace),
}

impl ScalarTy {
    pub fn is_ptr(&self) -> bool {
        matches!(self, ScalarTy::Ptr(_))
    }

    pub fn is_int(&self) -> bool {
        matches!(self, ScalarTy::Int(_))
    }

    pub fn int_bits(&self) -> Option<u16> {
        match self {
            ScalarTy::Int(b) => Some(*b),
            _ => None,
        }
    }
}

/// Grouping discriminator of a layout record. Two records with identical
/// fields but different roles are distinct types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Bundle,
    SubSlot,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordField {
    Scalar(ScalarTy),
    Nested(Arc<LayoutRecord>),
}

/// Packed aggregate synthesized for merged values with heterogeneous members.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayoutRecord {
    pub fields: Vec<RecordField>,
    pub packed: bool,
    pub kind: RecordKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    Void,
    Scalar(ScalarTy),
    Vector { elem: ScalarTy, lanes: u32 },
    Record(Arc<LayoutRecord>),
}

impl Ty {
    pub fn int(bits: u16) -> Self {
        Ty::Scalar(ScalarTy::Int(bits))
    }

    pub fn float(bits: u16) -> Self {
        Ty::Scalar(ScalarTy::Float(bits))
    }

    pub fn ptr(space: AddrSpace) -> Self {
        Ty::Scalar(ScalarTy::Ptr(space))
    }

    pub fn vector(elem: ScalarTy, lanes: u32) -> Self {
        Ty::Vector { elem, lanes }
    }

    /// Element type of a vector, or the type itself for scalars.
    pub fn scalar(&self) -> Option<ScalarTy> {
        match self {
            Ty::Scalar(s) => Some(*s),
            Ty::Vector { elem, .. } => Some(*elem),
            _ => None,
        }
    }

    pub fn lanes(&self) -> u32 {
        match self {
            Ty::Vector { lanes, .. } => *lanes,
            _ => 1,
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Ty::Vector { .. })
    }

    pub fn as_record(&self) -> Option<&Arc<LayoutRecord>> {
        match self {
            Ty::Record(r) => Some(r),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarTy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarTy::Int(b) => write!(f, "i{}", b),
            ScalarTy::Float(b) => write!(f, "f{}", b),
            ScalarTy::Ptr(s) => write!(f, "ptr({})", s),
        }
    }
}

impl fmt::Display for LayoutRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (open, close) = if self.packed { ("<{", "}>") } else { ("{", "}") };
        write!(f, "{}", open)?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match field {
                RecordField::Scalar(s) => write!(f, "{}", s)?,
                RecordField::Nested(r) => write!(f, "{}", r)?,
            }
        }
        write!(f, "{}", close)
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Void => write!(f, "void"),
            Ty::Scalar(s) => write!(f, "{}", s),
            Ty::Vector { elem, lanes } => write!(f, "<{} x {}>", lanes, elem),
            Ty::Record(r) => write!(f, "{}", r),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerWidth {
    pub memory_bits: u32,
    pub register_bits: u32,
}

/// Target data layout: pointer widths per address space. Pointers whose
/// register width differs from their memory width are never coalesced.
#[derive(Debug, Clone)]
pub struct DataLayout {
    pub default_pointer: PointerWidth,
    pub pointers: FxHashMap<AddrSpace, PointerWidth>,
}

impl Default for DataLayout {
    fn default() -> Self {
        let mut pointers = FxHashMap::default();
        // Shared local memory addresses are 32-bit in registers and memory.
        pointers.insert(
            3,
            PointerWidth {
                memory_bits: 32,
                register_bits: 32,
            },
        );
        Self {
            default_pointer: PointerWidth {
                memory_bits: 64,
                register_bits: 64,
            },
            pointers,
        }
    }
}

impl DataLayout {
    pub fn pointer(&self, space: AddrSpace) -> PointerWidth {
        self.pointers
            .get(&space)
            .copied()
            .unwrap_or(self.default_pointer)
    }

    pub fn set_pointer(&mut self, space: AddrSpace, memory_bits: u32, register_bits: u32) {
        self.pointers.insert(
            space,
            PointerWidth {
                memory_bits,
                register_bits,
            },
        );
    }

    pub fn has_reduced_pointer(&self, space: AddrSpace) -> bool {
        let w = self.pointer(space);
        w.memory_bits != w.register_bits
    }

    pub fn scalar_bits(&self, s: ScalarTy) -> u32 {
        match s {
            ScalarTy::Int(b) | ScalarTy::Float(b) => b as u32,
            ScalarTy::Ptr(space) => self.pointer(space).memory_bits,
        }
    }

    pub fn scalar_store_size(&self, s: ScalarTy) -> u64 {
        (self.scalar_bits(s) as u64).div_ceil(8)
    }

    pub fn store_size(&self, ty: &Ty) -> u64 {
        match ty {
            Ty::Void => 0,
            Ty::Scalar(s) => self.scalar_store_size(*s),
            Ty::Vector { elem, lanes } => self.scalar_store_size(*elem) * *lanes as u64,
            Ty::Record(r) => self.record_size(r),
        }
    }

    pub fn record_size(&self, rec: &LayoutRecord) -> u64 {
        rec.fields.iter().map(|f| self.field_size(f)).sum()
    }

    pub fn field_size(&self, field: &RecordField) -> u64 {
        match field {
            RecordField::Scalar(s) => self.scalar_store_size(*s),
            RecordField::Nested(r) => self.record_size(r),
        }
    }

    /// Byte offset of field `idx`. Records are always packed.
    pub fn field_offset(&self, rec: &LayoutRecord, idx: usize) -> u64 {
        rec.fields[..idx].iter().map(|f| self.field_size(f)).sum()
    }

    pub fn same_size(&self, a: ScalarTy, b: ScalarTy) -> bool {
        a == b || self.scalar_store_size(a) == self.scalar_store_size(b)
    }
}

/// Module-wide interner for layout records. Structurally equal records
/// share one `Arc`, so type equality on merged values stays cheap.
#[derive(Debug, Clone, Default)]
pub struct LayoutCache {
    records: FxHashMap<LayoutRecord, Arc<LayoutRecord>>,
    order: Vec<Arc<LayoutRecord>>,
}

impl LayoutCache {
    pub fn intern(&mut self, rec: LayoutRecord) -> Arc<LayoutRecord> {
        if let Some(existing) = self.records.get(&rec) {
            return existing.clone();
        }
        let shared = Arc::new(rec.clone());
        self.records.insert(rec, shared.clone());
        self.order.push(shared.clone());
        shared
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<LayoutRecord>> {
        self.order.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_sizes_follow_pointer_widths() {
        let mut dl = DataLayout::default();
        assert_eq!(dl.store_size(&Ty::ptr(1)), 8);
        assert_eq!(dl.store_size(&Ty::ptr(3)), 4);
        assert_eq!(dl.store_size(&Ty::vector(ScalarTy::Float(32), 4)), 16);
        dl.set_pointer(5, 64, 32);
        assert!(dl.has_reduced_pointer(5));
        assert!(!dl.has_reduced_pointer(1));
    }

    #[test]
    fn packed_record_offsets_accumulate() {
        let dl = DataLayout::default();
        let inner = Arc::new(LayoutRecord {
            fields: vec![
                RecordField::Scalar(ScalarTy::Int(8)),
                RecordField::Scalar(ScalarTy::Int(16)),
                RecordField::Scalar(ScalarTy::Int(8)),
            ],
            packed: true,
            kind: RecordKind::SubSlot,
        });
        let outer = LayoutRecord {
            fields: vec![
                RecordField::Scalar(ScalarTy::Float(32)),
                RecordField::Nested(inner),
                RecordField::Scalar(ScalarTy::Int(32)),
            ],
            packed: true,
            kind: RecordKind::Bundle,
        };
        assert_eq!(dl.record_size(&outer), 12);
        assert_eq!(dl.field_offset(&outer, 2), 8);
        assert_eq!(outer.to_string(), "<{f32, <{i8, i16, i8}>, i32}>");
    }

    #[test]
    fn layout_cache_dedups_structurally() {
        let mut cache = LayoutCache::default();
        let mk = |kind| LayoutRecord {
            fields: vec![
                RecordField::Scalar(ScalarTy::Int(16)),
                RecordField::Scalar(ScalarTy::Int(16)),
            ],
            packed: true,
            kind,
        };
        let a = cache.intern(mk(RecordKind::Bundle));
        let b = cache.intern(mk(RecordKind::Bundle));
        let c = cache.intern(mk(RecordKind::SubSlot));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);
    }
}
