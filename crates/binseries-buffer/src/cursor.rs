use binseries_core::CodecError;

/// Forward cursor over the records being packed.
///
/// A cursor handed to a pack procedure must already be positioned on a
/// valid record.
pub trait RecordCursor<T> {
    /// The record under the cursor; `ArgumentOutOfRange` once exhausted.
    fn current(&self) -> Result<&T, CodecError>;

    /// Moves to the next record; `false` once the input is exhausted.
    fn advance(&mut self) -> bool;
}

/// Cursor over a slice. [`SliceCursor::position`] is the number of records
/// fully consumed before the current one.
#[derive(Debug, Clone)]
pub struct SliceCursor<'a, T> {
    items: &'a [T],
    pos: usize,
}

impl<'a, T> SliceCursor<'a, T> {
    /// `None` when the slice is empty.
    pub fn new(items: &'a [T]) -> Option<Self> {
        if items.is_empty() {
            return None;
        }
        Some(Self { items, pos: 0 })
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.items.len()
    }
}

impl<T> RecordCursor<T> for SliceCursor<'_, T> {
    #[inline]
    fn current(&self) -> Result<&T, CodecError> {
        self.items.get(self.pos).ok_or_else(|| {
            CodecError::out_of_range("cursor", format!("no record at position {}", self.pos))
        })
    }

    #[inline]
    fn advance(&mut self) -> bool {
        if self.pos < self.items.len() {
            self.pos += 1;
        }
        self.pos < self.items.len()
    }
}

/// Appendable destination for unpacked records.
pub trait ResultSink<T> {
    fn push_record(&mut self, item: T);
}

impl<T> ResultSink<T> for Vec<T> {
    #[inline]
    fn push_record(&mut self, item: T) {
        self.push(item);
    }
}
