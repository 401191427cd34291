use std::ops::Range;

/// Provides information on the content of a cell column in a [`CompactHeightfield`](crate::compact_heightfield::CompactHeightfield).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactCell {
    /// Index to the first span in the column.
    index: u32,
    /// Number of spans in the column.
    count: u8,
}

impl CompactCell {
    /// Index to the first span in the column.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Number of spans in the column.
    #[inline]
    pub fn count(&self) -> u8 {
        self.count
    }

    /// The indices of the spans of this column in [`CompactHeightfield::spans`](crate::CompactHeightfield::spans).
    #[inline]
    pub fn index_range(&self) -> Range<usize> {
        let start = self.index as usize;
        start..start + self.count as usize
    }

    #[inline]
    pub(crate) fn set_index(&mut self, index: u32) {
        self.index = index;
    }

    /// Counts one more span in the column. Returns `None` if the column is full.
    #[inline]
    pub(crate) fn try_inc_count(&mut self) -> Option<()> {
        self.count = self.count.checked_add(1)?;
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_range_covers_column() {
        let mut cell = CompactCell::default();
        cell.set_index(4);
        assert_eq!(cell.index_range(), 4..4);
        cell.try_inc_count().unwrap();
        cell.try_inc_count().unwrap();
        assert_eq!(cell.index_range(), 4..6);
    }

    #[test]
    fn count_does_not_overflow() {
        let mut cell = CompactCell::default();
        for _ in 0..u8::MAX {
            cell.try_inc_count().unwrap();
        }
        assert_eq!(cell.try_inc_count(), None);
        assert_eq!(cell.count(), u8::MAX);
    }
}
