use std::ops::{Deref, DerefMut};

use slotmap::SlotMap;

slotmap::new_key_type! {
    /// A key for a span in [`Spans`].
    pub struct SpanKey;
}

/// The arena holding every [`Span`] of a [`Heightfield`](crate::Heightfield).
/// Columns refer to their lowest span by key, and every span refers to the next higher one.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Spans(SlotMap<SpanKey, Span>);

impl Spans {
    const DEFAULT_CAPACITY: usize = 1024;

    pub(crate) fn with_min_capacity(min_capacity: usize) -> Self {
        let capacity = min_capacity.max(Self::DEFAULT_CAPACITY);
        Self(SlotMap::with_capacity_and_key(capacity))
    }
}

impl Deref for Spans {
    type Target = SlotMap<SpanKey, Span>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Spans {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// A builder for [`Span`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanBuilder {
    /// Height of the floor in cell units.
    pub min: u16,
    /// Height of the ceiling in cell units.
    pub max: u16,
    /// The area type of the span.
    pub area: AreaType,
    /// The key of the next-higher span in the column.
    pub next: Option<SpanKey>,
}

impl SpanBuilder {
    /// Builds the span. Heights are clamped to [`Span::MAX_HEIGHT`].
    pub fn build(self) -> Span {
        Span {
            min: self.min.min(Span::MAX_HEIGHT),
            max: self.max.min(Span::MAX_HEIGHT),
            area: self.area,
            next: self.next,
        }
    }
}

impl From<SpanBuilder> for Span {
    fn from(builder: SpanBuilder) -> Self {
        builder.build()
    }
}

/// A solid, vertical `[min, max)` interval in a column of a [`Heightfield`](crate::Heightfield).
/// Build with [`SpanBuilder`]
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Span {
    /// Height of the floor. [Limit: <= [`Span::MAX_HEIGHT`]]
    pub min: u16,
    /// Height of the ceiling. [Limit: <= [`Span::MAX_HEIGHT`]]
    pub max: u16,
    /// Area type ID.
    pub area: AreaType,
    /// The key of the next-higher span in the column
    pub next: Option<SpanKey>,
}

impl Span {
    /// The maximum height a span can reach, in cell units.
    pub const MAX_HEIGHT: u16 = (1 << 13) - 1;

    /// The lower bound of the solid span, in cell heights.
    #[inline]
    pub fn min(&self) -> u16 {
        self.min
    }

    #[inline]
    pub(crate) fn set_min(&mut self, min: u16) {
        self.min = min.min(Self::MAX_HEIGHT);
    }

    /// The upper bound of the solid span, in cell heights.
    #[inline]
    pub fn max(&self) -> u16 {
        self.max
    }

    #[inline]
    pub(crate) fn set_max(&mut self, max: u16) {
        self.max = max.min(Self::MAX_HEIGHT);
    }

    /// The area type of the top surface.
    #[inline]
    pub fn area(&self) -> AreaType {
        self.area
    }

    #[inline]
    pub(crate) fn set_area(&mut self, area: impl Into<AreaType>) {
        self.area = area.into();
    }

    /// The next span higher up in the same column.
    #[inline]
    pub fn next(&self) -> Option<SpanKey> {
        self.next
    }

    #[inline]
    pub(crate) fn set_next(&mut self, next: impl Into<Option<SpanKey>>) {
        self.next = next.into();
    }
}

/// The area classification of a span or polygon.
///
/// `0` is not walkable, `1..=63` are walkable area classes. Larger values saturate to [`AreaType::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct AreaType(pub u8);

impl From<u8> for AreaType {
    fn from(value: u8) -> Self {
        AreaType(value.min(Self::MAX.0))
    }
}

impl Deref for AreaType {
    type Target = u8;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AreaType {
    /// The area type 0. Triangles with this area type are not walkable.
    pub const NOT_WALKABLE: Self = Self(0);
    /// Default area type for walkable triangles. The highest possible area type.
    pub const DEFAULT_WALKABLE: Self = Self::MAX;
    /// The highest representable area type.
    pub const MAX: Self = Self(63);

    /// Returns `true` if the area type is walkable.
    #[inline]
    pub fn is_walkable(&self) -> bool {
        *self != Self::NOT_WALKABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span {
        SpanBuilder {
            min: 2,
            max: 10,
            area: AreaType(4),
            next: None,
        }
        .build()
    }

    #[test]
    fn can_retrieve_span_data_after_building() {
        let span = span();
        assert_eq!(span.min(), 2);
        assert_eq!(span.max(), 10);
        assert_eq!(span.area(), AreaType(4));
        assert_eq!(span.next(), None);
    }

    #[test]
    fn can_retrieve_span_data_after_setting() {
        let mut span = span();
        let mut slotmap = SlotMap::with_key();
        let span_key: SpanKey = slotmap.insert(span.clone());

        span.set_min(1);
        span.set_max(4);
        span.set_area(3);
        span.set_next(span_key);

        assert_eq!(span.min(), 1);
        assert_eq!(span.max(), 4);
        assert_eq!(span.area(), AreaType(3));
        assert_eq!(span.next(), Some(span_key));
    }

    #[test]
    fn heights_are_clamped() {
        let mut span = span();
        span.set_max(u16::MAX);
        assert_eq!(span.max(), Span::MAX_HEIGHT);
    }

    #[test]
    fn area_type_saturates() {
        assert_eq!(AreaType::from(200), AreaType::MAX);
        assert_eq!(AreaType::from(5), AreaType(5));
        assert!(!AreaType::NOT_WALKABLE.is_walkable());
        assert!(AreaType::DEFAULT_WALKABLE.is_walkable());
    }
}
