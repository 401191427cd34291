//! The heightfield module contains the types and functions for working with [`Heightfield`]s.
//!
//! A heightfield is a 3D grid of [`Span`]s, where each column contains 0, 1, or more spans.

use std::collections::TryReserveError;

use thiserror::Error;

use crate::{
    Aabb3d,
    span::{Span, SpanKey, Spans},
};

/// A dynamic heightfield representing obstructed space.
///
/// Build with [`HeightfieldBuilder`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Heightfield {
    /// The width of the heightfield along the x-axis in cell units
    pub width: u16,
    /// The height of the heightfield along the z-axis in cell units
    pub height: u16,
    /// The AABB of the heightfield
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
    /// The indices to the spans in the heightfield in width*height order
    /// Each index corresponds to a column in the heightfield by pointing to the lowest span in the column
    pub spans: Vec<Option<SpanKey>>,
    /// All spans in the heightfield
    pub allocated_spans: Spans,
}

impl Heightfield {
    /// Inserts a span into its column, merging it with every span it overlaps.
    #[inline]
    pub(crate) fn add_span(&mut self, insertion: SpanInsertion) -> Result<(), SpanInsertionError> {
        if insertion.x >= self.width || insertion.z >= self.height {
            return Err(SpanInsertionError::ColumnIndexOutOfBounds {
                x: insertion.x,
                z: insertion.z,
            });
        }
        let column_index = self.column_index(insertion.x, insertion.z);

        let mut new_span = insertion.span;
        let mut previous_span_key = None;
        let mut current_span_key_iter = self.spans[column_index];
        // Insert the new span, possibly merging it with existing spans.
        while let Some(current_span_key) = current_span_key_iter {
            let current_span = self.span(current_span_key);
            if current_span.min() > new_span.max() {
                // Current span is completely above the new span, break.
                break;
            }
            if current_span.max() < new_span.min() {
                // Current span is completely below the new span. Keep going.
                previous_span_key.replace(current_span_key);
                current_span_key_iter = current_span.next();
                continue;
            }
            // The new span overlaps with an existing span. Merge them.
            if current_span.min() < new_span.min() {
                new_span.set_min(current_span.min());
            }
            if current_span.max() > new_span.max() {
                new_span.set_max(current_span.max());
            }

            // Merge flags.
            if (new_span.max() as i32 - current_span.max() as i32).unsigned_abs()
                <= insertion.flag_merge_threshold as u32
            {
                // Higher area ID numbers indicate higher resolution priority.
                let area = new_span.area().max(current_span.area());
                new_span.set_area(area);
            }

            // Remove the current span since it's now merged with new_span.
            // Keep going because there might be other overlapping spans that also need to be merged.
            let next_key = current_span.next();
            self.allocated_spans.remove(current_span_key);
            if let Some(previous_span_key) = previous_span_key {
                self.span_mut(previous_span_key).set_next(next_key);
            } else {
                self.spans[column_index] = next_key;
            }
            current_span_key_iter = next_key;
        }

        if let Some(previous_span_key) = previous_span_key {
            // Insert new span after prev
            new_span.set_next(self.span(previous_span_key).next());
            let new_span_key = self.allocated_spans.insert(new_span);
            self.span_mut(previous_span_key).set_next(new_span_key);
        } else {
            // This span should go before the others in the list
            let lowest_span_key = self.spans[column_index];
            new_span.set_next(lowest_span_key);
            let new_span_key = self.allocated_spans.insert(new_span);
            self.spans[column_index] = Some(new_span_key);
        }

        Ok(())
    }

    #[inline]
    pub(crate) fn column_index(&self, x: u16, z: u16) -> usize {
        x as usize + z as usize * self.width as usize
    }

    #[inline]
    pub(crate) fn contains(&self, x: i32, z: i32) -> bool {
        x >= 0 && x < self.width as i32 && z >= 0 && z < self.height as i32
    }

    /// Returns the key of the lowest span in the column at the given coordinates.
    /// `None` if either the index is out of bounds or there is no span in the column.
    #[inline]
    pub fn span_key_at(&self, x: u16, z: u16) -> Option<SpanKey> {
        if x >= self.width || z >= self.height {
            return None;
        }
        self.spans[self.column_index(x, z)]
    }

    /// Returns the lowest span at the given coordinates.
    /// `None` if either the index is out of bounds or there is no span in the column.
    #[inline]
    pub fn span_at(&self, x: u16, z: u16) -> Option<&Span> {
        let span_key = self.span_key_at(x, z)?;
        Some(self.span(span_key))
    }

    /// Returns a reference to the span with the given key.
    /// # Panics
    /// Panics if the key is not found.
    #[inline]
    pub fn span(&self, key: SpanKey) -> &Span {
        &self.allocated_spans[key]
    }

    /// Returns a mutable reference to the span with the given key.
    /// # Panics
    /// Panics if the key is not found.
    #[inline]
    pub fn span_mut(&mut self, key: SpanKey) -> &mut Span {
        &mut self.allocated_spans[key]
    }

    /// Iterates over the keys of the spans of a column, from bottom to top.
    pub fn column_span_keys(&self, x: u16, z: u16) -> impl Iterator<Item = SpanKey> + '_ {
        std::iter::successors(self.span_key_at(x, z), |key| self.span(*key).next())
    }

    /// Iterates over the spans of a column, from bottom to top.
    pub fn column_spans(&self, x: u16, z: u16) -> impl Iterator<Item = &Span> + '_ {
        self.column_span_keys(x, z).map(|key| self.span(key))
    }

    /// Counts the spans that are walkable.
    pub fn walkable_span_count(&self) -> usize {
        self.allocated_spans
            .values()
            .filter(|span| span.area().is_walkable())
            .count()
    }
}

/// Calculates the grid size of a field covering `aabb` with cells of `cell_size`.
/// Returns the `(width, height)` of the grid in cells along the x and z axes.
pub fn calc_grid_size(aabb: &Aabb3d, cell_size: f32) -> (u32, u32) {
    let width = ((aabb.max.x - aabb.min.x) / cell_size + 0.5) as u32;
    let height = ((aabb.max.z - aabb.min.z) / cell_size + 0.5) as u32;
    (width, height)
}

/// A builder for [`Heightfield`]s.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightfieldBuilder {
    /// The AABB of the heightfield
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
}

impl HeightfieldBuilder {
    /// Builds the heightfield.
    ///
    /// # Errors
    ///
    /// Returns an error if the cell dimensions or the AABB are invalid, if the grid is empty or too large,
    /// or if the column storage could not be allocated.
    pub fn build(self) -> Result<Heightfield, HeightfieldBuilderError> {
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(HeightfieldBuilderError::InvalidCellSize(self.cell_size));
        }
        if !(self.cell_height.is_finite() && self.cell_height > 0.0) {
            return Err(HeightfieldBuilderError::InvalidCellHeight(self.cell_height));
        }
        if !self.aabb.is_finite() {
            return Err(HeightfieldBuilderError::InvalidAabb(self.aabb));
        }
        let (width, height) = calc_grid_size(&self.aabb, self.cell_size);
        if width == 0 || height == 0 {
            return Err(HeightfieldBuilderError::EmptyGrid { width, height });
        }
        if width > u16::MAX as u32 || height > u16::MAX as u32 {
            return Err(HeightfieldBuilderError::ColumnCountTooLarge { width, height });
        }
        let column_count = width as usize * height as usize;
        let mut spans = Vec::new();
        spans.try_reserve_exact(column_count)?;
        spans.resize(column_count, None);
        Ok(Heightfield {
            width: width as u16,
            height: height as u16,
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            spans,
            allocated_spans: Spans::with_min_capacity(column_count),
        })
    }
}

/// Errors that can occur when building a [`Heightfield`] with [`HeightfieldBuilder::build`].
#[derive(Error, Debug)]
pub enum HeightfieldBuilderError {
    /// The cell size is not a positive, finite number.
    #[error("Cell size must be positive and finite, got {0}")]
    InvalidCellSize(f32),
    /// The cell height is not a positive, finite number.
    #[error("Cell height must be positive and finite, got {0}")]
    InvalidCellHeight(f32),
    /// The AABB contains non-finite coordinates.
    #[error("AABB must be finite, got {0:?}")]
    InvalidAabb(Aabb3d),
    /// The AABB is too small to contain a single cell.
    #[error("Grid must contain at least one cell, got {width}x{height}")]
    EmptyGrid {
        /// The width of the heightfield along the x-axis in cell units
        width: u32,
        /// The height of the heightfield along the z-axis in cell units
        height: u32,
    },
    /// Happens when the column count is too large.
    #[error("Grid is too large, got {width}x{height} but the max side length is {max}", max = u16::MAX)]
    ColumnCountTooLarge {
        /// The width of the heightfield along the x-axis in cell units
        width: u32,
        /// The height of the heightfield along the z-axis in cell units
        height: u32,
    },
    /// The column storage could not be allocated.
    #[error("Failed to allocate heightfield columns: {0}")]
    AllocationFailed(#[from] TryReserveError),
}

/// Errors that can occur when inserting a span into a [`Heightfield`]
#[derive(Error, Debug)]
pub enum SpanInsertionError {
    /// Happens when the column index is out of bounds.
    #[error("column index out of bounds: x={x}, z={z}")]
    ColumnIndexOutOfBounds {
        /// The x-coordinate of the span
        x: u16,
        /// The z-coordinate of the span
        z: u16,
    },
}

pub(crate) struct SpanInsertion {
    /// The x-coordinate of the span
    pub(crate) x: u16,
    /// The z-coordinate of the span
    pub(crate) z: u16,
    /// Maximum difference between the ceilings of two spans to merge area type IDs
    pub(crate) flag_merge_threshold: u16,
    /// The span to insert
    pub(crate) span: Span,
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use crate::span::{AreaType, SpanBuilder};

    use super::*;

    fn height_field() -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3::ZERO, [5.0, 5.0, 5.0]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap()
    }

    fn span_low() -> SpanBuilder {
        SpanBuilder {
            min: 2,
            max: 4,
            area: AreaType(2),
            next: None,
        }
    }

    fn span_mid() -> SpanBuilder {
        SpanBuilder {
            min: 4,
            max: 7,
            area: AreaType(2),
            next: None,
        }
    }

    fn span_high() -> SpanBuilder {
        SpanBuilder {
            min: 7,
            max: 10,
            area: AreaType(2),
            next: None,
        }
    }

    fn insert(heightfield: &mut Heightfield, x: u16, z: u16, span: Span, threshold: u16) {
        heightfield
            .add_span(SpanInsertion {
                x,
                z,
                flag_merge_threshold: threshold,
                span,
            })
            .unwrap();
    }

    #[test]
    fn grid_size_matches_bounds() {
        let aabb = Aabb3d::new(Vec3::ZERO, [10.0, 5.0, 20.0]);
        assert_eq!(calc_grid_size(&aabb, 1.0), (10, 20));
        assert_eq!(calc_grid_size(&aabb, 0.5), (20, 40));
    }

    #[test]
    fn rejects_invalid_dimensions() {
        let aabb = Aabb3d::new(Vec3::ZERO, [5.0, 5.0, 5.0]);
        let invalid_cell_size = HeightfieldBuilder {
            aabb,
            cell_size: 0.0,
            cell_height: 1.0,
        }
        .build();
        assert!(matches!(
            invalid_cell_size,
            Err(HeightfieldBuilderError::InvalidCellSize(_))
        ));

        let nan_cell_height = HeightfieldBuilder {
            aabb,
            cell_size: 1.0,
            cell_height: f32::NAN,
        }
        .build();
        assert!(matches!(
            nan_cell_height,
            Err(HeightfieldBuilderError::InvalidCellHeight(_))
        ));

        let empty = HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3::ZERO, [0.1, 5.0, 5.0]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build();
        assert!(matches!(empty, Err(HeightfieldBuilderError::EmptyGrid { .. })));
    }

    #[test]
    fn can_add_span() {
        let mut heightfield = height_field();
        let expected_span = span_low().build();
        insert(&mut heightfield, 1, 3, expected_span.clone(), 0);
        let span = heightfield.span_at(1, 3).unwrap();
        assert_eq!(*span, expected_span);

        let empty_span = heightfield.span_at(3, 1);
        assert_eq!(empty_span, None);
    }

    #[test]
    fn rejects_out_of_bounds_span() {
        let mut heightfield = height_field();
        let result = heightfield.add_span(SpanInsertion {
            x: 5,
            z: 0,
            flag_merge_threshold: 0,
            span: span_low().build(),
        });
        assert!(matches!(
            result,
            Err(SpanInsertionError::ColumnIndexOutOfBounds { x: 5, z: 0 })
        ));
    }

    #[test]
    fn can_add_higher_span_in_same_column() {
        let mut heightfield = height_field();
        let span_low = span_low().build();
        insert(&mut heightfield, 1, 3, span_low.clone(), 0);
        let span_high = span_high().build();
        insert(&mut heightfield, 1, 3, span_high.clone(), 0);

        let spans: Vec<_> = heightfield.column_spans(1, 3).collect();
        assert_eq!(spans.len(), 2);
        assert_eq_without_next(spans[0], &span_low);
        assert_eq_without_next(spans[1], &span_high);
    }

    #[test]
    fn can_add_lower_span_in_same_column() {
        let mut heightfield = height_field();
        let span_high = span_high().build();
        insert(&mut heightfield, 1, 3, span_high.clone(), 0);
        let span_low = span_low().build();
        insert(&mut heightfield, 1, 3, span_low.clone(), 0);

        let spans: Vec<_> = heightfield.column_spans(1, 3).collect();
        assert_eq!(spans.len(), 2);
        assert_eq_without_next(spans[0], &span_low);
        assert_eq_without_next(spans[1], &span_high);
    }

    #[test]
    fn can_merge_spans() {
        let mut heightfield = height_field();
        let span_low = span_low().build();
        insert(&mut heightfield, 1, 3, span_low.clone(), 0);
        let span_mid: Span = span_mid().build();
        insert(&mut heightfield, 1, 3, span_mid.clone(), 0);

        let merged_span = SpanBuilder {
            min: span_low.min(),
            max: span_mid.max(),
            area: span_mid.area(),
            next: None,
        }
        .build();

        let span = heightfield.span_at(1, 3).unwrap();
        assert_eq!(*span, merged_span);
        assert_eq!(heightfield.allocated_spans.len(), 1);
    }

    #[test]
    fn merged_area_prefers_higher_id_within_threshold() {
        let mut heightfield = height_field();
        let walkable = SpanBuilder {
            min: 2,
            max: 5,
            area: AreaType::DEFAULT_WALKABLE,
            next: None,
        }
        .build();
        let obstacle = SpanBuilder {
            min: 3,
            max: 6,
            area: AreaType::NOT_WALKABLE,
            next: None,
        }
        .build();
        insert(&mut heightfield, 0, 0, walkable, 1);
        insert(&mut heightfield, 0, 0, obstacle.clone(), 1);
        let span = heightfield.span_at(0, 0).unwrap();
        assert_eq!(span.area(), AreaType::DEFAULT_WALKABLE);
        assert_eq!((span.min(), span.max()), (2, 6));

        // Outside of the threshold, the top span decides.
        let mut heightfield = height_field();
        let walkable = SpanBuilder {
            min: 2,
            max: 3,
            area: AreaType::DEFAULT_WALKABLE,
            next: None,
        }
        .build();
        insert(&mut heightfield, 0, 0, walkable, 1);
        insert(&mut heightfield, 0, 0, obstacle, 1);
        let span = heightfield.span_at(0, 0).unwrap();
        assert_eq!(span.area(), AreaType::NOT_WALKABLE);
    }

    #[track_caller]
    fn assert_eq_without_next(span: &Span, expected_span: &Span) {
        assert_eq!(span.min(), expected_span.min(), "min is not equal");
        assert_eq!(span.max(), expected_span.max(), "max is not equal");
        assert_eq!(span.area(), expected_span.area(), "area is not equal");
    }
}
