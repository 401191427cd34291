use std::collections::TryReserveError;

use crate::{
    Aabb3d,
    compact_cell::CompactCell,
    compact_span::CompactSpan,
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    region::RegionId,
    span::AreaType,
};

/// A packed representation of a [`Heightfield`].
///
/// Only the walkable spans survive, and each span describes the open space above a floor
/// instead of the solid space. Spans are linked to their neighbors in the four cardinal directions.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactHeightfield {
    /// The width of the heightfield along the x-axis in cell units
    pub width: u16,
    /// The height of the heightfield along the z-axis in cell units
    pub height: u16,
    /// The walkable height used during the build of the field
    pub walkable_height: u16,
    /// The walkable climb used during the build of the field.
    pub walkable_climb: u16,
    /// The AABB border size used during the build of the field.
    pub border_size: u16,
    /// The maximum distance value of any span within the field.
    pub max_distance: u16,
    /// The maximum region id of any span within the field.
    pub max_region: RegionId,
    /// The AABB of the heightfield
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
    /// The cells in the heightfield [Size: `width * height`]
    pub cells: Vec<CompactCell>,
    /// All walkable spans in the heightfield
    pub spans: Vec<CompactSpan>,
    /// Vector containing border distance data. [Size: `spans.len()`]
    pub dist: Vec<u16>,
    /// Vector containing area type data. [Size: `spans.len()`]
    pub areas: Vec<AreaType>,
}

impl Heightfield {
    /// Builds a [`CompactHeightfield`] out of the walkable spans of this heightfield.
    ///
    /// # Arguments
    ///
    /// - `walkable_height`: Minimum floor to 'ceiling' height that will still allow the floor area to be considered walkable. [Limit: >= 3] [Units: vx]
    /// - `walkable_climb`: Maximum ledge height that is considered to still be traversable. [Limit: >=0] [Units: vx]
    ///
    /// # Errors
    ///
    /// Returns an error if a column has too many layers or the buffers could not be allocated.
    pub fn into_compact(
        self,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Result<CompactHeightfield, CompactHeightfieldError> {
        CompactHeightfield::from_heightfield(self, walkable_height, walkable_climb)
    }
}

impl CompactHeightfield {
    /// Top of the open space above the highest span of a column.
    const MAX_HEIGHT: u16 = u16::MAX;

    /// Builds a compact heightfield from a heightfield.
    ///
    /// See [`Heightfield::into_compact`].
    ///
    /// # Errors
    ///
    /// Returns an error if the heightfield has too many layers.
    pub fn from_heightfield(
        heightfield: Heightfield,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Result<Self, CompactHeightfieldError> {
        let walkable_span_count = heightfield.walkable_span_count();
        let column_count = heightfield.width as usize * heightfield.height as usize;

        let mut cells = Vec::new();
        cells.try_reserve_exact(column_count)?;
        cells.resize(column_count, CompactCell::default());
        let mut spans = Vec::new();
        spans.try_reserve_exact(walkable_span_count)?;
        let mut areas = Vec::new();
        areas.try_reserve_exact(walkable_span_count)?;

        let mut aabb = heightfield.aabb;
        aabb.max.y += walkable_height as f32 * heightfield.cell_height;

        // Fill in cells and spans
        for z in 0..heightfield.height {
            for x in 0..heightfield.width {
                let column_index = heightfield.column_index(x, z);
                let cell = &mut cells[column_index];
                cell.set_index(spans.len() as u32);

                for span in heightfield.column_spans(x, z) {
                    if !span.area().is_walkable() {
                        continue;
                    }
                    if cell.try_inc_count().is_none() {
                        return Err(CompactHeightfieldError::TooManySpansInColumn { x, z });
                    }
                    let bot = span.max();
                    let top = span
                        .next()
                        .map(|next| heightfield.span(next).min())
                        .unwrap_or(Self::MAX_HEIGHT);
                    let mut compact_span = CompactSpan::default();
                    compact_span.y = bot;
                    let height = top.saturating_sub(bot).min(u8::MAX.into()) as u8;
                    compact_span.set_height(height);
                    spans.push(compact_span);
                    areas.push(span.area());
                }
            }
        }

        let mut compact_heightfield = Self {
            width: heightfield.width,
            height: heightfield.height,
            walkable_height,
            walkable_climb,
            border_size: 0,
            max_distance: 0,
            max_region: RegionId::NONE,
            aabb,
            cell_size: heightfield.cell_size,
            cell_height: heightfield.cell_height,
            cells,
            spans,
            dist: Vec::new(),
            areas,
        };
        compact_heightfield.connect_neighbors()?;
        Ok(compact_heightfield)
    }

    /// Find neighbour connections
    fn connect_neighbors(&mut self) -> Result<(), CompactHeightfieldError> {
        let mut max_layer_index = 0_usize;
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = *self.cell_at(x, z);
                for i in cell.index_range() {
                    for dir in 0..4_u8 {
                        self.spans[i].set_con(dir, None);
                        let neighbor_x = x as i32 + dir_offset_x(dir) as i32;
                        let neighbor_z = z as i32 + dir_offset_z(dir) as i32;
                        // First check that the neighbour cell is in bounds.
                        if !self.contains(neighbor_x, neighbor_z) {
                            continue;
                        }

                        // Iterate over all neighbour spans and check if any of them is
                        // accessible from the current cell.
                        let span = &self.spans[i];
                        let span_top = span.y as i32 + span.height() as i32;
                        let neighbor_cell = self.cell_at(neighbor_x as u16, neighbor_z as u16);
                        let mut connection = None;
                        for k in neighbor_cell.index_range() {
                            let neighbor_span = &self.spans[k];
                            let bot = span.y.max(neighbor_span.y) as i32;
                            let top =
                                span_top.min(neighbor_span.y as i32 + neighbor_span.height() as i32);

                            // Check that the gap between the spans is walkable,
                            // and that the climb height between the gaps is not too high.
                            let is_walkable = (top - bot) >= self.walkable_height as i32;
                            let is_climbable = (neighbor_span.y as i32 - span.y as i32).abs()
                                <= self.walkable_climb as i32;
                            if !is_walkable || !is_climbable {
                                continue;
                            }
                            // Mark direction as walkable.
                            let layer_index = k - neighbor_cell.index() as usize;
                            if layer_index > CompactSpan::MAX_LAYERS as usize {
                                max_layer_index = max_layer_index.max(layer_index);
                                continue;
                            }
                            connection = Some(layer_index as u8);
                            break;
                        }
                        self.spans[i].set_con(dir, connection);
                    }
                }
            }
        }
        if max_layer_index > CompactSpan::MAX_LAYERS as usize {
            return Err(CompactHeightfieldError::TooManyLayers {
                max_layer_index: CompactSpan::MAX_LAYERS,
                layer_index: max_layer_index as u32,
            });
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

    /// Returns the cell at the given coordinates. Returns `None` if the coordinates are invalid.
    #[inline]
    pub fn get_cell_at(&self, x: u16, z: u16) -> Option<&CompactCell> {
        if x >= self.width || z >= self.height {
            return None;
        }
        self.cells.get(self.column_index(x, z))
    }

    /// Returns the cell at the given coordinates. Panics if the coordinates are invalid.
    #[inline]
    pub fn cell_at(&self, x: u16, z: u16) -> &CompactCell {
        &self.cells[self.column_index(x, z)]
    }

    /// Returns the position and span index of the neighbor reached from the span at `(x, z)`
    /// by walking in `dir` over the connection `con`.
    #[inline]
    pub(crate) fn con_indices(&self, x: i32, z: i32, dir: u8, con: u8) -> (i32, i32, usize) {
        let a_x = x + dir_offset_x(dir) as i32;
        let a_z = z + dir_offset_z(dir) as i32;
        let cell = &self.cells[(a_x + a_z * self.width as i32) as usize];
        (a_x, a_z, cell.index() as usize + con as usize)
    }

    /// Returns the span index of the neighbor of span `span_index` at `(x, z)` in `dir`, if connected.
    #[inline]
    pub(crate) fn neighbor_index(
        &self,
        x: i32,
        z: i32,
        span_index: usize,
        dir: u8,
    ) -> Option<(i32, i32, usize)> {
        let con = self.spans[span_index].con(dir)?;
        Some(self.con_indices(x, z, dir, con))
    }

    /// The number of walkable spans in the field.
    #[inline]
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }
}

/// Errors that can occur when building a compact heightfield.
#[derive(Debug, thiserror::Error)]
pub enum CompactHeightfieldError {
    /// The heightfield has too many layers.
    #[error(
        "Heightfield has too many layers. Max layer index is {max_layer_index}, but got {layer_index}"
    )]
    TooManyLayers {
        /// The maximum layer index.
        max_layer_index: u8,
        /// The layer index that caused the error.
        layer_index: u32,
    },
    /// A single column holds more walkable spans than a [`CompactCell`] can count.
    #[error("Column at x={x}, z={z} has more than 255 walkable spans")]
    TooManySpansInColumn {
        /// The x-coordinate of the column
        x: u16,
        /// The z-coordinate of the column
        z: u16,
    },
    /// The buffers of the compact heightfield could not be allocated.
    #[error("Failed to allocate compact heightfield: {0}")]
    AllocationFailed(#[from] TryReserveError),
}

#[cfg(test)]
pub(crate) mod tests {
    use glam::Vec3;

    use super::*;
    use crate::{
        HeightfieldBuilder,
        heightfield::SpanInsertion,
        span::{AreaType, SpanBuilder},
    };

    /// A heightfield of `width * height` columns with a single walkable floor span per column.
    /// `floor` returns the top of the floor for a column, or `None` to leave the column empty.
    pub(crate) fn floor_heightfield(
        width: u16,
        height: u16,
        floor: impl Fn(u16, u16) -> Option<u16>,
    ) -> Heightfield {
        stacked_heightfield(width, height, |x, z| {
            floor(x, z).map(|top| (0, top)).into_iter().collect()
        })
    }

    /// A heightfield of `width * height` columns whose walkable spans are given as `(min, max)` pairs per column.
    pub(crate) fn stacked_heightfield(
        width: u16,
        height: u16,
        spans: impl Fn(u16, u16) -> Vec<(u16, u16)>,
    ) -> Heightfield {
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3::ZERO, [width as f32, 40.0, height as f32]),
            cell_size: 1.0,
            cell_height: 0.5,
        }
        .build()
        .unwrap();
        for z in 0..height {
            for x in 0..width {
                for (min, max) in spans(x, z) {
                    heightfield
                        .add_span(SpanInsertion {
                            x,
                            z,
                            flag_merge_threshold: 1,
                            span: SpanBuilder {
                                min,
                                max,
                                area: AreaType::DEFAULT_WALKABLE,
                                next: None,
                            }
                            .build(),
                        })
                        .unwrap();
                }
            }
        }
        heightfield
    }

    /// A flat compact heightfield of `width * height` cells.
    pub(crate) fn flat_compact(width: u16, height: u16) -> CompactHeightfield {
        floor_heightfield(width, height, |_, _| Some(2))
            .into_compact(4, 2)
            .unwrap()
    }

    #[test]
    fn one_span_per_floor_column() {
        let chf = flat_compact(4, 3);
        assert_eq!(chf.spans.len(), 12);
        assert_eq!(chf.areas.len(), 12);
        for cell in &chf.cells {
            assert_eq!(cell.count(), 1);
        }
        for span in &chf.spans {
            assert_eq!(span.y, 2);
            assert_eq!(span.height(), u8::MAX);
        }
    }

    #[test]
    fn connects_interior_neighbors_only() {
        let chf = flat_compact(3, 3);
        let center = chf.cell_at(1, 1).index() as usize;
        for dir in 0..4 {
            assert_eq!(chf.spans[center].con(dir), Some(0));
        }
        let corner = chf.cell_at(0, 0).index() as usize;
        // West and south lead out of the field.
        assert_eq!(chf.spans[corner].con(0), None);
        assert_eq!(chf.spans[corner].con(3), None);
        assert_eq!(chf.spans[corner].con(1), Some(0));
        assert_eq!(chf.spans[corner].con(2), Some(0));
    }

    #[test]
    fn steps_higher_than_climb_are_not_connected() {
        let heightfield = floor_heightfield(2, 1, |x, _| Some(if x == 0 { 2 } else { 8 }));
        let chf = heightfield.into_compact(4, 2).unwrap();
        assert_eq!(chf.spans[0].con(2), None);
        assert_eq!(chf.spans[1].con(0), None);
    }

    #[test]
    fn expands_aabb_by_walkable_height() {
        let chf = flat_compact(2, 2);
        assert_eq!(chf.aabb.max.y, 40.0 + 4.0 * 0.5);
    }

    #[test]
    fn clearance_is_measured_to_next_span() {
        let mut heightfield = floor_heightfield(1, 1, |_, _| Some(2));
        heightfield
            .add_span(SpanInsertion {
                x: 0,
                z: 0,
                flag_merge_threshold: 1,
                span: SpanBuilder {
                    min: 12,
                    max: 14,
                    area: AreaType::NOT_WALKABLE,
                    next: None,
                }
                .build(),
            })
            .unwrap();
        let chf = heightfield.into_compact(4, 2).unwrap();
        assert_eq!(chf.spans.len(), 1);
        assert_eq!(chf.spans[0].height(), 10);
    }
}
