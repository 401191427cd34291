//! Filters that run on the [`Heightfield`] before it is compacted.
//!
//! The conservative voxelization marks too many spans as walkable.
//! These filters remove the walkable flag from spans where an agent cannot possibly stand.

use crate::{
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    span::AreaType,
};

impl Heightfield {
    /// Top of the open space above the highest span of a column.
    const MAX_HEIGHT: i32 = 0xffff;

    /// Marks non-walkable spans as walkable if their maximum is within `walkable_climb` of the span below them.
    ///
    /// This removes small obstacles and rasterization artifacts that the agent would be able to walk over
    /// such as curbs. It also allows agents to move up terraced structures like stairs.
    ///
    /// Obstacle spans are marked walkable if: `obstacle_span.max - walkable_span.max < walkable_climb`
    ///
    /// # Arguments
    ///
    /// - `walkable_climb`: Maximum ledge height that is considered to still be traversable. [Limit: >=0] [Units: vx]
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb: u16) {
        for z in 0..self.height {
            for x in 0..self.width {
                let mut previous_max = None;
                let mut previous_was_walkable = false;
                let mut previous_area = AreaType::NOT_WALKABLE;

                // For each span in the column...
                let mut span_key_iter = self.span_key_at(x, z);
                while let Some(span_key) = span_key_iter {
                    let span = self.span_mut(span_key);
                    span_key_iter = span.next();
                    let walkable = span.area().is_walkable();

                    // If current span is not walkable, but there is walkable span just below it and the height difference
                    // is small enough for the agent to walk over, mark the current span as walkable too.
                    if let Some(previous_max) = previous_max {
                        if !walkable
                            && previous_was_walkable
                            && span.max() as i32 - previous_max as i32 <= walkable_climb as i32
                        {
                            span.set_area(previous_area);
                        }
                    }

                    // Copy the original walkable value regardless of whether we changed it.
                    // This prevents multiple consecutive non-walkable spans from being erroneously marked as walkable.
                    previous_max = Some(span.max());
                    previous_was_walkable = walkable;
                    previous_area = span.area();
                }
            }
        }
    }

    /// Marks spans that are ledges as not-walkable.
    ///
    /// A ledge is a span with one or more neighbors whose maximum is further away than `walkable_climb`
    /// from the current span's maximum.
    /// This method removes the impact of the overestimation of conservative voxelization
    /// so the resulting mesh will not have regions hanging in the air over ledges.
    ///
    /// A span is a ledge if: `abs(current_span.max - neighbor_span.max) > walkable_climb`.
    /// Spans on steep slopes, whose traversable neighbors vary by more than `walkable_climb`, are also marked.
    ///
    /// # Arguments
    ///
    /// - `walkable_height`: Minimum floor to 'ceiling' height that will still allow the floor area to be considered walkable. [Limit: >= 3] [Units: vx]
    /// - `walkable_climb`: Maximum ledge height that is considered to still be traversable. [Limit: >=0] [Units: vx]
    pub fn filter_ledge_spans(&mut self, walkable_height: u16, walkable_climb: u16) {
        let walkable_height = walkable_height as i32;
        let walkable_climb = walkable_climb as i32;

        // Mark spans that are adjacent to a ledge as unwalkable..
        for z in 0..self.height {
            for x in 0..self.width {
                let mut span_key_iter = self.span_key_at(x, z);
                while let Some(span_key) = span_key_iter {
                    let span = self.span(span_key);
                    span_key_iter = span.next();

                    // Skip non-walkable spans.
                    if !span.area().is_walkable() {
                        continue;
                    }

                    let floor = span.max() as i32;
                    let ceiling = span
                        .next()
                        .map_or(Self::MAX_HEIGHT, |next| self.span(next).min() as i32);

                    // The difference between this walkable area and the lowest neighbor walkable area.
                    // This is the difference between the current span and all neighbor spans that have
                    // enough space for an agent to move between, but not accounting at all for surface slope.
                    let mut lowest_neighbor_floor_difference = Self::MAX_HEIGHT;

                    // Min and max height of accessible neighbours.
                    let mut lowest_traversable_neighbor_floor = floor;
                    let mut highest_traversable_neighbor_floor = floor;

                    for direction in 0..4 {
                        let neighbor_x = x as i32 + dir_offset_x(direction) as i32;
                        let neighbor_z = z as i32 + dir_offset_z(direction) as i32;

                        // Skip neighbours which are out of bounds.
                        if !self.contains(neighbor_x, neighbor_z) {
                            lowest_neighbor_floor_difference = -walkable_climb - 1;
                            break;
                        }

                        let mut neighbor_span_iter =
                            self.span_key_at(neighbor_x as u16, neighbor_z as u16);

                        // The most we can step down to the neighbor is the walkable climb distance.
                        // Start with the area under the neighbor span
                        let neighbor_ceiling = neighbor_span_iter
                            .map_or(Self::MAX_HEIGHT, |neighbor| self.span(neighbor).min() as i32);

                        // Skip neighbour if the gap between the spans is too small.
                        if ceiling.min(neighbor_ceiling) - floor >= walkable_height {
                            lowest_neighbor_floor_difference = -walkable_climb - 1;
                            break;
                        }

                        // For each span in the neighboring column...
                        while let Some(neighbor_key) = neighbor_span_iter {
                            let neighbor_span = self.span(neighbor_key);
                            neighbor_span_iter = neighbor_span.next();

                            let neighbor_floor = neighbor_span.max() as i32;
                            let neighbor_ceiling = neighbor_span
                                .next()
                                .map_or(Self::MAX_HEIGHT, |next| self.span(next).min() as i32);

                            // Only consider neighboring areas that have enough overlap to be potentially traversable.
                            if ceiling.min(neighbor_ceiling) - floor.max(neighbor_floor)
                                < walkable_height
                            {
                                // No space to traverse between them.
                                continue;
                            }

                            let neighbor_floor_difference = neighbor_floor - floor;
                            lowest_neighbor_floor_difference =
                                lowest_neighbor_floor_difference.min(neighbor_floor_difference);

                            // Find min/max accessible neighbor height.
                            // Only consider neighbors that are at most walkable_climb away.
                            if neighbor_floor_difference.abs() <= walkable_climb {
                                // There is space to move to the neighbor cell and the slope isn't too much.
                                lowest_traversable_neighbor_floor =
                                    lowest_traversable_neighbor_floor.min(neighbor_floor);
                                highest_traversable_neighbor_floor =
                                    highest_traversable_neighbor_floor.max(neighbor_floor);
                            } else if neighbor_floor_difference < -walkable_climb {
                                // We already know this will be considered a ledge span so we can early-out
                                break;
                            }
                        }
                    }

                    if lowest_neighbor_floor_difference < -walkable_climb
                        || highest_traversable_neighbor_floor - lowest_traversable_neighbor_floor
                            > walkable_climb
                    {
                        // The current span is close to a ledge or the surface is too steep.
                        self.span_mut(span_key).set_area(AreaType::NOT_WALKABLE);
                    }
                }
            }
        }
    }

    /// Marks walkable spans as not walkable if the clearance above the span is less than the specified `walkable_height`.
    ///
    /// For this filter, the clearance above the span is the distance from the span's
    /// maximum to the minimum of the next higher span in the same column.
    /// If there is no higher span in the column, the clearance is computed as the
    /// distance from the top of the span to the maximum heightfield height.
    ///
    /// # Arguments
    ///
    /// - `walkable_height`: Minimum floor to 'ceiling' height that will still allow the floor area to be considered walkable. [Limit: >= 3] [Units: vx]
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: u16) {
        // Remove walkable flag from spans which do not have enough
        // space above them for the agent to stand there.
        for z in 0..self.height {
            for x in 0..self.width {
                let mut span_key_iter = self.span_key_at(x, z);
                while let Some(span_key) = span_key_iter {
                    let span = self.span(span_key);
                    span_key_iter = span.next();
                    let floor = span.max() as i32;
                    let ceiling = span
                        .next()
                        .map_or(Self::MAX_HEIGHT, |next| self.span(next).min() as i32);
                    if ceiling - floor < walkable_height as i32 {
                        self.span_mut(span_key).set_area(AreaType::NOT_WALKABLE);
                    }
                }
            }
        }
    }
}
