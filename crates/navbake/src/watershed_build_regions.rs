//! Watershed partitioning
//!   - the classic Recast partitioning
//!   - creates the nicest tessellation
//!   - usually slowest
//!   - partitions the heightfield into nice regions without holes or overlaps
//!   - there are some corner cases where this method produces holes and overlaps
//!      - holes may appear when a small obstacle is close to a large open area (triangulation can handle this)
//!      - overlaps may occur if you have narrow spiral corridors (i.e stairs), this makes triangulation fail
//!   * generally the best choice if you precompute the navmesh, use this if you have large open areas

use thiserror::Error;

use crate::{CompactHeightfield, RegionId};

impl CompactHeightfield {
    /// Builds region data for the heightfield using watershed partitioning.
    ///
    /// Non-null regions will consist of connected, non-overlapping walkable spans that form a single contour.
    /// Contours will form simple polygons.
    ///
    /// If multiple regions form an area that is smaller than `min_region_area`, then all spans will be
    /// re-assigned to [`RegionId::NONE`].
    ///
    /// Watershed partitioning can result in smaller than necessary regions, especially in diagonal corridors.
    /// `merge_region_area` helps reduce unnecessarily small regions.
    ///
    /// The region data will be available via the [`CompactHeightfield::max_region`]
    /// and [`CompactSpan::region`](crate::CompactSpan::region) fields.
    ///
    /// The distance field must be created using [`CompactHeightfield::build_distance_field`] before attempting to build regions.
    ///
    /// # Arguments
    ///
    /// - `border_size`: The size of the non-navigable border around the heightfield. [Limit: >=0] [Units: vx]
    /// - `min_region_area`: The minimum number of cells allowed to form isolated island areas. [Limit: >=0] [Units: vx]
    /// - `merge_region_area`: Any regions with a span count smaller than this value will, if possible, be merged with larger regions. [Limit: >=0] [Units: vx]
    ///
    /// # Errors
    ///
    /// Returns an error if the field contains more regions than a [`RegionId`] can represent.
    pub fn build_regions(
        &mut self,
        border_size: u16,
        min_region_area: u16,
        merge_region_area: u16,
    ) -> Result<(), RegionError> {
        const LOG_NB_STACKS: usize = 3;
        const NB_STACKS: usize = 1 << LOG_NB_STACKS;
        let mut level_stacks: [Vec<LevelStackEntry>; NB_STACKS] = [const { Vec::new() }; NB_STACKS];
        for stack in &mut level_stacks {
            stack.reserve(256);
        }

        let mut stack: Vec<LevelStackEntry> = Vec::with_capacity(256);

        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let mut src_dist = vec![0_u16; self.spans.len()];

        let mut region_id = RegionId::new(1);
        // Always seed at level 0 at least once.
        let mut level = ((self.max_distance.saturating_add(1)) & !1).max(2);

        // How much the watershed "overflows" and simplifies the regions per level.
        let expand_iters = 8;

        if border_size > 0 {
            region_id = self.paint_border_regions(border_size, region_id, &mut src_reg);
        }
        self.border_size = border_size;

        let mut s_id = NB_STACKS - 1;
        while level > 0 {
            level = level.saturating_sub(2);
            s_id = (s_id + 1) & (NB_STACKS - 1);

            if s_id == 0 {
                self.sort_cells_by_level(level, &src_reg, &mut level_stacks, 1);
            } else {
                // copy left overs from last level
                let (src, dst) = level_stacks.split_at_mut(s_id);
                append_stacks(&src[s_id - 1], &mut dst[0], &src_reg);
            }

            self.expand_regions(
                expand_iters,
                level,
                &mut src_reg,
                &mut src_dist,
                &mut level_stacks[s_id],
                false,
            );

            // Mark new regions with IDs.
            for j in 0..level_stacks[s_id].len() {
                let current = level_stacks[s_id][j];
                let Some(i) = current.index else {
                    continue;
                };
                if !src_reg[i].is_none() {
                    continue;
                }
                if self.flood_region(
                    current,
                    level,
                    region_id,
                    &mut src_reg,
                    &mut src_dist,
                    &mut stack,
                ) {
                    region_id = next_region_id(region_id)?;
                }
            }
        }

        // Expand current regions until no empty connected cells found.
        self.expand_regions(
            expand_iters * 8,
            0,
            &mut src_reg,
            &mut src_dist,
            &mut stack,
            true,
        );

        // Merge regions and filter out small regions.
        self.max_region = region_id;
        let overlaps = self.merge_and_filter_regions(
            min_region_area,
            merge_region_area,
            &mut src_reg,
        );

        // If overlapping regions were found during merging, split those regions.
        if !overlaps.is_empty() {
            tracing::error!(
                "Watershed partitioning produced {} overlapping regions",
                overlaps.len()
            );
        }

        // Write the result out.
        for (span, region) in self.spans.iter_mut().zip(src_reg) {
            span.region = region;
        }
        Ok(())
    }

    /// Paints the four border strips of the field with their own border regions.
    /// Returns the next free region id.
    pub(crate) fn paint_border_regions(
        &self,
        border_size: u16,
        mut region_id: RegionId,
        src_reg: &mut [RegionId],
    ) -> RegionId {
        // Make sure border will not overflow.
        let border_width = border_size.min(self.width);
        let border_height = border_size.min(self.height);

        // Paint regions
        let rects = [
            (0, border_width, 0, self.height),
            (self.width - border_width, self.width, 0, self.height),
            (0, self.width, 0, border_height),
            (0, self.width, self.height - border_height, self.height),
        ];
        for (min_x, max_x, min_z, max_z) in rects {
            self.paint_rect_region(
                min_x,
                max_x,
                min_z,
                max_z,
                region_id | RegionId::BORDER_REGION,
                src_reg,
            );
            region_id += 1;
        }
        region_id
    }

    fn paint_rect_region(
        &self,
        min_x: u16,
        max_x: u16,
        min_z: u16,
        max_z: u16,
        region: RegionId,
        src_reg: &mut [RegionId],
    ) {
        for z in min_z..max_z {
            for x in min_x..max_x {
                for i in self.cell_at(x, z).index_range() {
                    if self.areas[i].is_walkable() {
                        src_reg[i] = region;
                    }
                }
            }
        }
    }

    fn sort_cells_by_level(
        &self,
        start_level: u16,
        src_reg: &[RegionId],
        stacks: &mut [Vec<LevelStackEntry>],
        log_levels_per_stack: u16,
    ) {
        let start_level = start_level >> log_levels_per_stack;
        for stack in stacks.iter_mut() {
            stack.clear();
        }

        // put all cells in the level range into the appropriate stacks
        for z in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                for i in self.cell_at(x as u16, z as u16).index_range() {
                    if !self.areas[i].is_walkable() || !src_reg[i].is_none() {
                        continue;
                    }
                    let level = self.dist[i] >> log_levels_per_stack;
                    let s_id = start_level.saturating_sub(level) as usize;
                    if s_id >= stacks.len() {
                        continue;
                    }
                    stacks[s_id].push(LevelStackEntry {
                        x,
                        z,
                        index: Some(i),
                    });
                }
            }
        }
    }

    fn expand_regions(
        &self,
        max_iter: u16,
        level: u16,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
        fill_stack: bool,
    ) {
        if fill_stack {
            // Find cells revealed by the raised level.
            stack.clear();
            for z in 0..self.height as i32 {
                for x in 0..self.width as i32 {
                    for i in self.cell_at(x as u16, z as u16).index_range() {
                        if self.dist[i] >= level
                            && src_reg[i].is_none()
                            && self.areas[i].is_walkable()
                        {
                            stack.push(LevelStackEntry {
                                x,
                                z,
                                index: Some(i),
                            });
                        }
                    }
                }
            }
        } else {
            // use cells in the input stack
            // mark all cells which already have a region
            for entry in stack.iter_mut() {
                if entry.index.is_some_and(|i| !src_reg[i].is_none()) {
                    entry.index = None;
                }
            }
        }

        let mut dirty_entries = Vec::new();
        let mut iter = 0;
        while !stack.is_empty() {
            let mut failed = 0;
            dirty_entries.clear();

            for entry in stack.iter_mut() {
                let Some(i) = entry.index else {
                    failed += 1;
                    continue;
                };

                let mut region = src_reg[i];
                let mut distance = u16::MAX;
                let area = self.areas[i];
                for dir in 0..4 {
                    let Some((_, _, a_index)) = self.neighbor_index(entry.x, entry.z, i, dir)
                    else {
                        continue;
                    };
                    if self.areas[a_index] != area {
                        continue;
                    }
                    let a_region = src_reg[a_index];
                    let a_dist = src_dist[a_index].saturating_add(2);
                    if !a_region.is_none() && !a_region.is_border() && a_dist < distance {
                        region = a_region;
                        distance = a_dist;
                    }
                }
                if !region.is_none() {
                    // Mark as used
                    entry.index = None;
                    dirty_entries.push(DirtyEntry {
                        index: i,
                        region,
                        distance,
                    });
                } else {
                    failed += 1;
                }
            }
            // Copy entries that differ between src and dst to keep them in sync.
            for dirty_entry in &dirty_entries {
                src_reg[dirty_entry.index] = dirty_entry.region;
                src_dist[dirty_entry.index] = dirty_entry.distance;
            }

            if failed == stack.len() {
                break;
            }

            if level > 0 {
                iter += 1;
                if iter >= max_iter {
                    break;
                }
            }
        }
    }

    /// Floods a new region from `seed` into all connected spans at or above `level`.
    /// Spans whose neighborhood already touches another region are left unassigned.
    /// Returns `true` if at least one span was assigned to the region.
    fn flood_region(
        &self,
        seed: LevelStackEntry,
        level: u16,
        region: RegionId,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
    ) -> bool {
        let Some(seed_index) = seed.index else {
            return false;
        };
        let area = self.areas[seed_index];

        // Flood fill mark region.
        stack.clear();
        stack.push(seed);
        src_reg[seed_index] = region;
        src_dist[seed_index] = 0;

        let level = level.saturating_sub(2);
        let mut count = 0;

        while let Some(LevelStackEntry {
            x,
            z,
            index: Some(current_index),
        }) = stack.pop()
        {
            // Check if any of the neighbours already have a valid region set.
            let mut adjacent_region = RegionId::NONE;
            'directions: for dir in 0..4 {
                // 8 connected
                let Some((a_x, a_z, a_index)) = self.neighbor_index(x, z, current_index, dir)
                else {
                    continue;
                };
                if self.areas[a_index] != area {
                    continue;
                }
                let neighbor_region = src_reg[a_index];
                // Do not take borders into account.
                if neighbor_region.is_border() {
                    continue;
                }
                if !neighbor_region.is_none() && neighbor_region != region {
                    adjacent_region = neighbor_region;
                    break 'directions;
                }

                let dir2 = (dir + 1) & 0x3;
                let Some((_, _, b_index)) = self.neighbor_index(a_x, a_z, a_index, dir2) else {
                    continue;
                };
                if self.areas[b_index] != area {
                    continue;
                }
                let diagonal_region = src_reg[b_index];
                if !diagonal_region.is_none() && diagonal_region != region {
                    adjacent_region = diagonal_region;
                    break 'directions;
                }
            }
            if !adjacent_region.is_none() {
                src_reg[current_index] = RegionId::NONE;
                continue;
            }

            count += 1;

            // Expand neighbours.
            for dir in 0..4 {
                let Some((a_x, a_z, a_index)) = self.neighbor_index(x, z, current_index, dir)
                else {
                    continue;
                };
                if self.areas[a_index] != area {
                    continue;
                }
                if self.dist[a_index] >= level && src_reg[a_index].is_none() {
                    src_reg[a_index] = region;
                    src_dist[a_index] = 0;
                    stack.push(LevelStackEntry {
                        x: a_x,
                        z: a_z,
                        index: Some(a_index),
                    });
                }
            }
        }

        count > 0
    }
}

/// Returns the id after `region_id`, failing if it would collide with [`RegionId::BORDER_REGION`].
pub(crate) fn next_region_id(region_id: RegionId) -> Result<RegionId, RegionError> {
    let next = region_id.bits() + 1;
    if next >= RegionId::BORDER_REGION.bits() {
        return Err(RegionError::TooManyRegions {
            max: RegionId::BORDER_REGION.bits() - 1,
        });
    }
    Ok(RegionId::new(next))
}

fn append_stacks(
    src_stack: &[LevelStackEntry],
    dst_stack: &mut Vec<LevelStackEntry>,
    src_reg: &[RegionId],
) {
    for entry in src_stack {
        let Some(i) = entry.index else {
            continue;
        };
        if !src_reg[i].is_none() {
            continue;
        }
        dst_stack.push(*entry);
    }
}

#[derive(Clone, Copy, Debug)]
struct LevelStackEntry {
    x: i32,
    z: i32,
    index: Option<usize>,
}

#[derive(Clone, Debug)]
struct DirtyEntry {
    index: usize,
    region: RegionId,
    distance: u16,
}

/// Errors that can occur when partitioning a [`CompactHeightfield`] into regions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegionError {
    /// The field contains more regions than the region ids can distinguish.
    #[error("Region id overflow: the field needs more than {max} regions")]
    TooManyRegions {
        /// The highest region id that can be assigned
        max: u16,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compact_heightfield::tests::{flat_compact, floor_heightfield};

    fn regions_of(chf: &CompactHeightfield) -> Vec<RegionId> {
        chf.spans.iter().map(|span| span.region).collect()
    }

    #[test]
    fn flat_floor_is_a_single_region() {
        let mut chf = flat_compact(10, 10);
        chf.build_distance_field();
        chf.build_regions(0, 2, 20).unwrap();
        assert_eq!(chf.max_region, RegionId::new(1));
        assert!(regions_of(&chf).iter().all(|r| *r == RegionId::new(1)));
    }

    #[test]
    fn separated_platforms_form_two_regions() {
        let heightfield = floor_heightfield(11, 5, |x, _| (x != 5).then_some(2));
        let mut chf = heightfield.into_compact(4, 2).unwrap();
        chf.build_distance_field();
        chf.build_regions(0, 2, 20).unwrap();
        assert_eq!(chf.max_region, RegionId::new(2));

        let left = chf.spans[chf.cell_at(0, 0).index() as usize].region;
        let right = chf.spans[chf.cell_at(10, 0).index() as usize].region;
        assert_ne!(left, right);
        for z in 0..5 {
            for x in 0..11 {
                let Some(span) = chf.cell_at(x, z).index_range().next() else {
                    continue;
                };
                let expected = if x < 5 { left } else { right };
                assert_eq!(chf.spans[span].region, expected, "({x}, {z})");
            }
        }
    }

    #[test]
    fn narrow_strips_are_regions() {
        for width in 1..=3 {
            let mut chf = flat_compact(width, 40);
            chf.build_distance_field();
            chf.build_regions(0, 8, 20).unwrap();
            assert_eq!(chf.max_region, RegionId::new(1), "width {width}");
            assert!(
                regions_of(&chf).iter().all(|r| *r == RegionId::new(1)),
                "width {width}"
            );
        }
    }

    #[test]
    fn tiny_islands_are_removed() {
        let heightfield = floor_heightfield(12, 12, |x, z| (x < 10 || (x == 11 && z == 0)).then_some(2));
        let mut chf = heightfield.into_compact(4, 2).unwrap();
        chf.build_distance_field();
        chf.build_regions(0, 4, 20).unwrap();
        let island = chf.cell_at(11, 0).index() as usize;
        assert!(chf.spans[island].region.is_none());
        assert_eq!(chf.max_region, RegionId::new(1));
    }

    #[test]
    fn border_is_painted_with_border_regions() {
        let mut chf = flat_compact(12, 12);
        chf.build_distance_field();
        chf.build_regions(2, 0, 0).unwrap();
        assert_eq!(chf.border_size, 2);
        let corner = chf.cell_at(0, 0).index() as usize;
        assert!(chf.spans[corner].region.is_border());
        let center = chf.cell_at(6, 6).index() as usize;
        assert_eq!(chf.spans[center].region, RegionId::new(1));
    }

    #[test]
    fn region_ids_stop_before_border_flag() {
        assert_eq!(next_region_id(RegionId::new(1)), Ok(RegionId::new(2)));
        assert!(matches!(
            next_region_id(RegionId::new(0x7fff)),
            Err(RegionError::TooManyRegions { .. })
        ));
    }
}
