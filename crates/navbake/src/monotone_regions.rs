//! Sweep based partitioning.
//!
//! Monotone partitioning
//!   - fastest
//!   - partitions the heightfield into regions without holes and overlaps (guaranteed)
//!   - creates long thin polygons, which sometimes causes paths with detours
//!   * use this if you want fast navmesh generation
//!
//! Layer partitioning
//!   - quite fast
//!   - partitions the heightfield into non-overlapping regions
//!   - relies on the triangulation code to cope with holes (thus slower than monotone partitioning)
//!   - produces better triangles than monotone partitioning
//!   - does not have the corner cases of watershed partitioning
//!   - can be slow and create a bit ugly tessellation (still better than monotone)
//!     if you have large open areas with small obstacles (not a problem if you use tiles)
//!   * good choice to use for tiled navmesh with medium and small sized tiles

use crate::{CompactHeightfield, RegionError, RegionId, watershed_build_regions::next_region_id};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SweepNeighbor {
    /// No region below the sweep span has been found yet.
    Unset,
    /// All spans of the sweep span connect to this region in the previous row.
    Region(RegionId),
    /// The sweep span connects to several regions in the previous row.
    Multiple,
}

#[derive(Clone, Copy, Debug)]
struct SweepSpan {
    /// Number of samples connecting to `neighbor`
    sample_count: usize,
    neighbor: SweepNeighbor,
    /// Final region id
    id: RegionId,
}

impl CompactHeightfield {
    /// Builds region data for the heightfield using simple monotone partitioning.
    ///
    /// Non-null regions will consist of connected, non-overlapping walkable spans that form a single contour.
    /// Contours will form simple polygons.
    ///
    /// The arguments behave as in [`CompactHeightfield::build_regions`].
    /// The distance field is not needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the field contains more regions than a [`RegionId`] can represent.
    pub fn build_regions_monotone(
        &mut self,
        border_size: u16,
        min_region_area: u16,
        merge_region_area: u16,
    ) -> Result<(), RegionError> {
        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let region_id = self.sweep_into_regions(border_size, &mut src_reg)?;

        // Merge regions and filter out small regions.
        self.max_region = region_id;
        // Monotone partitioning does not generate overlapping regions.
        self.merge_and_filter_regions(min_region_area, merge_region_area, &mut src_reg);

        for (span, region) in self.spans.iter_mut().zip(src_reg) {
            span.region = region;
        }
        Ok(())
    }

    /// Builds region data for the heightfield by partitioning it into non-overlapping layers.
    ///
    /// Every region is a connected set of spans of the same area that never contains two spans
    /// of the same column. Regions may contain holes.
    ///
    /// # Arguments
    ///
    /// - `border_size`: The size of the non-navigable border around the heightfield. [Limit: >=0] [Units: vx]
    /// - `min_region_area`: The minimum number of cells allowed to form isolated island areas. [Limit: >=0] [Units: vx]
    ///
    /// # Errors
    ///
    /// Returns an error if the field contains more regions than a [`RegionId`] can represent.
    pub fn build_layer_regions(
        &mut self,
        border_size: u16,
        min_region_area: u16,
    ) -> Result<(), RegionError> {
        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let region_id = self.sweep_into_regions(border_size, &mut src_reg)?;

        self.max_region = region_id;
        self.merge_and_filter_layer_regions(min_region_area, &mut src_reg);

        for (span, region) in self.spans.iter_mut().zip(src_reg) {
            span.region = region;
        }
        Ok(())
    }

    /// Paints the border and partitions the interior row by row into monotone regions.
    /// Returns the next free region id.
    pub(crate) fn sweep_into_regions(
        &mut self,
        border_size: u16,
        src_reg: &mut [RegionId],
    ) -> Result<RegionId, RegionError> {
        let mut region_id = RegionId::new(1);
        if border_size > 0 {
            region_id = self.paint_border_regions(border_size, region_id, src_reg);
        }
        self.border_size = border_size;

        let x_range = border_size..self.width.saturating_sub(border_size);
        let z_range = border_size..self.height.saturating_sub(border_size);

        let mut sweeps: Vec<SweepSpan> = Vec::with_capacity(self.width.max(self.height) as usize);
        let mut prev: Vec<usize> = Vec::with_capacity(256);

        // Sweep one line at a time.
        for z in z_range {
            // Collect spans from this row.
            prev.clear();
            prev.resize(region_id.bits() as usize + 1, 0);
            sweeps.clear();
            // Sweep ids start at 1 so that 0 can mean "unassigned".
            sweeps.push(SweepSpan {
                sample_count: 0,
                neighbor: SweepNeighbor::Unset,
                id: RegionId::NONE,
            });

            for x in x_range.clone() {
                for i in self.cell_at(x, z).index_range() {
                    let area = self.areas[i];
                    if !area.is_walkable() {
                        continue;
                    }

                    // -x
                    let mut sweep_id = 0;
                    if let Some((_, _, a_index)) = self.neighbor_index(x as i32, z as i32, i, 0) {
                        let a_region = src_reg[a_index];
                        if !a_region.is_border() && self.areas[a_index] == area {
                            sweep_id = a_region.bits() as usize;
                        }
                    }

                    if sweep_id == 0 {
                        sweep_id = sweeps.len();
                        if sweep_id >= RegionId::BORDER_REGION.bits() as usize {
                            return Err(RegionError::TooManyRegions {
                                max: RegionId::BORDER_REGION.bits() - 1,
                            });
                        }
                        sweeps.push(SweepSpan {
                            sample_count: 0,
                            neighbor: SweepNeighbor::Unset,
                            id: RegionId::NONE,
                        });
                    }

                    // -z
                    if let Some((_, _, a_index)) = self.neighbor_index(x as i32, z as i32, i, 3) {
                        let a_region = src_reg[a_index];
                        if !a_region.is_none()
                            && !a_region.is_border()
                            && self.areas[a_index] == area
                        {
                            let sweep = &mut sweeps[sweep_id];
                            match sweep.neighbor {
                                SweepNeighbor::Unset => {
                                    sweep.neighbor = SweepNeighbor::Region(a_region);
                                    sweep.sample_count += 1;
                                    prev[a_region.bits() as usize] += 1;
                                }
                                SweepNeighbor::Region(neighbor) if neighbor == a_region => {
                                    sweep.sample_count += 1;
                                    prev[a_region.bits() as usize] += 1;
                                }
                                _ => sweep.neighbor = SweepNeighbor::Multiple,
                            }
                        }
                    }

                    src_reg[i] = RegionId::new(sweep_id as u16);
                }
            }

            // Create unique ID.
            for sweep in sweeps.iter_mut().skip(1) {
                // If the neighbour is set and there is only one continuous connection to it,
                // the sweep will be merged with the previous one, else new region is created.
                match sweep.neighbor {
                    SweepNeighbor::Region(neighbor)
                        if prev[neighbor.bits() as usize] == sweep.sample_count =>
                    {
                        sweep.id = neighbor;
                    }
                    _ => {
                        sweep.id = region_id;
                        region_id = next_region_id(region_id)?;
                    }
                }
            }

            // Remap IDs
            for x in x_range.clone() {
                for i in self.cell_at(x, z).index_range() {
                    let sweep_id = src_reg[i].bits() as usize;
                    if sweep_id > 0 && sweep_id < sweeps.len() {
                        src_reg[i] = sweeps[sweep_id].id;
                    }
                }
            }
        }
        Ok(region_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compact_heightfield::tests::{flat_compact, floor_heightfield, stacked_heightfield};

    fn region_at(chf: &CompactHeightfield, x: u16, z: u16, layer: usize) -> RegionId {
        let index = chf.cell_at(x, z).index() as usize + layer;
        chf.spans[index].region
    }

    /// A floor with a disconnected bridge hovering over the columns `2..6`.
    fn bridge_over_floor() -> CompactHeightfield {
        stacked_heightfield(8, 8, |x, _| {
            let mut spans = vec![(0, 2)];
            if (2..6).contains(&x) {
                spans.push((18, 20));
            }
            spans
        })
        .into_compact(4, 2)
        .unwrap()
    }

    #[test]
    fn monotone_flat_floor_is_one_region() {
        let mut chf = flat_compact(10, 10);
        chf.build_regions_monotone(0, 2, 20).unwrap();
        assert_eq!(chf.max_region, RegionId::new(1));
        assert!(chf.spans.iter().all(|span| span.region == RegionId::new(1)));
    }

    #[test]
    fn monotone_separates_platforms() {
        let mut chf = floor_heightfield(11, 5, |x, _| (x != 5).then_some(2))
            .into_compact(4, 2)
            .unwrap();
        chf.build_regions_monotone(0, 2, 0).unwrap();
        assert_eq!(chf.max_region, RegionId::new(2));
        assert_ne!(region_at(&chf, 0, 0, 0), region_at(&chf, 10, 4, 0));
        assert_eq!(region_at(&chf, 0, 0, 0), region_at(&chf, 4, 4, 0));
    }

    #[test]
    fn monotone_keeps_bridge_apart_from_floor() {
        let mut chf = bridge_over_floor();
        chf.build_regions_monotone(0, 0, 0).unwrap();
        let floor = region_at(&chf, 3, 3, 0);
        let bridge = region_at(&chf, 3, 3, 1);
        assert!(!floor.is_none());
        assert!(!bridge.is_none());
        assert_ne!(floor, bridge);
    }

    #[test]
    fn layers_never_stack_a_region() {
        let mut chf = bridge_over_floor();
        chf.build_layer_regions(0, 0).unwrap();
        assert_eq!(chf.max_region, RegionId::new(2));
        for z in 0..8 {
            for x in 2..6 {
                assert_ne!(region_at(&chf, x, z, 0), region_at(&chf, x, z, 1));
            }
        }
        assert_eq!(region_at(&chf, 0, 0, 0), region_at(&chf, 7, 7, 0));
    }

    #[test]
    fn border_columns_keep_border_regions() {
        let mut chf = flat_compact(10, 10);
        chf.build_layer_regions(1, 0).unwrap();
        assert!(region_at(&chf, 0, 5, 0).is_border());
        assert_eq!(region_at(&chf, 5, 5, 0), RegionId::new(1));
    }
}
