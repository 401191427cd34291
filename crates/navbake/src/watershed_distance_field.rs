//! The distance field that drives watershed partitioning.
//!
//! Every span stores its approximate distance to the closest region boundary, i.e. a non-walkable span,
//! a missing neighbor or a neighbor with a different area type.

use crate::CompactHeightfield;

impl CompactHeightfield {
    /// Prepare for region partitioning, by calculating distance field along the walkable surface.
    ///
    /// Fills [`CompactHeightfield::dist`] and [`CompactHeightfield::max_distance`].
    pub fn build_distance_field(&mut self) {
        let distances = self.calculate_distance_field();
        self.max_distance = distances.iter().copied().max().unwrap_or_default();
        self.dist = self.box_blur(1, &distances);
    }

    fn calculate_distance_field(&self) -> Vec<u16> {
        let mut distances = vec![u16::MAX; self.spans.len()];

        // Mark boundary cells.
        for z in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let cell = self.cell_at(x as u16, z as u16);
                for i in cell.index_range() {
                    let area = self.areas[i];
                    let neighbor_count = (0..4)
                        .filter_map(|dir| self.neighbor_index(x, z, i, dir))
                        .filter(|(_, _, a_index)| self.areas[*a_index] == area)
                        .count();
                    if neighbor_count != 4 {
                        distances[i] = 0;
                    }
                }
            }
        }

        let relax = |distances: &mut [u16], i: usize, neighbor: usize, cost: u16| {
            let new_distance = distances[neighbor].saturating_add(cost);
            if new_distance < distances[i] {
                distances[i] = new_distance;
            }
        };

        // Pass 1
        for z in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let cell = self.cell_at(x as u16, z as u16);
                for i in cell.index_range() {
                    if let Some((a_x, a_z, a_index)) = self.neighbor_index(x, z, i, 0) {
                        // (-1,0)
                        relax(&mut distances, i, a_index, 2);
                        // (-1,-1)
                        if let Some((_, _, aa_index)) = self.neighbor_index(a_x, a_z, a_index, 3) {
                            relax(&mut distances, i, aa_index, 3);
                        }
                    }
                    if let Some((a_x, a_z, a_index)) = self.neighbor_index(x, z, i, 3) {
                        // (0,-1)
                        relax(&mut distances, i, a_index, 2);
                        // (1,-1)
                        if let Some((_, _, aa_index)) = self.neighbor_index(a_x, a_z, a_index, 2) {
                            relax(&mut distances, i, aa_index, 3);
                        }
                    }
                }
            }
        }

        // Pass 2
        for z in (0..self.height as i32).rev() {
            for x in (0..self.width as i32).rev() {
                let cell = self.cell_at(x as u16, z as u16);
                for i in cell.index_range() {
                    if let Some((a_x, a_z, a_index)) = self.neighbor_index(x, z, i, 2) {
                        // (1,0)
                        relax(&mut distances, i, a_index, 2);
                        // (1,1)
                        if let Some((_, _, aa_index)) = self.neighbor_index(a_x, a_z, a_index, 1) {
                            relax(&mut distances, i, aa_index, 3);
                        }
                    }
                    if let Some((a_x, a_z, a_index)) = self.neighbor_index(x, z, i, 1) {
                        // (0,1)
                        relax(&mut distances, i, a_index, 2);
                        // (-1,1)
                        if let Some((_, _, aa_index)) = self.neighbor_index(a_x, a_z, a_index, 0) {
                            relax(&mut distances, i, aa_index, 3);
                        }
                    }
                }
            }
        }
        distances
    }

    /// Smooths the distance field with a 3x3 box filter.
    /// Spans within `2 * threshold` of a boundary keep their distance.
    fn box_blur(&self, threshold: u16, distances: &[u16]) -> Vec<u16> {
        let threshold = threshold * 2;
        let mut blurred = vec![0_u16; distances.len()];

        for z in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let cell = self.cell_at(x as u16, z as u16);
                for i in cell.index_range() {
                    let center = distances[i];
                    if center <= threshold {
                        blurred[i] = center;
                        continue;
                    }

                    let mut sum = center as u32;
                    for dir in 0..4 {
                        let Some((a_x, a_z, a_index)) = self.neighbor_index(x, z, i, dir) else {
                            sum += center as u32 * 2;
                            continue;
                        };
                        sum += distances[a_index] as u32;
                        let dir2 = (dir + 1) & 0x3;
                        match self.neighbor_index(a_x, a_z, a_index, dir2) {
                            Some((_, _, b_index)) => sum += distances[b_index] as u32,
                            None => sum += center as u32,
                        }
                    }
                    blurred[i] = ((sum + 5) / 9) as u16;
                }
            }
        }
        blurred
    }
}

#[cfg(test)]
mod tests {
    use crate::compact_heightfield::tests::flat_compact;

    #[test]
    fn distance_grows_towards_center() {
        let mut chf = flat_compact(9, 9);
        chf.build_distance_field();
        let at = |x: u16, z: u16| chf.dist[chf.cell_at(x, z).index() as usize];
        assert_eq!(at(0, 0), 0);
        assert_eq!(at(0, 4), 0);
        assert!(at(1, 4) < at(2, 4));
        assert!(at(2, 4) < at(3, 4));
        assert!(at(3, 4) <= at(4, 4));
        // The field is symmetric.
        assert_eq!(at(1, 4), at(7, 4));
        assert_eq!(at(4, 1), at(4, 7));
        assert_eq!(chf.max_distance, 8);
    }

    #[test]
    fn area_changes_are_boundaries() {
        let mut chf = flat_compact(9, 9);
        for z in 0..9 {
            let index = chf.cell_at(4, z).index() as usize;
            chf.areas[index] = crate::AreaType(2);
        }
        chf.build_distance_field();
        for z in 0..9 {
            assert_eq!(chf.dist[chf.cell_at(4, z).index() as usize], 0);
            assert_eq!(chf.dist[chf.cell_at(3, z).index() as usize], 0);
        }
    }

    #[test]
    fn empty_field_has_no_distance() {
        let mut chf = crate::compact_heightfield::tests::floor_heightfield(3, 3, |_, _| None)
            .into_compact(4, 2)
            .unwrap();
        chf.build_distance_field();
        assert!(chf.dist.is_empty());
        assert_eq!(chf.max_distance, 0);
    }
}
