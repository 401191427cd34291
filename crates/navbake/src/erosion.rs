use crate::{CompactHeightfield, span::AreaType};

impl CompactHeightfield {
    /// Erodes the walkable area by the agent radius.
    ///
    /// Computes an approximate distance from every span to the nearest boundary
    /// (a non-walkable span or a missing neighbor) and marks all spans closer than
    /// `walkable_radius` as [`AreaType::NOT_WALKABLE`].
    ///
    /// # Arguments
    ///
    /// - `walkable_radius`: The radius of erosion. [Limits: 0 < value < 255] [Units: vx]
    pub fn erode_walkable_area(&mut self, walkable_radius: u16) {
        let distance_to_boundary = self.distance_to_walkable_boundary();

        let min_boundary_distance = walkable_radius as u32 * 2;
        for (area, distance) in self.areas.iter_mut().zip(distance_to_boundary) {
            if (distance as u32) < min_boundary_distance {
                *area = AreaType::NOT_WALKABLE;
            }
        }
    }

    /// Computes the chamfer distance of each span to the walkable boundary.
    /// Orthogonal steps cost 2, diagonal steps cost 3 and the result saturates at 255.
    fn distance_to_walkable_boundary(&self) -> Vec<u8> {
        let mut distance_to_boundary = vec![u8::MAX; self.spans.len()];

        // Mark boundary cells.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for span_index in cell.index_range() {
                    if !self.areas[span_index].is_walkable() {
                        distance_to_boundary[span_index] = 0;
                        continue;
                    }
                    // Check that there is a non-null adjacent span in each of the 4 cardinal directions.
                    let neighbor_count = (0..4)
                        .map_while(|direction| {
                            self.neighbor_index(x as i32, z as i32, span_index, direction)
                        })
                        .take_while(|(_, _, neighbor_index)| {
                            self.areas[*neighbor_index].is_walkable()
                        })
                        .count();

                    // At least one missing neighbour, so this is a boundary cell.
                    if neighbor_count != 4 {
                        distance_to_boundary[span_index] = 0;
                    }
                }
            }
        }

        let relax = |distance: &mut [u8], span_index: usize, neighbor_index: usize, cost: u8| {
            let new_distance = distance[neighbor_index].saturating_add(cost);
            if new_distance < distance[span_index] {
                distance[span_index] = new_distance;
            }
        };

        // Pass 1
        for z in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let cell = self.cell_at(x as u16, z as u16);
                for span_index in cell.index_range() {
                    // (-1,0)
                    if let Some((a_x, a_z, a_index)) = self.neighbor_index(x, z, span_index, 0) {
                        relax(&mut distance_to_boundary, span_index, a_index, 2);
                        // (-1,-1)
                        if let Some((_, _, aa_index)) = self.neighbor_index(a_x, a_z, a_index, 3) {
                            relax(&mut distance_to_boundary, span_index, aa_index, 3);
                        }
                    }
                    // (0,-1)
                    if let Some((a_x, a_z, a_index)) = self.neighbor_index(x, z, span_index, 3) {
                        relax(&mut distance_to_boundary, span_index, a_index, 2);
                        // (1,-1)
                        if let Some((_, _, aa_index)) = self.neighbor_index(a_x, a_z, a_index, 2) {
                            relax(&mut distance_to_boundary, span_index, aa_index, 3);
                        }
                    }
                }
            }
        }

        // Pass 2
        for z in (0..self.height as i32).rev() {
            for x in (0..self.width as i32).rev() {
                let cell = self.cell_at(x as u16, z as u16);
                for span_index in cell.index_range() {
                    // (1,0)
                    if let Some((a_x, a_z, a_index)) = self.neighbor_index(x, z, span_index, 2) {
                        relax(&mut distance_to_boundary, span_index, a_index, 2);
                        // (1,1)
                        if let Some((_, _, aa_index)) = self.neighbor_index(a_x, a_z, a_index, 1) {
                            relax(&mut distance_to_boundary, span_index, aa_index, 3);
                        }
                    }
                    // (0,1)
                    if let Some((a_x, a_z, a_index)) = self.neighbor_index(x, z, span_index, 1) {
                        relax(&mut distance_to_boundary, span_index, a_index, 2);
                        // (-1,1)
                        if let Some((_, _, aa_index)) = self.neighbor_index(a_x, a_z, a_index, 0) {
                            relax(&mut distance_to_boundary, span_index, aa_index, 3);
                        }
                    }
                }
            }
        }
        distance_to_boundary
    }
}

#[cfg(test)]
mod tests {
    use crate::compact_heightfield::tests::flat_compact;

    fn walkable_count(radius: u16) -> usize {
        let mut chf = flat_compact(12, 12);
        chf.erode_walkable_area(radius);
        chf.areas.iter().filter(|area| area.is_walkable()).count()
    }

    #[test]
    fn erosion_removes_border_ring() {
        let mut chf = flat_compact(5, 5);
        chf.erode_walkable_area(1);
        // Border cells have distance 0 and their direct neighbors distance 2.
        for z in 0..5 {
            for x in 0..5 {
                let index = chf.cell_at(x, z).index() as usize;
                let on_border = x == 0 || z == 0 || x == 4 || z == 4;
                assert_eq!(chf.areas[index].is_walkable(), !on_border, "cell ({x}, {z})");
            }
        }
    }

    #[test]
    fn zero_radius_keeps_everything() {
        assert_eq!(walkable_count(0), 144);
    }

    #[test]
    fn erosion_is_monotone_in_radius() {
        let counts: Vec<_> = (0..6).map(walkable_count).collect();
        for pair in counts.windows(2) {
            assert!(pair[1] <= pair[0], "{counts:?}");
        }
        assert_eq!(counts[5], 2 * 2);
    }

    #[test]
    fn huge_radius_erodes_everything() {
        assert_eq!(walkable_count(200), 0);
    }
}
