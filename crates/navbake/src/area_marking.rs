//! Assigning [`AreaType`]s to the spans of a [`CompactHeightfield`].

use glam::{IVec3, Vec2, Vec3};

use crate::{
    Aabb2d, Aabb3d, AreaType, CompactHeightfield,
    math::point_in_poly,
};

/// A volume that marks all walkable spans inside it with an area type.
///
/// The volume is a convex polygon on the xz-plane, extruded from `min_y` to `max_y`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ConvexVolume {
    /// The vertices of the convex polygon on the xz-plane.
    pub vertices: Vec<Vec2>,
    /// The lower extent of the volume along the y-axis. [Units: wu]
    pub min_y: f32,
    /// The upper extent of the volume along the y-axis. [Units: wu]
    pub max_y: f32,
    /// The area type to assign.
    pub area: AreaType,
}

/// The cells and heights of a [`CompactHeightfield`] covered by a volume, clamped to the field.
struct GridFootprint {
    min: IVec3,
    max: IVec3,
}

impl CompactHeightfield {
    /// Converts a world-space AABB into the covered grid cells.
    /// Returns `None` if the AABB lies entirely outside the grid.
    fn footprint(&self, aabb: Aabb3d) -> Option<GridFootprint> {
        let to_grid = |point: Vec3| {
            let local = point - self.aabb.min;
            IVec3::new(
                (local.x / self.cell_size) as i32,
                (local.y / self.cell_height) as i32,
                (local.z / self.cell_size) as i32,
            )
        };
        let mut min = to_grid(aabb.min);
        let mut max = to_grid(aabb.max);

        // Early-out if the volume lies entirely outside the grid.
        if max.x < 0 || min.x >= self.width as i32 || max.z < 0 || min.z >= self.height as i32 {
            return None;
        }

        // Clamp the footprint to the grid
        min.x = min.x.max(0);
        max.x = max.x.min(self.width as i32 - 1);
        min.z = min.z.max(0);
        max.z = max.z.min(self.height as i32 - 1);
        Some(GridFootprint { min, max })
    }

    /// Calls `mark` for every walkable span inside the footprint whose floor lies within the footprint's height range.
    /// If `mark` returns `true`, the span is assigned `area`.
    fn mark_footprint(
        &mut self,
        footprint: GridFootprint,
        area: AreaType,
        mut mark: impl FnMut(Vec2) -> bool,
    ) {
        let GridFootprint { min, max } = footprint;
        for z in min.z..=max.z {
            for x in min.x..=max.x {
                let cell = self.cell_at(x as u16, z as u16);
                // Center of the cell on the xz-plane
                let center = Vec2::new(
                    self.aabb.min.x + (x as f32 + 0.5) * self.cell_size,
                    self.aabb.min.z + (z as f32 + 0.5) * self.cell_size,
                );
                for i in cell.index_range() {
                    // Skip if span is removed.
                    if !self.areas[i].is_walkable() {
                        continue;
                    }
                    // Skip if y extents don't overlap.
                    let y = self.spans[i].y as i32;
                    if y < min.y || y > max.y {
                        continue;
                    }
                    if mark(center) {
                        self.areas[i] = area;
                    }
                }
            }
        }
    }

    /// Sets the [`AreaType`] of the walkable spans whose floor is within the given box.
    pub fn mark_box_area(&mut self, aabb: Aabb3d, area: AreaType) {
        let Some(footprint) = self.footprint(aabb) else {
            return;
        };
        self.mark_footprint(footprint, area, |_| true);
    }

    /// Sets the [`AreaType`] of the walkable spans within the given convex volume.
    pub fn mark_convex_poly_area(&mut self, volume: ConvexVolume) {
        // Compute the bounding box of the polygon
        let Some(bounds) = Aabb2d::from_verts(&volume.vertices) else {
            // The volume is empty
            return;
        };
        let aabb = Aabb3d::new(
            [bounds.min.x, volume.min_y, bounds.min.y],
            [bounds.max.x, volume.max_y, bounds.max.y],
        );
        let Some(footprint) = self.footprint(aabb) else {
            return;
        };
        self.mark_footprint(footprint, volume.area, |point| {
            point_in_poly(point, &volume.vertices)
        });
    }

    /// Sets the [`AreaType`] of the walkable spans within the given vertical cylinder.
    ///
    /// # Arguments
    ///
    /// - `position`: The center of the base of the cylinder. [Units: wu]
    /// - `radius`: The radius of the cylinder. [Units: wu]
    /// - `height`: The height of the cylinder. [Units: wu]
    /// - `area`: The area type to assign.
    pub fn mark_cylinder_area(&mut self, position: Vec3, radius: f32, height: f32, area: AreaType) {
        let aabb = Aabb3d::new(
            position - Vec3::new(radius, 0.0, radius),
            position + Vec3::new(radius, height, radius),
        );
        let Some(footprint) = self.footprint(aabb) else {
            return;
        };
        let radius_squared = radius * radius;
        let center = Vec2::new(position.x, position.z);
        self.mark_footprint(footprint, area, |point| {
            point.distance_squared(center) < radius_squared
        });
    }

    /// Applies a 3x3 median filter to the area types of the walkable spans.
    ///
    /// Removes noise from area boundaries, such as single spans of a different area in the middle of another one.
    /// Non-walkable spans are left untouched.
    pub fn median_filter_walkable_area(&mut self) {
        let mut areas = vec![AreaType::MAX; self.spans.len()];

        for z in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let cell = self.cell_at(x as u16, z as u16);
                for i in cell.index_range() {
                    if !self.areas[i].is_walkable() {
                        areas[i] = self.areas[i];
                        continue;
                    }

                    let mut neighbor_areas = [self.areas[i]; 9];
                    for dir in 0..4 {
                        let Some((a_x, a_z, a_index)) = self.neighbor_index(x, z, i, dir) else {
                            continue;
                        };
                        if self.areas[a_index].is_walkable() {
                            neighbor_areas[dir as usize * 2] = self.areas[a_index];
                        }

                        let dir2 = (dir + 1) & 0x3;
                        let Some((_, _, b_index)) = self.neighbor_index(a_x, a_z, a_index, dir2)
                        else {
                            continue;
                        };
                        if self.areas[b_index].is_walkable() {
                            neighbor_areas[dir as usize * 2 + 1] = self.areas[b_index];
                        }
                    }
                    neighbor_areas.sort_unstable();
                    areas[i] = neighbor_areas[4];
                }
            }
        }
        self.areas = areas;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compact_heightfield::tests::flat_compact;

    fn count(chf: &CompactHeightfield, area: AreaType) -> usize {
        chf.areas.iter().filter(|a| **a == area).count()
    }

    #[test]
    fn box_marks_enclosed_floors() {
        let mut chf = flat_compact(10, 10);
        chf.mark_box_area(
            Aabb3d::new([2.0, 0.0, 2.0], [4.5, 5.0, 4.5]),
            AreaType(3),
        );
        assert_eq!(count(&chf, AreaType(3)), 9);
    }

    #[test]
    fn box_above_floor_marks_nothing() {
        let mut chf = flat_compact(10, 10);
        chf.mark_box_area(
            Aabb3d::new([0.0, 5.0, 0.0], [10.0, 8.0, 10.0]),
            AreaType(3),
        );
        assert_eq!(count(&chf, AreaType(3)), 0);
    }

    #[test]
    fn convex_volume_marks_cell_centers_inside() {
        let mut chf = flat_compact(10, 10);
        chf.mark_convex_poly_area(ConvexVolume {
            vertices: vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(4.0, 0.0),
                Vec2::new(4.0, 4.0),
                Vec2::new(0.0, 4.0),
            ],
            min_y: -1.0,
            max_y: 5.0,
            area: AreaType(7),
        });
        assert_eq!(count(&chf, AreaType(7)), 16);
        assert_eq!(count(&chf, AreaType::DEFAULT_WALKABLE), 84);
    }

    #[test]
    fn cylinder_marks_disc() {
        let mut chf = flat_compact(10, 10);
        chf.mark_cylinder_area(Vec3::new(5.0, 0.0, 5.0), 1.0, 5.0, AreaType::NOT_WALKABLE);
        // The four cells around (5, 5) have their centers within the radius.
        assert_eq!(count(&chf, AreaType::NOT_WALKABLE), 4);
    }

    #[test]
    fn volumes_outside_the_field_are_ignored() {
        let mut chf = flat_compact(4, 4);
        chf.mark_cylinder_area(Vec3::new(50.0, 0.0, 50.0), 2.0, 5.0, AreaType(2));
        chf.mark_convex_poly_area(ConvexVolume {
            vertices: vec![],
            min_y: 0.0,
            max_y: 1.0,
            area: AreaType(2),
        });
        assert_eq!(count(&chf, AreaType(2)), 0);
    }

    #[test]
    fn median_filter_removes_single_span_noise() {
        let mut chf = flat_compact(5, 5);
        let center = chf.cell_at(2, 2).index() as usize;
        chf.areas[center] = AreaType(9);
        chf.median_filter_walkable_area();
        assert_eq!(chf.areas[center], AreaType::DEFAULT_WALKABLE);
        assert_eq!(count(&chf, AreaType(9)), 0);
    }
}
