//! Contains methods for rasterizing the triangles of a [`TriMesh`] into a [`Heightfield`].

use glam::Vec3A;
use thiserror::Error;

use crate::{
    Aabb3d,
    heightfield::{Heightfield, SpanInsertion, SpanInsertionError},
    span::{AreaType, Span, SpanBuilder},
    trimesh::TriMesh,
};

impl Heightfield {
    /// Rasterizes the triangles of a [`TriMesh`] into the heightfield.
    ///
    /// Spans are only added for the parts of triangles that overlap the heightfield bounds.
    /// Degenerate triangles and triangles with non-finite vertices are skipped.
    ///
    /// # Arguments
    ///
    /// - `trimesh`: The triangles to rasterize, with one area type per triangle.
    /// - `flag_merge_threshold`: The distance where the walkable flag is favored over the non-walkable flag. [Limit: >= 0] [Units: vx]
    ///
    /// # Errors
    ///
    /// Returns an error if the trimesh is malformed, i.e. it has a different number of area types than triangles,
    /// or one of its triangles refers to a vertex that does not exist.
    pub fn rasterize_triangles(
        &mut self,
        trimesh: &TriMesh,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        if trimesh.indices.len() != trimesh.area_types.len() {
            return Err(RasterizationError::AreaTypeCountMismatch {
                triangles: trimesh.indices.len(),
                area_types: trimesh.area_types.len(),
            });
        }
        for (triangle, area) in trimesh.indices.iter().zip(trimesh.area_types.iter()) {
            let mut vertices = [Vec3A::ZERO; 3];
            for (vertex, index) in vertices.iter_mut().zip(triangle.to_array()) {
                *vertex = *trimesh.vertices.get(index as usize).ok_or(
                    RasterizationError::VertexIndexOutOfBounds {
                        index,
                        vertex_count: trimesh.vertices.len(),
                    },
                )?;
            }
            self.rasterize_triangle(vertices, *area, flag_merge_threshold)?;
        }
        Ok(())
    }

    /// Rasterizes a single triangle into the heightfield.
    ///
    /// Returns `Ok` without adding spans if the triangle is degenerate or lies outside of the heightfield.
    ///
    /// # Errors
    ///
    /// Returns an error if a span could not be inserted into its column.
    pub fn rasterize_triangle(
        &mut self,
        triangle: [Vec3A; 3],
        area: AreaType,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        let [a, b, c] = triangle;
        if !(a.is_finite() && b.is_finite() && c.is_finite()) {
            tracing::trace!("Skipping triangle with non-finite vertices: {triangle:?}");
            return Ok(());
        }
        if a == b || b == c || a == c || (b - a).cross(c - a).length_squared() == 0.0 {
            tracing::trace!("Skipping degenerate triangle: {triangle:?}");
            return Ok(());
        }

        // Calculate the bounding box of the triangle.
        let triangle_aabb = Aabb3d {
            min: a.min(b).min(c).into(),
            max: a.max(b).max(c).into(),
        };

        // If the triangle does not touch the bounding box of the heightfield, skip the triangle.
        if !triangle_aabb.intersects(&self.aabb) {
            return Ok(());
        }

        let width = self.width as i32;
        let height = self.height as i32;
        let aabb_min = Vec3A::from(self.aabb.min);
        let by = self.aabb.max.y - self.aabb.min.y;
        let inverse_cell_size = 1.0 / self.cell_size;
        let inverse_cell_height = 1.0 / self.cell_height;

        // Calculate the footprint of the triangle on the grid's z-axis
        let z0 = ((triangle_aabb.min.z - self.aabb.min.z) * inverse_cell_size) as i32;
        let z1 = ((triangle_aabb.max.z - self.aabb.min.z) * inverse_cell_size) as i32;

        // use -1 rather than 0 to cut the polygon properly at the start of the tile
        let z0 = z0.clamp(-1, height - 1);
        let z1 = z1.clamp(0, height - 1);

        // Clip the triangle into all grid cells it touches.
        let mut input = ClipPolygon::from_triangle(triangle);
        for z in z0..=z1 {
            // Clip polygon to row. Store the remaining polygon as well
            let cell_z = aabb_min.z + z as f32 * self.cell_size;
            let (row, rest) = input.divide(cell_z + self.cell_size, Axis::Z);
            input = rest;

            if row.len < 3 || z < 0 {
                continue;
            }

            // find X-axis bounds of the row
            let (min_x, max_x) = row
                .vertices()
                .iter()
                .fold((f32::MAX, f32::MIN), |(min, max), v| {
                    (min.min(v.x), max.max(v.x))
                });
            let x0 = ((min_x - aabb_min.x) * inverse_cell_size) as i32;
            let x1 = ((max_x - aabb_min.x) * inverse_cell_size) as i32;
            if x1 < 0 || x0 >= width {
                continue;
            }
            let x0 = x0.clamp(-1, width - 1);
            let x1 = x1.clamp(0, width - 1);

            let mut row_rest = row;
            for x in x0..=x1 {
                // Clip polygon to column. Store the remaining polygon as well
                let cell_x = aabb_min.x + x as f32 * self.cell_size;
                let (cell, rest) = row_rest.divide(cell_x + self.cell_size, Axis::X);
                row_rest = rest;

                if cell.len < 3 || x < 0 {
                    continue;
                }

                // Calculate min and max of the span.
                let (span_min, span_max) = cell
                    .vertices()
                    .iter()
                    .fold((f32::MAX, f32::MIN), |(min, max), v| {
                        (min.min(v.y), max.max(v.y))
                    });
                let span_min = span_min - aabb_min.y;
                let span_max = span_max - aabb_min.y;

                // Skip the span if it's completely outside the heightfield bounding box
                if span_max < 0.0 || span_min > by {
                    continue;
                }

                // Clamp the span to the heightfield bounding box.
                let span_min = span_min.max(0.0);
                let span_max = span_max.min(by);

                // Snap the span to the heightfield height grid.
                let span_min_cell_index = ((span_min * inverse_cell_height).floor() as i32)
                    .clamp(0, Span::MAX_HEIGHT as i32)
                    as u16;
                let span_max_cell_index = ((span_max * inverse_cell_height).ceil() as i32)
                    .max(span_min_cell_index as i32 + 1)
                    .min(Span::MAX_HEIGHT as i32) as u16;

                self.add_span(SpanInsertion {
                    x: x as u16,
                    z: z as u16,
                    flag_merge_threshold,
                    span: SpanBuilder {
                        min: span_min_cell_index,
                        max: span_max_cell_index,
                        area,
                        next: None,
                    }
                    .build(),
                })?;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Axis {
    X,
    Z,
}

/// A convex polygon produced by clipping a triangle against grid lines.
/// Clipping a triangle against two axis-aligned lines yields at most 7 vertices.
#[derive(Debug, Clone, Copy)]
struct ClipPolygon {
    buffer: [Vec3A; Self::CAPACITY],
    len: usize,
}

impl ClipPolygon {
    const CAPACITY: usize = 12;

    fn empty() -> Self {
        Self {
            buffer: [Vec3A::ZERO; Self::CAPACITY],
            len: 0,
        }
    }

    fn from_triangle(triangle: [Vec3A; 3]) -> Self {
        let mut polygon = Self::empty();
        polygon.buffer[..3].copy_from_slice(&triangle);
        polygon.len = 3;
        polygon
    }

    #[inline]
    fn vertices(&self) -> &[Vec3A] {
        &self.buffer[..self.len]
    }

    #[inline]
    fn push(&mut self, vertex: Vec3A) {
        if self.len < Self::CAPACITY {
            self.buffer[self.len] = vertex;
            self.len += 1;
        }
    }

    /// Divides the polygon into two along an axis-aligned line.
    /// The first polygon holds the part below `axis_offset`, the second the part above it.
    fn divide(&self, axis_offset: f32, axis: Axis) -> (Self, Self) {
        let coordinate = |v: Vec3A| match axis {
            Axis::X => v.x,
            Axis::Z => v.z,
        };
        // How far positive or negative away from the separating axis is each vertex.
        let mut deltas = [0.0_f32; Self::CAPACITY];
        for (delta, vertex) in deltas.iter_mut().zip(self.vertices()) {
            *delta = axis_offset - coordinate(*vertex);
        }

        let mut below = Self::empty();
        let mut above = Self::empty();
        if self.len == 0 {
            return (below, above);
        }
        let mut b = self.len - 1;
        for a in 0..self.len {
            let vertex_a = self.buffer[a];
            let vertex_b = self.buffer[b];
            let (delta_a, delta_b) = (deltas[a], deltas[b]);
            let same_side = (delta_a >= 0.0) == (delta_b >= 0.0);
            if !same_side {
                // The edge crosses the line. Add the intersection to both polygons.
                let s = delta_b / (delta_b - delta_a);
                let intersection = vertex_b + (vertex_a - vertex_b) * s;
                below.push(intersection);
                above.push(intersection);

                // Add the vertex to the polygon on its side.
                // Vertices on the line were already added as the intersection.
                if delta_a > 0.0 {
                    below.push(vertex_a);
                } else if delta_a < 0.0 {
                    above.push(vertex_a);
                }
            } else {
                // Add the vertex to the polygon on its side.
                // Vertices on the line go to both polygons.
                if delta_a >= 0.0 {
                    below.push(vertex_a);
                    if delta_a != 0.0 {
                        b = a;
                        continue;
                    }
                }
                above.push(vertex_a);
            }
            b = a;
        }
        (below, above)
    }
}

/// Errors that can occur when rasterizing triangles into a [`Heightfield`].
#[derive(Error, Debug)]
pub enum RasterizationError {
    /// The trimesh does not have one area type per triangle.
    #[error("Trimesh has {triangles} triangles but {area_types} area types")]
    AreaTypeCountMismatch {
        /// The number of triangles
        triangles: usize,
        /// The number of area types
        area_types: usize,
    },
    /// A triangle refers to a vertex that does not exist.
    #[error("Triangle refers to vertex {index}, but the trimesh only has {vertex_count} vertices")]
    VertexIndexOutOfBounds {
        /// The offending vertex index
        index: u32,
        /// The number of vertices in the trimesh
        vertex_count: usize,
    },
    /// A span could not be inserted into the heightfield.
    #[error(transparent)]
    SpanInsertion(#[from] SpanInsertionError),
}

#[cfg(test)]
mod tests {
    use glam::{UVec3, Vec3};

    use super::*;
    use crate::HeightfieldBuilder;

    fn heightfield() -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3::ZERO, [4.0, 4.0, 4.0]),
            cell_size: 1.0,
            cell_height: 0.5,
        }
        .build()
        .unwrap()
    }

    fn quad(y: f32, size: f32) -> TriMesh {
        let mut trimesh = TriMesh::new(
            vec![
                Vec3A::new(0.0, y, 0.0),
                Vec3A::new(0.0, y, size),
                Vec3A::new(size, y, size),
                Vec3A::new(size, y, 0.0),
            ],
            vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
        );
        trimesh.mark_walkable_triangles(45.0_f32.to_radians());
        trimesh
    }

    #[test]
    fn flat_quad_yields_one_span_per_column() {
        let mut heightfield = heightfield();
        heightfield.rasterize_triangles(&quad(2.0, 4.0), 1).unwrap();
        for z in 0..heightfield.height {
            for x in 0..heightfield.width {
                let spans: Vec<_> = heightfield.column_spans(x, z).collect();
                assert_eq!(spans.len(), 1, "column ({x}, {z})");
                assert_eq!(spans[0].min(), 4);
                assert_eq!(spans[0].max(), 5);
                assert_eq!(spans[0].area(), AreaType::DEFAULT_WALKABLE);
            }
        }
    }

    #[test]
    fn partial_quad_only_covers_its_footprint() {
        let mut heightfield = heightfield();
        heightfield.rasterize_triangles(&quad(1.0, 2.0), 1).unwrap();
        assert!(heightfield.span_at(0, 0).is_some());
        assert!(heightfield.span_at(1, 1).is_some());
        assert!(heightfield.span_at(3, 3).is_none());
    }

    #[test]
    fn skips_degenerate_and_outside_triangles() {
        let mut heightfield = heightfield();
        let trimesh = TriMesh {
            vertices: vec![
                Vec3A::new(0.0, 1.0, 0.0),
                Vec3A::new(0.0, 1.0, 0.0),
                Vec3A::new(1.0, 1.0, 1.0),
                Vec3A::new(10.0, 1.0, 10.0),
                Vec3A::new(10.0, 1.0, 11.0),
                Vec3A::new(11.0, 1.0, 11.0),
                Vec3A::new(f32::NAN, 1.0, 0.0),
            ],
            indices: vec![
                UVec3::new(0, 1, 2),
                UVec3::new(3, 4, 5),
                UVec3::new(6, 1, 2),
            ],
            area_types: vec![AreaType::DEFAULT_WALKABLE; 3],
        };
        heightfield.rasterize_triangles(&trimesh, 1).unwrap();
        assert!(heightfield.allocated_spans.is_empty());
    }

    #[test]
    fn rejects_malformed_trimesh() {
        let mut heightfield = heightfield();
        let mut trimesh = quad(1.0, 2.0);
        trimesh.area_types.pop();
        assert!(matches!(
            heightfield.rasterize_triangles(&trimesh, 1),
            Err(RasterizationError::AreaTypeCountMismatch { .. })
        ));

        let mut trimesh = quad(1.0, 2.0);
        trimesh.indices[0].x = 42;
        assert!(matches!(
            heightfield.rasterize_triangles(&trimesh, 1),
            Err(RasterizationError::VertexIndexOutOfBounds { index: 42, .. })
        ));
    }

    #[test]
    fn stacked_quads_create_separate_spans() {
        let mut heightfield = heightfield();
        heightfield.rasterize_triangles(&quad(0.5, 4.0), 1).unwrap();
        heightfield.rasterize_triangles(&quad(3.0, 4.0), 1).unwrap();
        let spans: Vec<_> = heightfield.column_spans(2, 2).collect();
        assert_eq!(spans.len(), 2);
        assert!(spans[0].max() < spans[1].min());
    }

    #[test]
    fn divides_polygon_along_axis() {
        let triangle = ClipPolygon::from_triangle([
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(2.0, 0.0, 0.0),
            Vec3A::new(0.0, 0.0, 2.0),
        ]);
        let (below, above) = triangle.divide(1.0, Axis::X);
        assert_eq!(below.len, 4);
        assert_eq!(above.len, 3);
        assert!(below.vertices().iter().all(|v| v.x <= 1.0));
        assert!(above.vertices().iter().all(|v| v.x >= 1.0));
    }
}
