//! Height detail for the polygons of a [`PolygonNavmesh`].
//!
//! Every polygon gets its own small triangle mesh that follows the surface of the
//! [`CompactHeightfield`] more closely than the flat polygon does.

use std::collections::VecDeque;

use glam::{U16Vec3, Vec2, Vec3, Vec3A, Vec3Swizzles as _};
use thiserror::Error;

use crate::{
    CompactHeightfield, PolygonNavmesh, RegionId,
    math::{
        dir_offset, distance_squared_between_point_and_line_vec2,
        distance_squared_between_point_and_line_vec3, next, prev,
    },
};

/// Contains triangle meshes that represent detailed height data associated
/// with the polygons in its associated [`PolygonNavmesh`].
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct DetailNavmesh {
    /// One sub-mesh per polygon of the source mesh, in polygon order.
    pub meshes: Vec<SubMesh>,
    /// The mesh vertices in world space.
    pub vertices: Vec<Vec3>,
    /// The mesh triangles. Indices are relative to the [`SubMesh::base_vertex_index`] of the owning sub-mesh.
    pub triangles: Vec<[u8; 3]>,
    /// Per triangle edge flags, two bits per edge. See [`DetailNavmesh::EDGE_BOUNDARY`].
    pub triangle_flags: Vec<u8>,
}

/// The slice of a [`DetailNavmesh`] that belongs to one polygon.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct SubMesh {
    /// Index of the first vertex in [`DetailNavmesh::vertices`].
    pub base_vertex_index: u32,
    /// Number of vertices. The first vertices are the polygon's own vertices.
    pub vertex_count: u32,
    /// Index of the first triangle in [`DetailNavmesh::triangles`].
    pub base_triangle_index: u32,
    /// Number of triangles.
    pub triangle_count: u32,
}

/// Errors that can occur while building a [`DetailNavmesh`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetailNavmeshError {
    /// Polygons may have more vertices than a detail sub-mesh can hold.
    #[error(
        "Polygons with up to {max_vertices_per_polygon} vertices exceed the detail mesh limit of 127 vertices per polygon"
    )]
    TooManyVerticesPerPolygon {
        /// The polygon size of the source mesh.
        max_vertices_per_polygon: u16,
    },
    /// No walkable span near the polygon could seed its height samples.
    #[error("Found no span to sample heights for polygon {polygon}")]
    NoSeedSpan {
        /// The index of the polygon in the source mesh.
        polygon: usize,
    },
}

const MAX_VERTICES: usize = 127;
/// Max triangles for delaunay is `2n-2-k` (n = number of vertices, k = number of hull vertices).
const MAX_TRIANGLES: usize = 255;
const MAX_VERTICES_PER_EDGE: usize = 32;
const UNSET_HEIGHT: u16 = u16::MAX;

impl DetailNavmesh {
    /// Flag of a triangle edge that lies on the outline of its polygon.
    /// Edge `n` of a triangle uses the bits `EDGE_BOUNDARY << (2 * n)`.
    pub const EDGE_BOUNDARY: u8 = 0x1;

    /// Builds a detail mesh from the provided polygon mesh.
    ///
    /// # Arguments
    ///
    /// - `mesh`: A fully built polygon mesh.
    /// - `heightfield`: The compact heightfield used to build the polygon mesh.
    /// - `sample_distance`: Sets the distance to use when sampling the heightfield. `0` disables sampling. [Limit: >=0] [Units: wu]
    /// - `sample_max_error`: The maximum distance the detail mesh surface should deviate from heightfield data. [Limit: >=0] [Units: wu]
    ///
    /// # Errors
    ///
    /// Returns an error if the polygons are too large for a sub-mesh, or if no heights can be found for a polygon.
    pub fn new(
        mesh: &PolygonNavmesh,
        heightfield: &CompactHeightfield,
        sample_distance: f32,
        sample_max_error: f32,
    ) -> Result<Self, DetailNavmeshError> {
        let mut detail = DetailNavmesh::default();
        if mesh.vertices.is_empty() || mesh.polygon_count() == 0 {
            return Ok(detail);
        }
        if mesh.max_vertices_per_polygon as usize > MAX_VERTICES {
            return Err(DetailNavmeshError::TooManyVerticesPerPolygon {
                max_vertices_per_polygon: mesh.max_vertices_per_polygon,
            });
        }

        let cell_size = mesh.cell_size;
        let cell_height = mesh.cell_height;
        let origin = mesh.aabb.min;
        let params = SampleParams {
            sample_distance,
            sample_max_error,
            height_search_radius: 1.max(mesh.max_edge_error.ceil() as i32),
            cell_size: heightfield.cell_size,
            cell_height: heightfield.cell_height,
        };

        // Find max size for a polygon area.
        let bounds: Vec<Option<PatchBounds>> = (0..mesh.polygon_count())
            .map(|i| {
                PatchBounds::of_polygon(
                    mesh.polygon(i),
                    &mesh.vertices,
                    heightfield.width,
                    heightfield.height,
                )
            })
            .collect();
        let max_patch_len = bounds
            .iter()
            .flatten()
            .map(|bounds| bounds.width() as usize * bounds.height() as usize)
            .max()
            .unwrap_or_default();
        let polygon_vertex_count: usize = (0..mesh.polygon_count())
            .map(|i| mesh.polygon(i).len())
            .sum();

        let mut patch = HeightPatch {
            data: Vec::with_capacity(max_patch_len),
            ..Default::default()
        };
        let mut queue = VecDeque::with_capacity(512);
        detail.meshes.reserve(mesh.polygon_count());
        let vertex_capacity = polygon_vertex_count + polygon_vertex_count / 2;
        detail.vertices.reserve(vertex_capacity);
        detail.triangles.reserve(vertex_capacity * 2);
        detail.triangle_flags.reserve(vertex_capacity * 2);

        for (i, bounds) in bounds.iter().enumerate() {
            let polygon = mesh.polygon(i);
            let mut sub_mesh = SubMesh {
                base_vertex_index: detail.vertices.len() as u32,
                base_triangle_index: detail.triangles.len() as u32,
                ..Default::default()
            };
            let Some(bounds) = bounds else {
                tracing::warn!("Polygon {i} covers no cells, its detail mesh stays empty");
                detail.meshes.push(sub_mesh);
                continue;
            };

            // Store polygon vertices for processing.
            let polygon_vertices: Vec<Vec3A> = polygon
                .iter()
                .map(|&v| {
                    let v = mesh.vertices[v as usize].as_vec3a();
                    Vec3A::new(v.x * cell_size, v.y * cell_height, v.z * cell_size)
                })
                .collect();

            // Get the height data from the area of the polygon.
            patch.reset(bounds);
            if !patch.gather_heights(
                heightfield,
                polygon,
                &mesh.vertices,
                mesh.border_size,
                mesh.regions[i],
                &mut queue,
            ) {
                return Err(DetailNavmeshError::NoSeedSpan { polygon: i });
            }

            let polygon_detail = build_polygon_detail(&polygon_vertices, &params, &patch);

            // Move detail verts to world space.
            detail
                .vertices
                .extend(polygon_detail.vertices.iter().map(|&v| {
                    Vec3::new(
                        v.x + origin.x,
                        v.y + origin.y + heightfield.cell_height,
                        v.z + origin.z,
                    )
                }));
            detail.triangles.extend(
                polygon_detail
                    .triangles
                    .iter()
                    .map(|&[a, b, c]| [a as u8, b as u8, c as u8]),
            );
            detail.triangle_flags.extend(polygon_detail.flags);
            sub_mesh.vertex_count = polygon_detail.vertices.len() as u32;
            sub_mesh.triangle_count = polygon_detail.triangles.len() as u32;
            detail.meshes.push(sub_mesh);
        }

        tracing::debug!(
            meshes = detail.meshes.len(),
            vertices = detail.vertices.len(),
            triangles = detail.triangles.len(),
            "Built detail mesh"
        );
        Ok(detail)
    }

    /// The vertices of the sub-mesh `index`.
    pub fn sub_mesh_vertices(&self, index: usize) -> &[Vec3] {
        let mesh = &self.meshes[index];
        let start = mesh.base_vertex_index as usize;
        &self.vertices[start..start + mesh.vertex_count as usize]
    }

    /// The triangles of the sub-mesh `index` together with their edge flags.
    pub fn sub_mesh_triangles(&self, index: usize) -> impl Iterator<Item = ([u8; 3], u8)> + '_ {
        let mesh = &self.meshes[index];
        let range = mesh.base_triangle_index as usize
            ..(mesh.base_triangle_index + mesh.triangle_count) as usize;
        self.triangles[range.clone()]
            .iter()
            .copied()
            .zip(self.triangle_flags[range].iter().copied())
    }

    /// Returns whether edge `edge` (0, 1 or 2) of a triangle with `flags` lies on its polygon's outline.
    #[inline]
    pub fn is_boundary_edge(flags: u8, edge: usize) -> bool {
        (flags >> (edge * 2)) & 0x3 == Self::EDGE_BOUNDARY
    }
}

struct SampleParams {
    sample_distance: f32,
    sample_max_error: f32,
    height_search_radius: i32,
    cell_size: f32,
    cell_height: f32,
}

/// The cell rectangle around a polygon, in the coordinates of the polygon mesh.
#[derive(Debug, Clone, Copy)]
struct PatchBounds {
    x_min: u16,
    x_max: u16,
    z_min: u16,
    z_max: u16,
}

impl PatchBounds {
    fn of_polygon(polygon: &[u16], vertices: &[U16Vec3], width: u16, height: u16) -> Option<Self> {
        let mut x_min = width;
        let mut x_max = 0;
        let mut z_min = height;
        let mut z_max = 0;
        for &v in polygon {
            let v = vertices[v as usize];
            x_min = x_min.min(v.x);
            x_max = x_max.max(v.x);
            z_min = z_min.min(v.z);
            z_max = z_max.max(v.z);
        }
        let bounds = Self {
            x_min: x_min.saturating_sub(1),
            x_max: width.min(x_max.saturating_add(1)),
            z_min: z_min.saturating_sub(1),
            z_max: height.min(z_max.saturating_add(1)),
        };
        (bounds.x_min < bounds.x_max && bounds.z_min < bounds.z_max).then_some(bounds)
    }

    fn width(&self) -> u16 {
        self.x_max - self.x_min
    }

    fn height(&self) -> u16 {
        self.z_max - self.z_min
    }
}

/// Heights of the spans below a polygon, one per cell of its [`PatchBounds`].
#[derive(Debug, Default)]
struct HeightPatch {
    data: Vec<u16>,
    x_min: i32,
    z_min: i32,
    width: i32,
    height: i32,
}

impl HeightPatch {
    fn reset(&mut self, bounds: &PatchBounds) {
        self.x_min = bounds.x_min as i32;
        self.z_min = bounds.z_min as i32;
        self.width = bounds.width() as i32;
        self.height = bounds.height() as i32;
        self.data.clear();
        self.data
            .resize((self.width * self.height) as usize, UNSET_HEIGHT);
    }

    /// Index of the patch cell at `(x, z)` relative to the patch origin.
    #[inline]
    fn index(&self, x: i32, z: i32) -> Option<usize> {
        (x >= 0 && z >= 0 && x < self.width && z < self.height)
            .then_some((x + z * self.width) as usize)
    }

    /// Fills the patch with the heights of the spans under `polygon`.
    /// Returns `false` if no span could be found to start from.
    ///
    /// Reads from the heightfield are offset by `border_size`, since the polygon mesh vertices
    /// have the border removed already.
    fn gather_heights(
        &mut self,
        heightfield: &CompactHeightfield,
        polygon: &[u16],
        vertices: &[U16Vec3],
        border_size: u16,
        region: RegionId,
        queue: &mut VecDeque<(i32, i32, usize)>,
    ) -> bool {
        let border_size = border_size as i32;
        queue.clear();
        self.data.fill(UNSET_HEIGHT);

        // Polygons merged from several regions may overlap other polygons of those regions,
        // so their heights can't be copied by region.
        let mut empty = true;
        if !region.is_none() {
            // Copy the height from the same region, and mark region borders as seed points to fill the rest.
            for hz in 0..self.height {
                let z = self.z_min + hz + border_size;
                for hx in 0..self.width {
                    let x = self.x_min + hx + border_size;
                    let cell = heightfield.cell_at(x as u16, z as u16);
                    for i in cell.index_range() {
                        let span = &heightfield.spans[i];
                        if span.region != region {
                            continue;
                        }
                        self.data[(hx + hz * self.width) as usize] = span.y;
                        empty = false;

                        // If any of the neighbours is not in same region, add the current location as flood fill start.
                        let border = (0..4).any(|dir| {
                            heightfield
                                .neighbor_index(x, z, i, dir)
                                .is_some_and(|(_, _, a)| heightfield.spans[a].region != region)
                        });
                        if border {
                            queue.push_back((x, z, i));
                        }
                        break;
                    }
                }
            }
        }

        // If the polygon does not contain any points from the current region (rare, but happens)
        // or if it could potentially be overlapping polygons of the same region,
        // then use the center as the seed point.
        if empty {
            let Some(seed) =
                self.seed_with_polygon_center(heightfield, polygon, vertices, border_size)
            else {
                return false;
            };
            queue.push_back(seed);
        }

        // The seeds are centered in the polygon, so a breadth first search will not wander onto
        // overlapping polygons and sample wrong heights.
        while let Some((cx, cz, ci)) = queue.pop_front() {
            for dir in 0..4 {
                let Some((ax, az, ai)) = heightfield.neighbor_index(cx, cz, ci, dir) else {
                    continue;
                };
                let Some(index) =
                    self.index(ax - self.x_min - border_size, az - self.z_min - border_size)
                else {
                    continue;
                };
                if self.data[index] != UNSET_HEIGHT {
                    continue;
                }
                self.data[index] = heightfield.spans[ai].y;
                queue.push_back((ax, az, ai));
            }
        }
        true
    }

    /// Walks from the span closest to a polygon vertex towards the polygon center.
    /// Returns the reached span in heightfield coordinates, with its height stored in the patch.
    fn seed_with_polygon_center(
        &mut self,
        heightfield: &CompactHeightfield,
        polygon: &[u16],
        vertices: &[U16Vec3],
        border_size: i32,
    ) -> Option<(i32, i32, usize)> {
        const OFFSETS: [(i32, i32); 9] = [
            (0, 0),
            (-1, -1),
            (0, -1),
            (1, -1),
            (1, 0),
            (1, 1),
            (0, 1),
            (-1, 1),
            (-1, 0),
        ];

        // Find cell closest to a poly vertex.
        let mut start = None;
        let mut min_distance = UNSET_HEIGHT as i32;
        'search: for &v in polygon {
            let vertex = vertices[v as usize].as_ivec3();
            for (offset_x, offset_z) in OFFSETS {
                if min_distance == 0 {
                    break 'search;
                }
                let ax = vertex.x + offset_x;
                let az = vertex.z + offset_z;
                if ax < self.x_min
                    || ax >= self.x_min + self.width
                    || az < self.z_min
                    || az >= self.z_min + self.height
                {
                    continue;
                }
                let cell =
                    heightfield.cell_at((ax + border_size) as u16, (az + border_size) as u16);
                for i in cell.index_range() {
                    let distance = (vertex.y - heightfield.spans[i].y as i32).abs();
                    if distance < min_distance {
                        start = Some((ax, az, i));
                        min_distance = distance;
                    }
                }
            }
        }
        let start = start?;

        let count = polygon.len() as i32;
        let (sum_x, sum_z) = polygon.iter().fold((0, 0), |(x, z), &v| {
            let v = vertices[v as usize];
            (x + v.x as i32, z + v.z as i32)
        });
        let center_x = sum_x / count;
        let center_z = sum_z / count;

        // Depth first search towards the center. The patch marks visited cells.
        let mut stack = vec![start];
        let mut dirs = [0, 1, 2, 3];
        self.data.fill(0);
        let (mut cx, mut cz, mut ci) = start;
        let mut reached_center = false;
        while let Some(top) = stack.pop() {
            (cx, cz, ci) = top;
            if cx == center_x && cz == center_z {
                reached_center = true;
                break;
            }

            // Prefer the direction towards the center on the axis that is not aligned yet.
            let direct_dir = if cx == center_x {
                dir_offset(0, if center_z > cz { 1 } else { -1 })
            } else {
                dir_offset(if center_x > cx { 1 } else { -1 }, 0)
            }
            .map_or(3, usize::from);

            // Push the direct dir last so we start with this on next iteration.
            dirs.swap(direct_dir, 3);
            for dir in dirs {
                let Some((nx, nz, ni)) =
                    heightfield.neighbor_index(cx + border_size, cz + border_size, ci, dir)
                else {
                    continue;
                };
                let (nx, nz) = (nx - border_size, nz - border_size);
                let Some(index) = self.index(nx - self.x_min, nz - self.z_min) else {
                    continue;
                };
                if self.data[index] != 0 {
                    continue;
                }
                self.data[index] = 1;
                stack.push((nx, nz, ni));
            }
            dirs.swap(direct_dir, 3);
        }
        if !reached_center {
            tracing::warn!("Walk towards polygon center failed to reach center");
        }

        self.data.fill(UNSET_HEIGHT);
        if let Some(index) = self.index(cx - self.x_min, cz - self.z_min) {
            self.data[index] = heightfield.spans[ci].y;
        }
        Some((cx + border_size, cz + border_size, ci))
    }

    /// The height of the cell under `position`. Unset cells fall back to the closest set
    /// height within a spiral of `radius` cells.
    fn height_at(&self, position: Vec3A, params: &SampleParams) -> u16 {
        let inverse_cell_size = 1.0 / params.cell_size;
        let ix = (position.x * inverse_cell_size + 0.01).floor() as i32;
        let iz = (position.z * inverse_cell_size + 0.01).floor() as i32;
        let ix = (ix - self.x_min).clamp(0, self.width - 1);
        let iz = (iz - self.z_min).clamp(0, self.height - 1);
        let mut height = self.data[(ix + iz * self.width) as usize];
        if height != UNSET_HEIGHT {
            return height;
        }

        // Special case when data might be bad.
        // Walk adjacent cells in a spiral up to `radius`, and look for a pixel which has a valid height.
        let (mut x, mut z, mut dx, mut dz) = (1, 0, 1, 0);
        let max_size = params.height_search_radius * 2 + 1;
        let max_iter = max_size * max_size - 1;
        let mut next_ring_iter_start = 8;
        let mut next_ring_iters = 16;
        let mut min_distance = f32::MAX;
        for i in 0..max_iter {
            if let Some(index) = self.index(ix + x, iz + z) {
                let candidate = self.data[index];
                if candidate != UNSET_HEIGHT {
                    let distance = (candidate as f32 * params.cell_height - position.y).abs();
                    if distance < min_distance {
                        height = candidate;
                        min_distance = distance;
                    }
                }
            }

            // Stop once a ring yielded a height.
            if i + 1 == next_ring_iter_start {
                if height != UNSET_HEIGHT {
                    break;
                }
                next_ring_iter_start += next_ring_iters;
                next_ring_iters += 8;
            }

            if x == z || (x < 0 && x == -z) || (x > 0 && x == 1 - z) {
                (dx, dz) = (-dz, dx);
            }
            x += dx;
            z += dz;
        }
        height
    }
}

/// The triangulation of a single polygon, in vertices relative to the polygon mesh origin.
struct PolygonDetail {
    vertices: Vec<Vec3A>,
    triangles: Vec<[usize; 3]>,
    flags: Vec<u8>,
}

impl PolygonDetail {
    fn new(vertices: Vec<Vec3A>, triangles: Vec<[usize; 3]>, hull: &[usize]) -> Self {
        let flags = triangles
            .iter()
            .map(|&[a, b, c]| {
                let mut flags = 0;
                for (edge, (from, to)) in [(a, b), (b, c), (c, a)].into_iter().enumerate() {
                    if on_hull(from, to, hull) {
                        flags |= DetailNavmesh::EDGE_BOUNDARY << (edge * 2);
                    }
                }
                flags
            })
            .collect();
        Self {
            vertices,
            triangles,
            flags,
        }
    }
}

fn build_polygon_detail(
    polygon: &[Vec3A],
    params: &SampleParams,
    patch: &HeightPatch,
) -> PolygonDetail {
    let polygon_len = polygon.len();
    let sample_distance = params.sample_distance;
    let mut vertices = polygon.to_vec();
    let mut hull: Vec<usize> = Vec::with_capacity(MAX_VERTICES);
    let mut triangles = Vec::new();

    let min_extent = polygon_min_extent_squared(polygon);

    // Tessellate outlines.
    // This is done in a separate pass in order to ensure seamless height values across the polygon boundaries.
    if sample_distance > 0.0 {
        let mut edge: Vec<Vec3A> = Vec::with_capacity(MAX_VERTICES_PER_EDGE + 1);
        let mut indices: Vec<usize> = Vec::with_capacity(MAX_VERTICES_PER_EDGE);
        for i in 0..polygon_len {
            let j = prev(i, polygon_len);
            let mut vj = polygon[j];
            let mut vi = polygon[i];
            // Make sure the segments are always handled in same order using lexological sort or else there will be seams.
            let swapped = if (vj.x - vi.x).abs() < 1e-6 {
                vj.z > vi.z
            } else {
                vj.x > vi.x
            };
            if swapped {
                std::mem::swap(&mut vj, &mut vi);
            }

            // Create samples along the edge.
            let delta = vi - vj;
            let length = delta.xz().length();
            let mut segments = 1 + (length / sample_distance).floor() as usize;
            segments = segments.min(MAX_VERTICES_PER_EDGE - 1);
            if vertices.len() + segments >= MAX_VERTICES {
                segments = (MAX_VERTICES - 1).saturating_sub(vertices.len()).max(1);
            }
            edge.clear();
            for k in 0..=segments {
                let u = k as f32 / segments as f32;
                let mut position = vj + delta * u;
                position.y = patch.height_at(position, params) as f32 * params.cell_height;
                edge.push(position);
            }

            // Simplify samples.
            indices.clear();
            indices.extend([0, segments]);
            let mut k = 0;
            while k + 1 < indices.len() {
                let a = indices[k];
                let b = indices[k + 1];
                let segment = (edge[a], edge[b]);
                // Find maximum deviation along the segment.
                let mut max_deviation = 0.0;
                let mut max_index = None;
                for (m, &sample) in edge.iter().enumerate().take(b).skip(a + 1) {
                    let deviation = distance_squared_between_point_and_line_vec3(sample, segment);
                    if deviation > max_deviation {
                        max_deviation = deviation;
                        max_index = Some(m);
                    }
                }
                // If the max deviation is larger than accepted error, add new point, else continue to next segment.
                match max_index {
                    Some(m) if max_deviation > params.sample_max_error.powi(2) => {
                        indices.insert(k + 1, m);
                    }
                    _ => k += 1,
                }
            }

            hull.push(j);
            // Add new vertices.
            let inner = &indices[1..indices.len() - 1];
            let mut add = |index: usize| {
                hull.push(vertices.len());
                vertices.push(edge[index]);
            };
            if swapped {
                inner.iter().rev().for_each(|&index| add(index));
            } else {
                inner.iter().for_each(|&index| add(index));
            }
        }
    } else {
        hull.extend((0..polygon_len).map(|i| prev(i, polygon_len)));
    }

    // If the polygon minimum extent is small (sliver or small triangle), do not try to add internal points.
    if min_extent < (sample_distance * 2.0).powi(2) {
        triangulate_hull(&vertices, &hull, polygon_len, &mut triangles);
        return PolygonDetail::new(vertices, triangles, &hull);
    }

    // Tessellate the base mesh.
    // The hull triangulation creates better triangles for long thin polygons than the
    // delaunay triangulation when there are no internal points.
    triangulate_hull(&vertices, &hull, polygon_len, &mut triangles);
    if triangles.is_empty() {
        tracing::warn!(
            "Could not triangulate polygon ({} verts)",
            vertices.len()
        );
        return PolygonDetail::new(vertices, triangles, &hull);
    }

    if sample_distance > 0.0 {
        // Create sample locations in a grid.
        let (min, max) = polygon
            .iter()
            .fold((polygon[0], polygon[0]), |(min, max), &v| (min.min(v), max.max(v)));
        let x0 = (min.x / sample_distance).floor() as i32;
        let x1 = (max.x / sample_distance).ceil() as i32;
        let z0 = (min.z / sample_distance).floor() as i32;
        let z1 = (max.z / sample_distance).ceil() as i32;
        let mut samples = Vec::new();
        for z in z0..z1 {
            for x in x0..x1 {
                let point = Vec3A::new(
                    x as f32 * sample_distance,
                    (max.y + min.y) * 0.5,
                    z as f32 * sample_distance,
                );
                // Make sure the samples are not too close to the edges.
                if distance_to_polygon(polygon, point) > -sample_distance / 2.0 {
                    continue;
                }
                samples.push(Sample {
                    x,
                    y: patch.height_at(point, params),
                    z,
                    added: false,
                });
            }
        }

        // Add the samples starting from the one that has the most error.
        // The procedure stops when all samples are added or when the max error is within threshold.
        for _ in 0..samples.len() {
            if vertices.len() >= MAX_VERTICES {
                break;
            }

            // Find sample with most error.
            let mut best: Option<(f32, usize, Vec3A)> = None;
            for (i, sample) in samples.iter().enumerate() {
                if sample.added {
                    continue;
                }
                // The sample location is jittered to get rid of some bad triangulations
                // which are caused by symmetrical data from the grid structure.
                let point = Vec3A::new(
                    sample.x as f32 * sample_distance + jitter_x(i) * params.cell_size * 0.1,
                    sample.y as f32 * params.cell_height,
                    sample.z as f32 * sample_distance + jitter_z(i) * params.cell_size * 0.1,
                );
                let Some(distance) = distance_to_triangle_mesh(point, &vertices, &triangles)
                else {
                    // Did not hit the mesh.
                    continue;
                };
                if distance > best.map_or(0.0, |(best, ..)| best) {
                    best = Some((distance, i, point));
                }
            }

            // If the max error is within accepted threshold, stop tesselating.
            let Some((distance, i, point)) = best else {
                break;
            };
            if distance <= params.sample_max_error {
                break;
            }
            samples[i].added = true;
            vertices.push(point);

            // Create new triangulation.
            // TODO: Add the sample incrementally instead of rebuilding the triangulation.
            triangles.clear();
            delaunay_hull(&vertices, &hull, &mut triangles);
        }
    }

    if triangles.len() > MAX_TRIANGLES {
        tracing::error!(
            "Shrinking triangle count from {} to max {MAX_TRIANGLES}",
            triangles.len()
        );
        triangles.truncate(MAX_TRIANGLES);
    }
    PolygonDetail::new(vertices, triangles, &hull)
}

/// A grid sample inside a polygon. `x` and `z` are in units of the sample distance, `y` in cells.
#[derive(Debug, Clone, Copy)]
struct Sample {
    x: i32,
    y: u16,
    z: i32,
    added: bool,
}

fn jitter_x(i: usize) -> f32 {
    ((i as u32).wrapping_mul(0x8da6_b343) & 0xffff) as f32 / 65535.0 * 2.0 - 1.0
}

fn jitter_z(i: usize) -> f32 {
    ((i as u32).wrapping_mul(0xd816_3841) & 0xffff) as f32 / 65535.0 * 2.0 - 1.0
}

/// Returns whether `a -> b` is an edge of the hull. Interior samples come after the hull vertices.
fn on_hull(a: usize, b: usize, hull: &[usize]) -> bool {
    if a >= hull.len() || b >= hull.len() {
        return false;
    }
    (0..hull.len()).any(|i| hull[prev(i, hull.len())] == a && hull[i] == b)
}

/// Triangulates the hull by walking from the shortest ear around both sides,
/// always taking the side with the shorter new triangle perimeter.
fn triangulate_hull(
    vertices: &[Vec3A],
    hull: &[usize],
    polygon_len: usize,
    triangles: &mut Vec<[usize; 3]>,
) {
    let hull_len = hull.len();
    if hull_len < 3 {
        return;
    }
    let mut start = 0;
    let mut left = 1;
    let mut right = hull_len - 1;

    // Start from an ear with shortest perimeter.
    // This tends to favor well formed triangles as starting point.
    let mut min_perimeter = f32::MAX;
    for i in 0..hull_len {
        // Ears are triangles with original vertices as middle vertex while others are actually line segments on edges.
        if hull[i] >= polygon_len {
            continue;
        }
        let pi = prev(i, hull_len);
        let ni = next(i, hull_len);
        let pv = vertices[hull[pi]].xz();
        let cv = vertices[hull[i]].xz();
        let nv = vertices[hull[ni]].xz();
        let perimeter = pv.distance(cv) + cv.distance(nv) + nv.distance(pv);
        if perimeter < min_perimeter {
            start = i;
            left = ni;
            right = pi;
            min_perimeter = perimeter;
        }
    }

    triangles.push([hull[start], hull[left], hull[right]]);

    // Triangulate the polygon by moving left or right, depending on which triangle has shorter perimeter.
    while next(left, hull_len) != right {
        let next_left = next(left, hull_len);
        let next_right = prev(right, hull_len);

        let cv_left = vertices[hull[left]].xz();
        let nv_left = vertices[hull[next_left]].xz();
        let cv_right = vertices[hull[right]].xz();
        let nv_right = vertices[hull[next_right]].xz();

        let d_left = cv_left.distance(nv_left) + nv_left.distance(cv_right);
        let d_right = cv_right.distance(nv_right) + cv_left.distance(nv_right);

        if d_left < d_right {
            triangles.push([hull[left], hull[next_left], hull[right]]);
            left = next_left;
        } else {
            triangles.push([hull[left], hull[next_right], hull[right]]);
            right = next_right;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeFace {
    Undefined,
    Hull,
    Face(usize),
}

/// An edge of the delaunay triangulation with the faces on either side.
#[derive(Debug, Clone, Copy)]
struct DelaunayEdge {
    s: usize,
    t: usize,
    left: EdgeFace,
    right: EdgeFace,
}

impl DelaunayEdge {
    fn update_left_face(&mut self, s: usize, t: usize, face: EdgeFace) {
        if self.s == s && self.t == t && self.left == EdgeFace::Undefined {
            self.left = face;
        } else if self.t == s && self.s == t && self.right == EdgeFace::Undefined {
            self.right = face;
        }
    }
}

struct Delaunay<'a> {
    points: &'a [Vec3A],
    edges: Vec<DelaunayEdge>,
    max_edges: usize,
    face_count: usize,
}

/// Triangulates `points` inside the `hull` so that no point lies inside the circumcircle of a triangle.
fn delaunay_hull(points: &[Vec3A], hull: &[usize], triangles: &mut Vec<[usize; 3]>) {
    let max_edges = points.len() * 10;
    let mut delaunay = Delaunay {
        points,
        edges: Vec::with_capacity(max_edges),
        max_edges,
        face_count: 0,
    };

    for i in 0..hull.len() {
        let j = prev(i, hull.len());
        delaunay.add_edge(hull[j], hull[i], EdgeFace::Hull, EdgeFace::Undefined);
    }

    let mut current_edge = 0;
    while current_edge < delaunay.edges.len() {
        if delaunay.edges[current_edge].left == EdgeFace::Undefined {
            delaunay.complete_facet(current_edge);
        }
        if delaunay.edges[current_edge].right == EdgeFace::Undefined {
            delaunay.complete_facet(current_edge);
        }
        current_edge += 1;
    }

    // Create triangles.
    let mut faces = vec![[None::<usize>; 3]; delaunay.face_count];
    for edge in &delaunay.edges {
        if let EdgeFace::Face(face) = edge.right {
            let triangle = &mut faces[face];
            if triangle[0].is_none() {
                triangle[0] = Some(edge.s);
                triangle[1] = Some(edge.t);
            } else if triangle[0] == Some(edge.t) {
                triangle[2] = Some(edge.s);
            } else if triangle[1] == Some(edge.s) {
                triangle[2] = Some(edge.t);
            }
        }
        if let EdgeFace::Face(face) = edge.left {
            let triangle = &mut faces[face];
            if triangle[0].is_none() {
                triangle[0] = Some(edge.t);
                triangle[1] = Some(edge.s);
            } else if triangle[0] == Some(edge.s) {
                triangle[2] = Some(edge.t);
            } else if triangle[1] == Some(edge.t) {
                triangle[2] = Some(edge.s);
            }
        }
    }

    for (i, face) in faces.into_iter().enumerate() {
        match face {
            [Some(a), Some(b), Some(c)] => triangles.push([a, b, c]),
            _ => tracing::warn!("Removing dangling face {i} {face:?}"),
        }
    }
}

impl Delaunay<'_> {
    fn find_edge(&self, s: usize, t: usize) -> Option<usize> {
        self.edges
            .iter()
            .position(|e| (e.s == s && e.t == t) || (e.s == t && e.t == s))
    }

    fn add_edge(&mut self, s: usize, t: usize, left: EdgeFace, right: EdgeFace) {
        if self.edges.len() >= self.max_edges {
            tracing::error!(
                "Too many edges ({}/{})",
                self.edges.len(),
                self.max_edges
            );
            return;
        }
        // Add edge if not already in the triangulation.
        if self.find_edge(s, t).is_none() {
            self.edges.push(DelaunayEdge { s, t, left, right });
        }
    }

    fn complete_facet(&mut self, e: usize) {
        const EPS: f32 = 1e-5;
        const TOLERANCE: f32 = 0.001;

        let edge = self.edges[e];
        let (s, t) = if edge.left == EdgeFace::Undefined {
            (edge.s, edge.t)
        } else if edge.right == EdgeFace::Undefined {
            (edge.t, edge.s)
        } else {
            // Edge already completed.
            return;
        };

        // Find best point on left of edge.
        let points = self.points;
        let mut best = None;
        let mut center = Vec2::ZERO;
        let mut radius = -1.0;
        for u in 0..points.len() {
            if u == s || u == t {
                continue;
            }
            if cross2(points[s], points[t], points[u]) <= EPS {
                continue;
            }
            if radius < 0.0 {
                // The circle is not updated yet, do it now.
                best = Some(u);
                (center, radius) = circumcircle(points[s], points[t], points[u]);
                continue;
            }
            let distance = center.distance(points[u].xz());
            if distance > radius * (1.0 + TOLERANCE) {
                // Outside current circumcircle, skip.
                continue;
            }
            if distance >= radius * (1.0 - TOLERANCE) {
                // Inside epsilon circumcircle, do extra tests to make sure the edge is valid.
                // s-u and t-u cannot overlap with s-pt nor t-pt if they exist.
                if self.overlaps_edges(s, u) || self.overlaps_edges(t, u) {
                    continue;
                }
            }
            best = Some(u);
            (center, radius) = circumcircle(points[s], points[t], points[u]);
        }

        // Add new triangle or update edge info if s-t is on hull.
        let Some(pt) = best else {
            self.edges[e].update_left_face(s, t, EdgeFace::Hull);
            return;
        };
        let face = EdgeFace::Face(self.face_count);
        self.edges[e].update_left_face(s, t, face);
        for (from, to) in [(pt, s), (t, pt)] {
            match self.find_edge(from, to) {
                Some(existing) => self.edges[existing].update_left_face(from, to, face),
                None => self.add_edge(from, to, face, EdgeFace::Undefined),
            }
        }
        self.face_count += 1;
    }

    fn overlaps_edges(&self, s1: usize, t1: usize) -> bool {
        self.edges.iter().any(|edge| {
            // Same or connected edges do not overlap.
            if edge.s == s1 || edge.s == t1 || edge.t == s1 || edge.t == t1 {
                return false;
            }
            overlap_segment_segment_2d(
                self.points[edge.s],
                self.points[edge.t],
                self.points[s1],
                self.points[t1],
            )
        })
    }
}

/// Twice the signed area of `(p1, p2, p3)` on the xz-plane.
fn cross2(p1: Vec3A, p2: Vec3A, p3: Vec3A) -> f32 {
    (p2 - p1).xz().perp_dot((p3 - p1).xz())
}

fn overlap_segment_segment_2d(a: Vec3A, b: Vec3A, c: Vec3A, d: Vec3A) -> bool {
    let a1 = cross2(a, b, d);
    let a2 = cross2(a, b, c);
    if a1 * a2 < 0.0 {
        let a3 = cross2(c, d, a);
        let a4 = a3 + a2 - a1;
        if a3 * a4 < 0.0 {
            return true;
        }
    }
    false
}

/// The circumcircle of a triangle on the xz-plane as center and radius.
/// Degenerate triangles yield a zero radius circle at `p1`.
fn circumcircle(p1: Vec3A, p2: Vec3A, p3: Vec3A) -> (Vec2, f32) {
    const EPS: f32 = 1e-6;
    // Calculate the circle relative to p1, to avoid some precision issues.
    let v2 = (p2 - p1).xz();
    let v3 = (p3 - p1).xz();
    let cp = v2.perp_dot(v3);
    if cp.abs() <= EPS {
        return (p1.xz(), 0.0);
    }
    let v2_sq = v2.length_squared();
    let v3_sq = v3.length_squared();
    let center = Vec2::new(
        (v2_sq * v3.y - v3_sq * v2.y) / (2.0 * cp),
        (v3_sq * v2.x - v2_sq * v3.x) / (2.0 * cp),
    );
    (center + p1.xz(), center.length())
}

/// Vertical distance from `p` to the triangle `(a, b, c)`, if `p` lies above or below it.
fn distance_to_triangle(p: Vec3A, a: Vec3A, b: Vec3A, c: Vec3A) -> Option<f32> {
    const EPS: f32 = 1e-4;
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let dot00 = v0.xz().length_squared();
    let dot01 = v0.xz().dot(v1.xz());
    let dot02 = v0.xz().dot(v2.xz());
    let dot11 = v1.xz().length_squared();
    let dot12 = v1.xz().dot(v2.xz());

    // Compute barycentric coordinates.
    let inverse_denominator = 1.0 / (dot00 * dot11 - dot01 * dot01);
    let u = (dot11 * dot02 - dot01 * dot12) * inverse_denominator;
    let v = (dot00 * dot12 - dot01 * dot02) * inverse_denominator;

    // If point lies inside the triangle, return interpolated y-coord.
    (u >= -EPS && v >= -EPS && u + v <= 1.0 + EPS).then(|| {
        let y = a.y + v0.y * u + v1.y * v;
        (y - p.y).abs()
    })
}

fn distance_to_triangle_mesh(
    p: Vec3A,
    vertices: &[Vec3A],
    triangles: &[[usize; 3]],
) -> Option<f32> {
    triangles
        .iter()
        .filter_map(|&[a, b, c]| distance_to_triangle(p, vertices[a], vertices[b], vertices[c]))
        .min_by(f32::total_cmp)
}

/// Squared distance from `p` to the outline of `polygon` on the xz-plane, negative inside.
fn distance_to_polygon(polygon: &[Vec3A], p: Vec3A) -> f32 {
    let mut min_distance = f32::MAX;
    let mut inside = false;
    for i in 0..polygon.len() {
        let vi = polygon[i];
        let vj = polygon[prev(i, polygon.len())];
        if (vi.z > p.z) != (vj.z > p.z) && p.x < (vj.x - vi.x) * (p.z - vi.z) / (vj.z - vi.z) + vi.x
        {
            inside = !inside;
        }
        min_distance = min_distance
            .min(distance_squared_between_point_and_line_vec2(p.xz(), (vj.xz(), vi.xz())));
    }
    if inside { -min_distance } else { min_distance }
}

/// Squared minimum extent of the polygon: the smallest of the largest distances of all vertices to each edge.
fn polygon_min_extent_squared(vertices: &[Vec3A]) -> f32 {
    let mut min_distance = f32::MAX;
    for i in 0..vertices.len() {
        let ni = next(i, vertices.len());
        let edge = (vertices[i].xz(), vertices[ni].xz());
        let max_edge_distance = vertices
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != i && j != ni)
            .map(|(_, v)| distance_squared_between_point_and_line_vec2(v.xz(), edge))
            .fold(0.0, f32::max);
        min_distance = min_distance.min(max_edge_distance);
    }
    min_distance
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        BuildContoursFlags,
        compact_heightfield::tests::{flat_compact, floor_heightfield},
    };

    fn polygon_mesh(chf: &mut CompactHeightfield) -> PolygonNavmesh {
        chf.build_regions_monotone(0, 0, 0).unwrap();
        chf.build_contours(1.3, 0, BuildContoursFlags::DEFAULT)
            .into_polygon_mesh(6)
            .unwrap()
    }

    fn boundary_edge_count(detail: &DetailNavmesh) -> usize {
        detail
            .triangle_flags
            .iter()
            .map(|&flags| (0..3).filter(|&edge| DetailNavmesh::is_boundary_edge(flags, edge)).count())
            .sum()
    }

    #[test]
    fn empty_polygon_mesh_gives_empty_detail() {
        let chf = flat_compact(10, 10);
        let mesh = chf
            .build_contours(1.3, 0, BuildContoursFlags::DEFAULT)
            .into_polygon_mesh(6)
            .unwrap();
        let detail = DetailNavmesh::new(&mesh, &chf, 6.0, 1.0).unwrap();
        assert_eq!(detail, DetailNavmesh::default());
    }

    #[test]
    fn flat_quad_without_sampling_keeps_polygon_vertices() {
        let mut chf = flat_compact(10, 10);
        let mesh = polygon_mesh(&mut chf);
        let detail = DetailNavmesh::new(&mesh, &chf, 0.0, 1.0).unwrap();

        assert_eq!(detail.meshes.len(), 1);
        assert_eq!(detail.meshes[0].vertex_count, 4);
        assert_eq!(detail.meshes[0].triangle_count, 2);
        for (vertex, &index) in detail.sub_mesh_vertices(0).iter().zip(mesh.polygon(0)) {
            let source = mesh.vertices[index as usize].as_vec3();
            assert_relative_eq!(vertex.x, source.x);
            assert_relative_eq!(vertex.z, source.z);
            // One cell height above the floor top at 2 cells.
            assert_relative_eq!(vertex.y, 1.5);
        }
        assert_eq!(boundary_edge_count(&detail), 4);
    }

    #[test]
    fn flat_floor_needs_no_samples() {
        let mut chf = flat_compact(10, 10);
        let mesh = polygon_mesh(&mut chf);
        let detail = DetailNavmesh::new(&mesh, &chf, 2.0, 0.1).unwrap();
        assert_eq!(detail.meshes[0].vertex_count, 4);
        assert_eq!(detail.triangles.len(), 2);
        assert!(detail.vertices.iter().all(|v| (v.y - 1.5).abs() < 1e-5));
    }

    #[test]
    fn bump_adds_interior_samples() {
        let mut chf = floor_heightfield(10, 10, |x, z| {
            Some(if (4..6).contains(&x) && (4..6).contains(&z) { 4 } else { 2 })
        })
        .into_compact(4, 2)
        .unwrap();
        let mesh = polygon_mesh(&mut chf);
        assert_eq!(mesh.polygon_count(), 1);
        let detail = DetailNavmesh::new(&mesh, &chf, 1.0, 0.1).unwrap();

        let sub_mesh = detail.meshes[0];
        assert!(sub_mesh.vertex_count > 4);
        let highest = detail.vertices.iter().map(|v| v.y).fold(f32::MIN, f32::max);
        assert_relative_eq!(highest, 2.5);
        for (triangle, _) in detail.sub_mesh_triangles(0) {
            assert!(triangle.iter().all(|&v| (v as u32) < sub_mesh.vertex_count));
        }
        assert!(detail.triangles.len() <= MAX_TRIANGLES);
    }

    #[test]
    fn too_large_polygons_are_rejected() {
        let mut chf = flat_compact(10, 10);
        let mut mesh = polygon_mesh(&mut chf);
        mesh.max_vertices_per_polygon = 200;
        assert_eq!(
            DetailNavmesh::new(&mesh, &chf, 0.0, 1.0),
            Err(DetailNavmeshError::TooManyVerticesPerPolygon {
                max_vertices_per_polygon: 200
            })
        );
    }

    #[test]
    fn delaunay_covers_square_with_center() {
        let points = [
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(0.0, 0.0, 4.0),
            Vec3A::new(4.0, 0.0, 4.0),
            Vec3A::new(4.0, 0.0, 0.0),
            Vec3A::new(2.0, 1.0, 2.0),
        ];
        let mut triangles = Vec::new();
        delaunay_hull(&points, &[0, 1, 2, 3], &mut triangles);
        assert_eq!(triangles.len(), 4);
        assert!(triangles.iter().all(|triangle| triangle.contains(&4)));
    }

    #[test]
    fn circumcircle_of_right_triangle() {
        let (center, radius) = circumcircle(
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(2.0, 0.0, 0.0),
            Vec3A::new(0.0, 0.0, 2.0),
        );
        assert_relative_eq!(center.x, 1.0);
        assert_relative_eq!(center.y, 1.0);
        assert_relative_eq!(radius, 2.0_f32.sqrt());
    }
}
