use glam::{IVec2, U16Vec3};

use crate::{
    Aabb3d, AreaType, CompactHeightfield, RegionId,
    math::{
        distance_squared_between_point_and_line_ivec2, intersect, left, left_on, next, prev,
    },
};

impl CompactHeightfield {
    /// Builds a contour set from the region outlines in the provided compact heightfield.
    ///
    /// The raw contours will match the region outlines exactly. The `max_error` and `max_edge_len`
    /// parameters control how closely the simplified contours will match the raw contours.
    ///
    /// Simplified contours are generated such that the vertices for portals between areas match up.
    /// (They are considered mandatory vertices.)
    ///
    /// Setting `max_edge_len` to zero will disable the edge length feature.
    ///
    /// # Arguments
    ///
    /// - `max_error`: The maximum distance a simplified contour's border edges should deviate
    ///   the original raw contour. [Limit: >=0] [Units: vx]
    /// - `max_edge_len`: The maximum allowed length for contour edges along the border of the mesh. [Limit: >=0] [Units: vx]
    /// - `build_flags`: The build flags.
    pub fn build_contours(
        &self,
        max_error: f32,
        max_edge_len: u16,
        build_flags: BuildContoursFlags,
    ) -> ContourSet {
        let mut contour_set = ContourSet {
            contours: Vec::new(),
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            width: self.width.saturating_sub(self.border_size * 2),
            height: self.height.saturating_sub(self.border_size * 2),
            border_size: self.border_size,
            max_error,
        };
        if self.border_size > 0 {
            // If the heightfield was built with border_size, remove the offset
            let pad = self.border_size as f32 * self.cell_size;
            contour_set.aabb.min.x += pad;
            contour_set.aabb.min.z += pad;
            contour_set.aabb.max.x -= pad;
            contour_set.aabb.max.z -= pad;
        }

        let max_contours = self.max_region.bits().max(8);
        contour_set.contours.reserve(max_contours as usize);

        let mut flags = vec![0_u8; self.spans.len()];

        // Mark boundaries
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    let region = self.spans[i].region;
                    if region.is_none() || region.is_border() {
                        flags[i] = 0;
                        continue;
                    }
                    let mut connected = 0;
                    for dir in 0..4 {
                        let neighbor_region = self
                            .neighbor_index(x as i32, z as i32, i, dir)
                            .map_or(RegionId::NONE, |(_, _, a_index)| self.spans[a_index].region);
                        if neighbor_region == region {
                            connected |= 1 << dir;
                        }
                    }
                    // Inverse, mark non connected edges.
                    flags[i] = connected ^ 0xf;
                }
            }
        }

        let mut vertices = Vec::with_capacity(256);

        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    if flags[i] == 0 || flags[i] == 0xf {
                        flags[i] = 0;
                        continue;
                    }
                    let region = self.spans[i].region;
                    if region.is_none() || region.is_border() {
                        continue;
                    }
                    let area = self.areas[i];

                    vertices.clear();
                    self.walk_contour_build(x as i32, z as i32, i, &mut flags, &mut vertices);

                    let mut simplified =
                        simplify_contour(&vertices, max_error, max_edge_len, build_flags);
                    remove_degenerate_segments(&mut simplified);

                    // Create contour.
                    if simplified.len() >= 3 {
                        let border_size = self.border_size;
                        let remove_offset = |(vertex, data): &(U16Vec3, RegionVertexId)| {
                            // If the heightfield was built with border_size, remove the offset.
                            let vertex = U16Vec3::new(
                                vertex.x.saturating_sub(border_size),
                                vertex.y,
                                vertex.z.saturating_sub(border_size),
                            );
                            (vertex, *data)
                        };
                        contour_set.contours.push(Contour {
                            vertices: simplified.iter().map(remove_offset).collect(),
                            raw_vertices: vertices.iter().map(remove_offset).collect(),
                            region,
                            area,
                        });
                    }
                }
            }
        }

        // Merge holes if needed.
        merge_holes(&mut contour_set.contours, self.max_region);

        tracing::debug!(
            "Built {} contours for {} regions",
            contour_set.contours.len(),
            self.max_region.bits()
        );
        contour_set
    }

    fn walk_contour_build(
        &self,
        mut x: i32,
        mut z: i32,
        mut i: usize,
        flags: &mut [u8],
        points: &mut Vec<(U16Vec3, RegionVertexId)>,
    ) {
        // Choose the first non-connected edge
        let mut dir = 0;
        while flags[i] & (1 << dir) == 0 {
            dir += 1;
        }

        let start_dir = dir;
        let start_i = i;
        let area = self.areas[i];

        for _ in 1..40_000 {
            if flags[i] & (1 << dir) != 0 {
                // Choose the edge corner
                let (p_y, is_border_vertex) = self.corner_height(x, z, i, dir);
                let (p_x, p_z) = match dir {
                    0 => (x, z + 1),
                    1 => (x + 1, z + 1),
                    2 => (x + 1, z),
                    _ => (x, z),
                };
                let mut data = RegionVertexId::NONE;
                if let Some((_, _, a_index)) = self.neighbor_index(x, z, i, dir) {
                    data = RegionVertexId::from(self.spans[a_index].region);
                    if area != self.areas[a_index] {
                        data |= RegionVertexId::AREA_BORDER;
                    }
                }
                if is_border_vertex {
                    data |= RegionVertexId::BORDER_VERTEX;
                }
                points.push((U16Vec3::new(p_x as u16, p_y, p_z as u16), data));

                // Remove visited edges
                flags[i] &= !(1 << dir);
                // Rotate clockwise
                dir = (dir + 1) & 0x3;
            } else {
                let Some((n_x, n_z, n_i)) = self.neighbor_index(x, z, i, dir) else {
                    // A connected edge always has a neighbour.
                    tracing::warn!("Contour walk lost its neighbour at ({x}, {z})");
                    return;
                };
                x = n_x;
                z = n_z;
                i = n_i;
                // Rotate counterclockwise
                dir = (dir + 3) & 0x3;
            }
            if start_i == i && start_dir == dir {
                break;
            }
        }
    }

    /// Returns the height of the corner between `dir` and the next direction of span `i`,
    /// and whether the corner is a vertex on the tile border that is removed later.
    fn corner_height(&self, x: i32, z: i32, i: usize, dir: u8) -> (u16, bool) {
        let mut height = self.spans[i].y;
        let dir_p = (dir + 1) & 0x3;

        // Combine region and area codes in order to prevent
        // border vertices which are in between two areas to be removed.
        let region_and_area =
            |i: usize| self.spans[i].region.bits() as u32 | ((self.areas[i].0 as u32) << 16);
        let mut regions = [0_u32; 4];
        regions[0] = region_and_area(i);

        if let Some((a_x, a_z, a_index)) = self.neighbor_index(x, z, i, dir) {
            height = height.max(self.spans[a_index].y);
            regions[1] = region_and_area(a_index);
            if let Some((_, _, b_index)) = self.neighbor_index(a_x, a_z, a_index, dir_p) {
                height = height.max(self.spans[b_index].y);
                regions[2] = region_and_area(b_index);
            }
        }
        if let Some((a_x, a_z, a_index)) = self.neighbor_index(x, z, i, dir_p) {
            height = height.max(self.spans[a_index].y);
            regions[3] = region_and_area(a_index);
            if let Some((_, _, b_index)) = self.neighbor_index(a_x, a_z, a_index, dir) {
                height = height.max(self.spans[b_index].y);
                regions[2] = region_and_area(b_index);
            }
        }

        // Check if the vertex is special edge vertex, these vertices will be removed later.
        let border = RegionId::BORDER_REGION.bits() as u32;
        let is_border_vertex = (0..4).any(|j| {
            let a = regions[j];
            let b = regions[(j + 1) & 0x3];
            let c = regions[(j + 2) & 0x3];
            let d = regions[(j + 3) & 0x3];

            // The vertex is a border vertex there are two same exterior cells in a row,
            // followed by two interior cells and none of the regions are out of bounds.
            let two_same_exteriors = (a & b & border) != 0 && a == b;
            let two_interiors = ((c | d) & border) == 0;
            let interiors_same_area = (c >> 16) == (d >> 16);
            let no_zeros = a != 0 && b != 0 && c != 0 && d != 0;
            two_same_exteriors && two_interiors && interiors_same_area && no_zeros
        });
        (height, is_border_vertex)
    }
}

fn xz(vertex: U16Vec3) -> IVec2 {
    IVec2::new(vertex.x as i32, vertex.z as i32)
}

/// Returns `true` if `b` comes after `a` in lexicographical (x, z) order.
fn is_lexicographically_after(a: IVec2, b: IVec2) -> bool {
    b.x > a.x || (b.x == a.x && b.y > a.y)
}

fn simplify_contour(
    points: &[(U16Vec3, RegionVertexId)],
    max_error: f32,
    max_edge_len: u16,
    flags: BuildContoursFlags,
) -> Vec<(U16Vec3, RegionVertexId)> {
    let point_count = points.len();
    if point_count == 0 {
        return Vec::new();
    }
    // Simplified vertices and the index of the raw point they originate from
    let mut simplified: Vec<(U16Vec3, usize)> = Vec::with_capacity(64);

    // Add initial points.
    let has_connections = points.iter().any(|(_, data)| !data.region().is_none());
    if has_connections {
        // The contour has some portals to other regions.
        // Add a new point to every location where the region changes.
        for (i, (point, data)) in points.iter().enumerate() {
            let next_data = points[(i + 1) % point_count].1;
            let different_regions = data.region() != next_data.region();
            let area_borders = data.contains(RegionVertexId::AREA_BORDER)
                != next_data.contains(RegionVertexId::AREA_BORDER);
            if different_regions || area_borders {
                simplified.push((*point, i));
            }
        }
    }

    if simplified.is_empty() {
        // If there is no connections at all,
        // create some initial points for the simplification process.
        // Find lower-left and upper-right vertices of the contour.
        let mut lower_left = (points[0].0, 0);
        let mut upper_right = (points[0].0, 0);
        for (i, (point, _)) in points.iter().enumerate() {
            if is_lexicographically_after(xz(*point), xz(lower_left.0)) {
                lower_left = (*point, i);
            }
            if is_lexicographically_after(xz(upper_right.0), xz(*point)) {
                upper_right = (*point, i);
            }
        }
        simplified.push(lower_left);
        simplified.push(upper_right);
    }

    // Add points until all raw points are within
    // error tolerance to the simplified shape.
    let max_error_squared = max_error * max_error;
    let mut i = 0;
    while i < simplified.len() {
        let ii = (i + 1) % simplified.len();

        let (mut a, a_i) = (xz(simplified[i].0), simplified[i].1);
        let (mut b, b_i) = (xz(simplified[ii].0), simplified[ii].1);

        // Traverse the segment in lexilogical order so that the
        // max deviation is calculated similarly when traversing
        // opposite segments.
        let (mut c_i, c_inc, end_i) = if is_lexicographically_after(a, b) {
            (next(a_i, point_count), 1, b_i)
        } else {
            std::mem::swap(&mut a, &mut b);
            (
                (b_i + point_count - 1) % point_count,
                point_count - 1,
                a_i,
            )
        };

        // Find maximum deviation from the segment.
        let mut max_deviation = 0.0;
        let mut max_i = None;

        // Tessellate only outer edges or edges between areas.
        let data = points[c_i].1;
        if data.region().is_none() || data.contains(RegionVertexId::AREA_BORDER) {
            while c_i != end_i {
                let deviation =
                    distance_squared_between_point_and_line_ivec2(xz(points[c_i].0), (a, b));
                if deviation > max_deviation {
                    max_deviation = deviation;
                    max_i = Some(c_i);
                }
                c_i = (c_i + c_inc) % point_count;
            }
        }

        // If the max deviation is larger than accepted error,
        // add new point, else continue to next segment.
        match max_i {
            Some(max_i) if max_deviation > max_error_squared => {
                simplified.insert(i + 1, (points[max_i].0, max_i));
            }
            _ => i += 1,
        }
    }

    // Split too long edges.
    let tessellate_walls = flags.contains(BuildContoursFlags::TESSELLATE_SOLID_WALL_EDGES);
    let tessellate_areas = flags.contains(BuildContoursFlags::TESSELLATE_AREA_EDGES);
    if max_edge_len > 0 && (tessellate_walls || tessellate_areas) {
        let max_edge_len_squared = (max_edge_len as i64).pow(2);
        let mut i = 0;
        while i < simplified.len() {
            let ii = (i + 1) % simplified.len();

            let (a, a_i) = (xz(simplified[i].0), simplified[i].1);
            let (b, b_i) = (xz(simplified[ii].0), simplified[ii].1);

            // Find maximum deviation from the segment.
            let mut max_i = None;
            let c_i = next(a_i, point_count);

            // Tessellate only outer edges or edges between areas.
            let data = points[c_i].1;
            let tessellate = (tessellate_walls && data.region().is_none())
                || (tessellate_areas && data.contains(RegionVertexId::AREA_BORDER));

            if tessellate {
                let delta = (b - a).as_i64vec2();
                if delta.x * delta.x + delta.y * delta.y > max_edge_len_squared {
                    // Round based on the segments in lexilogical order so that the
                    // max tesselation is consistent regardless in which direction
                    // segments are traversed.
                    let n = if b_i < a_i {
                        b_i + point_count - a_i
                    } else {
                        b_i - a_i
                    };
                    if n > 1 {
                        max_i = Some(if is_lexicographically_after(a, b) {
                            (a_i + n / 2) % point_count
                        } else {
                            (a_i + (n + 1) / 2) % point_count
                        });
                    }
                }
            }

            match max_i {
                Some(max_i) => simplified.insert(i + 1, (points[max_i].0, max_i)),
                None => i += 1,
            }
        }
    }

    simplified
        .into_iter()
        .map(|(vertex, raw_index)| {
            // The edge vertex flag is taken from the current raw point,
            // and the neighbour region is taken from the next raw point.
            let current = points[raw_index].1;
            let next = points[next(raw_index, point_count)].1;
            let data = (next & (RegionVertexId::REGION_MASK | RegionVertexId::AREA_BORDER))
                | (current & RegionVertexId::BORDER_VERTEX);
            (vertex, data)
        })
        .collect()
}

/// Removes adjacent vertices which are equal on the xz-plane.
fn remove_degenerate_segments(simplified: &mut Vec<(U16Vec3, RegionVertexId)>) {
    let mut i = 0;
    while i < simplified.len() {
        let ni = next(i, simplified.len());
        if xz(simplified[i].0) == xz(simplified[ni].0) {
            // Degenerate segment, remove.
            simplified.remove(i);
        }
        i += 1;
    }
}

/// Twice the signed area of the contour on the xz-plane, rounded. Holes have a negative area.
fn calc_area_of_polygon_2d(vertices: &[(U16Vec3, RegionVertexId)]) -> i32 {
    let n = vertices.len();
    let mut area = 0;
    for i in 0..n {
        let vi = xz(vertices[i].0);
        let vj = xz(vertices[prev(i, n)].0);
        area += vi.x * vj.y - vj.x * vi.y;
    }
    (area + 1) / 2
}

#[derive(Debug, Clone, Default)]
struct ContourRegion {
    outline: Option<usize>,
    holes: Vec<usize>,
}

#[derive(Debug, Clone, Copy)]
struct ContourHole {
    contour: usize,
    min_x: i32,
    min_z: i32,
    leftmost: usize,
}

#[derive(Debug, Clone, Copy)]
struct PotentialDiagonal {
    vertex: usize,
    distance: i32,
}

/// Merges every hole contour into the outline of its region. Merged holes are removed from `contours`.
fn merge_holes(contours: &mut Vec<Contour>, max_region: RegionId) {
    if contours.is_empty() {
        return;
    }
    // Calculate winding of all polygons.
    let is_hole: Vec<bool> = contours
        .iter()
        .map(|contour| calc_area_of_polygon_2d(&contour.vertices) < 0)
        .collect();
    if !is_hole.contains(&true) {
        return;
    }

    // Collect outline contour and holes contours per region.
    // We assume that there is one outline and multiple holes.
    let mut regions = vec![ContourRegion::default(); max_region.bits() as usize + 1];
    for (i, contour) in contours.iter().enumerate() {
        let Some(region) = regions.get_mut(contour.region.bits() as usize) else {
            continue;
        };
        // Positively wound contours are outlines, negative holes.
        if is_hole[i] {
            region.holes.push(i);
        } else {
            if region.outline.is_some() {
                tracing::error!(
                    "Multiple outlines for region {}",
                    contour.region.bits()
                );
            }
            region.outline = Some(i);
        }
    }

    // Finally merge each regions holes into the outline.
    for (region_id, region) in regions.iter().enumerate() {
        if region.holes.is_empty() {
            continue;
        }
        let Some(outline) = region.outline else {
            tracing::error!("Missing outline for region {region_id}, skipping its holes");
            continue;
        };
        merge_region_holes(contours, outline, &region.holes);
    }

    contours.retain(|contour| !contour.vertices.is_empty());
}

fn merge_region_holes(contours: &mut [Contour], outline: usize, hole_indices: &[usize]) {
    // Sort holes from left to right.
    let mut holes: Vec<ContourHole> = hole_indices
        .iter()
        .map(|&contour| {
            let (leftmost, min) = find_leftmost_vertex(&contours[contour].vertices);
            ContourHole {
                contour,
                min_x: min.x,
                min_z: min.y,
                leftmost,
            }
        })
        .collect();
    holes.sort_by(|a, b| a.min_x.cmp(&b.min_x).then(a.min_z.cmp(&b.min_z)));

    let mut diagonals: Vec<PotentialDiagonal> = Vec::new();

    // Merge holes into the outline one by one.
    for i in 0..holes.len() {
        let hole = holes[i];
        let hole_len = contours[hole.contour].vertices.len();
        if hole_len == 0 {
            continue;
        }
        let mut index = None;
        let mut best_vertex = hole.leftmost;
        for _ in 0..hole_len {
            // Find potential diagonals.
            // The 'best' vertex must be in the cone described by 3 consecutive vertices of the outline.
            // ..o j-1
            //   |
            //   |   * best
            //   |
            // j o-----o j+1
            //         :
            let outline_vertices = &contours[outline].vertices;
            let corner = xz(contours[hole.contour].vertices[best_vertex].0);
            diagonals.clear();
            for j in 0..outline_vertices.len() {
                if in_cone(j, outline_vertices, corner) {
                    let delta = xz(outline_vertices[j].0) - corner;
                    diagonals.push(PotentialDiagonal {
                        vertex: j,
                        distance: delta.x * delta.x + delta.y * delta.y,
                    });
                }
            }
            // Sort potential diagonals by distance, we want to make the connection as short as possible.
            diagonals.sort_by_key(|diagonal| diagonal.distance);

            // Find a diagonal that is not intersecting the outline not the remaining holes.
            index = diagonals.iter().map(|diagonal| diagonal.vertex).find(|&j| {
                let point = xz(outline_vertices[j].0);
                let intersects = intersect_segment_contour(point, corner, Some(j), outline_vertices)
                    || holes[i..].iter().any(|other| {
                        intersect_segment_contour(
                            point,
                            corner,
                            None,
                            &contours[other.contour].vertices,
                        )
                    });
                !intersects
            });

            // If found non-intersecting diagonal, stop looking.
            if index.is_some() {
                break;
            }
            // All the potential diagonals for the current vertex were intersecting, try next vertex.
            best_vertex = (best_vertex + 1) % hole_len;
        }

        let Some(index) = index else {
            tracing::warn!(
                "Failed to find merge points for the outline and hole of region {}",
                contours[outline].region.bits()
            );
            continue;
        };
        merge_contours(contours, outline, hole.contour, index, best_vertex);
    }
}

fn find_leftmost_vertex(vertices: &[(U16Vec3, RegionVertexId)]) -> (usize, IVec2) {
    let mut leftmost = 0;
    let mut min = vertices.first().map_or(IVec2::ZERO, |(v, _)| xz(*v));
    for (i, (vertex, _)) in vertices.iter().enumerate().skip(1) {
        let vertex = xz(*vertex);
        if vertex.x < min.x || (vertex.x == min.x && vertex.y < min.y) {
            min = vertex;
            leftmost = i;
        }
    }
    (leftmost, min)
}

/// Joins contour `b` into contour `a` with a bridge between `a[ia]` and `b[ib]`.
fn merge_contours(contours: &mut [Contour], a: usize, b: usize, ia: usize, ib: usize) {
    let contour_a = &contours[a].vertices;
    let contour_b = &contours[b].vertices;
    let mut vertices = Vec::with_capacity(contour_a.len() + contour_b.len() + 2);

    // Copy contour A.
    for i in 0..=contour_a.len() {
        vertices.push(contour_a[(ia + i) % contour_a.len()]);
    }
    // Copy contour B
    for i in 0..=contour_b.len() {
        vertices.push(contour_b[(ib + i) % contour_b.len()]);
    }

    contours[a].vertices = vertices;
    contours[b].vertices.clear();
}

fn in_cone(i: usize, vertices: &[(U16Vec3, RegionVertexId)], pj: IVec2) -> bool {
    let n = vertices.len();
    let pi = xz(vertices[i].0);
    let pi1 = xz(vertices[next(i, n)].0);
    let pin1 = xz(vertices[prev(i, n)].0);

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

fn intersect_segment_contour(
    d0: IVec2,
    d1: IVec2,
    skip: Option<usize>,
    vertices: &[(U16Vec3, RegionVertexId)],
) -> bool {
    let n = vertices.len();
    // For each edge (k,k+1) of P
    for k in 0..n {
        let k1 = next(k, n);
        // Skip edges incident to i.
        if skip == Some(k) || skip == Some(k1) {
            continue;
        }
        let p0 = xz(vertices[k].0);
        let p1 = xz(vertices[k1].0);
        if d0 == p0 || d1 == p0 || d0 == p1 || d1 == p1 {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return true;
        }
    }
    false
}

/// Represents a group of related contours.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ContourSet {
    /// An array of the contours in the set.
    pub contours: Vec<Contour>,
    /// The AABB in world space
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The width of the set. (Along the x-axis in cell units.)
    pub width: u16,
    /// The height of the set. (Along the z-axis in cell units.)
    pub height: u16,
    /// The AABB border size used to generate the source data from which the contours were derived.
    pub border_size: u16,
    /// The max edge error that this contour set was simplified with.
    pub max_error: f32,
}

bitflags::bitflags! {
    /// The data attached to a contour vertex: the region on the other side of the edge
    /// starting at the vertex, plus flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct RegionVertexId: u32 {
        /// No neighbouring region.
        const NONE = 0;

        /// Applied to the region id field of contour vertices in order to extract the region id.
        /// The region id field of a vertex may have several flags applied to it.  So the
        /// fields value can't be used directly.
        const REGION_MASK = RegionId::MAX.bits() as u32;

        /// Border vertex flag.
        /// If a region ID has this bit set, then the associated element lies on
        /// a tile border. If a contour vertex's region ID has this bit set, the
        /// vertex will later be removed in order to match the segments and vertices
        /// at tile boundaries.
        /// (Used during the build process.)
        const BORDER_VERTEX = 0x10_000;

        /// Area border flag.
        /// If a region ID has this bit set, then the associated element lies on
        /// the border of an area.
        /// (Used during the region and contour build process.)
        const AREA_BORDER = 0x20_000;
    }
}

impl RegionVertexId {
    /// The neighbouring region without any flags.
    #[inline]
    pub fn region(self) -> RegionId {
        RegionId::from(self)
    }
}

impl From<u32> for RegionVertexId {
    fn from(bits: u32) -> Self {
        RegionVertexId::from_bits_retain(bits)
    }
}

impl From<RegionId> for RegionVertexId {
    fn from(region_id: RegionId) -> Self {
        RegionVertexId::from_bits_retain(region_id.bits() as u32)
    }
}

impl From<RegionVertexId> for RegionId {
    fn from(region_vertex_id: RegionVertexId) -> Self {
        let bits = region_vertex_id.bits() & RegionVertexId::REGION_MASK.bits();
        RegionId::from_bits_retain(bits as u16)
    }
}

/// Represents a simple, non-overlapping contour in field space.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Contour {
    /// Simplified contour vertices and the data of the edge starting at each vertex.
    pub vertices: Vec<(U16Vec3, RegionVertexId)>,
    /// Raw contour vertices and the data of the edge starting at each vertex.
    pub raw_vertices: Vec<(U16Vec3, RegionVertexId)>,
    /// Region ID of the contour.
    pub region: RegionId,
    /// Area type of the contour.
    pub area: AreaType,
}

bitflags::bitflags! {
    /// Contour build flags used in [`CompactHeightfield::build_contours`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct BuildContoursFlags: u8 {
        /// Tessellate solid (impassable) edges during contour simplification.
        const TESSELLATE_SOLID_WALL_EDGES = 1;
        /// Tessellate edges between areas during contour simplification.
        const TESSELLATE_AREA_EDGES = 2;

        /// Default flags for building contours.
        const DEFAULT = Self::TESSELLATE_SOLID_WALL_EDGES.bits();
    }
}

impl Default for BuildContoursFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::compact_heightfield::tests::{flat_compact, floor_heightfield};

    fn corners(contour: &Contour) -> HashSet<(u16, u16)> {
        contour.vertices.iter().map(|(v, _)| (v.x, v.z)).collect()
    }

    /// A disc of radius 7 in a 16x16 field, partitioned into a single region.
    fn disc() -> CompactHeightfield {
        let mut chf = floor_heightfield(16, 16, |x, z| {
            let (dx, dz) = (x as i32 - 8, z as i32 - 8);
            (dx * dx + dz * dz <= 49).then_some(2)
        })
        .into_compact(4, 2)
        .unwrap();
        chf.build_layer_regions(0, 0).unwrap();
        chf
    }

    #[test]
    fn rectangle_simplifies_to_its_corners() {
        let mut chf = flat_compact(10, 10);
        chf.build_regions_monotone(0, 0, 0).unwrap();
        let set = chf.build_contours(1.3, 12, BuildContoursFlags::DEFAULT);
        assert_eq!(set.contours.len(), 1);
        let contour = &set.contours[0];
        assert_eq!(contour.raw_vertices.len(), 40);
        assert_eq!(
            corners(contour),
            HashSet::from([(0, 0), (10, 0), (10, 10), (0, 10)])
        );
        assert!(contour.vertices.iter().all(|(v, data)| v.y == 2 && data.region().is_none()));
        assert_eq!(contour.region, RegionId::new(1));
    }

    #[test]
    fn long_wall_edges_are_split() {
        let mut chf = flat_compact(10, 10);
        chf.build_regions_monotone(0, 0, 0).unwrap();
        let set = chf.build_contours(1.3, 3, BuildContoursFlags::TESSELLATE_SOLID_WALL_EDGES);
        let contour = &set.contours[0];
        assert_eq!(contour.vertices.len(), 16);
        let n = contour.vertices.len();
        for i in 0..n {
            let a = xz(contour.vertices[i].0);
            let b = xz(contour.vertices[(i + 1) % n].0);
            assert!((b - a).length_squared() <= 9);
        }

        // Without tessellation flags the edge length is ignored.
        let set = chf.build_contours(1.3, 3, BuildContoursFlags::empty());
        assert_eq!(set.contours[0].vertices.len(), 4);
    }

    #[test]
    fn simplification_is_monotone_in_error() {
        let chf = disc();
        let counts: Vec<_> = [0.0, 0.5, 1.0, 2.0, 4.0]
            .into_iter()
            .map(|max_error| {
                let set = chf.build_contours(max_error, 0, BuildContoursFlags::DEFAULT);
                assert_eq!(set.contours.len(), 1);
                set.contours[0].vertices.len()
            })
            .collect();
        for pair in counts.windows(2) {
            assert!(pair[1] <= pair[0], "{counts:?}");
        }
        assert!(counts[0] > counts[4]);
    }

    #[test]
    fn portals_reference_the_neighbor_region() {
        let mut chf = flat_compact(10, 10);
        for z in 0..10 {
            for x in 5..10 {
                let index = chf.cell_at(x, z).index() as usize;
                chf.areas[index] = AreaType(2);
            }
        }
        chf.build_regions_monotone(0, 0, 0).unwrap();
        let set = chf.build_contours(1.3, 0, BuildContoursFlags::DEFAULT);
        assert_eq!(set.contours.len(), 2);
        let (a, b) = (&set.contours[0], &set.contours[1]);
        assert_ne!(a.region, b.region);
        assert!(a.vertices.iter().any(|(_, data)| {
            data.region() == b.region && data.contains(RegionVertexId::AREA_BORDER)
        }));
        assert!(b.vertices.iter().any(|(_, data)| data.region() == a.region));
    }

    #[test]
    fn holes_are_merged_into_outline() {
        let mut chf = floor_heightfield(9, 9, |x, z| {
            (!((3..6).contains(&x) && (3..6).contains(&z))).then_some(2)
        })
        .into_compact(4, 2)
        .unwrap();
        chf.build_layer_regions(0, 0).unwrap();
        assert_eq!(chf.max_region, RegionId::new(1));
        let set = chf.build_contours(1.3, 0, BuildContoursFlags::DEFAULT);
        assert_eq!(set.contours.len(), 1);
        let contour = &set.contours[0];
        // Outline and hole corners plus the two duplicated bridge vertices.
        assert_eq!(contour.vertices.len(), 10);
        assert!(corners(contour).contains(&(3, 3)));
        assert!(corners(contour).contains(&(9, 9)));
    }

    #[test]
    fn border_offset_is_removed() {
        let mut chf = flat_compact(12, 12);
        chf.build_regions_monotone(2, 0, 0).unwrap();
        let set = chf.build_contours(1.3, 0, BuildContoursFlags::DEFAULT);
        assert_eq!((set.width, set.height), (8, 8));
        assert_eq!(set.aabb.min.x, 2.0);
        assert_eq!(set.contours.len(), 1);
        assert_eq!(
            corners(&set.contours[0]),
            HashSet::from([(0, 0), (8, 0), (8, 8), (0, 8)])
        );
    }

    #[test]
    fn unpartitioned_field_has_no_contours() {
        let chf = flat_compact(4, 4);
        let set = chf.build_contours(1.3, 12, BuildContoursFlags::DEFAULT);
        assert!(set.contours.is_empty());
    }

    #[test]
    fn region_vertex_id_masks_flags() {
        let data = RegionVertexId::from(RegionId::new(7))
            | RegionVertexId::AREA_BORDER
            | RegionVertexId::BORDER_VERTEX;
        assert_eq!(data.region(), RegionId::new(7));
    }
}
