use std::collections::VecDeque;

use glam::{IVec2, U16Vec3};
use thiserror::Error;

use crate::{
    Aabb3d, AreaType, RegionId,
    contours::{ContourSet, RegionVertexId},
    math::{intersect, intersect_prop, left, left_on, next, prev},
};

/// Represents a polygon mesh suitable for use in building a navigation mesh.
///
/// Polygons are stored in a flat layout: polygon `i` occupies the slots
/// `i * max_vertices_per_polygon..(i + 1) * max_vertices_per_polygon` of [`Self::polygons`]
/// and [`Self::polygon_neighbors`]. Unused slots hold [`PolygonNavmesh::NULL_INDEX`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolygonNavmesh {
    /// The mesh vertices in voxel coordinates.
    pub vertices: Vec<U16Vec3>,
    /// Vertex indices of each polygon, padded with [`Self::NULL_INDEX`].
    pub polygons: Vec<u16>,
    /// For each polygon edge, the index of the polygon sharing that edge.
    /// Edges without a neighbor hold [`Self::NULL_INDEX`],
    /// edges on the tile border hold [`Self::EXTERNAL_LINK`] combined with the side of the tile.
    /// The edge `j` of a polygon starts at its vertex `j`.
    pub polygon_neighbors: Vec<u16>,
    /// The region id assigned to each polygon. Polygons spanning several regions get [`RegionId::NONE`].
    pub regions: Vec<RegionId>,
    /// The user defined flags of each polygon.
    pub flags: Vec<u16>,
    /// The area id assigned to each polygon.
    pub areas: Vec<AreaType>,
    /// The maximum number of vertices per polygon
    pub max_vertices_per_polygon: u16,
    /// The bounding box of the mesh in world space.
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The AABB border size used to generate the source data from which the mesh was derived.
    pub border_size: u16,
    /// The max error of the polygon edges in the mesh.
    pub max_edge_error: f32,
}

impl PolygonNavmesh {
    /// Marks an unused polygon slot or a polygon edge without a neighbor.
    pub const NULL_INDEX: u16 = 0xffff;

    /// Set in [`Self::polygon_neighbors`] for edges on the border of the tile.
    /// The lower bits hold the side of the tile: 0 is -x, 1 is +z, 2 is +x and 3 is -z.
    pub const EXTERNAL_LINK: u16 = 0x8000;

    /// The number of polygons in the mesh.
    #[inline]
    pub fn polygon_count(&self) -> usize {
        self.areas.len()
    }

    /// The vertex indices of polygon `index`, without padding.
    pub fn polygon(&self, index: usize) -> &[u16] {
        let nvp = self.max_vertices_per_polygon as usize;
        trim_polygon(&self.polygons[index * nvp..(index + 1) * nvp])
    }

    /// The neighbor data of the edges of polygon `index`, in the same order as [`Self::polygon`].
    pub fn neighbors(&self, index: usize) -> &[u16] {
        let nvp = self.max_vertices_per_polygon as usize;
        let len = self.polygon(index).len();
        &self.polygon_neighbors[index * nvp..index * nvp + len]
    }

    fn build_adjacency(&mut self) {
        #[derive(Debug)]
        struct Edge {
            vertices: [u16; 2],
            polygons: [usize; 2],
            polygon_edges: [usize; 2],
        }

        let nvp = self.max_vertices_per_polygon as usize;
        let polygon_count = self.polygon_count();
        let max_edge_count = polygon_count * nvp;

        let mut first_edge: Vec<Option<usize>> = vec![None; self.vertices.len()];
        let mut next_edge: Vec<Option<usize>> = Vec::with_capacity(max_edge_count);
        let mut edges: Vec<Edge> = Vec::with_capacity(max_edge_count);

        for i in 0..polygon_count {
            let polygon = trim_polygon(&self.polygons[i * nvp..(i + 1) * nvp]);
            for j in 0..polygon.len() {
                let v0 = polygon[j];
                let v1 = polygon[next(j, polygon.len())];
                if v0 < v1 {
                    next_edge.push(first_edge[v0 as usize]);
                    first_edge[v0 as usize] = Some(edges.len());
                    edges.push(Edge {
                        vertices: [v0, v1],
                        polygons: [i, i],
                        polygon_edges: [j, 0],
                    });
                }
            }
        }

        for i in 0..polygon_count {
            let polygon = trim_polygon(&self.polygons[i * nvp..(i + 1) * nvp]);
            for j in 0..polygon.len() {
                let v0 = polygon[j];
                let v1 = polygon[next(j, polygon.len())];
                if v0 <= v1 {
                    continue;
                }
                let mut edge_index = first_edge[v1 as usize];
                while let Some(e) = edge_index {
                    let edge = &mut edges[e];
                    if edge.vertices[1] == v0 && edge.polygons[0] == edge.polygons[1] {
                        edge.polygons[1] = i;
                        edge.polygon_edges[1] = j;
                        break;
                    }
                    edge_index = next_edge[e];
                }
            }
        }

        // Store adjacency
        for edge in &edges {
            let [p0, p1] = edge.polygons;
            if p0 != p1 {
                self.polygon_neighbors[p0 * nvp + edge.polygon_edges[0]] = p1 as u16;
                self.polygon_neighbors[p1 * nvp + edge.polygon_edges[1]] = p0 as u16;
            }
        }
    }

    /// Tags unconnected edges lying on the tile border as portals to the neighboring tile.
    fn mark_portal_edges(&mut self, width: u16, height: u16) {
        let nvp = self.max_vertices_per_polygon as usize;
        for i in 0..self.polygon_count() {
            let polygon = trim_polygon(&self.polygons[i * nvp..(i + 1) * nvp]);
            for j in 0..polygon.len() {
                let slot = i * nvp + j;
                if self.polygon_neighbors[slot] != Self::NULL_INDEX {
                    continue;
                }
                let va = self.vertices[polygon[j] as usize];
                let vb = self.vertices[polygon[next(j, polygon.len())] as usize];
                let side = if va.x == 0 && vb.x == 0 {
                    Some(0)
                } else if va.z == height && vb.z == height {
                    Some(1)
                } else if va.x == width && vb.x == width {
                    Some(2)
                } else if va.z == 0 && vb.z == 0 {
                    Some(3)
                } else {
                    None
                };
                if let Some(side) = side {
                    self.polygon_neighbors[slot] = Self::EXTERNAL_LINK | side;
                }
            }
        }
    }
}

fn trim_polygon(slots: &[u16]) -> &[u16] {
    let len = slots
        .iter()
        .position(|&index| index == PolygonNavmesh::NULL_INDEX)
        .unwrap_or(slots.len());
    &slots[..len]
}

/// Errors that can occur when building a [`PolygonNavmesh`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolygonMeshError {
    /// Polygons need at least three vertices.
    #[error("Invalid number of vertices per polygon: {0}, expected at least 3")]
    InvalidVerticesPerPolygon(u16),
    /// The vertices do not fit into a 16 bit index.
    #[error("Too many vertices: {count}, expected at most 65534")]
    TooManyVertices {
        /// The number of vertices that would have been created.
        count: usize,
    },
    /// The polygons do not fit into a 16 bit index.
    #[error("Too many polygons: {count}, expected at most 65534")]
    TooManyPolygons {
        /// The number of polygons that were created.
        count: usize,
    },
    /// Every contour failed to triangulate.
    #[error("Triangulation produced no polygons for any of the {contours} contours")]
    NoPolygons {
        /// The number of contours that were triangulated.
        contours: usize,
    },
}

impl ContourSet {
    /// Builds a polygon mesh from the provided contours.
    ///
    /// Each contour is triangulated and the triangles are greedily merged into convex polygons
    /// of at most `max_vertices_per_polygon` vertices. Vertices that only exist to match
    /// the tile border are removed afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_vertices_per_polygon` is below 3, the mesh would need more vertices
    /// or polygons than a 16 bit index can address, or no contour could be triangulated at all.
    pub fn into_polygon_mesh(
        self,
        max_vertices_per_polygon: u16,
    ) -> Result<PolygonNavmesh, PolygonMeshError> {
        let nvp = max_vertices_per_polygon as usize;
        if nvp < 3 {
            return Err(PolygonMeshError::InvalidVerticesPerPolygon(
                max_vertices_per_polygon,
            ));
        }

        let contours = || self.contours.iter().filter(|c| c.vertices.len() >= 3);
        let max_vertices: usize = contours().map(|c| c.vertices.len()).sum();
        if max_vertices >= PolygonNavmesh::NULL_INDEX as usize - 1 {
            return Err(PolygonMeshError::TooManyVertices {
                count: max_vertices,
            });
        }

        let mut vertices: Vec<U16Vec3> = Vec::with_capacity(max_vertices);
        let mut border_vertices: Vec<bool> = Vec::with_capacity(max_vertices);
        let mut welder = VertexWelder::with_capacity(max_vertices);
        let mut polygons: Vec<BuildPolygon> = Vec::new();

        let mut triangles = Vec::new();
        let mut indices = Vec::new();
        let mut contour_count = 0;
        for (contour_index, contour) in self.contours.iter().enumerate() {
            if contour.vertices.len() < 3 {
                continue;
            }
            contour_count += 1;

            let points: Vec<IVec2> = contour.vertices.iter().map(|(v, _)| xz(*v)).collect();
            triangles.clear();
            if !triangulate(&points, &mut triangles) {
                tracing::warn!("Bad triangulation of contour {contour_index}");
            }

            indices.clear();
            for (vertex, data) in &contour.vertices {
                let index = welder.add(*vertex, &mut vertices);
                if index == border_vertices.len() {
                    border_vertices.push(false);
                }
                if data.contains(RegionVertexId::BORDER_VERTEX) {
                    border_vertices[index] = true;
                }
                indices.push(index as u16);
            }

            let mut contour_polygons: Vec<BuildPolygon> = triangles
                .iter()
                .map(|&[a, b, c]| BuildPolygon {
                    vertices: vec![indices[a], indices[b], indices[c]],
                    region: contour.region,
                    area: contour.area,
                })
                .collect();
            merge_polygons(&mut contour_polygons, &vertices, nvp);
            polygons.extend(contour_polygons);
        }

        if contour_count > 0 && polygons.is_empty() {
            return Err(PolygonMeshError::NoPolygons {
                contours: contour_count,
            });
        }

        // Remove edge vertices.
        let mut i = 0;
        while i < vertices.len() {
            if border_vertices[i] && can_remove_vertex(&polygons, i as u16) {
                remove_vertex(&mut vertices, &mut polygons, i as u16, nvp);
                border_vertices.remove(i);
                continue;
            }
            i += 1;
        }

        if polygons.len() >= PolygonNavmesh::NULL_INDEX as usize - 1 {
            return Err(PolygonMeshError::TooManyPolygons {
                count: polygons.len(),
            });
        }

        let mut mesh = PolygonNavmesh {
            vertices,
            polygons: Vec::with_capacity(polygons.len() * nvp),
            polygon_neighbors: vec![PolygonNavmesh::NULL_INDEX; polygons.len() * nvp],
            regions: polygons.iter().map(|p| p.region).collect(),
            flags: vec![0; polygons.len()],
            areas: polygons.iter().map(|p| p.area).collect(),
            max_vertices_per_polygon,
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            border_size: self.border_size,
            max_edge_error: self.max_error,
        };
        for polygon in &polygons {
            mesh.polygons.extend_from_slice(&polygon.vertices);
            mesh.polygons.extend(
                std::iter::repeat_n(PolygonNavmesh::NULL_INDEX, nvp - polygon.vertices.len()),
            );
        }

        // Find portal edges
        mesh.build_adjacency();
        if self.border_size > 0 {
            mesh.mark_portal_edges(self.width, self.height);
        }

        tracing::debug!(
            "Built polygon mesh with {} vertices and {} polygons from {contour_count} contours",
            mesh.vertices.len(),
            mesh.polygon_count()
        );
        Ok(mesh)
    }
}

/// A polygon under construction.
#[derive(Debug, Clone, PartialEq)]
struct BuildPolygon {
    vertices: Vec<u16>,
    region: RegionId,
    area: AreaType,
}

const VERTEX_BUCKET_COUNT: usize = 1 << 12;

/// Spatial hash that welds vertices sharing the same xz-cell and a similar height.
struct VertexWelder {
    first: Vec<Option<usize>>,
    next: Vec<Option<usize>>,
}

impl VertexWelder {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            first: vec![None; VERTEX_BUCKET_COUNT],
            next: Vec::with_capacity(capacity),
        }
    }

    fn bucket(vertex: U16Vec3) -> usize {
        // Large multiplicative constants; here arbitrarily chosen primes
        const HASH_X: u32 = 0x8da6b343;
        const HASH_Z: u32 = 0xcb1ab31f;
        let hash = HASH_X
            .wrapping_mul(vertex.x as u32)
            .wrapping_add(HASH_Z.wrapping_mul(vertex.z as u32));
        hash as usize & (VERTEX_BUCKET_COUNT - 1)
    }

    /// Returns the index of a matching vertex, adding `vertex` if there is none.
    fn add(&mut self, vertex: U16Vec3, vertices: &mut Vec<U16Vec3>) -> usize {
        let bucket = Self::bucket(vertex);
        let mut candidate = self.first[bucket];
        while let Some(i) = candidate {
            let other = vertices[i];
            if other.x == vertex.x && other.z == vertex.z && other.y.abs_diff(vertex.y) <= 2 {
                return i;
            }
            candidate = self.next[i];
        }
        let i = vertices.len();
        vertices.push(vertex);
        self.next.push(self.first[bucket]);
        self.first[bucket] = Some(i);
        i
    }
}

fn xz(vertex: U16Vec3) -> IVec2 {
    IVec2::new(vertex.x as i32, vertex.z as i32)
}

/// Triangulates the simple polygon `points` by ear clipping, shortest diagonal first.
///
/// Returns `false` if the polygon could not be fully triangulated.
/// The triangles found until then are still appended.
fn triangulate(points: &[IVec2], triangles: &mut Vec<[usize; 3]>) -> bool {
    if points.len() < 3 {
        return false;
    }
    let mut indices: Vec<usize> = (0..points.len()).collect();
    // Whether the vertex at that position can be clipped.
    let mut ears = vec![false; points.len()];
    let n = indices.len();
    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        ears[i1] = diagonal(i, i2, points, &indices);
    }

    while indices.len() > 3 {
        let n = indices.len();
        let diagonal_length = |i: usize, j: usize| {
            let delta = points[indices[j]] - points[indices[i]];
            delta.x * delta.x + delta.y * delta.y
        };

        let mut best: Option<(i32, usize)> = None;
        for i in 0..n {
            let i1 = next(i, n);
            if ears[i1] {
                let length = diagonal_length(i, next(i1, n));
                if best.is_none_or(|(min, _)| length < min) {
                    best = Some((length, i));
                }
            }
        }

        if best.is_none() {
            // We might get here because the contour has overlapping segments.
            // Try to recover by loosening up the cone test a bit so that a diagonal
            // along the overlap can be found and we can continue.
            for i in 0..n {
                let i2 = next(next(i, n), n);
                if diagonal_loose(i, i2, points, &indices) {
                    let length = diagonal_length(i, i2);
                    if best.is_none_or(|(min, _)| length < min) {
                        best = Some((length, i));
                    }
                }
            }
        }
        let Some((_, i)) = best else {
            // The contour is messed up. This sometimes happens
            // if the contour simplification is too aggressive.
            return false;
        };

        let i1 = next(i, n);
        let i2 = next(i1, n);
        triangles.push([indices[i], indices[i1], indices[i2]]);

        // Removes P[i1]
        indices.remove(i1);
        ears.remove(i1);
        let n = indices.len();
        let i1 = if i1 >= n { 0 } else { i1 };
        let i = prev(i1, n);

        // Update diagonal flags.
        ears[i] = diagonal(prev(i, n), i1, points, &indices);
        ears[i1] = diagonal(i, next(i1, n), points, &indices);
    }

    // Append the remaining triangle.
    triangles.push([indices[0], indices[1], indices[2]]);
    true
}

/// Returns `true` if the diagonal `(i, j)` lies strictly inside the polygon in the neighborhood of `i`.
fn in_cone(i: usize, j: usize, points: &[IVec2], indices: &[usize]) -> bool {
    let n = indices.len();
    let pi = points[indices[i]];
    let pj = points[indices[j]];
    let pi1 = points[indices[next(i, n)]];
    let pin1 = points[indices[prev(i, n)]];

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

fn in_cone_loose(i: usize, j: usize, points: &[IVec2], indices: &[usize]) -> bool {
    let n = indices.len();
    let pi = points[indices[i]];
    let pj = points[indices[j]];
    let pi1 = points[indices[next(i, n)]];
    let pin1 = points[indices[prev(i, n)]];

    if left_on(pin1, pi, pi1) {
        return left_on(pi, pj, pin1) && left_on(pj, pi, pi1);
    }
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

/// Returns `true` if `(i, j)` is a proper internal or external diagonal,
/// ignoring edges incident to either end.
fn diagonalie(
    i: usize,
    j: usize,
    points: &[IVec2],
    indices: &[usize],
    intersects: fn(IVec2, IVec2, IVec2, IVec2) -> bool,
) -> bool {
    let n = indices.len();
    let d0 = points[indices[i]];
    let d1 = points[indices[j]];

    // For each edge (k,k+1) of P
    for k in 0..n {
        let k1 = next(k, n);
        // Skip edges incident to i or j
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = points[indices[k]];
        let p1 = points[indices[k1]];
        if d0 == p0 || d1 == p0 || d0 == p1 || d1 == p1 {
            continue;
        }
        if intersects(d0, d1, p0, p1) {
            return false;
        }
    }
    true
}

fn diagonal(i: usize, j: usize, points: &[IVec2], indices: &[usize]) -> bool {
    in_cone(i, j, points, indices) && diagonalie(i, j, points, indices, intersect)
}

fn diagonal_loose(i: usize, j: usize, points: &[IVec2], indices: &[usize]) -> bool {
    in_cone_loose(i, j, points, indices) && diagonalie(i, j, points, indices, intersect_prop)
}

/// Returns `true` if `c` is strictly left of the directed line `a -> b`.
fn uleft(a: U16Vec3, b: U16Vec3, c: U16Vec3) -> bool {
    left(xz(a), xz(b), xz(c))
}

/// Returns the squared length of the edge shared by `pa` and `pb` together with its position
/// in both polygons, or `None` if the polygons cannot be merged into a convex polygon.
fn merge_value(
    pa: &[u16],
    pb: &[u16],
    vertices: &[U16Vec3],
    nvp: usize,
) -> Option<(i32, usize, usize)> {
    let na = pa.len();
    let nb = pb.len();

    // If the merged polygon would be too big, do not merge.
    if na + nb - 2 > nvp {
        return None;
    }

    // Check if the polygons share an edge.
    let ordered = |a: u16, b: u16| if a > b { (b, a) } else { (a, b) };
    let (ea, eb) = (0..na).find_map(|i| {
        let edge_a = ordered(pa[i], pa[next(i, na)]);
        (0..nb)
            .find(|&j| ordered(pb[j], pb[next(j, nb)]) == edge_a)
            .map(|j| (i, j))
    })?;

    // Check to see if the merged polygon would be convex.
    let vertex = |index: u16| vertices[index as usize];
    if !uleft(
        vertex(pa[prev(ea, na)]),
        vertex(pa[ea]),
        vertex(pb[(eb + 2) % nb]),
    ) {
        return None;
    }
    if !uleft(
        vertex(pb[prev(eb, nb)]),
        vertex(pb[eb]),
        vertex(pa[(ea + 2) % na]),
    ) {
        return None;
    }

    let delta = xz(vertex(pa[ea])) - xz(vertex(pa[next(ea, na)]));
    Some((delta.x * delta.x + delta.y * delta.y, ea, eb))
}

/// Joins `pa` and `pb` along their shared edge `ea`/`eb`.
fn merge_polygon_vertices(pa: &[u16], pb: &[u16], ea: usize, eb: usize) -> Vec<u16> {
    let na = pa.len();
    let nb = pb.len();
    let mut merged = Vec::with_capacity(na + nb - 2);
    merged.extend((0..na - 1).map(|i| pa[(ea + 1 + i) % na]));
    merged.extend((0..nb - 1).map(|i| pb[(eb + 1 + i) % nb]));
    merged
}

/// Repeatedly merges the pair of polygons with the longest shared edge that keeps the result convex.
fn merge_polygons(polygons: &mut Vec<BuildPolygon>, vertices: &[U16Vec3], nvp: usize) {
    if nvp <= 3 {
        return;
    }
    loop {
        // Find best polygons to merge.
        let mut best_value = 0;
        let mut best = None;
        for j in 0..polygons.len() {
            for k in j + 1..polygons.len() {
                let Some((value, ea, eb)) =
                    merge_value(&polygons[j].vertices, &polygons[k].vertices, vertices, nvp)
                else {
                    continue;
                };
                if value > best_value {
                    best_value = value;
                    best = Some((j, k, ea, eb));
                }
            }
        }

        let Some((pa, pb, ea, eb)) = best else {
            // Could not merge any polygons, stop.
            break;
        };
        polygons[pa].vertices =
            merge_polygon_vertices(&polygons[pa].vertices, &polygons[pb].vertices, ea, eb);
        if polygons[pa].region != polygons[pb].region {
            polygons[pa].region = RegionId::NONE;
        }
        polygons.swap_remove(pb);
    }
}

fn can_remove_vertex(polygons: &[BuildPolygon], remove: u16) -> bool {
    // Count number of polygons to remove.
    let mut touched_vertices = 0;
    let mut remaining_edges = 0;
    for polygon in polygons {
        let removed = polygon.vertices.iter().filter(|&&v| v == remove).count();
        if removed > 0 {
            touched_vertices += removed;
            remaining_edges += polygon.vertices.len() - (removed + 1);
        }
    }

    // There would be too few edges remaining to create a polygon.
    // This can happen for example when a tip of a triangle is marked
    // as deletion, but there are no other polys that share the vertex.
    // In this case, the vertex should not be removed.
    if remaining_edges <= 2 {
        return false;
    }

    // Find edges which share the removed vertex, with the number of polygons using them.
    let mut edges: Vec<(u16, usize)> = Vec::with_capacity(touched_vertices * 2);
    for polygon in polygons {
        let n = polygon.vertices.len();
        for j in 0..n {
            let a = polygon.vertices[j];
            let b = polygon.vertices[prev(j, n)];
            if a != remove && b != remove {
                continue;
            }
            let other = if b == remove { a } else { b };
            match edges.iter_mut().find(|(vertex, _)| *vertex == other) {
                Some((_, count)) => *count += 1,
                None => edges.push((other, 1)),
            }
        }
    }

    // There should be no more than 2 open edges.
    // This catches the case that two non-adjacent polygons
    // are sharing the removed vertex. In that case, do not remove the vertex.
    let open_edges = edges.iter().filter(|(_, count)| *count < 2).count();
    open_edges <= 2
}

#[derive(Debug, Clone, Copy)]
struct HoleEdge {
    from: u16,
    to: u16,
    region: RegionId,
    area: AreaType,
}

#[derive(Debug, Clone, Copy)]
struct HoleVertex {
    vertex: u16,
    region: RegionId,
    area: AreaType,
}

/// Removes vertex `remove` and every polygon using it, then fills the hole with new polygons.
fn remove_vertex(
    vertices: &mut Vec<U16Vec3>,
    polygons: &mut Vec<BuildPolygon>,
    remove: u16,
    nvp: usize,
) {
    // Collect edges which do not touch the removed vertex and remove the polygons.
    let mut edges: Vec<HoleEdge> = Vec::new();
    let mut i = 0;
    while i < polygons.len() {
        if !polygons[i].vertices.contains(&remove) {
            i += 1;
            continue;
        }
        let polygon = polygons.swap_remove(i);
        let n = polygon.vertices.len();
        for j in 0..n {
            let k = prev(j, n);
            if polygon.vertices[j] != remove && polygon.vertices[k] != remove {
                edges.push(HoleEdge {
                    from: polygon.vertices[k],
                    to: polygon.vertices[j],
                    region: polygon.region,
                    area: polygon.area,
                });
            }
        }
    }

    // Remove vertex and adjust indices to match the removed vertex layout.
    vertices.remove(remove as usize);
    let shift = |index: &mut u16| {
        if *index > remove {
            *index -= 1;
        }
    };
    polygons
        .iter_mut()
        .flat_map(|polygon| polygon.vertices.iter_mut())
        .for_each(shift);
    for edge in &mut edges {
        shift(&mut edge.from);
        shift(&mut edge.to);
    }

    let Some(first) = edges.first() else {
        return;
    };

    // Start with one vertex, keep appending connected
    // segments to the start and end of the hole.
    let mut hole = VecDeque::from([HoleVertex {
        vertex: first.from,
        region: first.region,
        area: first.area,
    }]);
    while !edges.is_empty() {
        let mut matched = false;
        let mut i = 0;
        while i < edges.len() {
            let edge = edges[i];
            let hole_vertex = |vertex| HoleVertex {
                vertex,
                region: edge.region,
                area: edge.area,
            };
            let added = if hole.front().is_some_and(|h| h.vertex == edge.to) {
                // The segment matches the beginning of the hole boundary.
                hole.push_front(hole_vertex(edge.from));
                true
            } else if hole.back().is_some_and(|h| h.vertex == edge.from) {
                // The segment matches the end of the hole boundary.
                hole.push_back(hole_vertex(edge.to));
                true
            } else {
                false
            };
            if added {
                edges.swap_remove(i);
                matched = true;
            } else {
                i += 1;
            }
        }
        if !matched {
            break;
        }
    }

    // Triangulate the hole.
    let points: Vec<IVec2> = hole
        .iter()
        .map(|h| xz(vertices[h.vertex as usize]))
        .collect();
    let mut triangles = Vec::new();
    if !triangulate(&points, &mut triangles) {
        tracing::warn!("Bad triangulation of the hole left by removing vertex {remove}");
    }

    // Merge the hole triangles back to polygons.
    let mut hole_polygons: Vec<BuildPolygon> = triangles
        .iter()
        .map(|&[a, b, c]| (hole[a], hole[b], hole[c]))
        .filter(|(a, b, c)| a.vertex != b.vertex && a.vertex != c.vertex && b.vertex != c.vertex)
        .map(|(a, b, c)| {
            // If this polygon covers multiple region types then mark it as such
            let region = if a.region != b.region || b.region != c.region {
                RegionId::NONE
            } else {
                a.region
            };
            BuildPolygon {
                vertices: vec![a.vertex, b.vertex, c.vertex],
                region,
                area: a.area,
            }
        })
        .collect();
    merge_polygons(&mut hole_polygons, vertices, nvp);
    polygons.extend(hole_polygons);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        BuildContoursFlags, CompactHeightfield,
        compact_heightfield::tests::{flat_compact, floor_heightfield},
    };

    fn contours(chf: &CompactHeightfield) -> ContourSet {
        chf.build_contours(1.3, 0, BuildContoursFlags::DEFAULT)
    }

    fn flat_contours(size: u16) -> ContourSet {
        let mut chf = flat_compact(size, size);
        chf.build_regions_monotone(0, 0, 0).unwrap();
        contours(&chf)
    }

    /// Twice the covered area of all polygons on the xz-plane.
    fn doubled_area(mesh: &PolygonNavmesh) -> i32 {
        (0..mesh.polygon_count())
            .map(|i| {
                let polygon = mesh.polygon(i);
                let n = polygon.len();
                let signed: i32 = (0..n)
                    .map(|j| {
                        let a = xz(mesh.vertices[polygon[j] as usize]);
                        let b = xz(mesh.vertices[polygon[next(j, n)] as usize]);
                        a.x * b.y - b.x * a.y
                    })
                    .sum();
                signed.abs()
            })
            .sum()
    }

    fn assert_symmetric_adjacency(mesh: &PolygonNavmesh) {
        for i in 0..mesh.polygon_count() {
            for &neighbor in mesh.neighbors(i) {
                if neighbor == PolygonNavmesh::NULL_INDEX
                    || neighbor & PolygonNavmesh::EXTERNAL_LINK != 0
                {
                    continue;
                }
                assert!(
                    mesh.neighbors(neighbor as usize).contains(&(i as u16)),
                    "polygon {neighbor} does not link back to {i}"
                );
            }
        }
    }

    #[test]
    fn rectangle_becomes_one_quad() {
        let mesh = flat_contours(10).into_polygon_mesh(6).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.polygon_count(), 1);
        assert_eq!(mesh.polygon(0).len(), 4);
        assert_eq!(mesh.polygons.len(), 6);
        assert_eq!(mesh.polygons[4..], [PolygonNavmesh::NULL_INDEX; 2]);
        assert!(mesh.neighbors(0).iter().all(|&n| n == PolygonNavmesh::NULL_INDEX));
        assert_eq!(mesh.regions, vec![RegionId::new(1)]);
        assert_eq!(mesh.flags, vec![0]);
        assert_eq!(doubled_area(&mesh), 200);
    }

    #[test]
    fn triangles_only_are_adjacent() {
        let mesh = flat_contours(10).into_polygon_mesh(3).unwrap();
        assert_eq!(mesh.polygon_count(), 2);
        assert_eq!(mesh.neighbors(0).iter().filter(|&&n| n == 1).count(), 1);
        assert_eq!(mesh.neighbors(1).iter().filter(|&&n| n == 0).count(), 1);
        assert_eq!(doubled_area(&mesh), 200);
    }

    #[test]
    fn neighboring_regions_share_welded_edge() {
        let mut chf = flat_compact(10, 10);
        for z in 0..10 {
            for x in 5..10 {
                let index = chf.cell_at(x, z).index() as usize;
                chf.areas[index] = AreaType(2);
            }
        }
        chf.build_regions_monotone(0, 0, 0).unwrap();
        let mesh = contours(&chf).into_polygon_mesh(6).unwrap();
        assert_eq!(mesh.vertices.len(), 6);
        assert_eq!(mesh.polygon_count(), 2);
        assert_ne!(mesh.areas[0], mesh.areas[1]);
        assert!(mesh.neighbors(0).contains(&1));
        assert_symmetric_adjacency(&mesh);
    }

    #[test]
    fn ring_is_covered_without_its_hole() {
        let mut chf = floor_heightfield(9, 9, |x, z| {
            (!((3..6).contains(&x) && (3..6).contains(&z))).then_some(2)
        })
        .into_compact(4, 2)
        .unwrap();
        chf.build_layer_regions(0, 0).unwrap();
        let mesh = contours(&chf).into_polygon_mesh(6).unwrap();
        assert!(mesh.polygon_count() >= 4);
        assert_eq!(doubled_area(&mesh), 2 * (81 - 9));
        assert_symmetric_adjacency(&mesh);
        for i in 0..mesh.polygon_count() {
            assert!(mesh.polygon(i).len() <= 6);
        }
    }

    #[test]
    fn tile_border_edges_become_portals() {
        let mut chf = flat_compact(12, 12);
        chf.build_regions_monotone(2, 0, 0).unwrap();
        let mesh = contours(&chf).into_polygon_mesh(6).unwrap();
        assert_eq!(mesh.polygon_count(), 1);
        let mut sides: Vec<u16> = mesh
            .neighbors(0)
            .iter()
            .map(|&n| {
                assert_ne!(n & PolygonNavmesh::EXTERNAL_LINK, 0);
                n & !PolygonNavmesh::EXTERNAL_LINK
            })
            .collect();
        sides.sort_unstable();
        assert_eq!(sides, vec![0, 1, 2, 3]);
    }

    #[test]
    fn border_vertices_are_removed() {
        let mut set = flat_contours(10);
        let contour = &mut set.contours[0];
        let (a, data) = contour.vertices[0];
        let (b, _) = contour.vertices[1];
        contour.vertices.insert(
            1,
            ((a + b) / 2, data | RegionVertexId::BORDER_VERTEX),
        );
        let mesh = set.into_polygon_mesh(6).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(doubled_area(&mesh), 200);
    }

    #[test]
    fn rejects_too_few_vertices_per_polygon() {
        assert_eq!(
            flat_contours(4).into_polygon_mesh(2),
            Err(PolygonMeshError::InvalidVerticesPerPolygon(2))
        );
    }

    #[test]
    fn empty_contour_set_gives_empty_mesh() {
        let chf = flat_compact(4, 4);
        let mesh = contours(&chf).into_polygon_mesh(6).unwrap();
        assert!(mesh.vertices.is_empty());
        assert_eq!(mesh.polygon_count(), 0);
    }

    #[test]
    fn triangulates_concave_polygon() {
        // An L shape, wound like the contours.
        let points = [(0, 0), (0, 4), (2, 4), (2, 2), (4, 2), (4, 0)].map(|(x, z)| IVec2::new(x, z));
        let mut triangles = Vec::new();
        assert!(triangulate(&points, &mut triangles));
        assert_eq!(triangles.len(), 4);
        let doubled_area: i32 = triangles
            .iter()
            .map(|&[a, b, c]| crate::math::area2(points[a], points[b], points[c]).abs())
            .sum();
        assert_eq!(doubled_area, 24);
    }

    #[test]
    fn degenerate_polygon_fails_to_triangulate() {
        let mut triangles = Vec::new();
        assert!(!triangulate(&[IVec2::ZERO, IVec2::X], &mut triangles));
        assert!(triangles.is_empty());
    }
}
