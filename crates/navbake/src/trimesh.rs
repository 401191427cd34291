//! Contains the [`TriMesh`], the triangle soup that is voxelized into a [`Heightfield`](crate::Heightfield).

use glam::{UVec3, Vec3A};
use thiserror::Error;

use crate::{
    math::{Aabb3d, TriangleIndices as _},
    span::AreaType,
};

/// A mesh used as input for [`Heightfield`](crate::Heightfield) rasterization.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TriMesh {
    /// The vertices composing the mesh.
    /// Follows the convention of a triangle list.
    pub vertices: Vec<Vec3A>,

    /// The indices composing the mesh.
    /// Follows the convention of a triangle list.
    pub indices: Vec<UVec3>,

    /// The area types of the trimesh. Each index corresponds 1:1 to the [`TriMesh::indices`].
    pub area_types: Vec<AreaType>,
}

impl TriMesh {
    /// Creates a trimesh whose triangles are all [`AreaType::NOT_WALKABLE`].
    pub fn new(vertices: Vec<Vec3A>, indices: Vec<UVec3>) -> Self {
        let area_types = vec![AreaType::NOT_WALKABLE; indices.len()];
        Self {
            vertices,
            indices,
            area_types,
        }
    }

    /// Extends the trimesh with the vertices and indices of another trimesh.
    /// The indices of `other` will be offset by the number of vertices in `self`.
    ///
    /// # Errors
    ///
    /// Returns an error if the combined vertex count can no longer be indexed by a `u32`.
    pub fn extend(&mut self, other: TriMesh) -> Result<(), TriMeshError> {
        let vertex_count = self.vertices.len() + other.vertices.len();
        if vertex_count > u32::MAX as usize {
            return Err(TriMeshError::TooManyVertices(vertex_count));
        }
        let next_vertex_index = self.vertices.len() as u32;
        self.vertices.extend(other.vertices);
        self.indices
            .extend(other.indices.iter().map(|i| i + next_vertex_index));
        self.area_types.extend(other.area_types);
        Ok(())
    }

    /// Computes the AABB of the trimesh.
    /// Returns `None` if the trimesh is empty.
    pub fn compute_aabb(&self) -> Option<Aabb3d> {
        Aabb3d::from_verts(&self.vertices)
    }

    /// Marks the triangles as walkable or not based on the threshold angle.
    ///
    /// The triangles are marked as walkable if the angle between their normal and the up axis is less than the threshold angle.
    /// Triangles that are not walkable keep their current area type.
    ///
    /// # Arguments
    ///
    /// * `threshold_rad` - The threshold angle in radians.
    ///
    pub fn mark_walkable_triangles(&mut self, threshold_rad: f32) {
        let threshold_cos = threshold_rad.cos();
        for (indices, area) in self.indices.iter().zip(self.area_types.iter_mut()) {
            let normal = indices.normal(&self.vertices);

            if normal.y > threshold_cos {
                *area = AreaType::DEFAULT_WALKABLE;
            }
        }
    }

    /// Sets the area type of triangles that are too steep to [`AreaType::NOT_WALKABLE`].
    ///
    /// Only marks triangles as unwalkable. Triangles that are flat enough keep their current area type.
    ///
    /// # Arguments
    ///
    /// * `threshold_rad` - The threshold angle in radians.
    ///
    pub fn clear_unwalkable_triangles(&mut self, threshold_rad: f32) {
        let threshold_cos = threshold_rad.cos();
        for (indices, area) in self.indices.iter().zip(self.area_types.iter_mut()) {
            let normal = indices.normal(&self.vertices);

            if normal.y <= threshold_cos {
                *area = AreaType::NOT_WALKABLE;
            }
        }
    }
}

/// Errors that can occur when combining [`TriMesh`]es.
#[derive(Error, Debug)]
pub enum TriMeshError {
    /// The trimesh would hold more vertices than a `u32` index can address.
    #[error("Trimesh would contain {0} vertices, but at most 2^32 can be indexed")]
    TooManyVertices(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slope() -> TriMesh {
        // One flat triangle and one vertical wall.
        TriMesh::new(
            vec![
                Vec3A::new(0.0, 0.0, 0.0),
                Vec3A::new(0.0, 0.0, 1.0),
                Vec3A::new(1.0, 0.0, 0.0),
                Vec3A::new(0.0, 1.0, 0.0),
            ],
            vec![UVec3::new(0, 1, 2), UVec3::new(0, 3, 2)],
        )
    }

    #[test]
    fn marks_flat_triangles_walkable() {
        let mut trimesh = slope();
        trimesh.mark_walkable_triangles(45.0_f32.to_radians());
        assert_eq!(
            trimesh.area_types,
            [AreaType::DEFAULT_WALKABLE, AreaType::NOT_WALKABLE]
        );
    }

    #[test]
    fn clears_steep_triangles() {
        let mut trimesh = slope();
        trimesh.area_types = vec![AreaType(5); 2];
        trimesh.clear_unwalkable_triangles(45.0_f32.to_radians());
        assert_eq!(trimesh.area_types, [AreaType(5), AreaType::NOT_WALKABLE]);
    }

    #[test]
    fn extend_offsets_indices() {
        let mut trimesh = slope();
        trimesh.extend(slope()).unwrap();
        assert_eq!(trimesh.vertices.len(), 8);
        assert_eq!(trimesh.indices[2], UVec3::new(4, 5, 6));
        assert_eq!(trimesh.area_types.len(), 4);
    }

    #[test]
    fn computes_aabb() {
        let aabb = slope().compute_aabb().unwrap();
        assert_eq!(aabb.min, glam::Vec3::ZERO);
        assert_eq!(aabb.max, glam::Vec3::ONE);
        assert!(TriMesh::default().compute_aabb().is_none());
    }
}
