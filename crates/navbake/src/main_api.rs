//! The one-shot bake from triangles to a [`Navmesh`].

use thiserror::Error;

use crate::{
    CompactHeightfieldError, DetailNavmesh, DetailNavmeshError, HeightfieldBuilder,
    HeightfieldBuilderError, NavmeshConfig, PolygonMeshError, PolygonNavmesh, RegionError,
    RegionPartitioning, heightfield::Heightfield, rasterize::RasterizationError, trimesh::TriMesh,
};

impl Heightfield {
    /// Rasterizes the triangles of a [`TriMesh`] into a [`Heightfield`] and removes the spans an agent can't stand on.
    ///
    /// # Arguments
    ///
    /// - `trimesh` - The [`TriMesh`] to rasterize.
    /// - `walkable_height` Minimum floor to 'ceiling' height that will still allow the floor area to be considered walkable. [Limit: >= 3] [Units: vx]
    /// - `walkable_climb` - Maximum ledge height that is considered to still be traversable. [Limit: >=0] [Units: vx]
    ///
    /// # Errors
    ///
    /// Returns an error if the trimesh is malformed.
    pub fn populate_from_trimesh(
        &mut self,
        trimesh: &TriMesh,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Result<(), RasterizationError> {
        // flag_merge_threshold and walkable_climb are the same value in practice.
        self.rasterize_triangles(trimesh, walkable_climb)?;

        // Once all geometry is rasterized, we do initial pass of filtering to
        // remove unwanted overhangs caused by the conservative rasterization
        // as well as filter spans where the character cannot possibly stand.
        self.filter_low_hanging_walkable_obstacles(walkable_climb);
        self.filter_ledge_spans(walkable_height, walkable_climb);
        self.filter_walkable_low_height_spans(walkable_height);
        Ok(())
    }
}

/// The result of a bake: convex polygons for pathfinding and their height detail.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Navmesh {
    /// The convex polygons with their adjacency.
    pub polygon_mesh: PolygonNavmesh,
    /// One height detail sub-mesh per polygon of [`Self::polygon_mesh`].
    pub detail_mesh: DetailNavmesh,
}

/// Bakes `trimesh` into a [`Navmesh`] using the parameters of `config`.
///
/// The triangles are marked walkable by [`NavmeshConfig::walkable_slope_angle`] first, so
/// triangles that are already walkable keep their area type.
/// If the config has a border, the field covers [`NavmeshConfig::aabb`] grown by the border on the xz-plane.
///
/// # Errors
///
/// Returns an error if any stage of the bake fails. See [`NavmeshError`].
pub fn build(mut trimesh: TriMesh, config: &NavmeshConfig) -> Result<Navmesh, NavmeshError> {
    let heightfield = {
        let _span = tracing::info_span!("rasterize_and_filter").entered();
        let mut aabb = config.aabb;
        let padding = config.border_size as f32 * config.cell_size;
        aabb.min.x -= padding;
        aabb.min.z -= padding;
        aabb.max.x += padding;
        aabb.max.z += padding;
        let mut heightfield = HeightfieldBuilder {
            aabb,
            cell_size: config.cell_size,
            cell_height: config.cell_height,
        }
        .build()?;
        trimesh.mark_walkable_triangles(config.walkable_slope_angle);
        heightfield.populate_from_trimesh(&trimesh, config.walkable_height, config.walkable_climb)?;
        heightfield
    };

    let mut compact_heightfield = {
        let _span = tracing::info_span!("compact").entered();
        heightfield.into_compact(config.walkable_height, config.walkable_climb)?
    };

    {
        let _span = tracing::info_span!("erode").entered();
        compact_heightfield.erode_walkable_area(config.walkable_radius);
    }

    if !config.area_volumes.is_empty() {
        let _span = tracing::info_span!("mark_areas").entered();
        for volume in &config.area_volumes {
            compact_heightfield.mark_convex_poly_area(volume.clone());
        }
    }

    {
        let _span =
            tracing::info_span!("build_regions", partitioning = ?config.partitioning).entered();
        match config.partitioning {
            RegionPartitioning::Watershed => {
                compact_heightfield.build_distance_field();
                compact_heightfield.build_regions(
                    config.border_size,
                    config.min_region_area,
                    config.merge_region_area,
                )?;
            }
            RegionPartitioning::Monotone => compact_heightfield.build_regions_monotone(
                config.border_size,
                config.min_region_area,
                config.merge_region_area,
            )?,
            RegionPartitioning::Layers => compact_heightfield
                .build_layer_regions(config.border_size, config.min_region_area)?,
        }
    }

    let contours = {
        let _span = tracing::info_span!("build_contours").entered();
        compact_heightfield.build_contours(
            config.max_simplification_error,
            config.max_edge_len,
            config.contour_flags,
        )
    };

    let polygon_mesh = {
        let _span = tracing::info_span!("build_polygon_mesh").entered();
        contours.into_polygon_mesh(config.max_vertices_per_polygon)?
    };

    let detail_mesh = {
        let _span = tracing::info_span!("build_detail_mesh").entered();
        DetailNavmesh::new(
            &polygon_mesh,
            &compact_heightfield,
            config.detail_sample_dist,
            config.detail_sample_max_error,
        )?
    };

    tracing::info!(
        polygons = polygon_mesh.polygon_count(),
        detail_triangles = detail_mesh.triangles.len(),
        "Baked navmesh"
    );
    Ok(Navmesh {
        polygon_mesh,
        detail_mesh,
    })
}

/// Errors that can occur during [`build`].
#[derive(Error, Debug)]
pub enum NavmeshError {
    /// The heightfield could not be created from the config.
    #[error("Failed to build heightfield: {0}")]
    Heightfield(#[from] HeightfieldBuilderError),
    /// The input triangles could not be rasterized.
    #[error("Failed to rasterize triangles: {0}")]
    Rasterization(#[from] RasterizationError),
    /// The heightfield could not be compacted.
    #[error("Failed to build compact heightfield: {0}")]
    CompactHeightfield(#[from] CompactHeightfieldError),
    /// The walkable area could not be partitioned.
    #[error("Failed to build regions: {0}")]
    Regions(#[from] RegionError),
    /// The contours could not be turned into polygons.
    #[error("Failed to build polygon mesh: {0}")]
    PolygonMesh(#[from] PolygonMeshError),
    /// The height detail could not be built.
    #[error("Failed to build detail mesh: {0}")]
    DetailMesh(#[from] DetailNavmeshError),
}

#[cfg(test)]
mod tests {
    use glam::{UVec3, Vec3, Vec3A};

    use super::*;
    use crate::{Aabb3d, NavmeshConfigBuilder};

    fn plane(size: f32) -> TriMesh {
        TriMesh::new(
            vec![
                Vec3A::new(0.0, 0.0, 0.0),
                Vec3A::new(0.0, 0.0, size),
                Vec3A::new(size, 0.0, size),
                Vec3A::new(size, 0.0, 0.0),
            ],
            vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
        )
    }

    fn config(size: f32, partitioning: RegionPartitioning) -> NavmeshConfig {
        NavmeshConfigBuilder {
            cell_size: 0.5,
            cell_height: 0.25,
            aabb: Aabb3d::new(Vec3::new(0.0, -1.0, 0.0), [size, 4.0, size]),
            partitioning,
            ..Default::default()
        }
        .build()
    }

    #[test]
    fn populate_rasterizes_and_filters() {
        let mut trimesh = plane(10.0);
        trimesh.mark_walkable_triangles(45.0_f32.to_radians());
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3::new(0.0, -1.0, 0.0), [10.0, 4.0, 10.0]),
            cell_size: 1.0,
            cell_height: 0.5,
        }
        .build()
        .unwrap();
        heightfield.populate_from_trimesh(&trimesh, 4, 2).unwrap();
        // The outermost columns border the edge of the field and count as ledges.
        assert_eq!(heightfield.walkable_span_count(), 64);
    }

    #[test]
    fn plane_bakes_with_every_partitioning() {
        for partitioning in [
            RegionPartitioning::Watershed,
            RegionPartitioning::Monotone,
            RegionPartitioning::Layers,
        ] {
            let navmesh = build(plane(10.0), &config(10.0, partitioning)).unwrap();
            let polygons = &navmesh.polygon_mesh;
            assert!(polygons.polygon_count() >= 1, "{partitioning:?}");
            assert_eq!(navmesh.detail_mesh.meshes.len(), polygons.polygon_count());
            assert!(
                navmesh
                    .detail_mesh
                    .vertices
                    .iter()
                    .all(|v| (0.0..=10.0).contains(&v.x) && (0.0..=10.0).contains(&v.z))
            );
        }
    }

    #[test]
    fn empty_trimesh_bakes_empty_navmesh() {
        let trimesh = TriMesh::default();
        let navmesh = build(trimesh, &config(10.0, RegionPartitioning::Watershed)).unwrap();
        assert_eq!(navmesh.polygon_mesh.polygon_count(), 0);
        assert_eq!(navmesh.detail_mesh, DetailNavmesh::default());
    }

    #[test]
    fn invalid_cell_size_is_reported() {
        let mut config = config(10.0, RegionPartitioning::Watershed);
        config.cell_size = 0.0;
        assert!(matches!(
            build(plane(10.0), &config),
            Err(NavmeshError::Heightfield(_))
        ));
    }
}
