//! Runs the bake stages on small generated scenes and checks the properties every bake must keep.

use std::f32::consts::TAU;

use anyhow::Result;
use approx::assert_relative_eq;
use glam::{UVec3, Vec3, Vec3A};
use navbake::{
    Aabb3d, BuildContoursFlags, CompactHeightfield, DetailNavmesh, HeightfieldBuilder,
    HeightfieldLayersError, NavmeshConfigBuilder, PolygonNavmesh, RegionId, RegionPartitioning,
    TriMesh, calc_grid_size,
};

const WALKABLE_HEIGHT: u16 = 4;
const WALKABLE_CLIMB: u16 = 2;

/// An axis aligned quad on the xz-plane at `y`, facing up.
fn quad(min_x: f32, min_z: f32, max_x: f32, max_z: f32, y: f32) -> TriMesh {
    TriMesh::new(
        vec![
            Vec3A::new(min_x, y, min_z),
            Vec3A::new(min_x, y, max_z),
            Vec3A::new(max_x, y, max_z),
            Vec3A::new(max_x, y, min_z),
        ],
        vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
    )
}

/// A flat disc made of a triangle fan, facing up.
fn disc(center: Vec3A, radius: f32, segments: u32) -> TriMesh {
    let mut vertices = vec![center];
    vertices.extend((0..segments).map(|i| {
        let angle = i as f32 / segments as f32 * TAU;
        center + Vec3A::new(angle.cos(), 0.0, angle.sin()) * radius
    }));
    let indices = (0..segments)
        .map(|i| UVec3::new(0, (i + 1) % segments + 1, i + 1))
        .collect();
    TriMesh::new(vertices, indices)
}

fn merged(meshes: impl IntoIterator<Item = TriMesh>) -> Result<TriMesh> {
    let mut trimesh = TriMesh::default();
    for mesh in meshes {
        trimesh.extend(mesh)?;
    }
    Ok(trimesh)
}

/// Voxelizes `trimesh` with unit cells inside `aabb` and compacts the result without filtering.
fn compact(mut trimesh: TriMesh, aabb: Aabb3d) -> Result<CompactHeightfield> {
    let mut heightfield = HeightfieldBuilder {
        aabb,
        cell_size: 1.0,
        cell_height: 0.5,
    }
    .build()?;
    trimesh.mark_walkable_triangles(45.0_f32.to_radians());
    heightfield.rasterize_triangles(&trimesh, WALKABLE_CLIMB)?;
    Ok(heightfield.into_compact(WALKABLE_HEIGHT, WALKABLE_CLIMB)?)
}

fn field_aabb(width: f32, depth: f32) -> Aabb3d {
    Aabb3d::new(Vec3::new(0.0, -1.0, 0.0), [width, 4.0, depth])
}

fn distinct_regions(chf: &CompactHeightfield) -> Vec<RegionId> {
    let mut regions: Vec<RegionId> = chf
        .spans
        .iter()
        .map(|span| span.region)
        .filter(|region| !region.is_none())
        .collect();
    regions.sort();
    regions.dedup();
    regions
}

#[test]
fn bounds_and_grid_size() -> Result<()> {
    let trimesh = quad(0.0, 0.0, 10.0, 20.0, 0.0);
    let aabb = trimesh.compute_aabb().expect("trimesh is not empty");
    assert_eq!(aabb.min, Vec3::ZERO);
    assert_eq!(aabb.max, Vec3::new(10.0, 0.0, 20.0));
    assert_eq!(calc_grid_size(&aabb, 1.0), (10, 20));
    assert_eq!(calc_grid_size(&aabb, 0.5), (20, 40));
    Ok(())
}

#[test]
fn flat_quad_fills_every_column_once() -> Result<()> {
    let mut trimesh = quad(0.0, 0.0, 10.0, 10.0, 0.0);
    trimesh.mark_walkable_triangles(45.0_f32.to_radians());
    let mut heightfield = HeightfieldBuilder {
        aabb: field_aabb(10.0, 10.0),
        cell_size: 1.0,
        cell_height: 0.5,
    }
    .build()?;
    heightfield.rasterize_triangles(&trimesh, WALKABLE_CLIMB)?;

    for z in 0..heightfield.height {
        for x in 0..heightfield.width {
            let spans: Vec<_> = heightfield.column_spans(x, z).collect();
            assert_eq!(spans.len(), 1, "column ({x}, {z})");
            assert!(spans[0].area().is_walkable());
            assert!(spans[0].next().is_none());
            assert!(spans[0].min() <= spans[0].max());
        }
    }
    Ok(())
}

#[test]
fn erosion_is_monotone_in_radius() -> Result<()> {
    let chf = compact(quad(0.0, 0.0, 20.0, 20.0, 0.0), field_aabb(20.0, 20.0))?;
    let walkable_after = |radius: u16| {
        let mut chf = chf.clone();
        chf.erode_walkable_area(radius);
        chf.areas.iter().filter(|area| area.is_walkable()).count()
    };
    let counts: Vec<usize> = (0..6).map(walkable_after).collect();
    assert_eq!(counts[0], 400);
    assert!(counts.windows(2).all(|pair| pair[1] <= pair[0]), "{counts:?}");
    assert!(counts[5] < counts[0]);
    Ok(())
}

#[test]
fn two_platforms_become_two_regions() -> Result<()> {
    let trimesh = merged([
        quad(0.0, 0.0, 3.5, 10.0, 0.0),
        quad(6.5, 0.0, 10.0, 10.0, 0.0),
    ])?;
    let chf = compact(trimesh, field_aabb(10.0, 10.0))?;

    let mut watershed = chf.clone();
    watershed.build_distance_field();
    watershed.build_regions(0, 0, 400)?;
    assert_eq!(distinct_regions(&watershed).len(), 2);

    let mut monotone = chf;
    monotone.build_regions_monotone(0, 0, 0)?;
    assert_eq!(distinct_regions(&monotone).len(), 2);
    Ok(())
}

#[test]
fn simplification_is_monotone_in_error() -> Result<()> {
    let mut chf = compact(
        disc(Vec3A::new(12.0, 0.0, 12.0), 9.0, 48),
        field_aabb(24.0, 24.0),
    )?;
    chf.build_regions_monotone(0, 0, 0)?;

    let vertex_counts: Vec<usize> = [0.5, 1.0, 2.0, 4.0]
        .into_iter()
        .map(|max_error| {
            chf.build_contours(max_error, 0, BuildContoursFlags::DEFAULT)
                .contours
                .iter()
                .map(|contour| contour.vertices.len())
                .sum()
        })
        .collect();
    assert!(
        vertex_counts.windows(2).all(|pair| pair[1] <= pair[0]),
        "{vertex_counts:?}"
    );
    Ok(())
}

#[test]
fn polygon_adjacency_is_symmetric() -> Result<()> {
    let mut chf = compact(
        disc(Vec3A::new(12.0, 0.0, 12.0), 9.0, 48),
        field_aabb(24.0, 24.0),
    )?;
    chf.build_distance_field();
    chf.build_regions(0, 4, 20)?;
    let mesh = chf
        .build_contours(1.3, 12, BuildContoursFlags::DEFAULT)
        .into_polygon_mesh(6)?;
    assert!(mesh.polygon_count() > 1);

    for i in 0..mesh.polygon_count() {
        let polygon = mesh.polygon(i);
        assert!((3..=6).contains(&polygon.len()));
        for (edge, &neighbor) in mesh.neighbors(i).iter().enumerate() {
            if neighbor == PolygonNavmesh::NULL_INDEX {
                continue;
            }
            let neighbor = neighbor as usize;
            let back = mesh
                .neighbors(neighbor)
                .iter()
                .position(|&n| n as usize == i)
                .expect("neighbor links back");
            // Both sides describe the same edge, in opposite directions.
            let a = polygon[edge];
            let b = polygon[(edge + 1) % polygon.len()];
            let other = mesh.polygon(neighbor);
            let c = other[back];
            let d = other[(back + 1) % other.len()];
            assert_eq!((a, b), (d, c));
        }
    }
    Ok(())
}

#[test]
fn layered_build_fails_beyond_255_regions() -> Result<()> {
    // One isolated island in every other cell.
    let islands = (0..32).flat_map(|z| {
        (0..32).map(move |x| {
            let (x, z) = (2.0 * x as f32, 2.0 * z as f32);
            quad(x + 0.25, z + 0.25, x + 0.75, z + 0.75, 0.0)
        })
    });
    let chf = compact(merged(islands)?, field_aabb(64.0, 64.0))?;
    assert_eq!(chf.span_count(), 1024);

    assert!(matches!(
        chf.build_heightfield_layers(0, WALKABLE_HEIGHT),
        Err(HeightfieldLayersError::TooManyRegions)
    ));

    let mut regions = chf.clone();
    regions.build_layer_regions(0, 0)?;
    assert_eq!(distinct_regions(&regions).len(), 1024);
    Ok(())
}

#[test]
fn empty_polygon_mesh_gives_empty_detail_mesh() -> Result<()> {
    let config = NavmeshConfigBuilder {
        aabb: field_aabb(10.0, 10.0),
        ..Default::default()
    }
    .build();
    let navmesh = navbake::build(TriMesh::default(), &config)?;
    assert_eq!(navmesh.polygon_mesh.polygon_count(), 0);
    assert_eq!(navmesh.detail_mesh, DetailNavmesh::default());
    Ok(())
}

#[test]
fn detail_mesh_starts_with_polygon_vertices() -> Result<()> {
    let config = NavmeshConfigBuilder {
        cell_size: 0.5,
        cell_height: 0.25,
        aabb: field_aabb(12.0, 12.0),
        partitioning: RegionPartitioning::Monotone,
        ..Default::default()
    }
    .build();
    let navmesh = navbake::build(disc(Vec3A::new(6.0, 0.0, 6.0), 5.0, 32), &config)?;
    let polygons = &navmesh.polygon_mesh;
    let detail = &navmesh.detail_mesh;
    assert!(polygons.polygon_count() > 0);
    assert_eq!(detail.meshes.len(), polygons.polygon_count());

    for i in 0..polygons.polygon_count() {
        let polygon = polygons.polygon(i);
        let vertices = detail.sub_mesh_vertices(i);
        assert!(vertices.len() >= polygon.len());
        for (detail_vertex, &index) in vertices.iter().zip(polygon) {
            let vertex = polygons.vertices[index as usize].as_vec3();
            assert_relative_eq!(
                detail_vertex.x,
                vertex.x * polygons.cell_size + polygons.aabb.min.x,
                epsilon = 1e-4
            );
            assert_relative_eq!(
                detail_vertex.z,
                vertex.z * polygons.cell_size + polygons.aabb.min.z,
                epsilon = 1e-4
            );
        }
        assert!(detail.meshes[i].triangle_count >= 1);
    }
    Ok(())
}

#[cfg(feature = "serialize")]
#[test]
fn config_survives_json() -> Result<()> {
    let config = NavmeshConfigBuilder {
        aabb: field_aabb(10.0, 20.0),
        partitioning: RegionPartitioning::Layers,
        area_volumes: vec![navbake::ConvexVolume {
            vertices: vec![glam::Vec2::ZERO, glam::Vec2::X, glam::Vec2::Y],
            min_y: -1.0,
            max_y: 1.0,
            area: navbake::AreaType(3),
        }],
        ..Default::default()
    }
    .build();
    let json = serde_json::to_string(&config)?;
    let restored: navbake::NavmeshConfig = serde_json::from_str(&json)?;
    assert_eq!(restored, config);
    Ok(())
}
