#![doc = include_str!("../../../readme.md")]

mod area_marking;
mod compact_cell;
mod compact_heightfield;
mod compact_span;
mod config;
mod contours;
mod detail_mesh;
mod erosion;
mod heightfield;
mod heightfield_layers;
mod main_api;
pub(crate) mod math;
mod monotone_regions;
mod poly_mesh;
mod pre_filter;
mod rasterize;
mod region;
mod region_merge;
mod span;
mod trimesh;
mod watershed_build_regions;
mod watershed_distance_field;

pub use area_marking::ConvexVolume;
pub use compact_cell::CompactCell;
pub use compact_heightfield::{CompactHeightfield, CompactHeightfieldError};
pub use compact_span::CompactSpan;
pub use config::{NavmeshConfig, NavmeshConfigBuilder, RegionPartitioning};
pub use contours::{BuildContoursFlags, Contour, ContourSet, RegionVertexId};
pub use detail_mesh::{DetailNavmesh, DetailNavmeshError, SubMesh};
pub use heightfield::{
    Heightfield, HeightfieldBuilder, HeightfieldBuilderError, SpanInsertionError, calc_grid_size,
};
pub use heightfield_layers::{HeightfieldLayer, HeightfieldLayerSet, HeightfieldLayersError};
pub use main_api::{Navmesh, NavmeshError, build};
pub use math::{Aabb2d, Aabb3d};
pub use poly_mesh::{PolygonMeshError, PolygonNavmesh};
pub use rasterize::RasterizationError;
pub use region::RegionId;
pub use span::{AreaType, Span, SpanKey, Spans};
pub use trimesh::{TriMesh, TriMeshError};
pub use watershed_build_regions::RegionError;
