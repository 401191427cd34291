//! Layered heightfields for tile caches.
//!
//! A [`HeightfieldLayer`] is a 2.5D grid where every cell holds at most one walkable floor.
//! Overlapping floors of a [`CompactHeightfield`] end up in different layers.

use std::collections::VecDeque;

use thiserror::Error;

use crate::{Aabb3d, AreaType, CompactHeightfield};

/// Maximum number of layers a single region can overlap with.
const MAX_LAYERS: usize = 63;
/// Maximum number of tracked neighbours per region. Extra neighbours only cause more layers.
const MAX_NEIGHBORS: usize = 16;
/// Maximum number of pending regions during the layer flood.
const MAX_STACK: usize = 64;
/// Region ids are stored in a byte per cell, which caps the number of monotone regions.
const MAX_REGIONS: usize = 255;

/// A set of [`HeightfieldLayer`]s built from one [`CompactHeightfield`].
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct HeightfieldLayerSet {
    /// The layers in the set.
    pub layers: Vec<HeightfieldLayer>,
}

/// A 2.5D heightfield with at most one walkable floor per cell.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct HeightfieldLayer {
    /// The bounds of the layer in world space. The border of the source field is excluded.
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
    /// The width of the layer along the x-axis in cell units
    pub width: u16,
    /// The height of the layer along the z-axis in cell units
    pub height: u16,
    /// The minimum x-coordinate of the cells in use
    pub min_x: u16,
    /// The maximum x-coordinate of the cells in use
    pub max_x: u16,
    /// The minimum z-coordinate of the cells in use
    pub min_z: u16,
    /// The maximum z-coordinate of the cells in use
    pub max_z: u16,
    /// The minimum height of a floor in the layer, in voxels relative to the source field
    pub min_height: u16,
    /// The maximum height of a floor in the layer, in voxels relative to the source field
    pub max_height: u16,
    /// Floor heights relative to `min_height`, [`HeightfieldLayer::EMPTY_HEIGHT`] for empty cells. [Size: `width * height`]
    pub heights: Vec<u8>,
    /// Area types of the cells. [Size: `width * height`]
    pub areas: Vec<AreaType>,
    /// Packed neighbour information per cell. [Size: `width * height`]
    ///
    /// The low four bits flag walkable neighbours within the layer,
    /// the high four bits flag portals to other layers, one bit per direction.
    pub connections: Vec<u8>,
}

impl HeightfieldLayer {
    /// Height value of cells without a floor.
    pub const EMPTY_HEIGHT: u8 = 0xff;

    /// Returns the directions in which the cell at `index` connects to walkable cells of this layer.
    #[inline]
    pub fn connection_mask(&self, index: usize) -> u8 {
        self.connections[index] & 0xf
    }

    /// Returns the directions in which the cell at `index` borders a different layer.
    #[inline]
    pub fn portal_mask(&self, index: usize) -> u8 {
        self.connections[index] >> 4
    }
}

#[derive(Debug, Clone, Copy)]
struct LayerSweepSpan {
    sample_count: usize,
    neighbor: Option<usize>,
    id: usize,
}

#[derive(Debug, Clone)]
struct LayerRegion {
    /// Regions sharing a column with this one
    layers: Vec<usize>,
    neighbors: Vec<usize>,
    y_min: u16,
    y_max: u16,
    layer_id: Option<usize>,
    /// Whether this region is the base of merged regions
    base: bool,
}

impl Default for LayerRegion {
    fn default() -> Self {
        Self {
            layers: Vec::new(),
            neighbors: Vec::new(),
            y_min: u16::MAX,
            y_max: 0,
            layer_id: None,
            base: false,
        }
    }
}

fn add_unique(values: &mut Vec<usize>, capacity: usize, value: usize) -> bool {
    if values.contains(&value) {
        return true;
    }
    if values.len() >= capacity {
        return false;
    }
    values.push(value);
    true
}

fn overlap_range(a_min: u32, a_max: u32, b_min: u32, b_max: u32) -> bool {
    !(a_min > b_max || a_max < b_min)
}

impl CompactHeightfield {
    /// Builds a layer set from the walkable spans of the field.
    ///
    /// The field is partitioned into monotone regions that are merged into non-overlapping layers.
    /// Layers whose height ranges are within `walkable_height * 4` of each other are merged as long as they
    /// do not overlap.
    ///
    /// # Arguments
    ///
    /// - `border_size`: The size of the non-navigable border around the heightfield. [Limit: >=0] [Units: vx]
    /// - `walkable_height`: Minimum floor to 'ceiling' height that will still allow the floor area to be considered walkable. [Limit: >= 3] [Units: vx]
    ///
    /// # Errors
    ///
    /// Returns [`HeightfieldLayersError::TooManyRegions`] if the field is split into more than 255 regions
    /// and [`HeightfieldLayersError::TooManyOverlappingLayers`] if too many floors are stacked on top of each other.
    pub fn build_heightfield_layers(
        &self,
        border_size: u16,
        walkable_height: u16,
    ) -> Result<HeightfieldLayerSet, HeightfieldLayersError> {
        let x_range = border_size..self.width.saturating_sub(border_size);
        let z_range = border_size..self.height.saturating_sub(border_size);

        // Partition walkable area into monotone regions.
        let mut src_reg: Vec<Option<usize>> = vec![None; self.spans.len()];
        let mut sweeps: Vec<LayerSweepSpan> = Vec::with_capacity(self.width as usize);
        let mut prev_count = [0_usize; MAX_REGIONS + 1];
        let mut region_count = 0;

        for z in z_range {
            prev_count[..region_count].fill(0);
            sweeps.clear();

            for x in x_range.clone() {
                for i in self.cell_at(x, z).index_range() {
                    if !self.areas[i].is_walkable() {
                        continue;
                    }

                    // -x
                    let west = self
                        .neighbor_index(x as i32, z as i32, i, 0)
                        .filter(|(_, _, a_index)| self.areas[*a_index].is_walkable())
                        .and_then(|(_, _, a_index)| src_reg[a_index]);
                    let sweep_id = match west {
                        Some(sweep_id) => sweep_id,
                        None => {
                            sweeps.push(LayerSweepSpan {
                                sample_count: 0,
                                neighbor: None,
                                id: 0,
                            });
                            sweeps.len() - 1
                        }
                    };

                    // -z
                    if let Some(neighbor) = self
                        .neighbor_index(x as i32, z as i32, i, 3)
                        .and_then(|(_, _, a_index)| src_reg[a_index])
                    {
                        let sweep = &mut sweeps[sweep_id];
                        // Set neighbour when first valid neighbour is encountered.
                        if sweep.sample_count == 0 {
                            sweep.neighbor = Some(neighbor);
                        }
                        if sweep.neighbor == Some(neighbor) {
                            sweep.sample_count += 1;
                            prev_count[neighbor] += 1;
                        } else {
                            // More than one neighbour.
                            sweep.neighbor = None;
                        }
                    }

                    src_reg[i] = Some(sweep_id);
                }
            }

            // Create unique ID.
            for sweep in &mut sweeps {
                match sweep.neighbor {
                    Some(neighbor) if prev_count[neighbor] == sweep.sample_count => {
                        sweep.id = neighbor;
                    }
                    _ => {
                        if region_count == MAX_REGIONS {
                            return Err(HeightfieldLayersError::TooManyRegions);
                        }
                        sweep.id = region_count;
                        region_count += 1;
                    }
                }
            }

            // Remap local sweep ids to region ids.
            for x in x_range.clone() {
                for i in self.cell_at(x, z).index_range() {
                    if let Some(sweep_id) = src_reg[i] {
                        src_reg[i] = Some(sweeps[sweep_id].id);
                    }
                }
            }
        }

        let mut regions = vec![LayerRegion::default(); region_count];

        // Find region neighbours and overlapping regions.
        let mut column_regions = Vec::with_capacity(MAX_LAYERS);
        for z in 0..self.height {
            for x in 0..self.width {
                column_regions.clear();
                for i in self.cell_at(x, z).index_range() {
                    let Some(ri) = src_reg[i] else {
                        continue;
                    };
                    let y = self.spans[i].y;
                    let region = &mut regions[ri];
                    region.y_min = region.y_min.min(y);
                    region.y_max = region.y_max.max(y);

                    // Collect all region layers.
                    if column_regions.len() < MAX_LAYERS {
                        column_regions.push(ri);
                    }

                    // Update neighbours
                    for dir in 0..4 {
                        let Some(neighbor) = self
                            .neighbor_index(x as i32, z as i32, i, dir)
                            .and_then(|(_, _, a_index)| src_reg[a_index])
                        else {
                            continue;
                        };
                        if neighbor != ri {
                            // A full neighbour list only leads to a few more layers.
                            add_unique(&mut region.neighbors, MAX_NEIGHBORS, neighbor);
                        }
                    }
                }

                // Update overlapping regions.
                for i in 0..column_regions.len() {
                    for j in i + 1..column_regions.len() {
                        let (a, b) = (column_regions[i], column_regions[j]);
                        if a == b {
                            continue;
                        }
                        if !add_unique(&mut regions[a].layers, MAX_LAYERS, b)
                            || !add_unique(&mut regions[b].layers, MAX_LAYERS, a)
                        {
                            return Err(HeightfieldLayersError::TooManyOverlappingLayers);
                        }
                    }
                }
            }
        }

        // Create 2D layers from regions.
        let mut layer_id = 0;
        let mut stack = VecDeque::with_capacity(MAX_STACK);
        for root in 0..region_count {
            // Skip already visited.
            if regions[root].layer_id.is_some() {
                continue;
            }
            regions[root].layer_id = Some(layer_id);
            regions[root].base = true;

            stack.clear();
            stack.push_back(root);
            while let Some(ri) = stack.pop_front() {
                for j in 0..regions[ri].neighbors.len() {
                    let neighbor = regions[ri].neighbors[j];
                    // Skip already visited.
                    if regions[neighbor].layer_id.is_some() {
                        continue;
                    }
                    // Skip if the neighbour is overlapping root region.
                    if regions[root].layers.contains(&neighbor) {
                        continue;
                    }
                    // Skip if the height range would become too large.
                    let y_min = regions[root].y_min.min(regions[neighbor].y_min);
                    let y_max = regions[root].y_max.max(regions[neighbor].y_max);
                    if y_max.saturating_sub(y_min) >= 255 {
                        continue;
                    }
                    if stack.len() >= MAX_STACK {
                        continue;
                    }

                    stack.push_back(neighbor);
                    regions[neighbor].layer_id = Some(layer_id);

                    // Merge current layers to root.
                    let layers = regions[neighbor].layers.clone();
                    let root_region = &mut regions[root];
                    for layer in layers {
                        if !add_unique(&mut root_region.layers, MAX_LAYERS, layer) {
                            return Err(HeightfieldLayersError::TooManyOverlappingLayers);
                        }
                    }
                    root_region.y_min = y_min;
                    root_region.y_max = y_max;
                }
            }
            layer_id += 1;
        }

        // Merge non-overlapping regions that are close in height.
        let merge_height = walkable_height as u32 * 4;
        for i in 0..region_count {
            if !regions[i].base {
                continue;
            }
            let new_id = regions[i].layer_id;

            loop {
                let mut old_id = None;
                let ri = &regions[i];
                for (j, rj) in regions.iter().enumerate() {
                    if i == j || !rj.base {
                        continue;
                    }
                    // Skip if the regions are not close to each other.
                    if !overlap_range(
                        ri.y_min as u32,
                        ri.y_max as u32 + merge_height,
                        rj.y_min as u32,
                        rj.y_max as u32 + merge_height,
                    ) {
                        continue;
                    }
                    // Skip if the height range would become too large.
                    let y_min = ri.y_min.min(rj.y_min);
                    let y_max = ri.y_max.max(rj.y_max);
                    if y_max.saturating_sub(y_min) >= 255 {
                        continue;
                    }
                    // Make sure that there is no overlap when merging 'ri' and 'rj'.
                    let overlap = regions
                        .iter()
                        .enumerate()
                        .any(|(k, rk)| rk.layer_id == rj.layer_id && ri.layers.contains(&k));
                    if overlap {
                        continue;
                    }
                    old_id = rj.layer_id;
                    break;
                }

                // Could not find anything to merge with, stop.
                let Some(old_id) = old_id else {
                    break;
                };

                for j in 0..region_count {
                    if regions[j].layer_id != Some(old_id) {
                        continue;
                    }
                    regions[j].base = false;
                    regions[j].layer_id = new_id;

                    // Add overlaid layers from 'rj' to 'ri'.
                    let layers = regions[j].layers.clone();
                    let (y_min, y_max) = (regions[j].y_min, regions[j].y_max);
                    let ri = &mut regions[i];
                    for layer in layers {
                        if !add_unique(&mut ri.layers, MAX_LAYERS, layer) {
                            return Err(HeightfieldLayersError::TooManyOverlappingLayers);
                        }
                    }
                    ri.y_min = ri.y_min.min(y_min);
                    ri.y_max = ri.y_max.max(y_max);
                }
            }
        }

        // Compact layer ids
        let mut remap: Vec<Option<usize>> = vec![None; layer_id];
        for region in &regions {
            if let Some(id) = region.layer_id {
                remap[id] = Some(0);
            }
        }
        let mut layer_count = 0;
        for id in remap.iter_mut().flatten() {
            *id = layer_count;
            layer_count += 1;
        }
        for region in &mut regions {
            region.layer_id = region.layer_id.and_then(|id| remap[id]);
        }

        let layer_width = self.width.saturating_sub(border_size * 2);
        let layer_height = self.height.saturating_sub(border_size * 2);

        // Build contracted bbox for layers.
        let border = border_size as f32 * self.cell_size;
        let mut aabb = self.aabb;
        aabb.min.x += border;
        aabb.min.z += border;
        aabb.max.x -= border;
        aabb.max.z -= border;

        let grid_size = layer_width as usize * layer_height as usize;
        let mut layers = Vec::with_capacity(layer_count);
        for current in 0..layer_count {
            // Find layer height bounds.
            let (min_height, max_height) = regions
                .iter()
                .filter(|region| region.base && region.layer_id == Some(current))
                .last()
                .map_or((0, 0), |region| (region.y_min, region.y_max));

            let mut layer = HeightfieldLayer {
                aabb: Aabb3d {
                    min: aabb.min.with_y(self.aabb.min.y + min_height as f32 * self.cell_height),
                    max: aabb.max.with_y(self.aabb.min.y + max_height as f32 * self.cell_height),
                },
                cell_size: self.cell_size,
                cell_height: self.cell_height,
                width: layer_width,
                height: layer_height,
                min_x: layer_width,
                max_x: 0,
                min_z: layer_height,
                max_z: 0,
                min_height,
                max_height,
                heights: vec![HeightfieldLayer::EMPTY_HEIGHT; grid_size],
                areas: vec![AreaType::NOT_WALKABLE; grid_size],
                connections: vec![0; grid_size],
            };

            // Copy height and area from compact heightfield.
            for z in 0..layer_height {
                for x in 0..layer_width {
                    let cx = border_size + x;
                    let cz = border_size + z;
                    for j in self.cell_at(cx, cz).index_range() {
                        // Skip unassigned regions.
                        let Some(rj) = src_reg[j] else {
                            continue;
                        };
                        // Skip if it does not belong to the current layer.
                        let layer_of_span = regions[rj].layer_id;
                        if layer_of_span != Some(current) {
                            continue;
                        }

                        // Update data bounds.
                        layer.min_x = layer.min_x.min(x);
                        layer.max_x = layer.max_x.max(x);
                        layer.min_z = layer.min_z.min(z);
                        layer.max_z = layer.max_z.max(z);

                        let index = x as usize + z as usize * layer_width as usize;
                        layer.heights[index] = relative_height(self.spans[j].y, min_height);
                        layer.areas[index] = self.areas[j];

                        // Check connection.
                        let mut portal = 0_u8;
                        let mut connection = 0_u8;
                        for dir in 0..4 {
                            let Some((a_x, a_z, a_index)) =
                                self.neighbor_index(cx as i32, cz as i32, j, dir)
                            else {
                                continue;
                            };
                            if !self.areas[a_index].is_walkable() {
                                continue;
                            }
                            let neighbor_layer = src_reg[a_index].and_then(|r| regions[r].layer_id);
                            if neighbor_layer != layer_of_span {
                                portal |= 1 << dir;
                                // Update height so that it matches on both sides of the portal.
                                let a_y = self.spans[a_index].y;
                                if a_y > min_height {
                                    layer.heights[index] =
                                        layer.heights[index].max(relative_height(a_y, min_height));
                                }
                            } else {
                                let n_x = a_x - border_size as i32;
                                let n_z = a_z - border_size as i32;
                                if n_x >= 0
                                    && n_z >= 0
                                    && n_x < layer_width as i32
                                    && n_z < layer_height as i32
                                {
                                    connection |= 1 << dir;
                                }
                            }
                        }
                        layer.connections[index] = (portal << 4) | connection;
                    }
                }
            }

            if layer.min_x > layer.max_x {
                layer.min_x = 0;
                layer.max_x = 0;
            }
            if layer.min_z > layer.max_z {
                layer.min_z = 0;
                layer.max_z = 0;
            }
            layers.push(layer);
        }

        tracing::debug!(
            "Built {} heightfield layers out of {region_count} regions",
            layers.len()
        );
        Ok(HeightfieldLayerSet { layers })
    }
}

fn relative_height(y: u16, min_height: u16) -> u8 {
    y.saturating_sub(min_height).min(u8::MAX as u16) as u8
}

/// Errors that can occur when building a [`HeightfieldLayerSet`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeightfieldLayersError {
    /// The monotone partitioning produced more regions than a layered build can represent.
    #[error(
        "Region id overflow: layered builds support at most 255 regions. Try larger region areas or a different partitioning"
    )]
    TooManyRegions,
    /// Too many walkable platforms are stacked on top of each other.
    #[error("Layer overflow: more than 63 overlapping walkable platforms")]
    TooManyOverlappingLayers,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compact_heightfield::tests::{flat_compact, floor_heightfield, stacked_heightfield};

    #[test]
    fn flat_floor_is_a_single_layer() {
        let chf = flat_compact(10, 10);
        let set = chf.build_heightfield_layers(0, 4).unwrap();
        assert_eq!(set.layers.len(), 1);
        let layer = &set.layers[0];
        assert_eq!((layer.width, layer.height), (10, 10));
        assert_eq!((layer.min_x, layer.max_x, layer.min_z, layer.max_z), (0, 9, 0, 9));
        assert!(layer.heights.iter().all(|height| *height == 0));
        // Interior cells connect in all four directions without portals.
        let center = 5 + 5 * 10;
        assert_eq!(layer.connection_mask(center), 0xf);
        assert_eq!(layer.portal_mask(center), 0);
        // Corner (0, 0) only connects to +x and +z.
        assert_eq!(layer.connection_mask(0), 0b0110);
    }

    #[test]
    fn border_is_cut_from_layers() {
        let chf = flat_compact(10, 10);
        let set = chf.build_heightfield_layers(2, 4).unwrap();
        let layer = &set.layers[0];
        assert_eq!((layer.width, layer.height), (6, 6));
        assert_eq!(layer.aabb.min.x, 2.0);
        assert_eq!(layer.aabb.max.x, 8.0);
    }

    #[test]
    fn stacked_floors_end_up_in_different_layers() {
        let chf = stacked_heightfield(8, 8, |x, _| {
            let mut spans = vec![(0, 2)];
            if (2..6).contains(&x) {
                spans.push((18, 20));
            }
            spans
        })
        .into_compact(4, 2)
        .unwrap();
        // Even with a large merge height the overlapping floors stay apart.
        let set = chf.build_heightfield_layers(0, 10).unwrap();
        assert_eq!(set.layers.len(), 2);
        let bridge = set
            .layers
            .iter()
            .find(|layer| layer.min_height == 20)
            .unwrap();
        assert_eq!((bridge.min_x, bridge.max_x), (2, 5));
        assert_eq!(bridge.heights[0], HeightfieldLayer::EMPTY_HEIGHT);
    }

    #[test]
    fn nearby_platforms_share_a_layer() {
        let chf = floor_heightfield(11, 5, |x, _| match x {
            0..5 => Some(2),
            6.. => Some(4),
            _ => None,
        })
        .into_compact(4, 2)
        .unwrap();
        let set = chf.build_heightfield_layers(0, 4).unwrap();
        assert_eq!(set.layers.len(), 1);
        let layer = &set.layers[0];
        assert_eq!((layer.min_height, layer.max_height), (2, 4));
        assert_eq!(layer.heights[10], 2);
        assert_eq!(layer.heights[5], HeightfieldLayer::EMPTY_HEIGHT);
    }

    #[test]
    fn more_than_255_regions_fail() {
        // 16 * 16 isolated single cell platforms
        let chf = floor_heightfield(32, 32, |x, z| (x % 2 == 0 && z % 2 == 0).then_some(2))
            .into_compact(4, 2)
            .unwrap();
        assert_eq!(
            chf.build_heightfield_layers(0, 4),
            Err(HeightfieldLayersError::TooManyRegions)
        );

        // One platform less fits.
        let chf = floor_heightfield(32, 32, |x, z| {
            (x % 2 == 0 && z % 2 == 0 && (x, z) != (30, 30)).then_some(2)
        })
        .into_compact(4, 2)
        .unwrap();
        let set = chf.build_heightfield_layers(0, 4).unwrap();
        assert!(!set.layers.is_empty());
    }

    #[test]
    fn empty_field_has_no_layers() {
        let chf = floor_heightfield(4, 4, |_, _| None).into_compact(4, 2).unwrap();
        let set = chf.build_heightfield_layers(0, 4).unwrap();
        assert!(set.layers.is_empty());
    }
}
