//! Post-processing shared by the region partitioners: region adjacency, small region removal,
//! merging and id compaction.

use crate::{AreaType, CompactHeightfield, RegionId};

#[derive(Clone, Debug)]
struct Region {
    /// Number of spans belonging to this region
    span_count: usize,
    /// Id of the region
    id: RegionId,
    /// Area type
    area: AreaType,
    remap: bool,
    visited: bool,
    overlap: bool,
    connects_to_border: bool,
    y_min: u16,
    y_max: u16,
    /// Neighboring regions in contour order
    connections: Vec<RegionId>,
    /// Regions stacked above or below this one
    floors: Vec<RegionId>,
}

impl Region {
    fn new(id: RegionId) -> Self {
        Self {
            span_count: 0,
            id,
            area: AreaType::NOT_WALKABLE,
            remap: false,
            visited: false,
            overlap: false,
            connects_to_border: false,
            y_min: u16::MAX,
            y_max: 0,
            connections: Vec::new(),
            floors: Vec::new(),
        }
    }

    fn is_removed_or_border(&self) -> bool {
        self.id.is_none() || self.id.is_border()
    }

    fn add_unique_floor(&mut self, floor: RegionId) {
        if !self.floors.contains(&floor) {
            self.floors.push(floor);
        }
    }

    fn add_unique_connection(&mut self, connection: RegionId) {
        if !self.connections.contains(&connection) {
            self.connections.push(connection);
        }
    }

    fn remove_adjacent_neighbors(&mut self) {
        let mut i = 0;
        while i < self.connections.len() && self.connections.len() > 1 {
            let next = (i + 1) % self.connections.len();
            if self.connections[i] == self.connections[next] {
                self.connections.remove(i);
            } else {
                i += 1;
            }
        }
    }

    fn replace_neighbor(&mut self, old_id: RegionId, new_id: RegionId) {
        let mut neighbor_changed = false;
        for connection in &mut self.connections {
            if *connection == old_id {
                *connection = new_id;
                neighbor_changed = true;
            }
        }
        for floor in &mut self.floors {
            if *floor == old_id {
                *floor = new_id;
            }
        }
        if neighbor_changed {
            self.remove_adjacent_neighbors();
        }
    }

    fn can_merge_with(&self, other: &Region) -> bool {
        if self.area != other.area {
            return false;
        }
        let shared_edges = self
            .connections
            .iter()
            .filter(|connection| **connection == other.id)
            .count();
        if shared_edges > 1 {
            return false;
        }
        !self.floors.contains(&other.id)
    }

    /// A region touches the border if one of its neighbours is the null region.
    fn is_connected_to_border(&self) -> bool {
        self.connections.iter().any(|connection| connection.is_none())
    }
}

/// Merges region `source` into region `target` by splicing their contours at the shared edge.
fn merge_regions(regions: &mut [Region], target: usize, source: usize) -> bool {
    if target == source {
        return false;
    }
    let target_id = regions[target].id;
    let source_id = regions[source].id;

    let target_connections = regions[target].connections.clone();
    let source_connections = regions[source].connections.clone();

    // Find insertion point on target.
    let Some(insert_target) = target_connections.iter().position(|c| *c == source_id) else {
        return false;
    };
    // Find insertion point on source.
    let Some(insert_source) = source_connections.iter().position(|c| *c == target_id) else {
        return false;
    };

    let mut connections =
        Vec::with_capacity(target_connections.len() + source_connections.len());
    let count = target_connections.len();
    for i in 0..count - 1 {
        connections.push(target_connections[(insert_target + 1 + i) % count]);
    }
    let count = source_connections.len();
    for i in 0..count - 1 {
        connections.push(source_connections[(insert_source + 1 + i) % count]);
    }

    let source_floors = regions[source].floors.clone();
    let source_span_count = regions[source].span_count;

    let target_region = &mut regions[target];
    target_region.connections = connections;
    target_region.remove_adjacent_neighbors();
    for floor in source_floors {
        target_region.add_unique_floor(floor);
    }
    target_region.span_count += source_span_count;

    let source_region = &mut regions[source];
    source_region.span_count = 0;
    source_region.connections.clear();
    true
}

impl CompactHeightfield {
    /// Removes regions smaller than `min_region_area` and merges regions smaller than `merge_region_area`
    /// into their smallest compatible neighbor. Region ids are compacted afterwards and
    /// [`CompactHeightfield::max_region`] is set to the new highest id.
    ///
    /// Returns the ids of regions that overlap themselves vertically.
    pub(crate) fn merge_and_filter_regions(
        &mut self,
        min_region_area: u16,
        merge_region_area: u16,
        src_reg: &mut [RegionId],
    ) -> Vec<RegionId> {
        let region_count = self.max_region.bits() as usize + 1;
        let mut regions: Vec<Region> = (0..region_count)
            .map(|i| Region::new(RegionId::new(i as u16)))
            .collect();

        // Find edge of a region and find connections around the contour.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    let region_id = src_reg[i];
                    let ri = region_id.bits() as usize;
                    if region_id.is_none() || ri >= region_count {
                        continue;
                    }
                    let region = &mut regions[ri];
                    region.span_count += 1;

                    // Update floors.
                    for j in cell.index_range() {
                        if i == j {
                            continue;
                        }
                        let floor_id = src_reg[j];
                        if floor_id.is_none() || floor_id.bits() as usize >= region_count {
                            continue;
                        }
                        if floor_id == region_id {
                            region.overlap = true;
                        }
                        region.add_unique_floor(floor_id);
                    }

                    // Have found contour
                    if !region.connections.is_empty() {
                        continue;
                    }
                    region.area = self.areas[i];

                    // Check if this cell is next to a border.
                    let solid_edge = (0..4)
                        .find(|dir| self.is_solid_edge(src_reg, x as i32, z as i32, i, *dir));
                    if let Some(dir) = solid_edge {
                        // The cell is at border.
                        // Walk around the contour to find all the neighbours.
                        region.connections =
                            self.walk_contour(x as i32, z as i32, i, dir, src_reg);
                    }
                }
            }
        }

        // Remove too small regions.
        let mut stack = Vec::with_capacity(32);
        let mut trace = Vec::with_capacity(32);
        for i in 0..region_count {
            let region = &regions[i];
            if region.is_removed_or_border() || region.span_count == 0 || region.visited {
                continue;
            }

            // Count the total size of all the connected regions.
            // Also keep track of the regions connects to a tile border.
            let mut connects_to_border = false;
            let mut span_count = 0;
            stack.clear();
            trace.clear();

            regions[i].visited = true;
            stack.push(i);

            while let Some(ri) = stack.pop() {
                span_count += regions[ri].span_count;
                trace.push(ri);

                for j in 0..regions[ri].connections.len() {
                    let connection = regions[ri].connections[j];
                    if connection.is_border() {
                        connects_to_border = true;
                        continue;
                    }
                    let neighbor = &mut regions[connection.bits() as usize];
                    if neighbor.visited || neighbor.is_removed_or_border() {
                        continue;
                    }
                    // Visit
                    stack.push(neighbor.id.bits() as usize);
                    neighbor.visited = true;
                }
            }

            // If the accumulated regions size is too small, remove it.
            // Regions that touch a tile border are kept since their full size is unknown.
            if span_count < min_region_area as usize && !connects_to_border {
                // Kill all visited regions.
                for &ri in &trace {
                    regions[ri].span_count = 0;
                    regions[ri].id = RegionId::NONE;
                }
            }
        }

        // Merge too small regions to neighbour regions.
        loop {
            let mut merge_count = 0;
            for i in 0..region_count {
                let region = &regions[i];
                if region.is_removed_or_border() || region.overlap || region.span_count == 0 {
                    continue;
                }

                // Check to see if the region should be merged.
                if region.span_count > merge_region_area as usize && region.is_connected_to_border()
                {
                    continue;
                }

                // Small region with more than 1 connection.
                // Or region which is not connected to a border at all.
                // Find smallest neighbour region that connects to this one.
                let mut smallest = usize::MAX;
                let mut merge_id = region.id;
                for connection in &region.connections {
                    if connection.is_border() {
                        continue;
                    }
                    let candidate = &regions[connection.bits() as usize];
                    if candidate.is_removed_or_border() || candidate.overlap {
                        continue;
                    }
                    if candidate.span_count < smallest
                        && region.can_merge_with(candidate)
                        && candidate.can_merge_with(region)
                    {
                        smallest = candidate.span_count;
                        merge_id = candidate.id;
                    }
                }

                // Found new id.
                if merge_id != region.id {
                    let old_id = region.id;
                    if merge_regions(&mut regions, merge_id.bits() as usize, i) {
                        // Fixup regions pointing to current region.
                        for other in regions.iter_mut() {
                            if other.is_removed_or_border() {
                                continue;
                            }
                            // If another region was already merged into current region
                            // change the nid of the previous region too.
                            if other.id == old_id {
                                other.id = merge_id;
                            }
                            // Replace the current region with the new one if the
                            // current regions is neighbour.
                            other.replace_neighbor(old_id, merge_id);
                        }
                        merge_count += 1;
                    }
                }
            }
            if merge_count == 0 {
                break;
            }
        }

        self.compress_region_ids(&mut regions, src_reg);

        // Return regions that we found to be overlapping.
        regions
            .iter()
            .filter(|region| region.overlap)
            .map(|region| region.id)
            .collect()
    }

    /// Merges the monotone sweep regions into 2D layers: connected regions of the same area
    /// that never overlap vertically. Layers smaller than `min_region_area` are removed.
    pub(crate) fn merge_and_filter_layer_regions(
        &mut self,
        min_region_area: u16,
        src_reg: &mut [RegionId],
    ) {
        let region_count = self.max_region.bits() as usize + 1;
        let mut regions: Vec<Region> = (0..region_count)
            .map(|i| Region::new(RegionId::new(i as u16)))
            .collect();

        // Find region neighbours and overlapping regions.
        let mut layer_regions = Vec::with_capacity(32);
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                layer_regions.clear();

                for i in cell.index_range() {
                    let region_id = src_reg[i];
                    let ri = region_id.bits() as usize;
                    if region_id.is_none() || ri >= region_count {
                        continue;
                    }
                    let y = self.spans[i].y;
                    let region = &mut regions[ri];
                    region.span_count += 1;
                    region.area = self.areas[i];
                    region.y_min = region.y_min.min(y);
                    region.y_max = region.y_max.max(y);

                    // Collect all region layers.
                    layer_regions.push(region_id);

                    // Update neighbours
                    for dir in 0..4 {
                        let Some((_, _, a_index)) =
                            self.neighbor_index(x as i32, z as i32, i, dir)
                        else {
                            continue;
                        };
                        let neighbor_region = src_reg[a_index];
                        if !neighbor_region.is_none()
                            && (neighbor_region.bits() as usize) < region_count
                            && neighbor_region != region_id
                        {
                            region.add_unique_connection(neighbor_region);
                        }
                        if neighbor_region.is_border() {
                            region.connects_to_border = true;
                        }
                    }
                }

                // Update overlapping regions.
                for i in 0..layer_regions.len() {
                    for j in i + 1..layer_regions.len() {
                        let (a, b) = (layer_regions[i], layer_regions[j]);
                        if a != b {
                            regions[a.bits() as usize].add_unique_floor(b);
                            regions[b.bits() as usize].add_unique_floor(a);
                        }
                    }
                }
            }
        }

        // Create 2D layers from regions.
        let mut layer_id = 1_u16;
        for region in &mut regions {
            region.id = RegionId::NONE;
        }

        // Merge monotone regions to create non-overlapping areas.
        let mut stack = std::collections::VecDeque::with_capacity(32);
        for root_index in 1..region_count {
            // Skip already visited and empty regions.
            if !regions[root_index].id.is_none() || regions[root_index].span_count == 0 {
                continue;
            }

            // Start search.
            regions[root_index].id = RegionId::new(layer_id);
            stack.clear();
            stack.push_back(root_index);

            while let Some(ri) = stack.pop_front() {
                for j in 0..regions[ri].connections.len() {
                    let neighbor = regions[ri].connections[j];
                    let ni = neighbor.bits() as usize;
                    // Skip already visited.
                    if !regions[ni].id.is_none() {
                        continue;
                    }
                    // Skip if different area type, do not connect regions with different area type.
                    if regions[ri].area != regions[ni].area {
                        continue;
                    }
                    // Skip if the neighbour is overlapping root region.
                    if regions[root_index].floors.contains(&neighbor) {
                        continue;
                    }

                    // Deepen
                    stack.push_back(ni);
                    // Mark layer id
                    regions[ni].id = RegionId::new(layer_id);

                    // Merge current layers to root.
                    let floors = regions[ni].floors.clone();
                    let span_count = std::mem::take(&mut regions[ni].span_count);
                    let (y_min, y_max) = (regions[ni].y_min, regions[ni].y_max);
                    let connects_to_border = regions[ni].connects_to_border;

                    let root = &mut regions[root_index];
                    for floor in floors {
                        root.add_unique_floor(floor);
                    }
                    root.y_min = root.y_min.min(y_min);
                    root.y_max = root.y_max.max(y_max);
                    root.span_count += span_count;
                    root.connects_to_border |= connects_to_border;
                }
            }

            layer_id = layer_id.saturating_add(1);
        }

        // Remove small regions
        for i in 0..region_count {
            let region = &regions[i];
            if region.span_count > 0
                && region.span_count < min_region_area as usize
                && !region.connects_to_border
            {
                let removed = region.id;
                for other in regions.iter_mut() {
                    if other.id == removed {
                        other.id = RegionId::NONE;
                    }
                }
            }
        }

        self.compress_region_ids(&mut regions, src_reg);
    }

    /// Renumbers the surviving regions to `1..=n`, writes the new ids into `src_reg`
    /// and stores `n` in [`CompactHeightfield::max_region`].
    fn compress_region_ids(&mut self, regions: &mut [Region], src_reg: &mut [RegionId]) {
        for (i, region) in regions.iter_mut().enumerate() {
            // Ids that never received a span, like the placeholders of painted border regions, are dropped.
            if region.span_count == 0 && region.id == RegionId::new(i as u16) {
                region.id = RegionId::NONE;
            }
            region.remap = !region.is_removed_or_border();
        }

        let mut id_gen = 0_u16;
        for i in 0..regions.len() {
            if !regions[i].remap {
                continue;
            }
            let old_id = regions[i].id;
            id_gen += 1;
            let new_id = RegionId::new(id_gen);
            for region in &mut regions[i..] {
                if region.id == old_id {
                    region.id = new_id;
                    region.remap = false;
                }
            }
        }
        self.max_region = RegionId::new(id_gen);

        // Remap regions.
        for region in src_reg.iter_mut() {
            if !region.is_border() {
                *region = regions[region.bits() as usize].id;
            }
        }
    }

    fn is_solid_edge(&self, src_reg: &[RegionId], x: i32, z: i32, i: usize, dir: u8) -> bool {
        let neighbor = self
            .neighbor_index(x, z, i, dir)
            .map_or(RegionId::NONE, |(_, _, a_index)| src_reg[a_index]);
        neighbor != src_reg[i]
    }

    /// Walks the outline of the region containing span `i`, starting at its solid edge `dir`,
    /// and returns the neighboring regions encountered in order.
    fn walk_contour(
        &self,
        mut x: i32,
        mut z: i32,
        mut i: usize,
        mut dir: u8,
        src_reg: &[RegionId],
    ) -> Vec<RegionId> {
        let start_dir = dir;
        let start_index = i;

        let region_across = |x: i32, z: i32, i: usize, dir: u8| {
            self.neighbor_index(x, z, i, dir)
                .map_or(RegionId::NONE, |(_, _, a_index)| src_reg[a_index])
        };

        let mut current_region = region_across(x, z, i, dir);
        let mut contour = vec![current_region];

        for _ in 1..40_000 {
            if self.is_solid_edge(src_reg, x, z, i, dir) {
                // Choose the edge corner
                let region = region_across(x, z, i, dir);
                if region != current_region {
                    current_region = region;
                    contour.push(current_region);
                }
                // Rotate CW
                dir = (dir + 1) & 0x3;
            } else {
                let Some((n_x, n_z, n_index)) = self.neighbor_index(x, z, i, dir) else {
                    // Should not happen.
                    return contour;
                };
                x = n_x;
                z = n_z;
                i = n_index;
                // Rotate CCW
                dir = (dir + 3) & 0x3;
            }

            if start_index == i && start_dir == dir {
                break;
            }
        }

        // Remove adjacent duplicates.
        let mut j = 0;
        while j < contour.len() && contour.len() > 1 {
            let next = (j + 1) % contour.len();
            if contour[j] == contour[next] {
                contour.remove(j);
            } else {
                j += 1;
            }
        }
        contour
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(id: u16, connections: &[u16]) -> Region {
        let mut region = Region::new(RegionId::new(id));
        region.connections = connections.iter().map(|c| RegionId::new(*c)).collect();
        region
    }

    #[test]
    fn adjacent_duplicates_are_removed_cyclically() {
        let mut r = region(1, &[2, 2, 3, 0, 2]);
        r.remove_adjacent_neighbors();
        assert_eq!(
            r.connections,
            vec![RegionId::new(2), RegionId::new(3), RegionId::NONE]
        );
    }

    #[test]
    fn merging_splices_contours() {
        let mut regions = vec![
            region(0, &[]),
            region(1, &[0, 2]),
            region(2, &[1, 0, 3]),
            region(3, &[2, 0]),
        ];
        regions[1].span_count = 4;
        regions[2].span_count = 6;
        assert!(merge_regions(&mut regions, 2, 1));
        assert_eq!(regions[2].span_count, 10);
        assert_eq!(regions[1].span_count, 0);
        assert!(regions[1].connections.is_empty());
        assert!(!regions[2].connections.contains(&RegionId::new(1)));
        assert!(regions[2].connections.contains(&RegionId::new(3)));
    }

    #[test]
    fn regions_sharing_a_floor_cannot_merge() {
        let a = region(1, &[2]);
        let mut b = region(2, &[1]);
        assert!(a.can_merge_with(&b));
        b.floors.push(RegionId::new(1));
        assert!(!b.can_merge_with(&a));
        b.floors.clear();
        b.area = AreaType(4);
        assert!(!a.can_merge_with(&b));
    }

    #[test]
    fn null_neighbor_means_border() {
        assert!(region(1, &[0, 2]).is_connected_to_border());
        assert!(!region(1, &[2]).is_connected_to_border());
    }
}
