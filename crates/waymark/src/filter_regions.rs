//! Removal of undersized regions and merging of small regions into their neighbours.

use crate::{AreaType, CompactHeightfield, RegionId};

/// Bookkeeping for one region id while filtering.
#[derive(Debug, Clone, Default)]
struct Region {
    span_count: usize,
    /// The current id, regions merged into another one take over its id.
    id: RegionId,
    area_type: AreaType,
    remap: bool,
    visited: bool,
    overlap: bool,
    /// Regions met while walking around the region's border, in walk order.
    /// [`RegionId::NONE`] stands for a solid edge.
    connections: Vec<RegionId>,
    /// Regions stacked above or below this one in the same columns.
    floors: Vec<RegionId>,
}

impl Region {
    fn new(id: RegionId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    fn add_unique_floor_region(&mut self, region: RegionId) {
        if !self.floors.contains(&region) {
            self.floors.push(region);
        }
    }

    fn remove_adjacent_neighbours(&mut self) {
        // Remove adjacent duplicates.
        let mut i = 0;
        while i < self.connections.len() && self.connections.len() > 1 {
            let ni = (i + 1) % self.connections.len();
            if self.connections[i] == self.connections[ni] {
                self.connections.remove(i);
            } else {
                i += 1;
            }
        }
    }

    fn replace_neighbour(&mut self, old_id: RegionId, new_id: RegionId) {
        let mut neighbour_changed = false;
        for connection in &mut self.connections {
            if *connection == old_id {
                *connection = new_id;
                neighbour_changed = true;
            }
        }
        for floor in &mut self.floors {
            if *floor == old_id {
                *floor = new_id;
            }
        }
        if neighbour_changed {
            self.remove_adjacent_neighbours();
        }
    }

    fn can_merge_with_region(&self, other: &Region) -> bool {
        if self.area_type != other.area_type {
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

    fn is_connected_to_border(&self) -> bool {
        // Solid edges are stored as the null region.
        self.connections.contains(&RegionId::NONE)
    }
}

/// Merges region `b` into region `a` by splicing their connection rings at the shared edge.
/// Returns `false` if the regions do not touch.
fn merge_regions(regions: &mut [Region], a: usize, b: usize) -> bool {
    let a_id = regions[a].id;
    let b_id = regions[b].id;

    // Duplicate current neighbourhood.
    let a_connections = regions[a].connections.clone();
    let b_connections = std::mem::take(&mut regions[b].connections);

    // Find insertion point on A.
    let Some(insert_a) = a_connections.iter().position(|c| *c == b_id) else {
        regions[b].connections = b_connections;
        return false;
    };
    // Find insertion point on B.
    let Some(insert_b) = b_connections.iter().position(|c| *c == a_id) else {
        regions[b].connections = b_connections;
        return false;
    };

    // Merge neighbours.
    let region_a = &mut regions[a];
    region_a.connections.clear();
    let a_len = a_connections.len();
    for i in 0..a_len - 1 {
        region_a
            .connections
            .push(a_connections[(insert_a + 1 + i) % a_len]);
    }
    let b_len = b_connections.len();
    for i in 0..b_len - 1 {
        region_a
            .connections
            .push(b_connections[(insert_b + 1 + i) % b_len]);
    }
    region_a.remove_adjacent_neighbours();

    let b_floors = regions[b].floors.clone();
    for floor in b_floors {
        regions[a].add_unique_floor_region(floor);
    }
    regions[a].span_count += regions[b].span_count;
    regions[b].span_count = 0;
    true
}

impl CompactHeightfield {
    /// Removes connected clusters of regions smaller than `min_region_area`, merges regions of
    /// at most `merge_region_size` spans into their smallest eligible neighbour and compresses
    /// the surviving ids to `1..=max_region`.
    ///
    /// `region_id_end` is one past the largest id in `src_reg`.
    /// Returns the ids of regions found to overlap themselves.
    pub(crate) fn merge_and_filter_regions(
        &mut self,
        min_region_area: u16,
        merge_region_size: u16,
        region_id_end: u16,
        src_reg: &mut [RegionId],
    ) -> Vec<RegionId> {
        let region_count = region_id_end as usize + 1;
        let mut regions: Vec<Region> = (0..region_count)
            .map(|i| Region::new(RegionId::from(i as u16)))
            .collect();

        // Find edge of a region and find connections around the contour.
        for (x, z, span_range) in self.iter_columns() {
            for i in span_range.clone() {
                let r = src_reg[i];
                if r.is_null_or_border() || r.bits() as usize >= region_count {
                    continue;
                }
                let region = &mut regions[r.bits() as usize];
                region.span_count += 1;

                // Update floors.
                for j in span_range.clone() {
                    if i == j {
                        continue;
                    }
                    let floor_id = src_reg[j];
                    if floor_id.is_null_or_border() || floor_id.bits() as usize >= region_count {
                        continue;
                    }
                    if floor_id == r {
                        region.overlap = true;
                    }
                    region.add_unique_floor_region(floor_id);
                }

                // Have found contour
                if !region.connections.is_empty() {
                    continue;
                }

                region.area_type = self.areas[i];

                // Check if this cell is next to a border.
                let Some(dir) = (0..4).find(|dir| self.is_solid_edge(src_reg, x, z, i, *dir)) else {
                    continue;
                };
                // The cell is at border.
                // Walk around the contour to find all the neighbours.
                let connections = self.walk_region_contour(x, z, i, dir, src_reg);
                regions[r.bits() as usize].connections = connections;
            }
        }

        // Remove too small regions.
        let mut stack = Vec::with_capacity(32);
        let mut trace = Vec::with_capacity(32);
        for i in 0..region_count {
            let region = &regions[i];
            if region.id.is_null_or_border() || region.span_count == 0 || region.visited {
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
                    if connection.contains(RegionId::BORDER_REGION) {
                        connects_to_border = true;
                        continue;
                    }
                    let neighbour = &mut regions[connection.bits() as usize];
                    if neighbour.visited || neighbour.id.is_null_or_border() {
                        continue;
                    }
                    // Visit
                    stack.push(neighbour.id.bits() as usize);
                    neighbour.visited = true;
                }
            }

            // If the accumulated regions size is too small, remove it.
            // Do not remove areas which connect to tile borders
            // as their size cannot be estimated correctly and removing them
            // can potentially remove necessary areas.
            if span_count < min_region_area as usize && !connects_to_border {
                // Kill all visited regions.
                for &j in &trace {
                    regions[j].span_count = 0;
                    regions[j].id = RegionId::NONE;
                }
            }
        }

        // Merge too small regions to neighbour regions.
        loop {
            let mut merge_count = 0;
            for i in 0..region_count {
                let region = &regions[i];
                if region.id.is_null_or_border() || region.overlap || region.span_count == 0 {
                    continue;
                }

                // Check to see if the region should be merged.
                if region.span_count > merge_region_size as usize && region.is_connected_to_border()
                {
                    continue;
                }

                // Small region with more than 1 connection.
                // Or region which is not connected to a border at all.
                // Find smallest neighbour region that connects to this one.
                let mut smallest = usize::MAX;
                let mut merge_id = region.id;
                for connection in &region.connections {
                    if connection.contains(RegionId::BORDER_REGION) {
                        continue;
                    }
                    let neighbour = &regions[connection.bits() as usize];
                    if neighbour.id.is_null_or_border() || neighbour.overlap {
                        continue;
                    }
                    if neighbour.span_count < smallest
                        && region.can_merge_with_region(neighbour)
                        && neighbour.can_merge_with_region(region)
                    {
                        smallest = neighbour.span_count;
                        merge_id = neighbour.id;
                    }
                }

                // Found new id.
                if merge_id != region.id {
                    let old_id = region.id;
                    // Merge neighbours.
                    if merge_regions(&mut regions, merge_id.bits() as usize, i) {
                        // Fixup regions pointing to current region.
                        for other in regions.iter_mut() {
                            if other.id.is_null_or_border() {
                                continue;
                            }
                            // If another region was already merged into current region
                            // change the nid of the previous region too.
                            if other.id == old_id {
                                other.id = merge_id;
                            }
                            // Replace the current region with the new one if the
                            // current regions is neighbour.
                            other.replace_neighbour(old_id, merge_id);
                        }
                        merge_count += 1;
                    }
                }
            }
            if merge_count == 0 {
                break;
            }
        }

        // Compress region Ids.
        for region in regions.iter_mut() {
            // Skip nil and external regions.
            region.remap = !region.id.is_null_or_border();
        }

        let mut region_id_gen = 0_u16;
        for i in 0..region_count {
            if !regions[i].remap {
                continue;
            }
            let old_id = regions[i].id;
            region_id_gen += 1;
            let new_id = RegionId::from(region_id_gen);
            for region in regions[i..].iter_mut() {
                if region.id == old_id {
                    region.id = new_id;
                    region.remap = false;
                }
            }
        }
        self.max_region = RegionId::from(region_id_gen);

        // Remap regions.
        for region in src_reg.iter_mut() {
            if !region.contains(RegionId::BORDER_REGION) {
                *region = regions[region.bits() as usize].id;
            }
        }

        // Return regions that we found to be overlapping.
        regions
            .iter()
            .filter(|region| region.overlap)
            .map(|region| region.id)
            .collect()
    }

    /// `true` if the neighbour in `dir` belongs to a different region (or there is none).
    fn is_solid_edge(&self, src_reg: &[RegionId], x: u16, z: u16, i: usize, dir: u8) -> bool {
        let neighbor_region = self
            .con_index(x, z, i, dir)
            .map_or(RegionId::NONE, |ai| src_reg[ai]);
        neighbor_region != src_reg[i]
    }

    /// Walks clockwise around the region of span `i`, starting at its solid edge `dir`,
    /// and records every region met on the way.
    fn walk_region_contour(
        &self,
        mut x: u16,
        mut z: u16,
        mut i: usize,
        mut dir: u8,
        src_reg: &[RegionId],
    ) -> Vec<RegionId> {
        let start_dir = dir;
        let start_i = i;

        let mut current_region = self
            .con_index(x, z, i, dir)
            .map_or(RegionId::NONE, |ai| src_reg[ai]);
        let mut connections = vec![current_region];

        let mut iter = 0;
        loop {
            iter += 1;
            if iter >= 40_000 {
                tracing::warn!(x, z, "Region contour walk did not terminate");
                break;
            }
            if self.is_solid_edge(src_reg, x, z, i, dir) {
                // Choose the edge corner
                let region = self
                    .con_index(x, z, i, dir)
                    .map_or(RegionId::NONE, |ai| src_reg[ai]);
                if region != current_region {
                    current_region = region;
                    connections.push(current_region);
                }
                // Rotate CW
                dir = (dir + 1) & 0x3;
            } else {
                let Some((nx, nz, ni)) = self.neighbor(x, z, i, dir) else {
                    // Should not happen.
                    return connections;
                };
                x = nx;
                z = nz;
                i = ni;
                // Rotate CCW
                dir = (dir + 3) & 0x3;
            }

            if start_i == i && start_dir == dir {
                break;
            }
        }

        // Remove adjacent duplicates.
        if connections.len() > 1 {
            let mut j = 0;
            while j < connections.len() {
                let nj = (j + 1) % connections.len();
                if connections[j] == connections[nj] {
                    connections.remove(j);
                } else {
                    j += 1;
                }
            }
        }
        connections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(id: u16, span_count: usize, connections: &[u16]) -> Region {
        Region {
            span_count,
            connections: connections.iter().copied().map(RegionId::from).collect(),
            ..Region::new(RegionId::from(id))
        }
    }

    #[test]
    fn adjacent_duplicate_connections_collapse() {
        let mut region = region(1, 4, &[2, 2, 0, 3, 3, 2]);
        region.remove_adjacent_neighbours();
        // The ring wraps around, so the trailing 2 also merges with the leading one.
        assert_eq!(
            region.connections,
            vec![RegionId::from(2_u16), RegionId::from(0_u16), RegionId::from(3_u16)]
        );
    }

    #[test]
    fn regions_sharing_two_edges_cannot_merge() {
        let a = region(1, 4, &[2, 0, 2, 0]);
        let b = region(2, 4, &[1, 0]);
        assert!(!a.can_merge_with_region(&b));
        assert!(b.can_merge_with_region(&a));
    }

    #[test]
    fn stacked_regions_cannot_merge() {
        let mut a = region(1, 4, &[2, 0]);
        a.floors.push(RegionId::from(2_u16));
        let b = region(2, 4, &[1, 0]);
        assert!(!a.can_merge_with_region(&b));
    }

    #[test]
    fn merging_splices_connection_rings() {
        let mut regions = vec![
            Region::new(RegionId::NONE),
            region(1, 10, &[2, 0, 3]),
            region(2, 3, &[1, 0]),
            region(3, 5, &[1, 0]),
        ];
        assert!(merge_regions(&mut regions, 1, 2));
        assert_eq!(regions[1].span_count, 13);
        assert_eq!(regions[2].span_count, 0);
        assert_eq!(
            regions[1].connections,
            vec![RegionId::from(0_u16), RegionId::from(3_u16)]
        );
    }

    #[test]
    fn null_region_counts_as_solid_border() {
        assert!(region(1, 4, &[0, 2]).is_connected_to_border());
        assert!(!region(1, 4, &[2, 3]).is_connected_to_border());
    }
}
