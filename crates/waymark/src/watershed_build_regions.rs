use thiserror::Error;

use crate::{CompactHeightfield, RegionId};

impl CompactHeightfield {
    /// Non-null regions will consist of connected, non-overlapping walkable spans that form a single contour.
    /// Contours will form simple polygons.
    ///
    /// If multiple regions form an area that is smaller than `min_region_area`, then all spans will be
    /// re-assigned to [`RegionId::NONE`].
    ///
    /// Watershed partitioning can result in smaller than necessary regions, especially in diagonal corridors.
    /// `merge_region_area` helps reduce unnecessarily small regions.
    ///
    /// The region data will be available via the [`CompactHeightfield::max_region`]
    /// and [`CompactSpan::region`](crate::CompactSpan::region) fields.
    ///
    /// The distance field must be created using [`CompactHeightfield::build_distance_field`] before attempting to build regions.
    ///
    /// # Arguments
    ///
    /// - `border_size`: The size of the non-navigable border around the heightfield. [Limit: >=0] [Units: vx]
    /// - `min_region_area`: The minimum number of cells allowed to form isolated island areas. [Limit: >=0] [Units: vx]
    /// - `merge_region_area`: Any regions with a span count smaller than this value will, if possible,
    ///   be merged with larger regions. [Limit: >=0] [Units: vx]
    pub fn build_regions(
        &mut self,
        border_size: u16,
        min_region_area: u16,
        merge_region_area: u16,
    ) -> Result<(), RegionBuildError> {
        const LOG_NB_STACKS: usize = 3;
        const NB_STACKS: usize = 1 << LOG_NB_STACKS;
        let mut level_stacks: [Vec<LevelStackEntry>; NB_STACKS] = [const { Vec::new() }; NB_STACKS];
        for stack in &mut level_stacks {
            stack.reserve(256);
        }

        let mut stack: Vec<LevelStackEntry> = Vec::with_capacity(256);

        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let mut src_dist = vec![0_u16; self.spans.len()];

        let mut region_id: u16 = 1;
        let mut level = (self.max_distance + 1) & !1;

        // expand_iters defines how much the watershed "overflows" and simplifies the regions.
        let expand_iters = 8;

        if border_size > 0 {
            // Make sure border will not overflow.
            let border_width = border_size.min(self.width);
            let border_height = border_size.min(self.height);

            // Paint regions
            let rects = [
                (0, border_width, 0, self.height),
                (self.width - border_width, self.width, 0, self.height),
                (0, self.width, 0, border_height),
                (0, self.width, self.height - border_height, self.height),
            ];
            for (min_x, max_x, min_z, max_z) in rects {
                self.paint_rect_region(
                    min_x,
                    max_x,
                    min_z,
                    max_z,
                    RegionId::from(region_id) | RegionId::BORDER_REGION,
                    &mut src_reg,
                );
                region_id += 1;
            }
        }
        self.border_size = border_size;

        let mut s_id = -1_i32;
        while level > 0 {
            level = level.saturating_sub(2);
            s_id = (s_id + 1) & (NB_STACKS as i32 - 1);
            let current = s_id as usize;

            if current == 0 {
                self.sort_cells_by_level(level, &src_reg, &mut level_stacks, 1);
            } else {
                // copy left overs from last level
                let (src, dst) = level_stacks.split_at_mut(current);
                append_stacks(&src[current - 1], &mut dst[0], &src_reg);
            }

            self.expand_regions(
                expand_iters,
                level,
                &mut src_reg,
                &mut src_dist,
                &mut level_stacks[current],
                false,
            );

            // Mark new regions with IDs.
            for j in 0..level_stacks[current].len() {
                let entry = level_stacks[current][j].clone();
                let Some(i) = entry.index else {
                    continue;
                };
                if src_reg[i] != RegionId::NONE {
                    continue;
                }
                if self.flood_region(
                    entry,
                    level,
                    RegionId::from(region_id),
                    &mut src_reg,
                    &mut src_dist,
                    &mut stack,
                ) {
                    if region_id >= RegionId::MAX.bits() {
                        return Err(RegionBuildError::RegionIdOverflow);
                    }
                    region_id += 1;
                }
            }
        }

        // Expand current regions until no empty connected cells found.
        self.expand_regions(
            expand_iters * 8,
            0,
            &mut src_reg,
            &mut src_dist,
            &mut stack,
            true,
        );

        // Merge regions and filter out small regions.
        let overlaps = self.merge_and_filter_regions(
            min_region_area,
            merge_region_area,
            region_id,
            &mut src_reg,
        );
        // If overlapping regions were found during merging, split those regions.
        if !overlaps.is_empty() {
            tracing::warn!(
                count = overlaps.len(),
                "Building regions produced overlapping regions"
            );
        }

        // Write the result out.
        for (span, region) in self.spans.iter_mut().zip(src_reg) {
            span.region = region;
        }
        tracing::debug!(max_region = self.max_region.bits(), "built regions");
        Ok(())
    }

    fn paint_rect_region(
        &self,
        min_x: u16,
        max_x: u16,
        min_z: u16,
        max_z: u16,
        region: RegionId,
        src_reg: &mut [RegionId],
    ) {
        for z in min_z..max_z {
            for x in min_x..max_x {
                for i in self.cell_at(x, z).index_range() {
                    if self.areas[i].is_walkable() {
                        src_reg[i] = region;
                    }
                }
            }
        }
    }

    /// Distributes the unassigned spans between the level stacks, the first stack gets the spans
    /// at `start_level`, each following stack the spans `2^log_levels_per_stack` levels lower.
    fn sort_cells_by_level(
        &self,
        start_level: u16,
        src_reg: &[RegionId],
        stacks: &mut [Vec<LevelStackEntry>],
        log_levels_per_stack: u16,
    ) {
        let start_level = start_level >> log_levels_per_stack;
        for stack in stacks.iter_mut() {
            stack.clear();
        }

        // put all cells in the level range into the appropriate stacks
        for (x, z, span_range) in self.iter_columns() {
            for i in span_range {
                if !self.areas[i].is_walkable() || src_reg[i] != RegionId::NONE {
                    continue;
                }
                let level = self.dist[i] >> log_levels_per_stack;
                // Spans above the start level go into the first stack.
                let s_id = start_level.saturating_sub(level) as usize;
                if s_id >= stacks.len() {
                    continue;
                }
                stacks[s_id].push(LevelStackEntry {
                    x,
                    z,
                    index: Some(i),
                });
            }
        }
    }

    fn expand_regions(
        &self,
        max_iter: u16,
        level: u16,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
        fill_stack: bool,
    ) {
        if fill_stack {
            // Find cells revealed by the raised level.
            stack.clear();
            for (x, z, span_range) in self.iter_columns() {
                for i in span_range {
                    if self.dist[i] >= level
                        && src_reg[i] == RegionId::NONE
                        && self.areas[i].is_walkable()
                    {
                        stack.push(LevelStackEntry {
                            x,
                            z,
                            index: Some(i),
                        });
                    }
                }
            }
        } else {
            // use cells in the input stack
            // mark all cells which already have a region
            for entry in stack.iter_mut() {
                if entry.index.is_some_and(|i| src_reg[i] != RegionId::NONE) {
                    entry.index = None;
                }
            }
        }

        let mut dirty_entries = Vec::new();
        let mut iter = 0;
        while !stack.is_empty() {
            let mut failed = 0;
            dirty_entries.clear();

            for entry in stack.iter_mut() {
                let Some(i) = entry.index else {
                    failed += 1;
                    continue;
                };

                let mut region = src_reg[i];
                let mut distance = u16::MAX as i32;
                let area = self.areas[i];
                for dir in 0..4 {
                    let Some(a_index) = self.con_index(entry.x, entry.z, i, dir) else {
                        continue;
                    };
                    if self.areas[a_index] != area {
                        continue;
                    }
                    let a_region = src_reg[a_index];
                    let a_dist = src_dist[a_index] as i32 + 2;
                    if !a_region.is_null_or_border() && a_dist < distance {
                        region = a_region;
                        distance = a_dist;
                    }
                }
                if region != RegionId::NONE {
                    // Mark as used
                    entry.index = None;
                    dirty_entries.push(DirtyEntry {
                        index: i,
                        region,
                        distance: distance.min(u16::MAX as i32) as u16,
                    });
                } else {
                    failed += 1;
                }
            }
            // Copy entries that differ between src and dst to keep them in sync.
            for dirty_entry in &dirty_entries {
                src_reg[dirty_entry.index] = dirty_entry.region;
                src_dist[dirty_entry.index] = dirty_entry.distance;
            }

            if failed == stack.len() {
                break;
            }

            if level > 0 {
                iter += 1;
                if iter >= max_iter {
                    break;
                }
            }
        }
    }

    /// Floods a new region from `entry` across spans at or above `level - 2`.
    /// The flood stops at spans bordering a different region, so basins do not bleed into each other.
    ///
    /// Returns `true` if at least one span was claimed.
    fn flood_region(
        &self,
        entry: LevelStackEntry,
        level: u16,
        region: RegionId,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
    ) -> bool {
        let Some(start) = entry.index else {
            return false;
        };
        let area = self.areas[start];

        // Flood fill mark region.
        stack.clear();
        stack.push(entry);
        src_reg[start] = region;
        src_dist[start] = 0;

        let lev = level.saturating_sub(2);
        let mut count = 0;

        while let Some(LevelStackEntry { x, z, index }) = stack.pop() {
            let Some(ci) = index else {
                continue;
            };

            // Check if any of the neighbours already have a valid region set.
            let mut neighbor_region = RegionId::NONE;
            for dir in 0..4 {
                // 8 connected
                let Some((ax, az, ai)) = self.neighbor(x, z, ci, dir) else {
                    continue;
                };
                if self.areas[ai] != area {
                    continue;
                }
                let nr = src_reg[ai];
                // Do not take borders into account.
                if nr.contains(RegionId::BORDER_REGION) {
                    continue;
                }
                if nr != RegionId::NONE && nr != region {
                    neighbor_region = nr;
                    break;
                }

                let dir2 = (dir + 1) & 0x3;
                let Some(ai2) = self.con_index(ax, az, ai, dir2) else {
                    continue;
                };
                if self.areas[ai2] != area {
                    continue;
                }
                let nr2 = src_reg[ai2];
                if nr2 != RegionId::NONE && nr2 != region {
                    neighbor_region = nr2;
                    break;
                }
            }
            if neighbor_region != RegionId::NONE {
                src_reg[ci] = RegionId::NONE;
                continue;
            }

            count += 1;

            // Expand neighbours.
            for dir in 0..4 {
                let Some((ax, az, ai)) = self.neighbor(x, z, ci, dir) else {
                    continue;
                };
                if self.areas[ai] != area {
                    continue;
                }
                if self.dist[ai] >= lev && src_reg[ai] == RegionId::NONE {
                    src_reg[ai] = region;
                    src_dist[ai] = 0;
                    stack.push(LevelStackEntry {
                        x: ax,
                        z: az,
                        index: Some(ai),
                    });
                }
            }
        }

        count > 0
    }
}

fn append_stacks(
    src_stack: &[LevelStackEntry],
    dst_stack: &mut Vec<LevelStackEntry>,
    src_region: &[RegionId],
) {
    for entry in src_stack {
        let Some(i) = entry.index else {
            continue;
        };
        if src_region[i] != RegionId::NONE {
            continue;
        }
        dst_stack.push(entry.clone());
    }
}

#[derive(Clone, Debug)]
struct LevelStackEntry {
    x: u16,
    z: u16,
    /// `None` once the span was assigned a region
    index: Option<usize>,
}

#[derive(Clone, Debug)]
struct DirtyEntry {
    index: usize,
    region: RegionId,
    distance: u16,
}

/// Errors that can occur when building regions with [`CompactHeightfield::build_regions`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegionBuildError {
    /// More regions were flooded than fit next to the border flag.
    #[error("Region ID overflow: more than {max} regions", max = RegionId::MAX.bits())]
    RegionIdOverflow,
}

#[cfg(test)]
mod tests {
    use crate::{AreaType, test_utils::flat_compact_heightfield};

    use super::*;

    fn regions(compact: &CompactHeightfield) -> Vec<RegionId> {
        compact.spans.iter().map(|span| span.region).collect()
    }

    #[test]
    fn flat_square_is_a_single_region() {
        let mut compact = flat_compact_heightfield(12);
        compact.build_distance_field();
        compact.build_regions(0, 8, 20).unwrap();
        assert_eq!(compact.max_region, RegionId::from(1_u16));
        assert!(regions(&compact).iter().all(|r| *r == RegionId::from(1_u16)));
    }

    #[test]
    fn separated_islands_get_their_own_regions() {
        let mut compact = flat_compact_heightfield(12);
        // Cut the square in two with an unwalkable strip.
        for z in 0..12 {
            let i = compact.cell_at(6, z).index() as usize;
            compact.areas[i] = AreaType::NOT_WALKABLE;
        }
        compact.build_distance_field();
        compact.build_regions(0, 4, 0).unwrap();
        assert_eq!(compact.max_region, RegionId::from(2_u16));
        let left = compact.spans[compact.cell_at(2, 2).index() as usize].region;
        let right = compact.spans[compact.cell_at(9, 2).index() as usize].region;
        assert_ne!(left, right);
        assert!(!left.is_null_or_border());
        assert!(!right.is_null_or_border());
        let strip = compact.spans[compact.cell_at(6, 2).index() as usize].region;
        assert_eq!(strip, RegionId::NONE);
    }

    #[test]
    fn too_small_islands_are_removed() {
        let mut compact = flat_compact_heightfield(12);
        for z in 0..12 {
            let i = compact.cell_at(2, z).index() as usize;
            compact.areas[i] = AreaType::NOT_WALKABLE;
        }
        compact.build_distance_field();
        // The strip left of the cut has 24 spans, the rest 108.
        compact.build_regions(0, 30, 0).unwrap();
        assert_eq!(compact.max_region, RegionId::from(1_u16));
        let small = compact.spans[compact.cell_at(0, 5).index() as usize].region;
        assert_eq!(small, RegionId::NONE);
        let large = compact.spans[compact.cell_at(7, 5).index() as usize].region;
        assert_eq!(large, RegionId::from(1_u16));
    }

    #[test]
    fn border_regions_are_painted_and_kept() {
        let mut compact = flat_compact_heightfield(16);
        compact.build_distance_field();
        compact.build_regions(2, 8, 20).unwrap();
        assert_eq!(compact.border_size, 2);
        for (x, z, range) in compact.iter_columns() {
            let in_border = x < 2 || z < 2 || x >= 14 || z >= 14;
            for i in range {
                let region = compact.spans[i].region;
                assert_eq!(
                    region.contains(RegionId::BORDER_REGION),
                    in_border,
                    "({x}, {z})"
                );
                if !in_border {
                    assert_eq!(region, RegionId::from(1_u16));
                }
            }
        }
        assert_eq!(compact.max_region, RegionId::from(1_u16));
    }

    #[test]
    fn region_ids_are_dense() {
        let mut compact = flat_compact_heightfield(20);
        for x in 0..20 {
            for z in [6, 13] {
                let i = compact.cell_at(x, z).index() as usize;
                compact.areas[i] = AreaType::NOT_WALKABLE;
            }
        }
        compact.build_distance_field();
        compact.build_regions(0, 0, 0).unwrap();
        let max = compact.max_region.bits();
        assert!(max >= 3);
        for id in 1..=max {
            assert!(
                regions(&compact).contains(&RegionId::from(id)),
                "region {id} is missing"
            );
        }
        assert!(regions(&compact).iter().all(|r| r.bits() <= max));
    }
}
