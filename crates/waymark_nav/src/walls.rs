use glam::Vec3;

use crate::{
    filter::QueryFilter,
    math::distance_pt_seg_sqr_2d,
    node_pool::NodeFlags,
    poly_id::PolyId,
    query::NavmeshQuery,
    status::{Status, StatusDetail},
    tile::{EXT_LINK, NavmeshTileData, Poly},
    tiled_mesh::TiledMesh,
};

/// The most portal intervals tracked along one tile border edge.
const MAX_INTERVALS: usize = 16;

/// The result of [`NavmeshQuery::find_distance_to_wall`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WallHit {
    /// The distance to the nearest wall, or the search radius if none is closer.
    pub distance: f32,
    /// The nearest point on a wall. The search center if no wall was found.
    pub position: Vec3,
    /// Points from the wall towards the search center.
    pub normal: Vec3,
}

/// An edge segment of a polygon, see [`NavmeshQuery::get_poly_wall_segments`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallSegment {
    /// The start of the segment.
    pub start: Vec3,
    /// The end of the segment.
    pub end: Vec3,
    /// The polygon on the other side, `None` for walls.
    pub neighbour: Option<PolyId>,
}

#[derive(Debug, Clone, Copy)]
struct SegmentInterval {
    neighbour: Option<PolyId>,
    tmin: i16,
    tmax: i16,
}

/// Inserts an interval, keeping the list sorted. Silently drops intervals once full.
fn insert_interval(intervals: &mut Vec<SegmentInterval>, tmin: i16, tmax: i16, neighbour: Option<PolyId>) {
    if intervals.len() + 1 > MAX_INTERVALS {
        return;
    }
    let index = intervals
        .iter()
        .position(|interval| tmax <= interval.tmin)
        .unwrap_or(intervals.len());
    intervals.insert(
        index,
        SegmentInterval {
            neighbour,
            tmin,
            tmax,
        },
    );
}

impl NavmeshQuery<'_> {
    /// Finds the distance from `center` to the nearest wall, searching outwards from
    /// `start_ref` up to `max_radius`.
    ///
    /// Walls are edges without a neighbour passing the filter.
    pub fn find_distance_to_wall(
        &mut self,
        start_ref: PolyId,
        center: Vec3,
        max_radius: f32,
        filter: &dyn QueryFilter,
        hit: &mut WallHit,
    ) -> Status {
        let mesh = self.mesh;
        if !mesh.is_valid_poly_ref(start_ref) || !center.is_finite() || !max_radius.is_finite() || max_radius < 0.0 {
            return Status::invalid_param();
        }

        self.node_pool.clear();
        self.open_list.clear();
        let Some(start) = self.node_pool.get_node(start_ref, 0) else {
            return Status::FAILURE | StatusDetail::OUT_OF_NODES;
        };
        let node = self.node_pool.node_mut(start);
        node.pos = center;
        node.flags = NodeFlags::OPEN;
        self.open_list.push(start, 0.0);

        let mut radius_sqr = max_radius * max_radius;
        let mut hit_pos = center;
        let mut status = Status::SUCCESS;

        while let Some(best) = self.open_list.pop(&self.node_pool) {
            let best_node = {
                let node = self.node_pool.node_mut(best);
                node.flags.remove(NodeFlags::OPEN);
                node.flags.insert(NodeFlags::CLOSED);
                *node
            };
            let Ok(best_poly) = mesh.handle(best_node.id) else {
                continue;
            };
            let parent_ref = self
                .node_pool
                .parent(best)
                .map(|parent| self.node_pool.node(parent).id);

            // Hit test the walls.
            let tile = best_poly.tile;
            let poly = best_poly.poly;
            let nv = poly.vertex_count as usize;
            for i in 0..nv {
                let j = (i + nv - 1) % nv;
                if !is_wall_edge(mesh, best_node.id, tile, poly, j, filter) {
                    continue;
                }
                let vj = tile.vertices[poly.vertices[j] as usize];
                let vi = tile.vertices[poly.vertices[i] as usize];
                let (distance_sqr, t) = distance_pt_seg_sqr_2d(center, vj, vi);
                if distance_sqr > radius_sqr {
                    continue;
                }
                radius_sqr = distance_sqr;
                hit_pos = vj.lerp(vi, t);
            }

            for link in &poly.links {
                let neighbour_ref = link.target;
                // Don't follow back to the parent.
                if neighbour_ref.is_null() || Some(neighbour_ref) == parent_ref {
                    continue;
                }
                let Ok(neighbour_poly) = mesh.handle(neighbour_ref) else {
                    continue;
                };
                if neighbour_poly.poly.is_off_mesh_connection() {
                    continue;
                }

                // Skip neighbours outside the current search circle.
                let va = tile.vertices[poly.vertices[link.edge as usize] as usize];
                let vb = tile.vertices[poly.vertices[(link.edge as usize + 1) % nv] as usize];
                let (distance_sqr, _) = distance_pt_seg_sqr_2d(center, va, vb);
                if distance_sqr > radius_sqr {
                    continue;
                }
                if !filter.pass_filter(neighbour_ref, neighbour_poly.tile, neighbour_poly.poly) {
                    continue;
                }

                let Some(neighbour) = self.node_pool.get_node(neighbour_ref, 0) else {
                    status |= StatusDetail::OUT_OF_NODES;
                    continue;
                };
                if self.node_pool.node(neighbour).flags.contains(NodeFlags::CLOSED) {
                    continue;
                }
                if self.node_pool.node(neighbour).flags.is_empty() {
                    if let Ok(mid) = mesh.edge_mid_point(best_poly, neighbour_poly) {
                        self.node_pool.node_mut(neighbour).pos = mid;
                    }
                }

                let node = self.node_pool.node_mut(neighbour);
                let total = best_node.total + best_node.pos.distance(node.pos);
                if node.flags.contains(NodeFlags::OPEN) && total >= node.total {
                    continue;
                }
                node.id = neighbour_ref;
                node.flags.remove(NodeFlags::CLOSED);
                node.parent = best;
                node.total = total;
                node.flags.insert(NodeFlags::OPEN);
                self.open_list.push(neighbour, total);
            }
        }

        hit.distance = radius_sqr.sqrt();
        hit.position = hit_pos;
        hit.normal = (center - hit_pos).normalize_or_zero();
        status
    }

    /// Collects the edge segments of a polygon.
    ///
    /// Walls are always collected. With `store_portals`, the segments leading to neighbours
    /// passing the filter are collected too. Tile border edges are split where links
    /// to neighbouring tiles start and end. At most `max_segments` are stored.
    pub fn get_poly_wall_segments(
        &self,
        id: PolyId,
        filter: &dyn QueryFilter,
        segments: &mut Vec<WallSegment>,
        max_segments: usize,
        store_portals: bool,
    ) -> Status {
        segments.clear();
        if max_segments == 0 {
            return Status::invalid_param();
        }
        let Ok((tile, poly)) = self.mesh.tile_and_poly_by_ref(id) else {
            return Status::invalid_param();
        };

        let mut status = Status::SUCCESS;
        let mut push = |segment: WallSegment, status: &mut Status| {
            if segments.len() < max_segments {
                segments.push(segment);
            } else {
                *status |= StatusDetail::BUFFER_TOO_SMALL;
            }
        };

        let mut intervals = Vec::with_capacity(MAX_INTERVALS);
        let nv = poly.vertex_count as usize;
        for i in 0..nv {
            let j = (i + nv - 1) % nv;
            let vj = tile.vertices[poly.vertices[j] as usize];
            let vi = tile.vertices[poly.vertices[i] as usize];
            let neighbor = poly.neighbors[j];

            if neighbor & EXT_LINK == 0 {
                // Internal edge.
                let mut neighbour_ref = None;
                if neighbor != 0 {
                    let index = (neighbor - 1) as usize;
                    let candidate = self
                        .mesh
                        .layout()
                        .encode(self.mesh.layout().salt(id), self.mesh.layout().tile(id), index as u32);
                    if filter.pass_filter(candidate, tile, &tile.polygons[index]) {
                        neighbour_ref = Some(candidate);
                    }
                }
                // Leads to another polygon, but portals are not wanted.
                if neighbour_ref.is_some() && !store_portals {
                    continue;
                }
                push(
                    WallSegment {
                        start: vj,
                        end: vi,
                        neighbour: neighbour_ref,
                    },
                    &mut status,
                );
                continue;
            }

            // Tile border, split the edge into linked and unlinked parts.
            intervals.clear();
            for link in poly.links.iter().filter(|link| link.edge as usize == j) {
                if link.target.is_null() {
                    continue;
                }
                let Ok(neighbour) = self.mesh.handle(link.target) else {
                    continue;
                };
                if filter.pass_filter(link.target, neighbour.tile, neighbour.poly) {
                    insert_interval(&mut intervals, link.bmin as i16, link.bmax as i16, Some(link.target));
                }
            }
            // Sentinels.
            insert_interval(&mut intervals, -1, 0, None);
            insert_interval(&mut intervals, 255, 256, None);

            for k in 1..intervals.len() {
                let interval = intervals[k];
                if store_portals && interval.neighbour.is_some() {
                    let tmin = interval.tmin as f32 / 255.0;
                    let tmax = interval.tmax as f32 / 255.0;
                    push(
                        WallSegment {
                            start: vj.lerp(vi, tmin),
                            end: vj.lerp(vi, tmax),
                            neighbour: interval.neighbour,
                        },
                        &mut status,
                    );
                }

                // The wall between the previous interval and this one.
                let imin = intervals[k - 1].tmax;
                let imax = interval.tmin;
                if imin != imax {
                    let tmin = imin as f32 / 255.0;
                    let tmax = imax as f32 / 255.0;
                    push(
                        WallSegment {
                            start: vj.lerp(vi, tmin),
                            end: vj.lerp(vi, tmax),
                            neighbour: None,
                        },
                        &mut status,
                    );
                }
            }
        }
        status
    }
}

/// Returns `true` if edge `edge` of `poly` has no neighbour passing the filter.
fn is_wall_edge(
    mesh: &TiledMesh,
    id: PolyId,
    tile: &NavmeshTileData,
    poly: &Poly,
    edge: usize,
    filter: &dyn QueryFilter,
) -> bool {
    let neighbor = poly.neighbors[edge];
    if neighbor & EXT_LINK != 0 {
        // Tile border, the first link on the edge decides.
        let Some(link) = poly.links.iter().find(|link| link.edge as usize == edge) else {
            return true;
        };
        return match mesh.handle(link.target) {
            Ok(neighbour) => !filter.pass_filter(link.target, neighbour.tile, neighbour.poly),
            Err(_) => true,
        };
    }
    if neighbor == 0 {
        return true;
    }
    let index = (neighbor - 1) as usize;
    let layout = mesh.layout();
    let neighbour_ref = layout.encode(layout.salt(id), layout.tile(id), index as u32);
    !filter.pass_filter(neighbour_ref, tile, &tile.polygons[index])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intervals_stay_sorted() {
        let mut intervals = Vec::new();
        insert_interval(&mut intervals, 100, 200, Some(PolyId::from_bits(1)));
        insert_interval(&mut intervals, -1, 0, None);
        insert_interval(&mut intervals, 255, 256, None);
        insert_interval(&mut intervals, 10, 50, Some(PolyId::from_bits(2)));
        let bounds: Vec<(i16, i16)> = intervals.iter().map(|i| (i.tmin, i.tmax)).collect();
        assert_eq!(bounds, vec![(-1, 0), (10, 50), (100, 200), (255, 256)]);
    }
}
