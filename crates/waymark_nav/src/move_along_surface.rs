use std::collections::VecDeque;

use glam::Vec3;

use crate::{
    filter::QueryFilter,
    flood::MAX_LOCAL_QUEUE,
    math::{distance_pt_seg_sqr_2d, point_in_polygon},
    node_pool::NodeFlags,
    poly_id::PolyId,
    query::NavmeshQuery,
    status::{Status, StatusDetail},
    tile::EXT_LINK,
};

/// Neighbours considered per edge.
const MAX_EDGE_NEIGHBOURS: usize = 8;

impl NavmeshQuery<'_> {
    /// Moves from `start` towards `end`, constrained to the surface of the mesh.
    ///
    /// The movement slides along walls instead of stopping at them. It is only meant for
    /// small distances, as the search covers a circle around the two points using a
    /// few nodes. `result` receives the reached position, its height is not
    /// adjusted to the detail mesh. `visited` receives the polygons from `start_ref` to
    /// the polygon containing `result`, at most `max_visited` of them.
    pub fn move_along_surface(
        &mut self,
        start_ref: PolyId,
        start: Vec3,
        end: Vec3,
        filter: &dyn QueryFilter,
        result: &mut Vec3,
        visited: &mut Vec<PolyId>,
        max_visited: usize,
    ) -> Status {
        visited.clear();
        let mesh = self.mesh;
        if !mesh.is_valid_poly_ref(start_ref)
            || !start.is_finite()
            || !end.is_finite()
            || max_visited == 0
        {
            return Status::invalid_param();
        }

        self.tiny_node_pool.clear();
        let Some(start_node) = self.tiny_node_pool.get_node(start_ref, 0) else {
            return Status::FAILURE | StatusDetail::OUT_OF_NODES;
        };
        self.tiny_node_pool.node_mut(start_node).flags = NodeFlags::CLOSED;
        let mut queue = VecDeque::with_capacity(MAX_LOCAL_QUEUE);
        queue.push_back(start_node);

        let mut best_pos = start;
        let mut best_distance = f32::MAX;
        let mut best_node = None;

        // Only polygons touching the circle spanned by the move are searched.
        let search_pos = start.lerp(end, 0.5);
        let search_radius_sqr = (start.distance(end) / 2.0 + 0.001).powi(2);

        let layout = *mesh.layout();
        let mut neighbours = Vec::with_capacity(MAX_EDGE_NEIGHBOURS);
        while let Some(current) = queue.pop_front() {
            let current_ref = self.tiny_node_pool.node(current).id;
            let Ok(current_poly) = mesh.handle(current_ref) else {
                continue;
            };
            let tile = current_poly.tile;
            let poly = current_poly.poly;
            let vertices = tile.poly_vertices(poly);

            if point_in_polygon(end, &vertices) {
                best_node = Some(current);
                best_pos = end;
                break;
            }

            let nv = vertices.len();
            for i in 0..nv {
                let j = (i + nv - 1) % nv;

                neighbours.clear();
                let code = poly.neighbors[j];
                if code & EXT_LINK != 0 {
                    for link in poly.links.iter().filter(|link| link.edge as usize == j) {
                        let Ok(neighbour) = mesh.handle(link.target) else {
                            continue;
                        };
                        if filter.pass_filter(link.target, neighbour.tile, neighbour.poly)
                            && neighbours.len() < MAX_EDGE_NEIGHBOURS
                        {
                            neighbours.push(link.target);
                        }
                    }
                } else if code != 0 {
                    let index = (code - 1) as usize;
                    let neighbour_ref =
                        layout.encode(layout.salt(current_ref), layout.tile(current_ref), index as u32);
                    if filter.pass_filter(neighbour_ref, tile, &tile.polygons[index]) {
                        neighbours.push(neighbour_ref);
                    }
                }

                let vj = vertices[j];
                let vi = vertices[i];
                if neighbours.is_empty() {
                    // Wall edge, slide along it.
                    let (distance_sqr, t) = distance_pt_seg_sqr_2d(end, vj, vi);
                    if distance_sqr < best_distance {
                        best_pos = vj.lerp(vi, t);
                        best_distance = distance_sqr;
                        best_node = Some(current);
                    }
                    continue;
                }

                for &neighbour_ref in &neighbours {
                    let Some(neighbour) = self.tiny_node_pool.get_node(neighbour_ref, 0) else {
                        continue;
                    };
                    if self.tiny_node_pool.node(neighbour).flags.contains(NodeFlags::CLOSED) {
                        continue;
                    }
                    if distance_pt_seg_sqr_2d(search_pos, vj, vi).0 > search_radius_sqr {
                        continue;
                    }
                    if queue.len() < MAX_LOCAL_QUEUE {
                        let node = self.tiny_node_pool.node_mut(neighbour);
                        node.parent = current;
                        node.flags.insert(NodeFlags::CLOSED);
                        queue.push_back(neighbour);
                    }
                }
            }
        }

        let mut status = Status::SUCCESS;
        if let Some(best) = best_node {
            let mut chain = vec![best];
            let mut node = best;
            while let Some(parent) = self.tiny_node_pool.parent(node) {
                chain.push(parent);
                node = parent;
            }
            for &node in chain.iter().rev() {
                if visited.len() >= max_visited {
                    status |= StatusDetail::BUFFER_TOO_SMALL;
                    break;
                }
                visited.push(self.tiny_node_pool.node(node).id);
            }
        }

        *result = best_pos;
        status
    }
}
