//! Searches that flood outwards from a polygon.

use std::collections::VecDeque;

use glam::Vec3;

use crate::{
    filter::{PolyHandle, QueryFilter},
    math::{distance_pt_seg_sqr_2d, intersect_segment_poly_2d, overlap_poly_poly_2d},
    node_pool::NodeFlags,
    poly_id::PolyId,
    query::NavmeshQuery,
    status::{Status, StatusDetail},
};

/// The most polygons waiting to be expanded by the local searches.
pub(crate) const MAX_LOCAL_QUEUE: usize = 48;

/// A polygon reached by a flood search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisitedPoly {
    /// The polygon.
    pub poly: PolyId,
    /// The polygon it was reached from. `None` for the start polygon.
    pub parent: Option<PolyId>,
    /// The search cost to reach the polygon. Always 0 for [`NavmeshQuery::find_local_neighbourhood`].
    pub cost: f32,
}

impl NavmeshQuery<'_> {
    /// Finds the polygons touched by a circle, flooding outwards from `start_ref`.
    ///
    /// Polygons are stored in the order they were reached, cheapest first.
    /// The circle should be centered on the start polygon.
    pub fn find_polys_around_circle(
        &mut self,
        start_ref: PolyId,
        center: Vec3,
        radius: f32,
        filter: &dyn QueryFilter,
        result: &mut Vec<VisitedPoly>,
        max_result: usize,
    ) -> Status {
        result.clear();
        if !center.is_finite() || !radius.is_finite() || radius < 0.0 || max_result == 0 {
            return Status::invalid_param();
        }
        let radius_sqr = radius * radius;
        self.flood(start_ref, center, filter, result, max_result, |va, vb| {
            distance_pt_seg_sqr_2d(center, va, vb).0 <= radius_sqr
        })
    }

    /// Finds the polygons touched by a convex shape, flooding outwards from `start_ref`.
    ///
    /// Polygons are stored in the order they were reached, cheapest first.
    /// The search starts at the centroid of the shape, which should lie on the start polygon.
    pub fn find_polys_around_shape(
        &mut self,
        start_ref: PolyId,
        shape: &[Vec3],
        filter: &dyn QueryFilter,
        result: &mut Vec<VisitedPoly>,
        max_result: usize,
    ) -> Status {
        result.clear();
        if shape.len() < 3 || shape.iter().any(|v| !v.is_finite()) || max_result == 0 {
            return Status::invalid_param();
        }
        let center = shape.iter().sum::<Vec3>() / shape.len() as f32;
        self.flood(start_ref, center, filter, result, max_result, |va, vb| {
            intersect_segment_poly_2d(va, vb, shape)
                .is_some_and(|hit| hit.t_min <= 1.0 && hit.t_max >= 0.0)
        })
    }

    /// Dijkstra search from `start_ref`, expanding through the portals accepted by `touches`.
    fn flood(
        &mut self,
        start_ref: PolyId,
        center: Vec3,
        filter: &dyn QueryFilter,
        result: &mut Vec<VisitedPoly>,
        max_result: usize,
        touches: impl Fn(Vec3, Vec3) -> bool,
    ) -> Status {
        let mesh = self.mesh;
        if !mesh.is_valid_poly_ref(start_ref) {
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
            let parent_poly = parent_ref.and_then(|id| mesh.handle(id).ok());

            if result.len() < max_result {
                result.push(VisitedPoly {
                    poly: best_node.id,
                    parent: parent_ref,
                    cost: best_node.total,
                });
            } else {
                status |= StatusDetail::BUFFER_TOO_SMALL;
            }

            for link in &best_poly.poly.links {
                let neighbour_ref = link.target;
                if neighbour_ref.is_null() || Some(neighbour_ref) == parent_ref {
                    continue;
                }
                let Ok(neighbour_poly) = mesh.handle(neighbour_ref) else {
                    continue;
                };
                if !filter.pass_filter(neighbour_ref, neighbour_poly.tile, neighbour_poly.poly) {
                    continue;
                }
                let Ok((va, vb)) = mesh.portal_points(best_poly, neighbour_poly) else {
                    continue;
                };
                if !touches(va, vb) {
                    continue;
                }

                let Some(neighbour) = self.node_pool.get_node(neighbour_ref, 0) else {
                    status |= StatusDetail::OUT_OF_NODES;
                    continue;
                };
                let node = self.node_pool.node_mut(neighbour);
                if node.flags.contains(NodeFlags::CLOSED) {
                    continue;
                }
                if node.flags.is_empty() {
                    node.pos = va.lerp(vb, 0.5);
                }

                let cost = filter.cost(
                    best_node.pos,
                    node.pos,
                    parent_poly,
                    best_poly,
                    Some(neighbour_poly),
                );
                let total = best_node.total + cost;
                if node.flags.contains(NodeFlags::OPEN) && total >= node.total {
                    continue;
                }
                node.id = neighbour_ref;
                node.parent = best;
                node.total = total;
                node.flags.insert(NodeFlags::OPEN);
                self.open_list.push(neighbour, total);
            }
        }
        status
    }

    /// Finds the non-overlapping polygons around `center` within `radius`, flooding outwards from `start_ref`.
    ///
    /// Polygons overlapping an already accepted polygon on the xz-plane are rejected, so
    /// ground reachable along diverging routes, e.g. over and under a bridge, is only returned once.
    /// The search is small and local, it only uses a few nodes.
    pub fn find_local_neighbourhood(
        &mut self,
        start_ref: PolyId,
        center: Vec3,
        radius: f32,
        filter: &dyn QueryFilter,
        result: &mut Vec<VisitedPoly>,
        max_result: usize,
    ) -> Status {
        result.clear();
        let mesh = self.mesh;
        if !mesh.is_valid_poly_ref(start_ref)
            || !center.is_finite()
            || !radius.is_finite()
            || radius < 0.0
            || max_result == 0
        {
            return Status::invalid_param();
        }

        self.tiny_node_pool.clear();
        let Some(start) = self.tiny_node_pool.get_node(start_ref, 0) else {
            return Status::FAILURE | StatusDetail::OUT_OF_NODES;
        };
        self.tiny_node_pool.node_mut(start).flags = NodeFlags::CLOSED;
        let mut queue = VecDeque::with_capacity(MAX_LOCAL_QUEUE);
        queue.push_back(start);

        let radius_sqr = radius * radius;
        let mut status = Status::SUCCESS;
        let store = |visited: VisitedPoly, result: &mut Vec<VisitedPoly>, status: &mut Status| {
            if result.len() < max_result {
                result.push(visited);
            } else {
                *status |= StatusDetail::BUFFER_TOO_SMALL;
            }
        };
        store(
            VisitedPoly {
                poly: start_ref,
                parent: None,
                cost: 0.0,
            },
            result,
            &mut status,
        );

        while let Some(current) = queue.pop_front() {
            let current_ref = self.tiny_node_pool.node(current).id;
            let Ok(current_poly) = mesh.handle(current_ref) else {
                continue;
            };

            for link in &current_poly.poly.links {
                let neighbour_ref = link.target;
                if neighbour_ref.is_null() {
                    continue;
                }
                let Some(neighbour) = self.tiny_node_pool.get_node(neighbour_ref, 0) else {
                    continue;
                };
                if self.tiny_node_pool.node(neighbour).flags.contains(NodeFlags::CLOSED) {
                    continue;
                }
                let Ok(neighbour_poly) = mesh.handle(neighbour_ref) else {
                    continue;
                };
                if neighbour_poly.poly.is_off_mesh_connection() {
                    continue;
                }
                if !filter.pass_filter(neighbour_ref, neighbour_poly.tile, neighbour_poly.poly) {
                    continue;
                }
                let Ok((va, vb)) = mesh.portal_points(current_poly, neighbour_poly) else {
                    continue;
                };
                if distance_pt_seg_sqr_2d(center, va, vb).0 > radius_sqr {
                    continue;
                }

                // Visited even if rejected below, so it is not tested again.
                let node = self.tiny_node_pool.node_mut(neighbour);
                node.flags.insert(NodeFlags::CLOSED);
                node.parent = current;

                if overlaps_accepted(mesh, current_poly, neighbour_poly, result) {
                    continue;
                }

                store(
                    VisitedPoly {
                        poly: neighbour_ref,
                        parent: Some(current_ref),
                        cost: 0.0,
                    },
                    result,
                    &mut status,
                );
                if queue.len() < MAX_LOCAL_QUEUE {
                    queue.push_back(neighbour);
                }
            }
        }
        status
    }
}

/// Checks whether `candidate` overlaps any accepted polygon not linked to `current`.
fn overlaps_accepted(
    mesh: &crate::TiledMesh,
    current: PolyHandle,
    candidate: PolyHandle,
    accepted: &[VisitedPoly],
) -> bool {
    let candidate_vertices = candidate.tile.poly_vertices(candidate.poly);
    accepted.iter().any(|past| {
        // Connected polygons don't overlap.
        if current.poly.links.iter().any(|link| link.target == past.poly) {
            return false;
        }
        let Ok(past_poly) = mesh.handle(past.poly) else {
            return false;
        };
        let past_vertices = past_poly.tile.poly_vertices(past_poly.poly);
        overlap_poly_poly_2d(&candidate_vertices, &past_vertices)
    })
}
