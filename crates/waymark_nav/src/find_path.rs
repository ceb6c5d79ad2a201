//! A* search over the polygon graph, in one go or spread over several calls.

use bitflags::bitflags;
use glam::Vec3;
use tracing::trace;

use crate::{
    filter::QueryFilter,
    node_pool::{NodeFlags, NodeIndex},
    poly_id::PolyId,
    query::NavmeshQuery,
    raycast::{RaycastHit, RaycastOptions},
    status::{Outcome, Status, StatusDetail},
    tile::NO_SIDE,
};

/// Scales the heuristic slightly below the true distance.
pub const H_SCALE: f32 = 0.999;

bitflags! {
    /// Options of [`NavmeshQuery::init_sliced_find_path`].
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct FindPathOptions: u32 {
        /// Shortcut through polygons in line of sight of a node's parent.
        /// Yields paths that hug corners less, at the cost of extra raycasts.
        const ANY_ANGLE = 1 << 1;
    }
}

/// The state of a running search.
pub(crate) struct SearchState<'f> {
    pub(crate) status: Status,
    filter: &'f dyn QueryFilter,
    start_ref: PolyId,
    end_ref: PolyId,
    end_pos: Vec3,
    /// The node closest to the goal so far.
    last_best: NodeIndex,
    last_best_cost: f32,
    options: FindPathOptions,
    raycast_limit_sqr: f32,
}

impl<'a> NavmeshQuery<'a> {
    /// Finds the cheapest polygon corridor from `start_ref` to `end_ref`.
    ///
    /// `start_pos` and `end_pos` are used to compute the traversal costs and should lie
    /// on their polygons. If the goal can't be reached, the corridor leads to the polygon
    /// nearest to it and [`StatusDetail::PARTIAL_RESULT`] is set. Running out of nodes is
    /// reported with [`StatusDetail::OUT_OF_NODES`], but still yields the best corridor found.
    /// At most `max_path` polygons are stored, more are reported with [`StatusDetail::BUFFER_TOO_SMALL`].
    pub fn find_path(
        &mut self,
        start_ref: PolyId,
        end_ref: PolyId,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &dyn QueryFilter,
        path: &mut Vec<PolyId>,
        max_path: usize,
    ) -> Status {
        path.clear();
        if max_path == 0 {
            return Status::invalid_param();
        }
        let mut state = self.begin_search(
            start_ref,
            end_ref,
            start_pos,
            end_pos,
            filter,
            FindPathOptions::empty(),
        );
        if state.status.is_in_progress() {
            self.search(&mut state, usize::MAX);
        }
        self.collect_path(&state, path, max_path)
    }

    /// Starts a search that is advanced with [`NavmeshQuery::update_sliced_find_path`].
    ///
    /// Replaces any search in progress. The filter is used for the whole search.
    pub fn init_sliced_find_path(
        &mut self,
        start_ref: PolyId,
        end_ref: PolyId,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &'a dyn QueryFilter,
        options: FindPathOptions,
    ) -> Status {
        let state = self.begin_search(start_ref, end_ref, start_pos, end_pos, filter, options);
        let status = state.status;
        self.sliced = Some(state);
        status
    }

    /// Runs at most `max_iter` iterations of the sliced search.
    ///
    /// Returns the status of the search and the number of iterations done.
    /// The search is done once the status is no longer in progress.
    pub fn update_sliced_find_path(&mut self, max_iter: usize) -> (Status, usize) {
        let Some(mut state) = self.sliced.take() else {
            return (Status::FAILURE, 0);
        };
        if !state.status.is_in_progress() {
            let status = state.status;
            self.sliced = Some(state);
            return (status, 0);
        }

        // Tiles may have been removed since the last update.
        if !self.mesh.is_valid_poly_ref(state.start_ref) || !self.mesh.is_valid_poly_ref(state.end_ref) {
            state.status = Status::FAILURE;
            self.sliced = Some(state);
            return (Status::FAILURE, 0);
        }

        let iterations = self.search(&mut state, max_iter);
        let status = state.status;
        self.sliced = Some(state);
        (status, iterations)
    }

    /// Writes the corridor of the finished sliced search to `path` and resets the search.
    pub fn finalize_sliced_find_path(&mut self, path: &mut Vec<PolyId>, max_path: usize) -> Status {
        path.clear();
        let Some(state) = self.sliced.take() else {
            return Status::FAILURE;
        };
        if max_path == 0 {
            return Status::invalid_param();
        }
        if state.status.is_failure() {
            return Status::FAILURE;
        }
        self.collect_path(&state, path, max_path)
    }

    /// Like [`NavmeshQuery::finalize_sliced_find_path`], but for a search cancelled before it finished.
    ///
    /// Returns the corridor to the furthest polygon of `existing` that the search visited,
    /// or to the polygon closest to the goal if it visited none of them.
    pub fn finalize_sliced_find_path_partial(
        &mut self,
        existing: &[PolyId],
        path: &mut Vec<PolyId>,
        max_path: usize,
    ) -> Status {
        path.clear();
        let Some(mut state) = self.sliced.take() else {
            return Status::FAILURE;
        };
        if existing.is_empty() || max_path == 0 {
            return Status::invalid_param();
        }
        if state.status.is_failure() {
            return Status::FAILURE;
        }

        if state.start_ref != state.end_ref {
            // The furthest visited polygon of the existing corridor.
            let visited = existing
                .iter()
                .rev()
                .find_map(|id| self.node_pool.find_nodes(*id).next());
            match visited {
                Some(node) => state.last_best = node,
                None => state.status |= StatusDetail::PARTIAL_RESULT,
            }
        }
        self.collect_path(&state, path, max_path)
    }

    /// Validates the input and seeds the search.
    fn begin_search<'f>(
        &mut self,
        start_ref: PolyId,
        end_ref: PolyId,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &'f dyn QueryFilter,
        options: FindPathOptions,
    ) -> SearchState<'f> {
        let mut state = SearchState {
            status: Status::FAILURE,
            filter,
            start_ref,
            end_ref,
            end_pos,
            last_best: 0,
            last_best_cost: f32::MAX,
            options,
            raycast_limit_sqr: f32::MAX,
        };

        if !self.mesh.is_valid_poly_ref(start_ref)
            || !self.mesh.is_valid_poly_ref(end_ref)
            || !start_pos.is_finite()
            || !end_pos.is_finite()
        {
            state.status = Status::invalid_param();
            return state;
        }

        if options.contains(FindPathOptions::ANY_ANGLE) {
            // Limit raycasts to a distance proportional to the agent radius.
            if let Ok((tile, _)) = self.mesh.tile_and_poly_by_ref(start_ref) {
                let limit = tile.header.walkable_radius * 50.0;
                state.raycast_limit_sqr = limit * limit;
            }
        }

        if start_ref == end_ref {
            state.status = Status::SUCCESS;
            return state;
        }

        self.node_pool.clear();
        self.open_list.clear();
        let Some(start) = self.node_pool.get_node(start_ref, 0) else {
            state.status = Status::FAILURE | StatusDetail::OUT_OF_NODES;
            return state;
        };
        let heuristic = start_pos.distance(end_pos) * H_SCALE;
        let node = self.node_pool.node_mut(start);
        node.pos = start_pos;
        node.parent = 0;
        node.cost = 0.0;
        node.total = heuristic;
        node.flags = NodeFlags::OPEN;
        self.open_list.push(start, heuristic);

        state.last_best = start;
        state.last_best_cost = heuristic;
        state.status = Status::IN_PROGRESS;
        state
    }

    /// Expands at most `max_iter` nodes. Returns the number of expanded nodes.
    fn search(&mut self, state: &mut SearchState, max_iter: usize) -> usize {
        let mesh = self.mesh;
        let filter = state.filter;
        let any_angle = state.options.contains(FindPathOptions::ANY_ANGLE);
        let mut iterations = 0;

        while iterations < max_iter {
            let Some(best) = self.open_list.pop(&self.node_pool) else {
                break;
            };
            iterations += 1;
            {
                let node = self.node_pool.node_mut(best);
                node.flags.remove(NodeFlags::OPEN);
                node.flags.insert(NodeFlags::CLOSED);
            }
            let best_node = *self.node_pool.node(best);

            // Reached the goal.
            if best_node.id == state.end_ref {
                state.last_best = best;
                state.status = state.status.with_outcome(Outcome::Success);
                return iterations;
            }

            // Polygons can disappear while a sliced search is suspended.
            let Ok(best_poly) = mesh.handle(best_node.id) else {
                state.status = Status::FAILURE;
                return iterations;
            };

            let parent = self.node_pool.parent(best);
            let parent_node = parent.map(|parent| *self.node_pool.node(parent));
            let grandparent_ref = parent
                .and_then(|parent| self.node_pool.parent(parent))
                .map(|grandparent| self.node_pool.node(grandparent).id);
            let parent_ref = parent_node.map(|node| node.id);
            let parent_poly = match parent_ref.map(|id| mesh.handle(id)) {
                Some(Ok(handle)) => Some(handle),
                Some(Err(_)) => {
                    state.status = Status::FAILURE;
                    return iterations;
                }
                None => None,
            };
            if grandparent_ref.is_some_and(|id| !mesh.is_valid_poly_ref(id)) {
                state.status = Status::FAILURE;
                return iterations;
            }

            // Only try to shortcut to the parent if it is close enough.
            let try_line_of_sight = any_angle
                && parent_node
                    .is_some_and(|parent| parent.pos.distance_squared(best_node.pos) < state.raycast_limit_sqr);

            for link in &best_poly.poly.links {
                let neighbour_ref = link.target;
                // Don't expand back to where we came from.
                if neighbour_ref.is_null() || Some(neighbour_ref) == parent_ref {
                    continue;
                }
                let Ok(neighbour_poly) = mesh.handle(neighbour_ref) else {
                    continue;
                };
                if !filter.pass_filter(neighbour_ref, neighbour_poly.tile, neighbour_poly.poly) {
                    continue;
                }

                // Polygons entered from different tile sides get separate nodes.
                let cross_side = if link.side != NO_SIDE { link.side >> 1 } else { 0 };
                let Some(neighbour) = self.node_pool.get_node(neighbour_ref, cross_side) else {
                    state.status |= StatusDetail::OUT_OF_NODES;
                    continue;
                };

                // Nodes already reached from the same parent gain nothing from a shortcut.
                let sibling_parent = self.node_pool.node(neighbour).parent;
                if any_angle && sibling_parent != 0 && sibling_parent == best_node.parent {
                    continue;
                }

                // Position of a node is fixed on its first visit.
                if self.node_pool.node(neighbour).flags.is_empty() {
                    if let Ok(mid) = mesh.edge_mid_point(best_poly, neighbour_poly) {
                        self.node_pool.node_mut(neighbour).pos = mid;
                    }
                }
                let neighbour_pos = self.node_pool.node(neighbour).pos;

                let mut shortcut = None;
                if try_line_of_sight {
                    if let (Some(parent_ref), Some(parent_node)) = (parent_ref, parent_node) {
                        let mut hit = RaycastHit::default();
                        let status = mesh.raycast(
                            parent_ref,
                            parent_node.pos,
                            neighbour_pos,
                            filter,
                            RaycastOptions::USE_COSTS,
                            grandparent_ref,
                            &mut hit,
                            0,
                        );
                        if !status.is_failure() && hit.t >= 1.0 {
                            shortcut = Some(parent_node.cost + hit.path_cost);
                        }
                    }
                }

                let mut cost = match shortcut {
                    Some(cost) => cost,
                    None => {
                        best_node.cost
                            + filter.cost(
                                best_node.pos,
                                neighbour_pos,
                                parent_poly,
                                best_poly,
                                Some(neighbour_poly),
                            )
                    }
                };
                let heuristic = if neighbour_ref == state.end_ref {
                    cost += filter.cost(
                        neighbour_pos,
                        state.end_pos,
                        Some(best_poly),
                        neighbour_poly,
                        None,
                    );
                    0.0
                } else {
                    neighbour_pos.distance(state.end_pos) * H_SCALE
                };
                let total = cost + heuristic;

                let node = self.node_pool.node_mut(neighbour);
                // Already open or closed with a cheaper path.
                if node.flags.intersects(NodeFlags::OPEN | NodeFlags::CLOSED) && total >= node.total {
                    continue;
                }

                node.parent = if shortcut.is_some() { best_node.parent } else { best };
                node.id = neighbour_ref;
                node.flags.remove(NodeFlags::CLOSED | NodeFlags::PARENT_DETACHED);
                node.cost = cost;
                node.total = total;
                if shortcut.is_some() {
                    node.flags.insert(NodeFlags::PARENT_DETACHED);
                }
                node.flags.insert(NodeFlags::OPEN);
                self.open_list.push(neighbour, total);

                if heuristic < state.last_best_cost {
                    state.last_best_cost = heuristic;
                    state.last_best = neighbour;
                }
            }
        }

        if self.open_list.is_empty(&self.node_pool) {
            // Every reachable polygon was visited without finding the goal.
            state.status = state.status.with_outcome(Outcome::Success);
        }
        trace!(iterations, nodes = self.node_pool.len(), "path search step");
        iterations
    }

    /// Walks the parents from the best node back to the start and stores the corridor.
    fn collect_path(&self, state: &SearchState, path: &mut Vec<PolyId>, max_path: usize) -> Status {
        if state.status.is_failure() {
            return state.status;
        }
        let mut status = state.status.with_outcome(Outcome::Success);

        if state.start_ref == state.end_ref {
            path.push(state.start_ref);
            return status;
        }
        if state.last_best == 0 {
            return Status::FAILURE;
        }

        let mut chain = Vec::new();
        let mut node = Some(state.last_best);
        while let Some(index) = node {
            chain.push(index);
            node = self.node_pool.parent(index);
        }
        chain.reverse();

        if self.node_pool.node(state.last_best).id != state.end_ref {
            status |= StatusDetail::PARTIAL_RESULT;
        }

        let mut hit = RaycastHit::default();
        for (i, index) in chain.iter().enumerate() {
            if path.len() >= max_path {
                status |= StatusDetail::BUFFER_TOO_SMALL;
                break;
            }
            let node = self.node_pool.node(*index);
            let next = chain.get(i + 1).map(|next| self.node_pool.node(*next));

            match next {
                // A shortcut of the any-angle search, walk it again to find the polygons it crosses.
                Some(next) if next.flags.contains(NodeFlags::PARENT_DETACHED) => {
                    let ray_status = self.mesh.raycast(
                        node.id,
                        node.pos,
                        next.pos,
                        state.filter,
                        RaycastOptions::empty(),
                        None,
                        &mut hit,
                        max_path - path.len(),
                    );
                    path.extend_from_slice(&hit.path);
                    // The ray ends on the border of the next polygon, which is added next.
                    if path.last() == Some(&next.id) {
                        path.pop();
                    }
                    if ray_status.contains(StatusDetail::BUFFER_TOO_SMALL) {
                        status |= StatusDetail::BUFFER_TOO_SMALL;
                        break;
                    }
                }
                _ => path.push(node.id),
            }
        }
        status
    }
}
