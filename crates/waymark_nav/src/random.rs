//! Uniformly distributed random points on the mesh.

use glam::Vec3;
use rand::Rng;

use crate::{
    filter::QueryFilter,
    math::{distance_pt_seg_sqr_2d, poly_area_2d, random_point_in_convex_poly},
    node_pool::NodeFlags,
    poly_id::PolyId,
    query::NavmeshQuery,
    status::{Status, StatusDetail},
    tile::PolyType,
};

/// A random point on the mesh together with the polygon containing it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RandomPoint {
    /// The polygon containing [`RandomPoint::point`].
    pub poly: PolyId,
    /// The point.
    pub point: Vec3,
}

impl NavmeshQuery<'_> {
    /// Picks a random point on the mesh.
    ///
    /// Every tile is equally likely, within the tile the polygons are weighted by their area.
    /// Fails if no polygon passes the filter.
    pub fn find_random_point(&self, filter: &dyn QueryFilter, rng: &mut impl Rng) -> Result<RandomPoint, Status> {
        let mesh = self.mesh;

        // Reservoir sample a tile.
        let mut chosen_tile = None;
        let mut tile_sum = 0.0;
        for index in (0..mesh.max_tiles()).filter(|&i| mesh.tile_data(i).is_some()) {
            tile_sum += 1.0;
            if rng.gen_range(0.0f32..1.0) * tile_sum <= 1.0 {
                chosen_tile = Some(index);
            }
        }
        let Some(tile_index) = chosen_tile else {
            return Err(Status::FAILURE);
        };
        let Some(tile) = mesh.tile_data(tile_index) else {
            return Err(Status::FAILURE);
        };

        // Reservoir sample a polygon weighted by area.
        let mut chosen: Option<(PolyId, Vec<Vec3>)> = None;
        let mut area_sum = 0.0;
        for (poly_index, poly) in tile.polygons.iter().enumerate() {
            if poly.poly_type != PolyType::Ground {
                continue;
            }
            let id = mesh.poly_id(tile_index, poly_index);
            if !filter.pass_filter(id, tile, poly) {
                continue;
            }
            let vertices = tile.poly_vertices(poly);
            let area = poly_area_2d(&vertices);
            area_sum += area;
            if rng.gen_range(0.0f32..1.0) * area_sum <= area {
                chosen = Some((id, vertices));
            }
        }
        let Some((poly, vertices)) = chosen else {
            return Err(Status::FAILURE);
        };
        self.sample_poly(poly, &vertices, rng)
    }

    /// Picks a random point on the polygons reachable from `start_ref` whose portals lie within `radius` of `center`.
    ///
    /// The polygons are weighted by their area. A reached polygon may extend past the circle,
    /// so the point is not guaranteed to lie inside it.
    pub fn find_random_point_around_circle(
        &mut self,
        start_ref: PolyId,
        center: Vec3,
        radius: f32,
        filter: &dyn QueryFilter,
        rng: &mut impl Rng,
    ) -> Result<RandomPoint, Status> {
        let mesh = self.mesh;
        let Ok(start_poly) = mesh.handle(start_ref) else {
            return Err(Status::invalid_param());
        };
        if !center.is_finite() || !radius.is_finite() || radius < 0.0 {
            return Err(Status::invalid_param());
        }
        if !filter.pass_filter(start_ref, start_poly.tile, start_poly.poly) {
            return Err(Status::invalid_param());
        }

        self.node_pool.clear();
        self.open_list.clear();
        let Some(start) = self.node_pool.get_node(start_ref, 0) else {
            return Err(Status::FAILURE | StatusDetail::OUT_OF_NODES);
        };
        let node = self.node_pool.node_mut(start);
        node.pos = center;
        node.flags = NodeFlags::OPEN;
        self.open_list.push(start, 0.0);

        let radius_sqr = radius * radius;
        let mut area_sum = 0.0;
        let mut chosen: Option<(PolyId, Vec<Vec3>)> = None;

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

            if best_poly.poly.poly_type == PolyType::Ground {
                let vertices = best_poly.tile.poly_vertices(best_poly.poly);
                let area = poly_area_2d(&vertices);
                area_sum += area;
                if rng.gen_range(0.0f32..1.0) * area_sum <= area {
                    chosen = Some((best_node.id, vertices));
                }
            }

            let parent_ref = self
                .node_pool
                .parent(best)
                .map(|parent| self.node_pool.node(parent).id);
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
                if distance_pt_seg_sqr_2d(center, va, vb).0 > radius_sqr {
                    continue;
                }

                let Some(neighbour) = self.node_pool.get_node(neighbour_ref, 0) else {
                    continue;
                };
                let node = self.node_pool.node_mut(neighbour);
                if node.flags.contains(NodeFlags::CLOSED) {
                    continue;
                }
                if node.flags.is_empty() {
                    node.pos = va.lerp(vb, 0.5);
                }
                let total = best_node.total + best_node.pos.distance(node.pos);
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

        let Some((poly, vertices)) = chosen else {
            return Err(Status::FAILURE);
        };
        self.sample_poly(poly, &vertices, rng)
    }

    /// Picks a uniformly distributed point on a polygon, snapped to its detail surface.
    fn sample_poly(&self, poly: PolyId, vertices: &[Vec3], rng: &mut impl Rng) -> Result<RandomPoint, Status> {
        let s = rng.gen_range(0.0f32..1.0);
        let t = rng.gen_range(0.0f32..1.0);
        let point = random_point_in_convex_poly(vertices, s, t);
        let (point, _) = self
            .mesh
            .closest_point_on_poly(poly, point)
            .ok_or(Status::FAILURE)?;
        Ok(RandomPoint { poly, point })
    }
}
