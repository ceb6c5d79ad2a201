use bitflags::bitflags;
use glam::Vec3;

use crate::{
    filter::{PolyHandle, QueryFilter},
    math::intersect_segment_poly_2d,
    poly_id::PolyId,
    query::NavmeshQuery,
    status::{Status, StatusDetail},
    tile::NO_SIDE,
    tiled_mesh::TiledMesh,
};

bitflags! {
    /// Options of [`NavmeshQuery::raycast`].
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct RaycastOptions: u32 {
        /// Accumulate the filter costs of the crossed polygons in [`RaycastHit::path_cost`].
        const USE_COSTS = 1 << 0;
    }
}

/// The result of [`NavmeshQuery::raycast`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RaycastHit {
    /// The parameter along the ray where it hit a wall, or [`f32::MAX`] if it reached its end.
    pub t: f32,
    /// The normal of the wall that was hit. Zero if no wall was hit.
    pub hit_normal: Vec3,
    /// The edge of the last polygon the ray left through.
    pub hit_edge_index: Option<usize>,
    /// The polygons visited by the ray.
    pub path: Vec<PolyId>,
    /// The accumulated cost, if [`RaycastOptions::USE_COSTS`] was set.
    pub path_cost: f32,
}

impl RaycastHit {
    /// Returns `true` if the ray reached its end without hitting a wall.
    pub fn reached_end(&self) -> bool {
        self.t == f32::MAX
    }
}

impl NavmeshQuery<'_> {
    /// Casts a "walkability" ray along the surface of the mesh from `start` towards `end`.
    ///
    /// The ray works on the xz-plane. It stops at the first wall, i.e. an edge without a
    /// neighbour passing the filter. Off-mesh connections are never followed.
    /// `prev_ref` is the polygon before `start_ref`, used for costs.
    /// At most `max_path` visited polygons are stored in the hit.
    pub fn raycast(
        &self,
        start_ref: PolyId,
        start: Vec3,
        end: Vec3,
        filter: &dyn QueryFilter,
        options: RaycastOptions,
        prev_ref: Option<PolyId>,
        hit: &mut RaycastHit,
        max_path: usize,
    ) -> Status {
        self.mesh
            .raycast(start_ref, start, end, filter, options, prev_ref, hit, max_path)
    }
}

impl TiledMesh {
    pub(crate) fn raycast(
        &self,
        start_ref: PolyId,
        start: Vec3,
        end: Vec3,
        filter: &dyn QueryFilter,
        options: RaycastOptions,
        prev_ref: Option<PolyId>,
        hit: &mut RaycastHit,
        max_path: usize,
    ) -> Status {
        hit.t = 0.0;
        hit.hit_normal = Vec3::ZERO;
        hit.hit_edge_index = None;
        hit.path.clear();
        hit.path_cost = 0.0;

        let Ok(mut current) = self.handle(start_ref) else {
            return Status::invalid_param();
        };
        if !start.is_finite() || !end.is_finite() {
            return Status::invalid_param();
        }
        let mut previous = match prev_ref {
            Some(id) => match self.handle(id) {
                Ok(handle) => Some(handle),
                Err(_) => return Status::invalid_param(),
            },
            None => None,
        };

        let dir = end - start;
        let mut current_pos = start;
        let mut status = Status::SUCCESS;

        loop {
            let vertices = current.tile.poly_vertices(current.poly);
            let nv = vertices.len();
            let Some(intersection) = intersect_segment_poly_2d(start, end, &vertices) else {
                // Could not hit the polygon, keep the old t and report the hit.
                return status;
            };
            hit.hit_edge_index = intersection.seg_max;
            hit.t = hit.t.max(intersection.t_max);

            if hit.path.len() < max_path {
                hit.path.push(current.id);
            } else {
                status |= StatusDetail::BUFFER_TOO_SMALL;
            }

            // The end of the ray is inside the polygon.
            let Some(seg_max) = intersection.seg_max else {
                hit.t = f32::MAX;
                if options.contains(RaycastOptions::USE_COSTS) {
                    hit.path_cost += filter.cost(current_pos, end, previous, current, Some(current));
                }
                return status;
            };

            let next = next_poly_along_ray(self, current, seg_max, start, end, intersection.t_max, filter);

            if options.contains(RaycastOptions::USE_COSTS) {
                // The ray moves on the xz-plane, take the height from the edge it leaves through.
                let last_pos = current_pos;
                current_pos = start + dir * hit.t;
                let e1 = vertices[seg_max];
                let e2 = vertices[(seg_max + 1) % nv];
                let edge = e2 - e1;
                let diff = current_pos - e1;
                let s = if edge.x * edge.x > edge.z * edge.z {
                    diff.x / edge.x
                } else {
                    diff.z / edge.z
                };
                current_pos.y = e1.y + edge.y * s;
                hit.path_cost += filter.cost(last_pos, current_pos, previous, current, next);
            }

            let Some(next) = next else {
                // Hit a wall.
                let va = vertices[seg_max];
                let vb = vertices[(seg_max + 1) % nv];
                let dx = vb.x - va.x;
                let dz = vb.z - va.z;
                hit.hit_normal = Vec3::new(dz, 0.0, -dx).normalize_or_zero();
                return status;
            };

            previous = Some(current);
            current = next;
        }
    }
}

/// The polygon a ray enters when leaving `current` through edge `edge` at parameter `t`.
fn next_poly_along_ray<'m>(
    mesh: &'m TiledMesh,
    current: PolyHandle<'m>,
    edge: usize,
    start: Vec3,
    end: Vec3,
    t: f32,
    filter: &dyn QueryFilter,
) -> Option<PolyHandle<'m>> {
    for link in &current.poly.links {
        if link.edge as usize != edge {
            continue;
        }
        let Ok(next) = mesh.handle(link.target) else {
            continue;
        };
        if next.poly.is_off_mesh_connection() {
            continue;
        }
        if !filter.pass_filter(link.target, next.tile, next.poly) {
            continue;
        }

        // Internal links and border links spanning the whole edge are always crossed.
        if link.side == NO_SIDE || (link.bmin == 0 && link.bmax == 255) {
            return Some(next);
        }

        // Otherwise the crossing point must lie inside the linked part of the edge.
        let nv = current.poly.vertex_count as usize;
        let left = current.tile.vertices[current.poly.vertices[edge] as usize];
        let right = current.tile.vertices[current.poly.vertices[(edge + 1) % nv] as usize];
        let s = 1.0 / 255.0;
        let (left, right, crossing) = match link.side {
            0 | 4 => (left.z, right.z, start.z + (end.z - start.z) * t),
            2 | 6 => (left.x, right.x, start.x + (end.x - start.x) * t),
            _ => continue,
        };
        let mut lmin = left + (right - left) * (link.bmin as f32 * s);
        let mut lmax = left + (right - left) * (link.bmax as f32 * s);
        if lmin > lmax {
            std::mem::swap(&mut lmin, &mut lmax);
        }
        if crossing >= lmin && crossing <= lmax {
            return Some(next);
        }
    }
    None
}
