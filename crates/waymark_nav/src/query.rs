use glam::Vec3;

use crate::{
    filter::{PolyHandle, QueryFilter},
    find_path::SearchState,
    math::{distance_pt_poly_edges_sqr, distance_pt_seg_sqr_2d},
    node_pool::{NodeFlags, NodePool, OpenList},
    poly_id::PolyId,
    status::{Status, StatusDetail},
    tile::{NO_SIDE, NavmeshTileData, Poly, VERTS_PER_POLYGON},
    tiled_mesh::{TiledMesh, nearest_distance_metric},
};

/// Nodes of the pool used by the small local searches.
const TINY_NODE_POOL_SIZE: usize = 64;

/// The result of [`NavmeshQuery::find_nearest_poly`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestPoly {
    /// The nearest polygon.
    pub poly: PolyId,
    /// The point on the polygon nearest to the query center.
    pub point: Vec3,
    /// Whether the query center lies over the polygon.
    pub over_poly: bool,
}

/// Runs path and proximity queries against a [`TiledMesh`].
///
/// Owns the scratch memory of the searches, so each thread should use its own query.
pub struct NavmeshQuery<'a> {
    pub(crate) mesh: &'a TiledMesh,
    pub(crate) node_pool: NodePool,
    pub(crate) tiny_node_pool: NodePool,
    pub(crate) open_list: OpenList,
    pub(crate) sliced: Option<SearchState<'a>>,
}

impl<'a> NavmeshQuery<'a> {
    /// Creates a query whose searches visit at most `max_nodes` polygons.
    ///
    /// Fails with [`StatusDetail::INVALID_PARAM`] if `max_nodes` is 0 or above 65535.
    pub fn new(mesh: &'a TiledMesh, max_nodes: usize) -> Result<Self, Status> {
        if max_nodes == 0 || max_nodes > u16::MAX as usize {
            return Err(Status::invalid_param());
        }
        Ok(Self {
            mesh,
            node_pool: NodePool::new(max_nodes),
            tiny_node_pool: NodePool::new(TINY_NODE_POOL_SIZE),
            open_list: OpenList::default(),
            sliced: None,
        })
    }

    /// The mesh being queried.
    pub fn mesh(&self) -> &'a TiledMesh {
        self.mesh
    }

    /// The maximum number of nodes a search may visit.
    pub fn max_nodes(&self) -> usize {
        self.node_pool.max_nodes()
    }

    /// Finds the polygon nearest to `center` whose bounds overlap the box `center ± half_extents`.
    ///
    /// A polygon directly below or above `center` within the climb height of its tile
    /// counts as being at distance 0.
    pub fn find_nearest_poly(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &dyn QueryFilter,
    ) -> Result<Option<NearestPoly>, Status> {
        if !center.is_finite() || !is_valid_extents(half_extents) {
            return Err(Status::invalid_param());
        }

        let mut nearest: Option<(f32, NearestPoly)> = None;
        self.visit_polygons(center, half_extents, filter, |id, tile, _| {
            let Some((point, over_poly)) = self.mesh.closest_point_on_poly(id, center) else {
                return;
            };
            let d = nearest_distance_metric(center, point, over_poly, tile.header.walkable_climb);
            if nearest.is_none_or(|(best, _)| d < best) {
                nearest = Some((
                    d,
                    NearestPoly {
                        poly: id,
                        point,
                        over_poly,
                    },
                ));
            }
        });
        Ok(nearest.map(|(_, poly)| poly))
    }

    /// Collects the polygons whose bounds overlap the box `center ± half_extents`.
    ///
    /// Stores at most `max_polys` polygons and reports [`StatusDetail::BUFFER_TOO_SMALL`]
    /// if more were found.
    pub fn query_polygons(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &dyn QueryFilter,
        polys: &mut Vec<PolyId>,
        max_polys: usize,
    ) -> Status {
        polys.clear();
        if !center.is_finite() || !is_valid_extents(half_extents) || max_polys == 0 {
            return Status::invalid_param();
        }

        let mut overflow = false;
        self.visit_polygons(center, half_extents, filter, |id, _, _| {
            if polys.len() < max_polys {
                polys.push(id);
            } else {
                overflow = true;
            }
        });
        if overflow {
            Status::SUCCESS | StatusDetail::BUFFER_TOO_SMALL
        } else {
            Status::SUCCESS
        }
    }

    /// Visits all polygons passing the filter in the tiles overlapping the query box.
    fn visit_polygons(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &dyn QueryFilter,
        mut visit: impl FnMut(PolyId, &NavmeshTileData, &Poly),
    ) {
        let qmin = center - half_extents;
        let qmax = center + half_extents;
        let (min_x, min_z) = self.mesh.calc_tile_loc(qmin);
        let (max_x, max_z) = self.mesh.calc_tile_loc(qmax);

        for z in min_z..=max_z {
            for x in min_x..=max_x {
                for tile_index in self.mesh.tiles_at(x, z) {
                    let Some(tile) = self.mesh.tile_data(tile_index) else {
                        continue;
                    };
                    self.mesh
                        .query_polygons_in_tile(tile_index, qmin, qmax, |id, poly| {
                            if filter.pass_filter(id, tile, poly) {
                                visit(id, tile, poly);
                            }
                        });
                }
            }
        }
    }

    /// The point on a polygon closest to `pos`, and whether `pos` lies over the polygon.
    pub fn closest_point_on_poly(&self, id: PolyId, pos: Vec3) -> Result<(Vec3, bool), Status> {
        if !pos.is_finite() {
            return Err(Status::invalid_param());
        }
        self.mesh
            .closest_point_on_poly(id, pos)
            .ok_or(Status::invalid_param())
    }

    /// Clamps `pos` to the outline of a polygon on the xz-plane. Points inside are returned as is.
    ///
    /// Much faster than [`NavmeshQuery::closest_point_on_poly`], but ignores the detail mesh.
    pub fn closest_point_on_poly_boundary(&self, id: PolyId, pos: Vec3) -> Result<Vec3, Status> {
        let (tile, poly) = self.mesh.tile_and_poly_by_ref(id)?;
        if !pos.is_finite() {
            return Err(Status::invalid_param());
        }
        Ok(closest_point_on_poly_boundary(tile, poly, pos))
    }

    /// The height of a polygon at `pos` according to the detail mesh.
    ///
    /// Fails if `pos` does not lie over the polygon. For off-mesh connections the height
    /// is interpolated between the end points.
    pub fn get_poly_height(&self, id: PolyId, pos: Vec3) -> Result<f32, Status> {
        let (tile, poly) = self.mesh.tile_and_poly_by_ref(id)?;
        if !pos.is_finite() {
            return Err(Status::invalid_param());
        }

        if poly.is_off_mesh_connection() {
            let v0 = tile.vertices[poly.vertices[0] as usize];
            let v1 = tile.vertices[poly.vertices[1] as usize];
            let (_, t) = distance_pt_seg_sqr_2d(pos, v0, v1);
            return Ok(v0.y + (v1.y - v0.y) * t);
        }
        self.mesh
            .poly_height(id, pos)
            .ok_or(Status::invalid_param())
    }

    /// The left and right end points of the portal between two adjacent polygons.
    pub fn get_portal_points(&self, from: PolyId, to: PolyId) -> Result<(Vec3, Vec3), Status> {
        let from = self.mesh.handle(from)?;
        let to = self.mesh.handle(to)?;
        self.mesh.portal_points(from, to)
    }

    /// The midpoint of the portal between two adjacent polygons.
    pub fn get_edge_mid_point(&self, from: PolyId, to: PolyId) -> Result<Vec3, Status> {
        let (left, right) = self.get_portal_points(from, to)?;
        Ok((left + right) * 0.5)
    }

    /// Returns `true` if `id` refers to a polygon of the mesh that passes the filter.
    pub fn is_valid_poly_ref(&self, id: PolyId, filter: &dyn QueryFilter) -> bool {
        self.mesh
            .tile_and_poly_by_ref(id)
            .is_ok_and(|(tile, poly)| filter.pass_filter(id, tile, poly))
    }

    /// Returns `true` if the last search closed a node for `id`.
    ///
    /// Only meaningful for searches using the main node pool.
    pub fn is_in_closed_list(&self, id: PolyId) -> bool {
        self.node_pool
            .find_nodes(id)
            .any(|node| self.node_pool.node(node).flags.contains(NodeFlags::CLOSED))
    }
}

impl TiledMesh {
    /// Looks up a polygon for use in the query algorithms.
    pub(crate) fn handle(&self, id: PolyId) -> Result<PolyHandle<'_>, Status> {
        let (tile, poly) = self.tile_and_poly_by_ref(id)?;
        Ok(PolyHandle { id, tile, poly })
    }

    /// The portal between two linked polygons, as left and right end points seen from `from`.
    ///
    /// Portals of off-mesh connections collapse to the connection end point.
    pub(crate) fn portal_points(&self, from: PolyHandle, to: PolyHandle) -> Result<(Vec3, Vec3), Status> {
        let Some(link) = from.poly.links.iter().find(|link| link.target == to.id) else {
            return Err(Status::invalid_param());
        };

        if from.poly.is_off_mesh_connection() {
            let point = from.tile.vertices[from.poly.vertices[link.edge as usize] as usize];
            return Ok((point, point));
        }
        if to.poly.is_off_mesh_connection() {
            let Some(back) = to.poly.links.iter().find(|link| link.target == from.id) else {
                return Err(Status::invalid_param());
            };
            let point = to.tile.vertices[to.poly.vertices[back.edge as usize] as usize];
            return Ok((point, point));
        }

        let edge = link.edge as usize;
        let nv = from.poly.vertex_count as usize;
        let v0 = from.tile.vertices[from.poly.vertices[edge] as usize];
        let v1 = from.tile.vertices[from.poly.vertices[(edge + 1) % nv] as usize];

        // Links across tile borders may only cover part of the edge.
        if link.side != NO_SIDE && (link.bmin != 0 || link.bmax != 255) {
            let s = 1.0 / 255.0;
            let tmin = link.bmin as f32 * s;
            let tmax = link.bmax as f32 * s;
            return Ok((v0.lerp(v1, tmin), v0.lerp(v1, tmax)));
        }
        Ok((v0, v1))
    }

    /// The midpoint of the portal between two linked polygons.
    pub(crate) fn edge_mid_point(&self, from: PolyHandle, to: PolyHandle) -> Result<Vec3, Status> {
        let (left, right) = self.portal_points(from, to)?;
        Ok((left + right) * 0.5)
    }
}

/// Clamps `pos` to the outline of a polygon on the xz-plane.
pub(crate) fn closest_point_on_poly_boundary(tile: &NavmeshTileData, poly: &Poly, pos: Vec3) -> Vec3 {
    let vertices = tile.poly_vertices(poly);
    let mut distances = [0.0; VERTS_PER_POLYGON];
    let mut params = [0.0; VERTS_PER_POLYGON];
    if distance_pt_poly_edges_sqr(pos, &vertices, &mut distances, &mut params) {
        return pos;
    }

    let nv = vertices.len();
    let nearest = distances[..nv]
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map_or(0, |(i, _)| i);
    vertices[nearest].lerp(vertices[(nearest + 1) % nv], params[nearest])
}

fn is_valid_extents(half_extents: Vec3) -> bool {
    half_extents.is_finite() && half_extents.cmpge(Vec3::ZERO).all()
}
