use std::collections::HashMap;

use glam::{U16Vec3, Vec2, Vec3};
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    build::AgentProfile,
    math::{closest_height_point_triangle, distance_pt_seg_sqr_2d, point_in_polygon},
    poly_id::{PolyId, PolyIdLayout, TileRef},
    status::{Status, StatusDetail},
    tile::{EXT_LINK, Link, NO_SIDE, NavmeshTileData, OffMeshConnection, Poly},
};

/// The most polygons a single border edge links to.
const MAX_CONNECTING_POLYS: usize = 4;

/// Parameters of a [`TiledMesh`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TiledMeshParams {
    /// The world space origin of the tile grid.
    pub origin: Vec3,
    /// The width of a tile along the x-axis. [Units: wu]
    pub tile_width: f32,
    /// The depth of a tile along the z-axis. [Units: wu]
    pub tile_height: f32,
    /// The maximum number of tiles the mesh can hold.
    pub max_tiles: u32,
    /// The maximum number of polygons per tile, off-mesh connections included.
    pub max_polys: u32,
}

/// A slot of the tile table.
#[derive(Debug, Clone, Default)]
pub struct MeshTile {
    salt: u32,
    data: Option<NavmeshTileData>,
}

impl MeshTile {
    /// The generation of the slot. Changes whenever a tile is removed from it.
    pub fn salt(&self) -> u32 {
        self.salt
    }

    /// The tile occupying the slot.
    pub fn data(&self) -> Option<&NavmeshTileData> {
        self.data.as_ref()
    }
}

/// A navigation mesh made of tiles laid out on a grid, with the polygons of
/// neighbouring tiles linked to each other.
#[derive(Debug, Clone)]
pub struct TiledMesh {
    params: TiledMeshParams,
    layout: PolyIdLayout,
    tiles: Vec<MeshTile>,
    lookup: HashMap<(i32, i32), Vec<usize>>,
    free: Vec<usize>,
    pub(crate) agents: Vec<AgentProfile>,
    pub(crate) max_nodes: usize,
}

impl TiledMesh {
    /// Creates an empty mesh.
    pub fn new(params: TiledMeshParams) -> Result<Self, TiledMeshError> {
        if params.max_tiles == 0 || !(params.tile_width > 0.0 && params.tile_height > 0.0) {
            return Err(TiledMeshError::InvalidParams);
        }
        let layout = PolyIdLayout::new(params.max_tiles, params.max_polys)
            .map_err(|_| TiledMeshError::InvalidParams)?;
        let max_tiles = params.max_tiles as usize;
        Ok(Self {
            params,
            layout,
            tiles: vec![
                MeshTile {
                    salt: 1,
                    data: None,
                };
                max_tiles
            ],
            lookup: HashMap::new(),
            // Popped from the back, so slot 0 is handed out first.
            free: (0..max_tiles).rev().collect(),
            agents: Vec::new(),
            max_nodes: 2048,
        })
    }

    /// The parameters the mesh was created with.
    pub fn params(&self) -> &TiledMeshParams {
        &self.params
    }

    /// The bit layout of the polygon ids of this mesh.
    pub fn layout(&self) -> &PolyIdLayout {
        &self.layout
    }

    /// The number of tile slots.
    pub fn max_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// The tile slot at `index`.
    pub fn tile(&self, index: usize) -> Option<&MeshTile> {
        self.tiles.get(index)
    }

    /// All tiles currently in the mesh.
    pub fn tiles(&self) -> impl Iterator<Item = (TileRef, &NavmeshTileData)> {
        self.tiles
            .iter()
            .enumerate()
            .filter_map(|(i, tile)| Some((self.tile_ref(i), tile.data.as_ref()?)))
    }

    pub(crate) fn tile_data(&self, index: usize) -> Option<&NavmeshTileData> {
        self.tiles.get(index)?.data.as_ref()
    }

    /// The grid cell containing `pos`.
    pub fn calc_tile_loc(&self, pos: Vec3) -> (i32, i32) {
        let x = ((pos.x - self.params.origin.x) / self.params.tile_width).floor() as i32;
        let z = ((pos.z - self.params.origin.z) / self.params.tile_height).floor() as i32;
        (x, z)
    }

    /// The slot indices of all layers at a grid cell.
    pub(crate) fn tiles_at(&self, x: i32, z: i32) -> Vec<usize> {
        self.lookup.get(&(x, z)).cloned().unwrap_or_default()
    }

    /// The tile at a grid cell and layer.
    pub fn tile_at(&self, x: i32, z: i32, layer: i32) -> Option<&NavmeshTileData> {
        self.tile_index_at(x, z, layer)
            .and_then(|index| self.tile_data(index))
    }

    /// The handle of the tile at a grid cell and layer.
    pub fn tile_ref_at(&self, x: i32, z: i32, layer: i32) -> Option<TileRef> {
        self.tile_index_at(x, z, layer).map(|index| self.tile_ref(index))
    }

    fn tile_index_at(&self, x: i32, z: i32, layer: i32) -> Option<usize> {
        self.lookup.get(&(x, z))?.iter().copied().find(|index| {
            self.tile_data(*index)
                .is_some_and(|tile| tile.header.layer == layer)
        })
    }

    /// The slot indices of all layers of the grid cell next to (`x`, `z`) on `side`.
    fn neighbour_tiles_at(&self, x: i32, z: i32, side: u8) -> Vec<usize> {
        let (dx, dz) = match side {
            0 => (1, 0),
            1 => (1, 1),
            2 => (0, 1),
            3 => (-1, 1),
            4 => (-1, 0),
            5 => (-1, -1),
            6 => (0, -1),
            7 => (1, -1),
            _ => (0, 0),
        };
        self.tiles_at(x + dx, z + dz)
    }

    /// The handle of the tile in slot `index`.
    pub(crate) fn tile_ref(&self, index: usize) -> TileRef {
        TileRef(self.poly_id(index, 0))
    }

    /// The id of polygon `poly` in slot `tile`.
    pub(crate) fn poly_id(&self, tile: usize, poly: usize) -> PolyId {
        self.layout
            .encode(self.tiles[tile].salt, tile as u32, poly as u32)
    }

    /// Looks up a tile by handle.
    pub fn tile_by_ref(&self, tile_ref: TileRef) -> Option<&NavmeshTileData> {
        let (salt, index, _) = self.layout.decode(tile_ref.0);
        let tile = self.tiles.get(index as usize)?;
        if tile.salt != salt {
            return None;
        }
        tile.data.as_ref()
    }

    /// The handle of the tile containing a polygon.
    pub fn tile_ref_of(&self, id: PolyId) -> TileRef {
        let (salt, tile, _) = self.layout.decode(id);
        TileRef(self.layout.encode(salt, tile, 0))
    }

    /// Returns `true` if `id` refers to a polygon currently in the mesh.
    pub fn is_valid_poly_ref(&self, id: PolyId) -> bool {
        self.tile_and_poly_by_ref(id).is_ok()
    }

    /// Looks up a polygon and the tile containing it.
    pub fn tile_and_poly_by_ref(&self, id: PolyId) -> Result<(&NavmeshTileData, &Poly), Status> {
        if id.is_null() {
            return Err(Status::FAILURE);
        }
        let (salt, tile, poly) = self.layout.decode(id);
        let Some(slot) = self.tiles.get(tile as usize) else {
            return Err(Status::invalid_param());
        };
        let Some(data) = slot.data.as_ref().filter(|_| slot.salt == salt) else {
            return Err(Status::invalid_param());
        };
        let Some(poly) = data.polygons.get(poly as usize) else {
            return Err(Status::invalid_param());
        };
        Ok((data, poly))
    }

    /// The off-mesh connection a polygon stands in for.
    pub fn off_mesh_connection_by_ref(&self, id: PolyId) -> Option<&OffMeshConnection> {
        let (tile, poly) = self.tile_and_poly_by_ref(id).ok()?;
        if !poly.is_off_mesh_connection() {
            return None;
        }
        let index = self.layout.poly(id) as usize - tile.header.off_mesh_base;
        tile.off_mesh_connections.get(index)
    }

    /// The end points of an off-mesh connection polygon, ordered for traversal coming from `prev_ref`.
    pub fn off_mesh_connection_poly_end_points(
        &self,
        prev_ref: PolyId,
        poly_ref: PolyId,
    ) -> Result<(Vec3, Vec3), Status> {
        let (tile, poly) = self.tile_and_poly_by_ref(poly_ref)?;
        if !poly.is_off_mesh_connection() {
            return Err(Status::FAILURE);
        }

        // The link of the first vertex tells which way the connection is entered.
        let mut indices = (0, 1);
        if let Some(link) = poly.links.iter().find(|link| link.edge == 0) {
            if link.target != prev_ref {
                indices = (1, 0);
            }
        }
        Ok((
            tile.vertices[poly.vertices[indices.0] as usize],
            tile.vertices[poly.vertices[indices.1] as usize],
        ))
    }

    /// Sets the flags of a polygon.
    pub fn set_poly_flags(&mut self, id: PolyId, flags: u16) -> Status {
        match self.poly_mut(id) {
            Ok(poly) => {
                poly.flags = flags;
                Status::SUCCESS
            }
            Err(status) => status,
        }
    }

    /// Sets the area of a polygon.
    pub fn set_poly_area(&mut self, id: PolyId, area: waymark::AreaType) -> Status {
        match self.poly_mut(id) {
            Ok(poly) => {
                poly.area = area;
                Status::SUCCESS
            }
            Err(status) => status,
        }
    }

    fn poly_mut(&mut self, id: PolyId) -> Result<&mut Poly, Status> {
        self.tile_and_poly_by_ref(id)?;
        let (_, tile, poly) = self.layout.decode(id);
        self.tiles[tile as usize]
            .data
            .as_mut()
            .and_then(|data| data.polygons.get_mut(poly as usize))
            .ok_or(Status::invalid_param())
    }

    /// Adds a tile and links it to the tiles around it.
    pub fn add_tile(&mut self, data: NavmeshTileData) -> Result<TileRef, TiledMeshError> {
        let header = data.header;
        if self.tile_at(header.x, header.z, header.layer).is_some() {
            return Err(TiledMeshError::AlreadyOccupied {
                x: header.x,
                z: header.z,
                layer: header.layer,
            });
        }
        let max_polys = 1_usize << self.layout.poly_bits;
        if data.polygons.len() > max_polys {
            return Err(TiledMeshError::TooManyPolygons {
                polygons: data.polygons.len(),
                max: max_polys,
            });
        }
        let index = self.free.pop().ok_or(TiledMeshError::OutOfTiles)?;

        self.tiles[index].data = Some(data);
        self.lookup
            .entry((header.x, header.z))
            .or_default()
            .push(index);

        self.connect_int_links(index);
        // Base off-mesh connections to their starting polygons and connect connections inside the tile.
        self.base_off_mesh_links(index);
        self.connect_ext_off_mesh_links(index, index, None);

        // Other layers in the same cell.
        for other in self.tiles_at(header.x, header.z) {
            if other == index {
                continue;
            }
            self.connect_ext_links(index, other, None);
            self.connect_ext_links(other, index, None);
            self.connect_ext_off_mesh_links(index, other, None);
            self.connect_ext_off_mesh_links(other, index, None);
        }

        for side in 0..8 {
            for neighbour in self.neighbour_tiles_at(header.x, header.z, side) {
                self.connect_ext_links(index, neighbour, Some(side));
                self.connect_ext_links(neighbour, index, Some(opposite_tile(side)));
                self.connect_ext_off_mesh_links(index, neighbour, Some(side));
                self.connect_ext_off_mesh_links(neighbour, index, Some(opposite_tile(side)));
            }
        }

        debug!(x = header.x, z = header.z, layer = header.layer, slot = index, "added tile");
        Ok(self.tile_ref(index))
    }

    /// Removes a tile, unlinking it from its neighbours, and returns its data.
    ///
    /// The slot's salt is bumped, so ids into the removed tile stop being valid.
    pub fn remove_tile(&mut self, tile_ref: TileRef) -> Result<NavmeshTileData, TiledMeshError> {
        let (salt, index, _) = self.layout.decode(tile_ref.0);
        let index = index as usize;
        let header = match self.tiles.get(index) {
            Some(tile) if tile.salt == salt => match &tile.data {
                Some(data) => data.header,
                None => return Err(TiledMeshError::InvalidTileRef),
            },
            _ => return Err(TiledMeshError::InvalidTileRef),
        };

        if let Some(slots) = self.lookup.get_mut(&(header.x, header.z)) {
            slots.retain(|slot| *slot != index);
            if slots.is_empty() {
                self.lookup.remove(&(header.x, header.z));
            }
        }
        for other in self.tiles_at(header.x, header.z) {
            self.unconnect_links(other, index);
        }
        for side in 0..8 {
            for neighbour in self.neighbour_tiles_at(header.x, header.z, side) {
                self.unconnect_links(neighbour, index);
            }
        }

        let tile = &mut self.tiles[index];
        let Some(mut data) = tile.data.take() else {
            return Err(TiledMeshError::InvalidTileRef);
        };
        for poly in &mut data.polygons {
            poly.links.clear();
        }
        // Salt zero is never handed out, so a zeroed id can't match.
        tile.salt = (tile.salt + 1) & self.layout.salt_mask();
        if tile.salt == 0 {
            tile.salt = 1;
        }
        self.free.push(index);

        debug!(x = header.x, z = header.z, layer = header.layer, slot = index, "removed tile");
        Ok(data)
    }

    /// Links the polygons of a tile to each other.
    pub(crate) fn connect_int_links(&mut self, tile_index: usize) {
        let ids: Vec<PolyId> = match self.tile_data(tile_index) {
            Some(tile) => (0..tile.polygons.len())
                .map(|i| self.poly_id(tile_index, i))
                .collect(),
            None => return,
        };
        let Some(tile) = self.tiles[tile_index].data.as_mut() else {
            return;
        };
        for poly in &mut tile.polygons {
            poly.links.clear();
            if poly.is_off_mesh_connection() {
                continue;
            }
            for j in 0..poly.vertex_count as usize {
                let neighbor = poly.neighbors[j];
                // Skip hard and non-internal edges.
                if neighbor == 0 || neighbor & EXT_LINK != 0 {
                    continue;
                }
                poly.links
                    .push(Link::internal(ids[(neighbor - 1) as usize], j as u8));
            }
        }
    }

    /// Links the start points of the tile's off-mesh connections to the ground below them.
    pub(crate) fn base_off_mesh_links(&mut self, tile_index: usize) {
        let Some(tile) = self.tile_data(tile_index) else {
            return;
        };

        let mut new_links = Vec::new();
        let mut snapped = Vec::new();
        for con in &tile.off_mesh_connections {
            let half_extents = Vec3::new(con.radius, tile.header.walkable_climb, con.radius);
            let Some((nearest, nearest_point)) =
                self.find_nearest_poly_in_tile(tile_index, con.start, half_extents)
            else {
                continue;
            };
            // The nearest polygon may still be too far away on the xz-plane.
            if horizontal_distance_squared(nearest_point, con.start) > con.radius * con.radius {
                continue;
            }
            let poly = &tile.polygons[con.poly as usize];
            snapped.push((poly.vertices[0] as usize, nearest_point));

            new_links.push((con.poly as usize, Link::internal(nearest, 0)));
            // The landing polygon always links back to the connection.
            let land = self.layout.poly(nearest) as usize;
            new_links.push((
                land,
                Link::internal(self.poly_id(tile_index, con.poly as usize), 0xff),
            ));
        }

        let Some(tile) = self.tiles[tile_index].data.as_mut() else {
            return;
        };
        for (vertex, position) in snapped {
            tile.vertices[vertex] = position;
        }
        for (poly, link) in new_links {
            tile.polygons[poly].links.push(link);
        }
    }

    /// Links the end points of off-mesh connections of `target` that land in `tile_index`.
    pub(crate) fn connect_ext_off_mesh_links(
        &mut self,
        tile_index: usize,
        target_index: usize,
        side: Option<u8>,
    ) {
        let (Some(_), Some(target)) = (self.tile_data(tile_index), self.tile_data(target_index))
        else {
            return;
        };
        let opposite = side.map_or(NO_SIDE, opposite_tile);

        let mut target_links = Vec::new();
        let mut snapped = Vec::new();
        let mut tile_links = Vec::new();
        for con in &target.off_mesh_connections {
            if con.side != opposite {
                continue;
            }
            let target_poly = &target.polygons[con.poly as usize];
            // The start could not be connected, so the connection is unusable.
            if target_poly.links.is_empty() {
                continue;
            }
            let half_extents = Vec3::new(con.radius, target.header.walkable_climb, con.radius);
            let Some((nearest, nearest_point)) =
                self.find_nearest_poly_in_tile(tile_index, con.end, half_extents)
            else {
                continue;
            };
            if horizontal_distance_squared(nearest_point, con.end) > con.radius * con.radius {
                continue;
            }
            snapped.push((target_poly.vertices[1] as usize, nearest_point));
            target_links.push((
                con.poly as usize,
                Link {
                    side: opposite,
                    ..Link::internal(nearest, 1)
                },
            ));
            if con.bidirectional {
                let land = self.layout.poly(nearest) as usize;
                tile_links.push((
                    land,
                    Link {
                        side: side.unwrap_or(NO_SIDE),
                        ..Link::internal(self.poly_id(target_index, con.poly as usize), 0xff)
                    },
                ));
            }
        }

        if let Some(target) = self.tiles[target_index].data.as_mut() {
            for (vertex, position) in snapped {
                target.vertices[vertex] = position;
            }
            for (poly, link) in target_links {
                target.polygons[poly].links.push(link);
            }
        }
        if let Some(tile) = self.tiles[tile_index].data.as_mut() {
            for (poly, link) in tile_links {
                tile.polygons[poly].links.push(link);
            }
        }
    }

    /// Links the border edges of `tile_index` to the matching edges of `target_index`.
    /// With `side` set, only edges on that side of the tile are considered.
    pub(crate) fn connect_ext_links(&mut self, tile_index: usize, target_index: usize, side: Option<u8>) {
        let Some(tile) = self.tile_data(tile_index) else {
            return;
        };

        let mut new_links = Vec::new();
        for (i, poly) in tile.polygons.iter().enumerate() {
            let nv = poly.vertex_count as usize;
            for j in 0..nv {
                let neighbor = poly.neighbors[j];
                // Skip non-portal edges.
                if neighbor & EXT_LINK == 0 {
                    continue;
                }
                let dir = (neighbor & 0xff) as u8;
                if side.is_some_and(|side| side != dir) {
                    continue;
                }

                let va = tile.vertices[poly.vertices[j] as usize];
                let vb = tile.vertices[poly.vertices[(j + 1) % nv] as usize];
                for (target, cmin, cmax) in
                    self.find_connecting_polys(va, vb, target_index, opposite_tile(dir))
                {
                    let (bmin, bmax) = match dir {
                        0 | 4 => quantize_portal(cmin, cmax, va.z, vb.z),
                        2 | 6 => quantize_portal(cmin, cmax, va.x, vb.x),
                        _ => (0, 0),
                    };
                    new_links.push((
                        i,
                        Link {
                            target,
                            edge: j as u8,
                            side: dir,
                            bmin,
                            bmax,
                        },
                    ));
                }
            }
        }

        if !new_links.is_empty() {
            trace!(tile_index, target_index, links = new_links.len(), "connected tile border");
        }
        if let Some(tile) = self.tiles[tile_index].data.as_mut() {
            for (poly, link) in new_links {
                tile.polygons[poly].links.push(link);
            }
        }
    }

    /// Finds the polygons of `tile_index` with a border edge on `side` touching the segment `va -> vb`.
    /// Returns their ids and the overlapping range along the border.
    fn find_connecting_polys(
        &self,
        va: Vec3,
        vb: Vec3,
        tile_index: usize,
        side: u8,
    ) -> Vec<(PolyId, f32, f32)> {
        let mut connections = Vec::new();
        let Some(tile) = self.tile_data(tile_index) else {
            return connections;
        };

        let (amin, amax) = calc_slab_end_points(va, vb, side);
        let apos = slab_coord(va, side);
        let code = EXT_LINK | side as u16;

        for (i, poly) in tile.polygons.iter().enumerate() {
            let nv = poly.vertex_count as usize;
            for j in 0..nv {
                // Skip edges which do not point to the right side.
                if poly.neighbors[j] != code {
                    continue;
                }
                let vc = tile.vertices[poly.vertices[j] as usize];
                let vd = tile.vertices[poly.vertices[(j + 1) % nv] as usize];
                let bpos = slab_coord(vc, side);
                // Segments are not close enough.
                if (apos - bpos).abs() > 0.01 {
                    continue;
                }
                let (bmin, bmax) = calc_slab_end_points(vc, vd, side);
                if !overlap_slabs(amin, amax, bmin, bmax, 0.01, tile.header.walkable_climb) {
                    continue;
                }
                if connections.len() < MAX_CONNECTING_POLYS {
                    connections.push((
                        self.poly_id(tile_index, i),
                        amin.x.max(bmin.x),
                        amax.x.min(bmax.x),
                    ));
                }
                break;
            }
        }
        connections
    }

    /// Removes the links of `tile_index` that lead into `target_index`.
    pub(crate) fn unconnect_links(&mut self, tile_index: usize, target_index: usize) {
        let layout = self.layout;
        let Some(tile) = self.tiles.get_mut(tile_index).and_then(|t| t.data.as_mut()) else {
            return;
        };
        for poly in &mut tile.polygons {
            poly.links
                .retain(|link| layout.tile(link.target) as usize != target_index);
        }
    }

    /// Visits the polygons of a tile whose bounds overlap the query box.
    /// Off-mesh connections are never visited.
    pub(crate) fn query_polygons_in_tile(
        &self,
        tile_index: usize,
        qmin: Vec3,
        qmax: Vec3,
        mut visit: impl FnMut(PolyId, &Poly),
    ) {
        let Some(tile) = self.tile_data(tile_index) else {
            return;
        };

        if !tile.bv_tree.is_empty() {
            let bounds = tile.header.bounds;
            let factor = tile.header.bv_quant_factor;
            let min = qmin.clamp(bounds.min, bounds.max) - bounds.min;
            let max = qmax.clamp(bounds.min, bounds.max) - bounds.min;
            let bmin = U16Vec3::new(
                (factor * min.x) as u16 & 0xfffe,
                (factor * min.y) as u16 & 0xfffe,
                (factor * min.z) as u16 & 0xfffe,
            );
            let bmax = U16Vec3::new(
                (factor * max.x + 1.0) as u16 | 1,
                (factor * max.y + 1.0) as u16 | 1,
                (factor * max.z + 1.0) as u16 | 1,
            );

            let mut i = 0;
            while i < tile.bv_tree.len() {
                let node = &tile.bv_tree[i];
                let overlap = overlap_quant_bounds(bmin, bmax, node.min, node.max);
                if node.is_leaf() && overlap {
                    let poly = node.index as usize;
                    visit(self.poly_id(tile_index, poly), &tile.polygons[poly]);
                }
                if overlap || node.is_leaf() {
                    i += 1;
                } else {
                    i += (-node.index) as usize;
                }
            }
        } else {
            for (i, poly) in tile.polygons.iter().enumerate() {
                if poly.is_off_mesh_connection() {
                    continue;
                }
                let (pmin, pmax) = poly.vertex_indices().iter().fold(
                    (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
                    |(min, max), v| {
                        let v = tile.vertices[*v as usize];
                        (min.min(v), max.max(v))
                    },
                );
                if overlap_bounds(qmin, qmax, pmin, pmax) {
                    visit(self.poly_id(tile_index, i), poly);
                }
            }
        }
    }

    /// Finds the polygon of a tile nearest to `center` within the query box.
    pub(crate) fn find_nearest_poly_in_tile(
        &self,
        tile_index: usize,
        center: Vec3,
        half_extents: Vec3,
    ) -> Option<(PolyId, Vec3)> {
        let climb = self.tile_data(tile_index)?.header.walkable_climb;
        let mut candidates = Vec::new();
        self.query_polygons_in_tile(
            tile_index,
            center - half_extents,
            center + half_extents,
            |id, _| candidates.push(id),
        );

        let mut nearest = None;
        let mut nearest_distance = f32::MAX;
        for id in candidates {
            let Some((closest, over_poly)) = self.closest_point_on_poly(id, center) else {
                continue;
            };
            let d = nearest_distance_metric(center, closest, over_poly, climb);
            if d < nearest_distance {
                nearest_distance = d;
                nearest = Some((id, closest));
            }
        }
        nearest
    }

    /// The point on a polygon closest to `pos`, and whether `pos` lies over the polygon.
    ///
    /// Uses the detail mesh, so the height of the returned point is accurate.
    pub fn closest_point_on_poly(&self, id: PolyId, pos: Vec3) -> Option<(Vec3, bool)> {
        let (tile, poly) = self.tile_and_poly_by_ref(id).ok()?;
        let poly_index = self.layout.poly(id) as usize;
        if let Some(height) = poly_height(tile, poly_index, pos) {
            return Some((Vec3::new(pos.x, height, pos.z), true));
        }

        // Off-mesh connections don't have detail polygons.
        if poly.is_off_mesh_connection() {
            let v0 = tile.vertices[poly.vertices[0] as usize];
            let v1 = tile.vertices[poly.vertices[1] as usize];
            let (_, t) = distance_pt_seg_sqr_2d(pos, v0, v1);
            return Some((v0.lerp(v1, t), false));
        }

        Some((closest_point_on_detail_edges(tile, poly_index, pos, true), false))
    }

    /// The height of the detail mesh of a polygon at `pos`, if `pos` lies over the polygon.
    pub fn poly_height(&self, id: PolyId, pos: Vec3) -> Option<f32> {
        let (tile, _) = self.tile_and_poly_by_ref(id).ok()?;
        poly_height(tile, self.layout.poly(id) as usize, pos)
    }
}

/// The height of the detail mesh of ground polygon `poly_index` at `pos`.
pub(crate) fn poly_height(tile: &NavmeshTileData, poly_index: usize, pos: Vec3) -> Option<f32> {
    let poly = &tile.polygons[poly_index];
    // Off-mesh connections have no surface to stand on.
    if poly.is_off_mesh_connection() {
        return None;
    }
    let vertices = tile.poly_vertices(poly);
    if !point_in_polygon(pos, &vertices) {
        return None;
    }

    for triangle in tile.detail_triangles_of(poly_index) {
        let [a, b, c] = tile.detail_triangle_vertices(poly_index, triangle);
        if let Some(height) = closest_height_point_triangle(pos, a, b, c) {
            return Some(height);
        }
    }

    // Degenerate triangles or large coordinates can make all triangle tests fail,
    // the point is on an edge then.
    Some(closest_point_on_detail_edges(tile, poly_index, pos, false).y)
}

/// The point on the detail edges of a polygon closest to `pos`.
fn closest_point_on_detail_edges(
    tile: &NavmeshTileData,
    poly_index: usize,
    pos: Vec3,
    only_boundary: bool,
) -> Vec3 {
    const ANY_BOUNDARY_EDGE: u8 = 1 | (1 << 2) | (1 << 4);

    let mut nearest_distance = f32::MAX;
    let mut nearest = None;
    for triangle in tile.detail_triangles_of(poly_index) {
        if only_boundary && triangle.edge_flags & ANY_BOUNDARY_EDGE == 0 {
            continue;
        }
        let vertices = tile.detail_triangle_vertices(poly_index, triangle);
        let mut j = 2;
        for k in 0..3 {
            // Inner edges are seen twice, so only look at them once.
            if !triangle.is_boundary_edge(j)
                && (only_boundary || triangle.vertices[j] < triangle.vertices[k])
            {
                j = k;
                continue;
            }
            let (d, t) = distance_pt_seg_sqr_2d(pos, vertices[j], vertices[k]);
            if d < nearest_distance {
                nearest_distance = d;
                nearest = Some((vertices[j], vertices[k], t));
            }
            j = k;
        }
    }
    nearest.map_or(pos, |(a, b, t)| a.lerp(b, t))
}

/// The distance used to rank candidate polygons for nearest polygon queries.
///
/// A point directly over a polygon and within climb height of it counts as being on it.
pub(crate) fn nearest_distance_metric(center: Vec3, closest: Vec3, over_poly: bool, climb: f32) -> f32 {
    let diff = center - closest;
    if over_poly {
        let d = diff.y.abs() - climb;
        if d > 0.0 { d * d } else { 0.0 }
    } else {
        diff.length_squared()
    }
}

fn horizontal_distance_squared(a: Vec3, b: Vec3) -> f32 {
    let dx = a.x - b.x;
    let dz = a.z - b.z;
    dx * dx + dz * dz
}

/// The side across the tile from `side`.
pub(crate) fn opposite_tile(side: u8) -> u8 {
    (side + 4) & 0x7
}

fn quantize_portal(cmin: f32, cmax: f32, a: f32, b: f32) -> (u8, u8) {
    let mut tmin = (cmin - a) / (b - a);
    let mut tmax = (cmax - a) / (b - a);
    if tmin > tmax {
        std::mem::swap(&mut tmin, &mut tmax);
    }
    let quantize = |t: f32| (t.clamp(0.0, 1.0) * 255.0).round() as u8;
    (quantize(tmin), quantize(tmax))
}

fn slab_coord(v: Vec3, side: u8) -> f32 {
    match side {
        0 | 4 => v.x,
        2 | 6 => v.z,
        _ => 0.0,
    }
}

/// The end points of a border edge as (position along the border, height), ordered along the border.
fn calc_slab_end_points(va: Vec3, vb: Vec3, side: u8) -> (Vec2, Vec2) {
    match side {
        0 | 4 => {
            if va.z < vb.z {
                (Vec2::new(va.z, va.y), Vec2::new(vb.z, vb.y))
            } else {
                (Vec2::new(vb.z, vb.y), Vec2::new(va.z, va.y))
            }
        }
        2 | 6 => {
            if va.x < vb.x {
                (Vec2::new(va.x, va.y), Vec2::new(vb.x, vb.y))
            } else {
                (Vec2::new(vb.x, vb.y), Vec2::new(va.x, va.y))
            }
        }
        _ => (Vec2::ZERO, Vec2::ZERO),
    }
}

/// Checks whether two border edges overlap along the border and are within `py` of each other vertically.
/// The edges are shrunk by `px` so that edges touching only at their end points don't connect.
fn overlap_slabs(amin: Vec2, amax: Vec2, bmin: Vec2, bmax: Vec2, px: f32, py: f32) -> bool {
    let minx = (amin.x + px).max(bmin.x + px);
    let maxx = (amax.x - px).min(bmax.x - px);
    if minx > maxx {
        return false;
    }

    // Vertical overlap.
    let ad = (amax.y - amin.y) / (amax.x - amin.x);
    let ak = amin.y - ad * amin.x;
    let bd = (bmax.y - bmin.y) / (bmax.x - bmin.x);
    let bk = bmin.y - bd * bmin.x;
    let aminy = ad * minx + ak;
    let amaxy = ad * maxx + ak;
    let bminy = bd * minx + bk;
    let bmaxy = bd * maxx + bk;
    let dmin = bminy - aminy;
    let dmax = bmaxy - amaxy;

    // Crossing segments always overlap.
    if dmin * dmax < 0.0 {
        return true;
    }
    let threshold = (py * 2.0) * (py * 2.0);
    dmin * dmin <= threshold || dmax * dmax <= threshold
}

fn overlap_quant_bounds(amin: U16Vec3, amax: U16Vec3, bmin: U16Vec3, bmax: U16Vec3) -> bool {
    !(amin.x > bmax.x || amax.x < bmin.x)
        && !(amin.y > bmax.y || amax.y < bmin.y)
        && !(amin.z > bmax.z || amax.z < bmin.z)
}

pub(crate) fn overlap_bounds(amin: Vec3, amax: Vec3, bmin: Vec3, bmax: Vec3) -> bool {
    !(amin.x > bmax.x || amax.x < bmin.x)
        && !(amin.y > bmax.y || amax.y < bmin.y)
        && !(amin.z > bmax.z || amax.z < bmin.z)
}

/// Errors of [`TiledMesh`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TiledMeshError {
    /// The tile size or capacity is invalid, or too few bits remain for the salt.
    #[error("Invalid tiled mesh parameters")]
    InvalidParams,
    /// A tile already occupies the location.
    #[error("A tile already occupies ({x}, {z}) on layer {layer}")]
    AlreadyOccupied {
        /// The x position in the tile grid.
        x: i32,
        /// The z position in the tile grid.
        z: i32,
        /// The layer.
        layer: i32,
    },
    /// Every tile slot is in use.
    #[error("All tile slots are in use")]
    OutOfTiles,
    /// The tile has more polygons than a [`PolyId`] can address.
    #[error("The tile has {polygons} polygons, but at most {max} are supported")]
    TooManyPolygons {
        /// Polygons in the tile.
        polygons: usize,
        /// The maximum.
        max: usize,
    },
    /// The handle does not refer to a tile of the mesh.
    #[error("The tile handle is stale or invalid")]
    InvalidTileRef,
}

impl From<TiledMeshError> for Status {
    fn from(error: TiledMeshError) -> Self {
        match error {
            TiledMeshError::AlreadyOccupied { .. } => Status::FAILURE | StatusDetail::ALREADY_OCCUPIED,
            TiledMeshError::OutOfTiles => Status::FAILURE | StatusDetail::OUT_OF_MEMORY,
            _ => Status::invalid_param(),
        }
    }
}

#[cfg(test)]
mod tests {
    use waymark::{AreaType, RC_MESH_NULL_IDX};

    use super::*;
    use crate::tile::{
        OffMeshConnectionParams, TileBuildParams,
        tests::{square_mesh, strip_mesh},
    };

    fn params(max_tiles: u32) -> TiledMeshParams {
        TiledMeshParams {
            origin: Vec3::ZERO,
            tile_width: 10.0,
            tile_height: 10.0,
            max_tiles,
            max_polys: 64,
        }
    }

    fn tile(mesh: &waymark::PolygonNavmesh, x: i32, z: i32) -> NavmeshTileData {
        NavmeshTileData::new(&TileBuildParams {
            tile_x: x,
            tile_z: z,
            ..TileBuildParams::new(mesh, None, 2.0, 0.5, 1.0)
        })
        .unwrap()
    }

    /// Two 10x10 tiles side by side along x, sharing their whole border edge.
    fn two_tiles() -> (TiledMesh, TileRef, TileRef) {
        let left = square_mesh(Vec3::ZERO, 10, [RC_MESH_NULL_IDX, RC_MESH_NULL_IDX, 0x8002, RC_MESH_NULL_IDX]);
        let right = square_mesh(
            Vec3::new(10.0, 0.0, 0.0),
            10,
            [0x8000, RC_MESH_NULL_IDX, RC_MESH_NULL_IDX, RC_MESH_NULL_IDX],
        );
        let mut mesh = TiledMesh::new(params(4)).unwrap();
        let a = mesh.add_tile(tile(&left, 0, 0)).unwrap();
        let b = mesh.add_tile(tile(&right, 1, 0)).unwrap();
        (mesh, a, b)
    }

    #[test]
    fn internal_links_follow_neighbour_codes() {
        let mut mesh = TiledMesh::new(params(1)).unwrap();
        let tile_ref = mesh.add_tile(tile(&strip_mesh(3), 0, 0)).unwrap();
        let data = mesh.tile_by_ref(tile_ref).unwrap();
        assert_eq!(data.polygons[0].links.len(), 1);
        assert_eq!(data.polygons[1].links.len(), 2);
        assert_eq!(data.polygons[1].links[0].target, mesh.poly_id(0, 0));
        assert_eq!(data.polygons[1].links[0].edge, 0);
        assert_eq!(data.polygons[1].links[1].target, mesh.poly_id(0, 2));
        assert_eq!(data.polygons[1].links[1].side, NO_SIDE);
    }

    #[test]
    fn full_border_edges_link_both_ways() {
        let (mesh, a, b) = two_tiles();
        let left = mesh.tile_by_ref(a).unwrap();
        let right = mesh.tile_by_ref(b).unwrap();

        let link = left.polygons[0].links[0];
        assert_eq!(link.target, PolyId::from_bits(b.bits()));
        assert_eq!(link.side, 0);
        assert_eq!(link.edge, 2);
        assert_eq!((link.bmin, link.bmax), (0, 255));

        let back = right.polygons[0].links[0];
        assert_eq!(back.target, PolyId::from_bits(a.bits()));
        assert_eq!(back.side, 4);
        assert_eq!((back.bmin, back.bmax), (0, 255));
    }

    #[test]
    fn partial_border_edges_quantize_the_overlap() {
        let left = square_mesh(Vec3::ZERO, 10, [RC_MESH_NULL_IDX, RC_MESH_NULL_IDX, 0x8002, RC_MESH_NULL_IDX]);
        // Only covers z in 0..5 of the shared border.
        let right = square_mesh(
            Vec3::new(10.0, 0.0, 0.0),
            5,
            [0x8000, RC_MESH_NULL_IDX, RC_MESH_NULL_IDX, RC_MESH_NULL_IDX],
        );
        let mut mesh = TiledMesh::new(params(4)).unwrap();
        let a = mesh.add_tile(tile(&left, 0, 0)).unwrap();
        mesh.add_tile(tile(&right, 1, 0)).unwrap();

        let link = mesh.tile_by_ref(a).unwrap().polygons[0].links[0];
        // The left edge runs from z = 10 down to z = 0, so the lower half is 0.5..1.
        assert_eq!((link.bmin, link.bmax), (128, 255));
    }

    #[test]
    fn removing_a_tile_unlinks_and_invalidates() {
        let (mut mesh, a, b) = two_tiles();
        let stale = PolyId::from_bits(b.bits());
        assert!(mesh.is_valid_poly_ref(stale));

        let data = mesh.remove_tile(b).unwrap();
        assert!(data.polygons[0].links.is_empty());
        assert!(mesh.tile_by_ref(a).unwrap().polygons[0].links.is_empty());
        assert!(!mesh.is_valid_poly_ref(stale));

        // The slot is reused, but with a new salt.
        let rebuilt = mesh.add_tile(data).unwrap();
        assert_ne!(rebuilt, b);
        assert_eq!(mesh.layout().tile(PolyId::from_bits(rebuilt.bits())), 1);
        assert!(!mesh.is_valid_poly_ref(stale));
        assert!(mesh.is_valid_poly_ref(PolyId::from_bits(rebuilt.bits())));
        assert_eq!(mesh.tile_by_ref(a).unwrap().polygons[0].links.len(), 1);
        assert_eq!(mesh.remove_tile(b), Err(TiledMeshError::InvalidTileRef));
    }

    #[test]
    fn occupied_and_full() {
        let mesh_data = square_mesh(Vec3::ZERO, 10, [RC_MESH_NULL_IDX; 4]);
        let mut mesh = TiledMesh::new(params(1)).unwrap();
        mesh.add_tile(tile(&mesh_data, 0, 0)).unwrap();
        assert_eq!(
            mesh.add_tile(tile(&mesh_data, 0, 0)),
            Err(TiledMeshError::AlreadyOccupied { x: 0, z: 0, layer: 0 })
        );
        assert_eq!(mesh.add_tile(tile(&mesh_data, 1, 0)), Err(TiledMeshError::OutOfTiles));
        let status: Status = TiledMeshError::OutOfTiles.into();
        assert!(status.is_failure());
    }

    #[test]
    fn closest_point_snaps_to_the_border() {
        let (mesh, a, _) = two_tiles();
        let id = PolyId::from_bits(a.bits());
        let (point, over) = mesh.closest_point_on_poly(id, Vec3::new(5.0, 3.0, 5.0)).unwrap();
        assert!(over);
        assert_eq!(point, Vec3::new(5.0, 0.0, 5.0));
        let (point, over) = mesh.closest_point_on_poly(id, Vec3::new(-2.0, 0.0, 5.0)).unwrap();
        assert!(!over);
        assert!(point.distance(Vec3::new(0.0, 0.0, 5.0)) < 1e-4);
    }

    #[test]
    fn off_mesh_connections_link_both_ends() {
        // Two separate islands in the same tile, joined by a bidirectional connection.
        let mut island = strip_mesh(3);
        // Isolate the middle square.
        let nvp = island.vertices_per_polygon;
        island.polygons[nvp + 2] = RC_MESH_NULL_IDX;
        island.polygons[3 * nvp] = RC_MESH_NULL_IDX;
        island.polygons[3 * nvp + 2] = RC_MESH_NULL_IDX;
        island.polygons[5 * nvp] = RC_MESH_NULL_IDX;
        let connection = OffMeshConnectionParams {
            start: Vec3::new(0.5, 0.0, 0.5),
            end: Vec3::new(2.5, 0.0, 0.5),
            radius: 0.4,
            bidirectional: true,
            area: AreaType::DEFAULT_WALKABLE,
            flags: 1,
            user_id: 3,
        };
        let data = NavmeshTileData::new(&TileBuildParams {
            off_mesh_connections: &[connection],
            ..TileBuildParams::new(&island, None, 2.0, 0.5, 1.0)
        })
        .unwrap();
        let mut mesh = TiledMesh::new(TiledMeshParams {
            tile_width: 3.0,
            tile_height: 1.0,
            ..params(1)
        })
        .unwrap();
        let tile_ref = mesh.add_tile(data).unwrap();
        let data = mesh.tile_by_ref(tile_ref).unwrap();
        let con_poly = &data.polygons[3];
        assert!(con_poly.is_off_mesh_connection());
        assert_eq!(con_poly.links.len(), 2);
        assert_eq!(con_poly.links[0].target, mesh.poly_id(0, 0));
        assert_eq!(con_poly.links[1].target, mesh.poly_id(0, 2));
        assert!(data.polygons[0].links.iter().any(|l| l.target == mesh.poly_id(0, 3)));
        assert!(data.polygons[2].links.iter().any(|l| l.target == mesh.poly_id(0, 3)));

        let con_id = mesh.poly_id(0, 3);
        assert_eq!(mesh.off_mesh_connection_by_ref(con_id).unwrap().user_id, 3);
        let (start, end) = mesh
            .off_mesh_connection_poly_end_points(mesh.poly_id(0, 2), con_id)
            .unwrap();
        assert_eq!(start.x, 2.5);
        assert_eq!(end.x, 0.5);
    }
}
