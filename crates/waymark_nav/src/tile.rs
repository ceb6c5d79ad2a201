use glam::{U16Vec3, Vec3};
use thiserror::Error;
use tracing::debug;
use waymark::{
    Aabb3d, AreaType, DetailNavmesh, DetailTriangle, MAX_VERTICES_PER_POLYGON, PolygonNavmesh,
};

use crate::poly_id::PolyId;

/// The maximum number of vertices of a runtime polygon.
pub const VERTS_PER_POLYGON: usize = MAX_VERTICES_PER_POLYGON;

/// Set in a polygon neighbour code if the edge lies on the tile border.
/// The low bits hold the side of the tile, see [`Link::side`].
pub const EXT_LINK: u16 = 0x8000;

/// The value of [`Link::side`] for links that do not cross a tile border.
pub const NO_SIDE: u8 = 0xff;

/// The kind of a [`Poly`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum PolyType {
    /// A regular walkable polygon.
    #[default]
    Ground,
    /// A two vertex polygon standing in for an off-mesh connection.
    OffMeshConnection,
}

/// A directed connection from one polygon to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Link {
    /// The polygon the link leads to.
    pub target: PolyId,
    /// The edge of the owning polygon the link crosses.
    /// For off-mesh connections this is the index of the connection end point.
    pub edge: u8,
    /// The tile side the link crosses, or [`NO_SIDE`].
    ///
    /// Sides are numbered counter clockwise starting at `+x`: 0 is `+x`, 2 is `+z`,
    /// 4 is `-x` and 6 is `-z`, the odd values are the diagonals.
    pub side: u8,
    /// Start of the connected part of the edge, quantized to `0..=255`.
    pub bmin: u8,
    /// End of the connected part of the edge, quantized to `0..=255`.
    pub bmax: u8,
}

impl Link {
    pub(crate) fn internal(target: PolyId, edge: u8) -> Self {
        Self {
            target,
            edge,
            side: NO_SIDE,
            bmin: 0,
            bmax: 0,
        }
    }
}

/// A convex polygon of a tile.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Poly {
    /// Indices into [`NavmeshTileData::vertices`]. Only the first [`Poly::vertex_count`] are used.
    pub vertices: [u16; VERTS_PER_POLYGON],
    /// Per edge: 0 for a solid edge, `index + 1` for a polygon of the same tile,
    /// or [`EXT_LINK`]` | side` for an edge on the tile border.
    pub neighbors: [u16; VERTS_PER_POLYGON],
    /// The number of used vertices.
    pub vertex_count: u8,
    /// User defined flags, matched by the query filters.
    pub flags: u16,
    /// The area type, used for traversal costs.
    pub area: AreaType,
    /// Whether this is a ground polygon or an off-mesh connection.
    pub poly_type: PolyType,
    /// The connections to other polygons. Filled in when the tile is added to a
    /// [`TiledMesh`](crate::TiledMesh).
    pub links: Vec<Link>,
}

impl Poly {
    /// The used vertex indices.
    #[inline]
    pub fn vertex_indices(&self) -> &[u16] {
        &self.vertices[..self.vertex_count as usize]
    }

    /// The used neighbour codes.
    #[inline]
    pub fn neighbor_codes(&self) -> &[u16] {
        &self.neighbors[..self.vertex_count as usize]
    }

    /// Returns `true` if the polygon is an off-mesh connection.
    #[inline]
    pub fn is_off_mesh_connection(&self) -> bool {
        self.poly_type == PolyType::OffMeshConnection
    }
}

/// The detail triangles of a ground polygon.
///
/// Triangle vertex indices below the polygon's vertex count refer to the polygon's own
/// vertices, the others to [`NavmeshTileData::detail_vertices`] starting at
/// [`PolyDetail::first_vertex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolyDetail {
    /// The first extra vertex.
    pub first_vertex: u32,
    /// The first triangle in [`NavmeshTileData::detail_triangles`].
    pub first_triangle: u32,
    /// The number of extra vertices.
    pub vertex_count: u8,
    /// The number of triangles.
    pub triangle_count: u8,
}

/// A node of the bounding volume tree of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct BvNode {
    /// Quantized minimum bounds.
    pub min: U16Vec3,
    /// Quantized maximum bounds.
    pub max: U16Vec3,
    /// The polygon index for leaves, the negated escape offset for internal nodes.
    pub index: i32,
}

impl BvNode {
    /// Returns `true` for nodes that hold a polygon.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.index >= 0
    }
}

/// An off-mesh connection as stored in a tile.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct OffMeshConnection {
    /// The start point.
    pub start: Vec3,
    /// The end point.
    pub end: Vec3,
    /// The radius within which the end points snap to the mesh.
    pub radius: f32,
    /// The index of the polygon standing in for the connection.
    pub poly: u16,
    /// Whether the connection can be traversed from end to start too.
    pub bidirectional: bool,
    /// The tile side the end point lies on, or [`NO_SIDE`] if it is inside the tile.
    pub side: u8,
    /// User defined data.
    pub user_id: u32,
}

/// An off-mesh connection to be packed into tiles.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct OffMeshConnectionParams {
    /// The start point.
    pub start: Vec3,
    /// The end point.
    pub end: Vec3,
    /// The radius within which the end points snap to the mesh.
    pub radius: f32,
    /// Whether the connection can be traversed from end to start too.
    pub bidirectional: bool,
    /// The area type of the connection polygon.
    pub area: AreaType,
    /// The flags of the connection polygon.
    pub flags: u16,
    /// User defined data.
    pub user_id: u32,
}

/// Information about a tile.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TileHeader {
    /// The x position of the tile in the tile grid.
    pub x: i32,
    /// The z position of the tile in the tile grid.
    pub z: i32,
    /// The layer of the tile within its grid cell.
    pub layer: i32,
    /// User defined data.
    pub user_id: u32,
    /// The agent height the tile was built for. [Units: wu]
    pub walkable_height: f32,
    /// The agent radius the tile was built for. [Units: wu]
    pub walkable_radius: f32,
    /// The agent climb the tile was built for. [Units: wu]
    pub walkable_climb: f32,
    /// The bounds of the tile.
    pub bounds: Aabb3d,
    /// Converts world units relative to [`TileHeader::bounds`] to BV tree units.
    pub bv_quant_factor: f32,
    /// The index of the first off-mesh connection polygon.
    pub off_mesh_base: usize,
}

/// The runtime representation of a single tile.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshTileData {
    /// Information about the tile.
    pub header: TileHeader,
    /// Polygon vertices in world space. The end points of off-mesh connections follow the ground vertices.
    pub vertices: Vec<Vec3>,
    /// Ground polygons followed by off-mesh connection polygons.
    pub polygons: Vec<Poly>,
    /// One entry per ground polygon.
    pub detail_meshes: Vec<PolyDetail>,
    /// Extra detail vertices in world space.
    pub detail_vertices: Vec<Vec3>,
    /// Detail triangles.
    pub detail_triangles: Vec<DetailTriangle>,
    /// The bounding volume tree of the ground polygons. Empty if none was built.
    pub bv_tree: Vec<BvNode>,
    /// The off-mesh connections starting in this tile.
    pub off_mesh_connections: Vec<OffMeshConnection>,
}

/// Input of [`NavmeshTileData::new`].
#[derive(Debug, Clone, Copy)]
pub struct TileBuildParams<'a> {
    /// The polygons of the tile.
    pub polygons: &'a PolygonNavmesh,
    /// Their height detail. Without one, each polygon is fan triangulated.
    pub detail: Option<&'a DetailNavmesh>,
    /// Off-mesh connections. Only those starting inside the tile are stored.
    pub off_mesh_connections: &'a [OffMeshConnectionParams],
    /// The agent height. [Units: wu]
    pub walkable_height: f32,
    /// The agent radius. [Units: wu]
    pub walkable_radius: f32,
    /// The agent climb. [Units: wu]
    pub walkable_climb: f32,
    /// The x position of the tile in the tile grid.
    pub tile_x: i32,
    /// The z position of the tile in the tile grid.
    pub tile_z: i32,
    /// The layer of the tile.
    pub tile_layer: i32,
    /// User defined data.
    pub user_id: u32,
    /// Whether to build a bounding volume tree for faster polygon lookups.
    pub build_bv_tree: bool,
}

impl<'a> TileBuildParams<'a> {
    /// Parameters for the tile at (0, 0) with the given agent dimensions.
    pub fn new(
        polygons: &'a PolygonNavmesh,
        detail: Option<&'a DetailNavmesh>,
        walkable_height: f32,
        walkable_radius: f32,
        walkable_climb: f32,
    ) -> Self {
        Self {
            polygons,
            detail,
            off_mesh_connections: &[],
            walkable_height,
            walkable_radius,
            walkable_climb,
            tile_x: 0,
            tile_z: 0,
            tile_layer: 0,
            user_id: 0,
            build_bv_tree: true,
        }
    }
}

impl NavmeshTileData {
    /// Packs a polygon mesh and its detail mesh into a tile.
    pub fn new(params: &TileBuildParams) -> Result<Self, TileBuildError> {
        let mesh = params.polygons;
        let nvp = mesh.vertices_per_polygon;
        if !(3..=VERTS_PER_POLYGON).contains(&nvp) {
            return Err(TileBuildError::InvalidVerticesPerPolygon(nvp));
        }
        if mesh.vertices.is_empty() || mesh.polygon_count() == 0 {
            return Err(TileBuildError::EmptyPolygonMesh);
        }
        if let Some(detail) = params.detail {
            if detail.meshes.len() != mesh.polygon_count() {
                return Err(TileBuildError::DetailMeshMismatch {
                    polygons: mesh.polygon_count(),
                    detail_meshes: detail.meshes.len(),
                });
            }
        }

        let origin = mesh.aabb.min;
        let to_world = |v: U16Vec3| {
            origin
                + Vec3::new(
                    v.x as f32 * mesh.cell_size,
                    v.y as f32 * mesh.cell_height,
                    v.z as f32 * mesh.cell_size,
                )
        };

        // Off-mesh connections are only stored in the tile their start point lies in.
        let classes = classify_off_mesh_connections(params);
        let stored: Vec<(&OffMeshConnectionParams, u8)> = params
            .off_mesh_connections
            .iter()
            .zip(&classes)
            .filter(|(_, (start, _))| *start == NO_SIDE)
            .map(|(con, (_, end))| (con, *end))
            .collect();

        let vertex_count = mesh.vertices.len() + stored.len() * 2;
        if vertex_count >= 0xffff {
            return Err(TileBuildError::TooManyVertices(vertex_count));
        }

        let mut vertices: Vec<Vec3> = mesh.vertices.iter().map(|v| to_world(*v)).collect();
        let mut polygons = Vec::with_capacity(mesh.polygon_count() + stored.len());
        for i in 0..mesh.polygon_count() {
            let source_vertices = mesh.polygon_vertices(i);
            let source_neighbors = mesh.polygon_neighbors(i);
            let mut poly = Poly {
                vertex_count: source_vertices.len() as u8,
                flags: mesh.flags[i],
                area: mesh.areas[i],
                ..Default::default()
            };
            poly.vertices[..source_vertices.len()].copy_from_slice(source_vertices);
            for (j, neighbor) in source_neighbors.iter().enumerate() {
                poly.neighbors[j] = convert_neighbor_code(*neighbor);
            }
            polygons.push(poly);
        }

        let off_mesh_base = polygons.len();
        let mut off_mesh_connections = Vec::with_capacity(stored.len());
        for (n, (con, end_side)) in stored.iter().enumerate() {
            let first = vertices.len() as u16;
            vertices.push(con.start);
            vertices.push(con.end);
            let mut poly = Poly {
                vertex_count: 2,
                flags: con.flags,
                area: con.area,
                poly_type: PolyType::OffMeshConnection,
                ..Default::default()
            };
            poly.vertices[0] = first;
            poly.vertices[1] = first + 1;
            polygons.push(poly);
            off_mesh_connections.push(OffMeshConnection {
                start: con.start,
                end: con.end,
                radius: con.radius,
                poly: (off_mesh_base + n) as u16,
                bidirectional: con.bidirectional,
                side: *end_side,
                user_id: con.user_id,
            });
        }

        let (detail_meshes, detail_vertices, detail_triangles) = match params.detail {
            Some(detail) => pack_detail_mesh(mesh, detail),
            None => fan_detail_mesh(mesh),
        };

        let bv_tree = if params.build_bv_tree {
            build_bv_tree(mesh, params.detail)
        } else {
            Vec::new()
        };

        debug!(
            x = params.tile_x,
            z = params.tile_z,
            polygons = polygons.len(),
            off_mesh_connections = off_mesh_connections.len(),
            bv_nodes = bv_tree.len(),
            "packed tile"
        );

        Ok(Self {
            header: TileHeader {
                x: params.tile_x,
                z: params.tile_z,
                layer: params.tile_layer,
                user_id: params.user_id,
                walkable_height: params.walkable_height,
                walkable_radius: params.walkable_radius,
                walkable_climb: params.walkable_climb,
                bounds: mesh.aabb,
                bv_quant_factor: 1.0 / mesh.cell_size,
                off_mesh_base,
            },
            vertices,
            polygons,
            detail_meshes,
            detail_vertices,
            detail_triangles,
            bv_tree,
            off_mesh_connections,
        })
    }

    /// The world space vertices of a polygon.
    pub fn poly_vertices(&self, poly: &Poly) -> Vec<Vec3> {
        poly.vertex_indices()
            .iter()
            .map(|i| self.vertices[*i as usize])
            .collect()
    }

    /// The world space vertices of the detail triangle `triangle` of the ground polygon `poly_index`.
    pub fn detail_triangle_vertices(&self, poly_index: usize, triangle: &DetailTriangle) -> [Vec3; 3] {
        let poly = &self.polygons[poly_index];
        let detail = &self.detail_meshes[poly_index];
        triangle.vertices.map(|v| {
            if v < poly.vertex_count {
                self.vertices[poly.vertices[v as usize] as usize]
            } else {
                self.detail_vertices[detail.first_vertex as usize + (v - poly.vertex_count) as usize]
            }
        })
    }

    /// The detail triangles of the ground polygon `poly_index`.
    pub fn detail_triangles_of(&self, poly_index: usize) -> &[DetailTriangle] {
        let detail = &self.detail_meshes[poly_index];
        let first = detail.first_triangle as usize;
        &self.detail_triangles[first..first + detail.triangle_count as usize]
    }
}

/// Maps the border codes of the build pipeline (`0x8000 | dir`, dir counting
/// `-x, +z, +x, -z`) to tile sides.
fn convert_neighbor_code(neighbor: u16) -> u16 {
    if neighbor & 0x8000 == 0 {
        return neighbor + 1;
    }
    match neighbor & 0xf {
        0 => EXT_LINK | 4,
        1 => EXT_LINK | 2,
        2 => EXT_LINK,
        3 => EXT_LINK | 6,
        // Solid edge, `RC_MESH_NULL_IDX` lands here too.
        _ => 0,
    }
}

/// Classifies start and end of each off-mesh connection against the tile bounds.
/// [`NO_SIDE`] means inside. Start points far above or below the tile count as outside.
fn classify_off_mesh_connections(params: &TileBuildParams) -> Vec<(u8, u8)> {
    if params.off_mesh_connections.is_empty() {
        return Vec::new();
    }
    let mesh = params.polygons;

    // Tight height bounds, used to cull start points that can't touch the mesh.
    let heights: Box<dyn Iterator<Item = f32>> = match params.detail {
        Some(detail) if !detail.vertices.is_empty() => Box::new(detail.vertices.iter().map(|v| v.y)),
        _ => Box::new(
            mesh.vertices
                .iter()
                .map(|v| mesh.aabb.min.y + v.y as f32 * mesh.cell_height),
        ),
    };
    let (hmin, hmax) = heights.fold((f32::MAX, f32::MIN), |(min, max), h| (min.min(h), max.max(h)));
    let mut bounds = mesh.aabb;
    bounds.min.y = hmin - params.walkable_climb;
    bounds.max.y = hmax + params.walkable_climb;

    params
        .off_mesh_connections
        .iter()
        .map(|con| {
            let mut start = classify_off_mesh_point(con.start, &bounds);
            let end = classify_off_mesh_point(con.end, &bounds);
            if start == NO_SIDE && (con.start.y < bounds.min.y || con.start.y > bounds.max.y) {
                start = 0;
            }
            (start, end)
        })
        .collect()
}

fn classify_off_mesh_point(point: Vec3, bounds: &Aabb3d) -> u8 {
    const XP: u8 = 1 << 0;
    const ZP: u8 = 1 << 1;
    const XM: u8 = 1 << 2;
    const ZM: u8 = 1 << 3;

    let mut outcode = 0;
    if point.x >= bounds.max.x {
        outcode |= XP;
    }
    if point.z >= bounds.max.z {
        outcode |= ZP;
    }
    if point.x < bounds.min.x {
        outcode |= XM;
    }
    if point.z < bounds.min.z {
        outcode |= ZM;
    }

    match outcode {
        XP => 0,
        o if o == XP | ZP => 1,
        ZP => 2,
        o if o == XM | ZP => 3,
        XM => 4,
        o if o == XM | ZM => 5,
        ZM => 6,
        o if o == XP | ZM => 7,
        _ => NO_SIDE,
    }
}

/// Copies the detail mesh, dropping the vertices that duplicate polygon vertices.
fn pack_detail_mesh(
    mesh: &PolygonNavmesh,
    detail: &DetailNavmesh,
) -> (Vec<PolyDetail>, Vec<Vec3>, Vec<DetailTriangle>) {
    let mut detail_meshes = Vec::with_capacity(detail.meshes.len());
    let mut detail_vertices = Vec::new();
    for (i, sub_mesh) in detail.meshes.iter().enumerate() {
        let poly_vertex_count = mesh.polygon_vertices(i).len();
        let extra = sub_mesh.vertex_count.saturating_sub(poly_vertex_count);
        detail_meshes.push(PolyDetail {
            first_vertex: detail_vertices.len() as u32,
            first_triangle: sub_mesh.first_triangle_index as u32,
            vertex_count: extra as u8,
            triangle_count: sub_mesh.triangle_count as u8,
        });
        let first = sub_mesh.first_vertex_index + poly_vertex_count;
        detail_vertices.extend(
            detail.vertices[first..first + extra]
                .iter()
                .map(|v| Vec3::from(*v)),
        );
    }
    (detail_meshes, detail_vertices, detail.triangles.clone())
}

/// Fan triangulates each polygon when no detail mesh is available.
fn fan_detail_mesh(mesh: &PolygonNavmesh) -> (Vec<PolyDetail>, Vec<Vec3>, Vec<DetailTriangle>) {
    let mut detail_meshes = Vec::with_capacity(mesh.polygon_count());
    let mut triangles = Vec::new();
    for i in 0..mesh.polygon_count() {
        let nv = mesh.polygon_vertices(i).len();
        detail_meshes.push(PolyDetail {
            first_vertex: 0,
            first_triangle: triangles.len() as u32,
            vertex_count: 0,
            triangle_count: (nv - 2) as u8,
        });
        for j in 2..nv {
            // The middle edge always lies on the polygon, the others only at the ends of the fan.
            let mut edge_flags = 1 << 2;
            if j == 2 {
                edge_flags |= 1;
            }
            if j == nv - 1 {
                edge_flags |= 1 << 4;
            }
            triangles.push(DetailTriangle {
                vertices: [0, (j - 1) as u8, j as u8],
                edge_flags,
            });
        }
    }
    (detail_meshes, Vec::new(), triangles)
}

#[derive(Debug, Clone, Copy)]
struct BvItem {
    min: U16Vec3,
    max: U16Vec3,
    index: i32,
}

/// Builds the bounding volume tree of the ground polygons.
///
/// Nodes are quantized to cell size units relative to the tile origin and stored depth first.
/// Internal nodes store the negated number of nodes in their subtree, so a query skips a
/// subtree by jumping ahead that many nodes.
fn build_bv_tree(mesh: &PolygonNavmesh, detail: Option<&DetailNavmesh>) -> Vec<BvNode> {
    let quant_factor = 1.0 / mesh.cell_size;
    let mut items: Vec<BvItem> = (0..mesh.polygon_count())
        .map(|i| {
            let (min, max) = match detail {
                Some(detail) => {
                    let sub_mesh = &detail.meshes[i];
                    let vertices = &detail.vertices
                        [sub_mesh.first_vertex_index..sub_mesh.first_vertex_index + sub_mesh.vertex_count];
                    let (min, max) = vertices.iter().fold(
                        (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
                        |(min, max), v| (min.min(Vec3::from(*v)), max.max(Vec3::from(*v))),
                    );
                    let quantize = |v: Vec3| {
                        let q = ((v - mesh.aabb.min) * quant_factor).clamp(Vec3::ZERO, Vec3::splat(65535.0));
                        U16Vec3::new(q.x as u16, q.y as u16, q.z as u16)
                    };
                    (quantize(min), quantize(max))
                }
                None => {
                    let vertices = mesh.polygon_vertices(i);
                    let (mut min, mut max) = vertices.iter().fold(
                        (U16Vec3::MAX, U16Vec3::MIN),
                        |(min, max), v| {
                            let v = mesh.vertices[*v as usize];
                            (min.min(v), max.max(v))
                        },
                    );
                    // Heights are in cell height units, the tree uses cell size for all axes.
                    min.y = (min.y as f32 * mesh.cell_height / mesh.cell_size).floor() as u16;
                    max.y = (max.y as f32 * mesh.cell_height / mesh.cell_size).ceil() as u16;
                    (min, max)
                }
            };
            BvItem {
                min,
                max,
                index: i as i32,
            }
        })
        .collect();

    let mut nodes = Vec::with_capacity(items.len() * 2);
    if !items.is_empty() {
        let len = items.len();
        subdivide(&mut items, 0, len, &mut nodes);
    }
    nodes
}

fn subdivide(items: &mut [BvItem], imin: usize, imax: usize, nodes: &mut Vec<BvNode>) {
    let count = imax - imin;
    let current = nodes.len();
    nodes.push(BvNode::default());

    if count == 1 {
        let item = items[imin];
        nodes[current] = BvNode {
            min: item.min,
            max: item.max,
            index: item.index,
        };
        return;
    }

    let (min, max) = items[imin..imax]
        .iter()
        .fold((U16Vec3::MAX, U16Vec3::MIN), |(min, max), item| {
            (min.min(item.min), max.max(item.max))
        });
    let extent = max - min;
    let axis = longest_axis(extent);
    items[imin..imax].sort_by_key(|item| item.min[axis]);

    let split = imin + count / 2;
    subdivide(items, imin, split, nodes);
    subdivide(items, split, imax, nodes);

    let escape = (nodes.len() - current) as i32;
    nodes[current] = BvNode {
        min,
        max,
        index: -escape,
    };
}

fn longest_axis(extent: U16Vec3) -> usize {
    let mut axis = 0;
    let mut max = extent.x;
    if extent.y > max {
        axis = 1;
        max = extent.y;
    }
    if extent.z > max {
        axis = 2;
    }
    axis
}

/// Errors of [`NavmeshTileData::new`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TileBuildError {
    /// The polygon mesh has no polygons.
    #[error("The polygon mesh contains no polygons")]
    EmptyPolygonMesh,
    /// Vertex indices of a tile are 16 bit.
    #[error("The tile would have {0} vertices, but at most 65534 are supported")]
    TooManyVertices(usize),
    /// Runtime polygons have at most [`VERTS_PER_POLYGON`] vertices.
    #[error("Polygons with {0} vertices are not supported, expected 3 to 6")]
    InvalidVerticesPerPolygon(usize),
    /// The detail mesh was built from a different polygon mesh.
    #[error("The detail mesh has {detail_meshes} sub-meshes, but the polygon mesh has {polygons} polygons")]
    DetailMeshMismatch {
        /// Polygons in the polygon mesh.
        polygons: usize,
        /// Sub-meshes in the detail mesh.
        detail_meshes: usize,
    },
}

#[cfg(test)]
pub(crate) mod tests {
    use waymark::{RC_MESH_NULL_IDX, RegionId};

    use super::*;

    /// A single square polygon covering `size` cells, with the given pipeline neighbour codes.
    pub(crate) fn square_mesh(origin: Vec3, size: u16, neighbors: [u16; 4]) -> PolygonNavmesh {
        let nvp = 6;
        let mut polygons = vec![RC_MESH_NULL_IDX; nvp * 2];
        polygons[..4].copy_from_slice(&[0, 1, 2, 3]);
        polygons[nvp..nvp + 4].copy_from_slice(&neighbors);
        PolygonNavmesh {
            vertices: vec![
                U16Vec3::new(0, 0, 0),
                U16Vec3::new(0, 0, size),
                U16Vec3::new(size, 0, size),
                U16Vec3::new(size, 0, 0),
            ],
            polygons,
            regions: vec![RegionId::from(1_u16)],
            flags: vec![1],
            areas: vec![AreaType::DEFAULT_WALKABLE],
            vertices_per_polygon: nvp,
            aabb: Aabb3d {
                min: origin,
                max: origin + Vec3::new(size as f32, 1.0, size as f32),
            },
            cell_size: 1.0,
            cell_height: 1.0,
            border_size: 0,
            max_edge_error: 0.0,
        }
    }

    /// A row of `count` unit squares along +x, linked to each other.
    pub(crate) fn strip_mesh(count: u16) -> PolygonNavmesh {
        let nvp = 6;
        let mut vertices = Vec::new();
        for x in 0..=count {
            vertices.push(U16Vec3::new(x, 0, 0));
            vertices.push(U16Vec3::new(x, 0, 1));
        }
        let mut polygons = Vec::new();
        for i in 0..count {
            let mut slots = vec![RC_MESH_NULL_IDX; nvp * 2];
            // (x, 0), (x, 1), (x + 1, 1), (x + 1, 0)
            slots[..4].copy_from_slice(&[2 * i, 2 * i + 1, 2 * i + 3, 2 * i + 2]);
            if i > 0 {
                slots[nvp] = i - 1;
            }
            if i + 1 < count {
                slots[nvp + 2] = i + 1;
            }
            polygons.extend(slots);
        }
        PolygonNavmesh {
            vertices,
            polygons,
            regions: vec![RegionId::from(1_u16); count as usize],
            flags: vec![1; count as usize],
            areas: vec![AreaType::DEFAULT_WALKABLE; count as usize],
            vertices_per_polygon: nvp,
            aabb: Aabb3d {
                min: Vec3::ZERO,
                max: Vec3::new(count as f32, 1.0, 1.0),
            },
            cell_size: 1.0,
            cell_height: 1.0,
            border_size: 0,
            max_edge_error: 0.0,
        }
    }

    #[test]
    fn converts_vertices_and_neighbours() {
        let mesh = square_mesh(Vec3::new(10.0, 0.0, 0.0), 4, [0x8000, RC_MESH_NULL_IDX, 0x8002, 0x8003]);
        let tile = NavmeshTileData::new(&TileBuildParams::new(&mesh, None, 2.0, 0.5, 1.0)).unwrap();
        assert_eq!(tile.vertices[2], Vec3::new(14.0, 0.0, 4.0));
        assert_eq!(tile.polygons[0].neighbor_codes(), &[EXT_LINK | 4, 0, EXT_LINK, EXT_LINK | 6]);
    }

    #[test]
    fn fan_detail_mesh_marks_outer_edges() {
        let mesh = square_mesh(Vec3::ZERO, 4, [RC_MESH_NULL_IDX; 4]);
        let tile = NavmeshTileData::new(&TileBuildParams::new(&mesh, None, 2.0, 0.5, 1.0)).unwrap();
        let triangles = tile.detail_triangles_of(0);
        assert_eq!(triangles.len(), 2);
        assert!(triangles[0].is_boundary_edge(0));
        assert!(triangles[0].is_boundary_edge(1));
        assert!(!triangles[0].is_boundary_edge(2));
        assert!(!triangles[1].is_boundary_edge(0));
        assert!(triangles[1].is_boundary_edge(1));
        assert!(triangles[1].is_boundary_edge(2));
    }

    #[test]
    fn bv_tree_has_escape_indices() {
        let mesh = strip_mesh(5);
        let tile = NavmeshTileData::new(&TileBuildParams::new(&mesh, None, 2.0, 0.5, 1.0)).unwrap();
        assert_eq!(tile.bv_tree.len(), 2 * 5 - 1);
        assert_eq!(tile.bv_tree[0].index, -(2 * 5 - 1));
        let mut leaves: Vec<i32> = tile.bv_tree.iter().filter(|n| n.is_leaf()).map(|n| n.index).collect();
        leaves.sort();
        assert_eq!(leaves, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn off_mesh_connections_are_stored_where_they_start() {
        let mesh = square_mesh(Vec3::ZERO, 4, [RC_MESH_NULL_IDX; 4]);
        let connections = [
            OffMeshConnectionParams {
                start: Vec3::new(1.0, 0.0, 1.0),
                end: Vec3::new(6.0, 0.0, 1.0),
                radius: 0.5,
                bidirectional: true,
                area: AreaType::DEFAULT_WALKABLE,
                flags: 1,
                user_id: 7,
            },
            OffMeshConnectionParams {
                start: Vec3::new(-3.0, 0.0, 1.0),
                end: Vec3::new(1.0, 0.0, 1.0),
                radius: 0.5,
                bidirectional: false,
                area: AreaType::DEFAULT_WALKABLE,
                flags: 1,
                user_id: 8,
            },
        ];
        let params = TileBuildParams {
            off_mesh_connections: &connections,
            ..TileBuildParams::new(&mesh, None, 2.0, 0.5, 1.0)
        };
        let tile = NavmeshTileData::new(&params).unwrap();
        assert_eq!(tile.off_mesh_connections.len(), 1);
        let con = tile.off_mesh_connections[0];
        assert_eq!(con.user_id, 7);
        assert_eq!(con.side, 0);
        assert_eq!(con.poly, 1);
        assert!(tile.polygons[1].is_off_mesh_connection());
        assert_eq!(tile.poly_vertices(&tile.polygons[1]), vec![con.start, con.end]);
    }

    #[test]
    fn empty_mesh_is_rejected() {
        let mut mesh = square_mesh(Vec3::ZERO, 4, [RC_MESH_NULL_IDX; 4]);
        mesh.polygons.clear();
        mesh.regions.clear();
        let error = NavmeshTileData::new(&TileBuildParams::new(&mesh, None, 2.0, 0.5, 1.0)).unwrap_err();
        assert_eq!(error, TileBuildError::EmptyPolygonMesh);
    }
}
