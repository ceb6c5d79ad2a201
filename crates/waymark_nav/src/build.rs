//! Building a [`TiledMesh`] straight from triangle geometry, and path queries for agents.

use glam::Vec3;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info_span};
use waymark::{Aabb3d, NavmeshBuildError, NavmeshConfigBuilder, TriMesh};

use crate::{
    filter::DefaultQueryFilter,
    query::NavmeshQuery,
    status::Status,
    straight_path::StraightPathOptions,
    tile::{NavmeshTileData, OffMeshConnectionParams, TileBuildError, TileBuildParams},
    tiled_mesh::{TiledMesh, TiledMeshError, TiledMeshParams},
};

/// The most polygons in a corridor found by [`TiledMesh::find_path`].
pub const MAX_PATH_POLYS: usize = 256;

/// The most points in a path returned by [`TiledMesh::find_path`].
pub const MAX_PATH_POINTS: usize = 256;

/// The flags given to every walkable polygon built by [`build`].
pub const WALKABLE_POLY_FLAGS: u16 = 1;

/// Selects one of the [`AgentProfile`]s of a [`TiledMesh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct AgentType(pub usize);

/// How an agent queries the mesh.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct AgentProfile {
    /// The box around a query position in which the agent looks for the nearest polygon.
    pub half_extents: Vec3,
    /// Decides which polygons the agent may walk on.
    pub filter: DefaultQueryFilter,
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            half_extents: Vec3::new(2.0, 4.0, 2.0),
            filter: DefaultQueryFilter::default(),
        }
    }
}

/// Everything [`build`] needs besides the geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildSettings {
    /// The build configuration in world units. A default AABB is replaced by the bounds of the geometry.
    pub config: NavmeshConfigBuilder,
    /// The agents that will query the mesh, indexed by [`AgentType`].
    pub agents: Vec<AgentProfile>,
    /// Connections between points that are not linked by walkable ground, e.g. jumps.
    pub off_mesh_connections: Vec<OffMeshConnectionParams>,
    /// Whether each tile gets a bounding volume tree.
    pub build_bv_tree: bool,
    /// The node budget of the searches run by [`TiledMesh::find_path`].
    pub max_nodes: usize,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            config: NavmeshConfigBuilder::default(),
            agents: vec![AgentProfile::default()],
            off_mesh_connections: Vec::new(),
            build_bv_tree: true,
            max_nodes: 2048,
        }
    }
}

/// Builds a navigation mesh for the walkable triangles of `trimesh`.
///
/// Triangles flatter than the configured slope are marked walkable. Without
/// [`NavmeshConfigBuilder::tiling`] the whole geometry becomes a single tile, otherwise the
/// tiles are built independently and linked afterwards. Tiles without walkable polygons are left out.
pub fn build(trimesh: &TriMesh, settings: &BuildSettings) -> Result<TiledMesh, BuildError> {
    if trimesh.indices.is_empty() {
        return Err(BuildError::EmptyInput);
    }
    let mut builder = settings.config.clone();
    if builder.aabb == Aabb3d::default() {
        builder.aabb = trimesh.compute_aabb().ok_or(BuildError::EmptyInput)?;
    }
    let agent_height = builder.agent_height;
    let agent_radius = builder.agent_radius;
    let agent_climb = builder.agent_max_climb;
    let config = builder.build();

    let mut trimesh = trimesh.clone();
    trimesh.mark_walkable_triangles(config.walkable_slope_angle);

    let (tiles_x, tiles_z) = config.tile_counts();
    let coords: Vec<(u16, u16)> = (0..tiles_z)
        .flat_map(|z| (0..tiles_x).map(move |x| (x, z)))
        .collect();
    let build_tile = |&(x, z): &(u16, u16)| -> Result<Option<NavmeshTileData>, BuildError> {
        let _span = info_span!("build_tile", x, z).entered();
        let mut navmesh = trimesh.build_navmesh(&config.tile_config(x, z))?;
        if navmesh.polygons.polygon_count() == 0 {
            debug!("no walkable polygons, skipping tile");
            return Ok(None);
        }
        for (flags, area) in navmesh.polygons.flags.iter_mut().zip(&navmesh.polygons.areas) {
            if area.is_walkable() {
                *flags = WALKABLE_POLY_FLAGS;
            }
        }
        let tile = NavmeshTileData::new(&TileBuildParams {
            polygons: &navmesh.polygons,
            detail: Some(&navmesh.detail),
            off_mesh_connections: &settings.off_mesh_connections,
            walkable_height: agent_height,
            walkable_radius: agent_radius,
            walkable_climb: agent_climb,
            tile_x: x as i32,
            tile_z: z as i32,
            tile_layer: 0,
            user_id: 0,
            build_bv_tree: settings.build_bv_tree,
        })?;
        Ok(Some(tile))
    };

    #[cfg(feature = "parallel")]
    let tiles = coords.par_iter().map(build_tile).collect::<Result<Vec<_>, _>>()?;
    #[cfg(not(feature = "parallel"))]
    let tiles = coords.iter().map(build_tile).collect::<Result<Vec<_>, _>>()?;
    let tiles: Vec<NavmeshTileData> = tiles.into_iter().flatten().collect();

    let max_polys = tiles
        .iter()
        .map(|tile| tile.polygons.len())
        .max()
        .ok_or(BuildError::NoWalkableArea)?;
    let size = config.aabb.size();
    let (tile_width, tile_height) = if config.tile_size == 0 {
        (size.x.max(config.cell_size), size.z.max(config.cell_size))
    } else {
        let world_size = config.tile_size as f32 * config.cell_size;
        (world_size, world_size)
    };

    let mut mesh = TiledMesh::new(TiledMeshParams {
        origin: config.aabb.min,
        tile_width,
        tile_height,
        max_tiles: coords.len() as u32,
        max_polys: (max_polys as u32).next_power_of_two(),
    })?;
    let tile_count = tiles.len();
    for tile in tiles {
        mesh.add_tile(tile)?;
    }
    mesh.agents = settings.agents.clone();
    mesh.max_nodes = settings.max_nodes;
    debug!(tiles = tile_count, "built tiled navmesh");
    Ok(mesh)
}

/// Errors of [`build`].
#[derive(Error, Debug)]
pub enum BuildError {
    /// The geometry has no triangles.
    #[error("The input geometry contains no triangles")]
    EmptyInput,
    /// None of the geometry is walkable.
    #[error("No tile contains walkable polygons")]
    NoWalkableArea,
    /// A stage of the build pipeline failed.
    #[error(transparent)]
    Navmesh(#[from] NavmeshBuildError),
    /// A polygon mesh could not be packed into a tile.
    #[error(transparent)]
    Tile(#[from] TileBuildError),
    /// A tile could not be added to the mesh.
    #[error(transparent)]
    TiledMesh(#[from] TiledMeshError),
}

impl TiledMesh {
    /// The agent profiles set by [`build`].
    pub fn agents(&self) -> &[AgentProfile] {
        &self.agents
    }

    /// Replaces the agent profiles.
    pub fn set_agents(&mut self, agents: Vec<AgentProfile>) {
        self.agents = agents;
    }

    /// Sets the node budget of [`TiledMesh::find_path`].
    pub fn set_max_nodes(&mut self, max_nodes: usize) {
        self.max_nodes = max_nodes;
    }

    /// Finds a path for an agent from `from` to `to`.
    ///
    /// Both points are first snapped to the nearest polygon within the agent's query extents.
    /// Returns the corners of the string pulled path, starting at the snapped `from`.
    /// If `to` can't be reached, the path leads as close as possible and the status
    /// contains [`StatusDetail::PARTIAL_RESULT`](crate::StatusDetail::PARTIAL_RESULT).
    pub fn find_path(&self, from: Vec3, to: Vec3, agent_type: AgentType) -> (Status, Vec<Vec3>) {
        let Some(agent) = self.agents.get(agent_type.0) else {
            return (Status::invalid_param(), Vec::new());
        };
        let mut query = match NavmeshQuery::new(self, self.max_nodes) {
            Ok(query) => query,
            Err(status) => return (status, Vec::new()),
        };
        let filter = &agent.filter;

        let (start, end) = match (
            query.find_nearest_poly(from, agent.half_extents, filter),
            query.find_nearest_poly(to, agent.half_extents, filter),
        ) {
            (Ok(Some(start)), Ok(Some(end))) => (start, end),
            (Err(status), _) | (_, Err(status)) => return (status, Vec::new()),
            _ => return (Status::FAILURE, Vec::new()),
        };

        let mut corridor = Vec::new();
        let status = query.find_path(
            start.poly,
            end.poly,
            start.point,
            end.point,
            filter,
            &mut corridor,
            MAX_PATH_POLYS,
        );
        let Some(&last) = corridor.last() else {
            return (status, Vec::new());
        };
        if status.is_failure() {
            return (status, Vec::new());
        }

        // A partial corridor ends short of the goal, aim for the closest reachable point.
        let end_point = if last == end.poly {
            end.point
        } else {
            query
                .closest_point_on_poly(last, end.point)
                .map_or(end.point, |(point, _)| point)
        };

        let mut points = Vec::new();
        let straight_status = query.find_straight_path(
            start.point,
            end_point,
            &corridor,
            &mut points,
            MAX_PATH_POINTS,
            StraightPathOptions::empty(),
        );
        if straight_status.is_failure() {
            return (straight_status, Vec::new());
        }
        debug!(corridor = corridor.len(), points = points.len(), %status, "found path");
        (
            status | straight_status.detail(),
            points.into_iter().map(|point| point.pos).collect(),
        )
    }

    /// The point on the mesh nearest to `pos` within the agent's query extents.
    pub fn find_nearest_walkable_point(&self, pos: Vec3, agent_type: AgentType) -> Option<Vec3> {
        let agent = self.agents.get(agent_type.0)?;
        let query = NavmeshQuery::new(self, 1).ok()?;
        query
            .find_nearest_poly(pos, agent.half_extents, &agent.filter)
            .ok()
            .flatten()
            .map(|nearest| nearest.point)
    }
}

#[cfg(test)]
mod tests {
    use glam::{UVec3, Vec3A};

    use super::*;

    fn plane(size: f32) -> TriMesh {
        TriMesh::new(
            vec![
                Vec3A::new(0.0, 0.0, 0.0),
                Vec3A::new(0.0, 0.0, size),
                Vec3A::new(size, 0.0, size),
                Vec3A::new(size, 0.0, 0.0),
            ],
            vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
        )
    }

    fn settings(size: f32) -> BuildSettings {
        BuildSettings {
            config: NavmeshConfigBuilder {
                aabb: Aabb3d {
                    min: Vec3::new(0.0, -1.0, 0.0),
                    max: Vec3::new(size, 1.0, size),
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn empty_geometry_is_rejected() {
        let error = build(&TriMesh::default(), &BuildSettings::default()).unwrap_err();
        assert!(matches!(error, BuildError::EmptyInput));
    }

    #[test]
    fn unknown_agent_is_an_invalid_param() {
        let mesh = build(&plane(10.0), &settings(10.0)).unwrap();
        let (status, path) = mesh.find_path(Vec3::splat(1.0), Vec3::splat(2.0), AgentType(3));
        assert_eq!(status, Status::invalid_param());
        assert!(path.is_empty());
        assert_eq!(mesh.find_nearest_walkable_point(Vec3::ZERO, AgentType(3)), None);
    }

    #[test]
    fn walkable_polygons_are_flagged() {
        let mesh = build(&plane(10.0), &settings(10.0)).unwrap();
        let (_, tile) = mesh.tiles().next().unwrap();
        assert!(tile.polygons.iter().all(|poly| poly.flags == WALKABLE_POLY_FLAGS));
    }
}
