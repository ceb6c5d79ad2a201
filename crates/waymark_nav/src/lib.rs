//! Runtime navigation meshes built by [`waymark`], and the queries that find paths on them.
//!
//! A [`TiledMesh`] holds the tiles of a navigation mesh, with the polygons of
//! neighbouring tiles linked to each other. A [`NavmeshQuery`] runs searches against it:
//! nearest polygon lookups, A* searches over the polygon graph, string pulling,
//! raycasts, flood searches and random sampling.
//!
//! For the common case, [`build`] turns triangle geometry into a [`TiledMesh`] in one
//! go, and [`TiledMesh::find_path`] finds paths for the agents configured in the [`BuildSettings`].

mod build;
mod filter;
mod find_path;
mod flood;
pub(crate) mod math;
mod move_along_surface;
mod node_pool;
mod poly_id;
mod query;
mod random;
mod raycast;
mod status;
mod straight_path;
mod tile;
mod tiled_mesh;
mod walls;

pub use build::{
    AgentProfile, AgentType, BuildError, BuildSettings, MAX_PATH_POINTS, MAX_PATH_POLYS,
    WALKABLE_POLY_FLAGS, build,
};
pub use filter::{DefaultQueryFilter, MAX_AREAS, PolyHandle, QueryFilter};
pub use find_path::{FindPathOptions, H_SCALE};
pub use flood::VisitedPoly;
pub use poly_id::{PolyId, PolyIdLayout, TileRef};
pub use query::{NavmeshQuery, NearestPoly};
pub use random::RandomPoint;
pub use raycast::{RaycastHit, RaycastOptions};
pub use status::{Outcome, Status, StatusDetail};
pub use straight_path::{StraightPathFlags, StraightPathOptions, StraightPathPoint};
pub use tile::{
    BvNode, EXT_LINK, Link, NO_SIDE, NavmeshTileData, OffMeshConnection, OffMeshConnectionParams,
    Poly, PolyDetail, PolyType, TileBuildError, TileBuildParams, TileHeader, VERTS_PER_POLYGON,
};
pub use tiled_mesh::{MeshTile, TiledMesh, TiledMeshError, TiledMeshParams};
pub use walls::{WallHit, WallSegment};
