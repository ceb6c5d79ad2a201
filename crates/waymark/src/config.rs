use glam::Vec3;

use crate::{Aabb3d, BuildContoursFlags, ConvexVolume};

/// Specifies a configuration to use when building a navmesh. Usually built using [`NavmeshConfigBuilder`].
///
/// This is a convenience structure that represents an aggregation of parameters used at different stages in the build process.
/// Some values are derived during the build process. Not all parameters are used for all build processes.
///
/// Units are usually in voxels (vx) or world units (wu). The units for voxels, grid size,
/// and cell size are all based on the values of cs and ch.
///
/// In this documentation, the term 'field' refers to heightfield and contour data structures that define spacial information
///  using an integer grid.
///
/// The upper and lower limits for the various parameters often depend on the platform's floating point accuracy as
/// well as interdependencies between the values of multiple parameters. See the individual parameter documentation for details.
///
/// > Note:
/// >
/// > First you should decide the size of your agent's logical cylinder.
/// > If your game world uses meters as units, a reasonable starting point for a human-sized agent
/// > might be a radius of 0.4 and a height of 2.0.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfig {
    /// The width of the field along the x-axis. `[Limit: >= 0] [Units: vx]`
    pub width: u16,

    /// The height of the field along the z-axis. `[Limit: >= 0] [Units: vx]`
    pub height: u16,

    /// The width/height size of tiles on the xz-plane. `[Limit: >= 0] [Units: vx]`
    ///
    /// This field is only used when building multi-tile meshes. Zero builds a single tile.
    pub tile_size: u16,

    /// The size of the non-navigable border around the heightfield. `[Limit: >=0] [Units: vx]`
    ///
    /// This value represents the the closest the walkable area of the heightfield should come to the xz-plane AABB of the field.
    /// It does not have any impact on the borders around internal obstructions.
    pub border_size: u16,

    /// The xz-plane cell size to use for fields. `[Limit: > 0] [Units: wu]`.
    ///
    /// The voxelization cell size defines the voxel size along both axes of the ground plane.
    /// This value is usually derived from the character radius r. A recommended starting value for cell_size is either r/2 or r/3.
    /// Smaller values of cell_size will increase rasterization resolution and navmesh detail, but total generation time will increase exponentially.
    /// In outdoor environments, r/2 is often good enough. For indoor scenes with tight spaces you might want the extra precision,
    /// so a value of r/3 or smaller may give better results.
    ///
    /// cell_size and cell_height define voxel/grid/cell size. So their values have significant side effects on all parameters defined in voxel units.
    ///
    /// The minimum value for this parameter depends on the platform's floating point accuracy,
    /// with the practical minimum usually around 0.05.
    pub cell_size: f32,

    /// The y-axis cell size to use for fields. `[Limit: > 0] [Units: wu]`
    ///
    /// The voxelization cell height is defined separately in order to allow for greater precision in height tests.
    /// A good starting point for cell_height is half the cell_size value.
    /// Smaller cell_height values ensure that the navmesh properly connects areas that are only separated by a small curb or ditch.
    pub cell_height: f32,

    /// The field's AABB [Units: wu]
    pub aabb: Aabb3d,

    /// The maximum slope that is considered walkable. `[Limits: 0 <= value < 0.5*π] [Units: Radians]`
    ///
    /// This value is defined as a maximum angle that the surface normal of a polygon can differ from the world's up vector.
    /// The practical upper limit for this parameter is usually around `85.0.to_radians()`.
    pub walkable_slope_angle: f32,

    /// Minimum floor to 'ceiling' height that will still allow the floor area to
    /// be considered walkable. `[Limit: >= 3] [Units: vx]`
    ///
    /// This value defines the worldspace height h of the agent in voxels.
    /// The value of walkable_height should be calculated as `(h / cell_height).ceil()`.
    pub walkable_height: u16,

    /// Maximum ledge height that is considered to still be traversable. `[Limit: >=0] [Units: vx]`
    ///
    /// Given a designer-defined `max_climb` distance in world units,
    /// the value of walkable_climb should be calculated as `(max_climb / cell_height).floor()`.
    ///
    /// Allows the mesh to flow over low lying obstructions such as curbs and up/down stairways.
    pub walkable_climb: u16,

    /// The distance to erode/shrink the walkable area of the heightfield away from
    /// obstructions.  `[Limit: >=0] [Units: vx]`
    ///
    /// Most often, this value of walkable_radius should be calculated as `(r / cell_size).ceil()`.
    ///
    /// If the walkable_radius value is greater than zero, the edges of the navmesh will be pushed away from all obstacles by this amount.
    /// A non-zero walkable_radius allows for much simpler runtime navmesh collision checks.
    /// The game only needs to check that the center point of the agent is contained within a navmesh polygon.
    pub walkable_radius: u16,

    /// The maximum allowed length for contour edges along the border of the mesh. `[Limit: >=0] [Units: vx]`
    ///
    /// Extra vertices will be inserted as needed to keep contour edges below this length.
    /// A value of zero effectively disables this feature.
    pub max_edge_len: u16,

    /// The maximum distance a simplified contour's border edges should deviate
    /// the original raw contour. `[Limit: >=0] [Units: vx]`
    ///
    /// Good values for max_simplification_error are in the range `[1.1, 1.5]`.
    /// If the value is less than 1.1, some sawtoothing starts to appear at the generated edges.
    /// If the value is more than 1.5, the mesh simplification starts to cut some corners it shouldn't.
    pub max_simplification_error: f32,

    /// The minimum number of cells allowed to form isolated island areas. `[Limit: >=0] [Units: vx]`
    ///
    /// Any regions that are smaller than this area will be marked as unwalkable.
    /// This is useful in removing useless regions that can sometimes form on geometry such as table tops, box tops, etc.
    pub min_region_area: u16,

    /// Any regions with a span count smaller than this value will, if possible,
    /// be merged with larger regions. `[Limit: >=0] [Units: vx]`
    pub merge_region_area: u16,

    /// The maximum number of vertices allowed for polygons generated during the
    /// contour to polygon conversion process. `[Limit: 3..=6]`
    pub max_vertices_per_polygon: u16,

    /// Sets the sampling distance to use when generating the detail mesh.
    /// (For height detail only.) `[Limits: 0 or >= 0.9] [Units: wu]`
    pub detail_sample_dist: f32,

    /// The maximum distance the detail mesh surface should deviate from heightfield
    /// data. (For height detail only.) `[Limit: >=0] [Units: wu]`
    pub detail_sample_max_error: f32,

    /// Flags controlling the [`ContourSet`](crate::ContourSet) generation process.
    pub contour_flags: BuildContoursFlags,

    /// Volumes that define areas with specific areas.
    pub area_volumes: Vec<ConvexVolume>,
}

impl NavmeshConfig {
    /// Number of tiles along the x- and z-axis. A config without tiling has exactly one tile.
    pub fn tile_counts(&self) -> (u16, u16) {
        if self.tile_size == 0 {
            return (1, 1);
        }
        (
            self.width.div_ceil(self.tile_size).max(1),
            self.height.div_ceil(self.tile_size).max(1),
        )
    }

    /// The config for building the tile at grid position `(x, z)`.
    ///
    /// The AABB of the tile is grown by the border size so that neighbouring tiles
    /// see the same geometry along their shared edge.
    pub fn tile_config(&self, x: u16, z: u16) -> NavmeshConfig {
        if self.tile_size == 0 {
            return self.clone();
        }
        let tile_world_size = self.tile_size as f32 * self.cell_size;
        let border = self.border_size as f32 * self.cell_size;
        let min = self.aabb.min
            + Vec3::new(
                x as f32 * tile_world_size - border,
                0.0,
                z as f32 * tile_world_size - border,
            );
        let max = self.aabb.min
            + Vec3::new(
                (x + 1) as f32 * tile_world_size + border,
                0.0,
                (z + 1) as f32 * tile_world_size + border,
            );
        NavmeshConfig {
            width: self.tile_size + self.border_size * 2,
            height: self.tile_size + self.border_size * 2,
            aabb: Aabb3d {
                min: Vec3::new(min.x, self.aabb.min.y, min.z),
                max: Vec3::new(max.x, self.aabb.max.y, max.z),
            },
            ..self.clone()
        }
    }

    /// The world space AABB of tile `(x, z)` without its border.
    pub fn tile_bounds(&self, x: u16, z: u16) -> Aabb3d {
        let mut aabb = self.tile_config(x, z).aabb;
        let border = self.border_size as f32 * self.cell_size;
        aabb.min.x += border;
        aabb.min.z += border;
        aabb.max.x -= border;
        aabb.max.z -= border;
        aabb
    }
}

/// A builder for [`NavmeshConfig`]. The config has lots of interdependent configurations,
/// so this builder provides a convenient way to set all the necessary parameters in world units.
/// The default values are chosen to be reasonable for an agent resembling an adult human.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfigBuilder {
    /// The xz-plane cell size to use for fields. `[Limit: > 0] [Units: wu]`.
    ///
    /// See [`NavmeshConfig::cell_size`].
    pub cell_size: f32,
    /// The y-axis cell size to use for fields. `[Limit: > 0] [Units: wu]`
    ///
    /// See [`NavmeshConfig::cell_height`].
    pub cell_height: f32,
    /// The height of the agent. `[Limit: > 0] [Units: wu]`
    ///
    /// It's often a good idea to add a little bit of padding to the height. For example,
    /// an agent that is 1.8 world units tall might want to set this value to 2.0 units.
    pub agent_height: f32,
    /// The radius of the agent. `[Limit: > 0] [Units: wu]`
    pub agent_radius: f32,
    /// The highest step the agent can climb. `[Limit: >= 0] [Units: wu]`
    pub agent_max_climb: f32,
    /// The steepest walkable slope. `[Units: Radians]`
    pub agent_max_slope: f32,
    /// Side length of the smallest island region that is kept. `[Units: vx]`
    pub region_min_size: f32,
    /// Side length below which regions get merged into their neighbours. `[Units: vx]`
    pub region_merge_size: f32,
    /// The maximum length of contour edges along walls. `[Units: wu]`
    pub edge_max_len: f32,
    /// See [`NavmeshConfig::max_simplification_error`]. `[Units: vx]`
    pub edge_max_error: f32,
    /// See [`NavmeshConfig::max_vertices_per_polygon`].
    pub verts_per_poly: u16,
    /// Detail sampling distance in cells. Values below 0.9 disable interior sampling.
    pub detail_sample_dist: f32,
    /// Maximum detail mesh deviation in cell heights.
    pub detail_sample_max_error: f32,
    /// The width/height of tiles in voxels. Only used when [`Self::tiling`] is set.
    pub tile_size: u16,
    /// The bounds of the geometry to build a navmesh for.
    pub aabb: Aabb3d,
    /// See [`NavmeshConfig::contour_flags`].
    pub contour_flags: BuildContoursFlags,
    /// Whether to build a grid of tiles instead of a single one.
    pub tiling: bool,
    /// See [`NavmeshConfig::area_volumes`].
    pub area_volumes: Vec<ConvexVolume>,
}

impl Default for NavmeshConfigBuilder {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            cell_height: 0.2,
            agent_height: 2.0,
            agent_radius: 0.6,
            agent_max_climb: 0.9,
            agent_max_slope: 45.0_f32.to_radians(),
            region_min_size: 8.0,
            region_merge_size: 20.0,
            edge_max_len: 12.0,
            edge_max_error: 1.3,
            verts_per_poly: 6,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            tile_size: 32,
            aabb: Aabb3d::default(),
            contour_flags: BuildContoursFlags::default(),
            tiling: false,
            area_volumes: Vec::new(),
        }
    }
}

impl NavmeshConfigBuilder {
    /// Builds a [`NavmeshConfig`] from the current configuration.
    pub fn build(self) -> NavmeshConfig {
        let walkable_radius = (self.agent_radius / self.cell_size).ceil() as u16;
        // Reserve enough padding.
        let border_size = if self.tiling { walkable_radius + 3 } else { 0 };
        NavmeshConfig {
            width: ((self.aabb.max.x - self.aabb.min.x) / self.cell_size + 0.5) as u16,
            height: ((self.aabb.max.z - self.aabb.min.z) / self.cell_size + 0.5) as u16,
            tile_size: if self.tiling { self.tile_size } else { 0 },
            border_size,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            aabb: self.aabb,
            walkable_slope_angle: self.agent_max_slope,
            walkable_height: (self.agent_height / self.cell_height).ceil() as u16,
            walkable_climb: (self.agent_max_climb / self.cell_height).floor() as u16,
            walkable_radius,
            max_edge_len: (self.edge_max_len / self.cell_size) as u16,
            max_simplification_error: self.edge_max_error,
            min_region_area: (self.region_min_size * self.region_min_size) as u16,
            merge_region_area: (self.region_merge_size * self.region_merge_size) as u16,
            max_vertices_per_polygon: self.verts_per_poly,
            detail_sample_dist: if self.detail_sample_dist < 0.9 {
                0.0
            } else {
                self.cell_size * self.detail_sample_dist
            },
            detail_sample_max_error: self.cell_height * self.detail_sample_max_error,
            contour_flags: self.contour_flags,
            area_volumes: self.area_volumes,
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn aabb(size: f32) -> Aabb3d {
        Aabb3d {
            min: Vec3::ZERO,
            max: Vec3::new(size, 2.0, size),
        }
    }

    #[test]
    fn human_defaults_in_voxels() {
        let config = NavmeshConfigBuilder {
            aabb: aabb(30.0),
            ..Default::default()
        }
        .build();
        assert_eq!(config.width, 100);
        assert_eq!(config.height, 100);
        assert_eq!(config.walkable_height, 10);
        assert_eq!(config.walkable_climb, 4);
        assert_eq!(config.walkable_radius, 2);
        assert_eq!(config.border_size, 0);
        assert_eq!(config.tile_size, 0);
        assert_eq!(config.min_region_area, 64);
        assert_eq!(config.merge_region_area, 400);
        assert_relative_eq!(config.detail_sample_dist, 1.8, epsilon = 1e-5);
        assert_relative_eq!(config.detail_sample_max_error, 0.2, epsilon = 1e-5);
        assert_eq!(config.tile_counts(), (1, 1));
    }

    #[test]
    fn small_detail_sample_distance_disables_sampling() {
        let config = NavmeshConfigBuilder {
            detail_sample_dist: 0.5,
            ..Default::default()
        }
        .build();
        assert_eq!(config.detail_sample_dist, 0.0);
    }

    #[test]
    fn tiles_are_padded_by_the_border() {
        let config = NavmeshConfigBuilder {
            aabb: aabb(30.0),
            tiling: true,
            tile_size: 32,
            ..Default::default()
        }
        .build();
        assert_eq!(config.border_size, 5);
        assert_eq!(config.tile_counts(), (4, 4));

        let tile = config.tile_config(1, 2);
        assert_eq!(tile.width, 42);
        assert_eq!(tile.height, 42);
        assert_relative_eq!(tile.aabb.min.x, 32.0 * 0.3 - 1.5, epsilon = 1e-4);
        assert_relative_eq!(tile.aabb.min.z, 64.0 * 0.3 - 1.5, epsilon = 1e-4);
        assert_relative_eq!(tile.aabb.max.x, 64.0 * 0.3 + 1.5, epsilon = 1e-4);

        let bounds = config.tile_bounds(1, 2);
        assert_relative_eq!(bounds.min.x, 32.0 * 0.3, epsilon = 1e-4);
        assert_relative_eq!(bounds.max.z, 96.0 * 0.3, epsilon = 1e-4);
    }
}
