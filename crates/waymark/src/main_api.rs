use thiserror::Error;
use tracing::{debug, info_span};

use crate::{
    CompactHeightfield, DetailNavmesh, HeightfieldBuilder, HeightfieldBuilderError, NavmeshConfig,
    PolygonNavmesh,
    compact_heightfield::CompactHeightfieldError,
    detail_mesh::DetailNavmeshError,
    heightfield::Heightfield,
    poly_mesh::PolygonMeshError,
    rasterize::RasterizationError,
    trimesh::TriMesh,
    watershed_build_regions::RegionBuildError,
};

impl Heightfield {
    /// Rasterizes the triangles of a [`TriMesh`] into a [`Heightfield`] and runs the span filters.
    ///
    /// # Arguments
    ///
    /// - `trimesh` - The [`TriMesh`] to rasterize.
    /// - `walkable_height` - Minimum floor to 'ceiling' height that will still allow the floor area to be considered walkable. [Limit: >= 3] [Units: vx]
    /// - `walkable_climb` - Maximum ledge height that is considered to still be traversable. [Limit: >=0] [Units: vx]
    ///
    pub fn populate_from_trimesh(
        &mut self,
        trimesh: &TriMesh,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Result<(), RasterizationError> {
        // flag_merge_threshold and walkable_climb are the same thing in practice, so we just chose one name for the param.
        self.rasterize_triangles(trimesh, walkable_climb)?;
        // Once all geometry is rasterized, we do initial pass of filtering to
        // remove unwanted overhangs caused by the conservative rasterization
        // as well as filter spans where the character cannot possibly stand.
        self.filter_low_hanging_walkable_obstacles(walkable_climb);
        self.filter_ledge_spans(walkable_height, walkable_climb);
        self.filter_walkable_low_height_spans(walkable_height);
        Ok(())
    }
}

/// The polygon mesh of a single tile together with its height detail.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Navmesh {
    /// The walkable polygons.
    pub polygons: PolygonNavmesh,
    /// The height detail of [`Navmesh::polygons`].
    pub detail: DetailNavmesh,
}

impl TriMesh {
    /// Runs the whole build pipeline for the field described by `config`.
    ///
    /// The area types of the trimesh are used as they are, so classify the triangles
    /// first, e.g. with [`TriMesh::mark_walkable_triangles`].
    pub fn build_navmesh(&self, config: &NavmeshConfig) -> Result<Navmesh, NavmeshBuildError> {
        let _span = info_span!(
            "build_navmesh",
            width = config.width,
            height = config.height,
            triangles = self.triangle_count()
        )
        .entered();

        let mut heightfield = HeightfieldBuilder {
            aabb: config.aabb,
            cell_size: config.cell_size,
            cell_height: config.cell_height,
        }
        .build()?;
        heightfield.populate_from_trimesh(self, config.walkable_height, config.walkable_climb)?;
        debug!(spans = heightfield.span_count(), "rasterized");

        let mut compact = CompactHeightfield::from_heightfield(
            &heightfield,
            config.walkable_height,
            config.walkable_climb,
        )?;
        drop(heightfield);
        debug!(spans = compact.spans.len(), "compacted");

        compact.erode_walkable_area(config.walkable_radius);
        for volume in &config.area_volumes {
            compact.mark_convex_poly_area(volume);
        }

        compact.build_distance_field();
        compact.build_regions(
            config.border_size,
            config.min_region_area,
            config.merge_region_area,
        )?;
        debug!(regions = compact.max_region.bits(), "partitioned");

        let contours = compact.build_contours(
            config.max_simplification_error,
            config.max_edge_len,
            config.contour_flags,
        );
        let polygons = contours.into_polygon_mesh(config.max_vertices_per_polygon)?;
        let detail = DetailNavmesh::new(
            &polygons,
            &compact,
            config.detail_sample_dist,
            config.detail_sample_max_error,
        )?;
        debug!(
            polygons = polygons.polygon_count(),
            vertices = polygons.vertices.len(),
            "built navmesh"
        );
        Ok(Navmesh { polygons, detail })
    }
}

/// Errors of the individual stages run by [`TriMesh::build_navmesh`].
#[derive(Error, Debug)]
pub enum NavmeshBuildError {
    /// The heightfield could not be allocated.
    #[error(transparent)]
    Heightfield(#[from] HeightfieldBuilderError),
    /// The geometry could not be rasterized.
    #[error(transparent)]
    Rasterization(#[from] RasterizationError),
    /// The heightfield could not be compacted.
    #[error(transparent)]
    CompactHeightfield(#[from] CompactHeightfieldError),
    /// The walkable area could not be partitioned into regions.
    #[error(transparent)]
    Regions(#[from] RegionBuildError),
    /// The contours could not be turned into polygons.
    #[error(transparent)]
    PolygonMesh(#[from] PolygonMeshError),
    /// The detail mesh could not be built.
    #[error(transparent)]
    DetailMesh(#[from] DetailNavmeshError),
}

#[cfg(test)]
mod tests {
    use glam::{UVec3, Vec3, Vec3A};

    use crate::{Aabb3d, NavmeshConfigBuilder, RC_MESH_NULL_IDX};

    use super::*;

    fn plane(size: f32) -> TriMesh {
        let mut trimesh = TriMesh::new(
            vec![
                Vec3A::new(0.0, 0.0, 0.0),
                Vec3A::new(0.0, 0.0, size),
                Vec3A::new(size, 0.0, size),
                Vec3A::new(size, 0.0, 0.0),
            ],
            vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
        );
        trimesh.mark_walkable_triangles(45.0_f32.to_radians());
        trimesh
    }

    fn config(size: f32) -> NavmeshConfig {
        NavmeshConfigBuilder {
            aabb: Aabb3d {
                min: Vec3::new(0.0, -1.0, 0.0),
                max: Vec3::new(size, 1.0, size),
            },
            ..Default::default()
        }
        .build()
    }

    #[test]
    fn flat_plane_builds_closed_polygons() {
        let navmesh = plane(10.0).build_navmesh(&config(10.0)).unwrap();
        let polygons = &navmesh.polygons;
        assert!(polygons.polygon_count() > 0);
        assert_eq!(navmesh.detail.meshes.len(), polygons.polygon_count());
        assert!(polygons.regions.iter().all(|r| r.bits() == 1));
        for i in 0..polygons.polygon_count() {
            assert!(polygons.polygon_vertices(i).len() >= 3);
            assert!(
                polygons
                    .polygon_neighbors(i)
                    .iter()
                    .all(|n| *n == RC_MESH_NULL_IDX || (*n as usize) < polygons.polygon_count())
            );
        }
    }

    #[test]
    fn unwalkable_geometry_builds_an_empty_mesh() {
        let mut trimesh = plane(10.0);
        trimesh.area_types.fill(crate::AreaType::NOT_WALKABLE);
        let navmesh = trimesh.build_navmesh(&config(10.0)).unwrap();
        assert_eq!(navmesh.polygons.polygon_count(), 0);
        assert!(navmesh.detail.meshes.is_empty());
    }

    #[test]
    fn invalid_cell_size_is_reported() {
        let mut config = config(10.0);
        config.cell_size = 0.0;
        let error = plane(10.0).build_navmesh(&config).unwrap_err();
        assert!(matches!(error, NavmeshBuildError::Heightfield(_)));
    }
}
