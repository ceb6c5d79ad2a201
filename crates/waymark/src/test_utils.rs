//! Fixtures shared by the unit tests of the build stages.

use glam::{UVec3, Vec3, Vec3A};

use crate::{Aabb3d, AreaType, CompactHeightfield, Heightfield, HeightfieldBuilder, TriMesh};

/// A walkable square of `size` x `size` world units at `y = 1`.
pub(crate) fn flat_plane(size: f32) -> TriMesh {
    let mut mesh = TriMesh::new(
        vec![
            Vec3A::new(0.0, 1.0, 0.0),
            Vec3A::new(0.0, 1.0, size),
            Vec3A::new(size, 1.0, size),
            Vec3A::new(size, 1.0, 0.0),
        ],
        vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
    );
    mesh.area_types = vec![AreaType::DEFAULT_WALKABLE; 2];
    mesh
}

/// A heightfield with unit cells covering `size` x `size` columns.
pub(crate) fn unit_heightfield(size: u16) -> Heightfield {
    HeightfieldBuilder {
        aabb: Aabb3d {
            min: Vec3::ZERO,
            max: Vec3::new(size as f32, 10.0, size as f32),
        },
        cell_size: 1.0,
        cell_height: 1.0,
    }
    .build()
    .unwrap()
}

/// A compact heightfield with one walkable span in each of its `size` x `size` columns.
pub(crate) fn flat_compact_heightfield(size: u16) -> CompactHeightfield {
    let mut heightfield = unit_heightfield(size);
    heightfield
        .rasterize_triangles(&flat_plane(size as f32), 1)
        .unwrap();
    CompactHeightfield::from_heightfield(&heightfield, 2, 1).unwrap()
}
