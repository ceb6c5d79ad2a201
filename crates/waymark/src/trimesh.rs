//! The triangle soup fed into [`Heightfield`](crate::Heightfield) rasterization.

use glam::{UVec3, Vec3A};

use crate::{
    math::{Aabb3d, TriangleIndices as _},
    span::AreaType,
};

/// A mesh used as input for [`Heightfield`](crate::Heightfield) rasterization.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TriMesh {
    /// The vertices composing the mesh.
    /// Follows the convention of a triangle list.
    pub vertices: Vec<Vec3A>,

    /// The indices composing the mesh.
    /// Follows the convention of a triangle list.
    pub indices: Vec<UVec3>,

    /// The area types of the trimesh. Each index corresponds 1:1 to the [`TriMesh::indices`].
    pub area_types: Vec<AreaType>,
}

impl TriMesh {
    /// Creates a trimesh whose triangles are all [`AreaType::NOT_WALKABLE`].
    /// Call [`TriMesh::mark_walkable_triangles`] afterwards to classify them by slope.
    pub fn new(vertices: Vec<Vec3A>, indices: Vec<UVec3>) -> Self {
        let area_types = vec![AreaType::NOT_WALKABLE; indices.len()];
        Self {
            vertices,
            indices,
            area_types,
        }
    }

    /// Extends the trimesh with the vertices and indices of another trimesh.
    /// The indices of `other` will be offset by the number of vertices in `self`.
    ///
    /// # Panics
    ///
    /// Panics if the combined vertex count no longer fits into a `u32` index.
    pub fn extend(&mut self, other: TriMesh) {
        if self.vertices.len() + other.vertices.len() > u32::MAX as usize {
            panic!("Cannot extend a trimesh beyond 2^32 vertices");
        }
        let next_vertex_index = self.vertices.len() as u32;
        self.vertices.extend(other.vertices);
        self.indices
            .extend(other.indices.iter().map(|i| i + next_vertex_index));
        self.area_types.extend(other.area_types);
    }

    /// Computes the AABB of the trimesh.
    /// Returns `None` if the trimesh is empty.
    pub fn compute_aabb(&self) -> Option<Aabb3d> {
        Aabb3d::from_verts(&self.vertices)
    }

    /// Number of triangles in the mesh.
    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    /// Marks the triangles as walkable or not based on the threshold angle.
    ///
    /// The triangles are marked as walkable if the angle between their normal and the up axis
    /// is smaller than the threshold angle. Triangles that are not walkable keep their area.
    ///
    /// # Arguments
    ///
    /// * `threshold_rad` - The threshold angle in radians.
    ///
    pub fn mark_walkable_triangles(&mut self, threshold_rad: f32) {
        let threshold_cos = threshold_rad.cos();
        for (i, indices) in self.indices.iter().enumerate() {
            let normal = indices.normal(&self.vertices);

            if normal.y > threshold_cos {
                self.area_types[i] = AreaType::DEFAULT_WALKABLE;
            }
        }
    }

    /// Resets every triangle steeper than the threshold angle to [`AreaType::NOT_WALKABLE`].
    /// Flatter triangles keep whatever area they were assigned.
    pub fn clear_unwalkable_triangles(&mut self, threshold_rad: f32) {
        let threshold_cos = threshold_rad.cos();
        for (i, indices) in self.indices.iter().enumerate() {
            let normal = indices.normal(&self.vertices);

            if normal.y <= threshold_cos {
                self.area_types[i] = AreaType::NOT_WALKABLE;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    fn quad(y: f32) -> TriMesh {
        TriMesh::new(
            vec![
                Vec3A::new(0.0, y, 0.0),
                Vec3A::new(0.0, y, 1.0),
                Vec3A::new(1.0, y, 1.0),
                Vec3A::new(1.0, y, 0.0),
            ],
            vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
        )
    }

    fn wall() -> TriMesh {
        TriMesh::new(
            vec![
                Vec3A::new(0.0, 0.0, 0.0),
                Vec3A::new(0.0, 1.0, 0.0),
                Vec3A::new(1.0, 1.0, 0.0),
            ],
            vec![UVec3::new(0, 1, 2)],
        )
    }

    #[test]
    fn extend_offsets_indices() {
        let mut mesh = quad(0.0);
        mesh.extend(quad(1.0));
        assert_eq!(mesh.vertices.len(), 8);
        assert_eq!(mesh.indices[2], UVec3::new(4, 5, 6));
        assert_eq!(mesh.area_types.len(), 4);
    }

    #[test]
    fn floor_is_walkable_and_wall_is_not() {
        let mut mesh = quad(0.0);
        mesh.extend(wall());
        mesh.mark_walkable_triangles(45.0_f32.to_radians());
        assert_eq!(
            mesh.area_types,
            vec![
                AreaType::DEFAULT_WALKABLE,
                AreaType::DEFAULT_WALKABLE,
                AreaType::NOT_WALKABLE
            ]
        );
    }

    #[test]
    fn clearing_keeps_custom_areas_on_flat_triangles() {
        let mut mesh = quad(0.0);
        mesh.extend(wall());
        mesh.area_types = vec![AreaType(5); 3];
        mesh.clear_unwalkable_triangles(45.0_f32.to_radians());
        assert_eq!(
            mesh.area_types,
            vec![AreaType(5), AreaType(5), AreaType::NOT_WALKABLE]
        );
    }

    #[test]
    fn aabb_covers_all_vertices() {
        let mesh = quad(2.0);
        let aabb = mesh.compute_aabb().unwrap();
        assert_eq!(aabb.min, Vec3::new(0.0, 2.0, 0.0));
        assert_eq!(aabb.max, Vec3::new(1.0, 2.0, 1.0));
        assert!(TriMesh::default().compute_aabb().is_none());
    }
}
