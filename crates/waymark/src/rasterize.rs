//! Conservative rasterization of triangles into a [`Heightfield`].

use glam::{Vec3, Vec3A};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use thiserror::Error;

use crate::{
    Aabb3d,
    heightfield::{Heightfield, SpanInsertion, SpanInsertionError},
    span::{AreaType, SpanBuilder},
    trimesh::TriMesh,
};

/// Highest voxel a span may reach.
pub(crate) const SPAN_MAX_HEIGHT: u16 = (1 << 13) - 1;

/// Number of triangles rasterized by one worker before its spans are merged into the columns.
const TRIANGLE_BATCH_SIZE: usize = 512;

impl Heightfield {
    /// Rasterizes all triangles of a [`TriMesh`] into the heightfield.
    ///
    /// Triangles are split into batches that are clipped against the grid independently,
    /// the resulting spans are then merged into the columns in triangle order, so the
    /// output does not depend on how many threads did the work.
    ///
    /// # Arguments
    ///
    /// - `trimesh` - The [`TriMesh`] to rasterize.
    /// - `flag_merge_threshold` - The distance where the walkable flag is favored over the non-walkable flag. [Limit: >= 0] [Units: vx]
    pub fn rasterize_triangles(
        &mut self,
        trimesh: &TriMesh,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        if trimesh.area_types.len() != trimesh.indices.len() {
            return Err(RasterizationError::MismatchedAreaTypes {
                triangles: trimesh.indices.len(),
                area_types: trimesh.area_types.len(),
            });
        }
        let vertex_count = trimesh.vertices.len();
        if let Some(index) = trimesh
            .indices
            .iter()
            .flat_map(|tri| tri.to_array())
            .find(|index| *index as usize >= vertex_count)
        {
            return Err(RasterizationError::VertexIndexOutOfBounds {
                index,
                vertex_count,
            });
        }

        let grid = RasterGrid::from(&*self);
        let rasterize_batch = |(batch_index, batch): (usize, &[glam::UVec3])| {
            let mut insertions = Vec::new();
            for (i, triangle) in batch.iter().enumerate() {
                let triangle_index = batch_index * TRIANGLE_BATCH_SIZE + i;
                let triangle = [
                    trimesh.vertices[triangle[0] as usize],
                    trimesh.vertices[triangle[1] as usize],
                    trimesh.vertices[triangle[2] as usize],
                ];
                let area = trimesh.area_types[triangle_index];
                grid.rasterize_triangle(triangle, area, flag_merge_threshold, &mut insertions);
            }
            insertions
        };

        #[cfg(feature = "parallel")]
        let batches: Vec<Vec<SpanInsertion>> = trimesh
            .indices
            .par_chunks(TRIANGLE_BATCH_SIZE)
            .enumerate()
            .map(rasterize_batch)
            .collect();
        #[cfg(not(feature = "parallel"))]
        let batches: Vec<Vec<SpanInsertion>> = trimesh
            .indices
            .chunks(TRIANGLE_BATCH_SIZE)
            .enumerate()
            .map(rasterize_batch)
            .collect();

        for insertion in batches.into_iter().flatten() {
            self.add_span(insertion)?;
        }
        tracing::debug!(
            triangles = trimesh.indices.len(),
            spans = self.span_count(),
            "rasterized triangles"
        );
        Ok(())
    }

    /// Rasterizes a single triangle into the heightfield.
    ///
    /// # Arguments
    ///
    /// - `triangle` - The triangle's vertices in world space.
    /// - `area_type` - The area type of the triangle.
    /// - `flag_merge_threshold` - The distance where the walkable flag is favored over the non-walkable flag. [Limit: >= 0] [Units: vx]
    pub fn rasterize_triangle(
        &mut self,
        triangle: [Vec3A; 3],
        area_type: AreaType,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        let mut insertions = Vec::new();
        RasterGrid::from(&*self).rasterize_triangle(
            triangle,
            area_type,
            flag_merge_threshold,
            &mut insertions,
        );
        for insertion in insertions {
            self.add_span(insertion)?;
        }
        Ok(())
    }
}

/// The read-only part of a heightfield that rasterization needs.
/// Shared between workers while the columns themselves stay untouched.
#[derive(Debug, Clone, Copy)]
struct RasterGrid {
    width: u16,
    height: u16,
    aabb: Aabb3d,
    cell_size: f32,
    cell_height: f32,
}

impl From<&Heightfield> for RasterGrid {
    fn from(heightfield: &Heightfield) -> Self {
        Self {
            width: heightfield.width,
            height: heightfield.height,
            aabb: heightfield.aabb,
            cell_size: heightfield.cell_size,
            cell_height: heightfield.cell_height,
        }
    }
}

impl RasterGrid {
    fn rasterize_triangle(
        &self,
        triangle: [Vec3A; 3],
        area_type: AreaType,
        flag_merge_threshold: u16,
        insertions: &mut Vec<SpanInsertion>,
    ) {
        let [v0, v1, v2] = triangle.map(Vec3::from);
        let triangle_aabb = Aabb3d {
            min: v0.min(v1).min(v2),
            max: v0.max(v1).max(v2),
        };
        // If the triangle does not touch the bounding box of the heightfield, skip the triangle.
        if !triangle_aabb.intersects(&self.aabb) {
            return;
        }

        let width = self.width as i32;
        let height = self.height as i32;
        let inverse_cell_size = 1.0 / self.cell_size;
        let inverse_cell_height = 1.0 / self.cell_height;
        let by = self.aabb.max.y - self.aabb.min.y;

        // Calculate the footprint of the triangle on the grid's z-axis
        let z0 = ((triangle_aabb.min.z - self.aabb.min.z) * inverse_cell_size) as i32;
        let z1 = ((triangle_aabb.max.z - self.aabb.min.z) * inverse_cell_size) as i32;
        // use -1 rather than 0 to cut the polygon properly at the start of the tile
        let z0 = z0.clamp(-1, height - 1);
        let z1 = z1.clamp(0, height - 1);

        // Clip the triangle into all grid cells it touches.
        let mut remaining = ClipPolygon::from_triangle([v0, v1, v2]);
        for z in z0..=z1 {
            // Clip polygon to row. Store the remaining polygon as well
            let cell_z = self.aabb.min.z + z as f32 * self.cell_size;
            let (row, rest) = remaining.divide(cell_z + self.cell_size, Axis::Z);
            remaining = rest;
            if row.len < 3 || z < 0 {
                continue;
            }

            // find X-axis bounds of the row
            let (min_x, max_x) = row
                .verts()
                .iter()
                .fold((f32::MAX, f32::MIN), |(min, max), v| {
                    (min.min(v.x), max.max(v.x))
                });
            let x0 = ((min_x - self.aabb.min.x) * inverse_cell_size) as i32;
            let x1 = ((max_x - self.aabb.min.x) * inverse_cell_size) as i32;
            if x1 < 0 || x0 >= width {
                continue;
            }
            let x0 = x0.clamp(-1, width - 1);
            let x1 = x1.clamp(0, width - 1);

            let mut row_remaining = row;
            for x in x0..=x1 {
                // Clip polygon to column. store the remaining polygon as well
                let cell_x = self.aabb.min.x + x as f32 * self.cell_size;
                let (cell, rest) = row_remaining.divide(cell_x + self.cell_size, Axis::X);
                row_remaining = rest;
                if cell.len < 3 || x < 0 {
                    continue;
                }

                // Calculate min and max of the span.
                let (span_min, span_max) = cell
                    .verts()
                    .iter()
                    .fold((f32::MAX, f32::MIN), |(min, max), v| {
                        (min.min(v.y), max.max(v.y))
                    });
                let span_min = span_min - self.aabb.min.y;
                let span_max = span_max - self.aabb.min.y;

                // Skip the span if it's completely outside the heightfield bounding box
                if span_max < 0.0 || span_min > by {
                    continue;
                }
                // Clamp the span to the heightfield bounding box.
                let span_min = span_min.max(0.0);
                let span_max = span_max.min(by);

                // Snap the span to the heightfield height grid.
                let span_min_cell =
                    ((span_min * inverse_cell_height).floor() as i32).clamp(0, SPAN_MAX_HEIGHT as i32);
                let span_max_cell = ((span_max * inverse_cell_height).ceil() as i32)
                    .clamp(span_min_cell + 1, SPAN_MAX_HEIGHT as i32);

                insertions.push(SpanInsertion {
                    x: x as u16,
                    z: z as u16,
                    flag_merge_threshold,
                    span: SpanBuilder {
                        min: span_min_cell as u16,
                        max: span_max_cell as u16,
                        area: area_type,
                        next: None,
                    }
                    .build(),
                });
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Z,
}

impl Axis {
    #[inline]
    fn of(self, v: Vec3) -> f32 {
        match self {
            Axis::X => v.x,
            Axis::Z => v.z,
        }
    }
}

/// A convex polygon produced by slicing a triangle with axis aligned lines.
/// A triangle cut by two lines on each axis never exceeds 7 vertices.
#[derive(Debug, Clone, Copy)]
struct ClipPolygon {
    verts: [Vec3; Self::CAPACITY],
    len: usize,
}

impl ClipPolygon {
    const CAPACITY: usize = 12;

    fn from_triangle(triangle: [Vec3; 3]) -> Self {
        let mut polygon = Self::empty();
        for v in triangle {
            polygon.push(v);
        }
        polygon
    }

    fn empty() -> Self {
        Self {
            verts: [Vec3::ZERO; Self::CAPACITY],
            len: 0,
        }
    }

    #[inline]
    fn push(&mut self, v: Vec3) {
        self.verts[self.len] = v;
        self.len += 1;
    }

    #[inline]
    fn verts(&self) -> &[Vec3] {
        &self.verts[..self.len]
    }

    /// Divides the polygon along the line `axis = axis_offset`.
    /// Returns the part below the line first and the part above it second.
    fn divide(&self, axis_offset: f32, axis: Axis) -> (Self, Self) {
        let mut below = Self::empty();
        let mut above = Self::empty();
        if self.len == 0 {
            return (below, above);
        }
        let deltas: [f32; Self::CAPACITY] =
            std::array::from_fn(|i| if i < self.len { axis_offset - axis.of(self.verts[i]) } else { 0.0 });

        let mut b = self.len - 1;
        for a in 0..self.len {
            let (va, vb) = (self.verts[a], self.verts[b]);
            let same_side = (deltas[a] >= 0.0) == (deltas[b] >= 0.0);
            if !same_side {
                let s = deltas[b] / (deltas[b] - deltas[a]);
                let intersection = vb + (va - vb) * s;
                below.push(intersection);
                above.push(intersection);
                // add the a point to the right polygon. Do NOT add points that are on the dividing line
                // since these were already added above
                if deltas[a] > 0.0 {
                    below.push(va);
                } else if deltas[a] < 0.0 {
                    above.push(va);
                }
            } else {
                // add the a point to the right polygon. Addition is done even for points on the dividing line
                if deltas[a] >= 0.0 {
                    below.push(va);
                    if deltas[a] != 0.0 {
                        b = a;
                        continue;
                    }
                }
                above.push(va);
            }
            b = a;
        }
        (below, above)
    }
}

/// Errors that can occur when rasterizing triangles into a [`Heightfield`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RasterizationError {
    /// A span could not be inserted.
    #[error("Failed to insert span: {0}")]
    SpanInsertion(#[from] SpanInsertionError),
    /// Every triangle needs exactly one area type.
    #[error("Got {area_types} area types for {triangles} triangles")]
    MismatchedAreaTypes {
        /// The number of triangles
        triangles: usize,
        /// The number of area types
        area_types: usize,
    },
    /// A triangle references a vertex that does not exist.
    #[error("Vertex index {index} is out of bounds for {vertex_count} vertices")]
    VertexIndexOutOfBounds {
        /// The offending index
        index: u32,
        /// The number of vertices in the mesh
        vertex_count: usize,
    },
}

#[cfg(test)]
mod tests {
    use glam::UVec3;

    use crate::HeightfieldBuilder;

    use super::*;

    fn heightfield() -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d {
                min: Vec3::new(0.0, 0.0, 0.0),
                max: Vec3::new(4.0, 4.0, 4.0),
            },
            cell_size: 1.0,
            cell_height: 0.5,
        }
        .build()
        .unwrap()
    }

    fn floor(y: f32, area: AreaType) -> TriMesh {
        let mut mesh = TriMesh::new(
            vec![
                Vec3A::new(0.0, y, 0.0),
                Vec3A::new(0.0, y, 4.0),
                Vec3A::new(4.0, y, 4.0),
                Vec3A::new(4.0, y, 0.0),
            ],
            vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
        );
        mesh.area_types = vec![area; 2];
        mesh
    }

    #[test]
    fn divide_splits_square_in_half() {
        let square = ClipPolygon {
            verts: {
                let mut verts = [Vec3::ZERO; ClipPolygon::CAPACITY];
                verts[..4].copy_from_slice(&[
                    Vec3::new(0.0, 0.0, 0.0),
                    Vec3::new(0.0, 0.0, 2.0),
                    Vec3::new(2.0, 0.0, 2.0),
                    Vec3::new(2.0, 0.0, 0.0),
                ]);
                verts
            },
            len: 4,
        };
        let (below, above) = square.divide(1.0, Axis::X);
        assert_eq!(below.len, 4);
        assert_eq!(above.len, 4);
        assert!(below.verts().iter().all(|v| v.x <= 1.0));
        assert!(above.verts().iter().all(|v| v.x >= 1.0));
    }

    #[test]
    fn flat_floor_covers_every_column_once() {
        let mut heightfield = heightfield();
        heightfield
            .rasterize_triangles(&floor(1.0, AreaType::DEFAULT_WALKABLE), 1)
            .unwrap();
        for z in 0..heightfield.height {
            for x in 0..heightfield.width {
                let column: Vec<_> = heightfield.column(x, z).collect();
                assert_eq!(column.len(), 1, "column ({x}, {z})");
                let span = column[0].1;
                assert_eq!(span.min(), 2);
                assert_eq!(span.max(), 3);
                assert_eq!(span.area(), AreaType::DEFAULT_WALKABLE);
            }
        }
    }

    #[test]
    fn stacked_floors_stay_sorted_and_disjoint() {
        let mut mesh = floor(0.5, AreaType::DEFAULT_WALKABLE);
        mesh.extend(floor(3.0, AreaType::NOT_WALKABLE));
        mesh.extend(floor(1.5, AreaType(7)));
        let mut heightfield = heightfield();
        heightfield.rasterize_triangles(&mesh, 1).unwrap();
        for z in 0..heightfield.height {
            for x in 0..heightfield.width {
                let spans: Vec<_> = heightfield.column(x, z).map(|(_, s)| s.clone()).collect();
                assert_eq!(spans.len(), 3);
                for pair in spans.windows(2) {
                    assert!(pair[0].max() < pair[1].min());
                }
            }
        }
    }

    #[test]
    fn triangles_outside_the_field_are_skipped() {
        let mut mesh = floor(1.0, AreaType::DEFAULT_WALKABLE);
        for v in &mut mesh.vertices {
            v.x += 100.0;
        }
        let mut heightfield = heightfield();
        heightfield.rasterize_triangles(&mesh, 1).unwrap();
        assert_eq!(heightfield.span_count(), 0);
    }

    #[test]
    fn mismatched_area_types_are_rejected() {
        let mut mesh = floor(1.0, AreaType::DEFAULT_WALKABLE);
        mesh.area_types.pop();
        let mut heightfield = heightfield();
        assert_eq!(
            heightfield.rasterize_triangles(&mesh, 1),
            Err(RasterizationError::MismatchedAreaTypes {
                triangles: 2,
                area_types: 1
            })
        );
    }

    #[test]
    fn batched_rasterization_matches_single_triangles() {
        let mut mesh = TriMesh::default();
        for i in 0..(TRIANGLE_BATCH_SIZE / 2 + 7) {
            let mut layer = floor(0.1 * (i % 30) as f32, AreaType((i % 60) as u8 + 1));
            for v in &mut layer.vertices {
                v.x = v.x * 0.5 + (i % 3) as f32;
            }
            mesh.extend(layer);
        }

        let mut batched = heightfield();
        batched.rasterize_triangles(&mesh, 2).unwrap();

        let mut single = heightfield();
        for (i, tri) in mesh.indices.iter().enumerate() {
            let triangle = tri.to_array().map(|index| mesh.vertices[index as usize]);
            single
                .rasterize_triangle(triangle, mesh.area_types[i], 2)
                .unwrap();
        }

        for z in 0..batched.height {
            for x in 0..batched.width {
                let a: Vec<_> = batched
                    .column(x, z)
                    .map(|(_, s)| (s.min(), s.max(), s.area()))
                    .collect();
                let b: Vec<_> = single
                    .column(x, z)
                    .map(|(_, s)| (s.min(), s.max(), s.area()))
                    .collect();
                assert_eq!(a, b);
            }
        }
    }
}
