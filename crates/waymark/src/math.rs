//! Small geometric helpers shared by the build stages.

use glam::{IVec4, UVec3, Vec2, Vec3, Vec3A, Vec3Swizzles as _};

/// An axis-aligned bounding box in 3D space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb3d {
    /// The minimum corner of the box
    pub min: Vec3,
    /// The maximum corner of the box
    pub max: Vec3,
}

impl Aabb3d {
    /// Creates a box from its center and half extents.
    #[inline]
    pub fn new(center: impl Into<Vec3>, half_size: impl Into<Vec3>) -> Self {
        let center = center.into();
        let half_size = half_size.into();
        Self {
            min: center - half_size,
            max: center + half_size,
        }
    }

    /// Computes the box enclosing all `verts`. Returns `None` if `verts` is empty.
    pub fn from_verts(verts: &[Vec3A]) -> Option<Self> {
        let first = Vec3::from(*verts.first()?);
        let (min, max) = verts
            .iter()
            .map(|v| Vec3::from(*v))
            .fold((first, first), |(min, max), v| (min.min(v), max.max(v)));
        Some(Self { min, max })
    }

    /// Size of the box along each axis.
    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Whether the two boxes overlap, touching counts as overlapping.
    #[inline]
    pub fn intersects(&self, other: &Aabb3d) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }
}

/// An axis-aligned bounding box on the xz-plane.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb2d {
    /// The minimum corner of the box
    pub min: Vec2,
    /// The maximum corner of the box
    pub max: Vec2,
}

impl Aabb2d {
    /// Computes the box enclosing all `verts`. Returns `None` if `verts` is empty.
    pub fn from_verts(verts: &[Vec2]) -> Option<Self> {
        let first = *verts.first()?;
        let (min, max) = verts
            .iter()
            .fold((first, first), |(min, max), v| (min.min(*v), max.max(*v)));
        Some(Self { min, max })
    }
}

pub(crate) trait TriangleIndices {
    fn normal(&self, vertices: &[Vec3A]) -> Vec3A;
}

impl TriangleIndices for UVec3 {
    #[inline]
    fn normal(&self, vertices: &[Vec3A]) -> Vec3A {
        let a = vertices[self[0] as usize];
        let b = vertices[self[1] as usize];
        let c = vertices[self[2] as usize];
        let ab = b - a;
        let ac = c - a;
        ab.cross(ac).normalize_or_zero()
    }
}

/// Gets the standard width (x-axis) offset for the specified direction.
/// # Arguments
/// - `direction`: The direction. [Limits: 0 <= value < 4]
/// # Returns
///
/// The width offset to apply to the current cell position to move in the direction.
#[inline]
pub(crate) fn dir_offset_x(direction: u8) -> i8 {
    const OFFSET: [i8; 4] = [-1, 0, 1, 0];
    OFFSET[direction as usize & 0x03]
}

/// Gets the standard height (z-axis) offset for the specified direction.
/// # Arguments
/// - `direction`: The direction. [Limits: 0 <= value < 4]
/// # Returns
///
/// The height offset to apply to the current cell position to move in the direction.
#[inline]
pub(crate) fn dir_offset_z(direction: u8) -> i8 {
    const OFFSET: [i8; 4] = [0, 1, 0, -1];
    OFFSET[direction as usize & 0x03]
}

/// Gets the direction for the specified offset. One of x and z should be 0.
#[inline]
pub(crate) fn dir_offset(offset_x: i32, offset_z: i32) -> u8 {
    const DIRS: [u8; 5] = [3, 0, 0xff, 2, 1];
    DIRS[(((offset_z + 1) << 1) + offset_x) as usize]
}

#[inline]
pub(crate) fn next(i: usize, n: usize) -> usize {
    if i + 1 < n { i + 1 } else { 0 }
}

#[inline]
pub(crate) fn prev(i: usize, n: usize) -> usize {
    if i >= 1 { i - 1 } else { n - 1 }
}

/// Squared distance from `pt` to the segment `(p, q)` on the xz-plane.
#[inline]
pub(crate) fn distance_squared_between_point_and_line_vec2(pt: Vec2, (p, q): (Vec2, Vec2)) -> f32 {
    let pq = q - p;
    let d = pq.length_squared();
    let mut t = pq.dot(pt - p);
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    (p + pq * t - pt).length_squared()
}

/// Squared distance from `pt` to the segment `(p, q)` in 3D.
#[inline]
pub(crate) fn distance_squared_between_point_and_line_vec3(pt: Vec3, (p, q): (Vec3, Vec3)) -> f32 {
    let pq = q - p;
    let d = pq.length_squared();
    let mut t = pq.dot(pt - p);
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    (p + pq * t - pt).length_squared()
}

/// Squared distance from an integer point to an integer segment, in voxel units.
#[inline]
pub(crate) fn distance_squared_between_point_and_line_i32(
    (x, z): (i32, i32),
    (px, pz): (i32, i32),
    (qx, qz): (i32, i32),
) -> f32 {
    distance_squared_between_point_and_line_vec2(
        Vec2::new(x as f32, z as f32),
        (
            Vec2::new(px as f32, pz as f32),
            Vec2::new(qx as f32, qz as f32),
        ),
    )
}

/// Twice the signed area of the triangle `abc` on the xz-plane.
#[inline]
pub(crate) fn triangle_area_2d(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    let ab = (b - a).xz();
    let ac = (c - a).xz();
    ac.x * ab.y - ab.x * ac.y
}

// Integer predicates on the xz-plane. The `w` component is ignored.

#[inline]
pub(crate) fn area2(a: IVec4, b: IVec4, c: IVec4) -> i32 {
    (b.x - a.x) * (c.z - a.z) - (c.x - a.x) * (b.z - a.z)
}

#[inline]
pub(crate) fn left(a: IVec4, b: IVec4, c: IVec4) -> bool {
    area2(a, b, c) < 0
}

#[inline]
pub(crate) fn left_on(a: IVec4, b: IVec4, c: IVec4) -> bool {
    area2(a, b, c) <= 0
}

#[inline]
pub(crate) fn collinear(a: IVec4, b: IVec4, c: IVec4) -> bool {
    area2(a, b, c) == 0
}

#[inline]
pub(crate) fn xz_equal(a: IVec4, b: IVec4) -> bool {
    a.x == b.x && a.z == b.z
}

/// Returns true iff ab properly intersects cd: they share
/// a point interior to both segments. The properness of the
/// intersection is ensured by using strict leftness.
pub(crate) fn intersect_prop(a: IVec4, b: IVec4, c: IVec4, d: IVec4) -> bool {
    // Eliminate improper cases.
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

/// Returns T iff (a,b,c) are collinear and point c lies
/// on the closed segment ab.
pub(crate) fn between(a: IVec4, b: IVec4, c: IVec4) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    // If ab not vertical, check betweenness on x; else on z.
    if a.x != b.x {
        (a.x <= c.x && c.x <= b.x) || (a.x >= c.x && c.x >= b.x)
    } else {
        (a.z <= c.z && c.z <= b.z) || (a.z >= c.z && c.z >= b.z)
    }
}

/// Returns true iff segments ab and cd intersect, properly or improperly.
pub(crate) fn intersect(a: IVec4, b: IVec4, c: IVec4, d: IVec4) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_offsets_round_trip_through_dir_offset() {
        for dir in 0..4 {
            let x = dir_offset_x(dir) as i32;
            let z = dir_offset_z(dir) as i32;
            assert_eq!(dir_offset(x, z), dir);
        }
    }

    #[test]
    fn point_segment_distance_clamps_to_endpoints() {
        let d = distance_squared_between_point_and_line_vec2(
            Vec2::new(3.0, 0.0),
            (Vec2::ZERO, Vec2::new(1.0, 0.0)),
        );
        assert_eq!(d, 4.0);
        let d = distance_squared_between_point_and_line_vec2(
            Vec2::new(0.5, 2.0),
            (Vec2::ZERO, Vec2::new(1.0, 0.0)),
        );
        assert_eq!(d, 4.0);
    }

    #[test]
    fn aabb_from_verts() {
        let aabb = Aabb3d::from_verts(&[
            Vec3A::new(1.0, -2.0, 3.0),
            Vec3A::new(-1.0, 4.0, 0.0),
        ])
        .unwrap();
        assert_eq!(aabb.min, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(aabb.max, Vec3::new(1.0, 4.0, 3.0));
        assert!(Aabb3d::from_verts(&[]).is_none());
    }
}
