//! Geometry helpers shared by the tile linker and the queries.
//!
//! Unless noted otherwise, the helpers work on the xz-plane and ignore y.

use glam::Vec3;

/// Squared distance below which two points are considered equal.
const EQUAL_THRESHOLD: f32 = (1.0 / 16384.0) * (1.0 / 16384.0);

/// Returns `true` if the points are closer than a small threshold.
pub(crate) fn vequal(a: Vec3, b: Vec3) -> bool {
    a.distance_squared(b) < EQUAL_THRESHOLD
}

/// Twice the signed area of the triangle on the xz-plane.
/// Positive if `c` is to the right of `a -> b` when looking down the y axis.
pub(crate) fn tri_area_2d(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    let abx = b.x - a.x;
    let abz = b.z - a.z;
    let acx = c.x - a.x;
    let acz = c.z - a.z;
    acx * abz - abx * acz
}

pub(crate) fn perp_2d(u: Vec3, v: Vec3) -> f32 {
    u.z * v.x - u.x * v.z
}

pub(crate) fn dot_2d(u: Vec3, v: Vec3) -> f32 {
    u.x * v.x + u.z * v.z
}

pub(crate) fn distance_2d(a: Vec3, b: Vec3) -> f32 {
    let dx = b.x - a.x;
    let dz = b.z - a.z;
    (dx * dx + dz * dz).sqrt()
}

/// Squared distance from `point` to the segment `p -> q`, together with the
/// parameter of the closest point on the segment.
pub(crate) fn distance_pt_seg_sqr_2d(point: Vec3, p: Vec3, q: Vec3) -> (f32, f32) {
    let pqx = q.x - p.x;
    let pqz = q.z - p.z;
    let dx = point.x - p.x;
    let dz = point.z - p.z;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = p.x + t * pqx - point.x;
    let dz = p.z + t * pqz - point.z;
    (dx * dx + dz * dz, t)
}

/// Even-odd point in polygon test.
pub(crate) fn point_in_polygon(point: Vec3, verts: &[Vec3]) -> bool {
    let mut inside = false;
    let mut j = verts.len() - 1;
    for (i, vi) in verts.iter().enumerate() {
        let vj = verts[j];
        if (vi.z > point.z) != (vj.z > point.z)
            && point.x < (vj.x - vi.x) * (point.z - vi.z) / (vj.z - vi.z) + vi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Like [`point_in_polygon`], but also reports the squared distance and segment
/// parameter of every edge. Edge `j` runs from `verts[j]` to `verts[j + 1]`.
pub(crate) fn distance_pt_poly_edges_sqr(
    point: Vec3,
    verts: &[Vec3],
    distances: &mut [f32],
    params: &mut [f32],
) -> bool {
    let mut inside = false;
    let mut j = verts.len() - 1;
    for (i, vi) in verts.iter().enumerate() {
        let vj = verts[j];
        if (vi.z > point.z) != (vj.z > point.z)
            && point.x < (vj.x - vi.x) * (point.z - vi.z) / (vj.z - vi.z) + vi.x
        {
            inside = !inside;
        }
        (distances[j], params[j]) = distance_pt_seg_sqr_2d(point, vj, *vi);
        j = i;
    }
    inside
}

/// Height of `point` on the triangle, if it lies inside its xz-projection.
pub(crate) fn closest_height_point_triangle(point: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    const EPS: f32 = 1e-6;
    let v0 = c - a;
    let v1 = b - a;
    let v2 = point - a;

    let mut denom = v0.x * v1.z - v0.z * v1.x;
    if denom.abs() < EPS {
        return None;
    }
    let mut u = v1.z * v2.x - v1.x * v2.z;
    let mut v = v0.x * v2.z - v0.z * v2.x;
    if denom < 0.0 {
        denom = -denom;
        u = -u;
        v = -v;
    }

    if u >= 0.0 && v >= 0.0 && (u + v) <= denom {
        Some(a.y + (v0.y * u + v1.y * v) / denom)
    } else {
        None
    }
}

/// The result of clipping a segment against a convex polygon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SegmentPolyIntersection {
    /// Parameter where the segment enters the polygon.
    pub(crate) t_min: f32,
    /// Parameter where the segment leaves the polygon.
    pub(crate) t_max: f32,
    /// Edge through which the segment enters, if it starts outside.
    pub(crate) seg_min: Option<usize>,
    /// Edge through which the segment leaves, if it ends outside.
    pub(crate) seg_max: Option<usize>,
}

/// Clips the segment `p0 -> p1` against a convex polygon on the xz-plane.
/// Edge `j` of the result runs from `verts[j]` to `verts[j + 1]`.
pub(crate) fn intersect_segment_poly_2d(
    p0: Vec3,
    p1: Vec3,
    verts: &[Vec3],
) -> Option<SegmentPolyIntersection> {
    const EPS: f32 = 0.000001;
    let mut result = SegmentPolyIntersection {
        t_min: 0.0,
        t_max: 1.0,
        seg_min: None,
        seg_max: None,
    };
    let dir = p1 - p0;

    let mut j = verts.len() - 1;
    for i in 0..verts.len() {
        let edge = verts[i] - verts[j];
        let diff = p0 - verts[j];
        let n = perp_2d(edge, diff);
        let d = perp_2d(dir, edge);
        if d.abs() < EPS {
            // Parallel to this edge.
            if n < 0.0 {
                return None;
            }
            j = i;
            continue;
        }
        let t = n / d;
        if d < 0.0 {
            // Entering across this edge.
            if t > result.t_min {
                result.t_min = t;
                result.seg_min = Some(j);
                if result.t_min > result.t_max {
                    return None;
                }
            }
        } else if t < result.t_max {
            // Leaving across this edge.
            result.t_max = t;
            result.seg_max = Some(j);
            if result.t_max < result.t_min {
                return None;
            }
        }
        j = i;
    }
    Some(result)
}

/// Intersects the lines through `ap -> aq` and `bp -> bq` on the xz-plane.
/// Returns the parameters along both segments.
pub(crate) fn intersect_seg_seg_2d(ap: Vec3, aq: Vec3, bp: Vec3, bq: Vec3) -> Option<(f32, f32)> {
    let u = aq - ap;
    let v = bq - bp;
    let w = ap - bp;
    let d = vperp_xz(u, v);
    if d.abs() < 1e-6 {
        return None;
    }
    Some((vperp_xz(v, w) / d, vperp_xz(u, w) / d))
}

fn vperp_xz(a: Vec3, b: Vec3) -> f32 {
    a.x * b.z - a.z * b.x
}

/// Separating axis test of two convex polygons on the xz-plane.
pub(crate) fn overlap_poly_poly_2d(a: &[Vec3], b: &[Vec3]) -> bool {
    const EPS: f32 = 1e-4;
    fn separated_by_edges_of(poly: &[Vec3], a: &[Vec3], b: &[Vec3]) -> bool {
        let mut j = poly.len() - 1;
        for i in 0..poly.len() {
            let va = poly[j];
            let vb = poly[i];
            let normal = Vec3::new(vb.z - va.z, 0.0, -(vb.x - va.x));
            let (amin, amax) = project_poly(normal, a);
            let (bmin, bmax) = project_poly(normal, b);
            if amin + EPS > bmax || amax - EPS < bmin {
                return true;
            }
            j = i;
        }
        false
    }
    !separated_by_edges_of(a, a, b) && !separated_by_edges_of(b, a, b)
}

fn project_poly(axis: Vec3, poly: &[Vec3]) -> (f32, f32) {
    poly.iter()
        .map(|v| dot_2d(axis, *v))
        .fold((f32::MAX, f32::MIN), |(min, max), d| (min.min(d), max.max(d)))
}

/// Picks a point inside a convex polygon from two uniform samples `s` and `t` in `[0, 1)`.
pub(crate) fn random_point_in_convex_poly(verts: &[Vec3], s: f32, t: f32) -> Vec3 {
    let areas: Vec<f32> = (0..verts.len())
        .map(|i| {
            if i < 2 {
                0.0
            } else {
                tri_area_2d(verts[0], verts[i - 1], verts[i])
            }
        })
        .collect();
    let area_sum: f32 = areas.iter().skip(2).map(|a| a.max(0.001)).sum();

    // Find the sub triangle weighted by area.
    let threshold = s * area_sum;
    let mut acc = 0.0;
    let mut u = 1.0;
    let mut tri = verts.len() - 1;
    for (i, area) in areas.iter().enumerate().skip(2) {
        if threshold >= acc && threshold < acc + area {
            u = (threshold - acc) / area;
            tri = i;
            break;
        }
        acc += area;
    }

    let v = t.sqrt();
    let a = 1.0 - v;
    let b = (1.0 - u) * v;
    let c = u * v;
    verts[0] * a + verts[tri - 1] * b + verts[tri] * c
}

/// Area of a convex polygon on the xz-plane, as a sum of fan triangles.
pub(crate) fn poly_area_2d(verts: &[Vec3]) -> f32 {
    (2..verts.len())
        .map(|i| tri_area_2d(verts[0], verts[i - 1], verts[i]))
        .sum()
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn square() -> Vec<Vec3> {
        vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 0.0),
        ]
    }

    #[test]
    fn point_in_square() {
        assert!(point_in_polygon(Vec3::new(0.5, 3.0, 0.5), &square()));
        assert!(!point_in_polygon(Vec3::new(1.5, 0.0, 0.5), &square()));
    }

    #[test]
    fn segment_distance() {
        let (d, t) = distance_pt_seg_sqr_2d(Vec3::new(0.5, 7.0, 1.0), Vec3::ZERO, Vec3::X);
        assert_relative_eq!(d, 1.0);
        assert_relative_eq!(t, 0.5);
    }

    #[test]
    fn winding_of_mesh_polygons_is_positive() {
        assert!(poly_area_2d(&square()) > 0.0);
        assert_relative_eq!(poly_area_2d(&square()), 2.0);
    }

    #[test]
    fn segment_through_square() {
        let hit =
            intersect_segment_poly_2d(Vec3::new(-1.0, 0.0, 0.5), Vec3::new(2.0, 0.0, 0.5), &square())
                .unwrap();
        assert_relative_eq!(hit.t_min, 1.0 / 3.0, epsilon = 1e-5);
        assert_relative_eq!(hit.t_max, 2.0 / 3.0, epsilon = 1e-5);
        assert_eq!(hit.seg_min, Some(0));
        assert_eq!(hit.seg_max, Some(2));
    }

    #[test]
    fn segment_ending_inside_has_no_exit() {
        let hit =
            intersect_segment_poly_2d(Vec3::new(0.2, 0.0, 0.5), Vec3::new(0.8, 0.0, 0.5), &square())
                .unwrap();
        assert_eq!(hit.seg_max, None);
        assert_eq!(hit.seg_min, None);
    }

    #[test]
    fn height_on_slanted_triangle() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(0.0, 0.0, 1.0);
        let c = Vec3::new(1.0, 1.0, 0.0);
        let h = closest_height_point_triangle(Vec3::new(0.5, 10.0, 0.25), a, b, c).unwrap();
        assert_relative_eq!(h, 0.5, epsilon = 1e-5);
        assert!(closest_height_point_triangle(Vec3::new(2.0, 0.0, 2.0), a, b, c).is_none());
    }

    #[test]
    fn overlapping_squares() {
        let shifted: Vec<Vec3> = square().iter().map(|v| *v + Vec3::new(0.5, 0.0, 0.5)).collect();
        assert!(overlap_poly_poly_2d(&square(), &shifted));
        let far: Vec<Vec3> = square().iter().map(|v| *v + Vec3::new(3.0, 0.0, 0.0)).collect();
        assert!(!overlap_poly_poly_2d(&square(), &far));
    }

    #[test]
    fn random_points_stay_inside() {
        for (s, t) in [(0.0, 0.0), (0.3, 0.7), (0.99, 0.99), (0.5, 0.01)] {
            let p = random_point_in_convex_poly(&square(), s, t);
            assert!((-1e-5..=1.0 + 1e-5).contains(&p.x), "{p}");
            assert!((-1e-5..=1.0 + 1e-5).contains(&p.z), "{p}");
        }
    }
}
