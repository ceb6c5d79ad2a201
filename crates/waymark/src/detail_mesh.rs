use std::collections::VecDeque;

use glam::{Vec3, Vec3A, Vec3Swizzles as _};
use thiserror::Error;

use crate::{
    CompactHeightfield, PolygonNavmesh, RegionId,
    math::{
        dir_offset, dir_offset_x, dir_offset_z, distance_squared_between_point_and_line_vec2,
        distance_squared_between_point_and_line_vec3, next, prev,
    },
};

/// Heights not yet sampled in a [`HeightPatch`].
const RC_UNSET_HEIGHT: u16 = 0xffff;
const MAX_VERTS: usize = 127;
// Max tris for delaunay is 2n-2-k (n=num verts, k=num hull verts).
const MAX_TRIS: usize = 255;
const MAX_VERTS_PER_EDGE: usize = 32;

/// The triangle edge lies on the boundary of the source polygon.
pub const DETAIL_EDGE_BOUNDARY: u8 = 0x1;

/// Contains triangle meshes that represent detailed height data associated
/// with the polygons in its associated polygon mesh object.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DetailNavmesh {
    /// The sub-mesh data, one per polygon of the source mesh.
    pub meshes: Vec<SubMesh>,
    /// The mesh vertices in world space.
    pub vertices: Vec<Vec3A>,
    /// The mesh triangles. Vertex indices are relative to [`SubMesh::first_vertex_index`].
    pub triangles: Vec<DetailTriangle>,
}

/// The slice of detail vertices and triangles belonging to one polygon.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SubMesh {
    /// Index of the first vertex in [`DetailNavmesh::vertices`].
    pub first_vertex_index: usize,
    /// The number of vertices, starting with the polygon's own vertices.
    pub vertex_count: usize,
    /// Index of the first triangle in [`DetailNavmesh::triangles`].
    pub first_triangle_index: usize,
    /// The number of triangles.
    pub triangle_count: usize,
}

/// A triangle of a detail sub-mesh.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DetailTriangle {
    /// Vertex indices, local to the sub-mesh.
    pub vertices: [u8; 3],
    /// Two bits per edge, starting with the edge `vertices[0]..vertices[1]`.
    /// [`DETAIL_EDGE_BOUNDARY`] marks edges on the polygon boundary.
    pub edge_flags: u8,
}

impl DetailTriangle {
    /// Whether the edge starting at vertex `edge` lies on the polygon boundary.
    #[inline]
    pub fn is_boundary_edge(&self, edge: usize) -> bool {
        (self.edge_flags >> (edge * 2)) & 0x3 == DETAIL_EDGE_BOUNDARY
    }
}

impl DetailNavmesh {
    /// Builds a detail mesh from the provided polygon mesh.
    ///
    /// # Arguments
    ///
    /// - `mesh`: A fully built polygon mesh.
    /// - `heightfield`: The compact heightfield used to build the polygon mesh.
    /// - `sample_distance`: Sets the distance to use when sampling the heightfield. [Limit: >=0] [Units: wu]
    /// - `sample_max_error`: The maximum distance the detail mesh surface should deviate from heightfield data. [Limit: >=0] [Units: wu]
    pub fn new(
        mesh: &PolygonNavmesh,
        heightfield: &CompactHeightfield,
        sample_distance: f32,
        sample_max_error: f32,
    ) -> Result<Self, DetailNavmeshError> {
        let mut dmesh = DetailNavmesh::default();
        if mesh.vertices.is_empty() || mesh.polygon_count() == 0 {
            return Ok(dmesh);
        }
        let chf = heightfield;
        let cs = mesh.cell_size;
        let ch = mesh.cell_height;
        let orig = Vec3A::from(mesh.aabb.min);
        let border_size = mesh.border_size;
        let height_search_radius = 1.max(mesh.max_edge_error.ceil() as i32);

        let mut edges = Vec::with_capacity(64);
        let mut tris = Vec::with_capacity(512);
        let mut queue = VecDeque::with_capacity(512);
        let mut samples = Vec::with_capacity(512);
        let mut verts = Vec::with_capacity(MAX_VERTS + 1);
        let mut hp = HeightPatch::default();
        let mut max_hw = 0;
        let mut max_hh = 0;

        // Find max size for a polygon area.
        let mut bounds = Vec::with_capacity(mesh.polygon_count());
        for i in 0..mesh.polygon_count() {
            let mut b = Bounds {
                xmin: chf.width,
                xmax: 0,
                zmin: chf.height,
                zmax: 0,
            };
            for &vertex in mesh.polygon_vertices(i) {
                let v = mesh.vertices[vertex as usize];
                b.xmin = b.xmin.min(v.x);
                b.xmax = b.xmax.max(v.x);
                b.zmin = b.zmin.min(v.z);
                b.zmax = b.zmax.max(v.z);
            }
            b.xmin = b.xmin.saturating_sub(1);
            b.xmax = chf.width.min(b.xmax + 1);
            b.zmin = b.zmin.saturating_sub(1);
            b.zmax = chf.height.min(b.zmax + 1);
            if b.xmax + border_size > chf.width || b.zmax + border_size > chf.height {
                return Err(DetailNavmeshError::PolygonOutsideHeightfield { polygon: i });
            }
            if b.xmin < b.xmax && b.zmin < b.zmax {
                max_hw = max_hw.max(b.width());
                max_hh = max_hh.max(b.height());
            }
            bounds.push(b);
        }
        hp.data = vec![RC_UNSET_HEIGHT; max_hw as usize * max_hh as usize];
        dmesh.meshes = Vec::with_capacity(mesh.polygon_count());

        let mut poly = Vec::with_capacity(mesh.vertices_per_polygon);
        for (i, b) in bounds.iter().enumerate() {
            let polygon = mesh.polygon_vertices(i);

            // Store polygon vertices for processing.
            poly.clear();
            poly.extend(polygon.iter().map(|&v| {
                let v = mesh.vertices[v as usize].as_vec3();
                Vec3A::new(v.x * cs, v.y * ch, v.z * cs)
            }));

            // Get the height data from the area of the polygon.
            hp.xmin = b.xmin;
            hp.zmin = b.zmin;
            hp.width = b.width();
            hp.height = b.height();
            hp.get_height_data(
                chf,
                polygon,
                &mesh.vertices,
                border_size,
                &mut queue,
                mesh.regions[i],
            );

            // Build detail mesh.
            build_poly_detail(
                &poly,
                sample_distance,
                sample_max_error,
                height_search_radius,
                chf,
                &hp,
                &mut verts,
                &mut tris,
                &mut edges,
                &mut samples,
            );

            // Move detail verts to world space.
            for vert in &mut verts {
                *vert += orig;
                // Is this offset necessary?
                vert.y += chf.cell_height;
            }
            // Offset poly too, will be used to flag checking.
            for vert in &mut poly {
                *vert += orig;
            }

            // Store detail submesh
            dmesh.meshes.push(SubMesh {
                first_vertex_index: dmesh.vertices.len(),
                vertex_count: verts.len(),
                first_triangle_index: dmesh.triangles.len(),
                triangle_count: tris.len(),
            });
            dmesh.vertices.extend_from_slice(&verts);
            dmesh
                .triangles
                .extend(tris.iter().map(|&[a, b, c]| DetailTriangle {
                    vertices: [a as u8, b as u8, c as u8],
                    edge_flags: get_tri_flags(verts[a], verts[b], verts[c], &poly),
                }));
        }

        tracing::debug!(
            vertices = dmesh.vertices.len(),
            triangles = dmesh.triangles.len(),
            "built detail mesh"
        );
        Ok(dmesh)
    }
}

fn build_poly_detail(
    input: &[Vec3A],
    sample_dist: f32,
    sample_max_error: f32,
    height_search_radius: i32,
    chf: &CompactHeightfield,
    hp: &HeightPatch,
    verts: &mut Vec<Vec3A>,
    tris: &mut Vec<[usize; 3]>,
    edges: &mut Vec<DelaunayEdge>,
    samples: &mut Vec<Sample>,
) {
    let nin = input.len();
    let mut edge = [Vec3A::ZERO; MAX_VERTS_PER_EDGE + 1];
    let mut hull: Vec<usize> = Vec::with_capacity(MAX_VERTS);

    verts.clear();
    verts.extend_from_slice(input);
    edges.clear();
    tris.clear();

    let cs = chf.cell_size;
    let ics = 1.0 / cs;

    // Calculate minimum extents of the polygon based on input data.
    let min_extent_squared = poly_min_extent_squared(verts);

    // Tessellate outlines.
    // This is done in separate pass in order to ensure
    // seamless height values across the ply boundaries.
    let mut j = nin - 1;
    for i in 0..nin {
        hull.push(j);
        if sample_dist > 0.0 {
            let mut vj = input[j];
            let mut vi = input[i];
            let mut swapped = false;
            // Make sure the segments are always handled in same order
            // using lexological sort or else there will be seams.
            if (vj.x - vi.x).abs() < 1.0e-6 {
                if vj.z > vi.z {
                    std::mem::swap(&mut vj, &mut vi);
                    swapped = true;
                }
            } else if vj.x > vi.x {
                std::mem::swap(&mut vj, &mut vi);
                swapped = true;
            }
            // Create samples along the edge.
            let dij = vi - vj;
            let d = dij.xz().length();
            let mut nn = 1 + (d / sample_dist).floor() as usize;
            if nn >= MAX_VERTS_PER_EDGE {
                nn = MAX_VERTS_PER_EDGE - 1;
            }
            if verts.len() + nn >= MAX_VERTS {
                nn = (MAX_VERTS - 1).saturating_sub(verts.len()).max(1);
            }
            for (k, pos) in edge.iter_mut().enumerate().take(nn + 1) {
                let u = k as f32 / nn as f32;
                *pos = vj + dij * u;
                pos.y = get_height(*pos, ics, chf.cell_height, height_search_radius, hp) as f32
                    * chf.cell_height;
            }
            // Simplify samples.
            let mut idx = Vec::with_capacity(MAX_VERTS_PER_EDGE);
            idx.extend([0, nn]);
            let mut k = 0;
            while k < idx.len() - 1 {
                let a = idx[k];
                let b = idx[k + 1];
                let va = Vec3::from(edge[a]);
                let vb = Vec3::from(edge[b]);
                // Find maximum deviation along the segment.
                let mut maxd = 0.0;
                let mut maxi = None;
                for (m, sample) in edge.iter().enumerate().take(b).skip(a + 1) {
                    let dev =
                        distance_squared_between_point_and_line_vec3(Vec3::from(*sample), (va, vb));
                    if dev > maxd {
                        maxd = dev;
                        maxi = Some(m);
                    }
                }
                // If the max deviation is larger than accepted error,
                // add new point, else continue to next segment.
                match maxi {
                    Some(maxi) if maxd > sample_max_error * sample_max_error => {
                        idx.insert(k + 1, maxi);
                    }
                    _ => k += 1,
                }
            }

            // Add new vertices.
            let inner = &idx[1..idx.len() - 1];
            let mut add = |index: usize| {
                hull.push(verts.len());
                verts.push(edge[index]);
            };
            if swapped {
                inner.iter().rev().for_each(|k| add(*k));
            } else {
                inner.iter().for_each(|k| add(*k));
            }
        }
        j = i;
    }

    // If the polygon minimum extent is small (sliver or small triangle), do not try to add internal points.
    if min_extent_squared < (sample_dist * 2.0) * (sample_dist * 2.0) || sample_dist <= 0.0 {
        triangulate_hull(verts, &hull, nin, tris);
        return;
    }

    // Tessellate the base mesh.
    // We're using the triangulate_hull instead of delaunay_hull as it tends to
    // create a bit better triangulation for long thin triangles when there
    // are no internal points.
    triangulate_hull(verts, &hull, nin, tris);

    if tris.is_empty() {
        // Could not triangulate the poly, make sure there is some valid data there.
        tracing::warn!(vertices = verts.len(), "Could not triangulate polygon");
        return;
    }

    // Create sample locations in a grid.
    let mut min = input[0];
    let mut max = input[0];
    for v in &input[1..] {
        min = min.min(*v);
        max = max.max(*v);
    }
    let x0 = (min.x / sample_dist).floor() as i32;
    let x1 = (max.x / sample_dist).ceil() as i32;
    let z0 = (min.z / sample_dist).floor() as i32;
    let z1 = (max.z / sample_dist).ceil() as i32;
    samples.clear();
    for z in z0..z1 {
        for x in x0..x1 {
            let pt = Vec3A::new(
                x as f32 * sample_dist,
                (max.y + min.y) * 0.5,
                z as f32 * sample_dist,
            );
            // Make sure the samples are not too close to the edges.
            if dist_to_poly(input, pt) > -sample_dist / 2.0 {
                continue;
            }
            let y = get_height(pt, ics, chf.cell_height, height_search_radius, hp);
            samples.push(Sample {
                x,
                y,
                z,
                added: false,
            });
        }
    }

    // Add the samples starting from the one that has the most
    // error. The procedure stops when all samples are added
    // or when the max error is within treshold.
    for _ in 0..samples.len() {
        if verts.len() >= MAX_VERTS {
            break;
        }

        // Find sample with most error.
        let mut best: Option<(usize, f32, Vec3A)> = None;
        for (i, sample) in samples.iter().enumerate() {
            if sample.added {
                continue;
            }
            // The sample location is jittered to get rid of some bad triangulations
            // which are cause by symmetrical data from the grid structure.
            let pt = Vec3A::new(
                sample.x as f32 * sample_dist + get_jitter_x(i) * cs * 0.1,
                sample.y as f32 * chf.cell_height,
                sample.z as f32 * sample_dist + get_jitter_y(i) * cs * 0.1,
            );
            let Some(d) = dist_to_tri_mesh(pt, verts, tris) else {
                // did not hit the mesh.
                continue;
            };
            if best.is_none_or(|(_, best_d, _)| d > best_d) {
                best = Some((i, d, pt));
            }
        }
        // If the max error is within accepted threshold, stop tesselating.
        let Some((best_i, best_d, best_pt)) = best else {
            break;
        };
        if best_d <= sample_max_error {
            break;
        }
        // Mark sample as added.
        samples[best_i].added = true;
        // Add the new sample point.
        verts.push(best_pt);

        // Create new triangulation.
        delaunay_hull(verts, &hull, tris, edges);
    }

    if tris.len() > MAX_TRIS {
        tracing::error!(
            triangles = tris.len(),
            max = MAX_TRIS,
            "Shrinking detail triangle count"
        );
        tris.truncate(MAX_TRIS);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample {
    x: i32,
    y: u16,
    z: i32,
    added: bool,
}

/// The face on one side of a Delaunay edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Face {
    Undefined,
    Hull,
    Triangle(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DelaunayEdge {
    s: usize,
    t: usize,
    left: Face,
    right: Face,
}

fn find_edge(edges: &[DelaunayEdge], s: usize, t: usize) -> Option<usize> {
    edges
        .iter()
        .position(|e| (e.s == s && e.t == t) || (e.s == t && e.t == s))
}

fn add_edge(
    edges: &mut Vec<DelaunayEdge>,
    max_edges: usize,
    s: usize,
    t: usize,
    left: Face,
    right: Face,
) {
    if edges.len() >= max_edges {
        tracing::error!(max_edges, "Too many edges in detail triangulation");
        return;
    }
    // Add edge if not already in the triangulation.
    if find_edge(edges, s, t).is_none() {
        edges.push(DelaunayEdge { s, t, left, right });
    }
}

fn update_left_face(edge: &mut DelaunayEdge, s: usize, t: usize, face: Face) {
    if edge.s == s && edge.t == t && edge.left == Face::Undefined {
        edge.left = face;
    } else if edge.t == s && edge.s == t && edge.right == Face::Undefined {
        edge.right = face;
    }
}

#[inline]
fn vcross2(p1: Vec3A, p2: Vec3A, p3: Vec3A) -> f32 {
    let u1 = p2.x - p1.x;
    let v1 = p2.z - p1.z;
    let u2 = p3.x - p1.x;
    let v2 = p3.z - p1.z;
    u1 * v2 - v1 * u2
}

fn overlap_seg_seg_2d(a: Vec3A, b: Vec3A, c: Vec3A, d: Vec3A) -> bool {
    let a1 = vcross2(a, b, d);
    let a2 = vcross2(a, b, c);
    if a1 * a2 < 0.0 {
        let a3 = vcross2(c, d, a);
        let a4 = a3 + a2 - a1;
        if a3 * a4 < 0.0 {
            return true;
        }
    }
    false
}

fn overlap_edges(pts: &[Vec3A], edges: &[DelaunayEdge], s1: usize, t1: usize) -> bool {
    edges.iter().any(|e| {
        let (s0, t0) = (e.s, e.t);
        // Same or connected edges do not overlap.
        if s0 == s1 || s0 == t1 || t0 == s1 || t0 == t1 {
            return false;
        }
        overlap_seg_seg_2d(pts[s0], pts[t0], pts[s1], pts[t1])
    })
}

/// Returns the center and radius of the circle through the three points on the xz-plane,
/// or `None` if they are collinear.
fn circum_circle(p1: Vec3A, p2: Vec3A, p3: Vec3A) -> Option<(Vec3A, f32)> {
    const EPS: f32 = 1e-6;
    // Calculate the circle relative to p1, to avoid some precision issues.
    let v1 = Vec3A::ZERO;
    let v2 = p2 - p1;
    let v3 = p3 - p1;

    let cp = vcross2(v1, v2, v3);
    if cp.abs() <= EPS {
        return None;
    }
    let v1_sq = v1.xz().length_squared();
    let v2_sq = v2.xz().length_squared();
    let v3_sq = v3.xz().length_squared();
    let c = Vec3A::new(
        (v1_sq * (v2.z - v3.z) + v2_sq * (v3.z - v1.z) + v3_sq * (v1.z - v2.z)) / (2.0 * cp),
        0.0,
        (v1_sq * (v3.x - v2.x) + v2_sq * (v1.x - v3.x) + v3_sq * (v2.x - v1.x)) / (2.0 * cp),
    );
    let r = c.xz().distance(v1.xz());
    Some((c + p1, r))
}

fn complete_facet(
    pts: &[Vec3A],
    edges: &mut Vec<DelaunayEdge>,
    max_edges: usize,
    face_count: &mut usize,
    e: usize,
) {
    const EPS: f32 = 1e-5;

    let edge = edges[e];

    // Cache s and t.
    let (s, t) = if edge.left == Face::Undefined {
        (edge.s, edge.t)
    } else if edge.right == Face::Undefined {
        (edge.t, edge.s)
    } else {
        // Edge already completed.
        return;
    };

    // Find best point on left of edge.
    let mut pt = None;
    let mut circle: Option<(Vec3A, f32)> = None;
    for u in 0..pts.len() {
        if u == s || u == t {
            continue;
        }
        if vcross2(pts[s], pts[t], pts[u]) <= EPS {
            continue;
        }
        let Some((c, r)) = circle else {
            // The circle is not updated yet, do it now.
            pt = Some(u);
            circle = Some(circum_circle(pts[s], pts[t], pts[u]).unwrap_or((pts[s], 0.0)));
            continue;
        };
        let d = c.xz().distance(pts[u].xz());
        const TOLERANCE: f32 = 0.001;
        if d > r * (1.0 + TOLERANCE) {
            // Outside current circumcircle, skip.
            continue;
        } else if d >= r * (1.0 - TOLERANCE) {
            // Inside epsilon circum circle, do extra tests to make sure the edge is valid.
            // s-u and t-u cannot overlap with s-pt nor t-pt if they exists.
            if overlap_edges(pts, edges, s, u) || overlap_edges(pts, edges, t, u) {
                continue;
            }
        }
        // Inside safe circumcircle, or the edge is valid.
        pt = Some(u);
        circle = Some(circum_circle(pts[s], pts[t], pts[u]).unwrap_or((pts[s], 0.0)));
    }

    // Add new triangle or update edge info if s-t is on hull.
    let Some(pt) = pt else {
        update_left_face(&mut edges[e], s, t, Face::Hull);
        return;
    };
    let face = Face::Triangle(*face_count);
    // Update face information of edge being completed.
    update_left_face(&mut edges[e], s, t, face);

    // Add new edge or update face info of old edge.
    match find_edge(edges, pt, s) {
        None => add_edge(edges, max_edges, pt, s, face, Face::Undefined),
        Some(e) => update_left_face(&mut edges[e], pt, s, face),
    }
    // Add new edge or update face info of old edge.
    match find_edge(edges, t, pt) {
        None => add_edge(edges, max_edges, t, pt, face, Face::Undefined),
        Some(e) => update_left_face(&mut edges[e], t, pt, face),
    }
    *face_count += 1;
}

/// Delaunay triangulation of `pts` constrained to the given hull.
fn delaunay_hull(
    pts: &[Vec3A],
    hull: &[usize],
    tris: &mut Vec<[usize; 3]>,
    edges: &mut Vec<DelaunayEdge>,
) {
    let mut face_count = 0;
    let max_edges = pts.len() * 10;
    edges.clear();
    tris.clear();

    let mut j = hull.len() - 1;
    for i in 0..hull.len() {
        add_edge(
            edges,
            max_edges,
            hull[j],
            hull[i],
            Face::Hull,
            Face::Undefined,
        );
        j = i;
    }

    let mut current_edge = 0;
    while current_edge < edges.len() {
        if edges[current_edge].left == Face::Undefined {
            complete_facet(pts, edges, max_edges, &mut face_count, current_edge);
        }
        if edges[current_edge].right == Face::Undefined {
            complete_facet(pts, edges, max_edges, &mut face_count, current_edge);
        }
        current_edge += 1;
    }

    // Create tris
    let mut faces: Vec<[Option<usize>; 3]> = vec![[None; 3]; face_count];
    for e in edges.iter() {
        if let Face::Triangle(right) = e.right {
            // Left face
            let t = &mut faces[right];
            if t[0].is_none() {
                t[0] = Some(e.s);
                t[1] = Some(e.t);
            } else if t[0] == Some(e.t) {
                t[2] = Some(e.s);
            } else if t[1] == Some(e.s) {
                t[2] = Some(e.t);
            }
        }
        if let Face::Triangle(left) = e.left {
            // Right
            let t = &mut faces[left];
            if t[0].is_none() {
                t[0] = Some(e.t);
                t[1] = Some(e.s);
            } else if t[0] == Some(e.s) {
                t[2] = Some(e.t);
            } else if t[1] == Some(e.t) {
                t[2] = Some(e.s);
            }
        }
    }

    for (i, face) in faces.into_iter().enumerate() {
        match face {
            [Some(a), Some(b), Some(c)] => tris.push([a, b, c]),
            _ => tracing::warn!(face = i, "Removing dangling face"),
        }
    }
}

fn dist_to_tri_mesh(p: Vec3A, verts: &[Vec3A], tris: &[[usize; 3]]) -> Option<f32> {
    tris.iter()
        .filter_map(|&[a, b, c]| dist_pt_tri(p, verts[a], verts[b], verts[c]))
        .min_by(f32::total_cmp)
}

/// Distance from point p to triangle defined by vertices a, b, and c.
/// Returns None if the point is outside the triangle.
fn dist_pt_tri(p: Vec3A, a: Vec3A, b: Vec3A, c: Vec3A) -> Option<f32> {
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let dot00 = v0.xz().dot(v0.xz());
    let dot01 = v0.xz().dot(v1.xz());
    let dot02 = v0.xz().dot(v2.xz());
    let dot11 = v1.xz().dot(v1.xz());
    let dot12 = v1.xz().dot(v2.xz());

    // Compute barycentric coordinates
    let inv_denom = 1.0 / (dot00 * dot11 - dot01 * dot01);
    let u = (dot11 * dot02 - dot01 * dot12) * inv_denom;
    let v = (dot00 * dot12 - dot01 * dot02) * inv_denom;

    // If point lies inside the triangle, return interpolated y-coord.
    const EPS: f32 = 1.0e-4;
    if u >= -EPS && v >= -EPS && (u + v) <= 1.0 + EPS {
        let y = a.y + v0.y * u + v1.y * v;
        Some((y - p.y).abs())
    } else {
        None
    }
}

fn get_jitter_x(i: usize) -> f32 {
    ((i.wrapping_mul(0x8da6b343) & 0xffff) as f32 / 65535.0 * 2.0) - 1.0
}

fn get_jitter_y(i: usize) -> f32 {
    ((i.wrapping_mul(0xd8163841) & 0xffff) as f32 / 65535.0 * 2.0) - 1.0
}

/// Signed squared distance on the xz-plane to the polygon boundary, negative inside.
fn dist_to_poly(verts: &[Vec3A], p: Vec3A) -> f32 {
    let mut dmin = f32::MAX;
    let mut inside = false;
    let mut j = verts.len() - 1;
    for i in 0..verts.len() {
        let vi = verts[i];
        let vj = verts[j];
        if (vi.z > p.z) != (vj.z > p.z)
            && p.x < (vj.x - vi.x) * (p.z - vi.z) / (vj.z - vi.z) + vi.x
        {
            inside = !inside;
        }
        dmin = dmin.min(distance_squared_between_point_and_line_vec2(
            p.xz(),
            (vj.xz(), vi.xz()),
        ));
        j = i;
    }
    if inside { -dmin } else { dmin }
}

/// Flags the edges of a detail triangle which lie on the boundary of the polygon.
fn get_tri_flags(va: Vec3A, vb: Vec3A, vc: Vec3A, poly: &[Vec3A]) -> u8 {
    get_edge_flags(va, vb, poly)
        | (get_edge_flags(vb, vc, poly) << 2)
        | (get_edge_flags(vc, va, poly) << 4)
}

fn get_edge_flags(va: Vec3A, vb: Vec3A, poly: &[Vec3A]) -> u8 {
    // Figure out if edge (va,vb) is part of the polygon boundary.
    const THRESHOLD_SQUARED: f32 = 0.001 * 0.001;
    let mut j = poly.len() - 1;
    for i in 0..poly.len() {
        let segment = (poly[j].xz(), poly[i].xz());
        if distance_squared_between_point_and_line_vec2(va.xz(), segment) < THRESHOLD_SQUARED
            && distance_squared_between_point_and_line_vec2(vb.xz(), segment) < THRESHOLD_SQUARED
        {
            return DETAIL_EDGE_BOUNDARY;
        }
        j = i;
    }
    0
}

fn triangulate_hull(verts: &[Vec3A], hull: &[usize], nin: usize, tris: &mut Vec<[usize; 3]>) {
    let nhull = hull.len();
    let mut start = 0;
    let mut left = 1;
    let mut right = nhull - 1;

    // Start from an ear with shortest perimeter.
    // This tends to favor well formed triangles as starting point.
    let mut dmin = f32::MAX;
    for i in 0..nhull {
        if hull[i] >= nin {
            // Ears are triangles with original vertices as middle vertex while others are actually line segments on edges
            continue;
        }
        let pi = prev(i, nhull);
        let ni = next(i, nhull);
        let pv = verts[hull[pi]].xz();
        let cv = verts[hull[i]].xz();
        let nv = verts[hull[ni]].xz();
        let d = pv.distance(cv) + cv.distance(nv) + nv.distance(pv);
        if d < dmin {
            start = i;
            left = ni;
            right = pi;
            dmin = d;
        }
    }

    // Add first triangle
    tris.push([hull[start], hull[left], hull[right]]);

    // Triangulate the polygon by moving left or right,
    // depending on which triangle has shorter perimeter.
    // This heuristic was chose empirically, since it seems
    // handle tessellated straight edges well.
    while next(left, nhull) != right {
        // Check to see if se should advance left or right.
        let nleft = next(left, nhull);
        let nright = prev(right, nhull);

        let cvleft = verts[hull[left]].xz();
        let nvleft = verts[hull[nleft]].xz();
        let cvright = verts[hull[right]].xz();
        let nvright = verts[hull[nright]].xz();
        let dleft = cvleft.distance(nvleft) + nvleft.distance(cvright);
        let dright = cvright.distance(nvright) + cvleft.distance(nvright);

        if dleft < dright {
            tris.push([hull[left], hull[nleft], hull[right]]);
            left = nleft;
        } else {
            tris.push([hull[left], hull[nright], hull[right]]);
            right = nright;
        }
    }
}

fn get_height(f: Vec3A, ics: f32, ch: f32, radius: i32, hp: &HeightPatch) -> u16 {
    let width = hp.width as i32;
    let height = hp.height as i32;
    let mut ix = (f.x * ics + 0.01).floor() as i32;
    let mut iz = (f.z * ics + 0.01).floor() as i32;
    ix = (ix - hp.xmin as i32).clamp(0, (width - 1).max(0));
    iz = (iz - hp.zmin as i32).clamp(0, (height - 1).max(0));
    let Some(&center) = hp.data.get((ix + iz * width) as usize) else {
        return RC_UNSET_HEIGHT;
    };
    let mut h = center;
    if h != RC_UNSET_HEIGHT {
        return h;
    }

    // Special case when data might be bad.
    // Walk adjacent cells in a spiral up to 'radius', and look
    // for a pixel which has a valid height.
    let mut x = 1;
    let mut z = 0;
    let mut dx = 1;
    let mut dz = 0;
    let max_size = radius * 2 + 1;
    let max_iter = max_size * max_size - 1;

    let mut next_ring_iter_start = 8;
    let mut next_ring_iters = 16;

    let mut dmin = f32::MAX;
    for i in 0..max_iter {
        let nx = ix + x;
        let nz = iz + z;
        if nx >= 0 && nz >= 0 && nx < width && nz < height {
            let nh = hp.data[(nx + nz * width) as usize];
            if nh != RC_UNSET_HEIGHT {
                let d = (nh as f32 * ch - f.y).abs();
                if d < dmin {
                    h = nh;
                    dmin = d;
                }
            }
        }

        // We are searching in a grid which looks approximately like this:
        //  __________
        // |2 ______ 2|
        // | |1 __ 1| |
        // | | |__| | |
        // | |______| |
        // |__________|
        // We want to find the best height as close to the center cell as possible. This means that
        // if we find a height in one of the neighbor cells to the center, we don't want to
        // expand further out than the 8 neighbors - we want to limit our search to the closest
        // of these "rings", but the best height in the ring.
        // For example, the center is just 1 cell. We checked that at the entrance to the function.
        // The next "ring" contains 8 cells (marked 1 above). Those are all the neighbors to the center cell.
        // The next one again contains 16 cells (marked 2). In general each ring has 8 additional cells, which
        // can be thought of as adding 2 cells around the "center" of each side when we expand the ring.
        // Here we detect if we are about to enter the next ring, and if we are and we have found
        // a height, we abort the search.
        if i + 1 == next_ring_iter_start {
            if h != RC_UNSET_HEIGHT {
                break;
            }
            next_ring_iter_start += next_ring_iters;
            next_ring_iters += 8;
        }

        if x == z || (x < 0 && x == -z) || (x > 0 && x == 1 - z) {
            let tmp = dx;
            dx = -dz;
            dz = tmp;
        }
        x += dx;
        z += dz;
    }
    h
}

/// Squared minimum extent of the polygon: the smallest of the maximum distances of
/// the vertices to each edge.
fn poly_min_extent_squared(verts: &[Vec3A]) -> f32 {
    let nverts = verts.len();
    let mut min_dist = f32::MAX;
    for i in 0..nverts {
        let ni = next(i, nverts);
        let p1 = verts[i].xz();
        let p2 = verts[ni].xz();
        let mut max_edge_dist = 0.0_f32;
        for (j, v) in verts.iter().enumerate() {
            if j == i || j == ni {
                continue;
            }
            let d = distance_squared_between_point_and_line_vec2(v.xz(), (p1, p2));
            max_edge_dist = max_edge_dist.max(d);
        }
        min_dist = min_dist.min(max_edge_dist);
    }
    min_dist
}

/// Errors that can occur when building a [`DetailNavmesh`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetailNavmeshError {
    /// A polygon reaches beyond the compact heightfield, which means the two were not built together.
    #[error("Polygon {polygon} lies outside of the compact heightfield")]
    PolygonOutsideHeightfield {
        /// Index of the offending polygon.
        polygon: usize,
    },
}

/// Heights of the compact heightfield under one polygon, relative to the polygon's bounds.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct HeightPatch {
    data: Vec<u16>,
    xmin: u16,
    zmin: u16,
    width: u16,
    height: u16,
}

impl HeightPatch {
    fn get_height_data(
        &mut self,
        chf: &CompactHeightfield,
        poly: &[u16],
        verts: &[glam::U16Vec3],
        bs: u16,
        queue: &mut VecDeque<(u16, u16, usize)>,
        region: RegionId,
    ) {
        // Note: Reads to the compact heightfield are offset by border size (bs)
        // since border size offset is already removed from the polymesh vertices.
        queue.clear();
        // Set all heights to RC_UNSET_HEIGHT.
        self.fill(RC_UNSET_HEIGHT);

        let mut empty = true;

        // We cannot sample from this poly if it was created from polys
        // of different regions. If it was then it could potentially be overlapping
        // with polys of that region and the heights sampled here could be wrong.
        if region != RegionId::NONE {
            // Copy the height from the same region, and mark region borders
            // as seed points to fill the rest.
            for hz in 0..self.height {
                let z = self.zmin + hz + bs;
                for hx in 0..self.width {
                    let x = self.xmin + hx + bs;
                    for i in chf.cell_at(x, z).index_range() {
                        let span = &chf.spans[i];
                        if span.region != region {
                            continue;
                        }
                        // Store height
                        *self.data_at_mut(hx as i32, hz as i32) = span.y;
                        empty = false;

                        // If any of the neighbours is not in same region,
                        // add the current location as flood fill start
                        let border = (0..4).any(|dir| {
                            chf.con_index(x, z, i, dir)
                                .is_some_and(|ai| chf.spans[ai].region != region)
                        });
                        if border {
                            queue.push_back((x, z, i));
                        }
                        break;
                    }
                }
            }
        }

        // if the polygon does not contain any points from the current region (rare, but happens)
        // or if it could potentially be overlapping polygons of the same region,
        // then use the center as the seed point.
        if empty {
            self.seed_array_with_poly_center(chf, poly, verts, bs, queue);
        }

        // We assume the seed is centered in the polygon, so a BFS to collect
        // height data will ensure we do not move onto overlapping polygons and
        // sample wrong heights.
        while let Some((cx, cz, ci)) = queue.pop_front() {
            for dir in 0..4 {
                let Some((ax, az, ai)) = chf.neighbor(cx, cz, ci, dir) else {
                    continue;
                };
                let hx = ax as i32 - self.xmin as i32 - bs as i32;
                let hz = az as i32 - self.zmin as i32 - bs as i32;
                if hx < 0 || hz < 0 || hx >= self.width as i32 || hz >= self.height as i32 {
                    continue;
                }
                if *self.data_at(hx, hz) != RC_UNSET_HEIGHT {
                    continue;
                }
                *self.data_at_mut(hx, hz) = chf.spans[ai].y;
                queue.push_back((ax, az, ai));
            }
        }
    }

    fn seed_array_with_poly_center(
        &mut self,
        chf: &CompactHeightfield,
        poly: &[u16],
        verts: &[glam::U16Vec3],
        bs: u16,
        queue: &mut VecDeque<(u16, u16, usize)>,
    ) {
        // Note: Reads to the compact heightfield are offset by border size (bs)
        // since border size offset is already removed from the polymesh vertices.
        const OFFSET: [(i32, i32); 9] = [
            (0, 0),
            (-1, -1),
            (0, -1),
            (1, -1),
            (1, 0),
            (1, 1),
            (0, 1),
            (-1, 1),
            (-1, 0),
        ];

        // Find cell closest to a poly vertex
        let mut start = None;
        let mut dmin = RC_UNSET_HEIGHT as i32;
        'vertices: for &vertex in poly {
            let v = verts[vertex as usize].as_ivec3();
            for (ox, oz) in OFFSET {
                let ax = v.x + ox;
                let az = v.z + oz;
                if ax < self.xmin as i32
                    || ax >= self.xmin as i32 + self.width as i32
                    || az < self.zmin as i32
                    || az >= self.zmin as i32 + self.height as i32
                {
                    continue;
                }
                let cell = chf.cell_at((ax + bs as i32) as u16, (az + bs as i32) as u16);
                for i in cell.index_range() {
                    let d = (v.y - chf.spans[i].y as i32).abs();
                    if d < dmin {
                        start = Some((ax, az, i));
                        dmin = d;
                    }
                    if dmin <= 0 {
                        break 'vertices;
                    }
                }
            }
        }
        let Some(start) = start else {
            tracing::warn!("Found no span to seed the height patch of a polygon");
            return;
        };

        // Find center of the polygon
        let (mut pcx, mut pcz) = (0, 0);
        for &vertex in poly {
            let v = verts[vertex as usize];
            pcx += v.x as i32;
            pcz += v.z as i32;
        }
        pcx /= poly.len() as i32;
        pcz /= poly.len() as i32;

        // Use seeds array as a stack for DFS
        let mut stack = vec![start];
        let mut dirs = [0, 1, 2, 3];
        self.fill(0);
        // DFS to move to the center. Note that we need a DFS here and can not just move
        // directly towards the center without recording intermediate nodes, even though the polygons
        // are convex. In very rare we can get stuck due to contour simplification if we do not
        // record nodes.
        let mut current = start;
        loop {
            let Some(top) = stack.pop() else {
                tracing::warn!("Walk towards polygon center failed to reach center");
                break;
            };
            current = top;
            let (cx, cz, ci) = current;
            if cx == pcx && cz == pcz {
                break;
            }

            // If we are already at the correct X-position, prefer direction
            // directly towards the center in the Y-axis; otherwise prefer
            // direction in the X-axis
            let direct_dir = if cx == pcx {
                dir_offset(0, if pcz > cz { 1 } else { -1 })
            } else {
                dir_offset(if pcx > cx { 1 } else { -1 }, 0)
            } as usize;

            // Push the direct dir last so we start with this on next iteration
            dirs.swap(direct_dir, 3);

            for dir in dirs {
                let Some(con) = chf.spans[ci].con(dir) else {
                    continue;
                };
                let new_x = cx + dir_offset_x(dir) as i32;
                let new_z = cz + dir_offset_z(dir) as i32;

                let hpx = new_x - self.xmin as i32;
                let hpz = new_z - self.zmin as i32;
                if hpx < 0 || hpx >= self.width as i32 || hpz < 0 || hpz >= self.height as i32 {
                    continue;
                }
                if *self.data_at(hpx, hpz) != 0 {
                    continue;
                }
                *self.data_at_mut(hpx, hpz) = 1;
                let cell = chf.cell_at((new_x + bs as i32) as u16, (new_z + bs as i32) as u16);
                stack.push((new_x, new_z, cell.index() as usize + con as usize));
            }

            dirs.swap(direct_dir, 3);
        }

        // get_height_data seeds are given in coordinates with borders
        let (cx, cz, ci) = current;
        queue.clear();
        queue.push_back(((cx + bs as i32) as u16, (cz + bs as i32) as u16, ci));
        self.fill(RC_UNSET_HEIGHT);
        *self.data_at_mut(cx - self.xmin as i32, cz - self.zmin as i32) = chf.spans[ci].y;
    }

    fn fill(&mut self, value: u16) {
        let len = self.width as usize * self.height as usize;
        self.data[..len].fill(value);
    }

    #[inline]
    fn data_at(&self, x: i32, z: i32) -> &u16 {
        &self.data[(x + z * self.width as i32) as usize]
    }

    #[inline]
    fn data_at_mut(&mut self, x: i32, z: i32) -> &mut u16 {
        &mut self.data[(x + z * self.width as i32) as usize]
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Bounds {
    xmin: u16,
    xmax: u16,
    zmin: u16,
    zmax: u16,
}

impl Bounds {
    #[inline]
    fn width(&self) -> u16 {
        self.xmax.saturating_sub(self.xmin)
    }

    #[inline]
    fn height(&self) -> u16 {
        self.zmax.saturating_sub(self.zmin)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use crate::{BuildContoursFlags, test_utils::flat_compact_heightfield};

    use super::*;

    fn flat_meshes(sample_distance: f32) -> (PolygonNavmesh, DetailNavmesh) {
        let mut compact = flat_compact_heightfield(12);
        compact.build_distance_field();
        compact.build_regions(0, 8, 20).unwrap();
        let mesh = compact
            .build_contours(1.3, 0, BuildContoursFlags::DEFAULT)
            .into_polygon_mesh(6)
            .unwrap();
        let detail = DetailNavmesh::new(&mesh, &compact, sample_distance, 1.0).unwrap();
        (mesh, detail)
    }

    #[test]
    fn flat_polygon_detail_lies_on_the_plane() {
        let (mesh, detail) = flat_meshes(6.0);
        assert_eq!(detail.meshes.len(), mesh.polygon_count());
        let submesh = detail.meshes[0];
        assert!(submesh.vertex_count >= 4);
        assert!(submesh.triangle_count >= 2);
        let floor = detail.vertices[0].y;
        assert!(floor > 1.0);
        for v in &detail.vertices {
            assert_relative_eq!(v.y, floor);
            assert!((0.0..=12.0).contains(&v.x) && (0.0..=12.0).contains(&v.z), "{v}");
        }
        for triangle in &detail.triangles {
            for index in triangle.vertices {
                assert!((index as usize) < submesh.vertex_count);
            }
        }
    }

    #[test]
    fn zero_sample_distance_only_triangulates_the_hull() {
        let (mesh, detail) = flat_meshes(0.0);
        let submesh = detail.meshes[0];
        assert_eq!(submesh.vertex_count, mesh.polygon_vertices(0).len());
        assert_eq!(submesh.triangle_count, submesh.vertex_count - 2);
    }

    #[test]
    fn hull_triangles_flag_polygon_edges() {
        let (_, detail) = flat_meshes(0.0);
        let boundary_edges: usize = detail
            .triangles
            .iter()
            .map(|t| (0..3).filter(|edge| t.is_boundary_edge(*edge)).count())
            .sum();
        // Every edge of the quad is covered by exactly one triangle edge.
        assert_eq!(boundary_edges, 4);
    }

    #[test]
    fn delaunay_triangulates_square_with_center() {
        let pts = vec![
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(0.0, 0.0, 4.0),
            Vec3A::new(4.0, 0.0, 4.0),
            Vec3A::new(4.0, 0.0, 0.0),
            Vec3A::new(2.0, 1.0, 2.1),
        ];
        let hull = vec![0, 1, 2, 3];
        let mut tris = Vec::new();
        let mut edges = Vec::new();
        delaunay_hull(&pts, &hull, &mut tris, &mut edges);
        assert_eq!(tris.len(), 4);
        assert!(tris.iter().all(|t| t.contains(&4)));
    }

    #[test]
    fn triangulate_hull_fans_convex_polygon() {
        let verts = vec![
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(0.0, 0.0, 2.0),
            Vec3A::new(1.0, 0.0, 3.0),
            Vec3A::new(2.0, 0.0, 2.0),
            Vec3A::new(2.0, 0.0, 0.0),
        ];
        let hull: Vec<usize> = (0..5).collect();
        let mut tris = Vec::new();
        triangulate_hull(&verts, &hull, 5, &mut tris);
        assert_eq!(tris.len(), 3);
    }

    #[test]
    fn unset_heights_are_searched_in_rings() {
        let mut hp = HeightPatch {
            data: vec![RC_UNSET_HEIGHT; 25],
            xmin: 0,
            zmin: 0,
            width: 5,
            height: 5,
        };
        // A valid height two cells from the center.
        hp.data[2 + 4 * 5] = 7;
        let h = get_height(Vec3A::new(2.5, 0.0, 2.5), 1.0, 1.0, 2, &hp);
        assert_eq!(h, 7);
        let h = get_height(Vec3A::new(2.5, 0.0, 2.5), 1.0, 1.0, 1, &hp);
        assert_eq!(h, RC_UNSET_HEIGHT);
    }

    #[test]
    fn circum_circle_of_right_triangle() {
        let (c, r) = circum_circle(
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(2.0, 0.0, 0.0),
            Vec3A::new(0.0, 0.0, 2.0),
        )
        .unwrap();
        assert_relative_eq!(c.x, 1.0);
        assert_relative_eq!(c.z, 1.0);
        assert_relative_eq!(r, 2.0_f32.sqrt());
        assert!(
            circum_circle(
                Vec3A::ZERO,
                Vec3A::new(1.0, 0.0, 0.0),
                Vec3A::new(2.0, 0.0, 0.0)
            )
            .is_none()
        );
    }
}
