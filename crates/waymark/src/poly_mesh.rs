use glam::{IVec4, U16Vec3, UVec4};
use thiserror::Error;

use crate::{
    Aabb3d, AreaType, RegionId, RegionVertexId,
    contours::ContourSet,
    math::{intersect, intersect_prop, left, left_on, next, prev, xz_equal},
};

/// A value which indicates an invalid index within a mesh.
///
/// This does not necessarily indicate an error.
pub const RC_MESH_NULL_IDX: u16 = 0xffff;

/// The region id of polygons that were assembled from several regions while removing a vertex.
const MULTIPLE_REGIONS: RegionId = RegionId::NONE;

const VERTEX_BUCKET_COUNT: usize = 1 << 12;

/// Represents a polygon mesh suitable for use in building a navigation mesh.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolygonNavmesh {
    /// The mesh vertices in voxel coordinates.
    pub vertices: Vec<U16Vec3>,
    /// Polygon and neighbor data. [Length: [`Self::polygon_count`] * 2 * [`Self::vertices_per_polygon`]]
    ///
    /// Each polygon occupies `2 * vertices_per_polygon` slots. The first half holds the vertex indices,
    /// terminated by [`RC_MESH_NULL_IDX`]. The second half holds, per edge, the index of the
    /// neighbouring polygon, [`RC_MESH_NULL_IDX`] for a solid edge, or `0x8000 | side` for an
    /// edge on the tile border.
    pub polygons: Vec<u16>,
    /// The region id assigned to each polygon.
    pub regions: Vec<RegionId>,
    /// The user defined flags for each polygon.
    pub flags: Vec<u16>,
    /// The area id assigned to each polygon.
    pub areas: Vec<AreaType>,
    /// The maximum number of vertices per polygon
    pub vertices_per_polygon: usize,
    /// The bounding box of the mesh in world space.
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The AABB border size used to generate the source data from which the mesh was derived.
    pub border_size: u16,
    /// The max error of the polygon edges in the mesh.
    pub max_edge_error: f32,
}

impl PolygonNavmesh {
    /// The number of polygons in the mesh.
    #[inline]
    pub fn polygon_count(&self) -> usize {
        self.regions.len()
    }

    /// The vertex and neighbour slots of the polygon at `index`.
    #[inline]
    pub fn polygon(&self, index: usize) -> &[u16] {
        let stride = self.vertices_per_polygon * 2;
        &self.polygons[index * stride..(index + 1) * stride]
    }

    /// The vertex indices of the polygon at `index`, without the unused slots.
    pub fn polygon_vertices(&self, index: usize) -> &[u16] {
        let polygon = &self.polygon(index)[..self.vertices_per_polygon];
        &polygon[..count_poly_verts(polygon)]
    }

    /// The neighbour codes of the polygon at `index`, one per used vertex slot.
    pub fn polygon_neighbors(&self, index: usize) -> &[u16] {
        let polygon = self.polygon(index);
        let (vertices, neighbors) = polygon.split_at(self.vertices_per_polygon);
        &neighbors[..count_poly_verts(vertices)]
    }
}

impl ContourSet {
    /// Builds a polygon mesh from the provided contours.
    ///
    /// Each contour is triangulated, the triangles are merged greedily into convex polygons
    /// with at most `max_vertices_per_polygon` vertices, vertices flagged as tile border vertices are
    /// removed where possible, and finally the adjacency between polygons is calculated.
    pub fn into_polygon_mesh(
        self,
        max_vertices_per_polygon: u16,
    ) -> Result<PolygonNavmesh, PolygonMeshError> {
        let nvp = max_vertices_per_polygon as usize;
        if !(3..=MAX_VERTICES_PER_POLYGON).contains(&nvp) {
            return Err(PolygonMeshError::InvalidVerticesPerPolygon {
                vertices_per_polygon: max_vertices_per_polygon,
            });
        }

        let mut max_vertices = 0;
        let mut max_vertices_per_contour = 0;
        for contour in self.contours.iter().filter(|c| c.vertices.len() >= 3) {
            max_vertices += contour.vertices.len();
            max_vertices_per_contour = max_vertices_per_contour.max(contour.vertices.len());
        }
        if max_vertices >= 0xfffe {
            return Err(PolygonMeshError::TooManyVertices {
                vertex_count: max_vertices,
            });
        }

        let mut mesh = PolygonNavmesh {
            vertices: Vec::with_capacity(max_vertices),
            vertices_per_polygon: nvp,
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            border_size: self.border_size,
            max_edge_error: self.max_error,
            ..Default::default()
        };

        let mut remove_vertex_flags = vec![false; max_vertices];
        let mut buckets = VertexBuckets::new(max_vertices);

        let mut indices = Vec::with_capacity(max_vertices_per_contour);
        let mut triangles = Vec::with_capacity(max_vertices_per_contour);
        let mut polys: Vec<u16> = Vec::with_capacity(max_vertices_per_contour * nvp);

        for (contour_index, contour) in self.contours.iter().enumerate() {
            if contour.vertices.len() < 3 {
                continue;
            }

            // Triangulate contour
            let verts: Vec<IVec4> = contour.vertices.iter().map(UVec4::as_ivec4).collect();
            if !triangulate(&verts, &mut triangles) {
                // Bad triangulation, should not happen.
                tracing::warn!(contour = contour_index, "Bad triangulation of contour");
            }

            // Add and merge vertices.
            indices.clear();
            for v in &contour.vertices {
                let index = buckets.add_vertex(
                    U16Vec3::new(v.x as u16, v.y as u16, v.z as u16),
                    &mut mesh.vertices,
                );
                if RegionVertexId::from(v.w).contains(RegionVertexId::BORDER_VERTEX) {
                    // This vertex should be removed.
                    remove_vertex_flags[index as usize] = true;
                }
                indices.push(index);
            }

            // Build initial polygons.
            polys.clear();
            for triangle in &triangles {
                let [a, b, c] = *triangle;
                if a != b && a != c && b != c {
                    polys.extend([indices[a], indices[b], indices[c]]);
                    polys.extend(std::iter::repeat_n(RC_MESH_NULL_IDX, nvp - 3));
                }
            }
            if polys.is_empty() {
                continue;
            }

            // Merge polygons.
            if nvp > 3 {
                merge_polygons(&mut polys, &mesh.vertices, nvp, |_, _| {});
            }

            // Store polygons.
            for polygon in polys.chunks_exact(nvp) {
                mesh.polygons.extend_from_slice(polygon);
                mesh.polygons
                    .extend(std::iter::repeat_n(RC_MESH_NULL_IDX, nvp));
                mesh.regions.push(contour.region);
                mesh.areas.push(contour.area);
            }
        }

        // Remove edge vertices.
        let mut i = 0;
        while i < mesh.vertices.len() {
            if remove_vertex_flags[i] && mesh.can_remove_vertex(i as u16) {
                mesh.remove_vertex(i as u16);
                // Fixup vertex flags
                remove_vertex_flags.remove(i);
            } else {
                i += 1;
            }
        }

        // Calculate adjacency.
        build_mesh_adjacency(&mut mesh.polygons, mesh.vertices.len(), nvp);

        // Find portal edges
        if mesh.border_size > 0 {
            mesh.tag_portal_edges(self.width, self.height);
        }

        // Just allocate the mesh flags array. The user is responsible to fill it.
        mesh.flags = vec![0; mesh.polygon_count()];

        if mesh.vertices.len() > RC_MESH_NULL_IDX as usize {
            return Err(PolygonMeshError::TooManyVertices {
                vertex_count: mesh.vertices.len(),
            });
        }
        if mesh.polygon_count() > RC_MESH_NULL_IDX as usize {
            return Err(PolygonMeshError::TooManyPolygons {
                polygon_count: mesh.polygon_count(),
            });
        }

        tracing::debug!(
            vertices = mesh.vertices.len(),
            polygons = mesh.polygon_count(),
            "built polygon mesh"
        );
        Ok(mesh)
    }
}

/// The largest polygon the runtime tile format can store.
pub const MAX_VERTICES_PER_POLYGON: usize = 6;

impl PolygonNavmesh {
    /// Marks open edges lying on the field border as portals: `0x8000 | side`,
    /// with side 0 = -x, 1 = +z, 2 = +x, 3 = -z.
    fn tag_portal_edges(&mut self, width: u16, height: u16) {
        let nvp = self.vertices_per_polygon;
        for polygon in self.polygons.chunks_exact_mut(nvp * 2) {
            for j in 0..nvp {
                if polygon[j] == RC_MESH_NULL_IDX {
                    break;
                }
                // Skip connected edges.
                if polygon[nvp + j] != RC_MESH_NULL_IDX {
                    continue;
                }
                let mut nj = j + 1;
                if nj >= nvp || polygon[nj] == RC_MESH_NULL_IDX {
                    nj = 0;
                }
                let va = self.vertices[polygon[j] as usize];
                let vb = self.vertices[polygon[nj] as usize];

                if va.x == 0 && vb.x == 0 {
                    polygon[nvp + j] = 0x8000;
                } else if va.z == height && vb.z == height {
                    polygon[nvp + j] = 0x8000 | 1;
                } else if va.x == width && vb.x == width {
                    polygon[nvp + j] = 0x8000 | 2;
                } else if va.z == 0 && vb.z == 0 {
                    polygon[nvp + j] = 0x8000 | 3;
                }
            }
        }
    }

    fn can_remove_vertex(&self, rem: u16) -> bool {
        let nvp = self.vertices_per_polygon;

        // Count number of polygons to remove.
        let mut touched_vertex_count = 0;
        let mut remaining_edge_count = 0;
        for polygon in self.polygons.chunks_exact(nvp * 2) {
            let vertex_count = count_poly_verts(&polygon[..nvp]);
            let removed = polygon[..vertex_count].iter().filter(|v| **v == rem).count();
            if removed > 0 {
                touched_vertex_count += removed;
                remaining_edge_count += vertex_count - (removed + 1);
            }
        }

        // There would be too few edges remaining to create a polygon.
        // This can happen for example when a tip of a triangle is marked
        // as deletion, but there are no other polys that share the vertex.
        // In this case, the vertex should not be removed.
        if remaining_edge_count <= 2 {
            return false;
        }

        // Find edges which share the removed vertex.
        // (other vertex, share count)
        let mut edges: Vec<(u16, u32)> = Vec::with_capacity(touched_vertex_count * 2);
        for polygon in self.polygons.chunks_exact(nvp * 2) {
            let vertex_count = count_poly_verts(&polygon[..nvp]);

            // Collect edges which touches the removed vertex.
            let mut k = vertex_count - 1;
            for j in 0..vertex_count {
                if polygon[j] == rem || polygon[k] == rem {
                    // Arrange edge so that a=rem.
                    let b = if polygon[k] == rem {
                        polygon[j]
                    } else {
                        polygon[k]
                    };
                    // Check if the edge exists
                    match edges.iter_mut().find(|(other, _)| *other == b) {
                        // Exists, increment vertex share count.
                        Some((_, shares)) => *shares += 1,
                        None => edges.push((b, 1)),
                    }
                }
                k = j;
            }
        }

        // There should be no more than 2 open edges.
        // This catches the case that two non-adjacent polygons
        // share the removed vertex. In that case, do not remove the vertex.
        let open_edge_count = edges.iter().filter(|(_, shares)| *shares < 2).count();
        open_edge_count <= 2
    }

    /// Removes the vertex, re-triangulates the hole left behind and merges the new triangles.
    fn remove_vertex(&mut self, rem: u16) {
        let nvp = self.vertices_per_polygon;
        let stride = nvp * 2;

        // (from, to, region, area)
        let mut edges: Vec<(u16, u16, RegionId, AreaType)> = Vec::new();

        let mut i = 0;
        while i < self.polygon_count() {
            let polygon = &self.polygons[i * stride..(i + 1) * stride];
            let vertex_count = count_poly_verts(&polygon[..nvp]);
            if !polygon[..vertex_count].contains(&rem) {
                i += 1;
                continue;
            }
            // Collect edges which does not touch the removed vertex.
            let mut k = vertex_count - 1;
            for j in 0..vertex_count {
                if polygon[j] != rem && polygon[k] != rem {
                    edges.push((polygon[k], polygon[j], self.regions[i], self.areas[i]));
                }
                k = j;
            }

            // Remove the polygon.
            let last = self.polygon_count() - 1;
            if i != last {
                self.polygons
                    .copy_within(last * stride..last * stride + nvp, i * stride);
            }
            self.polygons[i * stride + nvp..(i + 1) * stride].fill(RC_MESH_NULL_IDX);
            self.polygons.truncate(last * stride);
            self.regions.swap_remove(i);
            self.areas.swap_remove(i);
        }

        // Remove vertex.
        self.vertices.remove(rem as usize);

        // Adjust indices to match the removed vertex layout.
        for polygon in self.polygons.chunks_exact_mut(stride) {
            let vertex_count = count_poly_verts(&polygon[..nvp]);
            for v in &mut polygon[..vertex_count] {
                if *v > rem {
                    *v -= 1;
                }
            }
        }
        for (a, b, _, _) in &mut edges {
            if *a > rem {
                *a -= 1;
            }
            if *b > rem {
                *b -= 1;
            }
        }

        let Some(&(first, _, first_region, first_area)) = edges.first() else {
            return;
        };

        // Start with one vertex, keep appending connected
        // segments to the start and end of the hole.
        let mut hole = std::collections::VecDeque::from([(first, first_region, first_area)]);
        while !edges.is_empty() {
            let mut matched = false;
            let mut i = 0;
            while i < edges.len() {
                let (ea, eb, region, area) = edges[i];
                let added = if hole.front().is_some_and(|(v, _, _)| *v == eb) {
                    // The segment matches the beginning of the hole boundary.
                    hole.push_front((ea, region, area));
                    true
                } else if hole.back().is_some_and(|(v, _, _)| *v == ea) {
                    // The segment matches the end of the hole boundary.
                    hole.push_back((eb, region, area));
                    true
                } else {
                    false
                };
                if added {
                    // The edge segment was added, remove it.
                    edges.swap_remove(i);
                    matched = true;
                } else {
                    i += 1;
                }
            }
            if !matched {
                break;
            }
        }
        let hole: Vec<_> = hole.into_iter().collect();

        // Generate temp vertex array for triangulation.
        let hole_verts: Vec<IVec4> = hole
            .iter()
            .map(|(v, _, _)| self.vertices[*v as usize].as_ivec3().extend(0))
            .collect();

        // Triangulate the hole.
        let mut triangles = Vec::with_capacity(hole.len());
        if !triangulate(&hole_verts, &mut triangles) {
            tracing::warn!("Hole left by a removed vertex could not be fully triangulated");
        }

        // Merge the hole triangles back to polygons.
        let mut polys: Vec<u16> = Vec::with_capacity(triangles.len() * nvp);
        // (region, area) per polygon
        let mut poly_data: Vec<(RegionId, AreaType)> = Vec::with_capacity(triangles.len());

        // Build initial polygons.
        for [a, b, c] in triangles {
            if a != b && a != c && b != c {
                polys.extend([hole[a].0, hole[b].0, hole[c].0]);
                polys.extend(std::iter::repeat_n(RC_MESH_NULL_IDX, nvp - 3));
                // If this polygon covers multiple region types then mark it as such
                let region = if hole[a].1 != hole[b].1 || hole[b].1 != hole[c].1 {
                    MULTIPLE_REGIONS
                } else {
                    hole[a].1
                };
                poly_data.push((region, hole[a].2));
            }
        }
        if polys.is_empty() {
            return;
        }

        // Merge polygons.
        if nvp > 3 {
            merge_polygons(&mut polys, &self.vertices, nvp, |pa, pb| {
                if poly_data[pa].0 != poly_data[pb].0 {
                    poly_data[pa].0 = MULTIPLE_REGIONS;
                }
                poly_data.swap_remove(pb);
            });
        }

        // Store polygons.
        for (polygon, (region, area)) in polys.chunks_exact(nvp).zip(poly_data) {
            self.polygons.extend_from_slice(polygon);
            self.polygons
                .extend(std::iter::repeat_n(RC_MESH_NULL_IDX, nvp));
            self.regions.push(region);
            self.areas.push(area);
        }
    }
}

/// Spatial hash welding vertices that share x and z and are within 2 voxels in y.
struct VertexBuckets {
    first: Vec<Option<u16>>,
    next: Vec<Option<u16>>,
}

impl VertexBuckets {
    fn new(capacity: usize) -> Self {
        Self {
            first: vec![None; VERTEX_BUCKET_COUNT],
            next: Vec::with_capacity(capacity),
        }
    }

    fn bucket(v: U16Vec3) -> usize {
        const H1: u32 = 0x8da6b343; // Large multiplicative constants;
        const H3: u32 = 0xcb1ab31f; // here arbitrarily chosen primes
        let n = H1
            .wrapping_mul(v.x as u32)
            .wrapping_add(H3.wrapping_mul(v.z as u32));
        n as usize & (VERTEX_BUCKET_COUNT - 1)
    }

    fn add_vertex(&mut self, v: U16Vec3, vertices: &mut Vec<U16Vec3>) -> u16 {
        let bucket = Self::bucket(v);
        let mut current = self.first[bucket];
        while let Some(i) = current {
            let existing = vertices[i as usize];
            if existing.x == v.x && existing.y.abs_diff(v.y) <= 2 && existing.z == v.z {
                return i;
            }
            current = self.next[i as usize];
        }
        // Could not find, create new.
        let i = vertices.len() as u16;
        vertices.push(v);
        self.next.push(self.first[bucket]);
        self.first[bucket] = Some(i);
        i
    }
}

/// Number of used vertex slots of a polygon.
#[inline]
pub(crate) fn count_poly_verts(polygon: &[u16]) -> usize {
    polygon
        .iter()
        .position(|v| *v == RC_MESH_NULL_IDX)
        .unwrap_or(polygon.len())
}

/// Greedily merges the polygons in `polys` (stride `nvp`) along their longest shared edge
/// as long as the result stays convex. `on_merge(pa, pb)` is called before polygon `pb`
/// is replaced by the last polygon.
fn merge_polygons(
    polys: &mut Vec<u16>,
    vertices: &[U16Vec3],
    nvp: usize,
    mut on_merge: impl FnMut(usize, usize),
) {
    loop {
        let poly_count = polys.len() / nvp;
        // Find best polygons to merge.
        let mut best: Option<(i32, usize, usize, usize, usize)> = None;
        for j in 0..poly_count.saturating_sub(1) {
            let pj = &polys[j * nvp..(j + 1) * nvp];
            for k in j + 1..poly_count {
                let pk = &polys[k * nvp..(k + 1) * nvp];
                let Some((value, ea, eb)) = get_poly_merge_value(pj, pk, vertices, nvp) else {
                    continue;
                };
                if best.is_none_or(|(best_value, ..)| value > best_value) {
                    best = Some((value, j, k, ea, eb));
                }
            }
        }

        let Some((_, pa, pb, ea, eb)) = best else {
            break;
        };
        // Found best, merge.
        let merged = merge_poly_verts(
            &polys[pa * nvp..(pa + 1) * nvp],
            &polys[pb * nvp..(pb + 1) * nvp],
            ea,
            eb,
            nvp,
        );
        polys[pa * nvp..(pa + 1) * nvp].copy_from_slice(&merged);
        on_merge(pa, pb);
        let last = poly_count - 1;
        if pb != last {
            polys.copy_within(last * nvp..(last + 1) * nvp, pb * nvp);
        }
        polys.truncate(last * nvp);
    }
}

/// Returns the squared length of the shared edge and the edge indices in both polygons,
/// or `None` if the polygons cannot be merged into a convex polygon.
fn get_poly_merge_value(
    pa: &[u16],
    pb: &[u16],
    vertices: &[U16Vec3],
    nvp: usize,
) -> Option<(i32, usize, usize)> {
    let na = count_poly_verts(pa);
    let nb = count_poly_verts(pb);

    // If the merged polygon would be too big, do not merge.
    if na + nb - 2 > nvp {
        return None;
    }

    // Check if the polygons share an edge.
    let sorted_edge = |p: &[u16], i: usize, n: usize| {
        let (v0, v1) = (p[i], p[(i + 1) % n]);
        if v0 > v1 { (v1, v0) } else { (v0, v1) }
    };
    let (ea, eb) = (0..na).find_map(|i| {
        let edge_a = sorted_edge(pa, i, na);
        (0..nb)
            .find(|&j| sorted_edge(pb, j, nb) == edge_a)
            .map(|j| (i, j))
    })?;

    // Check to see if the merged polygon would be convex.
    let vertex = |i: u16| vertices[i as usize];
    let va = pa[(ea + na - 1) % na];
    let vb = pa[ea];
    let vc = pb[(eb + 2) % nb];
    if !uleft(vertex(va), vertex(vb), vertex(vc)) {
        return None;
    }

    let va = pb[(eb + nb - 1) % nb];
    let vb = pb[eb];
    let vc = pa[(ea + 2) % na];
    if !uleft(vertex(va), vertex(vb), vertex(vc)) {
        return None;
    }

    let va = vertex(pa[ea]).as_ivec3();
    let vb = vertex(pa[(ea + 1) % na]).as_ivec3();
    let dx = va.x - vb.x;
    let dz = va.z - vb.z;
    Some((dx * dx + dz * dz, ea, eb))
}

#[inline]
fn uleft(a: U16Vec3, b: U16Vec3, c: U16Vec3) -> bool {
    let (a, b, c) = (a.as_ivec3(), b.as_ivec3(), c.as_ivec3());
    (b.x - a.x) * (c.z - a.z) - (c.x - a.x) * (b.z - a.z) < 0
}

/// Joins `pa` and `pb` along their shared edge `ea`/`eb`.
fn merge_poly_verts(pa: &[u16], pb: &[u16], ea: usize, eb: usize, nvp: usize) -> Vec<u16> {
    let na = count_poly_verts(pa);
    let nb = count_poly_verts(pb);
    let mut merged = Vec::with_capacity(nvp);
    // Add pa
    for i in 0..na - 1 {
        merged.push(pa[(ea + 1 + i) % na]);
    }
    // Add pb
    for i in 0..nb - 1 {
        merged.push(pb[(eb + 1 + i) % nb]);
    }
    merged.resize(nvp, RC_MESH_NULL_IDX);
    merged
}

/// Ear clipping triangulation of a simple polygon.
///
/// Returns false if the polygon could not be fully triangulated, in which case `triangles`
/// holds the triangles found so far.
fn triangulate(verts: &[IVec4], triangles: &mut Vec<[usize; 3]>) -> bool {
    triangles.clear();
    // (vertex index, whether the vertex is the tip of an ear)
    let mut indices: Vec<(usize, bool)> = (0..verts.len()).map(|i| (i, false)).collect();
    let n = indices.len();
    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        if diagonal(i, i2, verts, &indices) {
            indices[i1].1 = true;
        }
    }

    let shortest_diagonal = |indices: &[(usize, bool)], candidate: &dyn Fn(usize) -> bool| {
        let n = indices.len();
        let mut best: Option<(i32, usize)> = None;
        for i in 0..n {
            if !candidate(i) {
                continue;
            }
            let i1 = next(i, n);
            let p0 = verts[indices[i].0];
            let p2 = verts[indices[next(i1, n)].0];
            let dx = p2.x - p0.x;
            let dz = p2.z - p0.z;
            let len = dx * dx + dz * dz;
            if best.is_none_or(|(min_len, _)| len < min_len) {
                best = Some((len, i));
            }
        }
        best.map(|(_, i)| i)
    };

    while indices.len() > 3 {
        let n = indices.len();
        let mut mini = shortest_diagonal(&indices, &|i| indices[next(i, n)].1);

        if mini.is_none() {
            // We might get here because the contour has overlapping segments, like this:
            //
            //  A o-o=====o---o B
            //   /  |C   D|    \.
            //  o   o     o     o
            //  :   :     :     :
            //
            // We'll try to recover by loosing up the in_cone test a bit so that a diagonal
            // like A-B or C-D can be found and we can continue.
            mini = shortest_diagonal(&indices, &|i| {
                diagonal_loose(i, next(next(i, n), n), verts, &indices)
            });
        }
        let Some(i) = mini else {
            // The contour is messed up. This sometimes happens
            // if the contour simplification is too aggressive.
            return false;
        };

        let mut i1 = next(i, n);
        let i2 = next(i1, n);
        triangles.push([indices[i].0, indices[i1].0, indices[i2].0]);

        // Removes P[i1] by copying P[i+1]...P[n-1] left one index.
        indices.remove(i1);
        let n = indices.len();
        if i1 >= n {
            i1 = 0;
        }
        let i = prev(i1, n);
        // Update diagonal flags.
        indices[i].1 = diagonal(prev(i, n), i1, verts, &indices);
        indices[i1].1 = diagonal(i, next(i1, n), verts, &indices);
    }

    // Append the remaining triangle.
    triangles.push([indices[0].0, indices[1].0, indices[2].0]);
    true
}

#[inline]
fn vertex_at(verts: &[IVec4], indices: &[(usize, bool)], i: usize) -> IVec4 {
    verts[indices[i].0]
}

/// Returns true iff the diagonal (i,j) is strictly internal to the
/// polygon P in the neighborhood of the i endpoint.
fn in_cone(i: usize, j: usize, verts: &[IVec4], indices: &[(usize, bool)]) -> bool {
    let n = indices.len();
    let pi = vertex_at(verts, indices, i);
    let pj = vertex_at(verts, indices, j);
    let pi1 = vertex_at(verts, indices, next(i, n));
    let pin1 = vertex_at(verts, indices, prev(i, n));

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

fn in_cone_loose(i: usize, j: usize, verts: &[IVec4], indices: &[(usize, bool)]) -> bool {
    let n = indices.len();
    let pi = vertex_at(verts, indices, i);
    let pj = vertex_at(verts, indices, j);
    let pi1 = vertex_at(verts, indices, next(i, n));
    let pin1 = vertex_at(verts, indices, prev(i, n));

    if left_on(pin1, pi, pi1) {
        return left_on(pi, pj, pin1) && left_on(pj, pi, pi1);
    }
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

/// Returns true iff (v_i, v_j) is a proper internal *or* external
/// diagonal of P, *ignoring edges incident to v_i and v_j*.
fn diagonalie(
    i: usize,
    j: usize,
    verts: &[IVec4],
    indices: &[(usize, bool)],
    intersects: fn(IVec4, IVec4, IVec4, IVec4) -> bool,
) -> bool {
    let n = indices.len();
    let d0 = vertex_at(verts, indices, i);
    let d1 = vertex_at(verts, indices, j);

    // For each edge (k,k+1) of P
    for k in 0..n {
        let k1 = next(k, n);
        // Skip edges incident to i or j
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = vertex_at(verts, indices, k);
        let p1 = vertex_at(verts, indices, k1);
        if xz_equal(d0, p0) || xz_equal(d1, p0) || xz_equal(d0, p1) || xz_equal(d1, p1) {
            continue;
        }
        if intersects(d0, d1, p0, p1) {
            return false;
        }
    }
    true
}

/// Returns true iff (v_i, v_j) is a proper internal diagonal of P.
fn diagonal(i: usize, j: usize, verts: &[IVec4], indices: &[(usize, bool)]) -> bool {
    in_cone(i, j, verts, indices) && diagonalie(i, j, verts, indices, intersect)
}

fn diagonal_loose(i: usize, j: usize, verts: &[IVec4], indices: &[(usize, bool)]) -> bool {
    in_cone_loose(i, j, verts, indices) && diagonalie(i, j, verts, indices, intersect_prop)
}

/// Fills the neighbour half of every polygon with the index of the polygon sharing each edge.
pub(crate) fn build_mesh_adjacency(polygons: &mut [u16], vertex_count: usize, nvp: usize) {
    struct Edge {
        vert: [u16; 2],
        poly_edge: [usize; 2],
        poly: [usize; 2],
    }

    let stride = nvp * 2;
    let poly_count = polygons.len() / stride;
    let max_edge_count = poly_count * nvp;
    let mut first_edge: Vec<Option<usize>> = vec![None; vertex_count];
    let mut next_edge: Vec<Option<usize>> = Vec::with_capacity(max_edge_count);
    let mut edges: Vec<Edge> = Vec::with_capacity(max_edge_count);

    let edge_vertices = |polygon: &[u16], j: usize| {
        let v0 = polygon[j];
        let v1 = if j + 1 >= nvp || polygon[j + 1] == RC_MESH_NULL_IDX {
            polygon[0]
        } else {
            polygon[j + 1]
        };
        (v0, v1)
    };

    for (i, polygon) in polygons.chunks_exact(stride).enumerate() {
        for j in 0..count_poly_verts(&polygon[..nvp]) {
            let (v0, v1) = edge_vertices(polygon, j);
            if v0 < v1 {
                // Insert edge
                next_edge.push(first_edge[v0 as usize]);
                first_edge[v0 as usize] = Some(edges.len());
                edges.push(Edge {
                    vert: [v0, v1],
                    poly: [i, i],
                    poly_edge: [j, 0],
                });
            }
        }
    }

    for (i, polygon) in polygons.chunks_exact(stride).enumerate() {
        for j in 0..count_poly_verts(&polygon[..nvp]) {
            let (v0, v1) = edge_vertices(polygon, j);
            if v0 > v1 {
                let mut e = first_edge[v1 as usize];
                while let Some(edge_index) = e {
                    let edge = &mut edges[edge_index];
                    if edge.vert[1] == v0 && edge.poly[0] == edge.poly[1] {
                        edge.poly[1] = i;
                        edge.poly_edge[1] = j;
                        break;
                    }
                    e = next_edge[edge_index];
                }
            }
        }
    }

    // Store adjacency
    for edge in &edges {
        if edge.poly[0] != edge.poly[1] {
            polygons[edge.poly[0] * stride + nvp + edge.poly_edge[0]] = edge.poly[1] as u16;
            polygons[edge.poly[1] * stride + nvp + edge.poly_edge[1]] = edge.poly[0] as u16;
        }
    }
}

/// Errors that can occur when building a [`PolygonNavmesh`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolygonMeshError {
    /// The mesh needs more vertices than can be addressed with 16 bit indices.
    #[error("Too many vertices: {vertex_count}, the maximum is {}", 0xfffe)]
    TooManyVertices {
        /// The number of vertices requested.
        vertex_count: usize,
    },
    /// The mesh has more polygons than can be addressed with 16 bit indices.
    #[error("Too many polygons: {polygon_count}, the maximum is {}", 0xfffe)]
    TooManyPolygons {
        /// The number of polygons produced.
        polygon_count: usize,
    },
    /// The vertex limit per polygon is outside of `3..=6`.
    #[error(
        "Invalid number of vertices per polygon: {vertices_per_polygon}, must be between 3 and {MAX_VERTICES_PER_POLYGON}"
    )]
    InvalidVerticesPerPolygon {
        /// The requested number of vertices per polygon.
        vertices_per_polygon: u16,
    },
}

#[cfg(test)]
mod tests {
    use crate::{BuildContoursFlags, Contour, test_utils::flat_compact_heightfield};

    use super::*;

    fn square(size: i32) -> Vec<IVec4> {
        vec![
            IVec4::new(0, 0, 0, 0),
            IVec4::new(0, 0, size, 0),
            IVec4::new(size, 0, size, 0),
            IVec4::new(size, 0, 0, 0),
        ]
    }

    fn flat_mesh(size: u16, nvp: u16) -> PolygonNavmesh {
        let mut compact = flat_compact_heightfield(size);
        compact.build_distance_field();
        compact.build_regions(0, 8, 20).unwrap();
        compact
            .build_contours(1.3, 0, BuildContoursFlags::DEFAULT)
            .into_polygon_mesh(nvp)
            .unwrap()
    }

    #[test]
    fn square_triangulates_into_two_triangles() {
        let mut triangles = Vec::new();
        assert!(triangulate(&square(4), &mut triangles));
        assert_eq!(triangles.len(), 2);
    }

    #[test]
    fn concave_polygon_triangulates_completely() {
        // An L shape.
        let verts = vec![
            IVec4::new(0, 0, 0, 0),
            IVec4::new(0, 0, 4, 0),
            IVec4::new(2, 0, 4, 0),
            IVec4::new(2, 0, 2, 0),
            IVec4::new(4, 0, 2, 0),
            IVec4::new(4, 0, 0, 0),
        ];
        let mut triangles = Vec::new();
        assert!(triangulate(&verts, &mut triangles));
        assert_eq!(triangles.len(), verts.len() - 2);
    }

    #[test]
    fn flat_square_becomes_a_single_quad() {
        let mesh = flat_mesh(12, 6);
        assert_eq!(mesh.polygon_count(), 1);
        assert_eq!(mesh.polygon_vertices(0).len(), 4);
        assert!(
            mesh.polygon_neighbors(0)
                .iter()
                .all(|n| *n == RC_MESH_NULL_IDX)
        );
        assert_eq!(mesh.flags, vec![0]);
        assert_eq!(mesh.regions, vec![RegionId::from(1_u16)]);
    }

    #[test]
    fn triangle_only_meshes_link_neighbours() {
        let mesh = flat_mesh(12, 3);
        assert_eq!(mesh.polygon_count(), 2);
        assert_eq!(mesh.polygon_neighbors(0).iter().filter(|n| **n == 1).count(), 1);
        assert_eq!(mesh.polygon_neighbors(1).iter().filter(|n| **n == 0).count(), 1);
    }

    #[test]
    fn adjacency_is_symmetric() {
        let mut compact = flat_compact_heightfield(24);
        // A wall through the middle leaves a gap, which creates several regions.
        for z in 0..18 {
            let index = compact.cell_at(12, z).index() as usize;
            compact.areas[index] = AreaType::NOT_WALKABLE;
        }
        compact.build_distance_field();
        compact.build_regions(0, 0, 0).unwrap();
        let mesh = compact
            .build_contours(1.3, 0, BuildContoursFlags::DEFAULT)
            .into_polygon_mesh(6)
            .unwrap();
        assert!(mesh.polygon_count() > 1);
        for i in 0..mesh.polygon_count() {
            for (edge, neighbor) in mesh.polygon_neighbors(i).iter().enumerate() {
                if *neighbor == RC_MESH_NULL_IDX {
                    continue;
                }
                assert!(
                    mesh.polygon_neighbors(*neighbor as usize).contains(&(i as u16)),
                    "polygon {i} edge {edge} -> {neighbor}"
                );
            }
        }
    }

    #[test]
    fn border_edges_are_tagged_as_portals() {
        let contours = ContourSet {
            contours: vec![Contour {
                vertices: vec![
                    UVec4::new(0, 0, 0, 0),
                    UVec4::new(0, 0, 10, 0),
                    UVec4::new(10, 0, 10, 0),
                    UVec4::new(10, 0, 0, 0),
                ],
                raw_vertices: Vec::new(),
                region: RegionId::from(1_u16),
                area: AreaType::DEFAULT_WALKABLE,
            }],
            aabb: Aabb3d::default(),
            cell_size: 1.0,
            cell_height: 1.0,
            width: 10,
            height: 10,
            border_size: 2,
            max_error: 1.3,
        };
        let mesh = contours.into_polygon_mesh(6).unwrap();
        let mut sides: Vec<u16> = mesh.polygon_neighbors(0).to_vec();
        sides.sort();
        assert_eq!(sides, vec![0x8000, 0x8001, 0x8002, 0x8003]);
    }

    #[test]
    fn invalid_vertices_per_polygon_is_rejected() {
        let contours = ContourSet {
            contours: Vec::new(),
            aabb: Aabb3d::default(),
            cell_size: 1.0,
            cell_height: 1.0,
            width: 0,
            height: 0,
            border_size: 0,
            max_error: 1.3,
        };
        assert_eq!(
            contours.clone().into_polygon_mesh(2),
            Err(PolygonMeshError::InvalidVerticesPerPolygon {
                vertices_per_polygon: 2
            })
        );
        assert_eq!(
            contours.into_polygon_mesh(7),
            Err(PolygonMeshError::InvalidVerticesPerPolygon {
                vertices_per_polygon: 7
            })
        );
    }

    #[test]
    fn flagged_border_vertex_is_removed() {
        // A square with a border vertex in the middle of its left edge.
        let border = RegionVertexId::BORDER_VERTEX.bits();
        let contours = ContourSet {
            contours: vec![Contour {
                vertices: vec![
                    UVec4::new(0, 0, 0, 0),
                    UVec4::new(0, 0, 5, border),
                    UVec4::new(0, 0, 10, 0),
                    UVec4::new(10, 0, 10, 0),
                    UVec4::new(10, 0, 0, 0),
                ],
                raw_vertices: Vec::new(),
                region: RegionId::from(1_u16),
                area: AreaType::DEFAULT_WALKABLE,
            }],
            aabb: Aabb3d::default(),
            cell_size: 1.0,
            cell_height: 1.0,
            width: 10,
            height: 10,
            border_size: 0,
            max_error: 1.3,
        };
        let mesh = contours.into_polygon_mesh(6).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert!(!mesh.vertices.contains(&U16Vec3::new(0, 0, 5)));
        let total_vertices: usize = (0..mesh.polygon_count())
            .map(|i| mesh.polygon_vertices(i).len())
            .sum();
        assert!(total_vertices >= 4);
    }
}
