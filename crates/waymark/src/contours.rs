use glam::{IVec4, UVec4};

use crate::{
    Aabb3d, AreaType, CompactHeightfield, RegionId,
    math::{
        distance_squared_between_point_and_line_i32, intersect, left, left_on, next, prev,
        xz_equal,
    },
};

impl CompactHeightfield {
    /// Builds a contour set from the region outlines in the provided compact heightfield.
    ///
    /// The raw contours will match the region outlines exactly. The `max_error` and `max_edge_len`
    /// parameters control how closely the simplified contours will match the raw contours.
    ///
    /// Simplified contours are generated such that the vertices for portals between areas match up.
    /// (They are considered mandatory vertices.)
    ///
    /// Setting `max_edge_len` to zero will disable the edge length feature.
    ///
    /// # Arguments
    ///
    /// - `max_error`: The maximum distance a simplified contour's border edges should deviate
    ///   the original raw contour. [Limit: >=0] [Units: vx]
    /// - `max_edge_len`: The maximum allowed length for contour edges along the border of the mesh. [Limit: >=0] [Units: vx]
    /// - `build_flags`: The build flags.
    pub fn build_contours(
        &self,
        max_error: f32,
        max_edge_len: u16,
        build_flags: BuildContoursFlags,
    ) -> ContourSet {
        let border_size = self.border_size;
        let mut contour_set = ContourSet {
            contours: Vec::with_capacity((self.max_region.bits() as usize).max(8)),
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            width: self.width.saturating_sub(border_size * 2),
            height: self.height.saturating_sub(border_size * 2),
            border_size,
            max_error,
        };
        if border_size > 0 {
            // If the heightfield was built with border_size, remove the offset
            let pad = border_size as f32 * self.cell_size;
            contour_set.aabb.min.x += pad;
            contour_set.aabb.min.z += pad;
            contour_set.aabb.max.x -= pad;
            contour_set.aabb.max.z -= pad;
        }

        let mut flags = vec![0_u8; self.spans.len()];

        // Mark boundaries
        for (x, z, span_range) in self.iter_columns() {
            for i in span_range {
                let region = self.spans[i].region;
                if region.is_null_or_border() {
                    flags[i] = 0;
                    continue;
                }
                let mut connected = 0;
                for dir in 0..4 {
                    let neighbor_region = self
                        .con_index(x, z, i, dir)
                        .map_or(RegionId::NONE, |ai| self.spans[ai].region);
                    if neighbor_region == region {
                        connected |= 1 << dir;
                    }
                }
                // Inverse, mark non connected edges.
                flags[i] = connected ^ 0xf;
            }
        }

        let mut verts = Vec::with_capacity(256);
        let mut simplified = Vec::with_capacity(64);

        for (x, z, span_range) in self.iter_columns() {
            for i in span_range {
                if flags[i] == 0 || flags[i] == 0xf {
                    flags[i] = 0;
                    continue;
                }
                let region = self.spans[i].region;
                if region.is_null_or_border() {
                    continue;
                }
                let area = self.areas[i];

                verts.clear();
                simplified.clear();

                self.walk_contour(x, z, i, &mut flags, &mut verts);
                simplify_contour(&verts, &mut simplified, max_error, max_edge_len, build_flags);
                remove_degenerate_segments(&mut simplified);

                // Create contour.
                if simplified.len() < 3 {
                    continue;
                }
                let remove_offset = |v: &UVec4| {
                    UVec4::new(
                        v.x - border_size as u32,
                        v.y,
                        v.z - border_size as u32,
                        v.w,
                    )
                };
                contour_set.contours.push(Contour {
                    vertices: simplified.iter().map(remove_offset).collect(),
                    raw_vertices: verts.iter().map(remove_offset).collect(),
                    region,
                    area,
                });
            }
        }

        contour_set.merge_holes(self.max_region);
        tracing::debug!(
            contours = contour_set.contours.len(),
            "built contours"
        );
        contour_set
    }

    /// Turtle walk along the non connected edges of a region, emitting a vertex at every edge corner.
    fn walk_contour(
        &self,
        mut x: u16,
        mut z: u16,
        mut i: usize,
        flags: &mut [u8],
        points: &mut Vec<UVec4>,
    ) {
        // Choose the first non-connected edge
        let mut dir = 0_u8;
        while flags[i] & (1 << dir) == 0 {
            dir += 1;
        }

        let start_dir = dir;
        let start_i = i;
        let area = self.areas[i];

        let mut iter = 0;
        loop {
            iter += 1;
            if iter >= 40_000 {
                tracing::warn!(x, z, "Contour walk exceeded its step limit");
                break;
            }
            if flags[i] & (1 << dir) != 0 {
                // Choose the edge corner
                let (py, is_border_vertex) = self.get_corner_height(x, z, i, dir);
                let mut px = x as u32;
                let mut pz = z as u32;
                match dir {
                    0 => pz += 1,
                    1 => {
                        px += 1;
                        pz += 1;
                    }
                    2 => px += 1,
                    _ => {}
                }
                let mut r = RegionVertexId::NONE;
                let mut is_area_border = false;
                if let Some(ai) = self.con_index(x, z, i, dir) {
                    r = RegionVertexId::from(self.spans[ai].region);
                    if area != self.areas[ai] {
                        is_area_border = true;
                    }
                }
                if is_border_vertex {
                    r |= RegionVertexId::BORDER_VERTEX;
                }
                if is_area_border {
                    r |= RegionVertexId::AREA_BORDER;
                }
                points.push(UVec4::new(px, py as u32, pz, r.bits()));

                // Remove visited edges
                flags[i] &= !(1 << dir);
                // Rotate CW
                dir = (dir + 1) & 0x3;
            } else {
                let Some((nx, nz, ni)) = self.neighbor(x, z, i, dir) else {
                    // Should not happen.
                    return;
                };
                x = nx;
                z = nz;
                i = ni;
                // Rotate CCW
                dir = (dir + 3) & 0x3;
            }

            if start_i == i && start_dir == dir {
                break;
            }
        }
    }

    /// Returns the height of the corner between `dir` and the next direction,
    /// and whether it is a vertex on the tile border that is removed later.
    fn get_corner_height(&self, x: u16, z: u16, i: usize, dir: u8) -> (u16, bool) {
        let span = &self.spans[i];
        let mut corner_height = span.y;
        let dir_p = (dir + 1) & 0x3;

        // Combine region and area codes in order to prevent
        // border vertices which are in between two areas to be removed.
        let region_and_area =
            |i: usize| self.spans[i].region.bits() as u32 | ((*self.areas[i] as u32) << 16);
        let mut regs = [0_u32; 4];
        regs[0] = region_and_area(i);

        if let Some((ax, az, ai)) = self.neighbor(x, z, i, dir) {
            corner_height = corner_height.max(self.spans[ai].y);
            regs[1] = region_and_area(ai);
            if let Some(bi) = self.con_index(ax, az, ai, dir_p) {
                corner_height = corner_height.max(self.spans[bi].y);
                regs[2] = region_and_area(bi);
            }
        }
        if let Some((ax, az, ai)) = self.neighbor(x, z, i, dir_p) {
            corner_height = corner_height.max(self.spans[ai].y);
            regs[3] = region_and_area(ai);
            if let Some(bi) = self.con_index(ax, az, ai, dir) {
                corner_height = corner_height.max(self.spans[bi].y);
                regs[2] = region_and_area(bi);
            }
        }

        // Check if the vertex is special edge vertex, these vertices will be removed later.
        let border = RegionId::BORDER_REGION.bits() as u32;
        let is_border_vertex = (0..4).any(|j| {
            let a = j;
            let b = (j + 1) & 0x3;
            let c = (j + 2) & 0x3;
            let d = (j + 3) & 0x3;

            // The vertex is a border vertex there are two same exterior cells in a row,
            // followed by two interior cells and none of the regions are out of bounds.
            let two_same_exts = (regs[a] & regs[b] & border) != 0 && regs[a] == regs[b];
            let two_ints = ((regs[c] | regs[d]) & border) == 0;
            let ints_same_area = (regs[c] >> 16) == (regs[d] >> 16);
            let no_zeros = regs.iter().all(|r| *r != 0);
            two_same_exts && two_ints && ints_same_area && no_zeros
        });
        (corner_height, is_border_vertex)
    }
}

/// Simplifies a raw contour. Vertices where the neighbouring region changes are mandatory,
/// the remaining edges are refined until every raw vertex lies within `max_error` of them.
///
/// While simplifying, the `w` component of `simplified` holds the index of the raw vertex.
/// Afterwards it holds the vertex flags.
pub(crate) fn simplify_contour(
    points: &[UVec4],
    simplified: &mut Vec<UVec4>,
    max_error: f32,
    max_edge_len: u16,
    build_flags: BuildContoursFlags,
) {
    let region_mask = RegionVertexId::REGION_MASK.bits();
    let area_border = RegionVertexId::AREA_BORDER.bits();

    // Add initial points.
    let has_connections = points.iter().any(|p| p.w & region_mask != 0);
    if has_connections {
        // The contour has some portals to other regions.
        // Add a new point to every location where the region changes.
        let ni = points.len();
        for (i, point) in points.iter().enumerate() {
            let next_point = points[(i + 1) % ni];
            let different_regs = (point.w & region_mask) != (next_point.w & region_mask);
            let area_borders = (point.w & area_border) != (next_point.w & area_border);
            if different_regs || area_borders {
                simplified.push(point.truncate().extend(i as u32));
            }
        }
    }

    if simplified.is_empty() {
        // If there is no connections at all,
        // create some initial points for the simplification process.
        // Find lower-left and upper-right vertices of the contour.
        let mut lower_left = (points[0], 0);
        let mut upper_right = (points[0], 0);
        for (i, p) in points.iter().enumerate() {
            let ll = lower_left.0;
            if p.x < ll.x || (p.x == ll.x && p.z < ll.z) {
                lower_left = (*p, i);
            }
            let ur = upper_right.0;
            if p.x > ur.x || (p.x == ur.x && p.z > ur.z) {
                upper_right = (*p, i);
            }
        }
        simplified.push(lower_left.0.truncate().extend(lower_left.1 as u32));
        simplified.push(upper_right.0.truncate().extend(upper_right.1 as u32));
    }

    // Add points until all raw points are within
    // error tolerance to the simplified shape.
    let pn = points.len();
    let max_error_squared = max_error * max_error;
    let mut i = 0;
    while i < simplified.len() {
        let ii = (i + 1) % simplified.len();
        let a = simplified[i];
        let b = simplified[ii];
        let (mut ax, mut az, ai) = (a.x as i32, a.z as i32, a.w as usize);
        let (mut bx, mut bz, bi) = (b.x as i32, b.z as i32, b.w as usize);

        // Find maximum deviation from the segment.
        let mut max_d = 0.0;
        let mut max_i = None;

        // Traverse the segment in lexilogical order so that the
        // max deviation is calculated similarly when traversing
        // opposite segments.
        let (mut ci, cinc, end_i) = if bx > ax || (bx == ax && bz > az) {
            ((ai + 1) % pn, 1, bi)
        } else {
            std::mem::swap(&mut ax, &mut bx);
            std::mem::swap(&mut az, &mut bz);
            ((bi + pn - 1) % pn, pn - 1, ai)
        };

        // Tessellate only outer edges or edges between areas.
        if points[ci].w & region_mask == 0 || points[ci].w & area_border != 0 {
            while ci != end_i {
                let d = distance_squared_between_point_and_line_i32(
                    (points[ci].x as i32, points[ci].z as i32),
                    (ax, az),
                    (bx, bz),
                );
                if d > max_d {
                    max_d = d;
                    max_i = Some(ci);
                }
                ci = (ci + cinc) % pn;
            }
        }

        // If the max deviation is larger than accepted error,
        // add new point, else continue to next segment.
        match max_i {
            Some(max_i) if max_d > max_error_squared => {
                simplified.insert(i + 1, points[max_i].truncate().extend(max_i as u32));
            }
            _ => i += 1,
        }
    }

    // Split too long edges.
    if max_edge_len > 0
        && build_flags.intersects(
            BuildContoursFlags::TESSELLATE_SOLID_WALL_EDGES
                | BuildContoursFlags::TESSELLATE_AREA_EDGES,
        )
    {
        let max_edge_len = max_edge_len as i32;
        let mut i = 0;
        while i < simplified.len() {
            let ii = (i + 1) % simplified.len();
            let a = simplified[i];
            let b = simplified[ii];
            let (ax, az, ai) = (a.x as i32, a.z as i32, a.w as usize);
            let (bx, bz, bi) = (b.x as i32, b.z as i32, b.w as usize);

            // Find maximum deviation from the segment.
            let mut max_i = None;
            let ci = (ai + 1) % pn;

            // Tessellate only outer edges or edges between areas.
            let tessellate = (build_flags.contains(BuildContoursFlags::TESSELLATE_SOLID_WALL_EDGES)
                && points[ci].w & region_mask == 0)
                || (build_flags.contains(BuildContoursFlags::TESSELLATE_AREA_EDGES)
                    && points[ci].w & area_border != 0);

            if tessellate {
                let dx = bx - ax;
                let dz = bz - az;
                if dx * dx + dz * dz > max_edge_len * max_edge_len {
                    // Round based on the segments in lexilogical order so that the
                    // max tesselation is consistent regardless in which direction
                    // segments are traversed.
                    let n = if bi < ai { bi + pn - ai } else { bi - ai };
                    if n > 1 {
                        max_i = Some(if bx > ax || (bx == ax && bz > az) {
                            (ai + n / 2) % pn
                        } else {
                            (ai + n.div_ceil(2)) % pn
                        });
                    }
                }
            }

            // If the max deviation is larger than accepted error,
            // add new point, else continue to next segment.
            match max_i {
                Some(max_i) => {
                    simplified.insert(i + 1, points[max_i].truncate().extend(max_i as u32));
                }
                None => i += 1,
            }
        }
    }

    for vertex in simplified.iter_mut() {
        // The edge vertex flag is take from the current raw point,
        // and the neighbour region is take from the next raw point.
        let ai = (vertex.w as usize + 1) % pn;
        let bi = vertex.w as usize;
        vertex.w = (points[ai].w & (region_mask | area_border))
            | (points[bi].w & RegionVertexId::BORDER_VERTEX.bits());
    }
}

/// Removes adjacent vertices which are equal on the xz-plane, or else the triangulator will get confused.
pub(crate) fn remove_degenerate_segments(simplified: &mut Vec<UVec4>) {
    let mut i = 0;
    while i < simplified.len() {
        let ni = next(i, simplified.len());
        let (a, b) = (simplified[i], simplified[ni]);
        if a.x == b.x && a.z == b.z && simplified.len() > 1 {
            // Degenerate segment, remove.
            simplified.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Twice the signed area of the contour on the xz-plane, rounded towards zero.
/// Negative for holes.
pub(crate) fn calc_area_of_polygon_2d(verts: &[UVec4]) -> i32 {
    let mut area = 0;
    let mut j = verts.len().wrapping_sub(1);
    for (i, vi) in verts.iter().enumerate() {
        let vj = verts[j];
        area += vi.x as i32 * vj.z as i32 - vj.x as i32 * vi.z as i32;
        j = i;
    }
    (area + 1) / 2
}

impl ContourSet {
    /// Merges contours with backwards winding (holes) into the outline of their region.
    fn merge_holes(&mut self, max_region: RegionId) {
        // Calculate winding of all polygons.
        let holes: Vec<bool> = self
            .contours
            .iter()
            .map(|contour| calc_area_of_polygon_2d(&contour.vertices) < 0)
            .collect();
        if !holes.iter().any(|is_hole| *is_hole) {
            return;
        }

        // Collect outline contour and holes contours per region.
        // We assume that there is one outline and multiple holes.
        let region_count = max_region.bits() as usize + 1;
        let mut outlines: Vec<Option<usize>> = vec![None; region_count];
        let mut region_holes: Vec<Vec<usize>> = vec![Vec::new(); region_count];
        for (i, contour) in self.contours.iter().enumerate() {
            let region = contour.region.bits() as usize;
            if region >= region_count {
                continue;
            }
            if holes[i] {
                region_holes[region].push(i);
            } else {
                if outlines[region].is_some() {
                    tracing::error!(region, "Multiple outlines for region");
                }
                outlines[region] = Some(i);
            }
        }

        let mut dropped = vec![false; self.contours.len()];
        for (region, hole_indices) in region_holes.iter().enumerate() {
            if hole_indices.is_empty() {
                continue;
            }
            match outlines[region] {
                Some(outline) => self.merge_region_holes(outline, hole_indices, &mut dropped),
                None => {
                    // The region does not have an outline.
                    // This can happen if the contour becomes self-overlapping because of
                    // too aggressive simplification settings.
                    tracing::warn!(
                        region,
                        "Bad outline for region, contour simplification is likely too aggressive"
                    );
                    for &hole in hole_indices {
                        dropped[hole] = true;
                    }
                }
            }
        }

        let mut index = 0;
        self.contours.retain(|_| {
            let keep = !dropped[index];
            index += 1;
            keep
        });
    }

    fn merge_region_holes(&mut self, outline: usize, hole_indices: &[usize], merged: &mut [bool]) {
        // Sort holes from left to right.
        let mut holes: Vec<(usize, IVec4, usize)> = hole_indices
            .iter()
            .map(|&hole| {
                let (leftmost, min) = find_left_most_vertex(&self.contours[hole].vertices);
                (hole, min, leftmost)
            })
            .collect();
        holes.sort_by(|a, b| a.1.x.cmp(&b.1.x).then(a.1.z.cmp(&b.1.z)));

        // Merge holes into the outline one by one.
        for (hole_position, &(hole, _, leftmost)) in holes.iter().enumerate() {
            let hole_vertex_count = self.contours[hole].vertices.len();
            let mut best_vertex = leftmost;
            let mut index = None;
            for _ in 0..hole_vertex_count {
                // Find potential diagonals.
                // The 'best' vertex must be in the cone described by 3 consecutive vertices of the outline.
                // ..o j-1
                //   |
                //   |   * best
                //   |
                // j o-----o j+1
                //         :
                let outline_verts = as_ivec4(&self.contours[outline].vertices);
                let corner = self.contours[hole].vertices[best_vertex].as_ivec4();
                let mut diagonals: Vec<(usize, i32)> = (0..outline_verts.len())
                    .filter(|&j| in_cone(j, &outline_verts, corner))
                    .map(|j| {
                        let dx = outline_verts[j].x - corner.x;
                        let dz = outline_verts[j].z - corner.z;
                        (j, dx * dx + dz * dz)
                    })
                    .collect();
                // Sort potential diagonals by distance, we want to make connection as short as possible.
                diagonals.sort_by_key(|(_, distance)| *distance);

                // Find a diagonal that is not intersecting the outline not the remaining holes.
                index = diagonals.iter().map(|(j, _)| *j).find(|&j| {
                    let pt = outline_verts[j];
                    let mut intersect =
                        intersect_seg_contour(pt, corner, Some(j), &outline_verts);
                    for &(other, _, _) in &holes[hole_position..] {
                        if intersect {
                            break;
                        }
                        let other_verts = as_ivec4(&self.contours[other].vertices);
                        intersect |= intersect_seg_contour(pt, corner, None, &other_verts);
                    }
                    !intersect
                });
                // If found non-intersecting diagonal, stop looking.
                if index.is_some() {
                    break;
                }
                // All the potential diagonals for the current vertex were intersecting, try next vertex.
                best_vertex = (best_vertex + 1) % hole_vertex_count;
            }

            let Some(index) = index else {
                tracing::warn!(
                    region = self.contours[outline].region.bits(),
                    "Failed to find merge points for a contour hole, dropping it"
                );
                merged[hole] = true;
                continue;
            };
            let hole_vertices = std::mem::take(&mut self.contours[hole].vertices);
            merge_contours(
                &mut self.contours[outline].vertices,
                &hole_vertices,
                index,
                best_vertex,
            );
            merged[hole] = true;
        }
    }
}

fn as_ivec4(verts: &[UVec4]) -> Vec<IVec4> {
    verts.iter().map(|v| v.as_ivec4()).collect()
}

/// Returns the index of the lower-left vertex and the vertex itself.
fn find_left_most_vertex(verts: &[UVec4]) -> (usize, IVec4) {
    let mut leftmost = 0;
    let mut min = verts[0].as_ivec4();
    for (i, v) in verts.iter().enumerate().skip(1) {
        let v = v.as_ivec4();
        if v.x < min.x || (v.x == min.x && v.z < min.z) {
            min = v;
            leftmost = i;
        }
    }
    (leftmost, min)
}

/// Splices contour `b` into `a`: `a[ia..] a[..=ia] b[ib..] b[..=ib]`.
fn merge_contours(a: &mut Vec<UVec4>, b: &[UVec4], ia: usize, ib: usize) {
    let mut verts = Vec::with_capacity(a.len() + b.len() + 2);
    // Copy contour A.
    for i in 0..=a.len() {
        verts.push(a[(ia + i) % a.len()]);
    }
    // Copy contour B
    for i in 0..=b.len() {
        verts.push(b[(ib + i) % b.len()]);
    }
    *a = verts;
}

/// Whether the segment `d0 d1` crosses any edge of the contour, ignoring the edges incident to `skip`.
fn intersect_seg_contour(d0: IVec4, d1: IVec4, skip: Option<usize>, verts: &[IVec4]) -> bool {
    // For each edge (k,k+1) of P
    let n = verts.len();
    for k in 0..n {
        let k1 = next(k, n);
        // Skip edges incident to i.
        if skip == Some(k) || skip == Some(k1) {
            continue;
        }
        let p0 = verts[k];
        let p1 = verts[k1];
        if xz_equal(d0, p0) || xz_equal(d1, p0) || xz_equal(d0, p1) || xz_equal(d1, p1) {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return true;
        }
    }
    false
}

/// Whether `pj` lies in the cone formed by vertex `i` of the polygon and its two neighbours.
fn in_cone(i: usize, verts: &[IVec4], pj: IVec4) -> bool {
    let n = verts.len();
    let pi = verts[i];
    let pi1 = verts[next(i, n)];
    let pin1 = verts[prev(i, n)];

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

/// Represents a group of related contours.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ContourSet {
    /// An array of the contours in the set.
    pub contours: Vec<Contour>,
    /// The AABB in world space
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The width of the set. (Along the x-axis in cell units.)
    pub width: u16,
    /// The height of the set. (Along the z-axis in cell units.)
    pub height: u16,
    /// The AABB border size used to generate the source data from which the contours were derived.
    pub border_size: u16,
    /// The max edge error that this contour set was simplified with.
    pub max_error: f32,
}

bitflags::bitflags! {
    /// The `w` component of a contour vertex: the region across the following edge plus vertex flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct RegionVertexId: u32 {
        /// No neighbouring region, i.e. a solid edge.
        const NONE = 0;

        /// Applied to the region id field of contour vertices in order to extract the region id.
        /// The region id field of a vertex may have several flags applied to it.  So the
        /// fields value can't be used directly.
        const REGION_MASK = RegionId::MAX.bits() as u32;

        /// Border vertex flag.
        /// If a region ID has this bit set, then the associated element lies on
        /// a tile border. If a contour vertex's region ID has this bit set, the
        /// vertex will later be removed in order to match the segments and vertices
        /// at tile boundaries.
        /// (Used during the build process.)
        const BORDER_VERTEX = 0x10_000;

        /// Area border flag.
        /// If a region ID has this bit set, then the associated element lies on
        /// the border of an area.
        /// (Used during the region and contour build process.)
        const AREA_BORDER = 0x20_000;

        const _ = !0;
    }
}

impl From<u32> for RegionVertexId {
    fn from(bits: u32) -> Self {
        RegionVertexId::from_bits_retain(bits)
    }
}

impl From<RegionId> for RegionVertexId {
    fn from(region_id: RegionId) -> Self {
        RegionVertexId::from_bits_retain(region_id.bits() as u32)
    }
}

impl RegionVertexId {
    /// The neighbouring region without the vertex flags.
    #[inline]
    pub fn region(self) -> RegionId {
        RegionId::from((self.bits() & Self::REGION_MASK.bits()) as u16)
    }
}

/// Represents a simple, non-overlapping contour in field space.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Contour {
    /// Simplified contour vertex and connection data.
    /// `w` holds the [`RegionVertexId`] bits.
    pub vertices: Vec<UVec4>,
    /// Raw contour vertex and connection data.
    /// `w` holds the [`RegionVertexId`] bits.
    pub raw_vertices: Vec<UVec4>,
    /// Region ID of the contour.
    pub region: RegionId,
    /// Area type of the contour.
    pub area: AreaType,
}

bitflags::bitflags! {
    /// Contour build flags used in [`CompactHeightfield::build_contours`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct BuildContoursFlags: u8 {
        /// Tessellate solid (impassable) edges during contour simplification.
        const TESSELLATE_SOLID_WALL_EDGES = 1;
        /// Tessellate edges between areas during contour simplification.
        const TESSELLATE_AREA_EDGES = 2;

        /// Default flags for building contours.
        const DEFAULT = Self::TESSELLATE_SOLID_WALL_EDGES.bits();
    }
}

impl Default for BuildContoursFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}
