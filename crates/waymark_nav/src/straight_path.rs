//! String pulling of polygon corridors.

use bitflags::bitflags;
use glam::Vec3;

use crate::{
    math::{distance_pt_seg_sqr_2d, intersect_seg_seg_2d, tri_area_2d, vequal},
    poly_id::PolyId,
    query::{NavmeshQuery, closest_point_on_poly_boundary},
    status::{Status, StatusDetail},
    tile::PolyType,
};

bitflags! {
    /// Describes a vertex of a straight path.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct StraightPathFlags: u8 {
        /// The first vertex.
        const START = 1 << 0;
        /// The last vertex.
        const END = 1 << 1;
        /// The vertex is the start of an off-mesh connection.
        const OFFMESH_CONNECTION = 1 << 2;
    }
}

bitflags! {
    /// Options of [`NavmeshQuery::find_straight_path`].
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct StraightPathOptions: u8 {
        /// Add a vertex wherever the path crosses into a polygon of a different area.
        const AREA_CROSSINGS = 1 << 0;
        /// Add a vertex at every polygon crossing.
        const ALL_CROSSINGS = 1 << 1;
    }
}

/// A vertex of a straight path.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct StraightPathPoint {
    /// The position.
    pub pos: Vec3,
    /// What kind of vertex this is.
    pub flags: StraightPathFlags,
    /// The polygon the path enters at this vertex. [`PolyId::NULL`] for the end vertex.
    pub poly: PolyId,
}

/// What appending a vertex did to the path.
enum Append {
    Continue,
    Done(Status),
}

struct StraightPathBuilder<'p> {
    points: &'p mut Vec<StraightPathPoint>,
    max_points: usize,
}

impl StraightPathBuilder<'_> {
    /// Appends a vertex, or updates the last one if it is at the same position.
    fn append_vertex(&mut self, pos: Vec3, flags: StraightPathFlags, poly: PolyId) -> Append {
        if let Some(last) = self.points.last_mut().filter(|last| vequal(last.pos, pos)) {
            last.flags = flags;
            last.poly = poly;
            return Append::Continue;
        }

        self.points.push(StraightPathPoint { pos, flags, poly });
        if self.points.len() >= self.max_points {
            return Append::Done(Status::SUCCESS | StatusDetail::BUFFER_TOO_SMALL);
        }
        if flags == StraightPathFlags::END {
            return Append::Done(Status::SUCCESS);
        }
        Append::Continue
    }

    fn final_status(&self, status: Status) -> Status {
        if self.points.len() >= self.max_points {
            status | StatusDetail::BUFFER_TOO_SMALL
        } else {
            status
        }
    }
}

impl NavmeshQuery<'_> {
    /// Finds the straight path from `start` to `end` through a polygon corridor.
    ///
    /// Pulls the corridor taut like a string: a vertex is only emitted where the path has
    /// to bend around a corner. `start` and `end` are clamped to the first and last polygon.
    /// At most `max_points` vertices are stored, a truncated path sets
    /// [`StatusDetail::BUFFER_TOO_SMALL`]. If a polygon of the corridor is no longer valid,
    /// the path ends in the last valid polygon and [`StatusDetail::PARTIAL_RESULT`] is set.
    pub fn find_straight_path(
        &self,
        start: Vec3,
        end: Vec3,
        path: &[PolyId],
        points: &mut Vec<StraightPathPoint>,
        max_points: usize,
        options: StraightPathOptions,
    ) -> Status {
        points.clear();
        if !start.is_finite() || !end.is_finite() || max_points == 0 {
            return Status::invalid_param();
        }
        let (Some(first), Some(last)) = (path.first(), path.last()) else {
            return Status::invalid_param();
        };
        if first.is_null() {
            return Status::invalid_param();
        }
        let Ok(closest_start) = self.closest_point_on_poly_boundary(*first, start) else {
            return Status::invalid_param();
        };
        let Ok(mut closest_end) = self.closest_point_on_poly_boundary(*last, end) else {
            return Status::invalid_param();
        };

        let mut builder = StraightPathBuilder { points, max_points };
        if let Append::Done(status) = builder.append_vertex(closest_start, StraightPathFlags::START, *first) {
            return status;
        }

        let crossings = options.intersects(StraightPathOptions::AREA_CROSSINGS | StraightPathOptions::ALL_CROSSINGS);

        if path.len() > 1 {
            let mut apex = closest_start;
            let mut portal_left = apex;
            let mut portal_right = apex;
            let mut apex_index = 0;
            let mut left_index = 0;
            let mut right_index = 0;
            let mut left_poly_type = PolyType::Ground;
            let mut right_poly_type = PolyType::Ground;
            let mut left_poly = *first;
            let mut right_poly = *first;

            let mut i = 0;
            while i < path.len() {
                let (left, right, to_type) = if i + 1 < path.len() {
                    let portal = self
                        .mesh
                        .handle(path[i])
                        .and_then(|from| Ok((from, self.mesh.handle(path[i + 1])?)))
                        .and_then(|(from, to)| Ok((self.mesh.portal_points(from, to)?, to.poly.poly_type)));
                    let Ok(((left, right), to_type)) = portal else {
                        // The next polygon is gone, end the path in the current one.
                        let Ok((tile, poly)) = self.mesh.tile_and_poly_by_ref(path[i]) else {
                            return Status::invalid_param();
                        };
                        closest_end = closest_point_on_poly_boundary(tile, poly, end);
                        if crossings {
                            self.append_portals(&mut builder, apex_index, i, closest_end, path, options);
                        }
                        builder.append_vertex(closest_end, StraightPathFlags::empty(), path[i]);
                        return builder.final_status(Status::SUCCESS | StatusDetail::PARTIAL_RESULT);
                    };

                    // Starting right at the first portal, skip it.
                    if i == 0 && distance_pt_seg_sqr_2d(apex, left, right).0 < 0.001 * 0.001 {
                        i += 1;
                        continue;
                    }
                    (left, right, to_type)
                } else {
                    (closest_end, closest_end, PolyType::Ground)
                };

                // Right vertex.
                if tri_area_2d(apex, portal_right, right) <= 0.0 {
                    if vequal(apex, portal_right) || tri_area_2d(apex, portal_left, right) > 0.0 {
                        // Tighten the funnel.
                        portal_right = right;
                        right_poly = path.get(i + 1).copied().unwrap_or(PolyId::NULL);
                        right_poly_type = to_type;
                        right_index = i;
                    } else {
                        // Right over left, the left portal becomes the new apex.
                        if crossings {
                            if let Append::Done(status) =
                                self.append_portals(&mut builder, apex_index, left_index, portal_left, path, options)
                            {
                                return status;
                            }
                        }
                        apex = portal_left;
                        apex_index = left_index;
                        let flags = corner_flags(left_poly, left_poly_type);
                        if let Append::Done(status) = builder.append_vertex(apex, flags, left_poly) {
                            return status;
                        }
                        portal_left = apex;
                        portal_right = apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        // Restart from the new apex.
                        i = apex_index + 1;
                        continue;
                    }
                }

                // Left vertex.
                if tri_area_2d(apex, portal_left, left) >= 0.0 {
                    if vequal(apex, portal_left) || tri_area_2d(apex, portal_right, left) < 0.0 {
                        portal_left = left;
                        left_poly = path.get(i + 1).copied().unwrap_or(PolyId::NULL);
                        left_poly_type = to_type;
                        left_index = i;
                    } else {
                        // Left over right, the right portal becomes the new apex.
                        if crossings {
                            if let Append::Done(status) =
                                self.append_portals(&mut builder, apex_index, right_index, portal_right, path, options)
                            {
                                return status;
                            }
                        }
                        apex = portal_right;
                        apex_index = right_index;
                        let flags = corner_flags(right_poly, right_poly_type);
                        if let Append::Done(status) = builder.append_vertex(apex, flags, right_poly) {
                            return status;
                        }
                        portal_left = apex;
                        portal_right = apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }
                i += 1;
            }

            if crossings {
                if let Append::Done(status) =
                    self.append_portals(&mut builder, apex_index, path.len() - 1, closest_end, path, options)
                {
                    return status;
                }
            }
        }

        builder.append_vertex(closest_end, StraightPathFlags::END, PolyId::NULL);
        builder.final_status(Status::SUCCESS)
    }

    /// Adds a vertex at each portal crossed by the segment from the last vertex to `end`,
    /// for the corridor polygons `start_index..end_index`.
    fn append_portals(
        &self,
        builder: &mut StraightPathBuilder,
        start_index: usize,
        end_index: usize,
        end: Vec3,
        path: &[PolyId],
        options: StraightPathOptions,
    ) -> Append {
        let Some(start) = builder.points.last().map(|point| point.pos) else {
            return Append::Continue;
        };
        for i in start_index..end_index {
            let (Ok(from), Ok(to)) = (self.mesh.handle(path[i]), self.mesh.handle(path[i + 1])) else {
                return Append::Done(Status::invalid_param());
            };
            let Ok((left, right)) = self.mesh.portal_points(from, to) else {
                break;
            };
            if options.contains(StraightPathOptions::AREA_CROSSINGS) && from.poly.area == to.poly.area {
                continue;
            }
            if let Some((_, t)) = intersect_seg_seg_2d(start, end, left, right) {
                let point = left.lerp(right, t);
                if let Append::Done(status) = builder.append_vertex(point, StraightPathFlags::empty(), path[i + 1]) {
                    return Append::Done(status);
                }
            }
        }
        Append::Continue
    }
}

/// Flags of a corner vertex entering `poly`.
fn corner_flags(poly: PolyId, poly_type: PolyType) -> StraightPathFlags {
    if poly.is_null() {
        StraightPathFlags::END
    } else if poly_type == PolyType::OffMeshConnection {
        StraightPathFlags::OFFMESH_CONNECTION
    } else {
        StraightPathFlags::empty()
    }
}
