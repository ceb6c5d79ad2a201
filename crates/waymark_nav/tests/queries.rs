//! Runs the queries against small handcrafted meshes of unit squares.

use approx::assert_relative_eq;
use glam::{U16Vec3, Vec3};
use rand::{SeedableRng, rngs::StdRng};
use waymark::{Aabb3d, AreaType, PolygonNavmesh, RC_MESH_NULL_IDX, RegionId};
use waymark_nav::{
    DefaultQueryFilter, FindPathOptions, NavmeshQuery, NavmeshTileData, PolyId, RaycastHit,
    RaycastOptions, Status, StatusDetail, StraightPathFlags, StraightPathOptions, TileBuildParams,
    TiledMesh, TiledMeshParams, WallHit,
};

const NVP: usize = 6;

/// A mesh of unit squares at the grid cells for which `walkable` returns `true`.
///
/// Polygons are numbered row by row, skipping cells that are not walkable.
fn grid_mesh(width: u16, depth: u16, walkable: impl Fn(u16, u16) -> bool) -> TiledMesh {
    let vertex = |x: u16, z: u16| z * (width + 1) + x;
    let mut vertices = Vec::new();
    for z in 0..=depth {
        for x in 0..=width {
            vertices.push(U16Vec3::new(x, 0, z));
        }
    }

    let mut indices = vec![None; (width * depth) as usize];
    let mut count = 0;
    for z in 0..depth {
        for x in 0..width {
            if walkable(x, z) {
                indices[(z * width + x) as usize] = Some(count);
                count += 1;
            }
        }
    }
    let index = |x: i32, z: i32| -> u16 {
        if x < 0 || z < 0 || x >= width as i32 || z >= depth as i32 {
            return RC_MESH_NULL_IDX;
        }
        indices[(z * width as i32 + x) as usize].unwrap_or(RC_MESH_NULL_IDX)
    };

    let mut polygons = Vec::new();
    for z in 0..depth {
        for x in 0..width {
            if !walkable(x, z) {
                continue;
            }
            let mut slots = vec![RC_MESH_NULL_IDX; NVP * 2];
            slots[..4].copy_from_slice(&[
                vertex(x, z),
                vertex(x, z + 1),
                vertex(x + 1, z + 1),
                vertex(x + 1, z),
            ]);
            let (x, z) = (x as i32, z as i32);
            slots[NVP..NVP + 4].copy_from_slice(&[
                index(x - 1, z),
                index(x, z + 1),
                index(x + 1, z),
                index(x, z - 1),
            ]);
            polygons.extend(slots);
        }
    }

    let count = count as usize;
    let polygons = PolygonNavmesh {
        vertices,
        polygons,
        regions: vec![RegionId::from(1_u16); count],
        flags: vec![1; count],
        areas: vec![AreaType::DEFAULT_WALKABLE; count],
        vertices_per_polygon: NVP,
        aabb: Aabb3d {
            min: Vec3::ZERO,
            max: Vec3::new(width as f32, 1.0, depth as f32),
        },
        cell_size: 1.0,
        cell_height: 1.0,
        border_size: 0,
        max_edge_error: 0.0,
    };
    let tile = NavmeshTileData::new(&TileBuildParams::new(&polygons, None, 2.0, 0.5, 1.0)).unwrap();
    let mut mesh = TiledMesh::new(TiledMeshParams {
        origin: Vec3::ZERO,
        tile_width: width as f32,
        tile_height: depth as f32,
        max_tiles: 1,
        max_polys: 256,
    })
    .unwrap();
    mesh.add_tile(tile).unwrap();
    mesh
}

fn strip(length: u16) -> TiledMesh {
    grid_mesh(length, 1, |_, _| true)
}

fn poly_at(query: &NavmeshQuery, pos: Vec3) -> PolyId {
    query
        .find_nearest_poly(pos, Vec3::new(0.1, 1.0, 0.1), &DefaultQueryFilter::default())
        .unwrap()
        .unwrap()
        .poly
}

fn center(x: u16, z: u16) -> Vec3 {
    Vec3::new(x as f32 + 0.5, 0.0, z as f32 + 0.5)
}

#[test]
fn nearest_poly_snaps_onto_the_surface() {
    let mesh = strip(3);
    let query = NavmeshQuery::new(&mesh, 64).unwrap();
    let filter = DefaultQueryFilter::default();
    let nearest = query
        .find_nearest_poly(Vec3::new(1.5, 0.5, 0.5), Vec3::new(1.0, 1.0, 1.0), &filter)
        .unwrap()
        .unwrap();
    assert!(nearest.over_poly);
    assert_relative_eq!(nearest.point, Vec3::new(1.5, 0.0, 0.5), epsilon = 1e-5);

    let far = query
        .find_nearest_poly(Vec3::new(10.0, 0.0, 10.0), Vec3::ONE, &filter)
        .unwrap();
    assert_eq!(far, None);
}

#[test]
fn query_polygons_reports_a_full_buffer() {
    let mesh = strip(4);
    let query = NavmeshQuery::new(&mesh, 64).unwrap();
    let filter = DefaultQueryFilter::default();
    let mut polys = Vec::new();

    let status = query.query_polygons(Vec3::new(2.0, 0.0, 0.5), Vec3::new(2.5, 1.0, 1.0), &filter, &mut polys, 16);
    assert_eq!(status, Status::SUCCESS);
    assert_eq!(polys.len(), 4);

    let status = query.query_polygons(Vec3::new(2.0, 0.0, 0.5), Vec3::new(2.5, 1.0, 1.0), &filter, &mut polys, 2);
    assert_eq!(status, Status::SUCCESS | StatusDetail::BUFFER_TOO_SMALL);
    assert_eq!(polys.len(), 2);
}

#[test]
fn path_along_a_strip_visits_every_polygon() {
    let mesh = strip(5);
    let mut query = NavmeshQuery::new(&mesh, 64).unwrap();
    let filter = DefaultQueryFilter::default();
    let start = poly_at(&query, center(0, 0));
    let end = poly_at(&query, center(4, 0));

    let mut path = Vec::new();
    let status = query.find_path(start, end, center(0, 0), center(4, 0), &filter, &mut path, 32);
    assert_eq!(status, Status::SUCCESS);
    assert_eq!(path.len(), 5);
    assert_eq!(path.first(), Some(&start));
    assert_eq!(path.last(), Some(&end));
    for id in &path {
        assert!(query.is_in_closed_list(*id));
    }
}

#[test]
fn path_within_one_polygon() {
    let mesh = strip(2);
    let mut query = NavmeshQuery::new(&mesh, 64).unwrap();
    let filter = DefaultQueryFilter::default();
    let start = poly_at(&query, center(0, 0));

    let mut path = Vec::new();
    let status = query.find_path(
        start,
        start,
        Vec3::new(0.2, 0.0, 0.2),
        Vec3::new(0.8, 0.0, 0.8),
        &filter,
        &mut path,
        8,
    );
    assert_eq!(status, Status::SUCCESS);
    assert_eq!(path, vec![start]);
}

#[test]
fn empty_path_buffer_is_an_invalid_param() {
    let mesh = strip(2);
    let mut query = NavmeshQuery::new(&mesh, 64).unwrap();
    let filter = DefaultQueryFilter::default();
    let start = poly_at(&query, center(0, 0));
    let end = poly_at(&query, center(1, 0));

    let mut path = Vec::new();
    let status = query.find_path(start, end, center(0, 0), center(1, 0), &filter, &mut path, 0);
    assert_eq!(status, Status::FAILURE | StatusDetail::INVALID_PARAM);
    assert!(path.is_empty());
}

#[test]
fn truncated_path_is_reported() {
    let mesh = strip(6);
    let mut query = NavmeshQuery::new(&mesh, 64).unwrap();
    let filter = DefaultQueryFilter::default();
    let start = poly_at(&query, center(0, 0));
    let end = poly_at(&query, center(5, 0));

    let mut path = Vec::new();
    let status = query.find_path(start, end, center(0, 0), center(5, 0), &filter, &mut path, 3);
    assert!(status.is_success());
    assert!(status.contains(StatusDetail::BUFFER_TOO_SMALL));
    assert_eq!(path.len(), 3);
    assert_eq!(path[0], start);
}

#[test]
fn unreachable_goal_yields_a_partial_path() {
    // Two islands separated by an unwalkable column.
    let mesh = grid_mesh(5, 1, |x, _| x != 2);
    let mut query = NavmeshQuery::new(&mesh, 64).unwrap();
    let filter = DefaultQueryFilter::default();
    let start = poly_at(&query, center(0, 0));
    let end = poly_at(&query, center(4, 0));

    let mut path = Vec::new();
    let status = query.find_path(start, end, center(0, 0), center(4, 0), &filter, &mut path, 32);
    assert_eq!(status, Status::SUCCESS | StatusDetail::PARTIAL_RESULT);
    assert_eq!(path, vec![start, poly_at(&query, center(1, 0))]);
}

#[test]
fn running_out_of_nodes_keeps_the_best_path() {
    let mesh = strip(8);
    let mut query = NavmeshQuery::new(&mesh, 3).unwrap();
    let filter = DefaultQueryFilter::default();
    let start = poly_at(&query, center(0, 0));
    let end = poly_at(&query, center(7, 0));

    let mut path = Vec::new();
    let status = query.find_path(start, end, center(0, 0), center(7, 0), &filter, &mut path, 32);
    assert!(status.is_success());
    assert!(status.contains(StatusDetail::OUT_OF_NODES));
    assert!(status.contains(StatusDetail::PARTIAL_RESULT));
    assert_eq!(path.first(), Some(&start));
    assert_ne!(path.last(), Some(&end));
}

#[test]
fn sliced_search_matches_the_full_search() {
    let mesh = grid_mesh(6, 6, |x, z| !(x == 3 && z < 5));
    let filter = DefaultQueryFilter::default();
    let mut query = NavmeshQuery::new(&mesh, 256).unwrap();
    let start = poly_at(&query, center(0, 0));
    let end = poly_at(&query, center(5, 0));

    let mut expected = Vec::new();
    let status = query.find_path(start, end, center(0, 0), center(5, 0), &filter, &mut expected, 64);
    assert_eq!(status, Status::SUCCESS);

    let status = query.init_sliced_find_path(start, end, center(0, 0), center(5, 0), &filter, FindPathOptions::empty());
    assert!(status.is_in_progress());
    let mut total_iterations = 0;
    loop {
        let (status, iterations) = query.update_sliced_find_path(2);
        assert!(iterations <= 2);
        total_iterations += iterations;
        if !status.is_in_progress() {
            assert!(status.is_success());
            break;
        }
    }
    assert!(total_iterations > 1);

    let mut sliced = Vec::new();
    let status = query.finalize_sliced_find_path(&mut sliced, 64);
    assert_eq!(status, Status::SUCCESS);
    assert_eq!(sliced, expected);
}

#[test]
fn any_angle_search_reaches_the_goal() {
    let mesh = grid_mesh(4, 4, |_, _| true);
    let filter = DefaultQueryFilter::default();
    let mut query = NavmeshQuery::new(&mesh, 256).unwrap();
    let start = poly_at(&query, center(0, 0));
    let end = poly_at(&query, center(3, 3));

    query.init_sliced_find_path(start, end, center(0, 0), center(3, 3), &filter, FindPathOptions::ANY_ANGLE);
    let (status, _) = query.update_sliced_find_path(1000);
    assert!(status.is_success());

    let mut path = Vec::new();
    let status = query.finalize_sliced_find_path(&mut path, 64);
    assert!(status.is_success());
    assert_eq!(path.first(), Some(&start));
    assert_eq!(path.last(), Some(&end));
}

#[test]
fn cancelled_search_continues_an_existing_corridor() {
    let mesh = strip(8);
    let filter = DefaultQueryFilter::default();
    let mut query = NavmeshQuery::new(&mesh, 256).unwrap();
    let start = poly_at(&query, center(0, 0));
    let end = poly_at(&query, center(7, 0));
    let third = poly_at(&query, center(2, 0));

    query.init_sliced_find_path(start, end, center(0, 0), center(7, 0), &filter, FindPathOptions::empty());
    query.update_sliced_find_path(3);

    let mut path = Vec::new();
    let status = query.finalize_sliced_find_path_partial(&[start, poly_at(&query, center(1, 0)), third], &mut path, 64);
    assert!(status.is_success());
    assert_eq!(path.first(), Some(&start));
    assert_eq!(path.last(), Some(&third));
}

#[test]
fn straight_path_along_a_strip_has_no_corners() {
    let mesh = strip(5);
    let mut query = NavmeshQuery::new(&mesh, 64).unwrap();
    let filter = DefaultQueryFilter::default();
    let start = poly_at(&query, center(0, 0));
    let end = poly_at(&query, center(4, 0));
    let mut path = Vec::new();
    query.find_path(start, end, center(0, 0), center(4, 0), &filter, &mut path, 32);

    let mut points = Vec::new();
    let status = query.find_straight_path(center(0, 0), center(4, 0), &path, &mut points, 16, StraightPathOptions::empty());
    assert_eq!(status, Status::SUCCESS);
    assert_eq!(points.len(), 2);
    assert_eq!(points[0].flags, StraightPathFlags::START);
    assert_eq!(points[0].poly, start);
    assert_eq!(points[1].flags, StraightPathFlags::END);
    assert_relative_eq!(points[1].pos, center(4, 0), epsilon = 1e-5);

    let status = query.find_straight_path(
        center(0, 0),
        center(4, 0),
        &path,
        &mut points,
        16,
        StraightPathOptions::ALL_CROSSINGS,
    );
    assert_eq!(status, Status::SUCCESS);
    // Start, one vertex per portal, end.
    assert_eq!(points.len(), 6);
    assert_relative_eq!(points[2].pos, Vec3::new(2.0, 0.0, 0.5), epsilon = 1e-5);
}

#[test]
fn straight_path_bends_around_a_corner() {
    // An L-shaped corridor: along the bottom row, then up the right column.
    let mesh = grid_mesh(3, 3, |x, z| z == 0 || x == 2);
    let mut query = NavmeshQuery::new(&mesh, 64).unwrap();
    let filter = DefaultQueryFilter::default();
    let start = poly_at(&query, center(0, 0));
    let end = poly_at(&query, center(2, 2));
    let mut path = Vec::new();
    let status = query.find_path(start, end, center(0, 0), center(2, 2), &filter, &mut path, 32);
    assert_eq!(status, Status::SUCCESS);
    assert_eq!(path.len(), 5);

    let mut points = Vec::new();
    let status = query.find_straight_path(center(0, 0), center(2, 2), &path, &mut points, 16, StraightPathOptions::empty());
    assert_eq!(status, Status::SUCCESS);
    assert_eq!(points.len(), 3);
    assert_relative_eq!(points[1].pos, Vec3::new(2.0, 0.0, 1.0), epsilon = 1e-5);
    assert_eq!(points[1].flags, StraightPathFlags::empty());

    let status = query.find_straight_path(center(0, 0), center(2, 2), &path, &mut points, 2, StraightPathOptions::empty());
    assert_eq!(status, Status::SUCCESS | StatusDetail::BUFFER_TOO_SMALL);
    assert_eq!(points.len(), 2);
}

#[test]
fn raycast_reaches_the_end_of_a_strip() {
    let mesh = strip(5);
    let query = NavmeshQuery::new(&mesh, 64).unwrap();
    let filter = DefaultQueryFilter::default();
    let start = poly_at(&query, center(0, 0));

    let mut hit = RaycastHit::default();
    let status = query.raycast(start, center(0, 0), center(4, 0), &filter, RaycastOptions::USE_COSTS, None, &mut hit, 16);
    assert_eq!(status, Status::SUCCESS);
    assert!(hit.reached_end());
    assert_eq!(hit.path.len(), 5);
    assert_relative_eq!(hit.path_cost, 4.0, epsilon = 1e-4);
}

#[test]
fn raycast_stops_at_a_wall() {
    let mesh = strip(5);
    let query = NavmeshQuery::new(&mesh, 64).unwrap();
    let filter = DefaultQueryFilter::default();
    let start = poly_at(&query, center(0, 0));

    let mut hit = RaycastHit::default();
    let status = query.raycast(
        start,
        center(0, 0),
        Vec3::new(0.5, 0.0, 3.0),
        &filter,
        RaycastOptions::empty(),
        None,
        &mut hit,
        16,
    );
    assert_eq!(status, Status::SUCCESS);
    assert!(!hit.reached_end());
    assert_relative_eq!(hit.t, 0.2, epsilon = 1e-5);
    assert_relative_eq!(hit.hit_normal, Vec3::new(0.0, 0.0, -1.0), epsilon = 1e-5);
    assert_eq!(hit.hit_edge_index, Some(1));
    assert_eq!(hit.path, vec![start]);
}

#[test]
fn distance_to_wall_in_an_open_field() {
    let mesh = grid_mesh(5, 5, |_, _| true);
    let mut query = NavmeshQuery::new(&mesh, 64).unwrap();
    let filter = DefaultQueryFilter::default();
    let start = poly_at(&query, center(2, 1));

    let mut hit = WallHit::default();
    let status = query.find_distance_to_wall(start, center(2, 1), 10.0, &filter, &mut hit);
    assert!(status.is_success());
    assert_relative_eq!(hit.distance, 1.5, epsilon = 1e-5);
    assert_relative_eq!(hit.position, Vec3::new(2.5, 0.0, 0.0), epsilon = 1e-5);
    assert_relative_eq!(hit.normal, Vec3::new(0.0, 0.0, 1.0), epsilon = 1e-5);

    // No wall within the radius.
    let status = query.find_distance_to_wall(start, center(2, 1), 1.0, &filter, &mut hit);
    assert!(status.is_success());
    assert_relative_eq!(hit.distance, 1.0, epsilon = 1e-5);
    assert_eq!(hit.position, center(2, 1));

    let status = query.find_distance_to_wall(start, center(2, 1), -1.0, &filter, &mut hit);
    assert_eq!(status, Status::invalid_param());
}

#[test]
fn wall_segments_of_a_strip_polygon() {
    let mesh = strip(3);
    let query = NavmeshQuery::new(&mesh, 64).unwrap();
    let filter = DefaultQueryFilter::default();
    let middle = poly_at(&query, center(1, 0));

    let mut segments = Vec::new();
    let status = query.get_poly_wall_segments(middle, &filter, &mut segments, 8, false);
    assert_eq!(status, Status::SUCCESS);
    assert_eq!(segments.len(), 2);
    assert!(segments.iter().all(|segment| segment.neighbour.is_none()));

    let status = query.get_poly_wall_segments(middle, &filter, &mut segments, 8, true);
    assert_eq!(status, Status::SUCCESS);
    assert_eq!(segments.len(), 4);
    assert_eq!(segments.iter().filter(|segment| segment.neighbour.is_some()).count(), 2);

    let status = query.get_poly_wall_segments(middle, &filter, &mut segments, 3, true);
    assert_eq!(status, Status::SUCCESS | StatusDetail::BUFFER_TOO_SMALL);
    assert_eq!(segments.len(), 3);
}

#[test]
fn excluded_polygons_become_walls() {
    let mesh = strip(3);
    let mut query = NavmeshQuery::new(&mesh, 64).unwrap();
    let start = poly_at(&query, center(0, 0));
    let end = poly_at(&query, center(2, 0));
    let filter = DefaultQueryFilter::default().with_include_flags(2);

    assert!(!query.is_valid_poly_ref(end, &filter));
    let mut path = Vec::new();
    let status = query.find_path(start, end, center(0, 0), center(2, 0), &filter, &mut path, 8);
    assert!(status.contains(StatusDetail::PARTIAL_RESULT));
    assert_eq!(path, vec![start]);
}

#[test]
fn polys_around_a_circle_are_ordered_by_cost() {
    let mesh = strip(5);
    let mut query = NavmeshQuery::new(&mesh, 64).unwrap();
    let filter = DefaultQueryFilter::default();
    let start = poly_at(&query, center(0, 0));

    let mut result = Vec::new();
    let status = query.find_polys_around_circle(start, center(0, 0), 1.6, &filter, &mut result, 16);
    assert_eq!(status, Status::SUCCESS);
    let polys: Vec<PolyId> = result.iter().map(|visited| visited.poly).collect();
    assert_eq!(
        polys,
        vec![start, poly_at(&query, center(1, 0)), poly_at(&query, center(2, 0))]
    );
    assert_eq!(result[0].parent, None);
    assert_eq!(result[1].parent, Some(start));
    assert!(result.windows(2).all(|pair| pair[0].cost <= pair[1].cost));

    let status = query.find_polys_around_circle(start, center(0, 0), 1.6, &filter, &mut result, 2);
    assert_eq!(status, Status::SUCCESS | StatusDetail::BUFFER_TOO_SMALL);
    assert_eq!(result.len(), 2);
}

#[test]
fn polys_around_a_shape() {
    let mesh = strip(5);
    let mut query = NavmeshQuery::new(&mesh, 64).unwrap();
    let filter = DefaultQueryFilter::default();
    let shape = [
        Vec3::new(0.2, 0.0, 0.2),
        Vec3::new(0.2, 0.0, 0.8),
        Vec3::new(2.5, 0.0, 0.8),
        Vec3::new(2.5, 0.0, 0.2),
    ];
    let start = poly_at(&query, Vec3::new(1.35, 0.0, 0.5));

    let mut result = Vec::new();
    let status = query.find_polys_around_shape(start, &shape, &filter, &mut result, 16);
    assert_eq!(status, Status::SUCCESS);
    let mut polys: Vec<PolyId> = result.iter().map(|visited| visited.poly).collect();
    polys.sort();
    let mut expected = vec![
        poly_at(&query, center(0, 0)),
        poly_at(&query, center(1, 0)),
        poly_at(&query, center(2, 0)),
    ];
    expected.sort();
    assert_eq!(polys, expected);
    assert_eq!(result[0].poly, start);
}

#[test]
fn local_neighbourhood_stays_within_the_radius() {
    let mesh = strip(5);
    let mut query = NavmeshQuery::new(&mesh, 64).unwrap();
    let filter = DefaultQueryFilter::default();
    let start = poly_at(&query, center(0, 0));

    let mut result = Vec::new();
    let status = query.find_local_neighbourhood(start, center(0, 0), 1.6, &filter, &mut result, 16);
    assert_eq!(status, Status::SUCCESS);
    assert_eq!(result.len(), 3);
    assert_eq!(result[0].poly, start);
    assert!(result.iter().all(|visited| visited.cost == 0.0));
}

#[test]
fn random_points_lie_on_the_mesh() {
    let mesh = grid_mesh(4, 4, |x, z| x != 1 || z == 3);
    let mut query = NavmeshQuery::new(&mesh, 64).unwrap();
    let filter = DefaultQueryFilter::default();
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..50 {
        let random = query.find_random_point(&filter, &mut rng).unwrap();
        assert!(mesh.is_valid_poly_ref(random.poly));
        let (closest, over) = query.closest_point_on_poly(random.poly, random.point).unwrap();
        assert!(over);
        assert_relative_eq!(closest, random.point, epsilon = 1e-4);
    }

    let start = poly_at(&query, center(0, 0));
    for _ in 0..50 {
        let random = query
            .find_random_point_around_circle(start, center(0, 0), 1.2, &filter, &mut rng)
            .unwrap();
        // The circle reaches the polygons above the start, but not across the gap.
        assert!(random.point.x < 1.0 + 1e-4, "{random:?}");
        assert!(random.point.z < 3.0 + 1e-4, "{random:?}");
    }

    let excluding = DefaultQueryFilter::default().with_exclude_flags(1);
    assert_eq!(query.find_random_point(&excluding, &mut rng), Err(Status::FAILURE));
}

#[test]
fn moving_along_the_surface_slides_along_walls() {
    let mesh = strip(5);
    let mut query = NavmeshQuery::new(&mesh, 64).unwrap();
    let filter = DefaultQueryFilter::default();
    let start = poly_at(&query, center(0, 0));

    let mut result = Vec3::ZERO;
    let mut visited = Vec::new();
    let status = query.move_along_surface(start, center(0, 0), Vec3::new(0.5, 0.0, 3.0), &filter, &mut result, &mut visited, 16);
    assert_eq!(status, Status::SUCCESS);
    assert_relative_eq!(result, Vec3::new(0.5, 0.0, 1.0), epsilon = 1e-5);
    assert_eq!(visited, vec![start]);

    let status = query.move_along_surface(start, center(0, 0), center(3, 0), &filter, &mut result, &mut visited, 16);
    assert_eq!(status, Status::SUCCESS);
    assert_eq!(result, center(3, 0));
    assert_eq!(visited.len(), 4);
    assert_eq!(visited.first(), Some(&start));
    assert_eq!(visited.last(), Some(&poly_at(&query, center(3, 0))));

    let status = query.move_along_surface(start, center(0, 0), center(3, 0), &filter, &mut result, &mut visited, 2);
    assert_eq!(status, Status::SUCCESS | StatusDetail::BUFFER_TOO_SMALL);
    assert_eq!(visited.len(), 2);
}

#[test]
fn empty_output_buffers_are_invalid_params() {
    let mesh = strip(5);
    let mut query = NavmeshQuery::new(&mesh, 64).unwrap();
    let filter = DefaultQueryFilter::default();
    let start = poly_at(&query, center(0, 0));
    let invalid = Status::FAILURE | StatusDetail::INVALID_PARAM;

    let mut result = Vec::new();
    let status = query.find_polys_around_circle(start, center(0, 0), 1.6, &filter, &mut result, 0);
    assert_eq!(status, invalid);
    assert!(result.is_empty());

    let shape = [
        Vec3::new(0.2, 0.0, 0.2),
        Vec3::new(0.2, 0.0, 0.8),
        Vec3::new(0.8, 0.0, 0.8),
    ];
    let status = query.find_polys_around_shape(start, &shape, &filter, &mut result, 0);
    assert_eq!(status, invalid);
    assert!(result.is_empty());

    let status = query.find_local_neighbourhood(start, center(0, 0), 1.6, &filter, &mut result, 0);
    assert_eq!(status, invalid);
    assert!(result.is_empty());

    let mut segments = Vec::new();
    let status = query.get_poly_wall_segments(start, &filter, &mut segments, 0, true);
    assert_eq!(status, invalid);
    assert!(segments.is_empty());

    let mut position = Vec3::ZERO;
    let mut visited = Vec::new();
    let status = query.move_along_surface(
        start,
        center(0, 0),
        center(3, 0),
        &filter,
        &mut position,
        &mut visited,
        0,
    );
    assert_eq!(status, invalid);
    assert!(visited.is_empty());
}

#[test]
fn portal_and_height_helpers() {
    let mesh = strip(2);
    let query = NavmeshQuery::new(&mesh, 64).unwrap();
    let first = poly_at(&query, center(0, 0));
    let second = poly_at(&query, center(1, 0));

    let (left, right) = query.get_portal_points(first, second).unwrap();
    assert_relative_eq!(left.x, 1.0);
    assert_relative_eq!(right.x, 1.0);
    assert_relative_eq!((left.z - right.z).abs(), 1.0);
    assert_relative_eq!(query.get_edge_mid_point(first, second).unwrap(), Vec3::new(1.0, 0.0, 0.5));

    assert_relative_eq!(query.get_poly_height(first, center(0, 0)).unwrap(), 0.0);
    assert!(query.get_poly_height(first, center(1, 0)).is_err());
    assert_relative_eq!(
        query.closest_point_on_poly_boundary(first, Vec3::new(3.0, 5.0, 0.5)).unwrap(),
        Vec3::new(1.0, 0.0, 0.5)
    );
    assert!(query.get_portal_points(first, PolyId::NULL).is_err());
}

#[test]
fn removed_tiles_invalidate_their_polygons() {
    let mut mesh = strip(2);
    let (tile_ref, _) = mesh.tiles().next().unwrap();
    let first = {
        let query = NavmeshQuery::new(&mesh, 64).unwrap();
        poly_at(&query, center(0, 0))
    };
    let data = mesh.remove_tile(tile_ref).unwrap();
    assert!(!mesh.is_valid_poly_ref(first));

    mesh.add_tile(data).unwrap();
    assert!(!mesh.is_valid_poly_ref(first));
    let query = NavmeshQuery::new(&mesh, 64).unwrap();
    let rebuilt = poly_at(&query, center(0, 0));
    assert_ne!(rebuilt, first);
    assert!(mesh.is_valid_poly_ref(rebuilt));
}
