//! Builds meshes from triangle geometry and walks them with the agent level API.

use glam::{UVec3, Vec3, Vec3A};
use waymark::{Aabb3d, NavmeshConfigBuilder, TriMesh};
use waymark_nav::{AgentType, BuildSettings, StatusDetail, build};

fn plane(size: f32) -> TriMesh {
    TriMesh::new(
        vec![
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(0.0, 0.0, size),
            Vec3A::new(size, 0.0, size),
            Vec3A::new(size, 0.0, 0.0),
        ],
        vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
    )
}

fn settings(size: f32, tiling: bool) -> BuildSettings {
    BuildSettings {
        config: NavmeshConfigBuilder {
            aabb: Aabb3d {
                min: Vec3::new(0.0, -1.0, 0.0),
                max: Vec3::new(size, 1.0, size),
            },
            tiling,
            tile_size: 32,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn assert_near_xz(actual: Vec3, expected: Vec3) {
    assert!(
        (actual.x - expected.x).abs() < 0.05 && (actual.z - expected.z).abs() < 0.05,
        "{actual} is not near {expected}"
    );
}

#[test]
fn open_plane_path_is_a_straight_line() -> anyhow::Result<()> {
    let mesh = build(&plane(10.0), &settings(10.0, false))?;
    assert_eq!(mesh.tiles().count(), 1);

    let from = Vec3::new(2.0, 0.0, 2.0);
    let to = Vec3::new(8.0, 0.0, 8.0);
    let (status, path) = mesh.find_path(from, to, AgentType(0));
    assert!(status.is_success(), "{status}");
    assert!(!status.contains(StatusDetail::PARTIAL_RESULT));
    assert_eq!(path.len(), 2);
    assert_near_xz(path[0], from);
    assert_near_xz(path[1], to);
    Ok(())
}

#[test]
fn tiled_plane_links_its_tiles() -> anyhow::Result<()> {
    let mesh = build(&plane(20.0), &settings(20.0, true))?;
    assert!(mesh.tiles().count() > 1);

    let from = Vec3::new(2.0, 0.0, 2.0);
    let to = Vec3::new(18.0, 0.0, 18.0);
    let (status, path) = mesh.find_path(from, to, AgentType(0));
    assert!(status.is_success(), "{status}");
    assert!(!status.contains(StatusDetail::PARTIAL_RESULT));
    assert_near_xz(path[0], from);
    assert_near_xz(*path.last().unwrap(), to);
    Ok(())
}

#[test]
fn nearest_walkable_point_stays_off_the_edge() -> anyhow::Result<()> {
    let mesh = build(&plane(10.0), &settings(10.0, false))?;
    let point = mesh
        .find_nearest_walkable_point(Vec3::new(5.0, 0.5, 5.0), AgentType(0))
        .unwrap();
    assert_near_xz(point, Vec3::new(5.0, 0.0, 5.0));
    assert!(point.y.abs() < 0.5);

    // The walkable area is eroded by the agent radius, but the default query extents reach it.
    let point = mesh
        .find_nearest_walkable_point(Vec3::new(0.1, 0.0, 5.0), AgentType(0))
        .unwrap();
    assert!(point.x > 0.1);
    Ok(())
}
