//! Degenerate configurations: cospherical and concircular point sets.
//!
//! The corners of a cube all lie on one sphere and every face lies on one
//! circle, so these inputs force the exact tie-breaking and the dedicated
//! sphere and circle triangulations.

use dynamic_delaunay::prelude::*;

fn cube_corners() -> [[f64; 3]; 8] {
    [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [1.0, 1.0, 0.0],
        [1.0, 0.0, 1.0],
        [0.0, 1.0, 1.0],
        [1.0, 1.0, 1.0],
    ]
}

#[test]
fn cube_corners_triangulate_cleanly() {
    let mut triangulation: Triangulation<()> = Triangulation::with_seed(17);
    for position in cube_corners() {
        triangulation.create_node(position, ()).unwrap();
    }
    assert_eq!(triangulation.node_count(), 8);
    // A cube decomposes into five or six tetrahedra.
    let finite = triangulation.finite_tetrahedron_count();
    assert!((5..=6).contains(&finite), "unexpected count {finite}");
    triangulation.check_invariants().unwrap();
    // With all corners on one sphere, any triangulation is Delaunay.
    assert!(triangulation.is_delaunay().unwrap());
}

#[test]
fn center_of_a_cospherical_shell_can_be_inserted_and_removed() {
    let mut triangulation: Triangulation<()> = Triangulation::with_seed(17);
    for position in cube_corners() {
        triangulation.create_node(position, ()).unwrap();
    }
    let center = triangulation.create_node([0.5, 0.5, 0.5], ()).unwrap();
    triangulation.check_invariants().unwrap();
    assert!(triangulation.is_delaunay().unwrap());
    // Removing the center leaves a hole whose boundary nodes are all
    // cospherical; filling it exercises the surface triangulation.
    triangulation.remove_node(center).unwrap();
    assert_eq!(triangulation.node_count(), 8);
    triangulation.check_invariants().unwrap();
    assert!(triangulation.is_delaunay().unwrap());
}

#[test]
fn octahedron_with_center_survives_a_round_trip() {
    let mut triangulation: Triangulation<()> = Triangulation::with_seed(17);
    // Ordered so the first four corners are not coplanar.
    for position in [
        [1.0, 0.0, 0.0],
        [-1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [0.0, -1.0, 0.0],
        [0.0, 0.0, -1.0],
    ] {
        triangulation.create_node(position, ()).unwrap();
    }
    triangulation.check_invariants().unwrap();
    assert!(triangulation.is_delaunay().unwrap());
    let center = triangulation.create_node([0.0, 0.0, 0.0], ()).unwrap();
    assert_eq!(triangulation.finite_tetrahedron_count(), 8);
    triangulation.remove_node(center).unwrap();
    assert_eq!(triangulation.node_count(), 6);
    triangulation.check_invariants().unwrap();
    assert!(triangulation.is_delaunay().unwrap());
}
