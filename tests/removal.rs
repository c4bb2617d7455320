//! Node removal and re-triangulation of the resulting hole.

use dynamic_delaunay::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn spread_corners() -> [[f64; 3]; 4] {
    [
        [0.0, 0.0, 0.0],
        [10.0, 0.0, 0.0],
        [0.0, 10.0, 0.0],
        [0.0, 0.0, 10.0],
    ]
}

#[test]
fn removing_an_interior_node_restores_the_single_tetrahedron() {
    let mut triangulation: Triangulation<()> = Triangulation::with_seed(9);
    for position in spread_corners() {
        triangulation.create_node(position, ()).unwrap();
    }
    let center = triangulation.create_node([1.0, 1.0, 1.0], ()).unwrap();
    assert_eq!(triangulation.finite_tetrahedron_count(), 4);
    triangulation.remove_node(center).unwrap();
    assert_eq!(triangulation.node_count(), 4);
    assert_eq!(triangulation.finite_tetrahedron_count(), 1);
    triangulation.check_invariants().unwrap();
    assert!(triangulation.is_delaunay().unwrap());
}

#[test]
fn removed_handles_become_stale() {
    let mut triangulation: Triangulation<()> = Triangulation::with_seed(9);
    for position in spread_corners() {
        triangulation.create_node(position, ()).unwrap();
    }
    let center = triangulation.create_node([1.0, 1.0, 1.0], ()).unwrap();
    triangulation.remove_node(center).unwrap();
    assert!(triangulation.node(center).is_none());
    assert!(matches!(
        triangulation.remove_node(center),
        Err(TriangulationError::StaleHandle)
    ));
}

#[test]
fn removal_before_bootstrap_only_drops_edges() {
    let mut triangulation: Triangulation<()> = Triangulation::with_seed(9);
    let a = triangulation.create_node([0.0, 0.0, 0.0], ()).unwrap();
    let b = triangulation.create_node([1.0, 0.0, 0.0], ()).unwrap();
    let c = triangulation.create_node([0.0, 1.0, 0.0], ()).unwrap();
    triangulation.remove_node(c).unwrap();
    assert_eq!(triangulation.node_count(), 2);
    assert_eq!(triangulation.neighbor_nodes(a).unwrap(), vec![b]);
    assert!(triangulation.neighbor_nodes(b).unwrap().contains(&a));
}

#[test]
fn insert_remove_round_trip_over_a_cloud() {
    let mut triangulation: Triangulation<usize> = Triangulation::with_seed(9);
    for position in spread_corners() {
        triangulation.create_node(position, 0).unwrap();
    }
    let mut rng = StdRng::seed_from_u64(41);
    let mut cloud = Vec::new();
    for i in 0..300 {
        let position = [
            rng.random_range(0.5..4.0),
            rng.random_range(0.5..4.0),
            rng.random_range(0.5..4.0),
        ];
        cloud.push(triangulation.create_node(position, i).unwrap());
    }
    // Remove every other cloud node again.
    for &node in cloud.iter().step_by(2) {
        triangulation.remove_node(node).unwrap();
        triangulation.check_invariants().unwrap();
    }
    assert_eq!(triangulation.node_count(), 154);
    assert!(triangulation.is_delaunay().unwrap());
}

#[test]
fn removal_from_a_thousand_point_cloud_stays_delaunay() {
    let mut triangulation: Triangulation<usize> = Triangulation::with_seed(9);
    for position in spread_corners() {
        triangulation.create_node(position, 0).unwrap();
    }
    let mut rng = StdRng::seed_from_u64(53);
    let mut cloud = Vec::new();
    // Inside 0.5..3.0 every coordinate sum stays below 10, so all cloud
    // nodes are interior to the corner tetrahedron.
    for i in 0..1000 {
        let position = [
            rng.random_range(0.5..3.0),
            rng.random_range(0.5..3.0),
            rng.random_range(0.5..3.0),
        ];
        cloud.push(triangulation.create_node(position, i).unwrap());
    }
    let nodes_before = triangulation.node_count();
    let finite_before = triangulation.finite_tetrahedron_count();
    triangulation.remove_node(cloud[500]).unwrap();
    assert_eq!(triangulation.node_count(), nodes_before - 1);
    assert!(triangulation.finite_tetrahedron_count() < finite_before);
    triangulation.check_invariants().unwrap();
    assert!(triangulation.is_delaunay().unwrap());
}

#[test]
fn removal_keeps_neighbor_volumes_consistent() {
    let mut triangulation: Triangulation<()> = Triangulation::with_seed(9);
    for position in spread_corners() {
        triangulation.create_node(position, ()).unwrap();
    }
    let center = triangulation.create_node([1.0, 1.0, 1.0], ()).unwrap();
    triangulation.remove_node(center).unwrap();
    let total: f64 = triangulation
        .node_keys()
        .map(|n| triangulation.node(n).unwrap().volume())
        .sum();
    // Back to the volume of the corner tetrahedron: 10^3 / 6.
    assert!((total - 1000.0 / 6.0).abs() < 1e-9);
}
