//! Incremental insertion and the Delaunay property of the result.

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

fn random_cloud(seed: u64, count: usize) -> Vec<[f64; 3]> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            [
                rng.random_range(0.5..4.0),
                rng.random_range(0.5..4.0),
                rng.random_range(0.5..4.0),
            ]
        })
        .collect()
}

#[test]
fn interior_point_splits_into_four_tetrahedra() {
    let mut triangulation: Triangulation<()> = Triangulation::with_seed(2);
    for position in spread_corners() {
        triangulation.create_node(position, ()).unwrap();
    }
    triangulation.create_node([1.0, 1.0, 1.0], ()).unwrap();
    assert_eq!(triangulation.finite_tetrahedron_count(), 4);
    triangulation.check_invariants().unwrap();
    assert!(triangulation.is_delaunay().unwrap());
}

#[test]
fn point_outside_the_hull_extends_it() {
    let mut triangulation: Triangulation<()> = Triangulation::with_seed(2);
    for position in spread_corners() {
        triangulation.create_node(position, ()).unwrap();
    }
    let outside = triangulation.create_node([10.0, 10.0, 10.0], ()).unwrap();
    assert!(triangulation.node(outside).is_some());
    assert!(triangulation.finite_tetrahedron_count() > 1);
    triangulation.check_invariants().unwrap();
    assert!(triangulation.is_delaunay().unwrap());
}

#[test]
fn many_random_points_stay_delaunay() {
    let mut triangulation: Triangulation<usize> = Triangulation::with_seed(2);
    for position in spread_corners() {
        triangulation.create_node(position, 0).unwrap();
    }
    for (i, position) in random_cloud(77, 60).into_iter().enumerate() {
        triangulation.create_node(position, i + 1).unwrap();
    }
    assert_eq!(triangulation.node_count(), 64);
    triangulation.check_invariants().unwrap();
    assert!(triangulation.is_delaunay().unwrap());
}

#[test]
fn duplicate_position_is_rejected_and_suggestion_works() {
    let mut triangulation: Triangulation<()> = Triangulation::with_seed(2);
    for position in spread_corners() {
        triangulation.create_node(position, ()).unwrap();
    }
    triangulation.create_node([1.0, 1.0, 1.0], ()).unwrap();
    let error = triangulation
        .create_node([1.0, 1.0, 1.0], ())
        .expect_err("coinciding position must be rejected");
    let proposed = error
        .proposed_position()
        .expect("rejection carries an alternative");
    // Retrying at the suggested coordinate succeeds.
    triangulation.create_node(proposed, ()).unwrap();
    assert_eq!(triangulation.node_count(), 6);
    triangulation.check_invariants().unwrap();
}

#[test]
fn containment_query_finds_the_surrounding_corners() {
    let mut triangulation: Triangulation<()> = Triangulation::with_seed(2);
    let anchor = triangulation.create_node([0.0, 0.0, 0.0], ()).unwrap();
    for position in &spread_corners()[1..] {
        triangulation.create_node(*position, ()).unwrap();
    }
    let center = triangulation.create_node([1.0, 1.0, 1.0], ()).unwrap();
    let corners = triangulation
        .vertices_of_tetrahedron_containing(anchor, &[1.0, 1.0, 1.1])
        .unwrap()
        .expect("point lies inside the hull");
    assert!(corners.contains(&center));
    // Far outside the hull there is no containing tetrahedron.
    let outside = triangulation
        .vertices_of_tetrahedron_containing(anchor, &[100.0, 100.0, 100.0])
        .unwrap();
    assert!(outside.is_none());
}

#[test]
fn containment_query_reports_the_corner_payloads() {
    let mut triangulation: Triangulation<&'static str> = Triangulation::with_seed(2);
    let anchor = triangulation.create_node([0.0, 0.0, 0.0], "origin").unwrap();
    triangulation.create_node([10.0, 0.0, 0.0], "x").unwrap();
    triangulation.create_node([0.0, 10.0, 0.0], "y").unwrap();
    triangulation.create_node([0.0, 0.0, 10.0], "z").unwrap();
    let payloads = triangulation
        .payloads_of_tetrahedron_containing(anchor, &[1.0, 1.0, 1.0])
        .unwrap()
        .expect("point lies inside the hull");
    let mut names: Vec<&str> = payloads.iter().copied().copied().collect();
    names.sort_unstable();
    assert_eq!(names, ["origin", "x", "y", "z"]);
}

#[test]
fn neighbor_payload_queries_see_all_corners() {
    let mut triangulation: Triangulation<u32> = Triangulation::with_seed(2);
    for (i, position) in spread_corners().into_iter().enumerate() {
        triangulation.create_node(position, i as u32).unwrap();
    }
    let center = triangulation.create_node([1.0, 1.0, 1.0], 9).unwrap();
    let mut live: Vec<u32> = triangulation
        .neighbor_payloads(center)
        .unwrap()
        .into_iter()
        .copied()
        .collect();
    live.sort_unstable();
    assert_eq!(live, [0, 1, 2, 3]);
    // The snapshot stays usable after the triangulation changes.
    let mut snapshot = triangulation.permanent_neighbor_snapshot(center).unwrap();
    triangulation.remove_node(center).unwrap();
    snapshot.sort_unstable();
    assert_eq!(snapshot, [0, 1, 2, 3]);
}
