//! Node movement, both the in-place flip path and re-insertion.

use dynamic_delaunay::prelude::*;

fn triangulation_with_center() -> (Triangulation<()>, NodeKey) {
    let mut triangulation: Triangulation<()> = Triangulation::with_seed(5);
    for position in [
        [0.0, 0.0, 0.0],
        [10.0, 0.0, 0.0],
        [0.0, 10.0, 0.0],
        [0.0, 0.0, 10.0],
    ] {
        triangulation.create_node(position, ()).unwrap();
    }
    let center = triangulation.create_node([1.0, 1.0, 1.0], ()).unwrap();
    (triangulation, center)
}

#[test]
fn small_move_keeps_links_and_restores_delaunay() {
    let (mut triangulation, center) = triangulation_with_center();
    triangulation.move_node_to(center, [1.2, 0.9, 1.1]).unwrap();
    assert_eq!(
        triangulation.node(center).unwrap().position(),
        [1.2, 0.9, 1.1]
    );
    triangulation.check_invariants().unwrap();
    assert!(triangulation.is_delaunay().unwrap());
}

#[test]
fn zero_delta_move_is_a_no_op() {
    let (mut triangulation, center) = triangulation_with_center();
    let before = triangulation.finite_tetrahedron_count();
    triangulation.move_node_by(center, [0.0, 0.0, 0.0]).unwrap();
    assert_eq!(triangulation.node(center).unwrap().position(), [1.0; 3]);
    assert_eq!(triangulation.finite_tetrahedron_count(), before);
    assert!(triangulation.is_delaunay().unwrap());
}

#[test]
fn long_move_inside_the_star_is_resolved_by_flips() {
    let (mut triangulation, center) = triangulation_with_center();
    // The target is still visible from every incident tetrahedron, so the
    // node keeps its links and flips restore the Delaunay property.
    triangulation.move_node_to(center, [4.0, 4.0, 0.5]).unwrap();
    assert_eq!(
        triangulation.node(center).unwrap().position(),
        [4.0, 4.0, 0.5]
    );
    assert_eq!(triangulation.node_count(), 5);
    triangulation.check_invariants().unwrap();
    assert!(triangulation.is_delaunay().unwrap());
}

#[test]
fn move_beyond_the_hull_succeeds() {
    let (mut triangulation, center) = triangulation_with_center();
    triangulation
        .move_node_to(center, [20.0, 20.0, 20.0])
        .unwrap();
    assert_eq!(triangulation.node_count(), 5);
    triangulation.check_invariants().unwrap();
    assert!(triangulation.is_delaunay().unwrap());
}

#[test]
fn moving_onto_another_node_is_rejected_and_rolled_back() {
    let (mut triangulation, center) = triangulation_with_center();
    let error = triangulation
        .move_node_to(center, [0.0, 0.0, 0.0])
        .expect_err("target coincides with a corner");
    assert!(error.proposed_position().is_some());
    // The node is still where it was and the structure is intact.
    assert_eq!(triangulation.node(center).unwrap().position(), [1.0; 3]);
    triangulation.check_invariants().unwrap();
    assert!(triangulation.is_delaunay().unwrap());
}

#[test]
fn relocations_across_a_cloud_reinsert_where_needed() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    let mut triangulation: Triangulation<()> = Triangulation::with_seed(5);
    for position in [
        [0.0, 0.0, 0.0],
        [10.0, 0.0, 0.0],
        [0.0, 10.0, 0.0],
        [0.0, 0.0, 10.0],
    ] {
        triangulation.create_node(position, ()).unwrap();
    }
    let mut rng = StdRng::seed_from_u64(13);
    let mut cloud = Vec::new();
    for _ in 0..20 {
        let position = [
            rng.random_range(0.5..3.0),
            rng.random_range(0.5..3.0),
            rng.random_range(0.5..3.0),
        ];
        cloud.push(triangulation.create_node(position, ()).unwrap());
    }
    // Jumping across the cloud leaves the old star, forcing removal and
    // re-insertion.
    for &node in cloud.iter().take(5) {
        let target = [
            rng.random_range(0.5..3.0),
            rng.random_range(0.5..3.0),
            rng.random_range(0.5..3.0),
        ];
        triangulation.move_node_to(node, target).unwrap();
        triangulation.check_invariants().unwrap();
    }
    assert_eq!(triangulation.node_count(), 24);
    assert!(triangulation.is_delaunay().unwrap());
}

#[test]
fn a_sequence_of_small_moves_stays_consistent() {
    let (mut triangulation, center) = triangulation_with_center();
    for step in 0..20 {
        let offset = 0.1 + 0.01 * f64::from(step);
        triangulation
            .move_node_by(center, [offset * 0.1, -0.05, 0.02])
            .unwrap();
        triangulation.check_invariants().unwrap();
    }
    assert!(triangulation.is_delaunay().unwrap());
}
