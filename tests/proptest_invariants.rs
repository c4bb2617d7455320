//! Property tests: arbitrary point clouds keep the structural invariants
//! and the empty-circumsphere property.

use dynamic_delaunay::prelude::*;
use proptest::prelude::*;

fn cloud_strategy() -> impl Strategy<Value = Vec<[f64; 3]>> {
    prop::collection::vec(prop::array::uniform3(0.01f64..0.99), 4..20)
}

fn build(points: &[[f64; 3]]) -> Triangulation<usize> {
    let mut triangulation: Triangulation<usize> = Triangulation::with_seed(23);
    for position in [
        [0.0, 0.0, 0.0],
        [3.0, 0.0, 0.0],
        [0.0, 3.0, 0.0],
        [0.0, 0.0, 3.0],
    ] {
        triangulation.create_node(position, 0).unwrap();
    }
    for (i, &position) in points.iter().enumerate() {
        match triangulation.create_node(position, i + 1) {
            Ok(_) => {}
            // Coinciding points can legitimately be rejected.
            Err(SpatialError::Position(_)) => {}
            Err(error) => panic!("insertion failed: {error}"),
        }
    }
    triangulation
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_clouds_are_delaunay(points in cloud_strategy()) {
        let mut triangulation = build(&points);
        triangulation.check_invariants().unwrap();
        prop_assert!(triangulation.is_delaunay().unwrap());
    }

    #[test]
    fn removal_preserves_the_invariants(points in cloud_strategy()) {
        let mut triangulation = build(&points);
        let victim = triangulation
            .node_keys()
            .nth(4)
            .expect("at least one cloud node");
        triangulation.remove_node(victim).unwrap();
        triangulation.check_invariants().unwrap();
        prop_assert!(triangulation.is_delaunay().unwrap());
    }

    #[test]
    fn small_moves_preserve_the_invariants(
        points in cloud_strategy(),
        delta in prop::array::uniform3(-0.05f64..0.05),
    ) {
        let mut triangulation = build(&points);
        let mover = triangulation
            .node_keys()
            .nth(4)
            .expect("at least one cloud node");
        match triangulation.move_node_by(mover, delta) {
            Ok(()) => {}
            // The target may coincide with another node.
            Err(SpatialError::Position(_)) => {}
            Err(error) => panic!("move failed: {error}"),
        }
        triangulation.check_invariants().unwrap();
        prop_assert!(triangulation.is_delaunay().unwrap());
    }
}
