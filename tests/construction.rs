//! Bootstrap behavior and structural bookkeeping of small triangulations.

use std::cell::RefCell;
use std::rc::Rc;

use dynamic_delaunay::prelude::*;

fn unit_corners() -> [[f64; 3]; 4] {
    [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
    ]
}

#[test]
fn empty_triangulation_has_no_elements() {
    let triangulation: Triangulation<()> = Triangulation::with_seed(1);
    assert_eq!(triangulation.node_count(), 0);
    assert_eq!(triangulation.tetrahedron_count(), 0);
}

#[test]
fn fewer_than_four_nodes_build_no_tetrahedron() {
    let mut triangulation: Triangulation<u32> = Triangulation::with_seed(1);
    for (i, position) in unit_corners().iter().take(3).enumerate() {
        triangulation.create_node(*position, i as u32).unwrap();
    }
    assert_eq!(triangulation.node_count(), 3);
    assert_eq!(triangulation.tetrahedron_count(), 0);
}

#[test]
fn four_nodes_produce_one_finite_and_four_infinite_tetrahedra() {
    let mut triangulation: Triangulation<u32> = Triangulation::with_seed(1);
    for (i, position) in unit_corners().iter().enumerate() {
        triangulation.create_node(*position, i as u32).unwrap();
    }
    assert_eq!(triangulation.finite_tetrahedron_count(), 1);
    assert_eq!(triangulation.tetrahedron_count(), 5);
    triangulation.check_invariants().unwrap();
}

#[test]
fn every_pair_of_initial_corners_is_connected() {
    let mut triangulation: Triangulation<()> = Triangulation::with_seed(1);
    let nodes: Vec<NodeKey> = unit_corners()
        .iter()
        .map(|p| triangulation.create_node(*p, ()).unwrap())
        .collect();
    for &node in &nodes {
        let neighbors = triangulation.neighbor_nodes(node).unwrap();
        assert_eq!(neighbors.len(), 3);
        for &other in &nodes {
            if other != node {
                assert!(neighbors.contains(&other));
            }
        }
    }
}

#[test]
fn payloads_are_reachable_through_handles() {
    let mut triangulation: Triangulation<String> = Triangulation::with_seed(1);
    let node = triangulation
        .create_node([0.0; 3], "origin".to_owned())
        .unwrap();
    assert_eq!(triangulation.node(node).unwrap().payload(), "origin");
    *triangulation.node_mut(node).unwrap().payload_mut() = "renamed".to_owned();
    assert_eq!(triangulation.node(node).unwrap().payload(), "renamed");
}

#[test]
fn node_volumes_sum_to_the_total_volume() {
    let mut triangulation: Triangulation<()> = Triangulation::with_seed(1);
    for position in unit_corners() {
        triangulation.create_node(position, ()).unwrap();
    }
    let total: f64 = triangulation
        .node_keys()
        .map(|n| triangulation.node(n).unwrap().volume())
        .sum();
    // The unit corner tetrahedron has volume 1/6.
    assert!((total - 1.0 / 6.0).abs() < 1e-12);
}

#[derive(Default)]
struct EventLog(Rc<RefCell<Vec<&'static str>>>);

impl MovementListener<u32> for EventLog {
    fn node_about_to_be_added(
        &mut self,
        _triangulation: &Triangulation<u32>,
        _node: NodeKey,
        _position: [f64; 3],
        host: Option<[NodeKey; 4]>,
    ) {
        assert!(host.is_some());
        self.0.borrow_mut().push("about_to_add");
    }

    fn node_added(&mut self, _triangulation: &Triangulation<u32>, _node: NodeKey) {
        self.0.borrow_mut().push("added");
    }

    fn node_about_to_be_removed(&mut self, _triangulation: &Triangulation<u32>, _node: NodeKey) {
        self.0.borrow_mut().push("about_to_remove");
    }

    fn node_removed(&mut self, _triangulation: &Triangulation<u32>, _node: NodeKey) {
        self.0.borrow_mut().push("removed");
    }
}

#[test]
fn listeners_observe_insertion_and_removal() {
    let mut triangulation: Triangulation<u32> = Triangulation::with_seed(1);
    for (i, position) in unit_corners().iter().enumerate() {
        triangulation.create_node(*position, i as u32).unwrap();
    }
    let log = Rc::new(RefCell::new(Vec::new()));
    triangulation.register_listener(Box::new(EventLog(Rc::clone(&log))));
    let center = triangulation.create_node([0.2, 0.2, 0.2], 99).unwrap();
    assert_eq!(log.borrow().as_slice(), &["about_to_add", "added"]);
    triangulation.remove_node(center).unwrap();
    assert_eq!(
        log.borrow().as_slice(),
        &["about_to_add", "added", "about_to_remove", "removed"]
    );
}

#[test]
fn instrumentation_counts_cavity_turnover() {
    let mut triangulation: Triangulation<()> = Triangulation::with_seed(1);
    for position in unit_corners() {
        triangulation.create_node(position, ()).unwrap();
    }
    let created = Rc::new(RefCell::new(0_usize));
    let removed = Rc::new(RefCell::new(0_usize));
    let created_clone = Rc::clone(&created);
    let removed_clone = Rc::clone(&removed);
    triangulation.set_instrumentation(InstrumentationHooks {
        on_tetrahedron_created: Some(Box::new(move |_| *created_clone.borrow_mut() += 1)),
        on_tetrahedron_removed: Some(Box::new(move |_| *removed_clone.borrow_mut() += 1)),
    });
    triangulation.create_node([0.2, 0.2, 0.2], ()).unwrap();
    // An interior point replaces the containing tetrahedron by four cones.
    assert_eq!(*removed.borrow(), 1);
    assert_eq!(*created.borrow(), 4);
}
