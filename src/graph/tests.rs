use super::*;

//-----------------------------------------------------------------------------

// Test fixtures.

fn make_node(seq: &[u8], end: usize, reference: bool, af: f64, pop: &str) -> Node {
    let mut node = Node::new();
    node.set_sequence(seq);
    node.set_end(end);
    if reference {
        node.set_as_ref();
    }
    node.set_frequency(af);
    node.set_population(Population::from_string(pop).unwrap());
    node
}

// The diamond used throughout:
//
//        GGG (alt, AF 0.6)
//       /   \
//    AAA     TTT
//       \   /
//        CCC (ref, AF 0.4)
//
// Memberships are over three haplotypes.
fn diamond() -> (Graph, Vec<usize>) {
    let mut graph = Graph::new();
    let mut ids = Vec::new();
    ids.push(graph.add_node(make_node(b"AAA", 3, true, 1.0, "011")).unwrap());
    ids.push(graph.add_node(make_node(b"CCC", 6, true, 0.4, "001")).unwrap());
    ids.push(graph.add_node(make_node(b"GGG", 6, false, 0.6, "010")).unwrap());
    ids.push(graph.add_node(make_node(b"TTT", 9, true, 1.0, "011")).unwrap());
    graph.add_edge(ids[0], ids[1]).unwrap();
    graph.add_edge(ids[0], ids[2]).unwrap();
    graph.add_edge(ids[1], ids[3]).unwrap();
    graph.add_edge(ids[2], ids[3]).unwrap();
    graph.finalize().unwrap();
    (graph, ids)
}

fn sequences(graph: &Graph) -> Vec<String> {
    graph.topological_iter().unwrap().map(|n| n.sequence_str()).collect()
}

//-----------------------------------------------------------------------------

#[test]
fn node_ids() {
    let mut graph = Graph::new();
    let first = graph.add_node(make_node(b"A", 1, true, 1.0, "")).unwrap();
    let second = graph.add_node(make_node(b"C", 2, true, 1.0, "")).unwrap();
    assert!(first != DUPLICATE_NODE, "The first id should not be the duplicate sentinel");
    assert!(second > first, "Ids should be issued monotonically");

    // An explicit id advances the generator.
    let mut node = make_node(b"G", 3, true, 1.0, "");
    node.set_id(100);
    assert_eq!(graph.add_node(node).unwrap(), 100);
    let next = graph.add_node(make_node(b"T", 4, true, 1.0, "")).unwrap();
    assert_eq!(next, 101, "The id generator should advance past explicit ids");

    // Inserting the same id again returns the sentinel.
    let mut duplicate = make_node(b"T", 4, true, 1.0, "");
    duplicate.set_id(100);
    assert_eq!(graph.add_node(duplicate).unwrap(), DUPLICATE_NODE);
    assert_eq!(graph.node_count(), 4, "A duplicate insert should not change the graph");
}

#[test]
fn graph_structure() {
    let (graph, ids) = diamond();
    assert_eq!(graph.node_count(), 4);
    assert_eq!(graph.root(), Some(ids[0]), "The first inserted node should be the root");

    // Forward edges.
    assert_eq!(graph.successors(ids[0]), &[ids[1], ids[2]]);
    assert_eq!(graph.successors(ids[1]), &[ids[3]]);
    assert_eq!(graph.successors(ids[2]), &[ids[3]]);
    assert!(graph.successors(ids[3]).is_empty());

    // Reverse edges.
    assert!(graph.predecessors(ids[0]).is_empty());
    assert_eq!(graph.predecessors(ids[1]), &[ids[0]]);
    assert_eq!(graph.predecessors(ids[2]), &[ids[0]]);
    assert_eq!(graph.predecessors(ids[3]), &[ids[1], ids[2]]);

    assert_eq!(graph.max_node_len(), 3);
    assert_eq!(graph.population_size(), 3);
}

#[test]
fn membership_queries() {
    let (graph, ids) = diamond();
    let alt = graph.node(ids[2]).unwrap();
    assert!(!alt.is_ref());
    assert!(!alt.belongs(0), "Haplotype 0 does not carry the alt");
    assert!(alt.belongs(1), "Haplotype 1 carries the alt");
    assert!(!alt.belongs(2));

    let reference = graph.node(ids[1]).unwrap();
    for haplotype in 0..3 {
        assert!(reference.belongs(haplotype), "A reference node belongs to every haplotype");
    }
}

#[test]
fn topological_iteration() {
    let (graph, _) = diamond();
    let order = sequences(&graph);
    assert_eq!(order.len(), 4, "Iteration should yield every node");
    assert_eq!(order[0], "AAA");
    assert!(order[1] == "CCC" || order[1] == "GGG");
    assert!(order[2] == "CCC" || order[2] == "GGG");
    assert!(order[1] != order[2]);
    assert_eq!(order[3], "TTT");

    // Every edge points forward in the iteration order.
    let ids: Vec<usize> = graph.topological_order().unwrap().to_vec();
    let position: BTreeMap<usize, usize> =
        ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    for from in ids.iter() {
        for to in graph.successors(*from) {
            assert!(
                position[from] < position[to],
                "Edge {} -> {} violates the topological order", from, to
            );
        }
    }
}

#[test]
fn iteration_requires_finalization() {
    let mut graph = Graph::new();
    let a = graph.add_node(make_node(b"AA", 2, true, 1.0, "")).unwrap();
    let b = graph.add_node(make_node(b"CC", 4, true, 1.0, "")).unwrap();
    assert!(graph.topological_iter().is_err(), "Iteration before finalize should fail");

    graph.add_edge(a, b).unwrap();
    graph.finalize().unwrap();
    assert!(graph.topological_iter().is_ok());

    // A new edge invalidates the published order.
    graph.add_edge(a, b).unwrap();
    assert!(graph.topological_iter().is_err(), "add_edge should invalidate the order");
    graph.finalize().unwrap();
    assert!(graph.topological_iter().is_ok());
}

#[test]
fn cycle_detection() {
    let mut graph = Graph::new();
    let a = graph.add_node(make_node(b"AA", 2, true, 1.0, "")).unwrap();
    let b = graph.add_node(make_node(b"CC", 4, true, 1.0, "")).unwrap();
    let c = graph.add_node(make_node(b"GG", 6, true, 1.0, "")).unwrap();
    graph.add_edge(a, b).unwrap();
    graph.add_edge(b, c).unwrap();
    graph.add_edge(c, a).unwrap();
    assert!(graph.finalize().is_err(), "A cycle should be detected at finalization");
}

#[test]
fn edge_endpoints_must_exist() {
    let mut graph = Graph::new();
    let a = graph.add_node(make_node(b"AA", 2, true, 1.0, "")).unwrap();
    assert!(graph.add_edge(a, a + 10).is_err(), "Unknown successor should fail");
    assert!(graph.add_edge(a + 10, a).is_err(), "Unknown predecessor should fail");
}

#[test]
fn population_size_coherence() {
    let mut graph = Graph::new();
    graph.add_node(make_node(b"AA", 2, false, 0.5, "0101")).unwrap();
    let result = graph.add_node(make_node(b"CC", 4, false, 0.5, "011"));
    assert!(result.is_err(), "Bitset length mismatch should be rejected");
}

//-----------------------------------------------------------------------------

#[test]
fn derive_by_filter() {
    let (graph, ids) = diamond();

    // Haplotype 2 only: the alt node is dropped.
    let filter = Population::from_string("001").unwrap();
    let derived = graph.derive_by_filter(&filter).unwrap();
    assert_eq!(sequences(&derived), vec!["AAA", "CCC", "TTT"]);
    assert_eq!(derived.successors(ids[0]), &[ids[1]]);
    assert_eq!(derived.successors(ids[1]), &[ids[3]]);
    assert!(derived.successors(ids[2]).is_empty(), "Dropped nodes should have no edges");

    // The pool is shared, and ids resolve in the derived graph.
    assert_eq!(derived.node(ids[2]).unwrap().sequence_str(), "GGG");
    assert_eq!(derived.root(), graph.root());

    // Haplotype 1 carries the alt, so everything survives.
    let filter = Population::from_string("010").unwrap();
    let derived = graph.derive_by_filter(&filter).unwrap();
    assert_eq!(derived.node_count(), 4);
}

#[test]
fn derive_by_filter_node_set() {
    // The node set of a filtered graph is exactly the reference nodes plus
    // the variant nodes that intersect the filter.
    let (graph, _) = diamond();
    for bits in ["000", "001", "010", "011", "100", "101", "110", "111"] {
        let filter = Population::from_string(bits).unwrap();
        let derived = graph.derive_by_filter(&filter).unwrap();
        let expected: Vec<usize> = graph.topological_order().unwrap().iter().cloned()
            .filter(|id| {
                let node = graph.node(*id).unwrap();
                node.is_ref() || node.membership().intersects(&filter).unwrap()
            })
            .collect();
        let mut actual: Vec<usize> = derived.topological_order().unwrap().to_vec();
        actual.sort_unstable();
        let mut expected_sorted = expected.clone();
        expected_sorted.sort_unstable();
        assert_eq!(actual, expected_sorted, "Wrong node set for filter {}", bits);
    }
}

#[test]
fn derive_reference() {
    let (graph, _) = diamond();
    let reference = graph.derive_reference().unwrap();
    assert_eq!(sequences(&reference), vec!["AAA", "CCC", "TTT"]);

    // Deriving a reference-only graph again is the identity.
    let again = reference.derive_reference().unwrap();
    assert_eq!(sequences(&again), vec!["AAA", "CCC", "TTT"]);
}

#[test]
fn derive_maxaf() {
    let (graph, _) = diamond();
    let maxaf = graph.derive_maxaf().unwrap();
    assert_eq!(sequences(&maxaf), vec!["AAA", "GGG", "TTT"], "MAXAF should follow the alt");

    // The result is a simple path.
    let order = maxaf.topological_order().unwrap();
    for (i, id) in order.iter().enumerate() {
        let successors = maxaf.successors(*id);
        if i + 1 < order.len() {
            assert_eq!(successors, &[order[i + 1]], "MAXAF should be a simple path");
        } else {
            assert!(successors.is_empty());
        }
    }
}

#[test]
fn derive_maxaf_tie_break() {
    // With equal frequencies the first edge wins.
    let mut graph = Graph::new();
    let a = graph.add_node(make_node(b"AA", 2, true, 1.0, "11")).unwrap();
    let b = graph.add_node(make_node(b"CC", 4, true, 0.5, "11")).unwrap();
    let c = graph.add_node(make_node(b"GG", 4, false, 0.5, "10")).unwrap();
    graph.add_edge(a, b).unwrap();
    graph.add_edge(a, c).unwrap();
    graph.finalize().unwrap();

    let maxaf = graph.derive_maxaf().unwrap();
    assert_eq!(sequences(&maxaf), vec!["AA", "CC"], "Ties should break in edge order");
}

#[test]
fn derived_root_must_survive() {
    // A graph whose root is a variant node cannot be filtered away.
    let mut graph = Graph::new();
    let a = graph.add_node(make_node(b"AA", 2, false, 0.5, "10")).unwrap();
    let b = graph.add_node(make_node(b"CC", 4, true, 1.0, "11")).unwrap();
    graph.add_edge(a, b).unwrap();
    graph.finalize().unwrap();

    let filter = Population::from_string("01").unwrap();
    assert!(graph.derive_by_filter(&filter).is_err(), "Losing the root should fail");
}

#[test]
fn filter_length_mismatch() {
    let (graph, _) = diamond();
    let filter = Population::from_string("0011").unwrap();
    assert!(graph.derive_by_filter(&filter).is_err(), "Filter length mismatch should fail");
}

#[test]
fn frozen_pool() {
    let (mut graph, _) = diamond();
    let _derived = graph.derive_reference().unwrap();
    let result = graph.add_node(make_node(b"AA", 12, true, 1.0, "011"));
    assert!(result.is_err(), "The pool should be frozen while derived views exist");
}

#[test]
fn dot_output() {
    let (graph, ids) = diamond();
    let dot = graph.to_dot("diamond");
    assert!(dot.starts_with("digraph diamond {"));
    assert!(dot.contains("GGG"), "DOT output should contain node sequences");
    assert!(dot.contains(&format!("{} -> {};", ids[0], ids[2])), "DOT output should contain edges");
    assert!(dot.trim_end().ends_with('}'));
}

//-----------------------------------------------------------------------------
