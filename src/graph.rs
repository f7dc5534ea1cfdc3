//! A variant graph: a DAG over sequence fragments with sample memberships.
//!
//! This module provides the shared node pool, the graph structure over it,
//! and the derivation operations that project a graph down to a population
//! subset.
//!
//! A base graph owns the pool of nodes. Derived graphs share the same pool
//! and store only their own adjacency and traversal order, which makes
//! derivations cheap even for large graphs. Node identifiers are stable:
//! a derived graph refers to the base graph's nodes by the same ids.
//!
//! A graph must be finalized before iteration. [`Graph::finalize`] runs a
//! depth-first topological sort and fails if the graph contains a cycle.
//! Adding an edge invalidates the traversal order.

use crate::Population;
use crate::utils;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::Arc;

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// Sentinel id for a node that has not been inserted into a pool.
const UNASSIGNED: usize = usize::MAX;

/// Returned by [`Graph::add_node`] when the node id was already present.
pub const DUPLICATE_NODE: usize = 0;

/// A node in a variant graph.
///
/// A node stores a sequence fragment in numeric form (see
/// [`crate::utils::seq_to_nums`]), the position of its final base in
/// reference coordinates (1-based, inclusive), an allele frequency, and a
/// membership bitset with one bit per haplotype in the cohort. A reference
/// node belongs to every sample regardless of its bitset.
///
/// Nodes are built with setters and then inserted into a graph, which
/// assigns an id unless one was set explicitly.
///
/// # Examples
///
/// ```
/// use vargraph::{Node, Population};
///
/// let mut node = Node::new();
/// node.set_sequence(b"ACGTN");
/// node.set_end(100);
/// node.set_population(Population::from_string("001").unwrap());
///
/// assert_eq!(node.len(), 5);
/// assert_eq!(node.sequence_str(), "ACGTN");
/// assert!(!node.belongs(0));
/// assert!(node.belongs(2));
///
/// // A reference node belongs to every sample.
/// node.set_as_ref();
/// assert!(node.belongs(0));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    id: usize,
    sequence: Vec<u8>,
    end: usize,
    reference: bool,
    frequency: f64,
    membership: Population,
}

impl Node {
    /// Creates an empty node with no id.
    pub fn new() -> Self {
        Node {
            id: UNASSIGNED,
            sequence: Vec::new(),
            end: 0,
            reference: false,
            frequency: 1.0,
            membership: Population::with_len(0),
        }
    }

    /// Returns the node id.
    ///
    /// # Panics
    ///
    /// Panics if the node has not been inserted into a graph and no id was
    /// set explicitly.
    pub fn id(&self) -> usize {
        assert!(self.id != UNASSIGNED, "The node does not have an id");
        self.id
    }

    /// Returns the length of the sequence.
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    /// Returns `true` if the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Returns the position of the final base in reference coordinates
    /// (1-based, inclusive).
    pub fn end(&self) -> usize {
        self.end
    }

    /// Returns the sequence in numeric form.
    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    /// Returns the sequence as an upper-case string.
    pub fn sequence_str(&self) -> String {
        utils::nums_to_seq(&self.sequence)
    }

    /// Returns `true` if the node is on the linear reference.
    pub fn is_ref(&self) -> bool {
        self.reference
    }

    /// Returns the allele frequency. The value is `1.0` for reference nodes
    /// unless set explicitly.
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Returns the sample membership bitset.
    pub fn membership(&self) -> &Population {
        &self.membership
    }

    /// Returns the number of haplotypes covered by the membership bitset.
    pub fn pop_size(&self) -> usize {
        self.membership.len()
    }

    /// Returns `true` if haplotype `index` carries this node.
    ///
    /// A reference node is implicitly present in every sample.
    pub fn belongs(&self, index: usize) -> bool {
        if self.reference {
            return true;
        }
        index < self.membership.len() && self.membership.get(index)
    }

    /// Sets an explicit id. The pool the node is inserted into will not
    /// reissue this id.
    pub fn set_id(&mut self, id: usize) {
        self.id = id;
    }

    /// Sets the sequence from text. See [`crate::utils::seq_to_nums`].
    pub fn set_sequence(&mut self, sequence: &[u8]) {
        self.sequence = utils::seq_to_nums(sequence);
    }

    /// Sets the sequence from numeric codes.
    pub fn set_sequence_nums(&mut self, sequence: Vec<u8>) {
        self.sequence = sequence;
    }

    /// Sets the position of the final base (1-based, inclusive).
    pub fn set_end(&mut self, end: usize) {
        self.end = end;
    }

    /// Marks the node as a reference node.
    pub fn set_as_ref(&mut self) {
        self.reference = true;
    }

    /// Marks the node as a variant node.
    pub fn set_not_ref(&mut self) {
        self.reference = false;
    }

    /// Sets the allele frequency.
    pub fn set_frequency(&mut self, frequency: f64) {
        self.frequency = frequency;
    }

    /// Sets the sample membership bitset.
    pub fn set_population(&mut self, membership: Population) {
        self.membership = membership;
    }
}

impl Default for Node {
    fn default() -> Self {
        Node::new()
    }
}

//-----------------------------------------------------------------------------

/// The pool of nodes shared by a base graph and the graphs derived from it.
///
/// The pool issues monotonically increasing ids starting from 1, so the id
/// `0` can serve as a duplicate sentinel. Ids are never reused.
#[derive(Debug, Default)]
pub struct NodePool {
    nodes: BTreeMap<usize, Node>,
    next_id: usize,
}

impl NodePool {
    fn new() -> Self {
        NodePool { nodes: BTreeMap::new(), next_id: 1 }
    }

    /// Returns the node with the given id, or [`None`] if there is no such
    /// node.
    pub fn get(&self, id: usize) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Returns the number of nodes in the pool.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // Inserts the node, assigning an id if necessary, and returns the id.
    // Returns `DUPLICATE_NODE` if the id was already present.
    fn insert(&mut self, mut node: Node) -> usize {
        if node.id == UNASSIGNED {
            node.id = self.next_id;
        }
        if self.nodes.contains_key(&node.id) {
            return DUPLICATE_NODE;
        }
        if node.id >= self.next_id {
            self.next_id = node.id + 1;
        }
        let id = node.id;
        self.nodes.insert(id, node);
        id
    }
}

//-----------------------------------------------------------------------------

/// A variant graph over a shared node pool.
///
/// A graph created with [`Graph::new`] owns its pool; graphs returned by the
/// derivation operations share the pool of the graph they were derived from.
/// The derivations are:
///
/// * [`Graph::derive_by_filter`]: keep reference nodes and the nodes carried
///   by at least one haplotype in the filter.
/// * [`Graph::derive_reference`]: keep only reference nodes.
/// * [`Graph::derive_maxaf`]: the linear path that always follows the
///   successor with the highest allele frequency.
///
/// # Examples
///
/// ```
/// use vargraph::{Graph, Node, Population};
///
/// // AAA -> { CCC (ref), GGG } -> TTT
/// let mut graph = Graph::new();
/// let mut ids = Vec::new();
/// for (seq, end, reference, af, pop) in [
///     (&b"AAA"[..], 3, true, 1.0, "011"),
///     (&b"CCC"[..], 6, true, 0.4, "001"),
///     (&b"GGG"[..], 6, false, 0.6, "010"),
///     (&b"TTT"[..], 9, true, 1.0, "011"),
/// ] {
///     let mut node = Node::new();
///     node.set_sequence(seq);
///     node.set_end(end);
///     if reference { node.set_as_ref(); }
///     node.set_frequency(af);
///     node.set_population(Population::from_string(pop).unwrap());
///     ids.push(graph.add_node(node).unwrap());
/// }
/// graph.add_edge(ids[0], ids[1]).unwrap();
/// graph.add_edge(ids[0], ids[2]).unwrap();
/// graph.add_edge(ids[1], ids[3]).unwrap();
/// graph.add_edge(ids[2], ids[3]).unwrap();
/// graph.finalize().unwrap();
///
/// let order: Vec<String> =
///     graph.topological_iter().unwrap().map(|n| n.sequence_str()).collect();
/// assert_eq!(order.first().unwrap(), "AAA");
/// assert_eq!(order.last().unwrap(), "TTT");
///
/// let maxaf = graph.derive_maxaf().unwrap();
/// let path: Vec<String> =
///     maxaf.topological_iter().unwrap().map(|n| n.sequence_str()).collect();
/// assert_eq!(path, vec!["AAA", "GGG", "TTT"]);
/// ```
#[derive(Debug)]
pub struct Graph {
    pool: Arc<NodePool>,
    next: BTreeMap<usize, Vec<usize>>,
    prev: BTreeMap<usize, Vec<usize>>,
    root: Option<usize>,
    toposort: Vec<usize>,
    insertion_order: Vec<usize>,
    finalized: bool,
    population_size: usize,
    description: String,
}

impl Graph {
    /// Creates an empty graph with a new node pool.
    pub fn new() -> Self {
        Graph {
            pool: Arc::new(NodePool::new()),
            next: BTreeMap::new(),
            prev: BTreeMap::new(),
            root: None,
            toposort: Vec::new(),
            insertion_order: Vec::new(),
            finalized: false,
            population_size: 0,
            description: String::new(),
        }
    }

    //-------------------------------------------------------------------------
    // Construction.
    //-------------------------------------------------------------------------

    /// Inserts a node into the pool and records it in insertion order.
    ///
    /// The first inserted node becomes the root. Returns the id of the node,
    /// or [`DUPLICATE_NODE`] if a node with the same id was already present.
    /// The caller is responsible for inserting nodes in topological order if
    /// it intends to use [`Graph::finalize_from_insertion_order`].
    ///
    /// Fails if the pool is shared with derived graphs, or if the membership
    /// bitset length does not match the other nodes in the pool.
    pub fn add_node(&mut self, node: Node) -> Result<usize, String> {
        if node.pop_size() > 0 {
            if self.population_size == 0 {
                self.population_size = node.pop_size();
            } else if node.pop_size() != self.population_size {
                return Err(format!(
                    "Membership bitset length {} does not match population size {}",
                    node.pop_size(), self.population_size
                ));
            }
        }
        let pool = Arc::get_mut(&mut self.pool).ok_or(
            String::from("Cannot add nodes to a graph with derived views")
        )?;
        let id = pool.insert(node);
        if id == DUPLICATE_NODE {
            return Ok(DUPLICATE_NODE);
        }
        if self.root.is_none() {
            self.root = Some(id);
        }
        self.insertion_order.push(id);
        self.finalized = false;
        Ok(id)
    }

    /// Adds an edge from node `from` to node `to`.
    ///
    /// Both endpoints must be present in the pool. Invalidates the traversal
    /// order.
    pub fn add_edge(&mut self, from: usize, to: usize) -> Result<(), String> {
        if self.pool.get(from).is_none() {
            return Err(format!("Cannot add an edge from nonexistent node {}", from));
        }
        if self.pool.get(to).is_none() {
            return Err(format!("Cannot add an edge to nonexistent node {}", to));
        }
        self.next.entry(from).or_default().push(to);
        self.prev.entry(to).or_default().push(from);
        self.finalized = false;
        Ok(())
    }

    /// Sets the root node.
    pub fn set_root(&mut self, id: usize) {
        self.root = Some(id);
    }

    /// Sets the description string.
    pub fn set_description(&mut self, description: &str) {
        self.description = description.to_string();
    }

    /// Publishes the topological order with a depth-first search.
    ///
    /// Fails with a cycle error if the forward adjacency is not a DAG.
    /// Every node in the pool appears in the order, including nodes without
    /// edges.
    pub fn finalize(&mut self) -> Result<(), String> {
        const WHITE: u8 = 0;
        const GREY: u8 = 1;
        const BLACK: u8 = 2;

        let mut state: BTreeMap<usize, u8> = BTreeMap::new();
        let mut postorder: Vec<usize> = Vec::with_capacity(self.insertion_order.len());

        // Iterative DFS; the second element is the offset of the next
        // successor to visit.
        let mut stack: Vec<(usize, usize)> = Vec::new();
        for seed in self.insertion_order.iter() {
            if *state.get(seed).unwrap_or(&WHITE) != WHITE {
                continue;
            }
            stack.push((*seed, 0));
            state.insert(*seed, GREY);
            while !stack.is_empty() {
                let (id, offset) = *stack.last().unwrap();
                let successors = self.next.get(&id).map(|v| v.as_slice()).unwrap_or(&[]);
                if offset < successors.len() {
                    stack.last_mut().unwrap().1 += 1;
                    let successor = successors[offset];
                    match *state.get(&successor).unwrap_or(&WHITE) {
                        WHITE => {
                            state.insert(successor, GREY);
                            stack.push((successor, 0));
                        }
                        GREY => {
                            return Err(format!(
                                "The graph contains a cycle through node {}", successor
                            ));
                        }
                        _ => (),
                    }
                } else {
                    state.insert(id, BLACK);
                    postorder.push(id);
                    stack.pop();
                }
            }
        }

        postorder.reverse();
        self.toposort = postorder;
        self.finalized = true;
        Ok(())
    }

    /// Publishes the insertion order as the topological order.
    ///
    /// This is the fast path used by the graph builder, which emits nodes in
    /// genomic order. The caller must guarantee that every edge points from
    /// an earlier inserted node to a later one; the precondition is not
    /// checked. Use [`Graph::finalize`] when the insertion order is not
    /// known to be topological.
    pub fn finalize_from_insertion_order(&mut self) {
        self.toposort = self.insertion_order.clone();
        self.finalized = true;
    }

    //-------------------------------------------------------------------------
    // Access.
    //-------------------------------------------------------------------------

    /// Returns the node with the given id, or [`None`] if there is no such
    /// node in the pool.
    ///
    /// Note that the pool is shared: a derived graph resolves ids that are
    /// not part of its own node set.
    pub fn node(&self, id: usize) -> Option<&Node> {
        self.pool.get(id)
    }

    /// Returns the root node id.
    pub fn root(&self) -> Option<usize> {
        self.root
    }

    /// Returns the number of nodes in this graph.
    pub fn node_count(&self) -> usize {
        self.insertion_order.len()
    }

    /// Returns the successors of the given node.
    pub fn successors(&self, id: usize) -> &[usize] {
        self.next.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Returns the predecessors of the given node.
    pub fn predecessors(&self, id: usize) -> &[usize] {
        self.prev.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Returns the number of haplotypes in the cohort.
    pub fn population_size(&self) -> usize {
        self.population_size
    }

    /// Sets the number of haplotypes in the cohort.
    pub fn set_population_size(&mut self, size: usize) {
        self.population_size = size;
    }

    /// Returns the description string.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the length of the longest node sequence, or `0` for an empty
    /// graph. The aligner sizes its buffers from this.
    pub fn max_node_len(&self) -> usize {
        self.insertion_order.iter()
            .filter_map(|id| self.pool.get(*id))
            .map(|node| node.len())
            .max()
            .unwrap_or(0)
    }

    /// Returns an iterator over the nodes in topological order.
    ///
    /// Fails if the graph has not been finalized since the last mutation.
    pub fn topological_iter(&self) -> Result<TopologicalIter<'_>, String> {
        if !self.finalized {
            return Err(String::from("The graph must be finalized before iteration"));
        }
        Ok(TopologicalIter { graph: self, offset: 0 })
    }

    /// Returns the node ids in topological order.
    ///
    /// Fails if the graph has not been finalized since the last mutation.
    pub fn topological_order(&self) -> Result<&[usize], String> {
        if !self.finalized {
            return Err(String::from("The graph must be finalized before iteration"));
        }
        Ok(&self.toposort)
    }

    //-------------------------------------------------------------------------
    // Derivations.
    //-------------------------------------------------------------------------

    // Builds a derived graph from the subset of node ids for which `keep`
    // returns true. Edges are retained when both endpoints survive, and the
    // insertion order is inherited restricted to the surviving ids.
    fn derive<F: Fn(&Node) -> bool>(&self, keep: F, filter_desc: &str) -> Result<Graph, String> {
        let mut included: BTreeSet<usize> = BTreeSet::new();
        for id in self.insertion_order.iter() {
            let node = self.pool.get(*id).ok_or(
                format!("Node {} is missing from the shared pool", id)
            )?;
            if keep(node) {
                included.insert(*id);
            }
        }
        self.derive_from_ids(&included, filter_desc)
    }

    fn derive_from_ids(&self, included: &BTreeSet<usize>, filter_desc: &str) -> Result<Graph, String> {
        let root = self.root.ok_or(String::from("Cannot derive from an empty graph"))?;
        if !included.contains(&root) {
            return Err(String::from("The root of the base graph must survive the derivation"));
        }

        let mut derived = Graph {
            pool: Arc::clone(&self.pool),
            next: BTreeMap::new(),
            prev: BTreeMap::new(),
            root: Some(root),
            toposort: Vec::new(),
            insertion_order: Vec::new(),
            finalized: false,
            population_size: self.population_size,
            description: format!("{}\nfilter: {}", self.description, filter_desc),
        };

        for id in self.insertion_order.iter() {
            if included.contains(id) {
                derived.insertion_order.push(*id);
            }
        }
        for (from, successors) in self.next.iter() {
            if !included.contains(from) {
                continue;
            }
            for to in successors.iter() {
                if included.contains(to) {
                    derived.next.entry(*from).or_default().push(*to);
                    derived.prev.entry(*to).or_default().push(*from);
                }
            }
        }

        derived.finalize()?;
        Ok(derived)
    }

    /// Derives the subgraph carried by the given population.
    ///
    /// A node is kept if it is a reference node or if its membership bitset
    /// shares a set bit with `filter`. Edges are retained when both
    /// endpoints are kept. Fails if the base root does not survive or if the
    /// filter length does not match the node bitsets.
    pub fn derive_by_filter(&self, filter: &Population) -> Result<Graph, String> {
        for id in self.insertion_order.iter() {
            let node = self.pool.get(*id).unwrap();
            if !node.is_ref() && node.pop_size() != filter.len() {
                return Err(format!(
                    "Filter length {} does not match membership length {} of node {}",
                    filter.len(), node.pop_size(), id
                ));
            }
        }
        self.derive(
            |node| node.is_ref() || node.membership().intersects(filter).unwrap_or(false),
            &filter.to_string()
        )
    }

    /// Derives the graph containing only reference nodes.
    pub fn derive_reference(&self) -> Result<Graph, String> {
        self.derive(|node| node.is_ref(), "REF")
    }

    /// Derives the linear path that starts from the root and always follows
    /// the successor with the highest allele frequency. Ties are broken in
    /// favor of the earliest edge.
    pub fn derive_maxaf(&self) -> Result<Graph, String> {
        let root = self.root.ok_or(String::from("Cannot derive from an empty graph"))?;
        let mut included: BTreeSet<usize> = BTreeSet::new();
        let mut curr = root;
        loop {
            included.insert(curr);
            let successors = self.successors(curr);
            if successors.is_empty() {
                break;
            }
            let mut best = successors[0];
            for id in successors.iter().skip(1) {
                let node = self.pool.get(*id).ok_or(
                    format!("Node {} is missing from the shared pool", id)
                )?;
                let best_node = self.pool.get(best).unwrap();
                if node.frequency() > best_node.frequency() {
                    best = *id;
                }
            }
            curr = best;
        }
        self.derive_from_ids(&included, "MAXAF")
    }

    //-------------------------------------------------------------------------
    // Output.
    //-------------------------------------------------------------------------

    /// Returns the graph in Graphviz DOT format. Each node label contains
    /// the sequence, the end position, and the allele frequency.
    pub fn to_dot(&self, name: &str) -> String {
        let mut dot = String::new();
        let _ = writeln!(dot, "digraph {} {{", name);
        for id in self.insertion_order.iter() {
            if let Some(node) = self.pool.get(*id) {
                let _ = writeln!(
                    dot, "{}[label=\"{}\\n{},{}\"];",
                    id, node.sequence_str(), node.end(), node.frequency()
                );
            }
        }
        for (from, successors) in self.next.iter() {
            for to in successors.iter() {
                let _ = writeln!(dot, "{} -> {};", from, to);
            }
        }
        dot.push_str("}\n");
        dot
    }
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}

//-----------------------------------------------------------------------------

/// An iterator over the nodes of a graph in topological order.
///
/// Created with [`Graph::topological_iter`].
pub struct TopologicalIter<'a> {
    graph: &'a Graph,
    offset: usize,
}

impl<'a> Iterator for TopologicalIter<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.graph.toposort.len() {
            return None;
        }
        let id = self.graph.toposort[self.offset];
        self.offset += 1;
        self.graph.pool.get(id)
    }
}

//-----------------------------------------------------------------------------
