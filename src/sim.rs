//! Simulating reads from a variant graph.
//!
//! [`Sim`] samples reads by a weighted-random traversal of the graph: a
//! starting node is picked with probability proportional to its sequence
//! length, the walk continues over uniformly random successors, and a
//! substring of the requested length is extracted. Substitution and indel
//! errors are then introduced, either as fixed counts or as per-base rates.
//!
//! A [`Profile`] can also filter the sampled reads by the number of variant
//! nodes crossed and the number of bases taken from variant nodes. Reads
//! that violate the profile are rejected and resampled; the generator gives
//! up after [`Sim::ABORT_AFTER`] attempts. Reads containing `N` are always
//! rejected, which excludes symbolic alleles and ambiguous reference runs.

use crate::Graph;
use crate::utils;

use std::fmt::{self, Display};

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;


//-----------------------------------------------------------------------------

// SAM auxiliary tags written by the simulation tools.

/// Tag for the unmutated read sequence.
pub const ORIGINAL_SEQ_TAG: &str = "ro";
/// Tag for the number of substitution errors.
pub const SUB_ERR_TAG: &str = "se";
/// Tag for the number of indel errors.
pub const INDEL_ERR_TAG: &str = "ni";
/// Tag for the number of variant nodes crossed.
pub const VAR_NODES_TAG: &str = "vd";
/// Tag for the number of bases in variant nodes.
pub const VAR_BASES_TAG: &str = "vb";
/// Tag for the 1-based position of the final base.
pub const END_POS_TAG: &str = "ep";
/// Tag for the source subgraph label.
pub const SRC_GRAPH_TAG: &str = "gd";
/// Tag set when errors were generated from rates rather than counts.
pub const USE_RATE_TAG: &str = "rt";

//-----------------------------------------------------------------------------

/// Value meaning "any number" in the profile filters.
pub const ANY: i64 = -1;

/// Parameters controlling the simulated reads.
///
/// `var_nodes` and `var_bases` are filters: [`ANY`] accepts every read,
/// while a non-negative value requires an exact match. The error fields are
/// interpreted as counts by default and as per-base rates when `use_rate`
/// is set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Profile {
    /// Length of the read in bp.
    pub len: usize,
    /// Interpret `mut_err` and `indel_err` as rates instead of counts.
    pub use_rate: bool,
    /// Number or rate of substitution errors.
    pub mut_err: f64,
    /// Number or rate of indel errors.
    pub indel_err: f64,
    /// Required number of variant nodes crossed, or [`ANY`].
    pub var_nodes: i64,
    /// Required number of bases in variant nodes, or [`ANY`].
    pub var_bases: i64,
}

impl Default for Profile {
    fn default() -> Self {
        Profile {
            len: 50,
            use_rate: false,
            mut_err: 0.0,
            indel_err: 0.0,
            var_nodes: ANY,
            var_bases: ANY,
        }
    }
}

impl Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f, "len={};mut={};indel={};vnode={};vbase={};rand={}",
            self.len, self.mut_err, self.indel_err, self.var_nodes, self.var_bases, self.use_rate
        )
    }
}

//-----------------------------------------------------------------------------

/// A simulated read with its origin information.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimRead {
    /// The read sequence with errors applied.
    pub sequence: String,
    /// The extracted sequence before errors.
    pub original: String,
    /// 1-based position of the final extracted base.
    pub end: usize,
    /// Number of substitution errors introduced.
    pub substitutions: usize,
    /// Number of indel errors introduced.
    pub indels: usize,
    /// Number of variant nodes the read crosses.
    pub var_nodes: usize,
    /// Number of bases taken from variant nodes.
    pub var_bases: usize,
}

//-----------------------------------------------------------------------------

/// A read generator over a finalized graph.
///
/// # Examples
///
/// ```
/// use vargraph::{Graph, Node, Population, Profile, Sim};
///
/// let mut graph = Graph::new();
/// let mut node = Node::new();
/// node.set_sequence(b"ACGTACGTACGTACGT");
/// node.set_end(16);
/// node.set_as_ref();
/// let id = graph.add_node(node).unwrap();
/// assert!(id > 0);
/// graph.finalize().unwrap();
///
/// let profile = Profile { len: 8, ..Profile::default() };
/// let mut sim = Sim::new(&graph, profile, 42).unwrap();
/// let read = sim.generate().unwrap();
/// assert_eq!(read.sequence.len(), 8);
/// assert!(read.end >= 8 && read.end <= 16);
/// ```
pub struct Sim<'a> {
    graph: &'a Graph,
    profile: Profile,
    // Node ids and the cumulative sequence length up to and including each
    // node, for length-weighted sampling.
    node_ids: Vec<usize>,
    cumulative: Vec<u64>,
    rng: StdRng,
}

impl<'a> Sim<'a> {
    /// Number of attempts before giving up on the profile.
    pub const ABORT_AFTER: usize = 1_000_000;

    /// Creates a generator over the graph with the given profile and seed.
    ///
    /// Fails if the graph is not finalized or the profile is inconsistent.
    pub fn new(graph: &'a Graph, profile: Profile, seed: u64) -> Result<Self, String> {
        if profile.len == 0 {
            return Err(String::from("Read length must be positive"));
        }
        if profile.var_nodes == 0 && profile.var_bases > 0 {
            return Err(String::from(
                "Invalid profile: var_nodes = 0 with var_bases > 0"
            ));
        }
        if profile.use_rate && !(0.0..=1.0).contains(&profile.mut_err) {
            return Err(format!("Substitution rate {} is not in 0..=1", profile.mut_err));
        }
        if profile.use_rate && !(0.0..=1.0).contains(&profile.indel_err) {
            return Err(format!("Indel rate {} is not in 0..=1", profile.indel_err));
        }
        if !profile.use_rate && profile.mut_err as usize > profile.len {
            return Err(String::from("More substitution errors than read bases"));
        }

        let order = graph.topological_order()?;
        let mut node_ids = Vec::with_capacity(order.len());
        let mut cumulative = Vec::with_capacity(order.len());
        let mut total: u64 = 0;
        for id in order.iter() {
            let len = graph.node(*id).unwrap().len() as u64;
            if len == 0 {
                continue;
            }
            total += len;
            node_ids.push(*id);
            cumulative.push(total);
        }
        if total == 0 {
            return Err(String::from("The graph has no sequence to sample from"));
        }

        Ok(Sim {
            graph,
            profile,
            node_ids,
            cumulative,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Returns the profile.
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Generates one read following the profile.
    ///
    /// Fails after [`Sim::ABORT_AFTER`] rejected attempts.
    pub fn generate(&mut self) -> Result<SimRead, String> {
        for _ in 0..Self::ABORT_AFTER {
            if let Some(read) = self.try_read() {
                return Ok(read);
            }
        }
        Err(format!(
            "Could not generate a read for profile [{}] in {} attempts",
            self.profile, Self::ABORT_AFTER
        ))
    }

    /// Generates a batch of reads following the profile.
    pub fn batch(&mut self, count: usize) -> Result<Vec<SimRead>, String> {
        let mut result = Vec::with_capacity(count);
        for _ in 0..count {
            result.push(self.generate()?);
        }
        Ok(result)
    }

    // One sampling attempt.
    fn try_read(&mut self) -> Option<SimRead> {
        // Length-weighted starting node and a uniform offset within it.
        let pick = self.rng.gen_range(0..*self.cumulative.last().unwrap());
        let node_offset = self.cumulative.partition_point(|total| *total <= pick);
        let mut id = self.node_ids[node_offset];
        let mut node = self.graph.node(id).unwrap();
        let mut offset = self.rng.gen_range(0..node.len());

        let mut bases: Vec<u8> = Vec::with_capacity(self.profile.len);
        let mut end = 0;
        let mut var_nodes = 0;
        let mut var_bases = 0;
        loop {
            let take = node.len().min(offset + self.profile.len - bases.len());
            bases.extend_from_slice(&node.sequence()[offset..take]);
            if !node.is_ref() {
                var_nodes += 1;
                var_bases += take - offset;
            }
            end = node.end() - (node.len() - take);
            if bases.len() == self.profile.len {
                break;
            }
            // Continue over a uniformly random successor.
            let successors = self.graph.successors(id);
            if successors.is_empty() {
                return None;
            }
            id = successors[self.rng.gen_range(0..successors.len())];
            node = self.graph.node(id).unwrap();
            offset = 0;
        }

        // Ambiguous bases also mark symbolic alleles.
        if bases.contains(&utils::BASE_N) {
            return None;
        }

        // Profile filters.
        if self.profile.var_nodes != ANY && var_nodes as i64 != self.profile.var_nodes {
            return None;
        }
        if self.profile.var_bases != ANY && var_bases as i64 != self.profile.var_bases {
            return None;
        }

        let original = utils::nums_to_seq(&bases);
        let (sequence, substitutions, indels) = self.apply_errors(bases);

        Some(SimRead {
            sequence,
            original,
            end,
            substitutions,
            indels,
            var_nodes,
            var_bases,
        })
    }

    // Introduces substitution and indel errors and returns the mutated
    // sequence with the actual error counts.
    fn apply_errors(&mut self, mut bases: Vec<u8>) -> (String, usize, usize) {
        let mut substitutions = 0;
        let mut indels = 0;

        if self.profile.use_rate {
            for offset in 0..bases.len() {
                if self.rng.gen_bool(self.profile.mut_err) {
                    bases[offset] = self.substitute(bases[offset]);
                    substitutions += 1;
                }
            }
            let mut offset = 0;
            while offset < bases.len() {
                if self.rng.gen_bool(self.profile.indel_err) {
                    if self.rng.gen_bool(0.5) {
                        bases.insert(offset, self.rng.gen_range(0..4) as u8);
                        offset += 1;
                    } else {
                        bases.remove(offset);
                    }
                    indels += 1;
                }
                offset += 1;
            }
        } else {
            let count = self.profile.mut_err as usize;
            for offset in rand::seq::index::sample(&mut self.rng, bases.len(), count).iter() {
                bases[offset] = self.substitute(bases[offset]);
            }
            substitutions = count;
            for _ in 0..self.profile.indel_err as usize {
                let offset = self.rng.gen_range(0..bases.len());
                if self.rng.gen_bool(0.5) {
                    bases.insert(offset, self.rng.gen_range(0..4) as u8);
                } else if bases.len() > 1 {
                    bases.remove(offset);
                }
                indels += 1;
            }
        }

        (utils::nums_to_seq(&bases), substitutions, indels)
    }

    // Replaces a base with a different random base.
    fn substitute(&mut self, base: u8) -> u8 {
        loop {
            let replacement = self.rng.gen_range(0..4) as u8;
            if replacement != base {
                return replacement;
            }
        }
    }
}

//-----------------------------------------------------------------------------
