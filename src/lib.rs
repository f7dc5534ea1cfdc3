//! # Variant-aware short-read alignment to population subgraphs.
//!
//! This crate represents a genome reference enriched with population
//! variation as a directed acyclic graph and aligns short reads against
//! arbitrary sub-populations of that graph with a vectorised
//! Smith-Waterman-style dynamic program.
//!
//! ### Basic concepts
//!
//! A [`Graph`] is built from a FASTA reference and a VCF variant catalogue
//! by [`GraphBuilder`]. Nodes carry sequence fragments, reference
//! coordinates, allele frequencies, and per-haplotype membership bitsets
//! ([`Population`]); edges form a DAG whose paths enumerate the haplotypes
//! observed in the cohort.
//!
//! The base graph owns a shared node pool. Subgraphs are lightweight views
//! over the same pool: [`Graph::derive_by_filter`] keeps the nodes carried
//! by a population subset, [`Graph::derive_reference`] keeps the linear
//! reference, and [`Graph::derive_maxaf`] projects the path of maximum
//! allele frequency.
//!
//! A [`GraphManager`] opens a graph definition file, which records the
//! build parameters and a set of named population filters, and serves
//! cached subgraphs to concurrent alignment workers.
//!
//! The [`Aligner`] computes the best and second-best scoring end positions
//! for a batch of reads, processing [`Aligner::read_capacity`] reads in
//! parallel with one read per byte lane. [`Sim`] generates reads from the
//! graph for evaluation.
//!
//! The binaries `define`, `align`, and `simulate` wrap these pieces into a
//! command-line workflow: define subgraphs, simulate reads from them, and
//! align reads against them.

pub mod alignment;
pub mod builder;
pub mod formats;
pub mod graph;
pub mod population;
pub mod sim;
pub mod subgraph;
pub mod utils;

pub use alignment::{Aligner, AlignmentMode, AlignmentResult, ScoreParams};
pub use builder::GraphBuilder;
pub use graph::{Graph, Node, NodePool};
pub use population::Population;
pub use sim::{Profile, Sim, SimRead};
pub use subgraph::GraphManager;
