//! Building a variant graph from a reference and a variant catalogue.
//!
//! [`GraphBuilder`] streams reference chunks and variant records in genomic
//! order and emits nodes and edges. Reference segments between variants are
//! split into nodes of at most the maximum node length; variant alleles are
//! never split. At every variant site the builder emits one node for the
//! reference allele and one node per alternate allele, and wires every
//! unconnected node of the previous frontier to every new node.
//!
//! Nodes are emitted in genomic order, which is topological by construction,
//! so the builder publishes the traversal order with
//! [`Graph::finalize_from_insertion_order`].

use crate::{Graph, Node, Population};
use crate::formats::{Reference, Region, VariantFile, VariantRecord};

use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::rngs::StdRng;


//-----------------------------------------------------------------------------

/// Builds a variant graph from a FASTA reference and a VCF variant file.
///
/// # Examples
///
/// ```no_run
/// use vargraph::GraphBuilder;
///
/// let mut builder = GraphBuilder::new("reference.fa", "variants.vcf");
/// builder.set_region_str("x:0-1000").unwrap();
/// builder.set_node_len(80);
/// let graph = builder.build().unwrap();
/// assert!(graph.node_count() > 0);
/// ```
pub struct GraphBuilder {
    reference: PathBuf,
    variants: PathBuf,
    region: Option<Region>,
    ingroup: usize,
    node_len: usize,
    seed: Option<u64>,
}

impl GraphBuilder {
    /// Default maximum node length in bp.
    pub const DEFAULT_NODE_LEN: usize = 1_000_000;

    /// Creates a builder for the given reference and variant files.
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(reference: P, variants: Q) -> Self {
        GraphBuilder {
            reference: reference.as_ref().to_path_buf(),
            variants: variants.as_ref().to_path_buf(),
            region: None,
            ingroup: 100,
            node_len: Self::DEFAULT_NODE_LEN,
            seed: None,
        }
    }

    /// Restricts the build to the given region. The default is the first
    /// sequence of the reference in full.
    pub fn set_region(&mut self, region: Region) {
        self.region = Some(region);
    }

    /// Restricts the build to the region given in text form.
    pub fn set_region_str(&mut self, region: &str) -> Result<(), String> {
        self.region = Some(Region::parse(region)?);
        Ok(())
    }

    /// Uses the given percentage of samples, drawn uniformly without
    /// replacement. Reference nodes are always included.
    pub fn set_ingroup(&mut self, percent: usize) {
        self.ingroup = percent;
    }

    /// Sets the maximum node length for reference segments.
    pub fn set_node_len(&mut self, max: usize) {
        self.node_len = max;
    }

    /// Seeds the random generator used for the ingroup draw.
    pub fn set_seed(&mut self, seed: u64) {
        self.seed = Some(seed);
    }

    /// Builds the graph.
    ///
    /// Fails on invalid input files, on configuration errors, and on variant
    /// records that do not fit the region.
    pub fn build(&self) -> Result<Graph, String> {
        if self.ingroup > 100 {
            return Err(format!("Ingroup percentage {} is not in 0..=100", self.ingroup));
        }
        if self.node_len == 0 {
            return Err(String::from("Maximum node length must be positive"));
        }

        let reference = Reference::load(&self.reference)?;
        let variants = VariantFile::load(&self.variants)?;
        let region = match &self.region {
            Some(region) => region.clone(),
            None => Region::full(&reference.sequence_names()[0]),
        };
        let seq_len = reference.sequence_len(&region.name)?;
        let target = if region.upper == 0 { seq_len } else { region.upper.min(seq_len) };

        let haplotypes = variants.num_haplotypes();
        let ingroup = self.draw_ingroup(haplotypes);

        let mut graph = Graph::new();
        graph.set_population_size(haplotypes);

        // The graph has been built up to this position (0-based, exclusive).
        let mut cursor = region.lower;
        // Frontiers of nodes whose outgoing / incoming edges are pending.
        let mut prev_unconnected: Vec<usize> = Vec::new();
        let mut curr_unconnected: Vec<usize> = Vec::new();

        for record in variants.records_in(&region) {
            let variant_start = record.position - 1;
            cursor = Self::build_linear_ref(
                &mut graph, &reference, &region,
                &mut prev_unconnected, &mut curr_unconnected,
                cursor, variant_start, self.node_len, haplotypes
            )?;

            // Variant allele positions are referenced to the reference
            // allele.
            cursor += record.reference().len();
            self.add_variant_site(
                &mut graph, record, cursor, haplotypes, &ingroup, &mut curr_unconnected
            )?;
            Self::build_edges(&mut graph, &mut prev_unconnected, &mut curr_unconnected)?;
        }

        // The linear tail after the last variant.
        Self::build_linear_ref(
            &mut graph, &reference, &region,
            &mut prev_unconnected, &mut curr_unconnected,
            cursor, target, self.node_len, haplotypes
        )?;

        graph.finalize_from_insertion_order();
        graph.set_description(&format!(
            "REF: {}\nVCF: {}\nRegion: {}:{}-{}\nIngroup: {}\nNode length: {}",
            self.reference.display(), self.variants.display(),
            region.name, region.lower, target, self.ingroup, self.node_len
        ));
        Ok(graph)
    }

    // Draws the ingroup samples uniformly without replacement. Both
    // haplotypes of a chosen sample are included.
    fn draw_ingroup(&self, haplotypes: usize) -> Population {
        if self.ingroup >= 100 {
            return Population::all_set(haplotypes);
        }
        let samples = haplotypes / 2;
        let amount = (samples * self.ingroup) / 100;
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut result = Population::with_len(haplotypes);
        for sample in rand::seq::index::sample(&mut rng, samples, amount).iter() {
            result.set(2 * sample);
            result.set(2 * sample + 1);
        }
        result
    }

    // Emits one reference-allele node and one node per alternate allele at a
    // variant site. `end` is the 1-based position of the final base of the
    // reference allele.
    fn add_variant_site(
        &self,
        graph: &mut Graph,
        record: &VariantRecord,
        end: usize,
        haplotypes: usize,
        ingroup: &Population,
        curr_unconnected: &mut Vec<usize>,
    ) -> Result<(), String> {
        {
            let mut node = Node::new();
            node.set_sequence(record.reference().as_bytes());
            node.set_end(end);
            node.set_as_ref();
            node.set_frequency(record.frequencies[0]);
            node.set_population(Population::all_set(haplotypes));
            curr_unconnected.push(graph.add_node(node)?);
        }
        for allele in 1..record.allele_count() {
            let mut membership = Population::with_len(haplotypes);
            for haplotype in record.carriers(allele) {
                if ingroup.get(haplotype) {
                    membership.set(haplotype);
                }
            }
            let mut node = Node::new();
            node.set_sequence(record.alleles[allele].as_bytes());
            node.set_end(end);
            node.set_not_ref();
            node.set_frequency(record.frequencies[allele]);
            node.set_population(membership);
            curr_unconnected.push(graph.add_node(node)?);
        }
        Ok(())
    }

    // Wires every node of the previous frontier to every node of the current
    // frontier, then swaps the frontiers.
    fn build_edges(
        graph: &mut Graph,
        prev: &mut Vec<usize>,
        curr: &mut Vec<usize>,
    ) -> Result<(), String> {
        for from in prev.iter() {
            for to in curr.iter() {
                graph.add_edge(*from, *to)?;
            }
        }
        std::mem::swap(prev, curr);
        curr.clear();
        Ok(())
    }

    // Emits reference nodes covering `[cursor, target)`, splitting at the
    // maximum node length. Returns the new cursor position.
    #[allow(clippy::too_many_arguments)]
    fn build_linear_ref(
        graph: &mut Graph,
        reference: &Reference,
        region: &Region,
        prev: &mut Vec<usize>,
        curr: &mut Vec<usize>,
        cursor: usize,
        target: usize,
        node_len: usize,
        haplotypes: usize,
    ) -> Result<usize, String> {
        let mut cursor = cursor;
        while cursor < target {
            let chunk_end = target.min(cursor + node_len);
            let sequence = reference.subsequence(&region.name, cursor, chunk_end)?;
            let mut node = Node::new();
            node.set_sequence(sequence);
            node.set_end(chunk_end);
            node.set_as_ref();
            node.set_population(Population::all_set(haplotypes));
            curr.push(graph.add_node(node)?);
            Self::build_edges(graph, prev, curr)?;
            cursor = chunk_end;
        }
        Ok(cursor)
    }
}

//-----------------------------------------------------------------------------
