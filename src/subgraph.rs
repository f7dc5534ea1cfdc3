//! Named population subgraphs over a base graph.
//!
//! A graph definition file records how the base graph is built and which
//! population subsets are of interest. [`GraphManager`] opens such a file,
//! optionally builds the base graph, and materialises named subgraphs
//! lazily with [`Graph::derive_by_filter`]. Derived graphs are cached and
//! shared, and [`GraphManager::make_subgraph`] can be called from multiple
//! threads.
//!
//! ### Definition file format
//!
//! Plain text, newline-delimited, optionally gzip-compressed:
//!
//! ```text
//! @vgdef
//! ref=reference.fa;vcf=variants.vcf;region=x:0-1000;nodelen=100
//! base=1111111111
//! base/ingroup=1010010001
//! base/~ingroup=0101101110
//! ```
//!
//! The first line is the file marker. The second line records the build
//! parameters. The remaining lines map hierarchical subgraph names to
//! population bitstrings whose length is twice the number of samples in the
//! VCF file. The `~` prefix marks the complement of a sibling subgraph
//! within its parent; complements are generated, never declared.
//!
//! ### Definition scripts
//!
//! [`GraphManager::write_definition`] turns a definition script into file
//! content. Each line of the script is `name=COUNT` or `name=P%`, where the
//! name may use `/` to nest below an earlier definition. The requested
//! number of haplotypes is drawn uniformly without replacement from the
//! parent population, and the complement within the parent is defined
//! implicitly.

use crate::{Graph, GraphBuilder, Population};
use crate::utils;

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::io::BufRead;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;


//-----------------------------------------------------------------------------

/// File marker on the first line of a definition file.
pub const FILE_MARKER: &str = "@vgdef";

/// Name of the base graph.
pub const BASE_LABEL: &str = "base";

/// Scope separator in hierarchical subgraph names.
pub const SCOPE: char = '/';

/// Prefix of the implicit complement of a subgraph.
pub const NEGATE: char = '~';

// Keys in the header line.
const KEY_REF: &str = "ref";
const KEY_VCF: &str = "vcf";
const KEY_REGION: &str = "region";
const KEY_NODELEN: &str = "nodelen";

// Delimiters in the header line.
const DELIM: char = ';';
const ASSIGN: char = '=';

//-----------------------------------------------------------------------------

/// A registry of named population subgraphs over a shared base graph.
///
/// # Examples
///
/// ```no_run
/// use vargraph::GraphManager;
///
/// let manager = GraphManager::from_file("graphs.vgdef", true).unwrap();
/// let subgraph = manager.make_subgraph("ingroup").unwrap();
/// let complement = manager.make_subgraph("~ingroup").unwrap();
/// assert!(subgraph.node_count() + complement.node_count() >= manager.base().unwrap().node_count());
/// ```
pub struct GraphManager {
    reference: String,
    variants: String,
    region: String,
    node_len: usize,
    num_haplotypes: usize,
    base: Option<Arc<Graph>>,
    filters: BTreeMap<String, Population>,
    subgraphs: Mutex<HashMap<String, Arc<Graph>>>,
}

impl GraphManager {
    /// Opens a definition file.
    ///
    /// If `build_base` is set, the base graph is built from the recorded
    /// reference, variant file, and region. Without it the manager only
    /// serves filters and metadata.
    pub fn from_file<P: AsRef<Path>>(filename: P, build_base: bool) -> Result<Self, String> {
        let path = filename.as_ref().to_string_lossy().into_owned();
        let reader = utils::open_file(&filename).map_err(
            |x| format!("Invalid definition file {}: {}", path, x)
        )?;
        Self::from_reader(reader, build_base).map_err(
            |x| format!("Definition file {}: {}", path, x)
        )
    }

    /// Reads a definition from a reader. See [`GraphManager::from_file`].
    pub fn from_reader<R: BufRead>(reader: R, build_base: bool) -> Result<Self, String> {
        let mut lines = reader.lines();
        let marker = lines.next()
            .ok_or(String::from("Empty definition"))?
            .map_err(|x| x.to_string())?;
        if marker.trim_end() != FILE_MARKER {
            return Err(format!("Missing file marker {}", FILE_MARKER));
        }
        let header = lines.next()
            .ok_or(String::from("Missing header line"))?
            .map_err(|x| x.to_string())?;

        let (reference, variants, region, node_len) = Self::parse_header(header.trim_end())?;

        let mut filters: BTreeMap<String, Population> = BTreeMap::new();
        let mut num_haplotypes = 0;
        for line in lines {
            let line = line.map_err(|x| x.to_string())?;
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let (name, bits) = line.split_once(ASSIGN).ok_or(
                format!("Invalid token: \"{}\"", line)
            )?;
            if filters.contains_key(name) {
                return Err(format!("Duplicate definition: \"{}\"", name));
            }
            let population = Population::from_string(bits)?;
            if num_haplotypes == 0 {
                num_haplotypes = population.len();
            } else if population.len() != num_haplotypes {
                return Err(format!(
                    "Population length {} does not match {} in \"{}\"",
                    population.len(), num_haplotypes, name
                ));
            }
            filters.insert(name.to_string(), population);
        }

        let base = if build_base {
            let mut builder = GraphBuilder::new(&reference, &variants);
            builder.set_region_str(&region)?;
            builder.set_node_len(node_len);
            let graph = builder.build()?;
            if num_haplotypes > 0 && graph.population_size() != num_haplotypes {
                return Err(format!(
                    "Definition has {} haplotypes but the variant file has {}",
                    num_haplotypes, graph.population_size()
                ));
            }
            Some(Arc::new(graph))
        } else {
            None
        };

        Ok(GraphManager {
            reference, variants, region, node_len, num_haplotypes,
            base,
            filters,
            subgraphs: Mutex::new(HashMap::new()),
        })
    }

    fn parse_header(header: &str) -> Result<(String, String, String, usize), String> {
        let mut reference = None;
        let mut variants = None;
        let mut region = None;
        let mut node_len = None;
        for token in header.split(DELIM) {
            let (key, value) = token.split_once(ASSIGN).ok_or(
                format!("Invalid token: \"{}\"", token)
            )?;
            match key {
                KEY_REF => reference = Some(value.to_string()),
                KEY_VCF => variants = Some(value.to_string()),
                KEY_REGION => region = Some(value.to_string()),
                KEY_NODELEN => {
                    let value = value.parse::<usize>().map_err(
                        |_| format!("Invalid node length \"{}\"", value)
                    )?;
                    node_len = Some(value);
                }
                _ => return Err(format!("Unknown header key \"{}\"", key)),
            }
        }
        Ok((
            reference.ok_or(String::from("Missing ref in the header"))?,
            variants.ok_or(String::from("Missing vcf in the header"))?,
            region.ok_or(String::from("Missing region in the header"))?,
            node_len.ok_or(String::from("Missing nodelen in the header"))?,
        ))
    }

    //-------------------------------------------------------------------------
    // Access.
    //-------------------------------------------------------------------------

    /// Returns the base graph.
    ///
    /// Fails if the manager was opened without building the base graph.
    pub fn base(&self) -> Result<Arc<Graph>, String> {
        self.base.clone().ok_or(String::from("No base graph built"))
    }

    /// Returns the subgraph with the given label, deriving and caching it on
    /// the first request.
    ///
    /// The label is resolved under the base graph: `ingroup` refers to the
    /// definition `base/ingroup`. The label `base` returns the base graph
    /// itself. This method can be called from multiple threads.
    pub fn make_subgraph(&self, label: &str) -> Result<Arc<Graph>, String> {
        let base = self.base()?;
        if label == BASE_LABEL {
            return Ok(base);
        }
        let full = self.full_label(label);
        let filter = self.filters.get(&full).ok_or(
            format!("Label \"{}\" does not exist", label)
        )?;

        let mut cache = self.subgraphs.lock().map_err(|x| x.to_string())?;
        if let Some(subgraph) = cache.get(&full) {
            return Ok(Arc::clone(subgraph));
        }
        let subgraph = Arc::new(base.derive_by_filter(filter)?);
        cache.insert(full, Arc::clone(&subgraph));
        Ok(subgraph)
    }

    /// Returns the cached subgraph with the given label, or [`None`] if it
    /// has not been derived.
    pub fn subgraph(&self, label: &str) -> Option<Arc<Graph>> {
        let cache = self.subgraphs.lock().ok()?;
        cache.get(&self.full_label(label)).cloned()
    }

    /// Drops the cached subgraph with the given label. Existing handles
    /// remain valid.
    pub fn destroy_subgraph(&self, label: &str) {
        if let Ok(mut cache) = self.subgraphs.lock() {
            cache.remove(&self.full_label(label));
        }
    }

    /// Returns the population filter for the given label.
    pub fn filter(&self, label: &str) -> Result<&Population, String> {
        self.filters.get(&self.full_label(label)).ok_or(
            format!("Label \"{}\" does not exist", label)
        )
    }

    /// Returns the full labels of all defined subgraphs.
    pub fn labels(&self) -> Vec<&str> {
        self.filters.keys().map(|k| k.as_str()).collect()
    }

    /// Returns the reference file name from the definition.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Returns the variant file name from the definition.
    pub fn variants(&self) -> &str {
        &self.variants
    }

    /// Returns the region string from the definition.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Returns the maximum node length from the definition.
    pub fn node_len(&self) -> usize {
        self.node_len
    }

    /// Returns the number of haplotypes covered by the definitions.
    pub fn num_haplotypes(&self) -> usize {
        self.num_haplotypes
    }

    fn full_label(&self, label: &str) -> String {
        if label == BASE_LABEL || label.starts_with(&format!("{}{}", BASE_LABEL, SCOPE)) {
            label.to_string()
        } else {
            format!("{}{}{}", BASE_LABEL, SCOPE, label)
        }
    }

    //-------------------------------------------------------------------------
    // Writing definitions.
    //-------------------------------------------------------------------------

    /// Builds definition file content from a definition script.
    ///
    /// Each line of the script is `name=COUNT` or `name=P%`. Subgraphs are
    /// defined in order, and a name containing `/` nests below an earlier
    /// definition. Haplotypes are drawn uniformly without replacement from
    /// the parent population with a generator seeded by `seed`. Every
    /// definition also produces its complement within the parent, prefixed
    /// with `~`.
    ///
    /// # Arguments
    ///
    /// * `reference`, `variants`, `region`, `node_len`: build parameters to
    ///   record in the header.
    /// * `num_haplotypes`: twice the number of samples in the variant file.
    /// * `script`: the definition script, with definitions separated by
    ///   newlines or semicolons.
    /// * `seed`: seed for the haplotype draw.
    pub fn write_definition(
        reference: &str,
        variants: &str,
        region: &str,
        node_len: usize,
        num_haplotypes: usize,
        script: &str,
        seed: u64,
    ) -> Result<String, String> {
        let mut populations: BTreeMap<String, Population> = BTreeMap::new();
        populations.insert(BASE_LABEL.to_string(), Population::all_set(num_haplotypes));

        let mut rng = StdRng::seed_from_u64(seed);
        for def in script.split(|c| c == '\n' || c == DELIM) {
            let def: String = def.chars().filter(|c| !c.is_whitespace()).collect();
            if def.is_empty() {
                continue;
            }
            let (name, amount) = def.split_once(ASSIGN).ok_or(
                format!("Invalid definition: \"{}\"", def)
            )?;

            let full = format!("{}{}{}", BASE_LABEL, SCOPE, name);
            let (parent, leaf) = full.rsplit_once(SCOPE).unwrap();
            if leaf.starts_with(NEGATE) {
                return Err(format!("Complements cannot be defined explicitly: \"{}\"", def));
            }
            if populations.contains_key(&full) {
                return Err(format!("Duplicate definition: \"{}\"", name));
            }
            let parent_pop = populations.get(parent).cloned().ok_or(
                format!("Parent \"{}\" has not been defined", parent)
            )?;

            let count = Self::parse_amount(amount, parent_pop.count())?;
            if count > parent_pop.count() {
                return Err(format!(
                    "Not enough haplotypes to pick {} in \"{}\"", count, def
                ));
            }

            let chosen = Self::sample_population(&parent_pop, count, &mut rng);
            let complement = chosen.not().and(&parent_pop)?;
            populations.insert(format!("{}{}{}{}", parent, SCOPE, NEGATE, leaf), complement);
            populations.insert(full, chosen);
        }

        let mut result = String::new();
        let _ = writeln!(result, "{}", FILE_MARKER);
        let _ = writeln!(
            result, "{}{}{}{}{}{}{}{}{}{}{}{}{}{}{}",
            KEY_REF, ASSIGN, reference, DELIM,
            KEY_VCF, ASSIGN, variants, DELIM,
            KEY_REGION, ASSIGN, region, DELIM,
            KEY_NODELEN, ASSIGN, node_len
        );
        for (name, population) in populations.iter() {
            let _ = writeln!(result, "{}{}{}", name, ASSIGN, population);
        }
        Ok(result)
    }

    // Parses `COUNT` or `P%` relative to the parent population size.
    fn parse_amount(amount: &str, parent_count: usize) -> Result<usize, String> {
        if let Some(percent) = amount.strip_suffix('%') {
            let percent = percent.parse::<usize>().map_err(
                |_| format!("Invalid percentage \"{}\"", amount)
            )?;
            if percent > 100 {
                return Err(format!("Percentage {} is not in 0..=100", percent));
            }
            Ok((parent_count * percent) / 100)
        } else {
            amount.parse::<usize>().map_err(
                |_| format!("Invalid count \"{}\"", amount)
            )
        }
    }

    // Draws `count` set bits uniformly without replacement from the parent.
    fn sample_population(parent: &Population, count: usize, rng: &mut StdRng) -> Population {
        let mut available: Vec<usize> = (0..parent.len()).filter(|i| parent.get(*i)).collect();
        let mut result = Population::with_len(parent.len());
        for _ in 0..count {
            let offset = rng.gen_range(0..available.len());
            result.set(available.swap_remove(offset));
        }
        result
    }

    //-------------------------------------------------------------------------
    // Output.
    //-------------------------------------------------------------------------

    /// Returns the subgraph hierarchy in Graphviz DOT format. Each node
    /// shows a subgraph name and its population size; complements are
    /// dotted.
    pub fn to_dot(&self, name: &str) -> String {
        let mut dot = String::new();
        let _ = writeln!(dot, "digraph {} {{", name);
        let mut ids: HashMap<&str, usize> = HashMap::new();
        for (offset, (label, population)) in self.filters.iter().enumerate() {
            let leaf = label.rsplit(SCOPE).next().unwrap();
            let style = if leaf.starts_with(NEGATE) { "style=dotted " } else { "" };
            let _ = writeln!(
                dot, "{}[label=\"{} : {}\" {}];", offset + 1, leaf, population.count(), style
            );
            ids.insert(label.as_str(), offset + 1);
        }
        for label in self.filters.keys() {
            if let Some((parent, _)) = label.rsplit_once(SCOPE) {
                if let (Some(from), Some(to)) = (ids.get(parent), ids.get(label.as_str())) {
                    let _ = writeln!(dot, "{} -> {};", from, to);
                }
            }
        }
        dot.push_str("labelloc=\"t\";\nlabel=\"Subgraph : Population Size\";\n}\n");
        dot
    }
}

//-----------------------------------------------------------------------------
