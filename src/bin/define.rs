use vargraph::GraphManager;
use vargraph::formats::{Region, VariantFile};
use vargraph::builder::GraphBuilder;
use vargraph::utils;

use std::fs::File;
use std::io::{Read, Write};
use std::time::Instant;
use std::{env, io, process};

use getopts::Options;

//-----------------------------------------------------------------------------

fn main() -> Result<(), String> {
    let start_time = Instant::now();
    let config = Config::new()?;

    // The region must parse, and the variant file determines the number of
    // haplotypes covered by the population bitstrings.
    let _ = Region::parse(&config.region)?;
    let variants = VariantFile::load(&config.variants)?;
    let num_haplotypes = variants.num_haplotypes();
    drop(variants);

    let script = match &config.script_file {
        Some(filename) => {
            let mut file = utils::open_file(filename)?;
            let mut script = String::new();
            file.read_to_string(&mut script).map_err(|x| x.to_string())?;
            script
        }
        None => config.definitions.clone(),
    };

    let content = GraphManager::write_definition(
        &config.reference, &config.variants, &config.region,
        config.node_len, num_haplotypes, &script, config.seed
    )?;

    if let Some(filename) = &config.output {
        let mut file = File::create(filename).map_err(|x| x.to_string())?;
        file.write_all(content.as_bytes()).map_err(|x| x.to_string())?;
    } else {
        io::stdout().write_all(content.as_bytes()).map_err(|x| x.to_string())?;
    }

    if config.verify {
        eprintln!("Building the base graph");
        let mut builder = GraphBuilder::new(&config.reference, &config.variants);
        builder.set_region_str(&config.region)?;
        builder.set_node_len(config.node_len);
        let graph = builder.build()?;
        eprintln!("Built {} nodes", graph.node_count());
    }

    let seconds = start_time.elapsed().as_secs_f64();
    eprintln!("Used {:.3} seconds", seconds);
    Ok(())
}

//-----------------------------------------------------------------------------

pub struct Config {
    pub reference: String,
    pub variants: String,
    pub region: String,
    pub node_len: usize,
    pub definitions: String,
    pub script_file: Option<String>,
    pub output: Option<String>,
    pub seed: u64,
    pub verify: bool,
}

impl Config {
    pub fn new() -> Result<Config, String> {
        let args: Vec<String> = env::args().collect();
        let program = args[0].clone();

        let mut opts = Options::new();
        opts.optflag("h", "help", "print this help");
        opts.optopt("f", "fasta", "reference FASTA file (required)", "FILE");
        opts.optopt("v", "vcf", "variant VCF file (required)", "FILE");
        opts.optopt("g", "region", "region to build, e.g. x:0-1000 (required)", "STR");
        let node_len_desc = format!("maximum node length (default: {})", GraphBuilder::DEFAULT_NODE_LEN);
        opts.optopt("l", "nodelen", &node_len_desc, "INT");
        opts.optopt("d", "defs", "subgraph definitions, e.g. \"ingroup=50%\"", "STR");
        opts.optopt("s", "script", "read the definitions from a file", "FILE");
        opts.optopt("t", "out", "output file (default: stdout)", "FILE");
        opts.optopt("", "seed", "seed for the haplotype draw", "INT");
        opts.optflag("", "verify", "build the base graph after writing");
        let matches = opts.parse(&args[1..]).map_err(|x| x.to_string())?;

        if matches.opt_present("help") {
            let header = format!("Usage: {} -f ref.fa -v vars.vcf -g region [options]", program);
            eprint!("{}", opts.usage(&header));
            process::exit(0);
        }

        let reference = matches.opt_str("fasta").ok_or(String::from("Reference FASTA file required"))?;
        let variants = matches.opt_str("vcf").ok_or(String::from("Variant VCF file required"))?;
        let region = matches.opt_str("region").ok_or(String::from("Region required"))?;
        let node_len = match matches.opt_str("nodelen") {
            Some(value) => value.parse::<usize>().map_err(|_| format!("Invalid node length {}", value))?,
            None => GraphBuilder::DEFAULT_NODE_LEN,
        };
        let seed = match matches.opt_str("seed") {
            Some(value) => value.parse::<u64>().map_err(|_| format!("Invalid seed {}", value))?,
            None => rand::random(),
        };

        Ok(Config {
            reference,
            variants,
            region,
            node_len,
            definitions: matches.opt_str("defs").unwrap_or_default(),
            script_file: matches.opt_str("script"),
            output: matches.opt_str("out"),
            seed,
            verify: matches.opt_present("verify"),
        })
    }
}

//-----------------------------------------------------------------------------
