use vargraph::{GraphManager, Profile, Sim};
use vargraph::formats::{self, ReadMeta, SamFile, SamRecord};
use vargraph::sim::{
    ORIGINAL_SEQ_TAG, SUB_ERR_TAG, INDEL_ERR_TAG,
    VAR_NODES_TAG, VAR_BASES_TAG, END_POS_TAG, SRC_GRAPH_TAG, USE_RATE_TAG,
};

use std::fs::File;
use std::io::Write;
use std::time::Instant;
use std::{env, io, process};

use getopts::Options;

//-----------------------------------------------------------------------------

fn main() -> Result<(), String> {
    let start_time = Instant::now();
    let config = Config::new()?;
    let profile = Profile {
        len: config.len,
        use_rate: config.use_rate,
        mut_err: config.mut_err,
        indel_err: config.indel_err,
        var_nodes: config.var_nodes,
        var_bases: config.var_bases,
    };

    eprint!("Loading graphs... ");
    let manager = GraphManager::from_file(&config.gdef, true)?;
    eprintln!("({} nodes).", manager.base()?.node_count());

    eprintln!("Simulating {} reads per subgraph with profile [{}]", config.count, profile);
    let mut output = SimOutput::open(&config)?;
    for (offset, label) in config.subgraphs.iter().enumerate() {
        let subgraph = manager.make_subgraph(label)?;
        let mut sim = Sim::new(&subgraph, profile, config.seed.wrapping_add(offset as u64))?;
        let batch = sim.batch(config.count)?;
        output.write_batch(label, &batch, &config)?;
    }
    output.finish(&config)?;

    eprintln!("Used {:.3} seconds", start_time.elapsed().as_secs_f64());
    Ok(())
}

//-----------------------------------------------------------------------------

// Accumulates the simulated reads in the requested output format.
enum SimOutput {
    Sam(SamFile, usize),
    Fasta(Vec<u8>),
}

impl SimOutput {
    fn open(config: &Config) -> Result<Self, String> {
        if config.fasta {
            Ok(SimOutput::Fasta(Vec::new()))
        } else {
            let mut sam = SamFile::new();
            for label in config.subgraphs.iter() {
                sam.header.push(format!("@RG\tID:{}\t{}:Z:{}", label, SRC_GRAPH_TAG, label));
            }
            let command_line: Vec<String> = env::args().collect();
            sam.add_program("VS", "vargraph_sim", &command_line.join(" "));
            Ok(SimOutput::Sam(sam, 0))
        }
    }

    fn write_batch(&mut self, label: &str, batch: &[vargraph::SimRead], config: &Config) -> Result<(), String> {
        match self {
            SimOutput::Sam(sam, serial) => {
                for read in batch.iter() {
                    let mut record = SamRecord::unmapped(&format!("sim_{}", serial), &read.sequence);
                    *serial += 1;
                    record.pos = read.end + 1 - read.original.len();
                    record.set_aux("RG", 'Z', label);
                    record.set_aux(END_POS_TAG, 'i', &read.end.to_string());
                    record.set_aux(ORIGINAL_SEQ_TAG, 'Z', &read.original);
                    record.set_aux(SUB_ERR_TAG, 'i', &read.substitutions.to_string());
                    record.set_aux(INDEL_ERR_TAG, 'i', &read.indels.to_string());
                    record.set_aux(VAR_NODES_TAG, 'i', &read.var_nodes.to_string());
                    record.set_aux(VAR_BASES_TAG, 'i', &read.var_bases.to_string());
                    record.set_aux(SRC_GRAPH_TAG, 'Z', label);
                    record.set_aux(USE_RATE_TAG, 'i', if config.use_rate { "1" } else { "0" });
                    sam.records.push(record);
                }
            }
            SimOutput::Fasta(buffer) => {
                for read in batch.iter() {
                    let meta = ReadMeta {
                        end: read.end,
                        substitutions: read.substitutions as i64,
                        indels: read.indels as i64,
                        var_nodes: read.var_nodes as i64,
                        var_bases: read.var_bases as i64,
                    };
                    formats::write_read_fasta(&read.sequence, &meta, buffer)?;
                }
            }
        }
        Ok(())
    }

    fn finish(self, config: &Config) -> Result<(), String> {
        let mut out: Box<dyn Write> = match &config.output {
            Some(filename) => Box::new(File::create(filename).map_err(|x| x.to_string())?),
            None => Box::new(io::stdout()),
        };
        match self {
            SimOutput::Sam(sam, _) => sam.write(&mut out),
            SimOutput::Fasta(buffer) => out.write_all(&buffer).map_err(|x| x.to_string()),
        }
    }
}

//-----------------------------------------------------------------------------

pub struct Config {
    pub gdef: String,
    pub subgraphs: Vec<String>,
    pub count: usize,
    pub len: usize,
    pub use_rate: bool,
    pub mut_err: f64,
    pub indel_err: f64,
    pub var_nodes: i64,
    pub var_bases: i64,
    pub fasta: bool,
    pub output: Option<String>,
    pub seed: u64,
}

impl Config {
    pub fn new() -> Result<Config, String> {
        let args: Vec<String> = env::args().collect();
        let program = args[0].clone();

        let mut opts = Options::new();
        opts.optflag("h", "help", "print this help");
        opts.optopt("g", "gdef", "graph definition file (required)", "FILE");
        opts.optopt("s", "subgraphs", "subgraph labels, separated by ';' (default: base)", "STR");
        opts.optopt("n", "count", "reads per subgraph (default: 1000)", "INT");
        opts.optopt("l", "rlen", "read length (default: 50)", "INT");
        opts.optopt("m", "mut", "substitution errors, count or rate (default: 0)", "NUM");
        opts.optopt("i", "indel", "indel errors, count or rate (default: 0)", "NUM");
        opts.optflag("", "rate", "interpret error values as rates");
        opts.optopt("v", "vnodes", "required variant nodes crossed, -1 for any (default: -1)", "INT");
        opts.optopt("b", "vbases", "required variant bases, -1 for any (default: -1)", "INT");
        opts.optflag("", "fasta", "write FASTA instead of SAM");
        opts.optopt("t", "out", "output file (default: stdout)", "FILE");
        opts.optopt("", "seed", "seed for the random generator", "INT");
        let matches = opts.parse(&args[1..]).map_err(|x| x.to_string())?;

        if matches.opt_present("help") {
            let header = format!("Usage: {} -g graphs.vgdef [options]", program);
            eprint!("{}", opts.usage(&header));
            process::exit(0);
        }

        let gdef = matches.opt_str("gdef").ok_or(String::from("Graph definition file required"))?;
        let subgraphs: Vec<String> = matches.opt_str("subgraphs")
            .unwrap_or_else(|| String::from(vargraph::subgraph::BASE_LABEL))
            .split(';')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            gdef,
            subgraphs,
            count: Self::parse_num(&matches, "count", 1000.0)? as usize,
            len: Self::parse_num(&matches, "rlen", 50.0)? as usize,
            use_rate: matches.opt_present("rate"),
            mut_err: Self::parse_num(&matches, "mut", 0.0)?,
            indel_err: Self::parse_num(&matches, "indel", 0.0)?,
            var_nodes: Self::parse_num(&matches, "vnodes", -1.0)? as i64,
            var_bases: Self::parse_num(&matches, "vbases", -1.0)? as i64,
            fasta: matches.opt_present("fasta"),
            output: matches.opt_str("out"),
            seed: match matches.opt_str("seed") {
                Some(value) => value.parse::<u64>().map_err(|_| format!("Invalid seed {}", value))?,
                None => rand::random(),
            },
        })
    }

    fn parse_num(matches: &getopts::Matches, name: &str, default: f64) -> Result<f64, String> {
        match matches.opt_str(name) {
            Some(value) => value.parse::<f64>().map_err(
                |_| format!("Invalid value for --{}: {}", name, value)
            ),
            None => Ok(default),
        }
    }
}

//-----------------------------------------------------------------------------
