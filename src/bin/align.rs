use vargraph::{Aligner, AlignmentMode, GraphManager, ScoreParams};
use vargraph::alignment::{
    MAX_POS_TAG, MAX_SCORE_TAG, MAX_COUNT_TAG,
    SUB_POS_TAG, SUB_SCORE_TAG, SUB_COUNT_TAG,
    COR_FLAG_TAG, END_TO_END_TAG,
};
use vargraph::formats::{SamFile, SamRecord};
use vargraph::utils;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs::File;
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;
use std::{env, io, process, thread};

use getopts::Options;

//-----------------------------------------------------------------------------

// Read group for records without an RG tag.
const UNGROUPED: &str = "UNGROUPED";

fn main() -> Result<(), String> {
    let config = Config::new()?;
    let params = ScoreParams {
        match_score: config.match_score,
        mismatch: config.mismatch,
        gap_open: config.gap_open,
        gap_extend: config.gap_extend,
    };
    let mode = if config.end_to_end { AlignmentMode::EndToEnd } else { AlignmentMode::Local };

    // Validate the scoring configuration before any work starts.
    let _ = Aligner::new(config.read_len, params, mode)?;

    eprintln!(
        "Match={} Mismatch={} GapOpen={} GapExtend={} MaxReadLen={} CorrectnessTol={}",
        params.match_score, params.mismatch, params.gap_open, params.gap_extend,
        config.read_len, config.tolerance
    );

    // Load the reads and group them by read group.
    eprint!("Loading reads... ");
    let start_time = Instant::now();
    let mut reads = match &config.reads {
        Some(filename) => SamFile::load(filename)?,
        None => SamFile::parse(io::stdin().lock())?,
    };
    for record in reads.records.iter() {
        if record.seq.len() > config.read_len {
            return Err(format!(
                "Expected a read of length <= {}, got {}", config.read_len, record.seq.len()
            ));
        }
    }
    let mut read_groups: BTreeMap<String, Vec<SamRecord>> = BTreeMap::new();
    let records: Vec<SamRecord> = std::mem::take(&mut reads.records);
    for mut record in records {
        let group = match record.get_aux("RG") {
            Some(group) => group.to_string(),
            None => {
                record.set_aux("RG", 'Z', UNGROUPED);
                reads.add_read_group(UNGROUPED);
                UNGROUPED.to_string()
            }
        };
        reads.add_read_group(&group);
        read_groups.entry(group).or_default().push(record);
    }
    eprintln!("{:.3} seconds.", start_time.elapsed().as_secs_f64());

    // Route read groups to subgraphs. Without explicit targets every group
    // aligns to the base graph.
    let target_lines = config.target_lines()?;
    let target_lines = if target_lines.is_empty() {
        read_groups.keys()
            .map(|group| format!("RG:ID:{},{}", group, vargraph::subgraph::BASE_LABEL))
            .collect()
    } else {
        target_lines
    };
    let mut routes = parse_targets(&target_lines, &reads)?;
    // Reads without a read group fall back to the base graph.
    if read_groups.contains_key(UNGROUPED)
        && !routes.values().any(|groups| groups.iter().any(|g| g == UNGROUPED))
    {
        routes.entry(String::from(vargraph::subgraph::BASE_LABEL))
            .or_default()
            .push(String::from(UNGROUPED));
    }

    // Shard the reads into tasks of at most `chunk` records.
    let mut tasks: VecDeque<(usize, Task)> = VecDeque::new();
    let mut total = 0;
    for (label, groups) in routes.iter() {
        for group in groups.iter() {
            let records = match read_groups.remove(group) {
                Some(records) => records,
                None => continue,
            };
            total += records.len();
            let mut records = VecDeque::from(records);
            while !records.is_empty() {
                let take = records.len().min(config.chunk);
                let chunk: Vec<SamRecord> = records.drain(..take).collect();
                tasks.push_back((tasks.len(), Task { label: label.clone(), records: chunk }));
            }
        }
    }
    eprintln!("\t{} read groups.", routes.values().map(|v| v.len()).sum::<usize>());
    eprintln!("\t{} subgraphs.", routes.len());
    eprintln!("\t{} tasks.", tasks.len());
    eprintln!("\t{} total alignments.", total);

    // Load the graphs.
    eprint!("Loading graphs... ");
    let start_time = Instant::now();
    let manager = Arc::new(GraphManager::from_file(&config.gdef, true)?);
    let base = manager.base()?;
    eprintln!("({} nodes), {:.3} seconds.", base.node_count(), start_time.elapsed().as_secs_f64());

    let threads = config.threads.max(1).min(tasks.len().max(1));
    {
        let probe = Aligner::new(config.read_len, params, mode)?;
        eprintln!(
            "Estimated aligner memory usage: {} MB",
            threads * probe.estimated_size(base.node_count()) / 1_000_000
        );
    }

    // Align on a worker pool. Workers pop tasks from a shared queue; a task
    // that fails is reported and dropped.
    eprintln!("Aligning with {} thread(s)...", threads);
    let start_time = Instant::now();
    let queue = Arc::new(Mutex::new(tasks));
    let finished: Arc<Mutex<Vec<(usize, Vec<SamRecord>)>>> = Arc::new(Mutex::new(Vec::new()));
    let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(threads);
    for _ in 0..threads {
        let queue = Arc::clone(&queue);
        let finished = Arc::clone(&finished);
        let manager = Arc::clone(&manager);
        let config = config.clone();
        workers.push(thread::spawn(move || {
            let mut aligner = match Aligner::new(config.read_len, params, mode) {
                Ok(aligner) => aligner,
                Err(message) => {
                    eprintln!("Worker failed to start: {}", message);
                    return;
                }
            };
            aligner.set_tolerance(config.tolerance);
            loop {
                let task = {
                    let mut queue = queue.lock().unwrap();
                    queue.pop_front()
                };
                let (offset, task) = match task {
                    Some(task) => task,
                    None => return,
                };
                match align_task(&aligner, &manager, task, config.end_to_end) {
                    Ok(records) => {
                        finished.lock().unwrap().push((offset, records));
                    }
                    Err(message) => {
                        eprintln!("Task {} failed: {}", offset, message);
                    }
                }
            }
        }));
    }
    for worker in workers {
        let _ = worker.join();
    }
    eprintln!("{:.3} seconds.", start_time.elapsed().as_secs_f64());

    // Write the alignments in task order.
    let command_line: Vec<String> = env::args().collect();
    reads.add_program("VA", "vargraph_align", &command_line.join(" "));
    let mut finished = Arc::try_unwrap(finished)
        .map_err(|_| String::from("Worker threads still alive"))?
        .into_inner().map_err(|x| x.to_string())?;
    finished.sort_by_key(|(offset, _)| *offset);
    for (_, mut records) in finished {
        reads.records.append(&mut records);
    }
    match &config.output {
        Some(filename) => {
            let mut file = File::create(filename).map_err(|x| x.to_string())?;
            reads.write(&mut file)?;
        }
        None => {
            reads.write(&mut io::stdout().lock())?;
        }
    }

    Ok(())
}

//-----------------------------------------------------------------------------

struct Task {
    label: String,
    records: Vec<SamRecord>,
}

// Aligns the records of one task against its subgraph and annotates them.
fn align_task(
    aligner: &Aligner,
    manager: &GraphManager,
    task: Task,
    end_to_end: bool,
) -> Result<Vec<SamRecord>, String> {
    let subgraph = manager.make_subgraph(&task.label)?;
    let mut records = task.records;

    let sequences: Vec<String> = records.iter().map(|r| r.seq.clone()).collect();
    let targets: Vec<usize> = records.iter()
        .map(|r| (r.pos + r.seq.len()).saturating_sub(1))
        .collect();
    let results = aligner.align(&sequences, &targets, &subgraph)?;

    for (record, result) in records.iter_mut().zip(results.iter()) {
        record.rname = task.label.clone();
        record.set_aux(MAX_POS_TAG, 'i', &result.max_pos.to_string());
        record.set_aux(MAX_SCORE_TAG, 'i', &result.max_score.to_string());
        record.set_aux(MAX_COUNT_TAG, 'i', &result.max_count.to_string());
        record.set_aux(SUB_POS_TAG, 'i', &result.sub_pos.to_string());
        record.set_aux(SUB_SCORE_TAG, 'i', &result.sub_score.to_string());
        record.set_aux(SUB_COUNT_TAG, 'i', &result.sub_count.to_string());
        record.set_aux(COR_FLAG_TAG, 'i', &result.correctness.to_string());
        record.set_aux(END_TO_END_TAG, 'i', if end_to_end { "1" } else { "0" });
    }
    Ok(records)
}

//-----------------------------------------------------------------------------

// Maps subgraph labels to the read group ids routed to them.
//
// Each target line has the form `RG:<TAG>:<VALUE>,<subgraph-label>`. The
// tag `ID` matches the read group id; other tags match fields of the `@RG`
// header lines.
fn parse_targets(lines: &[String], reads: &SamFile) -> Result<BTreeMap<String, Vec<String>>, String> {
    // Fields of every @RG header line, keyed by read group id.
    let mut header_fields: HashMap<String, HashMap<String, String>> = HashMap::new();
    for line in reads.header.iter() {
        if !line.starts_with("@RG") {
            continue;
        }
        let mut id = None;
        let mut fields = HashMap::new();
        for field in line.split('\t').skip(1) {
            if let Some((tag, value)) = field.split_once(':') {
                if tag == "ID" {
                    id = Some(value.to_string());
                }
                fields.insert(tag.to_string(), value.to_string());
            }
        }
        if let Some(id) = id {
            header_fields.insert(id, fields);
        }
    }

    let mut routes: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for line in lines.iter() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (source, label) = line.split_once(',').ok_or(
            format!("Malformed alignment target \"{}\"", line)
        )?;
        let rest = source.strip_prefix("RG:").ok_or(
            format!("Expected a read group tag 'RG:xx:', got \"{}\"", source)
        )?;
        let (tag, value) = rest.split_once(':').ok_or(
            format!("Expected source format RG:tag:value in \"{}\"", source)
        )?;
        if tag.len() != 2 {
            return Err(format!("Invalid read group tag \"{}\"", tag));
        }

        for (id, fields) in header_fields.iter() {
            let candidate = if tag == "ID" { Some(id) } else { fields.get(tag) };
            if candidate.map(|v| v.as_str()) == Some(value) {
                routes.entry(label.to_string()).or_default().push(id.clone());
            }
        }
    }
    Ok(routes)
}

//-----------------------------------------------------------------------------

#[derive(Clone)]
pub struct Config {
    pub gdef: String,
    pub reads: Option<String>,
    pub targets: Option<String>,
    pub targets_is_file: bool,
    pub read_len: usize,
    pub match_score: u8,
    pub mismatch: u8,
    pub gap_open: u8,
    pub gap_extend: u8,
    pub end_to_end: bool,
    pub tolerance: usize,
    pub chunk: usize,
    pub output: Option<String>,
    pub threads: usize,
}

impl Config {
    // Default maximum read length.
    pub const DEFAULT_READ_LEN: usize = 50;
    // Default task size in reads.
    pub const DEFAULT_CHUNK: usize = 2048;

    pub fn new() -> Result<Config, String> {
        let args: Vec<String> = env::args().collect();
        let program = args[0].clone();

        let mut opts = Options::new();
        opts.optflag("h", "help", "print this help");
        opts.optopt("g", "gdef", "graph definition file (required)", "FILE");
        opts.optopt("r", "reads", "SAM reads file (default: stdin)", "FILE");
        opts.optopt("a", "align", "alignment targets of form \"RG:ID:value,subgraph\"", "STR");
        opts.optflag("f", "file", "-a specifies a file name");
        opts.optopt("l", "rlen", "maximum read length (default: 50)", "INT");
        opts.optopt("m", "match", "match score (default: 2)", "INT");
        opts.optopt("n", "mismatch", "mismatch penalty (default: 2)", "INT");
        opts.optopt("o", "gap_open", "gap opening penalty (default: 3)", "INT");
        opts.optopt("e", "gap_extend", "gap extension penalty (default: 1)", "INT");
        opts.optflag("x", "endtoend", "perform end to end alignment");
        opts.optopt("c", "tolerance", "correctness tolerance (default: rlen / 4)", "INT");
        let chunk_desc = format!("partition tasks into chunks of at most N reads (default: {})", Self::DEFAULT_CHUNK);
        opts.optopt("u", "chunk", &chunk_desc, "INT");
        opts.optopt("t", "out", "output file (default: stdout)", "FILE");
        opts.optopt("j", "threads", "number of threads (default: 1)", "INT");
        let matches = opts.parse(&args[1..]).map_err(|x| x.to_string())?;

        if matches.opt_present("help") {
            let header = format!("Usage: {} -g graphs.vgdef [options]", program);
            eprint!("{}", opts.usage(&header));
            eprintln!("\nElements per vector: {}", Aligner::read_capacity());
            process::exit(0);
        }

        let gdef = matches.opt_str("gdef").ok_or(String::from("Graph definition file required"))?;
        let read_len = Self::parse_opt(&matches, "rlen", Self::DEFAULT_READ_LEN)?;
        let chunk = Self::parse_opt(&matches, "chunk", Self::DEFAULT_CHUNK)?;
        if chunk == 0 {
            return Err(String::from("Chunk size must be positive"));
        }
        if chunk < Aligner::read_capacity() || chunk % Aligner::read_capacity() != 0 {
            eprintln!(
                "Warning: Chunk size is not a multiple of the vector length: {}",
                Aligner::read_capacity()
            );
        }

        Ok(Config {
            gdef,
            reads: matches.opt_str("reads"),
            targets: matches.opt_str("align"),
            targets_is_file: matches.opt_present("file"),
            read_len,
            match_score: Self::parse_opt(&matches, "match", 2usize)? as u8,
            mismatch: Self::parse_opt(&matches, "mismatch", 2usize)? as u8,
            gap_open: Self::parse_opt(&matches, "gap_open", 3usize)? as u8,
            gap_extend: Self::parse_opt(&matches, "gap_extend", 1usize)? as u8,
            end_to_end: matches.opt_present("endtoend"),
            tolerance: Self::parse_opt(&matches, "tolerance", Aligner::default_tolerance(read_len))?,
            chunk,
            output: matches.opt_str("out"),
            threads: Self::parse_opt(&matches, "threads", 1usize)?,
        })
    }

    fn parse_opt(matches: &getopts::Matches, name: &str, default: usize) -> Result<usize, String> {
        match matches.opt_str(name) {
            Some(value) => value.parse::<usize>().map_err(
                |_| format!("Invalid value for --{}: {}", name, value)
            ),
            None => Ok(default),
        }
    }

    // Returns the alignment target lines from the option or the file.
    pub fn target_lines(&self) -> Result<Vec<String>, String> {
        let targets = match &self.targets {
            Some(targets) => targets.clone(),
            None => return Ok(Vec::new()),
        };
        let text = if self.targets_is_file {
            let mut file = utils::open_file(&targets)?;
            let mut text = String::new();
            file.read_to_string(&mut text).map_err(|x| x.to_string())?;
            text
        } else {
            targets
        };
        Ok(text.split(|c| c == '\n' || c == ';')
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }
}

//-----------------------------------------------------------------------------
