//! Support for reading and writing various file formats.
//!
//! The graph core treats its input formats as external collaborators: only
//! the shape of what the core consumes is implemented here.
//!
//! ### FASTA (reading)
//!
//! [`Reference`] loads a FASTA file into memory and serves subsequences by
//! 0-based half-open coordinates. Multi-line sequences and gzip compression
//! are supported.
//!
//! ### VCF (reading)
//!
//! [`VariantFile`] parses the header for sample names and the records for
//! positions, alleles, allele frequencies (`AF` in the INFO column), and
//! phased or unphased genotypes. Symbolic alternate alleles such as `<CN2>`
//! are carried through as literal tokens. Records can be restricted to a
//! [`Region`].
//!
//! ### SAM (reading and writing)
//!
//! [`SamRecord`] is a minimal SAM codec: the mandatory fields plus typed
//! auxiliary tags. The aligner reads `SEQ`, `POS`, and the `RG` tag, and
//! writes its results as auxiliary tags.
//!
//! ### Read FASTA (writing and parsing)
//!
//! Simulated reads can be stored as two-line FASTA, with the read metadata
//! as `key=value` pairs in the header line. See [`write_read_fasta`].

use crate::utils;

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::{BufRead, Write};
use std::path::Path;

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// A genomic region: a sequence name with a 0-based half-open interval.
///
/// An upper bound of `0` means the end of the sequence. The text form is
/// `name:lower-upper` or a bare sequence name; commas in the bounds are
/// ignored, so `22:0-10,000,000` is valid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    /// Sequence (chromosome) name.
    pub name: String,
    /// 0-based inclusive lower bound.
    pub lower: usize,
    /// 0-based exclusive upper bound; `0` means the end of the sequence.
    pub upper: usize,
}

impl Region {
    /// Creates a region covering the named sequence in full.
    pub fn full(name: &str) -> Self {
        Region { name: name.to_string(), lower: 0, upper: 0 }
    }

    /// Parses a region string.
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(String::from("Empty region"));
        }
        let (name, bounds) = match text.split_once(':') {
            None => return Ok(Region::full(text)),
            Some((name, bounds)) => (name, bounds),
        };
        let (lower, upper) = bounds.split_once('-').ok_or(
            format!("Invalid region bounds: \"{}\"", bounds)
        )?;
        let lower = parse_bound(lower)?;
        let upper = parse_bound(upper)?;
        if upper > 0 && upper <= lower {
            return Err(format!("Empty region interval: \"{}\"", text));
        }
        Ok(Region { name: name.to_string(), lower, upper })
    }

    /// Returns `true` if the 0-based position falls within the region.
    pub fn contains(&self, position: usize) -> bool {
        position >= self.lower && (self.upper == 0 || position < self.upper)
    }

}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}-{}", self.name, self.lower, self.upper)
    }
}

fn parse_bound(text: &str) -> Result<usize, String> {
    let cleaned: String = text.chars().filter(|c| *c != ',').collect();
    cleaned.trim().parse::<usize>().map_err(
        |_| format!("Invalid region bound: \"{}\"", text)
    )
}

//-----------------------------------------------------------------------------

/// An in-memory FASTA reference with random access by region.
pub struct Reference {
    names: Vec<String>,
    sequences: BTreeMap<String, Vec<u8>>,
}

impl Reference {
    /// Loads a FASTA file, which may be gzip-compressed.
    pub fn load<P: AsRef<Path>>(filename: P) -> Result<Self, String> {
        let path = filename.as_ref().to_string_lossy().into_owned();
        let reader = utils::open_file(&filename).map_err(
            |x| format!("Invalid FASTA file {}: {}", path, x)
        )?;
        let result = Reference::parse(reader)?;
        if result.names.is_empty() {
            return Err(format!("Invalid FASTA file {}: no sequences", path));
        }
        Ok(result)
    }

    /// Parses FASTA data from a reader.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self, String> {
        let mut names: Vec<String> = Vec::new();
        let mut sequences: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        let mut current: Option<String> = None;
        for line in reader.lines() {
            let line = line.map_err(|x| x.to_string())?;
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            if let Some(header) = line.strip_prefix('>') {
                let name = header.split_whitespace().next().unwrap_or("").to_string();
                if name.is_empty() {
                    return Err(String::from("FASTA header without a sequence name"));
                }
                if sequences.contains_key(&name) {
                    return Err(format!("Duplicate FASTA sequence {}", name));
                }
                sequences.insert(name.clone(), Vec::new());
                names.push(name.clone());
                current = Some(name);
            } else {
                let name = current.as_ref().ok_or(
                    String::from("FASTA data before the first header")
                )?;
                sequences.get_mut(name).unwrap().extend_from_slice(line.as_bytes());
            }
        }
        Ok(Reference { names, sequences })
    }

    /// Returns the sequence names in file order.
    pub fn sequence_names(&self) -> &[String] {
        &self.names
    }

    /// Returns the length of the named sequence.
    pub fn sequence_len(&self, name: &str) -> Result<usize, String> {
        self.sequences.get(name)
            .map(|s| s.len())
            .ok_or(format!("No sequence {} in the reference", name))
    }

    /// Returns the subsequence `[start, end)` of the named sequence in
    /// 0-based coordinates.
    pub fn subsequence(&self, name: &str, start: usize, end: usize) -> Result<&[u8], String> {
        let sequence = self.sequences.get(name).ok_or(
            format!("No sequence {} in the reference", name)
        )?;
        if start > end || end > sequence.len() {
            return Err(format!(
                "Invalid interval {}..{} for sequence {} of length {}",
                start, end, name, sequence.len()
            ));
        }
        Ok(&sequence[start..end])
    }
}

//-----------------------------------------------------------------------------

/// A variant record: position, alleles, frequencies, and genotypes.
///
/// Allele 0 is the reference allele. Frequencies cover all alleles, with the
/// reference frequency defined as one minus the sum of the alternate
/// frequencies (floored at zero). Genotypes store one allele index per
/// haplotype; a cohort of S diploid samples has 2S haplotypes.
#[derive(Clone, Debug, PartialEq)]
pub struct VariantRecord {
    /// Sequence (chromosome) name.
    pub chrom: String,
    /// 1-based position of the first reference base.
    pub position: usize,
    /// The alleles, with the reference allele first. Symbolic alternate
    /// alleles keep their literal `<...>` tokens.
    pub alleles: Vec<String>,
    /// Allele frequencies, one per allele.
    pub frequencies: Vec<f64>,
    /// Allele index per haplotype.
    pub genotypes: Vec<usize>,
}

impl VariantRecord {
    /// Returns the reference allele.
    pub fn reference(&self) -> &str {
        &self.alleles[0]
    }

    /// Returns the number of alleles, including the reference.
    pub fn allele_count(&self) -> usize {
        self.alleles.len()
    }

    /// Returns the haplotype indexes whose genotype is the given allele.
    pub fn carriers(&self, allele: usize) -> Vec<usize> {
        self.genotypes.iter().enumerate()
            .filter(|(_, gt)| **gt == allele)
            .map(|(i, _)| i)
            .collect()
    }
}

/// An in-memory VCF file: sample names and position-sorted records.
pub struct VariantFile {
    samples: Vec<String>,
    records: Vec<VariantRecord>,
}

impl VariantFile {
    /// Loads a VCF file, which may be gzip-compressed.
    pub fn load<P: AsRef<Path>>(filename: P) -> Result<Self, String> {
        let path = filename.as_ref().to_string_lossy().into_owned();
        let reader = utils::open_file(&filename).map_err(
            |x| format!("Invalid VCF file {}: {}", path, x)
        )?;
        Self::parse(reader).map_err(|x| format!("VCF file {}: {}", path, x))
    }

    /// Parses VCF data from a reader.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self, String> {
        let mut samples: Option<Vec<String>> = None;
        let mut records: Vec<VariantRecord> = Vec::new();
        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|x| x.to_string())?;
            let line = line.trim_end();
            if line.is_empty() || line.starts_with("##") {
                continue;
            }
            if let Some(header) = line.strip_prefix('#') {
                let fields: Vec<&str> = header.split('\t').collect();
                if fields.len() < 8 || fields[0] != "CHROM" {
                    return Err(format!("Invalid header line {}", line_num + 1));
                }
                let names: &[&str] = if fields.len() > 9 { &fields[9..] } else { &[] };
                samples = Some(names.iter().map(|s| s.to_string()).collect());
                continue;
            }
            let samples = samples.as_ref().ok_or(
                format!("Record on line {} before the header line", line_num + 1)
            )?;
            let record = Self::parse_record(line, samples.len()).map_err(
                |x| format!("Line {}: {}", line_num + 1, x)
            )?;
            records.push(record);
        }
        let samples = samples.ok_or(String::from("No header line"))?;
        Ok(VariantFile { samples, records })
    }

    // Parses a single record line.
    fn parse_record(line: &str, num_samples: usize) -> Result<VariantRecord, String> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 8 {
            return Err(format!("Expected at least 8 fields, got {}", fields.len()));
        }

        let chrom = fields[0].to_string();
        let position = fields[1].parse::<usize>().map_err(
            |_| format!("Invalid position \"{}\"", fields[1])
        )?;
        if position == 0 {
            return Err(String::from("Position must be positive"));
        }

        let mut alleles: Vec<String> = vec![fields[3].to_string()];
        if fields[3].is_empty() {
            return Err(String::from("Empty reference allele"));
        }
        if fields[4] != "." {
            for alt in fields[4].split(',') {
                alleles.push(alt.to_string());
            }
        }

        let frequencies = Self::parse_frequencies(fields[7], alleles.len())?;
        let genotypes = Self::parse_genotypes(&fields[8..], num_samples, alleles.len())?;

        Ok(VariantRecord { chrom, position, alleles, frequencies, genotypes })
    }

    // Extracts allele frequencies from the INFO column. The reference
    // frequency is one minus the sum of the alternate frequencies.
    fn parse_frequencies(info: &str, allele_count: usize) -> Result<Vec<f64>, String> {
        let mut alt_freqs: Vec<f64> = vec![0.0; allele_count - 1];
        for entry in info.split(';') {
            if let Some(values) = entry.strip_prefix("AF=") {
                for (i, value) in values.split(',').enumerate() {
                    if i >= alt_freqs.len() {
                        return Err(format!("More AF values than alternate alleles in \"{}\"", entry));
                    }
                    alt_freqs[i] = value.parse::<f64>().map_err(
                        |_| format!("Invalid AF value \"{}\"", value)
                    )?;
                }
                break;
            }
        }
        let alt_total: f64 = alt_freqs.iter().sum();
        let mut frequencies = Vec::with_capacity(allele_count);
        frequencies.push((1.0 - alt_total).max(0.0));
        frequencies.extend(alt_freqs);
        Ok(frequencies)
    }

    // Parses the GT values from the sample columns into one allele index per
    // haplotype. Missing values count as the reference allele. A haploid
    // genotype covers both haplotypes of the sample.
    fn parse_genotypes(fields: &[&str], num_samples: usize, allele_count: usize) -> Result<Vec<usize>, String> {
        let mut genotypes: Vec<usize> = Vec::with_capacity(2 * num_samples);
        if num_samples == 0 {
            return Ok(genotypes);
        }
        if fields.is_empty() {
            return Err(String::from("Missing FORMAT column"));
        }
        let gt_offset = fields[0].split(':').position(|f| f == "GT").ok_or(
            String::from("No GT field in the FORMAT column")
        )?;
        let columns = &fields[1..];
        if columns.len() != num_samples {
            return Err(format!(
                "Expected {} sample columns, got {}", num_samples, columns.len()
            ));
        }
        for column in columns.iter() {
            let gt = column.split(':').nth(gt_offset).ok_or(
                format!("Missing GT value in column \"{}\"", column)
            )?;
            let mut parsed: Vec<usize> = Vec::with_capacity(2);
            for value in gt.split(|c| c == '|' || c == '/') {
                if value == "." {
                    parsed.push(0);
                    continue;
                }
                let allele = value.parse::<usize>().map_err(
                    |_| format!("Invalid genotype \"{}\"", gt)
                )?;
                if allele >= allele_count {
                    return Err(format!("Genotype \"{}\" out of allele range", gt));
                }
                parsed.push(allele);
            }
            match parsed.len() {
                1 => {
                    genotypes.push(parsed[0]);
                    genotypes.push(parsed[0]);
                }
                2 => genotypes.extend(parsed),
                _ => return Err(format!("Genotype \"{}\" is not diploid", gt)),
            }
        }
        Ok(genotypes)
    }

    /// Returns the number of diploid samples.
    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    /// Returns the number of haplotypes (two per sample).
    pub fn num_haplotypes(&self) -> usize {
        2 * self.samples.len()
    }

    /// Returns the sample names.
    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    /// Returns all records.
    pub fn records(&self) -> &[VariantRecord] {
        &self.records
    }

    /// Returns the records whose starting position falls within the region,
    /// in file order.
    pub fn records_in(&self, region: &Region) -> Vec<&VariantRecord> {
        self.records.iter()
            .filter(|r| r.chrom == region.name && region.contains(r.position - 1))
            .collect()
    }
}

//-----------------------------------------------------------------------------

/// A SAM record: the mandatory fields and the auxiliary tags.
///
/// The aligner only interprets `QNAME`, `POS`, `SEQ`, and the `RG` tag, but
/// every field is carried through to the output.
#[derive(Clone, Debug, PartialEq)]
pub struct SamRecord {
    /// Query name.
    pub qname: String,
    /// Bitwise flags.
    pub flag: u16,
    /// Reference sequence name.
    pub rname: String,
    /// 1-based position of the first aligned base, or `0` if unavailable.
    pub pos: usize,
    /// Mapping quality.
    pub mapq: u8,
    /// CIGAR string.
    pub cigar: String,
    /// Reference name of the mate.
    pub rnext: String,
    /// Position of the mate.
    pub pnext: usize,
    /// Observed template length.
    pub tlen: isize,
    /// Read sequence.
    pub seq: String,
    /// Base qualities.
    pub qual: String,
    /// Auxiliary tags as (tag, type, value).
    pub aux: Vec<(String, char, String)>,
}

impl SamRecord {
    /// Creates an unmapped record with the given name and sequence.
    pub fn unmapped(qname: &str, seq: &str) -> Self {
        SamRecord {
            qname: qname.to_string(),
            flag: 4,
            rname: String::from("*"),
            pos: 0,
            mapq: 255,
            cigar: String::from("*"),
            rnext: String::from("*"),
            pnext: 0,
            tlen: 0,
            seq: seq.to_string(),
            qual: String::from("*"),
            aux: Vec::new(),
        }
    }

    /// Parses a SAM record line.
    pub fn parse(line: &str) -> Result<Self, String> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 11 {
            return Err(format!("Expected at least 11 fields, got {}", fields.len()));
        }
        let mut aux: Vec<(String, char, String)> = Vec::new();
        for field in fields[11..].iter() {
            let mut parts = field.splitn(3, ':');
            let tag = parts.next().unwrap_or("");
            let ty = parts.next().unwrap_or("");
            let value = parts.next().unwrap_or("");
            if tag.len() != 2 || ty.len() != 1 {
                return Err(format!("Invalid auxiliary field \"{}\"", field));
            }
            aux.push((tag.to_string(), ty.chars().next().unwrap(), value.to_string()));
        }
        Ok(SamRecord {
            qname: fields[0].to_string(),
            flag: fields[1].parse::<u16>().map_err(|_| format!("Invalid flag \"{}\"", fields[1]))?,
            rname: fields[2].to_string(),
            pos: fields[3].parse::<usize>().map_err(|_| format!("Invalid position \"{}\"", fields[3]))?,
            mapq: fields[4].parse::<u8>().map_err(|_| format!("Invalid mapping quality \"{}\"", fields[4]))?,
            cigar: fields[5].to_string(),
            rnext: fields[6].to_string(),
            pnext: fields[7].parse::<usize>().map_err(|_| format!("Invalid mate position \"{}\"", fields[7]))?,
            tlen: fields[8].parse::<isize>().map_err(|_| format!("Invalid template length \"{}\"", fields[8]))?,
            seq: fields[9].to_string(),
            qual: fields[10].to_string(),
            aux,
        })
    }

    /// Returns the record as a SAM line without a trailing newline.
    pub fn to_line(&self) -> String {
        let mut line = format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.qname, self.flag, self.rname, self.pos, self.mapq, self.cigar,
            self.rnext, self.pnext, self.tlen, self.seq, self.qual
        );
        for (tag, ty, value) in self.aux.iter() {
            let _ = write!(line, "\t{}:{}:{}", tag, ty, value);
        }
        line
    }

    /// Returns the value of the given auxiliary tag.
    pub fn get_aux(&self, tag: &str) -> Option<&str> {
        self.aux.iter().find(|(t, _, _)| t == tag).map(|(_, _, v)| v.as_str())
    }

    /// Sets an auxiliary tag, replacing an existing value.
    pub fn set_aux(&mut self, tag: &str, ty: char, value: &str) {
        if let Some(entry) = self.aux.iter_mut().find(|(t, _, _)| t == tag) {
            entry.1 = ty;
            entry.2 = value.to_string();
        } else {
            self.aux.push((tag.to_string(), ty, value.to_string()));
        }
    }
}

/// A SAM file in memory: header lines and records.
pub struct SamFile {
    /// Header lines, including the leading `@`.
    pub header: Vec<String>,
    /// The records in file order.
    pub records: Vec<SamRecord>,
}

impl SamFile {
    /// Creates an empty SAM file with a minimal header.
    pub fn new() -> Self {
        SamFile { header: vec![String::from("@HD\tVN:1.6")], records: Vec::new() }
    }

    /// Loads a SAM file, which may be gzip-compressed.
    pub fn load<P: AsRef<Path>>(filename: P) -> Result<Self, String> {
        let path = filename.as_ref().to_string_lossy().into_owned();
        let reader = utils::open_file(&filename).map_err(
            |x| format!("Invalid reads file {}: {}", path, x)
        )?;
        Self::parse(reader).map_err(|x| format!("Reads file {}: {}", path, x))
    }

    /// Parses SAM data from a reader.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self, String> {
        let mut header: Vec<String> = Vec::new();
        let mut records: Vec<SamRecord> = Vec::new();
        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|x| x.to_string())?;
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('@') {
                header.push(line.to_string());
            } else {
                let record = SamRecord::parse(line).map_err(
                    |x| format!("Line {}: {}", line_num + 1, x)
                )?;
                records.push(record);
            }
        }
        Ok(SamFile { header, records })
    }

    /// Returns the read group identifiers declared in `@RG` header lines.
    pub fn read_groups(&self) -> Vec<String> {
        let mut result = Vec::new();
        for line in self.header.iter() {
            if !line.starts_with("@RG") {
                continue;
            }
            for field in line.split('\t').skip(1) {
                if let Some(id) = field.strip_prefix("ID:") {
                    result.push(id.to_string());
                }
            }
        }
        result
    }

    /// Adds a read group header line if the identifier is not yet declared.
    pub fn add_read_group(&mut self, id: &str) {
        if !self.read_groups().iter().any(|rg| rg == id) {
            self.header.push(format!("@RG\tID:{}", id));
        }
    }

    /// Adds a program header line.
    pub fn add_program(&mut self, id: &str, name: &str, command_line: &str) {
        self.header.push(format!(
            "@PG\tID:{}\tPN:{}\tVN:{}\tCL:{}",
            id, name, env!("CARGO_PKG_VERSION"), command_line
        ));
    }

    /// Writes the header and the records to the given output.
    pub fn write<W: Write>(&self, output: &mut W) -> Result<(), String> {
        for line in self.header.iter() {
            writeln!(output, "{}", line).map_err(|x| x.to_string())?;
        }
        for record in self.records.iter() {
            writeln!(output, "{}", record.to_line()).map_err(|x| x.to_string())?;
        }
        Ok(())
    }
}

impl Default for SamFile {
    fn default() -> Self {
        SamFile::new()
    }
}

//-----------------------------------------------------------------------------

// Metadata keys in the header line of a read FASTA.
const READ_META_END: &str = "pos";
const READ_META_SUB: &str = "sub";
const READ_META_INDEL: &str = "ind";
const READ_META_VAR_NODES: &str = "vnd";
const READ_META_VAR_BASES: &str = "vbs";

/// Metadata of a simulated read in a FASTA header line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadMeta {
    /// 1-based position of the final base.
    pub end: usize,
    /// Number of substitution errors introduced.
    pub substitutions: i64,
    /// Number of indel errors introduced.
    pub indels: i64,
    /// Number of variant nodes the read crosses.
    pub var_nodes: i64,
    /// Number of bases in variant nodes.
    pub var_bases: i64,
}

/// Writes a simulated read as two FASTA lines.
///
/// The header line holds the metadata as `;`-delimited `key=value` pairs.
pub fn write_read_fasta<W: Write>(sequence: &str, meta: &ReadMeta, output: &mut W) -> Result<(), String> {
    writeln!(
        output, ">{}={};{}={};{}={};{}={};{}={}",
        READ_META_END, meta.end,
        READ_META_SUB, meta.substitutions,
        READ_META_INDEL, meta.indels,
        READ_META_VAR_NODES, meta.var_nodes,
        READ_META_VAR_BASES, meta.var_bases
    ).map_err(|x| x.to_string())?;
    writeln!(output, "{}", sequence).map_err(|x| x.to_string())
}

/// Parses the metadata from a read FASTA header line, with or without the
/// leading `>`.
pub fn parse_read_meta(header: &str) -> Result<ReadMeta, String> {
    let header = header.strip_prefix('>').unwrap_or(header);
    let mut meta = ReadMeta { end: 0, substitutions: -1, indels: -1, var_nodes: -1, var_bases: -1 };
    for pair in header.split(';') {
        let (key, value) = pair.split_once('=').ok_or(
            format!("Invalid metadata token \"{}\"", pair)
        )?;
        match key {
            READ_META_END => {
                meta.end = value.parse::<usize>().map_err(|_| format!("Invalid end position \"{}\"", value))?;
            }
            READ_META_SUB => {
                meta.substitutions = value.parse::<i64>().map_err(|_| format!("Invalid substitution count \"{}\"", value))?;
            }
            READ_META_INDEL => {
                meta.indels = value.parse::<i64>().map_err(|_| format!("Invalid indel count \"{}\"", value))?;
            }
            READ_META_VAR_NODES => {
                meta.var_nodes = value.parse::<i64>().map_err(|_| format!("Invalid variant node count \"{}\"", value))?;
            }
            READ_META_VAR_BASES => {
                meta.var_bases = value.parse::<i64>().map_err(|_| format!("Invalid variant base count \"{}\"", value))?;
            }
            _ => return Err(format!("Unknown metadata key \"{}\"", key)),
        }
    }
    Ok(meta)
}

//-----------------------------------------------------------------------------
