//! Vectorised alignment of short reads to a variant graph.
//!
//! The aligner computes affine-gap alignments of a batch of reads against a
//! graph, processing [`LANES`] reads in parallel with one read per byte
//! lane. The graph is traversed in topological order. For every node the
//! dynamic program advances column by column over the node sequence; when a
//! node has several incoming edges, its initial column is the lane-wise
//! maximum over the final columns of its predecessors. Only the final
//! column of each node is retained, so memory stays proportional to the
//! number of nodes rather than the total sequence length.
//!
//! Two scoring modes are supported:
//!
//! * [`AlignmentMode::Local`]: Smith-Waterman. Cell values are clamped at
//!   zero by the saturating arithmetic, and the best score may occur in any
//!   cell.
//! * [`AlignmentMode::EndToEnd`]: the entire read must be consumed, and
//!   candidate scores are taken only in sink nodes. Scores are carried with
//!   a bias origin so deficits below the starting level stay ordered under
//!   u8 saturation.
//!
//! For every read the aligner reports the best and second-best scoring end
//! positions, how many distinct positions tied for each score, and a
//! correctness flag relative to a supplied truth position.

use crate::Graph;
use crate::utils;

use std::collections::HashMap;

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

// SAM auxiliary tags written by the alignment tools.

/// Tag for the best end position.
pub const MAX_POS_TAG: &str = "mp";
/// Tag for the best score.
pub const MAX_SCORE_TAG: &str = "ms";
/// Tag for the number of positions tied for the best score.
pub const MAX_COUNT_TAG: &str = "mc";
/// Tag for the second-best end position.
pub const SUB_POS_TAG: &str = "sp";
/// Tag for the second-best score.
pub const SUB_SCORE_TAG: &str = "ss";
/// Tag for the number of positions tied for the second-best score.
pub const SUB_COUNT_TAG: &str = "sc";
/// Tag for the correctness flag.
pub const COR_FLAG_TAG: &str = "cf";
/// Tag for the end-to-end flag.
pub const END_TO_END_TAG: &str = "te";

//-----------------------------------------------------------------------------

/// Number of reads processed in parallel, one per byte lane.
pub const LANES: usize = 16;

/// A vector of [`LANES`] unsigned bytes with the operations the dynamic
/// program needs. On x86_64 the operations compile to single SSE2
/// instructions; elsewhere a portable implementation is used.
#[cfg(target_arch = "x86_64")]
#[derive(Clone, Copy)]
pub(crate) struct ByteVec(std::arch::x86_64::__m128i);

#[cfg(target_arch = "x86_64")]
impl ByteVec {
    /// Returns a vector with every lane set to `value`.
    #[inline]
    pub fn splat(value: u8) -> Self {
        unsafe { ByteVec(std::arch::x86_64::_mm_set1_epi8(value as i8)) }
    }

    /// Returns a vector of zeros.
    #[inline]
    pub fn zero() -> Self {
        unsafe { ByteVec(std::arch::x86_64::_mm_setzero_si128()) }
    }

    /// Builds a vector from an array of lanes.
    #[inline]
    pub fn from_array(lanes: [u8; LANES]) -> Self {
        unsafe {
            ByteVec(std::arch::x86_64::_mm_loadu_si128(
                lanes.as_ptr() as *const std::arch::x86_64::__m128i
            ))
        }
    }

    /// Returns the lanes as an array.
    #[inline]
    pub fn to_array(self) -> [u8; LANES] {
        let mut lanes = [0u8; LANES];
        unsafe {
            std::arch::x86_64::_mm_storeu_si128(
                lanes.as_mut_ptr() as *mut std::arch::x86_64::__m128i, self.0
            );
        }
        lanes
    }

    /// Lane-wise saturating addition.
    #[inline]
    pub fn saturating_add(self, other: Self) -> Self {
        unsafe { ByteVec(std::arch::x86_64::_mm_adds_epu8(self.0, other.0)) }
    }

    /// Lane-wise saturating subtraction.
    #[inline]
    pub fn saturating_sub(self, other: Self) -> Self {
        unsafe { ByteVec(std::arch::x86_64::_mm_subs_epu8(self.0, other.0)) }
    }

    /// Lane-wise maximum.
    #[inline]
    pub fn max(self, other: Self) -> Self {
        unsafe { ByteVec(std::arch::x86_64::_mm_max_epu8(self.0, other.0)) }
    }

    /// Lane-wise equality mask: `0xFF` where the lanes are equal.
    #[inline]
    pub fn eq_mask(self, other: Self) -> Self {
        unsafe { ByteVec(std::arch::x86_64::_mm_cmpeq_epi8(self.0, other.0)) }
    }

    /// Selects `on` where the mask lane is `0xFF` and `off` elsewhere.
    /// `self` is the mask.
    #[inline]
    pub fn blend(self, on: Self, off: Self) -> Self {
        unsafe {
            use std::arch::x86_64::{_mm_and_si128, _mm_andnot_si128, _mm_or_si128};
            ByteVec(_mm_or_si128(
                _mm_and_si128(self.0, on.0),
                _mm_andnot_si128(self.0, off.0)
            ))
        }
    }
}

#[cfg(not(target_arch = "x86_64"))]
#[derive(Clone, Copy)]
pub(crate) struct ByteVec([u8; LANES]);

#[cfg(not(target_arch = "x86_64"))]
impl ByteVec {
    /// Returns a vector with every lane set to `value`.
    #[inline]
    pub fn splat(value: u8) -> Self {
        ByteVec([value; LANES])
    }

    /// Returns a vector of zeros.
    #[inline]
    pub fn zero() -> Self {
        ByteVec([0; LANES])
    }

    /// Builds a vector from an array of lanes.
    #[inline]
    pub fn from_array(lanes: [u8; LANES]) -> Self {
        ByteVec(lanes)
    }

    /// Returns the lanes as an array.
    #[inline]
    pub fn to_array(self) -> [u8; LANES] {
        self.0
    }

    /// Lane-wise saturating addition.
    #[inline]
    pub fn saturating_add(self, other: Self) -> Self {
        let mut result = [0; LANES];
        for i in 0..LANES {
            result[i] = self.0[i].saturating_add(other.0[i]);
        }
        ByteVec(result)
    }

    /// Lane-wise saturating subtraction.
    #[inline]
    pub fn saturating_sub(self, other: Self) -> Self {
        let mut result = [0; LANES];
        for i in 0..LANES {
            result[i] = self.0[i].saturating_sub(other.0[i]);
        }
        ByteVec(result)
    }

    /// Lane-wise maximum.
    #[inline]
    pub fn max(self, other: Self) -> Self {
        let mut result = [0; LANES];
        for i in 0..LANES {
            result[i] = self.0[i].max(other.0[i]);
        }
        ByteVec(result)
    }

    /// Lane-wise equality mask: `0xFF` where the lanes are equal.
    #[inline]
    pub fn eq_mask(self, other: Self) -> Self {
        let mut result = [0; LANES];
        for i in 0..LANES {
            result[i] = if self.0[i] == other.0[i] { 0xFF } else { 0 };
        }
        ByteVec(result)
    }

    /// Selects `on` where the mask lane is `0xFF` and `off` elsewhere.
    /// `self` is the mask.
    #[inline]
    pub fn blend(self, on: Self, off: Self) -> Self {
        let mut result = [0; LANES];
        for i in 0..LANES {
            result[i] = (self.0[i] & on.0[i]) | (!self.0[i] & off.0[i]);
        }
        ByteVec(result)
    }
}

//-----------------------------------------------------------------------------

/// Alignment mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlignmentMode {
    /// Smith-Waterman local alignment: the best score may occur in any cell.
    Local,
    /// The entire read is aligned, and candidate scores are taken only in
    /// sink nodes.
    EndToEnd,
}

/// Affine gap scoring parameters. All values are penalties or rewards in
/// unsigned byte range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScoreParams {
    /// Score added for a matching base.
    pub match_score: u8,
    /// Penalty subtracted for a mismatching base.
    pub mismatch: u8,
    /// Penalty for opening a gap.
    pub gap_open: u8,
    /// Penalty for extending a gap.
    pub gap_extend: u8,
}

impl Default for ScoreParams {
    fn default() -> Self {
        ScoreParams { match_score: 2, mismatch: 2, gap_open: 3, gap_extend: 1 }
    }
}

/// The alignment of a single read: the best and second-best scoring end
/// positions with tie counts, and the correctness flag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AlignmentResult {
    /// Best score.
    pub max_score: u8,
    /// 1-based end position of the best alignment, or `0` if the read did
    /// not align.
    pub max_pos: usize,
    /// Number of distinct end positions with the best score.
    pub max_count: usize,
    /// Second-best score at least the read length away from the best.
    pub sub_score: u8,
    /// 1-based end position of the second-best alignment.
    pub sub_pos: usize,
    /// Number of distinct end positions with the second-best score.
    pub sub_count: usize,
    /// `2` if the best position is within the tolerance of the truth and
    /// unique, `1` if within the tolerance but tied, and `0` otherwise.
    pub correctness: u8,
}

//-----------------------------------------------------------------------------

/// A vectorised affine-gap aligner over a variant graph.
///
/// The aligner is built for a maximum read length and a set of scoring
/// parameters. A batch of reads of any size can then be aligned against any
/// finalized graph; the batch is processed in packets of
/// [`Aligner::read_capacity`] reads.
///
/// # Examples
///
/// ```
/// use vargraph::{Aligner, AlignmentMode, Graph, Node, Population, ScoreParams};
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
/// let aligner = Aligner::new(9, ScoreParams::default(), AlignmentMode::Local).unwrap();
/// let reads = vec![String::from("AAACCCTTT")];
/// let targets = vec![9];
/// let results = aligner.align(&reads, &targets, &graph).unwrap();
/// assert_eq!(results[0].max_score, 18);
/// assert_eq!(results[0].max_pos, 9);
/// assert_eq!(results[0].correctness, 2);
/// ```
pub struct Aligner {
    params: ScoreParams,
    read_len: usize,
    mode: AlignmentMode,
    tolerance: usize,
}

// Bias origin for end-to-end scores. Values below the bias are deficits.
const ETE_BIAS: u8 = 128;

impl Aligner {
    /// Returns the number of reads aligned in parallel.
    pub const fn read_capacity() -> usize {
        LANES
    }

    /// Returns the default correctness tolerance for a read length.
    pub fn default_tolerance(read_len: usize) -> usize {
        read_len.div_ceil(4)
    }

    /// Creates an aligner for reads of at most `read_len` bases.
    ///
    /// Fails if a fully matching read would overflow the unsigned byte
    /// score range.
    pub fn new(read_len: usize, params: ScoreParams, mode: AlignmentMode) -> Result<Self, String> {
        if read_len == 0 {
            return Err(String::from("Maximum read length must be positive"));
        }
        if read_len * (params.match_score as usize) > u8::MAX as usize {
            return Err(format!(
                "Score overflow with read length {} and match score {}",
                read_len, params.match_score
            ));
        }
        Ok(Aligner {
            params,
            read_len,
            mode,
            tolerance: Self::default_tolerance(read_len),
        })
    }

    /// Sets the correctness tolerance.
    pub fn set_tolerance(&mut self, tolerance: usize) {
        self.tolerance = tolerance;
    }

    /// Returns the correctness tolerance.
    pub fn tolerance(&self) -> usize {
        self.tolerance
    }

    /// Returns the maximum read length.
    pub fn read_len(&self) -> usize {
        self.read_len
    }

    /// Returns an estimate of the aligner's working memory in bytes for a
    /// graph with the given number of nodes.
    pub fn estimated_size(&self, nodes: usize) -> usize {
        2 * (nodes + 2) * (self.read_len + 1) * LANES
    }

    /// Aligns a batch of reads against the graph.
    ///
    /// `targets` holds the truth end position for each read (1-based) and
    /// must have the same length as `reads`. Results are returned in input
    /// order. Fails if a read is longer than the maximum read length or if
    /// the graph has not been finalized.
    pub fn align(
        &self,
        reads: &[String],
        targets: &[usize],
        graph: &Graph,
    ) -> Result<Vec<AlignmentResult>, String> {
        if reads.len() != targets.len() {
            return Err(format!(
                "Read count {} does not match target count {}", reads.len(), targets.len()
            ));
        }
        for read in reads.iter() {
            if read.len() > self.read_len {
                return Err(format!(
                    "Expected a read of length <= {}, got {}", self.read_len, read.len()
                ));
            }
        }
        let order = graph.topological_order()?;

        let mut results: Vec<AlignmentResult> = Vec::with_capacity(reads.len());
        for packet in reads.chunks(LANES) {
            let mut packet_results = self.align_packet(packet, order, graph);
            packet_results.truncate(packet.len());
            results.append(&mut packet_results);
        }

        // Correctness flags.
        for (result, target) in results.iter_mut().zip(targets.iter()) {
            let low = target.saturating_sub(self.tolerance);
            let high = target + self.tolerance;
            result.correctness = if result.max_count > 0 && result.max_pos >= low && result.max_pos <= high {
                if result.max_count == 1 { 2 } else { 1 }
            } else {
                0
            };
        }

        Ok(results)
    }

    // Aligns one packet of at most LANES reads and returns LANES results.
    fn align_packet(&self, reads: &[String], order: &[usize], graph: &Graph) -> Vec<AlignmentResult> {
        let rows = self.read_len;
        let read_buf = Self::pack_reads(reads, rows);

        let match_vec = ByteVec::splat(self.params.match_score);
        let mismatch_vec = ByteVec::splat(self.params.mismatch);
        let gap_open_vec = ByteVec::splat(self.params.gap_open);
        let gap_extend_vec = ByteVec::splat(self.params.gap_extend);

        // The boundary column: scores[0] is the row above the first read
        // base. In local mode everything starts at zero. In end-to-end mode
        // alignments start at the bias, and leading rows pay for skipped
        // read bases as insertions.
        let mut boundary_scores: Vec<ByteVec> = Vec::with_capacity(rows + 1);
        let boundary_gaps: Vec<ByteVec> = vec![ByteVec::zero(); rows + 1];
        match self.mode {
            AlignmentMode::Local => {
                boundary_scores.resize(rows + 1, ByteVec::zero());
            }
            AlignmentMode::EndToEnd => {
                boundary_scores.push(ByteVec::splat(ETE_BIAS));
                for row in 1..=rows {
                    let penalty = self.params.gap_open as usize
                        + (row - 1) * self.params.gap_extend as usize;
                    let value = (ETE_BIAS as usize).saturating_sub(penalty) as u8;
                    boundary_scores.push(ByteVec::splat(value));
                }
            }
        }

        // The final column of every processed node: (scores, gap state).
        let mut seeds: HashMap<usize, (Vec<ByteVec>, Vec<ByteVec>)> =
            HashMap::with_capacity(order.len());

        let mut tracker = LaneTracker::new(self.read_len);
        let mut scores_prev: Vec<ByteVec> = vec![ByteVec::zero(); rows + 1];
        let mut gaps_prev: Vec<ByteVec> = vec![ByteVec::zero(); rows + 1];
        let mut scores_curr: Vec<ByteVec> = vec![ByteVec::zero(); rows + 1];
        let mut gaps_curr: Vec<ByteVec> = vec![ByteVec::zero(); rows + 1];

        for id in order.iter() {
            let node = graph.node(*id).unwrap();

            // Merge the final columns of the predecessors, or start from
            // the boundary column.
            let predecessors = graph.predecessors(*id);
            if predecessors.is_empty() {
                scores_prev.copy_from_slice(&boundary_scores);
                gaps_prev.copy_from_slice(&boundary_gaps);
            } else {
                let (first_scores, first_gaps) = seeds.get(&predecessors[0]).unwrap();
                scores_prev.copy_from_slice(first_scores);
                gaps_prev.copy_from_slice(first_gaps);
                for pred in predecessors[1..].iter() {
                    let (pred_scores, pred_gaps) = seeds.get(pred).unwrap();
                    for row in 0..=rows {
                        scores_prev[row] = scores_prev[row].max(pred_scores[row]);
                        gaps_prev[row] = gaps_prev[row].max(pred_gaps[row]);
                    }
                }
            }

            let track_node = match self.mode {
                AlignmentMode::Local => true,
                AlignmentMode::EndToEnd => graph.successors(*id).is_empty(),
            };

            for (column, base) in node.sequence().iter().enumerate() {
                let base_vec = ByteVec::splat(*base);
                scores_curr[0] = boundary_scores[0];
                gaps_curr[0] = ByteVec::zero();

                // Vertical gap state within the column.
                let mut insert = ByteVec::zero();
                for row in 1..=rows {
                    // Diagonal: match or mismatch against this base.
                    let eq = read_buf[row - 1].eq_mask(base_vec);
                    let diag = eq.blend(
                        scores_prev[row - 1].saturating_add(match_vec),
                        scores_prev[row - 1].saturating_sub(mismatch_vec)
                    );

                    // Gap along the read.
                    insert = insert.saturating_sub(gap_extend_vec).max(
                        scores_curr[row - 1].saturating_sub(gap_open_vec)
                    );

                    // Gap along the reference, carried across columns and
                    // merged over predecessors.
                    let delete = gaps_prev[row].saturating_sub(gap_extend_vec).max(
                        scores_prev[row].saturating_sub(gap_open_vec)
                    );

                    gaps_curr[row] = delete;
                    scores_curr[row] = diag.max(insert).max(delete);
                }

                if track_node {
                    let position = node.end() - (node.len() - 1 - column);
                    match self.mode {
                        AlignmentMode::Local => {
                            let mut column_max = scores_curr[1];
                            for row in 2..=rows {
                                column_max = column_max.max(scores_curr[row]);
                            }
                            tracker.observe(column_max, position);
                        }
                        AlignmentMode::EndToEnd => {
                            tracker.observe(scores_curr[rows], position);
                        }
                    }
                }

                std::mem::swap(&mut scores_prev, &mut scores_curr);
                std::mem::swap(&mut gaps_prev, &mut gaps_curr);
            }

            // Nodes with an empty sequence pass their merged column through.
            seeds.insert(*id, (scores_prev.clone(), gaps_prev.clone()));
        }

        tracker.finish(self.mode)
    }

    // Packs the reads into row vectors: lane `l` of row `r` is the numeric
    // code of base `r` of read `l`, or the padding value past the end.
    fn pack_reads(reads: &[String], rows: usize) -> Vec<ByteVec> {
        let mut packed = Vec::with_capacity(rows);
        for row in 0..rows {
            let mut lanes = [utils::BASE_PAD; LANES];
            for (lane, read) in reads.iter().enumerate() {
                let bytes = read.as_bytes();
                if row < bytes.len() {
                    lanes[lane] = utils::base_to_num(bytes[row]);
                }
            }
            packed.push(ByteVec::from_array(lanes));
        }
        packed
    }
}

//-----------------------------------------------------------------------------

// Tracks the best and second-best scores per lane. Scores are compared at
// column granularity, so several cells reaching the same score at one
// reference position count once.
struct LaneTracker {
    read_len: usize,
    max_score: [u8; LANES],
    max_pos: [usize; LANES],
    max_count: [usize; LANES],
    sub_score: [u8; LANES],
    sub_pos: [usize; LANES],
    sub_count: [usize; LANES],
}

impl LaneTracker {
    fn new(read_len: usize) -> Self {
        LaneTracker {
            read_len,
            max_score: [0; LANES],
            max_pos: [0; LANES],
            max_count: [0; LANES],
            sub_score: [0; LANES],
            sub_pos: [0; LANES],
            sub_count: [0; LANES],
        }
    }

    // Observes the column maximum for every lane at the given reference
    // position.
    fn observe(&mut self, column_max: ByteVec, position: usize) {
        let scores = column_max.to_array();
        for lane in 0..LANES {
            let score = scores[lane];
            if score == 0 {
                continue;
            }
            if score > self.max_score[lane] {
                // The old best becomes the second best if it is far enough
                // from the new one to be a distinct alignment.
                if self.max_count[lane] > 0 && Self::far_apart(self.max_pos[lane], position, self.read_len) {
                    self.sub_score[lane] = self.max_score[lane];
                    self.sub_pos[lane] = self.max_pos[lane];
                    self.sub_count[lane] = self.max_count[lane];
                }
                self.max_score[lane] = score;
                self.max_pos[lane] = position;
                self.max_count[lane] = 1;
            } else if score == self.max_score[lane] {
                if position != self.max_pos[lane] {
                    self.max_count[lane] += 1;
                }
            } else if Self::far_apart(self.max_pos[lane], position, self.read_len) {
                if score > self.sub_score[lane] {
                    self.sub_score[lane] = score;
                    self.sub_pos[lane] = position;
                    self.sub_count[lane] = 1;
                } else if score == self.sub_score[lane] && position != self.sub_pos[lane] {
                    self.sub_count[lane] += 1;
                }
            }
        }
    }

    fn far_apart(a: usize, b: usize, read_len: usize) -> bool {
        a.abs_diff(b) > read_len
    }

    // Produces the per-lane results, removing the end-to-end bias.
    fn finish(self, mode: AlignmentMode) -> Vec<AlignmentResult> {
        let mut results = Vec::with_capacity(LANES);
        for lane in 0..LANES {
            let (max_score, sub_score) = match mode {
                AlignmentMode::Local => (self.max_score[lane], self.sub_score[lane]),
                AlignmentMode::EndToEnd => (
                    self.max_score[lane].saturating_sub(ETE_BIAS),
                    self.sub_score[lane].saturating_sub(ETE_BIAS),
                ),
            };
            results.push(AlignmentResult {
                max_score,
                max_pos: self.max_pos[lane],
                max_count: self.max_count[lane],
                sub_score,
                sub_pos: self.sub_pos[lane],
                sub_count: self.sub_count[lane],
                correctness: 0,
            });
        }
        results
    }
}

//-----------------------------------------------------------------------------
