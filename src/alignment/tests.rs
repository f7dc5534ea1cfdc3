use super::*;

use crate::{Graph, Node, Population};
use crate::utils;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

//-----------------------------------------------------------------------------

// Test fixtures.

fn make_node(seq: &[u8], end: usize, reference: bool, af: f64, pop: &str) -> Node {
    let mut node = Node::new();
    node.set_sequence(seq);
    node.set_end(end);
    if reference {
        node.set_as_ref();
    }
    node.set_frequency(af);
    node.set_population(Population::from_string(pop).unwrap());
    node
}

// AAA -> { CCC (ref, AF 0.4), GGG (alt, AF 0.6) } -> TTT
fn diamond() -> Graph {
    let mut graph = Graph::new();
    let mut ids = Vec::new();
    ids.push(graph.add_node(make_node(b"AAA", 3, true, 1.0, "011")).unwrap());
    ids.push(graph.add_node(make_node(b"CCC", 6, true, 0.4, "001")).unwrap());
    ids.push(graph.add_node(make_node(b"GGG", 6, false, 0.6, "010")).unwrap());
    ids.push(graph.add_node(make_node(b"TTT", 9, true, 1.0, "011")).unwrap());
    graph.add_edge(ids[0], ids[1]).unwrap();
    graph.add_edge(ids[0], ids[2]).unwrap();
    graph.add_edge(ids[1], ids[3]).unwrap();
    graph.add_edge(ids[2], ids[3]).unwrap();
    graph.finalize().unwrap();
    graph
}

// A linear graph over the sequence, split into nodes of at most `chunk` bp.
fn linear_graph(sequence: &[u8], chunk: usize) -> Graph {
    let mut graph = Graph::new();
    let mut previous: Option<usize> = None;
    let mut offset = 0;
    while offset < sequence.len() {
        let end = sequence.len().min(offset + chunk);
        let id = graph.add_node(make_node(&sequence[offset..end], end, true, 1.0, "")).unwrap();
        if let Some(prev) = previous {
            graph.add_edge(prev, id).unwrap();
        }
        previous = Some(id);
        offset = end;
    }
    graph.finalize().unwrap();
    graph
}

fn local_aligner(read_len: usize) -> Aligner {
    Aligner::new(read_len, ScoreParams::default(), AlignmentMode::Local).unwrap()
}

fn random_sequence(rng: &mut StdRng, len: usize) -> Vec<u8> {
    const DNA: [u8; 4] = *b"ACGT";
    (0..len).map(|_| DNA[rng.gen_range(0..4)]).collect()
}

//-----------------------------------------------------------------------------

// A scalar Smith-Waterman reference implementation with the same affine gap
// model and column-granular bookkeeping as the vectorised aligner.
fn scalar_local_sw(read: &[u8], reference: &[u8], params: ScoreParams) -> (u8, usize, usize) {
    let read = utils::seq_to_nums(read);
    let reference = utils::seq_to_nums(reference);
    let rows = read.len();

    let mut scores_prev = vec![0i32; rows + 1];
    let mut gaps_prev = vec![0i32; rows + 1];
    let mut best: i32 = 0;
    let mut best_pos = 0;
    let mut best_count = 0;

    for (column, base) in reference.iter().enumerate() {
        let mut scores_curr = vec![0i32; rows + 1];
        let mut gaps_curr = vec![0i32; rows + 1];
        let mut insert = 0i32;
        let mut column_max = 0i32;
        for row in 1..=rows {
            let diag = if read[row - 1] == *base {
                scores_prev[row - 1] + params.match_score as i32
            } else {
                (scores_prev[row - 1] - params.mismatch as i32).max(0)
            };
            insert = (insert - params.gap_extend as i32)
                .max(scores_curr[row - 1] - params.gap_open as i32)
                .max(0);
            let delete = (gaps_prev[row] - params.gap_extend as i32)
                .max(scores_prev[row] - params.gap_open as i32)
                .max(0);
            gaps_curr[row] = delete;
            scores_curr[row] = diag.max(insert).max(delete);
            column_max = column_max.max(scores_curr[row]);
        }

        let position = column + 1;
        if column_max > 0 {
            if column_max > best {
                best = column_max;
                best_pos = position;
                best_count = 1;
            } else if column_max == best {
                best_count += 1;
            }
        }
        scores_prev = scores_curr;
        gaps_prev = gaps_curr;
    }

    (best as u8, best_pos, best_count)
}

//-----------------------------------------------------------------------------

#[test]
fn reference_path_read() {
    let graph = diamond();
    let aligner = local_aligner(9);
    let results = aligner.align(&[String::from("AAACCCTTT")], &[9], &graph).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].max_score, 18, "A fully matching read scores match * length");
    assert_eq!(results[0].max_pos, 9);
    assert_eq!(results[0].max_count, 1);
    assert_eq!(results[0].correctness, 2);
}

#[test]
fn alternate_path_read() {
    let graph = diamond();
    let aligner = local_aligner(9);
    let results = aligner.align(&[String::from("AAAGGGTTT")], &[9], &graph).unwrap();
    assert_eq!(results[0].max_score, 18, "The alternate allele path should score fully");
    assert_eq!(results[0].max_pos, 9);
    assert_eq!(results[0].correctness, 2);
}

#[test]
fn mismatching_read() {
    let graph = diamond();
    let aligner = local_aligner(9);
    // One mismatch in the middle of the variant site on either path.
    let results = aligner.align(&[String::from("AAACGCTTT")], &[9], &graph).unwrap();
    assert_eq!(results[0].max_score, 14, "One mismatch costs match + mismatch");
    assert_eq!(results[0].max_pos, 9);
}

#[test]
fn batch_in_input_order() {
    // More reads than the vector width, all resolved in input order.
    let graph = diamond();
    let aligner = local_aligner(9);
    let mut reads = Vec::new();
    let mut targets = Vec::new();
    for i in 0..(LANES + 5) {
        if i % 2 == 0 {
            reads.push(String::from("AAACCCTTT"));
        } else {
            reads.push(String::from("AAAGGGTTT"));
        }
        targets.push(9);
    }
    let results = aligner.align(&reads, &targets, &graph).unwrap();
    assert_eq!(results.len(), LANES + 5);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.max_score, 18, "Wrong score for read {}", i);
        assert_eq!(result.max_pos, 9, "Wrong position for read {}", i);
    }
}

#[test]
fn short_reads_are_padded() {
    let graph = diamond();
    let aligner = local_aligner(9);
    let reads = vec![String::from("AAACCCTTT"), String::from("CCCTTT"), String::from("AAA")];
    let targets = vec![9, 9, 3];
    let results = aligner.align(&reads, &targets, &graph).unwrap();
    assert_eq!(results[0].max_score, 18);
    assert_eq!(results[1].max_score, 12);
    assert_eq!(results[1].max_pos, 9);
    assert_eq!(results[2].max_score, 6);
    assert_eq!(results[2].max_pos, 3);
}

#[test]
fn linear_graph_equivalence() {
    // On a graph built from a linear sequence the aligner must agree with a
    // scalar Smith-Waterman over the same sequence, regardless of how the
    // sequence is split into nodes.
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let params = ScoreParams::default();
    for trial in 0..10 {
        let sequence = random_sequence(&mut rng, 60);
        for chunk in [7, 13, 60] {
            let graph = linear_graph(&sequence, chunk);
            let aligner = Aligner::new(12, params, AlignmentMode::Local).unwrap();

            let mut reads: Vec<String> = Vec::new();
            for _ in 0..8 {
                let len = rng.gen_range(8..=12);
                let start = rng.gen_range(0..sequence.len() - len);
                let mut read = sequence[start..start + len].to_vec();
                // Mutate one base half of the time.
                if rng.gen_bool(0.5) {
                    let offset = rng.gen_range(0..len);
                    read[offset] = b"ACGT"[rng.gen_range(0..4)];
                }
                reads.push(String::from_utf8(read).unwrap());
            }
            let targets = vec![0; reads.len()];

            let results = aligner.align(&reads, &targets, &graph).unwrap();
            for (read, result) in reads.iter().zip(results.iter()) {
                let (score, pos, count) = scalar_local_sw(read.as_bytes(), &sequence, params);
                assert_eq!(
                    result.max_score, score,
                    "Wrong score for read {} in trial {} with chunk {}", read, trial, chunk
                );
                assert_eq!(
                    result.max_pos, pos,
                    "Wrong position for read {} in trial {} with chunk {}", read, trial, chunk
                );
                assert_eq!(
                    result.max_count, count,
                    "Wrong count for read {} in trial {} with chunk {}", read, trial, chunk
                );
            }
        }
    }
}

#[test]
fn lane_shuffle_invariance() {
    // Shuffling the reads in a batch permutes the results identically.
    let mut rng = StdRng::seed_from_u64(42);
    let sequence = random_sequence(&mut rng, 80);
    let graph = linear_graph(&sequence, 11);
    let aligner = Aligner::new(10, ScoreParams::default(), AlignmentMode::Local).unwrap();

    let mut reads: Vec<String> = Vec::new();
    for _ in 0..LANES {
        let start = rng.gen_range(0..sequence.len() - 10);
        reads.push(String::from_utf8(sequence[start..start + 10].to_vec()).unwrap());
    }
    let targets = vec![0; reads.len()];
    let baseline = aligner.align(&reads, &targets, &graph).unwrap();

    let mut shuffled: Vec<(usize, String)> = reads.iter().cloned().enumerate().collect();
    shuffled.reverse();
    let shuffled_reads: Vec<String> = shuffled.iter().map(|(_, r)| r.clone()).collect();
    let shuffled_results = aligner.align(&shuffled_reads, &targets, &graph).unwrap();

    for (offset, (original, _)) in shuffled.iter().enumerate() {
        let mut expected = baseline[*original];
        expected.correctness = shuffled_results[offset].correctness;
        assert_eq!(
            shuffled_results[offset], expected,
            "Result for read {} changed with the lane assignment", original
        );
    }
}

#[test]
fn scoring_monotonicity() {
    // Raising the match score or lowering the mismatch penalty cannot
    // decrease the best score.
    let mut rng = StdRng::seed_from_u64(7);
    let sequence = random_sequence(&mut rng, 50);
    let graph = linear_graph(&sequence, 9);

    let mut reads: Vec<String> = Vec::new();
    for _ in 0..6 {
        let start = rng.gen_range(0..sequence.len() - 10);
        let mut read = sequence[start..start + 10].to_vec();
        let offset = rng.gen_range(0..10);
        read[offset] = b"ACGT"[rng.gen_range(0..4)];
        reads.push(String::from_utf8(read).unwrap());
    }
    let targets = vec![0; reads.len()];

    let base_params = ScoreParams::default();
    let better_match = ScoreParams { match_score: 3, ..base_params };
    let lower_mismatch = ScoreParams { mismatch: 1, ..base_params };

    let baseline = Aligner::new(10, base_params, AlignmentMode::Local).unwrap()
        .align(&reads, &targets, &graph).unwrap();
    for params in [better_match, lower_mismatch] {
        let improved = Aligner::new(10, params, AlignmentMode::Local).unwrap()
            .align(&reads, &targets, &graph).unwrap();
        for (i, (a, b)) in baseline.iter().zip(improved.iter()).enumerate() {
            assert!(
                b.max_score >= a.max_score,
                "Score of read {} decreased from {} to {}", i, a.max_score, b.max_score
            );
        }
    }
}

//-----------------------------------------------------------------------------

#[test]
fn tie_accounting() {
    // The read fits at four end positions within the run of As.
    let graph = linear_graph(b"AAAAAA", 6);
    let aligner = local_aligner(3);
    let results = aligner.align(&[String::from("AAA")], &[4], &graph).unwrap();
    assert_eq!(results[0].max_score, 6);
    assert_eq!(results[0].max_pos, 3, "The first best position is reported");
    assert_eq!(results[0].max_count, 4, "Each distinct end position counts once");
    assert_eq!(results[0].correctness, 1, "A tied best within the window flags 1");
}

#[test]
fn distant_ties_count() {
    // Two exact occurrences more than a read length apart.
    let graph = linear_graph(b"AAAACCCCCCCCCCCCCCCCAAAA", 24);
    let aligner = local_aligner(4);
    let results = aligner.align(&[String::from("AAAA")], &[4], &graph).unwrap();
    assert_eq!(results[0].max_score, 8);
    assert_eq!(results[0].max_pos, 4);
    assert_eq!(results[0].max_count, 2, "Both occurrences should count");
    assert_eq!(results[0].correctness, 1);
}

#[test]
fn sub_best_tracking() {
    // An exact occurrence early and a one-mismatch occurrence far away.
    let graph = linear_graph(b"AAAACCCCCCCCCCCCCCCCAATA", 24);
    let aligner = local_aligner(4);
    let results = aligner.align(&[String::from("AAAA")], &[4], &graph).unwrap();
    assert_eq!(results[0].max_score, 8);
    assert_eq!(results[0].max_pos, 4);
    assert_eq!(results[0].max_count, 1);
    assert_eq!(results[0].correctness, 2);
    assert_eq!(results[0].sub_score, 4, "The distant approximate match is the second best");
    assert_eq!(results[0].sub_pos, 22);
    assert_eq!(results[0].sub_count, 2, "Positions 22 and 24 tie for the second best");
}

#[test]
fn nearby_runner_up_is_suppressed() {
    // The second-best position must be more than a read length from the
    // best; the decaying tail around the best match does not count.
    let graph = linear_graph(b"GGGGAAAAGGGG", 12);
    let aligner = local_aligner(4);
    let results = aligner.align(&[String::from("AAAA")], &[8], &graph).unwrap();
    assert_eq!(results[0].max_score, 8);
    assert_eq!(results[0].max_pos, 8);
    assert_eq!(results[0].sub_count, 0, "No distant second best exists");
    assert_eq!(results[0].sub_score, 0);
}

#[test]
fn correctness_flag_windows() {
    let graph = linear_graph(b"ACGTACGTGGCCAATTACGT", 20);
    let mut aligner = local_aligner(6);
    aligner.set_tolerance(2);

    // GGCCAA ends at position 14.
    let read = String::from("GGCCAA");
    for (target, expected) in [(14, 2), (16, 2), (12, 2), (17, 0), (11, 0), (0, 0)] {
        let results = aligner.align(&[read.clone()], &[target], &graph).unwrap();
        assert_eq!(results[0].max_pos, 14);
        assert_eq!(
            results[0].correctness, expected,
            "Wrong flag for truth {} with tolerance 2", target
        );
    }
}

//-----------------------------------------------------------------------------

#[test]
fn end_to_end_at_sink() {
    let graph = linear_graph(b"ACGTACGTAA", 4);
    let aligner = Aligner::new(4, ScoreParams::default(), AlignmentMode::EndToEnd).unwrap();

    // The read matches the end of the sequence exactly.
    let results = aligner.align(&[String::from("GTAA")], &[10], &graph).unwrap();
    assert_eq!(results[0].max_score, 8, "A full match at the sink scores match * length");
    assert_eq!(results[0].max_pos, 10);
    assert_eq!(results[0].correctness, 2);
}

#[test]
fn end_to_end_ignores_interior() {
    let graph = linear_graph(b"ACGTACGTAA", 4);
    let aligner = Aligner::new(4, ScoreParams::default(), AlignmentMode::EndToEnd).unwrap();

    // The read matches the interior exactly, but candidates are taken only
    // in the sink node.
    let results = aligner.align(&[String::from("CGTA")], &[5], &graph).unwrap();
    assert!(results[0].max_score < 8, "Interior matches should not win in end-to-end mode");
    if results[0].max_count > 0 {
        assert!(results[0].max_pos >= 9, "Candidates exist only in the sink node");
    }
    assert_eq!(results[0].correctness, 0);
}

#[test]
fn end_to_end_diamond() {
    let graph = diamond();
    let aligner = Aligner::new(9, ScoreParams::default(), AlignmentMode::EndToEnd).unwrap();
    let results = aligner.align(
        &[String::from("AAACCCTTT"), String::from("AAAGGGTTT")],
        &[9, 9],
        &graph
    ).unwrap();
    assert_eq!(results[0].max_score, 18);
    assert_eq!(results[0].max_pos, 9);
    assert_eq!(results[1].max_score, 18);
    assert_eq!(results[1].max_pos, 9);
}

//-----------------------------------------------------------------------------

#[test]
fn configuration_errors() {
    // 128 * 2 overflows the u8 score range.
    assert!(
        Aligner::new(128, ScoreParams::default(), AlignmentMode::Local).is_err(),
        "Score overflow should be rejected"
    );
    assert!(
        Aligner::new(127, ScoreParams::default(), AlignmentMode::Local).is_ok(),
        "127 * 2 still fits in a u8"
    );
    assert!(
        Aligner::new(0, ScoreParams::default(), AlignmentMode::Local).is_err(),
        "Zero read length should be rejected"
    );
}

#[test]
fn read_length_errors() {
    let graph = diamond();
    let aligner = local_aligner(6);
    let result = aligner.align(&[String::from("AAACCCTTT")], &[9], &graph);
    assert!(result.is_err(), "Reads longer than the maximum should fail");
}

#[test]
fn unfinalized_graph_errors() {
    let mut graph = Graph::new();
    graph.add_node(make_node(b"AAA", 3, true, 1.0, "")).unwrap();
    let aligner = local_aligner(3);
    let result = aligner.align(&[String::from("AAA")], &[3], &graph);
    assert!(result.is_err(), "Aligning an unfinalized graph should fail");
}

#[test]
fn mismatched_targets_error() {
    let graph = diamond();
    let aligner = local_aligner(9);
    let result = aligner.align(&[String::from("AAACCCTTT")], &[], &graph);
    assert!(result.is_err(), "Read and target counts must match");
}

//-----------------------------------------------------------------------------
