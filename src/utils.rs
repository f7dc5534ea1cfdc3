//! Utility functions: file access and the sequence codec.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::io::{BufRead, BufReader, Read};

use flate2::read::MultiGzDecoder;


//-----------------------------------------------------------------------------

// Utilities for working with files.

/// Returns `true` if the file exists.
pub fn file_exists<P: AsRef<Path>>(filename: P) -> bool {
    fs::metadata(filename).is_ok()
}

/// Returns `true` if the file appears to be gzip-compressed.
pub fn is_gzipped<P: AsRef<Path>>(filename: P) -> bool {
    let file = File::open(filename).ok();
    if file.is_none() {
        return false;
    }
    let mut reader = BufReader::new(file.unwrap());
    let mut magic = [0; 2];
    let len = reader.read(&mut magic).ok();
    len == Some(2) && magic == [0x1F, 0x8B]
}

/// Returns a buffered reader for the file, which may be gzip-compressed.
pub fn open_file<P: AsRef<Path>>(filename: P) -> Result<Box<dyn BufRead>, String> {
    let file = File::open(&filename).map_err(|x| x.to_string())?;
    let inner = BufReader::new(file);
    if is_gzipped(&filename) {
        let inner = MultiGzDecoder::new(inner);
        Ok(Box::new(BufReader::new(inner)))
    } else {
        Ok(Box::new(inner))
    }
}

/// Returns a file name in the temporary directory that is unlikely to collide.
///
/// The name combines the given prefix with the process id and a counter.
pub fn temp_file_name(prefix: &str) -> PathBuf {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let count = COUNTER.fetch_add(1, Ordering::SeqCst);
    let mut buf = std::env::temp_dir();
    buf.push(format!("{}_{}_{}", prefix, std::process::id(), count));
    buf
}

//-----------------------------------------------------------------------------

// Sequence encoding and decoding.
//
// Bases are stored as small integers so that the aligner can compare a read
// base to a node base with a single byte comparison.

/// Numeric code for `A`.
pub const BASE_A: u8 = 0;
/// Numeric code for `C`.
pub const BASE_C: u8 = 1;
/// Numeric code for `G`.
pub const BASE_G: u8 = 2;
/// Numeric code for `T`.
pub const BASE_T: u8 = 3;
/// Numeric code for `N`. Every base outside `acgtACGT` maps to this.
pub const BASE_N: u8 = 4;

/// Padding value used by the aligner for positions past the end of a read.
///
/// The value is outside the base alphabet, so it never compares equal to a
/// node base.
pub const BASE_PAD: u8 = 5;

const DECODE: [u8; 5] = [b'A', b'C', b'G', b'T', b'N'];

const fn generate_encoding() -> [u8; 256] {
    let mut result = [BASE_N; 256];
    result[b'a' as usize] = BASE_A; result[b'A' as usize] = BASE_A;
    result[b'c' as usize] = BASE_C; result[b'C' as usize] = BASE_C;
    result[b'g' as usize] = BASE_G; result[b'G' as usize] = BASE_G;
    result[b't' as usize] = BASE_T; result[b'T' as usize] = BASE_T;
    result
}

const ENCODE: [u8; 256] = generate_encoding();

/// Converts a single character to its numeric code.
#[inline]
pub fn base_to_num(c: u8) -> u8 {
    ENCODE[c as usize]
}

/// Converts a numeric code back to an upper-case character.
#[inline]
pub fn num_to_base(num: u8) -> u8 {
    if (num as usize) < DECODE.len() { DECODE[num as usize] } else { b'N' }
}

/// Encodes a DNA string numerically, one byte per base.
///
/// The conversion is case-insensitive, and every character outside
/// `acgtACGT` becomes [`BASE_N`]. See [`nums_to_seq`] for decoding.
pub fn seq_to_nums(seq: &[u8]) -> Vec<u8> {
    seq.iter().map(|c| base_to_num(*c)).collect()
}

/// Decodes a numeric sequence into an upper-case DNA string.
pub fn nums_to_seq(nums: &[u8]) -> String {
    let bytes: Vec<u8> = nums.iter().map(|n| num_to_base(*n)).collect();
    String::from_utf8(bytes).unwrap_or_default()
}

//-----------------------------------------------------------------------------
