//! A fixed-size population bitset.
//!
//! A [`Population`] marks a subset of the haplotypes in a cohort: bit `i` is
//! set if haplotype `i` is included. Variant nodes store one as their sample
//! membership, and subgraph filters are expressed as one. The bitset has a
//! compact text serialization of '0' and '1' characters, which is used in
//! graph definition files.

use std::fmt::{self, Display};

use simple_sds::raw_vector::{RawVector, AccessRaw, PushRaw};


//-----------------------------------------------------------------------------

/// A dense bitset over the haplotypes of a cohort.
///
/// All bitwise operations require operands of the same length. The complement
/// only flips bits within the declared length.
///
/// # Examples
///
/// ```
/// use vargraph::Population;
///
/// let mut pop = Population::with_len(6);
/// pop.set(1);
/// pop.set(4);
/// assert_eq!(pop.count(), 2);
/// assert_eq!(pop.to_string(), "010010");
///
/// let same = Population::from_string("010010").unwrap();
/// assert_eq!(same, pop);
///
/// let complement = pop.not();
/// assert_eq!(complement.to_string(), "101101");
/// assert_eq!(pop.and(&complement).unwrap().count(), 0);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Population {
    bits: RawVector,
}

impl Population {
    /// Creates an empty bitset of the given length.
    pub fn with_len(len: usize) -> Self {
        Population::filled(len, false)
    }

    /// Creates a bitset of the given length with every bit set.
    pub fn all_set(len: usize) -> Self {
        Population::filled(len, true)
    }

    fn filled(len: usize, value: bool) -> Self {
        let mut bits = RawVector::with_capacity(len);
        for _ in 0..len {
            bits.push_bit(value);
        }
        Population { bits }
    }

    /// Creates a bitset from an iterator of booleans.
    pub fn from_bits<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let mut bits = RawVector::new();
        for bit in iter {
            bits.push_bit(bit);
        }
        Population { bits }
    }

    /// Returns the number of bits in the set.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Returns `true` if the set has no bits.
    pub fn is_empty(&self) -> bool {
        self.bits.len() == 0
    }

    /// Returns the value of bit `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn get(&self, index: usize) -> bool {
        self.bits.bit(index)
    }

    /// Sets bit `index`.
    pub fn set(&mut self, index: usize) {
        self.bits.set_bit(index, true);
    }

    /// Clears bit `index`.
    pub fn clear(&mut self, index: usize) {
        self.bits.set_bit(index, false);
    }

    /// Clears every bit.
    pub fn clear_all(&mut self) {
        for i in 0..self.bits.len() {
            self.bits.set_bit(i, false);
        }
    }

    /// Returns the number of set bits.
    pub fn count(&self) -> usize {
        (0..self.bits.len()).filter(|i| self.bits.bit(*i)).count()
    }

    /// Returns `true` if this set and `other` have a common set bit.
    ///
    /// Returns an error if the lengths differ.
    pub fn intersects(&self, other: &Population) -> Result<bool, String> {
        self.check_len(other)?;
        for i in 0..self.len() {
            if self.bits.bit(i) && other.bits.bit(i) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Returns the bitwise AND of this set and `other`.
    ///
    /// Returns an error if the lengths differ.
    pub fn and(&self, other: &Population) -> Result<Population, String> {
        self.check_len(other)?;
        Ok(Population::from_bits((0..self.len()).map(|i| self.bits.bit(i) && other.bits.bit(i))))
    }

    /// Returns the bitwise OR of this set and `other`.
    ///
    /// Returns an error if the lengths differ.
    pub fn or(&self, other: &Population) -> Result<Population, String> {
        self.check_len(other)?;
        Ok(Population::from_bits((0..self.len()).map(|i| self.bits.bit(i) || other.bits.bit(i))))
    }

    /// Returns the bitwise XOR of this set and `other`.
    ///
    /// Returns an error if the lengths differ.
    pub fn xor(&self, other: &Population) -> Result<Population, String> {
        self.check_len(other)?;
        Ok(Population::from_bits((0..self.len()).map(|i| self.bits.bit(i) != other.bits.bit(i))))
    }

    /// Returns the complement of this set within its length.
    pub fn not(&self) -> Population {
        Population::from_bits((0..self.len()).map(|i| !self.bits.bit(i)))
    }

    /// Parses a bitset from a string of '0' and '1' characters.
    pub fn from_string(s: &str) -> Result<Population, String> {
        let mut bits = RawVector::with_capacity(s.len());
        for c in s.chars() {
            match c {
                '0' => bits.push_bit(false),
                '1' => bits.push_bit(true),
                _ => return Err(format!("Invalid character '{}' in population string", c)),
            }
        }
        Ok(Population { bits })
    }

    fn check_len(&self, other: &Population) -> Result<(), String> {
        if self.len() != other.len() {
            return Err(format!(
                "Population length mismatch: {} vs. {}", self.len(), other.len()
            ));
        }
        Ok(())
    }
}

impl Display for Population {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.len() {
            write!(f, "{}", if self.bits.bit(i) { '1' } else { '0' })?;
        }
        Ok(())
    }
}

//-----------------------------------------------------------------------------
