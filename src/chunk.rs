use std::collections::BTreeSet;
use std::fmt::Display;

use rand::{
    rngs::StdRng,
    seq::{index, SliceRandom},
    Rng, SeedableRng,
};

use crate::{
    error::ScanError,
    port::{self, FIRST_CLASS_PORTS, HIGHEST_PORT, SECOND_CLASS_PORTS},
};

pub const CHUNK_SIZE_LOWER_LIMIT: i64 = 10;
pub const CHUNK_SIZE_UPPER_LIMIT: i64 = 20;

#[inline]
fn bounds_are_valid(lower: i64, upper: i64) -> bool {
    0 <= lower && lower <= upper
}

/// Set of unique ports that only ever shrinks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortPool {
    ports: BTreeSet<u16>,
}

impl PortPool {
    #[inline]
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    #[inline]
    pub fn contains(&self, port: u16) -> bool {
        self.ports.contains(&port)
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports.iter().copied()
    }

    /// Removes `port`, failing if it isn't there anymore.
    pub fn remove(&mut self, port: u16) -> Result<(), ScanError> {
        if self.ports.remove(&port) {
            Ok(())
        } else {
            Err(ScanError::PortRemoval(port))
        }
    }

    /// Takes `min(n, len)` random ports out of the pool and returns them in
    /// random order. Negative sizes draw nothing.
    pub fn draw<R: Rng + ?Sized>(&mut self, n: i64, rng: &mut R) -> Result<Vec<u16>, ScanError> {
        let size = (n.max(0) as usize).min(self.len());
        if size == 0 {
            return Ok(Vec::new());
        }

        let candidates: Vec<u16> = self.iter().collect();
        let drawing: Vec<u16> = index::sample(rng, candidates.len(), size)
            .into_iter()
            .map(|i| candidates[i])
            .collect();

        for &port in &drawing {
            self.remove(port)?;
        }

        Ok(drawing)
    }

    /// Moves every port listed in `table` into a new pool.
    fn split_off(&mut self, table: &[u16]) -> PortPool {
        let taken: BTreeSet<u16> = table
            .iter()
            .copied()
            .filter(|port| self.ports.remove(port))
            .collect();

        PortPool { ports: taken }
    }
}

impl FromIterator<u16> for PortPool {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        Self {
            ports: iter.into_iter().collect(),
        }
    }
}

/// Drops anything outside `1..=highest` and de-duplicates the rest.
pub fn validate<I>(ports: I, highest: u16) -> PortPool
where
    I: IntoIterator<Item = i64>,
{
    ports
        .into_iter()
        .filter(|&p| port::is_valid(p, highest))
        .map(|p| p as u16)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    FirstClass,
    SecondClass,
    Main,
}

impl Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Tier::FirstClass => "first class",
                Tier::SecondClass => "second class",
                Tier::Main => "main",
            }
        )
    }
}

/// Hands out the ports of a scan in batches.
///
/// The validated ports are split into three disjoint pools. The first class
/// pool is drained first in batches of its own, then the second class pool is
/// mixed with the main pool, and finally the main pool alone is drained in
/// randomly sized batches. A port is handed out at most once per chunker.
#[derive(Debug)]
pub struct Chunker<R = StdRng> {
    first_class: PortPool,
    second_class: PortPool,
    main: PortPool,
    rng: R,
}

impl Chunker<StdRng> {
    pub fn new<I>(ports: I) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        Self::with_rng(ports, StdRng::from_entropy())
    }
}

impl<R: Rng> Chunker<R> {
    pub fn with_rng<I>(ports: I, rng: R) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        Self::with_limit(ports, HIGHEST_PORT, rng)
    }

    pub fn with_limit<I>(ports: I, highest: u16, rng: R) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        let mut main = validate(ports, highest);
        let first_class = main.split_off(&FIRST_CLASS_PORTS);
        let second_class = main.split_off(&SECOND_CLASS_PORTS);

        log::debug!(
            "Chunker pools: {} first class, {} second class, {} main",
            first_class.len(),
            second_class.len(),
            main.len()
        );

        Self {
            first_class,
            second_class,
            main,
            rng,
        }
    }

    #[inline]
    pub fn first_class(&self) -> &PortPool {
        &self.first_class
    }

    #[inline]
    pub fn second_class(&self) -> &PortPool {
        &self.second_class
    }

    #[inline]
    pub fn main(&self) -> &PortPool {
        &self.main
    }

    /// Ports not handed out yet.
    pub fn remaining(&self) -> usize {
        self.first_class.len() + self.second_class.len() + self.main.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Returns the next batch of ports, or `None` once every pool is empty.
    ///
    /// `lower` caps first and second class batches. Second class batches take
    /// `ceil(lower / 2)` ports from the second class pool and fill up to
    /// `lower` from the main pool. Main pool batches have a random size in
    /// `lower..=upper`. Tier batch sizes are raised to at least one so a zero
    /// lower bound still drains the pools.
    pub fn get_chunk(&mut self, lower: i64, upper: i64) -> Result<Option<Vec<u16>>, ScanError> {
        if !bounds_are_valid(lower, upper) {
            return Err(ScanError::ChunkBounds { lower, upper });
        }

        let tier_size = lower.max(1);

        let (tier, chunk) = if !self.first_class.is_empty() {
            let chunk = self.first_class.draw(tier_size, &mut self.rng)?;
            (Tier::FirstClass, chunk)
        } else if !self.second_class.is_empty() {
            let mut chunk = self
                .second_class
                .draw(second_class_share(tier_size), &mut self.rng)?;
            let fill = tier_size - chunk.len() as i64;
            chunk.extend(self.main.draw(fill, &mut self.rng)?);
            chunk.shuffle(&mut self.rng);
            (Tier::SecondClass, chunk)
        } else if !self.main.is_empty() {
            let size = self.rng.gen_range(lower..=upper).max(1);
            let chunk = self.main.draw(size, &mut self.rng)?;
            (Tier::Main, chunk)
        } else {
            log::debug!("Chunker exhausted");
            return Ok(None);
        };

        log::debug!(
            "Drew {} ports from the {} pool ({} left)",
            chunk.len(),
            tier,
            self.remaining()
        );

        Ok(Some(chunk))
    }
}

#[inline]
fn second_class_share(size: i64) -> i64 {
    (size + 1) / 2
}
