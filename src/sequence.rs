//! Pre-drawn bet direction sequence with a cursor. The sequence is replaced
//! wholesale on regeneration, never mutated element-wise.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Wire symbol used in sequence broadcasts.
    pub fn symbol(&self) -> &'static str {
        match self {
            Direction::Up => "R",
            Direction::Down => "G",
        }
    }

    /// Contract type sent upstream. Up maps to PUT and Down to CALL; the
    /// mapping is part of the observable contract and must not be flipped.
    pub fn contract_type(&self) -> &'static str {
        match self {
            Direction::Up => "PUT",
            Direction::Down => "CALL",
        }
    }
}

pub struct SequencePlanner {
    len: usize,
    sequence: Vec<Direction>,
    cursor: usize,
    generation: u64,
    rng: StdRng,
}

impl SequencePlanner {
    pub fn new(len: usize) -> Self {
        Self::from_rng(len, StdRng::from_entropy())
    }

    pub fn with_seed(len: usize, seed: u64) -> Self {
        Self::from_rng(len, StdRng::seed_from_u64(seed))
    }

    fn from_rng(len: usize, rng: StdRng) -> Self {
        assert!(len > 0, "sequence length must be positive");
        let mut planner = Self {
            len,
            sequence: Vec::new(),
            cursor: 0,
            generation: 0,
            rng,
        };
        planner.regenerate();
        planner.generation = 0;
        planner
    }

    /// Draw a fresh uniform sequence and reset the cursor.
    pub fn regenerate(&mut self) {
        self.sequence = (0..self.len)
            .map(|_| {
                if self.rng.gen_bool(0.5) {
                    Direction::Up
                } else {
                    Direction::Down
                }
            })
            .collect();
        self.cursor = 0;
        self.generation += 1;
    }

    /// Direction at the cursor, advancing it. Regenerates transparently when
    /// the cursor has run off the end, so the read is always in range.
    pub fn next(&mut self) -> Direction {
        if self.is_exhausted() {
            self.regenerate();
        }
        let dir = self.sequence[self.cursor];
        self.cursor += 1;
        dir
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.sequence.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Bumped on every regeneration; lets the caller notice an implicit one.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn sequence(&self) -> &[Direction] {
        &self.sequence
    }

    pub fn symbols(&self) -> Vec<String> {
        self.sequence.iter().map(|d| d.symbol().to_string()).collect()
    }
}
