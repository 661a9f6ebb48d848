//! Stake ladder: maps the consecutive-loss count to the stake for the next
//! trade. Running off the end is the permanent end of the betting session,
//! decided here and nowhere else.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct LadderExhausted {
    pub losses: usize,
    pub len: usize,
}

impl fmt::Display for LadderExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ladder exhausted: {} consecutive losses against {} rungs",
            self.losses, self.len
        )
    }
}

impl std::error::Error for LadderExhausted {}

#[derive(Debug, Clone)]
pub struct Ladder {
    stakes: Vec<f64>,
}

impl Ladder {
    pub fn new(stakes: Vec<f64>) -> Self {
        assert!(!stakes.is_empty(), "ladder needs at least one rung");
        Self { stakes }
    }

    /// Stake for the given consecutive-loss count. `Err` is terminal: the
    /// caller must halt all further trading.
    pub fn stake_for(&self, consecutive_losses: usize) -> Result<f64, LadderExhausted> {
        self.stakes
            .get(consecutive_losses)
            .copied()
            .ok_or(LadderExhausted {
                losses: consecutive_losses,
                len: self.stakes.len(),
            })
    }

    /// Clamped lookup for status snapshots only. Never used to place a trade.
    pub fn display_stake(&self, consecutive_losses: usize) -> f64 {
        let idx = consecutive_losses.min(self.stakes.len() - 1);
        self.stakes[idx]
    }

    pub fn len(&self) -> usize {
        self.stakes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stakes.is_empty()
    }

    pub fn stakes(&self) -> &[f64] {
        &self.stakes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stake_for_every_valid_index() {
        let ladder = Ladder::new(vec![0.35, 0.60, 1.61]);
        assert_eq!(ladder.stake_for(0).unwrap(), 0.35);
        assert_eq!(ladder.stake_for(1).unwrap(), 0.60);
        assert_eq!(ladder.stake_for(2).unwrap(), 1.61);
    }

    #[test]
    fn test_stake_for_at_length_is_exhausted() {
        let ladder = Ladder::new(vec![1.0, 2.0, 5.0]);
        let err = ladder.stake_for(3).unwrap_err();
        assert_eq!(err, LadderExhausted { losses: 3, len: 3 });
        assert!(ladder.stake_for(10).is_err());
    }

    #[test]
    fn test_display_stake_clamps() {
        let ladder = Ladder::new(vec![1.0, 2.0, 5.0]);
        assert_eq!(ladder.display_stake(0), 1.0);
        assert_eq!(ladder.display_stake(2), 5.0);
        assert_eq!(ladder.display_stake(3), 5.0);
        assert_eq!(ladder.display_stake(99), 5.0);
    }

    #[test]
    #[should_panic]
    fn test_empty_ladder_rejected() {
        Ladder::new(Vec::new());
    }
}
