//! UCB1 bandit over a fixed set of split points.
//!
//! The state is never mutated in place: every pull produces a new
//! `BanditState`, the caller holds the single reference to the current one.

use std::num::NonZeroUsize;

use serde::Serialize;

/// Pull statistics of a single arm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Arm {
    /// Times this arm was pulled.
    pub count: u64,
    /// Cumulative reward obtained from this arm.
    pub value: f64,
}

impl Arm {
    /// The average reward, zero for an arm never pulled.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.value / self.count as f64
        }
    }
}

/// The state of the whole bandit.
///
/// Invariant: `total_pulls` equals the sum of every arm's `count`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditState {
    arms: Vec<Arm>,
    total_pulls: u64,
}

impl BanditState {
    /// Creates a bandit with `arm_count` untouched arms.
    ///
    /// # Arguments
    /// * `arm_count` - The amount of candidates.
    pub fn new(arm_count: NonZeroUsize) -> Self {
        Self {
            arms: vec![Arm::default(); arm_count.get()],
            total_pulls: 0,
        }
    }

    pub fn arms(&self) -> &[Arm] {
        &self.arms
    }

    pub fn total_pulls(&self) -> u64 {
        self.total_pulls
    }

    /// Chooses the next arm to pull.
    ///
    /// Every arm is pulled once, in order, before any is scored. After that
    /// the arm maximizing `mean + sqrt(2 ln(total) / count)` wins, ties going
    /// to the lowest index.
    ///
    /// # Returns
    /// The selected arm's index.
    pub fn select_arm(&self) -> usize {
        if let Some(unpulled) = self.arms.iter().position(|arm| arm.count == 0) {
            return unpulled;
        }

        let ln_total = (self.total_pulls as f64).ln();
        let mut best = 0;
        let mut best_score = f64::NEG_INFINITY;

        for (i, arm) in self.arms.iter().enumerate() {
            let count = arm.count as f64;
            let score = arm.value / count + (2.0 * ln_total / count).sqrt();

            if score > best_score {
                best = i;
                best_score = score;
            }
        }

        best
    }

    /// Records a pull of `arm` that yielded `reward`.
    ///
    /// # Arguments
    /// * `arm` - The pulled arm's index.
    /// * `reward` - The reward obtained, larger is better.
    ///
    /// # Returns
    /// The next state, `self` is left untouched.
    ///
    /// # Panics
    /// If `arm` is out of bounds.
    pub fn update(&self, arm: usize, reward: f64) -> Self {
        let mut arms = self.arms.clone();
        let pulled = arms[arm];
        arms[arm] = Arm {
            count: pulled.count + 1,
            value: pulled.value + reward,
        };

        Self {
            arms,
            total_pulls: self.total_pulls + 1,
        }
    }
}
