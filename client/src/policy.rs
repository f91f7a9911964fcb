use std::{fmt, num::NonZeroUsize, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    OffloadError,
    bandit::BanditState,
    record::LogRecord,
};

/// Where the model is cut between the device and the remote worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitPoint {
    /// Everything runs on the device.
    NoOffload,
    /// The raw input is sent to the remote worker.
    FullOffload,
    /// The device runs up to this layer and sends its output.
    Layer(String),
}

impl SplitPoint {
    /// Whether this split needs the connection.
    pub fn offloads(&self) -> bool {
        !matches!(self, Self::NoOffload)
    }
}

impl FromStr for SplitPoint {
    type Err = OffloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err(OffloadError::Configuration("empty split point name".into())),
            "no_offload" => Ok(Self::NoOffload),
            "full_offload" => Ok(Self::FullOffload),
            layer => Ok(Self::Layer(layer.to_string())),
        }
    }
}

impl fmt::Display for SplitPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoOffload => write!(f, "no_offload"),
            Self::FullOffload => write!(f, "full_offload"),
            Self::Layer(name) => write!(f, "{name}"),
        }
    }
}

/// Turns a finished measurement into a bandit reward, larger is better.
pub type RewardFn = fn(&LogRecord) -> f64;

/// The default reward, the end-to-end latency in seconds, negated.
pub fn negative_latency(record: &LogRecord) -> f64 {
    -record.total_time_ms() / 1000.0
}

/// A split chosen for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// The bandit arm behind this choice, if any.
    pub arm: Option<usize>,
    pub split: SplitPoint,
}

/// How the split point is chosen every tick.
#[derive(Debug, Clone)]
pub enum SplitPolicy {
    /// Always the same split point.
    Fixed(SplitPoint),
    /// A UCB1 bandit over a set of candidates.
    Adaptive {
        candidates: Vec<SplitPoint>,
        state: BanditState,
        reward: RewardFn,
    },
}

impl SplitPolicy {
    /// Creates an adaptive policy using the default reward.
    ///
    /// # Arguments
    /// * `candidates` - The split points to choose among, in arm order.
    ///
    /// # Returns
    /// The policy, or a configuration error when there are no candidates.
    pub fn adaptive(candidates: Vec<SplitPoint>) -> crate::Result<Self> {
        Self::adaptive_with_reward(candidates, negative_latency)
    }

    /// Creates an adaptive policy rewarding measurements with `reward`.
    pub fn adaptive_with_reward(
        candidates: Vec<SplitPoint>,
        reward: RewardFn,
    ) -> crate::Result<Self> {
        let arms = NonZeroUsize::new(candidates.len()).ok_or_else(|| {
            OffloadError::Configuration("adaptive policy needs at least one candidate".into())
        })?;

        Ok(Self::Adaptive {
            candidates,
            state: BanditState::new(arms),
            reward,
        })
    }

    /// Picks the split point for the next tick.
    pub fn select(&self) -> Selection {
        match self {
            Self::Fixed(split) => Selection {
                arm: None,
                split: split.clone(),
            },
            Self::Adaptive {
                candidates, state, ..
            } => {
                let arm = state.select_arm();
                Selection {
                    arm: Some(arm),
                    split: candidates[arm].clone(),
                }
            }
        }
    }

    /// Feeds a finished measurement back into the policy.
    ///
    /// # Arguments
    /// * `arm` - The arm returned by `select` for this measurement.
    /// * `record` - The measurement.
    pub fn record(&mut self, arm: Option<usize>, record: &LogRecord) {
        let (Self::Adaptive { state, reward, .. }, Some(arm)) = (self, arm) else {
            return;
        };

        let value = reward(record);
        *state = state.update(arm, value);
        log::debug!(arm = arm, reward = value; "bandit updated");
    }

    /// The bandit state, for adaptive policies.
    pub fn bandit(&self) -> Option<&BanditState> {
        match self {
            Self::Fixed(_) => None,
            Self::Adaptive { state, .. } => Some(state),
        }
    }

    /// Whether any split point of this policy needs the connection.
    pub fn may_offload(&self) -> bool {
        match self {
            Self::Fixed(split) => split.offloads(),
            Self::Adaptive { candidates, .. } => candidates.iter().any(SplitPoint::offloads),
        }
    }
}
