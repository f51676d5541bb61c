//! Run configuration

use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::agent::{Agent, DEFAULT_RESET_ATTEMPTS};
use crate::environment::{BoundaryMode, Grid};
use crate::error::{Error, Result};
use crate::rl::{EpsilonGreedy, QTable};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Learning rate α
    pub alpha: f64,
    /// Discount factor γ
    pub gamma: f64,
    /// Exploration rate ε
    pub epsilon: f64,
    pub episodes: usize,
    /// Random seed for reproducibility
    pub seed: Option<u64>,
    pub boundary: BoundaryMode,
    pub max_reset_attempts: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            gamma: 0.9,
            epsilon: 0.1,
            episodes: 1000,
            seed: None,
            boundary: BoundaryMode::Legacy,
            max_reset_attempts: DEFAULT_RESET_ATTEMPTS,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("alpha", self.alpha), ("gamma", self.gamma), ("epsilon", self.epsilon)] {
            if !value.is_finite() {
                return Err(Error::InvalidConfiguration {
                    message: format!("{} must be finite, got {}", name, value),
                });
            }
        }
        if !(0.0..=1.0).contains(&self.epsilon) {
            return Err(Error::InvalidConfiguration {
                message: format!("epsilon must be in [0, 1], got {}", self.epsilon),
            });
        }
        if self.max_reset_attempts == 0 {
            return Err(Error::InvalidConfiguration {
                message: "max_reset_attempts must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Names of learning parameters outside the conventional (0, 1] range.
    pub fn unconventional_parameters(&self) -> Vec<&'static str> {
        let in_range = |v: f64| v > 0.0 && v <= 1.0;
        let mut names = Vec::new();
        if !in_range(self.alpha) {
            names.push("alpha");
        }
        if !in_range(self.gamma) {
            names.push("gamma");
        }
        names
    }

    /// Seeds the agent's reset RNG with `seed` and the strategy with `seed + 1`.
    pub fn build_agent(&self, grid: Grid) -> Result<Agent<EpsilonGreedy>> {
        self.validate()?;
        let (agent_rng, strategy_rng) = match self.seed {
            Some(seed) => (
                StdRng::seed_from_u64(seed),
                StdRng::seed_from_u64(seed.wrapping_add(1)),
            ),
            None => (StdRng::from_entropy(), StdRng::from_entropy()),
        };
        let grid = grid.with_boundary(self.boundary);
        let agent = Agent::new(
            grid,
            QTable::new(self.alpha, self.gamma),
            EpsilonGreedy::new(self.epsilon, strategy_rng),
            agent_rng,
        )
        .with_max_reset_attempts(self.max_reset_attempts);
        Ok(agent)
    }
}
