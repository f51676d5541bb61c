use std::collections::HashSet;

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::environment::{Cell, Grid, Movement, Point, State};
use crate::error::{Error, Result};
use crate::observer::TrainingObserver;
use crate::rl::{EpsilonGreedy, ExplorationStrategy, QTable};

pub const DEFAULT_RESET_ATTEMPTS: usize = 10_000;

/// Reward for each kind of step, checked in field order.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rewards {
    pub wall: f64,
    pub lost: f64,
    pub checkpoint: f64,
    pub goal: f64,
    pub default: f64,
}

impl Default for Rewards {
    fn default() -> Self {
        Self {
            wall: -10.0,
            lost: -10.0,
            checkpoint: 1.0,
            goal: 10.0,
            default: -1.0,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeStatus {
    Running,
    Lost,
    Goal,
}

impl EpisodeStatus {
    pub fn is_terminal(self) -> bool {
        self != EpisodeStatus::Running
    }
}

/// One agent-environment interaction, including the value update it caused.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: State,
    pub action: Movement,
    pub reward: f64,
    pub next_state: State,
    pub old_value: f64,
    pub new_value: f64,
    pub status: EpisodeStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub episode: usize,
    pub start_x: i32,
    pub start_y: i32,
    pub steps: usize,
    pub total_reward: f64,
    pub outcome: EpisodeStatus,
}

impl EpisodeSummary {
    fn new(episode: usize, start: Point) -> Self {
        Self {
            episode,
            start_x: start.x,
            start_y: start.y,
            steps: 0,
            total_reward: 0.0,
            outcome: EpisodeStatus::Running,
        }
    }

    fn record(&mut self, transition: &Transition) {
        self.steps += 1;
        self.total_reward += transition.reward;
        self.outcome = transition.status;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingReport {
    pub episodes: usize,
    pub goals: usize,
    pub losses: usize,
    pub total_steps: usize,
    pub total_reward: f64,
}

impl TrainingReport {
    fn record(&mut self, summary: &EpisodeSummary) {
        self.episodes += 1;
        match summary.outcome {
            EpisodeStatus::Goal => self.goals += 1,
            EpisodeStatus::Lost => self.losses += 1,
            EpisodeStatus::Running => {}
        }
        self.total_steps += summary.steps;
        self.total_reward += summary.total_reward;
    }

    pub fn mean_reward(&self) -> f64 {
        if self.episodes == 0 {
            0.0
        } else {
            self.total_reward / self.episodes as f64
        }
    }
}

/// Learns a policy for one grid by Q-learning.
///
/// The agent owns the grid, the value table and the exploration strategy.
/// Episodes start on a random open cell and end when the goal is reached or
/// the agent wanders more than `max_distance` steps from its last checkpoint.
pub struct Agent<S = EpsilonGreedy> {
    grid: Grid,
    q_table: QTable,
    strategy: S,
    rng: StdRng,
    rewards: Rewards,
    max_reset_attempts: usize,
    starts: HashSet<Point>,
    state: Option<State>,
    status: EpisodeStatus,
}

impl<S: ExplorationStrategy> Agent<S> {
    pub fn new(grid: Grid, q_table: QTable, strategy: S, rng: StdRng) -> Self {
        let starts = grid.start_cells();
        Self {
            grid,
            q_table,
            strategy,
            rng,
            rewards: Rewards::default(),
            max_reset_attempts: DEFAULT_RESET_ATTEMPTS,
            starts,
            state: None,
            status: EpisodeStatus::Running,
        }
    }

    pub fn with_rewards(mut self, rewards: Rewards) -> Self {
        self.rewards = rewards;
        self
    }

    pub fn with_max_reset_attempts(mut self, attempts: usize) -> Self {
        self.max_reset_attempts = attempts;
        self
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn q_table(&self) -> &QTable {
        &self.q_table
    }

    pub fn state(&self) -> Option<State> {
        self.state
    }

    pub fn status(&self) -> EpisodeStatus {
        self.status
    }

    /// Starts an episode on a uniformly drawn cell that is neither a wall
    /// nor the goal, skipping cells from which no episode can ever end.
    pub fn reset(&mut self) -> Result<State> {
        let (height, width) = self.grid.size();
        for _ in 0..self.max_reset_attempts {
            let x = self.rng.gen_range(0..height) as i32;
            let y = self.rng.gen_range(0..width) as i32;
            let location = Point::new(x, y);
            if self.starts.contains(&location) {
                return Ok(self.begin(location));
            }
        }
        self.state = None;
        Err(Error::NoStartCell {
            attempts: self.max_reset_attempts,
        })
    }

    /// Starts an episode at a chosen cell.
    pub fn reset_to(&mut self, location: Point) -> Result<State> {
        if !self.starts.contains(&location) {
            return Err(Error::InvalidStart {
                x: location.x,
                y: location.y,
            });
        }
        Ok(self.begin(location))
    }

    fn begin(&mut self, location: Point) -> State {
        let state = State::new(location, 0);
        self.state = Some(state);
        self.status = EpisodeStatus::Running;
        state
    }

    /// Lets the strategy pick an action and applies it.
    pub fn step(&mut self) -> Result<Transition> {
        let state = self.running_state()?;
        let action = self.strategy.choose(&state, &mut self.q_table);
        self.apply(state, action)
    }

    /// Applies `action` instead of asking the strategy. Learning still happens.
    pub fn act(&mut self, action: Movement) -> Result<Transition> {
        let state = self.running_state()?;
        self.apply(state, action)
    }

    fn running_state(&self) -> Result<State> {
        match self.state {
            Some(state) if self.status == EpisodeStatus::Running => Ok(state),
            _ => Err(Error::EpisodeNotRunning),
        }
    }

    fn apply(&mut self, state: State, action: Movement) -> Result<Transition> {
        let next_state = self.grid.step(&state, action);
        let reward = self.reward(&state, &next_state);
        let (old_value, new_value) = self.q_table.update(&state, action, reward, &next_state);

        self.state = Some(next_state);
        self.status = if next_state.moves > self.grid.max_distance() {
            EpisodeStatus::Lost
        } else if self.grid.is_goal(next_state.location) {
            EpisodeStatus::Goal
        } else {
            EpisodeStatus::Running
        };

        Ok(Transition {
            state,
            action,
            reward,
            next_state,
            old_value,
            new_value,
            status: self.status,
        })
    }

    fn reward(&self, state: &State, next_state: &State) -> f64 {
        if state.location == next_state.location {
            return self.rewards.wall;
        }
        if next_state.moves > self.grid.max_distance() {
            return self.rewards.lost;
        }
        match self.grid.cell(next_state.location) {
            Some(Cell::Checkpoint) => self.rewards.checkpoint,
            Some(Cell::Goal) => self.rewards.goal,
            _ => self.rewards.default,
        }
    }

    pub fn train(&mut self, episodes: usize) -> Result<TrainingReport> {
        self.train_with(episodes, &mut ())
    }

    /// Runs `episodes` episodes back to back, reporting to `observer`.
    pub fn train_with<O>(&mut self, episodes: usize, observer: &mut O) -> Result<TrainingReport>
    where
        O: TrainingObserver + ?Sized,
    {
        observer.on_training_start(episodes)?;
        let mut report = TrainingReport::default();

        for episode in 0..episodes {
            let start = self.reset()?;
            observer.on_episode_start(episode, &start)?;

            let mut summary = EpisodeSummary::new(episode, start.location);
            loop {
                let transition = self.step()?;
                observer.on_step(episode, summary.steps, &transition)?;
                summary.record(&transition);
                if transition.status.is_terminal() {
                    break;
                }
            }

            observer.on_episode_end(&summary)?;
            report.record(&summary);
        }

        observer.on_training_end(&report)?;
        Ok(report)
    }
}
