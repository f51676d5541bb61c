//! Tabular Q-learning for grid navigation with checkpoints
//!
//! An agent learns to reach the goal cell of a text-defined grid without
//! straying more than `max_distance` steps from the last checkpoint it
//! visited. After training, the greedy policy is read back out for every
//! open cell and every remaining distance.

pub mod agent;
pub mod config;
pub mod environment;
pub mod error;
pub mod observer;
pub mod policy;
pub mod rl;

pub use agent::{Agent, EpisodeStatus, EpisodeSummary, Rewards, TrainingReport, Transition};
pub use config::TrainingConfig;
pub use environment::{BoundaryMode, Cell, Grid, Movement, Point, State};
pub use error::{Error, Result};
pub use observer::{HistoryObserver, TracingObserver, TrainingObserver};
pub use policy::{extract_policy, save_policy, write_policy, PolicyEntry};
pub use rl::{EpsilonGreedy, ExplorationStrategy, QTable};
