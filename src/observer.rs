//! Training events
//!
//! The training loop reports what it does through [`TrainingObserver`]
//! instead of logging directly. Every method has a no-op default, and `()`
//! is the observer that ignores everything.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use tracing::{debug, info, trace};

use crate::agent::{EpisodeSummary, TrainingReport, Transition};
use crate::environment::State;
use crate::error::{Error, Result};

pub trait TrainingObserver {
    fn on_training_start(&mut self, _episodes: usize) -> Result<()> {
        Ok(())
    }

    fn on_episode_start(&mut self, _episode: usize, _start: &State) -> Result<()> {
        Ok(())
    }

    /// Called after the value update of every step, including the last one.
    fn on_step(&mut self, _episode: usize, _step: usize, _transition: &Transition) -> Result<()> {
        Ok(())
    }

    fn on_episode_end(&mut self, _summary: &EpisodeSummary) -> Result<()> {
        Ok(())
    }

    fn on_training_end(&mut self, _report: &TrainingReport) -> Result<()> {
        Ok(())
    }
}

impl TrainingObserver for () {}

impl<A: TrainingObserver, B: TrainingObserver> TrainingObserver for (A, B) {
    fn on_training_start(&mut self, episodes: usize) -> Result<()> {
        self.0.on_training_start(episodes)?;
        self.1.on_training_start(episodes)
    }

    fn on_episode_start(&mut self, episode: usize, start: &State) -> Result<()> {
        self.0.on_episode_start(episode, start)?;
        self.1.on_episode_start(episode, start)
    }

    fn on_step(&mut self, episode: usize, step: usize, transition: &Transition) -> Result<()> {
        self.0.on_step(episode, step, transition)?;
        self.1.on_step(episode, step, transition)
    }

    fn on_episode_end(&mut self, summary: &EpisodeSummary) -> Result<()> {
        self.0.on_episode_end(summary)?;
        self.1.on_episode_end(summary)
    }

    fn on_training_end(&mut self, report: &TrainingReport) -> Result<()> {
        self.0.on_training_end(report)?;
        self.1.on_training_end(report)
    }
}

impl<O: TrainingObserver> TrainingObserver for Option<O> {
    fn on_training_start(&mut self, episodes: usize) -> Result<()> {
        match self {
            Some(observer) => observer.on_training_start(episodes),
            None => Ok(()),
        }
    }

    fn on_episode_start(&mut self, episode: usize, start: &State) -> Result<()> {
        match self {
            Some(observer) => observer.on_episode_start(episode, start),
            None => Ok(()),
        }
    }

    fn on_step(&mut self, episode: usize, step: usize, transition: &Transition) -> Result<()> {
        match self {
            Some(observer) => observer.on_step(episode, step, transition),
            None => Ok(()),
        }
    }

    fn on_episode_end(&mut self, summary: &EpisodeSummary) -> Result<()> {
        match self {
            Some(observer) => observer.on_episode_end(summary),
            None => Ok(()),
        }
    }

    fn on_training_end(&mut self, report: &TrainingReport) -> Result<()> {
        match self {
            Some(observer) => observer.on_training_end(report),
            None => Ok(()),
        }
    }
}

/// Forwards events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl TrainingObserver for TracingObserver {
    fn on_training_start(&mut self, episodes: usize) -> Result<()> {
        info!(episodes, "Training started");
        Ok(())
    }

    fn on_episode_start(&mut self, episode: usize, start: &State) -> Result<()> {
        info!(episode, start = %start.location, "Episode started");
        Ok(())
    }

    fn on_step(&mut self, episode: usize, step: usize, t: &Transition) -> Result<()> {
        debug!(
            episode,
            step,
            state = %t.state,
            action = %t.action,
            reward = t.reward,
            old = t.old_value,
            new = t.new_value,
            "Q-value updated"
        );
        trace!(next_state = %t.next_state, status = ?t.status, "Step taken");
        Ok(())
    }

    fn on_episode_end(&mut self, summary: &EpisodeSummary) -> Result<()> {
        info!(
            episode = summary.episode,
            steps = summary.steps,
            reward = summary.total_reward,
            outcome = ?summary.outcome,
            "Episode finished"
        );
        Ok(())
    }

    fn on_training_end(&mut self, report: &TrainingReport) -> Result<()> {
        info!(
            episodes = report.episodes,
            goals = report.goals,
            losses = report.losses,
            steps = report.total_steps,
            mean_reward = report.mean_reward(),
            "Training finished"
        );
        Ok(())
    }
}

/// Keeps one summary per episode for CSV export.
#[derive(Debug, Default)]
pub struct HistoryObserver {
    summaries: Vec<EpisodeSummary>,
}

impl HistoryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summaries(&self) -> &[EpisodeSummary] {
        &self.summaries
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        for summary in &self.summaries {
            writer.serialize(summary)?;
        }
        writer.flush().map_err(|e| Error::io("flush training history", e))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .map_err(|e| Error::io(format!("create history file {}", path.display()), e))?;
        self.write_csv(file)
    }
}

impl TrainingObserver for HistoryObserver {
    fn on_training_start(&mut self, episodes: usize) -> Result<()> {
        self.summaries.reserve(episodes);
        Ok(())
    }

    fn on_episode_end(&mut self, summary: &EpisodeSummary) -> Result<()> {
        self.summaries.push(summary.clone());
        Ok(())
    }
}
