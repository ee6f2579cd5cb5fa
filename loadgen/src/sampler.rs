//! Draws randomized object sizes and retention attributes for generated tasks.
//!
//! The [`Sampler`] owns its own RNG, seeded explicitly, so two runs with the same seed and the
//! same candidate lists produce the same sequence of tasks.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::task::Task;

/// A builder for creating a [`Sampler`].
#[derive(Debug)]
pub struct SamplerBuilder {
    container: String,
    seed: u64,
    run_timestamp: u64,
    sizes: Vec<u64>,
    delete_after_days: Vec<String>,
}

impl SamplerBuilder {
    /// Seed for the RNG. Defaults to a random seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Timestamp used as the key prefix of every task in this run.
    pub fn run_timestamp(mut self, run_timestamp: u64) -> Self {
        self.run_timestamp = run_timestamp;
        self
    }

    /// Candidate object sizes in bytes.
    pub fn sizes(mut self, sizes: impl IntoIterator<Item = u64>) -> Self {
        self.sizes = sizes.into_iter().collect();
        self
    }

    /// Candidate retention values, in days.
    pub fn delete_after_days<I, S>(mut self, days: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.delete_after_days = days.into_iter().map(Into::into).collect();
        self
    }

    /// Creates the sampler.
    ///
    /// # Panics
    ///
    /// Panics if either candidate list is empty. Configuration validation rejects empty lists
    /// before a sampler is ever built.
    pub fn build(self) -> Sampler {
        assert!(!self.sizes.is_empty(), "sampler requires at least one size");
        assert!(
            !self.delete_after_days.is_empty(),
            "sampler requires at least one retention value"
        );

        Sampler {
            container: self.container,
            run_timestamp: self.run_timestamp,
            rng: SmallRng::seed_from_u64(self.seed),
            sizes: self.sizes,
            delete_after_days: self.delete_after_days,
        }
    }
}

/// Produces [`Task`]s with uniformly sampled sizes and retention values.
#[derive(Debug)]
pub struct Sampler {
    container: String,
    run_timestamp: u64,
    rng: SmallRng,
    sizes: Vec<u64>,
    delete_after_days: Vec<String>,
}

impl Sampler {
    /// Constructs a new sampler builder for the given container.
    pub fn builder(container: impl Into<String>) -> SamplerBuilder {
        SamplerBuilder {
            container: container.into(),
            seed: rand::random(),
            run_timestamp: 0,
            sizes: Vec::new(),
            delete_after_days: Vec::new(),
        }
    }

    /// Draws the task with the given index.
    pub fn next_task(&mut self, index: usize) -> Task {
        let size = self.sizes[self.rng.random_range(0..self.sizes.len())];
        let days_idx = self.rng.random_range(0..self.delete_after_days.len());

        Task {
            container: self.container.clone(),
            key: Task::key_for(self.run_timestamp, index),
            size,
            delete_after_days: self.delete_after_days[days_idx].clone(),
        }
    }

    /// Turns the sampler into an iterator over exactly `total` tasks.
    pub fn tasks(self, total: usize) -> TaskGenerator {
        TaskGenerator {
            sampler: self,
            next_index: 0,
            total,
        }
    }
}

/// Iterator yielding a fixed number of sampled tasks with increasing indices.
#[derive(Debug)]
pub struct TaskGenerator {
    sampler: Sampler,
    next_index: usize,
    total: usize,
}

impl Iterator for TaskGenerator {
    type Item = Task;

    fn next(&mut self) -> Option<Task> {
        if self.next_index >= self.total {
            return None;
        }
        let task = self.sampler.next_task(self.next_index);
        self.next_index += 1;
        Some(task)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.next_index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TaskGenerator {}
