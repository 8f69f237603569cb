// Libriforge - DRM-free audiobook conversion pipeline
// Copyright (C) 2025 Libriforge contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Sequential named-step runner.
//!
//! A step is a named async function over a shared mutable context
//! returning a success flag; all per-run state lives in the context.
//! Steps run strictly in order; the first failure stops the sequence
//! and is reported by index and name. The runner itself does no I/O
//! and never retries.

use futures_util::future::BoxFuture;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// A single step: borrows the context for the duration of its future.
pub type StepFn<C> = for<'a> fn(&'a mut C) -> BoxFuture<'a, bool>;

struct Step<C> {
    name: &'static str,
    run: StepFn<C>,
}

/// Where a sequence run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    NotStarted,
    /// Zero-based index of the step currently executing.
    Running(usize),
    Completed,
    Failed { index: usize, name: &'static str },
}

/// Outcome of a completed [`StepSequence::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceReport {
    pub succeeded: bool,

    /// Total wall-clock time across all executed steps.
    pub elapsed: Duration,

    /// Index and name of the failing step, if any.
    pub failed_step: Option<(usize, &'static str)>,
}

/// Ordered list of named steps over a context `C`.
pub struct StepSequence<C> {
    name: &'static str,
    steps: Vec<Step<C>>,
    state: SequenceState,
}

impl<C> StepSequence<C> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
            state: SequenceState::NotStarted,
        }
    }

    /// Append a step. Order of addition is order of execution.
    pub fn add_step(&mut self, name: &'static str, run: StepFn<C>) {
        self.steps.push(Step { name, run });
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Run every step in order, stopping at the first failure.
    pub async fn run(&mut self, context: &mut C) -> SequenceReport {
        let total = self.steps.len();
        let started = Instant::now();

        for (index, step) in self.steps.iter().enumerate() {
            self.state = SequenceState::Running(index);
            info!(
                sequence = self.name,
                step = step.name,
                index = index + 1,
                total,
                "step starting"
            );

            let step_started = Instant::now();
            let ok = (step.run)(context).await;
            let step_elapsed = step_started.elapsed();

            if !ok {
                warn!(
                    sequence = self.name,
                    step = step.name,
                    elapsed = ?step_elapsed,
                    "step failed, aborting sequence"
                );
                self.state = SequenceState::Failed {
                    index,
                    name: step.name,
                };
                return SequenceReport {
                    succeeded: false,
                    elapsed: started.elapsed(),
                    failed_step: Some((index, step.name)),
                };
            }
            info!(
                sequence = self.name,
                step = step.name,
                elapsed = ?step_elapsed,
                "step complete"
            );
        }

        self.state = SequenceState::Completed;
        SequenceReport {
            succeeded: true,
            elapsed: started.elapsed(),
            failed_step: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;

    #[derive(Default)]
    struct Trace {
        executed: Vec<&'static str>,
    }

    fn step_one(trace: &mut Trace) -> BoxFuture<'_, bool> {
        trace.executed.push("one");
        async { true }.boxed()
    }

    fn step_two(trace: &mut Trace) -> BoxFuture<'_, bool> {
        trace.executed.push("two");
        async { true }.boxed()
    }

    fn step_two_failing(trace: &mut Trace) -> BoxFuture<'_, bool> {
        trace.executed.push("two");
        async { false }.boxed()
    }

    fn step_three(trace: &mut Trace) -> BoxFuture<'_, bool> {
        trace.executed.push("three");
        async { true }.boxed()
    }

    #[tokio::test]
    async fn test_all_steps_run_in_order() {
        let mut seq = StepSequence::new("test");
        seq.add_step("one", step_one);
        seq.add_step("two", step_two);
        seq.add_step("three", step_three);

        let mut trace = Trace::default();
        let report = seq.run(&mut trace).await;

        assert!(report.succeeded);
        assert_eq!(report.failed_step, None);
        assert_eq!(trace.executed, vec!["one", "two", "three"]);
        assert_eq!(seq.state(), SequenceState::Completed);
    }

    #[tokio::test]
    async fn test_failure_stops_sequence_and_names_step() {
        let mut seq = StepSequence::new("test");
        seq.add_step("one", step_one);
        seq.add_step("two", step_two_failing);
        seq.add_step("three", step_three);

        let mut trace = Trace::default();
        let report = seq.run(&mut trace).await;

        assert!(!report.succeeded);
        assert_eq!(report.failed_step, Some((1, "two")));
        assert_eq!(trace.executed, vec!["one", "two"]);
        assert_eq!(
            seq.state(),
            SequenceState::Failed {
                index: 1,
                name: "two"
            }
        );
    }

    #[tokio::test]
    async fn test_empty_sequence_completes() {
        let mut seq: StepSequence<Trace> = StepSequence::new("empty");
        let report = seq.run(&mut Trace::default()).await;
        assert!(report.succeeded);
        assert_eq!(seq.state(), SequenceState::Completed);
    }

    #[test]
    fn test_initial_state() {
        let seq: StepSequence<Trace> = StepSequence::new("test");
        assert_eq!(seq.state(), SequenceState::NotStarted);
        assert_eq!(seq.step_count(), 0);
    }
}
