//! Drive a machine until it finishes or a step limit is reached.

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::io::config::RunnerLimits;
use crate::machine::{AdvanceOutcome, StateMachine};

/// Reason why `run_to_completion` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The last step returned no next step; the run record is gone.
    Finished,
    /// `max_steps` advances ran and work remains; the record is saved.
    MaxStepsReached { max_steps: u32, next_step: String },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    /// Step the loop started from (after any resume).
    pub started_at: String,
    pub steps_executed: u32,
    pub stop: LoopStop,
}

/// Call `advance` repeatedly until the machine finishes or
/// `limits.max_steps` runs have happened in this invocation.
///
/// Stops immediately on any error; the stored record still points at the step
/// that failed, so a later invocation retries it.
pub fn run_to_completion<C, D, F>(
    machine: &mut StateMachine<C, D>,
    limits: &RunnerLimits,
    mut on_step: F,
) -> Result<LoopOutcome>
where
    D: Serialize + DeserializeOwned + Default,
    F: FnMut(&AdvanceOutcome),
{
    let started_at = machine.current_step().to_string();
    let mut steps_executed = 0u32;
    loop {
        if let Some(max_steps) = limits.max_steps {
            if steps_executed >= max_steps {
                return Ok(LoopOutcome {
                    started_at,
                    steps_executed,
                    stop: LoopStop::MaxStepsReached {
                        max_steps,
                        next_step: machine.current_step().to_string(),
                    },
                });
            }
        }

        let outcome = machine.advance()?;
        steps_executed += 1;
        on_step(&outcome);
        if outcome.is_finished() {
            return Ok(LoopOutcome {
                started_at,
                steps_executed,
                stop: LoopStop::Finished,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;
    use crate::io::memory_store::MemoryStore;
    use crate::io::store::Store;
    use crate::machine::{StateMachineBuilder, Transition};
    use std::sync::Arc;

    /// Counts epochs in step data until `epochs` is reached.
    fn epochs(epochs: u64) -> StateMachineBuilder<Vec<u64>, u64> {
        StateMachine::builder("training", "epoch")
            .step("epoch", move |seen: &mut Vec<u64>, done: &u64| {
                seen.push(*done);
                let done = done + 1;
                if done == epochs {
                    Ok(Transition::to("evaluate", done))
                } else {
                    Ok(Transition::to("epoch", done))
                }
            })
            .step("evaluate", |_: &mut Vec<u64>, done: &u64| {
                Ok(Transition::finish(*done))
            })
    }

    #[test]
    fn loop_runs_until_finished() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut machine = epochs(3).build(store, Vec::new()).expect("build");

        let mut seen_steps = Vec::new();
        let outcome = run_to_completion(&mut machine, &RunnerLimits::default(), |step| {
            seen_steps.push(step.step.clone());
        })
        .expect("loop");

        assert_eq!(outcome.stop, LoopStop::Finished);
        assert_eq!(outcome.steps_executed, 4);
        assert_eq!(outcome.started_at, "epoch");
        assert_eq!(seen_steps, ["epoch", "epoch", "epoch", "evaluate"]);
        assert_eq!(machine.context(), &[0, 1, 2]);
    }

    #[test]
    fn loop_stops_at_max_steps_and_resumes_later() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut machine = epochs(5).build(store.clone(), Vec::new()).expect("build");

        let limits = RunnerLimits { max_steps: Some(2) };
        let outcome = run_to_completion(&mut machine, &limits, |_| {}).expect("loop");
        assert_eq!(outcome.steps_executed, 2);
        assert_eq!(
            outcome.stop,
            LoopStop::MaxStepsReached {
                max_steps: 2,
                next_step: "epoch".to_string(),
            }
        );
        drop(machine);

        let mut resumed = epochs(5).build(store, Vec::new()).expect("rebuild");
        assert_eq!(*resumed.step_data(), 2);
        let outcome =
            run_to_completion(&mut resumed, &RunnerLimits::default(), |_| {}).expect("loop");
        assert_eq!(outcome.stop, LoopStop::Finished);
        assert_eq!(outcome.steps_executed, 4);
        assert_eq!(resumed.context(), &[2, 3, 4]);
    }

    #[test]
    fn configured_step_limit_bounds_the_loop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("checkpoint.toml");
        std::fs::write(&path, "[store]\nbackend = \"memory\"\n\n[runner]\nmax_steps = 3\n")
            .expect("write config");
        let cfg = load_config(&path).expect("load");

        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut machine = epochs(10).build(store, Vec::new()).expect("build");
        let outcome = run_to_completion(&mut machine, &cfg.runner, |_| {}).expect("loop");

        assert_eq!(outcome.steps_executed, 3);
        assert!(matches!(
            outcome.stop,
            LoopStop::MaxStepsReached { max_steps: 3, .. }
        ));
        assert_eq!(machine.context(), &[0, 1, 2]);
    }
}
