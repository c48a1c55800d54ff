//! Resumable state machines whose progress survives process restarts.
//!
//! A machine persists a single [`RunRecord`] under the identity derived from
//! its id. Each [`StateMachine::advance`] runs the step named by the record
//! (or the start step), stores the returned [`Transition`], and either saves
//! the record (more work remains) or deletes it (finished). A process killed
//! between advances resumes at the recorded next step; the step that already
//! completed is not run again.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::checkpoint::{Checkpoint, OpenOptions, Origin, Stateful};
use crate::core::identity::{Identity, IdentityArgs};
use crate::io::store::Store;

/// Persisted progress of one machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord<D> {
    /// Step to run next; `None` means the configured start step.
    pub next_step: Option<String>,
    /// Payload handed to the next step.
    pub step_data: D,
}

impl<D: Serialize + DeserializeOwned> Stateful for RunRecord<D> {
    const TYPE_TAG: &'static str = "RunRecord";
    const FIELDS: &'static [&'static str] = &["next_step", "step_data"];
}

/// What a step returns: where to go next and the data to carry there.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<D> {
    pub next_step: Option<String>,
    pub data: D,
}

impl<D> Transition<D> {
    /// Continue with `step`.
    pub fn to(step: impl Into<String>, data: D) -> Self {
        Self {
            next_step: Some(step.into()),
            data,
        }
    }

    /// End the run.
    pub fn finish(data: D) -> Self {
        Self {
            next_step: None,
            data,
        }
    }
}

/// Fatal machine errors. None of these are retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MachineError {
    #[error("machine '{machine}' has no step named '{step}'")]
    UnknownStep { machine: String, step: String },
    #[error("step '{step}' registered more than once")]
    DuplicateStep { step: String },
    #[error("step '{step}' broke the transition contract: {reason}")]
    ProtocolViolation { step: String, reason: String },
}

/// A step: reads the current data, may mutate the caller's context, and
/// returns the transition.
pub type StepFn<C, D> = Box<dyn FnMut(&mut C, &D) -> Result<Transition<D>>>;

/// Result of one [`StateMachine::advance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvanceOutcome {
    /// Step that ran.
    pub step: String,
    /// Step recorded for the next advance; `None` once finished.
    pub next_step: Option<String>,
}

impl AdvanceOutcome {
    pub fn is_finished(&self) -> bool {
        self.next_step.is_none()
    }
}

/// Registers steps before a machine is opened.
pub struct StateMachineBuilder<C, D> {
    id: String,
    start_step: String,
    steps: Vec<(String, StepFn<C, D>)>,
    force_restart: bool,
}

impl<C, D> StateMachineBuilder<C, D>
where
    D: Serialize + DeserializeOwned + Default,
{
    pub fn new(id: impl Into<String>, start_step: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            start_step: start_step.into(),
            steps: Vec::new(),
            force_restart: false,
        }
    }

    pub fn step<F>(mut self, name: impl Into<String>, step: F) -> Self
    where
        F: FnMut(&mut C, &D) -> Result<Transition<D>> + 'static,
    {
        self.steps.push((name.into(), Box::new(step)));
        self
    }

    /// Discard any stored progress and begin at the start step.
    pub fn force_restart(mut self, force: bool) -> Self {
        self.force_restart = force;
        self
    }

    /// Validate the step table and open (or create) the run record.
    pub fn build(self, store: Arc<dyn Store>, context: C) -> Result<StateMachine<C, D>> {
        let mut steps = HashMap::with_capacity(self.steps.len());
        for (name, step) in self.steps {
            if steps.contains_key(&name) {
                return Err(MachineError::DuplicateStep { step: name }.into());
            }
            steps.insert(name, step);
        }
        if !steps.contains_key(&self.start_step) {
            return Err(MachineError::UnknownStep {
                machine: self.id,
                step: self.start_step,
            }
            .into());
        }

        let args = record_args::<D>(&self.id);
        let record = Checkpoint::open_with(
            store,
            &args,
            OpenOptions {
                force_init: self.force_restart,
            },
            || {
                Ok(RunRecord {
                    next_step: None,
                    step_data: D::default(),
                })
            },
        )?;
        debug!(
            machine = %self.id,
            resumed = record.origin() == Origin::Restored,
            next_step = ?record.next_step,
            "machine opened"
        );

        Ok(StateMachine {
            id: self.id,
            start_step: self.start_step,
            steps,
            record,
            context,
        })
    }
}

/// Identity arguments of the run record for machine `id`.
pub fn record_args<D: Serialize + DeserializeOwned>(id: &str) -> IdentityArgs {
    RunRecord::<D>::identity_args().arg(id)
}

/// A machine bound to its run record and caller-owned context.
pub struct StateMachine<C, D> {
    id: String,
    start_step: String,
    steps: HashMap<String, StepFn<C, D>>,
    record: Checkpoint<RunRecord<D>>,
    context: C,
}

impl<C, D> StateMachine<C, D>
where
    D: Serialize + DeserializeOwned + Default,
{
    pub fn builder(id: impl Into<String>, start_step: impl Into<String>) -> StateMachineBuilder<C, D> {
        StateMachineBuilder::new(id, start_step)
    }

    /// Run one step and persist the resulting record.
    ///
    /// Step errors propagate unchanged and leave the stored record as it was,
    /// so the same step is attempted again on the next advance.
    #[instrument(skip(self), fields(machine = %self.id))]
    pub fn advance(&mut self) -> Result<AdvanceOutcome> {
        let step = self.current_step().to_string();
        let step_fn = self
            .steps
            .get_mut(&step)
            .ok_or_else(|| MachineError::UnknownStep {
                machine: self.id.clone(),
                step: step.clone(),
            })?;

        debug!(step, "running step");
        let transition = step_fn(&mut self.context, &self.record.step_data)?;

        if let Some(next) = &transition.next_step {
            if !self.steps.contains_key(next) {
                return Err(MachineError::ProtocolViolation {
                    step,
                    reason: format!("next step '{next}' is not registered"),
                }
                .into());
            }
        }
        if let Err(err) = serde_json::to_value(&transition.data) {
            return Err(MachineError::ProtocolViolation {
                step,
                reason: format!("step data is not serializable: {err}"),
            }
            .into());
        }

        self.record.next_step = transition.next_step;
        self.record.step_data = transition.data;

        let outcome = AdvanceOutcome {
            step,
            next_step: self.record.next_step.clone(),
        };
        if outcome.is_finished() {
            self.record.delete()?;
            info!(step = %outcome.step, "machine finished");
        } else {
            self.record.save()?;
            debug!(step = %outcome.step, next_step = ?outcome.next_step, "step checkpointed");
        }
        Ok(outcome)
    }
}

impl<C, D> StateMachine<C, D> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn identity(&self) -> &Identity {
        self.record.identity()
    }

    pub fn start_step(&self) -> &str {
        &self.start_step
    }

    /// Step the next advance will run.
    pub fn current_step(&self) -> &str {
        self.record
            .next_step
            .as_deref()
            .unwrap_or(&self.start_step)
    }

    pub fn step_data(&self) -> &D {
        &self.record.step_data
    }

    /// True when the machine picked up a stored record instead of starting.
    pub fn resumed(&self) -> bool {
        self.record.origin() == Origin::Restored
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    pub fn into_context(self) -> C {
        self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::memory_store::MemoryStore;
    use crate::test_support::CountingStore;
    use anyhow::anyhow;
    use serde_json::{Value, json};

    type Log = Vec<String>;

    fn three_steps(id: &str) -> StateMachineBuilder<Log, Value> {
        StateMachine::builder(id, "state1")
            .step("state1", |log: &mut Log, _: &Value| {
                log.push("state1".to_string());
                Ok(Transition::to("state2", json!({})))
            })
            .step("state2", |log: &mut Log, _: &Value| {
                log.push("state2".to_string());
                Ok(Transition::to("state3", json!({})))
            })
            .step("state3", |log: &mut Log, _: &Value| {
                log.push("state3".to_string());
                Ok(Transition::finish(json!({})))
            })
    }

    #[test]
    fn runs_steps_in_order_and_clears_record() {
        let store = Arc::new(CountingStore::new());
        let mut machine = three_steps("test_id")
            .build(store.clone(), Vec::new())
            .expect("build");
        assert!(!machine.resumed());

        while !machine.advance().expect("advance").is_finished() {}

        assert_eq!(machine.context(), &["state1", "state2", "state3"]);
        assert!(store.is_empty());
        assert_eq!(store.deletes(), 1);
    }

    #[test]
    fn self_loop_counts_in_step_data() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut machine = StateMachine::builder("looping", "state1")
            .step("state1", |log: &mut Log, _: &Value| {
                log.push("state1".to_string());
                Ok(Transition::to("state2", json!({})))
            })
            .step("state2", |log: &mut Log, data: &Value| {
                log.push("state2".to_string());
                let counter = data.get("counter").and_then(Value::as_u64).unwrap_or(0);
                if counter == 3 {
                    Ok(Transition::to("state3", json!({})))
                } else {
                    Ok(Transition::to("state2", json!({ "counter": counter + 1 })))
                }
            })
            .step("state3", |log: &mut Log, _: &Value| {
                log.push("state3".to_string());
                Ok(Transition::finish(json!({})))
            })
            .build(store, Vec::new())
            .expect("build");

        while !machine.advance().expect("advance").is_finished() {}

        assert_eq!(
            machine.into_context(),
            ["state1", "state2", "state2", "state2", "state2", "state3"]
        );
    }

    #[test]
    fn resumes_at_recorded_step_after_restart() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

        let mut first = three_steps("resume").build(store.clone(), Vec::new()).expect("build");
        let outcome = first.advance().expect("advance");
        assert_eq!(outcome.step, "state1");
        assert_eq!(outcome.next_step.as_deref(), Some("state2"));
        drop(first);

        let mut second = three_steps("resume").build(store, Vec::new()).expect("rebuild");
        assert!(second.resumed());
        assert_eq!(second.current_step(), "state2");
        second.advance().expect("advance");
        assert_eq!(second.context(), &["state2"]);
    }

    #[test]
    fn finished_run_starts_over_on_next_build() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut machine = three_steps("again").build(store.clone(), Vec::new()).expect("build");
        while !machine.advance().expect("advance").is_finished() {}

        let fresh = three_steps("again").build(store, Vec::new()).expect("rebuild");
        assert!(!fresh.resumed());
        assert_eq!(fresh.current_step(), "state1");
    }

    #[test]
    fn unknown_start_step_is_rejected_at_build() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let result = StateMachine::<Log, Value>::builder("m", "missing")
            .step("state1", |_: &mut Log, _: &Value| Ok(Transition::finish(Value::Null)))
            .build(store, Vec::new());
        let err = result.err().expect("unknown start");
        assert_eq!(
            err.downcast_ref::<MachineError>(),
            Some(&MachineError::UnknownStep {
                machine: "m".to_string(),
                step: "missing".to_string(),
            })
        );
    }

    #[test]
    fn duplicate_steps_are_rejected() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let result = StateMachine::<Log, Value>::builder("m", "a")
            .step("a", |_: &mut Log, _: &Value| Ok(Transition::finish(Value::Null)))
            .step("a", |_: &mut Log, _: &Value| Ok(Transition::finish(Value::Null)))
            .build(store, Vec::new());
        let err = result.err().expect("duplicate");
        assert!(matches!(
            err.downcast_ref::<MachineError>(),
            Some(MachineError::DuplicateStep { step }) if step == "a"
        ));
    }

    #[test]
    fn transition_to_unregistered_step_is_a_protocol_violation() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut machine = StateMachine::<Log, Value>::builder("m", "a")
            .step("a", |_: &mut Log, _: &Value| Ok(Transition::to("nowhere", Value::Null)))
            .build(store.clone(), Vec::new())
            .expect("build");

        let err = machine.advance().expect_err("violation");
        assert!(matches!(
            err.downcast_ref::<MachineError>(),
            Some(MachineError::ProtocolViolation { step, .. }) if step == "a"
        ));
        assert_eq!(machine.current_step(), "a");
    }

    #[test]
    fn stored_record_naming_unknown_step_fails_loudly() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let identity = record_args::<Value>("legacy").identity();
        store
            .put(identity.as_str(), br#"["removed_step", {}]"#)
            .expect("put");

        let mut machine = three_steps("legacy").build(store, Vec::new()).expect("build");
        let err = machine.advance().expect_err("unknown step");
        assert!(matches!(
            err.downcast_ref::<MachineError>(),
            Some(MachineError::UnknownStep { step, .. }) if step == "removed_step"
        ));
    }

    #[test]
    fn step_errors_leave_record_untouched() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut machine = StateMachine::<u32, Value>::builder("flaky", "fetch")
            .step("fetch", |attempts: &mut u32, _: &Value| {
                *attempts += 1;
                if *attempts == 1 {
                    return Err(anyhow!("network down"));
                }
                Ok(Transition::to("train", json!({ "attempts": *attempts })))
            })
            .step("train", |_: &mut u32, data: &Value| Ok(Transition::finish(data.clone())))
            .build(store.clone(), 0)
            .expect("build");

        let err = machine.advance().expect_err("first attempt fails");
        assert!(err.to_string().contains("network down"));
        assert_eq!(machine.current_step(), "fetch");

        let outcome = machine.advance().expect("retry");
        assert_eq!(outcome.next_step.as_deref(), Some("train"));

        let resumed = StateMachine::<u32, Value>::builder("flaky", "fetch")
            .step("fetch", |_: &mut u32, _: &Value| Ok(Transition::finish(Value::Null)))
            .step("train", |_: &mut u32, data: &Value| Ok(Transition::finish(data.clone())))
            .build(store, 0)
            .expect("rebuild");
        assert_eq!(resumed.current_step(), "train");
        assert_eq!(resumed.step_data(), &json!({ "attempts": 2 }));
    }

    #[test]
    fn force_restart_ignores_stored_progress() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut machine = three_steps("forced").build(store.clone(), Vec::new()).expect("build");
        machine.advance().expect("advance");

        let restarted = three_steps("forced")
            .force_restart(true)
            .build(store, Vec::new())
            .expect("rebuild");
        assert!(!restarted.resumed());
        assert_eq!(restarted.current_step(), "state1");
    }
}
