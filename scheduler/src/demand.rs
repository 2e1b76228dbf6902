//! The revive/suppress latch pair.
//!
//! The master keeps delivering offers while demand is raised and stops
//! while it is suppressed. Transitions are level-triggered off the registry
//! (any pending task means demand) and the latches guarantee no two
//! consecutive identical calls go out.

use anyhow::Result;
use parking_lot::Mutex;
use stevedore_types::{Call, TaskState};

use crate::context::Ctx;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DemandCall {
    Revive,
    Suppress,
}

#[derive(Default)]
struct DemandState {
    revived: bool,
    suppressed: bool,
}

#[derive(Default)]
pub struct DemandController {
    state: Mutex<DemandState>,
}

impl DemandController {
    pub fn new() -> Self {
        Self::default()
    }

    /// The call the current demand level warrants, if the latches are not
    /// already there. Commit only after the call went through so a failed
    /// send retries on the next tick.
    pub fn plan(&self, any_pending: bool) -> Option<DemandCall> {
        let state = self.state.lock();
        if any_pending {
            (!state.revived).then_some(DemandCall::Revive)
        } else {
            (!state.suppressed).then_some(DemandCall::Suppress)
        }
    }

    pub fn commit(&self, call: DemandCall) {
        let mut state = self.state.lock();
        match call {
            DemandCall::Revive => {
                state.revived = true;
                state.suppressed = false;
            }
            DemandCall::Suppress => {
                state.suppressed = true;
                state.revived = false;
            }
        }
    }
}

/// Scan the registry, adopt out-of-band records, and settle demand to match
/// what the scan found.
pub async fn tick(ctx: &Ctx) -> Result<()> {
    let mut any_pending = false;
    let mut counts: std::collections::BTreeMap<&'static str, u64> = Default::default();
    for mut task in ctx.registry.tasks().await? {
        if task.state == TaskState::Unset {
            // Desired state written out-of-band; pull it into the pipeline.
            task.state = TaskState::New;
            ctx.registry.put(&task).await?;
            tracing::info!(task = %task.task_name, id = %task.task_id, "adopted out-of-band task");
        }
        if task.is_pending() {
            any_pending = true;
        }
        *counts.entry(task.state.as_str()).or_default() += 1;
    }
    for (state, count) in counts {
        metrics::gauge!("stevedore_tasks", "state" => state).set(count as f64);
    }
    settle(ctx, any_pending).await
}

/// Emit REVIVE or SUPPRESS when the demand level changed.
pub async fn settle(ctx: &Ctx, any_pending: bool) -> Result<()> {
    let Some(call) = ctx.demand.plan(any_pending) else {
        return Ok(());
    };
    match call {
        DemandCall::Revive => {
            tracing::info!("framework revive");
            ctx.call_master(Call::revive()).await?;
        }
        DemandCall::Suppress => {
            tracing::info!("framework suppress");
            ctx.call_master(Call::suppress()).await?;
        }
    }
    ctx.demand.commit(call);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(controller: &DemandController, levels: &[bool]) -> Vec<DemandCall> {
        let mut calls = Vec::new();
        for &pending in levels {
            if let Some(call) = controller.plan(pending) {
                controller.commit(call);
                calls.push(call);
            }
        }
        calls
    }

    #[test]
    fn steady_demand_emits_one_revive() {
        let controller = DemandController::new();
        assert_eq!(
            drive(&controller, &[true, true, true]),
            vec![DemandCall::Revive]
        );
    }

    #[test]
    fn steady_satisfaction_emits_one_suppress() {
        let controller = DemandController::new();
        assert_eq!(
            drive(&controller, &[false, false, false]),
            vec![DemandCall::Suppress]
        );
    }

    #[test]
    fn no_two_consecutive_identical_calls() {
        let controller = DemandController::new();
        let calls = drive(
            &controller,
            &[
                true, true, false, false, true, false, true, true, false,
            ],
        );
        for pair in calls.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
        assert_eq!(calls.len(), 6);
    }

    #[test]
    fn uncommitted_plan_is_retried() {
        // A failed call leaves the latch untouched, so the next tick plans
        // the same transition again.
        let controller = DemandController::new();
        assert_eq!(controller.plan(true), Some(DemandCall::Revive));
        assert_eq!(controller.plan(true), Some(DemandCall::Revive));
        controller.commit(DemandCall::Revive);
        assert_eq!(controller.plan(true), None);
    }
}
