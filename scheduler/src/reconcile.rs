//! Reconciliation against the master's view of the world.
//!
//! Explicit reconciliation runs on every (re)subscribe and asks about each
//! record the master should know; implicit reconciliation runs on a timer
//! with an empty task list so the master reports everything it holds for
//! this framework. Both produce synthetic UPDATE events that flow through
//! the ordinary state machine: tasks the master lost come back as
//! `TASK_LOST`/`TASK_UNKNOWN` and restart, tasks the registry does not know
//! get killed by the unknown-task path.

use std::time::Duration;

use anyhow::Result;
use stevedore_types::{Call, Id, ReconcileTask, TaskState};
use tokio_util::sync::CancellationToken;

use crate::context::Ctx;

/// States excluded from explicit reconciliation: the master cannot know
/// about tasks that were never launched or are already being torn down by
/// an admin kill.
fn skip_state(state: TaskState) -> bool {
    matches!(
        state,
        TaskState::Unset | TaskState::New | TaskState::Restart | TaskState::KillRequested
    ) || state.is_terminal()
}

pub async fn explicit(ctx: Ctx) -> Result<()> {
    let mut tasks = Vec::new();
    for record in ctx.registry.tasks().await? {
        let Some(agent_id) = &record.agent_id else {
            continue;
        };
        if skip_state(record.state) {
            continue;
        }
        tracing::debug!(task_id = %record.task_id, state = %record.state, "reconciling task");
        tasks.push(ReconcileTask {
            task_id: Id::new(record.task_id.clone()),
            agent_id: Some(Id::new(agent_id.clone())),
        });
    }
    tracing::info!(count = tasks.len(), "explicit reconciliation");
    ctx.call_master(Call::reconcile(tasks)).await
}

pub async fn implicit(ctx: &Ctx) -> Result<()> {
    ctx.call_master(Call::reconcile(Vec::new())).await
}

pub async fn run_timer(ctx: Ctx, cancel: CancellationToken) {
    let mut tick =
        tokio::time::interval(Duration::from_secs(ctx.config.reconcile_interval_seconds));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it, the subscribe path already
    // reconciled explicitly.
    tick.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                if let Err(e) = implicit(&ctx).await {
                    tracing::warn!(error = format!("{e:#}"), "implicit reconciliation failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconciliation_scope_excludes_unlaunched_and_killing_tasks() {
        assert!(skip_state(TaskState::New));
        assert!(skip_state(TaskState::Restart));
        assert!(skip_state(TaskState::KillRequested));
        assert!(skip_state(TaskState::Unset));
        assert!(skip_state(TaskState::Finished));
        assert!(skip_state(TaskState::Failed));

        assert!(!skip_state(TaskState::Launched));
        assert!(!skip_state(TaskState::Staging));
        assert!(!skip_state(TaskState::Starting));
        assert!(!skip_state(TaskState::Running));
        assert!(!skip_state(TaskState::Killing));
    }
}
