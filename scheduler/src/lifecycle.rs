//! The task lifecycle state machine.
//!
//! UPDATE events drive each record from `__STAGING` through `RUNNING` to a
//! terminal state. Failures restart the task under a fresh id; kills and
//! clean exits delete the record. Every status bearing a uuid is
//! acknowledged before the record changes.

use anyhow::Result;
use stevedore_types::{Call, Id, TaskRecord, TaskState, TaskStatus, Update};

use crate::context::Ctx;
use crate::demand;
use crate::translate::new_task_id;

/// What an incoming status means for the stored record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateAction {
    /// Adopt the reported state.
    Mirror(TaskState),
    /// The task is up; snapshot placement and maybe suppress offers.
    ConfirmRunning,
    /// Delete the record and schedule a replacement under a new id.
    Restart,
    /// Terminal with nothing left to do; delete the record.
    Remove,
    /// Stale or irrelevant; keep the record as is.
    Ignore,
}

/// Decide the transition for a record in `current` seeing `reported`.
pub fn classify(current: TaskState, reported: TaskState) -> UpdateAction {
    let killing = matches!(current, TaskState::KillRequested | TaskState::Killing);
    match reported {
        TaskState::Staging | TaskState::Starting => {
            if killing {
                UpdateAction::Ignore
            } else {
                UpdateAction::Mirror(reported)
            }
        }
        TaskState::Running => {
            if killing {
                UpdateAction::Ignore
            } else {
                UpdateAction::ConfirmRunning
            }
        }
        TaskState::Killing => {
            if current == TaskState::KillRequested {
                UpdateAction::Remove
            } else {
                UpdateAction::Mirror(TaskState::Killing)
            }
        }
        TaskState::Killed | TaskState::Finished => UpdateAction::Remove,
        TaskState::Failed | TaskState::Error | TaskState::Lost => {
            // A failure while we were killing anyway still means gone.
            if killing {
                UpdateAction::Remove
            } else {
                UpdateAction::Restart
            }
        }
        _ => UpdateAction::Ignore,
    }
}

/// The replacement for a failed task: same name, same spec, fresh id, back
/// to the start of the pipeline.
pub fn restart_record(old: &TaskRecord) -> TaskRecord {
    TaskRecord {
        task_id: new_task_id(&old.project, &old.service),
        state: TaskState::New,
        agent_id: None,
        agent_hostname: None,
        message: None,
        restarts: old.restarts + 1,
        ..old.clone()
    }
}

pub async fn handle_update(ctx: Ctx, update: Update) {
    if let Err(e) = apply_update(&ctx, &update).await {
        tracing::warn!(
            task_id = %update.status.task_id.value,
            error = format!("{e:#}"),
            "update handling failed"
        );
    }
}

async fn apply_update(ctx: &Ctx, update: &Update) -> Result<()> {
    let status = &update.status;

    // Acknowledge first; nothing below may reorder ahead of this.
    acknowledge(ctx, status).await;

    let Some(reported) = TaskState::from_wire(&status.state) else {
        tracing::warn!(state = %status.state, "skipping update with unknown task state");
        return Ok(());
    };

    let Some(mut record) = ctx.registry.find_by_task_id(&status.task_id.value).await? else {
        // The master believes in a task we no longer own. Desired state
        // lives here, so tell it to let go.
        if !reported.is_terminal() {
            tracing::info!(task_id = %status.task_id.value, "killing task unknown to the registry");
            ctx.call_master(Call::kill(status.task_id.clone(), status.agent_id.clone()))
                .await?;
        }
        return Ok(());
    };

    tracing::debug!(
        task_id = %record.task_id,
        current = %record.state,
        reported = %reported,
        "task update"
    );
    record.message = status.message.clone();

    match classify(record.state, reported) {
        UpdateAction::Mirror(next) => {
            record.state = next;
            if let Some(agent) = &status.agent_id {
                record.agent_id = Some(agent.value.clone());
            }
            ctx.registry.put(&record).await?;
        }
        UpdateAction::ConfirmRunning => {
            record.state = TaskState::Running;
            if let Some(agent) = &status.agent_id {
                record.agent_id = Some(agent.value.clone());
            }
            if record.agent_hostname.is_none()
                && let Some(agent_id) = record.agent_id.clone()
            {
                // Best effort: the snapshot is informational only.
                match ctx.master.agent_info(&agent_id).await {
                    Ok(Some(agent)) => record.agent_hostname = Some(agent.hostname),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!(agent_id, error = %e, "agent info lookup failed")
                    }
                }
            }
            ctx.registry.put(&record).await?;
            metrics::counter!("stevedore_tasks_running_total").increment(1);
            let running = ctx
                .registry
                .count_in_state(&record.task_name, TaskState::Running)
                .await?;
            if running >= record.instances as usize {
                tracing::info!(task = %record.task_name, running, "all replicas running");
            }
            // All replicas placed means demand can be dropped.
            demand::tick(ctx).await?;
        }
        UpdateAction::Restart => {
            ctx.registry.delete(&record.storage_key()).await?;
            let replacement = restart_record(&record);
            tracing::info!(
                old = %record.task_id,
                new = %replacement.task_id,
                reported = %reported,
                "restarting failed task"
            );
            ctx.registry.put(&replacement).await?;
            metrics::counter!("stevedore_tasks_restarted_total").increment(1);
            demand::settle(ctx, true).await?;
        }
        UpdateAction::Remove => {
            tracing::info!(task_id = %record.task_id, reported = %reported, "task reached terminal state");
            ctx.registry.delete(&record.storage_key()).await?;
        }
        UpdateAction::Ignore => {}
    }
    Ok(())
}

/// ACKNOWLEDGE a status carrying a uuid. Synthetic statuses (null uuid)
/// must not be acknowledged; the client enforces that too.
async fn acknowledge(ctx: &Ctx, status: &TaskStatus) {
    let (Some(uuid), Some(agent_id)) = (&status.uuid, &status.agent_id) else {
        return;
    };
    let call = Call::acknowledge(
        agent_id.clone(),
        Id::new(status.task_id.value.clone()),
        uuid.clone(),
    );
    if let Err(e) = ctx.call_master(call).await {
        tracing::warn!(
            task_id = %status.task_id.value,
            error = format!("{e:#}"),
            "acknowledge failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fold a wire status sequence over the state machine the way the
    /// event loop would; `None` means the record was deleted.
    fn apply_sequence(start: TaskState, wire_states: &[&str]) -> Option<TaskState> {
        let mut current = start;
        for wire in wire_states {
            let reported = TaskState::from_wire(wire).unwrap();
            match classify(current, reported) {
                UpdateAction::Mirror(next) => current = next,
                UpdateAction::ConfirmRunning => current = TaskState::Running,
                UpdateAction::Restart | UpdateAction::Remove => return None,
                UpdateAction::Ignore => {}
            }
        }
        Some(current)
    }

    #[test]
    fn staging_starting_running_lands_in_running() {
        assert_eq!(
            apply_sequence(
                TaskState::Launched,
                &["TASK_STAGING", "TASK_STARTING", "TASK_RUNNING"]
            ),
            Some(TaskState::Running)
        );
    }

    #[test]
    fn any_sequence_with_finished_deletes_the_record() {
        let sequences: &[&[&str]] = &[
            &["TASK_FINISHED"],
            &["TASK_RUNNING", "TASK_FINISHED"],
            &["TASK_STAGING", "TASK_FINISHED", "TASK_RUNNING"],
            &["TASK_FINISHED", "TASK_STAGING", "TASK_STARTING"],
        ];
        for sequence in sequences {
            assert_eq!(apply_sequence(TaskState::Launched, sequence), None);
        }
    }

    #[test]
    fn failure_from_running_restarts() {
        assert_eq!(
            classify(TaskState::Running, TaskState::Failed),
            UpdateAction::Restart
        );
        assert_eq!(
            classify(TaskState::Running, TaskState::Lost),
            UpdateAction::Restart
        );
        assert_eq!(
            classify(TaskState::Running, TaskState::Error),
            UpdateAction::Restart
        );
    }

    #[test]
    fn failure_during_kill_just_removes() {
        assert_eq!(
            classify(TaskState::KillRequested, TaskState::Failed),
            UpdateAction::Remove
        );
        assert_eq!(
            classify(TaskState::Killing, TaskState::Lost),
            UpdateAction::Remove
        );
    }

    #[test]
    fn kill_acknowledgement_is_terminal() {
        assert_eq!(
            classify(TaskState::KillRequested, TaskState::Killing),
            UpdateAction::Remove
        );
        assert_eq!(
            classify(TaskState::KillRequested, TaskState::Killed),
            UpdateAction::Remove
        );
        // A kill we did not ask for mirrors until the terminal state lands.
        assert_eq!(
            classify(TaskState::Running, TaskState::Killing),
            UpdateAction::Mirror(TaskState::Killing)
        );
        assert_eq!(
            classify(TaskState::Killing, TaskState::Killed),
            UpdateAction::Remove
        );
    }

    #[test]
    fn progress_reports_are_ignored_while_killing() {
        assert_eq!(
            classify(TaskState::KillRequested, TaskState::Running),
            UpdateAction::Ignore
        );
        assert_eq!(
            classify(TaskState::KillRequested, TaskState::Staging),
            UpdateAction::Ignore
        );
    }

    #[test]
    fn restart_record_regenerates_id_and_resets_placement() {
        let old = TaskRecord {
            task_id: "demo_web.1".into(),
            task_name: "stevedore:demo:web".into(),
            project: "demo".into(),
            service: "web".into(),
            state: TaskState::Running,
            agent_id: Some("agent-1".into()),
            agent_hostname: Some("h1".into()),
            message: Some("oom".into()),
            restarts: 1,
            ..Default::default()
        };
        let replacement = restart_record(&old);
        assert_ne!(replacement.task_id, old.task_id);
        assert_eq!(replacement.task_name, old.task_name);
        assert_eq!(replacement.state, TaskState::New);
        assert!(replacement.agent_id.is_none());
        assert!(replacement.agent_hostname.is_none());
        assert_eq!(replacement.restarts, 2);
    }
}
