//! The long-lived subscription loop.
//!
//! One task owns the stream: subscribe, decode frames, dispatch events.
//! Connection loss, framing corruption or heartbeat silence tears the
//! stream down and resubscribes with the persisted framework id under
//! exponential backoff with full jitter.

use std::time::Duration;

use anyhow::{Context as _, Result, anyhow};
use futures_util::StreamExt;
use owo_colors::OwoColorize;
use rand::Rng;
use stevedore_types::{Call, Event, EventKind, Offer, Subscribed};
use tokio_util::sync::CancellationToken;

use crate::client::STREAM_ID_HEADER;
use crate::codec::{RecordIoDecoder, decode_event};
use crate::context::{Ctx, StateSnapshot, write_state_file};
use crate::{demand, lifecycle, matcher, reconcile};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

enum StreamError {
    /// Reconnect and carry on.
    Transient(anyhow::Error),
    /// Operator intervention required; the process exits.
    Fatal(anyhow::Error),
}

pub async fn run(ctx: Ctx, cancel: CancellationToken) -> Result<()> {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        match run_stream(&ctx, &cancel, &mut backoff).await {
            Ok(()) => return Ok(()),
            Err(StreamError::Fatal(e)) => return Err(e),
            Err(StreamError::Transient(e)) => {
                tracing::warn!(error = format!("{e:#}"), "subscription lost; reconnecting");
            }
        }
        // Full jitter: anywhere between zero and the current backoff.
        let delay = Duration::from_millis(
            rand::rng().random_range(0..=backoff.as_millis() as u64),
        );
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn run_stream(
    ctx: &Ctx,
    cancel: &CancellationToken,
    backoff: &mut Duration,
) -> Result<(), StreamError> {
    let subscribe_call = {
        let framework = ctx.framework.read();
        Call::subscribe(framework.info.clone())
    };
    tracing::info!(master = %ctx.master.base_url(), "subscribing to master");
    let response = ctx
        .master
        .subscribe(&subscribe_call)
        .await
        .map_err(StreamError::Transient)?;
    // Connected; the next failure starts the backoff ladder from scratch.
    *backoff = INITIAL_BACKOFF;

    let stream_id = response
        .headers()
        .get(STREAM_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    ctx.framework.write().stream_id = Some(stream_id);

    let mut stream = response.bytes_stream();
    let mut decoder = RecordIoDecoder::default();
    ctx.watchdog.poke();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep_until(ctx.watchdog.deadline()) => {
                return Err(StreamError::Transient(anyhow!(
                    "master silent past twice the heartbeat interval"
                )));
            }
            chunk = stream.next() => {
                let Some(chunk) = chunk else {
                    return Err(StreamError::Transient(anyhow!("subscription stream closed")));
                };
                let chunk = chunk
                    .context("read subscription stream")
                    .map_err(StreamError::Transient)?;
                decoder.extend(&chunk);
                loop {
                    match decoder.next_frame() {
                        Ok(Some(frame)) => {
                            ctx.watchdog.poke();
                            dispatch_frame(ctx, &frame).await?;
                        }
                        Ok(None) => break,
                        Err(e) => {
                            // Corrupt framing poisons everything after it;
                            // resubscribe instead of guessing.
                            return Err(StreamError::Transient(e.into()));
                        }
                    }
                }
            }
        }
    }
}

async fn dispatch_frame(ctx: &Ctx, frame: &[u8]) -> Result<(), StreamError> {
    let event = match decode_event(frame) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "skipping undecodable event");
            return Ok(());
        }
    };
    metrics::counter!("stevedore_events_total", "type" => event.event_type.clone()).increment(1);
    for observer in &ctx.observers {
        observer.on_event(&event);
    }
    dispatch(ctx, event).await
}

async fn dispatch(ctx: &Ctx, event: Event) -> Result<(), StreamError> {
    match event.kind() {
        EventKind::Subscribed => {
            let Some(subscribed) = event.subscribed else {
                tracing::warn!("SUBSCRIBED event without payload");
                return Ok(());
            };
            on_subscribed(ctx, subscribed).await?;
        }
        EventKind::Offers => {
            let offers = event.offers.map(|o| o.offers).unwrap_or_default();
            if offers.is_empty() {
                return Ok(());
            }
            if ctx.config.parallel_handlers {
                tokio::spawn(handle_offers(ctx.clone(), offers));
            } else {
                handle_offers(ctx.clone(), offers).await;
            }
        }
        EventKind::Update => {
            let Some(update) = event.update else {
                tracing::warn!("UPDATE event without payload");
                return Ok(());
            };
            if ctx.is_degraded() {
                if !ctx.buffer_update(update) {
                    tracing::warn!("degraded update buffer full; dropping update");
                }
                return Ok(());
            }
            if ctx.config.parallel_handlers {
                tokio::spawn(lifecycle::handle_update(ctx.clone(), update));
            } else {
                lifecycle::handle_update(ctx.clone(), update).await;
            }
        }
        EventKind::Heartbeat => {
            // Watchdog already poked on frame receipt; keep demand settled.
            if !ctx.is_degraded()
                && let Err(e) = demand::tick(ctx).await
            {
                tracing::warn!(error = format!("{e:#}"), "demand tick on heartbeat failed");
            }
        }
        EventKind::Rescind => {
            if let Some(rescind) = event.rescind {
                // Best effort: void the offer if a batch is mid-match.
                ctx.inflight_offers.lock().remove(&rescind.offer_id.value);
            }
        }
        EventKind::Failure => {
            if let Some(failure) = event.failure {
                tracing::warn!(
                    agent_id = failure.agent_id.map(|id| id.value).unwrap_or_default(),
                    status = failure.status.unwrap_or_default(),
                    "master reported failure"
                );
            }
        }
        EventKind::Error => {
            let message = event.error.map(|e| e.message).unwrap_or_default();
            tracing::error!(message, "master reported error");
        }
        EventKind::Unknown => {
            tracing::debug!(event_type = %event.event_type, "ignoring unknown event type");
        }
    }
    Ok(())
}

async fn on_subscribed(ctx: &Ctx, subscribed: Subscribed) -> Result<(), StreamError> {
    let first_subscribe;
    {
        let mut framework = ctx.framework.write();
        first_subscribe = framework.info.id.is_none();
        match &framework.info.id {
            None => framework.info.id = Some(subscribed.framework_id.clone()),
            // The id is immutable once assigned; a different one here means
            // the master forgot us (failover timeout elapsed).
            Some(id) if id.value != subscribed.framework_id.value => {
                tracing::warn!(
                    persisted = %id.value,
                    assigned = %subscribed.framework_id.value,
                    "master assigned a different framework id than the persisted one"
                );
            }
            Some(_) => {}
        }
    }
    if let Some(seconds) = subscribed.heartbeat_interval_seconds {
        ctx.watchdog.set_interval(seconds);
    }

    let framework = ctx.framework.read().clone();
    println!(
        "{}{}",
        "📡 Subscribed • framework=".green(),
        framework
            .framework_id()
            .unwrap_or_default()
            .green()
            .dimmed()
    );

    if let Err(e) = ctx.registry.save_framework(&framework).await {
        if first_subscribe {
            // Launching tasks under an id that would not survive a restart
            // orphans them; give up and let the operator look.
            return Err(StreamError::Fatal(
                e.context("persist framework id on first subscribe"),
            ));
        }
        tracing::warn!(error = format!("{e:#}"), "framework record save failed");
    }
    if let Err(e) = ctx.registry.save_config(&ctx.config).await {
        tracing::warn!(error = format!("{e:#}"), "config snapshot save failed");
    }
    let snapshot = StateSnapshot {
        framework,
        master_url: ctx.config.master_url.clone(),
    };
    if let Err(e) = write_state_file(&ctx.config.state_file, &snapshot).await {
        tracing::warn!(error = format!("{e:#}"), "state file write failed");
    }

    tokio::spawn({
        let ctx = ctx.clone();
        async move {
            if let Err(e) = reconcile::explicit(ctx).await {
                tracing::warn!(error = format!("{e:#}"), "explicit reconciliation failed");
            }
        }
    });
    Ok(())
}

async fn handle_offers(ctx: Ctx, offers: Vec<Offer>) {
    let batch_ids: Vec<String> = offers.iter().map(|o| o.id.value.clone()).collect();
    {
        let mut inflight = ctx.inflight_offers.lock();
        for id in &batch_ids {
            inflight.insert(id.clone());
        }
    }
    let result = place_offers(&ctx, offers).await;
    {
        let mut inflight = ctx.inflight_offers.lock();
        for id in &batch_ids {
            inflight.remove(id);
        }
    }
    if let Err(e) = result {
        tracing::warn!(error = format!("{e:#}"), "offer handling failed");
    }
}

async fn place_offers(ctx: &Ctx, offers: Vec<Offer>) -> Result<()> {
    let pending: Vec<_> = ctx
        .registry
        .tasks()
        .await?
        .into_iter()
        .filter(|t| t.is_pending())
        .collect();
    let pending_count = pending.len();

    let plan = matcher::match_offers(pending, &offers);
    let mut declined = plan.declined;
    let mut placed = 0usize;

    for matcher::Assignment { mut record, offer } in plan.assignments {
        // The offer may have been rescinded while we matched.
        if !ctx.inflight_offers.lock().contains(&offer.id.value) {
            tracing::info!(offer = %offer.id.value, "offer rescinded mid-batch; task stays pending");
            continue;
        }
        let framework_id = ctx.framework.read().info.id.clone();
        let info = matcher::task_info(&record, &offer, framework_id);
        let accept = Call::accept(
            vec![offer.id.clone()],
            vec![info],
            ctx.config.refuse_seconds,
        );
        match ctx.call_master(accept).await {
            Ok(()) => {
                println!(
                    "{}{}{}{}",
                    "🚀 Launching • task=".green(),
                    record.task_id.green().dimmed(),
                    " agent=".green(),
                    offer.hostname.green().dimmed(),
                );
                record.state = stevedore_types::TaskState::Launched;
                record.agent_id = Some(offer.agent_id.value.clone());
                record.agent_hostname = Some(offer.hostname.clone());
                ctx.registry.put(&record).await?;
                metrics::counter!("stevedore_tasks_launched_total").increment(1);
                placed += 1;
            }
            Err(e) => {
                // Launch did not go out; release the offer and leave the
                // record pending for the next batch.
                tracing::warn!(
                    task_id = %record.task_id,
                    error = format!("{e:#}"),
                    "accept failed; declining offer"
                );
                declined.push(offer.id.clone());
            }
        }
    }

    if !declined.is_empty()
        && let Err(e) = ctx
            .call_master(Call::decline(declined, ctx.config.refuse_seconds))
            .await
    {
        tracing::warn!(error = format!("{e:#}"), "decline failed");
    }

    if placed < pending_count {
        // Something is still waiting for a better offer.
        demand::settle(ctx, true).await?;
    }
    Ok(())
}
