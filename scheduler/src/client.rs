//! HTTP client for the master: the scheduler call channel and the
//! out-of-band REST introspection endpoints.

use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use reqwest::header::CONTENT_TYPE;
use stevedore_common::args::MasterArgs;
use stevedore_types::{
    AgentInfo, AgentsResponse, Call, CallType, NetworkInfo, TasksResponse,
};

pub const SCHEDULER_PATH: &str = "/api/v1/scheduler";
pub const STREAM_ID_HEADER: &str = "Mesos-Stream-Id";

#[derive(Clone)]
pub struct MasterClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    call_timeout: Duration,
}

impl MasterClient {
    pub fn new(args: &MasterArgs) -> Result<Self> {
        // No client-wide timeout: the subscription response body lives for
        // the whole session. Synchronous calls set one per request.
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(args.master_ssl_skip_verify)
            .build()
            .context("build master http client")?;
        Ok(Self {
            http,
            base_url: args.base_url(),
            username: args.master_username.clone(),
            password: args.master_password.clone(),
            call_timeout: Duration::from_secs(args.master_call_timeout_seconds),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST a SUBSCRIBE call and hand back the streaming response. The
    /// caller owns draining the RecordIO body.
    pub async fn subscribe(&self, call: &Call) -> Result<reqwest::Response> {
        let res = self
            .http
            .post(format!("{}{}", self.base_url, SCHEDULER_PATH))
            .basic_auth(&self.username, Some(&self.password))
            .header(CONTENT_TYPE, "application/json")
            .json(call)
            .send()
            .await
            .context("connect to master for subscription")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            bail!("subscribe rejected with status {status}: {body}");
        }
        Ok(res)
    }

    /// Send one synchronous call. The master answers every accepted call
    /// with 202 and an empty body.
    pub async fn call(&self, call: &Call, stream_id: &str) -> Result<()> {
        // A status without a uuid is synthetic and must not be acknowledged.
        if call.call_type == CallType::Acknowledge
            && call
                .acknowledge
                .as_ref()
                .is_none_or(|ack| ack.uuid.is_empty())
        {
            return Ok(());
        }
        let res = self
            .http
            .post(format!("{}{}", self.base_url, SCHEDULER_PATH))
            .timeout(self.call_timeout)
            .basic_auth(&self.username, Some(&self.password))
            .header(CONTENT_TYPE, "application/json")
            .header(STREAM_ID_HEADER, stream_id)
            .json(call)
            .send()
            .await
            .with_context(|| format!("send {:?} call to master", call.call_type))?;
        if res.status().as_u16() != 202 {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            bail!(
                "master rejected {:?} call with status {status}: {body}",
                call.call_type
            );
        }
        Ok(())
    }

    /// Look up one agent via `GET /slaves/<agent-id>`.
    pub async fn agent_info(&self, agent_id: &str) -> Result<Option<AgentInfo>> {
        let res = self
            .http
            .get(format!("{}/slaves/{agent_id}", self.base_url))
            .timeout(self.call_timeout)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .context("query master for agent info")?;
        if !res.status().is_success() {
            let status = res.status();
            bail!("agent info query failed with status {status}");
        }
        let agents: AgentsResponse = res.json().await.context("parse agent info response")?;
        Ok(agents.slaves.into_iter().find(|a| a.id == agent_id))
    }

    /// Look up task state via `GET /tasks?task_id=...&framework_id=...`.
    pub async fn task_info(&self, task_id: &str, framework_id: &str) -> Result<TasksResponse> {
        let res = self
            .http
            .get(format!("{}/tasks", self.base_url))
            .query(&[("task_id", task_id), ("framework_id", framework_id)])
            .timeout(self.call_timeout)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .context("query master for task info")?;
        if !res.status().is_success() {
            let status = res.status();
            bail!("task info query failed with status {status}");
        }
        res.json().await.context("parse task info response")
    }

    /// Container network info of a running task, if the master has any.
    pub async fn network_info(
        &self,
        task_id: &str,
        framework_id: &str,
    ) -> Result<Vec<NetworkInfo>> {
        let tasks = self.task_info(task_id, framework_id).await?;
        let Some(task) = tasks.tasks.first() else {
            return Ok(Vec::new());
        };
        for status in &task.statuses {
            if status.state.as_deref() == Some("TASK_RUNNING")
                && let Some(container) = &status.container_status
            {
                return Ok(container.network_infos.clone());
            }
        }
        Ok(Vec::new())
    }
}
