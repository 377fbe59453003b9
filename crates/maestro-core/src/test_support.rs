//! Stub provider shared by unit tests.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::OrchestratorError;
use crate::models::{Capability, Task, TaskResult};
use crate::provider::Provider;

pub(crate) enum StubBehavior {
    Succeed(Value),
    /// Returns success=false with the given error message.
    Unsuccessful(String),
    /// Returns an Err from execute.
    Error(String),
}

pub(crate) struct StubProvider {
    id: String,
    capabilities: Vec<Capability>,
    healthy: bool,
    behavior: StubBehavior,
    delay_ms: u64,
    received: std::sync::Mutex<Vec<Value>>,
}

impl StubProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: Vec::new(),
            healthy: true,
            behavior: StubBehavior::Succeed(json!({})),
            delay_ms: 0,
            received: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn delayed(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Inputs this stub has been invoked with, in order.
    pub fn inputs(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn succeeding_with(mut self, data: Value) -> Self {
        self.behavior = StubBehavior::Succeed(data);
        self
    }

    pub fn unsuccessful(mut self, error: impl Into<String>) -> Self {
        self.behavior = StubBehavior::Unsuccessful(error.into());
        self
    }

    pub fn erroring(mut self, error: impl Into<String>) -> Self {
        self.behavior = StubBehavior::Error(error.into());
        self
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    fn version(&self) -> &str {
        "0.0.0-test"
    }

    fn capabilities(&self) -> Vec<Capability> {
        self.capabilities.clone()
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    async fn execute(&self, task: Task) -> Result<TaskResult, OrchestratorError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        self.received.lock().unwrap().push(task.input.clone());
        match &self.behavior {
            StubBehavior::Succeed(data) => Ok(TaskResult {
                task_id: task.id,
                success: true,
                data: data.clone(),
                confidence: Some(0.9),
                error: None,
            }),
            StubBehavior::Unsuccessful(msg) => Ok(TaskResult::failure(task.id, msg.clone())),
            StubBehavior::Error(msg) => Err(OrchestratorError::ProviderExecution {
                provider: self.id.clone(),
                message: msg.clone(),
            }),
        }
    }
}
