// The REST surface the queue engine depends on. `RequestGateway` is the
// production implementation; tests substitute an in-memory backend.

use std::future::Future;

use techtrax_api::models::{QueueKey, QueueSnapshot, QueueStats};

use super::command::QueueCommand;
use crate::error::CoreError;
use crate::gateway::RequestGateway;

/// Which queue the engine follows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum QueueSource {
    /// The signed-in doctor's queue for today.
    #[default]
    MyQueue,
    /// An explicit `{tenant, doctor, date}` lookup.
    Key(QueueKey),
}

impl QueueSource {
    pub fn path(&self) -> String {
        match self {
            Self::MyQueue => "/queue/my-queue".into(),
            Self::Key(key) => format!("/queue/{}/{}/{}", key.tenant_id, key.doctor_id, key.date),
        }
    }
}

pub trait QueueBackend: Send + Sync + 'static {
    /// Current snapshot, or `None` when the backend reports no queue.
    fn fetch(
        &self,
        source: &QueueSource,
    ) -> impl Future<Output = Result<Option<QueueSnapshot>, CoreError>> + Send;

    /// Run a command; the backend answers with the updated snapshot.
    fn command(
        &self,
        command: &QueueCommand,
    ) -> impl Future<Output = Result<QueueSnapshot, CoreError>> + Send;

    fn stats(&self, queue_id: &str) -> impl Future<Output = Result<QueueStats, CoreError>> + Send;
}

impl QueueBackend for RequestGateway {
    async fn fetch(&self, source: &QueueSource) -> Result<Option<QueueSnapshot>, CoreError> {
        match self.get::<Option<QueueSnapshot>>(&source.path()).await {
            Ok(snapshot) => Ok(snapshot),
            Err(CoreError::Rejected { message }) => {
                tracing::debug!(%message, "no queue");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn command(&self, command: &QueueCommand) -> Result<QueueSnapshot, CoreError> {
        self.post(command.endpoint(), &command.body()).await
    }

    async fn stats(&self, queue_id: &str) -> Result<QueueStats, CoreError> {
        self.get(&format!("/queue/stats/{queue_id}")).await
    }
}
