use crate::bot::MessageContext;
use crate::client::Client;
use crate::config::DispatchMode;
use crate::error::ClientError;
use log::{debug, warn};
use moka::future::Cache;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use wxcore::types::message::Message;

pub type MessageHandler = Arc<
    dyn Fn(MessageContext) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

/// How long a message id is remembered to drop redeliveries.
const SEEN_TTL: Duration = Duration::from_secs(10 * 60);
const SEEN_CAPACITY: u64 = 10_000;

/// Delivers received messages to the registered handler.
///
/// Every invocation runs in its own task, so an error or panic in the
/// handler is logged and never reaches the sync loop or the next message.
pub struct Dispatcher {
    handler: Option<MessageHandler>,
    mode: DispatchMode,
    pool: Option<Arc<Semaphore>>,
    seen: Cache<String, ()>,
    /// Failed invocations in either mode, pooled ones counted as they end.
    failed: Arc<AtomicUsize>,
}

impl Dispatcher {
    pub fn new(handler: Option<MessageHandler>, mode: DispatchMode) -> Self {
        let pool = match mode {
            DispatchMode::Inline => None,
            DispatchMode::Pooled { workers } => Some(Arc::new(Semaphore::new(workers.max(1)))),
        };
        Self {
            handler,
            mode,
            pool,
            seen: Cache::builder()
                .max_capacity(SEEN_CAPACITY)
                .time_to_live(SEEN_TTL)
                .build(),
            failed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn handler_failures(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    /// Hands a batch to the handler in order. Inline mode returns once every
    /// invocation finished; pooled mode returns once every invocation has
    /// started. Returns the failures seen before returning, so pooled
    /// invocations still running are only reflected in
    /// [`handler_failures`](Self::handler_failures).
    pub(crate) async fn dispatch(&self, client: &Arc<Client>, batch: Vec<Message>) -> usize {
        let Some(handler) = &self.handler else {
            debug!(target: "Client/Dispatch", "No message handler, dropping {} messages", batch.len());
            return 0;
        };

        let mut failures = 0;
        for message in batch {
            if !self.first_delivery(&message).await {
                debug!(target: "Client/Dispatch", "Skipping redelivered message {}", message.id);
                continue;
            }
            let ctx = MessageContext {
                message,
                client: client.clone(),
            };
            match &self.pool {
                None => {
                    if invoke(handler.clone(), ctx).await.is_err() {
                        self.failed.fetch_add(1, Ordering::Relaxed);
                        failures += 1;
                    }
                }
                Some(pool) => {
                    let Ok(permit) = pool.clone().acquire_owned().await else {
                        warn!(target: "Client/Dispatch", "Worker pool closed, dropping message");
                        continue;
                    };
                    let handler = handler.clone();
                    let failed = self.failed.clone();
                    tokio::spawn(async move {
                        if invoke(handler, ctx).await.is_err() {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                        drop(permit);
                    });
                }
            }
        }
        failures
    }

    async fn first_delivery(&self, message: &Message) -> bool {
        if message.id.is_empty() {
            return true;
        }
        self.seen
            .entry(message.id.clone())
            .or_insert(())
            .await
            .is_fresh()
    }
}

/// Runs one handler invocation in its own task and reports how it ended.
async fn invoke(handler: MessageHandler, ctx: MessageContext) -> Result<(), ClientError> {
    let message_id = ctx.message.id.clone();
    let outcome = match tokio::spawn(async move { handler(ctx).await }).await {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => ClientError::Handler(format!("{e:#}")),
        Err(join_error) if join_error.is_panic() => {
            ClientError::Handler(format!("panicked: {}", panic_message(join_error.into_panic())))
        }
        Err(join_error) => ClientError::Handler(join_error.to_string()),
    };
    warn!(target: "Client/Dispatch", "Handler failed on message {message_id}: {outcome}");
    Err(outcome)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
