//! Intra-request batch coalescing.
//!
//! One coalescer exists per (batching field, request). Contexts accumulate
//! while a scheduling tick is open; the tick closes once every sibling that
//! could enqueue has done so, and the accumulated batch is delivered to
//! `batch_resolve` exactly once, in arrival order.

use crate::error::SingleViaductError;
use crate::error::ViaductError;
use crate::execution::context::ResolverContext;
use crate::execution::value::FieldValue;
use crate::registry::FieldEntry;
use crate::registry::ResolverInstance;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;

struct BatchItem {
    ctx: ResolverContext,
    reply: oneshot::Sender<FieldValue>,
}

pub(crate) struct BatchCoalescer {
    entry: Arc<FieldEntry>,
    pending: Mutex<Vec<BatchItem>>,
}

impl BatchCoalescer {
    pub(crate) fn new(entry: Arc<FieldEntry>) -> Arc<Self> {
        Arc::new(BatchCoalescer {
            entry,
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Adds a context to the open tick. The receiver settles when the tick
    /// is flushed.
    pub(crate) fn enqueue(&self, ctx: ResolverContext) -> oneshot::Receiver<FieldValue> {
        let (reply, receiver) = oneshot::channel();
        self.pending.lock().push(BatchItem { ctx, reply });
        receiver
    }

    /// Closes the tick: constructs one resolver instance and delivers the
    /// accumulated contexts in arrival order. The contract requires the
    /// returned list to match the input positionally; a violation or a
    /// batch-level failure fails every context in the batch.
    pub(crate) async fn flush(&self) {
        let items: Vec<BatchItem> = std::mem::take(&mut *self.pending.lock());
        if items.is_empty() {
            return;
        }
        let coordinate = self.entry.coordinate.to_string();
        let (ctxs, replies): (Vec<ResolverContext>, Vec<oneshot::Sender<FieldValue>>) =
            items.into_iter().map(|item| (item.ctx, item.reply)).unzip();
        let expected = replies.len();

        let values = match self.invoke(ctxs, expected, &coordinate).await {
            Ok(values) => values,
            Err(error) => {
                let failure = FieldValue::Error(error);
                for reply in replies {
                    let _ = reply.send(failure.clone());
                }
                return;
            }
        };
        for (reply, value) in replies.into_iter().zip(values) {
            let _ = reply.send(value);
        }
    }

    async fn invoke(
        &self,
        ctxs: Vec<ResolverContext>,
        expected: usize,
        coordinate: &str,
    ) -> Result<Vec<FieldValue>, ViaductError> {
        let instance = self.entry.instantiate()?;
        let resolver = match instance {
            ResolverInstance::Batched(resolver) => resolver,
            ResolverInstance::Unary(_) => {
                return Err(SingleViaductError::BatchResolverContractError {
                    coordinate: coordinate.to_owned(),
                    message: "provider returned a unary resolver for a batched field".to_owned(),
                }
                .into());
            }
        };
        let values = resolver.batch_resolve(ctxs).await.map_err(|error| {
            ViaductError::from(SingleViaductError::ResolverError {
                coordinate: coordinate.to_owned(),
                message: error.to_string(),
            })
        })?;
        if values.len() != expected {
            return Err(SingleViaductError::BatchResolverContractError {
                coordinate: coordinate.to_owned(),
                message: format!(
                    "batch returned {} values for {} contexts",
                    values.len(),
                    expected,
                ),
            }
            .into());
        }
        Ok(values)
    }
}
