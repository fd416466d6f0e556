use crate::error::ErrorLocation;
use crate::error::ResponsePath;
use crate::error::SingleViaductError;
use crate::error::ViaductError;
use crate::global_id::GlobalId;
use apollo_compiler::schema::Name;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Memoization key: the field name plus the canonical fingerprint of its
/// coerced arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CellKey {
    pub field: Name,
    pub fingerprint: String,
}

impl CellKey {
    pub(crate) fn new(field: Name, fingerprint: String) -> Self {
        CellKey { field, fingerprint }
    }
}

/// A resolved value inside the engine: the response shape with object
/// subtrees still held as engine-result nodes so downstream selections
/// deduplicate against them.
#[derive(Clone)]
pub(crate) enum EngineValue {
    Null,
    Leaf(JsonValue),
    List(Vec<EngineValue>),
    Object(Arc<ObjectEngineResult>),
}

/// A failure attributed to a field, with the response coordinates needed to
/// report it.
#[derive(Debug, Clone)]
pub(crate) struct FieldFailure {
    pub error: Arc<ViaductError>,
    pub path: ResponsePath,
    pub location: Option<ErrorLocation>,
}

impl FieldFailure {
    pub(crate) fn new(
        error: ViaductError,
        path: ResponsePath,
        location: Option<ErrorLocation>,
    ) -> Self {
        FieldFailure {
            error: Arc::new(error),
            path,
            location,
        }
    }

    pub(crate) fn cancelled(path: ResponsePath) -> Self {
        FieldFailure::new(SingleViaductError::Cancelled.into(), path, None)
    }
}

pub(crate) type FieldOutcome = Result<EngineValue, FieldFailure>;

enum CellState {
    Pending(Vec<oneshot::Sender<FieldOutcome>>),
    Done(FieldOutcome),
}

/// What a caller holds after asking for a cell: it either started the
/// computation (and owes a `complete`), can read a settled outcome, or
/// waits for the starter to finish.
pub(crate) enum CellClaim {
    Started,
    Ready(FieldOutcome),
    Wait(oneshot::Receiver<FieldOutcome>),
}

/// Per-request, per-logical-object memoized result node.
///
/// Each cell is computed at most once: the first claim installs a pending
/// slot, concurrent claims attach to it, and completion is exactly-once with
/// waiters woken in registration order. `backing` carries the values the
/// producing resolver returned inline for this object; node-reference
/// objects start with just their id.
pub struct ObjectEngineResult {
    type_name: Name,
    backing: JsonMap<String, JsonValue>,
    node_id: Option<GlobalId>,
    cells: Mutex<IndexMap<CellKey, CellState>>,
}

impl ObjectEngineResult {
    pub(crate) fn new(type_name: Name) -> Arc<Self> {
        Self::seeded(type_name, JsonMap::new())
    }

    pub(crate) fn seeded(type_name: Name, backing: JsonMap<String, JsonValue>) -> Arc<Self> {
        Arc::new(ObjectEngineResult {
            type_name,
            backing,
            node_id: None,
            cells: Mutex::new(IndexMap::new()),
        })
    }

    pub(crate) fn node(type_name: Name, id: GlobalId, encoded_id: String) -> Arc<Self> {
        let mut backing = JsonMap::new();
        backing.insert("id".to_owned(), JsonValue::String(encoded_id));
        Arc::new(ObjectEngineResult {
            type_name,
            backing,
            node_id: Some(id),
            cells: Mutex::new(IndexMap::new()),
        })
    }

    pub(crate) fn type_name(&self) -> &Name {
        &self.type_name
    }

    pub(crate) fn node_id(&self) -> Option<&GlobalId> {
        self.node_id.as_ref()
    }

    pub(crate) fn backing_value(&self, field: &str) -> Option<JsonValue> {
        self.backing.get(field).cloned()
    }

    /// Atomic get-or-start. The first claim on a key owes a matching
    /// [`complete`](Self::complete).
    pub(crate) fn claim(&self, key: &CellKey) -> CellClaim {
        let mut cells = self.cells.lock();
        match cells.get_mut(key) {
            None => {
                cells.insert(key.clone(), CellState::Pending(Vec::new()));
                CellClaim::Started
            }
            Some(CellState::Pending(waiters)) => {
                let (sender, receiver) = oneshot::channel();
                waiters.push(sender);
                CellClaim::Wait(receiver)
            }
            Some(CellState::Done(outcome)) => CellClaim::Ready(outcome.clone()),
        }
    }

    /// Transitions a pending cell to its terminal outcome and wakes waiters
    /// in registration order. Completing a settled cell is a no-op.
    pub(crate) fn complete(&self, key: &CellKey, outcome: FieldOutcome) {
        let waiters = {
            let mut cells = self.cells.lock();
            match cells.get_mut(key) {
                Some(state @ CellState::Pending(_)) => {
                    let CellState::Pending(waiters) =
                        std::mem::replace(state, CellState::Done(outcome.clone()))
                    else {
                        unreachable!("matched pending above");
                    };
                    waiters
                }
                Some(CellState::Done(_)) => return,
                None => {
                    cells.insert(key.clone(), CellState::Done(outcome.clone()));
                    return;
                }
            }
        };
        for waiter in waiters {
            // A dropped receiver just means the awaiter went away.
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Suspends until the cell settles. Must only be called for keys some
    /// caller has started or will start.
    pub(crate) async fn wait(&self, key: &CellKey, path: ResponsePath) -> FieldOutcome {
        match self.claim(key) {
            CellClaim::Ready(outcome) => outcome,
            CellClaim::Wait(receiver) => receiver
                .await
                .unwrap_or_else(|_| Err(FieldFailure::cancelled(path))),
            CellClaim::Started => {
                // The caller raced a computation it did not intend to own;
                // settle the slot so nobody hangs on it.
                let failure = FieldFailure::new(
                    ViaductError::internal("awaited an engine-result cell that was never started"),
                    path,
                    None,
                );
                self.complete(key, Err(failure.clone()));
                Err(failure)
            }
        }
    }

    /// Reads a settled outcome without suspending.
    pub(crate) fn peek(&self, key: &CellKey) -> Option<FieldOutcome> {
        let cells = self.cells.lock();
        match cells.get(key) {
            Some(CellState::Done(outcome)) => Some(outcome.clone()),
            _ => None,
        }
    }

    /// Fails every pending cell with the cancellation kind. Settled cells
    /// are untouched.
    pub(crate) fn cancel_pending(&self) {
        let pending: Vec<CellKey> = {
            let cells = self.cells.lock();
            cells
                .iter()
                .filter_map(|(key, state)| {
                    matches!(state, CellState::Pending(_)).then(|| key.clone())
                })
                .collect()
        };
        for key in pending {
            self.complete(&key, Err(FieldFailure::cancelled(Vec::new())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apollo_compiler::name;

    fn key(field: &str) -> CellKey {
        CellKey::new(
            Name::new(field).expect("valid name"),
            String::new(),
        )
    }

    #[tokio::test]
    async fn first_claim_starts_then_waiters_share_the_outcome() {
        let oer = ObjectEngineResult::new(name!("Query"));
        let k = key("field");
        assert!(matches!(oer.claim(&k), CellClaim::Started));
        let CellClaim::Wait(waiter) = oer.claim(&k) else {
            panic!("second claim should wait");
        };
        oer.complete(&k, Ok(EngineValue::Leaf(JsonValue::from(1))));
        let outcome = waiter.await.expect("starter completed");
        assert!(matches!(outcome, Ok(EngineValue::Leaf(_))));
        assert!(matches!(oer.claim(&k), CellClaim::Ready(_)));
    }

    #[tokio::test]
    async fn completion_is_exactly_once() {
        let oer = ObjectEngineResult::new(name!("Query"));
        let k = key("field");
        assert!(matches!(oer.claim(&k), CellClaim::Started));
        oer.complete(&k, Ok(EngineValue::Leaf(JsonValue::from(1))));
        oer.complete(&k, Ok(EngineValue::Leaf(JsonValue::from(2))));
        let Some(Ok(EngineValue::Leaf(value))) = oer.peek(&k) else {
            panic!("cell should be settled with a leaf");
        };
        assert_eq!(value, JsonValue::from(1));
    }

    #[tokio::test]
    async fn waiters_wake_in_registration_order() {
        let oer = ObjectEngineResult::new(name!("Query"));
        let k = key("field");
        assert!(matches!(oer.claim(&k), CellClaim::Started));
        let mut waiters = Vec::new();
        for _ in 0..3 {
            match oer.claim(&k) {
                CellClaim::Wait(receiver) => waiters.push(receiver),
                _ => panic!("expected wait"),
            }
        }
        oer.complete(&k, Ok(EngineValue::Null));
        for waiter in waiters {
            assert!(waiter.await.is_ok());
        }
    }

    #[tokio::test]
    async fn cancel_fails_pending_cells_only() {
        let oer = ObjectEngineResult::new(name!("Query"));
        let settled = key("settled");
        let pending = key("pending");
        assert!(matches!(oer.claim(&settled), CellClaim::Started));
        oer.complete(&settled, Ok(EngineValue::Null));
        assert!(matches!(oer.claim(&pending), CellClaim::Started));
        oer.cancel_pending();
        let Some(Err(failure)) = oer.peek(&pending) else {
            panic!("pending cell should be cancelled");
        };
        assert!(matches!(
            failure.error.primary(),
            SingleViaductError::Cancelled,
        ));
        assert!(matches!(oer.peek(&settled), Some(Ok(_))));
    }
}
