//! In-process remote used by the reconciler and scheduler tests.
//!
//! Behaves like a server that honours idempotency tokens: a token it has
//! already applied answers `AlreadyApplied` and leaves state untouched.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Notify, Semaphore};

use super::remote::{RemoteApi, RemoteOutcome};
use crate::queue::{EntityType, MutationOp};

/// One observed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: MutationOp,
    pub entity: String,
    pub token: String,
}

#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<HashMap<String, Value>>,
    applied: Mutex<HashSet<String>>,
    calls: Mutex<Vec<Call>>,
    scripted: Mutex<HashMap<(MutationOp, String), VecDeque<RemoteOutcome>>>,
    gate: Option<Arc<Semaphore>>,
    started: Arc<Notify>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call waits for a permit on `gate` before answering.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// Answer the next `operation` on entity `entity_id` with `outcome`.
    pub fn script(&self, operation: MutationOp, entity_id: &str, outcome: RemoteOutcome) {
        self.scripted
            .lock()
            .entry((operation, entity_id.to_string()))
            .or_default()
            .push_back(outcome);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn state(&self) -> HashMap<String, Value> {
        self.state.lock().clone()
    }

    /// Signalled whenever a call starts.
    pub fn started(&self) -> Arc<Notify> {
        Arc::clone(&self.started)
    }

    async fn handle(
        &self,
        operation: MutationOp,
        entity_type: &EntityType,
        payload: &Value,
        token: &str,
    ) -> RemoteOutcome {
        let entity_id = payload
            .get("id")
            .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
            .unwrap_or_else(|| token.to_string());
        let entity = format!("{entity_type}:{entity_id}");

        self.calls.lock().push(Call {
            operation,
            entity: entity.clone(),
            token: token.to_string(),
        });
        self.started.notify_one();

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let scripted = self
            .scripted
            .lock()
            .get_mut(&(operation, entity_id))
            .and_then(VecDeque::pop_front);
        if let Some(outcome) = scripted {
            return outcome;
        }

        if !self.applied.lock().insert(token.to_string()) {
            return RemoteOutcome::AlreadyApplied;
        }

        let mut state = self.state.lock();
        match operation {
            MutationOp::Create | MutationOp::Update => {
                state.insert(entity, payload.clone());
            },
            MutationOp::Delete => {
                state.remove(&entity);
            },
        }
        RemoteOutcome::Applied
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn create(&self, entity_type: &EntityType, payload: &Value, key: &str) -> RemoteOutcome {
        self.handle(MutationOp::Create, entity_type, payload, key).await
    }

    async fn update(&self, entity_type: &EntityType, payload: &Value, key: &str) -> RemoteOutcome {
        self.handle(MutationOp::Update, entity_type, payload, key).await
    }

    async fn delete(&self, entity_type: &EntityType, payload: &Value, key: &str) -> RemoteOutcome {
        self.handle(MutationOp::Delete, entity_type, payload, key).await
    }
}
