//! In-memory capability driven by a per-key script, for scheduler tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{AttemptOutcome, ExecutionContext, RetrievalCapability, RetrievalHost, RetrievalRequest};
use crate::error::RetrievalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scripted {
    Success,
    NotFound,
    Transient,
}

type Script = dyn Fn(&str) -> Scripted + Send + Sync;

#[derive(Default)]
pub struct Counters {
    pub launches: AtomicUsize,
    pub contexts_created: AtomicUsize,
    pub context_failures: AtomicUsize,
    pub recoveries: AtomicUsize,
    pub disposed: AtomicUsize,
    pub attempts: Mutex<HashMap<String, usize>>,
}

impl Counters {
    pub fn attempts_for(&self, key: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

pub struct ScriptedCapability {
    script: Arc<Script>,
    pub counters: Arc<Counters>,
    /// The first N `create_context` calls fail.
    failing_contexts: usize,
    recover_fails: bool,
    /// Attempting this key drops the host's connection.
    disconnect_on: Option<String>,
    /// When set, every attempt waits for a permit.
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedCapability {
    pub fn new(script: impl Fn(&str) -> Scripted + Send + Sync + 'static) -> Self {
        Self {
            script: Arc::new(script),
            counters: Arc::new(Counters::default()),
            failing_contexts: 0,
            recover_fails: false,
            disconnect_on: None,
            gate: None,
        }
    }

    pub fn failing_contexts(mut self, n: usize) -> Self {
        self.failing_contexts = n;
        self
    }

    pub fn recover_fails(mut self) -> Self {
        self.recover_fails = true;
        self
    }

    pub fn disconnect_on(mut self, key: &str) -> Self {
        self.disconnect_on = Some(key.to_string());
        self
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait]
impl RetrievalCapability for ScriptedCapability {
    async fn launch(&self, request: &RetrievalRequest) -> Result<Box<dyn RetrievalHost>, RetrievalError> {
        self.counters.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedHost {
            script: Arc::clone(&self.script),
            counters: Arc::clone(&self.counters),
            failing_contexts: self.failing_contexts,
            recover_fails: self.recover_fails,
            disconnect_on: self.disconnect_on.clone(),
            gate: self.gate.clone(),
            staging: request.staging_dir.clone(),
            connected: Arc::new(AtomicBool::new(true)),
        }))
    }
}

struct ScriptedHost {
    script: Arc<Script>,
    counters: Arc<Counters>,
    failing_contexts: usize,
    recover_fails: bool,
    disconnect_on: Option<String>,
    gate: Option<Arc<Semaphore>>,
    staging: std::path::PathBuf,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl RetrievalHost for ScriptedHost {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn create_context(&self) -> Result<Box<dyn ExecutionContext>, RetrievalError> {
        let failures = self.counters.context_failures.load(Ordering::SeqCst);
        if failures < self.failing_contexts {
            self.counters.context_failures.fetch_add(1, Ordering::SeqCst);
            return Err(RetrievalError::ContextUnavailable("scripted failure".into()));
        }
        self.counters.contexts_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedContext {
            script: Arc::clone(&self.script),
            counters: Arc::clone(&self.counters),
            recover_fails: self.recover_fails,
            disconnect_on: self.disconnect_on.clone(),
            gate: self.gate.clone(),
            staging: self.staging.clone(),
            connected: Arc::clone(&self.connected),
        }))
    }

    async fn shutdown(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

struct ScriptedContext {
    script: Arc<Script>,
    counters: Arc<Counters>,
    recover_fails: bool,
    disconnect_on: Option<String>,
    gate: Option<Arc<Semaphore>>,
    staging: std::path::PathBuf,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl ExecutionContext for ScriptedContext {
    async fn attempt(&mut self, key: &str) -> AttemptOutcome {
        if let Some(gate) = &self.gate
            && let Ok(permit) = gate.acquire().await
        {
            permit.forget();
        }
        *self
            .counters
            .attempts
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default() += 1;

        if self.disconnect_on.as_deref() == Some(key) {
            self.connected.store(false, Ordering::SeqCst);
        }

        match (self.script)(key) {
            Scripted::Success => {
                // Pool-only tests run without a staging directory; the write just fails there.
                let _ = tokio::fs::write(self.staging.join(format!("{key}.pdf")), key.as_bytes()).await;
                AttemptOutcome::Success
            }
            Scripted::NotFound => AttemptOutcome::NotFound,
            Scripted::Transient => AttemptOutcome::Transient(RetrievalError::UnexpectedStatus(503)),
        }
    }

    async fn recover(&mut self) -> Result<(), RetrievalError> {
        self.counters.recoveries.fetch_add(1, Ordering::SeqCst);
        if self.recover_fails {
            return Err(RetrievalError::RecoveryFailed("scripted failure".into()));
        }
        Ok(())
    }

    async fn dispose(&mut self) {
        self.counters.disposed.fetch_add(1, Ordering::SeqCst);
    }
}
