//! Mock validation engines and collaborators for testing
//!
//! The mock engine is scripted by directive fields on the resource itself, so a
//! single factory can drive success, failure, delay, hang and panic paths in
//! the same batch:
//!
//! - `"mockDelayMs": 50` sleeps before returning
//! - `"mockFail": "message"` returns an engine error
//! - `"mockPanic": "message"` panics inside the engine
//! - `"mockErrors": 2` reports that many error-severity issues
//! - `"mockWarnings": 1` reports that many warning-severity issues

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use validator_core::{
    fingerprint, AspectResult, EngineFactory, IssueSeverity, PriorValidation, RevalidationStore,
    ValidationAspect, ValidationEngine, ValidationIssue, ValidationResult, ValidationSettings,
    ValidatorError, ValidatorResult,
};

/// Shared counters observed by every engine created from one factory
#[derive(Debug, Default)]
pub struct EngineProbe {
    engines_created: AtomicUsize,
    executions: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    order: Mutex<Vec<String>>,
}

impl EngineProbe {
    pub fn engines_created(&self) -> usize {
        self.engines_created.load(Ordering::SeqCst)
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// Highest number of engines that were executing at the same time
    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// Resource ids in the order the engines started executing them
    pub fn execution_order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    fn enter(&self, resource_id: Option<String>) {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        self.order
            .lock()
            .unwrap()
            .push(resource_id.unwrap_or_default());
    }

    fn exit(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock engine; one instance per worker thread
pub struct MockEngine {
    probe: Arc<EngineProbe>,
    base_delay: Duration,
}

impl ValidationEngine for MockEngine {
    fn execute(
        &mut self,
        resource: &serde_json::Value,
        resource_type: &str,
        settings: &ValidationSettings,
        _fhir_version: Option<&str>,
    ) -> ValidatorResult<ValidationResult> {
        let resource_id = fingerprint::resource_id(resource);
        self.probe.enter(resource_id.clone());
        let _guard = ExitGuard(&self.probe);

        let delay = resource
            .get("mockDelayMs")
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis)
            .unwrap_or(self.base_delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        if let Some(message) = resource.get("mockPanic").and_then(|v| v.as_str()) {
            panic!("{}", message);
        }
        if let Some(message) = resource.get("mockFail").and_then(|v| v.as_str()) {
            return Err(ValidatorError::engine_error(message));
        }

        let count = |key: &str| resource.get(key).and_then(|v| v.as_u64()).unwrap_or(0);
        let mut issues = Vec::new();
        for i in 0..count("mockErrors") {
            issues.push(
                ValidationIssue::new(
                    IssueSeverity::Error,
                    ValidationAspect::Structural,
                    "mock-error",
                    format!("mock error {i}"),
                )
                .at(format!("{resource_type}.field{i}")),
            );
        }
        for i in 0..count("mockWarnings") {
            issues.push(ValidationIssue::new(
                IssueSeverity::Warning,
                ValidationAspect::Terminology,
                "mock-warning",
                format!("mock warning {i}"),
            ));
        }

        let aspects = settings
            .enabled_aspects()
            .into_iter()
            .map(|aspect| {
                let issue_count = issues
                    .iter()
                    .filter(|issue| issue.aspect == Some(aspect))
                    .count();
                AspectResult {
                    aspect,
                    enabled: true,
                    is_valid: issue_count == 0,
                    issue_count,
                    duration_ms: 0,
                }
            })
            .collect();

        let mut result = ValidationResult::from_issues(
            resource_type,
            resource_id,
            issues,
            aspects,
            settings.strict_mode,
        );
        result.duration_ms = delay.as_millis() as u64;
        Ok(result)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

struct ExitGuard<'a>(&'a EngineProbe);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.0.exit();
    }
}

/// Factory producing [`MockEngine`]s that share one [`EngineProbe`]
#[derive(Clone, Default)]
pub struct MockEngineFactory {
    probe: Arc<EngineProbe>,
    base_delay: Duration,
    startup_delay: Duration,
    failing_creations: Arc<AtomicUsize>,
}

impl MockEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every execution sleeps at least this long unless the resource overrides it
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Every engine creation sleeps this long, like an engine loading its packages
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// The next `count` engine creations fail
    pub fn failing_creations(self, count: usize) -> Self {
        self.failing_creations.store(count, Ordering::SeqCst);
        self
    }

    pub fn probe(&self) -> Arc<EngineProbe> {
        Arc::clone(&self.probe)
    }
}

impl EngineFactory for MockEngineFactory {
    fn create(&self) -> ValidatorResult<Box<dyn ValidationEngine>> {
        if !self.startup_delay.is_zero() {
            std::thread::sleep(self.startup_delay);
        }
        let should_fail = self
            .failing_creations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(ValidatorError::engine_error("mock engine creation failed"));
        }

        self.probe.engines_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockEngine {
            probe: Arc::clone(&self.probe),
            base_delay: self.base_delay,
        }))
    }
}

/// In-memory revalidation store keyed by `(resource_type, resource_id)`
#[derive(Debug, Clone, Default)]
pub struct MockRevalidationStore {
    records: Arc<Mutex<HashMap<(String, String), PriorValidation>>>,
    lookups: Arc<AtomicUsize>,
}

impl MockRevalidationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, resource_type: &str, resource_id: &str, prior: PriorValidation) {
        self.records
            .lock()
            .unwrap()
            .insert((resource_type.to_string(), resource_id.to_string()), prior);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RevalidationStore for MockRevalidationStore {
    async fn load_prior(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> ValidatorResult<Option<PriorValidation>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(resource_type.to_string(), resource_id.to_string()))
            .cloned())
    }
}
