//! Shared fixtures: an in-memory ledger backend with scriptable failures

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use automig_core::classify::RAISE_EXCEPTION_SQLSTATE;
use automig_core::{
    ApplyOptions, Catalog, ExError, ExErrorKind, LedgerBackend, MigrationDescriptor,
    MigrationSignal, Migrator, Result, RetryPolicy,
};

#[derive(Default)]
struct FakeState {
    finished: Vec<String>,
    in_progress_failures: u32,
    load_calls: u32,
    next_apply_error: Option<ExError>,
    batches: Vec<Vec<String>>,
}

/// Ledger kept in memory
///
/// `apply_pending` appends the whole batch atomically, or nothing when a
/// scripted failure is pending.
#[derive(Default)]
pub struct FakeLedger {
    state: Mutex<FakeState>,
}

impl FakeLedger {
    pub fn with_finished(names: &[&str]) -> Self {
        let ledger = Self::default();
        ledger.state.lock().unwrap().finished = names.iter().map(|s| s.to_string()).collect();
        ledger
    }

    /// Make the next `count` bootstraps raise MIGRATION_IN_PROGRESS
    pub fn fail_in_progress(&self, count: u32) {
        self.state.lock().unwrap().in_progress_failures = count;
    }

    /// Make the next apply fail with `err` without committing
    pub fn fail_next_apply(&self, err: ExError) {
        self.state.lock().unwrap().next_apply_error = Some(err);
    }

    pub fn finished(&self) -> Vec<String> {
        self.state.lock().unwrap().finished.clone()
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().batches.clone()
    }

    pub fn load_calls(&self) -> u32 {
        self.state.lock().unwrap().load_calls
    }
}

#[async_trait]
impl LedgerBackend for FakeLedger {
    async fn load_applied_names(&self) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.load_calls += 1;
        if state.in_progress_failures > 0 {
            state.in_progress_failures -= 1;
            return Err(signal(MigrationSignal::InProgress));
        }
        Ok(state.finished.clone())
    }

    async fn apply_pending(
        &self,
        pending: &[MigrationDescriptor],
        _options: &ApplyOptions,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.next_apply_error.take() {
            return Err(err);
        }
        let names: Vec<String> = pending.iter().map(|m| m.name().to_string()).collect();
        state.finished.extend(names.iter().cloned());
        state.batches.push(names);
        Ok(())
    }
}

/// Error as the database driver would surface a raised signal
pub fn signal(signal: MigrationSignal) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_db_code(RAISE_EXCEPTION_SQLSTATE)
        .with_message(signal.message())
}

pub fn catalog(names: &[&str]) -> Arc<Catalog> {
    Arc::new(
        Catalog::new(
            names
                .iter()
                .map(|n| MigrationDescriptor::parse(*n, "SELECT 1;"))
                .collect(),
        )
        .unwrap(),
    )
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base_delay_ms: 1,
    }
}

pub fn migrator(ledger: Arc<FakeLedger>, names: &[&str]) -> Migrator<Arc<FakeLedger>> {
    Migrator::new(ledger, catalog(names), fast_retry())
}
