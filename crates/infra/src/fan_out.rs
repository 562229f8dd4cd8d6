//! Concurrent fan-out of per-attribute mutations.
//!
//! An address is denormalized into two tables, so one logical change turns
//! into many independent row statements. Building the statement list
//! ([`MutationPlan`]) is kept apart from running it ([`FanOut`]), so a batched
//! or atomic executor can replace the concurrent one without touching the
//! repository.
//!
//! ## Failure semantics
//!
//! - Every planned statement runs to completion, even after another fails.
//! - Failures are collected into one [`FanOutError`], one message per line.
//! - Nothing is rolled back: a failed fan-out can leave the primary and index
//!   tables disagreeing until the address is rewritten or deleted.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use address_core::Address;

use crate::config::StoreConfig;
use crate::session::{Session, Statement};
use crate::tables::{AddressIndexTable, AddressKey, AddressTable};

/// Ordered list of independent statements for one logical change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationPlan {
    statements: Vec<Statement>,
}

impl MutationPlan {
    /// Write every attribute to both tables: `2 × n` inserts.
    pub fn write(key: &AddressKey, address: &Address) -> Self {
        let mut plan = Self::default();
        plan.push_writes(key, address);
        plan
    }

    /// Remove an address: one primary range delete plus one index delete per
    /// attribute name, `1 + n` statements.
    pub fn delete<'a, I>(key: &AddressKey, names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut statements = vec![AddressTable::delete_address(key)];
        statements.extend(
            names
                .into_iter()
                .map(|name| AddressIndexTable::delete_attribute(key, name)),
        );
        Self { statements }
    }

    /// Turn `current` into `desired` in a single fan-out.
    ///
    /// Names only in `current` are deleted from both tables; every entry of
    /// `desired` is written to both tables. Inserts overwrite, so names
    /// present in both maps are never absent from the store mid-update.
    pub fn reconcile(key: &AddressKey, current: &Address, desired: &Address) -> Self {
        let diff = current.diff(desired);
        let mut plan = Self::default();
        for name in &diff.removed {
            plan.statements.push(AddressTable::delete_attribute(key, name));
            plan.statements
                .push(AddressIndexTable::delete_attribute(key, name));
        }
        plan.push_writes(key, &diff.upserted);
        plan
    }

    fn push_writes(&mut self, key: &AddressKey, address: &Address) {
        for (name, value) in address.iter() {
            self.statements.push(AddressTable::insert(key, name, value));
            self.statements
                .push(AddressIndexTable::insert(key, name, value));
        }
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }
}

/// Aggregated failure of one fan-out.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{}", .failures.join("\n"))]
pub struct FanOutError {
    /// One message per failed statement.
    pub failures: Vec<String>,
    /// Number of statements that were scheduled.
    pub attempted: usize,
}

/// Runs every statement of a plan concurrently and waits for all of them.
#[derive(Debug, Clone, Copy)]
pub struct FanOut {
    max_in_flight: usize,
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new(StoreConfig::default().fan_out_concurrency)
    }
}

impl FanOut {
    /// `max_in_flight` bounds concurrently running statements (minimum 1).
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.fan_out_concurrency)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Execute `plan` against `session`.
    ///
    /// Returns `Ok(())` only if every statement succeeded.
    pub async fn run<S>(&self, session: &Arc<S>, plan: MutationPlan) -> Result<(), FanOutError>
    where
        S: Session + ?Sized,
    {
        let attempted = plan.len();
        if attempted == 0 {
            return Ok(());
        }
        debug!(statements = attempted, max_in_flight = self.max_in_flight, "fan-out started");

        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();

        for statement in plan.statements {
            let session = Arc::clone(session);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| format!("{statement}: no fan-out permit: {e}"))?;
                let description = statement.to_string();
                session
                    .execute(statement)
                    .await
                    .map_err(|e| format!("{description}: {e}"))
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(message)) => failures.push(message),
                Err(e) => failures.push(format!("fan-out task did not complete: {e}")),
            }
        }

        if failures.is_empty() {
            debug!(statements = attempted, "fan-out completed");
            return Ok(());
        }

        warn!(
            failed = failures.len(),
            attempted, "fan-out completed with failures"
        );
        Err(FanOutError {
            failures,
            attempted,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::session::{AttributeRow, InMemorySession, SessionError, TableName};
    use address_core::{AddressId, ApplicationId, TenantId};

    fn key() -> AddressKey {
        AddressKey::new(TenantId::new(), ApplicationId::new(), AddressId::new())
    }

    fn sample() -> Address {
        Address::from_iter([("City", "Christchurch"), ("Line1", "1 Cathedral Sq"), ("Postcode", "8013")])
    }

    #[test]
    fn write_plan_has_two_statements_per_attribute() {
        let plan = MutationPlan::write(&key(), &sample());
        assert_eq!(plan.len(), 6);

        let index_inserts = plan
            .statements()
            .iter()
            .filter(|s| s.table() == TableName::AddressIndex)
            .count();
        assert_eq!(index_inserts, 3);
    }

    #[test]
    fn delete_plan_has_one_range_delete_plus_one_per_attribute() {
        let address = sample();
        let plan = MutationPlan::delete(&key(), address.keys());
        assert_eq!(plan.len(), 4);

        let primary: Vec<_> = plan
            .statements()
            .iter()
            .filter(|s| s.table() == TableName::Address)
            .collect();
        assert_eq!(primary.len(), 1);
    }

    #[test]
    fn reconcile_plan_deletes_only_dropped_names() {
        let desired = Address::from_iter([("Postcode", "8011"), ("Country", "NZ")]);
        let plan = MutationPlan::reconcile(&key(), &sample(), &desired);

        // City and Line1 dropped (2 × 2 deletes), two desired entries (2 × 2 inserts).
        assert_eq!(plan.len(), 8);
        let deletes: Vec<_> = plan
            .statements()
            .iter()
            .filter(|s| s.kind() == "delete")
            .collect();
        assert_eq!(deletes.len(), 4);
        assert!(deletes.iter().all(|s| !s.touches_key("Postcode")));
    }

    #[tokio::test]
    async fn empty_plan_is_a_no_op() {
        let session = Arc::new(InMemorySession::new());
        FanOut::default()
            .run(&session, MutationPlan::default())
            .await
            .unwrap();
        assert_eq!(session.statement_count(), 0);
    }

    #[tokio::test]
    async fn all_statements_run_and_land_in_both_tables() {
        let session = Arc::new(InMemorySession::new());
        let key = key();

        FanOut::new(2)
            .run(&session, MutationPlan::write(&key, &sample()))
            .await
            .unwrap();

        assert_eq!(session.statement_count(), 6);
        assert_eq!(
            session
                .rows(TableName::Address, key.tenant_id, key.application_id)
                .len(),
            3
        );
        assert_eq!(
            session
                .rows(TableName::AddressIndex, key.tenant_id, key.application_id)
                .len(),
            3
        );
    }

    #[tokio::test]
    async fn failures_are_aggregated_without_stopping_or_rolling_back() {
        let session = Arc::new(InMemorySession::new());
        session.fail_statements_for_key("City");
        session.fail_statements_for_key("Postcode");
        let key = key();

        let err = FanOut::default()
            .run(&session, MutationPlan::write(&key, &sample()))
            .await
            .unwrap_err();

        assert_eq!(err.attempted, 6);
        assert_eq!(err.failures.len(), 4);
        assert_eq!(err.to_string().lines().count(), 4);
        assert_eq!(session.statement_count(), 6);

        // The healthy attribute was written to both tables and stays there.
        let primary = session.rows(TableName::Address, key.tenant_id, key.application_id);
        let index = session.rows(TableName::AddressIndex, key.tenant_id, key.application_id);
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].address_key, "Line1");
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn one_table_failing_leaves_the_other_written() {
        let session = Arc::new(InMemorySession::new());
        session.fail_table(TableName::AddressIndex);
        let key = key();

        let err = FanOut::default()
            .run(&session, MutationPlan::write(&key, &sample()))
            .await
            .unwrap_err();

        assert_eq!(err.failures.len(), 3);
        assert_eq!(
            session
                .rows(TableName::Address, key.tenant_id, key.application_id)
                .len(),
            3
        );
    }

    #[tokio::test]
    async fn failure_lines_name_each_statement_once() {
        let session = Arc::new(InMemorySession::new());
        session.fail_statements_for_key("City");

        let err = FanOut::default()
            .run(&session, MutationPlan::write(&key(), &sample()))
            .await
            .unwrap_err();

        for line in err.to_string().lines() {
            assert_eq!(line.matches("insert into").count(), 1, "{line}");
            assert!(line.ends_with("injected failure on key City"), "{line}");
        }
    }

    /// Holds every statement for a while and records the peak overlap.
    #[derive(Default)]
    struct SlowSession {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        executed: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Session for SlowSession {
        async fn execute(&self, _statement: Statement) -> Result<(), SessionError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.executed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn query(&self, _statement: Statement) -> Result<Vec<AttributeRow>, SessionError> {
            Ok(Vec::new())
        }
    }

    fn wide_address(attributes: usize) -> Address {
        (0..attributes)
            .map(|i| (format!("Line{i}"), format!("value {i}")))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_flight_statements_never_exceed_the_bound() {
        let session = Arc::new(SlowSession::default());

        FanOut::new(3)
            .run(&session, MutationPlan::write(&key(), &wide_address(6)))
            .await
            .unwrap();

        assert_eq!(session.executed.load(Ordering::SeqCst), 12);
        let peak = session.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak {peak}");
        assert!(peak > 1, "statements ran one at a time");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn a_bound_of_one_serializes_statements() {
        let session = Arc::new(SlowSession::default());

        FanOut::new(1)
            .run(&session, MutationPlan::write(&key(), &wide_address(2)))
            .await
            .unwrap();

        assert_eq!(session.executed.load(Ordering::SeqCst), 4);
        assert_eq!(session.peak.load(Ordering::SeqCst), 1);
    }

    /// Panics on statements for one attribute name, succeeds otherwise.
    struct PanickingSession {
        key: &'static str,
    }

    #[async_trait::async_trait]
    impl Session for PanickingSession {
        async fn execute(&self, statement: Statement) -> Result<(), SessionError> {
            if statement.touches_key(self.key) {
                panic!("session crashed on {}", self.key);
            }
            Ok(())
        }

        async fn query(&self, _statement: Statement) -> Result<Vec<AttributeRow>, SessionError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn panicked_statement_counts_as_a_failure() {
        let session = Arc::new(PanickingSession { key: "City" });

        let err = FanOut::default()
            .run(&session, MutationPlan::write(&key(), &sample()))
            .await
            .unwrap_err();

        assert_eq!(err.attempted, 6);
        assert_eq!(err.failures.len(), 2);
        assert!(
            err.failures
                .iter()
                .all(|f| f.starts_with("fan-out task did not complete"))
        );
    }

    #[test]
    fn concurrency_is_at_least_one() {
        assert_eq!(FanOut::new(0).max_in_flight(), 1);
        assert_eq!(
            FanOut::from_config(&StoreConfig::default().with_fan_out_concurrency(4)).max_in_flight(),
            4
        );
    }
}
