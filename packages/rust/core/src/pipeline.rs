//! End-to-end backfill: scan → collect keys → resolve → update.

use std::fmt;
use std::time::Instant;

use backfill_shared::{BackfillConfig, Result};
use backfill_storage::DocumentStore;
use tracing::{debug, info, instrument};

use crate::{keys, resolver, scanner, updater};

/// Where a run is. `Done` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Scanned,
    KeysCollected,
    Resolved,
    Updated,
    Done,
    Error,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Error)
    }

    /// Legal forward edges. `Resolved → Done` is the dry-run path.
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        match (self, next) {
            (Done | Error, _) => false,
            (_, Error) => true,
            (Init, Scanned)
            | (Scanned, KeysCollected)
            | (KeysCollected, Resolved)
            | (Resolved, Updated)
            | (Resolved, Done)
            | (Updated, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::Scanned => "scanned",
            Stage::KeysCollected => "keys-collected",
            Stage::Resolved => "resolved",
            Stage::Updated => "updated",
            Stage::Done => "done",
            Stage::Error => "error",
        };
        f.write_str(name)
    }
}

/// Result of a backfill run.
#[derive(Debug)]
pub struct BackfillResult {
    /// Records read from the source collection.
    pub scanned: usize,
    /// Records missing the target attribute with a usable owner key.
    pub qualifying: usize,
    /// Distinct owner keys looked up.
    pub distinct_keys: usize,
    /// Owner keys that resolved to a value.
    pub resolved_keys: usize,
    /// Updates queued in the bulk write.
    pub planned: usize,
    /// Updates committed (0 on a dry run).
    pub updated: usize,
    pub dry_run: bool,
    /// Final stage reached.
    pub stage: Stage,
    /// Total elapsed time.
    pub elapsed: std::time::Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called for every update queued in the bulk write.
    fn update_queued(&self, record: &str, owner_key: &str, value: &str);
    /// Called when the pipeline completes.
    fn done(&self, result: &BackfillResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn update_queued(&self, _record: &str, _owner_key: &str, _value: &str) {}
    fn done(&self, _result: &BackfillResult) {}
}

/// Tracks the current stage and rejects illegal transitions.
struct StageTracker {
    current: Stage,
}

impl StageTracker {
    fn advance(&mut self, next: Stage) {
        debug_assert!(
            self.current.can_advance_to(next),
            "illegal stage transition {} -> {next}",
            self.current
        );
        debug!(from = %self.current, to = %next, "stage transition");
        self.current = next;
    }
}

/// Run the backfill once against `store`.
///
/// 1. Scan the source collection
/// 2. Collect owner keys of records missing the target attribute
/// 3. Resolve the keys in chunks against the reference collection
/// 4. Queue and atomically commit the updates (skipped on dry run)
///
/// The first failure aborts the run and is returned unlogged; reporting it
/// is left to the caller.
#[instrument(skip_all, fields(
    source = %config.source_collection,
    reference = %config.reference_collection,
    dry_run = config.dry_run
))]
pub async fn run_backfill(
    store: &dyn DocumentStore,
    config: &BackfillConfig,
    progress: &dyn ProgressReporter,
) -> Result<BackfillResult> {
    let start = Instant::now();
    let mut tracker = StageTracker {
        current: Stage::Init,
    };

    match run_stages(store, config, progress, &mut tracker, start).await {
        Ok(result) => {
            progress.done(&result);
            info!(
                scanned = result.scanned,
                qualifying = result.qualifying,
                resolved_keys = result.resolved_keys,
                planned = result.planned,
                updated = result.updated,
                elapsed_ms = result.elapsed.as_millis(),
                "backfill completed"
            );
            Ok(result)
        }
        Err(e) => {
            let failed_at = tracker.current;
            tracker.advance(Stage::Error);
            debug!(after = %failed_at, "backfill aborted");
            Err(e)
        }
    }
}

async fn run_stages(
    store: &dyn DocumentStore,
    config: &BackfillConfig,
    progress: &dyn ProgressReporter,
    tracker: &mut StageTracker,
    start: Instant,
) -> Result<BackfillResult> {
    let fields = &config.fields;

    // --- Scan ---
    progress.phase("Scanning source collection");
    let records = scanner::scan(store, &config.source_collection).await?;
    tracker.advance(Stage::Scanned);

    // --- Collect keys ---
    progress.phase("Collecting owner keys");
    let collected = keys::collect_keys(&records, fields);
    tracker.advance(Stage::KeysCollected);

    // --- Resolve ---
    progress.phase("Resolving owner keys");
    let resolved =
        resolver::resolve(store, &config.reference_collection, &collected.keys, fields).await?;
    tracker.advance(Stage::Resolved);

    // --- Update ---
    progress.phase("Queueing updates");
    let plan = updater::plan_updates(&records, &resolved, fields);
    let batch = updater::build_batch(&config.source_collection, &plan, fields, progress);

    let updated = if config.dry_run {
        info!(planned = plan.len(), "dry run, nothing committed");
        0
    } else {
        progress.phase("Committing updates");
        let applied = updater::commit(store, batch).await?;
        tracker.advance(Stage::Updated);
        applied
    };
    tracker.advance(Stage::Done);

    Ok(BackfillResult {
        scanned: records.len(),
        qualifying: collected.qualifying,
        distinct_keys: collected.keys.len(),
        resolved_keys: resolved.len(),
        planned: plan.len(),
        updated,
        dry_run: config.dry_run,
        stage: tracker.current,
        elapsed: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use backfill_shared::{AppConfig, BackfillError};
    use serde_json::json;

    fn config() -> BackfillConfig {
        BackfillConfig::from(&AppConfig::default())
    }

    fn scenario_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_json(
            "howtos",
            json!([
                { "id": "A", "_createdBy": "u1", "creatorCountry": null },
                { "id": "B", "_createdBy": "u2", "creatorCountry": "FR" },
                { "id": "C", "_createdBy": "u3", "creatorCountry": "" }
            ]),
        );
        store.insert_json(
            "users",
            json!([
                { "id": "x1", "userName": "u1", "country": "DE" },
                { "id": "x3", "userName": "u3", "country": null }
            ]),
        );
        store
    }

    #[test]
    fn stage_edges() {
        assert!(Stage::Init.can_advance_to(Stage::Scanned));
        assert!(Stage::Resolved.can_advance_to(Stage::Done));
        assert!(Stage::Scanned.can_advance_to(Stage::Error));
        assert!(!Stage::Init.can_advance_to(Stage::Resolved));
        assert!(!Stage::Done.can_advance_to(Stage::Error));
        assert!(!Stage::Error.can_advance_to(Stage::Init));
        assert!(Stage::Done.is_terminal() && Stage::Error.is_terminal());
        assert_eq!(Stage::KeysCollected.to_string(), "keys-collected");
    }

    #[tokio::test]
    async fn scenario_updates_only_resolvable_record() {
        let store = scenario_store();
        let result = run_backfill(&store, &config(), &SilentProgress)
            .await
            .expect("backfill");

        assert_eq!(result.scanned, 3);
        assert_eq!(result.qualifying, 2);
        assert_eq!(result.distinct_keys, 2);
        assert_eq!(result.resolved_keys, 1);
        assert_eq!(result.updated, 1);
        assert_eq!(result.stage, Stage::Done);

        let a = store.get("howtos", "A").unwrap();
        assert_eq!(a.non_empty_str("creatorCountry"), Some("DE"));
        let b = store.get("howtos", "B").unwrap();
        assert_eq!(b.non_empty_str("creatorCountry"), Some("FR"));
        let c = store.get("howtos", "C").unwrap();
        assert!(c.is_blank("creatorCountry"));
        assert_eq!(store.lookups(), vec![2]);
    }

    #[tokio::test]
    async fn second_run_changes_nothing() {
        let store = scenario_store();
        run_backfill(&store, &config(), &SilentProgress).await.unwrap();
        let before = store.scan("howtos").await.unwrap();

        let again = run_backfill(&store, &config(), &SilentProgress).await.unwrap();
        assert_eq!(again.qualifying, 1);
        assert_eq!(again.updated, 0);
        assert_eq!(store.scan("howtos").await.unwrap(), before);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn dry_run_commits_nothing() {
        let store = scenario_store();
        let cfg = BackfillConfig {
            dry_run: true,
            ..config()
        };
        let result = run_backfill(&store, &cfg, &SilentProgress).await.unwrap();

        assert!(result.dry_run);
        assert_eq!(result.planned, 1);
        assert_eq!(result.updated, 0);
        assert_eq!(result.stage, Stage::Done);
        assert_eq!(store.commit_count(), 0);
        assert!(store.get("howtos", "A").unwrap().is_blank("creatorCountry"));
    }

    #[tokio::test]
    async fn resolver_failure_aborts_before_commit() {
        let store = MemoryStore {
            fail_lookup_at: Some(0),
            ..scenario_store()
        };
        let err = run_backfill(&store, &config(), &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, BackfillError::Read(_)));
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn commit_failure_is_reported() {
        let store = MemoryStore {
            fail_commit: true,
            ..scenario_store()
        };
        let err = run_backfill(&store, &config(), &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, BackfillError::Commit(_)));
    }

    #[tokio::test]
    async fn fatal_error_is_left_to_the_caller() {
        let (errors, _guard) = crate::testing::capture_errors();
        let store = MemoryStore {
            fail_commit: true,
            ..scenario_store()
        };
        run_backfill(&store, &config(), &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(errors.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_source_reaches_done() {
        let store = MemoryStore::new();
        let result = run_backfill(&store, &config(), &SilentProgress).await.unwrap();
        assert_eq!(result.scanned, 0);
        assert_eq!(result.updated, 0);
        assert_eq!(result.stage, Stage::Done);
        assert!(store.lookups().is_empty());
    }
}
