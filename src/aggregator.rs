use std::sync::atomic::{AtomicUsize, Ordering};

use futures::{stream, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    client::{DirectoryClient, MembershipClient, RepoType, RepositoryQuery},
    error::{AuditError, ErrorKind},
    filter::PathPrefixFilter,
    model::{AccessIndex, AccessRecord, Repository, Visibility},
};

/// What to audit: which lifecycle states to list and which paths to keep.
#[derive(Clone, Debug)]
pub struct AuditRequest {
    pub filter: PathPrefixFilter,
    pub include_active: bool,
    pub include_archived: bool,
    pub repo_type: RepoType,
    pub visibility: Option<Visibility>,
}

impl AuditRequest {
    pub fn new(prefix: &str, include_active: bool, include_archived: bool) -> Self {
        Self {
            filter: PathPrefixFilter::new(prefix),
            include_active,
            include_archived,
            repo_type: RepoType::default(),
            visibility: Some(Visibility::Private),
        }
    }

    pub fn with_repo_type(mut self, repo_type: RepoType) -> Self {
        self.repo_type = repo_type;
        self
    }

    pub fn with_visibility(mut self, visibility: Option<Visibility>) -> Self {
        self.visibility = visibility;
        self
    }

    /// Directory queries to issue, active first.
    fn queries(&self) -> Vec<RepositoryQuery> {
        [(self.include_active, false), (self.include_archived, true)]
            .into_iter()
            .filter(|(wanted, _)| *wanted)
            .map(|(_, archived)| RepositoryQuery {
                archived,
                repo_type: self.repo_type,
                visibility: self.visibility,
            })
            .collect()
    }
}

/// Receives progress as repositories finish processing.
pub trait ProgressObserver: Send + Sync {
    /// Called once per repository, after its roster fetch succeeded or failed.
    fn repository_finished(&self, processed: usize, total: usize, repository: &Repository);

    /// Run `log` while the observer's own terminal output is paused.
    fn suspend(&self, log: &mut dyn FnMut()) {
        log()
    }
}

/// Observer that ignores every notification.
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn repository_finished(&self, _processed: usize, _total: usize, _repository: &Repository) {}
}

/// A repository whose roster could not be retrieved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FetchFailure {
    pub repository: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Result of a completed run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Aggregation {
    pub index: AccessIndex,
    pub failures: Vec<FetchFailure>,
    /// Repositories that passed the filter.
    pub total: usize,
    /// Repositories whose processing finished; equals `total` after a run.
    pub processed: usize,
}

impl Aggregation {
    /// True when every candidate repository contributed its roster.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.processed == self.total
    }
}

/// Default in-flight bound for roster fetches.
pub fn default_concurrency() -> usize {
    let cpu_count = std::thread::available_parallelism().map(usize::from).unwrap_or(1);
    (cpu_count * 2).max(1)
}

/// Lists repositories, fans roster fetches out with a bounded width, and folds
/// the rosters into an [`AccessIndex`].
pub struct Aggregator<'a> {
    directory: &'a dyn DirectoryClient,
    membership: &'a dyn MembershipClient,
    concurrency: usize,
}

impl<'a> Aggregator<'a> {
    pub fn new(directory: &'a dyn DirectoryClient, membership: &'a dyn MembershipClient) -> Self {
        Self { directory, membership, concurrency: default_concurrency() }
    }

    /// Maximum number of roster fetches in flight. Zero is treated as one.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn aggregate(
        &self,
        request: &AuditRequest,
        progress: &dyn ProgressObserver,
    ) -> Result<Aggregation, AuditError> {
        let candidates = self.list_candidates(request, progress).await?;
        let total = candidates.len();
        progress.suspend(&mut || {
            info!("Fetching members of {total} repositories ({} concurrent)", self.concurrency)
        });

        let processed = AtomicUsize::new(0);
        let mut index = AccessIndex::new();
        let mut failures = Vec::new();

        let mut rosters = stream::iter(candidates.iter())
            .map(|repository| {
                let processed = &processed;
                async move {
                    let roster = self.membership.list_members(repository).await;
                    let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
                    progress.repository_finished(done, total, repository);
                    (repository, roster)
                }
            })
            .buffer_unordered(self.concurrency);

        // Single accumulator: rosters are folded one at a time as fetches complete.
        while let Some((repository, roster)) = rosters.next().await {
            match roster {
                Ok(members) => {
                    progress.suspend(&mut || {
                        debug!("{}: {} members", repository.path, members.len())
                    });
                    for member in members {
                        index.insert(
                            member.username,
                            AccessRecord {
                                repository: repository.path.clone(),
                                access_level: member.access_level,
                            },
                        );
                    }
                }
                Err(err) => {
                    progress.suspend(&mut || warn!("Skipping {}: {err}", repository.path));
                    failures.push(FetchFailure {
                        repository: repository.path.clone(),
                        kind: ErrorKind::MembershipUnavailable,
                        message: failure_message(err),
                    });
                }
            }
        }
        drop(rosters);

        let processed = processed.into_inner();
        progress.suspend(&mut || {
            info!(
                "Collected {} access records for {} users ({} of {processed} repositories failed)",
                index.record_count(),
                index.len(),
                failures.len()
            )
        });
        Ok(Aggregation { index, failures, total, processed })
    }

    async fn list_candidates(
        &self,
        request: &AuditRequest,
        progress: &dyn ProgressObserver,
    ) -> Result<Vec<Repository>, AuditError> {
        let mut candidates = Vec::new();
        for query in request.queries() {
            let listed = self.directory.list_repositories(&query).await.map_err(|err| match err {
                AuditError::DirectoryUnavailable(_) => err,
                other => AuditError::DirectoryUnavailable(other.to_string()),
            })?;
            progress.suspend(&mut || {
                debug!(
                    "Directory returned {} repositories (archived = {})",
                    listed.len(),
                    query.archived
                )
            });
            candidates.extend(listed);
        }

        let listed = candidates.len();
        candidates.retain(|repository| request.filter.matches(repository));
        progress.suspend(&mut || {
            info!(
                "{} of {listed} repositories match prefix {:?}",
                candidates.len(),
                request.filter.prefix()
            )
        });
        Ok(candidates)
    }
}

fn failure_message(err: AuditError) -> String {
    match err {
        AuditError::MembershipUnavailable { message, .. } => message,
        AuditError::DirectoryUnavailable(message) => message,
    }
}

#[cfg(test)]
mod test {
    use std::{
        collections::{BTreeSet, HashMap},
        sync::{atomic::AtomicBool, Arc, Mutex},
        time::Duration,
    };

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use tracing_subscriber::{layer::Context, prelude::*, Layer};

    use super::*;
    use crate::model::{AccessLevel, Member};

    #[derive(Default)]
    struct FakeDirectory {
        active: Vec<Repository>,
        archived: Vec<Repository>,
        unavailable: bool,
        queries: Mutex<Vec<RepositoryQuery>>,
    }

    #[async_trait]
    impl DirectoryClient for FakeDirectory {
        async fn list_repositories(
            &self,
            query: &RepositoryQuery,
        ) -> Result<Vec<Repository>, AuditError> {
            self.queries.lock().unwrap().push(query.clone());
            if self.unavailable {
                return Err(AuditError::DirectoryUnavailable("401 Unauthorized".into()));
            }
            Ok(if query.archived { self.archived.clone() } else { self.active.clone() })
        }
    }

    #[derive(Default)]
    struct FakeMembership {
        rosters: HashMap<String, Vec<Member>>,
        failing: BTreeSet<String>,
        delay: Option<Duration>,
        calls: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeMembership {
        fn roster(mut self, path: &str, members: &[(&str, AccessLevel)]) -> Self {
            let members = members.iter().map(|(name, level)| Member::new(*name, *level)).collect();
            self.rosters.insert(path.to_string(), members);
            self
        }

        fn failing(mut self, path: &str) -> Self {
            self.failing.insert(path.to_string());
            self
        }

        fn calls(&self) -> Vec<String> {
            let mut calls = self.calls.lock().unwrap().clone();
            calls.sort();
            calls
        }
    }

    #[async_trait]
    impl MembershipClient for FakeMembership {
        async fn list_members(&self, repository: &Repository) -> Result<Vec<Member>, AuditError> {
            self.calls.lock().unwrap().push(repository.path.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(&repository.path) {
                return Err(AuditError::MembershipUnavailable {
                    repository: repository.path.clone(),
                    message: "500 Internal Server Error".into(),
                });
            }
            Ok(self.rosters.get(&repository.path).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<(usize, usize, String)>>,
    }

    impl ProgressObserver for RecordingProgress {
        fn repository_finished(&self, processed: usize, total: usize, repository: &Repository) {
            self.events.lock().unwrap().push((processed, total, repository.path.clone()));
        }
    }

    /// Flags whether a log call is currently running inside `suspend`.
    #[derive(Default)]
    struct SuspendingProgress {
        suspended: AtomicBool,
        suspensions: AtomicUsize,
    }

    impl ProgressObserver for SuspendingProgress {
        fn repository_finished(&self, _processed: usize, _total: usize, _repository: &Repository) {}

        fn suspend(&self, log: &mut dyn FnMut()) {
            self.suspended.store(true, Ordering::SeqCst);
            log();
            self.suspended.store(false, Ordering::SeqCst);
            self.suspensions.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Counts events emitted while the progress observer was not suspended.
    struct StrayEvents {
        progress: Arc<SuspendingProgress>,
        events: Arc<AtomicUsize>,
        stray: Arc<AtomicUsize>,
    }

    impl<S: tracing::Subscriber> Layer<S> for StrayEvents {
        fn on_event(&self, _event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            self.events.fetch_add(1, Ordering::SeqCst);
            if !self.progress.suspended.load(Ordering::SeqCst) {
                self.stray.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn active(path: &str) -> Repository {
        Repository::new(path, false, Visibility::Private)
    }

    fn archived(path: &str) -> Repository {
        Repository::new(path, true, Visibility::Private)
    }

    fn record(repository: &str, access_level: AccessLevel) -> AccessRecord {
        AccessRecord { repository: repository.into(), access_level }
    }

    fn sorted(records: Option<&[AccessRecord]>) -> Vec<AccessRecord> {
        let mut records = records.unwrap_or_default().to_vec();
        records.sort();
        records
    }

    #[tokio::test]
    async fn folds_rosters_by_user() {
        let directory =
            FakeDirectory { active: vec![active("org/x"), active("org/y")], ..Default::default() };
        let membership = FakeMembership::default()
            .roster("org/x", &[("alice", AccessLevel::Developer), ("bob", AccessLevel::Maintainer)])
            .roster("org/y", &[("alice", AccessLevel::Guest)]);

        let result = Aggregator::new(&directory, &membership)
            .aggregate(&AuditRequest::new("", true, true), &NoProgress)
            .await
            .unwrap();

        assert_eq!(
            sorted(result.index.get("alice")),
            vec![record("org/x", AccessLevel::Developer), record("org/y", AccessLevel::Guest)]
        );
        assert_eq!(result.index.get("bob").unwrap(), &[record("org/x", AccessLevel::Maintainer)]);
        assert_eq!(result.index.len(), 2);
        assert!(result.is_complete());
    }

    #[tokio::test]
    async fn prefix_and_state_limit_what_is_fetched() {
        let directory = FakeDirectory {
            active: vec![active("org/a"), active("other/a")],
            archived: vec![archived("org/b")],
            ..Default::default()
        };
        let membership = FakeMembership::default().roster("org/a", &[("alice", AccessLevel::Owner)]);

        let result = Aggregator::new(&directory, &membership)
            .aggregate(&AuditRequest::new("ORG/A", true, false), &NoProgress)
            .await
            .unwrap();

        assert_eq!(membership.calls(), vec!["org/a".to_string()]);
        let queries = directory.queries.lock().unwrap().clone();
        assert_eq!(queries.len(), 1);
        assert!(!queries[0].archived);
        assert_eq!(result.total, 1);
        assert_eq!(result.index.get("alice").unwrap(), &[record("org/a", AccessLevel::Owner)]);
    }

    #[tokio::test]
    async fn neither_state_requested_yields_empty_index_without_calls() {
        let directory = FakeDirectory { active: vec![active("org/a")], ..Default::default() };
        let membership = FakeMembership::default().roster("org/a", &[("alice", AccessLevel::Owner)]);

        let result = Aggregator::new(&directory, &membership)
            .aggregate(&AuditRequest::new("", false, false), &NoProgress)
            .await
            .unwrap();

        assert!(result.index.is_empty());
        assert_eq!((result.total, result.processed), (0, 0));
        assert!(directory.queries.lock().unwrap().is_empty());
        assert!(membership.calls().is_empty());
    }

    #[tokio::test]
    async fn directory_failure_is_fatal() {
        let directory = FakeDirectory { unavailable: true, ..Default::default() };
        let membership = FakeMembership::default();

        let err = Aggregator::new(&directory, &membership)
            .aggregate(&AuditRequest::new("", true, true), &NoProgress)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DirectoryUnavailable);
        assert!(err.is_fatal());
        assert!(membership.calls().is_empty());
    }

    #[tokio::test]
    async fn membership_failure_is_recorded_and_run_continues() {
        let directory = FakeDirectory {
            active: vec![active("org/a"), active("org/b"), active("org/c")],
            ..Default::default()
        };
        let membership = FakeMembership::default()
            .roster("org/a", &[("alice", AccessLevel::Reporter)])
            .roster("org/c", &[("alice", AccessLevel::Owner)])
            .failing("org/b");
        let progress = RecordingProgress::default();

        let result = Aggregator::new(&directory, &membership)
            .aggregate(&AuditRequest::new("", true, false), &progress)
            .await
            .unwrap();

        assert_eq!(
            sorted(result.index.get("alice")),
            vec![record("org/a", AccessLevel::Reporter), record("org/c", AccessLevel::Owner)]
        );
        assert_eq!(
            result.failures,
            vec![FetchFailure {
                repository: "org/b".into(),
                kind: ErrorKind::MembershipUnavailable,
                message: "500 Internal Server Error".into(),
            }]
        );
        assert!(!result.is_complete());
        assert_eq!(result.processed, 3);
        assert_eq!(progress.events.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn log_lines_are_emitted_with_progress_suspended() {
        let directory = FakeDirectory {
            active: vec![active("org/a"), active("org/b")],
            ..Default::default()
        };
        let membership = FakeMembership::default()
            .roster("org/a", &[("alice", AccessLevel::Developer)])
            .failing("org/b");
        let progress = Arc::new(SuspendingProgress::default());
        let events = Arc::new(AtomicUsize::new(0));
        let stray = Arc::new(AtomicUsize::new(0));
        let layer = StrayEvents {
            progress: Arc::clone(&progress),
            events: Arc::clone(&events),
            stray: Arc::clone(&stray),
        };
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(layer));

        let result = Aggregator::new(&directory, &membership)
            .aggregate(&AuditRequest::new("org/", true, false), progress.as_ref())
            .await
            .unwrap();

        assert_eq!(result.failures.len(), 1);
        assert!(events.load(Ordering::SeqCst) >= 4, "expected listing, fetch and failure logs");
        assert_eq!(stray.load(Ordering::SeqCst), 0);
        assert_eq!(progress.suspensions.load(Ordering::SeqCst), events.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn progress_counts_up_to_total() {
        let repositories: Vec<_> = (0..25).map(|i| active(&format!("org/r{i:02}"))).collect();
        let directory = FakeDirectory { active: repositories, ..Default::default() };
        let membership = FakeMembership::default();
        let progress = RecordingProgress::default();

        let result = Aggregator::new(&directory, &membership)
            .concurrency(4)
            .aggregate(&AuditRequest::new("", true, false), &progress)
            .await
            .unwrap();

        let events = progress.events.lock().unwrap().clone();
        let mut counts: Vec<usize> = events.iter().map(|(done, _, _)| *done).collect();
        counts.sort_unstable();
        assert_eq!(counts, (1..=25).collect::<Vec<_>>());
        assert!(events.iter().all(|(_, total, _)| *total == 25));
        assert_eq!(result.processed, 25);
    }

    #[tokio::test]
    async fn in_flight_fetches_respect_concurrency_bound() {
        let repositories: Vec<_> = (0..12).map(|i| active(&format!("org/r{i}"))).collect();
        let directory = FakeDirectory { active: repositories, ..Default::default() };
        let membership =
            FakeMembership { delay: Some(Duration::from_millis(10)), ..Default::default() };

        Aggregator::new(&directory, &membership)
            .concurrency(3)
            .aggregate(&AuditRequest::new("", true, false), &NoProgress)
            .await
            .unwrap();

        let peak = membership.max_in_flight.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in-flight fetches was {peak}");
        assert!(peak > 1, "fetches never overlapped");
    }

    #[tokio::test]
    async fn duplicates_are_preserved() {
        let directory = FakeDirectory {
            active: vec![active("org/a")],
            archived: vec![active("org/a")],
            ..Default::default()
        };
        let membership = FakeMembership::default()
            .roster("org/a", &[("alice", AccessLevel::Guest), ("alice", AccessLevel::Developer)]);

        let result = Aggregator::new(&directory, &membership)
            .aggregate(&AuditRequest::new("", true, true), &NoProgress)
            .await
            .unwrap();

        assert_eq!(result.total, 2);
        assert_eq!(result.index.get("alice").map(<[_]>::len), Some(4));
    }

    proptest! {
        #[test]
        fn prop_fold_is_order_independent(
            order in Just((0..8usize).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let users = ["alice", "bob", "carol"];
            let levels = [AccessLevel::Guest, AccessLevel::Developer, AccessLevel::Owner];
            let mut membership = FakeMembership::default();
            let mut canonical = Vec::new();
            for i in 0..8usize {
                let path = format!("org/p{i}");
                let roster: Vec<_> = (0..=i % 3).map(|u| (users[u], levels[(i + u) % 3])).collect();
                membership = membership.roster(&path, &roster);
                canonical.push(active(&path));
            }
            let shuffled: Vec<_> = order.iter().map(|i| canonical[*i].clone()).collect();

            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let run = |repos: Vec<Repository>| {
                let directory = FakeDirectory { active: repos, ..Default::default() };
                rt.block_on(async {
                    Aggregator::new(&directory, &membership)
                        .concurrency(3)
                        .aggregate(&AuditRequest::new("", true, false), &NoProgress)
                        .await
                        .unwrap()
                })
            };
            let expected = run(canonical.clone());
            let actual = run(shuffled);

            prop_assert_eq!(expected.index.len(), actual.index.len());
            for user in users {
                prop_assert_eq!(sorted(expected.index.get(user)), sorted(actual.index.get(user)));
            }
        }
    }
}
