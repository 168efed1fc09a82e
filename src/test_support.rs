//! In-memory stand-ins for the database, the broker and the client connector.
//!
//! Used by unit and integration tests; nothing here touches the network.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{ForecastStore, NotificationStore};
use crate::error::{AppError, AppResult};
use crate::models::{
    CaseLinkEdge, CaseRecord, CaseSource, ForecastPair, NewNotification, NotificationMode,
    NotificationSummary, RunCaseForecast, SAME_TEST_DIFFERENT_SOURCE, UserNotificationMode,
};
use crate::queue::{Broker, FinishedState, JobCounts, QueuedJob, RepeatableJob, Retention};
use crate::tenant::ClientConnector;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Clone)]
struct MemCase {
    source: String,
    forecast: ForecastPair,
    is_deleted: bool,
    is_archived: bool,
}

#[derive(Debug, Clone)]
struct MemLink {
    case_a_id: i32,
    case_b_id: i32,
    link_type: String,
    is_deleted: bool,
}

#[derive(Debug, Clone)]
struct MemRun {
    forecast: ForecastPair,
    is_completed: bool,
    is_deleted: bool,
}

#[derive(Debug, Clone)]
struct MemRunCase {
    id: i32,
    test_run_id: i32,
    repository_case_id: i32,
    status: Option<String>,
}

#[derive(Debug, Clone)]
struct MemManualResult {
    test_run_case_id: i32,
    elapsed: Option<i32>,
    is_deleted: bool,
}

#[derive(Debug, Default)]
struct ForecastTables {
    cases: BTreeMap<i32, MemCase>,
    links: Vec<MemLink>,
    runs: BTreeMap<i32, MemRun>,
    run_cases: Vec<MemRunCase>,
    manual_results: Vec<MemManualResult>,
    junit_results: Vec<(i32, Option<f64>)>,
    case_writes: HashMap<i32, usize>,
    failing_cases: HashSet<i32>,
    failing_runs: HashSet<i32>,
}

#[derive(Debug, Clone)]
struct MemNotification {
    user_id: String,
    summary: NotificationSummary,
    is_read: bool,
    is_deleted: bool,
}

#[derive(Debug, Default)]
struct NotificationTables {
    users: Vec<(String, bool)>,
    preferences: HashMap<String, String>,
    global_mode: Option<String>,
    notifications: Vec<MemNotification>,
}

/// In-memory implementation of the data-store traits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    forecast: Mutex<ForecastTables>,
    notify: Mutex<NotificationTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_case(&self, id: i32, source: CaseSource) {
        lock(&self.forecast).cases.insert(
            id,
            MemCase {
                source: source.as_str().to_string(),
                forecast: ForecastPair::default(),
                is_deleted: false,
                is_archived: false,
            },
        );
    }

    pub fn delete_case(&self, id: i32) {
        if let Some(case) = lock(&self.forecast).cases.get_mut(&id) {
            case.is_deleted = true;
        }
    }

    pub fn archive_case(&self, id: i32) {
        if let Some(case) = lock(&self.forecast).cases.get_mut(&id) {
            case.is_archived = true;
        }
    }

    /// Link two cases as the same test from different sources.
    pub fn link(&self, case_a_id: i32, case_b_id: i32) {
        self.link_with_type(case_a_id, case_b_id, SAME_TEST_DIFFERENT_SOURCE);
    }

    pub fn link_with_type(&self, case_a_id: i32, case_b_id: i32, link_type: &str) {
        lock(&self.forecast).links.push(MemLink {
            case_a_id,
            case_b_id,
            link_type: link_type.to_string(),
            is_deleted: false,
        });
    }

    pub fn delete_link(&self, case_a_id: i32, case_b_id: i32) {
        for link in lock(&self.forecast).links.iter_mut() {
            if link.case_a_id == case_a_id && link.case_b_id == case_b_id {
                link.is_deleted = true;
            }
        }
    }

    pub fn add_run(&self, id: i32) {
        lock(&self.forecast).runs.insert(
            id,
            MemRun {
                forecast: ForecastPair::default(),
                is_completed: false,
                is_deleted: false,
            },
        );
    }

    pub fn complete_run(&self, id: i32) {
        if let Some(run) = lock(&self.forecast).runs.get_mut(&id) {
            run.is_completed = true;
        }
    }

    pub fn delete_run(&self, id: i32) {
        if let Some(run) = lock(&self.forecast).runs.get_mut(&id) {
            run.is_deleted = true;
        }
    }

    /// Schedule a case in a run. Returns the test run case id.
    pub fn add_run_case(&self, test_run_id: i32, repository_case_id: i32, status: Option<&str>) -> i32 {
        let mut tables = lock(&self.forecast);
        let id = tables.run_cases.len() as i32 + 1;
        tables.run_cases.push(MemRunCase {
            id,
            test_run_id,
            repository_case_id,
            status: status.map(str::to_string),
        });
        id
    }

    pub fn set_run_case_status(&self, test_run_case_id: i32, status: Option<&str>) {
        for run_case in lock(&self.forecast).run_cases.iter_mut() {
            if run_case.id == test_run_case_id {
                run_case.status = status.map(str::to_string);
            }
        }
    }

    pub fn add_manual_result(&self, test_run_case_id: i32, elapsed: Option<i32>) {
        lock(&self.forecast).manual_results.push(MemManualResult {
            test_run_case_id,
            elapsed,
            is_deleted: false,
        });
    }

    pub fn add_deleted_manual_result(&self, test_run_case_id: i32, elapsed: i32) {
        lock(&self.forecast).manual_results.push(MemManualResult {
            test_run_case_id,
            elapsed: Some(elapsed),
            is_deleted: true,
        });
    }

    pub fn add_junit_result(&self, repository_case_id: i32, time: Option<f64>) {
        lock(&self.forecast)
            .junit_results
            .push((repository_case_id, time));
    }

    /// Make every forecast write touching `case_id` fail.
    pub fn fail_case_updates(&self, case_id: i32) {
        lock(&self.forecast).failing_cases.insert(case_id);
    }

    /// Make forecast writes of `test_run_id` fail.
    pub fn fail_run_updates(&self, test_run_id: i32) {
        lock(&self.forecast).failing_runs.insert(test_run_id);
    }

    pub fn case_forecast(&self, id: i32) -> Option<ForecastPair> {
        lock(&self.forecast).cases.get(&id).map(|c| c.forecast)
    }

    pub fn set_case_forecast(&self, id: i32, forecast: ForecastPair) {
        if let Some(case) = lock(&self.forecast).cases.get_mut(&id) {
            case.forecast = forecast;
        }
    }

    pub fn run_forecast(&self, id: i32) -> Option<ForecastPair> {
        lock(&self.forecast).runs.get(&id).map(|r| r.forecast)
    }

    /// How many times a forecast was written to `case_id`.
    pub fn case_write_count(&self, case_id: i32) -> usize {
        lock(&self.forecast)
            .case_writes
            .get(&case_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn add_user(&self, user_id: &str) {
        lock(&self.notify).users.push((user_id.to_string(), true));
    }

    pub fn add_inactive_user(&self, user_id: &str) {
        lock(&self.notify).users.push((user_id.to_string(), false));
    }

    pub fn set_user_mode(&self, user_id: &str, mode: NotificationMode) {
        lock(&self.notify)
            .preferences
            .insert(user_id.to_string(), mode.as_str().to_string());
    }

    pub fn set_global_mode(&self, mode: NotificationMode) {
        lock(&self.notify).global_mode = Some(mode.as_str().to_string());
    }

    /// Seed a notification with an explicit creation time.
    pub fn seed_notification(&self, user_id: &str, title: &str, created_at: DateTime<Utc>, is_read: bool) -> Uuid {
        let id = Uuid::new_v4();
        lock(&self.notify).notifications.push(MemNotification {
            user_id: user_id.to_string(),
            summary: NotificationSummary {
                id,
                notification_type: "SYSTEM_ANNOUNCEMENT".to_string(),
                title: title.to_string(),
                message: String::new(),
                related_entity_id: None,
                related_entity_type: None,
                created_at,
            },
            is_read,
            is_deleted: false,
        });
        id
    }

    /// Every stored notification of a user, read or not.
    pub fn notifications_of(&self, user_id: &str) -> Vec<NotificationSummary> {
        lock(&self.notify)
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .map(|n| n.summary.clone())
            .collect()
    }
}

fn same_test_links<'a>(links: &'a [MemLink], case_ids: &'a [i32]) -> impl Iterator<Item = CaseLinkEdge> + 'a {
    links
        .iter()
        .filter(|l| !l.is_deleted && l.link_type == SAME_TEST_DIFFERENT_SOURCE)
        .filter(|l| case_ids.contains(&l.case_a_id) || case_ids.contains(&l.case_b_id))
        .map(|l| CaseLinkEdge {
            case_a_id: l.case_a_id,
            case_b_id: l.case_b_id,
        })
}

#[async_trait]
impl ForecastStore for MemoryStore {
    async fn find_direct_links(&self, case_id: i32) -> AppResult<Vec<CaseLinkEdge>> {
        self.links_for_cases(&[case_id]).await
    }

    async fn links_for_cases(&self, case_ids: &[i32]) -> AppResult<Vec<CaseLinkEdge>> {
        let tables = lock(&self.forecast);
        Ok(same_test_links(&tables.links, case_ids).collect())
    }

    async fn find_cases(&self, case_ids: &[i32]) -> AppResult<Vec<CaseRecord>> {
        let tables = lock(&self.forecast);
        Ok(tables
            .cases
            .iter()
            .filter(|(id, case)| case_ids.contains(*id) && !case.is_deleted)
            .map(|(id, case)| CaseRecord {
                id: *id,
                source: case.source.clone(),
                forecast: case.forecast,
            })
            .collect())
    }

    async fn manual_elapsed_samples(&self, case_ids: &[i32]) -> AppResult<Vec<i32>> {
        let tables = lock(&self.forecast);
        let run_case_ids: HashSet<i32> = tables
            .run_cases
            .iter()
            .filter(|rc| case_ids.contains(&rc.repository_case_id))
            .map(|rc| rc.id)
            .collect();

        Ok(tables
            .manual_results
            .iter()
            .filter(|r| !r.is_deleted && run_case_ids.contains(&r.test_run_case_id))
            .filter_map(|r| r.elapsed)
            .filter(|e| *e > 0)
            .collect())
    }

    async fn automated_time_samples(&self, case_ids: &[i32]) -> AppResult<Vec<f64>> {
        let tables = lock(&self.forecast);
        Ok(tables
            .junit_results
            .iter()
            .filter(|(case_id, _)| case_ids.contains(case_id))
            .filter_map(|(_, time)| *time)
            .filter(|t| *t > 0.0)
            .collect())
    }

    async fn update_case_forecasts(
        &self,
        case_ids: &[i32],
        forecast: ForecastPair,
    ) -> AppResult<()> {
        let mut tables = lock(&self.forecast);
        if let Some(id) = case_ids.iter().find(|id| tables.failing_cases.contains(*id)) {
            return Err(AppError::Database(format!(
                "Failed to update case forecasts: injected failure for case {}",
                id
            )));
        }

        for id in case_ids {
            if let Some(case) = tables.cases.get_mut(id) {
                case.forecast = forecast;
            }
            *tables.case_writes.entry(*id).or_insert(0) += 1;
        }
        Ok(())
    }

    async fn test_run_ids_for_cases(&self, case_ids: &[i32]) -> AppResult<Vec<i32>> {
        let tables = lock(&self.forecast);
        let mut ids: Vec<i32> = tables
            .run_cases
            .iter()
            .filter(|rc| case_ids.contains(&rc.repository_case_id))
            .map(|rc| rc.test_run_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn test_run_cases(&self, test_run_id: i32) -> AppResult<Vec<RunCaseForecast>> {
        let tables = lock(&self.forecast);
        Ok(tables
            .run_cases
            .iter()
            .filter(|rc| rc.test_run_id == test_run_id)
            .map(|rc| RunCaseForecast {
                repository_case_id: rc.repository_case_id,
                status: rc.status.clone(),
                forecast: tables
                    .cases
                    .get(&rc.repository_case_id)
                    .map(|c| c.forecast)
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn update_test_run_forecast(
        &self,
        test_run_id: i32,
        forecast: ForecastPair,
    ) -> AppResult<()> {
        let mut tables = lock(&self.forecast);
        if tables.failing_runs.contains(&test_run_id) {
            return Err(AppError::Database(format!(
                "Failed to update test run forecast: injected failure for run {}",
                test_run_id
            )));
        }

        if let Some(run) = tables.runs.get_mut(&test_run_id) {
            run.forecast = forecast;
        }
        Ok(())
    }

    async fn active_test_run_ids(&self, test_run_ids: &[i32]) -> AppResult<Vec<i32>> {
        let tables = lock(&self.forecast);
        Ok(tables
            .runs
            .iter()
            .filter(|(id, run)| test_run_ids.contains(*id) && !run.is_completed && !run.is_deleted)
            .map(|(id, _)| *id)
            .collect())
    }

    async fn active_case_ids_after(
        &self,
        after_id: Option<i32>,
        limit: u64,
    ) -> AppResult<Vec<i32>> {
        let tables = lock(&self.forecast);
        Ok(tables
            .cases
            .iter()
            .filter(|(id, case)| {
                !case.is_deleted && !case.is_archived && after_id.is_none_or(|after| **id > after)
            })
            .map(|(id, _)| *id)
            .take(limit as usize)
            .collect())
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn notification_mode_for(&self, user_id: &str) -> AppResult<Option<NotificationMode>> {
        Ok(lock(&self.notify)
            .preferences
            .get(user_id)
            .and_then(|m| NotificationMode::parse(m)))
    }

    async fn global_notification_mode(&self) -> AppResult<Option<NotificationMode>> {
        Ok(lock(&self.notify)
            .global_mode
            .as_deref()
            .and_then(NotificationMode::parse))
    }

    async fn insert_notification(&self, new: NewNotification) -> AppResult<bool> {
        let mut tables = lock(&self.notify);
        if tables.notifications.iter().any(|n| n.summary.id == new.id) {
            return Ok(false);
        }
        tables.notifications.push(MemNotification {
            user_id: new.user_id,
            summary: NotificationSummary {
                id: new.id,
                notification_type: new.notification_type,
                title: new.title,
                message: new.message,
                related_entity_id: new.related_entity_id,
                related_entity_type: new.related_entity_type,
                created_at: Utc::now(),
            },
            is_read: false,
            is_deleted: false,
        });
        Ok(true)
    }

    async fn unread_notifications(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<NotificationSummary>> {
        let tables = lock(&self.notify);
        let mut unread: Vec<NotificationSummary> = tables
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read && !n.is_deleted)
            .filter(|n| since.is_none_or(|since| n.summary.created_at >= since))
            .map(|n| n.summary.clone())
            .collect();
        unread.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(unread)
    }

    async fn active_user_modes(&self) -> AppResult<Vec<UserNotificationMode>> {
        let tables = lock(&self.notify);
        Ok(tables
            .users
            .iter()
            .filter(|(_, active)| *active)
            .map(|(id, _)| UserNotificationMode {
                user_id: id.clone(),
                mode: tables
                    .preferences
                    .get(id)
                    .and_then(|m| NotificationMode::parse(m)),
            })
            .collect())
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Connector handing out shared in-memory stores keyed by database URL.
///
/// URLs without a registered store get the default store.
#[derive(Default)]
pub struct MemoryConnector {
    default_store: Arc<MemoryStore>,
    stores: HashMap<String, Arc<MemoryStore>>,
    refused: HashSet<String>,
}

impl MemoryConnector {
    pub fn new(default_store: Arc<MemoryStore>) -> Self {
        Self {
            default_store,
            stores: HashMap::new(),
            refused: HashSet::new(),
        }
    }

    pub fn with_store(mut self, database_url: &str, store: Arc<MemoryStore>) -> Self {
        self.stores.insert(database_url.to_string(), store);
        self
    }

    /// Refuse connections to `database_url`.
    pub fn refusing(mut self, database_url: &str) -> Self {
        self.refused.insert(database_url.to_string());
        self
    }
}

#[async_trait]
impl ClientConnector for MemoryConnector {
    type Client = Arc<MemoryStore>;

    async fn connect(&self, database_url: &str) -> AppResult<Arc<MemoryStore>> {
        if self.refused.contains(database_url) {
            return Err(AppError::Database(format!(
                "Failed to connect to database: connection refused ({})",
                database_url
            )));
        }
        Ok(self
            .stores
            .get(database_url)
            .cloned()
            .unwrap_or_else(|| self.default_store.clone()))
    }

    async fn disconnect(&self, _client: Arc<MemoryStore>) -> AppResult<()> {
        Ok(())
    }
}

// ============================================================================
// Broker
// ============================================================================

#[derive(Debug, Default)]
struct MemQueue {
    jobs: HashMap<String, QueuedJob>,
    wait: VecDeque<String>,
    active: Vec<String>,
    delayed: Vec<(String, DateTime<Utc>)>,
    completed: Vec<(String, DateTime<Utc>)>,
    failed: Vec<(String, DateTime<Utc>)>,
    repeat: BTreeMap<String, RepeatableJob>,
    /// Job id to lock owner and expiry
    locks: HashMap<String, (String, Instant)>,
}

impl MemQueue {
    fn remove_active(&mut self, id: &str) {
        self.active.retain(|a| a != id);
        self.locks.remove(id);
    }

    fn is_locked(&self, id: &str) -> bool {
        self.locks
            .get(id)
            .is_some_and(|(_, expires_at)| *expires_at > Instant::now())
    }

    fn trim(&mut self, state: FinishedState, retention: Retention) {
        let cutoff = Utc::now() - chrono::Duration::from_std(retention.max_age).unwrap_or_default();
        let set = match state {
            FinishedState::Completed => &mut self.completed,
            FinishedState::Failed => &mut self.failed,
        };
        set.sort_by_key(|(_, at)| *at);

        let mut expired: Vec<String> = Vec::new();
        set.retain(|(id, at)| {
            let keep = *at >= cutoff;
            if !keep {
                expired.push(id.clone());
            }
            keep
        });
        if let Some(max_count) = retention.max_count
            && set.len() > max_count
        {
            let overflow = set.len() - max_count;
            expired.extend(set.drain(..overflow).map(|(id, _)| id));
        }

        for id in expired {
            self.jobs.remove(&id);
        }
    }
}

/// In-memory broker with the same semantics as the Redis broker.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, MemQueue>>,
    closed: Mutex<bool>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_queue<R>(&self, queue: &str, f: impl FnOnce(&mut MemQueue) -> R) -> R {
        let mut queues = lock(&self.queues);
        f(queues.entry(queue.to_string()).or_default())
    }

    /// Waiting jobs in the order they will be claimed.
    pub fn waiting_jobs(&self, queue: &str) -> Vec<QueuedJob> {
        self.with_queue(queue, |q| {
            q.wait
                .iter()
                .filter_map(|id| q.jobs.get(id).cloned())
                .collect()
        })
    }

    pub fn failed_jobs(&self, queue: &str) -> Vec<QueuedJob> {
        self.with_queue(queue, |q| {
            q.failed
                .iter()
                .filter_map(|(id, _)| q.jobs.get(id).cloned())
                .collect()
        })
    }

    pub fn is_closed(&self) -> bool {
        *lock(&self.closed)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn enqueue(&self, queue: &str, job: &QueuedJob) -> AppResult<bool> {
        Ok(self.with_queue(queue, |q| {
            if q.jobs.contains_key(&job.id) {
                return false;
            }
            q.jobs.insert(job.id.clone(), job.clone());
            q.wait.push_back(job.id.clone());
            true
        }))
    }

    async fn schedule(
        &self,
        queue: &str,
        job: &QueuedJob,
        run_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        Ok(self.with_queue(queue, |q| {
            if q.jobs.contains_key(&job.id) {
                return false;
            }
            q.jobs.insert(job.id.clone(), job.clone());
            q.delayed.push((job.id.clone(), run_at));
            true
        }))
    }

    async fn claim_next(
        &self,
        queue: &str,
        owner: &str,
        lock_ttl: Duration,
    ) -> AppResult<Option<QueuedJob>> {
        Ok(self.with_queue(queue, |q| {
            let id = q.wait.pop_front()?;
            q.active.push(id.clone());
            q.locks
                .insert(id.clone(), (owner.to_string(), Instant::now() + lock_ttl));
            let job = q.jobs.get_mut(&id)?;
            job.processed_at = Some(Utc::now());
            Some(job.clone())
        }))
    }

    async fn extend_lock(
        &self,
        queue: &str,
        job_id: &str,
        owner: &str,
        lock_ttl: Duration,
    ) -> AppResult<bool> {
        Ok(self.with_queue(queue, |q| {
            let live = q.is_locked(job_id);
            match q.locks.get_mut(job_id) {
                Some((holder, expires_at)) if live && holder == owner => {
                    *expires_at = Instant::now() + lock_ttl;
                    true
                }
                _ => false,
            }
        }))
    }

    async fn finish(
        &self,
        queue: &str,
        job: &QueuedJob,
        state: FinishedState,
        retention: Retention,
    ) -> AppResult<()> {
        self.with_queue(queue, |q| {
            q.remove_active(&job.id);
            q.jobs.insert(job.id.clone(), job.clone());
            let finished_at = job.finished_at.unwrap_or_else(Utc::now);
            match state {
                FinishedState::Completed => q.completed.push((job.id.clone(), finished_at)),
                FinishedState::Failed => q.failed.push((job.id.clone(), finished_at)),
            }
            q.trim(state, retention);
        });
        Ok(())
    }

    async fn retry_later(
        &self,
        queue: &str,
        job: &QueuedJob,
        run_at: DateTime<Utc>,
    ) -> AppResult<()> {
        self.with_queue(queue, |q| {
            q.remove_active(&job.id);
            q.jobs.insert(job.id.clone(), job.clone());
            q.delayed.push((job.id.clone(), run_at));
        });
        Ok(())
    }

    async fn promote_delayed(&self, queue: &str, now: DateTime<Utc>) -> AppResult<usize> {
        Ok(self.with_queue(queue, |q| {
            let (due, pending): (Vec<_>, Vec<_>) =
                q.delayed.drain(..).partition(|(_, run_at)| *run_at <= now);
            q.delayed = pending;
            let promoted = due.len();
            for (id, _) in due {
                q.wait.push_back(id);
            }
            promoted
        }))
    }

    async fn stalled_jobs(&self, queue: &str) -> AppResult<Vec<QueuedJob>> {
        Ok(self.with_queue(queue, |q| {
            q.active
                .iter()
                .filter(|id| !q.is_locked(id))
                .filter_map(|id| q.jobs.get(id).cloned())
                .collect()
        }))
    }

    async fn release_stalled(
        &self,
        queue: &str,
        job: &QueuedJob,
        failed: Option<Retention>,
    ) -> AppResult<bool> {
        Ok(self.with_queue(queue, |q| {
            if q.is_locked(&job.id) || !q.active.contains(&job.id) {
                return false;
            }
            q.remove_active(&job.id);
            q.jobs.insert(job.id.clone(), job.clone());
            match failed {
                Some(retention) => {
                    let finished_at = job.finished_at.unwrap_or_else(Utc::now);
                    q.failed.push((job.id.clone(), finished_at));
                    q.trim(FinishedState::Failed, retention);
                }
                None => q.wait.push_front(job.id.clone()),
            }
            true
        }))
    }

    async fn repeatables(&self, queue: &str) -> AppResult<Vec<RepeatableJob>> {
        Ok(self.with_queue(queue, |q| q.repeat.values().cloned().collect()))
    }

    async fn put_repeatable(&self, queue: &str, job: &RepeatableJob) -> AppResult<()> {
        self.with_queue(queue, |q| {
            q.repeat.insert(job.key.clone(), job.clone());
        });
        Ok(())
    }

    async fn remove_repeatable(&self, queue: &str, key: &str) -> AppResult<bool> {
        Ok(self.with_queue(queue, |q| q.repeat.remove(key).is_some()))
    }

    async fn counts(&self, queue: &str) -> AppResult<JobCounts> {
        Ok(self.with_queue(queue, |q| JobCounts {
            waiting: q.wait.len(),
            active: q.active.len(),
            delayed: q.delayed.len(),
            completed: q.completed.len(),
            failed: q.failed.len(),
        }))
    }

    async fn close(&self) -> AppResult<()> {
        *lock(&self.closed) = true;
        Ok(())
    }
}
