//! In-memory repositories.
//!
//! Same contracts as the PostgreSQL repositories, held behind a tokio lock.
//! Status transitions are check-and-set under the write lock so concurrent
//! callers observe the same atomicity as the conditional SQL updates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use copydesk_core::activity::{ActivityRecord, NewActivity};
use copydesk_core::schedule::{NewSchedule, RecurrenceRule, Schedule, ScheduleState};
use copydesk_core::work_item::{AutomationStatus, BatchProgress, WorkItem};
use copydesk_core::{
    ActivityId, BatchId, ClientId, Clock, ScheduleId, SystemClock, WorkItemId,
};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::repo::work_item::check_transition;
use crate::{ActivityRepo, DbError, DbResult, ScheduleRepo, WorkItemRepo};

/// Work items kept in insertion order.
#[derive(Debug)]
pub struct MemoryWorkItemRepo {
    items: RwLock<Vec<WorkItem>>,
    clock: Arc<dyn Clock>,
}

impl MemoryWorkItemRepo {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            items: RwLock::new(Vec::new()),
            clock,
        }
    }
}

impl Default for MemoryWorkItemRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkItemRepo for MemoryWorkItemRepo {
    async fn insert_batch(
        &self,
        client_id: ClientId,
        batch_id: BatchId,
        payloads: Vec<serde_json::Map<String, serde_json::Value>>,
    ) -> DbResult<Vec<WorkItem>> {
        let now = self.clock.now();
        let created: Vec<WorkItem> = payloads
            .into_iter()
            .map(|payload| WorkItem {
                id: WorkItemId::new(),
                client_id,
                batch_id,
                payload,
                status: AutomationStatus::Pending,
                processing_started_at: None,
                created_at: now,
                updated_at: now,
            })
            .collect();
        self.items.write().await.extend(created.iter().cloned());
        Ok(created)
    }

    async fn get(&self, id: WorkItemId) -> DbResult<WorkItem> {
        self.items
            .read()
            .await
            .iter()
            .find(|item| item.id == id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("work item {}", id)))
    }

    async fn list_by_status(
        &self,
        client_id: ClientId,
        status: AutomationStatus,
    ) -> DbResult<Vec<WorkItem>> {
        Ok(self
            .items
            .read()
            .await
            .iter()
            .filter(|item| item.client_id == client_id && item.status == status)
            .cloned()
            .collect())
    }

    async fn transition(
        &self,
        id: WorkItemId,
        from: AutomationStatus,
        to: AutomationStatus,
    ) -> DbResult<bool> {
        check_transition(from, to)?;
        let now = self.clock.now();
        let mut items = self.items.write().await;
        let Some(item) = items.iter_mut().find(|item| item.id == id) else {
            return Ok(false);
        };
        if item.status != from {
            return Ok(false);
        }
        item.status = to;
        if to == AutomationStatus::Processing {
            item.processing_started_at = Some(now);
        }
        item.updated_at = now;
        Ok(true)
    }

    async fn reset_failed(&self, id: WorkItemId) -> DbResult<bool> {
        let now = self.clock.now();
        let mut items = self.items.write().await;
        let Some(item) = items.iter_mut().find(|item| item.id == id) else {
            return Ok(false);
        };
        if item.status != AutomationStatus::Failed {
            return Ok(false);
        }
        item.status = AutomationStatus::Pending;
        item.processing_started_at = None;
        item.updated_at = now;
        Ok(true)
    }

    async fn requeue_failed(&self, id: WorkItemId) -> DbResult<bool> {
        let now = self.clock.now();
        let mut items = self.items.write().await;
        let Some(item) = items.iter_mut().find(|item| item.id == id) else {
            return Ok(false);
        };
        if item.status != AutomationStatus::Failed {
            return Ok(false);
        }
        item.status = AutomationStatus::Processing;
        item.processing_started_at = Some(now);
        item.updated_at = now;
        Ok(true)
    }

    async fn batch_progress(&self, client_id: ClientId) -> DbResult<Vec<BatchProgress>> {
        let items = self.items.read().await;
        let mut progress: Vec<BatchProgress> = Vec::new();
        for item in items.iter().filter(|item| item.client_id == client_id) {
            match progress.iter_mut().find(|p| p.batch_id == item.batch_id) {
                Some(entry) => entry.add(item.status, 1),
                None => {
                    let mut entry = BatchProgress::new(item.batch_id);
                    entry.add(item.status, 1);
                    progress.push(entry);
                }
            }
        }
        Ok(progress)
    }
}

/// Schedules kept in creation order.
#[derive(Debug)]
pub struct MemoryScheduleRepo {
    schedules: RwLock<Vec<Schedule>>,
    clock: Arc<dyn Clock>,
}

impl MemoryScheduleRepo {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            schedules: RwLock::new(Vec::new()),
            clock,
        }
    }

    async fn modify<F>(&self, id: ScheduleId, apply: F) -> DbResult<Schedule>
    where
        F: FnOnce(&mut Schedule) + Send,
    {
        let now = self.clock.now();
        let mut schedules = self.schedules.write().await;
        let schedule = schedules
            .iter_mut()
            .find(|s| s.id == id && s.state != ScheduleState::Deleted)
            .ok_or_else(|| DbError::NotFound(format!("schedule {}", id)))?;
        apply(schedule);
        schedule.updated_at = now;
        Ok(schedule.clone())
    }
}

impl Default for MemoryScheduleRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScheduleRepo for MemoryScheduleRepo {
    async fn create(
        &self,
        schedule: &NewSchedule,
        next_run_at: Option<DateTime<Utc>>,
    ) -> DbResult<Schedule> {
        let now = self.clock.now();
        let created = Schedule {
            id: ScheduleId::new(),
            client_id: schedule.client_id,
            name: schedule.name.clone(),
            rule: schedule.rule.clone(),
            jobs_per_run: schedule.jobs_per_run,
            state: ScheduleState::Active,
            last_run_at: None,
            next_run_at,
            created_at: now,
            updated_at: now,
        };
        self.schedules.write().await.push(created.clone());
        Ok(created)
    }

    async fn get(&self, id: ScheduleId) -> DbResult<Schedule> {
        self.schedules
            .read()
            .await
            .iter()
            .find(|s| s.id == id && s.state != ScheduleState::Deleted)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("schedule {}", id)))
    }

    async fn list_for_client(&self, client_id: ClientId) -> DbResult<Vec<Schedule>> {
        Ok(self
            .schedules
            .read()
            .await
            .iter()
            .filter(|s| s.client_id == client_id && s.state != ScheduleState::Deleted)
            .cloned()
            .collect())
    }

    async fn list_active(&self) -> DbResult<Vec<Schedule>> {
        Ok(self
            .schedules
            .read()
            .await
            .iter()
            .filter(|s| s.is_active())
            .cloned()
            .collect())
    }

    async fn list_active_for_client(&self, client_id: ClientId) -> DbResult<Vec<Schedule>> {
        Ok(self
            .schedules
            .read()
            .await
            .iter()
            .filter(|s| s.client_id == client_id && s.is_active())
            .cloned()
            .collect())
    }

    async fn save_policy(
        &self,
        id: ScheduleId,
        name: &str,
        rule: &RecurrenceRule,
        jobs_per_run: u32,
        next_run_at: Option<DateTime<Utc>>,
    ) -> DbResult<Schedule> {
        let name = name.to_string();
        let rule = rule.clone();
        self.modify(id, move |schedule| {
            schedule.name = name;
            schedule.rule = rule;
            schedule.jobs_per_run = jobs_per_run;
            schedule.next_run_at = next_run_at;
        })
        .await
    }

    async fn set_state(
        &self,
        id: ScheduleId,
        state: ScheduleState,
        next_run_at: Option<DateTime<Utc>>,
    ) -> DbResult<Schedule> {
        self.modify(id, move |schedule| {
            schedule.state = state;
            schedule.next_run_at = next_run_at;
        })
        .await
    }

    async fn update_next_run(&self, id: ScheduleId, next_run_at: DateTime<Utc>) -> DbResult<()> {
        self.modify(id, move |schedule| schedule.next_run_at = Some(next_run_at))
            .await
            .map(|_| ())
    }

    async fn update_last_run(&self, id: ScheduleId, last_run_at: DateTime<Utc>) -> DbResult<()> {
        self.modify(id, move |schedule| schedule.last_run_at = Some(last_run_at))
            .await
            .map(|_| ())
    }
}

/// Activity log kept in append order.
#[derive(Debug)]
pub struct MemoryActivityRepo {
    entries: RwLock<Vec<ActivityRecord>>,
    clock: Arc<dyn Clock>,
}

impl MemoryActivityRepo {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            clock,
        }
    }

    /// Every entry, oldest first.
    pub async fn all(&self) -> Vec<ActivityRecord> {
        self.entries.read().await.clone()
    }
}

impl Default for MemoryActivityRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActivityRepo for MemoryActivityRepo {
    async fn record(&self, activity: NewActivity) -> DbResult<ActivityRecord> {
        let record = ActivityRecord {
            id: ActivityId::new(),
            kind: activity.kind,
            title: activity.title,
            description: activity.description,
            refs: activity.refs,
            metadata: activity.metadata,
            created_at: self.clock.now(),
        };
        self.entries.write().await.push(record.clone());
        Ok(record)
    }

    async fn list_recent(
        &self,
        client_id: Option<ClientId>,
        limit: u32,
    ) -> DbResult<Vec<ActivityRecord>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .rev()
            .filter(|entry| client_id.is_none() || entry.refs.client_id == client_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use copydesk_core::ManualClock;
    use copydesk_core::activity::{ActivityKind, ActivityRefs};

    fn payload(keyword: &str) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert("keyword".to_string(), serde_json::json!(keyword));
        map
    }

    #[tokio::test]
    async fn test_transition_is_check_and_set() {
        let repo = MemoryWorkItemRepo::new();
        let client = ClientId::new();
        let items = repo
            .insert_batch(client, BatchId::new(), vec![payload("garden sheds")])
            .await
            .unwrap();
        let id = items[0].id;

        assert!(
            repo.transition(id, AutomationStatus::Pending, AutomationStatus::Processing)
                .await
                .unwrap()
        );
        assert!(
            !repo
                .transition(id, AutomationStatus::Pending, AutomationStatus::Processing)
                .await
                .unwrap()
        );

        let item = repo.get(id).await.unwrap();
        assert_eq!(item.status, AutomationStatus::Processing);
        assert!(item.processing_started_at.is_some());
    }

    #[tokio::test]
    async fn test_transition_refuses_backward_moves() {
        let repo = MemoryWorkItemRepo::new();
        let items = repo
            .insert_batch(ClientId::new(), BatchId::new(), vec![payload("heat pumps")])
            .await
            .unwrap();
        let id = items[0].id;
        repo.transition(id, AutomationStatus::Pending, AutomationStatus::Processing)
            .await
            .unwrap();

        let err = repo
            .transition(id, AutomationStatus::Processing, AutomationStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidData(_)));
        assert_eq!(repo.get(id).await.unwrap().status, AutomationStatus::Processing);
    }

    #[tokio::test]
    async fn test_requeue_only_from_failed() {
        let repo = MemoryWorkItemRepo::new();
        let items = repo
            .insert_batch(ClientId::new(), BatchId::new(), vec![payload("wood stoves")])
            .await
            .unwrap();
        let id = items[0].id;
        assert!(!repo.requeue_failed(id).await.unwrap());

        repo.transition(id, AutomationStatus::Pending, AutomationStatus::Processing)
            .await
            .unwrap();
        repo.transition(id, AutomationStatus::Processing, AutomationStatus::Failed)
            .await
            .unwrap();
        assert!(repo.requeue_failed(id).await.unwrap());
        assert!(!repo.requeue_failed(id).await.unwrap());

        let item = repo.get(id).await.unwrap();
        assert_eq!(item.status, AutomationStatus::Processing);
        assert!(item.processing_started_at.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_transitions_claim_once() {
        let repo = Arc::new(MemoryWorkItemRepo::new());
        let items = repo
            .insert_batch(ClientId::new(), BatchId::new(), vec![payload("solar panels")])
            .await
            .unwrap();
        let id = items[0].id;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.transition(id, AutomationStatus::Pending, AutomationStatus::Processing)
                    .await
                    .unwrap()
            }));
        }
        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_reset_only_from_failed() {
        let repo = MemoryWorkItemRepo::new();
        let items = repo
            .insert_batch(ClientId::new(), BatchId::new(), vec![payload("rain barrels")])
            .await
            .unwrap();
        let id = items[0].id;

        assert!(!repo.reset_failed(id).await.unwrap());
        repo.transition(id, AutomationStatus::Pending, AutomationStatus::Processing)
            .await
            .unwrap();
        repo.transition(id, AutomationStatus::Processing, AutomationStatus::Failed)
            .await
            .unwrap();
        assert!(repo.reset_failed(id).await.unwrap());

        let item = repo.get(id).await.unwrap();
        assert_eq!(item.status, AutomationStatus::Pending);
        assert!(item.processing_started_at.is_none());
    }

    #[tokio::test]
    async fn test_batch_progress_groups_by_batch() {
        let repo = MemoryWorkItemRepo::new();
        let client = ClientId::new();
        let first = BatchId::new();
        let second = BatchId::new();
        let a = repo
            .insert_batch(client, first, vec![payload("a"), payload("b")])
            .await
            .unwrap();
        repo.insert_batch(client, second, vec![payload("c")])
            .await
            .unwrap();
        repo.transition(a[0].id, AutomationStatus::Pending, AutomationStatus::Processing)
            .await
            .unwrap();

        let progress = repo.batch_progress(client).await.unwrap();
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[0].batch_id, first);
        assert_eq!(progress[0].total, 2);
        assert_eq!(progress[0].pending, 1);
        assert_eq!(progress[0].processing, 1);
        assert_eq!(progress[1].total, 1);
    }

    #[tokio::test]
    async fn test_list_by_status_keeps_insertion_order() {
        let repo = MemoryWorkItemRepo::new();
        let client = ClientId::new();
        repo.insert_batch(client, BatchId::new(), vec![payload("one"), payload("two")])
            .await
            .unwrap();
        repo.insert_batch(ClientId::new(), BatchId::new(), vec![payload("other")])
            .await
            .unwrap();

        let pending = repo
            .list_by_status(client, AutomationStatus::Pending)
            .await
            .unwrap();
        let keywords: Vec<_> = pending.iter().filter_map(|item| item.keyword()).collect();
        assert_eq!(keywords, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_deleted_schedule_is_hidden() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap(),
        ));
        let repo = MemoryScheduleRepo::with_clock(clock);
        let client = ClientId::new();
        let schedule = repo
            .create(
                &NewSchedule {
                    client_id: client,
                    name: "mornings".to_string(),
                    rule: RecurrenceRule::daily(NaiveTime::from_hms_opt(9, 0, 0).unwrap()),
                    jobs_per_run: 2,
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(repo.list_active_for_client(client).await.unwrap().len(), 1);
        repo.set_state(schedule.id, ScheduleState::Deleted, None)
            .await
            .unwrap();

        assert!(repo.list_for_client(client).await.unwrap().is_empty());
        assert!(matches!(
            repo.get(schedule.id).await,
            Err(DbError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_activity_most_recent_first() {
        let repo = MemoryActivityRepo::new();
        let client = ClientId::new();
        for title in ["first", "second", "third"] {
            repo.record(NewActivity::new(
                ActivityKind::AutomationStarted,
                title,
                ActivityRefs::client(client),
            ))
            .await
            .unwrap();
        }
        repo.record(NewActivity::new(
            ActivityKind::AutomationStarted,
            "elsewhere",
            ActivityRefs::client(ClientId::new()),
        ))
        .await
        .unwrap();

        let recent = repo.list_recent(Some(client), 2).await.unwrap();
        let titles: Vec<_> = recent.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["third", "second"]);
        assert_eq!(repo.list_recent(None, 10).await.unwrap().len(), 4);
    }
}
