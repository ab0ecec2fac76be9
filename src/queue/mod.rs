pub mod job;

pub use job::{DeadLetter, Job, LeasedJob, NewJob, QueueStats, ReclaimReport};

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};
use crate::config::QueueConfig;
use crate::errors::FleetError;

#[derive(Debug, Clone, Copy)]
pub struct QueuePolicy {
    pub lease_ttl: Duration,
    pub max_requeues: u32,
}

impl From<&QueueConfig> for QueuePolicy {
    fn from(config: &QueueConfig) -> Self {
        Self {
            lease_ttl: config.lease_ttl,
            max_requeues: config.max_requeues,
        }
    }
}

#[derive(Debug)]
struct Slot {
    job: Job,
    lease_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<String, Slot>,
    /// Unleased jobs ordered by enqueue timestamp, then id.
    pending: BTreeSet<(DateTime<Utc>, String)>,
    dead: Vec<DeadLetter>,
    dead_ids: HashSet<String>,
    /// Completed ids are not kept; the result manifest is the durable record.
    completed_total: u64,
    enqueued_total: u64,
    requeued_total: u64,
    dead_lettered_total: u64,
}

impl QueueState {
    fn knows(&self, id: &str) -> bool {
        self.jobs.contains_key(id) || self.dead_ids.contains(id)
    }

    fn push_pending(&mut self, job: Job) {
        self.pending.insert((job.enqueued_at, job.id.clone()));
        self.jobs.insert(job.id.clone(), Slot { job, lease_expires_at: None });
    }
}

/// In-memory job queue with leases. Every operation takes the one state lock,
/// so a job is never leased to two pollers at once.
#[derive(Debug)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    lease_ttl: chrono::Duration,
    max_requeues: u32,
}

impl JobQueue {
    pub fn new(policy: QueuePolicy) -> Result<Self, FleetError> {
        let lease_ttl = chrono::Duration::from_std(policy.lease_ttl)
            .map_err(|e| FleetError::Config(format!("lease_ttl out of range: {}", e)))?;
        Ok(Self {
            state: Mutex::new(QueueState::default()),
            lease_ttl,
            max_requeues: policy.max_requeues,
        })
    }

    pub fn enqueue(&self, job: NewJob) -> Result<Job, FleetError> {
        let mut jobs = self.enqueue_many(vec![job])?;
        jobs.pop().ok_or_else(|| FleetError::Internal("enqueue produced no job".into()))
    }

    /// Enqueue a batch. Either every job is accepted or none is.
    pub fn enqueue_many(&self, batch: Vec<NewJob>) -> Result<Vec<Job>, FleetError> {
        let now = Utc::now();
        let mut state = self.state.lock();

        let mut prepared = Vec::with_capacity(batch.len());
        let mut batch_ids = HashSet::new();
        for new in batch {
            let id = match new.id {
                Some(id) if id.trim().is_empty() => {
                    return Err(FleetError::Validation("job id must not be empty".into()));
                }
                Some(id) => id,
                None => uuid::Uuid::new_v4().to_string(),
            };
            if new.url.trim().is_empty() {
                return Err(FleetError::Validation(format!("job '{}' has an empty url", id)));
            }
            if state.knows(&id) || !batch_ids.insert(id.clone()) {
                return Err(FleetError::Duplicate(format!("job '{}' already exists", id)));
            }
            prepared.push(Job {
                id,
                url: new.url,
                payload: new.payload,
                enqueued_at: now,
                requeue_count: 0,
            });
        }

        for job in &prepared {
            state.push_pending(job.clone());
        }
        state.enqueued_total += prepared.len() as u64;
        debug!(count = prepared.len(), "Jobs enqueued");
        Ok(prepared)
    }

    pub fn lease(&self, count: usize) -> Vec<LeasedJob> {
        self.lease_at(count, Utc::now())
    }

    /// Lease up to `count` unleased jobs in FIFO order.
    pub fn lease_at(&self, count: usize, now: DateTime<Utc>) -> Vec<LeasedJob> {
        let expires = now.checked_add_signed(self.lease_ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut state = self.state.lock();
        let mut leased = Vec::new();

        while leased.len() < count {
            let Some((_, id)) = state.pending.pop_first() else { break };
            if let Some(slot) = state.jobs.get_mut(&id) {
                slot.lease_expires_at = Some(expires);
                leased.push(LeasedJob { job: slot.job.clone(), lease_expires_at: expires });
            }
        }
        leased
    }

    /// Remove a job permanently. With `accept_late`, a job whose lease expired
    /// but which is still waiting to be re-leased is accepted too.
    pub fn complete(&self, id: &str, accept_late: bool) -> Result<Job, FleetError> {
        let mut state = self.state.lock();
        if state.dead_ids.contains(id) {
            return Err(FleetError::Conflict(format!("job '{}' is dead-lettered", id)));
        }
        let slot = state
            .jobs
            .get(id)
            .ok_or_else(|| FleetError::NotFound(format!("unknown job '{}'", id)))?;

        match slot.lease_expires_at {
            Some(_) => {}
            None if accept_late && slot.job.requeue_count > 0 => {
                let key = (slot.job.enqueued_at, slot.job.id.clone());
                state.pending.remove(&key);
                debug!(job = %id, "Accepting late completion");
            }
            None => {
                return Err(FleetError::Conflict(format!("job '{}' is not leased", id)));
            }
        }

        let slot = state
            .jobs
            .remove(id)
            .ok_or_else(|| FleetError::Internal(format!("job '{}' vanished", id)))?;
        state.completed_total += 1;
        Ok(slot.job)
    }

    /// Undo `complete` for a job whose result could not be stored. The job
    /// goes back to the pending pool at its original position.
    pub fn revert_completion(&self, job: Job) {
        let mut state = self.state.lock();
        if state.knows(&job.id) {
            return;
        }
        state.completed_total = state.completed_total.saturating_sub(1);
        warn!(job = %job.id, "Reverting completion");
        state.push_pending(job);
    }

    pub fn reclaim(&self) -> ReclaimReport {
        self.reclaim_at(Utc::now())
    }

    /// Return expired leases to the tail of the pending pool, dead-lettering
    /// jobs that have been requeued more than `max_requeues` times.
    pub fn reclaim_at(&self, now: DateTime<Utc>) -> ReclaimReport {
        let mut state = self.state.lock();
        let mut expired: Vec<(DateTime<Utc>, String)> = state
            .jobs
            .values()
            .filter(|slot| slot.lease_expires_at.is_some_and(|at| at <= now))
            .map(|slot| (slot.job.enqueued_at, slot.job.id.clone()))
            .collect();
        expired.sort();

        let mut report = ReclaimReport::default();
        for (_, id) in expired {
            let Some(mut slot) = state.jobs.remove(&id) else { continue };
            slot.job.requeue_count += 1;

            if slot.job.requeue_count > self.max_requeues {
                let letter = DeadLetter {
                    reason: format!("lease expired {} times", slot.job.requeue_count),
                    job: slot.job,
                    dead_at: now,
                };
                state.dead_ids.insert(id);
                state.dead.push(letter.clone());
                state.dead_lettered_total += 1;
                report.dead_lettered.push(letter);
            } else {
                slot.job.enqueued_at = now;
                state.push_pending(slot.job);
                state.requeued_total += 1;
                report.requeued.push(id);
            }
        }
        report
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().dead.clone()
    }

    /// Put a dead-lettered job back into circulation with a fresh requeue budget.
    pub fn requeue_dead_letter(&self, id: &str) -> Result<Job, FleetError> {
        let mut state = self.state.lock();
        let position = state
            .dead
            .iter()
            .position(|letter| letter.job.id == id)
            .ok_or_else(|| FleetError::NotFound(format!("job '{}' is not dead-lettered", id)))?;

        let mut job = state.dead.remove(position).job;
        state.dead_ids.remove(id);
        job.requeue_count = 0;
        job.enqueued_at = Utc::now();
        state.push_pending(job.clone());
        Ok(job)
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            pending: state.pending.len(),
            leased: state.jobs.len() - state.pending.len(),
            dead_letter: state.dead.len(),
            completed_total: state.completed_total,
            enqueued_total: state.enqueued_total,
            requeued_total: state.requeued_total,
            dead_lettered_total: state.dead_lettered_total,
        }
    }
}
