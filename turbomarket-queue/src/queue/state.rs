use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::{
    Claim, ClaimToken, Job, JobFailure, JobId, JobState, Progress, QueueConfig, QueueError,
    QueueStats, retry::apply_jitter,
};

/// Per-state orderings over the jobs of one queue
#[derive(Debug, Default)]
struct Index {
    /// `(priority, seq)`: lowest priority value first, then enqueue order
    waiting: BTreeSet<(u32, u64, JobId)>,
    /// `(ready_at, seq)`: soonest first
    delayed: BTreeSet<(u64, u64, JobId)>,
    active: HashSet<JobId>,
    /// Oldest first, for retention
    completed: VecDeque<JobId>,
    failed: VecDeque<JobId>,
}

impl Index {
    fn link(&mut self, job: &Job) {
        match job.state {
            JobState::Waiting => {
                self.waiting.insert((job.priority, job.seq, job.id));
            }
            JobState::Delayed => {
                self.delayed.insert((job.ready_at, job.seq, job.id));
            }
            JobState::Active => {
                self.active.insert(job.id);
            }
            JobState::Completed => self.completed.push_back(job.id),
            JobState::Failed => self.failed.push_back(job.id),
        }
    }

    fn unlink(&mut self, job: &Job) {
        match job.state {
            JobState::Waiting => {
                self.waiting.remove(&(job.priority, job.seq, job.id));
            }
            JobState::Delayed => {
                self.delayed.remove(&(job.ready_at, job.seq, job.id));
            }
            JobState::Active => {
                self.active.remove(&job.id);
            }
            JobState::Completed => self.completed.retain(|id| *id != job.id),
            JobState::Failed => self.failed.retain(|id| *id != job.id),
        }
    }

    fn finished_mut(&mut self, state: JobState) -> Option<&mut VecDeque<JobId>> {
        match state {
            JobState::Completed => Some(&mut self.completed),
            JobState::Failed => Some(&mut self.failed),
            _ => None,
        }
    }
}

/// The outcome of a transition that must be written through to the store
#[derive(Debug)]
pub(crate) struct Transition {
    pub job: Job,
    /// Jobs dropped by retention as a side effect
    pub purged: Vec<JobId>,
}

/// Everything a queue knows, guarded by a single lock.
///
/// Each method is one atomic step of the job lifecycle. Nothing here blocks
/// or performs I/O.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    jobs: HashMap<JobId, Job>,
    index: Index,
    next_seq: u64,
    next_token: u64,
    paused: bool,
}

impl QueueState {
    fn update<F: FnOnce(&mut Job)>(&mut self, id: &JobId, f: F) -> Option<&Job> {
        let job = self.jobs.get_mut(id)?;
        self.index.unlink(job);
        f(job);
        self.index.link(job);
        Some(job)
    }

    const fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn check_claim(&self, id: &JobId, token: ClaimToken) -> Result<(), QueueError> {
        match self.jobs.get(id) {
            Some(job) if job.is_claimed_by(token) => Ok(()),
            _ => Err(QueueError::JobNotFound(*id)),
        }
    }

    fn enforce_retention(&mut self, state: JobState, keep: usize) -> Vec<JobId> {
        let mut purged = Vec::new();
        if let Some(list) = self.index.finished_mut(state) {
            while list.len() > keep {
                if let Some(id) = list.pop_front() {
                    purged.push(id);
                }
            }
        }

        for id in &purged {
            self.jobs.remove(id);
        }

        purged
    }

    pub fn insert(&mut self, mut job: Job) {
        job.seq = self.take_seq();
        self.index.link(&job);
        self.jobs.insert(job.id, job);
    }

    /// Rebuild from stored records. Jobs that were active when the previous
    /// process stopped have lost their claim and go back to waiting.
    pub fn restore(&mut self, mut jobs: Vec<Job>) -> usize {
        jobs.retain(|job| !self.jobs.contains_key(&job.id));
        jobs.sort_by_key(|job| (job.seq, job.id));

        let restored = jobs.len();
        for mut job in jobs {
            if job.state == JobState::Active {
                job.state = JobState::Waiting;
                job.claim = None;
                job.processed_at = None;
            }

            self.next_seq = self.next_seq.max(job.seq + 1);
            self.index.link(&job);
            self.jobs.insert(job.id, job);
        }

        let jobs = &self.jobs;
        for list in [&mut self.index.completed, &mut self.index.failed] {
            list.make_contiguous()
                .sort_by_key(|id| jobs.get(id).and_then(|job| job.finished_at));
        }

        restored
    }

    /// Move every delayed job whose time has come into waiting
    pub fn promote_due(&mut self, now: u64) -> usize {
        let due: Vec<JobId> = self
            .index
            .delayed
            .iter()
            .take_while(|(ready_at, _, _)| *ready_at <= now)
            .map(|(_, _, id)| *id)
            .collect();

        for id in &due {
            self.update(id, |job| job.state = JobState::Waiting);
        }

        due.len()
    }

    pub fn claim(&mut self, now: u64, capacity: usize) -> Option<Claim> {
        if self.paused || capacity == 0 {
            return None;
        }

        self.promote_due(now);

        let (_, _, id) = *self.index.waiting.first()?;
        let token = ClaimToken(self.next_token);
        self.next_token += 1;

        let job = self.update(&id, |job| {
            job.state = JobState::Active;
            job.claim = Some(token);
            job.processed_at = Some(now);
            job.progress = Progress::default();
        })?;

        Some(Claim {
            job: job.clone(),
            token,
        })
    }

    pub fn complete(
        &mut self,
        id: &JobId,
        token: ClaimToken,
        result: serde_json::Value,
        now: u64,
        keep: usize,
    ) -> Result<Transition, QueueError> {
        self.check_claim(id, token)?;

        let job = self
            .update(id, |job| {
                job.attempt += 1;
                job.state = JobState::Completed;
                job.claim = None;
                job.result = Some(result);
                job.finished_at = Some(now);
            })
            .cloned()
            .ok_or(QueueError::JobNotFound(*id))?;

        let purged = self.enforce_retention(JobState::Completed, keep);
        Ok(Transition { job, purged })
    }

    pub fn fail(
        &mut self,
        id: &JobId,
        token: ClaimToken,
        failure: JobFailure,
        now: u64,
        config: &QueueConfig,
    ) -> Result<Transition, QueueError> {
        self.check_claim(id, token)?;

        let (attempt, max_attempts, backoff) = self
            .jobs
            .get(id)
            .map(|job| (job.attempt + 1, job.max_attempts, job.backoff))
            .ok_or(QueueError::JobNotFound(*id))?;

        let retry = failure.retryable && attempt < max_attempts;
        let delay = apply_jitter(
            backoff.delay_for(attempt, config.max_backoff_ms),
            config.jitter_factor,
        )
        .min(config.max_backoff_ms);

        let job = self
            .update(id, |job| {
                job.attempt = attempt;
                job.claim = None;
                job.logs
                    .push(format!("Attempt {attempt}/{max_attempts} failed: {failure}"));

                if retry {
                    job.state = JobState::Delayed;
                    job.ready_at = now.saturating_add(delay);
                } else {
                    job.state = JobState::Failed;
                    job.error = Some(failure);
                    job.finished_at = Some(now);
                }
            })
            .cloned()
            .ok_or(QueueError::JobNotFound(*id))?;

        let purged = if retry {
            Vec::new()
        } else {
            self.enforce_retention(JobState::Failed, config.keep_failed)
        };

        Ok(Transition { job, purged })
    }

    /// Record progress for a claimed job. Progress never moves backwards.
    pub fn update_progress(
        &mut self,
        id: &JobId,
        token: ClaimToken,
        progress: Progress,
    ) -> Result<Job, QueueError> {
        self.check_claim(id, token)?;

        let job = self
            .jobs
            .get_mut(id)
            .ok_or(QueueError::JobNotFound(*id))?;

        if progress.as_percent() >= job.progress.as_percent() {
            job.progress = progress;
        }

        Ok(job.clone())
    }

    pub fn add_log(&mut self, id: &JobId, line: String) -> Result<Job, QueueError> {
        let job = self
            .jobs
            .get_mut(id)
            .ok_or(QueueError::JobNotFound(*id))?;
        job.logs.push(line);
        Ok(job.clone())
    }

    /// Make a delayed job claimable now
    pub fn promote(&mut self, id: &JobId, now: u64) -> Result<Job, QueueError> {
        match self.jobs.get(id) {
            None => return Err(QueueError::JobNotFound(*id)),
            Some(job) if job.state != JobState::Delayed => {
                return Err(QueueError::InvalidState {
                    id: *id,
                    state: job.state,
                });
            }
            Some(_) => {}
        }

        self.update(id, |job| {
            job.state = JobState::Waiting;
            job.ready_at = now;
        })
        .cloned()
        .ok_or(QueueError::JobNotFound(*id))
    }

    /// Re-enqueue up to `limit` failed jobs, oldest first, with a fresh
    /// attempt budget
    pub fn retry_failed(&mut self, limit: usize) -> Vec<Job> {
        let ids: Vec<JobId> = self.index.failed.iter().take(limit).copied().collect();
        let mut retried = Vec::with_capacity(ids.len());

        for id in ids {
            let seq = self.take_seq();
            if let Some(job) = self.update(&id, |job| {
                job.state = JobState::Waiting;
                job.seq = seq;
                job.attempt = 0;
                job.error = None;
                job.result = None;
                job.progress = Progress::default();
                job.processed_at = None;
                job.finished_at = None;
            }) {
                retried.push(job.clone());
            }
        }

        retried
    }

    /// Delete a job that is not currently being processed
    pub fn remove(&mut self, id: &JobId) -> Result<Job, QueueError> {
        match self.jobs.get(id) {
            None => Err(QueueError::JobNotFound(*id)),
            Some(job) if job.state == JobState::Active => Err(QueueError::InvalidState {
                id: *id,
                state: job.state,
            }),
            Some(job) => {
                self.index.unlink(job);
                self.jobs.remove(id).ok_or(QueueError::JobNotFound(*id))
            }
        }
    }

    /// Remove up to `limit` jobs in `state` older than `grace_ms`, oldest
    /// first. A `limit` of zero removes every match. Active jobs are never
    /// cleaned.
    pub fn clean(&mut self, grace_ms: u64, state: JobState, limit: usize, now: u64) -> Vec<JobId> {
        if state == JobState::Active {
            return Vec::new();
        }

        let cutoff = now.saturating_sub(grace_ms);
        let mut candidates: Vec<(u64, u64, JobId)> = self
            .jobs
            .values()
            .filter(|job| job.state == state)
            .map(|job| (job.finished_at.unwrap_or(job.enqueued_at), job.seq, job.id))
            .filter(|(at, _, _)| *at <= cutoff)
            .collect();
        candidates.sort_unstable();

        if limit > 0 {
            candidates.truncate(limit);
        }

        candidates
            .into_iter()
            .filter_map(|(_, _, id)| self.remove(&id).ok().map(|job| job.id))
            .collect()
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs.get(id).cloned()
    }

    pub fn stats(&mut self, now: u64) -> QueueStats {
        self.promote_due(now);

        QueueStats {
            waiting: self.index.waiting.len(),
            active: self.index.active.len(),
            completed: self.index.completed.len(),
            failed: self.index.failed.len(),
            delayed: self.index.delayed.len(),
            paused: self.paused,
        }
    }

    pub const fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub const fn is_paused(&self) -> bool {
        self.paused
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use turbomarket_common::CampaignRequest;

    use super::*;
    use crate::{Backoff, JobOptions, JobPayload};

    fn job(priority: u32) -> Job {
        Job::new(
            "q",
            JobPayload::GenerateContent(CampaignRequest::new("launch", "new", "g", "u1")),
            &JobOptions::new()
                .priority(priority)
                .max_attempts(3)
                .backoff(Backoff::exponential(2000)),
            0,
        )
    }

    fn state_with(priorities: &[u32]) -> (QueueState, Vec<JobId>) {
        let mut state = QueueState::default();
        let ids = priorities
            .iter()
            .map(|p| {
                let job = job(*p);
                let id = job.id;
                state.insert(job);
                id
            })
            .collect();
        (state, ids)
    }

    #[test]
    fn test_claim_orders_by_priority_then_fifo() {
        let (mut state, ids) = state_with(&[5, 1, 5, 1]);

        let order: Vec<JobId> = std::iter::from_fn(|| state.claim(0, 1).map(|c| c.id())).collect();
        assert_eq!(order, vec![ids[1], ids[3], ids[0], ids[2]]);
    }

    #[test]
    fn test_claim_empty_paused_or_no_capacity() {
        let (mut state, _) = state_with(&[]);
        assert!(state.claim(0, 1).is_none());

        let (mut state, _) = state_with(&[0]);
        assert!(state.claim(0, 0).is_none());

        state.set_paused(true);
        assert!(state.claim(0, 1).is_none());
        state.set_paused(false);
        assert!(state.claim(0, 1).is_some());
    }

    #[test]
    fn test_job_claimed_at_most_once() {
        let (mut state, _) = state_with(&[0]);
        assert!(state.claim(0, 1).is_some());
        assert!(state.claim(0, 1).is_none());
    }

    #[test]
    fn test_complete_requires_live_claim() {
        let (mut state, ids) = state_with(&[0]);
        let claim = state.claim(0, 1).unwrap();

        let stale = ClaimToken(claim.token.0 + 1);
        assert!(matches!(
            state.complete(&ids[0], stale, json!(null), 1, 100),
            Err(QueueError::JobNotFound(_))
        ));

        let done = state.complete(&ids[0], claim.token, json!({"ok": true}), 1, 100).unwrap();
        assert_eq!(done.job.state, JobState::Completed);
        assert_eq!(done.job.attempt, 1);
        assert_eq!(done.job.result, Some(json!({"ok": true})));
        assert!(done.job.error.is_none());

        // Settling twice fails
        assert!(state.complete(&ids[0], claim.token, json!(null), 2, 100).is_err());
    }

    #[test]
    fn test_retryable_failure_backs_off_exponentially() {
        let config = QueueConfig::default();
        let (mut state, ids) = state_with(&[0]);

        let claim = state.claim(0, 1).unwrap();
        let t = state
            .fail(&ids[0], claim.token, JobFailure::retryable("timeout"), 1000, &config)
            .unwrap();
        assert_eq!(t.job.state, JobState::Delayed);
        assert_eq!(t.job.attempt, 1);
        assert_eq!(t.job.ready_at, 3000);
        assert!(t.job.error.is_none());

        // Not claimable until the delay has elapsed
        assert!(state.claim(2999, 1).is_none());
        let claim = state.claim(3000, 1).unwrap();

        let t = state
            .fail(&ids[0], claim.token, JobFailure::retryable("timeout"), 3000, &config)
            .unwrap();
        assert_eq!(t.job.ready_at, 3000 + 4000);

        let claim = state.claim(7000, 1).unwrap();
        let t = state
            .fail(&ids[0], claim.token, JobFailure::retryable("timeout"), 7000, &config)
            .unwrap();
        assert_eq!(t.job.state, JobState::Failed);
        assert_eq!(t.job.attempt, 3);
        assert_eq!(t.job.error.as_ref().unwrap().reason, "timeout");
        assert_eq!(t.job.logs.len(), 3);
    }

    #[test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    fn test_jittered_delay_never_exceeds_cap() {
        let config = QueueConfig {
            max_backoff_ms: 2000,
            jitter_factor: 0.5,
            ..QueueConfig::default()
        };
        let (mut state, _) = state_with(&[0; 50]);

        let mut below_cap = 0;
        while let Some(claim) = state.claim(0, 1) {
            let t = state
                .fail(&claim.id(), claim.token, JobFailure::retryable("timeout"), 1000, &config)
                .unwrap();
            assert_eq!(t.job.state, JobState::Delayed);
            assert!(t.job.ready_at <= 1000 + 2000, "ready_at {}", t.job.ready_at);
            if t.job.ready_at < 3000 {
                below_cap += 1;
            }
        }

        // Jitter still spreads delays downwards
        assert!(below_cap > 0);
    }

    #[test]
    fn test_permanent_failure_skips_retry() {
        let (mut state, ids) = state_with(&[0]);
        let claim = state.claim(0, 1).unwrap();

        let t = state
            .fail(
                &ids[0],
                claim.token,
                JobFailure::permanent("bad content"),
                10,
                &QueueConfig::default(),
            )
            .unwrap();

        assert_eq!(t.job.state, JobState::Failed);
        assert_eq!(t.job.attempt, 1);
        assert!(t.job.result.is_none());
    }

    #[test]
    fn test_completed_retention() {
        let (mut state, ids) = state_with(&[0, 0, 0]);
        let mut purged = Vec::new();

        for (n, id) in ids.iter().enumerate() {
            let claim = state.claim(0, 1).unwrap();
            assert_eq!(claim.id(), *id);
            purged.extend(state.complete(id, claim.token, json!(n), 1, 2).unwrap().purged);
        }

        assert_eq!(purged, vec![ids[0]]);
        assert!(state.get(&ids[0]).is_none());
        assert_eq!(state.stats(0).completed, 2);
    }

    #[test]
    fn test_retry_failed_resets_attempts() {
        let (mut state, ids) = state_with(&[0]);
        let claim = state.claim(0, 1).unwrap();
        state
            .fail(&ids[0], claim.token, JobFailure::permanent("x"), 1, &QueueConfig::default())
            .unwrap();

        let retried = state.retry_failed(10);
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].state, JobState::Waiting);
        assert_eq!(retried[0].attempt, 0);
        assert!(retried[0].error.is_none());
        assert_eq!(state.stats(0).failed, 0);
        assert_eq!(state.stats(0).waiting, 1);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let (mut state, ids) = state_with(&[0]);
        let claim = state.claim(0, 1).unwrap();

        state.update_progress(&ids[0], claim.token, Progress::percent(50)).unwrap();
        let job = state.update_progress(&ids[0], claim.token, Progress::percent(10)).unwrap();
        assert_eq!(job.progress, Progress::Percent(50));
    }

    #[test]
    fn test_promote_and_remove() {
        let mut state = QueueState::default();
        let delayed = Job::new(
            "q",
            JobPayload::GenerateContent(CampaignRequest::new("launch", "new", "g", "u1")),
            &JobOptions::new().delay(60_000),
            0,
        );
        let id = delayed.id;
        state.insert(delayed);

        assert!(state.claim(0, 1).is_none());
        state.promote(&id, 5).unwrap();
        assert!(matches!(
            state.promote(&id, 5),
            Err(QueueError::InvalidState { .. })
        ));

        let claim = state.claim(5, 1).unwrap();
        assert!(matches!(
            state.remove(&id),
            Err(QueueError::InvalidState { .. })
        ));
        state.complete(&id, claim.token, json!(null), 6, 10).unwrap();
        state.remove(&id).unwrap();
        assert!(state.get(&id).is_none());
    }

    #[test]
    fn test_clean_respects_grace_and_limit() {
        let (mut state, ids) = state_with(&[0, 0, 0]);
        for (n, id) in ids.iter().enumerate() {
            let claim = state.claim(0, 1).unwrap();
            state
                .complete(id, claim.token, json!(null), (n as u64 + 1) * 1000, 100)
                .unwrap();
        }

        // Only jobs finished at or before 2000 are old enough
        let cleaned = state.clean(1000, JobState::Completed, 1, 3000);
        assert_eq!(cleaned, vec![ids[0]]);

        let cleaned = state.clean(1000, JobState::Completed, 0, 3000);
        assert_eq!(cleaned, vec![ids[1]]);
        assert_eq!(state.stats(3000).completed, 1);
    }

    #[test]
    fn test_restore_requeues_active_jobs() {
        let (mut state, ids) = state_with(&[0, 1]);
        let claim = state.claim(0, 1).unwrap();
        let mut records: Vec<Job> = ids.iter().map(|id| state.get(id).unwrap()).collect();
        assert_eq!(records[0].state, JobState::Active);
        records.reverse();

        let mut restored = QueueState::default();
        assert_eq!(restored.restore(records), 2);

        let stats = restored.stats(0);
        assert_eq!((stats.waiting, stats.active), (2, 0));

        // The old claim is gone, and the original order is kept
        assert!(restored.complete(&ids[0], claim.token, json!(null), 1, 10).is_err());
        assert_eq!(restored.claim(0, 1).unwrap().id(), ids[0]);
        assert_eq!(restored.claim(0, 1).unwrap().id(), ids[1]);
    }
}
