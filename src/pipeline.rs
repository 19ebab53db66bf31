//! The scheduling engine: task selection, progress, completion, retries,
//! pause and resume.
//!
//! Every mutation runs inside [`StateManager::atomic_update`], so a periodic
//! tick and a player action racing on the same queue converge to one
//! effective write; the loser retries against the winner's state. Lifecycle
//! events are collected during the transform and emitted only after the
//! update commits, so a retried attempt never double-fires them.

use crate::error::{QueueError, QueueResult};
use crate::events::{EventSink, TaskEvent};
use crate::queue::{QueueConfig, TaskQueue};
use crate::rewards::RewardSource;
use crate::state::StateManager;
use crate::types::{PlayerSnapshot, Task};
use crate::validation::{prerequisite_met, resource_available};
use std::sync::{Arc, Mutex};

/// Exponential retry backoff: `base * 2^retry_count`, capped.
pub fn retry_delay(config: &QueueConfig, retry_count: u32) -> u64 {
    let factor = 2u64.saturating_pow(retry_count.min(32));
    config
        .retry_base_delay_ms
        .saturating_mul(factor)
        .min(config.retry_max_delay_ms)
}

/// What happened to a task that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The task will retry in place at `next_start`.
    RetryScheduled { next_start: i64 },
    /// Retries are exhausted; the task was dropped.
    Terminal,
}

/// Apply failure bookkeeping to a task.
///
/// Within the retry budget the task resets (`progress = 0`, not completed)
/// and is rescheduled in place with a backoff-delayed start time; past the
/// budget the outcome is terminal and the caller drops the task.
pub fn handle_task_failure(task: &mut Task, config: &QueueConfig, now: i64) -> FailureOutcome {
    task.retry_count += 1;
    if task.retry_count <= task.max_retries {
        task.progress = 0.0;
        task.completed = false;
        let next_start = now + retry_delay(config, task.retry_count) as i64;
        task.start_time = next_start;
        task.estimated_completion = next_start + task.duration_ms;
        FailureOutcome::RetryScheduled { next_start }
    } else {
        FailureOutcome::Terminal
    }
}

/// Re-evaluate a task's prerequisites and resource requirements against
/// live player state, refreshing the cached flags for UI display. Returns
/// true only when everything is met.
pub fn validate_prerequisites(task: &mut Task, player: &PlayerSnapshot) -> bool {
    let mut all_met = true;

    for prereq in &mut task.prerequisites {
        prereq.is_met = prerequisite_met(&prereq.condition, player);
        all_met &= prereq.is_met;
    }

    for req in &mut task.requirements {
        req.available = resource_available(req, player);
        req.sufficient = req.available >= req.required;
        all_met &= req.sufficient;
    }

    all_met
}

/// Scheduling engine over a [`StateManager`].
pub struct ProcessingPipeline {
    state: Arc<StateManager>,
    rewards: Arc<dyn RewardSource>,
    events: Arc<dyn EventSink>,
}

impl ProcessingPipeline {
    pub fn new(
        state: Arc<StateManager>,
        rewards: Arc<dyn RewardSource>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            state,
            rewards,
            events,
        }
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    /// Advance a player's queue: update progress, complete overdue work,
    /// grant rewards, and promote the next eligible task. Paused queues are
    /// left untouched.
    pub async fn process_queue(
        &self,
        player_id: &str,
        player: &PlayerSnapshot,
    ) -> QueueResult<TaskQueue> {
        // Fast path: a paused queue is a no-op, with no version churn.
        if let Some(queue) = self.state.load_state(player_id).await?
            && queue.is_paused
        {
            return Ok(queue);
        }

        let pending_events: Mutex<Vec<TaskEvent>> = Mutex::new(Vec::new());
        let clock = self.state.clock().clone();
        let rewards = self.rewards.clone();

        let queue = self
            .state
            .atomic_update(player_id, |queue| {
                let mut events = pending_events.lock().unwrap();
                events.clear(); // a retried attempt starts over

                // Re-checked under the atomic loop: a pause may have landed
                // since the fast-path read.
                if queue.is_paused {
                    return Ok(());
                }
                let now = clock.now_ms();
                Self::advance(queue, player, rewards.as_ref(), now, &mut events);
                Ok(())
            })
            .await?;

        for event in pending_events.into_inner().unwrap() {
            self.events.emit(event);
        }
        Ok(queue)
    }

    /// Core advance step. Completes as many overdue tasks as the elapsed
    /// time covers and promotes follow-on work without leaving idle gaps.
    fn advance(
        queue: &mut TaskQueue,
        player: &PlayerSnapshot,
        rewards: &dyn RewardSource,
        now: i64,
        events: &mut Vec<TaskEvent>,
    ) {
        loop {
            match queue.current_task.take() {
                Some(mut task) if task.is_overdue(now) => {
                    task.progress = 1.0;
                    task.completed = true;
                    let earned = rewards.rewards_for(&task);
                    queue.total_tasks_completed += 1;
                    queue.total_time_spent += task.duration_ms;
                    queue.total_rewards_earned.extend(earned.iter().cloned());
                    queue.recalculate_metrics(now);
                    queue.is_running = false;
                    events.push(TaskEvent::TaskCompleted {
                        player_id: queue.player_id.clone(),
                        task_id: task.id,
                        rewards: earned,
                    });

                    if !queue.config.auto_start {
                        break;
                    }
                    continue;
                }
                Some(mut task) => {
                    // Still executing (or waiting out a retry delay).
                    if now >= task.start_time && task.start_time > 0 {
                        task.progress = task.progress_at(now);
                        events.push(TaskEvent::TaskProgress {
                            player_id: queue.player_id.clone(),
                            task_id: task.id.clone(),
                            progress: task.progress,
                        });
                    }
                    queue.current_task = Some(task);
                    break;
                }
                None => {}
            }

            let Some(idx) = Self::select_next_index(queue) else {
                queue.is_running = false;
                break;
            };

            // Re-check prerequisites against live player state; enqueue-time
            // validation may be stale.
            let candidate = &mut queue.queued_tasks[idx];
            if !validate_prerequisites(candidate, player) {
                let reason = format!("prerequisites not met for task '{}'", candidate.name);
                Self::apply_pause(queue, &reason, now);
                events.push(TaskEvent::QueuePaused {
                    player_id: queue.player_id.clone(),
                    reason,
                });
                break;
            }

            let mut task = queue.queued_tasks.remove(idx);
            task.schedule(now);
            task.is_valid = true;
            events.push(TaskEvent::TaskStarted {
                player_id: queue.player_id.clone(),
                task_id: task.id.clone(),
            });
            queue.current_task = Some(task);
            queue.is_running = true;
        }
    }

    /// Next task to run: the highest-priority queued task (ties broken by
    /// queue position) under priority handling, otherwise the FIFO head.
    fn select_next_index(queue: &TaskQueue) -> Option<usize> {
        if queue.queued_tasks.is_empty() {
            return None;
        }
        if !queue.config.priority_handling {
            return Some(0);
        }
        let mut best = 0;
        for (idx, task) in queue.queued_tasks.iter().enumerate().skip(1) {
            if task.priority > queue.queued_tasks[best].priority {
                best = idx;
            }
        }
        Some(best)
    }

    /// Report a failure of a live task (combat loss, tool break, ...).
    ///
    /// Within the retry budget the task is rescheduled in place; past it the
    /// task is dropped and the terminal outcome is returned alongside the
    /// updated queue.
    pub async fn report_task_failure(
        &self,
        player_id: &str,
        task_id: &str,
        reason: &str,
    ) -> QueueResult<(TaskQueue, FailureOutcome)> {
        let clock = self.state.clock().clone();
        let outcome: Mutex<Option<FailureOutcome>> = Mutex::new(None);

        let queue = self
            .state
            .atomic_update(player_id, |queue| {
                let now = clock.now_ms();
                let config = queue.config.clone();

                let result = if let Some(task) =
                    queue.current_task.as_mut().filter(|t| t.id == task_id)
                {
                    let result = handle_task_failure(task, &config, now);
                    if result == FailureOutcome::Terminal {
                        queue.current_task = None;
                        queue.is_running = false;
                    }
                    result
                } else if let Some(task) =
                    queue.queued_tasks.iter_mut().find(|t| t.id == task_id)
                {
                    let result = handle_task_failure(task, &config, now);
                    if result == FailureOutcome::Terminal {
                        queue.remove_queued_task(task_id);
                    }
                    result
                } else {
                    return Err(QueueError::Internal(anyhow::anyhow!(
                        "task {task_id} not found for player {player_id}"
                    )));
                };

                *outcome.lock().unwrap() = Some(result);
                Ok(())
            })
            .await?;

        let outcome = outcome
            .into_inner()
            .unwrap()
            .expect("outcome set on success");
        let will_retry = matches!(outcome, FailureOutcome::RetryScheduled { .. });
        self.events.emit(TaskEvent::TaskFailed {
            player_id: player_id.to_string(),
            task_id: task_id.to_string(),
            reason: reason.to_string(),
            will_retry,
        });
        Ok((queue, outcome))
    }

    /// Pause a queue (prerequisite failure, player intent, shutdown).
    pub async fn pause_queue(&self, player_id: &str, reason: &str) -> QueueResult<TaskQueue> {
        let clock = self.state.clock().clone();
        let transitioned = Mutex::new(false);
        let queue = self
            .state
            .atomic_update(player_id, |queue| {
                let now = clock.now_ms();
                *transitioned.lock().unwrap() = Self::apply_pause(queue, reason, now);
                Ok(())
            })
            .await?;
        if transitioned.into_inner().unwrap() {
            self.events.emit(TaskEvent::QueuePaused {
                player_id: player_id.to_string(),
                reason: reason.to_string(),
            });
        }
        Ok(queue)
    }

    /// Returns true when the queue transitioned into the paused state.
    fn apply_pause(queue: &mut TaskQueue, reason: &str, now: i64) -> bool {
        if queue.is_paused {
            return false;
        }
        queue.is_paused = true;
        queue.is_running = false;
        queue.pause_reason = Some(reason.to_string());
        queue.paused_at = now;
        queue.can_resume = true;
        true
    }

    /// Resume a paused queue if its head task's prerequisites hold.
    ///
    /// Returns true when the queue is running (or empty and unpaused) after
    /// the call; false when it stays paused.
    pub async fn resume_queue(
        &self,
        player_id: &str,
        player: &PlayerSnapshot,
    ) -> QueueResult<bool> {
        let clock = self.state.clock().clone();
        let transitioned = Mutex::new(false);
        let queue = self
            .state
            .atomic_update(player_id, |queue| {
                *transitioned.lock().unwrap() = false; // retried attempts start over
                if !queue.is_paused || !queue.can_resume {
                    return Ok(());
                }
                let now = clock.now_ms();

                // The head task must still be runnable before we unpause.
                let head_ok = if let Some(current) = queue.current_task.as_mut() {
                    validate_prerequisites(current, player)
                } else if let Some(idx) = Self::select_next_index(queue) {
                    validate_prerequisites(&mut queue.queued_tasks[idx], player)
                } else {
                    true
                };
                if !head_ok {
                    return Ok(());
                }

                queue.is_paused = false;
                queue.pause_reason = None;
                if queue.paused_at > 0 {
                    queue.total_pause_time += now - queue.paused_at;
                }
                queue.resumed_at = now;
                queue.is_running = queue.current_task.is_some();
                *transitioned.lock().unwrap() = true;
                Ok(())
            })
            .await?;

        if transitioned.into_inner().unwrap() {
            self.events.emit(TaskEvent::QueueResumed {
                player_id: player_id.to_string(),
            });
        }
        Ok(!queue.is_paused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_and_caps() {
        let config = QueueConfig::default();
        assert_eq!(retry_delay(&config, 0), 1_000);
        assert_eq!(retry_delay(&config, 1), 2_000);
        assert_eq!(retry_delay(&config, 2), 4_000);
        assert_eq!(retry_delay(&config, 8), 256_000);
        assert_eq!(retry_delay(&config, 9), 300_000);
        assert_eq!(retry_delay(&config, 60), 300_000);

        // Non-decreasing over the whole range.
        let mut last = 0;
        for n in 0..64 {
            let d = retry_delay(&config, n);
            assert!(d >= last);
            last = d;
        }
    }

    #[test]
    fn failure_within_budget_reschedules_in_place() {
        let config = QueueConfig::default();
        let mut task = Task::new(
            "p1",
            "Fight",
            crate::types::ActivityPayload::Combat {
                enemy_id: "rat".into(),
                enemy_level: 1,
                recommended_power: 1.0,
            },
            1_000,
            0,
        );
        task.retry_count = 1;
        task.max_retries = 3;
        task.progress = 0.7;

        let now = 50_000;
        let outcome = handle_task_failure(&mut task, &config, now);
        assert_eq!(task.retry_count, 2);
        assert_eq!(task.progress, 0.0);
        assert!(!task.completed);
        assert!(task.start_time > now);
        assert!(matches!(outcome, FailureOutcome::RetryScheduled { .. }));
    }

    #[test]
    fn failure_past_budget_is_terminal() {
        let config = QueueConfig::default();
        let mut task = Task::new(
            "p1",
            "Fight",
            crate::types::ActivityPayload::Combat {
                enemy_id: "rat".into(),
                enemy_level: 1,
                recommended_power: 1.0,
            },
            1_000,
            0,
        );
        task.retry_count = 3;
        task.max_retries = 3;
        assert_eq!(
            handle_task_failure(&mut task, &config, 0),
            FailureOutcome::Terminal
        );
        assert_eq!(task.retry_count, 4); // maxRetries + 1 marks terminal
    }
}
