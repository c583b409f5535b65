//! Diagnostic urgency scoring, surfaced on events/logs but **not** used to order the
//! Task Queue's ready heap. Queue ordering is `(Task::effective_priority(), submitted_at)`
//! exactly per the retry-demotion rule; folding in a deadline or dependency-depth boost
//! here would contradict that literal tie-break rule, so those numbers stay advisory.

use chrono::Utc;

use crate::domain::models::task::Task;

#[derive(Debug, Clone)]
pub struct PriorityCalculator {
    deadline_urgency_max: f64,
}

impl Default for PriorityCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityCalculator {
    pub fn new() -> Self {
        Self { deadline_urgency_max: 1.0 }
    }

    pub fn with_max_urgency(deadline_urgency_max: f64) -> Self {
        Self { deadline_urgency_max }
    }

    /// `0.0` for a task with no deadline or one far away, rising to `deadline_urgency_max`
    /// as the deadline passes. Diagnostic only — logged alongside `TaskAssigned`/
    /// `TaskRetryScheduled` events, never used to reorder the heap.
    pub fn deadline_urgency(&self, task: &Task) -> f64 {
        let Some(deadline) = task.deadline else {
            return 0.0;
        };
        let now = Utc::now();
        if deadline <= now {
            return self.deadline_urgency_max;
        }

        let total = deadline - task.submitted_at;
        let remaining = deadline - now;
        if total.num_seconds() <= 0 {
            return 0.0;
        }

        let elapsed_ratio = 1.0 - (remaining.num_seconds() as f64 / total.num_seconds() as f64);
        elapsed_ratio.clamp(0.0, 1.0) * self.deadline_urgency_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::task::TaskSpec;
    use chrono::Duration;

    #[test]
    fn no_deadline_has_zero_urgency() {
        let calc = PriorityCalculator::new();
        let task = Task::from_spec(TaskSpec::new("echo"));
        assert_eq!(calc.deadline_urgency(&task), 0.0);
    }

    #[test]
    fn past_deadline_is_maximally_urgent() {
        let calc = PriorityCalculator::new();
        let mut task = Task::from_spec(TaskSpec::new("echo"));
        task.deadline = Some(Utc::now() - Duration::hours(1));
        assert_eq!(calc.deadline_urgency(&task), calc.deadline_urgency_max);
    }

    #[test]
    fn approaching_deadline_is_partially_urgent() {
        let calc = PriorityCalculator::new();
        let mut task = Task::from_spec(TaskSpec::new("echo"));
        let now = Utc::now();
        task.submitted_at = now - Duration::hours(10);
        task.deadline = Some(now + Duration::hours(2));
        let urgency = calc.deadline_urgency(&task);
        assert!(urgency > 0.7 && urgency < 1.0);
    }
}
