//! Cost of `PriorityCalculator::deadline_urgency`, the diagnostic scoring path run
//! once per dispatch attempt.

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use swarmbot::domain::models::task::{Task, TaskSpec};
use swarmbot::services::priority_calculator::PriorityCalculator;

fn bench_deadline_urgency(c: &mut Criterion) {
    let calc = PriorityCalculator::new();

    let mut no_deadline = Task::from_spec(TaskSpec::new("bench"));
    no_deadline.deadline = None;

    let mut approaching = Task::from_spec(TaskSpec::new("bench"));
    let now = Utc::now();
    approaching.submitted_at = now - Duration::hours(10);
    approaching.deadline = Some(now + Duration::hours(2));

    let mut past = Task::from_spec(TaskSpec::new("bench"));
    past.deadline = Some(now - Duration::hours(1));

    c.bench_function("deadline_urgency_no_deadline", |b| {
        b.iter(|| black_box(calc.deadline_urgency(black_box(&no_deadline))));
    });
    c.bench_function("deadline_urgency_approaching", |b| {
        b.iter(|| black_box(calc.deadline_urgency(black_box(&approaching))));
    });
    c.bench_function("deadline_urgency_past", |b| {
        b.iter(|| black_box(calc.deadline_urgency(black_box(&past))));
    });
}

criterion_group!(benches, bench_deadline_urgency);
criterion_main!(benches);
