//! Task queue lifecycle tests: enqueue, cycle rejection, dispatch
//! ordering, completion unblocking, failure retry, cancellation.

mod common;

use common::TestServices;
use uuid::Uuid;

use abathur::domain::errors::DomainError;
use abathur::domain::models::{Task, TaskSource, TaskStatus};
use abathur::infrastructure::database::TaskFilters;

#[tokio::test]
async fn test_enqueue_without_prerequisites_is_ready() {
    let svc = TestServices::new().await;

    let task = svc.queue.enqueue_task(Task::new("standalone")).await.unwrap();
    assert_eq!(task.status, TaskStatus::Ready);
    assert_eq!(task.dependency_depth, 0);
    assert!(task.calculated_priority > 0.0);
}

#[tokio::test]
async fn test_enqueue_with_unresolved_prerequisite_is_blocked() {
    let svc = TestServices::new().await;

    let a = svc.queue.enqueue_task(Task::new("first")).await.unwrap();
    let b = svc
        .queue
        .enqueue_task(Task::new("second").with_dependency(a.id))
        .await
        .unwrap();

    assert_eq!(b.status, TaskStatus::Blocked);
    assert_eq!(b.dependency_depth, 1);
}

#[tokio::test]
async fn test_enqueue_on_completed_prerequisite_is_ready() {
    let svc = TestServices::new().await;

    let a = svc.queue.enqueue_task(Task::new("first")).await.unwrap();
    let claimed = svc.queue.get_next_task().await.unwrap().unwrap();
    assert_eq!(claimed.id, a.id);
    svc.queue.complete_task(a.id, None).await.unwrap();

    let b = svc
        .queue
        .enqueue_task(Task::new("after the fact").with_dependency(a.id))
        .await
        .unwrap();
    assert_eq!(b.status, TaskStatus::Ready, "resolved prereq must not block");
    assert_eq!(b.dependency_depth, 0);
}

#[tokio::test]
async fn test_enqueue_missing_prerequisite_fails() {
    let svc = TestServices::new().await;

    let result = svc
        .queue
        .enqueue_task(Task::new("orphan").with_dependency(Uuid::new_v4()))
        .await;
    assert!(matches!(result, Err(DomainError::ValidationFailed(_))));
}

// Submitting a cycle must fail and leave the store untouched.
#[tokio::test]
async fn test_cycle_rejection_leaves_store_unchanged() {
    let svc = TestServices::new().await;

    let a = svc.queue.enqueue_task(Task::new("A")).await.unwrap();
    let b = svc
        .queue
        .enqueue_task(Task::new("B").with_dependency(a.id))
        .await
        .unwrap();
    let c = svc
        .queue
        .enqueue_task(
            Task::new("C")
                .with_dependency(a.id)
                .with_dependency(b.id),
        )
        .await
        .unwrap();

    let tasks_before = svc.queue.count(TaskFilters::default()).await.unwrap();
    let edges_before = svc.task_repo.get_unresolved_edges().await.unwrap();

    // A depending on C closes the loop A -> C -> A
    let result = svc
        .resolver
        .detect_circular_dependencies(&[c.id], Some(a.id))
        .await;

    match result {
        Err(DomainError::CircularDependency { cycles }) => {
            assert!(!cycles.is_empty());
            let flattened: Vec<Uuid> = cycles.concat();
            assert!(flattened.contains(&a.id));
            assert!(flattened.contains(&c.id));
        }
        other => panic!("expected CircularDependencyError, got {other:?}"),
    }

    // Enqueueing a genuinely cyclic task must also fail and write nothing
    let d_id = Uuid::new_v4();
    let mut d = Task::new("D");
    d.id = d_id;
    d.dependencies = vec![d_id];
    assert!(svc.queue.enqueue_task(d).await.is_err());

    let tasks_after = svc.queue.count(TaskFilters::default()).await.unwrap();
    let edges_after = svc.task_repo.get_unresolved_edges().await.unwrap();
    assert_eq!(tasks_before, tasks_after, "store must be unchanged");
    assert_eq!(edges_before.len(), edges_after.len());
}

// Identical tasks from different sources rank by the source factor.
#[tokio::test]
async fn test_human_task_outranks_agent_task() {
    let svc = TestServices::new().await;

    let agent = svc
        .queue
        .enqueue_task(
            Task::new("agent work")
                .with_source(TaskSource::AgentImplementation)
                .with_priority(3),
        )
        .await
        .unwrap();
    let human = svc
        .queue
        .enqueue_task(
            Task::new("human work")
                .with_source(TaskSource::Human)
                .with_priority(3),
        )
        .await
        .unwrap();

    // Source factor contributes (100 - 25) * 0.05 = 3.75 points
    let diff = human.calculated_priority - agent.calculated_priority;
    assert!(
        (diff - 3.75).abs() < 1e-9,
        "expected a strict 3.75-point gap, got {diff}"
    );

    let next = svc.queue.get_next_task().await.unwrap().unwrap();
    assert_eq!(next.id, human.id, "the human task must dispatch first");
}

#[tokio::test]
async fn test_claim_transitions_to_running_with_started_at() {
    let svc = TestServices::new().await;

    let task = svc.queue.enqueue_task(Task::new("claim me")).await.unwrap();
    let claimed = svc.queue.get_next_task().await.unwrap().unwrap();

    assert_eq!(claimed.id, task.id);
    assert_eq!(claimed.status, TaskStatus::Running);
    assert!(claimed.started_at.is_some());

    // Queue drained
    assert!(svc.queue.get_next_task().await.unwrap().is_none());
}

#[tokio::test]
async fn test_complete_unblocks_dependents() {
    let svc = TestServices::new().await;

    let a = svc.queue.enqueue_task(Task::new("A")).await.unwrap();
    let b = svc
        .queue
        .enqueue_task(Task::new("B").with_dependency(a.id))
        .await
        .unwrap();

    svc.queue.get_next_task().await.unwrap().unwrap();
    let newly_ready = svc.queue.complete_task(a.id, None).await.unwrap();
    assert_eq!(newly_ready, vec![b.id]);

    let b_after = svc.queue.get(b.id).await.unwrap().unwrap();
    assert_eq!(b_after.status, TaskStatus::Ready);

    let a_after = svc.queue.get(a.id).await.unwrap().unwrap();
    assert_eq!(a_after.status, TaskStatus::Completed);
    assert!(a_after.completed_at.is_some());
}

#[tokio::test]
async fn test_complete_waits_for_all_prerequisites() {
    let svc = TestServices::new().await;

    let a = svc.queue.enqueue_task(Task::new("A")).await.unwrap();
    let b = svc.queue.enqueue_task(Task::new("B")).await.unwrap();
    let c = svc
        .queue
        .enqueue_task(
            Task::new("C")
                .with_dependency(a.id)
                .with_dependency(b.id),
        )
        .await
        .unwrap();

    // Claim and complete A only: C still has B outstanding
    while let Some(claimed) = svc.queue.get_next_task().await.unwrap() {
        if claimed.id == a.id {
            break;
        }
        // Put B back by failing it with retry budget; simpler: complete it later
        svc.task_repo
            .set_status(claimed.id, TaskStatus::Ready)
            .await
            .unwrap();
    }
    let newly_ready = svc.queue.complete_task(a.id, None).await.unwrap();
    assert!(newly_ready.is_empty());
    assert_eq!(
        svc.queue.get(c.id).await.unwrap().unwrap().status,
        TaskStatus::Blocked
    );

    // Completing B releases C
    let claimed = svc.queue.get_next_task().await.unwrap().unwrap();
    assert_eq!(claimed.id, b.id);
    let newly_ready = svc.queue.complete_task(b.id, None).await.unwrap();
    assert_eq!(newly_ready, vec![c.id]);
    assert_eq!(
        svc.queue.get(c.id).await.unwrap().unwrap().status,
        TaskStatus::Ready
    );
}

#[tokio::test]
async fn test_ready_iff_no_unresolved_edges() {
    let svc = TestServices::new().await;

    let a = svc.queue.enqueue_task(Task::new("A")).await.unwrap();
    let b = svc
        .queue
        .enqueue_task(Task::new("B").with_dependency(a.id))
        .await
        .unwrap();

    // Invariant both directions, before and after completion
    for task_id in [a.id, b.id] {
        let task = svc.queue.get(task_id).await.unwrap().unwrap();
        let met = svc.resolver.are_all_dependencies_met(task_id).await.unwrap();
        assert_eq!(task.status == TaskStatus::Ready, met);
    }

    svc.queue.get_next_task().await.unwrap().unwrap();
    svc.queue.complete_task(a.id, None).await.unwrap();

    let b_after = svc.queue.get(b.id).await.unwrap().unwrap();
    assert_eq!(b_after.status, TaskStatus::Ready);
    assert!(svc.resolver.are_all_dependencies_met(b.id).await.unwrap());
}

#[tokio::test]
async fn test_fail_with_budget_requeues() {
    let svc = TestServices::new().await;

    let task = svc.queue.enqueue_task(Task::new("flaky")).await.unwrap();
    svc.queue.get_next_task().await.unwrap().unwrap();

    let status = svc.queue.fail_task(task.id, "transient blip").await.unwrap();
    assert_eq!(status, TaskStatus::Ready);

    let after = svc.queue.get(task.id).await.unwrap().unwrap();
    assert_eq!(after.status, TaskStatus::Ready);
    assert_eq!(after.retry_count, 1);
    assert_eq!(after.error_message.as_deref(), Some("transient blip"));
    assert!(after.started_at.is_none(), "started_at resets for the retry");
}

#[tokio::test]
async fn test_fail_past_budget_is_terminal_and_keeps_dependents_blocked() {
    let svc = TestServices::new().await;

    let mut task = Task::new("doomed");
    task.max_retries = 0;
    let task = svc.queue.enqueue_task(task).await.unwrap();
    let dependent = svc
        .queue
        .enqueue_task(Task::new("waiting").with_dependency(task.id))
        .await
        .unwrap();

    svc.queue.get_next_task().await.unwrap().unwrap();
    let status = svc.queue.fail_task(task.id, "fatal").await.unwrap();
    assert_eq!(status, TaskStatus::Failed);

    let after = svc.queue.get(task.id).await.unwrap().unwrap();
    assert_eq!(after.status, TaskStatus::Failed);
    assert!(after.completed_at.is_some());

    let dependent_after = svc.queue.get(dependent.id).await.unwrap().unwrap();
    assert_eq!(
        dependent_after.status,
        TaskStatus::Blocked,
        "failure must not unblock dependents"
    );
}

#[tokio::test]
async fn test_cancel_is_terminal() {
    let svc = TestServices::new().await;

    let task = svc.queue.enqueue_task(Task::new("doomed")).await.unwrap();
    let dependent = svc
        .queue
        .enqueue_task(Task::new("waiting").with_dependency(task.id))
        .await
        .unwrap();

    svc.queue.cancel_task(task.id).await.unwrap();

    let after = svc.queue.get(task.id).await.unwrap().unwrap();
    assert_eq!(after.status, TaskStatus::Cancelled);
    assert!(after.completed_at.is_some());

    let dependent_after = svc.queue.get(dependent.id).await.unwrap().unwrap();
    assert_eq!(dependent_after.status, TaskStatus::Blocked);

    // Cancelling a completed task is rejected
    assert!(svc.queue.cancel_task(task.id).await.is_err());
}

#[tokio::test]
async fn test_depth_zero_vs_resolved_prerequisite() {
    let svc = TestServices::new().await;

    // Root task: depth 0
    let root = svc.queue.enqueue_task(Task::new("root")).await.unwrap();
    assert_eq!(root.dependency_depth, 0);

    svc.queue.get_next_task().await.unwrap().unwrap();
    svc.queue.complete_task(root.id, None).await.unwrap();

    // Dependent on an already-resolved prerequisite: still depth 0
    let child = svc
        .queue
        .enqueue_task(Task::new("child").with_dependency(root.id))
        .await
        .unwrap();
    assert_eq!(child.dependency_depth, 0);

    // A genuinely unresolved chain gets depth 1
    let open = svc.queue.enqueue_task(Task::new("open")).await.unwrap();
    let waiting = svc
        .queue
        .enqueue_task(Task::new("waiting").with_dependency(open.id))
        .await
        .unwrap();
    assert_eq!(waiting.dependency_depth, 1);
}

#[tokio::test]
async fn test_list_with_status_filters() {
    let svc = TestServices::new().await;

    svc.queue.enqueue_task(Task::new("one")).await.unwrap();
    let two = svc.queue.enqueue_task(Task::new("two")).await.unwrap();
    svc.queue.cancel_task(two.id).await.unwrap();

    let ready = svc
        .queue
        .list(TaskFilters {
            status: Some(TaskStatus::Ready),
            ..TaskFilters::default()
        })
        .await
        .unwrap();
    assert_eq!(ready.len(), 1);

    let not_cancelled = svc
        .queue
        .list(TaskFilters {
            exclude_status: Some(TaskStatus::Cancelled),
            ..TaskFilters::default()
        })
        .await
        .unwrap();
    assert_eq!(not_cancelled.len(), 1);
}

#[tokio::test]
async fn test_batch_recalculation_skips_terminal_tasks() {
    let svc = TestServices::new().await;

    let active = svc.queue.enqueue_task(Task::new("active")).await.unwrap();
    let done = svc.queue.enqueue_task(Task::new("done")).await.unwrap();
    svc.queue.cancel_task(done.id).await.unwrap();

    let results = svc
        .priority
        .recalculate_priorities(&[active.id, done.id, Uuid::new_v4()])
        .await
        .unwrap();

    assert!(results.contains_key(&active.id));
    assert!(!results.contains_key(&done.id), "terminal tasks are skipped");
    assert_eq!(results.len(), 1);
}
