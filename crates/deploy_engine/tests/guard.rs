use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use deploy_engine::{Guarded, RequestGuard, SelectionFetch, Slot};
use pretty_assertions::assert_eq;
use tokio::sync::oneshot;

#[tokio::test]
async fn beginning_again_supersedes_the_previous_ticket() {
    let guard = RequestGuard::new();
    let first = guard.begin(Slot::Workbooks);
    let second = guard.begin(Slot::Workbooks);

    assert!(first.token().is_cancelled());
    assert!(!guard.is_current(&first));
    assert!(guard.is_current(&second));
    assert_eq!(second.epoch(), first.epoch() + 1);

    let late: Result<u32, Guarded<String>> = guard.run(&first, async { Ok(1) }).await;
    assert_eq!(late, Err(Guarded::Cancelled));
}

#[tokio::test]
async fn slots_are_independent() {
    let guard = RequestGuard::new();
    let workbooks = guard.begin(Slot::Workbooks);
    let info = guard.begin(Slot::ConnectionInfo);

    guard.cancel(&Slot::ConnectionInfo);

    assert!(guard.is_current(&workbooks));
    assert!(!guard.is_current(&info));
}

#[tokio::test]
async fn failures_of_the_current_request_are_reported() {
    let guard = RequestGuard::new();
    let ticket = guard.begin(Slot::Projects);

    let outcome: Result<(), Guarded<&str>> = guard.run(&ticket, async { Err("boom") }).await;

    assert_eq!(outcome, Err(Guarded::Failed("boom")));
}

#[tokio::test]
async fn cancelling_a_slot_interrupts_the_request_in_flight() {
    let guard = Arc::new(RequestGuard::new());
    let ticket = guard.begin(Slot::Job);
    let (_never_tx, never_rx) = oneshot::channel::<()>();

    let running = {
        let guard = Arc::clone(&guard);
        tokio::spawn(async move {
            guard
                .run(&ticket, async move {
                    let _ = never_rx.await;
                    Ok::<_, String>(())
                })
                .await
        })
    };
    tokio::task::yield_now().await;
    guard.cancel(&Slot::Job);

    assert_eq!(running.await.unwrap(), Err(Guarded::Cancelled));
}

#[tokio::test]
async fn empty_selection_clears_without_a_request() {
    let guard = Arc::new(RequestGuard::new());
    let calls = Arc::new(AtomicUsize::new(0));

    for key in [None, Some(""), Some("   ")] {
        let calls = Arc::clone(&calls);
        let outcome = guard
            .fetch_for_selection(Slot::Workbooks, key, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, String>(()) }
            })
            .await;
        assert_eq!(outcome, Ok(SelectionFetch::Cleared));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn only_the_latest_selection_is_applied() {
    let guard = Arc::new(RequestGuard::new());
    let (slow_tx, slow_rx) = oneshot::channel::<Vec<&str>>();

    let project_a = guard.fetch_for_selection(Slot::Workbooks, Some("A"), move |key| async move {
        assert_eq!(key, "A");
        slow_rx.await.map_err(|_| "dropped".to_string())
    });
    let project_b = guard.fetch_for_selection(Slot::Workbooks, Some(" B "), |key| async move {
        Ok::<_, String>(vec![if key == "B" { "wb-of-b" } else { "wrong key" }])
    });

    assert_eq!(project_b.await, Ok(SelectionFetch::Applied(vec!["wb-of-b"])));

    slow_tx.send(vec!["wb-of-a"]).unwrap();
    assert_eq!(project_a.await, Ok(SelectionFetch::Superseded));
}

#[tokio::test]
async fn clearing_the_selection_supersedes_the_pending_fetch() {
    let guard = Arc::new(RequestGuard::new());
    let (tx, rx) = oneshot::channel::<u32>();

    let pending = guard.fetch_for_selection(Slot::ConnectionInfo, Some("ds-1"), move |_| async move {
        rx.await.map_err(|_| "dropped".to_string())
    });
    let cleared = guard.fetch_for_selection(Slot::ConnectionInfo, None, |_| async {
        Ok::<u32, String>(0)
    });

    assert_eq!(cleared.await, Ok(SelectionFetch::Cleared));
    let _ = tx.send(7);
    assert_eq!(pending.await, Ok(SelectionFetch::Superseded));
}

#[test]
fn dropping_the_guard_cancels_every_slot() {
    let guard = RequestGuard::new();
    let projects = guard.begin(Slot::Projects);
    let job = guard.begin(Slot::Job);

    drop(guard);

    assert!(projects.token().is_cancelled());
    assert!(job.token().is_cancelled());
}
