mod common;

use std::time::Duration;

use common::*;
use feedsync_core::{
    Error, FetchError, MutationBatch, MutationContext, RequestBehavior, RequestReason,
    SessionState, UiContext,
};

fn response(items: impl IntoIterator<Item = u64>) -> MutationBatch {
    items.into_iter().fold(
        MutationBatch::new().clear_all().add_root(feature(0)),
        |batch, n| batch.add_feature(id(0), feature(n)),
    )
}

#[tokio::test(start_paused = true)]
async fn test_request_with_wait_blocks_until_response() {
    let h = harness(unpaged(), RequestBehavior::RequestWithWait);
    let session = h.engine.create_session(None, UiContext::default());
    let events = Recorder::new();
    session.register_observer(events.clone());

    assert_eq!(session.state(), SessionState::Initializing);
    assert!(matches!(session.root_cursor(), Err(Error::SessionNotReady(_))));
    wait_for(|| h.fetcher.initial_calls() == 1).await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(session.state(), SessionState::Initializing);

    h.fetcher.respond(Ok(response(1..=3)));
    wait_for_state(&session, SessionState::Ready).await;
    assert_eq!(root_ids(&session), vec![1, 2, 3]);
    assert_eq!(events.events(), vec!["start"]);
    assert_eq!(*h.fetcher.reasons.lock(), vec![RequestReason::OpenWithoutContent]);
}

#[tokio::test(start_paused = true)]
async fn test_sessions_share_the_outstanding_request() {
    let h = harness(unpaged(), RequestBehavior::RequestWithWait);
    let first = h.engine.create_session(None, UiContext::default());
    let second = h.engine.create_session(None, UiContext::default());
    assert!(!h.engine.trigger_refresh(RequestReason::ManualRefresh));

    h.fetcher.respond(Ok(response(1..=2)));
    wait_for_state(&first, SessionState::Ready).await;
    wait_for_state(&second, SessionState::Ready).await;

    assert_eq!(h.fetcher.initial_calls(), 1);
    assert_eq!(root_ids(&first), vec![1, 2]);
    assert_eq!(root_ids(&second), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_shows_cache_then_appends_late_response() {
    let h = harness(unpaged(), RequestBehavior::RequestWithTimeout);
    h.engine.apply(response(1..=2), MutationContext::new()).await.unwrap();

    let session = h.engine.create_session(None, UiContext::default());
    let events = Recorder::new();
    session.register_observer(events.clone());
    assert_eq!(session.state(), SessionState::Initializing);

    tokio::time::sleep(Duration::from_millis(1_001)).await;
    wait_for_state(&session, SessionState::Ready).await;
    assert_eq!(root_ids(&session), vec![1, 2]);

    h.fetcher.respond(Ok(response(3..=4)));
    wait_for(|| root_ids(&session).len() == 4).await;
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(root_ids(&session), vec![1, 2, 3, 4]);
    assert_eq!(events.events(), vec!["start"]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_with_empty_cache_fills_in_on_late_response() {
    let h = harness(unpaged(), RequestBehavior::RequestWithTimeout);
    let session = h.engine.create_session(None, UiContext::default());

    tokio::time::sleep(Duration::from_millis(1_001)).await;
    wait_for_state(&session, SessionState::Ready).await;
    assert!(root_ids(&session).is_empty());

    h.fetcher.respond(Ok(response(1..=2)));
    wait_for(|| root_ids(&session).len() == 2).await;
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_response_before_deadline_wins_once() {
    let h = harness(unpaged(), RequestBehavior::RequestWithTimeout);
    let session = h.engine.create_session(None, UiContext::default());
    let events = Recorder::new();
    session.register_observer(events.clone());

    h.fetcher.respond(Ok(response(1..=3)));
    wait_for_state(&session, SessionState::Ready).await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    h.engine.flush().await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(root_ids(&session), vec![1, 2, 3]);
    assert_eq!(events.events(), vec!["start"]);
}

#[tokio::test(start_paused = true)]
async fn test_request_with_content_appends_instead_of_clearing() {
    let h = harness(unpaged(), RequestBehavior::RequestWithContent);
    h.engine.apply(response(1..=2), MutationContext::new()).await.unwrap();

    let session = h.engine.create_session(None, UiContext::default());
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(root_ids(&session), vec![1, 2]);

    h.fetcher.respond(Ok(response(2..=3)));
    wait_for(|| root_ids(&session).len() == 3).await;
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(root_ids(&session), vec![1, 2, 3]);
    assert_eq!(*h.fetcher.reasons.lock(), vec![RequestReason::OpenWithContent]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_request_without_cache_reports_no_cards() {
    let h = harness(unpaged(), RequestBehavior::RequestWithWait);
    let session = h.engine.create_session(None, UiContext::default());
    let events = Recorder::new();
    session.register_observer(events.clone());

    h.fetcher.respond(Err(FetchError::network("offline")));
    wait_for_state(&session, SessionState::Ready).await;
    assert_eq!(events.events(), vec!["start", "error:NoCards"]);
}

#[tokio::test(start_paused = true)]
async fn test_no_request_with_timeout_joins_only_an_outstanding_request() {
    let h = harness(unpaged(), RequestBehavior::NoRequestWithTimeout);
    let immediate = h.engine.create_session(None, UiContext::default());
    assert_eq!(immediate.state(), SessionState::Ready);

    assert!(h.engine.trigger_refresh(RequestReason::HostRequested));
    let waiting = h.engine.create_session(None, UiContext::default());
    assert_eq!(waiting.state(), SessionState::Initializing);

    h.fetcher.respond(Ok(response(1..=2)));
    wait_for_state(&waiting, SessionState::Ready).await;
    assert_eq!(root_ids(&waiting), vec![1, 2]);
    assert_eq!(h.fetcher.initial_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_host_refresh_invalidates_sessions_showing_old_content() {
    let h = harness(unpaged(), RequestBehavior::NoRequest);
    h.engine.apply(response(1..=2), MutationContext::new()).await.unwrap();
    let session = h.engine.create_session(None, UiContext::default());
    let events = Recorder::new();
    session.register_observer(events.clone());

    assert!(session.trigger_refresh(RequestReason::ManualRefresh));
    h.fetcher.respond(Ok(response(5..=6)));
    wait_for_state(&session, SessionState::Invalidated).await;
    assert_eq!(events.events(), vec!["start", "finished"]);

    let next = h.engine.create_session(None, UiContext::default());
    assert_eq!(root_ids(&next), vec![5, 6]);
}

#[tokio::test(start_paused = true)]
async fn test_view_depth_hint_prunes_before_appending_the_response() {
    let h = harness(unpaged(), RequestBehavior::RequestWithContent);
    h.engine.apply(response(1..=4), MutationContext::new()).await.unwrap();

    let session = h.engine.create_session(Some(id(2)), UiContext::default());
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(root_ids(&session), vec![1, 2]);

    h.fetcher.respond(Ok(response([5])));
    wait_for(|| root_ids(&session).len() == 3).await;
    assert_eq!(root_ids(&session), vec![1, 2, 5]);
    assert_eq!(*h.fetcher.reasons.lock(), vec![RequestReason::OpenWithContent]);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_and_response_after_shutdown_are_dropped() {
    let Harness { engine, fetcher, .. } = harness(unpaged(), RequestBehavior::RequestWithTimeout);
    let session = engine.create_session(None, UiContext::default());
    wait_for(|| fetcher.initial_calls() == 1).await;

    drop(session);
    drop(engine);

    tokio::time::sleep(Duration::from_secs(2)).await;
    fetcher.respond(Ok(response(1..=2)));
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(fetcher.initial_calls(), 1);
    assert_eq!(fetcher.page_calls(), 0);
}
