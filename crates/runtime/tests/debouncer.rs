#![forbid(unsafe_code)]

use cv_runtime::Debouncer;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const WINDOW: Duration = Duration::from_millis(100);

fn counting_debouncer() -> (Debouncer, Arc<AtomicUsize>) {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let debouncer = Debouncer::spawn(WINDOW, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (debouncer, fired)
}

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn fires_exactly_once_after_the_final_drain() {
    let (debouncer, fired) = counting_debouncer();

    for name in ["a", "b", "c"] {
        debouncer.register(name);
    }
    debouncer.complete("b");
    debouncer.complete("a");
    debouncer.register("d");
    debouncer.complete("c");
    advance(250).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0, "d is still pending");

    debouncer.complete("d");
    advance(50).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0, "window has not elapsed");
    advance(100).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    advance(1_000).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn registration_inside_the_window_defers_to_the_next_drain() {
    let (debouncer, fired) = counting_debouncer();

    debouncer.register("scan");
    debouncer.complete("scan");
    advance(50).await;
    debouncer.register("thumbnails");
    advance(100).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0, "refresh deferred");

    debouncer.complete("thumbnails");
    advance(150).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn every_drain_episode_fires_once() {
    let (debouncer, fired) = counting_debouncer();

    for episode in 1..=3 {
        debouncer.register("import");
        debouncer.register("faces");
        debouncer.complete("faces");
        debouncer.complete("import");
        advance(150).await;
        assert_eq!(fired.load(Ordering::SeqCst), episode);
    }
}

#[tokio::test(start_paused = true)]
async fn stray_completions_never_fire() {
    let (debouncer, fired) = counting_debouncer();
    debouncer.complete("never-registered");
    advance(500).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn guards_complete_on_drop() {
    let (debouncer, fired) = counting_debouncer();

    let first = debouncer.track("geocode");
    let second = debouncer.track("faces");
    assert_eq!(first.name(), "geocode");
    drop(first);
    advance(150).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    drop(second);
    advance(150).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn a_scheduled_refresh_survives_dropping_every_handle() {
    let (debouncer, fired) = counting_debouncer();
    debouncer.register("scan");
    debouncer.complete("scan");
    drop(debouncer);

    advance(150).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn tracking_the_same_name_twice_waits_for_both() {
    let (debouncer, fired) = counting_debouncer();

    let first = debouncer.track("thumbnails");
    let second = debouncer.track("thumbnails");
    drop(first);
    advance(150).await;
    assert_eq!(
        fired.load(Ordering::SeqCst),
        0,
        "second thumbnails job still running"
    );

    drop(second);
    advance(1_000).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}
