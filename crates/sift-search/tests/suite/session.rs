use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use sift_index::ShardKey;
use sift_search::{MatchMode, SearchConfig, SearchSession, SessionState};

use super::support::{hermes_source, key, loader, SlowSource};

type Deliveries = Arc<Mutex<Vec<(u64, Vec<String>)>>>;
type Warnings = Arc<Mutex<Vec<(u64, ShardKey, bool)>>>;

fn config(match_mode: MatchMode) -> SearchConfig {
    SearchConfig {
        debounce_ms: 150,
        match_mode,
        ..SearchConfig::default()
    }
}

fn session(source: Arc<SlowSource>, match_mode: MatchMode) -> SearchSession {
    SearchSession::new(
        loader(source, Duration::from_millis(2_000)),
        &config(match_mode),
        tokio::runtime::Handle::current(),
    )
}

fn record_results(session: &SearchSession) -> Deliveries {
    let deliveries = Deliveries::default();
    let sink = Arc::clone(&deliveries);
    session.on_results(move |rows, generation| {
        let names = rows.iter().map(|row| row.qualified_name()).collect();
        sink.lock().push((generation, names));
    });
    deliveries
}

fn record_warnings(session: &SearchSession) -> Warnings {
    let warnings = Warnings::default();
    let sink = Arc::clone(&warnings);
    session.on_warning(move |warning, generation| {
        sink.lock().push((generation, warning.key, warning.retryable));
    });
    warnings
}

async fn settle() {
    tokio::time::sleep(Duration::from_secs(5)).await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn rapid_input_settles_once_for_the_last_keystroke() {
    let session = session(hermes_source(Duration::ZERO), MatchMode::Prefix);
    let deliveries = record_results(&session);

    for text in ["i", "is", "isA"] {
        session.submit_input(text);
        assert_eq!(session.state(), SessionState::Typing);
        tokio::time::sleep(Duration::from_millis(40)).await;
    }
    settle().await;

    assert_eq!(
        *deliveries.lock(),
        vec![(
            3,
            vec![
                "hermes::SkymapMask::isAllowed".to_owned(),
                "hermes::InvertMask::isAllowed".to_owned()
            ]
        )]
    );
    assert_eq!(session.state(), SessionState::Settled);
    assert_eq!(session.results().map(|settled| settled.generation), Some(3));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn empty_input_delivers_an_empty_set_immediately() {
    let source = hermes_source(Duration::ZERO);
    let session = session(source.clone(), MatchMode::Prefix);
    let deliveries = record_results(&session);

    session.submit_input("i");
    session.submit_input("   ");
    assert_eq!(*deliveries.lock(), vec![(2, Vec::new())]);
    assert_eq!(session.state(), SessionState::Idle);

    settle().await;
    assert_eq!(*deliveries.lock(), vec![(2, Vec::new())]);
    assert_eq!(source.fetches(), 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn broken_shards_warn_without_hiding_healthy_results() {
    let session = session(hermes_source(Duration::ZERO), MatchMode::Substring);
    let deliveries = record_results(&session);
    let warnings = record_warnings(&session);

    session.submit_input("isAllowed");
    settle().await;

    assert_eq!(*warnings.lock(), vec![(1, key('m'), false)]);
    let deliveries = deliveries.lock();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].0, 1);
    assert_eq!(deliveries[0].1.len(), 2);
    assert_eq!(session.results().map(|settled| settled.warnings.len()), Some(1));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn grouped_variants_reach_subscribers() {
    let session = session(hermes_source(Duration::ZERO), MatchMode::Prefix);
    let rows = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&rows);
    session.on_results(move |delivered, _| sink.lock().extend_from_slice(delivered));

    session.submit_input("integrateOverLOS");
    settle().await;

    let rows = rows.lock();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].qualified_name(), "hermes::InverseComptonIntegrator::integrateOverLOS");
    let anchors: Vec<&str> = rows[0].variants.iter().map(|v| v.target.anchor()).collect();
    assert_eq!(anchors, vec!["a969", "ae86"]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn results_of_superseded_generations_are_discarded() {
    let source = hermes_source(Duration::from_millis(500));
    let session = session(source.clone(), MatchMode::Prefix);
    let deliveries = record_results(&session);

    session.submit_input("is");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(session.state(), SessionState::Loading);

    session.submit_input("isA");
    assert_eq!(session.state(), SessionState::Typing);
    settle().await;

    let generations: Vec<u64> = deliveries.lock().iter().map(|(generation, _)| *generation).collect();
    assert_eq!(generations, vec![2]);
    assert_eq!(source.fetches(), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn callbacks_may_submit_input_reentrantly() {
    let session = Arc::new(session(hermes_source(Duration::ZERO), MatchMode::Prefix));
    let first: Arc<Mutex<Vec<u64>>> = Arc::default();
    let second: Arc<Mutex<Vec<u64>>> = Arc::default();

    let weak: Weak<SearchSession> = Arc::downgrade(&session);
    let sink = Arc::clone(&first);
    session.on_results(move |rows, generation| {
        sink.lock().push(generation);
        if !rows.is_empty() {
            if let Some(session) = weak.upgrade() {
                session.submit_input("");
            }
        }
    });
    let sink = Arc::clone(&second);
    session.on_results(move |_, generation| sink.lock().push(generation));

    session.submit_input("init");
    settle().await;

    assert_eq!(*first.lock(), vec![1, 2]);
    // Generation 1 was superseded before the second subscriber saw it.
    assert_eq!(*second.lock(), vec![2]);
    assert_eq!(session.generation(), 2);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn timeouts_warn_and_are_retried() {
    let source = hermes_source(Duration::from_secs(60));
    let session = session(source.clone(), MatchMode::Prefix);
    let deliveries = record_results(&session);
    let warnings = record_warnings(&session);

    session.submit_input("in");
    settle().await;
    assert_eq!(*warnings.lock(), vec![(1, key('i'), true)]);
    assert_eq!(*deliveries.lock(), vec![(1, Vec::new())]);

    source.set_delay(Duration::from_millis(10));
    session.submit_input("ini");
    settle().await;
    let deliveries = deliveries.lock();
    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[1], (2, vec!["hermes::SkymapMask::isAllowed".to_owned()]));
    assert_eq!(source.fetches(), 2);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn closing_drops_pending_work() {
    let source = hermes_source(Duration::ZERO);
    let session = session(source.clone(), MatchMode::Prefix);
    let deliveries = record_results(&session);

    session.submit_input("i");
    session.close();
    assert!(session.is_closed());
    assert_eq!(session.state(), SessionState::Idle);

    let generation = session.generation();
    session.submit_input("is");
    assert_eq!(session.generation(), generation);

    settle().await;
    assert!(deliveries.lock().is_empty());
    assert_eq!(source.fetches(), 0);
}
