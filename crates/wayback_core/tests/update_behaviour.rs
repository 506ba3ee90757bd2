use std::sync::Once;

use pretty_assertions::assert_eq;
use wayback_core::{update, CrawlState, Effect, JobResultKind, Msg, SessionState, StopPolicy};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(engine_logging::initialize_for_tests);
}

fn seeds(state: CrawlState, urls: &[&str]) -> (CrawlState, Vec<Effect>) {
    update(
        state,
        Msg::SeedsSubmitted(urls.iter().map(|u| u.to_string()).collect()),
    )
}

fn done(state: CrawlState, job_id: u64, result: JobResultKind) -> (CrawlState, Vec<Effect>) {
    update(state, Msg::JobDone { job_id, result })
}

#[test]
fn seeds_start_the_session_and_enqueue_once() {
    init_logging();
    let (state, effects) = seeds(
        CrawlState::new(),
        &["http://example.com/", "  ", "http://example.com/#top", "http://other.org/"],
    );

    assert_eq!(state.session(), SessionState::Running);
    assert_eq!(
        effects,
        vec![
            Effect::StartSession,
            Effect::EnqueueUrl {
                job_id: 1,
                url: "http://example.com/".to_string(),
                depth: 0,
            },
            Effect::EnqueueUrl {
                job_id: 2,
                url: "http://other.org/".to_string(),
                depth: 0,
            },
        ]
    );
}

#[test]
fn discovered_links_stay_on_seed_hosts() {
    init_logging();
    let (state, _) = seeds(CrawlState::new(), &["http://example.com/"]);
    let (state, effects) = update(
        state,
        Msg::LinksDiscovered {
            job_id: 1,
            links: vec![
                "http://example.com/about".to_string(),
                "http://example.com/about/".to_string(),
                "http://cdn.example.com/logo.png".to_string(),
                "http://elsewhere.net/".to_string(),
                "mailto:me@example.com".to_string(),
                "http://example.com/".to_string(),
            ],
        },
    );

    assert_eq!(
        effects,
        vec![
            Effect::EnqueueUrl {
                job_id: 2,
                url: "http://example.com/about".to_string(),
                depth: 1,
            },
            Effect::EnqueueUrl {
                job_id: 3,
                url: "http://cdn.example.com/logo.png".to_string(),
                depth: 1,
            },
        ]
    );
    assert_eq!(state.job(3).map(|job| job.depth), Some(1));
}

#[test]
fn session_finishes_when_every_job_reports() {
    init_logging();
    let (state, _) = seeds(CrawlState::new(), &["http://example.com/", "http://example.org/"]);
    let (state, effects) = done(state, 1, JobResultKind::Succeeded);
    assert!(effects.is_empty());
    assert_eq!(state.pending(), 1);

    let (state, effects) = done(state, 2, JobResultKind::Dropped);
    assert_eq!(effects, vec![Effect::SessionFinished]);
    assert_eq!(state.session(), SessionState::Finished);

    let summary = state.summary();
    assert_eq!(summary.jobs_total, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.dropped, 1);
    assert!(!summary.is_clean());
}

#[test]
fn duplicate_job_reports_are_ignored() {
    init_logging();
    let (state, _) = seeds(CrawlState::new(), &["http://example.com/", "http://example.org/"]);
    let (state, _) = done(state, 1, JobResultKind::Failed);
    let (state, effects) = done(state, 1, JobResultKind::Succeeded);

    assert!(effects.is_empty());
    assert_eq!(state.summary().failed, 1);
    assert_eq!(state.summary().succeeded, 0);
}

#[test]
fn stop_waits_for_in_flight_jobs() {
    init_logging();
    let (state, _) = seeds(CrawlState::new(), &["http://example.com/"]);
    let (state, effects) = update(
        state,
        Msg::StopRequested {
            policy: StopPolicy::Finish,
        },
    );
    assert_eq!(
        effects,
        vec![Effect::StopFinish {
            policy: StopPolicy::Finish
        }]
    );
    assert_eq!(state.session(), SessionState::Finishing);

    let (state, effects) = update(
        state,
        Msg::LinksDiscovered {
            job_id: 1,
            links: vec!["http://example.com/late".to_string()],
        },
    );
    assert!(effects.is_empty());

    let (state, effects) = done(state, 1, JobResultKind::Succeeded);
    assert_eq!(effects, vec![Effect::SessionFinished]);
    assert_eq!(state.session(), SessionState::Finished);
}

#[test]
fn seeds_ignored_after_finish() {
    init_logging();
    let (state, _) = seeds(CrawlState::new(), &["http://example.com/"]);
    let (state, _) = done(state, 1, JobResultKind::Succeeded);
    let (state, effects) = seeds(state, &["http://example.org/"]);

    assert!(effects.is_empty());
    assert_eq!(state.summary().jobs_total, 1);
}

#[test]
fn gentle_stop_can_be_escalated_once() {
    init_logging();
    let (state, _) = seeds(CrawlState::new(), &["http://example.com/"]);
    let finish = Msg::StopRequested {
        policy: StopPolicy::Finish,
    };
    let (state, _) = update(state, finish.clone());
    let (state, effects) = update(state, finish);
    assert!(effects.is_empty());

    let (state, effects) = update(
        state,
        Msg::StopRequested {
            policy: StopPolicy::Immediate,
        },
    );
    assert_eq!(
        effects,
        vec![Effect::StopFinish {
            policy: StopPolicy::Immediate
        }]
    );
    assert_eq!(state.session(), SessionState::Finishing);
}

#[test]
fn stop_before_any_seed_changes_nothing() {
    init_logging();
    let state = CrawlState::new();
    let (next, effects) = update(
        state.clone(),
        Msg::StopRequested {
            policy: StopPolicy::Immediate,
        },
    );

    assert_eq!(state, next);
    assert!(effects.is_empty());
}
