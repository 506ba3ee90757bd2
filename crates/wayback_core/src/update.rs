use url::Url;

use crate::{CrawlState, Effect, Msg, SessionState, StopPolicy};

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: CrawlState, msg: Msg) -> (CrawlState, Vec<Effect>) {
    let effects = match msg {
        Msg::SeedsSubmitted(raw) => {
            match state.session() {
                SessionState::Finishing | SessionState::Finished => {
                    return (state, Vec::new());
                }
                SessionState::Idle | SessionState::Running => {}
            }

            let seeds: Vec<Url> = raw.iter().filter_map(|s| Url::parse(s.trim()).ok()).collect();
            if seeds.is_empty() {
                return (state, Vec::new());
            }

            let should_start = state.session() == SessionState::Idle;
            if should_start {
                state.start_session();
            }

            let mut effects = Vec::with_capacity(seeds.len() + usize::from(should_start));
            if should_start {
                effects.push(Effect::StartSession);
            }
            for seed in &seeds {
                if let Some(host) = seed.host_str() {
                    state.allow_host(host);
                }
            }
            for seed in &seeds {
                if let Some((job_id, url)) = state.enqueue(seed, 0) {
                    effects.push(Effect::EnqueueUrl { job_id, url, depth: 0 });
                }
            }
            effects
        }
        Msg::LinksDiscovered { job_id, links } => {
            if state.session() != SessionState::Running {
                return (state, Vec::new());
            }
            let Some(depth) = state.job(job_id).map(|job| job.depth + 1) else {
                return (state, Vec::new());
            };

            let mut effects = Vec::new();
            for link in links {
                let Ok(url) = Url::parse(link.trim()) else {
                    continue;
                };
                if !matches!(url.scheme(), "http" | "https") {
                    continue;
                }
                if !url.host_str().is_some_and(|host| state.host_allowed(host)) {
                    continue;
                }
                if let Some((job_id, url)) = state.enqueue(&url, depth) {
                    effects.push(Effect::EnqueueUrl { job_id, url, depth });
                }
            }
            effects
        }
        Msg::JobDone { job_id, result } => {
            if !state.apply_done(job_id, result) {
                return (state, Vec::new());
            }
            finish_if_drained(&mut state)
        }
        Msg::StopRequested { policy } => match (state.session(), policy) {
            (SessionState::Running, _) => {
                state.finish_session();
                let mut effects = vec![Effect::StopFinish { policy }];
                effects.extend(finish_if_drained(&mut state));
                effects
            }
            // A gentle stop can still be escalated.
            (SessionState::Finishing, StopPolicy::Immediate) => vec![Effect::StopFinish { policy }],
            _ => Vec::new(),
        },
    };

    (state, effects)
}

fn finish_if_drained(state: &mut CrawlState) -> Vec<Effect> {
    let active = matches!(state.session(), SessionState::Running | SessionState::Finishing);
    if active && state.pending() == 0 {
        state.mark_finished();
        vec![Effect::SessionFinished]
    } else {
        Vec::new()
    }
}
