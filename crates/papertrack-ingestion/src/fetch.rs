//! Time-windowed, deduplicating fetch engine.
//!
//! Drives one query's pagination: request a page, claim every entry in the
//! ledger, sort fresh entries into strict-window and fill-window candidates,
//! then decide at the page boundary whether to continue.
//!
//! Stop rules, checked in order after every page:
//! 1. accepted ≥ target → `Done(TargetReached)`
//! 2. raw items ≥ `max_fetch_items` → `Done(FetchCapReached)`
//! 3. strict mode, oldest entry older than the strict window → `Done(WindowExhausted)`
//! 4. fill mode with a bounded lookback, oldest entry older than it → `Done(LookbackExhausted)`
//! 5. short page → `Exhausted`
//! 6. wall-clock budget spent → `Done(TimeBudgetExhausted)`
//!
//! A feed error (after the client's own retries) ends the run as
//! `Done(TransportFailed)` with whatever was accepted so far. A ledger error
//! is returned to the caller.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use papertrack_common::FetchWindow;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::dedup::{LedgerError, SeenLedger};
use crate::models::Paper;
use crate::sources::{PageRequest, PaperFeed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TargetReached,
    FetchCapReached,
    WindowExhausted,
    LookbackExhausted,
    TransportFailed,
    TimeBudgetExhausted,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::TargetReached => "target_reached",
            StopReason::FetchCapReached => "fetch_cap_reached",
            StopReason::WindowExhausted => "window_exhausted",
            StopReason::LookbackExhausted => "lookback_exhausted",
            StopReason::TransportFailed => "transport_failed",
            StopReason::TimeBudgetExhausted => "time_budget_exhausted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "reason", rename_all = "snake_case")]
pub enum FetchPhase {
    Fetching,
    Filtering,
    Done(StopReason),
    /// The feed returned fewer entries than requested.
    Exhausted,
}

impl FetchPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchPhase::Done(_) | FetchPhase::Exhausted)
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        match self {
            FetchPhase::Done(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl fmt::Display for FetchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchPhase::Fetching => f.write_str("fetching"),
            FetchPhase::Filtering => f.write_str("filtering"),
            FetchPhase::Done(reason) => f.write_str(reason.as_str()),
            FetchPhase::Exhausted => f.write_str("exhausted"),
        }
    }
}

/// Per-run counters. Created fresh for every run.
#[derive(Debug, Clone)]
pub struct FetchState {
    pub phase: FetchPhase,
    /// Offset of the next page request.
    pub offset: usize,
    /// Entries requested so far.
    pub requested: usize,
    /// Entries the feed returned so far, parsed or not.
    pub raw_items: usize,
    /// Accepted-new items counting towards the target.
    pub accepted: usize,
    pub pages: usize,
    pub skipped: usize,
    /// Oldest timestamp on the most recent page.
    pub oldest_on_page: Option<DateTime<Utc>>,
    /// Set once the feed has moved past the strict window; fill candidates
    /// only count from then on.
    pub strict_exhausted: bool,
}

impl Default for FetchState {
    fn default() -> Self {
        Self {
            phase: FetchPhase::Fetching,
            offset: 0,
            requested: 0,
            raw_items: 0,
            accepted: 0,
            pages: 0,
            skipped: 0,
            oldest_on_page: None,
            strict_exhausted: false,
        }
    }
}

/// Result of one engine run.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Accepted-new papers, most recent first, at most `target_new_count`.
    pub papers: Vec<Paper>,
    /// Every source id the run saw, accepted or not, in first-seen order.
    pub observed: Vec<String>,
    pub phase: FetchPhase,
    pub pages: usize,
    pub raw_items: usize,
    pub skipped: usize,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Invalid fetch window: {0}")]
    InvalidWindow(String),

    #[error("Empty search expression")]
    EmptyExpression,
}

/// Window bounds fixed at the start of a run.
struct Cutoffs {
    now: DateTime<Utc>,
    strict: DateTime<Utc>,
    lookback: Option<DateTime<Utc>>,
}

impl Cutoffs {
    fn new(window: &FetchWindow, now: DateTime<Utc>) -> Result<Self, EngineError> {
        let strict = days_before(now, window.pull_every_days, "pull_every_days")?;
        let lookback = window
            .max_lookback_days
            .map(|days| days_before(now, days, "max_lookback_days"))
            .transpose()?;
        Ok(Self { now, strict, lookback })
    }

    fn in_strict(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.strict && ts <= self.now
    }

    fn in_lookback(&self, ts: DateTime<Utc>) -> bool {
        ts <= self.now && self.lookback.map_or(true, |cutoff| ts >= cutoff)
    }
}

fn days_before(now: DateTime<Utc>, days: u32, key: &str) -> Result<DateTime<Utc>, EngineError> {
    ChronoDuration::try_days(i64::from(days))
        .and_then(|span| now.checked_sub_signed(span))
        .ok_or_else(|| EngineError::InvalidWindow(format!("{key} = {days} reaches past the calendar")))
}

pub struct FetchEngine {
    feed: Arc<dyn PaperFeed>,
    ledger: Arc<dyn SeenLedger>,
}

impl FetchEngine {
    pub fn new(feed: Arc<dyn PaperFeed>, ledger: Arc<dyn SeenLedger>) -> Self {
        Self { feed, ledger }
    }

    /// Run one query to completion.
    ///
    /// `label` names the query in logs. `now` anchors the time windows.
    #[instrument(skip(self, expression, window, now), fields(query = %label))]
    pub async fn run(
        &self,
        label: &str,
        expression: &str,
        window: &FetchWindow,
        now: DateTime<Utc>,
    ) -> Result<FetchOutcome, EngineError> {
        window.validate().map_err(EngineError::InvalidWindow)?;
        if expression.trim().is_empty() {
            return Err(EngineError::EmptyExpression);
        }

        let cutoffs = Cutoffs::new(window, now)?;
        let started = Instant::now();
        let mut state = FetchState::default();
        let mut strict: Vec<Paper> = Vec::new();
        let mut fill: Vec<Paper> = Vec::new();
        let mut observed: Vec<String> = Vec::new();
        let mut observed_set: HashSet<String> = HashSet::new();

        info!(
            target_new = window.target_new_count,
            pull_every = window.pull_every_days,
            fill = window.fill_enabled,
            "Start collecting papers"
        );

        while !state.phase.is_terminal() {
            // ── Fetching ──
            let size = match window.max_fetch_items {
                Some(cap) => window.fetch_batch_size.min(cap.saturating_sub(state.raw_items)),
                None => window.fetch_batch_size,
            };
            let request = PageRequest {
                query: expression.to_string(),
                start: state.offset,
                max_results: size,
            };

            let page = match self.feed.fetch_page(&request).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(offset = state.offset, error = %e, "Feed failed; keeping partial results");
                    state.phase = FetchPhase::Done(StopReason::TransportFailed);
                    break;
                }
            };

            state.phase = FetchPhase::Filtering;
            state.pages += 1;
            state.requested += size;
            state.offset += size;
            state.raw_items += page.raw_count;
            state.skipped += page.skipped;

            // ── Filtering ──
            let verdicts = self.ledger.claim(&page.papers).await?;

            state.oldest_on_page = page.papers.iter().filter_map(Paper::timestamp).min();
            if state.oldest_on_page.map_or(false, |ts| ts < cutoffs.strict) {
                state.strict_exhausted = true;
            }

            let mut page_fresh = 0usize;
            for (paper, fresh) in page.papers.into_iter().zip(verdicts) {
                if observed_set.insert(paper.source_id.clone()) {
                    observed.push(paper.source_id.clone());
                }
                let Some(ts) = paper.timestamp() else {
                    debug!(id = %paper.source_id, "Skip paper without timestamp");
                    continue;
                };
                if !fresh {
                    continue;
                }
                if cutoffs.in_strict(ts) {
                    strict.push(paper);
                    page_fresh += 1;
                } else if window.fill_enabled && ts < cutoffs.strict && cutoffs.in_lookback(ts) {
                    fill.push(paper);
                    page_fresh += 1;
                }
            }

            state.accepted = accepted_count(&state, strict.len(), fill.len(), window.fill_enabled);
            info!(
                page = state.pages,
                offset = request.start,
                page_items = page.raw_count,
                page_new = page_fresh,
                accepted = state.accepted,
                requested = state.requested,
                raw_total = state.raw_items,
                "Processed page"
            );

            state.phase = next_phase(&state, window, &cutoffs, page.raw_count, size, started);
        }

        // The run is over, so fill candidates no longer wait on strict ones.
        state.strict_exhausted = true;
        let papers = finalize(strict, fill, window.target_new_count);

        match state.phase {
            FetchPhase::Done(StopReason::TargetReached) => {
                info!(returned = papers.len(), "Collection done")
            }
            phase => info!(
                returned = papers.len(),
                target = window.target_new_count,
                stop = %phase,
                "Collection stopped before target"
            ),
        }

        Ok(FetchOutcome {
            papers,
            observed,
            phase: state.phase,
            pages: state.pages,
            raw_items: state.raw_items,
            skipped: state.skipped,
        })
    }
}

fn accepted_count(state: &FetchState, strict: usize, fill: usize, fill_enabled: bool) -> usize {
    if fill_enabled && state.strict_exhausted {
        strict + fill
    } else {
        strict
    }
}

fn next_phase(
    state: &FetchState,
    window: &FetchWindow,
    cutoffs: &Cutoffs,
    page_raw: usize,
    requested: usize,
    started: Instant,
) -> FetchPhase {
    if state.accepted >= window.target_new_count {
        return FetchPhase::Done(StopReason::TargetReached);
    }
    if window.max_fetch_items.map_or(false, |cap| state.raw_items >= cap) {
        return FetchPhase::Done(StopReason::FetchCapReached);
    }
    if let Some(oldest) = state.oldest_on_page {
        if !window.fill_enabled && oldest < cutoffs.strict {
            return FetchPhase::Done(StopReason::WindowExhausted);
        }
        if window.fill_enabled && cutoffs.lookback.map_or(false, |cutoff| oldest < cutoff) {
            return FetchPhase::Done(StopReason::LookbackExhausted);
        }
    }
    if page_raw < requested || page_raw == 0 {
        return FetchPhase::Exhausted;
    }
    if window.max_duration.map_or(false, |budget| started.elapsed() >= budget) {
        return FetchPhase::Done(StopReason::TimeBudgetExhausted);
    }
    FetchPhase::Fetching
}

/// Strict candidates first, then fill; capped at `target`; newest first.
fn finalize(mut strict: Vec<Paper>, mut fill: Vec<Paper>, target: usize) -> Vec<Paper> {
    let newest_first = |a: &Paper, b: &Paper| b.timestamp().cmp(&a.timestamp());
    strict.sort_by(newest_first);
    fill.sort_by(newest_first);
    let mut papers: Vec<Paper> = strict.into_iter().chain(fill).take(target).collect();
    papers.sort_by(newest_first);
    papers
}
