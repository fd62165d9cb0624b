//! Tracking pipeline.
//!
//! Orchestrates one run over every configured query and source:
//!   1. Compile each query, ANDed with the global scope, once per feed
//!   2. Run the fetch engine for each feed in configured order
//!   3. Merge the per-source results: newest first, duplicates folded by
//!      DOI or by title and year, earlier sources winning ties
//!   4. Collect a per-query report, in config order
//!
//! A source that stops on a feed failure still reports its partial results
//! and does not stop the other sources. A ledger failure aborts the whole run.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use papertrack_common::{AppConfig, FetchWindow, SearchQuery};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::dedup::{batch_key, BatchKey, SeenLedger};
use crate::fetch::{EngineError, FetchEngine, FetchPhase, StopReason};
use crate::models::{Paper, PaperSource};
use crate::sources::PaperFeed;

// ── Job config ────────────────────────────────────────────────────────────────

/// Everything one tracking run needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct TrackingJob {
    pub queries: Vec<SearchQuery>,
    pub scope: Option<SearchQuery>,
    pub window: FetchWindow,
    /// Queries in flight at once; 1 runs them in order.
    pub concurrency: usize,
}

impl TrackingJob {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            queries: config.queries.clone(),
            scope: config.scope.clone(),
            window: config.search.fetch_window(),
            concurrency: config.search.concurrency.max(1),
        }
    }
}

// ── Result summary ────────────────────────────────────────────────────────────

/// One source's share of a query.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRun {
    pub source: PaperSource,
    /// Compiled provider expression.
    pub expression: String,
    /// `None` when the query has nothing this source can search.
    pub phase: Option<FetchPhase>,
    /// Distinct entries seen (and marked seen) during the run.
    pub observed: usize,
    pub pages: usize,
    pub raw_items: usize,
    pub skipped: usize,
    /// Accepted-new papers before the cross-source merge.
    pub accepted: usize,
}

impl SourceRun {
    fn not_searchable(source: PaperSource) -> Self {
        Self {
            source,
            expression: String::new(),
            phase: None,
            observed: 0,
            pages: 0,
            raw_items: 0,
            skipped: 0,
            accepted: 0,
        }
    }

    pub fn failed(&self) -> bool {
        self.phase == Some(FetchPhase::Done(StopReason::TransportFailed))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    pub name: String,
    /// Merged across sources, newest first.
    pub papers: Vec<Paper>,
    /// In configured source order.
    pub sources: Vec<SourceRun>,
}

impl QueryReport {
    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceRun> {
        self.sources.iter().filter(|s| s.failed())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackingReport {
    pub sources: Vec<PaperSource>,
    pub started_at: DateTime<Utc>,
    pub queries: Vec<QueryReport>,
    pub total_new: usize,
}

impl TrackingReport {
    /// Queries where at least one source ended on a feed failure.
    pub fn degraded(&self) -> impl Iterator<Item = &QueryReport> {
        self.queries
            .iter()
            .filter(|q| q.failed_sources().next().is_some())
    }

    /// Whether every source that ran failed, for every query.
    pub fn all_failed(&self) -> bool {
        let mut ran = self
            .queries
            .iter()
            .flat_map(|q| q.sources.iter())
            .filter(|s| s.phase.is_some())
            .peekable();
        ran.peek().is_some() && ran.all(SourceRun::failed)
    }
}

/// One compiled expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledQuery {
    pub name: String,
    pub source: PaperSource,
    pub expression: String,
}

/// Compiled expression for every query and feed, without touching the
/// network. Query-major, feeds in the order given.
pub fn compile_all(job: &TrackingJob, feeds: &[Arc<dyn PaperFeed>]) -> Vec<CompiledQuery> {
    job.queries
        .iter()
        .flat_map(|q| {
            feeds.iter().map(move |feed| CompiledQuery {
                name: q.display_name().to_string(),
                source: feed.source(),
                expression: feed.compile_query(q, job.scope.as_ref()),
            })
        })
        .collect()
}

// ── Cross-source merge ────────────────────────────────────────────────────────

fn newest_first(a: &Paper, b: &Paper) -> Ordering {
    b.timestamp().cmp(&a.timestamp())
}

/// Merge per-source batches (given in source priority order) into one list
/// of at most `limit` papers.
///
/// Papers are ordered newest first, then by source priority, then by id.
/// Papers sharing a [`BatchKey`] collapse into one: the higher-priority
/// source wins, then the newer paper, then the lower id. The winner keeps the
/// slot of the key's first occurrence.
pub fn merge_sources(batches: Vec<Vec<Paper>>, limit: usize) -> Vec<Paper> {
    let mut ranked: Vec<(usize, Paper)> = batches
        .into_iter()
        .enumerate()
        .flat_map(|(rank, papers)| papers.into_iter().map(move |p| (rank, p)))
        .collect();
    ranked.sort_by(|(ra, a), (rb, b)| {
        newest_first(a, b)
            .then(ra.cmp(rb))
            .then_with(|| a.source_id.cmp(&b.source_id))
    });

    let mut slots: Vec<(usize, Paper)> = Vec::with_capacity(ranked.len());
    let mut by_key: HashMap<BatchKey, usize> = HashMap::new();
    for (rank, paper) in ranked {
        let Some(key) = batch_key(&paper) else {
            slots.push((rank, paper));
            continue;
        };
        match by_key.get(&key) {
            Some(&slot) => {
                let (held_rank, held) = &slots[slot];
                let wins = rank
                    .cmp(held_rank)
                    .then_with(|| newest_first(&paper, held))
                    .then_with(|| paper.source_id.cmp(&held.source_id))
                    == Ordering::Less;
                if wins {
                    slots[slot] = (rank, paper);
                }
            }
            None => {
                by_key.insert(key, slots.len());
                slots.push((rank, paper));
            }
        }
    }

    slots.into_iter().take(limit).map(|(_, p)| p).collect()
}

// ── Main pipeline ─────────────────────────────────────────────────────────────

/// Run every query in `job` against every feed in `feeds`, deduplicating
/// through `ledger`. Feeds are tried in order; earlier feeds win duplicates.
#[instrument(skip_all, fields(queries = job.queries.len(), sources = feeds.len()))]
pub async fn run_tracking(
    job: &TrackingJob,
    feeds: &[Arc<dyn PaperFeed>],
    ledger: Arc<dyn SeenLedger>,
    now: DateTime<Utc>,
) -> Result<TrackingReport, EngineError> {
    let engines: Vec<(PaperSource, FetchEngine)> = feeds
        .iter()
        .map(|feed| (feed.source(), FetchEngine::new(Arc::clone(feed), Arc::clone(&ledger))))
        .collect();
    let compiled = compile_all(job, feeds);

    info!(
        queries = job.queries.len(),
        sources = ?engines.iter().map(|(s, _)| s.as_str()).collect::<Vec<_>>(),
        concurrency = job.concurrency,
        "Starting tracking run"
    );

    let engines = &engines;
    let window = &job.window;
    let per_query = compiled.chunks(feeds.len().max(1)).map(<[CompiledQuery]>::to_vec);
    let queries: Vec<QueryReport> = stream::iter(per_query)
        .map(|compiled| async move {
            let name = compiled.first().map(|c| c.name.clone()).unwrap_or_default();
            let mut batches = Vec::with_capacity(compiled.len());
            let mut runs = Vec::with_capacity(compiled.len());

            for (entry, (source, engine)) in compiled.into_iter().zip(engines.iter()) {
                if entry.expression.trim().is_empty() {
                    warn!(query = %name, source = %source, "Nothing searchable for this source; skipping");
                    runs.push(SourceRun::not_searchable(*source));
                    batches.push(Vec::new());
                    continue;
                }

                info!(query = %name, source = %source, expression = %entry.expression, "Running query");
                let outcome = engine.run(&name, &entry.expression, window, now).await?;
                let run = SourceRun {
                    source: *source,
                    expression: entry.expression,
                    phase: Some(outcome.phase),
                    observed: outcome.observed.len(),
                    pages: outcome.pages,
                    raw_items: outcome.raw_items,
                    skipped: outcome.skipped,
                    accepted: outcome.papers.len(),
                };
                if run.failed() {
                    warn!(query = %name, source = %source, kept = run.accepted, "Source degraded to partial results");
                }
                runs.push(run);
                batches.push(outcome.papers);
            }

            let papers = merge_sources(batches, window.target_new_count);
            info!(query = %name, merged = papers.len(), "Query finished");
            Ok::<_, EngineError>(QueryReport { name, papers, sources: runs })
        })
        .buffered(job.concurrency.max(1))
        .try_collect()
        .await?;

    let total_new = queries.iter().map(|q| q.papers.len()).sum();
    info!(total_new, "Tracking run finished");

    Ok(TrackingReport {
        sources: engines.iter().map(|(s, _)| *s).collect(),
        started_at: now,
        queries,
        total_new,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::{LedgerError, MemoryLedger, SeenRecord};
    use crate::sources::{FeedError, FeedPage, PageRequest};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use papertrack_common::{Field, FieldQuery};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    /// Serves the same fresh papers for every query; fails any query whose
    /// expression mentions `broken`.
    struct SharedFeed {
        source: PaperSource,
        papers: Vec<Paper>,
    }

    impl SharedFeed {
        fn arxiv(papers: Vec<Paper>) -> Arc<dyn PaperFeed> {
            Arc::new(Self { source: PaperSource::Arxiv, papers })
        }

        fn crossref(papers: Vec<Paper>) -> Arc<dyn PaperFeed> {
            Arc::new(Self { source: PaperSource::Crossref, papers })
        }
    }

    #[async_trait]
    impl PaperFeed for SharedFeed {
        fn source(&self) -> PaperSource {
            self.source
        }

        fn compile_query(&self, query: &SearchQuery, scope: Option<&SearchQuery>) -> String {
            match self.source {
                PaperSource::Arxiv => crate::sources::arxiv::compile(query, scope),
                PaperSource::Crossref => crate::sources::crossref::compile(query, scope),
            }
        }

        async fn fetch_page(&self, request: &PageRequest) -> Result<FeedPage, FeedError> {
            if request.query.contains("broken") {
                return Err(FeedError::Status { status: 503, url: "test".to_string() });
            }
            let start = request.start.min(self.papers.len());
            let end = (start + request.max_results).min(self.papers.len());
            Ok(FeedPage::from_papers(self.papers[start..end].to_vec()))
        }
    }

    struct DownLedger;

    #[async_trait]
    impl SeenLedger for DownLedger {
        async fn is_seen(&self, _: &str, _: &str) -> Result<bool, LedgerError> {
            Err(LedgerError::Unavailable("offline".to_string()))
        }

        async fn mark_seen(&self, _: &[SeenRecord]) -> Result<(), LedgerError> {
            Ok(())
        }
    }

    fn dated(source: PaperSource, id: &str, hours_ago: i64) -> Paper {
        let mut p = Paper::new(source, id);
        p.updated = Some(now() - ChronoDuration::hours(hours_ago));
        p.published = p.updated;
        p
    }

    fn papers(n: usize) -> Vec<Paper> {
        (0..n)
            .map(|i| dated(PaperSource::Arxiv, &format!("2405.{i:05}"), i as i64 + 1))
            .collect()
    }

    fn title(name: &str, term: &str) -> SearchQuery {
        SearchQuery::named(name).with_field(Field::Title, FieldQuery::new().or([term]))
    }

    fn job(queries: Vec<SearchQuery>, concurrency: usize) -> TrackingJob {
        TrackingJob {
            queries,
            scope: Some(
                SearchQuery::new(None).with_field(Field::Category, FieldQuery::new().or(["cs.LG"])),
            ),
            window: FetchWindow {
                target_new_count: 3,
                fetch_batch_size: 10,
                ..FetchWindow::default()
            },
            concurrency,
        }
    }

    #[tokio::test]
    async fn test_queries_share_the_ledger() {
        let ledger = Arc::new(MemoryLedger::new());
        let job = job(vec![title("first", "diffusion"), title("second", "transformer")], 1);

        let report = run_tracking(&job, &[SharedFeed::arxiv(papers(5))], ledger.clone(), now())
            .await
            .unwrap();

        assert_eq!(report.sources, vec![PaperSource::Arxiv]);
        assert_eq!(report.queries.len(), 2);
        let first = &report.queries[0];
        assert_eq!(first.name, "first");
        assert_eq!(first.sources[0].expression, "(cat:cs.LG AND ti:diffusion)");
        assert_eq!(first.papers.len(), 3);
        assert_eq!(first.sources[0].phase, Some(FetchPhase::Done(StopReason::TargetReached)));
        // The first query claimed everything on its page.
        let second = &report.queries[1];
        assert!(second.papers.is_empty());
        assert_eq!(second.sources[0].phase, Some(FetchPhase::Exhausted));
        assert_eq!(report.total_new, 3);
        assert_eq!(ledger.len(), 5);
    }

    #[tokio::test]
    async fn test_concurrent_queries_never_double_claim() {
        let queries = (0..4).map(|i| title(&format!("q{i}"), &format!("term{i}"))).collect();
        let report = run_tracking(
            &job(queries, 4),
            &[SharedFeed::arxiv(papers(5))],
            Arc::new(MemoryLedger::new()),
            now(),
        )
        .await
        .unwrap();

        let names: Vec<&str> = report.queries.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["q0", "q1", "q2", "q3"]);
        let mut ids: Vec<&str> = report
            .queries
            .iter()
            .flat_map(|q| q.papers.iter().map(|p| p.source_id.as_str()))
            .collect();
        let claimed = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), claimed);
    }

    #[tokio::test]
    async fn test_feed_failure_is_fail_soft() {
        let job = job(vec![title("bad", "broken"), title("good", "diffusion")], 1);
        let report = run_tracking(
            &job,
            &[SharedFeed::arxiv(papers(5))],
            Arc::new(MemoryLedger::new()),
            now(),
        )
        .await
        .unwrap();

        assert_eq!(
            report.queries[0].sources[0].phase,
            Some(FetchPhase::Done(StopReason::TransportFailed))
        );
        assert_eq!(report.degraded().count(), 1);
        assert!(!report.all_failed());
        assert_eq!(report.queries[1].papers.len(), 3);
    }

    #[tokio::test]
    async fn test_one_failing_source_does_not_sink_the_query() {
        // "broken" only reaches the arXiv expression; Crossref still runs.
        let q = SearchQuery::named("q")
            .with_field(Field::Category, FieldQuery::new().or(["broken"]))
            .with_field(Field::Title, FieldQuery::new().or(["diffusion"]));
        let crossref = vec![dated(PaperSource::Crossref, "10.1/a", 1)];
        let job = TrackingJob { scope: None, ..job(vec![q], 1) };

        let report = run_tracking(
            &job,
            &[SharedFeed::arxiv(papers(2)), SharedFeed::crossref(crossref)],
            Arc::new(MemoryLedger::new()),
            now(),
        )
        .await
        .unwrap();

        let query = &report.queries[0];
        assert!(query.sources[0].failed());
        assert_eq!(query.sources[1].phase, Some(FetchPhase::Exhausted));
        assert_eq!(query.papers.len(), 1);
        assert_eq!(query.papers[0].source, PaperSource::Crossref);
        assert_eq!(report.degraded().count(), 1);
        assert!(!report.all_failed());
    }

    #[tokio::test]
    async fn test_every_source_failing_is_reported() {
        let job = TrackingJob { scope: None, ..job(vec![title("q", "broken")], 1) };
        let report = run_tracking(
            &job,
            &[SharedFeed::arxiv(papers(2)), SharedFeed::crossref(Vec::new())],
            Arc::new(MemoryLedger::new()),
            now(),
        )
        .await
        .unwrap();
        assert!(report.all_failed());
        assert!(report.queries[0].papers.is_empty());
    }

    #[tokio::test]
    async fn test_unsearchable_source_is_skipped() {
        // Crossref cannot search categories.
        let q = SearchQuery::named("cats")
            .with_field(Field::Category, FieldQuery::new().or(["cs.LG"]));
        let job = TrackingJob { scope: None, ..job(vec![q], 1) };
        let report = run_tracking(
            &job,
            &[SharedFeed::arxiv(papers(2)), SharedFeed::crossref(papers(2))],
            Arc::new(MemoryLedger::new()),
            now(),
        )
        .await
        .unwrap();

        let runs = &report.queries[0].sources;
        assert_eq!(runs[0].expression, "cat:cs.LG");
        assert_eq!(runs[1].source, PaperSource::Crossref);
        assert_eq!(runs[1].phase, None);
        assert_eq!(runs[1].pages, 0);
        assert_eq!(report.queries[0].papers.len(), 2);
    }

    #[tokio::test]
    async fn test_shared_doi_goes_to_first_source() {
        let mut preprint = dated(PaperSource::Arxiv, "2405.00001", 5);
        preprint.doi = Some("10.48550/arXiv.2405.00001".to_string());
        let mut record = dated(PaperSource::Crossref, "10.48550/arxiv.2405.00001", 1);
        record.doi = Some("https://doi.org/10.48550/ARXIV.2405.00001".to_string());

        let job = TrackingJob { scope: None, ..job(vec![title("q", "diffusion")], 1) };
        let report = run_tracking(
            &job,
            &[SharedFeed::arxiv(vec![preprint]), SharedFeed::crossref(vec![record])],
            Arc::new(MemoryLedger::new()),
            now(),
        )
        .await
        .unwrap();

        let papers = &report.queries[0].papers;
        assert_eq!(papers.len(), 1);
        assert_eq!(papers[0].source, PaperSource::Arxiv);
    }

    #[test]
    fn test_merge_prefers_source_order_for_doi() {
        let mut a = dated(PaperSource::Arxiv, "2405.00001", 10);
        a.doi = Some("10.1/x".to_string());
        let mut c = dated(PaperSource::Crossref, "10.1/x", 1);
        c.doi = Some("doi:10.1/X".to_string());
        let other = dated(PaperSource::Crossref, "10.1/y", 3);

        let merged = merge_sources(vec![vec![a], vec![c, other]], 10);
        let ids: Vec<(PaperSource, &str)> =
            merged.iter().map(|p| (p.source, p.source_id.as_str())).collect();
        // The arXiv copy wins but takes the slot of the newest duplicate.
        assert_eq!(
            ids,
            vec![(PaperSource::Arxiv, "2405.00001"), (PaperSource::Crossref, "10.1/y")]
        );
    }

    #[test]
    fn test_merge_title_fallback_requires_same_year() {
        let long = "Planning With Diffusion for Flexible Behavior Synthesis";
        let mut a = dated(PaperSource::Arxiv, "2205.09991", 2);
        a.title = long.to_string();
        let mut same_year = dated(PaperSource::Crossref, "crossref:aaaa", 1);
        same_year.title = format!("{}.", long.to_uppercase());
        let mut other_year = dated(PaperSource::Crossref, "crossref:bbbb", 3);
        other_year.title = long.to_string();
        other_year.published = Some(Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap());

        let merged = merge_sources(vec![vec![a], vec![same_year, other_year]], 10);
        let ids: Vec<&str> = merged.iter().map(|p| p.source_id.as_str()).collect();
        assert_eq!(ids, vec!["2205.09991", "crossref:bbbb"]);
    }

    #[test]
    fn test_merge_orders_newest_first_and_truncates() {
        let merged = merge_sources(
            vec![
                vec![dated(PaperSource::Arxiv, "a", 5), dated(PaperSource::Arxiv, "b", 1)],
                vec![dated(PaperSource::Crossref, "c", 3), dated(PaperSource::Crossref, "d", 5)],
            ],
            3,
        );
        let ids: Vec<&str> = merged.iter().map(|p| p.source_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_ledger_failure_aborts_run() {
        let job = job(vec![title("q", "diffusion")], 1);
        let err = run_tracking(&job, &[SharedFeed::arxiv(papers(5))], Arc::new(DownLedger), now())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Ledger(_)));
    }

    #[test]
    fn test_compile_all_is_query_major() {
        let job = TrackingJob { scope: None, ..job(vec![title("a", "x"), title("b", "y")], 1) };
        let feeds = [SharedFeed::arxiv(Vec::new()), SharedFeed::crossref(Vec::new())];
        let compiled = compile_all(&job, &feeds);
        let pairs: Vec<(&str, PaperSource, &str)> = compiled
            .iter()
            .map(|c| (c.name.as_str(), c.source, c.expression.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("a", PaperSource::Arxiv, "ti:x"),
                ("a", PaperSource::Crossref, "query.bibliographic=x"),
                ("b", PaperSource::Arxiv, "ti:y"),
                ("b", PaperSource::Crossref, "query.bibliographic=y"),
            ]
        );
    }

    #[test]
    fn test_report_serializes() {
        let report = TrackingReport {
            sources: vec![PaperSource::Arxiv, PaperSource::Crossref],
            started_at: now(),
            queries: vec![QueryReport {
                name: "q".to_string(),
                papers: vec![],
                sources: vec![SourceRun::not_searchable(PaperSource::Crossref)],
            }],
            total_new: 0,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["sources"], serde_json::json!(["arxiv", "crossref"]));
        assert_eq!(json["total_new"], 0);
        assert_eq!(json["queries"][0]["sources"][0]["phase"], serde_json::Value::Null);
    }
}
