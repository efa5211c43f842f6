use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use agentlens_metrics::{MetricsAggregator, PerformanceScorer, PriceTable, ScoreWeights, StatsAggregator};
use agentlens_sessions::{DirectoryWatcher, SessionFilter, SessionStore, Tailer};

use crate::render;

/// Print file changes under `root` until `cancel` fires.
pub async fn watch(
    root: PathBuf,
    pattern: &str,
    debounce: Duration,
    json: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let mut watcher = DirectoryWatcher::with_debounce(&root, pattern, debounce)
        .with_context(|| format!("Failed to watch {}", root.display()))?;

    {
        let (events, errors) = watcher.streams();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) if json => println!("{}", serde_json::to_string(&event)?),
                    Some(event) => render::print_file_event(&event),
                    None => break,
                },
                Some(err) = errors.recv() => {
                    tracing::warn!(error = %err, "watcher error");
                }
            }
        }
    }

    watcher.close();
    tracing::debug!(root = %watcher.root().display(), "watch finished");
    Ok(())
}

/// Follow session logs under `root` until `cancel` fires.
pub async fn tail(
    root: PathBuf,
    project: Option<String>,
    poll_interval: Duration,
    json: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let tailer = Arc::new(Tailer::new(root, project)?.with_poll_interval(poll_interval));
    let mut events = tailer
        .take_events()
        .context("Tailer event stream already taken")?;

    let runner = tokio::spawn({
        let tailer = Arc::clone(&tailer);
        async move { tailer.start(cancel).await }
    });

    // Ends when the tailer stops and drops its sender
    while let Some(event) = events.recv().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            render::print_tail_event(&event);
        }
    }

    runner.await.context("Tailer task panicked")??;
    tracing::debug!(
        root = %tailer.root().display(),
        files = tailer.seen_files().len(),
        "tail finished"
    );
    Ok(())
}

/// Aggregate statistics over every stored session.
pub fn stats(
    store: &SessionStore,
    filter: &SessionFilter,
    prices: PriceTable,
    top: usize,
    json: bool,
) -> Result<()> {
    let aggregator = MetricsAggregator::with_prices(prices);
    let metrics: Vec<_> = store
        .list(filter)?
        .iter()
        .map(|parsed| aggregator.aggregate_parsed(parsed))
        .collect();
    let stats = StatsAggregator::new().aggregate(&metrics);

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else if stats.total_sessions == 0 {
        println!("{}", "No sessions found.".dimmed());
    } else {
        render::print_stats(&stats, top);
    }
    Ok(())
}

/// Rank agents over every stored session.
pub fn rank(
    store: &SessionStore,
    prices: PriceTable,
    weights: Option<ScoreWeights>,
    by_domain: bool,
    json: bool,
) -> Result<()> {
    let parsed = store.list(&SessionFilter::default())?;
    let aggregator = MetricsAggregator::with_prices(prices);
    let metrics = parsed.iter().map(|p| aggregator.aggregate_parsed(p)).collect();
    let sessions = parsed.into_iter().map(|p| p.session).collect();

    let mut scorer = PerformanceScorer::new(sessions, metrics);
    if let Some(w) = weights {
        scorer.set_weights(w.success, w.cost, w.speed, w.recovery);
    }

    if by_domain {
        let groups = scorer.compare_within_domain();
        if json {
            println!("{}", serde_json::to_string_pretty(&groups)?);
        } else {
            render::print_domains(&groups);
        }
    } else {
        let ranking = scorer.rank_agents();
        if json {
            println!("{}", serde_json::to_string_pretty(&ranking)?);
        } else {
            render::print_ranking(&ranking);
        }
    }
    Ok(())
}
