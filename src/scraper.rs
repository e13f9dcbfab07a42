use std::collections::BTreeMap;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::accumulator::Accumulator;
use crate::error::{Error, Result};
use crate::extract::{extract, DocumentRecord};
use crate::pipeline::OnDocumentError;
use crate::search::RawDocumentStub;
use crate::session::SessionHandle;

/// Extraction stats returned after completion.
#[derive(Debug, Default, PartialEq)]
pub struct ExtractStats {
    pub total: usize,
    pub ok: usize,
    pub duplicates: usize,
    pub skipped: usize,
}

/// Extract documents on a bounded pool of tasks. Results are handed to the
/// accumulator by this loop alone and in stub order, whatever order the
/// workers finish in.
pub async fn extract_documents(
    session: &SessionHandle,
    stubs: Vec<RawDocumentStub>,
    workers: usize,
    on_error: OnDocumentError,
    acc: &mut Accumulator,
) -> Result<ExtractStats> {
    let total = stubs.len();
    let ids: Vec<String> = stubs.iter().map(|s| s.id.clone()).collect();
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    // Channel: workers send results, main loop accumulates
    let (tx, mut rx) =
        tokio::sync::mpsc::channel::<(usize, Result<DocumentRecord>)>(workers.max(1) * 2);

    let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(total);
    for (index, stub) in stubs.into_iter().enumerate() {
        let session = session.clone();
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tasks.push(tokio::spawn(async move {
            // A closed semaphore means the run is being cancelled
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let result = extract(&session, &stub).await;
            if matches!(&result, Err(e) if cancels_run(e, on_error)) {
                sem.close();
            }
            let _ = tx.send((index, result)).await;
        }));
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut stats = ExtractStats {
        total,
        ..Default::default()
    };
    let mut pending: BTreeMap<usize, Result<DocumentRecord>> = BTreeMap::new();
    let mut next = 0usize;

    while let Some((index, result)) = rx.recv().await {
        match result {
            Err(e) if cancels_run(&e, on_error) => {
                warn!("Document {} failed, cancelling run: {}", ids[index], e);
                cancel(&tasks);
                pb.finish_and_clear();
                return Err(e);
            }
            other => {
                pending.insert(index, other);
            }
        }

        while let Some(result) = pending.remove(&next) {
            settle(&mut stats, acc, &ids[next], Some(result));
            next += 1;
            pb.inc(1);
        }
    }

    // Channel closed with gaps: some worker died without reporting
    if next < total {
        if on_error == OnDocumentError::Abort {
            cancel(&tasks);
            pb.finish_and_clear();
            return Err(Error::WorkerLost { id: ids[next].clone() });
        }
        settle_remaining(pending, next, &ids, acc, &mut stats);
        pb.inc((total - next) as u64);
    }

    pb.finish_and_clear();
    info!(
        "Extracted {} documents ({} ok, {} duplicates, {} skipped)",
        stats.total, stats.ok, stats.duplicates, stats.skipped
    );
    Ok(stats)
}

fn cancels_run(e: &Error, on_error: OnDocumentError) -> bool {
    e.is_session_expired() || on_error == OnDocumentError::Abort
}

fn settle(
    stats: &mut ExtractStats,
    acc: &mut Accumulator,
    id: &str,
    result: Option<Result<DocumentRecord>>,
) {
    match result {
        Some(Ok(record)) => {
            if acc.add(record) {
                stats.ok += 1;
            } else {
                stats.duplicates += 1;
            }
        }
        Some(Err(e)) => {
            warn!("Skipping document {}: {}", id, e);
            stats.skipped += 1;
        }
        None => {
            warn!("Skipping document {}: worker stopped without a result", id);
            stats.skipped += 1;
        }
    }
}

/// Flush everything from `next` on, in order, counting holes as skipped.
fn settle_remaining(
    mut pending: BTreeMap<usize, Result<DocumentRecord>>,
    next: usize,
    ids: &[String],
    acc: &mut Accumulator,
    stats: &mut ExtractStats,
) {
    for index in next..ids.len() {
        settle(stats, acc, &ids[index], pending.remove(&index));
    }
}

fn cancel(tasks: &[JoinHandle<()>]) {
    for task in tasks {
        task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(number: &str) -> DocumentRecord {
        serde_json::from_value(json!({
            "region": "moscow",
            "number": number,
            "cadastralNumbers": [],
            "details": {},
            "teps": {},
            "additionalTeps": {},
            "tepGroups": {},
            "additionalTepGroups": {},
            "url": format!("https://gisogd.mos.ru/document/{}", number),
            "cadastralLinks": []
        }))
        .unwrap()
    }

    #[test]
    fn results_after_a_lost_worker_are_kept() {
        let ids: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let mut pending = BTreeMap::new();
        pending.insert(2, Ok(record("c")));
        pending.insert(3, Ok(record("d")));

        let mut acc = Accumulator::new();
        let mut stats = ExtractStats { total: 4, ok: 1, ..Default::default() };
        settle_remaining(pending, 1, &ids, &mut acc, &mut stats);

        let numbers: Vec<_> = acc.all().iter().filter_map(|r| r.number.as_deref()).collect();
        assert_eq!(numbers, vec!["c", "d"]);
        assert_eq!(stats.ok, 3);
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn only_session_expiry_cancels_under_skip() {
        let expired = Error::SessionExpired { url: "u".into() };
        let upstream = Error::Upstream {
            url: "u".into(),
            status: reqwest::StatusCode::BAD_GATEWAY,
        };
        assert!(cancels_run(&expired, OnDocumentError::Skip));
        assert!(!cancels_run(&upstream, OnDocumentError::Skip));
        assert!(cancels_run(&upstream, OnDocumentError::Abort));
    }
}
