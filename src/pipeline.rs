use clap::ValueEnum;
use tracing::{debug, info, warn};

use crate::accumulator::Accumulator;
use crate::error::Result;
use crate::login::{CookieSupplier, Credentials};
use crate::scraper::{extract_documents, ExtractStats};
use crate::search::{crawl, SearchQuery};
use crate::session::{bridge, ClientOptions};

/// Policy for a document whose extraction fails for reasons other than an
/// expired session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OnDocumentError {
    /// Log it, leave it out of the output, keep going.
    Skip,
    /// Fail the whole run.
    Abort,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub query: SearchQuery,
    pub client: ClientOptions,
    pub credentials: Credentials,
    pub workers: usize,
    pub on_document_error: OnDocumentError,
    pub max_reauth: u32,
}

/// Login, search, extract. An expired session restarts the whole run with
/// fresh cookies, up to `max_reauth` times; anything else is final.
pub async fn run(supplier: &dyn CookieSupplier, opts: &RunOptions) -> Result<Accumulator> {
    let mut reauths = 0u32;
    loop {
        match run_once(supplier, opts).await {
            Ok((acc, stats)) => {
                info!(
                    "Run complete: {} records from {} documents",
                    acc.len(),
                    stats.total
                );
                return Ok(acc);
            }
            Err(e) if e.is_session_expired() && reauths < opts.max_reauth => {
                reauths += 1;
                warn!(
                    "{}; re-authenticating and restarting ({}/{})",
                    e, reauths, opts.max_reauth
                );
            }
            Err(e) => return Err(e),
        }
    }
}

async fn run_once(
    supplier: &dyn CookieSupplier,
    opts: &RunOptions,
) -> Result<(Accumulator, ExtractStats)> {
    let cookies = supplier
        .obtain_auth_cookies(&opts.credentials, opts.client.proxy.as_deref())
        .await?;
    let session = bridge(&cookies, &opts.client)?;
    debug!("Crawling with {} session cookies", session.cookie_count());

    let stubs = crawl(&session, opts.query.clone()).await?;
    let mut acc = Accumulator::new();
    let stats = extract_documents(
        &session,
        stubs,
        opts.workers,
        opts.on_document_error,
        &mut acc,
    )
    .await?;
    Ok((acc, stats))
}
