use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::retry::{FetchError, RetryPolicy};
use crate::store::{DetailRecord, ListingRecord, Store};

/// Cheap integrity proxy: anything smaller is a truncated or blocked
/// download, never a scanned court filing.
pub const MIN_ARTIFACT_BYTES: u64 = 10 * 1024;

/// Pause between records, modeling human pacing.
pub const RECORD_PACING: Duration = Duration::from_millis(1500);

/// Cool-down before relaunching a crashed browser.
pub const RELAUNCH_COOLDOWN: Duration = Duration::from_secs(15);
pub const MAX_RELAUNCHES: u32 = 3;

/// What to do when the challenge interstitial never clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeMode {
    /// Fail the record; never extract from an unsolved challenge page.
    Fail,
    /// Extract anyway and let empty selectors surface downstream.
    Proceed,
}

/// Structured fields read from one detail view.
#[derive(Debug, Clone)]
pub struct DetailView {
    pub document_id: String,
    pub document_type: String,
    pub date_recorded: String,
    pub address: String,
    pub artifact_url: Option<String>,
}

#[async_trait]
pub trait DetailSource {
    async fn fetch_detail(&mut self, listing: &ListingRecord) -> Result<DetailView, FetchError>;
}

#[derive(Debug, Default)]
pub struct HarvestStats {
    pub appended: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Download bytes via `fetch`, write them to a sibling temp path, and promote
/// to `dest` only once the minimum-size gate passes. An undersized payload is
/// retried like any transient failure; the temp file never survives, so a
/// resumed run can't mistake a partial download for a completed one.
pub async fn download_artifact<F, Fut>(
    mut fetch: F,
    dest: &Path,
    min_bytes: u64,
    policy: &RetryPolicy,
) -> Result<(), FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<u8>, FetchError>>,
{
    let tmp = dest.with_extension("pdf.part");
    policy
        .run("artifact download", |_| {
            let fut = fetch();
            let tmp = tmp.clone();
            let dest = dest.to_path_buf();
            async move {
                let bytes = fut.await?;
                fs::write(&tmp, &bytes)
                    .map_err(|e| FetchError::Fatal(anyhow::anyhow!("writing {}: {e}", tmp.display())))?;
                let size = bytes.len() as u64;
                if size < min_bytes {
                    let _ = fs::remove_file(&tmp);
                    return Err(FetchError::TooSmall {
                        size,
                        min: min_bytes,
                    });
                }
                fs::rename(&tmp, &dest)
                    .map_err(|e| FetchError::Fatal(anyhow::anyhow!("promoting {}: {e}", dest.display())))?;
                Ok(())
            }
        })
        .await
}

/// Fetch artifact bytes over HTTP, classifying failures for the retry policy.
pub async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, FetchError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::Transient(format!("GET {url}: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Transient(format!("GET {url}: status {status}")));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| FetchError::Transient(format!("reading body of {url}: {e}")))?;
    Ok(bytes.to_vec())
}

/// Process listings one at a time: fetch the detail view, download the
/// artifact when one is linked, and persist the record before moving on.
/// Per-record failures are logged and skipped; only a fatal driver error
/// aborts the batch (the caller relaunches and resumes from the checkpoint).
pub async fn harvest_batch<S: DetailSource>(
    source: &mut S,
    client: &reqwest::Client,
    listings: &[ListingRecord],
    store: &mut Store<DetailRecord>,
    artifact_dir: &Path,
    pacing: Duration,
) -> Result<HarvestStats, FetchError> {
    fs::create_dir_all(artifact_dir)
        .map_err(|e| FetchError::Fatal(anyhow::anyhow!("creating artifact dir: {e}")))?;
    let policy = RetryPolicy::default();
    let mut stats = HarvestStats::default();

    for listing in listings {
        if store.contains(&listing.document_id) {
            stats.skipped += 1;
            continue;
        }

        let view = match source.fetch_detail(listing).await {
            Ok(view) => view,
            Err(err @ FetchError::Fatal(_)) => return Err(err),
            Err(err) => {
                warn!("record {} failed: {err}", listing.document_id);
                stats.failed += 1;
                tokio::time::sleep(pacing).await;
                continue;
            }
        };

        if view.document_id.is_empty() {
            warn!("record {}: detail view had no document number", listing.document_id);
            stats.failed += 1;
            tokio::time::sleep(pacing).await;
            continue;
        }

        let artifact_path = match &view.artifact_url {
            Some(url) => {
                let dest = artifact_dir.join(format!("{}.pdf", view.document_id));
                if dest.exists() {
                    dest
                } else {
                    match download_artifact(
                        || fetch_bytes(client, url),
                        &dest,
                        MIN_ARTIFACT_BYTES,
                        &policy,
                    )
                    .await
                    {
                        Ok(()) => dest,
                        Err(err) => {
                            warn!("artifact for {} failed: {err}", view.document_id);
                            stats.failed += 1;
                            tokio::time::sleep(pacing).await;
                            continue;
                        }
                    }
                }
            }
            None => PathBuf::new(),
        };

        let appended = store
            .append(DetailRecord {
                document_id: view.document_id.clone(),
                document_type: view.document_type,
                date_recorded: view.date_recorded,
                address: view.address,
                detail_url: listing.detail_url.clone(),
                artifact_path: artifact_path.to_string_lossy().into_owned(),
            })
            .map_err(FetchError::Fatal)?;
        if appended {
            println!("[OK] Harvested {}", view.document_id);
            stats.appended += 1;
            info!("harvested {}", view.document_id);
        } else {
            stats.skipped += 1;
        }

        tokio::time::sleep(pacing).await;
    }

    Ok(stats)
}

// ── Tests ──
