mod browser;
mod crawl;
mod extract;
mod fields;
mod harvest;
mod ocr;
mod pipeline;
mod portal;
mod retry;
mod store;
mod verify;

use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use browser::BrowserSession;
use harvest::ChallengeMode;
use store::{
    DetailRecord, ExtractedFields, ListingRecord, Store, VerificationResult, ARTIFACT_DIR,
    DATA_DIR,
};

#[derive(Parser)]
#[command(name = "lienfinder", about = "Cook County foreclosure-records pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl listing search results month by month
    Crawl {
        /// Oldest month to crawl, as YYYY-MM (default: 2024-01)
        #[arg(long)]
        cutoff: Option<String>,
    },
    /// Fetch detail pages and download PDF artifacts
    Harvest {
        /// Max listings to harvest (default: all pending)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Keep a record even when the challenge page never clears
        #[arg(long)]
        lenient_challenge: bool,
    },
    /// OCR downloaded artifacts and extract structured fields
    Extract {
        /// Max artifacts to process (default: all pending)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Look up case status on the court portal
    Verify {
        /// Max cases to verify (default: all pending)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Crawl + harvest + extract + verify, consolidating after each stage
    Run {
        /// Oldest month to crawl, as YYYY-MM (default: 2024-01)
        #[arg(long)]
        cutoff: Option<String>,
        /// Keep a record even when the challenge page never clears
        #[arg(long)]
        lenient_challenge: bool,
    },
    /// Rebuild the consolidated workbook from the stage CSVs
    Consolidate,
    /// Show pipeline statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Crawl { cutoff } => {
            let cutoff = parse_cutoff(cutoff.as_deref())?;
            cmd_crawl(cutoff).await
        }
        Commands::Harvest {
            limit,
            lenient_challenge,
        } => cmd_harvest(limit, challenge_mode(lenient_challenge)).await,
        Commands::Extract { limit } => cmd_extract(limit),
        Commands::Verify { limit } => cmd_verify(limit).await,
        Commands::Run {
            cutoff,
            lenient_challenge,
        } => {
            let cutoff = parse_cutoff(cutoff.as_deref())?;
            cmd_run(cutoff, challenge_mode(lenient_challenge)).await
        }
        Commands::Consolidate => cmd_consolidate(),
        Commands::Stats => cmd_stats(),
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn challenge_mode(lenient: bool) -> ChallengeMode {
    if lenient {
        ChallengeMode::Proceed
    } else {
        ChallengeMode::Fail
    }
}

fn parse_cutoff(raw: Option<&str>) -> Result<(i32, u32)> {
    let Some(raw) = raw else {
        return Ok(crawl::DEFAULT_CUTOFF);
    };
    let (year, month) = raw
        .split_once('-')
        .with_context(|| format!("cutoff '{raw}' is not YYYY-MM"))?;
    let year: i32 = year.parse().with_context(|| format!("bad year in '{raw}'"))?;
    let month: u32 = month
        .parse()
        .with_context(|| format!("bad month in '{raw}'"))?;
    if !(1..=12).contains(&month) {
        bail!("month in '{raw}' must be 01-12");
    }
    Ok((year, month))
}

// ── Stage A: listing crawl ──

async fn cmd_crawl(cutoff: (i32, u32)) -> Result<()> {
    let mut store: Store<ListingRecord> = Store::open_default()?;
    println!("Loaded {} existing listings", store.len());

    let session = BrowserSession::launch().await?;
    let page = session.new_page("about:blank").await?;
    let mut source = portal::PortalListing::new(&page);
    let outcome = crawl::crawl_months(&mut source, &mut store, cutoff).await;
    session.close().await;

    let stats = outcome?;
    println!(
        "Crawled {} months, {} new listings ({} total).",
        stats.months,
        stats.appended,
        store.len()
    );
    Ok(())
}

// ── Stage B: detail harvest ──

async fn cmd_harvest(limit: Option<usize>, mode: ChallengeMode) -> Result<()> {
    let listings: Store<ListingRecord> = Store::open_default()?;
    let mut details: Store<DetailRecord> = Store::open_default()?;

    let mut pending: Vec<ListingRecord> = listings
        .rows()
        .iter()
        .filter(|l| !l.detail_url.is_empty() && !details.contains(&l.document_id))
        .cloned()
        .collect();
    if let Some(limit) = limit {
        pending.truncate(limit);
    }
    if pending.is_empty() {
        println!("No pending listings. Run 'crawl' first or all details are harvested.");
        return Ok(());
    }
    println!("Harvesting {} listings...", pending.len());

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()?;
    let artifact_dir = Path::new(ARTIFACT_DIR);

    // A fatal browser error aborts the batch mid-run; relaunch and resume
    // from the checkpoint until either the batch finishes or the relaunch
    // budget runs out.
    let mut relaunches = 0;
    loop {
        let session = BrowserSession::launch().await?;
        let page = session.new_page("about:blank").await?;
        let mut source = portal::PortalDetail::new(&page, mode);
        let outcome = harvest::harvest_batch(
            &mut source,
            &client,
            &pending,
            &mut details,
            artifact_dir,
            harvest::RECORD_PACING,
        )
        .await;
        session.close().await;

        match outcome {
            Ok(stats) => {
                println!(
                    "Done: {} harvested, {} failed, {} skipped ({} total).",
                    stats.appended,
                    stats.failed,
                    stats.skipped,
                    details.len()
                );
                return Ok(());
            }
            Err(e) => {
                relaunches += 1;
                if relaunches > harvest::MAX_RELAUNCHES {
                    bail!("browser kept failing after {relaunches} launches: {e}");
                }
                println!(
                    "[WARN] Browser session died ({e}); relaunching in {}s ({relaunches}/{})",
                    harvest::RELAUNCH_COOLDOWN.as_secs(),
                    harvest::MAX_RELAUNCHES
                );
                tokio::time::sleep(harvest::RELAUNCH_COOLDOWN).await;
            }
        }
    }
}

// ── Stage C: field extraction ──

fn cmd_extract(limit: Option<usize>) -> Result<()> {
    let mut store: Store<ExtractedFields> = Store::open_default()?;
    let engine = ocr::TesseractCli;
    let stats = extract::extract_artifacts(&engine, Path::new(ARTIFACT_DIR), &mut store, limit)?;
    println!(
        "Done: {} processed, {} saved, {} duplicate cases dropped ({} total).",
        stats.processed,
        stats.saved,
        stats.duplicates,
        store.len()
    );
    Ok(())
}

// ── Stage D: case verification ──

async fn cmd_verify(limit: Option<usize>) -> Result<()> {
    let extracted: Store<ExtractedFields> = Store::open_default()?;
    let mut verified: Store<VerificationResult> = Store::open_default()?;

    let mut candidates: Vec<(String, String)> = extracted
        .rows()
        .iter()
        .filter(|r| !r.case_number.is_empty())
        .map(|r| (r.case_number.clone(), r.address.clone()))
        .collect();
    if let Some(limit) = limit {
        candidates.truncate(limit);
    }
    if candidates.is_empty() {
        println!("No cases to verify. Run 'extract' first.");
        return Ok(());
    }

    let session = BrowserSession::launch().await?;
    let mut lookup = portal::PortalCaseLookup::new(&session);
    let outcome = verify::verify_cases(
        &mut lookup,
        &candidates,
        &mut verified,
        &verify::Pacing::default(),
    )
    .await;
    session.close().await;

    let stats = outcome?;
    println!(
        "Done: {} checked, {} failed, {} skipped ({} total).",
        stats.checked,
        stats.failed,
        stats.skipped,
        verified.len()
    );
    Ok(())
}

// ── Full pipeline ──

async fn cmd_run(cutoff: (i32, u32), mode: ChallengeMode) -> Result<()> {
    pipeline::run_stage("Stage A: crawl", || cmd_crawl(cutoff)).await;
    consolidate_quietly();

    pipeline::run_stage("Stage B: harvest", || cmd_harvest(None, mode)).await;
    consolidate_quietly();

    pipeline::run_stage("Stage C: extract", || async { cmd_extract(None) }).await;
    consolidate_quietly();

    pipeline::run_stage("Stage D: verify", || cmd_verify(None)).await;
    cmd_consolidate()
}

fn consolidate_quietly() {
    if let Err(e) = pipeline::consolidate(Path::new(DATA_DIR)) {
        println!("[WARN] Consolidation failed: {e:#}");
    }
}

fn cmd_consolidate() -> Result<()> {
    let counts = pipeline::consolidate(Path::new(DATA_DIR))?;
    if counts.is_empty() {
        println!("No stage CSVs found under {DATA_DIR}.");
        return Ok(());
    }
    for (sheet, rows) in &counts {
        println!("{sheet:<10} {rows} rows");
    }
    println!("Wrote {}/{}", DATA_DIR, pipeline::WORKBOOK_FILE);
    Ok(())
}

fn cmd_stats() -> Result<()> {
    let listings: Store<ListingRecord> = Store::open_default()?;
    let details: Store<DetailRecord> = Store::open_default()?;
    let extracted: Store<ExtractedFields> = Store::open_default()?;
    let verified: Store<VerificationResult> = Store::open_default()?;

    let artifacts = std::fs::read_dir(ARTIFACT_DIR)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| {
                    e.path()
                        .extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
                })
                .count()
        })
        .unwrap_or(0);

    println!("Listings:  {}", listings.len());
    println!("Details:   {}", details.len());
    println!("Artifacts: {}", artifacts);
    println!("Extracted: {}", extracted.len());
    println!("Verified:  {}", verified.len());
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_defaults_and_parses() {
        assert_eq!(parse_cutoff(None).unwrap(), crawl::DEFAULT_CUTOFF);
        assert_eq!(parse_cutoff(Some("2023-07")).unwrap(), (2023, 7));
        assert!(parse_cutoff(Some("2023-13")).is_err());
        assert!(parse_cutoff(Some("july 2023")).is_err());
    }

    #[test]
    fn run_accepts_cutoff_override() {
        let cli = Cli::try_parse_from(["lienfinder", "run", "--cutoff", "2023-05"]).unwrap();
        match cli.command {
            Commands::Run { cutoff, .. } => {
                assert_eq!(parse_cutoff(cutoff.as_deref()).unwrap(), (2023, 5));
            }
            _ => panic!("expected run subcommand"),
        }
    }
}
