use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::fields;
use crate::ocr::{self, OcrEngine};
use crate::store::{ExtractedFields, Store};

#[derive(Debug, Default)]
pub struct ExtractStats {
    pub processed: usize,
    pub saved: usize,
    pub duplicates: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// The recovered case number already exists in a saved result: the
    /// artifact is a duplicate filing and this result is dropped, not saved.
    DuplicateCase,
    /// The artifact itself was already completed by an earlier run.
    AlreadyDone,
}

/// Apply the field heuristics to one artifact's normalized corpus. An empty
/// corpus (failed OCR) flows through and produces all not-found fields.
pub fn fields_from_corpus(artifact_name: &str, corpus: &str) -> ExtractedFields {
    let (case_number, case_confidence) = fields::extract_case_number(corpus);
    let (amount, amount_confidence) = fields::extract_amount(corpus);
    let (address, address_confidence) = fields::extract_address(corpus);
    ExtractedFields {
        source_artifact: artifact_name.to_string(),
        case_number,
        case_confidence,
        amount,
        amount_confidence,
        address,
        address_confidence,
    }
}

/// Persist one result, enforcing the cross-artifact case-number invariant.
pub fn save_extracted(
    store: &mut Store<ExtractedFields>,
    seen_cases: &mut HashSet<String>,
    result: ExtractedFields,
) -> Result<SaveOutcome> {
    if !result.case_number.is_empty() && seen_cases.contains(&result.case_number) {
        return Ok(SaveOutcome::DuplicateCase);
    }
    let case_number = result.case_number.clone();
    if !store.append(result)? {
        return Ok(SaveOutcome::AlreadyDone);
    }
    if !case_number.is_empty() {
        seen_cases.insert(case_number);
    }
    Ok(SaveOutcome::Saved)
}

/// Case numbers already claimed by persisted results.
pub fn seen_case_numbers(store: &Store<ExtractedFields>) -> HashSet<String> {
    store
        .rows()
        .iter()
        .filter(|r| !r.case_number.is_empty())
        .map(|r| r.case_number.clone())
        .collect()
}

/// OCR every artifact not yet represented in the store, in file-name order.
pub fn extract_artifacts(
    engine: &dyn OcrEngine,
    artifact_dir: &Path,
    store: &mut Store<ExtractedFields>,
    limit: Option<usize>,
) -> Result<ExtractStats> {
    let mut pdfs: Vec<_> = match std::fs::read_dir(artifact_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
            })
            .collect(),
        Err(_) => {
            println!("No artifact directory at {}. Run 'harvest' first.", artifact_dir.display());
            return Ok(ExtractStats::default());
        }
    };
    pdfs.sort();

    let pending: Vec<_> = pdfs
        .into_iter()
        .filter(|p| {
            p.file_name()
                .map(|n| !store.contains(&n.to_string_lossy()))
                .unwrap_or(false)
        })
        .take(limit.unwrap_or(usize::MAX))
        .collect();

    let mut seen_cases = seen_case_numbers(store);
    let mut stats = ExtractStats::default();

    let pb = ProgressBar::new(pending.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    for pdf in &pending {
        let name = pdf
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        // A rendering or recognition failure degrades to an empty corpus;
        // one bad scan never aborts the batch.
        let corpus = match ocr::ocr_artifact(engine, pdf) {
            Ok(text) => text,
            Err(e) => {
                warn!("OCR failed on {name}: {e}");
                String::new()
            }
        };

        let result = fields_from_corpus(&name, &corpus);
        stats.processed += 1;
        match save_extracted(store, &mut seen_cases, result)? {
            SaveOutcome::Saved => stats.saved += 1,
            SaveOutcome::DuplicateCase => {
                stats.duplicates += 1;
                info!("{name}: duplicate filing, case already recovered");
            }
            SaveOutcome::AlreadyDone => {}
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(stats)
}

// ── Tests ──
