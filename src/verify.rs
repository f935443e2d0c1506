use std::ops::RangeInclusive;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use crate::retry::FetchError;
use crate::store::{Store, VerificationResult};

pub const BATCH_SIZE: usize = 5;

/// Marker whose presence alone classifies a case as resolved in our favor.
pub const JUDGMENT_MARKER: &str = "Judgment of Foreclosure";
pub const NO_JUDGMENT_LABEL: &str = "No Judgment Found";

/// Terminal or exclusionary docket events. Any of these marks a case as no
/// longer worth pursuing.
pub const EXCLUDE_EVENTS: &[&str] = &[
    "Certificate of Sale",
    "Receipt of Sale",
    "Report of Sale",
    "Sheriff’s Sale Approved",
    "Mortgage Foreclosure Disposed",
    "Dismissed",
    "Voluntary Dismissal",
    "Sale Vacated",
    "Order for Possession",
    "Eviction",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTag {
    Green,
    Red,
    Neutral,
}

impl StatusTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Green => "GREEN",
            Self::Red => "RED",
            Self::Neutral => "NEUTRAL",
        }
    }
}

/// Classify a docket's visible text. Order matters: the judgment check wins
/// over any exclusion event present in the same body.
pub fn classify(body: &str) -> (String, StatusTag) {
    if body.contains(JUDGMENT_MARKER) {
        return (JUDGMENT_MARKER.to_string(), StatusTag::Green);
    }
    for event in EXCLUDE_EVENTS {
        if body.contains(event) {
            return ((*event).to_string(), StatusTag::Red);
        }
    }
    (NO_JUDGMENT_LABEL.to_string(), StatusTag::Neutral)
}

/// One query against the independent case-lookup system, returning the
/// response body's visible text. Implementations rotate identity and isolate
/// state per call.
#[async_trait]
pub trait CaseLookup {
    async fn case_body(&mut self, case_number: &str) -> Result<String, FetchError>;
}

/// Randomized pacing between cases and between batches.
#[derive(Debug, Clone)]
pub struct Pacing {
    pub short_ms: RangeInclusive<u64>,
    pub long_ms: RangeInclusive<u64>,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            short_ms: 4_000..=8_000,
            long_ms: 30_000..=90_000,
        }
    }
}

impl Pacing {
    pub fn none() -> Self {
        Self {
            short_ms: 0..=0,
            long_ms: 0..=0,
        }
    }

    async fn short_pause(&self) {
        sleep_in(&self.short_ms).await;
    }

    async fn long_pause(&self) {
        sleep_in(&self.long_ms).await;
    }
}

async fn sleep_in(range: &RangeInclusive<u64>) {
    let ms = fastrand::u64(range.clone());
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

#[derive(Debug, Default)]
pub struct VerifyStats {
    pub checked: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Verify each candidate case in fixed-size batches with human pacing.
/// Cases already in the store are skipped, so an interrupted run resumes
/// where it stopped. A failed lookup is logged and left unpersisted; it
/// becomes eligible again on the next invocation.
pub async fn verify_cases<L: CaseLookup>(
    lookup: &mut L,
    candidates: &[(String, String)],
    store: &mut Store<VerificationResult>,
    pacing: &Pacing,
) -> Result<VerifyStats> {
    let mut stats = VerifyStats::default();

    let pending: Vec<_> = candidates
        .iter()
        .filter(|(case, _)| !case.is_empty() && !store.contains(case))
        .collect();
    stats.skipped = candidates.len() - pending.len();

    let batch_count = pending.len().div_ceil(BATCH_SIZE);
    for (batch_index, batch) in pending.chunks(BATCH_SIZE).enumerate() {
        println!("[INFO] Batch {}", batch_index + 1);

        for (case_number, address) in batch {
            println!("  Checking case {case_number}");
            match lookup.case_body(case_number).await {
                Ok(body) => {
                    let (label, tag) = classify(&body);
                    store.append(VerificationResult {
                        case_number: case_number.clone(),
                        address: address.clone(),
                        status_label: label,
                        status_tag: tag.as_str().to_string(),
                    })?;
                    stats.checked += 1;
                }
                Err(e) => {
                    warn!("lookup failed for {case_number}: {e}");
                    stats.failed += 1;
                }
            }
            pacing.short_pause().await;
        }

        // No pause after the last batch; there is nothing left to pace.
        if batch_index + 1 < batch_count {
            pacing.long_pause().await;
        }
    }

    Ok(stats)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn judgment_marker_classifies_green() {
        let (label, tag) = classify("... Judgment of Foreclosure entered 03/02/2025 ...");
        assert_eq!(label, JUDGMENT_MARKER);
        assert_eq!(tag, StatusTag::Green);
    }

    #[test]
    fn judgment_takes_precedence_over_exclusion_events() {
        let body = "Judgment of Foreclosure entered; case later Dismissed";
        let (label, tag) = classify(body);
        assert_eq!(label, JUDGMENT_MARKER);
        assert_eq!(tag, StatusTag::Green);
    }

    #[test]
    fn exclusion_event_classifies_red() {
        let (label, tag) = classify("Docket: Order for Possession granted");
        assert_eq!(label, "Order for Possession");
        assert_eq!(tag, StatusTag::Red);
    }

    #[test]
    fn no_marker_classifies_neutral() {
        let (label, tag) = classify("Case continued for status hearing");
        assert_eq!(label, NO_JUDGMENT_LABEL);
        assert_eq!(tag, StatusTag::Neutral);
    }

    struct FakeLookup {
        bodies: HashMap<String, String>,
        calls: usize,
    }

    #[async_trait]
    impl CaseLookup for FakeLookup {
        async fn case_body(&mut self, case_number: &str) -> Result<String, FetchError> {
            self.calls += 1;
            self.bodies
                .get(case_number)
                .cloned()
                .ok_or_else(|| FetchError::Transient("timed out".into()))
        }
    }

    fn candidates(cases: &[&str]) -> Vec<(String, String)> {
        cases
            .iter()
            .map(|c| (c.to_string(), format!("{c} address")))
            .collect()
    }

    #[tokio::test]
    async fn completed_cases_are_skipped_on_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let mut store: Store<VerificationResult> = Store::open(dir.path()).unwrap();
        let mut lookup = FakeLookup {
            bodies: HashMap::from([
                ("2023CH000001".to_string(), "Judgment of Foreclosure".to_string()),
                ("2023CH000002".to_string(), "Dismissed".to_string()),
            ]),
            calls: 0,
        };
        let cand = candidates(&["2023CH000001", "2023CH000002"]);

        let first = verify_cases(&mut lookup, &cand, &mut store, &Pacing::none())
            .await
            .unwrap();
        assert_eq!(first.checked, 2);
        assert_eq!(lookup.calls, 2);

        let second = verify_cases(&mut lookup, &cand, &mut store, &Pacing::none())
            .await
            .unwrap();
        assert_eq!(second.checked, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(lookup.calls, 2);
    }

    #[tokio::test]
    async fn failed_lookup_is_skipped_and_stays_eligible() {
        let dir = tempfile::tempdir().unwrap();
        let mut store: Store<VerificationResult> = Store::open(dir.path()).unwrap();
        let mut lookup = FakeLookup {
            bodies: HashMap::from([(
                "2023CH000001".to_string(),
                "Report of Sale".to_string(),
            )]),
            calls: 0,
        };
        let cand = candidates(&["2023CH000001", "2023CH000404"]);

        let stats = verify_cases(&mut lookup, &cand, &mut store, &Pacing::none())
            .await
            .unwrap();
        assert_eq!(stats.checked, 1);
        assert_eq!(stats.failed, 1);
        assert!(!store.contains("2023CH000404"));

        let row = &store.rows()[0];
        assert_eq!(row.status_label, "Report of Sale");
        assert_eq!(row.status_tag, "RED");
    }

    #[tokio::test]
    async fn no_long_pause_after_the_final_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut store: Store<VerificationResult> = Store::open(dir.path()).unwrap();
        let mut lookup = FakeLookup {
            bodies: HashMap::from([(
                "2023CH000001".to_string(),
                "Judgment of Foreclosure".to_string(),
            )]),
            calls: 0,
        };
        let pacing = Pacing {
            short_ms: 0..=0,
            long_ms: 10_000..=10_000,
        };
        let cand = candidates(&["2023CH000001"]);

        // A single batch must finish without serving the inter-batch pause.
        let stats = tokio::time::timeout(
            Duration::from_millis(500),
            verify_cases(&mut lookup, &cand, &mut store, &pacing),
        )
        .await
        .expect("verification should return without an inter-batch pause")
        .unwrap();
        assert_eq!(stats.checked, 1);
    }

    #[tokio::test]
    async fn empty_case_numbers_are_never_queried() {
        let dir = tempfile::tempdir().unwrap();
        let mut store: Store<VerificationResult> = Store::open(dir.path()).unwrap();
        let mut lookup = FakeLookup {
            bodies: HashMap::new(),
            calls: 0,
        };
        let cand = vec![(String::new(), "no case recovered".to_string())];

        let stats = verify_cases(&mut lookup, &cand, &mut store, &Pacing::none())
            .await
            .unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(lookup.calls, 0);
    }
}
