use anyhow::Result;
use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDate};
use tracing::info;

use crate::retry::FetchError;
use crate::store::{ListingRecord, Store};

/// Oldest month the backward walk visits, inclusive.
pub const DEFAULT_CUTOFF: (i32, u32) = (2024, 1);

/// Paginated listing search for one document-type filter. Implementations
/// own the portal specifics; the crawl loop only sees shaped records.
#[async_trait]
pub trait ListingSource {
    /// Submit a search over the closed date interval.
    async fn open_window(&mut self, from: NaiveDate, to: NaiveDate) -> Result<(), FetchError>;

    /// Rows of the current result page, in the portal's natural order.
    async fn current_rows(&mut self) -> Result<Vec<ListingRecord>, FetchError>;

    /// Advance pagination; false once the last page has been read.
    async fn next_page(&mut self) -> Result<bool, FetchError>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum WindowOutcome {
    /// All pages of the window were read.
    Completed { appended: usize },
    /// A known document number was encountered; everything past it in the
    /// portal's ordering is assumed already seen, so the window ends here.
    DuplicateStop { document_id: String, appended: usize },
}

impl WindowOutcome {
    pub fn appended(&self) -> usize {
        match self {
            Self::Completed { appended } | Self::DuplicateStop { appended, .. } => *appended,
        }
    }
}

/// Crawl one date window, appending each unseen row immediately so a crash
/// loses at most the in-flight row. Stops on the first duplicate without
/// reading further rows or pages.
pub async fn crawl_window<S: ListingSource>(
    source: &mut S,
    store: &mut Store<ListingRecord>,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<WindowOutcome> {
    source.open_window(from, to).await?;

    let mut appended = 0;
    loop {
        for row in source.current_rows().await? {
            if store.contains(&row.document_id) {
                println!("[STOP] Document already exists: {}", row.document_id);
                return Ok(WindowOutcome::DuplicateStop {
                    document_id: row.document_id,
                    appended,
                });
            }
            if store.append(row)? {
                appended += 1;
            }
        }
        if !source.next_page().await? {
            break;
        }
    }

    Ok(WindowOutcome::Completed { appended })
}

pub struct CrawlStats {
    pub months: usize,
    pub appended: usize,
}

/// Walk calendar months backward from the current month to `cutoff`
/// (inclusive), crawling each as one window. A duplicate-stop ends that
/// month's crawl but the walk still advances to the next older month.
pub async fn crawl_months<S: ListingSource>(
    source: &mut S,
    store: &mut Store<ListingRecord>,
    cutoff: (i32, u32),
) -> Result<CrawlStats> {
    let today = Local::now().date_naive();
    let mut year = today.year();
    let mut month = today.month();
    let mut stats = CrawlStats {
        months: 0,
        appended: 0,
    };

    while (year, month) >= cutoff {
        let (from, to) = month_window(year, month, today);
        println!(
            "[INFO] Crawling {} -> {}",
            from.format("%m/%d/%Y"),
            to.format("%m/%d/%Y")
        );

        let outcome = crawl_window(source, store, from, to).await?;
        stats.months += 1;
        stats.appended += outcome.appended();
        if let WindowOutcome::DuplicateStop { document_id, .. } = &outcome {
            info!(
                "month {}-{:02} stopped on duplicate {}; continuing to older months",
                year, month, document_id
            );
        }

        (year, month) = previous_month(year, month);
    }

    Ok(stats)
}

/// A calendar month's closed interval, with the current month clamped to
/// today.
pub fn month_window(year: i32, month: u32, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let from = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month start");
    let to = if year == today.year() && month == today.month() {
        today
    } else {
        let (ny, nm) = next_month(year, month);
        NaiveDate::from_ymd_opt(ny, nm, 1)
            .expect("valid month start")
            .pred_opt()
            .expect("valid month end")
    };
    (from, to)
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

pub fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> ListingRecord {
        ListingRecord {
            document_id: id.to_string(),
            detail_url: format!("https://example.org/view/{id}"),
            recorded_date: "03/10/2025".into(),
            filed_date: "03/09/2025".into(),
            document_type: "LIS PENDENS FORECLOSURE".into(),
            party_name: "FIRST BANK".into(),
            phone: String::new(),
            parcel_address: "77 OAK AVE".into(),
        }
    }

    struct FakeSource {
        pages: Vec<Vec<ListingRecord>>,
        cursor: usize,
    }

    impl FakeSource {
        fn new(pages: Vec<Vec<ListingRecord>>) -> Self {
            Self { pages, cursor: 0 }
        }
    }

    #[async_trait]
    impl ListingSource for FakeSource {
        async fn open_window(&mut self, _: NaiveDate, _: NaiveDate) -> Result<(), FetchError> {
            self.cursor = 0;
            Ok(())
        }

        async fn current_rows(&mut self) -> Result<Vec<ListingRecord>, FetchError> {
            Ok(self.pages.get(self.cursor).cloned().unwrap_or_default())
        }

        async fn next_page(&mut self) -> Result<bool, FetchError> {
            self.cursor += 1;
            Ok(self.cursor < self.pages.len())
        }
    }

    fn window() -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
        )
    }

    #[tokio::test]
    async fn first_duplicate_stops_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut store: Store<ListingRecord> = Store::open(dir.path()).unwrap();
        // "C" was persisted by a prior run.
        store.append(record("C")).unwrap();

        let mut source = FakeSource::new(vec![
            vec![record("A"), record("B")],
            vec![record("C"), record("D")],
        ]);
        let (from, to) = window();
        let outcome = crawl_window(&mut source, &mut store, from, to)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            WindowOutcome::DuplicateStop {
                document_id: "C".into(),
                appended: 2,
            }
        );
        assert!(store.contains("A"));
        assert!(store.contains("B"));
        // "D" is novel but past the duplicate, so it must never be observed.
        assert!(!store.contains("D"));
    }

    #[tokio::test]
    async fn clean_window_reads_all_pages() {
        let dir = tempfile::tempdir().unwrap();
        let mut store: Store<ListingRecord> = Store::open(dir.path()).unwrap();
        let mut source = FakeSource::new(vec![
            vec![record("A")],
            vec![record("B"), record("C")],
        ]);
        let (from, to) = window();
        let outcome = crawl_window(&mut source, &mut store, from, to)
            .await
            .unwrap();
        assert_eq!(outcome, WindowOutcome::Completed { appended: 3 });
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn month_window_spans_full_past_month() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let (from, to) = month_window(2025, 2, today);
        assert_eq!(from, NaiveDate::from_ymd_opt(2025, 2, 1).unwrap());
        assert_eq!(to, NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());
    }

    #[test]
    fn current_month_window_clamps_to_today() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let (from, to) = month_window(2025, 6, today);
        assert_eq!(from, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
        assert_eq!(to, today);
    }

    #[test]
    fn previous_month_wraps_year_boundary() {
        assert_eq!(previous_month(2025, 1), (2024, 12));
        assert_eq!(previous_month(2025, 7), (2025, 6));
    }
}
