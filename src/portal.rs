//! Portal-specific page drivers. Every selector and URL the pipeline knows
//! about lives here; the stage modules only see the shaped records coming
//! out of these traits.

use anyhow::Result;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::ClearBrowserCookiesParams;
use chromiumoxide::Page;
use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::browser::{self, BrowserSession, PollOutcome};
use crate::crawl::ListingSource;
use crate::harvest::{ChallengeMode, DetailSource, DetailView};
use crate::retry::FetchError;
use crate::store::ListingRecord;
use crate::verify::CaseLookup;

pub const BASE_URL: &str = "https://crs.cookcountyclerkil.gov";
pub const SEARCH_URL: &str = "https://crs.cookcountyclerkil.gov/Search";
pub const CASE_SEARCH_URL: &str =
    "https://casesearch.cookcountyclerkofcourt.org/CivilCaseSearchAPI.aspx";

pub const DOCUMENT_TYPE_FILTER: &str = "LIS PENDENS FORECLOSURE";

const RESULT_ROW_SELECTOR: &str = "table tbody tr";
const DETAIL_ROW_SELECTOR: &str = "#divcol1 table tbody tr";
const PAGE_SETTLE: Duration = Duration::from_secs(2);
const SELECTOR_WAIT: Duration = Duration::from_secs(30);

fn transient(what: &str, err: impl std::fmt::Display) -> FetchError {
    FetchError::Transient(format!("{what}: {err}"))
}

/// Wait until a selector is present, bounded by `SELECTOR_WAIT`.
async fn wait_for_selector(page: &Page, selector: &str) -> Result<(), FetchError> {
    let js = format!("document.querySelector({selector:?}) !== null");
    let outcome = browser::poll_until(
        || async {
            page.evaluate(js.as_str())
                .await
                .map_err(|e| browser::cdp_error("evaluating selector wait", e))?
                .into_value::<bool>()
                .map_err(|e| transient("decoding selector wait", e))
        },
        Duration::from_millis(500),
        SELECTOR_WAIT,
    )
    .await?;
    match outcome {
        PollOutcome::Cleared => Ok(()),
        PollOutcome::TimedOut => Err(FetchError::Transient(format!(
            "selector {selector} never appeared"
        ))),
    }
}

async fn eval_into<T: serde::de::DeserializeOwned>(page: &Page, js: &str) -> Result<T, FetchError> {
    page.evaluate(js)
        .await
        .map_err(|e| browser::cdp_error("evaluating script", e))?
        .into_value::<T>()
        .map_err(|e| transient("decoding script result", e))
}

// ── Stage A: listing search ──

#[derive(Debug, Deserialize)]
struct RawRow {
    cells: Vec<String>,
    href: Option<String>,
}

pub struct PortalListing<'a> {
    page: &'a Page,
}

impl<'a> PortalListing<'a> {
    pub fn new(page: &'a Page) -> Self {
        Self { page }
    }
}

#[async_trait]
impl ListingSource for PortalListing<'_> {
    async fn open_window(&mut self, from: NaiveDate, to: NaiveDate) -> Result<(), FetchError> {
        browser::goto(self.page, SEARCH_URL).await?;

        // The advanced-search accordion is driven by text, not stable ids.
        eval_into::<bool>(
            self.page,
            r#"(() => {
                const link = [...document.querySelectorAll('a, button')]
                    .find(el => el.textContent.trim() === 'Advanced Search');
                if (!link) return false;
                link.click();
                return true;
            })()"#,
        )
        .await?;
        tokio::time::sleep(Duration::from_secs(1)).await;

        eval_into::<bool>(
            self.page,
            r#"(() => {
                const btn = [...document.querySelectorAll('button.accordion-button')]
                    .find(el => el.textContent.includes('Document Type Search'));
                if (!btn) return false;
                btn.scrollIntoView();
                btn.click();
                return true;
            })()"#,
        )
        .await?;
        wait_for_selector(self.page, "div#collapse3.accordion-collapse.show").await?;

        let submit = format!(
            r#"(() => {{
                const select = document.querySelector('div#collapse3 select#DocumentType');
                const option = [...select.options].find(o => o.label === {filter:?});
                if (!option) return false;
                select.value = option.value;
                select.dispatchEvent(new Event('change', {{ bubbles: true }}));
                document.querySelector('div#collapse3 input#RecordedFromDate').value = {from:?};
                document.querySelector('div#collapse3 input#RecordedToDate').value = {to:?};
                document.querySelector("div#collapse3 button[type='submit']").click();
                return true;
            }})()"#,
            filter = DOCUMENT_TYPE_FILTER,
            from = from.format("%m/%d/%Y").to_string(),
            to = to.format("%m/%d/%Y").to_string(),
        );
        if !eval_into::<bool>(self.page, &submit).await? {
            return Err(FetchError::Transient(
                "document-type filter not present in search form".into(),
            ));
        }

        wait_for_selector(self.page, RESULT_ROW_SELECTOR).await
    }

    async fn current_rows(&mut self) -> Result<Vec<ListingRecord>, FetchError> {
        let raw: Vec<RawRow> = eval_into(
            self.page,
            r#"(() =>
                [...document.querySelectorAll('table tbody tr')].map(tr => {
                    const cells = [...tr.querySelectorAll('td')];
                    const link = cells[1] ? cells[1].querySelector('a') : null;
                    return {
                        cells: cells.map(td => td.innerText.trim()),
                        href: link ? link.getAttribute('href') : null,
                    };
                })
            )()"#,
        )
        .await?;

        let rows = raw
            .into_iter()
            .filter(|r| r.cells.len() >= 11)
            .map(|r| ListingRecord {
                document_id: r.cells[2].clone(),
                detail_url: r
                    .href
                    .map(|h| format!("{BASE_URL}{h}"))
                    .unwrap_or_default(),
                recorded_date: r.cells[3].clone(),
                filed_date: r.cells[4].clone(),
                document_type: r.cells[5].clone(),
                party_name: r.cells[8].clone(),
                phone: r.cells[9].clone(),
                parcel_address: r.cells[10].clone(),
            })
            .collect();
        Ok(rows)
    }

    async fn next_page(&mut self) -> Result<bool, FetchError> {
        let advanced = eval_into::<bool>(
            self.page,
            r#"(() => {
                const next = document.querySelector("li.PagedList-skipToNext a[rel='next']");
                if (!next) return false;
                next.click();
                return true;
            })()"#,
        )
        .await?;
        if advanced {
            tokio::time::sleep(PAGE_SETTLE).await;
        }
        Ok(advanced)
    }
}

// ── Stage B: detail view ──

pub struct PortalDetail<'a> {
    page: &'a Page,
    challenge_mode: ChallengeMode,
}

impl<'a> PortalDetail<'a> {
    pub fn new(page: &'a Page, challenge_mode: ChallengeMode) -> Self {
        Self {
            page,
            challenge_mode,
        }
    }
}

#[async_trait]
impl DetailSource for PortalDetail<'_> {
    async fn fetch_detail(&mut self, listing: &ListingRecord) -> Result<DetailView, FetchError> {
        browser::goto(self.page, &listing.detail_url).await?;

        if browser::wait_for_challenge_clear(self.page).await? == PollOutcome::TimedOut {
            match self.challenge_mode {
                ChallengeMode::Fail => {
                    return Err(FetchError::ChallengeBlocked(listing.detail_url.clone()))
                }
                ChallengeMode::Proceed => {
                    debug!("{}: challenge wait ceiling hit, proceeding", listing.document_id)
                }
            }
        }

        wait_for_selector(self.page, DETAIL_ROW_SELECTOR).await?;

        // The detail table is fixed-position: row 1 document number, row 2
        // type, row 3 recorded date, row 6 address.
        #[derive(Deserialize)]
        struct RawDetail {
            document_id: String,
            document_type: String,
            date_recorded: String,
            address: String,
            iframe_src: Option<String>,
        }

        let raw: RawDetail = eval_into(
            self.page,
            r#"(() => {
                const cell = n => {
                    const el = document.querySelector(
                        `#divcol1 > div.table-responsive > table > tbody > tr:nth-child(${n}) > td`);
                    return el ? el.innerText.trim() : '';
                };
                const span = document.querySelector(
                    '#divcol1 > div.table-responsive > table > tbody > tr:nth-child(6) > td > span');
                const iframe = document.querySelector('iframe#iframe');
                return {
                    document_id: cell(1),
                    document_type: cell(2),
                    date_recorded: cell(3),
                    address: span ? span.innerText.trim() : '',
                    iframe_src: iframe ? iframe.getAttribute('src') : null,
                };
            })()"#,
        )
        .await?;

        Ok(DetailView {
            document_id: raw.document_id,
            document_type: raw.document_type,
            date_recorded: raw.date_recorded,
            address: raw.address,
            artifact_url: raw.iframe_src.map(|src| format!("{BASE_URL}{src}")),
        })
    }
}

// ── Stage D: case-status lookup ──

pub struct PortalCaseLookup<'a> {
    session: &'a BrowserSession,
}

impl<'a> PortalCaseLookup<'a> {
    pub fn new(session: &'a BrowserSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl CaseLookup for PortalCaseLookup<'_> {
    async fn case_body(&mut self, case_number: &str) -> Result<String, FetchError> {
        // Fresh page per query, cookies cleared and identity rotated, so no
        // state carries over between lookups.
        let page = self.session.new_page("about:blank").await?;
        let body = query_case(&page, case_number).await;
        if let Err(e) = page.close().await {
            debug!("closing lookup page: {e}");
        }
        body
    }
}

async fn query_case(page: &Page, case_number: &str) -> Result<String, FetchError> {
    page.execute(ClearBrowserCookiesParams::default())
        .await
        .map_err(|e| browser::cdp_error("clearing cookies", e))?;
    browser::apply_identity(page, browser::random_identity()).await?;
    browser::goto(page, CASE_SEARCH_URL).await?;

    page.find_element("#MainContent_txtCaseNumber")
        .await
        .map_err(|e| browser::cdp_error("case-number field", e))?
        .type_str(case_number)
        .await
        .map_err(|e| browser::cdp_error("typing case number", e))?;
    page.find_element("#MainContent_btnSearch")
        .await
        .map_err(|e| browser::cdp_error("search button", e))?
        .click()
        .await
        .map_err(|e| browser::cdp_error("submitting search", e))?;

    // No network-idle signal over CDP here; give the postback time to land.
    tokio::time::sleep(Duration::from_secs(3)).await;

    eval_into::<String>(page, "document.body.innerText")
        .await
}
