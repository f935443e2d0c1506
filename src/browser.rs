use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::error::CdpError;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::retry::FetchError;

pub const NAV_TIMEOUT: Duration = Duration::from_secs(60);
pub const CHALLENGE_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const CHALLENGE_POLL_CEILING: Duration = Duration::from_secs(120);

/// Page fragments that mark an anti-automation interstitial. Matched
/// case-insensitively against the full document HTML.
const CHALLENGE_MARKERS: &[&str] = &["checking your browser", "cf-turnstile", "cloudflare"];

/// Classify a CDP failure. A lost websocket, a closed handler channel, or a
/// silent chromium instance means the browser process is gone and only a
/// relaunch helps; anything else is retryable on the same session.
pub fn cdp_error(what: &str, err: CdpError) -> FetchError {
    match &err {
        CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse => {
            FetchError::Fatal(anyhow!("{what}: browser connection lost: {err}"))
        }
        _ => FetchError::Transient(format!("{what}: {err}")),
    }
}

/// A launched browser plus the spawned CDP event loop that keeps it alive.
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    pub async fn launch() -> Result<Self> {
        let config = BrowserConfig::builder()
            .build()
            .map_err(|e| anyhow!("browser config: {e}"))?;
        let (browser, mut events) = Browser::launch(config)
            .await
            .context("launching browser")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    debug!("CDP event loop error: {e}");
                }
            }
        });

        Ok(Self { browser, handler })
    }

    pub async fn new_page(&self, url: &str) -> Result<Page, FetchError> {
        self.browser
            .new_page(url)
            .await
            .map_err(|e| cdp_error(&format!("new page for {url}"), e))
    }

    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("browser close failed: {e}");
        }
        self.handler.abort();
    }
}

// ── Simulated client identities ──

/// One rotated client identity: user-agent string plus viewport.
#[derive(Debug, Clone, Copy)]
pub struct Identity {
    pub user_agent: &'static str,
    pub viewport: (u32, u32),
}

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_6) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36 Edg/121.0.0.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36 Brave/1.62",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile Safari/604.1",
    "Mozilla/5.0 (Linux; Android 14; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Mobile Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36 OPR/107.0.0.0",
];

const VIEWPORTS: &[(u32, u32)] = &[
    (1920, 1080),
    (1366, 768),
    (1536, 864),
    (390, 844),
    (412, 915),
];

pub fn random_identity() -> Identity {
    Identity {
        user_agent: USER_AGENTS[fastrand::usize(..USER_AGENTS.len())],
        viewport: VIEWPORTS[fastrand::usize(..VIEWPORTS.len())],
    }
}

/// Apply an identity to a fresh page before any navigation.
pub async fn apply_identity(page: &Page, identity: Identity) -> Result<(), FetchError> {
    let ua = SetUserAgentOverrideParams::builder()
        .user_agent(identity.user_agent)
        .build()
        .map_err(|e| FetchError::Transient(format!("user-agent override: {e}")))?;
    page.execute(ua)
        .await
        .map_err(|e| cdp_error("user-agent override", e))?;

    let (width, height) = identity.viewport;
    let metrics = SetDeviceMetricsOverrideParams::builder()
        .width(width as i64)
        .height(height as i64)
        .device_scale_factor(1.0)
        .mobile(height > width)
        .build()
        .map_err(|e| FetchError::Transient(format!("viewport override: {e}")))?;
    page.execute(metrics)
        .await
        .map_err(|e| cdp_error("viewport override", e))?;
    Ok(())
}

// ── Bounded-wait predicate ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Cleared,
    TimedOut,
}

/// Poll `predicate` every `interval` until it reports true or `timeout`
/// elapses. Errors from the predicate propagate immediately.
pub async fn poll_until<F, Fut>(
    mut predicate: F,
    interval: Duration,
    timeout: Duration,
) -> Result<PollOutcome, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, FetchError>>,
{
    let start = Instant::now();
    loop {
        if predicate().await? {
            return Ok(PollOutcome::Cleared);
        }
        if start.elapsed() >= timeout {
            return Ok(PollOutcome::TimedOut);
        }
        tokio::time::sleep(interval).await;
    }
}

pub fn challenge_cleared(html: &str) -> bool {
    let lower = html.to_lowercase();
    !CHALLENGE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Block until the page no longer shows a challenge interstitial, or the
/// ceiling elapses. Detection stays behind this function; callers only see
/// the outcome.
pub async fn wait_for_challenge_clear(page: &Page) -> Result<PollOutcome, FetchError> {
    poll_until(
        || async {
            let html = page
                .content()
                .await
                .map_err(|e| cdp_error("reading page content", e))?;
            Ok(challenge_cleared(&html))
        },
        CHALLENGE_POLL_INTERVAL,
        CHALLENGE_POLL_CEILING,
    )
    .await
}

/// Navigate with a bounded timeout. A slow or failed navigation is transient;
/// a dead browser connection surfaces as fatal via [`cdp_error`].
pub async fn goto(page: &Page, url: &str) -> Result<(), FetchError> {
    match tokio::time::timeout(NAV_TIMEOUT, page.goto(url)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(cdp_error(&format!("navigating to {url}"), e)),
        Err(_) => Err(FetchError::Transient(format!(
            "navigation timeout after {}s for {url}",
            NAV_TIMEOUT.as_secs()
        ))),
    }
}

// ── Tests ──
