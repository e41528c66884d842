// src/fetch/mod.rs

use crate::config::DatasetSource;
use crate::error::{PipelineError, Result};
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io::BufWriter};
use tokio::time::sleep;
use tracing::{info, warn};

/// Rows per request against the CMS data API.
pub const PAGE_SIZE: usize = 5000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(50);

/// Bounded retry with exponential backoff. A server-provided hint
/// (`Retry-After`) overrides the computed delay for that attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (1-based):
    /// `base_delay * 2^(attempt-1)` unless the server said otherwise.
    pub fn delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        hint.unwrap_or_else(|| self.base_delay * 2u32.saturating_pow(attempt - 1))
    }
}

/// One transport-level outcome, before retry policy is applied.
pub enum RawResponse {
    Page(Vec<Value>),
    RateLimited(Option<Duration>),
    FatalStatus { status: u16, url: String },
    Transport(String),
}

/// Drive `op` under `policy`: rate limits and transport failures sleep and
/// retry, fatal statuses surface immediately, and the attempt budget converts
/// the last failure into its fatal form.
pub async fn fetch_with_policy<F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<Vec<Value>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = RawResponse>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            RawResponse::Page(records) => return Ok(records),
            RawResponse::FatalStatus { status, url } => {
                return Err(PipelineError::FetchFatal { status, url })
            }
            RawResponse::RateLimited(hint) => {
                if attempt >= policy.max_attempts {
                    return Err(PipelineError::RateLimit { attempts: attempt });
                }
                let delay = policy.delay(attempt, hint);
                warn!(
                    attempt,
                    delay_s = delay.as_secs_f64(),
                    hinted = hint.is_some(),
                    "rate limited (429), backing off"
                );
                sleep(delay).await;
            }
            RawResponse::Transport(reason) => {
                if attempt >= policy.max_attempts {
                    return Err(PipelineError::FetchTransient {
                        attempts: attempt,
                        reason,
                    });
                }
                let delay = policy.delay(attempt, None);
                warn!(
                    attempt,
                    delay_s = delay.as_secs_f64(),
                    error = %reason,
                    "transient fetch failure, backing off"
                );
                sleep(delay).await;
            }
        }
        attempt += 1;
    }
}

/// Anything that can serve pages of flat JSON records. Seam between the
/// driving loop and the HTTP client.
pub trait PageSource {
    fn fetch_page(&self, offset: usize, size: usize)
        -> impl Future<Output = Result<Vec<Value>>>;
}

/// The CMS data API: `GET {base}/{dataset}/data?offset=&size=`.
pub struct CmsDataApi {
    client: Client,
    source: DatasetSource,
    policy: RetryPolicy,
}

impl CmsDataApi {
    pub fn new(client: Client, source: DatasetSource, policy: RetryPolicy) -> CmsDataApi {
        CmsDataApi {
            client,
            source,
            policy,
        }
    }

    async fn send_once(&self, offset: usize, size: usize) -> RawResponse {
        let url = self.source.data_url();
        let resp = match self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .query(&[("offset", offset.to_string()), ("size", size.to_string())])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return RawResponse::Transport(e.to_string()),
        };

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let hint = resp
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return RawResponse::RateLimited(hint);
        }
        if !status.is_success() {
            return RawResponse::FatalStatus {
                status: status.as_u16(),
                url,
            };
        }
        match resp.json::<Value>().await {
            Ok(body) => RawResponse::Page(normalize_page(body)),
            Err(e) => RawResponse::Transport(e.to_string()),
        }
    }
}

impl PageSource for CmsDataApi {
    fn fetch_page(
        &self,
        offset: usize,
        size: usize,
    ) -> impl Future<Output = Result<Vec<Value>>> {
        fetch_with_policy(&self.policy, move |_attempt| self.send_once(offset, size))
    }
}

/// The API usually returns a JSON array of flat objects, occasionally a bare
/// object for a single row.
fn normalize_page(body: Value) -> Vec<Value> {
    match body {
        Value::Array(records) => records,
        other => vec![other],
    }
}

/// Fetch pages starting at offset 0 and persist each non-empty one under
/// `run_dir` as `page_<NNNNN>.json`, numbering from 1 with no gaps. Stops on
/// the first empty page, or truncates the final page once `max_rows` is
/// reached. Returns the total row count persisted.
pub async fn drain_pages<S: PageSource>(
    source: &S,
    run_dir: &Path,
    page_size: usize,
    max_rows: Option<usize>,
) -> Result<usize> {
    fs::create_dir_all(run_dir)?;

    let mut offset = 0usize;
    let mut page_num = 1u32;
    let mut rows_fetched = 0usize;

    loop {
        let mut page = source.fetch_page(offset, page_size).await?;
        if page.is_empty() {
            break;
        }
        let returned = page.len();

        if let Some(cap) = max_rows {
            let remaining = cap - rows_fetched;
            if page.len() > remaining {
                page.truncate(remaining);
            }
        }

        let path = page_path(run_dir, page_num);
        let file = fs::File::create(&path)?;
        serde_json::to_writer(BufWriter::new(file), &page)?;
        info!(page = page_num, rows = page.len(), path = %path.display(), "saved page");

        rows_fetched += page.len();
        page_num += 1;
        offset += returned;

        if matches!(max_rows, Some(cap) if rows_fetched >= cap) {
            break;
        }
    }

    info!(total_rows = rows_fetched, dir = %run_dir.display(), "raw pages persisted");
    Ok(rows_fetched)
}

fn page_path(run_dir: &Path, page_num: u32) -> PathBuf {
    run_dir.join(format!("page_{:05}.json", page_num))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_is_honored_then_succeeds() {
        let calls = Cell::new(0u32);
        let start = Instant::now();
        let records = fetch_with_policy(&policy(), |_| {
            let n = calls.get() + 1;
            calls.set(n);
            async move {
                if n <= 3 {
                    RawResponse::RateLimited(Some(Duration::from_secs(3)))
                } else {
                    RawResponse::Page(vec![json!({"Prscrbr_NPI": "0000000001"})])
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(calls.get(), 4);
        // three hinted sleeps of 3s each
        assert_eq!(start.elapsed(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn unhinted_rate_limit_backs_off_exponentially_then_fails() {
        let start = Instant::now();
        let err = fetch_with_policy(&policy(), |_| async { RawResponse::RateLimited(None) })
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::RateLimit { attempts: 5 }));
        // 2 + 4 + 8 + 16 seconds between the five attempts
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_retries_then_surfaces() {
        let calls = Cell::new(0u32);
        let err = fetch_with_policy(&policy(), |_| {
            calls.set(calls.get() + 1);
            async { RawResponse::Transport("connection reset".into()) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.get(), 5);
        assert!(matches!(
            err,
            PipelineError::FetchTransient { attempts: 5, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_status_is_not_retried() {
        let calls = Cell::new(0u32);
        let err = fetch_with_policy(&policy(), |_| {
            calls.set(calls.get() + 1);
            async {
                RawResponse::FatalStatus {
                    status: 500,
                    url: "http://example/data".into(),
                }
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.get(), 1);
        assert!(matches!(err, PipelineError::FetchFatal { status: 500, .. }));
    }

    struct StubSource {
        total_rows: usize,
    }

    impl PageSource for StubSource {
        async fn fetch_page(&self, offset: usize, size: usize) -> Result<Vec<Value>> {
            let n = self.total_rows.saturating_sub(offset).min(size);
            Ok((0..n)
                .map(|i| json!({"Prscrbr_NPI": format!("{:010}", offset + i)}))
                .collect())
        }
    }

    fn page_len(path: &Path) -> usize {
        let text = fs::read_to_string(path).unwrap();
        serde_json::from_str::<Vec<Value>>(&text).unwrap().len()
    }

    #[tokio::test]
    async fn drain_truncates_final_page_at_row_cap() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource { total_rows: 20_000 };

        let total = drain_pages(&source, dir.path(), 5000, Some(7000))
            .await
            .unwrap();

        assert_eq!(total, 7000);
        assert_eq!(page_len(&dir.path().join("page_00001.json")), 5000);
        assert_eq!(page_len(&dir.path().join("page_00002.json")), 2000);
        assert!(!dir.path().join("page_00003.json").exists());
    }

    #[tokio::test]
    async fn drain_stops_on_empty_page_with_gap_free_numbering() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource { total_rows: 11_000 };

        let total = drain_pages(&source, dir.path(), 5000, None).await.unwrap();

        assert_eq!(total, 11_000);
        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["page_00001.json", "page_00002.json", "page_00003.json"]
        );
        assert_eq!(page_len(&dir.path().join("page_00003.json")), 1000);
    }
}
