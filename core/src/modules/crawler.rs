use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info};
use serde::Serialize;
use url::Url;

use crate::core::form::Form;
use crate::core::state::{Claim, CrawlState};
use crate::errors::ScanError;
use crate::http::RateLimitedFetcher;
use crate::modules::extract::{extract_page, same_origin};

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlPhase {
    Idle,
    Running,
    Done,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrawlFailure {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlResult {
    /// Every claimed URL, sorted.
    pub urls: Vec<String>,
    /// Forms from all workers in discovery order; not deduplicated.
    pub forms: Vec<Form>,
    pub pages_fetched: usize,
    pub failures: Vec<CrawlFailure>,
}

#[derive(Default)]
struct WorkerStats {
    pages_fetched: usize,
    failures: Vec<CrawlFailure>,
}

/// Breadth-first same-origin crawler driven by a pool of workers sharing one
/// queue.
pub struct Crawler {
    fetcher: Arc<RateLimitedFetcher>,
    idle_timeout: Duration,
    phase: Mutex<CrawlPhase>,
}

impl Crawler {
    pub fn new(fetcher: Arc<RateLimitedFetcher>) -> Self {
        Self {
            fetcher,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            phase: Mutex::new(CrawlPhase::Idle),
        }
    }

    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = idle;
        self
    }

    pub fn phase(&self) -> CrawlPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: CrawlPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    pub async fn crawl(&self, start_url: &str, max_pages: usize, concurrency: usize) -> Result<CrawlResult, ScanError> {
        let mut start = Url::parse(start_url.trim())
            .map_err(|e| ScanError::Parse(format!("invalid start URL '{}': {}", start_url, e)))?;
        start.set_fragment(None);

        self.set_phase(CrawlPhase::Running);
        info!("crawl started at {} (max_pages={}, concurrency={})", start, max_pages, concurrency);

        let state = Arc::new(CrawlState::new());
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let origin = Arc::new(start.clone());
        state.enqueue(start.to_string());

        let workers = concurrency.min(max_pages);
        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let state = Arc::clone(&state);
                let stats = Arc::clone(&stats);
                let origin = Arc::clone(&origin);
                let fetcher = Arc::clone(&self.fetcher);
                let idle = self.idle_timeout;
                tokio::spawn(async move { crawl_worker(id, fetcher, state, stats, origin, max_pages, idle).await })
            })
            .collect();

        for joined in futures::future::join_all(handles).await {
            if let Err(e) = joined {
                debug!("crawl worker aborted: {}", e);
            }
        }

        let (urls, forms) = state.export();
        let stats = std::mem::take(&mut *stats.lock().unwrap_or_else(|e| e.into_inner()));
        self.set_phase(CrawlPhase::Done);
        info!(
            "crawl finished: {} url(s), {} form(s), {} failure(s)",
            urls.len(),
            forms.len(),
            stats.failures.len()
        );

        Ok(CrawlResult {
            urls,
            forms,
            pages_fetched: stats.pages_fetched,
            failures: stats.failures,
        })
    }
}

async fn crawl_worker(
    id: usize,
    fetcher: Arc<RateLimitedFetcher>,
    state: Arc<CrawlState>,
    stats: Arc<Mutex<WorkerStats>>,
    origin: Arc<Url>,
    max_pages: usize,
    idle: Duration,
) {
    while let Some(url) = state.dequeue(idle).await {
        match state.claim(&url, max_pages) {
            Claim::Claimed => {}
            Claim::AlreadyVisited | Claim::BudgetExhausted => continue,
        }

        let result = fetcher.get(&url).await;
        let body = match result.outcome {
            Ok(resp) => resp.body,
            Err(failure) => {
                debug!("worker {}: fetch failed for {}: {}", id, url, failure);
                stats
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .failures
                    .push(CrawlFailure { url, reason: failure.to_string() });
                continue;
            }
        };
        stats.lock().unwrap_or_else(|e| e.into_inner()).pages_fetched += 1;

        let Ok(page) = Url::parse(&url) else { continue };
        let content = extract_page(&page, &body);
        for link in content.links {
            if same_origin(&origin, &link) {
                state.enqueue(link.to_string());
            }
        }
        state.add_forms(content.forms);
    }
    debug!("worker {}: idle, exiting", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::FetcherConfig;

    fn fetcher() -> Arc<RateLimitedFetcher> {
        Arc::new(RateLimitedFetcher::new(FetcherConfig::default()).unwrap())
    }

    #[test]
    fn test_new_crawler_is_idle() {
        let crawler = Crawler::new(fetcher());
        assert_eq!(crawler.phase(), CrawlPhase::Idle);
    }

    #[tokio::test]
    async fn test_invalid_start_url_is_parse_error() {
        let crawler = Crawler::new(fetcher());
        let err = crawler.crawl("not a url", 5, 2).await.unwrap_err();
        assert!(matches!(err, ScanError::Parse(_)));
        assert_eq!(crawler.phase(), CrawlPhase::Idle);
    }

    #[tokio::test]
    async fn test_zero_budget_fetches_nothing() {
        let crawler = Crawler::new(fetcher()).with_idle_timeout(Duration::from_millis(10));
        let result = crawler.crawl("http://127.0.0.1:9/", 0, 4).await.unwrap();
        assert!(result.urls.is_empty());
        assert_eq!(result.pages_fetched, 0);
        assert_eq!(crawler.phase(), CrawlPhase::Done);
    }
}
