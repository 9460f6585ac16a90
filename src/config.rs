use crate::query::Pagination;

#[derive(Clone)]
pub struct Config {
    pub sqlite_path: String,
    pub cache_capacity: usize,
    pub dashboard_ttl_ms: u64,
    pub analytics_ttl_ms: u64,
    pub default_page_size: u32,
    pub seed_demo_data: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or_else(|_| "./gmpanel.sqlite".to_string()),
            cache_capacity: std::env::var("CACHE_CAPACITY").ok().and_then(|v| v.parse().ok()).unwrap_or(128),
            dashboard_ttl_ms: std::env::var("DASHBOARD_TTL_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(30_000),
            analytics_ttl_ms: std::env::var("ANALYTICS_TTL_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(60_000),
            default_page_size: std::env::var("DEFAULT_PAGE_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(20),
            seed_demo_data: std::env::var("SEED_DEMO")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }

    /// Pagination for a request that may omit page or limit. The configured
    /// default fills a missing limit; clamping happens downstream.
    pub fn pagination(&self, page: Option<u32>, limit: Option<u32>) -> Pagination {
        Pagination {
            page: page.unwrap_or(1),
            limit: limit.unwrap_or(self.default_page_size),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

pub fn now_ts() -> u64 {
    chrono::Utc::now().timestamp() as u64
}
