//! Dashboard and time-windowed analytics over the entity store.
//!
//! Each public method computes a cache key from its name and parameters,
//! delegates to the metrics cache with a method-specific TTL, and on a miss
//! fans out a fixed set of independent count/sum queries in parallel before
//! merging them into one snapshot.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::cache::MetricsCache;
use crate::config::now_ts;
use crate::query::Statement;
use crate::registry::Registry;
use crate::store::Storage;

pub const DASHBOARD_TTL_MS: u64 = 30_000;
pub const ANALYTICS_TTL_MS: u64 = 60_000;

// =============================================================================
// Time ranges
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRange {
    H1,
    D1,
    D7,
    D30,
}

impl TimeRange {
    /// Unrecognized input falls back to a week, by policy, rather than
    /// failing the request.
    pub fn parse_or_default(s: &str) -> Self {
        match s {
            "1h" => TimeRange::H1,
            "1d" => TimeRange::D1,
            "7d" => TimeRange::D7,
            "30d" => TimeRange::D30,
            _ => TimeRange::D7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::H1 => "1h",
            TimeRange::D1 => "1d",
            TimeRange::D7 => "7d",
            TimeRange::D30 => "30d",
        }
    }

    pub fn window_secs(&self) -> u64 {
        match self {
            TimeRange::H1 => 3_600,
            TimeRange::D1 => 86_400,
            TimeRange::D7 => 7 * 86_400,
            TimeRange::D30 => 30 * 86_400,
        }
    }
}

/// Cache key: method name prefix (so prefix invalidation works per method)
/// plus a digest of the parameter string, which fully determines the query.
pub fn metric_key(method: &str, params: &str) -> String {
    let digest = Sha256::digest(params.as_bytes());
    format!("{}:{}", method, hex::encode(&digest[..8]))
}

// =============================================================================
// Aggregator
// =============================================================================

pub struct MetricsAggregator {
    store: Arc<dyn Storage>,
    cache: Arc<MetricsCache>,
    registry: Arc<Registry>,
    dashboard_ttl_ms: u64,
    analytics_ttl_ms: u64,
}

impl MetricsAggregator {
    pub fn new(store: Arc<dyn Storage>, cache: Arc<MetricsCache>, registry: Arc<Registry>) -> Self {
        Self {
            store,
            cache,
            registry,
            dashboard_ttl_ms: DASHBOARD_TTL_MS,
            analytics_ttl_ms: ANALYTICS_TTL_MS,
        }
    }

    pub fn with_ttls(mut self, dashboard_ttl_ms: u64, analytics_ttl_ms: u64) -> Self {
        self.dashboard_ttl_ms = dashboard_ttl_ms;
        self.analytics_ttl_ms = analytics_ttl_ms;
        self
    }

    pub async fn dashboard_snapshot(&self) -> Result<Value> {
        let key = metric_key("dashboard", "");
        self.cache
            .get_or_compute(&key, self.dashboard_ttl_ms, || self.compute_dashboard())
            .await
    }

    pub async fn analytics(&self, range: TimeRange) -> Result<Value> {
        let key = metric_key("analytics", range.as_str());
        self.cache
            .get_or_compute(&key, self.analytics_ttl_ms, || self.compute_analytics(range))
            .await
    }

    /// Drops all cached metrics; called after bulk admin edits.
    pub fn invalidate_all(&self) {
        self.cache.invalidate(None);
    }

    async fn compute_dashboard(&self) -> Result<Value> {
        let day_ago = now_ts().saturating_sub(86_400);
        let (players_total, players_active, merchants_active, items_active, quests_active, trades_24h, volume_24h) =
            tokio::join!(
                self.count("players", None),
                self.count("players", Some("is_active = ?")),
                self.count("merchants", Some("is_active = ?")),
                self.count("items", Some("is_active = ?")),
                self.count("quests", Some("is_active = ?")),
                self.count_since("trades", day_ago),
                self.sum_since("trades", "price", day_ago),
            );
        Ok(json!({
            "generated_at": now_ts(),
            "players": { "total": players_total?, "active": players_active? },
            "merchants": { "active": merchants_active? },
            "content": { "items": items_active?, "quests": quests_active? },
            "trades": { "last_24h": trades_24h?, "volume_24h": volume_24h? },
        }))
    }

    async fn compute_analytics(&self, range: TimeRange) -> Result<Value> {
        let cutoff = now_ts().saturating_sub(range.window_secs());
        let (new_players, new_merchants, trades, volume) = tokio::join!(
            self.count_since("players", cutoff),
            self.count_since("merchants", cutoff),
            self.count_since("trades", cutoff),
            self.sum_since("trades", "price", cutoff),
        );
        let trades = trades?;
        let volume = volume?;
        let avg_price = if trades > 0 { volume / trades as f64 } else { 0.0 };
        Ok(json!({
            "range": range.as_str(),
            "window_secs": range.window_secs(),
            "generated_at": now_ts(),
            "new_players": new_players?,
            "new_merchants": new_merchants?,
            "trades": trades,
            "trade_volume": volume,
            "avg_trade_price": avg_price,
        }))
    }

    // Table names resolve through the registry so metrics stay on the same
    // whitelisted read path as the engine.
    fn table(&self, entity: &str) -> Result<String> {
        Ok(self.registry.get(entity)?.storage_key.clone())
    }

    async fn count(&self, entity: &str, clause: Option<&str>) -> Result<u64> {
        let table = self.table(entity)?;
        let (sql, params) = match clause {
            Some(c) => (format!("SELECT COUNT(*) AS n FROM {} WHERE {}", table, c), vec![json!(true)]),
            None => (format!("SELECT COUNT(*) AS n FROM {}", table), vec![]),
        };
        self.scalar_u64(Statement { sql, params }).await
    }

    async fn count_since(&self, entity: &str, cutoff: u64) -> Result<u64> {
        let table = self.table(entity)?;
        let stmt = Statement {
            sql: format!("SELECT COUNT(*) AS n FROM {} WHERE created_at >= ?", table),
            params: vec![json!(cutoff)],
        };
        self.scalar_u64(stmt).await
    }

    async fn sum_since(&self, entity: &str, column: &str, cutoff: u64) -> Result<f64> {
        let table = self.table(entity)?;
        // column comes from this module's fixed query set, never from input
        let stmt = Statement {
            sql: format!("SELECT COALESCE(SUM({}), 0) AS n FROM {} WHERE created_at >= ?", column, table),
            params: vec![json!(cutoff)],
        };
        let rows = self.store.query(&stmt).await?;
        Ok(rows.first().and_then(|r| r.get("n")).and_then(|v| v.as_f64()).unwrap_or(0.0))
    }

    async fn scalar_u64(&self, stmt: Statement) -> Result<u64> {
        let rows = self.store.query(&stmt).await?;
        Ok(rows.first().and_then(|r| r.get("n")).and_then(|v| v.as_u64()).unwrap_or(0))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_parse_falls_back_to_week() {
        assert_eq!(TimeRange::parse_or_default("1h"), TimeRange::H1);
        assert_eq!(TimeRange::parse_or_default("30d"), TimeRange::D30);
        assert_eq!(TimeRange::parse_or_default("90d"), TimeRange::D7);
        assert_eq!(TimeRange::parse_or_default(""), TimeRange::D7);
    }

    #[test]
    fn windows_are_ordered() {
        assert!(TimeRange::H1.window_secs() < TimeRange::D1.window_secs());
        assert!(TimeRange::D7.window_secs() < TimeRange::D30.window_secs());
    }

    #[test]
    fn metric_keys_are_stable_and_prefixed() {
        let a = metric_key("analytics", "7d");
        let b = metric_key("analytics", "7d");
        let c = metric_key("analytics", "30d");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("analytics:"));
        assert!(metric_key("dashboard", "").starts_with("dashboard:"));
    }
}
