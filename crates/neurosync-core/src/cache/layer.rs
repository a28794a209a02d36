use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use reqwest::{Method, Url};
use serde_json::Value;
use tracing::debug;

use crate::config::CacheConfig;

/// Identity of a cacheable read: method, normalized path, sorted query pairs.
///
/// Every pair is kept, so repeated parameters (`?tag=a&tag=b`) stay distinct
/// from a single one. Pairs are ordered by name only; repeated names keep
/// their request order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl CacheKey {
    /// Build a key from a request path that may carry a query string.
    pub fn new(method: Method, path_and_query: &str) -> Self {
        let (path, query) = split_path_and_query(path_and_query);
        Self {
            method,
            path,
            query,
        }
    }

    fn is_under(&self, prefix: &str) -> bool {
        let prefix = normalize_path(prefix);
        prefix == "/"
            || self.path == prefix
            || self
                .path
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Collapse duplicate and trailing slashes: `/tasks//u1/` -> `/tasks/u1`.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// First path segment, the unit of cache invalidation for mutations.
pub fn resource_prefix(path_and_query: &str) -> String {
    let (path, _) = split_path_and_query(path_and_query);
    match path.split('/').find(|s| !s.is_empty()) {
        Some(first) => format!("/{}", first),
        None => "/".to_string(),
    }
}

fn split_path_and_query(path_and_query: &str) -> (String, Vec<(String, String)>) {
    let (path, raw_query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    };
    let mut query: Vec<(String, String)> = raw_query
        .and_then(|q| Url::parse(&format!("http://cache.local/?{}", q)).ok())
        .map(|url| url.query_pairs().into_owned().collect())
        .unwrap_or_default();
    query.sort_by(|a, b| a.0.cmp(&b.0));
    (normalize_path(path), query)
}

#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub value: Value,
    pub stored_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CachedEntry {
    pub fn new(value: Value, ttl: Duration) -> Self {
        Self {
            value,
            stored_at: Utc::now(),
            ttl,
        }
    }

    /// Valid iff `now < stored_at + ttl`; a TTL past the representable
    /// range never expires.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.stored_at
            .checked_add_signed(self.ttl)
            .map_or(true, |expiry| now < expiry)
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }

    pub fn age(&self) -> Duration {
        Utc::now() - self.stored_at
    }

    pub fn age_minutes(&self) -> i64 {
        self.age().num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else {
            format!("{}h ago", minutes / 60)
        }
    }
}

/// Resolves how long reads under a path may be cached.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    enabled: bool,
    default_ttl: Option<Duration>,
    rules: Vec<(String, Option<Duration>)>,
}

impl CachePolicy {
    fn ttl_from_secs(secs: u64) -> Option<Duration> {
        if secs == 0 {
            None
        } else {
            i64::try_from(secs).ok().and_then(Duration::try_seconds)
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        let mut rules: Vec<(String, Option<Duration>)> = config
            .rules
            .iter()
            .map(|rule| (normalize_path(&rule.prefix), Self::ttl_from_secs(rule.ttl_secs)))
            .collect();
        // Longest prefix first so the most specific rule wins
        rules.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self {
            enabled: config.enabled,
            default_ttl: Self::ttl_from_secs(config.default_ttl_secs),
            rules,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            default_ttl: None,
            rules: Vec::new(),
        }
    }

    pub fn ttl_for(&self, key: &CacheKey) -> Option<Duration> {
        if !self.enabled || key.method != Method::GET {
            return None;
        }
        self.rules
            .iter()
            .find(|(prefix, _)| key.is_under(prefix))
            .map(|(_, ttl)| *ttl)
            .unwrap_or(self.default_ttl)
    }
}

/// In-memory, process-local read-through cache for GET responses.
///
/// Every invalidation bumps a generation counter. A read that started
/// before an invalidation must not repopulate the cache with what it
/// fetched, so the dispatcher stores through [`CacheLayer::put_if_current`].
pub struct CacheLayer {
    policy: CachePolicy,
    entries: RwLock<HashMap<CacheKey, CachedEntry>>,
    generation: AtomicU64,
}

impl CacheLayer {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            entries: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Current invalidation generation, to be captured before a read starts.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Fresh value for the key; expired entries are treated as absent.
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        self.entry(key).map(|entry| entry.value)
    }

    pub fn entry(&self, key: &CacheKey) -> Option<CachedEntry> {
        let entries = self.entries.read();
        entries.get(key).filter(|entry| entry.is_fresh()).cloned()
    }

    /// Store a value; last writer wins for concurrent writers of one key.
    pub fn put(&self, key: CacheKey, value: Value, ttl: Duration) {
        if key.method != Method::GET {
            return;
        }
        debug!(path = %key.path, ttl_secs = ttl.num_seconds(), "Caching response");
        self.entries.write().insert(key, CachedEntry::new(value, ttl));
    }

    /// Store a value using the policy's TTL unless an invalidation happened
    /// since `observed` was read. Returns whether the value was stored.
    pub fn put_if_current(&self, key: CacheKey, value: Value, observed: u64) -> bool {
        let Some(ttl) = self.policy.ttl_for(&key) else {
            return false;
        };
        let mut entries = self.entries.write();
        if self.generation.load(Ordering::Acquire) != observed {
            debug!(path = %key.path, "Skipping cache write for a read that raced an invalidation");
            return false;
        }
        entries.insert(key, CachedEntry::new(value, ttl));
        true
    }

    /// Drop every entry for `resource_path` or any path nested under it.
    pub fn invalidate_prefix(&self, resource_path: &str) -> usize {
        let mut entries = self.entries.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        let before = entries.len();
        entries.retain(|key, _| !key.is_under(resource_path));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(prefix = resource_path, removed, "Invalidated cached reads");
        }
        removed
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.clear();
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh_at(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheRule;
    use serde_json::json;

    fn layer() -> CacheLayer {
        CacheLayer::new(CachePolicy::from_config(&CacheConfig::default()))
    }

    fn get(path: &str) -> CacheKey {
        CacheKey::new(Method::GET, path)
    }

    #[test]
    fn test_key_normalizes_path_and_query_order() {
        let a = get("/tasks/u1/?b=2&a=1");
        let b = get("/tasks//u1?a=1&b=2");
        assert_eq!(a, b);
        assert_eq!(a.path, "/tasks/u1");
        assert_eq!(
            a.query,
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn test_key_keeps_repeated_query_params() {
        let both = get("/tasks/u1?tag=a&tag=b");
        assert_ne!(both, get("/tasks/u1?tag=b"));
        assert_ne!(both, get("/tasks/u1?tag=a"));
        assert_eq!(both.query.len(), 2);
        assert_eq!(
            get("/tasks/u1?tag=a&limit=5&tag=b"),
            get("/tasks/u1?limit=5&tag=a&tag=b")
        );
    }

    #[test]
    fn test_key_decodes_query_values() {
        let key = get("/finance/progress/u1?month=2024%2D05");
        assert_eq!(key.query, vec![("month".to_string(), "2024-05".to_string())]);
    }

    #[test]
    fn test_resource_prefix() {
        assert_eq!(resource_prefix("/tasks/"), "/tasks");
        assert_eq!(resource_prefix("/tasks/t1/complete"), "/tasks");
        assert_eq!(resource_prefix("chat?x=1"), "/chat");
        assert_eq!(resource_prefix("/"), "/");
    }

    #[test]
    fn test_put_then_get() {
        let cache = layer();
        cache.put(get("/tasks/u1"), json!([{"id": "t1"}]), Duration::minutes(5));
        assert_eq!(cache.get(&get("/tasks/u1")), Some(json!([{"id": "t1"}])));
        assert_eq!(cache.get(&get("/tasks/u2")), None);
    }

    #[test]
    fn test_non_get_is_never_cached() {
        let cache = layer();
        let key = CacheKey::new(Method::POST, "/tasks");
        cache.put(key.clone(), json!({}), Duration::minutes(5));
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expired_entry_is_absent() {
        let mut old = CachedEntry::new(json!(1), Duration::seconds(30));
        old.stored_at = Utc::now() - Duration::seconds(31);
        assert!(!old.is_fresh());

        let cache = layer();
        cache.entries.write().insert(get("/tasks/u1"), old);
        assert!(cache.get(&get("/tasks/u1")).is_none());
        assert_eq!(cache.purge_expired(), 1);
    }

    #[test]
    fn test_freshness_boundary() {
        let entry = CachedEntry::new(json!(1), Duration::seconds(10));
        assert!(entry.is_fresh_at(entry.stored_at + Duration::seconds(9)));
        assert!(!entry.is_fresh_at(entry.stored_at + Duration::seconds(10)));
    }

    #[test]
    fn test_invalidate_prefix_removes_nested_reads_only() {
        let cache = layer();
        let ttl = Duration::minutes(5);
        cache.put(get("/tasks/u1"), json!(1), ttl);
        cache.put(get("/tasks/u1?done=true"), json!(2), ttl);
        cache.put(get("/tasks"), json!(3), ttl);
        cache.put(get("/tasksets/u1"), json!(4), ttl);
        cache.put(get("/chat/history/u1"), json!(5), ttl);

        assert_eq!(cache.invalidate_prefix("/tasks"), 3);
        assert!(cache.get(&get("/tasksets/u1")).is_some());
        assert!(cache.get(&get("/chat/history/u1")).is_some());
    }

    #[test]
    fn test_put_if_current_rejects_read_that_raced_invalidation() {
        let cache = layer();
        let observed = cache.generation();
        cache.invalidate_prefix("/tasks");

        assert!(!cache.put_if_current(get("/tasks/u1"), json!("stale"), observed));
        assert!(cache.get(&get("/tasks/u1")).is_none());

        assert!(cache.put_if_current(get("/tasks/u1"), json!("fresh"), cache.generation()));
        assert_eq!(cache.get(&get("/tasks/u1")), Some(json!("fresh")));
    }

    #[test]
    fn test_clear_empties_everything() {
        let cache = layer();
        cache.put(get("/tasks/u1"), json!(1), Duration::minutes(5));
        cache.put(get("/chat/history/u1"), json!(2), Duration::minutes(5));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_policy_rules_longest_prefix_wins() {
        let config = CacheConfig {
            enabled: true,
            default_ttl_secs: 60,
            rules: vec![
                CacheRule { prefix: "/finance".to_string(), ttl_secs: 600 },
                CacheRule { prefix: "/finance/progress".to_string(), ttl_secs: 0 },
            ],
        };
        let policy = CachePolicy::from_config(&config);
        assert_eq!(policy.ttl_for(&get("/tasks/u1")), Some(Duration::seconds(60)));
        assert_eq!(policy.ttl_for(&get("/finance/summary/u1")), Some(Duration::seconds(600)));
        assert_eq!(policy.ttl_for(&get("/finance/progress/u1")), None);
        assert_eq!(policy.ttl_for(&CacheKey::new(Method::DELETE, "/tasks/t1")), None);
        assert_eq!(CachePolicy::disabled().ttl_for(&get("/tasks/u1")), None);
    }

    #[test]
    fn test_cached_entry_age_display_just_now() {
        let entry = CachedEntry::new(json!([1, 2, 3]), Duration::minutes(5));
        assert_eq!(entry.age_display(), "just now");

        let mut old = entry.clone();
        old.stored_at = Utc::now() - Duration::minutes(90);
        assert_eq!(old.age_display(), "1h ago");
    }
}
