//! Statistic sources served by this binary

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Column, Row};
use std::sync::Arc;
use tracing::{debug, info};

use tally_api::ProviderRegistry;
use tally_cache::{Cache, SetOptions};
use tally_core::{CoreError, Limit, LoadOptions, StatisticPage, StatisticRow, StatisticSource};

use crate::config::StatisticConfig;

/// A statistic source reading rows straight from one database table.
///
/// Parameters whose keys are plain SQL identifiers become equality
/// filters; everything else is ignored. Identifiers are validated at
/// construction and before use, never interpolated unchecked.
#[derive(Debug)]
pub struct SqlStatisticSource {
    pool: SqlitePool,
    table: String,
}

impl SqlStatisticSource {
    pub fn new(pool: SqlitePool, table: &str) -> Result<Self, CoreError> {
        if !is_identifier(table) {
            return Err(CoreError::InvalidDefinition(format!(
                "not a valid table name: {:?}",
                table
            )));
        }

        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    /// The `WHERE` clause for the identifier-keyed parameters, with
    /// the values to bind, in clause order.
    fn filters<'a>(&self, options: &'a LoadOptions) -> (String, Vec<&'a serde_json::Value>) {
        let mut columns: Vec<(&String, &serde_json::Value)> = options
            .parameters
            .iter()
            .filter(|(key, _)| is_identifier(key))
            .collect();
        columns.sort_by(|a, b| a.0.cmp(b.0));

        if columns.is_empty() {
            return (String::new(), Vec::new());
        }

        let clause = columns
            .iter()
            .map(|(key, _)| format!("{} = ?", key))
            .collect::<Vec<_>>()
            .join(" AND ");

        (
            format!(" WHERE {}", clause),
            columns.into_iter().map(|(_, value)| value).collect(),
        )
    }
}

#[async_trait]
impl StatisticSource for SqlStatisticSource {
    async fn fetch(&self, options: &LoadOptions) -> Result<StatisticPage, CoreError> {
        let (where_clause, bindings) = self.filters(options);

        let mut sql = format!("SELECT * FROM {}{}", self.table, where_clause);
        match options.limit {
            Limit::Rows(limit) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, options.offset));
            }
            Limit::Unbounded => {
                if options.offset > 0 {
                    // SQLite requires a LIMIT before OFFSET; -1 means all rows.
                    sql.push_str(&format!(" LIMIT -1 OFFSET {}", options.offset));
                }
            }
        }
        debug!(sql = %sql, "loading statistic rows");

        let mut query = sqlx::query(&sql);
        for value in &bindings {
            query = bind_value(query, value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::source)?;

        let count_sql = format!("SELECT COUNT(*) FROM {}{}", self.table, where_clause);
        let mut count_query = sqlx::query(&count_sql);
        for value in &bindings {
            count_query = bind_value(count_query, value);
        }
        let total: i64 = count_query
            .fetch_one(&self.pool)
            .await
            .and_then(|row| row.try_get(0))
            .map_err(CoreError::source)?;

        Ok(StatisticPage {
            rows: rows.iter().map(row_to_json).collect(),
            total_count: Some(total.max(0) as u64),
            ..Default::default()
        })
    }
}

/// Decorates a source with page caching.
///
/// Cache failures are invisible here: a miss (real or degraded) falls
/// through to the inner source, and a failed write only costs the
/// next call a reload.
pub struct CachedSource {
    name: String,
    inner: Arc<dyn StatisticSource>,
    cache: Cache,
    ttl: Option<u64>,
}

impl CachedSource {
    pub fn new(
        name: impl Into<String>,
        inner: Arc<dyn StatisticSource>,
        cache: Cache,
        ttl: Option<u64>,
    ) -> Self {
        Self {
            name: name.into(),
            inner,
            cache,
            ttl,
        }
    }

    fn cache_key(&self, options: &LoadOptions) -> String {
        let mut parameters: Vec<(&String, &serde_json::Value)> =
            options.parameters.iter().collect();
        parameters.sort_by(|a, b| a.0.cmp(b.0));

        let limit = match options.limit {
            Limit::Rows(n) => n.to_string(),
            Limit::Unbounded => "all".to_string(),
        };
        let parameters = parameters
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join("&");

        format!(
            "stats:{}:o={}:l={}:{}",
            self.name, options.offset, limit, parameters
        )
    }
}

#[async_trait]
impl StatisticSource for CachedSource {
    async fn fetch(&self, options: &LoadOptions) -> Result<StatisticPage, CoreError> {
        let key = self.cache_key(options);

        let cached: Option<StatisticPage> = self.cache.get(&key, None).await;
        if let Some(page) = cached {
            debug!(key = %key, "serving statistic page from cache");
            return Ok(page);
        }

        let page = self.inner.fetch(options).await?;

        let set_options = match self.ttl {
            Some(ttl) => SetOptions::with_ttl(ttl),
            None => SetOptions::default(),
        };
        self.cache.set(&key, &page, &set_options).await;

        Ok(page)
    }

    async fn close(&self) -> Result<(), CoreError> {
        self.inner.close().await
    }
}

/// Build the provider registry from configuration.
pub fn build_registry(
    pool: &SqlitePool,
    statistics: &[StatisticConfig],
    cache: Option<(Cache, Option<u64>)>,
) -> Result<ProviderRegistry, CoreError> {
    let mut registry = ProviderRegistry::new();

    for statistic in statistics {
        let source: Arc<dyn StatisticSource> =
            Arc::new(SqlStatisticSource::new(pool.clone(), &statistic.table)?);

        let source: Arc<dyn StatisticSource> = match &cache {
            Some((cache, ttl)) => Arc::new(CachedSource::new(
                &statistic.name,
                source,
                cache.clone(),
                *ttl,
            )),
            None => source,
        };

        registry.register(&statistic.name, source);
        info!(name = %statistic.name, table = %statistic.table, "registered statistic provider");
    }

    Ok(registry)
}

/// Check for a plain SQL identifier: `[A-Za-z_][A-Za-z0-9_]*`.
fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_value<'q>(query: SqliteQuery<'q>, value: &serde_json::Value) -> SqliteQuery<'q> {
    match value {
        serde_json::Value::Null => query.bind(Option::<String>::None),
        serde_json::Value::Bool(flag) => query.bind(*flag),
        serde_json::Value::Number(number) => {
            if let Some(n) = number.as_i64() {
                query.bind(n)
            } else {
                query.bind(number.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(text) => query.bind(text.clone()),
        other => query.bind(other.to_string()),
    }
}

/// Map a raw row to an open JSON object, column by column.
fn row_to_json(row: &SqliteRow) -> StatisticRow {
    let mut out = StatisticRow::new();

    for column in row.columns() {
        let idx = column.ordinal();

        let value = if let Ok(n) = row.try_get::<Option<i64>, _>(idx) {
            n.map_or(serde_json::Value::Null, |n| serde_json::json!(n))
        } else if let Ok(f) = row.try_get::<Option<f64>, _>(idx) {
            f.map_or(serde_json::Value::Null, |f| serde_json::json!(f))
        } else if let Ok(s) = row.try_get::<Option<String>, _>(idx) {
            s.map_or(serde_json::Value::Null, serde_json::Value::String)
        } else {
            serde_json::Value::Null
        };

        out.insert(column.name().to_string(), value);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tally_cache::MemoryStore;
    use tally_core::{StatisticOptions, StatisticProvider};

    async fn seeded_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        sqlx::query(
            r#"
            CREATE TABLE sales (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                region TEXT NOT NULL,
                amount REAL NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        for n in 0..30 {
            let region = if n % 2 == 0 { "emea" } else { "amer" };
            sqlx::query("INSERT INTO sales (region, amount) VALUES (?, ?)")
                .bind(region)
                .bind(n as f64 * 10.0)
                .execute(&pool)
                .await
                .unwrap();
        }

        pool
    }

    fn load_options(offset: u64, limit: Limit) -> LoadOptions {
        LoadOptions {
            offset,
            limit,
            parameters: Default::default(),
        }
    }

    #[test]
    fn validates_identifiers() {
        assert!(is_identifier("sales"));
        assert!(is_identifier("_rollup_2024"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("1sales"));
        assert!(!is_identifier("sales; drop table users"));
        assert!(!is_identifier("sales rollup"));
    }

    #[tokio::test]
    async fn rejects_invalid_table_names() {
        let pool = SqlitePool::connect_lazy("sqlite::memory:").unwrap();
        let err = SqlStatisticSource::new(pool, "bad table").unwrap_err();
        assert!(matches!(err, CoreError::InvalidDefinition(_)));
    }

    #[tokio::test]
    async fn pages_rows_with_limit_and_offset() {
        let pool = seeded_pool().await;
        let source = SqlStatisticSource::new(pool, "sales").unwrap();

        let page = source
            .fetch(&load_options(10, Limit::Rows(5)))
            .await
            .unwrap();

        assert_eq!(page.rows.len(), 5);
        assert_eq!(page.total_count, Some(30));
        assert_eq!(page.rows[0]["id"], json!(11));
        assert_eq!(page.rows[0]["amount"], json!(100.0));
    }

    #[tokio::test]
    async fn unbounded_returns_everything() {
        let pool = seeded_pool().await;
        let source = SqlStatisticSource::new(pool, "sales").unwrap();

        let page = source
            .fetch(&load_options(0, Limit::Unbounded))
            .await
            .unwrap();

        assert_eq!(page.rows.len(), 30);
    }

    #[tokio::test]
    async fn applies_parameter_filters() {
        let pool = seeded_pool().await;
        let source = SqlStatisticSource::new(pool, "sales").unwrap();

        let mut options = load_options(0, Limit::Rows(100));
        options
            .parameters
            .insert("region".to_string(), json!("emea"));

        let page = source.fetch(&options).await.unwrap();

        assert_eq!(page.rows.len(), 15);
        assert_eq!(page.total_count, Some(15));
        assert!(page.rows.iter().all(|row| row["region"] == json!("emea")));
    }

    #[tokio::test]
    async fn ignores_non_identifier_parameters() {
        let pool = seeded_pool().await;
        let source = SqlStatisticSource::new(pool, "sales").unwrap();

        let mut options = load_options(0, Limit::Rows(100));
        options
            .parameters
            .insert("region; --".to_string(), json!("emea"));

        let page = source.fetch(&options).await.unwrap();
        assert_eq!(page.rows.len(), 30);
    }

    #[tokio::test]
    async fn engine_backfills_sql_pages() {
        let pool = seeded_pool().await;
        let provider =
            StatisticProvider::new(SqlStatisticSource::new(pool, "sales").unwrap());

        let result = provider
            .load(StatisticOptions {
                offset: Some(25),
                limit: Some(10),
                parameters: Default::default(),
            })
            .await
            .unwrap();

        assert_eq!(result.offset, 25);
        assert_eq!(result.rows.len(), 5);
        assert_eq!(result.total_count, 30);
        assert!(!result.has_more);
    }

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StatisticSource for CountingSource {
        async fn fetch(&self, _options: &LoadOptions) -> Result<StatisticPage, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(StatisticPage {
                rows: vec![StatisticRow::new()],
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn cached_source_serves_repeats_from_cache() {
        let inner = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedSource::new(
            "sales",
            inner.clone(),
            Cache::new(MemoryStore::new()),
            None,
        );

        let options = load_options(0, Limit::Rows(5));
        cached.fetch(&options).await.unwrap();
        cached.fetch(&options).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        // a different window is a different cache entry
        cached.fetch(&load_options(5, Limit::Rows(5))).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn builds_registry_from_config() {
        let pool = seeded_pool().await;
        let statistics = vec![StatisticConfig {
            name: "Sales".to_string(),
            table: "sales".to_string(),
        }];

        let registry = build_registry(&pool, &statistics, None).unwrap();

        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["sales"]);
    }
}
