//! Statistic provider wrapper and source trait

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{Limit, LoadOptions, StatisticOptions, StatisticPage, StatisticResult};
use crate::error::CoreError;

/// A pluggable retrieval backend for one named statistic.
///
/// Implementations receive fully-normalized options and fill in as
/// much of the page as they can; the wrapping [`StatisticProvider`]
/// supplies defaults for anything left out.
#[async_trait]
pub trait StatisticSource: Send + Sync {
    /// Fetch a page of rows for the given normalized options.
    async fn fetch(&self, options: &LoadOptions) -> Result<StatisticPage, CoreError>;

    /// Release any resources held by the source.
    ///
    /// May be called more than once; the default does nothing.
    async fn close(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

/// The invariant-enforcing wrapper around a [`StatisticSource`].
///
/// `load` never mutates the caller's options, never fails on malformed
/// input, and guarantees that every field of [`StatisticResult`] is
/// populated. Source errors are not caught here; they propagate to the
/// caller.
#[derive(Clone)]
pub struct StatisticProvider {
    source: Arc<dyn StatisticSource>,
}

impl StatisticProvider {
    pub fn new(source: impl StatisticSource + 'static) -> Self {
        Self {
            source: Arc::new(source),
        }
    }

    pub fn from_arc(source: Arc<dyn StatisticSource>) -> Self {
        Self { source }
    }

    /// Load a page of statistic data.
    pub async fn load(&self, options: StatisticOptions) -> Result<StatisticResult, CoreError> {
        let options = LoadOptions::normalize(options);
        debug!(offset = options.offset, limit = ?options.limit, "loading statistic page");

        let page = self.source.fetch(&options).await?;

        let offset = page.offset.unwrap_or(options.offset);
        let total_count = page.total_count.unwrap_or(page.rows.len() as u64);
        let has_more = page.has_more.unwrap_or_else(|| match options.limit {
            Limit::Unbounded => false,
            Limit::Rows(limit) => page.rows.len() as u64 >= limit,
        });

        Ok(StatisticResult {
            rows: page.rows,
            offset,
            total_count,
            has_more,
        })
    }

    /// Close the underlying source.
    pub async fn close(&self) -> Result<(), CoreError> {
        self.source.close().await
    }
}
