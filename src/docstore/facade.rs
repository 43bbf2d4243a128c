//! Rate-limited client facade.
//!
//! Every outbound call — document store reads and writes, secondary
//! record queries, and generation requests — acquires a token from the
//! shared bucket, runs under a bounded timeout, and is retried with
//! exponential backoff while the failure stays transient. Non-429 4xx
//! responses fail immediately.

use crate::docstore::{Block, DocStore, Properties, Record};
use crate::error::ExternalError;
use crate::generate::{Completion, TextGenerator};
use crate::limiter::{RetryPolicy, TokenBucket};
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tracing::warn;

/// One attempt-with-retry loop shared by both facades.
async fn call_with_retry<T, F, Fut>(
    bucket: &TokenBucket,
    policy: &RetryPolicy,
    op: &'static str,
    mut attempt_call: F,
) -> Result<T, ExternalError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExternalError>>,
{
    let mut attempt = 0usize;
    loop {
        bucket.acquire().await;
        let result = match timeout(policy.call_timeout(), attempt_call()).await {
            Ok(result) => result,
            Err(_) => Err(ExternalError::Timeout(policy.call_timeout())),
        };
        match result {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt + 1 < policy.max_attempts() => {
                let delay = policy.delay(attempt);
                warn!(
                    op,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient external failure, backing off"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Rate-limited, retrying wrapper around a [`DocStore`].
pub struct StoreFacade {
    inner: Arc<dyn DocStore>,
    bucket: Arc<TokenBucket>,
    retry: RetryPolicy,
}

impl StoreFacade {
    pub fn new(inner: Arc<dyn DocStore>, bucket: Arc<TokenBucket>, retry: RetryPolicy) -> Self {
        Self {
            inner,
            bucket,
            retry,
        }
    }

    pub async fn get_record(&self, page_id: &str) -> Result<Record, ExternalError> {
        let inner = Arc::clone(&self.inner);
        let page_id = page_id.to_string();
        call_with_retry(&self.bucket, &self.retry, "get_record", move || {
            let inner = Arc::clone(&inner);
            let page_id = page_id.clone();
            async move { inner.get_record(&page_id).await }
        })
        .await
    }

    pub async fn get_blocks(&self, container_id: &str) -> Result<Vec<Block>, ExternalError> {
        let inner = Arc::clone(&self.inner);
        let container_id = container_id.to_string();
        call_with_retry(&self.bucket, &self.retry, "get_blocks", move || {
            let inner = Arc::clone(&inner);
            let container_id = container_id.clone();
            async move { inner.get_blocks(&container_id).await }
        })
        .await
    }

    pub async fn create_page(
        &self,
        parent_id: &str,
        title: &str,
        icon: Option<&str>,
    ) -> Result<String, ExternalError> {
        let inner = Arc::clone(&self.inner);
        let parent_id = parent_id.to_string();
        let title = title.to_string();
        let icon = icon.map(str::to_string);
        call_with_retry(&self.bucket, &self.retry, "create_page", move || {
            let inner = Arc::clone(&inner);
            let parent_id = parent_id.clone();
            let title = title.clone();
            let icon = icon.clone();
            async move { inner.create_page(&parent_id, &title, icon.as_deref()).await }
        })
        .await
    }

    pub async fn create_record(
        &self,
        database_id: &str,
        properties: Properties,
    ) -> Result<String, ExternalError> {
        let inner = Arc::clone(&self.inner);
        let database_id = database_id.to_string();
        call_with_retry(&self.bucket, &self.retry, "create_record", move || {
            let inner = Arc::clone(&inner);
            let database_id = database_id.clone();
            let properties = properties.clone();
            async move { inner.create_record(&database_id, properties).await }
        })
        .await
    }

    pub async fn update_properties(
        &self,
        page_id: &str,
        properties: Properties,
    ) -> Result<(), ExternalError> {
        let inner = Arc::clone(&self.inner);
        let page_id = page_id.to_string();
        call_with_retry(&self.bucket, &self.retry, "update_properties", move || {
            let inner = Arc::clone(&inner);
            let page_id = page_id.clone();
            let properties = properties.clone();
            async move { inner.update_properties(&page_id, properties).await }
        })
        .await
    }

    pub async fn append_children(
        &self,
        container_id: &str,
        blocks: &[Block],
    ) -> Result<Vec<String>, ExternalError> {
        let inner = Arc::clone(&self.inner);
        let container_id = container_id.to_string();
        let blocks = blocks.to_vec();
        call_with_retry(&self.bucket, &self.retry, "append_children", move || {
            let inner = Arc::clone(&inner);
            let container_id = container_id.clone();
            let blocks = blocks.clone();
            async move { inner.append_children(&container_id, &blocks).await }
        })
        .await
    }

    pub async fn list_child_ids(&self, container_id: &str) -> Result<Vec<String>, ExternalError> {
        let inner = Arc::clone(&self.inner);
        let container_id = container_id.to_string();
        call_with_retry(&self.bucket, &self.retry, "list_child_ids", move || {
            let inner = Arc::clone(&inner);
            let container_id = container_id.clone();
            async move { inner.list_child_ids(&container_id).await }
        })
        .await
    }

    pub async fn delete_block(&self, block_id: &str) -> Result<(), ExternalError> {
        let inner = Arc::clone(&self.inner);
        let block_id = block_id.to_string();
        call_with_retry(&self.bucket, &self.retry, "delete_block", move || {
            let inner = Arc::clone(&inner);
            let block_id = block_id.clone();
            async move { inner.delete_block(&block_id).await }
        })
        .await
    }

    pub async fn query_related(
        &self,
        database_id: &str,
        relation_property: &str,
        target_id: &str,
    ) -> Result<Vec<Record>, ExternalError> {
        let inner = Arc::clone(&self.inner);
        let database_id = database_id.to_string();
        let relation_property = relation_property.to_string();
        let target_id = target_id.to_string();
        call_with_retry(&self.bucket, &self.retry, "query_related", move || {
            let inner = Arc::clone(&inner);
            let database_id = database_id.clone();
            let relation_property = relation_property.clone();
            let target_id = target_id.clone();
            async move {
                inner
                    .query_related(&database_id, &relation_property, &target_id)
                    .await
            }
        })
        .await
    }
}

/// Rate-limited, retrying wrapper around a [`TextGenerator`]. Shares the
/// token bucket with the store facade so the aggregate outbound rate is
/// bounded once, not per endpoint.
pub struct GeneratorFacade {
    inner: Arc<dyn TextGenerator>,
    bucket: Arc<TokenBucket>,
    retry: RetryPolicy,
}

impl GeneratorFacade {
    pub fn new(
        inner: Arc<dyn TextGenerator>,
        bucket: Arc<TokenBucket>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inner,
            bucket,
            retry,
        }
    }

    pub async fn complete(&self, system: &str, user: &str) -> Result<Completion, ExternalError> {
        let inner = Arc::clone(&self.inner);
        let system = system.to_string();
        let user = user.to_string();
        call_with_retry(&self.bucket, &self.retry, "complete", move || {
            let inner = Arc::clone(&inner);
            let system = system.clone();
            let user = user.clone();
            async move { inner.complete(&system, &user).await }
        })
        .await
    }
}
