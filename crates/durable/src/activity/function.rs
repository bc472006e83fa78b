//! Closure-backed activity executor

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use super::{ActivityContext, ActivityError, ActivityExecutor};

/// Activity handler function type
pub type ActivityHandler = Arc<
    dyn Fn(ActivityContext, serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value, ActivityError>>
        + Send
        + Sync,
>;

/// Activity executor backed by an async closure
///
/// # Example
///
/// ```ignore
/// let executor = FnActivityExecutor::new("echo", |_ctx, input| async move { Ok(input) });
/// ```
#[derive(Clone)]
pub struct FnActivityExecutor {
    activity_type: String,
    handler: ActivityHandler,
}

impl FnActivityExecutor {
    pub fn new<F, Fut>(activity_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ActivityContext, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ActivityError>> + Send + 'static,
    {
        Self {
            activity_type: activity_type.into(),
            handler: Arc::new(move |ctx, input| handler(ctx, input).boxed()),
        }
    }
}

impl std::fmt::Debug for FnActivityExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnActivityExecutor")
            .field("activity_type", &self.activity_type)
            .finish()
    }
}

#[async_trait]
impl ActivityExecutor for FnActivityExecutor {
    fn activity_type(&self) -> &str {
        &self.activity_type
    }

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, ActivityError> {
        (self.handler)(ctx.clone(), input).await
    }
}
