//! Request routing.
//!
//! Every request type implements [`Request`]. Reads that may be cached also
//! implement [`CacheableQuery`] and go through [`Dispatcher::query`]; writes
//! that make cached reads stale implement [`InvalidatingCommand`] and go
//! through [`Dispatcher::command`]. Handlers only see the repositories.

use async_trait::async_trait;
use learnhub_cache::{CachePipeline, CacheableQuery, InvalidatingCommand};

use crate::error::AppResult;
use crate::repository::Repositories;

#[async_trait]
pub trait Request: Send + Sync {
    type Response: Send;

    async fn handle(&self, repos: &Repositories) -> AppResult<Self::Response>;
}

#[derive(Clone)]
pub struct Dispatcher {
    pipeline: CachePipeline,
    repos: Repositories,
}

impl Dispatcher {
    pub fn new(pipeline: CachePipeline, repos: Repositories) -> Self {
        Self { pipeline, repos }
    }

    pub fn pipeline(&self) -> &CachePipeline {
        &self.pipeline
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    /// Run a cacheable read through the read-through cache.
    pub async fn query<Q>(&self, query: &Q) -> AppResult<Q::Response>
    where
        Q: Request + CacheableQuery<Output = <Q as Request>::Response>,
    {
        self.pipeline
            .query(query, || query.handle(&self.repos))
            .await
    }

    /// Run a write and invalidate what it touched once it succeeds.
    pub async fn command<C>(&self, command: &C) -> AppResult<C::Response>
    where
        C: Request + InvalidatingCommand<Lookup = Repositories>,
    {
        let result = self
            .pipeline
            .command(command, &self.repos, || command.handle(&self.repos))
            .await;
        if let Err(e) = &result {
            tracing::debug!(
                error = %e,
                client_error = e.is_client_error(),
                "command failed, nothing invalidated"
            );
        }
        result
    }

    /// Run a request that neither reads from nor invalidates the cache.
    pub async fn send<R: Request>(&self, request: &R) -> AppResult<R::Response> {
        request.handle(&self.repos).await
    }
}
