//! Ergonomics over the session façade
//!
//! Two thin layers for callers that do not want to drive the façade
//! directly:
//!
//! - [`Session::scoped`] - run a closure between an entry checkpoint and an
//!   exit checkpoint, rolling back to the entry point if the closure fails.
//!   Release is guaranteed by structured control flow.
//! - [`Middleware`] - the integration seam for host agent frameworks: pass
//!   any async callable through [`Middleware::wrap`] and get back the same
//!   callable protected by [`Session::safe_execute`].

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;
use tracing::warn;

use mindgit_checkpoint::{Checkpoint, StateMap};

use crate::error::{EngineError, Result, StepError};
use crate::executor::ExecuteOptions;
use crate::session::Session;

impl Session {
    /// Checkpoint on entry, run `f`, checkpoint its result on exit. If `f`
    /// fails, roll back to the entry checkpoint and surface the error.
    pub async fn scoped<F, Fut>(
        &self,
        description: &str,
        state: StateMap,
        f: F,
    ) -> Result<StateMap>
    where
        F: FnOnce(StateMap) -> Fut,
        Fut: Future<Output = std::result::Result<StateMap, StepError>>,
    {
        let mut metadata = StateMap::new();
        metadata.insert("scope".into(), json!("enter"));
        let entry = self
            .checkpoint(
                state.clone(),
                metadata,
                &format!("Scope start: {description}"),
                description,
            )
            .await?;

        match f(state).await {
            Ok(result) => {
                let mut metadata = StateMap::new();
                metadata.insert("scope".into(), json!("exit"));
                self.checkpoint(
                    result.clone(),
                    metadata,
                    &format!("Scope complete: {description}"),
                    &format!("{description}:done"),
                )
                .await?;
                Ok(result)
            }
            Err(error) => {
                warn!(scope = description, error = %error, "scope failed, rolling back");
                self.rollback_to(&entry.id).await?;
                Err(EngineError::Execution {
                    description: description.to_string(),
                    source: error,
                })
            }
        }
    }
}

/// Checkpointing middleware for host agent frameworks
///
/// Frameworks integrate by passing their step invokers through [`wrap`];
/// the wrapped callable runs under `safe_execute` with the given label.
///
/// [`wrap`]: Middleware::wrap
#[derive(Clone)]
pub struct Middleware {
    session: Arc<Session>,
}

impl Middleware {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Wrap an async callable with checkpoint protection.
    pub fn wrap<F, Fut>(
        &self,
        call: F,
        label: &str,
    ) -> impl Fn(StateMap) -> BoxFuture<'static, Result<(StateMap, Checkpoint)>>
    where
        F: Fn(StateMap) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<StateMap, StepError>> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        let label = label.to_string();
        move |state| {
            let session = Arc::clone(&session);
            let call = call.clone();
            let label = label.clone();
            Box::pin(async move {
                session
                    .safe_execute(call, state, ExecuteOptions::new(&label))
                    .await
            })
        }
    }
}
