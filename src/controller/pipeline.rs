//! # Pipeline
//!
//! Runs the Chart's resource handlers in a fixed order for one pass:
//! namespace, history guard, release, status.
//!
//! Each handler returns a [`Flow`]:
//!
//! - `Continue` - run the next handler
//! - `Skip` - this handler stopped early, later handlers still run
//! - `Cancel` - stop the pass without treating it as a failure
//! - `KeepFinalizer` - stop a delete pass and leave the finalizer in place
//!
//! Errors are retried with exponential backoff when [`ReconcilerError::is_retryable`]
//! allows it; otherwise, or once attempts run out, the pass fails. Every
//! attempt starts from the context as it was before the handler ran, so a failed
//! attempt never leaks half-recorded signals into the next one.

use crate::controller::context::PassContext;
use crate::controller::reconciler::ReconcilerError;
use crate::controller::retry::{retry_with_backoff, RetryConfig};
use crate::crd::Chart;
use crate::observability::metrics;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Skip,
    Cancel,
    KeepFinalizer,
}

impl Flow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flow::Continue => "continue",
            Flow::Skip => "skipped",
            Flow::Cancel => "cancelled",
            Flow::KeepFinalizer => "finalizer_kept",
        }
    }

    /// Whether the remaining handlers must not run
    pub fn stops_pass(&self) -> bool {
        matches!(self, Flow::Cancel | Flow::KeepFinalizer)
    }
}

/// Outcome of an intermediate handler step
#[derive(Debug)]
pub enum Step<T> {
    Proceed(T),
    Stop(Flow),
}

/// Kind of pass being run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassEvent {
    Apply,
    Delete,
}

impl PassEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassEvent::Apply => "apply",
            PassEvent::Delete => "delete",
        }
    }
}

/// A pipeline stage
#[async_trait]
pub trait Handler: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    async fn ensure_created(
        &self,
        chart: &Chart,
        ctx: &mut PassContext,
    ) -> Result<Flow, ReconcilerError>;

    async fn ensure_deleted(
        &self,
        chart: &Chart,
        ctx: &mut PassContext,
    ) -> Result<Flow, ReconcilerError>;
}

/// A stage expressed as a current/desired diff
///
/// `create_change` runs when there is no current state, `update_change` otherwise.
/// At most one of them produces a change per pass.
#[async_trait]
pub trait CrudResource: Send + Sync + Debug {
    type State: Send + Sync + Debug;

    fn name(&self) -> &'static str;

    /// `None` when the resource does not exist
    async fn current_state(
        &self,
        chart: &Chart,
        ctx: &mut PassContext,
    ) -> Result<Step<Option<Self::State>>, ReconcilerError>;

    async fn desired_state(
        &self,
        chart: &Chart,
        ctx: &mut PassContext,
    ) -> Result<Step<Self::State>, ReconcilerError>;

    async fn create_change(
        &self,
        chart: &Chart,
        ctx: &mut PassContext,
        current: Option<&Self::State>,
        desired: &Self::State,
    ) -> Result<Step<Option<Self::State>>, ReconcilerError>;

    async fn update_change(
        &self,
        chart: &Chart,
        ctx: &mut PassContext,
        current: Option<&Self::State>,
        desired: &Self::State,
    ) -> Result<Step<Option<Self::State>>, ReconcilerError>;

    async fn delete_change(
        &self,
        chart: &Chart,
        ctx: &mut PassContext,
        current: Option<&Self::State>,
        desired: &Self::State,
    ) -> Result<Step<Option<Self::State>>, ReconcilerError>;

    async fn apply_create(
        &self,
        chart: &Chart,
        ctx: &mut PassContext,
        change: Self::State,
    ) -> Result<Flow, ReconcilerError>;

    async fn apply_update(
        &self,
        chart: &Chart,
        ctx: &mut PassContext,
        current: &Self::State,
        change: Self::State,
    ) -> Result<Flow, ReconcilerError>;

    async fn apply_delete(
        &self,
        chart: &Chart,
        ctx: &mut PassContext,
        change: Self::State,
    ) -> Result<Flow, ReconcilerError>;
}

macro_rules! proceed {
    ($step:expr) => {
        match $step? {
            Step::Proceed(value) => value,
            Step::Stop(flow) => return Ok(flow),
        }
    };
}

/// Adapts a [`CrudResource`] to the [`Handler`] contract
#[derive(Debug)]
pub struct CrudHandler<R> {
    resource: R,
}

impl<R> CrudHandler<R> {
    pub fn new(resource: R) -> Self {
        Self { resource }
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }
}

#[async_trait]
impl<R: CrudResource> Handler for CrudHandler<R> {
    fn name(&self) -> &'static str {
        self.resource.name()
    }

    async fn ensure_created(
        &self,
        chart: &Chart,
        ctx: &mut PassContext,
    ) -> Result<Flow, ReconcilerError> {
        let r = &self.resource;
        let current = proceed!(r.current_state(chart, ctx).await);
        let desired = proceed!(r.desired_state(chart, ctx).await);

        if let Some(change) =
            proceed!(r.create_change(chart, ctx, current.as_ref(), &desired).await)
        {
            return r.apply_create(chart, ctx, change).await;
        }

        if let Some(change) =
            proceed!(r.update_change(chart, ctx, current.as_ref(), &desired).await)
        {
            let Some(current) = current.as_ref() else {
                return Err(ReconcilerError::Contract(format!(
                    "{} produced an update without a current state",
                    r.name()
                )));
            };
            return r.apply_update(chart, ctx, current, change).await;
        }

        debug!("{}: no changes", r.name());
        Ok(Flow::Continue)
    }

    async fn ensure_deleted(
        &self,
        chart: &Chart,
        ctx: &mut PassContext,
    ) -> Result<Flow, ReconcilerError> {
        let r = &self.resource;
        let current = proceed!(r.current_state(chart, ctx).await);
        let desired = proceed!(r.desired_state(chart, ctx).await);

        match proceed!(r.delete_change(chart, ctx, current.as_ref(), &desired).await) {
            Some(change) => r.apply_delete(chart, ctx, change).await,
            None => Ok(Flow::Continue),
        }
    }
}

/// Result of a completed (or cancelled) pass
#[derive(Debug)]
pub struct PassOutcome {
    /// `Continue` when every handler ran
    pub flow: Flow,
    /// Handler that cancelled the pass
    pub stopped_by: Option<&'static str>,
    /// Handlers that stopped early without cancelling the pass
    pub skipped: Vec<&'static str>,
    pub context: PassContext,
}

impl PassOutcome {
    pub fn is_cancelled(&self) -> bool {
        self.flow != Flow::Continue || !self.skipped.is_empty()
    }

    pub fn keep_finalizer(&self) -> bool {
        self.flow == Flow::KeepFinalizer
    }
}

/// Ordered handlers with retry and instrumentation
#[derive(Debug)]
pub struct Pipeline {
    handlers: Vec<Arc<dyn Handler>>,
    retry: RetryConfig,
}

impl Pipeline {
    pub fn new(handlers: Vec<Arc<dyn Handler>>, retry: RetryConfig) -> Self {
        Self { handlers, retry }
    }

    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub async fn run(&self, event: PassEvent, chart: &Chart) -> Result<PassOutcome, ReconcilerError> {
        let mut ctx = PassContext::new();
        let mut skipped = Vec::new();

        for handler in &self.handlers {
            let name = handler.name();
            let span = info_span!("pipeline.handler", resource = name, event = event.as_str());
            let start = Instant::now();
            let before = ctx.clone();

            let result = retry_with_backoff(&self.retry, name, ReconcilerError::is_retryable, || {
                let mut attempt_ctx = before.clone();
                async move {
                    let flow = match event {
                        PassEvent::Apply => handler.ensure_created(chart, &mut attempt_ctx).await?,
                        PassEvent::Delete => handler.ensure_deleted(chart, &mut attempt_ctx).await?,
                    };
                    Ok::<_, ReconcilerError>((flow, attempt_ctx))
                }
            })
            .instrument(span)
            .await;

            metrics::observe_handler_duration(name, start.elapsed().as_secs_f64());

            let (flow, attempt_ctx) = match result {
                Ok(done) => done,
                Err(e) => {
                    metrics::increment_handler_outcome(name, "error");
                    return Err(e);
                }
            };
            metrics::increment_handler_outcome(name, flow.as_str());
            ctx = attempt_ctx;

            match flow {
                Flow::Continue => {}
                Flow::Skip => {
                    debug!("{} stopped early, continuing pass", name);
                    skipped.push(name);
                }
                Flow::Cancel | Flow::KeepFinalizer => {
                    info!("Pass cancelled by {} ({})", name, flow.as_str());
                    return Ok(PassOutcome {
                        flow,
                        stopped_by: Some(name),
                        skipped,
                        context: ctx,
                    });
                }
            }
        }

        Ok(PassOutcome {
            flow: Flow::Continue,
            stopped_by: None,
            skipped,
            context: ctx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::resources::test_support::chart;
    use crate::store::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug)]
    struct Scripted {
        name: &'static str,
        flow: Flow,
        /// Retryable failures before succeeding
        failures: AtomicU32,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Scripted {
        fn new(name: &'static str, flow: Flow, calls: &Arc<Mutex<Vec<&'static str>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                flow,
                failures: AtomicU32::new(0),
                calls: Arc::clone(calls),
            })
        }
    }

    #[async_trait]
    impl Handler for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn ensure_created(
            &self,
            _chart: &Chart,
            ctx: &mut PassContext,
        ) -> Result<Flow, ReconcilerError> {
            self.calls.lock().expect("lock").push(self.name);
            ctx.set_status(self.name, "touched");
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::Conflict("web/nginx".into()).into());
            }
            Ok(self.flow)
        }

        async fn ensure_deleted(
            &self,
            chart: &Chart,
            ctx: &mut PassContext,
        ) -> Result<Flow, ReconcilerError> {
            self.ensure_created(chart, ctx).await
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_runs_handlers_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(
            vec![
                Scripted::new("namespace", Flow::Continue, &calls),
                Scripted::new("release", Flow::Continue, &calls),
                Scripted::new("status", Flow::Continue, &calls),
            ],
            fast_retry(),
        );
        let outcome = pipeline
            .run(PassEvent::Apply, &chart("nginx", "web"))
            .await
            .expect("pass succeeds");
        assert_eq!(outcome.flow, Flow::Continue);
        assert!(!outcome.is_cancelled());
        assert_eq!(*calls.lock().expect("lock"), vec!["namespace", "release", "status"]);
    }

    #[tokio::test]
    async fn test_cancel_stops_remaining_handlers() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(
            vec![
                Scripted::new("namespace", Flow::Cancel, &calls),
                Scripted::new("status", Flow::Continue, &calls),
            ],
            fast_retry(),
        );
        let outcome = pipeline
            .run(PassEvent::Apply, &chart("nginx", "web"))
            .await
            .expect("cancel is not an error");
        assert_eq!(outcome.flow, Flow::Cancel);
        assert_eq!(outcome.stopped_by, Some("namespace"));
        assert_eq!(*calls.lock().expect("lock"), vec!["namespace"]);
    }

    #[tokio::test]
    async fn test_skip_continues_with_later_handlers() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(
            vec![
                Scripted::new("release", Flow::Skip, &calls),
                Scripted::new("status", Flow::Continue, &calls),
            ],
            fast_retry(),
        );
        let outcome = pipeline
            .run(PassEvent::Apply, &chart("nginx", "web"))
            .await
            .expect("pass succeeds");
        assert!(outcome.is_cancelled());
        assert_eq!(outcome.skipped, vec!["release"]);
        assert_eq!(*calls.lock().expect("lock"), vec!["release", "status"]);
    }

    #[tokio::test]
    async fn test_keep_finalizer_reported() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(
            vec![Scripted::new("release", Flow::KeepFinalizer, &calls)],
            fast_retry(),
        );
        let outcome = pipeline
            .run(PassEvent::Delete, &chart("nginx", "web"))
            .await
            .expect("pass succeeds");
        assert!(outcome.keep_finalizer());
    }

    #[tokio::test]
    async fn test_retryable_errors_are_retried() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let flaky = Scripted::new("status", Flow::Continue, &calls);
        flaky.failures.store(2, Ordering::SeqCst);
        let pipeline = Pipeline::new(vec![flaky], fast_retry());
        let outcome = pipeline
            .run(PassEvent::Apply, &chart("nginx", "web"))
            .await
            .expect("third attempt succeeds");
        assert_eq!(outcome.flow, Flow::Continue);
        assert_eq!(calls.lock().expect("lock").len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_pass() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let flaky = Scripted::new("status", Flow::Continue, &calls);
        flaky.failures.store(10, Ordering::SeqCst);
        let pipeline = Pipeline::new(vec![flaky], fast_retry());
        let result = pipeline.run(PassEvent::Apply, &chart("nginx", "web")).await;
        assert!(matches!(result, Err(ReconcilerError::Store(StoreError::Conflict(_)))));
        assert_eq!(calls.lock().expect("lock").len(), 3);
    }
}
