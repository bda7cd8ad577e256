//! Promise-style handle over an in-flight call.
//!
//! # Design
//! The network part of a call starts as soon as it is issued: the pipeline
//! is already running on a blocking worker when `ApiClient::request`
//! returns. `ApiPromise` then collects continuations (`then`, `map`,
//! `success`, `fail`, `always`) into one boxed future. Nothing runs on the
//! caller's thread. Once the promise is settled by `.await`,
//! [`ApiPromise::wait`], [`ApiPromise::detach`] or by being dropped, the
//! chain is driven on a blocking worker of the context runtime, so the
//! runtime flavor of the caller does not matter.
//!
//! Settling is also where unhandled failures reach the global
//! `ApiErrorHandler`: after every `fail` continuation had its chance to call
//! `ApiError::set_handled`.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;

use tokio::task::{JoinError, JoinHandle};

use crate::context::FultonContext;
use crate::error::{ApiError, HttpError, RequestSummary};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'static>>;

/// Dropping an unsettled promise detaches it.
#[must_use = "a dropped promise still runs, but its outcome is discarded"]
pub struct ApiPromise<T: Send + 'static> {
    // `None` once the chain has been handed on.
    future: Option<BoxFuture<T>>,
    context: FultonContext,
}

impl<T: Send + 'static> ApiPromise<T> {
    pub fn from_future<F>(context: FultonContext, future: F) -> Self
    where
        F: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        Self {
            future: Some(Box::pin(future)),
            context,
        }
    }

    pub fn resolved(context: FultonContext, value: T) -> Self {
        Self::from_future(context, async move { Ok(value) })
    }

    pub fn rejected(context: FultonContext, error: ApiError) -> Self {
        Self::from_future(context, async move { Err(error) })
    }

    pub(crate) fn from_join_handle(
        context: FultonContext,
        request: RequestSummary,
        handle: JoinHandle<Result<T, ApiError>>,
    ) -> Self {
        Self::from_future(context, async move {
            match handle.await {
                Ok(result) => result,
                Err(err) => Err(ApiError::new(
                    request,
                    None,
                    HttpError::Other(format!("request task failed: {err}")),
                )),
            }
        })
    }

    pub fn context(&self) -> &FultonContext {
        &self.context
    }

    fn into_parts(mut self) -> (BoxFuture<T>, FultonContext) {
        let context = self.context.clone();
        let future = self
            .future
            .take()
            .unwrap_or_else(|| Box::pin(async { Err(ApiError::other("promise already settled")) }));
        (future, context)
    }

    /// Chain a dependent call. A failure skips `f` and propagates.
    pub fn then<U, F>(self, f: F) -> ApiPromise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> ApiPromise<U> + Send + 'static,
    {
        let (future, context) = self.into_parts();
        ApiPromise::from_future(context, async move {
            let value = future.await?;
            f(value).into_parts().0.await
        })
    }

    pub fn map<U, F>(self, f: F) -> ApiPromise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let (future, context) = self.into_parts();
        ApiPromise::from_future(context, async move { future.await.map(f) })
    }

    /// Observe the value without consuming it.
    pub fn success<F>(self, f: F) -> Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let (future, context) = self.into_parts();
        Self::from_future(context, async move {
            let result = future.await;
            if let Ok(value) = &result {
                f(value);
            }
            result
        })
    }

    /// Observe a failure. Call `set_handled(true)` on the error to keep it
    /// away from the global handler.
    pub fn fail<F>(self, f: F) -> Self
    where
        F: FnOnce(&ApiError) + Send + 'static,
    {
        let (future, context) = self.into_parts();
        Self::from_future(context, async move {
            let result = future.await;
            if let Err(error) = &result {
                f(error);
            }
            result
        })
    }

    pub fn always<F>(self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (future, context) = self.into_parts();
        Self::from_future(context, async move {
            let result = future.await;
            f();
            result
        })
    }

    /// Run the chain on a blocking worker of the context runtime. An
    /// unhandled failure goes to the global error handler before the handle
    /// completes.
    pub fn settle(self) -> JoinHandle<Result<T, ApiError>> {
        let (future, context) = self.into_parts();
        drive(context, future)
    }

    /// Settle without waiting for the outcome.
    pub fn detach(self) {
        drop(self.settle());
    }

    /// Block the current thread until the chain settles.
    ///
    /// # Panics
    /// Panics when called from inside an async context; use `.await` there.
    pub fn wait(self) -> Result<T, ApiError> {
        let runtime = self.context.runtime().clone();
        let settled = self.settle();
        runtime.block_on(async move { flatten(settled.await) })
    }
}

fn drive<T: Send + 'static>(
    context: FultonContext,
    future: BoxFuture<T>,
) -> JoinHandle<Result<T, ApiError>> {
    let runtime = context.runtime().clone();
    let driver = runtime.clone();
    runtime.spawn_blocking(move || {
        let result = driver.block_on(future);
        if let Err(error) = &result {
            if error.report(context.error_handler().as_ref()) {
                tracing::debug!("Reported unhandled error for {}", error.request().url);
            }
        }
        result
    })
}

fn flatten<T>(joined: Result<Result<T, ApiError>, JoinError>) -> Result<T, ApiError> {
    joined.unwrap_or_else(|err| Err(ApiError::other(format!("promise task failed: {err}"))))
}

impl<T: Send + 'static> Drop for ApiPromise<T> {
    fn drop(&mut self) {
        if let Some(future) = self.future.take() {
            drop(drive(self.context.clone(), future));
        }
    }
}

impl<T: Send + 'static> IntoFuture for ApiPromise<T> {
    type Output = Result<T, ApiError>;
    type IntoFuture = BoxFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        let settled = self.settle();
        Box::pin(async move { flatten(settled.await) })
    }
}

impl<T: Send + 'static> fmt::Debug for ApiPromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiPromise")
            .field("settled", &self.future.is_none())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::error::ApiErrorHandler;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl ApiErrorHandler for Counter {
        fn on_error(&self, _error: &ApiError) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn setup() -> (tokio::runtime::Runtime, FultonContext, Arc<Counter>) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let counter = Arc::new(Counter::default());
        let ctx = FultonContext::builder()
            .runtime(rt.handle().clone())
            .error_handler(counter.clone())
            .build()
            .unwrap();
        (rt, ctx, counter)
    }

    #[test]
    fn map_and_then_compose() {
        let (_rt, ctx, _) = setup();
        let next = ctx.clone();
        let result = ApiPromise::resolved(ctx, 20)
            .map(|v| v + 1)
            .then(move |v| ApiPromise::resolved(next, v * 2))
            .wait();
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn failure_skips_then_and_reports_once() {
        let (_rt, ctx, counter) = setup();
        let next = ctx.clone();
        let result = ApiPromise::<i32>::rejected(ctx, ApiError::other("boom"))
            .then(move |v| ApiPromise::resolved(next, v))
            .wait();
        assert_eq!(result.unwrap_err().message(), "boom");
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handled_failure_is_not_reported() {
        let (_rt, ctx, counter) = setup();
        let result = ApiPromise::<()>::rejected(ctx, ApiError::other("boom"))
            .fail(|e| e.set_handled(true))
            .wait();
        assert!(result.unwrap_err().is_handled());
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn always_runs_on_both_paths() {
        let (_rt, ctx, _) = setup();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        let _ = ApiPromise::resolved(ctx.clone(), ())
            .always(move || {
                h.fetch_add(1, Ordering::SeqCst);
            })
            .wait();
        let h = hits.clone();
        let _ = ApiPromise::<()>::rejected(ctx, ApiError::other("boom"))
            .always(move || {
                h.fetch_add(1, Ordering::SeqCst);
            })
            .wait();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn await_inside_runtime() {
        let (rt, ctx, _) = setup();
        let value = rt.block_on(async move { ApiPromise::resolved(ctx, "ok").await });
        assert_eq!(value.unwrap(), "ok");
    }

    #[test]
    fn dropped_failure_is_still_reported() {
        let (_rt, ctx, counter) = setup();
        drop(ApiPromise::<()>::rejected(ctx, ApiError::other("boom")));
        for _ in 0..100 {
            if counter.0.load(Ordering::SeqCst) > 0 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn settled_promise_is_not_reported_again_on_drop() {
        let (_rt, ctx, counter) = setup();
        let result = ApiPromise::<()>::rejected(ctx, ApiError::other("boom")).wait();
        assert!(result.is_err());
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
