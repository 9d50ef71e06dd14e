use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{anyhow, Context as AnyhowContext, Result};
use rquickjs::{Context, Ctx, Error as JsError, Persistent, Runtime, Value};

/// A rejected promise that had no handler attached when it was tracked.
struct UnhandledRejection {
    promise: Persistent<Value<'static>>,
    message: String,
}

type RejectionLog = Rc<RefCell<Vec<UnhandledRejection>>>;

/// JavaScript runtime backed by QuickJS.
///
/// The engine owns the QuickJS runtime and context and provides helpers for
/// evaluating scripts and draining the promise job queue.
pub struct QuickJsEngine {
    runtime: Runtime,
    context: Context,
    max_jobs: usize,
    rejections: RejectionLog,
}

impl QuickJsEngine {
    /// Create an engine that drains at most `max_jobs` promise jobs per pump.
    pub fn new(max_jobs: usize) -> Result<Self> {
        let runtime = Runtime::new().context("failed to create QuickJS runtime")?;
        let context = Context::full(&runtime).context("failed to create QuickJS context")?;

        let rejections = RejectionLog::default();
        let log = Rc::clone(&rejections);
        runtime.set_host_promise_rejection_tracker(Some(Box::new(rejection_tracker(
            move |ctx, promise, reason, is_handled| {
                track_rejection(&log, &ctx, promise, &reason, is_handled)
            },
        ))));

        Ok(Self {
            runtime,
            context,
            max_jobs: max_jobs.max(1),
            rejections,
        })
    }

    /// Messages of promises rejected without a handler since the last call.
    pub fn take_unhandled_rejections(&self) -> Vec<String> {
        self.rejections
            .borrow_mut()
            .drain(..)
            .map(|rejection| rejection.message)
            .collect()
    }

    /// Evaluate a script and discard the result.
    pub fn eval(&self, source: &str, filename: &str) -> Result<()> {
        self.eval_with::<()>(source, filename)
    }

    /// Evaluate a script and convert the result into `V`.
    pub fn eval_with<V>(&self, source: &str, filename: &str) -> Result<V>
    where
        V: for<'js> rquickjs::FromJs<'js>,
    {
        let script = Self::with_source_url(source, filename);
        let value = self.with_context(|ctx| ctx.eval::<V, _>(script))?;

        // Promise continuations queued by the script run before we return.
        self.drain_jobs()?;

        Ok(value)
    }

    /// Execute pending jobs in the QuickJS job queue. Returns how many ran.
    pub fn drain_jobs(&self) -> Result<usize> {
        let mut job_count = 0;

        while self.runtime.is_job_pending() {
            match self.runtime.execute_pending_job() {
                Ok(true) => {
                    job_count += 1;
                    if job_count >= self.max_jobs {
                        tracing::warn!(
                            target: "quickjs",
                            "Stopped processing jobs after {} iterations (possible infinite loop)",
                            self.max_jobs
                        );
                        break;
                    }
                }
                Ok(false) => break,
                Err(job_exception) => {
                    tracing::error!(
                        target: "quickjs",
                        "Job execution error: {:?}",
                        job_exception
                    );
                    break;
                }
            }
        }

        if job_count > 0 {
            tracing::debug!(target: "quickjs", "Executed {} pending jobs", job_count);
        }

        Ok(job_count)
    }

    /// Run `f` inside the context. A thrown JS exception becomes an error
    /// carrying its message and stack.
    pub fn with_context<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'js> FnOnce(Ctx<'js>) -> rquickjs::Result<T>,
    {
        match self.context.with(f) {
            Ok(value) => Ok(value),
            Err(JsError::Exception) => {
                let message = self
                    .context
                    .with(|ctx| capture_exception_message(&ctx))
                    .unwrap_or_else(|| "QuickJS exception".to_string());
                Err(anyhow!(message))
            }
            Err(err) => Err(anyhow::Error::from(err)),
        }
    }

    fn with_source_url(source: &str, filename: &str) -> Vec<u8> {
        let mut script = String::with_capacity(source.len() + filename.len() + 32);
        script.push_str(source);
        if !source.ends_with('\n') {
            script.push('\n');
        }
        script.push_str("//# sourceURL=");
        script.push_str(filename);
        script.push('\n');
        script.into_bytes()
    }
}

impl Drop for QuickJsEngine {
    fn drop(&mut self) {
        // Persistent handles must go before the runtime does.
        self.rejections.borrow_mut().clear();
    }
}

fn rejection_tracker<F>(tracker: F) -> F
where
    F: for<'js> Fn(Ctx<'js>, Value<'js>, Value<'js>, bool) + 'static,
{
    tracker
}

fn track_rejection<'js>(
    log: &RejectionLog,
    ctx: &Ctx<'js>,
    promise: Value<'js>,
    reason: &Value<'js>,
    is_handled: bool,
) {
    if is_handled {
        log.borrow_mut().retain(|rejection| {
            rejection
                .promise
                .clone()
                .restore(ctx)
                .map(|tracked| tracked != promise)
                .unwrap_or(true)
        });
        return;
    }

    let message = describe_exception(reason);
    tracing::debug!(target: "quickjs", "unhandled promise rejection: {message}");
    log.borrow_mut().push(UnhandledRejection {
        promise: Persistent::save(ctx, promise),
        message,
    });
}

fn capture_exception_message(ctx: &Ctx<'_>) -> Option<String> {
    let exception: Value = ctx.catch();
    Some(describe_exception(&exception))
}

fn describe_exception(exception: &Value<'_>) -> String {
    if let Some(obj) = exception.as_object() {
        if let Ok(message) = obj.get::<_, String>("message") {
            let name = obj
                .get::<_, String>("name")
                .unwrap_or_else(|_| "Error".to_string());
            if let Ok(stack) = obj.get::<_, String>("stack") {
                return format!("{name}: {message}\nStack: {stack}");
            }
            return format!("{name}: {message}");
        }
    }

    if let Some(text) = exception.as_string().and_then(|s| s.to_string().ok()) {
        return text;
    }

    format!("{:?}", exception)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_scripts() {
        let engine = QuickJsEngine::new(100).expect("engine");
        let result: i32 = engine
            .eval_with("(() => 40 + 2)()", "engine_test.js")
            .expect("script result");
        assert_eq!(result, 42);
    }

    #[test]
    fn drains_promise_jobs_after_eval() {
        let engine = QuickJsEngine::new(100).expect("engine");
        engine
            .eval(
                "globalThis.out = 'pending'; Promise.resolve('settled').then((v) => { globalThis.out = v; });",
                "jobs.js",
            )
            .expect("eval");
        let out: String = engine.eval_with("globalThis.out", "read.js").expect("read");
        assert_eq!(out, "settled");
    }

    #[test]
    fn tracks_only_unhandled_rejections() {
        let engine = QuickJsEngine::new(100).expect("engine");
        engine
            .eval(
                r#"
                Promise.reject(new RangeError('lost'));
                Promise.reject(new Error('caught')).catch(() => {});
            "#,
                "rejections.js",
            )
            .expect("eval");

        let rejections = engine.take_unhandled_rejections();
        assert_eq!(rejections.len(), 1, "{rejections:?}");
        assert!(rejections[0].starts_with("RangeError: lost"), "{rejections:?}");
        assert!(engine.take_unhandled_rejections().is_empty());
    }

    #[test]
    fn thrown_errors_carry_their_message() {
        let engine = QuickJsEngine::new(100).expect("engine");
        let err = engine
            .eval("throw new TypeError('bad input')", "throw.js")
            .unwrap_err();
        assert!(err.to_string().contains("TypeError: bad input"), "{err}");
    }
}
