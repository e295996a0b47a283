use crate::types::{Bridges, RunSummary, SandboxError, SandboxOptions};

#[cfg(feature = "js-sandbox")]
mod sandbox_impl {
    use super::*;
    use std::future::Future;
    use std::iter;
    use std::pin::pin;
    use std::sync::mpsc::{self, SyncSender};
    use std::sync::Arc;
    use std::task::Poll;
    use std::thread;
    use std::time::Instant;

    use boa_engine::vm::RuntimeLimits;
    use boa_engine::{
        Context, JsError, JsNativeError, JsString, JsValue, NativeFunction, Script, Source,
    };
    use futures::executor::block_on;
    use futures::future::poll_fn;
    use tracing::{debug, Level};

    use crate::environment::PRELUDE;
    use crate::log::SandboxEvent;
    use crate::types::{BridgeArg, BridgeCall, ScriptId};
    use crate::watchdog::{Event, Interrupt, Stalled, Watchdog};

    const WORKER_STACK_BYTES: usize = 8 * 1024 * 1024;
    /// Bridge calls buffered ahead of the host before the interpreter blocks.
    const EVENT_BACKLOG: usize = 1_024;

    /// Executes `scripts` in order inside one fresh interpreter context.
    ///
    /// The interpreter runs on its own thread. Bridge calls come back over a
    /// channel and are handed to `bridges` on the calling thread, in call
    /// order. The bridges are installed before anything runs, followed by
    /// the stub environment. Each script gets its own `script_budget`,
    /// measured here rather than inside the interpreter, so code called
    /// back from native functions is held to it as well. The first fault or
    /// overrun ends the run; later scripts are never started, and bridge
    /// calls already made stay with their handlers. An overrunning
    /// interpreter thread is abandoned.
    pub fn run<I, S>(
        bridges: Bridges,
        scripts: I,
        options: &SandboxOptions,
    ) -> Result<RunSummary, SandboxError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let started = Instant::now();
        let scripts: Vec<String> = scripts
            .into_iter()
            .map(|script| script.as_ref().to_owned())
            .collect();
        let mut handlers = bridges.into_entries();
        let names: Vec<String> = handlers.iter().map(|(name, _)| name.clone()).collect();

        let interrupt = Arc::new(Interrupt::default());
        let (events, received) = mpsc::sync_channel(EVENT_BACKLOG);
        let worker = {
            let interrupt = interrupt.clone();
            let options = options.clone();
            thread::Builder::new()
                .name("js-sandbox".into())
                .stack_size(WORKER_STACK_BYTES)
                .spawn(move || {
                    let outcome = evaluate(&names, &scripts, &options, &interrupt, &events);
                    let _ = events.send(Event::Finished(outcome));
                })
                .map_err(SandboxError::Spawn)?
        };

        let mut watchdog = Watchdog::new(received, options.script_budget, interrupt);
        let mut bridge_calls = 0;
        loop {
            match watchdog.next() {
                Ok(Event::Started(script)) => SandboxEvent {
                    level: Level::TRACE,
                    kind: "script_start",
                    script: Some(script),
                    message: "executing script",
                }
                .emit(),
                Ok(Event::Call { bridge, args }) => {
                    if let Some((name, handler)) = handlers.get_mut(bridge) {
                        let call = BridgeCall::new(name.as_str(), args);
                        bridge_calls += 1;
                        debug!(bridge = %name, args = call.args().len(), "bridge call");
                        handler(&call);
                    }
                }
                Ok(Event::Finished(outcome)) => {
                    let _ = worker.join();
                    let executed = outcome?;
                    debug!(
                        scripts = executed,
                        bridge_calls,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "sandbox run complete"
                    );
                    return Ok(RunSummary {
                        scripts_executed: executed,
                        bridge_calls,
                        elapsed: started.elapsed(),
                    });
                }
                Err(Stalled::Expired(script)) => {
                    SandboxEvent {
                        level: Level::WARN,
                        kind: "time_budget_exceeded",
                        script: Some(script),
                        message: "watchdog abandoned interpreter",
                    }
                    .emit();
                    // Dropping the watchdog closes the channel; the worker
                    // stops at its next bridge call, yield or loop limit.
                    return Err(SandboxError::TimeBudgetExceeded {
                        script,
                        budget: options.script_budget,
                    });
                }
                Err(Stalled::Lost(script)) => {
                    SandboxEvent {
                        level: Level::WARN,
                        kind: "sandbox_crashed",
                        script,
                        message: "interpreter thread exited without a result",
                    }
                    .emit();
                    let _ = worker.join();
                    return Err(SandboxError::Crashed);
                }
            }
        }
    }

    /// Interpreter thread body. Returns the number of page scripts run.
    fn evaluate(
        names: &[String],
        scripts: &[String],
        options: &SandboxOptions,
        interrupt: &Arc<Interrupt>,
        events: &SyncSender<Event>,
    ) -> Result<usize, SandboxError> {
        let mut context = Context::default();
        let mut limits = RuntimeLimits::default();
        limits.set_recursion_limit(options.recursion_limit);
        limits.set_stack_size_limit(options.stack_size_limit);
        if let Some(limit) = options.loop_iteration_limit {
            limits.set_loop_iteration_limit(limit);
        }
        context.set_runtime_limits(limits);
        install_bridges(&mut context, names, interrupt, events)?;

        let pages = scripts
            .iter()
            .enumerate()
            .map(|(index, code)| (ScriptId::Page(index), code.as_str()));
        let mut executed = 0;
        for (script, code) in iter::once((ScriptId::Prelude, PRELUDE)).chain(pages) {
            execute(&mut context, script, code, options, interrupt, events)?;
            if let ScriptId::Page(_) = script {
                executed += 1;
            }
        }
        Ok(executed)
    }

    fn execute(
        context: &mut Context,
        script: ScriptId,
        code: &str,
        options: &SandboxOptions,
        interrupt: &Interrupt,
        events: &SyncSender<Event>,
    ) -> Result<(), SandboxError> {
        let overrun = SandboxError::TimeBudgetExceeded {
            script,
            budget: options.script_budget,
        };
        if interrupt.fired() || events.send(Event::Started(script)).is_err() {
            return Err(overrun);
        }

        let parsed = Script::parse(Source::from_bytes(code), None, context)
            .map_err(|err| script_fault(script, &err, code, options))?;
        let outcome = {
            let mut evaluation =
                pin!(parsed.evaluate_async_with_budget(context, options.yield_budget));
            // Top-level code yields here between slices; nested frames stop
            // at their next bridge call or loop limit.
            block_on(poll_fn(|cx| {
                interrupt.register(cx.waker());
                if interrupt.fired() {
                    return Poll::Ready(None);
                }
                evaluation.as_mut().poll(cx).map(Some)
            }))
        };

        match outcome {
            Some(Ok(_)) => Ok(()),
            Some(Err(_)) if interrupt.fired() => Err(overrun),
            Some(Err(err)) => Err(script_fault(script, &err, code, options)),
            None => Err(overrun),
        }
    }

    fn install_bridges(
        context: &mut Context,
        names: &[String],
        interrupt: &Arc<Interrupt>,
        events: &SyncSender<Event>,
    ) -> Result<(), SandboxError> {
        for (bridge, name) in names.iter().enumerate() {
            let interrupt = interrupt.clone();
            let events = events.clone();
            // SAFETY: the closure captures only host data, no traced JS values.
            let function = unsafe {
                NativeFunction::from_closure(move |_this, args, ctx| {
                    if interrupt.fired() {
                        return Err(JsNativeError::error()
                            .with_message("sandbox interrupted")
                            .into());
                    }
                    let args = args.iter().map(|value| coerce(value, ctx)).collect();
                    events.send(Event::Call { bridge, args }).map_err(|_| {
                        JsError::from(JsNativeError::error().with_message("sandbox host gone"))
                    })?;
                    Ok(JsValue::undefined())
                })
            };
            context
                .register_global_builtin_callable(JsString::from(name.as_str()), 0, function)
                .map_err(|err| SandboxError::BridgeInstall {
                    name: name.clone(),
                    message: err.to_string(),
                })?;
        }
        Ok(())
    }

    /// Best-effort coercion; failures degrade to an empty string or 0.
    fn coerce(value: &JsValue, ctx: &mut Context) -> BridgeArg {
        let text = value
            .to_string(ctx)
            .map(|s| s.to_std_string_escaped())
            .unwrap_or_default();
        // `as` truncates toward zero, saturates, and maps NaN to 0.
        let integer = value.to_number(ctx).map(|n| n as i64).unwrap_or(0);
        BridgeArg { text, integer }
    }

    fn script_fault(
        script: ScriptId,
        err: &JsError,
        code: &str,
        options: &SandboxOptions,
    ) -> SandboxError {
        let message = err.to_string();
        SandboxEvent {
            level: Level::WARN,
            kind: "script_fault",
            script: Some(script),
            message: &message,
        }
        .emit();
        SandboxError::ScriptFault {
            script,
            message,
            excerpt: summarise_source(code, options.max_excerpt_chars),
        }
    }

    fn summarise_source(value: &str, max_len: usize) -> String {
        let mut out = String::new();
        for ch in value.trim().chars() {
            if out.len() >= max_len {
                break;
            }
            if ch.is_ascii_graphic() || ch == ' ' {
                out.push(ch);
            } else if ch.is_whitespace() {
                out.push(' ');
            } else {
                out.push('.');
            }
        }
        out
    }

}

#[cfg(feature = "js-sandbox")]
pub use sandbox_impl::run;

#[cfg(not(feature = "js-sandbox"))]
pub fn run<I, S>(
    _bridges: Bridges,
    _scripts: I,
    _options: &SandboxOptions,
) -> Result<RunSummary, SandboxError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    Err(SandboxError::Unavailable)
}
