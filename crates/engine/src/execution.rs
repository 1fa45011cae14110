//! Chain — one mutable run of a [`Processing`].
//!
//! A chain keeps its remaining work as an explicit queue so callers (and the
//! calls themselves) can branch, wing, reroute, cancel or retry between any
//! two steps. Nested chains occupy the front of the queue and are drained
//! depth-first before the parent continues.

use crate::error_execution::{ErrorCall, ErrorExecution};
use crate::processing::Processing;
use skein_core::{Arguments, Fill, ProcessError, SlotKind};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};
use uuid::Uuid;

/// A unit of work queued in a chain.
pub type Call = Arc<dyn Fn(&mut Chain, &Arguments) -> Result<(), ProcessError> + Send + Sync>;

/// Wrap a closure as a [`Call`].
pub fn call<F>(f: F) -> Call
where
    F: Fn(&mut Chain, &Arguments) -> Result<(), ProcessError> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) type SharedArguments = Arc<Mutex<Arguments>>;

pub(crate) fn lock(arg: &SharedArguments) -> MutexGuard<'_, Arguments> {
    arg.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Terminal state of a chain. A running chain has no status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Consumed,
    Canceled,
    Exception,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Consumed => "consumed",
            Status::Canceled => "canceled",
            Status::Exception => "exception",
        };
        f.write_str(name)
    }
}

enum Step {
    Call(Call),
    Nested(Box<Chain>),
}

pub struct Chain {
    id: Uuid,
    queue: VecDeque<Step>,
    arg: SharedArguments,
    status: Option<Status>,
    errors: Vec<ErrorCall>,
    finalizers: Option<Vec<Call>>,
    trace_calls: bool,
}

impl Chain {
    /// A chain over the processing calls with an empty argument bag.
    pub fn new(processing: &Processing) -> Self {
        Self::from_calls(processing.calls().iter().cloned(), Arc::new(Mutex::new(Arguments::new())))
    }

    /// A chain whose absent slots are filled according to `fill`.
    pub fn with_fill(processing: &Processing, fill: Fill, arguments: Arguments) -> Self {
        let mut arguments = arguments;
        for (name, class) in processing.contexts() {
            if arguments.contains(name) {
                continue;
            }
            match class.kind() {
                SlotKind::Class if fill.classes() => {
                    arguments.insert(name, Arc::clone(class));
                }
                SlotKind::Value if fill.values() => {
                    arguments.insert(name, class.create());
                }
                _ => {}
            }
        }
        Self::from_calls(processing.calls().iter().cloned(), Arc::new(Mutex::new(arguments)))
    }

    pub(crate) fn from_calls(calls: impl IntoIterator<Item = Call>, arg: SharedArguments) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: calls.into_iter().map(Step::Call).collect(),
            arg,
            status: None,
            errors: Vec::new(),
            finalizers: Some(Vec::new()),
            trace_calls: false,
        }
    }

    /// Emit a debug event for every call performed by this chain and its nested chains.
    pub fn trace_calls(mut self, enabled: bool) -> Self {
        self.trace_calls = enabled;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> Option<Status> {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status.is_none()
    }

    /// Snapshot of the argument bag. Contexts in it are shared handles.
    pub fn arguments(&self) -> Arguments {
        lock(&self.arg).clone()
    }

    /// Add (or overwrite) entries of the argument bag.
    pub fn process(&mut self, arguments: Arguments) -> &mut Self {
        lock(&self.arg).extend(&arguments);
        self
    }

    /// Perform the next piece of work.
    ///
    /// Returns `Ok(true)` while there is more to do. An error is returned only
    /// when no error handler suppressed it, after the finalizers have run.
    pub fn step(&mut self) -> Result<bool, ProcessError> {
        self.advance(&[])
    }

    /// One step, with the error handlers of every enclosing chain in scope.
    ///
    /// `inherited` is ordered outermost first. A nested chain hands its
    /// failures to those handlers before its own queue is touched, so a retry
    /// resumes inside the nested chain.
    fn advance(&mut self, inherited: &[ErrorCall]) -> Result<bool, ProcessError> {
        if matches!(self.queue.front(), Some(Step::Nested(_))) {
            let handlers: Vec<ErrorCall> = inherited.iter().chain(&self.errors).cloned().collect();
            while let Some(Step::Nested(nested)) = self.queue.front_mut() {
                match nested.advance(&handlers) {
                    Ok(true) => return Ok(true),
                    Ok(false) => {
                        self.queue.pop_front();
                    }
                    Err(error) => {
                        self.queue.pop_front();
                        return Err(self.propagate(error));
                    }
                }
            }
        }

        if self.status.is_none() {
            if let Some(Step::Call(call)) = self.queue.pop_front() {
                if self.trace_calls {
                    debug!(chain_id = %self.id, remaining = self.queue.len(), "Processing call");
                }
                let arguments = self.arguments();
                if let Err(error) = call(self, &arguments) {
                    return self.fail(error, inherited);
                }
            }
        }

        if self.status.is_none() {
            if !self.queue.is_empty() {
                return Ok(true);
            }
            self.status = Some(Status::Consumed);
            debug!(chain_id = %self.id, "Chain consumed");
        }
        Ok(self.queue_finalizers())
    }

    /// Step until there is nothing left and return the terminal status.
    pub fn execute(&mut self) -> Result<Status, ProcessError> {
        while self.step()? {}
        Ok(self.status.unwrap_or(Status::Consumed))
    }

    /// Push a chain over `processing`, sharing this chain's arguments, to the front of the queue.
    ///
    /// When several branches are added in one go the last one added runs first.
    pub fn branch(&mut self, processing: &Processing) -> &mut Chain {
        assert!(self.status.is_none(), "chain {} cannot branch once terminated", self.id);
        let branch = Chain::from_calls(processing.calls().iter().cloned(), Arc::clone(&self.arg))
            .trace_calls(self.trace_calls);
        self.push_nested(branch)
    }

    /// Splice another chain's remaining work onto the front of the queue.
    ///
    /// The winged chain keeps its own arguments. Last winged, first run.
    pub fn wing(&mut self, chain: Chain) -> &mut Chain {
        assert!(self.status.is_none(), "chain {} cannot wing once terminated", self.id);
        assert!(chain.status.is_none(), "cannot wing the terminated chain {}", chain.id);
        self.push_nested(chain)
    }

    /// Discard the remaining work and continue with the calls of `processing`.
    pub fn route(&mut self, processing: &Processing) -> &mut Self {
        assert!(self.status.is_none(), "chain {} cannot route once terminated", self.id);
        debug!(chain_id = %self.id, dropped = self.queue.len(), calls = processing.calls().len(), "Routing chain");
        self.queue.clear();
        self.queue.extend(processing.calls().iter().cloned().map(Step::Call));
        self
    }

    /// Stop the chain at the next step boundary. Finalizers still run.
    pub fn cancel(&mut self) {
        if self.status.is_none() {
            debug!(chain_id = %self.id, dropped = self.queue.len(), "Chain canceled");
            self.queue.clear();
            self.status = Some(Status::Canceled);
        }
    }

    /// Register an error handler scoped to this chain.
    pub fn on_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&mut ErrorExecution, &Arguments) -> Result<(), ProcessError> + Send + Sync + 'static,
    {
        assert!(self.status.is_none(), "chain {} cannot be altered once terminated", self.id);
        self.errors.push(Arc::new(handler));
        self
    }

    /// Register a finalizer. Finalizers run once, last registered first.
    pub fn on_finalize<F>(&mut self, finalizer: F) -> &mut Self
    where
        F: Fn(&mut Chain, &Arguments) -> Result<(), ProcessError> + Send + Sync + 'static,
    {
        self.on_finalize_calls([call(finalizer)])
    }

    /// Register every call of `processing` as a finalizer.
    pub fn on_finalize_all(&mut self, processing: &Processing) -> &mut Self {
        self.on_finalize_calls(processing.calls().iter().cloned())
    }

    fn on_finalize_calls(&mut self, calls: impl IntoIterator<Item = Call>) -> &mut Self {
        assert!(self.status.is_none(), "chain {} cannot be altered once terminated", self.id);
        self.finalizers.get_or_insert_with(Vec::new).extend(calls);
        self
    }

    fn push_nested(&mut self, chain: Chain) -> &mut Chain {
        self.queue.push_front(Step::Nested(Box::new(chain)));
        match self.queue.front_mut() {
            Some(Step::Nested(nested)) => nested.as_mut(),
            _ => unreachable!("a nested chain was just pushed to the front"),
        }
    }

    /// Queue the finalizers, reversed, as one nested chain. True when something was queued.
    fn queue_finalizers(&mut self) -> bool {
        let Some(mut finalizers) = self.finalizers.take() else {
            return false;
        };
        if finalizers.is_empty() {
            return false;
        }
        debug!(chain_id = %self.id, finalizers = finalizers.len(), "Started finalization chain");
        finalizers.reverse();
        let chain = Chain::from_calls(finalizers, Arc::clone(&self.arg)).trace_calls(self.trace_calls);
        self.queue.push_front(Step::Nested(Box::new(chain)));
        true
    }

    /// Hand `error` to the error handlers. `Ok(true)` when it was suppressed.
    fn fail(&mut self, error: ProcessError, inherited: &[ErrorCall]) -> Result<bool, ProcessError> {
        self.status = Some(Status::Exception);
        let handlers: Vec<ErrorCall> = inherited.iter().chain(&self.errors).rev().cloned().collect();
        if handlers.is_empty() {
            return Err(self.propagate(error));
        }

        debug!(chain_id = %self.id, %error, handlers = handlers.len(), "Started error chain");
        let mut execution = ErrorExecution::new(self.id, error, handlers, Arc::clone(&self.arg));
        match execution.execute() {
            Ok(()) if execution.is_retrying() => {
                debug!(chain_id = %self.id, "Retrying chain after error");
                self.status = None;
                Ok(true)
            }
            Ok(()) if execution.is_suppressed() => {
                self.queue.clear();
                Ok(true)
            }
            Ok(()) => Err(self.propagate(execution.into_error())),
            Err(handler_error) => {
                warn!(chain_id = %self.id, original = %execution.error(), error = %handler_error, "Error handler failed");
                Err(self.propagate(handler_error))
            }
        }
    }

    /// Terminate on an error nobody suppressed: drop the remaining work and run the finalizers.
    fn propagate(&mut self, error: ProcessError) -> ProcessError {
        self.status.get_or_insert(Status::Exception);
        self.queue.clear();
        if self.queue_finalizers() {
            if let Some(Step::Nested(mut finalization)) = self.queue.pop_front() {
                if let Err(finalizer_error) = finalization.execute() {
                    warn!(chain_id = %self.id, error = %finalizer_error, "Finalizer failed while propagating an error");
                }
            }
        }
        error
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("remaining", &self.queue.len())
            .field("error_handlers", &self.errors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::{Arg, ContextClass, ContextSpec};
    use std::collections::BTreeMap;

    type Log = Arc<Mutex<Vec<String>>>;

    fn record(log: &Log, entry: &'static str) -> Call {
        let log = Arc::clone(log);
        call(move |_, _| {
            log.lock().unwrap().push(entry.to_string());
            Ok(())
        })
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    fn processing(calls: Vec<Call>) -> Processing {
        Processing::new(calls, BTreeMap::new())
    }

    #[test]
    fn runs_calls_in_order() {
        let log = Log::default();
        let p = processing(vec![record(&log, "a"), record(&log, "b"), record(&log, "c")]);
        let mut chain = Chain::new(&p);
        assert!(chain.is_running());
        assert_eq!(chain.execute().unwrap(), Status::Consumed);
        assert_eq!(entries(&log), vec!["a", "b", "c"]);
    }

    #[test]
    fn step_reports_remaining_work() {
        let log = Log::default();
        let p = processing(vec![record(&log, "a"), record(&log, "b")]);
        let mut chain = Chain::new(&p);
        assert!(chain.step().unwrap());
        assert_eq!(entries(&log), vec!["a"]);
        assert!(!chain.step().unwrap());
        assert_eq!(chain.status(), Some(Status::Consumed));
    }

    #[test]
    fn calls_see_arguments_added_earlier() {
        let p = processing(vec![
            call(|chain, _| {
                chain.process(Arguments::new().with("count", Arg::value(3u32)));
                Ok(())
            }),
            call(|chain, args| {
                let count = args.value::<u32>("count")?;
                chain.process(Arguments::new().with("double", Arg::value(count * 2)));
                Ok(())
            }),
        ]);
        let mut chain = Chain::new(&p);
        chain.execute().unwrap();
        assert_eq!(chain.arguments().value::<u32>("double").unwrap(), 6);
    }

    #[test]
    fn branch_shares_arguments_and_runs_first() {
        let log = Log::default();
        let inner = processing(vec![
            record(&log, "branch"),
            call(|chain, _| {
                chain.process(Arguments::new().with("from_branch", Arg::value(true)));
                Ok(())
            }),
        ]);
        let branching = {
            let inner = inner.clone();
            call(move |chain, _| {
                chain.branch(&inner);
                Ok(())
            })
        };
        let p = processing(vec![branching, record(&log, "after")]);
        let mut chain = Chain::new(&p);
        chain.execute().unwrap();
        assert_eq!(entries(&log), vec!["branch", "after"]);
        assert!(chain.arguments().value::<bool>("from_branch").unwrap());
    }

    #[test]
    fn last_wing_runs_first_with_its_own_arguments() {
        let log = Log::default();
        let first = processing(vec![record(&log, "first")]);
        let second = processing(vec![record(&log, "second")]);
        let p = processing(vec![record(&log, "main")]);

        let mut chain = Chain::new(&p);
        chain.wing(Chain::new(&first));
        chain
            .wing(Chain::new(&second))
            .process(Arguments::new().with("private", Arg::value(1u8)));
        chain.execute().unwrap();
        assert_eq!(entries(&log), vec!["second", "first", "main"]);
        assert!(!chain.arguments().contains("private"));
    }

    #[test]
    fn route_replaces_remaining_work() {
        let log = Log::default();
        let escalate = processing(vec![record(&log, "escalated")]);
        let router = {
            let escalate = escalate.clone();
            call(move |chain, _| {
                chain.route(&escalate);
                Ok(())
            })
        };
        let p = processing(vec![router, record(&log, "skipped")]);
        Chain::new(&p).execute().unwrap();
        assert_eq!(entries(&log), vec!["escalated"]);
    }

    #[test]
    fn cancel_skips_later_steps() {
        let log = Log::default();
        let p = processing(vec![
            record(&log, "a"),
            call(|chain, _| {
                chain.cancel();
                Ok(())
            }),
            record(&log, "c"),
        ]);
        let mut chain = Chain::new(&p);
        assert_eq!(chain.execute().unwrap(), Status::Canceled);
        assert_eq!(entries(&log), vec!["a"]);
    }

    #[test]
    fn unhandled_error_propagates_after_finalizers() {
        let log = Log::default();
        let p = processing(vec![
            call(|_, _| Err(ProcessError::failed("boom"))),
            record(&log, "never"),
        ]);
        let mut chain = Chain::new(&p);
        let finalized = Arc::clone(&log);
        chain.on_finalize(move |_, _| {
            finalized.lock().unwrap().push("finalized".into());
            Ok(())
        });
        let err = chain.execute().unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(chain.status(), Some(Status::Exception));
        assert_eq!(entries(&log), vec!["finalized"]);
    }

    #[test]
    fn nested_error_goes_through_parent_handlers() {
        let failing = processing(vec![call(|_, _| Err(ProcessError::failed("inner")))]);
        let p = processing(vec![call(move |chain, _| {
            chain.branch(&failing);
            Ok(())
        })]);
        let seen = Log::default();
        let mut chain = Chain::new(&p);
        let handler_log = Arc::clone(&seen);
        chain.on_error(move |execution, _| {
            handler_log.lock().unwrap().push(execution.error().to_string());
            execution.suppress();
            Ok(())
        });
        // The branch ends in exception; the parent itself never failed.
        assert_eq!(chain.execute().unwrap(), Status::Consumed);
        assert_eq!(entries(&seen), vec!["inner"]);
    }

    #[test]
    fn fill_modes_populate_absent_slots() {
        let invoker = Arc::new(ContextClass::from_spec(
            "Invoker",
            SlotKind::Class,
            &ContextSpec::new("Invoker").defines::<String>("name"),
        ));
        let request = Arc::new(ContextClass::from_spec(
            "request",
            SlotKind::Value,
            &ContextSpec::new("Request").defines::<String>("path"),
        ));
        let mut contexts = BTreeMap::new();
        contexts.insert("Invoker".to_string(), invoker);
        contexts.insert("request".to_string(), request);
        let p = Processing::new(vec![call(|_, _| Ok(()))], contexts);

        let none = Chain::with_fill(&p, Fill::None, Arguments::new());
        assert!(none.arguments().is_empty());

        let classes = Chain::with_fill(&p, Fill::Classes, Arguments::new());
        assert!(classes.arguments().class("Invoker").is_ok());
        assert!(!classes.arguments().contains("request"));

        let all = Chain::with_fill(&p, Fill::All, Arguments::new());
        assert!(all.arguments().class("Invoker").is_ok());
        assert!(all.arguments().context("request").is_ok());
    }

    #[test]
    fn fill_keeps_provided_arguments() {
        let request = Arc::new(ContextClass::from_spec(
            "request",
            SlotKind::Value,
            &ContextSpec::new("Request").defines::<String>("path"),
        ));
        let provided = request.create();
        let mut contexts = BTreeMap::new();
        contexts.insert("request".to_string(), Arc::clone(&request));
        let p = Processing::new(vec![call(|_, _| Ok(()))], contexts);

        let chain = Chain::with_fill(&p, Fill::All, Arguments::new().with("request", provided.clone()));
        assert!(chain.arguments().context("request").unwrap().ptr_eq(&provided));
    }

    #[test]
    #[should_panic(expected = "cannot branch once terminated")]
    fn branching_a_terminated_chain_panics() {
        let p = processing(vec![call(|_, _| Ok(()))]);
        let mut chain = Chain::new(&p);
        chain.execute().unwrap();
        chain.branch(&p);
    }

    #[test]
    #[should_panic(expected = "cannot be altered once terminated")]
    fn registering_finalizer_after_cancel_panics() {
        let p = processing(vec![call(|_, _| Ok(()))]);
        let mut chain = Chain::new(&p);
        chain.cancel();
        chain.on_finalize(|_, _| Ok(()));
    }
}
