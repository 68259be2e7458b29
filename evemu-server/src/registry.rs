//! Per-service table of remotely callable methods.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use evemu_core::{CallError, DecodeError, FromArgs, IntoWire, WireValue};
use indexmap::IndexMap;
use tracing::error;

use crate::service::CallRequest;

/// Failure produced inside a registered handler, before the dispatcher has
/// attached service context to it.
#[derive(Debug)]
pub enum HandlerError {
    Decode(DecodeError),
    Fault(anyhow::Error),
}

pub type Handler<S> =
    Box<dyn Fn(&S, &CallRequest<'_>) -> Result<WireValue, HandlerError> + Send + Sync>;

/// Method name to handler mapping, filled in once while the owning service
/// is constructed and read-only afterwards.
pub struct CallRegistry<S> {
    service: &'static str,
    handlers: IndexMap<&'static str, Handler<S>>,
}

impl<S: 'static> CallRegistry<S> {
    pub fn new(service: &'static str) -> Self {
        Self {
            service,
            handlers: IndexMap::new(),
        }
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    /// Register a typed handler. Arguments are decoded with `A` before the
    /// handler runs and its result is converted with [`IntoWire`].
    ///
    /// # Panics
    ///
    /// Registering the same method name twice is a programming error.
    pub fn register<A, R, F>(&mut self, method: &'static str, handler: F) -> &mut Self
    where
        A: FromArgs + 'static,
        R: IntoWire + 'static,
        F: Fn(&S, &CallRequest<'_>, A) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.insert(
            method,
            Box::new(move |target: &S, call: &CallRequest<'_>| {
                let args = A::from_args(call.args).map_err(HandlerError::Decode)?;
                handler(target, call, args)
                    .map(IntoWire::into_wire)
                    .map_err(HandlerError::Fault)
            }),
        )
    }

    /// Register a handler that receives the undecoded argument tuple.
    pub fn register_raw<F>(&mut self, method: &'static str, handler: F) -> &mut Self
    where
        F: Fn(&S, &CallRequest<'_>) -> anyhow::Result<WireValue> + Send + Sync + 'static,
    {
        self.insert(
            method,
            Box::new(move |target: &S, call: &CallRequest<'_>| {
                handler(target, call).map_err(HandlerError::Fault)
            }),
        )
    }

    fn insert(&mut self, method: &'static str, handler: Handler<S>) -> &mut Self {
        assert!(
            !self.handlers.contains_key(method),
            "handler {}::{} registered twice",
            self.service,
            method
        );
        self.handlers.insert(method, handler);
        self
    }

    pub fn lookup(&self, method: &str) -> Option<&Handler<S>> {
        self.handlers.get(method)
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    pub fn methods(&self) -> Vec<&str> {
        self.handlers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Look up and run the handler for `call.method` against `target`.
    ///
    /// Decode failures come back verbatim. Any other failure, including a
    /// panic inside the handler, becomes [`CallError::HandlerFault`] unless
    /// the handler itself returned a [`CallError`].
    pub fn invoke(&self, target: &S, call: &CallRequest<'_>) -> Result<WireValue, CallError> {
        let handler = self
            .lookup(call.method)
            .ok_or_else(|| CallError::method_not_found(self.service, call.method))?;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(target, call)));

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(HandlerError::Decode(err))) => {
                error!(
                    target: "evemu::service",
                    "{}: {}::{} failed to decode arguments: {}",
                    call.client.name, self.service, call.method, err
                );
                Err(CallError::Decode(err))
            }
            Ok(Err(HandlerError::Fault(err))) => match err.downcast::<CallError>() {
                Ok(call_error) => Err(call_error),
                Err(err) => {
                    error!(
                        target: "evemu::service",
                        "{}: {}::{} raised: {:#}",
                        call.client.name, self.service, call.method, err
                    );
                    Err(CallError::handler_fault(
                        self.service,
                        call.method,
                        format!("{:#}", err),
                    ))
                }
            },
            Err(payload) => {
                let cause = panic_message(payload.as_ref());
                error!(
                    target: "evemu::service",
                    "{}: {}::{} panicked: {}",
                    call.client.name, self.service, call.method, cause
                );
                Err(CallError::handler_fault(
                    self.service,
                    call.method,
                    format!("handler panicked: {}", cause),
                ))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl<S> fmt::Debug for CallRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallRegistry")
            .field("service", &self.service)
            .field("methods", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
