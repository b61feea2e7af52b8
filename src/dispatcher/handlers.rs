//! Command Handler Registry
//!
//! Maps handler names carried by `Execute` commands to async closures, so
//! application code can answer requests without touching the dispatcher.

use anyhow::Result;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// What a handler gets to see of an incoming `Execute` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Runtime name of the caller.
    pub sender: String,
    pub payload: Vec<u8>,
}

/// Type-erased async handler: takes an [`Invocation`], resolves to the reply payload.
pub type CommandHandlerFn = Arc<
    dyn Fn(Invocation) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send>> + Send + Sync,
>;

#[derive(Default)]
pub struct CommandHandlerRegistry {
    handlers: DashMap<String, CommandHandlerFn>,
}

impl CommandHandlerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `handler` under `handler_name`, replacing any previous one.
    pub fn register<F, Fut>(&self, handler_name: &str, handler: F)
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>>> + Send + 'static,
    {
        // Box::pin erases the concrete future type so any async fn fits the map.
        let handler_fn: CommandHandlerFn = Arc::new(move |invocation: Invocation| {
            Box::pin(handler(invocation)) as Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send>>
        });

        self.handlers.insert(handler_name.to_string(), handler_fn);

        tracing::info!("Registered command handler: {}", handler_name);
    }

    pub fn deregister(&self, handler_name: &str) -> bool {
        self.handlers.remove(handler_name).is_some()
    }

    /// Runs the handler registered under `handler_name`.
    ///
    /// Fails if the handler fails or no handler exists for the name.
    pub async fn execute(&self, handler_name: &str, invocation: Invocation) -> Result<Vec<u8>> {
        let handler_fn = self
            .handlers
            .get(handler_name)
            .map(|entry| entry.value().clone());

        match handler_fn {
            Some(handler_fn) => {
                tracing::debug!(
                    "Executing handler '{}' for {} (payload size: {} bytes)",
                    handler_name,
                    invocation.sender,
                    invocation.payload.len()
                );
                handler_fn(invocation).await
            }
            None => {
                let error = format!("Unknown command handler: {}", handler_name);
                tracing::error!("{}", error);
                Err(anyhow::anyhow!(error))
            }
        }
    }

    pub fn list_handlers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn has_handler(&self, handler_name: &str) -> bool {
        self.handlers.contains_key(handler_name)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}
