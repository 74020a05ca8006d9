//! Exchange registry.
//!
//! Binds each [`ExchangeId`] to a [`SourceFactory`] and builds the source
//! lazily, at most once, the first time it is resolved.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, OnceLock, RwLock};

use tracing::{debug, info};

use crate::adapters::builtin_factory;
use crate::config::ClientConfig;
use crate::data_source::{PerpDataSource, SourceError};
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::ExchangeId;

type Constructor = dyn Fn() -> Arc<dyn PerpDataSource> + Send + Sync;

/// How a source is produced on first use.
///
/// Two factories are the same when they share the same constructor or
/// instance allocation; cloning a factory keeps its identity.
#[derive(Clone)]
pub enum SourceFactory {
    Constructor(Arc<Constructor>),
    Instance(Arc<dyn PerpDataSource>),
}

impl SourceFactory {
    pub fn new<F>(constructor: F) -> Self
    where
        F: Fn() -> Arc<dyn PerpDataSource> + Send + Sync + 'static,
    {
        Self::Constructor(Arc::new(constructor))
    }

    pub fn instance(source: Arc<dyn PerpDataSource>) -> Self {
        Self::Instance(source)
    }

    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Constructor(left), Self::Constructor(right)) => {
                std::ptr::addr_eq(Arc::as_ptr(left), Arc::as_ptr(right))
            }
            (Self::Instance(left), Self::Instance(right)) => {
                std::ptr::addr_eq(Arc::as_ptr(left), Arc::as_ptr(right))
            }
            _ => false,
        }
    }

    fn build(&self) -> Arc<dyn PerpDataSource> {
        match self {
            Self::Constructor(constructor) => constructor(),
            Self::Instance(source) => Arc::clone(source),
        }
    }
}

impl Debug for SourceFactory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Constructor(_) => f.write_str("SourceFactory::Constructor(..)"),
            Self::Instance(source) => write!(f, "SourceFactory::Instance({})", source.id()),
        }
    }
}

#[derive(Clone)]
struct Entry {
    factory: SourceFactory,
    cell: Arc<OnceLock<Arc<dyn PerpDataSource>>>,
}

/// Exchange id to source mapping with lazy, at-most-once construction.
///
/// The registry is shared behind an `Arc` and safe for concurrent
/// registration and resolution.
#[derive(Default)]
pub struct SourceRegistry {
    entries: RwLock<HashMap<ExchangeId, Entry>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four built-in adapters over the reqwest transport.
    pub fn with_builtin_sources(config: &ClientConfig) -> Self {
        let http_client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
        Self::with_http_client(config, http_client)
    }

    /// Registry with the built-in adapters over a caller-provided transport.
    pub fn with_http_client(config: &ClientConfig, http_client: Arc<dyn HttpClient>) -> Self {
        let registry = Self::new();
        for exchange in ExchangeId::ALL {
            let factory = builtin_factory(
                exchange,
                config.exchange(exchange).clone(),
                Arc::clone(&http_client),
            );
            registry
                .register(exchange, factory)
                .expect("each built-in exchange is registered once into a fresh registry");
        }
        registry
    }

    /// Associates `exchange` with `factory`.
    ///
    /// Registering the identical factory again is a no-op; a different factory
    /// for an already registered exchange is a `Registry` error.
    pub fn register(&self, exchange: ExchangeId, factory: SourceFactory) -> Result<(), SourceError> {
        let mut entries = self
            .entries
            .write()
            .expect("source registry lock is not poisoned");

        if let Some(existing) = entries.get(&exchange) {
            if existing.factory.same_as(&factory) {
                debug!(exchange = %exchange, "identical source factory already registered");
                return Ok(());
            }
            return Err(SourceError::registry(format!(
                "a different source is already registered for exchange '{exchange}'"
            ))
            .with_exchange(exchange));
        }

        entries.insert(
            exchange,
            Entry {
                factory,
                cell: Arc::new(OnceLock::new()),
            },
        );
        info!(exchange = %exchange, "registered market data source");
        Ok(())
    }

    pub fn register_instance(
        &self,
        exchange: ExchangeId,
        source: Arc<dyn PerpDataSource>,
    ) -> Result<(), SourceError> {
        self.register(exchange, SourceFactory::instance(source))
    }

    /// Returns the shared source for `exchange`, constructing it on first use.
    pub fn resolve(&self, exchange: ExchangeId) -> Result<Arc<dyn PerpDataSource>, SourceError> {
        let entry = self
            .entries
            .read()
            .expect("source registry lock is not poisoned")
            .get(&exchange)
            .cloned()
            .ok_or_else(|| SourceError::not_registered(exchange))?;

        let source = entry.cell.get_or_init(|| {
            debug!(exchange = %exchange, "constructing market data source");
            entry.factory.build()
        });
        Ok(Arc::clone(source))
    }

    pub fn is_registered(&self, exchange: ExchangeId) -> bool {
        self.entries
            .read()
            .expect("source registry lock is not poisoned")
            .contains_key(&exchange)
    }

    /// Registered exchanges in stable order.
    pub fn registered(&self) -> Vec<ExchangeId> {
        let mut exchanges = self
            .entries
            .read()
            .expect("source registry lock is not poisoned")
            .keys()
            .copied()
            .collect::<Vec<_>>();
        exchanges.sort();
        exchanges
    }
}

impl Debug for SourceRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("registered", &self.registered())
            .finish()
    }
}
