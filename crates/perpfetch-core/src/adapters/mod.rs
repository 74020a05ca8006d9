mod binance;
mod bitget;
mod bybit;
pub(crate) mod common;
mod okx;

use std::sync::Arc;

pub use binance::BinanceAdapter;
pub use bitget::BitgetAdapter;
pub use bybit::BybitAdapter;
pub use okx::OkxAdapter;

use crate::config::ExchangeSettings;
use crate::data_source::PerpDataSource;
use crate::http_client::HttpClient;
use crate::registry::SourceFactory;
use crate::ExchangeId;

/// Factory for the built-in adapter of `exchange`. The adapter is built on
/// first resolution, so its throttle and breaker live as long as the registry.
pub fn builtin_factory(
    exchange: ExchangeId,
    settings: ExchangeSettings,
    http_client: Arc<dyn HttpClient>,
) -> SourceFactory {
    SourceFactory::new(move || -> Arc<dyn PerpDataSource> {
        let settings = settings.clone();
        let http_client = Arc::clone(&http_client);
        match exchange {
            ExchangeId::Binance => Arc::new(BinanceAdapter::new(settings, http_client)),
            ExchangeId::Okx => Arc::new(OkxAdapter::new(settings, http_client)),
            ExchangeId::Bybit => Arc::new(BybitAdapter::new(settings, http_client)),
            ExchangeId::Bitget => Arc::new(BitgetAdapter::new(settings, http_client)),
        }
    })
}
