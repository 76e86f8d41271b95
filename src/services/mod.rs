//! Price resolution and historical backfill

pub mod alchemy;
pub mod backfill;
pub mod interpolation;
pub mod price_provider;
pub mod price_resolver;
pub mod price_source;
pub mod price_store;
pub mod types;

pub use alchemy::AlchemyClient;
pub use backfill::{BackfillQueue, BackfillRunner};
pub use price_provider::{OracleError, PriceOracle};
pub use price_resolver::{PriceResolver, ResolveError};
pub use price_source::PriceSourceAdapter;
pub use price_store::{PgPriceStore, PriceStore, SampleOrigin, StoreError};
pub use types::{Network, PriceQuery, PriceResult, PriceSample, PriceSource, TokenAddress};
