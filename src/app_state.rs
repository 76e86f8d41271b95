use sqlx::PgPool;
use std::{sync::Arc, time::Duration};

use crate::{
    services::{
        AlchemyClient, BackfillQueue, BackfillRunner, PgPriceStore, PriceOracle, PriceResolver,
        PriceSourceAdapter, PriceStore,
    },
    utils::{
        cache::{MokaPriceCache, PriceCache},
        env::{BackfillSettings, EnvVars, ResolverSettings},
        retry::RetryPolicy,
    },
};

pub struct AppState {
    pub store: Arc<dyn PriceStore>,
    pub source: Arc<PriceSourceAdapter>,
    pub resolver: PriceResolver,
    pub backfill: Arc<BackfillQueue>,
    pub db_pool: Option<PgPool>,
}

impl AppState {
    /// Initialize the application state with database connection and migrations
    pub async fn new(env_vars: &EnvVars) -> Result<AppState, Box<dyn std::error::Error>> {
        // Database connection
        log::info!("Connecting to database...");
        let db_pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&env_vars.database_url)
            .await?;

        log::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&db_pool).await?;

        log::info!("Database connection established successfully");

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(env_vars.source_request_timeout_seconds))
            .build()?;

        // Custom base URLs are used when testing against a mock server
        if let Some(rpc_base_url) = &env_vars.alchemy_rpc_base_url {
            log::info!("Using custom Alchemy RPC base URL: {}", rpc_base_url);
        }
        let oracle = AlchemyClient::with_base_urls(
            http_client,
            env_vars.alchemy_api_key.clone(),
            env_vars.alchemy_prices_base_url.clone(),
            env_vars.alchemy_rpc_base_url.clone(),
        );

        let mut state = Self::from_parts(
            Arc::new(PgPriceStore::new(db_pool.clone())),
            Arc::new(MokaPriceCache::new(env_vars.price_cache_max_capacity)),
            Arc::new(oracle),
            env_vars.source_retry_policy(),
            env_vars.resolver_settings(),
            env_vars.backfill_settings(),
        );
        state.db_pool = Some(db_pool);

        Ok(state)
    }

    /// Wire the services together from already constructed collaborators.
    ///
    /// Spawns the backfill dispatcher, so it must be called inside a Tokio runtime.
    pub fn from_parts(
        store: Arc<dyn PriceStore>,
        cache: Arc<dyn PriceCache>,
        oracle: Arc<dyn PriceOracle>,
        source_retry: RetryPolicy,
        resolver_settings: ResolverSettings,
        backfill_settings: BackfillSettings,
    ) -> AppState {
        let source = Arc::new(PriceSourceAdapter::new(oracle, source_retry));
        log::info!(
            "Price source: {} ({} attempts per call)",
            source.source_name(),
            source_retry.max_attempts
        );

        let resolver = PriceResolver::new(
            cache,
            store.clone(),
            source.clone(),
            resolver_settings,
        );
        let runner = Arc::new(BackfillRunner::new(
            source.clone(),
            store.clone(),
            &backfill_settings,
        ));
        let backfill = BackfillQueue::start(runner, &backfill_settings);

        AppState {
            store,
            source,
            resolver,
            backfill,
            db_pool: None,
        }
    }

    /// Stop the backfill queue, wait for running jobs and close the database pool
    pub async fn close(&self) {
        self.backfill.close().await;
        if let Some(pool) = &self.db_pool {
            pool.close().await;
        }
        log::info!("Application state closed");
    }
}
