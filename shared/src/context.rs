use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::watch;

use crate::capabilities::{HttpTransport, LocalStore, MemoryStore};
use crate::config::AppConfig;
use crate::route::{watch_route, RouteWatch};
use crate::session::{
    BroadcastHub, FixtureAuthority, SessionAuthority, SessionChannel, SessionManager,
};
use crate::store::{PageResponse, StoreRegistry, TablePageOptions, TablePageStore, UserStore};
use crate::transport::{ApiClient, RefreshCoordinator, TokenStore};
use crate::AppResult;

/// Everything one tab shares: constructed once and injected where needed.
#[derive(Debug)]
pub struct AppContext {
    config: AppConfig,
    api: Arc<ApiClient>,
    stores: StoreRegistry,
    users: Arc<UserStore>,
    session: SessionManager,
}

impl AppContext {
    pub fn builder(config: AppConfig) -> AppContextBuilder {
        AppContextBuilder::new(config)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    pub fn stores(&self) -> &StoreRegistry {
        &self.stores
    }

    pub fn users(&self) -> &Arc<UserStore> {
        &self.users
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn page_store<R>(&self, options: TablePageOptions) -> AppResult<Arc<TablePageStore<R>>>
    where
        R: Clone + Send + Sync + 'static,
    {
        self.stores.page_store(options)
    }

    /// Fetches the page the store currently points at and caches its rows.
    pub async fn fetch_page<R>(&self, store: &TablePageStore<R>, path: &str) -> AppResult<()>
    where
        R: Clone + Send + Sync + DeserializeOwned + 'static,
    {
        let params = store.page_request().query_pairs();
        let page: PageResponse<R> = self.api.get(path, params.as_slice()).await?;
        store.apply_page(page);
        Ok(())
    }

    /// Resets `store` whenever the route leaves `scope`.
    pub fn reset_on_leave<R>(
        &self,
        route: watch::Receiver<String>,
        scope: impl Into<String>,
        store: Arc<TablePageStore<R>>,
    ) -> RouteWatch
    where
        R: Clone + Send + Sync + 'static,
    {
        watch_route(route, scope, move || {
            store.reset();
        })
    }
}

pub struct AppContextBuilder {
    config: AppConfig,
    local: Option<Arc<dyn LocalStore>>,
    tab_local: Option<Arc<dyn LocalStore>>,
    transport: Option<Arc<dyn HttpTransport>>,
    authority: Option<Arc<dyn SessionAuthority>>,
    channel: Option<Arc<dyn SessionChannel>>,
}

impl AppContextBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            local: None,
            tab_local: None,
            transport: None,
            authority: None,
            channel: None,
        }
    }

    /// Durable store shared by all tabs: page state, tokens, user.
    #[must_use]
    pub fn with_local_store(mut self, local: Arc<dyn LocalStore>) -> Self {
        self.local = Some(local);
        self
    }

    /// Per-tab store holding the session id. Defaults to a fresh memory store.
    #[must_use]
    pub fn with_tab_store(mut self, local: Arc<dyn LocalStore>) -> Self {
        self.tab_local = Some(local);
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn with_authority(mut self, authority: Arc<dyn SessionAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    #[must_use]
    pub fn with_channel(mut self, channel: Arc<dyn SessionChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Joins `hub` on the configured session channel name.
    #[must_use]
    pub fn with_hub(mut self, hub: &BroadcastHub) -> Self {
        let channel = hub.connect(&self.config.session.channel_name);
        self.channel = Some(Arc::new(channel));
        self
    }

    pub fn build(self) -> AppResult<AppContext> {
        self.config.validate()?;

        let local = self
            .local
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn LocalStore>);
        let tab_local = self
            .tab_local
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn LocalStore>);
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };
        let authority = self
            .authority
            .unwrap_or_else(|| Arc::new(FixtureAuthority::default()) as Arc<dyn SessionAuthority>);

        let tokens = Arc::new(TokenStore::new(Arc::clone(&local))?);
        let api = Arc::new(ApiClient::new(
            self.config.api.clone(),
            transport,
            tokens,
            Arc::new(RefreshCoordinator::new()),
        )?);
        let users = Arc::new(UserStore::new(Arc::clone(&local))?);
        let session = SessionManager::new(
            &self.config.session,
            tab_local,
            Arc::clone(&users),
            authority,
            self.channel,
        )?;
        let stores = StoreRegistry::new(local, self.config.table.page_size);

        tracing::info!(base_url = %self.config.api.base_url, "app context ready");

        Ok(AppContext {
            config: self.config,
            api,
            stores,
            users,
            session,
        })
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn default_transport() -> AppResult<Arc<dyn HttpTransport>> {
    let transport = crate::capabilities::ReqwestTransport::new()?;
    Ok(Arc::new(transport))
}

#[cfg(target_arch = "wasm32")]
fn default_transport() -> AppResult<Arc<dyn HttpTransport>> {
    Err(crate::AppError::new(
        crate::ErrorKind::FeatureUnavailable,
        "no HTTP transport configured",
    ))
}
