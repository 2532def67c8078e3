// ── Session context ──
//
// The one object that owns a session's credential store, token manager,
// request gateway and push channel. Everything that needs any of them is
// handed this context (or a clone of the piece it needs).

use std::sync::Arc;

use secrecy::SecretString;
use techtrax_api::ApiClient;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::credentials::CredentialStore;
use crate::error::CoreError;
use crate::gateway::RequestGateway;
use crate::model::Session;
use crate::queue::QueueSyncEngine;
use crate::realtime::RealtimeConnection;
use crate::token::TokenLifecycleManager;

pub struct SessionContext {
    config: SessionConfig,
    tokens: TokenLifecycleManager,
    gateway: RequestGateway,
    channel: Mutex<Option<RealtimeConnection>>,
}

impl SessionContext {
    /// Build a context for `config`, resuming any pair already in `store`.
    pub fn new(config: SessionConfig, store: Arc<dyn CredentialStore>) -> Result<Self, CoreError> {
        let client = ApiClient::new(config.url.clone(), &config.transport())?;
        Self::with_client(config, Arc::new(client), store)
    }

    /// Same as [`new`](Self::new) with a prebuilt client.
    pub fn with_client(
        config: SessionConfig,
        client: Arc<ApiClient>,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, CoreError> {
        let tokens = TokenLifecycleManager::new(client, store, config.refresh_window)?;
        let gateway = RequestGateway::new(tokens.clone());
        Ok(Self {
            config,
            tokens,
            gateway,
            channel: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn tokens(&self) -> &TokenLifecycleManager {
        &self.tokens
    }

    pub fn gateway(&self) -> &RequestGateway {
        &self.gateway
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.is_authenticated()
    }

    /// Who the stored access token belongs to, from its claims alone.
    pub fn current_session(&self) -> Option<Session> {
        self.tokens
            .claims()
            .map(|claims| Session::from_parts(None, Some(&claims)))
    }

    // ── Login / logout ───────────────────────────────────────────────

    /// Exchange credentials for a token pair and store it.
    pub async fn login(&self, email: &str, password: &SecretString) -> Result<Session, CoreError> {
        let pair = self.tokens.client().login(email, password).await?;
        let claims = pair.access_claims().ok();
        self.tokens.set_tokens(pair)?;

        let session = Session::from_parts(None, claims.as_ref());
        info!(user = %session.display_name, "logged in");
        Ok(session)
    }

    /// Close the channel and forget every stored credential.
    pub async fn logout(&self) -> Result<(), CoreError> {
        if let Some(channel) = self.channel.lock().await.take() {
            channel.close().await;
        }
        self.tokens.clear()?;
        info!("logged out");
        Ok(())
    }

    // ── Push channel ─────────────────────────────────────────────────

    /// The session's channel, opening it on first use. A channel that
    /// has ended is replaced.
    pub async fn open_channel(&self) -> Result<RealtimeConnection, CoreError> {
        let mut slot = self.channel.lock().await;
        if let Some(existing) = slot.as_ref() {
            if existing.ended().borrow().is_none() {
                return Ok(existing.clone());
            }
            warn!("previous channel ended, opening a new one");
        }

        let channel = RealtimeConnection::new(self.tokens.clone(), &self.config)?;
        channel.open().await?;
        *slot = Some(channel.clone());
        Ok(channel)
    }

    /// The open channel, if any.
    pub async fn channel(&self) -> Option<RealtimeConnection> {
        self.channel.lock().await.clone()
    }

    /// A queue engine backed by this session's gateway.
    pub fn queue_engine(&self) -> QueueSyncEngine<RequestGateway> {
        QueueSyncEngine::new(self.gateway.clone())
    }
}
