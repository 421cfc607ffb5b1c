//! Embedded provider frame client
//!
//! The provider page is mounted once as a hidden frame and answers JSON-RPC
//! requests. The frame is shown while a request may need the user and hidden
//! again when the response arrives.

use crate::{
    config::BridgeConfig,
    correlator::{await_event, with_timeout, RequestOptions, RpcCorrelator},
    error::{BridgeError, Result},
    host::Host,
    lifecycle::FrameManager,
    origin::{origin_of, MessageGate},
};
use idbridge_auth::{AuthClient, AuthClientOptions, DelegationOptions, DelegationType, Identity};
use idbridge_common::{
    CanisterCallRequest, DelegationResult, FrameSignal, FtTransferRequest, NftTransferRequest,
    RpcMethod,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

pub struct EmbedClient {
    frames: FrameManager,
    correlator: RpcCorrelator,
    origin: String,
    auth: Mutex<AuthClient>,
    config: BridgeConfig,
}

impl std::fmt::Debug for EmbedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbedClient")
            .field("origin", &self.origin)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EmbedClient {
    /// Mount the provider frame, wait for it to signal readiness and restore
    /// the auth session.
    ///
    /// Fails with [`BridgeError::RequestTimedOut`] when the frame stays silent
    /// past `timeouts.embed_ready`; the frame is unmounted in that case.
    pub async fn init(
        host: Arc<dyn Host>,
        config: BridgeConfig,
        auth_options: AuthClientOptions,
    ) -> Result<Self> {
        let url = config.provider.embed_url.clone();
        let origin = origin_of(&url)?;
        let frames = FrameManager::new(host.clone());

        let mut listener = host.bus().listen();
        frames.mount(&url, config.frame.style.clone())?;
        let gate = match frames.surface() {
            Some(surface) => MessageGate::new(origin.clone()).with_source(surface.context()),
            None => MessageGate::new(origin.clone()),
        };

        let ready = with_timeout(
            Some(config.timeouts.embed_ready),
            await_event(&mut listener, &gate, |data| {
                FrameSignal::is_ready(data).then_some(())
            }),
        )
        .await;
        drop(listener);
        if let Err(e) = ready {
            warn!(url = %url, error = %e, "Provider frame did not become ready");
            frames.unmount();
            return Err(e);
        }
        info!(url = %url, "Provider frame ready");

        let auth = match AuthClient::create(auth_options).await {
            Ok(auth) => auth,
            Err(e) => {
                frames.unmount();
                return Err(e.into());
            }
        };

        Ok(Self {
            frames,
            correlator: RpcCorrelator::new(host.bus(), gate),
            origin,
            auth: Mutex::new(auth),
            config,
        })
    }

    /// Ask the provider for a delegation to the session key and log in with
    /// it
    #[instrument(skip(self, options))]
    pub async fn get_delegation(&self, options: DelegationOptions) -> Result<Identity> {
        let options = self.with_derivation_origin(options);
        let mut auth = self.auth.lock().await;
        let request = auth.delegation_request(&options);

        let result = self
            .call_visible(RpcMethod::GetDelegation, vec![serde_json::to_value(request)?])
            .await?;
        let result: DelegationResult = serde_json::from_value(result)?;
        Ok(auth.complete_login(result).await?)
    }

    /// Renew the current global delegation without user interaction.
    ///
    /// Refused for anonymous delegations. An expired or unverifiable current
    /// delegation logs the client out and fails with
    /// [`BridgeError::InvalidDelegationChain`].
    #[instrument(skip(self, options))]
    pub async fn update_global_delegation(&self, options: DelegationOptions) -> Result<Identity> {
        let options = self.with_derivation_origin(options);
        let mut auth = self.auth.lock().await;
        ensure_global(auth.delegation_type(), "renew a delegation")?;
        auth.ensure_renewable().await?;

        let request = auth.delegation_request(&options);
        let result = self
            .correlator
            .call(
                &*self.frame()?,
                &self.origin,
                RpcMethod::RenewDelegation,
                vec![serde_json::to_value(request)?],
                self.request_options(),
            )
            .await?;
        let result: DelegationResult = serde_json::from_value(result)?;
        Ok(auth.complete_login(result).await?)
    }

    /// Ask the user to approve a fungible-token transfer
    #[instrument(skip(self, request), fields(receiver = %request.receiver))]
    pub async fn request_transfer_ft(&self, mut request: FtTransferRequest) -> Result<Value> {
        self.ensure_global("request a transfer").await?;
        if request.derivation_origin.is_none() {
            request.derivation_origin = self.config.provider.derivation_origin.clone();
        }
        self.call_with(RpcMethod::RequestTransfer, &request).await
    }

    /// Ask the user to approve a non-fungible-token transfer
    #[instrument(skip(self, request), fields(receiver = %request.receiver))]
    pub async fn request_transfer_nft(&self, mut request: NftTransferRequest) -> Result<Value> {
        self.ensure_global("request a transfer").await?;
        if request.derivation_origin.is_none() {
            request.derivation_origin = self.config.provider.derivation_origin.clone();
        }
        self.call_with(RpcMethod::RequestTransfer, &request).await
    }

    /// Ask the user to approve a call to a third-party canister
    #[instrument(skip(self, request), fields(canister = %request.canister_id))]
    pub async fn request_canister_call(&self, mut request: CanisterCallRequest) -> Result<Value> {
        self.ensure_global("call a canister").await?;
        if request.derivation_origin.is_none() {
            request.derivation_origin = self.config.provider.derivation_origin.clone();
        }
        self.call_with(RpcMethod::CanisterCall, &request).await
    }

    pub async fn logout(&self) -> Result<()> {
        self.auth.lock().await.logout().await?;
        info!("Logged out");
        Ok(())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.auth.lock().await.is_authenticated()
    }

    pub async fn identity(&self) -> Identity {
        self.auth.lock().await.identity().clone()
    }

    pub async fn delegation_type(&self) -> DelegationType {
        self.auth.lock().await.delegation_type()
    }

    pub fn frames(&self) -> &FrameManager {
        &self.frames
    }

    /// Remove the provider frame. Later requests fail with
    /// [`BridgeError::SurfaceUnavailable`].
    pub fn destroy(&self) {
        self.frames.unmount();
    }

    async fn ensure_global(&self, action: &str) -> Result<()> {
        ensure_global(self.auth.lock().await.delegation_type(), action)
    }

    async fn call_with<T: Serialize>(&self, method: RpcMethod, request: &T) -> Result<Value> {
        self.call_visible(method, vec![serde_json::to_value(request)?])
            .await
    }

    /// Show the frame for the duration of one call
    async fn call_visible(&self, method: RpcMethod, params: Vec<Value>) -> Result<Value> {
        let frame = self.frame()?;
        self.frames.show()?;
        let result = self
            .correlator
            .call(&*frame, &self.origin, method, params, self.request_options())
            .await;
        if let Err(e) = self.frames.hide() {
            debug!(error = %e, "Frame gone before it could be hidden");
        }
        result
    }

    fn frame(&self) -> Result<Arc<dyn crate::host::FrameSurface>> {
        self.frames.surface().ok_or_else(|| {
            BridgeError::SurfaceUnavailable("Provider frame is not mounted".to_string())
        })
    }

    fn request_options(&self) -> RequestOptions {
        RequestOptions {
            timeout: self.config.timeouts.request,
        }
    }

    fn with_derivation_origin(&self, mut options: DelegationOptions) -> DelegationOptions {
        if options.derivation_origin.is_none() {
            options.derivation_origin = self.config.provider.derivation_origin.clone();
        }
        options
    }
}

fn ensure_global(delegation_type: DelegationType, action: &str) -> Result<()> {
    match delegation_type {
        DelegationType::Global => Ok(()),
        DelegationType::Anonymous => Err(BridgeError::NotPermitted(format!(
            "Cannot {} with an anonymous delegation",
            action
        ))),
    }
}
