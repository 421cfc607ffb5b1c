//! Legacy popup flows
//!
//! Client operations open the provider in a popup window, wait for its
//! `Ready`, send one request and resolve with the response. Provider
//! registrations serve the other end of the same exchanges.

use crate::{
    client::{run_legacy_flow, FlowTarget, LegacyExchange},
    config::{BridgeConfig, ProviderConf},
    error::{BridgeError, Result},
    host::{Host, ProviderContext},
    lifecycle::LifecycleManager,
    origin::persona_domain,
    provider::serve_once,
};
use idbridge_common::{
    AccountsResult, ClientEvent, CredentialResult, ProviderEvent, TransferParams, TransferResult,
    INTERNAL_ERROR,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, instrument};

struct PhoneNumberCredential {
    hostname: String,
}

impl LegacyExchange for PhoneNumberCredential {
    type Output = Option<CredentialResult>;

    fn request(&self) -> ClientEvent {
        ClientEvent::RequestPhoneNumberCredential {
            hostname: self.hostname.clone(),
        }
    }

    fn accept(&self, event: ProviderEvent) -> Option<Result<Self::Output>> {
        match event {
            ProviderEvent::PhoneNumberCredentialResponse {
                error: Some(message),
                ..
            } => Some(Err(BridgeError::ProtocolError {
                code: INTERNAL_ERROR,
                message,
                data: None,
            })),
            ProviderEvent::PhoneNumberCredentialResponse { result, .. } => Some(Ok(result)),
            _ => None,
        }
    }
}

struct Transfer {
    params: TransferParams,
}

impl LegacyExchange for Transfer {
    type Output = TransferResult;

    fn request(&self) -> ClientEvent {
        ClientEvent::RequestTransfer {
            params: self.params.clone(),
        }
    }

    fn accept(&self, event: ProviderEvent) -> Option<Result<Self::Output>> {
        match event {
            ProviderEvent::RequestTransferResponse { result } => Some(Ok(result)),
            _ => None,
        }
    }
}

struct Accounts;

impl LegacyExchange for Accounts {
    type Output = AccountsResult;

    fn request(&self) -> ClientEvent {
        ClientEvent::RequestAccounts
    }

    fn accept(&self, event: ProviderEvent) -> Option<Result<Self::Output>> {
        match event {
            ProviderEvent::RequestAccountsResponse { result } => Some(Ok(result)),
            _ => None,
        }
    }
}

/// Application side of the popup flows
///
/// Holds a single provider window slot: starting a flow while another is in
/// flight closes the first one's window.
pub struct BridgeClient {
    host: Arc<dyn Host>,
    lifecycle: LifecycleManager,
    config: BridgeConfig,
}

impl BridgeClient {
    pub fn new(host: Arc<dyn Host>, config: BridgeConfig) -> Self {
        let lifecycle = LifecycleManager::new(host.clone())
            .with_window_name(config.window.name.clone())
            .with_interruption_interval(config.window.interruption_check_interval);
        Self {
            host,
            lifecycle,
            config,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Ask the provider for a verified phone-number credential.
    ///
    /// Resolves to `None` when the user has no verified number. Closing the
    /// window fails the flow with [`BridgeError::UserInterrupted`].
    #[instrument(skip(self, conf))]
    pub async fn request_phone_number_credential(
        &self,
        conf: Option<ProviderConf>,
    ) -> Result<Option<CredentialResult>> {
        let conf = conf.unwrap_or_default();
        let hostname = persona_domain(&self.host.origin())?;
        let exchange = PhoneNumberCredential { hostname };
        let target = self.target(&self.config.provider.credential_url, &conf);

        run_legacy_flow(self.host.as_ref(), &self.lifecycle, target, exchange).await
    }

    /// Ask the user to approve a transfer.
    ///
    /// Closing the window resolves to an error-status result rather than
    /// failing.
    #[instrument(skip(self, params, conf), fields(to = %params.to))]
    pub async fn request_transfer(
        &self,
        params: TransferParams,
        conf: Option<ProviderConf>,
    ) -> Result<TransferResult> {
        let conf = conf.unwrap_or_default();
        let target = self.target(&self.config.provider.wallet_url, &conf);

        match run_legacy_flow(self.host.as_ref(), &self.lifecycle, target, Transfer { params }).await
        {
            Err(BridgeError::UserInterrupted) => {
                info!("Transfer window closed by user");
                Ok(TransferResult::terminated_by_user())
            }
            other => other,
        }
    }

    /// Ask the user to share their accounts. Interruption behaves as for
    /// [`BridgeClient::request_transfer`].
    #[instrument(skip(self, conf))]
    pub async fn request_accounts(&self, conf: Option<ProviderConf>) -> Result<AccountsResult> {
        let conf = conf.unwrap_or_default();
        let target = self.target(&self.config.provider.wallet_url, &conf);

        match run_legacy_flow(self.host.as_ref(), &self.lifecycle, target, Accounts).await {
            Err(BridgeError::UserInterrupted) => {
                info!("Accounts window closed by user");
                Ok(AccountsResult::terminated_by_user())
            }
            other => other,
        }
    }

    /// Close the provider window, if one is open
    pub fn close(&self) {
        self.lifecycle.close();
    }

    pub fn is_window_open(&self) -> bool {
        self.lifecycle.is_open()
    }

    fn target<'a>(&'a self, default_url: &'a str, conf: &'a ProviderConf) -> FlowTarget<'a> {
        FlowTarget {
            url: conf.provider.as_deref().unwrap_or(default_url),
            features: conf
                .window_features
                .as_ref()
                .or(self.config.window.features.as_ref()),
            timeout: conf.timeout.or(self.config.timeouts.request),
        }
    }
}

/// Serve one phone-number credential request. `handler` receives the
/// requesting persona domain; the domain is returned once answered.
pub async fn register_phone_number_credential_handler<H, Fut>(
    ctx: &dyn ProviderContext,
    handler: H,
) -> Result<String>
where
    H: FnOnce(String) -> Fut,
    Fut: Future<Output = anyhow::Result<Option<CredentialResult>>>,
{
    serve_once(
        ctx,
        |event| match event {
            ClientEvent::RequestPhoneNumberCredential { hostname } => Some(hostname),
            _ => None,
        },
        handler,
        |outcome| match outcome {
            Ok(result) => ProviderEvent::PhoneNumberCredentialResponse {
                result,
                error: None,
            },
            Err(message) => ProviderEvent::PhoneNumberCredentialResponse {
                result: None,
                error: Some(message),
            },
        },
    )
    .await
}

/// Serve one transfer request and return its parameters
pub async fn register_request_transfer_handler<H, Fut>(
    ctx: &dyn ProviderContext,
    handler: H,
) -> Result<TransferParams>
where
    H: FnOnce(TransferParams) -> Fut,
    Fut: Future<Output = anyhow::Result<TransferResult>>,
{
    serve_once(
        ctx,
        |event| match event {
            ClientEvent::RequestTransfer { params } => Some(params),
            _ => None,
        },
        handler,
        |outcome| ProviderEvent::RequestTransferResponse {
            result: outcome.unwrap_or_else(|message| TransferResult::Error { message }),
        },
    )
    .await
}

/// Serve one account-list request
pub async fn register_request_accounts_handler<H, Fut>(
    ctx: &dyn ProviderContext,
    handler: H,
) -> Result<()>
where
    H: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<AccountsResult>>,
{
    serve_once(
        ctx,
        |event| matches!(event, ClientEvent::RequestAccounts).then_some(()),
        |()| handler(),
        |outcome| ProviderEvent::RequestAccountsResponse {
            result: outcome.unwrap_or_else(|message| AccountsResult::Error { message }),
        },
    )
    .await
}
