//! CLI command implementations
//!
//! The demo wires an application and a provider together over the loopback
//! host and runs every flow end to end.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use idbridge_auth::{
    verify_phone_number_credential, AuthClientOptions, Clock, DelegationChain, DelegationOptions,
    Ed25519KeyIdentity, MemoryCredentialVerifier, Principal, SystemClock,
};
use idbridge_common::{
    AccountsResult, CredentialResult, DelegationRequest, FtTransferRequest, RpcError, RpcMethod,
    TransferParams, TransferResult, INVALID_PARAMS,
};
use idbridge_transport::{
    register_phone_number_credential_handler, register_request_accounts_handler,
    register_request_transfer_handler, BridgeClient, BridgeConfig, EmbedClient, FeaturesSpec,
    LoopbackHost, ProviderEnd, RpcHandler, RpcProvider, ScreenSize, WindowFeatures,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const DEMO_ORIGIN: &str = "https://app.example";
const DEMO_TARGET: &str = "txkre-oyaaa-aaaap-qa3za-cai";
const DEMO_ACCOUNT: &str = "2vxsx-fae";

/// Feature string for `overrides` on a screen of the given size
pub fn features(overrides: &WindowFeatures, screen_width: f64, screen_height: f64) -> String {
    let spec = FeaturesSpec::from(*overrides);
    FeaturesSpec::resolve(
        Some(&spec),
        ScreenSize {
            width: screen_width,
            height: screen_height,
        },
    )
}

/// Write the default configuration to `path`
pub fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists, pass --force to overwrite", path.display());
    }
    BridgeConfig::default()
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Run the popup and embedded flows against an in-process provider
pub async fn run_demo(config: Option<PathBuf>, close_transfer: bool) -> Result<()> {
    let config = match config {
        Some(path) => BridgeConfig::load(&path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    let host = Arc::new(LoopbackHost::new(DEMO_ORIGIN));

    popup_flows(&host, config.clone(), close_transfer).await?;
    embedded_flows(&host, config).await?;

    info!("Demo complete");
    Ok(())
}

async fn popup_flows(host: &Arc<LoopbackHost>, config: BridgeConfig, close_transfer: bool) -> Result<()> {
    let client = BridgeClient::new(host.clone(), config);

    // Transfer
    let params = TransferParams {
        to: DEMO_ACCOUNT.to_string(),
        amount: 0.25,
    };
    let provider = async {
        let end = next_surface(host).await?;
        if close_transfer {
            end.close_by_user();
            return Ok(());
        }
        register_request_transfer_handler(&end, |params| async move {
            debug!(to = %params.to, amount = params.amount, "Approving transfer");
            Ok(TransferResult::Success { height: 1 })
        })
        .await
        .map(|_| ())
        .map_err(anyhow::Error::from)
    };
    let (result, served) = tokio::join!(client.request_transfer(params, None), provider);
    served?;
    println!("Transfer: {}", serde_json::to_string(&result?)?);

    // Accounts
    let provider = async {
        let end = next_surface(host).await?;
        register_request_accounts_handler(&end, || async {
            Ok(AccountsResult::Success {
                accounts: vec![DEMO_ACCOUNT.to_string()],
            })
        })
        .await
        .map_err(anyhow::Error::from)
    };
    let (result, served) = tokio::join!(client.request_accounts(None), provider);
    served?;
    println!("Accounts: {}", serde_json::to_string(&result?)?);

    // Phone-number credential, then verification of the holder
    let provider = async {
        let end = next_surface(host).await?;
        register_phone_number_credential_handler(&end, |domain| async move {
            Ok(Some(CredentialResult {
                domain,
                client_principal: DEMO_ACCOUNT.to_string(),
                phone_number_sha2: None,
                created_date: Utc::now(),
            }))
        })
        .await
        .map_err(anyhow::Error::from)
    };
    let (result, served) = tokio::join!(client.request_phone_number_credential(None), provider);
    served?;
    let credential = result?.ok_or_else(|| anyhow!("Provider returned no credential"))?;
    println!("Credential: issued for {}", credential.domain);

    let holder = Principal::from_text(credential.client_principal.clone())?;
    let verifier = MemoryCredentialVerifier::new();
    verifier.approve(holder.clone()).await;
    let approved = verify_phone_number_credential(&verifier, &holder).await?;
    println!("Credential: holder {} approved = {}", holder, approved);

    Ok(())
}

async fn embedded_flows(host: &Arc<LoopbackHost>, config: BridgeConfig) -> Result<()> {
    let provider_host = host.clone();
    let provider = tokio::spawn(async move {
        let end = next_surface(&provider_host).await?;
        let wallet = DemoWallet {
            root: Ed25519KeyIdentity::generate(),
        };
        let mut rpc = RpcProvider::new(&end, wallet)?;
        rpc.announce_ready()?;
        rpc.serve().await?;
        Ok::<_, anyhow::Error>(())
    });

    let client = EmbedClient::init(host.clone(), config, AuthClientOptions::default()).await?;

    let identity = client
        .get_delegation(DelegationOptions {
            targets: Some(vec![Principal::from_text(DEMO_TARGET)?]),
            ..DelegationOptions::default()
        })
        .await?;
    if let Some(chain) = identity.chain() {
        for hop in chain.audit_trail() {
            println!("Delegation: {}", hop);
        }
    }
    println!("Delegation type: {:?}", client.delegation_type().await);

    let transfer = client
        .request_transfer_ft(FtTransferRequest {
            receiver: DEMO_ACCOUNT.to_string(),
            amount: "1.5".to_string(),
            memo: None,
            derivation_origin: None,
        })
        .await?;
    println!("Embedded transfer: {}", transfer);

    client.logout().await?;
    println!("Logged out, authenticated = {}", client.is_authenticated().await);

    client.destroy();
    provider.await??;
    Ok(())
}

async fn next_surface(host: &LoopbackHost) -> Result<ProviderEnd> {
    host.next_surface()
        .await
        .ok_or_else(|| anyhow!("Host stopped opening surfaces"))
}

/// Provider that approves everything, signing delegations with its own root key
struct DemoWallet {
    root: Ed25519KeyIdentity,
}

impl DemoWallet {
    fn delegate(&self, params: Vec<Value>) -> std::result::Result<Value, RpcError> {
        let request: DelegationRequest = params
            .into_iter()
            .next()
            .and_then(|p| serde_json::from_value(p).ok())
            .ok_or_else(|| RpcError::new(INVALID_PARAMS, "Expected a delegation request"))?;

        let targets = request
            .targets
            .map(|targets| {
                targets
                    .into_iter()
                    .map(Principal::from_text)
                    .collect::<std::result::Result<Vec<_>, _>>()
            })
            .transpose()
            .map_err(|e| RpcError::new(INVALID_PARAMS, e.to_string()))?;

        let expiration = SystemClock.now_nanos() + request.max_time_to_live;
        let chain = DelegationChain::create(
            &self.root,
            request.session_public_key,
            expiration,
            targets,
            None,
        )
        .map_err(|e| RpcError::new(INVALID_PARAMS, e.to_string()))?;
        serde_json::to_value(chain.to_result())
            .map_err(|e| RpcError::new(INVALID_PARAMS, e.to_string()))
    }
}

#[async_trait]
impl RpcHandler for DemoWallet {
    async fn handle(
        &self,
        method: RpcMethod,
        params: Vec<Value>,
    ) -> std::result::Result<Value, RpcError> {
        match method {
            RpcMethod::GetDelegation | RpcMethod::RenewDelegation => self.delegate(params),
            RpcMethod::RequestTransfer => Ok(json!({"status": "SUCCESS", "height": 2})),
            RpcMethod::CanisterCall => Ok(json!({"status": "SUCCESS"})),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_features_centres_on_screen() {
        let out = features(&WindowFeatures::default(), 1920.0, 1080.0);
        assert_eq!(
            out,
            "height=705,width=525,top=187.5,left=697.5,toolbar=0,location=0,menubar=0,"
        );
    }

    #[test]
    fn test_features_overrides() {
        let overrides = WindowFeatures {
            width: Some(800.0),
            toolbar: Some(true),
            ..WindowFeatures::default()
        };
        let out = features(&overrides, 1000.0, 1000.0);
        assert!(out.contains("width=800,"));
        assert!(out.contains("toolbar=1,"));
    }

    #[tokio::test]
    async fn test_demo_runs() {
        run_demo(None, false).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_demo_with_closed_transfer() {
        run_demo(None, true).await.unwrap();
    }
}
