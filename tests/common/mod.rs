//! Common test utilities shared across integration and E2E tests

use async_trait::async_trait;
use idbridge_auth::{
    AuthClientOptions, AuthStorage, Clock, DelegationChain, Ed25519KeyIdentity, Principal,
};
use idbridge_common::{DelegationRequest, RpcError, RpcMethod, INVALID_PARAMS};
use idbridge_transport::{LoopbackHost, RpcHandler, RpcProvider};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Origin the test application is served from
pub const APP_ORIGIN: &str = "https://app.example";

/// Canister the test delegations are scoped to
pub const TARGET: &str = "txkre-oyaaa-aaaap-qa3za-cai";

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Embedded provider that signs delegations with a fixed root key
pub struct TestWallet {
    pub root: Ed25519KeyIdentity,
    pub clock: Arc<dyn Clock>,
}

impl TestWallet {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            root: Ed25519KeyIdentity::from_seed([42u8; 32]),
            clock,
        }
    }

    fn delegate(&self, params: Vec<Value>) -> Result<Value, RpcError> {
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
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()
            .map_err(|e| RpcError::new(INVALID_PARAMS, e.to_string()))?;

        let chain = DelegationChain::create(
            &self.root,
            request.session_public_key,
            self.clock.now_nanos() + request.max_time_to_live,
            targets,
            None,
        )
        .map_err(|e| RpcError::new(INVALID_PARAMS, e.to_string()))?;
        Ok(json!(chain.to_result()))
    }
}

#[async_trait]
impl RpcHandler for TestWallet {
    async fn handle(&self, method: RpcMethod, params: Vec<Value>) -> Result<Value, RpcError> {
        match method {
            RpcMethod::GetDelegation | RpcMethod::RenewDelegation => self.delegate(params),
            RpcMethod::RequestTransfer => Ok(json!({"status": "SUCCESS", "height": 11})),
            RpcMethod::CanisterCall => Ok(json!({"status": "SUCCESS", "params": params})),
        }
    }
}

/// Serve the next mounted frame with a [`TestWallet`] until it unloads
pub fn spawn_embedded_provider(host: Arc<LoopbackHost>, clock: Arc<dyn Clock>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let end = host.next_surface().await.expect("frame mounted");
        let mut rpc = RpcProvider::new(&end, TestWallet::new(clock)).expect("frame has a parent");
        rpc.announce_ready().expect("ready posted");
        rpc.serve().await.expect("serve until unload");
    })
}

/// Auth options over the given store and clock
pub fn auth_options(storage: Arc<dyn AuthStorage>, clock: Arc<dyn Clock>) -> AuthClientOptions {
    AuthClientOptions {
        storage,
        clock,
        ..AuthClientOptions::default()
    }
}
