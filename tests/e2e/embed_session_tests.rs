//! Embedded provider sessions across client restarts

use assert_matches::assert_matches;
use idbridge_auth::clock::{FixedClock, NANOS_PER_HOUR};
use idbridge_auth::storage::KEY_STORAGE_KEY;
use idbridge_auth::{AuthStorage, DelegationOptions, DelegationType, MemoryStorage, Principal};
use idbridge_common::NftTransferRequest;
use idbridge_tests::common::{
    auth_options, setup_test_logging, spawn_embedded_provider, APP_ORIGIN, TARGET,
};
use idbridge_transport::{BridgeConfig, BridgeError, EmbedClient, Host, LoopbackHost};
use std::sync::Arc;

const NOW: u64 = 1_700_000_000_000_000_000;

struct World {
    host: Arc<LoopbackHost>,
    storage: Arc<MemoryStorage>,
    clock: Arc<FixedClock>,
}

impl World {
    fn new() -> Self {
        setup_test_logging();
        Self {
            host: Arc::new(LoopbackHost::new(APP_ORIGIN)),
            storage: Arc::new(MemoryStorage::new()),
            clock: Arc::new(FixedClock::new(NOW)),
        }
    }

    async fn start(&self, config: BridgeConfig) -> EmbedClient {
        spawn_embedded_provider(self.host.clone(), self.clock.clone());
        EmbedClient::init(
            self.host.clone(),
            config,
            auth_options(self.storage.clone(), self.clock.clone()),
        )
        .await
        .unwrap()
    }
}

fn scoped() -> DelegationOptions {
    DelegationOptions {
        targets: Some(vec![Principal::from_text(TARGET).unwrap()]),
        ..DelegationOptions::default()
    }
}

#[tokio::test]
async fn test_session_survives_restart() {
    let world = World::new();

    let first = world.start(BridgeConfig::default()).await;
    first.get_delegation(scoped()).await.unwrap();
    let key = world.storage.get(KEY_STORAGE_KEY).await.unwrap();
    first.destroy();

    world.clock.advance(NANOS_PER_HOUR);
    let second = world.start(BridgeConfig::default()).await;
    assert!(second.is_authenticated().await);
    assert_eq!(second.delegation_type().await, DelegationType::Global);
    assert_eq!(world.storage.get(KEY_STORAGE_KEY).await.unwrap(), key);

    let transfer = second
        .request_transfer_nft(NftTransferRequest {
            receiver: "receiver".to_string(),
            token_id: "token-1".to_string(),
            derivation_origin: None,
        })
        .await
        .unwrap();
    assert_eq!(transfer["height"], 11);
}

#[tokio::test]
async fn test_expired_session_restarts_anonymous() {
    let world = World::new();

    let first = world.start(BridgeConfig::default()).await;
    first.get_delegation(scoped()).await.unwrap();
    first.destroy();

    world.clock.advance(8 * NANOS_PER_HOUR);
    let second = world.start(BridgeConfig::default()).await;
    assert!(!second.is_authenticated().await);
    assert_eq!(second.delegation_type().await, DelegationType::Anonymous);
    assert_matches!(
        second.update_global_delegation(scoped()).await,
        Err(BridgeError::NotPermitted(_))
    );
}

#[tokio::test]
async fn test_logout_persists() {
    let world = World::new();

    let first = world.start(BridgeConfig::default()).await;
    first.get_delegation(scoped()).await.unwrap();
    first.logout().await.unwrap();
    first.destroy();

    let second = world.start(BridgeConfig::default()).await;
    assert!(!second.is_authenticated().await);
}

#[tokio::test]
async fn test_legacy_session_is_migrated() {
    let world = World::new();
    let legacy = Arc::new(MemoryStorage::new());

    // Log in against the legacy store, as an older client would have
    let old = {
        spawn_embedded_provider(world.host.clone(), world.clock.clone());
        EmbedClient::init(
            world.host.clone(),
            BridgeConfig::default(),
            auth_options(legacy.clone(), world.clock.clone()),
        )
        .await
        .unwrap()
    };
    old.get_delegation(scoped()).await.unwrap();
    old.destroy();

    spawn_embedded_provider(world.host.clone(), world.clock.clone());
    let mut options = auth_options(world.storage.clone(), world.clock.clone());
    options.legacy_storage = Some(legacy.clone());
    let migrated = EmbedClient::init(world.host.clone(), BridgeConfig::default(), options)
        .await
        .unwrap();

    assert!(migrated.is_authenticated().await);
    assert!(legacy.get(KEY_STORAGE_KEY).await.unwrap().is_none());
    assert!(world.storage.get(KEY_STORAGE_KEY).await.unwrap().is_some());
}

#[tokio::test]
async fn test_configured_provider_from_file() {
    let world = World::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("idbridge.toml");
    std::fs::write(
        &path,
        r#"
        [provider]
        embed_url = "https://wallet.example/embed"

        [frame]
        style = { width = "320px", height = "480px" }
        "#,
    )
    .unwrap();
    let config = BridgeConfig::load(&path).unwrap();

    // Observe the mounted frame before the wallet takes it over
    let host = world.host.clone();
    let observer = tokio::spawn(async move {
        let end = host.next_surface().await.unwrap();
        (end.url().to_string(), end.style().unwrap_or_default(), end)
    });

    let init = EmbedClient::init(
        world.host.clone(),
        config,
        auth_options(world.storage.clone(), world.clock.clone()),
    );
    let serve = async {
        let (url, style, end) = observer.await.unwrap();
        let rpc = idbridge_transport::RpcProvider::new(
            &end,
            idbridge_tests::common::TestWallet::new(world.clock.clone()),
        )
        .unwrap();
        rpc.announce_ready().unwrap();
        (url, style, rpc)
    };

    let (client, (url, style, _rpc)) = tokio::join!(init, serve);
    let client = client.unwrap();
    assert_eq!(url, "https://wallet.example/embed");
    assert!(style.contains("width: 320px;"));
    assert!(style.contains("display: none;"));
    assert!(!client.frames().is_visible());
    assert_eq!(world.host.bus().listener_count(), 0);
}
