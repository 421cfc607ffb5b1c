//! Popup handshake over the loopback host: the client driven end to end
//! against hand-written and registered providers

use assert_matches::assert_matches;
use idbridge_auth::clock::FixedClock;
use idbridge_auth::storage::{KEY_STORAGE_DELEGATION, KEY_STORAGE_KEY};
use idbridge_auth::{
    AuthClient, AuthStorage, DelegationChain, Ed25519KeyIdentity, MemoryStorage, SignIdentity,
};
use idbridge_common::{AccountsResult, ClientEvent, TransferParams, TransferResult};
use idbridge_tests::common::{auth_options, setup_test_logging, APP_ORIGIN};
use idbridge_transport::lifecycle::INTERRUPTION_CHECK_INTERVAL;
use idbridge_transport::{
    register_request_accounts_handler, register_request_transfer_handler, BridgeClient,
    BridgeConfig, BridgeError, Host, LifecycleManager, LoopbackHost, ProviderConf,
    ProviderContext, Surface,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const IDP: &str = "https://idp.example/authenticate";

fn client() -> (Arc<LoopbackHost>, BridgeClient) {
    setup_test_logging();
    let host = Arc::new(LoopbackHost::new(APP_ORIGIN));
    let client = BridgeClient::new(host.clone(), BridgeConfig::default());
    (host, client)
}

#[tokio::test]
async fn test_successful_exchange_closes_surface() {
    let (host, client) = client();

    // Provider written against the wire format only
    let provider = async {
        let end = host.next_surface().await.unwrap();
        let mut inbox = end.bus().listen();
        let opener = end.parent().unwrap();

        opener.post(json!({"kind": "Ready"}), "*").unwrap();
        let request = inbox.recv().await.unwrap();
        assert_eq!(request.origin, APP_ORIGIN);
        assert_eq!(
            ClientEvent::parse(&request.data),
            Some(ClientEvent::RequestAccounts)
        );

        opener
            .post(
                json!({
                    "kind": "RequestAccountsResponse",
                    "result": {"status": "SUCCESS", "accounts": ["acc-1", "acc-2"]}
                }),
                APP_ORIGIN,
            )
            .unwrap();
        end
    };

    let (result, end) = tokio::join!(
        client.request_accounts(Some(ProviderConf::provider(IDP))),
        provider
    );
    assert_eq!(
        result.unwrap(),
        AccountsResult::Success {
            accounts: vec!["acc-1".to_string(), "acc-2".to_string()]
        }
    );
    assert!(end.is_closed());
    assert!(!client.is_window_open());
    assert_eq!(host.bus().listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_ready_from_foreign_origin_times_out() {
    let (host, client) = client();
    let conf = ProviderConf::provider(IDP).with_timeout(Duration::from_secs(10));

    let forger = async {
        let end = host.next_surface().await.unwrap();
        host.inject("https://evil.example", json!({"kind": "Ready"}));
        end
    };

    let (result, _end) = tokio::join!(client.request_accounts(Some(conf)), forger);
    assert_matches!(result, Err(BridgeError::RequestTimedOut));
    assert!(!client.is_window_open());
    assert_eq!(host.bus().listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_closing_before_ready_interrupts_within_one_interval() {
    let (host, client) = client();
    let started = Instant::now();

    let user = async {
        host.next_surface().await.unwrap().close_by_user();
    };

    let (result, ()) = tokio::join!(client.request_phone_number_credential(None), user);
    assert_matches!(result, Err(BridgeError::UserInterrupted));
    assert!(started.elapsed() <= INTERRUPTION_CHECK_INTERVAL);
}

#[tokio::test(start_paused = true)]
async fn test_closing_transfer_resolves_with_terminated_result() {
    let (host, client) = client();
    let params = TransferParams {
        to: "acc".to_string(),
        amount: 3.0,
    };

    let user = async {
        let end = host.next_surface().await.unwrap();
        // The user sees the page, then closes it
        end.parent().unwrap().post(json!({"kind": "Ready"}), "*").unwrap();
        end.close_by_user();
    };

    let (result, ()) = tokio::join!(client.request_transfer(params, None), user);
    assert_eq!(
        serde_json::to_value(result.unwrap()).unwrap(),
        json!({"status": "ERROR", "message": "Terminated by user"})
    );
}

#[tokio::test]
async fn test_registered_providers_serve_sequential_flows() {
    let (host, client) = client();

    let providers = async {
        let end = host.next_surface().await.unwrap();
        let params = register_request_transfer_handler(&end, |_| async {
            Ok(TransferResult::Rejected {
                message: "Insufficient funds".to_string(),
            })
        })
        .await
        .unwrap();

        let end = host.next_surface().await.unwrap();
        register_request_accounts_handler(&end, || async {
            Ok(AccountsResult::Success { accounts: vec![] })
        })
        .await
        .unwrap();
        params
    };

    let flows = async {
        let transfer = client
            .request_transfer(
                TransferParams {
                    to: "acc".to_string(),
                    amount: 100.0,
                },
                None,
            )
            .await
            .unwrap();
        let accounts = client.request_accounts(None).await.unwrap();
        (transfer, accounts)
    };

    let (params, (transfer, accounts)) = tokio::join!(providers, flows);
    assert_eq!(params.amount, 100.0);
    assert_matches!(transfer, TransferResult::Rejected { .. });
    assert_eq!(accounts, AccountsResult::Success { accounts: vec![] });
}

#[tokio::test]
async fn test_open_then_close_leaves_no_listener() {
    let host = Arc::new(LoopbackHost::new(APP_ORIGIN));
    let lifecycle = LifecycleManager::new(host.clone());

    let handle = lifecycle.open(IDP, None, |_| {}).unwrap();
    let end = host.next_surface().await.unwrap();
    assert!(lifecycle.is_open());

    lifecycle.close();
    lifecycle.close();
    assert!(handle.surface().is_closed());
    assert!(end.is_closed());
    assert!(!lifecycle.is_open());
    assert_eq!(host.bus().listener_count(), 0);
    assert_eq!(end.bus().listener_count(), 0);
}

#[tokio::test]
async fn test_second_flow_takes_over_the_window() {
    let (host, client) = client();

    let first = client.request_accounts(None);
    let second = async {
        let first_end = host.next_surface().await.unwrap();
        let second = client.request_accounts(None);
        let provider = async {
            let end = host.next_surface().await.unwrap();
            register_request_accounts_handler(&end, || async {
                Ok(AccountsResult::Success {
                    accounts: vec!["second".to_string()],
                })
            })
            .await
            .unwrap();
        };
        let (result, ()) = tokio::join!(second, provider);
        (first_end, result)
    };

    let (first, (first_end, second)) = tokio::join!(first, second);
    assert_matches!(first, Err(BridgeError::SurfaceUnavailable(_)));
    assert!(first_end.is_closed());
    assert_matches!(second, Ok(AccountsResult::Success { .. }));
}

#[tokio::test]
async fn test_unreadable_key_restores_anonymous() {
    let storage = Arc::new(MemoryStorage::new());
    let root = Ed25519KeyIdentity::from_seed([5u8; 32]);
    let session = Ed25519KeyIdentity::from_seed([6u8; 32]);
    let chain = DelegationChain::create(&root, session.public_key(), 100, None, None).unwrap();

    storage.set(KEY_STORAGE_KEY, "abc".to_string()).await.unwrap();
    storage
        .set(KEY_STORAGE_DELEGATION, chain.to_json().unwrap())
        .await
        .unwrap();
    assert!(!chain.is_valid(200, &idbridge_auth::Ed25519Verifier));

    let clock = Arc::new(FixedClock::new(200));
    let auth = AuthClient::create(auth_options(storage.clone(), clock))
        .await
        .unwrap();

    assert!(auth.identity().is_anonymous());
    assert!(!auth.is_authenticated());
    assert!(storage.get(KEY_STORAGE_DELEGATION).await.unwrap().is_none());
    assert_ne!(
        storage.get(KEY_STORAGE_KEY).await.unwrap().as_deref(),
        Some("abc")
    );
}

#[tokio::test]
async fn test_request_waits_for_ready_before_posting() {
    let (host, client) = client();
    let mut flow = tokio_test::task::spawn(client.request_accounts(Some(ProviderConf::provider(IDP))));

    tokio_test::assert_pending!(flow.poll());
    let end = host.next_surface().await.unwrap();
    let mut inbox = end.bus().listen();
    let opener = end.parent().unwrap();

    // Nothing is sent until the provider announces itself
    tokio_test::assert_pending!(flow.poll());
    assert!(inbox.try_recv().is_none());

    opener.post(json!({"kind": "Ready"}), "*").unwrap();
    tokio_test::assert_pending!(flow.poll());
    let request = inbox.recv().await.unwrap();
    assert_eq!(
        ClientEvent::parse(&request.data),
        Some(ClientEvent::RequestAccounts)
    );

    opener
        .post(
            json!({
                "kind": "RequestAccountsResponse",
                "result": {"status": "REJECTED", "message": "No"}
            }),
            APP_ORIGIN,
        )
        .unwrap();
    let result = tokio_test::assert_ready_ok!(flow.poll());
    assert_matches!(result, AccountsResult::Rejected { .. });
    assert_eq!(host.bus().listener_count(), 0);
}

#[tokio::test]
async fn test_valid_key_with_expired_chain_restores_anonymous() {
    let storage = Arc::new(MemoryStorage::new());
    let root = Ed25519KeyIdentity::from_seed([5u8; 32]);
    let session = Ed25519KeyIdentity::from_seed([6u8; 32]);
    let chain = DelegationChain::create(&root, session.public_key(), 100, None, None).unwrap();

    storage
        .set(KEY_STORAGE_KEY, session.to_json().unwrap())
        .await
        .unwrap();
    storage
        .set(KEY_STORAGE_DELEGATION, chain.to_json().unwrap())
        .await
        .unwrap();

    // Still restorable while the chain is live
    let live = AuthClient::create(auth_options(storage.clone(), Arc::new(FixedClock::new(50))))
        .await
        .unwrap();
    assert!(live.is_authenticated());
    assert_eq!(live.session_public_key(), session.public_key());

    let auth = AuthClient::create(auth_options(storage.clone(), Arc::new(FixedClock::new(200))))
        .await
        .unwrap();

    assert!(auth.identity().is_anonymous());
    assert!(!auth.is_authenticated());
    assert_ne!(auth.session_public_key(), session.public_key());
    assert!(storage.get(KEY_STORAGE_DELEGATION).await.unwrap().is_none());
    assert_ne!(
        storage.get(KEY_STORAGE_KEY).await.unwrap(),
        Some(session.to_json().unwrap())
    );
}
