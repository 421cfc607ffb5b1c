//! # idbridge-transport: the cross-window handshake
//!
//! Opens provider surfaces (popup windows and embedded frames), exchanges
//! messages with them and tears them down again.
//!
//! - [`lifecycle`]: one provider window per slot, closed-by-user detection,
//!   hidden embedded frame
//! - [`correlator`]: JSON-RPC id correlation with timeouts
//! - [`client`] / [`provider`]: the two ends of the legacy event handshake
//! - [`flows`]: credential, transfer and account requests over popups
//! - [`embed`]: delegation, renewal, transfer and canister-call requests over
//!   the embedded frame
//!
//! The browser is reached through the [`host::Host`] traits; [`loopback`]
//! implements them in-process.

pub mod client;
pub mod config;
pub mod correlator;
pub mod embed;
pub mod error;
pub mod flows;
pub mod host;
pub mod lifecycle;
pub mod loopback;
pub mod origin;
pub mod provider;

pub use client::{run_legacy_flow, ClientMachine, ClientState, FlowTarget, LegacyExchange, Step};
pub use config::{BridgeConfig, ProviderConf};
pub use correlator::{await_event, RequestOptions, RpcCorrelator};
pub use embed::EmbedClient;
pub use error::{BridgeError, Result};
pub use flows::{
    register_phone_number_credential_handler, register_request_accounts_handler,
    register_request_transfer_handler, BridgeClient,
};
pub use host::{
    ContextId, FrameSurface, Host, InboundMessage, Listener, MessageBus, ProviderContext,
    ScreenSize, Surface,
};
pub use lifecycle::{
    ChannelHandle, FeaturesSpec, FrameManager, FrameStyle, LifecycleManager, WindowFeatures,
};
pub use loopback::{LoopbackHost, ProviderEnd};
pub use origin::{origin_of, persona_domain, validate_origin, validate_source, MessageGate};
pub use provider::{serve_once, ProviderSession, ProviderState, RpcHandler, RpcProvider};
