//! Provider side of the handshake
//!
//! ```text
//! Idle ──Ready──▶ ListeningForRequest ──request──▶ Handling ──response──▶ Closed
//! ```
//!
//! A provider only accepts requests posted by the context that opened or
//! embeds it, and always answers: a failing or panicking handler produces an
//! error-shaped response rather than silence.

use crate::{
    error::{BridgeError, Result},
    host::{Listener, ProviderContext, Surface},
    origin::MessageGate,
};
use async_trait::async_trait;
use futures::FutureExt;
use idbridge_common::{
    ClientEvent, FrameSignal, ProviderEvent, RpcError, RpcMethod, RpcRequest, RpcResponse,
    INTERNAL_ERROR, METHOD_NOT_FOUND,
};
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Idle,
    ListeningForRequest,
    Handling,
    Closed,
}

/// A request accepted by the provider, with the origin to answer to
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedRequest<T> {
    pub request: T,
    pub origin: String,
}

/// Legacy provider session: one `Ready`, one request, one response
pub struct ProviderSession<'a> {
    ctx: &'a dyn ProviderContext,
    parent: Arc<dyn Surface>,
    listener: Listener,
    gate: MessageGate,
    state: ProviderState,
}

impl<'a> ProviderSession<'a> {
    /// Start listening. Fails when the provider has no opener to talk to.
    pub fn new(ctx: &'a dyn ProviderContext) -> Result<Self> {
        let parent = ctx.parent().ok_or_else(|| {
            BridgeError::SurfaceUnavailable("Provider has no opener".to_string())
        })?;
        let listener = ctx.bus().listen();
        let gate = MessageGate::from_source(parent.context());

        Ok(Self {
            ctx,
            parent,
            listener,
            gate,
            state: ProviderState::Idle,
        })
    }

    pub fn state(&self) -> ProviderState {
        self.state
    }

    /// Tell the opener the provider is listening. Only the first call posts.
    pub fn announce_ready(&mut self) -> Result<()> {
        if self.state != ProviderState::Idle {
            debug!("Ready already announced");
            return Ok(());
        }
        self.parent
            .post(serde_json::to_value(ProviderEvent::Ready)?, "*")?;
        self.state = ProviderState::ListeningForRequest;
        debug!("Provider announced Ready");
        Ok(())
    }

    /// Wait for the first request from the opener that `select` accepts
    pub async fn next_request<T, F>(&mut self, mut select: F) -> Result<AcceptedRequest<T>>
    where
        F: FnMut(ClientEvent) -> Option<T>,
    {
        loop {
            let message = self
                .listener
                .recv()
                .await
                .ok_or(BridgeError::ChannelClosed)?;
            if !self.gate.admits(&message) {
                continue;
            }
            let Some(event) = ClientEvent::parse(&message.data) else {
                continue;
            };
            let kind = event.kind();
            if let Some(request) = select(event) {
                info!(kind, origin = %message.origin, "Request received, triggering handler");
                self.state = ProviderState::Handling;
                return Ok(AcceptedRequest {
                    request,
                    origin: message.origin,
                });
            }
        }
    }

    /// Answer the request that arrived from `origin`
    pub fn respond(&self, event: &ProviderEvent, origin: &str) -> Result<()> {
        self.parent.post(serde_json::to_value(event)?, origin)
    }

    /// Close the provider's own surface
    pub fn close(&mut self) {
        if self.state != ProviderState::Closed {
            self.ctx.close_self();
            self.state = ProviderState::Closed;
        }
    }
}

/// Serve one legacy exchange end to end.
///
/// Announces `Ready`, waits for a request `select` accepts, runs `handler`,
/// posts the response built by `respond` and closes the provider. Returns the
/// received request.
pub async fn serve_once<T, O, S, H, Fut, R>(
    ctx: &dyn ProviderContext,
    select: S,
    handler: H,
    respond: R,
) -> Result<T>
where
    T: Clone,
    S: FnMut(ClientEvent) -> Option<T>,
    H: FnOnce(T) -> Fut,
    Fut: Future<Output = anyhow::Result<O>>,
    R: FnOnce(std::result::Result<O, String>) -> ProviderEvent,
{
    let mut session = ProviderSession::new(ctx)?;
    session.announce_ready()?;
    let accepted = session.next_request(select).await?;

    let outcome = match AssertUnwindSafe(handler(accepted.request.clone()))
        .catch_unwind()
        .await
    {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => {
            warn!(error = %e, "Request handler failed");
            Err(e.to_string())
        }
        Err(_) => {
            error!("Request handler panicked");
            Err("Request handler panicked".to_string())
        }
    };

    let response = respond(outcome);
    let sent = session.respond(&response, &accepted.origin);
    session.close();
    sent?;

    Ok(accepted.request)
}

/// Method dispatch for the embedded provider
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(
        &self,
        method: RpcMethod,
        params: Vec<Value>,
    ) -> std::result::Result<Value, RpcError>;
}

/// JSON-RPC endpoint of an embedded provider frame
pub struct RpcProvider<H> {
    parent: Arc<dyn Surface>,
    listener: Listener,
    gate: MessageGate,
    handler: H,
}

impl<H: RpcHandler> RpcProvider<H> {
    /// Listen for requests from the embedding parent
    pub fn new(ctx: &dyn ProviderContext, handler: H) -> Result<Self> {
        let parent = ctx.parent().ok_or_else(|| {
            BridgeError::SurfaceUnavailable("Provider frame has no parent".to_string())
        })?;
        let listener = ctx.bus().listen();
        let gate = MessageGate::from_source(parent.context());

        Ok(Self {
            parent,
            listener,
            gate,
            handler,
        })
    }

    /// Signal the parent that the frame is loaded
    pub fn announce_ready(&self) -> Result<()> {
        self.parent.post(serde_json::to_value(FrameSignal::Ready)?, "*")
    }

    /// Answer the next request. Returns `false` once the frame unloaded.
    pub async fn serve_next(&mut self) -> Result<bool> {
        loop {
            let Some(message) = self.listener.recv().await else {
                return Ok(false);
            };
            if !self.gate.admits(&message) {
                continue;
            }
            let Some(request) = RpcRequest::parse(&message.data) else {
                continue;
            };

            let response = self.dispatch(request).await;
            self.parent
                .post(serde_json::to_value(response)?, &message.origin)?;
            return Ok(true);
        }
    }

    /// Answer requests until the frame unloads
    pub async fn serve(&mut self) -> Result<()> {
        while self.serve_next().await? {}
        debug!("Provider frame unloaded, stopped serving");
        Ok(())
    }

    async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let method = match RpcMethod::from_str(&request.method) {
            Ok(method) => method,
            Err(_) => {
                warn!(method = %request.method, "Unknown method");
                return RpcResponse::failure(
                    request.id,
                    RpcError::new(METHOD_NOT_FOUND, format!("Method not found: {}", request.method)),
                );
            }
        };

        debug!(id = %request.id, method = %method, "Handling request");
        match AssertUnwindSafe(self.handler.handle(method, request.params))
            .catch_unwind()
            .await
        {
            Ok(Ok(result)) => RpcResponse::success(request.id, result),
            Ok(Err(e)) => {
                warn!(method = %method, error = %e, "Handler returned an error");
                RpcResponse::failure(request.id, e)
            }
            Err(_) => {
                error!(method = %method, "Handler panicked");
                RpcResponse::failure(
                    request.id,
                    RpcError::new(INTERNAL_ERROR, "Internal error"),
                )
            }
        }
    }
}
