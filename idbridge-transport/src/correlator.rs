//! Request/response correlation over a message bus
//!
//! JSON-RPC exchanges are matched on the request id; legacy exchanges on the
//! event kind. In both cases a listener is registered before anything is
//! posted and is dropped as soon as the wait ends, whether it matched, timed
//! out or was abandoned.

use crate::{
    error::{BridgeError, Result},
    host::{Listener, MessageBus, Surface},
    origin::MessageGate,
};
use idbridge_common::{RpcMethod, RpcRequest, RpcResponse};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, trace};

/// Per-request options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Give up waiting after this long
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

pub struct RpcCorrelator {
    bus: MessageBus,
    gate: MessageGate,
}

impl RpcCorrelator {
    /// Correlate responses arriving on `bus` that pass `gate`
    pub fn new(bus: MessageBus, gate: MessageGate) -> Self {
        Self { bus, gate }
    }

    /// Post `request` to `surface` and wait for the response carrying its id
    pub async fn request<S>(
        &self,
        surface: &S,
        target_origin: &str,
        request: RpcRequest,
        options: RequestOptions,
    ) -> Result<RpcResponse>
    where
        S: Surface + ?Sized,
    {
        let mut listener = self.bus.listen();
        debug!(id = %request.id, method = %request.method, "Sending request");
        surface.post(serde_json::to_value(&request)?, target_origin)?;

        with_timeout(
            options.timeout,
            await_response(&mut listener, &self.gate, &request.id),
        )
        .await
    }

    /// Call `method` and unwrap the response into its result
    pub async fn call<S>(
        &self,
        surface: &S,
        target_origin: &str,
        method: RpcMethod,
        params: Vec<Value>,
        options: RequestOptions,
    ) -> Result<Value>
    where
        S: Surface + ?Sized,
    {
        let request = RpcRequest::new(method, params);
        let response = self
            .request(surface, target_origin, request, options)
            .await?;
        response.into_result().map_err(BridgeError::from)
    }
}

async fn await_response(
    listener: &mut Listener,
    gate: &MessageGate,
    id: &str,
) -> Result<RpcResponse> {
    loop {
        let message = listener.recv().await.ok_or(BridgeError::ChannelClosed)?;
        if !gate.admits(&message) {
            continue;
        }
        match RpcResponse::parse(&message.data) {
            Some(response) if response.id == id => {
                debug!(id = %id, success = response.is_success(), "Response received");
                return Ok(response);
            }
            Some(response) => trace!(id = %response.id, "Ignoring response for another request"),
            None => trace!("Ignoring unrelated message"),
        }
    }
}

/// Wait for the first admitted message that `select` maps to a value.
///
/// Used by the legacy exchanges, which carry no correlation id.
pub async fn await_event<T, F>(listener: &mut Listener, gate: &MessageGate, mut select: F) -> Result<T>
where
    F: FnMut(&Value) -> Option<T>,
{
    loop {
        let message = listener.recv().await.ok_or(BridgeError::ChannelClosed)?;
        if !gate.admits(&message) {
            continue;
        }
        if let Some(value) = select(&message.data) {
            return Ok(value);
        }
    }
}

/// Run `wait` under an optional deadline
pub(crate) async fn with_timeout<T>(
    timeout: Option<Duration>,
    wait: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| BridgeError::RequestTimedOut)?,
        None => wait.await,
    }
}
