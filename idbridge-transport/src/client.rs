//! Client side of the legacy handshake
//!
//! ```text
//! Idle ──start──▶ AwaitingReady ──Ready──▶ AwaitingResult ──response──▶ Completed
//!                                               │                     └─error──▶ Failed
//!                                               └──window closed──▶ Interrupted
//! ```
//!
//! The machine itself is synchronous: [`ClientMachine::on_message`] says what
//! to do with each inbound message. [`run_legacy_flow`] drives it against an
//! opened provider window.

use crate::{
    correlator::with_timeout,
    error::{BridgeError, Result},
    host::{Host, InboundMessage, Listener},
    lifecycle::{ChannelHandle, FeaturesSpec, LifecycleManager},
    origin::MessageGate,
};
use idbridge_common::{ClientEvent, ProviderEvent};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    AwaitingReady,
    AwaitingResult,
    Completed,
    Failed,
    Interrupted,
}

impl ClientState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClientState::Completed | ClientState::Failed | ClientState::Interrupted
        )
    }
}

/// One legacy request/response pair
pub trait LegacyExchange: Send {
    type Output: Send;

    /// Request to post once the provider is ready
    fn request(&self) -> ClientEvent;

    /// Result carried by `event`, or `None` when the event is not this
    /// exchange's response
    fn accept(&self, event: ProviderEvent) -> Option<Result<Self::Output>>;
}

/// What the driver should do after a message
#[derive(Debug)]
pub enum Step<T> {
    Ignore,
    Send(ClientEvent),
    Done(Result<T>),
}

pub struct ClientMachine<E: LegacyExchange> {
    state: ClientState,
    exchange: E,
    gate: MessageGate,
}

impl<E: LegacyExchange> ClientMachine<E> {
    pub fn new(exchange: E, gate: MessageGate) -> Self {
        Self {
            state: ClientState::Idle,
            exchange,
            gate,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// The provider surface is open; wait for its `Ready`
    pub fn start(&mut self) {
        if self.state == ClientState::Idle {
            self.state = ClientState::AwaitingReady;
        }
    }

    pub fn on_message(&mut self, message: &InboundMessage) -> Step<E::Output> {
        if !self.gate.admits(message) {
            return Step::Ignore;
        }
        let Some(event) = ProviderEvent::parse(&message.data) else {
            return Step::Ignore;
        };

        match (self.state, event) {
            (ClientState::AwaitingReady, ProviderEvent::Ready) => {
                let request = self.exchange.request();
                info!(kind = request.kind(), "Provider is ready, sending request");
                self.state = ClientState::AwaitingResult;
                Step::Send(request)
            }
            (ClientState::AwaitingResult, ProviderEvent::Ready) => {
                debug!("Ignoring repeated Ready");
                Step::Ignore
            }
            (ClientState::AwaitingResult, event) => {
                let kind = event.kind();
                match self.exchange.accept(event) {
                    None => Step::Ignore,
                    Some(Ok(output)) => {
                        info!(kind, "Flow complete");
                        self.state = ClientState::Completed;
                        Step::Done(Ok(output))
                    }
                    Some(Err(e)) => {
                        warn!(kind, error = %e, "Provider reported a failure");
                        self.state = ClientState::Failed;
                        Step::Done(Err(e))
                    }
                }
            }
            _ => Step::Ignore,
        }
    }

    /// The user closed the provider surface
    pub fn interrupt(&mut self) {
        if !self.state.is_terminal() {
            self.state = ClientState::Interrupted;
        }
    }

    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = ClientState::Failed;
        }
    }
}

/// Where and how to open the provider for one flow
#[derive(Debug, Clone, Copy)]
pub struct FlowTarget<'a> {
    pub url: &'a str,
    pub features: Option<&'a FeaturesSpec>,
    pub timeout: Option<Duration>,
}

/// Open the provider window, run `exchange` through it and close the window.
///
/// The listener is attached before the window opens. The window is closed
/// whatever the outcome.
pub async fn run_legacy_flow<E: LegacyExchange>(
    host: &dyn Host,
    lifecycle: &LifecycleManager,
    target: FlowTarget<'_>,
    exchange: E,
) -> Result<E::Output> {
    let gate = MessageGate::for_url(target.url)?;
    let mut machine = ClientMachine::new(exchange, gate);
    let mut listener = host.bus().listen();

    let (interrupt_tx, mut interrupted) = oneshot::channel();
    let handle = lifecycle.open(target.url, target.features, move |err| {
        let _ = interrupt_tx.send(err);
    })?;
    machine.start();

    let outcome = with_timeout(
        target.timeout,
        drive(&mut machine, &mut listener, &handle, &mut interrupted),
    )
    .await;

    if let Err(e) = &outcome {
        match e {
            BridgeError::UserInterrupted => machine.interrupt(),
            _ => machine.fail(),
        }
    }
    debug!(state = ?machine.state(), "Legacy flow finished");

    drop(listener);
    lifecycle.release(&handle);
    outcome
}

async fn drive<E: LegacyExchange>(
    machine: &mut ClientMachine<E>,
    listener: &mut Listener,
    handle: &ChannelHandle,
    interrupted: &mut oneshot::Receiver<BridgeError>,
) -> Result<E::Output> {
    loop {
        tokio::select! {
            message = listener.recv() => {
                let message = message.ok_or(BridgeError::ChannelClosed)?;
                match machine.on_message(&message) {
                    Step::Ignore => {}
                    Step::Send(request) => handle.post(&request)?,
                    Step::Done(result) => return result,
                }
            }
            interruption = &mut *interrupted => {
                return Err(interruption.unwrap_or_else(|_| {
                    BridgeError::SurfaceUnavailable(
                        "Provider window was taken over by another flow".to_string(),
                    )
                }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ContextId;
    use assert_matches::assert_matches;
    use idbridge_common::AccountsResult;
    use serde_json::{json, Value};

    struct Accounts;

    impl LegacyExchange for Accounts {
        type Output = AccountsResult;

        fn request(&self) -> ClientEvent {
            ClientEvent::RequestAccounts
        }

        fn accept(&self, event: ProviderEvent) -> Option<Result<AccountsResult>> {
            match event {
                ProviderEvent::RequestAccountsResponse { result } => Some(Ok(result)),
                _ => None,
            }
        }
    }

    fn machine() -> ClientMachine<Accounts> {
        let mut machine = ClientMachine::new(Accounts, MessageGate::new("https://nfid.one"));
        machine.start();
        machine
    }

    fn from(origin: &str, data: Value) -> InboundMessage {
        InboundMessage {
            origin: origin.to_string(),
            source: Some(ContextId::new()),
            data,
        }
    }

    #[test]
    fn test_ready_then_response() {
        let mut machine = machine();
        assert_eq!(machine.state(), ClientState::AwaitingReady);

        let step = machine.on_message(&from("https://nfid.one", json!({"kind": "Ready"})));
        assert_matches!(step, Step::Send(ClientEvent::RequestAccounts));
        assert_eq!(machine.state(), ClientState::AwaitingResult);

        let response = json!({
            "kind": "RequestAccountsResponse",
            "result": {"status": "SUCCESS", "accounts": ["a"]}
        });
        let step = machine.on_message(&from("https://nfid.one", response));
        assert_matches!(step, Step::Done(Ok(AccountsResult::Success { .. })));
        assert_eq!(machine.state(), ClientState::Completed);
    }

    #[test]
    fn test_second_ready_is_ignored() {
        let mut machine = machine();
        machine.on_message(&from("https://nfid.one", json!({"kind": "Ready"})));
        let step = machine.on_message(&from("https://nfid.one", json!({"kind": "Ready"})));
        assert_matches!(step, Step::Ignore);
        assert_eq!(machine.state(), ClientState::AwaitingResult);
    }

    #[test]
    fn test_wrong_origin_causes_no_transition() {
        let mut machine = machine();
        let step = machine.on_message(&from("https://evil.example", json!({"kind": "Ready"})));
        assert_matches!(step, Step::Ignore);
        assert_eq!(machine.state(), ClientState::AwaitingReady);
    }

    #[test]
    fn test_response_before_ready_is_ignored() {
        let mut machine = machine();
        let response = json!({
            "kind": "RequestAccountsResponse",
            "result": {"status": "SUCCESS", "accounts": []}
        });
        assert_matches!(
            machine.on_message(&from("https://nfid.one", response)),
            Step::Ignore
        );
        assert_eq!(machine.state(), ClientState::AwaitingReady);
    }

    #[test]
    fn test_unrelated_messages_are_ignored() {
        let mut machine = machine();
        for data in [json!("text"), json!({"kind": "Other"}), json!({"type": "nfid_ready"})] {
            assert_matches!(machine.on_message(&from("https://nfid.one", data)), Step::Ignore);
        }
        assert_eq!(machine.state(), ClientState::AwaitingReady);
    }

    #[test]
    fn test_interrupt_is_terminal() {
        let mut machine = machine();
        machine.interrupt();
        assert_eq!(machine.state(), ClientState::Interrupted);
        machine.fail();
        assert_eq!(machine.state(), ClientState::Interrupted);
        assert!(machine.state().is_terminal());
    }
}
