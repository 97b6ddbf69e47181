use lsp_peer::lsp::stdio_transport;
use lsp_peer::lsp::LineReader;
use lsp_peer::{ErrorCode, OutgoingMessage, Peer, PeerError, Request, RpcError};
use lsp_types::{InitializeParams, InitializeResult, ServerCapabilities, ServerInfo};
use serde_json::value::RawValue;
use tokio::io::AsyncWrite;

use crate::cli::Config;

pub async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!("Serving {} on stdio", config.server_name);
    let mut peer = stdio_transport::stdio(config.peer);
    let mut server = Server::new(config.server_name);
    server.serve(&mut peer).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Uninitialized,
    Running,
    ShuttingDown,
}

/// What to do after a message has been handled.
enum Step {
    Reply(OutgoingMessage),
    Continue,
    Exit,
}

/// Minimal lifecycle handling: initialize, shutdown, exit, plus `echo`.
pub struct Server {
    name: String,
    state: State,
}

impl Server {
    pub fn new(name: String) -> Self {
        Server {
            name,
            state: State::Uninitialized,
        }
    }

    pub async fn serve<R, W>(&mut self, peer: &mut Peer<R, W>) -> anyhow::Result<()>
    where
        R: LineReader,
        W: AsyncWrite + Unpin + Send,
    {
        loop {
            let request = match peer.receive().await {
                Ok(Some(request)) => request,
                Ok(None) => {
                    tracing::info!("Input closed");
                    return Ok(());
                }
                Err(PeerError::Io(err)) => return Err(err.into()),
                // Nothing reliable to reply to; the peer already logged why.
                Err(PeerError::Rpc(err)) => {
                    tracing::warn!("Dropped message: {}", err);
                    continue;
                }
            };

            match self.handle(&request) {
                Step::Reply(mut reply) => peer.send(&mut reply).await?,
                Step::Continue => {}
                Step::Exit => {
                    if self.state != State::ShuttingDown {
                        tracing::warn!("exit received without shutdown");
                    }
                    return Ok(());
                }
            }
        }
    }

    fn handle(&mut self, request: &Request) -> Step {
        if request.is_notification() {
            return self.handle_notification(request);
        }
        let result = match (self.state, request.method()) {
            (State::Uninitialized, "initialize") => self.initialize(request),
            (State::Uninitialized, _) => Err(RpcError::from(ErrorCode::ServerNotInitialized)),
            (State::ShuttingDown, _) => Err(RpcError::invalid_request("server is shutting down")),
            (State::Running, "initialize") => {
                Err(RpcError::invalid_request("initialize sent twice"))
            }
            (State::Running, "shutdown") => {
                self.state = State::ShuttingDown;
                OutgoingMessage::response_with(request.id(), &()).map_err(internal)
            }
            (State::Running, "echo") => echo(request),
            (State::Running, method) => Err(RpcError::method_not_found(method)),
        };

        Step::Reply(match result {
            Ok(reply) => reply,
            Err(err) => {
                tracing::debug!("{} failed: {}", request.method(), err);
                OutgoingMessage::from_error(request.id(), &err)
            }
        })
    }

    fn handle_notification(&mut self, request: &Request) -> Step {
        match request.method() {
            "exit" => Step::Exit,
            "initialized" => {
                tracing::info!("Client initialized");
                Step::Continue
            }
            method => {
                tracing::debug!("Ignoring notification {}", method);
                Step::Continue
            }
        }
    }

    fn initialize(&mut self, request: &Request) -> Result<OutgoingMessage, RpcError> {
        let params: InitializeParams = request.params()?;
        if let Some(client) = &params.client_info {
            tracing::info!(
                "Client: {} {}",
                client.name,
                client.version.as_deref().unwrap_or("")
            );
        }

        let result = InitializeResult {
            capabilities: ServerCapabilities::default(),
            server_info: Some(ServerInfo {
                name: self.name.clone(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        };
        let reply = OutgoingMessage::response_with(request.id(), &result).map_err(internal)?;
        self.state = State::Running;
        Ok(reply)
    }
}

fn echo(request: &Request) -> Result<OutgoingMessage, RpcError> {
    let params: &RawValue = request.params()?;
    OutgoingMessage::response_with(request.id(), params).map_err(internal)
}

fn internal(err: serde_json::Error) -> RpcError {
    RpcError::internal_error(err.to_string())
}
