//! Asynchronous client for the backend RPC endpoint.
//!
//! `RpcClient::connect` spawns a single connection driver on the current tokio
//! runtime and returns immediately. The driver owns the TCP transport and the
//! table of in-flight invocations; callers talk to it over a channel, so
//! `invoke` never blocks and each invocation completes exactly once.

use std::{collections::HashMap, time::Duration};

use serde_json::Value;
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{tcp::OwnedWriteHalf, TcpStream},
    runtime::Handle,
    sync::{mpsc, oneshot},
};

use crate::{
    backend_config::{Endpoint, EndpointError},
    rpc_protocol::{self, Reply, ReplyOutcome, WireEvent},
};

pub(crate) type InvocationResult = Result<Reply, RpcError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub(crate) enum RpcError {
    #[error(transparent)]
    InvalidEndpoint(#[from] EndpointError),
    #[error("rpc client requires a running tokio runtime")]
    NoRuntime,
    #[error("procedure name must not be empty")]
    EmptyProcedure,
    #[error("backend {endpoint} is unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },
    #[error("connection to backend {endpoint} was lost: {reason}")]
    ConnectionLost { endpoint: String, reason: String },
    #[error("backend raised {name}: {message}")]
    Remote { name: String, message: String },
    #[error("rpc protocol error: {0}")]
    Protocol(String),
    #[error("invocation timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),
    #[error("rpc client shut down before the invocation completed")]
    Closed,
}

struct OutgoingInvocation {
    procedure: String,
    args: Vec<Value>,
    reply_tx: oneshot::Sender<InvocationResult>,
}

impl std::fmt::Debug for OutgoingInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingInvocation")
            .field("procedure", &self.procedure)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// Handle to a single backend connection.
///
/// Dropping the client stops the driver once every in-flight invocation has
/// completed.
#[derive(Debug)]
pub(crate) struct RpcClient {
    endpoint: Endpoint,
    requests: mpsc::UnboundedSender<OutgoingInvocation>,
    runtime: Handle,
}

impl RpcClient {
    /// Validates `endpoint` and starts connecting in the background.
    ///
    /// Only a malformed address (or a missing runtime) is reported here; an
    /// unreachable backend shows up as a failed invocation later.
    pub(crate) fn connect(endpoint: &str) -> Result<Self, RpcError> {
        Self::connect_with_log(endpoint, crate::append_rpc_log)
    }

    pub(crate) fn connect_with_log(endpoint: &str, log: fn(&str)) -> Result<Self, RpcError> {
        let endpoint = Endpoint::parse(endpoint)?;
        let runtime = Handle::try_current().map_err(|_| RpcError::NoRuntime)?;
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();

        let driver = ConnectionDriver {
            endpoint: endpoint.clone(),
            requests: requests_rx,
            next_id: 1,
            pending: HashMap::new(),
            log,
        };
        runtime.spawn(driver.run());

        Ok(Self {
            endpoint,
            requests: requests_tx,
            runtime,
        })
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Queues an invocation and returns a handle that resolves to its result.
    pub(crate) fn invoke_pending(&self, procedure: &str, args: Vec<Value>) -> PendingInvocation {
        let (reply_tx, reply_rx) = oneshot::channel();
        let pending = PendingInvocation { reply_rx };

        if procedure.trim().is_empty() {
            let _ = reply_tx.send(Err(RpcError::EmptyProcedure));
            return pending;
        }

        let outgoing = OutgoingInvocation {
            procedure: procedure.to_string(),
            args,
            reply_tx,
        };
        if let Err(mpsc::error::SendError(outgoing)) = self.requests.send(outgoing) {
            let _ = outgoing.reply_tx.send(Err(RpcError::Closed));
        }
        pending
    }

    /// Queues an invocation and calls `on_complete` with its result on the
    /// client's runtime. Returns without waiting.
    pub(crate) fn invoke<F>(&self, procedure: &str, args: Vec<Value>, on_complete: F)
    where
        F: FnOnce(InvocationResult) + Send + 'static,
    {
        let pending = self.invoke_pending(procedure, args);
        self.runtime.spawn(async move {
            on_complete(pending.wait().await);
        });
    }
}

/// Result of an invocation that has been sent but not yet answered.
#[derive(Debug)]
pub(crate) struct PendingInvocation {
    reply_rx: oneshot::Receiver<InvocationResult>,
}

impl PendingInvocation {
    pub(crate) async fn wait(self) -> InvocationResult {
        self.reply_rx.await.unwrap_or(Err(RpcError::Closed))
    }

    /// Waits at most `timeout`; `None` waits for as long as the backend takes.
    pub(crate) async fn wait_with_timeout(self, timeout: Option<Duration>) -> InvocationResult {
        let Some(limit) = timeout else {
            return self.wait().await;
        };
        match tokio::time::timeout(limit, self.wait()).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::TimedOut(limit)),
        }
    }
}

enum ServeExit {
    RequestsClosed,
    TransportLost(String),
}

struct ConnectionDriver {
    endpoint: Endpoint,
    requests: mpsc::UnboundedReceiver<OutgoingInvocation>,
    next_id: u64,
    pending: HashMap<u64, oneshot::Sender<InvocationResult>>,
    log: fn(&str),
}

impl ConnectionDriver {
    async fn run(mut self) {
        let mut connect_eagerly = true;
        loop {
            let mut first_request = None;
            if !connect_eagerly {
                match self.requests.recv().await {
                    Some(request) => first_request = Some(request),
                    None => break,
                }
            }
            connect_eagerly = false;

            let stream = match TcpStream::connect(self.endpoint.socket_address()).await {
                Ok(stream) => stream,
                Err(error) => {
                    let reason = error.to_string();
                    (self.log)(&format!("backend {} unreachable: {reason}", self.endpoint));
                    if let Some(request) = first_request {
                        let _ = request.reply_tx.send(Err(RpcError::Unreachable {
                            endpoint: self.endpoint.to_string(),
                            reason,
                        }));
                    }
                    continue;
                }
            };
            (self.log)(&format!("connected to backend {}", self.endpoint));

            match self.serve(stream, first_request).await {
                ServeExit::RequestsClosed => break,
                ServeExit::TransportLost(reason) => {
                    (self.log)(&format!(
                        "connection to backend {} lost: {reason}",
                        self.endpoint
                    ));
                    self.fail_pending(&reason);
                }
            }
        }
        (self.log)(&format!("rpc driver for {} stopped", self.endpoint));
    }

    async fn serve(
        &mut self,
        stream: TcpStream,
        first_request: Option<OutgoingInvocation>,
    ) -> ServeExit {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let mut requests_open = true;

        if let Some(request) = first_request {
            if let Err(reason) = self.send(&mut write_half, request).await {
                return ServeExit::TransportLost(reason);
            }
        }

        loop {
            if !requests_open && self.pending.is_empty() {
                return ServeExit::RequestsClosed;
            }

            tokio::select! {
                request = self.requests.recv(), if requests_open => match request {
                    Some(request) => {
                        if let Err(reason) = self.send(&mut write_half, request).await {
                            return ServeExit::TransportLost(reason);
                        }
                    }
                    None => requests_open = false,
                },
                line = lines.next_line() => match line {
                    Ok(Some(line)) => self.dispatch_reply(&line),
                    Ok(None) => {
                        return ServeExit::TransportLost("backend closed the connection".to_string());
                    }
                    Err(error) => return ServeExit::TransportLost(error.to_string()),
                },
            }
        }
    }

    async fn send(
        &mut self,
        writer: &mut OwnedWriteHalf,
        request: OutgoingInvocation,
    ) -> Result<(), String> {
        let id = self.next_id;
        self.next_id += 1;

        let event = WireEvent::request(id, &request.procedure, request.args);
        let frame = match rpc_protocol::encode_event(&event) {
            Ok(frame) => frame,
            Err(reason) => {
                let _ = request.reply_tx.send(Err(RpcError::Protocol(reason)));
                return Ok(());
            }
        };

        self.pending.insert(id, request.reply_tx);
        writer
            .write_all(&frame)
            .await
            .map_err(|error| format!("failed to send '{}': {error}", event.name))
    }

    fn dispatch_reply(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }

        let raw: Value = match serde_json::from_str(line.trim()) {
            Ok(raw) => raw,
            Err(error) => {
                (self.log)(&format!("dropping undecodable rpc reply: {error}"));
                return;
            }
        };
        let Some(id) = rpc_protocol::event_id(&raw) else {
            (self.log)(&format!("dropping rpc reply without an id: {raw}"));
            return;
        };
        let Some(reply_tx) = self.pending.remove(&id) else {
            (self.log)(&format!("dropping rpc reply for unknown invocation {id}"));
            return;
        };

        // The id is ours, so a reply that does not decode still completes it.
        let result = match rpc_protocol::decode_event_value(raw)
            .and_then(rpc_protocol::classify_reply)
        {
            Ok(ReplyOutcome::Success(reply)) => Ok(reply),
            Ok(ReplyOutcome::RemoteError { name, message }) => {
                Err(RpcError::Remote { name, message })
            }
            Err(reason) => Err(RpcError::Protocol(reason)),
        };
        let _ = reply_tx.send(result);
    }

    fn fail_pending(&mut self, reason: &str) {
        for (_, reply_tx) in self.pending.drain() {
            let _ = reply_tx.send(Err(RpcError::ConnectionLost {
                endpoint: self.endpoint.to_string(),
                reason: reason.to_string(),
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::TcpListener,
        sync::oneshot,
    };

    use super::*;
    use crate::rpc_protocol::{decode_event, encode_event, REPLY_ERR, REPLY_OK, REPLY_STREAM};

    fn quiet_log(_: &str) {}

    /// Answers `hello` by echoing its last argument and every other
    /// procedure with an `ERR` reply.
    async fn spawn_echo_backend() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind echo backend");
        let address = listener.local_addr().expect("echo backend address");
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (read_half, mut write_half) = stream.into_split();
                    let mut lines = BufReader::new(read_half).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let request = decode_event(&line).expect("decode request");
                        let reply = if request.name == "hello" {
                            let value = request.args.last().cloned().unwrap_or(Value::Null);
                            WireEvent::reply(request.id, REPLY_OK, vec![value])
                        } else {
                            WireEvent::reply(
                                request.id,
                                REPLY_ERR,
                                vec![
                                    json!("NameError"),
                                    json!(format!("No such method: {}", request.name)),
                                ],
                            )
                        };
                        let frame = encode_event(&reply).expect("encode reply");
                        if write_half.write_all(&frame).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        format!("tcp://{address}")
    }

    /// Answers each request with the raw reply lines `script` returns.
    async fn spawn_scripted_backend(script: fn(&WireEvent) -> Vec<Value>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind scripted backend");
        let address = listener.local_addr().expect("scripted backend address");
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (read_half, mut write_half) = stream.into_split();
                    let mut lines = BufReader::new(read_half).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let request = decode_event(&line).expect("decode request");
                        for reply in script(&request) {
                            let frame = format!("{reply}\n");
                            if write_half.write_all(frame.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });
        format!("tcp://{address}")
    }

    async fn unused_endpoint() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind unused port");
        let address = listener.local_addr().expect("unused port address");
        drop(listener);
        format!("tcp://{address}")
    }

    #[tokio::test]
    async fn hello_round_trips_against_echo_backend() {
        let endpoint = spawn_echo_backend().await;
        let client = RpcClient::connect_with_log(&endpoint, quiet_log).expect("connect");

        let result = client
            .invoke_pending("hello", vec![json!("RPC")])
            .wait_with_timeout(Some(Duration::from_secs(5)))
            .await;

        assert_eq!(
            result,
            Ok(Reply {
                value: json!("RPC"),
                more: false,
            })
        );
    }

    #[tokio::test]
    async fn invoke_delivers_result_through_callback() {
        let endpoint = spawn_echo_backend().await;
        let client = RpcClient::connect_with_log(&endpoint, quiet_log).expect("connect");
        let (done_tx, done_rx) = oneshot::channel();

        client.invoke("hello", vec![json!("RPC")], move |result| {
            let _ = done_tx.send(result);
        });

        let result = tokio::time::timeout(Duration::from_secs(5), done_rx)
            .await
            .expect("callback should fire")
            .expect("callback sender kept alive");
        assert_eq!(result.map(|reply| reply.value), Ok(json!("RPC")));
    }

    #[tokio::test]
    async fn connect_to_unreachable_backend_does_not_fail_synchronously() {
        let endpoint = unused_endpoint().await;
        let client = RpcClient::connect_with_log(&endpoint, quiet_log);
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn unreachable_backend_fails_each_invocation_once() {
        let endpoint = unused_endpoint().await;
        let client = RpcClient::connect_with_log(&endpoint, quiet_log).expect("connect");
        let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();

        for _ in 0..2 {
            let done_tx = done_tx.clone();
            client.invoke("hello", vec![json!("RPC")], move |result| {
                let _ = done_tx.send(result);
            });
        }
        drop(done_tx);

        let mut results = Vec::new();
        while let Some(result) =
            tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
                .await
                .expect("completion should arrive")
        {
            results.push(result);
        }

        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|result| matches!(result, Err(RpcError::Unreachable { .. }))));
    }

    #[tokio::test]
    async fn remote_error_is_delivered_as_failure() {
        let endpoint = spawn_echo_backend().await;
        let client = RpcClient::connect_with_log(&endpoint, quiet_log).expect("connect");

        let result = client
            .invoke_pending("goodbye", vec![])
            .wait_with_timeout(Some(Duration::from_secs(5)))
            .await;

        assert_eq!(
            result,
            Err(RpcError::Remote {
                name: "NameError".to_string(),
                message: "No such method: goodbye".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn undecodable_reply_fails_the_matching_invocation() {
        let endpoint = spawn_scripted_backend(|request| {
            vec![json!({ "v": 2, "id": request.id, "name": REPLY_OK, "args": ["RPC"] })]
        })
        .await;
        let client = RpcClient::connect_with_log(&endpoint, quiet_log).expect("connect");

        let result = client
            .invoke_pending("hello", vec![json!("RPC")])
            .wait_with_timeout(Some(Duration::from_secs(5)))
            .await;

        assert!(
            matches!(&result, Err(RpcError::Protocol(reason)) if reason.contains("version 2")),
            "unexpected result: {result:?}"
        );
    }

    #[tokio::test]
    async fn stream_completes_once_and_stray_replies_are_dropped() {
        let endpoint = spawn_scripted_backend(|request| {
            if request.name == "hello" {
                return vec![
                    json!({ "v": 1, "id": request.id, "name": REPLY_OK, "args": request.args }),
                ];
            }
            let id = request.id;
            vec![
                json!({ "v": 1, "id": id + 1000, "name": REPLY_OK, "args": ["stray"] }),
                json!({ "v": 1, "id": id, "name": REPLY_STREAM, "args": [1] }),
                json!({ "v": 1, "id": id, "name": REPLY_STREAM, "args": [2] }),
                json!({ "v": 1, "id": id, "name": REPLY_OK, "args": [3] }),
                json!({ "name": REPLY_OK, "args": ["no id"] }),
            ]
        })
        .await;
        let client = RpcClient::connect_with_log(&endpoint, quiet_log).expect("connect");
        let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();

        client.invoke("count", vec![], move |result| {
            let _ = done_tx.send(result);
        });
        let first = tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
            .await
            .expect("stream completion should arrive");
        assert_eq!(
            first,
            Some(Ok(Reply {
                value: json!(1),
                more: true,
            }))
        );

        // Replies are read in order, so the trailing chunks were handled first.
        let follow_up = client
            .invoke_pending("hello", vec![json!("still here")])
            .wait_with_timeout(Some(Duration::from_secs(5)))
            .await;
        assert_eq!(follow_up.map(|reply| reply.value), Ok(json!("still here")));

        let second = tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
            .await
            .expect("callback sender should be dropped after one completion");
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn concurrent_invocations_are_matched_by_id() {
        let endpoint = spawn_echo_backend().await;
        let client = RpcClient::connect_with_log(&endpoint, quiet_log).expect("connect");

        let first = client.invoke_pending("hello", vec![json!("first")]);
        let second = client.invoke_pending("hello", vec![json!("second")]);

        let (first, second) = tokio::join!(first.wait(), second.wait());
        assert_eq!(first.map(|reply| reply.value), Ok(json!("first")));
        assert_eq!(second.map(|reply| reply.value), Ok(json!("second")));
    }

    #[tokio::test]
    async fn empty_procedure_is_rejected_without_reaching_backend() {
        let endpoint = unused_endpoint().await;
        let client = RpcClient::connect_with_log(&endpoint, quiet_log).expect("connect");

        let result = client.invoke_pending("  ", vec![]).wait().await;
        assert_eq!(result, Err(RpcError::EmptyProcedure));
    }

    #[tokio::test]
    async fn silent_backend_is_bounded_only_by_caller_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind silent backend");
        let address = listener.local_addr().expect("silent backend address");
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let client =
            RpcClient::connect_with_log(&format!("tcp://{address}"), quiet_log).expect("connect");
        let limit = Duration::from_millis(200);
        let result = client
            .invoke_pending("hello", vec![json!("RPC")])
            .wait_with_timeout(Some(limit))
            .await;

        assert_eq!(result, Err(RpcError::TimedOut(limit)));
    }

    #[tokio::test]
    async fn malformed_endpoint_fails_synchronously() {
        assert!(matches!(
            RpcClient::connect_with_log("udp://127.0.0.1:4242", quiet_log),
            Err(RpcError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn connect_outside_runtime_is_reported() {
        assert_eq!(
            RpcClient::connect_with_log("tcp://127.0.0.1:4242", quiet_log).map(|_| ()),
            Err(RpcError::NoRuntime)
        );
    }
}
