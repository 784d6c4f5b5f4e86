//! Remote connection manager
//!
//! Owns the agent's side of the tunnel: connect, authenticate, serve calls,
//! and fall back to backoff when anything goes wrong.
//!
//! ```text
//! Disconnected ──▶ Connecting ──▶ Authenticating ──▶ Online
//!      ▲               │                │              │
//!      └───────────────┴────────────────┴──────────────┘
//!                    (error, rejection, idle)
//! ```
//!
//! Calls execute concurrently in their own tasks and are tracked in a
//! [`CorrelationRegistry`] until answered. Results that complete while the
//! tunnel is down wait in the [`OfflineQueue`] and are flushed, oldest
//! first, as soon as the next handshake succeeds.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use kb_core::config::AgentConfig;
use kb_core::error::ConnectionError;
use kb_core::time::deadline_after;
use kb_core::{CallError, ConnectionState, CorrelationRegistry, LocalRouter, Waiter};
use kb_protocol::{
    CallEnvelope, Message, ProtocolError, ResultEnvelope, Status, PROTOCOL_VERSION,
};

use super::connector::{Connector, Transport};
use super::reconnect::ExponentialBackoff;
use crate::metrics::AgentMetrics;
use crate::queue::OfflineQueue;
use crate::router::error_reply;

/// Completed results waiting for the manager loop.
///
/// Call tasks block on this channel only while the manager is busy opening a
/// transport; every other state drains it.
const RESULT_CHANNEL_CAPACITY: usize = 256;

/// How often running calls are checked against their deadline
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Timeout for operations the router has no route for
const FALLBACK_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// How long shutdown waits for abandoned calls to be answered
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(1);

/// Drives one agent's tunnel to the hub
pub struct ConnectionManager<C> {
    config: AgentConfig,
    connector: C,
    router: Arc<dyn LocalRouter>,
    registry: Arc<CorrelationRegistry>,
    metrics: Arc<AgentMetrics>,
    queue: OfflineQueue,
    backoff: ExponentialBackoff,
    state_tx: watch::Sender<ConnectionState>,
    results_tx: mpsc::Sender<ResultEnvelope>,
    results_rx: mpsc::Receiver<ResultEnvelope>,
    cancel: CancellationToken,
    ever_online: bool,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(config: AgentConfig, connector: C, router: Arc<dyn LocalRouter>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (results_tx, results_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);

        Self {
            queue: OfflineQueue::new(config.offline_queue_capacity),
            backoff: ExponentialBackoff::from_config(&config.backoff),
            config,
            connector,
            router,
            registry: Arc::new(CorrelationRegistry::new()),
            metrics: Arc::new(AgentMetrics::new()),
            state_tx,
            results_tx,
            results_rx,
            cancel: CancellationToken::new(),
            ever_online: false,
        }
    }

    /// Subscribe to state transitions
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn metrics(&self) -> Arc<AgentMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Cancelling this token moves the manager to `Shutdown`
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until shut down
    pub async fn run(mut self) {
        let cancel = self.cancel.clone();
        let sweeper = tokio::spawn(sweep_expired(
            Arc::clone(&self.registry),
            cancel.clone(),
        ));

        loop {
            self.set_state(ConnectionState::Connecting);

            let attempt = tokio::select! {
                _ = cancel.cancelled() => break,
                attempt = self.establish() => attempt,
            };

            match attempt {
                Ok(transport) => {
                    if self.ever_online {
                        self.metrics.reconnected();
                    }
                    self.ever_online = true;
                    self.backoff.reset();
                    self.set_state(ConnectionState::Online);
                    tracing::info!("Connected to hub at {}", self.connector.endpoint());

                    let reason = self.serve(transport).await;
                    tracing::warn!("Tunnel closed: {}", reason);
                }
                Err(e) => {
                    self.record_failure(&e);
                    tracing::warn!("Connection to {} failed: {}", self.connector.endpoint(), e);
                }
            }

            if cancel.is_cancelled() {
                break;
            }

            self.set_state(ConnectionState::Disconnected);
            let delay = self.backoff.next_delay();
            tracing::info!("Reconnecting in {:?}", delay);
            if !self.wait_offline(delay).await {
                break;
            }
        }

        self.set_state(ConnectionState::Shutdown);
        let abandoned = self.registry.fail_all(CallError::Disconnected);
        if abandoned > 0 || !self.queue.is_empty() {
            tracing::warn!(
                "Shutting down offline: {} running calls abandoned, {} queued results discarded",
                abandoned,
                self.queue.len()
            );
        }
        let _ = sweeper.await;
        tracing::info!("Connection manager stopped");
    }

    /// Connect and complete the handshake
    async fn establish(&mut self) -> Result<Transport, ConnectionError> {
        let mut transport = self.connector.connect().await?;

        self.set_state(ConnectionState::Authenticating);
        transport.send(self.hello()).await.map_err(transport_error)?;

        let reply = tokio::time::timeout(self.config.handshake_timeout, transport.next())
            .await
            .map_err(|_| ConnectionError::HandshakeTimeout)?;

        match reply {
            Some(Ok(Message::HelloAck { accepted: true, .. })) => Ok(transport),
            Some(Ok(Message::HelloAck {
                accepted: false,
                reason,
            })) => Err(ConnectionError::AuthenticationFailed(
                reason.unwrap_or_else(|| "credential rejected".to_string()),
            )),
            Some(Ok(other)) => Err(ConnectionError::ConnectionLost(format!(
                "expected HelloAck, got {:?}",
                other.message_type()
            ))),
            Some(Err(e)) => Err(transport_error(e)),
            None => Err(ConnectionError::ConnectionLost(
                "hub closed the connection during handshake".to_string(),
            )),
        }
    }

    fn hello(&self) -> Message {
        Message::Hello {
            credential: self.config.credential.clone(),
            version: PROTOCOL_VERSION.to_string(),
            hostname: gethostname::gethostname().to_string_lossy().into_owned(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    /// Duplex loop while online; returns why the tunnel closed
    async fn serve(&mut self, mut transport: Transport) -> String {
        if let Err(reason) = self.flush_queue(&mut transport).await {
            return reason;
        }

        let cancel = self.cancel.clone();
        let idle_timeout = self.config.idle_timeout;
        let idle = tokio::time::sleep(idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.drain_on_shutdown(&mut transport).await;
                    return "shutdown requested".to_string();
                }

                _ = &mut idle => {
                    return format!("nothing received for {:?}", idle_timeout);
                }

                frame = transport.next() => {
                    idle.as_mut().reset(Instant::now() + idle_timeout);

                    match frame {
                        Some(Ok(Message::Call(call))) => self.accept_call(call),
                        Some(Ok(Message::Heartbeat { timestamp })) => {
                            tracing::trace!("Heartbeat received, sending ack");
                            if let Err(e) = transport.send(Message::HeartbeatAck { timestamp }).await {
                                return format!("heartbeat ack failed: {}", e);
                            }
                        }
                        Some(Ok(other)) => {
                            self.metrics.protocol_error();
                            return format!("unexpected {:?} from hub", other.message_type());
                        }
                        Some(Err(ProtocolError::Io(e))) => {
                            return format!("read failed: {}", e);
                        }
                        Some(Err(e)) => {
                            self.metrics.protocol_error();
                            return format!("protocol violation: {}", e);
                        }
                        None => return "closed by hub".to_string(),
                    }
                }

                Some(result) = self.results_rx.recv() => {
                    let message = Message::Result(result);
                    if let Err(e) = transport.send(message.clone()).await {
                        self.enqueue(message);
                        return format!("send failed: {}", e);
                    }
                    self.metrics.result_sent();
                }
            }
        }
    }

    /// Send everything buffered while offline, oldest first
    async fn flush_queue(&mut self, transport: &mut Transport) -> Result<(), String> {
        if self.queue.is_empty() {
            return Ok(());
        }
        tracing::info!("Flushing {} queued results", self.queue.len());

        while let Some(entry) = self.queue.pop() {
            if let Err(e) = transport.send(entry.payload.clone()).await {
                if self.queue.requeue_front(entry).is_some() {
                    self.metrics.queue_dropped();
                }
                self.metrics.set_queue_depth(self.queue.len());
                return Err(format!("flush failed: {}", e));
            }
            tracing::debug!("Sent result queued {:?} ago", entry.enqueued_at.elapsed());
            self.metrics.result_sent();
            self.metrics.set_queue_depth(self.queue.len());
        }

        Ok(())
    }

    /// Wait out a backoff delay, queueing results as they complete.
    ///
    /// Returns false if shutdown was requested.
    async fn wait_offline(&mut self, delay: Duration) -> bool {
        let cancel = self.cancel.clone();
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = &mut sleep => return true,
                Some(result) = self.results_rx.recv() => self.enqueue(Message::Result(result)),
            }
        }
    }

    fn enqueue(&mut self, message: Message) {
        self.metrics.result_queued();
        if let Some(evicted) = self.queue.push(message) {
            self.metrics.queue_dropped();
            tracing::warn!(
                "Offline queue full ({}), dropped result queued {:?} ago",
                self.queue.capacity(),
                evicted.enqueued_at.elapsed()
            );
        }
        self.metrics.set_queue_depth(self.queue.len());
    }

    /// Register an inbound call and run it in its own task
    fn accept_call(&self, call: CallEnvelope) {
        self.metrics.call_received();

        let timeout = self
            .router
            .timeout_for(&call.operation)
            .unwrap_or(FALLBACK_CALL_TIMEOUT);
        let deadline = deadline_after(timeout + self.config.call_grace);

        let waiter = match self.registry.register(call.call_id, deadline) {
            Ok(waiter) => waiter,
            Err(e) => {
                self.metrics.duplicate_call();
                tracing::warn!("Ignoring call for {}: {}", call.operation, e);
                return;
            }
        };

        tracing::debug!("Call {} {} {}", call.call_id, call.method, call.operation);
        tokio::spawn(answer_call(
            Arc::clone(&self.router),
            Arc::clone(&self.registry),
            Arc::clone(&self.metrics),
            self.results_tx.clone(),
            waiter,
            call,
            timeout,
        ));
    }

    /// Answer calls abandoned by shutdown before closing the transport
    async fn drain_on_shutdown(&mut self, transport: &mut Transport) {
        let abandoned = self.registry.fail_all(CallError::Disconnected);
        let deadline = Instant::now() + SHUTDOWN_DRAIN;

        let mut answered = 0;
        while answered < abandoned {
            match tokio::time::timeout_at(deadline, self.results_rx.recv()).await {
                Ok(Some(result)) => {
                    if transport.send(Message::Result(result)).await.is_err() {
                        break;
                    }
                    self.metrics.result_sent();
                    answered += 1;
                }
                _ => break,
            }
        }

        if abandoned > 0 {
            tracing::info!("Answered {}/{} running calls on shutdown", answered, abandoned);
        }
        let _ = transport.close().await;
    }

    fn record_failure(&self, error: &ConnectionError) {
        match error {
            ConnectionError::AuthenticationFailed(_) => self.metrics.auth_rejected(),
            ConnectionError::Protocol(_) => self.metrics.protocol_error(),
            _ => {}
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!("Connection state {} -> {}", previous, state);
        }
    }
}

/// I/O failures are lost connections, anything else is a protocol violation
fn transport_error(error: ProtocolError) -> ConnectionError {
    match error {
        ProtocolError::Io(e) => ConnectionError::ConnectionLost(e.to_string()),
        other => ConnectionError::Protocol(other),
    }
}

/// Run one call against the local router and report its result.
///
/// The router's reply goes through the registry like any other terminal
/// event, so an overrun already answered by the sweeper stays answered once.
async fn answer_call(
    router: Arc<dyn LocalRouter>,
    registry: Arc<CorrelationRegistry>,
    metrics: Arc<AgentMetrics>,
    results: mpsc::Sender<ResultEnvelope>,
    waiter: Waiter,
    call: CallEnvelope,
    timeout: Duration,
) {
    let call_id = call.call_id;
    let wait = waiter.wait();
    tokio::pin!(wait);

    let outcome = tokio::select! {
        outcome = &mut wait => outcome,
        reply = router.invoke(&call, timeout) => {
            registry.resolve(ResultEnvelope::new(call_id, reply));
            wait.await
        }
    };

    let result = match outcome {
        Ok(result) => result,
        Err(CallError::Timeout) => {
            tracing::warn!("Call {} ({}) overran {:?}", call_id, call.operation, timeout);
            ResultEnvelope::new(
                call_id,
                error_reply(
                    "timeout",
                    &format!("local invocation exceeded {:?}", timeout),
                ),
            )
        }
        Err(e) => ResultEnvelope::new(call_id, error_reply("disconnected", &e.to_string())),
    };

    if result.status == Status::Error {
        metrics.error_result();
    }
    if results.send(result).await.is_err() {
        tracing::debug!("Manager stopped, result for {} dropped", call_id);
    }
}

/// Expire calls whose local invocation overran
async fn sweep_expired(registry: Arc<CorrelationRegistry>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let expired = registry.expire(Instant::now());
                if expired > 0 {
                    tracing::debug!("Expired {} overrunning calls", expired);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::connector::framed;
    use async_trait::async_trait;
    use bytes::Bytes;
    use kb_protocol::{CallId, Headers, Method, Reply};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WAIT: Duration = Duration::from_secs(5);

    /// Hands the hub side of an in-memory pipe to the test
    struct PipeConnector {
        hub_side: mpsc::UnboundedSender<Transport>,
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for PipeConnector {
        async fn connect(&self) -> Result<Transport, ConnectionError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let (agent, hub) = tokio::io::duplex(64 * 1024);
            self.hub_side
                .send(framed(hub))
                .map_err(|_| ConnectionError::ConnectionRefused("test hub gone".to_string()))?;
            Ok(framed(agent))
        }

        fn endpoint(&self) -> String {
            "pipe".to_string()
        }
    }

    struct StubRouter {
        delay: Duration,
        timeout: Option<Duration>,
    }

    #[async_trait]
    impl LocalRouter for StubRouter {
        async fn invoke(&self, _call: &CallEnvelope, _timeout: Duration) -> Reply {
            tokio::time::sleep(self.delay).await;
            Reply::ok(r#"{"tx":"T1"}"#)
        }

        fn timeout_for(&self, _operation: &str) -> Option<Duration> {
            self.timeout
        }
    }

    struct Harness {
        hubs: mpsc::UnboundedReceiver<Transport>,
        attempts: Arc<AtomicUsize>,
        state: watch::Receiver<ConnectionState>,
        metrics: Arc<AgentMetrics>,
        shutdown: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn test_config() -> AgentConfig {
        let mut config = AgentConfig {
            credential: "secret".to_string(),
            handshake_timeout: Duration::from_secs(2),
            call_grace: Duration::ZERO,
            ..Default::default()
        };
        config.backoff.initial = Duration::from_millis(20);
        config.backoff.max = Duration::from_millis(100);
        config.backoff.jitter = 0.0;
        config
    }

    fn start(config: AgentConfig, router: StubRouter) -> Harness {
        let (hub_tx, hubs) = mpsc::unbounded_channel();
        let attempts = Arc::new(AtomicUsize::new(0));
        let connector = PipeConnector {
            hub_side: hub_tx,
            attempts: Arc::clone(&attempts),
        };

        let manager = ConnectionManager::new(config, connector, Arc::new(router));
        let state = manager.state();
        let metrics = manager.metrics();
        let shutdown = manager.shutdown_token();
        let task = tokio::spawn(manager.run());

        Harness {
            hubs,
            attempts,
            state,
            metrics,
            shutdown,
            task,
        }
    }

    fn fast_router() -> StubRouter {
        StubRouter {
            delay: Duration::ZERO,
            timeout: Some(Duration::from_secs(5)),
        }
    }

    /// Accept the next connection as the hub
    async fn accept(harness: &mut Harness, accepted: bool) -> Transport {
        let mut hub = tokio::time::timeout(WAIT, harness.hubs.recv())
            .await
            .unwrap()
            .unwrap();
        match hub.next().await.unwrap().unwrap() {
            Message::Hello {
                credential,
                version,
                ..
            } => {
                assert_eq!(credential, "secret");
                assert_eq!(version, PROTOCOL_VERSION);
            }
            other => panic!("expected Hello, got {:?}", other),
        }
        hub.send(Message::HelloAck {
            accepted,
            reason: (!accepted).then(|| "unknown credential".to_string()),
        })
        .await
        .unwrap();
        hub
    }

    async fn next_result(hub: &mut Transport) -> ResultEnvelope {
        match tokio::time::timeout(WAIT, hub.next()).await.unwrap() {
            Some(Ok(Message::Result(result))) => result,
            other => panic!("expected Result, got {:?}", other),
        }
    }

    async fn wait_for_state(harness: &mut Harness, state: ConnectionState) {
        tokio::time::timeout(WAIT, harness.state.wait_for(|s| *s == state))
            .await
            .unwrap()
            .unwrap();
    }

    fn payment_call() -> CallEnvelope {
        CallEnvelope::new(
            CallId::generate(),
            "payment",
            Method::Post,
            Headers::new(),
            Bytes::from_static(br#"{"order_id":1}"#),
        )
    }

    #[tokio::test]
    async fn test_call_is_routed_and_answered() {
        let mut harness = start(test_config(), fast_router());
        let mut hub = accept(&mut harness, true).await;
        wait_for_state(&mut harness, ConnectionState::Online).await;

        let call = payment_call();
        hub.send(Message::Call(call.clone())).await.unwrap();

        let result = next_result(&mut hub).await;
        assert_eq!(result.call_id, call.call_id);
        assert_eq!(result.status, Status::Ok);
        assert_eq!(&result.body[..], br#"{"tx":"T1"}"#);

        hub.send(Message::Heartbeat { timestamp: 42 }).await.unwrap();
        assert_eq!(
            tokio::time::timeout(WAIT, hub.next()).await.unwrap().unwrap().unwrap(),
            Message::HeartbeatAck { timestamp: 42 }
        );

        let counters = harness.metrics.snapshot();
        assert_eq!(counters.calls_received, 1);
        assert_eq!(counters.results_sent, 1);

        harness.shutdown.cancel();
        harness.task.await.unwrap();
        assert_eq!(*harness.state.borrow(), ConnectionState::Shutdown);
    }

    #[tokio::test]
    async fn test_rejected_credential_backs_off_and_retries() {
        let mut harness = start(test_config(), fast_router());

        let _rejected = accept(&mut harness, false).await;
        let _hub = accept(&mut harness, true).await;
        wait_for_state(&mut harness, ConnectionState::Online).await;

        assert_eq!(harness.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(harness.metrics.snapshot().auth_rejections, 1);

        harness.shutdown.cancel();
        harness.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_result_completed_offline_is_flushed_after_reconnect() {
        let router = StubRouter {
            delay: Duration::from_millis(200),
            timeout: Some(Duration::from_secs(5)),
        };
        // Backoff outlasts the call, so it completes while offline
        let mut config = test_config();
        config.backoff.initial = Duration::from_millis(500);
        config.backoff.max = Duration::from_secs(1);
        let mut harness = start(config, router);

        let mut hub = accept(&mut harness, true).await;
        let call = payment_call();
        hub.send(Message::Call(call.clone())).await.unwrap();
        drop(hub);

        let mut hub = accept(&mut harness, true).await;

        let result = next_result(&mut hub).await;
        assert_eq!(result.call_id, call.call_id);
        assert_eq!(result.status, Status::Ok);

        let counters = harness.metrics.snapshot();
        assert_eq!(counters.results_queued, 1);
        assert_eq!(counters.reconnections, 1);
        assert_eq!(harness.metrics.queue_depth(), 0);

        harness.shutdown.cancel();
        harness.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_inbound_call_is_ignored() {
        let router = StubRouter {
            delay: Duration::from_millis(100),
            timeout: Some(Duration::from_secs(5)),
        };
        let mut harness = start(test_config(), router);
        let mut hub = accept(&mut harness, true).await;

        let call = payment_call();
        hub.send(Message::Call(call.clone())).await.unwrap();
        hub.send(Message::Call(call.clone())).await.unwrap();

        let result = next_result(&mut hub).await;
        assert_eq!(result.call_id, call.call_id);
        assert!(tokio::time::timeout(Duration::from_millis(300), hub.next())
            .await
            .is_err());
        assert_eq!(harness.metrics.snapshot().duplicate_calls, 1);

        harness.shutdown.cancel();
        harness.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_overrunning_call_answered_with_timeout() {
        let router = StubRouter {
            delay: Duration::from_secs(3600),
            timeout: Some(Duration::from_millis(50)),
        };
        let mut harness = start(test_config(), router);
        let mut hub = accept(&mut harness, true).await;

        let call = payment_call();
        hub.send(Message::Call(call.clone())).await.unwrap();

        let result = next_result(&mut hub).await;
        assert_eq!(result.call_id, call.call_id);
        assert_eq!(result.status, Status::Error);
        let body: serde_json::Value = serde_json::from_slice(&result.body).unwrap();
        assert_eq!(body["error"], "timeout");
        assert_eq!(harness.metrics.snapshot().error_results, 1);

        harness.shutdown.cancel();
        harness.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_answers_running_calls() {
        let router = StubRouter {
            delay: Duration::from_secs(3600),
            timeout: Some(Duration::from_secs(3600)),
        };
        let mut harness = start(test_config(), router);
        let mut hub = accept(&mut harness, true).await;

        let call = payment_call();
        hub.send(Message::Call(call.clone())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        harness.shutdown.cancel();
        let result = next_result(&mut hub).await;
        assert_eq!(result.call_id, call.call_id);
        assert_eq!(result.status, Status::Error);

        harness.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unexpected_frame_while_online_reconnects() {
        let mut harness = start(test_config(), fast_router());
        let mut hub = accept(&mut harness, true).await;
        wait_for_state(&mut harness, ConnectionState::Online).await;

        // Hubs never send Hello
        hub.send(Message::Hello {
            credential: "secret".to_string(),
            version: PROTOCOL_VERSION.to_string(),
            hostname: "hub".to_string(),
            os: "linux".to_string(),
            arch: "x86_64".to_string(),
        })
        .await
        .unwrap();
        assert!(matches!(
            tokio::time::timeout(WAIT, hub.next()).await.unwrap(),
            None | Some(Err(_))
        ));

        let _hub = accept(&mut harness, true).await;
        wait_for_state(&mut harness, ConnectionState::Online).await;

        assert_eq!(harness.attempts.load(Ordering::SeqCst), 2);
        let counters = harness.metrics.snapshot();
        assert_eq!(counters.protocol_errors, 1);
        assert_eq!(counters.reconnections, 1);

        harness.shutdown.cancel();
        harness.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_channel_is_torn_down() {
        let mut config = test_config();
        config.idle_timeout = Duration::from_millis(200);
        let mut harness = start(config, fast_router());

        let _silent = accept(&mut harness, true).await;
        let _hub = accept(&mut harness, true).await;
        assert_eq!(harness.attempts.load(Ordering::SeqCst), 2);

        harness.shutdown.cancel();
        harness.task.await.unwrap();
    }
}
