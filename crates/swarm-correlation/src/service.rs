//! Correlation engine service.
//!
//! Composes a matcher, the registry, the expiry sweeper and a transport into
//! the request/reply flow a virtual user drives:
//!
//! 1. `send()` stamps the request, registers it, then hands it to the transport
//! 2. Listener tasks drain the inbound transport through `on_inbound()`
//! 3. The sweeper times out whatever nobody answered
//! 4. `shutdown()` stops the background tasks and cancels what is left

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::field::{self, display, Empty};
use tracing::{debug, info, instrument, warn, Span};

use crate::dispatcher::{Continuation, ContinuationDispatcher, TokioDispatcher};
use crate::domain::{
    CancelReason, Clock, CorrelationConfig, MessageHeaders, Outcome, Registration,
    ResolutionResult, VirtualUserId,
};
use crate::error::{CorrelationError, CorrelationResult};
use crate::events::CorrelationObserver;
use crate::matchers;
use crate::metrics::StatsSnapshot;
use crate::ports::{MessageMatcher, MessageReceiver, MessageSender};
use crate::registry::CorrelationRegistry;
use crate::sweeper::{ExpirySweeper, SweeperHandle};

/// Pause before polling a receiver again after it failed.
const RECEIVE_BACKOFF: Duration = Duration::from_millis(10);

/// Request/reply correlation over one transport.
///
/// Replies are the inbound messages themselves, so the registry is keyed on
/// the transport's message type `M`.
pub struct CorrelationEngine<M> {
    config: CorrelationConfig,
    registry: Arc<CorrelationRegistry<M>>,
    matcher: Arc<dyn MessageMatcher<M>>,
    sender: Arc<dyn MessageSender<M>>,
    sweeper: Mutex<Option<SweeperHandle>>,
    shutdown_tx: watch::Sender<bool>,
}

impl<M: Send + Sync + 'static> CorrelationEngine<M> {
    /// Start building an engine that sends through `sender`.
    pub fn builder(sender: Arc<dyn MessageSender<M>>) -> EngineBuilder<M> {
        EngineBuilder {
            sender,
            config: CorrelationConfig::default(),
            dispatcher: None,
            observer: None,
            clock: None,
        }
    }

    /// Prepare, register and send one request.
    ///
    /// `timeout` defaults to the configured reply timeout. On success the
    /// continuation will receive exactly one outcome. If the transport rejects
    /// the message, the registration is cancelled with
    /// [`CancelReason::SendFailed`] (so the continuation still sees its
    /// outcome) and the transport error is returned.
    ///
    /// # Errors
    ///
    /// - `ShuttingDown` after [`shutdown`](Self::shutdown); nothing is sent
    /// - `Matcher` if the request cannot be stamped; nothing is registered
    /// - `DuplicateCorrelation` / `InvalidTimeout` from the registry
    /// - `Transport` if the send failed
    #[instrument(name = "swarm.send", skip_all, fields(owner = ?owner, match_id = Empty))]
    pub async fn send(
        &self,
        mut message: M,
        continuation: Continuation<M>,
        timeout: Option<Duration>,
        owner: Option<VirtualUserId>,
    ) -> CorrelationResult<Registration> {
        if self.registry.is_closed() {
            return Err(CorrelationError::ShuttingDown);
        }
        self.matcher.prepare_request(&mut message)?;
        let match_id = self.matcher.request_match_id(&message)?;
        Span::current().record("match_id", display(&match_id));
        let timeout = timeout.unwrap_or(self.config.default_timeout);

        let registration = match owner {
            Some(owner) => self
                .registry
                .register_for(owner, match_id, continuation, timeout)?,
            None => self.registry.register(match_id, continuation, timeout)?,
        };

        if let Err(e) = self.sender.send(message).await {
            warn!(
                match_id = %registration.match_id,
                error = %e,
                "Send failed, cancelling registration"
            );
            self.registry.cancel(
                &registration.match_id,
                CancelReason::SendFailed(e.to_string()),
            );
            return Err(e.into());
        }

        Ok(registration)
    }

    /// Send a request and wait for its outcome.
    pub async fn request(
        &self,
        message: M,
        timeout: Option<Duration>,
    ) -> CorrelationResult<Outcome<M>> {
        let (continuation, outcome) = Continuation::channel();
        self.send(message, continuation, timeout, None).await?;
        outcome
            .await
            .map_err(|_| CorrelationError::ContinuationDropped)
    }

    /// Route one inbound message to the request it answers.
    ///
    /// A message whose match id cannot be extracted is counted as a malformed
    /// orphan and dropped.
    #[instrument(name = "swarm.inbound", skip_all, fields(match_id = Empty, result = Empty))]
    pub fn on_inbound(&self, message: M) -> ResolutionResult {
        match self.matcher.response_match_id(&message) {
            Ok(match_id) => {
                let span = Span::current();
                span.record("match_id", display(&match_id));
                let result = self.registry.resolve(&match_id, message);
                span.record("result", field::debug(result));
                result
            }
            Err(e) => {
                self.registry.record_malformed(&e);
                ResolutionResult::Orphan
            }
        }
    }

    /// Start `listener_count` tasks draining `receiver` into [`on_inbound`].
    ///
    /// Listeners exit when the receiver is exhausted or the engine shuts down.
    ///
    /// [`on_inbound`]: Self::on_inbound
    pub fn spawn_listeners(
        self: &Arc<Self>,
        receiver: Arc<dyn MessageReceiver<M>>,
    ) -> Vec<JoinHandle<()>> {
        (0..self.config.listener_count)
            .map(|index| {
                let engine = Arc::clone(self);
                let receiver = Arc::clone(&receiver);
                let shutdown = self.shutdown_tx.subscribe();
                tokio::spawn(async move { engine.listen(index, receiver, shutdown).await })
            })
            .collect()
    }

    async fn listen(
        &self,
        index: usize,
        receiver: Arc<dyn MessageReceiver<M>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!(listener = index, "Listener started");
        while !*shutdown.borrow_and_update() {
            tokio::select! {
                received = receiver.receive() => match received {
                    Ok(Some(message)) => {
                        self.on_inbound(message);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(listener = index, error = %e, "Receive failed");
                        tokio::time::sleep(RECEIVE_BACKOFF).await;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(listener = index, "Listener stopped");
    }

    /// Stop the sweeper and listeners, then close the registry: everything
    /// still pending is cancelled with [`CancelReason::Shutdown`] and later
    /// sends fail with `ShuttingDown`. Returns the number cancelled.
    #[instrument(name = "swarm.shutdown", skip_all)]
    pub async fn shutdown(&self) -> usize {
        self.shutdown_tx.send_replace(true);
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }

        let cancelled = self.registry.close(CancelReason::Shutdown);
        info!(cancelled, "Correlation engine stopped");
        cancelled
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry<M>> {
        &self.registry
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    pub fn matcher_name(&self) -> &'static str {
        self.matcher.name()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.registry.stats()
    }
}

/// Builder for [`CorrelationEngine`].
pub struct EngineBuilder<M> {
    sender: Arc<dyn MessageSender<M>>,
    config: CorrelationConfig,
    dispatcher: Option<Arc<dyn ContinuationDispatcher<M>>>,
    observer: Option<Arc<dyn CorrelationObserver>>,
    clock: Option<Arc<dyn Clock>>,
}

impl<M: Send + Sync + 'static> EngineBuilder<M> {
    #[must_use]
    pub fn config(mut self, config: CorrelationConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to a [`TokioDispatcher`] on the current runtime.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Arc<dyn ContinuationDispatcher<M>>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn CorrelationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build with the matcher selected by `config.match_strategy`.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or no tokio runtime is running.
    pub fn build(self) -> CorrelationResult<CorrelationEngine<M>>
    where
        M: MessageHeaders,
    {
        let matcher = matchers::from_strategy(&self.config.match_strategy);
        self.build_with_matcher(matcher)
    }

    /// Build with a custom matcher, ignoring `config.match_strategy`.
    pub fn build_with_matcher(
        self,
        matcher: Arc<dyn MessageMatcher<M>>,
    ) -> CorrelationResult<CorrelationEngine<M>> {
        self.config.validate()?;
        let handle = Handle::try_current().map_err(|e| CorrelationError::NoRuntime(e.to_string()))?;

        let dispatcher = match self.dispatcher {
            Some(dispatcher) => dispatcher,
            None => Arc::new(TokioDispatcher::new(handle.clone())),
        };
        let mut registry = CorrelationRegistry::new(dispatcher);
        if let Some(clock) = self.clock {
            registry = registry.with_clock(clock);
        }
        if let Some(observer) = self.observer {
            registry = registry.with_observer(observer);
        }
        let registry = Arc::new(registry);

        let sweeper = ExpirySweeper::new(Arc::clone(&registry), self.config.sweeper.clone()).spawn();
        let (shutdown_tx, _) = watch::channel(false);

        info!(
            matcher = matcher.name(),
            default_timeout_ms = self.config.default_timeout.as_millis(),
            listeners = self.config.listener_count,
            "Correlation engine started"
        );

        Ok(CorrelationEngine {
            config: self.config,
            registry,
            matcher,
            sender: self.sender,
            sweeper: Mutex::new(Some(sweeper)),
            shutdown_tx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::InlineDispatcher;
    use crate::domain::{MatchStrategy, MqMessage, OutcomeKind, PropertyValue, ReplyConvention};
    use crate::error::{MatcherError, TransportError};
    use crate::ports::{channel, ChannelReceiver};

    fn config(strategy: MatchStrategy) -> CorrelationConfig {
        CorrelationConfig {
            default_timeout: Duration::from_millis(100),
            listener_count: 2,
            match_strategy: strategy,
            ..CorrelationConfig::default()
        }
    }

    /// Engine wired to an echo responder: every outbound request is answered
    /// on the inbound channel.
    fn echo_engine(strategy: MatchStrategy) -> Arc<CorrelationEngine<MqMessage>> {
        let (out_tx, out_rx) = channel::<MqMessage>(64);
        let (in_tx, in_rx) = channel::<MqMessage>(64);

        let convention = strategy.reply_convention();
        tokio::spawn(async move {
            while let Ok(Some(request)) = out_rx.receive().await {
                let mut reply = request.reply("pong", convention);
                reply.mark_read_only();
                if in_tx.send(reply).await.is_err() {
                    break;
                }
            }
        });

        let engine = Arc::new(
            CorrelationEngine::builder(Arc::new(out_tx))
                .config(config(strategy))
                .build()
                .unwrap(),
        );
        engine.spawn_listeners(Arc::new(in_rx));
        engine
    }

    #[tokio::test]
    async fn test_request_matched_by_message_id() {
        let engine = echo_engine(MatchStrategy::MessageId);

        let outcome = engine
            .request(MqMessage::new("orders", "ping"), None)
            .await
            .unwrap();
        let reply = outcome.into_result().unwrap();
        assert_eq!(reply.body.as_ref(), b"pong");

        assert_eq!(engine.stats().matched, 1);
        assert_eq!(engine.registry().pending_count(), 0);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_message_id_match_ignores_caller_correlation_id() {
        // The responder copies the message id, so a correlation id the
        // scenario set for its own purposes does not get in the way.
        let engine = echo_engine(MatchStrategy::MessageId);

        let outcome = engine
            .request(
                MqMessage::new("orders", "ping").with_correlation_id("batch-17"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.kind(), OutcomeKind::Matched);
        assert_eq!(engine.stats().orphaned, 0);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_request_matched_by_correlation_id() {
        let engine = echo_engine(MatchStrategy::CorrelationId);
        let outcome = engine
            .request(MqMessage::new("orders", "ping"), None)
            .await
            .unwrap();
        assert!(outcome.is_matched());
        assert_eq!(engine.matcher_name(), "correlation_id");
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_request_matched_by_property() {
        let engine = echo_engine(MatchStrategy::Property {
            name: "token".into(),
        });
        let request = MqMessage::new("orders", "ping").with_property("token", 42_i64);

        let reply = engine
            .request(request, None)
            .await
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(reply.property("token"), Some(&PropertyValue::Int(42)));
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_request_times_out() {
        // Outbound goes nowhere
        let (out_tx, _out_rx) = channel::<MqMessage>(8);
        let engine = CorrelationEngine::builder(Arc::new(out_tx))
            .config(config(MatchStrategy::MessageId))
            .build()
            .unwrap();

        let start = tokio::time::Instant::now();
        let outcome = engine
            .request(MqMessage::new("orders", "ping"), Some(Duration::from_millis(250)))
            .await
            .unwrap();

        assert_eq!(outcome.kind(), OutcomeKind::Timeout);
        assert_eq!(start.elapsed(), Duration::from_millis(250));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_failure_cancels_registration() {
        let (out_tx, out_rx) = channel::<MqMessage>(8);
        drop(out_rx);
        let engine = CorrelationEngine::builder(Arc::new(out_tx))
            .config(config(MatchStrategy::MessageId))
            .dispatcher(Arc::new(InlineDispatcher::new()))
            .build()
            .unwrap();

        let (continuation, outcome) = Continuation::channel();
        let err = engine
            .send(MqMessage::new("orders", "ping"), continuation, None, None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CorrelationError::Transport(TransportError::ChannelClosed)
        ));
        assert!(matches!(
            outcome.await.unwrap(),
            Outcome::Cancelled {
                reason: CancelReason::SendFailed(_),
                ..
            }
        ));
        assert_eq!(engine.registry().pending_count(), 0);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_matcher_failure_registers_nothing() {
        let (out_tx, _out_rx) = channel::<MqMessage>(8);
        let engine = CorrelationEngine::builder(Arc::new(out_tx))
            .config(config(MatchStrategy::CorrelationId))
            .build()
            .unwrap();

        let mut frozen = MqMessage::new("orders", "ping");
        frozen.mark_read_only();
        let err = engine.request(frozen, None).await.unwrap_err();

        assert!(matches!(
            err,
            CorrelationError::Matcher(MatcherError::ReadOnly { .. })
        ));
        assert_eq!(engine.stats().registered, 0);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_uncorrelatable_inbound_is_malformed_orphan() {
        let (out_tx, _out_rx) = channel::<MqMessage>(8);
        let engine = CorrelationEngine::builder(Arc::new(out_tx))
            .config(config(MatchStrategy::MessageId))
            .build()
            .unwrap();

        let result = engine.on_inbound(MqMessage::new("orders.reply", "stray"));
        assert_eq!(result, ResolutionResult::Orphan);

        let stats = engine.stats();
        assert_eq!(stats.orphaned, 1);
        assert_eq!(stats.malformed, 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_and_stops_listeners() {
        let (out_tx, _out_rx) = channel::<MqMessage>(8);
        let (_in_tx, in_rx): (_, ChannelReceiver<MqMessage>) = channel(8);
        let engine = Arc::new(
            CorrelationEngine::builder(Arc::new(out_tx))
                .config(config(MatchStrategy::MessageId))
                .build()
                .unwrap(),
        );
        let listeners = engine.spawn_listeners(Arc::new(in_rx));
        assert_eq!(listeners.len(), 2);

        let (continuation, outcome) = Continuation::channel();
        engine
            .send(
                MqMessage::new("orders", "ping"),
                continuation,
                Some(Duration::from_secs(60)),
                Some(VirtualUserId(3)),
            )
            .await
            .unwrap();

        assert_eq!(engine.shutdown().await, 1);
        assert!(matches!(
            outcome.await.unwrap(),
            Outcome::Cancelled {
                reason: CancelReason::Shutdown,
                ..
            }
        ));
        for listener in listeners {
            listener.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_send_and_inbound_open_spans() {
        use std::fmt::Debug;
        use tracing::field::{Field, Visit};
        use tracing::span::{Attributes, Id, Record};
        use tracing::Subscriber;
        use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
        use tracing_subscriber::util::SubscriberInitExt;

        type Seen = Arc<Mutex<Vec<String>>>;

        struct SpanLog(Seen);

        struct Fields<'a>(&'a mut Vec<String>);

        impl Visit for Fields<'_> {
            fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
                self.0.push(format!("{}={:?}", field.name(), value));
            }
        }

        impl<S: Subscriber> Layer<S> for SpanLog {
            fn on_new_span(&self, attrs: &Attributes<'_>, _: &Id, _: Context<'_, S>) {
                self.0.lock().push(attrs.metadata().name().to_string());
            }

            fn on_record(&self, _: &Id, values: &Record<'_>, _: Context<'_, S>) {
                values.record(&mut Fields(&mut self.0.lock()));
            }
        }

        let seen: Seen = Arc::default();
        let _guard = tracing_subscriber::registry()
            .with(SpanLog(Arc::clone(&seen)))
            .set_default();

        let (out_tx, out_rx) = channel::<MqMessage>(8);
        let engine = CorrelationEngine::builder(Arc::new(out_tx))
            .config(config(MatchStrategy::MessageId))
            .build()
            .unwrap();

        let (continuation, outcome) = Continuation::channel();
        let registration = engine
            .send(MqMessage::new("orders", "ping"), continuation, None, None)
            .await
            .unwrap();
        let request = out_rx.receive().await.unwrap().unwrap();
        let reply = request.reply("pong", ReplyConvention::CopyMessageId);
        assert_eq!(engine.on_inbound(reply), ResolutionResult::Matched);
        assert_eq!(outcome.await.unwrap().kind(), OutcomeKind::Matched);

        let seen = seen.lock().clone();
        let id = registration.match_id.to_string();
        assert!(seen.contains(&"swarm.send".to_string()));
        assert!(seen.contains(&"swarm.inbound".to_string()));
        assert!(seen.iter().filter(|s| **s == format!("match_id={id}")).count() >= 2);
        assert!(seen.contains(&"result=Matched".to_string()));

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_after_shutdown_is_refused() {
        let (out_tx, _out_rx) = channel::<MqMessage>(8);
        let engine = CorrelationEngine::builder(Arc::new(out_tx))
            .config(config(MatchStrategy::MessageId))
            .build()
            .unwrap();
        assert_eq!(engine.shutdown().await, 0);

        let (continuation, outcome) = Continuation::channel();
        let result = engine
            .send(
                MqMessage::new("orders", "late"),
                continuation,
                Some(Duration::from_millis(100)),
                None,
            )
            .await;
        assert!(matches!(result, Err(CorrelationError::ShuttingDown)));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(engine.registry().pending_count(), 0);
        assert_eq!(engine.stats().registered, 0);
        // Refused continuations are dropped, never resumed
        assert!(outcome.await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let (out_tx, _out_rx) = channel::<MqMessage>(8);
        let result = CorrelationEngine::builder(Arc::new(out_tx))
            .config(CorrelationConfig {
                listener_count: 0,
                ..CorrelationConfig::default()
            })
            .build();
        assert!(matches!(result, Err(CorrelationError::Config(_))));
    }
}
