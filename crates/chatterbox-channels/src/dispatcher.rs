//! Channel dispatcher — per-channel response queue with a rate-limited timer.
//!
//! Producers (commands, fired actions) only ever `enqueue`. The dispatcher's
//! own timer is the only thing that touches the head of the queue, except
//! listener confirmation which dequeues a head that is already awaiting it.
//!
//! The timer exists exactly while the queue is non-empty: the queue's
//! enqueue hook starts it, the dequeue hook stops it when the queue drains.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chatterbox_core::config::DispatchConfig;
use chatterbox_core::error::{BotError, Result};
use chatterbox_core::traits::Transport;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::queue::Queue;

/// What was last delivered on a channel.
#[derive(Debug, Clone, Default)]
pub struct MessageState {
    pub recent_message: Option<String>,
    pub message_last_sent: Option<Instant>,
}

impl MessageState {
    /// Time since the last send, `None` if nothing was sent yet.
    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        self.message_last_sent
            .map(|sent| now.saturating_duration_since(sent))
    }
}

/// A queued outgoing response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseState {
    /// What caused the response (raw command text, or the firing action).
    pub request: String,
    /// Channel to send to.
    pub target: String,
    pub response: String,
    /// Send attempts so far, including deferred ones.
    pub resend_count: u32,
    /// Whether the last attempt appended the bypass sequence.
    pub duplicate_bypass: bool,
    /// Text sent and not yet observed by the listener.
    pub awaiting_confirmation: Option<String>,
}

impl ResponseState {
    pub fn new(request: &str, target: &str, response: &str) -> Self {
        Self {
            request: request.to_string(),
            target: target.to_string(),
            response: response.to_string(),
            resend_count: 0,
            duplicate_bypass: false,
            awaiting_confirmation: None,
        }
    }
}

/// Dispatch configuration resolved for use on every tick.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub min_send_interval: Duration,
    pub bypass_window: Duration,
    pub resend_limit: u32,
    pub poll_interval: Duration,
    pub bypass_sequence: String,
    pub listener_confirm: bool,
}

impl DispatchSettings {
    pub fn from_config(config: &DispatchConfig) -> Result<Self> {
        Ok(Self {
            min_send_interval: config.min_send_interval(),
            bypass_window: config.bypass_window(),
            resend_limit: config.resend_limit,
            poll_interval: config.poll_interval(),
            bypass_sequence: config.bypass_sequence()?,
            listener_confirm: config.listener_confirm,
        })
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            min_send_interval: Duration::from_secs(30),
            bypass_window: Duration::from_secs(30),
            resend_limit: 5,
            poll_interval: Duration::from_secs(30),
            bypass_sequence: "\u{E0000}".into(),
            listener_confirm: false,
        }
    }
}

/// Result of examining the head of the queue.
#[derive(Debug)]
pub enum Attempt {
    /// Queue is empty.
    Idle,
    /// Head stays queued until a later tick.
    Deferred(BotError),
    /// Send `text` to `target`.
    Send {
        target: String,
        response: String,
        text: String,
        bypass: bool,
    },
}

/// Per-channel state: message history plus the response queue.
#[derive(Debug)]
pub struct ChannelState {
    pub username: String,
    pub message_state: MessageState,
    pub queue: Queue<ResponseState>,
}

impl ChannelState {
    pub fn new(username: &str) -> Self {
        Self::with_queue(username, Queue::new())
    }

    pub fn with_queue(username: &str, queue: Queue<ResponseState>) -> Self {
        Self {
            username: username.to_string(),
            message_state: MessageState::default(),
            queue,
        }
    }

    /// Decide what to do with the head of the queue at `now`.
    ///
    /// Drops heads whose `resend_count` exceeds the limit, then counts one
    /// attempt against the new head.
    pub fn next_attempt(
        &mut self,
        now: Instant,
        settings: &DispatchSettings,
        listener_ready: bool,
    ) -> Attempt {
        loop {
            match self.queue.peek() {
                None => return Attempt::Idle,
                Some(head) if head.resend_count > settings.resend_limit => {
                    if let Some(dropped) = self.queue.dequeue() {
                        tracing::info!(
                            "🗑️ [{}] dropping response after {} attempts: {:?}",
                            self.username,
                            dropped.resend_count,
                            dropped.response
                        );
                    }
                }
                Some(_) => break,
            }
        }

        let elapsed = self.message_state.elapsed(now);
        let recent = self.message_state.recent_message.clone();
        let Some(head) = self.queue.peek_mut() else {
            return Attempt::Idle;
        };
        head.resend_count += 1;

        if settings.listener_confirm && !listener_ready {
            return Attempt::Deferred(BotError::RetryableSend("listener not connected".into()));
        }
        if let Some(elapsed) = elapsed {
            if elapsed < settings.min_send_interval {
                return Attempt::Deferred(BotError::RetryableSend(format!(
                    "rate limited, {}ms since last send",
                    elapsed.as_millis()
                )));
            }
        }

        let bypass = recent.as_deref() == Some(head.response.as_str())
            && elapsed.is_some_and(|e| e <= settings.bypass_window);
        head.duplicate_bypass = bypass;
        let text = if bypass {
            format!("{} {}", head.response, settings.bypass_sequence)
        } else {
            head.response.clone()
        };
        if settings.listener_confirm {
            head.awaiting_confirmation = Some(text.clone());
        }

        Attempt::Send {
            target: head.target.clone(),
            response: head.response.clone(),
            text,
            bypass,
        }
    }

    /// Record a successful local send of `response`.
    ///
    /// Without listener confirmation the head leaves the queue here.
    pub fn record_sent(&mut self, response: &str, now: Instant, listener_confirm: bool) {
        self.message_state.recent_message = Some(response.to_string());
        self.message_state.message_last_sent = Some(now);
        if !listener_confirm {
            self.queue.dequeue();
        }
    }

    /// The listener saw `text` from the bot. Dequeues the head if it matches.
    pub fn confirm(&mut self, text: &str) -> bool {
        let matches = self.queue.peek().is_some_and(|head| {
            match head.awaiting_confirmation.as_deref() {
                Some(sent) => sent == text || head.response == text.trim_end(),
                None => false,
            }
        });
        if matches {
            self.queue.dequeue();
        }
        matches
    }
}

/// Outcome of one dispatcher tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Deferred,
    Sent,
    Failed,
}

/// The one polling timer of a channel.
#[derive(Default)]
struct Timer {
    handle: Mutex<Option<JoinHandle<()>>>,
    started: AtomicU64,
}

impl Timer {
    fn slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the timer unless one is already running.
    fn ensure_started(&self, dispatcher: Weak<ChannelDispatcher>, every: Duration) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("⚠️ No async runtime, dispatcher timer not started");
            return;
        };
        self.started.fetch_add(1, Ordering::SeqCst);
        *slot = Some(runtime.spawn(run_timer(dispatcher, every)));
    }

    fn stop(&self) {
        if let Some(handle) = self.slot().take() {
            handle.abort();
        }
    }

    fn is_active(&self) -> bool {
        self.slot().as_ref().is_some_and(|h| !h.is_finished())
    }
}

async fn run_timer(dispatcher: Weak<ChannelDispatcher>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(dispatcher) = dispatcher.upgrade() else {
            break;
        };
        if dispatcher.tick().await == TickOutcome::Idle {
            break;
        }
    }
}

/// Per-channel dispatcher: queue, message state, timer and transport.
pub struct ChannelDispatcher {
    username: String,
    state: Mutex<ChannelState>,
    timer: Arc<Timer>,
    transport: Arc<dyn Transport>,
    listener: Option<Arc<dyn Transport>>,
    settings: DispatchSettings,
}

impl ChannelDispatcher {
    pub fn new(
        username: &str,
        transport: Arc<dyn Transport>,
        listener: Option<Arc<dyn Transport>>,
        settings: DispatchSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let timer = Arc::new(Timer::default());

            let start = {
                let timer = timer.clone();
                let weak = weak.clone();
                let every = settings.poll_interval;
                move |_: &ResponseState, _len: usize| timer.ensure_started(weak.clone(), every)
            };
            let stop = {
                let timer = timer.clone();
                move |_: &ResponseState, len: usize| {
                    if len == 0 {
                        timer.stop();
                    }
                }
            };
            let queue = Queue::new()
                .on_enqueue(Box::new(start))
                .on_dequeue(Box::new(stop));

            Self {
                username: username.to_string(),
                state: Mutex::new(ChannelState::with_queue(username, queue)),
                timer,
                transport,
                listener,
                settings,
            }
        })
    }

    fn state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn enqueue(&self, response: ResponseState) {
        tracing::debug!("📥 [{}] enqueue: {:?}", self.username, response.response);
        self.state().queue.enqueue(response);
    }

    /// Process the head of the queue once.
    pub async fn tick(&self) -> TickOutcome {
        let listener_ready = self.listener.as_ref().is_none_or(|l| l.is_connected());
        // The rate limit runs from when the send started, not when `say` returned.
        let now = Instant::now();
        let attempt = {
            let mut state = self.state();
            let attempt = state.next_attempt(now, &self.settings, listener_ready);
            if matches!(attempt, Attempt::Idle) {
                self.timer.stop();
            }
            attempt
        };

        match attempt {
            Attempt::Idle => TickOutcome::Idle,
            Attempt::Deferred(reason) => {
                tracing::debug!("⏳ [{}] {reason}", self.username);
                TickOutcome::Deferred
            }
            Attempt::Send {
                target,
                response,
                text,
                bypass,
            } => match self.transport.say(&target, &text).await {
                Ok(()) => {
                    tracing::debug!(
                        "📤 [{}] sent to #{} (bypass: {}): {:?}",
                        self.username,
                        target,
                        bypass,
                        response
                    );
                    self.state()
                        .record_sent(&response, now, self.settings.listener_confirm);
                    TickOutcome::Sent
                }
                Err(e) if e.is_retryable() => {
                    tracing::debug!("⏳ [{}] {e}", self.username);
                    TickOutcome::Deferred
                }
                Err(e) => {
                    tracing::warn!("⚠️ [{}] send to #{} failed: {e}", self.username, target);
                    TickOutcome::Failed
                }
            },
        }
    }

    /// Feed a message the bot was seen saying on this channel.
    pub fn observe(&self, text: &str) -> bool {
        if !self.settings.listener_confirm {
            return false;
        }
        let confirmed = self.state().confirm(text);
        if confirmed {
            tracing::debug!("✅ [{}] delivery confirmed: {:?}", self.username, text);
        }
        confirmed
    }

    pub fn queue_len(&self) -> usize {
        self.state().queue.len()
    }

    /// Snapshot of the queued responses, head first.
    pub fn pending(&self) -> Vec<ResponseState> {
        self.state().queue.iter().cloned().collect()
    }

    pub fn message_state(&self) -> MessageState {
        self.state().message_state.clone()
    }

    pub fn timer_active(&self) -> bool {
        self.timer.is_active()
    }

    /// How many timers this dispatcher has started over its lifetime.
    pub fn timers_started(&self) -> u64 {
        self.timer.started.load(Ordering::SeqCst)
    }
}

impl Drop for ChannelDispatcher {
    fn drop(&mut self) {
        self.timer.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use async_trait::async_trait;
    use chatterbox_core::types::ChatEvent;
    use futures::stream::Stream;

    /// Memory transport whose `say` takes `delay` to complete.
    struct SlowTransport {
        inner: MemoryTransport,
        delay: Duration,
    }

    #[async_trait]
    impl Transport for SlowTransport {
        fn name(&self) -> &str {
            "slow"
        }
        async fn connect(&self) -> Result<(String, u16)> {
            self.inner.connect().await
        }
        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }
        async fn say(&self, channel: &str, text: &str) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.say(channel, text).await
        }
        async fn join(&self, channel: &str) -> Result<()> {
            self.inner.join(channel).await
        }
        fn channels(&self) -> Vec<String> {
            self.inner.channels()
        }
        async fn listen(&self) -> Result<Box<dyn Stream<Item = ChatEvent> + Send + Unpin>> {
            self.inner.listen().await
        }
    }

    fn settings(min_secs: u64, window_secs: u64, limit: u32) -> DispatchSettings {
        DispatchSettings {
            min_send_interval: Duration::from_secs(min_secs),
            bypass_window: Duration::from_secs(window_secs),
            resend_limit: limit,
            poll_interval: Duration::from_secs(1),
            bypass_sequence: "\u{E0000}".into(),
            listener_confirm: false,
        }
    }

    fn send_text(attempt: Attempt) -> String {
        match attempt {
            Attempt::Send { text, .. } => text,
            other => panic!("expected send, got {other:?}"),
        }
    }

    #[test]
    fn test_first_send_is_unmodified() {
        let s = settings(30, 30, 3);
        let mut state = ChannelState::new("chan");
        state.queue.enqueue(ResponseState::new("!x", "chan", "hi"));
        let now = Instant::now();
        assert_eq!(send_text(state.next_attempt(now, &s, true)), "hi");
        state.record_sent("hi", now, false);
        assert!(state.queue.is_empty());
        assert_eq!(state.message_state.recent_message.as_deref(), Some("hi"));
    }

    #[test]
    fn test_duplicate_bypass_within_window() {
        let s = settings(30, 30, 3);
        let mut state = ChannelState::new("chan");
        let t0 = Instant::now();
        state.record_sent("hi", t0, false);

        state.queue.enqueue(ResponseState::new("!x", "chan", "hi"));
        let text = send_text(state.next_attempt(t0 + Duration::from_secs(30), &s, true));
        assert_eq!(text, "hi \u{E0000}");
        assert!(state.queue.peek().unwrap().duplicate_bypass);
    }

    #[test]
    fn test_no_bypass_after_window() {
        let s = settings(30, 30, 3);
        let mut state = ChannelState::new("chan");
        let t0 = Instant::now();
        state.record_sent("hi", t0, false);

        state.queue.enqueue(ResponseState::new("!x", "chan", "hi"));
        let text = send_text(state.next_attempt(t0 + Duration::from_secs(31), &s, true));
        assert_eq!(text, "hi");
    }

    #[test]
    fn test_no_bypass_for_different_text() {
        let s = settings(0, 30, 3);
        let mut state = ChannelState::new("chan");
        let t0 = Instant::now();
        state.record_sent("hi", t0, false);
        state.queue.enqueue(ResponseState::new("!x", "chan", "hello"));
        assert_eq!(send_text(state.next_attempt(t0, &s, true)), "hello");
    }

    #[test]
    fn test_rate_limit_defers_and_counts() {
        let s = settings(30, 30, 3);
        let mut state = ChannelState::new("chan");
        let t0 = Instant::now();
        state.record_sent("earlier", t0, false);
        state.queue.enqueue(ResponseState::new("!x", "chan", "hi"));

        let attempt = state.next_attempt(t0 + Duration::from_secs(10), &s, true);
        assert!(matches!(attempt, Attempt::Deferred(BotError::RetryableSend(_))));
        assert_eq!(state.queue.len(), 1);
        assert_eq!(state.queue.peek().unwrap().resend_count, 1);
    }

    #[test]
    fn test_resend_limit_drops_without_delivery() {
        let limit = 2;
        let s = settings(30, 30, limit);
        let mut state = ChannelState::new("chan");
        let t0 = Instant::now();
        state.record_sent("earlier", t0, false);
        state.queue.enqueue(ResponseState::new("!x", "chan", "never"));

        // limit + 1 failed attempts.
        for attempt in 1..=limit + 1 {
            let a = state.next_attempt(t0 + Duration::from_secs(1), &s, true);
            assert!(matches!(a, Attempt::Deferred(_)));
            assert_eq!(state.queue.peek().unwrap().resend_count, attempt);
        }
        // The next look drops it instead of sending.
        let a = state.next_attempt(t0 + Duration::from_secs(60), &s, true);
        assert!(matches!(a, Attempt::Idle));
        assert!(state.queue.is_empty());
    }

    #[test]
    fn test_drop_moves_on_to_next_item() {
        let s = settings(0, 30, 0);
        let mut state = ChannelState::new("chan");
        let mut stale = ResponseState::new("!x", "chan", "stale");
        stale.resend_count = 1;
        state.queue.enqueue(stale);
        state.queue.enqueue(ResponseState::new("!y", "chan", "fresh"));
        assert_eq!(send_text(state.next_attempt(Instant::now(), &s, true)), "fresh");
        assert_eq!(state.queue.len(), 1);
    }

    #[test]
    fn test_listener_confirmation() {
        let mut s = settings(0, 30, 3);
        s.listener_confirm = true;
        let mut state = ChannelState::new("chan");
        state.queue.enqueue(ResponseState::new("!x", "chan", "hi"));

        assert!(matches!(
            state.next_attempt(Instant::now(), &s, false),
            Attempt::Deferred(_)
        ));

        let text = send_text(state.next_attempt(Instant::now(), &s, true));
        state.record_sent("hi", Instant::now(), true);
        assert_eq!(state.queue.len(), 1, "waits for the listener");
        assert!(!state.confirm("something else"));
        assert!(state.confirm(&text));
        assert!(state.queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_lifecycle() {
        let transport = Arc::new(MemoryTransport::connected());
        let dispatcher = ChannelDispatcher::new("chan", transport.clone(), None, settings(0, 30, 3));
        assert!(!dispatcher.timer_active());

        dispatcher.enqueue(ResponseState::new("!a", "chan", "one"));
        dispatcher.enqueue(ResponseState::new("!b", "chan", "two"));
        assert!(dispatcher.timer_active());
        assert_eq!(dispatcher.timers_started(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.sent_texts("chan"), vec!["one", "two"]);
        assert_eq!(dispatcher.queue_len(), 0);
        assert!(!dispatcher.timer_active());

        dispatcher.enqueue(ResponseState::new("!c", "chan", "three"));
        assert!(dispatcher.timer_active());
        assert_eq!(dispatcher.timers_started(), 2);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.sent_texts("chan"), vec!["one", "two", "three"]);
        assert!(!dispatcher.timer_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval_spaces_sends() {
        let transport = Arc::new(MemoryTransport::connected());
        let dispatcher = ChannelDispatcher::new("chan", transport.clone(), None, settings(3, 3, 10));

        dispatcher.enqueue(ResponseState::new("!a", "chan", "hi"));
        dispatcher.enqueue(ResponseState::new("!b", "chan", "hi"));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(transport.sent_texts("chan"), vec!["hi"]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.sent_texts("chan"), vec!["hi", "hi \u{E0000}"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failures_bounded_by_limit() {
        let transport = Arc::new(MemoryTransport::connected());
        transport.fail_next(100);
        let dispatcher = ChannelDispatcher::new("chan", transport.clone(), None, settings(0, 30, 2));

        dispatcher.enqueue(ResponseState::new("!a", "chan", "doomed"));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(transport.sent_texts("chan").is_empty());
        assert_eq!(dispatcher.queue_len(), 0);
        assert!(!dispatcher.timer_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_send_keeps_full_rate() {
        let transport = Arc::new(SlowTransport {
            inner: MemoryTransport::connected(),
            delay: Duration::from_millis(200),
        });
        // Default settings: 30s between sends, polled every 30s.
        let dispatcher =
            ChannelDispatcher::new("chan", transport.clone(), None, DispatchSettings::default());

        dispatcher.enqueue(ResponseState::new("!a", "chan", "one"));
        dispatcher.enqueue(ResponseState::new("!b", "chan", "two"));
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(transport.inner.sent_texts("chan"), vec!["one"]);
        assert_eq!(dispatcher.pending()[0].resend_count, 0);

        // Second send goes out on the next tick, not one after that.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.inner.sent_texts("chan"), vec!["one", "two"]);
        assert_eq!(dispatcher.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivered_once_on_last_allowed_attempt() {
        let limit = 2;
        let transport = Arc::new(MemoryTransport::connected());
        transport.fail_next(limit);
        let dispatcher = ChannelDispatcher::new("chan", transport.clone(), None, settings(0, 30, limit));

        dispatcher.enqueue(ResponseState::new("!a", "chan", "finally"));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(transport.sent_texts("chan").is_empty());
        assert_eq!(dispatcher.pending()[0].resend_count, limit);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.sent_texts("chan"), vec!["finally"]);
        assert_eq!(dispatcher.queue_len(), 0);
        assert!(!dispatcher.timer_active());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.sent_texts("chan"), vec!["finally"]);
    }

    #[tokio::test]
    async fn test_tick_on_empty_queue_is_idle() {
        let transport = Arc::new(MemoryTransport::connected());
        let dispatcher = ChannelDispatcher::new("chan", transport, None, settings(0, 30, 2));
        assert_eq!(dispatcher.tick().await, TickOutcome::Idle);
    }
}
