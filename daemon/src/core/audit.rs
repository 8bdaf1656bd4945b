// Security audit sink.
// Every ledger mutation, impersonation, sync conflict/rejection and
// auth event flows through a bounded channel to a dedicated writer:
// structured logs plus the time-indexed store. Producers never block;
// overflow drops the event and counts it.

use super::storage::{SecurityEventProvider, SledStorage};
use async_trait::async_trait;
use festa_common::{
    audit::{SecurityEvent, SecurityEventKind, Severity},
    crypto::{sign, SigningKey},
    time::get_current_time_in_millis,
};
use serde::Serialize;
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::mpsc, task::JoinHandle};

// Delays between alert delivery attempts
const ALERT_RETRY_DELAYS_MS: [u64; 2] = [1000, 5000];

#[derive(Clone)]
pub struct AuditSink {
    sender: mpsc::Sender<SecurityEvent>,
    dropped: Arc<AtomicU64>,
}

impl AuditSink {
    // Spawn the writer worker; the sink is cheap to clone
    pub fn start(
        storage: Arc<SledStorage>,
        monitor: Option<AlertMonitor>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<SecurityEvent>(capacity);
        let handle = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                log_event(&event);

                if let Err(err) = storage.append_security_event(&event).await {
                    error!("Failed to persist security event {}: {:#}", event.id, err);
                }

                if let Some(monitor) = &monitor {
                    monitor.observe(&event).await;
                }
            }
            debug!("Audit sink worker stopped");
        });

        (
            Self {
                sender,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            handle,
        )
    }

    // A sink that only logs, for tests and tooling without a store
    pub fn log_only() -> Self {
        let (sender, mut receiver) = mpsc::channel::<SecurityEvent>(256);
        tokio::spawn(async move { while receiver.recv().await.is_some() {} });
        Self {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    // Non-blocking emit: a full buffer drops the event, never the caller
    pub fn emit(&self, event: SecurityEvent) {
        if self.sender.try_send(event).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped % 100 == 1 {
                warn!("Audit sink buffer full, {} events dropped so far", dropped);
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn log_event(event: &SecurityEvent) {
    let details = event.details.as_deref().unwrap_or("-");
    match event.severity {
        Severity::Info => info!(
            "[security] kind={} actor={} ip={} action={} result={} details={}",
            event.kind,
            event.actor.as_deref().unwrap_or("-"),
            event.ip.as_deref().unwrap_or("-"),
            event.action,
            event.result,
            details
        ),
        Severity::Warning => warn!(
            "[security] kind={} actor={} ip={} action={} result={} details={}",
            event.kind,
            event.actor.as_deref().unwrap_or("-"),
            event.ip.as_deref().unwrap_or("-"),
            event.action,
            event.result,
            details
        ),
        Severity::Critical => error!(
            "[security] kind={} actor={} ip={} action={} result={} details={}",
            event.kind,
            event.actor.as_deref().unwrap_or("-"),
            event.ip.as_deref().unwrap_or("-"),
            event.action,
            event.result,
            details
        ),
    }
}

// An alert raised when a threshold rule fires
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub kind: SecurityEventKind,
    pub count: usize,
    pub window_secs: u64,
    pub key: String,
    pub message: String,
    pub timestamp: u64,
}

// N events of one kind from the same key (ip or actor) within a window
#[derive(Debug, Clone)]
pub struct ThresholdRule {
    pub kind: SecurityEventKind,
    pub threshold: usize,
    pub window: Duration,
    // Group by source ip when set, by actor otherwise
    pub key_by_ip: bool,
}

impl ThresholdRule {
    // The default rule set: brute-force style auth failures and any
    // invariant violation
    pub fn defaults() -> Vec<ThresholdRule> {
        vec![
            ThresholdRule {
                kind: SecurityEventKind::AuthFailure,
                threshold: 5,
                window: Duration::from_secs(60),
                key_by_ip: true,
            },
            ThresholdRule {
                kind: SecurityEventKind::SyncRejected,
                threshold: 10,
                window: Duration::from_secs(300),
                key_by_ip: false,
            },
            ThresholdRule {
                kind: SecurityEventKind::InvariantViolation,
                threshold: 1,
                window: Duration::from_secs(1),
                key_by_ip: false,
            },
        ]
    }
}

#[async_trait]
pub trait AlertHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn send_alert(&self, alert: &Alert) -> anyhow::Result<()>;
}

// Sliding-window counters feeding the configured alert handlers,
// rate-limited per alert kind
pub struct AlertMonitor {
    rules: Vec<ThresholdRule>,
    handlers: Vec<Arc<dyn AlertHandler>>,
    state: tokio::sync::Mutex<MonitorState>,
    rate_limit: Duration,
}

#[derive(Default)]
struct MonitorState {
    windows: HashMap<(SecurityEventKind, String), VecDeque<u64>>,
    last_sent: HashMap<SecurityEventKind, u64>,
}

impl AlertMonitor {
    pub fn new(
        rules: Vec<ThresholdRule>,
        handlers: Vec<Arc<dyn AlertHandler>>,
        rate_limit: Duration,
    ) -> Self {
        Self {
            rules,
            handlers,
            state: tokio::sync::Mutex::new(MonitorState::default()),
            rate_limit,
        }
    }

    pub async fn observe(&self, event: &SecurityEvent) {
        let Some(rule) = self.rules.iter().find(|rule| rule.kind == event.kind) else {
            return;
        };

        let key = if rule.key_by_ip {
            event.ip.clone().unwrap_or_else(|| "unknown".to_string())
        } else {
            event.actor.clone().unwrap_or_else(|| "unknown".to_string())
        };

        let alert = {
            let mut state = self.state.lock().await;
            let now = event.timestamp;
            let window_millis = rule.window.as_millis() as u64;

            let timestamps = state
                .windows
                .entry((event.kind, key.clone()))
                .or_default();
            timestamps.push_back(now);
            while let Some(first) = timestamps.front() {
                if now.saturating_sub(*first) > window_millis {
                    timestamps.pop_front();
                } else {
                    break;
                }
            }

            if timestamps.len() < rule.threshold {
                return;
            }
            let count = timestamps.len();

            // One alert per kind per rate-limit interval
            let rate_millis = self.rate_limit.as_millis() as u64;
            if let Some(last) = state.last_sent.get(&event.kind) {
                if now.saturating_sub(*last) < rate_millis {
                    return;
                }
            }
            state.last_sent.insert(event.kind, now);

            Alert {
                kind: event.kind,
                count,
                window_secs: rule.window.as_secs(),
                key,
                message: format!(
                    "{} occurred {} times within {}s",
                    event.kind,
                    count,
                    rule.window.as_secs()
                ),
                timestamp: now,
            }
        };

        warn!("Security alert: {}", alert.message);
        for handler in &self.handlers {
            if let Err(err) = deliver_with_retry(handler.as_ref(), &alert).await {
                error!("Alert handler {} failed: {:#}", handler.name(), err);
            }
        }
    }
}

async fn deliver_with_retry(handler: &dyn AlertHandler, alert: &Alert) -> anyhow::Result<()> {
    let mut last_err = None;
    for attempt in 0..=ALERT_RETRY_DELAYS_MS.len() {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(ALERT_RETRY_DELAYS_MS[attempt - 1])).await;
        }
        match handler.send_alert(alert).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                warn!(
                    "Alert delivery attempt {} via {} failed: {:#}",
                    attempt + 1,
                    handler.name(),
                    err
                );
                last_err = Some(err);
            }
        }
    }
    Err(last_err.expect("at least one attempt was made"))
}

// Generic webhook with an HMAC signature header, so receivers can
// authenticate the origin
pub struct WebhookAlertHandler {
    client: reqwest::Client,
    url: String,
    secret: SigningKey,
}

impl WebhookAlertHandler {
    pub fn new(url: String, secret: SigningKey) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url,
            secret,
        }
    }
}

#[async_trait]
impl AlertHandler for WebhookAlertHandler {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send_alert(&self, alert: &Alert) -> anyhow::Result<()> {
        let body = serde_json::to_string(alert)?;
        let timestamp = get_current_time_in_millis();
        // Signature over "timestamp.body", hex encoded
        let payload = format!("{}.{}", timestamp, body);
        let signature = sign(&self.secret, payload.as_bytes());

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("X-Festa-Signature", signature.to_hex())
            .header("X-Festa-Timestamp", timestamp.to_string())
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("webhook returned HTTP {}", status);
        }
        Ok(())
    }
}

// Chat webhook: plain {"text": ...} payload
pub struct ChatAlertHandler {
    client: reqwest::Client,
    url: String,
}

impl ChatAlertHandler {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, url }
    }
}

#[async_trait]
impl AlertHandler for ChatAlertHandler {
    fn name(&self) -> &str {
        "chat"
    }

    async fn send_alert(&self, alert: &Alert) -> anyhow::Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "text": format!("[festa] {}", alert.message),
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("chat webhook returned HTTP {}", status);
        }
        Ok(())
    }
}

// Email alerts through the mailer port
pub struct MailAlertHandler {
    mailer: Arc<dyn crate::providers::Mailer>,
    to: Vec<String>,
}

impl MailAlertHandler {
    pub fn new(mailer: Arc<dyn crate::providers::Mailer>, to: Vec<String>) -> Self {
        Self { mailer, to }
    }
}

#[async_trait]
impl AlertHandler for MailAlertHandler {
    fn name(&self) -> &str {
        "mail"
    }

    async fn send_alert(&self, alert: &Alert) -> anyhow::Result<()> {
        let mail = crate::providers::OutgoingMail {
            to: self.to.clone(),
            subject: format!("[festa] security alert: {}", alert.kind),
            html: None,
            text: alert.message.clone(),
            attachments: Vec::new(),
        };
        self.mailer
            .send(&mail)
            .await
            .map_err(|err| anyhow::anyhow!("{}", err))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl AlertHandler for CountingHandler {
        fn name(&self) -> &str {
            "counting"
        }

        async fn send_alert(&self, _alert: &Alert) -> anyhow::Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn auth_failure(ip: &str, timestamp: u64) -> SecurityEvent {
        let mut event = SecurityEvent::new(
            SecurityEventKind::AuthFailure,
            Severity::Warning,
            "verify_bearer",
            "invalid_token",
            timestamp,
        );
        event.ip = Some(ip.to_string());
        event
    }

    #[tokio::test]
    async fn test_threshold_fires_once_per_rate_window() {
        let handler = Arc::new(CountingHandler {
            sent: AtomicUsize::new(0),
        });
        let monitor = AlertMonitor::new(
            ThresholdRule::defaults(),
            vec![handler.clone()],
            Duration::from_secs(300),
        );

        // Five failures from one ip within the window
        for i in 0..5 {
            monitor.observe(&auth_failure("203.0.113.7", 1_000 + i)).await;
        }
        assert_eq!(handler.sent.load(Ordering::SeqCst), 1);

        // More failures inside the rate-limit window stay silent
        for i in 0..5 {
            monitor.observe(&auth_failure("203.0.113.7", 2_000 + i)).await;
        }
        assert_eq!(handler.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_threshold_keyed_by_ip() {
        let handler = Arc::new(CountingHandler {
            sent: AtomicUsize::new(0),
        });
        let monitor = AlertMonitor::new(
            ThresholdRule::defaults(),
            vec![handler.clone()],
            Duration::from_secs(300),
        );

        // Failures spread over distinct ips never cross the threshold
        for i in 0..4 {
            monitor
                .observe(&auth_failure(&format!("203.0.113.{}", i), 1_000 + i))
                .await;
        }
        assert_eq!(handler.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_events_outside_window_expire() {
        let handler = Arc::new(CountingHandler {
            sent: AtomicUsize::new(0),
        });
        let monitor = AlertMonitor::new(
            ThresholdRule::defaults(),
            vec![handler.clone()],
            Duration::from_secs(300),
        );

        // Four failures, then a long pause, then four more: no alert
        for i in 0..4 {
            monitor.observe(&auth_failure("203.0.113.7", 1_000 + i)).await;
        }
        for i in 0..4 {
            monitor
                .observe(&auth_failure("203.0.113.7", 400_000 + i))
                .await;
        }
        assert_eq!(handler.sent.load(Ordering::SeqCst), 0);
    }
}
