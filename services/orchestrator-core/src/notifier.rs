//! C11 — Notifier: renders outbound messages and submits them to the
//! messaging gateway. Rendering is synchronous and pure (see [`templates`]);
//! submission runs through a bounded-concurrency queue with a per-recipient
//! deduplication key so a retried `(template, order_id, recipient)` never
//! double-sends. Notifier failures never block an order transition — by the
//! time a caller reaches this module the transition is already durable in
//! C6; delivery is best-effort and fully decoupled from the request path.
//!
//! Grounded on the webhook-consumer's `send_webhook` exponential-backoff
//! retry loop (`other_examples/.../webhook-consumer-src-main.rs`), adapted
//! from an unbounded Kafka-fed loop to a bounded `mpsc` queue sized by
//! `GATEWAY_CONCURRENCY`.

use orchestrator_common::money::Money;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

/// Plain `format!`-based renderers — deterministic and testable without a
/// live gateway connection, matching C11's "rendering is synchronous and
/// pure" contract.
pub mod templates {
    use orchestrator_common::money::Money;

    #[must_use]
    pub fn order_confirmation(order_number: &str, total: Money) -> String {
        format!("Order {order_number} confirmed. Total: {total}. We're assigning a vendor.")
    }

    #[must_use]
    pub fn vendor_assignment(order_number: &str, retailer_name: &str, total: Money) -> String {
        format!(
            "New order {order_number} from {retailer_name}. Total {total}. Reply ACCEPT or DECLINE within 2 hours."
        )
    }

    #[must_use]
    pub fn vendor_accepted(order_number: &str) -> String {
        format!("Good news! Your order {order_number} has been accepted by the vendor and will be dispatched soon.")
    }

    #[must_use]
    pub fn insufficient_credit(available: Money) -> String {
        format!(
            "Order exceeds available credit limit. Your available credit is {available}. Please make a payment or reduce order amount."
        )
    }

    #[must_use]
    pub fn quick_reorder(days_since_last_order: i64, item_lines: &str, estimated_total: Money) -> String {
        format!(
            "Hi! It's been {days_since_last_order} days since your last order. Reply YES to reorder: {item_lines}. Total: {estimated_total}."
        )
    }

    #[must_use]
    pub const fn help() -> &'static str {
        "Here's what I can do:\n\
         - Send your order as text, e.g. \"10kg rice, 5kg dal\"\n\
         - Send a photo of a handwritten or printed order\n\
         - Ask for your order status, e.g. \"where is order ORD-1042\"\n\
         - Reply ACCEPT or DECLINE when a vendor is assigned to your order"
    }

    #[must_use]
    pub const fn greeting() -> &'static str {
        "Hi! Send your order as text or a photo any time, or type \"help\" to see what I can do."
    }

    #[must_use]
    pub fn status_reply(order_number: &str, status: &str) -> String {
        format!("Order {order_number} is currently {status}.")
    }

    #[must_use]
    pub fn status_unknown(order_number: &str) -> String {
        format!("We couldn't find an order matching \"{order_number}\".")
    }

    #[must_use]
    pub fn order_rejected(reason: &str) -> String {
        format!("Sorry, we can't place this order: {reason}")
    }

    #[must_use]
    pub const fn needs_clarification() -> &'static str {
        "We couldn't quite understand part of your order. Could you resend it with clearer quantities and item names?"
    }

    #[must_use]
    pub fn order_held_for_approval(order_number: &str) -> String {
        format!("Order {order_number} needs manual approval before it can proceed. We'll notify you once it's reviewed.")
    }

    #[must_use]
    pub fn no_vendor_available(order_number: &str) -> String {
        format!("Order {order_number} was confirmed, but no vendor is currently available. We'll keep trying.")
    }
}

#[derive(Debug, Clone)]
struct NotificationJob {
    recipient: String,
    dedup_key: String,
    body: String,
}

struct NotifierInner {
    tx: mpsc::Sender<NotificationJob>,
    in_flight: Mutex<FxHashSet<String>>,
}

/// Cheap, cloneable handle callers use to enqueue a rendered message. The
/// bounded-concurrency dispatch worker it feeds is spawned once by
/// [`NotifierHandle::spawn`] and owned by the service binary's `main`, per
/// the "no module-level mutable state" design note — every other call site
/// only ever holds a clone of this handle.
#[derive(Clone)]
pub struct NotifierHandle {
    inner: Arc<NotifierInner>,
}

impl NotifierHandle {
    /// Spawns the dispatch worker and returns a handle to it. `gateway_url`
    /// is `None` when outbound messaging credentials are absent from the
    /// environment — the queue still accepts jobs so callers don't need to
    /// branch, but the worker drops them after logging, degrading gracefully
    /// rather than failing the order path that triggered the notification.
    #[must_use]
    pub fn spawn(
        client: reqwest::Client,
        gateway_url: Option<String>,
        queue_capacity: usize,
        concurrency: usize,
        max_attempts: u32,
        external_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let inner = Arc::new(NotifierInner { tx, in_flight: Mutex::new(FxHashSet::default()) });
        tokio::spawn(dispatch_loop(rx, client, gateway_url, concurrency, max_attempts, external_timeout, Arc::clone(&inner)));
        Self { inner }
    }

    /// A handle with no running worker, for tests and for degraded startup
    /// where the messaging gateway is not configured at all. `notify` always
    /// returns `false`.
    #[must_use]
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { inner: Arc::new(NotifierInner { tx, in_flight: Mutex::new(FxHashSet::default()) }) }
    }

    /// Enqueues `body` for delivery to `recipient`, deduplicated on
    /// `dedup_key` (conventionally `"{template}:{order_id}:{recipient}"`).
    /// Returns `false` without enqueuing if a send for this exact key is
    /// already in flight or queue-full backpressure rejects it — the caller
    /// never blocks and never fails its own operation because of this. The
    /// key is released once the worker finishes the job, whether it was
    /// delivered or its retries were exhausted, so a later legitimate resend
    /// of the same key is never silently swallowed.
    pub fn notify(&self, recipient: impl Into<String>, dedup_key: impl Into<String>, body: String) -> bool {
        let dedup_key = dedup_key.into();
        {
            let mut in_flight = self.inner.in_flight.lock();
            if !in_flight.insert(dedup_key.clone()) {
                debug!(dedup_key, "notification already in flight, skipping duplicate");
                return false;
            }
        }

        let job = NotificationJob { recipient: recipient.into(), dedup_key: dedup_key.clone(), body };
        match self.inner.tx.try_send(job) {
            Ok(()) => true,
            Err(err) => {
                self.inner.in_flight.lock().remove(&dedup_key);
                warn!(dedup_key, error = %err, "notification queue full or closed, dropping");
                false
            }
        }
    }
}

async fn dispatch_loop(
    mut rx: mpsc::Receiver<NotificationJob>,
    client: reqwest::Client,
    gateway_url: Option<String>,
    concurrency: usize,
    max_attempts: u32,
    external_timeout: Duration,
    inner: Arc<NotifierInner>,
) {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    while let Some(job) = rx.recv().await {
        let semaphore = Arc::clone(&semaphore);
        let client = client.clone();
        let gateway_url = gateway_url.clone();
        let inner = Arc::clone(&inner);
        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire().await else { return };
            deliver_with_retry(&client, gateway_url.as_deref(), &job, max_attempts, external_timeout).await;
            inner.in_flight.lock().remove(&job.dedup_key);
        });
    }
}

/// Submits one job, retrying with exponential backoff (base 1s, capped at
/// 30s) up to `max_attempts` times. A `None` gateway URL means messaging
/// credentials are absent — logged once and dropped, never retried.
async fn deliver_with_retry(
    client: &reqwest::Client,
    gateway_url: Option<&str>,
    job: &NotificationJob,
    max_attempts: u32,
    external_timeout: Duration,
) {
    let Some(gateway_url) = gateway_url else {
        info!(recipient = %job.recipient, "messaging gateway not configured, notification dropped");
        return;
    };

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match send_once(client, gateway_url, job, external_timeout).await {
            Ok(()) => {
                info!(recipient = %job.recipient, dedup_key = %job.dedup_key, attempt, "notification delivered");
                return;
            }
            Err(err) => {
                if attempt >= max_attempts {
                    error!(
                        recipient = %job.recipient, dedup_key = %job.dedup_key, attempt, error = %err,
                        "notification delivery failed, retries exhausted"
                    );
                    return;
                }
                let backoff = Duration::from_secs(1u64.saturating_mul(1 << attempt.min(5)));
                warn!(recipient = %job.recipient, attempt, error = %err, backoff_secs = backoff.as_secs(), "notification delivery failed, retrying");
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

async fn send_once(client: &reqwest::Client, gateway_url: &str, job: &NotificationJob, timeout: Duration) -> anyhow::Result<()> {
    let body = serde_json::json!({ "channel_id": job.recipient, "rendered_message": job.body });
    let response = client.post(gateway_url).json(&body).timeout(timeout).send().await?;
    response.error_for_status()?;
    Ok(())
}

/// A value-free re-export so callers formatting money into templates don't
/// need a separate import path.
pub type Amount = Money;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_interpolate_expected_fields() {
        let msg = templates::order_confirmation("ORD-1001", Money::new(1_400, 0));
        assert_eq!(msg, "Order ORD-1001 confirmed. Total: 1400.00. We're assigning a vendor.");

        let msg = templates::insufficient_credit(Money::new(500, 0));
        assert!(msg.contains("available credit is 500.00"));
    }

    #[test]
    fn disabled_handle_never_enqueues() {
        // `disabled()` drops its receiver immediately, so the channel is
        // closed and every `try_send` fails — the handle degrades instead
        // of panicking when there is no worker to drain it.
        let handle = NotifierHandle::disabled();
        let enqueued = handle.notify("+910000000000", "order_confirmation:o1:+910000000000", "hi".to_string());
        assert!(!enqueued);
    }

    #[test]
    fn rejected_enqueue_releases_the_dedup_slot() {
        // A dropped enqueue must not permanently occupy its dedup key —
        // otherwise a legitimate later retry would be silently swallowed.
        let handle = NotifierHandle::disabled();
        let key = "vendor_assignment:o1:v1";
        assert!(!handle.notify("v1", key, "a".to_string()));
        assert!(!handle.notify("v1", key, "b".to_string()));
    }
}
