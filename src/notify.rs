use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::redact;
use crate::time::TargetTime;

/// Relay used when none is configured
pub const DEFAULT_SMTP_RELAY: &str = "smtp.outlook.com";

/// SMTP submission port (STARTTLS)
pub const SMTP_SUBMISSION_PORT: u16 = 587;

/// Upper bound on a whole send, connect through QUIT
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

pub const REMINDER_SUBJECT: &str = "Notification from homeassistant";

/// Mailbox credentials for the reminder
#[derive(Clone, PartialEq, Eq)]
pub struct EmailSettings {
    pub sender: String,
    pub receiver: String,
    pub password: String,
}

impl fmt::Debug for EmailSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailSettings")
            .field("sender", &redact::email(&self.sender))
            .field("receiver", &redact::email(&self.receiver))
            .field("password", &redact::secret(&self.password))
            .finish()
    }
}

/// Subject and plain-text body of a reminder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub subject: String,
    pub body: String,
}

/// Compose the reminder for a target reached in `zone`
pub fn compose_reminder(target: TargetTime, zone: Tz) -> Reminder {
    Reminder {
        subject: REMINDER_SUBJECT.to_string(),
        body: format!(
            "a reminder from homeassistant to check your work, it is {} at {}",
            target,
            zone.name()
        ),
    }
}

/// `Importance: high` header, honoured by Outlook and most desktop clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HighImportance;

impl Header for HighImportance {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("Importance")
    }

    fn parse(s: &str) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        if s.trim().eq_ignore_ascii_case("high") {
            Ok(HighImportance)
        } else {
            Err(format!("unsupported importance '{}'", s).into())
        }
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), "high".to_string())
    }
}

/// Build the RFC 5322 message for a reminder
pub fn build_message(settings: &EmailSettings, reminder: &Reminder) -> Result<Message> {
    Message::builder()
        .from(settings.sender.parse().context("Invalid sender address")?)
        .to(settings.receiver.parse().context("Invalid receiver address")?)
        .subject(reminder.subject.clone())
        .header(ContentType::TEXT_PLAIN)
        .header(HighImportance)
        .body(reminder.body.clone())
        .context("Failed to build reminder email")
}

/// Outbound mail channel
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, settings: &EmailSettings, reminder: &Reminder) -> Result<()>;
}

/// Sends through an SMTP relay: STARTTLS upgrade, then LOGIN/PLAIN auth as the sender
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    relay: String,
    port: u16,
}

impl SmtpMailer {
    pub fn new(relay: impl Into<String>, port: u16) -> Self {
        Self {
            relay: relay.into(),
            port,
        }
    }

    pub fn relay(&self) -> &str {
        &self.relay
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Default for SmtpMailer {
    fn default() -> Self {
        Self::new(DEFAULT_SMTP_RELAY, SMTP_SUBMISSION_PORT)
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, settings: &EmailSettings, reminder: &Reminder) -> Result<()> {
        let message = build_message(settings, reminder)?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.relay)
            .with_context(|| format!("Failed to configure SMTP relay {}", self.relay))?
            .port(self.port)
            .credentials(Credentials::new(
                settings.sender.clone(),
                settings.password.clone(),
            ))
            .build();

        debug!("Connecting to SMTP relay {}:{}", self.relay, self.port);
        transport
            .send(message)
            .await
            .with_context(|| format!("SMTP delivery via {} failed", self.relay))?;
        Ok(())
    }
}

/// What the notifier did during one update cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyOutcome {
    /// Secondary clock is not at the target minute
    NotDue,
    /// Target reached and the reminder was delivered to the relay
    Sent,
    /// Target reached but delivery failed; nothing retried
    Failed,
    /// Target reached but no sender/receiver/password configured
    Unconfigured,
    /// Target reached but a reminder already went out this minute
    Suppressed,
}

impl NotifyOutcome {
    /// True when the target minute was reached, whatever happened next
    pub fn was_due(&self) -> bool {
        !matches!(self, NotifyOutcome::NotDue)
    }
}

/// Fires the reminder email when the secondary clock reaches the target
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    send_timeout: Duration,
}

impl Notifier {
    pub fn new(mailer: Arc<dyn Mailer>, send_timeout: Duration) -> Self {
        Self {
            mailer,
            send_timeout,
        }
    }

    /// Compare the secondary clock against `target` and, on an exact
    /// hour/minute match, send one reminder.
    ///
    /// Never fails: delivery errors and timeouts are logged and reported as
    /// [`NotifyOutcome::Failed`].
    pub async fn maybe_notify(
        &self,
        secondary: &DateTime<Tz>,
        target: TargetTime,
        email: Option<&EmailSettings>,
    ) -> NotifyOutcome {
        if !target.matches(secondary) {
            return NotifyOutcome::NotDue;
        }

        let zone = secondary.timezone();
        let Some(email) = email else {
            warn!(
                "Reminder due at {} in {} but email is not configured",
                target,
                zone.name()
            );
            return NotifyOutcome::Unconfigured;
        };

        info!("Reminder due at {} in {}, sending email", target, zone.name());
        let reminder = compose_reminder(target, zone);

        match timeout(self.send_timeout, self.mailer.send(email, &reminder)).await {
            Ok(Ok(())) => {
                info!("Email to {} has been sent", redact::email(&email.receiver));
                NotifyOutcome::Sent
            }
            Ok(Err(e)) => {
                error!("Problem sending reminder email: {:#}", e);
                NotifyOutcome::Failed
            }
            Err(_) => {
                error!("Reminder email timed out after {:?}", self.send_timeout);
                NotifyOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Europe::London;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<Reminder>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, _settings: &EmailSettings, reminder: &Reminder) -> Result<()> {
            self.sent.lock().unwrap().push(reminder.clone());
            Ok(())
        }
    }

    struct FailingMailer;

    #[async_trait]
    impl Mailer for FailingMailer {
        async fn send(&self, _settings: &EmailSettings, _reminder: &Reminder) -> Result<()> {
            anyhow::bail!("connection timed out")
        }
    }

    struct StalledMailer;

    #[async_trait]
    impl Mailer for StalledMailer {
        async fn send(&self, _settings: &EmailSettings, _reminder: &Reminder) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    fn settings() -> EmailSettings {
        EmailSettings {
            sender: "clock@example.com".to_string(),
            receiver: "me@example.org".to_string(),
            password: "hunter2".to_string(),
        }
    }

    fn london(hour: u32, minute: u32) -> DateTime<Tz> {
        London.with_ymd_and_hms(2022, 1, 1, hour, minute, 12).unwrap()
    }

    #[test]
    fn test_compose_reminder() {
        let reminder = compose_reminder(TargetTime::new(10, 5).unwrap(), London);
        assert_eq!(reminder.subject, "Notification from homeassistant");
        assert!(reminder.body.contains("10:05"));
        assert!(reminder.body.contains("Europe/London"));
    }

    #[test]
    fn test_build_message_headers() {
        let reminder = compose_reminder(TargetTime::new(10, 30).unwrap(), London);
        let message = build_message(&settings(), &reminder).expect("should build");
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("From: clock@example.com"));
        assert!(raw.contains("To: me@example.org"));
        assert!(raw.contains("Subject: Notification from homeassistant"));
        assert!(raw.contains("Importance: high"));
        assert!(raw.contains("Content-Type: text/plain"));
        assert!(!raw.contains("hunter2"));
    }

    #[test]
    fn test_build_message_rejects_bad_addresses() {
        let reminder = compose_reminder(TargetTime::new(10, 30).unwrap(), London);

        let mut bad_sender = settings();
        bad_sender.sender = "not an address".to_string();
        let err = build_message(&bad_sender, &reminder).unwrap_err().to_string();
        assert!(err.contains("sender"), "error should mention sender: {}", err);

        let mut bad_receiver = settings();
        bad_receiver.receiver = String::new();
        let err = build_message(&bad_receiver, &reminder).unwrap_err().to_string();
        assert!(err.contains("receiver"), "error should mention receiver: {}", err);
    }

    #[test]
    fn test_email_settings_debug_redacts() {
        let debug = format!("{:?}", settings());
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("clock@"));
        assert!(debug.contains("c***@example.com"));
    }

    #[test]
    fn test_smtp_mailer_defaults() {
        let mailer = SmtpMailer::default();
        assert_eq!(mailer.relay(), "smtp.outlook.com");
        assert_eq!(mailer.port(), 587);
    }

    #[test]
    fn test_outcome_was_due() {
        assert!(!NotifyOutcome::NotDue.was_due());
        for outcome in [
            NotifyOutcome::Sent,
            NotifyOutcome::Failed,
            NotifyOutcome::Unconfigured,
            NotifyOutcome::Suppressed,
        ] {
            assert!(outcome.was_due());
        }
    }

    #[test]
    fn test_outcome_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&NotifyOutcome::NotDue).unwrap(), "\"not_due\"");
        assert_eq!(serde_json::to_string(&NotifyOutcome::Sent).unwrap(), "\"sent\"");
    }

    #[tokio::test]
    async fn test_fires_on_exact_match() {
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = Notifier::new(mailer.clone(), DEFAULT_SEND_TIMEOUT);
        let target = TargetTime::new(10, 30).unwrap();

        let outcome = notifier.maybe_notify(&london(10, 30), target, Some(&settings())).await;

        assert_eq!(outcome, NotifyOutcome::Sent);
        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], compose_reminder(target, London));
    }

    #[tokio::test]
    async fn test_no_send_off_target() {
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = Notifier::new(mailer.clone(), DEFAULT_SEND_TIMEOUT);
        let target = TargetTime::new(10, 30).unwrap();

        for (h, m) in [(10, 31), (10, 29), (11, 30), (22, 30), (0, 0)] {
            let outcome = notifier.maybe_notify(&london(h, m), target, Some(&settings())).await;
            assert_eq!(outcome, NotifyOutcome::NotDue);
        }
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_email_skips_send() {
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = Notifier::new(mailer.clone(), DEFAULT_SEND_TIMEOUT);

        let outcome = notifier
            .maybe_notify(&london(10, 30), TargetTime::new(10, 30).unwrap(), None)
            .await;

        assert_eq!(outcome, NotifyOutcome::Unconfigured);
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failure_is_absorbed() {
        let notifier = Notifier::new(Arc::new(FailingMailer), DEFAULT_SEND_TIMEOUT);
        let outcome = notifier
            .maybe_notify(&london(10, 30), TargetTime::new(10, 30).unwrap(), Some(&settings()))
            .await;
        assert_eq!(outcome, NotifyOutcome::Failed);
    }

    #[tokio::test]
    async fn test_stalled_relay_times_out() {
        let notifier = Notifier::new(Arc::new(StalledMailer), Duration::from_millis(50));
        let outcome = notifier
            .maybe_notify(&london(10, 30), TargetTime::new(10, 30).unwrap(), Some(&settings()))
            .await;
        assert_eq!(outcome, NotifyOutcome::Failed);
    }
}
