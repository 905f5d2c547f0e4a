//! E-mail alert sent when a watched item becomes available.

use crate::config::NotifyConfig;
use crate::model::SearchSpec;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Local;
use lettre::message::{Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tracing::info;

/// Receives the availability trigger alongside the booking attempt.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn item_available(&self, search: &SearchSpec) -> Result<()>;
}

/// Sends the alert through an SMTP relay with STARTTLS.
pub struct SmtpNotifier {
    config: NotifyConfig,
}

impl SmtpNotifier {
    /// Create a notifier for the configured relay.
    pub fn new(config: NotifyConfig) -> Self {
        Self { config }
    }

    fn sender(&self) -> &str {
        self.config
            .from
            .as_deref()
            .unwrap_or(self.config.smtp_user.as_str())
    }

    fn build_message(&self, search: &SearchSpec) -> Result<Message> {
        let from: Mailbox = parse_mailbox(self.sender())?;
        let to: Mailbox = parse_mailbox(&self.config.to)?;
        let body = format!(
            "{} became available at {}.\n\nA booking attempt has started.\n",
            search,
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        Message::builder()
            .from(from)
            .to(to)
            .subject(format!("Sponsorship available: {}", search.keyword))
            .body(body)
            .map_err(|e| Error::Notify(format!("could not build message: {}", e)))
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox> {
    address
        .parse()
        .map_err(|e| Error::Notify(format!("invalid address '{}': {}", address, e)))
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn item_available(&self, search: &SearchSpec) -> Result<()> {
        let message = self.build_message(search)?;
        let creds = Credentials::new(
            self.config.smtp_user.clone(),
            self.config.smtp_password.clone(),
        );
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)
            .map_err(|e| Error::Notify(format!("smtp relay {}: {}", self.config.smtp_host, e)))?
            .port(self.config.smtp_port)
            .credentials(creds)
            .build();
        mailer
            .send(message)
            .await
            .map_err(|e| Error::Notify(format!("failed to send e-mail: {}", e)))?;
        info!("availability e-mail sent to {}", self.config.to);
        Ok(())
    }
}
