//! Outgoing mail.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::config::SmtpSettings;
use crate::error::SendError;

/// SMTP connect/send timeout.
const SMTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(20);

/// A mail with a plain-text body and an optional HTML alternative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub html_body: Option<String>,
}

/// Delivers mails.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), SendError>;
}

/// [`Notifier`] backed by an SMTP relay.
#[derive(Clone)]
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    host: String,
    port: u16,
}

impl SmtpNotifier {
    pub fn new(settings: &SmtpSettings) -> Result<Self, SendError> {
        let sender: Mailbox = settings
            .sender
            .parse()
            .map_err(|_| SendError::InvalidAddress(settings.sender.clone()))?;

        let builder = if settings.use_ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
        } else if settings.use_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
        } else {
            Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host))
        }
        .map_err(|e| SendError::Transport(e.to_string()))?;

        let mut builder = builder.port(settings.port).timeout(Some(SMTP_TIMEOUT));
        if !settings.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            sender,
            host: settings.host.clone(),
            port: settings.port,
        })
    }

    fn build_message(&self, message: &EmailMessage) -> Result<Message, SendError> {
        if message.recipients.is_empty() {
            return Err(SendError::NoRecipients);
        }

        let mut builder = Message::builder()
            .from(self.sender.clone())
            .subject(message.subject.clone());
        for recipient in &message.recipients {
            let mailbox: Mailbox = recipient
                .parse()
                .map_err(|_| SendError::InvalidAddress(recipient.clone()))?;
            builder = builder.to(mailbox);
        }

        match &message.html_body {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(
                message.body.clone(),
                html.clone(),
            )),
            None => builder.header(ContentType::TEXT_PLAIN).body(message.body.clone()),
        }
        .map_err(|e| SendError::Build(e.to_string()))
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, message: &EmailMessage) -> Result<(), SendError> {
        let email = self.build_message(message)?;

        info!(
            host = %self.host,
            port = self.port,
            recipients = %message.recipients.join(", "),
            subject = %message.subject,
            "Sending mail"
        );

        self.transport
            .send(email)
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        info!(subject = %message.subject, "Mail sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SmtpSettings {
        SmtpSettings {
            host: "localhost".to_string(),
            port: 2525,
            username: String::new(),
            password: String::new(),
            sender: "alerts@example.com".to_string(),
            use_starttls: false,
            use_ssl: false,
        }
    }

    fn message(recipients: &[&str]) -> EmailMessage {
        EmailMessage {
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            subject: "Pegel".to_string(),
            body: "Hallo".to_string(),
            html_body: None,
        }
    }

    #[test]
    fn test_invalid_sender_rejected() {
        let mut bad = settings();
        bad.sender = "not an address".to_string();

        assert!(matches!(
            SmtpNotifier::new(&bad),
            Err(SendError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_build_message_validates_recipients() {
        let notifier = SmtpNotifier::new(&settings()).unwrap();

        assert!(notifier.build_message(&message(&["a@example.com", "b@example.com"])).is_ok());
        assert!(matches!(
            notifier.build_message(&message(&[])),
            Err(SendError::NoRecipients)
        ));
        assert!(matches!(
            notifier.build_message(&message(&["broken"])),
            Err(SendError::InvalidAddress(addr)) if addr == "broken"
        ));
    }

    #[tokio::test]
    async fn test_html_body_becomes_alternative_part() {
        let notifier = SmtpNotifier::new(&settings()).unwrap();
        let plain = message(&["a@example.com"]);
        let mut html = plain.clone();
        html.html_body = Some("<p>Hallo</p>".to_string());

        let plain = String::from_utf8(notifier.build_message(&plain).unwrap().formatted()).unwrap();
        let html = String::from_utf8(notifier.build_message(&html).unwrap().formatted()).unwrap();

        assert!(plain.contains("Content-Type: text/plain"));
        assert!(!plain.contains("multipart"));
        assert!(html.contains("multipart/alternative"));
        assert!(html.contains("Content-Type: text/plain"));
        assert!(html.contains("Content-Type: text/html"));
    }
}
