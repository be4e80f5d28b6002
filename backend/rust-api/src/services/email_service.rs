use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};

use crate::config::EmailSettings;

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to_email: String,
    pub to_name: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<()>;
}

pub struct SmtpMailer {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(settings: &EmailSettings) -> Result<Self> {
        let from: Mailbox = format!("{} <{}>", settings.from_name, settings.from_email)
            .parse()
            .context("Invalid from email address")?;
        Ok(Self {
            from,
            transport: build_transport(settings)?,
        })
    }
}

fn build_transport(settings: &EmailSettings) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
    let creds = Credentials::new(settings.username.clone(), settings.password.clone());

    let builder = if settings.use_tls {
        AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
            .context("Invalid SMTP server for TLS")?
    } else if settings.starttls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .context("Invalid SMTP server for STARTTLS")?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
    }
    .port(settings.port)
    .timeout(Some(settings.timeout()))
    .credentials(creds);

    Ok(builder.build())
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        let to_address: Mailbox = format!("{} <{}>", email.to_name, email.to_email)
            .parse()
            .context("Invalid recipient email address")?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to_address)
            .subject(email.subject.as_str())
            .body(email.body.clone())
            .context("Failed to build result email")?;

        self.transport
            .send(message)
            .await
            .context("Failed to send result email")?;

        Ok(())
    }
}

/// Used when `EMAIL_SEND_DISABLED` is set. Every send fails, so attempts are
/// still recorded as undelivered.
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, _email: &OutgoingEmail) -> Result<()> {
        Err(anyhow!("email sending disabled"))
    }
}
