//! SMTP delivery over implicit TLS

use super::DigestSender;
use crate::config::{Config, MailConfig};
use crate::error::{Error, Result};
use anyhow::Context;
use async_trait::async_trait;
use lettre::message::{Mailbox, Message, MultiPart};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};
use tracing::debug;

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    recipients: Vec<Mailbox>,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig, password: String) -> Result<Self> {
        if config.username.is_empty() {
            return Err(Error::Config("mail.username is not set".to_string()));
        }
        if config.recipients.is_empty() {
            return Err(Error::Config("mail.recipients is empty".to_string()));
        }

        let sender = if config.from.is_empty() {
            &config.username
        } else {
            &config.from
        };
        let from: Mailbox = sender.parse()?;
        let recipients = config
            .recipients
            .iter()
            .map(|r| r.parse::<Mailbox>())
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(Credentials::new(config.username.clone(), password))
            .build();

        Ok(Self {
            transport,
            from,
            recipients,
        })
    }

    /// Build from configuration, reading the password from the configured
    /// environment variable
    pub fn from_config(config: &Config) -> Result<Self> {
        let password = config.smtp_password().ok_or_else(|| {
            Error::Config(format!(
                "SMTP password not set; export {}",
                config.mail.password_env
            ))
        })?;
        Self::new(&config.mail, password)
    }

    /// Assemble the multipart message without sending it
    pub fn build_message(&self, subject: &str, plain: &str, html: &str) -> Result<Message> {
        let mut builder = Message::builder().from(self.from.clone()).subject(subject);
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }

        let message = builder
            .multipart(MultiPart::alternative_plain_html(
                plain.to_string(),
                html.to_string(),
            ))
            .context("build digest email")?;
        Ok(message)
    }
}

#[async_trait]
impl DigestSender for SmtpMailer {
    async fn send(&self, subject: &str, plain: &str, html: &str) -> Result<()> {
        let message = self.build_message(subject, plain, html)?;
        debug!(recipients = self.recipients.len(), "Sending digest email");
        self.transport.send(message).await?;
        Ok(())
    }
}
