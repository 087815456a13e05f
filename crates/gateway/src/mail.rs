//! Verification mail delivery.
//!
//! Signup never talks to SMTP directly. It drops a [`MailJob`] into the
//! [`MailOutbox`], and a background [`MailDispatcher`] hands queued jobs to
//! the configured [`Mailer`]. A failed send is logged as an operational
//! alarm; the user record it belongs to is unaffected.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::MailConfig;

pub const OUTBOX_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail delivery failed: {0}")]
    SendFailed(String),

    #[error("mail settings rejected: {0}")]
    InvalidConfig(String),

    #[error("Mail queue is unavailable")]
    QueueUnavailable,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification(&self, to: &str, link: &str) -> Result<(), MailError>;
}

pub struct VerificationEmail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl VerificationEmail {
    pub fn new(link: &str) -> Self {
        Self {
            subject: "Email Verification".to_string(),
            text: format!(
                "Please verify your email by clicking the following link: {}\n\nThe link expires in one hour.",
                link
            ),
            html: format!(
                "<p>Please verify your email by clicking the following link: <a href=\"{0}\">{0}</a></p>\
                 <p>The link expires in one hour.</p>",
                link
            ),
        }
    }
}

/// Implicit-TLS submission port. Any other port with TLS on negotiates
/// STARTTLS.
const SMTPS_PORT: u16 = 465;

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

fn relay_error(err: lettre::transport::smtp::Error) -> MailError {
    MailError::InvalidConfig(format!("unusable SMTP relay: {}", err))
}

fn transport_for(config: &MailConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>, MailError> {
    let mut builder = match (config.use_tls, config.port) {
        (false, port) => {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host).port(port)
        }
        (true, port) => {
            let params = TlsParameters::new(config.host.clone())
                .map_err(|e| MailError::InvalidConfig(format!("bad TLS parameters for {}: {}", config.host, e)))?;
            if port == SMTPS_PORT {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                    .map_err(relay_error)?
                    .port(port)
                    .tls(Tls::Wrapper(params))
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                    .map_err(relay_error)?
                    .port(port)
                    .tls(Tls::Required(params))
            }
        }
    };

    if let (Some(user), Some(pass)) = (&config.username, &config.password) {
        builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
    }
    Ok(builder.build())
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> Result<Self, MailError> {
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| MailError::InvalidConfig(format!("EMAIL_FROM {:?} is not a mailbox: {}", config.from, e)))?;

        Ok(Self {
            transport: transport_for(config)?,
            from,
        })
    }

    fn compose(&self, to: &str, link: &str) -> Result<Message, MailError> {
        let recipient = to
            .parse::<Mailbox>()
            .map_err(|e| MailError::InvalidConfig(format!("recipient {:?} is not a mailbox: {}", to, e)))?;
        let content = VerificationEmail::new(link);

        let body = MultiPart::alternative()
            .singlepart(SinglePart::builder().header(ContentType::TEXT_PLAIN).body(content.text))
            .singlepart(SinglePart::builder().header(ContentType::TEXT_HTML).body(content.html));

        Message::builder()
            .from(self.from.clone())
            .to(recipient)
            .subject(content.subject)
            .multipart(body)
            .map_err(|e| MailError::SendFailed(format!("message assembly: {}", e)))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_verification(&self, to: &str, link: &str) -> Result<(), MailError> {
        let message = self.compose(to, link)?;
        self.transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| MailError::SendFailed(e.to_string()))
    }
}

/// Stand-in used when no SMTP host is configured: the link is written to
/// the log so a developer can follow it by hand.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification(&self, to: &str, link: &str) -> Result<(), MailError> {
        info!("SMTP not configured; verification link for {}: {}", to, link);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailJob {
    pub to: String,
    pub link: String,
}

#[derive(Clone)]
pub struct MailOutbox {
    tx: mpsc::Sender<MailJob>,
}

impl MailOutbox {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<MailJob>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Never blocks the request: a full or closed queue is reported back.
    pub fn enqueue(&self, job: MailJob) -> Result<(), MailError> {
        self.tx.try_send(job).map_err(|e| {
            warn!("Verification mail not queued: {}", e);
            MailError::QueueUnavailable
        })
    }
}

pub struct MailDispatcher {
    rx: mpsc::Receiver<MailJob>,
    mailer: Arc<dyn Mailer>,
}

impl MailDispatcher {
    pub fn new(rx: mpsc::Receiver<MailJob>, mailer: Arc<dyn Mailer>) -> Self {
        Self { rx, mailer }
    }

    /// Runs until every outbox handle has been dropped.
    pub async fn start(mut self) {
        info!("Mail dispatcher started.");
        while let Some(job) = self.rx.recv().await {
            match self.mailer.send_verification(&job.to, &job.link).await {
                Ok(()) => info!("Verification email sent to {}", job.to),
                Err(e) => error!(
                    "ALERT: verification email to {} was not delivered: {}. The account exists; the user can request a new link.",
                    job.to, e
                ),
            }
        }
        info!("Mail dispatcher stopped.");
    }
}
