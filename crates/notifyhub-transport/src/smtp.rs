//! Reference SMTP transport (§4.3.2): STARTTLS (587, default), implicit TLS
//! (465), or plain (25), selected by configured port unless overridden.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Header, HeaderName, HeaderValue, Mailbox, Message as LettreMessage};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use notifyhub_common::{DeliveryResult, Message, MessageFormat, Target};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TransportError};
use crate::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpConnectionMode {
    Starttls,
    ImplicitTls,
    Plain,
}

impl SmtpConnectionMode {
    /// Default selection by port, per §4.3.2.
    pub fn for_port(port: u16) -> Self {
        match port {
            465 => SmtpConnectionMode::ImplicitTls,
            25 => SmtpConnectionMode::Plain,
            _ => SmtpConnectionMode::Starttls,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub mode: SmtpConnectionMode,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub timeout: Duration,
}

impl SmtpConfig {
    /// STARTTLS on 587 with the mode auto-selected from the port.
    pub fn new(host: impl Into<String>, port: u16, from: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            mode: SmtpConnectionMode::for_port(port),
            username: None,
            password: None,
            from: from.into(),
            timeout: Duration::from_secs(20),
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// Raw `X-Priority` header (1 = urgent .. 5 = minimal), derived from the
/// message's 1-5 priority field.
struct XPriority(u8);

impl Header for XPriority {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii("X-Priority".to_string()).expect("valid header name")
    }

    fn parse(s: &str) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(XPriority(s.trim().parse().unwrap_or(3)))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.to_string())
    }
}

/// Maps NotifyHub's 1 (minimal) .. 5 (urgent) onto the conventional email
/// `X-Priority` scale, where 1 is highest.
fn x_priority_for(priority: u8) -> u8 {
    match priority {
        5 => 1,
        4 => 2,
        3 => 3,
        2 => 4,
        _ => 5,
    }
}

pub struct SmtpTransport {
    name: String,
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    pub fn new(name: impl Into<String>, config: SmtpConfig) -> Result<Self> {
        let mut builder = match config.mode {
            SmtpConnectionMode::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                    .map_err(|e| TransportError::Config(format!("starttls setup failed: {e}")))?
            }
            SmtpConnectionMode::ImplicitTls => {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                    .map_err(|e| TransportError::Config(format!("tls setup failed: {e}")))?
            }
            SmtpConnectionMode::Plain => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            }
        }
        .port(config.port)
        .timeout(Some(config.timeout));

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            name: name.into(),
            config,
            transport: builder.build(),
        })
    }

    fn build_email(&self, message: &Message, target: &Target) -> Result<LettreMessage> {
        let from: Mailbox = self
            .config
            .from
            .parse()
            .map_err(|e| TransportError::Config(format!("invalid from address: {e}")))?;
        let to: Mailbox = target
            .value
            .parse()
            .map_err(|e| TransportError::Validation(format!("invalid recipient address: {e}")))?;

        let mut builder = LettreMessage::builder()
            .from(from)
            .to(to)
            .subject(message.title.clone())
            .header(XPriority(x_priority_for(message.priority)));

        if let Some(cc) = message.metadata.get("cc") {
            let cc: Mailbox = cc
                .parse()
                .map_err(|e| TransportError::Validation(format!("invalid cc address: {e}")))?;
            builder = builder.cc(cc);
        }

        let email = match message.format {
            MessageFormat::Html => builder
                .header(ContentType::TEXT_HTML)
                .body(message.body.clone()),
            _ => builder
                .header(ContentType::TEXT_PLAIN)
                .body(message.body.clone()),
        }
        .map_err(|e| TransportError::Internal(format!("failed to build email: {e}")))?;

        Ok(email)
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, format: MessageFormat) -> bool {
        matches!(
            format,
            MessageFormat::Text | MessageFormat::Html | MessageFormat::Markdown
        )
    }

    async fn send(
        &self,
        message: &Message,
        target: &Target,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<DeliveryResult> {
        let mut result = DeliveryResult::pending(&message.id, target.clone(), self.name.clone());
        let email = self.build_email(message, target)?;

        let send = self.transport.send(email);
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            outcome = tokio::time::timeout(timeout, send) => outcome
                .map_err(|_| TransportError::Timeout(timeout))?
                .map_err(classify_smtp_error)?,
        };

        result = result.mark_sent(Some(serde_json::json!({
            "code": response.code().to_string(),
        })));
        Ok(result)
    }

    fn validate(&self, message: &Message) -> Result<()> {
        if message.format == MessageFormat::Card {
            return Err(TransportError::Validation(
                "smtp transport does not support format=card".to_string(),
            ));
        }
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        let ok = self
            .transport
            .test_connection()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        if ok {
            Ok(())
        } else {
            Err(TransportError::Network(
                "smtp connection test failed".to_string(),
            ))
        }
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

fn classify_smtp_error(e: lettre::transport::smtp::Error) -> TransportError {
    if e.is_permanent() {
        TransportError::Platform {
            code: None,
            message: e.to_string(),
            retryable: false,
        }
    } else if e.is_transient() || e.is_timeout() {
        TransportError::Network(e.to_string())
    } else if e.is_client() {
        TransportError::Config(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}
