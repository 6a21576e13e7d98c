//! Failure notifications over SMTP.
//!
//! Delivery is best effort: the runner logs a failed notification and moves
//! on; it never becomes the run's error.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::warn;

use crate::config::MailerConfig;
use crate::error::{Result, TempusError};
use crate::jobs::job::Job;
use crate::jobs::stat::JobStat;

/// Fire-and-forget failure notification.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// SMTP-backed notifier.
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl Mailer {
    /// Build from configuration. Returns `None` (mail disabled) when the
    /// host, port or sender address is missing.
    pub fn from_config(cfg: &MailerConfig) -> Result<Option<Self>> {
        if !cfg.is_configured() {
            // Only worth a warning when a transport was set up but the
            // sender address was forgotten.
            if !cfg.host.is_empty() && cfg.port != 0 && cfg.from_address.is_empty() {
                warn!("no mailer from_address configured, cannot send mail");
            }
            return Ok(None);
        }

        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(cfg.host.as_str()).port(cfg.port);
        if !cfg.skip_verify {
            let params = TlsParameters::new(cfg.host.clone())
                .map_err(|err| TempusError::Notify(format!("tls setup failed: {err}")))?;
            builder = builder.tls(Tls::Required(params));
        }
        if !cfg.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                cfg.username.clone(),
                cfg.password.clone(),
            ));
        }

        Ok(Some(Self {
            transport: builder.build(),
            from_address: cfg.from_address.clone(),
        }))
    }
}

#[async_trait]
impl Notifier for Mailer {
    async fn notify(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let message = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|err| TempusError::Notify(format!("invalid from address: {err}")))?,
            )
            .to(to
                .parse()
                .map_err(|err| TempusError::Notify(format!("invalid to address: {err}")))?)
            .subject(subject)
            .body(body.to_string())
            .map_err(|err| TempusError::Notify(err.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|err| TempusError::Notify(format!("unable to send email: {err}")))?;
        Ok(())
    }
}

/// Compose and deliver the failure notice for a run, addressed to the job's
/// owner.
pub async fn notify_job_failure(notifier: &dyn Notifier, job: &Job, stat: &JobStat) -> Result<()> {
    let subject = format!("Job {} Failed", job.name);
    let body = format!(
        "Please be advised that your job failed.\n\n\
         Job: {} ({})\nRun: {}\nStatus: {}\nOutput:\n{}",
        job.name, job.id, stat.id, stat.status, stat.output,
    );
    notifier.notify(&job.owner, &subject, &body).await
}
