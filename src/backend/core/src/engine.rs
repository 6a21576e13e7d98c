//! Process-wide engine state.
//!
//! The `Engine` owns everything a runner needs besides the job and the
//! store: the clock, the shared HTTP client, the auth provider and the
//! notifier. There is no hidden global state; construct one engine at
//! startup and hand it to every runner.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::jobs::auth::{AuthProvider, OauthPasswordProvider};
use crate::jobs::job::Job;
use crate::jobs::notify::{Mailer, Notifier};
use crate::jobs::runner::JobRunner;

pub struct Engine {
    clock: Arc<dyn Clock>,
    http: reqwest::Client,
    auth: Option<Arc<dyn AuthProvider>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl Engine {
    /// An engine with the wall clock and no auth or mail configured.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Wire up auth and mail from configuration.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let mut builder = Self::builder();
        if let Some(provider) = OauthPasswordProvider::from_config(&cfg.security.oauth2)? {
            builder = builder.auth(Arc::new(provider));
        }
        if let Some(mailer) = Mailer::from_config(&cfg.mailer)? {
            builder = builder.notifier(Arc::new(mailer));
        }
        Ok(builder.build())
    }

    /// Construct a runner for one firing of `job`.
    pub fn runner(&self, job: Job) -> JobRunner<'_> {
        JobRunner::new(self, job)
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn auth(&self) -> Option<&Arc<dyn AuthProvider>> {
        self.auth.as_ref()
    }

    pub(crate) fn notifier(&self) -> Option<&Arc<dyn Notifier>> {
        self.notifier.as_ref()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
pub struct EngineBuilder {
    clock: Option<Arc<dyn Clock>>,
    http: Option<reqwest::Client>,
    auth: Option<Arc<dyn AuthProvider>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl EngineBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    pub fn auth(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(provider);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            http: self.http.unwrap_or_default(),
            auth: self.auth,
            notifier: self.notifier,
        }
    }
}
