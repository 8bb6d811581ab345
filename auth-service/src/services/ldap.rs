//! LDAP directory connections for bind-based authentication.

use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapConnSettings};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LdapConfig;

/// LDAP result code for a rejected bind.
const INVALID_CREDENTIALS_RC: u32 = 49;

/// Outcome of a single simple bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    Accepted,
    Rejected,
}

/// Opens connections to an external directory.
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    /// Transport failures are errors; nothing has been bound yet.
    async fn connect(&self) -> Result<Box<dyn DirectoryConnection>, anyhow::Error>;
}

/// One open directory connection. Must be closed by the caller on every path.
#[async_trait]
pub trait DirectoryConnection: Send {
    /// `Ok(Rejected)` for refused credentials, `Err` for transport or protocol failures.
    async fn bind(&mut self, dn: &str, password: &str) -> Result<BindOutcome, anyhow::Error>;
    async fn close(&mut self);
}

pub struct LdapConnector {
    url: String,
    timeout: Duration,
}

impl LdapConnector {
    pub fn new(config: &LdapConfig) -> Self {
        Self {
            url: config.url(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }
}

#[async_trait]
impl DirectoryConnector for LdapConnector {
    async fn connect(&self) -> Result<Box<dyn DirectoryConnection>, anyhow::Error> {
        let settings = LdapConnSettings::new().set_conn_timeout(self.timeout);
        let (conn, ldap) = LdapConnAsync::with_settings(settings, &self.url).await?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                tracing::debug!(error = %e, "LDAP connection driver exited");
            }
        });

        Ok(Box::new(LdapConnection {
            ldap,
            timeout: self.timeout,
        }))
    }
}

struct LdapConnection {
    ldap: ldap3::Ldap,
    timeout: Duration,
}

#[async_trait]
impl DirectoryConnection for LdapConnection {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<BindOutcome, anyhow::Error> {
        let result = self
            .ldap
            .with_timeout(self.timeout)
            .simple_bind(dn, password)
            .await?;

        match result.rc {
            0 => Ok(BindOutcome::Accepted),
            INVALID_CREDENTIALS_RC => Ok(BindOutcome::Rejected),
            rc => Err(anyhow::anyhow!(
                "Bind failed with result code {}: {}",
                rc,
                result.text
            )),
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ldap.unbind().await {
            tracing::debug!(error = %e, "LDAP unbind failed");
        }
    }
}

/// Shared state behind [`MockDirectory`] and its connections.
#[derive(Default)]
struct MockDirectoryState {
    entries: HashMap<String, String>,
    unreachable: bool,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// In-memory directory keyed by DN, counting opened and closed connections.
#[derive(Clone, Default)]
pub struct MockDirectory {
    state: Arc<MockDirectoryState>,
}

impl MockDirectory {
    pub fn new(entries: &[(&str, &str)]) -> Self {
        Self {
            state: Arc::new(MockDirectoryState {
                entries: entries
                    .iter()
                    .map(|(dn, pw)| (dn.to_string(), pw.to_string()))
                    .collect(),
                ..Default::default()
            }),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            state: Arc::new(MockDirectoryState {
                unreachable: true,
                ..Default::default()
            }),
        }
    }

    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryConnector for MockDirectory {
    async fn connect(&self) -> Result<Box<dyn DirectoryConnection>, anyhow::Error> {
        if self.state.unreachable {
            return Err(anyhow::anyhow!("connection refused"));
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockDirectoryConnection {
            state: self.state.clone(),
        }))
    }
}

struct MockDirectoryConnection {
    state: Arc<MockDirectoryState>,
}

#[async_trait]
impl DirectoryConnection for MockDirectoryConnection {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<BindOutcome, anyhow::Error> {
        Ok(match self.state.entries.get(dn) {
            Some(expected) if expected == password => BindOutcome::Accepted,
            _ => BindOutcome::Rejected,
        })
    }

    async fn close(&mut self) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}
