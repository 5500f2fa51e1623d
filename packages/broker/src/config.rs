//! Broker connection configuration.

/// Where the connection manager should connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerTarget {
    /// A Redis connection URL.
    Redis(String),
    /// The in-process broker.
    Memory,
}

/// Broker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Full connection string; takes precedence over host/port/password.
    pub connection_url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub password: Option<String>,
    /// Ping the broker before handing out the connection.
    pub enable_ready_check: bool,
    /// Prefix for every broker key.
    pub key_prefix: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            connection_url: None,
            host: None,
            port: None,
            password: None,
            enable_ready_check: true,
            key_prefix: Self::DEFAULT_PREFIX.to_string(),
        }
    }
}

impl BrokerConfig {
    pub const DEFAULT_PORT: u16 = 6379;
    pub const DEFAULT_PREFIX: &'static str = "bull";
    pub const MEMORY_SCHEME: &'static str = "memory://";

    /// A config for the in-process broker.
    pub fn memory() -> Self {
        Self::url(Self::MEMORY_SCHEME)
    }

    /// A config that connects to the given URL verbatim.
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            connection_url: Some(url.into()),
            ..Default::default()
        }
    }

    /// A config composed from a host; port and password may be added.
    pub fn host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Default::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_ready_check(mut self, enable: bool) -> Self {
        self.enable_ready_check = enable;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Resolve the connection target.
    ///
    /// An explicit URL is used verbatim. Otherwise host/port/password are
    /// composed into a Redis URL. Without either, there is nothing to
    /// connect to and `None` is returned.
    pub fn target(&self) -> Option<BrokerTarget> {
        if let Some(url) = self.connection_url.as_deref().and_then(non_blank) {
            if url.starts_with(Self::MEMORY_SCHEME) {
                return Some(BrokerTarget::Memory);
            }
            return Some(BrokerTarget::Redis(url.to_string()));
        }

        let host = self.host.as_deref().and_then(non_blank)?;
        let port = self.port.unwrap_or(Self::DEFAULT_PORT);
        let url = match self.password.as_deref().and_then(non_blank) {
            Some(password) => format!(
                "redis://:{}@{}:{}",
                urlencoding::encode(password),
                host,
                port
            ),
            None => format!("redis://{}:{}", host, port),
        };
        Some(BrokerTarget::Redis(url))
    }
}

fn non_blank(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Hide credentials in a connection URL before it is logged.
pub(crate) fn redact(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    match rest.rfind('@') {
        Some(at) => format!("{}://***@{}", &url[..scheme_end], &rest[at + 1..]),
        None => url.to_string(),
    }
}
