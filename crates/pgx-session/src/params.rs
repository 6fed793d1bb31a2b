//! Connection parameters.

use std::fmt;
use std::sync::Arc;

/// Parameters used to open a new session.
///
/// An immutable value: the pool stores one copy and hands a reference to the
/// factory each time it needs to grow. Cloning is cheap.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    endpoint: Arc<str>,
    user: Arc<str>,
    database: Arc<str>,
    password: Option<Arc<str>>,
    application_name: Option<Arc<str>>,
}

impl ConnectionParameters {
    /// Create parameters for the given endpoint, user and database.
    ///
    /// The endpoint is either a Unix socket path (e.g.
    /// `/tmp/.s.PGSQL.5432`) or a `host:port` pair.
    pub fn new(
        endpoint: impl Into<Arc<str>>,
        user: impl Into<Arc<str>>,
        database: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            user: user.into(),
            database: database.into(),
            password: None,
            application_name: None,
        }
    }

    /// Set the password used for authentication.
    #[must_use]
    pub fn password(mut self, password: impl Into<Arc<str>>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the application name reported to the server.
    #[must_use]
    pub fn application_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Endpoint to connect to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Check if the endpoint is a Unix domain socket path.
    #[must_use]
    pub fn is_unix_socket(&self) -> bool {
        self.endpoint.starts_with('/')
    }

    /// User identity.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Target database name.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Password, if one was configured.
    #[must_use]
    pub fn get_password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Application name, if one was configured.
    #[must_use]
    pub fn get_application_name(&self) -> Option<&str> {
        self.application_name.as_deref()
    }
}

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("endpoint", &self.endpoint)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("application_name", &self.application_name)
            .finish()
    }
}
