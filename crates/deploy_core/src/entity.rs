use std::fmt;

/// Stable key of a configurable datasource within the selected workbook.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbType {
    PostgreSql,
    MySql,
    Redshift,
}

impl DbType {
    pub const ALL: [DbType; 3] = [DbType::PostgreSql, DbType::MySql, DbType::Redshift];

    /// Name used by the connection-test and deployment endpoints.
    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::PostgreSql => "PostgreSQL",
            DbType::MySql => "MySQL",
            DbType::Redshift => "Redshift",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|db| db.as_str().eq_ignore_ascii_case(raw))
    }

    /// Maps a source connection type (`postgres`, `mysql`, `redshift`) onto a target type.
    pub fn from_connection_type(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        if raw.starts_with("postgres") {
            Some(DbType::PostgreSql)
        } else if raw.starts_with("mysql") {
            Some(DbType::MySql)
        } else if raw.starts_with("redshift") {
            Some(DbType::Redshift)
        } else {
            None
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionParams {
    pub host: String,
    pub port: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl ConnectionParams {
    /// Host, port, username and password are required; the database name is optional.
    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("host", &self.host),
            ("port", &self.port),
            ("username", &self.username),
            ("password", &self.password),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }

    /// Copy with every field trimmed, as sent to the backend.
    pub fn trimmed(&self) -> Self {
        Self {
            host: self.host.trim().to_string(),
            port: self.port.trim().to_string(),
            database: self.database.trim().to_string(),
            username: self.username.trim().to_string(),
            password: self.password.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verification {
    #[default]
    Unverified,
    Success,
    Error,
}

/// Independent configuration record for one datasource.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DatasourceConfig {
    pub db_type: Option<DbType>,
    pub connection: ConnectionParams,
    pub verification: Verification,
}

impl DatasourceConfig {
    pub fn can_test(&self) -> bool {
        self.db_type.is_some() && self.connection.is_complete()
    }

    /// Readiness for execution: testable and verified.
    pub fn is_ready(&self) -> bool {
        self.can_test() && self.verification == Verification::Success
    }
}

/// Partial record for [`crate::ConfigStore::update`].
///
/// Top-level fields merge shallowly. `connection` replaces the whole nested
/// object, so callers must pass every connection field, not only the edited one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigPatch {
    pub db_type: Option<DbType>,
    pub connection: Option<ConnectionParams>,
    pub verification: Option<Verification>,
}

impl ConfigPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn db_type(mut self, db_type: DbType) -> Self {
        self.db_type = Some(db_type);
        self
    }

    pub fn connection(mut self, connection: ConnectionParams) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn verification(mut self, verification: Verification) -> Self {
        self.verification = Some(verification);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.db_type.is_none() && self.connection.is_none() && self.verification.is_none()
    }

    pub(crate) fn apply_to(self, record: &mut DatasourceConfig) {
        if let Some(db_type) = self.db_type {
            record.db_type = Some(db_type);
        }
        if let Some(connection) = self.connection {
            record.connection = connection;
        }
        if let Some(verification) = self.verification {
            record.verification = verification;
        }
    }
}
