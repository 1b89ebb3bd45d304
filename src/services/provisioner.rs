use rand::seq::SliceRandom;
use rand::Rng;
use std::fmt;
use thiserror::Error;
use tracing::{error, info};

use crate::config::{CredentialPolicy, Dialect};
use crate::database::{ConnectionHandle, DatabaseError};

const COLORS: &[&str] = &[
    "amber", "aqua", "azure", "beige", "black", "blue", "bronze", "coral", "crimson", "cyan",
    "gold", "gray", "green", "indigo", "ivory", "jade", "lime", "magenta", "maroon", "navy",
    "olive", "orange", "pink", "plum", "purple", "red", "ruby", "salmon", "silver", "teal",
    "violet", "white", "yellow",
];

const ADJECTIVES: &[&str] = &[
    "able", "bold", "brave", "bright", "calm", "clever", "cosmic", "curious", "daring", "eager",
    "fancy", "fierce", "gentle", "glad", "grand", "happy", "hidden", "honest", "jolly", "keen",
    "lively", "lucky", "mighty", "nimble", "noble", "polite", "proud", "quick", "quiet", "rapid",
    "shy", "silent", "swift", "tidy", "vivid", "wild", "wise", "witty", "zesty",
];

const ANIMALS: &[&str] = &[
    "badger", "beaver", "bison", "cobra", "crane", "dingo", "dolphin", "eagle", "falcon", "ferret",
    "gecko", "heron", "hyena", "ibis", "jackal", "koala", "lemur", "lynx", "marten", "moose",
    "narwhal", "ocelot", "otter", "panda", "puffin", "quokka", "raven", "salmon", "seal", "stoat",
    "tapir", "toucan", "walrus", "wombat", "yak", "zebra",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    CreateDatabase,
    CreateUser,
    GrantPrivileges,
    TransferOwnership,
    FlushPrivileges,
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProvisionStep::CreateDatabase => "create database",
            ProvisionStep::CreateUser => "create user",
            ProvisionStep::GrantPrivileges => "grant privileges",
            ProvisionStep::TransferOwnership => "transfer ownership",
            ProvisionStep::FlushPrivileges => "flush privileges",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Tenant name '{0}' contains no usable characters")]
    InvalidName(String),

    /// A DDL step failed. Steps in `completed` already took effect and are
    /// not rolled back.
    #[error("Provisioning step '{step}' failed for database {database}: {source}")]
    Step {
        step: ProvisionStep,
        database: String,
        user: String,
        completed: Vec<ProvisionStep>,
        #[source]
        source: DatabaseError,
    },
}

impl ProvisionError {
    /// True when some DDL already ran and left objects behind.
    pub fn is_partial(&self) -> bool {
        matches!(self, ProvisionError::Step { completed, .. } if !completed.is_empty())
    }
}

/// Credentials for a freshly created tenant database.
#[derive(Clone, PartialEq, Eq)]
pub struct ProvisionedDatabase {
    pub database_name: String,
    pub database_user: String,
    pub database_password: String,
}

impl fmt::Debug for ProvisionedDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionedDatabase")
            .field("database_name", &self.database_name)
            .field("database_user", &self.database_user)
            .finish_non_exhaustive()
    }
}

/// Lowercases and replaces everything outside `[A-Za-z0-9_]` with `_`.
pub fn sanitize_tenant_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

/// Database name for a tenant: `tenant_<sanitized>_db`, cut to the
/// engine's identifier limit.
pub fn database_name_for(dialect: Dialect, tenant_name: &str) -> Result<String, ProvisionError> {
    let fragment = sanitize_tenant_name(tenant_name);
    if !fragment.chars().any(|c| c.is_ascii_alphanumeric()) {
        return Err(ProvisionError::InvalidName(tenant_name.to_string()));
    }
    let budget = dialect.max_identifier_len() - "tenant_".len() - "_db".len();
    let fragment: String = fragment.chars().take(budget).collect();
    Ok(format!("tenant_{}_db", fragment))
}

/// Quotes an identifier: `"..."` with doubled quotes for PostgreSQL,
/// backticks with doubled backticks for MySQL.
pub fn quote_identifier(dialect: Dialect, ident: &str) -> String {
    match dialect {
        Dialect::Postgres => format!("\"{}\"", ident.replace('"', "\"\"")),
        Dialect::MySql => format!("`{}`", ident.replace('`', "``")),
    }
}

/// Quotes a string literal. MySQL also treats backslash as an escape.
pub fn quote_literal(dialect: Dialect, value: &str) -> String {
    match dialect {
        Dialect::Postgres => format!("'{}'", value.replace('\'', "''")),
        Dialect::MySql => format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''")),
    }
}

/// The engine's own statement sequence for a new database and owner.
pub fn ddl_statements(
    dialect: Dialect,
    database: &str,
    user: &str,
    password: &str,
) -> Vec<(ProvisionStep, String)> {
    let db = quote_identifier(dialect, database);
    let secret = quote_literal(dialect, password);
    match dialect {
        Dialect::Postgres => {
            let role = quote_identifier(dialect, user);
            vec![
                (ProvisionStep::CreateDatabase, format!("CREATE DATABASE {}", db)),
                (
                    ProvisionStep::CreateUser,
                    format!("CREATE USER {} WITH PASSWORD {}", role, secret),
                ),
                (
                    ProvisionStep::GrantPrivileges,
                    format!("GRANT ALL PRIVILEGES ON DATABASE {} TO {}", db, role),
                ),
                // Needed on PostgreSQL 15+ for the owner to create tables in `public`.
                (
                    ProvisionStep::TransferOwnership,
                    format!("ALTER DATABASE {} OWNER TO {}", db, role),
                ),
            ]
        }
        Dialect::MySql => {
            let account = format!("{}@'%'", quote_literal(dialect, user));
            vec![
                (ProvisionStep::CreateDatabase, format!("CREATE DATABASE {}", db)),
                (
                    ProvisionStep::CreateUser,
                    format!("CREATE USER {} IDENTIFIED BY {}", account, secret),
                ),
                (
                    ProvisionStep::GrantPrivileges,
                    format!("GRANT ALL PRIVILEGES ON {}.* TO {}", db, account),
                ),
                (ProvisionStep::FlushPrivileges, "FLUSH PRIVILEGES".to_string()),
            ]
        }
    }
}

const USER_SUFFIX_DIGITS: usize = 6;

fn digits<R: Rng>(rng: &mut R, count: usize) -> String {
    (0..count).map(|_| char::from(b'0' + rng.gen_range(0..10u8))).collect()
}

/// Pronounceable random credentials built from word lists.
#[derive(Debug, Clone)]
pub struct CredentialGenerator {
    dialect: Dialect,
    policy: CredentialPolicy,
}

impl CredentialGenerator {
    pub fn new(dialect: Dialect, policy: CredentialPolicy) -> Self {
        Self { dialect, policy }
    }

    pub fn username(&self) -> String {
        self.username_with(&mut rand::thread_rng())
    }

    pub fn password(&self) -> String {
        self.password_with(&mut rand::thread_rng())
    }

    /// Word-based name with a numeric suffix. Roles are server-wide, so the
    /// word lists alone would collide long before tenant names run out.
    pub fn username_with<R: Rng>(&self, rng: &mut R) -> String {
        let joined = self.words(rng, self.policy.username_words).join(&self.separator().to_string());
        // Names are embedded in DDL, keep them to identifier characters.
        let mut name = sanitize_tenant_name(&joined);
        name.truncate(self.dialect.max_user_len() - USER_SUFFIX_DIGITS - 1);
        format!("{}_{}", name.trim_end_matches('_'), digits(rng, USER_SUFFIX_DIGITS))
    }

    pub fn password_with<R: Rng>(&self, rng: &mut R) -> String {
        let mut parts = self.words(rng, self.policy.password_words);
        if self.policy.password_digits > 0 {
            parts.push(digits(rng, self.policy.password_digits));
        }
        parts.join(&self.policy.separator.to_string())
    }

    fn separator(&self) -> char {
        if self.policy.separator.is_ascii_alphanumeric() || self.policy.separator == '_' {
            self.policy.separator
        } else {
            '_'
        }
    }

    fn words<R: Rng>(&self, rng: &mut R, count: usize) -> Vec<String> {
        let dictionaries = [COLORS, ADJECTIVES, ANIMALS];
        (0..count)
            .map(|i| {
                dictionaries[i % dictionaries.len()]
                    .choose(rng)
                    .copied()
                    .unwrap_or("tenant")
                    .to_string()
            })
            .collect()
    }
}

/// Creates the physical database, its user and grants through the master
/// connection.
pub struct Provisioner {
    dialect: Dialect,
    master: ConnectionHandle,
    credentials: CredentialGenerator,
}

impl Provisioner {
    pub fn new(dialect: Dialect, master: ConnectionHandle, policy: CredentialPolicy) -> Self {
        Self {
            dialect,
            master,
            credentials: CredentialGenerator::new(dialect, policy),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn database_name_for(&self, tenant_name: &str) -> Result<String, ProvisionError> {
        database_name_for(self.dialect, tenant_name)
    }

    /// Runs the DDL sequence. Not transactional: a failure midway leaves the
    /// completed steps in place and reports them.
    pub async fn provision(&self, tenant_name: &str) -> Result<ProvisionedDatabase, ProvisionError> {
        let database_name = self.database_name_for(tenant_name)?;
        let database_user = self.credentials.username();
        let database_password = self.credentials.password();

        let mut completed = Vec::new();
        for (step, statement) in ddl_statements(self.dialect, &database_name, &database_user, &database_password) {
            if let Err(source) = self.master.execute(&statement).await {
                error!(
                    tenant = %tenant_name,
                    database = %database_name,
                    user = %database_user,
                    step = %step,
                    completed = ?completed,
                    "Provisioning failed; completed steps are left in place for operator cleanup: {}",
                    source
                );
                return Err(ProvisionError::Step {
                    step,
                    database: database_name,
                    user: database_user,
                    completed,
                    source,
                });
            }
            completed.push(step);
        }

        info!("Provisioned database {} for tenant '{}'", database_name, tenant_name);
        Ok(ProvisionedDatabase {
            database_name,
            database_user,
            database_password,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeConnection;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    #[test]
    fn sanitizes_hostile_names() {
        let db = database_name_for(Dialect::Postgres, "tenant; DROP TABLE x;").unwrap();
        assert!(db.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
        assert_eq!(db, "tenant_tenant__drop_table_x__db");
        assert_eq!(sanitize_tenant_name("Acme Corp"), "acme_corp");
    }

    #[test]
    fn rejects_names_without_usable_characters() {
        assert!(matches!(
            database_name_for(Dialect::Postgres, "!!! ;"),
            Err(ProvisionError::InvalidName(_))
        ));
        assert!(database_name_for(Dialect::Postgres, "").is_err());
    }

    #[test]
    fn database_names_fit_identifier_limits() {
        let long = "x".repeat(200);
        assert_eq!(database_name_for(Dialect::Postgres, &long).unwrap().len(), 63);
        assert_eq!(database_name_for(Dialect::MySql, &long).unwrap().len(), 64);
    }

    #[test]
    fn quoting_escapes_per_dialect() {
        assert_eq!(quote_identifier(Dialect::Postgres, "a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_identifier(Dialect::MySql, "a`b"), "`a``b`");
        assert_eq!(quote_literal(Dialect::Postgres, "it's"), "'it''s'");
        assert_eq!(quote_literal(Dialect::MySql, "a\\'b"), "'a\\\\''b'");
    }

    #[test]
    fn postgres_statements() {
        let statements = ddl_statements(Dialect::Postgres, "tenant_acme_db", "red_bold_otter", "pw'1");
        let sql: Vec<&str> = statements.iter().map(|(_, s)| s.as_str()).collect();
        assert_eq!(
            sql,
            vec![
                "CREATE DATABASE \"tenant_acme_db\"",
                "CREATE USER \"red_bold_otter\" WITH PASSWORD 'pw''1'",
                "GRANT ALL PRIVILEGES ON DATABASE \"tenant_acme_db\" TO \"red_bold_otter\"",
                "ALTER DATABASE \"tenant_acme_db\" OWNER TO \"red_bold_otter\"",
            ]
        );
    }

    #[test]
    fn mysql_statements() {
        let statements = ddl_statements(Dialect::MySql, "tenant_acme_db", "red_bold_otter", "pw");
        let steps: Vec<ProvisionStep> = statements.iter().map(|(step, _)| *step).collect();
        assert_eq!(
            steps,
            vec![
                ProvisionStep::CreateDatabase,
                ProvisionStep::CreateUser,
                ProvisionStep::GrantPrivileges,
                ProvisionStep::FlushPrivileges,
            ]
        );
        assert_eq!(statements[0].1, "CREATE DATABASE `tenant_acme_db`");
        assert_eq!(statements[1].1, "CREATE USER 'red_bold_otter'@'%' IDENTIFIED BY 'pw'");
        assert_eq!(statements[2].1, "GRANT ALL PRIVILEGES ON `tenant_acme_db`.* TO 'red_bold_otter'@'%'");
    }

    #[test]
    fn credentials_follow_policy() {
        let generator = CredentialGenerator::new(Dialect::MySql, CredentialPolicy::default());
        let mut rng = StdRng::seed_from_u64(42);

        let user = generator.username_with(&mut rng);
        let words: Vec<&str> = user.split('_').collect();
        assert_eq!(words.len(), 4);
        assert!(words[3].len() == 6 && words[3].chars().all(|c| c.is_ascii_digit()));
        assert!(user.len() <= 32);
        assert!(user.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));

        let password = generator.password_with(&mut rng);
        let parts: Vec<&str> = password.split('_').collect();
        assert_eq!(parts.len(), 5);
        assert!(parts[4].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[4].len(), 3);
    }

    #[test]
    fn user_names_stay_distinct_past_the_word_lists() {
        let policy = CredentialPolicy {
            username_words: 1,
            ..CredentialPolicy::default()
        };
        let generator = CredentialGenerator::new(Dialect::Postgres, policy);
        let mut rng = StdRng::seed_from_u64(7);

        let names: std::collections::HashSet<String> =
            (0..500).map(|_| generator.username_with(&mut rng)).collect();
        // One word list has a few dozen entries; the suffix keeps them apart.
        assert!(names.len() > 450, "only {} distinct names", names.len());
    }

    #[test]
    fn long_word_runs_keep_the_suffix_within_limits() {
        let policy = CredentialPolicy {
            username_words: 12,
            ..CredentialPolicy::default()
        };
        let generator = CredentialGenerator::new(Dialect::MySql, policy);
        let user = generator.username_with(&mut StdRng::seed_from_u64(1));
        assert!(user.len() <= 32, "{}", user);
        let suffix = user.rsplit('_').next().unwrap_or_default();
        assert_eq!(suffix.len(), 6);
        assert!(!user.contains("__"));
    }

    #[test]
    fn unsafe_separator_never_reaches_user_names() {
        let policy = CredentialPolicy {
            separator: '"',
            ..CredentialPolicy::default()
        };
        let generator = CredentialGenerator::new(Dialect::Postgres, policy);
        assert!(!generator.username().contains('"'));
    }

    #[tokio::test]
    async fn provision_runs_every_step_on_master() {
        let master = Arc::new(FakeConnection::new("tenant_master"));
        let provisioner = Provisioner::new(Dialect::Postgres, master.clone(), CredentialPolicy::default());

        let created = provisioner.provision("tenant; DROP TABLE x;").await.unwrap();
        assert_eq!(created.database_name, "tenant_tenant__drop_table_x__db");

        let executed = master.executed();
        assert_eq!(executed.len(), 4);
        assert!(executed.iter().all(|sql| !sql.contains("DROP TABLE")));
        assert!(executed[1].contains(&created.database_user));
    }

    #[tokio::test]
    async fn failed_step_reports_completed_steps() {
        let master = Arc::new(FakeConnection::new("tenant_master"));
        master.fail_statements_containing("GRANT");
        let provisioner = Provisioner::new(Dialect::Postgres, master.clone(), CredentialPolicy::default());

        let err = provisioner.provision("acme").await.err().unwrap();
        assert!(err.is_partial());
        match err {
            ProvisionError::Step { step, completed, database, .. } => {
                assert_eq!(step, ProvisionStep::GrantPrivileges);
                assert_eq!(completed, vec![ProvisionStep::CreateDatabase, ProvisionStep::CreateUser]);
                assert_eq!(database, "tenant_acme_db");
            }
            other => panic!("unexpected error {:?}", other),
        }
        // Nothing after the failing step ran.
        assert_eq!(master.executed().len(), 2);
    }
}
