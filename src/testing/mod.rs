//! In-memory doubles for the database seams, so every layer above the driver
//! can be tested without PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{AppConfig, Dialect};
use crate::database::models::{NewTenant, NewToken, TenantRecord, TokenRecord, UserCredentials, UserIdentity};
use crate::database::{
    Connection, ConnectionHandle, ConnectionParams, ConnectionRegistry, ConnectionSettings, Connector,
    DatabaseError, ModelRegistry, SchemaMigrator, TenantCatalog,
};
use crate::router::app;
use crate::services::provisioner::{database_name_for, Provisioner};
use crate::services::{TenantService, TokenStore, UserDirectory};
use crate::state::AppState;

/// Development config with signing secrets filled in.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::development();
    config.tokens.access_secret = "test-access-secret".to_string();
    config.tokens.refresh_secret = "test-refresh-secret".to_string();
    config.tokens.password_hash_cost = 4;
    config
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

/// Shared log between a connector and the connections it hands out.
#[derive(Default)]
struct Journal {
    events: Mutex<Vec<String>>,
    closed: Mutex<Vec<String>>,
}

pub struct FakeConnection {
    database: String,
    executed: Mutex<Vec<String>>,
    failing: Mutex<Vec<String>>,
    fail_ping: AtomicBool,
    closed: AtomicBool,
    journal: Option<Arc<Journal>>,
}

impl FakeConnection {
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            executed: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
            fail_ping: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            journal: None,
        }
    }

    fn journaled(database: &str, journal: Arc<Journal>, fail_ping: bool) -> Self {
        let connection = Self {
            journal: Some(journal),
            ..Self::new(database)
        };
        connection.fail_ping.store(fail_ping, Ordering::SeqCst);
        connection
    }

    /// Statements that ran successfully, in order.
    pub fn executed(&self) -> Vec<String> {
        lock(&self.executed).clone()
    }

    /// Every later statement containing `fragment` fails.
    pub fn fail_statements_containing(&self, fragment: &str) {
        lock(&self.failing).push(fragment.to_string());
    }

    pub fn fail_ping(&self) {
        self.fail_ping.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for FakeConnection {
    fn database(&self) -> &str {
        &self.database
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        if let Some(journal) = &self.journal {
            lock(&journal.events).push(format!("ping {}", self.database));
        }
        if self.is_closed() {
            return Err(DatabaseError::Internal("connection closed".to_string()));
        }
        if self.fail_ping.load(Ordering::SeqCst) {
            return Err(DatabaseError::Internal(format!("{} did not answer", self.database)));
        }
        Ok(())
    }

    async fn execute(&self, statement: &str) -> Result<u64, DatabaseError> {
        let fails = lock(&self.failing).iter().any(|f| statement.contains(f.as_str()));
        if fails {
            return Err(DatabaseError::Internal(format!("statement rejected: {}", statement)));
        }
        lock(&self.executed).push(statement.to_string());
        Ok(0)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(journal) = &self.journal {
            lock(&journal.closed).push(self.database.clone());
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Connector whose databases can be taken offline per name.
#[derive(Default)]
pub struct FakeConnector {
    connects: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    offline: Mutex<HashSet<String>>,
    failing_probe: Mutex<HashSet<String>>,
    last_params: Mutex<Option<ConnectionParams>>,
    journal: Arc<Journal>,
}

impl FakeConnector {
    /// Number of connect attempts that produced a connection.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    pub fn take_offline(&self, database: &str) {
        lock(&self.offline).insert(database.to_string());
    }

    pub fn bring_online(&self, database: &str) {
        lock(&self.offline).remove(database);
    }

    /// Connections to `database` open but fail their liveness probe.
    pub fn fail_probe_for(&self, database: &str) {
        lock(&self.failing_probe).insert(database.to_string());
    }

    /// Databases whose connections were closed, in order.
    pub fn closed(&self) -> Vec<String> {
        lock(&self.journal.closed).clone()
    }

    pub fn events(&self) -> Vec<String> {
        lock(&self.journal.events).clone()
    }

    pub fn last_params(&self) -> Option<ConnectionParams> {
        lock(&self.last_params).clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, params: &ConnectionParams) -> Result<ConnectionHandle, DatabaseError> {
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if lock(&self.offline).contains(&params.database) {
            return Err(DatabaseError::Internal(format!("connection refused: {}", params.database)));
        }

        self.connects.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_params) = Some(params.clone());
        lock(&self.journal.events).push(format!("connect {}", params.database));

        let fail_ping = lock(&self.failing_probe).contains(&params.database);
        Ok(Arc::new(FakeConnection::journaled(
            &params.database,
            Arc::clone(&self.journal),
            fail_ping,
        )))
    }
}

#[derive(Default)]
pub struct MemoryCatalog {
    next_id: AtomicI64,
    records: Mutex<Vec<TenantRecord>>,
}

impl MemoryCatalog {
    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }
}

#[async_trait]
impl TenantCatalog for MemoryCatalog {
    async fn find_by_name(&self, name: &str) -> Result<Option<TenantRecord>, DatabaseError> {
        Ok(lock(&self.records).iter().find(|r| r.name == name).cloned())
    }

    async fn database_name_taken(&self, database_name: &str) -> Result<bool, DatabaseError> {
        Ok(lock(&self.records).iter().any(|r| r.database_name == database_name))
    }

    async fn insert(&self, tenant: NewTenant) -> Result<TenantRecord, DatabaseError> {
        let mut records = lock(&self.records);
        if records
            .iter()
            .any(|r| r.name == tenant.name || r.database_name == tenant.database_name)
        {
            return Err(DatabaseError::Conflict(format!("tenant '{}'", tenant.name)));
        }
        let now = Utc::now();
        let record = TenantRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            name: tenant.name,
            database_name: tenant.database_name,
            database_user: tenant.database_user,
            database_password: tenant.database_password,
            created_at: now,
            updated_at: now,
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<TenantRecord>, DatabaseError> {
        Ok(lock(&self.records).clone())
    }
}

/// Inserts a catalog row for `name` as if it had been provisioned.
pub async fn seed_tenant(catalog: &MemoryCatalog, name: &str) -> TenantRecord {
    let database_name = database_name_for(Dialect::Postgres, name).unwrap();
    catalog
        .insert(NewTenant {
            name: name.to_string(),
            database_user: format!("{}_user", database_name),
            database_password: "secret".to_string(),
            database_name,
        })
        .await
        .unwrap()
}

/// Records which databases were migrated or reverted.
#[derive(Default)]
pub struct FakeMigrator {
    migrated: Mutex<Vec<String>>,
    undone: Mutex<Vec<String>>,
    fail_next: AtomicBool,
}

impl FakeMigrator {
    pub fn migrated(&self) -> Vec<String> {
        lock(&self.migrated).clone()
    }

    pub fn undone(&self) -> Vec<String> {
        lock(&self.undone).clone()
    }

    /// The next `migrate` call fails.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SchemaMigrator for FakeMigrator {
    async fn migrate(&self, connection: &ConnectionHandle) -> Result<(), DatabaseError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(DatabaseError::MigrationError(format!("{}: syntax error", connection.database())));
        }
        lock(&self.migrated).push(connection.database().to_string());
        Ok(())
    }

    async fn undo(&self, connection: &ConnectionHandle) -> Result<(), DatabaseError> {
        lock(&self.undone).push(connection.database().to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryTokenStore {
    next_id: AtomicI64,
    tokens: Mutex<Vec<TokenRecord>>,
}

impl MemoryTokenStore {
    pub fn len(&self) -> usize {
        lock(&self.tokens).len()
    }

    /// Unrevoked tokens held by `user_id`.
    pub fn active_for(&self, user_id: i64) -> usize {
        lock(&self.tokens)
            .iter()
            .filter(|t| t.user_id == user_id && !t.is_revoked)
            .count()
    }

    fn revoke_locked(tokens: &mut [TokenRecord], user_id: i64) -> u64 {
        let mut count = 0;
        for token in tokens.iter_mut() {
            if token.user_id == user_id && !token.is_revoked {
                token.is_revoked = true;
                count += 1;
            }
        }
        count
    }

    fn insert_locked(&self, tokens: &mut Vec<TokenRecord>, token: NewToken) -> Result<TokenRecord, DatabaseError> {
        if tokens.iter().any(|t| t.token == token.token) {
            return Err(DatabaseError::Conflict("token".to_string()));
        }
        let now = Utc::now();
        let record = TokenRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            user_id: token.user_id,
            token: token.token,
            kind: token.kind.as_str().to_string(),
            is_revoked: false,
            expires_at: token.expires_at,
            created_at: now,
            updated_at: now,
        };
        tokens.push(record.clone());
        Ok(record)
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn insert(&self, token: NewToken) -> Result<TokenRecord, DatabaseError> {
        let mut tokens = lock(&self.tokens);
        self.insert_locked(&mut tokens, token)
    }

    async fn replace_for_user(&self, token: NewToken) -> Result<(u64, TokenRecord), DatabaseError> {
        let mut tokens = lock(&self.tokens);
        let revoked = Self::revoke_locked(&mut tokens, token.user_id);
        let record = self.insert_locked(&mut tokens, token)?;
        Ok((revoked, record))
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<TokenRecord>, DatabaseError> {
        Ok(lock(&self.tokens).iter().find(|t| t.token == token).cloned())
    }

    async fn revoke_all_for_user(&self, user_id: i64) -> Result<u64, DatabaseError> {
        Ok(Self::revoke_locked(&mut lock(&self.tokens), user_id))
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let mut tokens = lock(&self.tokens);
        let before = tokens.len();
        tokens.retain(|t| t.expires_at >= now);
        Ok((before - tokens.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemoryUsers {
    next_id: AtomicI64,
    users: Mutex<HashMap<i64, UserCredentials>>,
}

impl MemoryUsers {
    /// Adds a user with a cheaply hashed password.
    pub fn add(&self, email: &str, password: &str) -> UserIdentity {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let credentials = UserCredentials {
            id,
            email: email.to_string(),
            password_hash: bcrypt::hash(password, 4).unwrap(),
        };
        let identity = credentials.identity();
        lock(&self.users).insert(id, credentials);
        identity
    }

    pub fn remove(&self, id: i64) {
        lock(&self.users).remove(&id);
    }
}

#[async_trait]
impl UserDirectory for MemoryUsers {
    async fn create(&self, email: &str, password_hash: &str) -> Result<UserIdentity, DatabaseError> {
        let mut users = lock(&self.users);
        if users.values().any(|u| u.email.eq_ignore_ascii_case(email.trim())) {
            return Err(DatabaseError::Conflict(format!("user '{}'", email)));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let credentials = UserCredentials {
            id,
            email: email.trim().to_string(),
            password_hash: password_hash.to_string(),
        };
        let identity = credentials.identity();
        users.insert(id, credentials);
        Ok(identity)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<UserIdentity>, DatabaseError> {
        Ok(lock(&self.users).get(&id).map(UserCredentials::identity))
    }

    async fn find_credentials_by_email(&self, email: &str) -> Result<Option<UserCredentials>, DatabaseError> {
        Ok(lock(&self.users)
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email.trim()))
            .cloned())
    }
}

/// A registry wired to in-memory doubles.
pub struct Fixture {
    pub config: AppConfig,
    pub catalog: Arc<MemoryCatalog>,
    pub connector: Arc<FakeConnector>,
    pub master: Arc<FakeConnection>,
    pub migrator: Arc<FakeMigrator>,
    pub models: Arc<ModelRegistry>,
    pub registry: ConnectionRegistry,
}

impl Fixture {
    pub fn new() -> Self {
        let config = test_config();
        let catalog = Arc::new(MemoryCatalog::default());
        let connector = Arc::new(FakeConnector::default());
        let master = Arc::new(FakeConnection::new(&config.database.database));
        let registry = ConnectionRegistry::new(
            ConnectionSettings::new(config.database.clone()),
            master.clone(),
            catalog.clone(),
            connector.clone(),
        );
        Self {
            config,
            catalog,
            connector,
            master,
            migrator: Arc::new(FakeMigrator::default()),
            models: Arc::new(ModelRegistry::new()),
            registry,
        }
    }

    pub fn provisioner(&self) -> Provisioner {
        Provisioner::new(
            self.config.database.dialect,
            self.master.clone(),
            self.config.tenancy.credentials.clone(),
        )
    }

    pub fn tenant_service(&self) -> TenantService {
        TenantService::new(self.registry.clone(), self.provisioner(), self.migrator.clone(), false)
    }

    pub fn tenant_service_in_production(&self) -> TenantService {
        TenantService::new(self.registry.clone(), self.provisioner(), self.migrator.clone(), true)
    }
}

/// A full router over in-memory doubles, with one user
/// (`alice@example.com` / `correct horse`) already registered.
pub struct Harness {
    pub app: axum::Router,
    pub state: AppState,
    pub fx: Fixture,
    pub users: Arc<MemoryUsers>,
    pub tokens: Arc<MemoryTokenStore>,
}

pub fn test_state() -> Harness {
    let fx = Fixture::new();
    let users = Arc::new(MemoryUsers::default());
    users.add("alice@example.com", "correct horse");
    let tokens = Arc::new(MemoryTokenStore::default());

    let state = AppState::assemble(
        fx.config.clone(),
        fx.registry.clone(),
        fx.migrator.clone(),
        tokens.clone(),
        users.clone(),
    )
    .unwrap();
    Harness {
        app: app(state.clone()),
        state,
        fx,
        users,
        tokens,
    }
}
