//! # In-memory backend
//!
//! [`MemoryBackend`] implements the whole [`Backend`] contract inside the
//! process: password accounts, rotating refresh tokens, JSON tables with the
//! [`Filter`] operators, change feeds and a blob store. Session tests run
//! against it, and it doubles as an offline backend for demos.
//!
//! Writes (`insert`, `update`, `delete`, [`MemoryBackend::seed`]) are published
//! on the relation's change feed like the hosted realtime service does.
//!
//! ## Fault injection
//!
//! | Method | Effect |
//! |--------|--------|
//! | [`revoke_refresh_token`](MemoryBackend::revoke_refresh_token) | refresh with that token fails with [`ApiError::Unauthorized`] |
//! | [`poison_refresh_token`](MemoryBackend::poison_refresh_token) | refresh with that token fails with a 500 |
//! | [`break_table`](MemoryBackend::break_table) | every read or write on that relation fails with a 503 |
//!
//! Tokens are not checked on table access, but the token each request names
//! is recorded: [`bearers`](MemoryBackend::bearers) for reads and writes,
//! [`feed_bearers`](MemoryBackend::feed_bearers) for subscriptions.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::backend::{
    AuthSession, AuthTokens, AuthUser, Backend, ChangeEvent, ChangeKind, Filter, Query, Row,
    Subscription,
};
use crate::ApiError;

#[derive(Debug, Default)]
struct State {
    /// email → (password, user)
    accounts: HashMap<String, (String, AuthUser)>,
    users: HashMap<String, AuthUser>,
    access_tokens: HashMap<String, String>,
    refresh_tokens: HashMap<String, String>,
    poisoned_refresh: HashSet<String>,
    next_token: u64,
    refresh_calls: usize,
    tables: HashMap<String, Vec<Row>>,
    broken_tables: HashSet<String>,
    /// `(relation, access token)` per table request, in arrival order.
    requests: Vec<(String, Option<String>)>,
    subscriptions: Vec<(String, Option<String>)>,
    feeds: HashMap<String, Vec<mpsc::UnboundedSender<ChangeEvent>>>,
    objects: HashMap<String, (Vec<u8>, String)>,
}

impl State {
    fn mint(&mut self, user_id: &str) -> AuthTokens {
        self.next_token += 1;
        let n = self.next_token;
        let tokens = AuthTokens {
            access_token: format!("access-{user_id}-{n}"),
            refresh_token: format!("refresh-{user_id}-{n}"),
        };
        self.access_tokens
            .insert(tokens.access_token.clone(), user_id.to_string());
        self.refresh_tokens
            .insert(tokens.refresh_token.clone(), user_id.to_string());
        tokens
    }

    fn record(&mut self, table: &str, access_token: Option<&str>) {
        self.requests
            .push((table.to_string(), access_token.map(str::to_string)));
    }

    fn check_table(&self, table: &str) -> Result<(), ApiError> {
        if self.broken_tables.contains(table) {
            return Err(ApiError::Status {
                status: 503,
                message: format!("{table} unavailable"),
            });
        }
        Ok(())
    }

    fn publish(&mut self, table: &str, kind: ChangeKind, old: Option<Row>, new: Option<Row>) {
        if let Some(senders) = self.feeds.get_mut(table) {
            let event = ChangeEvent {
                table: table.to_string(),
                kind,
                old,
                new,
            };
            senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

/// In-process Backend for tests and offline runs. Clones share state.
#[derive(Clone, Debug, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a password account.
    pub fn add_account(&self, user_id: &str, email: &str, password: &str) {
        let user = AuthUser {
            id: user_id.to_string(),
            email: Some(email.to_string()),
        };
        let mut state = self.lock();
        state.users.insert(user_id.to_string(), user.clone());
        state
            .accounts
            .insert(email.to_string(), (password.to_string(), user));
    }

    /// Mint a valid token pair for `user_id`, creating the user if needed.
    pub fn issue_tokens(&self, user_id: &str) -> AuthTokens {
        let mut state = self.lock();
        state
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| AuthUser {
                id: user_id.to_string(),
                email: None,
            });
        state.mint(user_id)
    }

    pub fn revoke_refresh_token(&self, refresh_token: &str) {
        self.lock().refresh_tokens.remove(refresh_token);
    }

    pub fn poison_refresh_token(&self, refresh_token: &str) {
        self.lock()
            .poisoned_refresh
            .insert(refresh_token.to_string());
    }

    pub fn break_table(&self, table: &str) {
        self.lock().broken_tables.insert(table.to_string());
    }

    pub fn repair_table(&self, table: &str) {
        self.lock().broken_tables.remove(table);
    }

    /// Number of refresh attempts seen so far.
    pub fn refresh_calls(&self) -> usize {
        self.lock().refresh_calls
    }

    /// Append rows to a relation, publishing an insert event for each.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Row>) {
        let mut state = self.lock();
        for row in rows {
            state
                .tables
                .entry(table.to_string())
                .or_default()
                .push(row.clone());
            state.publish(table, ChangeKind::Insert, None, Some(row));
        }
    }

    /// Access tokens named by reads and writes of `table`, oldest first.
    pub fn bearers(&self, table: &str) -> Vec<Option<String>> {
        tokens_for(&self.lock().requests, table)
    }

    /// Access tokens named by subscriptions to `table`, oldest first.
    pub fn feed_bearers(&self, table: &str) -> Vec<Option<String>> {
        tokens_for(&self.lock().subscriptions, table)
    }

    /// Current contents of a relation.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// Push an arbitrary event to a relation's subscribers.
    pub fn emit(&self, table: &str, kind: ChangeKind, old: Option<Row>, new: Option<Row>) {
        self.lock().publish(table, kind, old, new);
    }

    /// Bytes stored at `bucket/path`.
    pub fn object(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .objects
            .get(&format!("{bucket}/{path}"))
            .map(|(bytes, _)| bytes.clone())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, ApiError> {
        let mut state = self.lock();
        let user = match state.accounts.get(email) {
            Some((expected, user)) if expected == password => user.clone(),
            _ => return Err(ApiError::Unauthorized),
        };
        let tokens = state.mint(&user.id);
        Ok(AuthSession { tokens, user })
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthTokens, ApiError> {
        let mut state = self.lock();
        state.refresh_calls += 1;
        if state.poisoned_refresh.contains(refresh_token) {
            return Err(ApiError::Status {
                status: 500,
                message: "refresh failed".to_string(),
            });
        }
        let user_id = state
            .refresh_tokens
            .remove(refresh_token)
            .ok_or(ApiError::Unauthorized)?;
        Ok(state.mint(&user_id))
    }

    async fn get_user(&self, access_token: &str) -> Result<Option<AuthUser>, ApiError> {
        let state = self.lock();
        Ok(state
            .access_tokens
            .get(access_token)
            .and_then(|id| state.users.get(id))
            .cloned())
    }

    async fn select(&self, query: &Query) -> Result<Vec<Row>, ApiError> {
        let mut state = self.lock();
        state.record(&query.table, query.access_token.as_deref());
        state.check_table(&query.table)?;
        let mut rows: Vec<Row> = state
            .tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_all(row, &query.filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some((column, ascending)) = &query.order {
            rows.sort_by(|a, b| {
                let (a, b) = (&a[column.as_str()], &b[column.as_str()]);
                match (a.is_null(), b.is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => {
                        let ord = compare(a, b).unwrap_or(Ordering::Equal);
                        if *ascending {
                            ord
                        } else {
                            ord.reverse()
                        }
                    }
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn count(&self, query: &Query) -> Result<u64, ApiError> {
        let rows = self.select(&Query {
            limit: None,
            ..query.clone()
        })
        .await?;
        Ok(rows.len() as u64)
    }

    async fn insert(
        &self,
        table: &str,
        row: Row,
        access_token: Option<&str>,
    ) -> Result<(), ApiError> {
        let mut state = self.lock();
        state.record(table, access_token);
        state.check_table(table)?;
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        state.publish(table, ChangeKind::Insert, None, Some(row));
        Ok(())
    }

    async fn update(&self, query: &Query, patch: Row) -> Result<(), ApiError> {
        let Value::Object(patch) = patch else {
            return Err(ApiError::Status {
                status: 400,
                message: "update patch must be an object".to_string(),
            });
        };
        let mut state = self.lock();
        state.record(&query.table, query.access_token.as_deref());
        state.check_table(&query.table)?;
        let mut changes = Vec::new();
        if let Some(rows) = state.tables.get_mut(&query.table) {
            for row in rows.iter_mut() {
                if !matches_all(row, &query.filters) {
                    continue;
                }
                let old = row.clone();
                if let Value::Object(fields) = row {
                    for (k, v) in &patch {
                        fields.insert(k.clone(), v.clone());
                    }
                }
                changes.push((old, row.clone()));
            }
        }
        for (old, new) in changes {
            state.publish(&query.table, ChangeKind::Update, Some(old), Some(new));
        }
        Ok(())
    }

    async fn delete(&self, query: &Query) -> Result<(), ApiError> {
        let mut state = self.lock();
        state.record(&query.table, query.access_token.as_deref());
        state.check_table(&query.table)?;
        let mut removed = Vec::new();
        if let Some(rows) = state.tables.get_mut(&query.table) {
            rows.retain(|row| {
                if matches_all(row, &query.filters) {
                    removed.push(row.clone());
                    false
                } else {
                    true
                }
            });
        }
        for old in removed {
            state.publish(&query.table, ChangeKind::Delete, Some(old), None);
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        table: &str,
        access_token: Option<&str>,
    ) -> Result<Subscription, ApiError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        state
            .subscriptions
            .push((table.to_string(), access_token.map(str::to_string)));
        state.feeds.entry(table.to_string()).or_default().push(tx);
        Ok(Subscription::new(table, rx, None))
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        _access_token: Option<&str>,
    ) -> Result<(), ApiError> {
        self.lock().objects.insert(
            format!("{bucket}/{path}"),
            (bytes, content_type.to_string()),
        );
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://{bucket}/{path}")
    }
}

fn tokens_for(log: &[(String, Option<String>)], table: &str) -> Vec<Option<String>> {
    log.iter()
        .filter(|(t, _)| t == table)
        .map(|(_, token)| token.clone())
        .collect()
}

fn matches_all(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|f| matches(row, f))
}

/// SQL-ish semantics: comparisons against NULL are false.
fn matches(row: &Row, filter: &Filter) -> bool {
    let field = row.get(filter.column()).unwrap_or(&Value::Null);
    match filter {
        Filter::IsNull(_) => field.is_null(),
        _ if field.is_null() => false,
        Filter::Eq(_, v) => compare(field, v) == Some(Ordering::Equal),
        Filter::Neq(_, v) => compare(field, v).is_some_and(|o| o != Ordering::Equal),
        Filter::In(_, vs) => vs.iter().any(|v| compare(field, v) == Some(Ordering::Equal)),
        Filter::Gt(_, v) => compare(field, v) == Some(Ordering::Greater),
    }
}

/// Order two JSON scalars: timestamps chronologically, numbers numerically,
/// everything else by its text form.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => {
            match (x.parse::<DateTime<Utc>>(), y.parse::<DateTime<Utc>>()) {
                (Ok(x), Ok(y)) => Some(x.cmp(&y)),
                _ => Some(x.cmp(y)),
            }
        }
        (x, y) => Some(text(x).cmp(&text(y))),
    }
}

fn text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
