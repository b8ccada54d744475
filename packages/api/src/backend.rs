//! # Backend contract
//!
//! The [`Backend`] trait is the fixed surface the app consumes from its hosted
//! backend. It groups four concerns:
//!
//! | Concern | Methods |
//! |---------|---------|
//! | Auth | [`sign_in_with_password`](Backend::sign_in_with_password), [`refresh_session`](Backend::refresh_session), [`get_user`](Backend::get_user) |
//! | Tables | [`select`](Backend::select), [`select_single`](Backend::select_single), [`count`](Backend::count), [`insert`](Backend::insert), [`update`](Backend::update), [`delete`](Backend::delete) |
//! | Realtime | [`subscribe`](Backend::subscribe) |
//! | Storage | [`upload`](Backend::upload), [`public_url`](Backend::public_url) |
//!
//! Rows travel as JSON objects ([`Row`]); typed access goes through
//! [`decode_rows`] / [`decode_row`] and the structs in [`crate::models`].
//!
//! ## Queries
//!
//! A [`Query`] names a relation and a conjunction of [`Filter`]s. The filter set
//! is deliberately the small one the app needs: equality, inequality, membership,
//! null checks and "greater than". Each filter maps 1:1 to a PostgREST operator
//! (`eq.`, `neq.`, `in.()`, `is.null`, `gt.`).
//!
//! ## Principals
//!
//! The backend keeps no notion of a current user. Every data call names the
//! access token it runs under ([`Query::as_user`], or the `access_token`
//! argument of [`insert`](Backend::insert), [`subscribe`](Backend::subscribe)
//! and [`upload`](Backend::upload)); without one the anon key is used.
//! Row-level security scopes each request to the principal it names.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ApiError;

/// One row as returned by the data API.
pub type Row = Value;

/// Access/refresh token pair minted by the auth service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// The principal an access token belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Result of a password sign-in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthSession {
    pub tokens: AuthTokens,
    pub user: AuthUser,
}

/// A single predicate on a column.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Neq(String, Value),
    In(String, Vec<Value>),
    IsNull(String),
    Gt(String, Value),
}

impl Filter {
    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(c, _)
            | Filter::Neq(c, _)
            | Filter::In(c, _)
            | Filter::IsNull(c)
            | Filter::Gt(c, _) => c,
        }
    }

    /// PostgREST query parameter for this filter, as `(column, "op.value")`.
    pub fn to_param(&self) -> (String, String) {
        let value = match self {
            Filter::Eq(_, v) => format!("eq.{}", scalar(v)),
            Filter::Neq(_, v) => format!("neq.{}", scalar(v)),
            Filter::In(_, vs) => {
                let items: Vec<String> = vs.iter().map(quoted).collect();
                format!("in.({})", items.join(","))
            }
            Filter::IsNull(_) => "is.null".to_string(),
            Filter::Gt(_, v) => format!("gt.{}", scalar(v)),
        };
        (self.column().to_string(), value)
    }
}

fn scalar(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// List items containing reserved characters must be double-quoted.
fn quoted(v: &Value) -> String {
    let s = scalar(v);
    if s.contains([',', '(', ')', '"', ' ']) {
        format!("\"{}\"", s.replace('"', "\\\""))
    } else {
        s
    }
}

/// A filtered read against one relation.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub table: String,
    pub columns: String,
    pub filters: Vec<Filter>,
    /// `(column, ascending)`. Nulls sort last either way.
    pub order: Option<(String, bool)>,
    pub limit: Option<usize>,
    /// Access token the request runs under; `None` means anonymous.
    pub access_token: Option<String>,
}

impl Query {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: "*".to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
            access_token: None,
        }
    }

    /// Run as the principal owning `access_token`.
    pub fn as_user(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.columns = columns.into();
        self
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.into(), value.into()));
        self
    }

    pub fn neq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Neq(column.into(), value.into()));
        self
    }

    pub fn is_in<V: Into<Value>>(
        mut self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.filters.push(Filter::In(column.into(), values));
        self
    }

    pub fn is_null(mut self, column: impl Into<String>) -> Self {
        self.filters.push(Filter::IsNull(column.into()));
        self
    }

    pub fn gt(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Gt(column.into(), value.into()));
        self
    }

    pub fn order(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some((column.into(), ascending));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Full PostgREST query string (without the leading `?`) as key/value pairs.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.columns.clone())];
        params.extend(self.filters.iter().map(Filter::to_param));
        if let Some((column, ascending)) = &self.order {
            let dir = if *ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{column}.{dir}.nullslast")));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }
}

/// What happened to a row in a change feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One change-feed event, with the row before and after the change.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub old: Option<Row>,
    pub new: Option<Row>,
}

/// Live change feed for one relation.
///
/// Dropping the subscription unsubscribes: the feed task (if any) is aborted
/// and the sending side notices the closed channel.
#[derive(Debug)]
pub struct Subscription {
    table: String,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(
        table: impl Into<String>,
        events: mpsc::UnboundedReceiver<ChangeEvent>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            table: table.into(),
            events,
            task,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Next event, or `None` once the feed has shut down.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// The hosted backend as seen by the app.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, ApiError>;

    /// Trade a refresh token for a new token pair. Refresh tokens rotate: the
    /// one passed in must not be reused after success.
    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthTokens, ApiError>;

    /// Who an access token belongs to. Only used to recover an account id, so
    /// an expired token still resolves when the backend allows it.
    async fn get_user(&self, access_token: &str) -> Result<Option<AuthUser>, ApiError>;

    async fn select(&self, query: &Query) -> Result<Vec<Row>, ApiError>;

    /// Exactly one matching row, otherwise [`ApiError::NotSingle`].
    async fn select_single(&self, query: &Query) -> Result<Row, ApiError> {
        let mut rows = self.select(&query.clone().limit(2)).await?;
        if rows.len() != 1 {
            return Err(ApiError::NotSingle {
                table: query.table.clone(),
                rows: rows.len(),
            });
        }
        Ok(rows.remove(0))
    }

    async fn count(&self, query: &Query) -> Result<u64, ApiError>;

    async fn insert(
        &self,
        table: &str,
        row: Row,
        access_token: Option<&str>,
    ) -> Result<(), ApiError>;

    /// Apply `patch` to every row matching `query`.
    async fn update(&self, query: &Query, patch: Row) -> Result<(), ApiError>;

    async fn delete(&self, query: &Query) -> Result<(), ApiError>;

    /// Change feed for `table`, joined as the owner of `access_token`.
    async fn subscribe(
        &self,
        table: &str,
        access_token: Option<&str>,
    ) -> Result<Subscription, ApiError>;

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        access_token: Option<&str>,
    ) -> Result<(), ApiError>;

    fn public_url(&self, bucket: &str, path: &str) -> String;
}

pub fn decode_row<T: DeserializeOwned>(table: &str, row: Row) -> Result<T, ApiError> {
    serde_json::from_value(row).map_err(|e| ApiError::decode(table, e))
}

pub fn decode_rows<T: DeserializeOwned>(table: &str, rows: Vec<Row>) -> Result<Vec<T>, ApiError> {
    rows.into_iter().map(|row| decode_row(table, row)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_params() {
        let query = Query::table("messages")
            .select("id")
            .is_null("read_at")
            .neq("sender_id", "s-1")
            .is_in("group_id", ["a", "b,c"])
            .gt("created_at", "2024-01-01T00:00:00Z")
            .eq("is_active", true)
            .order("created_at", false)
            .limit(5)
            .as_user("token-1");

        assert_eq!(
            query.to_params(),
            vec![
                ("select".to_string(), "id".to_string()),
                ("read_at".to_string(), "is.null".to_string()),
                ("sender_id".to_string(), "neq.s-1".to_string()),
                ("group_id".to_string(), "in.(a,\"b,c\")".to_string()),
                ("created_at".to_string(), "gt.2024-01-01T00:00:00Z".to_string()),
                ("is_active".to_string(), "eq.true".to_string()),
                ("order".to_string(), "created_at.desc.nullslast".to_string()),
                ("limit".to_string(), "5".to_string()),
            ]
        );
        assert_eq!(query.access_token.as_deref(), Some("token-1"));
    }

    #[test]
    fn test_decode_row_reports_table() {
        let err = decode_row::<AuthUser>("students", json!({"nope": 1})).unwrap_err();
        assert!(err.to_string().contains("students"));
    }
}
