//! Persistence for recorded request/response transactions.
//!
//! `Repository` is expressed as a capability set -- `create_request`,
//! `get_request`, `list_requests`, `create_response` -- any concrete
//! implementation satisfying it is acceptable (the control API, the
//! replay path, and transcription all depend on the trait, never on a
//! concrete store). The shipped implementation backs onto `sqlx`'s
//! sqlite driver, the same crate family `hypernetix-hyperspot`'s
//! `modkit-db` reaches for when it needs a relational store; the original
//! Go implementation's `gorm`-over-Postgres `ORMrepository` is the model
//! for the query shapes (`ORDER BY id DESC LIMIT`, `Preload("Response")`).

use crate::error::{Error, Result};
use crate::models::{HeaderMap, ParamMap, RequestData, RequestSummary, ResponseData};
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;

/// History store: persist/retrieve request, response, and the list view.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Persist a request, returning its surrogate id.
    async fn create_request(&self, request: &RequestData) -> Result<i64>;

    /// Persist a response, whose `request_id` must already be set.
    /// Returns the response's surrogate id.
    async fn create_response(&self, response: &ResponseData) -> Result<i64>;

    /// Fetch a request by id, together with its response if one exists.
    async fn get_request(&self, id: i64) -> Result<Option<(RequestData, Option<ResponseData>)>>;

    /// The `{id, method, path}` list view, most recent first, capped at
    /// `limit`.
    async fn list_requests(&self, limit: i64) -> Result<Vec<RequestSummary>>;
}

/// `sqlx`-backed history store. `database_url` may be a file path
/// (`sqlite://history.db`) or `sqlite::memory:` for an ephemeral store.
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                method TEXT NOT NULL,
                path TEXT NOT NULL,
                tls INTEGER NOT NULL,
                get_params TEXT NOT NULL,
                post_params TEXT NOT NULL,
                headers TEXT NOT NULL,
                cookies TEXT NOT NULL,
                body BLOB NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS responses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request_id INTEGER NOT NULL UNIQUE REFERENCES requests(id),
                status_code INTEGER NOT NULL,
                message TEXT NOT NULL,
                headers TEXT NOT NULL,
                body BLOB NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn create_request(&self, request: &RequestData) -> Result<i64> {
        let headers_json = serde_json::to_string(&request.headers)?;
        let cookies_json = serde_json::to_string(&request.cookies)?;
        let get_params_json = serde_json::to_string(&request.query_params.as_grouped())?;
        let post_params_json = serde_json::to_string(&request.form_params.as_grouped())?;

        let result = sqlx::query(
            r#"
            INSERT INTO requests (method, path, tls, get_params, post_params, headers, cookies, body, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&request.method)
        .bind(&request.path)
        .bind(request.tls)
        .bind(&get_params_json)
        .bind(&post_params_json)
        .bind(&headers_json)
        .bind(&cookies_json)
        .bind(&request.body)
        .bind(request.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn create_response(&self, response: &ResponseData) -> Result<i64> {
        let request_id = response
            .request_id
            .ok_or_else(|| Error::Repository("response has no request_id".into()))?;
        let headers_json = serde_json::to_string(&response.headers)?;

        let result = sqlx::query(
            r#"
            INSERT INTO responses (request_id, status_code, message, headers, body, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(request_id)
        .bind(response.status_code as i64)
        .bind(&response.status_text)
        .bind(&headers_json)
        .bind(&response.body)
        .bind(response.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn get_request(&self, id: i64) -> Result<Option<(RequestData, Option<ResponseData>)>> {
        let row = sqlx::query(
            "SELECT id, method, path, tls, get_params, post_params, headers, cookies, body, created_at FROM requests WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let headers: HeaderMap = serde_json::from_str(row.get::<String, _>("headers").as_str())?;
        let cookies: HashMap<String, String> =
            serde_json::from_str(row.get::<String, _>("cookies").as_str())?;
        let get_params: HashMap<String, Vec<String>> =
            serde_json::from_str(row.get::<String, _>("get_params").as_str())?;
        let post_params: HashMap<String, Vec<String>> =
            serde_json::from_str(row.get::<String, _>("post_params").as_str())?;

        let mut request = RequestData::new(
            row.get("method"),
            row.get("path"),
            "0.0.0.0".parse().unwrap(),
            0,
        );
        request.id = Some(row.get("id"));
        request.tls = row.get("tls");
        request.host = headers.get("host").unwrap_or_default().to_string();
        request.headers = headers;
        request.cookies = cookies;
        request.query_params = ungroup(get_params);
        request.form_params = ungroup(post_params);
        request.body = row.get("body");
        request.created_at = chrono::DateTime::parse_from_rfc3339(row.get("created_at"))
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now());

        let response_row = sqlx::query(
            "SELECT id, status_code, message, headers, body, created_at FROM responses WHERE request_id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let response = match response_row {
            Some(r) => {
                let headers: HeaderMap = serde_json::from_str(r.get::<String, _>("headers").as_str())?;
                let mut response = ResponseData::new(
                    r.get::<i64, _>("status_code") as u16,
                    r.get("message"),
                );
                response.id = Some(r.get("id"));
                response.request_id = Some(id);
                response.headers = headers;
                response.body = r.get("body");
                response.created_at = chrono::DateTime::parse_from_rfc3339(r.get("created_at"))
                    .map(|dt| dt.with_timezone(&chrono::Utc))
                    .unwrap_or_else(|_| chrono::Utc::now());
                Some(response)
            }
            None => None,
        };

        Ok(Some((request, response)))
    }

    async fn list_requests(&self, limit: i64) -> Result<Vec<RequestSummary>> {
        let rows = sqlx::query("SELECT id, method, path FROM requests ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| RequestSummary {
                id: row.get("id"),
                method: row.get("method"),
                path: row.get("path"),
            })
            .collect())
    }
}

fn ungroup(grouped: HashMap<String, Vec<String>>) -> ParamMap {
    let mut map = ParamMap::new();
    for (k, values) in grouped {
        for v in values {
            map.push(k.clone(), v);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    async fn repo() -> SqliteRepository {
        SqliteRepository::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn create_and_fetch_round_trips() {
        let repo = repo().await;
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let mut req = RequestData::new("GET".into(), "/x?y=1".into(), ip, 1234);
        req.query_params.push("y", "1");
        req.headers.push("Host", "example.test");

        let id = repo.create_request(&req).await.unwrap();

        let mut resp = ResponseData::new(200, "OK".into());
        resp.request_id = Some(id);
        resp.body = b"hi".to_vec();
        repo.create_response(&resp).await.unwrap();

        let (fetched_req, fetched_resp) = repo.get_request(id).await.unwrap().unwrap();
        assert_eq!(fetched_req.method, "GET");
        assert_eq!(fetched_req.headers.get("Host"), Some("example.test"));
        assert_eq!(fetched_resp.unwrap().status_code, 200);
    }

    #[tokio::test]
    async fn list_requests_is_descending_and_capped() {
        let repo = repo().await;
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        for i in 0..30 {
            let req = RequestData::new("GET".into(), format!("/{i}"), ip, 1234);
            repo.create_request(&req).await.unwrap();
        }

        let list = repo.list_requests(25).await.unwrap();
        assert_eq!(list.len(), 25);
        assert!(list[0].id > list[1].id);
        assert_eq!(list[0].path, "/29");
    }
}
