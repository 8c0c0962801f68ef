use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{query::Query, QueryBuilder, Row, Sqlite, SqlitePool};
use thiserror::Error;

use crate::ids::{IdGenerator, IdKind, IdScheme, IdValue};

const USER_COLUMNS: &str =
    "id, user_name, first_name, last_name, email, department, created_at, updated_at";

/// SQLite's bound-parameter ceiling (`SQLITE_MAX_VARIABLE_NUMBER`).
const SQLITE_MAX_VARIABLES: usize = 32_766;

/// Most rows one multi-row INSERT can carry: eight parameters per user.
pub const MAX_BATCH_ROWS: usize = SQLITE_MAX_VARIABLES / 8;

/// Page size used when a list request does not give one.
pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("'{raw}' is not a valid {scheme} id")]
    InvalidId { scheme: IdScheme, raw: String },

    #[error("{0}")]
    Validation(String),

    #[error("stored id in {table} is malformed")]
    CorruptId { table: &'static str },

    #[error("{0} has no users table")]
    NoTable(IdScheme),
}

// ─── Domain types ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: IdValue,
    pub user_name: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub department: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub user_name: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub department: Option<String>,
}

impl NewUser {
    fn validate(&self) -> Result<(), RepoError> {
        let required = [
            ("user_name", &self.user_name),
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
            ("email", &self.email),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(RepoError::Validation(format!("{field} must not be empty")));
            }
        }
        if !self.email.contains('@') {
            return Err(RepoError::Validation("email must contain '@'".into()));
        }
        Ok(())
    }
}

/// Partial update: absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    pub user_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub department: Option<String>,
}

/// `?search=&page=&limit=` of a list request. Pages start at 1.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ListQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    fn offset(&self) -> i64 {
        i64::from(self.page() - 1) * i64::from(self.limit())
    }

    fn pattern(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{s}%"))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserPage {
    pub users: Vec<User>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

// ─── Repository ──────────────────────────────────────────────────

/// CRUD over one scheme's users table. Cheap to clone; all clones share the
/// pool and the id generator.
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
    generator: Arc<dyn IdGenerator>,
    table: &'static str,
}

impl UserRepository {
    pub fn new(pool: SqlitePool, generator: Arc<dyn IdGenerator>) -> Result<Self, RepoError> {
        let scheme = generator.scheme();
        let table = scheme.table().ok_or(RepoError::NoTable(scheme))?;
        Ok(Self {
            pool,
            generator,
            table,
        })
    }

    pub fn scheme(&self) -> IdScheme {
        self.generator.scheme()
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    /// Parses an id taken from a URL into this table's id type.
    pub fn parse_id(&self, raw: &str) -> Result<IdValue, RepoError> {
        self.scheme()
            .kind()
            .parse(raw)
            .ok_or_else(|| RepoError::InvalidId {
                scheme: self.scheme(),
                raw: raw.to_owned(),
            })
    }

    pub async fn create(&self, new: NewUser) -> Result<User, RepoError> {
        new.validate()?;
        let now = now_millis();
        let user = User {
            id: self.generator.generate(),
            user_name: new.user_name,
            first_name: new.first_name,
            last_name: new.last_name,
            email: new.email,
            department: new.department,
            created_at: from_millis(now),
            updated_at: from_millis(now),
        };

        let sql = format!(
            "INSERT INTO {} ({USER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            self.table
        );
        bind_id(sqlx::query(&sql), &user.id)
            .bind(&user.user_name)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.email)
            .bind(&user.department)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(user)
    }

    pub async fn get(&self, id: &IdValue) -> Result<Option<User>, RepoError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM {} WHERE id = ?", self.table);
        let row = bind_id(sqlx::query(&sql), id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| self.decode(&r)).transpose()
    }

    /// Newest first, optionally filtered by a substring of any name field
    /// or the email.
    pub async fn list(&self, query: &ListQuery) -> Result<UserPage, RepoError> {
        let pattern = query.pattern();

        let mut count: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", self.table));
        push_search(&mut count, pattern.as_deref());
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {USER_COLUMNS} FROM {}", self.table));
        push_search(&mut select, pattern.as_deref());
        select
            .push(" ORDER BY created_at DESC, rowid DESC LIMIT ")
            .push_bind(i64::from(query.limit()))
            .push(" OFFSET ")
            .push_bind(query.offset());
        let rows = select.build().fetch_all(&self.pool).await?;

        let users = rows
            .iter()
            .map(|r| self.decode(r))
            .collect::<Result<Vec<_>, RepoError>>()?;

        Ok(UserPage {
            users,
            total,
            page: query.page(),
            limit: query.limit(),
        })
    }

    /// Applies the present fields. `None` when no such user exists.
    pub async fn update(&self, id: &IdValue, changes: UserUpdate) -> Result<Option<User>, RepoError> {
        if let Some(email) = &changes.email {
            if !email.contains('@') {
                return Err(RepoError::Validation("email must contain '@'".into()));
            }
        }

        let sql = format!(
            "UPDATE {} SET \
                 user_name  = COALESCE(?, user_name), \
                 first_name = COALESCE(?, first_name), \
                 last_name  = COALESCE(?, last_name), \
                 email      = COALESCE(?, email), \
                 department = COALESCE(?, department), \
                 updated_at = ? \
             WHERE id = ?",
            self.table
        );
        let q = sqlx::query(&sql)
            .bind(&changes.user_name)
            .bind(&changes.first_name)
            .bind(&changes.last_name)
            .bind(&changes.email)
            .bind(&changes.department)
            .bind(now_millis());
        let result = bind_id(q, id).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    /// `true` when a row was removed.
    pub async fn delete(&self, id: &IdValue) -> Result<bool, RepoError> {
        let sql = format!("DELETE FROM {} WHERE id = ?", self.table);
        let result = bind_id(sqlx::query(&sql), id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Inserts every user, generating their ids, in statements of at most
    /// [`MAX_BATCH_ROWS`] rows. Returns the number of rows written.
    pub async fn insert_batch(&self, batch: Vec<NewUser>) -> Result<u64, RepoError> {
        let now = now_millis();
        let mut users = batch.into_iter().peekable();
        let mut written = 0;

        while users.peek().is_some() {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("INSERT INTO {} ({USER_COLUMNS}) ", self.table));
            qb.push_values(users.by_ref().take(MAX_BATCH_ROWS), |mut row, user| {
                match self.generator.generate() {
                    IdValue::Text(s) => row.push_bind(s),
                    IdValue::Integer(n) => row.push_bind(n),
                    IdValue::Uuid(u) => row.push_bind(u.as_bytes().to_vec()),
                };
                row.push_bind(user.user_name)
                    .push_bind(user.first_name)
                    .push_bind(user.last_name)
                    .push_bind(user.email)
                    .push_bind(user.department)
                    .push_bind(now)
                    .push_bind(now);
            });

            written += qb.build().execute(&self.pool).await?.rows_affected();
        }
        Ok(written)
    }

    fn decode(&self, row: &SqliteRow) -> Result<User, RepoError> {
        let id = match self.scheme().kind() {
            IdKind::Text => IdValue::Text(row.try_get("id")?),
            IdKind::Integer => IdValue::Integer(row.try_get("id")?),
            IdKind::Uuid => {
                let bytes: Vec<u8> = row.try_get("id")?;
                let uuid = uuid::Uuid::from_slice(&bytes)
                    .map_err(|_| RepoError::CorruptId { table: self.table })?;
                IdValue::Uuid(uuid)
            }
        };
        Ok(User {
            id,
            user_name: row.try_get("user_name")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            email: row.try_get("email")?,
            department: row.try_get("department")?,
            created_at: from_millis(row.try_get("created_at")?),
            updated_at: from_millis(row.try_get("updated_at")?),
        })
    }
}

/// Binds an id in its column's storage type: TEXT, INTEGER or a 16-byte BLOB.
fn bind_id<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    id: &'q IdValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match id {
        IdValue::Text(s) => query.bind(s.as_str()),
        IdValue::Integer(n) => query.bind(*n),
        IdValue::Uuid(u) => query.bind(u.as_bytes().as_slice()),
    }
}

fn push_search(qb: &mut QueryBuilder<'_, Sqlite>, pattern: Option<&str>) {
    let Some(pattern) = pattern else {
        return;
    };
    qb.push(" WHERE ");
    let mut any = qb.separated(" OR ");
    for column in ["user_name", "first_name", "last_name", "email"] {
        any.push(format!("{column} LIKE "));
        any.push_bind_unseparated(pattern.to_owned());
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
