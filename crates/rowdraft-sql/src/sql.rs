use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rowdraft_engine::{CellSpec, TargetId};
use rowdraft_model::{parse_timestamp, quote_text, RawValue, ValueTag};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions, PgRow, PgSslMode};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::types::{Decimal, Uuid};
use sqlx::{Column, Executor, Row, TypeInfo, ValueRef};
use std::str::FromStr;
use tracing::debug;

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SqlDataType {
    Any,
    String,
    Number,
    Boolean,
    Date,
    Json,
    Array,
}

impl SqlDataType {
    /// Editing hint for cells of this column; `Any` leaves the decision to the value.
    pub fn value_tag(self) -> Option<ValueTag> {
        match self {
            SqlDataType::Any => None,
            SqlDataType::String => Some(ValueTag::String),
            SqlDataType::Number => Some(ValueTag::Number),
            SqlDataType::Boolean => Some(ValueTag::Boolean),
            SqlDataType::Date => Some(ValueTag::Date),
            SqlDataType::Json => Some(ValueTag::Json),
            SqlDataType::Array => Some(ValueTag::Array),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMeta {
    pub name: String,
    pub data_type: SqlDataType,
    pub nullable: bool,
}

impl ColumnMeta {
    /// Describe the cell at `(table, this column, row key)` for mounting.
    pub fn cell_spec(
        &self,
        target: &TargetId,
        table: &str,
        pk_column: &str,
        pk_value: &str,
    ) -> CellSpec {
        let spec = CellSpec::new(target.clone(), table, &self.name, pk_column, pk_value)
            .nullable(self.nullable);
        match self.data_type.value_tag() {
            Some(tag) => spec.column_type(tag),
            None => spec,
        }
    }
}

/// Rows decoded into the shape the edit engine mounts.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadedRows {
    pub columns: Vec<String>,
    pub types: Vec<SqlDataType>,
    pub rows: Vec<Vec<RawValue>>,
}

impl LoadedRows {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SqliteConnectionDescriptor {
    path: Option<String>,
    in_memory: Option<bool>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostgresConnectionDescriptor {
    url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    user: Option<String>,
    ssl: Option<bool>,
}

enum ConnectTarget {
    Sqlite {
        opts: SqliteConnectOptions,
        in_memory: bool,
    },
    Postgres(PgConnectOptions),
}

fn connection_kind(connection: &JsonValue) -> Result<&str> {
    connection
        .get("kind")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("SQL connection descriptor must be an object with a string 'kind' field"))
}

fn credential_string(credentials: Option<&JsonValue>, key: &str) -> Option<String> {
    let creds = credentials?;
    let obj = creds.as_object()?;
    obj.get(key)?.as_str().map(|s| s.to_string())
}

fn credential_password(credentials: Option<&JsonValue>) -> Option<String> {
    match credentials? {
        JsonValue::String(s) => Some(s.clone()),
        _ => credential_string(credentials, "password")
            .or_else(|| credential_string(credentials, "token"))
            .or_else(|| credential_string(credentials, "secret")),
    }
}

fn sqlite_options(connection: &JsonValue) -> Result<ConnectTarget> {
    let descriptor = SqliteConnectionDescriptor::deserialize(connection)
        .context("invalid sqlite connection descriptor")?;
    let in_memory = descriptor.in_memory.unwrap_or(false);
    let opts = if in_memory {
        SqliteConnectOptions::from_str("sqlite::memory:")?
    } else {
        let path = descriptor
            .path
            .ok_or_else(|| anyhow!("sqlite connection requires `path`"))?;
        SqliteConnectOptions::new().filename(path)
    };
    Ok(ConnectTarget::Sqlite {
        opts: opts.create_if_missing(false),
        in_memory,
    })
}

fn postgres_options(
    connection: &JsonValue,
    credentials: Option<&JsonValue>,
) -> Result<PgConnectOptions> {
    let descriptor = PostgresConnectionDescriptor::deserialize(connection)
        .context("invalid postgres connection descriptor")?;
    let mut opts = match (&descriptor.url, &descriptor.host) {
        (Some(url), _) => PgConnectOptions::from_str(url).context("invalid postgres url")?,
        (None, Some(_)) => PgConnectOptions::new(),
        (None, None) => bail!("postgres connection requires `host` or `url`"),
    };

    // Explicit fields override whatever the url carried.
    if let Some(host) = &descriptor.host {
        opts = opts.host(host);
    }
    if let Some(port) = descriptor.port {
        opts = opts.port(port);
    }
    if let Some(database) = &descriptor.database {
        opts = opts.database(database);
    }
    if let Some(user) = &descriptor.user {
        opts = opts.username(user);
    }
    if let Some(password) = credential_password(credentials) {
        opts = opts.password(&password);
    }
    if let Some(ssl) = descriptor.ssl {
        opts = opts.ssl_mode(if ssl { PgSslMode::Require } else { PgSslMode::Disable });
    }
    Ok(opts)
}

fn resolve(connection: &JsonValue, credentials: Option<&JsonValue>) -> Result<ConnectTarget> {
    match connection_kind(connection)? {
        "sqlite" => sqlite_options(connection),
        "postgres" => Ok(ConnectTarget::Postgres(postgres_options(
            connection,
            credentials,
        )?)),
        other => Err(anyhow!(
            "Unsupported SQL connection kind '{other}' (supported: sqlite, postgres)"
        )),
    }
}

fn sqlite_type_to_data_type(type_name: &str) -> SqlDataType {
    let normalized = type_name.trim().to_ascii_lowercase();
    if normalized.contains("int")
        || normalized.contains("real")
        || normalized.contains("floa")
        || normalized.contains("doub")
        || normalized.contains("num")
        || normalized.contains("dec")
    {
        return SqlDataType::Number;
    }
    if normalized.contains("bool") {
        return SqlDataType::Boolean;
    }
    if normalized.contains("date") || normalized.contains("time") {
        return SqlDataType::Date;
    }
    if normalized.contains("json") {
        return SqlDataType::Json;
    }
    if normalized.contains("char") || normalized.contains("text") || normalized.contains("clob") {
        return SqlDataType::String;
    }
    SqlDataType::Any
}

fn postgres_type_to_data_type(type_name: &str) -> SqlDataType {
    let normalized = type_name.trim().to_ascii_lowercase();
    if normalized.ends_with("[]") || normalized.starts_with('_') {
        return SqlDataType::Array;
    }
    match normalized.as_str() {
        "bool" => SqlDataType::Boolean,
        "int2" | "int4" | "int8" | "float4" | "float8" | "numeric" | "money" => SqlDataType::Number,
        "date" | "timestamp" | "timestamptz" => SqlDataType::Date,
        // Times of day have no date part; they edit as text and the server casts them.
        "time" | "timetz" => SqlDataType::String,
        "text" | "varchar" | "bpchar" | "name" | "char" | "uuid" => SqlDataType::String,
        "json" | "jsonb" => SqlDataType::Json,
        _ => {
            if normalized.starts_with("int") || normalized.starts_with("float") {
                SqlDataType::Number
            } else if normalized.contains("timestamp")
                || normalized.contains("date")
                || normalized.contains("time")
            {
                SqlDataType::Date
            } else {
                SqlDataType::Any
            }
        }
    }
}

fn float_value(value: Option<f64>) -> RawValue {
    value
        .and_then(serde_json::Number::from_f64)
        .map(RawValue::Number)
        .unwrap_or(RawValue::Null)
}

fn text_as_timestamp(text: String) -> RawValue {
    match parse_timestamp(&text) {
        Some(ts) => RawValue::Timestamp(ts),
        None => RawValue::Text(text),
    }
}

fn text_as_json(text: String) -> RawValue {
    match serde_json::from_str::<JsonValue>(&text) {
        Ok(value @ (JsonValue::Array(_) | JsonValue::Object(_))) => RawValue::from(value),
        _ => RawValue::Text(text),
    }
}

fn decimal_value(value: Decimal) -> RawValue {
    RawValue::Decimal(value.to_string())
}

fn time_value(value: NaiveTime) -> RawValue {
    RawValue::Text(value.format("%H:%M:%S%.f").to_string())
}

fn sqlite_cell_to_raw(row: &SqliteRow, idx: usize, ty: SqlDataType) -> RawValue {
    // SQLite uses dynamic typing; use the declared schema type as a hint.
    match ty {
        SqlDataType::Boolean => {
            if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
                return v.into();
            }
            if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
                return v.map(|n| n != 0).into();
            }
        }
        SqlDataType::Number => {
            if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
                return v.into();
            }
            if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
                return float_value(v);
            }
        }
        SqlDataType::Date => {
            if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
                return v.map(text_as_timestamp).unwrap_or(RawValue::Null);
            }
        }
        SqlDataType::Json | SqlDataType::Array => {
            if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
                return v.map(text_as_json).unwrap_or(RawValue::Null);
            }
        }
        SqlDataType::String => {
            if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
                return v.into();
            }
        }
        SqlDataType::Any => {}
    }

    // Fallback: attempt a few common decodes.
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.into();
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return float_value(v);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.into();
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v.map(RawValue::Binary).unwrap_or(RawValue::Null);
    }
    match row.try_get_raw(idx) {
        Ok(value) if !value.is_null() => RawValue::Binary(Vec::new()),
        _ => RawValue::Null,
    }
}

/// `Some(value)` when the cell decodes as `T` (NULL included), `None` when it does not.
fn pg_decode<'r, T>(row: &'r PgRow, idx: usize) -> Option<Option<T>>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<Option<T>, _>(idx).ok()
}

fn json_array<T: Into<JsonValue>>(items: Option<Vec<T>>) -> RawValue {
    items
        .map(|items| RawValue::Array(items.into_iter().map(Into::into).collect()))
        .unwrap_or(RawValue::Null)
}

/// A non-NULL value no decoder understands keeps its wire bytes; it must not read as NULL.
fn postgres_opaque(row: &PgRow, idx: usize, pg_type_name: &str) -> RawValue {
    match row.try_get_raw(idx) {
        Ok(value) if !value.is_null() => {
            debug!(column = idx, pg_type = pg_type_name, "no decoder for postgres value");
            RawValue::Binary(value.as_bytes().map(<[u8]>::to_vec).unwrap_or_default())
        }
        _ => RawValue::Null,
    }
}

fn postgres_cell_to_raw(row: &PgRow, idx: usize, pg_type_name: &str) -> RawValue {
    let decoded = match pg_type_name {
        "BOOL" => pg_decode::<bool>(row, idx).map(RawValue::from),
        "INT2" => pg_decode::<i16>(row, idx).map(|v| RawValue::from(v.map(i64::from))),
        "INT4" => pg_decode::<i32>(row, idx).map(|v| RawValue::from(v.map(i64::from))),
        "INT8" => pg_decode::<i64>(row, idx).map(RawValue::from),
        "FLOAT4" => pg_decode::<f32>(row, idx).map(|v| float_value(v.map(f64::from))),
        "FLOAT8" => pg_decode::<f64>(row, idx).map(float_value),
        "NUMERIC" => {
            pg_decode::<Decimal>(row, idx).map(|v| v.map(decimal_value).unwrap_or(RawValue::Null))
        }
        "DATE" => pg_decode::<NaiveDate>(row, idx).map(|v| {
            RawValue::from(
                v.and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| dt.and_utc()),
            )
        }),
        "TIMESTAMP" => {
            pg_decode::<NaiveDateTime>(row, idx).map(|v| RawValue::from(v.map(|dt| dt.and_utc())))
        }
        "TIMESTAMPTZ" => pg_decode::<chrono::DateTime<Utc>>(row, idx).map(RawValue::from),
        "TIME" => {
            pg_decode::<NaiveTime>(row, idx).map(|v| v.map(time_value).unwrap_or(RawValue::Null))
        }
        "UUID" => pg_decode::<Uuid>(row, idx).map(|v| RawValue::from(v.map(|id| id.to_string()))),
        "JSON" | "JSONB" => pg_decode::<JsonValue>(row, idx).map(RawValue::from),
        _ => pg_decode::<String>(row, idx)
            .map(RawValue::from)
            .or_else(|| pg_decode::<Vec<String>>(row, idx).map(json_array))
            .or_else(|| pg_decode::<Vec<i64>>(row, idx).map(json_array))
            .or_else(|| pg_decode::<i64>(row, idx).map(RawValue::from))
            .or_else(|| pg_decode::<f64>(row, idx).map(float_value))
            .or_else(|| pg_decode::<bool>(row, idx).map(RawValue::from)),
    };
    decoded.unwrap_or_else(|| postgres_opaque(row, idx, pg_type_name))
}

/// An open connection target. Clones share the same pool.
#[derive(Clone, Debug)]
pub enum SqlTarget {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

impl SqlTarget {
    /// Resolve `connection` and open a pool for it.
    ///
    /// An in-memory SQLite database lives inside its single pooled connection, so that
    /// connection is never reaped while the target is open.
    pub async fn connect(connection: &JsonValue, credentials: Option<&JsonValue>) -> Result<Self> {
        match resolve(connection, credentials)? {
            ConnectTarget::Sqlite { opts, in_memory } => {
                let pool_options = if in_memory {
                    SqlitePoolOptions::new()
                        .max_connections(1)
                        .min_connections(1)
                        .idle_timeout(None)
                        .max_lifetime(None)
                } else {
                    SqlitePoolOptions::new()
                };
                let pool = pool_options
                    .connect_with(opts)
                    .await
                    .context("connect sqlite")?;
                Ok(SqlTarget::Sqlite(pool))
            }
            ConnectTarget::Postgres(opts) => {
                let pool = PgPoolOptions::new()
                    .connect_with(opts)
                    .await
                    .context("connect postgres")?;
                Ok(SqlTarget::Postgres(pool))
            }
        }
    }

    /// Submit `script` as one raw request (no statement splitting, no prepared statements).
    pub async fn execute_script(&self, script: &str) -> Result<()> {
        match self {
            SqlTarget::Sqlite(pool) => {
                let mut conn = pool.acquire().await.context("connect sqlite")?;
                conn.execute(sqlx::raw_sql(script))
                    .await
                    .context("execute sqlite script")?;
            }
            SqlTarget::Postgres(pool) => {
                let mut conn = pool.acquire().await.context("connect postgres")?;
                conn.execute(sqlx::raw_sql(script))
                    .await
                    .context("execute postgres script")?;
            }
        }
        Ok(())
    }

    /// Column names, type hints, and nullability for `table`.
    pub async fn column_metadata(&self, table: &str) -> Result<Vec<ColumnMeta>> {
        let columns = match self {
            SqlTarget::Sqlite(pool) => {
                let mut conn = pool.acquire().await.context("connect sqlite")?;
                sqlite_columns(&mut conn, table).await?
            }
            SqlTarget::Postgres(pool) => {
                let mut conn = pool.acquire().await.context("connect postgres")?;
                postgres_columns(&mut conn, table).await?
            }
        };
        if columns.is_empty() {
            bail!("table `{table}` not found or has no columns");
        }
        Ok(columns)
    }

    /// Run a read query and decode every cell into a [`RawValue`].
    pub async fn load_rows(&self, sql: &str) -> Result<LoadedRows> {
        match self {
            SqlTarget::Sqlite(pool) => {
                let mut conn = pool.acquire().await.context("connect sqlite")?;
                load_sqlite(&mut conn, sql).await
            }
            SqlTarget::Postgres(pool) => {
                let mut conn = pool.acquire().await.context("connect postgres")?;
                load_postgres(&mut conn, sql).await
            }
        }
    }

    /// Close every pooled connection. An in-memory database is gone afterwards.
    pub async fn close(&self) {
        match self {
            SqlTarget::Sqlite(pool) => pool.close().await,
            SqlTarget::Postgres(pool) => pool.close().await,
        }
    }
}

async fn sqlite_columns(conn: &mut SqliteConnection, table: &str) -> Result<Vec<ColumnMeta>> {
    // `PRAGMA table_info` reports declared types and NOT NULL directly.
    let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_text(table)))
        .fetch_all(conn)
        .await
        .context("read sqlite table info")?;
    rows.iter()
        .map(|row| -> Result<ColumnMeta> {
            let name: String = row.try_get("name")?;
            let declared: String = row.try_get("type")?;
            let not_null: i64 = row.try_get("notnull")?;
            Ok(ColumnMeta {
                name,
                data_type: sqlite_type_to_data_type(&declared),
                nullable: not_null == 0,
            })
        })
        .collect()
}

async fn postgres_columns(conn: &mut PgConnection, table: &str) -> Result<Vec<ColumnMeta>> {
    let sql = format!("SELECT * FROM {table}");
    let describe = conn
        .describe(&sql)
        .await
        .context("describe postgres table")?;
    Ok(describe
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| ColumnMeta {
            name: col.name().to_string(),
            data_type: postgres_type_to_data_type(col.type_info().name()),
            nullable: describe.nullable(idx).unwrap_or(true),
        })
        .collect())
}

async fn sqlite_declared_types(conn: &mut SqliteConnection, sql: &str) -> Result<Vec<SqlDataType>> {
    let describe = conn.describe(sql).await.context("describe sqlite query")?;
    Ok(describe
        .columns()
        .iter()
        .map(|col| sqlite_type_to_data_type(col.type_info().name()))
        .collect())
}

async fn load_sqlite(conn: &mut SqliteConnection, sql: &str) -> Result<LoadedRows> {
    let rows = sqlx::query(sql)
        .fetch_all(&mut *conn)
        .await
        .context("execute sqlite query")?;
    // Best-effort: a query that cannot be described still loads with untyped decoding.
    let declared = sqlite_declared_types(conn, sql).await.ok();

    let columns: Vec<String> = rows
        .first()
        .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();
    let types: Vec<SqlDataType> = (0..columns.len())
        .map(|idx| {
            declared
                .as_ref()
                .and_then(|types| types.get(idx).copied())
                .unwrap_or(SqlDataType::Any)
        })
        .collect();

    let rows = rows
        .iter()
        .map(|row| {
            types
                .iter()
                .enumerate()
                .map(|(idx, ty)| sqlite_cell_to_raw(row, idx, *ty))
                .collect()
        })
        .collect();
    Ok(LoadedRows {
        columns,
        types,
        rows,
    })
}

async fn load_postgres(conn: &mut PgConnection, sql: &str) -> Result<LoadedRows> {
    let rows = sqlx::query(sql)
        .fetch_all(conn)
        .await
        .context("execute postgres query")?;

    let (columns, type_names): (Vec<String>, Vec<String>) = rows
        .first()
        .map(|r| {
            r.columns()
                .iter()
                .map(|c| (c.name().to_string(), c.type_info().name().to_string()))
                .unzip()
        })
        .unwrap_or_default();
    let types = type_names
        .iter()
        .map(|name| postgres_type_to_data_type(name))
        .collect();

    let rows = rows
        .iter()
        .map(|row| {
            type_names
                .iter()
                .enumerate()
                .map(|(idx, name)| postgres_cell_to_raw(row, idx, name))
                .collect()
        })
        .collect();
    Ok(LoadedRows {
        columns,
        types,
        rows,
    })
}

/// One-shot [`SqlTarget::execute_script`] that opens and closes its own pool.
pub async fn execute_script(
    connection: &JsonValue,
    script: &str,
    credentials: Option<&JsonValue>,
) -> Result<()> {
    let target = SqlTarget::connect(connection, credentials).await?;
    let result = target.execute_script(script).await;
    target.close().await;
    result
}

/// One-shot [`SqlTarget::column_metadata`].
pub async fn column_metadata(
    connection: &JsonValue,
    table: &str,
    credentials: Option<&JsonValue>,
) -> Result<Vec<ColumnMeta>> {
    let target = SqlTarget::connect(connection, credentials).await?;
    let result = target.column_metadata(table).await;
    target.close().await;
    result
}

/// One-shot [`SqlTarget::load_rows`].
pub async fn load_rows(
    connection: &JsonValue,
    sql: &str,
    credentials: Option<&JsonValue>,
) -> Result<LoadedRows> {
    let target = SqlTarget::connect(connection, credentials).await?;
    let result = target.load_rows(sql).await;
    target.close().await;
    result
}
