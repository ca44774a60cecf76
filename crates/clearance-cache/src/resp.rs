//! Networked cache backend speaking RESP2
//!
//! One lazily opened connection, guarded by an async mutex. Every call,
//! including the wait for the connection, is bounded by the configured
//! timeout; any failure of a round trip, including an error reply, drops the
//! connection so the next call reconnects. Only the handful of commands the
//! cache needs are spoken: `AUTH`, `SELECT`, `GET`, `SET PX`, `DEL` and
//! `SCAN MATCH`.

use crate::backend::{CacheBackend, CacheError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// Largest bulk reply accepted from the server.
const MAX_BULK_LEN: usize = 64 * 1024 * 1024;

/// Keys requested per `SCAN` page.
const SCAN_COUNT: &str = "500";

/// Keys removed per `DEL` during prefix invalidation.
const DELETE_BATCH: usize = 256;

/// Connection settings for [`RespCacheBackend`].
#[derive(Clone)]
pub struct RespConfig {
    /// `host:port`
    pub address: String,
    /// Logical database selected after connecting
    pub database: u32,
    /// `AUTH` password, if the server requires one
    pub password: Option<String>,
    /// Bound on connect and on each round trip
    pub timeout: Duration,
}

impl fmt::Debug for RespConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RespConfig")
            .field("address", &self.address)
            .field("database", &self.database)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RespConfig {
    /// Config for `address` with database 0, no password and a 500ms timeout.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            database: 0,
            password: None,
            timeout: Duration::from_millis(500),
        }
    }
}

/// Decoded RESP2 reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+OK`
    Simple(String),
    /// `-ERR ...`
    Error(String),
    /// `:42`
    Integer(i64),
    /// `$n` payload, `None` for the null bulk string
    Bulk(Option<Vec<u8>>),
    /// `*n` elements, `None` for the null array
    Array(Option<Vec<RespValue>>),
}

/// Encode a command as an array of bulk strings.
pub fn encode_command(args: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

async fn read_line<R>(reader: &mut R) -> Result<String, CacheError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut buf = Vec::new();
    let read = reader
        .read_until(b'\n', &mut buf)
        .await
        .map_err(|e| CacheError::Unavailable(format!("read failed: {e}")))?;
    if read == 0 {
        return Err(CacheError::Unavailable("connection closed".to_string()));
    }
    if !buf.ends_with(b"\r\n") {
        return Err(CacheError::Protocol("line not CRLF terminated".to_string()));
    }
    buf.truncate(buf.len() - 2);
    String::from_utf8(buf).map_err(|_| CacheError::Protocol("non-UTF-8 header".to_string()))
}

fn parse_len(body: &str) -> Result<i64, CacheError> {
    body.parse::<i64>()
        .map_err(|_| CacheError::Protocol(format!("bad length {body:?}")))
}

/// Read one reply from `reader`.
pub fn read_value<'a, R>(reader: &'a mut R) -> BoxFuture<'a, Result<RespValue, CacheError>>
where
    R: AsyncBufRead + Unpin + Send,
{
    Box::pin(async move {
        let line = read_line(reader).await?;
        let mut chars = line.chars();
        let tag = chars
            .next()
            .ok_or_else(|| CacheError::Protocol("empty reply".to_string()))?;
        let body = chars.as_str();

        match tag {
            '+' => Ok(RespValue::Simple(body.to_string())),
            '-' => Ok(RespValue::Error(body.to_string())),
            ':' => Ok(RespValue::Integer(parse_len(body)?)),
            '$' => {
                let len = parse_len(body)?;
                if len < 0 {
                    return Ok(RespValue::Bulk(None));
                }
                let len = usize::try_from(len)
                    .ok()
                    .filter(|len| *len <= MAX_BULK_LEN)
                    .ok_or_else(|| CacheError::Protocol(format!("bulk too large: {len}")))?;
                let mut payload = vec![0u8; len + 2];
                reader
                    .read_exact(&mut payload)
                    .await
                    .map_err(|e| CacheError::Unavailable(format!("read failed: {e}")))?;
                if !payload.ends_with(b"\r\n") {
                    return Err(CacheError::Protocol("bulk not CRLF terminated".to_string()));
                }
                payload.truncate(len);
                Ok(RespValue::Bulk(Some(payload)))
            }
            '*' => {
                let count = parse_len(body)?;
                if count < 0 {
                    return Ok(RespValue::Array(None));
                }
                let mut items = Vec::new();
                for _ in 0..count {
                    items.push(read_value(reader).await?);
                }
                Ok(RespValue::Array(Some(items)))
            }
            other => Err(CacheError::Protocol(format!("unknown reply type {other:?}"))),
        }
    })
}

/// Escape glob metacharacters so `SCAN MATCH` treats `prefix` literally.
pub fn glob_escape(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 4);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

type Connection = BufReader<TcpStream>;

/// RESP-speaking cache backend.
pub struct RespCacheBackend {
    config: RespConfig,
    connection: Mutex<Option<Connection>>,
}

impl RespCacheBackend {
    /// Backend for `config`. No connection is made until first use.
    pub fn new(config: RespConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
        }
    }

    /// Connection settings.
    pub fn config(&self) -> &RespConfig {
        &self.config
    }

    async fn round_trip(conn: &mut Connection, args: &[&[u8]]) -> Result<RespValue, CacheError> {
        conn.get_mut()
            .write_all(&encode_command(args))
            .await
            .map_err(|e| CacheError::Unavailable(format!("write failed: {e}")))?;
        conn.get_mut()
            .flush()
            .await
            .map_err(|e| CacheError::Unavailable(format!("flush failed: {e}")))?;
        match read_value(conn).await? {
            RespValue::Error(message) => Err(CacheError::Protocol(message)),
            value => Ok(value),
        }
    }

    async fn connect(&self) -> Result<Connection, CacheError> {
        let stream = TcpStream::connect(self.config.address.as_str())
            .await
            .map_err(|e| CacheError::Unavailable(format!("connect failed: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| CacheError::Unavailable(format!("set_nodelay failed: {e}")))?;
        let mut conn = BufReader::new(stream);

        if let Some(password) = &self.config.password {
            Self::round_trip(&mut conn, &[b"AUTH", password.as_bytes()]).await?;
        }
        if self.config.database != 0 {
            let db = self.config.database.to_string();
            Self::round_trip(&mut conn, &[b"SELECT", db.as_bytes()]).await?;
        }
        debug!(address = %self.config.address, "Cache connection established");
        Ok(conn)
    }

    async fn command(&self, args: &[&[u8]]) -> Result<RespValue, CacheError> {
        let bound = self.config.timeout;
        let deadline = Instant::now() + bound;

        let Ok(mut slot) = timeout_at(deadline, self.connection.lock()).await else {
            warn!(address = %self.config.address, "Cache connection busy until timeout");
            return Err(CacheError::Timeout(bound));
        };

        let outcome = timeout_at(deadline, async {
            if slot.is_none() {
                *slot = Some(self.connect().await?);
            }
            match slot.as_mut() {
                Some(conn) => Self::round_trip(conn, args).await,
                None => Err(CacheError::Unavailable("no connection".to_string())),
            }
        })
        .await
        .unwrap_or(Err(CacheError::Timeout(bound)));

        if let Err(error) = &outcome {
            warn!(address = %self.config.address, error = %error, "Dropping cache connection");
            *slot = None;
        }
        outcome
    }

    async fn delete_keys(&self, keys: &[Vec<u8>]) -> Result<usize, CacheError> {
        let mut removed = 0;
        for batch in keys.chunks(DELETE_BATCH) {
            let mut args: Vec<&[u8]> = Vec::with_capacity(batch.len() + 1);
            args.push(b"DEL");
            args.extend(batch.iter().map(Vec::as_slice));
            match self.command(&args).await? {
                RespValue::Integer(n) => removed += usize::try_from(n).unwrap_or(0),
                other => return Err(unexpected("DEL", &other)),
            }
        }
        Ok(removed)
    }
}

fn unexpected(command: &str, reply: &RespValue) -> CacheError {
    CacheError::Protocol(format!("unexpected {command} reply: {reply:?}"))
}

#[async_trait]
impl CacheBackend for RespCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match self.command(&[b"GET", key.as_bytes()]).await? {
            RespValue::Bulk(value) => Ok(value),
            other => Err(unexpected("GET", &other)),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let millis = ttl.as_millis().max(1).to_string();
        match self
            .command(&[b"SET", key.as_bytes(), &value, b"PX", millis.as_bytes()])
            .await?
        {
            RespValue::Simple(ok) if ok == "OK" => Ok(()),
            other => Err(unexpected("SET", &other)),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        match self.command(&[b"DEL", key.as_bytes()]).await? {
            RespValue::Integer(n) => Ok(n > 0),
            other => Err(unexpected("DEL", &other)),
        }
    }

    async fn invalidate_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let pattern = format!("{}*", glob_escape(prefix));
        let mut cursor = "0".to_string();
        let mut doomed: Vec<Vec<u8>> = Vec::new();

        loop {
            let reply = self
                .command(&[
                    b"SCAN",
                    cursor.as_bytes(),
                    b"MATCH",
                    pattern.as_bytes(),
                    b"COUNT",
                    SCAN_COUNT.as_bytes(),
                ])
                .await?;
            let (next, keys) = match reply {
                RespValue::Array(Some(mut parts)) if parts.len() == 2 => {
                    let keys = parts.pop();
                    let next = parts.pop();
                    match (next, keys) {
                        (
                            Some(RespValue::Bulk(Some(next))),
                            Some(RespValue::Array(Some(keys))),
                        ) => (next, keys),
                        _ => return Err(CacheError::Protocol("malformed SCAN page".to_string())),
                    }
                }
                other => return Err(unexpected("SCAN", &other)),
            };
            for key in keys {
                if let RespValue::Bulk(Some(key)) = key {
                    doomed.push(key);
                }
            }
            cursor = String::from_utf8(next)
                .map_err(|_| CacheError::Protocol("non-UTF-8 SCAN cursor".to_string()))?;
            if cursor == "0" {
                break;
            }
        }

        doomed.sort();
        doomed.dedup();
        self.delete_keys(&doomed).await
    }

    fn name(&self) -> &'static str {
        "resp"
    }
}
