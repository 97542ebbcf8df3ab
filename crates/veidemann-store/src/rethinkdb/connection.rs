//! A single RethinkDB connection speaking the V1_0 JSON protocol.
//!
//! # Handshake
//!
//! ```text
//! Client → Server:  [0x34c2bdc3: u32 LE]
//! Server → Client:  {"success":true,"min_protocol_version":0,...}\0
//! Client → Server:  {"protocol_version":0,"authentication_method":"SCRAM-SHA-256",
//!                    "authentication":"<client-first>"}\0
//! Server → Client:  {"success":true,"authentication":"<server-first>"}\0
//! Client → Server:  {"authentication":"<client-final>"}\0
//! Server → Client:  {"success":true,"authentication":"<server-final>"}\0
//! ```
//!
//! # Framing
//!
//! ```text
//! [token: u64 LE] [length: u32 LE] [JSON body]
//! ```
//!
//! Queries are `[START, term, optargs]`; partial results are pulled with
//! `[CONTINUE]` on the same token.

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::ConnectOptions;
use super::reql;
use super::scram::ScramClient;
use crate::error::{StoreError, StoreResult};
use crate::records::{ChangeEvent, Table};

const PROTOCOL_V1_0: u32 = 0x34c2_bdc3;
const PROTOCOL_VERSION: i64 = 0;

const QUERY_START: u32 = 1;
const QUERY_CONTINUE: u32 = 2;
const QUERY_STOP: u32 = 3;

/// Header: 8-byte token + 4-byte body length.
const FRAME_HEADER_SIZE: usize = 12;

/// Refuse single responses larger than this.
const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

// ── Responses ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseKind {
    Atom,
    Sequence,
    Partial,
    WaitComplete,
    ServerInfo,
    ClientError,
    CompileError,
    RuntimeError,
    Unknown(i64),
}

impl From<i64> for ResponseKind {
    fn from(t: i64) -> Self {
        match t {
            1 => ResponseKind::Atom,
            2 => ResponseKind::Sequence,
            3 => ResponseKind::Partial,
            4 => ResponseKind::WaitComplete,
            5 => ResponseKind::ServerInfo,
            16 => ResponseKind::ClientError,
            17 => ResponseKind::CompileError,
            18 => ResponseKind::RuntimeError,
            other => ResponseKind::Unknown(other),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Response {
    t: i64,
    #[serde(default)]
    r: Vec<Value>,
}

impl Response {
    pub(crate) fn kind(&self) -> ResponseKind {
        ResponseKind::from(self.t)
    }

    /// Turn error responses into `StoreError::Query`.
    fn check(self) -> StoreResult<Self> {
        let kind = match self.kind() {
            ResponseKind::ClientError => "client",
            ResponseKind::CompileError => "compile",
            ResponseKind::RuntimeError => "runtime",
            ResponseKind::Unknown(t) => {
                return Err(StoreError::Protocol(format!("unknown response type {t}")));
            }
            _ => return Ok(self),
        };
        let message = self
            .r
            .first()
            .and_then(Value::as_str)
            .unwrap_or("no message")
            .to_string();
        Err(StoreError::Query { kind, message })
    }
}

// ── Connection ─────────────────────────────────────────────────────

/// An authenticated connection. Runs one query at a time.
pub(crate) struct Connection {
    stream: BufStream<TcpStream>,
    db: String,
    next_token: u64,
}

impl Connection {
    /// Connect and authenticate, bounded by the configured timeout.
    pub(crate) async fn open(opts: &ConnectOptions) -> StoreResult<Self> {
        let addr = opts.address();
        let stream = tokio::time::timeout(opts.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| StoreError::Timeout(opts.timeout))?
            .map_err(|e| StoreError::Connection(format!("{addr}: {e}")))?;
        stream.set_nodelay(true)?;

        let mut conn = Self {
            stream: BufStream::new(stream),
            db: opts.database.clone(),
            next_token: 1,
        };
        tokio::time::timeout(opts.timeout, conn.handshake(&opts.username, &opts.password))
            .await
            .map_err(|_| StoreError::Timeout(opts.timeout))??;

        debug!(%addr, user = %opts.username, "rethinkdb connection authenticated");
        Ok(conn)
    }

    async fn handshake(&mut self, user: &str, password: &str) -> StoreResult<()> {
        self.stream.write_all(&PROTOCOL_V1_0.to_le_bytes()).await?;
        self.stream.flush().await?;

        let hello = self.read_handshake_message().await?;
        let min = hello["min_protocol_version"].as_i64().unwrap_or(0);
        let max = hello["max_protocol_version"].as_i64().unwrap_or(0);
        if !(min..=max).contains(&PROTOCOL_VERSION) {
            return Err(StoreError::Protocol(format!(
                "server supports protocol versions {min}..={max}, need {PROTOCOL_VERSION}"
            )));
        }
        debug!(server_version = %hello["server_version"], "rethinkdb server hello");

        let scram = ScramClient::new(user, password);
        self.write_handshake_message(&json!({
            "protocol_version": PROTOCOL_VERSION,
            "authentication_method": "SCRAM-SHA-256",
            "authentication": scram.client_first(),
        }))
        .await?;

        let server_first = self.read_handshake_message().await?;
        let server_first = authentication_field(&server_first)?;
        let client_final = scram.client_final(server_first)?;

        self.write_handshake_message(&json!({"authentication": client_final.message}))
            .await?;

        let server_final = self.read_handshake_message().await?;
        client_final.verify_server_final(authentication_field(&server_final)?)
    }

    async fn write_handshake_message(&mut self, msg: &Value) -> StoreResult<()> {
        let mut bytes = serde_json::to_vec(msg)?;
        bytes.push(0);
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read one NUL-terminated handshake message.
    async fn read_handshake_message(&mut self) -> StoreResult<Value> {
        let mut buf = Vec::new();
        self.stream.read_until(0, &mut buf).await?;
        if buf.pop() != Some(0) {
            return Err(StoreError::Connection(
                "connection closed during handshake".to_string(),
            ));
        }

        let msg: Value = serde_json::from_slice(&buf).map_err(|_| {
            // Pre-2.3 servers and protocol errors answer in plain text.
            StoreError::Protocol(String::from_utf8_lossy(&buf).into_owned())
        })?;

        if msg["success"] == Value::Bool(false) {
            let error = msg["error"].as_str().unwrap_or("handshake rejected");
            let code = msg["error_code"].as_i64().unwrap_or(0);
            // Error codes 10-20 are authentication failures.
            return Err(if (10..=20).contains(&code) {
                StoreError::Auth(error.to_string())
            } else {
                StoreError::Protocol(error.to_string())
            });
        }
        Ok(msg)
    }

    fn take_token(&mut self) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        token
    }

    async fn send(&mut self, token: u64, body: &Value) -> StoreResult<()> {
        let payload = serde_json::to_vec(body)?;
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&token.to_le_bytes());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn recv(&mut self, token: u64) -> StoreResult<Response> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        self.stream.read_exact(&mut header).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                StoreError::Connection("connection closed by server".to_string())
            } else {
                StoreError::Io(e)
            }
        })?;

        let mut token_bytes = [0u8; 8];
        token_bytes.copy_from_slice(&header[..8]);
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&header[8..]);
        let got = u64::from_le_bytes(token_bytes);
        let len = u32::from_le_bytes(len_bytes) as usize;

        if got != token {
            return Err(StoreError::Protocol(format!(
                "response for token {got}, expected {token}"
            )));
        }
        if len > MAX_RESPONSE_BYTES {
            return Err(StoreError::Protocol(format!("response of {len} bytes too large")));
        }

        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await?;
        let response: Response = serde_json::from_slice(&body)
            .map_err(|e| StoreError::Protocol(format!("bad response body: {e}")))?;
        response.check()
    }

    fn start_query(&self, term: Value) -> Value {
        json!([QUERY_START, term, {"db": reql::db(&self.db)}])
    }

    /// Run `term` to completion and collect every result row.
    ///
    /// An atom that is an array is flattened, so `db_list()` and a table
    /// scan both come back as a list of rows.
    pub(crate) async fn run(&mut self, term: Value) -> StoreResult<Vec<Value>> {
        let token = self.take_token();
        let query = self.start_query(term);
        self.send(token, &query).await?;

        let mut rows = Vec::new();
        loop {
            let response = self.recv(token).await?;
            match response.kind() {
                ResponseKind::Atom => {
                    for value in response.r {
                        match value {
                            Value::Array(items) => rows.extend(items),
                            other => rows.push(other),
                        }
                    }
                    return Ok(rows);
                }
                ResponseKind::Sequence => {
                    rows.extend(response.r);
                    return Ok(rows);
                }
                ResponseKind::Partial => {
                    rows.extend(response.r);
                    self.send(token, &json!([QUERY_CONTINUE])).await?;
                }
                kind => {
                    return Err(StoreError::Protocol(format!(
                        "unexpected {kind:?} response to query"
                    )));
                }
            }
        }
    }

    /// Follow the changefeed on `table`, forwarding new documents to `tx`.
    ///
    /// Consumes the connection. Always finishes by sending the termination
    /// sentinel, unless the receiver has gone away. A change whose
    /// `new_val` is null ends the feed the same way.
    pub(crate) async fn follow_changes(mut self, table: Table, tx: mpsc::Sender<ChangeEvent>) {
        match self.pump_changes(table, &tx).await {
            Ok(()) => warn!(%table, "changefeed ended"),
            Err(e) => warn!(%table, error = %e, "changefeed failed"),
        }
        let _ = tx.send(ChangeEvent::terminated(table)).await;
    }

    async fn pump_changes(&mut self, table: Table, tx: &mpsc::Sender<ChangeEvent>) -> StoreResult<()> {
        let token = self.take_token();
        let query = self.start_query(reql::changes(reql::table(table.name())));
        self.send(token, &query).await?;
        debug!(%table, "changefeed started");

        loop {
            let response = self.recv(token).await?;
            let kind = response.kind();
            for change in response.r {
                let new_val = match change.get("new_val") {
                    // Status rows such as `{"state": "ready"}`.
                    None => continue,
                    Some(Value::Null) => {
                        warn!(%table, "changefeed delivered a null document, ending feed");
                        let _ = self.send(token, &json!([QUERY_STOP])).await;
                        return Ok(());
                    }
                    Some(new_val) => new_val,
                };
                if tx.send(ChangeEvent::document(table, new_val.clone())).await.is_err() {
                    debug!(%table, "changefeed receiver dropped, stopping feed");
                    let _ = self.send(token, &json!([QUERY_STOP])).await;
                    return Ok(());
                }
            }
            match kind {
                ResponseKind::Partial => self.send(token, &json!([QUERY_CONTINUE])).await?,
                _ => return Ok(()),
            }
        }
    }
}

fn authentication_field(msg: &Value) -> StoreResult<&str> {
    msg["authentication"]
        .as_str()
        .ok_or_else(|| StoreError::Protocol("handshake message lacks authentication".to_string()))
}
