//! Single logical Postgres connection: LISTEN subscription, the prepared
//! atomic dequeue statement, healthcheck, and close.

use std::io::Write;

use mailroom_crypto::MacSigner;
use mailroom_shaper::{Action, DequeuedRow};
use tokio::sync::mpsc;
use tokio_postgres::{Client, NoTls, Statement};
use tracing::{debug, warn};

use crate::error::{classify, DatabaseError, DatabaseResult, ErrorClass};

const DEQUEUE_SQL: &str = "
WITH claimed AS (
    SELECT t.id, t.action, a.email, a.login, t.secret, t.code
    FROM tokens t
    JOIN accounts a ON a.id = t.account_id
    WHERE t.id > (SELECT cursor FROM queue_cursors WHERE queue_name = $1)
      AND (
            (t.action = 'activation' AND a.status = 'provisioned')
         OR (t.action = 'password_recovery' AND a.status = 'active')
      )
    ORDER BY t.id ASC
    LIMIT $2
),
advanced AS (
    UPDATE queue_cursors
    SET cursor = (SELECT max(id) FROM claimed)
    WHERE queue_name = $1 AND EXISTS (SELECT 1 FROM claimed)
    RETURNING 1
)
SELECT id, action, email, login, secret, code FROM claimed ORDER BY id ASC";

/// Outcome of a single dequeue round-trip. A tagged three-variant result
/// rather than a numeric error code, per the design note in spec §9.
pub enum DequeueOutcome {
    /// The query succeeded; `usize` rows were shaped and written.
    Rows(usize),
    /// The query failed in a way that warrants a reconnect.
    Transient(DatabaseError),
    /// The query failed in a way the caller must fix (schema drift).
    Terminal(DatabaseError),
}

/// A connected, subscribed, prepared handle to the queue database.
pub struct DbHandle {
    client: Client,
    dequeue_stmt: Statement,
    notifications: mpsc::UnboundedReceiver<()>,
    conn_task: tokio::task::JoinHandle<()>,
}

impl DbHandle {
    /// Opens a connection, subscribes to `channel`, and prepares the
    /// dequeue statement. Fails terminally (no retry) if any step fails —
    /// restart is the caller's responsibility, per spec §7.
    pub async fn connect(conn_info: &str, channel: &str) -> DatabaseResult<Self> {
        validate_identifier(channel)?;

        let (client, connection) = tokio_postgres::connect(conn_info, NoTls)
            .await
            .map_err(DatabaseError::Connect)?;

        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let conn_task = tokio::spawn(async move {
            let mut connection = connection;
            loop {
                let message =
                    std::future::poll_fn(|cx| connection.poll_message(cx)).await;
                match message {
                    Some(Ok(tokio_postgres::AsyncMessage::Notification(_))) => {
                        // Content is discarded; only the event matters —
                        // the cursor discovers the actual rows.
                        let _ = notify_tx.send(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "connection error while polling for messages");
                        break;
                    }
                    None => break,
                }
            }
        });

        client
            .batch_execute(&format!("LISTEN \"{channel}\""))
            .await
            .map_err(DatabaseError::Connect)?;

        let dequeue_stmt = client
            .prepare(DEQUEUE_SQL)
            .await
            .map_err(DatabaseError::Connect)?;

        Ok(Self {
            client,
            dequeue_stmt,
            notifications: notify_rx,
            conn_task,
        })
    }

    /// Waits for the next notification. Returns `None` if the connection's
    /// background task has ended (connection lost).
    pub async fn recv_notification(&mut self) -> Option<()> {
        self.notifications.recv().await
    }

    /// Drains all pending notifications without blocking. Returns the
    /// count observed and whether the connection appears to have been
    /// lost (the channel was closed).
    pub fn drain_notifications(&mut self) -> (usize, bool) {
        let mut count = 0;
        loop {
            match self.notifications.try_recv() {
                Ok(()) => count += 1,
                Err(mpsc::error::TryRecvError::Empty) => return (count, false),
                Err(mpsc::error::TryRecvError::Disconnected) => return (count, true),
            }
        }
    }

    /// Executes the prepared dequeue statement, shapes each returned row,
    /// and — if at least one row was shaped — writes a single
    /// newline-terminated, comma-joined batch line to `out` and flushes
    /// it. Malformed rows are logged and skipped; they still count toward
    /// the cursor advance because the query has already moved it.
    pub async fn dequeue(
        &mut self,
        signer: &MacSigner,
        queue_name: &str,
        limit: i64,
        out: &mut impl Write,
    ) -> DequeueOutcome {
        let rows = match self
            .client
            .query(&self.dequeue_stmt, &[&queue_name, &limit])
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                return match classify(&err) {
                    ErrorClass::Transient => DequeueOutcome::Transient(DatabaseError::Query(err)),
                    ErrorClass::Terminal => DequeueOutcome::Terminal(DatabaseError::Query(err)),
                };
            }
        };

        let mut shaped = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            let dequeued = match decode_row(row) {
                Ok(r) => r,
                Err(e) => {
                    return DequeueOutcome::Terminal(e);
                }
            };
            match mailroom_shaper::shape_row(&dequeued, signer) {
                Ok(s) => shaped.push(s),
                Err(e) => {
                    warn!(row = idx, error = %e, "skipping malformed row");
                }
            }
        }

        if shaped.is_empty() {
            return DequeueOutcome::Rows(0);
        }

        let line = shaped
            .iter()
            .map(mailroom_shaper::ShapedRow::to_line)
            .collect::<Vec<_>>()
            .join(",");

        if let Err(err) = writeln!(out, "{line}").and_then(|_| out.flush()) {
            warn!(error = %err, "failed to write batch to output");
        }

        debug!(rows = shaped.len(), "emitted batch");
        DequeueOutcome::Rows(shaped.len())
    }

    /// Trivial round-trip to verify liveness.
    pub async fn healthcheck(&self) -> bool {
        self.client.simple_query("SELECT 1").await.is_ok()
    }

    /// Releases the connection.
    pub async fn close(self) {
        self.conn_task.abort();
        drop(self.client);
    }
}

fn decode_row(row: &tokio_postgres::Row) -> DatabaseResult<DequeuedRow> {
    let action_raw: String = row
        .try_get("action")
        .map_err(|e| DatabaseError::UnexpectedShape(e.to_string()))?;
    let email: String = row
        .try_get("email")
        .map_err(|e| DatabaseError::UnexpectedShape(e.to_string()))?;
    let login: String = row
        .try_get("login")
        .map_err(|e| DatabaseError::UnexpectedShape(e.to_string()))?;
    let secret: Vec<u8> = row
        .try_get("secret")
        .map_err(|e| DatabaseError::UnexpectedShape(e.to_string()))?;
    let code: String = row
        .try_get("code")
        .map_err(|e| DatabaseError::UnexpectedShape(e.to_string()))?;

    Ok(DequeuedRow {
        action: Action::parse(&action_raw),
        email,
        login,
        secret,
        code,
    })
}

/// Postgres channel identifiers can't be bound as query parameters for
/// `LISTEN`, so we validate the charset ourselves before interpolating it
/// into the statement text (spec §4.4: "properly escaped to avoid
/// injection").
fn validate_identifier(name: &str) -> DatabaseResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(DatabaseError::InvalidChannelName(name.to_string()))
    }
}
