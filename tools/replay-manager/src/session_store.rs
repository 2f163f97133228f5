use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::SystemTime;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use crate::errors::ReplayError;
use crate::logging::append_run_log;
use crate::session_identity::compute_session_id;
use crate::timefmt::{from_unix_seconds, unix_seconds};

type StoreResult<T> = Result<T, ReplayError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub session_id: String,
    pub started_at: i64,
    pub stopped_at: Option<i64>,
    pub saved_replays: Vec<PathBuf>,
}

impl Session {
    pub fn start_time(&self) -> Option<SystemTime> {
        from_unix_seconds(self.started_at)
    }
}

#[derive(Debug)]
enum WriteCmd {
    Start {
        session_id: String,
        now: i64,
        reply: oneshot::Sender<StoreResult<Session>>,
    },
    Record {
        session_id: String,
        path: PathBuf,
        now: i64,
        reply: oneshot::Sender<StoreResult<usize>>,
    },
    Stop {
        now: i64,
        reply: oneshot::Sender<StoreResult<Option<Session>>>,
    },
}

pub struct SessionStore {
    write_tx: Option<mpsc::Sender<WriteCmd>>,
    read_conn: Mutex<Connection>,
    writer_join: Option<thread::JoinHandle<()>>,
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        // Closing the sender ends the writer loop; join to flush in-flight writes.
        drop(self.write_tx.take());
        if let Some(handle) = self.writer_join.take() {
            let _ = handle.join();
        }
    }
}

impl SessionStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ReplayError::Database(e.to_string()))?;
        }

        if path.exists() {
            let meta =
                std::fs::metadata(&path).map_err(|e| ReplayError::Database(e.to_string()))?;
            if meta.len() == 0 {
                return Err(ReplayError::Database(format!(
                    "session database is 0 bytes (corrupt): {}",
                    path.display()
                )));
            }
        }

        let mut write_conn = Connection::open(&path).map_err(db_err)?;
        configure_write_connection(&write_conn)?;
        run_migrations(&mut write_conn)?;

        let (write_tx, mut write_rx) = mpsc::channel(32);
        let writer_join = thread::spawn(move || {
            while let Some(cmd) = write_rx.blocking_recv() {
                match cmd {
                    WriteCmd::Start {
                        session_id,
                        now,
                        reply,
                    } => {
                        let _ = reply.send(start_session(&mut write_conn, &session_id, now));
                    }
                    WriteCmd::Record {
                        session_id,
                        path,
                        now,
                        reply,
                    } => {
                        let _ = reply.send(record_replay(&mut write_conn, &session_id, &path, now));
                    }
                    WriteCmd::Stop { now, reply } => {
                        let _ = reply.send(stop_session(&mut write_conn, now));
                    }
                }
            }
        });

        let read_conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(db_err)?;
        read_conn
            .busy_timeout(std::time::Duration::from_secs(3))
            .map_err(db_err)?;

        append_run_log(
            "info",
            "session_store.opened",
            json!({ "path": path.display().to_string() }),
        );

        Ok(Self {
            write_tx: Some(write_tx),
            read_conn: Mutex::new(read_conn),
            writer_join: Some(writer_join),
        })
    }

    pub fn start_session(&self, now: SystemTime) -> StoreResult<Session> {
        let session_id = compute_session_id(now, std::process::id());
        let result = self.send(|reply| WriteCmd::Start {
            session_id,
            now: unix_seconds(now),
            reply,
        });
        if let Ok(session) = &result {
            append_run_log(
                "info",
                "session.started",
                json!({
                    "session_id": session.session_id,
                    "started_at": session.started_at,
                }),
            );
        }
        result
    }

    pub fn record_replay(
        &self,
        session_id: &str,
        path: &Path,
        now: SystemTime,
    ) -> StoreResult<usize> {
        let result = self.send(|reply| WriteCmd::Record {
            session_id: session_id.to_string(),
            path: path.to_path_buf(),
            now: unix_seconds(now),
            reply,
        });
        match &result {
            Ok(count) => append_run_log(
                "info",
                "session.replay_recorded",
                json!({
                    "session_id": session_id,
                    "path": path.display().to_string(),
                    "count": count,
                }),
            ),
            Err(e) => append_run_log(
                "error",
                "session.replay_record_failed",
                json!({ "session_id": session_id, "error": e.to_string() }),
            ),
        }
        result
    }

    pub fn stop_session(&self, now: SystemTime) -> StoreResult<Option<Session>> {
        let result = self.send(|reply| WriteCmd::Stop {
            now: unix_seconds(now),
            reply,
        });
        if let Ok(stopped) = &result {
            append_run_log(
                "info",
                "session.stopped",
                json!({
                    "session_id": stopped.as_ref().map(|s| s.session_id.clone()),
                    "replays": stopped.as_ref().map(|s| s.saved_replays.len()).unwrap_or(0),
                }),
            );
        }
        result
    }

    pub fn current_session(&self) -> StoreResult<Option<Session>> {
        let conn = self
            .read_conn
            .lock()
            .map_err(|_| ReplayError::Database("read connection lock poisoned".to_string()))?;
        fetch_open_session(&conn)
    }

    fn send<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<StoreResult<T>>) -> WriteCmd,
    ) -> StoreResult<T> {
        let sender = self
            .write_tx
            .as_ref()
            .ok_or_else(|| ReplayError::Database("store is closed".to_string()))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .blocking_send(build(reply_tx))
            .map_err(|e| ReplayError::Database(e.to_string()))?;
        reply_rx
            .blocking_recv()
            .map_err(|e| ReplayError::Database(e.to_string()))?
    }
}

fn configure_write_connection(conn: &Connection) -> StoreResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(db_err)?;
    conn.pragma_update(None, "synchronous", "FULL")
        .map_err(db_err)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(db_err)?;
    Ok(())
}

fn run_migrations(conn: &mut Connection) -> StoreResult<()> {
    let migrations = [(1_i64, include_str!("../migrations/0001_sessions.sql"))];

    conn.execute_batch("BEGIN IMMEDIATE; CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY, applied_at INTEGER NOT NULL); COMMIT;")
        .map_err(db_err)?;

    for (version, sql) in migrations {
        let exists = conn
            .query_row(
                "SELECT 1 FROM schema_migrations WHERE version = ?1 LIMIT 1",
                [version],
                |_| Ok(()),
            )
            .optional()
            .map_err(db_err)?
            .is_some();
        if exists {
            continue;
        }

        let tx = conn.transaction().map_err(db_err)?;
        tx.execute_batch(sql).map_err(db_err)?;
        tx.execute(
            "INSERT INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![version, unix_seconds(SystemTime::now())],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        append_run_log(
            "info",
            "session_store.migration.applied",
            json!({ "version": version }),
        );
    }

    Ok(())
}

fn start_session(conn: &mut Connection, session_id: &str, now: i64) -> StoreResult<Session> {
    let tx = conn.transaction().map_err(db_err)?;
    tx.execute(
        "UPDATE sessions SET stopped_at = ?1 WHERE stopped_at IS NULL",
        params![now],
    )
    .map_err(db_err)?;
    tx.execute(
        "INSERT INTO sessions (session_id, started_at, stopped_at) VALUES (?1, ?2, NULL)",
        params![session_id, now],
    )
    .map_err(db_err)?;
    tx.commit().map_err(db_err)?;
    Ok(Session {
        session_id: session_id.to_string(),
        started_at: now,
        stopped_at: None,
        saved_replays: Vec::new(),
    })
}

fn record_replay(
    conn: &mut Connection,
    session_id: &str,
    path: &Path,
    now: i64,
) -> StoreResult<usize> {
    let tx = conn.transaction().map_err(db_err)?;
    let known = tx
        .query_row(
            "SELECT 1 FROM sessions WHERE session_id = ?1",
            [session_id],
            |_| Ok(()),
        )
        .optional()
        .map_err(db_err)?
        .is_some();
    if !known {
        return Err(ReplayError::Database(format!(
            "unknown session {session_id}"
        )));
    }
    let next_seq: i64 = tx
        .query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM saved_replays WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )
        .map_err(db_err)?;
    tx.execute(
        "INSERT INTO saved_replays (session_id, seq, path, saved_at) VALUES (?1, ?2, ?3, ?4)",
        params![session_id, next_seq, path.to_string_lossy(), now],
    )
    .map_err(db_err)?;
    tx.commit().map_err(db_err)?;
    Ok(next_seq as usize)
}

fn stop_session(conn: &mut Connection, now: i64) -> StoreResult<Option<Session>> {
    let Some(mut session) = fetch_open_session(conn)? else {
        return Ok(None);
    };
    conn.execute(
        "UPDATE sessions SET stopped_at = ?1 WHERE session_id = ?2",
        params![now, session.session_id],
    )
    .map_err(db_err)?;
    session.stopped_at = Some(now);
    Ok(Some(session))
}

fn fetch_open_session(conn: &Connection) -> StoreResult<Option<Session>> {
    let row = conn
        .query_row(
            "SELECT session_id, started_at FROM sessions
             WHERE stopped_at IS NULL
             ORDER BY started_at DESC, rowid DESC LIMIT 1",
            [],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((session_id, started_at)) = row else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare("SELECT path FROM saved_replays WHERE session_id = ?1 ORDER BY seq ASC")
        .map_err(db_err)?;
    let saved_replays = stmt
        .query_map([&session_id], |row| row.get::<_, String>(0))
        .map_err(db_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_err)?
        .into_iter()
        .map(PathBuf::from)
        .collect();

    Ok(Some(Session {
        session_id,
        started_at,
        stopped_at: None,
        saved_replays,
    }))
}

fn db_err(error: rusqlite::Error) -> ReplayError {
    ReplayError::Database(error.to_string())
}
