// ── Sandbox: Interactive Terminal Sessions ─────────────────────────────────
// Long-lived TTY containers attached to a bidirectional stream. One pump
// task per session forwards container output (through the PTY stream
// processor) to the owning socket's event channel; input is written to the
// attached stdin verbatim, serialized by a per-session async mutex so bytes
// keep their arrival order.
//
// Cleanup is idempotent: the `cleaning` flag is the guard, the second entry
// is a no-op, and `terminal:exit` is emitted at most once per session.

use super::docker::DockerManager;
use super::languages::LanguageCatalog;
use super::stream::{PtyStreamConfig, PtyStreamProcessor};
use crate::atoms::constants::{
    TERMINAL_DEFAULT_LANGUAGE, TERMINAL_IDLE_THRESHOLD_MS, TERMINAL_REAP_INTERVAL_SECS,
};
use crate::atoms::error::{EngineError, EngineResult};
use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, RemoveContainerOptions,
    ResizeContainerTtyOptions, StartContainerOptions,
};
use bollard::models::HostConfig;
use futures::StreamExt;
use log::{info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

// ── Events ─────────────────────────────────────────────────────────────────

/// Server → client terminal events; the socket layer turns these into
/// `terminal:*` frames.
#[derive(Debug, Clone)]
pub enum TerminalEvent {
    Ready { session_id: String },
    Data { session_id: String, chunk: Vec<u8> },
    Exit { session_id: String, code: Option<i64>, reason: String },
    Error { session_id: String, message: String },
}

pub type TerminalEventSender = mpsc::UnboundedSender<TerminalEvent>;

// ── Session ────────────────────────────────────────────────────────────────

type ContainerStdin = Pin<Box<dyn tokio::io::AsyncWrite + Send>>;

pub struct TerminalSession {
    pub id: String,
    pub socket_id: String,
    pub project_id: String,
    pub user_id: String,
    /// Resolved language id (after the unsupported-language fallback).
    pub language: String,
    container_id: String,
    input: tokio::sync::Mutex<ContainerStdin>,
    events: TerminalEventSender,
    /// Epoch millis of the last input or output.
    last_activity: AtomicI64,
    cleaning: AtomicBool,
}

impl TerminalSession {
    fn touch(&self) {
        self.last_activity.store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn idle_for_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis() - self.last_activity.load(Ordering::Relaxed)
    }
}

// ── Manager ────────────────────────────────────────────────────────────────

pub struct TerminalManager {
    docker: Arc<DockerManager>,
    catalog: Arc<LanguageCatalog>,
    sessions: Mutex<HashMap<String, Arc<TerminalSession>>>,
}

impl TerminalManager {
    pub fn new(docker: Arc<DockerManager>, catalog: Arc<LanguageCatalog>) -> Arc<Self> {
        Arc::new(TerminalManager { docker, catalog, sessions: Mutex::new(HashMap::new()) })
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().len()
    }

    fn session(&self, session_id: &str) -> EngineResult<Arc<TerminalSession>> {
        let session = self
            .sessions
            .lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| EngineError::SessionNotActive(session_id.to_string()))?;
        if session.cleaning.load(Ordering::Acquire) {
            return Err(EngineError::SessionNotActive(session_id.to_string()));
        }
        Ok(session)
    }

    /// `terminal:start`: create a TTY container running the language REPL,
    /// attach to it, register the session, start the output pump, and emit
    /// `terminal:ready`.
    pub async fn start(
        self: &Arc<Self>,
        socket_id: &str,
        project_id: &str,
        user_id: &str,
        language: &str,
        events: TerminalEventSender,
    ) -> EngineResult<String> {
        // Unsupported languages fall back to the default; the session
        // records what it actually runs.
        let language = if self.catalog.is_supported(language) {
            language.to_string()
        } else {
            warn!(
                "[terminal] language '{}' unsupported, falling back to {}",
                language, TERMINAL_DEFAULT_LANGUAGE
            );
            TERMINAL_DEFAULT_LANGUAGE.to_string()
        };
        let config = self
            .catalog
            .get(&language)
            .ok_or_else(|| EngineError::Internal("default terminal language missing".into()))?;

        let docker = self.docker.acquire().await?;
        let session_id = uuid::Uuid::new_v4().to_string();
        let container_name = format!("term-{session_id}");

        let container_config = Config {
            image: Some(config.image.clone()),
            cmd: Some(vec!["sh".into(), "-c".into(), LanguageCatalog::repl_command(config).into()]),
            user: Some("nobody".into()),
            working_dir: Some("/tmp".into()),
            env: Some(vec![
                "HOME=/tmp".into(),
                "TERM=xterm-256color".into(),
                "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".into(),
            ]),
            tty: Some(true),
            open_stdin: Some(true),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(HostConfig {
                memory: Some(256 * 1024 * 1024),
                nano_cpus: Some((config.cpu_limit * 1_000_000_000.0) as i64),
                network_mode: Some("none".into()),
                cap_drop: Some(vec!["ALL".into()]),
                security_opt: Some(vec!["no-new-privileges:true".into()]),
                pids_limit: Some(64),
                tmpfs: Some(HashMap::from([
                    ("/tmp".to_string(), "rw,exec,nosuid,size=100m".to_string()),
                    ("/var/tmp".to_string(), "rw,noexec,nosuid,size=10m".to_string()),
                ])),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_opts = CreateContainerOptions { name: container_name.as_str(), platform: None };
        let container = docker.create_container(Some(create_opts), container_config).await?;
        let container_id = container.id;

        let attach = docker
            .attach_container(
                &container_id,
                Some(AttachContainerOptions::<String> {
                    stdin: Some(true),
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    logs: Some(false),
                    ..Default::default()
                }),
            )
            .await?;
        docker.start_container(&container_id, None::<StartContainerOptions<String>>).await?;

        let session = Arc::new(TerminalSession {
            id: session_id.clone(),
            socket_id: socket_id.to_string(),
            project_id: project_id.to_string(),
            user_id: user_id.to_string(),
            language: language.clone(),
            container_id: container_id.clone(),
            input: tokio::sync::Mutex::new(attach.input),
            events: events.clone(),
            last_activity: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
            cleaning: AtomicBool::new(false),
        });
        self.sessions.lock().insert(session_id.clone(), session.clone());

        // Output pump: container → processor → socket events. Stream end
        // (container exit or daemon drop) triggers cleanup.
        let manager = self.clone();
        let pump_session = session.clone();
        let mut output = attach.output;
        tokio::spawn(async move {
            let mut processor = PtyStreamProcessor::new(PtyStreamConfig::default());
            while let Some(frame) = output.next().await {
                match frame {
                    Ok(log_output) => {
                        pump_session.touch();
                        for chunk in processor.process(&log_output.into_bytes()) {
                            let _ = pump_session.events.send(TerminalEvent::Data {
                                session_id: pump_session.id.clone(),
                                chunk,
                            });
                        }
                    }
                    Err(e) => {
                        let _ = pump_session.events.send(TerminalEvent::Error {
                            session_id: pump_session.id.clone(),
                            message: e.to_string(),
                        });
                        break;
                    }
                }
            }
            if let Some(tail) = processor.flush() {
                let _ = pump_session
                    .events
                    .send(TerminalEvent::Data { session_id: pump_session.id.clone(), chunk: tail });
            }
            manager.cleanup(&pump_session.id, true, "stream closed").await;
        });

        info!("[terminal] session {} started ({} on {})", session_id, language, config.image);
        let _ = events.send(TerminalEvent::Ready { session_id: session_id.clone() });
        Ok(session_id)
    }

    /// `terminal:input`: write bytes verbatim — control bytes like 0x03
    /// (Ctrl-C) included — in arrival order.
    pub async fn write_input(&self, session_id: &str, bytes: &[u8]) -> EngineResult<()> {
        let session = self.session(session_id)?;
        session.touch();
        let mut input = session.input.lock().await;
        input.write_all(bytes).await?;
        input.flush().await?;
        Ok(())
    }

    /// `terminal:resize`: forward to the runtime; nonsensical dimensions are
    /// silently ignored.
    pub async fn resize(&self, session_id: &str, cols: f64, rows: f64) -> EngineResult<()> {
        if !cols.is_finite() || !rows.is_finite() || cols <= 0.0 || rows <= 0.0 {
            return Ok(());
        }
        let session = self.session(session_id)?;
        let docker = self.docker.acquire().await?;
        docker
            .resize_container_tty(
                &session.container_id,
                ResizeContainerTtyOptions { width: cols as u16, height: rows as u16 },
            )
            .await?;
        Ok(())
    }

    /// `terminal:stop`: explicit client-initiated teardown.
    pub async fn stop(&self, session_id: &str) -> EngineResult<()> {
        self.session(session_id)?;
        self.cleanup(session_id, true, "stopped by client").await;
        Ok(())
    }

    /// The socket's single session id, when it has exactly one (used for
    /// raw binary input frames that carry no session id).
    pub fn only_session_of(&self, socket_id: &str) -> Option<String> {
        let sessions = self.sessions.lock();
        let mut owned = sessions.values().filter(|s| s.socket_id == socket_id);
        let first = owned.next()?;
        if owned.next().is_some() {
            return None;
        }
        Some(first.id.clone())
    }

    /// Socket disconnect: tear down everything the socket owned, without
    /// exit events (nobody is listening anymore).
    pub async fn disconnect(&self, socket_id: &str) {
        let owned: Vec<String> = self
            .sessions
            .lock()
            .values()
            .filter(|s| s.socket_id == socket_id)
            .map(|s| s.id.clone())
            .collect();
        for session_id in owned {
            self.cleanup(&session_id, false, "socket disconnected").await;
        }
    }

    /// Idempotent teardown. The `cleaning` flag is the only guard: whoever
    /// flips it first removes the container and emits the single
    /// `terminal:exit`; later entries return immediately.
    pub async fn cleanup(&self, session_id: &str, emit_exit: bool, reason: &str) {
        let Some(session) = self.sessions.lock().get(session_id).cloned() else {
            return;
        };
        if session.cleaning.swap(true, Ordering::AcqRel) {
            return;
        }
        self.sessions.lock().remove(session_id);
        info!("[terminal] cleaning up session {} ({})", session_id, reason);

        let mut exit_code = None;
        if let Ok(docker) = self.docker.acquire().await {
            exit_code = docker
                .inspect_container(&session.container_id, None)
                .await
                .ok()
                .and_then(|c| c.state)
                .and_then(|s| s.exit_code);
            let opts = RemoveContainerOptions { force: true, ..Default::default() };
            if let Err(e) = docker.remove_container(&session.container_id, Some(opts)).await {
                warn!("[terminal] failed to remove container for {}: {}", session_id, e);
            }
        }

        if emit_exit {
            let _ = session.events.send(TerminalEvent::Exit {
                session_id: session_id.to_string(),
                code: exit_code,
                reason: reason.to_string(),
            });
        }
    }

    /// One reaper pass; sessions idle past the threshold are torn down.
    pub async fn reap_idle(&self) {
        let stale: Vec<String> = self
            .sessions
            .lock()
            .values()
            .filter(|s| s.idle_for_ms() > TERMINAL_IDLE_THRESHOLD_MS)
            .map(|s| s.id.clone())
            .collect();
        for session_id in stale {
            warn!("[terminal] reaping idle session {session_id}");
            self.cleanup(&session_id, true, "idle timeout").await;
        }
    }

    /// Process shutdown: remove every session's container so none leak.
    pub async fn shutdown(&self) {
        let all: Vec<String> = self.sessions.lock().keys().cloned().collect();
        for session_id in all {
            self.cleanup(&session_id, true, "server shutting down").await;
        }
    }

    /// Periodic idle scan, spawned from the composition root.
    pub fn start_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(std::time::Duration::from_secs(TERMINAL_REAP_INTERVAL_SECS));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                manager.reap_idle().await;
            }
        })
    }

    /// Test hook: register a session backed by a byte sink instead of a
    /// container so bookkeeping can be exercised without Docker.
    #[cfg(test)]
    pub(crate) fn insert_fake_session(
        &self,
        session_id: &str,
        socket_id: &str,
        events: TerminalEventSender,
        last_activity_ms: i64,
    ) {
        let session = Arc::new(TerminalSession {
            id: session_id.to_string(),
            socket_id: socket_id.to_string(),
            project_id: "p".into(),
            user_id: "u".into(),
            language: "python".into(),
            container_id: format!("fake-{session_id}"),
            input: tokio::sync::Mutex::new(Box::pin(tokio::io::sink())),
            events,
            last_activity: AtomicI64::new(last_activity_ms),
            cleaning: AtomicBool::new(false),
        });
        self.sessions.lock().insert(session_id.to_string(), session);
    }
}
