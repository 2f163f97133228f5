use crate::config::AppConfig;
use crate::errors::ReplayError;
use crate::events::HostEvent;
use crate::logging::append_run_log;
use crate::placement::{PlacementContext, PlacementPolicy};
use crate::remux::{batch_inputs, build_concat_job, build_remux_job, concat_list_path, TranscodeJob};
use crate::runtime::{Clock, FileSystem, ProcessRunner, ProductionRuntime};
use crate::session_store::{Session, SessionStore};
use crate::timefmt::local_naive;
use crate::transcode_pool::{DispatchHandle, TranscodeDispatcher};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Default)]
pub struct EventOutcome {
    pub session_id: Option<String>,
    pub placed: Option<PathBuf>,
    pub persistent: Option<PathBuf>,
    pub dispatch: Option<DispatchHandle>,
}

pub enum RemuxTarget<'p> {
    File(&'p Path),
    Batch(&'p Path),
}

pub struct ReplayManager {
    cfg: AppConfig,
    clock: Arc<dyn Clock>,
    fs: Arc<dyn FileSystem>,
    runner: Arc<dyn ProcessRunner>,
    store: SessionStore,
    dispatcher: TranscodeDispatcher,
    last_scene: Option<String>,
}

impl ReplayManager {
    pub fn new(cfg: AppConfig, runtime: &ProductionRuntime, store: SessionStore) -> Self {
        let dispatcher = TranscodeDispatcher::new(
            Arc::clone(&runtime.process_runner),
            Arc::clone(&runtime.file_system),
        );
        Self {
            cfg,
            clock: Arc::clone(&runtime.clock),
            fs: Arc::clone(&runtime.file_system),
            runner: Arc::clone(&runtime.process_runner),
            store,
            dispatcher,
            last_scene: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.cfg
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn handle(&mut self, event: HostEvent) -> Result<EventOutcome, ReplayError> {
        append_run_log(
            "debug",
            "manager.event.received",
            json!({ "event": event.name() }),
        );
        match event {
            HostEvent::BufferStarted => {
                let session = self.store.start_session(self.clock.now())?;
                Ok(EventOutcome {
                    session_id: Some(session.session_id),
                    ..EventOutcome::default()
                })
            }
            HostEvent::BufferSaved { path, scene } => {
                let path = path.ok_or_else(|| {
                    ReplayError::Host("replay buffer saved event carried no file path".to_string())
                })?;
                if scene.is_some() {
                    self.last_scene = scene;
                }
                self.on_saved(&path)
            }
            HostEvent::BufferStopped => self.on_stopped(),
            HostEvent::SceneChanged { scene } => {
                self.last_scene = Some(scene);
                Ok(EventOutcome::default())
            }
            HostEvent::Unknown { raw_type } => {
                append_run_log(
                    "debug",
                    "manager.event.ignored",
                    json!({ "raw_type": raw_type }),
                );
                Ok(EventOutcome::default())
            }
        }
    }

    pub fn place_file(
        &self,
        source: &Path,
        scene: Option<&str>,
        dry_run: bool,
    ) -> Result<PathBuf, ReplayError> {
        let policy = self.policy();
        let ctx = PlacementContext {
            scene,
            session_start: None,
            now: local_naive(self.clock.now()),
        };
        if dry_run {
            return Ok(policy.plan(source, &ctx)?.destination);
        }
        let placement = policy.place(source, &ctx)?;
        policy.copy_to_persistent(&placement.destination)?;
        Ok(placement.destination)
    }

    pub fn manual_remux(&self, target: RemuxTarget<'_>) -> Result<DispatchHandle, ReplayError> {
        let (label, inputs) = match target {
            RemuxTarget::File(file) => {
                if !self.fs.exists(file) {
                    return Err(ReplayError::Io(format!(
                        "remux input does not exist: {}",
                        file.display()
                    )));
                }
                ("manual_remux".to_string(), vec![file.to_path_buf()])
            }
            RemuxTarget::Batch(dir) => ("batch_remux".to_string(), batch_inputs(self.fs.as_ref(), dir)?),
        };
        let jobs = inputs
            .iter()
            .map(|input| build_remux_job(input, &self.cfg.remux))
            .collect::<Result<Vec<_>, _>>()?;
        append_run_log(
            "info",
            "manager.manual_remux",
            json!({ "label": label, "inputs": inputs.len() }),
        );
        Ok(self.dispatcher.dispatch(&label, jobs))
    }

    fn on_saved(&mut self, source: &Path) -> Result<EventOutcome, ReplayError> {
        let now = self.clock.now();
        let session = match self.store.current_session()? {
            Some(session) => session,
            None => {
                append_run_log(
                    "warn",
                    "manager.session.implicit_start",
                    json!({ "source": source.display().to_string() }),
                );
                self.store.start_session(now)?
            }
        };

        let policy = self.policy();
        let ctx = PlacementContext {
            scene: self.last_scene.as_deref(),
            session_start: session.start_time().map(local_naive),
            now: local_naive(now),
        };
        let placement = policy.place(source, &ctx)?;
        self.store
            .record_replay(&session.session_id, &placement.destination, now)?;
        let persistent = policy.copy_to_persistent(&placement.destination)?;

        let dispatch = if self.cfg.remux.enabled && !self.cfg.remux.on_buffer_stop {
            let job = build_remux_job(&placement.destination, &self.cfg.remux)?;
            Some(self.dispatcher.dispatch("remux", vec![job]))
        } else {
            None
        };

        Ok(EventOutcome {
            session_id: Some(session.session_id),
            placed: Some(placement.destination),
            persistent,
            dispatch,
        })
    }

    fn on_stopped(&mut self) -> Result<EventOutcome, ReplayError> {
        let now = self.clock.now();
        let Some(session) = self.store.stop_session(now)? else {
            append_run_log("warn", "manager.session.stop_without_start", json!({}));
            return Ok(EventOutcome::default());
        };

        let mut jobs = Vec::new();
        if self.cfg.concat.enabled {
            if let Some(job) = self.concat_job(&session, now)? {
                jobs.push(job);
            }
        }
        if self.cfg.remux.enabled && self.cfg.remux.on_buffer_stop {
            for replay in &session.saved_replays {
                if !self.fs.exists(replay) {
                    append_run_log(
                        "warn",
                        "manager.remux.missing_replay",
                        json!({ "path": replay.display().to_string() }),
                    );
                    continue;
                }
                jobs.push(build_remux_job(replay, &self.cfg.remux)?);
            }
        }

        let dispatch = if jobs.is_empty() {
            None
        } else {
            Some(
                self.dispatcher
                    .dispatch(&format!("session:{}", session.session_id), jobs),
            )
        };
        Ok(EventOutcome {
            session_id: Some(session.session_id),
            dispatch,
            ..EventOutcome::default()
        })
    }

    fn concat_job(
        &self,
        session: &Session,
        now: std::time::SystemTime,
    ) -> Result<Option<TranscodeJob>, ReplayError> {
        let Some(first) = session.saved_replays.first() else {
            append_run_log(
                "info",
                "manager.concat.skipped",
                json!({ "session_id": session.session_id, "reason": "no replays" }),
            );
            return Ok(None);
        };
        let ctx = PlacementContext {
            scene: self.last_scene.as_deref(),
            session_start: session.start_time().map(local_naive),
            now: local_naive(now),
        };
        let output = self.policy().plan(first, &ctx)?.destination;
        let list = concat_list_path(&self.cfg.state_dir(), &session.session_id);
        let job = build_concat_job(
            self.fs.as_ref(),
            &list,
            &session.saved_replays,
            &output,
            &self.cfg.remux.ffmpeg_path,
        )?;
        Ok(Some(job))
    }

    fn policy(&self) -> PlacementPolicy<'_> {
        PlacementPolicy::new(&self.cfg, self.fs.as_ref(), self.runner.as_ref())
    }
}
