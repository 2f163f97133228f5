use crate::errors::ReplayError;
use crate::logging::append_run_log;
use crate::remux::{ReplaceOriginal, TranscodeJob};
use crate::runtime::{FileSystem, ProcessRunner};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::thread;

const STDERR_TAIL_BYTES: usize = 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub label: String,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct DispatchHandle {
    label: String,
    join: thread::JoinHandle<DispatchSummary>,
}

impl DispatchHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn wait(self) -> Result<DispatchSummary, ReplayError> {
        let label = self.label;
        self.join
            .join()
            .map_err(|_| ReplayError::Process(format!("transcode thread {label} panicked")))
    }
}

#[derive(Clone)]
pub struct TranscodeDispatcher {
    runner: Arc<dyn ProcessRunner>,
    fs: Arc<dyn FileSystem>,
}

impl TranscodeDispatcher {
    pub fn new(runner: Arc<dyn ProcessRunner>, fs: Arc<dyn FileSystem>) -> Self {
        Self { runner, fs }
    }

    /// Run `jobs` one after another on a new thread. Transcoder failures are
    /// logged and counted; they never reach the caller as errors.
    pub fn dispatch(&self, label: &str, jobs: Vec<TranscodeJob>) -> DispatchHandle {
        append_run_log(
            "info",
            "transcode.dispatch.started",
            json!({ "label": label, "jobs": jobs.len() }),
        );
        let runner = Arc::clone(&self.runner);
        let fs = Arc::clone(&self.fs);
        let thread_label = label.to_string();
        let join = thread::spawn(move || {
            let mut summary = DispatchSummary {
                label: thread_label,
                ..DispatchSummary::default()
            };
            for job in jobs {
                if run_job(runner.as_ref(), fs.as_ref(), &job) {
                    summary.succeeded += 1;
                } else {
                    summary.failed += 1;
                }
            }
            append_run_log(
                "info",
                "transcode.dispatch.finished",
                json!({
                    "label": summary.label,
                    "succeeded": summary.succeeded,
                    "failed": summary.failed,
                }),
            );
            summary
        });
        DispatchHandle {
            label: label.to_string(),
            join,
        }
    }
}

fn run_job(runner: &dyn ProcessRunner, fs: &dyn FileSystem, job: &TranscodeJob) -> bool {
    let ok = match runner.run(job.request.clone()) {
        Err(err) => {
            append_run_log(
                "error",
                "transcode.job.failed",
                json!({ "label": job.label, "error": err.to_string() }),
            );
            false
        }
        Ok(out) if out.exit_code != 0 => {
            append_run_log(
                "error",
                "transcode.job.failed",
                json!({
                    "label": job.label,
                    "exit_code": out.exit_code,
                    "stderr_tail": stderr_tail(&out.stderr),
                }),
            );
            if let Some(finalize) = &job.finalize {
                if fs.exists(&finalize.temp) {
                    let _ = fs.remove_file(&finalize.temp);
                }
            }
            false
        }
        Ok(_) => match &job.finalize {
            Some(finalize) => match replace_original(fs, finalize) {
                Ok(()) => true,
                Err(err) => {
                    append_run_log(
                        "error",
                        "transcode.job.finalize_failed",
                        json!({ "label": job.label, "error": err.to_string() }),
                    );
                    false
                }
            },
            None => true,
        },
    };

    if ok {
        let output = job
            .finalize
            .as_ref()
            .map(|f| f.target.as_path())
            .unwrap_or(job.output.as_path());
        append_run_log(
            "info",
            "transcode.job.succeeded",
            json!({ "label": job.label, "output": output.display().to_string() }),
        );
    }
    if let Some(scratch) = &job.cleanup {
        if fs.exists(scratch) {
            let _ = fs.remove_file(scratch);
        }
    }
    ok
}

fn replace_original(fs: &dyn FileSystem, finalize: &ReplaceOriginal) -> Result<(), ReplayError> {
    if fs.exists(&finalize.original) {
        fs.remove_file(&finalize.original)?;
    }
    fs.rename(&finalize.temp, &finalize.target)
}

fn stderr_tail(stderr: &str) -> String {
    if stderr.len() <= STDERR_TAIL_BYTES {
        return stderr.to_string();
    }
    let mut start = stderr.len() - STDERR_TAIL_BYTES;
    while !stderr.is_char_boundary(start) {
        start += 1;
    }
    stderr[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::{stderr_tail, TranscodeDispatcher};
    use crate::errors::ReplayError;
    use crate::remux::{ReplaceOriginal, TranscodeJob};
    use crate::runtime::{FakeFileSystem, FakeProcessRunner, FileSystem, ProcessOutput, ProcessRequest};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    fn job(name: &str) -> TranscodeJob {
        TranscodeJob {
            label: name.to_string(),
            request: ProcessRequest {
                program: "ffmpeg".to_string(),
                args: vec![name.to_string()],
            },
            output: PathBuf::from(format!("/r/{name}_remux.mp4")),
            finalize: None,
            cleanup: None,
        }
    }

    fn failure(code: i32) -> Result<ProcessOutput, ReplayError> {
        Ok(ProcessOutput {
            exit_code: code,
            stdout: String::new(),
            stderr: "Invalid data found when processing input".to_string(),
        })
    }

    #[test]
    fn jobs_run_in_order_and_failures_are_counted() {
        let runner = FakeProcessRunner::default();
        runner.push_success("");
        runner.push_response(failure(1));
        runner.push_response(Err(ReplayError::Process("ffmpeg: not found".to_string())));
        let dispatcher = TranscodeDispatcher::new(
            Arc::new(runner.clone()),
            Arc::new(FakeFileSystem::default()),
        );

        let summary = dispatcher
            .dispatch("batch", vec![job("a"), job("b"), job("c")])
            .wait()
            .expect("join");
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 2);
        let args = runner
            .spawned()
            .into_iter()
            .map(|req| req.args[0].clone())
            .collect::<Vec<_>>();
        assert_eq!(args, vec!["a", "b", "c"]);
    }

    #[test]
    fn successful_replace_swaps_temp_for_original() {
        let runner = FakeProcessRunner::default();
        runner.push_success("");
        let fs = FakeFileSystem::with_file("/r/clip.mkv", "original");
        fs.write_string(Path::new("/r/clip.remux-tmp.mp4"), "remuxed")
            .expect("seed");
        let mut replace = job("clip");
        replace.finalize = Some(ReplaceOriginal {
            temp: PathBuf::from("/r/clip.remux-tmp.mp4"),
            original: PathBuf::from("/r/clip.mkv"),
            target: PathBuf::from("/r/clip.mp4"),
        });

        let dispatcher = TranscodeDispatcher::new(Arc::new(runner), Arc::new(fs.clone()));
        let summary = dispatcher.dispatch("one", vec![replace]).wait().expect("join");
        assert_eq!(summary.succeeded, 1);
        assert_eq!(fs.file_paths(), vec![PathBuf::from("/r/clip.mp4")]);
        assert_eq!(
            fs.read_to_string(Path::new("/r/clip.mp4")).expect("read"),
            "remuxed"
        );
    }

    #[test]
    fn failed_replace_keeps_original_and_drops_temp() {
        let runner = FakeProcessRunner::default();
        runner.push_response(failure(183));
        let fs = FakeFileSystem::with_file("/r/clip.mkv", "original");
        fs.write_string(Path::new("/r/clip.remux-tmp.mp4"), "partial")
            .expect("seed");
        let mut replace = job("clip");
        replace.finalize = Some(ReplaceOriginal {
            temp: PathBuf::from("/r/clip.remux-tmp.mp4"),
            original: PathBuf::from("/r/clip.mkv"),
            target: PathBuf::from("/r/clip.mp4"),
        });

        let dispatcher = TranscodeDispatcher::new(Arc::new(runner), Arc::new(fs.clone()));
        let summary = dispatcher.dispatch("one", vec![replace]).wait().expect("join");
        assert_eq!(summary.failed, 1);
        assert_eq!(fs.file_paths(), vec![PathBuf::from("/r/clip.mkv")]);
    }

    #[test]
    fn cleanup_file_is_removed_after_the_job() {
        let runner = FakeProcessRunner::default();
        runner.push_response(failure(1));
        let fs = FakeFileSystem::with_file("/state/concat-abc.txt", "file '/r/a.mp4'\n");
        let mut concat = job("concat");
        concat.cleanup = Some(PathBuf::from("/state/concat-abc.txt"));

        let dispatcher = TranscodeDispatcher::new(Arc::new(runner), Arc::new(fs.clone()));
        dispatcher.dispatch("concat", vec![concat]).wait().expect("join");
        assert!(fs.file_paths().is_empty());
    }

    #[test]
    fn stderr_tail_keeps_char_boundaries() {
        let long = "é".repeat(2000);
        let tail = stderr_tail(&long);
        assert!(tail.len() <= 1024);
        assert!(tail.chars().all(|c| c == 'é'));
    }
}
