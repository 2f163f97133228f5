use crate::errors::ReplayError;
use crate::logging::append_run_log;
use crate::runtime::{ProcessRequest, ProcessRunner};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExeEntry {
    pub exe: String,
    pub display_name: String,
    pub prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessTable {
    entries: BTreeMap<String, ExeEntry>,
}

impl ProcessTable {
    pub fn parse(text: &str) -> Result<Self, ReplayError> {
        let mut entries = BTreeMap::new();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields = line.split(',').map(str::trim).collect::<Vec<_>>();
            if fields.len() != 3 {
                return Err(ReplayError::ProcessTable(format!(
                    "line {}: expected 3 comma-separated fields, got {}: {line:?}",
                    idx + 1,
                    fields.len()
                )));
            }
            if fields[0].is_empty() {
                return Err(ReplayError::ProcessTable(format!(
                    "line {}: executable name is empty",
                    idx + 1
                )));
            }
            entries.insert(
                fields[0].to_string(),
                ExeEntry {
                    exe: fields[0].to_string(),
                    display_name: fields[1].to_string(),
                    prefix: fields[2].to_string(),
                },
            );
        }
        Ok(Self { entries })
    }

    pub fn get(&self, exe: &str) -> Option<&ExeEntry> {
        self.entries.get(exe)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub name: String,
    pub memory_kib: u64,
}

pub fn foremost_known<'t>(
    table: &'t ProcessTable,
    processes: &[ProcessInfo],
) -> Option<&'t ExeEntry> {
    let mut sorted = processes.iter().collect::<Vec<_>>();
    sorted.sort_by(|a, b| b.memory_kib.cmp(&a.memory_kib));
    sorted.into_iter().find_map(|proc| table.get(&proc.name))
}

pub struct ProcessLister<'a> {
    runner: &'a dyn ProcessRunner,
}

impl<'a> ProcessLister<'a> {
    pub fn new(runner: &'a dyn ProcessRunner) -> Self {
        Self { runner }
    }

    pub fn list(&self) -> Result<Vec<ProcessInfo>, ReplayError> {
        let request = listing_request();
        let program = request.program.clone();
        let out = self.runner.run(request)?;
        if out.exit_code != 0 {
            append_run_log(
                "error",
                "process_table.list.failed",
                json!({
                    "program": program,
                    "exit_code": out.exit_code,
                    "stderr": out.stderr
                }),
            );
            return Err(ReplayError::Process(format!(
                "{program} failed with exit code {}: {}",
                out.exit_code,
                out.stderr.trim()
            )));
        }
        let processes = if cfg!(windows) {
            parse_tasklist_output(&out.stdout)
        } else {
            parse_ps_output(&out.stdout)
        };
        append_run_log(
            "debug",
            "process_table.listed",
            json!({ "count": processes.len() }),
        );
        Ok(processes)
    }

    pub fn find_foremost<'t>(
        &self,
        table: &'t ProcessTable,
    ) -> Result<Option<&'t ExeEntry>, ReplayError> {
        if table.is_empty() {
            return Ok(None);
        }
        let processes = self.list()?;
        let found = foremost_known(table, &processes);
        append_run_log(
            "info",
            "process_table.foremost",
            json!({ "exe": found.map(|entry| entry.exe.clone()) }),
        );
        Ok(found)
    }
}

fn listing_request() -> ProcessRequest {
    if cfg!(windows) {
        ProcessRequest {
            program: "tasklist".to_string(),
            args: vec!["/fo".to_string(), "csv".to_string(), "/nh".to_string()],
        }
    } else {
        ProcessRequest {
            program: "ps".to_string(),
            args: vec!["-axo".to_string(), "rss=,comm=".to_string()],
        }
    }
}

pub fn parse_ps_output(stdout: &str) -> Vec<ProcessInfo> {
    stdout
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (rss, comm) = line.split_once(char::is_whitespace)?;
            let memory_kib = rss.parse::<u64>().ok()?;
            let comm = comm.trim();
            let name = Path::new(comm)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| comm.to_string());
            if name.is_empty() {
                return None;
            }
            Some(ProcessInfo { name, memory_kib })
        })
        .collect()
}

/// Parse `tasklist /fo csv /nh` rows: `"name","pid","session","#","12,345 K"`.
pub fn parse_tasklist_output(stdout: &str) -> Vec<ProcessInfo> {
    stdout
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let inner = line.strip_prefix('"')?.strip_suffix('"')?;
            let fields = inner.split("\",\"").collect::<Vec<_>>();
            if fields.len() < 5 {
                return None;
            }
            let digits = fields[4]
                .chars()
                .filter(char::is_ascii_digit)
                .collect::<String>();
            let memory_kib = digits.parse::<u64>().ok()?;
            Some(ProcessInfo {
                name: fields[0].to_string(),
                memory_kib,
            })
        })
        .collect()
}
