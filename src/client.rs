use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::ToolNames;
use crate::domain::QueryKey;
use crate::error::EnrichError;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// External lookups issued by the stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryKind {
    GeneRecords,
    ProteinRecords,
    ProteinFasta,
    Biosystems,
    PathwaySummaries,
    PubmedArticles,
    GeneOntology,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryKind::GeneRecords => "gene records",
            QueryKind::ProteinRecords => "protein records",
            QueryKind::ProteinFasta => "protein FASTA",
            QueryKind::Biosystems => "biosystems",
            QueryKind::PathwaySummaries => "pathway summaries",
            QueryKind::PubmedArticles => "PubMed articles",
            QueryKind::GeneOntology => "GO annotations",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStep {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandStep {
    fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }
}

/// One external invocation: a pipeline of E-utilities bound to a key.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub key: QueryKey,
    pub kind: QueryKind,
    pub steps: Vec<CommandStep>,
}

impl QueryRequest {
    /// Shell-like rendering for logs.
    pub fn command_line(&self) -> String {
        self.steps
            .iter()
            .map(|step| {
                let mut parts = vec![step.program.clone()];
                parts.extend(step.args.iter().map(|arg| {
                    if arg.contains(' ') {
                        format!("'{arg}'")
                    } else {
                        arg.clone()
                    }
                }));
                parts.join(" ")
            })
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// Bytes returned by one successful invocation. Never mutated after receipt.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub key: QueryKey,
    pub kind: QueryKind,
    pub body: Vec<u8>,
    /// Standard error of every step, kept for diagnostics.
    pub diagnostics: String,
}

/// Single-attempt external lookup.
pub trait QueryClient: Send + Sync {
    fn execute(&self, request: &QueryRequest) -> Result<RawResponse, EnrichError>;
}

/// Builds the E-utilities pipelines for each [`QueryKind`].
#[derive(Debug, Clone)]
pub struct QueryTemplates {
    tools: ToolNames,
    organism: String,
}

impl QueryTemplates {
    pub fn new(tools: ToolNames, organism: impl Into<String>) -> Self {
        Self {
            tools,
            organism: organism.into(),
        }
    }

    /// Pipeline for `kind` on behalf of `key`. [`QueryKind::ProteinFasta`]
    /// treats the key itself as the protein id; see [`Self::fasta_request`].
    pub fn request(&self, kind: QueryKind, key: &QueryKey) -> QueryRequest {
        let t = &self.tools;
        let gene_query = format!("{key}[Gene Name] AND \"{}\"[Organism]", self.organism);
        let steps = match kind {
            QueryKind::GeneRecords => vec![
                CommandStep::new(&t.esearch, &["-db", "gene", "-query", &gene_query]),
                CommandStep::new(&t.efetch, &["-format", "xml"]),
            ],
            QueryKind::ProteinRecords => {
                let query = format!("{gene_query} AND refseq[Filter]");
                vec![
                    CommandStep::new(&t.esearch, &["-db", "protein", "-query", &query]),
                    CommandStep::new(&t.efetch, &["-format", "xml"]),
                ]
            }
            QueryKind::ProteinFasta => {
                return self.fasta_request(key, key.as_str());
            }
            QueryKind::Biosystems => vec![
                CommandStep::new(&t.esearch, &["-db", "biosystems", "-query", &gene_query]),
                CommandStep::new(&t.elink, &["-target", "gene"]),
                CommandStep::new(&t.efetch, &["-format", "xml"]),
            ],
            QueryKind::PathwaySummaries => vec![
                CommandStep::new(&t.esearch, &["-db", "gene", "-query", &gene_query]),
                CommandStep::new(&t.elink, &["-target", "pathway"]),
                CommandStep::new(&t.esummary, &["-format", "xml"]),
            ],
            QueryKind::PubmedArticles => {
                let query = format!(
                    "{key}[Gene Name] AND function AND (\"{}\"[Organism] OR human)",
                    self.organism
                );
                vec![
                    CommandStep::new(&t.esearch, &["-db", "pubmed", "-query", &query]),
                    CommandStep::new(&t.efetch, &["-format", "xml"]),
                ]
            }
            QueryKind::GeneOntology => vec![
                CommandStep::new(&t.esearch, &["-db", "gene", "-query", &gene_query]),
                CommandStep::new(&t.elink, &["-target", "geneontology"]),
                CommandStep::new(&t.efetch, &["-format", "xml"]),
            ],
        };
        QueryRequest {
            key: key.clone(),
            kind,
            steps,
        }
    }

    /// FASTA lookup of one protein by gi or accession, on behalf of `key`.
    pub fn fasta_request(&self, key: &QueryKey, id: &str) -> QueryRequest {
        QueryRequest {
            key: key.clone(),
            kind: QueryKind::ProteinFasta,
            steps: vec![CommandStep::new(
                &self.tools.efetch,
                &["-db", "protein", "-id", id, "-format", "fasta"],
            )],
        }
    }
}

/// Runs E-utilities as local processes.
#[derive(Debug, Clone)]
pub struct EutilsClient {
    programs: HashMap<String, PathBuf>,
    timeout: Option<Duration>,
}

impl EutilsClient {
    /// Resolves every configured tool on `PATH`; a missing tool is a
    /// precondition failure.
    pub fn new(tools: &ToolNames, timeout: Option<Duration>) -> Result<Self, EnrichError> {
        let mut programs = HashMap::new();
        for name in tools.all() {
            let path = resolve_program(name).ok_or_else(|| EnrichError::MissingTool(name.to_string()))?;
            programs.insert(name.to_string(), path);
        }
        Ok(Self { programs, timeout })
    }

    fn program_path(&self, name: &str) -> PathBuf {
        self.programs
            .get(name)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(name))
    }

    fn run_pipeline(&self, steps: &[CommandStep]) -> Result<(Vec<u8>, String), EnrichError> {
        let deadline = self.timeout.map(Deadline::after);
        let mut running = RunningPipeline::default();
        let mut upstream: Option<ChildStdout> = None;

        for step in steps {
            let stdin = match upstream.take() {
                Some(stdout) => Stdio::from(stdout),
                None => Stdio::null(),
            };
            let mut command = Command::new(self.program_path(&step.program));
            command
                .args(&step.args)
                .stdin(stdin)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            running.join_group(&mut command);
            let mut child = command.spawn().map_err(|err| EnrichError::Spawn {
                program: step.program.clone(),
                message: err.to_string(),
            })?;
            let stderr = child.stderr.take().map(drain);
            upstream = child.stdout.take();
            running.push(step.program.clone(), child, stderr);
        }

        running.stdout = upstream.map(drain);
        running.wait(deadline)?;
        running.finish(deadline)
    }
}

impl QueryClient for EutilsClient {
    fn execute(&self, request: &QueryRequest) -> Result<RawResponse, EnrichError> {
        let (body, diagnostics) = self.run_pipeline(&request.steps)?;
        Ok(RawResponse {
            key: request.key.clone(),
            kind: request.kind,
            body,
            diagnostics,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    limit: Duration,
}

impl Deadline {
    fn after(limit: Duration) -> Self {
        Self {
            at: Instant::now() + limit,
            limit,
        }
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    fn error(&self, program: &str) -> EnrichError {
        EnrichError::Timeout {
            program: program.to_string(),
            timeout: self.limit,
        }
    }
}

/// Every step of one invocation runs in a single process group led by the
/// first step, so helpers the E-utilities start are killed with them.
/// Until [`RunningPipeline::finish`] has drained every pipe, dropping kills
/// the group.
#[derive(Default)]
struct RunningPipeline {
    programs: Vec<String>,
    children: Vec<Child>,
    stderr: Vec<Option<JoinHandle<Vec<u8>>>>,
    stdout: Option<JoinHandle<Vec<u8>>>,
    statuses: Vec<Option<ExitStatus>>,
    group: Option<u32>,
    settled: bool,
}

impl RunningPipeline {
    #[cfg(unix)]
    fn join_group(&self, command: &mut Command) {
        use std::os::unix::process::CommandExt;

        let group = self.group.and_then(|id| i32::try_from(id).ok()).unwrap_or(0);
        command.process_group(group);
    }

    #[cfg(not(unix))]
    fn join_group(&self, _command: &mut Command) {}

    fn push(&mut self, program: String, child: Child, stderr: Option<JoinHandle<Vec<u8>>>) {
        self.group.get_or_insert(child.id());
        self.programs.push(program);
        self.children.push(child);
        self.stderr.push(stderr);
        self.statuses.push(None);
    }

    fn last_program(&self) -> &str {
        self.programs.last().map(String::as_str).unwrap_or_default()
    }

    fn wait(&mut self, deadline: Option<Deadline>) -> Result<(), EnrichError> {
        loop {
            let mut pending = None;
            for (idx, child) in self.children.iter_mut().enumerate() {
                if self.statuses[idx].is_some() {
                    continue;
                }
                self.statuses[idx] = child.try_wait().map_err(|err| EnrichError::Spawn {
                    program: self.programs[idx].clone(),
                    message: err.to_string(),
                })?;
                if self.statuses[idx].is_none() && pending.is_none() {
                    pending = Some(idx);
                }
            }
            let Some(idx) = pending else {
                return Ok(());
            };
            if let Some(deadline) = deadline {
                if deadline.expired() {
                    return Err(deadline.error(&self.programs[idx]));
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Collects output once every step has exited. A helper that outlives its
    /// parent and keeps a pipe open counts against the same deadline.
    fn finish(mut self, deadline: Option<Deadline>) -> Result<(Vec<u8>, String), EnrichError> {
        let body = match self.stdout.take() {
            Some(handle) => join_drain(handle, deadline, self.last_program())?,
            None => Vec::new(),
        };
        let mut stderr = Vec::with_capacity(self.stderr.len());
        for idx in 0..self.stderr.len() {
            let bytes = match self.stderr[idx].take() {
                Some(handle) => join_drain(handle, deadline, &self.programs[idx])?,
                None => Vec::new(),
            };
            stderr.push(String::from_utf8_lossy(&bytes).trim().to_string());
        }
        self.settled = true;

        for (idx, status) in self.statuses.iter().enumerate() {
            if let Some(status) = status.filter(|status| !status.success()) {
                let message = if stderr[idx].is_empty() {
                    "no diagnostics on stderr".to_string()
                } else {
                    stderr[idx].clone()
                };
                return Err(EnrichError::CommandFailed {
                    program: self.programs[idx].clone(),
                    status: status.to_string(),
                    stderr: message,
                });
            }
        }

        let diagnostics = stderr
            .into_iter()
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        Ok((body, diagnostics))
    }
}

impl Drop for RunningPipeline {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(group) = self.group {
            kill_group(group);
        }
        for (child, status) in self.children.iter_mut().zip(&self.statuses) {
            if status.is_none() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

/// Sends SIGKILL to the whole process group through the shell's `kill`.
#[cfg(unix)]
fn kill_group(group: u32) {
    let outcome = Command::new("sh")
        .args(["-c", "kill -s KILL -- \"-$1\"", "sh", &group.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(err) = outcome {
        tracing::warn!(group, %err, "failed to kill process group");
    }
}

#[cfg(not(unix))]
fn kill_group(_group: u32) {}

fn join_drain(
    handle: JoinHandle<Vec<u8>>,
    deadline: Option<Deadline>,
    program: &str,
) -> Result<Vec<u8>, EnrichError> {
    if let Some(deadline) = deadline {
        while !handle.is_finished() {
            if deadline.expired() {
                return Err(deadline.error(program));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
    Ok(handle.join().unwrap_or_default())
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn resolve_program(name: &str) -> Option<PathBuf> {
    let direct = Path::new(name);
    if direct.components().count() > 1 {
        return direct.is_file().then(|| direct.to_path_buf());
    }
    find_in_path(name)
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.is_file() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}
