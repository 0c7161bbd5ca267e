use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::client::{QueryClient, QueryKind, QueryRequest, QueryTemplates, RawResponse};
use crate::config::{ResolvedConfig, ToolNames};
use crate::decode::{
    self, Schema, decode_biosystems, decode_gene_records, decode_go_terms,
    decode_pathway_summaries, decode_protein_records, decode_pubmed_articles,
    parse_fasta_sequence,
};
use crate::dispatch::{CancellationToken, WorkerPool};
use crate::domain::{QueryKey, Stage};
use crate::error::EnrichError;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::rate_limit::RequestLimiter;
use crate::records::{
    GENE_HEADER, INSIGHT_HEADER, PATHWAY_HEADER, PROTEIN_HEADER, ParsedRecord, ProteinRecord,
};
use crate::retry::RetryPolicy;
use crate::sanitize::sanitize_xml;
use crate::sink::{FastaSink, OutputLayout, TsvSink};

type Decoder<R> = fn(&[u8]) -> Result<Vec<R>, EnrichError>;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub workers: usize,
    pub max_retries: usize,
    pub retry_delay: Duration,
    pub requests_per_second: Option<u32>,
    pub organism: String,
    pub tools: ToolNames,
}

impl From<&ResolvedConfig> for PipelineSettings {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            workers: config.workers,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            requests_per_second: config.requests_per_second,
            organism: config.organism.clone(),
            tools: config.tools.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyFailure {
    pub key: QueryKey,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub keys_total: usize,
    pub keys_processed: usize,
    pub keys_failed: usize,
    pub keys_skipped: usize,
    pub rows_written: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequences_written: Option<usize>,
    pub failures: Vec<KeyFailure>,
    pub warnings: Vec<KeyFailure>,
    pub outputs: Vec<String>,
    pub schemas: Vec<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub started_at: String,
    pub input: String,
    pub input_materialized: bool,
    pub keys: usize,
    pub stages: Vec<StageReport>,
}

/// Output files of one stage: its table and, for proteins, the FASTA file.
pub struct StageSinks<W: Write> {
    pub table: TsvSink<W>,
    pub fasta: Option<FastaSink<W>>,
}

impl StageSinks<BufWriter<File>> {
    pub fn create(stage: Stage, layout: &OutputLayout) -> Result<Self, EnrichError> {
        let (table, fasta) = match stage {
            Stage::Genes => (layout.genes(), None),
            Stage::Proteins => (layout.proteins(), Some(layout.sequences())),
            Stage::Pathways => (layout.pathways(), None),
            Stage::Insights => (layout.insights(), None),
        };
        Ok(Self {
            table: TsvSink::create(&table, table_header(stage))?,
            fasta: fasta.as_deref().map(FastaSink::create).transpose()?,
        })
    }
}

impl<W: Write> StageSinks<W> {
    /// Sinks over caller-supplied writers; `fasta` is only used by the protein
    /// stage.
    pub fn new(stage: Stage, table: W, fasta: Option<W>) -> Result<Self, EnrichError> {
        let fasta = match stage {
            Stage::Proteins => fasta.map(|writer| FastaSink::new(format!("{stage}.fasta"), writer)),
            _ => None,
        };
        Ok(Self {
            table: TsvSink::new(format!("{stage}.tsv"), table, table_header(stage))?,
            fasta,
        })
    }

    pub fn outputs(&self) -> Vec<String> {
        let mut outputs = vec![self.table.label().to_string()];
        if let Some(fasta) = &self.fasta {
            outputs.push(fasta.label().to_string());
        }
        outputs
    }

    pub fn finish(self) -> Result<(W, Option<W>), EnrichError> {
        let table = self.table.finish()?;
        let fasta = self.fasta.map(FastaSink::finish).transpose()?;
        Ok((table, fasta))
    }
}

pub fn table_header(stage: Stage) -> &'static [&'static str] {
    match stage {
        Stage::Genes => &GENE_HEADER,
        Stage::Proteins => &PROTEIN_HEADER,
        Stage::Pathways => &PATHWAY_HEADER,
        Stage::Insights => &INSIGHT_HEADER,
    }
}

pub fn stage_schemas(stage: Stage) -> Vec<Schema> {
    match stage {
        Stage::Genes => vec![decode::gene::SCHEMA],
        Stage::Proteins => vec![decode::protein::SCHEMA],
        Stage::Pathways => vec![
            decode::pathway::BIOSYSTEM_SCHEMA,
            decode::pathway::SUMMARY_SCHEMA,
        ],
        Stage::Insights => vec![
            decode::insight::PUBMED_SCHEMA,
            decode::insight::GO_SCHEMA,
        ],
    }
}

#[derive(Debug, Default)]
struct KeyWork {
    rows: usize,
    sequences: usize,
    warnings: Vec<String>,
}

#[derive(Debug)]
struct KeyOutcome {
    rows: usize,
    sequences: usize,
    warnings: Vec<String>,
    error: Option<EnrichError>,
}

/// Stage drivers over an injected [`QueryClient`].
pub struct Pipeline<C: QueryClient> {
    client: C,
    templates: QueryTemplates,
    pool: WorkerPool,
    retry: RetryPolicy,
    requests_per_second: Option<u32>,
}

impl<C: QueryClient> Pipeline<C> {
    pub fn new(client: C, settings: PipelineSettings) -> Result<Self, EnrichError> {
        Ok(Self {
            client,
            templates: QueryTemplates::new(settings.tools, settings.organism),
            pool: WorkerPool::new(settings.workers)?,
            retry: RetryPolicy::new(settings.max_retries, settings.retry_delay),
            requests_per_second: settings.requests_per_second,
        })
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Runs `stages` in order against file sinks under `layout`. A fatal
    /// write failure or cancellation ends the run with that error.
    pub fn run(
        &self,
        keys: &[QueryKey],
        stages: &[Stage],
        layout: &OutputLayout,
        events: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<StageReport>, EnrichError> {
        let mut reports = Vec::with_capacity(stages.len());
        for &stage in stages {
            let sinks = StageSinks::create(stage, layout)?;
            let report = self.run_stage(stage, keys, &sinks, events, cancel)?;
            sinks.finish()?;
            reports.push(report);
        }
        Ok(reports)
    }

    /// Fans `keys` out over the worker pool; every worker writes its rows
    /// straight into `sinks`. Headers are already written by the sinks.
    pub fn run_stage<W: Write + Send>(
        &self,
        stage: Stage,
        keys: &[QueryKey],
        sinks: &StageSinks<W>,
        events: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<StageReport, EnrichError> {
        let started = Instant::now();
        let limiter = RequestLimiter::new(self.requests_per_second);
        let outputs = sinks.outputs();
        tracing::info!(%stage, keys = keys.len(), workers = self.pool.workers(), "stage started");
        events.event(ProgressEvent::StageStarted {
            stage,
            total: keys.len(),
        });

        let mut report = StageReport {
            stage,
            keys_total: keys.len(),
            keys_processed: 0,
            keys_failed: 0,
            keys_skipped: 0,
            rows_written: 0,
            sequences_written: (stage == Stage::Proteins).then_some(0),
            failures: Vec::new(),
            warnings: Vec::new(),
            outputs: outputs.clone(),
            schemas: stage_schemas(stage).iter().map(ToString::to_string).collect(),
            elapsed_ms: 0,
        };
        let mut fatal: Option<EnrichError> = None;

        let summary = self.pool.run(
            keys,
            cancel,
            |key| {
                let outcome = match self.process_key(stage, key, &limiter, sinks) {
                    Ok(work) => KeyOutcome {
                        rows: work.rows,
                        sequences: work.sequences,
                        warnings: work.warnings,
                        error: None,
                    },
                    Err(err) => KeyOutcome {
                        rows: 0,
                        sequences: 0,
                        warnings: Vec::new(),
                        error: Some(err),
                    },
                };
                if outcome.error.as_ref().is_some_and(EnrichError::is_fatal) {
                    cancel.cancel();
                }
                outcome
            },
            |result| {
                let outcome = result.outcome;
                report.rows_written += outcome.rows;
                if let Some(sequences) = report.sequences_written.as_mut() {
                    *sequences += outcome.sequences;
                }
                for message in outcome.warnings {
                    tracing::warn!(%stage, key = %result.key, %message, "partial result");
                    events.event(ProgressEvent::Warning {
                        stage,
                        key: result.key.clone(),
                        message: message.clone(),
                    });
                    report.warnings.push(KeyFailure {
                        key: result.key.clone(),
                        message,
                    });
                }
                let error_message = outcome.error.as_ref().map(ToString::to_string);
                match outcome.error {
                    Some(err) if err.is_fatal() => {
                        tracing::error!(%stage, key = %result.key, error = %err, "write failure, cancelling stage");
                        fatal.get_or_insert(err);
                    }
                    Some(err) => {
                        tracing::warn!(%stage, key = %result.key, error = %err, "key skipped");
                        report.keys_failed += 1;
                        report.failures.push(KeyFailure {
                            key: result.key.clone(),
                            message: err.to_string(),
                        });
                    }
                    None => {}
                }
                events.event(ProgressEvent::KeyFinished {
                    stage,
                    key: result.key,
                    progress: result.progress,
                    rows: outcome.rows,
                    error: error_message,
                });
            },
        );

        if let Some(err) = fatal {
            return Err(err);
        }
        if summary.skipped > 0 {
            return Err(EnrichError::Cancelled(stage));
        }

        report.keys_processed = summary.processed;
        report.keys_skipped = summary.skipped;
        let elapsed = started.elapsed();
        report.elapsed_ms = elapsed.as_millis() as u64;
        tracing::info!(
            %stage,
            rows = report.rows_written,
            failed = report.keys_failed,
            elapsed_ms = report.elapsed_ms,
            "stage finished"
        );
        events.event(ProgressEvent::StageFinished {
            stage,
            outputs,
            elapsed,
        });
        Ok(report)
    }

    fn process_key<W: Write>(
        &self,
        stage: Stage,
        key: &QueryKey,
        limiter: &RequestLimiter,
        sinks: &StageSinks<W>,
    ) -> Result<KeyWork, EnrichError> {
        match stage {
            Stage::Genes => self.tabulate(
                key,
                limiter,
                &sinks.table,
                &[(QueryKind::GeneRecords, decode_gene_records as Decoder<_>)],
            ),
            Stage::Proteins => self.proteins(key, limiter, sinks),
            Stage::Pathways => self.tabulate(
                key,
                limiter,
                &sinks.table,
                &[
                    (QueryKind::Biosystems, decode_biosystems as Decoder<_>),
                    (QueryKind::PathwaySummaries, decode_pathway_summaries as Decoder<_>),
                ],
            ),
            Stage::Insights => self.tabulate(
                key,
                limiter,
                &sinks.table,
                &[
                    (QueryKind::PubmedArticles, decode_pubmed_articles as Decoder<_>),
                    (QueryKind::GeneOntology, decode_go_terms as Decoder<_>),
                ],
            ),
        }
    }

    fn fetch(&self, limiter: &RequestLimiter, request: &QueryRequest) -> Result<RawResponse, EnrichError> {
        let label = format!("{} {}", request.key, request.kind);
        let response = self.retry.run(&label, |_| {
            limiter.acquire();
            tracing::debug!(command = %request.command_line(), "running query");
            self.client.execute(request)
        })?;
        if !response.diagnostics.is_empty() {
            tracing::debug!(key = %request.key, kind = %request.kind, stderr = %response.diagnostics, "query diagnostics");
        }
        Ok(response)
    }

    fn fetch_records<R>(
        &self,
        key: &QueryKey,
        limiter: &RequestLimiter,
        kind: QueryKind,
        decoder: Decoder<R>,
    ) -> Result<Vec<R>, EnrichError> {
        let request = self.templates.request(kind, key);
        let response = self.fetch(limiter, &request)?;
        decoder(&sanitize_xml(&response.body))
    }

    /// Runs independent sub-queries for one key and writes every decoded
    /// record to `table`. The key fails only when every sub-query fails.
    fn tabulate<W: Write, R: Into<ParsedRecord>>(
        &self,
        key: &QueryKey,
        limiter: &RequestLimiter,
        table: &TsvSink<W>,
        queries: &[(QueryKind, Decoder<R>)],
    ) -> Result<KeyWork, EnrichError> {
        let mut work = KeyWork::default();
        let mut failures = Vec::new();
        for &(kind, decoder) in queries {
            match self.fetch_records(key, limiter, kind, decoder) {
                Ok(records) => {
                    for record in records {
                        let record: ParsedRecord = record.into();
                        table.write_row(&record.columns(key))?;
                        work.rows += 1;
                    }
                }
                Err(err) => failures.push((kind, err)),
            }
        }
        if failures.len() == queries.len() {
            if let Some((_, err)) = failures.into_iter().next() {
                return Err(err);
            }
            return Ok(work);
        }
        work.warnings.extend(
            failures
                .into_iter()
                .map(|(kind, err)| format!("{kind} lookup failed: {err}")),
        );
        Ok(work)
    }

    fn proteins<W: Write>(
        &self,
        key: &QueryKey,
        limiter: &RequestLimiter,
        sinks: &StageSinks<W>,
    ) -> Result<KeyWork, EnrichError> {
        let mut work = KeyWork::default();
        let records = self.fetch_records(key, limiter, QueryKind::ProteinRecords, decode_protein_records)?;
        for protein in records {
            let header = protein.fasta_header(key);
            // The secondary lookup happens before any lock is taken.
            let sequence = match (&sinks.fasta, &protein.sequence) {
                (None, _) => None,
                (Some(_), Some(sequence)) => Some(Ok(sequence.clone())),
                (Some(_), None) => Some(self.secondary_sequence(key, limiter, &protein)),
            };

            sinks.table.write_row(&ParsedRecord::from(protein).columns(key))?;
            work.rows += 1;

            match (sequence, &sinks.fasta) {
                (Some(Ok(sequence)), Some(fasta)) => {
                    fasta.write_record(&header, &sequence)?;
                    work.sequences += 1;
                }
                (Some(Err(message)), _) => work.warnings.push(message),
                _ => {}
            }
        }
        Ok(work)
    }

    fn secondary_sequence(
        &self,
        key: &QueryKey,
        limiter: &RequestLimiter,
        protein: &ProteinRecord,
    ) -> Result<String, String> {
        let id = protein
            .lookup_id()
            .ok_or_else(|| format!("no identifier to fetch the sequence of {}", protein.fasta_header(key)))?;
        let request = self.templates.fasta_request(key, id);
        let response = self
            .fetch(limiter, &request)
            .map_err(|err| format!("FASTA lookup for {id} failed: {err}"))?;
        let sequence = parse_fasta_sequence(&response.body);
        if sequence.is_empty() {
            return Err(format!("FASTA lookup for {id} returned no sequence"));
        }
        Ok(sequence)
    }
}

/// Whole-run driver: stamps the start time and collects stage reports.
pub fn run_pipeline<C: QueryClient>(
    pipeline: &Pipeline<C>,
    config: &ResolvedConfig,
    keys: &[QueryKey],
    input_materialized: bool,
    events: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<PipelineReport, EnrichError> {
    let started_at = chrono::Utc::now().to_rfc3339();
    let layout = OutputLayout::new(config.output_dir.clone());
    let stages = pipeline.run(keys, &config.stages, &layout, events, cancel)?;
    Ok(PipelineReport {
        started_at,
        input: config.input.to_string(),
        input_materialized,
        keys: keys.len(),
        stages,
    })
}
