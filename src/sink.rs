use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::{Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::EnrichError;

pub const FASTA_LINE_WIDTH: usize = 70;

struct SinkState<W> {
    writer: W,
    written: usize,
}

impl<W: Write> SinkState<W> {
    fn append(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()
    }
}

fn lock<'a, W>(
    label: &str,
    state: &'a Mutex<SinkState<W>>,
) -> Result<MutexGuard<'a, SinkState<W>>, EnrichError> {
    state.lock().map_err(|_| EnrichError::Output {
        path: label.to_string(),
        message: "writer lock poisoned".to_string(),
    })
}

fn output_error(label: &str, err: std::io::Error) -> EnrichError {
    EnrichError::Output {
        path: label.to_string(),
        message: err.to_string(),
    }
}

fn create_file(path: &Utf8Path) -> Result<BufWriter<File>, EnrichError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|err| EnrichError::Filesystem(format!("create {parent}: {err}")))?;
    }
    let file = File::create(path).map_err(|err| output_error(path.as_str(), err))?;
    Ok(BufWriter::new(file))
}

/// Tab-separated table with a header line. Each row is one `write_all` plus a
/// flush under the lock, so concurrent writers never interleave partial lines
/// and a write failure is reported against the row that caused it.
pub struct TsvSink<W: Write> {
    label: String,
    state: Mutex<SinkState<W>>,
}

impl TsvSink<BufWriter<File>> {
    pub fn create(path: &Utf8Path, header: &[&str]) -> Result<Self, EnrichError> {
        let writer = create_file(path)?;
        Self::new(path.as_str(), writer, header)
    }
}

impl<W: Write> TsvSink<W> {
    pub fn new(label: impl Into<String>, mut writer: W, header: &[&str]) -> Result<Self, EnrichError> {
        let label = label.into();
        let line = format!("{}\n", header.join("\t"));
        writer
            .write_all(line.as_bytes())
            .map_err(|err| output_error(&label, err))?;
        Ok(Self {
            label,
            state: Mutex::new(SinkState { writer, written: 0 }),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn write_row(&self, columns: &[String]) -> Result<(), EnrichError> {
        let mut line = columns
            .iter()
            .map(|column| clean_field(column))
            .collect::<Vec<_>>()
            .join("\t");
        line.push('\n');

        let mut state = lock(&self.label, &self.state)?;
        state.append(line.as_bytes()).map_err(|err| output_error(&self.label, err))?;
        state.written += 1;
        Ok(())
    }

    /// Data rows written so far (header excluded).
    pub fn rows(&self) -> usize {
        self.state.lock().map(|state| state.written).unwrap_or(0)
    }

    pub fn finish(self) -> Result<W, EnrichError> {
        let label = self.label;
        let mut state = self.state.into_inner().map_err(|_| EnrichError::Output {
            path: label.clone(),
            message: "writer lock poisoned".to_string(),
        })?;
        state.writer.flush().map_err(|err| output_error(&label, err))?;
        Ok(state.writer)
    }
}

/// FASTA file; a whole `>header` plus sequence block is written under one
/// lock acquisition.
pub struct FastaSink<W: Write> {
    label: String,
    state: Mutex<SinkState<W>>,
}

impl FastaSink<BufWriter<File>> {
    pub fn create(path: &Utf8Path) -> Result<Self, EnrichError> {
        let writer = create_file(path)?;
        Ok(Self::new(path.as_str(), writer))
    }
}

impl<W: Write> FastaSink<W> {
    pub fn new(label: impl Into<String>, writer: W) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(SinkState { writer, written: 0 }),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn write_record(&self, header: &str, sequence: &str) -> Result<(), EnrichError> {
        let block = fasta_block(header, sequence);
        let mut state = lock(&self.label, &self.state)?;
        state.append(block.as_bytes()).map_err(|err| output_error(&self.label, err))?;
        state.written += 1;
        Ok(())
    }

    pub fn records(&self) -> usize {
        self.state.lock().map(|state| state.written).unwrap_or(0)
    }

    pub fn finish(self) -> Result<W, EnrichError> {
        let label = self.label;
        let mut state = self.state.into_inner().map_err(|_| EnrichError::Output {
            path: label.clone(),
            message: "writer lock poisoned".to_string(),
        })?;
        state.writer.flush().map_err(|err| output_error(&label, err))?;
        Ok(state.writer)
    }
}

fn fasta_block(header: &str, sequence: &str) -> String {
    let residues: Vec<char> = sequence.chars().filter(|ch| !ch.is_whitespace()).collect();
    let mut block = String::with_capacity(header.len() + residues.len() + residues.len() / FASTA_LINE_WIDTH + 4);
    block.push('>');
    block.push_str(&clean_field(header));
    block.push('\n');
    for line in residues.chunks(FASTA_LINE_WIDTH) {
        block.extend(line);
        block.push('\n');
    }
    block
}

fn clean_field(value: &str) -> String {
    value
        .chars()
        .map(|ch| if matches!(ch, '\t' | '\n' | '\r') { ' ' } else { ch })
        .collect()
}

/// Output file names inside the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub dir: Utf8PathBuf,
}

impl OutputLayout {
    pub const GENES: &'static str = "gene_references.tsv";
    pub const PROTEINS: &'static str = "protein_info.tsv";
    pub const SEQUENCES: &'static str = "protein_sequences.fasta";
    pub const PATHWAYS: &'static str = "pathway_maps.tsv";
    pub const INSIGHTS: &'static str = "functional_insights.tsv";

    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn genes(&self) -> Utf8PathBuf {
        self.dir.join(Self::GENES)
    }

    pub fn proteins(&self) -> Utf8PathBuf {
        self.dir.join(Self::PROTEINS)
    }

    pub fn sequences(&self) -> Utf8PathBuf {
        self.dir.join(Self::SEQUENCES)
    }

    pub fn pathways(&self) -> Utf8PathBuf {
        self.dir.join(Self::PATHWAYS)
    }

    pub fn insights(&self) -> Utf8PathBuf {
        self.dir.join(Self::INSIGHTS)
    }
}
