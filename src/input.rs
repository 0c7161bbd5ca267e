use std::fs;
use std::io::Write;

use camino::Utf8Path;

use crate::domain::QueryKey;
use crate::error::EnrichError;

/// Exerkine ligands and receptors used when no input list exists yet.
pub const DEFAULT_QUERY_LIST: &[&str] = &[
    "ACVR2A", "ACVR2B", "ADIPOR1", "ADIPOR2", "ADPN", "ADRPIN", "AGE", "AHSG", "ANGPTL4", "APLN",
    "APLNR", "APOER2", "ATP6AP2", "BDNF", "BGLAP", "BMP7", "BMP8A", "BMP8B", "BMPR1A", "BMPR2",
    "CCL2", "CCL11", "CCR1", "CCR2", "CCR3", "CCR4", "CCR5", "CD44", "CD209", "ChemR23",
    "CMLKR1", "CNDP2", "CNTF", "CNTFR", "CSF3", "CSF3R", "CTGF", "CX3CL1", "CX3CR1", "CXCL1",
    "CXCR1", "CXCR2", "DCN", "EGFR", "ERBB4", "FAS", "FASR", "FGF1", "FGF2", "FGF19", "FGF21",
    "FGFR1", "FGFR2", "FGFR3", "FGFR4", "GALR2", "GALR3", "GDF8", "GDF11", "GDF15", "GFRAL",
    "gp130", "GPR1", "GPR41", "GPR43", "GPRC6A", "GRP78", "ICAM1", "IFNG", "IFNGR1", "IFNGR2",
    "IGF1", "IGF1R", "IL1", "IL1A", "IL1B", "IL1R1", "IL1R2", "IL1RA", "IL4", "IL4R", "IL6",
    "IL6R", "IL6SR", "IL7", "IL7R", "IL8", "IL10", "IL10R", "IL10R2", "IL13", "IL13RA1",
    "IL13RA2", "IL15", "IL15RA", "IL18", "IL18R1", "IL18RAP", "INHBA", "INHBB", "INHBE", "INS",
    "INSR", "ITGAL", "ITGAM", "ITGAV", "ITGB2", "KL", "LECT2", "LIF", "LIFR", "LPS", "LRP1",
    "LRP4", "LRP5", "LRP6", "MCP1", "MDC", "METRNL", "MSTN", "NRG4", "NPR3", "NTF3", "OPN",
    "OSTN", "SPARC", "PGRN", "RAGE", "RANKL", "RANTES", "RARRES2", "RBP4", "REN", "S100A",
    "S100B", "SCFAs", "SEP", "SERPINA12", "SORT1", "SOST", "SPARC", "SPP1", "SPX", "STRA6",
    "TGFB1", "TGFB2", "TGFBR1", "TGFBR2", "TLR4", "TNFA", "TNFR1", "TNFR2", "TNFRSF11B", "TRKB",
    "TRKC", "VDR", "VEGF", "VEGFA", "VEGFR1", "VEGFR2",
];

/// Result of loading the input list.
#[derive(Debug, Clone)]
pub struct QueryList {
    pub keys: Vec<QueryKey>,
    /// True when the default list was written because the path was absent.
    pub materialized: bool,
}

/// Loads the query list at `path`, writing [`DEFAULT_QUERY_LIST`] there first
/// if the file does not exist.
pub fn load_query_list(path: &Utf8Path) -> Result<QueryList, EnrichError> {
    let materialized = if path.as_std_path().exists() {
        false
    } else {
        write_default_list(path)?;
        true
    };

    let content = fs::read_to_string(path.as_std_path()).map_err(|err| EnrichError::InputList {
        path: path.as_std_path().to_path_buf(),
        message: err.to_string(),
    })?;
    let keys = parse_query_list(&content).map_err(|(line, err)| EnrichError::InputList {
        path: path.as_std_path().to_path_buf(),
        message: format!("line {line}: {err}"),
    })?;

    Ok(QueryList { keys, materialized })
}

/// Parses one key per line; surrounding whitespace is trimmed and blank
/// lines are skipped. Errors carry the 1-based line number.
pub fn parse_query_list(content: &str) -> Result<Vec<QueryKey>, (usize, EnrichError)> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| line.parse::<QueryKey>().map_err(|err| (idx + 1, err)))
        .collect()
}

fn write_default_list(path: &Utf8Path) -> Result<(), EnrichError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| EnrichError::Filesystem(err.to_string()))?;

    let mut temp = tempfile::Builder::new()
        .prefix(".exerkine-list")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| EnrichError::Filesystem(err.to_string()))?;
    for symbol in DEFAULT_QUERY_LIST {
        writeln!(temp, "{symbol}").map_err(|err| EnrichError::Filesystem(err.to_string()))?;
    }
    temp.as_file()
        .sync_all()
        .map_err(|err| EnrichError::Filesystem(err.to_string()))?;
    temp.persist_noclobber(path.as_std_path())
        .map_err(|err| EnrichError::Filesystem(err.error.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_blank_lines_and_trims() {
        let keys = parse_query_list("GENE1\nGENE2\n\nGENE3  \n").unwrap();
        let keys: Vec<&str> = keys.iter().map(QueryKey::as_str).collect();
        assert_eq!(keys, vec!["GENE1", "GENE2", "GENE3"]);
    }

    #[test]
    fn reports_offending_line() {
        let (line, _) = parse_query_list("IL6\n\nBAD\"KEY\n").unwrap_err();
        assert_eq!(line, 3);
    }

    #[test]
    fn default_list_parses() {
        let joined = DEFAULT_QUERY_LIST.join("\n");
        let keys = parse_query_list(&joined).unwrap();
        assert_eq!(keys.len(), DEFAULT_QUERY_LIST.len());
    }
}
