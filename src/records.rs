use serde::Serialize;

use crate::decode::UNKNOWN;
use crate::domain::QueryKey;

pub const GENE_HEADER: [&str; 6] = [
    "Query",
    "Gene_ID",
    "Symbol",
    "Description",
    "Chromosome",
    "MapLocation",
];

pub const PROTEIN_HEADER: [&str; 6] = [
    "Query",
    "Protein_ID",
    "Accession",
    "Name",
    "Length",
    "Molecular_Weight",
];

pub const PATHWAY_HEADER: [&str; 5] = [
    "Gene",
    "Pathway_ID",
    "Pathway_Name",
    "Pathway_Source",
    "Gene_Role",
];

pub const INSIGHT_HEADER: [&str; 5] = [
    "Gene",
    "Function_Type",
    "Description",
    "Evidence",
    "Reference_PMID",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneRecord {
    pub gene_id: String,
    pub symbol: String,
    pub description: String,
    pub chromosome: String,
    pub map_location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProteinRecord {
    pub protein_id: Option<String>,
    pub accession: Option<String>,
    pub name: Option<String>,
    pub length: Option<u64>,
    pub molecular_weight: Option<f64>,
    pub sequence: Option<String>,
}

impl ProteinRecord {
    /// Identifier used for the secondary FASTA lookup: gi, else accession.
    pub fn lookup_id(&self) -> Option<&str> {
        self.protein_id.as_deref().or(self.accession.as_deref())
    }

    pub fn fasta_header(&self, key: &QueryKey) -> String {
        format!(
            "{}|{}|{}|{}",
            key,
            text_or_unknown(&self.protein_id),
            text_or_unknown(&self.accession),
            text_or_unknown(&self.name)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathwayRecord {
    pub pathway_id: String,
    pub name: String,
    pub source: String,
    pub gene_role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsightRecord {
    pub function_type: String,
    pub description: String,
    pub evidence: String,
    pub reference: String,
}

/// One decoded upstream record, tagged by the data product it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ParsedRecord {
    Gene(GeneRecord),
    Protein(ProteinRecord),
    Pathway(PathwayRecord),
    Insight(InsightRecord),
}

impl ParsedRecord {
    /// Tabular projection, query column first.
    pub fn columns(&self, key: &QueryKey) -> Vec<String> {
        let key = key.to_string();
        match self {
            ParsedRecord::Gene(gene) => vec![
                key,
                gene.gene_id.clone(),
                gene.symbol.clone(),
                gene.description.clone(),
                gene.chromosome.clone(),
                gene.map_location.clone(),
            ],
            ParsedRecord::Protein(protein) => vec![
                key,
                text_or_unknown(&protein.protein_id),
                text_or_unknown(&protein.accession),
                text_or_unknown(&protein.name),
                protein
                    .length
                    .map(|length| length.to_string())
                    .unwrap_or_else(|| UNKNOWN.to_string()),
                protein
                    .molecular_weight
                    .map(|weight| format!("{weight:.2}"))
                    .unwrap_or_else(|| UNKNOWN.to_string()),
            ],
            ParsedRecord::Pathway(pathway) => vec![
                key,
                pathway.pathway_id.clone(),
                pathway.name.clone(),
                pathway.source.clone(),
                pathway.gene_role.clone(),
            ],
            ParsedRecord::Insight(insight) => vec![
                key,
                insight.function_type.clone(),
                insight.description.clone(),
                insight.evidence.clone(),
                insight.reference.clone(),
            ],
        }
    }
}

impl From<GeneRecord> for ParsedRecord {
    fn from(record: GeneRecord) -> Self {
        ParsedRecord::Gene(record)
    }
}

impl From<ProteinRecord> for ParsedRecord {
    fn from(record: ProteinRecord) -> Self {
        ParsedRecord::Protein(record)
    }
}

impl From<PathwayRecord> for ParsedRecord {
    fn from(record: PathwayRecord) -> Self {
        ParsedRecord::Pathway(record)
    }
}

impl From<InsightRecord> for ParsedRecord {
    fn from(record: InsightRecord) -> Self {
        ParsedRecord::Insight(record)
    }
}

fn text_or_unknown(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| UNKNOWN.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protein_columns_use_sentinels() {
        let key: QueryKey = "IL6".parse().unwrap();
        let record = ParsedRecord::from(ProteinRecord {
            protein_id: Some("10834984".to_string()),
            accession: None,
            name: Some("interleukin-6".to_string()),
            length: Some(212),
            molecular_weight: Some(23718.249),
            sequence: None,
        });
        assert_eq!(
            record.columns(&key),
            vec!["IL6", "10834984", "Unknown", "interleukin-6", "212", "23718.25"]
        );
    }

    #[test]
    fn fasta_header_layout() {
        let key: QueryKey = "IL6".parse().unwrap();
        let record = ProteinRecord {
            protein_id: Some("1".to_string()),
            accession: Some("NP_000591.1".to_string()),
            name: None,
            length: None,
            molecular_weight: None,
            sequence: None,
        };
        assert_eq!(record.fasta_header(&key), "IL6|1|NP_000591.1|Unknown");
        assert_eq!(record.lookup_id(), Some("1"));
    }
}
