use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::EnrichError;

/// A gene or protein symbol driving one round of lookups.
///
/// Keys are opaque to the pipeline. Duplicates are allowed and processed
/// independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueryKey {
    type Err = EnrichError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed
                .chars()
                .all(|ch| ch != '"' && ch != '\t' && !ch.is_control());
        if !is_valid {
            return Err(EnrichError::InvalidQueryKey(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Genes,
    Proteins,
    Pathways,
    Insights,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Genes,
        Stage::Proteins,
        Stage::Pathways,
        Stage::Insights,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Stage::Genes => "gene references",
            Stage::Proteins => "protein data",
            Stage::Pathways => "pathway maps",
            Stage::Insights => "functional insights",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Genes => write!(f, "genes"),
            Stage::Proteins => write!(f, "proteins"),
            Stage::Pathways => write!(f, "pathways"),
            Stage::Insights => write!(f, "insights"),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_query_key_trims() {
        let key: QueryKey = "  IL6 ".parse().unwrap();
        assert_eq!(key.as_str(), "IL6");
    }

    #[test]
    fn parse_query_key_keeps_case() {
        let key: QueryKey = "gp130".parse().unwrap();
        assert_eq!(key.as_str(), "gp130");
    }

    #[test]
    fn parse_query_key_rejects_blank() {
        let err = "   ".parse::<QueryKey>().unwrap_err();
        assert_matches!(err, EnrichError::InvalidQueryKey(_));
    }

    #[test]
    fn parse_query_key_rejects_quote_and_tab() {
        assert!("IL\"6".parse::<QueryKey>().is_err());
        assert!("IL\t6".parse::<QueryKey>().is_err());
    }

    #[test]
    fn stage_display_matches_serde_name() {
        for stage in Stage::ALL {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{stage}\""));
        }
    }
}
