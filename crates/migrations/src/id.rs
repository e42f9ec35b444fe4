use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::MigrationError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MigrationAction {
    Created,
    Deleted,
    Updated,
}

impl MigrationAction {
    pub fn as_str(self) -> &'static str {
        match self {
            MigrationAction::Created => "created",
            MigrationAction::Deleted => "deleted",
            MigrationAction::Updated => "updated",
        }
    }
}

/// `<unix-timestamp>_<created|updated|deleted>_<collection>`.
///
/// Ordering is by timestamp first, which matches the lexical order the
/// backend's own runner uses for same-width timestamps.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MigrationId {
    timestamp: u64,
    action: MigrationAction,
    collection: String,
}

impl MigrationId {
    pub fn new(timestamp: u64, action: MigrationAction, collection: impl Into<String>) -> Self {
        Self {
            timestamp,
            action,
            collection: collection.into(),
        }
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn action(&self) -> MigrationAction {
        self.action
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl FromStr for MigrationId {
    type Err = MigrationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || MigrationError::InvalidId(raw.to_string());

        let (timestamp, rest) = raw.split_once('_').ok_or_else(invalid)?;
        if timestamp.is_empty() || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        // The id must print back as the file stem it came from.
        if timestamp.len() > 1 && timestamp.starts_with('0') {
            return Err(invalid());
        }
        let timestamp = timestamp.parse::<u64>().map_err(|_| invalid())?;

        let (action, collection) = rest.split_once('_').ok_or_else(invalid)?;
        let action = match action {
            "created" => MigrationAction::Created,
            "updated" => MigrationAction::Updated,
            "deleted" => MigrationAction::Deleted,
            _ => return Err(invalid()),
        };
        if collection.is_empty()
            || !collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(invalid());
        }

        Ok(Self::new(timestamp, action, collection))
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.timestamp,
            self.action.as_str(),
            self.collection
        )
    }
}

impl TryFrom<String> for MigrationId {
    type Error = MigrationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MigrationId> for String {
    fn from(value: MigrationId) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backend_file_stem() {
        let id: MigrationId = "1764930416_updated_tenants".parse().expect("id");
        assert_eq!(id.timestamp(), 1764930416);
        assert_eq!(id.action(), MigrationAction::Updated);
        assert_eq!(id.collection(), "tenants");
        assert_eq!(id.to_string(), "1764930416_updated_tenants");
    }

    #[test]
    fn display_matches_parsed_text() {
        for raw in ["0_created_notes", "1700000000_created_notes"] {
            let id: MigrationId = raw.parse().expect("id");
            assert_eq!(id.to_string(), raw);
        }
    }

    #[test]
    fn collection_names_may_contain_underscores() {
        let id: MigrationId = "1764931000_updated_wellness_logs".parse().expect("id");
        assert_eq!(id.collection(), "wellness_logs");
    }

    #[test]
    fn rejects_malformed_ids() {
        for raw in [
            "updated_tenants",
            "1764930416_renamed_tenants",
            "1764930416_updated_",
            "17649x0416_updated_tenants",
            "1764930416_updated_ten-ants",
            "0001700000000_created_notes",
        ] {
            assert!(raw.parse::<MigrationId>().is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn orders_by_timestamp_then_lexically() {
        let mut ids: Vec<MigrationId> = [
            "1764931000_updated_wellness_logs",
            "1733900000_created_tenants",
            "1764930416_updated_tenants",
            "1764930416_deleted_classes",
        ]
        .into_iter()
        .map(|raw| raw.parse().expect("id"))
        .collect();
        ids.sort();
        let ordered: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(
            ordered,
            vec![
                "1733900000_created_tenants",
                "1764930416_deleted_classes",
                "1764930416_updated_tenants",
                "1764931000_updated_wellness_logs",
            ]
        );
    }
}
