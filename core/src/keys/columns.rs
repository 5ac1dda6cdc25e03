//! Records in the file's key/value metadata which scheme produced which key
//! column. Later steps look a key column up by its scheme instead of
//! guessing from its name.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::KeyScheme;

/// The key/value metadata entry holding the key columns
pub const KEY_COLUMNS_METADATA_KEY: &str = "geokey";

/// The key columns of a file and their schemes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyColumns {
    key_columns: BTreeMap<String, KeyScheme>,
}

impl KeyColumns {
    /// Reads the key columns from a file's key/value metadata. A missing
    /// entry means no recorded columns. An unreadable one is ignored.
    pub fn read(key_value: &[(String, String)]) -> Self {
        let Some((_, value)) = key_value.iter().find(|(k, _)| k == KEY_COLUMNS_METADATA_KEY)
        else {
            return Self::default();
        };
        serde_json::from_str(value).unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring unreadable key column metadata");
            Self::default()
        })
    }

    /// The scheme that produced a column
    pub fn scheme(&self, column: &str) -> Option<KeyScheme> {
        self.key_columns.get(column).copied()
    }

    pub fn insert(&mut self, column: impl Into<String>, scheme: KeyScheme) {
        self.key_columns.insert(column.into(), scheme);
    }

    pub fn remove(&mut self, column: &str) -> Option<KeyScheme> {
        self.key_columns.remove(column)
    }

    /// Replaces the entry in `key_value`. No entry is left if there are no
    /// key columns.
    pub fn write_to(&self, key_value: &mut Vec<(String, String)>) -> Result<()> {
        key_value.retain(|(k, _)| k != KEY_COLUMNS_METADATA_KEY);
        if !self.key_columns.is_empty() {
            let value =
                serde_json::to_string(self).context("Unable to serialize key column metadata")?;
            key_value.push((KEY_COLUMNS_METADATA_KEY.to_string(), value));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assertor::{assert_that, EqualityAssertion, OptionAssertion};
    use pretty_assertions::assert_eq;

    use crate::keys::KeyScheme;

    use super::{KeyColumns, KEY_COLUMNS_METADATA_KEY};

    #[test]
    fn written_entry_is_read_back() {
        let mut columns = KeyColumns::default();
        columns.insert("kd", KeyScheme::KdTree { iterations: 2 });
        columns.insert("h3_cell", KeyScheme::H3 { resolution: 8 });

        let mut kv = vec![("other".to_string(), "x".to_string())];
        columns.write_to(&mut kv).unwrap();
        assert_eq!(
            kv[1],
            (
                KEY_COLUMNS_METADATA_KEY.to_string(),
                r#"{"key_columns":{"h3_cell":{"scheme":"h3","resolution":8},"kd":{"scheme":"kdtree","iterations":2}}}"#
                    .to_string()
            )
        );

        let read = KeyColumns::read(&kv);
        assert_that!(read.scheme("kd")).has_value(KeyScheme::KdTree { iterations: 2 });
        assert_that!(read.scheme("quadkey")).is_none();
    }

    #[test]
    fn removing_the_last_column_drops_the_entry() {
        let mut columns = KeyColumns::default();
        columns.insert(
            "q",
            KeyScheme::Quadkey {
                resolution: 3,
                use_centroid: true,
            },
        );
        let mut kv = Vec::new();
        columns.write_to(&mut kv).unwrap();
        assert_that!(kv.len()).is_equal_to(1);

        let mut columns = KeyColumns::read(&kv);
        assert_that!(columns.remove("q")).is_some();
        columns.write_to(&mut kv).unwrap();
        assert!(kv.is_empty());
    }

    #[test]
    fn unreadable_entry_is_ignored() {
        let kv = vec![(KEY_COLUMNS_METADATA_KEY.to_string(), "not json".to_string())];
        assert_that!(KeyColumns::read(&kv)).is_equal_to(KeyColumns::default());
    }
}
