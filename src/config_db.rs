use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{error::Result, orchestrator::DialogueResponse};

const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");
const DIALOGUES: TableDefinition<u64, &[u8]> = TableDefinition::new("dialogues");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_DIALOGUE_ID: &str = "next_dialogue_id";

/// A finished dialogue as kept in the log, plus any follow-ups appended to
/// its history afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDialogue {
    pub created_at: String,
    pub response: DialogueResponse,
}

pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(redb::Error::from)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(SETTINGS)?;
        txn.open_table(DIALOGUES)?;
        txn.open_table(META)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    /// Get a setting, returning the default if not set.
    pub fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }

    // -- Dialogues --

    /// Store a dialogue under the next id. Ids start at 1 and only grow,
    /// even across [`ConfigDb::clear_dialogues`].
    pub fn append_dialogue(&self, dialogue: &StoredDialogue) -> Result<u64> {
        let bytes = serde_json::to_vec(dialogue)?;
        let txn = self.db.begin_write()?;
        let id = {
            let mut table = txn.open_table(DIALOGUES)?;
            let mut meta = txn.open_table(META)?;
            let after_last = match table.last()? {
                Some((k, _)) => k.value() + 1,
                None => 1,
            };
            let counter = meta.get(NEXT_DIALOGUE_ID)?.map(|v| v.value()).unwrap_or(1);
            let id = counter.max(after_last);
            table.insert(id, bytes.as_slice())?;
            meta.insert(NEXT_DIALOGUE_ID, id + 1)?;
            id
        };
        txn.commit()?;
        Ok(id)
    }

    pub fn get_dialogue(&self, id: u64) -> Result<Option<StoredDialogue>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DIALOGUES)?;
        match table.get(id)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    /// Replace a stored dialogue. Returns false when `id` does not exist.
    pub fn update_dialogue(&self, id: u64, dialogue: &StoredDialogue) -> Result<bool> {
        let bytes = serde_json::to_vec(dialogue)?;
        let txn = self.db.begin_write()?;
        let updated = {
            let mut table = txn.open_table(DIALOGUES)?;
            let exists = table.get(id)?.is_some();
            if exists {
                table.insert(id, bytes.as_slice())?;
            }
            exists
        };
        txn.commit()?;
        Ok(updated)
    }

    pub fn latest_dialogue(&self) -> Result<Option<(u64, StoredDialogue)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DIALOGUES)?;
        match table.last()? {
            Some((k, v)) => Ok(Some((k.value(), serde_json::from_slice(v.value())?))),
            None => Ok(None),
        }
    }

    /// All stored dialogues, oldest first.
    pub fn list_dialogues(&self) -> Result<Vec<(u64, StoredDialogue)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DIALOGUES)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value(), serde_json::from_slice(v.value())?));
        }
        Ok(result)
    }

    pub fn dialogue_count(&self) -> Result<usize> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DIALOGUES)?;
        let mut count = 0;
        for entry in table.iter()? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Remove every stored dialogue in a single transaction.
    pub fn clear_dialogues(&self) -> Result<usize> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(DIALOGUES)?;
            let mut ids = Vec::new();
            for entry in table.iter()? {
                let (k, _v) = entry?;
                ids.push(k.value());
            }
            for &id in &ids {
                table.remove(id)?;
            }
            ids.len()
        };
        txn.commit()?;
        Ok(removed)
    }
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}
