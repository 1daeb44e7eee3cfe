use crate::conversation::Conversation;
use async_trait::async_trait;
use fhirassist_core::{FhirAssistError, FhirAssistResult};
use std::path::PathBuf;
use tracing::debug;

/// Persistence hook for replaying a conversation across restarts.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Loads the conversation saved under `name`, if any.
    async fn load(&self, name: &str) -> FhirAssistResult<Option<Conversation>>;
    /// Saves (or overwrites) the conversation under `name`.
    async fn save(&self, name: &str, conversation: &Conversation) -> FhirAssistResult<()>;
    /// Removes the conversation saved under `name`. Missing entries are not an error.
    async fn delete(&self, name: &str) -> FhirAssistResult<()>;
    /// Names of all saved conversations.
    async fn list(&self) -> FhirAssistResult<Vec<String>>;
}

/// File-based conversation store (one pretty-printed JSON file per name).
pub struct FileConversationStore {
    dir: PathBuf,
}

impl FileConversationStore {
    /// Opens the store, creating `dir` if needed.
    pub async fn new(dir: PathBuf) -> FhirAssistResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn conversation_path(&self, name: &str) -> FhirAssistResult<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(FhirAssistError::Session(format!(
                "invalid conversation name '{name}'"
            )));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn load(&self, name: &str) -> FhirAssistResult<Option<Conversation>> {
        let path = self.conversation_path(name)?;
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(path).await?;
        let conversation: Conversation = serde_json::from_str(&data).map_err(|e| {
            FhirAssistError::Session(format!("Failed to parse conversation: {e}"))
        })?;
        Ok(Some(conversation))
    }

    async fn save(&self, name: &str, conversation: &Conversation) -> FhirAssistResult<()> {
        let path = self.conversation_path(name)?;
        let json = serde_json::to_string_pretty(conversation)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(tmp, &path).await?;
        debug!(
            name = %name,
            messages = conversation.message_count(),
            path = %path.display(),
            "Conversation saved"
        );
        Ok(())
    }

    async fn delete(&self, name: &str) -> FhirAssistResult<()> {
        let path = self.conversation_path(name)?;
        if path.exists() {
            tokio::fs::remove_file(path).await?;
            debug!(name = %name, "Conversation deleted");
        }
        Ok(())
    }

    async fn list(&self) -> FhirAssistResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(file_name) = entry.file_name().to_str() {
                if let Some(stem) = file_name.strip_suffix(".json") {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
