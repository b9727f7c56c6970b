use std::fs::File;
use std::io::{BufRead, BufReader, Write};

use omniagent_core::types::DEFAULT_CONVERSATION_TITLE;
use omniagent_core::{Conversation, Message, Paths, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "_type")]
enum ConversationLine {
    #[serde(rename = "metadata")]
    Metadata {
        id: String,
        title: String,
        created_at: String,
        updated_at: String,
    },
    #[serde(untagged)]
    Message(Message),
}

/// One JSONL file per conversation: a metadata first line, then one message
/// per line. Unparsable lines are skipped on load.
pub struct ConversationStore {
    paths: Paths,
}

impl ConversationStore {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn load(&self, id: &str) -> Result<Conversation> {
        let path = self.paths.conversation_file(id);
        let mut conversation = Conversation::new(id);

        if !path.exists() {
            return Ok(conversation);
        }

        let file = File::open(&path)?;
        let reader = BufReader::new(file);

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ConversationLine>(&line) {
                Ok(ConversationLine::Metadata { title, .. }) => {
                    conversation.title = title;
                }
                Ok(ConversationLine::Message(message)) => {
                    conversation.messages.push(message);
                }
                Err(e) => {
                    debug!(error = %e, "skipping unparsable conversation line");
                }
            }
        }

        Ok(conversation)
    }

    pub fn save(&self, conversation: &Conversation) -> Result<()> {
        let path = self.paths.conversation_file(&conversation.id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let now = chrono::Utc::now().to_rfc3339();
        let mut file = File::create(&path)?;

        let metadata = ConversationLine::Metadata {
            id: conversation.id.clone(),
            title: conversation.title.clone(),
            created_at: now.clone(),
            updated_at: now,
        };
        writeln!(file, "{}", serde_json::to_string(&metadata)?)?;

        for message in &conversation.messages {
            writeln!(file, "{}", serde_json::to_string(message)?)?;
        }

        Ok(())
    }

    /// (id, title) pairs of every stored conversation.
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        let dir = self.paths.conversations_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let title = self
                .load(id)
                .map(|c| c.title)
                .unwrap_or_else(|_| DEFAULT_CONVERSATION_TITLE.to_string());
            out.push((id.to_string(), title));
        }
        out.sort();
        Ok(out)
    }
}
