//! Model gateway: the four pipeline prompts over the single chat primitive.
//!
//! Every model interaction in the pipeline goes through [`ModelGateway`]. The
//! transport is the same for all four; only the messages, the expected output
//! shape and the completion budget differ.

use std::collections::BTreeMap;
use std::sync::Arc;

use pipeline::llm::{ChatRequest, Conversation, LanguageModel, LlmError, ResponseFormat, Role};
use pipeline::RepoPath;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

const VALIDATE_MAX_TOKENS: u32 = 500;
const ANALYZE_MAX_TOKENS: u32 = 1_000;
const PLAN_MAX_TOKENS: u32 = 1_500;
const GENERATE_MAX_TOKENS: u32 = 4_000;

const VALIDATE_SYSTEM_PROMPT: &str = "\
You review requests sent to a bot that edits source repositories and opens pull requests.

Decide whether the request asks for a concrete change to files in a repository \
(code, documentation, configuration, tests). Requests that only ask a question, \
ask for an explanation, are empty of intent, or ask for something unrelated to \
changing the repository are not actionable.

Return ONLY a JSON object with this structure:
{
  \"isValid\": true,
  \"reason\": \"one sentence explaining the decision\"
}";

const ANALYZE_SYSTEM_PROMPT: &str = "\
You are an experienced software engineer preparing to change a repository.

Using the repository tree and the change request, choose the files you need to \
read before deciding what to change. Include files that:
- are named in the request
- are likely to be affected by the change
- give necessary context (entry points, build or configuration files)
- hold related functionality

Only choose text files. Skip binaries, images and generated artefacts.

Return ONLY a JSON object with this structure:
{
  \"filesToRead\": [\"path/to/file1.ext\", \"path/to/file2.ext\"]
}

Be selective: every file you list is sent back to you in full.";

/// The model's judgement on a change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptVerdict {
    /// The request asks for a repository change.
    Actionable {
        /// The model's stated reason.
        reason: String,
    },
    /// The request cannot be turned into a change.
    NotActionable {
        /// The model's stated reason.
        reason: String,
    },
}

/// Which files to change and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModificationPlan {
    /// Paths as proposed by the model; containment is checked by the caller.
    pub files: Vec<RepoPath>,
    /// Past-tense summary used in the commit message and pull request body.
    pub explanation: String,
}

#[derive(Deserialize)]
struct VerdictBody {
    #[serde(rename = "isValid")]
    is_valid: bool,
    #[serde(default)]
    reason: String,
}

#[derive(Deserialize)]
struct FilesToReadBody {
    #[serde(rename = "filesToRead", default)]
    files_to_read: Vec<String>,
}

#[derive(Deserialize)]
struct FilesToModifyBody {
    #[serde(rename = "filesToModify", default)]
    files_to_modify: Vec<String>,
    #[serde(default)]
    explanation: String,
}

/// Wraps a [`LanguageModel`] with the pipeline's prompt shapes.
#[derive(Clone)]
pub struct ModelGateway {
    model: Arc<dyn LanguageModel>,
}

impl ModelGateway {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Asks whether `prompt` is an actionable change request.
    #[instrument(skip_all)]
    pub async fn validate_prompt(&self, prompt: &str) -> Result<PromptVerdict, LlmError> {
        let mut conversation = Conversation::with_system(VALIDATE_SYSTEM_PROMPT);
        conversation.push(Role::User, format!("Change request:\n{prompt}"));
        let raw = self
            .complete(&conversation, ResponseFormat::JsonObject, VALIDATE_MAX_TOKENS)
            .await?;
        let body: VerdictBody = parse_json(&raw)?;
        debug!(is_valid = body.is_valid, reason = %body.reason, "prompt validated");
        Ok(if body.is_valid {
            PromptVerdict::Actionable {
                reason: body.reason,
            }
        } else {
            PromptVerdict::NotActionable {
                reason: body.reason,
            }
        })
    }

    /// Sends the repository tree and asks which files to read.
    ///
    /// Returns the conversation so far (system, request, model answer) so the
    /// later stages keep the same context.
    #[instrument(skip_all, fields(tree_bytes = tree.len()))]
    pub async fn analyze_repository(
        &self,
        tree: &str,
        prompt: &str,
    ) -> Result<(Conversation, Vec<RepoPath>), LlmError> {
        let mut conversation = Conversation::with_system(ANALYZE_SYSTEM_PROMPT);
        conversation.push(
            Role::User,
            format!(
                "Repository file structure:\n{tree}\n\nChange request:\n{prompt}\n\n\
                 Which files do I need to read?"
            ),
        );
        let raw = self
            .complete(&conversation, ResponseFormat::JsonObject, ANALYZE_MAX_TOKENS)
            .await?;
        conversation.push(Role::Assistant, raw.as_str());
        let body: FilesToReadBody = parse_json(&raw)?;
        Ok((conversation, to_paths(body.files_to_read)))
    }

    /// Shares the read files and asks which of them to change.
    ///
    /// The exchange is appended to `conversation`.
    #[instrument(skip_all, fields(files = contents.len()))]
    pub async fn plan_modifications(
        &self,
        conversation: &mut Conversation,
        contents: &BTreeMap<RepoPath, String>,
        prompt: &str,
    ) -> Result<ModificationPlan, LlmError> {
        let mut shared = String::from("Here are the contents of the files I read:\n\n");
        for (path, content) in contents {
            shared.push_str(&format!("=== {path} ===\n{content}\n\n"));
        }
        conversation.push(
            Role::User,
            format!(
                "{shared}Now decide which files must be changed to complete this request:\n{prompt}\n\n\
                 New files may be listed too. Describe the change in the past tense.\n\n\
                 Return ONLY a JSON object with this structure:\n\
                 {{\n  \"filesToModify\": [\"path/to/file1.ext\"],\n  \
                 \"explanation\": \"Short summary of the changes made\"\n}}"
            ),
        );
        let raw = self
            .complete(conversation, ResponseFormat::JsonObject, PLAN_MAX_TOKENS)
            .await?;
        conversation.push(Role::Assistant, raw.as_str());
        let body: FilesToModifyBody = parse_json(&raw)?;
        Ok(ModificationPlan {
            files: to_paths(body.files_to_modify),
            explanation: body.explanation.trim().to_string(),
        })
    }

    /// Asks for the complete new body of `path`.
    ///
    /// Works on a copy of `conversation`, so prompts for different files never
    /// see each other.
    #[instrument(skip_all, fields(path = %path))]
    pub async fn generate_file(
        &self,
        conversation: &Conversation,
        path: &RepoPath,
        original: &str,
        prompt: &str,
    ) -> Result<String, LlmError> {
        let mut scoped = conversation.clone();
        let original_section = if original.is_empty() {
            "The file does not exist yet; create it.".to_string()
        } else {
            format!("Original content:\n{original}")
        };
        scoped.push(
            Role::User,
            format!(
                "Provide the complete content for the file: {path}\n\n{original_section}\n\n\
                 Change request:\n{prompt}\n\n\
                 Return the WHOLE file with every change applied, including unchanged lines. \
                 Do not use placeholders such as \"... rest of file ...\".\n\
                 Reply with plain text exactly as it should be written to disk, not JSON."
            ),
        );
        let raw = self
            .complete(&scoped, ResponseFormat::Text, GENERATE_MAX_TOKENS)
            .await?;
        Ok(strip_code_fence(&raw).to_string())
    }

    async fn complete(
        &self,
        conversation: &Conversation,
        format: ResponseFormat,
        max_completion_tokens: u32,
    ) -> Result<String, LlmError> {
        self.model
            .chat(ChatRequest {
                messages: conversation.messages().to_vec(),
                format,
                max_completion_tokens,
            })
            .await
    }
}

fn to_paths(raw: Vec<String>) -> Vec<RepoPath> {
    let mut paths: Vec<RepoPath> = Vec::with_capacity(raw.len());
    for candidate in raw {
        let trimmed = candidate.trim().trim_start_matches("./");
        match RepoPath::new(trimmed) {
            Some(path) if !paths.contains(&path) => paths.push(path),
            Some(_) => {}
            None => warn!(candidate = %candidate, "model proposed an empty path"),
        }
    }
    paths
}

/// Parses a JSON object from model output, tolerating Markdown fences and
/// surrounding prose.
fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, LlmError> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    let object = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => return Err(LlmError::Unparseable(format!("no JSON object in: {}", preview(trimmed)))),
    };
    serde_json::from_str(object)
        .map_err(|e| LlmError::Unparseable(format!("{e}: {}", preview(trimmed))))
}

fn preview(raw: &str) -> String {
    raw.chars().take(200).collect()
}

/// Removes a Markdown code fence wrapping the whole reply.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return raw;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return raw;
    };
    match body.split_once('\n') {
        Some((_language, content)) => content,
        None => body,
    }
}
