//! Natural language to shell command generation.

use std::time::Duration;

use crate::backend::Backend;
use crate::config::ClaiConfig;
use crate::error::{Error, Result};
use crate::observability::{COMMANDS_GENERATED, COMMAND_GENERATION_ERRORS};

/// Builds the instruction sent to the model for `request`.
pub fn command_prompt(request: &str) -> String {
    format!(
        "You are a bash command generator. Convert the request into a single bash command.

CRITICAL RULES:
- Output ONLY the bash command itself
- NO explanations, descriptions, or commentary
- NO markdown formatting or backticks
- NO \"Here's the command:\" or similar phrases
- Single line preferred (use && or ; for multiple operations)
- Use standard Unix/Linux/macOS commands

Request: {request}

Bash command:"
    )
}

/// Cleans up the artifacts models commonly wrap around a command.
///
/// Surrounding whitespace and backticks are removed, then a leading `bash`
/// or `sh` language tag line, then any whitespace the fence left behind.
/// Backticks are trimmed blindly, so `` echo `date` `` comes back as
/// `` echo `date ``.
pub fn sanitize_command(raw: &str) -> String {
    let command = raw.trim().trim_matches('`');
    let command = command
        .strip_prefix("bash\n")
        .or_else(|| command.strip_prefix("sh\n"))
        .unwrap_or(command);
    command.trim().to_string()
}

/// Pattern-matched commands for offline use.
pub fn dummy_command(prompt: &str) -> String {
    let prompt = prompt.to_lowercase();
    let has = |needle: &str| prompt.contains(needle);

    if has("copy") && has(".txt") {
        "cp *.txt /tmp/backup/".to_string()
    } else if has("copy") && has("files") {
        "cp -r ./files /tmp/backup/".to_string()
    } else if has("list") {
        "ls -la".to_string()
    } else if has("disk") {
        "df -h".to_string()
    } else if has("compress") || has("zip") {
        "tar -czf backup.tar.gz *.txt".to_string()
    } else if has("delete") || has("remove") {
        "rm -i unwanted_file.txt".to_string()
    } else {
        format!("echo 'Dummy command for: {prompt}'")
    }
}

/// Turns a prompt into a candidate shell command.
pub struct CommandGenerator<B: Backend> {
    backend: B,
    model: String,
    timeout: Duration,
    dummy: bool,
}

impl<B: Backend> CommandGenerator<B> {
    /// Creates a generator that calls `backend` with the configured model.
    pub fn new(backend: B, config: &ClaiConfig) -> Self {
        Self {
            backend,
            model: config.model.clone(),
            timeout: config.command_timeout,
            dummy: config.dummy,
        }
    }

    /// Returns the model this generator asks for.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generates a command for `prompt`.
    ///
    /// The prompt must already have passed the length check.  In dummy mode
    /// the backend is never called.
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        if self.dummy {
            return Ok(dummy_command(prompt));
        }

        let reply = self
            .backend
            .generate(&self.model, &command_prompt(prompt), self.timeout)
            .await
            .inspect_err(|err| {
                COMMAND_GENERATION_ERRORS.click();
                tracing::warn!(model = %self.model, error = %err, "command generation failed");
            })?;

        let command = sanitize_command(&reply);
        if command.is_empty() {
            COMMAND_GENERATION_ERRORS.click();
            return Err(Error::EmptyResponse);
        }
        COMMANDS_GENERATED.click();
        tracing::debug!(model = %self.model, %command, "generated command");
        Ok(command)
    }
}
