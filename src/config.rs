//! Configuration for the clai tools.
//!
//! Command-line arguments are parsed with `arrrg` into one of the `*Args`
//! structs and resolved into a [`ClaiConfig`], which is then passed to each
//! component's constructor.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::error::{Error, Result};

/// Default Ollama model.
pub const DEFAULT_MODEL: &str = "codellama:7b";

/// Default Ollama endpoint.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Default maximum prompt length, in characters.
pub const DEFAULT_MAX_PROMPT_LENGTH: usize = 500;

/// Wall-clock budget for generating a command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Wall-clock budget for a non-streaming chat reply.
pub const DEFAULT_CHAT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default port for the web server.
pub const DEFAULT_PORT: u16 = 8080;

/// Command-line arguments for the `clai` command generator.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct CommandArgs {
    /// Start in REPL mode.
    #[arrrg(flag, "Start in REPL (interactive) mode")]
    pub repl: bool,

    /// Model to use.
    #[arrrg(optional, "Ollama model to use (default: codellama:7b)", "MODEL")]
    pub model: Option<String>,

    /// Backend URL.
    #[arrrg(optional, "Ollama base URL (default: $OLLAMA_HOST or http://localhost:11434)", "URL")]
    pub base_url: Option<String>,

    /// Maximum prompt length.
    #[arrrg(optional, "Maximum prompt length in characters (default: 500)", "CHARS")]
    pub max_prompt_length: Option<usize>,

    /// Use the offline generator.
    #[arrrg(flag, "Use dummy AI (no Ollama required)")]
    pub dummy: bool,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    /// Print the version and exit.
    #[arrrg(flag, "Print the version and exit")]
    pub version: bool,
}

/// Command-line arguments for the `clai-chat` tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Answer a single prompt and exit.
    #[arrrg(flag, "Single-shot mode instead of REPL")]
    pub no_repl: bool,

    /// Model to use.
    #[arrrg(optional, "Ollama model to use (default: codellama:7b)", "MODEL")]
    pub model: Option<String>,

    /// Backend URL.
    #[arrrg(optional, "Ollama base URL (default: $OLLAMA_HOST or http://localhost:11434)", "URL")]
    pub base_url: Option<String>,

    /// Maximum prompt length.
    #[arrrg(optional, "Maximum prompt length in characters (default: 500)", "CHARS")]
    pub max_prompt_length: Option<usize>,

    /// Use the offline backend.
    #[arrrg(flag, "Use dummy AI (no Ollama required)")]
    pub dummy: bool,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    /// Print the version and exit.
    #[arrrg(flag, "Print the version and exit")]
    pub version: bool,
}

/// Command-line arguments for the `clai-webui` server.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ServeArgs {
    /// Port to listen on.
    #[arrrg(optional, "Port to run web server on (default: 8080)", "PORT")]
    pub port: Option<u16>,

    /// Conversation store location.
    #[arrrg(optional, "Path of the conversation store (default: $XDG_DATA_HOME/clai/clai.db)", "FILE")]
    pub data_file: Option<String>,

    /// Model to use when a request does not name one.
    #[arrrg(optional, "Ollama model to use (default: codellama:7b)", "MODEL")]
    pub model: Option<String>,

    /// Backend URL.
    #[arrrg(optional, "Ollama base URL (default: $OLLAMA_HOST or http://localhost:11434)", "URL")]
    pub base_url: Option<String>,

    /// Maximum prompt length.
    #[arrrg(optional, "Maximum message length in characters (default: 500)", "CHARS")]
    pub max_prompt_length: Option<usize>,

    /// Use the offline backend.
    #[arrrg(flag, "Use dummy AI (no Ollama required)")]
    pub dummy: bool,

    /// Print the version and exit.
    #[arrrg(flag, "Print the version and exit")]
    pub version: bool,
}

/// Resolved configuration shared by every component.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaiConfig {
    /// Model used when a request does not name one.
    pub model: String,

    /// Root URL of the Ollama server.
    pub base_url: String,

    /// Whether to use the offline generator and backend.
    pub dummy: bool,

    /// Maximum prompt length, in characters.
    pub max_prompt_length: usize,

    /// Budget for a single command-generation call.
    pub command_timeout: Duration,

    /// Budget for a single non-streaming chat call.
    pub chat_timeout: Duration,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ClaiConfig {
    /// Creates a new ClaiConfig with default values.
    ///
    /// The base URL honors `OLLAMA_HOST` when it is set.
    pub fn new() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: default_base_url(),
            dummy: false,
            max_prompt_length: DEFAULT_MAX_PROMPT_LENGTH,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            chat_timeout: DEFAULT_CHAT_TIMEOUT,
            use_color: true,
        }
    }

    /// Sets the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the backend URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Enables or disables the offline generator.
    pub fn with_dummy(mut self, dummy: bool) -> Self {
        self.dummy = dummy;
        self
    }

    /// Sets the maximum prompt length.
    pub fn with_max_prompt_length(mut self, max_prompt_length: usize) -> Self {
        self.max_prompt_length = max_prompt_length;
        self
    }

    /// Sets the command-generation timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the non-streaming chat timeout.
    pub fn with_chat_timeout(mut self, timeout: Duration) -> Self {
        self.chat_timeout = timeout;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// Rejects prompts longer than the configured maximum.
    pub fn validate_prompt(&self, prompt: &str) -> Result<()> {
        let length = prompt.chars().count();
        if length > self.max_prompt_length {
            return Err(Error::validation(
                format!(
                    "prompt too long ({length} characters, max {})",
                    self.max_prompt_length
                ),
                Some("prompt".to_string()),
            ));
        }
        Ok(())
    }

    fn apply_common(
        mut self,
        model: Option<String>,
        base_url: Option<String>,
        max_prompt_length: Option<usize>,
        dummy: bool,
    ) -> Self {
        if let Some(model) = model {
            self.model = model;
        }
        if let Some(base_url) = base_url {
            self.base_url = base_url;
        }
        if let Some(max) = max_prompt_length {
            self.max_prompt_length = max;
        }
        self.dummy = dummy;
        self
    }
}

impl Default for ClaiConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&CommandArgs> for ClaiConfig {
    fn from(args: &CommandArgs) -> Self {
        let config = ClaiConfig::new().apply_common(
            args.model.clone(),
            args.base_url.clone(),
            args.max_prompt_length,
            args.dummy,
        );
        if args.no_color {
            config.without_color()
        } else {
            config
        }
    }
}

impl From<&ChatArgs> for ClaiConfig {
    fn from(args: &ChatArgs) -> Self {
        let config = ClaiConfig::new().apply_common(
            args.model.clone(),
            args.base_url.clone(),
            args.max_prompt_length,
            args.dummy,
        );
        if args.no_color {
            config.without_color()
        } else {
            config
        }
    }
}

impl From<&ServeArgs> for ClaiConfig {
    fn from(args: &ServeArgs) -> Self {
        ClaiConfig::new()
            .apply_common(
                args.model.clone(),
                args.base_url.clone(),
                args.max_prompt_length,
                args.dummy,
            )
            .without_color()
    }
}

fn default_base_url() -> String {
    match env::var("OLLAMA_HOST") {
        Ok(host) if !host.trim().is_empty() => {
            let host = host.trim();
            if host.starts_with("http://") || host.starts_with("https://") {
                host.to_string()
            } else {
                format!("http://{host}")
            }
        }
        _ => DEFAULT_BASE_URL.to_string(),
    }
}

/// Returns the line printed by `--version`, e.g. `clai 0.4.0 linux/x86_64`.
pub fn version_line() -> String {
    format!(
        "clai {} {}/{}",
        env!("CARGO_PKG_VERSION"),
        env::consts::OS,
        env::consts::ARCH
    )
}

/// Returns the default location of the conversation store.
///
/// Follows `$XDG_DATA_HOME`, falling back to `~/.local/share`.
pub fn default_data_file() -> Result<PathBuf> {
    let data_dir = match env::var_os("XDG_DATA_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .ok_or_else(|| {
                Error::validation(
                    "cannot determine home directory; pass --data-file",
                    Some("data_file".to_string()),
                )
            })?
            .join(".local")
            .join("share"),
    };
    Ok(data_dir.join("clai").join("clai.db"))
}
