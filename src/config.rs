use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

const CONFIG_FILE: &str = "preflight.toml";

/// Environment variable holding the generation/embedding API key.
pub const GOOGLE_API_KEY: &str = "GOOGLE_API_KEY";
/// Environment variable holding the memory store API key.
pub const PINECONE_API_KEY: &str = "PINECONE_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub tests: TestsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Full review/fix/test passes before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

/// Test command configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestsConfig {
    /// Command run from the repository root, e.g. "npm test" or "cargo test"
    #[serde(default = "default_test_command")]
    pub command: String,

    /// Seconds before the test command is killed and reported as failed
    #[serde(default = "default_test_timeout")]
    pub timeout_secs: u64,

    /// Captured output is cut down to its last `max_output_bytes` bytes
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            command: default_test_command(),
            timeout_secs: default_test_timeout(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl TestsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Generation (Gemini) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model used for review and fix generation
    #[serde(default = "default_model")]
    pub model: String,

    /// Model used for memory embeddings
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_review_temperature")]
    pub review_temperature: f32,

    #[serde(default = "default_fix_temperature")]
    pub fix_temperature: f32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            review_temperature: default_review_temperature(),
            fix_temperature: default_fix_temperature(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Memory store (Pinecone) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_index")]
    pub index: String,

    /// Empty string selects the default namespace
    #[serde(default)]
    pub namespace: String,

    /// Snippets recalled per review
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_control_plane_url")]
    pub control_plane_url: String,

    /// Data-plane host; looked up from the index when empty
    #[serde(default)]
    pub host: String,

    /// Per-request timeout for memory calls
    #[serde(default = "default_memory_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            index: default_index(),
            namespace: String::new(),
            top_k: default_top_k(),
            control_plane_url: default_control_plane_url(),
            host: String::new(),
            request_timeout_secs: default_memory_timeout(),
        }
    }
}

// Default value functions
fn default_max_attempts() -> u32 {
    3
}

fn default_test_command() -> String {
    "npm test".to_string()
}

fn default_test_timeout() -> u64 {
    60
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

fn default_llm_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-004".to_string()
}

fn default_review_temperature() -> f32 {
    0.1
}

fn default_fix_temperature() -> f32 {
    0.2
}

fn default_request_timeout() -> u64 {
    120
}

fn default_index() -> String {
    "preflight-memory".to_string()
}

fn default_top_k() -> usize {
    3
}

fn default_control_plane_url() -> String {
    "https://api.pinecone.io".to_string()
}

fn default_memory_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from file, using defaults if not found
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }

    /// Apply command-line overrides and check the result.
    pub fn with_overrides(mut self, overrides: Overrides) -> Result<Self> {
        if let Some(max_attempts) = overrides.max_attempts {
            self.run.max_attempts = max_attempts;
        }
        if let Some(command) = overrides.test_command {
            self.tests.command = command;
        }
        if let Some(index) = overrides.index.filter(|i| !i.is_empty()) {
            self.memory.index = index;
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.run.max_attempts == 0 {
            bail!("run.max_attempts must be at least 1");
        }
        if self.tests.command.trim().is_empty() {
            bail!("tests.command cannot be empty");
        }
        if self.tests.timeout_secs == 0 {
            bail!("tests.timeout_secs must be at least 1");
        }
        if self.memory.request_timeout_secs == 0 {
            bail!("memory.request_timeout_secs must be at least 1");
        }
        Ok(())
    }
}

/// Values supplied on the command line (or via their environment variables).
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub max_attempts: Option<u32>,
    pub test_command: Option<String>,
    pub index: Option<String>,
}

/// API credentials for the generation and memory services.
#[derive(Clone)]
pub struct Credentials {
    pub google_api_key: String,
    pub pinecone_api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("google_api_key", &"<redacted>")
            .field("pinecone_api_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Read credentials from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Internal helper with an explicit lookup.
    /// Enables testing without modifying actual environment.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let require = |key: &str| -> Result<String> {
            match lookup(key) {
                Some(value) if !value.trim().is_empty() => Ok(value),
                _ => bail!("{key} environment variable is required"),
            }
        };

        Ok(Self {
            google_api_key: require(GOOGLE_API_KEY)?,
            pinecone_api_key: require(PINECONE_API_KEY)?,
        })
    }
}
