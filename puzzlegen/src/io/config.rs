//! Generator configuration stored in `puzzlegen.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::backends::{BackendKind, GenerationOptions};

pub const DEFAULT_CONFIG_FILE: &str = "puzzlegen.toml";

/// Generator configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to values that
/// work against a local Ollama install and a PATH-visible SWI-Prolog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Directory for generated artifacts. Defaults to `<temp>/puzzlegen`.
    pub output_dir: Option<PathBuf>,

    /// Maximum number of repair calls per request.
    pub max_fix_retries: u32,

    /// Backend used when a request names none, or one that is not recognized.
    pub default_backend: BackendKind,

    /// Goal run against generated programs when the request supplies none.
    /// Written as `""` when unset, which loads the program without a goal.
    #[serde(
        serialize_with = "serialize_goal",
        deserialize_with = "deserialize_goal"
    )]
    pub default_goal: Option<String>,

    /// Directory holding `idea.md`, `code.md` and/or `fix.md` template overrides.
    pub templates_dir: Option<PathBuf>,

    /// Per-completion HTTP timeout in seconds.
    pub request_timeout_secs: u64,

    pub interpreter: InterpreterConfig,
    pub sampling: SamplingConfig,
    pub backends: BackendsConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            max_fix_retries: 3,
            default_backend: BackendKind::Ollama,
            default_goal: Some("main".to_string()),
            templates_dir: None,
            request_timeout_secs: 300,
            interpreter: InterpreterConfig::default(),
            sampling: SamplingConfig::default(),
            backends: BackendsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Explicit interpreter binary; skips discovery when set.
    pub path: Option<PathBuf>,
    /// Wall-clock limit for one interpreter run.
    pub timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes (per stream).
    pub output_limit_bytes: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            path: None,
            timeout_secs: 30,
            output_limit_bytes: 100_000,
        }
    }
}

/// Sampling options per phase: creative ideas, deterministic code and fixes.
///
/// A phase table may set any subset of fields; the rest come from that
/// phase's defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    #[serde(deserialize_with = "deserialize_idea_options")]
    pub idea: GenerationOptions,
    #[serde(deserialize_with = "deserialize_code_options")]
    pub code: GenerationOptions,
    #[serde(deserialize_with = "deserialize_fix_options")]
    pub fix: GenerationOptions,
}

impl SamplingConfig {
    fn idea_defaults() -> GenerationOptions {
        GenerationOptions {
            max_tokens: 1024,
            temperature: 0.9,
            top_p: 0.95,
            repeat_penalty: 1.1,
        }
    }

    fn code_defaults() -> GenerationOptions {
        GenerationOptions {
            max_tokens: 4096,
            temperature: 0.2,
            top_p: 0.9,
            repeat_penalty: 1.05,
        }
    }

    fn fix_defaults() -> GenerationOptions {
        GenerationOptions {
            temperature: 0.1,
            ..Self::code_defaults()
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            idea: Self::idea_defaults(),
            code: Self::code_defaults(),
            fix: Self::fix_defaults(),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialOptions {
    max_tokens: Option<u32>,
    temperature: Option<f64>,
    top_p: Option<f64>,
    repeat_penalty: Option<f64>,
}

impl PartialOptions {
    fn or_defaults(self, defaults: GenerationOptions) -> GenerationOptions {
        GenerationOptions {
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            repeat_penalty: self.repeat_penalty.unwrap_or(defaults.repeat_penalty),
        }
    }
}

fn deserialize_idea_options<'de, D>(d: D) -> Result<GenerationOptions, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(PartialOptions::deserialize(d)?.or_defaults(SamplingConfig::idea_defaults()))
}

fn deserialize_code_options<'de, D>(d: D) -> Result<GenerationOptions, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(PartialOptions::deserialize(d)?.or_defaults(SamplingConfig::code_defaults()))
}

fn deserialize_fix_options<'de, D>(d: D) -> Result<GenerationOptions, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(PartialOptions::deserialize(d)?.or_defaults(SamplingConfig::fix_defaults()))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl EndpointConfig {
    /// Stock endpoint for `kind`, used to fill fields a `[backends.*]` table omits.
    pub fn default_for(kind: BackendKind) -> Self {
        let (base_url, model) = match kind {
            BackendKind::Ollama => ("http://127.0.0.1:11434", "llama3.1"),
            BackendKind::LmStudio => ("http://127.0.0.1:1234", "local-model"),
            BackendKind::OpenAi => ("https://api.openai.com", "gpt-4o-mini"),
            BackendKind::Local => ("http://127.0.0.1:8080", "local"),
        };
        Self {
            base_url: base_url.to_string(),
            model: model.to_string(),
            api_key: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialEndpoint {
    base_url: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
}

impl PartialEndpoint {
    fn or_defaults(self, defaults: EndpointConfig) -> EndpointConfig {
        EndpointConfig {
            base_url: self.base_url.unwrap_or(defaults.base_url),
            model: self.model.unwrap_or(defaults.model),
            api_key: self.api_key.or(defaults.api_key),
        }
    }
}

fn deserialize_endpoint<'de, D: Deserializer<'de>>(
    d: D,
    kind: BackendKind,
) -> Result<Option<EndpointConfig>, D::Error> {
    Ok(Option::<PartialEndpoint>::deserialize(d)?
        .map(|partial| partial.or_defaults(EndpointConfig::default_for(kind))))
}

fn deserialize_ollama<'de, D>(d: D) -> Result<Option<EndpointConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_endpoint(d, BackendKind::Ollama)
}

fn deserialize_lmstudio<'de, D>(d: D) -> Result<Option<EndpointConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_endpoint(d, BackendKind::LmStudio)
}

fn deserialize_openai<'de, D>(d: D) -> Result<Option<EndpointConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_endpoint(d, BackendKind::OpenAi)
}

fn deserialize_local<'de, D>(d: D) -> Result<Option<EndpointConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_endpoint(d, BackendKind::Local)
}

/// Endpoints per backend kind. A kind without a table is not configured; a
/// table may set any subset of fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendsConfig {
    #[serde(
        deserialize_with = "deserialize_ollama",
        skip_serializing_if = "Option::is_none"
    )]
    pub ollama: Option<EndpointConfig>,
    #[serde(
        deserialize_with = "deserialize_lmstudio",
        skip_serializing_if = "Option::is_none"
    )]
    pub lmstudio: Option<EndpointConfig>,
    #[serde(
        deserialize_with = "deserialize_openai",
        skip_serializing_if = "Option::is_none"
    )]
    pub openai: Option<EndpointConfig>,
    #[serde(
        deserialize_with = "deserialize_local",
        skip_serializing_if = "Option::is_none"
    )]
    pub local: Option<EndpointConfig>,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            ollama: Some(EndpointConfig::default_for(BackendKind::Ollama)),
            lmstudio: Some(EndpointConfig::default_for(BackendKind::LmStudio)),
            openai: None,
            local: Some(EndpointConfig::default_for(BackendKind::Local)),
        }
    }
}

impl BackendsConfig {
    /// Configured endpoints, in [`BackendKind::ALL`] order.
    pub fn endpoints(&self) -> Vec<(BackendKind, &EndpointConfig)> {
        BackendKind::ALL
            .into_iter()
            .filter_map(|kind| self.get(kind).map(|endpoint| (kind, endpoint)))
            .collect()
    }

    pub fn get(&self, kind: BackendKind) -> Option<&EndpointConfig> {
        match kind {
            BackendKind::Ollama => self.ollama.as_ref(),
            BackendKind::LmStudio => self.lmstudio.as_ref(),
            BackendKind::OpenAi => self.openai.as_ref(),
            BackendKind::Local => self.local.as_ref(),
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            return Err(anyhow!("request_timeout_secs must be > 0"));
        }
        if self.interpreter.timeout_secs == 0 {
            return Err(anyhow!("interpreter.timeout_secs must be > 0"));
        }
        if self.interpreter.output_limit_bytes == 0 {
            return Err(anyhow!("interpreter.output_limit_bytes must be > 0"));
        }
        for (phase, options) in [
            ("idea", &self.sampling.idea),
            ("code", &self.sampling.code),
            ("fix", &self.sampling.fix),
        ] {
            if options.max_tokens == 0 {
                return Err(anyhow!("sampling.{phase}.max_tokens must be > 0"));
            }
            if !(0.0..=2.0).contains(&options.temperature) {
                return Err(anyhow!("sampling.{phase}.temperature must be within 0..=2"));
            }
            if !(0.0..=1.0).contains(&options.top_p) || options.top_p == 0.0 {
                return Err(anyhow!("sampling.{phase}.top_p must be within (0, 1]"));
            }
        }
        for (kind, endpoint) in self.backends.endpoints() {
            if endpoint.base_url.trim().is_empty() || endpoint.model.trim().is_empty() {
                return Err(anyhow!(
                    "backends.{} needs a non-empty base_url and model",
                    kind.as_str()
                ));
            }
        }
        if self.backends.get(self.default_backend).is_none() {
            return Err(anyhow!(
                "default_backend '{}' has no [backends.{}] section",
                self.default_backend.as_str(),
                self.default_backend.as_str()
            ));
        }
        Ok(())
    }

    /// Artifact directory, falling back to a subdirectory of the system temp dir.
    pub fn resolved_output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("puzzlegen"))
    }
}

fn serialize_goal<S: Serializer>(goal: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(goal.as_deref().unwrap_or(""))
}

fn deserialize_goal<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let goal = String::deserialize(d)?;
    Ok(Some(goal).filter(|goal| !goal.trim().is_empty()))
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `GeneratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<GeneratorConfig> {
    if !path.exists() {
        let cfg = GeneratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GeneratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &GeneratorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, GeneratorConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("puzzlegen.toml");
        let cfg = GeneratorConfig {
            max_fix_retries: 5,
            output_dir: Some(temp.path().join("games")),
            ..GeneratorConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("puzzlegen.toml");
        fs::write(
            &path,
            "max_fix_retries = 1\ndefault_backend = \"lmstudio\"\n\n[interpreter]\ntimeout_secs = 5\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_fix_retries, 1);
        assert_eq!(cfg.default_backend, BackendKind::LmStudio);
        assert_eq!(cfg.interpreter.timeout_secs, 5);
        assert_eq!(cfg.interpreter.output_limit_bytes, 100_000);
        assert_eq!(cfg.sampling, SamplingConfig::default());
    }

    #[test]
    fn default_backend_must_be_configured() {
        let cfg = GeneratorConfig {
            default_backend: BackendKind::OpenAi,
            ..GeneratorConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("default_backend"));
    }

    #[test]
    fn rejects_zero_timeouts() {
        let mut cfg = GeneratorConfig::default();
        cfg.interpreter.timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_sampling_table_keeps_phase_defaults() {
        let cfg: GeneratorConfig =
            toml::from_str("[sampling.code]\ntemperature = 0.3\n").expect("parse");
        assert_eq!(cfg.sampling.code.temperature, 0.3);
        assert_eq!(cfg.sampling.code.max_tokens, 4096);
        assert_eq!(cfg.sampling.code.top_p, 0.9);
        assert_eq!(cfg.sampling.idea, SamplingConfig::default().idea);
        assert_eq!(cfg.sampling.fix, SamplingConfig::default().fix);
    }

    #[test]
    fn partial_backend_table_keeps_kind_defaults() {
        let cfg: GeneratorConfig = toml::from_str(
            "[backends.ollama]\nmodel = \"qwen2.5\"\n\n[backends.openai]\napi_key = \"sk-test\"\n",
        )
        .expect("parse");
        let ollama = cfg.backends.get(BackendKind::Ollama).expect("ollama");
        assert_eq!(ollama.base_url, "http://127.0.0.1:11434");
        assert_eq!(ollama.model, "qwen2.5");
        let openai = cfg.backends.get(BackendKind::OpenAi).expect("openai");
        assert_eq!(openai.base_url, "https://api.openai.com");
        assert_eq!(openai.api_key.as_deref(), Some("sk-test"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn unknown_option_keys_are_rejected() {
        let err = toml::from_str::<GeneratorConfig>("[sampling.idea]\ntemprature = 0.5\n")
            .unwrap_err();
        assert!(err.to_string().contains("temprature"), "{err}");
    }

    #[test]
    fn empty_default_goal_round_trips_as_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("puzzlegen.toml");
        let cfg = GeneratorConfig {
            default_goal: None,
            ..GeneratorConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        assert!(
            fs::read_to_string(&path)
                .expect("read")
                .contains("default_goal = \"\"")
        );
        assert_eq!(load_config(&path).expect("load").default_goal, None);

        let omitted: GeneratorConfig = toml::from_str("max_fix_retries = 2\n").expect("parse");
        assert_eq!(omitted.default_goal.as_deref(), Some("main"));
    }
}
