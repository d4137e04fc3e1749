use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::progress::ScoringPolicy;
use crate::report::DEFAULT_DATE_FORMAT;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Step plan catalog JSON; the builtin catalog is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_uploads")]
    pub uploads: String,
    #[serde(default = "default_reports")]
    pub reports: String,
    #[serde(default = "default_logs")]
    pub logs: String,
}

fn default_database() -> String {
    ".playbook/playbook.db".to_string()
}

fn default_uploads() -> String {
    ".playbook/uploads".to_string()
}

fn default_reports() -> String {
    ".playbook/reports".to_string()
}

fn default_logs() -> String {
    ".playbook/logs".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            catalog: None,
            database: default_database(),
            uploads: default_uploads(),
            reports: default_reports(),
            logs: default_logs(),
        }
    }
}

/// Completion scoring configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// How lessons-learned counts toward the percentage (independent, gated)
    #[serde(default)]
    pub scoring: ScoringPolicy,
}

/// Report rendering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Handlebars template file; the embedded HTML template is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Extension of the filled template
    #[serde(default = "default_report_extension")]
    pub extension: String,
    /// External converter run on the filled template (e.g. LibreOffice)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converter: Option<ConverterConfig>,
    /// chrono format string for dates shown in reports
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

fn default_report_extension() -> String {
    "html".to_string()
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            template: None,
            extension: default_report_extension(),
            converter: None,
            date_format: default_date_format(),
        }
    }
}

/// External document converter.
///
/// `{input}` and `{outdir}` in `args` are substituted at run time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extension of the converted document
    pub extension: String,
}

/// REST API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_host() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    7010
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether the API server logs to a file in the logs directory instead of stderr
    #[serde(default)]
    pub to_file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            to_file: false,
        }
    }
}

/// Resolve a configured path against the working directory
fn absolute(path: &str) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir().unwrap_or_default().join(path)
    }
}

impl Config {
    /// Path to the project config file
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".playbook/config.toml")
    }

    pub fn load(config_path: Option<&str>) -> Result<Self> {
        // Embedded defaults first so the tool works without any config file
        let defaults = Config::default();
        let defaults_json =
            serde_json::to_string(&defaults).context("Failed to serialize default config")?;

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        let project_config = Self::project_config_path();
        if project_config.exists() {
            builder = builder.add_source(config::File::from(project_config));
        }

        // User config in ~/.config/playbook/ (optional global overrides)
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("playbook").join("config.toml");
            if user_config.exists() {
                builder = builder.add_source(config::File::from(user_config));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // e.g. PLAYBOOK__PROGRESS__SCORING=gated
        builder = builder.add_source(
            config::Environment::with_prefix("PLAYBOOK")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to load configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Save config to `.playbook/config.toml`
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::project_config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_str =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(path, toml_str).context("Failed to write config file")?;
        Ok(())
    }

    pub fn catalog_path(&self) -> Option<PathBuf> {
        self.paths.catalog.as_deref().map(absolute)
    }

    pub fn database_path(&self) -> PathBuf {
        absolute(&self.paths.database)
    }

    pub fn uploads_path(&self) -> PathBuf {
        absolute(&self.paths.uploads)
    }

    pub fn reports_path(&self) -> PathBuf {
        absolute(&self.paths.reports)
    }

    pub fn logs_path(&self) -> PathBuf {
        absolute(&self.paths.logs)
    }

    pub fn template_path(&self) -> Option<PathBuf> {
        self.report.template.as_deref().map(absolute)
    }

    /// Socket address string for the API server
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}
