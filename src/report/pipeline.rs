//! Document pipelines: template fill plus optional external conversion

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;
use handlebars::Handlebars;
use thiserror::Error;
use tracing::{debug, info};

use super::ReportModel;

const DEFAULT_TEMPLATE: &str = include_str!("default_template.hbs");

/// Errors from rendering or converting a report
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("template rendering failed: {0}")]
    Template(String),

    #[error("converter `{0}` is not installed or not in PATH")]
    ConverterNotFound(String),

    #[error("converter exited with {status}: {stderr}")]
    ConversionFailed { status: String, stderr: String },

    #[error("converter produced no output at {0}")]
    MissingOutput(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bytes of a finished document
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    pub extension: String,
}

/// Renders a [`ReportModel`] into a fixed-format document.
///
/// `workdir` is a scratch directory owned by the caller and removed after the
/// call returns.
pub trait DocumentPipeline: Send + Sync {
    fn render(&self, model: &ReportModel, workdir: &Path)
        -> Result<RenderedDocument, PipelineError>;

    /// Extension of the documents this pipeline produces
    fn extension(&self) -> &str;
}

/// External conversion step, e.g. `soffice --headless --convert-to pdf`.
///
/// `{input}` and `{outdir}` in the arguments are replaced with the rendered
/// file and the output directory. The converter must write
/// `<outdir>/<input stem>.<extension>`.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    program: String,
    args: Vec<String>,
    extension: String,
}

impl CommandConverter {
    pub fn new(program: impl Into<String>, args: Vec<String>, extension: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            extension: extension.into(),
        }
    }

    /// LibreOffice headless PDF export
    pub fn libreoffice_pdf() -> Self {
        Self::new(
            "soffice",
            ["--headless", "--convert-to", "pdf", "--outdir", "{outdir}", "{input}"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            "pdf",
        )
    }

    /// Resolve the program on PATH
    pub fn locate(&self) -> Result<PathBuf, PipelineError> {
        which::which(&self.program).map_err(|_| PipelineError::ConverterNotFound(self.program.clone()))
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Run the converter and return the produced file
    pub fn convert(&self, input: &Path, outdir: &Path) -> Result<PathBuf, PipelineError> {
        let input_arg = input.to_string_lossy();
        let outdir_arg = outdir.to_string_lossy();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace("{input}", &input_arg).replace("{outdir}", &outdir_arg))
            .collect();

        let program = self.locate()?;
        debug!("Running converter {} {:?}", program.display(), args);
        let output = Command::new(&program).args(&args).output()?;

        if !output.status.success() {
            return Err(PipelineError::ConversionFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let produced = outdir.join(format!("{stem}.{}", self.extension));
        if produced.is_file() {
            Ok(produced)
        } else {
            Err(PipelineError::MissingOutput(produced))
        }
    }
}

/// Handlebars template fill, optionally followed by a [`CommandConverter`]
#[derive(Debug, Clone)]
pub struct HandlebarsPipeline {
    template: String,
    extension: String,
    converter: Option<CommandConverter>,
}

impl Default for HandlebarsPipeline {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE, "html")
    }
}

impl HandlebarsPipeline {
    pub fn new(template: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            extension: extension.into(),
            converter: None,
        }
    }

    /// Load a template from disk
    pub fn from_template_file(path: &Path, extension: impl Into<String>) -> anyhow::Result<Self> {
        let template = fs::read_to_string(path)
            .with_context(|| format!("Failed to read report template: {}", path.display()))?;
        info!("Using report template {}", path.display());
        Ok(Self::new(template, extension))
    }

    pub fn with_converter(mut self, converter: CommandConverter) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Fill the template with the model
    pub fn render_text(&self, model: &ReportModel) -> Result<String, PipelineError> {
        let mut hbs = Handlebars::new();
        hbs.set_strict_mode(false);
        hbs.render_template(&self.template, model)
            .map_err(|e| PipelineError::Template(e.to_string()))
    }
}

impl DocumentPipeline for HandlebarsPipeline {
    fn render(
        &self,
        model: &ReportModel,
        workdir: &Path,
    ) -> Result<RenderedDocument, PipelineError> {
        let text = self.render_text(model)?;

        let Some(converter) = &self.converter else {
            return Ok(RenderedDocument {
                bytes: text.into_bytes(),
                extension: self.extension.clone(),
            });
        };

        let filled = workdir.join(format!("incident_{}.{}", model.incident_id, self.extension));
        fs::write(&filled, text)?;
        let outdir = workdir.join("converted");
        fs::create_dir_all(&outdir)?;

        let produced = converter.convert(&filled, &outdir)?;
        Ok(RenderedDocument {
            bytes: fs::read(&produced)?,
            extension: converter.extension().to_string(),
        })
    }

    fn extension(&self) -> &str {
        self.converter
            .as_ref()
            .map_or(self.extension.as_str(), CommandConverter::extension)
    }
}
