//! Application configuration.
//!
//! Configuration is read from a TOML file only when one is passed with
//! `--config`; otherwise the built-in defaults apply. Command-line flags
//! override file values. Nothing is ever written back.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::export::pdf::{PageSize, PdfOptions};
use crate::export::OutputFormat;
use crate::parser::mbox::{MAX_MESSAGE_SIZE, READ_BUFFER_SIZE};
use crate::pipeline::{ConvertOptions, DEFAULT_BATCH_SIZE};
use crate::render::RenderOptions;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Document layout settings.
    pub render: RenderConfig,
    /// Performance tuning.
    pub performance: PerformanceConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Output format: "pdf" or "html".
    pub format: String,
}

/// Document layout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Document title written into the metadata.
    pub title: String,
    /// Paper size: "a4" or "letter".
    pub page_size: String,
    /// Page margin in points.
    pub margin: f32,
    /// Body font size in points.
    pub font_size: f32,
    /// Inline image attachments and `cid:`/`data:` pictures.
    pub embed_images: bool,
    /// HTML bodies larger than this (bytes) get a placeholder.
    pub max_html_bytes: usize,
    /// HTML nested deeper than this gets a placeholder.
    pub max_dom_depth: usize,
}

/// Performance tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Worker threads (0 or 1 = sequential).
    pub jobs: usize,
    /// Messages per parallel batch.
    pub batch_size: usize,
    /// Read buffer size in bytes (default: 1048576 = 1 MB).
    pub read_buffer_size: usize,
    /// Maximum message size in bytes (default: 268435456 = 256 MB).
    pub max_message_size: usize,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            format: "pdf".to_string(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        let pdf = PdfOptions::default();
        let render = RenderOptions::default();
        Self {
            title: pdf.title,
            page_size: "a4".to_string(),
            margin: pdf.margin,
            font_size: pdf.font_size,
            embed_images: render.embed_images,
            max_html_bytes: render.max_html_bytes,
            max_dom_depth: render.max_dom_depth,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            jobs: 1,
            batch_size: DEFAULT_BATCH_SIZE,
            read_buffer_size: READ_BUFFER_SIZE, // 1 MB
            max_message_size: MAX_MESSAGE_SIZE, // 256 MB
        }
    }
}

impl Config {
    /// Pipeline options described by this configuration.
    ///
    /// Unknown format or page-size strings fall back to the defaults with a
    /// warning.
    pub fn convert_options(&self) -> ConvertOptions {
        let format = match self.general.format.to_ascii_lowercase().as_str() {
            "pdf" => OutputFormat::Pdf,
            "html" => OutputFormat::Html,
            other => {
                tracing::warn!(format = other, "Unknown output format in config, using pdf");
                OutputFormat::Pdf
            }
        };
        let page_size = self.render.page_size.parse::<PageSize>().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid page size in config, using A4");
            PageSize::A4
        });

        ConvertOptions {
            format,
            jobs: self.performance.jobs,
            batch_size: self.performance.batch_size.max(1),
            read_buffer_size: self.performance.read_buffer_size,
            max_message_size: self.performance.max_message_size,
            render: RenderOptions {
                embed_images: self.render.embed_images,
                max_html_bytes: self.render.max_html_bytes,
                max_dom_depth: self.render.max_dom_depth,
            },
            pdf: PdfOptions {
                page_size,
                margin: self.render.margin.max(0.0),
                font_size: self.render.font_size.clamp(4.0, 48.0),
                title: self.render.title.clone(),
                compress: true,
            },
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration from `path`, if given.
///
/// No path means the built-in defaults. A file that cannot be read or parsed
/// is an error; the caller decides whether to fall back.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let Some(path) = path else {
        return Ok(Config::default());
    };

    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.general.log_level, "warn");
        assert_eq!(cfg.general.format, "pdf");
        assert_eq!(cfg.render.page_size, "a4");
        assert!(cfg.render.embed_images);
        assert_eq!(cfg.performance.jobs, 1);
        assert_eq!(cfg.performance.read_buffer_size, 1024 * 1024);
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.general.log_level, cfg.general.log_level);
        assert_eq!(parsed.render.font_size, cfg.render.font_size);
        assert_eq!(
            parsed.performance.max_message_size,
            cfg.performance.max_message_size
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[render]
page_size = "letter"
embed_images = false

[performance]
jobs = 4
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        let options = cfg.convert_options();
        assert_eq!(options.pdf.page_size, PageSize::Letter);
        assert!(!options.render.embed_images);
        assert_eq!(options.jobs, 4);
        // Other fields use defaults
        assert_eq!(options.format, OutputFormat::Pdf);
        assert_eq!(options.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let cfg: Config = toml::from_str(
            r#"
[general]
format = "docx"

[render]
page_size = "tabloid"
"#,
        )
        .expect("parse");
        let options = cfg.convert_options();
        assert_eq!(options.format, OutputFormat::Pdf);
        assert_eq!(options.pdf.page_size, PageSize::A4);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[general]\nlog_level = \"debug\"").unwrap();
        let cfg = load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.general.log_level, "debug");
    }

    #[test]
    fn test_invalid_or_missing_file_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "this is = = not toml").unwrap();
        assert!(matches!(
            load_config(Some(file.path())),
            Err(ConfigError::Parse { .. })
        ));

        let err = load_config(Some(Path::new("/nonexistent/mbox2pdf.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/mbox2pdf.toml"));

        assert_eq!(load_config(None).unwrap().general.format, "pdf");
    }
}
