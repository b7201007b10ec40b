// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.
// Names (features, severities, sources, selection mode) are kept as strings
// and parsed leniently: unknown ones are warned about and skipped.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::backend::{
    ApplicationInfo, ContextDescriptor, DebugSeverity, DebugSource, Debugger, FeatureRequest,
    Features, NegotiationOptions, QueueCounts, RendererDescriptor, ScoreWeights, SelectionMode,
    Version,
};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub application: ApplicationConfig,
    pub debug: DebugConfig,
    pub device: DeviceConfig,
    pub renderers: RenderersConfig,
}

/// Identity reported to the driver
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub name: String,
    pub version: Version,
    pub engine_name: String,
    pub engine_version: Version,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "render-caps".to_string(),
            version: Version::new(0, 1, 0),
            engine_name: "render-caps".to_string(),
            engine_version: Version::new(0, 1, 0),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub enabled: bool,
    pub severities: Vec<String>,
    pub sources: Vec<String>,
    pub validation_features: bool,
    pub extra_layers: Vec<String>,
    pub extra_extensions: Vec<String>,
    pub log_to_file: bool,
    pub log_file: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            severities: vec!["warning".into(), "error".into(), "fatal".into()],
            sources: vec!["all".into()],
            validation_features: false,
            extra_layers: Vec::new(),
            extra_extensions: Vec::new(),
            log_to_file: false,
            log_file: "render_caps.log".to_string(),
        }
    }
}

/// Device selection settings shared by every renderer
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub selection_mode: String,
    pub queue_counts: QueueCounts,
    pub weights: ScoreWeights,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            selection_mode: "optimal".to_string(),
            queue_counts: QueueCounts::default(),
            weights: ScoreWeights::default(),
        }
    }
}

/// One `[[renderers]]` entry
#[derive(Debug, Deserialize)]
pub struct RendererConfig {
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub api_version: Option<Version>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            features: vec!["presentation".to_string()],
            api_version: Some(Version::new(1, 3, 0)),
        }
    }
}

/// `[[renderers]]` array; a single presentation renderer when absent
#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct RenderersConfig(pub Vec<RendererConfig>);

impl Default for RenderersConfig {
    fn default() -> Self {
        Self(vec![RendererConfig::default()])
    }
}

fn parse_names<T>(names: &[String], kind: &str, parse: impl Fn(&str) -> Option<T>) -> Vec<T> {
    names
        .iter()
        .filter_map(|name| {
            let parsed = parse(name);
            if parsed.is_none() {
                log::warn!("Unknown {} '{}', skipping", kind, name);
            }
            parsed
        })
        .collect()
}

impl ApplicationConfig {
    pub fn to_application_info(&self) -> ApplicationInfo {
        ApplicationInfo {
            name: self.name.clone(),
            version: self.version,
            engine_name: self.engine_name.clone(),
            engine_version: self.engine_version,
        }
    }
}

impl DebugConfig {
    pub fn get_severities(&self) -> DebugSeverity {
        parse_names(&self.severities, "debug severity", DebugSeverity::parse)
            .into_iter()
            .fold(DebugSeverity::empty(), |acc, s| acc | s)
    }

    pub fn get_sources(&self) -> DebugSource {
        parse_names(&self.sources, "debug source", DebugSource::parse)
            .into_iter()
            .fold(DebugSource::empty(), |acc, s| acc | s)
    }

    /// Debugger writing through `log`, if debugging is enabled
    pub fn debugger(&self) -> Option<Debugger> {
        self.enabled
            .then(|| Debugger::with_log(self.get_severities(), self.get_sources()))
    }

    pub fn negotiation_options(&self) -> NegotiationOptions {
        NegotiationOptions {
            debug: self.enabled,
            validation_features: self.validation_features,
            extra_layers: self.extra_layers.clone(),
            extra_extensions: self.extra_extensions.clone(),
        }
    }
}

impl DeviceConfig {
    pub fn get_selection_mode(&self) -> SelectionMode {
        match self.selection_mode.to_lowercase().as_str() {
            "optimal" => SelectionMode::Optimal,
            "first" => SelectionMode::First,
            _ => {
                log::warn!(
                    "Unknown selection mode '{}', defaulting to optimal",
                    self.selection_mode
                );
                SelectionMode::Optimal
            }
        }
    }
}

impl RendererConfig {
    pub fn to_request(&self) -> FeatureRequest {
        let features = parse_names(&self.features, "feature", Features::parse)
            .into_iter()
            .fold(Features::empty(), |acc, f| acc | f);

        FeatureRequest {
            features,
            api_version: self.api_version,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Context descriptor for every configured renderer
    pub fn descriptor(&self) -> ContextDescriptor {
        let selection_mode = self.device.get_selection_mode();

        let renderers = self
            .renderers
            .0
            .iter()
            .map(|r| RendererDescriptor {
                request: r.to_request(),
                selection_mode,
                queue_counts: self.device.queue_counts,
                weights: self.device.weights.clone(),
            })
            .collect();

        ContextDescriptor {
            application: self.application.to_application_info(),
            renderers,
            debugger: self.debug.debugger(),
            options: self.debug.negotiation_options(),
            ..ContextDescriptor::default()
        }
    }
}
