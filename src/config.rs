//! Scanner configuration: keyword tables, remote tier settings, geometry tolerances.
//!
//! Every heuristic table the pipeline uses (shift keywords, service names,
//! noise markers, month names) lives here instead of inline literals, so a
//! different locale or unit roster only needs a JSON file.
//!
//! Resolution order for `ScannerConfig::from_env()`:
//! 1. `ROSTER_SCAN_CONFIG` (path to a JSON file), else `~/.config/roster-scan/config.json` if present
//! 2. built-in defaults for anything the file omits
//! 3. `LLMWHISPERER_API_KEY`, `GEMINI_API_KEY`, `TESSDATA_PREFIX` overrides

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::extraction::types::PageSegMode;

/// Application-level constants
pub const APP_NAME: &str = "roster-scan";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const ENV_CONFIG_PATH: &str = "ROSTER_SCAN_CONFIG";
pub const ENV_LAYOUT_OCR_KEY: &str = "LLMWHISPERER_API_KEY";
pub const ENV_VISION_KEY: &str = "GEMINI_API_KEY";
pub const ENV_TESSDATA: &str = "TESSDATA_PREFIX";

/// Default `EnvFilter` directive when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "roster_scan=info,warn"
}

/// Per-user configuration directory (`~/.config/roster-scan` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Default location of the JSON configuration file.
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.json"))
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

// ═══════════════════════════════════════════════════════════
// Keyword tables
// ═══════════════════════════════════════════════════════════

/// Shift keyword found in the header row, with the title shown for its column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftKeyword {
    pub keyword: String,
    pub title: String,
}

impl ShiftKeyword {
    fn new(keyword: &str, title: &str) -> Self {
        Self {
            keyword: keyword.to_string(),
            title: title.to_string(),
        }
    }
}

/// Ordered keyword → label configuration consumed by column detection,
/// row classification and date extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordConfig {
    /// Period labels of the header row, in priority order.
    pub shift_keywords: Vec<ShiftKeyword>,
    /// Title of the single column used when no header row is found.
    pub catch_all_title: String,
    /// A line containing one of these starts the outgoing-duty section.
    pub outgoing_markers: Vec<String>,
    /// Named special services heading outgoing-duty sub-blocks.
    pub service_keywords: Vec<String>,
    /// Service headers that leak into the normal grid and must not become entries.
    pub leaked_header_keywords: Vec<String>,
    /// Whole lines containing these are page furniture (titles, unit names).
    pub noise_line_markers: Vec<String>,
    /// Rank abbreviations that mark a fragment as a person.
    pub rank_prefixes: Vec<String>,
    /// Section label used before any service header is seen in a column.
    pub default_outgoing_label: String,
    /// Tag prefixed to outgoing-duty entries: `"(<tag> <label>) <name>"`.
    pub outgoing_entry_tag: String,
    /// Title of the single column produced from unstructured text.
    pub raw_text_title: String,
    /// Month names, January first.
    pub months: Vec<String>,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        Self {
            shift_keywords: vec![
                ShiftKeyword::new("MAÑANA", "MAÑANA (06-14)"),
                ShiftKeyword::new("TARDE", "TARDE (14-22)"),
                ShiftKeyword::new("NOCHE", "NOCHE (22-06)"),
            ],
            catch_all_title: "TURNO ÚNICO".into(),
            outgoing_markers: strings(&["SALIENTES"]),
            service_keywords: strings(&[
                "PENITENCIARIO",
                "SUBDELEGACION",
                "PUERTAS",
                "ACUARTELAMIENTO",
                "CONTROLES",
                "PATRULLA",
                "SEGURIDAD",
                "PLANA MAYOR",
            ]),
            leaked_header_keywords: strings(&[
                "PENITENCIARIO",
                "SUBDELEGACION",
                "PUERTAS",
                "ACUARTELAMIENTO",
                "CONTROLES",
                "PATRULLA",
            ]),
            noise_line_markers: strings(&["SERVICIOS PARA", "COMANDANCIA"]),
            rank_prefixes: strings(&["G.C.", "GC.", "SGT", "CABO", "TTE", "CAP", "CMDT"]),
            default_outgoing_label: "SERVICIO".into(),
            outgoing_entry_tag: "OUTGOING".into(),
            raw_text_title: "TEXTO DETECTADO (SIN FORMATO)".into(),
            months: strings(&[
                "ENERO",
                "FEBRERO",
                "MARZO",
                "ABRIL",
                "MAYO",
                "JUNIO",
                "JULIO",
                "AGOSTO",
                "SEPTIEMBRE",
                "OCTUBRE",
                "NOVIEMBRE",
                "DICIEMBRE",
            ]),
        }
    }
}

impl KeywordConfig {
    /// Trim and uppercase every keyword list. The substring matchers below
    /// compare against uppercased text, so hand-written lowercase entries
    /// would otherwise never match.
    pub fn normalize(&mut self) {
        let upper_all = |items: &mut Vec<String>| {
            for item in items.iter_mut() {
                *item = item.trim().to_uppercase();
            }
            items.retain(|item| !item.is_empty());
        };
        upper_all(&mut self.outgoing_markers);
        upper_all(&mut self.service_keywords);
        upper_all(&mut self.leaked_header_keywords);
        upper_all(&mut self.noise_line_markers);
        upper_all(&mut self.rank_prefixes);
        upper_all(&mut self.months);
        for shift in &mut self.shift_keywords {
            shift.keyword = shift.keyword.trim().to_uppercase();
        }
    }

    /// First shift keyword contained in `text` (case-insensitive).
    pub fn shift_keyword_in(&self, text: &str) -> Option<&ShiftKeyword> {
        let upper = text.to_uppercase();
        self.shift_keywords
            .iter()
            .find(|k| upper.contains(&k.keyword.to_uppercase()))
    }

    /// Number of distinct shift keywords contained in `text`.
    pub fn count_shift_keywords(&self, text: &str) -> usize {
        let upper = text.to_uppercase();
        self.shift_keywords
            .iter()
            .filter(|k| upper.contains(&k.keyword.to_uppercase()))
            .count()
    }

    /// 1-based month number for a month name.
    pub fn month_number(&self, name: &str) -> Option<u32> {
        let upper = name.to_uppercase();
        self.months
            .iter()
            .position(|m| m.to_uppercase() == upper)
            .map(|idx| idx as u32 + 1)
    }

    pub fn is_outgoing_marker(&self, upper_text: &str) -> bool {
        contains_any(upper_text, &self.outgoing_markers)
    }

    pub fn is_noise_line(&self, upper_text: &str) -> bool {
        contains_any(upper_text, &self.noise_line_markers)
    }

    pub fn matched_service(&self, upper_text: &str) -> Option<&str> {
        self.service_keywords
            .iter()
            .find(|k| upper_text.contains(k.as_str()))
            .map(String::as_str)
    }

    pub fn is_leaked_header(&self, upper_text: &str) -> bool {
        contains_any(upper_text, &self.leaked_header_keywords)
    }

    pub fn has_rank_prefix(&self, text: &str) -> bool {
        let upper = text.trim_start().to_uppercase();
        self.rank_prefixes
            .iter()
            .any(|p| upper.starts_with(&p.to_uppercase()))
    }
}

fn contains_any(upper_text: &str, needles: &[String]) -> bool {
    needles.iter().any(|n| upper_text.contains(n.as_str()))
}

// ═══════════════════════════════════════════════════════════
// Tier settings
// ═══════════════════════════════════════════════════════════

/// Remote layout-preserving OCR service (LLMWhisperer v2 API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutOcrConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub request_timeout_secs: u64,
}

impl Default for LayoutOcrConfig {
    fn default() -> Self {
        Self {
            base_url: "https://llmwhisperer-api.us-central.unstract.com/api/v2".into(),
            api_key: None,
            poll_interval_ms: 2_000,
            max_poll_attempts: 20,
            request_timeout_secs: 60,
        }
    }
}

impl LayoutOcrConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Cloud vision-language model (Gemini `generateContent`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Model variants in the order they are tried.
    pub models: Vec<String>,
    pub backoff_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            api_key: None,
            models: vec![
                "gemini-2.0-flash-exp".into(),
                "gemini-flash-latest".into(),
                "gemini-pro-latest".into(),
                "gemini-1.5-flash".into(),
                "gemini-pro".into(),
            ],
            backoff_ms: 1_000,
            request_timeout_secs: 90,
        }
    }
}

impl VisionConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// On-device recognizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalOcrConfig {
    pub tessdata_dir: Option<PathBuf>,
    pub language: String,
    /// Escalation order, tried until one yields reconstructable lines.
    pub page_seg_modes: Vec<PageSegMode>,
}

impl Default for LocalOcrConfig {
    fn default() -> Self {
        Self {
            tessdata_dir: None,
            language: "spa".into(),
            page_seg_modes: vec![
                PageSegMode::Auto,
                PageSegMode::SingleBlock,
                PageSegMode::SingleColumn,
            ],
        }
    }
}

/// Pixel tolerances and length thresholds used by the geometric stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// Max vertical-center distance for a word to join the current line.
    pub line_tolerance_px: f32,
    /// Vertical-center rounding band for the reading-order sort.
    pub sort_band_px: f32,
    /// Lines shorter than this are skipped by the row classifier.
    pub min_line_chars: usize,
    /// Fragments shorter than this never become entries or labels.
    pub min_fragment_chars: usize,
    /// Leading characters of the page text searched for the roster date.
    pub date_scan_chars: usize,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            line_tolerance_px: 15.0,
            sort_band_px: 10.0,
            min_line_chars: 5,
            min_fragment_chars: 4,
            date_scan_chars: 500,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Aggregate
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub keywords: KeywordConfig,
    pub layout_ocr: LayoutOcrConfig,
    pub vision: VisionConfig,
    pub local_ocr: LocalOcrConfig,
    pub geometry: GeometryConfig,
}

impl ScannerConfig {
    /// Load a (possibly partial) JSON config; omitted fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.keywords.normalize();
        Ok(config)
    }

    /// Resolve configuration from file + environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = std::env::var(ENV_CONFIG_PATH)
            .ok()
            .map(PathBuf::from)
            .or_else(|| default_config_path().filter(|p| p.exists()));

        let mut config = match file {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading scanner config");
                Self::from_json_file(&path)?
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay secrets and paths from a key lookup (the process environment in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(ENV_LAYOUT_OCR_KEY).filter(|k| !k.trim().is_empty()) {
            self.layout_ocr.api_key = Some(key);
        }
        if let Some(key) = lookup(ENV_VISION_KEY).filter(|k| !k.trim().is_empty()) {
            self.vision.api_key = Some(key);
        }
        if let Some(dir) = lookup(ENV_TESSDATA).filter(|d| !d.trim().is_empty()) {
            self.local_ocr.tessdata_dir = Some(PathBuf::from(dir));
        }
        self.keywords.normalize();
    }
}
