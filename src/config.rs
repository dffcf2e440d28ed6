//! Program options: defaults, then the configuration file, then the command line.

use std::{fs, path::Path, path::PathBuf, time::Duration};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::{destination::ConflictPolicy, model::TypeFilter};

pub const DEFAULT_NUMBER: usize = 10;

/// One layer of settings. Every field is optional so layers can be stacked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<Vec<PathBuf>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_option: Option<ConflictPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_selection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let _span = tracing::info_span!("loading configuration", ?path).entered();

        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read configuration file {}", path.display()))?;
        let settings: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid configuration file {}", path.display()))?;

        tracing::debug!(?settings);
        Ok(settings)
    }

    /// Fields set in `self` win over the ones in `base`.
    pub fn over(self, base: Self) -> Self {
        // The filter is taken as a whole, so `--suffix` on the command line
        // replaces a `mime-type` list from the file instead of clashing with it.
        let (suffix, mime_type) = if self.suffix.is_some() || self.mime_type.is_some() {
            (self.suffix, self.mime_type)
        } else {
            (base.suffix, base.mime_type)
        };

        Self {
            folder: self.folder.or(base.folder),
            number: self.number.or(base.number),
            destination: self.destination.or(base.destination),
            destination_option: self.destination_option.or(base.destination_option),
            suffix,
            mime_type,
            block_selection: self.block_selection.or(base.block_selection),
            database: self.database.or(base.database),
            seed: self.seed.or(base.seed),
        }
    }
}

/// Fully resolved options for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub folders: Vec<PathBuf>,
    pub number: usize,
    pub destination: Option<PathBuf>,
    pub conflict_policy: ConflictPolicy,
    pub filter: Option<TypeFilter>,
    pub block_selection: Option<Duration>,
    pub database: Option<PathBuf>,
    pub seed: Option<u64>,
    /// What the options were resolved from, with defaults filled in.
    settings: Settings,
}

impl Options {
    pub fn resolve(mut settings: Settings) -> anyhow::Result<Self> {
        let number = *settings.number.get_or_insert(DEFAULT_NUMBER);
        let conflict_policy = *settings.destination_option.get_or_insert_default();

        let filter = match (&settings.suffix, &settings.mime_type) {
            (Some(suffixes), Some(mime_types)) if !suffixes.is_empty() && !mime_types.is_empty() => {
                anyhow::bail!("Filter by either suffix or MIME type, not both")
            }
            (Some(suffixes), _) if !suffixes.is_empty() => Some(TypeFilter::suffixes(suffixes)),
            (_, Some(mime_types)) if !mime_types.is_empty() => {
                Some(TypeFilter::mime_types(mime_types))
            }
            _ => None,
        };

        let block_selection = settings
            .block_selection
            .as_deref()
            .map(parse_duration)
            .transpose()
            .context("Invalid block-selection duration")?;

        Ok(Self {
            folders: settings.folder.clone().unwrap_or_default(),
            number,
            destination: settings.destination.clone(),
            conflict_policy,
            filter,
            block_selection,
            database: settings.database.clone(),
            seed: settings.seed,
            settings,
        })
    }

    /// The options as YAML, usable as a configuration file.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(&self.settings)?)
    }
}

/// Parses durations like `90s`, `3d` or `1w2d`.
///
/// Units are (s)econds, (m)inutes, (h)ours, (d)ays and (w)eeks.
pub fn parse_duration(input: &str) -> anyhow::Result<Duration> {
    let input = input.trim();
    anyhow::ensure!(!input.is_empty(), "Empty duration");

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        anyhow::ensure!(digits > 0, "Expected a number in `{input}`");

        let value: u64 = rest[..digits].parse()?;
        let unit = rest[digits..]
            .chars()
            .next()
            .with_context(|| format!("Missing unit after {value} in `{input}`"))?;

        let seconds = match unit {
            's' => 1,
            'm' => 60,
            'h' => 60 * 60,
            'd' => 24 * 60 * 60,
            'w' => 7 * 24 * 60 * 60,
            other => anyhow::bail!("Unknown duration unit `{other}` in `{input}`"),
        };

        let part = value
            .checked_mul(seconds)
            .with_context(|| format!("Duration `{input}` is too long"))?;
        total += Duration::from_secs(part);
        rest = &rest[digits + unit.len_utf8()..];
    }

    Ok(total)
}
