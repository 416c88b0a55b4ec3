use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Findings of one scan run.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct Report {
    pub(crate) version: String,
    #[serde(rename = "mcversion")]
    pub(crate) platform_version: String,
    pub(crate) date: String,
    pub(crate) jars: Vec<JarScanResult>,
}

/// Matches found in one archive. Only built for archives with at least one match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub(crate) struct JarScanResult {
    pub(crate) name: String,
    pub(crate) mods: Vec<ModDescriptor>,
    pub(crate) methods: Vec<String>,
}

/// One record from an archive's `mcmod.info`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ModDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) modid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) mcversion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) url: Option<String>,
    #[serde(rename = "authorList", default)]
    pub(crate) author_list: Vec<String>,
}

impl Report {
    /// Stamp a report with the current UTC time.
    pub(crate) fn new(platform_version: impl Into<String>, jars: Vec<JarScanResult>) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform_version: platform_version.into(),
            date: chrono::Utc::now().format(DATE_FORMAT).to_string(),
            jars,
        }
    }
}

impl JarScanResult {
    pub(crate) fn new(
        name: impl Into<String>,
        methods: Vec<String>,
        mods: Vec<ModDescriptor>,
    ) -> Option<Self> {
        if methods.is_empty() {
            return None;
        }
        Some(Self {
            name: name.into(),
            mods,
            methods,
        })
    }
}

/// Decode `mcmod.info`: a single object, an array of objects, or the
/// `{"modListVersion": 2, "modList": [...]}` wrapper.
pub(crate) fn parse_mod_metadata(bytes: &[u8]) -> Result<Vec<ModDescriptor>> {
    let value: Value = serde_json::from_slice(bytes).context("parse mod metadata")?;
    let records = match value {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("modList") {
            Some(Value::Array(items)) if object.contains_key("modListVersion") => items,
            Some(other) => {
                object.insert("modList".to_string(), other);
                vec![Value::Object(object)]
            }
            None => vec![Value::Object(object)],
        },
        other => anyhow::bail!("unexpected mod metadata shape: {}", json_kind(&other)),
    };
    records
        .into_iter()
        .map(|record| serde_json::from_value(record).context("decode mod record"))
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
