use regex::Regex;

use crate::error::PatternError;

/// Which list a rule string came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Tier {
    Default,
    Additional,
    Blacklist,
}

/// Compiled `unit#method[#descriptor]` rule.
///
/// Unit and descriptor segments are regular expressions matched against the
/// whole name; the method segment is a literal method name.
#[derive(Clone, Debug)]
pub(crate) struct MethodPattern {
    pub(crate) tier: Tier,
    source: String,
    unit: Regex,
    method: String,
    descriptor: Option<Regex>,
    descriptor_source: Option<String>,
}

impl MethodPattern {
    pub(crate) fn compile(tier: Tier, source: &str) -> Result<Self, PatternError> {
        let mut segments = source.splitn(3, '#');
        let unit_source = segments.next().unwrap_or_default();
        let Some(method) = segments.next() else {
            return Err(PatternError::MissingMethod {
                pattern: source.to_string(),
            });
        };
        if !is_method_name(method) {
            return Err(PatternError::InvalidMethod {
                pattern: source.to_string(),
                method: method.to_string(),
            });
        }
        let descriptor_source = segments.next();

        let unit = anchored(source, unit_source)?;
        let descriptor = descriptor_source
            .map(|descriptor| anchored(source, descriptor))
            .transpose()?;

        Ok(Self {
            tier,
            source: source.to_string(),
            unit,
            method: method.to_string(),
            descriptor,
            descriptor_source: descriptor_source.map(str::to_string),
        })
    }

    pub(crate) fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn method(&self) -> &str {
        &self.method
    }

    pub(crate) fn matches_unit(&self, unit: &str) -> bool {
        self.unit.is_match(unit)
    }

    /// Full composite-key match.
    pub(crate) fn matches(&self, unit: &str, method: &str, descriptor: &str) -> bool {
        self.method == method
            && self.matches_unit(unit)
            && self
                .descriptor
                .as_ref()
                .is_none_or(|pattern| pattern.is_match(descriptor))
    }

    /// Whether this blacklist rule removes everything `other` could select on a unit
    /// both of them match.
    pub(crate) fn covers(&self, other: &MethodPattern) -> bool {
        self.method == other.method
            && match (&self.descriptor_source, &other.descriptor_source) {
                (None, _) => true,
                (Some(mine), Some(theirs)) => mine == theirs,
                (Some(_), None) => false,
            }
    }
}

fn anchored(source: &str, segment: &str) -> Result<Regex, PatternError> {
    Regex::new(&format!("^(?:{segment})$")).map_err(|err| PatternError::Regex {
        pattern: source.to_string(),
        source: err,
    })
}

/// Characters a JVM method name cannot contain, plus regex metacharacters.
const RESERVED: &[char] = &[
    '.', ';', '[', ']', '/', '<', '>', '(', ')', '*', '+', '?', '|', '\\', '^', '$', '{', '}',
];

fn is_method_name(name: &str) -> bool {
    if name == "<init>" || name == "<clinit>" {
        return true;
    }
    !name.is_empty() && !name.contains(RESERVED)
}
