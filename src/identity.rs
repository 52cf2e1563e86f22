use crate::domain::{FilenameStem, Identity};
use crate::error::LocatorError;
use crate::tables::MappingTables;

/// Identity with the minor component resolved to its numeric form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub source: String,
    pub major: String,
    pub minor: String,
    pub sheet_part: String,
    pub stem: FilenameStem,
}

pub fn resolve(identity: &Identity, tables: &MappingTables) -> Result<ResolvedIdentity, LocatorError> {
    let source = identity.source.trim();
    let major = identity.major.trim();
    if source.is_empty() {
        return Err(LocatorError::InvalidIdentity("source is required".to_string()));
    }
    if major.is_empty() {
        return Err(LocatorError::InvalidIdentity("major number is required".to_string()));
    }

    let minor = resolve_minor(identity.minor.trim(), tables)?;
    let sheet_part = sheet_part(identity.sheet.trim(), identity.part.trim());
    let stem = FilenameStem::new(format!("{source}_{major}_{minor}{sheet_part}"));

    Ok(ResolvedIdentity {
        source: source.to_string(),
        major: major.to_string(),
        minor,
        sheet_part,
        stem,
    })
}

/// Any digit means the value is already numeric; otherwise it is an alias.
pub fn resolve_minor(raw: &str, tables: &MappingTables) -> Result<String, LocatorError> {
    if raw.chars().any(|ch| ch.is_ascii_digit()) {
        return Ok(raw.to_string());
    }
    tables
        .alias(raw)
        .map(|entry| entry.number.to_string())
        .ok_or_else(|| LocatorError::UnknownAlias {
            alias: raw.to_string(),
            valid: tables.describe_aliases(),
        })
}

pub fn sheet_part(sheet: &str, part: &str) -> String {
    let part = if part.is_empty() { "1" } else { part };
    if sheet.is_empty() {
        format!("J{part}")
    } else {
        format!("P{sheet}J{part}")
    }
}
