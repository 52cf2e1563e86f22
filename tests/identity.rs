mod common;

use assert_matches::assert_matches;

use plan_locator::domain::Identity;
use plan_locator::error::LocatorError;
use plan_locator::identity::resolve;

fn identity(minor: &str, sheet: &str, part: &str) -> Identity {
    Identity {
        source: "Sy".to_string(),
        major: "3000".to_string(),
        minor: minor.to_string(),
        sheet: sheet.to_string(),
        part: part.to_string(),
    }
}

#[test]
fn alias_minor_resolves_to_number() {
    let resolved = resolve(&identity("Sy", "", "1"), &common::tables()).unwrap();
    assert_eq!(resolved.minor, "3000");
    assert_eq!(resolved.stem.as_str(), "Sy_3000_3000J1");
}

#[test]
fn sheet_is_prefixed_with_p() {
    let resolved = resolve(&identity("1234", "2", "3"), &common::tables()).unwrap();
    assert_eq!(resolved.stem.as_str(), "Sy_3000_1234P2J3");
}

#[test]
fn unknown_alias_lists_every_valid_code() {
    for alias in ["Zz", "Sydney", "sy", ""] {
        let err = resolve(&identity(alias, "", "1"), &common::tables()).unwrap_err();
        assert_matches!(&err, LocatorError::UnknownAlias { alias: reported, .. } if reported == alias);
        let message = err.to_string();
        assert!(message.contains("Ay: 3005 (Abury)"), "{message}");
        assert!(message.contains("Sy: 3000 (Sydney)"), "{message}");
    }
}
