use assert_matches::assert_matches;
use serde_json::json;

use plan_locator::catalog::{
    SearchQuery, info_url, parse_search_response, preview_url, probe_identifier, search_body,
};
use plan_locator::domain::{FilenameStem, ProbeCandidate};
use plan_locator::error::LocatorError;

#[test]
fn probe_url_encodes_identifier_as_one_segment() {
    let identifier = probe_identifier(
        "eirCP",
        "Sy",
        &ProbeCandidate::new(142),
        &FilenameStem::new("Sy_3000_3000J1"),
    );
    assert_eq!(identifier, "eirCP/Sy/101-200/142/Sy_3000_3000J1.jp2");

    let url = info_url("https://host/iiif/2/", &identifier);
    assert_eq!(
        url,
        "https://host/iiif/2/eirCP%2FSy%2F101-200%2F142%2FSy_3000_3000J1.jp2/info.json"
    );
    assert_eq!(
        preview_url(&url),
        "https://host/iiif/2/eirCP%2FSy%2F101-200%2F142%2FSy_3000_3000J1.jp2/full/1024,/0/default.jpg"
    );
}

#[test]
fn search_body_is_two_ndjson_lines() {
    let mut query = SearchQuery::new("george st");
    query.collections = vec!["7".to_string()];
    let body = search_body(&query);
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 2);

    let preference: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(preference["preference"], "plan-locator");
    let search: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(search["size"], 50);
    assert_eq!(
        search["query"]["bool"]["filter"][0]["terms"]["collectionId"],
        json!(["7"])
    );
    let should = &search["query"]["bool"]["must"][0]["bool"]["should"];
    assert_eq!(should[0]["multi_match"]["query"], "george st");
    assert_eq!(should[1]["multi_match"]["type"], "phrase_prefix");
}

#[test]
fn search_response_yields_documents() {
    let response = json!({
        "responses": [{
            "hits": {
                "hits": [
                    {
                        "_id": "10",
                        "_source": {
                            "title": "Deposited plan 10",
                            "collectionId": 7,
                            "images": [
                                {"location": "eirCP/Sy/1-100", "fileName": "a.jp2"},
                                {"location": "eirCP/Sy/1-100"}
                            ]
                        }
                    },
                    {"_id": 11, "_source": {}},
                    {"_source": {"title": "no id"}}
                ]
            }
        }]
    });
    let results = parse_search_response(&response).unwrap();
    assert_eq!(results.len(), 2);
    let first = results.find("10").unwrap();
    assert_eq!(first.collection_id.as_deref(), Some("7"));
    assert_eq!(first.images.len(), 1);
    assert_eq!(first.images[0].identifier(), "eirCP/Sy/1-100/a.jp2");
    let second = results.find("11").unwrap();
    assert!(second.images.is_empty());
    assert_eq!(second.title, None);
}

#[test]
fn search_response_without_hits_is_malformed() {
    assert_matches!(
        parse_search_response(&json!({"responses": []})),
        Err(LocatorError::MalformedSearchResponse(_))
    );
    assert_matches!(
        parse_search_response(&json!({"error": "boom"})),
        Err(LocatorError::MalformedSearchResponse(_))
    );
}
