//! Verify parsers and build/parse methods against JSON test vectors stored
//! in `test-vectors/`.
//!
//! Each vector file describes inputs and expected outputs. Comparing parsed
//! JSON (not raw strings) avoids false negatives from field-ordering
//! differences.

use dmart_core::{parse_lines, parse_table, ApiError, DmartClient, HttpMethod, HttpResponse, ParseError, QueryRequest};

const BASE_URL: &str = "http://localhost:8282";

fn client() -> DmartClient {
    DmartClient::new(BASE_URL)
}

/// Parse the method string from test vectors into `HttpMethod`.
fn parse_method(s: &str) -> HttpMethod {
    match s {
        "GET" => HttpMethod::Get,
        "POST" => HttpMethod::Post,
        "PUT" => HttpMethod::Put,
        other => panic!("unknown method: {other}"),
    }
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

#[test]
fn table_test_vectors() {
    let raw = include_str!("../../test-vectors/table.json");
    let vectors: serde_json::Value = serde_json::from_str(raw).unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let input = case["input"].as_str().unwrap();
        let result = parse_table(input);

        if let Some(expected_error) = case.get("expected_error") {
            let err = result.unwrap_err();
            match expected_error.as_str().unwrap() {
                "EmptyInput" => assert!(matches!(err, ParseError::EmptyInput), "{name}: expected EmptyInput"),
                other => panic!("{name}: unknown expected_error: {other}"),
            }
            continue;
        }

        let table = result.unwrap();
        let actual = serde_json::to_value(&table).unwrap();
        assert_eq!(actual, case["expected"], "{name}: parsed table");
        for row in &table.rows {
            assert_eq!(row.len(), table.headers.len(), "{name}: row width");
        }
        assert_eq!(parse_table(input).unwrap(), table, "{name}: deterministic");
    }
}

// ---------------------------------------------------------------------------
// JSONL
// ---------------------------------------------------------------------------

#[test]
fn jsonl_test_vectors() {
    let raw = include_str!("../../test-vectors/jsonl.json");
    let vectors: serde_json::Value = serde_json::from_str(raw).unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let input = case["input"].as_str().unwrap();
        let result = parse_lines(input);

        if let Some(index) = case.get("expected_error_index") {
            let expected = index.as_u64().unwrap() as usize;
            match result.unwrap_err() {
                ParseError::MalformedLine { index, .. } => assert_eq!(index, expected, "{name}: line index"),
                other => panic!("{name}: unexpected error {other}"),
            }
            continue;
        }

        let values = result.unwrap();
        assert_eq!(serde_json::Value::Array(values), case["expected"], "{name}: parsed values");
    }
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

#[test]
fn query_test_vectors() {
    let raw = include_str!("../../test-vectors/query.json");
    let vectors: serde_json::Value = serde_json::from_str(raw).unwrap();

    let c = client();
    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let input: QueryRequest = serde_json::from_value(case["input"].clone()).unwrap();
        let expected_req = &case["expected_request"];

        // Verify build
        let req = c.build_query(&input).unwrap();
        assert_eq!(req.method, parse_method(expected_req["method"].as_str().unwrap()), "{name}: method");
        assert_eq!(req.path, format!("{BASE_URL}{}", expected_req["path"].as_str().unwrap()), "{name}: path");

        let expected_headers: Vec<(String, String)> = expected_req["headers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|h| {
                let arr = h.as_array().unwrap();
                (arr[0].as_str().unwrap().to_string(), arr[1].as_str().unwrap().to_string())
            })
            .collect();
        assert_eq!(req.headers, expected_headers, "{name}: headers");

        let req_body: serde_json::Value = serde_json::from_slice(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(req_body, expected_req["body"], "{name}: body");

        // Verify parse
        let sim = &case["simulated_response"];
        let response = HttpResponse {
            status: sim["status"].as_u64().unwrap() as u16,
            headers: Vec::new(),
            body: sim["body"].as_str().unwrap().to_string(),
        };
        let result = c.parse_query(response);

        if let Some(expected_error) = case.get("expected_error") {
            let err = result.unwrap_err();
            match expected_error.as_str().unwrap() {
                "SessionExpired" => assert!(err.is_session_expired(), "{name}: expected session expiry"),
                "Firewall" => assert!(matches!(err, ApiError::Firewall { .. }), "{name}: expected Firewall"),
                other => panic!("{name}: unknown expected_error: {other}"),
            }
        } else {
            let response = result.unwrap();
            let expected = &case["expected_result"];
            let attributes = response.attributes.unwrap();
            assert_eq!(attributes.total, expected["total"].as_u64().unwrap(), "{name}: total");
            assert_eq!(attributes.returned, expected["returned"].as_u64().unwrap(), "{name}: returned");
            let shortnames: Vec<&str> = response.records.iter().map(|r| r.shortname.as_str()).collect();
            let expected_names: Vec<&str> = expected["shortnames"]
                .as_array()
                .unwrap()
                .iter()
                .map(|v| v.as_str().unwrap())
                .collect();
            assert_eq!(shortnames, expected_names, "{name}: shortnames");
        }
    }
}
