//! Isolation and parsing of the JSON object in a service response.

use crate::error::PipelineError;
use crate::models::ExtractedRecord;

/// The span from the first `{` to the last `}`, inclusive.
///
/// Responses often wrap the object in prose or code fences. Without a usable
/// span the whole response is returned and left to the parser.
pub fn isolate_json(response: &str) -> &str {
    match (response.find('{'), response.rfind('}')) {
        (Some(start), Some(end)) if end > start => &response[start..=end],
        _ => response,
    }
}

/// Parse a response into a record. Only JSON objects are accepted.
pub fn parse_record(response: &str) -> Result<ExtractedRecord, PipelineError> {
    let candidate = isolate_json(response);

    let malformed = |reason: String| PipelineError::MalformedExtraction {
        reason,
        raw_response: response.to_string(),
    };

    let value: serde_json::Value =
        serde_json::from_str(candidate).map_err(|e| malformed(e.to_string()))?;

    ExtractedRecord::from_value(value).ok_or_else(|| malformed("response is not a JSON object".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_isolate_json_strips_prose() {
        assert_eq!(
            isolate_json("Here is the JSON: {\"bank\": \"X\"} thanks"),
            "{\"bank\": \"X\"}"
        );
        assert_eq!(
            isolate_json("```json\n{\"a\": {\"b\": 1}}\n```"),
            "{\"a\": {\"b\": 1}}"
        );
    }

    #[test]
    fn test_isolate_json_without_braces() {
        assert_eq!(isolate_json("no json here"), "no json here");
        assert_eq!(isolate_json(""), "");
        assert_eq!(isolate_json("} backwards {"), "} backwards {");
        assert_eq!(isolate_json("{\"open\": 1"), "{\"open\": 1");
    }

    #[test]
    fn test_parse_record() {
        let record = parse_record("Here is the JSON: {\"bank\":\"X\",\"transactions\":[]} thanks").unwrap();
        assert_eq!(record.into_value(), json!({"bank": "X", "transactions": []}));
    }

    #[test]
    fn test_parse_failure_keeps_raw_response() {
        match parse_record("Sorry, I cannot read this statement.") {
            Err(PipelineError::MalformedExtraction { raw_response, .. }) => {
                assert_eq!(raw_response, "Sorry, I cannot read this statement.");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_non_object_is_malformed() {
        assert!(matches!(
            parse_record("[1, 2, 3]"),
            Err(PipelineError::MalformedExtraction { .. })
        ));
        assert!(matches!(
            parse_record("{\"bank\": \"X\", }"),
            Err(PipelineError::MalformedExtraction { .. })
        ));
    }
}
