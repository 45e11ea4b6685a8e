//! Parsing of the loosely formatted `Params` and `headers` fields.
//!
//! Both fields accept either a JSON object or a delimited list. JSON is
//! tried first; anything that is not a JSON object falls back to the
//! delimited form, where malformed segments are skipped rather than
//! failing the command.

use percent_encoding::percent_decode_str;
use serde_json::Value;
use tracing::debug;

/// Resolve query parameters from `Params`.
///
/// Delimited form: `k=v` segments separated by `&` or `;`. A segment is
/// split at its first `=`; segments where `=` is missing, first, or last
/// are skipped. Both sides are trimmed and form-decoded.
pub fn parse_query_params(raw: &str) -> Vec<(String, String)> {
    if raw.is_empty() {
        return Vec::new();
    }
    if let Some(pairs) = json_object_pairs(raw) {
        return pairs;
    }
    debug!("Params is not a JSON object, parsing as delimited pairs");

    raw.split(['&', ';'])
        .filter_map(|segment| {
            let (key, value) = split_inner(segment, segment.find('=')?)?;
            Some((form_decode(key.trim()), form_decode(value.trim())))
        })
        .collect()
}

/// Resolve request headers from `headers`.
///
/// Delimited form: segments separated by `&` or `;` (whitespace after the
/// separator is ignored). A segment splits at its first `:` unless that
/// `:` is the first character, in which case it splits at the first `=`.
/// Segments whose separator is missing, first, or last are skipped.
pub fn parse_headers(raw: &str) -> Vec<(String, String)> {
    if raw.is_empty() {
        return Vec::new();
    }
    if let Some(pairs) = json_object_pairs(raw) {
        return pairs;
    }
    debug!("headers is not a JSON object, parsing as delimited pairs");

    raw.split(['&', ';'])
        .map(str::trim_start)
        .filter_map(|segment| {
            let idx = match segment.find(':') {
                Some(idx) if idx > 0 => idx,
                _ => segment.find('=')?,
            };
            let (key, value) = split_inner(segment, idx)?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Split around the one-byte separator at `idx`, requiring text on both
/// sides of it.
fn split_inner(segment: &str, idx: usize) -> Option<(&str, &str)> {
    if idx == 0 || idx + 1 >= segment.len() {
        return None;
    }
    Some((&segment[..idx], &segment[idx + 1..]))
}

/// Entries of a JSON object in document order, values stringified.
fn json_object_pairs(raw: &str) -> Option<Vec<(String, String)>> {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) else {
        return None;
    };
    Some(
        map.into_iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect(),
    )
}

/// `application/x-www-form-urlencoded` decoding: `+` is a space, `%XX`
/// escapes are decoded, invalid UTF-8 is replaced.
fn form_decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn json_params_keep_insertion_order() {
        assert_eq!(
            parse_query_params(r#"{"b":"2","a":"1"}"#),
            pairs(&[("b", "2"), ("a", "1")])
        );
        assert_eq!(
            parse_query_params(r#"{"a":"1","b":"2"}"#),
            pairs(&[("a", "1"), ("b", "2")])
        );
    }

    #[test]
    fn json_params_stringify_non_strings() {
        assert_eq!(
            parse_query_params(r#"{"n":5,"ok":true,"none":null,"list":[1,2]}"#),
            pairs(&[("n", "5"), ("ok", "true"), ("none", "null"), ("list", "[1,2]")])
        );
    }

    #[test]
    fn delimited_params() {
        assert_eq!(parse_query_params("a=1&b=2"), pairs(&[("a", "1"), ("b", "2")]));
        assert_eq!(parse_query_params("a=1;b=2"), pairs(&[("a", "1"), ("b", "2")]));
    }

    #[test]
    fn delimited_params_decode_and_trim() {
        assert_eq!(
            parse_query_params(" q = hello+world & tag=%23rust"),
            pairs(&[("q", "hello world"), ("tag", "#rust")])
        );
    }

    #[test]
    fn delimited_params_split_at_first_equals() {
        assert_eq!(parse_query_params("expr=a=b"), pairs(&[("expr", "a=b")]));
    }

    #[test]
    fn malformed_param_segments_are_skipped() {
        assert!(parse_query_params("=onlyvalue").is_empty());
        assert!(parse_query_params("keyonly=").is_empty());
        assert!(parse_query_params("novalue").is_empty());
        assert_eq!(
            parse_query_params("=x&a=1&b=&c"),
            pairs(&[("a", "1")])
        );
    }

    #[test]
    fn json_array_falls_back_to_delimited() {
        assert!(parse_query_params(r#"["a=1"]"#).is_empty());
    }

    #[test]
    fn empty_inputs() {
        assert!(parse_query_params("").is_empty());
        assert!(parse_headers("").is_empty());
    }

    #[test]
    fn json_headers() {
        assert_eq!(
            parse_headers(r#"{"Accept":"text/html","X-Retry":3}"#),
            pairs(&[("Accept", "text/html"), ("X-Retry", "3")])
        );
    }

    #[test]
    fn delimited_headers_colon_or_equals() {
        assert_eq!(
            parse_headers("Accept: text/plain; X-Token=abc&  X-Trace : 7"),
            pairs(&[("Accept", "text/plain"), ("X-Token", "abc"), ("X-Trace", "7")])
        );
    }

    #[test]
    fn header_value_may_contain_colons() {
        assert_eq!(
            parse_headers("Referer: http://example.com:8080/x"),
            pairs(&[("Referer", "http://example.com:8080/x")])
        );
    }

    #[test]
    fn leading_colon_falls_back_to_equals() {
        assert_eq!(parse_headers(":weird=value"), pairs(&[(":weird", "value")]));
    }

    #[test]
    fn malformed_header_segments_are_skipped() {
        assert!(parse_headers(":novalue").is_empty());
        assert!(parse_headers("Accept:").is_empty());
        assert!(parse_headers("justtext").is_empty());
        assert_eq!(
            parse_headers("bad;Accept: */*"),
            pairs(&[("Accept", "*/*")])
        );
    }

    #[test]
    fn duplicate_headers_are_kept() {
        assert_eq!(
            parse_headers("X-A: 1; X-A: 2"),
            pairs(&[("X-A", "1"), ("X-A", "2")])
        );
    }
}
