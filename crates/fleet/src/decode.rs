use fleet_protocol::{DispatchResult, ErrorKind, RawOutcome};
use serde_json::Value;

/// Classifies backend output as a structured report or opaque text.
///
/// Scripts emit either a JSON report or free-text diagnostics depending on
/// their invocation flags. A parseable JSON object wins outright, whatever
/// the exit indicator said: scripts self-report errors inside the payload and
/// the decoder does not second-guess them. Anything else falls back to raw
/// text classified by the exit indicator.
pub fn decode(raw: &RawOutcome) -> DispatchResult {
    if let Ok(Value::Object(payload)) = serde_json::from_str::<Value>(raw.output.trim()) {
        return DispatchResult::structured(payload);
    }
    let error = if raw.exit_succeeded {
        None
    } else {
        Some(ErrorKind::DecodeFallback)
    };
    DispatchResult::raw(raw.output.clone(), raw.exit_succeeded, error)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(output: &str, exit_succeeded: bool) -> RawOutcome {
        RawOutcome {
            output: output.to_string(),
            exit_succeeded,
        }
    }

    #[test]
    fn json_object_wins_over_failed_exit() {
        let raw = outcome("{\"usedMinutes\": 45, \"limitHours\": 2}", false);
        let result = decode(&raw);
        assert!(result.succeeded);
        let payload = result.payload.expect("payload");
        assert_eq!(payload["usedMinutes"], 45);
        assert!(result.error.is_none());
    }

    #[test]
    fn free_text_with_clean_exit_is_success() {
        let result = decode(&outcome("all limits applied\n", true));
        assert!(result.succeeded);
        assert!(result.payload.is_none());
        assert_eq!(result.raw_output, "all limits applied\n");
        assert!(result.error.is_none());
    }

    #[test]
    fn free_text_with_failed_exit_marks_fallback() {
        let result = decode(&outcome("something broke\n", false));
        assert!(!result.succeeded);
        assert_eq!(result.error, Some(ErrorKind::DecodeFallback));
        assert_eq!(result.raw_output, "something broke\n");
    }

    #[test]
    fn empty_output_with_clean_exit_is_success() {
        let result = decode(&outcome("", true));
        assert!(result.succeeded);
        assert!(result.payload.is_none());
        assert_eq!(result.raw_output, "");
    }

    #[test]
    fn non_object_json_falls_back_to_raw() {
        let result = decode(&outcome("[1, 2, 3]", true));
        assert!(result.succeeded);
        assert!(result.payload.is_none());
        assert_eq!(result.raw_output, "[1, 2, 3]");
    }

    #[test]
    fn decoding_is_idempotent() {
        let raw = outcome("{\"ok\": true}", true);
        assert_eq!(decode(&raw), decode(&raw));
        let raw = outcome("plain text", false);
        assert_eq!(decode(&raw), decode(&raw));
    }
}
