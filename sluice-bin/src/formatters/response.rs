use serde_json::Value;
use sluice_lib::Response;

/// Render a successful response for stdout.
///
/// JSON bodies are pretty-printed, anything else is passed through as is.
/// `204 No Content` renders as nothing at all.
pub(crate) fn format_response(response: &Response) -> Vec<u8> {
    let Some(body) = response.bytes() else {
        return Vec::new();
    };

    match serde_json::from_slice::<Value>(body) {
        Ok(json) => format_json(&json).into_bytes(),
        Err(_) => body.to_vec(),
    }
}

/// Render the payload of an API error for stderr.
pub(crate) fn format_payload(payload: &Value) -> String {
    match payload {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        json => format_json(json),
    }
}

fn format_json(json: &Value) -> String {
    let mut rendered = serde_json::to_string_pretty(json).unwrap_or_else(|_| json.to_string());
    rendered.push('\n');
    rendered
}
