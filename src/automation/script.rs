//! Page scripts evaluated on automation surfaces.
//!
//! Every caller-supplied value is embedded as a complete JavaScript string
//! literal, so quotes, backslashes, and line terminators in a keyword or
//! click text cannot break out of the script.

use serde_json::Value;

/// Script result reported by the click script when an element was clicked.
pub const CLICKED: &str = "true";
pub const SUBMITTED: &str = "submitted";
pub const FOUND: &str = "found";
pub const NEXT_CLICKED: &str = "nextclicked";

/// Render `value` as a double-quoted JavaScript string literal.
pub fn js_string_literal(value: &str) -> String {
    // JSON leaves U+2028/U+2029 raw; pre-ES2019 engines reject them in literals.
    Value::String(value.to_owned())
        .to_string()
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

/// Normalise a script result. Surfaces report values JSON-encoded
/// (`"\"found\""`); bare values pass through trimmed.
pub fn script_value(raw: &str) -> String {
    let raw = raw.trim();
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::String(s)) => s,
        _ => raw.to_string(),
    }
}

/// Click the first element, in document order, whose visible text contains
/// `text` case-insensitively. Evaluates to `true` or `false`.
pub fn click_by_text(text: &str) -> String {
    format!(
        "(function() {{\
           var needle = {needle};\
           var elements = document.querySelectorAll('*');\
           for (var i = 0; i < elements.length; i++) {{\
             var el = elements[i];\
             if (el.innerText && el.innerText.toLowerCase().indexOf(needle) !== -1) {{\
               el.click();\
               return true;\
             }}\
           }}\
           return false;\
         }})();",
        needle = js_string_literal(&text.to_lowercase()),
    )
}

/// Fill the query input and submit its form. Evaluates to `submitted`,
/// `noform`, or `noinput`.
pub fn submit_query(input_selector: &str, keyword: &str) -> String {
    format!(
        "(function() {{\
           var input = document.querySelector({selector});\
           if (!input) {{ return 'noinput'; }}\
           input.focus();\
           input.value = {keyword};\
           var form = input.form;\
           if (!form) {{ return 'noform'; }}\
           form.submit();\
           return 'submitted';\
         }})();",
        selector = js_string_literal(input_selector),
        keyword = js_string_literal(keyword),
    )
}

/// Click the first anchor whose `href` contains `target`. Evaluates to
/// `found` or `not`.
pub fn click_link_to(target: &str) -> String {
    format!(
        "(function() {{\
           var target = {target};\
           var links = document.querySelectorAll('a');\
           for (var i = 0; i < links.length; i++) {{\
             var href = links[i].href;\
             if (href && href.indexOf(target) !== -1) {{\
               links[i].click();\
               return 'found';\
             }}\
           }}\
           return 'not';\
         }})();",
        target = js_string_literal(target),
    )
}

/// Click the "next page" control. Evaluates to `nextclicked` or `no_next`.
pub fn click_next(next_selector: &str) -> String {
    format!(
        "(function() {{\
           var next = document.querySelector({selector});\
           if (!next) {{ return 'no_next'; }}\
           next.click();\
           return 'nextclicked';\
         }})();",
        selector = js_string_literal(next_selector),
    )
}
