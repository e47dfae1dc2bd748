use std::sync::LazyLock;

use regex::Regex;

/// `<script>` and `<style>` elements are removed with their body; leaving the
/// body behind would turn markup into visible text.
static EXECUTABLE_ELEMENTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:script|style)\b[^>]*>.*?</(?:script|style)\s*>")
        .expect("static element pattern")
});

static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("static tag pattern"));

/// Strip markup from user text and trim surrounding whitespace.
///
/// The result may be empty; callers do not re-validate it.
pub fn sanitize_text(raw: &str) -> String {
    let without_elements = EXECUTABLE_ELEMENTS.replace_all(raw, "");
    TAGS.replace_all(&without_elements, "").trim().to_string()
}
