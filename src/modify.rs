use tracing::{debug, warn};

use crate::{
    config::{Modification, ModificationMode, Rule},
    dom::Document,
    error::{PipelineError, RuleError},
};

/// Marker in `wrapper` replaced by the extracted value.
pub const WRAPPER_MARKER: &str = "%s";

/// Parses `html`, applies every rule matching `url` in order and serializes
/// the result.
pub fn rewrite_document(html: &str, url: &str, rules: &[Rule]) -> Result<String, PipelineError> {
    let document = Document::parse(html);
    apply_rules(&document, rules, url);
    document.to_html().map_err(PipelineError::Parse)
}

/// Returns how many rules were applied. A failing rule is logged and skipped.
pub fn apply_rules(document: &Document, rules: &[Rule], url: &str) -> usize {
    let mut applied = 0;
    for rule in rules {
        if !rule.matches_url(url) {
            debug!(url, pattern = %rule.modification.url_match, "rule does not match url");
            continue;
        }
        match apply_modification(document, &rule.modification) {
            Ok(()) => applied += 1,
            Err(err) => warn!(%err, url, "skipping rule"),
        }
    }
    applied
}

pub fn apply_modification(
    document: &Document,
    modification: &Modification,
) -> Result<(), RuleError> {
    let mut sources = document.find(&modification.selector)?;
    if modification.index >= sources.len() {
        return Err(RuleError::IndexOutOfRange {
            selector: modification.selector.clone(),
            index: modification.index,
        });
    }
    let source = sources.swap_remove(modification.index);

    let (mode, target_selector) = modification.target().ok_or(RuleError::NoMode)?;
    let targets = document
        .find(target_selector)
        .map_err(|_| RuleError::NoTarget(target_selector.to_string()))?;
    if targets.is_empty() {
        return Err(RuleError::NoTarget(target_selector.to_string()));
    }

    let mut value = if modification.attribute.is_empty() {
        source.text()
    } else {
        source.attribute(&modification.attribute).unwrap_or_default()
    };
    if modification.trim {
        value = collapse_whitespace(&value);
    }
    let value = apply_wrapper(&modification.wrapper, value);

    for target in &targets {
        match mode {
            ModificationMode::Append => target.append_html(&value),
            ModificationMode::Replace => target.replace_with_html(&value),
        }
    }
    Ok(())
}

/// Collapses every whitespace run to a single space and strips both ends.
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn apply_wrapper(wrapper: &str, value: String) -> String {
    if wrapper.contains(WRAPPER_MARKER) {
        wrapper.replacen(WRAPPER_MARKER, &value, 1)
    } else {
        value
    }
}
