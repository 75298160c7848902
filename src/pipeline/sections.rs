use regex::Regex;

use crate::models::DocumentSection;

/// Section headings the letter prompt asks the model to produce.
pub const KNOWN_SECTION_HEADINGS: [&str; 5] = [
    "History of presenting complaint",
    "Examination findings",
    "Investigation results",
    "Assessment and plan",
    "Current medications",
];

/// Body used when generation produced no recognisable sections.
pub const SECTION_PLACEHOLDER: &str = "Content unavailable in generated output.";

/// Split generated letter text into ordered, headed sections.
///
/// A line counts as a heading when, after stripping Markdown markup
/// (`**`, `##`, trailing colons and asterisks), it equals one of
/// [`KNOWN_SECTION_HEADINGS`] case-insensitively. Body lines accumulate
/// under the most recent heading; blank lines are dropped. Headings with
/// no body are discarded rather than emitted empty. If nothing matches
/// at all, one placeholder section per known heading is returned instead
/// of failing, because generation output is unreliable free text.
pub fn parse_sections(generated_text: &str) -> Vec<DocumentSection> {
    let heading_pattern = Regex::new(&format!(
        r"(?i)^(?:\*\*|##\s*)?({})[:\*\s]*$",
        KNOWN_SECTION_HEADINGS.join("|")
    ))
    .unwrap();

    let mut sections: Vec<DocumentSection> = Vec::new();
    let mut current_heading: Option<&'static str> = None;
    let mut current_lines: Vec<&str> = Vec::new();

    for raw_line in generated_text.lines() {
        let line = raw_line.trim();
        if let Some(caps) = heading_pattern.captures(line) {
            if let Some(heading) = current_heading {
                if !current_lines.is_empty() {
                    sections.push(DocumentSection::new(heading, &current_lines.join("\n")));
                }
            }
            current_heading = caps
                .get(1)
                .and_then(|m| canonical_heading(m.as_str()));
            current_lines.clear();
            continue;
        }

        if current_heading.is_some() && !line.is_empty() {
            current_lines.push(line);
        }
    }

    if let Some(heading) = current_heading {
        if !current_lines.is_empty() {
            sections.push(DocumentSection::new(heading, &current_lines.join("\n")));
        }
    }

    if sections.is_empty() {
        return KNOWN_SECTION_HEADINGS
            .iter()
            .map(|heading| DocumentSection::new(heading, SECTION_PLACEHOLDER))
            .collect();
    }
    sections
}

/// Map a matched heading back to its canonical spelling.
fn canonical_heading(matched: &str) -> Option<&'static str> {
    KNOWN_SECTION_HEADINGS
        .iter()
        .find(|known| known.eq_ignore_ascii_case(matched))
        .copied()
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
