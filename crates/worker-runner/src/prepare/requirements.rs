//! Pinned requirement lines pasted above the code

use once_cell::sync::Lazy;
use regex::Regex;

/// Line prefixes that open the code region
const CODE_MARKERS: &[&str] = &[
    "import ",
    "from ",
    "def ",
    "class ",
    "async def",
    "#",
    "if __name__",
];

/// `name[extras] <pin-op> ...`
static PINNED_REQUIREMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*(\[[^\]]*\])?\s*(==|>=|<=|~=|!=)\s*\S")
        .expect("valid regex")
});

fn opens_code(line: &str) -> bool {
    let trimmed = line.trim();
    CODE_MARKERS.iter().any(|marker| trimmed.starts_with(marker))
}

fn is_pinned_requirement(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.starts_with('#') && PINNED_REQUIREMENT.is_match(trimmed)
}

/// Remove pinned requirement lines that precede the first code line.
///
/// Returns the removed lines, trimmed, in file order. Lines after the code
/// region starts are never touched, and other pre-code lines are kept.
pub fn strip_requirement_lines(lines: &mut Vec<String>) -> Vec<String> {
    let code_start = lines
        .iter()
        .position(|line| opens_code(line))
        .unwrap_or(lines.len());

    let mut stripped = Vec::new();
    let mut kept = Vec::with_capacity(lines.len());
    for (idx, line) in lines.drain(..).enumerate() {
        if idx < code_start && is_pinned_requirement(&line) {
            stripped.push(line.trim().to_string());
        } else {
            kept.push(line);
        }
    }
    *lines = kept;
    stripped
}
