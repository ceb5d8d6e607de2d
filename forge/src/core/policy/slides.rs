//! Slide deck quality checks.
//!
//! Slides are markdown files with `---` separators. A deck is checked for
//! oversized code blocks, bullet-heavy slides, overall content per slide and
//! misplaced split notation in titles.

use std::sync::LazyLock;

use regex::Regex;

pub const MAX_CODE_LINES: usize = 12;
pub const MAX_BULLETS: usize = 5;
pub const MAX_CONTENT_LINES: usize = 15;

const BULLET_PREFIXES: [&str; 5] = ["- ", "* ", "+ ", "✅ ", "❌ "];

static SPLIT_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(\d+/\d+\)$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlideFinding {
    /// 1-indexed line the finding anchors to.
    pub line: usize,
    pub check: &'static str,
    pub message: String,
}

/// Run every slide check over one deck, in line order.
pub fn check_deck(text: &str) -> Vec<SlideFinding> {
    let lines: Vec<&str> = text.lines().collect();
    let mut findings = Vec::new();
    check_code_blocks(&lines, &mut findings);
    check_slides(&lines, &mut findings);
    check_split_titles(&lines, &mut findings);
    findings.sort_by(|a, b| a.line.cmp(&b.line).then(a.check.cmp(b.check)));
    findings
}

fn check_code_blocks(lines: &[&str], findings: &mut Vec<SlideFinding>) {
    let mut open: Option<(usize, usize)> = None;
    for (idx, line) in lines.iter().enumerate() {
        let lineno = idx + 1;
        if line.trim().starts_with("```") {
            match open.take() {
                None => open = Some((lineno, 0)),
                Some((start, count)) if count > MAX_CODE_LINES => findings.push(SlideFinding {
                    line: start,
                    check: "code-block-length",
                    message: format!(
                        "code block has {count} lines (max {MAX_CODE_LINES}); split it across slides with (1/2), (2/2) notation"
                    ),
                }),
                Some(_) => {}
            }
        } else if let Some((_, count)) = open.as_mut() {
            *count += 1;
        }
    }
}

/// Bullet and content-line budgets share the slide boundaries.
fn check_slides(lines: &[&str], findings: &mut Vec<SlideFinding>) {
    let mut slide_start = 1;
    let mut bullets = 0;
    let mut content = 0;
    let mut in_code = false;

    for (idx, line) in lines.iter().enumerate() {
        let stripped = line.trim();
        if stripped == "---" && !in_code {
            flush(slide_start, bullets, content, findings);
            slide_start = idx + 2;
            bullets = 0;
            content = 0;
            continue;
        }
        if stripped.starts_with("```") {
            in_code = !in_code;
            continue;
        }
        if !in_code && BULLET_PREFIXES.iter().any(|p| stripped.starts_with(p)) {
            bullets += 1;
        }
        if !stripped.is_empty() && !stripped.starts_with('#') {
            content += 1;
        }
    }
    flush(slide_start, bullets, content, findings);
}

fn flush(start: usize, bullets: usize, content: usize, findings: &mut Vec<SlideFinding>) {
    if bullets > MAX_BULLETS {
        findings.push(SlideFinding {
            line: start,
            check: "bullet-count",
            message: format!(
                "slide has {bullets} bullet points (max {MAX_BULLETS}); split content across slides"
            ),
        });
    }
    if content > MAX_CONTENT_LINES {
        findings.push(SlideFinding {
            line: start,
            check: "total-content",
            message: format!(
                "slide has {content} content lines (max {MAX_CONTENT_LINES}); split it into smaller slides"
            ),
        });
    }
}

fn check_split_titles(lines: &[&str], findings: &mut Vec<SlideFinding>) {
    for (idx, line) in lines.iter().enumerate() {
        if line.starts_with("##") && line.contains("(1/") && !SPLIT_SUFFIX.is_match(line.trim()) {
            findings.push(SlideFinding {
                line: idx + 1,
                check: "split-notation",
                message: "split slide notation belongs at the end of the title: '## Title (1/2)'"
                    .to_string(),
            });
        }
    }
}
