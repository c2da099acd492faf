//! Markdown task-list handling for comment bodies.
//!
//! A comment is a checklist when at least one of its lines is a task item of
//! the form `* [ ] text` or `* [x] text` (leading whitespace allowed, `X`
//! accepted as checked). Items are located by a line tokenizer that records
//! the byte position of each state character, so toggling an item rewrites
//! exactly one byte and leaves the rest of the body untouched.

use serde::Serialize;

use crate::error::{Error, Result};

/// One task item found in a body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecklistItem {
    pub checked: bool,
    pub text: String,
    /// Byte offset of the state character inside the body.
    #[serde(skip)]
    marker: usize,
}

impl ChecklistItem {
    pub fn marker_offset(&self) -> usize {
        self.marker
    }
}

/// Scan a single line starting at `line_start` in the full body.
fn scan_line(line: &str, line_start: usize) -> Option<ChecklistItem> {
    let trimmed = line.trim_start();
    let mut pos = line.len() - trimmed.len();

    let rest = trimmed.strip_prefix('*')?;
    pos += 1;

    let after_ws = rest.trim_start();
    pos += rest.len() - after_ws.len();

    let rest = after_ws.strip_prefix('[')?;
    pos += 1;

    let mut chars = rest.chars();
    let checked = match chars.next()? {
        ' ' => false,
        'x' | 'X' => true,
        _ => return None,
    };
    let marker = line_start + pos;

    let rest = chars.as_str().strip_prefix(']')?;
    let text = rest.trim();
    if text.is_empty() {
        return None;
    }

    Some(ChecklistItem {
        checked,
        text: text.to_string(),
        marker,
    })
}

/// All task items in `body`, in document order.
pub fn tokenize(body: &str) -> Vec<ChecklistItem> {
    let mut items = Vec::new();
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        if let Some(item) = scan_line(line, offset) {
            items.push(item);
        }
        offset += line.len();
    }
    items
}

/// Whether `body` contains at least one task item.
pub fn is_checklist(body: &str) -> bool {
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        if scan_line(line, offset).is_some() {
            return true;
        }
        offset += line.len();
    }
    false
}

/// Return `body` with item `index` set to `checked`.
///
/// Only the state character of that item changes.
pub fn set_checked(body: &str, index: usize, checked: bool) -> Result<String> {
    let items = tokenize(body);
    let item = items.get(index).ok_or_else(|| {
        Error::InvalidInput(format!(
            "Checklist item {} out of range ({} items)",
            index,
            items.len()
        ))
    })?;

    let mut out = body.to_string();
    let state = if checked { "x" } else { " " };
    if item.checked != checked {
        out.replace_range(item.marker..item.marker + 1, state);
    }
    Ok(out)
}

/// Return `body` with item `index` flipped.
pub fn toggle(body: &str, index: usize) -> Result<String> {
    let current = tokenize(body)
        .get(index)
        .map(|item| item.checked)
        .ok_or_else(|| Error::InvalidInput(format!("Checklist item {} out of range", index)))?;
    set_checked(body, index, !current)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "Notes for review:\n* [ ] fix edge flicker\n  * [x] retime shot\n* [X] grade\nnot an item [ ]\n";

    #[test]
    fn test_tokenize_finds_items_in_order() {
        let items = tokenize(BODY);
        let summary: Vec<_> = items.iter().map(|i| (i.checked, i.text.as_str())).collect();
        assert_eq!(
            summary,
            vec![
                (false, "fix edge flicker"),
                (true, "retime shot"),
                (true, "grade"),
            ]
        );
    }

    #[test]
    fn test_markers_point_at_state_char() {
        for item in tokenize(BODY) {
            let c = &BODY[item.marker_offset()..item.marker_offset() + 1];
            assert!(c == " " || c == "x" || c == "X");
        }
    }

    #[test]
    fn test_is_checklist() {
        assert!(is_checklist(BODY));
        assert!(is_checklist("*[x]tight"));
        assert!(!is_checklist("plain comment"));
        assert!(!is_checklist("* [ ]   "));
        assert!(!is_checklist("- [ ] dash bullets are not items"));
        assert!(!is_checklist("* [y] bad state"));
    }

    #[test]
    fn test_toggle_flips_only_target() {
        let toggled = toggle(BODY, 0).unwrap();
        let items = tokenize(&toggled);
        assert!(items[0].checked);
        assert!(items[1].checked);
        assert!(items[2].checked);

        let diff: Vec<_> = BODY
            .bytes()
            .zip(toggled.bytes())
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(diff, vec![tokenize(BODY)[0].marker_offset()]);
        assert_eq!(BODY.len(), toggled.len());
    }

    #[test]
    fn test_toggle_twice_is_byte_identical_for_lowercase() {
        let once = toggle(BODY, 1).unwrap();
        let twice = toggle(&once, 1).unwrap();
        assert_eq!(twice, BODY);
    }

    #[test]
    fn test_set_checked_same_state_is_noop() {
        assert_eq!(set_checked(BODY, 2, true).unwrap(), BODY);
    }

    #[test]
    fn test_out_of_range_is_invalid_input() {
        assert!(matches!(set_checked(BODY, 3, true), Err(Error::InvalidInput(_))));
        assert!(matches!(toggle("no items", 0), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_crlf_and_unicode_preserved() {
        let body = "Ünïcode ✓\r\n* [ ] naïve café\r\n";
        let out = toggle(body, 0).unwrap();
        assert_eq!(out, "Ünïcode ✓\r\n* [x] naïve café\r\n");
        assert_eq!(tokenize(&out)[0].text, "naïve café");
    }
}
