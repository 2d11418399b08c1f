//! The two-tier truncation algorithm shared by every section renderer
//! (§4.2): first each rendered item is capped on its own, then the
//! concatenation of items is capped again in document order, dropping
//! whatever no longer fits.

/// One rendered item participating in a total-cap pass.
pub struct Truncatable {
    pub content: String,
    pub included: bool,
    pub truncated_total_cap: bool,
}

/// Truncate `content` to `max_chars` at a valid UTF-8 boundary, appending
/// an explicit marker when truncation occurred.
pub fn truncate_per_item(content: &str, max_chars: usize) -> (String, bool) {
    if content.len() <= max_chars {
        return (content.to_string(), false);
    }
    let boundary = content.floor_char_boundary(max_chars);
    let mut result = content[..boundary].to_string();
    result.push_str("\n[TRUNCATED]\n");
    (result, true)
}

/// Walk `items` in order, accumulating their rendered length. Once the
/// running total would exceed `total_max_chars`, the first offending item
/// is cut down to whatever room remains (with a marker) and every item
/// after it is excluded entirely.
pub fn apply_total_cap(items: &mut [Truncatable], total_max_chars: usize) {
    let mut accumulated: usize = 0;

    for item in items.iter_mut() {
        if !item.included {
            continue;
        }

        let len = item.content.len();

        if accumulated + len <= total_max_chars {
            accumulated += len;
        } else if accumulated < total_max_chars {
            let remaining = total_max_chars - accumulated;
            let boundary = item.content.floor_char_boundary(remaining);
            item.content = format!("{}\n[TRUNCATED_TOTAL_CAP]\n", &item.content[..boundary]);
            item.truncated_total_cap = true;
            accumulated = total_max_chars;
        } else {
            item.content.clear();
            item.included = false;
        }
    }
}

/// Keep only the last `max_items` elements of a list, oldest dropped
/// first. Used by the Message and Observation builders (§4.3).
pub fn take_last<T>(items: Vec<T>, max_items: usize) -> Vec<T> {
    if max_items == 0 || items.len() <= max_items {
        return items;
    }
    let skip = items.len() - max_items;
    items.into_iter().skip(skip).collect()
}

/// Escape characters that would otherwise let section content break out
/// of the XML-like tags `render()` wraps it in.
pub fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_truncation_when_under_limit() {
        let (result, truncated) = truncate_per_item("hello world", 100);
        assert_eq!(result, "hello world");
        assert!(!truncated);
    }

    #[test]
    fn truncates_at_limit() {
        let (result, truncated) = truncate_per_item("abcdefghij", 5);
        assert!(truncated);
        assert!(result.starts_with("abcde"));
        assert!(result.contains("[TRUNCATED]"));
    }

    #[test]
    fn total_cap_excludes_overflow() {
        let mut items = vec![
            Truncatable {
                content: "aaaa".into(),
                included: true,
                truncated_total_cap: false,
            },
            Truncatable {
                content: "bbbbbb".into(),
                included: true,
                truncated_total_cap: false,
            },
            Truncatable {
                content: "cccc".into(),
                included: true,
                truncated_total_cap: false,
            },
        ];

        apply_total_cap(&mut items, 8);

        assert!(items[0].included && !items[0].truncated_total_cap);
        assert!(items[1].included && items[1].truncated_total_cap);
        assert!(!items[2].included);
    }

    #[test]
    fn take_last_keeps_most_recent() {
        let kept = take_last(vec![1, 2, 3, 4, 5], 2);
        assert_eq!(kept, vec![4, 5]);
    }

    #[test]
    fn take_last_noop_when_under_cap() {
        let kept = take_last(vec![1, 2], 5);
        assert_eq!(kept, vec![1, 2]);
    }

    #[test]
    fn escape_xml_neutralizes_tags() {
        assert_eq!(escape_xml("<a>&b</a>"), "&lt;a&gt;&amp;b&lt;/a&gt;");
    }

    #[test]
    fn escape_xml_neutralizes_quotes() {
        assert_eq!(
            escape_xml(r#"table="users" it's"#),
            "table=&quot;users&quot; it&apos;s"
        );
    }
}
