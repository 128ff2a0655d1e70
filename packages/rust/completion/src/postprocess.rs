//! Text post-processing applied to successful completions.

/// Citation titles to insert after the byte offset `end_index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub end_index: usize,
    pub titles: Vec<String>,
}

/// Insert ` (title)` markers at each citation's end offset.
///
/// Insertions run in descending offset order so an insertion never shifts an
/// offset that is still pending. Offsets past the end are clamped to the text
/// length and offsets inside a multi-byte character move back to its start.
pub fn splice_citations(text: &str, citations: &[Citation]) -> String {
    let mut order: Vec<usize> = (0..citations.len()).collect();
    // Ties keep their original order in the output.
    order.sort_by(|&a, &b| {
        citations[b]
            .end_index
            .cmp(&citations[a].end_index)
            .then(b.cmp(&a))
    });

    let mut out = text.to_string();
    for i in order {
        let citation = &citations[i];
        if citation.titles.is_empty() {
            continue;
        }
        let marker: String = citation
            .titles
            .iter()
            .map(|t| format!(" ({t})"))
            .collect();
        let at = floor_char_boundary(text, citation.end_index);
        out.insert_str(at, &marker);
    }
    out
}

/// Largest char boundary of `text` at or below `index`.
pub(crate) fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut at = index.min(text.len());
    while !text.is_char_boundary(at) {
        at -= 1;
    }
    at
}

/// Remove a wrapping markdown code fence, with or without a language tag.
pub fn strip_code_fences(text: &str) -> String {
    let mut s = text.trim();

    if let Some(rest) = s.strip_prefix("```") {
        // Drop the language tag line when there is one.
        s = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest.strip_prefix("json").unwrap_or(rest),
        };
    }

    let s = s.trim_end();
    let s = s.strip_suffix("```").unwrap_or(s);
    s.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cite(end_index: usize, title: &str) -> Citation {
        Citation {
            end_index,
            titles: vec![title.into()],
        }
    }

    #[test]
    fn splices_in_descending_order() {
        let citations = [cite(1, "x.com"), cite(2, "y.com")];
        assert_eq!(splice_citations("AB", &citations), "A (x.com)B (y.com)");
    }

    #[test]
    fn input_order_does_not_matter() {
        let forward = [cite(1, "x"), cite(2, "y")];
        let backward = [cite(2, "y"), cite(1, "x")];
        assert_eq!(
            splice_citations("AB", &forward),
            splice_citations("AB", &backward)
        );
    }

    #[test]
    fn multiple_titles_joined_with_spaces() {
        let citations = [Citation {
            end_index: 5,
            titles: vec!["a.com".into(), "b.com".into()],
        }];
        assert_eq!(
            splice_citations("Hello world", &citations),
            "Hello (a.com) (b.com) world"
        );
    }

    #[test]
    fn out_of_range_and_multibyte_offsets_are_clamped() {
        assert_eq!(splice_citations("ab", &[cite(10, "t")]), "ab (t)");
        // 'é' spans bytes 1..3; offset 2 falls inside it.
        assert_eq!(splice_citations("aéb", &[cite(2, "t")]), "a (t)éb");
    }

    #[test]
    fn empty_titles_are_skipped() {
        let citations = [Citation {
            end_index: 1,
            titles: vec![],
        }];
        assert_eq!(splice_citations("AB", &citations), "AB");
    }

    #[test]
    fn strips_json_fence() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  ```\n[1]\n```  "), "[1]");
    }

    #[test]
    fn strips_fence_without_newline() {
        assert_eq!(strip_code_fences("```json{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```{\"a\":1}```"), "{\"a\":1}");
    }

    #[test]
    fn plain_text_untouched() {
        assert_eq!(strip_code_fences(" plain answer \n"), "plain answer");
    }
}
