//! Splitting long replies into platform-sized messages.

/// Split `text` into chunks of at most `limit` UTF-16 code units.
///
/// Lines are packed greedily and kept whole where possible; a single line
/// longer than `limit` is cut on character boundaries. Concatenating the
/// chunks yields the original text. Empty text yields no chunks.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0usize;

    for line in text.split_inclusive('\n') {
        let line_len = utf16_len(line);

        if buf_len + line_len > limit && !buf.is_empty() {
            chunks.push(std::mem::take(&mut buf));
            buf_len = 0;
        }

        if line_len > limit {
            for piece in hard_split(line, limit) {
                let piece_len = utf16_len(&piece);
                if buf_len + piece_len > limit && !buf.is_empty() {
                    chunks.push(std::mem::take(&mut buf));
                    buf_len = 0;
                }
                buf.push_str(&piece);
                buf_len += piece_len;
            }
            continue;
        }

        buf.push_str(line);
        buf_len += line_len;
    }

    if !buf.is_empty() {
        chunks.push(buf);
    }
    chunks
}

fn utf16_len(s: &str) -> usize {
    s.chars().map(char::len_utf16).sum()
}

fn hard_split(line: &str, limit: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut len = 0;
    for ch in line.chars() {
        let w = ch.len_utf16();
        if len + w > limit && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
            len = 0;
        }
        current.push(ch);
        len += w;
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_message("hello\nworld", 4000), vec!["hello\nworld"]);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(split_message("", 4000).is_empty());
    }

    #[test]
    fn splits_at_line_boundaries() {
        let text = "aaaa\nbbbb\ncccc\n";
        let chunks = split_message(text, 10);
        assert_eq!(chunks, vec!["aaaa\nbbbb\n", "cccc\n"]);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn overlong_line_is_cut() {
        let text = "x".repeat(25);
        let chunks = split_message(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn limit_counts_utf16_units() {
        // Each emoji is two UTF-16 code units.
        let text = "😀😀😀";
        let chunks = split_message(text, 4);
        assert_eq!(chunks, vec!["😀😀", "😀"]);
    }

    #[test]
    fn every_chunk_respects_limit() {
        let text: String = (0..300)
            .map(|i| format!("line number {i} {}\n", "z".repeat(i % 37)))
            .collect();
        for chunk in split_message(&text, 120) {
            assert!(utf16_len(&chunk) <= 120);
        }
        assert_eq!(split_message(&text, 120).concat(), text);
    }
}
