/// Split document content into embedding-sized chunks.
///
/// Sentences end at `.`, `!`, or `?` (consecutive terminators stay with
/// their sentence). Sentences greedy-pack into chunks of at most
/// `max_chars` without crossing sentence boundaries; a single sentence
/// longer than `max_chars` is hard-split. Concatenating the returned
/// chunks reproduces the input exactly.
pub fn chunk_content(content: &str, max_chars: usize) -> Vec<String> {
    if content.trim().is_empty() {
        return vec![content.to_string()];
    }

    let sentences = split_sentences(content);

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for sentence in sentences {
        if sentence.len() > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            hard_split(sentence, max_chars, &mut chunks);
            continue;
        }

        if !current.is_empty() && current.len() + sentence.len() > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        current.push_str(sentence);
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Sentence slices including their terminators and trailing whitespace, so
/// that the slices concatenate back to the input.
fn split_sentences(content: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = content.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            // Swallow a run of terminators ("?!", "...") and trailing spaces.
            let mut end = i + c.len_utf8();
            while let Some(&(j, next)) = chars.peek() {
                if matches!(next, '.' | '!' | '?') || next.is_whitespace() {
                    end = j + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            sentences.push(&content[start..end]);
            start = end;
        }
    }

    if start < content.len() {
        sentences.push(&content[start..]);
    }

    sentences
}

fn hard_split(sentence: &str, max_chars: usize, chunks: &mut Vec<String>) {
    let mut piece = String::new();
    for c in sentence.chars() {
        if piece.len() + c.len_utf8() > max_chars && !piece.is_empty() {
            chunks.push(std::mem::take(&mut piece));
        }
        piece.push(c);
    }
    if !piece.is_empty() {
        chunks.push(piece);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_is_one_chunk() {
        assert_eq!(chunk_content("", 1000), vec![String::new()]);
        assert_eq!(chunk_content("   ", 1000), vec!["   ".to_string()]);
    }

    #[test]
    fn test_short_content_is_one_chunk() {
        let chunks = chunk_content("One sentence. Another sentence.", 1000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "One sentence. Another sentence.");
    }

    #[test]
    fn test_packing_respects_sentence_boundaries() {
        // Each sentence is 12 chars ("0123456789. ").
        let content = "aaaaaaaaaa. bbbbbbbbbb. cccccccccc.";
        let chunks = chunk_content(content, 24);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].ends_with("bbbbbbbbbb. "));
        assert_eq!(chunks[1], "cccccccccc.");
    }

    #[test]
    fn test_concatenation_is_lossless() {
        let content = "First! Second? Third... Fourth sentence without end";
        let chunks = chunk_content(content, 16);
        assert_eq!(chunks.concat(), content);
        for chunk in &chunks {
            assert!(chunk.len() <= 16);
        }
    }

    #[test]
    fn test_oversized_sentence_hard_splits() {
        let content = "x".repeat(2500);
        let chunks = chunk_content(&content, 1000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1000);
        assert_eq!(chunks[2].len(), 500);
        assert_eq!(chunks.concat(), content);
    }

    #[test]
    fn test_terminator_runs_stay_with_sentence() {
        let sentences = split_sentences("Really?! Yes. ");
        assert_eq!(sentences, vec!["Really?! ", "Yes. "]);
    }
}
