use crate::analysis::token::Token;
use unicode_segmentation::UnicodeSegmentation;

/// Standard Unicode tokenizer: word segmentation plus lowercase fold.
/// Text fields are indexed through this; `match` and `match_phrase` queries
/// run their query text through the same instance so terms line up.
#[derive(Debug, Clone)]
pub struct StandardTokenizer {
    pub lowercase: bool,
    pub max_token_length: usize,
}

impl Default for StandardTokenizer {
    fn default() -> Self {
        StandardTokenizer {
            lowercase: true,
            max_token_length: 255,
        }
    }
}

impl StandardTokenizer {
    pub fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut position = 0u32;

        for (offset, word) in text.unicode_word_indices() {
            if word.len() > self.max_token_length {
                continue;
            }
            let token_text = if self.lowercase {
                word.to_lowercase()
            } else {
                word.to_string()
            };
            tokens.push(Token::new(token_text, position, offset));
            position += 1;
        }

        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_with_positions() {
        let tokenizer = StandardTokenizer::default();
        let tokens = tokenizer.tokenize("Hello, World! rust");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["hello", "world", "rust"]);
        assert_eq!(tokens[0].position, 0);
        assert_eq!(tokens[2].position, 2);
    }

    #[test]
    fn empty_text_yields_no_tokens() {
        let tokenizer = StandardTokenizer::default();
        assert!(tokenizer.tokenize("").is_empty());
        assert!(tokenizer.tokenize("  ,.!  ").is_empty());
    }
}
