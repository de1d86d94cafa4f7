/// Drops chat lines too short or too content-free to be worth classifying.
#[derive(Debug, Clone, Copy)]
pub struct ContentFilter {
    min_chars: usize,
}

impl ContentFilter {
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }

    pub fn min_chars(&self) -> usize {
        self.min_chars
    }

    pub fn admits(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        if text.chars().count() < self.min_chars {
            return false;
        }
        !is_symbols_only(text)
    }
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self::new(3)
    }
}

/// True when nothing alphanumeric is left once pictographs are stripped.
/// Emoji runs and bare punctuation such as `???` both qualify.
pub fn is_symbols_only(text: &str) -> bool {
    !text
        .chars()
        .filter(|c| !is_pictographic(*c))
        .any(char::is_alphanumeric)
}

fn is_pictographic(c: char) -> bool {
    matches!(
        c as u32,
        0x1F000..=0x1FAFF      // emoticons, pictographs, transport, flags, skin tones
            | 0x2300..=0x23FF  // misc technical
            | 0x2600..=0x27BF  // misc symbols, dingbats
            | 0x2B00..=0x2BFF  // arrows, stars
            | 0xFE00..=0xFE0F  // variation selectors
            | 0x200D           // zero-width joiner
            | 0x20E3           // combining keycap
            | 0xE0020..=0xE007F // tag sequences
    )
}
