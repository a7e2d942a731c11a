//! Keyword suppression over a fragment stream.

/// Smallest look-back kept regardless of keyword length.
const MIN_REDUNDANCY: usize = 8;

/// Removes configured keywords from streamed text.
///
/// The last `redundancy` characters are held back after every push, where
/// `redundancy >= ` the longest keyword, so a keyword split across fragments
/// is complete in the buffer before any of it is released.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    keywords: Vec<String>,
    redundancy: usize,
    buffer: String,
}

impl KeywordFilter {
    pub fn new(keywords: Vec<String>) -> Self {
        let keywords: Vec<String> = keywords.into_iter().filter(|k| !k.is_empty()).collect();
        let longest = keywords.iter().map(|k| k.chars().count()).max().unwrap_or(0);
        Self {
            keywords,
            redundancy: longest.max(MIN_REDUNDANCY),
            buffer: String::new(),
        }
    }

    pub fn redundancy(&self) -> usize {
        self.redundancy
    }

    /// Feed a fragment; returns the text that is now safe to emit.
    pub fn push(&mut self, text: &str) -> String {
        if self.keywords.is_empty() {
            return text.to_string();
        }
        self.buffer.push_str(text);
        self.strip();

        let held = self.buffer.chars().count();
        if held <= self.redundancy {
            return String::new();
        }
        let split = self
            .buffer
            .char_indices()
            .nth(held - self.redundancy)
            .map(|(i, _)| i)
            .unwrap_or(self.buffer.len());
        let tail = self.buffer.split_off(split);
        std::mem::replace(&mut self.buffer, tail)
    }

    /// Release whatever is still held back.
    pub fn finish(&mut self) -> String {
        self.strip();
        std::mem::take(&mut self.buffer)
    }

    fn strip(&mut self) {
        // removing one keyword can join the halves of another
        loop {
            let before = self.buffer.len();
            for keyword in &self.keywords {
                if self.buffer.contains(keyword.as_str()) {
                    self.buffer = self.buffer.replace(keyword.as_str(), "");
                }
            }
            if self.buffer.len() == before {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(filter: &mut KeywordFilter, fragments: &[&str]) -> String {
        let mut out: String = fragments.iter().map(|f| filter.push(f)).collect();
        out.push_str(&filter.finish());
        out
    }

    #[test]
    fn passthrough_without_keywords() {
        let mut filter = KeywordFilter::new(Vec::new());
        assert_eq!(filter.push("abc"), "abc");
        assert_eq!(filter.finish(), "");
    }

    #[test]
    fn keyword_split_across_fragments_is_removed() {
        let mut filter = KeywordFilter::new(vec!["User:".into()]);
        let out = run(&mut filter, &["Hello there. Us", "er", ": how are you?"]);
        assert_eq!(out, "Hello there.  how are you?");
    }

    #[test]
    fn text_is_held_back_by_redundancy() {
        let mut filter = KeywordFilter::new(vec!["ab".into()]);
        assert_eq!(filter.redundancy(), 8);
        assert_eq!(filter.push("12345678"), "");
        assert_eq!(filter.push("9"), "1");
        assert_eq!(filter.finish(), "23456789");
    }

    #[test]
    fn long_keyword_extends_look_back() {
        let keyword = "### Instruction:";
        let mut filter = KeywordFilter::new(vec![keyword.into()]);
        assert_eq!(filter.redundancy(), keyword.len());
        let out = run(&mut filter, &["ok ###", " Instr", "uction:", " done"]);
        assert_eq!(out, "ok  done");
    }

    #[test]
    fn nested_keyword_removed() {
        let mut filter = KeywordFilter::new(vec!["XY".into()]);
        assert_eq!(run(&mut filter, &["aXXYYb"]), "ab");
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let mut filter = KeywordFilter::new(vec!["bad".into()]);
        let out = run(&mut filter, &["héllo wörld ", "ünïcödé bad text"]);
        assert_eq!(out, "héllo wörld ünïcödé  text");
    }
}
