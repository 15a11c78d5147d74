use std::collections::BTreeSet;

use tantivy::tokenizer::{
    Language,
    LowerCaser,
    RemoveLongFilter,
    SimpleTokenizer,
    Stemmer,
    StopWordFilter,
    TextAnalyzer,
    TokenStream,
};
use tracing::debug;

use crate::stopwords;

/// Tokens longer than this (in bytes) are dropped before normalization.
const MAX_TOKEN_LEN: usize = 40;

/// Turns free text into the word stems used as search tags.
///
/// The pipeline splits on non-alphanumeric characters, drops overlong
/// tokens, lower-cases, removes English stopwords, and reduces every token to
/// its Snowball stem. Only purely alphabetic results are kept. Documents and
/// queries go through the same pipeline, so their tags are comparable.
#[derive(Clone)]
pub struct TagGenerator {
    analyzer: TextAnalyzer,
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TagGenerator {
    pub fn new() -> Self {
        let stopwords = StopWordFilter::remove(
            stopwords::ENGLISH.iter().map(|w| w.to_string()),
        );

        let analyzer = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
            .filter(LowerCaser)
            .filter(stopwords.clone())
            .filter(Stemmer::new(Language::English))
            // Stemming can land on a stopword ("ofs" -> "of").
            .filter(stopwords)
            .build();

        Self { analyzer }
    }

    /// Derive the deduplicated tag set of `text`.
    ///
    /// ```
    /// use docshelf::tags::TagGenerator;
    ///
    /// let tags = TagGenerator::new().generate_tags("The cats and the dogs");
    /// assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["cat", "dog"]);
    /// ```
    pub fn generate_tags(&self, text: &str) -> BTreeSet<String> {
        let mut analyzer = self.analyzer.clone();
        let mut stream = analyzer.token_stream(text);

        let mut tags = BTreeSet::new();
        while stream.advance() {
            let token = &stream.token().text;
            if !token.is_empty() && token.chars().all(char::is_alphabetic) {
                tags.insert(token.clone());
            }
        }

        debug!(tags = tags.len(), chars = text.len(), "generated tags");
        tags
    }
}

impl std::fmt::Debug for TagGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagGenerator").finish_non_exhaustive()
    }
}
