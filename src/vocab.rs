use crate::common::*;

pub const PAD_TOKEN: &str = "<pad>";
pub const START_TOKEN: &str = "<start>";
pub const END_TOKEN: &str = "<end>";
pub const UNK_TOKEN: &str = "<unk>";

/// Token-to-index mapping, loaded once at startup and read-only afterwards.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    index: IndexMap<String, i64>,
    pad: i64,
    start: i64,
    end: i64,
}

impl Vocabulary {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read vocabulary file '{}'", path.display()))?;
        let index: IndexMap<String, i64> = serde_json::from_str(&text)
            .with_context(|| format!("malformed vocabulary file '{}'", path.display()))?;

        Self::from_index(index)
    }

    pub fn from_index(index: IndexMap<String, i64>) -> Result<Self> {
        ensure!(!index.is_empty(), "empty vocabulary is not allowed");

        let distinct = index.values().unique().count();
        ensure!(
            distinct == index.len(),
            "vocabulary mapping is not injective: {} tokens share {} indices",
            index.len(),
            distinct
        );

        let special = |token: &str| -> Result<i64> {
            index
                .get(token)
                .copied()
                .ok_or_else(|| format_err!("vocabulary has no '{}' token", token))
        };

        let pad = special(PAD_TOKEN)?;
        let start = special(START_TOKEN)?;
        let end = special(END_TOKEN)?;

        Ok(Self {
            index,
            pad,
            start,
            end,
        })
    }

    pub fn vocab_size(&self) -> i64 {
        self.index.len() as i64
    }

    pub fn pad(&self) -> i64 {
        self.pad
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn token(&self, token: &str) -> Option<i64> {
        self.index.get(token).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_index() -> IndexMap<String, i64> {
        [
            (PAD_TOKEN, 0),
            (START_TOKEN, 1),
            (END_TOKEN, 2),
            (UNK_TOKEN, 3),
            ("a", 4),
            ("dog", 5),
        ]
        .iter()
        .map(|&(token, index)| (token.to_owned(), index))
        .collect()
    }

    #[test]
    fn vocabulary_test() -> Result<()> {
        let vocab = Vocabulary::from_index(toy_index())?;
        ensure!(vocab.vocab_size() == 6);
        ensure!(vocab.pad() == 0);
        ensure!(vocab.start() == 1);
        ensure!(vocab.end() == 2);
        ensure!(vocab.token("dog") == Some(5));
        ensure!(vocab.token("cat") == None);

        Ok(())
    }

    #[test]
    fn missing_special_token_test() {
        let mut index = toy_index();
        index.remove(END_TOKEN);
        assert!(Vocabulary::from_index(index).is_err());
    }

    #[test]
    fn non_injective_vocabulary_test() {
        let mut index = toy_index();
        index.insert("cat".to_owned(), 5);
        assert!(Vocabulary::from_index(index).is_err());
    }
}
