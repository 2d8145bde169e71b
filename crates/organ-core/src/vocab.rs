//! Character vocabulary for molecule strings.
//!
//! Domain symbols are single characters collected from the corpus, sorted,
//! followed by the four control symbols in a fixed order:
//!
//! ```text
//! [sorted domain chars..., <bos>, <eos>, <pad>, <unk>]
//! ```
//!
//! The ordered symbol list is the persisted form; loading it back yields the
//! same id assignment.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::error::{OrganError, Result};

pub const BOS: &str = "<bos>";
pub const EOS: &str = "<eos>";
pub const PAD: &str = "<pad>";
pub const UNK: &str = "<unk>";

/// Ids of the reserved control symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialIds {
    pub bos: u32,
    pub eos: u32,
    pub pad: u32,
    pub unk: u32,
}

#[derive(Serialize, Deserialize)]
struct VocabFile {
    symbols: Vec<String>,
}

/// Bidirectional symbol/id mapping. Immutable once built.
#[derive(Debug, Clone)]
pub struct Vocab {
    symbols: Vec<String>,
    char_to_id: HashMap<char, u32>,
    specials: SpecialIds,
}

impl Vocab {
    /// Build from every character appearing in `strings`.
    pub fn from_corpus<I, S>(strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut chars = BTreeSet::new();
        for s in strings {
            chars.extend(s.as_ref().chars());
        }
        let symbols = chars
            .into_iter()
            .map(String::from)
            .chain([BOS, EOS, PAD, UNK].into_iter().map(String::from))
            .collect();
        Self::from_symbols(symbols).expect("corpus characters are unique single-char symbols")
    }

    /// Rebuild from an ordered symbol list (the persisted form).
    pub fn from_symbols(symbols: Vec<String>) -> Result<Self> {
        let mut char_to_id = HashMap::with_capacity(symbols.len());
        let mut control: HashMap<&str, u32> = HashMap::new();

        for (id, symbol) in symbols.iter().enumerate() {
            let id = id as u32;
            if matches!(symbol.as_str(), BOS | EOS | PAD | UNK) {
                if control.insert(symbol.as_str(), id).is_some() {
                    return Err(OrganError::InvalidVocabulary(format!(
                        "duplicate control symbol {symbol}"
                    )));
                }
                continue;
            }
            let mut chars = symbol.chars();
            let c = match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => {
                    return Err(OrganError::InvalidVocabulary(format!(
                        "domain symbol {symbol:?} is not a single character"
                    )))
                }
            };
            if char_to_id.insert(c, id).is_some() {
                return Err(OrganError::InvalidVocabulary(format!(
                    "duplicate symbol {symbol:?}"
                )));
            }
        }

        let lookup = |name: &str| {
            control.get(name).copied().ok_or_else(|| {
                OrganError::InvalidVocabulary(format!("missing control symbol {name}"))
            })
        };
        let specials = SpecialIds {
            bos: lookup(BOS)?,
            eos: lookup(EOS)?,
            pad: lookup(PAD)?,
            unk: lookup(UNK)?,
        };

        Ok(Self {
            symbols,
            char_to_id,
            specials,
        })
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn special_ids(&self) -> SpecialIds {
        self.specials
    }

    /// Ordered symbol list.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Id for a single character; unseen characters map to `<unk>`.
    pub fn char_to_id(&self, c: char) -> u32 {
        self.char_to_id.get(&c).copied().unwrap_or(self.specials.unk)
    }

    /// Symbol for an id. Out-of-range ids are an error, not `<unk>`.
    pub fn id_to_symbol(&self, id: u32) -> Result<&str> {
        self.symbols
            .get(id as usize)
            .map(String::as_str)
            .ok_or(OrganError::UnknownTokenId {
                id,
                vocab_size: self.symbols.len(),
            })
    }

    /// Encode a string. Never fails.
    pub fn encode(&self, s: &str, add_bos: bool, add_eos: bool) -> Vec<u32> {
        let mut ids = Vec::with_capacity(s.len() + 2);
        if add_bos {
            ids.push(self.specials.bos);
        }
        ids.extend(s.chars().map(|c| self.char_to_id(c)));
        if add_eos {
            ids.push(self.specials.eos);
        }
        ids
    }

    /// Decode ids, optionally dropping a leading `<bos>` and trailing `<eos>`.
    pub fn decode(&self, ids: &[u32], strip_bos: bool, strip_eos: bool) -> Result<String> {
        let mut ids = ids;
        if strip_bos && ids.first() == Some(&self.specials.bos) {
            ids = &ids[1..];
        }
        if strip_eos && ids.last() == Some(&self.specials.eos) {
            ids = &ids[..ids.len() - 1];
        }
        let mut out = String::with_capacity(ids.len());
        for &id in ids {
            out.push_str(self.id_to_symbol(id)?);
        }
        Ok(out)
    }

    /// Save the ordered symbol list as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = VocabFile {
            symbols: self.symbols.clone(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    /// Load a vocabulary saved by [`Vocab::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: VocabFile = serde_json::from_str(&content)?;
        Self::from_symbols(file.symbols)
    }
}
