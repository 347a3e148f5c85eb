//! Loading the three scripture sources into one ordered record list.
//!
//! Each source has its own JSON shape:
//!
//! - Bhagavad Gita: a flat array of verses.
//! - Dhammapada: `chapters[] -> verses[]`.
//! - KJV Bible: `books[] -> chapters[] -> verses[]`, of which only the four
//!   Gospels are kept.
//!
//! A missing or wrongly-shaped file aborts the load. A single malformed
//! verse is logged and skipped.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    error::{Error, Result},
    persona::Mentor,
    text_util::normalize_whitespace,
};

pub const GITA_FILE: &str = "bhagavad_gita_verses.json";
pub const DHAMMAPADA_FILE: &str = "dhammapada.json";
pub const BIBLE_FILE: &str = "kjv_bible.json";

const GOSPELS: [&str; 4] = ["Matthew", "Mark", "Luke", "John"];

/// One retrievable unit of scripture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub text: String,
    pub metadata: RecordMetadata,
}

/// Citation data stored positionally next to each indexed text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub mentor: Mentor,
    pub source: String,
    pub reference: String,
    pub chapter: u32,
    pub verse: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book: Option<String>,
}

impl Record {
    pub fn mentor(&self) -> Mentor {
        self.metadata.mentor
    }
}

#[derive(Debug, Clone)]
pub struct CorpusPaths {
    pub gita: PathBuf,
    pub dhammapada: PathBuf,
    pub bible: PathBuf,
}

impl CorpusPaths {
    /// Standard file names inside one directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            gita: dir.join(GITA_FILE),
            dhammapada: dir.join(DHAMMAPADA_FILE),
            bible: dir.join(BIBLE_FILE),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CorpusStats {
    pub krishna: usize,
    pub buddha: usize,
    pub jesus: usize,
    /// Leaves dropped because they were malformed.
    pub skipped: usize,
}

impl CorpusStats {
    pub fn total(&self) -> usize {
        self.krishna + self.buddha + self.jesus
    }

    pub fn count(&self, mentor: Mentor) -> usize {
        match mentor {
            Mentor::Krishna => self.krishna,
            Mentor::Buddha => self.buddha,
            Mentor::Jesus => self.jesus,
        }
    }

    fn count_mut(&mut self, mentor: Mentor) -> &mut usize {
        match mentor {
            Mentor::Krishna => &mut self.krishna,
            Mentor::Buddha => &mut self.buddha,
            Mentor::Jesus => &mut self.jesus,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Corpus {
    pub records: Vec<Record>,
    pub stats: CorpusStats,
}

impl Corpus {
    fn push(&mut self, record: Record) {
        *self.stats.count_mut(record.mentor()) += 1;
        self.records.push(record);
    }

    /// Build a record from raw text, dropping it when the text is blank.
    fn push_text(&mut self, raw: &str, metadata: RecordMetadata) {
        let text = normalize_whitespace(raw);
        if !text.is_empty() {
            self.push(Record { text, metadata });
        }
    }
}

// -- Source shapes --

#[derive(Deserialize)]
struct GitaVerse {
    chapter_number: u32,
    verse_number: u32,
    #[serde(default)]
    transliteration: String,
}

#[derive(Deserialize)]
struct DhammapadaChapter {
    #[serde(default)]
    number: u32,
    #[serde(default)]
    verses: Vec<Value>,
}

#[derive(Deserialize)]
struct DhammapadaVerse {
    number: u32,
    #[serde(default)]
    english: String,
}

#[derive(Deserialize)]
struct BibleBook {
    #[serde(default)]
    name: String,
    #[serde(default)]
    chapters: Vec<Value>,
}

#[derive(Deserialize)]
struct BibleChapter {
    #[serde(default)]
    chapter: u32,
    #[serde(default)]
    verses: Vec<Value>,
}

#[derive(Deserialize)]
struct BibleVerse {
    #[serde(default)]
    verse: u32,
    #[serde(default)]
    text: String,
}

/// Load all three sources in fixed order: Gita, Dhammapada, Gospels.
pub fn load_corpus(paths: &CorpusPaths) -> Result<Corpus> {
    let mut corpus = Corpus::default();

    load_gita(&paths.gita, &mut corpus)?;
    load_dhammapada(&paths.dhammapada, &mut corpus)?;
    load_gospels(&paths.bible, &mut corpus)?;

    tracing::info!(
        krishna = corpus.stats.krishna,
        buddha = corpus.stats.buddha,
        jesus = corpus.stats.jesus,
        skipped = corpus.stats.skipped,
        "corpus loaded"
    );

    Ok(corpus)
}

fn load_gita(path: &Path, corpus: &mut Corpus) -> Result<()> {
    let root = read_json(path)?;
    let verses = root.as_array().ok_or_else(|| Error::Corpus {
        path: path.to_path_buf(),
        reason: "expected a top-level array of verses".into(),
    })?;

    for (i, leaf) in verses.iter().enumerate() {
        let Some(verse) = parse_leaf::<GitaVerse>(leaf, path, &format!("verse #{i}"), corpus)
        else {
            continue;
        };
        corpus.push_text(
            &verse.transliteration,
            RecordMetadata {
                mentor: Mentor::Krishna,
                source: "Bhagavad Gita".into(),
                reference: format!("{}.{}", verse.chapter_number, verse.verse_number),
                chapter: verse.chapter_number,
                verse: verse.verse_number,
                book: None,
            },
        );
    }
    Ok(())
}

fn load_dhammapada(path: &Path, corpus: &mut Corpus) -> Result<()> {
    let root = read_json(path)?;
    let chapters = top_level_array(&root, "chapters", path)?;

    for (ci, chapter) in chapters.iter().enumerate() {
        let Some(chapter) =
            parse_leaf::<DhammapadaChapter>(chapter, path, &format!("chapter #{ci}"), corpus)
        else {
            continue;
        };
        for (vi, leaf) in chapter.verses.iter().enumerate() {
            let location = format!("chapter {} verse #{vi}", chapter.number);
            let Some(verse) = parse_leaf::<DhammapadaVerse>(leaf, path, &location, corpus)
            else {
                continue;
            };
            corpus.push_text(
                &verse.english,
                RecordMetadata {
                    mentor: Mentor::Buddha,
                    source: "Dhammapada".into(),
                    reference: format!("Verse {}", verse.number),
                    chapter: chapter.number,
                    verse: verse.number,
                    book: None,
                },
            );
        }
    }
    Ok(())
}

fn load_gospels(path: &Path, corpus: &mut Corpus) -> Result<()> {
    let root = read_json(path)?;
    let books = top_level_array(&root, "books", path)?;

    for (bi, book) in books.iter().enumerate() {
        let Some(book) = parse_leaf::<BibleBook>(book, path, &format!("book #{bi}"), corpus)
        else {
            continue;
        };
        if !GOSPELS.contains(&book.name.as_str()) {
            continue;
        }

        for (ci, chapter) in book.chapters.iter().enumerate() {
            let location = format!("{} chapter #{ci}", book.name);
            let Some(chapter) = parse_leaf::<BibleChapter>(chapter, path, &location, corpus)
            else {
                continue;
            };
            for (vi, leaf) in chapter.verses.iter().enumerate() {
                let location = format!("{} {} verse #{vi}", book.name, chapter.chapter);
                let Some(verse) = parse_leaf::<BibleVerse>(leaf, path, &location, corpus)
                else {
                    continue;
                };
                corpus.push_text(
                    &verse.text,
                    RecordMetadata {
                        mentor: Mentor::Jesus,
                        source: format!("Gospel of {}", book.name),
                        reference: format!("{} {}:{}", book.name, chapter.chapter, verse.verse),
                        chapter: chapter.chapter,
                        verse: verse.verse,
                        book: Some(book.name.clone()),
                    },
                );
            }
        }
    }
    Ok(())
}

fn read_json(path: &Path) -> Result<Value> {
    let bytes = std::fs::read(path).map_err(|e| Error::Corpus {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_slice(&bytes).map_err(|e| Error::Corpus {
        path: path.to_path_buf(),
        reason: format!("invalid JSON: {e}"),
    })
}

fn top_level_array<'a>(root: &'a Value, key: &str, path: &Path) -> Result<&'a Vec<Value>> {
    root.get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Corpus {
            path: path.to_path_buf(),
            reason: format!("expected a top-level object with a \"{key}\" array"),
        })
}

fn parse_leaf<T: DeserializeOwned>(
    value: &Value,
    path: &Path,
    location: &str,
    corpus: &mut Corpus,
) -> Option<T> {
    match T::deserialize(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!(
                file = %path.display(),
                location,
                error = %e,
                "skipping malformed entry"
            );
            corpus.stats.skipped += 1;
            None
        }
    }
}

/// Write the normalized records as pretty JSON, for inspection.
pub fn write_preprocessed(records: &[Record], path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(path, json)?;
    Ok(())
}
