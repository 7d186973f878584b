use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use unicode_normalization::UnicodeNormalization;
use std::collections::HashSet;

lazy_static! {
    static ref RE: Regex = Regex::new(r"(?u)[\p{L}\p{N}]+").expect("valid regex");
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","cannot","could",
            "did","do","does","doing","down","during",
            "each","few","for","from","further",
            "had","has","have","having","he","her","here","hers","herself","him","himself","his","how",
            "i","if","in","into","is","it","its","itself",
            "just","me","more","most","my","myself",
            "no","nor","not","now","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","should","so","some","such",
            "than","that","the","their","theirs","them","themselves","then","there","these","they","this","those","through","to","too",
            "under","until","up","very",
            "was","we","were","what","when","where","which","while","who","whom","why","will","with","would",
            "you","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
}

/// Tokens this short carry no signal in the paper corpus.
const MIN_TOKEN_CHARS: usize = 3;

/// Turns free text into the ordered term sequence the index is keyed by.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, text: &str) -> Vec<String>;
}

/// NFKC, lowercase, alphanumeric words, stopwords and short tokens dropped, English stemming.
#[derive(Debug, Default, Clone, Copy)]
pub struct StemmingNormalizer;

impl Normalizer for StemmingNormalizer {
    fn normalize(&self, text: &str) -> Vec<String> {
        normalize(text)
    }
}

fn is_stopword(token: &str) -> bool { STOPWORDS.contains(token) }

pub fn normalize(text: &str) -> Vec<String> {
    let normalized = text.nfkc().collect::<String>().to_lowercase();
    let mut terms = Vec::new();
    for mat in RE.find_iter(&normalized) {
        let token = mat.as_str();
        if token.chars().count() < MIN_TOKEN_CHARS || is_stopword(token) { continue; }
        let stem = STEMMER.stem(token).to_string();
        if stem.chars().count() < MIN_TOKEN_CHARS { continue; }
        terms.push(stem);
    }
    terms
}
