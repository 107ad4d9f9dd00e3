use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref PUNCT: Regex = Regex::new(r"[[:punct:]]").expect("valid regex");
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
    static ref STOPWORDS: HashSet<&'static str> = {
        // NLTK english list
        let words: &[&str] = &[
            "i","me","my","myself","we","our","ours","ourselves","you","you're","you've","you'll","you'd",
            "your","yours","yourself","yourselves","he","him","his","himself","she","she's","her","hers",
            "herself","it","it's","its","itself","they","them","their","theirs","themselves",
            "what","which","who","whom","this","that","that'll","these","those",
            "am","is","are","was","were","be","been","being","have","has","had","having","do","does","did","doing",
            "a","an","the","and","but","if","or","because","as","until","while","of","at","by","for","with",
            "about","against","between","into","through","during","before","after","above","below","to","from",
            "up","down","in","out","on","off","over","under","again","further","then","once",
            "here","there","when","where","why","how","all","any","both","each","few","more","most","other",
            "some","such","no","nor","not","only","own","same","so","than","too","very",
            "s","t","can","will","just","don","don't","should","should've","now","d","ll","m","o","re","ve","y",
            "ain","aren","aren't","couldn","couldn't","didn","didn't","doesn","doesn't","hadn","hadn't",
            "hasn","hasn't","haven","haven't","isn","isn't","ma","mightn","mightn't","mustn","mustn't",
            "needn","needn't","shan","shan't","shouldn","shouldn't","wasn","wasn't","weren","weren't",
            "won","won't","wouldn","wouldn't"
        ];
        words.iter().copied().collect()
    };
}

fn is_stopword(token: &str) -> bool { STOPWORDS.contains(token) }

/// NFKC, lowercase, ASCII punctuation removed.
fn clean(text: &str) -> String {
    let lowered = text.nfkc().collect::<String>().to_lowercase();
    PUNCT.replace_all(&lowered, "").into_owned()
}

/// Normalize text into index terms: clean, split on whitespace, drop stop words, stem.
///
/// Every index build and every query goes through this one function.
pub fn normalize(text: &str) -> Vec<String> {
    clean(text)
        .split_whitespace()
        .filter(|token| !is_stopword(token))
        .map(|token| STEMMER.stem(token).into_owned())
        .collect()
}

/// Normalized terms re-joined with single spaces, as kept in the document store.
pub fn normalize_to_text(text: &str) -> String { normalize(text).join(" ") }

/// Query expansion terms: lowercase, punctuation stripped, whitespace split. No stop words or stemming.
pub fn expansion_terms(text: &str) -> Vec<String> {
    clean(text).split_whitespace().map(str::to_string).collect()
}
