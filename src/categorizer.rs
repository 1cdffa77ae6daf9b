//! Transaction Categorizer
//!
//! Assigns each transaction to exactly one of the profile's six categories by
//! scoring the merchant text against keyword descriptors. Transactions that
//! score below the confidence threshold become `Uncategorized`.

use crate::models::{Transaction, UNCATEGORIZED};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Minimum keyword hits needed to accept a category.
const MIN_CONFIDENCE_HITS: usize = 1;

/// Static descriptor table, zero allocation
const DESCRIPTORS: &[(&str, &[&str])] = &[
    ("housing", &["rent", "mortgage", "housing", "landlord", "property", "condo", "apartment", "strata"]),
    ("utilities", &["internet", "phone", "electric", "electricity", "water", "gas bill", "tnb", "unifi", "maxis", "celcom", "utility"]),
    ("food", &[
        "grocery", "groceries", "restaurant", "fast food", "coffee", "cafe", "dining", "kfc", "mcdonald",
        "starbucks", "pizza", "bakery", "food", "mamak", "tesco", "giant", "supermarket",
    ]),
    ("transportation", &["uber", "lyft", "grab", "transit", "petrol", "gas station", "flight", "airline", "toll", "parking", "lrt", "mrt", "taxi", "shell", "petronas"]),
    ("transport", &["uber", "lyft", "grab", "transit", "petrol", "gas station", "toll", "parking", "lrt", "mrt", "taxi", "shell", "petronas", "bus"]),
    ("healthcare", &["doctor", "pharmacy", "hospital", "clinic", "medical", "dental", "guardian", "watsons"]),
    ("entertainment", &[
        "movie", "cinema", "concert", "netflix", "spotify", "streaming", "game", "steam",
        "shopping", "clothes", "electronics", "bar", "club", "tgv", "gsc",
    ]),
    ("savings", &["savings", "deposit", "investment", "transfer to savings", "asb", "epf", "brokerage"]),
    ("education", &["tuition", "course", "school", "university", "udemy", "books"]),
    ("insurance", &["insurance", "takaful", "premium", "allianz", "prudential"]),
    ("other", &["misc", "fee", "charge", "online purchase"]),
];

/// Keyword descriptor for one budget category.
#[derive(Debug, Clone)]
pub struct CategoryDescriptor {
    pub name: String,
    pub keywords: Vec<String>,
    phrases: Vec<Vec<String>>,
}

impl CategoryDescriptor {
    /// Known names get the built-in descriptor; unknown names match on themselves.
    pub fn for_name(name: &str) -> Self {
        let lowered = name.to_lowercase();
        let keywords = DESCRIPTORS
            .iter()
            .find(|(key, _)| *key == lowered)
            .map(|(_, kws)| kws.iter().map(|k| k.to_string()).collect())
            .unwrap_or_else(|| vec![lowered]);
        let phrases = keywords
            .iter()
            .map(|k| tokenize(k))
            .filter(|p| !p.is_empty())
            .collect();

        Self {
            name: name.to_string(),
            keywords,
            phrases,
        }
    }

    pub fn description(&self) -> String {
        self.keywords.join(", ")
    }

    fn score(&self, tokens: &[String]) -> usize {
        self.phrases
            .iter()
            .filter(|phrase| contains_phrase(tokens, phrase))
            .count()
    }
}

/// Keyword categorizer with a per-run memo of content fingerprints.
///
/// Byte-identical transaction content always maps to the same category for
/// the lifetime of one instance.
pub struct Categorizer {
    descriptors: Vec<CategoryDescriptor>,
    memo: HashMap<String, String>,
}

impl Categorizer {
    pub fn new<S: AsRef<str>>(category_names: &[S]) -> Self {
        Self {
            descriptors: category_names
                .iter()
                .map(|n| CategoryDescriptor::for_name(n.as_ref()))
                .collect(),
            memo: HashMap::new(),
        }
    }

    pub fn descriptors(&self) -> &[CategoryDescriptor] {
        &self.descriptors
    }

    /// Best-matching category name, or `Uncategorized`.
    pub fn categorize(&mut self, transaction: &Transaction) -> String {
        let key = content_fingerprint(transaction);
        if let Some(hit) = self.memo.get(&key) {
            return hit.clone();
        }

        let assigned = self.score(&tokenize(&transaction.match_text()));
        self.memo.insert(key, assigned.clone());
        assigned
    }

    /// Assign a category to every transaction, overwriting earlier assignments.
    pub fn categorize_all(&mut self, transactions: &mut [Transaction]) -> usize {
        let mut uncategorized = 0;
        for tx in transactions.iter_mut() {
            let category = self.categorize(tx);
            if category == UNCATEGORIZED {
                uncategorized += 1;
            }
            tx.assigned_category = Some(category);
        }
        uncategorized
    }

    fn score(&self, tokens: &[String]) -> String {
        // Strictly greater keeps the earliest declared category on ties.
        let mut best: Option<(&CategoryDescriptor, usize)> = None;
        for descriptor in &self.descriptors {
            let hits = descriptor.score(tokens);
            if hits >= MIN_CONFIDENCE_HITS && best.map_or(true, |(_, b)| hits > b) {
                best = Some((descriptor, hits));
            }
        }

        best.map(|(d, _)| d.name.clone())
            .unwrap_or_else(|| UNCATEGORIZED.to_string())
    }
}

/// Lowercased alphanumeric words.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Whole-word phrase match; the last word may also appear in plural form.
fn contains_phrase(tokens: &[String], phrase: &[String]) -> bool {
    let Some((last, head)) = phrase.split_last() else {
        return false;
    };

    tokens.windows(phrase.len()).any(|window| {
        window[..head.len()] == *head && is_word_form(&window[head.len()], last)
    })
}

fn is_word_form(token: &str, keyword: &str) -> bool {
    if token == keyword {
        return true;
    }
    match token.strip_prefix(keyword) {
        Some("s") | Some("es") => true,
        _ => keyword
            .strip_suffix('y')
            .is_some_and(|stem| token.strip_prefix(stem) == Some("ies")),
    }
}

/// SHA-256 over the content fields (id excluded).
pub fn content_fingerprint(transaction: &Transaction) -> String {
    let mut hasher = Sha256::new();
    hasher.update(transaction.merchant.as_bytes());
    hasher.update([0u8]);
    hasher.update(transaction.description.as_deref().unwrap_or("").as_bytes());
    hasher.update([0u8]);
    hasher.update(transaction.category_hint.as_deref().unwrap_or("").as_bytes());
    hasher.update([0u8]);
    hasher.update(transaction.amount.to_bits().to_be_bytes());
    hasher.update(transaction.timestamp.to_rfc3339().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tx(id: &str, merchant: &str, amount: f64) -> Transaction {
        Transaction {
            id: id.to_string(),
            merchant: merchant.to_string(),
            description: None,
            amount,
            timestamp: "2026-09-14T12:00:00Z".parse().unwrap(),
            category_hint: None,
            assigned_category: None,
        }
    }

    fn categories() -> Vec<&'static str> {
        vec!["Food", "Entertainment", "Savings", "Housing", "Transport", "Other"]
    }

    #[test]
    fn test_known_merchants() {
        let mut categorizer = Categorizer::new(&categories());

        let cases = vec![
            ("Starbucks KLCC", "Food"),
            ("Netflix.com", "Entertainment"),
            ("Grab ride", "Transport"),
            ("Monthly rent - landlord", "Housing"),
            ("ASB savings deposit", "Savings"),
        ];

        for (merchant, expected) in cases {
            assert_eq!(categorizer.categorize(&tx("t", merchant, -10.0)), expected, "{}", merchant);
        }
    }

    #[test]
    fn test_low_confidence_is_uncategorized() {
        let mut categorizer = Categorizer::new(&categories());
        assert_eq!(categorizer.categorize(&tx("t", "XYZ HOLDINGS", -42.0)), UNCATEGORIZED);
    }

    #[test]
    fn test_hint_contributes() {
        let mut categorizer = Categorizer::new(&categories());
        let mut t = tx("t", "ACME 0042", -9.0);
        t.category_hint = Some("Coffee Shop".to_string());
        assert_eq!(categorizer.categorize(&t), "Food");
    }

    #[test]
    fn test_identical_content_categorizes_identically() {
        let mut categorizer = Categorizer::new(&categories());
        let mut txs = vec![tx("a", "KFC Bangsar", -25.0), tx("b", "KFC Bangsar", -25.0)];
        categorizer.categorize_all(&mut txs);
        assert_eq!(txs[0].assigned_category, txs[1].assigned_category);
        assert_eq!(content_fingerprint(&txs[0]), content_fingerprint(&txs[1]));
    }

    #[test]
    fn test_keywords_do_not_match_inside_words() {
        let mut categorizer = Categorizer::new(&categories());

        for merchant in ["Parentcraft Toys", "Barber Shop", "Business Software Sdn Bhd"] {
            assert_eq!(
                categorizer.categorize(&tx("t", merchant, -30.0)),
                UNCATEGORIZED,
                "{}",
                merchant
            );
        }
    }

    #[test]
    fn test_phrases_and_plurals_still_match() {
        let mut categorizer = Categorizer::new(&categories());

        let cases = vec![
            ("Shell gas station", "Transport"),
            ("Transfer to Savings", "Savings"),
            ("Weekly groceries", "Food"),
            ("Two movies at the mall", "Entertainment"),
            ("Bus pass", "Transport"),
        ];

        for (merchant, expected) in cases {
            assert_eq!(categorizer.categorize(&tx("t", merchant, -10.0)), expected, "{}", merchant);
        }
    }

    #[test]
    fn test_ties_go_to_earliest_declared_category() {
        // "transit" is a Transport keyword; "food" and "transit" tie at one hit each.
        let mut categorizer = Categorizer::new(&categories());
        assert_eq!(categorizer.categorize(&tx("t", "Transit food court", -12.0)), "Food");
    }

    #[test]
    fn test_unknown_category_matches_own_name() {
        let mut categorizer = Categorizer::new(&["Pets", "Food", "Housing", "Transport", "Savings", "Other"]);
        let mut t = tx("t", "Happy Pets Grooming", -80.0);
        t.timestamp = Utc::now();
        assert_eq!(categorizer.categorize(&t), "Pets");
    }
}
