//! Text analysis utilities
//!
//! Keyword extraction, skill matching, section detection, and the
//! overlap statistics that enrich an analysis report. Keyword ranking is
//! frequency-based with known skills boosted so multi-word terms like
//! "machine learning" survive the cap.

use crate::models::{KeywordOverlap, ResumeStats};
use regex_lite::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// Upper bound on extracted keywords per document
pub const MAX_KEYWORDS: usize = 50;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "could", "did", "do",
    "does", "for", "from", "had", "has", "have", "he", "her", "his", "i", "if", "in", "into",
    "is", "it", "its", "may", "me", "might", "must", "my", "no", "not", "of", "on", "or", "our",
    "shall", "she", "should", "so", "such", "than", "that", "the", "their", "them", "then",
    "there", "these", "they", "this", "to", "us", "was", "we", "were", "what", "when", "where",
    "which", "who", "will", "with", "would", "you", "your", "about", "also", "able", "across",
    "after", "all", "am", "among", "any", "because", "before", "being", "between", "both",
    "each", "etc", "ever", "every", "get", "got", "how", "however", "just", "least", "like",
    "more", "most", "much", "neither", "new", "now", "off", "often", "only", "other", "out",
    "over", "own", "per", "rather", "said", "say", "says", "since", "some", "too", "under",
    "until", "up", "upon", "very", "while", "why", "within", "work", "years", "year", "using",
    "use", "used", "including", "experience", "strong", "ability", "team", "plus", "well",
];

/// Known technical skills, matched case-insensitively. Multi-word
/// entries are matched as phrases.
const SKILLS: &[&str] = &[
    "python", "java", "javascript", "typescript", "rust", "go", "golang", "c++", "c#", "ruby",
    "php", "swift", "kotlin", "scala", "sql", "nosql", "html", "css", "react", "angular", "vue",
    "node.js", "django", "flask", "fastapi", "spring", "rails", "express", "postgresql", "mysql",
    "mongodb", "redis", "elasticsearch", "kafka", "rabbitmq", "docker", "kubernetes", "terraform",
    "ansible", "jenkins", "aws", "azure", "gcp", "linux", "git", "graphql", "grpc", "rest",
    "microservices", "machine learning", "deep learning", "data science", "data engineering",
    "nlp", "computer vision", "tensorflow", "pytorch", "scikit-learn", "pandas", "numpy", "spark",
    "hadoop", "airflow", "tableau", "power bi", "ci/cd", "devops", "agile", "scrum", "leadership",
    "project management", "communication", "problem solving", "distributed systems",
    "system design", "unit testing", "integration testing", "security", "networking",
];

fn stop_words() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOP_WORDS.iter().copied().collect())
}

fn section_header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?im)^\s*(summary|objective|profile|experience|work experience|employment( history)?|education|skills|technical skills|projects|certifications?|awards|publications|languages|interests|volunteer( experience)?|references)\s*:?\s*$",
        )
        .expect("section header pattern is valid")
    })
}

/// Lowercased word tokens; '+' and '#' survive so c++ and c# do
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '+' || c == '#' || c == '.'))
        .map(|t| t.trim_matches('.'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_candidate(token: &str) -> bool {
    token.len() >= 2 && !stop_words().contains(token) && !token.chars().all(|c| c.is_numeric())
}

/// Extract ranked keywords: unigrams, bigrams, and trigrams, frequency
/// ranked with known skills boosted, capped at `MAX_KEYWORDS`.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let tokens = tokenize(text);
    let mut scores: HashMap<String, f64> = HashMap::new();

    for token in &tokens {
        if is_candidate(token) {
            *scores.entry(token.clone()).or_default() += 1.0;
        }
    }

    for n in [2usize, 3] {
        for window in tokens.windows(n) {
            if window.iter().all(|t| is_candidate(t)) {
                let phrase = window.join(" ");
                // Phrases count double so they are not drowned out by
                // their own constituent words
                *scores.entry(phrase).or_default() += 2.0;
            }
        }
    }

    for skill in extract_skills(text) {
        *scores.entry(skill).or_default() += 5.0;
    }

    let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    ranked
        .into_iter()
        .take(MAX_KEYWORDS)
        .map(|(k, _)| k)
        .collect()
}

/// Match the known-skill lexicon against the text
pub fn extract_skills(text: &str) -> Vec<String> {
    let lowered = format!(" {} ", text.to_lowercase());
    let tokens: HashSet<String> = tokenize(text).into_iter().collect();

    SKILLS
        .iter()
        .filter(|skill| {
            if skill.contains(' ') || skill.contains('/') {
                lowered.contains(*skill)
            } else {
                tokens.contains(**skill)
            }
        })
        .map(|s| s.to_string())
        .collect()
}

/// A detected resume section
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub body: String,
}

/// Split a resume into sections on recognizable headers. Text before the
/// first header lands in a "header" section.
pub fn split_sections(text: &str) -> Vec<Section> {
    let re = section_header_regex();
    let mut sections: Vec<Section> = Vec::new();
    let mut current_title = "header".to_string();
    let mut current_body = String::new();

    for line in text.lines() {
        if re.is_match(line) {
            if !current_body.trim().is_empty() {
                sections.push(Section {
                    title: current_title.clone(),
                    body: current_body.trim().to_string(),
                });
            }
            current_title = line.trim().trim_end_matches(':').to_lowercase();
            current_body = String::new();
        } else {
            current_body.push_str(line);
            current_body.push('\n');
        }
    }

    if !current_body.trim().is_empty() {
        sections.push(Section {
            title: current_title,
            body: current_body.trim().to_string(),
        });
    }

    sections
}

/// Size statistics for a resume
pub fn resume_stats(text: &str) -> ResumeStats {
    let sections = split_sections(text);
    // The implicit leading section is not a real header
    let section_count = sections
        .iter()
        .filter(|s| s.title != "header")
        .count();

    ResumeStats {
        word_count: text.split_whitespace().count(),
        character_count: text.chars().count(),
        section_count,
    }
}

/// Keyword overlap between a resume and a job description
pub fn keyword_overlap(resume_text: &str, job_text: &str) -> KeywordOverlap {
    let job_keywords: HashSet<String> = extract_keywords(job_text).into_iter().collect();
    let resume_keywords: HashSet<String> = extract_keywords(resume_text).into_iter().collect();
    let resume_tokens: HashSet<String> = tokenize(resume_text).into_iter().collect();

    let matching = job_keywords
        .iter()
        .filter(|k| {
            resume_keywords.contains(*k)
                || k.split(' ').all(|w| resume_tokens.contains(w))
        })
        .count();

    let total = job_keywords.len();
    let overlap_percentage = if total == 0 {
        0.0
    } else {
        (matching as f64 / total as f64) * 100.0
    };

    KeywordOverlap {
        total_job_keywords: total,
        matching_keywords: matching,
        overlap_percentage,
    }
}

/// Job keywords absent from the resume, in rank order
pub fn missing_keywords(resume_text: &str, job_text: &str) -> Vec<String> {
    let resume_tokens: HashSet<String> = tokenize(resume_text).into_iter().collect();

    extract_keywords(job_text)
        .into_iter()
        .filter(|k| !k.split(' ').all(|w| resume_tokens.contains(w)))
        .collect()
}
