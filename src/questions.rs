//! Question records loaded from the CSV source of truth.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::age::AgeCategory;
use crate::error::LoadError;
use crate::identity::{bytes_hash, content_hash, QuestionId};

/// Column holding the age interval (e.g. `2 Bulan`).
pub const COLUMN_AGE: &str = "Rentang Usia";
/// Column holding the developmental domain label.
pub const COLUMN_DOMAIN: &str = "Ranah (Domain)";
/// Column holding the item number within the domain.
pub const COLUMN_NUMBER: &str = "Nomor Item";
/// Column holding the question text.
pub const COLUMN_TEXT: &str = "Teks Pertanyaan";
/// Column holding the answer choices.
pub const COLUMN_CHOICES: &str = "Pilihan Jawaban";

/// Every column a source file must provide.
pub const REQUIRED_COLUMNS: [&str; 5] = [
    COLUMN_AGE,
    COLUMN_DOMAIN,
    COLUMN_NUMBER,
    COLUMN_TEXT,
    COLUMN_CHOICES,
];

/// One screening item. Identity is derived, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Age interval label.
    #[serde(rename = "Rentang Usia")]
    pub age: String,
    /// Domain label in the source language.
    #[serde(rename = "Ranah (Domain)")]
    pub domain: String,
    /// Item number.
    #[serde(rename = "Nomor Item")]
    pub number: String,
    /// Question text shown to parents.
    #[serde(rename = "Teks Pertanyaan")]
    pub question_text: String,
    /// Answer choices.
    #[serde(rename = "Pilihan Jawaban")]
    pub answer_choices: String,
}

impl Question {
    /// Builds a question, trimming every field.
    pub fn new(
        age: impl AsRef<str>,
        domain: impl AsRef<str>,
        number: impl AsRef<str>,
        question_text: impl AsRef<str>,
        answer_choices: impl AsRef<str>,
    ) -> Self {
        Self {
            age: age.as_ref().trim().to_string(),
            domain: domain.as_ref().trim().to_string(),
            number: number.as_ref().trim().to_string(),
            question_text: question_text.as_ref().trim().to_string(),
            answer_choices: answer_choices.as_ref().trim().to_string(),
        }
    }

    /// Stable identifier for this item.
    pub fn id(&self) -> QuestionId {
        QuestionId::new(&self.age, &self.domain, &self.number)
    }

    /// Developmental bucket of the age label.
    pub fn age_category(&self) -> AgeCategory {
        AgeCategory::classify(&self.age)
    }

    /// Digest of the question text used for duplicate detection.
    pub fn content_hash(&self) -> String {
        content_hash(&self.question_text)
    }
}

/// Loads every row of the CSV file at `path`.
pub fn load_questions(path: &Path) -> Result<Vec<Question>, LoadError> {
    if !path.exists() {
        return Err(LoadError::MissingFile(path.to_path_buf()));
    }
    let bytes = fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_questions(&bytes)
}

/// Parses CSV bytes, validating the header row first.
pub fn parse_questions(bytes: &[u8]) -> Result<Vec<Question>, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);
    let headers = reader.headers()?.clone();
    if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
        return Err(LoadError::MissingHeaders);
    }
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|column| !headers.iter().any(|h| h == **column))
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(LoadError::MissingColumns(missing));
    }

    let mut questions = Vec::new();
    for row in reader.deserialize::<Question>() {
        let row = row?;
        questions.push(Question::new(
            row.age,
            row.domain,
            row.number,
            row.question_text,
            row.answer_choices,
        ));
    }
    Ok(questions)
}

/// Content hash of the CSV file, recorded in the cluster snapshot.
pub fn source_hash(path: &Path) -> Result<String, LoadError> {
    let bytes = fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(bytes_hash(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Rentang Usia,Ranah (Domain),Nomor Item,Teks Pertanyaan,Pilihan Jawaban\n";

    #[test]
    fn parses_and_trims_rows() {
        let csv = format!(
            "{HEADER}2 Bulan ,Motorik Kasar, 1 ,\" Apakah bayi menendang? \",\"Ya, Kadang-kadang, Belum\"\n"
        );
        let questions = parse_questions(csv.as_bytes()).expect("parse");
        assert_eq!(questions.len(), 1);
        let q = &questions[0];
        assert_eq!(q.age, "2 Bulan");
        assert_eq!(q.number, "1");
        assert_eq!(q.question_text, "Apakah bayi menendang?");
        assert_eq!(q.id().as_str(), "2-bulan_motorik-kasar_1");
    }

    #[test]
    fn extra_columns_are_ignored() {
        let csv = "Catatan,Rentang Usia,Ranah (Domain),Nomor Item,Teks Pertanyaan,Pilihan Jawaban\n\
                   x,4 Bulan,Komunikasi,2,Tertawa?,Ya\n";
        let questions = parse_questions(csv.as_bytes()).expect("parse");
        assert_eq!(questions[0].domain, "Komunikasi");
    }

    #[test]
    fn reports_missing_columns() {
        let csv = "Rentang Usia,Nomor Item\n2 Bulan,1\n";
        match parse_questions(csv.as_bytes()).expect_err("missing columns") {
            LoadError::MissingColumns(missing) => {
                assert!(missing.contains(&COLUMN_DOMAIN.to_string()));
                assert!(missing.contains(&COLUMN_TEXT.to_string()));
                assert!(missing.contains(&COLUMN_CHOICES.to_string()));
                assert_eq!(missing.len(), 3);
            }
            other => panic!("expected missing columns, got {other:?}"),
        }
    }

    #[test]
    fn empty_input_has_no_headers() {
        assert!(matches!(
            parse_questions(b"").expect_err("empty"),
            LoadError::MissingHeaders
        ));
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = load_questions(Path::new("/definitely/not/here.csv")).expect_err("missing");
        assert!(matches!(err, LoadError::MissingFile(_)));
    }
}
