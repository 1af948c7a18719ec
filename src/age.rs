//! Age-range classification and domain label framing for prompts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Developmental term a free-form age string maps onto.
///
/// Variants are ordered from youngest to oldest; `Child` is the catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeCategory {
    /// 2-6 months.
    Baby,
    /// 8-12 months.
    Infant,
    /// 14-24 months.
    Toddler,
    /// 27-60 months.
    Preschooler,
    /// Any age outside the configured ranges.
    Child,
}

/// Inclusive month ranges for each named bucket, checked in order.
const AGE_RANGES: &[(AgeCategory, u32, u32)] = &[
    (AgeCategory::Baby, 2, 6),
    (AgeCategory::Infant, 8, 12),
    (AgeCategory::Toddler, 14, 24),
    (AgeCategory::Preschooler, 27, 60),
];

impl AgeCategory {
    /// Classifies an age string such as `"2 Bulan"`.
    pub fn classify(age: &str) -> Self {
        Self::from_months(parse_age_months(age))
    }

    /// Maps a month count onto its bucket.
    pub fn from_months(months: u32) -> Self {
        AGE_RANGES
            .iter()
            .find(|(_, low, high)| (*low..=*high).contains(&months))
            .map(|(category, _, _)| *category)
            .unwrap_or(AgeCategory::Child)
    }

    /// Lowercase term used in ids and prompts.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgeCategory::Baby => "baby",
            AgeCategory::Infant => "infant",
            AgeCategory::Toddler => "toddler",
            AgeCategory::Preschooler => "preschooler",
            AgeCategory::Child => "child",
        }
    }

    /// Human-readable span shown to the grouping model.
    pub fn description(&self) -> &'static str {
        match self {
            AgeCategory::Baby => "0-6 months",
            AgeCategory::Infant => "8-12 months",
            AgeCategory::Toddler => "14-24 months",
            AgeCategory::Preschooler => "27-60 months",
            AgeCategory::Child => "unspecified age",
        }
    }
}

impl fmt::Display for AgeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First integer found in the string, or 0 when there is none.
pub fn parse_age_months(age: &str) -> u32 {
    let digits: String = age
        .chars()
        .skip_while(|ch| !ch.is_ascii_digit())
        .take_while(|ch| ch.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

const DOMAIN_LABELS: &[(&str, &str)] = &[
    ("Komunikasi", "Communication skills"),
    ("Motorik Kasar", "Gross motor skills"),
    ("Motorik Halus", "Fine motor skills"),
    ("Pemecahan Masalah", "Problem solving"),
    ("Personal-Sosial", "Personal-social skills"),
];

/// English framing for a source-language domain label; unknown labels pass through.
pub fn domain_in_english(domain: &str) -> &str {
    DOMAIN_LABELS
        .iter()
        .find(|(source, _)| *source == domain)
        .map(|(_, english)| *english)
        .unwrap_or(domain)
}
