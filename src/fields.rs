use std::sync::LazyLock;

use regex::Regex;

/// Confidence is categorical: a fixed score when a rule matched, zero when
/// nothing did. It is not a calibrated probability.
pub const CASE_CONFIDENCE: f64 = 0.95;
pub const AMOUNT_CONFIDENCE: f64 = 0.9;
pub const ADDRESS_CONFIDENCE: f64 = 0.9;

/// A named case-number rule. Rules are tried in order; every match from
/// every rule becomes a candidate.
pub struct CaseRule {
    pub name: &'static str,
    pattern: &'static LazyLock<Regex>,
}

// Year-prefixed case-type codes, with and without separators. The full-year
// form ("2023CH001234") is listed before the two-digit-year fallback so the
// rule order mirrors how complete the forms are.
static FULL_YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b20\d{2}[\s\-]*[A-Z]{1,10}[\s\-]*\d{2,8}\b").unwrap());
static SHORT_YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{2}[\s\-]*[A-Z]{1,10}[\s\-]*\d{2,8}\b").unwrap());
static SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s\-]+").unwrap());
static TRAILING_DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{2,8}$").unwrap());

pub static CASE_RULES: &[CaseRule] = &[
    CaseRule {
        name: "full-year",
        pattern: &FULL_YEAR_RE,
    },
    CaseRule {
        name: "short-year",
        pattern: &SHORT_YEAR_RE,
    },
];

static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\s?[\d,]+\.\d{2}").unwrap());

static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b\d{1,6}\s+[A-Z0-9 .,'\-]+?\s+(?:ST|STREET|AVE|AVENUE|RD|ROAD|DR|DRIVE|CT|COURT|BLVD|LN|WAY)\b.{0,40}?\b[A-Z]{2}\s*\d{5}\b",
    )
    .unwrap()
});

/// Extract the judicial case number from a normalized OCR corpus.
///
/// Policy: candidates from all rules are normalized by stripping separators;
/// the longest normalized candidate wins, on the theory that OCR fragments
/// of the same number are always shorter than the complete form.
pub fn extract_case_number(text: &str) -> (String, f64) {
    let mut candidates: Vec<String> = Vec::new();
    for rule in CASE_RULES {
        for m in rule.pattern.find_iter(text) {
            let cleaned = SEPARATOR_RE.replace_all(m.as_str(), "").into_owned();
            if !TRAILING_DIGITS_RE.is_match(&cleaned) {
                continue;
            }
            candidates.push(cleaned);
        }
    }

    match candidates.into_iter().max_by_key(|c| c.len()) {
        Some(best) => (best, CASE_CONFIDENCE),
        None => (String::new(), 0.0),
    }
}

/// Extract the claim amount.
///
/// Policy: collect every dollar-formatted figure and keep the maximum.
/// Filings quote fees and incidental sums alongside the claim; the largest
/// figure on a foreclosure filing is overwhelmingly the claim amount.
pub fn extract_amount(text: &str) -> (String, f64) {
    let best = AMOUNT_RE
        .find_iter(text)
        .filter_map(|m| {
            m.as_str()
                .trim_start_matches('$')
                .trim()
                .replace(',', "")
                .parse::<f64>()
                .ok()
        })
        .fold(None::<f64>, |acc, v| {
            Some(acc.map_or(v, |a| a.max(v)))
        });

    match best {
        Some(value) => (format_usd(value), AMOUNT_CONFIDENCE),
        None => (String::new(), 0.0),
    }
}

/// Extract a property address: leading house number, a recognized street
/// suffix, and a trailing state + ZIP. Policy: first match wins.
pub fn extract_address(text: &str) -> (String, f64) {
    match ADDRESS_RE.find(text) {
        Some(m) => (m.as_str().trim().to_string(), ADDRESS_CONFIDENCE),
        None => (String::new(), 0.0),
    }
}

/// `$1,234,567.89` formatting with thousands separators.
fn format_usd(value: f64) -> String {
    let cents = (value * 100.0).round() as i64;
    let dollars = cents / 100;
    let rem = cents % 100;

    let digits = dollars.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("${grouped}.{rem:02}")
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_number_prefers_longest_normalized_match() {
        let (case, conf) =
            extract_case_number("IN RE 23CH12 SEE ALSO CASE 2023CH001234 FILED");
        assert_eq!(case, "2023CH001234");
        assert_eq!(conf, CASE_CONFIDENCE);
    }

    #[test]
    fn case_number_strips_separators() {
        let (case, _) = extract_case_number("CASE NO 2023 - CH - 004567 CHANCERY");
        assert_eq!(case, "2023CH004567");
    }

    #[test]
    fn case_number_missing_yields_empty_zero() {
        assert_eq!(extract_case_number("NO CASE REFERENCE HERE"), (String::new(), 0.0));
        assert_eq!(extract_case_number(""), (String::new(), 0.0));
    }

    #[test]
    fn amount_selects_maximum_not_first() {
        let (amount, conf) = extract_amount(
            "FILING FEE PAID $500.00 INTEREST $1,200.50 TOTAL AMOUNT CLAIMED $125,430.00",
        );
        assert_eq!(amount, "$125,430.00");
        assert_eq!(conf, AMOUNT_CONFIDENCE);
    }

    #[test]
    fn amount_reformats_with_thousands_separators() {
        let (amount, _) = extract_amount("DUE $1234567.89 NOW");
        assert_eq!(amount, "$1,234,567.89");
    }

    #[test]
    fn amount_missing_yields_empty_zero() {
        assert_eq!(extract_amount("NO FIGURES PRESENT"), (String::new(), 0.0));
    }

    #[test]
    fn address_requires_suffix_state_and_zip() {
        let (addr, conf) =
            extract_address("PROPERTY AT 4821 W MONTROSE AVE CHICAGO IL 60641 LEGAL DESC");
        assert_eq!(addr, "4821 W MONTROSE AVE CHICAGO IL 60641");
        assert_eq!(conf, ADDRESS_CONFIDENCE);

        // Suffix without the state+zip tail is not enough.
        assert_eq!(
            extract_address("LOCATED AT 4821 W MONTROSE AVE CHICAGO"),
            (String::new(), 0.0)
        );
    }

    #[test]
    fn address_first_match_wins() {
        let (addr, _) = extract_address(
            "12 OAK ST SPRINGFIELD IL 62704 AND ALSO 99 PINE RD CHICAGO IL 60601",
        );
        assert_eq!(addr, "12 OAK ST SPRINGFIELD IL 62704");
    }

    #[test]
    fn usd_formatting() {
        assert_eq!(format_usd(500.0), "$500.00");
        assert_eq!(format_usd(125430.0), "$125,430.00");
        assert_eq!(format_usd(1234567.89), "$1,234,567.89");
    }
}
