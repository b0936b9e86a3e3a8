//! Structured entity extraction
//!
//! Always rule-based, independent of intent selection. Extractors are pure
//! functions of the text window (relative dates resolve against the clock
//! the caller passes in). Nothing here persists.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;
use serde::Serialize;

/// An extracted entity
#[derive(Debug, Clone, Serialize)]
pub struct Entity {
    pub value: String,
    pub normalized: Option<String>,
    pub valid: bool,
}

impl Entity {
    fn new(value: &str, normalized: Option<String>) -> Self {
        Self {
            value: value.to_string(),
            normalized,
            valid: true,
        }
    }
}

static RE_CPF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}\.?\d{3}\.?\d{3}-?\d{2}\b").unwrap());
static RE_PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(?\d{2}\)?\s*9?\d{4}-?\d{4}").unwrap());
static RE_CEP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{5}-?\d{3}\b").unwrap());
static RE_EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}\b").unwrap()
});
static RE_URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://[^\s]+").unwrap());
static RE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b|\b(\d{1,2})[/-](\d{1,2})[/-](\d{2,4})\b").unwrap()
});
static RE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})[:h](\d{2})?\s*(am|pm|AM|PM)?\b").unwrap()
});
static RE_MONEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"R\$\s*\d+(?:[.,]\d{3})*(?:[.,]\d{2})?").unwrap());
static RE_QUANTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d+)\s+(?:unidades?|produtos?|itens?|pcs?)\b|\bquero\s+(\d+)\b|\bpreciso\s+de\s+(\d+)\b")
        .unwrap()
});

const PRODUCT_WORDS: &[&str] = &[
    "notebook",
    "laptop",
    "computador",
    "desktop",
    "celular",
    "smartphone",
    "tablet",
    "mouse",
    "teclado",
    "monitor",
    "webcam",
];

/// Validate a CPF with its check digits
#[must_use]
pub fn validate_cpf(cpf: &str) -> bool {
    let digits: Vec<u32> = cpf.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 11 {
        return false;
    }
    if digits.iter().all(|d| *d == digits[0]) {
        return false;
    }

    let check = |len: usize| -> u32 {
        let sum: u32 = digits[..len]
            .iter()
            .enumerate()
            .map(|(i, d)| d * (len as u32 + 1 - i as u32))
            .sum();
        (sum * 10 % 11) % 10
    };

    check(9) == digits[9] && check(10) == digits[10]
}

fn normalize_cpf(cpf: &str) -> String {
    let digits: String = cpf.chars().filter(char::is_ascii_digit).collect();
    format!(
        "{}.{}.{}-{}",
        &digits[..3],
        &digits[3..6],
        &digits[6..9],
        &digits[9..]
    )
}

fn normalize_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        11 => format!("({}) {}-{}", &digits[..2], &digits[2..7], &digits[7..]),
        10 => format!("({}) {}-{}", &digits[..2], &digits[2..6], &digits[6..]),
        _ => phone.to_string(),
    }
}

fn normalize_cep(cep: &str) -> String {
    let digits: String = cep.chars().filter(char::is_ascii_digit).collect();
    format!("{}-{}", &digits[..5], &digits[5..])
}

/// Parse a date expression, including relative terms, against `today`
#[must_use]
pub fn parse_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let lower = text.to_lowercase();
    if lower.contains("amanhã") || lower.contains("amanha") {
        return Some(today + Duration::days(1));
    }
    if lower.contains("hoje") {
        return Some(today);
    }

    let caps = RE_DATE.captures(text)?;
    if let Some(iso) = caps.get(1) {
        return NaiveDate::parse_from_str(iso.as_str(), "%Y-%m-%d").ok();
    }

    let day: u32 = caps.get(2)?.as_str().parse().ok()?;
    let month: u32 = caps.get(3)?.as_str().parse().ok()?;
    let year_raw = caps.get(4)?.as_str();
    let year: i32 = year_raw.parse().ok()?;
    let year = if year_raw.len() == 2 { 2000 + year } else { year };

    NaiveDate::from_ymd_opt(year, month, day)
}

/// Parse a time-of-day into `HH:MM` 24h form
///
/// Accepts `14:30`, `14h`, `14h30`, `2:30pm`.
#[must_use]
pub fn parse_time(text: &str) -> Option<String> {
    let caps = RE_TIME.captures(text)?;
    let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = caps
        .get(2)
        .map_or(0, |m| m.as_str().parse().unwrap_or(0));
    let period = caps.get(3).map(|m| m.as_str().to_lowercase());

    match period.as_deref() {
        Some("pm") if hour != 12 => hour += 12,
        Some("am") if hour == 12 => hour = 0,
        _ => {}
    }

    if hour > 23 || minute > 59 {
        return None;
    }

    Some(format!("{hour:02}:{minute:02}"))
}

/// Parse a `R$` amount into a float
#[must_use]
pub fn parse_money(text: &str) -> Option<f64> {
    let stripped = text.replace("R$", "");
    let stripped = stripped.trim();

    let normalized = if stripped.contains(',') {
        // BR format: 1.500,00
        stripped.replace('.', "").replace(',', ".")
    } else {
        stripped.to_string()
    };

    normalized.parse().ok()
}

/// Extract every entity found in the text window
///
/// Keys: `cpf`, `phone`, `cep`, `email`, `url`, `date`, `time`, `money`,
/// `quantity`, `product`.
#[must_use]
pub fn extract_entities(text: &str, now: DateTime<Utc>) -> BTreeMap<String, Entity> {
    let mut entities = BTreeMap::new();
    let today = now.date_naive();

    if let Some(m) = RE_CPF.find(text) {
        let valid = validate_cpf(m.as_str());
        entities.insert(
            "cpf".to_string(),
            Entity {
                value: m.as_str().to_string(),
                normalized: valid.then(|| normalize_cpf(m.as_str())),
                valid,
            },
        );
    }

    if let Some(m) = RE_EMAIL.find(text) {
        entities.insert(
            "email".to_string(),
            Entity::new(m.as_str(), Some(m.as_str().to_lowercase())),
        );
    }

    // CEP before phone: a bare 8-digit CEP also matches the loose phone
    // pattern, so claim it first and exclude the span.
    let mut cep_span = None;
    if let Some(m) = RE_CEP.find(text) {
        cep_span = Some(m.range());
        entities.insert(
            "cep".to_string(),
            Entity::new(m.as_str(), Some(normalize_cep(m.as_str()))),
        );
    }

    for m in RE_PHONE.find_iter(text) {
        if let Some(span) = &cep_span {
            if m.start() < span.end && m.end() > span.start {
                continue;
            }
        }
        // Digits inside a matched CPF are not a phone number
        if entities
            .get("cpf")
            .is_some_and(|cpf| cpf.value.contains(m.as_str()))
        {
            continue;
        }
        entities.insert(
            "phone".to_string(),
            Entity::new(m.as_str(), Some(normalize_phone(m.as_str()))),
        );
        break;
    }

    if let Some(m) = RE_URL.find(text) {
        entities.insert("url".to_string(), Entity::new(m.as_str(), None));
    }

    if let Some(date) = parse_date(text, today) {
        let value = RE_DATE
            .find(text)
            .map_or_else(|| text.to_string(), |m| m.as_str().to_string());
        entities.insert(
            "date".to_string(),
            Entity {
                value,
                normalized: Some(date.format("%Y-%m-%d").to_string()),
                valid: date >= today,
            },
        );
    }

    if let Some(time) = parse_time(text) {
        let value = RE_TIME
            .find(text)
            .map_or_else(String::new, |m| m.as_str().to_string());
        entities.insert(
            "time".to_string(),
            Entity {
                value,
                normalized: Some(time),
                valid: true,
            },
        );
    }

    if let Some(m) = RE_MONEY.find(text) {
        let amount = parse_money(m.as_str());
        entities.insert(
            "money".to_string(),
            Entity {
                value: m.as_str().to_string(),
                normalized: amount.map(|a| format!("R$ {a:.2}")),
                valid: amount.is_some(),
            },
        );
    }

    if let Some(caps) = RE_QUANTITY.captures(&text.to_lowercase()) {
        let qty = caps
            .get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().to_string());
        if let Some(qty) = qty {
            entities.insert("quantity".to_string(), Entity::new(&qty, Some(qty.clone())));
        }
    }

    let lower = text.to_lowercase();
    for product in PRODUCT_WORDS {
        if lower.contains(product) {
            entities.insert(
                "product".to_string(),
                Entity::new(product, Some((*product).to_string())),
            );
            break;
        }
    }

    entities
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_cpf_checksum() {
        // 529.982.247-25 is arithmetically valid
        assert!(validate_cpf("529.982.247-25"));
        assert!(!validate_cpf("529.982.247-26"));
        assert!(!validate_cpf("111.111.111-11"));
        assert!(!validate_cpf("1234"));
    }

    #[test]
    fn test_extract_cpf_and_phone() {
        let entities = extract_entities(
            "Meu CPF é 529.982.247-25 e telefone (11) 98765-4321",
            now(),
        );
        assert!(entities["cpf"].valid);
        assert_eq!(
            entities["cpf"].normalized.as_deref(),
            Some("529.982.247-25")
        );
        assert_eq!(
            entities["phone"].normalized.as_deref(),
            Some("(11) 98765-4321")
        );
    }

    #[test]
    fn test_invalid_cpf_flagged() {
        let entities = extract_entities("CPF 123.456.789-10", now());
        assert!(!entities["cpf"].valid);
        assert!(entities["cpf"].normalized.is_none());
    }

    #[test]
    fn test_email_lowercased() {
        let entities = extract_entities("escreva para Joao@Empresa.com.br", now());
        assert_eq!(
            entities["email"].normalized.as_deref(),
            Some("joao@empresa.com.br")
        );
    }

    #[test]
    fn test_relative_dates() {
        assert_eq!(
            parse_date("amanhã às 14h", now().date_naive()),
            Some(NaiveDate::from_ymd_opt(2025, 12, 2).unwrap())
        );
        assert_eq!(
            parse_date("hoje", now().date_naive()),
            Some(NaiveDate::from_ymd_opt(2025, 12, 1).unwrap())
        );
    }

    #[test]
    fn test_absolute_dates() {
        let today = now().date_naive();
        assert_eq!(
            parse_date("25/12/2025", today),
            Some(NaiveDate::from_ymd_opt(2025, 12, 25).unwrap())
        );
        assert_eq!(
            parse_date("2025-12-25", today),
            Some(NaiveDate::from_ymd_opt(2025, 12, 25).unwrap())
        );
        assert_eq!(
            parse_date("25/12/25", today),
            Some(NaiveDate::from_ymd_opt(2025, 12, 25).unwrap())
        );
    }

    #[test]
    fn test_past_date_flagged_invalid() {
        let entities = extract_entities("aconteceu em 01/01/2020", now());
        assert!(!entities["date"].valid);
    }

    #[test]
    fn test_time_variants() {
        assert_eq!(parse_time("às 14:30").as_deref(), Some("14:30"));
        assert_eq!(parse_time("às 14h").as_deref(), Some("14:00"));
        assert_eq!(parse_time("2:30pm").as_deref(), Some("14:30"));
        assert_eq!(parse_time("12:00am").as_deref(), Some("00:00"));
        assert_eq!(parse_time("sem hora"), None);
    }

    #[test]
    fn test_money_br_format() {
        assert_eq!(parse_money("R$ 5.000,00"), Some(5000.0));
        assert_eq!(parse_money("R$ 1500.50"), Some(1500.5));
        let entities = extract_entities("custa R$ 5.000,00", now());
        assert_eq!(entities["money"].normalized.as_deref(), Some("R$ 5000.00"));
    }

    #[test]
    fn test_scheduling_message_full_extraction() {
        let entities = extract_entities(
            "quero agendar demo, meu email é x@y.com, amanhã às 14h",
            now(),
        );
        assert_eq!(entities["email"].normalized.as_deref(), Some("x@y.com"));
        assert_eq!(entities["date"].normalized.as_deref(), Some("2025-12-02"));
        assert_eq!(entities["time"].normalized.as_deref(), Some("14:00"));
    }

    #[test]
    fn test_quantity_and_product() {
        let entities = extract_entities("quero 3 notebooks Dell", now());
        assert_eq!(entities["quantity"].value, "3");
        assert_eq!(entities["product"].value, "notebook");
    }

    #[test]
    fn test_cep_not_misread_as_phone() {
        let entities = extract_entities("envie para o CEP 01310-100", now());
        assert_eq!(entities["cep"].normalized.as_deref(), Some("01310-100"));
        assert!(!entities.contains_key("phone"));
    }
}
