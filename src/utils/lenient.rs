// src/utils/lenient.rs
// Deserializers for fields the backend sometimes sends as strings
// (Django DecimalField) and sometimes as JSON numbers.
use serde::{Deserialize, Deserializer, de::Error as _};

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

fn parse_number<E: serde::de::Error>(value: NumberOrString) -> Result<Option<f64>, E> {
    match value {
        NumberOrString::Number(n) => Ok(Some(n)),
        NumberOrString::Text(s) if s.trim().is_empty() => Ok(None),
        NumberOrString::Text(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| E::custom(format!("expected a number, got '{}'", s))),
    }
}

pub fn f64_lenient<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = NumberOrString::deserialize(deserializer)?;
    parse_number(value)?.ok_or_else(|| D::Error::custom("expected a number, got an empty string"))
}

pub fn opt_f64_lenient<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberOrString>::deserialize(deserializer)? {
        Some(value) => parse_number(value),
        None => Ok(None),
    }
}

/// `null` becomes the type's default ("" for strings, [] for lists).
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
