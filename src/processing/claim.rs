//! Claim data model shared by the pipeline, the store, and the HTTP surface.
//!
//! The model is the only producer of [`StructuredClaimData`]. Its `data` object is stored and
//! echoed exactly as the model wrote it; the typed views ([`StructuredClaimData::patient`] and
//! friends) read it tolerantly: numbers where strings were requested keep their textual form,
//! `null` or mistyped blocks become defaults, and keys outside the schema stay in `extra`.
//! The envelope around it (`data` plus a confidence) is strict.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
/// Self-reported model confidence, clamped into `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Confidence(f64);

impl Confidence {
    /// Clamp a finite value into range; `None` for NaN or infinities.
    pub fn new(value: f64) -> Option<Self> {
        value
            .is_finite()
            .then(|| Self(value.clamp(0.0, 100.0)))
    }

    /// Parse textual percentages such as `"92"`, `" 87.5 % "`.
    pub fn parse_percent(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        let number = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
        number.parse::<f64>().ok().and_then(Self::new)
    }

    /// Underlying percentage.
    pub fn value(self) -> f64 {
        self.0
    }
}

impl Serialize for Confidence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Whole percentages go out as integers so `92` stays `92` on the wire.
        if self.0.fract() == 0.0 {
            serializer.serialize_u64(self.0 as u64)
        } else {
            serializer.serialize_f64(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Confidence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let parsed = match &value {
            Value::Number(number) => number.as_f64().and_then(Self::new),
            Value::String(text) => Self::parse_percent(text),
            _ => None,
        };
        parsed.ok_or_else(|| {
            serde::de::Error::custom(format!("expected a confidence percentage, found {value}"))
        })
    }
}

/// Patient block of a claim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientInfo {
    /// Patient full name.
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub name: Option<String>,
    /// Age in years, when the model wrote something numeric.
    #[serde(default, deserialize_with = "lenient::optional_age")]
    pub age: Option<u32>,
    /// Insurer or scheme covering the claim.
    #[serde(
        rename = "Insurance Scheme Service Provider",
        alias = "insurance_scheme_service_provider",
        default,
        deserialize_with = "lenient::optional_text"
    )]
    pub insurance_scheme_service_provider: Option<String>,
    /// Keys outside the requested schema, such as `gender`.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A dispensed or prescribed medication.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    /// Drug name.
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub name: Option<String>,
    /// Dosage as written on the claim.
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub dosage: Option<String>,
    /// Quantity as written on the claim.
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub quantity: Option<String>,
    /// Keys outside the requested schema, such as `frequency`.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Admission details for inpatient claims.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdmissionDetails {
    /// Whether the patient was admitted.
    #[serde(default, deserialize_with = "lenient::optional_flag")]
    pub was_admitted: Option<bool>,
    /// Admission date, `YYYY-MM-DD` when the model follows the prompt.
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub admission_date: Option<String>,
    /// Discharge date, `YYYY-MM-DD` when the model follows the prompt.
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub discharge_date: Option<String>,
    /// Keys outside the requested schema.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Structured fields extracted from a claim document, kept verbatim.
///
/// Deserializes from any JSON object; `null` is read as an empty object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StructuredClaimData(Map<String, Value>);

impl StructuredClaimData {
    /// True when the model returned an empty object (or `null`).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw value under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Patient block; defaults when absent or not an object.
    pub fn patient(&self) -> PatientInfo {
        self.object_view("patient")
    }

    /// Admission block; defaults when absent or not an object.
    pub fn admission(&self) -> AdmissionDetails {
        self.object_view("admission")
    }

    /// Diagnoses as text. A bare string counts as one entry.
    pub fn diagnoses(&self) -> Vec<String> {
        self.get("diagnoses").map(lenient::text_list).unwrap_or_default()
    }

    /// Procedures as text. A bare string counts as one entry.
    pub fn procedures(&self) -> Vec<String> {
        self.get("procedures").map(lenient::text_list).unwrap_or_default()
    }

    /// Medications. Bare strings become names; `null` and other scalars are skipped.
    pub fn medications(&self) -> Vec<Medication> {
        self.get("medications")
            .map(lenient::medication_list)
            .unwrap_or_default()
    }

    /// Claimed total in whatever shape the model used (string, number, or object).
    pub fn total_amount(&self) -> Option<&Value> {
        self.get("total_amount").filter(|value| !value.is_null())
    }

    fn object_view<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.get(key) {
            Some(value @ Value::Object(_)) => T::deserialize(value).unwrap_or_default(),
            _ => T::default(),
        }
    }
}

impl<'de> Deserialize<'de> for StructuredClaimData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // `Value` rather than `Option` so an absent `data` key is still an error.
        match Value::deserialize(deserializer)? {
            Value::Object(fields) => Ok(Self(fields)),
            Value::Null => Ok(Self::default()),
            other => Err(serde::de::Error::custom(format!(
                "expected `data` to be an object, found {other}"
            ))),
        }
    }
}

/// Output of the structuring step: claim data plus the model's confidence in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredExtraction {
    /// Structured claim fields.
    pub data: StructuredClaimData,
    /// Confidence that `data` is accurate and complete.
    pub extraction_confidence: Confidence,
}

/// A stored extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimDocument {
    /// Structuring output as returned to the caller of `/extract`.
    pub extraction: StructuredExtraction,
    /// Number of page images sent for text extraction.
    pub page_count: usize,
    /// RFC 3339 UTC timestamp of when the document was stored.
    pub extracted_at: String,
}

/// Answer to a question about a stored claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResult {
    /// Concise answer text.
    #[serde(deserialize_with = "lenient::required_text")]
    pub answer: String,
    /// Confidence that the answer is supported by the claim data.
    pub answer_confidence: Confidence,
}

mod lenient {
    use super::Medication;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn text_of(value: &Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            other => Some(other.to_string()),
        }
    }

    pub(super) fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Value>::deserialize(deserializer)?
            .as_ref()
            .and_then(text_of))
    }

    pub(super) fn required_text<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<Value>::deserialize(deserializer)?
            .as_ref()
            .and_then(text_of)
            .ok_or_else(|| serde::de::Error::custom("expected non-empty text"))
    }

    pub(super) fn optional_age<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let age = match Option::<Value>::deserialize(deserializer)? {
            Some(Value::Number(number)) => number
                .as_u64()
                .or_else(|| number.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64))
                .and_then(|v| u32::try_from(v).ok()),
            // "45", "45 years"
            Some(Value::String(text)) => {
                let digits: String = text
                    .trim()
                    .chars()
                    .take_while(char::is_ascii_digit)
                    .collect();
                digits.parse().ok()
            }
            _ => None,
        };
        Ok(age)
    }

    pub(super) fn optional_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let flag = match Option::<Value>::deserialize(deserializer)? {
            Some(Value::Bool(flag)) => Some(flag),
            Some(Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "y" => Some(true),
                "false" | "no" | "n" => Some(false),
                _ => None,
            },
            _ => None,
        };
        Ok(flag)
    }

    pub(super) fn text_list(value: &Value) -> Vec<String> {
        match value {
            Value::Array(values) => values.iter().filter_map(text_of).collect(),
            single => text_of(single).into_iter().collect(),
        }
    }

    pub(super) fn medication_list(value: &Value) -> Vec<Medication> {
        let Value::Array(entries) = value else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|entry| match entry {
                Value::Object(_) => Medication::deserialize(entry).ok(),
                Value::String(name) => {
                    let name = name.trim();
                    (!name.is_empty()).then(|| Medication {
                        name: Some(name.to_string()),
                        ..Medication::default()
                    })
                }
                _ => None,
            })
            .collect()
    }
}
