// Typed view of the per-record analysis answer
//
// Every field is optional on the wire. Models routinely return nulls, numbers
// where strings were asked for, a bare object instead of a list, and so on;
// the deserializers below coerce those shapes instead of rejecting the answer.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordAnalysis {
    #[serde(deserialize_with = "lenient_string")]
    pub summary: String,
    #[serde(deserialize_with = "lenient_string")]
    pub visit_type: String,
    #[serde(deserialize_with = "lenient_object")]
    pub provider: Provider,
    #[serde(deserialize_with = "lenient_string")]
    pub primary_condition: String,
    #[serde(deserialize_with = "lenient_string_list")]
    pub diagnoses: Vec<String>,
    #[serde(deserialize_with = "lenient_string_list")]
    pub treatments: Vec<String>,
    #[serde(deserialize_with = "lenient_medications")]
    pub medications: Vec<Medication>,
    #[serde(deserialize_with = "lenient_test_results")]
    pub test_results: Vec<TestResult>,
    #[serde(deserialize_with = "lenient_object")]
    pub patient: Patient,
    #[serde(deserialize_with = "lenient_string")]
    pub treatment_date: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Provider {
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub facility: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Patient {
    #[serde(deserialize_with = "lenient_string")]
    pub first_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub middle_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub last_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    pub name: String,
    pub dosage: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub value: String,
    pub interpretation: Option<String>,
}

impl RecordAnalysis {
    /// Parse one answer. Markdown code fences around the JSON are tolerated.
    pub fn parse(answer: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(strip_code_fence(answer))?;
        if !value.is_object() {
            return Err(<serde_json::Error as serde::de::Error>::custom(
                "analysis answer is not a JSON object",
            ));
        }
        serde_json::from_value(value)
    }

    /// `name (dosage)`, or just `name` without a dosage.
    pub fn medication_lines(&self) -> Vec<String> {
        self.medications
            .iter()
            .map(|med| match med.dosage.as_deref() {
                Some(dosage) if !dosage.is_empty() => format!("{} ({})", med.name, dosage),
                _ => med.name.clone(),
            })
            .collect()
    }

    /// `name: value`, plus ` - interpretation` when present.
    pub fn test_result_lines(&self) -> Vec<String> {
        self.test_results
            .iter()
            .map(|test| {
                let mut line = format!("{}: {}", test.name, test.value);
                if let Some(interpretation) = test.interpretation.as_deref() {
                    if !interpretation.is_empty() {
                        line.push_str(" - ");
                        line.push_str(interpretation);
                    }
                }
                line
            })
            .collect()
    }
}

fn strip_code_fence(answer: &str) -> &str {
    let trimmed = answer.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_string(&value).unwrap_or_default())
}

fn lenient_object<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Object(_) => Ok(serde_json::from_value(value).unwrap_or_default()),
        _ => Ok(T::default()),
    }
}

fn lenient_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items.iter().filter_map(value_to_string).collect(),
        Value::String(s) if s.trim().is_empty() => Vec::new(),
        other => value_to_string(&other).into_iter().collect(),
    })
}

// A bare object counts as a one-element list.
fn object_items(value: Value) -> Vec<serde_json::Map<String, Value>> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        Value::Object(map) => vec![map],
        _ => Vec::new(),
    }
}

fn lenient_medications<'de, D>(deserializer: D) -> Result<Vec<Medication>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(object_items(value)
        .into_iter()
        .filter_map(|map| {
            let name = map.get("name").and_then(value_to_string)?;
            Some(Medication {
                name,
                dosage: map.get("dosage").and_then(value_to_string),
            })
        })
        .collect())
}

fn lenient_test_results<'de, D>(deserializer: D) -> Result<Vec<TestResult>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(object_items(value)
        .into_iter()
        .map(|map| TestResult {
            name: map.get("name").and_then(value_to_string).unwrap_or_default(),
            value: map.get("value").and_then(value_to_string).unwrap_or_default(),
            interpretation: map.get("interpretation").and_then(value_to_string),
        })
        .collect())
}
