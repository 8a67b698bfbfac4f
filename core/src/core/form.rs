use std::collections::HashSet;
use std::fmt;

use log::debug;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::ScanError;

pub const DEFAULT_ENCTYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormMethod {
    Get,
    Post,
}

impl FormMethod {
    /// Anything other than `post` (case-insensitive) submits as GET.
    pub fn from_attr(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("post") {
            FormMethod::Post
        } else {
            FormMethod::Get
        }
    }
}

impl fmt::Display for FormMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormMethod::Get => write!(f, "get"),
            FormMethod::Post => write!(f, "post"),
        }
    }
}

/// Field name -> default value, unique names, insertion order kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormInputs(Vec<(String, String)>);

impl FormInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// A repeated name keeps its first position and takes the newer value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormInputs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut inputs = FormInputs::new();
        for (k, v) in iter {
            inputs.insert(k, v);
        }
        inputs
    }
}

impl Serialize for FormInputs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FormInputs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct InputsVisitor;

        impl<'de> Visitor<'de> for InputsVisitor {
            type Value = FormInputs;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of input names to default values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<FormInputs, A::Error> {
                let mut inputs = FormInputs::new();
                while let Some((k, v)) = access.next_entry::<String, Option<serde_json::Value>>()? {
                    inputs.insert(k, value_to_text(v));
                }
                Ok(inputs)
            }
        }

        deserializer.deserialize_map(InputsVisitor)
    }
}

fn value_to_text(v: Option<serde_json::Value>) -> String {
    match v {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}

/// A discovered HTML form in canonical shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Form {
    pub action: String,
    pub method: FormMethod,
    pub enctype: String,
    pub inputs: FormInputs,
}

impl Form {
    pub fn new(action: impl Into<String>, method: FormMethod, enctype: Option<&str>, inputs: FormInputs) -> Self {
        let enctype = enctype
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| DEFAULT_ENCTYPE.to_string());
        Self {
            action: action.into(),
            method,
            enctype,
            inputs,
        }
    }

    pub fn is_post(&self) -> bool {
        self.method == FormMethod::Post
    }

    pub fn is_json(&self) -> bool {
        self.enctype.contains("json")
    }

    /// `(action, sorted input names)`; forms with the same key are duplicates.
    pub fn dedup_key(&self) -> (String, String) {
        let mut names: Vec<&str> = self.inputs.names().collect();
        names.sort_unstable();
        (self.action.clone(), names.join("\u{1f}"))
    }

    /// Converts any externally observed form shape into a `Form`.
    pub fn from_raw(raw: RawForm) -> Option<Form> {
        let (url, record) = match raw {
            RawForm::Record(record) => (None, record),
            RawForm::Pair(url, record) => (Some(url), record),
            RawForm::Other(value) => {
                debug!("skipping unknown form shape: {}", value);
                return None;
            }
        };

        let action = url
            .or(record.url)
            .or(record.action)
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())?;
        let method = FormMethod::from_attr(record.method.as_deref().unwrap_or("get"));
        let inputs = match record.inputs {
            Some(RawInputs::Map(map)) => map,
            Some(RawInputs::Pairs(pairs)) => pairs.into_iter().collect(),
            Some(RawInputs::Names(names)) => names.into_iter().map(|n| (n, String::new())).collect(),
            None => FormInputs::new(),
        };

        Some(Form::new(action, method, record.enctype.as_deref(), inputs))
    }
}

/// The form shapes seen at the system edge: a record, or a
/// `[url, record]` pair as emitted by older crawler exports.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawForm {
    Pair(String, RawFormRecord),
    Record(RawFormRecord),
    Other(serde_json::Value),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormRecord {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub enctype: Option<String>,
    #[serde(default)]
    pub inputs: Option<RawInputs>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawInputs {
    Map(FormInputs),
    Pairs(Vec<(String, String)>),
    Names(Vec<String>),
}

/// Reads forms from JSON: either an array of raw forms or an object with a
/// `forms` array (optionally nested under `crawl`).
pub fn ingest_forms_json(text: &str) -> Result<Vec<Form>, ScanError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let list = value
        .get("forms")
        .or_else(|| value.get("crawl").and_then(|c| c.get("forms")))
        .cloned()
        .unwrap_or(value);

    let raw: Vec<RawForm> = match list {
        serde_json::Value::Array(_) => serde_json::from_value(list)?,
        other => return Err(ScanError::Parse(format!("expected a list of forms, got {}", kind_of(&other)))),
    };
    Ok(raw.into_iter().filter_map(Form::from_raw).collect())
}

fn kind_of(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Drops later forms whose dedup key was already seen.
pub fn dedup_forms(forms: Vec<Form>) -> Vec<Form> {
    let mut seen = HashSet::new();
    forms.into_iter().filter(|f| seen.insert(f.dedup_key())).collect()
}
