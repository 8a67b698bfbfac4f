use url::Url;

use crate::core::form::{Form, FormInputs};
use crate::http::{BodyType, FetchRequest};

/// Query parameter names in first-occurrence order, duplicates removed.
pub fn query_param_names(url: &Url) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for (k, _) in url.query_pairs() {
        if !names.iter().any(|n| *n == k) {
            names.push(k.into_owned());
        }
    }
    names
}

/// Ordered, de-duplicated query pairs. A repeated name keeps its first
/// position and first value.
pub fn query_pairs(url: &Url) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for (k, v) in url.query_pairs() {
        if !pairs.iter().any(|(n, _)| *n == k) {
            pairs.push((k.into_owned(), v.into_owned()));
        }
    }
    pairs
}

fn with_query(url: &Url, pairs: &[(String, String)]) -> Url {
    let mut out = url.clone();
    if pairs.is_empty() {
        out.set_query(None);
        return out;
    }
    out.query_pairs_mut().clear().extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    out
}

/// Sets `name` to `value`, keeping parameter order. An absent parameter is
/// appended.
pub fn inject_query_param(url: &Url, name: &str, value: &str) -> Url {
    let mut pairs = query_pairs(url);
    match pairs.iter_mut().find(|(k, _)| k == name) {
        Some(slot) => slot.1 = value.to_string(),
        None => pairs.push((name.to_string(), value.to_string())),
    }
    with_query(url, &pairs)
}

/// Appends `suffix` to the current value of `name`.
pub fn append_to_query_param(url: &Url, name: &str, suffix: &str) -> Url {
    let current = query_pairs(url)
        .into_iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v)
        .unwrap_or_default();
    inject_query_param(url, name, &format!("{}{}", current, suffix))
}

/// The URL a GET form submits to: the action's query with the form inputs
/// merged over it.
pub fn form_get_url(form: &Form) -> Option<Url> {
    let action = Url::parse(&form.action).ok()?;
    let mut pairs = query_pairs(&action);
    for (name, value) in form.inputs.iter() {
        match pairs.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value.to_string(),
            None => pairs.push((name.to_string(), value.to_string())),
        }
    }
    Some(with_query(&action, &pairs))
}

/// Serializes `form` with every input set to `value`.
pub fn form_body(form: &Form, value: &str) -> (String, BodyType) {
    let filled: FormInputs = form.inputs.names().map(|n| (n, value)).collect();
    let body_type = BodyType::from_enctype(&form.enctype);
    let body = match body_type {
        BodyType::Json => serde_json::to_string(&filled).unwrap_or_else(|_| "{}".to_string()),
        _ => url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(filled.iter())
            .finish(),
    };
    (body, body_type)
}

/// Builds the POST submission of `form` with every input set to `value`.
pub fn form_post_request(form: &Form, value: &str) -> Option<FetchRequest> {
    let action = Url::parse(&form.action).ok()?;
    let (body, body_type) = form_body(form, value);
    Some(FetchRequest::post(action, body, body_type))
}
