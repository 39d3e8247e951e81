//! Submitted bundle parsing and resource lookup
//!
//! Accepted shapes:
//! - a FHIR `Bundle` (entries' `resource` members are used)
//! - a single bare resource (wrapped into a collection bundle)
//! - NDJSON, one resource per line (unparsable lines are dropped)

use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use super::issue::ResourceRef;

/// Bundle is structurally unreadable
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InputError {
    #[error("bundle is empty")]
    Empty,

    #[error("bundle is not valid UTF-8")]
    NotUtf8,

    #[error("bundle JSON has no resourceType")]
    MissingResourceType,

    #[error("bundle entry list is not an array")]
    MalformedEntries,

    #[error("bundle is neither JSON nor NDJSON: {0}")]
    Unreadable(String),
}

/// Strip reference prefixes (`urn:uuid:`, `Patient/`, ...) down to the raw id
pub fn normalize_id(reference: &str) -> String {
    let trimmed = reference.trim();
    let without_urn = trimmed
        .strip_prefix("urn:uuid:")
        .or_else(|| trimmed.strip_prefix("urn:oid:"))
        .unwrap_or(trimmed);
    // Relative reference "Type/id" or absolute ".../Type/id"
    without_urn
        .rsplit('/')
        .next()
        .unwrap_or(without_urn)
        .trim()
        .to_string()
}

/// Resource type part of a relative reference ("Patient/123" → "Patient")
fn reference_type(reference: &str) -> Option<&str> {
    let mut parts = reference.trim().rsplitn(2, '/');
    parts.next()?;
    let prefix = parts.next()?;
    let resource_type = prefix.rsplit('/').next()?;
    let starts_upper = resource_type.chars().next().is_some_and(|c| c.is_ascii_uppercase());
    (starts_upper && !resource_type.contains(':')).then_some(resource_type)
}

/// Parsed bundle: an ordered list of resources
#[derive(Debug, Clone)]
pub struct Bundle {
    /// Resource JSON objects in bundle order
    resources: Vec<Value>,
    /// `fullUrl` of each entry, if present
    full_urls: Vec<Option<String>>,
}

impl Bundle {
    pub fn parse(bytes: &[u8]) -> Result<Bundle, InputError> {
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(InputError::Empty);
        }
        let text = std::str::from_utf8(bytes).map_err(|_| InputError::NotUtf8)?;

        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(object)) => Self::from_object(Value::Object(object)),
            Ok(_) => Err(InputError::MissingResourceType),
            Err(json_err) => Self::from_ndjson(text, json_err),
        }
    }

    fn from_object(value: Value) -> Result<Bundle, InputError> {
        let resource_type = value
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or(InputError::MissingResourceType)?;

        if resource_type != "Bundle" {
            return Ok(Bundle {
                resources: vec![value],
                full_urls: vec![None],
            });
        }

        let entries = match value.get("entry") {
            None | Some(Value::Null) => return Ok(Bundle::empty()),
            Some(Value::Array(entries)) => entries,
            Some(_) => return Err(InputError::MalformedEntries),
        };

        let mut resources = Vec::with_capacity(entries.len());
        let mut full_urls = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Some(resource) = entry.get("resource").filter(|r| r.is_object()) {
                resources.push(resource.clone());
                full_urls.push(entry.get("fullUrl").and_then(Value::as_str).map(str::to_string));
            }
        }
        Ok(Bundle { resources, full_urls })
    }

    fn from_ndjson(text: &str, json_err: serde_json::Error) -> Result<Bundle, InputError> {
        let resources: Vec<Value> = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter(|value| value.get("resourceType").and_then(Value::as_str).is_some())
            .collect();

        if resources.is_empty() {
            return Err(InputError::Unreadable(json_err.to_string()));
        }
        let full_urls = vec![None; resources.len()];
        Ok(Bundle { resources, full_urls })
    }

    pub fn empty() -> Self {
        Bundle {
            resources: Vec::new(),
            full_urls: Vec::new(),
        }
    }

    pub fn from_resources(resources: Vec<Value>) -> Self {
        let full_urls = vec![None; resources.len()];
        Bundle { resources, full_urls }
    }

    pub fn resources(&self) -> &[Value] {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Normalized collection bundle sent to the semantic validator
    pub fn to_json(&self) -> Value {
        let entries: Vec<Value> = self
            .resources
            .iter()
            .zip(&self.full_urls)
            .map(|(resource, full_url)| match full_url {
                Some(url) => json!({ "fullUrl": url, "resource": resource }),
                None => json!({ "resource": resource }),
            })
            .collect();
        json!({ "resourceType": "Bundle", "type": "collection", "entry": entries })
    }

    /// Reference to the resource at entry position `index`
    pub fn entry_ref(&self, index: usize) -> Option<ResourceRef> {
        let resource = self.resources.get(index)?;
        let resource_type = resource.get("resourceType").and_then(Value::as_str)?;
        let id = resource
            .get("id")
            .and_then(Value::as_str)
            .map(normalize_id)
            .or_else(|| self.full_urls[index].as_deref().map(normalize_id))
            .unwrap_or_else(|| format!("entry-{}", index));
        Some(ResourceRef::resource(resource_type, id))
    }

    pub fn index(&self) -> ResourceIndex {
        let mut index = ResourceIndex::default();
        for position in 0..self.resources.len() {
            if let Some(ResourceRef::Resource { resource_type, id }) = self.entry_ref(position) {
                let key = (resource_type, id);
                if let Some(full_url) = &self.full_urls[position] {
                    index
                        .by_full_url
                        .entry(normalize_id(full_url))
                        .or_insert_with(|| key.clone());
                }
                index.by_bare_id.entry(key.1.clone()).or_insert_with(|| key.clone());
                index.typed.insert(key);
            }
        }
        index
    }
}

/// Lookup of resources present in a bundle
///
/// Resources are identified by (type, id); the same id may appear under
/// several types. Bare ids resolve to the first resource carrying them.
#[derive(Debug, Clone, Default)]
pub struct ResourceIndex {
    typed: HashSet<(String, String)>,
    /// normalized fullUrl id → (type, id)
    by_full_url: HashMap<String, (String, String)>,
    /// id without type → first (type, id) in bundle order
    by_bare_id: HashMap<String, (String, String)>,
}

impl ResourceIndex {
    /// Resolve a raw reference ("Patient/1", "urn:uuid:…", "1") to a [`ResourceRef`]
    ///
    /// Unknown ids keep the type from the reference when it has one, otherwise
    /// `Resource`. Blank references resolve to bundle level.
    pub fn resolve(&self, reference: &str) -> ResourceRef {
        let id = normalize_id(reference);
        if id.is_empty() {
            return ResourceRef::Bundle;
        }
        let typed = reference_type(reference);

        if let Some(resource_type) = typed {
            let key = (resource_type.to_string(), id.clone());
            if self.typed.contains(&key) {
                return ResourceRef::resource(key.0, key.1);
            }
        }
        let found = self
            .by_full_url
            .get(&id)
            .or_else(|| self.by_bare_id.get(&id))
            .filter(|(t, _)| typed.map_or(true, |r| r == t.as_str()));
        match found {
            Some((resource_type, canonical)) => {
                ResourceRef::resource(resource_type.clone(), canonical.clone())
            }
            None => ResourceRef::resource(typed.unwrap_or("Resource"), id),
        }
    }

    pub fn contains(&self, reference: &ResourceRef) -> bool {
        match reference {
            ResourceRef::Bundle => true,
            ResourceRef::Resource { resource_type, id } => {
                self.typed.contains(&(resource_type.clone(), id.clone()))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.typed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.typed.is_empty()
    }
}
