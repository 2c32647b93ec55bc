//! Engine-side records for contracts and interactions.
//!
//! The builders in [`crate::interaction`] compute which handle, part, and
//! index to pass; the records here are where those calls land. Headers and
//! query parameters are ordered value vectors keyed by name (header names
//! lowercased), so repeated declarations stay distinct and ordered.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::contract::SpecificationVersion;
use crate::interaction::{InteractionKind, Part};

/// A named provider precondition with merged parameters.
#[derive(Debug, Clone)]
pub struct ProviderState {
    pub name: String,
    pub params: Map<String, Value>,
}

/// Payload attached to one part of an interaction.
#[derive(Debug, Clone)]
pub struct Body {
    pub content_type: String,
    pub data: BodyData,
}

#[derive(Debug, Clone)]
pub enum BodyData {
    Text(String),
    Binary(Vec<u8>),
    Multipart {
        boundary: String,
        parts: Vec<MultipartPart>,
    },
    /// Opaque JSON handed to a capability plugin.
    Plugin(String),
}

impl Body {
    /// Render the payload as raw bytes, as served over the wire.
    pub fn bytes(&self) -> Vec<u8> {
        match &self.data {
            BodyData::Text(text) => text.as_bytes().to_vec(),
            BodyData::Binary(bytes) => bytes.clone(),
            BodyData::Plugin(json) => json.as_bytes().to_vec(),
            BodyData::Multipart { boundary, parts } => {
                let mut out = Vec::new();
                for part in parts {
                    out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
                    let disposition = match &part.filename {
                        Some(filename) => format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                            part.name, filename
                        ),
                        None => format!(
                            "Content-Disposition: form-data; name=\"{}\"\r\n",
                            part.name
                        ),
                    };
                    out.extend_from_slice(disposition.as_bytes());
                    out.extend_from_slice(
                        format!("Content-Type: {}\r\n\r\n", part.content_type).as_bytes(),
                    );
                    out.extend_from_slice(&part.data);
                    out.extend_from_slice(b"\r\n");
                }
                out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
                out
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct MultipartPart {
    pub name: String,
    pub content_type: String,
    pub filename: Option<String>,
    pub data: Vec<u8>,
}

/// The request or response half of an interaction.
#[derive(Debug, Clone, Default)]
pub struct PartRecord {
    /// Lowercased header name to ordered values.
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: Option<Body>,
}

impl PartRecord {
    /// The content type an attached body should carry: an explicit
    /// `Content-Type` header wins over the content type passed with the
    /// body itself.
    pub fn effective_content_type(&self, fallback: &str) -> String {
        self.headers
            .get("content-type")
            .and_then(|values| values.first())
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    }

    /// Write a header value at the given occurrence index, growing the
    /// value vector as needed. Returns the resulting occurrence count for
    /// the name.
    pub fn put_header_value(&mut self, name_lower: String, index: usize, value: String) -> usize {
        let values = self.headers.entry(name_lower).or_default();
        if index < values.len() {
            values[index] = value;
        } else {
            while values.len() < index {
                values.push(String::new());
            }
            values.push(value);
        }
        values.len()
    }
}

/// One recorded interaction.
#[derive(Debug, Clone)]
pub struct InteractionRecord {
    pub kind: InteractionKind,
    pub description: String,
    pub provider_states: Vec<ProviderState>,
    pub test_name: Option<String>,
    pub method: String,
    pub path: String,
    /// Query parameter name to ordered values (request side only).
    pub query: BTreeMap<String, Vec<String>>,
    pub status: u16,
    pub request: PartRecord,
    pub response: PartRecord,
}

impl InteractionRecord {
    pub fn new(kind: InteractionKind, description: &str) -> Self {
        Self {
            kind,
            description: description.to_string(),
            provider_states: Vec::new(),
            test_name: None,
            method: "GET".to_string(),
            path: "/".to_string(),
            query: BTreeMap::new(),
            status: 200,
            request: PartRecord::default(),
            response: PartRecord::default(),
        }
    }

    pub fn part_mut(&mut self, part: Part) -> &mut PartRecord {
        match part {
            Part::Request => &mut self.request,
            Part::Response => &mut self.response,
        }
    }

    /// Find or create the provider state entry for `name`. Repeated
    /// `given` calls with the same state merge into one entry.
    pub fn state_mut(&mut self, name: &str) -> &mut ProviderState {
        let pos = match self.provider_states.iter().position(|s| s.name == name) {
            Some(pos) => pos,
            None => {
                self.provider_states.push(ProviderState {
                    name: name.to_string(),
                    params: Map::new(),
                });
                self.provider_states.len() - 1
            }
        };
        &mut self.provider_states[pos]
    }
}

#[derive(Debug, Clone)]
pub struct PluginRef {
    pub name: String,
    pub version: Option<String>,
}

/// One consumer/provider contract and everything registered against it.
#[derive(Debug, Clone)]
pub struct ContractRecord {
    pub consumer: String,
    pub provider: String,
    pub specification: SpecificationVersion,
    /// Namespace to key/value metadata.
    pub metadata: BTreeMap<String, BTreeMap<String, String>>,
    pub plugins: Vec<PluginRef>,
    /// Interaction handle ids paired with their records, in creation order.
    pub interactions: Vec<(u64, InteractionRecord)>,
}

impl ContractRecord {
    pub fn new(consumer: &str, provider: &str) -> Self {
        Self {
            consumer: consumer.to_string(),
            provider: provider.to_string(),
            specification: SpecificationVersion::Unspecified,
            metadata: BTreeMap::new(),
            plugins: Vec::new(),
            interactions: Vec::new(),
        }
    }

    pub fn interaction_mut(&mut self, id: u64) -> Option<&mut InteractionRecord> {
        self.interactions
            .iter_mut()
            .find(|(handle, _)| *handle == id)
            .map(|(_, record)| record)
    }
}
