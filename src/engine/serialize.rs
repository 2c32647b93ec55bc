//! Contract file write-out.
//!
//! One file per contract, named `<consumer>-<provider>.json` inside the
//! target directory. Writing is either a destructive replace or a
//! structural merge with an existing file of the same identity:
//! interactions are keyed by description (incoming wins), metadata
//! namespaces are unioned.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Map, Value};

use crate::contract::SpecificationVersion;
use crate::errors::{EngineError, Result};
use crate::interaction::InteractionKind;

use super::model::{Body, BodyData, ContractRecord, InteractionRecord, PartRecord};

/// Serialize the contract and write it under `directory`. Returns the path
/// written. With `overwrite` false, an existing file for the same
/// consumer/provider pair is merged rather than replaced.
pub fn write_file(record: &ContractRecord, directory: &Path, overwrite: bool) -> Result<PathBuf> {
    let path = contract_path(record, directory);
    let mut document = contract_json(record);

    if !overwrite {
        if let Some(existing) = read_existing(&path, record) {
            document = merge_documents(existing, document);
        }
    }

    let pretty = serde_json::to_string_pretty(&document).map_err(EngineError::Serialize)?;
    fs::write(&path, pretty).map_err(EngineError::Io)?;
    tracing::info!(path = %path.display(), "wrote contract file");
    Ok(path)
}

/// Deterministic file path for a contract inside `directory`.
pub fn contract_path(record: &ContractRecord, directory: &Path) -> PathBuf {
    directory.join(format!("{}-{}.json", record.consumer, record.provider))
}

fn read_existing(path: &Path, record: &ContractRecord) -> Option<Value> {
    let raw = fs::read_to_string(path).ok()?;
    let existing: Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "existing contract file is not valid JSON; replacing");
            return None;
        }
    };

    let same_identity = existing["consumer"]["name"] == record.consumer.as_str()
        && existing["provider"]["name"] == record.provider.as_str();
    if !same_identity {
        tracing::warn!(
            path = %path.display(),
            "existing contract file belongs to a different consumer/provider pair; replacing"
        );
        return None;
    }
    Some(existing)
}

/// Merge an incoming contract document over an existing one. Interactions
/// are matched by description; the incoming version of a matched
/// interaction wins, unmatched existing interactions are kept, and new
/// interactions are appended in order.
fn merge_documents(existing: Value, incoming: Value) -> Value {
    let mut merged = incoming.clone();

    let existing_interactions = existing["interactions"].as_array().cloned().unwrap_or_default();
    let incoming_interactions = incoming["interactions"].as_array().cloned().unwrap_or_default();

    let mut interactions: Vec<Value> = Vec::new();
    for old in &existing_interactions {
        let replacement = incoming_interactions
            .iter()
            .find(|new| new["description"] == old["description"]);
        interactions.push(replacement.unwrap_or(old).clone());
    }
    for new in &incoming_interactions {
        let already_present = existing_interactions
            .iter()
            .any(|old| old["description"] == new["description"]);
        if !already_present {
            interactions.push(new.clone());
        }
    }
    merged["interactions"] = Value::Array(interactions);

    if let (Some(old_meta), Some(new_meta)) = (
        existing["metadata"].as_object(),
        merged["metadata"].as_object().cloned().as_ref(),
    ) {
        let mut metadata = old_meta.clone();
        for (k, v) in new_meta {
            metadata.insert(k.clone(), v.clone());
        }
        merged["metadata"] = Value::Object(metadata);
    }

    merged
}

fn contract_json(record: &ContractRecord) -> Value {
    let interactions: Vec<Value> = record
        .interactions
        .iter()
        .map(|(_, interaction)| interaction_json(interaction))
        .collect();

    let mut metadata = Map::new();
    let version = match record.specification {
        SpecificationVersion::Unspecified => SpecificationVersion::V3,
        chosen => chosen,
    };
    metadata.insert(
        "pactSpecification".to_string(),
        json!({ "version": version.as_str() }),
    );
    if !record.plugins.is_empty() {
        let plugins: Vec<Value> = record
            .plugins
            .iter()
            .map(|p| match &p.version {
                Some(version) => json!({ "name": p.name, "version": version }),
                None => json!({ "name": p.name }),
            })
            .collect();
        metadata.insert("plugins".to_string(), Value::Array(plugins));
    }
    for (namespace, entries) in &record.metadata {
        metadata.insert(namespace.clone(), json!(entries));
    }

    json!({
        "consumer": { "name": record.consumer },
        "provider": { "name": record.provider },
        "interactions": interactions,
        "metadata": metadata,
    })
}

fn interaction_json(interaction: &InteractionRecord) -> Value {
    let mut doc = Map::new();
    doc.insert("description".to_string(), json!(interaction.description));
    let kind = match interaction.kind {
        InteractionKind::Http => "Synchronous/HTTP",
        InteractionKind::Async => "Asynchronous/Messages",
        InteractionKind::Sync => "Synchronous/Messages",
    };
    doc.insert("type".to_string(), json!(kind));

    if let Some(test_name) = &interaction.test_name {
        doc.insert("testName".to_string(), json!(test_name));
    }

    if !interaction.provider_states.is_empty() {
        let states: Vec<Value> = interaction
            .provider_states
            .iter()
            .map(|s| {
                if s.params.is_empty() {
                    json!({ "name": s.name })
                } else {
                    json!({ "name": s.name, "params": s.params })
                }
            })
            .collect();
        doc.insert("providerStates".to_string(), Value::Array(states));
    }

    match interaction.kind {
        InteractionKind::Http => {
            let mut request = Map::new();
            request.insert("method".to_string(), json!(interaction.method));
            request.insert("path".to_string(), json!(interaction.path));
            if !interaction.query.is_empty() {
                request.insert("query".to_string(), json!(interaction.query));
            }
            extend_part(&mut request, &interaction.request);
            doc.insert("request".to_string(), Value::Object(request));

            let mut response = Map::new();
            response.insert("status".to_string(), json!(interaction.status));
            extend_part(&mut response, &interaction.response);
            doc.insert("response".to_string(), Value::Object(response));
        }
        InteractionKind::Async => {
            if let Some(body) = &interaction.request.body {
                doc.insert("contents".to_string(), body_json(body));
            }
            if !interaction.request.headers.is_empty() {
                doc.insert("metadata".to_string(), json!(interaction.request.headers));
            }
        }
        InteractionKind::Sync => {
            let mut request = Map::new();
            extend_part(&mut request, &interaction.request);
            doc.insert("request".to_string(), Value::Object(request));

            let mut response = Map::new();
            extend_part(&mut response, &interaction.response);
            doc.insert("response".to_string(), Value::Array(vec![Value::Object(response)]));
        }
    }

    Value::Object(doc)
}

fn extend_part(target: &mut Map<String, Value>, part: &PartRecord) {
    if !part.headers.is_empty() {
        target.insert("headers".to_string(), json!(part.headers));
    }
    if let Some(body) = &part.body {
        target.insert("body".to_string(), body_json(body));
    }
}

fn body_json(body: &Body) -> Value {
    match &body.data {
        BodyData::Text(text) => {
            if body.content_type.contains("json") {
                if let Ok(parsed) = serde_json::from_str::<Value>(text) {
                    return json!({
                        "contentType": body.content_type,
                        "content": parsed,
                    });
                }
            }
            json!({
                "contentType": body.content_type,
                "content": text,
            })
        }
        BodyData::Plugin(contents) => {
            let content: Value = serde_json::from_str(contents)
                .unwrap_or_else(|_| Value::String(contents.clone()));
            json!({
                "contentType": body.content_type,
                "content": content,
            })
        }
        BodyData::Binary(_) | BodyData::Multipart { .. } => json!({
            "contentType": body.content_type,
            "encoded": "base64",
            "content": BASE64.encode(body.bytes()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::{MultipartPart, ProviderState};

    fn record_with_interaction() -> ContractRecord {
        let mut record = ContractRecord::new("consumer", "provider");
        let mut interaction = InteractionRecord::new(InteractionKind::Http, "a request");
        interaction.method = "GET".into();
        interaction.path = "/users/1".into();
        interaction.provider_states.push(ProviderState {
            name: "user exists".into(),
            params: Map::new(),
        });
        record.interactions.push((1, interaction));
        record
    }

    #[test]
    fn test_contract_path_is_deterministic() {
        let record = ContractRecord::new("web-app", "user-service");
        let path = contract_path(&record, Path::new("/tmp/pacts"));
        assert_eq!(path, PathBuf::from("/tmp/pacts/web-app-user-service.json"));
    }

    #[test]
    fn test_contract_json_shape() {
        let doc = contract_json(&record_with_interaction());
        assert_eq!(doc["consumer"]["name"], "consumer");
        assert_eq!(doc["provider"]["name"], "provider");
        assert_eq!(doc["interactions"][0]["description"], "a request");
        assert_eq!(doc["interactions"][0]["type"], "Synchronous/HTTP");
        assert_eq!(doc["interactions"][0]["providerStates"][0]["name"], "user exists");
        assert_eq!(doc["interactions"][0]["request"]["method"], "GET");
        assert_eq!(doc["interactions"][0]["response"]["status"], 200);
        // Unspecified version defaults to v3 in the file metadata.
        assert_eq!(doc["metadata"]["pactSpecification"]["version"], "3.0.0");
    }

    #[test]
    fn test_json_body_is_embedded_structurally() {
        let body = Body {
            content_type: "application/json".into(),
            data: BodyData::Text(r#"{"id": 1}"#.into()),
        };
        let doc = body_json(&body);
        assert_eq!(doc["content"]["id"], 1);
    }

    #[test]
    fn test_multipart_body_is_base64_encoded_with_disposition() {
        let body = Body {
            content_type: "multipart/form-data; boundary=b".into(),
            data: BodyData::Multipart {
                boundary: "b".into(),
                parts: vec![MultipartPart {
                    name: "file".into(),
                    content_type: "text/plain".into(),
                    filename: Some("a.txt".into()),
                    data: b"hello".to_vec(),
                }],
            },
        };
        let doc = body_json(&body);
        assert_eq!(doc["contentType"], "multipart/form-data; boundary=b");
        assert_eq!(doc["encoded"], "base64");

        let decoded = BASE64.decode(doc["content"].as_str().unwrap()).unwrap();
        let rendered = String::from_utf8_lossy(&decoded).into_owned();
        assert!(rendered.contains("name=\"file\"; filename=\"a.txt\""));
        assert!(rendered.contains("hello"));
        assert!(rendered.ends_with("--b--\r\n"));
    }

    #[test]
    fn test_binary_body_is_base64_encoded() {
        let body = Body {
            content_type: "application/octet-stream".into(),
            data: BodyData::Binary(vec![0xde, 0xad, 0xbe, 0xef]),
        };
        let doc = body_json(&body);
        assert_eq!(doc["encoded"], "base64");
        assert_eq!(doc["content"], BASE64.encode([0xde, 0xad, 0xbe, 0xef]));
    }

    #[test]
    fn test_merge_keeps_existing_and_appends_new() {
        let existing = json!({
            "consumer": {"name": "c"},
            "provider": {"name": "p"},
            "interactions": [
                {"description": "kept", "request": {"method": "GET"}},
                {"description": "replaced", "request": {"method": "GET"}},
            ],
            "metadata": {"old": {"k": "v"}},
        });
        let incoming = json!({
            "consumer": {"name": "c"},
            "provider": {"name": "p"},
            "interactions": [
                {"description": "replaced", "request": {"method": "POST"}},
                {"description": "added", "request": {"method": "PUT"}},
            ],
            "metadata": {"new": {"k2": "v2"}},
        });

        let merged = merge_documents(existing, incoming);
        let interactions = merged["interactions"].as_array().unwrap();
        let descriptions: Vec<_> = interactions.iter().map(|i| i["description"].as_str().unwrap()).collect();
        assert_eq!(descriptions, vec!["kept", "replaced", "added"]);
        assert_eq!(interactions[1]["request"]["method"], "POST");
        assert_eq!(merged["metadata"]["old"]["k"], "v");
        assert_eq!(merged["metadata"]["new"]["k2"], "v2");
    }

    #[test]
    fn test_write_file_merge_with_existing_on_disk() {
        let dir = tempfile::tempdir().unwrap();

        let mut first = ContractRecord::new("c", "p");
        first
            .interactions
            .push((1, InteractionRecord::new(InteractionKind::Http, "first")));
        write_file(&first, dir.path(), true).unwrap();

        let mut second = ContractRecord::new("c", "p");
        second
            .interactions
            .push((2, InteractionRecord::new(InteractionKind::Http, "second")));
        let path = write_file(&second, dir.path(), false).unwrap();

        let merged: Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        let descriptions: Vec<_> = merged["interactions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["description"].as_str().unwrap())
            .collect();
        assert_eq!(descriptions, vec!["first", "second"]);
    }

    #[test]
    fn test_write_file_overwrite_replaces() {
        let dir = tempfile::tempdir().unwrap();

        let mut first = ContractRecord::new("c", "p");
        first
            .interactions
            .push((1, InteractionRecord::new(InteractionKind::Http, "first")));
        write_file(&first, dir.path(), true).unwrap();

        let mut second = ContractRecord::new("c", "p");
        second
            .interactions
            .push((2, InteractionRecord::new(InteractionKind::Http, "second")));
        let path = write_file(&second, dir.path(), true).unwrap();

        let written: Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["interactions"].as_array().unwrap().len(), 1);
        assert_eq!(written["interactions"][0]["description"], "second");
    }

    #[test]
    fn test_write_file_missing_directory_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let record = ContractRecord::new("c", "p");
        let err = write_file(&record, &missing, true).unwrap_err();
        assert!(matches!(
            err,
            crate::errors::CovenantError::Engine(EngineError::Io(_))
        ));
    }
}
