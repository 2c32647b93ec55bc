//! The contract engine.
//!
//! This is the handle-based service the builder layer delegates to. The
//! builders own no interaction data themselves; they compute which handle,
//! part, and index each call targets, and the engine records it. Handles are
//! opaque identifiers issued by a process-global registry, in the style of
//! an FFI boundary: the caller only ever passes them back.
//!
//! All operations are synchronous and may fail with an engine error that is
//! surfaced to the caller unchanged.

pub mod listener;
pub mod model;
pub mod serialize;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::Value;

use crate::contract::SpecificationVersion;
use crate::errors::{EngineError, Result};
use crate::interaction::{InteractionKind, Part};

use listener::RunningListener;
use model::{Body, BodyData, ContractRecord, InteractionRecord, MultipartPart, PluginRef};

/// Opaque handle to a contract owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContractHandle(u64);

/// Opaque handle to an interaction owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InteractionHandle(u64);

/// Opaque handle to a running mock server owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerHandle(u64);

static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_handle() -> u64 {
    HANDLE_COUNTER.fetch_add(1, Ordering::SeqCst)
}

struct ServerEntry {
    contract: u64,
    listener: RunningListener,
}

#[derive(Default)]
struct EngineState {
    contracts: HashMap<u64, ContractRecord>,
    /// Interaction handle id to owning contract id.
    interaction_owner: HashMap<u64, u64>,
    servers: HashMap<u64, ServerEntry>,
}

/// Process-global registry of engine state. Records live for the life of
/// the process: dropping a [`crate::Contract`] does not reclaim its entry,
/// so handles a caller still holds keep resolving. Only mock server entries
/// are removed, on shutdown.
static REGISTRY: Lazy<Mutex<EngineState>> = Lazy::new(|| Mutex::new(EngineState::default()));

fn with_contract<R>(
    handle: ContractHandle,
    f: impl FnOnce(&mut ContractRecord) -> R,
) -> Result<R> {
    let mut state = REGISTRY.lock();
    let record = state
        .contracts
        .get_mut(&handle.0)
        .ok_or(EngineError::UnknownContract(handle.0))?;
    Ok(f(record))
}

fn with_interaction<R>(
    handle: InteractionHandle,
    f: impl FnOnce(&mut InteractionRecord) -> R,
) -> Result<R> {
    let mut state = REGISTRY.lock();
    let owner = *state
        .interaction_owner
        .get(&handle.0)
        .ok_or(EngineError::UnknownInteraction(handle.0))?;
    let record = state
        .contracts
        .get_mut(&owner)
        .and_then(|c| c.interaction_mut(handle.0))
        .ok_or(EngineError::UnknownInteraction(handle.0))?;
    Ok(f(record))
}

/// Register a new contract for a consumer/provider pair.
pub fn new_contract(consumer: &str, provider: &str) -> ContractHandle {
    let id = next_handle();
    REGISTRY
        .lock()
        .contracts
        .insert(id, ContractRecord::new(consumer, provider));
    tracing::debug!(consumer, provider, handle = id, "registered contract");
    ContractHandle(id)
}

/// Register a new interaction against a contract. A previous interaction
/// with the same description is replaced: descriptions are unique within a
/// contract, and the engine is where that invariant is enforced.
pub fn new_interaction(
    contract: ContractHandle,
    kind: InteractionKind,
    description: &str,
) -> Result<InteractionHandle> {
    let id = next_handle();
    let mut state = REGISTRY.lock();
    let record = state
        .contracts
        .get_mut(&contract.0)
        .ok_or(EngineError::UnknownContract(contract.0))?;

    let stale = record
        .interactions
        .iter()
        .position(|(_, i)| i.description == description)
        .map(|pos| record.interactions.remove(pos).0);
    record
        .interactions
        .push((id, InteractionRecord::new(kind, description)));

    if let Some(stale) = stale {
        state.interaction_owner.remove(&stale);
    }
    state.interaction_owner.insert(id, contract.0);
    Ok(InteractionHandle(id))
}

/// Set the specification version for a contract.
pub fn with_specification(
    contract: ContractHandle,
    version: SpecificationVersion,
) -> Result<()> {
    with_contract(contract, |record| record.specification = version)
}

/// Register a capability plugin against a contract.
pub fn using_plugin(contract: ContractHandle, name: &str, version: Option<&str>) -> Result<()> {
    with_contract(contract, |record| {
        record.plugins.push(PluginRef {
            name: name.to_string(),
            version: version.map(str::to_string),
        });
    })
}

/// Write one namespaced metadata entry. Same namespace and key overwrites.
pub fn with_contract_metadata(
    contract: ContractHandle,
    namespace: &str,
    key: &str,
    value: &str,
) -> Result<()> {
    with_contract(contract, |record| {
        record
            .metadata
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    })
}

/// Add a provider state without parameters.
pub fn given(interaction: InteractionHandle, state: &str) -> Result<()> {
    with_interaction(interaction, |record| {
        record.state_mut(state);
    })
}

/// Add a provider state with a single scalar parameter.
pub fn given_with_param(
    interaction: InteractionHandle,
    state: &str,
    name: &str,
    value: &str,
) -> Result<()> {
    with_interaction(interaction, |record| {
        record
            .state_mut(state)
            .params
            .insert(name.to_string(), Value::String(value.to_string()));
    })
}

/// Add a provider state with parameters given as a JSON string.
///
/// A string that does not parse as a JSON object is not rejected: it is
/// recorded as one literal parameter under the key `"value"`.
pub fn given_with_params(
    interaction: InteractionHandle,
    state: &str,
    parameters: &str,
) -> Result<()> {
    with_interaction(interaction, |record| {
        let params = &mut record.state_mut(state).params;
        match serde_json::from_str::<Value>(parameters) {
            Ok(Value::Object(map)) => {
                for (k, v) in map {
                    params.insert(k, v);
                }
            }
            _ => {
                params.insert(
                    "value".to_string(),
                    Value::String(parameters.to_string()),
                );
            }
        }
    })
}

/// Set the request method and path.
pub fn with_request(interaction: InteractionHandle, method: &str, path: &str) -> Result<()> {
    with_interaction(interaction, |record| {
        record.method = method.to_string();
        record.path = path.to_string();
    })
}

/// Attach a header value at an occurrence index. Returns the resulting
/// occurrence count, so the caller's next index lands past everything
/// recorded so far.
///
/// At index 0, a value that parses as a JSON object with a `"value"` key is
/// interpreted as matcher JSON and its value list replaces the header's
/// values. Use [`set_header`] to store such strings literally.
pub fn with_header_value(
    interaction: InteractionHandle,
    part: Part,
    name: &str,
    index: usize,
    value: &str,
) -> Result<usize> {
    with_interaction(interaction, |record| {
        let name_lower = name.to_ascii_lowercase();
        let target = record.part_mut(part);
        if index == 0 {
            if let Some(values) = matcher_values(value) {
                let count = values.len();
                target.headers.insert(name_lower, values);
                return count;
            }
        }
        target.put_header_value(name_lower, index, value.to_string())
    })
}

/// Replace all values of a header with a single literal value.
pub fn set_header(
    interaction: InteractionHandle,
    part: Part,
    name: &str,
    value: &str,
) -> Result<()> {
    with_interaction(interaction, |record| {
        record
            .part_mut(part)
            .headers
            .insert(name.to_ascii_lowercase(), vec![value.to_string()]);
    })
}

/// Attach a query parameter value at an occurrence index. Matcher JSON is
/// interpreted as for [`with_header_value`], and the resulting occurrence
/// count is returned the same way.
pub fn with_query_parameter_value(
    interaction: InteractionHandle,
    name: &str,
    index: usize,
    value: &str,
) -> Result<usize> {
    with_interaction(interaction, |record| {
        if index == 0 {
            if let Some(values) = matcher_values(value) {
                let count = values.len();
                record.query.insert(name.to_string(), values);
                return count;
            }
        }
        let values = record.query.entry(name.to_string()).or_default();
        if index < values.len() {
            values[index] = value.to_string();
        } else {
            while values.len() < index {
                values.push(String::new());
            }
            values.push(value.to_string());
        }
        values.len()
    })
}

/// Set the response status.
pub fn response_status(interaction: InteractionHandle, status: u16) -> Result<()> {
    with_interaction(interaction, |record| record.status = status)
}

/// Set a text body on a part. `None` means an empty payload. The passed
/// content type yields to an explicit `Content-Type` header on the part.
pub fn with_body(
    interaction: InteractionHandle,
    part: Part,
    content_type: &str,
    body: Option<&str>,
) -> Result<()> {
    with_interaction(interaction, |record| {
        let target = record.part_mut(part);
        let content_type = target.effective_content_type(content_type);
        target.body = Some(Body {
            content_type,
            data: BodyData::Text(body.unwrap_or_default().to_string()),
        });
    })
}

/// Set a binary body on a part, replacing any previous body.
pub fn with_binary_file(
    interaction: InteractionHandle,
    part: Part,
    content_type: &str,
    body: Option<&[u8]>,
) -> Result<()> {
    with_interaction(interaction, |record| {
        let target = record.part_mut(part);
        let content_type = target.effective_content_type(content_type);
        target.body = Some(Body {
            content_type,
            data: BodyData::Binary(body.unwrap_or_default().to_vec()),
        });
    })
}

/// Append a file to a multipart body on a part. The part's body becomes a
/// MIME multipart message; repeated calls append further file parts and the
/// first boundary wins.
pub fn with_multipart_file(
    interaction: InteractionHandle,
    part: Part,
    part_name: &str,
    path: Option<&Path>,
    content_type: &str,
    boundary: Option<&str>,
) -> Result<()> {
    let (data, filename) = match path {
        Some(path) => {
            let data = std::fs::read(path).map_err(EngineError::Io)?;
            let filename = path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned());
            (data, filename)
        }
        None => (Vec::new(), None),
    };

    with_interaction(interaction, |record| {
        let target = record.part_mut(part);
        let file_part = MultipartPart {
            name: part_name.to_string(),
            content_type: content_type.to_string(),
            filename,
            data,
        };

        match &mut target.body {
            Some(Body {
                data: BodyData::Multipart { parts, .. },
                ..
            }) => {
                parts.push(file_part);
            }
            _ => {
                let boundary = boundary
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("covenant-{:016x}", next_handle()));
                target.body = Some(Body {
                    content_type: format!("multipart/form-data; boundary={boundary}"),
                    data: BodyData::Multipart {
                        boundary,
                        parts: vec![file_part],
                    },
                });
            }
        }
    })
}

/// Attach the free-form test name annotation.
pub fn interaction_test_name(interaction: InteractionHandle, name: &str) -> Result<()> {
    with_interaction(interaction, |record| {
        record.test_name = Some(name.to_string());
    })
}

/// Set a part's contents through a capability plugin. The contents are an
/// opaque JSON payload; the plugin defines its format.
pub fn interaction_contents(
    interaction: InteractionHandle,
    part: Part,
    content_type: &str,
    contents: &str,
) -> Result<()> {
    with_interaction(interaction, |record| {
        record.part_mut(part).body = Some(Body {
            content_type: content_type.to_string(),
            data: BodyData::Plugin(contents.to_string()),
        });
    })
}

/// Start a mock server for a contract. Returns the server handle and the
/// resolved port. Only the `http` transport is served.
pub fn start_mock_server(
    contract: ContractHandle,
    host: &str,
    port: u16,
    transport: &str,
    transport_config: Option<&str>,
) -> Result<(ServerHandle, u16)> {
    if !transport.eq_ignore_ascii_case("http") {
        return Err(EngineError::UnsupportedTransport(transport.to_string()).into());
    }
    if let Some(config) = transport_config {
        tracing::debug!(config, "transport configuration supplied");
    }

    // Snapshot the interactions at start; the server serves what was
    // registered up to this point.
    let interactions =
        with_contract(contract, |record| {
            record
                .interactions
                .iter()
                .map(|(_, i)| i.clone())
                .collect::<Vec<_>>()
        })?;

    let running = RunningListener::spawn(host, port, interactions)?;
    let resolved_port = running.port;

    let id = next_handle();
    REGISTRY.lock().servers.insert(
        id,
        ServerEntry {
            contract: contract.0,
            listener: running,
        },
    );

    Ok((ServerHandle(id), resolved_port))
}

/// Shut a mock server down. Idempotent: shutting down a handle that is no
/// longer registered is a no-op.
pub fn shutdown_mock_server(server: ServerHandle) {
    let entry = REGISTRY.lock().servers.remove(&server.0);
    if let Some(entry) = entry {
        entry.listener.shutdown();
        tracing::debug!(handle = server.0, "mock server shut down");
    }
}

/// Serialize a contract to a file under `directory`.
pub fn write_contract_file(
    contract: ContractHandle,
    directory: &Path,
    overwrite: bool,
) -> Result<PathBuf> {
    let record = with_contract(contract, |record| record.clone())?;
    serialize::write_file(&record, directory, overwrite)
}

/// Serialize the contract behind a running mock server to a file.
pub fn write_server_file(
    server: ServerHandle,
    directory: &Path,
    overwrite: bool,
) -> Result<PathBuf> {
    let contract = {
        let state = REGISTRY.lock();
        let entry = state
            .servers
            .get(&server.0)
            .ok_or(EngineError::UnknownServer(server.0))?;
        ContractHandle(entry.contract)
    };
    write_contract_file(contract, directory, overwrite)
}

/// Snapshot of an interaction's record, for inspection.
pub fn interaction_record(interaction: InteractionHandle) -> Result<InteractionRecord> {
    with_interaction(interaction, |record| record.clone())
}

/// Snapshot of a contract's record, for inspection.
pub fn contract_record(contract: ContractHandle) -> Result<ContractRecord> {
    with_contract(contract, |record| record.clone())
}

/// Interpret matcher JSON: an object with a `"value"` key yields its value
/// list. Anything else is not matcher JSON.
fn matcher_values(raw: &str) -> Option<Vec<String>> {
    let parsed: Value = serde_json::from_str(raw).ok()?;
    let object = parsed.as_object()?;
    let value = object.get("value")?;
    match value {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
        ),
        other => Some(vec![other.to_string()]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_handles_error() {
        let err = given(InteractionHandle(u64::MAX), "state").unwrap_err();
        assert!(matches!(
            err,
            crate::errors::CovenantError::Engine(EngineError::UnknownInteraction(_))
        ));

        let err = with_specification(ContractHandle(u64::MAX), SpecificationVersion::V3)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::errors::CovenantError::Engine(EngineError::UnknownContract(_))
        ));
    }

    #[test]
    fn test_new_interaction_replaces_same_description() {
        let contract = new_contract("engine-tests", "provider");
        let first = new_interaction(contract, InteractionKind::Http, "dup").unwrap();
        let second = new_interaction(contract, InteractionKind::Http, "dup").unwrap();

        // The contract holds one interaction, owned by the new handle.
        let record = contract_record(contract).unwrap();
        assert_eq!(record.interactions.len(), 1);
        assert!(interaction_record(second).is_ok());

        // The stale handle no longer resolves.
        let err = interaction_record(first).unwrap_err();
        assert!(matches!(
            err,
            crate::errors::CovenantError::Engine(EngineError::UnknownInteraction(_))
        ));
    }

    #[test]
    fn test_metadata_same_key_overwrites() {
        let contract = new_contract("engine-meta", "provider");
        with_contract_metadata(contract, "client", "version", "1.0").unwrap();
        with_contract_metadata(contract, "client", "version", "2.0").unwrap();
        with_contract_metadata(contract, "client", "name", "covenant").unwrap();

        let record = contract_record(contract).unwrap();
        assert_eq!(record.metadata["client"]["version"], "2.0");
        assert_eq!(record.metadata["client"]["name"], "covenant");
    }

    #[test]
    fn test_matcher_values_shapes() {
        assert_eq!(
            matcher_values(r#"{"value": "single"}"#),
            Some(vec!["single".to_string()])
        );
        assert_eq!(
            matcher_values(r#"{"value": ["a", "b"]}"#),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(matcher_values("plain text"), None);
        assert_eq!(matcher_values(r#"{"regex": ".*"}"#), None);
        assert_eq!(matcher_values(r#"["a"]"#), None);
    }

    #[test]
    fn test_unsupported_transport_rejected() {
        let contract = new_contract("transport-tests", "provider");
        let err = start_mock_server(contract, "localhost", 0, "grpc", None).unwrap_err();
        assert!(matches!(
            err,
            crate::errors::CovenantError::Engine(EngineError::UnsupportedTransport(_))
        ));
    }

    #[test]
    fn test_shutdown_is_idempotent_for_unknown_handles() {
        shutdown_mock_server(ServerHandle(u64::MAX));
    }

    #[test]
    fn test_given_with_params_object_merges_and_non_object_is_literal() {
        let contract = new_contract("params-tests", "provider");
        let interaction = new_interaction(contract, InteractionKind::Http, "params").unwrap();

        given_with_params(interaction, "s", r#"{"a": "1"}"#).unwrap();
        given_with_params(interaction, "s", r#"{"a": "2", "b": "3"}"#).unwrap();
        // Valid JSON but not an object: recorded literally under "value".
        given_with_params(interaction, "s", "42").unwrap();

        let record = interaction_record(interaction).unwrap();
        let params = &record.provider_states[0].params;
        assert_eq!(params["a"], "2");
        assert_eq!(params["b"], "3");
        assert_eq!(params["value"], "42");
    }
}
