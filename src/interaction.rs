//! Interaction builders.
//!
//! An interaction describes one discrete exchange a consumer expects from a
//! provider. Three variants exist:
//!
//! - [`HttpInteraction`]: an HTTP request/response pair
//! - [`AsyncMessageInteraction`]: a one-way asynchronous message
//! - [`SyncMessageInteraction`]: a synchronous request/response message
//!
//! All three share the mutators on the [`Interaction`] trait. Every mutator
//! consumes and returns the builder, so an interaction is normally built in
//! a single `?`-chained expression:
//!
//! ```no_run
//! use covenant::{Contract, Interaction};
//!
//! # fn main() -> covenant::Result<()> {
//! let contract = Contract::new("consumer", "provider")?;
//! contract
//!     .upon_receiving("a request for a user")?
//!     .given("user exists")?
//!     .with_request("GET", "/users/1")?
//!     .will_respond_with(200)?
//!     .with_header("Content-Type", "application/json", None)?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::engine::{self, ContractHandle, InteractionHandle};
use crate::errors::{ContractError, CovenantError, InteractionError, Result};

/// The request or response half of a two-part interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Part {
    Request,
    Response,
}

/// The shape of an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    /// HTTP request/response.
    Http,
    /// Asynchronous (one-way) message.
    Async,
    /// Synchronous (request/response) message.
    Sync,
}

impl FromStr for InteractionKind {
    type Err = CovenantError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(InteractionKind::Http),
            "async" => Ok(InteractionKind::Async),
            "sync" => Ok(InteractionKind::Sync),
            _ => Err(ContractError::InvalidInteractionKind(s.to_string()).into()),
        }
    }
}

/// Provider-state parameters: either a flat string-keyed JSON object, or a
/// raw JSON string.
///
/// A raw string that does not parse as a JSON object is not rejected; it is
/// recorded as a single literal parameter under the key `"value"`.
#[derive(Debug, Clone)]
pub enum StateParameters {
    Map(Map<String, Value>),
    Json(String),
}

impl StateParameters {
    pub(crate) fn into_json(self) -> String {
        match self {
            StateParameters::Map(map) => Value::Object(map).to_string(),
            StateParameters::Json(raw) => raw,
        }
    }
}

impl From<Map<String, Value>> for StateParameters {
    fn from(map: Map<String, Value>) -> Self {
        StateParameters::Map(map)
    }
}

impl From<&str> for StateParameters {
    fn from(raw: &str) -> Self {
        StateParameters::Json(raw.to_string())
    }
}

impl From<String> for StateParameters {
    fn from(raw: String) -> Self {
        StateParameters::Json(raw)
    }
}

/// Contents handed to a capability plugin: a JSON object or a raw string,
/// forwarded to the plugin as JSON.
#[derive(Debug, Clone)]
pub enum PluginContents {
    Map(Map<String, Value>),
    Json(String),
}

impl PluginContents {
    pub(crate) fn into_json(self) -> String {
        match self {
            PluginContents::Map(map) => Value::Object(map).to_string(),
            PluginContents::Json(raw) => raw,
        }
    }
}

impl From<Map<String, Value>> for PluginContents {
    fn from(map: Map<String, Value>) -> Self {
        PluginContents::Map(map)
    }
}

impl From<&str> for PluginContents {
    fn from(raw: &str) -> Self {
        PluginContents::Json(raw.to_string())
    }
}

impl From<String> for PluginContents {
    fn from(raw: String) -> Self {
        PluginContents::Json(raw)
    }
}

/// Mutators shared by all interaction variants.
///
/// Mutators that accept an `Option<Part>` use the interaction's current
/// part when given `None`. For [`HttpInteraction`] the current part starts
/// as [`Part::Request`] and flips to [`Part::Response`] when
/// [`HttpInteraction::will_respond_with`] is called; message interactions
/// stay on the request part.
pub trait Interaction: Sized {
    /// Engine handle for this interaction.
    fn handle(&self) -> InteractionHandle;

    /// Description of the interaction, unique within its contract.
    fn description(&self) -> &str;

    /// The part that mutators target when no explicit part is given.
    fn current_part(&self) -> Part;

    fn resolved_part(&self, part: Option<Part>) -> Part {
        part.unwrap_or_else(|| self.current_part())
    }

    /// Set a provider state for this interaction.
    ///
    /// Repeated calls add further states; repeated calls with the same
    /// `state` merge their parameters into one entry.
    fn given(self, state: &str) -> Result<Self> {
        engine::given(self.handle(), state)?;
        Ok(self)
    }

    /// Set a provider state with a single named parameter.
    fn given_param(self, state: &str, name: &str, value: &str) -> Result<Self> {
        engine::given_with_param(self.handle(), state, name, value)?;
        Ok(self)
    }

    /// Set a provider state with a set of parameters.
    fn given_parameters(
        self,
        state: &str,
        parameters: impl Into<StateParameters>,
    ) -> Result<Self> {
        engine::given_with_params(self.handle(), state, &parameters.into().into_json())?;
        Ok(self)
    }

    /// Set a provider state from optional arguments.
    ///
    /// Exactly three combinations are valid: all `None`, `(name, value)`
    /// both set, or `parameters` alone. Anything else is rejected with
    /// [`InteractionError::InvalidGivenCombination`].
    fn given_with(
        self,
        state: &str,
        name: Option<&str>,
        value: Option<&str>,
        parameters: Option<StateParameters>,
    ) -> Result<Self> {
        match (name, value, parameters) {
            (Some(name), Some(value), None) => self.given_param(state, name, value),
            (None, None, Some(parameters)) => self.given_parameters(state, parameters),
            (None, None, None) => self.given(state),
            _ => Err(InteractionError::InvalidGivenCombination.into()),
        }
    }

    /// Set the body of the resolved part. A `None` body means an empty
    /// payload. The content type is ignored if a `Content-Type` header has
    /// already been set for that part.
    fn with_body(
        self,
        body: Option<&str>,
        content_type: &str,
        part: Option<Part>,
    ) -> Result<Self> {
        engine::with_body(self.handle(), self.resolved_part(part), content_type, body)?;
        Ok(self)
    }

    /// Set a binary body for the resolved part. For HTTP interactions this
    /// replaces any body previously set with [`Interaction::with_body`].
    fn with_binary_file(
        self,
        body: Option<&[u8]>,
        content_type: &str,
        part: Option<Part>,
    ) -> Result<Self> {
        engine::with_binary_file(self.handle(), self.resolved_part(part), content_type, body)?;
        Ok(self)
    }

    /// Add a file as one part of a multipart body on the resolved part. The
    /// part's content type becomes a MIME multipart message; repeated calls
    /// append further parts to the same multipart body.
    fn with_multipart_file(
        self,
        part_name: &str,
        path: Option<&Path>,
        content_type: &str,
        part: Option<Part>,
        boundary: Option<&str>,
    ) -> Result<Self> {
        engine::with_multipart_file(
            self.handle(),
            self.resolved_part(part),
            part_name,
            path,
            content_type,
            boundary,
        )?;
        Ok(self)
    }

    /// Attach a free-form test name annotation to the interaction.
    fn test_name(self, name: &str) -> Result<Self> {
        engine::interaction_test_name(self.handle(), name)?;
        Ok(self)
    }

    /// Set the contents of the resolved part through a capability plugin.
    /// The contents are forwarded to the plugin as a JSON string.
    fn with_plugin_contents(
        self,
        contents: impl Into<PluginContents>,
        content_type: &str,
        part: Option<Part>,
    ) -> Result<Self> {
        engine::interaction_contents(
            self.handle(),
            self.resolved_part(part),
            content_type,
            &contents.into().into_json(),
        )?;
        Ok(self)
    }
}

/// An HTTP request/response interaction.
///
/// Created through [`Contract::upon_receiving`](crate::Contract::upon_receiving).
#[derive(Debug)]
pub struct HttpInteraction {
    handle: InteractionHandle,
    description: String,
    part: Part,
    /// Occupied occurrence count per (part, lowercased header name); the
    /// next declaration writes at this slot. The engine reports the count
    /// back after each write, so matcher-JSON expansion that records
    /// several values at once advances the slot past all of them.
    header_indices: HashMap<(Part, String), usize>,
    /// Occupied occurrence count per query parameter name.
    query_indices: HashMap<String, usize>,
}

impl HttpInteraction {
    pub(crate) fn new(contract: ContractHandle, description: &str) -> Result<Self> {
        let handle = engine::new_interaction(contract, InteractionKind::Http, description)?;
        Ok(Self {
            handle,
            description: description.to_string(),
            part: Part::Request,
            header_indices: HashMap::new(),
            query_indices: HashMap::new(),
        })
    }

    /// Set the request method and path.
    pub fn with_request(self, method: &str, path: &str) -> Result<Self> {
        engine::with_request(self.handle, method, path)?;
        Ok(self)
    }

    /// Add a header to the resolved part.
    ///
    /// Header names are case-insensitive. Declaring the same header again
    /// appends a further value rather than overwriting; the occurrence
    /// order is preserved.
    ///
    /// Values that are a JSON object with a `"value"` key are interpreted
    /// as the engine's matcher-JSON grammar. Use [`Self::set_header`] for
    /// literal values that would otherwise be misread as matcher JSON.
    pub fn with_header(mut self, name: &str, value: &str, part: Option<Part>) -> Result<Self> {
        let part = self.resolved_part(part);
        let key = (part, name.to_ascii_lowercase());
        let index = self.header_indices.get(&key).copied().unwrap_or(0);
        let occupied = engine::with_header_value(self.handle, part, name, index, value)?;
        self.header_indices.insert(key, occupied);
        Ok(self)
    }

    /// Add several headers to the resolved part. Repeated names within the
    /// iterable accumulate, exactly as repeated [`Self::with_header`] calls.
    pub fn with_headers<'a>(
        self,
        headers: impl IntoIterator<Item = (&'a str, &'a str)>,
        part: Option<Part>,
    ) -> Result<Self> {
        let mut this = self;
        for (name, value) in headers {
            this = this.with_header(name, value, part)?;
        }
        Ok(this)
    }

    /// Set a header on the resolved part, replacing any previous values.
    /// The value is taken literally; no matcher-JSON interpretation.
    pub fn set_header(self, name: &str, value: &str, part: Option<Part>) -> Result<Self> {
        engine::set_header(self.handle, self.resolved_part(part), name, value)?;
        Ok(self)
    }

    /// Set several headers on the resolved part, each replacing previous
    /// values for its name.
    pub fn set_headers<'a>(
        self,
        headers: impl IntoIterator<Item = (&'a str, &'a str)>,
        part: Option<Part>,
    ) -> Result<Self> {
        let mut this = self;
        for (name, value) in headers {
            this = this.set_header(name, value, part)?;
        }
        Ok(this)
    }

    /// Add a query parameter to the request. Declaring the same name again
    /// appends a further value, preserving order.
    pub fn with_query_parameter(mut self, name: &str, value: &str) -> Result<Self> {
        let index = self.query_indices.get(name).copied().unwrap_or(0);
        let occupied = engine::with_query_parameter_value(self.handle, name, index, value)?;
        self.query_indices.insert(name.to_string(), occupied);
        Ok(self)
    }

    /// Add several query parameters to the request.
    pub fn with_query_parameters<'a>(
        self,
        parameters: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self> {
        let mut this = self;
        for (name, value) in parameters {
            this = this.with_query_parameter(name, value)?;
        }
        Ok(this)
    }

    /// Set the response status and flip the current part to the response.
    ///
    /// Every later part-taking mutator without an explicit part now targets
    /// the response. This is the only implicit state transition in the
    /// builder.
    pub fn will_respond_with(mut self, status: u16) -> Result<Self> {
        engine::response_status(self.handle, status)?;
        self.part = Part::Response;
        Ok(self)
    }

}

impl Interaction for HttpInteraction {
    fn handle(&self) -> InteractionHandle {
        self.handle
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn current_part(&self) -> Part {
        self.part
    }
}

/// An asynchronous message interaction. Single-part: everything targets the
/// message contents (the request-equivalent part).
#[derive(Debug)]
pub struct AsyncMessageInteraction {
    handle: InteractionHandle,
    description: String,
}

impl AsyncMessageInteraction {
    pub(crate) fn new(contract: ContractHandle, description: &str) -> Result<Self> {
        let handle = engine::new_interaction(contract, InteractionKind::Async, description)?;
        Ok(Self {
            handle,
            description: description.to_string(),
        })
    }
}

impl Interaction for AsyncMessageInteraction {
    fn handle(&self) -> InteractionHandle {
        self.handle
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn current_part(&self) -> Part {
        Part::Request
    }
}

/// A synchronous message interaction: a request message with one or more
/// response messages. The current part stays on the request; configure the
/// response half with explicit `Some(Part::Response)` arguments.
#[derive(Debug)]
pub struct SyncMessageInteraction {
    handle: InteractionHandle,
    description: String,
    part: Part,
}

impl SyncMessageInteraction {
    pub(crate) fn new(contract: ContractHandle, description: &str) -> Result<Self> {
        let handle = engine::new_interaction(contract, InteractionKind::Sync, description)?;
        Ok(Self {
            handle,
            description: description.to_string(),
            part: Part::Request,
        })
    }
}

impl Interaction for SyncMessageInteraction {
    fn handle(&self) -> InteractionHandle {
        self.handle
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn current_part(&self) -> Part {
        self.part
    }
}
