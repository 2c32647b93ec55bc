//! The contract aggregate.
//!
//! A [`Contract`] holds every interaction a consumer expects from one
//! provider, plus metadata and the specification version. It is the entry
//! point of the crate: create one per provider, describe interactions with
//! [`Contract::upon_receiving`], then either write the contract to a file
//! or serve it through a [`MockServer`](crate::MockServer).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::engine::{self, ContractHandle};
use crate::errors::{ContractError, CovenantError, Result};
use crate::interaction::{AsyncMessageInteraction, HttpInteraction, SyncMessageInteraction};
use crate::server::MockServer;

/// Contract specification version.
///
/// Indicates which feature set the contract relies on; stays
/// [`Unspecified`](Self::Unspecified) until explicitly chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpecificationVersion {
    #[default]
    Unspecified,
    V1,
    V1_1,
    V2,
    V3,
    V4,
}

impl SpecificationVersion {
    /// Semantic version string as written to contract files.
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecificationVersion::Unspecified => "unspecified",
            SpecificationVersion::V1 => "1.0.0",
            SpecificationVersion::V1_1 => "1.1.0",
            SpecificationVersion::V2 => "2.0.0",
            SpecificationVersion::V3 => "3.0.0",
            SpecificationVersion::V4 => "4.0.0",
        }
    }
}

impl fmt::Display for SpecificationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpecificationVersion {
    type Err = CovenantError;

    /// Parse a version string. Case-insensitive, with an optional leading
    /// `v`; `.` and `_` separators are equivalent and trailing zero
    /// components are ignored, so `"v3.0.0"` and `"3_0_0"` both resolve
    /// to [`SpecificationVersion::V3`].
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ContractError::InvalidSpecification(s.to_string());

        let normalized = s.trim().to_ascii_lowercase().replace('.', "_");
        let normalized = normalized.strip_prefix('v').unwrap_or(&normalized);
        if normalized.is_empty() {
            return Err(invalid().into());
        }

        let mut components = Vec::new();
        for piece in normalized.split('_') {
            let number: u32 = piece.parse().map_err(|_| invalid())?;
            components.push(number);
        }
        while components.len() > 1 && components.last() == Some(&0) {
            components.pop();
        }

        match components.as_slice() {
            [1] => Ok(SpecificationVersion::V1),
            [1, 1] => Ok(SpecificationVersion::V1_1),
            [2] => Ok(SpecificationVersion::V2),
            [3] => Ok(SpecificationVersion::V3),
            [4] => Ok(SpecificationVersion::V4),
            _ => Err(invalid().into()),
        }
    }
}

/// Accepted by [`Contract::with_specification`]: a pre-typed
/// [`SpecificationVersion`] or a version string.
pub trait IntoSpecification {
    fn into_specification(self) -> Result<SpecificationVersion>;
}

impl IntoSpecification for SpecificationVersion {
    fn into_specification(self) -> Result<SpecificationVersion> {
        Ok(self)
    }
}

impl IntoSpecification for &str {
    fn into_specification(self) -> Result<SpecificationVersion> {
        self.parse()
    }
}

impl IntoSpecification for String {
    fn into_specification(self) -> Result<SpecificationVersion> {
        self.parse()
    }
}

/// A contract between one consumer and one provider.
#[derive(Debug)]
pub struct Contract {
    handle: ContractHandle,
    consumer: String,
    provider: String,
}

impl Contract {
    /// Create a contract for a consumer/provider pair. Both names must be
    /// non-empty.
    pub fn new(consumer: impl Into<String>, provider: impl Into<String>) -> Result<Self> {
        let consumer = consumer.into();
        let provider = provider.into();
        if consumer.is_empty() {
            return Err(ContractError::EmptyConsumer.into());
        }
        if provider.is_empty() {
            return Err(ContractError::EmptyProvider.into());
        }

        let handle = engine::new_contract(&consumer, &provider);
        Ok(Self {
            handle,
            consumer,
            provider,
        })
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub(crate) fn handle(&self) -> ContractHandle {
        self.handle
    }

    /// Set the specification version, from a typed version or a string
    /// (`"v3"`, `"3.0.0"`, `"3_0_0"`, ...).
    pub fn with_specification(self, version: impl IntoSpecification) -> Result<Self> {
        let version = version.into_specification()?;
        engine::with_specification(self.handle, version)?;
        Ok(self)
    }

    /// Register a capability plugin to be used by this contract's
    /// interactions. The version is optional.
    pub fn using_plugin(self, name: &str, version: Option<&str>) -> Result<Self> {
        engine::using_plugin(self.handle, name, version)?;
        Ok(self)
    }

    /// Add metadata entries under a namespace. A later call with the same
    /// namespace and key overwrites the earlier value.
    pub fn with_metadata<'a>(
        self,
        namespace: &str,
        metadata: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self> {
        for (key, value) in metadata {
            engine::with_contract_metadata(self.handle, namespace, key, value)?;
        }
        Ok(self)
    }

    /// Describe a new HTTP interaction. The description must be unique
    /// within the contract; reusing one replaces the earlier interaction.
    pub fn upon_receiving(&self, description: &str) -> Result<HttpInteraction> {
        HttpInteraction::new(self.handle, description)
    }

    /// Describe a new asynchronous message interaction.
    pub fn upon_receiving_message(&self, description: &str) -> Result<AsyncMessageInteraction> {
        AsyncMessageInteraction::new(self.handle, description)
    }

    /// Describe a new synchronous message interaction.
    pub fn upon_receiving_sync(&self, description: &str) -> Result<SyncMessageInteraction> {
        SyncMessageInteraction::new(self.handle, description)
    }

    /// Return an inert [`MockServer`] for this contract. Nothing is bound
    /// until the server is started; configure it first with its `with_*`
    /// methods.
    pub fn serve(&self) -> MockServer {
        MockServer::new(self.handle)
    }

    /// Write the contract to a file inside `directory` (default: the
    /// current working directory). With `overwrite` false, an existing
    /// file for the same consumer/provider pair is merged rather than
    /// replaced. Returns the path written.
    pub fn write_file(&self, directory: Option<&Path>, overwrite: bool) -> Result<PathBuf> {
        let directory = match directory {
            Some(directory) => directory.to_path_buf(),
            None => std::env::current_dir().map_err(crate::errors::EngineError::Io)?,
        };
        engine::write_contract_file(self.handle, &directory, overwrite)
    }
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.consumer, self.provider)
    }
}
