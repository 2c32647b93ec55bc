//! Consumer-driven contract testing.
//!
//! Declaratively describe the exact interactions a consumer expects from a
//! provider (HTTP requests and responses, plus asynchronous and synchronous
//! messages), producing a serializable contract that can be replayed against
//! a scoped mock server.
//!
//! - **Contracts**: one [`Contract`] per consumer/provider pair
//! - **Interactions**: fluent builders with implicit request/response part
//!   resolution
//! - **Mock server**: a live double with guaranteed release on every exit
//!   path
//! - **Write-out**: deterministic contract files with overwrite-or-merge
//!   semantics
//!
//! # Quick start
//!
//! ```no_run
//! use covenant::{Contract, Interaction};
//!
//! # fn main() -> covenant::Result<()> {
//! let contract = Contract::new("web-app", "user-service")?;
//! contract
//!     .upon_receiving("a request for a user")?
//!     .given("user exists")?
//!     .with_request("GET", "/users/1")?
//!     .will_respond_with(200)?
//!     .with_header("Content-Type", "application/json", None)?
//!     .with_body(Some(r#"{"id": 1}"#), "application/json", None)?;
//!
//! let mut server = contract.serve();
//! server.scope(|srv| {
//!     let _url = srv / "users/1";
//!     // drive real traffic against the server here
//!     srv.write_file(Some(std::path::Path::new("pacts")), false)?;
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod contract;
pub mod engine;
pub mod errors;
pub mod interaction;
pub mod server;

pub use contract::{Contract, IntoSpecification, SpecificationVersion};
pub use errors::{
    ContractError, CovenantError, EngineError, InteractionError, Result, ServerError,
};
pub use interaction::{
    AsyncMessageInteraction, HttpInteraction, Interaction, InteractionKind, Part, PluginContents,
    StateParameters, SyncMessageInteraction,
};
pub use server::MockServer;
