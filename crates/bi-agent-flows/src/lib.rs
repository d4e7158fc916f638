//! BI Agent Flows - Worked conversational flows
//!
//! Concrete [`FlowDefinition`](bi_agent_core::flow::FlowDefinition) builders
//! and the collaborators they drive:
//! - Auth: LLM provider selection and API key entry
//! - Connections: connect, create, edit and delete database connections
//! - Credentials / Registry: the stores those flows read and write

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod connections;
pub mod credentials;
pub mod error;
pub mod registry;

pub use auth::{auth_setup_flow, AUTH_FLOW_ID};
pub use connections::{connection_flow, CONNECTION_FLOW_ID, DELETE_STEP};
pub use credentials::{CredentialStore, MemoryCredentialStore, Provider};
pub use error::{FlowsError, Result};
pub use registry::{
    ConnectionConfig, ConnectionRegistry, DbType, FileConnectionRegistry,
    MemoryConnectionRegistry,
};
