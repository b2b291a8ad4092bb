//! Tenant registry and RBAC context resolution.
//!
//! Everything an authenticated operator request needs — tenant row,
//! membership, effective scopes — plus the forensic logs (audit, webhook)
//! and the at-rest encryption for gateway credentials.

pub mod audit;
pub mod crypto;
pub mod db;
pub mod error;
pub mod rbac;
pub mod resolver;
pub mod tenants;
pub mod types;
pub mod users;

pub use error::{Result, TenancyError};
pub use resolver::ScopeResolver;
pub use tenants::TenantStore;
