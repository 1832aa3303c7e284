//! Relational connection-lifecycle subsystem for the Meridian runtime.
//!
//! Provides:
//! - **Connection identity**: canonical, hashable [`key::ConnectionKey`]s
//!   built from a datasource specification and an authentication strategy.
//! - **Pooling**: one bounded [`pool::ConnectionPool`] per distinct key,
//!   owned by a concurrency-safe [`registry::PoolRegistry`].
//! - **Vendor capability dispatch**: a [`vendor::VendorRegistry`] mapping a
//!   database vendor tag to its [`vendor::DatabaseManager`] capability
//!   (URL building, driver identity, vendor SQL command set).
//!
//! Concrete wire drivers are out of scope; connection opening is the
//! injected [`connection::ConnectionOpener`] capability, and credential
//! acquisition the injected [`credential::CredentialProvider`].

pub mod connection;
pub mod credential;
pub mod key;
pub mod pool;
pub mod registry;
pub mod vendor;

pub use connection::{ConnectionOpener, LiveConnection, RowSet};
pub use credential::{Credential, CredentialProvider, StaticCredentialProvider};
pub use key::{AuthenticationStrategyKey, ConnectionKey, DataSourceSpecificationKey};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use registry::{PoolRegistry, RegistrySnapshot};
pub use vendor::{DatabaseManager, DatabaseVendor, VendorRegistry};
