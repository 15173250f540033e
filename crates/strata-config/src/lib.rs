//! Strata Layered Configuration
//!
//! This crate resolves configuration values from a stack of layers (defaults,
//! user, remote user, workspace, workspace folder and in-memory overrides),
//! honoring per-key scopes, language overrides and workspace trust, and
//! publishes typed change events whenever effective values change.
//!
//! # Modules
//!
//! - [`registry`]: property definitions, scopes and default overrides
//! - [`model`]: one parsed settings document
//! - [`resolver`]: immutable snapshots, value resolution and diffs
//! - [`service`]: the [`WorkspaceService`] that owns the layers, edits
//!   settings files and reloads them
//!
//! **Example Usage**:
//!
//! ```ignore
//! use std::sync::Arc;
//! use serde_json::json;
//! use strata_config::{
//!     ConfigurationOverrides, ConfigurationProperty, ConfigurationRegistry, ServiceOptions,
//!     WorkspaceIdentifier, WorkspaceService,
//! };
//!
//! #[tokio::main]
//! async fn main() -> strata_config::Result<()> {
//!     let registry = Arc::new(ConfigurationRegistry::new());
//!     registry.register_properties(vec![ConfigurationProperty::new("editor.tabSize", json!(4))]);
//!
//!     let service = WorkspaceService::new(registry, ServiceOptions::default());
//!     service
//!         .initialize(WorkspaceIdentifier::SingleFolder("/work/project".into()))
//!         .await?;
//!
//!     let tab_size: Option<u32> = service.get("editor.tabSize", &ConfigurationOverrides::none());
//!     println!("tab size: {:?}", tab_size);
//!     Ok(())
//! }
//! ```

pub mod editing;
pub mod error;
pub mod events;
pub mod loader;
pub mod model;
pub mod options;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod trust;
pub mod types;
pub mod values;
pub mod watcher;
pub mod workspace;

pub use error::{ConfigurationError, EditingErrorCode, Result};
pub use events::{ConfigurationChangeEvent, EventBus, FoldersChangeEvent, WorkspaceEvent};
pub use loader::{DiskFileSystem, SettingsFileSystem, WorkspaceFolderEntry};
pub use model::ConfigurationModel;
pub use options::ServiceOptions;
pub use registry::{
    ConfigurationProperty, ConfigurationRegistry, RegistrationReport, RegistryChange,
    RegistrySnapshot, SchemaDelta,
};
pub use resolver::{
    compare, Configuration, ConfigurationDiff, ConfigurationKeys, InspectValue, LayerSet,
};
pub use service::{ReloadTarget, WorkspaceService};
pub use trust::{RestrictedSettings, TrustGate};
pub use types::{ConfigurationOverrides, ConfigurationScope, ConfigurationTarget};
pub use workspace::{WorkbenchState, Workspace, WorkspaceFolder, WorkspaceIdentifier};
