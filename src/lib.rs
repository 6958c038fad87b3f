pub mod config;
pub mod error;
pub mod db;
pub mod store;
pub mod fingerprint;
pub mod bom;
pub mod ontology;
pub mod search;
pub mod cache;
pub mod batch;
pub mod progress;

pub use config::Config;
pub use error::{BomGraphError, Result};
pub use bom::{BomNode, direct_components, resolve};
pub use fingerprint::Fingerprint;
pub use ontology::{GraphRenderer, OntologyEngine, TargetSyntax};
