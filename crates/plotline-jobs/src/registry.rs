//! Provider discovery across the workspace.

use plotline_pipeline::{ProviderRegistry, ProviderTable};

/// Every crate's registration table, in precedence order.
pub const PROVIDER_TABLES: &[ProviderTable] =
    &[plotline_pipeline::providers, plotline_export::providers];

/// Build the registry the service runs with.
#[must_use]
pub fn discover() -> ProviderRegistry {
    ProviderRegistry::discover(PROVIDER_TABLES)
}
