//! Where releases and packages come from.

use stackgrid_state::{StateError, StateStore, VapiPackage, VapiRelease};

/// Read access to the release graph.
pub trait ReleaseLookup {
    fn release(&self, id: &str) -> Result<VapiRelease, StateError>;
    fn package(&self, id: &str) -> Result<VapiPackage, StateError>;
}

impl ReleaseLookup for StateStore {
    fn release(&self, id: &str) -> Result<VapiRelease, StateError> {
        self.vapi_release(id)
    }

    fn package(&self, id: &str) -> Result<VapiPackage, StateError> {
        self.vapi_package(id)
    }
}
