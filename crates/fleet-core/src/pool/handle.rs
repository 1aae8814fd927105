//! Per-session client handle

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{FleetError, FleetResult};
use crate::provider::{CallControl, MessagingConnection, ProviderFactory};
use crate::store::SessionMetadata;

/// Live connection plus call layer of one session
///
/// Created without connecting; the connection is established lazily by a
/// start or join request. Connectivity is read from the provider objects
/// rather than tracked separately, so it cannot go stale.
pub struct ClientHandle {
    name: String,
    connection: Arc<dyn MessagingConnection>,
    call_control: Arc<dyn CallControl>,
    metadata: SessionMetadata,
}

impl ClientHandle {
    /// Instantiate the provider objects for a stored credential
    pub fn instantiate(
        factory: &dyn ProviderFactory,
        name: &str,
        credential: &str,
        metadata: SessionMetadata,
    ) -> FleetResult<Self> {
        let unusable = |e: crate::provider::ProviderError| FleetError::SessionUnusable {
            name: name.to_string(),
            reason: e.to_string(),
        };

        let connection = factory.open_session(name, Some(credential)).map_err(unusable)?;
        let call_control = factory
            .call_control(Arc::clone(&connection))
            .map_err(unusable)?;

        Ok(Self {
            name: name.to_string(),
            connection,
            call_control,
            metadata,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> &Arc<dyn MessagingConnection> {
        &self.connection
    }

    pub fn call_control(&self) -> &Arc<dyn CallControl> {
        &self.call_control
    }

    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    /// Name shown to the operator
    pub fn display_name(&self) -> &str {
        if self.metadata.display_name.is_empty() {
            &self.name
        } else {
            &self.metadata.display_name
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn call_control_connected(&self) -> bool {
        self.call_control.is_connected()
    }

    pub fn is_online(&self) -> bool {
        self.is_connected() && self.call_control_connected()
    }

    /// Connect and start the call layer, skipping whatever is already up
    ///
    /// Returns `false` when nothing had to be done.
    pub async fn bring_online(&self) -> FleetResult<bool> {
        let mut changed = false;

        if !self.connection.is_connected() {
            self.connection.connect().await?;
            changed = true;
        }
        if !self.call_control.is_connected() {
            self.call_control.start().await?;
            changed = true;
        }

        if changed {
            debug!(session = %self.name, "Session online");
        }
        Ok(changed)
    }

    /// Stop the call layer
    pub async fn stop_calls(&self) -> FleetResult<()> {
        if self.call_control.is_connected() {
            self.call_control.stop().await?;
        }
        Ok(())
    }

    /// Close the connection
    pub async fn disconnect(&self) -> FleetResult<()> {
        if self.connection.is_connected() {
            self.connection.disconnect().await?;
        }
        Ok(())
    }

    /// Stop the call layer and close the connection, logging failures
    pub async fn shutdown(&self) {
        if let Err(e) = self.stop_calls().await {
            warn!(session = %self.name, error = %e, "Failed to stop call layer");
        }
        if let Err(e) = self.disconnect().await {
            warn!(session = %self.name, error = %e, "Failed to disconnect");
        }
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .field("call_control_connected", &self.call_control_connected())
            .finish()
    }
}
