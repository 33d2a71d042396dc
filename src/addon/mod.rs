//! Collaborator traits implemented by add-on authors
//!
//! The router never owns device logic. It looks collaborators up by id and
//! calls the small set of methods below. Default implementations give the
//! behaviour of an adapter or notifier that does not support the operation.
//!
//! # Example
//!
//! ```rust,ignore
//! use gateway_addon::addon::{Adapter, Device};
//!
//! struct Lamp;
//!
//! #[async_trait::async_trait]
//! impl Device for Lamp {
//!     fn id(&self) -> &str { "lamp-1" }
//!     fn as_dict(&self) -> serde_json::Value { serde_json::json!({"id": "lamp-1"}) }
//!     fn property(&self, _name: &str) -> Option<serde_json::Value> { None }
//!     async fn set_property(&self, name: &str, value: serde_json::Value) -> Result<serde_json::Value> {
//!         Ok(serde_json::json!({"name": name, "value": value}))
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

pub use crate::ipc::message::{ApiRequest, ApiResponse};
use crate::{Error, Result};

/// A device exposed by an adapter
#[async_trait]
pub trait Device: Send + Sync {
    /// Device identifier, unique within its adapter
    fn id(&self) -> &str;

    /// Full device description as sent with `DEVICE_ADDED`
    fn as_dict(&self) -> Value;

    /// Current description of property `name`, if the device has it
    fn property(&self, name: &str) -> Option<Value>;

    /// Apply a new property value
    ///
    /// Returns the property description after the change, which the router
    /// reports back in `PROPERTY_CHANGED`.
    ///
    /// # Errors
    ///
    /// Returns error if the property does not exist or the value is rejected
    async fn set_property(&self, name: &str, value: Value) -> Result<Value>;

    /// Run action `name`
    ///
    /// # Errors
    ///
    /// Returns error if the action is unknown or fails
    async fn request_action(&self, action_id: &str, name: &str, input: Option<Value>) -> Result<()> {
        let _ = (action_id, input);
        Err(Error::Addon(format!("action '{name}' is not supported")))
    }

    /// Cancel a queued action
    ///
    /// # Errors
    ///
    /// Returns error if the action cannot be removed
    async fn remove_action(&self, action_id: &str, name: &str) -> Result<()> {
        let _ = action_id;
        Err(Error::Addon(format!("action '{name}' cannot be removed")))
    }
}

/// A device adapter
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Adapter identifier
    fn id(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> &str;

    /// Package that provides this adapter
    fn package_name(&self) -> &str;

    /// Look up one of this adapter's devices
    fn device(&self, device_id: &str) -> Option<Arc<dyn Device>>;

    /// Begin looking for new devices for `timeout`
    ///
    /// # Errors
    ///
    /// Returns error if pairing cannot start
    async fn start_pairing(&self, timeout: Duration) -> Result<()> {
        tracing::debug!(adapter_id = %self.id(), timeout_secs = timeout.as_secs(), "pairing started");
        Ok(())
    }

    /// Stop looking for new devices
    ///
    /// # Errors
    ///
    /// Returns error if pairing cannot be cancelled
    async fn cancel_pairing(&self) -> Result<()> {
        tracing::debug!(adapter_id = %self.id(), "pairing cancelled");
        Ok(())
    }

    /// Forget a device
    ///
    /// On success the router reports `DEVICE_REMOVED`.
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be removed
    async fn remove_device(&self, device_id: &str) -> Result<()> {
        tracing::debug!(adapter_id = %self.id(), device_id, "device removed");
        Ok(())
    }

    /// Abort a pending device removal
    ///
    /// # Errors
    ///
    /// Returns error if the removal cannot be cancelled
    async fn cancel_remove_device(&self, device_id: &str) -> Result<()> {
        tracing::debug!(adapter_id = %self.id(), device_id, "device removal cancelled");
        Ok(())
    }

    /// The gateway saved `device` to its database
    ///
    /// # Errors
    ///
    /// Returns error if the adapter rejects the saved description
    async fn handle_device_saved(&self, device_id: &str, device: Value) -> Result<()> {
        let _ = device;
        tracing::debug!(adapter_id = %self.id(), device_id, "device saved");
        Ok(())
    }

    /// Set the PIN of a device, returning its updated description
    ///
    /// # Errors
    ///
    /// Returns error if the adapter does not support PINs or the PIN is wrong
    async fn set_pin(&self, device_id: &str, pin: &str) -> Result<Value> {
        let _ = pin;
        Err(Error::Addon(format!(
            "adapter '{}' does not support setting a PIN for '{device_id}'",
            self.id()
        )))
    }

    /// Set device credentials, returning its updated description
    ///
    /// # Errors
    ///
    /// Returns error if the adapter does not support credentials or they are
    /// rejected
    async fn set_credentials(&self, device_id: &str, username: &str, password: &str) -> Result<Value> {
        let _ = (username, password);
        Err(Error::Addon(format!(
            "adapter '{}' does not support credentials for '{device_id}'",
            self.id()
        )))
    }

    /// Release resources before the plugin exits
    ///
    /// # Errors
    ///
    /// Returns error if cleanup fails
    async fn unload(&self) -> Result<()> {
        Ok(())
    }
}

/// Urgency of an outlet notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Low,
    Normal,
    High,
}

impl TryFrom<u8> for NotificationLevel {
    type Error = Error;

    fn try_from(level: u8) -> Result<Self> {
        match level {
            0 => Ok(Self::Low),
            1 => Ok(Self::Normal),
            2 => Ok(Self::High),
            other => Err(Error::Addon(format!("unknown notification level {other}"))),
        }
    }
}

/// A notification destination owned by a notifier
#[async_trait]
pub trait Outlet: Send + Sync {
    fn id(&self) -> &str;

    /// Description sent with `OUTLET_ADDED`
    fn as_dict(&self) -> Value;

    /// Deliver one notification
    ///
    /// # Errors
    ///
    /// Returns error if delivery fails
    async fn notify(&self, title: &str, message: &str, level: NotificationLevel) -> Result<()>;
}

/// A notifier
#[async_trait]
pub trait Notifier: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn package_name(&self) -> &str;

    fn outlet(&self, outlet_id: &str) -> Option<Arc<dyn Outlet>>;

    /// Release resources before the plugin exits
    ///
    /// # Errors
    ///
    /// Returns error if cleanup fails
    async fn unload(&self) -> Result<()> {
        Ok(())
    }
}

/// Handler for REST requests routed to a package
#[async_trait]
pub trait ApiHandler: Send + Sync {
    /// Package whose requests this handler serves
    fn package_name(&self) -> &str;

    /// Answer one request
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be handled; the gateway then sees
    /// a 500 response
    async fn handle_request(&self, request: ApiRequest) -> Result<ApiResponse>;

    /// Release resources before the plugin exits
    ///
    /// # Errors
    ///
    /// Returns error if cleanup fails
    async fn unload(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;

    #[async_trait]
    impl Adapter for Bare {
        fn id(&self) -> &str {
            "bare"
        }

        fn name(&self) -> &str {
            "Bare"
        }

        fn package_name(&self) -> &str {
            "bare-adapter"
        }

        fn device(&self, _device_id: &str) -> Option<Arc<dyn Device>> {
            None
        }
    }

    #[tokio::test]
    async fn adapter_defaults() {
        let adapter = Bare;
        assert!(adapter.start_pairing(Duration::from_secs(60)).await.is_ok());
        assert!(adapter.cancel_pairing().await.is_ok());
        assert!(adapter.remove_device("d1").await.is_ok());
        assert!(adapter.unload().await.is_ok());

        let err = adapter.set_pin("d1", "1234").await.unwrap_err();
        assert!(matches!(err, Error::Addon(_)));
        assert!(adapter.set_credentials("d1", "u", "p").await.is_err());
    }

    #[test]
    fn notification_levels() {
        assert_eq!(NotificationLevel::try_from(0).unwrap(), NotificationLevel::Low);
        assert_eq!(NotificationLevel::try_from(2).unwrap(), NotificationLevel::High);
        assert!(NotificationLevel::try_from(3).is_err());
    }
}
