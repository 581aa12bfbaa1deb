//! `NetworkField`: a named handle onto one record.field on a
//! [`Server`], caching its resolved [`NetworkHandle`] and retrying once
//! through by-name on `BAD_HANDLE` (`spec.md` §4.7 "Handle cache").

use crate::callback::{callback_type, Callback, CallbackHandler, CallbackKind};
use crate::codec::ValueShape;
use crate::connection::Server;
use crate::error::Result;
use crate::handle_cache::NetworkHandle;
use crate::request::{self, attribute};
use crate::value::Value;
use std::sync::Arc;
use std::time::Instant;

/// A single `record.field` reachable through a [`Server`].
///
/// Resolution is lazy: the first call that needs a handle fetches and
/// caches it; a `BAD_HANDLE` reply invalidates the cache entry and is
/// retried exactly once by name (`spec.md` §4.7, §8 "Handle retry").
pub struct NetworkField {
    server: Arc<Server>,
    name: String,
}

impl NetworkField {
    pub fn new(server: Arc<Server>, name: impl Into<String>) -> NetworkField {
        NetworkField {
            server,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn resolve_handle(&self, deadline: Option<Instant>) -> Result<NetworkHandle> {
        if let Some(handle) = self.server.cached_handle(&self.name) {
            return Ok(handle);
        }
        let handle = request::get_network_handle(&self.server, &self.name, deadline)?;
        self.server.cache_handle(self.name.clone(), handle);
        Ok(handle)
    }

    pub fn get_field_type(&self, deadline: Option<Instant>) -> Result<ValueShape> {
        request::get_field_type(&self.server, &self.name, deadline)
    }

    /// Reads the field's current value, preferring the cached handle and
    /// falling back to by-name on a stale handle (`spec.md` §4.7).
    pub fn get(&self, shape: &ValueShape, deadline: Option<Instant>) -> Result<Value> {
        if !self.server.supports_network_handles() {
            return request::get_array_by_name(&self.server, &self.name, shape, deadline);
        }
        let handle = self.resolve_handle(deadline)?;
        match request::get_array_by_handle(&self.server, handle, shape, deadline) {
            Err(e) if e.is_bad_handle() => {
                self.server.invalidate_handle(&self.name);
                request::get_array_by_name(&self.server, &self.name, shape, deadline)
            }
            other => other,
        }
    }

    pub fn put(&self, value: &Value, deadline: Option<Instant>) -> Result<()> {
        if !self.server.supports_network_handles() {
            return request::put_array_by_name(&self.server, &self.name, value, deadline);
        }
        let handle = self.resolve_handle(deadline)?;
        match request::put_array_by_handle(&self.server, handle, value, deadline) {
            Err(e) if e.is_bad_handle() => {
                self.server.invalidate_handle(&self.name);
                request::put_array_by_name(&self.server, &self.name, value, deadline)
            }
            other => other,
        }
    }

    pub fn get_value_change_threshold(&self, deadline: Option<Instant>) -> Result<f64> {
        let handle = self.resolve_handle(deadline)?;
        request::get_attribute(&self.server, handle, attribute::VALUE_CHANGE_THRESHOLD, deadline)
    }

    pub fn set_value_change_threshold(&self, threshold: f64, deadline: Option<Instant>) -> Result<()> {
        let handle = self.resolve_handle(deadline)?;
        request::set_attribute(&self.server, handle, attribute::VALUE_CHANGE_THRESHOLD, threshold, deadline)
    }

    /// Registers a server-side callback for this field, re-issued
    /// automatically on reconnect (`spec.md` §4.9).
    pub fn add_callback(&self, mask: u32, handler: CallbackHandler, deadline: Option<Instant>) -> Result<u32> {
        let handle = self.resolve_handle(deadline)?;
        let id = request::add_callback(&self.server, handle, mask, deadline)?;
        self.server.add_registered_callback(Callback {
            id,
            kind: CallbackKind::NetworkField,
            field_name: self.name.clone(),
            mask,
            handler,
        });
        Ok(id)
    }

    pub fn add_value_changed_callback(&self, handler: CallbackHandler, deadline: Option<Instant>) -> Result<u32> {
        self.add_callback(callback_type::VALUE_CHANGED, handler, deadline)
    }

    pub fn delete_callback(&self, callback_id: u32, deadline: Option<Instant>) -> Result<()> {
        request::delete_callback(&self.server, callback_id, deadline)?;
        self.server.remove_registered_callback(callback_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Endpoint;
    use crate::connection::ConnectOptions;

    #[test]
    fn falls_back_to_by_name_when_network_handles_are_unsupported() {
        let server = Arc::new(Server::with_default_logger(
            Endpoint::Tcp { host: "127.0.0.1".to_string(), port: 9727 },
            ConnectOptions::default(),
        ));
        server.mark_network_handles_unsupported();
        let field = NetworkField::new(server.clone(), "theta.position");
        assert!(!server.supports_network_handles());
        assert_eq!(field.name(), "theta.position");
    }
}
