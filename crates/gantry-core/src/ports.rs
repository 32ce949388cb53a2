//! Port allocation
//!
//! Pure transforms over the [`PortRegistry`] document; all I/O happens in
//! the state store around them. `next_port` is monotonic for the lifetime
//! of the registry, so freed port numbers are never reused.

use crate::registry::PortRegistry;
use crate::{Error, Result};

/// Bottom of the port range handed out to applications
pub const PORT_RANGE_START: u16 = 10000;

/// Allocate a port for `app_name`
///
/// Idempotent: if the app already owns a port, that port is returned and
/// the registry is left unchanged.
pub fn allocate(ports: &mut PortRegistry, app_name: &str) -> u16 {
    if let Some(port) = port_of(ports, app_name) {
        return port;
    }
    let port = ports.next_port;
    ports.allocated.insert(port.to_string(), app_name.to_string());
    ports.next_port = port + 1;
    port
}

/// Release the port held by `app_name`, returning it
pub fn release(ports: &mut PortRegistry, app_name: &str) -> Result<u16> {
    let key = ports
        .allocated
        .iter()
        .find(|(_, owner)| owner.as_str() == app_name)
        .map(|(port, _)| port.clone())
        .ok_or_else(|| Error::PortNotFound(app_name.to_string()))?;
    ports.allocated.remove(&key);
    key.parse()
        .map_err(|_| Error::PortNotFound(app_name.to_string()))
}

/// Register an explicitly chosen `port` for `app_name`
///
/// Fails with a conflict if the port belongs to a different app, or if
/// the app already holds a different port (an app owns at most one).
/// Registering a port below the counter never rewinds it.
pub fn register(ports: &mut PortRegistry, port: u16, app_name: &str) -> Result<()> {
    let key = port.to_string();
    if let Some(owner) = ports.allocated.get(&key) {
        if owner != app_name {
            return Err(Error::PortConflict {
                port,
                owner: owner.clone(),
            });
        }
        return Ok(());
    }
    if let Some(existing) = port_of(ports, app_name) {
        return Err(Error::PortConflict {
            port: existing,
            owner: app_name.to_string(),
        });
    }
    ports.allocated.insert(key, app_name.to_string());
    if port >= ports.next_port {
        ports.next_port = port + 1;
    }
    Ok(())
}

/// The port currently held by `app_name`, if any
pub fn port_of(ports: &PortRegistry, app_name: &str) -> Option<u16> {
    ports
        .allocated
        .iter()
        .find(|(_, owner)| owner.as_str() == app_name)
        .and_then(|(port, _)| port.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_first_port() {
        let mut ports = PortRegistry::empty();
        let port = allocate(&mut ports, "myapp");
        assert_eq!(port, PORT_RANGE_START);
        assert_eq!(
            ports.allocated.get(&PORT_RANGE_START.to_string()).map(String::as_str),
            Some("myapp")
        );
        assert_eq!(ports.next_port, PORT_RANGE_START + 1);
    }

    #[test]
    fn test_allocate_increments() {
        let mut ports = PortRegistry::empty();
        assert_eq!(allocate(&mut ports, "a"), PORT_RANGE_START);
        assert_eq!(allocate(&mut ports, "b"), PORT_RANGE_START + 1);
        assert_eq!(allocate(&mut ports, "c"), PORT_RANGE_START + 2);
    }

    #[test]
    fn test_allocate_is_idempotent() {
        let mut ports = PortRegistry::empty();
        let first = allocate(&mut ports, "myapp");
        let second = allocate(&mut ports, "myapp");
        assert_eq!(first, second);
        // Counter advanced exactly once
        assert_eq!(ports.next_port, PORT_RANGE_START + 1);
        assert_eq!(ports.allocated.len(), 1);
    }

    #[test]
    fn test_release_port() {
        let mut ports = PortRegistry::empty();
        let port = allocate(&mut ports, "myapp");
        assert_eq!(release(&mut ports, "myapp").unwrap(), port);
        assert!(!ports.allocated.contains_key(&port.to_string()));
    }

    #[test]
    fn test_release_unknown_app() {
        let mut ports = PortRegistry::empty();
        assert!(matches!(
            release(&mut ports, "ghost"),
            Err(Error::PortNotFound(_))
        ));
    }

    #[test]
    fn test_freed_ports_are_never_reused() {
        let mut ports = PortRegistry::empty();
        allocate(&mut ports, "a");
        allocate(&mut ports, "b");
        release(&mut ports, "a").unwrap();
        // next_port is monotonic across the registry's lifetime
        assert_eq!(allocate(&mut ports, "c"), PORT_RANGE_START + 2);
    }

    #[test]
    fn test_register_port() {
        let mut ports = PortRegistry::empty();
        register(&mut ports, 8080, "custom").unwrap();
        assert_eq!(ports.allocated.get("8080").map(String::as_str), Some("custom"));
        // Below the floor: counter untouched
        assert_eq!(ports.next_port, PORT_RANGE_START);
    }

    #[test]
    fn test_register_conflict() {
        let mut ports = PortRegistry::empty();
        register(&mut ports, 8080, "first").unwrap();
        assert!(matches!(
            register(&mut ports, 8080, "second"),
            Err(Error::PortConflict { port: 8080, .. })
        ));
        // Same owner is a no-op, not a conflict
        register(&mut ports, 8080, "first").unwrap();
    }

    #[test]
    fn test_register_keeps_app_names_unique() {
        let mut ports = PortRegistry::empty();
        let held = allocate(&mut ports, "myapp");
        // A second, different port for the same app would break the
        // one-port-per-app invariant
        let err = register(&mut ports, 12000, "myapp").unwrap_err();
        assert!(matches!(err, Error::PortConflict { .. }));
        assert_eq!(port_of(&ports, "myapp"), Some(held));
        // Re-registering the held port is a no-op
        register(&mut ports, held, "myapp").unwrap();
    }

    #[test]
    fn test_register_advances_next_port() {
        let mut ports = PortRegistry::empty();
        register(&mut ports, 10005, "high").unwrap();
        assert_eq!(ports.next_port, 10006);
    }

    #[test]
    fn test_register_below_next_keeps_counter() {
        let mut ports = PortRegistry::empty();
        ports.next_port = 10010;
        register(&mut ports, 10003, "low").unwrap();
        assert_eq!(ports.next_port, 10010);
    }

    #[test]
    fn test_port_of() {
        let mut ports = PortRegistry::empty();
        assert_eq!(port_of(&ports, "myapp"), None);
        let port = allocate(&mut ports, "myapp");
        assert_eq!(port_of(&ports, "myapp"), Some(port));
    }
}
