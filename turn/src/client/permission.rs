use std::collections::HashMap;
use std::net::SocketAddr;

/// State of one peer permission on the allocation.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub(crate) enum PermState {
    /// No CreatePermission sent yet.
    #[default]
    Idle,
    /// CreatePermission is in flight.
    Requested,
    /// The server accepted the permission; sends to the peer flow.
    Permitted,
}

#[derive(Debug, Default)]
pub(crate) struct Permission {
    state: PermState,
}

impl Permission {
    pub(crate) fn state(&self) -> PermState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: PermState) {
        self.state = state;
    }
}

/// Permissions keyed by peer address.
#[derive(Debug, Default)]
pub(crate) struct PermissionMap {
    perm_map: HashMap<SocketAddr, Permission>,
}

impl PermissionMap {
    pub(crate) fn new() -> Self {
        PermissionMap {
            perm_map: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, addr: SocketAddr, permission: Permission) {
        self.perm_map.insert(addr, permission);
    }

    pub(crate) fn get(&self, addr: &SocketAddr) -> Option<&Permission> {
        self.perm_map.get(addr)
    }

    pub(crate) fn get_mut(&mut self, addr: &SocketAddr) -> Option<&mut Permission> {
        self.perm_map.get_mut(addr)
    }

    pub(crate) fn delete(&mut self, addr: &SocketAddr) {
        self.perm_map.remove(addr);
    }

    pub(crate) fn addrs(&self) -> Vec<SocketAddr> {
        self.perm_map.keys().copied().collect()
    }

    pub(crate) fn clear(&mut self) {
        self.perm_map.clear();
    }
}
