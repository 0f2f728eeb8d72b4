//! User and group identities, and user-namespace id remapping.

use serde::{Deserialize, Serialize};

use crate::error::{BuildError, Result};

/// A uid/gid pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

/// One contiguous range of a uid or gid map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMap {
    /// First id inside the container
    pub container_id: u32,
    /// First id on the host
    pub host_id: u32,
    /// Number of ids in the range
    pub size: u32,
}

/// Translation between container ids and host ids.
///
/// An empty mapping translates every id to itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityMapping {
    #[serde(default)]
    pub uid_maps: Vec<IdMap>,
    #[serde(default)]
    pub gid_maps: Vec<IdMap>,
}

impl IdentityMapping {
    pub fn is_empty(&self) -> bool {
        self.uid_maps.is_empty() && self.gid_maps.is_empty()
    }

    /// Translate a container identity into the host identity that owns files on disk.
    pub fn to_host(&self, identity: Identity) -> Result<Identity> {
        Ok(Identity {
            uid: to_host_id(identity.uid, &self.uid_maps).ok_or_else(|| {
                BuildError::Ownership(format!("container uid {} is not mapped", identity.uid))
            })?,
            gid: to_host_id(identity.gid, &self.gid_maps).ok_or_else(|| {
                BuildError::Ownership(format!("container gid {} is not mapped", identity.gid))
            })?,
        })
    }

    /// Host identity of the container's root user.
    pub fn root_pair(&self) -> Result<Identity> {
        self.to_host(Identity::new(0, 0))
    }
}

fn to_host_id(id: u32, maps: &[IdMap]) -> Option<u32> {
    if maps.is_empty() {
        return Some(id);
    }
    maps.iter().find_map(|m| {
        let offset = id.checked_sub(m.container_id)?;
        if offset < m.size {
            m.host_id.checked_add(offset)
        } else {
            None
        }
    })
}
