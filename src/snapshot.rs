use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotHash([u8; 32]);

impl SnapshotHash {
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Option<Self> {
        let bytes = serde_json::to_vec(value).ok()?;
        let digest = Sha256::digest(&bytes);
        Some(Self(digest.into()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotSlot {
    last: Option<SnapshotHash>,
}

impl SnapshotSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` as applied and report whether it differs from the
    /// previous one. Values that cannot be serialized always count as changed.
    pub fn offer<T: Serialize + ?Sized>(&mut self, value: &T) -> bool {
        let Some(hash) = SnapshotHash::of(value) else {
            self.last = None;
            return true;
        };
        if self.last == Some(hash) {
            return false;
        }
        self.last = Some(hash);
        true
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
