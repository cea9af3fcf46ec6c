//! Session registry: bridges the TCP auth session's committed AES-CWC key
//! to the UDP game-session layer. Not part of the original wire protocol —
//! the auth state machine and the FSDP game channel are separate processes
//! of trust in the reference design, but something has to hand the
//! commitment key from one to the other, keyed by the player name the
//! client re-presents in the UDP prologue.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Clone, Default)]
pub struct SessionRegistry {
    keys: Arc<RwLock<HashMap<String, [u8; 16]>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit(&self, player_name: String, key: [u8; 16]) {
        self.keys.write().unwrap().insert(player_name, key);
    }

    pub fn lookup(&self, player_name: &str) -> Option<[u8; 16]> {
        self.keys.read().unwrap().get(player_name).copied()
    }

    pub fn remove(&self, player_name: &str) {
        self.keys.write().unwrap().remove(player_name);
    }
}
