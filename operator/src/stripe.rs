use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

/// Lock-striped map keyed by ARN. Work on one ECS entity is serialized so
/// watch events and projection intents cannot interleave in a way that
/// violates the task state machine; work on different entities proceeds in
/// parallel (modulo stripe collisions).
pub struct LockMap {
    stripes: Vec<Arc<Mutex<()>>>,
}

impl LockMap {
    pub fn new(stripes: usize) -> Self {
        LockMap {
            stripes: (0..stripes.max(1)).map(|_| Arc::new(Mutex::new(()))).collect(),
        }
    }

    pub async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.stripes.len();
        self.stripes[idx].lock().await
    }

    /// Owned guard for use inside spawned tasks.
    pub async fn lock_owned(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.stripes.len();
        self.stripes[idx].clone().lock_owned().await
    }
}

impl Default for LockMap {
    fn default() -> Self {
        LockMap::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_key_serializes() {
        let map = LockMap::new(8);
        let g = map.lock("arn:aws:ecs:us-east-1:0:service/a").await;
        // A second lock on the same key must not be grantable while held.
        assert!(
            tokio::time::timeout(
                std::time::Duration::from_millis(50),
                map.lock("arn:aws:ecs:us-east-1:0:service/a")
            )
            .await
            .is_err()
        );
        drop(g);
        map.lock("arn:aws:ecs:us-east-1:0:service/a").await;
    }
}
