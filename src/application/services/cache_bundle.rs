//! Groups the three persistent cache instances (A-image, A-thumb, A-fail).

use std::sync::Arc;

use crate::domain::entities::{AllStats, CacheId};
use crate::domain::ports::PersistentCachePort;

#[derive(Clone)]
pub struct CacheBundle {
    pub image: Arc<dyn PersistentCachePort>,
    pub thumbnail: Arc<dyn PersistentCachePort>,
    pub failure: Arc<dyn PersistentCachePort>,
}

impl CacheBundle {
    #[must_use]
    pub fn instance(&self, id: CacheId) -> &Arc<dyn PersistentCachePort> {
        match id {
            CacheId::Image => &self.image,
            CacheId::Thumbnail => &self.thumbnail,
            CacheId::Failure => &self.failure,
        }
    }

    pub async fn stats(&self) -> AllStats {
        AllStats {
            image: self.image.stats().await,
            thumbnail: self.thumbnail.stats().await,
            failure: self.failure.stats().await,
        }
    }
}
