//! Baseline Store - versioned design baselines shared by detector and controller
//!
//! The detector compares every reading against the baseline of the design
//! currently in force. When the recalibration controller accepts a patch, it
//! publishes the candidate's baselines as a new version; readers pick it up on
//! their next `load()` and never observe a half-written record.
//!
//! ## Usage
//!
//! ```ignore
//! let store = Arc::new(BaselineStore::new(&variant));
//!
//! // Detector, once per reading
//! let snapshot = store.load();
//! let baseline = snapshot.get("bearing_capacity");
//!
//! // Controller, after acceptance
//! store.publish(&candidate);
//! ```

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::types::DesignVariant;

/// One immutable version of the baseline record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    /// Starts at 1, incremented by every publish
    pub version: u64,
    /// Variant whose baselines these are
    pub variant_id: String,
    pub values: BTreeMap<String, f64>,
    pub published_at: DateTime<Utc>,
}

impl BaselineSnapshot {
    fn from_variant(variant: &DesignVariant, version: u64) -> Self {
        Self {
            version,
            variant_id: variant.id().to_string(),
            values: variant.baselines().clone(),
            published_at: Utc::now(),
        }
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).copied()
    }
}

/// Atomically swappable baseline record.
#[derive(Debug)]
pub struct BaselineStore {
    current: ArcSwap<BaselineSnapshot>,
}

impl BaselineStore {
    /// Store seeded with `variant`'s baselines as version 1.
    pub fn new(variant: &DesignVariant) -> Self {
        Self {
            current: ArcSwap::from_pointee(BaselineSnapshot::from_variant(variant, 1)),
        }
    }

    /// Current snapshot. Cheap; call once per reading.
    pub fn load(&self) -> Arc<BaselineSnapshot> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    pub fn variant_id(&self) -> String {
        self.current.load().variant_id.clone()
    }

    /// Replace the record with `variant`'s baselines under the next version.
    pub fn publish(&self, variant: &DesignVariant) -> Arc<BaselineSnapshot> {
        let mut published = None;
        self.current.rcu(|old| {
            let next = Arc::new(BaselineSnapshot::from_variant(variant, old.version + 1));
            published = Some(Arc::clone(&next));
            next
        });
        let snapshot = published.unwrap_or_else(|| self.current.load_full());

        info!(
            variant = %snapshot.variant_id,
            version = snapshot.version,
            metrics = snapshot.values.len(),
            "Baselines published"
        );
        snapshot
    }
}
