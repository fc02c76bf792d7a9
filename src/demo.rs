//! Demo dataset shown before the first upload.

use crate::error::Result;
use crate::kpi::KpiSnapshot;
use crate::store::{Persistence, SnapshotSource, SnapshotStore};

const DEMO_PAYLOAD: &str = include_str!("./static/demo.json");

/// The bundled demo snapshot, validated like a backend payload
pub fn demo_snapshot() -> Result<KpiSnapshot> {
    KpiSnapshot::from_payload(DEMO_PAYLOAD.as_bytes())
}

/// Loads the demo data unless the store already holds something.
///
/// Returns whether the demo was loaded.
pub fn seed_demo<P: Persistence>(store: &mut SnapshotStore<P>) -> Result<bool> {
    if store.get().is_some() {
        return Ok(false);
    }
    store.load(demo_snapshot()?, SnapshotSource::Demo)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kpi::Metric;
    use crate::store::MemoryPersistence;

    #[test]
    fn demo_payload_is_valid() {
        let demo = demo_snapshot().unwrap();
        assert_eq!(demo.revenue_sum, 498924.25);
        assert_eq!(demo.customers_sum, 91.0);
        assert_eq!(demo.date_data.len(), 40);
        assert_eq!(demo.series(Metric::Revenue).len(), 40);
        assert_eq!(demo.top5_profit.len(), 5);
        assert_eq!(demo.pie_data.len(), 2);
        assert_eq!(demo.map_data[0].coordinates, [-75.5, 43.0]);
    }

    #[test]
    fn seed_only_when_empty() {
        let mut store = SnapshotStore::open(MemoryPersistence::new()).unwrap();
        assert!(seed_demo(&mut store).unwrap());
        assert!(store.get().unwrap().source.is_demo());
        assert!(!seed_demo(&mut store).unwrap());
    }
}
