//! Discovery of one representative case per link-group.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::db::ForecastStore;
use crate::error::AppResult;

/// Cases scanned per keyset page.
pub const DISCOVERY_BATCH_SIZE: u64 = 1000;

/// Scan every active (non-deleted, non-archived) case and return one
/// representative per link-group, in ascending id order.
///
/// A case becomes a representative unless it was already marked as processed;
/// its direct neighbours are then marked so they are not picked again.
pub async fn get_unique_case_group_ids<S>(store: &S) -> AppResult<Vec<i32>>
where
    S: ForecastStore + ?Sized,
{
    let mut processed: HashSet<i32> = HashSet::new();
    let mut representatives = Vec::new();
    let mut cursor: Option<i32> = None;
    let mut scanned = 0usize;

    loop {
        let batch = store
            .active_case_ids_after(cursor, DISCOVERY_BATCH_SIZE)
            .await?;
        let Some(&last_id) = batch.last() else {
            break;
        };
        scanned += batch.len();

        let mut neighbours: HashMap<i32, Vec<i32>> = HashMap::new();
        for edge in store.links_for_cases(&batch).await? {
            neighbours.entry(edge.case_a_id).or_default().push(edge.case_b_id);
            neighbours.entry(edge.case_b_id).or_default().push(edge.case_a_id);
        }

        for case_id in &batch {
            if !processed.insert(*case_id) {
                continue;
            }
            representatives.push(*case_id);

            if let Some(linked) = neighbours.get(case_id) {
                processed.extend(linked.iter().copied());
            }
        }

        debug!(scanned, last_id, groups = representatives.len(), "Scanned case batch");

        if (batch.len() as u64) < DISCOVERY_BATCH_SIZE {
            break;
        }
        cursor = Some(last_id);
    }

    info!(
        "Found {} unique case groups among {} cases",
        representatives.len(),
        scanned
    );

    Ok(representatives)
}
