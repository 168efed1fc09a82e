//! Forecast computation for repository cases and test runs.
//!
//! A case's forecast is computed over its link-group: the case plus the cases
//! directly linked to it as the same test from a different source. Manual
//! members contribute elapsed times of their manual test run results,
//! automated members contribute JUnit result times. Every member of the group
//! receives the same pair of values.
//!
//! Only direct links are followed. A chain `A - B - C` started from `A` does
//! not reach `C`; the daily bulk recompute converges such chains over time.

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, warn};

use crate::db::ForecastStore;
use crate::error::AppResult;
use crate::models::{CaseSource, ForecastPair, RunCaseForecast};

/// Options for `update_repository_case_forecast`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaseForecastOptions {
    /// Do not recompute the test runs that reference the group
    pub skip_test_run_update: bool,
    /// Report the ids of test runs that reference the group
    pub collect_affected_test_runs: bool,
}

impl CaseForecastOptions {
    /// Options used by the bulk recompute: no propagation, collect runs instead.
    pub fn collect_only() -> Self {
        Self {
            skip_test_run_update: true,
            collect_affected_test_runs: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaseForecastOutcome {
    /// Every case that received the new forecast (empty if the case is gone)
    pub refreshed_case_ids: Vec<i32>,
    /// Test runs referencing the group, when requested
    pub affected_test_run_ids: Vec<i32>,
    pub forecast: ForecastPair,
}

struct GroupRefresh {
    member_ids: Vec<i32>,
    forecast: ForecastPair,
}

/// Recompute and store the forecast of a case's link-group.
pub async fn update_repository_case_forecast<S>(
    store: &S,
    case_id: i32,
    options: CaseForecastOptions,
) -> AppResult<CaseForecastOutcome>
where
    S: ForecastStore + ?Sized,
{
    let Some(group) = refresh_case_group(store, case_id).await? else {
        return Ok(CaseForecastOutcome::default());
    };

    let wants_runs = !options.skip_test_run_update || options.collect_affected_test_runs;
    let test_run_ids = if wants_runs {
        store.test_run_ids_for_cases(&group.member_ids).await?
    } else {
        Vec::new()
    };

    if !options.skip_test_run_update {
        let refreshed: HashSet<i32> = group.member_ids.iter().copied().collect();
        for test_run_id in &test_run_ids {
            update_test_run_forecast(store, *test_run_id, Some(&refreshed)).await?;
        }
    }

    Ok(CaseForecastOutcome {
        refreshed_case_ids: group.member_ids,
        affected_test_run_ids: if options.collect_affected_test_runs {
            test_run_ids
        } else {
            Vec::new()
        },
        forecast: group.forecast,
    })
}

/// Recompute a test run's forecast from its untested cases.
///
/// Cases of the run that are not in `already_refreshed` are refreshed first
/// (without propagating back to test runs). Returns the stored pair.
pub async fn update_test_run_forecast<S>(
    store: &S,
    test_run_id: i32,
    already_refreshed: Option<&HashSet<i32>>,
) -> AppResult<ForecastPair>
where
    S: ForecastStore + ?Sized,
{
    let run_cases = store.test_run_cases(test_run_id).await?;

    let mut refreshed: HashSet<i32> = already_refreshed.cloned().unwrap_or_default();
    let mut refreshed_any = false;

    let case_ids: BTreeSet<i32> = run_cases.iter().map(|rc| rc.repository_case_id).collect();
    for case_id in case_ids {
        if refreshed.contains(&case_id) {
            continue;
        }

        match refresh_case_group(store, case_id).await? {
            Some(group) => {
                refreshed.extend(group.member_ids);
                refreshed_any = true;
            }
            None => {
                refreshed.insert(case_id);
            }
        }
    }

    // Refreshing changed case forecasts; read them again
    let run_cases = if refreshed_any {
        store.test_run_cases(test_run_id).await?
    } else {
        run_cases
    };

    let forecast = aggregate_run_forecast(&run_cases);
    store.update_test_run_forecast(test_run_id, forecast).await?;

    debug!(
        test_run_id,
        manual = ?forecast.manual,
        automated = ?forecast.automated,
        "Updated test run forecast"
    );

    Ok(forecast)
}

async fn refresh_case_group<S>(store: &S, case_id: i32) -> AppResult<Option<GroupRefresh>>
where
    S: ForecastStore + ?Sized,
{
    let links = store.find_direct_links(case_id).await?;

    let mut group_ids: BTreeSet<i32> = links.iter().filter_map(|l| l.other(case_id)).collect();
    group_ids.insert(case_id);
    let group_ids: Vec<i32> = group_ids.into_iter().collect();

    let cases = store.find_cases(&group_ids).await?;
    if !cases.iter().any(|c| c.id == case_id) {
        warn!("Repository case {} not found, skipping forecast update", case_id);
        return Ok(None);
    }

    let mut manual_ids = Vec::new();
    let mut automated_ids = Vec::new();
    for case in &cases {
        match case.source() {
            Some(CaseSource::Manual) => manual_ids.push(case.id),
            Some(CaseSource::Junit) => automated_ids.push(case.id),
            _ => debug!(case_id = case.id, source = %case.source, "No duration samples for case source"),
        }
    }

    let manual_samples = store.manual_elapsed_samples(&manual_ids).await?;
    let automated_samples = store.automated_time_samples(&automated_ids).await?;

    let forecast = ForecastPair::new(
        average_manual(&manual_samples),
        average_automated(&automated_samples),
    );

    let member_ids: Vec<i32> = cases.iter().map(|c| c.id).collect();
    store.update_case_forecasts(&member_ids, forecast).await?;

    debug!(
        case_id,
        group = ?member_ids,
        manual_samples = manual_samples.len(),
        automated_samples = automated_samples.len(),
        manual = ?forecast.manual,
        automated = ?forecast.automated,
        "Updated link-group forecast"
    );

    Ok(Some(GroupRefresh {
        member_ids,
        forecast,
    }))
}

/// Rounded arithmetic mean in whole seconds.
fn average_manual(samples: &[i32]) -> Option<i32> {
    if samples.is_empty() {
        return None;
    }
    let total: i64 = samples.iter().map(|s| i64::from(*s)).sum();
    Some((total as f64 / samples.len() as f64).round() as i32)
}

/// Mean rounded to millisecond precision.
fn average_automated(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let total: f64 = samples.iter().sum();
    Some(round_millis(total / samples.len() as f64))
}

fn round_millis(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Sum the forecasts of the cases that are still untested.
fn aggregate_run_forecast(run_cases: &[RunCaseForecast]) -> ForecastPair {
    let pending = run_cases.iter().filter(|rc| rc.is_untested());

    let (manual, automated) = pending.fold((None, None), |(manual, automated), rc| {
        let manual = match rc.forecast.manual {
            Some(m) => Some(manual.unwrap_or(0i32).saturating_add(m)),
            None => manual,
        };
        let automated = match rc.forecast.automated {
            Some(a) => Some(automated.unwrap_or(0.0f64) + a),
            None => automated,
        };
        (manual, automated)
    });

    ForecastPair::new(manual, automated.map(round_millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStore;

    /// Case 1 (manual, 10s and 20s) linked to case 2 (JUnit, 1.5s).
    fn linked_pair() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_case(1, CaseSource::Manual);
        store.add_case(2, CaseSource::Junit);
        store.link(1, 2);

        store.add_run(100);
        let rc = store.add_run_case(100, 1, Some("passed"));
        store.add_manual_result(rc, Some(10));
        store.add_manual_result(rc, Some(20));
        store.add_junit_result(2, Some(1.5));
        store
    }

    #[test]
    fn test_averages() {
        assert_eq!(average_manual(&[]), None);
        assert_eq!(average_manual(&[10, 20]), Some(15));
        assert_eq!(average_manual(&[10, 11]), Some(11));
        assert_eq!(average_automated(&[]), None);
        assert_eq!(average_automated(&[1.0, 2.0, 2.0]), Some(1.667));
    }

    #[test]
    fn test_aggregate_ignores_tested_cases() {
        let run_cases = vec![
            RunCaseForecast {
                repository_case_id: 1,
                status: None,
                forecast: ForecastPair::new(Some(15), Some(1.5)),
            },
            RunCaseForecast {
                repository_case_id: 2,
                status: Some("untested".into()),
                forecast: ForecastPair::new(None, Some(0.1114)),
            },
            RunCaseForecast {
                repository_case_id: 3,
                status: Some("failed".into()),
                forecast: ForecastPair::new(Some(100), Some(9.0)),
            },
        ];

        assert_eq!(
            aggregate_run_forecast(&run_cases),
            ForecastPair::new(Some(15), Some(1.611))
        );
        assert_eq!(aggregate_run_forecast(&[]), ForecastPair::default());
    }

    #[tokio::test]
    async fn test_group_members_share_forecast() {
        let store = linked_pair();

        let outcome = update_repository_case_forecast(&store, 1, CaseForecastOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.refreshed_case_ids, vec![1, 2]);
        let expected = ForecastPair::new(Some(15), Some(1.5));
        assert_eq!(store.case_forecast(1), Some(expected));
        assert_eq!(store.case_forecast(2), Some(expected));

        // Starting from the other end of the link gives the same values
        update_repository_case_forecast(&store, 2, CaseForecastOptions::default())
            .await
            .unwrap();
        assert_eq!(store.case_forecast(1), Some(expected));
        assert_eq!(store.case_forecast(2), Some(expected));
    }

    #[tokio::test]
    async fn test_deleted_and_foreign_links_are_ignored() {
        let store = linked_pair();
        store.add_case(3, CaseSource::Manual);
        store.add_case(4, CaseSource::Mocha);
        store.link_with_type(1, 3, "RELATED");
        store.link(4, 1);
        store.delete_link(4, 1);
        store.add_junit_result(4, Some(100.0));

        let outcome = update_repository_case_forecast(&store, 1, CaseForecastOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.refreshed_case_ids, vec![1, 2]);
        assert_eq!(store.case_forecast(3), Some(ForecastPair::default()));
        assert_eq!(store.case_forecast(4), Some(ForecastPair::default()));
    }

    #[tokio::test]
    async fn test_only_junit_cases_supply_automated_samples() {
        let store = linked_pair();
        store.add_case(3, CaseSource::Testng);
        store.link(1, 3);
        store.add_junit_result(3, Some(100.0));

        let outcome = update_repository_case_forecast(&store, 1, CaseForecastOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.refreshed_case_ids, vec![1, 2, 3]);
        let expected = ForecastPair::new(Some(15), Some(1.5));
        for id in 1..=3 {
            assert_eq!(store.case_forecast(id), Some(expected), "case {}", id);
        }
    }

    #[tokio::test]
    async fn test_case_without_samples_clears_forecast() {
        let store = MemoryStore::new();
        store.add_case(7, CaseSource::Manual);
        store.set_case_forecast(7, ForecastPair::new(Some(99), Some(9.9)));

        update_repository_case_forecast(&store, 7, CaseForecastOptions::default())
            .await
            .unwrap();

        assert_eq!(store.case_forecast(7), Some(ForecastPair::default()));
    }

    #[tokio::test]
    async fn test_missing_case_is_skipped() {
        let store = linked_pair();
        store.delete_case(1);

        let outcome = update_repository_case_forecast(&store, 1, CaseForecastOptions::default())
            .await
            .unwrap();
        assert!(outcome.refreshed_case_ids.is_empty());

        let outcome = update_repository_case_forecast(&store, 999, CaseForecastOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome, CaseForecastOutcome::default());
    }

    #[tokio::test]
    async fn test_collect_only_reports_runs_without_updating_them() {
        let store = linked_pair();
        store.add_run(200);
        store.add_run_case(200, 2, None);

        let outcome = update_repository_case_forecast(&store, 1, CaseForecastOptions::collect_only())
            .await
            .unwrap();

        assert_eq!(outcome.affected_test_run_ids, vec![100, 200]);
        assert_eq!(store.run_forecast(200), Some(ForecastPair::default()));
    }

    #[tokio::test]
    async fn test_propagation_updates_runs_once_per_case() {
        let store = linked_pair();
        store.add_run(200);
        store.add_run_case(200, 2, None);

        update_repository_case_forecast(&store, 1, CaseForecastOptions::default())
            .await
            .unwrap();

        assert_eq!(
            store.run_forecast(200),
            Some(ForecastPair::new(Some(15), Some(1.5)))
        );
        // Group refreshed once, runs reuse it
        assert_eq!(store.case_write_count(1), 1);
        assert_eq!(store.case_write_count(2), 1);
    }

    #[tokio::test]
    async fn test_run_refresh_skips_group_members_seen_on_the_way() {
        let store = linked_pair();
        store.add_run(300);
        store.add_run_case(300, 1, None);
        store.add_run_case(300, 2, None);

        let forecast = update_test_run_forecast(&store, 300, None).await.unwrap();

        // Both cases are untested and carry the group forecast
        assert_eq!(forecast, ForecastPair::new(Some(30), Some(3.0)));
        assert_eq!(store.case_write_count(1), 1);
        assert_eq!(store.case_write_count(2), 1);
    }
}
