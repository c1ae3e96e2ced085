use std::collections::{BTreeMap, HashMap};
#[cfg(test)]
use std::collections::VecDeque;
#[cfg(test)]
use std::sync::Mutex;
use std::sync::RwLock;

use chrono::Utc;
#[cfg(test)]
use tracing::debug;

use revsync_core::{ExpectedVersion, RecordId};
use revsync_revenue::{PeriodKey, RevenuePatch, RevenueRecord};

use super::r#trait::{RepositoryError, RevenueRepository};

/// Failure to return from an upcoming write instead of performing it.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    /// As if another writer had bumped the row version first.
    Conflict,
    /// As if the store were unreachable.
    Unexpected,
}

#[derive(Debug, Default)]
struct Tables {
    records: HashMap<RecordId, RevenueRecord>,
    by_period: BTreeMap<PeriodKey, RecordId>,
}

/// In-memory revenue repository.
///
/// Intended for tests, the replay tool and single-process setups. In test
/// builds, writes can be scripted to fail (one-shot, in order) to exercise
/// retry and partial failure paths.
#[derive(Debug, Default)]
pub struct InMemoryRevenueRepository {
    tables: RwLock<Tables>,
    /// Scripted outcomes for upcoming writes; `None` lets a write through.
    #[cfg(test)]
    faults: Mutex<VecDeque<Option<InjectedFault>>>,
    #[cfg(test)]
    writes: Mutex<u64>,
}

impl InMemoryRevenueRepository {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(not(test))]
    fn take_fault(&self) -> Result<(), RepositoryError> {
        Ok(())
    }

    #[cfg(not(test))]
    fn record_write(&self) {}

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, RepositoryError> {
        self.tables
            .read()
            .map_err(|_| RepositoryError::Unexpected("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, RepositoryError> {
        self.tables
            .write()
            .map_err(|_| RepositoryError::Unexpected("lock poisoned".to_string()))
    }
}

#[cfg(test)]
impl InMemoryRevenueRepository {
    /// Fail the next unscripted write with `fault`.
    pub fn inject_fault(&self, fault: InjectedFault) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push_back(Some(fault));
        }
    }

    /// Let the next unscripted write succeed. Used to place a fault on a
    /// later write, e.g. the second step of a period move.
    pub fn pass_next_write(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push_back(None);
        }
    }

    /// Number of writes that reached the tables.
    pub fn write_count(&self) -> u64 {
        self.writes.lock().map(|w| *w).unwrap_or(0)
    }

    fn take_fault(&self) -> Result<(), RepositoryError> {
        let mut faults = self
            .faults
            .lock()
            .map_err(|_| RepositoryError::Unexpected("fault script lock poisoned".to_string()))?;

        match faults.pop_front().flatten() {
            None => Ok(()),
            Some(fault) => {
                debug!(?fault, "injected repository fault");
                match fault {
                    InjectedFault::Conflict => Err(RepositoryError::Conflict(
                        "injected concurrent modification".to_string(),
                    )),
                    InjectedFault::Unexpected => Err(RepositoryError::Unexpected(
                        "injected storage failure".to_string(),
                    )),
                }
            }
        }
    }

    fn record_write(&self) {
        if let Ok(mut w) = self.writes.lock() {
            *w += 1;
        }
    }
}

impl RevenueRepository for InMemoryRevenueRepository {
    fn find_by_period(&self, period: PeriodKey) -> Result<Option<RevenueRecord>, RepositoryError> {
        let tables = self.read()?;
        Ok(tables
            .by_period
            .get(&period)
            .and_then(|id| tables.records.get(id))
            .cloned())
    }

    fn find_by_id(&self, id: RecordId) -> Result<Option<RevenueRecord>, RepositoryError> {
        Ok(self.read()?.records.get(&id).cloned())
    }

    fn create(&self, period: PeriodKey, patch: RevenuePatch) -> Result<RevenueRecord, RepositoryError> {
        self.take_fault()?;
        let mut tables = self.write()?;

        if tables.by_period.contains_key(&period) {
            return Err(RepositoryError::Conflict(format!(
                "a revenue record for {period} already exists"
            )));
        }

        let record = RevenueRecord::new(period, patch, Utc::now());
        tables.by_period.insert(period, record.id);
        tables.records.insert(record.id, record.clone());
        drop(tables);

        self.record_write();
        Ok(record)
    }

    fn update(
        &self,
        id: RecordId,
        patch: RevenuePatch,
        expected_version: ExpectedVersion,
    ) -> Result<RevenueRecord, RepositoryError> {
        self.take_fault()?;
        let mut tables = self.write()?;

        let record = tables
            .records
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;

        expected_version
            .check(record.version)
            .map_err(|err| RepositoryError::Conflict(err.to_string()))?;

        record.apply_patch(patch, Utc::now());
        let updated = record.clone();
        drop(tables);

        self.record_write();
        Ok(updated)
    }

    fn upsert_by_period(&self, period: PeriodKey, patch: RevenuePatch) -> Result<RevenueRecord, RepositoryError> {
        self.take_fault()?;
        let mut tables = self.write()?;

        let existing = tables.by_period.get(&period).copied();
        let record = match existing.and_then(|id| tables.records.get_mut(&id)) {
            Some(record) => {
                record.apply_patch(patch, Utc::now());
                record.clone()
            }
            None => {
                let record = RevenueRecord::new(period, patch, Utc::now());
                tables.by_period.insert(period, record.id);
                tables.records.insert(record.id, record.clone());
                record
            }
        };
        drop(tables);

        self.record_write();
        Ok(record)
    }

    fn list_by_date_range(&self, from: PeriodKey, to: PeriodKey) -> Result<Vec<RevenueRecord>, RepositoryError> {
        if from > to {
            return Ok(Vec::new());
        }
        let tables = self.read()?;
        Ok(tables
            .by_period
            .range(from..=to)
            .filter_map(|(_, id)| tables.records.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revsync_revenue::{CalculationSource, RevenueTotals};

    fn month(raw: &str) -> PeriodKey {
        PeriodKey::parse_month(raw).unwrap()
    }

    fn patch(paid: i64, pending: i64, count: i64) -> RevenuePatch {
        RevenuePatch::new(
            RevenueTotals::new(paid, pending, count),
            CalculationSource::InvoiceEvent,
        )
    }

    #[test]
    fn create_rejects_duplicate_period() {
        let repo = InMemoryRevenueRepository::new();
        repo.create(month("2024-03"), patch(100, 0, 1)).unwrap();

        let err = repo.create(month("2024-03"), patch(5, 0, 1)).unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[test]
    fn update_checks_version_and_bumps_it() {
        let repo = InMemoryRevenueRepository::new();
        let created = repo.create(month("2024-03"), patch(100, 0, 1)).unwrap();

        let updated = repo
            .update(created.id, patch(150, 0, 1), ExpectedVersion::Exact(1))
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.totals.total_amount, 150);

        let err = repo
            .update(created.id, patch(1, 0, 1), ExpectedVersion::Exact(1))
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert_eq!(repo.find_by_id(created.id).unwrap().unwrap().totals.total_amount, 150);
    }

    #[test]
    fn update_of_unknown_id_is_not_found() {
        let repo = InMemoryRevenueRepository::new();
        let err = repo
            .update(RecordId::new(), patch(1, 0, 1), ExpectedVersion::Any)
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[test]
    fn upsert_creates_then_overwrites() {
        let repo = InMemoryRevenueRepository::new();
        let first = repo.upsert_by_period(month("2024-03"), patch(10, 0, 1)).unwrap();
        let second = repo.upsert_by_period(month("2024-03"), patch(20, 5, 2)).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.version, 2);
        assert_eq!(second.totals, RevenueTotals::new(20, 5, 2));
    }

    #[test]
    fn range_is_inclusive_and_ascending() {
        let repo = InMemoryRevenueRepository::new();
        for m in ["2024-05", "2024-02", "2024-03", "2024-04"] {
            repo.create(month(m), patch(1, 0, 1)).unwrap();
        }

        let periods: Vec<String> = repo
            .list_by_date_range(month("2024-03"), month("2024-05"))
            .unwrap()
            .iter()
            .map(|r| r.period.to_string())
            .collect();
        assert_eq!(periods, vec!["2024-03", "2024-04", "2024-05"]);

        assert!(repo
            .list_by_date_range(month("2024-05"), month("2024-03"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn scripted_faults_fire_once_in_order() {
        let repo = InMemoryRevenueRepository::new();
        repo.pass_next_write();
        repo.inject_fault(InjectedFault::Unexpected);

        repo.create(month("2024-03"), patch(1, 0, 1)).unwrap();
        let err = repo.create(month("2024-04"), patch(1, 0, 1)).unwrap_err();
        assert!(matches!(err, RepositoryError::Unexpected(_)));
        repo.create(month("2024-04"), patch(1, 0, 1)).unwrap();

        assert_eq!(repo.write_count(), 2);
    }
}
