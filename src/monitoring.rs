// Operation tracking for replay runs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

/// Status of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Completed,
    Failed,
}

/// Performance metrics for an operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub operation_id: String,
    pub operation_name: String,
    pub resource: String,
    pub status: OperationStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub records_processed: Option<u64>,
    pub throughput: Option<f64>, // records per second
}

/// Tracks a single operation from start to completion
#[derive(Debug)]
pub struct OperationTracker {
    pub operation_id: String,
    pub operation_name: String,
    pub resource: String,
    pub start_time: DateTime<Utc>,
}

impl OperationTracker {
    /// Start tracking `operation_name` acting on `resource`
    pub fn start(operation_name: &str, resource: &str) -> Self {
        let tracker = Self {
            operation_id: Uuid::new_v4().to_string(),
            operation_name: operation_name.to_string(),
            resource: resource.to_string(),
            start_time: Utc::now(),
        };

        info!(
            operation_id = %tracker.operation_id,
            operation_name = operation_name,
            resource = resource,
            "Started operation tracking"
        );

        tracker
    }

    pub fn elapsed_ms(&self) -> u64 {
        Utc::now()
            .signed_duration_since(self.start_time)
            .num_milliseconds()
            .max(0) as u64
    }

    /// Mark operation as successfully completed
    pub fn complete_success(self, records_processed: u64) -> PerformanceMetric {
        let metric = self.finish(OperationStatus::Completed, Some(records_processed));

        info!(
            operation_id = %metric.operation_id,
            operation_name = %metric.operation_name,
            resource = %metric.resource,
            duration_ms = metric.duration_ms,
            records = records_processed,
            "Operation completed successfully"
        );

        metric
    }

    /// Mark operation as failed
    pub fn complete_failure(self, error: &str) -> PerformanceMetric {
        let metric = self.finish(OperationStatus::Failed, None);

        error!(
            operation_id = %metric.operation_id,
            operation_name = %metric.operation_name,
            resource = %metric.resource,
            duration_ms = metric.duration_ms,
            error = error,
            "Operation failed"
        );

        metric
    }

    fn finish(self, status: OperationStatus, records_processed: Option<u64>) -> PerformanceMetric {
        let duration_ms = self.elapsed_ms();
        let throughput = match records_processed {
            Some(records) if duration_ms > 0 => Some(records as f64 / (duration_ms as f64 / 1000.0)),
            _ => None,
        };

        PerformanceMetric {
            operation_id: self.operation_id,
            operation_name: self.operation_name,
            resource: self.resource,
            status,
            start_time: self.start_time,
            end_time: Some(Utc::now()),
            duration_ms: Some(duration_ms),
            records_processed,
            throughput,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successful_operation_metric() {
        let tracker = OperationTracker::start("replay_sql_file", "seed.sql");
        let id = tracker.operation_id.clone();

        let metric = tracker.complete_success(12);
        assert_eq!(metric.operation_id, id);
        assert_eq!(metric.status, OperationStatus::Completed);
        assert_eq!(metric.resource, "seed.sql");
        assert_eq!(metric.records_processed, Some(12));
        assert!(metric.end_time.is_some());
        assert!(metric.end_time.unwrap() >= metric.start_time);
    }

    #[test]
    fn test_failed_operation_metric() {
        let metric = OperationTracker::start("replay_sql_file", "broken.sql").complete_failure("boom");
        assert_eq!(metric.status, OperationStatus::Failed);
        assert!(metric.records_processed.is_none());
        assert!(metric.throughput.is_none());
        assert!(metric.duration_ms.is_some());
    }

    #[test]
    fn test_operation_ids_are_unique() {
        let a = OperationTracker::start("a", "x");
        let b = OperationTracker::start("a", "x");
        assert_ne!(a.operation_id, b.operation_id);
    }
}
