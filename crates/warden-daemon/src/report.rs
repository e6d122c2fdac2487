use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use warden_scheduler::StatusRecord;

/// JSON view of a job's status record for `warden status`.
pub fn status_json(job: &str, status: Option<&StatusRecord>) -> Value {
    let Some(status) = status else {
        return json!({ "job": job, "status": null });
    };
    json!({
        "job": job,
        "status": {
            "last_scheduled_time": timestamp(status.last_scheduled_time),
            "last_actual_start_time": timestamp(status.last_actual_start_time),
            "last_actual_completion_time": timestamp(status.last_actual_completion_time),
        }
    })
}

fn timestamp(time: Option<DateTime<Utc>>) -> Value {
    match time {
        Some(t) => json!({
            "ms": t.timestamp_millis(),
            "rfc3339": t.to_rfc3339_opts(SecondsFormat::Millis, true),
        }),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_job_reports_null_status() {
        let v = status_json("ghost", None);
        assert_eq!(v["job"], "ghost");
        assert!(v["status"].is_null());
    }

    #[test]
    fn absent_fields_are_null() {
        let record = StatusRecord {
            last_scheduled_time: DateTime::from_timestamp_millis(1_700_000_000_000),
            ..Default::default()
        };
        let v = status_json("nightly", Some(&record));
        assert_eq!(v["status"]["last_scheduled_time"]["ms"], 1_700_000_000_000i64);
        assert_eq!(
            v["status"]["last_scheduled_time"]["rfc3339"],
            "2023-11-14T22:13:20.000Z"
        );
        assert!(v["status"]["last_actual_start_time"].is_null());
        assert!(v["status"]["last_actual_completion_time"].is_null());
    }
}
