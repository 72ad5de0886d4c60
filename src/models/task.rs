use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Serde helpers storing `chrono` datetimes as native BSON datetimes so
/// that date-range filters compare server-side.
pub mod bson_datetime {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        bson::DateTime::from_millis(value.timestamp_millis()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = bson::DateTime::deserialize(deserializer)?;
        DateTime::<Utc>::from_timestamp_millis(raw.timestamp_millis())
            .ok_or_else(|| serde::de::Error::custom("datetime out of range"))
    }
}

pub mod bson_datetime_option {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        value
            .map(|dt| bson::DateTime::from_millis(dt.timestamp_millis()))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<bson::DateTime>::deserialize(deserializer)?;
        raw.map(|dt| {
            DateTime::<Utc>::from_timestamp_millis(dt.timestamp_millis())
                .ok_or_else(|| serde::de::Error::custom("datetime out of range"))
        })
        .transpose()
    }
}

/// Task status. The string forms ("Not Started", "Running", "On Hold",
/// "Completed") are the stored and wire representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "Not Started")]
    NotStarted,
    #[serde(rename = "Running")]
    Running,
    #[serde(rename = "On Hold")]
    OnHold,
    #[serde(rename = "Completed")]
    Completed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "Not Started",
            TaskStatus::Running => "Running",
            TaskStatus::OnHold => "On Hold",
            TaskStatus::Completed => "Completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Not Started" => Some(TaskStatus::NotStarted),
            "Running" => Some(TaskStatus::Running),
            "On Hold" => Some(TaskStatus::OnHold),
            "Completed" => Some(TaskStatus::Completed),
            _ => None,
        }
    }

    /// Rank used by the default sort: active work first, finished work
    /// last. Unknown stored statuses rank 5 at the query layer.
    pub fn priority_rank(self) -> i32 {
        match self {
            TaskStatus::Running => 1,
            TaskStatus::OnHold => 2,
            TaskStatus::NotStarted => 3,
            TaskStatus::Completed => 4,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TaskLink {
    pub url: String,
    #[serde(default)]
    pub label: String,
}

/// Single last-write pointer, overwritten wholesale on every mutation.
/// Not a history log.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LastUpdated {
    #[serde(default)]
    pub updated_by: Option<ObjectId>,
    #[serde(with = "bson_datetime")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(with = "bson_datetime")]
    pub start_date: DateTime<Utc>,
    #[serde(with = "bson_datetime")]
    pub due_date: DateTime<Utc>,
    #[serde(default, with = "bson_datetime_option")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub links: Vec<TaskLink>,
    pub total_task_count: i32,
    pub total_completed_task: i32,
    pub status: TaskStatus,
    #[serde(default)]
    pub assigned_to: Vec<ObjectId>,
    pub last_updated: LastUpdated,
    pub created_by: ObjectId,
    #[serde(with = "bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Write-time invariant checks. Runs before the transition rules on
    /// every save.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.title.trim().is_empty() {
            return Err(ApiError::validation("Title is required"));
        }
        if self.total_task_count < 1 {
            return Err(ApiError::validation("Total task count must be at least 1"));
        }
        if self.total_completed_task < 0 {
            return Err(ApiError::validation("Completed task count cannot be negative"));
        }
        if self.total_completed_task > self.total_task_count {
            return Err(ApiError::validation(
                "Total completed tasks cannot exceed total task count",
            ));
        }
        Ok(())
    }

    /// Status state machine, evaluated on every save after caller edits
    /// are applied. Rule order is load-bearing: a count jumping straight
    /// from 0 to the total must land on Completed, not Running.
    pub fn apply_status_rules(&mut self, now: DateTime<Utc>) {
        // Partial progress while Not Started / On Hold implies active work,
        // even when the caller submitted one of those statuses alongside it.
        if self.total_completed_task > 0
            && matches!(self.status, TaskStatus::NotStarted | TaskStatus::OnHold)
            && self.total_completed_task < self.total_task_count
        {
            self.status = TaskStatus::Running;
        }

        // Full count forces Completed regardless of the requested status.
        // endDate is stamped once and never advanced by later saves.
        if self.total_completed_task == self.total_task_count && self.total_task_count > 0 {
            self.status = TaskStatus::Completed;
            if self.end_date.is_none() {
                self.end_date = Some(now);
            }
        }
    }

    /// Overwrites the last-write pointer and bumps `updatedAt`.
    pub fn touch(&mut self, by: ObjectId, action: &str, now: DateTime<Utc>) {
        self.last_updated = LastUpdated {
            updated_by: Some(by),
            updated_at: now,
            action: action.to_string(),
        };
        self.updated_at = now;
    }

    pub fn completion_percentage(&self) -> i64 {
        if self.total_task_count == 0 {
            return 0;
        }
        (100.0 * f64::from(self.total_completed_task) / f64::from(self.total_task_count)).round()
            as i64
    }

    pub fn duration_days(&self) -> Option<i64> {
        self.end_date
            .map(|end| (end - self.start_date).num_days())
    }

    pub fn is_assigned(&self, user_id: &ObjectId) -> bool {
        self.assigned_to.iter().any(|id| id == user_id)
    }
}
