use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, Utc};
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use serde::Serialize;

use crate::models::task::{Task, TaskStatus};

/// Inclusive date window. `dateTo` is extended to the last instant of
/// its day so a range of whole dates behaves as users expect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn is_empty(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, value: DateTime<Utc>) -> bool {
        if let Some(from) = self.from {
            if value < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if value > to {
                return false;
            }
        }
        true
    }

    /// `{ $gte: ..., $lte: ... }` bounds document for a date field.
    pub fn bounds(&self) -> Document {
        let mut bounds = Document::new();
        if let Some(from) = self.from {
            bounds.insert("$gte", bson_date(from));
        }
        if let Some(to) = self.to {
            bounds.insert("$lte", bson_date(to));
        }
        bounds
    }
}

pub fn bson_date(value: DateTime<Utc>) -> Bson {
    Bson::DateTime(mongodb::bson::DateTime::from_millis(value.timestamp_millis()))
}

/// Accepts plain dates ("2024-01-15") or full RFC 3339 timestamps.
/// A `dateTo` value is always widened to the last instant of its UTC
/// day, whichever form it arrived in. Malformed input yields None; the
/// filter condition is simply not applied (tolerant path, unlike the
/// strict creation/update checks).
fn parse_date(value: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    let date = if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        let utc = parsed.with_timezone(&Utc);
        if !end_of_day {
            return Some(utc);
        }
        utc.date_naive()
    } else {
        value.parse::<NaiveDate>().ok()?
    };
    let time = if end_of_day {
        date.and_hms_milli_opt(23, 59, 59, 999)?
    } else {
        date.and_hms_opt(0, 0, 0)?
    };
    Some(time.and_utc())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Title,
    StartDate,
    DueDate,
    UpdatedAt,
    CreatedAt,
}

impl SortField {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "title" => Some(SortField::Title),
            "startDate" => Some(SortField::StartDate),
            "dueDate" => Some(SortField::DueDate),
            "updatedAt" => Some(SortField::UpdatedAt),
            "createdAt" => Some(SortField::CreatedAt),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            SortField::Title => "title",
            SortField::StartDate => "startDate",
            SortField::DueDate => "dueDate",
            SortField::UpdatedAt => "updatedAt",
            SortField::CreatedAt => "createdAt",
        }
    }
}

/// Ordering policy. The default ranks active work first and finished
/// work last, tie-broken by most recent update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortSpec {
    StatusPriority,
    Field { field: SortField, ascending: bool },
}

impl Default for SortSpec {
    fn default() -> Self {
        SortSpec::StatusPriority
    }
}

impl SortSpec {
    /// Unknown `sortBy` values fall back silently to the default mode.
    pub fn from_params(sort_by: Option<&str>, sort_order: Option<&str>) -> Self {
        let ascending = sort_order == Some("asc");
        match sort_by {
            None | Some("statusPriority") => SortSpec::StatusPriority,
            Some(field) => match SortField::parse(field) {
                Some(field) => SortSpec::Field { field, ascending },
                None => SortSpec::StatusPriority,
            },
        }
    }

    /// Aggregation stages implementing this ordering. Status-priority
    /// ranks via a computed field; stored statuses outside the known set
    /// sink to the bottom.
    pub fn stages(&self) -> Vec<Document> {
        match self {
            SortSpec::StatusPriority => vec![
                doc! {
                    "$addFields": {
                        "statusOrder": {
                            "$switch": {
                                "branches": [
                                    { "case": { "$eq": ["$status", "Running"] }, "then": 1 },
                                    { "case": { "$eq": ["$status", "On Hold"] }, "then": 2 },
                                    { "case": { "$eq": ["$status", "Not Started"] }, "then": 3 },
                                    { "case": { "$eq": ["$status", "Completed"] }, "then": 4 },
                                ],
                                "default": 5,
                            }
                        }
                    }
                },
                doc! { "$sort": { "statusOrder": 1, "updatedAt": -1 } },
            ],
            SortSpec::Field { field, ascending } => {
                let dir = if *ascending { 1 } else { -1 };
                let key = field.key();
                vec![doc! { "$sort": { key: dir } }]
            }
        }
    }

    /// In-memory equivalent of `stages`, shared by the tests that pin
    /// the ordering contract.
    pub fn compare(&self, a: &Task, b: &Task) -> Ordering {
        match self {
            SortSpec::StatusPriority => a
                .status
                .priority_rank()
                .cmp(&b.status.priority_rank())
                .then(b.updated_at.cmp(&a.updated_at)),
            SortSpec::Field { field, ascending } => {
                let ordering = match field {
                    SortField::Title => a.title.cmp(&b.title),
                    SortField::StartDate => a.start_date.cmp(&b.start_date),
                    SortField::DueDate => a.due_date.cmp(&b.due_date),
                    SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
                    SortField::CreatedAt => a.created_at.cmp(&b.created_at),
                };
                if *ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination { page: 1, limit: 10 }
    }
}

impl Pagination {
    fn from_params(page: Option<&str>, limit: Option<&str>) -> Self {
        let page = page.and_then(|p| p.parse().ok()).filter(|&p| p >= 1).unwrap_or(1);
        let limit = limit.and_then(|l| l.parse().ok()).filter(|&l| l >= 1).unwrap_or(10);
        Pagination { page, limit }
    }

    /// Saturates rather than overflows: an absurd page number yields an
    /// empty page, not a panic or a negative `$skip`.
    pub fn skip(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }

    /// `$skip` / `$limit` stages for the listing pipeline, clamped to
    /// the signed range the stages accept.
    pub fn stages(&self) -> Vec<Document> {
        let skip = self.skip().min(i64::MAX as u64) as i64;
        let limit = self.limit.min(i64::MAX as u64) as i64;
        vec![doc! { "$skip": skip }, doc! { "$limit": limit }]
    }
}

/// Pagination metadata returned alongside every listing. `total` is a
/// full count over the filtered set, independent of the page slice.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PageInfo {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub pages: u64,
}

impl PageInfo {
    pub fn new(pagination: Pagination, total: u64) -> Self {
        PageInfo {
            page: pagination.page,
            limit: pagination.limit,
            total,
            pages: total.div_ceil(pagination.limit),
        }
    }
}

/// Parsed listing query. `status` and `assignedTo` are repeatable keys,
/// which `web::Query` cannot express, so this parses the raw query
/// string instead. Unparseable statuses, ids, and dates are dropped.
#[derive(Debug, Default, Clone)]
pub struct TaskListQuery {
    pub status: Vec<TaskStatus>,
    pub assigned_to: Vec<ObjectId>,
    pub search: Option<String>,
    pub date_range: DateRange,
    pub pagination: Pagination,
    pub sort: SortSpec,
}

impl TaskListQuery {
    pub fn parse(query_string: &str) -> Self {
        let pairs: Vec<(String, String)> =
            serde_urlencoded::from_str(query_string).unwrap_or_default();

        let mut status = Vec::new();
        let mut assigned_to = Vec::new();
        let mut search = None;
        let mut date_from = None;
        let mut date_to = None;
        let mut page = None;
        let mut limit = None;
        let mut sort_by = None;
        let mut sort_order = None;

        for (key, value) in pairs {
            match key.as_str() {
                "status" => {
                    if let Some(parsed) = TaskStatus::parse(&value) {
                        status.push(parsed);
                    }
                }
                "assignedTo" => {
                    if let Ok(id) = ObjectId::parse_str(&value) {
                        assigned_to.push(id);
                    }
                }
                "search" => {
                    if !value.is_empty() {
                        search = Some(value);
                    }
                }
                "dateFrom" => date_from = parse_date(&value, false),
                "dateTo" => date_to = parse_date(&value, true),
                "page" => page = Some(value),
                "limit" => limit = Some(value),
                "sortBy" => sort_by = Some(value),
                "sortOrder" => sort_order = Some(value),
                _ => {}
            }
        }

        TaskListQuery {
            status,
            assigned_to,
            search,
            date_range: DateRange {
                from: date_from,
                to: date_to,
            },
            pagination: Pagination::from_params(page.as_deref(), limit.as_deref()),
            sort: SortSpec::from_params(sort_by.as_deref(), sort_order.as_deref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::tests::{date, sample_task};
    use chrono::TimeZone;

    #[test]
    fn parses_repeated_keys_and_drops_junk() {
        let query = TaskListQuery::parse(
            "status=Running&status=Completed&status=Bogus&assignedTo=nothex&search=import&page=2&limit=5",
        );
        assert_eq!(query.status, vec![TaskStatus::Running, TaskStatus::Completed]);
        assert!(query.assigned_to.is_empty());
        assert_eq!(query.search.as_deref(), Some("import"));
        assert_eq!(query.pagination, Pagination { page: 2, limit: 5 });
    }

    #[test]
    fn date_to_extends_to_end_of_day() {
        let query = TaskListQuery::parse("dateFrom=2024-01-01&dateTo=2024-01-10");
        assert_eq!(query.date_range.from, Some(date(2024, 1, 1)));
        let to = query.date_range.to.unwrap();
        assert!(query.date_range.contains(date(2024, 1, 10)));
        assert!(to > date(2024, 1, 10));
        assert!(!query.date_range.contains(date(2024, 1, 11)));
    }

    #[test]
    fn timestamp_date_to_also_extends_to_end_of_day() {
        let query = TaskListQuery::parse("dateTo=2024-01-10T05:00:00Z");
        let to = query.date_range.to.unwrap();
        assert!(to > Utc.with_ymd_and_hms(2024, 1, 10, 22, 0, 0).unwrap());
        assert!(to < date(2024, 1, 11));
    }

    #[test]
    fn malformed_dates_are_dropped() {
        let query = TaskListQuery::parse("dateFrom=notadate&dateTo=");
        assert!(query.date_range.is_empty());
    }

    #[test]
    fn unknown_sort_field_falls_back_to_status_priority() {
        assert_eq!(
            SortSpec::from_params(Some("priority"), Some("asc")),
            SortSpec::StatusPriority
        );
        assert_eq!(SortSpec::from_params(None, None), SortSpec::StatusPriority);
        assert_eq!(
            SortSpec::from_params(Some("dueDate"), None),
            SortSpec::Field { field: SortField::DueDate, ascending: false }
        );
    }

    #[test]
    fn status_priority_orders_active_work_first() {
        let mut tasks: Vec<_> = [
            TaskStatus::Completed,
            TaskStatus::Running,
            TaskStatus::OnHold,
            TaskStatus::NotStarted,
        ]
        .into_iter()
        .map(|status| {
            let mut task = sample_task();
            task.status = status;
            task
        })
        .collect();

        tasks.sort_by(|a, b| SortSpec::StatusPriority.compare(a, b));
        let order: Vec<_> = tasks.iter().map(|t| t.status).collect();
        assert_eq!(
            order,
            vec![
                TaskStatus::Running,
                TaskStatus::OnHold,
                TaskStatus::NotStarted,
                TaskStatus::Completed,
            ]
        );
    }

    #[test]
    fn status_priority_tiebreak_is_most_recent_first() {
        let mut older = sample_task();
        older.updated_at = date(2024, 1, 2);
        let mut newer = sample_task();
        newer.updated_at = date(2024, 1, 5);

        let mut tasks = vec![older, newer];
        tasks.sort_by(|a, b| SortSpec::StatusPriority.compare(a, b));
        assert_eq!(tasks[0].updated_at, date(2024, 1, 5));
    }

    #[test]
    fn huge_page_number_saturates_instead_of_overflowing() {
        let query = TaskListQuery::parse("page=18446744073709551615&limit=10");
        assert_eq!(query.pagination.page, u64::MAX);
        assert_eq!(query.pagination.skip(), u64::MAX);

        let stages = query.pagination.stages();
        assert_eq!(stages[0].get_i64("$skip").unwrap(), i64::MAX);
        assert_eq!(stages[1].get_i64("$limit").unwrap(), 10);
    }

    #[test]
    fn page_info_counts_whole_filtered_set() {
        let info = PageInfo::new(Pagination { page: 2, limit: 5 }, 12);
        assert_eq!(info.total, 12);
        assert_eq!(info.pages, 3);
        assert_eq!(Pagination { page: 2, limit: 5 }.skip(), 5);
    }
}
