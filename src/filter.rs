use mongodb::bson::{doc, oid::ObjectId, Document};

use crate::models::task::{Task, TaskStatus};
use crate::query::{DateRange, TaskListQuery};

/// Which date field(s) a range condition tests. Chosen from the status
/// filter: finished tasks are reported by completion date, open tasks by
/// their schedule dates.
#[derive(Debug, Clone, PartialEq)]
pub enum DateMode {
    /// startDate or dueDate in range; endDate ignored.
    Schedule,
    /// endDate in range; schedule dates ignored (Completed-only filter).
    Completion,
    /// Completed tasks on endDate, everything else on schedule dates.
    Mixed,
}

/// One leaf of the filter conjunction. Kept storage-agnostic: the same
/// tree renders to a MongoDB match document and evaluates in memory.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// "My tasks": the caller appears in the assignee set.
    AssignedTo(ObjectId),
    StatusIn(Vec<TaskStatus>),
    /// Exclusive subset: the task's assignee set is non-empty and
    /// contains nobody outside the given set. Answers "fully handled by
    /// this group", not "touching this group".
    AssigneesWithin(Vec<ObjectId>),
    /// Case-insensitive substring over title or description.
    Search(String),
    Dates { range: DateRange, mode: DateMode },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub conditions: Vec<Condition>,
}

impl TaskFilter {
    /// Builds the conjunction from a parsed query. `caller` is set only
    /// in my-tasks mode, and takes precedence over any `assignedTo`
    /// list supplied alongside it.
    pub fn build(query: &TaskListQuery, caller: Option<ObjectId>) -> Self {
        let mut conditions = Vec::new();

        if let Some(caller) = caller {
            conditions.push(Condition::AssignedTo(caller));
        }

        if !query.status.is_empty() {
            conditions.push(Condition::StatusIn(query.status.clone()));
        }

        if caller.is_none() && !query.assigned_to.is_empty() {
            conditions.push(Condition::AssigneesWithin(query.assigned_to.clone()));
        }

        if !query.date_range.is_empty() {
            let completed_selected = query.status.iter().any(|s| *s == TaskStatus::Completed);
            let mode = if completed_selected && query.status.len() == 1 {
                DateMode::Completion
            } else if completed_selected {
                DateMode::Mixed
            } else {
                DateMode::Schedule
            };
            conditions.push(Condition::Dates {
                range: query.date_range.clone(),
                mode,
            });
        }

        if let Some(search) = &query.search {
            conditions.push(Condition::Search(search.clone()));
        }

        TaskFilter { conditions }
    }

    /// Renders the conjunction as a `$and` match document. An empty
    /// filter matches everything.
    pub fn to_document(&self) -> Document {
        let mut clauses: Vec<Document> = Vec::new();

        for condition in &self.conditions {
            match condition {
                Condition::AssignedTo(user_id) => {
                    clauses.push(doc! { "assignedTo": *user_id });
                }
                Condition::StatusIn(statuses) => {
                    let names: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
                    clauses.push(doc! { "status": { "$in": names } });
                }
                Condition::AssigneesWithin(ids) => {
                    // No assignee outside the set, and at least one assignee.
                    clauses.push(doc! {
                        "assignedTo": { "$not": { "$elemMatch": { "$nin": ids.clone() } } }
                    });
                    clauses.push(doc! { "assignedTo.0": { "$exists": true } });
                }
                Condition::Search(needle) => {
                    let pattern = regex::escape(needle);
                    clauses.push(doc! {
                        "$or": [
                            { "title": { "$regex": pattern.as_str(), "$options": "i" } },
                            { "description": { "$regex": pattern.as_str(), "$options": "i" } },
                        ]
                    });
                }
                Condition::Dates { range, mode } => {
                    let bounds = range.bounds();
                    match mode {
                        DateMode::Completion => {
                            clauses.push(doc! { "endDate": bounds });
                        }
                        DateMode::Schedule => {
                            clauses.push(doc! {
                                "$or": [
                                    { "startDate": bounds.clone() },
                                    { "dueDate": bounds },
                                ]
                            });
                        }
                        DateMode::Mixed => {
                            clauses.push(doc! {
                                "$or": [
                                    { "$and": [
                                        { "status": { "$ne": "Completed" } },
                                        { "$or": [
                                            { "startDate": bounds.clone() },
                                            { "dueDate": bounds.clone() },
                                        ] },
                                    ] },
                                    { "status": "Completed", "endDate": bounds },
                                ]
                            });
                        }
                    }
                }
            }
        }

        if clauses.is_empty() {
            Document::new()
        } else {
            doc! { "$and": clauses }
        }
    }

    /// In-memory evaluator with the same semantics as `to_document`.
    pub fn matches(&self, task: &Task) -> bool {
        self.conditions.iter().all(|condition| match condition {
            Condition::AssignedTo(user_id) => task.is_assigned(user_id),
            Condition::StatusIn(statuses) => statuses.contains(&task.status),
            Condition::AssigneesWithin(ids) => {
                !task.assigned_to.is_empty()
                    && task.assigned_to.iter().all(|assignee| ids.contains(assignee))
            }
            Condition::Search(needle) => {
                let needle = needle.to_lowercase();
                task.title.to_lowercase().contains(&needle)
                    || task.description.to_lowercase().contains(&needle)
            }
            Condition::Dates { range, mode } => {
                let schedule_hit =
                    range.contains(task.start_date) || range.contains(task.due_date);
                let completion_hit = task.end_date.is_some_and(|end| range.contains(end));
                match mode {
                    DateMode::Schedule => schedule_hit,
                    DateMode::Completion => completion_hit,
                    DateMode::Mixed => {
                        if task.status == TaskStatus::Completed {
                            completion_hit
                        } else {
                            schedule_hit
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::tests::{date, sample_task};

    fn query_with_assignees(ids: Vec<ObjectId>) -> TaskListQuery {
        TaskListQuery {
            assigned_to: ids,
            ..TaskListQuery::default()
        }
    }

    #[test]
    fn empty_query_matches_everything() {
        let filter = TaskFilter::build(&TaskListQuery::default(), None);
        assert!(filter.conditions.is_empty());
        assert_eq!(filter.to_document(), Document::new());
        assert!(filter.matches(&sample_task()));
    }

    #[test]
    fn assignee_filter_is_exclusive_subset() {
        let (a, b, c) = (ObjectId::new(), ObjectId::new(), ObjectId::new());
        let mut task = sample_task();
        task.assigned_to = vec![a, b];

        // Superset of the task's assignees: included.
        let filter = TaskFilter::build(&query_with_assignees(vec![a, b, c]), None);
        assert!(filter.matches(&task));

        // B is outside {A}: excluded.
        let filter = TaskFilter::build(&query_with_assignees(vec![a]), None);
        assert!(!filter.matches(&task));

        // Empty list means unfiltered, not "assigned to nobody".
        let filter = TaskFilter::build(&query_with_assignees(vec![]), None);
        assert!(filter.matches(&task));
    }

    #[test]
    fn assignee_filter_excludes_unassigned_tasks() {
        let task = sample_task();
        let filter = TaskFilter::build(&query_with_assignees(vec![ObjectId::new()]), None);
        assert!(!filter.matches(&task));
    }

    #[test]
    fn my_tasks_mode_overrides_assignee_list() {
        let caller = ObjectId::new();
        let query = query_with_assignees(vec![ObjectId::new()]);
        let filter = TaskFilter::build(&query, Some(caller));
        assert_eq!(filter.conditions, vec![Condition::AssignedTo(caller)]);

        let mut task = sample_task();
        task.assigned_to = vec![caller];
        assert!(filter.matches(&task));
    }

    #[test]
    fn completed_only_filter_tests_end_date() {
        let query = TaskListQuery::parse(
            "status=Completed&dateFrom=2024-01-01&dateTo=2024-01-10",
        );
        let filter = TaskFilter::build(&query, None);

        // Schedule dates inside the range, completion outside: excluded.
        let mut task = sample_task();
        task.status = TaskStatus::Completed;
        task.end_date = Some(date(2024, 1, 15));
        assert!(!filter.matches(&task));

        task.end_date = Some(date(2024, 1, 8));
        assert!(filter.matches(&task));
    }

    #[test]
    fn open_status_filter_tests_schedule_dates() {
        let query = TaskListQuery::parse(
            "status=Running&dateFrom=2024-01-01&dateTo=2024-01-10",
        );
        let filter = TaskFilter::build(&query, None);

        let mut task = sample_task();
        task.status = TaskStatus::Running;
        task.end_date = Some(date(2024, 1, 15)); // irrelevant for open statuses
        assert!(filter.matches(&task));

        task.start_date = date(2024, 2, 1);
        task.due_date = date(2024, 2, 10);
        assert!(!filter.matches(&task));
    }

    #[test]
    fn mixed_status_filter_splits_by_completion() {
        let query = TaskListQuery::parse(
            "status=Running&status=Completed&dateFrom=2024-01-01&dateTo=2024-01-10",
        );
        let filter = TaskFilter::build(&query, None);

        let mut completed = sample_task();
        completed.status = TaskStatus::Completed;
        completed.end_date = Some(date(2024, 1, 15));
        assert!(!filter.matches(&completed));

        let mut running = sample_task();
        running.status = TaskStatus::Running;
        assert!(filter.matches(&running));
    }

    #[test]
    fn no_date_range_skips_date_condition() {
        let query = TaskListQuery::parse("status=Completed");
        let filter = TaskFilter::build(&query, None);
        assert_eq!(filter.conditions.len(), 1);
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let query = TaskListQuery::parse("search=IMPORT");
        let filter = TaskFilter::build(&query, None);
        assert!(filter.matches(&sample_task()));

        let query = TaskListQuery::parse("search=shipping");
        let filter = TaskFilter::build(&query, None);
        assert!(!filter.matches(&sample_task()));
    }

    #[test]
    fn search_renders_escaped_regex() {
        let query = TaskListQuery::parse("search=a%2Bb");
        let filter = TaskFilter::build(&query, None);
        let rendered = filter.to_document();
        let clauses = rendered.get_array("$and").unwrap();
        let or = clauses[0].as_document().unwrap().get_array("$or").unwrap();
        let title = or[0].as_document().unwrap().get_document("title").unwrap();
        assert_eq!(title.get_str("$regex").unwrap(), "a\\+b");
    }
}
