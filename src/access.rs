use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::task::{Task, TaskLink, TaskStatus};

/// Update payload shared by the role-gated and admin update endpoints.
/// Absent fields are left untouched.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub links: Option<Vec<TaskLink>>,
    pub total_task_count: Option<i32>,
    pub total_completed_task: Option<i32>,
    pub status: Option<TaskStatus>,
    pub assigned_to: Option<Vec<ObjectId>>,
}

/// Applies a role-gated update. Admins may touch every field except
/// `endDate` (reserved for the admin endpoint); assigned members get the
/// restricted set, with restricted fields in their payload ignored
/// rather than rejected. The one explicit rejection: a member may not
/// move a task into Completed.
pub fn apply_update(
    task: &mut Task,
    patch: &UpdateTaskRequest,
    actor: &AuthUser,
) -> Result<&'static str, ApiError> {
    let is_admin = actor.role.is_admin();
    let is_assigned = task.is_assigned(&actor.id);

    if !is_admin && !is_assigned {
        return Err(ApiError::permission(
            "You don't have permission to edit this task",
        ));
    }

    if !is_admin {
        if let Some(TaskStatus::Completed) = patch.status {
            if task.status != TaskStatus::Completed {
                return Err(ApiError::permission(
                    "Only admin users can mark tasks as completed",
                ));
            }
        }
    }

    if is_admin {
        if let Some(title) = &patch.title {
            task.title = title.clone();
        }
        if let Some(start_date) = patch.start_date {
            task.start_date = start_date;
        }
        if let Some(due_date) = patch.due_date {
            task.due_date = due_date;
        }
        if let Some(links) = &patch.links {
            task.links = links.clone();
        }
        if let Some(total) = patch.total_task_count {
            task.total_task_count = total;
        }
        if let Some(assigned_to) = &patch.assigned_to {
            task.assigned_to = assigned_to.clone();
        }
    }

    // Writable by both actor classes.
    if let Some(description) = &patch.description {
        task.description = description.clone();
    }
    if let Some(completed) = patch.total_completed_task {
        task.total_completed_task = completed;
    }
    if let Some(status) = patch.status {
        task.status = status;
    }

    Ok("updated")
}

/// Unrestricted update for the admin endpoint, including `endDate` and
/// `assignedTo`.
pub fn apply_admin_update(task: &mut Task, patch: &UpdateTaskRequest) -> &'static str {
    if let Some(title) = &patch.title {
        task.title = title.clone();
    }
    if let Some(description) = &patch.description {
        task.description = description.clone();
    }
    if let Some(start_date) = patch.start_date {
        task.start_date = start_date;
    }
    if let Some(due_date) = patch.due_date {
        task.due_date = due_date;
    }
    if let Some(end_date) = patch.end_date {
        task.end_date = Some(end_date);
    }
    if let Some(links) = &patch.links {
        task.links = links.clone();
    }
    if let Some(total) = patch.total_task_count {
        task.total_task_count = total;
    }
    if let Some(completed) = patch.total_completed_task {
        task.total_completed_task = completed;
    }
    if let Some(status) = patch.status {
        task.status = status;
    }
    if let Some(assigned_to) = &patch.assigned_to {
        task.assigned_to = assigned_to.clone();
    }
    "updated by admin"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::tests::sample_task;
    use crate::models::user::Role;

    fn admin() -> AuthUser {
        AuthUser {
            id: ObjectId::new(),
            role: Role::Admin,
        }
    }

    fn assigned_member(task: &mut Task) -> AuthUser {
        let actor = AuthUser {
            id: ObjectId::new(),
            role: Role::Member,
        };
        task.assigned_to.push(actor.id);
        actor
    }

    #[test]
    fn outsider_cannot_edit() {
        let mut task = sample_task();
        let actor = AuthUser {
            id: ObjectId::new(),
            role: Role::Member,
        };
        let patch = UpdateTaskRequest {
            description: Some("late".to_string()),
            ..UpdateTaskRequest::default()
        };
        assert!(matches!(
            apply_update(&mut task, &patch, &actor),
            Err(ApiError::Permission(_))
        ));
    }

    #[test]
    fn member_cannot_complete_a_task() {
        let mut task = sample_task();
        task.status = TaskStatus::Running;
        let actor = assigned_member(&mut task);
        let patch = UpdateTaskRequest {
            status: Some(TaskStatus::Completed),
            ..UpdateTaskRequest::default()
        };
        assert!(matches!(
            apply_update(&mut task, &patch, &actor),
            Err(ApiError::Permission(_))
        ));
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[test]
    fn member_may_keep_completed_status() {
        let mut task = sample_task();
        task.status = TaskStatus::Completed;
        let actor = assigned_member(&mut task);
        let patch = UpdateTaskRequest {
            status: Some(TaskStatus::Completed),
            description: Some("wrap-up notes".to_string()),
            ..UpdateTaskRequest::default()
        };
        assert!(apply_update(&mut task, &patch, &actor).is_ok());
        assert_eq!(task.description, "wrap-up notes");
    }

    #[test]
    fn member_writes_allowed_fields_and_restricted_ones_are_ignored() {
        let mut task = sample_task();
        task.total_task_count = 5;
        let actor = assigned_member(&mut task);
        let original_title = task.title.clone();
        let patch = UpdateTaskRequest {
            title: Some("hijacked".to_string()),
            total_task_count: Some(50),
            assigned_to: Some(vec![]),
            description: Some("halfway there".to_string()),
            total_completed_task: Some(2),
            status: Some(TaskStatus::OnHold),
            ..UpdateTaskRequest::default()
        };
        apply_update(&mut task, &patch, &actor).unwrap();
        assert_eq!(task.title, original_title);
        assert_eq!(task.total_task_count, 5);
        assert!(!task.assigned_to.is_empty());
        assert_eq!(task.description, "halfway there");
        assert_eq!(task.total_completed_task, 2);
        assert_eq!(task.status, TaskStatus::OnHold);
    }

    #[test]
    fn admin_writes_every_gated_field() {
        let mut task = sample_task();
        let assignee = ObjectId::new();
        let patch = UpdateTaskRequest {
            title: Some("Reprice catalogue".to_string()),
            total_task_count: Some(8),
            status: Some(TaskStatus::Completed),
            assigned_to: Some(vec![assignee]),
            ..UpdateTaskRequest::default()
        };
        let action = apply_update(&mut task, &patch, &admin()).unwrap();
        assert_eq!(action, "updated");
        assert_eq!(task.title, "Reprice catalogue");
        assert_eq!(task.total_task_count, 8);
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.assigned_to, vec![assignee]);
    }

    #[test]
    fn admin_endpoint_may_set_end_date() {
        let mut task = sample_task();
        let end = crate::models::task::tests::date(2024, 1, 20);
        let patch = UpdateTaskRequest {
            end_date: Some(end),
            ..UpdateTaskRequest::default()
        };
        let action = apply_admin_update(&mut task, &patch);
        assert_eq!(action, "updated by admin");
        assert_eq!(task.end_date, Some(end));
    }
}
