use std::collections::HashMap;

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use log::info;
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::Collection;
use serde::{Deserialize, Serialize};

use crate::access::{apply_admin_update, apply_update, UpdateTaskRequest};
use crate::app_state::AppState;
use crate::auth::{identity, require_admin, AuthUser};
use crate::error::ApiError;
use crate::filter::TaskFilter;
use crate::models::task::{LastUpdated, Task, TaskLink, TaskStatus};
use crate::models::user::{UserSummary, UserWithRole};
use crate::query::{PageInfo, TaskListQuery};

fn tasks_coll(state: &AppState) -> Collection<Task> {
    state.mongodb.db.collection::<Task>("tasks")
}

/// Task as returned to callers: stored fields plus derived values and
/// resolved identity summaries. The enrichment never feeds back into
/// filtering or sorting.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub completion_percentage: i64,
    pub duration_days: Option<i64>,
    pub assigned_users: Vec<UserSummary>,
    pub creator: Option<UserSummary>,
    pub last_updater: Option<UserSummary>,
}

#[derive(Debug, Serialize)]
pub struct TaskPage {
    pub tasks: Vec<TaskView>,
    pub pagination: PageInfo,
}

/// One batched user fetch per page covering assignees, creators, and
/// last updaters. Ids that resolve to nothing simply stay absent.
async fn resolve_summaries(
    state: &AppState,
    tasks: &[Task],
) -> Result<HashMap<ObjectId, UserSummary>, ApiError> {
    let mut ids: Vec<ObjectId> = Vec::new();
    for task in tasks {
        ids.extend(task.assigned_to.iter().copied());
        ids.push(task.created_by);
        if let Some(updater) = task.last_updated.updated_by {
            ids.push(updater);
        }
    }
    ids.sort();
    ids.dedup();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let users = state.mongodb.db.collection::<UserSummary>("users");
    let found: Vec<UserSummary> = users
        .find(doc! { "_id": { "$in": ids } })
        .await?
        .try_collect()
        .await?;
    Ok(found.into_iter().map(|u| (u.id, u)).collect())
}

fn assemble(task: Task, users: &HashMap<ObjectId, UserSummary>) -> TaskView {
    let assigned_users = task
        .assigned_to
        .iter()
        .filter_map(|id| users.get(id).cloned())
        .collect();
    let creator = users.get(&task.created_by).cloned();
    let last_updater = task
        .last_updated
        .updated_by
        .and_then(|id| users.get(&id).cloned());
    TaskView {
        completion_percentage: task.completion_percentage(),
        duration_days: task.duration_days(),
        assigned_users,
        creator,
        last_updater,
        task,
    }
}

/// Shared listing runner: match, sort, slice, then enrich. The total is
/// a separate count over the whole filtered set, never the slice.
async fn run_listing(
    state: &AppState,
    query: &TaskListQuery,
    caller: Option<ObjectId>,
) -> Result<TaskPage, ApiError> {
    let filter = TaskFilter::build(query, caller);
    let match_doc = filter.to_document();

    let mut pipeline: Vec<Document> = vec![doc! { "$match": match_doc.clone() }];
    pipeline.extend(query.sort.stages());
    pipeline.extend(query.pagination.stages());

    let coll = tasks_coll(state);
    let tasks: Vec<Task> = coll
        .aggregate(pipeline)
        .with_type::<Task>()
        .await?
        .try_collect()
        .await?;
    let total = coll.count_documents(match_doc).await?;

    let users = resolve_summaries(state, &tasks).await?;
    let views = tasks.into_iter().map(|t| assemble(t, &users)).collect();

    Ok(TaskPage {
        tasks: views,
        pagination: PageInfo::new(query.pagination, total),
    })
}

fn parse_task_id(raw: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(raw).map_err(|_| ApiError::validation("Invalid task id"))
}

async fn fetch_task(state: &AppState, id: ObjectId) -> Result<Task, ApiError> {
    tasks_coll(state)
        .find_one(doc! { "_id": id })
        .await?
        .ok_or(ApiError::NotFound("Task"))
}

async fn enriched(state: &AppState, task: Task) -> Result<TaskView, ApiError> {
    let users = resolve_summaries(state, std::slice::from_ref(&task)).await?;
    Ok(assemble(task, &users))
}

/// Persists an edited task: invariant check, status state machine, the
/// route-level endDate stamp, last-write pointer, then replace.
async fn save_task(
    state: &AppState,
    mut task: Task,
    actor: &AuthUser,
    action: &str,
) -> Result<Task, ApiError> {
    task.validate()?;
    let now = Utc::now();
    task.apply_status_rules(now);
    if task.status == TaskStatus::Completed && task.end_date.is_none() {
        task.end_date = Some(now);
    }
    task.touch(actor.id, action, now);

    let coll = tasks_coll(state);
    let result = coll.replace_one(doc! { "_id": task.id }, &task).await?;
    if result.matched_count == 0 {
        return Err(ApiError::NotFound("Task"));
    }
    Ok(task)
}

/* ---------- LISTINGS ---------- */

pub async fn public_tasks(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let query = TaskListQuery::parse(req.query_string());
    let page = run_listing(&data, &query, None).await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn my_tasks(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let user = identity(&req)?;
    let query = TaskListQuery::parse(req.query_string());
    let page = run_listing(&data, &query, Some(user.id)).await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn all_tasks(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    identity(&req)?;
    let query = TaskListQuery::parse(req.query_string());
    let page = run_listing(&data, &query, None).await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn admin_tasks(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    require_admin(&req)?;
    let query = TaskListQuery::parse(req.query_string());
    let page = run_listing(&data, &query, None).await?;
    Ok(HttpResponse::Ok().json(page))
}

/* ---------- SINGLE TASK ---------- */

pub async fn get_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    identity(&req)?;
    let id = parse_task_id(&path)?;
    let task = fetch_task(&data, id).await?;
    Ok(HttpResponse::Ok().json(enriched(&data, task).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub links: Option<Vec<TaskLink>>,
    pub total_task_count: Option<i32>,
    pub total_completed_task: Option<i32>,
    pub status: Option<TaskStatus>,
    pub assigned_to: Option<Vec<ObjectId>>,
}

impl CreateTaskRequest {
    /// Builds a new task record, checking the required creation fields
    /// and defaulting everything else.
    pub fn build_task(self, creator: ObjectId, now: DateTime<Utc>) -> Result<Task, ApiError> {
        let (title, start_date, due_date) = match (self.title, self.start_date, self.due_date) {
            (Some(title), Some(start), Some(due)) => (title, start, due),
            _ => {
                return Err(ApiError::validation(
                    "Title, start date, and due date are required",
                ))
            }
        };

        let mut task = Task {
            id: ObjectId::new(),
            title,
            description: self.description.unwrap_or_default(),
            start_date,
            due_date,
            end_date: None,
            links: self.links.unwrap_or_default(),
            total_task_count: self.total_task_count.unwrap_or(1),
            total_completed_task: self.total_completed_task.unwrap_or(0),
            status: self.status.unwrap_or(TaskStatus::NotStarted),
            assigned_to: self.assigned_to.unwrap_or_default(),
            last_updated: LastUpdated {
                updated_by: Some(creator),
                updated_at: now,
                action: "created".to_string(),
            },
            created_by: creator,
            created_at: now,
            updated_at: now,
        };

        task.validate()?;
        task.apply_status_rules(now);
        if task.status == TaskStatus::Completed && task.end_date.is_none() {
            task.end_date = Some(now);
        }
        Ok(task)
    }
}

pub async fn create_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<CreateTaskRequest>,
) -> Result<HttpResponse, ApiError> {
    let admin = require_admin(&req)?;
    let task = payload.into_inner().build_task(admin.id, Utc::now())?;

    tasks_coll(&data).insert_one(&task).await?;
    info!("Task created: {}", task.id);
    Ok(HttpResponse::Created().json(enriched(&data, task).await?))
}

pub async fn update_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateTaskRequest>,
) -> Result<HttpResponse, ApiError> {
    let user = identity(&req)?;
    let id = parse_task_id(&path)?;
    let mut task = fetch_task(&data, id).await?;

    let action = apply_update(&mut task, &payload, &user)?;
    let task = save_task(&data, task, &user, action).await?;
    Ok(HttpResponse::Ok().json(enriched(&data, task).await?))
}

pub async fn admin_update_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateTaskRequest>,
) -> Result<HttpResponse, ApiError> {
    let admin = require_admin(&req)?;
    let id = parse_task_id(&path)?;
    let mut task = fetch_task(&data, id).await?;

    let action = apply_admin_update(&mut task, &payload);
    let task = save_task(&data, task, &admin, action).await?;
    Ok(HttpResponse::Ok().json(enriched(&data, task).await?))
}

pub async fn delete_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    require_admin(&req)?;
    let id = parse_task_id(&path)?;
    let result = tasks_coll(&data).delete_one(doc! { "_id": id }).await?;
    if result.deleted_count == 0 {
        return Err(ApiError::NotFound("Task"));
    }
    info!("Task deleted: {}", id);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Task deleted successfully" })))
}

/* ---------- USER LISTINGS ---------- */

/// Name/email list for filter and assignment dropdowns, available to
/// every authenticated user.
pub async fn list_users(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    identity(&req)?;
    let users = data.mongodb.db.collection::<UserSummary>("users");
    let found: Vec<UserSummary> = users
        .find(doc! {})
        .sort(doc! { "name": 1 })
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(found))
}

/// Same listing with roles included, admin only.
pub async fn admin_list_users(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    require_admin(&req)?;
    let users = data.mongodb.db.collection::<UserWithRole>("users");
    let found: Vec<UserWithRole> = users
        .find(doc! {})
        .sort(doc! { "name": 1 })
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(found))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::tests::date;

    fn minimal_request() -> CreateTaskRequest {
        CreateTaskRequest {
            title: Some("Import spring catalogue".to_string()),
            description: None,
            start_date: Some(date(2024, 3, 1)),
            due_date: Some(date(2024, 3, 14)),
            links: None,
            total_task_count: None,
            total_completed_task: None,
            status: None,
            assigned_to: None,
        }
    }

    #[test]
    fn creation_defaults_omitted_fields() {
        let creator = ObjectId::new();
        let now = date(2024, 3, 1);
        let task = minimal_request().build_task(creator, now).unwrap();
        assert_eq!(task.title, "Import spring catalogue");
        assert_eq!(task.description, "");
        assert_eq!(task.total_task_count, 1);
        assert_eq!(task.total_completed_task, 0);
        assert_eq!(task.status, TaskStatus::NotStarted);
        assert!(task.links.is_empty());
        assert!(task.assigned_to.is_empty());
        assert_eq!(task.created_by, creator);
        assert_eq!(task.last_updated.action, "created");
    }

    #[test]
    fn creation_requires_title_and_dates() {
        let mut request = minimal_request();
        request.due_date = None;
        assert!(matches!(
            request.build_task(ObjectId::new(), date(2024, 3, 1)),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn creation_with_matching_counts_lands_completed() {
        let mut request = minimal_request();
        request.total_task_count = Some(3);
        request.total_completed_task = Some(3);
        let now = date(2024, 3, 1);
        let task = request.build_task(ObjectId::new(), now).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.end_date, Some(now));
    }
}
