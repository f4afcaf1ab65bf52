use crate::ports::BoxFuture;
use crate::task::TaskDefinition;
use crate::DomainResult;

/// Read-only access to task definitions. Tasks are authored elsewhere; the
/// submission engine only needs existence and the ordered step definitions.
pub trait TaskRepository: Send + Sync {
    fn get(&self, task_id: &str) -> BoxFuture<'_, DomainResult<Option<TaskDefinition>>>;

    fn list_active_by_brand(
        &self,
        brand_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<TaskDefinition>>>;
}
