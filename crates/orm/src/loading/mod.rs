//! Eager-load planning and resolution
//!
//! Requested relation names (dotted paths allowed) are parsed into a flat
//! plan in which every prefix of every path has its own entry, so partial
//! paths resolve independently. The planner drives only the top-level names;
//! nested names resolve transitively because each relation's own `get()`
//! re-enters eager loading through its builder.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backends::DatabaseConnection;
use crate::builder::EntityBuilder;
use crate::error::ModelResult;
use crate::model::Entity;

/// Caller-supplied constraint applied to a relation's query before execution
pub type ConstraintFn = Arc<dyn Fn(EntityBuilder) -> EntityBuilder + Send + Sync>;

/// The set of relation paths to eager-load, each with an optional constraint
#[derive(Clone, Default)]
pub struct EagerLoadPlan {
    loads: BTreeMap<String, Option<ConstraintFn>>,
}

impl std::fmt::Debug for EagerLoadPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EagerLoadPlan")
            .field("paths", &self.loads.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EagerLoadPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dotted path. Every intermediate prefix is materialized as
    /// its own entry; the constraint lands on the full path only.
    pub fn add(&mut self, path: &str, constraint: Option<ConstraintFn>) {
        let segments: Vec<&str> = path.split('.').collect();
        let mut prefix = String::new();
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                prefix.push('.');
            }
            prefix.push_str(segment);
            self.loads.entry(prefix.clone()).or_insert(None);
        }
        if let Some(constraint) = constraint {
            self.loads.insert(path.to_string(), Some(constraint));
        }
    }

    /// Remove a path and everything nested under it
    pub fn remove(&mut self, path: &str) {
        let nested_prefix = format!("{}.", path);
        self.loads
            .retain(|key, _| key != path && !key.starts_with(&nested_prefix));
    }

    pub fn is_empty(&self) -> bool {
        self.loads.is_empty()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.loads.keys().map(|k| k.as_str()).collect()
    }

    /// Names driven directly by the planner
    pub fn top_level(&self) -> Vec<String> {
        self.loads
            .keys()
            .filter(|k| !k.contains('.'))
            .cloned()
            .collect()
    }

    /// Paths nested under the given name, with the leading segment stripped
    pub fn children_of(&self, name: &str) -> Vec<(String, Option<ConstraintFn>)> {
        let prefix = format!("{}.", name);
        self.loads
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(key, constraint)| (key[prefix.len()..].to_string(), constraint.clone()))
            .collect()
    }

    pub fn constraint(&self, name: &str) -> Option<ConstraintFn> {
        self.loads.get(name).and_then(|c| c.clone())
    }

    /// Merge another plan's entries into this one
    pub(crate) fn extend_from(&mut self, other: &EagerLoadPlan) {
        for (path, constraint) in &other.loads {
            self.loads.insert(path.clone(), constraint.clone());
        }
    }
}

/// Resolve every top-level entry of the plan against a parent batch: obtain
/// the relation without base constraints, push nested paths onto its builder,
/// batch-constrain, apply the caller constraint, seed defaults, fetch once,
/// match results back onto the parents.
pub(crate) async fn eager_load_relations(
    entities: &mut [Entity],
    plan: &EagerLoadPlan,
    conn: &dyn DatabaseConnection,
) -> ModelResult<()> {
    if entities.is_empty() {
        return Ok(());
    }

    for name in plan.top_level() {
        let mut relation = entities[0].relation(&name, false)?;

        for (child, constraint) in plan.children_of(&name) {
            relation.builder_mut().eager_plan_mut().add(&child, constraint);
        }

        if let Some(constraint) = plan.constraint(&name) {
            relation.apply_constraint(&constraint);
        }

        relation.eager_load(entities, &name, conn).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_prefix_gets_its_own_entry() {
        let mut plan = EagerLoadPlan::new();
        plan.add("posts.comments.author", None);

        assert_eq!(
            plan.paths(),
            vec!["posts", "posts.comments", "posts.comments.author"]
        );
        assert_eq!(plan.top_level(), vec!["posts".to_string()]);
    }

    #[test]
    fn test_children_are_reported_with_prefix_stripped() {
        let mut plan = EagerLoadPlan::new();
        plan.add("posts.comments", None);
        plan.add("posts.tags", None);
        plan.add("profile", None);

        let children: Vec<String> = plan
            .children_of("posts")
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(children, vec!["comments".to_string(), "tags".to_string()]);
        assert!(plan.children_of("profile").is_empty());
    }

    #[test]
    fn test_constraint_lands_on_full_path_only() {
        let mut plan = EagerLoadPlan::new();
        plan.add("posts.comments", Some(Arc::new(|b| b)));

        assert!(plan.constraint("posts").is_none());
        assert!(plan.constraint("posts.comments").is_some());
    }

    #[test]
    fn test_remove_drops_descendants() {
        let mut plan = EagerLoadPlan::new();
        plan.add("posts.comments", None);
        plan.add("profile", None);
        plan.remove("posts");

        assert_eq!(plan.paths(), vec!["profile"]);
    }
}
