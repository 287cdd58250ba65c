//! Relationship graph and join path resolution.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;

use crate::ast::{Relationship, Schema};

/// One join edge, oriented from the entity that is already part of the
/// query (`from_*`) to the entity it brings in (`to_*`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinStep {
    pub from_entity: String,
    pub from_field: String,
    pub to_entity: String,
    pub to_field: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Join {
    /// Joined over a declared relationship.
    On(JoinStep),
    /// No path to anything joined so far; joined without a condition.
    Cross { entity: String },
}

impl Join {
    pub fn entity(&self) -> &str {
        match self {
            Self::On(step) => &step.to_entity,
            Self::Cross { entity } => entity,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPlan {
    pub root: Option<String>,
    /// Joins in traversal order.
    pub joins: Vec<Join>,
    /// Entities that were not referenced but sit on the path between two
    /// that were.
    pub bridged: Vec<String>,
    /// Referenced entities with no path to the root's component.
    pub disconnected: Vec<String>,
}

impl JoinPlan {
    /// Root first, then every joined entity.
    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.root
            .as_deref()
            .into_iter()
            .chain(self.joins.iter().map(Join::entity))
    }
}

/// Undirected view of the declared relationships.
#[derive(Debug, Clone, Default)]
pub struct JoinGraph {
    /// Neighbours per entity, in relationship declaration order.
    adjacency: HashMap<String, Vec<JoinStep>>,
}

impl JoinGraph {
    pub fn new(relationships: &[Relationship]) -> Self {
        let mut adjacency: HashMap<String, Vec<JoinStep>> = HashMap::new();

        for rel in relationships {
            if rel.source_entity == rel.target_entity {
                continue; // Self-reference never connects two entities
            }
            adjacency
                .entry(rel.source_entity.clone())
                .or_default()
                .push(JoinStep {
                    from_entity: rel.source_entity.clone(),
                    from_field: rel.source_field.clone(),
                    to_entity: rel.target_entity.clone(),
                    to_field: rel.target_field.clone(),
                });
            adjacency
                .entry(rel.target_entity.clone())
                .or_default()
                .push(JoinStep {
                    from_entity: rel.target_entity.clone(),
                    from_field: rel.target_field.clone(),
                    to_entity: rel.source_entity.clone(),
                    to_field: rel.source_field.clone(),
                });
        }

        Self { adjacency }
    }

    pub fn from_schema(schema: &Schema) -> Self {
        Self::new(&schema.relationships)
    }

    fn neighbours(&self, entity: &str) -> &[JoinStep] {
        self.adjacency.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Connect `referenced` (in first-selection order) into a join plan.
    ///
    /// The first entity is the root. Edges between referenced entities are
    /// taken breadth-first; an entity only reachable through unreferenced
    /// ones is connected along the shortest such path; anything left over is
    /// cross-joined and starts its own component.
    pub fn resolve<S: AsRef<str>>(&self, referenced: &[S]) -> JoinPlan {
        let mut order: Vec<&str> = Vec::new();
        for entity in referenced {
            let entity = entity.as_ref();
            if !order.contains(&entity) {
                order.push(entity);
            }
        }

        let Some(&root) = order.first() else {
            return JoinPlan::default();
        };

        let wanted: HashSet<&str> = order.iter().copied().collect();
        let mut plan = JoinPlan {
            root: Some(root.to_string()),
            ..JoinPlan::default()
        };
        let mut joined: Vec<String> = vec![root.to_string()];

        self.expand_within(&wanted, &mut joined, &mut plan.joins);

        for &entity in &order {
            if joined.iter().any(|j| j == entity) {
                continue;
            }

            match self.bridge(&joined, entity) {
                Some(path) => {
                    for step in path {
                        if step.to_entity != entity && !wanted.contains(step.to_entity.as_str()) {
                            plan.bridged.push(step.to_entity.clone());
                        }
                        joined.push(step.to_entity.clone());
                        plan.joins.push(Join::On(step));
                    }
                }
                None => {
                    log::warn!("entity `{entity}` has no relationship path to `{root}`; joining without a condition");
                    plan.disconnected.push(entity.to_string());
                    joined.push(entity.to_string());
                    plan.joins.push(Join::Cross {
                        entity: entity.to_string(),
                    });
                }
            }

            self.expand_within(&wanted, &mut joined, &mut plan.joins);
        }

        plan
    }

    /// Breadth-first expansion from everything joined so far, only stepping
    /// onto referenced entities.
    fn expand_within(&self, wanted: &HashSet<&str>, joined: &mut Vec<String>, joins: &mut Vec<Join>) {
        let mut queue: VecDeque<String> = joined.iter().cloned().collect();

        while let Some(current) = queue.pop_front() {
            for step in self.neighbours(&current) {
                let next = step.to_entity.as_str();
                if !wanted.contains(next) || joined.iter().any(|j| j == next) {
                    continue;
                }
                joined.push(next.to_string());
                joins.push(Join::On(step.clone()));
                queue.push_back(next.to_string());
            }
        }
    }

    /// Shortest path over the full graph from any joined entity to `target`.
    fn bridge(&self, joined: &[String], target: &str) -> Option<Vec<JoinStep>> {
        let mut came_from: HashMap<&str, &JoinStep> = HashMap::new();
        let mut visited: HashSet<&str> = joined.iter().map(String::as_str).collect();
        let mut queue: VecDeque<&str> = joined.iter().map(String::as_str).collect();

        while let Some(current) = queue.pop_front() {
            if current == target {
                let mut path = Vec::new();
                let mut node = current;
                while let Some(step) = came_from.get(node) {
                    path.push((*step).clone());
                    node = step.from_entity.as_str();
                }
                path.reverse();
                return Some(path);
            }

            for step in self.neighbours(current) {
                let next = step.to_entity.as_str();
                if visited.insert(next) {
                    came_from.insert(next, step);
                    queue.push_back(next);
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_schema;

    fn graph(source: &str) -> JoinGraph {
        JoinGraph::from_schema(&parse_schema(source))
    }

    fn step(from: &str, from_field: &str, to: &str, to_field: &str) -> Join {
        Join::On(JoinStep {
            from_entity: from.into(),
            from_field: from_field.into(),
            to_entity: to.into(),
            to_field: to_field.into(),
        })
    }

    #[test]
    fn test_single_edge() {
        let plan = graph("employees.department_id > departments.id").resolve(&["employees", "departments"]);
        assert_eq!(plan.root.as_deref(), Some("employees"));
        assert_eq!(plan.joins, vec![step("employees", "department_id", "departments", "id")]);
        assert!(plan.disconnected.is_empty());
    }

    #[test]
    fn test_root_follows_selection_order() {
        let plan = graph("employees.department_id > departments.id").resolve(&["departments", "employees"]);
        assert_eq!(plan.root.as_deref(), Some("departments"));
        assert_eq!(plan.joins, vec![step("departments", "id", "employees", "department_id")]);
    }

    #[test]
    fn test_breadth_first_order() {
        let g = graph(
            "orders.customer_id > customers.id\n\
             order_items.order_id > orders.id\n\
             order_items.product_id > products.id",
        );
        let plan = g.resolve(&["orders", "products", "customers", "order_items"]);
        let entities: Vec<_> = plan.entities().collect();
        assert_eq!(entities, vec!["orders", "customers", "order_items", "products"]);
    }

    #[test]
    fn test_bridge_through_unreferenced_entity() {
        let g = graph(
            "order_items.order_id > orders.id\n\
             order_items.product_id > products.id",
        );
        let plan = g.resolve(&["orders", "products"]);
        assert_eq!(
            plan.joins,
            vec![
                step("orders", "id", "order_items", "order_id"),
                step("order_items", "product_id", "products", "id"),
            ]
        );
        assert_eq!(plan.bridged, vec!["order_items".to_string()]);
        assert!(plan.disconnected.is_empty());
    }

    #[test]
    fn test_disconnected_components_are_cross_joined() {
        let g = graph(
            "employees.department_id > departments.id\n\
             invoices.vendor_id > vendors.id",
        );
        let plan = g.resolve(&["employees", "vendors", "departments", "invoices"]);
        assert_eq!(
            plan.joins,
            vec![
                step("employees", "department_id", "departments", "id"),
                Join::Cross {
                    entity: "vendors".into()
                },
                step("vendors", "id", "invoices", "vendor_id"),
            ]
        );
        assert_eq!(plan.disconnected, vec!["vendors".to_string()]);
    }

    #[test]
    fn test_cycle_joins_each_entity_once() {
        let g = graph("a.b_id > b.id\nb.c_id > c.id\nc.a_id > a.id");
        let plan = g.resolve(&["a", "b", "c"]);
        assert_eq!(plan.joins.len(), 2);
    }

    #[test]
    fn test_empty_selection() {
        let plan = graph("a.x > b.y").resolve::<&str>(&[]);
        assert_eq!(plan, JoinPlan::default());
    }
}
