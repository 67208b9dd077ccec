//! The expression resolver (spec §4.3): evaluates `${{ <ns>.<name>.<field> }}`
//! (and `variables.*` / `locals.*` / `dependencies.*`) references against
//! the graph's current node outputs.
//!
//! A small walker, not a template engine (Design Notes): [`resolve_template`]
//! scans for non-nested `${{ ... }}` occurrences and [`resolve_reference`]
//! evaluates each one's `expr` body against a [`Context`].

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::node::NodeType;
use crate::value::Value;
use std::collections::HashMap;

/// The resolution context: which component/instance a template is being
/// evaluated for, plus the environment-level variables/locals that sit
/// alongside node outputs in the expression grammar.
pub struct Context<'g> {
    pub graph: &'g Graph,
    pub component: String,
    pub instance: Option<String>,
    pub variables: HashMap<String, Value>,
    pub locals: HashMap<String, Value>,
}

impl<'g> Context<'g> {
    pub fn new(graph: &'g Graph, component: impl Into<String>) -> Self {
        Context {
            graph,
            component: component.into(),
            instance: None,
            variables: HashMap::new(),
            locals: HashMap::new(),
        }
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }
}

/// Scan `template` for non-nested `${{ expr }}` occurrences, resolve each,
/// and splice the interpolated string back in (spec §4.3: "concatenation
/// resolves in-place").
pub fn resolve_template(template: &str, ctx: &Context) -> Result<String> {
    resolve_template_with_visiting(template, ctx, &[])
}

/// Evaluate one `expr` body (the contents of a single `${{ ... }}`).
/// `visiting` is the resolution-in-progress stack used for cycle detection
/// on `dependencies.*` chains.
pub fn resolve_reference(expr: &str, ctx: &Context, visiting: &[String]) -> Result<Value> {
    let parts: Vec<&str> = expr.split('.').collect();
    match parts.as_slice() {
        ["variables", name] => ctx
            .variables
            .get(*name)
            .cloned()
            .ok_or_else(|| Error::UnresolvedReference {
                reference: expr.to_string(),
            }),
        ["locals", name] => ctx
            .locals
            .get(*name)
            .cloned()
            .ok_or_else(|| Error::UnresolvedReference {
                reference: expr.to_string(),
            }),
        ["dependencies", alias, "outputs", name] => {
            resolve_dependency_output(ctx, alias, name, visiting)
        }
        [ns, name, field] => resolve_node_field(ctx, ns, name, field),
        _ => Err(Error::UnresolvedReference {
            reference: expr.to_string(),
        }),
    }
}

fn resolve_node_field(ctx: &Context, ns: &str, name: &str, field: &str) -> Result<Value> {
    let node_type = NodeType::from_namespace(ns).ok_or_else(|| Error::UnresolvedReference {
        reference: format!("{ns}.{name}.{field}"),
    })?;

    let candidate_ids = candidate_node_ids(ctx, node_type, name);
    let node_id = candidate_ids
        .iter()
        .find(|id| ctx.graph.node(id).is_some())
        .ok_or_else(|| Error::UnresolvedReference {
            reference: format!("{ns}.{name}.{field}"),
        })?;

    read_field_with_fallback(ctx, node_id, field)
}

/// Per-instance kinds try the instance-qualified id first, then fall back
/// to the shared id (spec §4.2 multi-instance mode).
fn candidate_node_ids(ctx: &Context, node_type: NodeType, name: &str) -> Vec<String> {
    let mut ids = Vec::new();
    if let Some(instance) = &ctx.instance {
        if node_type.is_per_instance() {
            ids.push(format!(
                "{}/{instance}/{}/{name}",
                ctx.component,
                node_type.id_tag()
            ));
        }
    }
    ids.push(format!("{}/{}/{name}", ctx.component, node_type.id_tag()));
    ids
}

/// Read `field` from the node's outputs, falling through to the upstream
/// node's outputs when this is an implicit interposed node with no
/// matching field (spec §4.3, Testable Property 5).
fn read_field_with_fallback(ctx: &Context, node_id: &str, field: &str) -> Result<Value> {
    let node = ctx.graph.node(node_id).ok_or_else(|| Error::UnresolvedReference {
        reference: node_id.to_string(),
    })?;

    if let Some(v) = node.outputs.get(field) {
        return Ok(v.clone());
    }

    if node.node_type.is_implicit() {
        for upstream_id in &node.depends_on {
            if ctx.graph.node(upstream_id).is_some() {
                return read_field_with_fallback(ctx, upstream_id, field);
            }
        }
    }

    Err(Error::FieldMissing {
        node_id: node_id.to_string(),
        field: field.to_string(),
    })
}

fn resolve_dependency_output(
    ctx: &Context,
    alias: &str,
    output_name: &str,
    visiting: &[String],
) -> Result<Value> {
    let chain_key = format!("dependencies.{alias}.outputs.{output_name}");
    if visiting.contains(&chain_key) {
        let mut chain: Vec<String> = visiting.to_vec();
        chain.push(chain_key);
        return Err(Error::CyclicReference { chain });
    }

    let is_optional = ctx
        .graph
        .optional_dependencies
        .get(&ctx.component)
        .map(|set| set.contains(alias))
        .unwrap_or(false);

    let target = ctx
        .graph
        .dependency_targets
        .get(&ctx.component)
        .and_then(|targets| targets.get(alias));

    let Some(target_component) = target else {
        return if is_optional {
            Ok(Value::String(String::new()))
        } else {
            Err(Error::UnresolvedReference {
                reference: chain_key,
            })
        };
    };

    let target_expr = ctx
        .graph
        .component_output_exprs
        .get(target_component)
        .and_then(|exprs| exprs.get(output_name));

    let Some(target_expr) = target_expr else {
        return if is_optional {
            Ok(Value::String(String::new()))
        } else {
            Err(Error::UnresolvedReference {
                reference: chain_key,
            })
        };
    };

    let mut next_visiting = visiting.to_vec();
    next_visiting.push(chain_key.clone());

    let target_ctx = Context::new(ctx.graph, target_component.clone());
    match resolve_template_with_visiting(target_expr, &target_ctx, &next_visiting) {
        Ok(resolved) => Ok(Value::String(resolved)),
        Err(Error::UnresolvedReference { .. }) if is_optional => Ok(Value::String(String::new())),
        Err(e) => Err(e),
    }
}

fn resolve_template_with_visiting(template: &str, ctx: &Context, visiting: &[String]) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 3..];
        let end = after_open.find("}}").ok_or_else(|| Error::UnresolvedReference {
            reference: template.to_string(),
        })?;
        let expr = after_open[..end].trim();
        let value = resolve_reference(expr, ctx, visiting)?;
        out.push_str(&value.as_interpolated_string());
        rest = &after_open[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

impl NodeType {
    /// Reverse of [`NodeType::expression_namespace`].
    pub fn from_namespace(ns: &str) -> Option<NodeType> {
        use NodeType::*;
        Some(match ns {
            "databases" => Database,
            "databaseUsers" => DatabaseUser,
            "buckets" => Bucket,
            "encryptionKeys" => EncryptionKey,
            "smtp" => Smtp,
            "deployments" => Deployment,
            "functions" => Function,
            "services" => Service,
            "routes" => Route,
            "cronjobs" => Cronjob,
            "builds" => DockerBuild,
            "tasks" => Task,
            "observability" => Observability,
            "ports" => Port,
            "networkPolicies" => NetworkPolicy,
            "secrets" => Secret,
            _ => return None,
        })
    }

    /// Implicit node kinds eligible for pass-through fallback when a hook
    /// doesn't match or doesn't exist (spec Glossary "Pass-through").
    pub fn is_implicit(self) -> bool {
        matches!(self, NodeType::DatabaseUser | NodeType::NetworkPolicy)
    }
}
