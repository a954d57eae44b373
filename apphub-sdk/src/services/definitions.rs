//! Declarative records an application registers with the hub. Nothing here
//! takes part in runtime authorization.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::services::context::FULL_ACCESS_SCOPE;
use crate::services::error::SdkError;
use crate::services::rbac::{
    build_permission, parse_permission, ACTION_DELETE, ACTION_MANAGE, ACTION_READ, ACTION_WRITE,
};
use crate::services::scope::{SCOPE_CUSTOMER, SCOPE_REGION};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDefinition {
    pub slug: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub resource: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_system: bool,
}

impl PermissionDefinition {
    /// Slug is `resource:action`; both halves go through the same parser the
    /// evaluator uses.
    pub fn new(resource: &str, action: &str) -> Result<Self, SdkError> {
        let slug = build_permission(resource, action);
        let parsed = parse_permission(&slug)?;

        Ok(Self {
            name: format!("{} {}", capitalize(&parsed.action), parsed.resource),
            slug,
            description: None,
            resource: parsed.resource,
            action: parsed.action,
            group_name: None,
            sort_order: 0,
            is_default: false,
            is_system: false,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group_name = Some(group.into());
        self
    }

    pub fn with_sort_order(mut self, sort_order: i32) -> Self {
        self.sort_order = sort_order;
        self
    }

    pub fn default_grant(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }
}

/// read/write/delete/manage for one resource, in that order. Only `read` is
/// granted by default.
pub fn crud_permissions(
    resource: &str,
    group: Option<&str>,
) -> Result<Vec<PermissionDefinition>, SdkError> {
    [ACTION_READ, ACTION_WRITE, ACTION_DELETE, ACTION_MANAGE]
        .into_iter()
        .enumerate()
        .map(|(index, action)| {
            let mut definition =
                PermissionDefinition::new(resource, action)?.with_sort_order(index as i32);
            if let Some(group) = group {
                definition = definition.with_group(group);
            }
            if action == ACTION_READ {
                definition = definition.default_grant();
            }
            Ok(definition)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeTypeDefinition {
    pub slug: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub requires_selection: bool,
    #[serde(default)]
    pub multi_select: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_schema: Option<Value>,
    #[serde(default)]
    pub sort_order: i32,
}

impl ScopeTypeDefinition {
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            description: None,
            requires_selection: false,
            multi_select: false,
            options_endpoint: None,
            value_schema: None,
            sort_order: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_options_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.options_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_value_schema(mut self, schema: Value) -> Self {
        self.value_schema = Some(schema);
        self
    }

    pub fn with_sort_order(mut self, sort_order: i32) -> Self {
        self.sort_order = sort_order;
        self
    }

    pub fn requiring_selection(mut self, multi_select: bool) -> Self {
        self.requires_selection = true;
        self.multi_select = multi_select;
        self
    }
}

pub fn define_full_access_scope() -> ScopeTypeDefinition {
    ScopeTypeDefinition::new(FULL_ACCESS_SCOPE, "Full Access")
        .with_description("Access to all data within the entity")
}

/// `multiple` switches between the `customer` and `customers` shapes.
pub fn define_customer_scope(options_endpoint: &str, multiple: bool) -> ScopeTypeDefinition {
    let (slug, name) = if multiple {
        ("customers", "Multiple Customers")
    } else {
        (SCOPE_CUSTOMER, "Single Customer")
    };

    ScopeTypeDefinition::new(slug, name)
        .with_description("Restrict data to selected customers")
        .with_options_endpoint(options_endpoint)
        .requiring_selection(multiple)
        .with_sort_order(1)
}

pub fn define_region_scope(options_endpoint: &str) -> ScopeTypeDefinition {
    ScopeTypeDefinition::new(SCOPE_REGION, "Region")
        .with_description("Restrict data to a geographic region")
        .with_options_endpoint(options_endpoint)
        .requiring_selection(false)
        .with_sort_order(2)
}

pub fn define_custom_scope(
    slug: &str,
    name: &str,
    options_endpoint: Option<&str>,
    multi_select: bool,
) -> Result<ScopeTypeDefinition, SdkError> {
    if slug.trim().is_empty() || slug == FULL_ACCESS_SCOPE {
        return Err(SdkError::InvalidFormat(format!(
            "'{}' cannot be used as a custom scope slug",
            slug
        )));
    }

    let mut definition = ScopeTypeDefinition::new(slug, name).with_sort_order(10);
    if let Some(endpoint) = options_endpoint {
        definition = definition
            .with_options_endpoint(endpoint)
            .requiring_selection(multi_select);
    }
    Ok(definition)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
