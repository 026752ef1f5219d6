//! Declared-resource model shared by every composer.
//!
//! A [`StackTemplate`] is the result set of one provisioning run: an ordered
//! list of declared resources plus the named outputs derived from them.
//! Execution belongs to the external provisioning engine; this model only
//! captures what must exist and in which dependency order. Declaration is
//! leaf-first by construction: a dependency edge may only name a resource
//! that has already been declared, so composition order mistakes surface as
//! errors instead of broken templates.
//!
//! Provider-emitted identifiers (instance IDs, DNS names, ARNs) do not exist
//! at synthesis time; they are represented by attribute tokens of the form
//! `${LogicalId.Attribute}` which the provisioning engine resolves during
//! execution.

use serde::Serialize;
use thiserror::Error;

/// What the provisioning engine does with a resource when the owning stack
/// is torn down.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum DeletionPolicy {
    /// Destroy the resource together with the stack.
    Delete,
    /// Keep the resource after the stack is gone.
    Retain,
}

/// A single declared resource.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Resource {
    /// Stack-unique logical identifier.
    pub logical_id: String,
    /// Provider resource kind (for example `AWS::EC2::VPC`).
    pub kind: String,
    /// Provider-specific resource properties.
    pub properties: serde_json::Value,
    /// Logical identifiers of resources that must exist first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Teardown behaviour override; `None` keeps the provider default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
}

impl Resource {
    /// Creates a resource declaration with no dependencies and the default
    /// deletion policy.
    #[must_use]
    pub fn new(
        logical_id: impl Into<String>,
        kind: impl Into<String>,
        properties: serde_json::Value,
    ) -> Self {
        Self {
            logical_id: logical_id.into(),
            kind: kind.into(),
            properties,
            depends_on: Vec::new(),
            deletion_policy: None,
        }
    }

    /// Adds a dependency edge to an already-declared resource.
    #[must_use]
    pub fn depends_on(mut self, dependency: &ResourceRef) -> Self {
        self.depends_on.push(dependency.logical_id().to_owned());
        self
    }

    /// Overrides the teardown behaviour.
    #[must_use]
    pub const fn deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = Some(policy);
        self
    }
}

/// Handle to a declared resource, used to build dependency edges and
/// attribute tokens.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceRef {
    logical_id: String,
}

impl ResourceRef {
    /// Logical identifier of the referenced resource.
    #[must_use]
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// Token resolving to a provider-emitted attribute of this resource.
    #[must_use]
    pub fn attr(&self, attribute: &str) -> String {
        format!("${{{}.{attribute}}}", self.logical_id)
    }

    /// Token resolving to the provider identifier of this resource.
    #[must_use]
    pub fn id_token(&self) -> String {
        format!("${{{}}}", self.logical_id)
    }
}

/// A user-facing output derived from declared resources.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Output {
    /// Stable output name consumed by operators and automation.
    pub name: String,
    /// Value expression; may contain attribute tokens.
    pub value: String,
    /// Human-readable description.
    pub description: String,
}

impl Output {
    /// Creates a named output.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            description: description.into(),
        }
    }
}

/// The declared resources and outputs of one provisioning run.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct StackTemplate {
    resources: Vec<Resource>,
    outputs: Vec<Output>,
}

impl StackTemplate {
    /// Creates an empty template.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            resources: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Declares a resource and returns a handle to it.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::DuplicateLogicalId`] when the logical
    /// identifier is already taken, and
    /// [`TemplateError::UnknownDependency`] when a dependency edge names a
    /// resource that has not been declared yet.
    pub fn declare(&mut self, resource: Resource) -> Result<ResourceRef, TemplateError> {
        if self.resource(&resource.logical_id).is_some() {
            return Err(TemplateError::DuplicateLogicalId(resource.logical_id));
        }
        for dependency in &resource.depends_on {
            if self.resource(dependency).is_none() {
                return Err(TemplateError::UnknownDependency {
                    logical_id: resource.logical_id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
        let reference = ResourceRef {
            logical_id: resource.logical_id.clone(),
        };
        self.resources.push(resource);
        Ok(reference)
    }

    /// Records a named output.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::DuplicateOutput`] when the name is already
    /// taken.
    pub fn add_output(&mut self, output: Output) -> Result<(), TemplateError> {
        if self.output(&output.name).is_some() {
            return Err(TemplateError::DuplicateOutput(output.name));
        }
        self.outputs.push(output);
        Ok(())
    }

    /// Looks up a declared resource by logical identifier.
    #[must_use]
    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|resource| resource.logical_id == logical_id)
    }

    /// Looks up an output by name.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.iter().find(|output| output.name == name)
    }

    /// All declared resources, in declaration order.
    #[must_use]
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// All recorded outputs, in declaration order.
    #[must_use]
    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Declared resources of one provider kind.
    pub fn resources_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Resource> {
        self.resources.iter().filter(move |res| res.kind == kind)
    }

    /// Returns true when at least one resource of the given kind is declared.
    #[must_use]
    pub fn has_kind(&self, kind: &str) -> bool {
        self.resources_of_kind(kind).next().is_some()
    }

    /// Returns true when no resource has been declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Serialises the template to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Serialise`] when serialisation fails.
    pub fn to_json(&self) -> Result<String, TemplateError> {
        serde_json::to_string_pretty(self).map_err(|err| TemplateError::Serialise(err.to_string()))
    }
}

/// Errors raised while assembling a template.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum TemplateError {
    /// Raised when two resources claim the same logical identifier.
    #[error("duplicate logical id: {0}")]
    DuplicateLogicalId(String),
    /// Raised when a dependency edge names an undeclared resource.
    #[error("resource `{logical_id}` depends on undeclared resource `{dependency}`")]
    UnknownDependency {
        /// Resource carrying the bad edge.
        logical_id: String,
        /// The undeclared dependency.
        dependency: String,
    },
    /// Raised when two outputs claim the same name.
    #[error("duplicate output name: {0}")]
    DuplicateOutput(String),
    /// Raised when JSON serialisation fails.
    #[error("template serialisation failed: {0}")]
    Serialise(String),
}
