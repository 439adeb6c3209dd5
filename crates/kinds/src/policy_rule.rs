//! PolicyRule: allows or denies traffic between address groups over the
//! named services.

use std::collections::BTreeSet;

use palisade_core::{
    Condition, Converter, FieldError, ObjectMeta, RegistryError, ResourceObject, TypeMeta,
    Validator,
};
use palisade_registry::{age_of, col, ColumnSpec, Tabulator};
use serde::{Deserialize, Serialize};

use crate::record::RecordMeta;
use crate::service::API_VERSION;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum RuleAction {
    Allow,
    #[default]
    Deny,
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleAction::Allow => write!(f, "Allow"),
            RuleAction::Deny => write!(f, "Deny"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRuleSpec {
    pub action: RuleAction,
    /// Lower number wins; 0-65535.
    pub priority: u32,
    /// Names of Service objects in the rule's namespace.
    #[serde(default)]
    pub services: Vec<String>,
    /// Names of cluster-scoped AddressGroup objects.
    #[serde(default)]
    pub source_groups: Vec<String>,
    #[serde(default)]
    pub destination_groups: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRuleStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PolicyRuleSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PolicyRuleStatus>,
}

impl PolicyRule {
    pub fn new(namespace: &str, name: &str, spec: PolicyRuleSpec) -> Self {
        let mut metadata = ObjectMeta::named(name);
        metadata.namespace = Some(namespace.to_string());
        Self {
            type_meta: TypeMeta::new(Self::API_VERSION, Self::KIND),
            metadata,
            spec,
            status: None,
        }
    }
}

impl ResourceObject for PolicyRule {
    const KIND: &'static str = "PolicyRule";
    const API_VERSION: &'static str = API_VERSION;
    const NAMESPACED: bool = true;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PolicyRuleRecord {
    pub meta: RecordMeta,
    pub spec: PolicyRuleSpec,
    pub status: Option<PolicyRuleStatus>,
}

crate::record::impl_domain_record!(PolicyRuleRecord);

pub struct PolicyRuleConverter;

impl Converter<PolicyRule, PolicyRuleRecord> for PolicyRuleConverter {
    fn to_domain(&self, obj: &PolicyRule) -> Result<PolicyRuleRecord, RegistryError> {
        Ok(PolicyRuleRecord {
            meta: RecordMeta::from_meta(&obj.metadata),
            spec: obj.spec.clone(),
            status: obj.status.clone(),
        })
    }

    fn from_domain(&self, rec: &PolicyRuleRecord) -> Result<PolicyRule, RegistryError> {
        Ok(PolicyRule {
            type_meta: TypeMeta::new(PolicyRule::API_VERSION, PolicyRule::KIND),
            metadata: rec.meta.to_meta(),
            spec: rec.spec.clone(),
            status: rec.status.clone(),
        })
    }
}

pub struct PolicyRuleValidator;

impl PolicyRuleValidator {
    fn check_refs(field: &str, refs: &[String], errs: &mut Vec<FieldError>) {
        let mut seen = BTreeSet::new();
        for (i, name) in refs.iter().enumerate() {
            if name.is_empty() {
                errs.push(FieldError::required(format!("{field}[{i}]")));
            } else if !seen.insert(name.as_str()) {
                errs.push(FieldError::duplicate(
                    format!("{field}[{i}]"),
                    format!("{name:?} listed twice"),
                ));
            }
        }
    }

    fn validate_spec(spec: &PolicyRuleSpec) -> Vec<FieldError> {
        let mut errs = Vec::new();
        if spec.priority > 65_535 {
            errs.push(FieldError::invalid("spec.priority", "priority must be 0-65535"));
        }
        if spec.source_groups.is_empty() && spec.destination_groups.is_empty() {
            errs.push(FieldError::required("spec.sourceGroups"));
        }
        Self::check_refs("spec.services", &spec.services, &mut errs);
        Self::check_refs("spec.sourceGroups", &spec.source_groups, &mut errs);
        Self::check_refs("spec.destinationGroups", &spec.destination_groups, &mut errs);
        errs
    }
}

impl Validator<PolicyRule> for PolicyRuleValidator {
    fn validate_create(&self, obj: &PolicyRule) -> Vec<FieldError> {
        Self::validate_spec(&obj.spec)
    }

    fn validate_update(&self, obj: &PolicyRule, _old: &PolicyRule) -> Vec<FieldError> {
        Self::validate_spec(&obj.spec)
    }
}

pub struct PolicyRuleTabulator;

impl Tabulator<PolicyRule> for PolicyRuleTabulator {
    fn columns(&self) -> Vec<ColumnSpec> {
        vec![col("Namespace"), col("Name"), col("Action"), col("Priority"), col("Age")]
    }

    fn row(&self, obj: &PolicyRule) -> Vec<String> {
        vec![
            obj.metadata.namespace.clone().unwrap_or_else(|| "-".into()),
            obj.metadata.name.clone(),
            obj.spec.action.to_string(),
            obj.spec.priority.to_string(),
            age_of(obj),
        ]
    }
}
