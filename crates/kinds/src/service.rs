//! Service: a named set of protocol ports that policy rules can reference.

use std::collections::BTreeSet;

use palisade_core::{
    Condition, Converter, FieldError, ObjectMeta, RegistryError, ResourceObject, TypeMeta,
    Validator,
};
use palisade_registry::{age_of, col, ColumnSpec, Tabulator};
use serde::{Deserialize, Serialize};

use crate::record::RecordMeta;

pub const API_VERSION: &str = "policy.palisade.dev/v1";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// TCP, UDP or ICMP.
    pub protocol: String,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Rules currently referencing this service, filled in by a controller.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bound_rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ServiceSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ServiceStatus>,
}

impl Service {
    pub fn new(namespace: &str, name: &str, spec: ServiceSpec) -> Self {
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

impl ResourceObject for Service {
    const KIND: &'static str = "Service";
    const API_VERSION: &'static str = API_VERSION;
    const NAMESPACED: bool = true;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Backend-side shape: same data, no wire tags.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceRecord {
    pub meta: RecordMeta,
    pub spec: ServiceSpec,
    pub status: Option<ServiceStatus>,
}

crate::record::impl_domain_record!(ServiceRecord);

pub struct ServiceConverter;

impl Converter<Service, ServiceRecord> for ServiceConverter {
    fn to_domain(&self, obj: &Service) -> Result<ServiceRecord, RegistryError> {
        Ok(ServiceRecord {
            meta: RecordMeta::from_meta(&obj.metadata),
            spec: obj.spec.clone(),
            status: obj.status.clone(),
        })
    }

    fn from_domain(&self, rec: &ServiceRecord) -> Result<Service, RegistryError> {
        Ok(Service {
            type_meta: TypeMeta::new(Service::API_VERSION, Service::KIND),
            metadata: rec.meta.to_meta(),
            spec: rec.spec.clone(),
            status: rec.status.clone(),
        })
    }
}

const PROTOCOLS: &[&str] = &["TCP", "UDP", "ICMP"];

pub struct ServiceValidator;

impl ServiceValidator {
    fn validate_spec(spec: &ServiceSpec) -> Vec<FieldError> {
        let mut errs = Vec::new();
        if spec.protocol.is_empty() {
            errs.push(FieldError::required("spec.protocol"));
        } else if !PROTOCOLS.contains(&spec.protocol.as_str()) {
            errs.push(FieldError::invalid(
                "spec.protocol",
                format!("unknown protocol {:?}; expected one of {:?}", spec.protocol, PROTOCOLS),
            ));
        }
        if spec.protocol != "ICMP" && spec.ports.is_empty() {
            errs.push(FieldError::required("spec.ports"));
        }
        let mut seen = BTreeSet::new();
        for (i, p) in spec.ports.iter().enumerate() {
            if p.name.is_empty() {
                errs.push(FieldError::required(format!("spec.ports[{i}].name")));
            } else if !seen.insert(p.name.as_str()) {
                errs.push(FieldError::duplicate(
                    format!("spec.ports[{i}].name"),
                    format!("port name {:?} reused", p.name),
                ));
            }
            if p.port == 0 {
                errs.push(FieldError::invalid(format!("spec.ports[{i}].port"), "port must be 1-65535"));
            }
        }
        errs
    }
}

impl Validator<Service> for ServiceValidator {
    fn validate_create(&self, obj: &Service) -> Vec<FieldError> {
        Self::validate_spec(&obj.spec)
    }

    fn validate_update(&self, obj: &Service, _old: &Service) -> Vec<FieldError> {
        Self::validate_spec(&obj.spec)
    }
}

pub struct ServiceTabulator;

impl Tabulator<Service> for ServiceTabulator {
    fn columns(&self) -> Vec<ColumnSpec> {
        vec![col("Namespace"), col("Name"), col("Protocol"), col("Ports"), col("Age")]
    }

    fn row(&self, obj: &Service) -> Vec<String> {
        let ports = obj
            .spec
            .ports
            .iter()
            .map(|p| p.port.to_string())
            .collect::<Vec<_>>()
            .join(",");
        vec![
            obj.metadata.namespace.clone().unwrap_or_else(|| "-".into()),
            obj.metadata.name.clone(),
            obj.spec.protocol.clone(),
            if ports.is_empty() { "-".into() } else { ports },
            age_of(obj),
        ]
    }
}
