//! AddressGroup: a cluster-scoped set of CIDR blocks referenced by rules.

use std::collections::BTreeSet;
use std::net::IpAddr;

use palisade_core::{
    Condition, Converter, FieldError, ObjectMeta, RegistryError, ResourceObject, TypeMeta,
    Validator,
};
use palisade_registry::{age_of, col, ColumnSpec, Tabulator};
use serde::{Deserialize, Serialize};

use crate::record::RecordMeta;
use crate::service::API_VERSION;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddressGroupSpec {
    /// CIDR blocks, e.g. "10.0.0.0/8" or "2001:db8::/32".
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddressGroupStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_count: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddressGroup {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: AddressGroupSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AddressGroupStatus>,
}

impl AddressGroup {
    pub fn new(name: &str, spec: AddressGroupSpec) -> Self {
        Self {
            type_meta: TypeMeta::new(Self::API_VERSION, Self::KIND),
            metadata: ObjectMeta::named(name),
            spec,
            status: None,
        }
    }
}

impl ResourceObject for AddressGroup {
    const KIND: &'static str = "AddressGroup";
    const API_VERSION: &'static str = API_VERSION;
    const NAMESPACED: bool = false;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AddressGroupRecord {
    pub meta: RecordMeta,
    pub spec: AddressGroupSpec,
    pub status: Option<AddressGroupStatus>,
}

crate::record::impl_domain_record!(AddressGroupRecord);

pub struct AddressGroupConverter;

impl Converter<AddressGroup, AddressGroupRecord> for AddressGroupConverter {
    fn to_domain(&self, obj: &AddressGroup) -> Result<AddressGroupRecord, RegistryError> {
        Ok(AddressGroupRecord {
            meta: RecordMeta::from_meta(&obj.metadata),
            spec: obj.spec.clone(),
            status: obj.status.clone(),
        })
    }

    fn from_domain(&self, rec: &AddressGroupRecord) -> Result<AddressGroup, RegistryError> {
        Ok(AddressGroup {
            type_meta: TypeMeta::new(AddressGroup::API_VERSION, AddressGroup::KIND),
            metadata: rec.meta.to_meta(),
            spec: rec.spec.clone(),
            status: rec.status.clone(),
        })
    }
}

/// "addr/len" with a parseable IP and a prefix length the family allows.
fn valid_cidr(s: &str) -> bool {
    let Some((addr, len)) = s.split_once('/') else { return false };
    let Ok(ip) = addr.parse::<IpAddr>() else { return false };
    let Ok(len) = len.parse::<u8>() else { return false };
    match ip {
        IpAddr::V4(_) => len <= 32,
        IpAddr::V6(_) => len <= 128,
    }
}

pub struct AddressGroupValidator;

impl AddressGroupValidator {
    fn validate_spec(spec: &AddressGroupSpec) -> Vec<FieldError> {
        let mut errs = Vec::new();
        if spec.addresses.is_empty() {
            errs.push(FieldError::required("spec.addresses"));
        }
        let mut seen = BTreeSet::new();
        for (i, addr) in spec.addresses.iter().enumerate() {
            if !valid_cidr(addr) {
                errs.push(FieldError::invalid(
                    format!("spec.addresses[{i}]"),
                    format!("{addr:?} is not a CIDR block"),
                ));
            }
            if !seen.insert(addr.as_str()) {
                errs.push(FieldError::duplicate(
                    format!("spec.addresses[{i}]"),
                    format!("{addr:?} listed twice"),
                ));
            }
        }
        errs
    }
}

impl Validator<AddressGroup> for AddressGroupValidator {
    fn validate_create(&self, obj: &AddressGroup) -> Vec<FieldError> {
        Self::validate_spec(&obj.spec)
    }

    fn validate_update(&self, obj: &AddressGroup, _old: &AddressGroup) -> Vec<FieldError> {
        Self::validate_spec(&obj.spec)
    }
}

pub struct AddressGroupTabulator;

impl Tabulator<AddressGroup> for AddressGroupTabulator {
    fn columns(&self) -> Vec<ColumnSpec> {
        vec![col("Name"), col("Addresses"), col("Age")]
    }

    fn row(&self, obj: &AddressGroup) -> Vec<String> {
        vec![obj.metadata.name.clone(), obj.spec.addresses.len().to_string(), age_of(obj)]
    }
}
