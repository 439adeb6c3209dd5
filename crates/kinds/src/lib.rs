//! Sample network-security policy kinds wired into the generic registry:
//! Service (namespaced), AddressGroup (cluster-scoped), PolicyRule
//! (namespaced). Each kind supplies its Converter, Validator, and
//! Tabulator; everything else is the registry's job.

#![forbid(unsafe_code)]

mod address_group;
mod policy_rule;
mod record;
mod service;

pub use address_group::{
    AddressGroup, AddressGroupConverter, AddressGroupRecord, AddressGroupSpec,
    AddressGroupStatus, AddressGroupTabulator, AddressGroupValidator,
};
pub use policy_rule::{
    PolicyRule, PolicyRuleConverter, PolicyRuleRecord, PolicyRuleSpec, PolicyRuleStatus,
    PolicyRuleTabulator, PolicyRuleValidator, RuleAction,
};
pub use record::RecordMeta;
pub use service::{
    Service, ServiceConverter, ServicePort, ServiceRecord, ServiceSpec, ServiceStatus,
    ServiceTabulator, ServiceValidator, API_VERSION,
};
