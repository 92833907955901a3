use std::collections::BTreeMap;

use k8s_openapi::{
    apimachinery::pkg::apis::meta::v1::{Condition, ObjectMeta, OwnerReference, Time},
    chrono::Utc,
};
use kube::Resource;

use crate::error::{Error, Result};

/// Returns `current ∪ desired`; keys present in both take the desired value.
pub fn merge_labels(
    current: Option<&BTreeMap<String, String>>,
    desired: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    current
        .into_iter()
        .flatten()
        .chain(desired)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

pub fn has_label(meta: &ObjectMeta, key: &str, value: &str) -> bool {
    meta.labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .is_some_and(|label| label == value)
}

/// Builds a controller reference that blocks the owner's deletion until the
/// dependent is collected.
pub fn controller_reference<K>(owner: &K) -> Result<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    let mut reference = owner
        .controller_owner_ref(&())
        .ok_or(Error::MissingField("metadata.uid"))?;
    reference.block_owner_deletion = Some(true);
    Ok(reference)
}

/// Records `reference` as the controller of `meta`, refusing to steal an
/// object that another owner already controls.
pub fn set_controller_reference(meta: &mut ObjectMeta, reference: OwnerReference) -> Result<()> {
    let references = meta.owner_references.get_or_insert_with(Default::default);

    if let Some(other) = references
        .iter()
        .find(|other| other.controller == Some(true) && other.uid != reference.uid)
    {
        return Err(Error::OwnedByOther {
            kind: other.kind.clone(),
            name: meta.name.clone().unwrap_or_default(),
            owner: other.name.clone(),
        });
    }

    match references.iter_mut().find(|other| other.uid == reference.uid) {
        Some(other) => *other = reference,
        None => references.push(reference),
    }
    Ok(())
}

pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|condition| condition.type_ == type_)
}

/// A condition to be merged with [`set_condition`].
#[derive(Clone, Debug)]
pub struct ConditionSpec<'a> {
    pub type_: &'a str,
    pub status: bool,
    pub reason: &'a str,
    pub message: String,
    pub observed_generation: Option<i64>,
}

/// Returns `conditions` with the given condition inserted or updated.
///
/// The transition time moves only when the condition's status flips.
pub fn set_condition(conditions: &[Condition], spec: ConditionSpec<'_>) -> Vec<Condition> {
    let status = if spec.status { "True" } else { "False" };
    let mut conditions = conditions.to_vec();

    match conditions
        .iter_mut()
        .find(|condition| condition.type_ == spec.type_)
    {
        Some(condition) => {
            if condition.status != status {
                condition.status = status.into();
                condition.last_transition_time = Time(Utc::now());
            }
            condition.reason = spec.reason.into();
            condition.message = spec.message;
            condition.observed_generation = spec.observed_generation;
        }
        None => conditions.push(Condition {
            last_transition_time: Time(Utc::now()),
            message: spec.message,
            observed_generation: spec.observed_generation,
            reason: spec.reason.into(),
            status: status.into(),
            type_: spec.type_.into(),
        }),
    }
    conditions
}
