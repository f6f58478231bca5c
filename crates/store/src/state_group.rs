use std::collections::HashMap;

use parking_lot::RwLock;
use pvs_errors::ErrorMetadata;
use pvs_value::{StateGroup, StateValue};

/// Resolves state code↔name per point group.
///
/// Groups are keyed by name; the empty name is the global group every
/// named group falls back to.
#[derive(Default)]
pub struct StateGroupResolver {
    groups: RwLock<HashMap<String, StateGroup>>,
}

impl StateGroupResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the full set of configured groups, e.g. on a metadata
    /// reload.
    pub fn reload(&self, groups: Vec<StateGroup>) {
        let mut g = self.groups.write();
        g.clear();
        for group in groups {
            g.insert(group.name.clone(), group);
        }
    }

    /// Snapshot every configured group, in no particular order.
    pub fn groups(&self) -> Vec<StateGroup> {
        self.groups.read().values().cloned().collect()
    }

    /// Resolve a value's state against `group_name` (empty for the global
    /// group directly). Fills in whichever of code/name is missing.
    /// Fails with `UnresolvedState` if resolution comes up empty.
    pub fn resolve(&self, group_name: &str, state: &StateValue) -> anyhow::Result<StateValue> {
        if state.is_resolved() || (state.code.is_none() && state.name.is_none()) {
            return Ok(state.clone());
        }
        let groups = self.groups.read();
        let named = groups.get(group_name);
        let global = if group_name.is_empty() {
            None
        } else {
            groups.get("")
        };

        if let Some(code) = state.code {
            let name = named
                .and_then(|g| g.name_for_code(code))
                .or_else(|| global.and_then(|g| g.name_for_code(code)));
            return match name {
                Some(name) => Ok(StateValue::resolved(code, name)),
                None => Err(unresolved(group_name, state)),
            };
        }
        if let Some(name) = &state.name {
            let code = named
                .and_then(|g| g.code_for_name(name))
                .or_else(|| global.and_then(|g| g.code_for_name(name)));
            return match code {
                Some(code) => Ok(StateValue::resolved(code, name.clone())),
                None => Err(unresolved(group_name, state)),
            };
        }
        Ok(state.clone())
    }
}

fn unresolved(group_name: &str, state: &StateValue) -> anyhow::Error {
    ErrorMetadata::unresolved_state(format!(
        "could not resolve state {state:?} in group {group_name:?}"
    ))
    .into()
}

#[cfg(test)]
mod tests {
    use pvs_value::State;

    use super::*;

    fn groups() -> Vec<StateGroup> {
        vec![
            StateGroup::new(
                "",
                vec![
                    State {
                        code: 0,
                        name: "OK".into(),
                    },
                    State {
                        code: 1,
                        name: "FAULT".into(),
                    },
                ],
            ),
            StateGroup::new(
                "valve",
                vec![State {
                    code: 2,
                    name: "OPEN".into(),
                }],
            ),
        ]
    }

    #[test]
    fn resolves_code_only_via_named_group() {
        let r = StateGroupResolver::new();
        r.reload(groups());
        let resolved = r.resolve("valve", &StateValue::code(2)).unwrap();
        assert_eq!(resolved.name.as_deref(), Some("OPEN"));
    }

    #[test]
    fn falls_back_to_global_group() {
        let r = StateGroupResolver::new();
        r.reload(groups());
        let resolved = r.resolve("valve", &StateValue::code(0)).unwrap();
        assert_eq!(resolved.name.as_deref(), Some("OK"));
    }

    #[test]
    fn unresolved_name_is_an_error() {
        let r = StateGroupResolver::new();
        r.reload(groups());
        assert!(r.resolve("valve", &StateValue::name("UNKNOWN")).is_err());
    }

    #[test]
    fn already_resolved_passes_through() {
        let r = StateGroupResolver::new();
        let resolved = r.resolve("", &StateValue::resolved(0, "OK")).unwrap();
        assert_eq!(resolved, StateValue::resolved(0, "OK"));
    }
}
