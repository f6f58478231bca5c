use serde::{Deserialize, Serialize};

/// A value's state component: a code, a name, or (normally, once resolved)
/// both. Carried inside [`crate::Value::State`] and alongside the point
/// value's separate `state` field.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct StateValue {
    pub code: Option<i64>,
    pub name: Option<String>,
}

impl StateValue {
    pub fn code(code: i64) -> Self {
        Self {
            code: Some(code),
            name: None,
        }
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self {
            code: None,
            name: Some(name.into()),
        }
    }

    pub fn resolved(code: i64, name: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            name: Some(name.into()),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.code.is_some() && self.name.is_some()
    }
}

/// One entry in a [`StateGroup`]: a code/name pair.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub code: i64,
    pub name: String,
}

/// A named ordered set of [`State`]s. The empty
/// name denotes the global group that per-point groups fall back to when
/// their own group doesn't resolve a code or name.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StateGroup {
    pub name: String,
    pub states: Vec<State>,
}

impl StateGroup {
    pub fn new(name: impl Into<String>, states: Vec<State>) -> Self {
        Self {
            name: name.into(),
            states,
        }
    }

    pub fn is_global(&self) -> bool {
        self.name.is_empty()
    }

    pub fn name_for_code(&self, code: i64) -> Option<&str> {
        self.states
            .iter()
            .find(|s| s.code == code)
            .map(|s| s.name.as_str())
    }

    pub fn code_for_name(&self, name: &str) -> Option<i64> {
        self.states.iter().find(|s| s.name == name).map(|s| s.code)
    }
}
