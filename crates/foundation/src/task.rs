//! Task model of the flume engine.
//!
//! Instructions spawn tasks; the mode decides where the task may run.
//! Ordering between tasks is only via data dependence: a task may not
//! fire until its blocking inputs are closed.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::arg::Arg;
use crate::var::Var;

/// Execution locality of a spawned task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskMode {
    /// No task spawned: runs inline in the current task.
    Sync,
    /// Spawned on the current worker.
    Local,
    /// Spawned on the current control context.
    LocalControl,
    /// Spawned anywhere in the control plane.
    Control,
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskMode::Sync => "sync",
            TaskMode::Local => "local",
            TaskMode::LocalControl => "local_control",
            TaskMode::Control => "control",
        };
        write!(f, "{}", name)
    }
}

/// What a wait statement does once its variables close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WaitMode {
    /// Suspend until closed; no task body is dispatched.
    WaitOnly,
    /// Dispatch the body as a task once closed.
    TaskDispatch,
}

/// Keys for task properties attached to calls and operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskPropKey {
    Priority,
    Parallelism,
    Location,
}

impl fmt::Display for TaskPropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskPropKey::Priority => "prio",
            TaskPropKey::Parallelism => "par",
            TaskPropKey::Location => "location",
        };
        write!(f, "{}", name)
    }
}

/// Properties of a spawned task: priority, parallelism, target location.
///
/// Values must be local ints by the time they reach an instruction; the
/// walker retrieves annotation futures before attaching them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskProps {
    props: IndexMap<TaskPropKey, Arg>,
}

impl TaskProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: TaskPropKey, value: Arg) {
        self.props.insert(key, value);
    }

    pub fn get(&self, key: TaskPropKey) -> Option<&Arg> {
        self.props.get(&key)
    }

    /// Location defaults to "any worker" when unspecified.
    pub fn get_with_default(&self, key: TaskPropKey) -> Arg {
        match key {
            TaskPropKey::Location => self
                .props
                .get(&key)
                .cloned()
                .unwrap_or_else(|| Arg::int_lit(-1)),
            _ => self
                .props
                .get(&key)
                .cloned()
                .unwrap_or_else(|| Arg::int_lit(0)),
        }
    }

    /// Keep only the listed keys.
    pub fn filter(&self, keys: &[TaskPropKey]) -> TaskProps {
        TaskProps {
            props: self
                .props
                .iter()
                .filter(|(k, _)| keys.contains(k))
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &Arg> {
        self.props.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TaskPropKey, &Arg)> {
        self.props.iter()
    }

    /// Every property must be an int constant or an int-valued local.
    pub fn assert_internal_types_valid(&self) {
        for (key, value) in &self.props {
            assert!(
                value.is_immediate_int(),
                "task property {} must be an immediate int, got {}",
                key,
                value
            );
        }
    }

    /// Substitute variable references, for instruction renaming.
    pub fn rename_args(&mut self, renames: &IndexMap<Var, Arg>) {
        for value in self.props.values_mut() {
            if let Arg::Var(v) = value {
                if let Some(replacement) = renames.get(v) {
                    *value = replacement.clone();
                }
            }
        }
    }
}

impl fmt::Display for TaskProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.props {
            write!(f, " @{}={}", key, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_keeps_only_listed_keys() {
        let mut props = TaskProps::new();
        props.put(TaskPropKey::Priority, Arg::int_lit(5));
        props.put(TaskPropKey::Parallelism, Arg::int_lit(2));
        let filtered = props.filter(&[TaskPropKey::Priority]);
        assert_eq!(filtered.get(TaskPropKey::Priority), Some(&Arg::int_lit(5)));
        assert_eq!(filtered.get(TaskPropKey::Parallelism), None);
    }

    #[test]
    #[should_panic(expected = "must be an immediate int")]
    fn non_int_property_is_rejected() {
        let mut props = TaskProps::new();
        props.put(TaskPropKey::Priority, Arg::string_lit("high"));
        props.assert_internal_types_valid();
    }
}
