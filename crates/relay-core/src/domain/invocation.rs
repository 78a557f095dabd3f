//! Invocation - one queued call of a named unit of work.
//!
//! Arguments travel as a JSON object. Two keys are reserved for the tracking
//! protocol and are stripped before the unit of work sees its arguments:
//! [`TASK_ID_ARG`] and [`PARENT_TASK_ID_ARG`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{TaskId, TaskName};

/// Keyword arguments of a unit of work.
pub type Arguments = serde_json::Map<String, Value>;

pub const TASK_ID_ARG: &str = "task_id";
pub const PARENT_TASK_ID_ARG: &str = "parent_task_id";

/// Transient `(task_name, arguments)` pair handed from the queue to a worker.
///
/// Not persisted; the ledger row it corresponds to is found through the
/// identity keys inside `arguments`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub task_name: TaskName,
    pub arguments: Arguments,
}

impl Invocation {
    pub fn new(task_name: TaskName, arguments: Arguments) -> Self {
        Self {
            task_name,
            arguments,
        }
    }

    pub fn task_id(&self) -> Option<TaskId> {
        read_id(&self.arguments, TASK_ID_ARG)
    }

    pub fn parent_task_id(&self) -> Option<TaskId> {
        read_id(&self.arguments, PARENT_TASK_ID_ARG)
    }
}

/// Reads an id argument without removing it.
///
/// Empty strings and `null` count as absent. Numbers are accepted and
/// rendered as text so that integer entity ids can double as task ids.
pub fn read_id(arguments: &Arguments, key: &str) -> Option<TaskId> {
    match arguments.get(key)? {
        Value::String(s) if !s.is_empty() => Some(TaskId::new(s.clone())),
        Value::Number(n) => Some(TaskId::new(n.to_string())),
        _ => None,
    }
}

/// Removes an id argument, returning it if it was present and usable.
pub fn take_id(arguments: &mut Arguments, key: &str) -> Option<TaskId> {
    let id = read_id(arguments, key);
    arguments.remove(key);
    id
}

/// Returns `arguments` with the identity keys injected.
///
/// The parent key is only written when there is a parent, so root tasks
/// replay with exactly the arguments they were first enqueued with.
pub fn with_identity(
    mut arguments: Arguments,
    task_id: &TaskId,
    parent_id: Option<&TaskId>,
) -> Arguments {
    arguments.insert(
        TASK_ID_ARG.to_string(),
        Value::String(task_id.as_str().to_string()),
    );
    match parent_id {
        Some(parent) => {
            arguments.insert(
                PARENT_TASK_ID_ARG.to_string(),
                Value::String(parent.as_str().to_string()),
            );
        }
        None => {
            arguments.remove(PARENT_TASK_ID_ARG);
        }
    }
    arguments
}

/// Returns a copy of `arguments` without the identity keys.
pub fn without_identity(arguments: &Arguments) -> Arguments {
    let mut stripped = arguments.clone();
    stripped.remove(TASK_ID_ARG);
    stripped.remove(PARENT_TASK_ID_ARG);
    stripped
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    #[rstest]
    #[case::string(json!({"task_id": "abc"}), Some("abc"))]
    #[case::number(json!({"task_id": 42}), Some("42"))]
    #[case::empty(json!({"task_id": ""}), None)]
    #[case::null(json!({"task_id": null}), None)]
    #[case::missing(json!({"foo": "bar"}), None)]
    fn reads_task_id(#[case] raw: Value, #[case] expected: Option<&str>) {
        let arguments = args(raw);
        assert_eq!(read_id(&arguments, TASK_ID_ARG), expected.map(TaskId::from));
    }

    #[test]
    fn take_id_strips_the_key_even_when_unusable() {
        let mut arguments = args(json!({"task_id": "", "foo": 1}));
        assert_eq!(take_id(&mut arguments, TASK_ID_ARG), None);
        assert!(!arguments.contains_key(TASK_ID_ARG));
        assert_eq!(arguments["foo"], 1);
    }

    #[test]
    fn identity_injection_is_reversible() {
        let original = args(json!({"build_id": "b1"}));
        let parent = TaskId::new("root1");
        let injected = with_identity(original.clone(), &TaskId::new("abc"), Some(&parent));

        let invocation = Invocation::new(TaskName::new("sync_job"), injected.clone());
        assert_eq!(invocation.task_id(), Some(TaskId::new("abc")));
        assert_eq!(invocation.parent_task_id(), Some(parent));
        assert_eq!(without_identity(&injected), original);
    }

    #[test]
    fn root_identity_has_no_parent_key() {
        let stale = args(json!({"parent_task_id": "old"}));
        let injected = with_identity(stale, &TaskId::new("abc"), None);
        assert!(!injected.contains_key(PARENT_TASK_ID_ARG));
    }
}
