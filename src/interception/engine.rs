// src/interception/engine.rs
//! Contract with the interception engine
//!
//! The engine is the low-level piece that actually hooks a method and hands
//! us a mutable view of the call. Everything here is the typed boundary the
//! rest of the crate talks through; the engine itself lives outside.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Handle identifying one interceptable operation
///
/// Points are minted by the engine adapter (e.g. `"dns.resolve"`); the core
/// only registers against the handles it is given.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterceptionPoint(Arc<str>);

impl InterceptionPoint {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InterceptionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which side of the original call a callback runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Before,
    After,
}

/// Result slot of an intercepted call
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// The call returned (or will return) this value
    Returned(Value),

    /// The call raised (or will raise) an error with this message
    Threw(String),
}

/// Mutable view of one intercepted call
#[derive(Debug, Clone)]
pub struct CallFrame {
    /// Method name as reported by the engine
    pub method: String,

    /// Receiver description (file name of a preference store, socket peer, ...)
    pub target: Option<String>,

    /// Call arguments
    pub args: Vec<Value>,

    outcome: Option<CallOutcome>,
    skip_original: bool,
}

impl CallFrame {
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            target: None,
            args,
            outcome: None,
            skip_original: false,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Attach the value the original call returned (after phase)
    pub fn with_result(mut self, value: Value) -> Self {
        self.outcome = Some(CallOutcome::Returned(value));
        self
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Argument rendered as text; strings are unquoted, null is absent
    pub fn arg_text(&self, index: usize) -> Option<String> {
        value_text(self.args.get(index)?)
    }

    /// Replace an argument; returns false when the index is out of range
    pub fn set_arg(&mut self, index: usize, value: Value) -> bool {
        match self.args.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn outcome(&self) -> Option<&CallOutcome> {
        self.outcome.as_ref()
    }

    /// Returned value rendered as text, if the call returned one
    pub fn result_text(&self) -> Option<String> {
        match &self.outcome {
            Some(CallOutcome::Returned(value)) => value_text(value),
            _ => None,
        }
    }

    /// Replace the result and skip the original call
    pub fn set_result(&mut self, value: Value) {
        self.outcome = Some(CallOutcome::Returned(value));
        self.skip_original = true;
    }

    /// Raise an error instead of running the original call
    pub fn set_exception(&mut self, message: impl Into<String>) {
        self.outcome = Some(CallOutcome::Threw(message.into()));
        self.skip_original = true;
    }

    /// Skip the original call without providing a result
    pub fn suppress(&mut self) {
        self.skip_original = true;
    }

    pub fn skips_original(&self) -> bool {
        self.skip_original
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Outcome a decisive handler asks for
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Skip the original call
    Suppress,

    /// Replace the result and skip the original call
    Return(Value),

    /// Fail the call with this message
    Throw(String),

    /// Replace one argument and let the call proceed
    ReplaceArg { index: usize, value: Value },
}

impl Decision {
    /// Apply this decision to a frame
    ///
    /// Returns false when the decision could not be applied (argument index
    /// out of range).
    pub fn apply(&self, frame: &mut CallFrame) -> bool {
        match self {
            Decision::Suppress => {
                frame.suppress();
                true
            }
            Decision::Return(value) => {
                frame.set_result(value.clone());
                true
            }
            Decision::Throw(message) => {
                frame.set_exception(message.clone());
                true
            }
            Decision::ReplaceArg { index, value } => frame.set_arg(*index, value.clone()),
        }
    }
}

/// A policy plugged into a hook chain
///
/// Both callbacks default to "no decision", so observers implement only the
/// side they care about. Errors and panics are absorbed by the chain.
pub trait PolicyHandler: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    fn before(&self, _frame: &CallFrame) -> anyhow::Result<Option<Decision>> {
        Ok(None)
    }

    fn after(&self, _frame: &CallFrame) -> anyhow::Result<Option<Decision>> {
        Ok(None)
    }
}

/// Callbacks the engine invokes around the original call
pub trait InterceptCallbacks: Send + Sync {
    fn before(&self, frame: &mut CallFrame);
    fn after(&self, frame: &mut CallFrame);
}

/// The interception engine capability
pub trait InterceptionEngine: Send + Sync {
    /// Start delivering calls on `point` to `callbacks`
    fn intercept(
        &self,
        point: &InterceptionPoint,
        callbacks: Arc<dyn InterceptCallbacks>,
    ) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_arg_text() {
        let frame = CallFrame::new("connect", vec![json!("example.com"), json!(443), Value::Null]);
        assert_eq!(frame.arg_text(0).as_deref(), Some("example.com"));
        assert_eq!(frame.arg_text(1).as_deref(), Some("443"));
        assert_eq!(frame.arg_text(2), None);
        assert_eq!(frame.arg_text(3), None);
    }

    #[test]
    fn test_decisions() {
        let mut frame = CallFrame::new("open", vec![json!("http://a.example")]);

        assert!(Decision::ReplaceArg { index: 0, value: json!("http://b.example") }.apply(&mut frame));
        assert_eq!(frame.arg_text(0).as_deref(), Some("http://b.example"));
        assert!(!frame.skips_original());

        assert!(!Decision::ReplaceArg { index: 5, value: json!(1) }.apply(&mut frame));

        Decision::Throw("unknown host".into()).apply(&mut frame);
        assert!(frame.skips_original());
        assert_eq!(frame.outcome(), Some(&CallOutcome::Threw("unknown host".into())));
    }

    #[test]
    fn test_point_identity() {
        let a = InterceptionPoint::new("dns.resolve");
        let b = InterceptionPoint::new(String::from("dns.resolve"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "dns.resolve");
    }
}
