//! Declarative rules that decide whether a river wants a message.
//!
//! Rules come in two flavours with different failure semantics:
//!
//! - **demands** (`demand_*`) select the messages a river is interested in.
//!   A failed demand means "not for me": the message is dropped silently.
//! - **requirements** (`require_*`, `reject_key`) describe the shape an
//!   interesting message must have. A failed requirement means the producer
//!   broke the contract, and the river's error callback receives a
//!   [`Problems`] report.
//!
//! Evaluation order is fixed: every demand first, in declaration order, then
//! the remaining rules in declaration order. The first failed demand ends the
//! evaluation; every failed requirement is reported. Inside an array element
//! the first failure describes that element.

use std::collections::BTreeSet;
use std::fmt;

use crate::message::{Message, Node, ValueKind};
use crate::packet::Packet;

/// A single predicate over a message node.
#[derive(Debug, Clone)]
enum Rule {
    DemandKey(String),
    DemandValue { path: String, expected: String },
    DemandAny { path: String, allowed: Vec<String> },
    RequireKeys(Vec<String>),
    RequireValue { path: String, expected: String },
    RejectKey(String),
    RequireTyped { path: String, kind: ValueKind },
    RequireArray { path: String, element: Rules },
    InterestedIn(Vec<String>),
}

impl Rule {
    const fn is_demand(&self) -> bool {
        matches!(
            self,
            Self::DemandKey(_) | Self::DemandValue { .. } | Self::DemandAny { .. }
        )
    }

    /// Check the rule against `node`. The error is a human-readable reason;
    /// `prefix` locates nested array elements in that reason.
    fn check(&self, node: Node<'_>, prefix: &str) -> Result<(), String> {
        match self {
            Self::DemandKey(path) => {
                if node.has(path) {
                    Ok(())
                } else {
                    Err(format!("missing demanded key {prefix}{path}"))
                }
            }
            Self::DemandValue { path, expected } | Self::RequireValue { path, expected } => {
                match node.get(path).and_then(|n| n.value().as_str()) {
                    Some(actual) if actual == expected => Ok(()),
                    Some(actual) => Err(format!(
                        "{prefix}{path} is {actual:?}, expected {expected:?}"
                    )),
                    None => Err(format!("missing key {prefix}{path} (expected {expected:?})")),
                }
            }
            Self::DemandAny { path, allowed } => {
                match node.get(path).and_then(|n| n.value().as_str()) {
                    Some(actual) if allowed.iter().any(|a| a == actual) => Ok(()),
                    Some(actual) => Err(format!(
                        "{prefix}{path} is {actual:?}, expected one of {allowed:?}"
                    )),
                    None => Err(format!("missing key {prefix}{path} (expected one of {allowed:?})")),
                }
            }
            Self::RequireKeys(paths) => {
                let missing: Vec<String> = paths
                    .iter()
                    .filter(|path| !node.has(path))
                    .map(|path| format!("{prefix}{path}"))
                    .collect();
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(format!("missing required key(s): {}", missing.join(", ")))
                }
            }
            Self::RejectKey(path) => {
                if node.has(path) {
                    Err(format!("rejected key {prefix}{path} is present"))
                } else {
                    Ok(())
                }
            }
            Self::RequireTyped { path, kind } => match node.get(path) {
                Some(found) if !kind.accepts(found.value()) => Err(format!(
                    "{prefix}{path} is not a valid {kind}: {}",
                    found.value()
                )),
                _ => Ok(()),
            },
            Self::RequireArray { path, element } => {
                let Some(found) = node.get(path) else {
                    return Err(format!("missing required array {prefix}{path}"));
                };
                let Some(items) = found.value().as_array() else {
                    return Err(format!("{prefix}{path} is not an array"));
                };
                for (index, item) in items.iter().enumerate() {
                    let nested_prefix = format!("{prefix}{path}[{index}].");
                    element.check_all(Node::new(item), &nested_prefix)?;
                }
                Ok(())
            }
            Self::InterestedIn(_) => Ok(()),
        }
    }

    fn declared_paths(&self) -> Vec<&str> {
        match self {
            Self::DemandKey(path)
            | Self::DemandValue { path, .. }
            | Self::DemandAny { path, .. }
            | Self::RequireValue { path, .. }
            | Self::RequireTyped { path, .. }
            | Self::RequireArray { path, .. } => vec![path.as_str()],
            Self::RequireKeys(paths) | Self::InterestedIn(paths) => {
                paths.iter().map(String::as_str).collect()
            }
            Self::RejectKey(_) => Vec::new(),
        }
    }
}

/// An ordered set of rules.
///
/// Built with chained calls:
///
/// ```
/// use vigil_message::{Rules, ValueKind};
///
/// let rules = Rules::new()
///     .demand_value("@event_name", "claim_period_changed")
///     .require_keys(&["periodId", "previousState", "currentState"])
///     .require_typed("@created", ValueKind::DateTime)
///     .interested_in(&["hasWarnings"]);
/// # let _ = rules;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Rules {
    rules: Vec<Rule>,
    declared: BTreeSet<String>,
}

impl Rules {
    /// Create an empty rule set. An empty set accepts every message.
    pub fn new() -> Self {
        Self::default()
    }

    fn with(mut self, rule: Rule) -> Self {
        for path in rule.declared_paths() {
            self.declared.insert(path.to_owned());
        }
        self.rules.push(rule);
        self
    }

    /// Not interested unless `path` is present.
    #[must_use]
    pub fn demand_key(self, path: &str) -> Self {
        self.with(Rule::DemandKey(path.to_owned()))
    }

    /// Not interested unless `path` holds exactly `value`.
    #[must_use]
    pub fn demand_value(self, path: &str, value: &str) -> Self {
        self.with(Rule::DemandValue {
            path: path.to_owned(),
            expected: value.to_owned(),
        })
    }

    /// Not interested unless `path` holds one of `values`.
    #[must_use]
    pub fn demand_any(self, path: &str, values: &[&str]) -> Self {
        self.with(Rule::DemandAny {
            path: path.to_owned(),
            allowed: values.iter().map(|v| (*v).to_owned()).collect(),
        })
    }

    /// Malformed if `path` is absent or null.
    #[must_use]
    pub fn require_key(self, path: &str) -> Self {
        self.require_keys(&[path])
    }

    /// Malformed if any of `paths` is absent or null. All missing paths are
    /// listed in the report.
    #[must_use]
    pub fn require_keys(self, paths: &[&str]) -> Self {
        self.with(Rule::RequireKeys(
            paths.iter().map(|p| (*p).to_owned()).collect(),
        ))
    }

    /// Malformed unless `path` holds exactly `value`.
    #[must_use]
    pub fn require_value(self, path: &str, value: &str) -> Self {
        self.with(Rule::RequireValue {
            path: path.to_owned(),
            expected: value.to_owned(),
        })
    }

    /// Malformed if `path` is present.
    #[must_use]
    pub fn reject_key(self, path: &str) -> Self {
        self.with(Rule::RejectKey(path.to_owned()))
    }

    /// Malformed if `path` is present but cannot be read as `kind`.
    ///
    /// An absent value passes; combine with [`require_key`](Self::require_key)
    /// when the field is mandatory.
    #[must_use]
    pub fn require_typed(self, path: &str, kind: ValueKind) -> Self {
        self.with(Rule::RequireTyped {
            path: path.to_owned(),
            kind,
        })
    }

    /// Malformed unless `path` is an array whose every element satisfies
    /// `element`. Nests to any depth.
    #[must_use]
    pub fn require_array(self, path: &str, element: Self) -> Self {
        self.with(Rule::RequireArray {
            path: path.to_owned(),
            element,
        })
    }

    /// Declare optional keys the listener may read. Never fails.
    #[must_use]
    pub fn interested_in(self, paths: &[&str]) -> Self {
        self.with(Rule::InterestedIn(
            paths.iter().map(|p| (*p).to_owned()).collect(),
        ))
    }

    /// Keys a [`Packet`] accepted by these rules may hand out.
    pub const fn declared_keys(&self) -> &BTreeSet<String> {
        &self.declared
    }

    /// Evaluate the rules against a message.
    pub fn evaluate<'a>(&'a self, message: &'a Message) -> Verdict<'a> {
        let root = message.root();

        for rule in self.rules.iter().filter(|r| r.is_demand()) {
            if let Err(reason) = rule.check(root, "") {
                return Verdict::NotInterested(reason);
            }
        }

        let problems: Vec<String> = self
            .rules
            .iter()
            .filter(|r| !r.is_demand())
            .filter_map(|rule| rule.check(root, "").err())
            .collect();
        if !problems.is_empty() {
            return Verdict::Malformed(Problems::new(message.to_json(), problems));
        }

        Verdict::Accepted(Packet::new(message, &self.declared))
    }

    /// Nested evaluation for array elements: demands and requirements both
    /// count as problems, since the enclosing message already matched.
    fn check_all(&self, node: Node<'_>, prefix: &str) -> Result<(), String> {
        let demands = self.rules.iter().filter(|r| r.is_demand());
        let others = self.rules.iter().filter(|r| !r.is_demand());
        for rule in demands.chain(others) {
            rule.check(node, prefix)?;
        }
        Ok(())
    }
}

/// Outcome of evaluating [`Rules`] against a message.
#[derive(Debug)]
pub enum Verdict<'a> {
    /// Every rule passed.
    Accepted(Packet<'a>),
    /// A demand failed. Carries the reason for debug logging only.
    NotInterested(String),
    /// A requirement failed on a message the river is interested in.
    Malformed(Problems),
}

impl Verdict<'_> {
    /// Whether the message was accepted.
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// A report of the requirements a message failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problems {
    original: String,
    problems: Vec<String>,
}

impl Problems {
    /// Build a report for the given original message JSON.
    pub const fn new(original: String, problems: Vec<String>) -> Self {
        Self { original, problems }
    }

    /// The individual problem descriptions.
    pub fn problems(&self) -> &[String] {
        &self.problems
    }

    /// Whether any problem mentions `needle` (typically a key name).
    pub fn mentions(&self, needle: &str) -> bool {
        self.problems.iter().any(|p| p.contains(needle))
    }

    /// The report followed by the offending message, for operator logs.
    pub fn to_extended_report(&self) -> String {
        format!("{self}\n\nOriginal message:\n{}", self.original)
    }
}

impl fmt::Display for Problems {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "message problems:")?;
        for problem in &self.problems {
            writeln!(f, "  - {problem}")?;
        }
        Ok(())
    }
}
