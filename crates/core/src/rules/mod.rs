use std::fmt;

use crate::frame::{DeviceCapability, ModuleCapability};
use crate::routing::DeviceAssignment;

/// Snapshot of routing inputs handed to every rule. Rules only read it; the
/// working assignment list travels separately so each rule sees the previous
/// rule's output.
#[derive(Debug, Clone)]
pub struct RuleContext<'a> {
    pub active_module: Option<&'a str>,
    pub modules: &'a [ModuleCapability],
    pub devices: &'a [DeviceCapability],
}

/// A pluggable routing policy. Rules run after the scoring pass, highest
/// priority first; a rule whose condition holds replaces the working
/// assignment list with whatever its action returns.
pub trait RoutingRule: Send {
    fn name(&self) -> &str;

    fn priority(&self) -> i32;

    fn description(&self) -> &str {
        ""
    }

    fn condition(&self, context: &RuleContext<'_>, assignments: &[DeviceAssignment]) -> bool;

    fn action(
        &self,
        context: &RuleContext<'_>,
        assignments: Vec<DeviceAssignment>,
    ) -> Vec<DeviceAssignment>;
}

/// Closure-backed [`RoutingRule`] for callers that don't want a dedicated
/// rule type.
pub struct FnRule<C, A>
where
    C: Fn(&RuleContext<'_>, &[DeviceAssignment]) -> bool + Send,
    A: Fn(&RuleContext<'_>, Vec<DeviceAssignment>) -> Vec<DeviceAssignment> + Send,
{
    name: String,
    priority: i32,
    description: String,
    condition: C,
    action: A,
}

impl<C, A> FnRule<C, A>
where
    C: Fn(&RuleContext<'_>, &[DeviceAssignment]) -> bool + Send,
    A: Fn(&RuleContext<'_>, Vec<DeviceAssignment>) -> Vec<DeviceAssignment> + Send,
{
    pub fn new(name: impl Into<String>, priority: i32, condition: C, action: A) -> Self {
        Self {
            name: name.into(),
            priority,
            description: String::new(),
            condition,
            action,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl<C, A> RoutingRule for FnRule<C, A>
where
    C: Fn(&RuleContext<'_>, &[DeviceAssignment]) -> bool + Send,
    A: Fn(&RuleContext<'_>, Vec<DeviceAssignment>) -> Vec<DeviceAssignment> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn condition(&self, context: &RuleContext<'_>, assignments: &[DeviceAssignment]) -> bool {
        (self.condition)(context, assignments)
    }

    fn action(
        &self,
        context: &RuleContext<'_>,
        assignments: Vec<DeviceAssignment>,
    ) -> Vec<DeviceAssignment> {
        (self.action)(context, assignments)
    }
}

/// Ordered collection of routing rules. The list is kept sorted by descending
/// priority with an ordered insert, so registration cost stays proportional
/// to the handful of rules observed in practice.
#[derive(Default)]
pub struct RuleEngine {
    rules: Vec<Box<dyn RoutingRule>>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule. A rule with the same name as an existing one replaces it.
    pub fn register(&mut self, rule: Box<dyn RoutingRule>) {
        if let Some(existing) = self.rules.iter().position(|r| r.name() == rule.name()) {
            tracing::warn!(rule = rule.name(), "replacing routing rule with duplicate name");
            self.rules.remove(existing);
        }

        let position = self
            .rules
            .iter()
            .position(|r| r.priority() < rule.priority())
            .unwrap_or(self.rules.len());
        self.rules.insert(position, rule);
    }

    /// Removes a rule by name. Returns whether anything was removed.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|rule| rule.name() != name);
        before != self.rules.len()
    }

    /// Runs every matching rule in priority order. Each rule sees the output
    /// of the previous one.
    pub fn apply(
        &self,
        context: &RuleContext<'_>,
        mut assignments: Vec<DeviceAssignment>,
    ) -> Vec<DeviceAssignment> {
        for rule in &self.rules {
            if rule.condition(context, &assignments) {
                tracing::debug!(rule = rule.name(), "applying routing rule");
                assignments = rule.action(context, assignments);
            }
        }
        assignments
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rule names in application order.
    pub fn names(&self) -> Vec<&str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }
}

impl fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleEngine")
            .field("rules", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RuleContext<'static> {
        RuleContext {
            active_module: None,
            modules: &[],
            devices: &[],
        }
    }

    fn tag_rule(name: &str, priority: i32) -> Box<dyn RoutingRule> {
        let tag = name.to_string();
        Box::new(FnRule::new(
            name,
            priority,
            |_, _| true,
            move |_, mut assignments| {
                if let Some(assignment) = assignments.first_mut() {
                    assignment.primary.producer.push_str(&format!("+{tag}"));
                }
                assignments
            },
        ))
    }

    fn seed_assignment() -> Vec<DeviceAssignment> {
        use crate::frame::VisualizationKind;
        use crate::routing::PrimaryAssignment;

        vec![DeviceAssignment {
            device_id: "grid".to_string(),
            primary: PrimaryAssignment {
                module_id: "drums".to_string(),
                producer: "base".to_string(),
                kind: VisualizationKind::GenericColorArray,
                score: 40.0,
            },
            overlays: Vec::new(),
        }]
    }

    #[test]
    fn rules_run_in_descending_priority_order() {
        let mut engine = RuleEngine::new();
        engine.register(tag_rule("low", 1));
        engine.register(tag_rule("high", 10));
        engine.register(tag_rule("mid", 5));

        assert_eq!(engine.names(), vec!["high", "mid", "low"]);

        let result = engine.apply(&context(), seed_assignment());
        assert_eq!(result[0].primary.producer, "base+high+mid+low");
    }

    #[test]
    fn duplicate_names_replace_the_existing_rule() {
        let mut engine = RuleEngine::new();
        engine.register(tag_rule("only", 1));
        engine.register(tag_rule("only", 99));

        assert_eq!(engine.len(), 1);
        let result = engine.apply(&context(), seed_assignment());
        assert_eq!(result[0].primary.producer, "base+only");
    }

    #[test]
    fn unregister_removes_by_name() {
        let mut engine = RuleEngine::new();
        engine.register(tag_rule("gone", 3));

        assert!(engine.unregister("gone"));
        assert!(!engine.unregister("gone"));
        assert!(engine.is_empty());
    }

    #[test]
    fn false_conditions_leave_assignments_untouched() {
        let mut engine = RuleEngine::new();
        engine.register(Box::new(FnRule::new(
            "never",
            1,
            |_, _| false,
            |_, _| Vec::new(),
        )));

        let result = engine.apply(&context(), seed_assignment());
        assert_eq!(result.len(), 1);
    }
}
