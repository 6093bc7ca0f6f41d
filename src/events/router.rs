//! First-match rule routing of events to senders

use super::{Event, EventMatcher, EventSender};
use crate::core::{
    error::{CoreError, CoreResult},
    lifecycle::{Lifecycle, LifecycleManager},
};
use async_trait::async_trait;
use tracing::debug;

/// A matcher and the sender events go to when it matches
pub struct Rule {
    pub matcher: EventMatcher,
    pub sender: Box<dyn EventSender>,
}

impl Rule {
    pub fn new(matcher: EventMatcher, sender: impl EventSender + 'static) -> Self {
        Self {
            matcher,
            sender: Box::new(sender),
        }
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("matcher", &self.matcher)
            .field("sender", &self.sender.name())
            .finish()
    }
}

/// Sends each event to the sender of the first matching rule, or the default
///
/// Rules are evaluated top to bottom. The router owns every sender and
/// forwards its lifecycle to them: rule senders in order, the default last.
/// Rules can only be changed while the router is closed.
pub struct EventRouter {
    lifecycle: LifecycleManager,
    rules: Vec<Rule>,
    default_sender: Box<dyn EventSender>,
}

impl EventRouter {
    pub fn new(name: impl Into<String>, default_sender: impl EventSender + 'static) -> Self {
        Self {
            lifecycle: LifecycleManager::new(name),
            rules: Vec::new(),
            default_sender: Box::new(default_sender),
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn add_rule(&mut self, rule: Rule) -> CoreResult<()> {
        self.lifecycle.require_closed("add rule")?;
        self.rules.push(rule);
        Ok(())
    }

    /// Insert a rule at `index`, ahead of the rules currently there
    pub fn insert_rule(&mut self, index: usize, rule: Rule) -> CoreResult<()> {
        self.lifecycle.require_closed("insert rule")?;
        if index > self.rules.len() {
            return Err(CoreError::configuration(
                self.lifecycle.name(),
                format!("rule index {} out of range (have {})", index, self.rules.len()),
            ));
        }
        self.rules.insert(index, rule);
        Ok(())
    }

    pub fn remove_rule(&mut self, index: usize) -> CoreResult<Rule> {
        self.lifecycle.require_closed("remove rule")?;
        if index >= self.rules.len() {
            return Err(CoreError::configuration(
                self.lifecycle.name(),
                format!("rule index {} out of range (have {})", index, self.rules.len()),
            ));
        }
        Ok(self.rules.remove(index))
    }

    fn target_index(&self, event: &Event) -> Option<usize> {
        self.rules.iter().position(|r| r.matcher.matches(event))
    }

    /// Sender that `send` would use for this event
    pub fn resolve_target(&self, event: &Event) -> &dyn EventSender {
        match self.target_index(event) {
            Some(i) => self.rules[i].sender.as_ref(),
            None => self.default_sender.as_ref(),
        }
    }

    pub async fn send(&mut self, event: &Event) -> CoreResult<()> {
        let sender = match self.target_index(event) {
            Some(i) => &mut self.rules[i].sender,
            None => &mut self.default_sender,
        };
        debug!(
            router = %self.lifecycle.name(),
            event_type = %event.event_type,
            sender = %sender.name(),
            "routing event"
        );
        sender.send(event).await
    }
}

#[async_trait]
impl Lifecycle for EventRouter {
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleManager {
        &mut self.lifecycle
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Lifecycle> {
        let mut children: Vec<&mut dyn Lifecycle> = self
            .rules
            .iter_mut()
            .map(|r| &mut r.sender as &mut dyn Lifecycle)
            .collect();
        children.push(&mut self.default_sender as &mut dyn Lifecycle);
        children
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("name", &self.lifecycle.name())
            .field("rules", &self.rules)
            .field("default", &self.default_sender.name())
            .finish()
    }
}
