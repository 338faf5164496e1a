//! Watch sessions and the subscriber registry.

use crate::matching::{FieldSelector, LabelSelector};
use crate::types::resource::{name, namespace, ResourceType};
use crate::types::watch::{WatchEvent, WatchEventType};
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Scope of a watch: one resource type, optionally one namespace and name, and
/// label/field selectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchFilter {
    pub resource_type: ResourceType,
    /// `None` watches every namespace
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub labels: LabelSelector,
    pub fields: FieldSelector,
}

impl WatchFilter {
    pub fn new(resource_type: ResourceType, namespace: Option<&str>) -> Self {
        Self {
            resource_type,
            namespace: namespace.map(str::to_string),
            name: None,
            labels: LabelSelector::default(),
            fields: FieldSelector::default(),
        }
    }

    pub fn with_name(mut self, name: Option<&str>) -> Self {
        self.name = name.map(str::to_string);
        self
    }

    pub fn with_labels(mut self, labels: LabelSelector) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_fields(mut self, fields: FieldSelector) -> Self {
        self.fields = fields;
        self
    }

    /// Whether `obj` of type `resource_type` falls inside this watch.
    pub fn matches(&self, resource_type: &ResourceType, obj: &Value) -> bool {
        if *resource_type != self.resource_type {
            return false;
        }
        if let Some(ns) = &self.namespace {
            if namespace(obj) != Some(ns.as_str()) {
                return false;
            }
        }
        if let Some(n) = &self.name {
            if name(obj) != Some(n.as_str()) {
                return false;
            }
        }
        self.labels.matches_object(obj) && self.fields.matches(obj)
    }

    /// Event as seen through this filter.
    ///
    /// A modification that moves an object into the selection is reported as
    /// `ADDED`, one that moves it out as `DELETED`.
    pub fn translate(
        &self,
        resource_type: &ResourceType,
        event_type: WatchEventType,
        object: &Value,
        previous: Option<&Value>,
    ) -> Option<WatchEventType> {
        let now = self.matches(resource_type, object);
        match event_type {
            WatchEventType::Modified => {
                let before = previous.is_some_and(|p| self.matches(resource_type, p));
                match (before, now) {
                    (true, true) => Some(WatchEventType::Modified),
                    (false, true) => Some(WatchEventType::Added),
                    (true, false) => Some(WatchEventType::Deleted),
                    (false, false) => None,
                }
            }
            other => now.then_some(other),
        }
    }
}

/// A mutation recorded by the store, as delivered to subscribers.
#[derive(Debug, Clone)]
pub(crate) struct Change {
    pub resource_type: ResourceType,
    pub event_type: WatchEventType,
    pub object: Value,
    pub previous: Option<Value>,
}

impl Change {
    pub fn resource_version(&self) -> u64 {
        crate::types::resource::resource_version(&self.object).unwrap_or_default()
    }

    pub fn event_for(&self, filter: &WatchFilter) -> Option<WatchEvent> {
        filter
            .translate(
                &self.resource_type,
                self.event_type,
                &self.object,
                self.previous.as_ref(),
            )
            .map(|event_type| WatchEvent::new(event_type, self.object.clone()))
    }
}

#[derive(Debug)]
struct Subscriber {
    id: u64,
    filter: WatchFilter,
    /// Changes at or below this version are never delivered
    since: u64,
    sender: UnboundedSender<WatchEvent>,
}

/// Live watch subscribers.
///
/// Publishing happens while the store's write lock is held, so every subscriber
/// receives events in store mutation order.
#[derive(Debug, Default)]
pub(crate) struct WatchRegistry {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

impl WatchRegistry {
    /// Register a subscriber, first queueing `initial` events for it. Later changes
    /// are delivered only when their version is above `since`.
    pub fn subscribe(
        &mut self,
        filter: WatchFilter,
        since: u64,
        initial: Vec<WatchEvent>,
    ) -> WatchSession {
        let (sender, receiver) = mpsc::unbounded_channel();
        for event in initial {
            // The receiver is still in scope, so sending cannot fail.
            let _ = sender.send(event);
        }
        self.next_id += 1;
        let id = self.next_id;
        debug!(id, since, resource = %filter.resource_type, namespace = ?filter.namespace, "watch opened");
        self.subscribers.push(Subscriber {
            id,
            filter,
            since,
            sender,
        });
        WatchSession { id, receiver }
    }

    /// Deliver `change` to every interested subscriber, dropping closed ones.
    pub fn publish(&mut self, change: &Change) {
        self.subscribers.retain(|subscriber| {
            if subscriber.sender.is_closed() {
                debug!(id = subscriber.id, "watch closed by client");
                return false;
            }
            if change.resource_version() <= subscriber.since {
                return true;
            }
            match change.event_for(&subscriber.filter) {
                Some(event) => subscriber.sender.send(event).is_ok(),
                None => true,
            }
        });
    }

    /// Drop every subscriber, ending all sessions.
    pub fn close_all(&mut self) {
        if !self.subscribers.is_empty() {
            debug!(count = self.subscribers.len(), "closing watches");
        }
        self.subscribers.clear();
    }

    pub fn len(&self) -> usize {
        self.subscribers
            .iter()
            .filter(|s| !s.sender.is_closed())
            .count()
    }
}

/// Receiving end of a watch.
///
/// The session ends (`None`) when the store closes its watches; dropping the
/// session unsubscribes it on the next store mutation.
#[derive(Debug)]
pub struct WatchSession {
    id: u64,
    receiver: UnboundedReceiver<WatchEvent>,
}

impl WatchSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.receiver.recv().await
    }

    /// Next already-queued event. `None` when nothing is pending or the session ended.
    pub fn try_next(&mut self) -> Option<WatchEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Drain every event queued so far.
    pub fn drain(&mut self) -> Vec<WatchEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    pub fn into_receiver(self) -> UnboundedReceiver<WatchEvent> {
        self.receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn pods() -> ResourceType {
        ResourceType::core("v1", "pods")
    }

    fn pod(ns: &str, name: &str, app: &str) -> Value {
        json!({"metadata": {"name": name, "namespace": ns, "labels": {"app": app}, "resourceVersion": "1"}})
    }

    #[rstest]
    #[case(WatchFilter::new(pods(), Some("ns1")), true)]
    #[case(WatchFilter::new(pods(), Some("ns2")), false)]
    #[case(WatchFilter::new(pods(), None), true)]
    #[case(WatchFilter::new(pods(), None).with_name(Some("a")), true)]
    #[case(WatchFilter::new(pods(), None).with_name(Some("b")), false)]
    #[case(WatchFilter::new(ResourceType::core("v1", "secrets"), None), false)]
    #[case(WatchFilter::new(pods(), None).with_labels(LabelSelector::parse("app=db").unwrap()), false)]
    #[case(WatchFilter::new(pods(), None).with_fields(FieldSelector::parse("metadata.namespace=ns1").unwrap()), true)]
    fn test_filter_matches(#[case] filter: WatchFilter, #[case] expected: bool) {
        assert_eq!(filter.matches(&pods(), &pod("ns1", "a", "web")), expected);
    }

    #[rstest]
    #[case("web", "web", Some(WatchEventType::Modified))]
    #[case("db", "web", Some(WatchEventType::Added))]
    #[case("web", "db", Some(WatchEventType::Deleted))]
    #[case("db", "db", None)]
    fn test_translate_selector_transitions(
        #[case] before: &str,
        #[case] after: &str,
        #[case] expected: Option<WatchEventType>,
    ) {
        let filter = WatchFilter::new(pods(), None).with_labels(LabelSelector::parse("app=web").unwrap());
        let previous = pod("ns1", "a", before);
        let current = pod("ns1", "a", after);
        assert_eq!(
            filter.translate(&pods(), WatchEventType::Modified, &current, Some(&previous)),
            expected
        );
    }

    #[rstest]
    fn test_registry_delivers_and_prunes() {
        let mut registry = WatchRegistry::default();
        let mut kept = registry.subscribe(WatchFilter::new(pods(), None), 0, Vec::new());
        let dropped = registry.subscribe(WatchFilter::new(pods(), None), 0, Vec::new());
        assert_eq!(registry.len(), 2);
        drop(dropped);

        registry.publish(&Change {
            resource_type: pods(),
            event_type: WatchEventType::Added,
            object: pod("ns1", "a", "web"),
            previous: None,
        });
        assert_eq!(registry.len(), 1);
        let events = kept.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, WatchEventType::Added);
    }

    #[rstest]
    #[case(0, 1)]
    #[case(6, 1)]
    #[case(7, 0)]
    #[case(u64::MAX, 0)]
    fn test_registry_skips_changes_at_or_below_floor(#[case] since: u64, #[case] expected: usize) {
        let mut registry = WatchRegistry::default();
        let mut session = registry.subscribe(WatchFilter::new(pods(), None), since, Vec::new());
        let mut object = pod("ns1", "a", "web");
        object["metadata"]["resourceVersion"] = Value::from("7");

        registry.publish(&Change {
            resource_type: pods(),
            event_type: WatchEventType::Added,
            object,
            previous: None,
        });
        assert_eq!(session.drain().len(), expected);
        assert_eq!(registry.len(), 1);
    }

    #[rstest]
    fn test_close_all_ends_sessions() {
        let mut registry = WatchRegistry::default();
        let initial = vec![WatchEvent::new(WatchEventType::Added, pod("ns1", "a", "web"))];
        let mut session = registry.subscribe(WatchFilter::new(pods(), None), 0, initial);
        registry.close_all();
        assert!(session.try_next().is_some());
        assert!(session.try_next().is_none());
        assert!(session.receiver.is_closed());
    }
}
