//! Name/id routing for one simulation.
//!
//! Actors address each other by name; scheduled events and envelopes carry
//! ids. The router owns both views and is immutable once the run starts,
//! so actor loops share it without locking.

use std::collections::HashMap;

use timewarp_clock::MailboxSender;
use timewarp_types::ActorId;

#[derive(Debug, Default)]
pub(crate) struct Router {
    by_name: HashMap<String, MailboxSender>,
    by_id: HashMap<ActorId, MailboxSender>,
    names: HashMap<ActorId, String>,
}

impl Router {
    pub fn new(entries: impl IntoIterator<Item = (String, MailboxSender)>) -> Self {
        let mut router = Router::default();
        for (name, sender) in entries {
            router.by_id.insert(sender.id(), sender.clone());
            router.names.insert(sender.id(), name.clone());
            router.by_name.insert(name, sender);
        }
        router
    }

    pub fn sender_for(&self, name: &str) -> Option<&MailboxSender> {
        self.by_name.get(name)
    }

    pub fn sender_for_id(&self, id: ActorId) -> Option<&MailboxSender> {
        self.by_id.get(&id)
    }

    pub fn name_of(&self, id: ActorId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timewarp_clock::Mailbox;

    #[test]
    fn routes_by_name_and_id() {
        let mailbox = Mailbox::new(ActorId::next());
        let router = Router::new([("worker".to_string(), mailbox.sender())]);

        let by_name = router.sender_for("worker").expect("by name");
        assert_eq!(by_name.id(), mailbox.id());
        assert!(router.sender_for_id(mailbox.id()).is_some());
        assert_eq!(router.name_of(mailbox.id()), Some("worker"));
        assert!(router.sender_for("stranger").is_none());
    }
}
