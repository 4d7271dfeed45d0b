// ============================
// crates/sync-lib/src/view.rs
// ============================
//! Maps the current route to the conversation that should be open.
use serde::{Deserialize, Serialize};
use tracing::debug;
use vaquerama_common::{ConversationId, UserId};

use crate::conversations::ConversationStore;

/// Where the user is in the application
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum Route {
    #[default]
    Feed,
    Messages {
        #[serde(default)]
        target_participant: Option<UserId>,
    },
    Notifications,
    Profile { user_id: UserId },
    Other,
}

impl Route {
    pub fn is_messages(&self) -> bool {
        matches!(self, Route::Messages { .. })
    }
}

/// What should happen to the open conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Leave it as it is
    Keep,
    /// Switch to this conversation
    Open(ConversationId),
    /// Close whatever is open
    Close,
}

/// Result of a route change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Navigation {
    pub selection: Selection,
    /// The messages page was entered from elsewhere
    pub entered_messages: bool,
    /// The notifications page was entered from elsewhere
    pub entered_notifications: bool,
}

#[derive(Debug, Default)]
pub struct ViewSelector {
    route: Route,
    /// Participant requested before the conversation list was available
    pending_target: Option<UserId>,
}

impl ViewSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn navigate(
        &mut self,
        route: Route,
        conversations: &ConversationStore,
        current: Option<ConversationId>,
    ) -> Navigation {
        let was_messages = self.route.is_messages();
        let was_notifications = self.route == Route::Notifications;
        self.pending_target = None;

        let selection = match &route {
            Route::Messages {
                target_participant: Some(participant),
            } => match conversations.find_by_participant(*participant) {
                Some(c) if current == Some(c.conversation_id) => Selection::Keep,
                Some(c) => Selection::Open(c.conversation_id),
                None => {
                    debug!("No conversation with participant {} yet", participant);
                    self.pending_target = Some(*participant);
                    Selection::Close
                },
            },
            Route::Messages {
                target_participant: None,
            } if was_messages => Selection::Keep,
            _ => Selection::Close,
        };

        let navigation = Navigation {
            selection,
            entered_messages: route.is_messages() && !was_messages,
            entered_notifications: route == Route::Notifications && !was_notifications,
        };
        self.route = route;
        navigation
    }

    /// Resolve a target participant once the conversation list changes
    pub fn resolve_pending(&mut self, conversations: &ConversationStore) -> Selection {
        let Some(participant) = self.pending_target else {
            return Selection::Keep;
        };
        match conversations.find_by_participant(participant) {
            Some(c) => {
                self.pending_target = None;
                Selection::Open(c.conversation_id)
            },
            None => Selection::Keep,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::conversation;

    fn store() -> ConversationStore {
        let mut store = ConversationStore::new();
        store.load_all(vec![conversation(1, 10, Some(200)), conversation(2, 20, Some(100))]);
        store
    }

    fn messages_with(participant: Option<UserId>) -> Route {
        Route::Messages {
            target_participant: participant,
        }
    }

    #[test]
    fn test_target_participant_selects_conversation() {
        let mut view = ViewSelector::new();
        let nav = view.navigate(messages_with(Some(20)), &store(), None);
        assert_eq!(nav.selection, Selection::Open(2));
        assert!(nav.entered_messages);
        assert!(!nav.entered_notifications);
    }

    #[test]
    fn test_unknown_participant_means_no_active_conversation() {
        let mut view = ViewSelector::new();
        let nav = view.navigate(messages_with(Some(99)), &store(), Some(1));
        assert_eq!(nav.selection, Selection::Close);
    }

    #[test]
    fn test_pending_target_resolves_after_load() {
        let mut view = ViewSelector::new();
        let empty = ConversationStore::new();
        assert_eq!(view.navigate(messages_with(Some(20)), &empty, None).selection, Selection::Close);

        assert_eq!(view.resolve_pending(&store()), Selection::Open(2));
        assert_eq!(view.resolve_pending(&store()), Selection::Keep);
    }

    #[test]
    fn test_leaving_messages_closes() {
        let mut view = ViewSelector::new();
        view.navigate(messages_with(Some(10)), &store(), None);

        let nav = view.navigate(Route::Notifications, &store(), Some(1));
        assert_eq!(nav.selection, Selection::Close);
        assert!(nav.entered_notifications);
        assert!(!nav.entered_messages);
    }

    #[test]
    fn test_staying_on_messages_keeps_selection() {
        let mut view = ViewSelector::new();
        view.navigate(messages_with(Some(10)), &store(), None);

        let nav = view.navigate(messages_with(None), &store(), Some(1));
        assert_eq!(nav.selection, Selection::Keep);
        assert!(!nav.entered_messages);

        let nav = view.navigate(messages_with(Some(10)), &store(), Some(1));
        assert_eq!(nav.selection, Selection::Keep);
    }

    #[test]
    fn test_route_serialization() {
        let json = serde_json::to_string(&Route::Profile { user_id: 3 }).unwrap();
        assert_eq!(json, r#"{"route":"profile","user_id":3}"#);
        let route: Route = serde_json::from_str(r#"{"route":"messages"}"#).unwrap();
        assert_eq!(route, messages_with(None));
    }
}
