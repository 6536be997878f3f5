use std::fmt;

/// The external UI/command-processor interface: everything the core needs
/// to tell the outside world, without assuming a particular presentation
/// layer. `ringchat-cli` implements this with `println!`; tests implement it
/// with an in-memory recorder.
pub trait EventSink: fmt::Debug + Send + Sync {
    /// A user-visible error: invalid usage, no leader available, etc.
    fn user_error(&self, message: &str);

    /// A user-visible informational event (connected, disconnected, ...).
    fn user_event(&self, message: &str);

    /// A chat message arrived for display.
    fn chat_message_received(&self, user: &str, text: &str);

    /// The follower nickname set changed. `None` clears the display (no
    /// longer a chat participant).
    fn update_users(&self, names: Option<Vec<String>>);

    /// Connection/ring/leader status changed; the sink is expected to read
    /// whatever it needs back off the peer context.
    fn update_status(&self);

    /// This peer's own display name changed (nickname, or cleared on
    /// disconnect).
    fn set_connected_name(&self, name: Option<&str>);
}

/// Default sink: every event becomes a `tracing` event at `info` level,
/// mirroring how the teacher crate's binaries only ever talk to the world
/// through `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn user_error(&self, message: &str) {
        tracing::warn!(target: "ringchat::user", "error: {message}");
    }

    fn user_event(&self, message: &str) {
        tracing::info!(target: "ringchat::user", "{message}");
    }

    fn chat_message_received(&self, user: &str, text: &str) {
        tracing::info!(target: "ringchat::chat", "{user}: {text}");
    }

    fn update_users(&self, names: Option<Vec<String>>) {
        tracing::debug!(target: "ringchat::chat", users = ?names);
    }

    fn update_status(&self) {
        tracing::debug!(target: "ringchat::status", "status updated");
    }

    fn set_connected_name(&self, name: Option<&str>) {
        tracing::debug!(target: "ringchat::status", connected_name = ?name);
    }
}

/// An in-memory sink for tests: records every call so assertions can inspect
/// what the core told the UI to do.
#[cfg(any(test, feature = "test-util"))]
pub mod recording {
    use super::EventSink;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub user_errors: Mutex<Vec<String>>,
        pub user_events: Mutex<Vec<String>>,
        pub chat_messages: Mutex<Vec<(String, String)>>,
        pub user_lists: Mutex<Vec<Option<Vec<String>>>>,
        pub connected_names: Mutex<Vec<Option<String>>>,
    }

    impl EventSink for RecordingSink {
        fn user_error(&self, message: &str) {
            self.user_errors.lock().unwrap().push(message.to_owned());
        }

        fn user_event(&self, message: &str) {
            self.user_events.lock().unwrap().push(message.to_owned());
        }

        fn chat_message_received(&self, user: &str, text: &str) {
            self.chat_messages
                .lock()
                .unwrap()
                .push((user.to_owned(), text.to_owned()));
        }

        fn update_users(&self, names: Option<Vec<String>>) {
            self.user_lists.lock().unwrap().push(names);
        }

        fn update_status(&self) {}

        fn set_connected_name(&self, name: Option<&str>) {
            self.connected_names
                .lock()
                .unwrap()
                .push(name.map(|s| s.to_owned()));
        }
    }
}
