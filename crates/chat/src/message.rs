use llama_link_llm::{ProviderMessage, Role as ProviderRole};

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

impl From<Role> for ProviderRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => ProviderRole::User,
            Role::Assistant => ProviderRole::Assistant,
        }
    }
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn to_provider_message(&self) -> ProviderMessage {
        ProviderMessage::new(self.role.into(), self.content.clone())
    }
}

/// Ordered conversation history.
///
/// Messages are only ever appended. The single exception is growth of an
/// assistant message's content while it receives fragments; user content is
/// never touched after the push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn count_role(&self, role: Role) -> usize {
        self.messages
            .iter()
            .filter(|message| message.role == role)
            .count()
    }

    /// Snapshot handed to the provider as conversation context.
    pub fn to_provider_messages(&self) -> Vec<ProviderMessage> {
        self.messages
            .iter()
            .map(Message::to_provider_message)
            .collect()
    }

    /// Appends a message and returns its index.
    pub(crate) fn push(&mut self, message: Message) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }

    /// Appends `fragment` to the message at `index` when it is the trailing
    /// assistant message. Returns false and leaves the transcript untouched otherwise.
    pub(crate) fn extend_trailing_assistant(&mut self, index: usize, fragment: &str) -> bool {
        if index + 1 != self.messages.len() {
            return false;
        }

        match self.messages.last_mut() {
            Some(message) if message.role == Role::Assistant => {
                message.content.push_str(fragment);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.messages.clear();
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}
