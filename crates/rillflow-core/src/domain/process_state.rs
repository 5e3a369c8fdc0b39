use serde::{Deserialize, Serialize};

/// A token marking one point of execution within a process instance.
///
/// Tokens live in a flat multiset; several tokens may sit at the same
/// position after a parallel fork. `owning_process_id` records which
/// instance created the token, so a counting parallel join only consumes
/// tokens that belong to its own instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    /// Name of the flow object the token sits at
    pub position: String,
    /// ID of the instance that created this token
    pub owning_process_id: String,
    /// Nested state, present while the token waits on a call activity
    /// or sub-process
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub substate: Option<ProcessState>,
}

/// The token multiset of a process instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessState {
    /// All live tokens, in creation order
    pub tokens: Vec<Token>,
}

impl ProcessState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a token at the given position
    pub fn create_token_at(&mut self, position: impl Into<String>, owner: impl Into<String>) {
        self.tokens.push(Token {
            position: position.into(),
            owning_process_id: owner.into(),
            substate: None,
        });
    }

    /// Add `count` tokens at the given position
    pub fn create_tokens(&mut self, position: &str, owner: &str, count: usize) {
        for _ in 0..count {
            self.create_token_at(position, owner);
        }
    }

    /// Add a token that carries nested state
    pub fn create_token_with_substate(
        &mut self,
        position: impl Into<String>,
        owner: impl Into<String>,
        substate: ProcessState,
    ) {
        self.tokens.push(Token {
            position: position.into(),
            owning_process_id: owner.into(),
            substate: Some(substate),
        });
    }

    /// Remove one token at the given position. Returns false when no
    /// token sits there.
    pub fn remove_token_at(&mut self, position: &str) -> bool {
        match self.tokens.iter().position(|t| t.position == position) {
            Some(index) => {
                self.tokens.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove every token of the given owner at the given position,
    /// returning how many were consumed. Used by the parallel join so
    /// the merge is atomic.
    pub fn remove_all_at(&mut self, position: &str, owner: &str) -> usize {
        let before = self.tokens.len();
        self.tokens
            .retain(|t| !(t.position == position && t.owning_process_id == owner));
        before - self.tokens.len()
    }

    /// All tokens at the given position
    pub fn tokens_at(&self, position: &str) -> Vec<&Token> {
        self.tokens
            .iter()
            .filter(|t| t.position == position)
            .collect()
    }

    /// A mutable reference to the first token at the given position
    pub fn token_at_mut(&mut self, position: &str) -> Option<&mut Token> {
        self.tokens.iter_mut().find(|t| t.position == position)
    }

    /// Number of tokens of the given owner at the given position
    pub fn count_at(&self, position: &str, owner: &str) -> usize {
        self.tokens
            .iter()
            .filter(|t| t.position == position && t.owning_process_id == owner)
            .count()
    }

    /// Whether any token is live, optionally restricted to one owner
    pub fn has_tokens(&self, owner: Option<&str>) -> bool {
        match owner {
            Some(owner) => self.tokens.iter().any(|t| t.owning_process_id == owner),
            None => !self.tokens.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_and_remove() {
        let mut state = ProcessState::new();
        state.create_token_at("Task A", "order-1");
        assert!(state.has_tokens(None));
        assert_eq!(state.tokens_at("Task A").len(), 1);

        assert!(state.remove_token_at("Task A"));
        assert!(!state.has_tokens(None));
        assert!(!state.remove_token_at("Task A"));
    }

    #[test]
    fn test_multiset_allows_duplicates() {
        let mut state = ProcessState::new();
        state.create_token_at("Join", "order-1");
        state.create_token_at("Join", "order-1");
        assert_eq!(state.count_at("Join", "order-1"), 2);

        // remove_token_at consumes exactly one
        assert!(state.remove_token_at("Join"));
        assert_eq!(state.count_at("Join", "order-1"), 1);
    }

    #[test]
    fn test_remove_all_at_is_owner_scoped() {
        let mut state = ProcessState::new();
        state.create_token_at("Join", "parent");
        state.create_token_at("Join", "parent");
        state.create_token_at("Join", "parent::Child");

        assert_eq!(state.remove_all_at("Join", "parent"), 2);
        assert_eq!(state.count_at("Join", "parent"), 0);
        assert_eq!(state.count_at("Join", "parent::Child"), 1);
    }

    #[test]
    fn test_count_is_owner_scoped() {
        let mut state = ProcessState::new();
        state.create_token_at("Join", "a");
        state.create_token_at("Join", "b");
        assert_eq!(state.count_at("Join", "a"), 1);
        assert_eq!(state.count_at("Join", "b"), 1);
    }

    #[test]
    fn test_has_tokens_by_owner() {
        let mut state = ProcessState::new();
        state.create_token_at("Task", "a");
        assert!(state.has_tokens(Some("a")));
        assert!(!state.has_tokens(Some("b")));
    }

    #[test]
    fn test_create_tokens_places_count_at_one_position() {
        let mut state = ProcessState::new();
        state.create_tokens("Join", "p", 3);
        assert_eq!(state.count_at("Join", "p"), 3);
        assert_eq!(state.tokens.len(), 3);
    }

    #[test]
    fn test_wire_shape() {
        let mut state = ProcessState::new();
        state.create_token_at("Task A", "order-1");

        let serialized = serde_json::to_value(&state).unwrap();
        assert_eq!(
            serialized,
            json!({
                "tokens": [
                    {"position": "Task A", "owningProcessId": "order-1"}
                ]
            })
        );
    }

    #[test]
    fn test_substate_round_trip() {
        let mut nested = ProcessState::new();
        nested.create_token_at("Inner", "order-1::Sub");

        let mut state = ProcessState::new();
        state.create_token_with_substate("Sub", "order-1", nested.clone());

        let serialized = serde_json::to_value(&state).unwrap();
        assert_eq!(
            serialized["tokens"][0]["substate"]["tokens"][0]["position"],
            "Inner"
        );

        let restored: ProcessState = serde_json::from_value(serialized).unwrap();
        assert_eq!(restored.tokens[0].substate, Some(nested));
    }
}
