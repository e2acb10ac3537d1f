use crate::{SelectionContent, SelectionKind};

/// Per-session clipboard state: the last selection the document engine
/// pushed to us and the two most recent access keys.
///
/// Keeping the previous key means content copied just before a key rotation
/// is still recognised as ours afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionClipboardCache {
    selection: String,
    access_keys: [String; 2],
}

impl SessionClipboardCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_selection(&mut self, content: impl Into<String>) {
        self.selection = content.into();
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn selection(&self) -> &str {
        &self.selection
    }

    /// Snapshot of the cached selection for a selection of the given kind.
    pub fn selection_content(&self, kind: SelectionKind) -> SelectionContent {
        match kind {
            SelectionKind::None => SelectionContent::none(),
            SelectionKind::Simple | SelectionKind::Complex => SelectionContent {
                kind,
                text: Some(self.selection.clone()),
            },
        }
    }

    pub fn set_key(&mut self, key: impl Into<String>) {
        let key = key.into();
        if self.access_keys[0] == key {
            return;
        }
        self.access_keys.swap(0, 1);
        self.access_keys[0] = key;
    }

    pub fn current_key(&self) -> &str {
        &self.access_keys[0]
    }

    pub fn previous_key(&self) -> &str {
        &self.access_keys[1]
    }

    pub fn recognizes_key(&self, key: &str) -> bool {
        !key.is_empty() && self.access_keys.iter().any(|known| known == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_survives_one_rotation_only() {
        let mut cache = SessionClipboardCache::new();
        cache.set_key("A");
        cache.set_key("B");
        assert!(cache.recognizes_key("A"));
        assert!(cache.recognizes_key("B"));

        cache.set_key("C");
        assert!(!cache.recognizes_key("A"));
        assert_eq!(cache.current_key(), "C");
        assert_eq!(cache.previous_key(), "B");
    }

    #[test]
    fn repeating_current_key_does_not_rotate() {
        let mut cache = SessionClipboardCache::new();
        cache.set_key("A");
        cache.set_key("B");
        cache.set_key("B");
        assert_eq!(cache.previous_key(), "A");
    }

    #[test]
    fn empty_key_is_never_recognized() {
        let cache = SessionClipboardCache::new();
        assert!(!cache.recognizes_key(""));
    }

    #[test]
    fn selection_set_and_clear() {
        let mut cache = SessionClipboardCache::new();
        cache.set_selection("<b>Hello</b>");
        assert_eq!(
            cache.selection_content(SelectionKind::Simple).text.as_deref(),
            Some("<b>Hello</b>")
        );
        assert_eq!(
            cache.selection_content(SelectionKind::Complex).kind,
            SelectionKind::Complex
        );
        cache.clear_selection();
        assert_eq!(cache.selection(), "");
        assert_eq!(
            cache.selection_content(SelectionKind::None),
            SelectionContent::none()
        );
    }
}
